//! Running-balance arithmetic for the stock ledger
//!
//! Every quantity mutation in the system is funnelled through [`next_balance`],
//! which is the single place where "stock can never go negative" is enforced.

use thiserror::Error;

/// Errors raised by balance arithmetic
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BalanceError {
    #[error("Stock balance cannot go below zero (previous {previous}, in {qty_in}, out {qty_out})")]
    NegativeBalance {
        previous: i64,
        qty_in: i64,
        qty_out: i64,
    },

    #[error("Balance arithmetic overflowed")]
    Overflow,
}

/// Compute the next running balance from a prior balance and in/out deltas.
pub fn next_balance(previous: i64, qty_in: i64, qty_out: i64) -> Result<i64, BalanceError> {
    let next = previous
        .checked_add(qty_in)
        .and_then(|v| v.checked_sub(qty_out))
        .ok_or(BalanceError::Overflow)?;

    if next < 0 {
        return Err(BalanceError::NegativeBalance {
            previous,
            qty_in,
            qty_out,
        });
    }

    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_balance_adds_and_subtracts() {
        assert_eq!(next_balance(10, 5, 3), Ok(12));
        assert_eq!(next_balance(0, 7, 0), Ok(7));
        assert_eq!(next_balance(7, 0, 7), Ok(0));
    }

    #[test]
    fn test_next_balance_rejects_negative() {
        let err = next_balance(5, 0, 10).unwrap_err();
        assert_eq!(
            err,
            BalanceError::NegativeBalance {
                previous: 5,
                qty_in: 0,
                qty_out: 10
            }
        );
    }

    #[test]
    fn test_next_balance_overflow() {
        assert_eq!(next_balance(i64::MAX, 1, 0), Err(BalanceError::Overflow));
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Folding movements never yields a negative balance, and every accepted
        /// balance equals sum(in) - sum(out) of the accepted movements
        #[test]
        fn prop_balance_never_negative(moves in prop::collection::vec((0i64..100, 0i64..100), 0..50)) {
            let mut balance = 0i64;
            let mut total_in = 0i64;
            let mut total_out = 0i64;

            for (qty_in, qty_out) in moves {
                match next_balance(balance, qty_in, qty_out) {
                    Ok(next) => {
                        balance = next;
                        total_in += qty_in;
                        total_out += qty_out;
                    }
                    Err(BalanceError::NegativeBalance { .. }) => {
                        prop_assert!(balance + qty_in < qty_out);
                    }
                    Err(BalanceError::Overflow) => prop_assert!(false, "unexpected overflow"),
                }
                prop_assert!(balance >= 0);
                prop_assert_eq!(balance, total_in - total_out);
            }
        }
    }
}

//! Common types and money helpers

use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

/// Category assigned to items created without one
pub const DEFAULT_CATEGORY: &str = "Uncategorised";

/// Decimal places kept on average unit costs
pub const UNIT_COST_SCALE: u32 = 4;

/// Errors raised by money arithmetic
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CostError {
    #[error("Cost of {quantity} units at {unit_cost} is out of range")]
    Overflow { quantity: i64, unit_cost: Decimal },

    #[error("Cost total is out of range")]
    TotalOverflow,
}

/// `quantity × unit_cost`, refusing results Decimal cannot hold
pub fn extended_cost(quantity: i64, unit_cost: Decimal) -> Result<Decimal, CostError> {
    Decimal::from(quantity)
        .checked_mul(unit_cost)
        .ok_or(CostError::Overflow {
            quantity,
            unit_cost,
        })
}

/// Add two money amounts, refusing results Decimal cannot hold
pub fn add_cost(a: Decimal, b: Decimal) -> Result<Decimal, CostError> {
    a.checked_add(b).ok_or(CostError::TotalOverflow)
}

/// Round a money amount to cents, midpoint away from zero
pub fn round_currency(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Round a unit cost to [`UNIT_COST_SCALE`] places
pub fn round_unit_cost(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(UNIT_COST_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Weighted average unit cost after receiving `received` units at `unit_cost`
/// onto `on_hand` units valued at `current_average`.
pub fn weighted_average_cost(
    on_hand: i64,
    current_average: Decimal,
    received: i64,
    unit_cost: Decimal,
) -> Result<Decimal, CostError> {
    let total_units = on_hand.saturating_add(received);
    if total_units <= 0 {
        return Ok(round_unit_cost(unit_cost));
    }

    let total_value = add_cost(
        extended_cost(on_hand.max(0), current_average)?,
        extended_cost(received, unit_cost)?,
    )?;
    let average = total_value
        .checked_div(Decimal::from(total_units))
        .ok_or(CostError::TotalOverflow)?;
    Ok(round_unit_cost(average))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_round_currency_midpoint_away_from_zero() {
        assert_eq!(round_currency(dec("2.345")), dec("2.35"));
        assert_eq!(round_currency(dec("-2.345")), dec("-2.35"));
        assert_eq!(round_currency(dec("2.344")), dec("2.34"));
    }

    #[test]
    fn test_weighted_average_cost() {
        // 100 @ 20 + 50 @ 30 = 3500 / 150
        assert_eq!(
            weighted_average_cost(100, dec("20"), 50, dec("30")),
            Ok(dec("23.3333"))
        );
        // Empty stock takes the receipt cost
        assert_eq!(
            weighted_average_cost(0, dec("9"), 5, dec("4.5")),
            Ok(dec("4.5"))
        );
    }

    #[test]
    fn test_out_of_range_costs_are_errors() {
        assert!(matches!(
            extended_cost(i64::MAX, dec("100000000000")),
            Err(CostError::Overflow { quantity: i64::MAX, .. })
        ));
        assert_eq!(add_cost(Decimal::MAX, Decimal::ONE), Err(CostError::TotalOverflow));
        assert!(weighted_average_cost(i64::MAX - 1, Decimal::MAX, 1, dec("1")).is_err());
        assert_eq!(extended_cost(-3, dec("2.50")), Ok(dec("-7.50")));
    }
}

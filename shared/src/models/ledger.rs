//! Stock ledger models and balance replay

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::StockItem;
use crate::balance::{next_balance, BalanceError};

/// Direction of a stock movement
///
/// `IN` and `OUT` carry the moved magnitude. `ADJUST` carries the counted
/// absolute level from a stock-take and resets the balance to it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum MovementDirection {
    In,
    Out,
    Adjust,
}

impl MovementDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementDirection::In => "IN",
            MovementDirection::Out => "OUT",
            MovementDirection::Adjust => "ADJUST",
        }
    }

    /// Split a recorded quantity into (in, out) deltas against the previous balance
    pub fn deltas(&self, previous: i64, quantity: i64) -> (i64, i64) {
        match self {
            MovementDirection::In => (quantity, 0),
            MovementDirection::Out => (0, quantity),
            MovementDirection::Adjust if quantity >= previous => (quantity - previous, 0),
            MovementDirection::Adjust => (0, previous - quantity),
        }
    }
}

impl std::fmt::Display for MovementDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MovementDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "IN" => Ok(MovementDirection::In),
            "OUT" => Ok(MovementDirection::Out),
            "ADJUST" => Ok(MovementDirection::Adjust),
            other => Err(format!("unknown movement direction '{}'", other)),
        }
    }
}

/// One immutable ledger row
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub stock_item_id: Uuid,
    pub direction: MovementDirection,
    /// Magnitude, never negative; `direction` encodes the sign
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
    pub reference: Option<String>,
    pub notes: Option<String>,
    /// Balance after this entry, cached at write time
    pub running_balance: i64,
}

impl LedgerEntry {
    /// Apply a movement to `item` and capture the resulting ledger row.
    ///
    /// On error the item is left unchanged.
    pub fn record(
        item: &mut StockItem,
        direction: MovementDirection,
        quantity: i64,
        reference: Option<String>,
        notes: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<Self, BalanceError> {
        let running_balance = item.apply_movement(direction, quantity)?;
        item.updated_at = at;

        Ok(Self {
            id: Uuid::new_v4(),
            stock_item_id: item.id,
            direction,
            quantity,
            occurred_at: at,
            reference,
            notes,
            running_balance,
        })
    }

    /// Signed change in quantity this entry represents, given the prior balance
    pub fn signed_delta(&self, previous: i64) -> i64 {
        let (qty_in, qty_out) = self.direction.deltas(previous, self.quantity);
        qty_in - qty_out
    }
}

/// Read-only projection over ledger history
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerFilter {
    /// Inclusive lower bound on the entry date
    pub date_from: Option<NaiveDate>,
    /// Inclusive upper bound on the entry date
    pub date_to: Option<NaiveDate>,
    pub direction: Option<MovementDirection>,
}

impl LedgerFilter {
    pub fn between(date_from: Option<NaiveDate>, date_to: Option<NaiveDate>) -> Self {
        Self {
            date_from,
            date_to,
            direction: None,
        }
    }

    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        let day = entry.occurred_at.date_naive();
        self.date_from.map_or(true, |from| day >= from)
            && self.date_to.map_or(true, |to| day <= to)
            && self.direction.map_or(true, |d| d == entry.direction)
    }
}

/// Ledger entry joined with its item's code, for cross-item listings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerMovement {
    pub item_code: String,
    pub item_description: String,
    pub entry: LedgerEntry,
}

/// Recompute running balances from raw entries.
///
/// Entries are taken in recorded order and stably sorted by timestamp, so
/// entries sharing a timestamp keep their recorded order. Returns the entries
/// chronologically with `running_balance` re-derived.
pub fn replay_balances(entries: &[LedgerEntry]) -> Result<Vec<LedgerEntry>, BalanceError> {
    let mut ordered: Vec<LedgerEntry> = entries.to_vec();
    ordered.sort_by_key(|e| e.occurred_at);

    let mut balance = 0i64;
    for entry in &mut ordered {
        let (qty_in, qty_out) = entry.direction.deltas(balance, entry.quantity);
        balance = next_balance(balance, qty_in, qty_out)?;
        entry.running_balance = balance;
    }

    Ok(ordered)
}

/// Balance after replaying every entry (0 for an empty ledger)
pub fn replayed_balance(entries: &[LedgerEntry]) -> Result<i64, BalanceError> {
    Ok(replay_balances(entries)?
        .last()
        .map_or(0, |e| e.running_balance))
}

/// Result of checking an item against its own ledger
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerAudit {
    pub stock_item_id: Uuid,
    pub item_quantity: i64,
    pub replayed_balance: i64,
    /// Running balance stored on the most recent entry
    pub cached_balance: Option<i64>,
    pub entry_count: usize,
}

impl LedgerAudit {
    pub fn is_consistent(&self) -> bool {
        let cache_ok = match self.cached_balance {
            Some(cached) => cached == self.replayed_balance,
            None => self.replayed_balance == 0,
        };
        cache_ok && self.replayed_balance == self.item_quantity
    }
}

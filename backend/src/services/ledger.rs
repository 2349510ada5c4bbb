//! Ledger service: manual movements, filtered history and balance audits

use std::collections::HashMap;

use chrono::Utc;
use rust_decimal::Decimal;
use shared::{
    replay_balances, validate_unit_cost, weighted_average_cost, LedgerAudit, LedgerEntry,
    LedgerFilter, LedgerMovement, MovementDirection,
};
use tracing::instrument;
use uuid::Uuid;

use super::require_positive;
use crate::error::{AppError, AppResult};
use crate::store::{ItemLedger, StockChange, StockStore};

/// Ledger service for appending and reading stock movements
#[derive(Clone)]
pub struct LedgerService<S> {
    store: S,
}

impl<S: StockStore> LedgerService<S> {
    /// Create a new LedgerService instance
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Append one movement to an item's ledger and apply it to the item.
    ///
    /// `IN`/`OUT` take a positive magnitude; `ADJUST` takes the counted level.
    #[instrument(skip(self))]
    pub async fn append(
        &self,
        item_id: Uuid,
        direction: MovementDirection,
        quantity: i64,
        reference: Option<String>,
        notes: Option<String>,
    ) -> AppResult<LedgerEntry> {
        match direction {
            MovementDirection::Adjust if quantity < 0 => {
                return Err(AppError::InvalidQuantity(format!(
                    "Counted quantity cannot be negative (got {})",
                    quantity
                )))
            }
            MovementDirection::Adjust => {}
            _ => require_positive(quantity)?,
        }

        let change = self
            .store
            .transact(item_id, None, move |snapshot| {
                let mut item = snapshot.item;
                if direction == MovementDirection::Out && quantity > item.quantity {
                    return Err(AppError::InsufficientStock {
                        item_code: item.item_code,
                        available: item.quantity,
                        requested: quantity,
                    });
                }

                let entry =
                    LedgerEntry::record(&mut item, direction, quantity, reference, notes, Utc::now())?;
                Ok(StockChange::new(item).with_ledger_entry(entry))
            })
            .await
            .map_err(|err| {
                tracing::warn!(item_id = %item_id, error = %err, "Ledger append rejected");
                err
            })?;

        let entry = recorded_entry(change)?;
        tracing::info!(
            item_id = %item_id,
            direction = %entry.direction,
            quantity = entry.quantity,
            balance = entry.running_balance,
            "Ledger entry appended"
        );
        Ok(entry)
    }

    /// Receive stock, folding its cost into the item's weighted average
    #[instrument(skip(self))]
    pub async fn receive(
        &self,
        item_id: Uuid,
        quantity: i64,
        unit_cost: Decimal,
        reference: Option<String>,
    ) -> AppResult<LedgerEntry> {
        require_positive(quantity)?;
        validate_unit_cost(unit_cost).map_err(|m| AppError::validation("unit_cost", m))?;

        let change = self
            .store
            .transact(item_id, None, move |snapshot| {
                let mut item = snapshot.item;
                let average = weighted_average_cost(
                    item.quantity,
                    item.average_unit_cost,
                    quantity,
                    unit_cost,
                )?;

                let entry = LedgerEntry::record(
                    &mut item,
                    MovementDirection::In,
                    quantity,
                    reference,
                    Some(format!("Received at {}", unit_cost)),
                    Utc::now(),
                )?;
                item.average_unit_cost = average;
                Ok(StockChange::new(item).with_ledger_entry(entry))
            })
            .await?;

        tracing::info!(
            item_id = %item_id,
            quantity,
            average_unit_cost = %change.item.average_unit_cost,
            "Stock received"
        );
        recorded_entry(change)
    }

    /// Manual stock-out not charged to any project
    pub async fn stock_out(
        &self,
        item_id: Uuid,
        quantity: i64,
        reference: Option<String>,
        notes: Option<String>,
    ) -> AppResult<LedgerEntry> {
        self.append(item_id, MovementDirection::Out, quantity, reference, notes)
            .await
    }

    /// Stock-take correction to an absolute counted level
    pub async fn adjust(
        &self,
        item_id: Uuid,
        counted_quantity: i64,
        reference: Option<String>,
        notes: Option<String>,
    ) -> AppResult<LedgerEntry> {
        self.append(item_id, MovementDirection::Adjust, counted_quantity, reference, notes)
            .await
    }

    /// Filtered history for display, most recent first
    pub async fn history(&self, item_id: Uuid, filter: &LedgerFilter) -> AppResult<Vec<LedgerEntry>> {
        let mut entries = self.chronological(item_id, filter).await?;
        entries.reverse();
        Ok(entries)
    }

    /// Filtered history in chronological order
    pub async fn chronological(
        &self,
        item_id: Uuid,
        filter: &LedgerFilter,
    ) -> AppResult<Vec<LedgerEntry>> {
        let mut entries = self.item_ledger(item_id).await?.entries;
        entries.sort_by_key(|e| e.occurred_at);
        entries.retain(|e| filter.matches(e));

        tracing::debug!(item_id = %item_id, count = entries.len(), "Read ledger history");
        Ok(entries)
    }

    /// Running balances re-derived from the raw entries
    pub async fn replay(&self, item_id: Uuid) -> AppResult<Vec<LedgerEntry>> {
        let ledger = self.item_ledger(item_id).await?;
        Ok(replay_balances(&ledger.entries)?)
    }

    /// Compare an item's quantity with a replay of its ledger
    #[instrument(skip(self))]
    pub async fn verify(&self, item_id: Uuid) -> AppResult<LedgerAudit> {
        let ledger = self.item_ledger(item_id).await?;

        let audit = audit(item_id, ledger.item.quantity, &ledger.entries)?;
        if !audit.is_consistent() {
            tracing::warn!(
                item_id = %item_id,
                quantity = audit.item_quantity,
                replayed = audit.replayed_balance,
                "Ledger does not reproduce item quantity"
            );
        }
        Ok(audit)
    }

    /// Audit every item
    pub async fn audit_all(&self) -> AppResult<Vec<LedgerAudit>> {
        let snapshot = self.store.ledger_snapshot().await?;
        let mut by_item: HashMap<Uuid, Vec<LedgerEntry>> = HashMap::new();
        for entry in snapshot.entries {
            by_item.entry(entry.stock_item_id).or_default().push(entry);
        }

        snapshot
            .items
            .iter()
            .map(|item| {
                let entries = by_item.remove(&item.id).unwrap_or_default();
                audit(item.id, item.quantity, &entries)
            })
            .collect()
    }

    /// Movements across items, most recent first, optionally for one item code
    pub async fn movements(
        &self,
        item_code: Option<&str>,
        filter: &LedgerFilter,
    ) -> AppResult<Vec<LedgerMovement>> {
        let snapshot = self.store.ledger_snapshot().await?;
        let items: HashMap<Uuid, _> = snapshot
            .items
            .into_iter()
            .filter(|item| item_code.map_or(true, |code| item.code_matches(code)))
            .map(|item| (item.id, item))
            .collect();

        let mut entries: Vec<LedgerEntry> = snapshot
            .entries
            .into_iter()
            .filter(|e| items.contains_key(&e.stock_item_id) && filter.matches(e))
            .collect();
        entries.sort_by_key(|e| e.occurred_at);
        entries.reverse();

        Ok(entries
            .into_iter()
            .filter_map(|entry| {
                items.get(&entry.stock_item_id).map(|item| LedgerMovement {
                    item_code: item.item_code.clone(),
                    item_description: item.description.clone(),
                    entry,
                })
            })
            .collect())
    }

    async fn item_ledger(&self, item_id: Uuid) -> AppResult<ItemLedger> {
        self.store
            .item_with_ledger(item_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Stock item {}", item_id)))
    }
}

fn audit(item_id: Uuid, item_quantity: i64, entries: &[LedgerEntry]) -> AppResult<LedgerAudit> {
    let replayed = replay_balances(entries)?;
    let cached_balance = {
        let mut chronological = entries.to_vec();
        chronological.sort_by_key(|e| e.occurred_at);
        chronological.last().map(|e| e.running_balance)
    };

    Ok(LedgerAudit {
        stock_item_id: item_id,
        item_quantity,
        replayed_balance: replayed.last().map_or(0, |e| e.running_balance),
        cached_balance,
        entry_count: entries.len(),
    })
}

fn recorded_entry(change: StockChange) -> AppResult<LedgerEntry> {
    change
        .ledger_entry
        .ok_or_else(|| AppError::Internal("stock change recorded no ledger entry".to_string()))
}

//! Stock item service: item records, derived status and valuation

use chrono::Utc;
use shared::{
    category_values, validate_item_code, validate_levels, validate_unit_cost, CategoryValue,
    LedgerEntry, MovementDirection, NewStockItem, StockItem, StockStatus, UpdateStockItem,
};
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::store::{StockChange, StockStore};

/// Stock item service for managing item records
#[derive(Clone)]
pub struct StockItemService<S> {
    store: S,
}

impl<S: StockStore> StockItemService<S> {
    /// Create a new StockItemService instance
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Create an item, recording its opening balance as an `IN` entry
    #[instrument(skip(self, input), fields(item_code = %input.item_code))]
    pub async fn create_item(&self, input: NewStockItem) -> AppResult<StockItem> {
        input.validate().map_err(AppError::from_validation)?;
        validate_item_code(&input.item_code).map_err(|m| AppError::validation("item_code", m))?;

        let existing = self.store.list_items().await?;
        if existing.iter().any(|i| i.code_matches(&input.item_code)) {
            // Tolerated; the integrity pass renames duplicates later
            tracing::warn!(item_code = %input.item_code, "Creating item with a duplicate code");
        }

        let now = Utc::now();
        let mut item = StockItem::from_input(&input, now);

        let opening = match input.opening_quantity.filter(|q| *q > 0) {
            Some(quantity) => Some(LedgerEntry::record(
                &mut item,
                MovementDirection::In,
                quantity,
                Some("Opening balance".to_string()),
                None,
                now,
            )?),
            None => None,
        };

        let item = self.store.create_item(item, opening).await?;
        tracing::info!(item_id = %item.id, quantity = item.quantity, "Stock item created");

        Ok(item)
    }

    /// Get an item by id
    pub async fn get_item(&self, id: Uuid) -> AppResult<StockItem> {
        self.store
            .get_item(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Stock item {}", id)))
    }

    /// List items ordered by code, optionally restricted to one category
    pub async fn list_items(&self, category: Option<&str>) -> AppResult<Vec<StockItem>> {
        let category = category.map(str::trim).filter(|c| !c.is_empty());

        let mut items: Vec<StockItem> = self
            .store
            .list_items()
            .await?
            .into_iter()
            .filter(|item| category.map_or(true, |c| item.category.eq_ignore_ascii_case(c)))
            .collect();

        items.sort_by(|a, b| {
            a.item_code
                .to_lowercase()
                .cmp(&b.item_code.to_lowercase())
                .then(a.created_at.cmp(&b.created_at))
        });

        tracing::debug!(count = items.len(), "Listed stock items");
        Ok(items)
    }

    /// Update the mutable fields of an item.
    ///
    /// A changed quantity is written as an `ADJUST` ledger entry in the same
    /// atomic unit, so the ledger keeps reproducing the item's quantity.
    #[instrument(skip(self, input))]
    pub async fn update_item(&self, id: Uuid, input: UpdateStockItem) -> AppResult<StockItem> {
        input.validate().map_err(AppError::from_validation)?;
        if let Some(cost) = input.average_unit_cost {
            validate_unit_cost(cost).map_err(|m| AppError::validation("average_unit_cost", m))?;
        }

        let change = self
            .store
            .transact(id, None, move |snapshot| {
                let now = Utc::now();
                let mut item = snapshot.item;

                if let Some(description) = input.description {
                    item.description = description;
                }
                if let Some(unit) = input.unit {
                    item.unit = unit;
                }
                if let Some(cost) = input.average_unit_cost {
                    item.average_unit_cost = cost;
                }
                if input.min_level.is_some() {
                    item.min_level = input.min_level;
                }
                if input.max_level.is_some() {
                    item.max_level = input.max_level;
                }
                if let Some(category) = input.category {
                    let category = category.trim();
                    if !category.is_empty() {
                        item.category = category.to_string();
                    }
                }
                validate_levels(item.min_level, item.max_level)
                    .map_err(|m| AppError::validation("min_level", m))?;

                let entry = match input.quantity {
                    Some(counted) if counted != item.quantity => Some(LedgerEntry::record(
                        &mut item,
                        MovementDirection::Adjust,
                        counted,
                        Some("Stock update".to_string()),
                        None,
                        now,
                    )?),
                    _ => None,
                };
                item.updated_at = now;

                let change = StockChange::new(item);
                Ok(match entry {
                    Some(entry) => change.with_ledger_entry(entry),
                    None => change,
                })
            })
            .await?;

        tracing::info!(item_id = %id, quantity = change.item.quantity, "Stock item updated");
        Ok(change.item)
    }

    /// Items currently in the given status
    pub async fn items_with_status(&self, status: StockStatus) -> AppResult<Vec<StockItem>> {
        Ok(self
            .list_items(None)
            .await?
            .into_iter()
            .filter(|item| item.status() == status)
            .collect())
    }

    pub async fn low_stock_items(&self) -> AppResult<Vec<StockItem>> {
        self.items_with_status(StockStatus::Low).await
    }

    /// Stock value broken down by category
    pub async fn category_values(&self) -> AppResult<Vec<CategoryValue>> {
        let items = self.store.list_items().await?;
        category_values(&items).map_err(|err| AppError::InvariantViolation(err.to_string()))
    }

    pub async fn available_quantity(&self, id: Uuid) -> AppResult<i64> {
        Ok(self.get_item(id).await?.quantity)
    }

    /// Whether `quantity` could be issued right now. Advisory only; `issue`
    /// re-checks under the item lock.
    pub async fn can_issue(&self, id: Uuid, quantity: i64) -> AppResult<bool> {
        if quantity <= 0 {
            return Ok(false);
        }
        match self.store.get_item(id).await? {
            Some(item) => Ok(quantity <= item.quantity),
            None => Ok(false),
        }
    }
}

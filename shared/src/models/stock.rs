//! Stock item models

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use super::MovementDirection;
use crate::balance::{next_balance, BalanceError};
use crate::types::{add_cost, extended_cost, CostError, DEFAULT_CATEGORY};

/// A physical stock item (consumable, filler wire, gas, fittings, ...)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StockItem {
    pub id: Uuid,
    /// Human-facing code. Should be unique but may transiently duplicate.
    pub item_code: String,
    pub description: String,
    /// Unit of measure (e.g. "kg", "ea", "roll")
    pub unit: String,
    /// Quantity on hand, never negative
    pub quantity: i64,
    pub min_level: Option<i64>,
    pub max_level: Option<i64>,
    pub category: String,
    pub average_unit_cost: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Derived stock status; `Out` takes precedence over `Low`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    Out,
    Low,
    Normal,
}

impl std::fmt::Display for StockStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StockStatus::Out => write!(f, "Out of stock"),
            StockStatus::Low => write!(f, "Low"),
            StockStatus::Normal => write!(f, "Normal"),
        }
    }
}

impl StockItem {
    /// Build a new item with zero quantity from validated input
    pub fn from_input(input: &NewStockItem, now: DateTime<Utc>) -> Self {
        let category = input
            .category
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_CATEGORY)
            .to_string();

        Self {
            id: Uuid::new_v4(),
            item_code: input.item_code.trim().to_string(),
            description: input.description.clone(),
            unit: input.unit.clone(),
            quantity: 0,
            min_level: input.min_level,
            max_level: input.max_level,
            category,
            average_unit_cost: input.average_unit_cost.unwrap_or(Decimal::ZERO),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_out_of_stock(&self) -> bool {
        self.quantity <= 0
    }

    pub fn is_low_stock(&self) -> bool {
        match self.min_level {
            Some(min) => self.quantity > 0 && self.quantity <= min,
            None => false,
        }
    }

    pub fn status(&self) -> StockStatus {
        if self.is_out_of_stock() {
            StockStatus::Out
        } else if self.is_low_stock() {
            StockStatus::Low
        } else {
            StockStatus::Normal
        }
    }

    /// Quantity on hand valued at the current average unit cost
    pub fn total_stock_value(&self) -> Result<Decimal, CostError> {
        extended_cost(self.quantity, self.average_unit_cost)
    }

    /// Apply one movement to the on-hand quantity and return the new balance.
    ///
    /// The quantity is left untouched when the movement would drive it negative.
    pub fn apply_movement(
        &mut self,
        direction: MovementDirection,
        quantity: i64,
    ) -> Result<i64, BalanceError> {
        let (qty_in, qty_out) = direction.deltas(self.quantity, quantity);
        self.quantity = next_balance(self.quantity, qty_in, qty_out)?;
        Ok(self.quantity)
    }

    /// Case-insensitive code comparison used by the integrity checks
    pub fn code_matches(&self, code: &str) -> bool {
        self.item_code.to_lowercase() == code.trim().to_lowercase()
    }
}

/// Input for creating a stock item
#[derive(Debug, Clone, Deserialize, Validate)]
#[validate(schema(function = "validate_new_item_levels"))]
pub struct NewStockItem {
    #[validate(length(min = 1, max = 50))]
    pub item_code: String,
    #[validate(length(max = 500))]
    pub description: String,
    #[validate(length(max = 20))]
    pub unit: String,
    #[validate(range(min = 0))]
    pub min_level: Option<i64>,
    #[validate(range(min = 0))]
    pub max_level: Option<i64>,
    #[validate(length(max = 100))]
    pub category: Option<String>,
    pub average_unit_cost: Option<Decimal>,
    /// Opening balance, recorded as an `IN` ledger entry
    #[validate(range(min = 0))]
    pub opening_quantity: Option<i64>,
}

/// Input for updating the mutable fields of a stock item
///
/// Identity and code are not editable here; codes change only through the
/// integrity pass.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateStockItem {
    #[validate(length(max = 500))]
    pub description: Option<String>,
    #[validate(length(max = 20))]
    pub unit: Option<String>,
    /// A changed quantity is recorded as an `ADJUST` ledger entry
    #[validate(range(min = 0))]
    pub quantity: Option<i64>,
    pub average_unit_cost: Option<Decimal>,
    #[validate(range(min = 0))]
    pub min_level: Option<i64>,
    #[validate(range(min = 0))]
    pub max_level: Option<i64>,
    #[validate(length(max = 100))]
    pub category: Option<String>,
}

fn validate_new_item_levels(input: &NewStockItem) -> Result<(), ValidationError> {
    if input.item_code.trim().is_empty() {
        return Err(ValidationError::new("item_code_blank"));
    }
    crate::validation::validate_levels(input.min_level, input.max_level)
        .map_err(|_| ValidationError::new("min_level_above_max_level"))?;
    if let Some(cost) = input.average_unit_cost {
        crate::validation::validate_unit_cost(cost)
            .map_err(|_| ValidationError::new("invalid_unit_cost"))?;
    }
    Ok(())
}

/// Total units and value held in one category
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryValue {
    pub category: String,
    pub total_units: i64,
    pub total_value: Decimal,
}

/// Break stock value down by category, sorted by category name
pub fn category_values(items: &[StockItem]) -> Result<Vec<CategoryValue>, CostError> {
    let mut by_category: std::collections::BTreeMap<&str, CategoryValue> =
        std::collections::BTreeMap::new();

    for item in items {
        let entry = by_category
            .entry(item.category.as_str())
            .or_insert_with(|| CategoryValue {
                category: item.category.clone(),
                total_units: 0,
                total_value: Decimal::ZERO,
            });
        entry.total_units = entry.total_units.saturating_add(item.quantity);
        entry.total_value = add_cost(entry.total_value, item.total_stock_value()?)?;
    }

    Ok(by_category.into_values().collect())
}

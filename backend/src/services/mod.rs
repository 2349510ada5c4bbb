//! Business logic services for the stock ledger

pub mod allocation;
pub mod integrity;
pub mod ledger;
pub mod project;
pub mod stock;
pub mod transaction;

pub use allocation::AllocationService;
pub use integrity::IntegrityService;
pub use ledger::LedgerService;
pub use project::{ProjectCostReport, ProjectService};
pub use stock::StockItemService;
pub use transaction::TransactionProcessor;

use crate::error::{AppError, AppResult};

pub(crate) fn require_positive(quantity: i64) -> AppResult<()> {
    shared::validate_positive_quantity(quantity)
        .map_err(|m| AppError::InvalidQuantity(format!("{} (got {})", m, quantity)))
}

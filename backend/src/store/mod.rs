//! Persistence for items, ledger, usage and allocation records
//!
//! Every quantity-affecting operation goes through [`StockStore::transact`]:
//! the store locks the item (then the project, if any), hands a consistent
//! [`StockSnapshot`] to a pure planning closure, and writes the resulting
//! [`StockChange`] as one atomic unit. If the plan fails, nothing is written.

use std::future::Future;

use shared::{
    LedgerEntry, ProjectFinancials, ProjectStockAllocation, ProjectStockUsage, StockItem,
};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// State read under the item lock (and project lock) before planning a change
#[derive(Debug, Clone)]
pub struct StockSnapshot {
    pub item: StockItem,
    pub project: Option<ProjectFinancials>,
    /// Net quantity of this item still issued to `project` (issues minus returns)
    pub net_issued: i64,
}

/// One item and its ledger as of a single point in time
#[derive(Debug, Clone)]
pub struct ItemLedger {
    pub item: StockItem,
    pub entries: Vec<LedgerEntry>,
}

/// All items and the whole ledger as of a single point in time
#[derive(Debug, Clone, Default)]
pub struct LedgerSnapshot {
    pub items: Vec<StockItem>,
    pub entries: Vec<LedgerEntry>,
}

/// Everything one atomic stock operation writes
#[derive(Debug, Clone)]
pub struct StockChange {
    /// Item state after the change
    pub item: StockItem,
    pub ledger_entry: Option<LedgerEntry>,
    pub usage: Option<ProjectStockUsage>,
    pub allocation: Option<ProjectStockAllocation>,
    /// Project state after the change
    pub project: Option<ProjectFinancials>,
}

impl StockChange {
    pub fn new(item: StockItem) -> Self {
        Self {
            item,
            ledger_entry: None,
            usage: None,
            allocation: None,
            project: None,
        }
    }

    pub fn with_ledger_entry(mut self, entry: LedgerEntry) -> Self {
        self.ledger_entry = Some(entry);
        self
    }

    pub fn with_usage(mut self, usage: ProjectStockUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn with_allocation(mut self, allocation: ProjectStockAllocation) -> Self {
        self.allocation = Some(allocation);
        self
    }

    pub fn with_project(mut self, project: ProjectFinancials) -> Self {
        self.project = Some(project);
        self
    }

    /// Final checks before a change is written, whatever the store
    pub(crate) fn verify(&self, item_id: Uuid, project_id: Option<Uuid>) -> AppResult<()> {
        if self.item.id != item_id {
            return Err(AppError::Internal(format!(
                "planned change targets item {} inside a transaction on {}",
                self.item.id, item_id
            )));
        }

        if self.item.quantity < 0 {
            return Err(AppError::InvariantViolation(format!(
                "item {} would hold {} units",
                self.item.item_code, self.item.quantity
            )));
        }

        if let Some(entry) = &self.ledger_entry {
            if entry.stock_item_id != item_id || entry.running_balance != self.item.quantity {
                return Err(AppError::InvariantViolation(format!(
                    "ledger balance {} does not match item quantity {}",
                    entry.running_balance, self.item.quantity
                )));
            }
        }

        let touches_project =
            self.usage.is_some() || self.allocation.is_some() || self.project.is_some();
        if touches_project {
            let project = self
                .project
                .as_ref()
                .ok_or_else(|| AppError::Internal("project change without project".to_string()))?;
            if Some(project.id) != project_id {
                return Err(AppError::Internal(format!(
                    "planned change targets project {} outside its lock",
                    project.id
                )));
            }
            if project.actual_cost < rust_decimal::Decimal::ZERO {
                return Err(AppError::InvariantViolation(
                    "project actual cost would go below zero".to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// A durable store with atomic multi-record writes
pub trait StockStore: Clone + Send + Sync + 'static {
    /// Insert a new item, with its opening ledger entry if it starts with stock
    fn create_item(
        &self,
        item: StockItem,
        opening: Option<LedgerEntry>,
    ) -> impl Future<Output = AppResult<StockItem>> + Send;

    fn get_item(&self, id: Uuid) -> impl Future<Output = AppResult<Option<StockItem>>> + Send;

    fn list_items(&self) -> impl Future<Output = AppResult<Vec<StockItem>>> + Send;

    /// Rename item codes as one unit, refusing any code that would collide
    fn rename_codes(
        &self,
        renames: Vec<(Uuid, String)>,
    ) -> impl Future<Output = AppResult<()>> + Send;

    /// Insert or update a project's financial facet
    fn save_project(
        &self,
        project: ProjectFinancials,
    ) -> impl Future<Output = AppResult<ProjectFinancials>> + Send;

    fn get_project(
        &self,
        id: Uuid,
    ) -> impl Future<Output = AppResult<Option<ProjectFinancials>>> + Send;

    /// An item with its ledger entries in recorded (chronological) order,
    /// both read from one snapshot
    fn item_with_ledger(
        &self,
        item_id: Uuid,
    ) -> impl Future<Output = AppResult<Option<ItemLedger>>> + Send;

    /// Every item and every ledger entry in recorded order, read from one snapshot
    fn ledger_snapshot(&self) -> impl Future<Output = AppResult<LedgerSnapshot>> + Send;

    fn get_usage(
        &self,
        id: Uuid,
    ) -> impl Future<Output = AppResult<Option<ProjectStockUsage>>> + Send;

    /// Usage records for a project in recorded order
    fn usages_for_project(
        &self,
        project_id: Uuid,
    ) -> impl Future<Output = AppResult<Vec<ProjectStockUsage>>> + Send;

    /// Allocation records for a project in recorded order
    fn allocations_for_project(
        &self,
        project_id: Uuid,
    ) -> impl Future<Output = AppResult<Vec<ProjectStockAllocation>>> + Send;

    /// Run `plan` against a locked snapshot and write its result atomically.
    ///
    /// Fails with `NotFound` when the item (or requested project) is absent and
    /// with `Busy` when a lock cannot be taken within the configured timeout.
    fn transact<F>(
        &self,
        item_id: Uuid,
        project_id: Option<Uuid>,
        plan: F,
    ) -> impl Future<Output = AppResult<StockChange>> + Send
    where
        F: FnOnce(StockSnapshot) -> AppResult<StockChange> + Send;
}

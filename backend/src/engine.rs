//! The stock engine: one handle over every service, sharing one store

use chrono::NaiveDate;
use rust_decimal::Decimal;
use shared::{
    CategoryValue, CodeProposal, DuplicateGroup, LedgerAudit, LedgerEntry, LedgerFilter,
    LedgerMovement, NewStockItem, ProjectFinancials, ProjectStockAllocation, ProjectStockSummary,
    ProjectStockUsage, StockItem, UpdateStockItem,
};
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::Config;
use crate::error::AppResult;
use crate::services::{
    AllocationService, IntegrityService, LedgerService, ProjectCostReport, ProjectService,
    StockItemService, TransactionProcessor,
};
use crate::store::{MemoryStore, PgStore, StockStore};

/// Entry point for callers of the stock ledger
#[derive(Clone)]
pub struct StockEngine<S> {
    pub items: StockItemService<S>,
    pub ledger: LedgerService<S>,
    pub transactions: TransactionProcessor<S>,
    pub allocations: AllocationService<S>,
    pub integrity: IntegrityService<S>,
    pub projects: ProjectService<S>,
}

impl StockEngine<MemoryStore> {
    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new())
    }
}

impl StockEngine<PgStore> {
    pub fn postgres(pool: PgPool, config: &Config) -> Self {
        Self::new(PgStore::new(pool, config.ledger.lock_timeout()))
    }
}

impl<S: StockStore> StockEngine<S> {
    pub fn new(store: S) -> Self {
        Self {
            items: StockItemService::new(store.clone()),
            ledger: LedgerService::new(store.clone()),
            transactions: TransactionProcessor::new(store.clone()),
            allocations: AllocationService::new(store.clone()),
            integrity: IntegrityService::new(store.clone()),
            projects: ProjectService::new(store),
        }
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    pub async fn issue(
        &self,
        project_id: Uuid,
        item_id: Uuid,
        quantity: i64,
        actor: &str,
    ) -> AppResult<ProjectStockUsage> {
        self.transactions
            .issue(project_id, item_id, quantity, actor)
            .await
    }

    pub async fn return_stock(
        &self,
        project_id: Uuid,
        item_id: Uuid,
        quantity: i64,
        original_unit_cost: Decimal,
        actor: &str,
    ) -> AppResult<ProjectStockUsage> {
        self.transactions
            .return_stock(project_id, item_id, quantity, original_unit_cost, actor)
            .await
    }

    pub async fn return_usage(
        &self,
        usage_id: Uuid,
        quantity: i64,
        actor: &str,
    ) -> AppResult<ProjectStockUsage> {
        self.transactions
            .return_usage(usage_id, quantity, actor)
            .await
    }

    pub async fn allocate(
        &self,
        project_id: Uuid,
        item_id: Uuid,
        quantity: i64,
        reference: Option<String>,
    ) -> AppResult<ProjectStockAllocation> {
        self.allocations
            .allocate(project_id, item_id, quantity, reference)
            .await
    }

    // ========================================================================
    // Items and ledger
    // ========================================================================

    pub async fn create_item(&self, input: NewStockItem) -> AppResult<StockItem> {
        self.items.create_item(input).await
    }

    pub async fn update_item(&self, id: Uuid, input: UpdateStockItem) -> AppResult<StockItem> {
        self.items.update_item(id, input).await
    }

    pub async fn get_item(&self, id: Uuid) -> AppResult<StockItem> {
        self.items.get_item(id).await
    }

    pub async fn list_items(&self, category: Option<&str>) -> AppResult<Vec<StockItem>> {
        self.items.list_items(category).await
    }

    pub async fn category_values(&self) -> AppResult<Vec<CategoryValue>> {
        self.items.category_values().await
    }

    /// Ledger for one item between two dates (inclusive), most recent first
    pub async fn get_ledger(
        &self,
        item_id: Uuid,
        date_from: Option<NaiveDate>,
        date_to: Option<NaiveDate>,
    ) -> AppResult<Vec<LedgerEntry>> {
        self.ledger
            .history(item_id, &LedgerFilter::between(date_from, date_to))
            .await
    }

    pub async fn movements(
        &self,
        item_code: Option<&str>,
        filter: &LedgerFilter,
    ) -> AppResult<Vec<LedgerMovement>> {
        self.ledger.movements(item_code, filter).await
    }

    pub async fn receive(
        &self,
        item_id: Uuid,
        quantity: i64,
        unit_cost: Decimal,
        reference: Option<String>,
    ) -> AppResult<LedgerEntry> {
        self.ledger.receive(item_id, quantity, unit_cost, reference).await
    }

    pub async fn verify(&self, item_id: Uuid) -> AppResult<LedgerAudit> {
        self.ledger.verify(item_id).await
    }

    // ========================================================================
    // Integrity
    // ========================================================================

    pub async fn find_duplicate_codes(&self) -> AppResult<Vec<DuplicateGroup>> {
        self.integrity.find_duplicate_codes().await
    }

    pub async fn propose_code(&self, group: &DuplicateGroup) -> AppResult<Vec<CodeProposal>> {
        self.integrity.propose_code(group).await
    }

    pub async fn apply_rename(&self, item_id: Uuid, code: &str) -> AppResult<()> {
        self.integrity.apply_rename(item_id, code).await
    }

    // ========================================================================
    // Projects
    // ========================================================================

    pub async fn save_project(&self, project: ProjectFinancials) -> AppResult<ProjectFinancials> {
        self.projects.save_project(project).await
    }

    pub async fn get_project(&self, id: Uuid) -> AppResult<ProjectFinancials> {
        self.projects.get_project(id).await
    }

    pub async fn project_stock_summary(
        &self,
        project_id: Uuid,
    ) -> AppResult<Vec<ProjectStockSummary>> {
        self.projects.project_stock_summary(project_id).await
    }

    pub async fn cost_report(&self, project_id: Uuid) -> AppResult<ProjectCostReport> {
        self.projects.cost_report(project_id).await
    }
}

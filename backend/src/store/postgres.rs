//! PostgreSQL-backed store
//!
//! One database transaction per operation. Row locks are taken with
//! `SELECT ... FOR UPDATE`, item first then project, under a transaction-local
//! `lock_timeout` so contention surfaces as `Busy` rather than a hang.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use shared::{
    LedgerEntry, MovementDirection, ProjectFinancials, ProjectStockAllocation, ProjectStockUsage,
    StockItem,
};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{ItemLedger, LedgerSnapshot, StockChange, StockSnapshot, StockStore};
use crate::error::{AppError, AppResult};

const ITEM_COLUMNS: &str = "id, item_code, description, unit, quantity, min_level, max_level, \
                            category, average_unit_cost, created_at, updated_at";

const LEDGER_COLUMNS: &str =
    "id, stock_item_id, direction, quantity, occurred_at, reference, notes, running_balance";

const USAGE_COLUMNS: &str =
    "id, project_id, stock_item_id, quantity, unit_cost, issued_on, issued_by, notes";

const ALLOCATION_COLUMNS: &str =
    "id, project_id, stock_item_id, quantity, unit_cost, allocated_on, reference";

const PROJECT_COLUMNS: &str =
    "id, project_number, name, budget, actual_cost, committed_cost, last_modified_on";

/// Store persisting to PostgreSQL
#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
    lock_timeout: Duration,
}

#[derive(Debug, FromRow)]
struct StockItemRow {
    id: Uuid,
    item_code: String,
    description: String,
    unit: String,
    quantity: i64,
    min_level: Option<i64>,
    max_level: Option<i64>,
    category: String,
    average_unit_cost: Decimal,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<StockItemRow> for StockItem {
    fn from(row: StockItemRow) -> Self {
        StockItem {
            id: row.id,
            item_code: row.item_code,
            description: row.description,
            unit: row.unit,
            quantity: row.quantity,
            min_level: row.min_level,
            max_level: row.max_level,
            category: row.category,
            average_unit_cost: row.average_unit_cost,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct LedgerRow {
    id: Uuid,
    stock_item_id: Uuid,
    direction: String,
    quantity: i64,
    occurred_at: DateTime<Utc>,
    reference: Option<String>,
    notes: Option<String>,
    running_balance: i64,
}

impl TryFrom<LedgerRow> for LedgerEntry {
    type Error = AppError;

    fn try_from(row: LedgerRow) -> Result<Self, Self::Error> {
        let direction: MovementDirection = row
            .direction
            .parse()
            .map_err(AppError::InvariantViolation)?;

        Ok(LedgerEntry {
            id: row.id,
            stock_item_id: row.stock_item_id,
            direction,
            quantity: row.quantity,
            occurred_at: row.occurred_at,
            reference: row.reference,
            notes: row.notes,
            running_balance: row.running_balance,
        })
    }
}

#[derive(Debug, FromRow)]
struct UsageRow {
    id: Uuid,
    project_id: Uuid,
    stock_item_id: Uuid,
    quantity: i64,
    unit_cost: Decimal,
    issued_on: DateTime<Utc>,
    issued_by: String,
    notes: Option<String>,
}

impl From<UsageRow> for ProjectStockUsage {
    fn from(row: UsageRow) -> Self {
        ProjectStockUsage {
            id: row.id,
            project_id: row.project_id,
            stock_item_id: row.stock_item_id,
            quantity: row.quantity,
            unit_cost: row.unit_cost,
            issued_on: row.issued_on,
            issued_by: row.issued_by,
            notes: row.notes,
        }
    }
}

#[derive(Debug, FromRow)]
struct AllocationRow {
    id: Uuid,
    project_id: Uuid,
    stock_item_id: Uuid,
    quantity: i64,
    unit_cost: Decimal,
    allocated_on: DateTime<Utc>,
    reference: Option<String>,
}

impl From<AllocationRow> for ProjectStockAllocation {
    fn from(row: AllocationRow) -> Self {
        ProjectStockAllocation {
            id: row.id,
            project_id: row.project_id,
            stock_item_id: row.stock_item_id,
            quantity: row.quantity,
            unit_cost: row.unit_cost,
            allocated_on: row.allocated_on,
            reference: row.reference,
        }
    }
}

#[derive(Debug, FromRow)]
struct ProjectRow {
    id: Uuid,
    project_number: String,
    name: String,
    budget: Decimal,
    actual_cost: Decimal,
    committed_cost: Decimal,
    last_modified_on: Option<DateTime<Utc>>,
}

impl From<ProjectRow> for ProjectFinancials {
    fn from(row: ProjectRow) -> Self {
        ProjectFinancials {
            id: row.id,
            project_number: row.project_number,
            name: row.name,
            budget: row.budget,
            actual_cost: row.actual_cost,
            committed_cost: row.committed_cost,
            last_modified_on: row.last_modified_on,
        }
    }
}

impl PgStore {
    pub fn new(db: PgPool, lock_timeout: Duration) -> Self {
        Self { db, lock_timeout }
    }

    pub fn pool(&self) -> &PgPool {
        &self.db
    }

    async fn begin_locked(&self) -> AppResult<Transaction<'static, Postgres>> {
        let mut tx = self.db.begin().await?;

        // SET does not accept bind parameters
        sqlx::query(&format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.lock_timeout.as_millis()
        ))
        .execute(&mut *tx)
        .await?;

        Ok(tx)
    }

    /// Read-only transaction whose queries all see one snapshot
    async fn begin_snapshot(&self) -> AppResult<Transaction<'static, Postgres>> {
        let mut tx = self.db.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }

    async fn lock_item(tx: &mut Transaction<'static, Postgres>, id: Uuid) -> AppResult<StockItem> {
        let row = sqlx::query_as::<_, StockItemRow>(&format!(
            "SELECT {} FROM stock_items WHERE id = $1 FOR UPDATE",
            ITEM_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Stock item {}", id)))?;

        Ok(row.into())
    }

    async fn lock_project(
        tx: &mut Transaction<'static, Postgres>,
        id: Uuid,
    ) -> AppResult<ProjectFinancials> {
        let row = sqlx::query_as::<_, ProjectRow>(&format!(
            "SELECT {} FROM projects WHERE id = $1 FOR UPDATE",
            PROJECT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Project {}", id)))?;

        Ok(row.into())
    }

    async fn insert_ledger_entry(
        tx: &mut Transaction<'static, Postgres>,
        entry: &LedgerEntry,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO stock_ledger (
                id, stock_item_id, direction, quantity, occurred_at, reference, notes, running_balance
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.id)
        .bind(entry.stock_item_id)
        .bind(entry.direction.as_str())
        .bind(entry.quantity)
        .bind(entry.occurred_at)
        .bind(&entry.reference)
        .bind(&entry.notes)
        .bind(entry.running_balance)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    async fn write_change(
        tx: &mut Transaction<'static, Postgres>,
        change: &StockChange,
    ) -> AppResult<()> {
        let item = &change.item;

        // item_code is owned by rename_codes and never written here
        sqlx::query(
            r#"
            UPDATE stock_items
            SET description = $2, unit = $3, quantity = $4, min_level = $5, max_level = $6,
                category = $7, average_unit_cost = $8, updated_at = $9
            WHERE id = $1
            "#,
        )
        .bind(item.id)
        .bind(&item.description)
        .bind(&item.unit)
        .bind(item.quantity)
        .bind(item.min_level)
        .bind(item.max_level)
        .bind(&item.category)
        .bind(item.average_unit_cost)
        .bind(item.updated_at)
        .execute(&mut **tx)
        .await?;

        if let Some(entry) = &change.ledger_entry {
            Self::insert_ledger_entry(tx, entry).await?;
        }

        if let Some(usage) = &change.usage {
            sqlx::query(
                r#"
                INSERT INTO project_stock_usages (
                    id, project_id, stock_item_id, quantity, unit_cost, issued_on, issued_by, notes
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(usage.id)
            .bind(usage.project_id)
            .bind(usage.stock_item_id)
            .bind(usage.quantity)
            .bind(usage.unit_cost)
            .bind(usage.issued_on)
            .bind(&usage.issued_by)
            .bind(&usage.notes)
            .execute(&mut **tx)
            .await?;
        }

        if let Some(allocation) = &change.allocation {
            sqlx::query(
                r#"
                INSERT INTO project_stock_allocations (
                    id, project_id, stock_item_id, quantity, unit_cost, allocated_on, reference
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(allocation.id)
            .bind(allocation.project_id)
            .bind(allocation.stock_item_id)
            .bind(allocation.quantity)
            .bind(allocation.unit_cost)
            .bind(allocation.allocated_on)
            .bind(&allocation.reference)
            .execute(&mut **tx)
            .await?;
        }

        if let Some(project) = &change.project {
            sqlx::query(
                r#"
                UPDATE projects
                SET actual_cost = $2, committed_cost = $3, last_modified_on = $4
                WHERE id = $1
                "#,
            )
            .bind(project.id)
            .bind(project.actual_cost)
            .bind(project.committed_cost)
            .bind(project.last_modified_on)
            .execute(&mut **tx)
            .await?;
        }

        Ok(())
    }
}

impl StockStore for PgStore {
    async fn create_item(&self, item: StockItem, opening: Option<LedgerEntry>) -> AppResult<StockItem> {
        let mut tx = self.db.begin().await?;

        let row = sqlx::query_as::<_, StockItemRow>(&format!(
            r#"
            INSERT INTO stock_items (
                id, item_code, description, unit, quantity, min_level, max_level,
                category, average_unit_cost, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {}
            "#,
            ITEM_COLUMNS
        ))
        .bind(item.id)
        .bind(&item.item_code)
        .bind(&item.description)
        .bind(&item.unit)
        .bind(item.quantity)
        .bind(item.min_level)
        .bind(item.max_level)
        .bind(&item.category)
        .bind(item.average_unit_cost)
        .bind(item.created_at)
        .bind(item.updated_at)
        .fetch_one(&mut *tx)
        .await?;

        if let Some(entry) = &opening {
            Self::insert_ledger_entry(&mut tx, entry).await?;
        }

        tx.commit().await?;
        Ok(row.into())
    }

    async fn get_item(&self, id: Uuid) -> AppResult<Option<StockItem>> {
        let row = sqlx::query_as::<_, StockItemRow>(&format!(
            "SELECT {} FROM stock_items WHERE id = $1",
            ITEM_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn list_items(&self) -> AppResult<Vec<StockItem>> {
        let rows = sqlx::query_as::<_, StockItemRow>(&format!(
            "SELECT {} FROM stock_items ORDER BY item_code, created_at",
            ITEM_COLUMNS
        ))
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn rename_codes(&self, renames: Vec<(Uuid, String)>) -> AppResult<()> {
        let mut tx = self.begin_locked().await?;

        let ids: Vec<Uuid> = renames.iter().map(|(id, _)| *id).collect();
        let locked: Vec<Uuid> = sqlx::query_scalar(
            "SELECT id FROM stock_items WHERE id = ANY($1) ORDER BY id FOR UPDATE",
        )
        .bind(&ids)
        .fetch_all(&mut *tx)
        .await?;

        for (id, code) in &renames {
            if !locked.contains(id) {
                return Err(AppError::NotFound(format!("Stock item {}", id)));
            }
            shared::validate_item_code(code).map_err(|msg| AppError::Validation {
                field: "item_code".to_string(),
                message: msg.to_string(),
            })?;

            let code = code.trim();
            let taken = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(SELECT 1 FROM stock_items WHERE LOWER(item_code) = LOWER($1) AND id <> $2)",
            )
            .bind(code)
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;

            if taken {
                return Err(AppError::DuplicateEntry(code.to_string()));
            }

            sqlx::query("UPDATE stock_items SET item_code = $2, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .bind(code)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn save_project(&self, project: ProjectFinancials) -> AppResult<ProjectFinancials> {
        let mut tx = self.begin_locked().await?;

        let row = sqlx::query_as::<_, ProjectRow>(&format!(
            r#"
            INSERT INTO projects (
                id, project_number, name, budget, actual_cost, committed_cost, last_modified_on
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE
            SET project_number = EXCLUDED.project_number,
                name = EXCLUDED.name,
                budget = EXCLUDED.budget,
                actual_cost = EXCLUDED.actual_cost,
                committed_cost = EXCLUDED.committed_cost,
                last_modified_on = EXCLUDED.last_modified_on
            RETURNING {}
            "#,
            PROJECT_COLUMNS
        ))
        .bind(project.id)
        .bind(&project.project_number)
        .bind(&project.name)
        .bind(project.budget)
        .bind(project.actual_cost)
        .bind(project.committed_cost)
        .bind(project.last_modified_on)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row.into())
    }

    async fn get_project(&self, id: Uuid) -> AppResult<Option<ProjectFinancials>> {
        let row = sqlx::query_as::<_, ProjectRow>(&format!(
            "SELECT {} FROM projects WHERE id = $1",
            PROJECT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn item_with_ledger(&self, item_id: Uuid) -> AppResult<Option<ItemLedger>> {
        let mut tx = self.begin_snapshot().await?;

        let item = sqlx::query_as::<_, StockItemRow>(&format!(
            "SELECT {} FROM stock_items WHERE id = $1",
            ITEM_COLUMNS
        ))
        .bind(item_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(item) = item else {
            tx.commit().await?;
            return Ok(None);
        };

        let rows = sqlx::query_as::<_, LedgerRow>(&format!(
            "SELECT {} FROM stock_ledger WHERE stock_item_id = $1 ORDER BY occurred_at, seq",
            LEDGER_COLUMNS
        ))
        .bind(item_id)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(Some(ItemLedger {
            item: item.into(),
            entries: rows
                .into_iter()
                .map(LedgerEntry::try_from)
                .collect::<AppResult<_>>()?,
        }))
    }

    async fn ledger_snapshot(&self) -> AppResult<LedgerSnapshot> {
        let mut tx = self.begin_snapshot().await?;

        let items = sqlx::query_as::<_, StockItemRow>(&format!(
            "SELECT {} FROM stock_items ORDER BY item_code, created_at",
            ITEM_COLUMNS
        ))
        .fetch_all(&mut *tx)
        .await?;

        let rows = sqlx::query_as::<_, LedgerRow>(&format!(
            "SELECT {} FROM stock_ledger ORDER BY occurred_at, seq",
            LEDGER_COLUMNS
        ))
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(LedgerSnapshot {
            items: items.into_iter().map(Into::into).collect(),
            entries: rows
                .into_iter()
                .map(LedgerEntry::try_from)
                .collect::<AppResult<_>>()?,
        })
    }

    async fn get_usage(&self, id: Uuid) -> AppResult<Option<ProjectStockUsage>> {
        let row = sqlx::query_as::<_, UsageRow>(&format!(
            "SELECT {} FROM project_stock_usages WHERE id = $1",
            USAGE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn usages_for_project(&self, project_id: Uuid) -> AppResult<Vec<ProjectStockUsage>> {
        let rows = sqlx::query_as::<_, UsageRow>(&format!(
            "SELECT {} FROM project_stock_usages WHERE project_id = $1 ORDER BY issued_on, seq",
            USAGE_COLUMNS
        ))
        .bind(project_id)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn allocations_for_project(
        &self,
        project_id: Uuid,
    ) -> AppResult<Vec<ProjectStockAllocation>> {
        let rows = sqlx::query_as::<_, AllocationRow>(&format!(
            "SELECT {} FROM project_stock_allocations WHERE project_id = $1 ORDER BY allocated_on, seq",
            ALLOCATION_COLUMNS
        ))
        .bind(project_id)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn transact<F>(
        &self,
        item_id: Uuid,
        project_id: Option<Uuid>,
        plan: F,
    ) -> AppResult<StockChange>
    where
        F: FnOnce(StockSnapshot) -> AppResult<StockChange> + Send,
    {
        let mut tx = self.begin_locked().await?;

        let item = Self::lock_item(&mut tx, item_id).await?;
        let (project, net_issued) = match project_id {
            Some(id) => {
                let project = Self::lock_project(&mut tx, id).await?;
                let net_issued = sqlx::query_scalar::<_, i64>(
                    r#"
                    SELECT COALESCE(SUM(quantity), 0)::BIGINT
                    FROM project_stock_usages
                    WHERE project_id = $1 AND stock_item_id = $2
                    "#,
                )
                .bind(id)
                .bind(item_id)
                .fetch_one(&mut *tx)
                .await?;
                (Some(project), net_issued)
            }
            None => (None, 0),
        };

        let change = plan(StockSnapshot {
            item,
            project,
            net_issued,
        })?;
        change.verify(item_id, project_id)?;

        Self::write_change(&mut tx, &change).await?;
        tx.commit().await?;

        Ok(change)
    }
}

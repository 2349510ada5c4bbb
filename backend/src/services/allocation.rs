//! Allocation service: reserving stock against a project's committed cost

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use shared::{add_cost, LedgerEntry, MovementDirection, ProjectStockAllocation};
use tracing::instrument;
use uuid::Uuid;

use super::require_positive;
use crate::error::{AppError, AppResult};
use crate::store::{StockChange, StockSnapshot, StockStore};

/// Allocation service for project stock reservations
#[derive(Clone)]
pub struct AllocationService<S> {
    store: S,
}

/// Plan an allocation against a locked snapshot
pub fn plan_allocation(
    snapshot: StockSnapshot,
    quantity: i64,
    reference: Option<String>,
    at: DateTime<Utc>,
) -> AppResult<StockChange> {
    let mut item = snapshot.item;
    let mut project = snapshot
        .project
        .ok_or_else(|| AppError::Internal("project was not locked for this change".to_string()))?;

    if quantity > item.quantity {
        return Err(AppError::InsufficientStock {
            item_code: item.item_code,
            available: item.quantity,
            requested: quantity,
        });
    }

    let unit_cost = item.average_unit_cost;
    let entry = LedgerEntry::record(
        &mut item,
        MovementDirection::Out,
        quantity,
        Some(
            reference
                .clone()
                .unwrap_or_else(|| project.project_number.clone()),
        ),
        Some(format!("Allocated to {}", project.project_number)),
        at,
    )?;

    let allocation = ProjectStockAllocation {
        id: Uuid::new_v4(),
        project_id: project.id,
        stock_item_id: item.id,
        quantity,
        unit_cost,
        allocated_on: at,
        reference,
    };
    project.apply_commitment(allocation.total_cost()?, at)?;

    Ok(StockChange::new(item)
        .with_ledger_entry(entry)
        .with_allocation(allocation)
        .with_project(project))
}

impl<S: StockStore> AllocationService<S> {
    /// Create a new AllocationService instance
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Reserve stock for a project at the item's current average cost
    #[instrument(skip(self))]
    pub async fn allocate(
        &self,
        project_id: Uuid,
        item_id: Uuid,
        quantity: i64,
        reference: Option<String>,
    ) -> AppResult<ProjectStockAllocation> {
        require_positive(quantity)?;

        let change = self
            .store
            .transact(item_id, Some(project_id), move |snapshot| {
                plan_allocation(snapshot, quantity, reference, Utc::now())
            })
            .await
            .map_err(|err| {
                tracing::warn!(
                    project_id = %project_id,
                    item_id = %item_id,
                    quantity,
                    error = %err,
                    "Allocation rejected"
                );
                err
            })?;

        let allocation = change
            .allocation
            .ok_or_else(|| AppError::Internal("stock change recorded no allocation".to_string()))?;
        tracing::info!(
            project_id = %project_id,
            item_id = %item_id,
            quantity,
            unit_cost = %allocation.unit_cost,
            "Stock allocated to project"
        );
        Ok(allocation)
    }

    /// Allocations for a project, most recent first
    pub async fn allocations(&self, project_id: Uuid) -> AppResult<Vec<ProjectStockAllocation>> {
        let mut allocations = self.store.allocations_for_project(project_id).await?;
        allocations.sort_by_key(|a| a.allocated_on);
        allocations.reverse();
        Ok(allocations)
    }

    /// Total committed cost recorded by allocations for a project
    pub async fn committed_total(&self, project_id: Uuid) -> AppResult<Decimal> {
        let allocations = self.store.allocations_for_project(project_id).await?;
        allocations
            .iter()
            .try_fold(Decimal::ZERO, |total, a| add_cost(total, a.total_cost()?))
            .map_err(|err| AppError::InvariantViolation(err.to_string()))
    }
}

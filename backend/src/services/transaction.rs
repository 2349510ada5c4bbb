//! Issue/return transaction processor
//!
//! Issuing stock to a project and returning it are each one atomic unit: the
//! availability check, the ledger entry, the item quantity, the usage record
//! and the project's actual cost are planned together against a locked
//! snapshot and committed together, or not at all.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use shared::{
    extended_cost, validate_actor, validate_unit_cost, LedgerEntry, MovementDirection,
    ProjectFinancials, ProjectStockUsage,
};
use tracing::instrument;
use uuid::Uuid;

use super::require_positive;
use crate::error::{AppError, AppResult};
use crate::store::{StockChange, StockSnapshot, StockStore};

/// Processor for project issues and returns
#[derive(Clone)]
pub struct TransactionProcessor<S> {
    store: S,
}

/// Plan an issue of `quantity` units against a locked snapshot.
///
/// The usage record captures the item's average unit cost as of now; the
/// project's actual cost grows by `quantity × that cost`.
pub fn plan_issue(
    snapshot: StockSnapshot,
    quantity: i64,
    actor: &str,
    at: DateTime<Utc>,
) -> AppResult<StockChange> {
    let mut item = snapshot.item;
    let mut project = locked_project(snapshot.project)?;

    if quantity > item.quantity {
        return Err(AppError::InsufficientStock {
            item_code: item.item_code,
            available: item.quantity,
            requested: quantity,
        });
    }

    let unit_cost = item.average_unit_cost;
    let notes = item.description.clone();
    let entry = LedgerEntry::record(
        &mut item,
        MovementDirection::Out,
        quantity,
        Some(project.project_number.clone()),
        Some(notes),
        at,
    )?;

    let usage = ProjectStockUsage {
        id: Uuid::new_v4(),
        project_id: project.id,
        stock_item_id: item.id,
        quantity,
        unit_cost,
        issued_on: at,
        issued_by: actor.trim().to_string(),
        notes: None,
    };
    project.apply_issue_cost(usage.line_cost()?, at)?;

    Ok(StockChange::new(item)
        .with_ledger_entry(entry)
        .with_usage(usage)
        .with_project(project))
}

/// Plan a return of `quantity` units at the cost captured when they were issued.
///
/// The project's actual cost drops by exactly `quantity × unit_cost`, floored
/// at zero.
pub fn plan_return(
    snapshot: StockSnapshot,
    quantity: i64,
    unit_cost: Decimal,
    actor: &str,
    at: DateTime<Utc>,
) -> AppResult<StockChange> {
    let mut item = snapshot.item;
    let mut project = locked_project(snapshot.project)?;

    let notes = format!("Return: {}", item.description);
    let entry = LedgerEntry::record(
        &mut item,
        MovementDirection::In,
        quantity,
        Some(project.project_number.clone()),
        Some(notes),
        at,
    )?;

    let usage = ProjectStockUsage {
        id: Uuid::new_v4(),
        project_id: project.id,
        stock_item_id: item.id,
        quantity: -quantity,
        unit_cost,
        issued_on: at,
        issued_by: actor.trim().to_string(),
        notes: Some("Return".to_string()),
    };
    project.apply_return_cost(extended_cost(quantity, unit_cost)?, at)?;

    Ok(StockChange::new(item)
        .with_ledger_entry(entry)
        .with_usage(usage)
        .with_project(project))
}

fn locked_project(project: Option<ProjectFinancials>) -> AppResult<ProjectFinancials> {
    project.ok_or_else(|| AppError::Internal("project was not locked for this change".to_string()))
}

fn recorded_usage(change: StockChange) -> AppResult<ProjectStockUsage> {
    change
        .usage
        .ok_or_else(|| AppError::Internal("stock change recorded no usage".to_string()))
}

fn check_actor(actor: &str) -> AppResult<()> {
    validate_actor(actor).map_err(|m| AppError::validation("actor", m))
}

impl<S: StockStore> TransactionProcessor<S> {
    /// Create a new TransactionProcessor instance
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Issue stock to a project, charging its actual cost
    #[instrument(skip(self))]
    pub async fn issue(
        &self,
        project_id: Uuid,
        item_id: Uuid,
        quantity: i64,
        actor: &str,
    ) -> AppResult<ProjectStockUsage> {
        require_positive(quantity)?;
        check_actor(actor)?;

        let change = self
            .store
            .transact(item_id, Some(project_id), |snapshot| {
                plan_issue(snapshot, quantity, actor, Utc::now())
            })
            .await
            .map_err(|err| {
                tracing::warn!(
                    project_id = %project_id,
                    item_id = %item_id,
                    quantity,
                    error = %err,
                    "Issue rejected"
                );
                err
            })?;

        let usage = recorded_usage(change)?;
        tracing::info!(
            project_id = %project_id,
            item_id = %item_id,
            quantity,
            unit_cost = %usage.unit_cost,
            "Stock issued to project"
        );
        Ok(usage)
    }

    /// Return stock at a caller-supplied original unit cost.
    ///
    /// The caller must pass the cost captured on the original issue; use
    /// [`TransactionProcessor::return_usage`] to have it looked up instead.
    #[instrument(skip(self))]
    pub async fn return_stock(
        &self,
        project_id: Uuid,
        item_id: Uuid,
        quantity: i64,
        original_unit_cost: Decimal,
        actor: &str,
    ) -> AppResult<ProjectStockUsage> {
        require_positive(quantity)?;
        check_actor(actor)?;
        validate_unit_cost(original_unit_cost)
            .map_err(|m| AppError::validation("original_unit_cost", m))?;

        let change = self
            .store
            .transact(item_id, Some(project_id), |snapshot| {
                plan_return(snapshot, quantity, original_unit_cost, actor, Utc::now())
            })
            .await?;

        let usage = recorded_usage(change)?;
        tracing::info!(
            project_id = %project_id,
            item_id = %item_id,
            quantity,
            unit_cost = %original_unit_cost,
            "Stock returned from project"
        );
        Ok(usage)
    }

    /// Return stock against a recorded issue, reversing at that issue's cost.
    ///
    /// Refuses to return more than the project still holds of the item.
    #[instrument(skip(self))]
    pub async fn return_usage(
        &self,
        usage_id: Uuid,
        quantity: i64,
        actor: &str,
    ) -> AppResult<ProjectStockUsage> {
        require_positive(quantity)?;
        check_actor(actor)?;

        let original = self
            .store
            .get_usage(usage_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Usage record {}", usage_id)))?;
        if original.is_return() {
            return Err(AppError::validation(
                "usage_id",
                "Usage record is a return, not an issue",
            ));
        }

        let unit_cost = original.unit_cost;
        let change = self
            .store
            .transact(original.stock_item_id, Some(original.project_id), |snapshot| {
                if quantity > snapshot.net_issued {
                    return Err(AppError::ReturnExceedsIssued {
                        issued: snapshot.net_issued.max(0),
                        requested: quantity,
                    });
                }
                plan_return(snapshot, quantity, unit_cost, actor, Utc::now())
            })
            .await?;

        let usage = recorded_usage(change)?;
        tracing::info!(
            usage_id = %usage_id,
            project_id = %original.project_id,
            quantity,
            unit_cost = %unit_cost,
            "Stock returned against issue"
        );
        Ok(usage)
    }

    /// Usage records for a project, most recent first
    pub async fn usage_history(&self, project_id: Uuid) -> AppResult<Vec<ProjectStockUsage>> {
        let mut usages = self.store.usages_for_project(project_id).await?;
        usages.sort_by_key(|u| u.issued_on);
        usages.reverse();
        Ok(usages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::StockItem;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn snapshot(quantity: i64, cost: &str) -> StockSnapshot {
        let now = Utc::now();
        StockSnapshot {
            item: StockItem {
                id: Uuid::new_v4(),
                item_code: "100".to_string(),
                description: "Filler wire".to_string(),
                unit: "kg".to_string(),
                quantity,
                min_level: None,
                max_level: None,
                category: shared::DEFAULT_CATEGORY.to_string(),
                average_unit_cost: dec(cost),
                created_at: now,
                updated_at: now,
            },
            project: Some(ProjectFinancials::new("P-001", "Pipe rack", dec("1000"))),
            net_issued: 0,
        }
    }

    #[test]
    fn test_plan_issue_snapshots_cost() {
        let change = plan_issue(snapshot(10, "5.00"), 3, "alice", Utc::now()).unwrap();

        assert_eq!(change.item.quantity, 7);
        let usage = change.usage.unwrap();
        assert_eq!(usage.unit_cost, dec("5.00"));
        assert_eq!(usage.quantity, 3);
        assert_eq!(change.project.unwrap().actual_cost, dec("15.00"));
        let entry = change.ledger_entry.unwrap();
        assert_eq!(entry.direction, MovementDirection::Out);
        assert_eq!(entry.reference.as_deref(), Some("P-001"));
        assert_eq!(entry.running_balance, 7);
    }

    #[test]
    fn test_plan_issue_insufficient() {
        let err = plan_issue(snapshot(2, "5.00"), 3, "alice", Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            AppError::InsufficientStock {
                available: 2,
                requested: 3,
                ..
            }
        ));
    }

    #[test]
    fn test_plan_return_clamps_cost() {
        let change = plan_return(snapshot(0, "8.00"), 3, dec("5.00"), "bob", Utc::now()).unwrap();

        assert_eq!(change.item.quantity, 3);
        assert_eq!(change.usage.unwrap().quantity, -3);
        assert_eq!(change.project.unwrap().actual_cost, Decimal::ZERO);
    }

    #[test]
    fn test_plan_return_out_of_range_cost_is_rejected() {
        let err = plan_return(
            snapshot(0, "8.00"),
            i64::MAX,
            dec("100000000000"),
            "bob",
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidQuantity(_)));
    }

    #[test]
    fn test_plan_without_project_is_internal() {
        let mut snap = snapshot(5, "1.00");
        snap.project = None;
        assert!(matches!(
            plan_issue(snap, 1, "alice", Utc::now()),
            Err(AppError::Internal(_))
        ));
    }
}

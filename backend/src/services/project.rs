//! Project finance: the cost facet of a project and its stock reports

use rust_decimal::Decimal;
use serde::Serialize;
use shared::{summarize_usage, usage_cost, ProjectFinancials, ProjectStockSummary};
use tracing::instrument;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::store::StockStore;

/// Project finance service
#[derive(Clone)]
pub struct ProjectService<S> {
    store: S,
}

/// Budget position of a project
#[derive(Debug, Clone, Serialize)]
pub struct ProjectCostReport {
    pub project_id: Uuid,
    pub project_number: String,
    pub budget: Decimal,
    pub actual_cost: Decimal,
    pub committed_cost: Decimal,
    pub variance: Decimal,
    pub margin_percent: Decimal,
    pub over_budget: bool,
    /// Net cost of stock issued to the project, from its usage records
    pub stock_cost: Decimal,
}

impl<S: StockStore> ProjectService<S> {
    /// Create a new ProjectService instance
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Insert or update the financial facet of a project
    #[instrument(skip(self, project), fields(project_id = %project.id))]
    pub async fn save_project(&self, project: ProjectFinancials) -> AppResult<ProjectFinancials> {
        if project.project_number.trim().is_empty() {
            return Err(AppError::validation(
                "project_number",
                "Project number is required",
            ));
        }
        if project.budget < Decimal::ZERO {
            return Err(AppError::validation("budget", "Budget cannot be negative"));
        }
        if project.actual_cost < Decimal::ZERO {
            return Err(AppError::validation(
                "actual_cost",
                "Actual cost cannot be negative",
            ));
        }

        let project = self.store.save_project(project).await?;
        tracing::info!(project_number = %project.project_number, "Project saved");
        Ok(project)
    }

    pub async fn get_project(&self, id: Uuid) -> AppResult<ProjectFinancials> {
        self.store
            .get_project(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Project {}", id)))
    }

    /// Issued, returned and net quantities per item for a project
    pub async fn project_stock_summary(&self, project_id: Uuid) -> AppResult<Vec<ProjectStockSummary>> {
        self.get_project(project_id).await?;
        let usages = self.store.usages_for_project(project_id).await?;
        let items = self.store.list_items().await?;

        let summary = summarize_usage(&usages, &items)
            .map_err(|err| AppError::InvariantViolation(err.to_string()))?;
        for line in summary.iter().filter(|s| s.has_negative_net_usage()) {
            tracing::warn!(
                project_id = %project_id,
                item_code = %line.item_code,
                net = line.net_quantity(),
                "Project returned more than it was issued"
            );
        }
        Ok(summary)
    }

    pub async fn cost_report(&self, project_id: Uuid) -> AppResult<ProjectCostReport> {
        let project = self.get_project(project_id).await?;
        let usages = self.store.usages_for_project(project_id).await?;
        let stock_cost =
            usage_cost(&usages).map_err(|err| AppError::InvariantViolation(err.to_string()))?;
        let margin_percent = project
            .margin_percent()
            .map_err(|err| AppError::InvariantViolation(err.to_string()))?;

        Ok(ProjectCostReport {
            project_id,
            project_number: project.project_number.clone(),
            budget: project.budget,
            actual_cost: project.actual_cost,
            committed_cost: project.committed_cost,
            variance: project.variance(),
            margin_percent,
            over_budget: project.is_over_budget(),
            stock_cost,
        })
    }
}

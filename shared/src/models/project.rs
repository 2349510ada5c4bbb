//! Project cost facet, usage and allocation records

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::StockItem;
use crate::types::{add_cost, extended_cost, round_currency, CostError};

/// The financial facet of a project
///
/// The surrounding project subsystem owns everything else about a project;
/// stock operations only touch these fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectFinancials {
    pub id: Uuid,
    pub project_number: String,
    pub name: String,
    pub budget: Decimal,
    pub actual_cost: Decimal,
    pub committed_cost: Decimal,
    pub last_modified_on: Option<DateTime<Utc>>,
}

impl ProjectFinancials {
    pub fn new(project_number: impl Into<String>, name: impl Into<String>, budget: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_number: project_number.into(),
            name: name.into(),
            budget,
            actual_cost: Decimal::ZERO,
            committed_cost: Decimal::ZERO,
            last_modified_on: None,
        }
    }

    /// Add consumed stock cost
    pub fn apply_issue_cost(&mut self, cost: Decimal, at: DateTime<Utc>) -> Result<(), CostError> {
        self.actual_cost = add_cost(self.actual_cost, cost)?;
        self.last_modified_on = Some(at);
        Ok(())
    }

    /// Reverse consumed stock cost, clamped at zero
    pub fn apply_return_cost(&mut self, cost: Decimal, at: DateTime<Utc>) -> Result<(), CostError> {
        let remaining = self
            .actual_cost
            .checked_sub(cost)
            .ok_or(CostError::TotalOverflow)?;
        self.actual_cost = remaining.max(Decimal::ZERO);
        self.last_modified_on = Some(at);
        Ok(())
    }

    /// Add reserved (not yet consumed) stock cost
    pub fn apply_commitment(&mut self, cost: Decimal, at: DateTime<Utc>) -> Result<(), CostError> {
        self.committed_cost = add_cost(self.committed_cost, cost)?;
        self.last_modified_on = Some(at);
        Ok(())
    }

    /// Budget minus actual cost, rounded for reporting
    pub fn variance(&self) -> Decimal {
        round_currency(self.budget - self.actual_cost)
    }

    /// Variance as a percentage of budget; 0 when there is no budget
    pub fn margin_percent(&self) -> Result<Decimal, CostError> {
        if self.budget.is_zero() {
            return Ok(Decimal::ZERO);
        }
        self.variance()
            .checked_div(self.budget)
            .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
            .map(round_currency)
            .ok_or(CostError::TotalOverflow)
    }

    pub fn is_over_budget(&self) -> bool {
        self.actual_cost > self.budget
    }
}

/// Audit record of one issue (positive quantity) or return (negative quantity)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectStockUsage {
    pub id: Uuid,
    pub project_id: Uuid,
    pub stock_item_id: Uuid,
    pub quantity: i64,
    /// Unit cost captured when the record was written, never a live reference
    pub unit_cost: Decimal,
    pub issued_on: DateTime<Utc>,
    pub issued_by: String,
    pub notes: Option<String>,
}

impl ProjectStockUsage {
    pub fn is_return(&self) -> bool {
        self.quantity < 0
    }

    /// Signed cost of this record (negative for returns)
    pub fn line_cost(&self) -> Result<Decimal, CostError> {
        extended_cost(self.quantity, self.unit_cost)
    }
}

/// Stock reserved against a project's committed cost
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectStockAllocation {
    pub id: Uuid,
    pub project_id: Uuid,
    pub stock_item_id: Uuid,
    pub quantity: i64,
    pub unit_cost: Decimal,
    pub allocated_on: DateTime<Utc>,
    pub reference: Option<String>,
}

impl ProjectStockAllocation {
    pub fn total_cost(&self) -> Result<Decimal, CostError> {
        extended_cost(self.quantity, self.unit_cost)
    }
}

/// Per-item roll-up of a project's usage history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectStockSummary {
    pub stock_item_id: Uuid,
    pub item_code: String,
    pub description: String,
    pub unit: String,
    pub issued_quantity: i64,
    pub returned_quantity: i64,
    pub net_cost: Decimal,
}

impl ProjectStockSummary {
    pub fn net_quantity(&self) -> i64 {
        self.issued_quantity - self.returned_quantity
    }

    pub fn has_negative_net_usage(&self) -> bool {
        self.net_quantity() < 0
    }
}

/// Roll usage records up per item, ordered by item code.
///
/// Items missing from `items` are reported with an empty code.
pub fn summarize_usage(
    usages: &[ProjectStockUsage],
    items: &[StockItem],
) -> Result<Vec<ProjectStockSummary>, CostError> {
    let mut by_item: std::collections::HashMap<Uuid, ProjectStockSummary> =
        std::collections::HashMap::new();

    for usage in usages {
        let summary = by_item.entry(usage.stock_item_id).or_insert_with(|| {
            let item = items.iter().find(|i| i.id == usage.stock_item_id);
            ProjectStockSummary {
                stock_item_id: usage.stock_item_id,
                item_code: item.map(|i| i.item_code.clone()).unwrap_or_default(),
                description: item.map(|i| i.description.clone()).unwrap_or_default(),
                unit: item.map(|i| i.unit.clone()).unwrap_or_default(),
                issued_quantity: 0,
                returned_quantity: 0,
                net_cost: Decimal::ZERO,
            }
        });

        if usage.is_return() {
            summary.returned_quantity = summary.returned_quantity.saturating_sub(usage.quantity);
        } else {
            summary.issued_quantity = summary.issued_quantity.saturating_add(usage.quantity);
        }
        summary.net_cost = add_cost(summary.net_cost, usage.line_cost()?)?;
    }

    let mut summaries: Vec<ProjectStockSummary> = by_item.into_values().collect();
    summaries.sort_by(|a, b| {
        a.item_code
            .to_lowercase()
            .cmp(&b.item_code.to_lowercase())
            .then(a.stock_item_id.cmp(&b.stock_item_id))
    });
    Ok(summaries)
}

/// Net quantity still issued (issues minus returns) in a set of usage records
pub fn net_issued(usages: &[ProjectStockUsage]) -> i64 {
    usages
        .iter()
        .fold(0i64, |total, u| total.saturating_add(u.quantity))
}

/// Total cost of a set of usage records (returns count negative)
pub fn usage_cost(usages: &[ProjectStockUsage]) -> Result<Decimal, CostError> {
    usages
        .iter()
        .try_fold(Decimal::ZERO, |total, u| add_cost(total, u.line_cost()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn usage(project_id: Uuid, item_id: Uuid, quantity: i64, cost: &str) -> ProjectStockUsage {
        ProjectStockUsage {
            id: Uuid::new_v4(),
            project_id,
            stock_item_id: item_id,
            quantity,
            unit_cost: dec(cost),
            issued_on: Utc::now(),
            issued_by: "tester".to_string(),
            notes: None,
        }
    }

    #[test]
    fn test_return_cost_clamps_at_zero() {
        let mut project = ProjectFinancials::new("P-001", "Tank farm", dec("1000"));
        project.apply_issue_cost(dec("10"), Utc::now()).unwrap();
        project.apply_return_cost(dec("25"), Utc::now()).unwrap();
        assert_eq!(project.actual_cost, Decimal::ZERO);
        assert!(project.last_modified_on.is_some());
    }

    #[test]
    fn test_variance_and_margin() {
        let mut project = ProjectFinancials::new("P-002", "Pipe rack", dec("200"));
        project.apply_issue_cost(dec("50"), Utc::now()).unwrap();
        assert_eq!(project.variance(), dec("150.00"));
        assert_eq!(project.margin_percent(), Ok(dec("75.00")));

        let unbudgeted = ProjectFinancials::new("P-003", "Spares", Decimal::ZERO);
        assert_eq!(unbudgeted.margin_percent(), Ok(Decimal::ZERO));
    }

    #[test]
    fn test_cost_overflow_leaves_project_unchanged() {
        let mut project = ProjectFinancials::new("P-004", "Boiler", dec("10"));
        project.actual_cost = Decimal::MAX;
        assert_eq!(
            project.apply_issue_cost(Decimal::ONE, Utc::now()),
            Err(CostError::TotalOverflow)
        );
        assert_eq!(project.actual_cost, Decimal::MAX);
        assert!(project.last_modified_on.is_none());

        let huge = usage(project.id, Uuid::new_v4(), i64::MAX, "100000000000");
        assert!(huge.line_cost().is_err());
        assert!(summarize_usage(&[huge], &[]).is_err());
    }

    #[test]
    fn test_summarize_usage() {
        let project = Uuid::new_v4();
        let item = Uuid::new_v4();
        let usages = vec![
            usage(project, item, 5, "4.00"),
            usage(project, item, -2, "4.00"),
            usage(project, item, 1, "6.00"),
        ];
        let summaries = summarize_usage(&usages, &[]).unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].issued_quantity, 6);
        assert_eq!(summaries[0].returned_quantity, 2);
        assert_eq!(summaries[0].net_quantity(), 4);
        assert_eq!(summaries[0].net_cost, dec("18.00"));
        assert!(!summaries[0].has_negative_net_usage());
        assert_eq!(net_issued(&usages), 4);
        assert_eq!(usage_cost(&usages).unwrap(), dec("18.00"));
    }
}

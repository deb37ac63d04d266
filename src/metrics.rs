use crate::ingestion::LineItemIndex;
use crate::schema::{CostBreakdownCategory, EngineConfig, Mapping};
use crate::split::{split_for_mapping, SplitBasis};
use crate::utils::{safe_divide, whole_months_elapsed};
use chrono::NaiveDate;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Restricts which budget lines take part in an aggregation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsFilter {
    pub cost_line: Option<String>,
    pub spend_type: Option<String>,
}

impl MetricsFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_cost_line(mut self, cost_line: impl Into<String>) -> Self {
        self.cost_line = Some(cost_line.into());
        self
    }

    pub fn with_spend_type(mut self, spend_type: impl Into<String>) -> Self {
        self.spend_type = Some(spend_type.into());
        self
    }

    pub fn matches(&self, category: &CostBreakdownCategory) -> bool {
        let cost_line_ok = self
            .cost_line
            .as_deref()
            .map_or(true, |c| c == category.cost_line);
        let spend_type_ok = self
            .spend_type
            .as_deref()
            .map_or(true, |s| s == category.spend_type);
        cost_line_ok && spend_type_ok
    }
}

/// Project-level KPIs. Percentages are expressed as 0-100.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectMetrics {
    pub total_budget: f64,
    /// Sum of all mapped (committed) amounts.
    pub committed_spend: f64,
    pub variance: f64,
    pub variance_percent: f64,
    pub utilization: f64,
    /// Portion of committed spend already recognized in P&L.
    pub invoiced_amount: f64,
    /// Committed but not yet invoiced.
    pub open_orders: f64,
    pub burn_rate: f64,
    pub po_count: usize,
    pub line_item_count: usize,
    pub mapping_count: usize,
    /// Mappings whose split came from the fallback ratio.
    pub inferred_mapping_count: usize,
    /// Mappings whose line item could not be found.
    pub unresolved_mapping_count: usize,
}

/// Months between project start and the reference date, never less than 1.
pub fn months_elapsed(project_start: NaiveDate, as_of: NaiveDate) -> u32 {
    whole_months_elapsed(project_start, as_of).max(1) as u32
}

pub fn calculate_burn_rate(committed_spend: f64, config: &EngineConfig) -> f64 {
    safe_divide(
        committed_spend,
        months_elapsed(config.project_start, config.as_of) as f64,
    )
}

pub fn calculate_project_metrics(
    categories: &[CostBreakdownCategory],
    mappings: &[Mapping],
    line_items: &LineItemIndex<'_>,
    config: &EngineConfig,
    filter: &MetricsFilter,
) -> ProjectMetrics {
    let selected: Vec<&CostBreakdownCategory> =
        categories.iter().filter(|c| filter.matches(c)).collect();
    let selected_ids: HashSet<&str> = selected.iter().map(|c| c.id.as_str()).collect();

    let mut metrics = ProjectMetrics {
        total_budget: selected.iter().map(|c| c.budget_cost).sum(),
        ..ProjectMetrics::default()
    };

    let mut line_item_ids: HashSet<&str> = HashSet::new();
    let mut purchase_orders: HashSet<&str> = HashSet::new();

    for mapping in mappings
        .iter()
        .filter(|m| selected_ids.contains(m.cost_breakdown_id.as_str()))
    {
        metrics.mapping_count += 1;
        metrics.committed_spend += mapping.mapped_amount;

        let line_item = line_items.resolve(&mapping.po_line_item_id);
        match line_item {
            Some(item) => {
                line_item_ids.insert(item.id.as_str());
                if let Some(po) = item.purchase_order_id.as_deref() {
                    purchase_orders.insert(po);
                }
            }
            None => {
                debug!(
                    "Mapping to {} references unknown line item {}, using fallback ratio",
                    mapping.cost_breakdown_id, mapping.po_line_item_id
                );
                metrics.unresolved_mapping_count += 1;
            }
        }

        let split = split_for_mapping(
            mapping.mapped_amount,
            line_item,
            config.fallback_invoice_ratio,
        );
        if split.basis == SplitBasis::Inferred {
            metrics.inferred_mapping_count += 1;
        }
        metrics.invoiced_amount += split.invoiced_actual;
        metrics.open_orders += split.future;
    }

    metrics.variance = metrics.total_budget - metrics.committed_spend;
    metrics.variance_percent = safe_divide(metrics.variance, metrics.total_budget) * 100.0;
    metrics.utilization = safe_divide(metrics.committed_spend, metrics.total_budget) * 100.0;
    metrics.burn_rate = calculate_burn_rate(metrics.committed_spend, config);
    metrics.po_count = purchase_orders.len();
    metrics.line_item_count = line_item_ids.len();

    metrics
}

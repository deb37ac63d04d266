use crate::schema::{BudgetLine, DraftEntry, SnapshotItem};
use crate::utils::safe_percentage;
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Pending edit state of one baseline line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StagedEdit {
    Unchanged,
    Modified(f64),
    Excluded,
}

/// Unsaved forecast edits layered over a baseline.
///
/// In `changes`, a number means the line was re-forecast to that value and
/// `null` means it is excluded from the forecast. Lines not listed are
/// unchanged. The baseline itself is never touched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ForecastOverlay {
    #[serde(default)]
    #[schemars(description = "Map of line id to its new forecast value, or null to exclude the line.")]
    pub changes: BTreeMap<String, Option<f64>>,

    #[serde(default)]
    #[schemars(description = "New lines drafted in this session, not yet part of the baseline.")]
    pub new_entries: Vec<DraftEntry>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StagingSummary {
    pub total_budget: f64,
    pub total_forecast: f64,
    pub total_change: f64,
    pub change_percentage: f64,
    pub modified_count: usize,
    pub excluded_count: usize,
    pub new_entries_count: usize,
}

impl ForecastOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn modify(mut self, id: impl Into<String>, value: f64) -> Self {
        self.changes.insert(id.into(), Some(value));
        self
    }

    pub fn exclude(mut self, id: impl Into<String>) -> Self {
        self.changes.insert(id.into(), None);
        self
    }

    /// Drops any pending edit for `id`, returning it to its baseline value.
    pub fn restore(mut self, id: &str) -> Self {
        self.changes.remove(id);
        self
    }

    pub fn add_draft(mut self, entry: DraftEntry) -> Self {
        self.new_entries.push(entry);
        self
    }

    pub fn edit_for(&self, id: &str) -> StagedEdit {
        match self.changes.get(id) {
            None => StagedEdit::Unchanged,
            Some(Some(value)) => StagedEdit::Modified(*value),
            Some(None) => StagedEdit::Excluded,
        }
    }

    pub fn modified_count(&self) -> usize {
        self.changes.values().filter(|v| v.is_some()).count()
    }

    pub fn excluded_count(&self) -> usize {
        self.changes.values().filter(|v| v.is_none()).count()
    }

    pub fn summary<T: BudgetLine>(&self, baseline: &[T]) -> StagingSummary {
        let total_budget = calculate_total_budget(baseline);
        let total_forecast = calculate_total_forecast(baseline, &self.changes, &self.new_entries);
        let total_change = total_forecast - total_budget;

        StagingSummary {
            total_budget,
            total_forecast,
            total_change,
            change_percentage: calculate_change_percentage(total_change, total_budget),
            modified_count: self.modified_count(),
            excluded_count: self.excluded_count(),
            new_entries_count: self.new_entries.len(),
        }
    }

    /// Materializes the staged forecast as snapshot rows for the next version.
    ///
    /// Excluded lines are dropped, modified lines carry their new value as the
    /// forecast, and drafts are appended after the baseline rows.
    pub fn apply<T: BudgetLine>(&self, baseline: &[T]) -> Vec<SnapshotItem> {
        let mut items: Vec<SnapshotItem> = baseline
            .iter()
            .filter_map(|line| match self.edit_for(line.line_id()) {
                StagedEdit::Excluded => None,
                StagedEdit::Unchanged => {
                    Some(SnapshotItem::new(line.line_id(), line.budget_cost(), None))
                }
                StagedEdit::Modified(value) => Some(SnapshotItem::new(
                    line.line_id(),
                    line.budget_cost(),
                    Some(value),
                )),
            })
            .collect();

        items.extend(
            self.new_entries
                .iter()
                .map(|draft| SnapshotItem::new(draft.id.clone(), draft.budget_cost, None)),
        );

        debug!(
            "Applied overlay: {} baseline lines -> {} staged lines",
            baseline.len(),
            items.len()
        );

        items
    }
}

pub fn calculate_total_budget<T: BudgetLine>(items: &[T]) -> f64 {
    items.iter().map(|i| i.budget_cost()).sum()
}

/// Baseline budget with pending edits applied, plus every draft entry.
pub fn calculate_total_forecast<T: BudgetLine>(
    items: &[T],
    changes: &BTreeMap<String, Option<f64>>,
    new_entries: &[DraftEntry],
) -> f64 {
    let baseline: f64 = items
        .iter()
        .map(|item| match changes.get(item.line_id()) {
            None => item.budget_cost(),
            Some(None) => 0.0,
            Some(Some(value)) => *value,
        })
        .sum();
    let drafts: f64 = new_entries.iter().map(|e| e.budget_cost).sum();
    baseline + drafts
}

pub fn calculate_change_percentage(change: f64, base: f64) -> f64 {
    safe_percentage(change, base)
}

use crate::error::Result;
use crate::ingestion::{normalize_batch, LineItemIndex, RawLineItem, SkippedRecord};
use crate::metrics::{calculate_project_metrics, MetricsFilter, ProjectMetrics};
use crate::promise::{aggregate_promise_dates, to_iso_map, PromiseBuckets};
use crate::rollup::{build_cost_hierarchy, CostBreakdownNode};
use crate::schema::{CostBreakdownCategory, EngineConfig, Mapping, ProjectData};
use crate::split::{split_for_mapping, PlSplit};
use crate::timeline::{build_pl_timeline, DateWindow, TimelineEntry, TimelineOptions};
use log::{debug, info, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Read-only view over one project's data, with the line-item index built once.
pub struct ReconciliationEngine<'a> {
    data: &'a ProjectData,
    config: &'a EngineConfig,
    line_items: LineItemIndex<'a>,
}

/// Everything the dashboard shows for one project, in a single serializable value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub metrics: ProjectMetrics,
    pub hierarchy: Vec<CostBreakdownNode>,
    pub timeline: Vec<TimelineEntry>,
    pub promise_dates: BTreeMap<String, f64>,
    /// Raw line items that could not be normalized, when the report was built
    /// from raw records.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_records: Vec<SkippedRecord>,
}

/// A project document as it arrives from outside: line items are raw records
/// in whatever schema the source uses.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct RawProjectData {
    #[serde(default)]
    pub categories: Vec<CostBreakdownCategory>,
    #[serde(default)]
    pub mappings: Vec<Mapping>,
    #[serde(default, alias = "lineItems")]
    pub line_items: Vec<RawLineItem>,
}

impl RawProjectData {
    /// Normalizes the line items, skipping (and logging) the ones that fail.
    pub fn into_project(self) -> (ProjectData, Vec<SkippedRecord>) {
        let (data, skipped) = load_project(self.categories, self.mappings, &self.line_items);
        if !skipped.is_empty() {
            warn!(
                "{} of {} line items skipped during normalization",
                skipped.len(),
                self.line_items.len()
            );
        }
        (data, skipped)
    }
}

impl<'a> ReconciliationEngine<'a> {
    pub fn new(data: &'a ProjectData, config: &'a EngineConfig) -> Result<Self> {
        config.validate()?;

        info!(
            "Reconciling {} categories, {} mappings, {} line items",
            data.categories.len(),
            data.mappings.len(),
            data.line_items.len()
        );

        let line_items = LineItemIndex::new(&data.line_items);
        if !line_items.tracks_invoices() {
            debug!(
                "No line item carries invoice data; every split uses the fallback ratio {}",
                config.fallback_invoice_ratio
            );
        }

        Ok(Self {
            data,
            config,
            line_items,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        self.config
    }

    pub fn line_items(&self) -> &LineItemIndex<'a> {
        &self.line_items
    }

    pub fn split(&self, mapping: &Mapping) -> PlSplit {
        split_for_mapping(
            mapping.mapped_amount,
            self.line_items.resolve(&mapping.po_line_item_id),
            self.config.fallback_invoice_ratio,
        )
    }

    pub fn metrics(&self, filter: &MetricsFilter) -> ProjectMetrics {
        calculate_project_metrics(
            &self.data.categories,
            &self.data.mappings,
            &self.line_items,
            self.config,
            filter,
        )
    }

    pub fn cost_hierarchy(&self, filter: &MetricsFilter) -> Vec<CostBreakdownNode> {
        build_cost_hierarchy(
            &self.data.categories,
            &self.data.mappings,
            self.config,
            filter,
        )
    }

    pub fn timeline(&self, window: &DateWindow, options: &TimelineOptions) -> Vec<TimelineEntry> {
        build_pl_timeline(
            &self.data.mappings,
            &self.line_items,
            window,
            self.config,
            options,
        )
    }

    pub fn promise_buckets(&self, window: Option<&DateWindow>) -> PromiseBuckets {
        aggregate_promise_dates(&self.data.mappings, &self.line_items, self.config, window)
    }

    pub fn report(&self, window: &DateWindow, filter: &MetricsFilter) -> ReconciliationReport {
        let report = ReconciliationReport {
            metrics: self.metrics(filter),
            hierarchy: self.cost_hierarchy(filter),
            timeline: self.timeline(
                window,
                &TimelineOptions {
                    fill_empty_months: true,
                },
            ),
            promise_dates: to_iso_map(&self.promise_buckets(Some(window))),
            skipped_records: Vec::new(),
        };

        debug!(
            "Report: committed {:.2} of {:.2} budget across {} timeline months",
            report.metrics.committed_spend,
            report.metrics.total_budget,
            report.timeline.len()
        );

        report
    }
}

/// Normalizes raw line items and assembles the project, returning the records
/// that had to be skipped alongside it.
pub fn load_project(
    categories: Vec<CostBreakdownCategory>,
    mappings: Vec<Mapping>,
    raw_line_items: &[RawLineItem],
) -> (ProjectData, Vec<SkippedRecord>) {
    let report = normalize_batch(raw_line_items);
    let data = ProjectData {
        categories,
        mappings,
        line_items: report.items,
    };
    (data, report.skipped)
}

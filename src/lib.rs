//! # Budget Reconciliation
//!
//! A library for reconciling purchase-order commitments against a project's
//! budget and projecting when that spend hits profit & loss.
//!
//! ## Core Concepts
//!
//! - **Line Items**: Purchase-order lines from any source schema, normalized so that
//!   invoice and promise-date columns are either `Tracked` or `Untracked`
//! - **Mappings**: A committed amount linking one line item to one budget category.
//!   A line item may be split across several mappings
//! - **P&L Split**: Each mapping divides into an invoiced part (already in P&L) and a
//!   future part, with `invoiced + future == mapped` always
//! - **Cost Hierarchy**: Business line → cost line → spend type → sub-category, rolled
//!   up from the leaves. Lines without mappings report `NoData`, not a made-up number
//! - **Forecast Versions**: Snapshot diffs and staged (unsaved) forecast edits
//!
//! ## Example
//!
//! ```rust,ignore
//! use budget_reconciliation::*;
//! use chrono::NaiveDate;
//! use serde_json::json;
//!
//! let (data, skipped) = load_project(
//!     vec![CostBreakdownCategory {
//!         id: "c1".to_string(),
//!         business_line: "Operations".to_string(),
//!         cost_line: "Civil".to_string(),
//!         spend_type: "Capex".to_string(),
//!         sub_category: "Earthworks".to_string(),
//!         budget_cost: 10_000.0,
//!     }],
//!     vec![Mapping::new(100.0, "li-1", "c1")],
//!     &[json!({
//!         "id": "li-1",
//!         "line_value": 200,
//!         "invoiced_value": 120,
//!         "invoice_date": "2024-02-05",
//!         "supplier_promise_date": "2024-04-01"
//!     })],
//! );
//! assert!(skipped.is_empty());
//!
//! let config = EngineConfig::new(
//!     NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
//!     NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(),
//! );
//! let window = DateWindow::from_period("2024-01:2024-12").unwrap();
//!
//! let report = reconcile_project(&data, &config, &window).unwrap();
//! println!("{}", format_currency(report.metrics.open_orders));
//! ```

pub mod engine;
pub mod error;
pub mod ingestion;
pub mod metrics;
pub mod promise;
pub mod rollup;
pub mod schema;
pub mod split;
pub mod staging;
pub mod timeline;
pub mod utils;
pub mod versions;

pub use engine::{load_project, RawProjectData, ReconciliationEngine, ReconciliationReport};
pub use error::{ReconciliationError, Result};
pub use ingestion::*;
pub use metrics::*;
pub use promise::{aggregate_promise_dates, to_iso_map, PromiseBuckets};
pub use rollup::*;
pub use schema::*;
pub use split::*;
pub use staging::*;
pub use timeline::*;
pub use utils::*;
pub use versions::*;

use log::info;

/// Runs every dashboard computation over an already-loaded project.
pub fn reconcile_project(
    data: &ProjectData,
    config: &EngineConfig,
    window: &DateWindow,
) -> Result<ReconciliationReport> {
    let engine = ReconciliationEngine::new(data, config)?;
    Ok(engine.report(window, &MetricsFilter::all()))
}

/// Like [`reconcile_project`], but takes the project as a JSON document with
/// raw line items. Records that fail normalization are skipped and listed in
/// the report's `skipped_records`.
pub fn reconcile_json(
    project_json: &str,
    config: &EngineConfig,
    window: &DateWindow,
) -> Result<ReconciliationReport> {
    let raw: RawProjectData = serde_json::from_str(project_json)?;
    info!(
        "Loaded project JSON with {} categories, {} mappings and {} raw line items",
        raw.categories.len(),
        raw.mappings.len(),
        raw.line_items.len()
    );

    let (data, skipped) = raw.into_project();

    let mut report = reconcile_project(&data, config, window)?;
    report.skipped_records = skipped;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn config() -> EngineConfig {
        EngineConfig::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 4, 1).unwrap(),
        )
    }

    #[test]
    fn test_reconcile_json_end_to_end() {
        let json = r#"{
            "categories": [
                {"id": "c1", "businessLine": "Ops", "costLine": "Civil", "spendType": "Capex", "subCategory": "Earthworks", "budgetCost": 1000},
                {"id": "c2", "subBusinessLine": "Ops", "costLine": "Civil", "spendType": "Opex", "spendSubCategory": "Hire", "budgetCost": 500}
            ],
            "mappings": [
                {"mappedAmount": 300, "poLineItemId": "li-1", "costBreakdownId": "c1"}
            ],
            "line_items": [
                {"id": "li-1", "line_value": 300, "created_at": "2024-02-01"}
            ]
        }"#;
        let window = DateWindow::from_period("2024-01:2024-03").unwrap();

        let report = reconcile_json(json, &config(), &window).unwrap();

        assert_eq!(report.metrics.total_budget, 1500.0);
        assert_eq!(report.metrics.committed_spend, 300.0);
        assert_eq!(report.metrics.burn_rate, 100.0);
        assert_eq!(report.metrics.inferred_mapping_count, 1);
        assert_eq!(report.timeline.len(), 3);
        assert!((report.timeline[1].actual_pl - 180.0).abs() < 1e-9);
        assert!(report.promise_dates.is_empty());

        let leaves = report.hierarchy[0].leaves();
        assert_eq!(leaves.len(), 2);
        assert!(leaves.iter().any(|l| l.committed_actual.is_no_data()));
        assert!(report.skipped_records.is_empty());
    }

    #[test]
    fn test_reconcile_json_skips_bad_raw_records() {
        let json = r#"{
            "categories": [
                {"id": "c1", "businessLine": "Ops", "costLine": "Civil", "spendType": "Capex", "subCategory": "Earthworks", "budgetCost": 1000}
            ],
            "mappings": [
                {"mappedAmount": 100, "poLineItemId": "li-1", "costBreakdownId": "c1"}
            ],
            "line_items": [
                {"id": "li-1", "line_value": 200, "invoiced_value": 120},
                {"line_value": 5}
            ]
        }"#;
        let window = DateWindow::from_period("2024-01:2024-03").unwrap();

        let report = reconcile_json(json, &config(), &window).unwrap();

        assert_eq!(report.skipped_records.len(), 1);
        assert_eq!(report.skipped_records[0].index, 1);
        assert_eq!(report.metrics.line_item_count, 1);
        assert_eq!(report.metrics.unresolved_mapping_count, 0);
        assert!((report.metrics.invoiced_amount - 60.0).abs() < 1e-9);
        assert!((report.metrics.open_orders - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_reconcile_json_rejects_invalid_json() {
        let window = DateWindow::from_period("2024-01").unwrap();
        let result = reconcile_json("{not json", &config(), &window);
        assert!(matches!(
            result,
            Err(ReconciliationError::SerializationError(_))
        ));
    }

    #[test]
    fn test_schemas_generate() {
        let schema = ProjectData::schema_as_json().unwrap();
        assert!(schema.contains("line_items"));
        let config_schema = EngineConfig::schema_as_json().unwrap();
        assert!(config_schema.contains("fallback_invoice_ratio"));
    }
}

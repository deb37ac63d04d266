use crate::error::{ReconciliationError, Result};
use crate::schema::{number_to_id, InvoiceTracking, NormalizedLineItem, PromiseTracking};
use crate::utils::parse_flexible_date;
use chrono::NaiveDate;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

const LINE_VALUE_KEYS: &[&str] = &["line_value", "value", "total_value"];
const INVOICE_VALUE_KEYS: &[&str] = &[
    "invoiced_value_usd",
    "invoiced_value",
    "invoice_value_usd",
    "invoice_value",
    "actual_value",
];
const INVOICE_DATE_KEYS: &[&str] = &["invoice_date"];
const PROMISE_DATE_KEYS: &[&str] = &["supplier_promise_date", "promise_date"];
const CREATED_KEYS: &[&str] = &["created_at", "updated_at"];
const PURCHASE_ORDER_KEYS: &[&str] = &["purchase_order_id", "po_id", "po_number"];

/// A raw line item exactly as it arrived from the data source.
pub type RawLineItem = Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedRecord {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NormalizationReport {
    pub items: Vec<NormalizedLineItem>,
    pub skipped: Vec<SkippedRecord>,
}

/// Canonicalizes one raw record.
///
/// Values come from the first alias that holds a non-null value. Invoice and
/// promise tracking are decided by whether any alias key is *present*, so a
/// column that exists but holds `null` still counts as tracked.
pub fn normalize_line_item(raw: &RawLineItem) -> Result<NormalizedLineItem> {
    let record = raw
        .as_object()
        .ok_or_else(|| malformed(None, "record is not a JSON object"))?;

    let id = first_non_null(record, &["id"])
        .and_then(value_to_id)
        .ok_or_else(|| malformed(None, "missing required field 'id'"))?;

    let line_value = first_non_null(record, LINE_VALUE_KEYS)
        .map(|v| value_to_amount(v, &id, "line value"))
        .unwrap_or(0.0);

    let invoice = if any_present(record, INVOICE_VALUE_KEYS) {
        InvoiceTracking::Tracked {
            invoiced_value: first_non_null(record, INVOICE_VALUE_KEYS)
                .map(|v| value_to_amount(v, &id, "invoice value"))
                .unwrap_or(0.0),
        }
    } else {
        InvoiceTracking::Untracked
    };

    let promise = if any_present(record, PROMISE_DATE_KEYS) {
        PromiseTracking::Tracked {
            promise_date: first_non_null(record, PROMISE_DATE_KEYS)
                .and_then(|v| value_to_date(v, &id, "promise date")),
        }
    } else {
        PromiseTracking::Untracked
    };

    Ok(NormalizedLineItem {
        purchase_order_id: first_non_null(record, PURCHASE_ORDER_KEYS).and_then(value_to_id),
        line_value,
        invoice,
        invoice_date: first_non_null(record, INVOICE_DATE_KEYS)
            .and_then(|v| value_to_date(v, &id, "invoice date")),
        promise,
        created_at: first_non_null(record, CREATED_KEYS)
            .and_then(|v| value_to_date(v, &id, "created date")),
        id,
    })
}

/// Normalizes a batch, skipping (and logging) records that fail.
pub fn normalize_batch(raws: &[RawLineItem]) -> NormalizationReport {
    let mut report = NormalizationReport::default();

    for (index, raw) in raws.iter().enumerate() {
        match normalize_line_item(raw) {
            Ok(item) => report.items.push(item),
            Err(err) => {
                let err = match err {
                    ReconciliationError::MalformedRecord { reason, .. } => {
                        malformed(Some(index), reason)
                    }
                    other => other,
                };
                warn!("Skipping line item: {}", err);
                report.skipped.push(SkippedRecord {
                    index,
                    reason: err.to_string(),
                });
            }
        }
    }

    debug!(
        "Normalized {} line items ({} skipped)",
        report.items.len(),
        report.skipped.len()
    );

    report
}

/// Lookup of normalized line items by id. The first item wins on duplicate ids.
#[derive(Debug, Clone, Default)]
pub struct LineItemIndex<'a> {
    by_id: HashMap<&'a str, &'a NormalizedLineItem>,
    tracks_invoices: bool,
}

impl<'a> LineItemIndex<'a> {
    pub fn new(items: &'a [NormalizedLineItem]) -> Self {
        let mut by_id = HashMap::with_capacity(items.len());
        for item in items {
            if by_id.contains_key(item.id.as_str()) {
                debug!("Duplicate line item id {}, keeping the first occurrence", item.id);
                continue;
            }
            by_id.insert(item.id.as_str(), item);
        }

        Self {
            by_id,
            tracks_invoices: items.iter().any(|item| item.has_invoice_field()),
        }
    }

    pub fn resolve(&self, id: &str) -> Option<&'a NormalizedLineItem> {
        self.by_id.get(id).copied()
    }

    /// True when at least one indexed line item came from a source with
    /// invoice tracking.
    pub fn tracks_invoices(&self) -> bool {
        self.tracks_invoices
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

fn malformed(index: Option<usize>, reason: impl Into<String>) -> ReconciliationError {
    ReconciliationError::MalformedRecord {
        index,
        reason: reason.into(),
    }
}

fn any_present(record: &Map<String, Value>, keys: &[&str]) -> bool {
    keys.iter().any(|key| record.contains_key(*key))
}

fn first_non_null<'a>(record: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .find_map(|key| record.get(*key).filter(|v| !v.is_null()))
}

fn value_to_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(number_to_id(n)),
        _ => None,
    }
}

fn value_to_amount(value: &Value, id: &str, field: &str) -> f64 {
    let parsed = match value {
        Value::Null => Some(0.0),
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_amount(s),
        _ => None,
    };

    match parsed {
        Some(amount) if amount.is_finite() => amount,
        _ => {
            debug!("Line item {}: unreadable {} {}, using 0", id, field, value);
            0.0
        }
    }
}

fn parse_amount(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ',' | '$' | ' '))
        .collect();
    if cleaned.is_empty() {
        return Some(0.0);
    }
    cleaned.parse().ok()
}

fn value_to_date(value: &Value, id: &str, field: &str) -> Option<NaiveDate> {
    let parsed = match value {
        Value::String(s) => parse_flexible_date(s),
        _ => None,
    };

    if parsed.is_none() && !value.is_null() {
        debug!("Line item {}: unparsable {} {}, treating as absent", id, field, value);
    }

    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_aliases_resolve_first_present() {
        let item = normalize_line_item(&json!({
            "id": "li-1",
            "value": 500.0,
            "total_value": 900.0,
            "invoice_value": 200.0,
            "actual_value": 999.0,
        }))
        .unwrap();

        assert_eq!(item.line_value, 500.0);
        assert_eq!(item.invoiced_value(), Some(200.0));
        assert!(item.has_invoice_field());
        assert!(!item.has_promise_field());
    }

    #[test]
    fn test_null_fields_still_count_as_present() {
        let item = normalize_line_item(&json!({
            "id": 42,
            "line_value": 100,
            "invoiced_value_usd": null,
            "supplier_promise_date": null,
        }))
        .unwrap();

        assert_eq!(item.id, "42");
        assert_eq!(item.invoice, InvoiceTracking::Tracked { invoiced_value: 0.0 });
        assert_eq!(item.promise, PromiseTracking::Tracked { promise_date: None });
    }

    #[test]
    fn test_null_alias_falls_through_to_populated_one() {
        let item = normalize_line_item(&json!({
            "id": "li-1",
            "line_value": null,
            "value": 500,
            "invoiced_value_usd": null,
            "invoiced_value": 120,
            "supplier_promise_date": null,
            "promise_date": "2024-05-01",
        }))
        .unwrap();

        assert_eq!(item.line_value, 500.0);
        assert_eq!(item.invoice, InvoiceTracking::Tracked { invoiced_value: 120.0 });
        assert_eq!(
            item.promise_date(),
            NaiveDate::from_ymd_opt(2024, 5, 1)
        );

        let split = crate::split::split_mapped_amount(100.0, &item, 0.6);
        assert!((split.invoiced_actual - 24.0).abs() < 1e-9);
        assert!((split.future - 76.0).abs() < 1e-9);
    }

    #[test]
    fn test_integral_float_ids_match_integer_text() {
        let item = normalize_line_item(&json!({"id": 42.0, "po_id": 7.0})).unwrap();
        assert_eq!(item.id, "42");
        assert_eq!(item.purchase_order_id.as_deref(), Some("7"));

        let fractional = normalize_line_item(&json!({"id": 4.5})).unwrap();
        assert_eq!(fractional.id, "4.5");
    }

    #[test]
    fn test_missing_id_is_malformed() {
        let err = normalize_line_item(&json!({"line_value": 10})).unwrap_err();
        assert!(matches!(err, ReconciliationError::MalformedRecord { .. }));

        let err = normalize_line_item(&json!({"id": null})).unwrap_err();
        assert!(err.to_string().contains("id"));

        assert!(normalize_line_item(&json!(["not", "an", "object"])).is_err());
    }

    #[test]
    fn test_dates_and_strings_are_parsed() {
        let item = normalize_line_item(&json!({
            "id": "li-2",
            "line_value": "$1,250.50",
            "invoice_date": "2024-02-10T08:00:00Z",
            "promise_date": "not a date",
            "updated_at": "2024-01-05 12:00:00",
            "po_number": "PO-77",
        }))
        .unwrap();

        assert_eq!(item.line_value, 1250.5);
        assert_eq!(item.invoice_date, NaiveDate::from_ymd_opt(2024, 2, 10));
        assert_eq!(item.promise_date(), None);
        assert!(item.has_promise_field());
        assert_eq!(item.created_at, NaiveDate::from_ymd_opt(2024, 1, 5));
        assert_eq!(item.purchase_order_id.as_deref(), Some("PO-77"));
    }

    #[test]
    fn test_batch_skips_bad_records() {
        let raws = vec![
            json!({"id": "a", "line_value": 1.0}),
            json!({"line_value": 2.0}),
            json!({"id": "c", "line_value": 3.0}),
        ];

        let report = normalize_batch(&raws);
        assert_eq!(report.items.len(), 2);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].index, 1);
        assert!(report.skipped[0].reason.contains("#1"));
    }

    #[test]
    fn test_index_resolves_and_keeps_first_duplicate() {
        let report = normalize_batch(&[
            json!({"id": "a", "line_value": 1.0}),
            json!({"id": "a", "line_value": 99.0}),
            json!({"id": "b", "line_value": 2.0, "invoice_value": 1.0}),
        ]);
        let index = LineItemIndex::new(&report.items);

        assert_eq!(index.len(), 2);
        assert_eq!(index.resolve("a").map(|i| i.line_value), Some(1.0));
        assert!(index.resolve("missing").is_none());
        assert!(index.tracks_invoices());
        assert!(!LineItemIndex::new(&report.items[..2]).tracks_invoices());
    }
}

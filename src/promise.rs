use crate::ingestion::LineItemIndex;
use crate::schema::{EngineConfig, Mapping};
use crate::split::split_mapped_amount;
use crate::timeline::DateWindow;
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// Open (not yet invoiced) amounts keyed by supplier promise date.
pub type PromiseBuckets = BTreeMap<NaiveDate, f64>;

/// Sums the future P&L of every mapping by its line item's promise date.
///
/// Mappings without a resolvable line item or without a promise date are left
/// out; they still count towards open orders in the project metrics.
pub fn aggregate_promise_dates(
    mappings: &[Mapping],
    line_items: &LineItemIndex<'_>,
    config: &EngineConfig,
    window: Option<&DateWindow>,
) -> PromiseBuckets {
    let mut buckets = PromiseBuckets::new();

    for mapping in mappings {
        let Some(item) = line_items.resolve(&mapping.po_line_item_id) else {
            continue;
        };
        let Some(promise_date) = item.promise_date() else {
            continue;
        };
        if window.is_some_and(|w| !w.contains(promise_date)) {
            continue;
        }

        let split = split_mapped_amount(mapping.mapped_amount, item, config.fallback_invoice_ratio);
        if split.future > 0.0 {
            *buckets.entry(promise_date).or_insert(0.0) += split.future;
        }
    }

    buckets
}

/// ISO `YYYY-MM-DD` keyed view of the buckets, for presentation layers.
pub fn to_iso_map(buckets: &PromiseBuckets) -> BTreeMap<String, f64> {
    buckets
        .iter()
        .map(|(date, amount)| (date.format("%Y-%m-%d").to_string(), *amount))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{InvoiceTracking, NormalizedLineItem, PromiseTracking};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn item(id: &str, invoiced: f64, promise: PromiseTracking) -> NormalizedLineItem {
        NormalizedLineItem {
            id: id.to_string(),
            purchase_order_id: None,
            line_value: 100.0,
            invoice: InvoiceTracking::Tracked {
                invoiced_value: invoiced,
            },
            invoice_date: None,
            promise,
            created_at: None,
        }
    }

    fn promised(d: NaiveDate) -> PromiseTracking {
        PromiseTracking::Tracked {
            promise_date: Some(d),
        }
    }

    #[test]
    fn test_groups_future_amounts_by_promise_date() {
        let items = vec![
            item("a", 20.0, promised(date(2024, 3, 1))),
            item("b", 0.0, promised(date(2024, 3, 1))),
            item("c", 100.0, promised(date(2024, 4, 1))),
            item("d", 0.0, PromiseTracking::Tracked { promise_date: None }),
            item("e", 0.0, PromiseTracking::Untracked),
        ];
        let index = LineItemIndex::new(&items);
        let mappings = vec![
            Mapping::new(100.0, "a", "c1"),
            Mapping::new(50.0, "b", "c1"),
            Mapping::new(100.0, "c", "c1"),
            Mapping::new(100.0, "d", "c1"),
            Mapping::new(100.0, "e", "c1"),
            Mapping::new(100.0, "missing", "c1"),
        ];
        let config = EngineConfig::new(date(2024, 1, 1), date(2024, 2, 1));

        let buckets = aggregate_promise_dates(&mappings, &index, &config, None);

        // "c" is fully invoiced, so it has nothing left to forecast.
        assert_eq!(buckets.len(), 1);
        assert!((buckets[&date(2024, 3, 1)] - 130.0).abs() < 1e-9);

        let iso = to_iso_map(&buckets);
        assert!(iso.contains_key("2024-03-01"));
    }

    #[test]
    fn test_window_restricts_buckets() {
        let items = vec![
            item("a", 0.0, promised(date(2024, 3, 1))),
            item("b", 0.0, promised(date(2024, 8, 1))),
        ];
        let index = LineItemIndex::new(&items);
        let mappings = vec![Mapping::new(10.0, "a", "c1"), Mapping::new(10.0, "b", "c1")];
        let config = EngineConfig::new(date(2024, 1, 1), date(2024, 2, 1));
        let window = DateWindow::new(date(2024, 1, 1), date(2024, 6, 30)).unwrap();

        let buckets = aggregate_promise_dates(&mappings, &index, &config, Some(&window));
        assert_eq!(buckets.keys().copied().collect::<Vec<_>>(), vec![date(2024, 3, 1)]);
    }
}

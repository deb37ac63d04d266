use crate::error::{ReconciliationError, Result};
use crate::ingestion::LineItemIndex;
use crate::schema::{EngineConfig, Mapping};
use crate::split::{split_mapped_amount, split_unresolved};
use crate::utils::{first_day_of_month, month_starts_in_period, parse_period_string};
use chrono::{Datelike, NaiveDate};
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Inclusive calendar window `[start, end]`. Deserialized windows go through
/// the same `end >= start` check as [`DateWindow::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(try_from = "WindowBounds")]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Deserialize, JsonSchema)]
struct WindowBounds {
    start: NaiveDate,
    end: NaiveDate,
}

impl TryFrom<WindowBounds> for DateWindow {
    type Error = ReconciliationError;

    fn try_from(bounds: WindowBounds) -> Result<Self> {
        DateWindow::new(bounds.start, bounds.end)
    }
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if end < start {
            return Err(ReconciliationError::InvalidDateWindow { start, end });
        }
        Ok(Self { start, end })
    }

    /// Builds a window from `"YYYY-MM"` or `"YYYY-MM:YYYY-MM"`, covering whole months.
    pub fn from_period(period: &str) -> Result<Self> {
        let (start, end) = parse_period_string(period)?;
        Self::new(start, end)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// First day of each month the window touches.
    pub fn months(&self) -> Vec<NaiveDate> {
        month_starts_in_period(self.start, self.end)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub month: u32,
    pub year: i32,
    /// Invoiced amounts recognized in this month.
    pub actual_pl: f64,
    /// Open amounts expected to be recognized in this month.
    pub projected_pl: f64,
    /// Running total of actual + projected up to and including this month.
    pub cumulative: f64,
}

impl TimelineEntry {
    /// `YYYY-MM` key for this bucket.
    pub fn label(&self) -> String {
        format!("{:04}-{:02}", self.year, self.month)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineOptions {
    /// Emit a (zero) entry for every month of the window, not just populated ones.
    pub fill_empty_months: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct MonthBucket {
    actual: f64,
    projected: f64,
}

/// Buckets the P&L impact of every mapping into months of `window`.
///
/// Invoiced amounts land on the invoice date (or creation date); open amounts
/// land on the supplier promise date, falling back to the invoice date and
/// then to the window end. Dates outside the window are dropped rather than
/// pulled into it.
pub fn build_pl_timeline(
    mappings: &[Mapping],
    line_items: &LineItemIndex<'_>,
    window: &DateWindow,
    config: &EngineConfig,
    options: &TimelineOptions,
) -> Vec<TimelineEntry> {
    let mut buckets: BTreeMap<NaiveDate, MonthBucket> = BTreeMap::new();
    let last_resort_placement = !line_items.tracks_invoices();

    let mut add = |date: Option<NaiveDate>, amount: f64, projected: bool| {
        let Some(date) = date else {
            return;
        };
        if amount <= 0.0 || !window.contains(date) {
            return;
        }
        let bucket = buckets.entry(first_day_of_month(date)).or_default();
        if projected {
            bucket.projected += amount;
        } else {
            bucket.actual += amount;
        }
    };

    for mapping in mappings {
        match line_items.resolve(&mapping.po_line_item_id) {
            Some(item) => {
                let split = split_mapped_amount(
                    mapping.mapped_amount,
                    item,
                    config.fallback_invoice_ratio,
                );
                let actual_date = item.effective_invoice_date();
                let projected_date = item.promise_date().or(actual_date).unwrap_or(window.end);

                add(actual_date, split.invoiced_actual, false);
                add(Some(projected_date), split.future, true);
            }
            None if last_resort_placement => {
                let split = split_unresolved(mapping.mapped_amount, config.fallback_invoice_ratio);
                add(Some(window.start), split.invoiced_actual, false);
                add(Some(window.end), split.future, true);
            }
            None => {
                debug!(
                    "Line item {} not found; leaving mapping out of the timeline",
                    mapping.po_line_item_id
                );
            }
        }
    }

    let months: Vec<NaiveDate> = if options.fill_empty_months {
        window.months()
    } else {
        buckets.keys().copied().collect()
    };

    let mut cumulative = 0.0;
    months
        .into_iter()
        .map(|month| {
            let bucket = buckets.get(&month).copied().unwrap_or_default();
            cumulative += bucket.actual + bucket.projected;
            TimelineEntry {
                month: month.month(),
                year: month.year(),
                actual_pl: bucket.actual,
                projected_pl: bucket.projected,
                cumulative,
            }
        })
        .collect()
}

use crate::schema::{InvoiceTracking, NormalizedLineItem};
use serde::{Deserialize, Serialize};

/// How a split was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitBasis {
    /// Derived from the line item's own invoiced value.
    Measured,
    /// Estimated with the fallback invoice ratio.
    Inferred,
}

/// A committed amount divided into what has already hit P&L and what will.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlSplit {
    pub invoiced_actual: f64,
    pub future: f64,
    pub basis: SplitBasis,
}

impl PlSplit {
    pub fn total(&self) -> f64 {
        self.invoiced_actual + self.future
    }
}

/// Share of the line item that this mapping represents, capped at 1.
///
/// A zero or negative line value means the size of the line is unknown, so
/// the mapping is treated as covering the whole line.
pub fn allocation_ratio(mapped_amount: f64, line_value: f64) -> f64 {
    let safe_line_value = if line_value > 0.0 {
        line_value
    } else {
        mapped_amount
    };

    if safe_line_value > 0.0 {
        (mapped_amount / safe_line_value).min(1.0)
    } else {
        1.0
    }
}

/// Splits `mapped_amount` into invoiced and future portions for a resolved
/// line item. The two parts always sum to `mapped_amount`.
pub fn split_mapped_amount(
    mapped_amount: f64,
    line_item: &NormalizedLineItem,
    fallback_ratio: f64,
) -> PlSplit {
    match line_item.invoice {
        InvoiceTracking::Tracked { invoiced_value } => {
            let ratio = allocation_ratio(mapped_amount, line_item.line_value);
            let invoiced_actual = (invoiced_value * ratio).clamp(0.0, mapped_amount.max(0.0));
            PlSplit {
                invoiced_actual,
                future: mapped_amount - invoiced_actual,
                basis: SplitBasis::Measured,
            }
        }
        InvoiceTracking::Untracked => split_unresolved(mapped_amount, fallback_ratio),
    }
}

/// Flat heuristic split, used when there is no invoice data to go on.
pub fn split_unresolved(mapped_amount: f64, fallback_ratio: f64) -> PlSplit {
    let invoiced_actual = mapped_amount * fallback_ratio;
    PlSplit {
        invoiced_actual,
        future: mapped_amount - invoiced_actual,
        basis: SplitBasis::Inferred,
    }
}

/// Splits against an optional line item, falling back to the flat ratio when
/// the mapping's line item could not be found.
pub fn split_for_mapping(
    mapped_amount: f64,
    line_item: Option<&NormalizedLineItem>,
    fallback_ratio: f64,
) -> PlSplit {
    match line_item {
        Some(item) => split_mapped_amount(mapped_amount, item, fallback_ratio),
        None => split_unresolved(mapped_amount, fallback_ratio),
    }
}

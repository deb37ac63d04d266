use crate::error::{ReconciliationError, Result};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};

/// Divides `numerator` by `denominator`, returning 0.0 instead of NaN or infinity.
pub fn safe_divide(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        return 0.0;
    }
    let result = numerator / denominator;
    if result.is_finite() {
        result
    } else {
        0.0
    }
}

/// Percentage change of `change` relative to `base`, rounded to two decimals.
///
/// A zero base always yields 0.0, whatever the change.
pub fn safe_percentage(change: f64, base: f64) -> f64 {
    if base == 0.0 {
        return 0.0;
    }
    round_to(safe_divide(change, base) * 100.0, 2)
}

/// Like [`safe_percentage`], but a non-zero change over a zero base reports
/// the direction of the change as +100 or -100.
pub fn directional_percentage(change: f64, base: f64) -> f64 {
    if base == 0.0 {
        return match change {
            c if c > 0.0 => 100.0,
            c if c < 0.0 => -100.0,
            _ => 0.0,
        };
    }
    safe_percentage(change, base)
}

pub fn round_to(value: f64, places: u32) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    let factor = 10f64.powi(places as i32);
    (value * factor).round() / factor
}

/// Formats an amount as US dollars with thousands separators, e.g. `-$1,234.56`.
pub fn format_currency(amount: f64) -> String {
    let amount = if amount.is_finite() { amount } else { 0.0 };
    let cents = (amount.abs() * 100.0).round() as u64;
    let whole = (cents / 100).to_string();
    let fraction = cents % 100;

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    let sign = if amount < 0.0 && cents > 0 { "-" } else { "" };
    format!("{}${}.{:02}", sign, grouped, fraction)
}

pub fn format_percentage(value: f64, places: usize) -> String {
    let value = if value.is_finite() { value } else { 0.0 };
    format!("{:.*}%", places, value)
}

pub fn first_day_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

pub fn next_month_start(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };

    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(date)
}

pub fn last_day_of_month(year: i32, month: u32) -> NaiveDate {
    let next_month = if month == 12 { 1 } else { month + 1 };
    let next_year = if month == 12 { year + 1 } else { year };

    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .unwrap_or(NaiveDate::MAX)
}

/// Number of calendar-month boundaries between two dates (Jan 31 -> Feb 1 is 1).
pub fn months_between(start: NaiveDate, end: NaiveDate) -> i32 {
    let year_diff = end.year() - start.year();
    let month_diff = end.month() as i32 - start.month() as i32;
    year_diff * 12 + month_diff
}

/// Completed months from `start` to `as_of`; a month only counts once its
/// day-of-month has been reached again (Jan 15 -> Feb 14 is 0, -> Feb 15 is 1).
pub fn whole_months_elapsed(start: NaiveDate, as_of: NaiveDate) -> i32 {
    let mut months = months_between(start, as_of);
    if months > 0 && as_of.day() < start.day() {
        months -= 1;
    }
    months
}

/// First day of every month touched by `[start, end]`, in order.
pub fn month_starts_in_period(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut months = Vec::new();
    if end < start {
        return months;
    }

    let mut current = first_day_of_month(start);
    while current <= end {
        months.push(current);
        let next = next_month_start(current);
        if next == current {
            break;
        }
        current = next;
    }

    months
}

/// Parses a loosely formatted date: `YYYY-MM-DD`, RFC 3339, `YYYY-MM-DD HH:MM:SS`
/// or `YYYY-MM-DDTHH:MM:SS`. Returns `None` for anything else.
pub fn parse_flexible_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(timestamp.date_naive());
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
        .map(|dt| dt.date())
}

/// Parses a `YYYY-MM` month key into the first day of that month.
pub fn parse_month_key(key: &str) -> Result<NaiveDate> {
    let start_str = format!("{}-01", key.trim());
    NaiveDate::parse_from_str(&start_str, "%Y-%m-%d").map_err(|_| {
        ReconciliationError::DateError(format!(
            "Invalid month format: {}. Expected YYYY-MM",
            key
        ))
    })
}

/// Parses a period string in the format "YYYY-MM" or "YYYY-MM:YYYY-MM"
/// Returns (first day of the first month, last day of the last month)
pub fn parse_period_string(period: &str) -> Result<(NaiveDate, NaiveDate)> {
    let parts: Vec<&str> = period.split(':').collect();

    match parts.as_slice() {
        [single] => {
            let start = parse_month_key(single)?;
            Ok((start, last_day_of_month(start.year(), start.month())))
        }
        [from, to] => {
            let start = parse_month_key(from)?;
            let end_month = parse_month_key(to)?;
            Ok((start, last_day_of_month(end_month.year(), end_month.month())))
        }
        _ => Err(ReconciliationError::DateError(format!(
            "Invalid period format: {}. Expected 'YYYY-MM' or 'YYYY-MM:YYYY-MM'",
            period
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_safe_divide_never_produces_nan() {
        assert_eq!(safe_divide(10.0, 0.0), 0.0);
        assert_eq!(safe_divide(0.0, 0.0), 0.0);
        assert_eq!(safe_divide(10.0, 4.0), 2.5);
        assert_eq!(safe_divide(f64::MAX, f64::MIN_POSITIVE), 0.0);
    }

    #[test]
    fn test_safe_percentage_zero_base() {
        assert_eq!(safe_percentage(0.0, 0.0), 0.0);
        assert_eq!(safe_percentage(100.0, 0.0), 0.0);
        assert_eq!(safe_percentage(-100.0, 0.0), 0.0);
        assert!(!safe_percentage(f64::NAN, 0.0).is_nan());
    }

    #[test]
    fn test_safe_percentage_rounds_to_two_places() {
        assert_eq!(safe_percentage(1.0, 3.0), 33.33);
        assert_eq!(safe_percentage(-50.0, 200.0), -25.0);
    }

    #[test]
    fn test_directional_percentage() {
        assert_eq!(directional_percentage(100.0, 0.0), 100.0);
        assert_eq!(directional_percentage(-5.0, 0.0), -100.0);
        assert_eq!(directional_percentage(0.0, 0.0), 0.0);
        assert_eq!(directional_percentage(50.0, 200.0), 25.0);
    }

    #[test]
    fn test_format_currency() {
        assert_eq!(format_currency(0.0), "$0.00");
        assert_eq!(format_currency(1234.5), "$1,234.50");
        assert_eq!(format_currency(-1_234_567.891), "-$1,234,567.89");
        assert_eq!(format_currency(999.999), "$1,000.00");
        assert_eq!(format_currency(f64::NAN), "$0.00");
        assert_eq!(format_percentage(12.345, 1), "12.3%");
    }

    #[test]
    fn test_month_helpers() {
        assert_eq!(last_day_of_month(2024, 2), date(2024, 2, 29));
        assert_eq!(last_day_of_month(2023, 12), date(2023, 12, 31));
        assert_eq!(next_month_start(date(2023, 12, 15)), date(2024, 1, 1));
        assert_eq!(first_day_of_month(date(2023, 7, 19)), date(2023, 7, 1));
    }

    #[test]
    fn test_whole_months_elapsed() {
        assert_eq!(whole_months_elapsed(date(2024, 1, 15), date(2024, 2, 14)), 0);
        assert_eq!(whole_months_elapsed(date(2024, 1, 15), date(2024, 2, 15)), 1);
        assert_eq!(whole_months_elapsed(date(2023, 1, 1), date(2024, 1, 1)), 12);
        assert_eq!(whole_months_elapsed(date(2024, 6, 1), date(2024, 1, 1)), -5);
    }

    #[test]
    fn test_month_starts_in_period() {
        let months = month_starts_in_period(date(2023, 11, 20), date(2024, 2, 1));
        assert_eq!(
            months,
            vec![date(2023, 11, 1), date(2023, 12, 1), date(2024, 1, 1), date(2024, 2, 1)]
        );
        assert!(month_starts_in_period(date(2024, 2, 1), date(2024, 1, 1)).is_empty());
    }

    #[test]
    fn test_parse_flexible_date() {
        assert_eq!(parse_flexible_date("2024-03-05"), Some(date(2024, 3, 5)));
        assert_eq!(
            parse_flexible_date("2024-03-05T10:15:00Z"),
            Some(date(2024, 3, 5))
        );
        assert_eq!(
            parse_flexible_date("2024-03-05 23:59:59"),
            Some(date(2024, 3, 5))
        );
        assert_eq!(parse_flexible_date("next tuesday"), None);
        assert_eq!(parse_flexible_date(""), None);
    }

    #[test]
    fn test_parse_period_string_month_and_range() {
        let (start, end) = parse_period_string("2023-02").unwrap();
        assert_eq!(start, date(2023, 2, 1));
        assert_eq!(end, date(2023, 2, 28));

        let (start, end) = parse_period_string("2023-01:2023-03").unwrap();
        assert_eq!(start, date(2023, 1, 1));
        assert_eq!(end, date(2023, 3, 31));

        assert!(parse_period_string("2023-13").is_err());
        assert!(parse_period_string("2023-01:2023-02:2023-03").is_err());
    }
}

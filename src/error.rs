use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReconciliationError {
    #[error("Malformed record{}: {reason}", record_position(.index))]
    MalformedRecord {
        index: Option<usize>,
        reason: String,
    },

    #[error("Invalid fallback invoice ratio {0}: must be between 0.0 and 1.0")]
    InvalidFallbackRatio(f64),

    #[error("Invalid unmapped estimate ratio {0}: must be between 0.0 and 1.0")]
    InvalidEstimateRatio(f64),

    #[error("Invalid date window: end {end} is before start {start}")]
    InvalidDateWindow { start: NaiveDate, end: NaiveDate },

    #[error("Date calculation error: {0}")]
    DateError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

fn record_position(index: &Option<usize>) -> String {
    index.map(|i| format!(" #{}", i)).unwrap_or_default()
}

pub type Result<T> = std::result::Result<T, ReconciliationError>;

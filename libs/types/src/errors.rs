//! Error types for feed record parsing
//!
//! A parse failure never aborts the pipeline: the line is discarded and
//! the failure is counted under its `reason()` label.

use thiserror::Error;

/// Why a feed line could not become a `TransactionRecord`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Wrong field count: expected {expected}, got {actual}")]
    FieldCount { expected: usize, actual: usize },

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Value out of range: {0}")]
    ValueOutOfRange(String),

    #[error("Invalid date: {0}")]
    InvalidDate(String),

    #[error("Invalid time: {0}")]
    InvalidTime(String),

    #[error("Invalid month-year: {0}")]
    InvalidMonthYear(String),
}

impl ParseError {
    /// Stable label used as a log field and counter dimension.
    pub fn reason(&self) -> &'static str {
        match self {
            ParseError::FieldCount { .. } => "field_count",
            ParseError::InvalidValue(_) => "invalid_value",
            ParseError::ValueOutOfRange(_) => "value_out_of_range",
            ParseError::InvalidDate(_) => "invalid_date",
            ParseError::InvalidTime(_) => "invalid_time",
            ParseError::InvalidMonthYear(_) => "invalid_month_year",
        }
    }
}

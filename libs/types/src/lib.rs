//! Types library for the transaction aggregation pipeline
//!
//! Shared domain model for every pipeline stage: records parsed from the
//! feed, the keys they are grouped under, and value handling.
//!
//! # Modules
//! - `record`: Validated transaction records and feed date/time parsing
//! - `keys`: Grouping keys (`MonthYear`, `GroupKey`)
//! - `numeric`: Feed value normalization and zero-guarded averages
//! - `errors`: Parse error taxonomy

pub mod errors;
pub mod keys;
pub mod numeric;
pub mod record;

//! Decimal handling for transaction values
//!
//! Uses rust_decimal for exact arithmetic so that sums, maxima and minima
//! are identical no matter how a batch is partitioned.

use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};

use crate::errors::ParseError;

/// Decimal places kept on published averages (values are currency).
pub const AVERAGE_SCALE: u32 = 2;

/// Largest magnitude accepted for a single feed value.
///
/// Cumulative sums stay far inside `Decimal`'s range: reaching it takes
/// roughly 10^13 values of this size.
pub const MAX_FEED_MAGNITUDE: i64 = 1_000_000_000_000_000;

/// Normalize a feed value to a plain decimal string.
///
/// A value containing `,` uses the decimal-comma, thousands-dot
/// convention (`1.234,56` -> `1234.56`). Anything else is taken as an
/// already plain decimal.
pub fn normalize_feed_value(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.contains(',') {
        trimmed.replace('.', "").replace(',', ".")
    } else {
        trimmed.to_string()
    }
}

/// Parse a feed value into a `Decimal`.
///
/// Values beyond `MAX_FEED_MAGNITUDE` in either direction are rejected.
pub fn parse_feed_value(raw: &str) -> Result<Decimal, ParseError> {
    let normalized = normalize_feed_value(raw);
    if normalized.is_empty() {
        return Err(ParseError::InvalidValue(raw.to_string()));
    }
    let value =
        Decimal::from_str(&normalized).map_err(|_| ParseError::InvalidValue(raw.to_string()))?;
    if value.abs() > Decimal::from(MAX_FEED_MAGNITUDE) {
        return Err(ParseError::ValueOutOfRange(raw.to_string()));
    }
    Ok(value)
}

/// `total / count`, or zero when `count` is zero.
///
/// Rounded to `AVERAGE_SCALE` places with banker's rounding.
pub fn average(total: Decimal, count: u64) -> Decimal {
    if count == 0 {
        return Decimal::ZERO;
    }
    (total / Decimal::from(count))
        .round_dp_with_strategy(AVERAGE_SCALE, RoundingStrategy::MidpointNearestEven)
}

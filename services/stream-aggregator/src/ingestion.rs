//! Feed line ingestion
//!
//! Turns raw `id;value;date;time;institution;type` lines into validated
//! `TransactionRecord`s. Lines that fail validation are discarded and
//! counted by reason; they never reach the aggregate state.

use std::collections::BTreeMap;

use tracing::debug;
use txn_types::errors::ParseError;
use txn_types::numeric::parse_feed_value;
use txn_types::record::{parse_feed_date, parse_feed_time, TransactionRecord};

/// Field separator of the feed wire format.
pub const FIELD_SEPARATOR: char = ';';

/// Number of fields in a feed line.
pub const FIELD_COUNT: usize = 6;

/// Parse one feed line into a validated record.
pub fn parse_line(line: &str) -> Result<TransactionRecord, ParseError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let fields: Vec<&str> = line.split(FIELD_SEPARATOR).map(str::trim).collect();

    let [id, value, date, time, institution, kind] = fields.as_slice() else {
        return Err(ParseError::FieldCount {
            expected: FIELD_COUNT,
            actual: fields.len(),
        });
    };

    Ok(TransactionRecord {
        id: id.to_string(),
        value: parse_feed_value(value)?,
        date: parse_feed_date(date)?,
        time: parse_feed_time(time)?,
        institution: institution.to_string(),
        kind: kind.to_string(),
    })
}

/// Records parsed from a slice of raw lines, plus what was thrown away.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedBatch {
    pub records: Vec<TransactionRecord>,
    /// Rejected line count keyed by `ParseError::reason()`.
    pub rejected: BTreeMap<&'static str, u64>,
    /// Blank lines skipped without counting as rejections.
    pub blank: u64,
}

impl ParsedBatch {
    /// Parse every line of `lines`.
    pub fn parse(lines: &[String]) -> Self {
        let mut batch = Self::default();
        for line in lines {
            batch.push_line(line);
        }
        batch
    }

    /// Parse a single line into this batch.
    pub fn push_line(&mut self, line: &str) {
        if line.trim().is_empty() {
            self.blank += 1;
            return;
        }
        match parse_line(line) {
            Ok(record) => self.records.push(record),
            Err(err) => {
                debug!(reason = err.reason(), error = %err, line, "Discarding malformed feed line");
                *self.rejected.entry(err.reason()).or_insert(0) += 1;
            }
        }
    }

    pub fn accepted(&self) -> u64 {
        self.records.len() as u64
    }

    pub fn rejected_total(&self) -> u64 {
        self.rejected.values().sum()
    }
}

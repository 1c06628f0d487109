//! Grouping keys for the aggregate state
//!
//! Every key type has a total order so that `BTreeMap` iteration, and
//! therefore every rollup built from it, is deterministic.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::ParseError;

/// Calendar month, displayed as `yyyy-mm`.
///
/// Field order makes the derived `Ord` chronological.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MonthYear {
    year: i32,
    month: u32,
}

impl MonthYear {
    /// Returns `None` unless `month` is in 1..=12.
    pub fn new(year: i32, month: u32) -> Option<Self> {
        if (1..=12).contains(&month) {
            Some(Self { year, month })
        } else {
            None
        }
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }
}

impl fmt::Display for MonthYear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for MonthYear {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseError::InvalidMonthYear(s.to_string());
        let (year, month) = s.trim().split_once('-').ok_or_else(invalid)?;
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        Self::new(year, month).ok_or_else(invalid)
    }
}

impl Serialize for MonthYear {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MonthYear {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Hour of day, 0..=23.
pub type HourOfDay = u8;

/// Grouping key of the aggregate state: (month-year, institution, type, hour).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKey {
    pub month: MonthYear,
    pub institution: String,
    pub kind: String,
    pub hour: HourOfDay,
}

impl GroupKey {
    pub fn new(
        month: MonthYear,
        institution: impl Into<String>,
        kind: impl Into<String>,
        hour: HourOfDay,
    ) -> Self {
        Self {
            month,
            institution: institution.into(),
            kind: kind.into(),
            hour,
        }
    }
}

//! Transaction records as delivered by the feed
//!
//! A record lives only until it is folded into the aggregate state.

use chrono::{NaiveDate, NaiveTime, Timelike};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::ParseError;
use crate::keys::{GroupKey, HourOfDay, MonthYear};

/// `dd/mm/yyyy`
pub const FEED_DATE_FORMAT: &str = "%d/%m/%Y";

/// `hh:mm`; `hh:mm:ss` is tolerated.
pub const FEED_TIME_FORMATS: [&str; 2] = ["%H:%M", "%H:%M:%S"];

/// One validated transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: String,
    pub value: Decimal,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub institution: String,
    /// Transaction type (PIX, TED, ...).
    pub kind: String,
}

impl TransactionRecord {
    pub fn hour(&self) -> HourOfDay {
        // NaiveTime guarantees 0..=23
        self.time.hour() as HourOfDay
    }

    pub fn month_year(&self) -> MonthYear {
        MonthYear::from_date(self.date)
    }

    pub fn group_key(&self) -> GroupKey {
        GroupKey::new(
            self.month_year(),
            self.institution.clone(),
            self.kind.clone(),
            self.hour(),
        )
    }
}

/// Parse a feed date (`dd/mm/yyyy`).
pub fn parse_feed_date(raw: &str) -> Result<NaiveDate, ParseError> {
    NaiveDate::parse_from_str(raw.trim(), FEED_DATE_FORMAT)
        .map_err(|_| ParseError::InvalidDate(raw.to_string()))
}

/// Parse a feed time (`hh:mm`).
pub fn parse_feed_time(raw: &str) -> Result<NaiveTime, ParseError> {
    let trimmed = raw.trim();
    FEED_TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(trimmed, fmt).ok())
        .ok_or_else(|| ParseError::InvalidTime(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn sample() -> TransactionRecord {
        TransactionRecord {
            id: "1".to_string(),
            value: Decimal::from_str("1234.56").unwrap(),
            date: parse_feed_date("15/03/2024").unwrap(),
            time: parse_feed_time("10:30").unwrap(),
            institution: "BankA".to_string(),
            kind: "PIX".to_string(),
        }
    }

    #[test]
    fn test_group_key_derivation() {
        let key = sample().group_key();
        assert_eq!(key.month.to_string(), "2024-03");
        assert_eq!(key.institution, "BankA");
        assert_eq!(key.kind, "PIX");
        assert_eq!(key.hour, 10);
    }

    #[test]
    fn test_parse_feed_date() {
        let date = parse_feed_date("01/12/2023").unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2023, 12, 1).unwrap());
    }

    #[test]
    fn test_parse_feed_date_rejects_other_layouts() {
        assert!(parse_feed_date("2024-03-15").is_err());
        assert!(parse_feed_date("31/02/2024").is_err());
        assert!(parse_feed_date("").is_err());
    }

    #[test]
    fn test_parse_feed_time() {
        assert_eq!(parse_feed_time("00:00").unwrap().hour(), 0);
        assert_eq!(parse_feed_time("23:59").unwrap().hour(), 23);
        assert_eq!(parse_feed_time("07:15:42").unwrap().hour(), 7);
    }

    #[test]
    fn test_parse_feed_time_rejects_out_of_range() {
        assert!(matches!(
            parse_feed_time("24:00"),
            Err(ParseError::InvalidTime(_))
        ));
        assert!(parse_feed_time("ten").is_err());
    }
}

//! Timestamp normalization.
//!
//! Everything that reaches storage is a `DateTime<Utc>`. Incoming values may
//! be epoch seconds (integer or fractional) or RFC 3339 strings that carry an
//! explicit offset. Strings without an offset are rejected rather than being
//! guessed at as local time.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serializer};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum TimestampError {
    #[error("timestamp '{0}' has no timezone offset")]
    Naive(String),
    #[error("timestamp '{0}' is not RFC 3339")]
    Malformed(String),
    #[error("epoch value {0} is out of range")]
    OutOfRange(f64),
}

/// Fixed-width UTC text with microseconds. Lexical order equals time order.
pub fn to_storage(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn from_storage(value: &str) -> Result<DateTime<Utc>, TimestampError> {
    parse_zoned(value)
}

/// Parse an RFC 3339 string with an explicit offset and convert it to UTC.
pub fn parse_zoned(value: &str) -> Result<DateTime<Utc>, TimestampError> {
    match DateTime::parse_from_rfc3339(value) {
        Ok(ts) => Ok(ts.with_timezone(&Utc)),
        Err(_) if is_naive(value) => Err(TimestampError::Naive(value.to_string())),
        Err(_) => Err(TimestampError::Malformed(value.to_string())),
    }
}

pub fn from_epoch_seconds(secs: f64) -> Result<DateTime<Utc>, TimestampError> {
    if !secs.is_finite() {
        return Err(TimestampError::OutOfRange(secs));
    }
    let whole = secs.floor();
    let micros = (((secs - whole) * 1_000_000.0).round() as u32).min(999_999);
    DateTime::from_timestamp(whole as i64, micros * 1_000).ok_or(TimestampError::OutOfRange(secs))
}

fn is_naive(value: &str) -> bool {
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .any(|fmt| NaiveDateTime::parse_from_str(value, fmt).is_ok())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Epoch(f64),
    Text(String),
}

impl RawTimestamp {
    fn normalize(self) -> Result<DateTime<Utc>, TimestampError> {
        match self {
            Self::Epoch(secs) => from_epoch_seconds(secs),
            Self::Text(text) => parse_zoned(&text),
        }
    }
}

/// `#[serde(with = "covbot_types::time::zoned")]` for required timestamps.
pub mod zoned {
    use super::*;

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&to_storage(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        RawTimestamp::deserialize(d)?
            .normalize()
            .map_err(serde::de::Error::custom)
    }
}

/// `#[serde(default, with = "covbot_types::time::zoned_opt")]` for nullable timestamps.
pub mod zoned_opt {
    use super::*;

    pub fn serialize<S: Serializer>(ts: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
        match ts {
            Some(ts) => s.serialize_some(&to_storage(ts)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
        Option::<RawTimestamp>::deserialize(d)?
            .map(RawTimestamp::normalize)
            .transpose()
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn offset_strings_are_converted_to_utc() {
        let ts = parse_zoned("2023-05-31T14:34:56+02:00").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2023, 5, 31, 12, 34, 56).unwrap());
    }

    #[test]
    fn naive_strings_are_rejected() {
        assert_eq!(
            parse_zoned("2023-05-31T12:34:56"),
            Err(TimestampError::Naive("2023-05-31T12:34:56".into()))
        );
        assert!(matches!(
            parse_zoned("yesterday"),
            Err(TimestampError::Malformed(_))
        ));
    }

    #[test]
    fn epoch_seconds_keep_sub_second_precision() {
        let ts = from_epoch_seconds(1_685_536_496.25).unwrap();
        assert_eq!(ts.timestamp(), 1_685_536_496);
        assert_eq!(ts.timestamp_subsec_micros(), 250_000);
        assert!(from_epoch_seconds(f64::NAN).is_err());
    }

    #[test]
    fn storage_format_sorts_chronologically() {
        let early = Utc.with_ymd_and_hms(2023, 1, 2, 3, 4, 5).unwrap();
        let late = early + chrono::Duration::microseconds(1);
        let (a, b) = (to_storage(&early), to_storage(&late));
        assert_eq!(a, "2023-01-02T03:04:05.000000Z");
        assert_eq!(a.len(), b.len());
        assert!(a < b);
        assert_eq!(from_storage(&b).unwrap(), late);
    }

    #[test]
    fn serde_accepts_epoch_and_zoned_text() {
        #[derive(Deserialize)]
        struct Row {
            #[serde(with = "zoned")]
            at: DateTime<Utc>,
            #[serde(default, with = "zoned_opt")]
            expires: Option<DateTime<Utc>>,
        }

        let row: Row = serde_json::from_str(r#"{"at": 1685536496}"#).unwrap();
        assert_eq!(row.at.timestamp(), 1_685_536_496);
        assert!(row.expires.is_none());

        let row: Row =
            serde_json::from_str(r#"{"at": "2023-05-31T12:34:56Z", "expires": 1685540096}"#)
                .unwrap();
        assert_eq!(row.expires.unwrap() - row.at, chrono::Duration::hours(1));

        assert!(serde_json::from_str::<Row>(r#"{"at": "2023-05-31 12:34:56"}"#).is_err());
    }
}

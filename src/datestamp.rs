//! Timestamp conversions between the index, Solr range queries, and the
//! protocol.
//!
//! Solr stores `last_modified` as ISO-8601 text. Range boundaries in filter
//! queries use the "long" form `YYYY-MM-DDThh:mm:ss[.fff]Z`; sub-second
//! digits are only emitted when present so the conversion never loses
//! precision.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};

use crate::models::Granularity;

/// Formats a timestamp in the long wire format used for Solr range bounds.
pub fn datestamp_long(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Parses an ISO-8601 timestamp as stored in the index.
///
/// Accepts RFC 3339 with any offset, a naive date-time (taken as UTC), or a
/// bare date (midnight UTC).
pub fn parse_index_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Parses a protocol datestamp argument, strictly `YYYY-MM-DD` or
/// `YYYY-MM-DDThh:mm:ssZ`, and reports the granularity it was given in.
/// Date-only values resolve to midnight UTC.
pub fn parse_datestamp(value: &str) -> Option<(DateTime<Utc>, Granularity)> {
    match value.len() {
        10 => NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| (naive.and_utc(), Granularity::Day)),
        20 => NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%SZ")
            .ok()
            .map(|naive| (naive.and_utc(), Granularity::Seconds)),
        _ => None,
    }
}

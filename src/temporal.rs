//! Timestamp parsing and calendar field extraction.
//!
//! Timestamps are kept as wall-clock time: an explicit UTC offset in the
//! source text is dropped rather than applied, so `2024-03-15T10:00:00` and
//! `2024-03-15T10:00:00+05:00` land in the same year and month.

use arrow2::datatypes::TimeUnit;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];

pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_local());
    }
    if let Ok(dt) = DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%z") {
        return Some(dt.naive_local());
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(dt);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(text, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    None
}

pub fn to_millis(dt: &NaiveDateTime) -> i64 {
    dt.and_utc().timestamp_millis()
}

/// Convert a stored timestamp value back into wall-clock time.
pub fn from_timestamp(value: i64, unit: TimeUnit) -> Option<NaiveDateTime> {
    let (secs, nanos) = match unit {
        TimeUnit::Second => (value, 0),
        TimeUnit::Millisecond => (value.div_euclid(1_000), value.rem_euclid(1_000) * 1_000_000),
        TimeUnit::Microsecond => (
            value.div_euclid(1_000_000),
            value.rem_euclid(1_000_000) * 1_000,
        ),
        TimeUnit::Nanosecond => (
            value.div_euclid(1_000_000_000),
            value.rem_euclid(1_000_000_000),
        ),
    };
    DateTime::from_timestamp(secs, nanos as u32).map(|dt| dt.naive_utc())
}

pub fn from_date32(days: i32) -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(1970, 1, 1)
        .and_then(|epoch| epoch.checked_add_signed(chrono::Duration::days(days as i64)))
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

pub fn year_of(dt: &NaiveDateTime) -> i32 {
    dt.year()
}

pub fn month_of(dt: &NaiveDateTime) -> i32 {
    dt.month() as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_is_dropped_not_applied() {
        let plain = parse_timestamp("2024-03-15T10:00:00").unwrap();
        let offset = parse_timestamp("2024-03-15T10:00:00+05:00").unwrap();
        let zulu = parse_timestamp("2024-03-15T10:00:00Z").unwrap();
        assert_eq!(plain, offset);
        assert_eq!(plain, zulu);
        assert_eq!((year_of(&plain), month_of(&plain)), (2024, 3));
    }

    #[test]
    fn accepts_catalog_formats() {
        for text in [
            "2024-03-15 10:00:00",
            "2024-03-15 10:00",
            "03/15/2024 10:00",
            "2024-03-15",
        ] {
            let dt = parse_timestamp(text).unwrap_or_else(|| panic!("{text}"));
            assert_eq!((year_of(&dt), month_of(&dt)), (2024, 3), "{text}");
        }
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn millis_round_trip_before_epoch() {
        let dt = parse_timestamp("1969-12-31T23:59:59.500").unwrap();
        let back = from_timestamp(to_millis(&dt), TimeUnit::Millisecond).unwrap();
        assert_eq!(back, dt);
    }

    #[test]
    fn date32_maps_to_midnight() {
        let dt = from_date32(19_797).unwrap();
        assert_eq!(dt.to_string(), "2024-03-15 00:00:00");
    }
}

//! Time bucket kinds and UTC boundary math
//!
//! Maps an order timestamp to its DAY/WEEK/MONTH bucket. All boundaries are
//! computed in UTC and are inclusive-start/exclusive-end (`[start, end)`):
//! day truncation for DAY, the most recent Monday for WEEK, the first of the
//! month for MONTH. Keeping the math on the kind enum itself keeps every
//! consumer (aggregator, stores, query) on identical boundaries.

use chrono::{DateTime, Datelike, Duration, Months, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Supported aggregation bucket granularities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BucketKind {
    /// Calendar day, UTC
    Day,
    /// Calendar week starting Monday, UTC
    Week,
    /// Calendar month, UTC
    Month,
}

/// Error for unrecognized bucket kind labels.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown bucket type: {0} (expected DAY, WEEK, or MONTH)")]
pub struct ParseBucketKindError(pub String);

impl BucketKind {
    /// All bucket kinds, in ascending granularity order.
    pub fn all() -> &'static [BucketKind] {
        &[BucketKind::Day, BucketKind::Week, BucketKind::Month]
    }

    /// Wire/storage label for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            BucketKind::Day => "DAY",
            BucketKind::Week => "WEEK",
            BucketKind::Month => "MONTH",
        }
    }

    /// Start of the bucket containing `ts` (floor to the period boundary).
    pub fn bucket_start(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let date = ts.date_naive();
        let start_date = match self {
            BucketKind::Day => date,
            // Most recent Monday at or before the date
            BucketKind::Week => {
                date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
            }
            // First day of the month; day0() is the zero-based day-of-month
            BucketKind::Month => date - Duration::days(i64::from(date.day0())),
        };
        Utc.from_utc_datetime(&start_date.and_time(NaiveTime::MIN))
    }

    /// Exclusive end of the bucket beginning at `start`.
    ///
    /// `start` must be a value produced by [`bucket_start`]; MONTH buckets
    /// span one calendar month (28-31 days), not a fixed length.
    ///
    /// [`bucket_start`]: BucketKind::bucket_start
    pub fn bucket_end(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            BucketKind::Day => start + Duration::days(1),
            BucketKind::Week => start + Duration::days(7),
            BucketKind::Month => start + Months::new(1),
        }
    }

    /// Whether `ts` falls inside the bucket beginning at `start`.
    pub fn contains(&self, start: DateTime<Utc>, ts: DateTime<Utc>) -> bool {
        ts >= start && ts < self.bucket_end(start)
    }
}

impl fmt::Display for BucketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BucketKind {
    type Err = ParseBucketKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DAY" => Ok(BucketKind::Day),
            "WEEK" => Ok(BucketKind::Week),
            "MONTH" => Ok(BucketKind::Month),
            other => Err(ParseBucketKindError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_day_bucket_truncates_to_midnight() {
        let start = BucketKind::Day.bucket_start(ts("2024-01-01T10:30:45Z"));
        assert_eq!(start, ts("2024-01-01T00:00:00Z"));
        assert_eq!(BucketKind::Day.bucket_end(start), ts("2024-01-02T00:00:00Z"));
    }

    #[test]
    fn test_week_bucket_starts_monday() {
        // 2024-01-01 is a Monday
        let start = BucketKind::Week.bucket_start(ts("2024-01-01T00:00:00Z"));
        assert_eq!(start, ts("2024-01-01T00:00:00Z"));
        assert_eq!(BucketKind::Week.bucket_end(start), ts("2024-01-08T00:00:00Z"));
    }

    #[test]
    fn test_sunday_belongs_to_previous_monday_week() {
        // 2024-01-07 is the Sunday closing the week of 2024-01-01
        let start = BucketKind::Week.bucket_start(ts("2024-01-07T23:59:59Z"));
        assert_eq!(start, ts("2024-01-01T00:00:00Z"));
    }

    #[test]
    fn test_midweek_rolls_back_to_monday() {
        // 2024-01-04 is a Thursday
        let start = BucketKind::Week.bucket_start(ts("2024-01-04T12:00:00Z"));
        assert_eq!(start, ts("2024-01-01T00:00:00Z"));
    }

    #[test]
    fn test_month_bucket_first_of_month() {
        let start = BucketKind::Month.bucket_start(ts("2024-01-15T08:00:00Z"));
        assert_eq!(start, ts("2024-01-01T00:00:00Z"));
        assert_eq!(
            BucketKind::Month.bucket_end(start),
            ts("2024-02-01T00:00:00Z")
        );
    }

    #[test]
    fn test_month_bucket_end_spans_calendar_month() {
        // February 2024 is a leap month: 29 days
        let feb = BucketKind::Month.bucket_start(ts("2024-02-29T23:59:59Z"));
        assert_eq!(feb, ts("2024-02-01T00:00:00Z"));
        assert_eq!(BucketKind::Month.bucket_end(feb), ts("2024-03-01T00:00:00Z"));

        // April has 30 days
        let apr = BucketKind::Month.bucket_start(ts("2024-04-30T00:00:00Z"));
        assert_eq!(BucketKind::Month.bucket_end(apr), ts("2024-05-01T00:00:00Z"));
    }

    #[test]
    fn test_week_across_month_boundary() {
        // 2024-02-01 is a Thursday; its week starts Monday 2024-01-29
        let start = BucketKind::Week.bucket_start(ts("2024-02-01T00:00:00Z"));
        assert_eq!(start, ts("2024-01-29T00:00:00Z"));
    }

    #[test]
    fn test_contains() {
        let start = BucketKind::Day.bucket_start(ts("2024-01-01T10:00:00Z"));
        assert!(BucketKind::Day.contains(start, ts("2024-01-01T00:00:00Z")));
        assert!(BucketKind::Day.contains(start, ts("2024-01-01T23:59:59Z")));
        assert!(!BucketKind::Day.contains(start, ts("2024-01-02T00:00:00Z")));
    }

    #[test]
    fn test_labels_roundtrip() {
        for kind in BucketKind::all() {
            assert_eq!(kind.as_str().parse::<BucketKind>().unwrap(), *kind);
        }
        assert_eq!("day".parse::<BucketKind>().unwrap(), BucketKind::Day);
        assert!("HOUR".parse::<BucketKind>().is_err());
    }

    #[test]
    fn test_serde_uppercase_labels() {
        assert_eq!(serde_json::to_string(&BucketKind::Week).unwrap(), "\"WEEK\"");
        let kind: BucketKind = serde_json::from_str("\"MONTH\"").unwrap();
        assert_eq!(kind, BucketKind::Month);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn arb_timestamp() -> impl Strategy<Value = DateTime<Utc>> {
        // 2000-01-01 .. 2100-01-01, second precision
        (946_684_800i64..4_102_444_800i64).prop_map(|secs| {
            DateTime::<Utc>::from_timestamp(secs, 0).unwrap()
        })
    }

    proptest! {
        #[test]
        fn prop_bucket_contains_its_timestamp(ts in arb_timestamp()) {
            for kind in BucketKind::all() {
                let start = kind.bucket_start(ts);
                prop_assert!(start <= ts);
                prop_assert!(ts < kind.bucket_end(start));
            }
        }

        #[test]
        fn prop_bucket_start_is_idempotent(ts in arb_timestamp()) {
            for kind in BucketKind::all() {
                let start = kind.bucket_start(ts);
                prop_assert_eq!(kind.bucket_start(start), start);
            }
        }

        #[test]
        fn prop_week_starts_on_monday(ts in arb_timestamp()) {
            let start = BucketKind::Week.bucket_start(ts);
            prop_assert_eq!(start.weekday(), chrono::Weekday::Mon);
        }

        #[test]
        fn prop_month_starts_on_first(ts in arb_timestamp()) {
            let start = BucketKind::Month.bucket_start(ts);
            prop_assert_eq!(start.day(), 1);
        }

        #[test]
        fn prop_bucket_start_at_midnight(ts in arb_timestamp()) {
            for kind in BucketKind::all() {
                let start = kind.bucket_start(ts);
                prop_assert_eq!(start.time(), NaiveTime::MIN);
            }
        }
    }
}

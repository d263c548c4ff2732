//!
//! The trigger module describes what the archive ingestion lambda can be invoked with
//!
use chrono::prelude::*;
use ghpulse::archive::ArchiveHour;
use ghpulse::{ArchiveError, ArchiveResult};
use serde::{Deserialize, Serialize};

use std::fmt;
use std::str::FromStr;

/// Identifier EventBridge schedules put in the `source` field
pub const SCHEDULER_SOURCE: &str = "aws.events";
/// Identifier used by manual or backfill invocations
pub const BACKFILL_SOURCE: &str = "ghpulse.backfill";

/// The allow-listed invokers of an ingestion
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Source {
    Scheduler,
    Backfill,
}

impl FromStr for Source {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            SCHEDULER_SOURCE => Ok(Source::Scheduler),
            BACKFILL_SOURCE => Ok(Source::Backfill),
            other => Err(ArchiveError::Validation(format!(
                "event source `{other}` is not allowed"
            ))),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Scheduler => write!(f, "{SCHEDULER_SOURCE}"),
            Source::Backfill => write!(f, "{BACKFILL_SOURCE}"),
        }
    }
}

/// Payload of an ingestion invocation.
///
/// Scheduled events carry a great deal more than this, everything else is ignored.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct TriggerPayload {
    pub source: String,
    /// The time of a scheduled event
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub month: Option<u32>,
    #[serde(default)]
    pub day: Option<u32>,
    #[serde(default)]
    pub hour: Option<u32>,
}

impl TriggerPayload {
    pub fn source(&self) -> ArchiveResult<Source> {
        self.source.parse()
    }

    /// Decide which archive hour this invocation should ingest.
    ///
    /// Scheduled invocations read the hour `lag_hours` behind the event time (or `now`), while
    /// backfill invocations must name the hour explicitly.
    pub fn archive_hour(&self, now: DateTime<Utc>, lag_hours: u32) -> ArchiveResult<ArchiveHour> {
        match self.source()? {
            Source::Scheduler => Ok(ArchiveHour::previous(self.time.unwrap_or(now), lag_hours)),
            Source::Backfill => match (self.year, self.month, self.day, self.hour) {
                (Some(year), Some(month), Some(day), Some(hour)) => {
                    ArchiveHour::new(year, month, day, hour)
                }
                _ => Err(ArchiveError::Validation(
                    "backfill triggers require year, month, day and hour".into(),
                )),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduled_event() {
        let buf = r#"{
            "version": "0",
            "id": "53dc4d37-cffa-4f76-80c9-8b7d4a4d2eaa",
            "detail-type": "Scheduled Event",
            "source": "aws.events",
            "account": "123456789012",
            "time": "2019-10-08T16:53:06Z",
            "region": "us-east-1",
            "resources": ["arn:aws:events:us-east-1:123456789012:rule/hourly"],
            "detail": {}
        }"#;
        let payload: TriggerPayload = serde_json::from_str(buf).expect("Failed to deserialize");
        let now = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            ArchiveHour::new(2019, 10, 8, 15).unwrap(),
            payload.archive_hour(now, 1).unwrap(),
            "the event time should win over the wall clock"
        );
    }

    #[test]
    fn test_scheduled_without_time_uses_now() {
        let payload = TriggerPayload {
            source: SCHEDULER_SOURCE.into(),
            ..Default::default()
        };
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 10, 0).unwrap();
        assert_eq!(
            ArchiveHour::new(2023, 12, 31, 22).unwrap(),
            payload.archive_hour(now, 2).unwrap()
        );
    }

    #[test]
    fn test_backfill_event() {
        let payload: TriggerPayload = serde_json::from_str(
            r#"{"source":"ghpulse.backfill","year":2019,"month":1,"day":2,"hour":3}"#,
        )
        .unwrap();
        assert_eq!(
            ArchiveHour::new(2019, 1, 2, 3).unwrap(),
            payload.archive_hour(Utc::now(), 1).unwrap()
        );

        let incomplete: TriggerPayload =
            serde_json::from_str(r#"{"source":"ghpulse.backfill","year":2019}"#).unwrap();
        assert!(matches!(
            incomplete.archive_hour(Utc::now(), 1),
            Err(ArchiveError::Validation(_))
        ));
    }

    #[test]
    fn test_unknown_source_rejected() {
        let payload = TriggerPayload {
            source: "someone.else".into(),
            year: Some(2019),
            month: Some(1),
            day: Some(1),
            hour: Some(1),
            ..Default::default()
        };
        let err = payload.archive_hour(Utc::now(), 1).unwrap_err();
        assert_eq!(400, err.status());
    }
}

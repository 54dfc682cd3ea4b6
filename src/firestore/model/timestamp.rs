use std::cmp::Ordering;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

use crate::firestore::error::{invalid_argument, FirestoreResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanos: i32,
}

impl Timestamp {
    pub fn new(seconds: i64, nanos: i32) -> Self {
        let mut timestamp = Self { seconds, nanos };
        timestamp.normalize();
        timestamp
    }

    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    pub fn from_system_time(time: SystemTime) -> Self {
        match time.duration_since(UNIX_EPOCH) {
            Ok(duration) => Self::new(duration.as_secs() as i64, duration.subsec_nanos() as i32),
            Err(err) => {
                let duration = err.duration();
                Self::new(
                    -(duration.as_secs() as i64),
                    -(duration.subsec_nanos() as i32),
                )
            }
        }
    }

    pub fn to_system_time(&self) -> SystemTime {
        if self.seconds >= 0 {
            UNIX_EPOCH + Duration::from_secs(self.seconds as u64) + Duration::from_nanos(self.nanos as u64)
        } else {
            UNIX_EPOCH - Duration::from_secs((-self.seconds) as u64) + Duration::from_nanos(self.nanos as u64)
        }
    }

    /// Parses an RFC 3339 string such as `2024-03-01T12:00:00.5Z`.
    pub fn from_rfc3339(value: &str) -> FirestoreResult<Self> {
        let parsed = DateTime::parse_from_rfc3339(value)
            .map_err(|err| invalid_argument(format!("Invalid timestamp '{value}': {err}")))?;
        let utc = parsed.with_timezone(&Utc);
        Ok(Self::new(utc.timestamp(), utc.timestamp_subsec_nanos() as i32))
    }

    /// Wire representation used by the JSON serializer.
    pub fn to_rfc3339(&self) -> String {
        match Utc.timestamp_opt(self.seconds, self.nanos as u32).single() {
            Some(datetime) => datetime.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            None => format!("{}.{:09}", self.seconds, self.nanos),
        }
    }

    // Keeps nanos in [0, 1e9) so ordering only has to compare fields.
    fn normalize(&mut self) {
        let extra_seconds = self.nanos.div_euclid(1_000_000_000);
        self.seconds += extra_seconds as i64;
        self.nanos = self.nanos.rem_euclid(1_000_000_000);
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.seconds
            .cmp(&other.seconds)
            .then_with(|| self.nanos.cmp(&other.nanos))
    }
}

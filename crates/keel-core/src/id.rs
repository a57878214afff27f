//! Apply run identifiers.

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one apply or destroy run. UUIDv7, so runs sort by start time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display)]
#[display("run-{_0}")]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Start time encoded in the id, at millisecond precision.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        let (secs, nanos) = self.0.get_timestamp()?.to_unix();
        DateTime::from_timestamp(secs as i64, nanos)
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_ids_are_distinct() {
        let first = RunId::new();
        let second = RunId::new();
        assert_ne!(first, second);
        assert!(first.to_string().starts_with("run-"));
    }

    #[test]
    fn test_started_at_is_recent() {
        let before = Utc::now() - chrono::Duration::seconds(1);
        let started = RunId::new().started_at().unwrap();
        assert!(started >= before);
    }
}

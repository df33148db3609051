use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Counters for the learning module.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LearningMetrics {
    /// Consolidation passes completed.
    pub cycles: u64,

    /// Interactions recorded since start.
    pub events_recorded: u64,

    /// Interactions recorded below the quality floor or evicted from the backlog.
    pub events_discarded: u64,

    /// Pending candidates examined this cycle.
    pub candidates_seen: u64,

    /// Clusters found this cycle.
    pub clusters: u64,

    /// Facts promoted this cycle.
    pub promoted: u64,

    /// Candidates rejected by the consistency check this cycle.
    pub rejected: u64,

    /// Candidates aged out this cycle.
    pub discarded: u64,

    /// Facts promoted since start.
    pub total_promoted: u64,

    #[serde(with = "duration_millis")]
    pub last_cycle_duration: Duration,

    pub last_cycle_at: Option<DateTime<Utc>>,

    /// Events still holding pending candidates after the last cycle.
    pub backlog_size: u64,
}

impl LearningMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset per-cycle counters (called at the start of each cycle).
    pub fn reset_cycle_metrics(&mut self) {
        self.candidates_seen = 0;
        self.clusters = 0;
        self.promoted = 0;
        self.rejected = 0;
        self.discarded = 0;
    }

    pub fn finish_cycle(&mut self, duration: Duration, backlog: u64) {
        self.cycles += 1;
        self.total_promoted += self.promoted;
        self.last_cycle_duration = duration;
        self.last_cycle_at = Some(Utc::now());
        self.backlog_size = backlog;
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

//! Run statistics reported by the CLI as JSON

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Counters for one harvest run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HarvestStats {
    /// Pages fully processed (checkpoint written or nothing to advance)
    pub pages: u64,
    /// Records processed, excluding deleted and malformed ones
    pub records: u64,
    pub metadata_written: u64,
    pub artifacts_written: u64,
    /// Artifact key already present; no request sent to the origin
    pub artifacts_skipped: u64,
    /// Origin reported the artifact as unavailable
    pub artifacts_absent: u64,
    pub fetch_failures: u64,
    pub shape_warnings: u64,
    pub deleted_skipped: u64,
    pub malformed_skipped: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_secs: f64,
}

impl HarvestStats {
    pub fn new() -> Self {
        Self {
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn complete(&mut self) {
        self.completed_at = Some(Utc::now());
        if let (Some(start), Some(end)) = (self.started_at, self.completed_at) {
            self.duration_secs = (end - start).num_milliseconds() as f64 / 1000.0;
        }
    }
}

/// Counters for one archive
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnpackStats {
    pub members_written: u64,
    /// Member key already present in the store
    pub members_skipped: u64,
    /// Directories, links and entries with unsafe paths
    pub members_ignored: u64,
    pub bytes_written: u64,
}

impl UnpackStats {
    pub fn merge(&mut self, other: &UnpackStats) {
        self.members_written += other.members_written;
        self.members_skipped += other.members_skipped;
        self.members_ignored += other.members_ignored;
        self.bytes_written += other.bytes_written;
    }
}

/// Counters for one dispatcher scan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStats {
    pub archives_seen: u64,
    pub already_processed: u64,
    pub enqueued: u64,
}

/// Totals for a worker pool
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub archives_completed: u64,
    pub archives_skipped: u64,
    pub messages_dropped: u64,
    /// Deliveries left un-acked after an error
    pub failures: u64,
    pub members: UnpackStats,
}

impl WorkerStats {
    pub fn merge(&mut self, other: &WorkerStats) {
        self.archives_completed += other.archives_completed;
        self.archives_skipped += other.archives_skipped;
        self.messages_dropped += other.messages_dropped;
        self.failures += other.failures;
        self.members.merge(&other.members);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_sets_duration() {
        let mut stats = HarvestStats::new();
        stats.complete();
        assert!(stats.completed_at.is_some());
        assert!(stats.duration_secs >= 0.0);
    }

    #[test]
    fn test_worker_stats_merge() {
        let mut total = WorkerStats::default();
        let one = WorkerStats {
            archives_completed: 1,
            members: UnpackStats {
                members_written: 2,
                bytes_written: 10,
                ..Default::default()
            },
            ..Default::default()
        };
        total.merge(&one);
        total.merge(&one);

        assert_eq!(total.archives_completed, 2);
        assert_eq!(total.members.members_written, 4);
        assert_eq!(total.members.bytes_written, 20);
    }
}

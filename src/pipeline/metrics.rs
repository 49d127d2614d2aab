//! Pipeline counters.

use serde::{Serialize, Serializer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Metrics for one pipeline execution.
#[derive(Debug)]
pub struct Metrics {
    /// Oracle requests issued
    pub oracle_calls: AtomicU64,

    /// Windows submitted for ranking
    pub windows_ranked: AtomicU64,

    /// Completed rank-reduce rounds
    pub rank_rounds: AtomicU64,

    /// Clips discarded across all windows
    pub clips_discarded: AtomicU64,

    /// Stages that halted the pipeline
    pub stage_failures: AtomicU64,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            oracle_calls: AtomicU64::new(0),
            windows_ranked: AtomicU64::new(0),
            rank_rounds: AtomicU64::new(0),
            clips_discarded: AtomicU64::new(0),
            stage_failures: AtomicU64::new(0),
            start_time: Instant::now(),
        })
    }

    pub fn add_oracle_call(&self) {
        self.oracle_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_window_ranked(&self) {
        self.windows_ranked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_rank_round(&self) {
        self.rank_rounds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_clips_discarded(&self, count: u64) {
        self.clips_discarded.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_stage_failure(&self) {
        self.stage_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            oracle_calls: self.oracle_calls.load(Ordering::Relaxed),
            windows_ranked: self.windows_ranked.load(Ordering::Relaxed),
            rank_rounds: self.rank_rounds.load(Ordering::Relaxed),
            clips_discarded: self.clips_discarded.load(Ordering::Relaxed),
            stage_failures: self.stage_failures.load(Ordering::Relaxed),
            elapsed: self.elapsed(),
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub oracle_calls: u64,
    pub windows_ranked: u64,
    pub rank_rounds: u64,
    pub clips_discarded: u64,
    pub stage_failures: u64,
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Oracle calls: {} | Windows: {} | Rounds: {} | Discarded: {} | \
             Stage failures: {} | Elapsed: {:.1}s",
            self.oracle_calls,
            self.windows_ranked,
            self.rank_rounds,
            self.clips_discarded,
            self.stage_failures,
            self.elapsed.as_secs_f64(),
        )
    }
}

//! Run persistence: identifiers, per-stage records, and the store trait.

mod json;
mod memory;

pub use json::JsonRunStore;
pub use memory::MemoryRunStore;

use crate::failure::Failure;
use crate::pipeline::StageOutcome;
use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque, time-ordered run identifier.
///
/// A UTC timestamp with microsecond precision, so lexicographic order
/// matches creation order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn new() -> Self {
        Self(Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One stage's recorded outcome within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: String,
    pub outcome: StageOutcome,
}

/// Persisted record of one pipeline execution.
///
/// `stages` is append-only and 1:1 with the execution: one record per
/// stage that actually ran, in run order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub stages: Vec<StageRecord>,
}

impl Run {
    pub fn new(id: RunId) -> Self {
        Self {
            id,
            stages: Vec::new(),
        }
    }

    /// Index of the named stage's record. Unknown names are an explicit
    /// error, never a silent default.
    pub fn stage_index(&self, name: &str) -> Result<usize, Failure> {
        self.stages
            .iter()
            .position(|r| r.stage == name)
            .ok_or_else(|| Failure::NotFound(format!("stage '{}' in run {}", name, self.id)))
    }
}

/// Persistence surface for pipeline runs.
///
/// One execution writes its run sequentially (single writer); independent
/// runs never share mutable state beyond the store itself.
pub trait RunStore: Send + Sync {
    /// Register a new run. Fails if the id already exists.
    fn create(&self, run: Run) -> Result<()>;

    /// Append a stage record to an existing run.
    fn append(&self, id: &RunId, record: StageRecord) -> Result<()>;

    /// Look up a run by id.
    fn get(&self, id: &RunId) -> Result<Option<Run>>;

    /// All stored run ids, oldest first.
    fn list(&self) -> Result<Vec<RunId>>;

    /// Copy a run's records under a fresh id, optionally truncated to the
    /// first `truncate_at` records (used by resume so the clone stays 1:1
    /// with its execution).
    fn clone_run(&self, id: &RunId, truncate_at: Option<usize>) -> Result<Run> {
        let source = self.get(id)?.ok_or_else(|| {
            anyhow::Error::new(Failure::NotFound(format!("run {}", id)))
        })?;
        let mut stages = source.stages;
        if let Some(at) = truncate_at {
            stages.truncate(at);
        }
        let run = Run {
            id: RunId::new(),
            stages,
        };
        self.create(run.clone())?;
        Ok(run)
    }
}

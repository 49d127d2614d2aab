//! In-memory run store.

use super::{Run, RunId, RunStore, StageRecord};
use crate::failure::Failure;
use anyhow::{anyhow, bail, Result};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Run store backed by process memory. Empty at start, append-only, no
/// eviction. The default for tests and library embedding.
#[derive(Debug, Default)]
pub struct MemoryRunStore {
    runs: Mutex<BTreeMap<String, Run>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Run>>> {
        self.runs
            .lock()
            .map_err(|_| anyhow!("run store mutex poisoned"))
    }
}

impl RunStore for MemoryRunStore {
    fn create(&self, run: Run) -> Result<()> {
        let mut runs = self.lock()?;
        if runs.contains_key(run.id.as_str()) {
            bail!("run {} already exists", run.id);
        }
        runs.insert(run.id.as_str().to_string(), run);
        Ok(())
    }

    fn append(&self, id: &RunId, record: StageRecord) -> Result<()> {
        let mut runs = self.lock()?;
        let run = runs
            .get_mut(id.as_str())
            .ok_or_else(|| anyhow::Error::new(Failure::NotFound(format!("run {}", id))))?;
        run.stages.push(record);
        Ok(())
    }

    fn get(&self, id: &RunId) -> Result<Option<Run>> {
        Ok(self.lock()?.get(id.as_str()).cloned())
    }

    fn list(&self) -> Result<Vec<RunId>> {
        Ok(self.lock()?.keys().map(|k| RunId::from(k.as_str())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryRunStore;
    use crate::context::Context;
    use crate::pipeline::StageOutcome;
    use crate::store::{Run, RunId, RunStore, StageRecord};

    #[test]
    fn test_create_get_append() {
        let store = MemoryRunStore::new();
        let id = RunId::new();
        store.create(Run::new(id.clone())).unwrap();

        assert!(store.get(&id).unwrap().is_some());
        assert!(store.get(&RunId::from("missing")).unwrap().is_none());

        store
            .append(
                &id,
                StageRecord {
                    stage: "fetch-posts".to_string(),
                    outcome: StageOutcome::success(Context::new()),
                },
            )
            .unwrap();

        let run = store.get(&id).unwrap().unwrap();
        assert_eq!(run.stages.len(), 1);
        assert_eq!(run.stages[0].stage, "fetch-posts");
    }

    #[test]
    fn test_duplicate_create_fails() {
        let store = MemoryRunStore::new();
        let id = RunId::new();
        store.create(Run::new(id.clone())).unwrap();
        assert!(store.create(Run::new(id)).is_err());
    }

    #[test]
    fn test_list_is_ordered() {
        let store = MemoryRunStore::new();
        let a = RunId::from("2024-01-01T00:00:00.000000Z");
        let b = RunId::from("2024-01-02T00:00:00.000000Z");
        store.create(Run::new(b.clone())).unwrap();
        store.create(Run::new(a.clone())).unwrap();
        assert_eq!(store.list().unwrap(), vec![a, b]);
    }
}

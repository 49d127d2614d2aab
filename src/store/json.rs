//! Durable run store: one JSON file per run, written atomically.

use super::{Run, RunId, RunStore, StageRecord};
use crate::failure::Failure;
use anyhow::{bail, Context as _, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Run store backed by a directory of JSON files.
///
/// Writes go through a temp file + rename so a crashed run never leaves a
/// half-written record behind.
#[derive(Debug)]
pub struct JsonRunStore {
    dir: PathBuf,
}

impl JsonRunStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("create run store directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn path_for(&self, id: &RunId) -> PathBuf {
        // Run ids are timestamps; ':' is not portable in file names.
        let name: String = id
            .as_str()
            .chars()
            .map(|c| if c == ':' { '_' } else { c })
            .collect();
        self.dir.join(format!("{}.json", name))
    }

    fn read_run(&self, path: &Path) -> Result<Run> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("read run {}", path.display()))?;
        serde_json::from_str(&contents).with_context(|| format!("parse run {}", path.display()))
    }

    fn write_run(&self, run: &Run) -> Result<()> {
        let path = self.path_for(&run.id);
        let mut contents = serde_json::to_string_pretty(run)?;
        contents.push('\n');
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, &contents)
            .with_context(|| format!("write temp run {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &path)
            .with_context(|| format!("replace run {}", path.display()))?;
        Ok(())
    }
}

impl RunStore for JsonRunStore {
    fn create(&self, run: Run) -> Result<()> {
        let path = self.path_for(&run.id);
        if path.exists() {
            bail!("run {} already exists", run.id);
        }
        self.write_run(&run)
    }

    fn append(&self, id: &RunId, record: StageRecord) -> Result<()> {
        let path = self.path_for(id);
        if !path.exists() {
            return Err(anyhow::Error::new(Failure::NotFound(format!("run {}", id))));
        }
        let mut run = self.read_run(&path)?;
        run.stages.push(record);
        self.write_run(&run)
    }

    fn get(&self, id: &RunId) -> Result<Option<Run>> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(None);
        }
        self.read_run(&path).map(Some)
    }

    fn list(&self) -> Result<Vec<RunId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)
            .with_context(|| format!("list run store {}", self.dir.display()))?
        {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            // File names are sanitized; the authoritative id is inside.
            ids.push(self.read_run(&path)?.id);
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::JsonRunStore;
    use crate::context::Context;
    use crate::failure::Failure;
    use crate::pipeline::StageOutcome;
    use crate::store::{Run, RunId, RunStore, StageRecord};

    fn record(stage: &str) -> StageRecord {
        StageRecord {
            stage: stage.to_string(),
            outcome: StageOutcome::success(
                Context::new().with("handle", &"user".to_string()).unwrap(),
            ),
        }
    }

    #[test]
    fn test_round_trip() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = JsonRunStore::new(temp.path()).unwrap();

        let id = RunId::new();
        store.create(Run::new(id.clone())).unwrap();
        store.append(&id, record("validate-input")).unwrap();
        store.append(&id, record("fetch-posts")).unwrap();

        let run = store.get(&id).unwrap().unwrap();
        assert_eq!(run.id, id);
        assert_eq!(run.stages.len(), 2);
        assert_eq!(run.stages[1].stage, "fetch-posts");

        // A second store over the same directory sees the run.
        let reopened = JsonRunStore::new(temp.path()).unwrap();
        assert_eq!(reopened.get(&id).unwrap().unwrap(), run);
        assert_eq!(reopened.list().unwrap(), vec![id]);
    }

    #[test]
    fn test_append_to_missing_run_is_not_found() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = JsonRunStore::new(temp.path()).unwrap();
        let err = store
            .append(&RunId::from("2024-01-01T00_00"), record("fetch-posts"))
            .unwrap_err();
        assert!(err.downcast_ref::<Failure>().is_some());
    }

    #[test]
    fn test_get_missing_is_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = JsonRunStore::new(temp.path()).unwrap();
        assert!(store.get(&RunId::from("absent")).unwrap().is_none());
    }
}

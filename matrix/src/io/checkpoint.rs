//! Snapshot persistence for completed (or cancelled) runs.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::core::types::ExperimentSnapshot;
use crate::error::EngineError;

/// Stores and restores a single experiment snapshot.
pub trait CheckpointStore: Send + Sync {
    /// Where the snapshot lives; used in messages and errors.
    fn location(&self) -> PathBuf;

    /// `Ok(None)` when nothing was stored yet. A stored snapshot that cannot
    /// be read back is an [`EngineError::CheckpointLoad`].
    fn load(&self) -> std::result::Result<Option<ExperimentSnapshot>, EngineError>;

    fn save(&self, snapshot: &ExperimentSnapshot) -> Result<()>;
}

/// A pretty-printed JSON file, replaced atomically on save.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn location(&self) -> PathBuf {
        self.path.clone()
    }

    #[instrument(skip_all, fields(path = %self.path.display()))]
    fn load(&self) -> std::result::Result<Option<ExperimentSnapshot>, EngineError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("no snapshot stored");
                return Ok(None);
            }
            Err(err) => {
                return Err(EngineError::CheckpointLoad {
                    path: self.path.clone(),
                    reason: err.to_string(),
                });
            }
        };
        let snapshot = serde_json::from_str(&contents).map_err(|err| {
            EngineError::CheckpointLoad {
                path: self.path.clone(),
                reason: format!("parse snapshot: {err}"),
            }
        })?;
        Ok(Some(snapshot))
    }

    #[instrument(skip_all, fields(path = %self.path.display()))]
    fn save(&self, snapshot: &ExperimentSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let mut buf = serde_json::to_string_pretty(snapshot).context("serialize snapshot")?;
        buf.push('\n');
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, buf)
            .with_context(|| format!("write temp snapshot {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("replace snapshot {}", self.path.display()))?;
        debug!(pairs = snapshot.pair_count(), "snapshot saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{combinations, experiment_result, snapshot};

    #[test]
    fn missing_file_loads_as_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FileCheckpointStore::new(temp.path().join("snap.json"));
        assert!(store.load().expect("load").is_none());
    }

    #[test]
    fn saved_snapshot_reads_back_equal() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FileCheckpointStore::new(temp.path().join("nested").join("snap.json"));
        let snap = snapshot(
            combinations(2),
            vec![experiment_result("a", 2), experiment_result("b", 2)],
        );
        store.save(&snap).expect("save");
        let loaded = store.load().expect("load").expect("present");
        assert_eq!(loaded, snap);
        let text = fs::read_to_string(store.path()).expect("read");
        assert!(text.ends_with("}\n"));
    }

    #[test]
    fn corrupt_snapshot_is_a_load_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("snap.json");
        fs::write(&path, "{ truncated").expect("write");
        let err = FileCheckpointStore::new(&path).load().expect_err("corrupt");
        assert!(matches!(err, EngineError::CheckpointLoad { .. }));
    }
}

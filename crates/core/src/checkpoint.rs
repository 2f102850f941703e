//! Durable run checkpoints.
//!
//! A checkpoint is an immutable serialization of a `RunState` taken
//! immediately after a stage transition. Checkpoints are append-only and
//! sequence-numbered; resuming a run loads the highest sequence for its
//! `run_id`. The on-disk format embeds a schema version so a future layout
//! change is detected and rejected instead of silently corrupting state.
//!
//! The filesystem store writes through a temporary file and renames into
//! place, so a crash mid-write leaves either the previous checkpoint set or
//! the complete new one, never a partial file that would parse as state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reel_protocol::{RunState, StageKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Version of the serialized checkpoint layout.
pub const SCHEMA_VERSION: u32 = 1;

/// Errors from checkpoint persistence. All of these are fatal to the run
/// that hits them: resumability cannot be guaranteed past a failed save.
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("checkpoint I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to serialize checkpoint for run {run_id}: {source}")]
    Serialize {
        run_id: Uuid,
        source: serde_json::Error,
    },

    #[error("corrupt checkpoint at {path}: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("incompatible checkpoint schema at {path}: found v{found}, expected v{expected}")]
    IncompatibleSchema {
        path: PathBuf,
        found: u32,
        expected: u32,
    },
}

/// The on-disk checkpoint envelope.
#[derive(Serialize, Deserialize, Debug, Clone)]
struct Checkpoint {
    schema_version: u32,
    /// Monotonic per-run sequence; highest wins on load.
    seq: u64,
    /// The stage the run was at when this snapshot was taken.
    stage: StageKind,
    saved_at: DateTime<Utc>,
    state: RunState,
}

/// Durable, versioned snapshots of run state, partitioned by `run_id`.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Append a snapshot of `state`. Called after every stage transition,
    /// including failures.
    async fn save(&self, state: &RunState) -> Result<(), CheckpointError>;

    /// Load the most advanced recoverable state for `run_id`, or `None` if
    /// the run has never been checkpointed.
    async fn load_latest(&self, run_id: Uuid) -> Result<Option<RunState>, CheckpointError>;
}

/// Filesystem store: `<base>/<run_id>/checkpoints/<seq>-<stage>.json`.
pub struct FsCheckpointStore {
    base: PathBuf,
    /// Next sequence number per run, lazily initialized from disk.
    seqs: Mutex<HashMap<Uuid, u64>>,
}

impl FsCheckpointStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            seqs: Mutex::new(HashMap::new()),
        }
    }

    fn run_dir(&self, run_id: Uuid) -> PathBuf {
        self.base.join(run_id.to_string()).join("checkpoints")
    }
}

/// Parse the sequence prefix out of `<seq>-<stage>.json`.
fn parse_seq(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(".json")?;
    let (seq, _) = stem.split_once('-')?;
    seq.parse().ok()
}

fn scan_latest(dir: &Path) -> Result<Option<PathBuf>, CheckpointError> {
    if !dir.exists() {
        return Ok(None);
    }
    let entries = std::fs::read_dir(dir).map_err(|source| CheckpointError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut latest: Option<(u64, PathBuf)> = None;
    for entry in entries {
        let entry = entry.map_err(|source| CheckpointError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if let Some(seq) = parse_seq(&path) {
            if latest.as_ref().map(|(s, _)| seq > *s).unwrap_or(true) {
                latest = Some((seq, path));
            }
        }
    }
    Ok(latest.map(|(_, path)| path))
}

#[async_trait]
impl CheckpointStore for FsCheckpointStore {
    async fn save(&self, state: &RunState) -> Result<(), CheckpointError> {
        let dir = self.run_dir(state.run_id);
        std::fs::create_dir_all(&dir).map_err(|source| CheckpointError::Io {
            path: dir.clone(),
            source,
        })?;

        let mut seqs = self.seqs.lock().await;
        let seq = match seqs.get(&state.run_id) {
            Some(next) => *next,
            None => {
                let latest = scan_latest(&dir)?;
                latest.as_deref().and_then(parse_seq).map_or(0, |s| s + 1)
            }
        };

        let checkpoint = Checkpoint {
            schema_version: SCHEMA_VERSION,
            seq,
            stage: state.current_stage,
            saved_at: Utc::now(),
            state: state.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&checkpoint).map_err(|source| {
            CheckpointError::Serialize {
                run_id: state.run_id,
                source,
            }
        })?;

        let final_path = dir.join(format!("{seq:05}-{}.json", state.current_stage));
        let mut tmp =
            tempfile::NamedTempFile::new_in(&dir).map_err(|source| CheckpointError::Io {
                path: dir.clone(),
                source,
            })?;
        tmp.write_all(&bytes).map_err(|source| CheckpointError::Io {
            path: final_path.clone(),
            source,
        })?;
        tmp.persist(&final_path)
            .map_err(|err| CheckpointError::Io {
                path: final_path.clone(),
                source: err.error,
            })?;

        seqs.insert(state.run_id, seq + 1);
        Ok(())
    }

    async fn load_latest(&self, run_id: Uuid) -> Result<Option<RunState>, CheckpointError> {
        let dir = self.run_dir(run_id);
        let Some(path) = scan_latest(&dir)? else {
            return Ok(None);
        };

        let bytes = std::fs::read(&path).map_err(|source| CheckpointError::Io {
            path: path.clone(),
            source,
        })?;
        let checkpoint: Checkpoint =
            serde_json::from_slice(&bytes).map_err(|source| CheckpointError::Corrupt {
                path: path.clone(),
                source,
            })?;

        if checkpoint.schema_version != SCHEMA_VERSION {
            return Err(CheckpointError::IncompatibleSchema {
                path,
                found: checkpoint.schema_version,
                expected: SCHEMA_VERSION,
            });
        }

        Ok(Some(checkpoint.state))
    }
}

/// In-memory store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    runs: Mutex<HashMap<Uuid, Vec<RunState>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of snapshots recorded for `run_id`.
    pub async fn snapshot_count(&self, run_id: Uuid) -> usize {
        self.runs
            .lock()
            .await
            .get(&run_id)
            .map(|v| v.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, state: &RunState) -> Result<(), CheckpointError> {
        self.runs
            .lock()
            .await
            .entry(state.run_id)
            .or_default()
            .push(state.clone());
        Ok(())
    }

    async fn load_latest(&self, run_id: Uuid) -> Result<Option<RunState>, CheckpointError> {
        Ok(self
            .runs
            .lock()
            .await
            .get(&run_id)
            .and_then(|v| v.last())
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_protocol::{RunStatus, StageArtifact};

    #[tokio::test]
    async fn load_of_unknown_run_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCheckpointStore::new(dir.path());
        let loaded = store.load_latest(Uuid::new_v4()).await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn latest_snapshot_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCheckpointStore::new(dir.path());

        let mut state = RunState::new("glaciers");
        store.save(&state).await.unwrap();

        state.status = RunStatus::Running;
        state.current_stage = StageKind::SynthesizeScript;
        state.record_artifact(StageArtifact::Research {
            sources: vec![],
        });
        store.save(&state).await.unwrap();

        let loaded = store.load_latest(state.run_id).await.unwrap().unwrap();
        assert_eq!(loaded.current_stage, StageKind::SynthesizeScript);
        assert_eq!(loaded.status, RunStatus::Running);
    }

    #[tokio::test]
    async fn sequence_resumes_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let run_id;
        {
            let store = FsCheckpointStore::new(dir.path());
            let state = RunState::new("volcanoes");
            run_id = state.run_id;
            store.save(&state).await.unwrap();
            store.save(&state).await.unwrap();
        }

        // A fresh store instance must append, not overwrite.
        let store = FsCheckpointStore::new(dir.path());
        let mut state = store.load_latest(run_id).await.unwrap().unwrap();
        state.status = RunStatus::Complete;
        store.save(&state).await.unwrap();

        let checkpoints = dir
            .path()
            .join(run_id.to_string())
            .join("checkpoints");
        let count = std::fs::read_dir(checkpoints).unwrap().count();
        assert_eq!(count, 3);

        let loaded = store.load_latest(run_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Complete);
    }

    #[tokio::test]
    async fn incompatible_schema_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCheckpointStore::new(dir.path());
        let state = RunState::new("rivers");
        store.save(&state).await.unwrap();

        // Rewrite the checkpoint with a bumped schema version.
        let checkpoints = dir
            .path()
            .join(state.run_id.to_string())
            .join("checkpoints");
        let path = std::fs::read_dir(&checkpoints)
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
            .path();
        let mut value: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        value["schema_version"] = serde_json::json!(SCHEMA_VERSION + 1);
        std::fs::write(&path, serde_json::to_vec(&value).unwrap()).unwrap();

        let err = store.load_latest(state.run_id).await.unwrap_err();
        assert!(matches!(
            err,
            CheckpointError::IncompatibleSchema { found, expected, .. }
                if found == SCHEMA_VERSION + 1 && expected == SCHEMA_VERSION
        ));
    }

    #[tokio::test]
    async fn garbage_checkpoint_is_corrupt_not_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCheckpointStore::new(dir.path());
        let state = RunState::new("rivers");
        store.save(&state).await.unwrap();

        let checkpoints = dir
            .path()
            .join(state.run_id.to_string())
            .join("checkpoints");
        let path = std::fs::read_dir(&checkpoints)
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
            .path();
        std::fs::write(&path, b"{ truncated").unwrap();

        let err = store.load_latest(state.run_id).await.unwrap_err();
        assert!(matches!(err, CheckpointError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn memory_store_round_trips() {
        let store = MemoryCheckpointStore::new();
        let mut state = RunState::new("deserts");
        store.save(&state).await.unwrap();
        state.status = RunStatus::Running;
        store.save(&state).await.unwrap();

        assert_eq!(store.snapshot_count(state.run_id).await, 2);
        let loaded = store.load_latest(state.run_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Running);
    }
}

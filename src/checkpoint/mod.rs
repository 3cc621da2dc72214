//! CheckpointManager: byte-exact snapshot/restore over a
//! set of paths.
//!
//! Grounded on `execution_tools/db.rs`'s split between an on-disk index
//! and row/blob persistence, and on `file_edit_tools/mod.rs`'s
//! temp-file-then-rename atomic write pattern for the snapshot and index
//! files themselves.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::event::{EventBus, EventPayload, EventType, Mode, Stage};
use crate::ids::{generate_checkpoint_id, Clock, IdProvider};

/// A file's captured state at checkpoint time: either its exact bytes or
/// an explicit marker that the file did not exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FileSnapshot {
    Present { content_base64: String },
    Absent,
}

impl FileSnapshot {
    fn capture(path: &Path) -> CoreResult<Self> {
        match fs::read(path) {
            Ok(bytes) => Ok(FileSnapshot::Present {
                content_base64: BASE64.encode(bytes),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileSnapshot::Absent),
            Err(e) => Err(CoreError::Io(e)),
        }
    }

    fn restore_to(&self, path: &Path) -> CoreResult<()> {
        match self {
            FileSnapshot::Present { content_base64 } => {
                let bytes = BASE64
                    .decode(content_base64)
                    .map_err(|e| CoreError::PersistenceError(format!("corrupt checkpoint blob: {e}")))?;
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                let temp_path = path.with_extension("cpwrite.tmp");
                {
                    use std::io::Write;
                    let mut f = fs::File::create(&temp_path)?;
                    f.write_all(&bytes)?;
                    f.sync_all()?;
                }
                fs::rename(&temp_path, path)?;
                Ok(())
            }
            FileSnapshot::Absent => {
                match fs::remove_file(path) {
                    Ok(()) => Ok(()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                    Err(e) => Err(CoreError::Io(e)),
                }
            }
        }
    }
}

/// Metadata index entry for a single checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub checkpoint_id: String,
    pub task_id: String,
    pub description: String,
    pub method: String,
    pub paths: Vec<String>,
    pub created_at: String,
}

/// A checkpoint's per-path snapshot blob, persisted separately from its
/// index entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CheckpointRecord {
    snapshots: BTreeMap<String, FileSnapshot>,
}

/// On-disk index mapping `checkpoint_id` to its metadata (scope + method),
/// kept apart from the snapshot blobs so enumerating checkpoints never
/// requires reading every blob on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CheckpointIndex {
    entries: BTreeMap<String, CheckpointMetadata>,
}

/// Manages checkpoint creation/restoration for a workspace root,
/// persisting an index file (`index.json`, `checkpoint_id` -> metadata)
/// plus one snapshot file per checkpoint under
/// `<workspace>/.missioncore/checkpoints/`.
pub struct CheckpointManager<'a> {
    workspace_root: PathBuf,
    bus: &'a EventBus,
    clock: &'a dyn Clock,
    ids: &'a dyn IdProvider,
    active_checkpoint_id: Option<String>,
}

impl<'a> CheckpointManager<'a> {
    pub fn new(
        workspace_root: impl Into<PathBuf>,
        bus: &'a EventBus,
        clock: &'a dyn Clock,
        ids: &'a dyn IdProvider,
    ) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            bus,
            clock,
            ids,
            active_checkpoint_id: None,
        }
    }

    fn checkpoints_dir(&self) -> PathBuf {
        self.workspace_root.join(".missioncore").join("checkpoints")
    }

    fn record_path(&self, checkpoint_id: &str) -> PathBuf {
        self.checkpoints_dir().join(format!("{checkpoint_id}.json"))
    }

    fn index_path(&self) -> PathBuf {
        self.checkpoints_dir().join("index.json")
    }

    pub fn active_checkpoint_id(&self) -> Option<&str> {
        self.active_checkpoint_id.as_deref()
    }

    /// `createCheckpoint`.
    pub fn create_checkpoint(
        &mut self,
        task_id: &str,
        mode: Mode,
        stage: Stage,
        description: &str,
        paths: &[String],
        method: &str,
    ) -> CoreResult<CheckpointMetadata> {
        let mut snapshots = BTreeMap::new();
        for rel in paths {
            let full = self.workspace_root.join(rel);
            snapshots.insert(rel.clone(), FileSnapshot::capture(&full)?);
        }

        let checkpoint_id = generate_checkpoint_id(self.clock, self.ids);
        let metadata = CheckpointMetadata {
            checkpoint_id: checkpoint_id.clone(),
            task_id: task_id.to_string(),
            description: description.to_string(),
            method: method.to_string(),
            paths: paths.to_vec(),
            created_at: self.clock.now().to_rfc3339(),
        };

        let record = CheckpointRecord { snapshots };
        self.persist_record(&checkpoint_id, &record)?;
        self.persist_index_entry(&metadata)?;

        self.bus.emit(
            task_id,
            EventType::CheckpointCreated,
            mode,
            stage,
            EventPayload::new()
                .insert("checkpoint_id", checkpoint_id.clone())
                .insert("paths", serde_json::json!(paths)),
            vec![],
            None,
        )?;

        self.active_checkpoint_id = Some(checkpoint_id);
        Ok(metadata)
    }

    /// `restoreCheckpoint`. Character-exact and idempotent:
    /// running it twice in a row leaves the same bytes on disk. Works
    /// from a freshly-constructed manager since the record is re-read
    /// from disk rather than relying on in-memory state.
    pub fn restore_checkpoint(
        &mut self,
        task_id: &str,
        mode: Mode,
        stage: Stage,
        checkpoint_id: &str,
    ) -> CoreResult<()> {
        let record = self.load_record(checkpoint_id)?;

        for (rel, snapshot) in &record.snapshots {
            let full = self.workspace_root.join(rel);
            snapshot.restore_to(&full)?;
        }

        self.bus.emit(
            task_id,
            EventType::CheckpointRestored,
            mode,
            stage,
            EventPayload::new().insert("checkpoint_id", checkpoint_id.to_string()),
            vec![],
            None,
        )?;

        self.active_checkpoint_id = Some(checkpoint_id.to_string());
        Ok(())
    }

    /// "works from a freshly-loaded manager
    /// (`loadCheckpointMetadata`)". Reads the index entry without
    /// touching the snapshot blob.
    pub fn load_checkpoint_metadata(&self, checkpoint_id: &str) -> CoreResult<CheckpointMetadata> {
        self.load_index()?
            .entries
            .get(checkpoint_id)
            .cloned()
            .ok_or_else(|| CoreError::CheckpointNotFound(checkpoint_id.to_string()))
    }

    /// Every checkpoint known to a fresh process, newest-first by
    /// `created_at`, read from the index alone (no snapshot blobs read).
    pub fn list_checkpoints(&self) -> CoreResult<Vec<CheckpointMetadata>> {
        let mut metas: Vec<CheckpointMetadata> = self.load_index()?.entries.into_values().collect();
        metas.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(metas)
    }

    fn persist_record(&self, checkpoint_id: &str, record: &CheckpointRecord) -> CoreResult<()> {
        let dir = self.checkpoints_dir();
        fs::create_dir_all(&dir)?;
        let path = self.record_path(checkpoint_id);
        let temp_path = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(record).map_err(CoreError::from)?;
        {
            use std::io::Write;
            let mut f = fs::File::create(&temp_path)?;
            f.write_all(&json)?;
            f.sync_all()?;
        }
        fs::rename(&temp_path, &path)?;
        Ok(())
    }

    fn load_record(&self, checkpoint_id: &str) -> CoreResult<CheckpointRecord> {
        let path = self.record_path(checkpoint_id);
        let bytes = fs::read(&path)
            .map_err(|_| CoreError::CheckpointNotFound(checkpoint_id.to_string()))?;
        serde_json::from_slice(&bytes).map_err(CoreError::from)
    }

    fn persist_index_entry(&self, metadata: &CheckpointMetadata) -> CoreResult<()> {
        let dir = self.checkpoints_dir();
        fs::create_dir_all(&dir)?;
        let mut index = self.load_index()?;
        index.entries.insert(metadata.checkpoint_id.clone(), metadata.clone());

        let path = self.index_path();
        let temp_path = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(&index).map_err(CoreError::from)?;
        {
            use std::io::Write;
            let mut f = fs::File::create(&temp_path)?;
            f.write_all(&json)?;
            f.sync_all()?;
        }
        fs::rename(&temp_path, &path)?;
        Ok(())
    }

    fn load_index(&self) -> CoreResult<CheckpointIndex> {
        match fs::read(self.index_path()) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(CoreError::from),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(CheckpointIndex::default()),
            Err(e) => Err(CoreError::Io(e)),
        }
    }
}

//! [SUPPLEMENT] §4.14 Evidence store: a content-addressed blob store for
//! transcripts and diagnostic bytes referenced by `evidence_ids` on
//! events.
//!
//! Generalizes `evidence_queries` row-oriented table into a
//! blob store keyed by `sha256(bytes)` rather than an autoincrement id,
//! since evidence here is opaque transcript/diagnostic bytes rather than
//! queryable structured rows.

use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{CoreError, CoreResult};

/// A category tag stored alongside the blob, purely informational (kept
/// out of the content hash so two transcripts with identical bytes but
/// different kinds still dedupe).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvidenceKind {
    CommandTranscript,
    EditLedger,
    Generic,
}

impl EvidenceKind {
    fn as_str(&self) -> &'static str {
        match self {
            EvidenceKind::CommandTranscript => "command_transcript",
            EvidenceKind::EditLedger => "edit_ledger",
            EvidenceKind::Generic => "generic",
        }
    }
}

/// Content-addressed store under `<workspace>/.missioncore/evidence/`.
pub struct EvidenceStore {
    root: PathBuf,
}

impl EvidenceStore {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            root: workspace_root.into().join(".missioncore").join("evidence"),
        }
    }

    fn blob_path(&self, evidence_id: &str) -> PathBuf {
        self.root.join(format!("{evidence_id}.bin"))
    }

    fn kind_path(&self, evidence_id: &str) -> PathBuf {
        self.root.join(format!("{evidence_id}.kind"))
    }

    fn hex_digest(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hasher
            .finalize()
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect()
    }

    /// Writes `bytes`, returning its `sha256` hex digest as the evidence
    /// id. Writing the same bytes twice is a no-op past the first write
    /// (content-addressed storage is naturally idempotent).
    pub fn write(&self, kind: EvidenceKind, bytes: &[u8]) -> CoreResult<String> {
        fs::create_dir_all(&self.root)?;

        let evidence_id = Self::hex_digest(bytes);

        let blob_path = self.blob_path(&evidence_id);
        if !blob_path.exists() {
            let temp_path = blob_path.with_extension("bin.tmp");
            {
                use std::io::Write;
                let mut f = fs::File::create(&temp_path)?;
                f.write_all(bytes)?;
                f.sync_all()?;
            }
            fs::rename(&temp_path, &blob_path)?;
        }
        fs::write(self.kind_path(&evidence_id), kind.as_str())?;

        Ok(evidence_id)
    }

    pub fn read(&self, evidence_id: &str) -> CoreResult<Vec<u8>> {
        fs::read(self.blob_path(evidence_id))
            .map_err(|_| CoreError::Validation(format!("no evidence blob for id '{evidence_id}'")))
    }

    pub fn kind_of(&self, evidence_id: &str) -> CoreResult<String> {
        fs::read_to_string(self.kind_path(evidence_id))
            .map_err(|_| CoreError::Validation(format!("no evidence kind for id '{evidence_id}'")))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

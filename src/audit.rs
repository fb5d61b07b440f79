//! Append-only audit log for sub-invocation transcripts.
//!
//! Every delegated child loop leaves its full transcript on disk, keyed by
//! `(artifact id, invocation ordinal)` — success, exhaustion, or failure
//! alike. The files are JSONL for offline inspection only; nothing in the
//! runtime reads them back.

use crate::Message;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit log I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("audit log serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Writes transcripts under a root directory, one file per sub-invocation.
pub struct AuditLog {
    root: PathBuf,
}

impl AuditLog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist one transcript. Returns the path written.
    ///
    /// The file is `{artifact_id}-{ordinal:03}.jsonl`: a header line with the
    /// key and timestamp, then one message per line in transcript order.
    pub fn record(
        &self,
        artifact_id: &str,
        ordinal: u32,
        transcript: &[Message],
    ) -> Result<PathBuf, AuditError> {
        std::fs::create_dir_all(&self.root)?;
        let path = self
            .root
            .join(format!("{}-{ordinal:03}.jsonl", sanitize(artifact_id)));

        let mut file = std::fs::File::create(&path)?;
        let header = serde_json::json!({
            "artifact_id": artifact_id,
            "ordinal": ordinal,
            "recorded_at": chrono::Utc::now().to_rfc3339(),
            "messages": transcript.len(),
        });
        writeln!(file, "{header}")?;
        for message in transcript {
            writeln!(file, "{}", serde_json::to_string(message)?)?;
        }

        info!(
            "Audited sub-invocation transcript: {} ({} message(s))",
            path.display(),
            transcript.len()
        );
        Ok(path)
    }
}

/// Keep artifact ids filename-safe.
fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect()
}

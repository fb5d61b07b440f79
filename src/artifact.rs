//! Capture artifacts and the reader boundary.
//!
//! The runtime never parses packet bytes itself. An [`ArtifactHandle`] names
//! a capture, and an [`ArtifactReader`] turns it into text: the whole
//! artifact, its list of flow [`Unit`]s with measured token sizes, or one
//! flow's text. Deployments plug in readers backed by tshark output, flow
//! databases, or log archives; the crate ships [`TextFileReader`] for
//! pre-rendered flow text.

use crate::context::tokens::token_len;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by [`ArtifactReader`] methods.
pub type ArtifactFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ArtifactError>> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact '{0}' not found")]
    NotFound(String),
    #[error("unit '{0}' not found in artifact")]
    UnitNotFound(String),
    #[error("failed to read artifact: {0}")]
    Io(#[from] std::io::Error),
}

/// A reference to one capture artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactHandle {
    /// Stable identifier, used for audit-log keys.
    pub id: String,
    /// Backend-specific locator (a path for [`TextFileReader`]).
    pub locator: String,
}

impl ArtifactHandle {
    pub fn new(id: impl Into<String>, locator: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            locator: locator.into(),
        }
    }
}

/// One independently-analyzable slice of an artifact (a flow), with its
/// measured token size. Excluded units (encrypted payloads with nothing to
/// read) take no share of the analysis budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    pub id: String,
    /// Token size of the unit's text.
    pub size: usize,
    pub excluded: bool,
}

/// Read-only access to artifact text.
///
/// Uses boxed futures so the trait is dyn-compatible (object-safe).
pub trait ArtifactReader: Send + Sync {
    /// The artifact's full text.
    fn resolve<'a>(&'a self, handle: &'a ArtifactHandle) -> ArtifactFuture<'a, String>;

    /// Enumerate the artifact's flow units with measured sizes.
    fn units<'a>(&'a self, handle: &'a ArtifactHandle) -> ArtifactFuture<'a, Vec<Unit>>;

    /// The text of a single flow unit.
    fn unit_text<'a>(
        &'a self,
        handle: &'a ArtifactHandle,
        unit_id: &'a str,
    ) -> ArtifactFuture<'a, String>;
}

// ── Text file reader ───────────────────────────────────────────────

/// Reader over pre-rendered flow text files.
///
/// The file is one flow per paragraph (blank-line separated). A flow whose
/// first line contains `encrypted` is marked excluded: its payload carries
/// no readable signal, so it must not consume budget.
pub struct TextFileReader {
    root: PathBuf,
}

impl TextFileReader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, handle: &ArtifactHandle) -> PathBuf {
        self.root.join(&handle.locator)
    }

    fn split_flows(text: &str) -> Vec<&str> {
        text.split("\n\n")
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect()
    }

    fn is_excluded(flow: &str) -> bool {
        flow.lines()
            .next()
            .is_some_and(|first| first.to_lowercase().contains("encrypted"))
    }
}

impl ArtifactReader for TextFileReader {
    fn resolve<'a>(&'a self, handle: &'a ArtifactHandle) -> ArtifactFuture<'a, String> {
        Box::pin(async move {
            let path = self.path_for(handle);
            if !path.exists() {
                return Err(ArtifactError::NotFound(handle.id.clone()));
            }
            Ok(tokio::fs::read_to_string(path).await?)
        })
    }

    fn units<'a>(&'a self, handle: &'a ArtifactHandle) -> ArtifactFuture<'a, Vec<Unit>> {
        Box::pin(async move {
            let text = self.resolve(handle).await?;
            Ok(Self::split_flows(&text)
                .iter()
                .enumerate()
                .map(|(i, flow)| {
                    let excluded = Self::is_excluded(flow);
                    Unit {
                        id: format!("flow-{i}"),
                        size: if excluded { 0 } else { token_len(flow) },
                        excluded,
                    }
                })
                .collect())
        })
    }

    fn unit_text<'a>(
        &'a self,
        handle: &'a ArtifactHandle,
        unit_id: &'a str,
    ) -> ArtifactFuture<'a, String> {
        Box::pin(async move {
            let text = self.resolve(handle).await?;
            let flows = Self::split_flows(&text);
            let index: usize = unit_id
                .strip_prefix("flow-")
                .and_then(|n| n.parse().ok())
                .ok_or_else(|| ArtifactError::UnitNotFound(unit_id.to_string()))?;
            flows
                .get(index)
                .map(|f| (*f).to_string())
                .ok_or_else(|| ArtifactError::UnitNotFound(unit_id.to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn fixture() -> (tempfile::TempDir, TextFileReader, ArtifactHandle) {
        let dir = tempfile::tempdir().unwrap();
        let content = "flow 0: 10.0.0.1 -> 8.8.8.8 dns query example.com\n\n\
                       flow 1 (encrypted): 10.0.0.1 -> 1.2.3.4 tls\npayload unreadable\n\n\
                       flow 2: 10.0.0.1 -> 203.0.113.9 http GET /beacon";
        tokio::fs::write(dir.path().join("capture.txt"), content)
            .await
            .unwrap();
        let reader = TextFileReader::new(dir.path());
        let handle = ArtifactHandle::new("cap-1", "capture.txt");
        (dir, reader, handle)
    }

    #[tokio::test]
    async fn enumerates_units_with_sizes_and_exclusions() {
        let (_dir, reader, handle) = fixture().await;
        let units = reader.units(&handle).await.unwrap();
        assert_eq!(units.len(), 3);
        assert!(units[0].size > 0 && !units[0].excluded);
        assert!(units[1].excluded);
        assert_eq!(units[1].size, 0, "excluded units cost nothing");
        assert_eq!(units[2].id, "flow-2");
    }

    #[tokio::test]
    async fn unit_text_round_trips() {
        let (_dir, reader, handle) = fixture().await;
        let text = reader.unit_text(&handle, "flow-2").await.unwrap();
        assert!(text.contains("GET /beacon"));

        let err = reader.unit_text(&handle, "flow-9").await.unwrap_err();
        assert!(matches!(err, ArtifactError::UnitNotFound(_)));
    }

    #[tokio::test]
    async fn missing_artifact_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let reader = TextFileReader::new(dir.path());
        let handle = ArtifactHandle::new("missing", "nope.txt");
        let err = reader.resolve(&handle).await.unwrap_err();
        assert!(matches!(err, ArtifactError::NotFound(_)));
    }
}

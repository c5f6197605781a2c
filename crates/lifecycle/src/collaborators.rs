use crate::error::Result;
use crate::item::{FailureReason, TrackedItem};
use acqwatch_request_index::RequestId;
use async_trait::async_trait;
use std::path::Path;
use std::time::SystemTime;
use thiserror::Error;

/// One externally-sourced record identifying an expected data-collection
/// run, keyed by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRecord {
    pub name: String,
    pub request_id: RequestId,
}

impl RequestRecord {
    pub fn new(name: impl Into<String>, request_id: RequestId) -> Self {
        Self {
            name: name.into(),
            request_id,
        }
    }
}

/// Snapshot of pending request records, pulled as a finite sequence on
/// every index rebuild.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<RequestRecord>>;
}

/// What the file system currently says about a tracked path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileObservation {
    pub size_bytes: u64,
    pub modified: SystemTime,
}

/// File-metadata collaborator. `None` means the path is gone.
pub trait MetadataProbe: Send + Sync {
    fn probe(&self, path: &Path) -> Option<FileObservation>;
}

/// Default probe backed by `std::fs::metadata`. Local metadata calls do
/// not block meaningfully, so this is safe on the tick path.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsProbe;

impl MetadataProbe for FsProbe {
    fn probe(&self, path: &Path) -> Option<FileObservation> {
        let meta = std::fs::metadata(path).ok()?;
        let modified = meta.modified().ok()?;
        Some(FileObservation {
            size_bytes: meta.len(),
            modified,
        })
    }
}

/// Failure kinds an artifact generator reports; they map one-to-one onto
/// the [`FailureReason`] recorded on the item.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ArtifactError {
    #[error("file system error: {0}")]
    FileSystem(String),

    #[error("no confirmed request match: {0}")]
    NoMatch(String),

    #[error("unknown error: {0}")]
    Unknown(String),
}

impl ArtifactError {
    #[must_use]
    pub const fn reason(&self) -> FailureReason {
        match self {
            Self::FileSystem(_) => FailureReason::FileSystem,
            Self::NoMatch(_) => FailureReason::NoMatch,
            Self::Unknown(_) => FailureReason::Unknown,
        }
    }
}

/// Produces the registration artifact for an item whose wait period has
/// elapsed. May block on I/O; the orchestrator never calls it on the tick
/// path.
#[async_trait]
pub trait ArtifactGenerator: Send + Sync {
    /// Duplicate-detection list: true when an artifact for this name was
    /// already produced, possibly out of band.
    fn already_generated(&self, name: &str) -> bool;

    async fn generate(&self, item: &TrackedItem) -> std::result::Result<(), ArtifactError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn artifact_errors_map_to_reasons() {
        assert_eq!(
            ArtifactError::FileSystem("disk full".into()).reason(),
            FailureReason::FileSystem
        );
        assert_eq!(
            ArtifactError::NoMatch("no request".into()).reason(),
            FailureReason::NoMatch
        );
        assert_eq!(
            ArtifactError::Unknown("boom".into()).reason(),
            FailureReason::Unknown
        );
    }

    #[test]
    fn fs_probe_reads_size_and_mtime() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"0123456789").unwrap();
        file.flush().unwrap();

        let observed = FsProbe.probe(file.path()).unwrap();
        assert_eq!(observed.size_bytes, 10);
    }

    #[test]
    fn fs_probe_reports_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FsProbe.probe(&dir.path().join("gone.raw")).is_none());
    }
}

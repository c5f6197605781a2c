use crate::item::FailureReason;
use acqwatch_request_index::RequestId;
use serde::Serialize;
use std::path::PathBuf;

/// Discrete observability events emitted by the orchestrator and the
/// refresher. Delivered on a broadcast channel; a send with no receivers
/// is fine and never blocks the core.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WatchEvent {
    Resolved {
        source_path: PathBuf,
        request_id: RequestId,
        request_name: String,
    },
    ArtifactSent {
        source_path: PathBuf,
    },
    Failed {
        source_path: PathBuf,
        reason: FailureReason,
    },
    IndexRebuilt {
        entries: usize,
        duration_ms: u64,
    },
}

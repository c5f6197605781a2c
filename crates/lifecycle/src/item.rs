use acqwatch_request_index::RequestId;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Distinguishable failure kinds recorded on an item, so an operator can
/// decide whether to retry, override, or ignore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    FileSystem,
    NoMatch,
    Unknown,
}

/// Lifecycle state of a tracked item.
///
/// `ArtifactSent`, `Failed`, `Ignored` and `Aborted` are terminal: once
/// reached, no further timer evaluation happens for the item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Waiting for the write-settle period to elapse.
    Pending,
    /// Below the minimum-size threshold; the wait clock does not count.
    PendingSize,
    /// Pinned to a request record.
    Resolved,
    /// Wait elapsed without a confirmed match and policy does not allow
    /// proceeding; re-evaluated on later ticks.
    Unresolved,
    ArtifactSent,
    Failed(FailureReason),
    Ignored,
    Aborted,
}

impl ItemStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::ArtifactSent | Self::Failed(_) | Self::Ignored | Self::Aborted
        )
    }
}

/// Pinned link to a request record. Once an item is locked this never
/// changes, even if a later index generation disagrees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestMatch {
    pub request_id: RequestId,
    /// Name under which the match was confirmed (the item's own name, or
    /// its parent directory's name for folder-keyed layouts).
    pub request_name: String,
}

/// One discovered data source awaiting resolution and artifact generation.
#[derive(Debug, Clone)]
pub struct TrackedItem {
    pub source_path: PathBuf,
    pub name: String,
    pub discovered_at: SystemTime,
    pub last_write: SystemTime,
    pub size_bytes: u64,
    pub request_match: Option<RequestMatch>,
    pub locked: bool,
    pub status: ItemStatus,
    pub quality_control: bool,
    pub(crate) artifact_in_flight: bool,
}

impl TrackedItem {
    #[must_use]
    pub fn new(source_path: PathBuf, size_bytes: u64, last_write: SystemTime) -> Self {
        let name = item_name(&source_path);
        let quality_control = name.to_lowercase().starts_with("qc_");
        Self {
            source_path,
            name,
            discovered_at: SystemTime::now(),
            last_write,
            size_bytes,
            request_match: None,
            locked: false,
            status: ItemStatus::Pending,
            quality_control,
            artifact_in_flight: false,
        }
    }

    /// Time elapsed since the last observed write. Clock skew (a write
    /// timestamp in the future) counts as zero elapsed.
    #[must_use]
    pub fn elapsed_since_write(&self, now: SystemTime) -> Duration {
        now.duration_since(self.last_write).unwrap_or_default()
    }

    /// Raw time-remaining computation presentation layers derive their
    /// countdowns and progress bars from.
    #[must_use]
    pub fn wait_progress(&self, now: SystemTime, wait: Duration) -> WaitProgress {
        WaitProgress::compute(self.elapsed_since_write(now), wait)
    }
}

/// Remaining wait and percent elapsed for one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WaitProgress {
    pub remaining_secs: u64,
    pub percent_elapsed: u8,
}

impl WaitProgress {
    #[must_use]
    pub fn compute(elapsed: Duration, wait: Duration) -> Self {
        if wait.is_zero() || elapsed >= wait {
            return Self {
                remaining_secs: 0,
                percent_elapsed: 100,
            };
        }
        let remaining = wait.saturating_sub(elapsed);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let percent_elapsed = ((elapsed.as_secs_f64() / wait.as_secs_f64()) * 100.0)
            .clamp(0.0, 100.0) as u8;
        Self {
            remaining_secs: remaining.as_secs(),
            percent_elapsed,
        }
    }
}

/// Serializable per-item view published after every tick.
#[derive(Debug, Clone, Serialize)]
pub struct ItemSnapshot {
    pub source_path: PathBuf,
    pub name: String,
    pub status: ItemStatus,
    pub size_bytes: u64,
    pub quality_control: bool,
    pub wait: WaitProgress,
    pub request_match: Option<RequestMatch>,
}

impl ItemSnapshot {
    pub(crate) fn of(item: &TrackedItem, now: SystemTime, wait: Duration) -> Self {
        Self {
            source_path: item.source_path.clone(),
            name: item.name.clone(),
            status: item.status,
            size_bytes: item.size_bytes,
            quality_control: item.quality_control,
            wait: item.wait_progress(now, wait),
            request_match: item.request_match.clone(),
        }
    }
}

/// Item name derived from a path: the file stem for leaf files, the
/// directory name for folder-shaped sources.
#[must_use]
pub fn item_name(path: &Path) -> String {
    path.file_stem()
        .or_else(|| path.file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

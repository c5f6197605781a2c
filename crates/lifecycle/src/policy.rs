use serde::Deserialize;
use std::time::Duration;

/// Injected knobs for the lifecycle core. All fields default, so a partial
/// config file deserializes cleanly.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WatchPolicy {
    /// Settle period after the last observed write before an item becomes
    /// eligible for resolution and artifact generation.
    pub wait_secs: u64,

    /// Files below this size sit in `PendingSize`; the wait clock does not
    /// count until the size clears.
    pub minimum_size_bytes: u64,

    /// Allow an ordinary item with no confirmed match to proceed to
    /// artifact generation anyway.
    pub allow_unresolved: bool,

    /// Same, for quality-control items.
    pub allow_unresolved_qc: bool,

    /// Lifecycle evaluation interval.
    pub tick_millis: u64,

    /// Periodic index rebuild interval; `None` means on-demand only.
    pub refresh_secs: Option<u64>,
}

impl WatchPolicy {
    #[must_use]
    pub const fn wait_duration(&self) -> Duration {
        Duration::from_secs(self.wait_secs)
    }

    /// Never zero; a zero interval would spin the select loop.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_millis.max(1))
    }

    #[must_use]
    pub fn refresh_interval(&self) -> Option<Duration> {
        self.refresh_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

impl Default for WatchPolicy {
    fn default() -> Self {
        Self {
            wait_secs: 300,
            minimum_size_bytes: 100 * 1024,
            allow_unresolved: false,
            allow_unresolved_qc: false,
            tick_millis: 330,
            refresh_secs: Some(600),
        }
    }
}

use crate::collaborators::RecordSource;
use crate::error::{Result, WatchError};
use crate::events::WatchEvent;
use acqwatch_request_index::RequestIndex;
use log::{info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time;

/// Latest published index generation. `None` until the first successful
/// build; the orchestrator treats lookups against `None` as plain misses.
pub type IndexFeed = watch::Receiver<Option<Arc<RequestIndex>>>;

/// How many records to process between checks for a superseding refresh
/// request.
const SUPERSEDE_CHECK_EVERY: usize = 256;

#[derive(Debug, Clone, Serialize)]
pub struct RefreshHealth {
    pub ready: bool,
    pub refreshing: bool,
    pub generation: u64,
    pub entries: usize,
    pub last_success: Option<SystemTime>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub last_duration_ms: Option<u64>,
}

impl RefreshHealth {
    fn initial() -> Self {
        Self {
            ready: false,
            refreshing: false,
            generation: 0,
            entries: 0,
            last_success: None,
            last_error: None,
            consecutive_failures: 0,
            last_duration_ms: None,
        }
    }
}

enum RefreshCommand {
    Refresh { reason: String },
    Shutdown,
}

/// Periodically rebuilds the request index from a [`RecordSource`] and
/// publishes each generation atomically.
///
/// At most one rebuild is in flight; a refresh request arriving mid-build
/// supersedes the current build instead of queueing a second one. The old
/// generation stays published (and safe for concurrent lookups) until the
/// new one is complete.
#[derive(Clone)]
pub struct IndexRefresher {
    inner: Arc<RefresherInner>,
}

struct RefresherInner {
    command_tx: mpsc::Sender<RefreshCommand>,
    index_tx: watch::Sender<Option<Arc<RequestIndex>>>,
    health_tx: watch::Sender<RefreshHealth>,
}

impl IndexRefresher {
    pub fn start(
        source: Arc<dyn RecordSource>,
        refresh_interval: Option<Duration>,
        event_tx: broadcast::Sender<WatchEvent>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(16);
        let (index_tx, _) = watch::channel(None);
        let (health_tx, _) = watch::channel(RefreshHealth::initial());

        spawn_refresh_loop(
            source,
            refresh_interval,
            command_rx,
            index_tx.clone(),
            health_tx.clone(),
            event_tx,
        );

        Self {
            inner: Arc::new(RefresherInner {
                command_tx,
                index_tx,
                health_tx,
            }),
        }
    }

    /// Request a rebuild. Returns once the request is queued, not once the
    /// build completes; watch [`IndexRefresher::index`] or
    /// [`IndexRefresher::health_stream`] for completion.
    pub async fn refresh(&self, reason: impl Into<String>) -> Result<()> {
        self.inner
            .command_tx
            .send(RefreshCommand::Refresh {
                reason: reason.into(),
            })
            .await
            .map_err(|_| WatchError::ChannelClosed("refresher command"))
    }

    #[must_use]
    pub fn index(&self) -> IndexFeed {
        self.inner.index_tx.subscribe()
    }

    #[must_use]
    pub fn health_snapshot(&self) -> RefreshHealth {
        self.inner.health_tx.subscribe().borrow().clone()
    }

    #[must_use]
    pub fn health_stream(&self) -> watch::Receiver<RefreshHealth> {
        self.inner.health_tx.subscribe()
    }
}

impl Drop for IndexRefresher {
    fn drop(&mut self) {
        if Arc::strong_count(&self.inner) == 1 {
            let _ = self.inner.command_tx.try_send(RefreshCommand::Shutdown);
        }
    }
}

enum Rebuild {
    Built {
        index: RequestIndex,
        skipped: usize,
    },
    Failed(String),
    Superseded {
        reason: String,
    },
    Shutdown,
}

fn spawn_refresh_loop(
    source: Arc<dyn RecordSource>,
    refresh_interval: Option<Duration>,
    mut command_rx: mpsc::Receiver<RefreshCommand>,
    index_tx: watch::Sender<Option<Arc<RequestIndex>>>,
    health_tx: watch::Sender<RefreshHealth>,
    event_tx: broadcast::Sender<WatchEvent>,
) {
    tokio::spawn(async move {
        let mut health = RefreshHealth::initial();
        let mut schedule = refresh_interval.map(time::interval);

        loop {
            let mut reason = tokio::select! {
                cmd = command_rx.recv() => match cmd {
                    Some(RefreshCommand::Refresh { reason }) => reason,
                    Some(RefreshCommand::Shutdown) | None => break,
                },
                () = tick_schedule(&mut schedule) => "scheduled".to_string(),
            };

            loop {
                health.refreshing = true;
                let _ = health_tx.send(health.clone());

                let started = Instant::now();
                match rebuild_once(&source, &mut command_rx).await {
                    Rebuild::Built { index, skipped } => {
                        #[allow(clippy::cast_possible_truncation)]
                        let duration_ms = started.elapsed().as_millis() as u64;
                        let entries = index.len();
                        if skipped > 0 {
                            warn!("index rebuild skipped {skipped} blank request records");
                        }
                        info!(
                            "index rebuilt: {entries} entries in {duration_ms}ms (reason: {reason})"
                        );

                        let _ = index_tx.send(Some(Arc::new(index)));
                        health.ready = true;
                        health.refreshing = false;
                        health.generation += 1;
                        health.entries = entries;
                        health.last_success = Some(SystemTime::now());
                        health.last_error = None;
                        health.consecutive_failures = 0;
                        health.last_duration_ms = Some(duration_ms);
                        let _ = health_tx.send(health.clone());
                        let _ = event_tx.send(WatchEvent::IndexRebuilt {
                            entries,
                            duration_ms,
                        });
                        break;
                    }
                    Rebuild::Failed(err) => {
                        #[allow(clippy::cast_possible_truncation)]
                        let duration_ms = started.elapsed().as_millis() as u64;
                        warn!("index rebuild failed, previous generation stays active: {err}");

                        health.refreshing = false;
                        health.consecutive_failures += 1;
                        health.last_error = Some(err);
                        health.last_duration_ms = Some(duration_ms);
                        let _ = health_tx.send(health.clone());
                        break;
                    }
                    Rebuild::Superseded {
                        reason: next_reason,
                    } => {
                        info!("index rebuild superseded (new reason: {next_reason})");
                        reason = next_reason;
                    }
                    Rebuild::Shutdown => return,
                }
            }
        }
    });
}

async fn tick_schedule(schedule: &mut Option<time::Interval>) {
    match schedule.as_mut() {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// One fetch-and-build attempt. The fetch races against the command
/// channel, and the insert loop checks it between chunks, so a newer
/// refresh request cancels this build cooperatively instead of letting a
/// doomed generation finish.
async fn rebuild_once(
    source: &Arc<dyn RecordSource>,
    command_rx: &mut mpsc::Receiver<RefreshCommand>,
) -> Rebuild {
    let records = tokio::select! {
        fetched = source.fetch() => match fetched {
            Ok(records) => records,
            Err(err) => return Rebuild::Failed(err.to_string()),
        },
        cmd = command_rx.recv() => {
            return match cmd {
                Some(RefreshCommand::Refresh { reason }) => Rebuild::Superseded { reason },
                Some(RefreshCommand::Shutdown) | None => Rebuild::Shutdown,
            };
        }
    };

    let mut index = RequestIndex::new();
    let mut skipped = 0usize;
    for (processed, record) in records.iter().enumerate() {
        if processed % SUPERSEDE_CHECK_EVERY == 0 {
            match command_rx.try_recv() {
                Ok(RefreshCommand::Refresh { reason }) => {
                    return Rebuild::Superseded { reason };
                }
                Ok(RefreshCommand::Shutdown) | Err(TryRecvError::Disconnected) => {
                    return Rebuild::Shutdown;
                }
                Err(TryRecvError::Empty) => {}
            }
        }

        // A single bad record never aborts the whole rebuild.
        if record.name.trim().is_empty() {
            skipped += 1;
            continue;
        }
        index.insert(&record.name, record.request_id);
    }
    index.prune();

    Rebuild::Built { index, skipped }
}

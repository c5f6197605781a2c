use crate::collaborators::{ArtifactError, ArtifactGenerator, MetadataProbe};
use crate::error::{Result, WatchError};
use crate::events::WatchEvent;
use crate::item::{FailureReason, ItemSnapshot, ItemStatus, RequestMatch, TrackedItem};
use crate::policy::WatchPolicy;
use crate::refresher::IndexFeed;
use acqwatch_request_index::RequestIndex;
use log::{debug, info, warn};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{self, MissedTickBehavior};

enum ItemCommand {
    Track { path: PathBuf },
    Ignore { path: PathBuf },
    Abort { path: PathBuf },
    Remove { path: PathBuf },
    Shutdown,
}

struct GenerationOutcome {
    path: PathBuf,
    result: std::result::Result<(), ArtifactError>,
}

/// Timer-driven state machine over the tracked-item collection.
///
/// The collection lives inside one select-loop task; every external
/// mutation funnels through the command channel, so per-item transitions
/// are strictly ordered across ticks without a lock. Artifact generation
/// is dispatched off the tick path and its completion re-enters the loop
/// as a message.
#[derive(Clone)]
pub struct LifecycleOrchestrator {
    inner: Arc<OrchestratorInner>,
}

struct OrchestratorInner {
    command_tx: mpsc::Sender<ItemCommand>,
    event_tx: broadcast::Sender<WatchEvent>,
    snapshot_tx: watch::Sender<Vec<ItemSnapshot>>,
}

impl LifecycleOrchestrator {
    pub fn start(
        policy: WatchPolicy,
        index: IndexFeed,
        probe: Arc<dyn MetadataProbe>,
        generator: Arc<dyn ArtifactGenerator>,
        event_tx: broadcast::Sender<WatchEvent>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(256);
        let (snapshot_tx, _) = watch::channel(Vec::new());

        spawn_tick_loop(
            policy,
            index,
            probe,
            generator,
            command_rx,
            event_tx.clone(),
            snapshot_tx.clone(),
        );

        Self {
            inner: Arc::new(OrchestratorInner {
                command_tx,
                event_tx,
                snapshot_tx,
            }),
        }
    }

    /// The single insert entry point. Tracking an already-known,
    /// non-terminal path refreshes its observed size and write time.
    pub async fn track(&self, path: impl Into<PathBuf>) -> Result<()> {
        self.send(ItemCommand::Track { path: path.into() }).await
    }

    pub async fn ignore(&self, path: impl Into<PathBuf>) -> Result<()> {
        self.send(ItemCommand::Ignore { path: path.into() }).await
    }

    /// One-way transition to `Aborted`; safe to request at any time and
    /// short-circuits all further automatic processing of the item.
    pub async fn abort(&self, path: impl Into<PathBuf>) -> Result<()> {
        self.send(ItemCommand::Abort { path: path.into() }).await
    }

    /// External user action — the only way an item leaves the collection.
    pub async fn remove(&self, path: impl Into<PathBuf>) -> Result<()> {
        self.send(ItemCommand::Remove { path: path.into() }).await
    }

    #[must_use]
    pub fn snapshots(&self) -> watch::Receiver<Vec<ItemSnapshot>> {
        self.inner.snapshot_tx.subscribe()
    }

    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<WatchEvent> {
        self.inner.event_tx.subscribe()
    }

    async fn send(&self, command: ItemCommand) -> Result<()> {
        self.inner
            .command_tx
            .send(command)
            .await
            .map_err(|_| WatchError::ChannelClosed("orchestrator command"))
    }
}

impl Drop for LifecycleOrchestrator {
    fn drop(&mut self) {
        if Arc::strong_count(&self.inner) == 1 {
            let _ = self.inner.command_tx.try_send(ItemCommand::Shutdown);
        }
    }
}

fn spawn_tick_loop(
    policy: WatchPolicy,
    index: IndexFeed,
    probe: Arc<dyn MetadataProbe>,
    generator: Arc<dyn ArtifactGenerator>,
    mut command_rx: mpsc::Receiver<ItemCommand>,
    event_tx: broadcast::Sender<WatchEvent>,
    snapshot_tx: watch::Sender<Vec<ItemSnapshot>>,
) {
    tokio::spawn(async move {
        let mut items: BTreeMap<PathBuf, TrackedItem> = BTreeMap::new();
        let (outcome_tx, mut outcome_rx) = mpsc::channel::<GenerationOutcome>(64);
        let mut tick = time::interval(policy.tick_interval());
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(command) = command_rx.recv() => {
                    match command {
                        ItemCommand::Track { path } => track_item(&mut items, path, &*probe),
                        ItemCommand::Ignore { path } => {
                            set_terminal(&mut items, &path, ItemStatus::Ignored);
                        }
                        ItemCommand::Abort { path } => {
                            set_terminal(&mut items, &path, ItemStatus::Aborted);
                        }
                        ItemCommand::Remove { path } => {
                            items.remove(&path);
                        }
                        ItemCommand::Shutdown => break,
                    }
                }
                Some(outcome) = outcome_rx.recv() => {
                    apply_generation_outcome(&mut items, outcome, &event_tx);
                }
                _ = tick.tick() => {
                    run_tick(
                        &mut items,
                        &policy,
                        &index,
                        &*probe,
                        &generator,
                        &outcome_tx,
                        &event_tx,
                    );
                }
            }

            publish_snapshots(&items, &policy, &snapshot_tx);
        }
    });
}

fn track_item(items: &mut BTreeMap<PathBuf, TrackedItem>, path: PathBuf, probe: &dyn MetadataProbe) {
    let observed = probe.probe(&path);
    match items.entry(path) {
        Entry::Occupied(mut entry) => {
            let item = entry.get_mut();
            if item.status.is_terminal() {
                return;
            }
            if let Some(observed) = observed {
                item.size_bytes = observed.size_bytes;
                item.last_write = observed.modified;
            }
        }
        Entry::Vacant(entry) => {
            let (size_bytes, last_write) = observed
                .map(|o| (o.size_bytes, o.modified))
                .unwrap_or((0, SystemTime::now()));
            let item = TrackedItem::new(entry.key().clone(), size_bytes, last_write);
            info!("tracking {} as '{}'", item.source_path.display(), item.name);
            entry.insert(item);
        }
    }
}

fn set_terminal(items: &mut BTreeMap<PathBuf, TrackedItem>, path: &Path, status: ItemStatus) {
    let Some(item) = items.get_mut(path) else {
        return;
    };
    if item.status.is_terminal() {
        return;
    }
    debug!("{}: {:?} -> {:?}", path.display(), item.status, status);
    item.status = status;
}

/// One lifecycle evaluation pass. Items are independent; the order they
/// are visited in carries no meaning.
fn run_tick(
    items: &mut BTreeMap<PathBuf, TrackedItem>,
    policy: &WatchPolicy,
    index: &IndexFeed,
    probe: &dyn MetadataProbe,
    generator: &Arc<dyn ArtifactGenerator>,
    outcome_tx: &mpsc::Sender<GenerationOutcome>,
    event_tx: &broadcast::Sender<WatchEvent>,
) {
    let now = SystemTime::now();
    let index = index.borrow().clone();

    for item in items.values_mut() {
        if item.status.is_terminal() || item.artifact_in_flight {
            continue;
        }

        // Size gate: the wait clock does not count until the file clears
        // the minimum size.
        if item.size_bytes < policy.minimum_size_bytes {
            match probe.probe(&item.source_path) {
                Some(observed) => {
                    item.size_bytes = observed.size_bytes;
                    item.last_write = observed.modified;
                    item.status = ItemStatus::PendingSize;
                }
                None => fail(item, FailureReason::FileSystem, event_tx),
            }
            continue;
        }

        // An artifact produced out of band must not be re-registered.
        if generator.already_generated(&item.name) {
            debug!("{}: artifact already exists", item.name);
            item.status = ItemStatus::ArtifactSent;
            let _ = event_tx.send(WatchEvent::ArtifactSent {
                source_path: item.source_path.clone(),
            });
            continue;
        }

        if item.elapsed_since_write(now) < policy.wait_duration() {
            if item.status == ItemStatus::PendingSize {
                item.status = ItemStatus::Pending;
            }
            continue;
        }

        if !item.locked {
            if let Some(index) = index.as_deref() {
                if let Some(matched) = resolve(index, item) {
                    info!(
                        "{}: resolved to request {} via '{}'",
                        item.name, matched.request_id, matched.request_name
                    );
                    item.request_match = Some(matched.clone());
                    item.locked = true;
                    item.status = ItemStatus::Resolved;
                    let _ = event_tx.send(WatchEvent::Resolved {
                        source_path: item.source_path.clone(),
                        request_id: matched.request_id,
                        request_name: matched.request_name,
                    });
                }
            }
        }

        let allowed = item.request_match.is_some()
            || if item.quality_control {
                policy.allow_unresolved_qc
            } else {
                policy.allow_unresolved
            };
        if !allowed {
            item.status = ItemStatus::Unresolved;
            continue;
        }

        dispatch_generation(item, generator, outcome_tx);
    }
}

/// Two-attempt lookup: the item's own name, then the parent directory's
/// name (acquisition layouts where the meaningful identifier is the
/// containing folder). Both misses are one equivalent not-found.
fn resolve(index: &RequestIndex, item: &TrackedItem) -> Option<RequestMatch> {
    let hit = index.find(&item.name);
    if let Some(request_id) = hit.request_id {
        return Some(RequestMatch {
            request_id,
            request_name: item.name.clone(),
        });
    }

    let parent = item
        .source_path
        .parent()
        .and_then(|dir| dir.file_name())
        .map(|name| name.to_string_lossy())?;
    index.find(&parent).request_id.map(|request_id| RequestMatch {
        request_id,
        request_name: parent.into_owned(),
    })
}

/// Artifact generation blocks on I/O, so it never runs on the tick path:
/// the item is flagged in flight and the call completes in its own task.
fn dispatch_generation(
    item: &mut TrackedItem,
    generator: &Arc<dyn ArtifactGenerator>,
    outcome_tx: &mpsc::Sender<GenerationOutcome>,
) {
    item.artifact_in_flight = true;
    let generator = Arc::clone(generator);
    let outcome_tx = outcome_tx.clone();
    let frozen = item.clone();
    tokio::spawn(async move {
        let result = generator.generate(&frozen).await;
        let _ = outcome_tx
            .send(GenerationOutcome {
                path: frozen.source_path,
                result,
            })
            .await;
    });
}

fn apply_generation_outcome(
    items: &mut BTreeMap<PathBuf, TrackedItem>,
    outcome: GenerationOutcome,
    event_tx: &broadcast::Sender<WatchEvent>,
) {
    let Some(item) = items.get_mut(&outcome.path) else {
        return;
    };
    item.artifact_in_flight = false;

    // An abort (or ignore) that raced the generation wins; the item is
    // terminal and the late completion is discarded.
    if item.status.is_terminal() {
        return;
    }

    match outcome.result {
        Ok(()) => {
            info!("{}: artifact sent", item.name);
            item.status = ItemStatus::ArtifactSent;
            let _ = event_tx.send(WatchEvent::ArtifactSent {
                source_path: item.source_path.clone(),
            });
        }
        Err(err) => {
            warn!("{}: artifact generation failed: {err}", item.name);
            fail(item, err.reason(), event_tx);
        }
    }
}

fn fail(item: &mut TrackedItem, reason: FailureReason, event_tx: &broadcast::Sender<WatchEvent>) {
    item.status = ItemStatus::Failed(reason);
    let _ = event_tx.send(WatchEvent::Failed {
        source_path: item.source_path.clone(),
        reason,
    });
}

fn publish_snapshots(
    items: &BTreeMap<PathBuf, TrackedItem>,
    policy: &WatchPolicy,
    snapshot_tx: &watch::Sender<Vec<ItemSnapshot>>,
) {
    let now = SystemTime::now();
    let wait = policy.wait_duration();
    let snapshots = items
        .values()
        .map(|item| ItemSnapshot::of(item, now, wait))
        .collect();
    let _ = snapshot_tx.send(snapshots);
}

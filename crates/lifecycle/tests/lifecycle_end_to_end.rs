//! End-to-end wiring: a real directory, the std::fs metadata probe, a
//! file-backed record source and a manifest-stub generator, driven through
//! refresher and orchestrator together.

use acqwatch_lifecycle::{
    ArtifactError, ArtifactGenerator, FsProbe, IndexRefresher, ItemSnapshot, ItemStatus,
    LifecycleOrchestrator, RecordSource, RequestRecord, Result, TrackedItem, WatchEvent,
    WatchPolicy,
};
use async_trait::async_trait;
use pretty_assertions::assert_eq;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::timeout;

struct StaticSource(Vec<RequestRecord>);

#[async_trait]
impl RecordSource for StaticSource {
    async fn fetch(&self) -> Result<Vec<RequestRecord>> {
        Ok(self.0.clone())
    }
}

struct StubWriter {
    out_dir: PathBuf,
    written: Mutex<Vec<String>>,
}

impl StubWriter {
    fn new(out_dir: PathBuf) -> Arc<Self> {
        Arc::new(Self {
            out_dir,
            written: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ArtifactGenerator for StubWriter {
    fn already_generated(&self, name: &str) -> bool {
        self.out_dir.join(format!("{name}.manifest.json")).exists()
    }

    async fn generate(&self, item: &TrackedItem) -> std::result::Result<(), ArtifactError> {
        let target = self.out_dir.join(format!("{}.manifest.json", item.name));
        let body = format!(
            "{{\"dataset\":\"{}\",\"request_id\":{}}}\n",
            item.name,
            item.request_match
                .as_ref()
                .map_or(0, |matched| matched.request_id)
        );
        tokio::fs::write(&target, body)
            .await
            .map_err(|err| ArtifactError::FileSystem(err.to_string()))?;
        self.written
            .lock()
            .expect("writer lock")
            .push(item.name.clone());
        Ok(())
    }
}

async fn wait_for_status(
    snapshots: &mut watch::Receiver<Vec<ItemSnapshot>>,
    name: &str,
    status: ItemStatus,
) -> ItemSnapshot {
    timeout(Duration::from_secs(10), async {
        loop {
            {
                let current = snapshots.borrow();
                if let Some(item) = current.iter().find(|i| i.name == name) {
                    if item.status == status {
                        return item.clone();
                    }
                }
            }
            snapshots.changed().await.expect("orchestrator gone");
        }
    })
    .await
    .expect("status never reached")
}

#[tokio::test]
async fn discovered_file_flows_to_a_registration_manifest() {
    let data_dir = tempfile::tempdir().unwrap();
    let out_dir = tempfile::tempdir().unwrap();

    let source_path = data_dir.path().join("ProjectA_Run1_Rep2.raw");
    fs::write(&source_path, vec![0u8; 4096]).unwrap();

    let policy = WatchPolicy {
        wait_secs: 0,
        minimum_size_bytes: 1024,
        tick_millis: 10,
        refresh_secs: None,
        ..WatchPolicy::default()
    };

    let (event_tx, mut event_rx) = broadcast::channel(32);
    let source = Arc::new(StaticSource(vec![
        RequestRecord::new("ProjectA_Run1", 101),
        RequestRecord::new("QC_Blank_01", 11),
    ]));
    let refresher = IndexRefresher::start(source, None, event_tx.clone());
    refresher.refresh("startup").await.unwrap();

    let writer = StubWriter::new(out_dir.path().to_path_buf());
    let orchestrator = LifecycleOrchestrator::start(
        policy,
        refresher.index(),
        Arc::new(FsProbe),
        writer.clone(),
        event_tx,
    );
    let mut snapshots = orchestrator.snapshots();

    orchestrator.track(&source_path).await.unwrap();
    let item = wait_for_status(&mut snapshots, "ProjectA_Run1_Rep2", ItemStatus::ArtifactSent)
        .await;

    assert_eq!(item.request_match.as_ref().unwrap().request_id, 101);
    assert!(out_dir
        .path()
        .join("ProjectA_Run1_Rep2.manifest.json")
        .exists());
    assert_eq!(
        writer.written.lock().unwrap().clone(),
        vec!["ProjectA_Run1_Rep2".to_string()]
    );

    let mut saw_rebuilt = false;
    let mut saw_resolved = false;
    let mut saw_sent = false;
    while let Ok(event) = event_rx.try_recv() {
        match event {
            WatchEvent::IndexRebuilt { entries, .. } => {
                assert_eq!(entries, 2);
                saw_rebuilt = true;
            }
            WatchEvent::Resolved { request_id, .. } => {
                assert_eq!(request_id, 101);
                saw_resolved = true;
            }
            WatchEvent::ArtifactSent { .. } => saw_sent = true,
            WatchEvent::Failed { .. } => panic!("unexpected failure event"),
        }
    }
    assert!(saw_rebuilt);
    assert!(saw_resolved);
    assert!(saw_sent);
}

#[tokio::test]
async fn preexisting_manifest_short_circuits_to_artifact_sent() {
    let data_dir = tempfile::tempdir().unwrap();
    let out_dir = tempfile::tempdir().unwrap();

    let source_path = data_dir.path().join("ProjectA_Run1.raw");
    fs::write(&source_path, vec![0u8; 4096]).unwrap();
    fs::write(
        out_dir.path().join("ProjectA_Run1.manifest.json"),
        "{}\n",
    )
    .unwrap();

    let policy = WatchPolicy {
        wait_secs: 0,
        minimum_size_bytes: 1024,
        tick_millis: 10,
        refresh_secs: None,
        ..WatchPolicy::default()
    };

    let (event_tx, _) = broadcast::channel(32);
    let refresher = IndexRefresher::start(
        Arc::new(StaticSource(vec![RequestRecord::new("ProjectA_Run1", 101)])),
        None,
        event_tx.clone(),
    );
    refresher.refresh("startup").await.unwrap();

    let writer = StubWriter::new(out_dir.path().to_path_buf());
    let orchestrator = LifecycleOrchestrator::start(
        policy,
        refresher.index(),
        Arc::new(FsProbe),
        writer.clone(),
        event_tx,
    );
    let mut snapshots = orchestrator.snapshots();

    orchestrator.track(&source_path).await.unwrap();
    wait_for_status(&mut snapshots, "ProjectA_Run1", ItemStatus::ArtifactSent).await;

    // The artifact existed out of band; nothing was re-generated.
    assert!(writer.written.lock().unwrap().is_empty());
}

#[tokio::test]
async fn undersized_file_stays_gated_until_it_grows() {
    let data_dir = tempfile::tempdir().unwrap();
    let out_dir = tempfile::tempdir().unwrap();

    let source_path = data_dir.path().join("ProjectA_Run1.raw");
    fs::write(&source_path, vec![0u8; 16]).unwrap();

    let policy = WatchPolicy {
        wait_secs: 0,
        minimum_size_bytes: 1024,
        tick_millis: 10,
        refresh_secs: None,
        ..WatchPolicy::default()
    };

    let (event_tx, _) = broadcast::channel(32);
    let refresher = IndexRefresher::start(
        Arc::new(StaticSource(vec![RequestRecord::new("ProjectA_Run1", 101)])),
        None,
        event_tx.clone(),
    );
    refresher.refresh("startup").await.unwrap();

    let orchestrator = LifecycleOrchestrator::start(
        policy,
        refresher.index(),
        Arc::new(FsProbe),
        StubWriter::new(out_dir.path().to_path_buf()),
        event_tx,
    );
    let mut snapshots = orchestrator.snapshots();

    orchestrator.track(&source_path).await.unwrap();
    wait_for_status(&mut snapshots, "ProjectA_Run1", ItemStatus::PendingSize).await;

    fs::write(&source_path, vec![0u8; 4096]).unwrap();
    wait_for_status(&mut snapshots, "ProjectA_Run1", ItemStatus::ArtifactSent).await;
}

use acqwatch_lifecycle::LifecycleOrchestrator;
use log::{info, warn};
use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use walkdir::WalkDir;

/// Keeps the notify watcher alive for the lifetime of the watch command.
pub struct Discovery {
    _watcher: RecommendedWatcher,
}

/// Start discovery for `root`: an initial sweep of existing files plus a
/// recursive watcher for everything the acquisition software writes
/// later. Each discovered path becomes a `Track` command.
pub fn spawn(root: PathBuf, orchestrator: LifecycleOrchestrator) -> anyhow::Result<Discovery> {
    let (event_tx, event_rx) = mpsc::channel(1024);
    let mut watcher = RecommendedWatcher::new(
        move |res| {
            let _ = event_tx.blocking_send(res);
        },
        NotifyConfig::default(),
    )?;
    watcher.watch(&root, RecursiveMode::Recursive)?;

    spawn_feed_loop(orchestrator.clone(), event_rx);
    spawn_initial_sweep(root, orchestrator);

    Ok(Discovery { _watcher: watcher })
}

fn spawn_initial_sweep(root: PathBuf, orchestrator: LifecycleOrchestrator) {
    tokio::spawn(async move {
        let swept = root.clone();
        let found = tokio::task::spawn_blocking(move || sweep(&swept))
            .await
            .unwrap_or_default();
        info!("initial sweep of {} found {} files", root.display(), found.len());
        for path in found {
            if orchestrator.track(path).await.is_err() {
                return;
            }
        }
    });
}

fn sweep(root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    for entry in WalkDir::new(root) {
        match entry {
            Ok(entry) => {
                if entry.file_type().is_file() && is_discoverable(entry.path()) {
                    found.push(entry.path().to_path_buf());
                }
            }
            Err(err) => warn!("sweep error under {}: {err}", root.display()),
        }
    }
    found
}

fn spawn_feed_loop(
    orchestrator: LifecycleOrchestrator,
    mut event_rx: mpsc::Receiver<notify::Result<Event>>,
) {
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            let event = match event {
                Ok(event) => event,
                Err(err) => {
                    warn!("watcher error: {err}");
                    continue;
                }
            };
            for path in event.paths {
                if !is_discoverable(&path) {
                    continue;
                }
                let is_file = std::fs::metadata(&path)
                    .map(|meta| meta.is_file())
                    .unwrap_or(false);
                if !is_file {
                    continue;
                }
                if orchestrator.track(path).await.is_err() {
                    return;
                }
            }
        }
    });
}

/// Hidden files and in-progress temporaries are acquisition noise, not
/// datasets.
fn is_discoverable(path: &Path) -> bool {
    match path.file_name().and_then(|name| name.to_str()) {
        Some(name) => !name.starts_with('.') && !name.ends_with(".tmp"),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discoverable_filters_noise() {
        assert!(is_discoverable(Path::new("/data/ProjectA_Run1.raw")));
        assert!(!is_discoverable(Path::new("/data/.DS_Store")));
        assert!(!is_discoverable(Path::new("/data/upload.manifest.json.tmp")));
    }

    #[test]
    fn sweep_finds_only_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("run_folder")).unwrap();
        std::fs::write(dir.path().join("run_folder/a.raw"), b"x").unwrap();
        std::fs::write(dir.path().join("b.raw"), b"x").unwrap();
        std::fs::write(dir.path().join(".hidden"), b"x").unwrap();

        let mut names: Vec<String> = sweep(dir.path())
            .into_iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        names.sort();
        assert_eq!(names, vec!["a.raw".to_string(), "b.raw".to_string()]);
    }
}

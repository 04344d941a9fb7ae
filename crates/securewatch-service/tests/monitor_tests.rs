//! End-to-end tests for the file integrity monitor.
//!
//! These drive the real notify watcher against a tempdir: start the
//! monitor, touch protected files, and assert on the events that come out
//! of the bus and the persisted working set.

use securewatch_core::alert_log::AlertLog;
use securewatch_core::bus::{EventBus, EventKind};
use securewatch_core::model::{PathKind, ProtectedPath};
use securewatch_core::store::PathStore;
use securewatch_service::filewatch::{FileMonitor, MonitorState};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::tempdir;
use tokio::sync::broadcast;
use tokio::time::timeout;

const EVENT_WAIT: Duration = Duration::from_secs(5);

fn fixture(dir: &Path) -> (PathStore, AlertLog, EventBus) {
    let store = PathStore::new(dir.join("protected_paths.json"));
    let alerts = AlertLog::new(dir.join("alerts.log"), 1024 * 1024).unwrap();
    (store, alerts, EventBus::new())
}

fn protected_dir_record(path: &Path) -> ProtectedPath {
    let mut record = ProtectedPath::new(path);
    record.kind = PathKind::Directory;
    record
}

/// Wait until an event of the wanted kind arrives, skipping others.
async fn recv_kind(
    rx: &mut broadcast::Receiver<securewatch_core::bus::Event>,
    want: EventKind,
) -> serde_json::Value {
    loop {
        let event = timeout(EVENT_WAIT, rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("bus closed");
        if event.kind == want {
            return event.data;
        }
    }
}

#[tokio::test]
async fn modification_in_protected_dir_alerts_and_counts() {
    let dir = tempdir().unwrap();
    let watched = dir.path().join("watched");
    fs::create_dir_all(&watched).unwrap();
    let watched = watched.canonicalize().unwrap();
    let target = watched.join("secret.txt");
    fs::write(&target, b"original").unwrap();

    let (store, alerts, bus) = fixture(dir.path());
    store.save(&[protected_dir_record(&watched)]).unwrap();

    let monitor = FileMonitor::new(store, alerts, bus.clone());
    let mut rx = bus.subscribe();
    monitor.start().await.unwrap();
    assert_eq!(monitor.state(), MonitorState::Monitoring);

    // give the watcher a moment to arm before mutating
    tokio::time::sleep(Duration::from_millis(300)).await;
    fs::write(&target, b"tampered").unwrap();

    let alert = recv_kind(&mut rx, EventKind::NewAlert).await;
    assert_eq!(alert["severity"], "warning");
    assert_eq!(alert["kind"], "file");

    let file_event = recv_kind(&mut rx, EventKind::FileEvent).await;
    assert_eq!(file_event["path"], target.display().to_string());

    let paths = monitor.protected_paths();
    assert_eq!(paths.len(), 1);
    assert!(paths[0].access_attempts >= 1);
    assert!(paths[0].last_accessed.is_some());

    monitor.stop().await;
    assert_eq!(monitor.state(), MonitorState::Stopped);
}

#[tokio::test]
async fn add_protected_path_watches_while_running() {
    let dir = tempdir().unwrap();
    let (store, alerts, bus) = fixture(dir.path());

    let monitor = FileMonitor::new(store, alerts, bus.clone());
    let mut rx = bus.subscribe();
    monitor.start().await.unwrap();

    // nothing protected yet; now add a directory at runtime
    let late = dir.path().join("late");
    fs::create_dir_all(&late).unwrap();
    let late = late.canonicalize().unwrap();
    monitor
        .add_protected_path(protected_dir_record(&late))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    fs::write(late.join("fresh.txt"), b"data").unwrap();

    let file_event = recv_kind(&mut rx, EventKind::FileEvent).await;
    let event_path = PathBuf::from(file_event["path"].as_str().unwrap());
    assert!(event_path.starts_with(&late));

    monitor.stop().await;
}

#[tokio::test]
async fn removed_path_no_longer_attributes() {
    let dir = tempdir().unwrap();
    let watched = dir.path().join("watched");
    fs::create_dir_all(&watched).unwrap();
    let watched = watched.canonicalize().unwrap();

    let (store, alerts, bus) = fixture(dir.path());
    store.save(&[protected_dir_record(&watched)]).unwrap();

    let monitor = FileMonitor::new(store, alerts, bus.clone());
    monitor.start().await.unwrap();
    assert!(monitor.remove_protected_path(&watched).await);
    assert!(monitor.protected_paths().is_empty());

    tokio::time::sleep(Duration::from_millis(300)).await;
    fs::write(watched.join("ignored.txt"), b"data").unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    // the OS watch is intentionally left registered, but nothing
    // attributes, so no state changes
    assert!(monitor.protected_paths().is_empty());
    monitor.stop().await;
}

#[tokio::test]
async fn stop_then_start_runs_single_pipeline() {
    let dir = tempdir().unwrap();
    let watched = dir.path().join("watched");
    fs::create_dir_all(&watched).unwrap();
    let watched = watched.canonicalize().unwrap();

    let (store, alerts, bus) = fixture(dir.path());
    store.save(&[protected_dir_record(&watched)]).unwrap();

    let monitor = FileMonitor::new(store, alerts, bus.clone());
    monitor.start().await.unwrap();
    monitor.stop().await;
    assert_eq!(monitor.state(), MonitorState::Stopped);

    let mut rx = bus.subscribe();
    monitor.start().await.unwrap();
    // second start while running must be a no-op
    monitor.start().await.unwrap();
    assert_eq!(monitor.state(), MonitorState::Monitoring);

    tokio::time::sleep(Duration::from_millis(300)).await;
    fs::write(watched.join("once.txt"), b"data").unwrap();

    // exactly one pipeline: one file event for the create, not two
    let first = recv_kind(&mut rx, EventKind::FileEvent).await;
    assert_eq!(first["kind"], "created");
    let duplicate = timeout(Duration::from_millis(800), async {
        loop {
            let event = rx.recv().await.expect("bus closed");
            if event.kind == EventKind::FileEvent && event.data["kind"] == "created" {
                return event.data;
            }
        }
    })
    .await;
    assert!(duplicate.is_err(), "duplicate pipeline produced a second event");

    monitor.stop().await;
}

#[tokio::test]
async fn failed_store_load_leaves_monitor_stopped_and_restartable() {
    let dir = tempdir().unwrap();
    let store_file = dir.path().join("protected_paths.json");
    fs::write(&store_file, b"{ not valid json").unwrap();

    let (store, alerts, bus) = fixture(dir.path());
    let monitor = FileMonitor::new(store, alerts, bus);
    assert!(monitor.start().await.is_err());
    assert_eq!(monitor.state(), MonitorState::Stopped);

    // repairing the store must make the next start succeed
    fs::write(&store_file, b"[]").unwrap();
    monitor.start().await.unwrap();
    assert_eq!(monitor.state(), MonitorState::Monitoring);
    monitor.stop().await;
    assert_eq!(monitor.state(), MonitorState::Stopped);
}

#[tokio::test]
async fn no_events_processed_after_stop() {
    let dir = tempdir().unwrap();
    let watched = dir.path().join("watched");
    fs::create_dir_all(&watched).unwrap();
    let watched = watched.canonicalize().unwrap();

    let (store, alerts, bus) = fixture(dir.path());
    store.save(&[protected_dir_record(&watched)]).unwrap();

    let monitor = FileMonitor::new(store, alerts, bus.clone());
    monitor.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    monitor.stop().await;

    let attempts_at_stop = monitor.protected_paths()[0].access_attempts;
    fs::write(watched.join("after.txt"), b"data").unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(monitor.protected_paths()[0].access_attempts, attempts_at_stop);
}

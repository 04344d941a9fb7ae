//! File integrity monitor: single-consumer event pipeline with per-path
//! alert policy and auto-lock escalation.
//!
//! One notify watcher thread produces into an unbounded queue; one async
//! consumer drains it in strict arrival order. All working-set mutation
//! happens on the consumer (or through the explicit add/remove calls), so
//! the protected-path state never needs cross-thread coordination beyond
//! its mutex.

use crate::filewatch::watcher::{PathWatcher, RawFileEvent};
use parking_lot::Mutex;
use securewatch_core::alert_log::AlertLog;
use securewatch_core::bus::EventBus;
use securewatch_core::model::{
    Alert, AlertKind, AlertSeverity, FileEvent, FileEventKind, PathStatus, ProtectedPath,
};
use securewatch_core::store::PathStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

/// Attempts strictly above this threshold trigger auto-lock.
const AUTO_LOCK_THRESHOLD: u32 = 5;
const AUTO_LOCK_REASON: &str = "Multiple suspicious access attempts";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Stopped,
    Monitoring,
    Stopping,
}

pub struct FileMonitor {
    core: Arc<MonitorCore>,
    state: Mutex<MonitorState>,
    runtime: tokio::sync::Mutex<Option<MonitorRuntime>>,
}

struct MonitorRuntime {
    // kept alive for the duration of monitoring; dropping it stops the
    // OS-level watcher
    watcher: PathWatcher,
    shutdown_tx: watch::Sender<bool>,
    consumer: tokio::task::JoinHandle<()>,
}

impl FileMonitor {
    pub fn new(store: PathStore, alerts: AlertLog, bus: EventBus) -> Self {
        Self {
            core: Arc::new(MonitorCore {
                paths: Mutex::new(Vec::new()),
                store,
                alerts,
                bus,
            }),
            state: Mutex::new(MonitorState::Stopped),
            runtime: tokio::sync::Mutex::new(None),
        }
    }

    pub fn state(&self) -> MonitorState {
        *self.state.lock()
    }

    pub fn protected_paths(&self) -> Vec<ProtectedPath> {
        self.core.paths.lock().clone()
    }

    /// Load the persisted protected set, register watches, and start the
    /// consumer. A second call while monitoring is a warned no-op.
    pub async fn start(&self) -> anyhow::Result<()> {
        {
            let mut state = self.state.lock();
            if *state != MonitorState::Stopped {
                warn!("file monitoring already running");
                return Ok(());
            }
            *state = MonitorState::Monitoring;
        }

        let loaded = match self.core.store.load() {
            Ok(loaded) => loaded,
            Err(err) => {
                *self.state.lock() = MonitorState::Stopped;
                return Err(err.into());
            }
        };
        {
            let mut paths = self.core.paths.lock();
            *paths = loaded;
            info!(count = paths.len(), "file monitoring starting");
        }

        let (queue_tx, mut queue_rx) = mpsc::unbounded_channel::<RawFileEvent>();
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let mut watcher = match PathWatcher::new(queue_tx) {
            Ok(w) => w,
            Err(err) => {
                *self.state.lock() = MonitorState::Stopped;
                return Err(err);
            }
        };
        for record in self.core.paths.lock().iter() {
            if let Err(err) = watcher.watch(&record.path) {
                warn!(path = %record.path.display(), error = %err, "failed to register watch");
            }
        }

        let core = self.core.clone();
        let consumer = tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe_event = queue_rx.recv() => {
                        match maybe_event {
                            Some(event) => core.handle_event(event),
                            None => {
                                debug!("file event queue closed, consumer exiting");
                                return;
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            debug!("file event consumer shutting down");
                            return;
                        }
                    }
                }
            }
        });

        *self.runtime.lock().await = Some(MonitorRuntime {
            watcher,
            shutdown_tx,
            consumer,
        });
        info!("file monitoring started");
        Ok(())
    }

    /// Stop monitoring: cancel the consumer, await its exit, and drop the
    /// watcher. No event is processed after this returns; an event already
    /// in `handle_event` completes first.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock();
            if *state != MonitorState::Monitoring {
                return;
            }
            *state = MonitorState::Stopping;
        }
        if let Some(runtime) = self.runtime.lock().await.take() {
            let _ = runtime.shutdown_tx.send(true);
            if let Err(err) = runtime.consumer.await {
                warn!(error = %err, "file event consumer did not exit cleanly");
            }
            drop(runtime.watcher);
        }
        *self.state.lock() = MonitorState::Stopped;
        info!("file monitoring stopped");
    }

    /// Add a path to the working set and persist it; registers a live watch
    /// when monitoring is active.
    pub async fn add_protected_path(&self, record: ProtectedPath) -> anyhow::Result<()> {
        let path = record.path.clone();
        {
            let mut paths = self.core.paths.lock();
            if paths.iter().any(|r| r.path == path) {
                anyhow::bail!("path already protected: {}", path.display());
            }
            paths.push(record);
        }
        self.core.persist();
        if let Some(runtime) = self.runtime.lock().await.as_mut() {
            runtime.watcher.watch(&path)?;
        }
        Ok(())
    }

    /// Remove a path from the working set. The underlying OS watch is left
    /// registered: a file's watch covers its parent directory, which may
    /// also serve sibling protected files. Events for the removed path stop
    /// attributing and are dropped.
    pub async fn remove_protected_path(&self, path: &Path) -> bool {
        let removed = {
            let mut paths = self.core.paths.lock();
            let before = paths.len();
            paths.retain(|r| r.path != path);
            paths.len() != before
        };
        if removed {
            self.core.persist();
        }
        removed
    }

}

pub(crate) struct MonitorCore {
    pub(crate) paths: Mutex<Vec<ProtectedPath>>,
    store: PathStore,
    alerts: AlertLog,
    bus: EventBus,
}

impl MonitorCore {
    #[cfg(test)]
    pub(crate) fn for_tests(store: PathStore, alerts: AlertLog, bus: EventBus) -> Self {
        Self {
            paths: Mutex::new(Vec::new()),
            store,
            alerts,
            bus,
        }
    }

    /// Process one queued event end to end. Never panics or returns an
    /// error: per-event failures are logged so the consumer loop survives.
    pub(crate) fn handle_event(&self, raw: RawFileEvent) {
        let mut paths = self.paths.lock();
        let Some(record) = attribute_mut(&mut paths, &raw.path) else {
            trace!(path = %raw.path.display(), "event path not under protection, dropped");
            return;
        };

        record.access_attempts += 1;
        record.last_accessed = Some(chrono::Utc::now());

        let should_alert = match raw.kind {
            FileEventKind::Modified | FileEventKind::Moved => record.alert_on_write,
            FileEventKind::Created | FileEventKind::Deleted => record.alert_on_delete,
        };
        // Note: alert_on_read is never triggered here; change notifications
        // cannot observe pure reads.

        if should_alert {
            let alert = Alert::new(
                AlertKind::File,
                AlertSeverity::Warning,
                format!("Protected File {}", event_word(raw.kind)),
                format!("File {} was {}", raw.path.display(), event_word_past(raw.kind)),
                raw.path.display().to_string(),
            );
            self.emit_alert(&alert);
        }

        if record.auto_lock
            && record.access_attempts > AUTO_LOCK_THRESHOLD
            && record.status != PathStatus::Locked
        {
            record.status = PathStatus::Locked;
            record.lock_reason = Some(AUTO_LOCK_REASON.to_string());
            let alert = Alert::new(
                AlertKind::File,
                AlertSeverity::Critical,
                "File Auto-Locked",
                format!(
                    "File {} has been automatically locked: {}",
                    record.path.display(),
                    AUTO_LOCK_REASON
                ),
                record.path.display().to_string(),
            );
            info!(path = %record.path.display(), "auto-lock triggered");
            self.emit_alert(&alert);
        }

        let event = FileEvent::new(raw.kind, raw.path.clone(), raw.old_path.clone());
        self.bus.publish_file_event(&event);

        drop(paths);
        self.persist();
    }

    fn emit_alert(&self, alert: &Alert) {
        // a failed durable write must not interrupt monitoring; in-memory
        // state stays authoritative
        if let Err(err) = self.alerts.record(alert) {
            warn!(error = %err, "failed to persist alert");
        }
        self.bus.publish_alert(alert);
    }

    fn persist(&self) {
        let paths = self.paths.lock();
        if let Err(err) = self.store.save(&paths) {
            warn!(error = %err, "failed to persist protected paths");
        }
    }
}

/// Resolve an event path to its protected record: exact match first, then
/// the closest protected directory ancestor.
fn attribute_mut<'a>(
    paths: &'a mut [ProtectedPath],
    candidate: &PathBuf,
) -> Option<&'a mut ProtectedPath> {
    if let Some(idx) = paths.iter().position(|r| &r.path == candidate) {
        return paths.get_mut(idx);
    }
    let idx = paths
        .iter()
        .position(|r| r.covers(candidate) && &r.path != candidate)?;
    paths.get_mut(idx)
}

fn event_word(kind: FileEventKind) -> &'static str {
    match kind {
        FileEventKind::Created => "Created",
        FileEventKind::Modified => "Modified",
        FileEventKind::Deleted => "Deleted",
        FileEventKind::Moved => "Moved",
    }
}

fn event_word_past(kind: FileEventKind) -> &'static str {
    match kind {
        FileEventKind::Created => "created",
        FileEventKind::Modified => "modified",
        FileEventKind::Deleted => "deleted",
        FileEventKind::Moved => "moved",
    }
}

//! Filesystem watch registration and the thread → async bridge.
//!
//! The `notify` callback runs on the watcher's own thread. It maps raw
//! notify events into `RawFileEvent`s and pushes them onto an unbounded
//! mpsc queue whose single consumer lives on the async pipeline; the
//! watcher thread never touches pipeline state directly.

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use securewatch_core::model::FileEventKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct RawFileEvent {
    pub kind: FileEventKind,
    pub path: PathBuf,
    pub old_path: Option<PathBuf>,
}

pub struct PathWatcher {
    watcher: RecommendedWatcher,
}

impl PathWatcher {
    pub fn new(queue: mpsc::UnboundedSender<RawFileEvent>) -> anyhow::Result<Self> {
        let watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    for raw in map_notify_event(&event) {
                        if queue.send(raw).is_err() {
                            debug!("file event consumer gone, dropping event");
                            return;
                        }
                    }
                }
                Err(err) => warn!(error = %err, "filesystem watcher error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;
        Ok(Self { watcher })
    }

    /// Register a watch for one protected path: directories recursively,
    /// single files via their parent directory (native watch APIs cannot
    /// watch one file).
    pub fn watch(&mut self, path: &Path) -> anyhow::Result<()> {
        if !path.exists() {
            warn!(path = %path.display(), "protected path does not exist, cannot watch");
            return Ok(());
        }
        if path.is_dir() {
            self.watcher.watch(path, RecursiveMode::Recursive)?;
        } else {
            let parent = path
                .parent()
                .ok_or_else(|| anyhow::anyhow!("no parent directory for {}", path.display()))?;
            self.watcher.watch(parent, RecursiveMode::NonRecursive)?;
        }
        info!(path = %path.display(), "watching protected path");
        Ok(())
    }
}

/// Map a notify event to zero or more canonical file events. Directory
/// create/modify noise is dropped; rename pairs become a single Moved.
pub fn map_notify_event(event: &Event) -> Vec<RawFileEvent> {
    let mut out = Vec::new();
    match &event.kind {
        EventKind::Create(_) => {
            for path in &event.paths {
                if path.is_dir() {
                    continue;
                }
                out.push(RawFileEvent {
                    kind: FileEventKind::Created,
                    path: path.clone(),
                    old_path: None,
                });
            }
        }
        EventKind::Modify(modify_kind) => {
            use notify::event::ModifyKind;
            match modify_kind {
                ModifyKind::Name(_) if event.paths.len() >= 2 => {
                    out.push(RawFileEvent {
                        kind: FileEventKind::Moved,
                        path: event.paths[1].clone(),
                        old_path: Some(event.paths[0].clone()),
                    });
                }
                ModifyKind::Name(_) => {
                    // single-path rename half; treat as a modification of
                    // the reported path
                    for path in &event.paths {
                        out.push(RawFileEvent {
                            kind: FileEventKind::Modified,
                            path: path.clone(),
                            old_path: None,
                        });
                    }
                }
                _ => {
                    for path in &event.paths {
                        if path.is_dir() {
                            continue;
                        }
                        out.push(RawFileEvent {
                            kind: FileEventKind::Modified,
                            path: path.clone(),
                            old_path: None,
                        });
                    }
                }
            }
        }
        EventKind::Remove(_) => {
            for path in &event.paths {
                out.push(RawFileEvent {
                    kind: FileEventKind::Deleted,
                    path: path.clone(),
                    old_path: None,
                });
            }
        }
        _ => {}
    }
    out
}

pub mod monitor;
pub mod watcher;

pub use monitor::{FileMonitor, MonitorState};
pub use watcher::RawFileEvent;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Intrusion,
    File,
    Network,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Critical,
    Warning,
    Info,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub title: String,
    pub description: String,
    pub source: String,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(
        kind: AlertKind,
        severity: AlertSeverity,
        title: impl Into<String>,
        description: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            severity,
            title: title.into(),
            description: description.into(),
            source: source.into(),
            status: AlertStatus::Active,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PathKind {
    File,
    Directory,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PathStatus {
    Protected,
    Locked,
    Authorized,
}

/// One protected filesystem path mirrored from the persisted store.
///
/// `access_attempts` only ever grows here; resetting it is an external
/// administrative action, as is unlocking a `Locked` record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectedPath {
    pub id: Uuid,
    pub path: PathBuf,
    pub kind: PathKind,
    pub status: PathStatus,
    pub access_attempts: u32,
    pub last_accessed: Option<DateTime<Utc>>,
    pub lock_reason: Option<String>,
    pub alert_on_read: bool,
    pub alert_on_write: bool,
    pub alert_on_delete: bool,
    pub auto_lock: bool,
    pub created_at: DateTime<Utc>,
}

impl ProtectedPath {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let kind = if path.is_dir() {
            PathKind::Directory
        } else {
            PathKind::File
        };
        Self {
            id: Uuid::new_v4(),
            path,
            kind,
            status: PathStatus::Protected,
            access_attempts: 0,
            last_accessed: None,
            lock_reason: None,
            alert_on_read: true,
            alert_on_write: true,
            alert_on_delete: true,
            auto_lock: false,
            created_at: Utc::now(),
        }
    }

    /// True if `candidate` is this record's path or lives under it when the
    /// record covers a directory.
    pub fn covers(&self, candidate: &Path) -> bool {
        if candidate == self.path {
            return true;
        }
        self.kind == PathKind::Directory && candidate.starts_with(&self.path)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileEventKind {
    Created,
    Modified,
    Deleted,
    Moved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEvent {
    pub kind: FileEventKind,
    pub path: PathBuf,
    pub old_path: Option<PathBuf>,
    pub timestamp: DateTime<Utc>,
}

impl FileEvent {
    pub fn new(kind: FileEventKind, path: impl Into<PathBuf>, old_path: Option<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            old_path,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_record_covers_descendants() {
        let mut record = ProtectedPath::new("/etc/securewatch");
        record.kind = PathKind::Directory;
        assert!(record.covers(Path::new("/etc/securewatch")));
        assert!(record.covers(Path::new("/etc/securewatch/conf.d/agent.toml")));
        assert!(!record.covers(Path::new("/etc/securewatch-other/file")));
        assert!(!record.covers(Path::new("/etc")));
    }

    #[test]
    fn file_record_covers_only_itself() {
        let mut record = ProtectedPath::new("/etc/passwd");
        record.kind = PathKind::File;
        assert!(record.covers(Path::new("/etc/passwd")));
        assert!(!record.covers(Path::new("/etc/passwd.bak")));
    }
}

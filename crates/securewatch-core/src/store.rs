//! Persisted protected-path list.
//!
//! The durable record is a JSON array on disk; the monitor keeps the
//! in-memory working set and writes back after mutations. Saves go through
//! a temp file + rename so a crash never leaves a half-written store.

use crate::error::Result;
use crate::model::ProtectedPath;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub struct PathStore {
    path: PathBuf,
}

impl PathStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn load(&self) -> Result<Vec<ProtectedPath>> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no path store on disk, starting empty");
            return Ok(vec![]);
        }
        let json = fs::read_to_string(&self.path)?;
        let records: Vec<ProtectedPath> = serde_json::from_str(&json)?;
        info!(count = records.len(), "loaded protected paths");
        Ok(records)
    }

    pub fn save(&self, records: &[ProtectedPath]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(records)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PathStatus, ProtectedPath};
    use tempfile::tempdir;

    #[test]
    fn save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let store = PathStore::new(dir.path().join("protected_paths.json"));
        assert!(store.load().unwrap().is_empty());

        let mut record = ProtectedPath::new("/etc/hosts");
        record.auto_lock = true;
        record.access_attempts = 3;
        store.save(&[record.clone()]).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, record.id);
        assert_eq!(loaded[0].access_attempts, 3);
        assert_eq!(loaded[0].status, PathStatus::Protected);
        assert!(loaded[0].auto_lock);
    }

    #[test]
    fn save_overwrites_previous_contents() {
        let dir = tempdir().unwrap();
        let store = PathStore::new(dir.path().join("protected_paths.json"));
        store.save(&[ProtectedPath::new("/a"), ProtectedPath::new("/b")]).unwrap();
        store.save(&[ProtectedPath::new("/c")]).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].path, PathBuf::from("/c"));
    }
}

//! Append-only alert/log sink backed by a JSON-lines file.
//!
//! Entries form a SHA-256 hash chain so truncation or in-place edits are
//! detectable after the fact. Files rotate at a byte threshold; the chain
//! restarts on each rotated file while the sequence stays monotonic.

use crate::error::Result;
use crate::model::Alert;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

const MAX_ROTATIONS: usize = 5;
const CHAIN_START: &str = "CHAIN_START";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEntry {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub alert: Alert,
    pub prev_hash: String,
    pub hash: String,
}

pub struct AlertLog {
    path: PathBuf,
    max_bytes: u64,
    inner: Mutex<ChainState>,
}

#[derive(Debug)]
struct ChainState {
    last_seq: u64,
    last_hash: String,
}

impl AlertLog {
    pub fn new<P: AsRef<Path>>(path: P, max_bytes: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let (last_seq, last_hash) = Self::load_state(&path)?;
        Ok(Self {
            path,
            max_bytes,
            inner: Mutex::new(ChainState {
                last_seq,
                last_hash,
            }),
        })
    }

    fn load_state(path: &Path) -> Result<(u64, String)> {
        if !path.exists() {
            return Ok((0, CHAIN_START.to_string()));
        }
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut last_seq = 0;
        let mut last_hash = CHAIN_START.to_string();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: AlertEntry = serde_json::from_str(&line)?;
            last_seq = entry.seq;
            last_hash = entry.hash;
        }
        Ok((last_seq, last_hash))
    }

    fn compute_hash(entry_without_hash: &serde_json::Value) -> String {
        let mut hasher = Sha256::new();
        hasher.update(entry_without_hash.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn record(&self, alert: &Alert) -> Result<AlertEntry> {
        self.rotate_if_needed()?;
        let mut state = self.inner.lock();
        let seq = state.last_seq + 1;
        let prev_hash = state.last_hash.clone();
        let mut entry_value = serde_json::json!({
            "seq": seq,
            "timestamp": Utc::now(),
            "alert": alert,
            "prev_hash": prev_hash,
        });
        let hash = Self::compute_hash(&entry_value);
        entry_value["hash"] = serde_json::Value::String(hash.clone());

        let entry: AlertEntry = serde_json::from_value(entry_value)?;
        self.write_entry(&entry)?;
        state.last_seq = seq;
        state.last_hash = hash;
        Ok(entry)
    }

    fn write_entry(&self, entry: &AlertEntry) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(entry)?;
        writeln!(file, "{}", line)?;
        file.flush()?;
        Ok(())
    }

    fn rotate_if_needed(&self) -> Result<()> {
        let mut state = self.inner.lock();
        if let Ok(metadata) = fs::metadata(&self.path) {
            if metadata.len() < self.max_bytes {
                return Ok(());
            }
        } else {
            return Ok(());
        }
        for i in (1..=MAX_ROTATIONS).rev() {
            let rotated = self.path_with_suffix(i);
            if rotated.exists() {
                if i == MAX_ROTATIONS {
                    fs::remove_file(&rotated)?;
                } else {
                    fs::rename(&rotated, self.path_with_suffix(i + 1))?;
                }
            }
        }
        fs::rename(&self.path, self.path_with_suffix(1))?;
        // chain restarts per file; sequence stays monotonic
        state.last_hash = CHAIN_START.to_string();
        Ok(())
    }

    /// Read recent entries, newest first.
    pub fn read_recent(&self, limit: Option<usize>) -> Result<Vec<AlertEntry>> {
        if !self.path.exists() {
            return Ok(vec![]);
        }
        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str::<AlertEntry>(&line)?);
        }
        entries.reverse();
        if let Some(lim) = limit {
            entries.truncate(lim);
        }
        Ok(entries)
    }

    fn path_with_suffix(&self, index: usize) -> PathBuf {
        let mut p = self.path.clone();
        let filename = p
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_else(|| "alerts.log".to_string());
        p.set_file_name(format!("{}.{}", filename, index));
        p
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AlertKind, AlertSeverity};
    use tempfile::tempdir;

    fn sample_alert(i: usize) -> Alert {
        Alert::new(
            AlertKind::File,
            AlertSeverity::Warning,
            "Protected File Modified",
            format!("event {i}"),
            "/etc/passwd",
        )
    }

    #[test]
    fn chain_links_and_rotation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("alerts.log");
        let log = AlertLog::new(&path, 512).unwrap();
        let mut prev = CHAIN_START.to_string();
        for i in 0..40 {
            let entry = log.record(&sample_alert(i)).unwrap();
            assert_eq!(entry.seq as usize, i + 1);
            if entry.prev_hash != CHAIN_START {
                assert_eq!(entry.prev_hash, prev);
            }
            prev = entry.hash;
        }
        assert!(path.with_file_name("alerts.log.1").exists());
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("alerts.log");
        {
            let log = AlertLog::new(&path, 1024 * 1024).unwrap();
            log.record(&sample_alert(0)).unwrap();
            log.record(&sample_alert(1)).unwrap();
        }
        let log = AlertLog::new(&path, 1024 * 1024).unwrap();
        let entry = log.record(&sample_alert(2)).unwrap();
        assert_eq!(entry.seq, 3);

        let recent = log.read_recent(Some(2)).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].seq, 3);
    }
}

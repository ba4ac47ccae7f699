//! Ledgers of processed mailbox ids.
//!
//! `threads_metadata.json` maps each thread id to the message ids already
//! saved for it; a message listed there is never retrieved again.
//! `new_emails` lists the ids saved since the last upload cycle.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::storage::filesystem::{read_to_string, write_file};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadRecord {
    pub id: String,
    #[serde(default)]
    pub mail_ids: Vec<String>,
    pub created_at: String,
}

#[derive(Debug)]
pub struct ThreadLedger {
    path: PathBuf,
    threads: BTreeMap<String, ThreadRecord>,
}

impl ThreadLedger {
    /// Loads the ledger, treating a missing or empty file as empty.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let threads = if path.exists() {
            let content = read_to_string(&path)?;
            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&content).map_err(|e| StorageError::MalformedLedger {
                    path: path.clone(),
                    source: e,
                })?
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self { path, threads })
    }

    pub fn save(&self) -> Result<(), StorageError> {
        let json = serde_json::to_vec_pretty(&self.threads).map_err(|e| {
            StorageError::MalformedLedger {
                path: self.path.clone(),
                source: e,
            }
        })?;
        write_file(&self.path, &json)
    }

    /// Registers a sighting of `thread_id`, creating its record if needed.
    /// `created_at` is refreshed on every sighting.
    pub fn touch(&mut self, thread_id: &str) -> &mut ThreadRecord {
        let now = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let record = self
            .threads
            .entry(thread_id.to_string())
            .or_insert_with(|| ThreadRecord {
                id: thread_id.to_string(),
                mail_ids: Vec::new(),
                created_at: now.clone(),
            });
        record.created_at = now;
        record
    }

    pub fn is_recorded(&self, thread_id: &str, message_id: &str) -> bool {
        self.threads
            .get(thread_id)
            .is_some_and(|t| t.mail_ids.iter().any(|id| id == message_id))
    }

    /// Appends `message_id` to the thread's processed list. Returns `false`
    /// if it was already there.
    pub fn record(&mut self, thread_id: &str, message_id: &str) -> bool {
        if self.is_recorded(thread_id, message_id) {
            return false;
        }
        self.touch(thread_id).mail_ids.push(message_id.to_string());
        true
    }

    pub fn get(&self, thread_id: &str) -> Option<&ThreadRecord> {
        self.threads.get(thread_id)
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }
}

/// Newline-delimited log of message ids retrieved since the last cycle.
#[derive(Debug, Clone)]
pub struct NewMessageLog {
    path: PathBuf,
}

impl NewMessageLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, message_id: &str) -> Result<(), StorageError> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| StorageError::WriteFile {
                path: self.path.clone(),
                source: e,
            })?;
        writeln!(file, "{}", message_id).map_err(|e| StorageError::WriteFile {
            path: self.path.clone(),
            source: e,
        })
    }

    /// Ids in first-seen order without duplicates or blank lines.
    pub fn read_ids(&self) -> Result<Vec<String>, StorageError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = read_to_string(&self.path)?;
        let mut ids: Vec<String> = Vec::new();
        for id in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if !ids.iter().any(|seen| seen == id) {
                ids.push(id.to_string());
            }
        }
        Ok(ids)
    }

    pub fn clear(&self) -> Result<(), StorageError> {
        write_file(&self.path, b"")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_ledger_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = ThreadLedger::load(temp_dir.path().join("threads_metadata.json")).unwrap();
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_record_is_idempotent_and_persisted() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("threads_metadata.json");

        let mut ledger = ThreadLedger::load(&path).unwrap();
        assert!(ledger.record("t1", "m1"));
        assert!(!ledger.record("t1", "m1"));
        assert!(ledger.record("t1", "m2"));
        ledger.save().unwrap();

        let reloaded = ThreadLedger::load(&path).unwrap();
        assert!(reloaded.is_recorded("t1", "m1"));
        assert!(!reloaded.is_recorded("t2", "m1"));
        assert_eq!(reloaded.get("t1").unwrap().mail_ids, vec!["m1", "m2"]);
    }

    #[test]
    fn test_reads_legacy_layout() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("threads_metadata.json");
        std::fs::write(
            &path,
            r#"{"t1": {"id": "t1", "mail_ids": ["m1"], "created_at": "2024-07-25 10:00:00"}}"#,
        )
        .unwrap();

        let ledger = ThreadLedger::load(&path).unwrap();
        assert!(ledger.is_recorded("t1", "m1"));
    }

    #[test]
    fn test_malformed_ledger_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("threads_metadata.json");
        std::fs::write(&path, "{not json").unwrap();

        assert!(matches!(
            ThreadLedger::load(&path),
            Err(StorageError::MalformedLedger { .. })
        ));
    }

    #[test]
    fn test_new_message_log_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let log = NewMessageLog::new(temp_dir.path().join("new_emails"));
        assert!(log.read_ids().unwrap().is_empty());

        log.append("m1").unwrap();
        log.append("m2").unwrap();
        log.append("m1").unwrap();
        assert_eq!(log.read_ids().unwrap(), vec!["m1", "m2"]);

        log.clear().unwrap();
        assert!(log.read_ids().unwrap().is_empty());
    }

    #[test]
    fn test_new_message_log_tolerates_leading_newlines() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("new_emails");
        std::fs::write(&path, "\nm1\n\nm2").unwrap();
        assert_eq!(NewMessageLog::new(path).read_ids().unwrap(), vec!["m1", "m2"]);
    }
}

//! On-disk layout of the mailgraph data directory.
//!
//! ```text
//! <data_dir>/
//!   .mailgraph.lock
//!   credentials/credentials.json   OAuth client secrets
//!   credentials/token.json         stored mailbox token
//!   threads/<thread_id>/<message_id>/{<sender>_<subject>.txt, metadata.json, ...}
//!   threads_metadata.json          processed-thread ledger
//!   new_emails                     ids retrieved since the last cycle
//!   ocr/                           OCR inbox
//!   ocr/processed/                 inbox text already sent upstream
//! ```

pub mod filesystem;

use std::fs::File;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use walkdir::WalkDir;

use crate::error::StorageError;

pub use filesystem::{
    ensure_directory, move_file, move_into, read_to_string, remove_file, write_file, write_new_file,
};

const LOCK_FILE: &str = ".mailgraph.lock";

#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn threads_dir(&self) -> PathBuf {
        self.root.join("threads")
    }

    pub fn message_dir(&self, thread_id: &str, message_id: &str) -> PathBuf {
        self.threads_dir().join(thread_id).join(message_id)
    }

    pub fn threads_metadata_path(&self) -> PathBuf {
        self.root.join("threads_metadata.json")
    }

    pub fn new_emails_path(&self) -> PathBuf {
        self.root.join("new_emails")
    }

    pub fn credentials_dir(&self) -> PathBuf {
        self.root.join("credentials")
    }

    pub fn client_secrets_path(&self) -> PathBuf {
        self.credentials_dir().join("credentials.json")
    }

    pub fn token_path(&self) -> PathBuf {
        self.credentials_dir().join("token.json")
    }

    pub fn ocr_inbox(&self) -> PathBuf {
        self.root.join("ocr")
    }

    pub fn ocr_processed_dir(&self) -> PathBuf {
        self.ocr_inbox().join("processed")
    }

    /// Creates the top-level directories. Safe to call repeatedly.
    pub fn ensure_layout(&self) -> Result<(), StorageError> {
        for dir in [self.threads_dir(), self.credentials_dir(), self.ocr_inbox()] {
            ensure_directory(&dir)?;
        }
        Ok(())
    }

    /// Finds the folder of a retrieved message by id (`threads/*/<message_id>`).
    pub fn find_message_dir(&self, message_id: &str) -> Option<PathBuf> {
        WalkDir::new(self.threads_dir())
            .min_depth(2)
            .max_depth(2)
            .into_iter()
            .filter_map(|e| e.ok())
            .find(|e| e.file_type().is_dir() && e.file_name().to_str() == Some(message_id))
            .map(|e| e.into_path())
    }

    /// Takes the single-instance advisory lock. The ledgers are read and
    /// rewritten without further coordination, so the returned guard must be
    /// held for as long as the process touches them.
    pub fn lock(&self) -> Result<DataDirLock, StorageError> {
        ensure_directory(&self.root)?;
        let path = self.root.join(LOCK_FILE);
        let file = File::create(&path).map_err(|e| StorageError::WriteFile {
            path: path.clone(),
            source: e,
        })?;
        file.try_lock_exclusive()
            .map_err(|_| StorageError::Locked(self.root.clone()))?;
        log::debug!("Acquired data directory lock");
        Ok(DataDirLock { file })
    }
}

/// Exclusive lock on a data directory, released on drop.
#[derive(Debug)]
pub struct DataDirLock {
    file: File,
}

impl Drop for DataDirLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

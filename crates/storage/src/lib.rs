//! Persistence for voting-safety state.
//!
//! The safety state is a single small record, but losing it (or emitting a
//! vote before it hits disk) can make a validator equivocate after a crash.
//! The file store therefore never overwrites in place: it writes a fresh
//! file, fsyncs it, atomically renames it over the old one, and fsyncs the
//! directory. A crash at any point leaves either the old or the new record.

use keystone_types::SafetyState;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt safety state record: {0}")]
    Corrupt(#[from] bincode::Error),
}

/// Durable store for the node's [`SafetyState`].
///
/// `put` MUST be durable before it returns: safety rules persist through this
/// trait before releasing a vote.
pub trait SafetyStateStore: Send + Sync {
    fn get(&self) -> Result<Option<SafetyState>, StorageError>;
    fn put(&self, state: &SafetyState) -> Result<(), StorageError>;
}

/// Crash-atomic file-backed store: write new file, fsync, rename, fsync dir.
pub struct FileSafetyStore {
    path: PathBuf,
    temp_path: PathBuf,
}

impl FileSafetyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let temp_path = path.with_extension("new");
        FileSafetyStore { path, temp_path }
    }

    fn sync_parent_dir(&self) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                File::open(parent)?.sync_all()?;
            }
        }
        Ok(())
    }
}

impl SafetyStateStore for FileSafetyStore {
    fn get(&self) -> Result<Option<SafetyState>, StorageError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, state: &SafetyState) -> Result<(), StorageError> {
        let bytes = bincode::serialize(state)?;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.temp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&self.temp_path, &self.path)?;
        self.sync_parent_dir()?;

        debug!(
            path = %self.path.display(),
            locked_round = %state.locked_round,
            last_voted_round = %state.last_voted_round(),
            "Persisted safety state"
        );
        Ok(())
    }
}

/// In-memory store for tests and simulations.
#[derive(Default)]
pub struct InMemorySafetyStore {
    state: Mutex<Option<SafetyState>>,
}

impl InMemorySafetyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SafetyStateStore for InMemorySafetyStore {
    fn get(&self) -> Result<Option<SafetyState>, StorageError> {
        let guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(guard.clone())
    }

    fn put(&self, state: &SafetyState) -> Result<(), StorageError> {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some(state.clone());
        Ok(())
    }
}

/// Helper for tests that need a store seeded with a particular state.
pub fn store_at<P: AsRef<Path>>(dir: P, name: &str) -> FileSafetyStore {
    FileSafetyStore::new(dir.as_ref().join(name))
}

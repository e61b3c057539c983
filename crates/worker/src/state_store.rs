use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fleet_core::{FleetError, FleetResult};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::lifecycle::WorkerState;

/// Durable worker state record. External health-check collaborators
/// read this file directly, so the format is plain JSON and every write
/// replaces the whole record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateRecord {
    pub worker_id: String,
    pub state: WorkerState,
    pub updated_at: DateTime<Utc>,
}

impl StateRecord {
    pub fn new(worker_id: impl Into<String>, state: WorkerState) -> Self {
        Self {
            worker_id: worker_id.into(),
            state,
            updated_at: Utc::now(),
        }
    }
}

/// Crash-safe persistence for the lifecycle record.
///
/// Each write takes a scoped exclusive lock (a `create_new` lock file
/// against other processes, a mutex against other tasks), writes the
/// full record to a temp file in the same directory and atomically
/// renames it over the target. Readers therefore always observe either
/// the previous record or the new one, never a torn write.
pub struct StateStore {
    path: PathBuf,
    lock_path: PathBuf,
    write_guard: Mutex<()>,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = path.with_extension("lock");
        Self {
            path,
            lock_path,
            write_guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted record. A missing file is a fresh worker; an
    /// unreadable or unparseable file is corruption and fatal.
    pub async fn load(&self) -> FleetResult<Option<StateRecord>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(FleetError::state_corrupt(format!(
                    "failed to read state file {}: {e}",
                    self.path.display()
                )))
            }
        };
        let record = serde_json::from_str(&content).map_err(|e| {
            FleetError::state_corrupt(format!(
                "unparseable state file {}: {e}",
                self.path.display()
            ))
        })?;
        Ok(Some(record))
    }

    /// Persist the record atomically. Any failure here is fatal to the
    /// worker: a lifecycle we cannot record is a lifecycle we cannot
    /// trust after a crash.
    pub async fn persist(&self, record: &StateRecord) -> FleetResult<()> {
        let _guard = self.write_guard.lock().await;
        let _lock = FileLock::acquire(&self.lock_path)?;

        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(|e| {
            FleetError::state_corrupt(format!("failed to create state temp file: {e}"))
        })?;
        let json = serde_json::to_string_pretty(record)
            .map_err(|e| FleetError::state_corrupt(format!("unserializable state record: {e}")))?;
        temp.write_all(json.as_bytes())
            .and_then(|_| temp.flush())
            .map_err(|e| FleetError::state_corrupt(format!("failed to write state record: {e}")))?;
        temp.persist(&self.path).map_err(|e| {
            FleetError::state_corrupt(format!(
                "failed to replace state file {}: {e}",
                self.path.display()
            ))
        })?;
        debug!(
            "Persisted worker state {} to {}",
            record.state,
            self.path.display()
        );
        Ok(())
    }
}

/// Scoped cross-process exclusion around one state write. `create_new`
/// fails when another process holds the lock; the file is removed when
/// the guard drops.
struct FileLock {
    path: PathBuf,
}

impl FileLock {
    fn acquire(path: &Path) -> FleetResult<Self> {
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| {
                FleetError::state_corrupt(format!(
                    "state file locked at {}: {e}",
                    path.display()
                ))
            })?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn record_survives_a_reload() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = StateStore::new(dir.path().join("worker.state"));

        assert!(store.load().await.unwrap().is_none());

        let record = StateRecord::new("w1", WorkerState::Healthy);
        store.persist(&record).await.unwrap();

        let reloaded = store.load().await.unwrap().unwrap();
        assert_eq!(reloaded.worker_id, "w1");
        assert_eq!(reloaded.state, WorkerState::Healthy);
    }

    #[tokio::test]
    async fn writes_replace_the_whole_record() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = StateStore::new(dir.path().join("worker.state"));

        store
            .persist(&StateRecord::new("w1", WorkerState::Starting))
            .await
            .unwrap();
        store
            .persist(&StateRecord::new("w1", WorkerState::Healthy))
            .await
            .unwrap();

        let reloaded = store.load().await.unwrap().unwrap();
        assert_eq!(reloaded.state, WorkerState::Healthy);
    }

    #[tokio::test]
    async fn garbage_in_the_file_is_fatal_corruption() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("worker.state");
        std::fs::write(&path, "{ not json").expect("write garbage");

        let store = StateStore::new(&path);
        let err = store.load().await.unwrap_err();
        assert!(matches!(err, FleetError::StateCorrupt(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn foreign_lock_file_fails_the_write() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("worker.state");
        std::fs::write(path.with_extension("lock"), "").expect("plant lock");

        let store = StateStore::new(&path);
        let err = store
            .persist(&StateRecord::new("w1", WorkerState::Starting))
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::StateCorrupt(_)));

        // Clearing the lock lets the next write through.
        std::fs::remove_file(path.with_extension("lock")).expect("clear lock");
        store
            .persist(&StateRecord::new("w1", WorkerState::Starting))
            .await
            .unwrap();
    }
}

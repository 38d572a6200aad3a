//! Durable FIFO of readings the upstream sink could not take.

use crate::error::QueueError;
use crate::reading::Reading;
use crate::sink::Sink;
use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Default maximum number of queued readings
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

const QUEUE_FILE_VERSION: u32 = 1;

/// A reading waiting for upstream delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedReading {
    /// Monotonically increasing enqueue position
    pub position: u64,
    pub reading: Reading,
}

/// Persistence primitive behind the offline queue
#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn load(&self) -> Result<Vec<QueuedReading>, QueueError>;

    /// Replace the stored records
    async fn save(&self, records: &[QueuedReading]) -> Result<(), QueueError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct QueueFile {
    version: u32,
    records: Vec<QueuedReading>,
}

/// JSON file store; writes go to a sibling temp file and are renamed into place
#[derive(Debug, Clone)]
pub struct FileQueueStore {
    path: PathBuf,
}

impl FileQueueStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl QueueStore for FileQueueStore {
    async fn load(&self) -> Result<Vec<QueuedReading>, QueueError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if bytes.is_empty() {
            return Ok(Vec::new());
        }

        let file: QueueFile = serde_json::from_slice(&bytes)?;
        if file.version != QUEUE_FILE_VERSION {
            warn!(
                "Offline queue file {} has version {}, expected {}",
                self.path.display(),
                file.version,
                QUEUE_FILE_VERSION
            );
        }
        Ok(file.records)
    }

    async fn save(&self, records: &[QueuedReading]) -> Result<(), QueueError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = QueueFile {
            version: QUEUE_FILE_VERSION,
            records: records.to_vec(),
        };
        let bytes = serde_json::to_vec(&file)?;

        let temp_path = self.temp_path();
        tokio::fs::write(&temp_path, &bytes).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;

        debug!(
            "Persisted {} queued readings to {}",
            records.len(),
            self.path.display()
        );
        Ok(())
    }
}

/// In-memory store, for tests and running without a data directory
#[derive(Debug, Default)]
pub struct MemoryQueueStore {
    records: SyncMutex<Vec<QueuedReading>>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn load(&self) -> Result<Vec<QueuedReading>, QueueError> {
        Ok(self.records.lock().clone())
    }

    async fn save(&self, records: &[QueuedReading]) -> Result<(), QueueError> {
        *self.records.lock() = records.to_vec();
        Ok(())
    }
}

/// Bounded, persistent FIFO with oldest-first eviction
///
/// Storage failures are logged and treated as an empty or unavailable
/// queue; they never propagate to the reading pipeline.
pub struct OfflineQueue {
    store: Arc<dyn QueueStore>,
    capacity: usize,
    /// Serialises every read-modify-write of the store; holds the next position
    write_lock: Mutex<Option<u64>>,
    /// Serialises flushes so a record is never sent twice concurrently
    flush_lock: Mutex<()>,
}

impl OfflineQueue {
    pub fn new(store: Arc<dyn QueueStore>, capacity: usize) -> Self {
        Self {
            store,
            capacity: capacity.max(1),
            write_lock: Mutex::new(None),
            flush_lock: Mutex::new(()),
        }
    }

    pub fn in_memory(capacity: usize) -> Self {
        Self::new(Arc::new(MemoryQueueStore::new()), capacity)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    async fn load_or_empty(&self) -> Vec<QueuedReading> {
        match self.store.load().await {
            Ok(records) => records,
            Err(e) => {
                warn!("Offline queue unavailable, treating as empty: {}", e);
                Vec::new()
            }
        }
    }

    /// Records to rewrite, or `None` when the store cannot be read and must be left alone
    async fn load_for_update(&self) -> Option<Vec<QueuedReading>> {
        match self.store.load().await {
            Ok(records) => Some(records),
            Err(QueueError::Corrupt(e)) => {
                warn!("Offline queue is corrupt, starting a new one: {}", e);
                Some(Vec::new())
            }
            Err(e) => {
                warn!("Offline queue unreadable, leaving stored records untouched: {}", e);
                None
            }
        }
    }

    /// Append a reading, evicting the oldest records beyond capacity
    pub async fn enqueue(&self, reading: Reading) {
        let mut next_position = self.write_lock.lock().await;
        let Some(mut records) = self.load_for_update().await else {
            warn!(
                "Dropping {} BPM reading, offline queue unavailable",
                reading.heart_rate
            );
            return;
        };

        let position = match *next_position {
            Some(position) => position,
            None => records.iter().map(|r| r.position + 1).max().unwrap_or(0),
        };
        *next_position = Some(position + 1);

        records.push(QueuedReading { position, reading });
        if records.len() > self.capacity {
            let excess = records.len() - self.capacity;
            records.drain(..excess);
            debug!("Offline queue full, evicted {} oldest reading(s)", excess);
        }

        if let Err(e) = self.store.save(&records).await {
            warn!("Failed to persist offline queue: {}", e);
        }
    }

    /// Send every queued record through `sink` in order
    ///
    /// Delivered records are removed; failed ones stay queued in their
    /// original order. Returns the number delivered.
    pub async fn flush(&self, sink: &dyn Sink) -> usize {
        let _flushing = self.flush_lock.lock().await;

        let pending = {
            let _guard = self.write_lock.lock().await;
            self.load_or_empty().await
        };
        if pending.is_empty() {
            return 0;
        }

        let mut delivered = HashSet::with_capacity(pending.len());
        let mut failures = 0usize;
        for record in &pending {
            match sink.send(&record.reading).await {
                Ok(()) => {
                    delivered.insert(record.position);
                }
                Err(e) => {
                    failures += 1;
                    debug!("Queued reading {} not delivered: {}", record.position, e);
                }
            }
        }

        if delivered.is_empty() {
            warn!("Offline flush delivered nothing ({} failures)", failures);
            return 0;
        }

        // Records enqueued while sending are kept after the failed ones
        let _guard = self.write_lock.lock().await;
        let Some(mut records) = self.load_for_update().await else {
            warn!(
                "Could not reconcile offline queue after delivering {} reading(s); they stay queued",
                delivered.len()
            );
            return delivered.len();
        };
        records.retain(|r| !delivered.contains(&r.position));
        if let Err(e) = self.store.save(&records).await {
            warn!("Failed to persist offline queue after flush: {}", e);
        }

        info!(
            "Flushed {} queued reading(s) to {}, {} remaining",
            delivered.len(),
            sink.sink_name(),
            records.len()
        );
        delivered.len()
    }

    pub async fn count(&self) -> usize {
        let _guard = self.write_lock.lock().await;
        self.load_or_empty().await.len()
    }

    /// Snapshot of the queued records, oldest first
    pub async fn records(&self) -> Vec<QueuedReading> {
        let _guard = self.write_lock.lock().await;
        self.load_or_empty().await
    }

    pub async fn clear(&self) {
        let _guard = self.write_lock.lock().await;
        if let Err(e) = self.store.save(&[]).await {
            warn!("Failed to clear offline queue: {}", e);
        }
    }
}

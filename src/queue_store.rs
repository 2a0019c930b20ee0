use std::collections::{BTreeMap, VecDeque};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::envelope::{CommandEnvelope, QueueKey};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("queue store unavailable: {0}")]
    Unavailable(String),
    #[error("queue store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("queue store encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Durable FIFO lists, one per [`QueueKey`].
///
/// `append` and `pop` on the same key are atomic with respect to each other;
/// an accepted envelope is never lost or reordered relative to other accepted
/// envelopes on that key. `pop` and `length` belong to the external consumer.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn append(&self, key: &QueueKey, envelope: CommandEnvelope) -> StoreResult<()>;

    /// Remove and return the head envelope, `None` when the queue is empty.
    async fn pop(&self, key: &QueueKey) -> StoreResult<Option<CommandEnvelope>>;

    async fn length(&self, key: &QueueKey) -> StoreResult<usize>;
}

/// On-disk layout of a memory snapshot.
type Snapshot = BTreeMap<QueueKey, Vec<CommandEnvelope>>;

#[derive(Debug, Default, Clone)]
/// In-memory queue store.
///
/// Each key maps to its own `VecDeque`; mutations run under the key's shard
/// lock, so operations on different devices rarely contend and operations on
/// the same key serialize.
pub struct InMemoryQueueStore {
    queues: Arc<DashMap<QueueKey, VecDeque<CommandEnvelope>>>,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(&self, key: &QueueKey, envelope: CommandEnvelope) {
        self.queues.entry(*key).or_default().push_back(envelope);
    }

    pub fn pop_front(&self, key: &QueueKey) -> Option<CommandEnvelope> {
        self.queues.get_mut(key).and_then(|mut q| q.pop_front())
    }

    pub fn len_of(&self, key: &QueueKey) -> usize {
        self.queues.get(key).map(|q| q.len()).unwrap_or(0)
    }

    /// Copy of the queue for `key`, head first.
    pub fn queue_of(&self, key: &QueueKey) -> Vec<CommandEnvelope> {
        self.queues
            .get(key)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Keys that currently hold at least one envelope.
    pub fn keys(&self) -> Vec<QueueKey> {
        let mut keys: Vec<QueueKey> = self
            .queues
            .iter()
            .filter(|e| !e.value().is_empty())
            .map(|e| *e.key())
            .collect();
        keys.sort();
        keys
    }

    pub fn is_empty(&self) -> bool {
        self.queues.iter().all(|e| e.value().is_empty())
    }

    fn snapshot(&self) -> Snapshot {
        self.queues
            .iter()
            .filter(|e| !e.value().is_empty())
            .map(|e| (*e.key(), e.value().iter().cloned().collect()))
            .collect()
    }

    fn from_snapshot(snapshot: Snapshot) -> Self {
        let store = Self::new();
        for (key, envelopes) in snapshot {
            store.queues.insert(key, envelopes.into());
        }
        store
    }

    /// Serialize every non-empty queue to JSON.
    pub fn to_json(&self) -> StoreResult<Vec<u8>> {
        Ok(serde_json::to_vec(&self.snapshot())?)
    }

    /// Save the current queues to a JSON file at the given path.
    /// Synchronous; intended for persistence on shutdown.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> StoreResult<()> {
        write_atomically(path.as_ref(), &self.to_json()?)
    }

    /// Load queues from a JSON snapshot if present. Returns Ok(None) when the
    /// file does not exist.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> StoreResult<Option<Self>> {
        let p = path.as_ref();
        if !p.exists() {
            return Ok(None);
        }
        let r = BufReader::new(File::open(p)?);
        let snapshot: Snapshot = serde_json::from_reader(r)?;
        tracing::info!(path = %p.display(), queues = snapshot.len(), "loaded queue snapshot");
        Ok(Some(Self::from_snapshot(snapshot)))
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn append(&self, key: &QueueKey, envelope: CommandEnvelope) -> StoreResult<()> {
        self.push_back(key, envelope);
        Ok(())
    }

    async fn pop(&self, key: &QueueKey) -> StoreResult<Option<CommandEnvelope>> {
        Ok(self.pop_front(key))
    }

    async fn length(&self, key: &QueueKey) -> StoreResult<usize> {
        Ok(self.len_of(key))
    }
}

/// Write `bytes` to a sibling temp file and rename it over `path`.
fn write_atomically(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// One device queue as laid out on disk.
#[derive(Serialize, Deserialize)]
struct QueueFile {
    key: QueueKey,
    envelopes: Vec<CommandEnvelope>,
}

/// Write-through file-backed queue store, one JSON file per [`QueueKey`].
///
/// Each append and pop writes the key's new contents to its file before the
/// in-memory queue changes, so a failed or abandoned write leaves memory as
/// it was. Mutations on one key serialize on that key's lock; other keys
/// never wait for them.
pub struct FileQueueStore {
    dir: PathBuf,
    mem: InMemoryQueueStore,
    locks: DashMap<QueueKey, Arc<Mutex<()>>>,
}

impl FileQueueStore {
    /// Open the store rooted at directory `dir`, creating it if needed and
    /// reloading every queue file left from a previous run.
    pub fn open<P: AsRef<Path>>(dir: P) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let mem = InMemoryQueueStore::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let file: QueueFile = serde_json::from_reader(BufReader::new(File::open(&path)?))?;
            if !file.envelopes.is_empty() {
                mem.queues.insert(file.key, file.envelopes.into());
            }
        }
        tracing::info!(dir = %dir.display(), queues = mem.keys().len(), "reloaded queue directory");
        Ok(Self {
            dir,
            mem,
            locks: DashMap::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `lora:downlink:0000ABCD` is stored as `lora_downlink_0000ABCD.json`.
    fn file_for(&self, key: &QueueKey) -> PathBuf {
        self.dir
            .join(format!("{}.json", key.to_string().replace(':', "_")))
    }

    fn key_lock(&self, key: &QueueKey) -> Arc<Mutex<()>> {
        self.locks.entry(*key).or_default().value().clone()
    }

    /// Replace the file for `key` with `envelopes`; an empty queue removes it.
    async fn write_queue(&self, key: &QueueKey, envelopes: Vec<CommandEnvelope>) -> StoreResult<()> {
        let path = self.file_for(key);
        let bytes = if envelopes.is_empty() {
            None
        } else {
            Some(serde_json::to_vec(&QueueFile {
                key: *key,
                envelopes,
            })?)
        };
        tokio::task::spawn_blocking(move || match bytes {
            Some(bytes) => write_atomically(&path, &bytes),
            None => remove_if_present(&path),
        })
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?
    }
}

fn remove_if_present(path: &Path) -> StoreResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl QueueStore for FileQueueStore {
    async fn append(&self, key: &QueueKey, envelope: CommandEnvelope) -> StoreResult<()> {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;
        let mut envelopes = self.mem.queue_of(key);
        envelopes.push(envelope.clone());
        if let Err(e) = self.write_queue(key, envelopes).await {
            tracing::error!(%e, key = %key, dir = %self.dir.display(), "failed to persist append");
            return Err(e);
        }
        self.mem.push_back(key, envelope);
        Ok(())
    }

    async fn pop(&self, key: &QueueKey) -> StoreResult<Option<CommandEnvelope>> {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;
        let mut envelopes = self.mem.queue_of(key);
        if envelopes.is_empty() {
            return Ok(None);
        }
        envelopes.remove(0);
        if let Err(e) = self.write_queue(key, envelopes).await {
            tracing::error!(%e, key = %key, dir = %self.dir.display(), "failed to persist pop");
            return Err(e);
        }
        Ok(self.mem.pop_front(key))
    }

    async fn length(&self, key: &QueueKey) -> StoreResult<usize> {
        Ok(self.mem.len_of(key))
    }
}

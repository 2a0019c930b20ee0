use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::queue_store::{FileQueueStore, InMemoryQueueStore, QueueStore};
use crate::server::{DEFAULT_IDLE_TIMEOUT_MS, DEFAULT_MAX_LINE_LEN, IDLE_TIMEOUT_ENV};

/// Server configuration, loaded from TOML.
///
/// ```toml
/// listen = "127.0.0.1:7000"
/// udp = "127.0.0.1:7001"
/// idle_timeout_ms = 30000
///
/// [store]
/// backend = "file"
/// dir = "./dispatch_queues"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatchConfig {
    pub listen: String,
    pub udp: Option<String>,
    pub idle_timeout_ms: u64,
    pub max_line_len: usize,
    pub store: StoreConfig,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:7000".to_string(),
            udp: None,
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            max_line_len: DEFAULT_MAX_LINE_LEN,
            store: StoreConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Queues live in memory; optionally loaded from and saved to a JSON
    /// snapshot at startup and shutdown.
    Memory { snapshot: Option<PathBuf> },
    /// Write-through directory with one JSON file per device queue.
    File { dir: PathBuf },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Memory { snapshot: None }
    }
}

impl DispatchConfig {
    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let p = path.as_ref();
        let s = std::fs::read_to_string(p)
            .with_context(|| format!("failed to read config file: {}", p.display()))?;
        Self::from_toml_str(&s).with_context(|| format!("invalid config file: {}", p.display()))
    }

    /// Apply `LORA_DISPATCH_IDLE_TIMEOUT_MS` if set and numeric.
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var(IDLE_TIMEOUT_ENV) {
            match v.parse::<u64>() {
                Ok(ms) => self.idle_timeout_ms = ms,
                Err(_) => {
                    tracing::warn!(var = IDLE_TIMEOUT_ENV, value = %v, "ignoring non-numeric idle timeout")
                }
            }
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn open_store(&self) -> anyhow::Result<OpenedStore> {
        match &self.store {
            StoreConfig::Memory { snapshot } => {
                let mem = match snapshot {
                    Some(p) => InMemoryQueueStore::load_from_file(p)
                        .with_context(|| format!("failed to load queue snapshot: {}", p.display()))?
                        .unwrap_or_default(),
                    None => InMemoryQueueStore::new(),
                };
                Ok(OpenedStore::Memory {
                    store: Arc::new(mem),
                    snapshot: snapshot.clone(),
                })
            }
            StoreConfig::File { dir } => {
                let store = FileQueueStore::open(dir)
                    .with_context(|| format!("failed to open queue directory: {}", dir.display()))?;
                tracing::info!(dir = %dir.display(), "opened file-backed queue store");
                Ok(OpenedStore::File(Arc::new(store)))
            }
        }
    }
}

/// A store built from [`StoreConfig`], keeping the concrete handle around for
/// shutdown persistence.
pub enum OpenedStore {
    Memory {
        store: Arc<InMemoryQueueStore>,
        snapshot: Option<PathBuf>,
    },
    File(Arc<FileQueueStore>),
}

impl OpenedStore {
    pub fn queue_store(&self) -> Arc<dyn QueueStore> {
        match self {
            OpenedStore::Memory { store, .. } => store.clone(),
            OpenedStore::File(store) => store.clone(),
        }
    }

    /// Write the memory snapshot, if one is configured. File-backed stores
    /// are already on disk.
    pub async fn persist_on_shutdown(&self) -> anyhow::Result<()> {
        if let OpenedStore::Memory {
            store,
            snapshot: Some(path),
        } = self
        {
            let store = store.clone();
            let path = path.clone();
            tokio::task::spawn_blocking(move || store.save_to_file(&path)).await??;
            tracing::info!("queue snapshot saved");
        }
        Ok(())
    }
}

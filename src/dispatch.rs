use std::sync::Arc;

use uuid::Uuid;

use crate::envelope::{CommandEnvelope, CommandKind, DeviceAddress, QueueKey};
use crate::mac_command::{self, EncodingError};
use crate::queue_store::{QueueStore, StoreError};
use crate::validator::{self, ValidationError};

/// Why a submission was not queued.
#[derive(Debug, thiserror::Error)]
pub enum Rejection {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("invalid MACCommand, {0}")]
    Decode(#[from] EncodingError),
    #[error("{0}")]
    Store(#[from] StoreError),
}

/// Confirmation that exactly one envelope was appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accepted {
    pub id: Uuid,
    pub key: QueueKey,
}

/// Entry point for downlink submissions.
///
/// Validates, decodes MAC commands, and appends one envelope to the injected
/// [`QueueStore`]. Nothing reaches the store unless validation and decoding
/// both succeed, and store failures are returned as-is with no retry.
#[derive(Clone)]
pub struct DispatchGateway {
    store: Arc<dyn QueueStore>,
}

impl DispatchGateway {
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    pub async fn submit(
        &self,
        kind: CommandKind,
        dev_addr: &str,
        payload: &str,
    ) -> Result<Accepted, Rejection> {
        self.submit_fields(kind, Some(dev_addr), Some(payload)).await
    }

    /// Like [`submit`](Self::submit) but with fields that may be absent, as
    /// they arrive off the wire.
    pub async fn submit_fields(
        &self,
        kind: CommandKind,
        dev_addr: Option<&str>,
        payload: Option<&str>,
    ) -> Result<Accepted, Rejection> {
        let (dev_addr, payload) = validator::validate_fields(kind, dev_addr, payload)
            .inspect_err(|e| {
                tracing::warn!(kind = %kind, dev_addr = ?dev_addr, error = %e, "submission rejected");
            })?;
        let addr: DeviceAddress = dev_addr
            .parse()
            .map_err(|_| Rejection::Invalid(ValidationError::InvalidDeviceAddress))?;

        let envelope = match kind {
            CommandKind::RawDownlink => CommandEnvelope::raw_downlink(addr, payload),
            CommandKind::MacCommand => {
                let commands = mac_command::encode_hex(payload).map_err(|e| {
                    tracing::warn!(dev_addr = %addr, maccommand = %payload, error = %e, "mac command decode failed");
                    Rejection::Decode(e)
                })?;
                tracing::debug!(dev_addr = %addr, cids = ?commands.iter().map(|c| c.cid).collect::<Vec<_>>(), "decoded mac commands");
                CommandEnvelope::mac_command(addr, commands)
            }
        };

        let key = envelope.queue_key();
        let id = envelope.id();
        if let Err(e) = self.store.append(&key, envelope).await {
            tracing::error!(%e, key = %key, "queue append failed");
            return Err(e.into());
        }
        tracing::info!(key = %key, id = %id, "enqueued downlink command");
        Ok(Accepted { id, key })
    }

    pub async fn submit_downlink(&self, dev_addr: &str, payload: &str) -> Result<Accepted, Rejection> {
        self.submit(CommandKind::RawDownlink, dev_addr, payload).await
    }

    pub async fn submit_mac_command(
        &self,
        dev_addr: &str,
        maccommand: &str,
    ) -> Result<Accepted, Rejection> {
        self.submit(CommandKind::MacCommand, dev_addr, maccommand).await
    }

    /// Consumer side: pop the head envelope of one device queue.
    pub async fn pop(
        &self,
        kind: CommandKind,
        dev_addr: DeviceAddress,
    ) -> Result<Option<CommandEnvelope>, StoreError> {
        let key = QueueKey::new(kind, dev_addr);
        let env = self.store.pop(&key).await?;
        tracing::debug!(key = %key, popped = env.is_some(), "queue pop");
        Ok(env)
    }

    pub async fn queue_length(
        &self,
        kind: CommandKind,
        dev_addr: DeviceAddress,
    ) -> Result<usize, StoreError> {
        self.store.length(&QueueKey::new(kind, dev_addr)).await
    }
}

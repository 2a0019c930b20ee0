use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::mac_command::MacCommandRequest;

/// Width of a LoRaWAN DevAddr in octets.
pub const DEVADDR_LEN: usize = 4;

pub const DOWNLINK_QUEUE_PREFIX: &str = "lora:downlink:";
pub const MACCMD_QUEUE_PREFIX: &str = "lora:maccmd:req:";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid DevAddr: {0:?}")]
pub struct DeviceAddressError(pub String);

/// 4-octet end-device network address.
///
/// Parsed from exactly 8 hex digits in either case and always rendered as
/// uppercase, so `10fc2942` and `10FC2942` name the same device queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceAddress([u8; DEVADDR_LEN]);

impl DeviceAddress {
    pub const fn from_bytes(bytes: [u8; DEVADDR_LEN]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; DEVADDR_LEN] {
        &self.0
    }
}

impl FromStr for DeviceAddress {
    type Err = DeviceAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != DEVADDR_LEN * 2 {
            return Err(DeviceAddressError(s.to_string()));
        }
        let mut out = [0u8; DEVADDR_LEN];
        hex::decode_to_slice(s, &mut out).map_err(|_| DeviceAddressError(s.to_string()))?;
        Ok(Self(out))
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

impl Serialize for DeviceAddress {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DeviceAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Which per-device queue a submission belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CommandKind {
    #[serde(rename = "downlink")]
    RawDownlink,
    #[serde(rename = "maccommand")]
    MacCommand,
}

impl CommandKind {
    pub const fn queue_prefix(self) -> &'static str {
        match self {
            CommandKind::RawDownlink => DOWNLINK_QUEUE_PREFIX,
            CommandKind::MacCommand => MACCMD_QUEUE_PREFIX,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            CommandKind::RawDownlink => "downlink",
            CommandKind::MacCommand => "maccommand",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Address of one device queue: the device plus the queue kind.
///
/// Serialized as its prefixed string form (`lora:downlink:10FC2942`) so
/// snapshots and external consumers see the same names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueKey {
    pub kind: CommandKind,
    pub dev_addr: DeviceAddress,
}

impl QueueKey {
    pub const fn new(kind: CommandKind, dev_addr: DeviceAddress) -> Self {
        Self { kind, dev_addr }
    }
}

impl fmt::Display for QueueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.queue_prefix(), self.dev_addr)
    }
}

impl FromStr for QueueKey {
    type Err = DeviceAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        for kind in [CommandKind::MacCommand, CommandKind::RawDownlink] {
            if let Some(addr) = s.strip_prefix(kind.queue_prefix()) {
                return Ok(Self::new(kind, addr.parse()?));
            }
        }
        Err(DeviceAddressError(s.to_string()))
    }
}

impl Serialize for QueueKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for QueueKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// What an envelope carries, tagged so the consumer never has to re-parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EnvelopePayload {
    RawDownlink { payload: String },
    MacCommand { commands: Vec<MacCommandRequest> },
}

impl EnvelopePayload {
    pub const fn kind(&self) -> CommandKind {
        match self {
            EnvelopePayload::RawDownlink { .. } => CommandKind::RawDownlink,
            EnvelopePayload::MacCommand { .. } => CommandKind::MacCommand,
        }
    }
}

/// Unit stored in a device queue. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    id: Uuid,
    dev_addr: DeviceAddress,
    #[serde(flatten)]
    payload: EnvelopePayload,
    enqueued_at: DateTime<Utc>,
}

impl CommandEnvelope {
    pub fn raw_downlink(dev_addr: DeviceAddress, payload: impl Into<String>) -> Self {
        Self::new(
            dev_addr,
            EnvelopePayload::RawDownlink {
                payload: payload.into(),
            },
        )
    }

    pub fn mac_command(dev_addr: DeviceAddress, commands: Vec<MacCommandRequest>) -> Self {
        Self::new(dev_addr, EnvelopePayload::MacCommand { commands })
    }

    fn new(dev_addr: DeviceAddress, payload: EnvelopePayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            dev_addr,
            payload,
            enqueued_at: Utc::now(),
        }
    }

    pub const fn id(&self) -> Uuid {
        self.id
    }

    pub const fn dev_addr(&self) -> DeviceAddress {
        self.dev_addr
    }

    pub const fn kind(&self) -> CommandKind {
        self.payload.kind()
    }

    pub const fn payload(&self) -> &EnvelopePayload {
        &self.payload
    }

    pub const fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }

    /// Key of the queue this envelope belongs in.
    pub const fn queue_key(&self) -> QueueKey {
        QueueKey::new(self.kind(), self.dev_addr)
    }
}

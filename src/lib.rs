//! Downlink command dispatch for LoRaWAN end devices (module entry)

pub mod config;
pub mod dispatch;
pub mod envelope;
pub mod handler;
pub mod mac_command;
pub mod queue_store;
pub mod server;
pub mod validator;

pub use dispatch::{Accepted, DispatchGateway, Rejection};
pub use envelope::{CommandEnvelope, CommandKind, DeviceAddress, QueueKey};
pub use queue_store::{FileQueueStore, InMemoryQueueStore, QueueStore, StoreError};
pub use server::DispatchServer;

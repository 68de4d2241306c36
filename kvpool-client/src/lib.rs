//! # kvpool-client
//!
//! Asynchronous connection pool for one key-value store endpoint.
//!
//! This crate provides:
//! - A bounded pool of authenticated, namespace-selected connections
//! - A backlog for commands issued while no connection is idle
//! - A reconnect handshake with a hard 50 ms deadline
//! - A tokio driver task and a cloneable [`PoolHandle`] for callers
//!
//! The wire protocol itself is supplied through the [`Connector`] and
//! [`TransportHandle`] traits.

pub mod config;
pub mod driver;
pub mod error;
pub mod handshake;
pub mod pool;
pub mod sink;
pub mod transport;

#[cfg(test)]
mod mock;

pub use config::{AdmissionPolicy, Config, ConfigError, PoolConfig, TargetConfig, RECONNECT_TIMEOUT};
pub use driver::PoolHandle;
pub use error::{CommandError, PoolError, TransportError};
pub use handshake::{Handshake, HandshakeState};
pub use pool::{PendingCommand, PoolManager, PoolStats};
pub use sink::{CallbackToken, ChannelSink, Completion, ResultSink, SinkEvent};
pub use transport::{Connector, LinkStatus, TransportHandle};

//! kvpool - asynchronous connection pool and command adapter for a key-value store.
//!
//! Callers issue commands by name and positional arguments, the way a blocking
//! client would. Each configured target gets its own pool which translates
//! those calls into wire form, queues them while no connection is idle, and
//! reshapes multi-value replies before handing them to a [`ResultSink`].

use std::collections::BTreeMap;
use tracing_subscriber::EnvFilter;

pub use kvpool_client::{
    AdmissionPolicy, CallbackToken, ChannelSink, CommandError, Completion, Config, ConfigError,
    Connector, LinkStatus, PendingCommand, PoolConfig, PoolError, PoolHandle, PoolStats,
    ResultSink, SinkEvent, TargetConfig, TransportError, TransportHandle,
};
pub use kvpool_protocol::{Command, CommandRegistry, ProtocolError, Value};

/// Installs a `tracing` subscriber filtered by `RUST_LOG` (default `info`).
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

/// Starts one independent pool per configured target.
pub fn spawn_pools<C, S>(config: &Config, connector: C, sink: S) -> BTreeMap<String, PoolHandle>
where
    C: Connector + Clone,
    S: ResultSink + Clone,
{
    config
        .targets
        .keys()
        .filter_map(|name| match config.pool_config(name) {
            Ok(pool_config) => Some((
                name.clone(),
                PoolHandle::spawn(pool_config, connector.clone(), sink.clone()),
            )),
            Err(e) => {
                tracing::error!("Skipping target {}: {}", name, e);
                None
            }
        })
        .collect()
}

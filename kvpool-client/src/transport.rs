//! Transport seam.
//!
//! The byte-level wire protocol belongs to the transport. The pool only needs
//! to open a link, send one command at a time over it, close it, and learn
//! when the link went away.

use crate::error::TransportError;
use async_trait::async_trait;
use kvpool_protocol::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared open/closed flag of one link.
///
/// The pool hands a clone to the transport when connecting; the transport
/// calls [`LinkStatus::mark_closed`] whenever the underlying socket closes,
/// at any time. The pool only reads the flag when it next selects the
/// connection for use.
#[derive(Debug, Clone, Default)]
pub struct LinkStatus {
    closed: Arc<AtomicBool>,
}

impl LinkStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that the link closed.
    pub fn mark_closed(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!("link closed");
        }
    }

    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }
}

/// Opens links to a store endpoint.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Handle: TransportHandle;

    /// Connects to `host:port`. `status` must be marked closed when the link goes away.
    async fn connect(
        &self,
        host: &str,
        port: u16,
        status: LinkStatus,
    ) -> Result<Self::Handle, TransportError>;
}

/// One open link speaking the store's wire protocol.
#[async_trait]
pub trait TransportHandle: Send + 'static {
    /// Sends one command and waits for its reply.
    async fn call(&mut self, name: &str, args: &[Value]) -> Result<Value, TransportError>;

    /// Closes the link.
    async fn close(&mut self);
}

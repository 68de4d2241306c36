//! Reconnect handshake.
//!
//! A new link goes through `Connecting -> Authenticating -> SelectingNamespace
//! -> Ready`. The two middle states are skipped when no password or namespace
//! is configured. Any failed step moves to `Aborted` and the half-built link
//! is closed, never pooled.
//!
//! The hard time budget for the whole sequence is not enforced here. The
//! driver wraps [`establish`] in `tokio::time::timeout` with
//! `RECONNECT_TIMEOUT`; on expiry `PoolManager::on_timeout` resolves the
//! attempt and reports the fault.

use crate::config::TargetConfig;
use crate::error::{PoolError, TransportError};
use crate::transport::{Connector, LinkStatus, TransportHandle};
use kvpool_protocol::Value;

/// Handshake state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Opening the link.
    Connecting,
    /// Waiting for the `auth` reply.
    Authenticating,
    /// Waiting for the `select` reply.
    SelectingNamespace,
    /// Link is ready to join the pool.
    Ready,
    /// A step failed.
    Aborted,
}

/// What the driver of a handshake must do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Send this command and feed its reply to [`Handshake::on_reply`].
    Send { name: &'static str, args: Vec<Value> },
    Ready,
    Abort(PoolError),
}

/// Handshake state machine for one link.
#[derive(Debug, Clone)]
pub struct Handshake {
    addr: String,
    password: Option<String>,
    select: Option<i64>,
    state: HandshakeState,
}

impl Handshake {
    pub fn new(target: &TargetConfig) -> Self {
        Self {
            addr: target.addr(),
            password: target.password.clone(),
            select: target.select,
            state: HandshakeState::Connecting,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// The link opened.
    pub fn connected(&mut self) -> Step {
        debug_assert_eq!(self.state, HandshakeState::Connecting);
        match self.password.clone() {
            Some(password) => {
                self.state = HandshakeState::Authenticating;
                Step::Send {
                    name: "auth",
                    args: vec![Value::Str(password)],
                }
            }
            None => self.select_or_ready(),
        }
    }

    /// The link could not be opened.
    pub fn connect_failed(&mut self, err: TransportError) -> PoolError {
        self.state = HandshakeState::Aborted;
        PoolError::ConnectFailure {
            addr: self.addr.clone(),
            detail: err.to_string(),
        }
    }

    /// Feeds the reply of the last [`Step::Send`].
    ///
    /// A transport error or a falsy reply fails the step.
    pub fn on_reply(&mut self, outcome: Result<Value, TransportError>) -> Step {
        let failure = match outcome {
            Ok(reply) if reply.is_truthy() => None,
            Ok(reply) => Some(format!("rejected with {:?}", reply)),
            Err(err) => Some(err.to_string()),
        };

        match (self.state, failure) {
            (HandshakeState::Authenticating, None) => self.select_or_ready(),
            (HandshakeState::SelectingNamespace, None) => {
                self.state = HandshakeState::Ready;
                Step::Ready
            }
            (HandshakeState::Authenticating, Some(detail)) => {
                self.state = HandshakeState::Aborted;
                Step::Abort(PoolError::AuthFailure {
                    addr: self.addr.clone(),
                    detail,
                })
            }
            (HandshakeState::SelectingNamespace, Some(detail)) => {
                self.state = HandshakeState::Aborted;
                Step::Abort(PoolError::NamespaceSelectFailure {
                    addr: self.addr.clone(),
                    detail,
                })
            }
            (state, _) => {
                self.state = HandshakeState::Aborted;
                Step::Abort(PoolError::ConnectFailure {
                    addr: self.addr.clone(),
                    detail: format!("unexpected reply in state {:?}", state),
                })
            }
        }
    }

    fn select_or_ready(&mut self) -> Step {
        match self.select {
            Some(namespace) => {
                self.state = HandshakeState::SelectingNamespace;
                Step::Send {
                    name: "select",
                    args: vec![Value::Int(namespace)],
                }
            }
            None => {
                self.state = HandshakeState::Ready;
                Step::Ready
            }
        }
    }
}

/// Runs a full handshake against `target`, returning a ready handle.
pub async fn establish<C: Connector>(
    connector: &C,
    target: &TargetConfig,
    status: LinkStatus,
) -> Result<C::Handle, PoolError> {
    let mut handshake = Handshake::new(target);
    tracing::debug!("Connecting to {}...", target.addr());

    let mut handle = match connector.connect(&target.host, target.port, status).await {
        Ok(handle) => handle,
        Err(err) => return Err(handshake.connect_failed(err)),
    };

    let mut step = handshake.connected();
    loop {
        match step {
            Step::Send { name, args } => {
                tracing::debug!("Handshake step {:?}: sending {}", handshake.state(), name);
                let outcome = handle.call(name, &args).await;
                step = handshake.on_reply(outcome);
            }
            Step::Ready => {
                tracing::debug!("Handshake with {} complete", target.addr());
                return Ok(handle);
            }
            Step::Abort(err) => {
                tracing::debug!("Handshake aborted: {}", err);
                handle.close().await;
                return Err(err);
            }
        }
    }
}

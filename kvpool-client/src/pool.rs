//! Connection pool manager.
//!
//! The manager owns the idle pool, the backlog of commands waiting for a
//! connection, and the counters bounding pool growth. It performs no I/O:
//! every input is a method call and every output is an [`Effect`] queued for
//! the driver (see `driver.rs`) to carry out. That keeps all state changes on
//! one thread of control and lets the invariants be exercised directly in
//! tests.
//!
//! Invariants:
//! - `connecting + idle + in_use <= max_connections`.
//! - Every command handed to [`PoolManager::execute`] is either dispatched
//!   exactly once or sits in the backlog.
//! - A connection is in at most one of {idle pool, in-use slot}.
//! - Each reconnect attempt resolves exactly once; later ready/failure/timeout
//!   signals for it are ignored.

use crate::config::{AdmissionPolicy, PoolConfig, RECONNECT_TIMEOUT};
use crate::error::{CommandError, PoolError, TransportError};
use crate::sink::{CallbackToken, Completion};
use crate::transport::LinkStatus;
use kvpool_protocol::{shape_reply, Command, CommandRegistry, Translated, Value};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};

/// Connection id, stable for the connection's lifetime.
pub type ConnId = u64;

/// Reconnect attempt id.
pub type AttemptId = u64;

/// A ready connection.
#[derive(Debug)]
pub struct Connection<H> {
    pub id: ConnId,
    pub handle: H,
    pub status: LinkStatus,
}

impl<H> Connection<H> {
    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }
}

/// A command waiting to be dispatched.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCommand {
    pub name: String,
    pub arguments: Vec<Value>,
    pub token: CallbackToken,
}

impl PendingCommand {
    pub fn new(name: impl Into<String>, arguments: Vec<Value>, token: CallbackToken) -> Self {
        Self {
            name: name.into(),
            arguments,
            token,
        }
    }
}

/// A translated command travelling with its connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    pub token: CallbackToken,
    pub command: Translated,
}

/// Work the driver must perform on behalf of the manager.
pub enum Effect<H> {
    /// Start a handshake. Its outcome comes back through
    /// [`PoolManager::on_ready`], [`PoolManager::on_handshake_failed`] or
    /// [`PoolManager::on_timeout`].
    Connect { attempt: AttemptId, status: LinkStatus },
    /// Send `request` over `conn`, then hand both back to [`PoolManager::on_reply`].
    Dispatch { conn: Connection<H>, request: Dispatched },
    /// Hand a result to the sink.
    Deliver(Completion),
    /// Report a failed reconnect attempt.
    Fault(PoolError),
    /// Close and drop a transport handle.
    Close(H),
}

/// Point-in-time view of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PoolStats {
    /// Connections in the idle pool, including closed ones not yet discarded.
    pub idle: usize,
    pub in_use: usize,
    /// Reconnect attempts in flight.
    pub connecting: usize,
    /// Ids handed out so far.
    pub total_created: u64,
    pub backlog: usize,
}

#[derive(Debug)]
struct Attempt {
    /// Id of the discarded connection this attempt replaces.
    reuse: Option<ConnId>,
    status: LinkStatus,
}

/// Pool state for one store target.
pub struct PoolManager<H> {
    name: String,
    addr: String,
    max_connections: usize,
    admission: AdmissionPolicy,
    registry: &'static CommandRegistry,
    pool: VecDeque<Connection<H>>,
    backlog: VecDeque<PendingCommand>,
    in_use: HashSet<ConnId>,
    attempts: HashMap<AttemptId, Attempt>,
    next_attempt: AttemptId,
    total_created: u64,
    shutting_down: bool,
    effects: VecDeque<Effect<H>>,
}

impl<H> PoolManager<H> {
    pub fn new(config: &PoolConfig) -> Self {
        Self {
            name: config.pool_name(),
            addr: config.target.addr(),
            max_connections: config.max_connections,
            admission: config.admission,
            registry: CommandRegistry::standard(),
            pool: VecDeque::new(),
            backlog: VecDeque::new(),
            in_use: HashSet::new(),
            attempts: HashMap::new(),
            next_attempt: 0,
            total_created: 0,
            shutting_down: false,
            effects: VecDeque::new(),
        }
    }

    /// Returns the pool name, e.g. `redis:main`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs a command on an idle connection, or queues it.
    pub fn execute(&mut self, command: PendingCommand) {
        if self.shutting_down {
            tracing::debug!("[{}] Shutting down, holding command {}", self.name, command.name);
            self.backlog.push_back(command);
            return;
        }

        match self.pool.pop_front() {
            None => {
                self.prepare_one();
                tracing::debug!(
                    "[{}] No idle connection, queueing {} (backlog={})",
                    self.name,
                    command.name,
                    self.backlog.len() + 1
                );
                self.backlog.push_back(command);
            }
            Some(conn) if !conn.is_open() => {
                tracing::debug!("[{}] Connection {} closed, discarding", self.name, conn.id);
                let id = conn.id;
                self.effects.push_back(Effect::Close(conn.handle));
                self.reconnect(Some(id));
                self.backlog.push_back(command);
                self.drain_idle();
            }
            Some(conn) => self.dispatch(conn, command),
        }
    }

    /// Starts one reconnect attempt unless the pool is at its ceiling.
    pub fn prepare_one(&mut self) {
        if self.shutting_down {
            return;
        }
        let occupied = match self.admission {
            AdmissionPolicy::AllTimeCreated => self.total_created as usize + self.attempts.len(),
            AdmissionPolicy::Live => self.pool.len() + self.in_use.len() + self.attempts.len(),
        };
        if occupied >= self.max_connections {
            tracing::debug!(
                "[{}] At connection ceiling ({}/{}), not growing",
                self.name,
                occupied,
                self.max_connections
            );
            return;
        }
        self.reconnect(None);
    }

    /// Starts a reconnect attempt without checking the ceiling.
    ///
    /// `reuse` carries the id of a discarded connection the new one replaces.
    fn reconnect(&mut self, reuse: Option<ConnId>) {
        let attempt = self.next_attempt;
        self.next_attempt += 1;
        let status = LinkStatus::new();
        self.attempts.insert(
            attempt,
            Attempt {
                reuse,
                status: status.clone(),
            },
        );
        tracing::debug!(
            "[{}] Starting reconnect attempt {} (connecting={})",
            self.name,
            attempt,
            self.attempts.len()
        );
        self.effects.push_back(Effect::Connect { attempt, status });
    }

    fn dispatch(&mut self, conn: Connection<H>, command: PendingCommand) {
        let translated = self
            .registry
            .translate(Command::new(command.name, command.arguments));
        let fresh = self.in_use.insert(conn.id);
        debug_assert!(fresh, "connection {} dispatched twice", conn.id);
        tracing::trace!("[{}] Dispatching {} on connection {}", self.name, translated.name, conn.id);
        self.effects.push_back(Effect::Dispatch {
            conn,
            request: Dispatched {
                token: command.token,
                command: translated,
            },
        });
    }

    /// Returns a connection to the idle pool and drains the backlog onto it.
    fn push_to_pool(&mut self, conn: Connection<H>) {
        if self.shutting_down {
            self.effects.push_back(Effect::Close(conn.handle));
            return;
        }
        self.pool.push_back(conn);
        self.drain_idle();
    }

    /// Hands queued commands to idle connections until either side runs out.
    ///
    /// Closed connections met on the way are discarded and replaced, so one
    /// closed link at the front never strands the backlog behind open ones.
    fn drain_idle(&mut self) {
        while !self.shutting_down && !self.pool.is_empty() {
            let Some(command) = self.backlog.pop_front() else {
                break;
            };
            self.execute(command);
        }
    }

    /// A handshake reached `Ready`.
    pub fn on_ready(&mut self, attempt: AttemptId, handle: H) {
        let Some(pending) = self.attempts.remove(&attempt) else {
            tracing::debug!("[{}] Attempt {} already resolved, dropping its link", self.name, attempt);
            self.effects.push_back(Effect::Close(handle));
            return;
        };

        let id = match pending.reuse {
            Some(id) => id,
            None => {
                let id = self.total_created;
                self.total_created += 1;
                id
            }
        };
        tracing::info!("[{}] Connection {} ready", self.name, id);
        self.push_to_pool(Connection {
            id,
            handle,
            status: pending.status,
        });
    }

    /// A handshake aborted before its deadline.
    pub fn on_handshake_failed(&mut self, attempt: AttemptId, error: PoolError) {
        if self.attempts.remove(&attempt).is_none() {
            return;
        }
        tracing::warn!("[{}] Reconnect attempt {} failed: {}", self.name, attempt, error);
        self.effects.push_back(Effect::Fault(error));
    }

    /// The hard deadline of an attempt passed.
    ///
    /// No-op when the attempt already resolved.
    pub fn on_timeout(&mut self, attempt: AttemptId) {
        if self.attempts.remove(&attempt).is_none() {
            return;
        }
        tracing::warn!(
            "[{}] Reconnect attempt {} took longer than {:?}",
            self.name,
            attempt,
            RECONNECT_TIMEOUT
        );
        self.effects.push_back(Effect::Fault(PoolError::ReconnectTimeout {
            addr: self.addr.clone(),
            timeout: RECONNECT_TIMEOUT,
        }));
    }

    /// A dispatched command completed.
    ///
    /// The result is delivered before the connection goes back to the pool.
    pub fn on_reply(
        &mut self,
        conn: Connection<H>,
        request: Dispatched,
        outcome: Result<Value, TransportError>,
    ) {
        self.in_use.remove(&conn.id);
        let result = match outcome {
            Ok(raw) => shape_reply(&request.command, raw).map_err(CommandError::from),
            Err(err) => {
                tracing::debug!(
                    "[{}] {} failed on connection {}: {}",
                    self.name,
                    request.command.name,
                    conn.id,
                    err
                );
                Err(CommandError::from(err))
            }
        };
        self.effects.push_back(Effect::Deliver(Completion {
            token: request.token,
            result,
        }));
        self.push_to_pool(conn);
    }

    /// A dispatched command's task died and took its connection with it.
    ///
    /// The command fails with `detail` and the lost id is refilled by a
    /// replacement attempt, as for a connection found closed.
    pub fn on_reply_lost(&mut self, conn: ConnId, token: CallbackToken, detail: String) {
        if !self.in_use.remove(&conn) {
            return;
        }
        tracing::warn!("[{}] Lost connection {} mid-command: {}", self.name, conn, detail);
        self.effects.push_back(Effect::Deliver(Completion {
            token,
            result: Err(CommandError::Transport(detail)),
        }));
        if !self.shutting_down {
            self.reconnect(Some(conn));
        }
    }

    /// Stops dispatching and growing; idle connections are closed.
    ///
    /// Commands executed from now on stay in the backlog, connections coming
    /// back from in-flight work are closed.
    pub fn shutdown(&mut self) {
        if self.shutting_down {
            return;
        }
        tracing::info!(
            "[{}] Shutting down ({} idle, {} in use, {} queued)",
            self.name,
            self.pool.len(),
            self.in_use.len(),
            self.backlog.len()
        );
        self.shutting_down = true;
        while let Some(conn) = self.pool.pop_front() {
            self.effects.push_back(Effect::Close(conn.handle));
        }
    }

    /// Removes and returns every queued command.
    pub fn drain_backlog(&mut self) -> Vec<PendingCommand> {
        self.backlog.drain(..).collect()
    }

    /// Pops the next effect to perform.
    pub fn next_effect(&mut self) -> Option<Effect<H>> {
        self.effects.pop_front()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            idle: self.pool.len(),
            in_use: self.in_use.len(),
            connecting: self.attempts.len(),
            total_created: self.total_created,
            backlog: self.backlog.len(),
        }
    }
}

//! Pool driver.
//!
//! One tokio task per pool owns the [`PoolManager`] and is the only code that
//! touches it. Caller requests arrive over a channel; handshakes and command
//! round trips run as tasks in a `JoinSet` whose results are fed back into
//! the manager in the same loop. The manager's effects are then carried out
//! before the next message is taken.

use crate::config::{PoolConfig, TargetConfig, RECONNECT_TIMEOUT};
use crate::error::{PoolError, TransportError};
use crate::handshake::establish;
use crate::pool::{
    AttemptId, ConnId, Connection, Dispatched, Effect, PendingCommand, PoolManager, PoolStats,
};
use crate::sink::{CallbackToken, ResultSink};
use crate::transport::{Connector, TransportHandle};
use kvpool_protocol::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{self, JoinError, JoinSet};

enum Request {
    Execute(PendingCommand),
    Stats(oneshot::Sender<PoolStats>),
    Shutdown(oneshot::Sender<Vec<PendingCommand>>),
}

enum HandshakeOutcome<H> {
    Ready(H),
    Failed(PoolError),
    TimedOut,
}

/// What a running task holds, so a task that dies can still be resolved.
#[derive(Debug, Clone, Copy)]
enum Running {
    Handshake(AttemptId),
    Reply { conn: ConnId, token: CallbackToken },
}

enum Completed<H> {
    Handshake {
        attempt: AttemptId,
        outcome: HandshakeOutcome<H>,
    },
    Reply {
        conn: Connection<H>,
        request: Dispatched,
        outcome: Result<Value, TransportError>,
    },
}

/// Handle to a running pool.
///
/// Cloning is cheap; all clones talk to the same driver task.
#[derive(Debug, Clone)]
pub struct PoolHandle {
    name: Arc<str>,
    requests: mpsc::UnboundedSender<Request>,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Request::Execute(command) => f.debug_tuple("Execute").field(command).finish(),
            Request::Stats(_) => f.write_str("Stats"),
            Request::Shutdown(_) => f.write_str("Shutdown"),
        }
    }
}

impl PoolHandle {
    /// Starts the driver task for one target. Must be called inside a tokio runtime.
    pub fn spawn<C, S>(config: PoolConfig, connector: C, sink: S) -> Self
    where
        C: Connector,
        S: ResultSink,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let name: Arc<str> = Arc::from(config.pool_name());

        tracing::info!(
            "[{}] Starting pool for {} (max {} connections, {:?} admission)",
            name,
            config.target.addr(),
            config.max_connections,
            config.admission
        );

        let driver = Driver {
            manager: PoolManager::new(&config),
            connector: Arc::new(connector),
            target: config.target,
            sink,
            tasks: JoinSet::new(),
            running: HashMap::new(),
        };
        tokio::spawn(driver.run(rx));

        Self { name, requests: tx }
    }

    /// Returns the pool name, e.g. `redis:main`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Submits a command. The result is delivered to the sink under `token`.
    pub fn execute(
        &self,
        name: impl Into<String>,
        arguments: Vec<Value>,
        token: CallbackToken,
    ) -> Result<(), PoolError> {
        self.requests
            .send(Request::Execute(PendingCommand::new(name, arguments, token)))
            .map_err(|_| self.shut_down())
    }

    /// Returns a snapshot of the pool counters.
    pub async fn stats(&self) -> Result<PoolStats, PoolError> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(Request::Stats(tx))
            .map_err(|_| self.shut_down())?;
        rx.await.map_err(|_| self.shut_down())
    }

    /// Stops the pool.
    ///
    /// In-flight commands and handshakes are allowed to finish; commands
    /// still waiting for a connection are returned undispatched.
    pub async fn shutdown(&self) -> Result<Vec<PendingCommand>, PoolError> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(Request::Shutdown(tx))
            .map_err(|_| self.shut_down())?;
        rx.await.map_err(|_| self.shut_down())
    }

    fn shut_down(&self) -> PoolError {
        PoolError::Shutdown(self.name.to_string())
    }
}

struct Driver<C: Connector, S> {
    manager: PoolManager<C::Handle>,
    connector: Arc<C>,
    target: TargetConfig,
    sink: S,
    tasks: JoinSet<Completed<C::Handle>>,
    running: HashMap<task::Id, Running>,
}

impl<C: Connector, S: ResultSink> Driver<C, S> {
    async fn run(mut self, mut requests: mpsc::UnboundedReceiver<Request>) {
        let mut waiting = Vec::new();

        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(Request::Execute(command)) => self.manager.execute(command),
                    Some(Request::Stats(reply)) => {
                        let _ = reply.send(self.manager.stats());
                    }
                    Some(Request::Shutdown(reply)) => {
                        waiting.push(reply);
                        break;
                    }
                    None => break,
                },
                Some(joined) = self.tasks.join_next_with_id() => self.on_joined(joined),
            }
            self.perform_effects();
        }

        // Refuse new work, but keep what was already sent
        requests.close();
        self.manager.shutdown();
        while let Ok(request) = requests.try_recv() {
            match request {
                Request::Execute(command) => self.manager.execute(command),
                Request::Stats(reply) => {
                    let _ = reply.send(self.manager.stats());
                }
                Request::Shutdown(reply) => waiting.push(reply),
            }
        }
        self.perform_effects();

        while let Some(joined) = self.tasks.join_next_with_id().await {
            self.on_joined(joined);
            self.perform_effects();
        }

        let backlog = self.manager.drain_backlog();
        tracing::info!(
            "[{}] Pool stopped, {} commands left undispatched",
            self.manager.name(),
            backlog.len()
        );

        let mut waiting = waiting.into_iter();
        match waiting.next() {
            Some(reply) => {
                if let Err(backlog) = reply.send(backlog) {
                    tracing::warn!(
                        "[{}] Shutdown caller went away, dropping {} commands",
                        self.manager.name(),
                        backlog.len()
                    );
                }
            }
            None if !backlog.is_empty() => {
                tracing::warn!(
                    "[{}] All handles dropped, discarding {} queued commands",
                    self.manager.name(),
                    backlog.len()
                );
            }
            None => {}
        }
        for reply in waiting {
            let _ = reply.send(Vec::new());
        }
    }

    fn on_joined(&mut self, joined: Result<(task::Id, Completed<C::Handle>), JoinError>) {
        let completed = match joined {
            Ok((id, completed)) => {
                self.running.remove(&id);
                completed
            }
            Err(e) => return self.on_task_failed(e),
        };
        match completed {
            Completed::Handshake { attempt, outcome } => match outcome {
                HandshakeOutcome::Ready(handle) => self.manager.on_ready(attempt, handle),
                HandshakeOutcome::Failed(error) => self.manager.on_handshake_failed(attempt, error),
                HandshakeOutcome::TimedOut => self.manager.on_timeout(attempt),
            },
            Completed::Reply {
                conn,
                request,
                outcome,
            } => self.manager.on_reply(conn, request, outcome),
        }
    }

    /// A task panicked or was cancelled before producing its result.
    fn on_task_failed(&mut self, e: JoinError) {
        tracing::error!("[{}] Pool task failed: {}", self.manager.name(), e);
        match self.running.remove(&e.id()) {
            Some(Running::Handshake(attempt)) => self.manager.on_handshake_failed(
                attempt,
                PoolError::ConnectFailure {
                    addr: self.target.addr(),
                    detail: e.to_string(),
                },
            ),
            Some(Running::Reply { conn, token }) => {
                self.manager.on_reply_lost(conn, token, e.to_string())
            }
            None => {}
        }
    }

    fn perform_effects(&mut self) {
        while let Some(effect) = self.manager.next_effect() {
            match effect {
                Effect::Connect { attempt, status } => {
                    let connector = Arc::clone(&self.connector);
                    let target = self.target.clone();
                    let task = self.tasks.spawn(async move {
                        let handshake = establish(connector.as_ref(), &target, status);
                        let outcome = match tokio::time::timeout(RECONNECT_TIMEOUT, handshake).await {
                            Ok(Ok(handle)) => HandshakeOutcome::Ready(handle),
                            Ok(Err(error)) => HandshakeOutcome::Failed(error),
                            Err(_) => HandshakeOutcome::TimedOut,
                        };
                        Completed::Handshake { attempt, outcome }
                    });
                    self.running.insert(task.id(), Running::Handshake(attempt));
                }
                Effect::Dispatch { mut conn, request } => {
                    let running = Running::Reply {
                        conn: conn.id,
                        token: request.token,
                    };
                    let task = self.tasks.spawn(async move {
                        let outcome = conn
                            .handle
                            .call(&request.command.name, &request.command.args)
                            .await;
                        Completed::Reply {
                            conn,
                            request,
                            outcome,
                        }
                    });
                    self.running.insert(task.id(), running);
                }
                Effect::Deliver(completion) => self.sink.deliver(completion),
                Effect::Fault(error) => self.sink.fault(error),
                Effect::Close(mut handle) => {
                    tokio::spawn(async move {
                        handle.close().await;
                    });
                }
            }
        }
    }
}

//! In-memory transport for tests.

use crate::error::TransportError;
use crate::transport::{Connector, LinkStatus, TransportHandle};
use async_trait::async_trait;
use kvpool_protocol::Value;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// How the mock answers connection requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectMode {
    Accept,
    Refuse,
    /// Never completes.
    Hang,
    /// Panics inside the connect future.
    Panic,
}

#[derive(Debug, Clone)]
enum Entry {
    Str(String),
    Hash(Vec<(String, String)>),
}

/// State shared by every link a [`MockConnector`] opens.
#[derive(Debug)]
pub struct MockStore {
    data: Mutex<HashMap<String, Entry>>,
    calls: Mutex<Vec<(String, Vec<Value>)>>,
    links: Mutex<Vec<LinkStatus>>,
    mode: Mutex<ConnectMode>,
    connects: Mutex<usize>,
    closed_handles: Mutex<usize>,
}

impl MockStore {
    fn new() -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            links: Mutex::new(Vec::new()),
            mode: Mutex::new(ConnectMode::Accept),
            connects: Mutex::new(0),
            closed_handles: Mutex::new(0),
        }
    }

    /// Every command received so far, in order.
    pub fn calls(&self) -> Vec<(String, Vec<Value>)> {
        self.calls.lock().clone()
    }

    /// Names of received commands, in order.
    pub fn call_names(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(name, _)| name.clone()).collect()
    }

    /// Number of connection requests seen.
    pub fn connects(&self) -> usize {
        *self.connects.lock()
    }

    /// Number of handles closed by the client.
    pub fn closed_handles(&self) -> usize {
        *self.closed_handles.lock()
    }

    pub fn set_connect_mode(&self, mode: ConnectMode) {
        *self.mode.lock() = mode;
    }

    /// Simulates the server dropping every open link.
    pub fn drop_all_links(&self) {
        for status in self.links.lock().iter() {
            status.mark_closed();
        }
    }

    fn execute(&self, name: &str, args: &[Value]) -> Result<Value, TransportError> {
        let keys: Vec<String> = args.iter().map(Value::to_key).collect();
        let mut data = self.data.lock();

        match name {
            "ping" => Ok(Value::from("PONG")),
            "get" => Ok(match keys.first().and_then(|k| data.get(k)) {
                Some(Entry::Str(v)) => Value::from(v.as_str()),
                _ => Value::Nil,
            }),
            "set" if keys.len() >= 2 => {
                data.insert(keys[0].clone(), Entry::Str(keys[1].clone()));
                Ok(Value::from("OK"))
            }
            "mset" if keys.len() % 2 == 0 => {
                for pair in keys.chunks(2) {
                    data.insert(pair[0].clone(), Entry::Str(pair[1].clone()));
                }
                Ok(Value::from("OK"))
            }
            "mget" => Ok(Value::List(
                keys.iter()
                    .map(|k| match data.get(k) {
                        Some(Entry::Str(v)) => Value::from(v.as_str()),
                        _ => Value::Nil,
                    })
                    .collect(),
            )),
            "hmset" if keys.len() % 2 == 1 => {
                let hash = match data
                    .entry(keys[0].clone())
                    .or_insert_with(|| Entry::Hash(Vec::new()))
                {
                    Entry::Hash(fields) => fields,
                    Entry::Str(_) => return Err(wrong_type()),
                };
                for pair in keys[1..].chunks(2) {
                    hash.retain(|(f, _)| f != &pair[0]);
                    hash.push((pair[0].clone(), pair[1].clone()));
                }
                Ok(Value::from("OK"))
            }
            "hgetall" => match keys.first().and_then(|k| data.get(k)) {
                Some(Entry::Hash(fields)) => Ok(Value::List(
                    fields
                        .iter()
                        .flat_map(|(f, v)| [Value::from(f.as_str()), Value::from(v.as_str())])
                        .collect(),
                )),
                Some(Entry::Str(_)) => Err(wrong_type()),
                None => Ok(Value::List(Vec::new())),
            },
            "hmget" if !keys.is_empty() => {
                let fields = match data.get(&keys[0]) {
                    Some(Entry::Hash(fields)) => fields.clone(),
                    Some(Entry::Str(_)) => return Err(wrong_type()),
                    None => Vec::new(),
                };
                Ok(Value::List(
                    keys[1..]
                        .iter()
                        .map(|k| {
                            fields
                                .iter()
                                .find(|(f, _)| f == k)
                                .map(|(_, v)| Value::from(v.as_str()))
                                .unwrap_or(Value::Nil)
                        })
                        .collect(),
                ))
            }
            "del" => {
                let removed = keys.iter().filter(|k| data.remove(*k).is_some()).count();
                Ok(Value::from(removed))
            }
            other => Err(TransportError::Server(format!(
                "ERR unknown command '{}'",
                other
            ))),
        }
    }
}

fn wrong_type() -> TransportError {
    TransportError::Server(
        "WRONGTYPE Operation against a key holding the wrong kind of value".to_string(),
    )
}

/// Connector producing [`MockHandle`]s over one shared [`MockStore`].
#[derive(Debug, Clone)]
pub struct MockConnector {
    store: Arc<MockStore>,
    password: Option<String>,
    reply_delay: Option<Duration>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MockStore::new()),
            password: None,
            reply_delay: None,
        }
    }

    /// Requires `auth <password>` before the namespace can be selected.
    pub fn with_password(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }

    pub fn with_connect_mode(self, mode: ConnectMode) -> Self {
        self.store.set_connect_mode(mode);
        self
    }

    /// Delays every command reply.
    pub fn with_reply_delay(mut self, delay: Duration) -> Self {
        self.reply_delay = Some(delay);
        self
    }

    pub fn store(&self) -> Arc<MockStore> {
        Arc::clone(&self.store)
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Handle = MockHandle;

    async fn connect(
        &self,
        _host: &str,
        _port: u16,
        status: LinkStatus,
    ) -> Result<MockHandle, TransportError> {
        *self.store.connects.lock() += 1;
        let mode = *self.store.mode.lock();
        match mode {
            ConnectMode::Accept => {}
            ConnectMode::Refuse => {
                return Err(TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "connection refused",
                )))
            }
            ConnectMode::Hang => std::future::pending::<()>().await,
            ConnectMode::Panic => panic!("mock connector crashed"),
        }

        self.store.links.lock().push(status.clone());
        Ok(MockHandle {
            store: Arc::clone(&self.store),
            status,
            password: self.password.clone(),
            reply_delay: self.reply_delay,
        })
    }
}

/// One mock link.
#[derive(Debug)]
pub struct MockHandle {
    store: Arc<MockStore>,
    status: LinkStatus,
    password: Option<String>,
    reply_delay: Option<Duration>,
}

#[async_trait]
impl TransportHandle for MockHandle {
    async fn call(&mut self, name: &str, args: &[Value]) -> Result<Value, TransportError> {
        if !self.status.is_open() {
            return Err(TransportError::Closed);
        }
        self.store
            .calls
            .lock()
            .push((name.to_string(), args.to_vec()));

        if let Some(delay) = self.reply_delay {
            tokio::time::sleep(delay).await;
        }

        match name {
            "auth" => {
                let given = args.first().map(Value::to_key);
                if given.is_some() && given == self.password {
                    Ok(Value::from("OK"))
                } else {
                    Err(TransportError::Server("ERR invalid password".to_string()))
                }
            }
            "select" => match args.first().and_then(Value::as_int) {
                Some(db) if (0..16).contains(&db) => Ok(Value::from("OK")),
                _ => Err(TransportError::Server(
                    "ERR DB index is out of range".to_string(),
                )),
            },
            "crash" => panic!("mock transport crashed"),
            _ => self.store.execute(name, args),
        }
    }

    async fn close(&mut self) {
        self.status.mark_closed();
        *self.store.closed_handles.lock() += 1;
    }
}

/// Installs a test-writer subscriber honouring `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

//! Result delivery.
//!
//! Completed commands leave the pool as [`Completion`] records: the caller's
//! token plus the shaped result. Translation metadata never crosses this
//! boundary.

use crate::error::{CommandError, PoolError};
use kvpool_protocol::Value;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Opaque handle identifying where a result must be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallbackToken(pub u64);

/// Final outcome of one command.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub token: CallbackToken,
    pub result: Result<Value, CommandError>,
}

impl Completion {
    /// Encodes the completion as the JSON record sent to the calling context.
    ///
    /// `{"token": 7, "result": ...}` on success, `{"token": 7, "error": "..."}`
    /// on failure.
    pub fn to_json(&self) -> serde_json::Value {
        match &self.result {
            Ok(value) => serde_json::json!({
                "token": self.token,
                "result": value,
            }),
            Err(err) => serde_json::json!({
                "token": self.token,
                "error": err.to_string(),
            }),
        }
    }
}

/// Receives completed commands and pool faults.
pub trait ResultSink: Send + 'static {
    /// Delivers the result of one command.
    fn deliver(&self, completion: Completion);

    /// Reports a failed reconnect attempt.
    fn fault(&self, _error: PoolError) {}
}

/// Event forwarded by a [`ChannelSink`].
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Completed(Completion),
    Fault(PoolError),
}

/// Sink forwarding everything over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkEvent>,
}

impl ChannelSink {
    /// Creates a sink and the receiver its events arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ResultSink for ChannelSink {
    fn deliver(&self, completion: Completion) {
        if self.tx.send(SinkEvent::Completed(completion)).is_err() {
            tracing::warn!("Result receiver dropped, discarding completion");
        }
    }

    fn fault(&self, error: PoolError) {
        if self.tx.send(SinkEvent::Fault(error)).is_err() {
            tracing::warn!("Result receiver dropped, discarding fault");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvpool_protocol::ProtocolError;

    #[test]
    fn test_completion_json_ok() {
        let completion = Completion {
            token: CallbackToken(7),
            result: Ok(Value::map([("a", 1i64), ("b", 2i64)])),
        };
        assert_eq!(
            completion.to_json(),
            serde_json::json!({"token": 7, "result": {"a": 1, "b": 2}})
        );
    }

    #[test]
    fn test_completion_json_error() {
        let completion = Completion {
            token: CallbackToken(3),
            result: Err(CommandError::Reply(ProtocolError::ReplyShapeMismatch {
                command: "mget".to_string(),
                expected: 2,
                actual: 1,
            })),
        };
        let json = completion.to_json();
        assert_eq!(json["token"], 3);
        assert!(json["error"].as_str().unwrap().contains("mget"));
        assert!(json.get("result").is_none());
    }

    #[tokio::test]
    async fn test_channel_sink_forwards() {
        let (sink, mut rx) = ChannelSink::new();
        sink.deliver(Completion {
            token: CallbackToken(1),
            result: Ok(Value::from("OK")),
        });
        sink.fault(PoolError::Shutdown("redis:main".to_string()));

        assert!(matches!(rx.recv().await, Some(SinkEvent::Completed(c)) if c.token == CallbackToken(1)));
        assert_eq!(
            rx.recv().await,
            Some(SinkEvent::Fault(PoolError::Shutdown("redis:main".to_string())))
        );
    }

    #[test]
    fn test_channel_sink_receiver_dropped() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        // Must not panic
        sink.deliver(Completion {
            token: CallbackToken(1),
            result: Ok(Value::Nil),
        });
    }
}

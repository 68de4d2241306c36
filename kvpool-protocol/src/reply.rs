//! Reply shaping.
//!
//! Turns a raw reply into the value handed back to the caller, using the
//! [`ReplyShape`] and [`SideChannel`] produced at translation time.

use crate::command::{ReplyShape, SideChannel, Translated};
use crate::error::ProtocolError;
use crate::value::Value;

/// Shapes the raw reply of a translated command.
pub fn shape_reply(command: &Translated, raw: Value) -> Result<Value, ProtocolError> {
    transform(&command.name, command.shape, &command.meta, raw)
}

/// Applies a reply shape to a raw reply.
///
/// Replies that are not lists (nil, `false`, status values) are returned
/// unchanged for every shape; only list replies are re-keyed.
pub fn transform(
    command: &str,
    shape: ReplyShape,
    meta: &SideChannel,
    raw: Value,
) -> Result<Value, ProtocolError> {
    let items = match raw {
        Value::List(items) => items,
        other => return Ok(other),
    };

    match shape {
        ReplyShape::Plain => Ok(Value::List(items)),
        ReplyShape::HashPairs => pairs(command, items),
        ReplyShape::ScorePairs if meta.withscores => pairs(command, items),
        ReplyShape::ScorePairs => Ok(Value::List(items)),
        ReplyShape::Keyed => keyed(command, meta, items),
    }
}

/// `[k1, v1, k2, v2]` -> `{k1: v1, k2: v2}`.
fn pairs(command: &str, items: Vec<Value>) -> Result<Value, ProtocolError> {
    if items.len() % 2 != 0 {
        return Err(ProtocolError::ReplyShapeMismatch {
            command: command.to_string(),
            expected: items.len() + 1,
            actual: items.len(),
        });
    }
    let mut entries = Vec::with_capacity(items.len() / 2);
    let mut iter = items.into_iter();
    while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
        entries.push((key.to_key(), value));
    }
    Ok(Value::Map(entries))
}

/// Positional reply keyed by the key list recorded at translation time.
fn keyed(command: &str, meta: &SideChannel, items: Vec<Value>) -> Result<Value, ProtocolError> {
    let keys = meta
        .recorded
        .as_ref()
        .map(|recorded| recorded.keys())
        .ok_or_else(|| ProtocolError::MissingKeyList {
            command: command.to_string(),
        })?;

    if keys.len() != items.len() {
        return Err(ProtocolError::ReplyShapeMismatch {
            command: command.to_string(),
            expected: keys.len(),
            actual: items.len(),
        });
    }
    Ok(Value::Map(keys.into_iter().zip(items).collect()))
}

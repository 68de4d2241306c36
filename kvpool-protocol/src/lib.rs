//! # kvpool-protocol
//!
//! Command translation and reply shaping for kvpool.
//!
//! This crate provides:
//! - A dynamically typed [`Value`] for arguments and replies
//! - Legacy alias normalization and per-command argument shape rules
//! - Reply shaping (flat pairs and positional replies into keyed mappings)
//!
//! Everything here is pure; connections and I/O live in `kvpool-client`.

pub mod command;
pub mod error;
pub mod registry;
pub mod reply;
pub mod value;

pub use command::{Command, Recorded, ReplyShape, ShapeRule, SideChannel, Translated};
pub use error::ProtocolError;
pub use registry::{CommandRegistry, CommandSpec};
pub use reply::{shape_reply, transform};
pub use value::Value;

/// Default port of the backing store.
pub const DEFAULT_PORT: u16 = 6379;

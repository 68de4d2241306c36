//! Command registry: alias normalization and per-command shape lookup.
//!
//! The command surface is open-ended. Names are resolved through a static
//! alias table to their canonical wire names, then looked up here for a
//! [`ShapeRule`] and [`ReplyShape`]. Unknown names pass through with the
//! identity rule and a plain reply.

use crate::command::{Command, ReplyShape, ShapeRule, Translated};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Legacy and alternate names mapped to their canonical wire names.
pub const ALIASES: &[(&str, &str)] = &[
    ("delete", "del"),
    ("lsize", "llen"),
    ("getmultiple", "mget"),
    ("lget", "lindex"),
    ("lgetrange", "lrange"),
    ("lremove", "lrem"),
    ("scontains", "sismember"),
    ("ssize", "scard"),
    ("sgetmembers", "smembers"),
    ("zdelete", "zrem"),
    ("zsize", "zcard"),
    ("zdeleterangebyscore", "zremrangebyscore"),
    ("zunion", "zunionstore"),
    ("zinter", "zinterstore"),
];

/// Canonical commands that need argument or reply reshaping.
const COMMANDS: &[(&str, ShapeRule, ReplyShape)] = &[
    ("lpush", ShapeRule::BatchAdd, ReplyShape::Plain),
    ("sadd", ShapeRule::BatchAdd, ReplyShape::Plain),
    ("srem", ShapeRule::BatchAdd, ReplyShape::Plain),
    ("zrem", ShapeRule::BatchAdd, ReplyShape::Plain),
    ("del", ShapeRule::FlattenKeys, ReplyShape::Plain),
    ("mset", ShapeRule::MSet, ReplyShape::Plain),
    ("hmset", ShapeRule::HMSet, ReplyShape::Plain),
    ("mget", ShapeRule::MGet, ReplyShape::Keyed),
    ("hmget", ShapeRule::HMGet, ReplyShape::Keyed),
    ("hgetall", ShapeRule::Identity, ReplyShape::HashPairs),
    ("lrem", ShapeRule::LRem, ReplyShape::Plain),
    ("zrange", ShapeRule::ZRange, ReplyShape::ScorePairs),
    ("zrevrange", ShapeRule::ZRange, ReplyShape::ScorePairs),
    ("zrangebyscore", ShapeRule::ZRangeByScore, ReplyShape::ScorePairs),
    ("zrevrangebyscore", ShapeRule::ZRangeByScore, ReplyShape::ScorePairs),
    ("zunionstore", ShapeRule::ZStore, ReplyShape::Plain),
    ("zinterstore", ShapeRule::ZStore, ReplyShape::Plain),
    ("sort", ShapeRule::Sort, ReplyShape::Plain),
];

/// Shape information for one canonical command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    pub rule: ShapeRule,
    pub reply: ReplyShape,
}

impl Default for CommandSpec {
    fn default() -> Self {
        Self {
            rule: ShapeRule::Identity,
            reply: ReplyShape::Plain,
        }
    }
}

/// Registry mapping command names to their canonical form and shape.
#[derive(Debug, Clone, Default)]
pub struct CommandRegistry {
    aliases: HashMap<String, String>,
    commands: HashMap<String, CommandSpec>,
}

impl CommandRegistry {
    /// Creates an empty registry where every command is passed through.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the shared registry holding the built-in alias and shape tables.
    pub fn standard() -> &'static CommandRegistry {
        static STANDARD: OnceLock<CommandRegistry> = OnceLock::new();
        STANDARD.get_or_init(|| {
            let registry = ALIASES
                .iter()
                .fold(Self::new(), |r, (alias, canonical)| r.with_alias(alias, canonical));
            COMMANDS
                .iter()
                .fold(registry, |r, (name, rule, reply)| {
                    r.with_command(name, CommandSpec { rule: *rule, reply: *reply })
                })
        })
    }

    /// Registers an alias for a canonical command name.
    pub fn with_alias(mut self, alias: &str, canonical: &str) -> Self {
        self.aliases
            .insert(alias.to_ascii_lowercase(), canonical.to_ascii_lowercase());
        self
    }

    /// Registers the shape of a canonical command.
    pub fn with_command(mut self, name: &str, spec: CommandSpec) -> Self {
        self.commands.insert(name.to_ascii_lowercase(), spec);
        self
    }

    /// Resolves a caller-supplied name to its canonical lowercase wire name.
    pub fn canonical_name(&self, name: &str) -> String {
        let lower = name.to_ascii_lowercase();
        match self.aliases.get(&lower) {
            Some(canonical) => canonical.clone(),
            None => lower,
        }
    }

    /// Returns the shape of a canonical command (identity for unknown names).
    pub fn spec(&self, canonical: &str) -> CommandSpec {
        self.commands.get(canonical).copied().unwrap_or_default()
    }

    /// Translates a caller command into its wire form.
    pub fn translate(&self, command: Command) -> Translated {
        let name = self.canonical_name(&command.name);
        let spec = self.spec(&name);
        let (args, meta) = spec.rule.apply(command.args);
        Translated {
            name,
            args,
            shape: spec.reply,
            meta,
        }
    }
}

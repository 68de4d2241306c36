//! Command records and argument shape rules.
//!
//! A caller issues a command the way a blocking client would: a name plus
//! positional arguments, some of which may be lists or mappings. The shape
//! rules here rewrite those arguments into the flat positional form the store
//! expects and record whatever the reply transformer will need later.

use crate::value::Value;

/// A command as issued by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    /// Command name, case-insensitive, possibly a legacy alias.
    pub name: String,
    /// Positional arguments before translation.
    pub args: Vec<Value>,
}

impl Command {
    pub fn new(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

/// Selects which reply transformation applies to a command's raw reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyShape {
    /// Reply is passed through unchanged.
    Plain,
    /// Flat `[k1, v1, k2, v2, ...]` reply becomes a mapping.
    HashPairs,
    /// Positional reply is keyed by the recorded key list.
    Keyed,
    /// Member/score pairs, only when the `withscores` flag was set.
    ScorePairs,
}

/// Data captured from the caller's arguments during translation.
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    /// The mapping flattened by `mset` / `hmset`, in caller order.
    Mapping(Vec<(String, Value)>),
    /// The key list flattened by `mget` / `hmget`, in caller order.
    Keys(Vec<Value>),
}

impl Recorded {
    /// Returns the recorded keys rendered as mapping keys.
    pub fn keys(&self) -> Vec<String> {
        match self {
            Recorded::Mapping(entries) => entries.iter().map(|(k, _)| k.clone()).collect(),
            Recorded::Keys(keys) => keys.iter().map(Value::to_key).collect(),
        }
    }
}

/// Auxiliary metadata riding along with a translated command.
///
/// Never sent on the wire and dropped once the reply has been shaped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SideChannel {
    pub recorded: Option<Recorded>,
    pub withscores: bool,
}

/// A command ready to be written to a connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Translated {
    /// Canonical, lowercase command name.
    pub name: String,
    /// Flat positional wire arguments.
    pub args: Vec<Value>,
    pub shape: ReplyShape,
    pub meta: SideChannel,
}

/// Per-command argument rewrite.
///
/// Every rule is total: arguments that do not have the shape a rule looks for
/// are passed through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeRule {
    /// Arguments are sent as given.
    Identity,
    /// `key, [members]` -> `key, member...` (`lpush`, `sadd`, `srem`, `zrem`).
    BatchAdd,
    /// `[keys]` -> `key...` (`del`).
    FlattenKeys,
    /// `{k: v}` -> `k, v, ...` (`mset`).
    MSet,
    /// `hash, {f: v}` -> `hash, f, v, ...` (`hmset`).
    HMSet,
    /// `[keys]` -> `key...` (`mget`).
    MGet,
    /// `hash, [fields]` -> `hash, field...` (`hmget`).
    HMGet,
    /// `key, value, count` -> `key, count, value` (`lrem`).
    LRem,
    /// Trailing boolean becomes the `withscores` token (`zrange`, `zrevrange`).
    ZRange,
    /// Trailing options mapping becomes `withscores` / `limit` tokens.
    ZRangeByScore,
    /// `dest, [keys], [weights], aggregate` -> `dest, numkeys, key..., WEIGHTS ..., AGGREGATE mode`.
    ZStore,
    /// `key, {options}` -> `key, by .., limit .., get .., order, alpha, store ..`.
    Sort,
}

impl ShapeRule {
    /// Rewrites caller arguments into wire arguments.
    pub fn apply(self, args: Vec<Value>) -> (Vec<Value>, SideChannel) {
        match self {
            ShapeRule::Identity => (args, SideChannel::default()),
            ShapeRule::BatchAdd => (batch_add(args), SideChannel::default()),
            ShapeRule::FlattenKeys => (flatten_keys(args), SideChannel::default()),
            ShapeRule::MSet => flatten_mapping(args, 0),
            ShapeRule::HMSet => flatten_mapping(args, 1),
            ShapeRule::MGet => flatten_key_list(args, 0),
            ShapeRule::HMGet => flatten_key_list(args, 1),
            ShapeRule::LRem => (lrem(args), SideChannel::default()),
            ShapeRule::ZRange => zrange(args),
            ShapeRule::ZRangeByScore => zrange_by_score(args),
            ShapeRule::ZStore => (zstore(args), SideChannel::default()),
            ShapeRule::Sort => (sort(args), SideChannel::default()),
        }
    }
}

fn token(s: &str) -> Value {
    Value::Str(s.to_string())
}

fn option<'a>(options: &'a [(String, Value)], key: &str) -> Option<&'a Value> {
    options.iter().find(|(k, _)| k == key).map(|(_, v)| v)
}

/// Removes and returns the mapping at `index`, if that argument is one.
fn take_mapping(args: &mut Vec<Value>, index: usize) -> Option<Vec<(String, Value)>> {
    let entries = match args.get_mut(index) {
        Some(Value::Map(entries)) => std::mem::take(entries),
        _ => return None,
    };
    args.remove(index);
    Some(entries)
}

/// Removes and returns the container at `index`, if that argument is one.
fn take_container(args: &mut Vec<Value>, index: usize) -> Option<Value> {
    if args.get(index).is_some_and(Value::is_container) {
        Some(args.remove(index))
    } else {
        None
    }
}

fn push_limit(out: &mut Vec<Value>, limit: &Value) {
    if let Some([offset, count, ..]) = limit.as_list() {
        out.push(token("limit"));
        out.push(offset.clone());
        out.push(count.clone());
    }
}

fn batch_add(mut args: Vec<Value>) -> Vec<Value> {
    let Some(members) = take_container(&mut args, 1) else {
        return args;
    };
    // Anything after the member list is dropped along with it.
    args.truncate(1);
    args.extend(members.into_elements());
    args
}

fn flatten_keys(mut args: Vec<Value>) -> Vec<Value> {
    match take_container(&mut args, 0) {
        Some(keys) => keys.into_elements(),
        None => args,
    }
}

fn flatten_mapping(mut args: Vec<Value>, index: usize) -> (Vec<Value>, SideChannel) {
    let Some(entries) = take_mapping(&mut args, index) else {
        return (args, SideChannel::default());
    };
    for (key, value) in &entries {
        args.push(Value::Str(key.clone()));
        args.push(value.clone());
    }
    let meta = SideChannel {
        recorded: Some(Recorded::Mapping(entries)),
        withscores: false,
    };
    (args, meta)
}

fn flatten_key_list(mut args: Vec<Value>, index: usize) -> (Vec<Value>, SideChannel) {
    let Some(keys) = take_container(&mut args, index) else {
        return (args, SideChannel::default());
    };
    let keys = keys.into_elements();
    args.extend(keys.iter().cloned());
    let meta = SideChannel {
        recorded: Some(Recorded::Keys(keys)),
        withscores: false,
    };
    (args, meta)
}

fn lrem(mut args: Vec<Value>) -> Vec<Value> {
    if args.len() >= 3 {
        args.swap(1, 2);
    }
    args
}

fn zrange(mut args: Vec<Value>) -> (Vec<Value>, SideChannel) {
    let mut meta = SideChannel::default();
    if args.len() == 4 {
        if args[3].is_truthy() {
            args[3] = token("withscores");
            meta.withscores = true;
        } else {
            args.truncate(3);
        }
    }
    (args, meta)
}

fn zrange_by_score(mut args: Vec<Value>) -> (Vec<Value>, SideChannel) {
    let mut meta = SideChannel::default();
    if args.len() != 4 {
        return (args, meta);
    }
    let Some(options) = take_mapping(&mut args, 3) else {
        // A bare flag here is not an option set; it never reaches the server
        args.truncate(3);
        return (args, meta);
    };
    meta.withscores = option(&options, "withscores").is_some_and(Value::is_truthy);
    if meta.withscores {
        args.push(token("withscores"));
    }
    if let Some(limit) = option(&options, "limit") {
        push_limit(&mut args, limit);
    }
    (args, meta)
}

fn zstore(args: Vec<Value>) -> Vec<Value> {
    if !args.get(1).is_some_and(Value::is_container) {
        return args;
    }
    let mut iter = args.into_iter();
    let dest = iter.next().unwrap_or_default();
    let keys = iter.next().unwrap_or_default().into_elements();
    let weights = iter.next();
    let aggregate = iter.next();

    let mut out = Vec::with_capacity(keys.len() + 6);
    out.push(dest);
    out.push(Value::from(keys.len()));
    out.extend(keys);

    if let Some(weights) = weights.filter(|w| !w.is_nil()) {
        let weights = weights.into_elements();
        if !weights.is_empty() {
            out.push(token("WEIGHTS"));
            out.extend(weights);
        }
    }
    if let Some(mode) = aggregate.filter(|m| !m.is_nil()) {
        out.push(token("AGGREGATE"));
        out.push(mode);
    }
    out
}

fn sort(args: Vec<Value>) -> Vec<Value> {
    if args.is_empty() {
        return args;
    }
    let count = args.len();
    let mut iter = args.into_iter();
    let mut out = vec![iter.next().unwrap_or_default()];
    if count != 2 {
        return out;
    }
    let Some(Value::Map(options)) = iter.next() else {
        return out;
    };

    if let Some(by) = option(&options, "by") {
        out.push(token("by"));
        out.push(by.clone());
    }
    if let Some(limit) = option(&options, "limit") {
        push_limit(&mut out, limit);
    }
    if let Some(get) = option(&options, "get") {
        for target in get.clone().into_elements() {
            out.push(token("get"));
            out.push(target);
        }
    }
    if let Some(order) = option(&options, "sort") {
        out.push(order.clone());
    }
    if option(&options, "alpha").is_some_and(Value::is_truthy) {
        out.push(token("alpha"));
    }
    if let Some(store) = option(&options, "store") {
        out.push(token("store"));
        out.push(store.clone());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> Value {
        Value::from(v)
    }

    #[test]
    fn test_batch_add_flattens_members() {
        let (args, meta) = ShapeRule::BatchAdd.apply(vec![s("set"), Value::list(["a", "b"])]);
        assert_eq!(args, vec![s("set"), s("a"), s("b")]);
        assert_eq!(meta, SideChannel::default());

        // Scalar member is left alone
        let (args, _) = ShapeRule::BatchAdd.apply(vec![s("set"), s("a")]);
        assert_eq!(args, vec![s("set"), s("a")]);
    }

    #[test]
    fn test_flatten_keys() {
        let (args, _) = ShapeRule::FlattenKeys.apply(vec![Value::list(["k1", "k2"])]);
        assert_eq!(args, vec![s("k1"), s("k2")]);

        let (args, _) = ShapeRule::FlattenKeys.apply(vec![s("k1"), s("k2")]);
        assert_eq!(args, vec![s("k1"), s("k2")]);
    }

    #[test]
    fn test_mset_records_mapping() {
        let (args, meta) = ShapeRule::MSet.apply(vec![Value::map([("a", 1), ("b", 2)])]);
        assert_eq!(args, vec![s("a"), Value::Int(1), s("b"), Value::Int(2)]);
        assert_eq!(
            meta.recorded,
            Some(Recorded::Mapping(vec![
                ("a".to_string(), Value::Int(1)),
                ("b".to_string(), Value::Int(2)),
            ]))
        );
    }

    #[test]
    fn test_hmset_keeps_hash_key_first() {
        let (args, meta) =
            ShapeRule::HMSet.apply(vec![s("user:1"), Value::map([("name", "ann"), ("age", "7")])]);
        assert_eq!(
            args,
            vec![s("user:1"), s("name"), s("ann"), s("age"), s("7")]
        );
        assert_eq!(
            meta.recorded.map(|r| r.keys()),
            Some(vec!["name".to_string(), "age".to_string()])
        );
    }

    #[test]
    fn test_mget_and_hmget_record_keys() {
        let (args, meta) = ShapeRule::MGet.apply(vec![Value::list(["x", "y"])]);
        assert_eq!(args, vec![s("x"), s("y")]);
        assert_eq!(meta.recorded, Some(Recorded::Keys(vec![s("x"), s("y")])));

        let (args, meta) = ShapeRule::HMGet.apply(vec![s("h"), Value::list(["f1", "f2"])]);
        assert_eq!(args, vec![s("h"), s("f1"), s("f2")]);
        assert_eq!(meta.recorded, Some(Recorded::Keys(vec![s("f1"), s("f2")])));
    }

    #[test]
    fn test_lrem_swaps_value_and_count() {
        let (args, _) = ShapeRule::LRem.apply(vec![s("list"), s("v"), Value::Int(3)]);
        assert_eq!(args, vec![s("list"), Value::Int(3), s("v")]);

        // Too short to swap
        let (args, _) = ShapeRule::LRem.apply(vec![s("list"), s("v")]);
        assert_eq!(args, vec![s("list"), s("v")]);
    }

    #[test]
    fn test_zrange_withscores_flag() {
        let base = || vec![s("z"), Value::Int(0), Value::Int(-1)];

        let mut with = base();
        with.push(Value::Bool(true));
        let (args, meta) = ShapeRule::ZRange.apply(with);
        assert_eq!(args, vec![s("z"), Value::Int(0), Value::Int(-1), s("withscores")]);
        assert!(meta.withscores);

        let mut without = base();
        without.push(Value::Bool(false));
        let (args, meta) = ShapeRule::ZRange.apply(without);
        assert_eq!(args, base());
        assert!(!meta.withscores);

        let (args, meta) = ShapeRule::ZRange.apply(base());
        assert_eq!(args, base());
        assert!(!meta.withscores);
    }

    #[test]
    fn test_zrangebyscore_options() {
        let options = Value::from(serde_json::json!({"withscores": true, "limit": [0, 5]}));
        let (args, meta) =
            ShapeRule::ZRangeByScore.apply(vec![s("z"), Value::Int(0), Value::Int(10), options]);
        assert_eq!(
            args,
            vec![
                s("z"),
                Value::Int(0),
                Value::Int(10),
                s("withscores"),
                s("limit"),
                Value::Int(0),
                Value::Int(5),
            ]
        );
        assert!(meta.withscores);

        let options = Value::map([("limit", Value::list([10, 20]))]);
        let (args, meta) =
            ShapeRule::ZRangeByScore.apply(vec![s("z"), s("-inf"), s("+inf"), options]);
        assert_eq!(
            args,
            vec![s("z"), s("-inf"), s("+inf"), s("limit"), Value::Int(10), Value::Int(20)]
        );
        assert!(!meta.withscores);
    }

    #[test]
    fn test_zrangebyscore_drops_non_mapping_options() {
        let (args, meta) = ShapeRule::ZRangeByScore.apply(vec![
            s("z"),
            Value::Int(0),
            Value::Int(10),
            Value::Bool(true),
        ]);
        assert_eq!(args, vec![s("z"), Value::Int(0), Value::Int(10)]);
        assert!(!meta.withscores);
    }

    #[test]
    fn test_zstore_expansion() {
        let (args, _) = ShapeRule::ZStore.apply(vec![
            s("dest"),
            Value::list(["a", "b"]),
            Value::list([1, 2]),
            s("max"),
        ]);
        assert_eq!(
            args,
            vec![
                s("dest"),
                Value::Int(2),
                s("a"),
                s("b"),
                s("WEIGHTS"),
                Value::Int(1),
                Value::Int(2),
                s("AGGREGATE"),
                s("max"),
            ]
        );

        let (args, _) = ShapeRule::ZStore.apply(vec![s("dest"), Value::list(["a"])]);
        assert_eq!(args, vec![s("dest"), Value::Int(1), s("a")]);

        // Nil weights are skipped but the aggregate mode still applies
        let (args, _) =
            ShapeRule::ZStore.apply(vec![s("dest"), Value::list(["a"]), Value::Nil, s("sum")]);
        assert_eq!(
            args,
            vec![s("dest"), Value::Int(1), s("a"), s("AGGREGATE"), s("sum")]
        );
    }

    #[test]
    fn test_sort_options_order() {
        let options = Value::map([
            ("store", Value::from("out")),
            ("alpha", Value::Bool(true)),
            ("sort", Value::from("desc")),
            ("get", Value::list(["w_*", "#"])),
            ("limit", Value::list([0, 10])),
            ("by", Value::from("weight_*")),
        ]);
        let (args, _) = ShapeRule::Sort.apply(vec![s("ids"), options]);
        assert_eq!(
            args,
            vec![
                s("ids"),
                s("by"),
                s("weight_*"),
                s("limit"),
                Value::Int(0),
                Value::Int(10),
                s("get"),
                s("w_*"),
                s("get"),
                s("#"),
                s("desc"),
                s("alpha"),
                s("store"),
                s("out"),
            ]
        );
    }

    #[test]
    fn test_sort_single_get_and_no_options() {
        let (args, _) =
            ShapeRule::Sort.apply(vec![s("ids"), Value::map([("get", "name_*")])]);
        assert_eq!(args, vec![s("ids"), s("get"), s("name_*")]);

        let (args, _) = ShapeRule::Sort.apply(vec![s("ids")]);
        assert_eq!(args, vec![s("ids")]);

        let (args, _) = ShapeRule::Sort.apply(vec![
            s("ids"),
            Value::map([("alpha", false)]),
        ]);
        assert_eq!(args, vec![s("ids")]);
    }

    #[test]
    fn test_identity_passthrough() {
        let input = vec![s("k"), Value::list([1, 2])];
        let (args, meta) = ShapeRule::Identity.apply(input.clone());
        assert_eq!(args, input);
        assert_eq!(meta, SideChannel::default());
    }
}

//! Classification tables for every command the sharded client understands.
//!
//! Each command carries two pieces of static data: how it is routed
//! ([`Category`]) and which of its positional arguments are keys
//! ([`KeySpec`]). Names missing from the table are rejected before any
//! network call.

use std::fmt;
use std::str::FromStr;

use crate::request::Arg;
use crate::Error;

/// Which connection a command may run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Safe to serve from a read replica.
    Read,
    /// Must run on the primary.
    Write,
}

/// Which nodes an administrative command is sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanoutTarget {
    /// Every primary; secondaries are reported as skipped.
    Primaries,
    /// Every secondary; a partition without one answers from its primary.
    Secondaries,
    /// Every connected node.
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    /// Single key, served by the owning partition's secondary.
    Read,
    /// Single key, served by the owning partition's primary.
    Write,
    /// No key; sent to every partition and merged.
    Fanout(FanoutTarget),
    /// Several keys. Forwarded as-is when every key shares one hash tag,
    /// emulated with single-key calls otherwise.
    TagRequired(Access),
    /// No key; sent untouched to the default partition.
    PassThrough,
}

/// Positions of the key arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySpec {
    None,
    First,
    /// `OBJECT ENCODING key`
    Second,
    /// `RENAME src dst`, `SMOVE src dst member`
    FirstTwo,
    All,
    /// `BLPOP k1 k2 timeout`
    AllButLast,
    /// `MSET k1 v1 k2 v2`
    Pairs,
    /// `BITOP AND dest k1 k2`
    AllAfterFirst,
    /// `ZUNIONSTORE dest numkeys k1 k2 [WEIGHTS ..]`
    StoreNumKeys,
}

impl KeySpec {
    /// Indices of the key arguments in `args`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArguments`] when `args` is too short for the
    /// command's shape.
    pub fn positions(self, command: Command, args: &[Arg]) -> Result<Vec<usize>, Error> {
        let len = args.len();
        let require = |min: usize| {
            if len < min {
                Err(Error::invalid_arguments(
                    command.name(),
                    format!("expected at least {} arguments, got {}", min, len),
                ))
            } else {
                Ok(())
            }
        };

        match self {
            Self::None => Ok(Vec::new()),
            Self::First => require(1).map(|_| vec![0]),
            Self::Second => require(2).map(|_| vec![1]),
            Self::FirstTwo => require(2).map(|_| vec![0, 1]),
            Self::All => require(1).map(|_| (0..len).collect()),
            Self::AllButLast => require(2).map(|_| (0..len - 1).collect()),
            Self::AllAfterFirst => require(2).map(|_| (1..len).collect()),
            Self::Pairs => {
                require(2)?;
                if len % 2 != 0 {
                    return Err(Error::invalid_arguments(
                        command.name(),
                        "keys and values must come in pairs",
                    ));
                }
                Ok((0..len).step_by(2).collect())
            }
            Self::StoreNumKeys => {
                require(3)?;
                let numkeys = std::str::from_utf8(args[1].value())
                    .ok()
                    .and_then(|s| s.parse::<usize>().ok())
                    .filter(|n| *n > 0 && 2 + n <= len)
                    .ok_or_else(|| {
                        Error::invalid_arguments(command.name(), "numkeys is not a valid key count")
                    })?;
                let mut positions = vec![0];
                positions.extend(2..2 + numkeys);
                Ok(positions)
            }
        }
    }
}

macro_rules! command_table {
    ($($variant:ident => $name:literal, $category:expr, $keys:expr;)+) => {
        /// Every command the sharded client can route.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Command {
            $($variant,)+
        }

        impl Command {
            pub const ALL: &'static [Command] = &[$(Command::$variant,)+];

            /// Canonical lowercase name. Two-word commands use `_` (`config_get`).
            pub fn name(self) -> &'static str {
                match self {
                    $(Command::$variant => $name,)+
                }
            }

            pub fn category(self) -> Category {
                match self {
                    $(Command::$variant => $category,)+
                }
            }

            pub fn key_spec(self) -> KeySpec {
                match self {
                    $(Command::$variant => $keys,)+
                }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($name => Some(Command::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

command_table! {
    // single-key reads
    Get              => "get",              Category::Read, KeySpec::First;
    GetBit           => "getbit",           Category::Read, KeySpec::First;
    GetRange         => "getrange",         Category::Read, KeySpec::First;
    Substr           => "substr",           Category::Read, KeySpec::First;
    Strlen           => "strlen",           Category::Read, KeySpec::First;
    BitCount         => "bitcount",         Category::Read, KeySpec::First;
    BitPos           => "bitpos",           Category::Read, KeySpec::First;
    Hget             => "hget",             Category::Read, KeySpec::First;
    Hgetall          => "hgetall",          Category::Read, KeySpec::First;
    Hkeys            => "hkeys",            Category::Read, KeySpec::First;
    Hlen             => "hlen",             Category::Read, KeySpec::First;
    Hmget            => "hmget",            Category::Read, KeySpec::First;
    Hvals            => "hvals",            Category::Read, KeySpec::First;
    Hexists          => "hexists",          Category::Read, KeySpec::First;
    Hstrlen          => "hstrlen",          Category::Read, KeySpec::First;
    Lindex           => "lindex",           Category::Read, KeySpec::First;
    Llen             => "llen",             Category::Read, KeySpec::First;
    Lrange           => "lrange",           Category::Read, KeySpec::First;
    Scard            => "scard",            Category::Read, KeySpec::First;
    Sismember        => "sismember",        Category::Read, KeySpec::First;
    Smembers         => "smembers",         Category::Read, KeySpec::First;
    Srandmember      => "srandmember",      Category::Read, KeySpec::First;
    Type             => "type",             Category::Read, KeySpec::First;
    Ttl              => "ttl",              Category::Read, KeySpec::First;
    Pttl             => "pttl",             Category::Read, KeySpec::First;
    Dump             => "dump",             Category::Read, KeySpec::First;
    Zcard            => "zcard",            Category::Read, KeySpec::First;
    Zcount           => "zcount",           Category::Read, KeySpec::First;
    Zrange           => "zrange",           Category::Read, KeySpec::First;
    Zrangebyscore    => "zrangebyscore",    Category::Read, KeySpec::First;
    Zrank            => "zrank",            Category::Read, KeySpec::First;
    Zrevrange        => "zrevrange",        Category::Read, KeySpec::First;
    Zrevrangebyscore => "zrevrangebyscore", Category::Read, KeySpec::First;
    Zrevrank         => "zrevrank",         Category::Read, KeySpec::First;
    Zscore           => "zscore",           Category::Read, KeySpec::First;
    Object           => "object",           Category::Read, KeySpec::Second;
    DebugObject      => "debug_object",     Category::Read, KeySpec::First;

    // single-key writes
    Append           => "append",           Category::Write, KeySpec::First;
    Decr             => "decr",             Category::Write, KeySpec::First;
    Decrby           => "decrby",           Category::Write, KeySpec::First;
    Expire           => "expire",           Category::Write, KeySpec::First;
    Expireat         => "expireat",         Category::Write, KeySpec::First;
    Pexpire          => "pexpire",          Category::Write, KeySpec::First;
    Pexpireat        => "pexpireat",        Category::Write, KeySpec::First;
    Persist          => "persist",          Category::Write, KeySpec::First;
    Getset           => "getset",           Category::Write, KeySpec::First;
    Getdel           => "getdel",           Category::Write, KeySpec::First;
    Hdel             => "hdel",             Category::Write, KeySpec::First;
    Hincrby          => "hincrby",          Category::Write, KeySpec::First;
    Hincrbyfloat     => "hincrbyfloat",     Category::Write, KeySpec::First;
    Hset             => "hset",             Category::Write, KeySpec::First;
    Hsetnx           => "hsetnx",           Category::Write, KeySpec::First;
    Hmset            => "hmset",            Category::Write, KeySpec::First;
    Incr             => "incr",             Category::Write, KeySpec::First;
    Incrby           => "incrby",           Category::Write, KeySpec::First;
    Incrbyfloat      => "incrbyfloat",      Category::Write, KeySpec::First;
    Linsert          => "linsert",          Category::Write, KeySpec::First;
    Lpop             => "lpop",             Category::Write, KeySpec::First;
    Lpush            => "lpush",            Category::Write, KeySpec::First;
    Lpushx           => "lpushx",           Category::Write, KeySpec::First;
    Lrem             => "lrem",             Category::Write, KeySpec::First;
    Lset             => "lset",             Category::Write, KeySpec::First;
    Ltrim            => "ltrim",            Category::Write, KeySpec::First;
    Rpop             => "rpop",             Category::Write, KeySpec::First;
    Rpush            => "rpush",            Category::Write, KeySpec::First;
    Rpushx           => "rpushx",           Category::Write, KeySpec::First;
    Sadd             => "sadd",             Category::Write, KeySpec::First;
    Spop             => "spop",             Category::Write, KeySpec::First;
    Srem             => "srem",             Category::Write, KeySpec::First;
    Set              => "set",              Category::Write, KeySpec::First;
    SetBit           => "setbit",           Category::Write, KeySpec::First;
    Setex            => "setex",            Category::Write, KeySpec::First;
    Psetex           => "psetex",           Category::Write, KeySpec::First;
    Setnx            => "setnx",            Category::Write, KeySpec::First;
    SetRange         => "setrange",         Category::Write, KeySpec::First;
    Zadd             => "zadd",             Category::Write, KeySpec::First;
    Zincrby          => "zincrby",          Category::Write, KeySpec::First;
    Zrem             => "zrem",             Category::Write, KeySpec::First;
    Zremrangebyrank  => "zremrangebyrank",  Category::Write, KeySpec::First;
    Zremrangebyscore => "zremrangebyscore", Category::Write, KeySpec::First;
    Restore          => "restore",          Category::Write, KeySpec::First;
    Move             => "move",             Category::Write, KeySpec::First;
    Publish          => "publish",          Category::Write, KeySpec::First;

    // multi-key
    Mget             => "mget",             Category::TagRequired(Access::Read),  KeySpec::All;
    Exists           => "exists",           Category::TagRequired(Access::Read),  KeySpec::All;
    Sdiff            => "sdiff",            Category::TagRequired(Access::Read),  KeySpec::All;
    Sinter           => "sinter",           Category::TagRequired(Access::Read),  KeySpec::All;
    Sunion           => "sunion",           Category::TagRequired(Access::Read),  KeySpec::All;
    Mset             => "mset",             Category::TagRequired(Access::Write), KeySpec::Pairs;
    Msetnx           => "msetnx",           Category::TagRequired(Access::Write), KeySpec::Pairs;
    Del              => "del",              Category::TagRequired(Access::Write), KeySpec::All;
    Unlink           => "unlink",           Category::TagRequired(Access::Write), KeySpec::All;
    Touch            => "touch",            Category::TagRequired(Access::Write), KeySpec::All;
    Rename           => "rename",           Category::TagRequired(Access::Write), KeySpec::FirstTwo;
    Renamenx         => "renamenx",         Category::TagRequired(Access::Write), KeySpec::FirstTwo;
    Rpoplpush        => "rpoplpush",        Category::TagRequired(Access::Write), KeySpec::FirstTwo;
    Brpoplpush       => "brpoplpush",       Category::TagRequired(Access::Write), KeySpec::FirstTwo;
    Smove            => "smove",            Category::TagRequired(Access::Write), KeySpec::FirstTwo;
    Sdiffstore       => "sdiffstore",       Category::TagRequired(Access::Write), KeySpec::All;
    Sinterstore      => "sinterstore",      Category::TagRequired(Access::Write), KeySpec::All;
    Sunionstore      => "sunionstore",      Category::TagRequired(Access::Write), KeySpec::All;
    Zinterstore      => "zinterstore",      Category::TagRequired(Access::Write), KeySpec::StoreNumKeys;
    Zunionstore      => "zunionstore",      Category::TagRequired(Access::Write), KeySpec::StoreNumKeys;
    Sort             => "sort",             Category::TagRequired(Access::Write), KeySpec::First;
    Blpop            => "blpop",            Category::TagRequired(Access::Write), KeySpec::AllButLast;
    Brpop            => "brpop",            Category::TagRequired(Access::Write), KeySpec::AllButLast;
    Bitop            => "bitop",            Category::TagRequired(Access::Write), KeySpec::AllAfterFirst;

    // administrative fanout
    Keys             => "keys",             Category::Fanout(FanoutTarget::Secondaries), KeySpec::None;
    Dbsize           => "dbsize",           Category::Fanout(FanoutTarget::Secondaries), KeySpec::None;
    Flushall         => "flushall",         Category::Fanout(FanoutTarget::Primaries),   KeySpec::None;
    Flushdb          => "flushdb",          Category::Fanout(FanoutTarget::Primaries),   KeySpec::None;
    Info             => "info",             Category::Fanout(FanoutTarget::All),         KeySpec::None;
    Ping             => "ping",             Category::Fanout(FanoutTarget::All),         KeySpec::None;
    Time             => "time",             Category::Fanout(FanoutTarget::All),         KeySpec::None;
    Lastsave         => "lastsave",         Category::Fanout(FanoutTarget::All),         KeySpec::None;
    Save             => "save",             Category::Fanout(FanoutTarget::All),         KeySpec::None;
    Bgsave           => "bgsave",           Category::Fanout(FanoutTarget::All),         KeySpec::None;
    Bgrewriteaof     => "bgrewriteaof",     Category::Fanout(FanoutTarget::All),         KeySpec::None;
    ConfigGet        => "config_get",       Category::Fanout(FanoutTarget::All),         KeySpec::None;
    ConfigSet        => "config_set",       Category::Fanout(FanoutTarget::All),         KeySpec::None;
    ClientList       => "client_list",      Category::Fanout(FanoutTarget::All),         KeySpec::None;

    // keyless, default partition
    Echo             => "echo",             Category::PassThrough, KeySpec::None;
    Randomkey        => "randomkey",        Category::PassThrough, KeySpec::None;
}

/// Commands that depend on connection state or a single node's identity.
const NODE_LOCAL: &[&str] = &[
    "auth", "select", "quit", "multi", "exec", "discard", "watch", "unwatch", "subscribe",
    "unsubscribe", "psubscribe", "punsubscribe", "monitor", "sync", "psync", "shutdown",
    "slaveof", "replicaof", "slowlog", "eval", "evalsha", "script", "swapdb", "migrate",
    "cluster", "readonly", "readwrite",
];

impl Command {
    /// Words sent on the wire: `config_get` becomes `CONFIG GET`.
    pub fn wire(self) -> (&'static str, Option<&'static str>) {
        match self.name().split_once('_') {
            Some((name, sub)) => (name, Some(sub)),
            None => (self.name(), None),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        classify(name)
    }
}

/// Look up a command by its lowercase name. `config get` and `config_get` are
/// equivalent; no other spelling is accepted.
///
/// # Errors
///
/// Returns [`Error::Unsupported`] for node-local commands and for names that
/// are not in the table.
pub fn classify(name: &str) -> Result<Command, Error> {
    let canonical = name.replace(' ', "_");
    if let Some(command) = Command::from_name(&canonical) {
        return Ok(command);
    }
    if NODE_LOCAL.contains(&canonical.as_str()) {
        return Err(Error::unsupported(
            canonical,
            "depends on connection state or a single node",
        ));
    }
    Err(Error::unsupported(canonical, "unknown command"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_every_name_round_trips() {
        for command in Command::ALL {
            assert_eq!(Command::from_name(command.name()), Some(*command));
            assert_eq!(classify(command.name()).unwrap(), *command);
        }
    }

    #[test]
    fn test_names_are_unique_and_lowercase() {
        let names: HashSet<_> = Command::ALL.iter().map(|c| c.name()).collect();
        assert_eq!(names.len(), Command::ALL.len());
        for name in names {
            assert_eq!(name, name.to_lowercase());
        }
    }

    #[test]
    fn test_node_local_commands_never_in_table() {
        for name in NODE_LOCAL {
            assert!(Command::from_name(name).is_none(), "{} is in the table", name);
            assert!(classify(name).unwrap_err().is_unsupported());
        }
    }

    #[test]
    fn test_unknown_command_fails_closed() {
        let err = classify("frobnicate").unwrap_err();
        assert!(matches!(
            err,
            Error::Unsupported {
                ref command,
                reason: "unknown command"
            } if command == "frobnicate"
        ));
    }

    #[test]
    fn test_lookup_is_case_sensitive() {
        assert_eq!(classify("get").unwrap(), Command::Get);
        assert!(classify("GET").unwrap_err().is_unsupported());
        assert!(classify("Config Get").unwrap_err().is_unsupported());
        assert!(classify(" get").unwrap_err().is_unsupported());
        assert!(classify("MULTI").unwrap_err().is_unsupported());
    }

    #[test]
    fn test_two_word_commands() {
        assert_eq!(classify("config get").unwrap(), Command::ConfigGet);
        assert_eq!(Command::ConfigGet.wire(), ("config", Some("get")));
        assert_eq!(Command::ClientList.wire(), ("client", Some("list")));
        assert_eq!(Command::Get.wire(), ("get", None));
    }

    #[test]
    fn test_categories() {
        assert_eq!(Command::Get.category(), Category::Read);
        assert_eq!(Command::Set.category(), Category::Write);
        assert_eq!(
            Command::Sunionstore.category(),
            Category::TagRequired(Access::Write)
        );
        assert_eq!(Command::Mget.category(), Category::TagRequired(Access::Read));
        assert_eq!(
            Command::Flushdb.category(),
            Category::Fanout(FanoutTarget::Primaries)
        );
        assert_eq!(
            Command::Keys.category(),
            Category::Fanout(FanoutTarget::Secondaries)
        );
        assert_eq!(Command::Echo.category(), Category::PassThrough);
    }

    #[test]
    fn test_fanout_and_pass_through_take_no_keys() {
        for command in Command::ALL {
            match command.category() {
                Category::Fanout(_) | Category::PassThrough => {
                    assert_eq!(command.key_spec(), KeySpec::None, "{}", command)
                }
                _ => assert_ne!(command.key_spec(), KeySpec::None, "{}", command),
            }
        }
    }

    fn args(values: &[&str]) -> Vec<Arg> {
        values.iter().map(|v| Arg::from(*v)).collect()
    }

    #[test]
    fn test_key_positions() {
        let positions = |c: Command, a: &[&str]| c.key_spec().positions(c, &args(a)).unwrap();

        assert_eq!(positions(Command::Get, &["k"]), vec![0]);
        assert_eq!(positions(Command::Object, &["encoding", "k"]), vec![1]);
        assert_eq!(positions(Command::Smove, &["a", "b", "m"]), vec![0, 1]);
        assert_eq!(positions(Command::Mget, &["a", "b", "c"]), vec![0, 1, 2]);
        assert_eq!(positions(Command::Blpop, &["a", "b", "0"]), vec![0, 1]);
        assert_eq!(positions(Command::Mset, &["a", "1", "b", "2"]), vec![0, 2]);
        assert_eq!(positions(Command::Bitop, &["and", "d", "a"]), vec![1, 2]);
        assert_eq!(
            positions(Command::Zunionstore, &["d", "2", "a", "b", "WEIGHTS", "1", "2"]),
            vec![0, 2, 3]
        );
    }

    #[test]
    fn test_key_positions_reject_bad_shapes() {
        let check = |c: Command, a: &[&str]| c.key_spec().positions(c, &args(a)).unwrap_err();

        assert!(matches!(check(Command::Get, &[]), Error::InvalidArguments { .. }));
        assert!(matches!(check(Command::Mset, &["a", "1", "b"]), Error::InvalidArguments { .. }));
        assert!(matches!(check(Command::Zunionstore, &["d", "5", "a"]), Error::InvalidArguments { .. }));
        assert!(matches!(check(Command::Zunionstore, &["d", "x", "a"]), Error::InvalidArguments { .. }));
    }
}

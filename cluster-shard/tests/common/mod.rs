//! In-memory stand-in for a set of Redis nodes.
//!
//! Each partition owns one keyspace shared by its primary and secondary, so
//! a write on the primary is visible to reads on the replica immediately.
//! Every command that reaches a node is appended to a call log.

#![allow(dead_code)]

use async_trait::async_trait;
use cluster_shard::{
    Command, Connection, Connector, Endpoint, Invocation, PartitionConfig, TopologyConfig,
};
use redis::{ErrorKind, RedisError, RedisResult, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

const PRIMARY_PORT_BASE: u16 = 7000;
const SECONDARY_PORT_BASE: u16 = 8000;

/// One command as a node received it.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub endpoint: String,
    pub command: Command,
    pub args: Vec<Vec<u8>>,
}

#[derive(Debug, Clone)]
enum Data {
    Str(Vec<u8>),
    List(VecDeque<Vec<u8>>),
    Set(BTreeSet<Vec<u8>>),
    Hash(BTreeMap<Vec<u8>, Vec<u8>>),
    ZSet(Vec<(Vec<u8>, f64)>),
}

impl Data {
    fn type_name(&self) -> &'static str {
        match self {
            Self::Str(_) => "string",
            Self::List(_) => "list",
            Self::Set(_) => "set",
            Self::Hash(_) => "hash",
            Self::ZSet(_) => "zset",
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    data: Data,
    ttl_ms: Option<i64>,
}

#[derive(Default)]
pub struct Keyspace {
    entries: Mutex<HashMap<Vec<u8>, Entry>>,
}

impl Keyspace {
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().unwrap().contains_key(key.as_bytes())
    }
}

/// A whole deployment: `n` partitions, primaries on ports 7001.., replicas
/// on ports 8001.. sharing the same keyspace.
pub struct MemoryCluster {
    keyspaces: Vec<Arc<Keyspace>>,
    calls: Arc<Mutex<Vec<Call>>>,
    unreachable: Mutex<HashSet<u16>>,
    failing: Arc<Mutex<HashSet<u16>>>,
    info: Mutex<HashMap<u16, String>>,
}

impl MemoryCluster {
    pub fn new(partitions: usize) -> Self {
        Self {
            keyspaces: (0..partitions).map(|_| Arc::new(Keyspace::default())).collect(),
            calls: Arc::new(Mutex::new(Vec::new())),
            unreachable: Mutex::new(HashSet::new()),
            failing: Arc::new(Mutex::new(HashSet::new())),
            info: Mutex::new(HashMap::new()),
        }
    }

    pub fn primary(ordinal: u32) -> Endpoint {
        Endpoint::new("127.0.0.1", PRIMARY_PORT_BASE + ordinal as u16)
    }

    pub fn secondary(ordinal: u32) -> Endpoint {
        Endpoint::new("127.0.0.1", SECONDARY_PORT_BASE + ordinal as u16)
    }

    /// Partitions `node_1..node_n`, each with a replica when `replicas` is set.
    pub fn topology(&self, replicas: bool) -> TopologyConfig {
        let partitions = (1..=self.keyspaces.len() as u32)
            .map(|ordinal| {
                let partition = PartitionConfig::new(format!("node_{}", ordinal), Self::primary(ordinal));
                if replicas {
                    partition.with_secondary(Self::secondary(ordinal))
                } else {
                    partition
                }
            })
            .collect();
        TopologyConfig::new(partitions).with_default_partition("node_1")
    }

    pub fn keyspace(&self, ordinal: u32) -> &Keyspace {
        &self.keyspaces[ordinal as usize - 1]
    }

    /// Refuse connections to `endpoint`.
    pub fn take_down(&self, endpoint: &Endpoint) {
        self.unreachable.lock().unwrap().insert(endpoint.port);
    }

    /// Accept connections to `endpoint` but fail every command on it.
    pub fn break_node(&self, endpoint: &Endpoint) {
        self.failing.lock().unwrap().insert(endpoint.port);
    }

    /// Text returned for `INFO` by the node at `endpoint`.
    pub fn set_info(&self, endpoint: &Endpoint, text: &str) {
        self.info.lock().unwrap().insert(endpoint.port, text.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, endpoint: &Endpoint) -> Vec<Call> {
        let address = endpoint.to_string();
        self.calls()
            .into_iter()
            .filter(|call| call.endpoint == address)
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn keyspace_for(&self, port: u16) -> Option<Arc<Keyspace>> {
        let ordinal = if port > SECONDARY_PORT_BASE {
            port - SECONDARY_PORT_BASE
        } else {
            port.checked_sub(PRIMARY_PORT_BASE)?
        };
        self.keyspaces.get(ordinal.checked_sub(1)? as usize).cloned()
    }
}

#[async_trait]
impl Connector for MemoryCluster {
    async fn connect(&self, endpoint: &Endpoint, _db: i64) -> RedisResult<Arc<dyn Connection>> {
        if self.unreachable.lock().unwrap().contains(&endpoint.port) {
            return Err(io_error("Connection refused"));
        }
        let keyspace = self
            .keyspace_for(endpoint.port)
            .ok_or_else(|| io_error("No such node"))?;

        Ok(Arc::new(MemoryNode {
            endpoint: endpoint.clone(),
            keyspace,
            calls: self.calls.clone(),
            failing: self.failing.clone(),
            info: self.info.lock().unwrap().get(&endpoint.port).cloned(),
        }))
    }
}

struct MemoryNode {
    endpoint: Endpoint,
    keyspace: Arc<Keyspace>,
    calls: Arc<Mutex<Vec<Call>>>,
    failing: Arc<Mutex<HashSet<u16>>>,
    info: Option<String>,
}

#[async_trait]
impl Connection for MemoryNode {
    async fn execute(&self, invocation: &Invocation) -> RedisResult<Value> {
        self.calls.lock().unwrap().push(Call {
            endpoint: self.endpoint.to_string(),
            command: invocation.command,
            args: invocation.args.clone(),
        });
        if self.failing.lock().unwrap().contains(&self.endpoint.port) {
            return Err(io_error("Broken pipe"));
        }

        let mut entries = self.keyspace.entries.lock().unwrap();
        run(&mut entries, invocation, self.info.as_deref())
    }
}

fn io_error(message: &'static str) -> RedisError {
    (ErrorKind::IoError, message).into()
}

fn wrong_type() -> RedisError {
    (
        ErrorKind::TypeError,
        "WRONGTYPE",
        "Operation against a key holding the wrong kind of value".to_string(),
    )
        .into()
}

fn syntax(message: &'static str) -> RedisError {
    (ErrorKind::ResponseError, message).into()
}

fn int(arg: &[u8]) -> RedisResult<i64> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| syntax("value is not an integer or out of range"))
}

fn float(arg: &[u8]) -> RedisResult<f64> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| syntax("value is not a valid float"))
}

fn bulk(bytes: &[u8]) -> Value {
    Value::BulkString(bytes.to_vec())
}

fn status(text: &str) -> Value {
    Value::SimpleString(text.to_string())
}

/// `KEYS` glob with `*` and `?`.
fn glob(pattern: &[u8], key: &[u8]) -> bool {
    match (pattern.split_first(), key.split_first()) {
        (None, None) => true,
        (Some((b'*', rest)), _) => glob(rest, key) || (!key.is_empty() && glob(pattern, &key[1..])),
        (Some((b'?', rest)), Some((_, key_rest))) => glob(rest, key_rest),
        (Some((p, rest)), Some((k, key_rest))) if p == k => glob(rest, key_rest),
        _ => false,
    }
}

fn range(len: usize, start: i64, stop: i64) -> std::ops::Range<usize> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if start > stop || start >= len {
        0..0
    } else {
        start as usize..stop as usize + 1
    }
}

macro_rules! entry_of {
    ($entries:expr, $key:expr, $variant:ident, $empty:expr) => {
        match $entries
            .entry($key.to_vec())
            .or_insert_with(|| Entry {
                data: Data::$variant($empty),
                ttl_ms: None,
            })
            .data
        {
            Data::$variant(ref mut inner) => inner,
            _ => return Err(wrong_type()),
        }
    };
}

fn run(
    entries: &mut HashMap<Vec<u8>, Entry>,
    invocation: &Invocation,
    info: Option<&str>,
) -> RedisResult<Value> {
    let args = &invocation.args;

    match invocation.command {
        Command::Ping => Ok(status("PONG")),
        Command::Echo => Ok(bulk(&args[0])),
        Command::Info => Ok(Value::BulkString(
            info.unwrap_or("# Replication\r\nrole:master\r\nconnected_slaves:0\r\n")
                .as_bytes()
                .to_vec(),
        )),
        Command::Dbsize => Ok(Value::Int(entries.len() as i64)),
        Command::Flushdb | Command::Flushall => {
            entries.clear();
            Ok(Value::Okay)
        }
        Command::Keys => {
            let mut keys: Vec<&Vec<u8>> = entries.keys().filter(|key| glob(&args[0], key)).collect();
            keys.sort();
            Ok(Value::Array(keys.into_iter().map(|key| bulk(key)).collect()))
        }

        Command::Get => match entries.get(&args[0]) {
            None => Ok(Value::Nil),
            Some(Entry {
                data: Data::Str(value),
                ..
            }) => Ok(bulk(value)),
            Some(_) => Err(wrong_type()),
        },
        Command::Set => {
            entries.insert(
                args[0].clone(),
                Entry {
                    data: Data::Str(args[1].clone()),
                    ttl_ms: None,
                },
            );
            Ok(Value::Okay)
        }
        Command::Mget => Ok(Value::Array(
            args.iter()
                .map(|key| match entries.get(key) {
                    Some(Entry {
                        data: Data::Str(value),
                        ..
                    }) => bulk(value),
                    _ => Value::Nil,
                })
                .collect(),
        )),
        Command::Mset => {
            for pair in args.chunks(2) {
                entries.insert(
                    pair[0].clone(),
                    Entry {
                        data: Data::Str(pair[1].clone()),
                        ttl_ms: None,
                    },
                );
            }
            Ok(Value::Okay)
        }
        Command::Del | Command::Unlink => {
            let removed = args.iter().filter(|key| entries.remove(*key).is_some()).count();
            Ok(Value::Int(removed as i64))
        }
        Command::Exists | Command::Touch => {
            let found = args.iter().filter(|key| entries.contains_key(*key)).count();
            Ok(Value::Int(found as i64))
        }
        Command::Type => Ok(status(
            entries
                .get(&args[0])
                .map_or("none", |entry| entry.data.type_name()),
        )),
        Command::Pttl => Ok(Value::Int(match entries.get(&args[0]) {
            None => -2,
            Some(entry) => entry.ttl_ms.unwrap_or(-1),
        })),
        Command::Pexpire | Command::Expire => {
            let mut ttl_ms = int(&args[1])?;
            if invocation.command == Command::Expire {
                ttl_ms *= 1000;
            }
            match entries.get_mut(&args[0]) {
                Some(entry) => {
                    entry.ttl_ms = Some(ttl_ms);
                    Ok(Value::Int(1))
                }
                None => Ok(Value::Int(0)),
            }
        }
        Command::Rename => {
            let entry = entries
                .remove(&args[0])
                .ok_or_else(|| syntax("no such key"))?;
            entries.insert(args[1].clone(), entry);
            Ok(Value::Okay)
        }
        Command::Renamenx => {
            if !entries.contains_key(&args[0]) {
                return Err(syntax("no such key"));
            }
            if entries.contains_key(&args[1]) {
                return Ok(Value::Int(0));
            }
            if let Some(entry) = entries.remove(&args[0]) {
                entries.insert(args[1].clone(), entry);
            }
            Ok(Value::Int(1))
        }

        Command::Sadd => {
            let set = entry_of!(entries, &args[0], Set, BTreeSet::new());
            let added = args[1..].iter().filter(|m| set.insert(m.to_vec())).count();
            Ok(Value::Int(added as i64))
        }
        Command::Srem => {
            let (removed, now_empty) = match entries.get_mut(&args[0]) {
                None => (0, false),
                Some(Entry {
                    data: Data::Set(set),
                    ..
                }) => {
                    let removed = args[1..].iter().filter(|m| set.remove(*m)).count();
                    (removed, set.is_empty())
                }
                Some(_) => return Err(wrong_type()),
            };
            if now_empty {
                entries.remove(&args[0]);
            }
            Ok(Value::Int(removed as i64))
        }
        Command::Smembers => match entries.get(&args[0]) {
            None => Ok(Value::Array(Vec::new())),
            Some(Entry {
                data: Data::Set(set),
                ..
            }) => Ok(Value::Array(set.iter().map(|m| bulk(m)).collect())),
            Some(_) => Err(wrong_type()),
        },
        Command::Sunion => {
            let mut union = BTreeSet::new();
            for key in args {
                match entries.get(key) {
                    None => {}
                    Some(Entry {
                        data: Data::Set(set),
                        ..
                    }) => union.extend(set.iter().cloned()),
                    Some(_) => return Err(wrong_type()),
                }
            }
            Ok(Value::Array(union.iter().map(|m| bulk(m)).collect()))
        }

        Command::Lpush | Command::Rpush => {
            let list = entry_of!(entries, &args[0], List, VecDeque::new());
            for value in &args[1..] {
                if invocation.command == Command::Lpush {
                    list.push_front(value.clone());
                } else {
                    list.push_back(value.clone());
                }
            }
            Ok(Value::Int(list.len() as i64))
        }
        Command::Rpop => pop_back(entries, &args[0]).map(|popped| popped.map_or(Value::Nil, |v| bulk(&v))),
        Command::Brpop => {
            for key in &args[..args.len() - 1] {
                if let Some(value) = pop_back(entries, key)? {
                    return Ok(Value::Array(vec![bulk(key), bulk(&value)]));
                }
            }
            Ok(Value::Nil)
        }
        Command::Lrange => match entries.get(&args[0]) {
            None => Ok(Value::Array(Vec::new())),
            Some(Entry {
                data: Data::List(list),
                ..
            }) => {
                let span = range(list.len(), int(&args[1])?, int(&args[2])?);
                Ok(Value::Array(
                    list.iter()
                        .skip(span.start)
                        .take(span.len())
                        .map(|v| bulk(v))
                        .collect(),
                ))
            }
            Some(_) => Err(wrong_type()),
        },

        Command::Hset => {
            let hash = entry_of!(entries, &args[0], Hash, BTreeMap::new());
            let mut added = 0;
            for pair in args[1..].chunks(2) {
                if hash.insert(pair[0].clone(), pair[1].clone()).is_none() {
                    added += 1;
                }
            }
            Ok(Value::Int(added))
        }
        Command::Hgetall => match entries.get(&args[0]) {
            None => Ok(Value::Array(Vec::new())),
            Some(Entry {
                data: Data::Hash(hash),
                ..
            }) => Ok(Value::Array(
                hash.iter()
                    .flat_map(|(field, value)| [bulk(field), bulk(value)])
                    .collect(),
            )),
            Some(_) => Err(wrong_type()),
        },

        Command::Zadd => {
            let zset = entry_of!(entries, &args[0], ZSet, Vec::new());
            let mut added = 0;
            for pair in args[1..].chunks(2) {
                let score = float(&pair[0])?;
                match zset.iter_mut().find(|(member, _)| *member == pair[1]) {
                    Some(existing) => existing.1 = score,
                    None => {
                        zset.push((pair[1].clone(), score));
                        added += 1;
                    }
                }
            }
            zset.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
            Ok(Value::Int(added))
        }
        Command::Zrange => match entries.get(&args[0]) {
            None => Ok(Value::Array(Vec::new())),
            Some(Entry {
                data: Data::ZSet(zset),
                ..
            }) => {
                let span = range(zset.len(), int(&args[1])?, int(&args[2])?);
                let with_scores = args
                    .get(3)
                    .is_some_and(|arg| arg.eq_ignore_ascii_case(b"withscores"));
                let mut reply = Vec::new();
                for (member, score) in &zset[span] {
                    reply.push(bulk(member));
                    if with_scores {
                        reply.push(bulk(score.to_string().as_bytes()));
                    }
                }
                Ok(Value::Array(reply))
            }
            Some(_) => Err(wrong_type()),
        },

        other => Err(RedisError::from((
            ErrorKind::ResponseError,
            "unknown command",
            other.name().to_string(),
        ))),
    }
}

fn pop_back(entries: &mut HashMap<Vec<u8>, Entry>, key: &[u8]) -> RedisResult<Option<Vec<u8>>> {
    let (popped, now_empty) = match entries.get_mut(key) {
        None => return Ok(None),
        Some(Entry {
            data: Data::List(list),
            ..
        }) => {
            let popped = list.pop_back();
            (popped, list.is_empty())
        }
        Some(_) => return Err(wrong_type()),
    };
    if now_empty {
        entries.remove(key);
    }
    Ok(popped)
}

/// Populated client over a fresh cluster.
pub async fn client(partitions: usize, replicas: bool) -> (cluster_shard::ShardedClient, MemoryCluster) {
    let cluster = MemoryCluster::new(partitions);
    let config = cluster.topology(replicas);
    let client = cluster_shard::ShardedClient::connect_with(&config, &cluster)
        .await
        .unwrap();
    (client, cluster)
}

/// First `count` keys with the given prefix that land on `ordinal`.
pub fn keys_on(client: &cluster_shard::ShardedClient, ordinal: u32, prefix: &str, count: usize) -> Vec<String> {
    (0..)
        .map(|i| format!("{}{}", prefix, i))
        .filter(|key| client.locate(key.as_str()).ordinal == ordinal)
        .take(count)
        .collect()
}

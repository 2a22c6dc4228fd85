use redis::{FromRedisValue, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::command::{classify, Command};
use crate::connection::{Connector, RedisConnector};
use crate::dispatch::{Dispatcher, Reply};
use crate::registry::ConnectionRegistry;
use crate::request::{Arg, Request};
use crate::topology::{Location, NodeId, TopologyConfig};
use crate::Error;

/// Handle to a sharded deployment.
///
/// Cloning is cheap; every clone shares the same connections. Safe to use
/// from many tasks at once.
#[derive(Clone)]
pub struct ShardedClient {
    inner: Arc<Dispatcher>,
}

impl ShardedClient {
    /// Connect to every partition in `config` over TCP.
    ///
    /// # Errors
    ///
    /// Returns an error if the topology is invalid or any primary is
    /// unreachable. Unreachable secondaries are logged and skipped.
    pub async fn connect(config: &TopologyConfig) -> Result<Self, Error> {
        Self::connect_with(config, &RedisConnector).await
    }

    /// Connect using a custom [`Connector`].
    pub async fn connect_with(config: &TopologyConfig, connector: &dyn Connector) -> Result<Self, Error> {
        let registry = ConnectionRegistry::connect(config, connector).await?;
        tracing::info!(
            partitions = registry.len(),
            default_partition = ?config.default_partition,
            "Sharded client ready"
        );

        Ok(Self {
            inner: Arc::new(Dispatcher::new(config, registry)),
        })
    }

    pub fn partition_count(&self) -> u32 {
        self.inner.resolver().partition_count()
    }

    /// Partition that owns `key`. Purely local; no network call.
    pub fn locate(&self, key: impl Into<Arg>) -> Location {
        self.inner.locate(&key.into())
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner
    }

    /// Run a command by name, e.g. `dispatch("sunionstore", ["dst", "a", "b"])`.
    ///
    /// Names are lowercase; two-word commands may be written `config get` or
    /// `config_get`.
    ///
    /// # Errors
    ///
    /// Unknown and node-local commands fail with [`Error::Unsupported`]
    /// before anything is sent.
    pub async fn dispatch<I>(&self, name: &str, args: I) -> Result<Reply, Error>
    where
        I: IntoIterator,
        I::Item: Into<Arg>,
    {
        let command = classify(name)?;
        self.execute(Request::new(command).args(args)).await
    }

    pub async fn execute(&self, request: Request) -> Result<Reply, Error> {
        self.inner.dispatch(request).await
    }

    /// Dispatch and decode a keyed command's reply.
    async fn query<RV: FromRedisValue>(&self, request: Request) -> Result<RV, Error> {
        let command = request.command();
        let value = match self.execute(request).await? {
            Reply::Value(value) => value,
            Reply::Nodes(_) => {
                return Err(Error::UnexpectedReply {
                    command: command.name(),
                    source: (redis::ErrorKind::TypeError, "reply is per node").into(),
                })
            }
        };
        decode(command, &value)
    }

    /// Dispatch a fanout command and decode every reply that was produced.
    async fn per_node<RV: FromRedisValue>(&self, request: Request) -> Result<BTreeMap<NodeId, RV>, Error> {
        let command = request.command();
        let nodes = match self.execute(request).await? {
            Reply::Nodes(nodes) => nodes,
            Reply::Value(_) => {
                return Err(Error::UnexpectedReply {
                    command: command.name(),
                    source: (redis::ErrorKind::TypeError, "reply is not per node").into(),
                })
            }
        };

        let mut decoded = BTreeMap::new();
        for (node, reply) in nodes {
            if let Some(value) = reply {
                decoded.insert(node, decode(command, &value)?);
            }
        }
        Ok(decoded)
    }

    pub async fn get<RV: FromRedisValue>(&self, key: impl Into<Arg>) -> Result<RV, Error> {
        self.query(Request::new(Command::Get).arg(key)).await
    }

    pub async fn set(&self, key: impl Into<Arg>, value: impl Into<Arg>) -> Result<(), Error> {
        self.query(Request::new(Command::Set).arg(key).arg(value)).await
    }

    /// Returns the number of keys removed.
    pub async fn del<I>(&self, keys: I) -> Result<i64, Error>
    where
        I: IntoIterator,
        I::Item: Into<Arg>,
    {
        self.query(Request::new(Command::Del).args(keys)).await
    }

    /// Returns how many of `keys` exist.
    pub async fn exists<I>(&self, keys: I) -> Result<i64, Error>
    where
        I: IntoIterator,
        I::Item: Into<Arg>,
    {
        self.query(Request::new(Command::Exists).args(keys)).await
    }

    pub async fn mget<RV, I>(&self, keys: I) -> Result<RV, Error>
    where
        RV: FromRedisValue,
        I: IntoIterator,
        I::Item: Into<Arg>,
    {
        self.query(Request::new(Command::Mget).args(keys)).await
    }

    pub async fn mset<K, V, I>(&self, pairs: I) -> Result<(), Error>
    where
        K: Into<Arg>,
        V: Into<Arg>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.query(pair_request(Command::Mset, pairs)).await
    }

    /// Returns false, writing nothing, if any key already exists.
    pub async fn msetnx<K, V, I>(&self, pairs: I) -> Result<bool, Error>
    where
        K: Into<Arg>,
        V: Into<Arg>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.query(pair_request(Command::Msetnx, pairs)).await
    }

    pub async fn rename(&self, source: impl Into<Arg>, dest: impl Into<Arg>) -> Result<(), Error> {
        self.query(Request::new(Command::Rename).arg(source).arg(dest)).await
    }

    pub async fn renamenx(&self, source: impl Into<Arg>, dest: impl Into<Arg>) -> Result<bool, Error> {
        self.query(Request::new(Command::Renamenx).arg(source).arg(dest)).await
    }

    /// `TYPE key`: "string", "list", "set", "zset", "hash" or "none".
    pub async fn key_type(&self, key: impl Into<Arg>) -> Result<String, Error> {
        self.query(Request::new(Command::Type).arg(key)).await
    }

    pub async fn expire(&self, key: impl Into<Arg>, seconds: i64) -> Result<bool, Error> {
        self.query(Request::new(Command::Expire).arg(key).arg(seconds)).await
    }

    /// Remaining TTL in milliseconds; -1 without expiry, -2 for a missing key.
    pub async fn pttl(&self, key: impl Into<Arg>) -> Result<i64, Error> {
        self.query(Request::new(Command::Pttl).arg(key)).await
    }

    pub async fn sadd<I>(&self, key: impl Into<Arg>, members: I) -> Result<i64, Error>
    where
        I: IntoIterator,
        I::Item: Into<Arg>,
    {
        self.query(Request::new(Command::Sadd).arg(key).args(members)).await
    }

    pub async fn srem<I>(&self, key: impl Into<Arg>, members: I) -> Result<i64, Error>
    where
        I: IntoIterator,
        I::Item: Into<Arg>,
    {
        self.query(Request::new(Command::Srem).arg(key).args(members)).await
    }

    pub async fn smembers<RV: FromRedisValue>(&self, key: impl Into<Arg>) -> Result<RV, Error> {
        self.query(Request::new(Command::Smembers).arg(key)).await
    }

    pub async fn sdiff<RV, I>(&self, keys: I) -> Result<RV, Error>
    where
        RV: FromRedisValue,
        I: IntoIterator,
        I::Item: Into<Arg>,
    {
        self.query(Request::new(Command::Sdiff).args(keys)).await
    }

    pub async fn sinter<RV, I>(&self, keys: I) -> Result<RV, Error>
    where
        RV: FromRedisValue,
        I: IntoIterator,
        I::Item: Into<Arg>,
    {
        self.query(Request::new(Command::Sinter).args(keys)).await
    }

    pub async fn sunion<RV, I>(&self, keys: I) -> Result<RV, Error>
    where
        RV: FromRedisValue,
        I: IntoIterator,
        I::Item: Into<Arg>,
    {
        self.query(Request::new(Command::Sunion).args(keys)).await
    }

    /// Returns the size of the stored set.
    pub async fn sdiffstore<I>(&self, dest: impl Into<Arg>, keys: I) -> Result<i64, Error>
    where
        I: IntoIterator,
        I::Item: Into<Arg>,
    {
        self.query(Request::new(Command::Sdiffstore).arg(dest).args(keys)).await
    }

    pub async fn sinterstore<I>(&self, dest: impl Into<Arg>, keys: I) -> Result<i64, Error>
    where
        I: IntoIterator,
        I::Item: Into<Arg>,
    {
        self.query(Request::new(Command::Sinterstore).arg(dest).args(keys)).await
    }

    pub async fn sunionstore<I>(&self, dest: impl Into<Arg>, keys: I) -> Result<i64, Error>
    where
        I: IntoIterator,
        I::Item: Into<Arg>,
    {
        self.query(Request::new(Command::Sunionstore).arg(dest).args(keys)).await
    }

    /// Returns false if `member` was not in `source`.
    pub async fn smove(
        &self,
        source: impl Into<Arg>,
        dest: impl Into<Arg>,
        member: impl Into<Arg>,
    ) -> Result<bool, Error> {
        self.query(Request::new(Command::Smove).arg(source).arg(dest).arg(member))
            .await
    }

    pub async fn lpush<I>(&self, key: impl Into<Arg>, values: I) -> Result<i64, Error>
    where
        I: IntoIterator,
        I::Item: Into<Arg>,
    {
        self.query(Request::new(Command::Lpush).arg(key).args(values)).await
    }

    pub async fn rpush<I>(&self, key: impl Into<Arg>, values: I) -> Result<i64, Error>
    where
        I: IntoIterator,
        I::Item: Into<Arg>,
    {
        self.query(Request::new(Command::Rpush).arg(key).args(values)).await
    }

    pub async fn lrange<RV: FromRedisValue>(
        &self,
        key: impl Into<Arg>,
        start: i64,
        stop: i64,
    ) -> Result<RV, Error> {
        self.query(Request::new(Command::Lrange).arg(key).arg(start).arg(stop))
            .await
    }

    pub async fn rpoplpush<RV: FromRedisValue>(
        &self,
        source: impl Into<Arg>,
        dest: impl Into<Arg>,
    ) -> Result<RV, Error> {
        self.query(Request::new(Command::Rpoplpush).arg(source).arg(dest))
            .await
    }

    /// A `timeout_secs` of 0 blocks until `source` has an element.
    pub async fn brpoplpush<RV: FromRedisValue>(
        &self,
        source: impl Into<Arg>,
        dest: impl Into<Arg>,
        timeout_secs: u64,
    ) -> Result<RV, Error> {
        self.query(
            Request::new(Command::Brpoplpush)
                .arg(source)
                .arg(dest)
                .arg(timeout_secs),
        )
        .await
    }

    pub async fn hset(
        &self,
        key: impl Into<Arg>,
        field: impl Into<Arg>,
        value: impl Into<Arg>,
    ) -> Result<i64, Error> {
        self.query(Request::new(Command::Hset).arg(key).arg(field).arg(value))
            .await
    }

    pub async fn hgetall<RV: FromRedisValue>(&self, key: impl Into<Arg>) -> Result<RV, Error> {
        self.query(Request::new(Command::Hgetall).arg(key)).await
    }

    /// Matching keys from every partition, as one list.
    pub async fn keys<RV: FromRedisValue>(&self, pattern: &str) -> Result<RV, Error> {
        self.query(Request::new(Command::Keys).arg(pattern)).await
    }

    /// Key count per node that answered. Partitions with a secondary are
    /// counted there; their primaries are absent from the map.
    pub async fn dbsize(&self) -> Result<BTreeMap<NodeId, i64>, Error> {
        self.per_node(Request::new(Command::Dbsize)).await
    }

    pub async fn flushdb(&self) -> Result<(), Error> {
        self.per_node::<Value>(Request::new(Command::Flushdb))
            .await
            .map(|_| ())
    }

    pub async fn flushall(&self) -> Result<(), Error> {
        self.per_node::<Value>(Request::new(Command::Flushall))
            .await
            .map(|_| ())
    }

    pub async fn info(&self, section: Option<&str>) -> Result<BTreeMap<NodeId, String>, Error> {
        self.per_node(Request::new(Command::Info).args(section)).await
    }

    pub async fn ping(&self) -> Result<BTreeMap<NodeId, String>, Error> {
        self.per_node(Request::new(Command::Ping)).await
    }
}

fn pair_request<K, V, I>(command: Command, pairs: I) -> Request
where
    K: Into<Arg>,
    V: Into<Arg>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .fold(Request::new(command), |request, (key, value)| {
            request.arg(key).arg(value)
        })
}

fn decode<RV: FromRedisValue>(command: Command, value: &Value) -> Result<RV, Error> {
    redis::from_redis_value(value).map_err(|source| Error::UnexpectedReply {
        command: command.name(),
        source,
    })
}

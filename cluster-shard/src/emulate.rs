//! Client-side versions of multi-key commands whose keys live on different
//! partitions.
//!
//! None of these are atomic. Each is a fixed sequence of single-key calls
//! issued one after another; if a step fails the error is returned at once
//! and the steps before it stay applied. A concurrent writer may also observe
//! the intermediate states (e.g. a value popped from the source list but not
//! yet pushed to the destination).
//!
//! Reads whose results feed a later write go to the primary so a lagging
//! replica cannot produce a stale copy.

use redis::{FromRedisValue, Value};
use std::collections::{BTreeMap, BTreeSet};

use crate::command::Command;
use crate::dispatch::Dispatcher;
use crate::request::Arg;
use crate::topology::Role;
use crate::Error;

/// Value types rename can rebuild with single-key commands.
#[derive(Debug, Clone, Copy)]
enum KeyKind {
    String,
    Hash,
    List,
    Set,
    SortedSet,
}

impl KeyKind {
    fn parse(type_name: &str) -> Option<Self> {
        match type_name {
            "string" => Some(Self::String),
            "hash" => Some(Self::Hash),
            "list" => Some(Self::List),
            "set" => Some(Self::Set),
            "zset" => Some(Self::SortedSet),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum SetOp {
    Diff,
    Inter,
    Union,
}

impl Dispatcher {
    pub(crate) async fn emulate(&self, command: Command, args: Vec<Arg>) -> Result<Value, Error> {
        let run = Emulation {
            dispatcher: self,
            command,
        };

        match command {
            Command::Mget => run.mget(&args).await,
            Command::Mset => run.mset(&args).await,
            Command::Msetnx => run.msetnx(&args).await,
            Command::Exists => run.per_key_sum(&args, Role::Secondary).await,
            Command::Del | Command::Unlink | Command::Touch => {
                run.per_key_sum(&args, Role::Primary).await
            }
            Command::Sdiff => run.set_algebra(SetOp::Diff, &args, Role::Secondary).await.map(members_reply),
            Command::Sinter => run.set_algebra(SetOp::Inter, &args, Role::Secondary).await.map(members_reply),
            Command::Sunion => run.set_algebra(SetOp::Union, &args, Role::Secondary).await.map(members_reply),
            Command::Sdiffstore => run.set_store(SetOp::Diff, &args).await,
            Command::Sinterstore => run.set_store(SetOp::Inter, &args).await,
            Command::Sunionstore => run.set_store(SetOp::Union, &args).await,
            Command::Rpoplpush => run.rpoplpush(&args).await,
            Command::Brpoplpush => run.brpoplpush(&args).await,
            Command::Smove => run.smove(&args).await,
            Command::Rename => run.rename(args, false).await,
            Command::Renamenx => run.rename(args, true).await,
            _ => Err(Error::unsupported(
                command.name(),
                "keys hash to different partitions; give every key the same {hash tag}",
            )),
        }
    }
}

struct Emulation<'a> {
    dispatcher: &'a Dispatcher,
    command: Command,
}

impl Emulation<'_> {
    /// One single-key step, routed by its first argument.
    async fn call(&self, step: Command, role: Role, args: &[Arg]) -> Result<Value, Error> {
        let ordinal = self.dispatcher.resolver().resolve(args[0].hash_key());
        tracing::debug!(
            command = self.command.name(),
            step = step.name(),
            ordinal,
            "Emulation step"
        );

        self.dispatcher
            .invoke(ordinal, role, step, args)
            .await
            .map_err(|e| Error::Emulation {
                command: self.command.name(),
                step: step.name(),
                source: Box::new(e),
            })
    }

    async fn call_as<T: FromRedisValue>(
        &self,
        step: Command,
        role: Role,
        args: &[Arg],
    ) -> Result<T, Error> {
        let reply = self.call(step, role, args).await?;
        redis::from_redis_value(&reply).map_err(|source| Error::UnexpectedReply {
            command: step.name(),
            source,
        })
    }

    /// Send the requested command, unchanged, to the partition of its first key.
    async fn forward(&self, args: &[Arg]) -> Result<Value, Error> {
        let ordinal = self.dispatcher.resolver().resolve(args[0].hash_key());
        self.dispatcher
            .invoke(ordinal, Role::Primary, self.command, args)
            .await
    }

    async fn exists(&self, key: &Arg, role: Role) -> Result<bool, Error> {
        let count: i64 = self.call_as(Command::Exists, role, &[key.clone()]).await?;
        Ok(count > 0)
    }

    async fn members(&self, key: &Arg, role: Role) -> Result<BTreeSet<Vec<u8>>, Error> {
        self.call_as(Command::Smembers, role, &[key.clone()]).await
    }

    async fn mget(&self, keys: &[Arg]) -> Result<Value, Error> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.call(Command::Get, Role::Secondary, &[key.clone()]).await?);
        }
        Ok(Value::Array(values))
    }

    async fn mset(&self, pairs: &[Arg]) -> Result<Value, Error> {
        for pair in pairs.chunks(2) {
            self.call(Command::Set, Role::Primary, pair).await?;
        }
        Ok(Value::Okay)
    }

    /// Checks every key before writing any. Another client can still create
    /// one of the keys between the check and the writes.
    async fn msetnx(&self, pairs: &[Arg]) -> Result<Value, Error> {
        for key in pairs.iter().step_by(2) {
            if self.exists(key, Role::Primary).await? {
                tracing::debug!(command = self.command.name(), "Key exists, nothing written");
                return Ok(Value::Int(0));
            }
        }
        self.mset(pairs).await?;
        Ok(Value::Int(1))
    }

    async fn per_key_sum(&self, keys: &[Arg], role: Role) -> Result<Value, Error> {
        let mut total = 0i64;
        for key in keys {
            let count: i64 = self.call_as(self.command, role, &[key.clone()]).await?;
            total += count;
        }
        Ok(Value::Int(total))
    }

    async fn set_algebra(
        &self,
        op: SetOp,
        keys: &[Arg],
        role: Role,
    ) -> Result<BTreeSet<Vec<u8>>, Error> {
        let (first, rest) = keys
            .split_first()
            .ok_or_else(|| Error::invalid_arguments(self.command.name(), "no source keys"))?;
        let mut result = self.members(first, role).await?;

        for key in rest {
            if result.is_empty() && !matches!(op, SetOp::Union) {
                break;
            }
            let other = self.members(key, role).await?;
            match op {
                SetOp::Diff => result.retain(|m| !other.contains(m)),
                SetOp::Inter => result.retain(|m| other.contains(m)),
                SetOp::Union => result.extend(other),
            }
        }
        Ok(result)
    }

    /// Replaces `dest` with the computed set and returns its size.
    async fn set_store(&self, op: SetOp, args: &[Arg]) -> Result<Value, Error> {
        let (dest, sources) = args
            .split_first()
            .ok_or_else(|| Error::invalid_arguments(self.command.name(), "no destination key"))?;
        let result = self.set_algebra(op, sources, Role::Primary).await?;

        self.call(Command::Del, Role::Primary, &[dest.clone()]).await?;
        if !result.is_empty() {
            let mut sadd = Vec::with_capacity(result.len() + 1);
            sadd.push(dest.clone());
            sadd.extend(result.iter().cloned().map(Arg::Plain));
            self.call(Command::Sadd, Role::Primary, &sadd).await?;
        }
        Ok(Value::Int(result.len() as i64))
    }

    async fn rpoplpush(&self, args: &[Arg]) -> Result<Value, Error> {
        let (source, dest) = (&args[0], &args[1]);
        let popped: Option<Vec<u8>> = self
            .call_as(Command::Rpop, Role::Primary, &[source.clone()])
            .await?;
        self.push_popped(dest, popped).await
    }

    /// A timeout of 0 blocks until the source has an element.
    async fn brpoplpush(&self, args: &[Arg]) -> Result<Value, Error> {
        let [source, dest, timeout] = args else {
            return Err(Error::invalid_arguments(
                self.command.name(),
                "expected source, destination and timeout",
            ));
        };
        let popped: Option<(Vec<u8>, Vec<u8>)> = self
            .call_as(Command::Brpop, Role::Primary, &[source.clone(), timeout.clone()])
            .await?;
        self.push_popped(dest, popped.map(|(_, value)| value)).await
    }

    async fn push_popped(&self, dest: &Arg, popped: Option<Vec<u8>>) -> Result<Value, Error> {
        let Some(value) = popped else {
            return Ok(Value::Nil);
        };
        self.call(
            Command::Lpush,
            Role::Primary,
            &[dest.clone(), Arg::Plain(value.clone())],
        )
        .await?;
        Ok(Value::BulkString(value))
    }

    async fn smove(&self, args: &[Arg]) -> Result<Value, Error> {
        let [source, dest, member] = args else {
            return Err(Error::invalid_arguments(
                self.command.name(),
                "expected source, destination and member",
            ));
        };

        let dest_type: String = self
            .call_as(Command::Type, Role::Primary, &[dest.clone()])
            .await?;
        if dest_type != "none" && dest_type != "set" {
            return Err(Error::invalid_arguments(
                self.command.name(),
                format!("WRONGTYPE destination holds a {}", dest_type),
            ));
        }

        let removed: i64 = self
            .call_as(Command::Srem, Role::Primary, &[source.clone(), member.clone()])
            .await?;
        if removed == 0 {
            return Ok(Value::Int(0));
        }
        self.call(Command::Sadd, Role::Primary, &[dest.clone(), member.clone()])
            .await?;
        Ok(Value::Int(1))
    }

    /// Copies the source element by element, re-applies its TTL, then
    /// deletes it. Same-name and missing-source renames go to the source's
    /// node unchanged so the backend produces its own reply.
    async fn rename(&self, args: Vec<Arg>, only_if_absent: bool) -> Result<Value, Error> {
        let (source, dest) = (&args[0], &args[1]);
        if source.value() == dest.value() {
            return self.forward(&args).await;
        }
        if !self.exists(source, Role::Primary).await? {
            return self.forward(&args).await;
        }
        if only_if_absent && self.exists(dest, Role::Primary).await? {
            return Ok(Value::Int(0));
        }

        let key_type: String = self
            .call_as(Command::Type, Role::Primary, &[source.clone()])
            .await?;
        let kind = match KeyKind::parse(&key_type) {
            Some(kind) => kind,
            None if key_type == "none" => return self.forward(&args).await,
            None => {
                return Err(Error::unsupported(
                    self.command.name(),
                    "source type cannot be copied element by element",
                ))
            }
        };
        let ttl_ms: i64 = self
            .call_as(Command::Pttl, Role::Primary, &[source.clone()])
            .await?;

        self.call(Command::Del, Role::Primary, &[dest.clone()]).await?;
        match kind {
            KeyKind::String => {
                let value: Vec<u8> = self
                    .call_as(Command::Get, Role::Primary, &[source.clone()])
                    .await?;
                self.call(Command::Set, Role::Primary, &[dest.clone(), Arg::Plain(value)])
                    .await?;
            }
            KeyKind::Hash => {
                let fields: BTreeMap<Vec<u8>, Vec<u8>> = self
                    .call_as(Command::Hgetall, Role::Primary, &[source.clone()])
                    .await?;
                let mut hset = vec![dest.clone()];
                for (field, value) in fields {
                    hset.push(Arg::Plain(field));
                    hset.push(Arg::Plain(value));
                }
                self.call_if_populated(Command::Hset, hset).await?;
            }
            KeyKind::List => {
                let items: Vec<Vec<u8>> = self
                    .call_as(
                        Command::Lrange,
                        Role::Primary,
                        &[source.clone(), Arg::from(0i64), Arg::from(-1i64)],
                    )
                    .await?;
                let mut rpush = vec![dest.clone()];
                rpush.extend(items.into_iter().map(Arg::Plain));
                self.call_if_populated(Command::Rpush, rpush).await?;
            }
            KeyKind::Set => {
                let members = self.members(source, Role::Primary).await?;
                let mut sadd = vec![dest.clone()];
                sadd.extend(members.into_iter().map(Arg::Plain));
                self.call_if_populated(Command::Sadd, sadd).await?;
            }
            KeyKind::SortedSet => {
                // RESP2 flattens WITHSCORES into member, score, member, score...
                let flat: Vec<Vec<u8>> = self
                    .call_as(
                        Command::Zrange,
                        Role::Primary,
                        &[source.clone(), Arg::from(0i64), Arg::from(-1i64), Arg::from("WITHSCORES")],
                    )
                    .await?;
                let mut zadd = vec![dest.clone()];
                for pair in flat.chunks_exact(2) {
                    zadd.push(Arg::Plain(pair[1].clone()));
                    zadd.push(Arg::Plain(pair[0].clone()));
                }
                self.call_if_populated(Command::Zadd, zadd).await?;
            }
        }

        if ttl_ms > 0 {
            self.call(Command::Pexpire, Role::Primary, &[dest.clone(), Arg::from(ttl_ms)])
                .await?;
        }
        self.call(Command::Del, Role::Primary, &[source.clone()]).await?;

        tracing::debug!(
            command = self.command.name(),
            key_type = %key_type,
            ttl_ms,
            "Rename copied across partitions"
        );
        Ok(if only_if_absent {
            Value::Int(1)
        } else {
            Value::Okay
        })
    }

    /// `args` is `[key, elements..]`; skipped when there are no elements.
    async fn call_if_populated(&self, step: Command, args: Vec<Arg>) -> Result<(), Error> {
        if args.len() > 1 {
            self.call(step, Role::Primary, &args).await?;
        }
        Ok(())
    }
}

fn members_reply(members: BTreeSet<Vec<u8>>) -> Value {
    Value::Array(members.into_iter().map(Value::BulkString).collect())
}

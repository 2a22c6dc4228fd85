use redis::Value;
use std::collections::{BTreeMap, HashSet};

use crate::command::{Access, Category, Command, FanoutTarget};
use crate::connection::Invocation;
use crate::registry::{ConnectionRegistry, PartitionHandle};
use crate::request::{Arg, Request};
use crate::resolver::{PartitionOrdinal, Resolver};
use crate::topology::{Location, NodeId, Role, TopologyConfig};
use crate::Error;

/// Result of a dispatched command.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// The backend's reply, unchanged (or the emulated equivalent).
    Value(Value),
    /// One entry per node for administrative fanout. `None` marks a node the
    /// command's policy skipped.
    Nodes(BTreeMap<NodeId, Option<Value>>),
}

impl Reply {
    pub fn into_value(self) -> Option<Value> {
        match self {
            Self::Value(value) => Some(value),
            Self::Nodes(_) => None,
        }
    }

    pub fn into_nodes(self) -> Option<BTreeMap<NodeId, Option<Value>>> {
        match self {
            Self::Nodes(nodes) => Some(nodes),
            Self::Value(_) => None,
        }
    }
}

/// Routes classified commands over an immutable registry.
pub struct Dispatcher {
    resolver: Resolver,
    registry: ConnectionRegistry,
    default_partition: Option<PartitionOrdinal>,
}

impl Dispatcher {
    pub fn new(config: &TopologyConfig, registry: ConnectionRegistry) -> Self {
        Self {
            resolver: Resolver::new(registry.len() as u32),
            default_partition: config
                .default_partition
                .as_deref()
                .and_then(|name| config.ordinal_of(name)),
            registry,
        }
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn locate(&self, key: &Arg) -> Location {
        let partition = self.registry.get(self.resolver.resolve(key.hash_key()));
        Location {
            ordinal: partition.ordinal(),
            partition: partition.name().to_string(),
            primary: partition.primary_endpoint().clone(),
        }
    }

    pub async fn dispatch(&self, request: Request) -> Result<Reply, Error> {
        let (command, args) = request.into_parts();

        match command.category() {
            Category::Read => self.single(command, &args, Role::Secondary).await.map(Reply::Value),
            Category::Write => self.single(command, &args, Role::Primary).await.map(Reply::Value),
            Category::Fanout(target) => self.fanout(command, target, &args).await,
            Category::TagRequired(access) => {
                self.multi_key(command, access, args).await.map(Reply::Value)
            }
            Category::PassThrough => {
                let ordinal = self
                    .default_partition
                    .ok_or(Error::NoDefaultPartition {
                        command: command.name(),
                    })?;
                self.invoke(ordinal, Role::Secondary, command, &args)
                    .await
                    .map(Reply::Value)
            }
        }
    }

    async fn single(&self, command: Command, args: &[Arg], role: Role) -> Result<Value, Error> {
        let positions = command.key_spec().positions(command, args)?;
        let ordinal = self.resolver.resolve(args[positions[0]].hash_key());
        self.invoke(ordinal, role, command, args).await
    }

    async fn multi_key(
        &self,
        command: Command,
        access: Access,
        args: Vec<Arg>,
    ) -> Result<Value, Error> {
        let positions = command.key_spec().positions(command, &args)?;
        let keys: Vec<&Arg> = positions.iter().map(|&i| &args[i]).collect();

        // SORT can read arbitrary keys through BY/GET patterns.
        let single_key = keys.len() == 1 && command != Command::Sort;
        let hash_key = if single_key {
            Some(keys[0].hash_key())
        } else {
            shared_tag(&keys)
        };

        match hash_key {
            Some(hash_key) => {
                let ordinal = self.resolver.resolve(hash_key);
                let role = match access {
                    Access::Read => Role::Secondary,
                    Access::Write => Role::Primary,
                };
                self.invoke(ordinal, role, command, &args).await
            }
            None => {
                tracing::debug!(
                    command = command.name(),
                    keys = keys.len(),
                    "Keys do not share a hash tag, emulating"
                );
                self.emulate(command, args).await
            }
        }
    }

    async fn fanout(
        &self,
        command: Command,
        target: FanoutTarget,
        args: &[Arg],
    ) -> Result<Reply, Error> {
        let mut nodes = BTreeMap::new();
        let mut visited = HashSet::new();

        for partition in self.registry.iter() {
            // Partitions declared on an already visited primary share its
            // connections; they are left out of the reply.
            if !visited.insert(partition.primary_endpoint()) {
                tracing::debug!(
                    command = command.name(),
                    partition = partition.name(),
                    primary = %partition.primary_endpoint(),
                    "Primary already visited, skipping partition"
                );
                continue;
            }

            let has_secondary = partition.has_secondary();
            let on_primary = match target {
                FanoutTarget::Primaries | FanoutTarget::All => true,
                FanoutTarget::Secondaries => !has_secondary,
            };
            let on_secondary = has_secondary && target != FanoutTarget::Primaries;

            let reply = if on_primary {
                Some(self.invoke_on(partition, Role::Primary, command, args).await?)
            } else {
                None
            };
            nodes.insert(partition.node(Role::Primary), reply);

            if has_secondary {
                let reply = if on_secondary {
                    Some(self.invoke_on(partition, Role::Secondary, command, args).await?)
                } else {
                    None
                };
                nodes.insert(partition.node(Role::Secondary), reply);
            }
        }

        if command == Command::Keys {
            let mut keys = Vec::new();
            for reply in nodes.into_values().flatten() {
                let batch: Vec<Value> = redis::from_redis_value(&reply).map_err(|source| {
                    Error::UnexpectedReply {
                        command: command.name(),
                        source,
                    }
                })?;
                keys.extend(batch);
            }
            return Ok(Reply::Value(Value::Array(keys)));
        }

        Ok(Reply::Nodes(nodes))
    }

    /// Run `command` on one partition, bypassing classification.
    pub(crate) async fn invoke(
        &self,
        ordinal: PartitionOrdinal,
        role: Role,
        command: Command,
        args: &[Arg],
    ) -> Result<Value, Error> {
        self.invoke_on(self.registry.get(ordinal), role, command, args)
            .await
    }

    async fn invoke_on(
        &self,
        partition: &PartitionHandle,
        role: Role,
        command: Command,
        args: &[Arg],
    ) -> Result<Value, Error> {
        let (conn, role) = partition.connection(role);
        tracing::debug!(
            command = command.name(),
            partition = partition.name(),
            %role,
            "Routing command"
        );

        conn.execute(&Invocation::new(command, args))
            .await
            .map_err(|source| Error::Backend {
                command: command.name(),
                node: partition.node(role),
                source,
            })
    }
}

/// The tag every key carries, if they all carry the same one.
fn shared_tag<'a>(keys: &[&'a Arg]) -> Option<&'a [u8]> {
    let (first, rest) = keys.split_first()?;
    let tag = first.tag()?;
    rest.iter().all(|key| key.tag() == Some(tag)).then_some(tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_tag_requires_every_key() {
        let a = Arg::from("a{x}");
        let b = Arg::from("{x}b");
        let c = Arg::tagged("x", "c");
        let d = Arg::from("d");
        let e = Arg::from("e{y}");

        assert_eq!(shared_tag(&[&a, &b, &c]), Some(&b"x"[..]));
        assert_eq!(shared_tag(&[&a, &d]), None);
        assert_eq!(shared_tag(&[&d, &a]), None);
        assert_eq!(shared_tag(&[&a, &e]), None);
        assert_eq!(shared_tag(&[]), None);
    }
}

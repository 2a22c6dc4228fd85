use redis::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::command::Command;
use crate::connection::{Connection, Connector, Invocation};
use crate::resolver::PartitionOrdinal;
use crate::topology::{Endpoint, NodeId, PartitionConfig, Role, TopologyConfig};
use crate::Error;

/// Live connections for one partition.
pub struct PartitionHandle {
    ordinal: PartitionOrdinal,
    name: String,
    primary_endpoint: Endpoint,
    primary: Arc<dyn Connection>,
    /// `None` when no secondary is configured or it was unreachable.
    secondary: Option<Arc<dyn Connection>>,
}

impl PartitionHandle {
    pub fn ordinal(&self) -> PartitionOrdinal {
        self.ordinal
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn primary_endpoint(&self) -> &Endpoint {
        &self.primary_endpoint
    }

    pub fn has_secondary(&self) -> bool {
        self.secondary.is_some()
    }

    pub fn node(&self, role: Role) -> NodeId {
        NodeId::new(self.ordinal, self.name.clone(), role)
    }

    /// Connection for `role` and the role it actually serves. A missing
    /// secondary falls back to the primary.
    pub fn connection(&self, role: Role) -> (&Arc<dyn Connection>, Role) {
        match (role, &self.secondary) {
            (Role::Secondary, Some(secondary)) => (secondary, Role::Secondary),
            _ => (&self.primary, Role::Primary),
        }
    }
}

/// One handle per declared partition, indexed by ordinal.
pub struct ConnectionRegistry {
    partitions: Vec<PartitionHandle>,
}

impl ConnectionRegistry {
    /// Connect every partition in declaration order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connect`] if any primary is unreachable, and
    /// [`Error::Config`] if a primary asked to discover its replica is not a
    /// master. Secondaries never fail construction.
    pub async fn connect(config: &TopologyConfig, connector: &dyn Connector) -> Result<Self, Error> {
        config.validate()?;

        // Partitions declared with the same primary share its connections.
        let mut by_primary: HashMap<Endpoint, (Arc<dyn Connection>, Option<Arc<dyn Connection>>)> =
            HashMap::new();
        let mut partitions = Vec::with_capacity(config.partitions.len());

        for (index, partition) in config.partitions.iter().enumerate() {
            let ordinal = index as PartitionOrdinal + 1;

            let (primary, secondary) = match by_primary.get(&partition.primary) {
                Some((primary, secondary)) => (primary.clone(), secondary.clone()),
                None => {
                    let primary = Self::connect_primary(config, partition, connector).await?;
                    let secondary =
                        Self::connect_secondary(config, partition, &primary, connector).await?;
                    by_primary.insert(
                        partition.primary.clone(),
                        (primary.clone(), secondary.clone()),
                    );
                    (primary, secondary)
                }
            };

            tracing::info!(
                ordinal,
                partition = %partition.name,
                primary = %partition.primary,
                read_replica = secondary.is_some(),
                "Partition connected"
            );

            partitions.push(PartitionHandle {
                ordinal,
                name: partition.name.clone(),
                primary_endpoint: partition.primary.clone(),
                primary,
                secondary,
            });
        }

        Ok(Self { partitions })
    }

    async fn connect_primary(
        config: &TopologyConfig,
        partition: &PartitionConfig,
        connector: &dyn Connector,
    ) -> Result<Arc<dyn Connection>, Error> {
        connector
            .connect(&partition.primary, config.db)
            .await
            .map_err(|source| Error::Connect {
                partition: partition.name.clone(),
                endpoint: partition.primary.to_string(),
                source,
            })
    }

    async fn connect_secondary(
        config: &TopologyConfig,
        partition: &PartitionConfig,
        primary: &Arc<dyn Connection>,
        connector: &dyn Connector,
    ) -> Result<Option<Arc<dyn Connection>>, Error> {
        if config.primaries_only {
            return Ok(None);
        }

        let endpoint = if partition.discover_secondary {
            Self::discover_secondary(partition, primary).await?
        } else {
            partition.secondary.clone()
        };
        let Some(endpoint) = endpoint else {
            return Ok(None);
        };

        match connector.connect(&endpoint, config.db).await {
            Ok(conn) => Ok(Some(conn)),
            Err(e) => {
                tracing::warn!(
                    partition = %partition.name,
                    secondary = %endpoint,
                    error = %e,
                    "Secondary unreachable, reads fall back to primary"
                );
                Ok(None)
            }
        }
    }

    async fn discover_secondary(
        partition: &PartitionConfig,
        primary: &Arc<dyn Connection>,
    ) -> Result<Option<Endpoint>, Error> {
        let invocation = Invocation {
            command: Command::Info,
            args: vec![b"replication".to_vec()],
        };
        let reply = primary
            .execute(&invocation)
            .await
            .map_err(|source| Error::Connect {
                partition: partition.name.clone(),
                endpoint: partition.primary.to_string(),
                source,
            })?;
        let text: String = redis::from_redis_value(&reply).map_err(|source| {
            Error::UnexpectedReply {
                command: Command::Info.name(),
                source,
            }
        })?;

        let info = ReplicationInfo::parse(&text);
        if info.role.as_deref() != Some("master") {
            return Err(Error::Config(format!(
                "partition {} primary {} is not a master (role: {})",
                partition.name,
                partition.primary,
                info.role.as_deref().unwrap_or("unknown")
            )));
        }

        let discovered = info.replica.map(|(host, port)| Endpoint {
            host,
            port,
            password: partition.primary.password.clone(),
        });
        tracing::debug!(
            partition = %partition.name,
            secondary = ?discovered.as_ref().map(ToString::to_string),
            "Replica discovery finished"
        );
        Ok(discovered)
    }

    pub fn get(&self, ordinal: PartitionOrdinal) -> &PartitionHandle {
        &self.partitions[(ordinal - 1) as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = &PartitionHandle> {
        self.partitions.iter()
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }
}

/// The parts of `INFO replication` used for replica discovery.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ReplicationInfo {
    pub role: Option<String>,
    /// First replica reported online.
    pub replica: Option<(String, u16)>,
}

impl ReplicationInfo {
    /// Accepts both `slave0:ip=h,port=p,state=online,...` and the older
    /// `slave0:h,p,online` layouts.
    pub fn parse(text: &str) -> Self {
        let mut info = Self::default();

        for line in text.lines().map(str::trim) {
            let Some((field, value)) = line.split_once(':') else {
                continue;
            };
            if field == "role" {
                info.role = Some(value.to_string());
            } else if field.starts_with("slave") && info.replica.is_none() {
                info.replica = parse_replica(value);
            }
        }
        info
    }
}

fn parse_replica(value: &str) -> Option<(String, u16)> {
    let (host, port, state) = if value.contains('=') {
        let mut host = None;
        let mut port = None;
        let mut state = None;
        for pair in value.split(',') {
            match pair.split_once('=') {
                Some(("ip", v)) => host = Some(v),
                Some(("port", v)) => port = Some(v),
                Some(("state", v)) => state = Some(v),
                _ => {}
            }
        }
        (host?, port?, state?)
    } else {
        let mut parts = value.split(',');
        (parts.next()?, parts.next()?, parts.next()?)
    };

    if state != "online" {
        return None;
    }
    Some((host.to_string(), port.parse().ok()?))
}

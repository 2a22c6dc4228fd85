//! Static cluster topology.
//!
//! The topology is read once at startup and never changes: partition ordinals
//! are the 1-based positions in the `partitions` list.
//!
//! ```json
//! {
//!   "partitions": [
//!     { "name": "node_1", "primary": { "host": "10.0.0.1", "port": 6379 },
//!       "secondary": { "host": "10.0.0.2", "port": 6379 } },
//!     { "name": "node_2", "primary": { "host": "10.0.0.3", "port": 6379 },
//!       "discover_secondary": true }
//!   ],
//!   "default_partition": "node_1",
//!   "db": 0
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use crate::resolver::PartitionOrdinal;
use crate::Error;

/// Environment variable holding the path of the topology JSON document.
pub const TOPOLOGY_ENV: &str = "SHARD_TOPOLOGY";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            password: None,
        }
    }

    /// `redis://` URL for this endpoint and database index.
    pub fn url(&self, db: i64) -> String {
        match &self.password {
            Some(password) => format!("redis://:{}@{}:{}/{}", password, self.host, self.port, db),
            None => format!("redis://{}:{}/{}", self.host, self.port, db),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionConfig {
    pub name: String,
    pub primary: Endpoint,
    /// Explicit read replica for this partition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<Endpoint>,
    /// Ask the primary for its first online replica (`INFO replication`).
    #[serde(default)]
    pub discover_secondary: bool,
}

impl PartitionConfig {
    pub fn new(name: impl Into<String>, primary: Endpoint) -> Self {
        Self {
            name: name.into(),
            primary,
            secondary: None,
            discover_secondary: false,
        }
    }

    pub fn with_secondary(mut self, secondary: Endpoint) -> Self {
        self.secondary = Some(secondary);
        self
    }

    pub fn discover_secondary(mut self) -> Self {
        self.discover_secondary = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyConfig {
    pub partitions: Vec<PartitionConfig>,
    /// Partition that serves commands without a key (`echo`, `randomkey`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_partition: Option<String>,
    #[serde(default)]
    pub db: i64,
    /// Never connect secondaries; every read goes to the primary.
    #[serde(default)]
    pub primaries_only: bool,
}

impl TopologyConfig {
    pub fn new(partitions: Vec<PartitionConfig>) -> Self {
        Self {
            partitions,
            default_partition: None,
            db: 0,
            primaries_only: false,
        }
    }

    pub fn with_default_partition(mut self, name: impl Into<String>) -> Self {
        self.default_partition = Some(name.into());
        self
    }

    pub fn from_json(json: &str) -> Result<Self, Error> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Load the document named by `SHARD_TOPOLOGY`.
    pub fn from_env() -> Result<Self, Error> {
        let path = std::env::var(TOPOLOGY_ENV)
            .map_err(|_| Error::Config(format!("{} must be set", TOPOLOGY_ENV)))?;
        Self::from_file(path)
    }

    /// # Errors
    ///
    /// Returns [`Error::Config`] for an empty partition list, duplicate names,
    /// an unknown default partition, or a partition that both names a
    /// secondary and asks for discovery.
    pub fn validate(&self) -> Result<(), Error> {
        if self.partitions.is_empty() {
            return Err(Error::Config("at least one partition is required".into()));
        }
        if u32::try_from(self.partitions.len()).is_err() {
            return Err(Error::Config("too many partitions".into()));
        }

        let mut names = HashSet::new();
        for partition in &self.partitions {
            if partition.name.is_empty() {
                return Err(Error::Config("partition names must not be empty".into()));
            }
            if !names.insert(partition.name.as_str()) {
                return Err(Error::Config(format!(
                    "duplicate partition name {}",
                    partition.name
                )));
            }
            if partition.secondary.is_some() && partition.discover_secondary {
                return Err(Error::Config(format!(
                    "partition {} sets both secondary and discover_secondary",
                    partition.name
                )));
            }
        }

        if let Some(default) = &self.default_partition {
            if !names.contains(default.as_str()) {
                return Err(Error::Config(format!(
                    "default partition {} is not declared",
                    default
                )));
            }
        }
        Ok(())
    }

    /// Ordinal of the named partition.
    pub fn ordinal_of(&self, name: &str) -> Option<PartitionOrdinal> {
        self.partitions
            .iter()
            .position(|p| p.name == name)
            .map(|i| i as PartitionOrdinal + 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Role {
    Primary,
    Secondary,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One backend node: a partition and the role it plays for that partition.
///
/// Orders by ordinal, then primary before secondary.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId {
    pub ordinal: PartitionOrdinal,
    pub partition: String,
    pub role: Role,
}

impl NodeId {
    pub fn new(ordinal: PartitionOrdinal, partition: impl Into<String>, role: Role) -> Self {
        Self {
            ordinal,
            partition: partition.into(),
            role,
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.role {
            Role::Primary => write!(f, "{}", self.partition),
            Role::Secondary => write!(f, "{}_secondary", self.partition),
        }
    }
}

/// Where a key lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub ordinal: PartitionOrdinal,
    pub partition: String,
    pub primary: Endpoint,
}

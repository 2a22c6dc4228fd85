//! Client-side sharding over independent Redis nodes.
//!
//! This crate provides:
//! - Deterministic key placement: CRC-32 of the key (or its `{hash tag}`)
//!   modulo the partition count
//! - A closed command table that classifies every operation before any
//!   network call
//! - Read scaling: reads go to a partition's secondary when one is connected
//! - Non-atomic client-side versions of multi-key commands whose keys land on
//!   different partitions
//! - Administrative fanout with one reply per node
//!
//! The topology is fixed at construction. Adding or removing a partition
//! changes the placement of most keys; there is no rebalancing.
//!
//! # Example
//!
//! ```rust,ignore
//! use cluster_shard::{ShardedClient, TopologyConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TopologyConfig::from_env()?;
//!     let client = ShardedClient::connect(&config).await?;
//!
//!     client.set("user{42}:name", "alice").await?;
//!     client.set("user{42}:email", "alice@example.com").await?;
//!
//!     // Same tag, same partition: forwarded as a single MGET
//!     let values: Vec<Option<String>> =
//!         client.mget(["user{42}:name", "user{42}:email"]).await?;
//!
//!     // Different partitions: emulated with one call per key
//!     client.sunionstore("all", ["set:a", "set:b"]).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Failure Modes
//!
//! - **Primary unreachable at startup**: construction fails
//! - **Secondary unreachable at startup**: logged, reads use the primary
//! - **Fanout**: the first failing node aborts the whole command
//! - **Emulation**: a failing step aborts; earlier steps stay applied

mod client;
mod command;
mod connection;
mod dispatch;
mod emulate;
mod error;
mod registry;
mod request;
mod resolver;
mod topology;

pub use client::ShardedClient;
pub use command::{classify, Access, Category, Command, FanoutTarget, KeySpec};
pub use connection::{Connection, Connector, Invocation, RedisConnection, RedisConnector};
pub use dispatch::{Dispatcher, Reply};
pub use error::{Error, Result};
pub use registry::{ConnectionRegistry, PartitionHandle};
pub use request::{Arg, Request};
pub use resolver::{hash_key, hash_tag, PartitionOrdinal, Resolver};
pub use topology::{
    Endpoint, Location, NodeId, PartitionConfig, Role, TopologyConfig, TOPOLOGY_ENV,
};

pub use redis::Value;

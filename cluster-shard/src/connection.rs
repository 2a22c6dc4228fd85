//! The single-node client the router sits on top of.
//!
//! [`Connector`] and [`Connection`] are the only seams between routing and
//! the wire. Production code uses [`RedisConnector`], which hands out
//! multiplexed async connections that are safe to share between tasks.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{RedisResult, Value};
use std::sync::Arc;

use crate::command::Command;
use crate::request::Arg;
use crate::topology::Endpoint;

/// A routed command exactly as one node will receive it.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub command: Command,
    pub args: Vec<Vec<u8>>,
}

impl Invocation {
    pub fn new(command: Command, args: &[Arg]) -> Self {
        Self {
            command,
            args: args.iter().map(|arg| arg.value().to_vec()).collect(),
        }
    }

    pub fn to_cmd(&self) -> redis::Cmd {
        let (name, sub) = self.command.wire();
        let mut cmd = redis::cmd(name);
        if let Some(sub) = sub {
            cmd.arg(sub);
        }
        for arg in &self.args {
            cmd.arg(arg.as_slice());
        }
        cmd
    }
}

#[async_trait]
pub trait Connection: Send + Sync {
    async fn execute(&self, invocation: &Invocation) -> RedisResult<Value>;
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint, db: i64) -> RedisResult<Arc<dyn Connection>>;
}

/// Opens one multiplexed connection per endpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct RedisConnector;

#[async_trait]
impl Connector for RedisConnector {
    async fn connect(&self, endpoint: &Endpoint, db: i64) -> RedisResult<Arc<dyn Connection>> {
        let client = redis::Client::open(endpoint.url(db))?;
        let conn = client.get_multiplexed_async_connection().await?;

        tracing::debug!(%endpoint, db, "Opened Redis connection");
        Ok(Arc::new(RedisConnection { conn }))
    }
}

pub struct RedisConnection {
    conn: MultiplexedConnection,
}

impl RedisConnection {
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl Connection for RedisConnection {
    async fn execute(&self, invocation: &Invocation) -> RedisResult<Value> {
        // Clones share the underlying socket.
        let mut conn = self.conn.clone();
        let reply: Value = invocation.to_cmd().query_async(&mut conn).await?;
        Ok(reply)
    }
}

use thiserror::Error;

use crate::topology::NodeId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration error: {0}")]
    ConfigJson(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigIo(#[from] std::io::Error),

    /// A primary endpoint could not be reached while building the registry.
    #[error("Connection error: cannot connect to partition {partition} at {endpoint}: {source}")]
    Connect {
        partition: String,
        endpoint: String,
        #[source]
        source: redis::RedisError,
    },

    #[error("Command {command} not supported in sharded mode: {reason}")]
    Unsupported {
        command: String,
        reason: &'static str,
    },

    #[error("Invalid arguments for {command}: {reason}")]
    InvalidArguments {
        command: &'static str,
        reason: String,
    },

    #[error("Command {command} has no key and no default partition is configured")]
    NoDefaultPartition { command: &'static str },

    #[error("{command} failed on {node}: {source}")]
    Backend {
        command: &'static str,
        node: NodeId,
        #[source]
        source: redis::RedisError,
    },

    #[error("Unexpected reply to {command}: {source}")]
    UnexpectedReply {
        command: &'static str,
        #[source]
        source: redis::RedisError,
    },

    /// A step of a client-side multi-key emulation failed. Steps that already
    /// ran are left in place.
    #[error(
        "Emulated {command} is not atomic: step `{step}` failed and earlier steps were not rolled back: {source}"
    )]
    Emulation {
        command: &'static str,
        step: &'static str,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub(crate) fn unsupported(command: impl Into<String>, reason: &'static str) -> Self {
        Self::Unsupported {
            command: command.into(),
            reason,
        }
    }

    pub(crate) fn invalid_arguments(command: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            command,
            reason: reason.into(),
        }
    }

    /// Returns true if this error was raised before any backend call.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

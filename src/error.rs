//! Error types for the publish/subscribe client

use crate::config::ConfigError;
use crate::transport::TransportError;
use std::fmt;
use thiserror::Error;

/// Which configured topic an operation needed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicRole {
    Producer,
    Consumer,
}

impl fmt::Display for TopicRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopicRole::Producer => write!(f, "producer"),
            TopicRole::Consumer => write!(f, "consumer"),
        }
    }
}

/// Main error type for client controller operations
#[derive(Debug, Error)]
pub enum ClientError {
    /// Failure reported by the session, passed through unmodified
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("No {0} topic configured")]
    TopicNotConfigured(TopicRole),
}

impl ClientError {
    /// Borrow the transport failure, if this is one
    pub fn as_transport(&self) -> Option<&TransportError> {
        match self {
            ClientError::Transport(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type alias for client operations
pub type ClientResult<T> = Result<T, ClientError>;

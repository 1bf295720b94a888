//! Client error types.

use crate::config::ConfigError;
use thiserror::Error;
use tsquery_protocol::QueryError;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not connected")]
    NotConnected,

    #[error("already connected")]
    AlreadyConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("request timeout")]
    Timeout,

    #[error("query error {}: {}", .0.id, .0)]
    Query(QueryError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl ClientError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Timeout | ClientError::ConnectionClosed | ClientError::Transport(_)
        )
    }

    /// Returns the server error row, if this is a query error.
    pub fn query_error(&self) -> Option<&QueryError> {
        match self {
            ClientError::Query(err) => Some(err),
            _ => None,
        }
    }
}

impl From<QueryError> for ClientError {
    fn from(err: QueryError) -> Self {
        ClientError::Query(err)
    }
}

//! Node agent errors

use crate::models::{ErrorKind, ErrorResponse};
use thiserror::Error;

/// Errors returned by node agent calls, local or remote
#[derive(Debug, Error)]
pub enum NodeAgentError {
    /// HTTP request/response error (connect failure, timeout, ...)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No capacity to satisfy the request (e.g. no managed ENI under its limit)
    #[error("[{request_id}] resource unavailable: {message}")]
    ResourceUnavailable { request_id: String, message: String },

    /// The agent rejected the request
    #[error("[{request_id}] invalid request: {message}")]
    InvalidRequest { request_id: String, message: String },

    /// The agent failed while handling the request
    #[error("[{request_id}] {message}")]
    Agent { request_id: String, message: String },

    /// The agent is up but has not finished its first capacity pass
    #[error("node agent at {0} is not serving")]
    NotServing(String),
}

impl NodeAgentError {
    /// Wire classification of the error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            NodeAgentError::ResourceUnavailable { .. } | NodeAgentError::NotServing(_) => ErrorKind::ResourceUnavailable,
            NodeAgentError::InvalidRequest { .. } | NodeAgentError::Serialization(_) => ErrorKind::InvalidRequest,
            NodeAgentError::Http(_) | NodeAgentError::Agent { .. } => ErrorKind::Internal,
        }
    }

    /// Rebuild the error a remote agent reported
    #[must_use]
    pub fn from_response(response: ErrorResponse) -> Self {
        let ErrorResponse { request_id, message, kind } = response;
        match kind {
            ErrorKind::ResourceUnavailable => NodeAgentError::ResourceUnavailable { request_id, message },
            ErrorKind::InvalidRequest => NodeAgentError::InvalidRequest { request_id, message },
            ErrorKind::Internal => NodeAgentError::Agent { request_id, message },
        }
    }

    /// Whether retrying later may succeed without operator action
    #[must_use]
    pub fn is_resource_unavailable(&self) -> bool {
        matches!(self.kind(), ErrorKind::ResourceUnavailable)
    }
}

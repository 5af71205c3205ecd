//! ENI gateway client errors

use thiserror::Error;

/// Errors that can occur when talking to the cloud ENI gateway
#[derive(Debug, Error)]
pub enum EniGatewayError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Gateway returned an error (throttling, attach in progress, ...)
    #[error("ENI gateway error: {0}")]
    Api(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// ENI or address not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request (e.g., instance-scoped call without an instance id)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// ENI did not reach the attached state in time
    #[error("Timed out: {0}")]
    Timeout(String),
}

impl EniGatewayError {
    /// Whether the error means the target resource is already gone
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, EniGatewayError::NotFound(_))
    }
}

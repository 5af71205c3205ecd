//! Agent-specific error types.
//!
//! Library errors (gateway, router) are wrapped as-is; capacity and
//! configuration problems get their own variants so the RPC layer can
//! classify them.

use eni_gateway_client::EniGatewayError;
use node_agent_client::NodeAgentError;
use policy_router::RouterError;
use thiserror::Error;

/// Errors that can occur in the node agent.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Cloud ENI gateway error
    #[error("ENI gateway error: {0}")]
    Gateway(#[from] EniGatewayError),

    /// Host routing error
    #[error("Policy routing error: {0}")]
    Router(#[from] RouterError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// No capacity left to satisfy the request
    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// Listener or other I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// Convert into the wire error for `request_id`
    #[must_use]
    pub fn into_rpc(self, request_id: &str) -> NodeAgentError {
        let request_id = request_id.to_string();
        let message = self.to_string();
        match self {
            AgentError::ResourceUnavailable(_) => NodeAgentError::ResourceUnavailable { request_id, message },
            AgentError::Router(RouterError::PrimaryEni(_) | RouterError::InvalidSubnet(_)) => {
                NodeAgentError::InvalidRequest { request_id, message }
            }
            _ => NodeAgentError::Agent { request_id, message },
        }
    }
}

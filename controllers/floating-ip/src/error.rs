//! Controller-specific error types.
//!
//! Upstream library errors are wrapped as-is; annotation integrity,
//! capacity and registry problems get their own variants.

use eni_gateway_client::EniGatewayError;
use kube::Error as KubeError;
use node_agent_client::NodeAgentError;
use thiserror::Error;

/// Errors that can occur in the floating-IP controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Cloud ENI gateway error
    #[error("ENI gateway error: {0}")]
    Gateway(#[from] EniGatewayError),

    /// Node agent error
    #[error("Node agent error: {0}")]
    Agent(#[from] NodeAgentError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// No node or ENI has room for the floating IP
    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// Service annotations contradict each other or are malformed
    #[error("Inconsistent service state: {0}")]
    InconsistentState(String),

    /// Node is not in the registry
    #[error("Node not registered: {0}")]
    NodeNotFound(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

impl ControllerError {
    /// Capacity exhaustion, locally or reported by an agent
    pub fn is_resource_unavailable(&self) -> bool {
        match self {
            ControllerError::ResourceUnavailable(_) => true,
            ControllerError::Agent(e) => e.is_resource_unavailable(),
            _ => false,
        }
    }
}

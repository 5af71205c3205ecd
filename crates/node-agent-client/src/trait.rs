//! NodeAgent trait for mocking
//!
//! The node agent process implements this trait directly; the controller
//! reaches remote agents through `NodeAgentClient`, which implements it
//! over HTTP.

use crate::error::NodeAgentError;
use crate::models::{NodeResource, ServingStatus};
use eni_gateway_client::EniMetadata;
use std::collections::HashMap;
use std::net::Ipv4Addr;

/// Per-node operations the ownership controller drives
#[async_trait::async_trait]
pub trait NodeAgentTrait: Send + Sync {
    /// Where the agent is reachable (for logging)
    fn endpoint(&self) -> &str;

    /// Managed ENI with the most addresses that is still under the per-ENI limit
    async fn choose_busiest_eni(&self, request_id: &str) -> Result<EniMetadata, NodeAgentError>;

    /// Managed ENIs attached to the node, keyed by ENI id
    async fn get_managed_enis(&self, request_id: &str) -> Result<HashMap<String, EniMetadata>, NodeAgentError>;

    /// Capacity snapshot of the node
    async fn describe_node_resource(&self, request_id: &str) -> Result<NodeResource, NodeAgentError>;

    /// Route `private_ip` through `eni` on the node
    async fn setup_network_for_service(
        &self,
        request_id: &str,
        private_ip: Ipv4Addr,
        eni: &EniMetadata,
    ) -> Result<(), NodeAgentError>;

    /// Undo `setup_network_for_service`; succeeds when nothing was set up
    async fn clean_network_for_service(
        &self,
        request_id: &str,
        private_ip: Ipv4Addr,
        eni: &EniMetadata,
    ) -> Result<(), NodeAgentError>;

    async fn health(&self) -> Result<ServingStatus, NodeAgentError>;
}

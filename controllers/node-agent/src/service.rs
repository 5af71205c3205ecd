//! Agent service
//!
//! Implements `NodeAgentTrait` on top of the local ENI manager and policy
//! router. The HTTP server exposes it to the controller.

use crate::eni_manager::EniManager;
use crate::error::AgentError;
use eni_gateway_client::EniMetadata;
use node_agent_client::{NodeAgentError, NodeAgentTrait, NodeResource, ServingStatus};
use policy_router::PolicyRouter;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{info, warn};

/// Node-local implementation of the agent operations
#[derive(Debug, Clone)]
pub struct AgentService {
    endpoint: String,
    manager: Arc<EniManager>,
    router: Arc<PolicyRouter>,
}

impl AgentService {
    pub fn new(endpoint: String, manager: Arc<EniManager>, router: Arc<PolicyRouter>) -> Self {
        Self { endpoint, manager, router }
    }
}

#[async_trait::async_trait]
impl NodeAgentTrait for AgentService {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn choose_busiest_eni(&self, request_id: &str) -> Result<EniMetadata, NodeAgentError> {
        let eni = self.manager.choose_busiest_eni().await.map_err(|e| {
            warn!(request_id, error = %e, "Failed to choose busiest ENI");
            e.into_rpc(request_id)
        })?;
        info!(request_id, eni_id = %eni.eni_id, "Chose busiest ENI");
        Ok(eni)
    }

    async fn get_managed_enis(&self, request_id: &str) -> Result<HashMap<String, EniMetadata>, NodeAgentError> {
        let managed = self
            .manager
            .get_managed_enis()
            .await
            .map_err(|e| e.into_rpc(request_id))?;
        Ok(managed.into_iter().map(|eni| (eni.eni_id.clone(), eni)).collect())
    }

    async fn describe_node_resource(&self, request_id: &str) -> Result<NodeResource, NodeAgentError> {
        self.manager
            .describe_node_resource()
            .await
            .map_err(|e| e.into_rpc(request_id))
    }

    async fn setup_network_for_service(
        &self,
        request_id: &str,
        private_ip: Ipv4Addr,
        eni: &EniMetadata,
    ) -> Result<(), NodeAgentError> {
        info!(request_id, %private_ip, eni_id = %eni.eni_id, "Setting up network for service");
        self.router
            .setup_network_for_service(private_ip, eni)
            .await
            .map_err(|e| AgentError::from(e).into_rpc(request_id))
    }

    async fn clean_network_for_service(
        &self,
        request_id: &str,
        private_ip: Ipv4Addr,
        eni: &EniMetadata,
    ) -> Result<(), NodeAgentError> {
        info!(request_id, %private_ip, eni_id = %eni.eni_id, "Cleaning network for service");
        self.router
            .clean_network_for_service(private_ip, eni)
            .await
            .map_err(|e| AgentError::from(e).into_rpc(request_id))
    }

    async fn health(&self) -> Result<ServingStatus, NodeAgentError> {
        Ok(if self.manager.is_ready() {
            ServingStatus::Serving
        } else {
            ServingStatus::NotServing
        })
    }
}

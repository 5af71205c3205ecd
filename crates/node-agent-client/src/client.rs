//! Node agent HTTP client

use crate::agent_trait::NodeAgentTrait;
use crate::error::NodeAgentError;
use crate::models::*;
use crate::paths;
use eni_gateway_client::EniMetadata;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::debug;

/// Connect and per-call timeouts for agent calls
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub connect: Duration,
    pub request: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            request: Duration::from_secs(30),
        }
    }
}

/// Client for one node's agent
#[derive(Debug, Clone)]
pub struct NodeAgentClient {
    client: Client,
    base_url: String,
}

impl NodeAgentClient {
    /// Create a client without contacting the agent
    ///
    /// # Arguments
    /// * `base_url` - Agent base URL (e.g., "http://10.0.1.5:19200")
    pub fn new(base_url: impl Into<String>, timeouts: Timeouts) -> Result<Self, NodeAgentError> {
        let client = Client::builder()
            .connect_timeout(timeouts.connect)
            .timeout(timeouts.request)
            .build()?;

        let base_url: String = base_url.into();
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Base URL of the agent listening on `node_ip:port`
    #[must_use]
    pub fn node_url(node_ip: Ipv4Addr, port: u16) -> String {
        format!("http://{node_ip}:{port}")
    }

    /// Create a client and require the agent to report `SERVING`
    pub async fn connect(base_url: impl Into<String>, timeouts: Timeouts) -> Result<Self, NodeAgentError> {
        let client = Self::new(base_url, timeouts)?;
        match client.health().await? {
            ServingStatus::Serving => Ok(client),
            ServingStatus::NotServing => Err(NodeAgentError::NotServing(client.base_url.clone())),
        }
    }

    async fn call<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        request_id: &str,
        body: &B,
    ) -> Result<T, NodeAgentError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(request_id, "POST {}", url);

        let response = self.client.post(&url).json(body).send().await?;
        let status = response.status();
        let text = response.text().await?;
        if status.is_success() {
            return Ok(serde_json::from_str(&text)?);
        }
        match serde_json::from_str::<ErrorResponse>(&text) {
            Ok(error) => Err(NodeAgentError::from_response(error)),
            Err(_) => Err(NodeAgentError::Agent {
                request_id: request_id.to_string(),
                message: format!("{url} returned {status} - {}", text.chars().take(500).collect::<String>()),
            }),
        }
    }
}

#[async_trait::async_trait]
impl NodeAgentTrait for NodeAgentClient {
    fn endpoint(&self) -> &str {
        &self.base_url
    }

    async fn choose_busiest_eni(&self, request_id: &str) -> Result<EniMetadata, NodeAgentError> {
        let request = AgentRequest { request_id: request_id.to_string() };
        let response: BusiestEniResponse = self.call(paths::BUSIEST_ENI, request_id, &request).await?;
        Ok(response.eni)
    }

    async fn get_managed_enis(&self, request_id: &str) -> Result<HashMap<String, EniMetadata>, NodeAgentError> {
        let request = AgentRequest { request_id: request_id.to_string() };
        let response: ManagedEnisResponse = self.call(paths::MANAGED_ENIS, request_id, &request).await?;
        Ok(response.enis)
    }

    async fn describe_node_resource(&self, request_id: &str) -> Result<NodeResource, NodeAgentError> {
        let request = AgentRequest { request_id: request_id.to_string() };
        let response: NodeResourceResponse = self.call(paths::NODE_RESOURCE, request_id, &request).await?;
        Ok(response.resource)
    }

    async fn setup_network_for_service(
        &self,
        request_id: &str,
        private_ip: Ipv4Addr,
        eni: &EniMetadata,
    ) -> Result<(), NodeAgentError> {
        let request = ServiceNetworkRequest {
            request_id: request_id.to_string(),
            private_ip,
            eni: eni.clone(),
        };
        let _: AckResponse = self.call(paths::SERVICE_SETUP, request_id, &request).await?;
        Ok(())
    }

    async fn clean_network_for_service(
        &self,
        request_id: &str,
        private_ip: Ipv4Addr,
        eni: &EniMetadata,
    ) -> Result<(), NodeAgentError> {
        let request = ServiceNetworkRequest {
            request_id: request_id.to_string(),
            private_ip,
            eni: eni.clone(),
        };
        let _: AckResponse = self.call(paths::SERVICE_CLEAN, request_id, &request).await?;
        Ok(())
    }

    async fn health(&self) -> Result<ServingStatus, NodeAgentError> {
        let url = format!("{}{}", self.base_url, paths::HEALTH);
        debug!("GET {}", url);

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        let text = response.text().await?;
        match serde_json::from_str::<HealthResponse>(&text) {
            Ok(health) => Ok(health.status),
            Err(_) if status == StatusCode::SERVICE_UNAVAILABLE => Ok(ServingStatus::NotServing),
            Err(e) => Err(e.into()),
        }
    }
}

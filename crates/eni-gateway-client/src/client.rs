//! ENI gateway REST client
//!
//! Instance-scoped calls (allocation, listing, limits) live under
//! `/v1/instances/{instance}/...`; calls addressed to a single ENI live
//! under `/v1/enis/{eni}/...` because ENI ids are globally unique.

use crate::common::HttpClient;
use crate::error::EniGatewayError;
use crate::gateway_trait::EniGatewayTrait;
use crate::models::*;
use chrono::{SecondsFormat, Utc};
use reqwest::Client;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::{debug, info};

/// ENI gateway REST client
#[derive(Debug, Clone)]
pub struct EniGatewayClient {
    http: HttpClient,
    instance_id: Option<String>,
    attach_poll_interval: Duration,
    attach_poll_attempts: u32,
}

impl EniGatewayClient {
    /// Create a new gateway client
    ///
    /// # Arguments
    /// * `base_url` - Gateway base URL (e.g., "http://127.0.0.1:19300")
    pub fn new(base_url: String) -> Result<Self, EniGatewayError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http: HttpClient::new(client, base_url),
            instance_id: None,
            attach_poll_interval: Duration::from_secs(2),
            attach_poll_attempts: 30,
        })
    }

    /// Scope instance-level calls to `instance_id`
    #[must_use]
    pub fn with_instance(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    /// Override how long `wait_for_eni_attached` polls
    #[must_use]
    pub fn with_attach_polling(mut self, interval: Duration, attempts: u32) -> Self {
        self.attach_poll_interval = interval;
        self.attach_poll_attempts = attempts.max(1);
        self
    }

    fn instance_path(&self, suffix: &str) -> Result<String, EniGatewayError> {
        let instance = self.instance_id.as_deref().ok_or_else(|| {
            EniGatewayError::InvalidRequest("instance id is required for instance-scoped calls".to_string())
        })?;
        Ok(format!("/v1/instances/{instance}{suffix}"))
    }

    async fn limits(&self) -> Result<EniLimits, EniGatewayError> {
        let path = self.instance_path("/limits")?;
        self.http.get(&path).await
    }
}

#[async_trait::async_trait]
impl EniGatewayTrait for EniGatewayClient {
    fn base_url(&self) -> &str {
        self.http.base_url()
    }

    async fn alloc_eni(&self) -> Result<String, EniGatewayError> {
        let path = self.instance_path("/enis")?;
        let mut tags = HashMap::new();
        tags.insert(TAG_ENI_MANAGED.to_string(), "true".to_string());
        tags.insert(TAG_ENI_CREATED_AT.to_string(), Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));
        if let Some(instance) = &self.instance_id {
            tags.insert(TAG_ENI_NODE.to_string(), instance.clone());
        }

        let response: AllocEniResponse = self.http.post(&path, &AllocEniRequest { tags }).await?;
        info!(eni_id = %response.eni_id, "Allocated ENI");
        Ok(response.eni_id)
    }

    async fn free_eni(&self, eni_id: &str) -> Result<(), EniGatewayError> {
        self.http.post_empty(&format!("/v1/enis/{eni_id}/free"), &serde_json::json!({})).await
    }

    async fn wait_for_eni_attached(&self, eni_id: &str) -> Result<EniMetadata, EniGatewayError> {
        let path = self.instance_path(&format!("/enis/{eni_id}"))?;
        for attempt in 1..=self.attach_poll_attempts {
            match self.http.get::<EniMetadata>(&path).await {
                Ok(eni) if eni.attached => return Ok(eni),
                Ok(_) => debug!(eni_id, attempt, "ENI not attached yet"),
                // freshly created ENIs can be invisible for a moment
                Err(EniGatewayError::NotFound(_)) => debug!(eni_id, attempt, "ENI not visible yet"),
                Err(e) => return Err(e),
            }
            tokio::time::sleep(self.attach_poll_interval).await;
        }
        Err(EniGatewayError::Timeout(format!(
            "ENI {} not attached after {} attempts",
            eni_id, self.attach_poll_attempts
        )))
    }

    async fn describe_all_enis(&self) -> Result<HashMap<String, EniMetadata>, EniGatewayError> {
        let path = self.instance_path("/enis")?;
        let enis: Vec<EniMetadata> = self.http.get(&path).await?;
        Ok(enis.into_iter().map(|eni| (eni.eni_id.clone(), eni)).collect())
    }

    async fn find_leaked_enis(&self) -> Result<Vec<EniMetadata>, EniGatewayError> {
        let path = self.instance_path("/enis/leaked")?;
        self.http.get(&path).await
    }

    async fn delete_eni(&self, eni_id: &str) -> Result<(), EniGatewayError> {
        self.http.delete(&format!("/v1/enis/{eni_id}")).await
    }

    async fn alloc_ip_addresses(&self, eni_id: &str) -> Result<Ipv4Addr, EniGatewayError> {
        let response: PrivateIpsResponse = self.http
            .post(&format!("/v1/enis/{eni_id}/private-ips"), &AllocIpRequest { count: 1 })
            .await?;
        response.addresses.into_iter().next().ok_or_else(|| {
            EniGatewayError::Api(format!("gateway assigned no address to {eni_id}"))
        })
    }

    async fn dealloc_ip_addresses(&self, eni_id: &str, addresses: &[Ipv4Addr]) -> Result<(), EniGatewayError> {
        let body = PrivateIpsRequest {
            addresses: addresses.to_vec(),
            allow_reassignment: false,
        };
        self.http.post_empty(&format!("/v1/enis/{eni_id}/private-ips/release"), &body).await
    }

    async fn assign_private_ip_addresses(&self, eni_id: &str, address: Ipv4Addr) -> Result<(), EniGatewayError> {
        let body = PrivateIpsRequest {
            addresses: vec![address],
            allow_reassignment: true,
        };
        self.http.post_empty(&format!("/v1/enis/{eni_id}/private-ips/assign"), &body).await
    }

    async fn modify_source_dest_check(&self, eni_id: &str, enabled: bool) -> Result<(), EniGatewayError> {
        self.http
            .put_empty(&format!("/v1/enis/{eni_id}/source-dest-check"), &SourceDestCheckRequest { enabled })
            .await
    }

    async fn get_eni_limit(&self) -> Result<usize, EniGatewayError> {
        Ok(self.limits().await?.max_enis)
    }

    async fn get_eni_ipv4_limit(&self) -> Result<usize, EniGatewayError> {
        Ok(self.limits().await?.max_ipv4_per_eni)
    }
}

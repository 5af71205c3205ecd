//! Mock NodeAgent for unit testing
//!
//! Holds one node's managed ENIs and the floating IPs it has wired up.
//! Selection follows the agent's rule (most addresses under the limit,
//! lowest ENI id on ties) so controller tests see realistic choices.

use crate::agent_trait::NodeAgentTrait;
use crate::error::NodeAgentError;
use crate::models::{NodeResource, ServingStatus};
use eni_gateway_client::EniMetadata;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Mock node agent for testing
#[derive(Debug, Clone)]
pub struct MockNodeAgent {
    pub(crate) endpoint: String,
    pub(crate) max_ips_per_eni: usize,
    pub(crate) enis: Arc<Mutex<HashMap<String, EniMetadata>>>,
    // private ip -> eni id
    pub(crate) services: Arc<Mutex<BTreeMap<Ipv4Addr, String>>>,
    pub(crate) status: Arc<Mutex<ServingStatus>>,
    pub(crate) failures: Arc<Mutex<HashSet<String>>>,
    pub(crate) calls: Arc<Mutex<Vec<String>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockNodeAgent {
    /// Create a serving mock agent with the given per-ENI address limit
    pub fn new(endpoint: impl Into<String>, max_ips_per_eni: usize) -> Self {
        Self {
            endpoint: endpoint.into(),
            max_ips_per_eni,
            enis: Arc::new(Mutex::new(HashMap::new())),
            services: Arc::new(Mutex::new(BTreeMap::new())),
            status: Arc::new(Mutex::new(ServingStatus::Serving)),
            failures: Arc::new(Mutex::new(HashSet::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Add (or replace) a managed ENI (for test setup)
    pub fn add_eni(&self, eni: EniMetadata) {
        lock(&self.enis).insert(eni.eni_id.clone(), eni);
    }

    /// Mark a floating IP as already wired to `eni_id` (for test setup)
    pub fn add_service(&self, private_ip: Ipv4Addr, eni_id: &str) {
        lock(&self.services).insert(private_ip, eni_id.to_string());
    }

    /// Floating IPs currently wired up, with their ENI ids
    pub fn services(&self) -> BTreeMap<Ipv4Addr, String> {
        lock(&self.services).clone()
    }

    pub fn set_status(&self, status: ServingStatus) {
        *lock(&self.status) = status;
    }

    /// Make the next call of `operation` (trait method name) fail
    pub fn fail_next(&self, operation: &str) {
        lock(&self.failures).insert(operation.to_string());
    }

    /// Recorded calls as `operation:argument` strings, in order
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    fn record(&self, operation: &str, request_id: &str, argument: &str) -> Result<(), NodeAgentError> {
        lock(&self.calls).push(format!("{operation}:{argument}"));
        if lock(&self.failures).remove(operation) {
            return Err(NodeAgentError::Agent {
                request_id: request_id.to_string(),
                message: format!("injected failure for {operation}"),
            });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl NodeAgentTrait for MockNodeAgent {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn choose_busiest_eni(&self, request_id: &str) -> Result<EniMetadata, NodeAgentError> {
        self.record("choose_busiest_eni", request_id, "")?;
        let enis = lock(&self.enis);
        let mut candidates: Vec<&EniMetadata> = enis
            .values()
            .filter(|eni| eni.ipv4_addresses.len() < self.max_ips_per_eni)
            .collect();
        candidates.sort_by(|a, b| {
            b.ipv4_addresses
                .len()
                .cmp(&a.ipv4_addresses.len())
                .then_with(|| a.eni_id.cmp(&b.eni_id))
        });
        candidates
            .first()
            .map(|eni| (*eni).clone())
            .ok_or_else(|| NodeAgentError::ResourceUnavailable {
                request_id: request_id.to_string(),
                message: "no managed ENI".to_string(),
            })
    }

    async fn get_managed_enis(&self, request_id: &str) -> Result<HashMap<String, EniMetadata>, NodeAgentError> {
        self.record("get_managed_enis", request_id, "")?;
        Ok(lock(&self.enis).clone())
    }

    async fn describe_node_resource(&self, request_id: &str) -> Result<NodeResource, NodeAgentError> {
        self.record("describe_node_resource", request_id, "")?;
        let enis = lock(&self.enis);
        Ok(NodeResource::from_enis(enis.values(), self.max_ips_per_eni))
    }

    async fn setup_network_for_service(
        &self,
        request_id: &str,
        private_ip: Ipv4Addr,
        eni: &EniMetadata,
    ) -> Result<(), NodeAgentError> {
        self.record("setup_network_for_service", request_id, &format!("{private_ip}@{}", eni.eni_id))?;
        lock(&self.services).insert(private_ip, eni.eni_id.clone());
        Ok(())
    }

    async fn clean_network_for_service(
        &self,
        request_id: &str,
        private_ip: Ipv4Addr,
        eni: &EniMetadata,
    ) -> Result<(), NodeAgentError> {
        self.record("clean_network_for_service", request_id, &format!("{private_ip}@{}", eni.eni_id))?;
        lock(&self.services).remove(&private_ip);
        Ok(())
    }

    async fn health(&self) -> Result<ServingStatus, NodeAgentError> {
        self.record("health", "", "")?;
        Ok(*lock(&self.status))
    }
}

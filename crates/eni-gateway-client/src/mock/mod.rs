//! Mock EniGateway for unit testing
//!
//! Keeps a single instance's ENIs in memory. Allocation hands out device
//! numbers and addresses sequentially, and individual operations can be
//! made to fail once so callers' error paths can be exercised.
//!
//! - `helpers.rs` - builders for ENI fixtures

pub mod helpers;

use crate::error::EniGatewayError;
use crate::gateway_trait::EniGatewayTrait;
use crate::models::*;
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Mock ENI gateway for testing
#[derive(Debug, Clone)]
pub struct MockEniGateway {
    pub(crate) base_url: String,
    pub(crate) enis: Arc<Mutex<HashMap<String, EniMetadata>>>,
    pub(crate) limits: Arc<Mutex<EniLimits>>,
    pub(crate) failures: Arc<Mutex<HashSet<String>>>,
    pub(crate) calls: Arc<Mutex<Vec<String>>>,
    // Counter for generating ids and addresses
    pub(crate) next_id: Arc<Mutex<u32>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockEniGateway {
    /// Create a new mock gateway with the given instance limits
    pub fn new(max_enis: usize, max_ipv4_per_eni: usize) -> Self {
        Self {
            base_url: "http://mock-eni-gateway".to_string(),
            enis: Arc::new(Mutex::new(HashMap::new())),
            limits: Arc::new(Mutex::new(EniLimits { max_enis, max_ipv4_per_eni })),
            failures: Arc::new(Mutex::new(HashSet::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(Mutex::new(100)),
        }
    }

    /// Add an ENI to the mock store (for test setup)
    pub fn add_eni(&self, eni: EniMetadata) {
        lock(&self.enis).insert(eni.eni_id.clone(), eni);
    }

    /// Current state of one ENI
    pub fn eni(&self, eni_id: &str) -> Option<EniMetadata> {
        lock(&self.enis).get(eni_id).cloned()
    }

    /// Ids of every ENI in the store, sorted
    pub fn eni_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.enis).keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Make the next call of `operation` (trait method name) fail
    pub fn fail_next(&self, operation: &str) {
        lock(&self.failures).insert(operation.to_string());
    }

    /// Recorded calls as `operation:argument` strings, in order
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    fn record(&self, operation: &str, argument: &str) -> Result<(), EniGatewayError> {
        lock(&self.calls).push(format!("{operation}:{argument}"));
        if lock(&self.failures).remove(operation) {
            return Err(EniGatewayError::Api(format!("injected failure for {operation}")));
        }
        Ok(())
    }

    fn next_id(&self) -> u32 {
        let mut next = lock(&self.next_id);
        *next += 1;
        *next
    }

    fn next_free_address(enis: &HashMap<String, EniMetadata>, subnet_id: &str, seed: u32) -> Ipv4Addr {
        let used: HashSet<Ipv4Addr> = enis
            .values()
            .filter(|eni| eni.subnet_id == subnet_id)
            .flat_map(|eni| eni.ipv4_addresses.iter().map(|addr| addr.address))
            .collect();
        let mut host = seed;
        loop {
            let candidate = helpers::subnet_address(subnet_id, host);
            if !used.contains(&candidate) {
                return candidate;
            }
            host += 1;
        }
    }
}

#[async_trait::async_trait]
impl EniGatewayTrait for MockEniGateway {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn alloc_eni(&self) -> Result<String, EniGatewayError> {
        self.record("alloc_eni", "")?;
        let id = self.next_id();
        let mut enis = lock(&self.enis);
        let device_number = (1..)
            .find(|n| !enis.values().any(|eni| eni.attached && eni.device_number == *n))
            .unwrap_or_default();
        let address = Self::next_free_address(&enis, helpers::DEFAULT_SUBNET_ID, 10);
        let eni = helpers::managed_eni(&format!("eni-{id:05}"), device_number, vec![Ipv4Address::primary(address)]);
        let eni_id = eni.eni_id.clone();
        enis.insert(eni_id.clone(), eni);
        Ok(eni_id)
    }

    async fn free_eni(&self, eni_id: &str) -> Result<(), EniGatewayError> {
        self.record("free_eni", eni_id)?;
        let mut enis = lock(&self.enis);
        match enis.get(eni_id) {
            Some(eni) if eni.is_primary_eni() => Err(EniGatewayError::InvalidRequest(format!(
                "{eni_id} is the primary interface"
            ))),
            Some(_) => {
                enis.remove(eni_id);
                Ok(())
            }
            None => Err(EniGatewayError::NotFound(eni_id.to_string())),
        }
    }

    async fn wait_for_eni_attached(&self, eni_id: &str) -> Result<EniMetadata, EniGatewayError> {
        self.record("wait_for_eni_attached", eni_id)?;
        match lock(&self.enis).get(eni_id) {
            Some(eni) if eni.attached => Ok(eni.clone()),
            Some(_) => Err(EniGatewayError::Timeout(format!("{eni_id} is not attached"))),
            None => Err(EniGatewayError::NotFound(eni_id.to_string())),
        }
    }

    async fn describe_all_enis(&self) -> Result<HashMap<String, EniMetadata>, EniGatewayError> {
        self.record("describe_all_enis", "")?;
        Ok(lock(&self.enis)
            .iter()
            .filter(|(_, eni)| eni.attached)
            .map(|(id, eni)| (id.clone(), eni.clone()))
            .collect())
    }

    async fn find_leaked_enis(&self) -> Result<Vec<EniMetadata>, EniGatewayError> {
        self.record("find_leaked_enis", "")?;
        let mut leaked: Vec<EniMetadata> = lock(&self.enis)
            .values()
            .filter(|eni| eni.is_managed() && !eni.attached)
            .cloned()
            .collect();
        leaked.sort_by(|a, b| a.eni_id.cmp(&b.eni_id));
        Ok(leaked)
    }

    async fn delete_eni(&self, eni_id: &str) -> Result<(), EniGatewayError> {
        self.record("delete_eni", eni_id)?;
        lock(&self.enis)
            .remove(eni_id)
            .map(|_| ())
            .ok_or_else(|| EniGatewayError::NotFound(eni_id.to_string()))
    }

    async fn alloc_ip_addresses(&self, eni_id: &str) -> Result<Ipv4Addr, EniGatewayError> {
        self.record("alloc_ip_addresses", eni_id)?;
        let max = lock(&self.limits).max_ipv4_per_eni;
        let mut enis = lock(&self.enis);
        let subnet_id = enis
            .get(eni_id)
            .map(|eni| eni.subnet_id.clone())
            .ok_or_else(|| EniGatewayError::NotFound(eni_id.to_string()))?;
        let address = Self::next_free_address(&enis, &subnet_id, 100);
        let eni = enis
            .get_mut(eni_id)
            .ok_or_else(|| EniGatewayError::NotFound(eni_id.to_string()))?;
        if eni.ipv4_addresses.len() >= max {
            return Err(EniGatewayError::Api(format!("{eni_id} has no free address slots")));
        }
        eni.ipv4_addresses.push(Ipv4Address::secondary(address));
        Ok(address)
    }

    async fn dealloc_ip_addresses(&self, eni_id: &str, addresses: &[Ipv4Addr]) -> Result<(), EniGatewayError> {
        self.record("dealloc_ip_addresses", eni_id)?;
        let mut enis = lock(&self.enis);
        let eni = enis
            .get_mut(eni_id)
            .ok_or_else(|| EniGatewayError::NotFound(eni_id.to_string()))?;
        eni.ipv4_addresses
            .retain(|addr| addr.primary || !addresses.contains(&addr.address));
        Ok(())
    }

    async fn assign_private_ip_addresses(&self, eni_id: &str, address: Ipv4Addr) -> Result<(), EniGatewayError> {
        self.record("assign_private_ip_addresses", eni_id)?;
        let mut enis = lock(&self.enis);
        if !enis.contains_key(eni_id) {
            return Err(EniGatewayError::NotFound(eni_id.to_string()));
        }
        for eni in enis.values_mut() {
            eni.ipv4_addresses.retain(|addr| addr.primary || addr.address != address);
        }
        if let Some(eni) = enis.get_mut(eni_id) {
            eni.ipv4_addresses.push(Ipv4Address::secondary(address));
        }
        Ok(())
    }

    async fn modify_source_dest_check(&self, eni_id: &str, enabled: bool) -> Result<(), EniGatewayError> {
        self.record("modify_source_dest_check", &format!("{eni_id}={enabled}"))?;
        if lock(&self.enis).contains_key(eni_id) {
            Ok(())
        } else {
            Err(EniGatewayError::NotFound(eni_id.to_string()))
        }
    }

    async fn get_eni_limit(&self) -> Result<usize, EniGatewayError> {
        self.record("get_eni_limit", "")?;
        Ok(lock(&self.limits).max_enis)
    }

    async fn get_eni_ipv4_limit(&self) -> Result<usize, EniGatewayError> {
        self.record("get_eni_ipv4_limit", "")?;
        Ok(lock(&self.limits).max_ipv4_per_eni)
    }
}

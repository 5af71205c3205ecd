//! ENI capacity manager
//!
//! Keeps a buffer of spare secondary IPs on the node's managed ENIs so a
//! floating IP can be placed without waiting for an ENI to attach:
//! - `ensure_capacity` grows or shrinks the pool by at most one ENI per tick
//! - `clean_leaked_enis` deletes managed ENIs left detached past a grace period
//! - `choose_busiest_eni` picks the ENI the next floating IP goes on
//!
//! Every tick starts from a fresh `describe_all_enis` snapshot. A failed
//! cloud call ends the tick; the next tick retries from scratch.
//!
//! Capacity passes hold the pool lock exclusively, so an ENI is never
//! freed while a lookup is choosing from the same ENIs. Shrinking takes
//! idle ENIs from the highest id while `select_busiest` breaks ties
//! towards the lowest.

use crate::error::AgentError;
use chrono::{DateTime, Utc};
use eni_gateway_client::{EniGatewayTrait, EniMetadata};
use node_agent_client::NodeResource;
use policy_router::PolicyRouter;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Capacity bounds derived from the instance type and operator settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityLimits {
    /// ENIs the instance may carry, primary included
    pub max_eni: usize,
    pub max_ips_per_eni: usize,
    pub min_private_ip: usize,
}

impl CapacityLimits {
    /// Combine the instance limits with the `MAX_ENI` / `MIN_PRIVATE_IP` overrides.
    ///
    /// `max_eni` only lowers the instance limit; values below 1 are ignored.
    /// `min_private_ip` below 1 means 1 and never exceeds one ENI's worth of
    /// addresses.
    #[must_use]
    pub fn resolve(instance_max_eni: usize, max_ips_per_eni: usize, max_eni: i64, min_private_ip: i64) -> Self {
        let max_eni = usize::try_from(max_eni)
            .ok()
            .filter(|n| *n >= 1 && *n < instance_max_eni)
            .unwrap_or(instance_max_eni);
        let min_private_ip = usize::try_from(min_private_ip)
            .ok()
            .filter(|n| *n >= 1)
            .unwrap_or(1)
            .min(max_ips_per_eni.max(1));
        Self {
            max_eni,
            max_ips_per_eni,
            min_private_ip,
        }
    }

    /// Above this many spare IPs an idle ENI is released
    #[must_use]
    pub fn max_spare(&self) -> usize {
        self.min_private_ip + self.max_ips_per_eni
    }
}

/// What one `ensure_capacity` pass did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapacityAction {
    /// Spare IPs within bounds
    Steady,
    /// A new ENI was attached and set up
    Allocated(String),
    /// An idle ENI was released
    Freed(String),
    /// Below the floor, but the instance already carries `max_eni` ENIs
    AtEniLimit,
    /// Above the ceiling, but every managed ENI holds a secondary IP
    NoIdleEni,
}

/// Managed ENIs from a describe snapshot, sorted by ENI id
#[must_use]
pub fn filter_managed(enis: &HashMap<String, EniMetadata>) -> Vec<EniMetadata> {
    let mut managed: Vec<EniMetadata> = enis.values().filter(|eni| eni.is_managed()).cloned().collect();
    managed.sort_by(|a, b| a.eni_id.cmp(&b.eni_id));
    debug!(
        count = managed.len(),
        ids = %managed.iter().map(|eni| eni.eni_id.as_str()).collect::<Vec<_>>().join(","),
        "Managed ENIs"
    );
    managed
}

/// The ENI with the most addresses that can still take one more.
/// Ties go to the lowest ENI id so the choice is stable for a snapshot.
#[must_use]
pub fn select_busiest(enis: &[EniMetadata], max_ips_per_eni: usize) -> Option<&EniMetadata> {
    enis.iter()
        .filter(|eni| eni.ipv4_addresses.len() < max_ips_per_eni)
        .max_by(|a, b| {
            a.ipv4_addresses
                .len()
                .cmp(&b.ipv4_addresses.len())
                .then_with(|| b.eni_id.cmp(&a.eni_id))
        })
}

/// Unused address slots across `enis`
#[must_use]
pub fn total_spare(enis: &[EniMetadata], max_ips_per_eni: usize) -> usize {
    enis.iter()
        .map(|eni| max_ips_per_eni.saturating_sub(eni.ipv4_addresses.len()))
        .sum()
}

/// Whether a leaked-ENI candidate may be deleted at `now`.
///
/// Attached ENIs, untagged ENIs and ENIs without a parseable creation
/// time are never deleted.
#[must_use]
pub fn is_deletable_leak(eni: &EniMetadata, now: DateTime<Utc>, grace: Duration) -> bool {
    if eni.attached || !eni.is_managed() {
        return false;
    }
    let Some(created_at) = eni.created_at() else {
        return false;
    };
    chrono::Duration::from_std(grace).is_ok_and(|grace| now.signed_duration_since(created_at) >= grace)
}

/// Node-local ENI pool
pub struct EniManager {
    gateway: Arc<dyn EniGatewayTrait>,
    router: Arc<PolicyRouter>,
    limits: CapacityLimits,
    leaked_eni_grace: Duration,
    // exclusive for capacity passes and node init, shared for lookups
    pool: RwLock<()>,
    initialized: AtomicBool,
    ready: AtomicBool,
}

impl std::fmt::Debug for EniManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EniManager")
            .field("gateway", &self.gateway.base_url())
            .field("limits", &self.limits)
            .field("leaked_eni_grace", &self.leaked_eni_grace)
            .finish_non_exhaustive()
    }
}

impl EniManager {
    pub fn new(
        gateway: Arc<dyn EniGatewayTrait>,
        router: Arc<PolicyRouter>,
        limits: CapacityLimits,
        leaked_eni_grace: Duration,
    ) -> Self {
        Self {
            gateway,
            router,
            limits,
            leaked_eni_grace,
            pool: RwLock::new(()),
            initialized: AtomicBool::new(false),
            ready: AtomicBool::new(false),
        }
    }

    /// Query the instance limits once and apply the operator overrides.
    pub async fn init_limits(
        gateway: &dyn EniGatewayTrait,
        max_eni: i64,
        min_private_ip: i64,
    ) -> Result<CapacityLimits, AgentError> {
        let instance_max_eni = gateway.get_eni_limit().await?;
        let max_ips_per_eni = gateway.get_eni_ipv4_limit().await?;
        if instance_max_eni == 0 || max_ips_per_eni == 0 {
            return Err(AgentError::InvalidConfig(format!(
                "instance reports max {instance_max_eni} ENIs with {max_ips_per_eni} IPs each"
            )));
        }
        let limits = CapacityLimits::resolve(instance_max_eni, max_ips_per_eni, max_eni, min_private_ip);
        info!(
            max_eni = limits.max_eni,
            max_ips_per_eni = limits.max_ips_per_eni,
            min_private_ip = limits.min_private_ip,
            "Resolved ENI and private IP limits"
        );
        Ok(limits)
    }

    pub fn limits(&self) -> CapacityLimits {
        self.limits
    }

    /// True once `init_node` succeeded and an `ensure_capacity` pass has
    /// completed after it
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    async fn managed_snapshot(&self) -> Result<Vec<EniMetadata>, AgentError> {
        let enis = self.gateway.describe_all_enis().await?;
        Ok(filter_managed(&enis))
    }

    /// Attached ENIs carrying the managed tag, sorted by id
    pub async fn get_managed_enis(&self) -> Result<Vec<EniMetadata>, AgentError> {
        let _pool = self.pool.read().await;
        self.managed_snapshot().await
    }

    pub async fn choose_busiest_eni(&self) -> Result<EniMetadata, AgentError> {
        let _pool = self.pool.read().await;
        let managed = self.managed_snapshot().await?;
        let eni = select_busiest(&managed, self.limits.max_ips_per_eni).ok_or_else(|| {
            AgentError::ResourceUnavailable(format!(
                "no managed ENI below {} addresses ({} managed)",
                self.limits.max_ips_per_eni,
                managed.len()
            ))
        })?;
        info!(eni_id = %eni.eni_id, used = eni.ipv4_addresses.len(), "Found busiest ENI");
        Ok(eni.clone())
    }

    pub async fn describe_node_resource(&self) -> Result<NodeResource, AgentError> {
        let managed = self.get_managed_enis().await?;
        Ok(NodeResource::from_enis(&managed, self.limits.max_ips_per_eni))
    }

    /// One capacity pass: attach an ENI below the floor, release an idle
    /// one above the ceiling, otherwise nothing.
    pub async fn ensure_capacity(&self) -> Result<CapacityAction, AgentError> {
        let action = {
            let _pool = self.pool.write().await;
            self.reconcile_capacity().await?
        };
        if !self.initialized.load(Ordering::Acquire) {
            warn!("Node not initialised, agent stays NOT_SERVING");
        } else if !self.ready.swap(true, Ordering::AcqRel) {
            info!("First capacity pass complete, agent is serving");
        }
        Ok(action)
    }

    async fn reconcile_capacity(&self) -> Result<CapacityAction, AgentError> {
        let enis = self.gateway.describe_all_enis().await?;
        let managed = filter_managed(&enis);
        let max_ips = self.limits.max_ips_per_eni;
        let spare = total_spare(&managed, max_ips);
        let (min, max) = (self.limits.min_private_ip, self.limits.max_spare());

        for eni in &managed {
            let used = eni.ipv4_addresses.len();
            debug!(eni_id = %eni.eni_id, total = max_ips, used, spare = max_ips.saturating_sub(used), "ENI usage");
        }
        info!(spare, min, max, managed = managed.len(), "Local private IP buffer status");

        if spare < min {
            if enis.len() >= self.limits.max_eni {
                info!(current = enis.len(), max = self.limits.max_eni, "ENI limit reached, cannot allocate a new ENI");
                return Ok(CapacityAction::AtEniLimit);
            }
            let eni_id = self.alloc_and_attach_eni().await?;
            return Ok(CapacityAction::Allocated(eni_id));
        }
        if spare > max {
            return Ok(match self.detach_and_delete_idle_eni(&managed).await? {
                Some(eni_id) => CapacityAction::Freed(eni_id),
                None => {
                    info!("No idle ENI to release");
                    CapacityAction::NoIdleEni
                }
            });
        }
        Ok(CapacityAction::Steady)
    }

    async fn alloc_and_attach_eni(&self) -> Result<String, AgentError> {
        info!("Allocating a new ENI");
        let eni_id = self.gateway.alloc_eni().await?;
        info!(eni_id = %eni_id, "ENI created, waiting for attachment");

        let eni = self.gateway.wait_for_eni_attached(&eni_id).await?;
        self.router.setup_network_for_eni(&eni).await?;

        info!(eni_id = %eni_id, "New ENI ready");
        Ok(eni_id)
    }

    async fn detach_and_delete_idle_eni(&self, managed: &[EniMetadata]) -> Result<Option<String>, AgentError> {
        let Some(eni) = managed.iter().rev().find(|eni| !eni.is_primary_eni() && eni.is_idle()) else {
            return Ok(None);
        };
        info!(eni_id = %eni.eni_id, "Releasing idle ENI");

        self.router.clean_network_for_eni(eni).await?;
        self.gateway.free_eni(&eni.eni_id).await?;

        info!(eni_id = %eni.eni_id, "Idle ENI released");
        Ok(Some(eni.eni_id.clone()))
    }

    /// Delete managed ENIs that stayed detached past the grace period.
    /// Returns the ids deleted in this pass.
    pub async fn clean_leaked_enis(&self) -> Result<Vec<String>, AgentError> {
        let candidates = self.gateway.find_leaked_enis().await?;
        let now = Utc::now();
        let mut deleted = Vec::new();

        for eni in candidates {
            if !is_deletable_leak(&eni, now, self.leaked_eni_grace) {
                debug!(eni_id = %eni.eni_id, attached = eni.attached, "Skipping leaked ENI candidate");
                continue;
            }
            match self.gateway.delete_eni(&eni.eni_id).await {
                Ok(()) => {
                    info!(eni_id = %eni.eni_id, "Deleted leaked ENI");
                    deleted.push(eni.eni_id);
                }
                Err(e) if e.is_not_found() => debug!(eni_id = %eni.eni_id, "Leaked ENI already gone"),
                Err(e) => warn!(eni_id = %eni.eni_id, error = %e, "Failed to delete leaked ENI"),
            }
        }
        Ok(deleted)
    }

    /// Startup pass: set up routing for every attached managed ENI and
    /// the floating IPs it still carries, then disable the source/dest
    /// check on the primary ENI.
    ///
    /// A single ENI that cannot be set up is logged and skipped; any other
    /// failure leaves the node uninitialised and the agent not serving.
    pub async fn init_node(&self, setup_attempts: u32, setup_delay: Duration) -> Result<(), AgentError> {
        let _pool = self.pool.write().await;
        let enis = self.gateway.describe_all_enis().await?;

        for eni in filter_managed(&enis).iter().filter(|eni| !eni.is_primary_eni()) {
            info!(eni_id = %eni.eni_id, "Discovered managed ENI, setting it up");
            if let Err(e) = self.setup_eni_with_retry(eni, setup_attempts, setup_delay).await {
                error!(eni_id = %eni.eni_id, error = %e, "Failed to set up ENI");
                continue;
            }
            for private_ip in eni.secondary_ips() {
                match self.router.setup_network_for_service(private_ip, eni).await {
                    Ok(()) => info!(eni_id = %eni.eni_id, %private_ip, "Restored service network"),
                    Err(e) => warn!(eni_id = %eni.eni_id, %private_ip, error = %e, "Failed to restore service network"),
                }
            }
        }

        let primary = enis
            .values()
            .find(|eni| eni.is_primary_eni())
            .ok_or_else(|| AgentError::InvalidConfig("primary ENI (device 0) not found".to_string()))?;
        self.gateway.modify_source_dest_check(&primary.eni_id, false).await?;
        info!(eni_id = %primary.eni_id, "Disabled source/destination check on primary ENI");
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    async fn setup_eni_with_retry(&self, eni: &EniMetadata, attempts: u32, delay: Duration) -> Result<(), AgentError> {
        let attempts = attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.router.setup_network_for_eni(eni).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < attempts => {
                    warn!(eni_id = %eni.eni_id, attempt, error = %e, "ENI setup failed, retrying");
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Run `ensure_capacity` every `period` until the process exits
    pub async fn run_capacity_loop(self: Arc<Self>, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.ensure_capacity().await {
                Ok(CapacityAction::Steady) => {}
                Ok(action) => info!(?action, "Capacity pass finished"),
                Err(e) => error!(error = %e, "Failed to ensure ENI capacity"),
            }
        }
    }

    /// Run `clean_leaked_enis` every `period` until the process exits
    pub async fn run_leak_cleanup_loop(self: Arc<Self>, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.clean_leaked_enis().await {
                error!(error = %e, "Failed to clean leaked ENIs");
            }
        }
    }
}

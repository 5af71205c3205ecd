//! Floating-IP ownership reconciliation
//!
//! Each controller instance reconciles every managed Service from the
//! point of view of its own node. The role detected for the node decides
//! which transition runs:
//!
//! - **Creating**: allocate a secondary IP on the busiest local ENI, route
//!   it locally, then record the binding on the Service
//! - **Migrating**: move the recorded IP from its old ENI onto a local one
//! - **Deleting**: release the cloud address and drop the finalizer
//! - **Relinquishing**: tear down local routing only; the new owner moves
//!   the address
//!
//! Steps run strictly in order (cloud mutation, local routing, annotation
//! write) and every step is safe to repeat on the next reconcile.

use crate::annotations::{apply_binding, release_binding, set_master_host, Binding, ServiceState};
use crate::backoff::BackoffTracker;
use crate::cache::BindingCache;
use crate::error::ControllerError;
use crate::registry::{Node, NodeRegistry};
use crate::role::{detect_role, Observation, OwnerAction, Role};
use crate::store::ServiceStore;
use eni_gateway_client::{EniGatewayTrait, EniMetadata};
use k8s_openapi::api::core::v1::Service;
use node_agent_client::new_request_id;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What a reconcile did on this node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Not managed, or owned by another node
    Ignored,
    /// No owner candidate yet; pinned the Service to this node
    Placed(Ipv4Addr),
    Created(Binding),
    Migrated(Binding),
    /// Binding recorded for this node re-wired after a restart
    Readopted(Binding),
    /// Finalizer dropped; carries the released IP if there was one
    Released(Option<Ipv4Addr>),
    AlreadyOwned(Ipv4Addr),
    Relinquished(Ipv4Addr),
}

pub struct Reconciler {
    host_ip: Ipv4Addr,
    store: Arc<dyn ServiceStore>,
    gateway: Arc<dyn EniGatewayTrait>,
    registry: Arc<NodeRegistry>,
    cache: BindingCache,
    backoff: BackoffTracker,
    resync_interval: Duration,
}

impl Reconciler {
    pub fn new(
        host_ip: Ipv4Addr,
        store: Arc<dyn ServiceStore>,
        gateway: Arc<dyn EniGatewayTrait>,
        registry: Arc<NodeRegistry>,
        resync_interval: Duration,
    ) -> Self {
        Self {
            host_ip,
            store,
            gateway,
            registry,
            cache: BindingCache::default(),
            backoff: BackoffTracker::default(),
            resync_interval,
        }
    }

    pub fn host_ip(&self) -> Ipv4Addr {
        self.host_ip
    }

    pub fn cache(&self) -> &BindingCache {
        &self.cache
    }

    pub fn backoff(&self) -> &BackoffTracker {
        &self.backoff
    }

    pub fn resync_interval(&self) -> Duration {
        self.resync_interval
    }

    /// Seed the binding cache from the local agent's managed ENIs so a
    /// restarted owner still recognises the IPs it routes
    pub async fn warm_up(&self) -> Result<usize, ControllerError> {
        let node = self.local_node().await?;
        let enis = node.agent.get_managed_enis(&new_request_id()).await?;
        let warmed = self.cache.warm(enis.values());
        info!(host_ip = %self.host_ip, warmed, "Warmed floating ip cache");
        Ok(warmed)
    }

    /// Reconcile one Service from this node's point of view
    pub async fn reconcile(&self, service: &Service) -> Result<Outcome, ControllerError> {
        let state = ServiceState::from_service(service)?;
        if !state.managed {
            return Ok(Outcome::Ignored);
        }

        let request_id = new_request_id();
        if !state.deleting && state.master_host_ip.is_none() && state.selector.is_empty() {
            return self.place(service, &state, &request_id).await;
        }

        let first_pod_host = if state.master_host_ip.is_none() && !state.selector.is_empty() {
            self.first_pod_host(&state).await?
        } else {
            None
        };
        let observed = Observation {
            local_host: self.host_ip,
            first_pod_host,
            cached: state.private_ip.is_some_and(|ip| self.cache.contains(ip)),
        };

        let role = detect_role(&state, &observed);
        debug!(service = %state.key, %request_id, ?role, "Detected role");

        match role {
            Role::Unmanaged => Ok(Outcome::Ignored),
            Role::RelinquishingOwner => self.relinquish(&state, &request_id).await,
            Role::NewOwner(OwnerAction::Creating) => self.create(service, &state, &request_id).await,
            Role::NewOwner(OwnerAction::Deleting) => self.delete(service, &state, &request_id).await,
            Role::NewOwner(OwnerAction::Migrating) => self.migrate(service, &state, &request_id).await,
            Role::NewOwner(OwnerAction::AlreadyOwned) => Ok(Outcome::AlreadyOwned(state.require_private_ip()?)),
        }
    }

    async fn first_pod_host(&self, state: &ServiceState) -> Result<Option<Option<Ipv4Addr>>, ControllerError> {
        let pods = self.store.list_pods(&state.namespace, &state.selector).await?;
        Ok(pods.first().map(|pod| {
            pod.status
                .as_ref()
                .and_then(|status| status.host_ip.as_deref())
                .and_then(|ip| ip.parse().ok())
        }))
    }

    async fn place(&self, service: &Service, state: &ServiceState, request_id: &str) -> Result<Outcome, ControllerError> {
        let node = self.registry.choose_spare_node(state.subnet_id.as_deref()).await?;

        let mut pinned = service.clone();
        set_master_host(&mut pinned, node.ip);
        self.store.replace_service(&pinned).await?;

        info!(service = %state.key, node_ip = %node.ip, spare = node.spare(), %request_id, "Placed service on node");
        Ok(Outcome::Placed(node.ip))
    }

    async fn create(&self, service: &Service, state: &ServiceState, request_id: &str) -> Result<Outcome, ControllerError> {
        let node = self.local_node().await?;
        let eni = node.agent.choose_busiest_eni(request_id).await?;
        check_subnet(state, &eni)?;

        let private_ip = self.gateway.alloc_ip_addresses(&eni.eni_id).await?;
        info!(service = %state.key, %private_ip, eni_id = %eni.eni_id, %request_id, "Allocated floating ip");

        let binding = Binding {
            private_ip,
            eni_id: eni.eni_id.clone(),
            eni_host: self.host_ip,
            subnet_id: eni.subnet_id.clone(),
        };
        if let Err(e) = self.bind(service, &node, &eni, &binding, request_id).await {
            self.undo_create(&node, &eni, private_ip, request_id).await;
            return Err(e);
        }

        info!(service = %state.key, %private_ip, eni_id = %eni.eni_id, %request_id, "Created floating ip");
        Ok(Outcome::Created(binding))
    }

    /// Route the IP locally, cache it and record the binding
    async fn bind(
        &self,
        service: &Service,
        node: &Node,
        eni: &EniMetadata,
        binding: &Binding,
        request_id: &str,
    ) -> Result<(), ControllerError> {
        node.agent
            .setup_network_for_service(request_id, binding.private_ip, eni)
            .await?;
        self.cache.insert(binding.private_ip, eni.clone());
        self.write_binding(service, binding).await
    }

    /// Return a freshly allocated address so a retry does not leak it
    async fn undo_create(&self, node: &Node, eni: &EniMetadata, private_ip: Ipv4Addr, request_id: &str) {
        if self.cache.remove(private_ip).is_some() {
            if let Err(e) = node.agent.clean_network_for_service(request_id, private_ip, eni).await {
                warn!(%private_ip, eni_id = %eni.eni_id, %request_id, error = %e, "Failed to clean network for abandoned floating ip");
            }
        }
        if let Err(e) = self.gateway.dealloc_ip_addresses(&eni.eni_id, &[private_ip]).await {
            warn!(%private_ip, eni_id = %eni.eni_id, %request_id, error = %e, "Failed to release abandoned floating ip");
        }
    }

    async fn migrate(&self, service: &Service, state: &ServiceState, request_id: &str) -> Result<Outcome, ControllerError> {
        let private_ip = state.require_private_ip()?;
        let old_eni_id = state.require_eni_id()?;
        let node = self.local_node().await?;

        if state.eni_host == Some(self.host_ip) {
            let enis = node.agent.get_managed_enis(request_id).await?;
            if let Some(eni) = enis.get(old_eni_id).filter(|eni| eni.has_address(private_ip)) {
                node.agent
                    .setup_network_for_service(request_id, private_ip, eni)
                    .await?;
                self.cache.insert(private_ip, eni.clone());
                info!(service = %state.key, %private_ip, eni_id = %eni.eni_id, %request_id, "Re-adopted floating ip");
                return Ok(Outcome::Readopted(Binding {
                    private_ip,
                    eni_id: eni.eni_id.clone(),
                    eni_host: self.host_ip,
                    subnet_id: eni.subnet_id.clone(),
                }));
            }
        }

        let eni = node.agent.choose_busiest_eni(request_id).await?;
        check_subnet(state, &eni)?;

        self.release_address(old_eni_id, private_ip).await?;
        self.gateway
            .assign_private_ip_addresses(&eni.eni_id, private_ip)
            .await?;

        let binding = Binding {
            private_ip,
            eni_id: eni.eni_id.clone(),
            eni_host: self.host_ip,
            subnet_id: eni.subnet_id.clone(),
        };
        self.bind(service, &node, &eni, &binding, request_id).await?;

        info!(
            service = %state.key,
            %private_ip,
            from = %old_eni_id,
            to = %eni.eni_id,
            %request_id,
            "Migrated floating ip"
        );
        Ok(Outcome::Migrated(binding))
    }

    async fn delete(&self, service: &Service, state: &ServiceState, request_id: &str) -> Result<Outcome, ControllerError> {
        if let Some(private_ip) = state.private_ip {
            let eni_id = state.require_eni_id()?;
            self.release_address(eni_id, private_ip).await?;
            info!(service = %state.key, %private_ip, %eni_id, %request_id, "Released floating ip");

            if let Some(eni) = self.cache.get(private_ip) {
                let node = self.local_node().await?;
                node.agent
                    .clean_network_for_service(request_id, private_ip, &eni)
                    .await?;
                self.cache.remove(private_ip);
            }
        }

        if state.has_finalizer || state.private_ip.is_some() {
            let mut released = service.clone();
            release_binding(&mut released);
            self.store.replace_service(&released).await?;
            info!(service = %state.key, %request_id, "Removed finalizer");
        }
        Ok(Outcome::Released(state.private_ip))
    }

    async fn relinquish(&self, state: &ServiceState, request_id: &str) -> Result<Outcome, ControllerError> {
        let private_ip = state.require_private_ip()?;
        if let Some(eni) = self.cache.get(private_ip) {
            let node = self.local_node().await?;
            node.agent
                .clean_network_for_service(request_id, private_ip, &eni)
                .await?;
            self.cache.remove(private_ip);
        }
        info!(service = %state.key, %private_ip, %request_id, "Relinquished floating ip");
        Ok(Outcome::Relinquished(private_ip))
    }

    /// Release `private_ip` from `eni_id`; an ENI that is already gone is fine
    async fn release_address(&self, eni_id: &str, private_ip: Ipv4Addr) -> Result<(), ControllerError> {
        match self.gateway.dealloc_ip_addresses(eni_id, &[private_ip]).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!(%private_ip, %eni_id, "ENI already gone, nothing to release");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write_binding(&self, service: &Service, binding: &Binding) -> Result<(), ControllerError> {
        let mut bound = service.clone();
        apply_binding(&mut bound, binding);
        self.store.replace_service(&bound).await?;
        Ok(())
    }

    /// This node's registry entry, registering it on first use
    async fn local_node(&self) -> Result<Node, ControllerError> {
        match self.registry.get_node(self.host_ip).await {
            Err(ControllerError::NodeNotFound(_)) => self.registry.register(self.host_ip).await,
            found => found,
        }
    }
}

/// The chosen ENI must sit in the Service's subnet when one is recorded
fn check_subnet(state: &ServiceState, eni: &EniMetadata) -> Result<(), ControllerError> {
    match state.subnet_id.as_deref() {
        Some(subnet_id) if subnet_id != eni.subnet_id => Err(ControllerError::ResourceUnavailable(format!(
            "{}: busiest eni {} is in {}, service needs {subnet_id}",
            state.key, eni.eni_id, eni.subnet_id
        ))),
        _ => Ok(()),
    }
}

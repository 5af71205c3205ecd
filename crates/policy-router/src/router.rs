//! Policy router
//!
//! Applies and removes the per-ENI and per-floating-IP kernel state.
//! Every operation is idempotent: "already exists" on setup and
//! "not found" on cleanup count as success, so callers may repeat or
//! speculate freely.

use crate::error::{NetlinkError, RouterError, RouterResult};
use crate::ops::{IptablesOps, NetlinkOps, SysctlOps};
use crate::rules::{self, IptablesRule, Link, LOOSE_RP_FILTER};
use eni_gateway_client::EniMetadata;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Tunables for the router
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// MTU applied to managed ENI links
    pub mtu: u32,
    /// Attempts to find a freshly attached ENI's link by MAC
    pub link_lookup_attempts: u32,
    pub link_lookup_interval: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            mtu: 9001,
            link_lookup_attempts: 10,
            link_lookup_interval: Duration::from_secs(3),
        }
    }
}

fn ignore_exists(result: Result<(), NetlinkError>) -> RouterResult<()> {
    match result {
        Ok(()) | Err(NetlinkError::AlreadyExists(_)) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn ignore_missing(result: Result<(), NetlinkError>) -> RouterResult<()> {
    match result {
        Ok(()) | Err(NetlinkError::NotFound(_)) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Configures host routing for ENIs and the floating IPs they carry
pub struct PolicyRouter {
    netlink: Arc<dyn NetlinkOps>,
    iptables: Arc<dyn IptablesOps>,
    sysctl: Arc<dyn SysctlOps>,
    config: RouterConfig,
}

impl std::fmt::Debug for PolicyRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyRouter").field("config", &self.config).finish_non_exhaustive()
    }
}

impl PolicyRouter {
    /// Creates a router over the given host interfaces.
    pub fn new(
        netlink: Arc<dyn NetlinkOps>,
        iptables: Arc<dyn IptablesOps>,
        sysctl: Arc<dyn SysctlOps>,
        config: RouterConfig,
    ) -> Self {
        Self { netlink, iptables, sysctl, config }
    }

    /// Router bound to the running kernel: rtnetlink, the iptables binary
    /// and `/proc/sys`.
    #[cfg(target_os = "linux")]
    pub fn system(config: RouterConfig) -> RouterResult<Self> {
        use crate::linux::{ProcSys, RtNetlink, SystemIptables};

        Ok(Self::new(
            Arc::new(RtNetlink::connect()?),
            Arc::new(SystemIptables::new()?),
            Arc::new(ProcSys::default()),
            config,
        ))
    }

    async fn find_link(&self, eni: &EniMetadata) -> RouterResult<Option<Link>> {
        Ok(self.netlink.link_by_mac(&eni.mac).await?)
    }

    /// Resolves the ENI's link, waiting for it to appear after attachment.
    async fn resolve_link(&self, eni: &EniMetadata) -> RouterResult<Link> {
        let attempts = self.config.link_lookup_attempts.max(1);
        for attempt in 1..=attempts {
            if let Some(link) = self.find_link(eni).await? {
                return Ok(link);
            }
            debug!(eni_id = %eni.eni_id, attempt, "Link not present yet");
            if attempt < attempts {
                tokio::time::sleep(self.config.link_lookup_interval).await;
            }
        }
        Err(RouterError::LinkNotFound {
            eni_id: eni.eni_id.clone(),
            mac: eni.mac.clone(),
        })
    }

    fn ensure_iptables_rule(&self, rule: &IptablesRule) -> RouterResult<()> {
        if !self.iptables.exists(rule)? {
            info!(table = rule.table, chain = rule.chain, rule = %rule.rule, "Appending iptables rule");
            self.iptables.append(rule)?;
        }
        Ok(())
    }

    fn remove_iptables_rule(&self, rule: &IptablesRule) -> RouterResult<()> {
        if self.iptables.exists(rule)? {
            info!(table = rule.table, chain = rule.chain, rule = %rule.rule, "Deleting iptables rule");
            self.iptables.delete(rule)?;
        }
        Ok(())
    }

    async fn ensure_rp_filter(&self, iface: &str) -> RouterResult<()> {
        let key = rules::rp_filter_key(iface);
        let current = self.sysctl.get(&key).await?;
        if current.trim() != LOOSE_RP_FILTER {
            info!(key = %key, "Setting loose reverse path filtering");
            self.sysctl.set(&key, LOOSE_RP_FILTER).await?;
        }
        Ok(())
    }

    async fn prepare_link(&self, link: &Link) -> RouterResult<()> {
        self.ensure_rp_filter(&link.name).await?;
        self.netlink.link_set_mtu(link, self.config.mtu).await?;
        self.netlink.link_set_up(link).await?;
        Ok(())
    }

    /// Private table routes, the fwmark rule and the inbound connmark
    /// rule; no destructive steps.
    async fn ensure_eni_routing(&self, eni: &EniMetadata, link: &Link) -> RouterResult<()> {
        let (_, gateway) = rules::subnet_gateway(eni)?;
        for route in rules::eni_routes(eni, link.index, gateway) {
            ignore_exists(self.netlink.route_add(&route).await)?;
        }
        ignore_exists(self.netlink.rule_add(&rules::connmark_rule(eni)).await)?;
        self.ensure_iptables_rule(&rules::eni_mark_rule(eni, &link.name))
    }

    /// Prepares a secondary ENI to carry floating IPs.
    pub async fn setup_network_for_eni(&self, eni: &EniMetadata) -> RouterResult<()> {
        if eni.is_primary_eni() {
            return Err(RouterError::PrimaryEni(eni.eni_id.clone()));
        }
        let link = self.resolve_link(eni).await?;
        info!(eni_id = %eni.eni_id, link = %link.name, table = rules::route_table_id(eni), "Setting up ENI network");

        self.prepare_link(&link).await?;

        let (network, _) = rules::subnet_gateway(eni)?;
        for (address, prefix_len) in self.netlink.addr_list(&link).await? {
            if !eni.has_address(address) {
                warn!(eni_id = %eni.eni_id, %address, "Removing unknown address from ENI link");
                ignore_missing(self.netlink.addr_del(&link, address, prefix_len).await)?;
            }
        }
        ignore_missing(self.netlink.route_del(&rules::main_table_subnet_route(network, link.index)).await)?;

        self.ensure_eni_routing(eni, &link).await
    }

    /// Tears down everything `setup_network_for_eni` installed.
    pub async fn clean_network_for_eni(&self, eni: &EniMetadata) -> RouterResult<()> {
        info!(eni_id = %eni.eni_id, "Cleaning ENI network");
        if let Some(primary) = eni.primary_ip() {
            self.clean_network_for_service(primary, eni).await?;
        }
        ignore_missing(self.netlink.rule_del(&rules::connmark_rule(eni)).await)?;

        if let Some(link) = self.find_link(eni).await? {
            if let Ok((_, gateway)) = rules::subnet_gateway(eni) {
                for route in rules::eni_routes(eni, link.index, gateway).iter().rev() {
                    ignore_missing(self.netlink.route_del(route).await)?;
                }
            }
            self.remove_iptables_rule(&rules::eni_mark_rule(eni, &link.name))?;
        }
        Ok(())
    }

    /// Makes `private_ip` answer on `eni` and routes its return traffic
    /// back out through the same ENI.
    pub async fn setup_network_for_service(&self, private_ip: Ipv4Addr, eni: &EniMetadata) -> RouterResult<()> {
        let link = self.resolve_link(eni).await?;
        info!(%private_ip, eni_id = %eni.eni_id, link = %link.name, "Setting up service network");

        // the ENI's own setup may have failed earlier
        if !eni.is_primary_eni() {
            self.prepare_link(&link).await?;
            self.ensure_eni_routing(eni, &link).await?;
        }
        ignore_exists(self.netlink.addr_add(&link, private_ip, 32).await)?;
        for rule in rules::service_restore_rules(private_ip, eni) {
            self.ensure_iptables_rule(&rule)?;
        }
        Ok(())
    }

    /// Reverses `setup_network_for_service`. Succeeds when nothing was set up.
    pub async fn clean_network_for_service(&self, private_ip: Ipv4Addr, eni: &EniMetadata) -> RouterResult<()> {
        info!(%private_ip, eni_id = %eni.eni_id, "Cleaning service network");
        match self.find_link(eni).await? {
            Some(link) => ignore_missing(self.netlink.addr_del(&link, private_ip, 32).await)?,
            None => debug!(eni_id = %eni.eni_id, "ENI link already gone"),
        }
        for rule in rules::service_restore_rules(private_ip, eni) {
            self.remove_iptables_rule(&rule)?;
        }
        Ok(())
    }
}

//! Host interfaces the router drives
//!
//! Each trait wraps one kernel facility so the router can be exercised
//! against in-memory fakes.

use crate::error::{NetlinkError, RouterResult};
use crate::rules::{IptablesRule, Link, RouteSpec, RuleSpec};
use std::net::Ipv4Addr;

/// rtnetlink operations on links, addresses, routes and rules
#[async_trait::async_trait]
pub trait NetlinkOps: Send + Sync {
    /// Link whose hardware address equals `mac` (case-insensitive)
    async fn link_by_mac(&self, mac: &str) -> Result<Option<Link>, NetlinkError>;

    async fn link_set_up(&self, link: &Link) -> Result<(), NetlinkError>;

    async fn link_set_mtu(&self, link: &Link, mtu: u32) -> Result<(), NetlinkError>;

    /// IPv4 addresses on the link with their prefix lengths
    async fn addr_list(&self, link: &Link) -> Result<Vec<(Ipv4Addr, u8)>, NetlinkError>;

    async fn addr_add(&self, link: &Link, address: Ipv4Addr, prefix_len: u8) -> Result<(), NetlinkError>;

    async fn addr_del(&self, link: &Link, address: Ipv4Addr, prefix_len: u8) -> Result<(), NetlinkError>;

    async fn route_add(&self, route: &RouteSpec) -> Result<(), NetlinkError>;

    async fn route_del(&self, route: &RouteSpec) -> Result<(), NetlinkError>;

    async fn rule_add(&self, rule: &RuleSpec) -> Result<(), NetlinkError>;

    async fn rule_del(&self, rule: &RuleSpec) -> Result<(), NetlinkError>;
}

/// iptables rule management
pub trait IptablesOps: Send + Sync {
    fn exists(&self, rule: &IptablesRule) -> RouterResult<bool>;

    fn append(&self, rule: &IptablesRule) -> RouterResult<()>;

    fn delete(&self, rule: &IptablesRule) -> RouterResult<()>;
}

/// Process-wide sysctl access (`/proc/sys`)
#[async_trait::async_trait]
pub trait SysctlOps: Send + Sync {
    async fn get(&self, key: &str) -> RouterResult<String>;

    async fn set(&self, key: &str, value: &str) -> RouterResult<()>;
}

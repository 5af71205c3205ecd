//! In-memory host interfaces for unit testing
//!
//! `FakeNetlink`, `FakeIptables` and `FakeSysctl` reproduce the kernel's
//! EEXIST/ENOENT behaviour so idempotence can be asserted by comparing
//! snapshots.

use crate::error::{NetlinkError, RouterResult};
use crate::ops::{IptablesOps, NetlinkOps, SysctlOps};
use crate::rules::{IptablesRule, Link, RouteSpec, RuleSpec};
use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Observable netlink state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetlinkState {
    pub links: BTreeMap<u32, Link>,
    pub up: BTreeSet<u32>,
    pub mtu: BTreeMap<u32, u32>,
    pub addresses: BTreeMap<u32, BTreeSet<(Ipv4Addr, u8)>>,
    pub routes: BTreeSet<RouteSpec>,
    pub rules: BTreeSet<RuleSpec>,
}

/// In-memory rtnetlink
#[derive(Debug, Clone, Default)]
pub struct FakeNetlink {
    state: Arc<Mutex<NetlinkState>>,
}

impl FakeNetlink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a link (for test setup)
    pub fn add_link(&self, index: u32, name: &str, mac: &str) {
        lock(&self.state).links.insert(index, Link {
            index,
            name: name.to_string(),
            mac: mac.to_string(),
        });
    }

    /// Add an address to a link (for test setup)
    pub fn add_address(&self, index: u32, address: Ipv4Addr, prefix_len: u8) {
        lock(&self.state).addresses.entry(index).or_default().insert((address, prefix_len));
    }

    /// Add a route (for test setup)
    pub fn add_route(&self, route: RouteSpec) {
        lock(&self.state).routes.insert(route);
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> NetlinkState {
        lock(&self.state).clone()
    }
}

#[async_trait::async_trait]
impl NetlinkOps for FakeNetlink {
    async fn link_by_mac(&self, mac: &str) -> Result<Option<Link>, NetlinkError> {
        Ok(lock(&self.state)
            .links
            .values()
            .find(|link| link.mac.eq_ignore_ascii_case(mac))
            .cloned())
    }

    async fn link_set_up(&self, link: &Link) -> Result<(), NetlinkError> {
        lock(&self.state).up.insert(link.index);
        Ok(())
    }

    async fn link_set_mtu(&self, link: &Link, mtu: u32) -> Result<(), NetlinkError> {
        lock(&self.state).mtu.insert(link.index, mtu);
        Ok(())
    }

    async fn addr_list(&self, link: &Link) -> Result<Vec<(Ipv4Addr, u8)>, NetlinkError> {
        Ok(lock(&self.state)
            .addresses
            .get(&link.index)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn addr_add(&self, link: &Link, address: Ipv4Addr, prefix_len: u8) -> Result<(), NetlinkError> {
        let mut state = lock(&self.state);
        if state.addresses.entry(link.index).or_default().insert((address, prefix_len)) {
            Ok(())
        } else {
            Err(NetlinkError::AlreadyExists(format!("{address}/{prefix_len}")))
        }
    }

    async fn addr_del(&self, link: &Link, address: Ipv4Addr, prefix_len: u8) -> Result<(), NetlinkError> {
        let mut state = lock(&self.state);
        let removed = state
            .addresses
            .get_mut(&link.index)
            .is_some_and(|set| set.remove(&(address, prefix_len)));
        if removed {
            Ok(())
        } else {
            Err(NetlinkError::NotFound(format!("{address}/{prefix_len}")))
        }
    }

    async fn route_add(&self, route: &RouteSpec) -> Result<(), NetlinkError> {
        if lock(&self.state).routes.insert(route.clone()) {
            Ok(())
        } else {
            Err(NetlinkError::AlreadyExists(format!("{route:?}")))
        }
    }

    async fn route_del(&self, route: &RouteSpec) -> Result<(), NetlinkError> {
        if lock(&self.state).routes.remove(route) {
            Ok(())
        } else {
            Err(NetlinkError::NotFound(format!("{route:?}")))
        }
    }

    async fn rule_add(&self, rule: &RuleSpec) -> Result<(), NetlinkError> {
        if lock(&self.state).rules.insert(rule.clone()) {
            Ok(())
        } else {
            Err(NetlinkError::AlreadyExists(format!("{rule:?}")))
        }
    }

    async fn rule_del(&self, rule: &RuleSpec) -> Result<(), NetlinkError> {
        if lock(&self.state).rules.remove(rule) {
            Ok(())
        } else {
            Err(NetlinkError::NotFound(format!("{rule:?}")))
        }
    }
}

/// In-memory iptables
#[derive(Debug, Clone, Default)]
pub struct FakeIptables {
    rules: Arc<Mutex<BTreeSet<IptablesRule>>>,
}

impl FakeIptables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the installed rules
    pub fn snapshot(&self) -> BTreeSet<IptablesRule> {
        lock(&self.rules).clone()
    }
}

impl IptablesOps for FakeIptables {
    fn exists(&self, rule: &IptablesRule) -> RouterResult<bool> {
        Ok(lock(&self.rules).contains(rule))
    }

    fn append(&self, rule: &IptablesRule) -> RouterResult<()> {
        lock(&self.rules).insert(rule.clone());
        Ok(())
    }

    fn delete(&self, rule: &IptablesRule) -> RouterResult<()> {
        lock(&self.rules).remove(rule);
        Ok(())
    }
}

/// In-memory sysctl tree; unknown keys read as "1" (strict rp_filter)
#[derive(Debug, Clone, Default)]
pub struct FakeSysctl {
    values: Arc<Mutex<BTreeMap<String, String>>>,
    writes: Arc<Mutex<u32>>,
}

impl FakeSysctl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of `key`, if written
    pub fn value(&self, key: &str) -> Option<String> {
        lock(&self.values).get(key).cloned()
    }

    /// Number of writes performed
    pub fn writes(&self) -> u32 {
        *lock(&self.writes)
    }
}

#[async_trait::async_trait]
impl SysctlOps for FakeSysctl {
    async fn get(&self, key: &str) -> RouterResult<String> {
        Ok(lock(&self.values).get(key).cloned().unwrap_or_else(|| "1".to_string()))
    }

    async fn set(&self, key: &str, value: &str) -> RouterResult<()> {
        lock(&self.values).insert(key.to_string(), value.to_string());
        *lock(&self.writes) += 1;
        Ok(())
    }
}

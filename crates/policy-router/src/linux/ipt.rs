//! iptables through the `iptables` binary

use crate::error::{RouterError, RouterResult};
use crate::ops::IptablesOps;
use crate::rules::IptablesRule;

/// IPv4 iptables of the host
pub struct SystemIptables {
    inner: iptables::IPTables,
}

impl std::fmt::Debug for SystemIptables {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemIptables").field("cmd", &self.inner.cmd).finish()
    }
}

impl SystemIptables {
    /// Locates the iptables binary and probes its capabilities.
    pub fn new() -> RouterResult<Self> {
        let inner = iptables::new(false).map_err(|e| RouterError::Iptables(e.to_string()))?;
        Ok(Self { inner })
    }
}

impl IptablesOps for SystemIptables {
    fn exists(&self, rule: &IptablesRule) -> RouterResult<bool> {
        self.inner
            .exists(rule.table, rule.chain, &rule.rule)
            .map_err(|e| RouterError::Iptables(format!("check {}: {}", rule.rule, e)))
    }

    fn append(&self, rule: &IptablesRule) -> RouterResult<()> {
        self.inner
            .append(rule.table, rule.chain, &rule.rule)
            .map_err(|e| RouterError::Iptables(format!("append {}: {}", rule.rule, e)))
    }

    fn delete(&self, rule: &IptablesRule) -> RouterResult<()> {
        self.inner
            .delete(rule.table, rule.chain, &rule.rule)
            .map_err(|e| RouterError::Iptables(format!("delete {}: {}", rule.rule, e)))
    }
}

//! Agent configuration from environment variables

use crate::error::AgentError;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

pub const DEFAULT_GATEWAY_URL: &str = "http://127.0.0.1:19300";
pub const DEFAULT_RPC_PORT: u16 = 19200;

/// Effective agent settings
#[derive(Debug, Clone)]
pub struct Config {
    pub host_ip: Ipv4Addr,
    pub instance_id: String,
    pub gateway_url: String,
    pub rpc_port: u16,
    /// Operator ENI cap; only honoured when `>= 1` and below the instance limit
    pub max_eni: i64,
    /// Spare-IP floor; values below 1 fall back to 1
    pub min_private_ip: i64,
    pub eni_reconcile_interval: Duration,
    pub leaked_eni_cleanup_interval: Duration,
    pub leaked_eni_grace: Duration,
    pub eni_mtu: u32,
}

impl Config {
    /// Read the configuration from the process environment
    pub fn from_env() -> Result<Self, AgentError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AgentError> {
        let host_ip = lookup("HOST_IP")
            .ok_or_else(|| AgentError::InvalidConfig("HOST_IP environment variable is required".to_string()))?;
        let host_ip = host_ip
            .parse()
            .map_err(|_| AgentError::InvalidConfig(format!("HOST_IP is not an IPv4 address: {host_ip}")))?;
        let instance_id = lookup("INSTANCE_ID")
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AgentError::InvalidConfig("INSTANCE_ID environment variable is required".to_string()))?;

        Ok(Self {
            host_ip,
            instance_id,
            gateway_url: lookup("CLOUD_GATEWAY_URL").unwrap_or_else(|| DEFAULT_GATEWAY_URL.to_string()),
            rpc_port: parse(&lookup, "RPC_PORT", DEFAULT_RPC_PORT)?,
            max_eni: parse(&lookup, "MAX_ENI", -1)?,
            min_private_ip: parse(&lookup, "MIN_PRIVATE_IP", 1)?,
            eni_reconcile_interval: Duration::from_secs(parse(&lookup, "ENI_RECONCILE_INTERVAL_SECS", 15)?),
            leaked_eni_cleanup_interval: Duration::from_secs(parse(&lookup, "LEAKED_ENI_CLEANUP_INTERVAL_SECS", 60)?),
            leaked_eni_grace: Duration::from_secs(parse(&lookup, "LEAKED_ENI_GRACE_SECS", 600)?),
            eni_mtu: parse(&lookup, "ENI_MTU", 9001)?,
        })
    }

    pub fn log(&self) {
        info!("Configuration:");
        info!("  Host IP: {}", self.host_ip);
        info!("  Instance ID: {}", self.instance_id);
        info!("  ENI gateway URL: {}", self.gateway_url);
        info!("  RPC port: {}", self.rpc_port);
        info!("  MAX_ENI: {}", self.max_eni);
        info!("  MIN_PRIVATE_IP: {}", self.min_private_ip);
        info!("  ENI reconcile interval: {:?}", self.eni_reconcile_interval);
        info!("  Leaked ENI cleanup interval: {:?}", self.leaked_eni_cleanup_interval);
        info!("  Leaked ENI grace period: {:?}", self.leaked_eni_grace);
        info!("  ENI MTU: {}", self.eni_mtu);
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, AgentError> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AgentError::InvalidConfig(format!("{key} has an invalid value: {raw}"))),
        None => Ok(default),
    }
}

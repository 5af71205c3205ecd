//! Controller configuration from environment variables

use crate::error::ControllerError;
use node_agent_client::Timeouts;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

pub const DEFAULT_GATEWAY_URL: &str = "http://127.0.0.1:19300";
pub const DEFAULT_RPC_PORT: u16 = 19200;

/// Effective controller settings
#[derive(Debug, Clone)]
pub struct Config {
    pub host_ip: Ipv4Addr,
    pub gateway_url: String,
    /// Port every node agent listens on
    pub rpc_port: u16,
    pub rpc_timeouts: Timeouts,
    pub node_refresh_interval: Duration,
    /// Requeue period after a successful reconcile
    pub resync_interval: Duration,
    /// Only reconcile Services in this namespace when set
    pub namespace: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let host_ip = lookup("HOST_IP")
            .ok_or_else(|| ControllerError::InvalidConfig("HOST_IP environment variable is required".to_string()))?;
        let host_ip = host_ip
            .parse()
            .map_err(|_| ControllerError::InvalidConfig(format!("HOST_IP is not an IPv4 address: {host_ip}")))?;

        Ok(Self {
            host_ip,
            gateway_url: lookup("CLOUD_GATEWAY_URL").unwrap_or_else(|| DEFAULT_GATEWAY_URL.to_string()),
            rpc_port: parse(&lookup, "RPC_PORT", DEFAULT_RPC_PORT)?,
            rpc_timeouts: Timeouts {
                connect: Duration::from_secs(parse(&lookup, "RPC_CONNECT_TIMEOUT_SECS", 5)?),
                request: Duration::from_secs(parse(&lookup, "RPC_TIMEOUT_SECS", 30)?),
            },
            node_refresh_interval: Duration::from_secs(parse(&lookup, "NODE_REFRESH_INTERVAL_SECS", 30)?),
            resync_interval: Duration::from_secs(parse(&lookup, "RESYNC_INTERVAL_SECS", 60)?),
            namespace: lookup("WATCH_NAMESPACE").filter(|ns| !ns.is_empty()),
        })
    }

    pub fn log(&self) {
        info!("Configuration:");
        info!("  Host IP: {}", self.host_ip);
        info!("  ENI gateway URL: {}", self.gateway_url);
        info!("  Node agent port: {}", self.rpc_port);
        info!("  RPC connect timeout: {:?}", self.rpc_timeouts.connect);
        info!("  RPC timeout: {:?}", self.rpc_timeouts.request);
        info!("  Node refresh interval: {:?}", self.node_refresh_interval);
        info!("  Resync interval: {:?}", self.resync_interval);
        info!("  Namespace: {}", self.namespace.as_deref().unwrap_or("all namespaces"));
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, ControllerError> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ControllerError::InvalidConfig(format!("{key} has an invalid value: {raw}"))),
        None => Ok(default),
    }
}

//! Node Agent
//!
//! Runs on every load-balancer node:
//! - Keeps a buffer of spare private IPs on managed ENIs
//! - Deletes leaked managed ENIs left behind by earlier runs
//! - Wires floating IPs into host policy routing on request of the
//!   floating-IP controller
//!
//! The RPC surface is served over HTTP on `RPC_PORT`.

mod config;
mod eni_manager;
mod error;
mod server;
mod service;

#[cfg(test)]
mod eni_manager_test;

use crate::config::Config;
use crate::eni_manager::EniManager;
use crate::service::AgentService;
use eni_gateway_client::{EniGatewayClient, EniGatewayTrait};
use node_agent_client::NodeAgentClient;
use policy_router::{PolicyRouter, RouterConfig};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

const INIT_SETUP_ATTEMPTS: u32 = 3;
const INIT_SETUP_DELAY: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting Node Agent");

    let config = Config::from_env()?;
    config.log();

    let gateway: Arc<dyn EniGatewayTrait> =
        Arc::new(EniGatewayClient::new(config.gateway_url.clone())?.with_instance(config.instance_id.clone()));
    let router = Arc::new(PolicyRouter::system(RouterConfig {
        mtu: config.eni_mtu,
        ..RouterConfig::default()
    })?);

    let limits = EniManager::init_limits(gateway.as_ref(), config.max_eni, config.min_private_ip).await?;
    let manager = Arc::new(EniManager::new(
        gateway,
        router.clone(),
        limits,
        config.leaked_eni_grace,
    ));

    manager.init_node(INIT_SETUP_ATTEMPTS, INIT_SETUP_DELAY).await?;

    tokio::spawn(manager.clone().run_capacity_loop(config.eni_reconcile_interval));
    tokio::spawn(manager.clone().run_leak_cleanup_loop(config.leaked_eni_cleanup_interval));

    let endpoint = NodeAgentClient::node_url(config.host_ip, config.rpc_port);
    let agent = Arc::new(AgentService::new(endpoint, manager, router));

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.rpc_port));
    let listener = server::bind(addr).await?;
    server::serve(listener, agent).await?;

    Ok(())
}

//! Floating-IP Ownership Controller
//!
//! Runs on every load-balancer node and keeps each managed Service's
//! floating private IP bound to the node that runs the Service's primary
//! replica. Ownership is recorded in Service annotations; each instance
//! derives its own role from them on every reconcile.

mod annotations;
mod backoff;
mod cache;
mod config;
mod controller;
mod error;
mod events;
mod reconciler;
mod registry;
mod role;
mod store;
mod watcher;

#[cfg(test)]
mod test_utils;

use crate::config::Config;
use crate::controller::Controller;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("rustls crypto provider already installed");
    }

    info!("Starting floating-IP controller");

    let config = Config::from_env()?;
    config.log();

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}

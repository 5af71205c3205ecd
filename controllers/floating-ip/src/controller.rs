//! Controller wiring
//!
//! Builds the registry, reconciler and event publisher for this node and
//! runs the Service watcher, the Node watcher and the registry refresh
//! loop as background tasks.

use crate::config::Config;
use crate::error::ControllerError;
use crate::events::KubeEventPublisher;
use crate::reconciler::Reconciler;
use crate::registry::{HttpConnector, NodeRegistry};
use crate::store::KubeStore;
use crate::watcher::{self, Context};
use eni_gateway_client::EniGatewayClient;
use k8s_openapi::api::core::v1::{Node, Service};
use kube::{Api, Client};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct Controller {
    service_watcher: JoinHandle<Result<(), ControllerError>>,
    node_watcher: JoinHandle<Result<(), ControllerError>>,
    registry_refresh: JoinHandle<()>,
}

impl Controller {
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        info!("Initializing floating-IP controller");

        let client = Client::try_default().await?;
        let gateway = EniGatewayClient::new(config.gateway_url.clone())?;

        let connector = HttpConnector {
            port: config.rpc_port,
            timeouts: config.rpc_timeouts,
        };
        let registry = Arc::new(NodeRegistry::new(Arc::new(connector)));

        let reconciler = Arc::new(Reconciler::new(
            config.host_ip,
            Arc::new(KubeStore::new(client.clone())),
            Arc::new(gateway),
            registry.clone(),
            config.resync_interval,
        ));

        // the local agent may still be starting; reconciles register it later
        if let Err(e) = reconciler.warm_up().await {
            warn!(host_ip = %config.host_ip, error = %e, "Failed to warm floating ip cache");
        }

        let services: Api<Service> = match config.namespace.as_deref() {
            Some(namespace) => Api::namespaced(client.clone(), namespace),
            None => Api::all(client.clone()),
        };
        let nodes: Api<Node> = Api::all(client.clone());
        let ctx = Arc::new(Context {
            reconciler,
            events: Arc::new(KubeEventPublisher::new(client, config.host_ip.to_string())),
        });

        let service_watcher = tokio::spawn(watcher::watch_services(services, ctx));
        let node_watcher = tokio::spawn(watcher::watch_nodes(nodes, registry.clone()));
        let registry_refresh = tokio::spawn(registry.run_refresh_loop(config.node_refresh_interval));

        Ok(Self {
            service_watcher,
            node_watcher,
            registry_refresh,
        })
    }

    /// Run until a background task exits
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Floating-IP controller running");

        tokio::select! {
            result = &mut self.service_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("Service watcher panicked: {e}")))??;
            }
            result = &mut self.node_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("Node watcher panicked: {e}")))??;
            }
            result = &mut self.registry_refresh => {
                result.map_err(|e| ControllerError::Watch(format!("Registry refresh panicked: {e}")))?;
            }
        }

        Ok(())
    }
}

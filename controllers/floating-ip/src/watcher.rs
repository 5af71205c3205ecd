//! Kubernetes watchers
//!
//! - Services run through `kube_runtime::Controller`: every managed Service
//!   is reconciled from this node's point of view and requeued after the
//!   resync interval, or after a per-Service backoff when it fails.
//! - Nodes feed the Node Registry: an applied Node is registered by its
//!   InternalIP, a deleted Node is dropped.

use crate::annotations::service_key;
use crate::error::ControllerError;
use crate::events::{actions, error_reason, outcome_event, EventPublisher};
use crate::reconciler::Reconciler;
use crate::registry::NodeRegistry;
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::{Node as KubeNode, Service};
use kube::runtime::events::EventType;
use kube::{Api, Resource, ResourceExt};
use kube_runtime::controller::{Action, Config as ControllerConfig};
use kube_runtime::{watcher, Controller};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Shared state handed to every Service reconcile
pub struct Context {
    pub reconciler: Arc<Reconciler>,
    pub events: Arc<dyn EventPublisher>,
}

async fn reconcile(service: Arc<Service>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    let key = service_key(&service);
    let resource_ref = service.object_ref(&());
    debug!(service = %key, "Reconciling service");

    match ctx.reconciler.reconcile(&service).await {
        Ok(outcome) => {
            ctx.reconciler.backoff().on_success(&key);
            if let Some((reason, action, note)) = outcome_event(&outcome) {
                ctx.events
                    .publish(&resource_ref, EventType::Normal, reason, action, Some(note))
                    .await;
            }
            debug!(service = %key, ?outcome, "Reconciled service");
            Ok(Action::requeue(ctx.reconciler.resync_interval()))
        }
        Err(e) => {
            ctx.events
                .publish(
                    &resource_ref,
                    EventType::Warning,
                    error_reason(&e),
                    actions::RECONCILE,
                    Some(e.to_string()),
                )
                .await;
            Err(e)
        }
    }
}

fn error_policy(service: Arc<Service>, error: &ControllerError, ctx: Arc<Context>) -> Action {
    let key = service_key(&service);
    let retry_in = ctx.reconciler.backoff().on_error(&key);
    error!(service = %key, error = %error, ?retry_in, "Reconciliation failed");
    Action::requeue(retry_in)
}

/// Reconcile Services until the watch stream ends
pub async fn watch_services(api: Api<Service>, ctx: Arc<Context>) -> Result<(), ControllerError> {
    info!("Starting Service watcher");

    let controller_config = ControllerConfig::default()
        .debounce(Duration::from_secs(1))
        .concurrency(3);

    Controller::new(api, watcher::Config::default())
        .with_config(controller_config)
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            if let Err(e) = res {
                warn!("Service controller error: {}", e);
            }
        })
        .await;

    Ok(())
}

/// First InternalIP of a Node
pub fn internal_ip(node: &KubeNode) -> Option<Ipv4Addr> {
    node.status
        .as_ref()?
        .addresses
        .as_ref()?
        .iter()
        .filter(|address| address.type_ == "InternalIP")
        .find_map(|address| address.address.parse().ok())
}

/// Register a Node that is not yet known; failures are retried on the
/// Node's next event
pub async fn on_node_applied(registry: &NodeRegistry, node: &KubeNode) {
    let Some(node_ip) = internal_ip(node) else {
        debug!(node = %node.name_any(), "Node has no InternalIP yet");
        return;
    };
    if registry.contains(node_ip).await {
        return;
    }
    if let Err(e) = registry.register(node_ip).await {
        warn!(node = %node.name_any(), %node_ip, error = %e, "Failed to register node");
    }
}

pub async fn on_node_deleted(registry: &NodeRegistry, node: &KubeNode) {
    if let Some(node_ip) = internal_ip(node) {
        registry.remove_node(node_ip).await;
    }
}

/// Keep the registry in step with cluster Nodes
pub async fn watch_nodes(api: Api<KubeNode>, registry: Arc<NodeRegistry>) -> Result<(), ControllerError> {
    info!("Starting Node watcher");

    let mut stream = Box::pin(watcher(api, watcher::Config::default()));
    while let Some(event) = stream
        .try_next()
        .await
        .map_err(|e| ControllerError::Watch(format!("Node watcher stream error: {e}")))?
    {
        match event {
            watcher::Event::Apply(node) | watcher::Event::InitApply(node) => {
                on_node_applied(&registry, &node).await;
            }
            watcher::Event::Delete(node) => {
                info!(node = %node.name_any(), "Node deleted");
                on_node_deleted(&registry, &node).await;
            }
            watcher::Event::Init => debug!("Node watcher initialized"),
            watcher::Event::InitDone => info!("Node watcher initialization complete"),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::PRIVATE_IP;
    use crate::test_utils::{managed_service, MockConnector};
    use async_trait::async_trait;
    use eni_gateway_client::MockEniGateway;
    use eni_gateway_client::mock::helpers::eni_with_usage;
    use k8s_openapi::api::core::v1::{NodeAddress, NodeStatus, ObjectReference};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use node_agent_client::MockNodeAgent;
    use std::sync::Mutex;

    const NODE_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 1, 5);

    #[derive(Default)]
    struct RecordingPublisher {
        reasons: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EventPublisher for RecordingPublisher {
        async fn publish(
            &self,
            _resource_ref: &ObjectReference,
            _type_: EventType,
            reason: &str,
            _action: &str,
            _note: Option<String>,
        ) {
            self.reasons.lock().unwrap().push(reason.to_string());
        }
    }

    fn kube_node(addresses: &[(&str, &str)]) -> KubeNode {
        KubeNode {
            metadata: ObjectMeta {
                name: Some("node-a".to_string()),
                ..Default::default()
            },
            status: Some(NodeStatus {
                addresses: Some(
                    addresses
                        .iter()
                        .map(|(type_, address)| NodeAddress {
                            type_: type_.to_string(),
                            address: address.to_string(),
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn registry_with_agent() -> Arc<NodeRegistry> {
        let agent = MockNodeAgent::new("mock://a", 6);
        agent.add_eni(eni_with_usage("eni-a", 1, 1));
        let connector = Arc::new(MockConnector::default());
        connector.add(NODE_IP, agent);
        Arc::new(NodeRegistry::new(connector))
    }

    fn context(events: Arc<RecordingPublisher>) -> Arc<Context> {
        let reconciler = Reconciler::new(
            NODE_IP,
            Arc::new(crate::test_utils::FakeServiceStore::default()),
            Arc::new(MockEniGateway::new(4, 6)),
            registry_with_agent(),
            Duration::from_secs(60),
        );
        Arc::new(Context {
            reconciler: Arc::new(reconciler),
            events,
        })
    }

    #[test]
    fn test_internal_ip() {
        let node = kube_node(&[("Hostname", "node-a"), ("InternalIP", "10.0.1.5")]);
        assert_eq!(internal_ip(&node), Some(NODE_IP));

        assert_eq!(internal_ip(&kube_node(&[("ExternalIP", "1.2.3.4")])), None);
        assert_eq!(internal_ip(&KubeNode::default()), None);
    }

    #[tokio::test]
    async fn test_node_events_drive_registry() {
        let registry = registry_with_agent();
        let node = kube_node(&[("InternalIP", "10.0.1.5")]);

        on_node_applied(&registry, &node).await;
        assert!(registry.contains(NODE_IP).await);
        // repeated events keep the existing entry
        on_node_applied(&registry, &node).await;
        assert!(registry.contains(NODE_IP).await);

        on_node_deleted(&registry, &node).await;
        assert!(!registry.contains(NODE_IP).await);

        // no agent behind this node: registration is skipped
        let unknown = kube_node(&[("InternalIP", "10.0.1.9")]);
        on_node_applied(&registry, &unknown).await;
        assert!(!registry.contains(Ipv4Addr::new(10, 0, 1, 9)).await);
    }

    #[tokio::test]
    async fn test_success_requeues_after_resync() {
        let events = Arc::new(RecordingPublisher::default());
        let ctx = context(events.clone());
        let mut service = managed_service(&[]);
        service.annotations_mut().clear();

        let action = reconcile(Arc::new(service), ctx).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(60)));
        assert!(events.reasons.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_publishes_warning_and_backs_off() {
        let events = Arc::new(RecordingPublisher::default());
        let ctx = context(events.clone());
        let service = Arc::new(managed_service(&[(PRIVATE_IP, "not-an-ip")]));

        let err = reconcile(service.clone(), ctx.clone()).await.unwrap_err();
        assert!(matches!(err, ControllerError::InconsistentState(_)));
        assert_eq!(*events.reasons.lock().unwrap(), vec!["InconsistentState".to_string()]);

        let minutes = |m: u64| Action::requeue(Duration::from_secs(m * 60));
        assert_eq!(error_policy(service.clone(), &err, ctx.clone()), minutes(1));
        assert_eq!(error_policy(service.clone(), &err, ctx.clone()), minutes(1));
        assert_eq!(error_policy(service, &err, ctx), minutes(2));
    }
}

//! Kubernetes reads and writes the reconciler depends on

use crate::error::ControllerError;
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::api::{ListParams, PostParams};
use kube::{Api, Client, ResourceExt};
use std::collections::BTreeMap;

#[async_trait::async_trait]
pub trait ServiceStore: Send + Sync {
    /// Pods in `namespace` matching `selector`, in list order
    async fn list_pods(&self, namespace: &str, selector: &BTreeMap<String, String>) -> Result<Vec<Pod>, ControllerError>;

    /// Replace the Service; conflicts when its resourceVersion is stale
    async fn replace_service(&self, service: &Service) -> Result<Service, ControllerError>;
}

/// Label selector string (`k1=v1,k2=v2`)
pub fn label_selector(selector: &BTreeMap<String, String>) -> String {
    selector
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl ServiceStore for KubeStore {
    async fn list_pods(&self, namespace: &str, selector: &BTreeMap<String, String>) -> Result<Vec<Pod>, ControllerError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = pods.list(&ListParams::default().labels(&label_selector(selector))).await?;
        Ok(list.items)
    }

    async fn replace_service(&self, service: &Service) -> Result<Service, ControllerError> {
        let namespace = service.namespace().unwrap_or_default();
        let services: Api<Service> = Api::namespaced(self.client.clone(), &namespace);
        Ok(services
            .replace(&service.name_any(), &PostParams::default(), service)
            .await?)
    }
}

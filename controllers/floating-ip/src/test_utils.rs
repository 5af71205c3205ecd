//! Test utilities for unit testing the reconciler
//!
//! In-memory stand-ins for the Kubernetes store and the agent dialer, plus
//! builders for Services and pods.

use crate::annotations::{LOADBALANCER_TYPE, LOADBALANCER_TYPE_PRIVATE_IP};
use crate::error::ControllerError;
use crate::registry::AgentConnector;
use crate::store::ServiceStore;
use k8s_openapi::api::core::v1::{Pod, PodStatus, Service, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use node_agent_client::{MockNodeAgent, NodeAgentError, NodeAgentTrait, ServingStatus};
use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

/// Connector handing out prepared mock agents
#[derive(Default)]
pub struct MockConnector {
    agents: Mutex<HashMap<Ipv4Addr, MockNodeAgent>>,
}

impl MockConnector {
    pub fn add(&self, node_ip: Ipv4Addr, agent: MockNodeAgent) {
        self.agents.lock().unwrap().insert(node_ip, agent);
    }
}

#[async_trait::async_trait]
impl AgentConnector for MockConnector {
    async fn connect(&self, node_ip: Ipv4Addr) -> Result<Arc<dyn NodeAgentTrait>, NodeAgentError> {
        let agent = self
            .agents
            .lock()
            .unwrap()
            .get(&node_ip)
            .cloned()
            .ok_or_else(|| NodeAgentError::NotServing(node_ip.to_string()))?;
        match agent.health().await? {
            ServingStatus::Serving => Ok(Arc::new(agent)),
            ServingStatus::NotServing => Err(NodeAgentError::NotServing(node_ip.to_string())),
        }
    }
}

/// Store keeping pods in list order and recording replaced Services
#[derive(Default)]
pub struct FakeServiceStore {
    pods: Mutex<Vec<Pod>>,
    replaced: Mutex<Vec<Service>>,
}

impl FakeServiceStore {
    pub fn add_pod(&self, pod: Pod) {
        self.pods.lock().unwrap().push(pod);
    }

    pub fn clear_pods(&self) {
        self.pods.lock().unwrap().clear();
    }

    /// Services written so far, oldest first
    pub fn replaced(&self) -> Vec<Service> {
        self.replaced.lock().unwrap().clone()
    }

    pub fn last_replaced(&self) -> Option<Service> {
        self.replaced.lock().unwrap().last().cloned()
    }
}

#[async_trait::async_trait]
impl ServiceStore for FakeServiceStore {
    async fn list_pods(&self, namespace: &str, selector: &BTreeMap<String, String>) -> Result<Vec<Pod>, ControllerError> {
        Ok(self
            .pods
            .lock()
            .unwrap()
            .iter()
            .filter(|pod| pod.namespace().as_deref() == Some(namespace))
            .filter(|pod| selector.iter().all(|(k, v)| pod.labels().get(k) == Some(v)))
            .cloned()
            .collect())
    }

    async fn replace_service(&self, service: &Service) -> Result<Service, ControllerError> {
        self.replaced.lock().unwrap().push(service.clone());
        Ok(service.clone())
    }
}

/// Managed Service `db/mysql` selecting `app=mysql`, with extra annotations
pub fn managed_service(annotations: &[(&str, &str)]) -> Service {
    let mut all = BTreeMap::from([(LOADBALANCER_TYPE.to_string(), LOADBALANCER_TYPE_PRIVATE_IP.to_string())]);
    all.extend(annotations.iter().map(|(k, v)| (k.to_string(), v.to_string())));
    Service {
        metadata: ObjectMeta {
            name: Some("mysql".to_string()),
            namespace: Some("db".to_string()),
            resource_version: Some("1".to_string()),
            annotations: Some(all),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(BTreeMap::from([("app".to_string(), "mysql".to_string())])),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Pod of `db/mysql` scheduled on `host_ip`
pub fn mysql_pod(name: &str, host_ip: Option<Ipv4Addr>) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("db".to_string()),
            labels: Some(BTreeMap::from([("app".to_string(), "mysql".to_string())])),
            ..Default::default()
        },
        status: Some(PodStatus {
            host_ip: host_ip.map(|ip| ip.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

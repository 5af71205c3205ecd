//! Service annotation protocol
//!
//! The ownership record of a floating IP lives on the Service itself:
//! annotations under `service.kubernetes.io/loadbalancer-`, a finalizer
//! that holds deletion until the cloud address is released, and
//! `spec.externalIPs` pointing at the floating IP.

use crate::error::ControllerError;
use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

/// Presence marks the Service as managed
pub const LOADBALANCER_TYPE: &str = "service.kubernetes.io/loadbalancer-type";
pub const LOADBALANCER_TYPE_PRIVATE_IP: &str = "private-ip";
pub const ENI_ID: &str = "service.kubernetes.io/loadbalancer-eni-id";
pub const ENI_HOST: &str = "service.kubernetes.io/loadbalancer-eni-host";
pub const PRIVATE_IP: &str = "service.kubernetes.io/loadbalancer-private-ip";
/// Operator (or placement) pin of the owning node
pub const MASTER_HOST_IP: &str = "service.kubernetes.io/loadbalancer-master-host-ip";
/// Subnet the floating IP must stay in
pub const SUBNET_ID: &str = "service.kubernetes.io/loadbalancer-subnet-id";
pub const FINALIZER: &str = "service.kubernetes.io/loadbalancer-finalizer";

/// `namespace/name` of a Service
pub fn service_key(service: &Service) -> String {
    format!("{}/{}", service.namespace().unwrap_or_default(), service.name_any())
}

/// Decoded view of a Service's ownership record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceState {
    pub key: String,
    pub namespace: String,
    pub managed: bool,
    pub deleting: bool,
    pub selector: BTreeMap<String, String>,
    pub master_host_ip: Option<Ipv4Addr>,
    pub private_ip: Option<Ipv4Addr>,
    pub eni_id: Option<String>,
    pub eni_host: Option<Ipv4Addr>,
    pub subnet_id: Option<String>,
    pub has_finalizer: bool,
}

impl ServiceState {
    /// Decode the annotations; malformed addresses are integrity errors
    pub fn from_service(service: &Service) -> Result<Self, ControllerError> {
        let key = service_key(service);
        let annotations = service.annotations();
        let value = |name: &str| annotations.get(name).filter(|v| !v.is_empty()).cloned();
        let address = |name: &str| -> Result<Option<Ipv4Addr>, ControllerError> {
            value(name)
                .map(|raw| {
                    raw.parse().map_err(|_| {
                        ControllerError::InconsistentState(format!("{key}: {name} is not an IPv4 address: {raw}"))
                    })
                })
                .transpose()
        };

        Ok(Self {
            namespace: service.namespace().unwrap_or_default(),
            managed: annotations.contains_key(LOADBALANCER_TYPE),
            deleting: service.metadata.deletion_timestamp.is_some(),
            selector: service
                .spec
                .as_ref()
                .and_then(|spec| spec.selector.clone())
                .unwrap_or_default(),
            master_host_ip: address(MASTER_HOST_IP)?,
            private_ip: address(PRIVATE_IP)?,
            eni_id: value(ENI_ID),
            eni_host: address(ENI_HOST)?,
            subnet_id: value(SUBNET_ID),
            has_finalizer: service.finalizers().iter().any(|f| f == FINALIZER),
            key,
        })
    }

    pub fn require_private_ip(&self) -> Result<Ipv4Addr, ControllerError> {
        self.private_ip
            .ok_or_else(|| ControllerError::InconsistentState(format!("{}: private ip not found", self.key)))
    }

    /// ENI currently holding the floating IP; required once an IP is recorded
    pub fn require_eni_id(&self) -> Result<&str, ControllerError> {
        self.eni_id.as_deref().ok_or_else(|| {
            ControllerError::InconsistentState(format!("{}: private ip exists but eni id not found", self.key))
        })
    }
}

/// Where a floating IP is bound
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub private_ip: Ipv4Addr,
    pub eni_id: String,
    pub eni_host: Ipv4Addr,
    pub subnet_id: String,
}

/// Record `binding` on the Service, add the finalizer and expose the IP
pub fn apply_binding(service: &mut Service, binding: &Binding) {
    let annotations = service.annotations_mut();
    annotations.insert(ENI_ID.to_string(), binding.eni_id.clone());
    annotations.insert(ENI_HOST.to_string(), binding.eni_host.to_string());
    annotations.insert(PRIVATE_IP.to_string(), binding.private_ip.to_string());
    annotations.insert(SUBNET_ID.to_string(), binding.subnet_id.clone());

    let finalizers = service.finalizers_mut();
    if !finalizers.iter().any(|f| f == FINALIZER) {
        finalizers.push(FINALIZER.to_string());
    }

    service.spec.get_or_insert_with(Default::default).external_ips = Some(vec![binding.private_ip.to_string()]);
}

/// Drop the binding, the external IP and the finalizer
pub fn release_binding(service: &mut Service) {
    let annotations = service.annotations_mut();
    for key in [ENI_ID, ENI_HOST, PRIVATE_IP] {
        annotations.remove(key);
    }
    service.finalizers_mut().retain(|f| f != FINALIZER);
    if let Some(spec) = service.spec.as_mut() {
        spec.external_ips = None;
    }
}

/// Pin the Service to `node_ip`
pub fn set_master_host(service: &mut Service, node_ip: Ipv4Addr) {
    service
        .annotations_mut()
        .insert(MASTER_HOST_IP.to_string(), node_ip.to_string());
}

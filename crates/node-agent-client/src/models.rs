//! Node agent wire models
//!
//! Every request and response carries the caller's `request_id` so a
//! single reconcile can be followed across the controller and the agent
//! logs.

use eni_gateway_client::EniMetadata;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;

/// Generate a fresh request id
#[must_use]
pub fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Snapshot of one node's private IP capacity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeResource {
    pub total_private_ips: usize,
    pub used_private_ips: usize,
    /// subnet id -> eni id -> ENI
    #[serde(default)]
    pub subnets: BTreeMap<String, BTreeMap<String, EniMetadata>>,
}

impl NodeResource {
    /// Build the snapshot from the node's managed ENIs
    pub fn from_enis<'a>(enis: impl IntoIterator<Item = &'a EniMetadata>, max_ips_per_eni: usize) -> Self {
        let mut resource = Self::default();
        for eni in enis {
            resource.total_private_ips += max_ips_per_eni;
            resource.used_private_ips += eni.ipv4_addresses.len();
            resource
                .subnets
                .entry(eni.subnet_id.clone())
                .or_default()
                .insert(eni.eni_id.clone(), eni.clone());
        }
        resource
    }

    /// Private IPs that can still be assigned
    #[must_use]
    pub fn spare(&self) -> usize {
        self.total_private_ips.saturating_sub(self.used_private_ips)
    }

    /// Whether any of the node's ENIs sits in `subnet_id`
    #[must_use]
    pub fn has_subnet(&self, subnet_id: &str) -> bool {
        self.subnets.contains_key(subnet_id)
    }
}

/// Health of a node agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServingStatus {
    Serving,
    NotServing,
}

/// Body of `GET /healthz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ServingStatus,
}

/// Request body for calls that take no arguments besides the request id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRequest {
    pub request_id: String,
}

/// Response body of `POST /v1/eni/busiest`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusiestEniResponse {
    pub request_id: String,
    pub eni: EniMetadata,
}

/// Response body of `POST /v1/eni/managed`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedEnisResponse {
    pub request_id: String,
    pub enis: HashMap<String, EniMetadata>,
}

/// Response body of `POST /v1/node/resource`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeResourceResponse {
    pub request_id: String,
    pub resource: NodeResource,
}

/// Request body of `POST /v1/service/setup` and `/v1/service/clean`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceNetworkRequest {
    pub request_id: String,
    pub private_ip: Ipv4Addr,
    pub eni: EniMetadata,
}

/// Acknowledgement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckResponse {
    pub request_id: String,
}

/// Error class carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ResourceUnavailable,
    InvalidRequest,
    Internal,
}

/// Body returned with every non-2xx response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub request_id: String,
    pub message: String,
    pub kind: ErrorKind,
}

#[cfg(test)]
mod tests {
    use super::*;
    use eni_gateway_client::mock::helpers::{eni_with_usage, managed_eni_in_subnet};

    #[test]
    fn test_node_resource_groups_by_subnet() {
        let a = eni_with_usage("eni-a", 1, 3);
        let b = eni_with_usage("eni-b", 2, 1);
        let c = managed_eni_in_subnet("eni-c", 3, "subnet-2", vec![]);

        let resource = NodeResource::from_enis([&a, &b, &c], 6);

        assert_eq!(resource.total_private_ips, 18);
        assert_eq!(resource.used_private_ips, 4);
        assert_eq!(resource.spare(), 14);
        assert_eq!(resource.subnets["subnet-1"].len(), 2);
        assert!(resource.subnets["subnet-2"].contains_key("eni-c"));
        assert!(resource.has_subnet("subnet-2"));
        assert!(!resource.has_subnet("subnet-3"));
    }

    #[test]
    fn test_serving_status_wire_format() {
        let body = serde_json::to_string(&HealthResponse { status: ServingStatus::NotServing }).unwrap();
        assert_eq!(body, r#"{"status":"NOT_SERVING"}"#);

        let parsed: HealthResponse = serde_json::from_str(r#"{"status":"SERVING"}"#).unwrap();
        assert_eq!(parsed.status, ServingStatus::Serving);
    }

    #[test]
    fn test_error_kind_wire_format() {
        let body = serde_json::json!({
            "request_id": "r-1",
            "message": "no managed ENI",
            "kind": "resource_unavailable"
        });
        let parsed: ErrorResponse = serde_json::from_value(body).unwrap();
        assert_eq!(parsed.kind, ErrorKind::ResourceUnavailable);
    }
}

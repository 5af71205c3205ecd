//! ENI gateway data models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::Ipv4Addr;

/// Tag marking an ENI as under this system's lifecycle control
pub const TAG_ENI_MANAGED: &str = "floating-ip-lb/managed";
/// Tag carrying the instance id the ENI was created for
pub const TAG_ENI_NODE: &str = "floating-ip-lb/node";
/// Tag carrying the RFC 3339 creation time of the ENI
pub const TAG_ENI_CREATED_AT: &str = "floating-ip-lb/created-at";

/// One IPv4 address assigned to an ENI
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ipv4Address {
    pub address: Ipv4Addr,
    #[serde(default)]
    pub primary: bool,
}

impl Ipv4Address {
    /// Primary address of an ENI
    #[must_use]
    pub fn primary(address: Ipv4Addr) -> Self {
        Self { address, primary: true }
    }

    /// Secondary (movable) address
    #[must_use]
    pub fn secondary(address: Ipv4Addr) -> Self {
        Self { address, primary: false }
    }
}

/// One cloud network interface attached to (or detached from) an instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EniMetadata {
    pub eni_id: String,
    pub mac: String,
    /// Attachment slot; 0 is the instance's primary interface
    pub device_number: u32,
    pub subnet_id: String,
    pub subnet_cidr: String,
    #[serde(default)]
    pub ipv4_addresses: Vec<Ipv4Address>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    #[serde(default)]
    pub attached: bool,
}

impl EniMetadata {
    /// The instance's primary interface is never detached or freed.
    #[must_use]
    pub fn is_primary_eni(&self) -> bool {
        self.device_number == 0
    }

    /// Carries the managed tag
    #[must_use]
    pub fn is_managed(&self) -> bool {
        self.tags.contains_key(TAG_ENI_MANAGED)
    }

    /// Primary IPv4 address of the interface
    #[must_use]
    pub fn primary_ip(&self) -> Option<Ipv4Addr> {
        self.ipv4_addresses
            .iter()
            .find(|addr| addr.primary)
            .map(|addr| addr.address)
    }

    /// Secondary addresses currently assigned
    pub fn secondary_ips(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        self.ipv4_addresses
            .iter()
            .filter(|addr| !addr.primary)
            .map(|addr| addr.address)
    }

    /// Whether `ip` is assigned to this ENI
    #[must_use]
    pub fn has_address(&self, ip: Ipv4Addr) -> bool {
        self.ipv4_addresses.iter().any(|addr| addr.address == ip)
    }

    /// True when the only assigned address is the ENI's own primary address
    #[must_use]
    pub fn is_idle(&self) -> bool {
        matches!(self.ipv4_addresses.as_slice(), [only] if only.primary)
    }

    /// Parsed `created-at` tag; `None` when missing or malformed
    #[must_use]
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.tags
            .get(TAG_ENI_CREATED_AT)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|ts| ts.with_timezone(&Utc))
    }
}

/// Hardware limits of the local instance type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EniLimits {
    pub max_enis: usize,
    pub max_ipv4_per_eni: usize,
}

/// Request body for ENI allocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocEniRequest {
    pub tags: HashMap<String, String>,
}

/// Response body for ENI allocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocEniResponse {
    pub eni_id: String,
}

/// Request body for allocating secondary addresses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocIpRequest {
    pub count: usize,
}

/// Request body carrying a list of addresses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivateIpsRequest {
    pub addresses: Vec<Ipv4Addr>,
    #[serde(default)]
    pub allow_reassignment: bool,
}

/// Response body listing addresses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivateIpsResponse {
    pub addresses: Vec<Ipv4Addr>,
}

/// Request body toggling the source/destination check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDestCheckRequest {
    pub enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eni(addresses: Vec<Ipv4Address>) -> EniMetadata {
        EniMetadata {
            eni_id: "eni-1".to_string(),
            mac: "02:00:00:00:00:01".to_string(),
            device_number: 1,
            subnet_id: "subnet-a".to_string(),
            subnet_cidr: "10.0.1.0/24".to_string(),
            ipv4_addresses: addresses,
            tags: HashMap::new(),
            attached: true,
        }
    }

    #[test]
    fn test_idle_requires_single_primary_address() {
        let primary = Ipv4Address::primary(Ipv4Addr::new(10, 0, 1, 10));
        let secondary = Ipv4Address::secondary(Ipv4Addr::new(10, 0, 1, 11));

        assert!(eni(vec![primary.clone()]).is_idle());
        assert!(!eni(vec![primary, secondary.clone()]).is_idle());
        assert!(!eni(vec![secondary]).is_idle());
        assert!(!eni(vec![]).is_idle());
    }

    #[test]
    fn test_created_at_parsing() {
        let mut meta = eni(vec![]);
        assert!(meta.created_at().is_none());

        meta.tags.insert(TAG_ENI_CREATED_AT.to_string(), "not-a-date".to_string());
        assert!(meta.created_at().is_none());

        meta.tags.insert(TAG_ENI_CREATED_AT.to_string(), "2024-03-01T10:00:00Z".to_string());
        let ts = meta.created_at().unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-03-01T10:00:00+00:00");
    }

    #[test]
    fn test_deserialize_defaults() {
        let json = r#"{
            "eni_id": "eni-2",
            "mac": "02:00:00:00:00:02",
            "device_number": 2,
            "subnet_id": "subnet-b",
            "subnet_cidr": "10.0.2.0/24"
        }"#;
        let meta: EniMetadata = serde_json::from_str(json).unwrap();
        assert!(meta.ipv4_addresses.is_empty());
        assert!(!meta.attached);
        assert!(!meta.is_managed());
        assert_eq!(meta.primary_ip(), None);
    }
}

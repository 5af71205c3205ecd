//! Builders for ENI fixtures used by mock-backed tests

use crate::models::*;
use std::collections::HashMap;
use std::net::Ipv4Addr;

/// Subnet used for ENIs allocated by the mock
pub const DEFAULT_SUBNET_ID: &str = "subnet-1";

/// Address `host` inside the /24 the mock associates with `subnet_id`
///
/// `subnet-N` maps to `10.0.N.0/24`; anything else maps to `10.0.1.0/24`.
#[must_use]
pub fn subnet_address(subnet_id: &str, host: u32) -> Ipv4Addr {
    let [_, _, _, last] = (host % 254 + 1).to_be_bytes();
    Ipv4Addr::new(10, 0, subnet_octet(subnet_id), last)
}

/// CIDR the mock associates with `subnet_id`
#[must_use]
pub fn subnet_cidr(subnet_id: &str) -> String {
    format!("10.0.{}.0/24", subnet_octet(subnet_id))
}

fn subnet_octet(subnet_id: &str) -> u8 {
    subnet_id
        .rsplit('-')
        .next()
        .and_then(|n| n.parse().ok())
        .unwrap_or(1)
}

/// Attached, managed ENI in the default subnet
#[must_use]
pub fn managed_eni(eni_id: &str, device_number: u32, addresses: Vec<Ipv4Address>) -> EniMetadata {
    managed_eni_in_subnet(eni_id, device_number, DEFAULT_SUBNET_ID, addresses)
}

/// Attached, managed ENI in `subnet_id`
#[must_use]
pub fn managed_eni_in_subnet(
    eni_id: &str,
    device_number: u32,
    subnet_id: &str,
    addresses: Vec<Ipv4Address>,
) -> EniMetadata {
    let mut tags = HashMap::new();
    tags.insert(TAG_ENI_MANAGED.to_string(), "true".to_string());
    tags.insert(TAG_ENI_CREATED_AT.to_string(), chrono::Utc::now().to_rfc3339());
    EniMetadata {
        eni_id: eni_id.to_string(),
        mac: format!("02:00:00:00:{:02x}:{:02x}", subnet_octet(subnet_id), device_number),
        device_number,
        subnet_id: subnet_id.to_string(),
        subnet_cidr: subnet_cidr(subnet_id),
        ipv4_addresses: addresses,
        tags,
        attached: true,
    }
}

/// The instance's own primary interface (device 0, untagged)
#[must_use]
pub fn unmanaged_primary_eni(eni_id: &str, address: Ipv4Addr) -> EniMetadata {
    EniMetadata {
        eni_id: eni_id.to_string(),
        mac: "02:00:00:00:00:00".to_string(),
        device_number: 0,
        subnet_id: DEFAULT_SUBNET_ID.to_string(),
        subnet_cidr: subnet_cidr(DEFAULT_SUBNET_ID),
        ipv4_addresses: vec![Ipv4Address::primary(address)],
        tags: HashMap::new(),
        attached: true,
    }
}

/// Managed ENI with `used` addresses (one primary plus `used - 1` secondaries)
#[must_use]
pub fn eni_with_usage(eni_id: &str, device_number: u32, used: u32) -> EniMetadata {
    let base = device_number * 10;
    let addresses = (0..used)
        .map(|i| {
            let address = subnet_address(DEFAULT_SUBNET_ID, base + i);
            if i == 0 {
                Ipv4Address::primary(address)
            } else {
                Ipv4Address::secondary(address)
            }
        })
        .collect();
    managed_eni(eni_id, device_number, addresses)
}

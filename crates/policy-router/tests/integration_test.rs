//! Integration tests against the host kernel
//!
//! Need root and a spare link to play the secondary ENI, e.g.:
//!
//! ```text
//! ip link add eni-test type dummy
//! ip link set eni-test address 02:00:00:00:09:01
//! ```
//!
//! TEST_ENI_MAC and TEST_ENI_CIDR override the defaults below.

#![cfg(target_os = "linux")]

use eni_gateway_client::{EniMetadata, Ipv4Address};
use policy_router::{PolicyRouter, RouterConfig};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Duration;

fn test_eni() -> EniMetadata {
    EniMetadata {
        eni_id: "eni-integration".to_string(),
        mac: std::env::var("TEST_ENI_MAC").unwrap_or_else(|_| "02:00:00:00:09:01".to_string()),
        device_number: 9,
        subnet_id: "subnet-9".to_string(),
        subnet_cidr: std::env::var("TEST_ENI_CIDR").unwrap_or_else(|_| "10.99.0.0/24".to_string()),
        ipv4_addresses: vec![Ipv4Address::primary(Ipv4Addr::new(10, 99, 0, 10))],
        tags: HashMap::new(),
        attached: true,
    }
}

fn router() -> PolicyRouter {
    PolicyRouter::system(RouterConfig {
        mtu: 1500,
        link_lookup_attempts: 1,
        link_lookup_interval: Duration::from_millis(10),
    })
    .expect("Failed to bind router to host")
}

#[tokio::test]
#[ignore] // Requires root and a test link
async fn test_eni_setup_and_clean_are_idempotent() {
    let router = router();
    let eni = test_eni();

    router.setup_network_for_eni(&eni).await.expect("First ENI setup failed");
    router.setup_network_for_eni(&eni).await.expect("Repeated ENI setup failed");

    router.clean_network_for_eni(&eni).await.expect("ENI cleanup failed");
    router.clean_network_for_eni(&eni).await.expect("Repeated ENI cleanup failed");
}

#[tokio::test]
#[ignore]
async fn test_service_setup_and_clean_are_idempotent() {
    let router = router();
    let eni = test_eni();
    let floating_ip = Ipv4Addr::new(10, 99, 0, 50);

    router.setup_network_for_eni(&eni).await.expect("ENI setup failed");

    router
        .setup_network_for_service(floating_ip, &eni)
        .await
        .expect("Service setup failed");
    router
        .setup_network_for_service(floating_ip, &eni)
        .await
        .expect("Repeated service setup failed");

    router
        .clean_network_for_service(floating_ip, &eni)
        .await
        .expect("Service cleanup failed");
    // nothing left to remove
    router
        .clean_network_for_service(floating_ip, &eni)
        .await
        .expect("Cleaning an unconfigured floating ip failed");

    router.clean_network_for_eni(&eni).await.expect("ENI cleanup failed");
}

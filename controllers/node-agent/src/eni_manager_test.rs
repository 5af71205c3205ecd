//! Unit tests for the ENI capacity manager

#[cfg(test)]
mod tests {
    use crate::eni_manager::*;
    use crate::error::AgentError;
    use chrono::Utc;
    use eni_gateway_client::mock::helpers::{eni_with_usage, managed_eni, unmanaged_primary_eni};
    use eni_gateway_client::{EniMetadata, Ipv4Address, MockEniGateway, TAG_ENI_CREATED_AT};
    use policy_router::fake::{FakeIptables, FakeNetlink, FakeSysctl};
    use policy_router::{rules, PolicyRouter, RouterConfig};
    use std::net::Ipv4Addr;
    use std::sync::Arc;
    use std::time::Duration;

    const MAX_IPS: usize = 6;

    struct Node {
        manager: EniManager,
        gateway: MockEniGateway,
        netlink: FakeNetlink,
    }

    fn limits(max_eni: usize, min_private_ip: usize) -> CapacityLimits {
        CapacityLimits {
            max_eni,
            max_ips_per_eni: MAX_IPS,
            min_private_ip,
        }
    }

    fn node(limits: CapacityLimits) -> Node {
        let gateway = MockEniGateway::new(limits.max_eni, MAX_IPS);
        gateway.add_eni(unmanaged_primary_eni("eni-primary", Ipv4Addr::new(10, 0, 1, 5)));
        node_with(limits, gateway)
    }

    fn node_with(limits: CapacityLimits, gateway: MockEniGateway) -> Node {
        let netlink = FakeNetlink::new();
        // links for the first few secondary device slots
        for device in 1..=4u32 {
            netlink.add_link(device + 2, &format!("eth{device}"), &format!("02:00:00:00:01:{device:02x}"));
        }
        let router = PolicyRouter::new(
            Arc::new(netlink.clone()),
            Arc::new(FakeIptables::new()),
            Arc::new(FakeSysctl::new()),
            RouterConfig {
                mtu: 9001,
                link_lookup_attempts: 1,
                link_lookup_interval: Duration::ZERO,
            },
        );
        let manager = EniManager::new(
            Arc::new(gateway.clone()),
            Arc::new(router),
            limits,
            Duration::from_secs(600),
        );
        Node { manager, gateway, netlink }
    }

    fn with_created_at(mut eni: EniMetadata, created_at: Option<&str>) -> EniMetadata {
        match created_at {
            Some(ts) => eni.tags.insert(TAG_ENI_CREATED_AT.to_string(), ts.to_string()),
            None => eni.tags.remove(TAG_ENI_CREATED_AT),
        };
        eni
    }

    fn detached(mut eni: EniMetadata) -> EniMetadata {
        eni.attached = false;
        eni
    }

    #[test]
    fn test_resolve_limits() {
        // no overrides: instance limit, floor of one
        assert_eq!(CapacityLimits::resolve(4, 6, -1, 1), CapacityLimits { max_eni: 4, max_ips_per_eni: 6, min_private_ip: 1 });
        // MAX_ENI lowers the limit; MIN_PRIVATE_IP below 1 is ignored
        assert_eq!(CapacityLimits::resolve(4, 6, 2, 0), CapacityLimits { max_eni: 2, max_ips_per_eni: 6, min_private_ip: 1 });
        // MAX_ENI never raises it; MIN_PRIVATE_IP is clamped to one ENI
        assert_eq!(CapacityLimits::resolve(4, 6, 8, 10), CapacityLimits { max_eni: 4, max_ips_per_eni: 6, min_private_ip: 6 });
        assert_eq!(CapacityLimits::resolve(4, 6, 4, 3).max_eni, 4);
        assert_eq!(CapacityLimits::resolve(4, 6, -1, 2).max_spare(), 8);
    }

    #[tokio::test]
    async fn test_init_limits_reads_instance_limits() {
        let gateway = MockEniGateway::new(3, 10);
        let limits = EniManager::init_limits(&gateway, 2, 4).await.unwrap();
        assert_eq!(limits, CapacityLimits { max_eni: 2, max_ips_per_eni: 10, min_private_ip: 4 });

        let broken = MockEniGateway::new(0, 10);
        let err = EniManager::init_limits(&broken, -1, 1).await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidConfig(_)));
    }

    #[test]
    fn test_select_busiest_prefers_most_used_under_limit() {
        let a = eni_with_usage("eni-a", 1, 3);
        let b = eni_with_usage("eni-b", 2, 1);
        assert_eq!(select_busiest(&[b.clone(), a.clone()], MAX_IPS).map(|e| e.eni_id.as_str()), Some("eni-a"));

        // full ENIs are skipped
        let full = eni_with_usage("eni-c", 3, 6);
        assert_eq!(select_busiest(&[full.clone(), b.clone()], MAX_IPS).map(|e| e.eni_id.as_str()), Some("eni-b"));
        assert!(select_busiest(&[full], MAX_IPS).is_none());
        assert!(select_busiest(&[], MAX_IPS).is_none());
    }

    #[test]
    fn test_select_busiest_is_deterministic_on_ties() {
        let x = eni_with_usage("eni-x", 1, 2);
        let y = eni_with_usage("eni-y", 2, 2);
        let first = select_busiest(&[x.clone(), y.clone()], MAX_IPS).map(|e| e.eni_id.clone());
        let second = select_busiest(&[y, x], MAX_IPS).map(|e| e.eni_id.clone());
        assert_eq!(first.as_deref(), Some("eni-x"));
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_choose_busiest_eni_ignores_unmanaged() {
        let node = node(limits(4, 1));
        node.gateway.add_eni(eni_with_usage("eni-a", 1, 3));
        node.gateway.add_eni(eni_with_usage("eni-b", 2, 1));

        let eni = node.manager.choose_busiest_eni().await.unwrap();
        assert_eq!(eni.eni_id, "eni-a");
    }

    #[tokio::test]
    async fn test_choose_busiest_eni_without_managed_eni() {
        let node = node(limits(4, 1));

        let err = node.manager.choose_busiest_eni().await.unwrap_err();
        assert!(matches!(err, AgentError::ResourceUnavailable(msg) if msg.contains("no managed ENI")));
    }

    #[tokio::test]
    async fn test_ensure_capacity_allocates_below_floor() {
        let node = node(limits(4, 1));
        node.manager.init_node(1, Duration::ZERO).await.unwrap();
        assert!(!node.manager.is_ready());

        let action = node.manager.ensure_capacity().await.unwrap();

        let CapacityAction::Allocated(eni_id) = &action else {
            panic!("expected an allocation, got {action:?}");
        };
        let eni = node.gateway.eni(eni_id).unwrap();
        assert!(eni.is_managed());
        assert!(node.netlink.snapshot().rules.contains(&rules::connmark_rule(&eni)));
        assert!(node.manager.is_ready());

        // one ENI of spare capacity is now in place
        assert_eq!(node.manager.ensure_capacity().await.unwrap(), CapacityAction::Steady);
    }

    #[tokio::test]
    async fn test_ensure_capacity_respects_eni_limit() {
        let node = node(limits(2, 1));
        node.gateway.add_eni(eni_with_usage("eni-a", 1, 6));

        let action = node.manager.ensure_capacity().await.unwrap();

        assert_eq!(action, CapacityAction::AtEniLimit);
        assert!(!node.gateway.calls().iter().any(|call| call.starts_with("alloc_eni")));
    }

    #[tokio::test]
    async fn test_ensure_capacity_frees_idle_eni_above_ceiling() {
        let node = node(limits(4, 1));
        node.gateway.add_eni(eni_with_usage("eni-a", 1, 3));
        node.gateway.add_eni(eni_with_usage("eni-b", 2, 1));

        // spare = 3 + 5 = 8 > 1 + 6
        let action = node.manager.ensure_capacity().await.unwrap();

        assert_eq!(action, CapacityAction::Freed("eni-b".to_string()));
        assert!(node.gateway.eni("eni-b").is_none());
        assert!(node.gateway.eni("eni-a").is_some());
    }

    #[tokio::test]
    async fn test_ensure_capacity_spares_eni_chosen_for_placement() {
        let node = node(limits(6, 1));
        node.gateway.add_eni(eni_with_usage("eni-a", 1, 1));
        node.gateway.add_eni(eni_with_usage("eni-b", 2, 1));

        let chosen = node.manager.choose_busiest_eni().await.unwrap();
        assert_eq!(chosen.eni_id, "eni-a");

        // both idle and spare = 10 > 1 + 6: the other end of the pool goes
        let action = node.manager.ensure_capacity().await.unwrap();
        assert_eq!(action, CapacityAction::Freed("eni-b".to_string()));
        assert!(node.gateway.eni("eni-a").is_some());
    }

    #[tokio::test]
    async fn test_concurrent_lookups_and_capacity_pass() {
        let node = Arc::new(node(limits(6, 1)));
        node.gateway.add_eni(eni_with_usage("eni-a", 1, 1));
        node.gateway.add_eni(eni_with_usage("eni-b", 2, 1));

        let capacity = {
            let node = node.clone();
            tokio::spawn(async move { node.manager.ensure_capacity().await })
        };
        let lookup = {
            let node = node.clone();
            tokio::spawn(async move { node.manager.choose_busiest_eni().await })
        };

        assert_eq!(capacity.await.unwrap().unwrap(), CapacityAction::Freed("eni-b".to_string()));
        assert_eq!(lookup.await.unwrap().unwrap().eni_id, "eni-a");
    }

    #[tokio::test]
    async fn test_ensure_capacity_never_frees_busy_eni() {
        let node = node(limits(4, 1));
        node.gateway.add_eni(eni_with_usage("eni-a", 1, 2));
        node.gateway.add_eni(eni_with_usage("eni-b", 2, 2));

        let action = node.manager.ensure_capacity().await.unwrap();

        assert_eq!(action, CapacityAction::NoIdleEni);
        assert_eq!(node.gateway.eni_ids(), vec!["eni-a", "eni-b", "eni-primary"]);
    }

    #[tokio::test]
    async fn test_ensure_capacity_within_bounds_is_steady() {
        let node = node(limits(4, 1));
        node.gateway.add_eni(eni_with_usage("eni-a", 1, 1));

        assert_eq!(node.manager.ensure_capacity().await.unwrap(), CapacityAction::Steady);
        let calls = node.gateway.calls();
        assert!(!calls.iter().any(|call| call.starts_with("alloc_eni") || call.starts_with("free_eni")));
    }

    #[tokio::test]
    async fn test_ensure_capacity_gateway_failure_skips_tick() {
        let node = node(limits(4, 1));
        node.gateway.fail_next("describe_all_enis");

        assert!(node.manager.ensure_capacity().await.is_err());
        assert!(!node.manager.is_ready());
    }

    #[tokio::test]
    async fn test_failed_init_keeps_agent_not_serving() {
        let node = node(limits(4, 1));
        node.gateway.add_eni(eni_with_usage("eni-a", 1, 1));
        node.gateway.fail_next("modify_source_dest_check");

        assert!(node.manager.init_node(1, Duration::ZERO).await.is_err());
        assert_eq!(node.manager.ensure_capacity().await.unwrap(), CapacityAction::Steady);
        assert!(!node.manager.is_ready(), "capacity alone must not make the agent serve");

        node.manager.init_node(1, Duration::ZERO).await.unwrap();
        node.manager.ensure_capacity().await.unwrap();
        assert!(node.manager.is_ready());
    }

    #[test]
    fn test_is_deletable_leak() {
        let now = Utc::now();
        let grace = Duration::from_secs(600);
        let old = (now - chrono::Duration::hours(1)).to_rfc3339();
        let young = (now - chrono::Duration::minutes(1)).to_rfc3339();

        let eni = |created_at: Option<&str>| with_created_at(detached(managed_eni("eni-l", 1, vec![])), created_at);

        assert!(is_deletable_leak(&eni(Some(old.as_str())), now, grace));
        assert!(!is_deletable_leak(&eni(Some(young.as_str())), now, grace));
        assert!(!is_deletable_leak(&eni(None), now, grace));
        assert!(!is_deletable_leak(&eni(Some("yesterday")), now, grace));

        let mut attached = eni(Some(old.as_str()));
        attached.attached = true;
        assert!(!is_deletable_leak(&attached, now, grace));
    }

    #[tokio::test]
    async fn test_clean_leaked_enis_only_deletes_old_tagged_enis() {
        let node = node(limits(4, 1));
        let old = (Utc::now() - chrono::Duration::hours(1)).to_rfc3339();
        node.gateway.add_eni(with_created_at(detached(managed_eni("eni-old", 5, vec![])), Some(old.as_str())));
        node.gateway.add_eni(with_created_at(detached(managed_eni("eni-untagged", 6, vec![])), None));
        node.gateway.add_eni(detached(managed_eni("eni-fresh", 7, vec![])));

        let deleted = node.manager.clean_leaked_enis().await.unwrap();

        assert_eq!(deleted, vec!["eni-old".to_string()]);
        assert!(node.gateway.eni("eni-untagged").is_some(), "untagged ENI must survive");
        assert!(node.gateway.eni("eni-fresh").is_some(), "ENI inside the grace period must survive");
    }

    #[tokio::test]
    async fn test_describe_node_resource() {
        let node = node(limits(4, 1));
        node.gateway.add_eni(eni_with_usage("eni-a", 1, 3));
        node.gateway.add_eni(eni_with_usage("eni-b", 2, 1));

        let resource = node.manager.describe_node_resource().await.unwrap();

        assert_eq!(resource.total_private_ips, 12);
        assert_eq!(resource.used_private_ips, 4);
        let subnet = &resource.subnets["subnet-1"];
        assert_eq!(subnet.keys().collect::<Vec<_>>(), vec!["eni-a", "eni-b"]);
        assert!(!subnet.contains_key("eni-primary"));
    }

    #[tokio::test]
    async fn test_init_node_sets_up_enis_and_restores_floating_ips() {
        let node = node(limits(4, 1));
        let floating = Ipv4Addr::new(10, 0, 1, 50);
        node.gateway.add_eni(managed_eni("eni-a", 1, vec![
            Ipv4Address::primary(Ipv4Addr::new(10, 0, 1, 20)),
            Ipv4Address::secondary(floating),
        ]));
        // no link for device 9: set up fails, the rest continues
        node.gateway.add_eni(eni_with_usage("eni-z", 9, 1));

        node.manager.init_node(2, Duration::ZERO).await.unwrap();

        let eni_a = node.gateway.eni("eni-a").unwrap();
        let state = node.netlink.snapshot();
        assert!(state.rules.contains(&rules::connmark_rule(&eni_a)));
        assert!(state.addresses.values().any(|addrs| addrs.contains(&(floating, 32))));
        assert!(node.gateway.calls().contains(&"modify_source_dest_check:eni-primary=false".to_string()));
    }

    #[tokio::test]
    async fn test_init_node_requires_primary_eni() {
        let gateway = MockEniGateway::new(4, MAX_IPS);
        gateway.add_eni(eni_with_usage("eni-a", 1, 1));
        let node = node_with(limits(4, 1), gateway);

        let err = node.manager.init_node(1, Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidConfig(_)));
    }
}

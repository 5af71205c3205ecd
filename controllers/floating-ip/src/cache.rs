//! Local floating-IP binding cache
//!
//! Answers "does this node currently route the IP". Not authoritative:
//! the Service annotations are.

use eni_gateway_client::EniMetadata;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{PoisonError, RwLock};
use tracing::debug;

#[derive(Debug, Default)]
pub struct BindingCache {
    bindings: RwLock<HashMap<Ipv4Addr, EniMetadata>>,
}

impl BindingCache {
    pub fn get(&self, private_ip: Ipv4Addr) -> Option<EniMetadata> {
        self.bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&private_ip)
            .cloned()
    }

    pub fn contains(&self, private_ip: Ipv4Addr) -> bool {
        self.bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&private_ip)
    }

    pub fn insert(&self, private_ip: Ipv4Addr, eni: EniMetadata) {
        debug!(%private_ip, eni_id = %eni.eni_id, "Put floating ip to cache");
        self.bindings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(private_ip, eni);
    }

    pub fn remove(&self, private_ip: Ipv4Addr) -> Option<EniMetadata> {
        let removed = self
            .bindings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&private_ip);
        if let Some(eni) = &removed {
            debug!(%private_ip, eni_id = %eni.eni_id, "Removed floating ip from cache");
        }
        removed
    }

    /// Seed with every secondary address of `enis`; returns how many were added
    pub fn warm<'a>(&self, enis: impl IntoIterator<Item = &'a EniMetadata>) -> usize {
        let mut bindings = self.bindings.write().unwrap_or_else(PoisonError::into_inner);
        let mut added = 0;
        for eni in enis {
            for ip in eni.secondary_ips() {
                bindings.insert(ip, eni.clone());
                added += 1;
            }
        }
        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eni_gateway_client::mock::helpers::eni_with_usage;

    #[test]
    fn test_insert_get_remove() {
        let cache = BindingCache::default();
        let ip = Ipv4Addr::new(10, 0, 1, 50);
        assert!(!cache.contains(ip));

        cache.insert(ip, eni_with_usage("eni-a", 1, 1));
        assert_eq!(cache.get(ip).map(|eni| eni.eni_id), Some("eni-a".to_string()));

        assert!(cache.remove(ip).is_some());
        assert!(cache.remove(ip).is_none());
        assert!(!cache.contains(ip));
    }

    #[test]
    fn test_warm_skips_primary_addresses() {
        let cache = BindingCache::default();
        let a = eni_with_usage("eni-a", 1, 3);
        let b = eni_with_usage("eni-b", 2, 1);

        assert_eq!(cache.warm([&a, &b]), 2);

        let primary = a.primary_ip().unwrap();
        assert!(!cache.contains(primary));
        for ip in a.secondary_ips() {
            assert_eq!(cache.get(ip).map(|eni| eni.eni_id), Some("eni-a".to_string()));
        }
    }
}

//! TTL-bounded cache of IP address to service mappings, populated from
//! DNS answers and CIDR prefix matches.

use std::net::IpAddr;
use std::time::Duration;

use super::ServiceId;
use crate::cache::TimeCache;

pub struct IpCache {
    cache: TimeCache<Vec<ServiceId>>,
}

impl IpCache {
    pub fn new(evict_time: Duration) -> Self {
        Self {
            cache: TimeCache::new(evict_time),
        }
    }

    pub fn insert(&self, ip: IpAddr, services: Vec<ServiceId>, ttl_secs: i64) {
        self.cache.insert(&ip.to_string(), services, ttl_secs);
    }

    pub fn lookup(&self, ip: IpAddr) -> Option<Vec<ServiceId>> {
        self.cache.lookup(&ip.to_string())
    }

    pub fn clear_expired(&self) {
        self.cache.clear_expired();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_lookup() {
        let cache = IpCache::new(Duration::from_secs(600));
        let ip: IpAddr = "1.2.3.4".parse().unwrap();
        cache.insert(ip, vec![3], 300);
        assert_eq!(cache.lookup(ip), Some(vec![3]));
    }

    #[test]
    fn test_empty_result_is_cached() {
        let cache = IpCache::new(Duration::from_secs(600));
        let ip: IpAddr = "5.6.7.8".parse().unwrap();
        cache.insert(ip, vec![], 0);
        assert_eq!(cache.lookup(ip), Some(vec![]));
    }
}

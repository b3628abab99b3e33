//! Maps traffic to the Internet service it belongs to, by DNS domain,
//! regex, and static CIDR prefix, backed by a TTL cache of IPs learned
//! from DNS answers.

mod domain_index;
mod ipcache;
mod prefix_table;

use domain_index::DomainIndex;
use ipcache::IpCache;
use prefix_table::PrefixTable;

use refinery_capture::DnsAnswer;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use crate::error::{RefineryError, Result};

pub type ServiceId = u16;

#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub domains_string: Vec<String>,
    pub domains_regex: Vec<String>,
    pub prefixes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Service {
    pub name: String,
    pub code: ServiceId,
    pub filter: Filter,
}

/// Holds every data structure needed to classify traffic and DNS
/// answers into configured services.
pub struct ServiceMap {
    services: Vec<Service>,
    id_to_service: HashMap<ServiceId, usize>,
    name_to_service: HashMap<String, usize>,
    ip_cache: IpCache,
    prefix_table: PrefixTable,
    domain_index: DomainIndex,
}

impl ServiceMap {
    pub fn new(evict_time: Duration) -> Self {
        Self {
            services: Vec::new(),
            id_to_service: HashMap::new(),
            name_to_service: HashMap::new(),
            ip_cache: IpCache::new(evict_time),
            prefix_table: PrefixTable::new(),
            domain_index: DomainIndex::new(),
        }
    }

    /// Registers the configured services, building the prefix table and
    /// domain index in one pass. Must be called exactly once at startup.
    pub fn config_service_map(&mut self, services: Vec<Service>) -> Result<()> {
        for (i, service) in services.iter().enumerate() {
            if self.id_to_service.insert(service.code, i).is_some() {
                return Err(RefineryError::DuplicateServiceId(service.code));
            }
            if self.name_to_service.insert(service.name.clone(), i).is_some() {
                return Err(RefineryError::DuplicateServiceName(service.name.clone()));
            }
        }

        self.prefix_table.add_services(&services)?;
        self.domain_index.add_services(&services)?;
        self.services = services;

        Ok(())
    }

    /// Matches a DNS answer to a configured service and caches the
    /// resolved IP, first by domain then by regex.
    pub fn parse_dns_response(&self, answer: &DnsAnswer) {
        if let Some((_, services)) = self.domain_index.first_match(&answer.name) {
            self.ip_cache.insert(answer.ip, services, answer.ttl as i64);
        }
    }

    /// Looks up the services an IP belongs to. Returns `(services,
    /// matched)`: a cache hit with no recorded services still returns
    /// `true` for the cache hit itself but `false` for "matched", since
    /// an empty result means the IP was already confirmed unmatched.
    pub fn lookup_ip(&self, ip: IpAddr) -> (Vec<ServiceId>, bool) {
        if let Some(services) = self.ip_cache.lookup(ip) {
            let matched = !services.is_empty();
            return (services, matched);
        }

        if let Some(services) = self.prefix_table.check_prefix_first_match(ip) {
            self.ip_cache.insert(ip, services.clone(), 0);
            (services, true)
        } else {
            self.ip_cache.insert(ip, Vec::new(), 0);
            (Vec::new(), false)
        }
    }

    pub fn get_name(&self, id: ServiceId) -> Option<&str> {
        self.id_to_service
            .get(&id)
            .map(|&i| self.services[i].name.as_str())
    }

    pub fn get_id(&self, name: &str) -> Option<ServiceId> {
        self.name_to_service.get(name).map(|&i| self.services[i].code)
    }

    pub fn get_service(&self, id: ServiceId) -> Option<&Service> {
        self.id_to_service.get(&id).map(|&i| &self.services[i])
    }

    pub fn clear_expired(&self) {
        self.ip_cache.clear_expired();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn services() -> Vec<Service> {
        vec![
            Service {
                name: "netflix".to_string(),
                code: 0,
                filter: Filter {
                    domains_string: vec!["netflix.com".to_string()],
                    domains_regex: vec![],
                    prefixes: vec!["23.246.0.0/18".to_string()],
                },
            },
            Service {
                name: "internal".to_string(),
                code: 1,
                filter: Filter {
                    domains_string: vec![],
                    domains_regex: vec![],
                    prefixes: vec!["10.0.0.0/8".to_string()],
                },
            },
        ]
    }

    #[test]
    fn test_config_rejects_duplicate_ids() {
        let mut smap = ServiceMap::new(Duration::from_secs(600));
        let dup = vec![
            Service {
                name: "a".to_string(),
                code: 0,
                filter: Filter::default(),
            },
            Service {
                name: "b".to_string(),
                code: 0,
                filter: Filter::default(),
            },
        ];
        assert!(smap.config_service_map(dup).is_err());
    }

    #[test]
    fn test_lookup_by_prefix() {
        let mut smap = ServiceMap::new(Duration::from_secs(600));
        smap.config_service_map(services()).unwrap();

        let (found, matched) = smap.lookup_ip("10.1.2.3".parse().unwrap());
        assert!(matched);
        assert_eq!(found, vec![1]);
    }

    #[test]
    fn test_lookup_unmatched_ip_is_cached() {
        let mut smap = ServiceMap::new(Duration::from_secs(600));
        smap.config_service_map(services()).unwrap();

        let ip = "192.0.2.1".parse().unwrap();
        let (found, matched) = smap.lookup_ip(ip);
        assert!(!matched);
        assert!(found.is_empty());

        // Second lookup should hit the cache rather than the prefix table.
        let (found2, matched2) = smap.lookup_ip(ip);
        assert!(!matched2);
        assert!(found2.is_empty());
    }

    #[test]
    fn test_dns_answer_learns_ip() {
        let mut smap = ServiceMap::new(Duration::from_secs(600));
        smap.config_service_map(services()).unwrap();

        let answer = DnsAnswer {
            name: "www.netflix.com".to_string(),
            ip: "198.51.100.1".parse().unwrap(),
            ttl: 300,
        };
        smap.parse_dns_response(&answer);

        let (found, matched) = smap.lookup_ip(answer.ip);
        assert!(matched);
        assert_eq!(found, vec![0]);
    }

    #[test]
    fn test_get_name_and_id() {
        let mut smap = ServiceMap::new(Duration::from_secs(600));
        smap.config_service_map(services()).unwrap();

        assert_eq!(smap.get_name(0), Some("netflix"));
        assert_eq!(smap.get_id("internal"), Some(1));
        assert!(smap.get_name(99).is_none());
    }
}

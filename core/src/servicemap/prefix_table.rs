//! Static CIDR prefix to service mapping.

use ipnetwork::IpNetwork;
use std::net::IpAddr;

use super::{Service, ServiceId};
use crate::error::{RefineryError, Result};

struct Prefix {
    network: IpNetwork,
    services: Vec<ServiceId>,
}

/// Matches IPs against configured network prefixes. Populated once at
/// startup from service configuration; never mutated afterwards.
#[derive(Default)]
pub struct PrefixTable {
    prefixes: Vec<Prefix>,
}

impl PrefixTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_services(&mut self, services: &[Service]) -> Result<()> {
        for service in services {
            self.add_service(service.code, &service.filter.prefixes)?;
        }
        Ok(())
    }

    fn add_service(&mut self, code: ServiceId, prefixes: &[String]) -> Result<()> {
        for p in prefixes {
            let network: IpNetwork = p
                .parse()
                .map_err(|e| RefineryError::InvalidPrefix(p.clone(), e))?;

            if let Some(entry) = self.prefixes.iter_mut().find(|e| e.network == network) {
                entry.services.push(code);
            } else {
                self.prefixes.push(Prefix {
                    network,
                    services: vec![code],
                });
            }
        }
        Ok(())
    }

    /// Returns the services attached to the first matching prefix.
    pub fn check_prefix_first_match(&self, ip: IpAddr) -> Option<Vec<ServiceId>> {
        self.prefixes
            .iter()
            .find(|entry| entry.network.contains(ip))
            .map(|entry| entry.services.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::servicemap::Filter;

    fn service(name: &str, code: ServiceId, prefix: &str) -> Service {
        Service {
            name: name.to_string(),
            code,
            filter: Filter {
                domains_string: vec![],
                domains_regex: vec![],
                prefixes: vec![prefix.to_string()],
            },
        }
    }

    #[test]
    fn test_first_match() {
        let mut table = PrefixTable::new();
        table
            .add_services(&[service("a", 0, "10.0.0.0/8"), service("b", 1, "10.0.1.0/24")])
            .unwrap();

        let services = table
            .check_prefix_first_match("10.0.1.5".parse().unwrap())
            .unwrap();
        assert_eq!(services, vec![0]);
    }

    #[test]
    fn test_no_match() {
        let mut table = PrefixTable::new();
        table.add_services(&[service("a", 0, "10.0.0.0/8")]).unwrap();
        assert!(table
            .check_prefix_first_match("192.168.1.1".parse().unwrap())
            .is_none());
    }

    #[test]
    fn test_shared_prefix_merges_services() {
        let mut table = PrefixTable::new();
        table
            .add_services(&[service("a", 0, "10.0.0.0/8"), service("b", 1, "10.0.0.0/8")])
            .unwrap();
        let services = table
            .check_prefix_first_match("10.1.2.3".parse().unwrap())
            .unwrap();
        assert_eq!(services, vec![0, 1]);
    }
}

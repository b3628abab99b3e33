//! Sharded, concurrent flow cache.
//!
//! Packets are fingerprinted into a flow key, dispatched to the shard
//! that owns that key, and folded into the matching [`Flow`]'s
//! counters. A background task periodically evicts flows that have
//! seen no traffic for the configured eviction window and another
//! periodically drains the cache for emission.

pub mod flow;

use std::collections::HashMap;
use std::hash::Hasher;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use fnv::FnvHasher;
use md5::{Digest, Md5};
use parking_lot::Mutex;
use refinery_capture::Packet;

use crate::anonymize::CryptoPan;
use crate::config::ServiceConfig;
use crate::counters::CounterRegistry;
use crate::error::{RefineryError, Result};
use crate::servicemap::{ServiceId, ServiceMap};
use flow::Flow;

struct Entry {
    flow: Flow,
    expires_at: Instant,
}

struct Shard {
    items: Mutex<HashMap<String, Entry>>,
}

pub struct FlowCache {
    shards: Vec<Shard>,
    evict_time: Duration,
    service_map: Arc<ServiceMap>,
    anonymizer: Option<CryptoPan>,
    registry: CounterRegistry,
    service_id_to_counter_ids: HashMap<ServiceId, Vec<usize>>,
}

fn shard_index(key: &str, shard_count: usize) -> usize {
    let mut hasher = FnvHasher::default();
    hasher.write(key.as_bytes());
    (hasher.finish() as usize) % shard_count
}

fn fingerprint(remote_ip: IpAddr, local_ip: IpAddr, remote_port: u16, local_port: u16) -> String {
    let key = format!("{remote_ip}-{local_ip}-{remote_port}-{local_port}");
    let digest = Md5::digest(key.as_bytes());
    hex::encode(digest)
}

impl FlowCache {
    /// `anonymize_key`, when present, must already have been validated
    /// to decode to exactly 32 bytes (the configuration layer enforces
    /// this before construction).
    pub fn new(
        service_map: Arc<ServiceMap>,
        evict_time: Duration,
        shards_count: u32,
        anonymize_key: Option<&[u8]>,
    ) -> Result<Self> {
        let anonymizer = match anonymize_key {
            Some(key) => Some(CryptoPan::new(key)?),
            None => None,
        };

        let shards = (0..shards_count.max(1))
            .map(|_| Shard { items: Mutex::new(HashMap::new()) })
            .collect();

        Ok(Self {
            shards,
            evict_time,
            service_map,
            anonymizer,
            registry: CounterRegistry::new(),
            service_id_to_counter_ids: HashMap::new(),
        })
    }

    /// Builds the counter registry from the union of every service's
    /// `collect` list, then resolves each service's own list to dense
    /// counter ids. Must be called once, after the service map has
    /// been configured with the same services.
    pub fn add_services(&mut self, services: &[ServiceConfig]) -> Result<()> {
        let all_names: Vec<String> = services.iter().flat_map(|s| s.collect.clone()).collect();
        let name_to_id = self.registry.build(&all_names)?;

        for service in services {
            let id = self
                .service_map
                .get_id(&service.name)
                .ok_or_else(|| RefineryError::UnknownService(service.name.clone()))?;
            let ids = service.collect.iter().map(|name| name_to_id[name]).collect();
            self.service_id_to_counter_ids.insert(id, ids);
        }

        Ok(())
    }

    /// Anonymizes the local IP (if configured), fingerprints the flow,
    /// and folds the packet into the matching flow's counters,
    /// creating one if this is the first packet seen for it.
    pub fn process_packet(&self, mut pkt: Packet) {
        if let Some(anonymizer) = &self.anonymizer {
            pkt.local_ip = anonymizer.anonymize(pkt.local_ip);
        }

        let key = fingerprint(pkt.remote_ip, pkt.local_ip, pkt.remote_port, pkt.local_port);
        let shard = &self.shards[shard_index(&key, self.shards.len())];
        let mut items = shard.items.lock();

        if let Some(entry) = items.get_mut(&key) {
            entry.flow.add_packet(&pkt);
            entry.expires_at = Instant::now() + self.evict_time;
            return;
        }

        let (services, matched) = self.service_map.lookup_ip(pkt.remote_ip);
        if !matched {
            return;
        }
        // Only the first matching service is used to create a flow;
        // a given IP is not fanned out across multiple services.
        let sid = services[0];
        let Some(service) = self.service_map.get_service(sid) else {
            return;
        };

        let mut flow = Flow::new(key.clone());
        flow.service = service.name.clone();
        flow.service_ip = pkt.remote_ip.to_string();
        flow.local_ip = pkt.local_ip.to_string();
        flow.protocol = match pkt.protocol {
            refinery_capture::L4Protocol::Tcp => "tcp".to_string(),
            refinery_capture::L4Protocol::Udp => "udp".to_string(),
            refinery_capture::L4Protocol::Other(p) => p.to_string(),
        };
        flow.local_port = pkt.local_port.to_string();
        flow.service_port = pkt.remote_port.to_string();

        if let Some(counter_ids) = self.service_id_to_counter_ids.get(&sid) {
            for &id in counter_ids {
                if let Some(counter) = self.registry.instantiate_by_id(id) {
                    flow.counters.push(counter);
                }
            }
        }

        flow.reset();
        flow.add_packet(&pkt);
        items.insert(key, Entry { flow, expires_at: Instant::now() + self.evict_time });
    }

    /// Drains every shard, collecting each flow's current state and
    /// clearing it in place for the next cycle. Each shard's lock is
    /// released before moving to the next, rather than held for the
    /// whole dump.
    pub fn dump(&self) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        for shard in &self.shards {
            let mut items = shard.items.lock();
            for entry in items.values_mut() {
                out.push(entry.flow.collect());
                entry.flow.clear();
            }
        }
        out
    }

    /// Removes flows that have not seen a packet within the eviction
    /// window.
    pub fn clear_expired(&self) {
        let now = Instant::now();
        for shard in &self.shards {
            let mut items = shard.items.lock();
            items.retain(|_, entry| entry.expires_at > now);
        }
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.items.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

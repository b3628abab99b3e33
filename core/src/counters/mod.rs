//! Pluggable per-flow counters.
//!
//! Each service in the configuration names the counters it wants to
//! collect by string. [`CounterRegistry`] resolves those names to
//! dense ids once at startup, and each flow instantiates the concrete
//! [`Counter`] variants it was configured with.

pub mod bytecopy;
pub mod latency;
pub mod packet;
pub mod png;
pub mod tcp_state;
pub mod video;
pub mod welford;

#[cfg(test)]
mod test_support;

use std::collections::HashMap;

use refinery_capture::Packet;
use serde_json::Value;

use crate::error::{RefineryError, Result};
use bytecopy::ByteCopyCounters;
use latency::LatencyJitterCounter;
use packet::PacketCounters;
use png::PngCopyCounters;
use tcp_state::TcpState;
use video::VideoCounters;

/// The closed set of counter implementations a flow can be configured
/// with. New counter types are added here, not via dynamic registration.
#[derive(Debug, Clone)]
pub enum Counter {
    Packet(PacketCounters),
    TcpState(TcpState),
    Latency(LatencyJitterCounter),
    Video(VideoCounters),
    ByteCopy(ByteCopyCounters),
    PngCopy(PngCopyCounters),
}

impl Counter {
    pub fn add_packet(&mut self, pkt: &Packet) {
        match self {
            Counter::Packet(c) => c.add_packet(pkt),
            Counter::TcpState(c) => c.add_packet(pkt),
            Counter::Latency(c) => c.add_packet(pkt),
            Counter::Video(c) => c.add_packet(pkt),
            Counter::ByteCopy(c) => c.add_packet(pkt),
            Counter::PngCopy(c) => c.add_packet(pkt),
        }
    }

    pub fn reset(&mut self) {
        match self {
            Counter::Packet(c) => c.reset(),
            Counter::TcpState(c) => c.reset(),
            Counter::Latency(c) => c.reset(),
            Counter::Video(c) => c.reset(),
            Counter::ByteCopy(c) => c.reset(),
            Counter::PngCopy(c) => c.reset(),
        }
    }

    pub fn clear(&mut self) {
        match self {
            Counter::Packet(c) => c.clear(),
            Counter::TcpState(c) => c.clear(),
            Counter::Latency(c) => c.clear(),
            Counter::Video(c) => c.clear(),
            Counter::ByteCopy(c) => c.clear(),
            Counter::PngCopy(c) => c.clear(),
        }
    }

    pub fn collect(&self) -> Value {
        match self {
            Counter::Packet(c) => c.collect(),
            Counter::TcpState(c) => c.collect(),
            Counter::Latency(c) => c.collect(),
            Counter::Video(c) => c.collect(),
            Counter::ByteCopy(c) => c.collect(),
            Counter::PngCopy(c) => c.collect(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Counter::Packet(_) => "PacketCounters",
            Counter::TcpState(_) => "TCPState",
            Counter::Latency(_) => "LatencyJitterCounter",
            Counter::Video(_) => "VideoCounters",
            Counter::ByteCopy(_) => "ByteCopyCounters",
            Counter::PngCopy(_) => "PNGCopyCounters",
        }
    }

    fn instantiate(name: &str) -> Option<Counter> {
        match name {
            "PacketCounters" => Some(Counter::Packet(PacketCounters::new())),
            "TCPState" => Some(Counter::TcpState(TcpState::new())),
            "LatencyJitterCounter" => Some(Counter::Latency(LatencyJitterCounter::new())),
            "VideoCounters" => Some(Counter::Video(VideoCounters::new())),
            "ByteCopyCounters" => Some(Counter::ByteCopy(ByteCopyCounters::new())),
            "PNGCopyCounters" => Some(Counter::PngCopy(PngCopyCounters::new())),
            _ => None,
        }
    }
}

/// Resolves configured counter names to dense ids, replacing the
/// reflection-based type registry the counter names were discovered
/// through originally.
#[derive(Debug, Clone, Default)]
pub struct CounterRegistry {
    id_to_name: Vec<String>,
    name_to_id: HashMap<String, usize>,
}

impl CounterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the registry from the union of counter names referenced
    /// by any configured service. Returns the name-to-id map so
    /// callers can translate each service's own `collect` list.
    pub fn build(&mut self, counters: &[String]) -> Result<HashMap<String, usize>> {
        self.id_to_name.clear();
        self.name_to_id.clear();

        for name in counters {
            if Counter::instantiate(name).is_none() {
                return Err(RefineryError::UnknownCounter(name.clone()));
            }
            if !self.name_to_id.contains_key(name) {
                let id = self.id_to_name.len();
                self.id_to_name.push(name.clone());
                self.name_to_id.insert(name.clone(), id);
            }
        }

        Ok(self.name_to_id.clone())
    }

    pub fn instantiate_by_id(&self, id: usize) -> Option<Counter> {
        self.id_to_name.get(id).and_then(|name| Counter::instantiate(name))
    }

    pub fn instantiate_by_name(&self, name: &str) -> Option<Counter> {
        Counter::instantiate(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_assigns_dense_ids_once_per_name() {
        let mut reg = CounterRegistry::new();
        let ids = reg
            .build(&["PacketCounters".to_string(), "TCPState".to_string(), "PacketCounters".to_string()])
            .unwrap();

        assert_eq!(ids.len(), 2);
        assert_eq!(ids["PacketCounters"], 0);
        assert_eq!(ids["TCPState"], 1);
    }

    #[test]
    fn test_build_rejects_unknown_counter() {
        let mut reg = CounterRegistry::new();
        assert!(reg.build(&["NotARealCounter".to_string()]).is_err());
    }

    #[test]
    fn test_instantiate_by_id_roundtrip() {
        let mut reg = CounterRegistry::new();
        let ids = reg.build(&["VideoCounters".to_string()]).unwrap();
        let counter = reg.instantiate_by_id(ids["VideoCounters"]).unwrap();
        assert_eq!(counter.type_name(), "VideoCounters");
    }
}

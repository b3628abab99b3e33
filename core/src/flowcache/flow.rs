//! A single tracked flow and the counters attached to it.

use refinery_capture::Packet;
use serde::Serialize;
use serde_json::Value;

use crate::counters::Counter;

#[derive(Debug, Clone)]
pub struct Flow {
    pub id: String,
    pub service: String,
    pub domain_name: String,
    pub service_ip: String,
    pub local_ip: String,
    pub protocol: String,
    pub local_port: String,
    pub service_port: String,

    pub counters: Vec<Counter>,
}

impl Flow {
    pub fn new(id: String) -> Self {
        Self {
            id,
            service: String::new(),
            domain_name: String::new(),
            service_ip: String::new(),
            local_ip: String::new(),
            protocol: String::new(),
            local_port: String::new(),
            service_port: String::new(),
            counters: Vec::new(),
        }
    }

    pub fn add_packet(&mut self, pkt: &Packet) {
        for counter in &mut self.counters {
            counter.add_packet(pkt);
        }
    }

    pub fn reset(&mut self) {
        for counter in &mut self.counters {
            counter.reset();
        }
    }

    pub fn clear(&mut self) {
        for counter in &mut self.counters {
            counter.clear();
        }
    }

    pub fn collect(&self) -> Value {
        #[derive(Serialize)]
        struct OutCounter {
            #[serde(rename = "CType")]
            ctype: &'static str,
            #[serde(rename = "Data")]
            data: Value,
        }

        #[derive(Serialize)]
        struct OutFlow<'a> {
            #[serde(rename = "Id")]
            id: &'a str,
            #[serde(rename = "Service")]
            service: &'a str,
            #[serde(rename = "DomainName")]
            domain_name: &'a str,
            #[serde(rename = "ServiceIP")]
            service_ip: &'a str,
            #[serde(rename = "LocalIP")]
            local_ip: &'a str,
            #[serde(rename = "Protocol")]
            protocol: &'a str,
            #[serde(rename = "LocalPort")]
            local_port: &'a str,
            #[serde(rename = "ServicePort")]
            service_port: &'a str,
            #[serde(rename = "Cntrs")]
            counters: Vec<OutCounter>,
        }

        let out = OutFlow {
            id: &self.id,
            service: &self.service,
            domain_name: &self.domain_name,
            service_ip: &self.service_ip,
            local_ip: &self.local_ip,
            protocol: &self.protocol,
            local_port: &self.local_port,
            service_port: &self.service_port,
            counters: self
                .counters
                .iter()
                .map(|c| OutCounter { ctype: c.type_name(), data: c.collect() })
                .collect(),
        };

        serde_json::to_value(out).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counters::packet::PacketCounters;

    #[test]
    fn test_collect_includes_counter_type_and_data() {
        let mut flow = Flow::new("abc123".to_string());
        flow.service = "netflix".to_string();
        flow.counters.push(Counter::Packet(PacketCounters::new()));

        let out = flow.collect();
        assert_eq!(out["Id"], "abc123");
        assert_eq!(out["Cntrs"][0]["CType"], "PacketCounters");
    }
}

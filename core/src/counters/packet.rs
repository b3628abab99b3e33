//! Simple per-direction packet and byte counters.

use refinery_capture::{Direction, Packet};
use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize)]
pub struct PacketCounters {
    #[serde(rename = "InCounter")]
    in_counter: i64,
    #[serde(rename = "OutCounter")]
    out_counter: i64,
    #[serde(rename = "InBytes")]
    in_bytes: i64,
    #[serde(rename = "OutBytes")]
    out_bytes: i64,
}

impl PacketCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_packet(&mut self, pkt: &Packet) {
        match pkt.direction {
            Direction::Inbound => {
                self.in_counter += 1;
                self.in_bytes += pkt.length as i64;
            }
            Direction::Outbound => {
                self.out_counter += 1;
                self.out_bytes += pkt.length as i64;
            }
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn collect(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_by_direction() {
        let mut c = PacketCounters::new();
        let mut pkt = make_test_packet(Direction::Inbound, 100);
        c.add_packet(&pkt);
        pkt.direction = Direction::Outbound;
        c.add_packet(&pkt);
        c.add_packet(&pkt);

        assert_eq!(c.in_counter, 1);
        assert_eq!(c.out_counter, 2);
    }

    #[test]
    fn test_reset_and_clear_are_equivalent() {
        let mut c = PacketCounters::new();
        c.add_packet(&make_test_packet(Direction::Inbound, 50));
        c.reset();
        assert_eq!(c.in_counter, 0);
        c.add_packet(&make_test_packet(Direction::Inbound, 50));
        c.clear();
        assert_eq!(c.in_counter, 0);
    }

    pub(crate) fn make_test_packet(direction: Direction, length: u32) -> Packet {
        Packet {
            ts_ns: 0,
            direction,
            family: refinery_capture::IpFamily::V4,
            protocol: refinery_capture::L4Protocol::Tcp,
            remote_ip: "1.2.3.4".parse().unwrap(),
            local_ip: "10.0.0.1".parse().unwrap(),
            remote_port: 443,
            local_port: 51000,
            payload_len: 0,
            length,
            tcp: None,
            raw: std::sync::Arc::from(&b""[..]),
        }
    }
}

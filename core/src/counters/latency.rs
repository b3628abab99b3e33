//! Round-trip time and jitter estimation from TCP ACK timing.

use std::collections::HashMap;

use refinery_capture::{Direction, Packet};
use serde::Serialize;

use super::welford::Welford;

#[derive(Debug, Clone, Default)]
pub struct LatencyJitterCounter {
    rtt: Welford,
    jitter: Welford,

    un_acked_up: HashMap<u32, i64>,
    last_ack_down: u32,
    last_latency: f64,
}

impl LatencyJitterCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_packet(&mut self, pkt: &Packet) {
        let Some(tcp) = &pkt.tcp else {
            return;
        };
        let bytes = pkt.payload_len as i64;

        match pkt.direction {
            Direction::Inbound => {
                if tcp.flags.ack {
                    if let Some(ts) = self.un_acked_up.get(&tcp.ack) {
                        let new_latency = (pkt.ts_ns - ts) as f64;
                        self.rtt.add_value(new_latency);
                        self.jitter.add_value((self.last_latency - new_latency).abs());
                        self.last_latency = new_latency;
                    }
                    if tcp.ack > self.last_ack_down {
                        self.last_ack_down = tcp.ack;
                        self.un_acked_up.retain(|&k, _| k >= self.last_ack_down);
                    }
                }
            }
            Direction::Outbound => {
                if bytes > 0 {
                    let key = tcp.seq.wrapping_add(bytes as u32);
                    self.un_acked_up.entry(key).or_insert(pkt.ts_ns);
                }
            }
        }
    }

    /// Reset clears the RTT/jitter estimators AND the ACK tracking
    /// state; Clear only resets the estimators, leaving in-flight ACK
    /// bookkeeping intact across an emit cycle.
    pub fn reset(&mut self) {
        self.rtt.reset();
        self.jitter.reset();
        self.un_acked_up.clear();
        self.last_ack_down = 0;
        self.last_latency = 0.0;
    }

    pub fn clear(&mut self) {
        self.rtt.reset();
        self.jitter.reset();
    }

    pub fn collect(&self) -> serde_json::Value {
        #[derive(Serialize)]
        struct Output {
            #[serde(rename = "RTTAvg")]
            rtt_avg: f64,
            #[serde(rename = "RTTVar")]
            rtt_var: f64,
            #[serde(rename = "JitterAvg")]
            jitter_avg: f64,
            #[serde(rename = "JitterVar")]
            jitter_var: f64,
        }

        serde_json::to_value(Output {
            rtt_avg: self.rtt.avg,
            rtt_var: self.rtt.var,
            jitter_avg: self.jitter.avg,
            jitter_var: self.jitter.var,
        })
        .unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counters::test_support::{flags_with, tcp_packet};

    #[test]
    fn test_rtt_recorded_on_matching_ack() {
        let mut c = LatencyJitterCounter::new();
        c.add_packet(&tcp_packet(
            Direction::Outbound,
            1_000_000,
            100,
            48,
            1000,
            0,
            flags_with(false, true, true),
        ));
        c.add_packet(&tcp_packet(
            Direction::Inbound,
            1_050_000,
            52,
            0,
            0,
            1048,
            flags_with(false, true, false),
        ));

        assert_eq!(c.rtt.n, 1.0);
        assert!((c.rtt.avg - 50_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_clear_keeps_ack_tracking_reset_does_not() {
        let mut c = LatencyJitterCounter::new();
        c.add_packet(&tcp_packet(
            Direction::Outbound,
            0,
            100,
            48,
            1000,
            0,
            flags_with(false, true, true),
        ));
        assert_eq!(c.un_acked_up.len(), 1);

        c.clear();
        assert_eq!(c.un_acked_up.len(), 1);

        c.reset();
        assert_eq!(c.un_acked_up.len(), 0);
    }
}

//! Directional TCP counters: flags, bytes, retransmissions,
//! out-of-order segments, and RTT/window/in-flight distributions.

use std::collections::HashMap;

use refinery_capture::{Direction, Packet};
use serde::Serialize;

use super::welford::Welford;

#[derive(Debug, Clone, Default)]
pub struct TcpState {
    ack_up_counter: i64,
    ack_down_counter: i64,
    syn_up_counter: i64,
    syn_down_counter: i64,
    rst_up_counter: i64,
    rst_down_counter: i64,
    push_up_counter: i64,
    push_down_counter: i64,
    urg_up_counter: i64,
    urg_down_counter: i64,
    bytes_up_counter: i64,
    bytes_down_counter: i64,
    retr_up_counter: i64,
    retr_down_counter: i64,
    ooo_up_counter: i64,
    ooo_down_counter: i64,

    up_rec_window: Welford,
    down_rec_window: Welford,
    up_bytes_per_pkt: Welford,
    down_bytes_per_pkt: Welford,
    up_bytes_in_flight: Welford,
    down_bytes_in_flight: Welford,
    rtt: Welford,

    un_acked_up: HashMap<u32, i64>,
    un_acked_down: HashMap<u32, i64>,

    last_seq_up: u32,
    last_seq_down: u32,
    last_ack_up: u32,
    last_ack_down: u32,
}

impl TcpState {
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
                    self.ack_down_counter += 1;
                    if let Some(ts) = self.un_acked_up.get(&tcp.ack) {
                        self.rtt.add_value((pkt.ts_ns - ts) as f64);
                    }
                    if tcp.ack > self.last_ack_down {
                        self.last_ack_down = tcp.ack;
                        self.un_acked_up.retain(|&k, _| k >= self.last_ack_down);
                    }
                }
                if tcp.flags.syn {
                    self.syn_down_counter += 1;
                }
                if tcp.flags.rst {
                    self.rst_down_counter += 1;
                }
                if tcp.flags.psh {
                    self.push_down_counter += 1;
                }
                if tcp.flags.urg {
                    self.urg_down_counter += 1;
                }
                self.bytes_down_counter += bytes;
                self.down_rec_window.add_value(tcp.window as f64);
                self.down_bytes_per_pkt.add_value(bytes as f64);
                self.down_bytes_in_flight
                    .add_value((tcp.seq as i64 + bytes - self.last_ack_up as i64) as f64);
                if bytes > 0 {
                    if tcp.seq < self.last_seq_down {
                        self.ooo_down_counter += 1;
                    } else {
                        self.last_seq_down = tcp.seq;
                    }
                    let retransmit_key = tcp.seq.wrapping_add(bytes as u32);
                    if self.un_acked_down.contains_key(&retransmit_key) {
                        self.retr_down_counter += 1;
                    } else {
                        self.un_acked_down.insert(retransmit_key, pkt.ts_ns);
                    }
                }
            }
            Direction::Outbound => {
                if tcp.flags.ack {
                    self.ack_up_counter += 1;
                    if tcp.ack > self.last_ack_up {
                        self.last_ack_up = tcp.ack;
                        self.un_acked_down.retain(|&k, _| k >= self.last_ack_up);
                    }
                }
                if tcp.flags.syn {
                    self.syn_up_counter += 1;
                }
                if tcp.flags.rst {
                    self.rst_up_counter += 1;
                }
                if tcp.flags.psh {
                    self.push_up_counter += 1;
                }
                if tcp.flags.urg {
                    self.urg_up_counter += 1;
                }
                self.bytes_up_counter += bytes;
                self.up_rec_window.add_value(tcp.window as f64);
                self.up_bytes_per_pkt.add_value(bytes as f64);
                self.up_bytes_in_flight
                    .add_value((tcp.seq as i64 + bytes - self.last_ack_down as i64) as f64);
                if bytes > 0 {
                    if tcp.seq < self.last_seq_up {
                        self.ooo_up_counter += 1;
                    } else {
                        self.last_seq_up = tcp.seq;
                    }
                    let retransmit_key = tcp.seq.wrapping_add(bytes as u32);
                    if self.un_acked_up.contains_key(&retransmit_key) {
                        self.retr_up_counter += 1;
                    } else {
                        self.un_acked_up.insert(retransmit_key, pkt.ts_ns);
                    }
                }
            }
        }
    }

    /// Reset and Clear behave identically for this counter: both fully
    /// re-initialize the state, including the retransmission tracking.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn collect(&self) -> serde_json::Value {
        #[derive(Serialize)]
        struct Output {
            #[serde(rename = "AckUpCounter")]
            ack_up_counter: i64,
            #[serde(rename = "AckDownCounter")]
            ack_down_counter: i64,
            #[serde(rename = "SynUpCounter")]
            syn_up_counter: i64,
            #[serde(rename = "SynDownCounter")]
            syn_down_counter: i64,
            #[serde(rename = "RstUpCounter")]
            rst_up_counter: i64,
            #[serde(rename = "RstDownCounter")]
            rst_down_counter: i64,
            #[serde(rename = "PushUpCounter")]
            push_up_counter: i64,
            #[serde(rename = "PushDownCounter")]
            push_down_counter: i64,
            #[serde(rename = "UrgUpCounter")]
            urg_up_counter: i64,
            #[serde(rename = "UrgDownCounter")]
            urg_down_counter: i64,
            #[serde(rename = "BytesUpCounter")]
            bytes_up_counter: i64,
            #[serde(rename = "BytesDownCounter")]
            bytes_down_counter: i64,
            #[serde(rename = "RetrUpCounter")]
            retr_up_counter: i64,
            #[serde(rename = "RetrDownCounter")]
            retr_down_counter: i64,
            #[serde(rename = "OOOUpCounter")]
            ooo_up_counter: i64,
            #[serde(rename = "OOODownCounter")]
            ooo_down_counter: i64,
            #[serde(rename = "UpRecWindowAvg")]
            up_rec_window_avg: f64,
            #[serde(rename = "UpRecWindowVar")]
            up_rec_window_var: f64,
            #[serde(rename = "DownRecWindowAvg")]
            down_rec_window_avg: f64,
            #[serde(rename = "DownRecWindowVar")]
            down_rec_window_var: f64,
            #[serde(rename = "UpBytesPerPktAvg")]
            up_bytes_per_pkt_avg: f64,
            #[serde(rename = "UpBytesPerPktVar")]
            up_bytes_per_pkt_var: f64,
            #[serde(rename = "DownBytesPerPktAvg")]
            down_bytes_per_pkt_avg: f64,
            #[serde(rename = "DownBytesPerPktVar")]
            down_bytes_per_pkt_var: f64,
            #[serde(rename = "UpBytesInFlightAvg")]
            up_bytes_in_flight_avg: f64,
            #[serde(rename = "UpBytesInFlightVar")]
            up_bytes_in_flight_var: f64,
            #[serde(rename = "DownBytesInFlightAvg")]
            down_bytes_in_flight_avg: f64,
            #[serde(rename = "DownBytesInFlightVar")]
            down_bytes_in_flight_var: f64,
            #[serde(rename = "RTTAvg")]
            rtt_avg: f64,
            #[serde(rename = "RTTVar")]
            rtt_var: f64,
        }

        let out = Output {
            ack_up_counter: self.ack_up_counter,
            ack_down_counter: self.ack_down_counter,
            syn_up_counter: self.syn_up_counter,
            syn_down_counter: self.syn_down_counter,
            rst_up_counter: self.rst_up_counter,
            rst_down_counter: self.rst_down_counter,
            push_up_counter: self.push_up_counter,
            push_down_counter: self.push_down_counter,
            urg_up_counter: self.urg_up_counter,
            urg_down_counter: self.urg_down_counter,
            bytes_up_counter: self.bytes_up_counter,
            bytes_down_counter: self.bytes_down_counter,
            retr_up_counter: self.retr_up_counter,
            retr_down_counter: self.retr_down_counter,
            ooo_up_counter: self.ooo_up_counter,
            ooo_down_counter: self.ooo_down_counter,
            up_rec_window_avg: self.up_rec_window.avg,
            up_rec_window_var: self.up_rec_window.var,
            down_rec_window_avg: self.down_rec_window.avg,
            down_rec_window_var: self.down_rec_window.var,
            up_bytes_per_pkt_avg: self.up_bytes_per_pkt.avg,
            up_bytes_per_pkt_var: self.up_bytes_per_pkt.var,
            down_bytes_per_pkt_avg: self.down_bytes_per_pkt.avg,
            down_bytes_per_pkt_var: self.down_bytes_per_pkt.var,
            up_bytes_in_flight_avg: self.up_bytes_in_flight.avg,
            up_bytes_in_flight_var: self.up_bytes_in_flight.var,
            down_bytes_in_flight_avg: self.down_bytes_in_flight.avg,
            down_bytes_in_flight_var: self.down_bytes_in_flight.var,
            rtt_avg: self.rtt.avg,
            rtt_var: self.rtt.var,
        };

        serde_json::to_value(out).unwrap_or(serde_json::Value::Null)
    }
}

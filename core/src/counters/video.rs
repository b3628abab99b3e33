//! Tracks upstream "chunks" (bursts of outbound data followed by a
//! downstream response) typical of adaptive bitrate video streaming.

use refinery_capture::{Direction, L4Protocol, Packet};
use serde::Serialize;

/// Minimum payload length for a non-TCP (QUIC) packet to be considered
/// carrying data rather than protocol overhead.
const QUIC_HEADER_LEN: u32 = 100;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct VideoSegment {
    #[serde(rename = "Len")]
    len: i64,
    #[serde(rename = "Seq")]
    seq: i64,
    #[serde(rename = "TsStart")]
    ts_start: i64,
    #[serde(rename = "TsEnd")]
    ts_end: i64,
    #[serde(rename = "LastPkt")]
    last_pkt: i64,
    #[serde(rename = "DownPkts")]
    down_pkts: i64,
    #[serde(rename = "DonwBytes")]
    down_bytes: i64,
    #[serde(rename = "MaxDSeq")]
    max_d_seq: i64,
}

#[derive(Debug, Clone, Default)]
pub struct VideoCounters {
    upstream_chunks: Vec<VideoSegment>,
    running_upstream: VideoSegment,
}

impl VideoCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_packet(&mut self, pkt: &Packet) {
        let is_tcp = matches!(pkt.protocol, L4Protocol::Tcp);
        let has_upstream_data = (is_tcp && pkt.payload_len > 0)
            || (!is_tcp && pkt.payload_len > QUIC_HEADER_LEN);

        if pkt.direction == Direction::Outbound && has_upstream_data {
            if self.running_upstream.ts_start != 0 && self.running_upstream.down_pkts > 0 {
                self.running_upstream.ts_end = self.running_upstream.last_pkt;
                self.upstream_chunks.push(self.running_upstream);
            }
            let seq = pkt.tcp.as_ref().map(|t| t.seq as i64).unwrap_or(0);
            self.running_upstream = VideoSegment {
                len: pkt.length as i64,
                ts_start: pkt.ts_ns,
                seq,
                ..Default::default()
            };
        } else if pkt.direction == Direction::Inbound && pkt.payload_len > 0 {
            self.running_upstream.down_pkts += 1;
            self.running_upstream.down_bytes += pkt.payload_len as i64;

            if let Some(tcp) = &pkt.tcp {
                if tcp.seq as i64 > self.running_upstream.max_d_seq {
                    self.running_upstream.max_d_seq = tcp.seq as i64;
                }
            }
            if pkt.ts_ns > self.running_upstream.ts_end {
                self.running_upstream.last_pkt = pkt.ts_ns;
            }
        }
    }

    pub fn reset(&mut self) {
        self.running_upstream = VideoSegment::default();
        self.upstream_chunks.clear();
    }

    /// Clear only drops the finished chunks; the in-progress upstream
    /// burst survives across an emit cycle so it isn't cut short.
    pub fn clear(&mut self) {
        self.upstream_chunks.clear();
    }

    pub fn collect(&self) -> serde_json::Value {
        #[derive(Serialize)]
        struct Output {
            #[serde(rename = "VideoSegments")]
            video_segments: Vec<VideoSegment>,
        }

        let mut segments = self.upstream_chunks.clone();
        if self.running_upstream.ts_start > 0 {
            segments.push(self.running_upstream);
        }

        serde_json::to_value(Output { video_segments: segments }).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counters::test_support::{flags_with, tcp_packet};

    #[test]
    fn test_inbound_only_stream_has_no_closed_chunks() {
        let mut c = VideoCounters::new();
        for i in 0..3u32 {
            c.add_packet(&tcp_packet(
                Direction::Inbound,
                i as i64 + 1,
                1394,
                1340,
                i * 1340,
                0,
                flags_with(false, true, false),
            ));
        }

        assert!(c.upstream_chunks.is_empty());
        assert_eq!(c.running_upstream.down_pkts, 3);
        assert_eq!(c.running_upstream.down_bytes, 1340 * 3);
    }

    #[test]
    fn test_upstream_burst_closes_previous_chunk() {
        let mut c = VideoCounters::new();
        // Upstream request opens chunk 1
        c.add_packet(&tcp_packet(
            Direction::Outbound,
            1,
            100,
            40,
            0,
            0,
            flags_with(false, true, true),
        ));
        // Downstream response data
        c.add_packet(&tcp_packet(
            Direction::Inbound,
            2,
            1394,
            1340,
            0,
            40,
            flags_with(false, true, false),
        ));
        // Next upstream request closes chunk 1, opens chunk 2
        c.add_packet(&tcp_packet(
            Direction::Outbound,
            3,
            100,
            40,
            1340,
            0,
            flags_with(false, true, true),
        ));

        assert_eq!(c.upstream_chunks.len(), 1);
        assert_eq!(c.upstream_chunks[0].down_pkts, 1);
        assert_eq!(c.upstream_chunks[0].down_bytes, 1340);
    }

    #[test]
    fn test_clear_keeps_running_chunk() {
        let mut c = VideoCounters::new();
        c.add_packet(&tcp_packet(
            Direction::Outbound,
            1,
            100,
            40,
            0,
            0,
            flags_with(false, true, true),
        ));
        c.add_packet(&tcp_packet(
            Direction::Inbound,
            2,
            1394,
            1340,
            0,
            40,
            flags_with(false, true, false),
        ));
        c.add_packet(&tcp_packet(
            Direction::Outbound,
            3,
            100,
            40,
            1340,
            0,
            flags_with(false, true, true),
        ));
        c.clear();

        assert!(c.upstream_chunks.is_empty());
        assert_ne!(c.running_upstream.ts_start, 0);
    }
}

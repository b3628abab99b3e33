//! Copies a bounded sample of raw packet bytes per flow, for payload
//! inspection or offline reclassification.

use refinery_capture::Packet;
use serde::Serialize;

const DEFAULT_TO_COPY: i32 = 400;

/// Which layers [`ByteCopyCounters`] copies from the raw frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyLayers {
    HeadersOnly = 0,
    AllLayers = 1,
    PayloadOnly = 2,
}

#[derive(Debug, Clone)]
pub struct ByteCopyCounters {
    copied_bytes: i32,
    stored_bytes: i32,
    to_copy: i32,
    layers: CopyLayers,
    data: Vec<u8>,
}

impl Default for ByteCopyCounters {
    fn default() -> Self {
        Self {
            copied_bytes: 0,
            stored_bytes: 0,
            to_copy: DEFAULT_TO_COPY,
            layers: CopyLayers::HeadersOnly,
            data: vec![0u8; DEFAULT_TO_COPY as usize],
        }
    }
}

impl ByteCopyCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_layers(layers: CopyLayers) -> Self {
        Self { layers, ..Self::default() }
    }

    pub fn add_packet(&mut self, pkt: &Packet) {
        if self.copied_bytes >= self.to_copy {
            return;
        }

        // The raw frame minus its payload gives the combined L2/L3/L4
        // header span; the capture crate does not expose per-layer
        // header lengths separately.
        let header_size = (pkt.length.saturating_sub(pkt.payload_len)) as usize;
        let raw = &pkt.raw[..];

        if self.layers != CopyLayers::PayloadOnly {
            let remaining = (self.to_copy - self.copied_bytes).max(0) as usize;
            let take = header_size.min(remaining).min(raw.len());
            self.copy_from(&raw[..take]);
        }

        if self.layers != CopyLayers::HeadersOnly && pkt.payload_len > 0 {
            let remaining = (self.to_copy - self.copied_bytes).max(0) as usize;
            let payload_start = header_size.min(raw.len());
            let payload = &raw[payload_start..];
            let take = (pkt.payload_len as usize).min(remaining).min(payload.len());
            self.copy_from(&payload[..take]);
        }
    }

    fn copy_from(&mut self, src: &[u8]) {
        let dst_start = self.stored_bytes as usize;
        let dst_end = (dst_start + src.len()).min(self.data.len());
        let copied = dst_end - dst_start;
        self.data[dst_start..dst_end].copy_from_slice(&src[..copied]);
        self.copied_bytes += copied as i32;
        self.stored_bytes += copied as i32;
    }

    pub fn reset(&mut self) {
        self.copied_bytes = 0;
        self.stored_bytes = 0;
        self.to_copy = DEFAULT_TO_COPY;
        self.layers = CopyLayers::HeadersOnly;
        self.data = vec![0u8; DEFAULT_TO_COPY as usize];
    }

    /// Clear only resets the byte cursor for the next emit cycle; the
    /// sample buffer itself is freed only once fully copied.
    pub fn clear(&mut self) {
        self.stored_bytes = 0;
        if self.copied_bytes >= self.to_copy {
            self.data.clear();
        }
    }

    pub fn collect(&self) -> serde_json::Value {
        #[derive(Serialize)]
        struct Output<'a> {
            #[serde(rename = "CopiedBytes")]
            copied_bytes: i32,
            #[serde(rename = "Data")]
            data: &'a [u8],
        }

        serde_json::to_value(Output { copied_bytes: self.copied_bytes, data: &self.data })
            .unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counters::test_support::{flags_with, tcp_packet};
    use refinery_capture::Direction;

    fn packet_with_raw(payload_len: u32, length: u32, raw: Vec<u8>) -> Packet {
        let mut pkt = tcp_packet(Direction::Inbound, 0, length, payload_len, 0, 0, flags_with(false, true, false));
        pkt.raw = std::sync::Arc::from(raw.into_boxed_slice());
        pkt
    }

    #[test]
    fn test_copies_headers_only_by_default() {
        let mut c = ByteCopyCounters::new();
        let raw: Vec<u8> = (0u8..54).collect(); // 40 header bytes + 14 payload bytes
        let pkt = packet_with_raw(14, 54, raw);
        c.add_packet(&pkt);

        assert_eq!(c.copied_bytes, 40);
        assert_eq!(&c.data[..40], &(0u8..40).collect::<Vec<u8>>()[..]);
    }

    #[test]
    fn test_stops_at_to_copy_cap() {
        let mut c = ByteCopyCounters::with_layers(CopyLayers::AllLayers);
        c.to_copy = 10;
        c.data = vec![0u8; 10];
        let raw: Vec<u8> = (0u8..54).collect();
        let pkt = packet_with_raw(14, 54, raw);
        c.add_packet(&pkt);

        assert_eq!(c.copied_bytes, 10);
    }

    #[test]
    fn test_clear_keeps_buffer_until_fully_copied() {
        let mut c = ByteCopyCounters::new();
        c.clear();
        assert!(!c.data.is_empty());
        c.copied_bytes = c.to_copy;
        c.clear();
        assert!(c.data.is_empty());
    }
}

//! Like [`super::bytecopy::ByteCopyCounters`], but renders the copied
//! byte sample as a grayscale PNG image instead of a raw buffer.

use std::io::Cursor;

use image::{GrayImage, ImageEncoder};
use image::codecs::png::PngEncoder;
use refinery_capture::Packet;
use serde::Serialize;

use super::bytecopy::CopyLayers;

const DEFAULT_TO_COPY: i32 = 400;

#[derive(Debug, Clone)]
pub struct PngCopyCounters {
    copied_bytes: i32,
    stored_bytes: i32,
    to_copy: i32,
    layers: CopyLayers,
    pixels: Vec<u8>,
    side: u32,
    buffer: Vec<u8>,
    created: bool,
}

impl Default for PngCopyCounters {
    fn default() -> Self {
        Self::fresh(DEFAULT_TO_COPY, CopyLayers::HeadersOnly)
    }
}

impl PngCopyCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_layers(layers: CopyLayers) -> Self {
        Self::fresh(DEFAULT_TO_COPY, layers)
    }

    fn fresh(to_copy: i32, layers: CopyLayers) -> Self {
        let side = (to_copy as f64).sqrt() as u32;
        Self {
            copied_bytes: 0,
            stored_bytes: 0,
            to_copy,
            layers,
            pixels: vec![0u8; to_copy as usize],
            side,
            buffer: Vec::new(),
            created: false,
        }
    }

    pub fn add_packet(&mut self, pkt: &Packet) {
        if self.copied_bytes < self.to_copy {
            let header_size = (pkt.length.saturating_sub(pkt.payload_len)) as usize;
            let raw = &pkt.raw[..];

            if self.layers != CopyLayers::PayloadOnly {
                let remaining = (self.to_copy - self.copied_bytes).max(0) as usize;
                let take = header_size.min(remaining).min(raw.len());
                self.copy_from(&raw[..take]);
            }

            if self.layers != CopyLayers::HeadersOnly {
                let remaining = (self.to_copy - self.copied_bytes).max(0) as usize;
                let payload_start = header_size.min(raw.len());
                let payload = &raw[payload_start..];
                let take = (pkt.payload_len as usize).min(remaining).min(payload.len());
                self.copy_from(&payload[..take]);
            }
        }

        if !self.created && self.copied_bytes >= self.to_copy {
            if let Some(image) = GrayImage::from_raw(self.side, self.side, self.pixels.clone()) {
                let mut out = Cursor::new(Vec::new());
                let encoder = PngEncoder::new(&mut out);
                if encoder
                    .write_image(image.as_raw(), self.side, self.side, image::ExtendedColorType::L8)
                    .is_ok()
                {
                    self.buffer = out.into_inner();
                    self.created = true;
                }
            }
        }
    }

    fn copy_from(&mut self, src: &[u8]) {
        let dst_start = self.stored_bytes as usize;
        let dst_end = (dst_start + src.len()).min(self.pixels.len());
        let copied = dst_end - dst_start;
        self.pixels[dst_start..dst_end].copy_from_slice(&src[..copied]);
        self.copied_bytes += copied as i32;
        self.stored_bytes += copied as i32;
    }

    pub fn reset(&mut self) {
        *self = Self::fresh(DEFAULT_TO_COPY, CopyLayers::HeadersOnly);
    }

    /// Clear only resets the byte cursor; the image and its encoded
    /// buffer are freed only once a PNG has actually been produced.
    pub fn clear(&mut self) {
        self.stored_bytes = 0;
        if self.copied_bytes >= self.to_copy && self.created {
            self.pixels.clear();
            self.buffer.clear();
        }
    }

    pub fn collect(&self) -> serde_json::Value {
        #[derive(Serialize)]
        struct Output<'a> {
            #[serde(rename = "CopiedBytes")]
            copied_bytes: i32,
            #[serde(rename = "Data")]
            data: Option<&'a [u8]>,
        }

        let data = if self.created { Some(self.buffer.as_slice()) } else { None };
        serde_json::to_value(Output { copied_bytes: self.copied_bytes, data })
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
    fn test_png_created_once_buffer_full() {
        let mut c = PngCopyCounters::fresh(16, CopyLayers::AllLayers);
        let raw: Vec<u8> = (0u8..64).collect();
        let pkt = packet_with_raw(50, 64, raw);
        c.add_packet(&pkt);

        assert_eq!(c.copied_bytes, 16);
        assert!(c.created);
        assert!(!c.buffer.is_empty());
    }

    #[test]
    fn test_not_created_until_full() {
        let mut c = PngCopyCounters::fresh(400, CopyLayers::HeadersOnly);
        let raw: Vec<u8> = (0u8..20).collect();
        let pkt = packet_with_raw(6, 20, raw);
        c.add_packet(&pkt);

        assert!(!c.created);
        assert_eq!(c.collect()["Data"], serde_json::Value::Null);
    }

    #[test]
    fn test_clear_keeps_state_until_created() {
        let mut c = PngCopyCounters::fresh(16, CopyLayers::AllLayers);
        c.clear();
        assert!(!c.pixels.is_empty());
    }
}

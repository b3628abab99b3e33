//! AF_PACKET capture using pnet for cross-platform compatibility.
//!
//! Each [`AfPacketCapture`] owns one interface and one [`DirectionContext`]
//! and produces normalized [`Packet`]s (or [`DnsAnswer`]s, for the DNS
//! parser task) on a bounded channel, decoded inline on the capture
//! thread.

use anyhow::{Context, Result, bail};
use crossbeam_channel::{bounded, Sender};
use pnet::datalink::{self, Channel, Config};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

use super::interface::NetworkInterface;
use crate::decode::dns::{self, DnsAnswer};
use crate::decode::packet::{self, DirectionContext, Packet};

/// Capture statistics
#[derive(Debug, Default)]
pub struct CaptureStats {
    pub packets_captured: AtomicU64,
    pub bytes_captured: AtomicU64,
    pub packets_dropped: AtomicU64,
    pub parse_errors: AtomicU64,
}

impl CaptureStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CaptureStatsSnapshot {
        CaptureStatsSnapshot {
            packets_captured: self.packets_captured.load(Ordering::Relaxed),
            bytes_captured: self.bytes_captured.load(Ordering::Relaxed),
            packets_dropped: self.packets_dropped.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of capture statistics (non-atomic copy)
#[derive(Debug, Clone)]
pub struct CaptureStatsSnapshot {
    pub packets_captured: u64,
    pub bytes_captured: u64,
    pub packets_dropped: u64,
    pub parse_errors: u64,
}

fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// AF_PACKET based capture, bound to one interface.
pub struct AfPacketCapture {
    interface: NetworkInterface,
    promiscuous: bool,
    ctx: DirectionContext,
    stats: Arc<CaptureStats>,
    running: Arc<AtomicBool>,
}

impl AfPacketCapture {
    /// Create a new AF_PACKET capture instance.
    pub fn new(interface_name: &str, promiscuous: bool, ctx: DirectionContext) -> Result<Self> {
        let interface = NetworkInterface::by_name(interface_name)?;
        interface.validate_for_capture()?;

        Ok(Self {
            interface,
            promiscuous,
            ctx,
            stats: Arc::new(CaptureStats::new()),
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn interface_name(&self) -> &str {
        &self.interface.name
    }

    pub fn stats(&self) -> Arc<CaptureStats> {
        Arc::clone(&self.stats)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn open_channel(&self) -> Result<Box<dyn datalink::DataLinkReceiver>> {
        let config = Config {
            read_timeout: Some(Duration::from_millis(100)),
            write_buffer_size: 0,
            read_buffer_size: 65536,
            ..Default::default()
        };

        let interfaces = datalink::interfaces();
        let pnet_interface = interfaces
            .into_iter()
            .find(|i| i.name == self.interface.name)
            .with_context(|| format!("Interface '{}' not found", self.interface.name))?;

        match datalink::channel(&pnet_interface, config) {
            Ok(Channel::Ethernet(_tx, rx)) => Ok(rx),
            Ok(_) => bail!("Unhandled channel type"),
            Err(e) => bail!("Failed to create datalink channel: {}", e),
        }
    }

    /// Run the traffic capture loop, decoding each frame into a
    /// [`Packet`] and sending it on `packet_sender`.
    pub fn start(&self, packet_sender: Sender<Packet>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            bail!("Capture already running on interface {}", self.interface.name);
        }

        if self.promiscuous {
            if let Err(e) = self.interface.set_promiscuous(true) {
                warn!("Failed to set promiscuous mode: {}", e);
            }
        }

        let mut rx = self.open_channel()?;

        info!(
            "Started traffic capture on interface '{}' (promiscuous: {})",
            self.interface.name, self.promiscuous
        );

        while self.running.load(Ordering::SeqCst) {
            match rx.next() {
                Ok(frame) => {
                    self.stats.packets_captured.fetch_add(1, Ordering::Relaxed);
                    self.stats.bytes_captured.fetch_add(frame.len() as u64, Ordering::Relaxed);

                    match packet::decode_packet(&self.ctx, now_ns(), frame) {
                        Ok(Some(pkt)) => {
                            if let Err(e) = packet_sender.try_send(pkt) {
                                debug!("Channel full, dropping packet: {}", e);
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            self.stats.parse_errors.fetch_add(1, Ordering::Relaxed);
                            debug!("Failed to decode packet: {}", e);
                        }
                    }
                }
                Err(e) => {
                    let err_str = e.to_string().to_lowercase();
                    if !err_str.contains("timed out") && !err_str.contains("timeout") {
                        error!("Error receiving packet: {}", e);
                    }
                }
            }
        }

        if self.promiscuous {
            if let Err(e) = self.interface.set_promiscuous(false) {
                warn!("Failed to disable promiscuous mode: {}", e);
            }
        }

        info!("Capture stopped on interface '{}'", self.interface.name);
        Ok(())
    }

    /// Run the DNS capture loop, decoding each frame into a
    /// [`DnsAnswer`] and sending it on `answer_sender`. Frames that are
    /// not DNS responses carrying an A/AAAA answer are silently dropped.
    pub fn start_dns(&self, answer_sender: Sender<DnsAnswer>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            bail!("Capture already running on interface {}", self.interface.name);
        }

        let mut rx = self.open_channel()?;

        info!("Started DNS capture on interface '{}'", self.interface.name);

        while self.running.load(Ordering::SeqCst) {
            match rx.next() {
                Ok(frame) => {
                    self.stats.packets_captured.fetch_add(1, Ordering::Relaxed);
                    self.stats.bytes_captured.fetch_add(frame.len() as u64, Ordering::Relaxed);

                    match dns::decode_dns_answer(frame) {
                        Ok(Some(answer)) => {
                            if let Err(e) = answer_sender.try_send(answer) {
                                debug!("Channel full, dropping DNS answer: {}", e);
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            self.stats.parse_errors.fetch_add(1, Ordering::Relaxed);
                            debug!("Failed to decode DNS frame: {}", e);
                        }
                    }
                }
                Err(e) => {
                    let err_str = e.to_string().to_lowercase();
                    if !err_str.contains("timed out") && !err_str.contains("timeout") {
                        error!("Error receiving packet: {}", e);
                    }
                }
            }
        }

        info!("DNS capture stopped on interface '{}'", self.interface.name);
        Ok(())
    }

    /// Start traffic capture in a new thread, bridging decoded packets
    /// onto a fresh bounded channel.
    pub fn start_threaded(self: Arc<Self>, buffer_size: usize) -> Result<(std::thread::JoinHandle<()>, crossbeam_channel::Receiver<Packet>)> {
        let (tx, rx) = bounded(buffer_size);

        let capture = Arc::clone(&self);
        let handle = std::thread::spawn(move || {
            if let Err(e) = capture.start(tx) {
                error!("Capture thread error: {}", e);
            }
        });

        Ok((handle, rx))
    }

    /// Start DNS capture in a new thread.
    pub fn start_dns_threaded(self: Arc<Self>, buffer_size: usize) -> Result<(std::thread::JoinHandle<()>, crossbeam_channel::Receiver<DnsAnswer>)> {
        let (tx, rx) = bounded(buffer_size);

        let capture = Arc::clone(&self);
        let handle = std::thread::spawn(move || {
            if let Err(e) = capture.start_dns(tx) {
                error!("DNS capture thread error: {}", e);
            }
        });

        Ok((handle, rx))
    }
}

impl Drop for AfPacketCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_stats() {
        let stats = CaptureStats::new();
        stats.packets_captured.fetch_add(100, Ordering::Relaxed);
        stats.bytes_captured.fetch_add(5000, Ordering::Relaxed);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.packets_captured, 100);
        assert_eq!(snapshot.bytes_captured, 5000);
    }
}

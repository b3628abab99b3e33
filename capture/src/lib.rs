//! Packet capture, decoding, and direction inference.
//!
//! This crate owns everything between a raw captured frame and a
//! normalized, direction-tagged [`decode::packet::Packet`] or
//! [`decode::dns::DnsAnswer`]: Ethernet/VLAN/QinQ peeling, IPv4/IPv6
//! header parsing, TCP/UDP header parsing, and a small DNS answer
//! decoder. It also provides a concrete AF_PACKET capture driver built
//! on `pnet`, used by the `core` crate's traffic and DNS parser tasks.

pub mod capture;
pub mod decode;

pub use capture::{
    AfPacketCapture, CaptureStats, CaptureStatsSnapshot, MacAddr, NetworkInterface, TcpFlags,
};
pub use decode::dns::DnsAnswer;
pub use decode::packet::{
    Direction, DirectionContext, InterfaceMode, IpFamily, L4Protocol, Packet, TcpHeaderView,
};

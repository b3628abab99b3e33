//! Normalized, direction-tagged packet view used by the traffic path.
//!
//! This is the single type the flow classification and counter pipeline
//! ever sees: whatever link-layer and network-layer framing a capture
//! driver peeled off, the result always collapses to a [`Packet`].

use std::net::IpAddr;
use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::capture::frame::{MacAddr, TcpFlags};
use super::{ethernet, ipv4, ipv6, transport, vlan};
use super::ipv4::protocol;

/// Direction of a packet relative to the monitored host or link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Layer 3 address family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IpFamily {
    V4,
    V6,
}

/// Layer 4 protocol carried by the packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum L4Protocol {
    Tcp,
    Udp,
    Other(u8),
}

impl L4Protocol {
    fn from_ip_protocol(p: u8) -> Self {
        match p {
            protocol::TCP => L4Protocol::Tcp,
            protocol::UDP => L4Protocol::Udp,
            other => L4Protocol::Other(other),
        }
    }
}

/// How a capture instance's local MAC relates to the traffic it sees.
/// Drives [`infer_direction`]'s MAC-matching logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceMode {
    /// Capturing on the end host whose traffic is being analyzed: the
    /// local MAC appears as the *source* of outbound traffic.
    Host,
    /// Capturing on a router, a SPAN/mirror port, or replaying a pcap:
    /// the local MAC appears as the *destination* of outbound traffic
    /// (the frame is addressed to the monitored link, not sourced from
    /// it).
    RouterOrMirror,
}

/// Per-capture-instance context needed to infer packet direction.
#[derive(Debug, Clone)]
pub struct DirectionContext {
    pub local_mac: MacAddr,
    pub mode: InterfaceMode,
}

impl DirectionContext {
    pub fn new(local_mac: MacAddr, mode: InterfaceMode) -> Self {
        Self { local_mac, mode }
    }
}

/// Infer packet direction from the Ethernet source/destination MAC and
/// the capture instance's configured mode.
///
/// In router/mirror/replay mode the monitored link's own frames are
/// addressed *to* the local MAC when leaving the network and *from* it
/// when entering; in host mode it is the reverse. Returns `None` when
/// neither MAC matches (e.g. the local MAC is a middlebox in the path,
/// not an endpoint of this frame).
pub fn infer_direction(ctx: &DirectionContext, src_mac: MacAddr, dst_mac: MacAddr) -> Option<Direction> {
    match ctx.mode {
        InterfaceMode::RouterOrMirror => {
            if dst_mac == ctx.local_mac {
                Some(Direction::Outbound)
            } else if src_mac == ctx.local_mac {
                Some(Direction::Inbound)
            } else {
                None
            }
        }
        InterfaceMode::Host => {
            if src_mac == ctx.local_mac {
                Some(Direction::Outbound)
            } else if dst_mac == ctx.local_mac {
                Some(Direction::Inbound)
            } else {
                None
            }
        }
    }
}

/// A narrow view of the TCP header fields the counter framework needs.
#[derive(Debug, Clone)]
pub struct TcpHeaderView {
    pub flags: TcpFlags,
    pub seq: u32,
    pub ack: u32,
    pub window: u16,
}

/// A decoded, direction-tagged packet.
#[derive(Debug, Clone)]
pub struct Packet {
    pub ts_ns: i64,
    pub direction: Direction,
    pub family: IpFamily,
    pub protocol: L4Protocol,
    pub remote_ip: IpAddr,
    pub local_ip: IpAddr,
    pub remote_port: u16,
    pub local_port: u16,
    /// Length of the transport-layer payload (excludes L2/L3/L4 headers).
    pub payload_len: u32,
    /// Total captured frame length, headers included.
    pub length: u32,
    pub tcp: Option<TcpHeaderView>,
    /// Raw frame bytes from the Ethernet header onward, kept for
    /// counters that copy payload samples (e.g. byte/PNG copy
    /// counters). Not parsed further by this crate.
    pub raw: std::sync::Arc<[u8]>,
}

impl Packet {
    /// The fingerprint key components in canonical remote-first order,
    /// matching the flow cache's "{remote_ip}-{local_ip}-{remote_port}-{local_port}" scheme.
    pub fn flow_key(&self) -> (IpAddr, IpAddr, u16, u16) {
        (self.remote_ip, self.local_ip, self.remote_port, self.local_port)
    }
}

/// Decode a single captured frame into a [`Packet`], inferring
/// direction from `ctx`. Returns `Ok(None)` for frames this pipeline
/// does not classify (non-IP, or a MAC that matches neither endpoint).
pub fn decode_packet(ctx: &DirectionContext, ts_ns: i64, data: &[u8]) -> Result<Option<Packet>> {
    let (src_mac, dst_mac, mut ethertype, mut offset) = ethernet::parse_ethernet(data)?;

    let direction = match infer_direction(ctx, src_mac, dst_mac) {
        Some(d) => d,
        None => return Ok(None),
    };

    // Peel VLAN / QinQ tagging, if present.
    match ethertype {
        ethernet::ETHERTYPE_QINQ | ethernet::ETHERTYPE_QINQ_ALT => {
            if data.len() < offset + 4 {
                bail!("Frame too short for QinQ outer tag");
            }
            match vlan::parse_qinq(&data[offset..]) {
                Ok((_qinq, inner_ethertype, consumed)) => {
                    ethertype = inner_ethertype;
                    offset += consumed;
                }
                Err(_) => {
                    // Single outer tag only, no inner 802.1Q: treat as
                    // one VLAN tag.
                    let (_vlan, inner_ethertype, consumed) = vlan::parse_vlan(&data[offset..])?;
                    ethertype = inner_ethertype;
                    offset += consumed;
                }
            }
        }
        ethernet::ETHERTYPE_VLAN => {
            let (_vlan, inner_ethertype, consumed) = vlan::parse_vlan(&data[offset..])?;
            ethertype = inner_ethertype;
            offset += consumed;
        }
        _ => {}
    }

    if data.len() <= offset {
        bail!("Frame too short after link-layer framing");
    }
    let l3 = &data[offset..];

    let (family, l4_protocol, remote_ip, local_ip, header_length, payload_offset_hint) = match ethertype {
        ethernet::ETHERTYPE_IPV4 => {
            let info = ipv4::parse_ipv4(l3)?;
            let (remote, local) = match direction {
                Direction::Outbound => (info.dst_ip, info.src_ip),
                Direction::Inbound => (info.src_ip, info.dst_ip),
            };
            (
                IpFamily::V4,
                info.protocol,
                IpAddr::V4(remote),
                IpAddr::V4(local),
                info.header_length,
                offset + info.header_length,
            )
        }
        ethernet::ETHERTYPE_IPV6 => {
            let info = ipv6::parse_ipv6(l3)?;
            let (remote, local) = match direction {
                Direction::Outbound => (info.dst_ip, info.src_ip),
                Direction::Inbound => (info.src_ip, info.dst_ip),
            };
            (
                IpFamily::V6,
                info.next_header,
                IpAddr::V6(remote),
                IpAddr::V6(local),
                info.header_length,
                offset + info.header_length,
            )
        }
        _ => return Ok(None),
    };
    let _ = header_length;

    if data.len() <= payload_offset_hint {
        bail!("Frame too short for transport header");
    }
    let l4 = &data[payload_offset_hint..];
    let transport_info = transport::parse_transport(l4_protocol, l4)?;

    let (remote_port, local_port) = match direction {
        Direction::Outbound => (
            transport_info.dst_port.unwrap_or(0),
            transport_info.src_port.unwrap_or(0),
        ),
        Direction::Inbound => (
            transport_info.src_port.unwrap_or(0),
            transport_info.dst_port.unwrap_or(0),
        ),
    };

    let tcp = transport_info.tcp_flags.map(|flags| TcpHeaderView {
        flags,
        seq: transport_info.tcp_seq.unwrap_or(0),
        ack: transport_info.tcp_ack.unwrap_or(0),
        window: transport_info.tcp_window.unwrap_or(0),
    });

    Ok(Some(Packet {
        ts_ns,
        direction,
        family,
        protocol: L4Protocol::from_ip_protocol(l4_protocol),
        remote_ip,
        local_ip,
        remote_port,
        local_port,
        payload_len: transport_info.payload_size,
        length: data.len() as u32,
        tcp,
        raw: std::sync::Arc::from(data),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eth_ipv4_tcp(src_mac: [u8; 6], dst_mac: [u8; 6]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&dst_mac);
        data.extend_from_slice(&src_mac);
        data.extend_from_slice(&[0x08, 0x00]); // IPv4

        // IPv4 header, protocol TCP
        data.extend_from_slice(&[
            0x45, 0x00, 0x00, 0x28, 0x00, 0x01, 0x40, 0x00, 0x40, 0x06, 0x00, 0x00,
            0xc0, 0xa8, 0x01, 0x01, // src 192.168.1.1
            0xc0, 0xa8, 0x01, 0x02, // dst 192.168.1.2
        ]);

        // TCP header, SYN, src=54321 dst=443
        data.extend_from_slice(&[
            0xd4, 0x31, 0x01, 0xbb, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00,
            0x50, 0x02, 0xff, 0xff, 0x00, 0x00, 0x00, 0x00,
        ]);

        data
    }

    #[test]
    fn test_infer_direction_host_mode() {
        let local = MacAddr::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        let peer = MacAddr::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        let ctx = DirectionContext::new(local, InterfaceMode::Host);

        assert_eq!(infer_direction(&ctx, local, peer), Some(Direction::Outbound));
        assert_eq!(infer_direction(&ctx, peer, local), Some(Direction::Inbound));
        assert_eq!(infer_direction(&ctx, peer, peer), None);
    }

    #[test]
    fn test_infer_direction_mirror_mode() {
        let local = MacAddr::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        let peer = MacAddr::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        let ctx = DirectionContext::new(local, InterfaceMode::RouterOrMirror);

        assert_eq!(infer_direction(&ctx, local, peer), Some(Direction::Inbound));
        assert_eq!(infer_direction(&ctx, peer, local), Some(Direction::Outbound));
    }

    #[test]
    fn test_decode_packet_outbound() {
        let local = MacAddr::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        let peer = MacAddr::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        let ctx = DirectionContext::new(local, InterfaceMode::Host);

        let data = eth_ipv4_tcp(local.as_bytes().to_owned(), peer.as_bytes().to_owned());
        let pkt = decode_packet(&ctx, 0, &data).unwrap().unwrap();

        assert_eq!(pkt.direction, Direction::Outbound);
        assert_eq!(pkt.family, IpFamily::V4);
        assert_eq!(pkt.protocol, L4Protocol::Tcp);
        assert_eq!(pkt.remote_ip.to_string(), "192.168.1.2");
        assert_eq!(pkt.local_ip.to_string(), "192.168.1.1");
        assert_eq!(pkt.remote_port, 443);
        assert_eq!(pkt.local_port, 54321);
        assert!(pkt.tcp.as_ref().unwrap().flags.syn);
    }

    #[test]
    fn test_decode_packet_unmatched_mac_is_none() {
        let local = MacAddr::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        let a = MacAddr::new([0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa]);
        let b = MacAddr::new([0xbb, 0xbb, 0xbb, 0xbb, 0xbb, 0xbb]);
        let ctx = DirectionContext::new(local, InterfaceMode::Host);

        let data = eth_ipv4_tcp(a.as_bytes().to_owned(), b.as_bytes().to_owned());
        assert!(decode_packet(&ctx, 0, &data).unwrap().is_none());
    }
}

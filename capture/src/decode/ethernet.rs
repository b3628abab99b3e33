//! Ethernet frame header parsing

use anyhow::{Result, bail};
use crate::capture::frame::MacAddr;

// EtherType constants
pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_ARP: u16 = 0x0806;
pub const ETHERTYPE_VLAN: u16 = 0x8100;      // 802.1Q
pub const ETHERTYPE_QINQ: u16 = 0x88A8;      // 802.1ad (QinQ outer)
pub const ETHERTYPE_QINQ_ALT: u16 = 0x9100;  // Alternative QinQ tag
pub const ETHERTYPE_IPV6: u16 = 0x86DD;
pub const ETHERTYPE_MPLS: u16 = 0x8847;
pub const ETHERTYPE_LLDP: u16 = 0x88CC;

/// Minimum Ethernet frame size (without preamble/FCS)
pub const MIN_FRAME_SIZE: usize = 14;

/// Parse an Ethernet frame header, returning (dst_mac, src_mac, ethertype, header_len).
pub fn parse_ethernet(data: &[u8]) -> Result<(MacAddr, MacAddr, u16, usize)> {
    if data.len() < MIN_FRAME_SIZE {
        bail!("Frame too short: {} bytes (minimum {})", data.len(), MIN_FRAME_SIZE);
    }

    let dst_mac = MacAddr::from_slice(&data[0..6])
        .ok_or_else(|| anyhow::anyhow!("Failed to parse destination MAC"))?;

    let src_mac = MacAddr::from_slice(&data[6..12])
        .ok_or_else(|| anyhow::anyhow!("Failed to parse source MAC"))?;

    let ethertype = u16::from_be_bytes([data[12], data[13]]);

    Ok((src_mac, dst_mac, ethertype, 14))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ethernet_header() {
        let data = vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, // dst MAC (broadcast)
            0x00, 0x11, 0x22, 0x33, 0x44, 0x55, // src MAC
            0x08, 0x00,                         // EtherType (IPv4)
        ];

        let (src, dst, ethertype, offset) = parse_ethernet(&data).unwrap();

        assert!(dst.is_broadcast());
        assert_eq!(src.to_string(), "00:11:22:33:44:55");
        assert_eq!(ethertype, ETHERTYPE_IPV4);
        assert_eq!(offset, 14);
    }

    #[test]
    fn test_frame_too_short() {
        let data = vec![0xff, 0xff, 0xff]; // Only 3 bytes
        assert!(parse_ethernet(&data).is_err());
    }
}

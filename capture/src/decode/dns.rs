//! Minimal RFC 1035 DNS message parsing, enough to learn an IP-to-name
//! binding from an answer: the first question name, and the first A /
//! AAAA resource record's address and TTL.

use std::net::IpAddr;
use anyhow::{Result, bail};

use super::{ethernet, ipv4, ipv6, vlan};
use super::ipv4::protocol;
use super::transport::ports;

const HEADER_LEN: usize = 12;
const TYPE_A: u16 = 1;
const TYPE_AAAA: u16 = 28;
const CLASS_IN: u16 = 1;

/// A single learned DNS answer: the queried name and the IP/TTL it
/// resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsAnswer {
    pub name: String,
    pub ip: IpAddr,
    pub ttl: u32,
}

/// Decode the first A/AAAA answer out of a captured DNS response frame.
/// Returns `Ok(None)` for frames that are not a DNS response carrying
/// at least one answer (queries, non-UDP-53 traffic, malformed
/// messages beyond what we can parse).
pub fn decode_dns_answer(data: &[u8]) -> Result<Option<DnsAnswer>> {
    let (_src_mac, _dst_mac, mut ethertype, mut offset) = ethernet::parse_ethernet(data)?;

    match ethertype {
        ethernet::ETHERTYPE_QINQ | ethernet::ETHERTYPE_QINQ_ALT => {
            if let Ok((_q, inner, consumed)) = vlan::parse_qinq(&data[offset..]) {
                ethertype = inner;
                offset += consumed;
            }
        }
        ethernet::ETHERTYPE_VLAN => {
            if let Ok((_v, inner, consumed)) = vlan::parse_vlan(&data[offset..]) {
                ethertype = inner;
                offset += consumed;
            }
        }
        _ => {}
    }

    if data.len() <= offset {
        return Ok(None);
    }
    let l3 = &data[offset..];

    let (l4_protocol, payload_offset) = match ethertype {
        ethernet::ETHERTYPE_IPV4 => {
            let info = ipv4::parse_ipv4(l3)?;
            (info.protocol, offset + info.header_length)
        }
        ethernet::ETHERTYPE_IPV6 => {
            let info = ipv6::parse_ipv6(l3)?;
            (info.next_header, offset + info.header_length)
        }
        _ => return Ok(None),
    };

    if l4_protocol != protocol::UDP {
        return Ok(None);
    }
    if data.len() <= payload_offset + 8 {
        return Ok(None);
    }

    let src_port = u16::from_be_bytes([data[payload_offset], data[payload_offset + 1]]);
    if src_port != ports::DNS {
        return Ok(None);
    }

    parse_dns_message(&data[payload_offset + 8..])
}

fn parse_dns_message(msg: &[u8]) -> Result<Option<DnsAnswer>> {
    if msg.len() < HEADER_LEN {
        bail!("DNS message too short: {} bytes", msg.len());
    }

    let flags = u16::from_be_bytes([msg[2], msg[3]]);
    let is_response = flags & 0x8000 != 0;
    if !is_response {
        return Ok(None);
    }

    let qdcount = u16::from_be_bytes([msg[4], msg[5]]) as usize;
    let ancount = u16::from_be_bytes([msg[6], msg[7]]) as usize;
    if ancount == 0 {
        return Ok(None);
    }

    let mut cursor = HEADER_LEN;

    // Skip the question section, keeping the first question's name.
    let mut question_name = None;
    for i in 0..qdcount {
        let (name, consumed) = read_name(msg, cursor)?;
        if i == 0 {
            question_name = Some(name);
        }
        cursor = consumed + 4; // QTYPE + QCLASS
        if cursor > msg.len() {
            bail!("Truncated DNS question section");
        }
    }

    let name = match question_name {
        Some(n) => n,
        None => return Ok(None),
    };

    // Walk answer records looking for the first A/AAAA.
    for _ in 0..ancount {
        let (_rr_name, after_name) = read_name(msg, cursor)?;
        if msg.len() < after_name + 10 {
            bail!("Truncated DNS resource record");
        }
        let rtype = u16::from_be_bytes([msg[after_name], msg[after_name + 1]]);
        let rclass = u16::from_be_bytes([msg[after_name + 2], msg[after_name + 3]]);
        let ttl = u32::from_be_bytes([
            msg[after_name + 4],
            msg[after_name + 5],
            msg[after_name + 6],
            msg[after_name + 7],
        ]);
        let rdlength = u16::from_be_bytes([msg[after_name + 8], msg[after_name + 9]]) as usize;
        let rdata_offset = after_name + 10;
        if msg.len() < rdata_offset + rdlength {
            bail!("Truncated DNS resource record data");
        }

        if rclass == CLASS_IN && rtype == TYPE_A && rdlength == 4 {
            let octets = &msg[rdata_offset..rdata_offset + 4];
            let ip = IpAddr::from([octets[0], octets[1], octets[2], octets[3]]);
            return Ok(Some(DnsAnswer { name, ip, ttl }));
        }
        if rclass == CLASS_IN && rtype == TYPE_AAAA && rdlength == 16 {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&msg[rdata_offset..rdata_offset + 16]);
            return Ok(Some(DnsAnswer { name, ip: IpAddr::from(octets), ttl }));
        }

        cursor = rdata_offset + rdlength;
    }

    Ok(None)
}

/// Read a (possibly compressed) DNS name starting at `start`. Returns
/// the decoded name and the offset immediately after it in the
/// *original* message (i.e. after following any compression pointer,
/// the returned offset is where the pointer itself ended, not where
/// the pointed-to data ends).
fn read_name(msg: &[u8], start: usize) -> Result<(String, usize)> {
    let mut labels = Vec::new();
    let mut cursor = start;
    let mut jumped = false;
    let mut end_of_name = start;
    let mut hops = 0;

    loop {
        if cursor >= msg.len() {
            bail!("Truncated DNS name");
        }
        let len = msg[cursor];

        if len == 0 {
            if !jumped {
                end_of_name = cursor + 1;
            }
            break;
        } else if len & 0xC0 == 0xC0 {
            if cursor + 1 >= msg.len() {
                bail!("Truncated DNS compression pointer");
            }
            if !jumped {
                end_of_name = cursor + 2;
            }
            let pointer = (((len & 0x3F) as usize) << 8) | msg[cursor + 1] as usize;
            if pointer >= msg.len() {
                bail!("DNS compression pointer out of range");
            }
            cursor = pointer;
            jumped = true;
            hops += 1;
            if hops > 128 {
                bail!("DNS compression pointer loop");
            }
        } else {
            let label_len = len as usize;
            if cursor + 1 + label_len > msg.len() {
                bail!("Truncated DNS label");
            }
            let label = &msg[cursor + 1..cursor + 1 + label_len];
            labels.push(String::from_utf8_lossy(label).into_owned());
            cursor += 1 + label_len;
        }
    }

    Ok((labels.join("."), end_of_name))
}

//! Packet builders shared by counter unit tests.

#![cfg(test)]

use refinery_capture::{Direction, IpFamily, L4Protocol, Packet, TcpFlags, TcpHeaderView};

#[allow(clippy::too_many_arguments)]
pub(crate) fn tcp_packet(
    direction: Direction,
    ts_ns: i64,
    length: u32,
    payload_len: u32,
    seq: u32,
    ack: u32,
    flags: TcpFlags,
) -> Packet {
    Packet {
        ts_ns,
        direction,
        family: IpFamily::V4,
        protocol: L4Protocol::Tcp,
        remote_ip: "93.184.216.34".parse().unwrap(),
        local_ip: "10.0.0.5".parse().unwrap(),
        remote_port: 443,
        local_port: 51000,
        payload_len,
        length,
        tcp: Some(TcpHeaderView {
            flags,
            seq,
            ack,
            window: 65535,
        }),
        raw: std::sync::Arc::from(Vec::new().into_boxed_slice()),
    }
}

pub(crate) fn flags_with(syn: bool, ack: bool, psh: bool) -> TcpFlags {
    TcpFlags {
        fin: false,
        syn,
        rst: false,
        psh,
        ack,
        urg: false,
        ece: false,
        cwr: false,
    }
}

//! Frame decoding: Ethernet/VLAN/QinQ peeling, IPv4/IPv6 and TCP/UDP
//! header parsing, and the two top-level orchestration entrypoints used
//! by the capture driver — one per parser kind.

pub mod dns;
pub mod ethernet;
pub mod ipv4;
pub mod ipv6;
pub mod packet;
pub mod transport;
pub mod vlan;

pub use dns::decode_dns_answer;
pub use ethernet::parse_ethernet;
pub use ipv4::parse_ipv4;
pub use ipv6::parse_ipv6;
pub use packet::decode_packet;
pub use transport::parse_transport;
pub use vlan::{parse_qinq, parse_vlan};

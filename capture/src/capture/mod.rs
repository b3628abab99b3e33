//! Capture module - network packet capture functionality

pub mod af_packet;
pub mod frame;
pub mod interface;

pub use af_packet::{AfPacketCapture, CaptureStats, CaptureStatsSnapshot};
pub use frame::{MacAddr, QinQInfo, TcpFlags, VlanInfo};
pub use interface::{print_interfaces, NetworkInterface};

//! dhcpcap - link-layer DHCP/ARP capture.
//!
//! Sends and receives DHCP and ARP over `AF_PACKET` sockets with kernel
//! filters attached, bypassing the host IP stack. IP/UDP framing and
//! checksums are done by hand; inbound frames are validated before their
//! payload reaches the protocol state machine.

pub mod capture;
pub mod checksum;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod filter;
pub mod packet;
pub mod probe;
pub mod timer;

pub use capture::Capture;
pub use device::{DhcpDevice, ProtocolHandler, Session};
pub use domain::{DeviceInfo, Protocol};
pub use error::{CaptureError, ConfigError};

pub const DHCP_SERVER_PORT: u16 = 67;
pub const DHCP_CLIENT_PORT: u16 = 68;

pub const ETHERTYPE_IP: u16 = 0x0800;
pub const ETHERTYPE_ARP: u16 = 0x0806;

/// Ethernet header length; absent from cooked captures.
pub const ETH_HLEN: usize = 14;

pub const IPPROTO_UDP: u8 = 17;
pub const IP_HEADER_LEN: usize = 20;
pub const UDP_HEADER_LEN: usize = 8;

pub const ARPOP_REPLY: u16 = 2;

/// Receive buffer size when the interface MTU is unknown.
pub const MTU_MAX: usize = 1500;

//! IPv4/UDP framing for the raw DHCP socket.
//!
//! Outbound payloads get their UDP and IP headers here, and inbound cooked
//! frames are checked and stripped before anything reaches the protocol
//! layer.

mod builder;
mod validator;

pub use builder::{build_datagram, MAX_PAYLOAD_LEN};
pub use validator::{check_headers, validate_and_strip, DropReason};

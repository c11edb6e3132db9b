//! Inbound frame validation.

use std::fmt;

use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::udp::UdpPacket;

use crate::checksum::{ip_checksum, ip_udp_checksum};
use crate::{IPPROTO_UDP, IP_HEADER_LEN, UDP_HEADER_LEN};

/// Why a received frame was not handed to the protocol layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    BadIpVersion(u8),
    /// Header length field below 20 bytes.
    BadHeaderLength(usize),
    TruncatedIpHeader,
    BadIpChecksum,
    /// Fewer bytes than the IP total length, or a total length that cannot
    /// hold the header.
    TruncatedIpPacket,
    UnexpectedProtocol(u8),
    TruncatedUdpHeader,
    BadUdpChecksum,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadIpVersion(version) => write!(f, "unexpected IP version {}", version),
            Self::BadHeaderLength(len) => write!(f, "bad IP header length {}", len),
            Self::TruncatedIpHeader => write!(f, "truncated IP header"),
            Self::BadIpChecksum => write!(f, "bad IP header checksum"),
            Self::TruncatedIpPacket => write!(f, "truncated IP packet"),
            Self::UnexpectedProtocol(proto) => write!(f, "unexpected IP protocol {}", proto),
            Self::TruncatedUdpHeader => write!(f, "truncated UDP header"),
            Self::BadUdpChecksum => write!(f, "bad UDP checksum"),
        }
    }
}

/// Check the IP and UDP headers of a cooked frame and return the UDP payload.
///
/// Dropped frames are logged at debug level and yield `None`. Bytes beyond
/// the IP total length (link-layer padding) are not part of the payload.
pub fn validate_and_strip(frame: &[u8]) -> Option<&[u8]> {
    match check_headers(frame) {
        Ok(payload) => Some(payload),
        Err(reason) => {
            tracing::debug!("{}, ignoring", reason);
            None
        }
    }
}

/// Same checks as [`validate_and_strip`], reporting the drop reason.
pub fn check_headers(frame: &[u8]) -> Result<&[u8], DropReason> {
    let first = *frame.first().ok_or(DropReason::TruncatedIpHeader)?;
    let version = first >> 4;
    if version != 4 {
        return Err(DropReason::BadIpVersion(version));
    }
    let ihl = (first & 0x0f) as usize * 4;
    if ihl < IP_HEADER_LEN {
        return Err(DropReason::BadHeaderLength(ihl));
    }

    let ip = Ipv4Packet::new(frame).ok_or(DropReason::TruncatedIpHeader)?;
    if frame.len() < ihl {
        return Err(DropReason::TruncatedIpHeader);
    }
    if ip_checksum(&frame[..ihl]) != 0 {
        return Err(DropReason::BadIpChecksum);
    }

    let total_len = ip.get_total_length() as usize;
    if frame.len() < total_len || total_len < ihl {
        return Err(DropReason::TruncatedIpPacket);
    }

    let protocol = ip.get_next_level_protocol().0;
    if protocol != IPPROTO_UDP {
        return Err(DropReason::UnexpectedProtocol(protocol));
    }

    let segment = &frame[ihl..total_len];
    if segment.len() < UDP_HEADER_LEN {
        return Err(DropReason::TruncatedUdpHeader);
    }

    let udp = UdpPacket::new(segment).ok_or(DropReason::TruncatedUdpHeader)?;
    let payload = &segment[UDP_HEADER_LEN..];
    if ip_udp_checksum(&ip, &udp, payload) != 0 {
        return Err(DropReason::BadUdpChecksum);
    }

    Ok(payload)
}

//! Internet one's-complement checksum (RFC 1071).
//!
//! Sums are accumulated as big-endian 16-bit words in a `u32`, so the IP
//! header and the UDP pseudo-header, header and payload can be summed in
//! separate pieces and folded once at the end. Carries are folded back in
//! whenever the accumulator nears the top of its range.

use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::udp::UdpPacket;
use pnet::packet::Packet;

use crate::{IPPROTO_UDP, UDP_HEADER_LEN};

/// Above this the next word could overflow the accumulator.
const CARRY_THRESHOLD: u32 = 0xffff_0000;

/// Add the 16-bit words of `data` to `sum`.
///
/// An odd trailing byte is the high byte of a zero-padded word.
pub fn partial_sum(mut sum: u32, data: &[u8]) -> u32 {
    let mut words = data.chunks_exact(2);
    for word in &mut words {
        if sum > CARRY_THRESHOLD {
            sum = (sum & 0xffff) + (sum >> 16);
        }
        sum += u16::from_be_bytes([word[0], word[1]]) as u32;
    }
    if sum > CARRY_THRESHOLD {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    if let [last] = words.remainder() {
        sum += (*last as u32) << 8;
    }
    sum
}

/// Fold the carries of `sum` into 16 bits and return the complement.
pub fn fold(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// Checksum of an arbitrary byte range.
pub fn checksum(data: &[u8]) -> u16 {
    fold(partial_sum(0, data))
}

/// Checksum of an IPv4 header.
///
/// Returns the value to store when the checksum field is zeroed, and zero
/// for a header that already carries a correct checksum.
pub fn ip_checksum(ip_header: &[u8]) -> u16 {
    checksum(ip_header)
}

/// UDP checksum over the pseudo-header, the UDP header and `payload`.
///
/// The pseudo-header takes the addresses from `ip`, the UDP protocol number
/// and the length field of `udp`. Only the first eight bytes of `udp` are
/// summed as header, whatever the view's backing buffer holds beyond them.
/// Recomputing over a received segment with its checksum in place yields
/// zero exactly when the segment is intact.
pub fn ip_udp_checksum(ip: &Ipv4Packet<'_>, udp: &UdpPacket<'_>, payload: &[u8]) -> u16 {
    let mut pseudo = [0u8; 12];
    pseudo[0..4].copy_from_slice(&ip.get_source().octets());
    pseudo[4..8].copy_from_slice(&ip.get_destination().octets());
    pseudo[9] = IPPROTO_UDP;
    pseudo[10..12].copy_from_slice(&udp.get_length().to_be_bytes());

    let mut sum = partial_sum(0, &pseudo);
    sum = partial_sum(sum, &udp.packet()[..UDP_HEADER_LEN]);
    sum = partial_sum(sum, payload);
    fold(sum)
}

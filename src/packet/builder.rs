//! Outbound IPv4/UDP framing.

use std::net::Ipv4Addr;

use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::{Ipv4Flags, Ipv4Packet, MutableIpv4Packet};
use pnet::packet::udp::{MutableUdpPacket, UdpPacket};

use crate::checksum::{ip_checksum, ip_udp_checksum};
use crate::{DHCP_CLIENT_PORT, DHCP_SERVER_PORT, IP_HEADER_LEN, UDP_HEADER_LEN};

/// IPTOS_LOWDELAY, as DSCP (upper six bits of the TOS byte).
const TOS_LOWDELAY_DSCP: u8 = 0x10 >> 2;

/// IPDEFTTL
const DEFAULT_TTL: u8 = 64;

/// Largest payload that still fits the 16-bit IP total length.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize - IP_HEADER_LEN - UDP_HEADER_LEN;

/// Wrap a DHCP payload in UDP and IPv4 headers.
///
/// The UDP header goes from the client port to the server port. The IP
/// header has no options, low-delay TOS and don't-fragment set; an
/// unspecified `dst` is sent to the limited broadcast address. The IP
/// checksum is filled in first, then the UDP checksum.
///
/// Returns `None` when `payload` is too large for a single datagram.
pub fn build_datagram(payload: &[u8], src: Ipv4Addr, dst: Ipv4Addr) -> Option<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD_LEN {
        tracing::error!(
            "DHCP payload of {} bytes does not fit in one datagram",
            payload.len()
        );
        return None;
    }

    let udp_len = UDP_HEADER_LEN + payload.len();
    let total_len = IP_HEADER_LEN + udp_len;
    let dst = if dst.is_unspecified() {
        Ipv4Addr::BROADCAST
    } else {
        dst
    };

    let mut frame = vec![0u8; total_len];
    frame[IP_HEADER_LEN + UDP_HEADER_LEN..].copy_from_slice(payload);

    let (ip_buf, udp_buf) = frame.split_at_mut(IP_HEADER_LEN);
    {
        let mut udp = MutableUdpPacket::new(&mut udp_buf[..UDP_HEADER_LEN])?;
        udp.set_source(DHCP_CLIENT_PORT);
        udp.set_destination(DHCP_SERVER_PORT);
        udp.set_length(udp_len as u16);
        udp.set_checksum(0);
    }
    {
        let mut ip = MutableIpv4Packet::new(ip_buf)?;
        ip.set_version(4);
        ip.set_header_length((IP_HEADER_LEN / 4) as u8);
        ip.set_dscp(TOS_LOWDELAY_DSCP);
        ip.set_ecn(0);
        ip.set_total_length(total_len as u16);
        ip.set_identification(0);
        ip.set_flags(Ipv4Flags::DontFragment);
        ip.set_fragment_offset(0);
        ip.set_ttl(DEFAULT_TTL);
        ip.set_next_level_protocol(IpNextHeaderProtocols::Udp);
        ip.set_source(src);
        ip.set_destination(dst);
        ip.set_checksum(0);
    }

    let ip_sum = ip_checksum(ip_buf);
    ip_buf[10..12].copy_from_slice(&ip_sum.to_be_bytes());

    let udp_sum = {
        let ip = Ipv4Packet::new(ip_buf)?;
        let udp = UdpPacket::new(&udp_buf[..UDP_HEADER_LEN])?;
        ip_udp_checksum(&ip, &udp, &udp_buf[UDP_HEADER_LEN..])
    };
    udp_buf[6..8].copy_from_slice(&udp_sum.to_be_bytes());

    Some(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::checksum;

    fn build(payload: &[u8], dst: Ipv4Addr) -> Vec<u8> {
        build_datagram(payload, Ipv4Addr::new(192, 168, 1, 10), dst).unwrap()
    }

    #[test]
    fn test_header_fields() {
        let frame = build(&[0xaa; 300], Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(frame.len(), 328);

        let ip = Ipv4Packet::new(&frame).unwrap();
        assert_eq!(ip.get_version(), 4);
        assert_eq!(ip.get_header_length(), 5);
        assert_eq!(frame[1], 0x10);
        assert_eq!(ip.get_total_length(), 328);
        assert_eq!(ip.get_flags(), Ipv4Flags::DontFragment);
        assert_eq!(ip.get_fragment_offset(), 0);
        assert_eq!(ip.get_ttl(), 64);
        assert_eq!(ip.get_next_level_protocol(), IpNextHeaderProtocols::Udp);
        assert_eq!(ip.get_source(), Ipv4Addr::new(192, 168, 1, 10));
        assert_eq!(ip.get_destination(), Ipv4Addr::new(192, 168, 1, 1));

        let udp = UdpPacket::new(&frame[IP_HEADER_LEN..]).unwrap();
        assert_eq!(udp.get_source(), 68);
        assert_eq!(udp.get_destination(), 67);
        assert_eq!(udp.get_length(), 308);
        assert_eq!(&frame[28..], &[0xaa; 300][..]);
    }

    #[test]
    fn test_unspecified_destination_becomes_broadcast() {
        let frame = build(b"discover", Ipv4Addr::UNSPECIFIED);
        let ip = Ipv4Packet::new(&frame).unwrap();
        assert_eq!(ip.get_destination(), Ipv4Addr::BROADCAST);
    }

    #[test]
    fn test_ip_header_checksum_verifies() {
        let frame = build(b"abc", Ipv4Addr::UNSPECIFIED);
        assert_ne!(&frame[10..12], &[0, 0]);
        assert_eq!(checksum(&frame[..IP_HEADER_LEN]), 0);
    }

    #[test]
    fn test_udp_checksum_verifies() {
        let payload = b"odd-length payload";
        let frame = build(payload, Ipv4Addr::UNSPECIFIED);
        let ip = Ipv4Packet::new(&frame[..IP_HEADER_LEN]).unwrap();
        let udp = UdpPacket::new(&frame[IP_HEADER_LEN..]).unwrap();
        assert_eq!(ip_udp_checksum(&ip, &udp, &frame[28..]), 0);
    }

    #[test]
    fn test_empty_payload() {
        let frame = build(&[], Ipv4Addr::UNSPECIFIED);
        assert_eq!(frame.len(), IP_HEADER_LEN + UDP_HEADER_LEN);
        let udp = UdpPacket::new(&frame[IP_HEADER_LEN..]).unwrap();
        assert_eq!(udp.get_length(), 8);
    }

    #[test]
    fn test_oversized_payload_is_refused() {
        let payload = vec![0u8; MAX_PAYLOAD_LEN + 1];
        assert!(build_datagram(&payload, Ipv4Addr::UNSPECIFIED, Ipv4Addr::UNSPECIFIED).is_none());
    }
}

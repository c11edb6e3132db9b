//! DHCPDISCOVER probe.
//!
//! A deliberately small state machine: broadcast a DISCOVER, resend it each
//! time the retransmission deadline passes, and stop at the first OFFER for
//! our transaction or after the last attempt.

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use macaddr::MacAddr6;
use tracing::{debug, info, warn};

use crate::device::{DhcpDevice, ProtocolHandler};
use crate::error::CaptureError;

/// DHCP magic cookie: 0x63825363
const DHCP_MAGIC_COOKIE: [u8; 4] = [0x63, 0x82, 0x53, 0x63];

/// Fixed BOOTP header, up to the magic cookie.
const BOOTP_HEADER_LEN: usize = 236;

/// Smallest message BOOTP relays are required to accept.
const BOOTP_MIN_LEN: usize = 300;

const BOOTREQUEST: u8 = 1;
const BOOTREPLY: u8 = 2;
const HTYPE_ETHER: u8 = 1;
const FLAG_BROADCAST: u16 = 0x8000;

mod option_codes {
    pub const PAD: u8 = 0;
    pub const SUBNET_MASK: u8 = 1;
    pub const ROUTER: u8 = 3;
    pub const DNS: u8 = 6;
    pub const LEASE_TIME: u8 = 51;
    pub const MESSAGE_TYPE: u8 = 53;
    pub const SERVER_ID: u8 = 54;
    pub const PARAMETER_LIST: u8 = 55;
    pub const END: u8 = 255;
}

const DHCPDISCOVER: u8 = 1;
const DHCPOFFER: u8 = 2;

/// What a server offered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Offer {
    pub yiaddr: Ipv4Addr,
    pub server_id: Option<Ipv4Addr>,
    pub lease_secs: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeState {
    Idle,
    Selecting,
    Offered(Offer),
    TimedOut,
}

#[derive(Debug)]
pub struct Probe {
    xid: u32,
    chaddr: MacAddr6,
    interval: Duration,
    max_attempts: u32,
    attempts: u32,
    started: Option<Instant>,
    state: ProbeState,
}

impl Probe {
    pub fn new(xid: u32, chaddr: MacAddr6, interval: Duration, max_attempts: u32) -> Self {
        Self {
            xid,
            chaddr,
            interval,
            max_attempts: max_attempts.max(1),
            attempts: 0,
            started: None,
            state: ProbeState::Idle,
        }
    }

    pub fn xid(&self) -> u32 {
        self.xid
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn state(&self) -> &ProbeState {
        &self.state
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, ProbeState::Offered(_) | ProbeState::TimedOut)
    }

    /// Open the DHCP capture and send the first DISCOVER.
    pub fn start(&mut self, device: &mut DhcpDevice) -> Result<(), CaptureError> {
        device.open_dhcp()?;
        self.state = ProbeState::Selecting;
        self.started = Some(Instant::now());
        self.send_discover(device);
        Ok(())
    }

    fn send_discover(&mut self, device: &mut DhcpDevice) {
        self.attempts += 1;
        let elapsed = self.started.map_or(0, |t| t.elapsed().as_secs());
        let secs = u16::try_from(elapsed).unwrap_or(u16::MAX);
        let message = discover_message(self.xid, self.chaddr, secs);
        match device.send_dhcp(&message, Ipv4Addr::UNSPECIFIED, Ipv4Addr::BROADCAST) {
            Ok(n) => info!(
                "{}: DHCPDISCOVER xid {:#010x} attempt {} ({} bytes)",
                device.ifname(),
                self.xid,
                self.attempts,
                n
            ),
            Err(e) => warn!("{}: DHCPDISCOVER not sent: {}", device.ifname(), e),
        }
        // A failed send is retried like a lost one.
        device.set_retransmit_deadline(Instant::now() + self.interval);
    }

    fn finish(&mut self, device: &mut DhcpDevice, state: ProbeState) {
        device.clear_retransmit_deadline();
        device.close_capture();
        self.state = state;
    }
}

impl ProtocolHandler for Probe {
    fn process_dhcp_payload(&mut self, device: &mut DhcpDevice, payload: &[u8]) {
        if self.state != ProbeState::Selecting {
            return;
        }
        match parse_offer(payload, self.xid) {
            Some(offer) => {
                info!(
                    "{}: DHCPOFFER of {} from {}",
                    device.ifname(),
                    offer.yiaddr,
                    offer
                        .server_id
                        .map_or_else(|| "unknown server".to_string(), |ip| ip.to_string())
                );
                self.finish(device, ProbeState::Offered(offer));
            }
            None => debug!("{}: ignoring {} byte DHCP payload", device.ifname(), payload.len()),
        }
    }

    fn process_arp_payload(&mut self, device: &mut DhcpDevice, payload: &[u8]) {
        debug!("{}: probe ignores ARP ({} bytes)", device.ifname(), payload.len());
    }

    fn retransmit(&mut self, device: &mut DhcpDevice) {
        if self.state != ProbeState::Selecting {
            device.clear_retransmit_deadline();
            return;
        }
        if self.attempts >= self.max_attempts {
            warn!(
                "{}: no DHCPOFFER after {} attempts",
                device.ifname(),
                self.attempts
            );
            self.finish(device, ProbeState::TimedOut);
            return;
        }
        // Reopen in case the capture went bad since the last attempt.
        if let Err(e) = device.open_dhcp() {
            warn!("{}: cannot reopen capture: {}", device.ifname(), e);
        }
        self.send_discover(device);
    }
}

/// Build a DHCPDISCOVER with the broadcast flag set.
///
/// `secs` is the time since the first attempt.
pub fn discover_message(xid: u32, chaddr: MacAddr6, secs: u16) -> Vec<u8> {
    let mut msg = vec![0u8; BOOTP_HEADER_LEN];
    msg[0] = BOOTREQUEST;
    msg[1] = HTYPE_ETHER;
    msg[2] = 6;
    msg[4..8].copy_from_slice(&xid.to_be_bytes());
    msg[8..10].copy_from_slice(&secs.to_be_bytes());
    msg[10..12].copy_from_slice(&FLAG_BROADCAST.to_be_bytes());
    msg[28..34].copy_from_slice(chaddr.as_bytes());

    msg.extend_from_slice(&DHCP_MAGIC_COOKIE);
    msg.extend_from_slice(&[option_codes::MESSAGE_TYPE, 1, DHCPDISCOVER]);
    msg.extend_from_slice(&[
        option_codes::PARAMETER_LIST,
        5,
        option_codes::SUBNET_MASK,
        option_codes::ROUTER,
        option_codes::DNS,
        option_codes::LEASE_TIME,
        option_codes::SERVER_ID,
    ]);
    msg.push(option_codes::END);

    if msg.len() < BOOTP_MIN_LEN {
        msg.resize(BOOTP_MIN_LEN, option_codes::PAD);
    }
    msg
}

/// Parse `data` as a DHCPOFFER for transaction `xid`.
pub fn parse_offer(data: &[u8], xid: u32) -> Option<Offer> {
    if data.len() < BOOTP_HEADER_LEN + DHCP_MAGIC_COOKIE.len() {
        return None;
    }
    if data[0] != BOOTREPLY {
        return None;
    }
    if u32::from_be_bytes([data[4], data[5], data[6], data[7]]) != xid {
        return None;
    }
    if data[236..240] != DHCP_MAGIC_COOKIE {
        return None;
    }

    let yiaddr = Ipv4Addr::new(data[16], data[17], data[18], data[19]);
    let mut message_type = None;
    let mut server_id = None;
    let mut lease_secs = None;

    let options = &data[240..];
    let mut offset = 0;
    while offset < options.len() {
        let code = options[offset];
        if code == option_codes::PAD {
            offset += 1;
            continue;
        }
        if code == option_codes::END {
            break;
        }
        let len = *options.get(offset + 1)? as usize;
        let value = options.get(offset + 2..offset + 2 + len)?;

        match code {
            option_codes::MESSAGE_TYPE if len >= 1 => message_type = Some(value[0]),
            option_codes::SERVER_ID if len >= 4 => {
                server_id = Some(Ipv4Addr::new(value[0], value[1], value[2], value[3]))
            }
            option_codes::LEASE_TIME if len >= 4 => {
                lease_secs = Some(u32::from_be_bytes([value[0], value[1], value[2], value[3]]))
            }
            _ => {}
        }

        offset += 2 + len;
    }

    (message_type == Some(DHCPOFFER)).then_some(Offer {
        yiaddr,
        server_id,
        lease_secs,
    })
}

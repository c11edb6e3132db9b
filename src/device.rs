//! Managed device wiring.
//!
//! A `DhcpDevice` owns at most one capture at a time, the auxiliary listen
//! socket and the retransmission deadline. A `Session` pairs it with the
//! protocol state machine and is what the dispatcher drives.

use std::net::Ipv4Addr;
use std::os::fd::RawFd;
use std::time::Instant;

use tracing::{debug, error, warn};

use crate::capture::{Capture, SocketProvider};
use crate::dispatch::EventSource;
use crate::domain::{DeviceInfo, Protocol};
use crate::error::CaptureError;
use crate::packet::{build_datagram, validate_and_strip};
use crate::timer::{self, Retransmit};

/// The protocol state machine, as seen by the capture layer.
///
/// Every callback gets the device so the state machine can send, switch
/// protocol or reschedule its deadline from inside the call.
pub trait ProtocolHandler {
    /// A validated UDP payload arrived on the DHCP capture.
    fn process_dhcp_payload(&mut self, device: &mut DhcpDevice, payload: &[u8]);

    /// A frame arrived on the ARP capture.
    fn process_arp_payload(&mut self, device: &mut DhcpDevice, payload: &[u8]);

    /// The retransmission deadline passed.
    fn retransmit(&mut self, device: &mut DhcpDevice);
}

pub struct DhcpDevice {
    info: DeviceInfo,
    provider: Box<dyn SocketProvider>,
    capture: Option<Capture>,
    listener: Option<socket2::Socket>,
    use_listener: bool,
    listener_tried: bool,
    retrans_deadline: Option<Instant>,
}

impl DhcpDevice {
    pub fn new(info: DeviceInfo, provider: Box<dyn SocketProvider>) -> Self {
        Self {
            info,
            provider,
            capture: None,
            listener: None,
            use_listener: true,
            listener_tried: false,
            retrans_deadline: None,
        }
    }

    /// Whether the first DHCP open also binds the port-68 listen socket.
    pub fn with_listen_socket(mut self, enabled: bool) -> Self {
        self.use_listener = enabled;
        self
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn ifname(&self) -> &str {
        &self.info.ifname
    }

    pub fn capture(&self) -> Option<&Capture> {
        self.capture.as_ref()
    }

    /// Protocol of the open capture, if any.
    pub fn protocol(&self) -> Option<Protocol> {
        self.capture.as_ref().map(Capture::protocol)
    }

    pub fn has_listener(&self) -> bool {
        self.listener.is_some()
    }

    pub fn listener(&self) -> Option<&socket2::Socket> {
        self.listener.as_ref()
    }

    /// Make sure a DHCP capture is open.
    pub fn open_dhcp(&mut self) -> Result<(), CaptureError> {
        if self.use_listener && !self.listener_tried {
            self.listener_tried = true;
            match self.provider.open_listener(&self.info.ifname) {
                Ok(socket) => {
                    debug!("{}: listen socket bound to port 68", self.info.ifname);
                    self.listener = Some(socket);
                }
                Err(e) => error!("{}: cannot open listen socket: {}", self.info.ifname, e),
            }
        }
        self.reopen_if_needed(Protocol::Dhcp)
    }

    /// Make sure an ARP capture is open.
    pub fn open_arp(&mut self) -> Result<(), CaptureError> {
        self.reopen_if_needed(Protocol::Arp)
    }

    /// Keep a healthy capture for `protocol`, otherwise replace whatever is
    /// open with a fresh one. The old capture is always closed first.
    pub fn reopen_if_needed(&mut self, protocol: Protocol) -> Result<(), CaptureError> {
        if let Some(capture) = &self.capture {
            if capture.protocol() == protocol && capture.is_healthy() {
                return Ok(());
            }
            if capture.protocol() == protocol {
                warn!("{}: {} capture unhealthy, reopening", self.info.ifname, protocol);
            }
        }

        self.close_capture();
        let capture = Capture::open(&self.info, protocol, self.provider.as_ref())?;
        self.capture = Some(capture);
        Ok(())
    }

    /// Close the capture. Does nothing if none is open.
    pub fn close_capture(&mut self) {
        if let Some(capture) = self.capture.take() {
            capture.close();
        }
    }

    /// Send a raw frame to the link-layer broadcast address.
    pub fn send_broadcast(&self, frame: &[u8]) -> Result<usize, CaptureError> {
        match &self.capture {
            Some(capture) => capture.send_broadcast(frame),
            None => {
                error!("{}: send without a capture", self.info.ifname);
                Err(CaptureError::NotOpen)
            }
        }
    }

    /// Wrap `payload` in UDP and IP headers and broadcast it.
    pub fn send_dhcp(
        &self,
        payload: &[u8],
        src: Ipv4Addr,
        dst: Ipv4Addr,
    ) -> Result<usize, CaptureError> {
        let datagram = build_datagram(payload, src, dst).ok_or(CaptureError::PayloadTooLarge)?;
        self.send_broadcast(&datagram)
    }

    pub fn retransmit_deadline(&self) -> Option<Instant> {
        self.retrans_deadline
    }

    pub fn set_retransmit_deadline(&mut self, deadline: Instant) {
        self.retrans_deadline = Some(deadline);
    }

    pub fn clear_retransmit_deadline(&mut self) {
        self.retrans_deadline = None;
    }

    /// Read one frame and return what should reach the state machine.
    ///
    /// DHCP frames are validated and stripped to the UDP payload; ARP
    /// frames are passed on as read. The payload is copied out of the
    /// receive buffer so the handler is free to close the capture.
    pub fn receive(&mut self) -> Option<(Protocol, Vec<u8>)> {
        let Some(capture) = self.capture.as_mut() else {
            error!("{}: readable without a capture", self.info.ifname);
            return None;
        };
        let protocol = capture.protocol();
        let frame = capture.receive().ok()??;

        match protocol {
            Protocol::Dhcp => validate_and_strip(frame).map(|payload| (protocol, payload.to_vec())),
            Protocol::Arp => Some((protocol, frame.to_vec())),
        }
    }
}

impl Drop for DhcpDevice {
    fn drop(&mut self) {
        self.close_capture();
    }
}

impl std::fmt::Debug for DhcpDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DhcpDevice")
            .field("info", &self.info)
            .field("capture", &self.capture)
            .field("listener", &self.listener.is_some())
            .field("retrans_deadline", &self.retrans_deadline)
            .finish()
    }
}

/// A device driven by a protocol state machine.
pub struct Session<H> {
    device: DhcpDevice,
    handler: H,
}

impl<H: ProtocolHandler> Session<H> {
    pub fn new(device: DhcpDevice, handler: H) -> Self {
        Self { device, handler }
    }

    pub fn device(&self) -> &DhcpDevice {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut DhcpDevice {
        &mut self.device
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Run `f` with both halves borrowed, as the callbacks are.
    pub fn with_parts<R>(&mut self, f: impl FnOnce(&mut H, &mut DhcpDevice) -> R) -> R {
        f(&mut self.handler, &mut self.device)
    }

    pub fn into_parts(self) -> (DhcpDevice, H) {
        (self.device, self.handler)
    }
}

impl<H: ProtocolHandler> Retransmit for Session<H> {
    fn retransmit_deadline(&self) -> Option<Instant> {
        self.device.retransmit_deadline()
    }

    fn retransmit(&mut self) {
        self.handler.retransmit(&mut self.device);
    }
}

impl<H: ProtocolHandler> EventSource for Session<H> {
    fn raw_fd(&self) -> Option<RawFd> {
        self.device.capture().map(Capture::raw_fd)
    }

    fn on_readable(&mut self) {
        match self.device.receive() {
            Some((Protocol::Dhcp, payload)) => {
                self.handler.process_dhcp_payload(&mut self.device, &payload)
            }
            Some((Protocol::Arp, payload)) => {
                self.handler.process_arp_payload(&mut self.device, &payload)
            }
            None => {}
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        timer::next_deadline(self)
    }

    fn check_deadline(&mut self, now: Instant) {
        timer::check_deadline(self, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::testing::MockProvider;
    use std::time::Duration;

    fn device(provider: &MockProvider) -> DhcpDevice {
        DhcpDevice::new(
            DeviceInfo::ethernet("eth0", 2, 1500),
            Box::new(provider.clone()),
        )
    }

    #[derive(Default)]
    struct Recorder {
        dhcp: Vec<Vec<u8>>,
        arp: Vec<Vec<u8>>,
        retransmits: usize,
        switch_to_arp: bool,
    }

    impl ProtocolHandler for Recorder {
        fn process_dhcp_payload(&mut self, device: &mut DhcpDevice, payload: &[u8]) {
            self.dhcp.push(payload.to_vec());
            if self.switch_to_arp {
                device.open_arp().unwrap();
            }
        }

        fn process_arp_payload(&mut self, _device: &mut DhcpDevice, payload: &[u8]) {
            self.arp.push(payload.to_vec());
        }

        fn retransmit(&mut self, device: &mut DhcpDevice) {
            self.retransmits += 1;
            device.clear_retransmit_deadline();
        }
    }

    mod lifecycle_tests {
        use super::*;

        #[test]
        fn test_reopen_same_protocol_keeps_socket() {
            let provider = MockProvider::default();
            let mut dev = device(&provider);
            dev.open_dhcp().unwrap();
            let fd = dev.capture().unwrap().raw_fd();

            dev.open_dhcp().unwrap();
            assert_eq!(dev.capture().unwrap().raw_fd(), fd);
            assert_eq!(provider.wire.open_count(), 1);
            assert!(provider.wire.closed.borrow().is_empty());
        }

        #[test]
        fn test_switch_protocol_closes_first() {
            let provider = MockProvider::default();
            let mut dev = device(&provider);
            dev.open_dhcp().unwrap();
            let dhcp_fd = dev.capture().unwrap().raw_fd();

            dev.open_arp().unwrap();
            assert_eq!(dev.protocol(), Some(Protocol::Arp));
            assert_eq!(*provider.wire.closed.borrow(), vec![dhcp_fd]);
            assert_eq!(provider.wire.open_count(), 2);
            assert_ne!(dev.capture().unwrap().raw_fd(), dhcp_fd);
        }

        #[test]
        fn test_unhealthy_capture_is_replaced() {
            let provider = MockProvider::default();
            let mut dev = device(&provider);
            dev.open_dhcp().unwrap();
            let fd = dev.capture().unwrap().raw_fd();

            provider.wire.unhealthy.set(true);
            dev.open_dhcp().unwrap();
            assert_eq!(provider.wire.open_count(), 2);
            assert_eq!(*provider.wire.closed.borrow(), vec![fd]);
        }

        #[test]
        fn test_failed_open_leaves_no_capture() {
            let provider = MockProvider::default();
            let mut dev = device(&provider);
            dev.open_dhcp().unwrap();

            provider.wire.fail_open.set(true);
            assert!(dev.open_arp().is_err());
            assert!(dev.capture().is_none());
            assert_eq!(provider.wire.closed.borrow().len(), 1);
        }

        #[test]
        fn test_close_is_idempotent() {
            let provider = MockProvider::default();
            let mut dev = device(&provider);
            dev.open_arp().unwrap();
            dev.close_capture();
            dev.close_capture();
            assert!(dev.capture().is_none());
            assert_eq!(provider.wire.closed.borrow().len(), 1);
        }

        #[test]
        fn test_drop_closes_capture() {
            let provider = MockProvider::default();
            let mut dev = device(&provider);
            dev.open_dhcp().unwrap();
            drop(dev);
            assert_eq!(provider.wire.closed.borrow().len(), 1);
        }

        #[test]
        fn test_listener_opened_once_and_kept() {
            let provider = MockProvider::default();
            let mut dev = device(&provider);
            dev.open_dhcp().unwrap();
            let addr = dev.listener().unwrap().local_addr().unwrap().as_socket();

            dev.open_arp().unwrap();
            dev.open_dhcp().unwrap();
            assert_eq!(dev.listener().unwrap().local_addr().unwrap().as_socket(), addr);
            assert!(addr.is_some());
        }

        #[test]
        fn test_listener_disabled() {
            let provider = MockProvider::default();
            let mut dev = device(&provider).with_listen_socket(false);
            dev.open_dhcp().unwrap();
            assert!(!dev.has_listener());
        }

        #[test]
        fn test_arp_open_does_not_bind_listener() {
            let provider = MockProvider::default();
            let mut dev = device(&provider);
            dev.open_arp().unwrap();
            assert!(!dev.has_listener());
        }
    }

    mod send_tests {
        use super::*;

        #[test]
        fn test_send_without_capture() {
            let provider = MockProvider::default();
            let dev = device(&provider);
            assert!(matches!(dev.send_broadcast(&[1, 2]), Err(CaptureError::NotOpen)));
        }

        #[test]
        fn test_send_dhcp_frames_payload() {
            let provider = MockProvider::default();
            let mut dev = device(&provider);
            dev.open_dhcp().unwrap();

            let payload = b"discover";
            let n = dev
                .send_dhcp(payload, Ipv4Addr::UNSPECIFIED, Ipv4Addr::UNSPECIFIED)
                .unwrap();
            assert_eq!(n, 20 + 8 + payload.len());

            let sent = provider.wire.sent.borrow();
            assert_eq!(validate_and_strip(&sent[0].1), Some(&payload[..]));
        }

        #[test]
        fn test_send_dhcp_too_large() {
            let provider = MockProvider::default();
            let mut dev = device(&provider);
            dev.open_dhcp().unwrap();
            let payload = vec![0u8; crate::packet::MAX_PAYLOAD_LEN + 1];
            assert!(matches!(
                dev.send_dhcp(&payload, Ipv4Addr::UNSPECIFIED, Ipv4Addr::BROADCAST),
                Err(CaptureError::PayloadTooLarge)
            ));
            assert!(provider.wire.sent.borrow().is_empty());
        }
    }

    mod session_tests {
        use super::*;

        #[test]
        fn test_dhcp_payload_is_validated_and_forwarded() {
            let provider = MockProvider::default();
            let mut dev = device(&provider);
            dev.open_dhcp().unwrap();
            let mut session = Session::new(dev, Recorder::default());

            let frame = build_datagram(b"offer", Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::BROADCAST)
                .unwrap();
            provider.wire.push_frame(frame.clone());
            let mut corrupt = frame;
            corrupt[10] ^= 0xff;
            provider.wire.push_frame(corrupt);

            session.on_readable();
            session.on_readable();
            assert_eq!(session.handler().dhcp, vec![b"offer".to_vec()]);
            assert!(session.handler().arp.is_empty());
        }

        #[test]
        fn test_arp_frame_forwarded_as_read() {
            let provider = MockProvider::default();
            let mut dev = device(&provider);
            dev.open_arp().unwrap();
            let mut session = Session::new(dev, Recorder::default());

            provider.wire.push_frame(vec![0, 1, 8, 0, 6, 4, 0, 2]);
            session.on_readable();
            assert_eq!(session.handler().arp, vec![vec![0, 1, 8, 0, 6, 4, 0, 2]]);
        }

        #[test]
        fn test_handler_may_switch_protocol() {
            let provider = MockProvider::default();
            let mut dev = device(&provider);
            dev.open_dhcp().unwrap();
            let handler = Recorder {
                switch_to_arp: true,
                ..Default::default()
            };
            let mut session = Session::new(dev, handler);

            let frame = build_datagram(b"ack", Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::BROADCAST);
            provider.wire.push_frame(frame.unwrap());
            session.on_readable();
            assert_eq!(session.device().protocol(), Some(Protocol::Arp));
            assert_eq!(session.handler().dhcp.len(), 1);
        }

        #[test]
        fn test_readable_without_capture_is_ignored() {
            let provider = MockProvider::default();
            let mut session = Session::new(device(&provider), Recorder::default());
            assert_eq!(session.raw_fd(), None);
            session.on_readable();
            assert!(session.handler().dhcp.is_empty());
        }

        #[test]
        fn test_raw_fd_follows_capture() {
            let provider = MockProvider::default();
            let mut dev = device(&provider);
            dev.open_arp().unwrap();
            let fd = dev.capture().unwrap().raw_fd();
            let session = Session::new(dev, Recorder::default());
            assert_eq!(session.raw_fd(), Some(fd));
        }

        #[test]
        fn test_deadline_drives_retransmit() {
            let provider = MockProvider::default();
            let mut session = Session::new(device(&provider), Recorder::default());
            let deadline = Instant::now() + Duration::from_secs(4);
            session.device_mut().set_retransmit_deadline(deadline);
            assert_eq!(EventSource::next_deadline(&session), Some(deadline));

            EventSource::check_deadline(&mut session, deadline - Duration::from_secs(1));
            assert_eq!(session.handler().retransmits, 0);

            EventSource::check_deadline(&mut session, deadline);
            assert_eq!(session.handler().retransmits, 1);
            assert_eq!(EventSource::next_deadline(&session), None);
        }
    }
}

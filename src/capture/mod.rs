//! Link-layer capture sockets.
//!
//! This module defines the `LinkSocket` and `SocketProvider` traits and the
//! `Capture` handle built on them. The production provider opens Linux
//! packet sockets; tests plug in an in-memory one.

#[cfg(target_os = "linux")]
mod packet_socket;

#[cfg(target_os = "linux")]
pub use packet_socket::{PacketSocket, PacketSocketProvider};

use std::io;
use std::os::fd::RawFd;

use tracing::{debug, error};

use crate::domain::{DeviceInfo, LinkBinding, Protocol};
use crate::error::CaptureError;
use crate::filter::Program;
use crate::MTU_MAX;

/// A datagram-mode link-layer socket bound to one interface and ethertype.
pub trait LinkSocket {
    fn as_raw_fd(&self) -> RawFd;

    /// Read one frame. The link-layer header is not included.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Send `frame` to the broadcast address recorded in `binding`.
    fn send_to(&self, frame: &[u8], binding: &LinkBinding) -> io::Result<usize>;

    /// Whether the socket has no pending error condition.
    fn is_healthy(&self) -> bool;
}

/// Factory for the sockets a managed device needs.
pub trait SocketProvider {
    /// Open a link-layer socket for `binding` with `filter` attached.
    fn open(
        &self,
        binding: &LinkBinding,
        filter: &Program,
    ) -> Result<Box<dyn LinkSocket>, CaptureError>;

    /// Open the UDP socket bound to the DHCP client port on `ifname`.
    fn open_listener(&self, ifname: &str) -> io::Result<socket2::Socket>;
}

/// An open capture: one filtered socket plus its receive buffer.
pub struct Capture {
    socket: Box<dyn LinkSocket>,
    binding: LinkBinding,
    buffer: Vec<u8>,
    failed: bool,
}

impl Capture {
    /// Open a capture for `protocol` on the interface described by `info`.
    ///
    /// Fails without touching any socket when the interface has no index or
    /// no usable broadcast address. Nothing is left open on failure.
    pub fn open(
        info: &DeviceInfo,
        protocol: Protocol,
        provider: &dyn SocketProvider,
    ) -> Result<Self, CaptureError> {
        let binding = info.binding(protocol).inspect_err(|e| error!("{}", e))?;
        let socket = provider
            .open(&binding, protocol.filter())
            .inspect_err(|e| error!("{}: {}", info.ifname, e))?;

        let mtu = match info.mtu {
            0 => MTU_MAX,
            mtu => mtu as usize,
        };

        debug!(
            "{}: opened {} capture (fd {}, buffer {} bytes)",
            info.ifname,
            protocol,
            socket.as_raw_fd(),
            mtu
        );

        Ok(Self {
            socket,
            binding,
            buffer: vec![0u8; mtu],
            failed: false,
        })
    }

    pub fn protocol(&self) -> Protocol {
        self.binding.protocol
    }

    pub fn binding(&self) -> &LinkBinding {
        &self.binding
    }

    pub fn raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    /// A capture is healthy until a read fails or the socket reports an error.
    pub fn is_healthy(&self) -> bool {
        !self.failed && self.socket.is_healthy()
    }

    /// Read the next frame into the receive buffer.
    ///
    /// Returns `Ok(None)` when the socket had nothing to read after all.
    pub fn receive(&mut self) -> Result<Option<&[u8]>, CaptureError> {
        match self.socket.recv(&mut self.buffer) {
            Ok(n) => Ok(Some(&self.buffer[..n])),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(None),
            Err(e) => {
                self.failed = true;
                let err = CaptureError::Receive(e);
                error!("{}", err);
                Err(err)
            }
        }
    }

    /// Send `frame` to the link-layer broadcast address.
    pub fn send_broadcast(&self, frame: &[u8]) -> Result<usize, CaptureError> {
        self.socket.send_to(frame, &self.binding).map_err(|e| {
            let err = CaptureError::Send(e);
            error!("{}", err);
            err
        })
    }

    /// Release the socket and the receive buffer.
    pub fn close(self) {}
}

impl Drop for Capture {
    fn drop(&mut self) {
        debug!(
            "closing {} capture (fd {})",
            self.binding.protocol,
            self.socket.as_raw_fd()
        );
    }
}

impl std::fmt::Debug for Capture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capture")
            .field("fd", &self.socket.as_raw_fd())
            .field("binding", &self.binding)
            .field("buffer_len", &self.buffer.len())
            .field("failed", &self.failed)
            .finish()
    }
}

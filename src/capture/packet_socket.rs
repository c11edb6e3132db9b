//! Linux `AF_PACKET` sockets.

use std::io::{self, Read};
use std::mem;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::os::fd::{AsRawFd, RawFd};

use socket2::{Domain, Protocol as SockProtocol, Socket, Type};
use tracing::error;

use super::{LinkSocket, SocketProvider};
use crate::domain::LinkBinding;
use crate::error::CaptureError;
use crate::filter::Program;
use crate::DHCP_CLIENT_PORT;

/// Opens real packet sockets. Needs `CAP_NET_RAW`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PacketSocketProvider;

/// A `SOCK_DGRAM` packet socket: frames arrive without their link-layer
/// header, and the kernel builds that header on send from the address.
#[derive(Debug)]
pub struct PacketSocket {
    socket: Socket,
}

impl PacketSocket {
    /// Create, filter and bind a packet socket for `binding`.
    pub fn open(binding: &LinkBinding, filter: &Program) -> Result<Self, CaptureError> {
        let ethertype = binding.protocol.ethertype();
        let socket = Socket::new(
            Domain::PACKET,
            Type::DGRAM,
            Some(SockProtocol::from(ethertype.to_be() as i32)),
        )
        .map_err(CaptureError::Socket)?;

        attach_filter(&socket, filter).map_err(CaptureError::AttachFilter)?;

        let sll = sockaddr_ll(ethertype, binding.ifindex, None);
        let rc = unsafe {
            libc::bind(
                socket.as_raw_fd(),
                &sll as *const libc::sockaddr_ll as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(CaptureError::Bind(io::Error::last_os_error()));
        }

        // Reads only happen on readiness; never block the dispatcher.
        socket.set_nonblocking(true).map_err(CaptureError::Socket)?;

        Ok(Self { socket })
    }
}

impl LinkSocket for PacketSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (&self.socket).read(buf)
    }

    fn send_to(&self, frame: &[u8], binding: &LinkBinding) -> io::Result<usize> {
        let sll = sockaddr_ll(
            binding.protocol.ethertype(),
            binding.ifindex,
            Some((binding.arp_type, binding.broadcast.as_bytes())),
        );
        let rc = unsafe {
            libc::sendto(
                self.socket.as_raw_fd(),
                frame.as_ptr() as *const libc::c_void,
                frame.len(),
                0,
                &sll as *const libc::sockaddr_ll as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(rc as usize)
        }
    }

    fn is_healthy(&self) -> bool {
        matches!(self.socket.take_error(), Ok(None))
    }
}

impl SocketProvider for PacketSocketProvider {
    fn open(
        &self,
        binding: &LinkBinding,
        filter: &Program,
    ) -> Result<Box<dyn LinkSocket>, CaptureError> {
        Ok(Box::new(PacketSocket::open(binding, filter)?))
    }

    fn open_listener(&self, ifname: &str) -> io::Result<Socket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(SockProtocol::UDP))?;

        if let Err(e) = socket.set_reuse_address(true) {
            error!("SO_REUSEADDR: {}", e);
        }
        // Nothing is ever read from this socket.
        if let Err(e) = socket.set_recv_buffer_size(1) {
            error!("SO_RCVBUF: {}", e);
        }
        if let Err(e) = socket.bind_device(Some(ifname.as_bytes())) {
            error!("SO_BINDTODEVICE: {}", e);
        }

        let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DHCP_CLIENT_PORT);
        socket.bind(&addr.into())?;
        Ok(socket)
    }
}

/// Link-layer socket address; `dest` carries the hardware type and address
/// for outgoing frames.
fn sockaddr_ll(ethertype: u16, ifindex: u32, dest: Option<(u16, &[u8])>) -> libc::sockaddr_ll {
    let mut sll: libc::sockaddr_ll = unsafe { mem::zeroed() };
    sll.sll_family = libc::AF_PACKET as u16;
    sll.sll_protocol = ethertype.to_be();
    sll.sll_ifindex = ifindex as i32;
    if let Some((arp_type, addr)) = dest {
        sll.sll_hatype = arp_type.to_be();
        let len = addr.len().min(sll.sll_addr.len());
        sll.sll_halen = len as u8;
        sll.sll_addr[..len].copy_from_slice(&addr[..len]);
    }
    sll
}

fn attach_filter(socket: &Socket, filter: &Program) -> io::Result<()> {
    let mut insns: Vec<libc::sock_filter> = filter
        .instructions()
        .iter()
        .map(|insn| libc::sock_filter {
            code: insn.code,
            jt: insn.jt,
            jf: insn.jf,
            k: insn.k,
        })
        .collect();

    let prog = libc::sock_fprog {
        len: insns.len() as u16,
        filter: insns.as_mut_ptr(),
    };

    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_ATTACH_FILTER,
            &prog as *const libc::sock_fprog as *const libc::c_void,
            mem::size_of::<libc::sock_fprog>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

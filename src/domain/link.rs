//! Link-layer addressing for packet sockets.

use std::fmt;

use macaddr::MacAddr6;

use crate::filter::{arp_filter, dhcp_filter, Program};
use crate::{ETHERTYPE_ARP, ETHERTYPE_IP};

/// ARPHRD_* hardware types we know how to address.
mod arphrd {
    pub const ETHER: u16 = 1;
    pub const IEEE802: u16 = 6;
    pub const INFINIBAND: u16 = 32;
    pub const LOOPBACK: u16 = 772;
}

/// Which protocol a capture carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// DHCP over IPv4/UDP.
    Dhcp,
    Arp,
}

impl Protocol {
    pub fn ethertype(self) -> u16 {
        match self {
            Self::Dhcp => ETHERTYPE_IP,
            Self::Arp => ETHERTYPE_ARP,
        }
    }

    /// The cooked-capture filter installed for this protocol.
    pub fn filter(self) -> &'static Program {
        match self {
            Self::Dhcp => dhcp_filter(),
            Self::Arp => arp_filter(),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dhcp => write!(f, "DHCP"),
            Self::Arp => write!(f, "ARP"),
        }
    }
}

/// Link type of an interface, derived from its ARP hardware type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    Ethernet,
    Ieee802,
    Infiniband,
    Loopback,
    Other(u16),
}

impl LinkType {
    pub fn from_arp_type(arp_type: u16) -> Self {
        match arp_type {
            arphrd::ETHER => Self::Ethernet,
            arphrd::IEEE802 => Self::Ieee802,
            arphrd::INFINIBAND => Self::Infiniband,
            arphrd::LOOPBACK => Self::Loopback,
            other => Self::Other(other),
        }
    }

    /// Link-layer broadcast address.
    ///
    /// `None` for links without broadcast, and for InfiniBand, whose 20-byte
    /// broadcast address does not fit a packet socket address.
    pub fn broadcast(self) -> Option<MacAddr6> {
        match self {
            Self::Ethernet | Self::Ieee802 => Some(MacAddr6::broadcast()),
            Self::Infiniband | Self::Loopback | Self::Other(_) => None,
        }
    }
}

/// Everything needed to bind a packet socket and address frames sent on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkBinding {
    pub ifindex: u32,
    pub protocol: Protocol,
    /// ARP hardware type of the interface (`sll_hatype`).
    pub arp_type: u16,
    pub broadcast: MacAddr6,
}

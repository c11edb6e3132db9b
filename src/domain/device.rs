//! Description of a managed network interface.

use std::fs;
use std::path::Path;

use macaddr::MacAddr6;
use pnet::datalink;

use super::link::{LinkBinding, LinkType, Protocol};
use crate::error::CaptureError;

const SYSFS_NET: &str = "/sys/class/net";

/// Static facts about an interface, as seen by the capture layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub ifname: String,
    /// Kernel interface index; 0 when unknown.
    pub ifindex: u32,
    pub link_type: LinkType,
    /// ARPHRD_* hardware type.
    pub arp_type: u16,
    pub hwaddr: Option<MacAddr6>,
    /// 0 when unknown.
    pub mtu: u32,
}

impl DeviceInfo {
    /// Describe an Ethernet interface.
    pub fn ethernet(ifname: impl Into<String>, ifindex: u32, mtu: u32) -> Self {
        Self {
            ifname: ifname.into(),
            ifindex,
            link_type: LinkType::Ethernet,
            arp_type: 1,
            hwaddr: None,
            mtu,
        }
    }

    /// Look up an interface by name.
    ///
    /// Index and hardware address come from the datalink interface list;
    /// MTU and hardware type from sysfs. A missing sysfs attribute leaves
    /// the MTU unknown and the hardware type at Ethernet.
    pub fn from_system(ifname: &str) -> Result<Self, CaptureError> {
        let iface = datalink::interfaces()
            .into_iter()
            .find(|iface| iface.name == ifname)
            .ok_or_else(|| CaptureError::InterfaceNotFound(ifname.to_string()))?;

        let sysfs = Path::new(SYSFS_NET).join(ifname);
        let mtu = read_sysfs_number(&sysfs.join("mtu")).unwrap_or(0);
        let arp_type = read_sysfs_number(&sysfs.join("type"))
            .and_then(|t| u16::try_from(t).ok())
            .unwrap_or(1);

        let hwaddr = iface.mac.map(|mac| MacAddr6::from(mac.octets()));

        Ok(Self {
            ifname: iface.name,
            ifindex: iface.index,
            link_type: LinkType::from_arp_type(arp_type),
            arp_type,
            hwaddr,
            mtu,
        })
    }

    /// Socket binding for `protocol` on this interface.
    pub fn binding(&self, protocol: Protocol) -> Result<LinkBinding, CaptureError> {
        if self.ifindex == 0 {
            return Err(CaptureError::NoInterfaceIndex(self.ifname.clone()));
        }
        let broadcast = self
            .link_type
            .broadcast()
            .ok_or_else(|| CaptureError::NoBroadcastAddress(self.ifname.clone()))?;

        Ok(LinkBinding {
            ifindex: self.ifindex,
            protocol,
            arp_type: self.arp_type,
            broadcast,
        })
    }
}

fn read_sysfs_number(path: &Path) -> Option<u32> {
    match fs::read_to_string(path) {
        Ok(content) => content.trim().parse().ok(),
        Err(e) => {
            tracing::debug!("cannot read {}: {}", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_for_ethernet() {
        let info = DeviceInfo::ethernet("eth0", 3, 1500);
        let binding = info.binding(Protocol::Dhcp).unwrap();
        assert_eq!(binding.ifindex, 3);
        assert_eq!(binding.protocol, Protocol::Dhcp);
        assert_eq!(binding.arp_type, 1);
        assert_eq!(binding.broadcast, MacAddr6::broadcast());
    }

    #[test]
    fn test_binding_without_ifindex() {
        let info = DeviceInfo::ethernet("eth0", 0, 1500);
        assert!(matches!(
            info.binding(Protocol::Dhcp),
            Err(CaptureError::NoInterfaceIndex(name)) if name == "eth0"
        ));
    }

    #[test]
    fn test_binding_without_broadcast() {
        let mut info = DeviceInfo::ethernet("lo", 1, 65536);
        info.link_type = LinkType::Loopback;
        info.arp_type = 772;
        assert!(matches!(
            info.binding(Protocol::Arp),
            Err(CaptureError::NoBroadcastAddress(_))
        ));
    }

    #[test]
    fn test_from_system_unknown_interface() {
        let result = DeviceInfo::from_system("no-such-interface0");
        assert!(matches!(result, Err(CaptureError::InterfaceNotFound(_))));
    }
}

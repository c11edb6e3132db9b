//! The DHCP and ARP filter tables.
//!
//! Both tables are written against full Ethernet frames (they come from ISC
//! DHCP). A `SOCK_DGRAM` packet socket hands the filter the frame without its
//! link-layer header, so before first use every load at or beyond the
//! Ethernet header is moved back by `ETH_HLEN` and the ethertype test is
//! made to fall through on both branches. The socket is already bound to
//! the right ethertype.

use std::sync::OnceLock;

use super::bpf::*;
use crate::{ARPOP_REPLY, DHCP_CLIENT_PORT, ETHERTYPE_ARP, ETHERTYPE_IP, ETH_HLEN, IPPROTO_UDP};

const IP_FRAGMENT_MASK: u32 = 0x3fff;

const DHCP_ETHERNET: [Instruction; 11] = [
    // IPv4?
    Instruction::stmt(BPF_LD | BPF_H | BPF_ABS, 12),
    Instruction::jump(BPF_JMP | BPF_JEQ | BPF_K, ETHERTYPE_IP as u32, 0, 8),
    // UDP?
    Instruction::stmt(BPF_LD | BPF_B | BPF_ABS, 23),
    Instruction::jump(BPF_JMP | BPF_JEQ | BPF_K, IPPROTO_UDP as u32, 0, 6),
    // Not a fragment? (more-fragments flag or a nonzero offset)
    Instruction::stmt(BPF_LD | BPF_H | BPF_ABS, 20),
    Instruction::jump(BPF_JMP | BPF_JSET | BPF_K, IP_FRAGMENT_MASK, 4, 0),
    // X = IP header length
    Instruction::stmt(BPF_LDX | BPF_B | BPF_MSH, 14),
    // Addressed to the client port?
    Instruction::stmt(BPF_LD | BPF_H | BPF_IND, 16),
    Instruction::jump(BPF_JMP | BPF_JEQ | BPF_K, DHCP_CLIENT_PORT as u32, 0, 1),
    Instruction::stmt(BPF_RET | BPF_K, u32::MAX),
    Instruction::stmt(BPF_RET | BPF_K, 0),
];

const ARP_ETHERNET: [Instruction; 6] = [
    // ARP?
    Instruction::stmt(BPF_LD | BPF_H | BPF_ABS, 12),
    Instruction::jump(BPF_JMP | BPF_JEQ | BPF_K, ETHERTYPE_ARP as u32, 0, 3),
    // Reply?
    Instruction::stmt(BPF_LD | BPF_H | BPF_ABS, 20),
    Instruction::jump(BPF_JMP | BPF_JEQ | BPF_K, ARPOP_REPLY as u32, 0, 1),
    Instruction::stmt(BPF_RET | BPF_K, u32::MAX),
    Instruction::stmt(BPF_RET | BPF_K, 0),
];

struct CookedTables {
    dhcp: Program,
    arp: Program,
}

static COOKED: OnceLock<CookedTables> = OnceLock::new();

fn tables() -> &'static CookedTables {
    COOKED.get_or_init(|| {
        tracing::debug!("adjusting filter tables for cooked capture");
        CookedTables {
            dhcp: cook(&DHCP_ETHERNET),
            arp: cook(&ARP_ETHERNET),
        }
    })
}

/// Rewrite an Ethernet-authored program for cooked capture.
fn cook(raw: &[Instruction]) -> Program {
    let mut insns = raw.to_vec();

    if let Some(ethertype_test) = insns.iter_mut().find(|insn| insn.class() == BPF_JMP) {
        ethertype_test.jf = 0;
    }

    for insn in insns.iter_mut() {
        if insn.loads_packet_offset() && insn.k >= ETH_HLEN as u32 {
            insn.k -= ETH_HLEN as u32;
        }
    }

    Program::new(insns)
}

/// Program accepting unfragmented IPv4/UDP datagrams to the DHCP client port.
pub fn dhcp_filter() -> &'static Program {
    &tables().dhcp
}

/// Program accepting ARP replies.
pub fn arp_filter() -> &'static Program {
    &tables().arp
}

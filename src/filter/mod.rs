//! Kernel packet filters.
//!
//! This module holds the classic BPF representation and the two fixed
//! programs installed on capture sockets.

mod bpf;
mod tables;

pub use bpf::{Instruction, Program};
pub use tables::{arp_filter, dhcp_filter};

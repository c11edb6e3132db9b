//! Classic BPF instructions and a userspace evaluator.

use std::fmt;

// Instruction classes
pub const BPF_LD: u16 = 0x00;
pub const BPF_LDX: u16 = 0x01;
pub const BPF_JMP: u16 = 0x05;
pub const BPF_RET: u16 = 0x06;

// LD/LDX sizes
pub const BPF_W: u16 = 0x00;
pub const BPF_H: u16 = 0x08;
pub const BPF_B: u16 = 0x10;

// LD/LDX modes
pub const BPF_ABS: u16 = 0x20;
pub const BPF_IND: u16 = 0x40;
pub const BPF_MSH: u16 = 0xa0;

// JMP operations
pub const BPF_JA: u16 = 0x00;
pub const BPF_JEQ: u16 = 0x10;
pub const BPF_JGT: u16 = 0x20;
pub const BPF_JGE: u16 = 0x30;
pub const BPF_JSET: u16 = 0x40;

// Operand source
pub const BPF_K: u16 = 0x00;

/// One classic BPF instruction, laid out like the kernel's `struct sock_filter`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub code: u16,
    pub jt: u8,
    pub jf: u8,
    pub k: u32,
}

const _: () = assert!(std::mem::size_of::<Instruction>() == 8);

impl Instruction {
    /// Non-jump statement (`BPF_STMT`).
    pub const fn stmt(code: u16, k: u32) -> Self {
        Self { code, jt: 0, jf: 0, k }
    }

    /// Conditional jump (`BPF_JUMP`).
    pub const fn jump(code: u16, k: u32, jt: u8, jf: u8) -> Self {
        Self { code, jt, jf, k }
    }

    pub fn class(&self) -> u16 {
        self.code & 0x07
    }

    pub fn size(&self) -> u16 {
        self.code & 0x18
    }

    pub fn mode(&self) -> u16 {
        self.code & 0xe0
    }

    /// Whether `k` is a packet offset (absolute, indexed or MSH load).
    pub fn loads_packet_offset(&self) -> bool {
        match self.class() {
            BPF_LD => matches!(self.mode(), BPF_ABS | BPF_IND),
            BPF_LDX => self.mode() == BPF_MSH,
            _ => false,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{ 0x{:02x}, {}, {}, 0x{:08x} }}",
            self.code, self.jt, self.jf, self.k
        )
    }
}

/// A filter program, ready to be attached to a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    insns: Vec<Instruction>,
}

impl Program {
    pub fn new(insns: Vec<Instruction>) -> Self {
        Self { insns }
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.insns
    }

    pub fn len(&self) -> usize {
        self.insns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insns.is_empty()
    }

    /// Run the program against `packet` the way the kernel would.
    ///
    /// Returns the snap length chosen by the `RET` instruction; zero means
    /// the packet is dropped. Out-of-range loads and unsupported opcodes drop
    /// the packet, as does running off the end of the program.
    pub fn evaluate(&self, packet: &[u8]) -> u32 {
        let mut a: u32 = 0;
        let mut x: u32 = 0;
        let mut pc = 0usize;

        while let Some(insn) = self.insns.get(pc) {
            pc += 1;
            match insn.class() {
                BPF_LD => {
                    let offset = match insn.mode() {
                        BPF_ABS => insn.k as usize,
                        BPF_IND => x.wrapping_add(insn.k) as usize,
                        _ => return 0,
                    };
                    a = match load(packet, offset, insn.size()) {
                        Some(value) => value,
                        None => return 0,
                    };
                }
                BPF_LDX => {
                    if insn.mode() != BPF_MSH || insn.size() != BPF_B {
                        return 0;
                    }
                    x = match packet.get(insn.k as usize) {
                        Some(byte) => ((byte & 0x0f) as u32) << 2,
                        None => return 0,
                    };
                }
                BPF_JMP => {
                    let op = insn.code & 0xf0;
                    if op == BPF_JA {
                        pc += insn.k as usize;
                        continue;
                    }
                    let taken = match op {
                        BPF_JEQ => a == insn.k,
                        BPF_JGT => a > insn.k,
                        BPF_JGE => a >= insn.k,
                        BPF_JSET => a & insn.k != 0,
                        _ => return 0,
                    };
                    let skip = if taken { insn.jt } else { insn.jf };
                    pc += skip as usize;
                }
                BPF_RET => return insn.k,
                _ => return 0,
            }
        }
        0
    }

    /// Whether the kernel would deliver `packet` through this program.
    pub fn accepts(&self, packet: &[u8]) -> bool {
        self.evaluate(packet) != 0
    }
}

fn load(packet: &[u8], offset: usize, size: u16) -> Option<u32> {
    match size {
        BPF_W => packet
            .get(offset..offset.checked_add(4)?)
            .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]])),
        BPF_H => packet
            .get(offset..offset.checked_add(2)?)
            .map(|b| u16::from_be_bytes([b[0], b[1]]) as u32),
        BPF_B => packet.get(offset).map(|&b| b as u32),
        _ => None,
    }
}

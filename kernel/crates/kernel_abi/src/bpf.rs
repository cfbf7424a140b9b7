use core::mem::size_of;

use bitflags::bitflags;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::time::BpfTimeval;

// Instruction classes.
pub const BPF_LD: u16 = 0x00;
pub const BPF_LDX: u16 = 0x01;
pub const BPF_ST: u16 = 0x02;
pub const BPF_STX: u16 = 0x03;
pub const BPF_ALU: u16 = 0x04;
pub const BPF_JMP: u16 = 0x05;
pub const BPF_RET: u16 = 0x06;
pub const BPF_MISC: u16 = 0x07;

// Load widths.
pub const BPF_W: u16 = 0x00;
pub const BPF_H: u16 = 0x08;
pub const BPF_B: u16 = 0x10;

// Load addressing modes.
pub const BPF_IMM: u16 = 0x00;
pub const BPF_ABS: u16 = 0x20;
pub const BPF_IND: u16 = 0x40;
pub const BPF_MEM: u16 = 0x60;
pub const BPF_LEN: u16 = 0x80;
pub const BPF_MSH: u16 = 0xa0;

// ALU and jump operations.
pub const BPF_ADD: u16 = 0x00;
pub const BPF_SUB: u16 = 0x10;
pub const BPF_MUL: u16 = 0x20;
pub const BPF_DIV: u16 = 0x30;
pub const BPF_OR: u16 = 0x40;
pub const BPF_AND: u16 = 0x50;
pub const BPF_LSH: u16 = 0x60;
pub const BPF_RSH: u16 = 0x70;
pub const BPF_NEG: u16 = 0x80;
pub const BPF_MOD: u16 = 0x90;
pub const BPF_XOR: u16 = 0xa0;

pub const BPF_JA: u16 = 0x00;
pub const BPF_JEQ: u16 = 0x10;
pub const BPF_JGT: u16 = 0x20;
pub const BPF_JGE: u16 = 0x30;
pub const BPF_JSET: u16 = 0x40;

// Operand source.
pub const BPF_K: u16 = 0x00;
pub const BPF_X: u16 = 0x08;

// Return value source. `BPF_K` returns the immediate.
pub const BPF_A: u16 = 0x10;

// Miscellaneous register moves.
pub const BPF_TAX: u16 = 0x00;
pub const BPF_TXA: u16 = 0x80;

pub const fn bpf_class(code: u16) -> u16 {
    code & 0x07
}

pub const fn bpf_size(code: u16) -> u16 {
    code & 0x18
}

pub const fn bpf_mode(code: u16) -> u16 {
    code & 0xe0
}

pub const fn bpf_op(code: u16) -> u16 {
    code & 0xf0
}

pub const fn bpf_src(code: u16) -> u16 {
    code & 0x08
}

pub const fn bpf_rval(code: u16) -> u16 {
    code & 0x18
}

pub const fn bpf_miscop(code: u16) -> u16 {
    code & 0xf8
}

/// One filter instruction as it travels on the wire and sits in memory.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct BpfInsn {
    pub code: u16,
    pub jt: u8,
    pub jf: u8,
    pub k: u32,
}

impl BpfInsn {
    pub const SIZE: usize = size_of::<Self>();

    /// A non-branching instruction.
    pub const fn stmt(code: u16, k: u32) -> Self {
        Self { code, jt: 0, jf: 0, k }
    }

    /// A conditional jump. Displacements are relative to the next instruction.
    pub const fn jump(code: u16, k: u32, jt: u8, jf: u8) -> Self {
        Self { code, jt, jf, k }
    }
}

/// Leading count of an encoded program. The records follow immediately.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct BpfProgramHeader {
    pub len: u32,
}

/// Header preceding every capture record in a read buffer.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct BpfHdr {
    pub tstamp: BpfTimeval,
    /// Bytes of packet data that follow the header.
    pub caplen: u32,
    /// Length of the packet on the wire.
    pub datalen: u32,
    /// Header length including alignment padding.
    pub hdrlen: u16,
    _pad: [u8; 6],
}

impl BpfHdr {
    pub const fn new(tstamp: BpfTimeval, caplen: u32, datalen: u32, hdrlen: u16) -> Self {
        Self {
            tstamp,
            caplen,
            datalen,
            hdrlen,
            _pad: [0; 6],
        }
    }
}

/// Meaningful bytes of [`BpfHdr`], without trailing struct padding.
pub const SIZEOF_BPF_HDR: usize = 26;

pub const BPF_ALIGNMENT: usize = size_of::<usize>();

pub const fn bpf_wordalign(x: usize) -> usize {
    (x + (BPF_ALIGNMENT - 1)) & !(BPF_ALIGNMENT - 1)
}

/// Offset of the packet data within a capture record.
pub const BPF_HDRLEN: usize = bpf_wordalign(SIZEOF_BPF_HDR);

#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct BpfStat {
    /// Packets offered to the device.
    pub recv: u64,
    /// Packets dropped for lack of buffer space.
    pub drop: u64,
    /// Packets stored into a buffer.
    pub capt: u64,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct BpfVersion {
    pub major: u16,
    pub minor: u16,
}

pub const BPF_MAJOR_VERSION: u16 = 1;
pub const BPF_MINOR_VERSION: u16 = 1;

impl BpfVersion {
    pub const CURRENT: Self = Self {
        major: BPF_MAJOR_VERSION,
        minor: BPF_MINOR_VERSION,
    };
}

// Data-link types.
pub const DLT_NULL: u32 = 0;
pub const DLT_EN10MB: u32 = 1;
pub const DLT_RAW: u32 = 12;

bitflags! {
    /// Readiness operations a consumer can wait for.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct SelectOps: u32 {
        const READ  = 1 << 0;
        const WRITE = 1 << 1;
    }
}

//! Classic BPF Opcode Fields
//!
//! Classic BPF instructions use a 16-bit opcode of which only the low
//! 8 bits are defined:
//!
//! ```text
//! +-----------+--------+--------------------+
//! |  3 bits   | 2 bits |      3 bits        |
//! |   mode    |  size  |   instruction      |
//! |           |        |     class          |
//! +-----------+--------+--------------------+
//!
//! +-----------------+--------+--------------------+
//! |     4 bits      | 1 bit  |      3 bits        |
//! |   operation     | source |   instruction      |
//! |                 |        |     class          |
//! +-----------------+--------+--------------------+
//! ```
//!
//! Load and store classes use the first layout, ALU and jump classes the
//! second.

use core::fmt;

use kernel_abi::{
    BPF_ADD, BPF_AND, BPF_B, BPF_DIV, BPF_H, BPF_JEQ, BPF_JGE, BPF_JGT, BPF_JSET, BPF_K, BPF_LSH,
    BPF_MOD, BPF_MUL, BPF_OR, BPF_RSH, BPF_SUB, BPF_W, BPF_X, BPF_XOR,
};

/// Width of a packet load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadSize {
    /// 32-bit word
    Word,
    /// 16-bit half word
    Half,
    /// Single byte
    Byte,
}

impl LoadSize {
    /// Extract the load width from an opcode.
    #[inline]
    pub const fn from_opcode(code: u16) -> Option<Self> {
        match kernel_abi::bpf_size(code) {
            BPF_W => Some(Self::Word),
            BPF_H => Some(Self::Half),
            BPF_B => Some(Self::Byte),
            _ => None,
        }
    }

    /// Width in bytes.
    #[inline]
    pub const fn bytes(self) -> usize {
        match self {
            Self::Word => 4,
            Self::Half => 2,
            Self::Byte => 1,
        }
    }

    pub const fn to_opcode(self) -> u16 {
        match self {
            Self::Word => BPF_W,
            Self::Half => BPF_H,
            Self::Byte => BPF_B,
        }
    }
}

/// Binary ALU operations. Negation is unary and decoded separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AluOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Lsh,
    Rsh,
}

impl AluOp {
    /// Extract the ALU operation from an opcode.
    #[inline]
    pub const fn from_opcode(code: u16) -> Option<Self> {
        match kernel_abi::bpf_op(code) {
            BPF_ADD => Some(Self::Add),
            BPF_SUB => Some(Self::Sub),
            BPF_MUL => Some(Self::Mul),
            BPF_DIV => Some(Self::Div),
            BPF_MOD => Some(Self::Mod),
            BPF_AND => Some(Self::And),
            BPF_OR => Some(Self::Or),
            BPF_XOR => Some(Self::Xor),
            BPF_LSH => Some(Self::Lsh),
            BPF_RSH => Some(Self::Rsh),
            _ => None,
        }
    }

    pub const fn to_opcode(self) -> u16 {
        match self {
            Self::Add => BPF_ADD,
            Self::Sub => BPF_SUB,
            Self::Mul => BPF_MUL,
            Self::Div => BPF_DIV,
            Self::Mod => BPF_MOD,
            Self::And => BPF_AND,
            Self::Or => BPF_OR,
            Self::Xor => BPF_XOR,
            Self::Lsh => BPF_LSH,
            Self::Rsh => BPF_RSH,
        }
    }

    /// Whether a zero right-hand operand is a fault.
    #[inline]
    pub const fn is_division(self) -> bool {
        matches!(self, Self::Div | Self::Mod)
    }

    /// Whether a right-hand operand of 32 or more is a fault.
    #[inline]
    pub const fn is_shift(self) -> bool {
        matches!(self, Self::Lsh | Self::Rsh)
    }

    /// Apply the operation with 32-bit wraparound.
    ///
    /// Returns `None` for division by zero and for shifts of 32 or more.
    #[inline]
    pub const fn apply(self, lhs: u32, rhs: u32) -> Option<u32> {
        match self {
            Self::Add => Some(lhs.wrapping_add(rhs)),
            Self::Sub => Some(lhs.wrapping_sub(rhs)),
            Self::Mul => Some(lhs.wrapping_mul(rhs)),
            Self::Div => lhs.checked_div(rhs),
            Self::Mod => lhs.checked_rem(rhs),
            Self::And => Some(lhs & rhs),
            Self::Or => Some(lhs | rhs),
            Self::Xor => Some(lhs ^ rhs),
            Self::Lsh => lhs.checked_shl(rhs),
            Self::Rsh => lhs.checked_shr(rhs),
        }
    }
}

impl fmt::Display for AluOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Mod => "mod",
            Self::And => "and",
            Self::Or => "or",
            Self::Xor => "xor",
            Self::Lsh => "lsh",
            Self::Rsh => "rsh",
        };
        f.write_str(name)
    }
}

/// Conditional jump comparisons of `A` against the operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JmpCond {
    /// `A == operand`
    Eq,
    /// `A > operand`
    Gt,
    /// `A >= operand`
    Ge,
    /// `A & operand != 0`
    Set,
}

impl JmpCond {
    /// Extract the comparison from an opcode. `BPF_JA` is not a comparison.
    #[inline]
    pub const fn from_opcode(code: u16) -> Option<Self> {
        match kernel_abi::bpf_op(code) {
            BPF_JEQ => Some(Self::Eq),
            BPF_JGT => Some(Self::Gt),
            BPF_JGE => Some(Self::Ge),
            BPF_JSET => Some(Self::Set),
            _ => None,
        }
    }

    pub const fn to_opcode(self) -> u16 {
        match self {
            Self::Eq => BPF_JEQ,
            Self::Gt => BPF_JGT,
            Self::Ge => BPF_JGE,
            Self::Set => BPF_JSET,
        }
    }

    #[inline]
    pub const fn holds(self, a: u32, operand: u32) -> bool {
        match self {
            Self::Eq => a == operand,
            Self::Gt => a > operand,
            Self::Ge => a >= operand,
            Self::Set => a & operand != 0,
        }
    }
}

impl fmt::Display for JmpCond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Eq => "jeq",
            Self::Gt => "jgt",
            Self::Ge => "jge",
            Self::Set => "jset",
        };
        f.write_str(name)
    }
}

/// Right-hand operand of ALU and jump instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    /// The immediate `k`
    K(u32),
    /// The index register
    X,
}

impl Operand {
    #[inline]
    pub const fn from_opcode(code: u16, k: u32) -> Self {
        match kernel_abi::bpf_src(code) {
            BPF_X => Self::X,
            _ => Self::K(k),
        }
    }

    /// Resolve the operand against the current index register.
    #[inline]
    pub const fn value(self, x: u32) -> u32 {
        match self {
            Self::K(k) => k,
            Self::X => x,
        }
    }

    pub const fn to_opcode(self) -> u16 {
        match self {
            Self::K(_) => BPF_K,
            Self::X => BPF_X,
        }
    }

    /// The immediate, if any.
    pub const fn immediate(self) -> u32 {
        match self {
            Self::K(k) => k,
            Self::X => 0,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::K(k) => write!(f, "#{k:#x}"),
            Self::X => f.write_str("x"),
        }
    }
}

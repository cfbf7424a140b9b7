//! Classic BPF Instruction Format
//!
//! Instructions are 64 bits (8 bytes) in host byte order:
//!
//! ```text
//! +----------+----+----+------------+
//! |  opcode  | jt | jf |      k     |
//! | 16 bits  | 8b | 8b |   32 bits  |
//! +----------+----+----+------------+
//! ```
//!
//! `jt` and `jf` are only meaningful for conditional jumps. Every other
//! instruction uses `k` as an immediate, an offset or a scratch slot.

use core::fmt;

use kernel_abi::{
    BPF_A, BPF_ABS, BPF_ALU, BPF_IMM, BPF_IND, BPF_JA, BPF_JMP, BPF_K, BPF_LD, BPF_LDX, BPF_LEN,
    BPF_MEM, BPF_MISC, BPF_MSH, BPF_NEG, BPF_RET, BPF_ST, BPF_STX, BPF_TAX, BPF_TXA, BPF_W,
};
pub use kernel_abi::BpfInsn;

use super::opcode::{AluOp, JmpCond, LoadSize, Operand};

/// A decoded classic BPF instruction.
///
/// Decoding is exact: every opcode bit must belong to a known form, so
/// matching on this type covers the whole accepted instruction set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Insn {
    /// `A <- P[k:size]`
    LdAbs { size: LoadSize, k: u32 },
    /// `A <- P[X+k:size]`
    LdInd { size: LoadSize, k: u32 },
    /// `A <- k`
    LdImm(u32),
    /// `A <- wire length`
    LdLen,
    /// `A <- M[k]`
    LdMem(u32),
    /// `X <- k`
    LdxImm(u32),
    /// `X <- wire length`
    LdxLen,
    /// `X <- M[k]`
    LdxMem(u32),
    /// `X <- 4 * (P[k:1] & 0xf)`, the IPv4 header length idiom
    LdxMsh(u32),
    /// `M[k] <- A`
    St(u32),
    /// `M[k] <- X`
    Stx(u32),
    /// `A <- A op operand`
    Alu { op: AluOp, src: Operand },
    /// `A <- -A`
    Neg,
    /// `pc += k`
    Ja(u32),
    /// `pc += (A cond operand) ? jt : jf`
    Jmp {
        cond: JmpCond,
        src: Operand,
        jt: u8,
        jf: u8,
    },
    /// Accept `k` bytes.
    RetK(u32),
    /// Accept `A` bytes.
    RetA,
    /// `X <- A`
    Tax,
    /// `A <- X`
    Txa,
}

impl Insn {
    /// Decode a wire record. Returns `None` for any opcode outside the
    /// classic instruction set, including coprocessor calls.
    pub const fn decode(raw: &BpfInsn) -> Option<Self> {
        let code = raw.code;
        let k = raw.k;
        if code > 0xff {
            return None;
        }

        let insn = match kernel_abi::bpf_class(code) {
            BPF_LD => match kernel_abi::bpf_mode(code) {
                BPF_ABS => match LoadSize::from_opcode(code) {
                    Some(size) => Self::LdAbs { size, k },
                    None => return None,
                },
                BPF_IND => match LoadSize::from_opcode(code) {
                    Some(size) => Self::LdInd { size, k },
                    None => return None,
                },
                BPF_IMM if kernel_abi::bpf_size(code) == BPF_W => Self::LdImm(k),
                BPF_LEN if kernel_abi::bpf_size(code) == BPF_W => Self::LdLen,
                BPF_MEM if kernel_abi::bpf_size(code) == BPF_W => Self::LdMem(k),
                _ => return None,
            },
            BPF_LDX => match kernel_abi::bpf_mode(code) {
                BPF_IMM if kernel_abi::bpf_size(code) == BPF_W => Self::LdxImm(k),
                BPF_LEN if kernel_abi::bpf_size(code) == BPF_W => Self::LdxLen,
                BPF_MEM if kernel_abi::bpf_size(code) == BPF_W => Self::LdxMem(k),
                BPF_MSH if kernel_abi::bpf_size(code) == kernel_abi::BPF_B => Self::LdxMsh(k),
                _ => return None,
            },
            BPF_ST if code == BPF_ST => Self::St(k),
            BPF_STX if code == BPF_STX => Self::Stx(k),
            BPF_ALU => {
                if kernel_abi::bpf_op(code) == BPF_NEG {
                    if kernel_abi::bpf_src(code) != BPF_K {
                        return None;
                    }
                    Self::Neg
                } else {
                    match AluOp::from_opcode(code) {
                        Some(op) => Self::Alu {
                            op,
                            src: Operand::from_opcode(code, k),
                        },
                        None => return None,
                    }
                }
            }
            BPF_JMP => {
                if kernel_abi::bpf_op(code) == BPF_JA {
                    if kernel_abi::bpf_src(code) != BPF_K {
                        return None;
                    }
                    Self::Ja(k)
                } else {
                    match JmpCond::from_opcode(code) {
                        Some(cond) => Self::Jmp {
                            cond,
                            src: Operand::from_opcode(code, k),
                            jt: raw.jt,
                            jf: raw.jf,
                        },
                        None => return None,
                    }
                }
            }
            BPF_RET if kernel_abi::bpf_mode(code) == 0 => match kernel_abi::bpf_rval(code) {
                BPF_K => Self::RetK(k),
                BPF_A => Self::RetA,
                _ => return None,
            },
            BPF_MISC => match kernel_abi::bpf_miscop(code) {
                BPF_TAX => Self::Tax,
                BPF_TXA => Self::Txa,
                _ => return None,
            },
            _ => return None,
        };
        Some(insn)
    }

    /// Encode back into a wire record.
    pub const fn encode(&self) -> BpfInsn {
        match *self {
            Self::LdAbs { size, k } => BpfInsn::stmt(BPF_LD | size.to_opcode() | BPF_ABS, k),
            Self::LdInd { size, k } => BpfInsn::stmt(BPF_LD | size.to_opcode() | BPF_IND, k),
            Self::LdImm(k) => BpfInsn::stmt(BPF_LD | BPF_W | BPF_IMM, k),
            Self::LdLen => BpfInsn::stmt(BPF_LD | BPF_W | BPF_LEN, 0),
            Self::LdMem(k) => BpfInsn::stmt(BPF_LD | BPF_W | BPF_MEM, k),
            Self::LdxImm(k) => BpfInsn::stmt(BPF_LDX | BPF_W | BPF_IMM, k),
            Self::LdxLen => BpfInsn::stmt(BPF_LDX | BPF_W | BPF_LEN, 0),
            Self::LdxMem(k) => BpfInsn::stmt(BPF_LDX | BPF_W | BPF_MEM, k),
            Self::LdxMsh(k) => BpfInsn::stmt(BPF_LDX | kernel_abi::BPF_B | BPF_MSH, k),
            Self::St(k) => BpfInsn::stmt(BPF_ST, k),
            Self::Stx(k) => BpfInsn::stmt(BPF_STX, k),
            Self::Alu { op, src } => {
                BpfInsn::stmt(BPF_ALU | op.to_opcode() | src.to_opcode(), src.immediate())
            }
            Self::Neg => BpfInsn::stmt(BPF_ALU | BPF_NEG, 0),
            Self::Ja(k) => BpfInsn::stmt(BPF_JMP | BPF_JA, k),
            Self::Jmp { cond, src, jt, jf } => BpfInsn::jump(
                BPF_JMP | cond.to_opcode() | src.to_opcode(),
                src.immediate(),
                jt,
                jf,
            ),
            Self::RetK(k) => BpfInsn::stmt(BPF_RET | BPF_K, k),
            Self::RetA => BpfInsn::stmt(BPF_RET | BPF_A, 0),
            Self::Tax => BpfInsn::stmt(BPF_MISC | BPF_TAX, 0),
            Self::Txa => BpfInsn::stmt(BPF_MISC | BPF_TXA, 0),
        }
    }

    /// Check if this instruction ends execution.
    #[inline]
    pub const fn is_return(&self) -> bool {
        matches!(self, Self::RetK(_) | Self::RetA)
    }

    /// Check if this instruction transfers control.
    #[inline]
    pub const fn is_jump(&self) -> bool {
        matches!(self, Self::Ja(_) | Self::Jmp { .. })
    }

    /// Scratch slot read by this instruction, if any.
    #[inline]
    pub const fn mem_load(&self) -> Option<u32> {
        match *self {
            Self::LdMem(k) | Self::LdxMem(k) => Some(k),
            _ => None,
        }
    }

    /// Scratch slot written by this instruction, if any.
    #[inline]
    pub const fn mem_store(&self) -> Option<u32> {
        match *self {
            Self::St(k) | Self::Stx(k) => Some(k),
            _ => None,
        }
    }
}

impl fmt::Display for Insn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = |size: LoadSize| match size {
            LoadSize::Word => "",
            LoadSize::Half => "h",
            LoadSize::Byte => "b",
        };
        match *self {
            Self::LdAbs { size, k } => write!(f, "ld{} [{k}]", width(size)),
            Self::LdInd { size, k } => write!(f, "ld{} [x + {k}]", width(size)),
            Self::LdImm(k) => write!(f, "ld #{k:#x}"),
            Self::LdLen => f.write_str("ld #len"),
            Self::LdMem(k) => write!(f, "ld M[{k}]"),
            Self::LdxImm(k) => write!(f, "ldx #{k:#x}"),
            Self::LdxLen => f.write_str("ldx #len"),
            Self::LdxMem(k) => write!(f, "ldx M[{k}]"),
            Self::LdxMsh(k) => write!(f, "ldxb 4*([{k}]&0xf)"),
            Self::St(k) => write!(f, "st M[{k}]"),
            Self::Stx(k) => write!(f, "stx M[{k}]"),
            Self::Alu { op, src } => write!(f, "{op} {src}"),
            Self::Neg => f.write_str("neg"),
            Self::Ja(k) => write!(f, "ja +{k}"),
            Self::Jmp { cond, src, jt, jf } => write!(f, "{cond} {src}, +{jt}, +{jf}"),
            Self::RetK(k) => write!(f, "ret #{k}"),
            Self::RetA => f.write_str("ret a"),
            Self::Tax => f.write_str("tax"),
            Self::Txa => f.write_str("txa"),
        }
    }
}

#[cfg(test)]
mod tests {
    use kernel_abi::{BPF_B, BPF_DIV, BPF_H, BPF_JEQ, BPF_X};

    use super::*;

    #[test]
    fn decode_loads() {
        let raw = BpfInsn::stmt(BPF_LD | BPF_H | BPF_ABS, 12);
        assert_eq!(
            Insn::decode(&raw),
            Some(Insn::LdAbs {
                size: LoadSize::Half,
                k: 12
            })
        );
        let raw = BpfInsn::stmt(BPF_LDX | BPF_B | BPF_MSH, 14);
        assert_eq!(Insn::decode(&raw), Some(Insn::LdxMsh(14)));
    }

    #[test]
    fn decode_rejects_unknown_forms() {
        // half-word immediate load does not exist
        assert_eq!(Insn::decode(&BpfInsn::stmt(BPF_LD | BPF_H | BPF_IMM, 0)), None);
        // MSH is only defined for LDX
        assert_eq!(Insn::decode(&BpfInsn::stmt(BPF_LD | BPF_B | BPF_MSH, 0)), None);
        // stray bits on a store
        assert_eq!(Insn::decode(&BpfInsn::stmt(BPF_ST | 0x40, 0)), None);
        // coprocessor call
        assert_eq!(Insn::decode(&BpfInsn::stmt(BPF_MISC | 0x20, 0)), None);
        // bits above the classic opcode byte
        assert_eq!(Insn::decode(&BpfInsn::stmt(0x106, 0)), None);
        // return of X
        assert_eq!(Insn::decode(&BpfInsn::stmt(BPF_RET | BPF_X, 0)), None);
    }

    #[test]
    fn decode_alu_and_jumps() {
        let raw = BpfInsn::stmt(BPF_ALU | BPF_DIV | BPF_X, 0);
        assert_eq!(
            Insn::decode(&raw),
            Some(Insn::Alu {
                op: AluOp::Div,
                src: Operand::X
            })
        );
        let raw = BpfInsn::jump(BPF_JMP | BPF_JEQ | BPF_K, 0x800, 0, 3);
        assert_eq!(
            Insn::decode(&raw),
            Some(Insn::Jmp {
                cond: JmpCond::Eq,
                src: Operand::K(0x800),
                jt: 0,
                jf: 3
            })
        );
    }

    #[test]
    fn encode_inverts_decode() {
        let program = [
            BpfInsn::stmt(BPF_LD | BPF_H | BPF_ABS, 12),
            BpfInsn::jump(BPF_JMP | BPF_JEQ | BPF_K, 0x800, 0, 1),
            BpfInsn::stmt(BPF_LDX | BPF_B | BPF_MSH, 14),
            BpfInsn::stmt(BPF_ALU | BPF_NEG, 0),
            BpfInsn::stmt(BPF_MISC | BPF_TXA, 0),
            BpfInsn::stmt(BPF_RET | BPF_A, 0),
        ];
        for raw in program {
            let insn = Insn::decode(&raw).expect("valid opcode");
            assert_eq!(insn.encode(), raw);
        }
    }

    #[test]
    fn display() {
        use alloc::string::ToString;

        let insn = Insn::LdAbs {
            size: LoadSize::Byte,
            k: 23,
        };
        assert_eq!(insn.to_string(), "ldb [23]");
        assert_eq!(Insn::RetK(0).to_string(), "ret #0");
    }
}

//! Classic BPF Bytecode
//!
//! This module implements the classic (cBPF) instruction set used by
//! packet capture filters.
//!
//! # Architecture
//!
//! - 32-bit accumulator `A` and index register `X`
//! - 16 words of scratch memory `M[]`
//! - 8-byte instruction records with a 16-bit opcode
//! - Forward-only jumps, so every program terminates
//!
//! Wire records ([`BpfInsn`]) are decoded once into the closed [`Insn`]
//! enumeration. The verifier and the interpreter only ever see decoded
//! instructions.

pub mod insn;
pub mod opcode;
pub mod program;

pub use insn::{BpfInsn, Insn};
pub use opcode::{AluOp, JmpCond, LoadSize, Operand};
pub use program::{Program, ProgramBuilder, ProgramError, decode_program, encode_program};

//! Classic BPF Packet Filter Engine
//!
//! This crate implements the filter machine used by packet capture
//! devices: a small accumulator machine that decides, for every packet,
//! how many of its bytes to capture. Programs come from untrusted
//! consumers, so they are verified before installation and every access
//! is checked again at run time.
//!
//! # Machine Model
//!
//! | Resource | Size |
//! |----------|------|
//! | Accumulator `A` | 32 bits |
//! | Index register `X` | 32 bits |
//! | Scratch memory `M[]` | 16 words |
//! | Program | 1 to 512 instructions |
//! | Jumps | forward only |
//!
//! # Modules
//!
//! - [`bytecode`] - Instruction set, decoding and program representation
//! - [`verifier`] - Static safety verification
//! - [`execution`] - Interpreter and packet view
//!
//! # Quick Start
//!
//! ```
//! use kernel_abi::{BPF_ABS, BPF_B, BPF_JEQ, BPF_JMP, BPF_K, BPF_LD, BPF_RET};
//! use kernel_bpf::bytecode::{BpfInsn, ProgramBuilder};
//! use kernel_bpf::execution::{Packet, filter};
//!
//! // Accept IPv4 packets with a 20-byte header, reject everything else
//! let program = ProgramBuilder::new()
//!     .insn(BpfInsn::stmt(BPF_LD | BPF_B | BPF_ABS, 0))
//!     .insn(BpfInsn::jump(BPF_JMP | BPF_JEQ | BPF_K, 0x45, 1, 0))
//!     .insn(BpfInsn::stmt(BPF_RET | BPF_K, 0))
//!     .insn(BpfInsn::stmt(BPF_RET | BPF_K, u32::MAX))
//!     .build()
//!     .expect("valid program");
//!
//! let packet = [0x45u8, 0x00, 0x00, 0x14];
//! assert_eq!(filter(Some(&program), &Packet::new(&packet)), u32::MAX);
//! ```

#![no_std]

extern crate alloc;

pub mod bytecode;
pub mod execution;
pub mod verifier;

pub use bytecode::{Program, ProgramError};
pub use execution::{Packet, filter};
pub use verifier::VerifyError;

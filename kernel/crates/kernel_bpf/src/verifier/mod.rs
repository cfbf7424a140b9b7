//! BPF Verifier
//!
//! The verifier ensures that a filter program is safe to execute before it
//! can be installed. It never runs the program; it only inspects it.
//!
//! - Size: between one and [`BPF_MAXINSNS`](kernel_abi::BPF_MAXINSNS) instructions
//! - Opcodes: every instruction decodes to a known [`Insn`](crate::bytecode::Insn)
//! - Operands: scratch slots below [`BPF_MEMWORDS`](kernel_abi::BPF_MEMWORDS),
//!   immediate shifts below 32, no immediate division by zero
//! - Control flow: jump targets inside the program, no falling off the end
//! - Dataflow: scratch slots are only loaded after a store on every path
//!
//! # Architecture
//!
//! ```text
//!   raw records ──► check_basic ──► decode + check_insn ──► ControlFlowGraph
//!                                                                │
//!                                   accept ◄── dataflow (work queue of
//!                                              initialized-slot masks)
//! ```
//!
//! Jumps are forward-only, so the control flow graph is acyclic and the
//! dataflow reaches its fixpoint in a single pass in index order.

mod cfg;
mod core;
mod error;
mod state;

pub use self::core::{Verifier, verify};
pub use cfg::ControlFlowGraph;
pub use error::{VerifyError, VerifyResult};
pub use state::SlotMask;

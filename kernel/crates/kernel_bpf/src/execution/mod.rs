//! BPF Program Execution
//!
//! [`filter`] is the entry point used by capture devices: it never fails,
//! and any fault during execution means the packet is not captured.
//! [`Interpreter::execute`] exposes the fault for diagnostics.
//!
//! Jumps only move forward, so a run executes at most one instruction per
//! program slot; [`Verdict::steps`] reports how many were executed.

mod interpreter;
mod packet;

pub use interpreter::Interpreter;
pub use packet::Packet;
use thiserror::Error;

use crate::bytecode::opcode::AluOp;
use crate::bytecode::program::Program;

/// Outcome of a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    /// Number of packet bytes to capture; zero rejects the packet.
    pub snaplen: u32,
    /// Instructions executed.
    pub steps: usize,
}

/// Faults that end a run early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Fault {
    /// Load beyond the packet's wire length
    #[error("load of {width} bytes at offset {offset} out of bounds (pc {pc})")]
    OutOfBounds { pc: usize, offset: u32, width: usize },

    /// Load inside the wire length but past the bytes the chain holds
    #[error("load at offset {offset} beyond captured bytes (pc {pc})")]
    Truncated { pc: usize, offset: u32 },

    /// `X + k` overflowed in an indexed load
    #[error("indexed address {x} + {k} overflows (pc {pc})")]
    AddressOverflow { pc: usize, x: u32, k: u32 },

    /// Division by zero or shift of 32 or more
    #[error("{op} by {rhs} faults (pc {pc})")]
    Arithmetic { pc: usize, op: AluOp, rhs: u32 },

    /// Scratch slot out of range
    #[error("scratch slot {slot} out of range (pc {pc})")]
    BadSlot { pc: usize, slot: u32 },

    /// Ran past the last instruction
    #[error("program counter {pc} outside program")]
    PcOutOfRange { pc: usize },
}

/// Run a filter and return the number of bytes to capture.
///
/// No program accepts the whole packet; the result saturates at
/// `u32::MAX`.
pub fn filter(program: Option<&Program>, packet: &Packet<'_>) -> u32 {
    let Some(program) = program else {
        return u32::try_from(packet.wirelen()).unwrap_or(u32::MAX);
    };
    match Interpreter::new().execute(program, packet) {
        Ok(verdict) => verdict.snaplen,
        Err(fault) => {
            log::trace!("filter fault: {fault}");
            0
        }
    }
}

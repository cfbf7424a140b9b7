//! Verification Errors
//!
//! Error types returned when BPF program verification fails.

use thiserror::Error;

/// Errors that can occur during BPF program verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    /// Program is empty
    #[error("empty program")]
    EmptyProgram,

    /// Program exceeds the instruction limit
    #[error("program has {count} instructions, maximum is {max}")]
    TooManyInstructions {
        /// Instruction count
        count: usize,
        /// Instruction limit
        max: usize,
    },

    /// Opcode outside the classic instruction set
    #[error("invalid opcode {code:#06x} at instruction {insn_idx}")]
    InvalidOpcode {
        /// Instruction index
        insn_idx: usize,
        /// Raw opcode
        code: u16,
    },

    /// Scratch memory operand out of range
    #[error("scratch slot {slot} out of range at instruction {insn_idx}")]
    InvalidMemSlot {
        /// Instruction index
        insn_idx: usize,
        /// Slot operand
        slot: u32,
    },

    /// Load from a scratch slot not written on every path
    #[error("load of uninitialized scratch slot {slot} at instruction {insn_idx}")]
    UninitializedSlot {
        /// Instruction index
        insn_idx: usize,
        /// Slot operand
        slot: u32,
    },

    /// Immediate shift of 32 or more
    #[error("shift by {amount} at instruction {insn_idx}")]
    ShiftTooLarge {
        /// Instruction index
        insn_idx: usize,
        /// Shift amount
        amount: u32,
    },

    /// Division or modulo by immediate zero
    #[error("division by zero at instruction {insn_idx}")]
    DivisionByZero {
        /// Instruction index
        insn_idx: usize,
    },

    /// Jump target outside the program
    #[error("jump to {target} at instruction {insn_idx} leaves the program")]
    InvalidJump {
        /// Instruction index of the jump
        insn_idx: usize,
        /// Resolved target index
        target: usize,
    },

    /// Reachable instruction falls through past the last instruction
    #[error("instruction {insn_idx} falls off the end of the program")]
    FallsOffEnd {
        /// Instruction index
        insn_idx: usize,
    },
}

impl VerifyError {
    /// Index of the offending instruction, if the error is tied to one.
    pub fn insn_idx(&self) -> Option<usize> {
        match self {
            Self::EmptyProgram | Self::TooManyInstructions { .. } => None,
            Self::InvalidOpcode { insn_idx, .. }
            | Self::InvalidMemSlot { insn_idx, .. }
            | Self::UninitializedSlot { insn_idx, .. }
            | Self::ShiftTooLarge { insn_idx, .. }
            | Self::DivisionByZero { insn_idx }
            | Self::InvalidJump { insn_idx, .. }
            | Self::FallsOffEnd { insn_idx } => Some(*insn_idx),
        }
    }
}

/// Result type for verification operations.
pub type VerifyResult<T> = Result<T, VerifyError>;

//! BPF Program Representation
//!
//! This module defines the [`Program`] type, a filter program that has
//! passed verification and is ready to run. There is no way to build a
//! `Program` without going through the verifier, so holding one is proof
//! that it is safe to execute.
//!
//! Programs travel on the wire as a [`BpfProgramHeader`] holding the
//! instruction count, followed by that many [`BpfInsn`] records in host
//! byte order.

extern crate alloc;

use alloc::vec::Vec;
use core::fmt;

use kernel_abi::{BPF_MAXINSNS, BpfProgramHeader};
use thiserror::Error;
use zerocopy::{FromBytes, IntoBytes};

use super::insn::{BpfInsn, Insn};
use crate::verifier::{self, VerifyError};

const HEADER_LEN: usize = size_of::<BpfProgramHeader>();

/// A verified classic BPF program.
#[derive(Clone, PartialEq, Eq)]
pub struct Program {
    /// Wire records as installed.
    raw: Vec<BpfInsn>,
    /// The same records, decoded.
    insns: Vec<Insn>,
}

impl Program {
    /// Verify and wrap a sequence of instructions.
    pub fn new(raw: &[BpfInsn]) -> Result<Self, ProgramError> {
        let insns = verifier::verify(raw)?;
        let mut copy = Vec::new();
        copy.try_reserve_exact(raw.len())
            .map_err(|_| ProgramError::OutOfMemory)?;
        copy.extend_from_slice(raw);
        Ok(Self { raw: copy, insns })
    }

    /// Decode the wire encoding and verify the result.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProgramError> {
        Self::new(&decode_program(bytes)?)
    }

    /// Decoded instructions.
    #[inline]
    pub fn insns(&self) -> &[Insn] {
        &self.insns
    }

    /// Instructions as they were installed.
    #[inline]
    pub fn raw(&self) -> &[BpfInsn] {
        &self.raw
    }

    /// Number of instructions.
    #[inline]
    pub fn len(&self) -> usize {
        self.insns.len()
    }

    /// Always false: empty programs never pass verification.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.insns.is_empty()
    }

    /// Wire encoding of this program.
    pub fn to_bytes(&self) -> Vec<u8> {
        encode_program(&self.raw)
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("insn_count", &self.insns.len())
            .finish()
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, insn) in self.insns.iter().enumerate() {
            writeln!(f, "({idx:03}) {insn}")?;
        }
        Ok(())
    }
}

/// Errors in the wire encoding or the program itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProgramError {
    /// Fewer bytes than the header or its instruction count require
    #[error("truncated program: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// Bytes left over after the last instruction
    #[error("{extra} trailing bytes after program")]
    TrailingBytes { extra: usize },

    /// The program failed verification
    #[error("program rejected: {0}")]
    Rejected(#[from] VerifyError),

    /// No memory for the instruction records
    #[error("out of memory for program")]
    OutOfMemory,
}

/// Split the wire encoding into instruction records.
///
/// A count of zero yields an empty vector; callers decide what an empty
/// program means.
pub fn decode_program(bytes: &[u8]) -> Result<Vec<BpfInsn>, ProgramError> {
    let (header, records) =
        BpfProgramHeader::read_from_prefix(bytes).map_err(|_| ProgramError::Truncated {
            expected: HEADER_LEN,
            actual: bytes.len(),
        })?;

    let count = header.len as usize;
    if count > BPF_MAXINSNS {
        return Err(VerifyError::TooManyInstructions {
            count,
            max: BPF_MAXINSNS,
        }
        .into());
    }

    let expected = count * BpfInsn::SIZE;
    if records.len() < expected {
        return Err(ProgramError::Truncated {
            expected: HEADER_LEN + expected,
            actual: bytes.len(),
        });
    }
    if records.len() > expected {
        return Err(ProgramError::TrailingBytes {
            extra: records.len() - expected,
        });
    }

    let mut insns = Vec::new();
    insns
        .try_reserve_exact(count)
        .map_err(|_| ProgramError::OutOfMemory)?;
    for chunk in records.chunks_exact(BpfInsn::SIZE) {
        let insn = BpfInsn::read_from_bytes(chunk).map_err(|_| ProgramError::Truncated {
            expected: BpfInsn::SIZE,
            actual: chunk.len(),
        })?;
        insns.push(insn);
    }
    Ok(insns)
}

/// Produce the wire encoding of a sequence of instructions.
pub fn encode_program(insns: &[BpfInsn]) -> Vec<u8> {
    let header = BpfProgramHeader {
        len: insns.len() as u32,
    };
    let mut bytes = Vec::with_capacity(HEADER_LEN + insns.len() * BpfInsn::SIZE);
    bytes.extend_from_slice(header.as_bytes());
    bytes.extend_from_slice(insns.as_bytes());
    bytes
}

/// Builder for constructing programs.
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    insns: Vec<BpfInsn>,
}

impl ProgramBuilder {
    /// Create a new program builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a wire instruction.
    pub fn insn(mut self, insn: BpfInsn) -> Self {
        self.insns.push(insn);
        self
    }

    /// Add a decoded instruction.
    pub fn op(mut self, insn: Insn) -> Self {
        self.insns.push(insn.encode());
        self
    }

    /// Add multiple instructions.
    pub fn insns(mut self, insns: impl IntoIterator<Item = BpfInsn>) -> Self {
        self.insns.extend(insns);
        self
    }

    /// Number of instructions added so far.
    pub fn len(&self) -> usize {
        self.insns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insns.is_empty()
    }

    /// Verify and build the program.
    pub fn build(self) -> Result<Program, ProgramError> {
        Program::new(&self.insns)
    }
}

#[cfg(test)]
mod tests {
    use alloc::string::ToString;
    use alloc::vec;

    use kernel_abi::{BPF_ABS, BPF_B, BPF_JEQ, BPF_JMP, BPF_K, BPF_LD, BPF_RET};

    use super::*;

    fn ipv4_version_filter() -> Vec<BpfInsn> {
        vec![
            BpfInsn::stmt(BPF_LD | BPF_B | BPF_ABS, 0),
            BpfInsn::jump(BPF_JMP | BPF_JEQ | BPF_K, 0x45, 1, 0),
            BpfInsn::stmt(BPF_RET | BPF_K, 0),
            BpfInsn::stmt(BPF_RET | BPF_K, u32::MAX),
        ]
    }

    #[test]
    fn simple_program() {
        let program = Program::new(&ipv4_version_filter()).expect("valid program");
        assert_eq!(program.len(), 4);
        assert_eq!(program.raw(), ipv4_version_filter().as_slice());
        assert_eq!(program.insns()[3], Insn::RetK(u32::MAX));
    }

    #[test]
    fn empty_program_rejected() {
        assert_eq!(
            ProgramBuilder::new().build(),
            Err(ProgramError::Rejected(VerifyError::EmptyProgram))
        );
    }

    #[test]
    fn wire_encoding() {
        let bytes = encode_program(&ipv4_version_filter());
        assert_eq!(bytes.len(), 4 + 4 * 8);
        assert_eq!(&bytes[..4], &4u32.to_ne_bytes());
        assert_eq!(decode_program(&bytes).unwrap(), ipv4_version_filter());

        let program = Program::from_bytes(&bytes).unwrap();
        assert_eq!(program.to_bytes(), bytes);
    }

    #[test]
    fn malformed_encodings() {
        assert_eq!(
            decode_program(&[1, 0]),
            Err(ProgramError::Truncated {
                expected: 4,
                actual: 2
            })
        );

        let mut bytes = encode_program(&ipv4_version_filter());
        bytes.push(0);
        assert_eq!(
            decode_program(&bytes),
            Err(ProgramError::TrailingBytes { extra: 1 })
        );

        bytes.truncate(bytes.len() - 2);
        assert!(matches!(
            decode_program(&bytes),
            Err(ProgramError::Truncated { .. })
        ));

        let oversized = ((BPF_MAXINSNS + 1) as u32).to_ne_bytes();
        assert_eq!(
            decode_program(&oversized),
            Err(ProgramError::Rejected(VerifyError::TooManyInstructions {
                count: BPF_MAXINSNS + 1,
                max: BPF_MAXINSNS
            }))
        );
    }

    #[test]
    fn zero_count_decodes_empty() {
        assert_eq!(decode_program(&0u32.to_ne_bytes()), Ok(Vec::new()));
    }

    #[test]
    fn decode_reserves_exact_count() {
        let bytes = encode_program(&ipv4_version_filter());
        let raw = decode_program(&bytes).unwrap();
        assert_eq!(raw.capacity(), 4);
        assert_eq!(
            ProgramError::OutOfMemory.to_string(),
            "out of memory for program"
        );
    }
}

//! BPF Bytecode Interpreter
//!
//! This module provides a pure interpreter for verified classic BPF
//! programs. Every check the verifier relies on is repeated at run time,
//! so a fault ends execution with an error instead of touching memory
//! outside the packet or the scratch array.

use kernel_abi::BPF_MEMWORDS;

use super::packet::Packet;
use super::{Fault, Verdict};
use crate::bytecode::insn::Insn;
use crate::bytecode::opcode::LoadSize;
use crate::bytecode::program::Program;

/// Registers and scratch memory of one run. All start at zero.
#[derive(Debug, Default)]
struct Machine {
    a: u32,
    x: u32,
    mem: [u32; BPF_MEMWORDS],
}

impl Machine {
    #[inline]
    fn slot(&self, pc: usize, k: u32) -> Result<u32, Fault> {
        self.mem
            .get(k as usize)
            .copied()
            .ok_or(Fault::BadSlot { pc, slot: k })
    }

    #[inline]
    fn slot_mut(&mut self, pc: usize, k: u32) -> Result<&mut u32, Fault> {
        self.mem
            .get_mut(k as usize)
            .ok_or(Fault::BadSlot { pc, slot: k })
    }
}

/// Classic BPF interpreter.
#[derive(Debug, Default, Clone, Copy)]
pub struct Interpreter;

impl Interpreter {
    /// Create a new interpreter.
    pub const fn new() -> Self {
        Self
    }

    /// Run `program` against `packet`.
    pub fn execute(&self, program: &Program, packet: &Packet<'_>) -> Result<Verdict, Fault> {
        let insns = program.insns();
        let wirelen = u32::try_from(packet.wirelen()).unwrap_or(u32::MAX);
        let mut m = Machine::default();
        let mut pc = 0usize;
        let mut steps = 0usize;

        loop {
            let insn = *insns.get(pc).ok_or(Fault::PcOutOfRange { pc })?;
            let here = pc;
            steps += 1;
            pc += 1;

            match insn {
                Insn::LdAbs { size, k } => m.a = load(packet, here, size, k)?,
                Insn::LdInd { size, k } => {
                    let addr = m.x.checked_add(k).ok_or(Fault::AddressOverflow {
                        pc: here,
                        x: m.x,
                        k,
                    })?;
                    m.a = load(packet, here, size, addr)?;
                }
                Insn::LdImm(k) => m.a = k,
                Insn::LdLen => m.a = wirelen,
                Insn::LdMem(k) => m.a = m.slot(here, k)?,
                Insn::LdxImm(k) => m.x = k,
                Insn::LdxLen => m.x = wirelen,
                Insn::LdxMem(k) => m.x = m.slot(here, k)?,
                Insn::LdxMsh(k) => m.x = 4 * (load(packet, here, LoadSize::Byte, k)? & 0x0f),
                Insn::St(k) => *m.slot_mut(here, k)? = m.a,
                Insn::Stx(k) => *m.slot_mut(here, k)? = m.x,
                Insn::Alu { op, src } => {
                    let rhs = src.value(m.x);
                    m.a = op.apply(m.a, rhs).ok_or(Fault::Arithmetic { pc: here, op, rhs })?;
                }
                Insn::Neg => m.a = m.a.wrapping_neg(),
                Insn::Ja(k) => pc = pc.saturating_add(k as usize),
                Insn::Jmp { cond, src, jt, jf } => {
                    let taken = cond.holds(m.a, src.value(m.x));
                    pc += usize::from(if taken { jt } else { jf });
                }
                Insn::RetK(k) => return Ok(Verdict { snaplen: k, steps }),
                Insn::RetA => {
                    return Ok(Verdict {
                        snaplen: m.a,
                        steps,
                    });
                }
                Insn::Tax => m.x = m.a,
                Insn::Txa => m.a = m.x,
            }
        }
    }
}

/// Big-endian load of `size` bytes at `addr`.
#[inline]
fn load(packet: &Packet<'_>, pc: usize, size: LoadSize, addr: u32) -> Result<u32, Fault> {
    let offset = addr as usize;
    let width = size.bytes();
    if offset.saturating_add(width) > packet.wirelen() {
        return Err(Fault::OutOfBounds {
            pc,
            offset: addr,
            width,
        });
    }
    let missing = Fault::Truncated { pc, offset: addr };
    Ok(match size {
        LoadSize::Word => u32::from_be_bytes(packet.fetch::<4>(offset).ok_or(missing)?),
        LoadSize::Half => u32::from(u16::from_be_bytes(packet.fetch::<2>(offset).ok_or(missing)?)),
        LoadSize::Byte => u32::from(packet.fetch::<1>(offset).ok_or(missing)?[0]),
    })
}

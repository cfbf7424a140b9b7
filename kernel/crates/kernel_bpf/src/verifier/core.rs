//! Core Verifier Implementation
//!
//! Verification runs in phases: size checks, decoding with per-instruction
//! operand checks, control flow graph construction, and a forward dataflow
//! pass over the reachable instructions that proves scratch loads only
//! read stored slots.

extern crate alloc;

use alloc::collections::BTreeSet;
use alloc::vec::Vec;

use kernel_abi::{BPF_MAXINSNS, BPF_MEMWORDS};

use super::cfg::{ControlFlowGraph, Successors};
use super::error::{VerifyError, VerifyResult};
use super::state::SlotMask;
use crate::bytecode::insn::{BpfInsn, Insn};
use crate::bytecode::opcode::Operand;

/// Verify a program and return its decoded instructions.
pub fn verify(raw: &[BpfInsn]) -> VerifyResult<Vec<Insn>> {
    Verifier::verify(raw)
}

/// Classic BPF program verifier.
pub struct Verifier {
    /// Decoded instructions
    insns: Vec<Insn>,

    /// Control flow graph
    cfg: ControlFlowGraph,

    /// Initialized-slot state on entry to each instruction; `None` until
    /// some path reaches it.
    states: Vec<Option<SlotMask>>,
}

impl Verifier {
    /// Verify a program.
    ///
    /// This is the main entry point for verification. It performs:
    /// 1. Basic structural checks
    /// 2. Decoding and operand checks on every instruction
    /// 3. CFG construction
    /// 4. Dataflow over reachable instructions
    pub fn verify(raw: &[BpfInsn]) -> VerifyResult<Vec<Insn>> {
        Self::check_basic(raw)?;

        let insns = raw
            .iter()
            .enumerate()
            .map(|(idx, insn)| Self::check_insn(idx, insn, raw.len()))
            .collect::<VerifyResult<Vec<_>>>()?;

        let cfg = ControlFlowGraph::build(&insns);
        let mut verifier = Self {
            states: alloc::vec![None; insns.len()],
            insns,
            cfg,
        };
        verifier.check_dataflow()?;

        log::trace!("verified program of {} instructions", verifier.insns.len());
        Ok(verifier.insns)
    }

    fn check_basic(raw: &[BpfInsn]) -> VerifyResult<()> {
        if raw.is_empty() {
            return Err(VerifyError::EmptyProgram);
        }
        if raw.len() > BPF_MAXINSNS {
            return Err(VerifyError::TooManyInstructions {
                count: raw.len(),
                max: BPF_MAXINSNS,
            });
        }
        Ok(())
    }

    /// Decode one instruction and check the operands that do not depend on
    /// control flow.
    fn check_insn(insn_idx: usize, raw: &BpfInsn, len: usize) -> VerifyResult<Insn> {
        let insn = Insn::decode(raw).ok_or(VerifyError::InvalidOpcode {
            insn_idx,
            code: raw.code,
        })?;

        if let Some(slot) = insn.mem_load().or(insn.mem_store()) {
            if slot as usize >= BPF_MEMWORDS {
                return Err(VerifyError::InvalidMemSlot { insn_idx, slot });
            }
        }

        let next = insn_idx + 1;
        match insn {
            Insn::Alu {
                op,
                src: Operand::K(k),
            } => {
                if op.is_division() && k == 0 {
                    return Err(VerifyError::DivisionByZero { insn_idx });
                }
                if op.is_shift() && k >= u32::BITS {
                    return Err(VerifyError::ShiftTooLarge {
                        insn_idx,
                        amount: k,
                    });
                }
            }
            Insn::Ja(k) => {
                let target = next.saturating_add(k as usize);
                if target >= len {
                    return Err(VerifyError::InvalidJump { insn_idx, target });
                }
            }
            Insn::Jmp { jt, jf, .. } => {
                for target in [next + usize::from(jt), next + usize::from(jf)] {
                    if target >= len {
                        return Err(VerifyError::InvalidJump { insn_idx, target });
                    }
                }
            }
            _ => {}
        }

        Ok(insn)
    }

    /// Propagate initialized-slot masks along the graph.
    ///
    /// The work queue is ordered by index. Every edge points forward, so
    /// an instruction is popped only after all of its predecessors have
    /// contributed to its entry state.
    fn check_dataflow(&mut self) -> VerifyResult<()> {
        let len = self.insns.len();
        let mut work = BTreeSet::new();
        self.states[0] = Some(SlotMask::EMPTY);
        work.insert(0usize);

        while let Some(insn_idx) = work.pop_first() {
            let Some(entry) = self.states[insn_idx] else {
                continue;
            };
            let insn = self.insns[insn_idx];

            if let Some(slot) = insn.mem_load() {
                if !entry.contains(slot) {
                    return Err(VerifyError::UninitializedSlot { insn_idx, slot });
                }
            }
            let exit = match insn.mem_store() {
                Some(slot) => entry.with(slot),
                None => entry,
            };

            let succs = self.cfg.successors(insn_idx);
            if let Successors::One(next) = succs {
                if next >= len && !insn.is_jump() {
                    return Err(VerifyError::FallsOffEnd { insn_idx });
                }
            }
            for target in succs.iter() {
                // out-of-range jumps were rejected while decoding
                let Some(state) = self.states.get_mut(target) else {
                    return Err(VerifyError::InvalidJump { insn_idx, target });
                };
                *state = Some(state.map_or(exit, |mask| mask.meet(exit)));
                work.insert(target);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use kernel_abi::*;

    use super::*;

    fn ret_k(k: u32) -> BpfInsn {
        BpfInsn::stmt(BPF_RET | BPF_K, k)
    }

    #[test]
    fn accepts_minimal_program() {
        assert_eq!(verify(&[ret_k(0)]), Ok(vec![Insn::RetK(0)]));
    }

    #[test]
    fn rejects_empty_and_oversized() {
        assert_eq!(verify(&[]), Err(VerifyError::EmptyProgram));
        let long = vec![ret_k(0); BPF_MAXINSNS + 1];
        assert_eq!(
            verify(&long),
            Err(VerifyError::TooManyInstructions {
                count: BPF_MAXINSNS + 1,
                max: BPF_MAXINSNS
            })
        );
        let max = vec![ret_k(0); BPF_MAXINSNS];
        assert!(verify(&max).is_ok());
    }

    #[test]
    fn rejects_invalid_opcode() {
        let prog = [BpfInsn::stmt(BPF_MISC | 0x20, 0), ret_k(0)];
        assert_eq!(
            verify(&prog),
            Err(VerifyError::InvalidOpcode {
                insn_idx: 0,
                code: BPF_MISC | 0x20
            })
        );
    }

    #[test]
    fn rejects_unreachable_invalid_opcode() {
        let prog = [ret_k(0), BpfInsn::stmt(0xffff, 0)];
        assert!(matches!(
            verify(&prog),
            Err(VerifyError::InvalidOpcode { insn_idx: 1, .. })
        ));
    }

    #[test]
    fn rejects_uninitialized_load() {
        let prog = [BpfInsn::stmt(BPF_LD | BPF_MEM, 2), BpfInsn::stmt(BPF_RET | BPF_A, 0)];
        assert_eq!(
            verify(&prog),
            Err(VerifyError::UninitializedSlot { insn_idx: 0, slot: 2 })
        );
    }

    #[test]
    fn accepts_store_then_load() {
        let prog = [
            BpfInsn::stmt(BPF_LD | BPF_IMM, 7),
            BpfInsn::stmt(BPF_ST, 2),
            BpfInsn::stmt(BPF_LDX | BPF_MEM, 2),
            BpfInsn::stmt(BPF_MISC | BPF_TXA, 0),
            BpfInsn::stmt(BPF_RET | BPF_A, 0),
        ];
        assert!(verify(&prog).is_ok());
    }

    #[test]
    fn store_on_one_branch_only_is_rejected() {
        // 0: ldlen
        // 1: jgt #10, +0, +1
        // 2: st M[0]          (only when len > 10)
        // 3: ld M[0]          (join point)
        // 4: ret a
        let prog = [
            BpfInsn::stmt(BPF_LD | BPF_LEN, 0),
            BpfInsn::jump(BPF_JMP | BPF_JGT | BPF_K, 10, 0, 1),
            BpfInsn::stmt(BPF_ST, 0),
            BpfInsn::stmt(BPF_LD | BPF_MEM, 0),
            BpfInsn::stmt(BPF_RET | BPF_A, 0),
        ];
        assert_eq!(
            verify(&prog),
            Err(VerifyError::UninitializedSlot { insn_idx: 3, slot: 0 })
        );
    }

    #[test]
    fn store_on_both_branches_is_accepted() {
        let prog = [
            BpfInsn::stmt(BPF_LD | BPF_LEN, 0),
            BpfInsn::jump(BPF_JMP | BPF_JGT | BPF_K, 10, 0, 2),
            BpfInsn::stmt(BPF_ST, 0),
            BpfInsn::stmt(BPF_JMP | BPF_JA, 1),
            BpfInsn::stmt(BPF_STX, 0),
            BpfInsn::stmt(BPF_LD | BPF_MEM, 0),
            BpfInsn::stmt(BPF_RET | BPF_A, 0),
        ];
        assert!(verify(&prog).is_ok());
    }

    #[test]
    fn unreachable_uninitialized_load_is_accepted() {
        let prog = [ret_k(0), BpfInsn::stmt(BPF_LD | BPF_MEM, 5), ret_k(1)];
        assert!(verify(&prog).is_ok());
    }

    #[test]
    fn rejects_mem_slot_out_of_range() {
        let prog = [
            BpfInsn::stmt(BPF_ST, BPF_MEMWORDS as u32),
            BpfInsn::stmt(BPF_RET | BPF_A, 0),
        ];
        assert_eq!(
            verify(&prog),
            Err(VerifyError::InvalidMemSlot {
                insn_idx: 0,
                slot: BPF_MEMWORDS as u32
            })
        );
    }

    #[test]
    fn rejects_immediate_arithmetic_faults() {
        let div = [BpfInsn::stmt(BPF_ALU | BPF_DIV | BPF_K, 0), ret_k(0)];
        assert_eq!(verify(&div), Err(VerifyError::DivisionByZero { insn_idx: 0 }));

        let modulo = [BpfInsn::stmt(BPF_ALU | BPF_MOD | BPF_K, 0), ret_k(0)];
        assert_eq!(verify(&modulo), Err(VerifyError::DivisionByZero { insn_idx: 0 }));

        let shift = [BpfInsn::stmt(BPF_ALU | BPF_LSH | BPF_K, 32), ret_k(0)];
        assert_eq!(
            verify(&shift),
            Err(VerifyError::ShiftTooLarge {
                insn_idx: 0,
                amount: 32
            })
        );

        // X operands can only be checked at run time
        let by_x = [BpfInsn::stmt(BPF_ALU | BPF_DIV | BPF_X, 0), ret_k(0)];
        assert!(verify(&by_x).is_ok());
    }

    #[test]
    fn rejects_jump_out_of_program() {
        let ja = [BpfInsn::stmt(BPF_JMP | BPF_JA, 1), ret_k(0)];
        assert_eq!(
            verify(&ja),
            Err(VerifyError::InvalidJump {
                insn_idx: 0,
                target: 2
            })
        );

        let ja_overflow = [BpfInsn::stmt(BPF_JMP | BPF_JA, u32::MAX), ret_k(0)];
        assert!(matches!(
            verify(&ja_overflow),
            Err(VerifyError::InvalidJump { insn_idx: 0, .. })
        ));

        let jeq = [
            BpfInsn::jump(BPF_JMP | BPF_JEQ | BPF_K, 0, 0, 5),
            ret_k(0),
        ];
        assert_eq!(
            verify(&jeq),
            Err(VerifyError::InvalidJump {
                insn_idx: 0,
                target: 6
            })
        );
    }

    #[test]
    fn rejects_falling_off_the_end() {
        let prog = [BpfInsn::stmt(BPF_LD | BPF_LEN, 0)];
        assert_eq!(verify(&prog), Err(VerifyError::FallsOffEnd { insn_idx: 0 }));
    }
}

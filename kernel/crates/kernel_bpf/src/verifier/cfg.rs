//! Control Flow Graph Construction
//!
//! Builds the successor relation of a decoded program. Classic BPF jumps
//! are forward-only, so every edge goes from a lower to a higher index and
//! the graph is acyclic.

extern crate alloc;

use alloc::vec::Vec;

use crate::bytecode::insn::Insn;

/// Successors of one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Successors {
    /// Return: execution ends here
    None,
    /// Fall-through or unconditional jump
    One(usize),
    /// Conditional jump: (taken, not taken)
    Two(usize, usize),
}

impl Successors {
    pub fn iter(self) -> impl Iterator<Item = usize> {
        let (first, second) = match self {
            Self::None => (None, None),
            Self::One(a) => (Some(a), None),
            Self::Two(a, b) => (Some(a), Some(b)),
        };
        first.into_iter().chain(second)
    }
}

/// Control flow graph for a BPF program.
///
/// Targets are computed without bounds checks; a target equal to or past
/// the instruction count marks an edge leaving the program.
#[derive(Debug, Clone)]
pub struct ControlFlowGraph {
    /// Successors indexed by instruction
    succs: Vec<Successors>,
}

impl ControlFlowGraph {
    /// Build a control flow graph from decoded instructions.
    pub fn build(insns: &[Insn]) -> Self {
        let succs = insns
            .iter()
            .enumerate()
            .map(|(idx, insn)| {
                let next = idx + 1;
                match *insn {
                    _ if insn.is_return() => Successors::None,
                    Insn::Ja(k) => Successors::One(next.saturating_add(k as usize)),
                    Insn::Jmp { jt, jf, .. } => {
                        Successors::Two(next + usize::from(jt), next + usize::from(jf))
                    }
                    _ => Successors::One(next),
                }
            })
            .collect();

        Self { succs }
    }

    /// Successors of the instruction at `idx`.
    pub fn successors(&self, idx: usize) -> Successors {
        self.succs.get(idx).copied().unwrap_or(Successors::None)
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use super::*;
    use crate::bytecode::opcode::{JmpCond, Operand};

    #[test]
    fn linear_program() {
        let insns = vec![Insn::LdLen, Insn::Tax, Insn::RetA];
        let cfg = ControlFlowGraph::build(&insns);
        assert_eq!(cfg.successors(0), Successors::One(1));
        assert_eq!(cfg.successors(2), Successors::None);
        assert_eq!(cfg.successors(1), Successors::One(2));
    }

    #[test]
    fn conditional_jump_edges() {
        let insns = vec![
            Insn::LdLen,
            Insn::Jmp {
                cond: JmpCond::Gt,
                src: Operand::K(64),
                jt: 1,
                jf: 0,
            },
            Insn::RetK(0),
            Insn::RetK(u32::MAX),
        ];
        let cfg = ControlFlowGraph::build(&insns);
        assert_eq!(cfg.successors(1), Successors::Two(3, 2));
        assert_eq!(cfg.successors(2), Successors::None);
        assert_eq!(cfg.successors(3), Successors::None);
    }

    #[test]
    fn ja_skips_over_instructions() {
        let insns = vec![Insn::Ja(1), Insn::RetK(1), Insn::RetK(2)];
        let cfg = ControlFlowGraph::build(&insns);
        assert_eq!(cfg.successors(0), Successors::One(2));
        assert_eq!(cfg.successors(1), Successors::None);
    }

    #[test]
    fn edges_may_leave_program() {
        let insns = vec![Insn::LdLen];
        let cfg = ControlFlowGraph::build(&insns);
        assert_eq!(cfg.successors(0), Successors::One(1));
    }
}

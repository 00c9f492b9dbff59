use std::collections::{BTreeMap, BTreeSet};

use jdec_classfile::ExceptionTableEntry;
use thiserror::Error;

use crate::insn::{Insn, Instruction};

/// Index of a basic block within the CFG.
pub type BlockId = usize;

#[derive(Debug, Error)]
pub enum CfgError {
    #[error("Branch target {0:#x} does not align to an instruction boundary")]
    MisalignedTarget(u32),

    #[error("Exception handler pc {0:#x} does not align to an instruction boundary")]
    MisalignedHandler(u32),
}

/// How a normal (non-exceptional) edge leaves its source block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    FallThrough,
    CondBranch,
    Jump,
    /// `None` is the default case.
    SwitchCase(Option<i32>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub target: BlockId,
    pub kind: EdgeKind,
}

/// Exceptional edge: any instruction in `from` may transfer to `handler`.
///
/// These edges never participate in reducibility analysis; they carry the
/// protected range and declared catch type for exception structuring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerEdge {
    pub from: BlockId,
    pub handler: BlockId,
    pub start_pc: u32,
    pub end_pc: u32,
    /// `None` for catch-any (finally) entries.
    pub catch_type: Option<String>,
}

/// A basic block: a maximal straight-line instruction run. Never re-split
/// after construction.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub id: BlockId,
    /// Byte offset of the first instruction.
    pub start: u32,
    /// Byte offset past the last instruction (exclusive).
    pub end: u32,
    /// Index range into the instruction array [first_insn..last_insn).
    pub first_insn: usize,
    pub last_insn: usize,
    /// Normal successor edges, in decode order.
    pub succs: Vec<Edge>,
    /// Normal predecessor block ids.
    pub preds: Vec<BlockId>,
    /// Whether this block is an exception-handler entry.
    pub is_handler: bool,
}

/// Control flow graph for a single method.
#[derive(Debug)]
pub struct Cfg {
    /// Basic blocks, indexed by BlockId, ordered by start offset.
    pub blocks: Vec<BasicBlock>,
    /// Entry block id (always 0).
    pub entry: BlockId,
    /// Exceptional edges, grouped nowhere; exception structuring consumes them.
    pub handler_edges: Vec<HandlerEdge>,
    offset_to_block: BTreeMap<u32, BlockId>,
}

impl Cfg {
    /// Block whose range contains `offset`.
    pub fn block_at_offset(&self, offset: u32) -> Option<BlockId> {
        self.offset_to_block
            .range(..=offset)
            .next_back()
            .map(|(_, &id)| id)
            .filter(|&id| offset < self.blocks[id].end)
    }

    /// Block starting exactly at `offset`.
    pub fn block_starting_at(&self, offset: u32) -> Option<BlockId> {
        self.offset_to_block.get(&offset).copied()
    }

    /// Normal successors, ignoring edge kinds.
    pub fn succ_ids(&self, id: BlockId) -> impl Iterator<Item = BlockId> + '_ {
        self.blocks[id].succs.iter().map(|e| e.target)
    }

    /// Build a CFG from decoded instructions and the exception table.
    ///
    /// Fails with `CfgError` when a branch or handler target does not land
    /// on an instruction boundary; no repair is attempted.
    pub fn build(
        instructions: &[Instruction],
        exception_table: &[ExceptionTableEntry],
    ) -> Result<Cfg, CfgError> {
        if instructions.is_empty() {
            return Ok(Cfg {
                blocks: vec![],
                entry: 0,
                handler_edges: vec![],
                offset_to_block: BTreeMap::new(),
            });
        }

        let mut off_to_idx: BTreeMap<u32, usize> = BTreeMap::new();
        for (i, insn) in instructions.iter().enumerate() {
            off_to_idx.insert(insn.offset, i);
        }
        let code_end = {
            let last = &instructions[instructions.len() - 1];
            last.offset + last.size
        };

        // Step 1: leaders.
        let mut leaders = BTreeSet::new();
        leaders.insert(instructions[0].offset);
        for (i, insn) in instructions.iter().enumerate() {
            let targets = insn.insn.targets();
            for &t in &targets {
                if !off_to_idx.contains_key(&t) {
                    return Err(CfgError::MisalignedTarget(t));
                }
                leaders.insert(t);
            }
            let splits_after = !targets.is_empty() || insn.insn.ends_flow();
            if splits_after && i + 1 < instructions.len() {
                leaders.insert(instructions[i + 1].offset);
            }
        }
        for entry in exception_table {
            if !off_to_idx.contains_key(&entry.handler_pc) {
                return Err(CfgError::MisalignedHandler(entry.handler_pc));
            }
            leaders.insert(entry.handler_pc);
            // Protected-range boundaries also split blocks so each block is
            // covered by a uniform set of handlers.
            if off_to_idx.contains_key(&entry.start_pc) {
                leaders.insert(entry.start_pc);
            }
            if off_to_idx.contains_key(&entry.end_pc) {
                leaders.insert(entry.end_pc);
            }
        }

        // Step 2: blocks, split at leaders. Entries sharing one handler
        // offset collapse into the one block starting there.
        let leader_vec: Vec<u32> = leaders.iter().copied().collect();
        let mut offset_to_block = BTreeMap::new();
        let mut blocks = Vec::new();
        let handler_offsets: BTreeSet<u32> =
            exception_table.iter().map(|e| e.handler_pc).collect();

        for (bi, &leader_off) in leader_vec.iter().enumerate() {
            let first_insn = off_to_idx[&leader_off];
            let end_off = leader_vec.get(bi + 1).copied().unwrap_or(code_end);
            let mut last_insn = first_insn;
            while last_insn < instructions.len() && instructions[last_insn].offset < end_off {
                last_insn += 1;
            }
            let id = blocks.len();
            offset_to_block.insert(leader_off, id);
            blocks.push(BasicBlock {
                id,
                start: leader_off,
                end: end_off,
                first_insn,
                last_insn,
                succs: vec![],
                preds: vec![],
                is_handler: handler_offsets.contains(&leader_off),
            });
        }

        // Step 3: normal edges off each block's terminator.
        for bi in 0..blocks.len() {
            let last = &instructions[blocks[bi].last_insn - 1];
            let fallthrough = offset_to_block.get(&blocks[bi].end).copied();
            let mut succs = Vec::new();
            match &last.insn {
                Insn::Return { .. } | Insn::Throw | Insn::Ret { .. } => {}
                Insn::Goto { target } => {
                    succs.push(Edge {
                        target: offset_to_block[target],
                        kind: EdgeKind::Jump,
                    });
                }
                Insn::Jsr { target } => {
                    // Modeled as an unconditional transfer; the driver flags
                    // subroutines as unsupported before structuring.
                    succs.push(Edge {
                        target: offset_to_block[target],
                        kind: EdgeKind::Jump,
                    });
                }
                Insn::Branch { target, .. } => {
                    if let Some(ft) = fallthrough {
                        succs.push(Edge {
                            target: ft,
                            kind: EdgeKind::FallThrough,
                        });
                    }
                    succs.push(Edge {
                        target: offset_to_block[target],
                        kind: EdgeKind::CondBranch,
                    });
                }
                Insn::Switch { default, cases } => {
                    for &(key, off) in cases {
                        succs.push(Edge {
                            target: offset_to_block[&off],
                            kind: EdgeKind::SwitchCase(Some(key)),
                        });
                    }
                    succs.push(Edge {
                        target: offset_to_block[default],
                        kind: EdgeKind::SwitchCase(None),
                    });
                }
                _ => {
                    if let Some(ft) = fallthrough {
                        succs.push(Edge {
                            target: ft,
                            kind: EdgeKind::FallThrough,
                        });
                    }
                }
            }
            blocks[bi].succs = succs;
        }

        // Predecessors, deduplicated (a switch may target one block twice).
        for bi in 0..blocks.len() {
            let targets: Vec<BlockId> = blocks[bi].succs.iter().map(|e| e.target).collect();
            for t in targets {
                if !blocks[t].preds.contains(&bi) {
                    blocks[t].preds.push(bi);
                }
            }
        }

        // Exceptional edges: one per (covered block, table entry).
        let mut handler_edges = Vec::new();
        for entry in exception_table {
            let handler = offset_to_block[&entry.handler_pc];
            for block in &blocks {
                if block.start < entry.end_pc && entry.start_pc < block.end {
                    handler_edges.push(HandlerEdge {
                        from: block.id,
                        handler,
                        start_pc: entry.start_pc,
                        end_pc: entry.end_pc,
                        catch_type: entry.catch_type.clone(),
                    });
                }
            }
        }

        Ok(Cfg {
            blocks,
            entry: 0,
            handler_edges,
            offset_to_block,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insn::{BranchCond, ConstOp, SlotType};

    fn insn(offset: u32, size: u32, insn: Insn) -> Instruction {
        Instruction { offset, size, insn }
    }

    /// iconst_0; ifeq +4 -> 5; iconst_1; istore_0; return
    fn diamond() -> Vec<Instruction> {
        vec![
            insn(0, 1, Insn::Const(ConstOp::Int(0))),
            insn(
                1,
                3,
                Insn::Branch {
                    cond: BranchCond::Eq,
                    target: 6,
                },
            ),
            insn(4, 1, Insn::Const(ConstOp::Int(1))),
            insn(
                5,
                1,
                Insn::Store {
                    slot: 0,
                    ty: SlotType::Int,
                },
            ),
            insn(6, 1, Insn::Return { ty: None }),
        ]
    }

    #[test]
    fn splits_at_branch_and_target() {
        let cfg = Cfg::build(&diamond(), &[]).unwrap();
        assert_eq!(cfg.blocks.len(), 3);
        assert_eq!(cfg.blocks[0].succs.len(), 2);
        assert_eq!(cfg.blocks[0].succs[0].kind, EdgeKind::FallThrough);
        assert_eq!(cfg.blocks[0].succs[1].kind, EdgeKind::CondBranch);
        assert_eq!(cfg.blocks[2].preds, vec![0, 1]);
    }

    #[test]
    fn misaligned_branch_target_is_rejected() {
        let insns = vec![
            insn(
                0,
                3,
                Insn::Branch {
                    cond: BranchCond::Eq,
                    target: 2, // middle of the branch instruction itself
                },
            ),
            insn(3, 1, Insn::Return { ty: None }),
        ];
        assert!(matches!(
            Cfg::build(&insns, &[]),
            Err(CfgError::MisalignedTarget(2))
        ));
    }

    #[test]
    fn handler_entries_become_blocks_with_exception_edges() {
        let insns = vec![
            insn(0, 1, Insn::Const(ConstOp::Int(0))),
            insn(1, 1, Insn::Return { ty: None }),
            insn(2, 1, Insn::Throw),
        ];
        let table = vec![
            ExceptionTableEntry {
                start_pc: 0,
                end_pc: 2,
                handler_pc: 2,
                catch_type: Some("java/lang/Exception".into()),
            },
            ExceptionTableEntry {
                start_pc: 0,
                end_pc: 2,
                handler_pc: 2,
                catch_type: None,
            },
        ];
        let cfg = Cfg::build(&insns, &table).unwrap();
        let handler = cfg.block_starting_at(2).unwrap();
        assert!(cfg.blocks[handler].is_handler);
        // Two table entries over the same range produce edges per entry,
        // but only one handler block.
        assert_eq!(cfg.handler_edges.len(), 2);
        assert!(cfg.handler_edges.iter().all(|e| e.handler == handler));
    }

    #[test]
    fn switch_edges_carry_keys() {
        let insns = vec![
            insn(0, 1, Insn::Const(ConstOp::Int(0))),
            insn(
                1,
                20,
                Insn::Switch {
                    default: 23,
                    cases: vec![(7, 21), (9, 22)],
                },
            ),
            insn(21, 1, Insn::Return { ty: None }),
            insn(22, 1, Insn::Return { ty: None }),
            insn(23, 1, Insn::Return { ty: None }),
        ];
        let cfg = Cfg::build(&insns, &[]).unwrap();
        let kinds: Vec<EdgeKind> = cfg.blocks[0].succs.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EdgeKind::SwitchCase(Some(7)),
                EdgeKind::SwitchCase(Some(9)),
                EdgeKind::SwitchCase(None),
            ]
        );
    }

    #[test]
    fn block_lookup_by_offset() {
        let cfg = Cfg::build(&diamond(), &[]).unwrap();
        assert_eq!(cfg.block_at_offset(0), Some(0));
        assert_eq!(cfg.block_at_offset(5), Some(1));
        assert_eq!(cfg.block_at_offset(6), Some(2));
        assert_eq!(cfg.block_at_offset(99), None);
    }
}

//! Recover try/catch/finally nesting from the exception table.
//!
//! Table entries sharing an identical protected range came from one source
//! try statement; they become one region with catches in declaration order.
//! A catch-any entry whose handler matches the `astore N; ...; aload N;
//! athrow` shape is a compiled finally; its body is the canonical copy, and
//! byte-identical duplicates the compiler inlined at the other exit paths
//! are located so structuring can elide them. When the shape or the
//! duplicate search fails, the catch-any stays as a bare catch clause,
//! which is ugly but correct.

use jdec_classfile::ExceptionTableEntry;
use jdec_ir::insn::{same_shape, Insn, Instruction, SlotType};

/// One catch clause of a recovered try region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatchArm {
    /// `None` for a catch-any that could not be proven to be a finally.
    pub class: Option<String>,
    pub handler_pc: u32,
}

/// A recognized finally handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinallyInfo {
    pub handler_pc: u32,
    /// Slot the handler parks the in-flight exception in.
    pub store_slot: u16,
    /// Offset range of the canonical finally body, `[body_start, body_end)`;
    /// excludes the leading astore and the trailing aload/athrow.
    pub body_start: u32,
    pub body_end: u32,
    /// Offset ranges of inlined duplicates to elide from normal flow.
    pub inlined: Vec<(u32, u32)>,
}

/// One source-level try statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryRegion {
    pub start_pc: u32,
    /// Exclusive.
    pub end_pc: u32,
    pub catches: Vec<CatchArm>,
    pub finally: Option<FinallyInfo>,
}

impl TryRegion {
    pub fn contains(&self, pc: u32) -> bool {
        self.start_pc <= pc && pc < self.end_pc
    }
}

/// Group the exception table into try regions, outermost first.
///
/// Pure function of its inputs; running it again over the same instructions
/// yields the same regions, so structuring can call it freely.
pub fn structure_exceptions(
    instructions: &[Instruction],
    table: &[ExceptionTableEntry],
) -> Vec<TryRegion> {
    let mut regions: Vec<TryRegion> = Vec::new();
    for entry in table {
        let idx = match regions
            .iter()
            .position(|r| r.start_pc == entry.start_pc && r.end_pc == entry.end_pc)
        {
            Some(i) => i,
            None => {
                regions.push(TryRegion {
                    start_pc: entry.start_pc,
                    end_pc: entry.end_pc,
                    catches: Vec::new(),
                    finally: None,
                });
                regions.len() - 1
            }
        };
        let region = &mut regions[idx];
        match &entry.catch_type {
            Some(class) => region.catches.push(CatchArm {
                class: Some(class.clone()),
                handler_pc: entry.handler_pc,
            }),
            None => {
                if region.finally.is_none() {
                    if let Some(info) = detect_finally(instructions, entry.handler_pc) {
                        region.finally = Some(info);
                        continue;
                    }
                }
                log::warn!(
                    "catch-any handler at {:#x} does not match the finally shape; \
                     keeping it as a bare catch",
                    entry.handler_pc
                );
                region.catches.push(CatchArm {
                    class: None,
                    handler_pc: entry.handler_pc,
                });
            }
        }
    }

    // Outermost first: wider ranges sort before the ranges they contain.
    regions.sort_by(|a, b| {
        a.start_pc
            .cmp(&b.start_pc)
            .then(b.end_pc.cmp(&a.end_pc))
    });
    regions
}

/// Match the compiled-finally handler shape and locate inlined duplicates.
fn detect_finally(instructions: &[Instruction], handler_pc: u32) -> Option<FinallyInfo> {
    let h = instructions.iter().position(|i| i.offset == handler_pc)?;
    let store_slot = match instructions[h].insn {
        Insn::Store {
            slot,
            ty: SlotType::Ref,
        } => slot,
        _ => return None,
    };

    // First `aload N; athrow` after the store closes the handler.
    let mut rethrow = None;
    for j in h + 1..instructions.len().saturating_sub(1) {
        if matches!(
            instructions[j].insn,
            Insn::Load { slot, ty: SlotType::Ref } if slot == store_slot
        ) && instructions[j + 1].insn == Insn::Throw
        {
            rethrow = Some(j);
            break;
        }
    }
    let j = rethrow?;

    let body = &instructions[h + 1..j];
    let body_start = instructions[h + 1].offset;
    let body_end = instructions[j].offset;
    let handler_end = instructions[j + 1].offset + instructions[j + 1].size;

    let mut inlined = Vec::new();
    if !body.is_empty() {
        let mut p = 0;
        while p + body.len() <= instructions.len() {
            let start = instructions[p].offset;
            let last = &instructions[p + body.len() - 1];
            let end = last.offset + last.size;
            // Never match inside the handler itself.
            let in_handler = start < handler_end && handler_pc < end;
            if !in_handler
                && body
                    .iter()
                    .zip(&instructions[p..p + body.len()])
                    .all(|(a, b)| same_shape(a, b))
            {
                inlined.push((start, end));
                p += body.len();
            } else {
                p += 1;
            }
        }
    }

    Some(FinallyInfo {
        handler_pc,
        store_slot,
        body_start,
        body_end,
        inlined,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use jdec_ir::insn::ConstOp;

    fn insn(offset: u32, size: u32, insn: Insn) -> Instruction {
        Instruction { offset, size, insn }
    }

    fn entry(start: u32, end: u32, handler: u32, class: Option<&str>) -> ExceptionTableEntry {
        ExceptionTableEntry {
            start_pc: start,
            end_pc: end,
            handler_pc: handler,
            catch_type: class.map(String::from),
        }
    }

    /// try { v1 = 0 } finally { v2 = v2 + 1 } compiled the javac way:
    /// the finally body is inlined on the normal path before the goto, and
    /// the catch-any handler re-raises after its own copy.
    fn try_finally() -> Vec<Instruction> {
        vec![
            insn(0, 1, Insn::Const(ConstOp::Int(0))),
            insn(1, 1, Insn::Store { slot: 1, ty: SlotType::Int }),
            // inlined finally copy, normal exit
            insn(2, 3, Insn::Iinc { slot: 2, delta: 1 }),
            insn(5, 3, Insn::Goto { target: 14 }),
            // handler
            insn(8, 1, Insn::Store { slot: 3, ty: SlotType::Ref }),
            insn(9, 3, Insn::Iinc { slot: 2, delta: 1 }),
            insn(12, 1, Insn::Load { slot: 3, ty: SlotType::Ref }),
            insn(13, 1, Insn::Throw),
            insn(14, 1, Insn::Return { ty: None }),
        ]
    }

    #[test]
    fn finally_shape_is_recognized() {
        let regions = structure_exceptions(&try_finally(), &[entry(0, 2, 8, None)]);
        assert_eq!(regions.len(), 1);
        let f = regions[0].finally.as_ref().expect("finally detected");
        assert_eq!(f.store_slot, 3);
        assert_eq!((f.body_start, f.body_end), (9, 12));
        assert_eq!(f.inlined, vec![(2, 5)]);
        assert!(regions[0].catches.is_empty());
    }

    #[test]
    fn identical_ranges_group_into_one_try() {
        let insns = try_finally();
        let table = vec![
            entry(0, 2, 8, Some("java/lang/IllegalStateException")),
            entry(0, 2, 8, Some("java/lang/Exception")),
        ];
        let regions = structure_exceptions(&insns, &table);
        assert_eq!(regions.len(), 1);
        let classes: Vec<_> = regions[0]
            .catches
            .iter()
            .map(|c| c.class.as_deref())
            .collect();
        // Declaration order is catch-clause specificity order.
        assert_eq!(
            classes,
            vec![
                Some("java/lang/IllegalStateException"),
                Some("java/lang/Exception")
            ]
        );
    }

    #[test]
    fn unmatched_catch_any_stays_a_catch() {
        // Handler starts with a return, not an astore.
        let insns = vec![
            insn(0, 1, Insn::Const(ConstOp::Int(0))),
            insn(1, 1, Insn::Store { slot: 0, ty: SlotType::Int }),
            insn(2, 1, Insn::Return { ty: None }),
            insn(3, 1, Insn::Return { ty: None }),
        ];
        let regions = structure_exceptions(&insns, &[entry(0, 2, 3, None)]);
        assert_eq!(regions[0].finally, None);
        assert_eq!(
            regions[0].catches,
            vec![CatchArm {
                class: None,
                handler_pc: 3
            }]
        );
    }

    #[test]
    fn regions_sort_outermost_first() {
        let insns = vec![
            insn(0, 1, Insn::Const(ConstOp::Int(0))),
            insn(1, 1, Insn::Store { slot: 0, ty: SlotType::Int }),
            insn(2, 1, Insn::Return { ty: None }),
            insn(3, 1, Insn::Return { ty: None }),
            insn(4, 1, Insn::Return { ty: None }),
        ];
        let table = vec![
            entry(1, 2, 3, Some("java/lang/Exception")),
            entry(0, 3, 4, Some("java/lang/Throwable")),
        ];
        let regions = structure_exceptions(&insns, &table);
        assert_eq!(regions[0].start_pc, 0);
        assert_eq!(regions[1].start_pc, 1);
    }

    #[test]
    fn second_run_reproduces_the_same_regions() {
        let insns = try_finally();
        let table = vec![entry(0, 2, 8, None)];
        let a = structure_exceptions(&insns, &table);
        let b = structure_exceptions(&insns, &table);
        assert_eq!(a, b);
    }
}

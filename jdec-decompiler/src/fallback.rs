//! Flat lowering for methods whose reconstruction was abandoned.
//!
//! When abstract interpretation faults, the driver swaps in this pass: one
//! statement per instruction, operand-stack slots named `s0..sN`, and a
//! `GotoTarget` anchor at every jump target. No expressions are folded and
//! no control flow is recovered; the output is ugly but it is complete and
//! it round-trips every reachable instruction.
//!
//! Stack depths and slot types come from a category-only pre-scan: the same
//! lowering runs once per reachable path head to record the entry stack at
//! every offset (first recording wins), then once more in offset order to
//! produce the statements.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use jdec_classfile::{ConstValue, JvmType, MethodDescriptor, MethodModel};
use jdec_ir::ast::{Expr, ExprKind, Stmt, SwitchCase};
use jdec_ir::expr::{CmpOp, Constant};
use jdec_ir::insn::{BranchCond, ConstOp, Insn, Instruction, SlotType, StackOp};
use jdec_ir::stmt::Label;

/// Lower a method to flat label/goto form.
pub fn lower_flat(method: &MethodModel, instructions: &[Instruction]) -> Vec<Stmt> {
    if instructions.is_empty() {
        return Vec::new();
    }

    let mut labels: BTreeSet<u32> = instructions
        .iter()
        .flat_map(|i| i.insn.targets())
        .collect();
    let handlers: BTreeSet<u32> = method
        .exception_table
        .iter()
        .map(|e| e.handler_pc)
        .collect();
    labels.extend(&handlers);
    let labels: BTreeMap<u32, Label> = labels
        .into_iter()
        .enumerate()
        .map(|(i, off)| (off, Label(i as u32)))
        .collect();

    let index: BTreeMap<u32, usize> = instructions
        .iter()
        .enumerate()
        .map(|(i, insn)| (insn.offset, i))
        .collect();

    let mut lowerer = Lowerer {
        method,
        labels,
        scratch: 0,
    };

    // Pre-scan: record the entry stack at every reachable offset.
    let mut entry: BTreeMap<u32, Vec<JvmType>> = BTreeMap::new();
    let mut queue: VecDeque<(u32, Vec<JvmType>)> = VecDeque::new();
    queue.push_back((instructions[0].offset, Vec::new()));
    for e in &method.exception_table {
        let caught = e
            .catch_type
            .clone()
            .map(JvmType::Reference)
            .unwrap_or_else(JvmType::throwable);
        queue.push_back((e.handler_pc, vec![caught]));
    }
    let mut scratch_out = Vec::new();
    while let Some((offset, mut model)) = queue.pop_front() {
        let Some(&start) = index.get(&offset) else {
            log::warn!("jump into the middle of an instruction at {offset:#x}");
            continue;
        };
        let mut i = start;
        loop {
            let insn = &instructions[i];
            if entry.contains_key(&insn.offset) {
                break;
            }
            entry.insert(insn.offset, model.clone());
            if lowerer.lower(insn, &mut model, &mut scratch_out).is_err() {
                break;
            }
            for target in insn.insn.targets() {
                queue.push_back((target, model.clone()));
            }
            if insn.insn.ends_flow() || i + 1 == instructions.len() {
                break;
            }
            i += 1;
        }
        scratch_out.clear();
    }

    // Emission, in offset order. Dead instructions are dropped; their
    // labels still get anchors so no goto dangles.
    lowerer.scratch = 0;
    let mut out = Vec::new();
    let mut model: Option<Vec<JvmType>> = None;
    for insn in instructions {
        if let Some(label) = lowerer.labels.get(&insn.offset) {
            out.push(Stmt::GotoTarget(*label));
            model = entry.get(&insn.offset).cloned();
            if model.is_some() && handlers.contains(&insn.offset) {
                let ty = model
                    .as_ref()
                    .and_then(|m| m.first().cloned())
                    .unwrap_or_else(JvmType::throwable);
                out.push(Stmt::Assign {
                    target: "s0".into(),
                    value: Expr::new(ty, ExprKind::CaughtException),
                });
            }
        } else if model.is_none() {
            model = entry.get(&insn.offset).cloned();
        }
        let Some(m) = model.as_mut() else { continue };
        if lowerer.lower(insn, m, &mut out).is_err() {
            out.push(Stmt::Comment(format!(
                "operand stack underflow at {:#x}",
                insn.offset
            )));
            model = None;
            continue;
        }
        if insn.insn.ends_flow() {
            model = None;
        }
    }
    out
}

/// Raised inside the lowering when the modeled stack runs dry; the caller
/// turns it into a comment and abandons the run.
struct Underflow;

struct Lowerer<'a> {
    method: &'a MethodModel,
    labels: BTreeMap<u32, Label>,
    scratch: u32,
}

impl Lowerer<'_> {
    fn local_name(&self, slot: u16) -> String {
        let param_slots = self.method.descriptor.param_slots()
            + if self.method.is_static() { 0 } else { 1 };
        if !self.method.is_static() && slot == 0 {
            "this".into()
        } else if slot < param_slots {
            format!("a{slot}")
        } else {
            format!("v{slot}")
        }
    }

    fn label(&self, target: u32) -> Label {
        // Every branch target was collected up front.
        self.labels.get(&target).copied().unwrap_or(Label(u32::MAX))
    }

    fn push(&self, model: &mut Vec<JvmType>, out: &mut Vec<Stmt>, value: Expr) {
        let ty = value.ty.clone();
        out.push(Stmt::Assign {
            target: format!("s{}", model.len()),
            value,
        });
        model.push(ty);
    }

    fn pop(&self, model: &mut Vec<JvmType>) -> Result<Expr, Underflow> {
        let ty = model.pop().ok_or(Underflow)?;
        Ok(Expr::new(ty, ExprKind::Var(format!("s{}", model.len()))))
    }

    fn lower(
        &mut self,
        insn: &Instruction,
        model: &mut Vec<JvmType>,
        out: &mut Vec<Stmt>,
    ) -> Result<(), Underflow> {
        match &insn.insn {
            Insn::Nop => {}

            Insn::Const(op) => {
                let (c, ty) = match op {
                    ConstOp::Null => (Constant::Null, JvmType::Null),
                    ConstOp::Int(v) => (Constant::Int(*v), JvmType::Int),
                    ConstOp::Long(v) => (Constant::Long(*v), JvmType::Long),
                    ConstOp::Float(v) => (Constant::Float(*v), JvmType::Float),
                    ConstOp::Double(v) => (Constant::Double(*v), JvmType::Double),
                    ConstOp::Pool(v) => {
                        let ty = v.jvm_type();
                        let c = match v {
                            ConstValue::Int(n) => Constant::Int(*n),
                            ConstValue::Long(n) => Constant::Long(*n),
                            ConstValue::Float(n) => Constant::Float(*n),
                            ConstValue::Double(n) => Constant::Double(*n),
                            ConstValue::Str(s) => Constant::Str(s.clone()),
                            ConstValue::Class(c) => Constant::Class(c.clone()),
                        };
                        (c, ty)
                    }
                };
                self.push(model, out, Expr::new(ty, ExprKind::Const(c)));
            }

            Insn::Load { slot, ty } => {
                let value = Expr::new(slot_type(*ty), ExprKind::Var(self.local_name(*slot)));
                self.push(model, out, value);
            }

            Insn::Store { slot, .. } => {
                let value = self.pop(model)?;
                out.push(Stmt::Assign {
                    target: self.local_name(*slot),
                    value,
                });
            }

            Insn::Iinc { slot, delta } => {
                let name = self.local_name(*slot);
                let var = Expr::new(JvmType::Int, ExprKind::Var(name.clone()));
                let amount = Expr::new(JvmType::Int, ExprKind::Const(Constant::Int(*delta as i32)));
                out.push(Stmt::Assign {
                    target: name,
                    value: Expr::new(
                        JvmType::Int,
                        ExprKind::Binary {
                            op: jdec_ir::insn::ArithOp::Add,
                            lhs: Box::new(var),
                            rhs: Box::new(amount),
                        },
                    ),
                });
            }

            Insn::Stack(op) => self.stack_op(*op, model, out)?,

            Insn::Arith { op, ty } => {
                let rhs = self.pop(model)?;
                let lhs = self.pop(model)?;
                self.push(
                    model,
                    out,
                    Expr::new(
                        ty.jvm_type(),
                        ExprKind::Binary {
                            op: *op,
                            lhs: Box::new(lhs),
                            rhs: Box::new(rhs),
                        },
                    ),
                );
            }

            Insn::Neg { ty } => {
                let v = self.pop(model)?;
                self.push(model, out, Expr::new(ty.jvm_type(), ExprKind::Neg(Box::new(v))));
            }

            Insn::Convert { to, .. } => {
                let v = self.pop(model)?;
                self.push(
                    model,
                    out,
                    Expr::new(
                        to.stack_type(),
                        ExprKind::Cast {
                            to: to.clone(),
                            value: Box::new(v),
                        },
                    ),
                );
            }

            Insn::Cmp(kind) => {
                let rhs = self.pop(model)?;
                let lhs = self.pop(model)?;
                self.push(
                    model,
                    out,
                    Expr::new(
                        JvmType::Int,
                        ExprKind::ThreeWay {
                            kind: *kind,
                            lhs: Box::new(lhs),
                            rhs: Box::new(rhs),
                        },
                    ),
                );
            }

            Insn::Branch { cond, target } => {
                let cond = self.branch_cond(*cond, model)?;
                out.push(Stmt::If {
                    cond,
                    then_body: vec![Stmt::Goto(self.label(*target))],
                    else_body: vec![],
                });
            }

            Insn::Goto { target } => out.push(Stmt::Goto(self.label(*target))),

            Insn::Switch { default, cases } => {
                let key = self.pop(model)?;
                let cases = cases
                    .iter()
                    .map(|&(k, target)| SwitchCase {
                        keys: vec![k],
                        body: vec![Stmt::Goto(self.label(target))],
                        falls_through: false,
                    })
                    .collect();
                out.push(Stmt::Switch {
                    label: None,
                    key,
                    cases,
                    default: vec![Stmt::Goto(self.label(*default))],
                });
            }

            Insn::Return { ty } => {
                let value = match ty {
                    Some(_) => Some(self.pop(model)?),
                    None => None,
                };
                out.push(Stmt::Return(value));
            }

            Insn::GetField { member, is_static } => {
                let object = if *is_static {
                    None
                } else {
                    Some(Box::new(self.pop(model)?))
                };
                let ty = JvmType::parse(&member.descriptor).unwrap_or_else(|_| JvmType::object());
                self.push(
                    model,
                    out,
                    Expr::new(
                        ty.stack_type(),
                        ExprKind::FieldGet {
                            member: member.clone(),
                            object,
                        },
                    ),
                );
            }

            Insn::PutField { member, is_static } => {
                let value = self.pop(model)?;
                let object = if *is_static {
                    None
                } else {
                    Some(self.pop(model)?)
                };
                out.push(Stmt::PutField {
                    member: member.clone(),
                    object,
                    value,
                });
            }

            Insn::Invoke { kind, member } => {
                let desc = match MethodDescriptor::parse(&member.descriptor) {
                    Ok(d) => d,
                    Err(_) => {
                        log::warn!("unparsable call descriptor {}", member.descriptor);
                        MethodDescriptor {
                            params: vec![],
                            ret: None,
                        }
                    }
                };
                let mut args = Vec::with_capacity(desc.params.len());
                for _ in &desc.params {
                    args.push(self.pop(model)?);
                }
                args.reverse();
                let receiver = if kind.has_receiver() {
                    Some(Box::new(self.pop(model)?))
                } else {
                    None
                };
                let call = |ty: JvmType| {
                    Expr::new(
                        ty,
                        ExprKind::Call {
                            kind: *kind,
                            member: member.clone(),
                            receiver,
                            args,
                        },
                    )
                };
                match desc.ret {
                    Some(ret) => {
                        let e = call(ret.stack_type());
                        self.push(model, out, e);
                    }
                    None => out.push(Stmt::Expr(call(JvmType::object()))),
                }
            }

            Insn::New { class } => {
                // No constructor folding here; the bare allocation prints as
                // a zero-argument construction.
                self.push(
                    model,
                    out,
                    Expr::new(
                        JvmType::reference(class.clone()),
                        ExprKind::NewObject {
                            class: class.clone(),
                            args: vec![],
                        },
                    ),
                );
            }

            Insn::NewArray { elem } => {
                let len = self.pop(model)?;
                self.push(
                    model,
                    out,
                    Expr::new(
                        JvmType::array(elem.clone()),
                        ExprKind::NewArray {
                            elem: elem.clone(),
                            dims: vec![len],
                        },
                    ),
                );
            }

            Insn::MultiNewArray { elem, dims } => {
                let mut sizes = Vec::with_capacity(*dims as usize);
                for _ in 0..*dims {
                    sizes.push(self.pop(model)?);
                }
                sizes.reverse();
                self.push(
                    model,
                    out,
                    Expr::new(
                        elem.clone(),
                        ExprKind::NewArray {
                            elem: elem.clone(),
                            dims: sizes,
                        },
                    ),
                );
            }

            Insn::ArrayLoad { elem } => {
                let index = self.pop(model)?;
                let array = self.pop(model)?;
                self.push(
                    model,
                    out,
                    Expr::new(
                        elem.stack_type(),
                        ExprKind::ArrayGet {
                            array: Box::new(array),
                            index: Box::new(index),
                        },
                    ),
                );
            }

            Insn::ArrayStore { elem } => {
                let value = self.pop(model)?;
                let index = self.pop(model)?;
                let array = self.pop(model)?;
                out.push(Stmt::ArraySet {
                    elem: *elem,
                    array,
                    index,
                    value,
                });
            }

            Insn::ArrayLength => {
                let v = self.pop(model)?;
                self.push(
                    model,
                    out,
                    Expr::new(JvmType::Int, ExprKind::ArrayLength(Box::new(v))),
                );
            }

            Insn::CheckCast { class } => {
                let v = self.pop(model)?;
                let to = JvmType::reference(class.clone());
                self.push(
                    model,
                    out,
                    Expr::new(
                        to.clone(),
                        ExprKind::Cast {
                            to,
                            value: Box::new(v),
                        },
                    ),
                );
            }

            Insn::InstanceOf { class } => {
                let v = self.pop(model)?;
                self.push(
                    model,
                    out,
                    Expr::new(
                        JvmType::Boolean,
                        ExprKind::InstanceOf {
                            class: class.clone(),
                            value: Box::new(v),
                        },
                    ),
                );
            }

            Insn::Throw => {
                let v = self.pop(model)?;
                out.push(Stmt::Throw(v));
            }

            Insn::Monitor { enter } => {
                let v = self.pop(model)?;
                out.push(if *enter {
                    Stmt::MonitorEnter(v)
                } else {
                    Stmt::MonitorExit(v)
                });
            }

            Insn::Jsr { target } => {
                // The return address is not modeled; the pushed zero keeps
                // depths consistent for the astore that usually follows.
                out.push(Stmt::Comment(format!("jsr {:#x}", target)));
                self.push(
                    model,
                    out,
                    Expr::new(JvmType::Int, ExprKind::Const(Constant::Int(0))),
                );
                out.push(Stmt::Goto(self.label(*target)));
            }

            Insn::Ret { slot } => {
                out.push(Stmt::Comment(format!("ret v{slot}")));
            }
        }
        Ok(())
    }

    fn branch_cond(&self, cond: BranchCond, model: &mut Vec<JvmType>) -> Result<Expr, Underflow> {
        let compare = |op: CmpOp, lhs: Expr, rhs: Expr| {
            Expr::new(
                JvmType::Boolean,
                ExprKind::Compare {
                    op,
                    on_nan: None,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
            )
        };
        let zero = Expr::new(JvmType::Int, ExprKind::Const(Constant::Int(0)));
        let null = Expr::new(JvmType::Null, ExprKind::Const(Constant::Null));
        Ok(match cond {
            BranchCond::Eq => {
                let v = self.pop(model)?;
                compare(CmpOp::Eq, v, zero)
            }
            BranchCond::Ne => {
                let v = self.pop(model)?;
                compare(CmpOp::Ne, v, zero)
            }
            BranchCond::Lt => {
                let v = self.pop(model)?;
                compare(CmpOp::Lt, v, zero)
            }
            BranchCond::Ge => {
                let v = self.pop(model)?;
                compare(CmpOp::Ge, v, zero)
            }
            BranchCond::Gt => {
                let v = self.pop(model)?;
                compare(CmpOp::Gt, v, zero)
            }
            BranchCond::Le => {
                let v = self.pop(model)?;
                compare(CmpOp::Le, v, zero)
            }
            BranchCond::Null => {
                let v = self.pop(model)?;
                compare(CmpOp::Eq, v, null)
            }
            BranchCond::NonNull => {
                let v = self.pop(model)?;
                compare(CmpOp::Ne, v, null)
            }
            BranchCond::ICmpEq | BranchCond::ACmpEq => {
                let rhs = self.pop(model)?;
                let lhs = self.pop(model)?;
                compare(CmpOp::Eq, lhs, rhs)
            }
            BranchCond::ICmpNe | BranchCond::ACmpNe => {
                let rhs = self.pop(model)?;
                let lhs = self.pop(model)?;
                compare(CmpOp::Ne, lhs, rhs)
            }
            BranchCond::ICmpLt => {
                let rhs = self.pop(model)?;
                let lhs = self.pop(model)?;
                compare(CmpOp::Lt, lhs, rhs)
            }
            BranchCond::ICmpGe => {
                let rhs = self.pop(model)?;
                let lhs = self.pop(model)?;
                compare(CmpOp::Ge, lhs, rhs)
            }
            BranchCond::ICmpGt => {
                let rhs = self.pop(model)?;
                let lhs = self.pop(model)?;
                compare(CmpOp::Gt, lhs, rhs)
            }
            BranchCond::ICmpLe => {
                let rhs = self.pop(model)?;
                let lhs = self.pop(model)?;
                compare(CmpOp::Le, lhs, rhs)
            }
        })
    }

    /// Category-aware dup/pop/swap family. The rearranged top of the stack
    /// is routed through scratch variables so no slot is overwritten before
    /// it is read.
    fn stack_op(
        &mut self,
        op: StackOp,
        model: &mut Vec<JvmType>,
        out: &mut Vec<Stmt>,
    ) -> Result<(), Underflow> {
        let cat = |model: &Vec<JvmType>, from_top: usize| -> Result<u8, Underflow> {
            let i = model.len().checked_sub(from_top + 1).ok_or(Underflow)?;
            Ok(model[i].category())
        };
        match op {
            StackOp::Pop => {
                self.pop(model)?;
            }
            StackOp::Pop2 => {
                if cat(model, 0)? == 2 {
                    self.pop(model)?;
                } else {
                    self.pop(model)?;
                    self.pop(model)?;
                }
            }
            StackOp::Dup => self.shuffle(model, out, 1, &[0, 0])?,
            StackOp::DupX1 => self.shuffle(model, out, 2, &[1, 0, 1])?,
            StackOp::DupX2 => {
                if cat(model, 1)? == 2 {
                    self.shuffle(model, out, 2, &[1, 0, 1])?;
                } else {
                    self.shuffle(model, out, 3, &[2, 0, 1, 2])?;
                }
            }
            StackOp::Dup2 => {
                if cat(model, 0)? == 2 {
                    self.shuffle(model, out, 1, &[0, 0])?;
                } else {
                    self.shuffle(model, out, 2, &[0, 1, 0, 1])?;
                }
            }
            StackOp::Dup2X1 => {
                if cat(model, 0)? == 2 {
                    self.shuffle(model, out, 2, &[1, 0, 1])?;
                } else {
                    self.shuffle(model, out, 3, &[1, 2, 0, 1, 2])?;
                }
            }
            StackOp::Dup2X2 => {
                let top2 = cat(model, 0)? == 2;
                if top2 && cat(model, 1)? == 2 {
                    self.shuffle(model, out, 2, &[1, 0, 1])?;
                } else if top2 {
                    self.shuffle(model, out, 3, &[2, 0, 1, 2])?;
                } else if cat(model, 2)? == 2 {
                    self.shuffle(model, out, 3, &[1, 2, 0, 1, 2])?;
                } else {
                    self.shuffle(model, out, 4, &[2, 3, 0, 1, 2, 3])?;
                }
            }
            StackOp::Swap => self.shuffle(model, out, 2, &[1, 0])?,
        }
        Ok(())
    }

    /// Pop `pops` values into scratch variables, then push them back in the
    /// order given by `pattern` (0 is the deepest of the popped values).
    fn shuffle(
        &mut self,
        model: &mut Vec<JvmType>,
        out: &mut Vec<Stmt>,
        pops: usize,
        pattern: &[usize],
    ) -> Result<(), Underflow> {
        let base = model.len().checked_sub(pops).ok_or(Underflow)?;
        let types: Vec<JvmType> = model[base..].to_vec();
        let mut scratch = Vec::with_capacity(pops);
        for (k, ty) in types.iter().enumerate() {
            let name = format!("x{}", self.scratch);
            self.scratch += 1;
            out.push(Stmt::Assign {
                target: name.clone(),
                value: Expr::new(ty.clone(), ExprKind::Var(format!("s{}", base + k))),
            });
            scratch.push(name);
        }
        model.truncate(base);
        for &p in pattern {
            let value = Expr::new(types[p].clone(), ExprKind::Var(scratch[p].clone()));
            self.push(model, out, value);
        }
        Ok(())
    }
}

fn slot_type(ty: SlotType) -> JvmType {
    match ty {
        SlotType::Int => JvmType::Int,
        SlotType::Long => JvmType::Long,
        SlotType::Float => JvmType::Float,
        SlotType::Double => JvmType::Double,
        SlotType::Ref => JvmType::object(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jdec_classfile::{ExceptionTableEntry, MethodFlags};

    fn insn(offset: u32, size: u32, insn: Insn) -> Instruction {
        Instruction { offset, size, insn }
    }

    fn method(descriptor: &str) -> MethodModel {
        MethodModel::new("m", MethodFlags::STATIC, descriptor, vec![]).expect("valid descriptor")
    }

    #[test]
    fn straight_line_uses_stack_slot_names() {
        let m = method("()I");
        let insns = vec![
            insn(0, 1, Insn::Const(ConstOp::Int(2))),
            insn(1, 1, Insn::Store { slot: 0, ty: SlotType::Int }),
            insn(2, 1, Insn::Load { slot: 0, ty: SlotType::Int }),
            insn(3, 1, Insn::Return { ty: Some(SlotType::Int) }),
        ];
        let out = lower_flat(&m, &insns);
        assert_eq!(out.len(), 4);
        assert!(matches!(&out[0], Stmt::Assign { target, .. } if target == "s0"));
        assert!(matches!(&out[1], Stmt::Assign { target, .. } if target == "v0"));
        assert!(matches!(&out[2], Stmt::Assign { target, .. } if target == "s0"));
        match &out[3] {
            Stmt::Return(Some(e)) => assert_eq!(e.kind, ExprKind::Var("s0".into())),
            other => panic!("expected return, got {other:?}"),
        }
    }

    #[test]
    fn branches_become_if_goto_with_anchored_targets() {
        let m = method("(I)V");
        let insns = vec![
            insn(0, 1, Insn::Load { slot: 0, ty: SlotType::Int }),
            insn(1, 3, Insn::Branch { cond: BranchCond::Eq, target: 5 }),
            insn(4, 1, Insn::Return { ty: None }),
            insn(5, 1, Insn::Return { ty: None }),
        ];
        let out = lower_flat(&m, &insns);
        let goto_target = out
            .iter()
            .find_map(|s| match s {
                Stmt::If { then_body, .. } => match then_body.as_slice() {
                    [Stmt::Goto(l)] => Some(*l),
                    _ => None,
                },
                _ => None,
            })
            .expect("if/goto emitted");
        assert!(out.contains(&Stmt::GotoTarget(goto_target)));
    }

    #[test]
    fn value_carried_over_a_jump_keeps_its_slot() {
        // push 1; goto L; ... L: store the carried value.
        let m = method("()V");
        let insns = vec![
            insn(0, 1, Insn::Const(ConstOp::Int(1))),
            insn(1, 3, Insn::Goto { target: 6 }),
            insn(4, 1, Insn::Const(ConstOp::Int(9))),
            insn(5, 1, Insn::Store { slot: 0, ty: SlotType::Int }),
            insn(6, 1, Insn::Store { slot: 1, ty: SlotType::Int }),
            insn(7, 1, Insn::Return { ty: None }),
        ];
        let out = lower_flat(&m, &insns);
        // The store at the join reads s0, the slot live across the goto.
        let store = out
            .iter()
            .find(|s| matches!(s, Stmt::Assign { target, .. } if target == "v1"))
            .expect("store lowered");
        match store {
            Stmt::Assign { value, .. } => assert_eq!(value.kind, ExprKind::Var("s0".into())),
            _ => unreachable!(),
        }
    }

    #[test]
    fn dup_copies_the_top_slot() {
        let m = method("()V");
        let insns = vec![
            insn(0, 1, Insn::Const(ConstOp::Int(7))),
            insn(1, 1, Insn::Stack(StackOp::Dup)),
            insn(2, 1, Insn::Store { slot: 0, ty: SlotType::Int }),
            insn(3, 1, Insn::Store { slot: 1, ty: SlotType::Int }),
            insn(4, 1, Insn::Return { ty: None }),
        ];
        let out = lower_flat(&m, &insns);
        // Both stores must read distinct stack slots.
        let reads: Vec<&str> = out
            .iter()
            .filter_map(|s| match s {
                Stmt::Assign { target, value } if target.starts_with('v') => match &value.kind {
                    ExprKind::Var(n) => Some(n.as_str()),
                    _ => None,
                },
                _ => None,
            })
            .collect();
        assert_eq!(reads, vec!["s1", "s0"]);
    }

    #[test]
    fn handler_entry_binds_the_caught_value() {
        let mut m = method("()V");
        m = m
            .with_exception_table(vec![ExceptionTableEntry {
                start_pc: 0,
                end_pc: 1,
                handler_pc: 2,
                catch_type: Some("java/lang/Exception".into()),
            }])
            .expect("valid table");
        let insns = vec![
            insn(0, 1, Insn::Nop),
            insn(1, 1, Insn::Return { ty: None }),
            insn(2, 1, Insn::Store { slot: 0, ty: SlotType::Ref }),
            insn(3, 1, Insn::Return { ty: None }),
        ];
        let out = lower_flat(&m, &insns);
        let anchor = out
            .iter()
            .position(|s| matches!(s, Stmt::GotoTarget(_)))
            .expect("handler label");
        match &out[anchor + 1] {
            Stmt::Assign { target, value } => {
                assert_eq!(target, "s0");
                assert_eq!(value.kind, ExprKind::CaughtException);
                assert_eq!(value.ty, JvmType::reference("java/lang/Exception"));
            }
            other => panic!("expected caught-value binding, got {other:?}"),
        }
    }

    #[test]
    fn dead_code_is_dropped_but_labels_survive() {
        let m = method("()V");
        let insns = vec![
            insn(0, 3, Insn::Goto { target: 5 }),
            // Unreachable, and a jump target of nothing.
            insn(3, 1, Insn::Const(ConstOp::Int(1))),
            insn(4, 1, Insn::Return { ty: None }),
            insn(5, 1, Insn::Return { ty: None }),
        ];
        let out = lower_flat(&m, &insns);
        assert_eq!(
            out,
            vec![
                Stmt::Goto(Label(0)),
                Stmt::GotoTarget(Label(0)),
                Stmt::Return(None),
            ]
        );
    }
}

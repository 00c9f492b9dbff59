//! Abstract interpretation of the operand stack.
//!
//! Each reachable block is executed over a symbolic stack of [`ExprId`]s,
//! producing straight-line statements plus a terminator. Where control
//! joins with a non-empty stack, the entry stack is a row of phi
//! placeholders; every predecessor materializes its values with `SetPhi`
//! assignments. When a later predecessor widens a phi's type, every block
//! whose entry stack carries that phi is executed again, so types cloned
//! out of the arena are recomputed at the fixed point. Local variables need
//! no merging at all: a store is a real assignment statement and a load is
//! a read of the named variable.
//!
//! Evaluation order is preserved by flushing: before any statement with an
//! observable effect is emitted, stack entries that are effectful or read
//! the heap are bound to temporaries in push order.

use std::collections::{BTreeMap, VecDeque};

use jdec_classfile::{JvmType, MethodDescriptor, MethodModel, TypeHierarchy};
use jdec_ir::cfg::{BlockId, Cfg};
use jdec_ir::expr::{CmpOp, Constant, ExprArena, ExprId, ExprKind, OnNan};
use jdec_ir::insn::{
    ArithOp, BranchCond, CmpKind, ConstOp, Insn, Instruction, InvokeKind, SlotType, StackOp,
};
use jdec_ir::stmt::Stmt;

use crate::diag::Fault;

/// Terminator of one interpreted block. Control targets stay in the CFG;
/// only the consumed values live here.
#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    FallThrough,
    Goto,
    If { cond: ExprId },
    Switch { key: ExprId },
    Return(Option<ExprId>),
    Throw(ExprId),
}

/// Statements and terminator for one basic block.
#[derive(Debug, Clone)]
pub struct BlockCode {
    pub stmts: Vec<Stmt>,
    pub terminator: Terminator,
    /// Whether the interpreter ever reached this block. Unreached blocks
    /// are dead code and are never emitted.
    pub reached: bool,
}

impl Default for BlockCode {
    fn default() -> BlockCode {
        BlockCode {
            stmts: Vec::new(),
            terminator: Terminator::FallThrough,
            reached: false,
        }
    }
}

/// Result of interpreting one method.
#[derive(Debug)]
pub struct InterpResult {
    pub arena: ExprArena,
    /// Indexed by [`BlockId`].
    pub blocks: Vec<BlockCode>,
}

/// FIFO of blocks pending execution, deduplicated so a block scheduled
/// twice before it runs is only executed once.
struct Worklist {
    queue: VecDeque<BlockId>,
    queued: Vec<bool>,
}

impl Worklist {
    fn new(n: usize) -> Worklist {
        Worklist {
            queue: VecDeque::new(),
            queued: vec![false; n],
        }
    }

    fn push(&mut self, b: BlockId) {
        if !self.queued[b] {
            self.queued[b] = true;
            self.queue.push_back(b);
        }
    }

    fn pop(&mut self) -> Option<BlockId> {
        let b = self.queue.pop_front()?;
        self.queued[b] = false;
        Some(b)
    }
}

pub fn interpret(
    hierarchy: &TypeHierarchy,
    method: &MethodModel,
    cfg: &Cfg,
    instructions: &[Instruction],
    max_passes: u32,
) -> Result<InterpResult, Fault> {
    let mut interp = Interp::new(hierarchy, method, cfg, instructions, max_passes);
    interp.run()?;
    Ok(InterpResult {
        arena: interp.arena,
        blocks: interp.blocks,
    })
}

struct Interp<'a> {
    hierarchy: &'a TypeHierarchy,
    method: &'a MethodModel,
    cfg: &'a Cfg,
    insns: &'a [Instruction],
    max_passes: u32,

    arena: ExprArena,
    blocks: Vec<BlockCode>,
    /// Entry stack per block; for join blocks these are phi node ids.
    entries: Vec<Option<Vec<ExprId>>>,
    is_join: Vec<bool>,
    /// Best known type per local slot, seeded from the descriptor.
    slot_types: BTreeMap<u16, JvmType>,
    next_temp: u32,
    next_phi: u32,
}

impl<'a> Interp<'a> {
    fn new(
        hierarchy: &'a TypeHierarchy,
        method: &'a MethodModel,
        cfg: &'a Cfg,
        insns: &'a [Instruction],
        max_passes: u32,
    ) -> Interp<'a> {
        let n = cfg.blocks.len();
        let is_join = cfg
            .blocks
            .iter()
            .map(|b| b.preds.len() > 1)
            .collect::<Vec<_>>();

        let mut slot_types = BTreeMap::new();
        let mut slot = 0u16;
        if !method.is_static() {
            slot_types.insert(0, JvmType::object());
            slot = 1;
        }
        for p in &method.descriptor.params {
            slot_types.insert(slot, p.stack_type());
            slot += p.category() as u16;
        }

        Interp {
            hierarchy,
            method,
            cfg,
            insns,
            max_passes,
            arena: ExprArena::new(),
            blocks: vec![BlockCode::default(); n],
            entries: vec![None; n],
            is_join,
            slot_types,
            next_temp: 0,
            next_phi: 0,
        }
    }

    fn run(&mut self) -> Result<(), Fault> {
        if self.cfg.blocks.is_empty() {
            return Ok(());
        }
        self.entries[self.cfg.entry] = Some(vec![]);
        let mut wl = Worklist::new(self.cfg.blocks.len());
        wl.push(self.cfg.entry);
        let mut passes = 0u32;
        while let Some(b) = wl.pop() {
            passes += 1;
            if passes > self.max_passes {
                return Err(Fault::LimitExceeded(format!(
                    "interpreter exceeded {} block passes",
                    self.max_passes
                )));
            }
            self.exec_block(b, &mut wl)?;
        }
        Ok(())
    }

    // ---- value plumbing -------------------------------------------------

    fn pop(&mut self, stack: &mut Vec<ExprId>) -> Result<ExprId, Fault> {
        stack
            .pop()
            .ok_or_else(|| Fault::StackIntegrity("operand stack underflow".into()))
    }

    fn cat(&self, id: ExprId) -> u8 {
        self.arena.ty(id).category()
    }

    fn is_raw_new(&self, id: ExprId) -> bool {
        matches!(self.arena.node(id).kind, ExprKind::RawNew { .. })
    }

    /// Bind `value` to a fresh temporary and return the read of it.
    fn materialize(&mut self, value: ExprId, stmts: &mut Vec<Stmt>) -> ExprId {
        let id = self.next_temp;
        self.next_temp += 1;
        stmts.push(Stmt::SetTemp { id, value });
        let ty = self.arena.ty(value).clone();
        self.arena.push(ExprKind::Temp { id }, ty)
    }

    /// Statement boundary: flush stack entries that could observe (or be
    /// observed by) the statement about to be emitted. `written_slot` adds
    /// reads of a local that is being overwritten.
    fn flush(
        &mut self,
        stack: &mut Vec<ExprId>,
        stmts: &mut Vec<Stmt>,
        written_slot: Option<u16>,
    ) {
        let mut replaced: BTreeMap<ExprId, ExprId> = BTreeMap::new();
        for i in 0..stack.len() {
            let id = stack[i];
            if let Some(&t) = replaced.get(&id) {
                stack[i] = t;
                continue;
            }
            if self.is_raw_new(id) {
                continue;
            }
            let stale = written_slot.is_some_and(|s| self.arena.reads_local(id, s));
            if self.arena.is_movable(id) && !stale {
                continue;
            }
            let t = self.materialize(id, stmts);
            replaced.insert(id, t);
            stack[i] = t;
        }
    }

    /// Duplicate one stack value. Pure values and raw `new` placeholders
    /// share the node; anything else is bound to a temporary first.
    fn dup_value(&mut self, id: ExprId, stmts: &mut Vec<Stmt>) -> ExprId {
        if self.arena.is_movable(id) || self.is_raw_new(id) {
            id
        } else {
            self.materialize(id, stmts)
        }
    }

    /// Discard a popped value, keeping its effect if it has one.
    fn discard(&mut self, id: ExprId, stack: &mut Vec<ExprId>, stmts: &mut Vec<Stmt>) {
        if !self.arena.is_movable(id) && !self.is_raw_new(id) {
            self.flush(stack, stmts, None);
            stmts.push(Stmt::Expr(id));
        }
    }

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

    fn slot_jvm_type(&self, slot: u16, hint: SlotType) -> JvmType {
        if let Some(ty) = self.slot_types.get(&slot) {
            return ty.clone();
        }
        match hint {
            SlotType::Int => JvmType::Int,
            SlotType::Long => JvmType::Long,
            SlotType::Float => JvmType::Float,
            SlotType::Double => JvmType::Double,
            SlotType::Ref => JvmType::object(),
        }
    }

    fn load_local(&mut self, slot: u16, hint: SlotType) -> ExprId {
        let ty = self.slot_jvm_type(slot, hint);
        let name = self.local_name(slot);
        self.arena.push(ExprKind::Local { slot, name }, ty)
    }

    // ---- block execution ------------------------------------------------

    fn exec_block(&mut self, b: BlockId, wl: &mut Worklist) -> Result<(), Fault> {
        let mut stack = match &self.entries[b] {
            Some(s) => s.clone(),
            // Reached via the queue but the seeding flow was skipped;
            // cannot happen, but fail closed rather than panic.
            None => return Err(Fault::StackIntegrity("block without entry state".into())),
        };
        self.check_frame(b, &stack)?;

        let mut stmts = Vec::new();
        let mut terminator = Terminator::FallThrough;
        let block = &self.cfg.blocks[b];
        let (first, last) = (block.first_insn, block.last_insn);
        for idx in first..last {
            let insn = self.insns[idx].insn.clone();
            if let Some(t) = self.step(&insn, &mut stack, &mut stmts)? {
                terminator = t;
            }
        }

        // A value left on the stack at a fork must not be re-evaluated on
        // both paths, and phi assignments below must bind finished values.
        if self.cfg.blocks[b].succs.len() > 1 && !stack.is_empty() {
            self.flush(&mut stack, &mut stmts, None);
        }

        if matches!(terminator, Terminator::Return(_) | Terminator::Throw(_)) {
            // Leftover stack values die here; keep their effects in order.
            for i in 0..stack.len() {
                let id = stack[i];
                if !self.arena.is_movable(id) && !self.is_raw_new(id) {
                    stmts.push(Stmt::Expr(id));
                }
            }
        }

        let succ_ids: Vec<BlockId> = self.cfg.succ_ids(b).collect();
        for succ in succ_ids {
            self.flow(succ, &stack, &mut stmts, wl)?;
        }

        // Exceptional successors carry only the caught value.
        let handlers: Vec<BlockId> = self
            .cfg
            .handler_edges
            .iter()
            .filter(|e| e.from == b)
            .map(|e| e.handler)
            .collect();
        for h in handlers {
            self.flow_to_handler(h, wl);
        }

        self.blocks[b] = BlockCode {
            stmts,
            terminator,
            reached: true,
        };
        Ok(())
    }

    /// When a stack-map frame covers this block, the inferred entry types
    /// must be admissible under the declared frame types. Absent frames are
    /// fine; lub inference stands on its own.
    fn check_frame(&self, b: BlockId, stack: &[ExprId]) -> Result<(), Fault> {
        let start = self.cfg.blocks[b].start;
        if let Some(frame) = self.method.stack_map.get(&start) {
            if frame.stack.len() != stack.len() {
                return Err(Fault::StackIntegrity(format!(
                    "stack-map frame at {start:#x} declares depth {}, inferred {}",
                    frame.stack.len(),
                    stack.len()
                )));
            }
            for (vt, &id) in frame.stack.iter().zip(stack) {
                let ty = self.arena.ty(id);
                if !vt.admits(ty) {
                    return Err(Fault::StackIntegrity(format!(
                        "inferred type {ty} not admitted by frame at {start:#x}"
                    )));
                }
            }
        }
        Ok(())
    }

    fn flow(
        &mut self,
        succ: BlockId,
        exit: &[ExprId],
        stmts: &mut Vec<Stmt>,
        wl: &mut Worklist,
    ) -> Result<(), Fault> {
        // A handler entry owns its stack: exactly the caught exception. A
        // normal edge arriving there would race the exceptional seeding and
        // silently drop one of the two entry states.
        if self.cfg.blocks[succ].is_handler {
            return Err(Fault::StackIntegrity(format!(
                "jump into exception handler at {:#x}",
                self.cfg.blocks[succ].start
            )));
        }
        if self.is_join[succ] {
            match self.entries[succ].clone() {
                None => {
                    let mut phis = Vec::with_capacity(exit.len());
                    for &v in exit {
                        let id = self.next_phi;
                        self.next_phi += 1;
                        let ty = self.arena.ty(v).clone();
                        let phi = self.arena.push(ExprKind::Phi { id }, ty);
                        stmts.push(Stmt::SetPhi { id, value: v });
                        phis.push(phi);
                    }
                    self.entries[succ] = Some(phis);
                    wl.push(succ);
                }
                Some(phis) => {
                    if phis.len() != exit.len() {
                        return Err(Fault::StackIntegrity(format!(
                            "stack depth mismatch at join block starting {:#x}: {} vs {}",
                            self.cfg.blocks[succ].start,
                            phis.len(),
                            exit.len()
                        )));
                    }
                    for (&phi, &v) in phis.iter().zip(exit) {
                        let merged = self
                            .hierarchy
                            .lub(self.arena.ty(phi), self.arena.ty(v))
                            .ok_or_else(|| {
                                Fault::StackIntegrity(format!(
                                    "incompatible merge of {} and {}",
                                    self.arena.ty(phi),
                                    self.arena.ty(v)
                                ))
                            })?;
                        if &merged != self.arena.ty(phi) {
                            self.arena.widen_phi(phi, merged);
                            self.requeue_phi_readers(phi, wl);
                        }
                        let id = match self.arena.node(phi).kind {
                            ExprKind::Phi { id } => id,
                            _ => unreachable!("join entry is always a phi"),
                        };
                        stmts.push(Stmt::SetPhi { id, value: v });
                    }
                }
            }
        } else {
            let changed = match &self.entries[succ] {
                Some(prev) => prev.as_slice() != exit,
                None => true,
            };
            if changed {
                self.entries[succ] = Some(exit.to_vec());
                wl.push(succ);
            }
        }
        Ok(())
    }

    /// A widened phi invalidates every type cloned out of it: temporaries
    /// bound in blocks that already ran, and downstream phis seeded from
    /// them. Phis only enter a block through its entry stack, so scheduling
    /// the executed blocks that carry the phi there re-derives all of those
    /// snapshots; further widenings cascade the same way.
    fn requeue_phi_readers(&self, phi: ExprId, wl: &mut Worklist) {
        for (b, entry) in self.entries.iter().enumerate() {
            if self.blocks[b].reached && entry.as_ref().is_some_and(|e| e.contains(&phi)) {
                wl.push(b);
            }
        }
    }

    fn flow_to_handler(&mut self, handler: BlockId, wl: &mut Worklist) {
        if self.entries[handler].is_some() {
            return;
        }
        let ty = self.caught_type(handler);
        let caught = self.arena.push(ExprKind::CaughtException, ty);
        self.entries[handler] = Some(vec![caught]);
        wl.push(handler);
    }

    /// Declared type of the value live at a handler entry: the single
    /// declared catch class, or Throwable when entries disagree or any of
    /// them is catch-any.
    fn caught_type(&self, handler: BlockId) -> JvmType {
        let mut ty: Option<JvmType> = None;
        for e in self.cfg.handler_edges.iter().filter(|e| e.handler == handler) {
            let t = match &e.catch_type {
                Some(name) => JvmType::reference(name.clone()),
                None => return JvmType::throwable(),
            };
            ty = match ty {
                None => Some(t),
                Some(prev) if prev == t => Some(prev),
                Some(_) => return JvmType::throwable(),
            };
        }
        ty.unwrap_or_else(JvmType::throwable)
    }

    // ---- single instruction ---------------------------------------------

    fn step(
        &mut self,
        insn: &Insn,
        stack: &mut Vec<ExprId>,
        stmts: &mut Vec<Stmt>,
    ) -> Result<Option<Terminator>, Fault> {
        match insn {
            Insn::Nop => {}

            Insn::Const(c) => {
                let (constant, ty) = match c {
                    ConstOp::Null => (Constant::Null, JvmType::Null),
                    ConstOp::Int(v) => (Constant::Int(*v), JvmType::Int),
                    ConstOp::Long(v) => (Constant::Long(*v), JvmType::Long),
                    ConstOp::Float(v) => (Constant::Float(*v), JvmType::Float),
                    ConstOp::Double(v) => (Constant::Double(*v), JvmType::Double),
                    ConstOp::Pool(v) => {
                        let ty = v.jvm_type();
                        let constant = match v {
                            jdec_classfile::ConstValue::Int(x) => Constant::Int(*x),
                            jdec_classfile::ConstValue::Long(x) => Constant::Long(*x),
                            jdec_classfile::ConstValue::Float(x) => Constant::Float(*x),
                            jdec_classfile::ConstValue::Double(x) => Constant::Double(*x),
                            jdec_classfile::ConstValue::Str(s) => Constant::Str(s.clone()),
                            jdec_classfile::ConstValue::Class(c) => Constant::Class(c.clone()),
                        };
                        (constant, ty)
                    }
                };
                stack.push(self.arena.push(ExprKind::Const(constant), ty));
            }

            Insn::Load { slot, ty } => {
                let v = self.load_local(*slot, *ty);
                stack.push(v);
            }

            Insn::Store { slot, .. } => {
                let value = self.pop(stack)?;
                self.flush(stack, stmts, Some(*slot));
                let ty = self.arena.ty(value).clone();
                let merged = self
                    .slot_types
                    .get(slot)
                    .and_then(|prev| self.hierarchy.lub(prev, &ty))
                    .unwrap_or(ty);
                self.slot_types.insert(*slot, merged);
                stmts.push(Stmt::Store {
                    slot: *slot,
                    name: self.local_name(*slot),
                    value,
                });
            }

            Insn::Iinc { slot, delta } => {
                self.flush(stack, stmts, Some(*slot));
                let read = self.load_local(*slot, SlotType::Int);
                let amount = self.arena.int_const(*delta as i32);
                let value = self.arena.push(
                    ExprKind::Binary {
                        op: ArithOp::Add,
                        lhs: read,
                        rhs: amount,
                    },
                    JvmType::Int,
                );
                stmts.push(Stmt::Store {
                    slot: *slot,
                    name: self.local_name(*slot),
                    value,
                });
            }

            Insn::Stack(op) => self.stack_op(*op, stack, stmts)?,

            Insn::Arith { op, ty } => {
                let rhs = self.pop(stack)?;
                let lhs = self.pop(stack)?;
                stack.push(self.arena.push(
                    ExprKind::Binary {
                        op: *op,
                        lhs,
                        rhs,
                    },
                    ty.jvm_type(),
                ));
            }

            Insn::Neg { ty } => {
                let v = self.pop(stack)?;
                stack.push(self.arena.push(ExprKind::Neg(v), ty.jvm_type()));
            }

            Insn::Convert { to, .. } => {
                let v = self.pop(stack)?;
                stack.push(self.arena.push(
                    ExprKind::Cast {
                        to: to.clone(),
                        value: v,
                    },
                    to.clone(),
                ));
            }

            Insn::Cmp(kind) => {
                let rhs = self.pop(stack)?;
                let lhs = self.pop(stack)?;
                stack.push(self.arena.push(
                    ExprKind::ThreeWay {
                        kind: *kind,
                        lhs,
                        rhs,
                    },
                    JvmType::Int,
                ));
            }

            Insn::Branch { cond, .. } => {
                let c = self.branch_condition(*cond, stack)?;
                self.flush(stack, stmts, None);
                return Ok(Some(Terminator::If { cond: c }));
            }

            Insn::Goto { .. } => return Ok(Some(Terminator::Goto)),

            Insn::Switch { .. } => {
                let key = self.pop(stack)?;
                self.flush(stack, stmts, None);
                return Ok(Some(Terminator::Switch { key }));
            }

            Insn::Return { ty } => {
                let v = match ty {
                    Some(_) => Some(self.pop(stack)?),
                    None => None,
                };
                return Ok(Some(Terminator::Return(v)));
            }

            Insn::Throw => {
                let v = self.pop(stack)?;
                return Ok(Some(Terminator::Throw(v)));
            }

            Insn::GetField { member, is_static } => {
                let object = if *is_static {
                    None
                } else {
                    Some(self.pop(stack)?)
                };
                let ty = JvmType::parse(&member.descriptor)
                    .map_err(|e| Fault::MalformedBytecode(e.to_string()))?;
                stack.push(self.arena.push(
                    ExprKind::FieldGet {
                        member: member.clone(),
                        object,
                    },
                    ty,
                ));
            }

            Insn::PutField { member, is_static } => {
                let value = self.pop(stack)?;
                let object = if *is_static {
                    None
                } else {
                    Some(self.pop(stack)?)
                };
                self.flush(stack, stmts, None);
                stmts.push(Stmt::PutField {
                    member: member.clone(),
                    object,
                    value,
                });
            }

            Insn::Invoke { kind, member } => self.invoke(*kind, member, stack, stmts)?,

            Insn::New { class } => {
                let ty = JvmType::reference(class.clone());
                stack.push(self.arena.push(
                    ExprKind::RawNew {
                        class: class.clone(),
                    },
                    ty,
                ));
            }

            Insn::NewArray { elem } => {
                let len = self.pop(stack)?;
                stack.push(self.arena.push(
                    ExprKind::NewArray {
                        elem: elem.clone(),
                        dims: vec![len],
                    },
                    JvmType::array(elem.clone()),
                ));
            }

            Insn::MultiNewArray { elem, dims } => {
                let mut sizes = Vec::with_capacity(*dims as usize);
                for _ in 0..*dims {
                    sizes.push(self.pop(stack)?);
                }
                sizes.reverse();
                let mut inner = elem.clone();
                for _ in 0..*dims {
                    inner = match inner {
                        JvmType::Array(e) => *e,
                        _ => {
                            return Err(Fault::MalformedBytecode(
                                "multianewarray dimension count exceeds array depth".into(),
                            ));
                        }
                    };
                }
                stack.push(self.arena.push(
                    ExprKind::NewArray {
                        elem: inner,
                        dims: sizes,
                    },
                    elem.clone(),
                ));
            }

            Insn::ArrayLoad { elem } => {
                let index = self.pop(stack)?;
                let array = self.pop(stack)?;
                let ty = match self.arena.ty(array) {
                    JvmType::Array(e) => e.stack_type(),
                    _ => elem.stack_type(),
                };
                stack.push(self.arena.push(ExprKind::ArrayGet { array, index }, ty));
            }

            Insn::ArrayStore { elem } => {
                let value = self.pop(stack)?;
                let index = self.pop(stack)?;
                let array = self.pop(stack)?;
                self.flush(stack, stmts, None);
                stmts.push(Stmt::ArraySet {
                    elem: *elem,
                    array,
                    index,
                    value,
                });
            }

            Insn::ArrayLength => {
                let v = self.pop(stack)?;
                stack.push(self.arena.push(ExprKind::ArrayLength(v), JvmType::Int));
            }

            Insn::CheckCast { class } => {
                let v = self.pop(stack)?;
                let to = if class.starts_with('[') {
                    JvmType::parse(class)
                        .map_err(|e| Fault::MalformedBytecode(e.to_string()))?
                } else {
                    JvmType::reference(class.clone())
                };
                stack.push(self.arena.push(
                    ExprKind::Cast {
                        to: to.clone(),
                        value: v,
                    },
                    to,
                ));
            }

            Insn::InstanceOf { class } => {
                let v = self.pop(stack)?;
                stack.push(self.arena.push(
                    ExprKind::InstanceOf {
                        class: class.clone(),
                        value: v,
                    },
                    JvmType::Boolean,
                ));
            }

            Insn::Monitor { enter } => {
                let v = self.pop(stack)?;
                self.flush(stack, stmts, None);
                stmts.push(if *enter {
                    Stmt::MonitorEnter(v)
                } else {
                    Stmt::MonitorExit(v)
                });
            }

            Insn::Jsr { .. } | Insn::Ret { .. } => {
                return Err(Fault::UnsupportedConstruct(
                    "jsr/ret subroutine".into(),
                ));
            }
        }
        Ok(None)
    }

    fn stack_op(
        &mut self,
        op: StackOp,
        stack: &mut Vec<ExprId>,
        stmts: &mut Vec<Stmt>,
    ) -> Result<(), Fault> {
        let cat1 = |me: &Interp<'_>, id: ExprId| -> Result<ExprId, Fault> {
            if me.cat(id) == 1 {
                Ok(id)
            } else {
                Err(Fault::StackIntegrity(
                    "category-2 value in a category-1 stack slot".into(),
                ))
            }
        };
        match op {
            StackOp::Pop => {
                let v = self.pop(stack)?;
                cat1(self, v)?;
                self.discard(v, stack, stmts);
            }
            StackOp::Pop2 => {
                let v1 = self.pop(stack)?;
                if self.cat(v1) == 2 {
                    self.discard(v1, stack, stmts);
                } else {
                    let v2 = self.pop(stack)?;
                    cat1(self, v2)?;
                    self.discard(v2, stack, stmts);
                    self.discard(v1, stack, stmts);
                }
            }
            StackOp::Dup => {
                let v = self.pop(stack)?;
                cat1(self, v)?;
                let c = self.dup_value(v, stmts);
                stack.push(c);
                stack.push(if c == v { v } else { c });
            }
            StackOp::DupX1 => {
                let v1 = self.pop(stack)?;
                let v2 = self.pop(stack)?;
                cat1(self, v1)?;
                cat1(self, v2)?;
                let c = self.dup_value(v1, stmts);
                stack.push(c);
                stack.push(v2);
                stack.push(if c == v1 { v1 } else { c });
            }
            StackOp::DupX2 => {
                let v1 = self.pop(stack)?;
                cat1(self, v1)?;
                let c = self.dup_value(v1, stmts);
                let v2 = self.pop(stack)?;
                if self.cat(v2) == 2 {
                    stack.push(c);
                    stack.push(v2);
                } else {
                    let v3 = self.pop(stack)?;
                    cat1(self, v3)?;
                    stack.push(c);
                    stack.push(v3);
                    stack.push(v2);
                }
                stack.push(if c == v1 { v1 } else { c });
            }
            StackOp::Dup2 => {
                let v1 = self.pop(stack)?;
                if self.cat(v1) == 2 {
                    let c = self.dup_value(v1, stmts);
                    stack.push(c);
                    stack.push(if c == v1 { v1 } else { c });
                } else {
                    let v2 = self.pop(stack)?;
                    cat1(self, v2)?;
                    let c2 = self.dup_value(v2, stmts);
                    let c1 = self.dup_value(v1, stmts);
                    stack.push(c2);
                    stack.push(c1);
                    stack.push(if c2 == v2 { v2 } else { c2 });
                    stack.push(if c1 == v1 { v1 } else { c1 });
                }
            }
            StackOp::Dup2X1 => {
                let v1 = self.pop(stack)?;
                if self.cat(v1) == 2 {
                    let v2 = self.pop(stack)?;
                    cat1(self, v2)?;
                    let c = self.dup_value(v1, stmts);
                    stack.push(c);
                    stack.push(v2);
                    stack.push(if c == v1 { v1 } else { c });
                } else {
                    let v2 = self.pop(stack)?;
                    let v3 = self.pop(stack)?;
                    cat1(self, v2)?;
                    cat1(self, v3)?;
                    let c2 = self.dup_value(v2, stmts);
                    let c1 = self.dup_value(v1, stmts);
                    stack.push(c2);
                    stack.push(c1);
                    stack.push(v3);
                    stack.push(if c2 == v2 { v2 } else { c2 });
                    stack.push(if c1 == v1 { v1 } else { c1 });
                }
            }
            StackOp::Dup2X2 => {
                let v1 = self.pop(stack)?;
                if self.cat(v1) == 2 {
                    let c = self.dup_value(v1, stmts);
                    let v2 = self.pop(stack)?;
                    if self.cat(v2) == 2 {
                        stack.push(c);
                        stack.push(v2);
                    } else {
                        let v3 = self.pop(stack)?;
                        cat1(self, v3)?;
                        stack.push(c);
                        stack.push(v3);
                        stack.push(v2);
                    }
                    stack.push(if c == v1 { v1 } else { c });
                } else {
                    let v2 = self.pop(stack)?;
                    cat1(self, v2)?;
                    let c2 = self.dup_value(v2, stmts);
                    let c1 = self.dup_value(v1, stmts);
                    let v3 = self.pop(stack)?;
                    if self.cat(v3) == 2 {
                        stack.push(c2);
                        stack.push(c1);
                        stack.push(v3);
                    } else {
                        let v4 = self.pop(stack)?;
                        cat1(self, v4)?;
                        stack.push(c2);
                        stack.push(c1);
                        stack.push(v4);
                        stack.push(v3);
                    }
                    stack.push(if c2 == v2 { v2 } else { c2 });
                    stack.push(if c1 == v1 { v1 } else { c1 });
                }
            }
            StackOp::Swap => {
                let v1 = self.pop(stack)?;
                let v2 = self.pop(stack)?;
                cat1(self, v1)?;
                cat1(self, v2)?;
                stack.push(v1);
                stack.push(v2);
            }
        }
        Ok(())
    }

    fn branch_condition(
        &mut self,
        cond: BranchCond,
        stack: &mut Vec<ExprId>,
    ) -> Result<ExprId, Fault> {
        let (op, lhs, rhs, on_nan) = match cond {
            BranchCond::ICmpEq
            | BranchCond::ICmpNe
            | BranchCond::ICmpLt
            | BranchCond::ICmpGe
            | BranchCond::ICmpGt
            | BranchCond::ICmpLe
            | BranchCond::ACmpEq
            | BranchCond::ACmpNe => {
                let rhs = self.pop(stack)?;
                let lhs = self.pop(stack)?;
                let op = match cond {
                    BranchCond::ICmpEq | BranchCond::ACmpEq => CmpOp::Eq,
                    BranchCond::ICmpNe | BranchCond::ACmpNe => CmpOp::Ne,
                    BranchCond::ICmpLt => CmpOp::Lt,
                    BranchCond::ICmpGe => CmpOp::Ge,
                    BranchCond::ICmpGt => CmpOp::Gt,
                    _ => CmpOp::Le,
                };
                (op, lhs, rhs, None)
            }
            BranchCond::Null | BranchCond::NonNull => {
                let v = self.pop(stack)?;
                let null = self.arena.push(ExprKind::Const(Constant::Null), JvmType::Null);
                let op = if cond == BranchCond::Null {
                    CmpOp::Eq
                } else {
                    CmpOp::Ne
                };
                (op, v, null, None)
            }
            _ => {
                let v = self.pop(stack)?;
                let op = match cond {
                    BranchCond::Eq => CmpOp::Eq,
                    BranchCond::Ne => CmpOp::Ne,
                    BranchCond::Lt => CmpOp::Lt,
                    BranchCond::Ge => CmpOp::Ge,
                    BranchCond::Gt => CmpOp::Gt,
                    _ => CmpOp::Le,
                };
                // A branch over a three-way comparison is really a direct
                // comparison of its operands; the fold records what the
                // source expression evaluates to on NaN.
                if let ExprKind::ThreeWay { kind, lhs, rhs } = self.arena.node(v).kind {
                    (op, lhs, rhs, nan_outcome(kind, op))
                } else {
                    let zero = self.arena.int_const(0);
                    (op, v, zero, None)
                }
            }
        };
        Ok(self.arena.push(
            ExprKind::Compare {
                op,
                on_nan,
                lhs,
                rhs,
            },
            JvmType::Boolean,
        ))
    }

    fn invoke(
        &mut self,
        kind: InvokeKind,
        member: &jdec_classfile::MemberRef,
        stack: &mut Vec<ExprId>,
        stmts: &mut Vec<Stmt>,
    ) -> Result<(), Fault> {
        let descriptor = MethodDescriptor::parse(&member.descriptor)
            .map_err(|e| Fault::MalformedBytecode(e.to_string()))?;
        let mut args = Vec::with_capacity(descriptor.params.len());
        for _ in 0..descriptor.params.len() {
            args.push(self.pop(stack)?);
        }
        args.reverse();
        let receiver = if kind.has_receiver() {
            Some(self.pop(stack)?)
        } else {
            None
        };

        // new C; dup; ...args...; invokespecial C.<init> folds into a
        // single constructor expression that replaces the dup'd copy.
        if kind == InvokeKind::Special && member.name == "<init>" {
            if let Some(recv) = receiver {
                if let ExprKind::RawNew { class } = self.arena.node(recv).kind.clone() {
                    let obj = self.arena.push(
                        ExprKind::NewObject {
                            class: class.clone(),
                            args,
                        },
                        JvmType::reference(class),
                    );
                    let mut used = false;
                    for entry in stack.iter_mut() {
                        if *entry == recv {
                            *entry = obj;
                            used = true;
                        }
                    }
                    if !used {
                        self.flush(stack, stmts, None);
                        stmts.push(Stmt::Expr(obj));
                    }
                    return Ok(());
                }
                // this()/super() delegation inside a constructor.
                self.flush(stack, stmts, None);
                let call = self.arena.push(
                    ExprKind::Call {
                        kind,
                        member: member.clone(),
                        receiver: Some(recv),
                        args,
                    },
                    JvmType::object(),
                );
                stmts.push(Stmt::Expr(call));
                return Ok(());
            }
        }

        match descriptor.ret {
            Some(ret) => {
                let call = self.arena.push(
                    ExprKind::Call {
                        kind,
                        member: member.clone(),
                        receiver,
                        args,
                    },
                    ret.stack_type(),
                );
                stack.push(call);
            }
            None => {
                self.flush(stack, stmts, None);
                let call = self.arena.push(
                    ExprKind::Call {
                        kind,
                        member: member.clone(),
                        receiver,
                        args,
                    },
                    JvmType::object(),
                );
                stmts.push(Stmt::Expr(call));
            }
        }
        Ok(())
    }
}

/// What a `cmp; if<op>` pair evaluates to when either operand is NaN.
fn nan_outcome(kind: CmpKind, op: CmpOp) -> Option<OnNan> {
    let nan_value: i32 = match kind {
        CmpKind::Lcmp => return None,
        CmpKind::FloatL | CmpKind::DoubleL => -1,
        CmpKind::FloatG | CmpKind::DoubleG => 1,
    };
    let holds = match op {
        CmpOp::Eq => nan_value == 0,
        CmpOp::Ne => nan_value != 0,
        CmpOp::Lt => nan_value < 0,
        CmpOp::Ge => nan_value >= 0,
        CmpOp::Gt => nan_value > 0,
        CmpOp::Le => nan_value <= 0,
    };
    Some(if holds { OnNan::IsTrue } else { OnNan::IsFalse })
}

#[cfg(test)]
mod tests {
    use super::*;
    use jdec_classfile::{ConstValue, ExceptionTableEntry, MemberRef, MethodFlags};
    use jdec_ir::insn::ArrayKind;

    fn insn(offset: u32, size: u32, insn: Insn) -> Instruction {
        Instruction { offset, size, insn }
    }

    fn run(insns: Vec<Instruction>, descriptor: &str) -> InterpResult {
        let method = MethodModel::new("t", MethodFlags::STATIC, descriptor, vec![]).unwrap();
        let cfg = Cfg::build(&insns, &[]).unwrap();
        interpret(&TypeHierarchy::new(), &method, &cfg, &insns, 1000).unwrap()
    }

    #[test]
    fn arithmetic_folds_into_one_store() {
        let r = run(
            vec![
                insn(0, 1, Insn::Const(ConstOp::Int(1))),
                insn(1, 1, Insn::Const(ConstOp::Int(2))),
                insn(
                    2,
                    1,
                    Insn::Arith {
                        op: ArithOp::Add,
                        ty: jdec_ir::insn::PrimType::Int,
                    },
                ),
                insn(
                    3,
                    1,
                    Insn::Store {
                        slot: 0,
                        ty: SlotType::Int,
                    },
                ),
                insn(4, 1, Insn::Return { ty: None }),
            ],
            "()V",
        );
        let b = &r.blocks[0];
        assert_eq!(b.stmts.len(), 1);
        match &b.stmts[0] {
            Stmt::Store { name, value, .. } => {
                assert_eq!(name, "v0");
                assert!(matches!(
                    r.arena.node(*value).kind,
                    ExprKind::Binary {
                        op: ArithOp::Add,
                        ..
                    }
                ));
            }
            other => panic!("expected store, got {other:?}"),
        }
        assert_eq!(b.terminator, Terminator::Return(None));
    }

    #[test]
    fn stack_join_introduces_phi() {
        // if (a0 == 0) push 1 else push 2; store the merged value.
        let r = run(
            vec![
                insn(
                    0,
                    1,
                    Insn::Load {
                        slot: 0,
                        ty: SlotType::Int,
                    },
                ),
                insn(
                    1,
                    3,
                    Insn::Branch {
                        cond: BranchCond::Eq,
                        target: 8,
                    },
                ),
                insn(4, 1, Insn::Const(ConstOp::Int(1))),
                insn(5, 3, Insn::Goto { target: 9 }),
                insn(8, 1, Insn::Const(ConstOp::Int(2))),
                insn(
                    9,
                    1,
                    Insn::Store {
                        slot: 1,
                        ty: SlotType::Int,
                    },
                ),
                insn(10, 1, Insn::Return { ty: None }),
            ],
            "(I)V",
        );
        // Both sides assign the same phi before transferring.
        let phi_assigns: Vec<u32> = r
            .blocks
            .iter()
            .flat_map(|b| &b.stmts)
            .filter_map(|s| match s {
                Stmt::SetPhi { id, .. } => Some(*id),
                _ => None,
            })
            .collect();
        assert_eq!(phi_assigns, vec![0, 0]);
        // The join block stores a phi read.
        let join = r.blocks.iter().find(|b| {
            b.reached
                && b.stmts
                    .iter()
                    .any(|s| matches!(s, Stmt::Store { slot: 1, .. }))
        });
        let join = join.expect("join block with store");
        match &join.stmts[0] {
            Stmt::Store { value, .. } => {
                assert!(matches!(r.arena.node(*value).kind, ExprKind::Phi { .. }));
            }
            other => panic!("expected store, got {other:?}"),
        }
    }

    #[test]
    fn dup_of_call_result_becomes_temp() {
        let r = run(
            vec![
                insn(
                    0,
                    3,
                    Insn::Invoke {
                        kind: InvokeKind::Static,
                        member: MemberRef::new("T", "f", "()I"),
                    },
                ),
                insn(3, 1, Insn::Stack(StackOp::Dup)),
                insn(
                    4,
                    1,
                    Insn::Store {
                        slot: 0,
                        ty: SlotType::Int,
                    },
                ),
                insn(
                    5,
                    1,
                    Insn::Store {
                        slot: 1,
                        ty: SlotType::Int,
                    },
                ),
                insn(6, 1, Insn::Return { ty: None }),
            ],
            "()V",
        );
        let b = &r.blocks[0];
        assert!(matches!(b.stmts[0], Stmt::SetTemp { id: 0, .. }));
        // Both stores read the temporary, not the call.
        for s in &b.stmts[1..] {
            if let Stmt::Store { value, .. } = s {
                assert!(matches!(r.arena.node(*value).kind, ExprKind::Temp { id: 0 }));
            }
        }
    }

    #[test]
    fn constructor_call_folds_into_new_object() {
        let r = run(
            vec![
                insn(
                    0,
                    3,
                    Insn::New {
                        class: "java/lang/StringBuilder".into(),
                    },
                ),
                insn(3, 1, Insn::Stack(StackOp::Dup)),
                insn(
                    4,
                    3,
                    Insn::Invoke {
                        kind: InvokeKind::Special,
                        member: MemberRef::new("java/lang/StringBuilder", "<init>", "()V"),
                    },
                ),
                insn(
                    7,
                    1,
                    Insn::Store {
                        slot: 0,
                        ty: SlotType::Ref,
                    },
                ),
                insn(8, 1, Insn::Return { ty: None }),
            ],
            "()V",
        );
        let b = &r.blocks[0];
        assert_eq!(b.stmts.len(), 1);
        match &b.stmts[0] {
            Stmt::Store { value, .. } => match &r.arena.node(*value).kind {
                ExprKind::NewObject { class, args } => {
                    assert_eq!(class, "java/lang/StringBuilder");
                    assert!(args.is_empty());
                }
                other => panic!("expected folded constructor, got {other:?}"),
            },
            other => panic!("expected store, got {other:?}"),
        }
    }

    #[test]
    fn nan_outcome_distinguishes_cmpl_and_cmpg() {
        // fcmpg + iflt: NaN pushes +1, so the branch is not taken.
        assert_eq!(nan_outcome(CmpKind::FloatG, CmpOp::Lt), Some(OnNan::IsFalse));
        // fcmpl + iflt: NaN pushes -1, so the branch is taken.
        assert_eq!(nan_outcome(CmpKind::FloatL, CmpOp::Lt), Some(OnNan::IsTrue));
        assert_eq!(nan_outcome(CmpKind::DoubleG, CmpOp::Ge), Some(OnNan::IsTrue));
        assert_eq!(nan_outcome(CmpKind::Lcmp, CmpOp::Lt), None);
    }

    #[test]
    fn comparison_branch_folds_three_way() {
        let r = run(
            vec![
                insn(
                    0,
                    1,
                    Insn::Load {
                        slot: 0,
                        ty: SlotType::Float,
                    },
                ),
                insn(1, 1, Insn::Const(ConstOp::Float(0.0))),
                insn(2, 1, Insn::Cmp(CmpKind::FloatG)),
                insn(
                    3,
                    3,
                    Insn::Branch {
                        cond: BranchCond::Lt,
                        target: 7,
                    },
                ),
                insn(6, 1, Insn::Return { ty: None }),
                insn(7, 1, Insn::Return { ty: None }),
            ],
            "(F)V",
        );
        match &r.blocks[0].terminator {
            Terminator::If { cond } => match r.arena.node(*cond).kind {
                ExprKind::Compare { op, on_nan, .. } => {
                    assert_eq!(op, CmpOp::Lt);
                    assert_eq!(on_nan, Some(OnNan::IsFalse));
                }
                ref other => panic!("expected compare, got {other:?}"),
            },
            other => panic!("expected if terminator, got {other:?}"),
        }
    }

    #[test]
    fn stack_underflow_is_a_fault() {
        let insns = vec![insn(
            0,
            1,
            Insn::Store {
                slot: 0,
                ty: SlotType::Int,
            },
        )];
        let method = MethodModel::new("t", MethodFlags::STATIC, "()V", vec![]).unwrap();
        let cfg = Cfg::build(&insns, &[]).unwrap();
        let err = interpret(&TypeHierarchy::new(), &method, &cfg, &insns, 1000).unwrap_err();
        assert!(matches!(err, Fault::StackIntegrity(_)));
    }

    #[test]
    fn array_store_flushes_pending_heap_reads() {
        // getstatic T.x; aload_0; iconst_0; iconst_1; iastore; ireturn of x
        let x = MemberRef::new("T", "x", "I");
        let r = run(
            vec![
                insn(
                    0,
                    3,
                    Insn::GetField {
                        member: x.clone(),
                        is_static: true,
                    },
                ),
                insn(
                    3,
                    1,
                    Insn::Load {
                        slot: 0,
                        ty: SlotType::Ref,
                    },
                ),
                insn(4, 1, Insn::Const(ConstOp::Int(0))),
                insn(5, 1, Insn::Const(ConstOp::Int(1))),
                insn(6, 1, Insn::ArrayStore { elem: ArrayKind::Int }),
                insn(
                    7,
                    1,
                    Insn::Return {
                        ty: Some(SlotType::Int),
                    },
                ),
            ],
            "([I)I",
        );
        let b = &r.blocks[0];
        // The field read is pinned before the array store.
        assert!(matches!(b.stmts[0], Stmt::SetTemp { .. }));
        assert!(matches!(b.stmts[1], Stmt::ArraySet { .. }));
        match b.terminator {
            Terminator::Return(Some(v)) => {
                assert!(matches!(r.arena.node(v).kind, ExprKind::Temp { .. }));
            }
            ref other => panic!("expected value return, got {other:?}"),
        }
    }

    #[test]
    fn back_edge_widening_reexecutes_consumers() {
        // A null flows into a loop-header phi; the exit block stores and
        // reloads it before the back edge widens the phi to String. The
        // reload's type must reflect the widened merge, which requires the
        // exit block to run again after the late widening.
        //
        //     0: push null
        //     1: goto 4
        //     4: load a0; if a0 == 0 goto 11    header, entry [phi]
        //     8: v1 = phi; load v1; return v1   exit
        //    11: pop; push "loop"; goto 4       back edge
        let r = run(
            vec![
                insn(0, 1, Insn::Const(ConstOp::Null)),
                insn(1, 3, Insn::Goto { target: 4 }),
                insn(
                    4,
                    1,
                    Insn::Load {
                        slot: 0,
                        ty: SlotType::Int,
                    },
                ),
                insn(
                    5,
                    3,
                    Insn::Branch {
                        cond: BranchCond::Eq,
                        target: 11,
                    },
                ),
                insn(
                    8,
                    1,
                    Insn::Store {
                        slot: 1,
                        ty: SlotType::Ref,
                    },
                ),
                insn(
                    9,
                    1,
                    Insn::Load {
                        slot: 1,
                        ty: SlotType::Ref,
                    },
                ),
                insn(
                    10,
                    1,
                    Insn::Return {
                        ty: Some(SlotType::Ref),
                    },
                ),
                insn(11, 1, Insn::Stack(StackOp::Pop)),
                insn(
                    12,
                    3,
                    Insn::Const(ConstOp::Pool(ConstValue::Str("loop".into()))),
                ),
                insn(15, 3, Insn::Goto { target: 4 }),
            ],
            "(I)Ljava/lang/String;",
        );
        let ret = r
            .blocks
            .iter()
            .filter(|b| b.reached)
            .find_map(|b| match b.terminator {
                Terminator::Return(Some(v)) => Some(v),
                _ => None,
            })
            .expect("value return");
        assert!(matches!(r.arena.node(ret).kind, ExprKind::Local { slot: 1, .. }));
        assert_eq!(*r.arena.ty(ret), JvmType::reference("java/lang/String"));
    }

    #[test]
    fn jump_into_a_handler_is_a_fault() {
        // goto targets the handler entry while a value sits on the stack;
        // the two entry states (caught exception vs. jumped value) conflict.
        let insns = vec![
            insn(0, 1, Insn::Const(ConstOp::Null)),
            insn(1, 3, Insn::Goto { target: 4 }),
            insn(
                4,
                1,
                Insn::Store {
                    slot: 0,
                    ty: SlotType::Ref,
                },
            ),
            insn(5, 1, Insn::Return { ty: None }),
        ];
        let table = vec![ExceptionTableEntry {
            start_pc: 0,
            end_pc: 1,
            handler_pc: 4,
            catch_type: None,
        }];
        let method = MethodModel::new("t", MethodFlags::STATIC, "()V", vec![]).unwrap();
        let cfg = Cfg::build(&insns, &table).unwrap();
        let err = interpret(&TypeHierarchy::new(), &method, &cfg, &insns, 1000).unwrap_err();
        assert!(matches!(err, Fault::StackIntegrity(_)));
    }
}

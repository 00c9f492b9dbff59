use jdec_classfile::{JvmType, MemberRef};

use crate::insn::{ArithOp, CmpKind, InvokeKind};

/// Index of a node in the expression arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExprId(pub u32);

/// Literal value of a constant node.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Null,
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(String),
    /// Class literal, internal binary name.
    Class(String),
}

/// Boolean comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
}

impl CmpOp {
    pub fn negate(self) -> CmpOp {
        match self {
            CmpOp::Eq => CmpOp::Ne,
            CmpOp::Ne => CmpOp::Eq,
            CmpOp::Lt => CmpOp::Ge,
            CmpOp::Ge => CmpOp::Lt,
            CmpOp::Gt => CmpOp::Le,
            CmpOp::Le => CmpOp::Gt,
        }
    }
}

/// What an unordered (NaN) floating-point comparison evaluates to.
///
/// `fcmpl`+`ifge` and `fcmpg`+`ifge` are different source expressions;
/// the flag keeps them apart all the way to the printer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnNan {
    IsTrue,
    IsFalse,
}

/// An expression DAG node. Nodes are shared by id; sharing is explicit,
/// never aliased, so hoisting decisions reduce to reference counting.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Const(Constant),
    /// Read of a named local (parameter or declared variable).
    Local { slot: u16, name: String },
    /// Materialized temporary introduced at a statement boundary.
    Temp { id: u32 },
    /// Merge placeholder for values that differ across predecessors.
    Phi { id: u32 },
    /// The exception reference live at a handler entry.
    CaughtException,
    Binary {
        op: ArithOp,
        lhs: ExprId,
        rhs: ExprId,
    },
    Neg(ExprId),
    /// Boolean comparison; `on_nan` is set for floating-point operands.
    Compare {
        op: CmpOp,
        on_nan: Option<OnNan>,
        lhs: ExprId,
        rhs: ExprId,
    },
    /// Unfolded three-way comparison (-1/0/1) when its result is used as
    /// a value rather than branched on.
    ThreeWay {
        kind: CmpKind,
        lhs: ExprId,
        rhs: ExprId,
    },
    /// Short-circuit conjunction/disjunction recovered from branch chains.
    And(ExprId, ExprId),
    Or(ExprId, ExprId),
    Not(ExprId),
    /// Explicit conversion (widening, narrowing, or checkcast).
    Cast { to: JvmType, value: ExprId },
    InstanceOf { class: String, value: ExprId },
    FieldGet {
        member: MemberRef,
        /// `None` for static fields.
        object: Option<ExprId>,
    },
    ArrayGet { array: ExprId, index: ExprId },
    ArrayLength(ExprId),
    Call {
        kind: InvokeKind,
        member: MemberRef,
        receiver: Option<ExprId>,
        args: Vec<ExprId>,
    },
    /// `new C(args)` with the constructor call folded in.
    NewObject { class: String, args: Vec<ExprId> },
    /// Raw `new` whose constructor call was not recognized; opaque and
    /// effectful.
    RawNew { class: String },
    NewArray { elem: JvmType, dims: Vec<ExprId> },
}

impl ExprKind {
    /// `RawNew` is deliberately not effectful: it is a placeholder that the
    /// constructor-folding rule must be able to find on the stack, so it is
    /// never hoisted into a temporary.
    fn own_effect(&self) -> bool {
        matches!(
            self,
            ExprKind::Call { .. } | ExprKind::NewObject { .. } | ExprKind::NewArray { .. }
        )
    }

    /// Reads mutable heap state; may not be deferred past a store boundary.
    fn own_heap_read(&self) -> bool {
        matches!(
            self,
            ExprKind::FieldGet { .. } | ExprKind::ArrayGet { .. } | ExprKind::ArrayLength(_)
        )
    }

    /// Child node ids, in evaluation order.
    pub fn operands(&self) -> Vec<ExprId> {
        match self {
            ExprKind::Const(_)
            | ExprKind::Local { .. }
            | ExprKind::Temp { .. }
            | ExprKind::Phi { .. }
            | ExprKind::CaughtException
            | ExprKind::RawNew { .. } => vec![],
            ExprKind::Binary { lhs, rhs, .. }
            | ExprKind::Compare { lhs, rhs, .. }
            | ExprKind::ThreeWay { lhs, rhs, .. }
            | ExprKind::And(lhs, rhs)
            | ExprKind::Or(lhs, rhs)
            | ExprKind::ArrayGet {
                array: lhs,
                index: rhs,
            } => vec![*lhs, *rhs],
            ExprKind::Neg(v)
            | ExprKind::Not(v)
            | ExprKind::Cast { value: v, .. }
            | ExprKind::InstanceOf { value: v, .. }
            | ExprKind::ArrayLength(v) => vec![*v],
            ExprKind::FieldGet { object, .. } => object.iter().copied().collect(),
            ExprKind::Call { receiver, args, .. } => {
                receiver.iter().copied().chain(args.iter().copied()).collect()
            }
            ExprKind::NewObject { args, .. } => args.clone(),
            ExprKind::NewArray { dims, .. } => dims.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExprNode {
    pub kind: ExprKind,
    pub ty: JvmType,
    /// Whether evaluating this node (or any operand) has observable side
    /// effects; effectful shared nodes must be hoisted, not duplicated.
    pub effectful: bool,
    /// Whether this node (or any operand) reads the heap; such values are
    /// materialized rather than moved across a store boundary.
    pub reads_heap: bool,
}

/// Arena of expression nodes. Append-only; ids are stable and ordered by
/// creation, which keeps all downstream iteration deterministic.
#[derive(Debug, Default)]
pub struct ExprArena {
    nodes: Vec<ExprNode>,
}

impl ExprArena {
    pub fn new() -> ExprArena {
        ExprArena::default()
    }

    pub fn push(&mut self, kind: ExprKind, ty: JvmType) -> ExprId {
        let operands = kind.operands();
        let effectful =
            kind.own_effect() || operands.iter().any(|&id| self.node(id).effectful);
        let reads_heap =
            kind.own_heap_read() || operands.iter().any(|&id| self.node(id).reads_heap);
        let id = ExprId(self.nodes.len() as u32);
        self.nodes.push(ExprNode {
            kind,
            ty,
            effectful,
            reads_heap,
        });
        id
    }

    pub fn node(&self, id: ExprId) -> &ExprNode {
        &self.nodes[id.0 as usize]
    }

    pub fn ty(&self, id: ExprId) -> &JvmType {
        &self.nodes[id.0 as usize].ty
    }

    pub fn is_effectful(&self, id: ExprId) -> bool {
        self.nodes[id.0 as usize].effectful
    }

    /// Whether the value may be re-evaluated or reordered freely: no side
    /// effects and no heap reads anywhere in its tree.
    pub fn is_movable(&self, id: ExprId) -> bool {
        let n = &self.nodes[id.0 as usize];
        !n.effectful && !n.reads_heap
    }

    /// Widen a merge placeholder's type during fixed-point iteration.
    /// Only phi nodes are ever retyped; everything else stays immutable.
    pub fn widen_phi(&mut self, id: ExprId, ty: JvmType) {
        debug_assert!(matches!(self.nodes[id.0 as usize].kind, ExprKind::Phi { .. }));
        self.nodes[id.0 as usize].ty = ty;
    }

    /// Whether the tree under `id` reads the given local slot.
    pub fn reads_local(&self, id: ExprId, slot: u16) -> bool {
        let n = &self.nodes[id.0 as usize];
        if let ExprKind::Local { slot: s, .. } = n.kind {
            if s == slot {
                return true;
            }
        }
        n.kind.operands().iter().any(|&c| self.reads_local(c, slot))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Convenience for integer constants, used all over branch folding.
    pub fn int_const(&mut self, v: i32) -> ExprId {
        self.push(ExprKind::Const(Constant::Int(v)), JvmType::Int)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effect_propagates_to_parents() {
        let mut a = ExprArena::new();
        let one = a.int_const(1);
        assert!(!a.is_effectful(one));

        let call = a.push(
            ExprKind::Call {
                kind: InvokeKind::Static,
                member: MemberRef::new("T", "f", "()I"),
                receiver: None,
                args: vec![],
            },
            JvmType::Int,
        );
        assert!(a.is_effectful(call));

        let sum = a.push(
            ExprKind::Binary {
                op: ArithOp::Add,
                lhs: one,
                rhs: call,
            },
            JvmType::Int,
        );
        assert!(a.is_effectful(sum));
    }

    #[test]
    fn operands_in_evaluation_order() {
        let mut a = ExprArena::new();
        let x = a.int_const(1);
        let y = a.int_const(2);
        let node = ExprKind::Binary {
            op: ArithOp::Sub,
            lhs: x,
            rhs: y,
        };
        assert_eq!(node.operands(), vec![x, y]);
    }
}

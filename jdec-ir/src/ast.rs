//! Printer-facing output tree.
//!
//! The emitter flattens the expression DAG into owned trees (duplicating
//! pure shared nodes, binding effectful shared ones to temporaries) and
//! produces this AST. Consumers walk it through the read-only [`Visitor`];
//! every expression carries its static type so the printer can decide when
//! an explicit cast is required.

use jdec_classfile::{JvmType, MemberRef};

use crate::expr::{CmpOp, Constant, OnNan};
use crate::insn::{ArithOp, ArrayKind, CmpKind, InvokeKind};
use crate::stmt::Label;

/// An owned expression tree node with its static type.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub ty: JvmType,
    pub kind: ExprKind,
}

impl Expr {
    pub fn new(ty: JvmType, kind: ExprKind) -> Expr {
        Expr { ty, kind }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Const(Constant),
    /// Named local, parameter, or temporary.
    Var(String),
    CaughtException,
    Binary {
        op: ArithOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Neg(Box<Expr>),
    Compare {
        op: CmpOp,
        on_nan: Option<OnNan>,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    ThreeWay {
        kind: CmpKind,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Cast { to: JvmType, value: Box<Expr> },
    InstanceOf { class: String, value: Box<Expr> },
    FieldGet {
        member: MemberRef,
        object: Option<Box<Expr>>,
    },
    ArrayGet {
        array: Box<Expr>,
        index: Box<Expr>,
    },
    ArrayLength(Box<Expr>),
    Call {
        kind: InvokeKind,
        member: MemberRef,
        receiver: Option<Box<Expr>>,
        args: Vec<Expr>,
    },
    NewObject { class: String, args: Vec<Expr> },
    NewArray { elem: JvmType, dims: Vec<Expr> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatchClause {
    pub class: Option<String>,
    pub binding: String,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    pub keys: Vec<i32>,
    pub body: Vec<Stmt>,
    pub falls_through: bool,
}

/// Output statement tree, one per reconstructed method body.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr(Expr),
    /// Declaration of a hoisted temporary: `T name = init;`.
    DeclareTemp { name: String, init: Expr },
    Assign { target: String, value: Expr },
    PutField {
        member: MemberRef,
        object: Option<Expr>,
        value: Expr,
    },
    ArraySet {
        elem: ArrayKind,
        array: Expr,
        index: Expr,
        value: Expr,
    },
    If {
        cond: Expr,
        then_body: Vec<Stmt>,
        else_body: Vec<Stmt>,
    },
    While {
        label: Option<Label>,
        cond: Expr,
        body: Vec<Stmt>,
    },
    DoWhile {
        label: Option<Label>,
        body: Vec<Stmt>,
        cond: Expr,
    },
    Switch {
        label: Option<Label>,
        key: Expr,
        cases: Vec<SwitchCase>,
        default: Vec<Stmt>,
    },
    Try {
        body: Vec<Stmt>,
        catches: Vec<CatchClause>,
        finally: Vec<Stmt>,
    },
    Labeled { label: Label, body: Vec<Stmt> },
    Break(Option<Label>),
    Continue(Option<Label>),
    Return(Option<Expr>),
    Throw(Expr),
    MonitorEnter(Expr),
    MonitorExit(Expr),
    Goto(Label),
    GotoTarget(Label),
    Comment(String),
}

/// Read-only walk over the output tree. Default methods recurse; override
/// what you need.
pub trait Visitor {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        walk_expr(self, expr);
    }
}

pub fn walk_stmts<V: Visitor + ?Sized>(v: &mut V, stmts: &[Stmt]) {
    for s in stmts {
        v.visit_stmt(s);
    }
}

pub fn walk_stmt<V: Visitor + ?Sized>(v: &mut V, stmt: &Stmt) {
    match stmt {
        Stmt::Expr(e)
        | Stmt::Throw(e)
        | Stmt::MonitorEnter(e)
        | Stmt::MonitorExit(e)
        | Stmt::DeclareTemp { init: e, .. }
        | Stmt::Assign { value: e, .. } => v.visit_expr(e),
        Stmt::PutField { object, value, .. } => {
            if let Some(obj) = object {
                v.visit_expr(obj);
            }
            v.visit_expr(value);
        }
        Stmt::ArraySet {
            array,
            index,
            value,
            ..
        } => {
            v.visit_expr(array);
            v.visit_expr(index);
            v.visit_expr(value);
        }
        Stmt::If {
            cond,
            then_body,
            else_body,
        } => {
            v.visit_expr(cond);
            walk_stmts(v, then_body);
            walk_stmts(v, else_body);
        }
        Stmt::While { cond, body, .. } => {
            v.visit_expr(cond);
            walk_stmts(v, body);
        }
        Stmt::DoWhile { body, cond, .. } => {
            walk_stmts(v, body);
            v.visit_expr(cond);
        }
        Stmt::Switch {
            key,
            cases,
            default,
            ..
        } => {
            v.visit_expr(key);
            for case in cases {
                walk_stmts(v, &case.body);
            }
            walk_stmts(v, default);
        }
        Stmt::Try {
            body,
            catches,
            finally,
        } => {
            walk_stmts(v, body);
            for c in catches {
                walk_stmts(v, &c.body);
            }
            walk_stmts(v, finally);
        }
        Stmt::Labeled { body, .. } => walk_stmts(v, body),
        Stmt::Return(e) => {
            if let Some(e) = e {
                v.visit_expr(e);
            }
        }
        Stmt::Break(_)
        | Stmt::Continue(_)
        | Stmt::Goto(_)
        | Stmt::GotoTarget(_)
        | Stmt::Comment(_) => {}
    }
}

pub fn walk_expr<V: Visitor + ?Sized>(v: &mut V, expr: &Expr) {
    match &expr.kind {
        ExprKind::Const(_) | ExprKind::Var(_) | ExprKind::CaughtException => {}
        ExprKind::Binary { lhs, rhs, .. }
        | ExprKind::Compare { lhs, rhs, .. }
        | ExprKind::ThreeWay { lhs, rhs, .. }
        | ExprKind::And(lhs, rhs)
        | ExprKind::Or(lhs, rhs)
        | ExprKind::ArrayGet {
            array: lhs,
            index: rhs,
        } => {
            v.visit_expr(lhs);
            v.visit_expr(rhs);
        }
        ExprKind::Neg(e)
        | ExprKind::Not(e)
        | ExprKind::Cast { value: e, .. }
        | ExprKind::InstanceOf { value: e, .. }
        | ExprKind::ArrayLength(e) => v.visit_expr(e),
        ExprKind::FieldGet { object, .. } => {
            if let Some(obj) = object {
                v.visit_expr(obj);
            }
        }
        ExprKind::Call { receiver, args, .. } => {
            if let Some(r) = receiver {
                v.visit_expr(r);
            }
            for a in args {
                v.visit_expr(a);
            }
        }
        ExprKind::NewObject { args, .. } => {
            for a in args {
                v.visit_expr(a);
            }
        }
        ExprKind::NewArray { dims, .. } => {
            for d in dims {
                v.visit_expr(d);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct VarCounter(usize);

    impl Visitor for VarCounter {
        fn visit_expr(&mut self, expr: &Expr) {
            if matches!(expr.kind, ExprKind::Var(_)) {
                self.0 += 1;
            }
            walk_expr(self, expr);
        }
    }

    #[test]
    fn visitor_reaches_nested_expressions() {
        let var = |n: &str| Expr::new(JvmType::Int, ExprKind::Var(n.into()));
        let body = vec![Stmt::If {
            cond: Expr::new(
                JvmType::Boolean,
                ExprKind::Compare {
                    op: CmpOp::Lt,
                    on_nan: None,
                    lhs: Box::new(var("a")),
                    rhs: Box::new(var("b")),
                },
            ),
            then_body: vec![Stmt::Return(Some(var("a")))],
            else_body: vec![Stmt::Return(Some(var("b")))],
        }];
        let mut counter = VarCounter(0);
        walk_stmts(&mut counter, &body);
        assert_eq!(counter.0, 4);
    }
}

//! Flatten the expression DAG into the owned output AST.
//!
//! Sharing in the DAG is resolved here: a node referenced more than once is
//! duplicated when it is movable, and bound to a declared temporary before
//! its first use when it is not. Interpreter temporaries (`SetTemp`) become
//! declarations of the same shape, so the printer sees exactly one binding
//! per name.

use std::collections::BTreeMap;

use jdec_ir::ast;
use jdec_ir::expr::{ExprArena, ExprId, ExprKind};
use jdec_ir::stmt::Stmt;

/// Render a structured body against its arena.
pub fn emit_body(arena: &ExprArena, stmts: &[Stmt]) -> Vec<ast::Stmt> {
    let mut uses = vec![0u32; arena.len()];
    count_stmts(arena, stmts, &mut uses);

    let mut emitter = Emitter {
        arena,
        uses,
        hoisted: BTreeMap::new(),
        next_temp: first_free_temp(arena),
    };
    emitter.stmts(stmts)
}

/// Temp names continue after the interpreter's own `tN` numbering.
fn first_free_temp(arena: &ExprArena) -> u32 {
    let mut next = 0;
    for i in 0..arena.len() {
        if let ExprKind::Temp { id } = arena.node(ExprId(i as u32)).kind {
            next = next.max(id + 1);
        }
    }
    next
}

fn count_stmts(arena: &ExprArena, stmts: &[Stmt], uses: &mut [u32]) {
    for s in stmts {
        match s {
            Stmt::Expr(e)
            | Stmt::Throw(e)
            | Stmt::MonitorEnter(e)
            | Stmt::MonitorExit(e)
            | Stmt::Store { value: e, .. }
            | Stmt::SetTemp { value: e, .. }
            | Stmt::SetPhi { value: e, .. } => count(arena, *e, uses),
            Stmt::PutField { object, value, .. } => {
                if let Some(o) = object {
                    count(arena, *o, uses);
                }
                count(arena, *value, uses);
            }
            Stmt::ArraySet {
                array,
                index,
                value,
                ..
            } => {
                count(arena, *array, uses);
                count(arena, *index, uses);
                count(arena, *value, uses);
            }
            Stmt::If {
                cond,
                then_body,
                else_body,
            } => {
                count(arena, *cond, uses);
                count_stmts(arena, then_body, uses);
                count_stmts(arena, else_body, uses);
            }
            Stmt::While { cond, body, .. } => {
                count(arena, *cond, uses);
                count_stmts(arena, body, uses);
            }
            Stmt::DoWhile { body, cond, .. } => {
                count_stmts(arena, body, uses);
                count(arena, *cond, uses);
            }
            Stmt::Switch {
                key,
                cases,
                default,
                ..
            } => {
                count(arena, *key, uses);
                for c in cases {
                    count_stmts(arena, &c.body, uses);
                }
                count_stmts(arena, default, uses);
            }
            Stmt::Try {
                body,
                catches,
                finally,
            } => {
                count_stmts(arena, body, uses);
                for c in catches {
                    count_stmts(arena, &c.body, uses);
                }
                count_stmts(arena, finally, uses);
            }
            Stmt::Labeled { body, .. } => count_stmts(arena, body, uses),
            Stmt::Return(e) => {
                if let Some(e) = e {
                    count(arena, *e, uses);
                }
            }
            Stmt::Break(_)
            | Stmt::Continue(_)
            | Stmt::Goto(_)
            | Stmt::GotoTarget(_)
            | Stmt::Comment(_) => {}
        }
    }
}

/// A node's operands are counted only on its first reference; later
/// references share the node, not fresh copies of its subtree.
fn count(arena: &ExprArena, id: ExprId, uses: &mut [u32]) {
    uses[id.0 as usize] += 1;
    if uses[id.0 as usize] == 1 {
        for op in arena.node(id).kind.operands() {
            count(arena, op, uses);
        }
    }
}

struct Emitter<'a> {
    arena: &'a ExprArena,
    uses: Vec<u32>,
    /// Shared non-movable nodes already bound to a temp name.
    hoisted: BTreeMap<ExprId, String>,
    next_temp: u32,
}

impl Emitter<'_> {
    fn stmts(&mut self, stmts: &[Stmt]) -> Vec<ast::Stmt> {
        let mut out = Vec::with_capacity(stmts.len());
        for s in stmts {
            self.stmt(s, &mut out);
        }
        out
    }

    fn stmt(&mut self, s: &Stmt, out: &mut Vec<ast::Stmt>) {
        match s {
            Stmt::Expr(e) => {
                self.hoist(*e, out);
                // The effect already ran in the temp declaration; a bare
                // variable mention is noise.
                if !self.hoisted.contains_key(e) {
                    let e = self.render(*e);
                    out.push(ast::Stmt::Expr(e));
                }
            }
            Stmt::Store { name, value, .. } => {
                self.hoist(*value, out);
                let value = self.render(*value);
                out.push(ast::Stmt::Assign {
                    target: name.clone(),
                    value,
                });
            }
            Stmt::SetTemp { id, value } => {
                self.hoist(*value, out);
                let init = self.render(*value);
                out.push(ast::Stmt::DeclareTemp {
                    name: format!("t{id}"),
                    init,
                });
            }
            Stmt::SetPhi { id, value } => {
                self.hoist(*value, out);
                let value = self.render(*value);
                out.push(ast::Stmt::Assign {
                    target: format!("phi{id}"),
                    value,
                });
            }
            Stmt::PutField { member, object, value } => {
                if let Some(o) = object {
                    self.hoist(*o, out);
                }
                self.hoist(*value, out);
                let object = object.map(|o| self.render(o));
                let value = self.render(*value);
                out.push(ast::Stmt::PutField {
                    member: member.clone(),
                    object,
                    value,
                });
            }
            Stmt::ArraySet {
                elem,
                array,
                index,
                value,
            } => {
                self.hoist(*array, out);
                self.hoist(*index, out);
                self.hoist(*value, out);
                out.push(ast::Stmt::ArraySet {
                    elem: *elem,
                    array: self.render(*array),
                    index: self.render(*index),
                    value: self.render(*value),
                });
            }
            Stmt::If {
                cond,
                then_body,
                else_body,
            } => {
                self.hoist(*cond, out);
                let cond = self.render(*cond);
                let then_body = self.stmts(then_body);
                let else_body = self.stmts(else_body);
                out.push(ast::Stmt::If {
                    cond,
                    then_body,
                    else_body,
                });
            }
            Stmt::While { label, cond, body } => {
                let cond = self.render(*cond);
                let body = self.stmts(body);
                out.push(ast::Stmt::While {
                    label: *label,
                    cond,
                    body,
                });
            }
            Stmt::DoWhile { label, body, cond } => {
                let body = self.stmts(body);
                let cond = self.render(*cond);
                out.push(ast::Stmt::DoWhile {
                    label: *label,
                    body,
                    cond,
                });
            }
            Stmt::Switch {
                label,
                key,
                cases,
                default,
            } => {
                self.hoist(*key, out);
                let key = self.render(*key);
                let cases = cases
                    .iter()
                    .map(|c| ast::SwitchCase {
                        keys: c.keys.clone(),
                        body: self.stmts(&c.body),
                        falls_through: c.falls_through,
                    })
                    .collect();
                let default = self.stmts(default);
                out.push(ast::Stmt::Switch {
                    label: *label,
                    key,
                    cases,
                    default,
                });
            }
            Stmt::Try {
                body,
                catches,
                finally,
            } => {
                let body = self.stmts(body);
                let catches = catches
                    .iter()
                    .map(|c| ast::CatchClause {
                        class: c.class.clone(),
                        binding: c.binding.clone(),
                        body: self.stmts(&c.body),
                    })
                    .collect();
                let finally = self.stmts(finally);
                out.push(ast::Stmt::Try {
                    body,
                    catches,
                    finally,
                });
            }
            Stmt::Labeled { label, body } => {
                let body = self.stmts(body);
                out.push(ast::Stmt::Labeled {
                    label: *label,
                    body,
                });
            }
            Stmt::Break(l) => out.push(ast::Stmt::Break(*l)),
            Stmt::Continue(l) => out.push(ast::Stmt::Continue(*l)),
            Stmt::Return(e) => {
                if let Some(e) = e {
                    self.hoist(*e, out);
                }
                let e = e.map(|e| self.render(e));
                out.push(ast::Stmt::Return(e));
            }
            Stmt::Throw(e) => {
                self.hoist(*e, out);
                let e = self.render(*e);
                out.push(ast::Stmt::Throw(e));
            }
            Stmt::MonitorEnter(e) => {
                self.hoist(*e, out);
                let e = self.render(*e);
                out.push(ast::Stmt::MonitorEnter(e));
            }
            Stmt::MonitorExit(e) => {
                self.hoist(*e, out);
                let e = self.render(*e);
                out.push(ast::Stmt::MonitorExit(e));
            }
            Stmt::Goto(l) => out.push(ast::Stmt::Goto(*l)),
            Stmt::GotoTarget(l) => out.push(ast::Stmt::GotoTarget(*l)),
            Stmt::Comment(c) => out.push(ast::Stmt::Comment(c.clone())),
        }
    }

    /// Bind shared non-movable nodes under `id` to declared temps, deepest
    /// first so a hoisted init only refers to earlier temps.
    fn hoist(&mut self, id: ExprId, out: &mut Vec<ast::Stmt>) {
        for op in self.arena.node(id).kind.operands() {
            self.hoist(op, out);
        }
        if self.uses[id.0 as usize] <= 1
            || self.arena.is_movable(id)
            || self.hoisted.contains_key(&id)
            || self.is_leaf(id)
        {
            return;
        }
        let name = format!("t{}", self.next_temp);
        self.next_temp += 1;
        let init = self.render_node(id);
        self.hoisted.insert(id, name.clone());
        out.push(ast::Stmt::DeclareTemp { name, init });
    }

    fn is_leaf(&self, id: ExprId) -> bool {
        matches!(
            self.arena.node(id).kind,
            ExprKind::Const(_)
                | ExprKind::Local { .. }
                | ExprKind::Temp { .. }
                | ExprKind::Phi { .. }
                | ExprKind::CaughtException
        )
    }

    fn render(&mut self, id: ExprId) -> ast::Expr {
        if let Some(name) = self.hoisted.get(&id) {
            return ast::Expr::new(
                self.arena.ty(id).clone(),
                ast::ExprKind::Var(name.clone()),
            );
        }
        self.render_node(id)
    }

    fn render_node(&mut self, id: ExprId) -> ast::Expr {
        let ty = self.arena.ty(id).clone();
        let kind = match self.arena.node(id).kind.clone() {
            ExprKind::Const(c) => ast::ExprKind::Const(c),
            ExprKind::Local { name, .. } => ast::ExprKind::Var(name),
            ExprKind::Temp { id } => ast::ExprKind::Var(format!("t{id}")),
            ExprKind::Phi { id } => ast::ExprKind::Var(format!("phi{id}")),
            ExprKind::CaughtException => ast::ExprKind::CaughtException,
            ExprKind::Binary { op, lhs, rhs } => ast::ExprKind::Binary {
                op,
                lhs: Box::new(self.render(lhs)),
                rhs: Box::new(self.render(rhs)),
            },
            ExprKind::Neg(v) => ast::ExprKind::Neg(Box::new(self.render(v))),
            ExprKind::Compare {
                op,
                on_nan,
                lhs,
                rhs,
            } => ast::ExprKind::Compare {
                op,
                on_nan,
                lhs: Box::new(self.render(lhs)),
                rhs: Box::new(self.render(rhs)),
            },
            ExprKind::ThreeWay { kind, lhs, rhs } => ast::ExprKind::ThreeWay {
                kind,
                lhs: Box::new(self.render(lhs)),
                rhs: Box::new(self.render(rhs)),
            },
            ExprKind::And(a, b) => {
                ast::ExprKind::And(Box::new(self.render(a)), Box::new(self.render(b)))
            }
            ExprKind::Or(a, b) => {
                ast::ExprKind::Or(Box::new(self.render(a)), Box::new(self.render(b)))
            }
            ExprKind::Not(v) => ast::ExprKind::Not(Box::new(self.render(v))),
            ExprKind::Cast { to, value } => ast::ExprKind::Cast {
                to,
                value: Box::new(self.render(value)),
            },
            ExprKind::InstanceOf { class, value } => ast::ExprKind::InstanceOf {
                class,
                value: Box::new(self.render(value)),
            },
            ExprKind::FieldGet { member, object } => ast::ExprKind::FieldGet {
                member,
                object: object.map(|o| Box::new(self.render(o))),
            },
            ExprKind::ArrayGet { array, index } => ast::ExprKind::ArrayGet {
                array: Box::new(self.render(array)),
                index: Box::new(self.render(index)),
            },
            ExprKind::ArrayLength(v) => ast::ExprKind::ArrayLength(Box::new(self.render(v))),
            ExprKind::Call {
                kind,
                member,
                receiver,
                args,
            } => ast::ExprKind::Call {
                kind,
                member,
                receiver: receiver.map(|r| Box::new(self.render(r))),
                args: args.into_iter().map(|a| self.render(a)).collect(),
            },
            ExprKind::NewObject { class, args } => ast::ExprKind::NewObject {
                class,
                args: args.into_iter().map(|a| self.render(a)).collect(),
            },
            // A raw allocation whose constructor never folded; render as a
            // zero-argument construction, the closest printable form.
            ExprKind::RawNew { class } => ast::ExprKind::NewObject {
                class,
                args: vec![],
            },
            ExprKind::NewArray { elem, dims } => ast::ExprKind::NewArray {
                elem,
                dims: dims.into_iter().map(|d| self.render(d)).collect(),
            },
        };
        ast::Expr::new(ty, kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jdec_classfile::{JvmType, MemberRef};
    use jdec_ir::expr::Constant;
    use jdec_ir::insn::{ArithOp, InvokeKind};

    fn call(arena: &mut ExprArena) -> ExprId {
        arena.push(
            ExprKind::Call {
                kind: InvokeKind::Static,
                member: MemberRef::new("T", "next", "()I"),
                receiver: None,
                args: vec![],
            },
            JvmType::Int,
        )
    }

    #[test]
    fn store_renders_owned_tree() {
        let mut arena = ExprArena::new();
        let a = arena.push(
            ExprKind::Local {
                slot: 0,
                name: "a0".into(),
            },
            JvmType::Int,
        );
        let one = arena.int_const(1);
        let sum = arena.push(ExprKind::Binary { op: ArithOp::Add, lhs: a, rhs: one }, JvmType::Int);
        let body = vec![Stmt::Store {
            slot: 1,
            name: "v1".into(),
            value: sum,
        }];
        let out = emit_body(&arena, &body);
        assert_eq!(out.len(), 1);
        match &out[0] {
            ast::Stmt::Assign { target, value } => {
                assert_eq!(target, "v1");
                assert!(matches!(value.kind, ast::ExprKind::Binary { .. }));
            }
            other => panic!("expected assign, got {other:?}"),
        }
    }

    #[test]
    fn shared_call_is_hoisted_once() {
        let mut arena = ExprArena::new();
        let c = call(&mut arena);
        let body = vec![
            Stmt::Store {
                slot: 1,
                name: "v1".into(),
                value: c,
            },
            Stmt::Store {
                slot: 2,
                name: "v2".into(),
                value: c,
            },
        ];
        let out = emit_body(&arena, &body);
        assert_eq!(out.len(), 3);
        let ast::Stmt::DeclareTemp { name, init } = &out[0] else {
            panic!("expected temp declaration, got {:?}", out[0]);
        };
        assert!(matches!(init.kind, ast::ExprKind::Call { .. }));
        for s in &out[1..] {
            let ast::Stmt::Assign { value, .. } = s else {
                panic!("expected assign, got {s:?}");
            };
            assert_eq!(value.kind, ast::ExprKind::Var(name.clone()));
        }
    }

    #[test]
    fn shared_pure_value_is_duplicated() {
        let mut arena = ExprArena::new();
        let a = arena.push(
            ExprKind::Local {
                slot: 0,
                name: "a0".into(),
            },
            JvmType::Int,
        );
        let sq = arena.push(
            ExprKind::Binary {
                op: ArithOp::Mul,
                lhs: a,
                rhs: a,
            },
            JvmType::Int,
        );
        let body = vec![
            Stmt::Store {
                slot: 1,
                name: "v1".into(),
                value: sq,
            },
            Stmt::Store {
                slot: 2,
                name: "v2".into(),
                value: sq,
            },
        ];
        let out = emit_body(&arena, &body);
        assert_eq!(out.len(), 2);
        assert!(out
            .iter()
            .all(|s| matches!(s, ast::Stmt::Assign { value, .. }
                if matches!(value.kind, ast::ExprKind::Binary { .. }))));
    }

    #[test]
    fn interpreter_temps_become_declarations() {
        let mut arena = ExprArena::new();
        let c = call(&mut arena);
        let t = arena.push(ExprKind::Temp { id: 0 }, JvmType::Int);
        let body = vec![
            Stmt::SetTemp { id: 0, value: c },
            Stmt::Return(Some(t)),
        ];
        let out = emit_body(&arena, &body);
        assert_eq!(out.len(), 2);
        assert!(matches!(
            &out[0],
            ast::Stmt::DeclareTemp { name, .. } if name == "t0"
        ));
        match &out[1] {
            ast::Stmt::Return(Some(e)) => {
                assert_eq!(e.kind, ast::ExprKind::Var("t0".into()));
            }
            other => panic!("expected return, got {other:?}"),
        }
    }

    #[test]
    fn hoisted_names_do_not_collide_with_interpreter_temps() {
        let mut arena = ExprArena::new();
        let c = call(&mut arena);
        let t = arena.push(ExprKind::Temp { id: 3 }, JvmType::Int);
        let body = vec![
            Stmt::SetTemp { id: 3, value: c },
            Stmt::Store {
                slot: 1,
                name: "v1".into(),
                value: t,
            },
        ];
        let mut e = Emitter {
            arena: &arena,
            uses: vec![0; arena.len()],
            hoisted: BTreeMap::new(),
            next_temp: first_free_temp(&arena),
        };
        assert_eq!(e.next_temp, 4);
        let _ = e.stmts(&body);
    }

    #[test]
    fn nan_flag_survives_to_the_output_tree() {
        use jdec_ir::expr::{CmpOp, OnNan};
        let mut arena = ExprArena::new();
        let a = arena.push(
            ExprKind::Local {
                slot: 0,
                name: "a0".into(),
            },
            JvmType::Float,
        );
        let zero = arena.push(ExprKind::Const(Constant::Float(0.0)), JvmType::Float);
        let cmp = arena.push(
            ExprKind::Compare {
                op: CmpOp::Lt,
                on_nan: Some(OnNan::IsFalse),
                lhs: a,
                rhs: zero,
            },
            JvmType::Boolean,
        );
        let body = vec![Stmt::If {
            cond: cmp,
            then_body: vec![Stmt::Return(None)],
            else_body: vec![],
        }];
        let out = emit_body(&arena, &body);
        match &out[0] {
            ast::Stmt::If { cond, .. } => {
                assert!(matches!(
                    cond.kind,
                    ast::ExprKind::Compare {
                        on_nan: Some(OnNan::IsFalse),
                        ..
                    }
                ));
            }
            other => panic!("expected if, got {other:?}"),
        }
    }
}

use jdec_classfile::{
    ClassModel, ExceptionTableEntry, MemberRef, MethodFlags, MethodModel, PoolEntry,
};
use jdec_ir::ast::{self, Expr, ExprKind, Stmt, Visitor};
use jdec_ir::expr::OnNan;

/// Class model with pool slot 1 holding a static `tick()V` member.
///
/// Also wires the pipeline's log output into the test harness, so
/// `RUST_LOG=debug cargo test` shows per-method decisions.
pub fn fixture_class() -> ClassModel {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut class = ClassModel::new("com/example/Fixture");
    class.push_pool(PoolEntry::Member(MemberRef::new(
        "com/example/Fixture",
        "tick",
        "()V",
    )));
    class
}

pub fn static_method(name: &str, descriptor: &str, code: Vec<u8>) -> MethodModel {
    MethodModel::new(name, MethodFlags::STATIC, descriptor, code).expect("valid descriptor")
}

pub fn entry(
    start: u32,
    end: u32,
    handler: u32,
    class: Option<&str>,
) -> ExceptionTableEntry {
    ExceptionTableEntry {
        start_pc: start,
        end_pc: end,
        handler_pc: handler,
        catch_type: class.map(String::from),
    }
}

/// Depth-first visit of every statement in the tree.
pub fn each_stmt(body: &[Stmt], f: &mut dyn FnMut(&Stmt)) {
    struct V<'a>(&'a mut dyn FnMut(&Stmt));
    impl Visitor for V<'_> {
        fn visit_stmt(&mut self, s: &Stmt) {
            (self.0)(s);
            ast::walk_stmt(self, s);
        }
    }
    ast::walk_stmts(&mut V(f), body);
}

pub fn count_stmts(body: &[Stmt], pred: impl Fn(&Stmt) -> bool) -> usize {
    let mut n = 0;
    each_stmt(body, &mut |s| {
        if pred(s) {
            n += 1;
        }
    });
    n
}

/// NaN-ordering flags of every comparison in the tree, in visit order.
pub fn nan_flags(body: &[Stmt]) -> Vec<OnNan> {
    struct V(Vec<OnNan>);
    impl Visitor for V {
        fn visit_expr(&mut self, e: &Expr) {
            if let ExprKind::Compare {
                on_nan: Some(flag), ..
            } = &e.kind
            {
                self.0.push(*flag);
            }
            ast::walk_expr(self, e);
        }
    }
    let mut v = V(Vec::new());
    ast::walk_stmts(&mut v, body);
    v.0
}

//! End-to-end reconstruction over hand-assembled code attributes.

mod common;

use common::{count_stmts, each_stmt, entry, fixture_class, nan_flags, static_method};
use jdec_decompiler::{decompile_class, Fault, Limits};
use jdec_ir::ast::{ExprKind, Stmt};
use jdec_ir::insn::ArrayKind;
use jdec_opcode::op;

/// javac's try/finally shape: the finally body is inlined before the normal
/// exit, and the catch-any handler re-raises after its own copy.
///
///     0: iconst_0          try { v1 = 0; }
///     1: istore_1
///     2: iinc 2, 1         inlined finally copy
///     5: goto 14
///     8: astore_3          handler: canonical finally copy
///     9: iinc 2, 1
///    12: aload_3
///    13: athrow
///    14: return
fn try_finally_method() -> jdec_classfile::MethodModel {
    static_method(
        "run",
        "()V",
        vec![
            op::ICONST_0,
            op::ISTORE_1,
            op::IINC,
            0x02,
            0x01,
            op::GOTO,
            0x00,
            0x09,
            op::ASTORE_3,
            op::IINC,
            0x02,
            0x01,
            op::ALOAD_3,
            op::ATHROW,
            op::RETURN,
        ],
    )
    .with_exception_table(vec![entry(0, 2, 8, None)])
    .expect("valid table")
}

fn fcmp_method(name: &str, cmp: u8) -> jdec_classfile::MethodModel {
    // (a cmp b) >= 0 ? 1 : 0, branching at offset 3 over the iconst_1/ireturn.
    static_method(
        name,
        "(FF)I",
        vec![
            op::FLOAD_0,
            op::FLOAD_1,
            cmp,
            op::IFGE,
            0x00,
            0x05,
            op::ICONST_1,
            op::IRETURN,
            op::ICONST_0,
            op::IRETURN,
        ],
    )
}

#[test]
fn try_finally_merges_into_one_statement() {
    let mut class = fixture_class();
    class.methods.push(try_finally_method());
    let out = decompile_class(&class, &Limits::default());
    let m = &out[0];

    assert!(m.diagnostics.is_empty(), "unexpected: {:?}", m.diagnostics);
    assert_eq!(m.body.len(), 2, "body: {:#?}", m.body);
    match &m.body[0] {
        Stmt::Try {
            body,
            catches,
            finally,
        } => {
            assert!(catches.is_empty());
            assert!(body
                .iter()
                .any(|s| matches!(s, Stmt::Assign { target, .. } if target == "v1")));
            // One canonical finally body; the inlined duplicate is gone.
            assert_eq!(finally.len(), 1);
            assert!(matches!(&finally[0], Stmt::Assign { target, .. } if target == "v2"));
        }
        other => panic!("expected try, got {other:?}"),
    }
    assert_eq!(m.body[1], Stmt::Return(None));
}

#[test]
fn fcmpl_and_fcmpg_stay_distinct_in_the_output() {
    let mut class = fixture_class();
    class.methods.push(fcmp_method("lt", op::FCMPL));
    class.methods.push(fcmp_method("gt", op::FCMPG));
    let out = decompile_class(&class, &Limits::default());

    let l = nan_flags(&out[0].body);
    let g = nan_flags(&out[1].body);
    assert_eq!(l.len(), 1, "body: {:#?}", out[0].body);
    assert_eq!(g.len(), 1, "body: {:#?}", out[1].body);
    assert_ne!(l[0], g[0]);
}

#[test]
fn malformed_branch_stubs_only_the_broken_method() {
    let mut class = fixture_class();
    // goto into the middle of itself.
    class
        .methods
        .push(static_method("broken", "()V", vec![op::GOTO, 0x00, 0x01, op::RETURN]));
    class
        .methods
        .push(static_method("fine", "()V", vec![op::RETURN]));
    let out = decompile_class(&class, &Limits::default());

    assert_eq!(out[0].diagnostics.len(), 1);
    assert!(matches!(out[0].diagnostics[0], Fault::MalformedBytecode(_)));
    assert!(matches!(out[0].body.as_slice(), [Stmt::Comment(_)]));

    assert!(out[1].diagnostics.is_empty());
    assert_eq!(out[1].body, vec![Stmt::Return(None)]);
}

#[test]
fn stack_underflow_substitutes_the_flat_form() {
    let mut class = fixture_class();
    class
        .methods
        .push(static_method("broken", "()I", vec![op::POP, op::ICONST_0, op::IRETURN]));
    class
        .methods
        .push(static_method("fine", "()V", vec![op::RETURN]));
    let out = decompile_class(&class, &Limits::default());

    assert!(out[0]
        .diagnostics
        .iter()
        .any(|d| matches!(d, Fault::StackIntegrity(_))));
    assert!(!out[0].body.is_empty());
    assert!(out[0]
        .body
        .iter()
        .any(|s| matches!(s, Stmt::Comment(_))));

    assert!(out[1].diagnostics.is_empty());
    assert_eq!(out[1].body, vec![Stmt::Return(None)]);
}

/// A conditional exit inside a protected range that leaves both the try and
/// the enclosing loop must come out as a plain `break`, not a goto.
///
///     0: iload_0            while (a0 != 0) {
///     1: ifeq 20
///     4: iload_1              try { if (a1 != 0) break; tick(); }
///     5: ifne 20
///     8: invokestatic #1
///    11: goto 0
///    14: astore_2             catch (Exception v2) { v2 = 1; }
///    15: iconst_1
///    16: istore_2
///    17: goto 0             }
///    20: return
#[test]
fn break_out_of_a_try_stays_a_break() {
    let mut class = fixture_class();
    let method = static_method(
        "run",
        "(II)V",
        vec![
            op::ILOAD_0,
            op::IFEQ,
            0x00,
            0x13,
            op::ILOAD_1,
            op::IFNE,
            0x00,
            0x0f,
            op::INVOKESTATIC,
            0x00,
            0x01,
            op::GOTO,
            0xff,
            0xf5,
            op::ASTORE_2,
            op::ICONST_1,
            op::ISTORE_2,
            op::GOTO,
            0xff,
            0xef,
            op::RETURN,
        ],
    )
    .with_exception_table(vec![entry(4, 11, 14, Some("java/lang/Exception"))])
    .expect("valid table");
    class.methods.push(method);

    let out = decompile_class(&class, &Limits::default());
    let m = &out[0];
    assert!(m.diagnostics.is_empty(), "unexpected: {:?}", m.diagnostics);
    assert_eq!(count_stmts(&m.body, |s| matches!(s, Stmt::Goto(_))), 0);
    assert_eq!(count_stmts(&m.body, |s| matches!(s, Stmt::While { .. })), 1);
    assert_eq!(count_stmts(&m.body, |s| matches!(s, Stmt::Break(None))), 1);

    let mut catch_ok = false;
    each_stmt(&m.body, &mut |s| {
        if let Stmt::Try { body, catches, .. } = s {
            assert!(
                body.iter()
                    .any(|s| matches!(s, Stmt::If { then_body, .. }
                        if then_body.contains(&Stmt::Break(None)))),
                "try body: {body:#?}"
            );
            assert_eq!(catches.len(), 1);
            assert_eq!(catches[0].class.as_deref(), Some("java/lang/Exception"));
            catch_ok = true;
        }
    });
    assert!(catch_ok, "no try emitted: {:#?}", m.body);
}

/// `aastore` lowers to a store statement at its own program point; the
/// element type check the VM would do at runtime is not materialized.
#[test]
fn aastore_is_a_plain_store_statement() {
    let mut class = fixture_class();
    class.methods.push(static_method(
        "put",
        "(Ljava/lang/Object;[Ljava/lang/Object;)V",
        vec![op::ALOAD_1, op::ICONST_0, op::ALOAD_0, op::AASTORE, op::RETURN],
    ));
    let out = decompile_class(&class, &Limits::default());
    let m = &out[0];

    assert!(m.diagnostics.is_empty());
    match &m.body[0] {
        Stmt::ArraySet {
            elem,
            array,
            value,
            ..
        } => {
            assert_eq!(*elem, ArrayKind::Ref);
            assert_eq!(array.kind, ExprKind::Var("a1".into()));
            assert_eq!(value.kind, ExprKind::Var("a0".into()));
        }
        other => panic!("expected array store first, got {other:?}"),
    }
    assert_eq!(m.body[1], Stmt::Return(None));
}

#[test]
fn block_limit_breach_substitutes_the_flat_form() {
    let mut class = fixture_class();
    // Two basic blocks: the conditional branch and the shared return.
    class.methods.push(static_method(
        "busy",
        "(I)V",
        vec![op::ILOAD_0, op::IFEQ, 0x00, 0x03, op::RETURN],
    ));
    class
        .methods
        .push(static_method("fine", "()V", vec![op::RETURN]));

    let limits = Limits {
        max_blocks: 1,
        ..Limits::default()
    };
    let out = decompile_class(&class, &limits);

    assert_eq!(out[0].diagnostics.len(), 1);
    assert!(matches!(out[0].diagnostics[0], Fault::LimitExceeded(_)));
    assert!(!out[0].body.is_empty(), "flat body expected: {:#?}", out[0].body);

    // A method under the ceiling is untouched by its sibling's breach.
    assert!(out[1].diagnostics.is_empty());
    assert_eq!(out[1].body, vec![Stmt::Return(None)]);
}

#[test]
fn interpreter_pass_limit_breach_substitutes_the_flat_form() {
    let mut class = fixture_class();
    class.methods.push(static_method(
        "busy",
        "(I)V",
        vec![op::ILOAD_0, op::IFEQ, 0x00, 0x03, op::RETURN],
    ));

    let limits = Limits {
        max_interp_passes: 1,
        ..Limits::default()
    };
    let out = decompile_class(&class, &limits);

    assert_eq!(out[0].diagnostics.len(), 1);
    assert!(matches!(out[0].diagnostics[0], Fault::LimitExceeded(_)));
    assert!(!out[0].body.is_empty(), "flat body expected: {:#?}", out[0].body);
}

#[test]
fn repeated_runs_produce_identical_trees() {
    let mut class = fixture_class();
    class.methods.push(try_finally_method());
    class.methods.push(fcmp_method("lt", op::FCMPL));
    class
        .methods
        .push(static_method("broken", "()I", vec![op::POP, op::IRETURN]));

    let a = decompile_class(&class, &Limits::default());
    let b = decompile_class(&class, &Limits::default());
    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(&b) {
        assert_eq!(x.name, y.name);
        assert_eq!(x.body, y.body);
        assert_eq!(x.diagnostics, y.diagnostics);
    }
}

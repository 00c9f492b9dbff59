use jdec_classfile::MemberRef;

use crate::expr::ExprId;
use crate::insn::ArrayKind;

/// Label for loops, labeled blocks, and synthesized gotos.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label(pub u32);

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// One catch clause of a structured try.
#[derive(Debug, Clone, PartialEq)]
pub struct CatchClause {
    /// Declared exception class; `None` only in a degenerate catch-any
    /// that could not be proven to be a finally.
    pub class: Option<String>,
    /// Name bound to the caught value.
    pub binding: String,
    pub body: Vec<Stmt>,
}

/// One case of a structured switch; adjacent cases may fall through.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    pub keys: Vec<i32>,
    pub body: Vec<Stmt>,
    /// Whether control falls into the next case (no break).
    pub falls_through: bool,
}

/// Structured statement tree over the expression DAG.
///
/// Every CFG block lowers into exactly one statement's body; the structured
/// control edges are a sound rewriting of the original edges, with
/// break/continue/goto as the only synthesized transfers.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// Evaluate for effect.
    Expr(ExprId),
    /// Assignment to a local slot.
    Store {
        slot: u16,
        name: String,
        value: ExprId,
    },
    /// Assignment to a hoisted temporary.
    SetTemp { id: u32, value: ExprId },
    /// Assignment materializing a merge placeholder in a predecessor.
    SetPhi { id: u32, value: ExprId },
    PutField {
        member: MemberRef,
        /// `None` for static fields.
        object: Option<ExprId>,
        value: ExprId,
    },
    ArraySet {
        elem: ArrayKind,
        array: ExprId,
        index: ExprId,
        value: ExprId,
    },
    If {
        cond: ExprId,
        then_body: Vec<Stmt>,
        else_body: Vec<Stmt>,
    },
    While {
        label: Option<Label>,
        cond: ExprId,
        body: Vec<Stmt>,
    },
    DoWhile {
        label: Option<Label>,
        body: Vec<Stmt>,
        cond: ExprId,
    },
    Switch {
        label: Option<Label>,
        key: ExprId,
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
    Return(Option<ExprId>),
    Throw(ExprId),
    MonitorEnter(ExprId),
    MonitorExit(ExprId),
    /// Synthesized goto for irreducible regions; always paired with a
    /// `GotoTarget` marker in the flat lowering. First-class, not an error.
    Goto(Label),
    GotoTarget(Label),
    /// Stub emitted for a method whose reconstruction was abandoned.
    Comment(String),
}

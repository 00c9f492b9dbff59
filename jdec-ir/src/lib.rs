//! Method-level intermediate representation for bytecode reconstruction.
//!
//! Everything here is built once per method and read-only afterwards:
//! the decoded instruction stream, the control-flow graph, the expression
//! DAG (an arena of nodes addressed by integer ids), the structured
//! statement tree, and the printer-facing output AST.

pub mod ast;
pub mod cfg;
pub mod expr;
pub mod insn;
pub mod stmt;

use thiserror::Error;

/// Fault taxonomy for one method's reconstruction.
///
/// Faults never escape the method being processed: `MalformedBytecode`
/// yields a stub, the others substitute the flat goto-per-instruction
/// lowering. `UnreducibleControlFlow` is a recognized, handled case, kept
/// in the taxonomy so fixture runs can track it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Fault {
    #[error("malformed bytecode: {0}")]
    MalformedBytecode(String),

    #[error("stack integrity: {0}")]
    StackIntegrity(String),

    #[error("irreducible control flow: {0} region(s) lowered to goto form")]
    UnreducibleControlFlow(usize),

    #[error("unsupported construct: {0}")]
    UnsupportedConstruct(String),

    #[error("limit exceeded: {0}")]
    LimitExceeded(String),
}

impl From<jdec_opcode::Error> for Fault {
    fn from(e: jdec_opcode::Error) -> Fault {
        Fault::MalformedBytecode(e.to_string())
    }
}

impl From<jdec_ir::cfg::CfgError> for Fault {
    fn from(e: jdec_ir::cfg::CfgError) -> Fault {
        Fault::MalformedBytecode(e.to_string())
    }
}

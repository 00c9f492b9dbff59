//! Bytecode-to-source reconstruction core.
//!
//! The pipeline per method: decode the code attribute into symbolic
//! instructions, build the CFG, run the abstract stack interpreter to get an
//! expression DAG plus per-block statements, recover try/catch/finally
//! regions from the exception table, structure the control flow, and emit
//! the printer-facing AST.
//!
//! Faults are contained per method. Malformed bytecode yields a comment
//! stub; every other fault substitutes the flat label/goto lowering, so one
//! broken method never takes down the rest of the class.

pub mod decode;
pub mod diag;
pub mod emit;
pub mod exceptions;
pub mod fallback;
pub mod interp;
pub mod structuring;

use rayon::prelude::*;

use jdec_classfile::{ClassModel, MethodDescriptor, MethodModel, TypeHierarchy};
use jdec_ir::ast;
use jdec_ir::cfg::Cfg;

pub use diag::Fault;

/// Resource ceilings for one method's reconstruction.
///
/// A breach is not an error: the method is lowered to flat goto form and a
/// [`Fault::LimitExceeded`] diagnostic is recorded.
#[derive(Debug, Clone)]
pub struct Limits {
    pub max_blocks: usize,
    pub max_interp_passes: u32,
}

impl Default for Limits {
    fn default() -> Limits {
        Limits {
            max_blocks: 8192,
            max_interp_passes: 50_000,
        }
    }
}

/// Reconstruction result for one method. Always produced, fault or not.
#[derive(Debug)]
pub struct MethodOutcome {
    pub name: String,
    pub descriptor: MethodDescriptor,
    pub body: Vec<ast::Stmt>,
    pub diagnostics: Vec<Fault>,
}

/// Reconstruct every method of a class, in method-table order.
///
/// Methods are independent once the class model and hierarchy are built, so
/// they run on the rayon pool; the indexed collect keeps the output order
/// deterministic.
pub fn decompile_class(class: &ClassModel, limits: &Limits) -> Vec<MethodOutcome> {
    let mut hierarchy = TypeHierarchy::new();
    if let Some(super_name) = &class.super_name {
        hierarchy.add_class(class.name.clone(), super_name.clone(), class.interfaces.clone());
    }
    class
        .methods
        .par_iter()
        .map(|m| decompile_method(class, &hierarchy, m, limits))
        .collect()
}

/// Reconstruct one method body.
pub fn decompile_method(
    class: &ClassModel,
    hierarchy: &TypeHierarchy,
    method: &MethodModel,
    limits: &Limits,
) -> MethodOutcome {
    let mut diagnostics = Vec::new();
    let body = reconstruct(class, hierarchy, method, limits, &mut diagnostics);
    MethodOutcome {
        name: method.name.clone(),
        descriptor: method.descriptor.clone(),
        body,
        diagnostics,
    }
}

fn reconstruct(
    class: &ClassModel,
    hierarchy: &TypeHierarchy,
    method: &MethodModel,
    limits: &Limits,
    diagnostics: &mut Vec<Fault>,
) -> Vec<ast::Stmt> {
    // Abstract and native methods carry no code attribute.
    if method.code.is_empty() {
        return Vec::new();
    }

    let instructions = match decode::decode_method(&method.code, class) {
        Ok(i) => i,
        Err(fault) => return stub(class, method, fault, diagnostics),
    };

    let cfg = match Cfg::build(&instructions, &method.exception_table) {
        Ok(cfg) => cfg,
        Err(e) => return stub(class, method, Fault::from(e), diagnostics),
    };

    if cfg.blocks.len() > limits.max_blocks {
        let fault = Fault::LimitExceeded(format!(
            "{} basic blocks (limit {})",
            cfg.blocks.len(),
            limits.max_blocks
        ));
        return flat(class, method, &instructions, fault, diagnostics);
    }

    let mut interp =
        match interp::interpret(hierarchy, method, &cfg, &instructions, limits.max_interp_passes) {
            Ok(r) => r,
            // Undecodable operands surface here too (the decoder is lazy
            // about pool-type mismatches); those get a stub like any other
            // malformed input. Everything else is a broken stack model, and
            // the flat lowering still renders it faithfully.
            Err(fault @ Fault::MalformedBytecode(_)) => {
                return stub(class, method, fault, diagnostics)
            }
            Err(fault) => return flat(class, method, &instructions, fault, diagnostics),
        };

    let regions = exceptions::structure_exceptions(&instructions, &method.exception_table);
    let structured =
        structuring::structure_method(&cfg, &mut interp.arena, &interp.blocks, &regions);
    if structured.goto_count > 0 {
        log::info!(
            "{}.{}: {} jump(s) lowered to goto form",
            class.name,
            method.name,
            structured.goto_count
        );
        diagnostics.push(Fault::UnreducibleControlFlow(structured.goto_count));
    }
    emit::emit_body(&interp.arena, &structured.body)
}

/// A method whose bytecode could not even be decoded gets a one-line stub.
fn stub(
    class: &ClassModel,
    method: &MethodModel,
    fault: Fault,
    diagnostics: &mut Vec<Fault>,
) -> Vec<ast::Stmt> {
    log::warn!("{}.{}: {fault}", class.name, method.name);
    let body = vec![ast::Stmt::Comment(format!("could not reconstruct: {fault}"))];
    diagnostics.push(fault);
    body
}

/// Substitute the flat label/goto lowering after a fault past decode.
fn flat(
    class: &ClassModel,
    method: &MethodModel,
    instructions: &[jdec_ir::insn::Instruction],
    fault: Fault,
    diagnostics: &mut Vec<Fault>,
) -> Vec<ast::Stmt> {
    log::warn!(
        "{}.{}: {fault}; emitting flat goto form",
        class.name,
        method.name
    );
    diagnostics.push(fault);
    fallback::lower_flat(method, instructions)
}

//! JVM instruction-set tables.
//!
//! This crate provides opcode constants, mnemonics, per-opcode flag bits,
//! and instruction length computation for the JVM bytecode instruction set,
//! including the `wide` prefix and the pad-aligned switch forms.

pub mod op;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Unknown opcode {0:#04x} at pc {1:#x}")]
    UnknownOpcode(u8, usize),

    #[error("Instruction at pc {0:#x} runs past end of code ({1} bytes)")]
    TruncatedInstruction(usize, usize),

    #[error("wide prefix at pc {0:#x} modifies unsupported opcode {1:#04x}")]
    BadWideTarget(usize, u8),
}

pub type Result<T> = std::result::Result<T, Error>;

bitflags::bitflags! {
    /// Classification bits for one opcode.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpcodeFlags: u8 {
        /// Transfers control to an explicit target.
        const JUMP        = 1 << 0;
        /// Jump that may also fall through.
        const CONDITIONAL = 1 << 1;
        /// Multi-way dispatch (tableswitch / lookupswitch).
        const SWITCH      = 1 << 2;
        /// Leaves the method normally.
        const RETURN      = 1 << 3;
        /// athrow.
        const THROW       = 1 << 4;
        /// Observable side effect (invoke, store to heap, monitor, new).
        const EFFECT      = 1 << 5;
    }
}

/// Fixed byte length of each opcode, 0 for variable-length or invalid.
const LENGTHS: [u8; 256] = build_length_table();

const fn build_length_table() -> [u8; 256] {
    let mut t = [0u8; 256];
    let mut i = 0;
    while i <= op::JSR_W as usize {
        t[i] = 1;
        i += 1;
    }
    let two: &[u8] = &[
        op::BIPUSH, op::LDC, op::ILOAD, op::LLOAD, op::FLOAD, op::DLOAD, op::ALOAD,
        op::ISTORE, op::LSTORE, op::FSTORE, op::DSTORE, op::ASTORE, op::RET,
        op::NEWARRAY,
    ];
    let mut j = 0;
    while j < two.len() {
        t[two[j] as usize] = 2;
        j += 1;
    }
    let three: &[u8] = &[
        op::SIPUSH, op::LDC_W, op::LDC2_W, op::IINC,
        op::IFEQ, op::IFNE, op::IFLT, op::IFGE, op::IFGT, op::IFLE,
        op::IF_ICMPEQ, op::IF_ICMPNE, op::IF_ICMPLT, op::IF_ICMPGE,
        op::IF_ICMPGT, op::IF_ICMPLE, op::IF_ACMPEQ, op::IF_ACMPNE,
        op::GOTO, op::JSR, op::IFNULL, op::IFNONNULL,
        op::GETSTATIC, op::PUTSTATIC, op::GETFIELD, op::PUTFIELD,
        op::INVOKEVIRTUAL, op::INVOKESPECIAL, op::INVOKESTATIC,
        op::NEW, op::ANEWARRAY, op::CHECKCAST, op::INSTANCEOF,
    ];
    j = 0;
    while j < three.len() {
        t[three[j] as usize] = 3;
        j += 1;
    }
    t[op::MULTIANEWARRAY as usize] = 4;
    t[op::INVOKEINTERFACE as usize] = 5;
    t[op::INVOKEDYNAMIC as usize] = 5;
    t[op::GOTO_W as usize] = 5;
    t[op::JSR_W as usize] = 5;
    // Variable-length forms.
    t[op::WIDE as usize] = 0;
    t[op::TABLESWITCH as usize] = 0;
    t[op::LOOKUPSWITCH as usize] = 0;
    t
}

/// Whether this byte is a defined JVM opcode.
pub fn is_defined(opcode: u8) -> bool {
    opcode <= op::JSR_W
}

/// Total byte length of the instruction starting at `pc` in `code`.
///
/// `pc` matters for the switch forms, whose operands are padded to a
/// 4-byte boundary relative to the start of the code array.
pub fn insn_len(code: &[u8], pc: usize) -> Result<usize> {
    let opcode = *code
        .get(pc)
        .ok_or(Error::TruncatedInstruction(pc, code.len()))?;
    let len = match opcode {
        op::WIDE => {
            let modified = *code
                .get(pc + 1)
                .ok_or(Error::TruncatedInstruction(pc, code.len()))?;
            match modified {
                op::IINC => 6,
                op::ILOAD | op::LLOAD | op::FLOAD | op::DLOAD | op::ALOAD | op::ISTORE
                | op::LSTORE | op::FSTORE | op::DSTORE | op::ASTORE | op::RET => 4,
                other => return Err(Error::BadWideTarget(pc, other)),
            }
        }
        op::TABLESWITCH => {
            let base = pc + 1 + pad_after(pc);
            let lo = read_i32(code, base + 4)?;
            let hi = read_i32(code, base + 8)?;
            if hi < lo {
                return Err(Error::TruncatedInstruction(pc, code.len()));
            }
            let entries = (hi as i64 - lo as i64 + 1) as usize;
            base + 12 + entries * 4 - pc
        }
        op::LOOKUPSWITCH => {
            let base = pc + 1 + pad_after(pc);
            let npairs = read_i32(code, base + 4)?;
            if npairs < 0 {
                return Err(Error::TruncatedInstruction(pc, code.len()));
            }
            base + 8 + npairs as usize * 8 - pc
        }
        other => {
            let l = LENGTHS[other as usize];
            if l == 0 {
                return Err(Error::UnknownOpcode(other, pc));
            }
            l as usize
        }
    };
    if pc + len > code.len() {
        return Err(Error::TruncatedInstruction(pc, code.len()));
    }
    Ok(len)
}

/// Pad bytes between a switch opcode at `pc` and its 4-aligned operands.
pub fn pad_after(pc: usize) -> usize {
    3 - (pc % 4)
}

fn read_i32(code: &[u8], at: usize) -> Result<i32> {
    let b = code
        .get(at..at + 4)
        .ok_or(Error::TruncatedInstruction(at, code.len()))?;
    Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

/// Classification flags for one opcode.
pub fn flags(opcode: u8) -> OpcodeFlags {
    use OpcodeFlags as F;
    match opcode {
        op::GOTO | op::GOTO_W | op::JSR | op::JSR_W => F::JUMP,
        op::IFEQ..=op::IF_ACMPNE | op::IFNULL | op::IFNONNULL => F::JUMP.union(F::CONDITIONAL),
        op::TABLESWITCH | op::LOOKUPSWITCH => F::SWITCH,
        op::IRETURN..=op::RETURN => F::RETURN,
        op::ATHROW => F::THROW,
        op::INVOKEVIRTUAL..=op::INVOKEDYNAMIC
        | op::PUTFIELD
        | op::PUTSTATIC
        | op::IASTORE..=op::SASTORE
        | op::NEW
        | op::MONITORENTER
        | op::MONITOREXIT => F::EFFECT,
        _ => F::empty(),
    }
}

/// Mnemonic for one opcode, or `"<reserved>"` for undefined bytes.
pub fn mnemonic(opcode: u8) -> &'static str {
    MNEMONICS.get(opcode as usize).copied().unwrap_or("<reserved>")
}

#[rustfmt::skip]
const MNEMONICS: [&str; 202] = [
    "nop", "aconst_null", "iconst_m1", "iconst_0", "iconst_1", "iconst_2",
    "iconst_3", "iconst_4", "iconst_5", "lconst_0", "lconst_1", "fconst_0",
    "fconst_1", "fconst_2", "dconst_0", "dconst_1", "bipush", "sipush", "ldc",
    "ldc_w", "ldc2_w", "iload", "lload", "fload", "dload", "aload", "iload_0",
    "iload_1", "iload_2", "iload_3", "lload_0", "lload_1", "lload_2",
    "lload_3", "fload_0", "fload_1", "fload_2", "fload_3", "dload_0",
    "dload_1", "dload_2", "dload_3", "aload_0", "aload_1", "aload_2",
    "aload_3", "iaload", "laload", "faload", "daload", "aaload", "baload",
    "caload", "saload", "istore", "lstore", "fstore", "dstore", "astore",
    "istore_0", "istore_1", "istore_2", "istore_3", "lstore_0", "lstore_1",
    "lstore_2", "lstore_3", "fstore_0", "fstore_1", "fstore_2", "fstore_3",
    "dstore_0", "dstore_1", "dstore_2", "dstore_3", "astore_0", "astore_1",
    "astore_2", "astore_3", "iastore", "lastore", "fastore", "dastore",
    "aastore", "bastore", "castore", "sastore", "pop", "pop2", "dup",
    "dup_x1", "dup_x2", "dup2", "dup2_x1", "dup2_x2", "swap", "iadd", "ladd",
    "fadd", "dadd", "isub", "lsub", "fsub", "dsub", "imul", "lmul", "fmul",
    "dmul", "idiv", "ldiv", "fdiv", "ddiv", "irem", "lrem", "frem", "drem",
    "ineg", "lneg", "fneg", "dneg", "ishl", "lshl", "ishr", "lshr", "iushr",
    "lushr", "iand", "land", "ior", "lor", "ixor", "lxor", "iinc", "i2l",
    "i2f", "i2d", "l2i", "l2f", "l2d", "f2i", "f2l", "f2d", "d2i", "d2l",
    "d2f", "i2b", "i2c", "i2s", "lcmp", "fcmpl", "fcmpg", "dcmpl", "dcmpg",
    "ifeq", "ifne", "iflt", "ifge", "ifgt", "ifle", "if_icmpeq", "if_icmpne",
    "if_icmplt", "if_icmpge", "if_icmpgt", "if_icmple", "if_acmpeq",
    "if_acmpne", "goto", "jsr", "ret", "tableswitch", "lookupswitch",
    "ireturn", "lreturn", "freturn", "dreturn", "areturn", "return",
    "getstatic", "putstatic", "getfield", "putfield", "invokevirtual",
    "invokespecial", "invokestatic", "invokeinterface", "invokedynamic",
    "new", "newarray", "anewarray", "arraylength", "athrow", "checkcast",
    "instanceof", "monitorenter", "monitorexit", "wide", "multianewarray",
    "ifnull", "ifnonnull", "goto_w", "jsr_w",
];

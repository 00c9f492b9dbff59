use jdec_classfile::{ConstValue, JvmType, MemberRef};

/// Arithmetic value category (the type suffix of `iadd`, `dmul`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimType {
    Int,
    Long,
    Float,
    Double,
}

impl PrimType {
    pub fn jvm_type(self) -> JvmType {
        match self {
            PrimType::Int => JvmType::Int,
            PrimType::Long => JvmType::Long,
            PrimType::Float => JvmType::Float,
            PrimType::Double => JvmType::Double,
        }
    }
}

/// Load/store slot category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotType {
    Int,
    Long,
    Float,
    Double,
    Ref,
}

/// Array element category (`iaload` vs `baload` vs `aaload` ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayKind {
    Int,
    Long,
    Float,
    Double,
    Ref,
    Byte,
    Char,
    Short,
}

impl ArrayKind {
    /// Type of the loaded value once on the operand stack.
    pub fn stack_type(self) -> JvmType {
        match self {
            ArrayKind::Int | ArrayKind::Byte | ArrayKind::Char | ArrayKind::Short => JvmType::Int,
            ArrayKind::Long => JvmType::Long,
            ArrayKind::Float => JvmType::Float,
            ArrayKind::Double => JvmType::Double,
            ArrayKind::Ref => JvmType::object(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    Ushr,
    And,
    Or,
    Xor,
}

/// Untyped stack manipulation. The dup/pop family operates on slot
/// *categories*: a `dup2` duplicates one category-2 value or two
/// category-1 values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackOp {
    Pop,
    Pop2,
    Dup,
    DupX1,
    DupX2,
    Dup2,
    Dup2X1,
    Dup2X2,
    Swap,
}

/// Three-way comparison producing -1/0/1.
///
/// The `l`/`g` suffix pairs differ only in the value produced for an
/// unordered (NaN) comparison; they must never be collapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpKind {
    Lcmp,
    /// fcmpl / dcmpl: NaN produces -1.
    FloatL,
    /// fcmpg / dcmpg: NaN produces +1.
    FloatG,
    /// dcmpl
    DoubleL,
    /// dcmpg
    DoubleG,
}

/// Conditional branch condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchCond {
    // int vs zero
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
    // int vs int
    ICmpEq,
    ICmpNe,
    ICmpLt,
    ICmpGe,
    ICmpGt,
    ICmpLe,
    // reference equality
    ACmpEq,
    ACmpNe,
    // reference vs null
    Null,
    NonNull,
}

impl BranchCond {
    /// Number of operand-stack values the branch consumes.
    pub fn arity(self) -> usize {
        match self {
            BranchCond::Eq
            | BranchCond::Ne
            | BranchCond::Lt
            | BranchCond::Ge
            | BranchCond::Gt
            | BranchCond::Le
            | BranchCond::Null
            | BranchCond::NonNull => 1,
            _ => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokeKind {
    Virtual,
    Special,
    Static,
    Interface,
    Dynamic,
}

impl InvokeKind {
    pub fn has_receiver(self) -> bool {
        !matches!(self, InvokeKind::Static | InvokeKind::Dynamic)
    }
}

/// A constant pushed by one instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstOp {
    Null,
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    /// ldc family, already resolved against the pool.
    Pool(ConstValue),
}

/// One decoded instruction, the closed tag set of the instruction model.
#[derive(Debug, Clone, PartialEq)]
pub enum Insn {
    Nop,
    Const(ConstOp),
    Load { slot: u16, ty: SlotType },
    Store { slot: u16, ty: SlotType },
    Iinc { slot: u16, delta: i16 },
    Stack(StackOp),
    Arith { op: ArithOp, ty: PrimType },
    Neg { ty: PrimType },
    /// Widening/narrowing conversion; `to` may be a sub-int type (`i2b`).
    Convert { from: PrimType, to: JvmType },
    Cmp(CmpKind),
    Branch { cond: BranchCond, target: u32 },
    Goto { target: u32 },
    /// tableswitch and lookupswitch normalized to one form; cases sorted by key.
    Switch { default: u32, cases: Vec<(i32, u32)> },
    Return { ty: Option<SlotType> },
    GetField { member: MemberRef, is_static: bool },
    PutField { member: MemberRef, is_static: bool },
    Invoke { kind: InvokeKind, member: MemberRef },
    New { class: String },
    NewArray { elem: JvmType },
    MultiNewArray { elem: JvmType, dims: u8 },
    ArrayLoad { elem: ArrayKind },
    ArrayStore { elem: ArrayKind },
    ArrayLength,
    CheckCast { class: String },
    InstanceOf { class: String },
    Throw,
    Monitor { enter: bool },
    /// Pre-Java-6 subroutine forms; structured reconstruction does not
    /// model them, the driver reports an unsupported construct.
    Jsr { target: u32 },
    Ret { slot: u16 },
}

impl Insn {
    /// Branch/switch targets, if any.
    pub fn targets(&self) -> Vec<u32> {
        match self {
            Insn::Branch { target, .. } | Insn::Goto { target } | Insn::Jsr { target } => {
                vec![*target]
            }
            Insn::Switch { default, cases } => {
                let mut t: Vec<u32> = cases.iter().map(|&(_, off)| off).collect();
                t.push(*default);
                t
            }
            _ => Vec::new(),
        }
    }

    /// Whether control never falls through to the next instruction.
    pub fn ends_flow(&self) -> bool {
        matches!(
            self,
            Insn::Goto { .. }
                | Insn::Switch { .. }
                | Insn::Return { .. }
                | Insn::Throw
                | Insn::Ret { .. }
        )
    }
}

/// One instruction with its position in the code array.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Byte offset within the method's code.
    pub offset: u32,
    /// Total instruction size in bytes.
    pub size: u32,
    pub insn: Insn,
}

/// Structural equality that ignores where the instructions sit in the code
/// array: branch targets compare by displacement from the instruction.
/// This is the comparison used to recognize compiler-duplicated finally
/// bodies.
pub fn same_shape(a: &Instruction, b: &Instruction) -> bool {
    match (&a.insn, &b.insn) {
        (
            Insn::Branch {
                cond: ca,
                target: ta,
            },
            Insn::Branch {
                cond: cb,
                target: tb,
            },
        ) => ca == cb && (*ta as i64 - a.offset as i64) == (*tb as i64 - b.offset as i64),
        (Insn::Goto { target: ta }, Insn::Goto { target: tb }) => {
            (*ta as i64 - a.offset as i64) == (*tb as i64 - b.offset as i64)
        }
        (
            Insn::Switch {
                default: da,
                cases: ca,
            },
            Insn::Switch {
                default: db,
                cases: cb,
            },
        ) => {
            ca.len() == cb.len()
                && (*da as i64 - a.offset as i64) == (*db as i64 - b.offset as i64)
                && ca.iter().zip(cb).all(|(&(ka, oa), &(kb, ob))| {
                    ka == kb && (oa as i64 - a.offset as i64) == (ob as i64 - b.offset as i64)
                })
        }
        (x, y) => x == y,
    }
}

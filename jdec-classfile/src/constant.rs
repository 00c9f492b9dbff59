use crate::types::JvmType;

/// A constant-pool value already resolved by the parser.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(String),
    /// `ldc` of a class literal; internal binary name.
    Class(String),
}

impl ConstValue {
    pub fn jvm_type(&self) -> JvmType {
        match self {
            ConstValue::Int(_) => JvmType::Int,
            ConstValue::Long(_) => JvmType::Long,
            ConstValue::Float(_) => JvmType::Float,
            ConstValue::Double(_) => JvmType::Double,
            ConstValue::Str(_) => JvmType::reference("java/lang/String"),
            ConstValue::Class(_) => JvmType::reference("java/lang/Class"),
        }
    }
}

/// Symbolic reference to a field or method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRef {
    /// Owning class, internal binary name. Empty for invokedynamic call sites.
    pub class: String,
    pub name: String,
    pub descriptor: String,
}

impl MemberRef {
    pub fn new(
        class: impl Into<String>,
        name: impl Into<String>,
        descriptor: impl Into<String>,
    ) -> MemberRef {
        MemberRef {
            class: class.into(),
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }
}

/// Lookup interface the decoder uses to resolve constant-pool indices.
///
/// The class model implements this; tests substitute small fakes.
pub trait ConstPool {
    /// A loadable constant (ldc / ldc_w / ldc2_w operand).
    fn const_value(&self, index: u16) -> Option<ConstValue>;
    /// A field or method reference.
    fn member_ref(&self, index: u16) -> Option<MemberRef>;
    /// A class reference (new / checkcast / instanceof / anewarray operand).
    fn class_name(&self, index: u16) -> Option<String>;
}

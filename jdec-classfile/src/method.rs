use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::modifiers::MethodFlags;
use crate::types::{JvmType, MethodDescriptor};

/// One entry of a method's exception table.
///
/// `catch_type == None` is the catch-any entry compilers emit for
/// `finally` and synchronized-block cleanup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionTableEntry {
    pub start_pc: u32,
    /// Exclusive.
    pub end_pc: u32,
    pub handler_pc: u32,
    pub catch_type: Option<String>,
}

impl ExceptionTableEntry {
    pub fn covers(&self, pc: u32) -> bool {
        self.start_pc <= pc && pc < self.end_pc
    }
}

/// Verification type from a StackMapTable frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationType {
    Top,
    Integer,
    Float,
    Long,
    Double,
    Null,
    Object(String),
    /// `uninitializedThis` / `uninitialized(pc)` both collapse here; the
    /// interpreter never merges across an uninitialized value.
    Uninitialized,
}

impl VerificationType {
    /// Whether an inferred merge type is consistent with this frame entry.
    pub fn admits(&self, ty: &JvmType) -> bool {
        match self {
            VerificationType::Top | VerificationType::Uninitialized => true,
            VerificationType::Integer => {
                matches!(
                    ty,
                    JvmType::Int
                        | JvmType::Boolean
                        | JvmType::Byte
                        | JvmType::Char
                        | JvmType::Short
                )
            }
            VerificationType::Float => *ty == JvmType::Float,
            VerificationType::Long => *ty == JvmType::Long,
            VerificationType::Double => *ty == JvmType::Double,
            VerificationType::Null => ty.is_reference(),
            // Frame says reference; any inferred reference type is fine,
            // the frame type is an upper bound the printer may ignore.
            VerificationType::Object(_) => ty.is_reference(),
        }
    }
}

/// Expanded stack-map frame at one bytecode offset.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub locals: Vec<VerificationType>,
    pub stack: Vec<VerificationType>,
}

/// One method of the resolved class model.
#[derive(Debug, Clone)]
pub struct MethodModel {
    pub name: String,
    pub access: MethodFlags,
    pub descriptor: MethodDescriptor,
    pub max_stack: u16,
    pub max_locals: u16,
    /// Raw code bytes; empty for abstract and native methods.
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionTableEntry>,
    /// Expanded stack-map frames keyed by bytecode offset; may be empty.
    pub stack_map: BTreeMap<u32, Frame>,
}

impl MethodModel {
    pub fn new(
        name: impl Into<String>,
        access: MethodFlags,
        raw_descriptor: &str,
        code: Vec<u8>,
    ) -> Result<MethodModel> {
        let descriptor = MethodDescriptor::parse(raw_descriptor)?;
        let param_slots = descriptor.param_slots()
            + if access.contains(MethodFlags::STATIC) {
                0
            } else {
                1
            };
        Ok(MethodModel {
            name: name.into(),
            access,
            descriptor,
            max_stack: 16,
            max_locals: param_slots.max(16),
            code,
            exception_table: Vec::new(),
            stack_map: BTreeMap::new(),
        })
    }

    pub fn is_static(&self) -> bool {
        self.access.contains(MethodFlags::STATIC)
    }

    pub fn with_exception_table(
        mut self,
        entries: Vec<ExceptionTableEntry>,
    ) -> Result<MethodModel> {
        for e in &entries {
            if e.end_pc <= e.start_pc {
                return Err(Error::InvertedRange(e.start_pc, e.end_pc));
            }
        }
        self.exception_table = entries;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_method_reserves_this_slot() {
        let m = MethodModel::new("f", MethodFlags::PUBLIC, "(I)V", vec![]).unwrap();
        assert!(!m.is_static());
        assert_eq!(m.descriptor.param_slots(), 1);
    }

    #[test]
    fn inverted_exception_range_rejected() {
        let m = MethodModel::new("f", MethodFlags::STATIC, "()V", vec![]).unwrap();
        let err = m
            .with_exception_table(vec![ExceptionTableEntry {
                start_pc: 10,
                end_pc: 10,
                handler_pc: 20,
                catch_type: None,
            }])
            .unwrap_err();
        assert!(matches!(err, Error::InvertedRange(10, 10)));
    }

    #[test]
    fn frame_admits_inferred_types() {
        assert!(VerificationType::Integer.admits(&JvmType::Boolean));
        assert!(!VerificationType::Integer.admits(&JvmType::Float));
        assert!(VerificationType::Object("java/lang/Object".into()).admits(&JvmType::Null));
        assert!(!VerificationType::Long.admits(&JvmType::Int));
    }
}

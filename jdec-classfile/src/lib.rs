//! Resolved class model consumed by the reconstruction core.
//!
//! The binary class-file parser lives outside this workspace; it hands us a
//! fully resolved model (constant pool entries already decoded into typed
//! values and symbolic member references). This crate defines that model,
//! the descriptor grammar, and the read-only type-hierarchy snapshot used
//! for merge typing and catch-clause ordering.

pub mod class;
pub mod constant;
pub mod error;
pub mod hierarchy;
pub mod method;
pub mod modifiers;
pub mod types;

pub use class::{ClassModel, PoolEntry};
pub use constant::{ConstPool, ConstValue, MemberRef};
pub use error::{Error, Result};
pub use hierarchy::TypeHierarchy;
pub use method::{ExceptionTableEntry, Frame, MethodModel, VerificationType};
pub use modifiers::{ClassFlags, MethodFlags};
pub use types::{JvmType, MethodDescriptor};

use crate::constant::{ConstPool, ConstValue, MemberRef};
use crate::method::MethodModel;
use crate::modifiers::ClassFlags;

/// One resolved constant-pool slot.
///
/// Slot 0 and the phantom slots after long/double entries are `Empty`.
#[derive(Debug, Clone)]
pub enum PoolEntry {
    Empty,
    Value(ConstValue),
    Member(MemberRef),
    ClassRef(String),
}

/// The resolved class model the reconstruction core operates on.
///
/// Built once by the out-of-scope parser, then shared read-only across all
/// method reconstructions.
#[derive(Debug, Clone)]
pub struct ClassModel {
    /// Internal binary name, e.g. `com/example/OddsAndEnds`.
    pub name: String,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub access: ClassFlags,
    pub pool: Vec<PoolEntry>,
    pub methods: Vec<MethodModel>,
}

impl ClassModel {
    pub fn new(name: impl Into<String>) -> ClassModel {
        ClassModel {
            name: name.into(),
            super_name: Some("java/lang/Object".into()),
            interfaces: Vec::new(),
            access: ClassFlags::PUBLIC | ClassFlags::SUPER,
            pool: vec![PoolEntry::Empty],
            methods: Vec::new(),
        }
    }

    /// Append a pool entry, returning its index.
    pub fn push_pool(&mut self, entry: PoolEntry) -> u16 {
        let idx = self.pool.len() as u16;
        let wide = matches!(
            &entry,
            PoolEntry::Value(ConstValue::Long(_) | ConstValue::Double(_))
        );
        self.pool.push(entry);
        if wide {
            self.pool.push(PoolEntry::Empty);
        }
        idx
    }
}

impl ConstPool for ClassModel {
    fn const_value(&self, index: u16) -> Option<ConstValue> {
        match self.pool.get(index as usize)? {
            PoolEntry::Value(v) => Some(v.clone()),
            PoolEntry::ClassRef(name) => Some(ConstValue::Class(name.clone())),
            _ => None,
        }
    }

    fn member_ref(&self, index: u16) -> Option<MemberRef> {
        match self.pool.get(index as usize)? {
            PoolEntry::Member(m) => Some(m.clone()),
            _ => None,
        }
    }

    fn class_name(&self, index: u16) -> Option<String> {
        match self.pool.get(index as usize)? {
            PoolEntry::ClassRef(name) => Some(name.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wide_constants_occupy_two_slots() {
        let mut c = ClassModel::new("T");
        let a = c.push_pool(PoolEntry::Value(ConstValue::Long(1)));
        let b = c.push_pool(PoolEntry::Value(ConstValue::Int(2)));
        assert_eq!(b, a + 2);
        assert!(matches!(c.const_value(a), Some(ConstValue::Long(1))));
        assert!(c.const_value(a + 1).is_none());
    }
}

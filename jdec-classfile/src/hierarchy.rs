use std::collections::BTreeMap;

use crate::types::JvmType;

const OBJECT: &str = "java/lang/Object";

/// Read-only snapshot of the class hierarchy, built once before any method
/// is processed. Classes not registered are assumed to extend Object
/// directly, which keeps merge typing total on incomplete classpaths.
#[derive(Debug, Default)]
pub struct TypeHierarchy {
    supers: BTreeMap<String, String>,
    interfaces: BTreeMap<String, Vec<String>>,
}

impl TypeHierarchy {
    pub fn new() -> TypeHierarchy {
        TypeHierarchy::default()
    }

    pub fn add_class(
        &mut self,
        name: impl Into<String>,
        super_name: impl Into<String>,
        interfaces: Vec<String>,
    ) {
        let name = name.into();
        self.supers.insert(name.clone(), super_name.into());
        self.interfaces.insert(name, interfaces);
    }

    /// Superclass chain from `name` up to and including Object.
    fn chain<'a>(&'a self, name: &'a str) -> Vec<&'a str> {
        let mut out = vec![name];
        let mut cur = name;
        while cur != OBJECT {
            cur = self.supers.get(cur).map(String::as_str).unwrap_or(OBJECT);
            if out.contains(&cur) {
                // Cycle in supplied hierarchy; stop at what we have.
                break;
            }
            out.push(cur);
        }
        out
    }

    /// Whether `sub` is `sup` or a (transitive) subclass/implementor of it.
    pub fn is_subtype(&self, sub: &str, sup: &str) -> bool {
        if sup == OBJECT || sub == sup {
            return true;
        }
        let mut cur = sub;
        loop {
            if let Some(ifaces) = self.interfaces.get(cur) {
                if ifaces.iter().any(|i| i == sup || self.is_subtype(i, sup)) {
                    return true;
                }
            }
            if cur == OBJECT {
                return false;
            }
            let next = self.supers.get(cur).map(String::as_str).unwrap_or(OBJECT);
            if next == cur {
                return false;
            }
            if next == sup {
                return true;
            }
            cur = next;
        }
    }

    /// First common superclass of two classes. Interfaces that are not on
    /// either superclass chain merge to Object, which is what the verifier
    /// does as well.
    pub fn common_superclass<'a>(&'a self, a: &'a str, b: &'a str) -> &'a str {
        if a == b {
            return a;
        }
        let chain_b = self.chain(b);
        for candidate in self.chain(a) {
            if chain_b.contains(&candidate) {
                return candidate;
            }
        }
        OBJECT
    }

    /// Least common supertype of two value types, the verifier's merge rule.
    ///
    /// Returns `None` for category-incompatible merges (numeric vs
    /// reference, or mismatched primitives), which the interpreter reports
    /// as a stack-integrity fault.
    pub fn lub(&self, a: &JvmType, b: &JvmType) -> Option<JvmType> {
        let (a, b) = (a.stack_type(), b.stack_type());
        if a == b {
            return Some(a);
        }
        match (&a, &b) {
            (JvmType::Null, other) | (other, JvmType::Null) if other.is_reference() => {
                Some(other.clone())
            }
            (JvmType::Array(x), JvmType::Array(y)) => {
                if x.is_reference() && y.is_reference() {
                    Some(JvmType::array(self.lub(x, y)?))
                } else {
                    // int[] vs long[] etc. only share Object.
                    Some(JvmType::object())
                }
            }
            (JvmType::Array(_), JvmType::Reference(_))
            | (JvmType::Reference(_), JvmType::Array(_)) => Some(JvmType::object()),
            (JvmType::Reference(x), JvmType::Reference(y)) => {
                Some(JvmType::reference(self.common_superclass(x, y)))
            }
            _ => None,
        }
    }
}

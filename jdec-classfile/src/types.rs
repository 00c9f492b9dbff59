use crate::error::{Error, Result};

/// A JVM field or value type, parsed from descriptor syntax.
///
/// Reference types carry internal binary names (`java/lang/String`).
/// `Null` is the type of `aconst_null`, assignable to every reference type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JvmType {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Reference(String),
    Array(Box<JvmType>),
    Null,
}

impl JvmType {
    pub fn object() -> JvmType {
        JvmType::Reference("java/lang/Object".into())
    }

    pub fn throwable() -> JvmType {
        JvmType::Reference("java/lang/Throwable".into())
    }

    pub fn reference(name: impl Into<String>) -> JvmType {
        JvmType::Reference(name.into())
    }

    pub fn array(elem: JvmType) -> JvmType {
        JvmType::Array(Box::new(elem))
    }

    /// Operand-stack/local-slot width: 2 for long and double, 1 otherwise.
    pub fn category(&self) -> u8 {
        match self {
            JvmType::Long | JvmType::Double => 2,
            _ => 1,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            JvmType::Reference(_) | JvmType::Array(_) | JvmType::Null
        )
    }

    /// Sub-int types widen to int on the operand stack.
    pub fn stack_type(&self) -> JvmType {
        match self {
            JvmType::Boolean | JvmType::Byte | JvmType::Char | JvmType::Short => JvmType::Int,
            other => other.clone(),
        }
    }

    /// Parse one field descriptor, e.g. `I` or `[Ljava/lang/String;`.
    pub fn parse(descriptor: &str) -> Result<JvmType> {
        let mut chars = descriptor.char_indices();
        let (ty, rest) = parse_one(descriptor, &mut chars)?;
        if rest != descriptor.len() {
            return Err(Error::BadDescriptor(descriptor.into()));
        }
        Ok(ty)
    }
}

impl std::fmt::Display for JvmType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JvmType::Boolean => f.write_str("boolean"),
            JvmType::Byte => f.write_str("byte"),
            JvmType::Char => f.write_str("char"),
            JvmType::Short => f.write_str("short"),
            JvmType::Int => f.write_str("int"),
            JvmType::Long => f.write_str("long"),
            JvmType::Float => f.write_str("float"),
            JvmType::Double => f.write_str("double"),
            JvmType::Reference(name) => f.write_str(&name.replace('/', ".")),
            JvmType::Array(elem) => write!(f, "{elem}[]"),
            JvmType::Null => f.write_str("null"),
        }
    }
}

/// Parsed method descriptor: `(IJ)V` and friends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub params: Vec<JvmType>,
    /// `None` means void.
    pub ret: Option<JvmType>,
}

impl MethodDescriptor {
    pub fn parse(descriptor: &str) -> Result<MethodDescriptor> {
        let inner = descriptor
            .strip_prefix('(')
            .ok_or_else(|| Error::BadDescriptor(descriptor.into()))?;
        let close = inner
            .find(')')
            .ok_or_else(|| Error::BadDescriptor(descriptor.into()))?;
        let (params_str, ret_str) = (&inner[..close], &inner[close + 1..]);

        let mut params = Vec::new();
        let mut chars = params_str.char_indices();
        let mut consumed = 0;
        while consumed < params_str.len() {
            let (ty, next) = parse_one(params_str, &mut chars)?;
            params.push(ty);
            consumed = next;
        }

        let ret = if ret_str == "V" {
            None
        } else {
            Some(JvmType::parse(ret_str)?)
        };
        Ok(MethodDescriptor { params, ret })
    }

    /// Number of local-variable slots the parameters occupy.
    pub fn param_slots(&self) -> u16 {
        self.params.iter().map(|p| p.category() as u16).sum()
    }
}

/// Parse a single type starting at the iterator's position; returns the
/// type and the byte index just past it.
fn parse_one(src: &str, chars: &mut std::str::CharIndices<'_>) -> Result<(JvmType, usize)> {
    let (i, c) = chars
        .next()
        .ok_or_else(|| Error::BadDescriptor(src.into()))?;
    let ty = match c {
        'Z' => JvmType::Boolean,
        'B' => JvmType::Byte,
        'C' => JvmType::Char,
        'S' => JvmType::Short,
        'I' => JvmType::Int,
        'J' => JvmType::Long,
        'F' => JvmType::Float,
        'D' => JvmType::Double,
        'L' => {
            let rest = &src[i + 1..];
            let semi = rest
                .find(';')
                .ok_or_else(|| Error::BadDescriptor(src.into()))?;
            let name = &rest[..semi];
            if name.is_empty() {
                return Err(Error::BadDescriptor(src.into()));
            }
            // Skip past the class name and the semicolon.
            for (_, ch) in chars.by_ref() {
                if ch == ';' {
                    break;
                }
            }
            return Ok((JvmType::Reference(name.into()), i + semi + 2));
        }
        '[' => {
            let (elem, next) = parse_one(src, chars)?;
            return Ok((JvmType::array(elem), next));
        }
        _ => return Err(Error::BadDescriptor(src.into())),
    };
    Ok((ty, i + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_descriptors() {
        assert_eq!(JvmType::parse("I").unwrap(), JvmType::Int);
        assert_eq!(JvmType::parse("J").unwrap(), JvmType::Long);
        assert_eq!(JvmType::parse("Z").unwrap(), JvmType::Boolean);
    }

    #[test]
    fn reference_and_array_descriptors() {
        assert_eq!(
            JvmType::parse("Ljava/lang/String;").unwrap(),
            JvmType::reference("java/lang/String")
        );
        assert_eq!(
            JvmType::parse("[[I").unwrap(),
            JvmType::array(JvmType::array(JvmType::Int))
        );
        assert_eq!(
            JvmType::parse("[Ljava/lang/Cloneable;").unwrap(),
            JvmType::array(JvmType::reference("java/lang/Cloneable"))
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(JvmType::parse("").is_err());
        assert!(JvmType::parse("II").is_err());
        assert!(JvmType::parse("Ljava/lang/String").is_err());
        assert!(JvmType::parse("Q").is_err());
    }

    #[test]
    fn method_descriptors() {
        let d = MethodDescriptor::parse("(IJLjava/lang/Object;)V").unwrap();
        assert_eq!(
            d.params,
            vec![JvmType::Int, JvmType::Long, JvmType::object()]
        );
        assert_eq!(d.ret, None);
        assert_eq!(d.param_slots(), 4);

        let d = MethodDescriptor::parse("()[D").unwrap();
        assert!(d.params.is_empty());
        assert_eq!(d.ret, Some(JvmType::array(JvmType::Double)));
    }

    #[test]
    fn stack_type_widens_subint() {
        assert_eq!(JvmType::Boolean.stack_type(), JvmType::Int);
        assert_eq!(JvmType::Char.stack_type(), JvmType::Int);
        assert_eq!(JvmType::Long.stack_type(), JvmType::Long);
    }
}

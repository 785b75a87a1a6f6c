use serde::{Deserialize, Serialize};
use strum::Display;

use super::registry::ClassRegistry;
use super::ClassId;

/// Kind half of a type descriptor. Scalar kinds carry a conversion
/// ordinal used by overload scoring (widening is cheap, narrowing is
/// penalized tenfold).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum TypeKind {
    Void,
    Bool,
    Int,
    Float,
    Str,
    Array,
    ClassRef,
    ClassValue,
    Null,
}

impl TypeKind {
    /// Conversion ordinal for scalar kinds; `None` for everything else.
    pub fn ordinal(self) -> Option<i32> {
        match self {
            TypeKind::Bool => Some(1),
            TypeKind::Int => Some(2),
            TypeKind::Float => Some(3),
            TypeKind::Str => Some(4),
            _ => None,
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, TypeKind::Bool | TypeKind::Int | TypeKind::Float)
    }
}

/// Full type descriptor: kind plus the class for class kinds and the
/// element type (with an optional declared bound) for arrays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDesc {
    pub kind: TypeKind,
    pub class: Option<ClassId>,
    pub elem: Option<Box<TypeDesc>>,
    pub bound: Option<u32>,
}

impl TypeDesc {
    pub fn simple(kind: TypeKind) -> Self {
        TypeDesc {
            kind,
            class: None,
            elem: None,
            bound: None,
        }
    }

    pub fn void() -> Self {
        Self::simple(TypeKind::Void)
    }

    pub fn bool() -> Self {
        Self::simple(TypeKind::Bool)
    }

    pub fn int() -> Self {
        Self::simple(TypeKind::Int)
    }

    pub fn float() -> Self {
        Self::simple(TypeKind::Float)
    }

    pub fn str() -> Self {
        Self::simple(TypeKind::Str)
    }

    pub fn null() -> Self {
        Self::simple(TypeKind::Null)
    }

    pub fn class_ref(class: ClassId) -> Self {
        TypeDesc {
            kind: TypeKind::ClassRef,
            class: Some(class),
            elem: None,
            bound: None,
        }
    }

    pub fn class_value(class: ClassId) -> Self {
        TypeDesc {
            kind: TypeKind::ClassValue,
            class: Some(class),
            elem: None,
            bound: None,
        }
    }

    pub fn array(elem: TypeDesc, bound: Option<u32>) -> Self {
        TypeDesc {
            kind: TypeKind::Array,
            class: elem.class,
            elem: Some(Box::new(elem)),
            bound,
        }
    }

    pub fn elem(&self) -> Option<&TypeDesc> {
        self.elem.as_deref()
    }

    /// Element-wise equality for arrays, ignoring the declared bound.
    fn same_shape(&self, other: &TypeDesc) -> bool {
        self.kind == other.kind
            && self.class == other.class
            && match (self.elem(), other.elem()) {
                (None, None) => true,
                (Some(a), Some(b)) => a.same_shape(b),
                _ => false,
            }
    }

    /// The compatibility predicate: may a value of type `actual` be
    /// supplied where `self` is expected?
    pub fn accepts(&self, actual: &TypeDesc, registry: &ClassRegistry) -> bool {
        match (self.kind, actual.kind) {
            (TypeKind::Str, TypeKind::Str) => true,
            (a, b) if a.is_numeric() && b.is_numeric() => true,
            (TypeKind::ClassRef, TypeKind::Null) => true,
            (TypeKind::Array, TypeKind::Null) => true,
            (TypeKind::ClassRef, TypeKind::ClassRef) => match (actual.class, self.class) {
                (Some(from), Some(to)) => registry.is_child_of(from, to),
                _ => false,
            },
            (TypeKind::ClassValue, TypeKind::ClassValue) => {
                self.class.is_some() && self.class == actual.class
            }
            (TypeKind::Array, TypeKind::Array) => match (self.elem(), actual.elem()) {
                (Some(a), Some(b)) => a.same_shape(b),
                _ => false,
            },
            _ => false,
        }
    }

    /// Human-readable form for diagnostics.
    pub fn describe(&self, registry: &ClassRegistry) -> String {
        match self.kind {
            TypeKind::ClassRef | TypeKind::ClassValue => self
                .class
                .map(|c| registry.get(c).name.clone())
                .unwrap_or_else(|| self.kind.to_string()),
            TypeKind::Array => match self.elem() {
                Some(e) => format!("{}[]", e.describe(registry)),
                None => "[]".to_string(),
            },
            other => other.to_string().to_lowercase(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::registry::ClassRegistry;

    fn registry_with_chain() -> (ClassRegistry, ClassId, ClassId, ClassId) {
        let mut reg = ClassRegistry::new();
        let base = reg.create("Entity", None, false, 0..0).unwrap();
        let mid = reg.create("Vehicle", Some(base), false, 0..0).unwrap();
        let other = reg.create("Item", None, false, 0..0).unwrap();
        (reg, base, mid, other)
    }

    #[test]
    fn test_scalar_compatibility_is_bidirectional() {
        let reg = ClassRegistry::new();
        assert!(TypeDesc::float().accepts(&TypeDesc::int(), &reg));
        assert!(TypeDesc::int().accepts(&TypeDesc::float(), &reg));
        assert!(TypeDesc::int().accepts(&TypeDesc::bool(), &reg));
        assert!(!TypeDesc::int().accepts(&TypeDesc::str(), &reg));
        assert!(TypeDesc::str().accepts(&TypeDesc::str(), &reg));
    }

    #[test]
    fn test_class_ref_accepts_subclass_and_null() {
        let (reg, base, mid, other) = registry_with_chain();
        let want_base = TypeDesc::class_ref(base);
        assert!(want_base.accepts(&TypeDesc::class_ref(mid), &reg));
        assert!(want_base.accepts(&TypeDesc::null(), &reg));
        assert!(!want_base.accepts(&TypeDesc::class_ref(other), &reg));
        // not the other way around
        assert!(!TypeDesc::class_ref(mid).accepts(&TypeDesc::class_ref(base), &reg));
    }

    #[test]
    fn test_array_compatibility_ignores_bound() {
        let reg = ClassRegistry::new();
        let a = TypeDesc::array(TypeDesc::int(), Some(4));
        let b = TypeDesc::array(TypeDesc::int(), None);
        let c = TypeDesc::array(TypeDesc::float(), None);
        assert!(a.accepts(&b, &reg));
        assert!(!a.accepts(&c, &reg));
        assert!(a.accepts(&TypeDesc::null(), &reg));
    }

    #[test]
    fn test_ordinals() {
        assert_eq!(TypeKind::Bool.ordinal(), Some(1));
        assert_eq!(TypeKind::Int.ordinal(), Some(2));
        assert_eq!(TypeKind::Float.ordinal(), Some(3));
        assert_eq!(TypeKind::Str.ordinal(), Some(4));
        assert_eq!(TypeKind::ClassRef.ordinal(), None);
    }
}

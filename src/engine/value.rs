use std::cell::RefCell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use super::ty::{TypeDesc, TypeKind};
use super::ClassId;

/// Runtime value. Scalars and strings have value semantics; `Object`
/// and `Array` share their heap cell; `Struct` is an intrinsic-class
/// instance copied structurally on every bind.
///
/// Heap-backed variants are skipped by the snapshot codec, matching how
/// live host handles are excluded from persisted state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum Value {
    /// Declared but never written; reading it is a runtime error.
    Uninit,
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    #[serde(skip)]
    Object(Rc<RefCell<Instance>>),
    #[serde(skip)]
    Array(Rc<RefCell<Vec<Value>>>),
    Struct(Box<Instance>),
}

/// One class instance: flat field storage covering the whole
/// inheritance chain (parent fields first, then own).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub class: ClassId,
    pub fields: Vec<Value>,
}

impl Value {
    pub fn object(instance: Instance) -> Value {
        Value::Object(Rc::new(RefCell::new(instance)))
    }

    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Uninit => "uninitialized",
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Object(_) => "object",
            Value::Array(_) => "array",
            Value::Struct(_) => "struct",
        }
    }

    /// Scalar coercion toward a declared kind; non-scalar values and
    /// non-scalar targets pass through unchanged.
    pub fn coerce_to(self, kind: TypeKind) -> Value {
        match (kind, &self) {
            (TypeKind::Int, Value::Float(f)) => Value::Int(*f as i64),
            (TypeKind::Int, Value::Bool(b)) => Value::Int(*b as i64),
            (TypeKind::Float, Value::Int(i)) => Value::Float(*i as f64),
            (TypeKind::Float, Value::Bool(b)) => Value::Float(*b as i64 as f64),
            (TypeKind::Bool, Value::Int(i)) => Value::Bool(*i != 0),
            (TypeKind::Bool, Value::Float(f)) => Value::Bool(*f != 0.0),
            _ => self,
        }
    }

    /// The descriptor a host-supplied argument presents to overload
    /// resolution.
    pub fn type_desc(&self) -> TypeDesc {
        match self {
            Value::Uninit | Value::Null => TypeDesc::null(),
            Value::Bool(_) => TypeDesc::bool(),
            Value::Int(_) => TypeDesc::int(),
            Value::Float(_) => TypeDesc::float(),
            Value::Str(_) => TypeDesc::str(),
            Value::Object(o) => TypeDesc::class_ref(o.borrow().class),
            Value::Struct(s) => TypeDesc::class_value(s.class),
            Value::Array(a) => {
                let elem = a
                    .borrow()
                    .first()
                    .map(Value::type_desc)
                    .unwrap_or_else(TypeDesc::null);
                TypeDesc::array(elem, None)
            }
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) => *a as f64 == *b,
            (Value::Float(a), Value::Int(b)) => *a == *b as f64,
            (Value::Str(a), Value::Str(b)) => a == b,
            // identity for shared heap cells
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(_), Value::Null) | (Value::Null, Value::Object(_)) => false,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_cross_equality() {
        assert_eq!(Value::Int(2), Value::Float(2.0));
        assert_ne!(Value::Int(2), Value::Float(2.5));
    }

    #[test]
    fn test_object_equality_is_identity() {
        let a = Value::object(Instance {
            class: ClassId(0),
            fields: vec![],
        });
        let b = a.clone();
        let c = Value::object(Instance {
            class: ClassId(0),
            fields: vec![],
        });
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_coercion() {
        assert_eq!(Value::Int(3).coerce_to(TypeKind::Float), Value::Float(3.0));
        assert_eq!(Value::Float(3.9).coerce_to(TypeKind::Int), Value::Int(3));
        assert_eq!(Value::Int(0).coerce_to(TypeKind::Bool), Value::Bool(false));
        // strings are never coerced
        assert_eq!(
            Value::Str("x".into()).coerce_to(TypeKind::Int),
            Value::Str("x".into())
        );
    }

    #[test]
    fn test_struct_copy_is_structural() {
        let s = Value::Struct(Box::new(Instance {
            class: ClassId(1),
            fields: vec![Value::Int(1)],
        }));
        let mut copy = s.clone();
        if let Value::Struct(inst) = &mut copy {
            inst.fields[0] = Value::Int(9);
        }
        let Value::Struct(original) = &s else {
            unreachable!()
        };
        assert_eq!(original.fields[0], Value::Int(1));
    }
}

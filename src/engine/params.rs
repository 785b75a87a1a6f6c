use super::error::{ErrorKind, ExecResult, ScriptError};
use super::frame::Activation;
use super::function::{Function, Param};
use super::value::Value;
use crate::types::Span;

/// Compile-time ordering rule: once a formal carries a default, every
/// later formal must carry one too.
pub fn check_default_ordering(params: &[Param], span: Span) -> ExecResult<()> {
    let mut defaults_started = false;
    for param in params {
        if param.default.is_some() {
            defaults_started = true;
        } else if defaults_started {
            return Err(ScriptError::new(
                ErrorKind::DefaultOrdering(param.name.clone()),
                span,
            ));
        }
    }
    Ok(())
}

/// Bind one actual to a formal. Scalars coerce to the declared kind
/// and copy; intrinsic instances copy structurally; references and
/// arrays share their cell. The bound slot carries the formal type.
pub fn bind_value(value: Value, param: &Param) -> Value {
    value.coerce_to(param.ty.kind)
}

/// Build the activation for a call whose actuals (defaults included)
/// are fully evaluated, in declaration order.
pub fn bind_activation(func: &Function, args: Vec<Value>, this: Value) -> Activation {
    let mut locals = vec![Value::Uninit; func.locals as usize];
    for (slot, (param, value)) in func.params.iter().zip(args).enumerate() {
        locals[slot] = bind_value(value, param);
    }
    Activation {
        func: func.id,
        locals,
        this,
        locked: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::node::ExprNode;
    use crate::engine::ty::TypeDesc;
    use crate::engine::value::Instance;
    use crate::engine::ClassId;

    fn param(name: &str, ty: TypeDesc, default: bool) -> Param {
        Param {
            name: name.into(),
            ty: ty.clone(),
            default: default.then(|| ExprNode::constant(Value::Int(0), ty, 0..0)),
            id: 0,
        }
    }

    #[test]
    fn test_defaults_must_be_trailing() {
        let ok = [
            param("a", TypeDesc::int(), false),
            param("b", TypeDesc::int(), true),
            param("c", TypeDesc::int(), true),
        ];
        assert!(check_default_ordering(&ok, 0..0).is_ok());

        let bad = [
            param("a", TypeDesc::int(), true),
            param("b", TypeDesc::int(), false),
        ];
        let err = check_default_ordering(&bad, 3..9).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DefaultOrdering("b".into()));
        assert_eq!(err.span, 3..9);
    }

    #[test]
    fn test_bound_slot_carries_formal_kind() {
        let p = param("x", TypeDesc::float(), false);
        assert_eq!(bind_value(Value::Int(2), &p), Value::Float(2.0));
        let p = param("x", TypeDesc::int(), false);
        assert_eq!(bind_value(Value::Float(2.9), &p), Value::Int(2));
    }

    #[test]
    fn test_struct_actual_copies() {
        let original = Value::Struct(Box::new(Instance {
            class: ClassId(0),
            fields: vec![Value::Int(1)],
        }));
        let p = param("s", TypeDesc::class_value(ClassId(0)), false);
        let mut bound = bind_value(original.clone(), &p);
        if let Value::Struct(inst) = &mut bound {
            inst.fields[0] = Value::Int(99);
        }
        let Value::Struct(inst) = original else {
            unreachable!()
        };
        assert_eq!(inst.fields[0], Value::Int(1));
    }
}

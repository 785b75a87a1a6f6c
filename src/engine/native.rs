use super::ty::TypeDesc;
use super::value::{Instance, Value};

/// Host-implemented method body, registered against a class.
///
/// The two operations mirror the two moments the engine needs the host:
/// `check` runs at compile time (overload resolution wants a result type
/// for the given argument types, without executing anything) and
/// `invoke` runs at call time, writing the result into `out`.
pub trait NativeMethod {
    fn check(&self, args: &[TypeDesc]) -> Result<TypeDesc, String>;
    fn invoke(&self, recv: Option<&Value>, args: &[Value], out: &mut Value) -> Result<(), String>;
}

/// Host callback invoked immediately before a script reads a field of
/// an instance of the registered class, so lazily-maintained host state
/// can be flushed into script-visible fields.
pub trait FieldRefresh {
    fn refresh(&self, instance: &mut Instance);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ty::TypeKind;
    use std::cell::Cell;
    use std::rc::Rc;

    struct Doubler;

    impl NativeMethod for Doubler {
        fn check(&self, args: &[TypeDesc]) -> Result<TypeDesc, String> {
            match args {
                [one] if one.kind == TypeKind::Int => Ok(TypeDesc::int()),
                _ => Err("expected a single int".to_string()),
            }
        }

        fn invoke(
            &self,
            _recv: Option<&Value>,
            args: &[Value],
            out: &mut Value,
        ) -> Result<(), String> {
            match args {
                [Value::Int(n)] => {
                    *out = Value::Int(n * 2);
                    Ok(())
                }
                _ => Err("expected a single int".to_string()),
            }
        }
    }

    #[test]
    fn test_check_and_invoke_pair() {
        let native = Doubler;
        assert_eq!(native.check(&[TypeDesc::int()]).unwrap(), TypeDesc::int());
        assert!(native.check(&[TypeDesc::str()]).is_err());

        let mut out = Value::Null;
        native.invoke(None, &[Value::Int(21)], &mut out).unwrap();
        assert_eq!(out, Value::Int(42));
    }

    #[test]
    fn test_refresh_hook_counts_invocations() {
        struct CountingHook(Rc<Cell<u32>>);
        impl FieldRefresh for CountingHook {
            fn refresh(&self, instance: &mut Instance) {
                self.0.set(self.0.get() + 1);
                instance.fields[0] = Value::Int(self.0.get() as i64);
            }
        }

        let count = Rc::new(Cell::new(0));
        let hook = CountingHook(count.clone());
        let mut instance = Instance {
            class: crate::engine::ClassId(0),
            fields: vec![Value::Uninit],
        };
        hook.refresh(&mut instance);
        hook.refresh(&mut instance);
        assert_eq!(count.get(), 2);
        assert_eq!(instance.fields[0], Value::Int(2));
    }
}

use std::cell::Cell;
use std::rc::Rc;

use tickscript::engine::persist::{load_invocation, save_invocation};
use tickscript::engine::registry::DeclFlags;
use tickscript::{
    Engine, ErrorKind, FieldRefresh, Instance, Invocation, NativeMethod, Outcome, ProgramId,
    TypeDesc, TypeKind, Value,
};

fn compile(engine: &mut Engine, name: &str, source: &str) -> ProgramId {
    let _ = env_logger::builder().is_test(true).try_init();
    match engine.compile(name, source) {
        Ok(program) => program,
        Err(errors) => panic!(
            "compilation of `{}` failed:\n{}",
            name,
            tickscript::format_errors(&errors, name, source)
        ),
    }
}

/// Tick an invocation until it settles, a small budget per tick so
/// suspension paths actually run.
fn run(engine: &mut Engine, inv: &mut Invocation, budget: u32) -> Outcome {
    for _ in 0..10_000 {
        match engine.step(inv, budget) {
            Outcome::Suspended => continue,
            done => return done,
        }
    }
    panic!("invocation did not settle");
}

fn run_entry(engine: &mut Engine, program: ProgramId, name: &str, args: Vec<Value>) -> Outcome {
    let mut inv = engine.invoke(program, name, args).unwrap();
    run(engine, &mut inv, 64)
}

#[test]
fn test_arithmetic_entry_call() {
    let mut engine = Engine::new();
    let prog = compile(
        &mut engine,
        "unit",
        "int add(int a, int b) { return a + b * 10; }",
    );
    let out = run_entry(&mut engine, prog, "add", vec![Value::Int(2), Value::Int(3)]);
    assert_eq!(out, Outcome::Completed(Value::Int(32)));
}

#[test]
fn test_overload_picks_cheapest_conversion() {
    let mut engine = Engine::new();
    let prog = compile(
        &mut engine,
        "unit",
        r#"
        int pick(int a) { return 1; }
        int pick(float a) { return 2; }
        int main() { return pick(1.5); }
        "#,
    );
    let out = run_entry(&mut engine, prog, "main", vec![]);
    assert_eq!(out, Outcome::Completed(Value::Int(2)));
}

#[test]
fn test_trailing_default_fills_missing_actual() {
    let mut engine = Engine::new();
    let prog = compile(
        &mut engine,
        "unit",
        r#"
        int add(int a, int b = 10) { return a + b; }
        int main() { return add(5); }
        "#,
    );
    let out = run_entry(&mut engine, prog, "main", vec![]);
    assert_eq!(out, Outcome::Completed(Value::Int(15)));
}

#[test]
fn test_while_loop_suspends_and_resumes() {
    let mut engine = Engine::new();
    let prog = compile(
        &mut engine,
        "unit",
        r#"
        int count(int n) {
            int i = 0;
            int total = 0;
            while (i < n) {
                total = total + i;
                i = i + 1;
            }
            return total;
        }
        "#,
    );
    let mut inv = engine.invoke(prog, "count", vec![Value::Int(10)]).unwrap();
    let mut suspensions = 0;
    let out = loop {
        match engine.step(&mut inv, 5) {
            Outcome::Suspended => suspensions += 1,
            done => break done,
        }
        assert!(suspensions < 10_000, "loop never finished");
    };
    assert_eq!(out, Outcome::Completed(Value::Int(45)));
    assert!(suspensions > 0, "budget 5 should not finish in one tick");
    assert!(inv.is_finished());
}

#[test]
fn test_committed_effects_never_rerun_on_resume() {
    let mut engine = Engine::new();
    let prog = compile(
        &mut engine,
        "unit",
        r#"
        class Tally {
            static int calls = 0;
        }
        int bump() {
            Tally.calls = Tally.calls + 1;
            return Tally.calls;
        }
        int use(int a, int x = bump()) { return x; }
        int main() { return use(1); }
        "#,
    );
    let mut inv = engine.invoke(prog, "main", vec![]).unwrap();
    // one sub-step per tick: the effectful default suspends mid-flight
    // many times, yet its body must run exactly once
    let out = run(&mut engine, &mut inv, 1);
    assert_eq!(out, Outcome::Completed(Value::Int(1)));

    let tally = engine.registry().find("Tally").unwrap();
    let (defining, field) = engine.registry().field(tally, "calls").unwrap();
    let index = field.index;
    assert_eq!(
        engine.registry().static_get(defining, index),
        Some(Value::Int(1))
    );
}

#[test]
fn test_divide_by_zero_fails_invocation() {
    let mut engine = Engine::new();
    let prog = compile(&mut engine, "unit", "int f(int n) { return 1 / n; }");
    let out = run_entry(&mut engine, prog, "f", vec![Value::Int(0)]);
    let Outcome::Failed(err) = out else {
        panic!("expected failure, got {:?}", out);
    };
    assert_eq!(err.kind, ErrorKind::DivideByZero);
}

#[test]
fn test_reading_uninitialized_local_fails() {
    let mut engine = Engine::new();
    let prog = compile(&mut engine, "unit", "int f() { int x; return x; }");
    let out = run_entry(&mut engine, prog, "f", vec![]);
    let Outcome::Failed(err) = out else {
        panic!("expected failure, got {:?}", out);
    };
    assert_eq!(err.kind, ErrorKind::UseOfUninitialized);
}

#[test]
fn test_null_reference_field_read_fails() {
    let mut engine = Engine::new();
    let prog = compile(
        &mut engine,
        "unit",
        r#"
        class Box { int v; }
        int f() {
            Box b;
            return b.v;
        }
        "#,
    );
    let out = run_entry(&mut engine, prog, "f", vec![]);
    let Outcome::Failed(err) = out else {
        panic!("expected failure, got {:?}", out);
    };
    assert_eq!(err.kind, ErrorKind::NullDereference);
}

#[test]
fn test_index_out_of_bounds_fails() {
    let mut engine = Engine::new();
    let prog = compile(
        &mut engine,
        "unit",
        r#"
        int f() {
            int a[3];
            return a[5];
        }
        "#,
    );
    let out = run_entry(&mut engine, prog, "f", vec![]);
    let Outcome::Failed(err) = out else {
        panic!("expected failure, got {:?}", out);
    };
    assert_eq!(err.kind, ErrorKind::IndexOutOfBounds { index: 5, len: 3 });
}

#[test]
fn test_object_construction_and_methods() {
    let mut engine = Engine::new();
    let prog = compile(
        &mut engine,
        "unit",
        r#"
        class Counter {
            int value;
            public void bump(int by) { value = value + by; }
            public int read() { return value; }
        }
        int f() {
            Counter c;
            c = new Counter;
            c.value = 0;
            c.bump(3);
            c.bump(4);
            return c.read();
        }
        "#,
    );
    let out = run_entry(&mut engine, prog, "f", vec![]);
    assert_eq!(out, Outcome::Completed(Value::Int(7)));
}

#[test]
fn test_super_call_reaches_parent_method() {
    let mut engine = Engine::new();
    let prog = compile(
        &mut engine,
        "unit",
        r#"
        class Base {
            public int v() { return 1; }
        }
        class Derived extends Base {
            public int v() { return super.v() + 1; }
        }
        int f() {
            Derived d;
            d = new Derived;
            return d.v();
        }
        "#,
    );
    let out = run_entry(&mut engine, prog, "f", vec![]);
    assert_eq!(out, Outcome::Completed(Value::Int(2)));
}

#[test]
fn test_intrinsic_assignment_copies() {
    let mut engine = Engine::new();
    let prog = compile(
        &mut engine,
        "unit",
        r#"
        intrinsic class Point { int x; }
        int f() {
            Point a;
            Point b;
            a.x = 1;
            b = a;
            b.x = 5;
            return a.x;
        }
        "#,
    );
    let out = run_entry(&mut engine, prog, "f", vec![]);
    assert_eq!(out, Outcome::Completed(Value::Int(1)));
}

#[test]
fn test_object_assignment_shares() {
    let mut engine = Engine::new();
    let prog = compile(
        &mut engine,
        "unit",
        r#"
        class Cell { int v; }
        int f() {
            Cell a;
            Cell b;
            a = new Cell;
            a.v = 1;
            b = a;
            b.v = 5;
            return a.v;
        }
        "#,
    );
    let out = run_entry(&mut engine, prog, "f", vec![]);
    assert_eq!(out, Outcome::Completed(Value::Int(5)));
}

#[test]
fn test_synchronized_lock_blocks_other_program() {
    let mut engine = Engine::new();
    let prog_a = compile(
        &mut engine,
        "a",
        r#"
        class Gate {
            public static synchronized int spin(int n) {
                int i = 0;
                while (i < n) { i = i + 1; }
                return i;
            }
        }
        int run(int n) { return Gate.spin(n); }
        "#,
    );
    let prog_b = compile(&mut engine, "b", "int poke(int n) { return Gate.spin(n); }");

    let mut inv_a = engine.invoke(prog_a, "run", vec![Value::Int(50)]).unwrap();
    // enough budget to enter spin and acquire the lock, not to finish
    assert_eq!(engine.step(&mut inv_a, 5), Outcome::Suspended);
    let gate = engine.registry().find("Gate").unwrap();
    assert_eq!(engine.registry().lock_state(gate).owner, Some(prog_a));

    // the other program cannot enter however large its budget
    let mut inv_b = engine.invoke(prog_b, "poke", vec![Value::Int(1)]).unwrap();
    assert_eq!(engine.step(&mut inv_b, 1000), Outcome::Suspended);
    assert_eq!(engine.step(&mut inv_b, 1000), Outcome::Suspended);

    let out = run(&mut engine, &mut inv_a, 64);
    assert_eq!(out, Outcome::Completed(Value::Int(50)));
    assert_eq!(engine.registry().lock_state(gate).owner, None);

    let out = run(&mut engine, &mut inv_b, 64);
    assert_eq!(out, Outcome::Completed(Value::Int(1)));
}

#[test]
fn test_abort_releases_held_locks() {
    let mut engine = Engine::new();
    let prog_a = compile(
        &mut engine,
        "a",
        r#"
        class Gate {
            public static synchronized int spin(int n) {
                int i = 0;
                while (i < n) { i = i + 1; }
                return i;
            }
        }
        int run(int n) { return Gate.spin(n); }
        "#,
    );
    let prog_b = compile(&mut engine, "b", "int poke(int n) { return Gate.spin(n); }");

    let mut inv_a = engine.invoke(prog_a, "run", vec![Value::Int(50)]).unwrap();
    assert_eq!(engine.step(&mut inv_a, 5), Outcome::Suspended);
    let gate = engine.registry().find("Gate").unwrap();
    assert_eq!(engine.registry().lock_state(gate).owner, Some(prog_a));

    engine.abort(&mut inv_a);
    assert_eq!(engine.registry().lock_state(gate).owner, None);

    let out = run_entry(&mut engine, prog_b, "poke", vec![Value::Int(1)]);
    assert_eq!(out, Outcome::Completed(Value::Int(1)));
}

#[test]
fn test_runtime_error_releases_held_locks() {
    let mut engine = Engine::new();
    let prog = compile(
        &mut engine,
        "unit",
        r#"
        class Gate {
            public static synchronized int boom() { return 1 / 0; }
        }
        int run() { return Gate.boom(); }
        "#,
    );
    let out = run_entry(&mut engine, prog, "run", vec![]);
    assert!(matches!(out, Outcome::Failed(_)));
    let gate = engine.registry().find("Gate").unwrap();
    assert_eq!(engine.registry().lock_state(gate).owner, None);
}

#[test]
fn test_cross_unit_call_and_error_respan() {
    let mut engine = Engine::new();
    compile(&mut engine, "lib", "public int boom() { return 1 / 0; }");
    let app_src = "int call() { return boom(); }";
    let prog_app = compile(&mut engine, "app", app_src);

    let out = run_entry(&mut engine, prog_app, "call", vec![]);
    let Outcome::Failed(err) = out else {
        panic!("expected failure, got {:?}", out);
    };
    assert_eq!(err.kind, ErrorKind::DivideByZero);
    // the failure surfaces at the caller's call site, not inside lib
    assert_eq!(&app_src[err.span.clone()], "boom()");
}

#[test]
fn test_recompile_keeps_cross_unit_callers_working() {
    let mut engine = Engine::new();
    compile(&mut engine, "lib", "public int answer() { return 1; }");
    let app = compile(&mut engine, "app", "int call() { return answer(); }");
    assert_eq!(
        run_entry(&mut engine, app, "call", vec![]),
        Outcome::Completed(Value::Int(1))
    );

    // call sites cache function identities, so the already-compiled
    // caller keeps the retired implementation until it recompiles
    compile(&mut engine, "lib", "public int answer() { return 42; }");
    assert_eq!(
        run_entry(&mut engine, app, "call", vec![]),
        Outcome::Completed(Value::Int(1))
    );
    let app = compile(&mut engine, "app", "int call() { return answer(); }");
    assert_eq!(
        run_entry(&mut engine, app, "call", vec![]),
        Outcome::Completed(Value::Int(42))
    );
}

struct Doubler;

impl NativeMethod for Doubler {
    fn check(&self, args: &[TypeDesc]) -> Result<TypeDesc, String> {
        match args {
            [one] if one.kind == TypeKind::Int => Ok(TypeDesc::int()),
            _ => Err("twice expects a single int".to_string()),
        }
    }

    fn invoke(&self, _recv: Option<&Value>, args: &[Value], out: &mut Value) -> Result<(), String> {
        match args {
            [Value::Int(n)] => {
                *out = Value::Int(n * 2);
                Ok(())
            }
            _ => Err("twice expects a single int".to_string()),
        }
    }
}

#[test]
fn test_native_method_dispatch() {
    let mut engine = Engine::new();
    let host = engine
        .registry_mut()
        .create("Host", None, false, 0..0)
        .unwrap();
    engine
        .register_native_method(
            host,
            "twice",
            vec![TypeDesc::int()],
            TypeDesc::int(),
            Rc::new(Doubler),
        )
        .unwrap();

    let prog = compile(&mut engine, "unit", "int f(Host h) { return h.twice(21); }");
    let out = run_entry(
        &mut engine,
        prog,
        "f",
        vec![Value::object(Instance {
            class: host,
            fields: vec![],
        })],
    );
    assert_eq!(out, Outcome::Completed(Value::Int(42)));
}

#[test]
fn test_refresh_hook_runs_before_field_read() {
    struct SensorFeed(Rc<Cell<u32>>);
    impl FieldRefresh for SensorFeed {
        fn refresh(&self, instance: &mut Instance) {
            self.0.set(self.0.get() + 1);
            instance.fields[0] = Value::Int(7);
        }
    }

    let mut engine = Engine::new();
    let sensor = engine
        .registry_mut()
        .create("Sensor", None, false, 0..0)
        .unwrap();
    engine
        .registry_mut()
        .add_field(
            sensor,
            "reading",
            TypeDesc::int(),
            DeclFlags::PUBLIC,
            None,
            0..0,
        )
        .unwrap();
    let hits = Rc::new(Cell::new(0));
    engine.set_refresh_hook(sensor, Rc::new(SensorFeed(hits.clone())));

    let prog = compile(&mut engine, "unit", "int g(Sensor s) { return s.reading; }");
    let out = run_entry(
        &mut engine,
        prog,
        "g",
        vec![Value::object(Instance {
            class: sensor,
            fields: vec![Value::Uninit],
        })],
    );
    assert_eq!(out, Outcome::Completed(Value::Int(7)));
    assert_eq!(hits.get(), 1);
}

#[test]
fn test_static_state_survives_engine_restart() {
    let source = r#"
        class Settings { static int volume = 3; }
        void set(int v) { Settings.volume = v; }
        int get() { return Settings.volume; }
    "#;

    let mut engine = Engine::new();
    let prog = compile(&mut engine, "unit", source);
    assert_eq!(
        run_entry(&mut engine, prog, "set", vec![Value::Int(9)]),
        Outcome::Completed(Value::Null)
    );
    let saved = engine.save_statics();

    let mut fresh = Engine::new();
    let prog = compile(&mut fresh, "unit", source);
    assert_eq!(
        run_entry(&mut fresh, prog, "get", vec![]),
        Outcome::Completed(Value::Int(3))
    );
    fresh.restore_statics(&saved).unwrap();
    assert_eq!(
        run_entry(&mut fresh, prog, "get", vec![]),
        Outcome::Completed(Value::Int(9))
    );
}

#[test]
fn test_suspended_invocation_snapshot_round_trip() {
    let mut engine = Engine::new();
    let prog = compile(
        &mut engine,
        "unit",
        r#"
        int count(int n) {
            int i = 0;
            int total = 0;
            while (i < n) {
                total = total + i;
                i = i + 1;
            }
            return total;
        }
        "#,
    );
    let mut inv = engine.invoke(prog, "count", vec![Value::Int(10)]).unwrap();
    assert_eq!(engine.step(&mut inv, 7), Outcome::Suspended);

    let bytes = save_invocation(&inv).unwrap();
    let mut restored = load_invocation(&bytes).unwrap();
    let out = run(&mut engine, &mut restored, 64);
    assert_eq!(out, Outcome::Completed(Value::Int(45)));
}

pub mod error;
pub mod exec;
pub mod frame;
pub mod function;
pub mod native;
pub mod node;
pub mod params;
pub mod persist;
pub mod registry;
pub mod ty;
pub mod value;

use std::rc::Rc;

use log::debug;
use serde::{Deserialize, Serialize};

use error::{ErrorKind, ExecResult, ScriptError};
use frame::Frame;
use function::{FnBody, Function, FunctionTable, Param};
use native::{FieldRefresh, NativeMethod};
use node::{ExprKind, ExprNode};
use registry::{ClassRegistry, DeclFlags};
use ty::TypeDesc;
use value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClassId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FuncId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProgramId(pub u32);

/// One compiled script unit: its own declarations plus a handle into
/// the cross-unit public namespace held by the engine tables.
pub struct Program {
    pub id: ProgramId,
    pub name: String,
    pub funcs: Vec<FuncId>,
    pub classes: Vec<ClassId>,
}

/// What a scheduler tick produced for one invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed(Value),
    Suspended,
    Failed(ScriptError),
}

/// A live entry-function call. Holds everything needed to resume:
/// the frame tree carries progress markers and committed sub-results,
/// so a later tick picks up exactly where the budget ran out.
#[derive(Serialize, Deserialize)]
pub struct Invocation {
    pub program: ProgramId,
    pub func: FuncId,
    pub args: Vec<Value>,
    pub frame: Frame,
    finished: bool,
}

impl Invocation {
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

/// The engine: class registry, engine-wide function table, and the
/// loaded programs. Constructed and torn down explicitly; nothing is
/// process-global.
pub struct Engine {
    pub(crate) registry: ClassRegistry,
    pub(crate) funcs: FunctionTable,
    programs: Vec<Option<Program>>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Engine {
            registry: ClassRegistry::new(),
            funcs: FunctionTable::new(),
            programs: Vec::new(),
        }
    }

    pub fn registry(&self) -> &ClassRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ClassRegistry {
        &mut self.registry
    }

    pub fn functions(&self) -> &FunctionTable {
        &self.funcs
    }

    pub(crate) fn alloc_program(&mut self, name: &str) -> ProgramId {
        let id = ProgramId(self.programs.len() as u32);
        self.programs.push(Some(Program {
            id,
            name: name.to_string(),
            funcs: Vec::new(),
            classes: Vec::new(),
        }));
        id
    }

    pub fn program(&self, id: ProgramId) -> Option<&Program> {
        self.programs.get(id.0 as usize).and_then(Option::as_ref)
    }

    /// Which live program declared this class, if any.
    pub(crate) fn class_owner(&self, class: ClassId) -> Option<ProgramId> {
        self.programs
            .iter()
            .flatten()
            .find(|p| p.classes.contains(&class))
            .map(|p| p.id)
    }

    /// Retire an earlier compile of the same unit name ahead of a
    /// recompile: its functions are retracted and its classes purged to
    /// skeletons so the new compile can rebuild them in place.
    pub(crate) fn retire_unit(&mut self, name: &str) {
        let old = self
            .programs
            .iter()
            .flatten()
            .find(|p| p.name == name)
            .map(|p| p.id);
        let Some(old) = old else { return };
        let Some(program) = self.programs.get_mut(old.0 as usize).and_then(Option::take) else {
            return;
        };
        debug!("retiring program `{}` for recompilation", program.name);
        self.funcs.retract_unit(old);
        for class in program.classes {
            self.registry.purge(class);
        }
        self.registry.release_all_held_by(old);
    }

    pub(crate) fn program_mut(&mut self, id: ProgramId) -> Option<&mut Program> {
        self.programs.get_mut(id.0 as usize).and_then(Option::as_mut)
    }

    /// Compile a source unit into a program. On failure every
    /// collected diagnostic is returned; declarations that compiled
    /// cleanly before a failing sibling are discarded with the unit.
    pub fn compile(&mut self, name: &str, source: &str) -> Result<ProgramId, Vec<ScriptError>> {
        crate::compiler::compile_unit(self, name, source)
    }

    /// Unload a program: retract its public functions, unregister its
    /// classes, and release every lock it still holds.
    pub fn unload(&mut self, id: ProgramId) {
        let Some(program) = self.programs.get_mut(id.0 as usize).and_then(Option::take) else {
            return;
        };
        debug!("unloading program `{}`", program.name);
        self.funcs.retract_unit(id);
        for class in program.classes {
            self.registry.unregister(class);
        }
        self.registry.release_all_held_by(id);
    }

    /// Begin a call to a named entry function with host-supplied
    /// argument values. Overloads are resolved once, here; every later
    /// tick dispatches on the cached identity.
    pub fn invoke(
        &mut self,
        program: ProgramId,
        name: &str,
        args: Vec<Value>,
    ) -> ExecResult<Invocation> {
        let local = self
            .program(program)
            .map(|p| p.funcs.clone())
            .ok_or_else(|| ScriptError::new(ErrorKind::UndefinedCall(name.to_string()), 0..0))?;
        let arg_types: Vec<TypeDesc> = args.iter().map(Value::type_desc).collect();
        let func = self
            .funcs
            .resolve_free(&self.registry, &local, name, &arg_types, 0..0)?;
        debug!("invoking `{}` as {:?}", name, func);
        Ok(Invocation {
            program,
            func,
            args,
            frame: Frame::new(),
            finished: false,
        })
    }

    /// Run one scheduler tick of an invocation under a step budget.
    /// Suspended invocations keep their frame tree; a later call picks
    /// up at the stored markers without redoing any committed step.
    pub fn step(&mut self, inv: &mut Invocation, budget: u32) -> Outcome {
        if inv.finished {
            return Outcome::Completed(inv.frame.take_result());
        }
        let node = entry_node(&self.funcs, inv.func, &inv.args);
        let mut ctx = exec::ExecCtx {
            funcs: &self.funcs,
            registry: &mut self.registry,
            program: inv.program,
            budget,
        };
        // the synthetic root needs an activation for its constant
        // argument nodes; nothing in it is ever read or written
        let mut root = frame::Activation {
            func: inv.func,
            locals: Vec::new(),
            this: Value::Null,
            locked: None,
        };
        match exec::eval_expr(&mut ctx, &node, &mut inv.frame, &mut root) {
            Ok(true) => {
                inv.finished = true;
                Outcome::Completed(inv.frame.take_result())
            }
            Ok(false) => Outcome::Suspended,
            Err(err) => {
                inv.finished = true;
                self.registry.release_all_held_by(inv.program);
                Outcome::Failed(err)
            }
        }
    }

    /// Abort a suspended invocation, releasing any locks it holds.
    pub fn abort(&mut self, inv: &mut Invocation) {
        inv.finished = true;
        self.registry.release_all_held_by(inv.program);
    }

    /// Register a host-implemented method on a class. The capability's
    /// `check` participates in overload resolution at compile time.
    pub fn register_native_method(
        &mut self,
        class: ClassId,
        name: &str,
        params: Vec<TypeDesc>,
        ret: TypeDesc,
        native: Rc<dyn NativeMethod>,
    ) -> ExecResult<FuncId> {
        let params = params
            .into_iter()
            .enumerate()
            .map(|(i, ty)| Param {
                name: format!("a{}", i),
                ty,
                default: None,
                id: self.funcs.next_param_id(),
            })
            .collect();
        let id = self.funcs.add(Function {
            id: FuncId(0),
            name: name.to_string(),
            params,
            ret,
            flags: DeclFlags::PUBLIC | DeclFlags::EXTERN,
            owner: Some(class),
            unit: None,
            locals: 0,
            body: FnBody::Native(native),
            span: 0..0,
        });
        self.registry.add_method(class, id, &self.funcs, 0..0)?;
        Ok(id)
    }

    /// Register the per-class refresh hook run before instance-field
    /// reads.
    pub fn set_refresh_hook(&mut self, class: ClassId, hook: Rc<dyn FieldRefresh>) {
        self.registry.set_refresh(class, hook);
    }

    pub fn save_statics(&self) -> Vec<u8> {
        persist::save_statics(&self.registry)
    }

    pub fn restore_statics(&mut self, bytes: &[u8]) -> Result<(), persist::PersistError> {
        persist::restore_statics(&mut self.registry, bytes)
    }
}

/// Synthetic root node for an entry call: the host's argument values
/// appear as constants, so the regular call machinery binds, locks,
/// and resumes them like any scripted call.
fn entry_node(funcs: &FunctionTable, func: FuncId, args: &[Value]) -> ExprNode {
    let f = funcs.get(func);
    let args = args
        .iter()
        .map(|v| ExprNode {
            expr: ExprKind::Const(v.clone()),
            ty: v.type_desc(),
            span: f.span.clone(),
        })
        .collect();
    ExprNode {
        expr: ExprKind::Call {
            func,
            recv: None,
            args,
        },
        ty: f.ret.clone(),
        span: f.span.clone(),
    }
}

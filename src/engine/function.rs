use std::rc::Rc;

use log::trace;

use super::error::{ErrorKind, ExecResult, ScriptError};
use super::native::NativeMethod;
use super::node::{ExprNode, StmtNode};
use super::registry::{ClassRegistry, DeclFlags};
use super::ty::{TypeDesc, TypeKind};
use super::{ClassId, FuncId, ProgramId};
use crate::types::Span;

/// One formal parameter. The identity is assigned at compile time and
/// is what a resumed call uses to rebind its slot; it never changes.
#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub ty: TypeDesc,
    pub default: Option<ExprNode>,
    pub id: u32,
}

pub enum FnBody {
    Script(Vec<StmtNode>),
    Native(Rc<dyn NativeMethod>),
}

pub struct Function {
    /// Stable identity number: the index into the engine-wide table.
    /// Once assigned it never changes meaning; resumed and re-entrant
    /// calls dispatch through it without re-resolving overloads.
    pub id: FuncId,
    pub name: String,
    pub params: Vec<Param>,
    pub ret: TypeDesc,
    pub flags: DeclFlags,
    pub owner: Option<ClassId>,
    /// Compile unit that declared the function; `None` for
    /// host-registered natives.
    pub unit: Option<ProgramId>,
    /// Local slot count for script bodies, parameters included.
    pub locals: u32,
    pub body: FnBody,
    pub span: Span,
}

impl Function {
    pub fn is_public(&self) -> bool {
        self.flags.contains(DeclFlags::PUBLIC)
    }

    pub fn is_synchronized(&self) -> bool {
        self.flags.contains(DeclFlags::SYNCHRONIZED)
    }
}

/// Why a candidate was rejected; ranked so the most useful failure is
/// the one reported when nothing matches.
#[derive(Debug, Clone, PartialEq)]
enum Rejection {
    TooFew,
    TooMany,
    WrongType { message: String },
}

impl Rejection {
    fn usefulness(&self) -> u32 {
        match self {
            Rejection::TooFew | Rejection::TooMany => 0,
            Rejection::WrongType { .. } => 1,
        }
    }
}

/// Engine-wide function table. Identities index straight into it, so
/// identity dispatch is a single lookup with no re-scoring.
pub struct FunctionTable {
    funcs: Vec<Function>,
    public_list: Vec<FuncId>,
    next_param_id: u32,
}

impl Default for FunctionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionTable {
    pub fn new() -> Self {
        FunctionTable {
            funcs: Vec::new(),
            public_list: Vec::new(),
            next_param_id: 0,
        }
    }

    pub fn next_param_id(&mut self) -> u32 {
        let id = self.next_param_id;
        self.next_param_id += 1;
        id
    }

    /// Insert a function, assigning its identity.
    pub fn add(&mut self, mut func: Function) -> FuncId {
        let id = FuncId(self.funcs.len() as u32);
        func.id = id;
        if func.is_public() {
            self.public_list.push(id);
        }
        trace!("function `{}` registered as {:?}", func.name, id);
        self.funcs.push(func);
        id
    }

    pub fn get(&self, id: FuncId) -> &Function {
        &self.funcs[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: FuncId) -> &mut Function {
        &mut self.funcs[id.0 as usize]
    }

    /// Drop a unit's functions from the cross-unit public list. Their
    /// identities stay allocated; an identity is never reassigned.
    pub fn retract_unit(&mut self, unit: ProgramId) {
        self.public_list
            .retain(|&id| self.funcs[id.0 as usize].unit != Some(unit));
    }

    /// Resolve a free-function call: the local unit's declared
    /// functions first, then other units' public functions.
    pub fn resolve_free(
        &self,
        registry: &ClassRegistry,
        local: &[FuncId],
        name: &str,
        args: &[TypeDesc],
        span: Span,
    ) -> ExecResult<FuncId> {
        let mut candidates: Vec<FuncId> = local
            .iter()
            .copied()
            .filter(|&id| self.get(id).name == name)
            .collect();
        for &id in &self.public_list {
            if !candidates.contains(&id) && self.get(id).owner.is_none() && self.get(id).name == name
            {
                candidates.push(id);
            }
        }
        self.resolve_among(registry, &candidates, name, args, span)
    }

    /// Filter and score a candidate set; lowest signature distance
    /// wins and a tie at the lowest cost is an ambiguity error.
    pub fn resolve_among(
        &self,
        registry: &ClassRegistry,
        candidates: &[FuncId],
        name: &str,
        args: &[TypeDesc],
        span: Span,
    ) -> ExecResult<FuncId> {
        let mut best_cost = u32::MAX;
        let mut best: Vec<FuncId> = Vec::new();
        let mut best_rejection: Option<Rejection> = None;

        for &id in candidates {
            let func = self.get(id);
            match self.match_candidate(registry, func, args) {
                Ok(cost) => {
                    if cost < best_cost {
                        best_cost = cost;
                        best.clear();
                        best.push(id);
                    } else if cost == best_cost {
                        best.push(id);
                    }
                }
                Err(rejection) => {
                    // keep the most useful failure; only surfaced when
                    // nothing matches at all
                    let keep = match &best_rejection {
                        None => true,
                        Some(prev) => rejection.usefulness() > prev.usefulness(),
                    };
                    if keep {
                        best_rejection = Some(rejection);
                    }
                }
            }
        }

        match best.len() {
            0 => Err(ScriptError::new(
                match best_rejection {
                    Some(Rejection::TooFew) => ErrorKind::TooFewArguments(name.to_string()),
                    Some(Rejection::TooMany) => ErrorKind::TooManyArguments(name.to_string()),
                    Some(Rejection::WrongType { message }) => {
                        ErrorKind::WrongArgumentType(message)
                    }
                    None => ErrorKind::UndefinedCall(name.to_string()),
                },
                span,
            )),
            1 => {
                trace!(
                    "resolved `{}` to {:?} at cost {}",
                    name,
                    best[0],
                    best_cost
                );
                Ok(best[0])
            }
            _ => Err(ScriptError::new(
                ErrorKind::AmbiguousCall(name.to_string()),
                span,
            )),
        }
    }

    /// Signature distance for one candidate, or the reason it cannot
    /// take these arguments.
    fn match_candidate(
        &self,
        registry: &ClassRegistry,
        func: &Function,
        args: &[TypeDesc],
    ) -> Result<u32, Rejection> {
        if args.len() > func.params.len() {
            return Err(Rejection::TooMany);
        }
        let mut cost = 0u32;
        for (position, param) in func.params.iter().enumerate() {
            let Some(actual) = args.get(position) else {
                // a missing actual is allowed only when this and every
                // following formal carries a default
                if param.default.is_none() {
                    return Err(Rejection::TooFew);
                }
                continue;
            };
            if !param.ty.accepts(actual, registry) {
                return Err(Rejection::WrongType {
                    message: format!(
                        "argument {} of `{}` expects {}, got {}",
                        position + 1,
                        func.name,
                        param.ty.describe(registry),
                        actual.describe(registry)
                    ),
                });
            }
            cost += conversion_cost(registry, &param.ty, actual);
        }
        Ok(cost)
    }
}

/// Per-parameter conversion cost: 10 per inheritance hop for class
/// references, the ordinal delta for scalar widening, and ten times
/// the delta for scalar narrowing.
fn conversion_cost(registry: &ClassRegistry, formal: &TypeDesc, actual: &TypeDesc) -> u32 {
    if formal.kind == TypeKind::ClassRef {
        if actual.kind == TypeKind::Null {
            return 0;
        }
        if let (Some(from), Some(to)) = (actual.class, formal.class) {
            return 10 * registry.parent_hops(from, to).unwrap_or(0);
        }
        return 0;
    }
    if let (Some(f), Some(a)) = (formal.kind.ordinal(), actual.kind.ordinal()) {
        let delta = f - a;
        if delta >= 0 {
            return delta as u32;
        }
        return 10 * delta.unsigned_abs();
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> FunctionTable {
        FunctionTable::new()
    }

    fn make_func(
        table: &mut FunctionTable,
        name: &str,
        params: Vec<TypeDesc>,
        defaults_from: Option<usize>,
    ) -> FuncId {
        let params = params
            .into_iter()
            .enumerate()
            .map(|(i, ty)| Param {
                name: format!("p{}", i),
                ty,
                default: defaults_from.filter(|&d| i >= d).map(|_| {
                    ExprNode::constant(crate::engine::value::Value::Int(0), TypeDesc::int(), 0..0)
                }),
                id: table.next_param_id(),
            })
            .collect();
        table.add(Function {
            id: FuncId(0),
            name: name.to_string(),
            params,
            ret: TypeDesc::void(),
            flags: DeclFlags::PUBLIC,
            owner: None,
            unit: None,
            locals: 0,
            body: FnBody::Script(Vec::new()),
            span: 0..0,
        })
    }

    #[test]
    fn test_exact_beats_widening() {
        let reg = ClassRegistry::new();
        let mut t = table();
        let move_int = make_func(&mut t, "move", vec![TypeDesc::int()], None);
        let move_float = make_func(&mut t, "move", vec![TypeDesc::float()], None);

        let winner = t
            .resolve_free(&reg, &[move_int, move_float], "move", &[TypeDesc::int()], 0..0)
            .unwrap();
        assert_eq!(winner, move_int);

        let winner = t
            .resolve_free(
                &reg,
                &[move_int, move_float],
                "move",
                &[TypeDesc::float()],
                0..0,
            )
            .unwrap();
        assert_eq!(winner, move_float);
    }

    #[test]
    fn test_widening_preferred_over_narrowing() {
        let reg = ClassRegistry::new();
        let mut t = table();
        // int actual: float formal costs 1 (widen), bool formal costs 10 (narrow)
        let to_float = make_func(&mut t, "f", vec![TypeDesc::float()], None);
        let to_bool = make_func(&mut t, "f", vec![TypeDesc::bool()], None);
        let winner = t
            .resolve_free(&reg, &[to_bool, to_float], "f", &[TypeDesc::int()], 0..0)
            .unwrap();
        assert_eq!(winner, to_float);
    }

    #[test]
    fn test_inheritance_hop_cost() {
        let mut reg = ClassRegistry::new();
        let base = reg.create("Base", None, false, 0..0).unwrap();
        let mid = reg.create("Mid", Some(base), false, 0..0).unwrap();
        let leaf = reg.create("Leaf", Some(mid), false, 0..0).unwrap();

        let mut t = table();
        let takes_base = make_func(&mut t, "g", vec![TypeDesc::class_ref(base)], None);
        let takes_mid = make_func(&mut t, "g", vec![TypeDesc::class_ref(mid)], None);

        // Leaf actual: Mid is 1 hop (cost 10), Base is 2 hops (cost 20)
        let winner = t
            .resolve_free(
                &reg,
                &[takes_base, takes_mid],
                "g",
                &[TypeDesc::class_ref(leaf)],
                0..0,
            )
            .unwrap();
        assert_eq!(winner, takes_mid);
    }

    #[test]
    fn test_engineered_tie_is_ambiguous() {
        let reg = ClassRegistry::new();
        let mut t = table();
        // both cost 1 for an int actual: (float, int) and (int, float)
        let a = make_func(&mut t, "h", vec![TypeDesc::float(), TypeDesc::int()], None);
        let b = make_func(&mut t, "h", vec![TypeDesc::int(), TypeDesc::float()], None);
        let err = t
            .resolve_free(
                &reg,
                &[a, b],
                "h",
                &[TypeDesc::int(), TypeDesc::int()],
                0..0,
            )
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::AmbiguousCall("h".into()));
    }

    #[test]
    fn test_defaults_allow_missing_trailing_actuals() {
        let reg = ClassRegistry::new();
        let mut t = table();
        let f = make_func(
            &mut t,
            "d",
            vec![TypeDesc::int(), TypeDesc::int(), TypeDesc::int()],
            Some(1),
        );
        assert_eq!(
            t.resolve_free(&reg, &[f], "d", &[TypeDesc::int()], 0..0).unwrap(),
            f
        );
        // missing a non-defaulted formal
        let err = t.resolve_free(&reg, &[f], "d", &[], 0..0).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TooFewArguments("d".into()));
    }

    #[test]
    fn test_most_useful_failure_reported() {
        let reg = ClassRegistry::new();
        let mut t = table();
        let one = make_func(&mut t, "m", vec![TypeDesc::int()], None);
        let two = make_func(&mut t, "m", vec![TypeDesc::str(), TypeDesc::str()], None);
        // two args of wrong type: the arity failure on `one` is less
        // useful than the type failure on `two`
        let err = t
            .resolve_free(
                &reg,
                &[one, two],
                "m",
                &[TypeDesc::int(), TypeDesc::int()],
                0..0,
            )
            .unwrap_err();
        let ErrorKind::WrongArgumentType(message) = err.kind else {
            panic!("expected a wrong-argument-type failure");
        };
        // the failing argument is named in the message itself
        assert!(message.contains("argument 1"));
    }

    #[test]
    fn test_undefined_call_when_no_name_matches() {
        let reg = ClassRegistry::new();
        let t = table();
        let err = t.resolve_free(&reg, &[], "ghost", &[], 5..10).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UndefinedCall("ghost".into()));
        assert_eq!(err.span, 5..10);
    }

    #[test]
    fn test_identity_dispatch_is_direct() {
        let mut t = table();
        let f = make_func(&mut t, "x", vec![], None);
        let g = make_func(&mut t, "y", vec![], None);
        assert_eq!(t.get(f).name, "x");
        assert_eq!(t.get(g).name, "y");
        assert_eq!(t.get(g).id, g);
    }
}

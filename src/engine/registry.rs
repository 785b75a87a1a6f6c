use std::collections::HashMap;
use std::rc::Rc;

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use super::error::{ErrorKind, ExecResult, ScriptError};
use super::function::FunctionTable;
use super::native::FieldRefresh;
use super::ty::{TypeDesc, TypeKind};
use super::value::{Instance, Value};
use super::{ClassId, FuncId, ProgramId};
use crate::types::Span;

bitflags::bitflags! {
    /// Declaration modifiers shared by fields and functions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct DeclFlags: u8 {
        const PUBLIC       = 1 << 0;
        const PROTECTED    = 1 << 1;
        const PRIVATE      = 1 << 2;
        const STATIC       = 1 << 3;
        const SYNCHRONIZED = 1 << 4;
        const EXTERN       = 1 << 5;
    }
}

#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub ty: TypeDesc,
    pub flags: DeclFlags,
    /// Unique within the inheritance chain; a child's indices start
    /// where the parent's end.
    pub index: u32,
    /// Constant initializer, applied at instantiation (instance
    /// fields) or at class compilation (static fields).
    pub init: Option<Value>,
}

/// Owner-reentrant class lock backing synchronized methods. There is
/// no blocking: acquisition either succeeds immediately or the caller
/// yields and retries on a later tick.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ClassLock {
    pub owner: Option<ProgramId>,
    pub count: u32,
}

pub struct Class {
    pub name: String,
    pub parent: Option<ClassId>,
    pub intrinsic: bool,
    /// Own fields only; `index` continues the chain.
    pub fields: Vec<Field>,
    pub first_field: u32,
    /// Own methods in declaration order.
    pub methods: Vec<FuncId>,
    /// Static storage, keyed by field index on the defining class.
    pub statics: HashMap<u32, Value>,
    pub lock: ClassLock,
    pub refresh: Option<Rc<dyn FieldRefresh>>,
}

impl Class {
    fn new(name: String) -> Self {
        Class {
            name,
            parent: None,
            intrinsic: false,
            fields: Vec::new(),
            first_field: 0,
            methods: Vec::new(),
            statics: HashMap::new(),
            lock: ClassLock::default(),
            refresh: None,
        }
    }
}

/// Owns every compiled class. Constructed explicitly and passed by
/// reference into compile and execute calls; there is no ambient
/// global registry.
pub struct ClassRegistry {
    classes: Vec<Class>,
    by_name: HashMap<String, ClassId>,
}

impl Default for ClassRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassRegistry {
    pub fn new() -> Self {
        ClassRegistry {
            classes: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    pub fn create(
        &mut self,
        name: &str,
        parent: Option<ClassId>,
        intrinsic: bool,
        span: Span,
    ) -> ExecResult<ClassId> {
        if self.by_name.contains_key(name) {
            return Err(ScriptError::new(
                ErrorKind::Redefinition(name.to_string()),
                span,
            ));
        }
        let id = ClassId(self.classes.len() as u32);
        let mut class = Class::new(name.to_string());
        class.intrinsic = intrinsic;
        if let Some(parent) = parent {
            class.parent = Some(parent);
            class.first_field = self.total_fields(parent);
        }
        self.classes.push(class);
        self.by_name.insert(name.to_string(), id);
        debug!("registered class `{}` as {:?}", name, id);
        Ok(id)
    }

    pub fn find(&self, name: &str) -> Option<ClassId> {
        self.by_name.get(name).copied()
    }

    pub fn get(&self, id: ClassId) -> &Class {
        &self.classes[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: ClassId) -> &mut Class {
        &mut self.classes[id.0 as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = (ClassId, &Class)> {
        self.classes
            .iter()
            .enumerate()
            .map(|(i, c)| (ClassId(i as u32), c))
    }

    /// Set parent and recompute the start of the own-field index space.
    /// Rejects inheritance cycles.
    pub fn set_parent(&mut self, id: ClassId, parent: Option<ClassId>, span: Span) -> ExecResult<()> {
        if let Some(parent) = parent {
            let mut walk = Some(parent);
            while let Some(current) = walk {
                if current == id {
                    let name = self.get(id).name.clone();
                    return Err(ScriptError::new(
                        ErrorKind::MalformedClassHeader(format!(
                            "inheritance cycle through `{}`",
                            name
                        )),
                        span,
                    ));
                }
                walk = self.get(current).parent;
            }
        }
        let first_field = parent.map(|p| self.total_fields(p)).unwrap_or(0);
        let class = self.get_mut(id);
        class.parent = parent;
        class.first_field = first_field;
        Ok(())
    }

    /// Ancestor test: true when `b` is `a` or a proper ancestor of `a`.
    pub fn is_child_of(&self, a: ClassId, b: ClassId) -> bool {
        let mut walk = Some(a);
        while let Some(current) = walk {
            if current == b {
                return true;
            }
            walk = self.get(current).parent;
        }
        false
    }

    /// Inheritance distance from `from` up to `to`; `None` when `to`
    /// is not on the ancestor chain.
    pub fn parent_hops(&self, from: ClassId, to: ClassId) -> Option<u32> {
        let mut hops = 0;
        let mut walk = Some(from);
        while let Some(current) = walk {
            if current == to {
                return Some(hops);
            }
            hops += 1;
            walk = self.get(current).parent;
        }
        None
    }

    /// Total field count of the whole chain ending at `id`.
    pub fn total_fields(&self, id: ClassId) -> u32 {
        let class = self.get(id);
        class.first_field + class.fields.len() as u32
    }

    pub fn add_field(
        &mut self,
        id: ClassId,
        name: &str,
        ty: TypeDesc,
        flags: DeclFlags,
        init: Option<Value>,
        span: Span,
    ) -> ExecResult<u32> {
        if self.get(id).name == name || self.field(id, name).is_some() {
            return Err(ScriptError::new(
                ErrorKind::Redefinition(name.to_string()),
                span,
            ));
        }
        let index = self.total_fields(id);
        let is_static = flags.contains(DeclFlags::STATIC);
        let class = self.get_mut(id);
        class.fields.push(Field {
            name: name.to_string(),
            ty: ty.clone(),
            flags,
            index,
            init: init.clone(),
        });
        if is_static {
            let initial = init.unwrap_or_else(|| default_value(&ty));
            class.statics.insert(index, initial);
        }
        Ok(index)
    }

    /// Find a field by name anywhere on the chain, returning its
    /// defining class.
    pub fn field(&self, id: ClassId, name: &str) -> Option<(ClassId, &Field)> {
        let mut walk = Some(id);
        while let Some(current) = walk {
            let class = self.get(current);
            if let Some(field) = class.fields.iter().find(|f| f.name == name) {
                return Some((current, field));
            }
            walk = class.parent;
        }
        None
    }

    pub fn add_method(
        &mut self,
        id: ClassId,
        func: FuncId,
        funcs: &FunctionTable,
        span: Span,
    ) -> ExecResult<()> {
        let adding = funcs.get(func);
        for &existing in &self.get(id).methods {
            let m = funcs.get(existing);
            if m.name == adding.name
                && m.params.len() == adding.params.len()
                && m.params
                    .iter()
                    .zip(&adding.params)
                    .all(|(a, b)| a.ty == b.ty)
            {
                return Err(ScriptError::new(
                    ErrorKind::Redefinition(adding.name.clone()),
                    span,
                ));
            }
        }
        self.get_mut(id).methods.push(func);
        Ok(())
    }

    /// Method resolution per class: the receiver class's own methods
    /// are searched first; the parent is consulted only when the name
    /// is locally undeclared. A local declaration with an incompatible
    /// signature is reported as its own error, never silently skipped
    /// in favor of a parent overload.
    pub fn resolve_method(
        &self,
        funcs: &FunctionTable,
        id: ClassId,
        name: &str,
        args: &[TypeDesc],
        span: Span,
    ) -> ExecResult<FuncId> {
        let mut walk = Some(id);
        while let Some(current) = walk {
            let class = self.get(current);
            let local: Vec<FuncId> = class
                .methods
                .iter()
                .copied()
                .filter(|&m| funcs.get(m).name == name)
                .collect();
            if !local.is_empty() {
                return funcs.resolve_among(self, &local, name, args, span);
            }
            walk = class.parent;
        }
        Err(ScriptError::new(
            ErrorKind::UndefinedCall(name.to_string()),
            span,
        ))
    }

    /// Reset a class to a header-only skeleton ahead of recompilation.
    /// Registry membership, the lock, and any host refresh hook are
    /// preserved.
    pub fn purge(&mut self, id: ClassId) {
        let class = self.get_mut(id);
        class.parent = None;
        class.intrinsic = false;
        class.fields.clear();
        class.first_field = 0;
        class.methods.clear();
        class.statics.clear();
        debug!("purged class `{}`", class.name);
    }

    /// Remove a class from name lookup and free its lock. The identity
    /// slot stays allocated; identities are never reused.
    pub fn unregister(&mut self, id: ClassId) {
        let name = self.get(id).name.clone();
        self.by_name.remove(&name);
        self.force_release(id);
        debug!("unregistered class `{}`", name);
    }

    pub fn set_refresh(&mut self, id: ClassId, hook: Rc<dyn FieldRefresh>) {
        self.get_mut(id).refresh = Some(hook);
    }

    /// First refresh hook found on the chain, if any.
    pub fn refresh_hook(&self, id: ClassId) -> Option<Rc<dyn FieldRefresh>> {
        let mut walk = Some(id);
        while let Some(current) = walk {
            let class = self.get(current);
            if let Some(hook) = &class.refresh {
                return Some(hook.clone());
            }
            walk = class.parent;
        }
        None
    }

    // ----- instances -----

    /// Build a fresh instance with the whole chain's fields, parent
    /// fields first, each set to its initializer or the type default.
    pub fn instantiate(&self, id: ClassId) -> Instance {
        let mut chain = Vec::new();
        let mut walk = Some(id);
        while let Some(current) = walk {
            chain.push(current);
            walk = self.get(current).parent;
        }
        let mut fields = Vec::with_capacity(self.total_fields(id) as usize);
        for &class_id in chain.iter().rev() {
            for field in &self.get(class_id).fields {
                let value = field
                    .init
                    .clone()
                    .unwrap_or_else(|| self.default_for(&field.ty));
                fields.push(value);
            }
        }
        Instance { class: id, fields }
    }

    /// Default value for a declared type: scalars start uninitialized,
    /// references and unbounded arrays start null, bounded arrays are
    /// allocated and filled, intrinsic instances are built recursively.
    pub fn default_for(&self, ty: &TypeDesc) -> Value {
        match ty.kind {
            TypeKind::ClassRef | TypeKind::Null => Value::Null,
            TypeKind::Array => match (ty.elem(), ty.bound) {
                (Some(elem), Some(n)) => {
                    Value::array(vec![self.element_default(elem); n as usize])
                }
                _ => Value::Null,
            },
            TypeKind::ClassValue => match ty.class {
                Some(class) => Value::Struct(Box::new(self.instantiate(class))),
                None => Value::Null,
            },
            _ => Value::Uninit,
        }
    }

    /// Fresh element value for an array allocation; unlike bare locals,
    /// allocated elements start at their zero value rather than uninit.
    pub fn element_default(&self, ty: &TypeDesc) -> Value {
        match ty.kind {
            TypeKind::Bool => Value::Bool(false),
            TypeKind::Int => Value::Int(0),
            TypeKind::Float => Value::Float(0.0),
            TypeKind::Str => Value::Str(String::new()),
            TypeKind::ClassValue => match ty.class {
                Some(class) => Value::Struct(Box::new(self.instantiate(class))),
                None => Value::Null,
            },
            _ => Value::Null,
        }
    }

    // ----- statics -----

    pub fn static_get(&self, id: ClassId, index: u32) -> Option<Value> {
        self.get(id).statics.get(&index).cloned()
    }

    pub fn static_set(&mut self, id: ClassId, index: u32, value: Value) {
        self.get_mut(id).statics.insert(index, value);
    }

    // ----- synchronized-method locks -----

    /// Non-blocking acquire: succeeds when the lock is free or already
    /// held by the same program (reentry), fails otherwise.
    pub fn try_acquire(&mut self, id: ClassId, program: ProgramId) -> bool {
        let class = self.get_mut(id);
        match class.lock.owner {
            None => {
                class.lock.owner = Some(program);
                class.lock.count = 1;
                trace!("{:?} acquired lock on `{}`", program, class.name);
                true
            }
            Some(owner) if owner == program => {
                class.lock.count += 1;
                true
            }
            Some(_) => false,
        }
    }

    /// Decrement the reentry counter; the lock frees at zero.
    pub fn release(&mut self, id: ClassId, program: ProgramId) {
        let class = self.get_mut(id);
        if class.lock.owner == Some(program) {
            class.lock.count = class.lock.count.saturating_sub(1);
            if class.lock.count == 0 {
                trace!("{:?} released lock on `{}`", program, class.name);
                class.lock.owner = None;
            }
        }
    }

    /// Zero the counter and free the lock outright, whatever its
    /// reentry depth. Abort cleanup depends on this exact behavior.
    pub fn force_release(&mut self, id: ClassId) {
        let class = self.get_mut(id);
        class.lock.count = 0;
        class.lock.owner = None;
    }

    /// Scan every registered class and force-release the locks held by
    /// one program, used on termination and abort.
    pub fn release_all_held_by(&mut self, program: ProgramId) {
        for class in &mut self.classes {
            if class.lock.owner == Some(program) {
                trace!("force-releasing `{}` held by {:?}", class.name, program);
                class.lock.count = 0;
                class.lock.owner = None;
            }
        }
    }

    pub fn lock_state(&self, id: ClassId) -> &ClassLock {
        &self.get(id).lock
    }
}

fn default_value(ty: &TypeDesc) -> Value {
    match ty.kind {
        TypeKind::ClassRef | TypeKind::Array | TypeKind::Null | TypeKind::ClassValue => Value::Null,
        _ => Value::Uninit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reg() -> ClassRegistry {
        ClassRegistry::new()
    }

    #[test]
    fn test_create_and_find() {
        let mut r = reg();
        let id = r.create("Entity", None, false, 0..0).unwrap();
        assert_eq!(r.find("Entity"), Some(id));
        assert_eq!(r.find("Nope"), None);
    }

    #[test]
    fn test_redefinition_rejected() {
        let mut r = reg();
        r.create("Entity", None, false, 0..0).unwrap();
        let err = r.create("Entity", None, false, 3..9).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Redefinition("Entity".into()));
        assert_eq!(err.span, 3..9);
    }

    #[test]
    fn test_is_child_of_chain() {
        let mut r = reg();
        let a = r.create("A", None, false, 0..0).unwrap();
        let b = r.create("B", Some(a), false, 0..0).unwrap();
        let c = r.create("C", Some(b), false, 0..0).unwrap();
        let other = r.create("Other", None, false, 0..0).unwrap();

        assert!(r.is_child_of(c, c));
        assert!(r.is_child_of(c, b));
        assert!(r.is_child_of(c, a));
        assert!(!r.is_child_of(a, c));
        assert!(!r.is_child_of(c, other));
        assert_eq!(r.parent_hops(c, a), Some(2));
        assert_eq!(r.parent_hops(c, c), Some(0));
        assert_eq!(r.parent_hops(a, c), None);
    }

    #[test]
    fn test_field_indices_continue_across_chain() {
        let mut r = reg();
        let entity = r.create("Entity", None, false, 0..0).unwrap();
        let id_index = r
            .add_field(entity, "id", TypeDesc::int(), DeclFlags::PUBLIC, None, 0..0)
            .unwrap();
        assert_eq!(id_index, 0);

        let vehicle = r.create("Vehicle", Some(entity), false, 0..0).unwrap();
        let speed_index = r
            .add_field(
                vehicle,
                "speed",
                TypeDesc::int(),
                DeclFlags::PUBLIC,
                None,
                0..0,
            )
            .unwrap();
        assert_eq!(speed_index, 1);
        assert_eq!(r.total_fields(vehicle), 2);
    }

    #[test]
    fn test_field_collision_with_parent_or_class_name() {
        let mut r = reg();
        let entity = r.create("Entity", None, false, 0..0).unwrap();
        r.add_field(entity, "id", TypeDesc::int(), DeclFlags::PUBLIC, None, 0..0)
            .unwrap();
        let vehicle = r.create("Vehicle", Some(entity), false, 0..0).unwrap();
        assert!(r
            .add_field(vehicle, "id", TypeDesc::int(), DeclFlags::PUBLIC, None, 0..0)
            .is_err());
        assert!(r
            .add_field(
                vehicle,
                "Vehicle",
                TypeDesc::int(),
                DeclFlags::PUBLIC,
                None,
                0..0
            )
            .is_err());
    }

    #[test]
    fn test_instantiate_defaults() {
        let mut r = reg();
        let entity = r.create("Entity", None, false, 0..0).unwrap();
        r.add_field(
            entity,
            "id",
            TypeDesc::int(),
            DeclFlags::PUBLIC,
            Some(Value::Int(7)),
            0..0,
        )
        .unwrap();
        r.add_field(entity, "name", TypeDesc::str(), DeclFlags::PUBLIC, None, 0..0)
            .unwrap();
        let inst = r.instantiate(entity);
        assert_eq!(inst.fields.len(), 2);
        assert_eq!(inst.fields[0], Value::Int(7));
        assert!(matches!(inst.fields[1], Value::Uninit));
    }

    #[test]
    fn test_purge_keeps_membership() {
        let mut r = reg();
        let entity = r.create("Entity", None, false, 0..0).unwrap();
        r.add_field(entity, "id", TypeDesc::int(), DeclFlags::STATIC, None, 0..0)
            .unwrap();
        r.purge(entity);
        assert_eq!(r.find("Entity"), Some(entity));
        assert!(r.get(entity).fields.is_empty());
        assert!(r.get(entity).statics.is_empty());
    }

    #[test]
    fn test_inheritance_cycle_rejected() {
        let mut r = reg();
        let a = r.create("A", None, false, 0..0).unwrap();
        let b = r.create("B", Some(a), false, 0..0).unwrap();
        let err = r.set_parent(a, Some(b), 1..2).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::MalformedClassHeader(_)));
    }

    #[test]
    fn test_lock_reentry_and_contention() {
        let mut r = reg();
        let class = r.create("Gun", None, false, 0..0).unwrap();
        let a = ProgramId(0);
        let b = ProgramId(1);

        assert!(r.try_acquire(class, a));
        assert!(r.try_acquire(class, a)); // reentry by the owner
        assert!(!r.try_acquire(class, b)); // contention fails, never blocks
        assert_eq!(r.lock_state(class).count, 2);

        r.release(class, a);
        assert!(!r.try_acquire(class, b)); // still held, count 1
        r.release(class, a);
        assert!(r.try_acquire(class, b)); // freed at zero
    }

    #[test]
    fn test_force_release_zeroes_counter() {
        let mut r = reg();
        let class = r.create("Gun", None, false, 0..0).unwrap();
        let a = ProgramId(0);
        assert!(r.try_acquire(class, a));
        assert!(r.try_acquire(class, a));
        assert!(r.try_acquire(class, a));
        r.force_release(class);
        assert_eq!(*r.lock_state(class), ClassLock::default());
        assert!(r.try_acquire(class, ProgramId(1)));
    }

    #[test]
    fn test_release_all_held_by_scans_every_class() {
        let mut r = reg();
        let c1 = r.create("A", None, false, 0..0).unwrap();
        let c2 = r.create("B", None, false, 0..0).unwrap();
        let c3 = r.create("C", None, false, 0..0).unwrap();
        let p = ProgramId(5);
        let q = ProgramId(6);
        r.try_acquire(c1, p);
        r.try_acquire(c2, q);
        r.try_acquire(c3, p);

        r.release_all_held_by(p);
        assert_eq!(r.lock_state(c1).owner, None);
        assert_eq!(r.lock_state(c2).owner, Some(q));
        assert_eq!(r.lock_state(c3).owner, None);
    }
}

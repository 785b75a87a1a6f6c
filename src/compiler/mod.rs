//! Two-pass class compilation and typed-tree building.
//!
//! A unit compiles in ordered passes over the parsed items: class
//! skeletons, class headers (parents, then fields in parent-first
//! order so field indices continue the chain), function signatures,
//! parameter defaults, and finally bodies. Declarations are compiled
//! best-effort: a failing declaration is recorded and its siblings
//! still compile, but any error fails the unit.

use std::collections::HashMap;

use log::debug;

use crate::engine::error::{ErrorKind, ExecResult, ScriptError};
use crate::engine::function::{FnBody, Function, FunctionTable, Param};
use crate::engine::node::{DeclNode, ExprKind, ExprNode, Place, StmtKind, StmtNode};
use crate::engine::params;
use crate::engine::registry::{ClassRegistry, DeclFlags};
use crate::engine::ty::{TypeDesc, TypeKind};
use crate::engine::value::Value;
use crate::engine::{ClassId, Engine, FuncId, ProgramId};
use crate::parser::ast::{
    BinaryOp, ClassDecl, Declarator, Expr, ExprS, FuncDecl, Item, Mods, Stmt, StmtS, TypeExpr,
    UnaryOp,
};
use crate::parser::parse_unit;
use crate::types::Span;

pub fn compile_unit(
    engine: &mut Engine,
    name: &str,
    source: &str,
) -> Result<ProgramId, Vec<ScriptError>> {
    debug!("compiling unit `{}`", name);
    let (items, parse_errors) = parse_unit(source);
    let mut errors: Vec<ScriptError> = parse_errors
        .into_iter()
        .map(|e| ScriptError::new(ErrorKind::SyntaxError(e.message), e.span))
        .collect();

    engine.retire_unit(name);
    let program = engine.alloc_program(name);

    let mut classes: Vec<&ClassDecl> = Vec::new();
    let mut free: Vec<&FuncDecl> = Vec::new();
    for item in &items {
        match item {
            Item::Class(c) => classes.push(c),
            Item::Func(f) => free.push(f),
        }
    }

    // skeletons, so classes can reference each other in any order
    let mut class_ids: Vec<Option<ClassId>> = Vec::with_capacity(classes.len());
    for decl in &classes {
        match declare_class(engine, decl) {
            Ok(id) => {
                if let Some(p) = engine.program_mut(program) {
                    p.classes.push(id);
                }
                class_ids.push(Some(id));
            }
            Err(e) => {
                errors.push(e);
                class_ids.push(None);
            }
        }
    }

    // headers in parent-first order, so a child's field indices start
    // where its parent's end
    for &i in &header_order(&classes, &class_ids) {
        let decl = classes[i];
        let Some(id) = class_ids[i] else { continue };
        if let Err(e) = compile_header(engine, id, decl) {
            errors.push(e);
        }
    }

    // signatures
    let mut to_build: Vec<(FuncId, &FuncDecl, Option<ClassId>)> = Vec::new();
    for (decl, id) in classes.iter().zip(&class_ids) {
        let Some(id) = *id else { continue };
        for method in &decl.methods {
            match declare_func(engine, program, Some(id), method) {
                Ok(fid) => {
                    if let Err(e) =
                        engine
                            .registry
                            .add_method(id, fid, &engine.funcs, method.name_span.clone())
                    {
                        errors.push(e);
                    } else {
                        to_build.push((fid, method, Some(id)));
                    }
                }
                Err(e) => errors.push(e),
            }
        }
    }
    for decl in &free {
        match declare_free(engine, program, decl) {
            Ok(fid) => to_build.push((fid, decl, None)),
            Err(e) => errors.push(e),
        }
    }

    let unit_funcs: Vec<FuncId> = engine
        .program(program)
        .map(|p| p.funcs.clone())
        .unwrap_or_default();

    // parameter defaults compile in a static context of the owner
    for (fid, decl, owner) in &to_build {
        for (i, p) in decl.params.iter().enumerate() {
            let Some(dexpr) = &p.default else { continue };
            let param_ty = engine.funcs.get(*fid).params[i].ty.clone();
            let compiled = {
                let mut cx = BodyCx::new(
                    &engine.funcs,
                    &engine.registry,
                    &unit_funcs,
                    *owner,
                    true,
                    TypeDesc::void(),
                );
                cx.infer(dexpr)
            };
            match compiled {
                Ok(node) => {
                    if !param_ty.accepts(&node.ty, &engine.registry) {
                        errors.push(ScriptError::new(
                            ErrorKind::TypeMismatch(format!(
                                "default for `{}` is {}, expected {}",
                                p.name,
                                node.ty.describe(&engine.registry),
                                param_ty.describe(&engine.registry)
                            )),
                            p.name_span.clone(),
                        ));
                        continue;
                    }
                    engine.funcs.get_mut(*fid).params[i].default = Some(node);
                }
                Err(e) => errors.push(e),
            }
        }
        if let Err(e) =
            params::check_default_ordering(&engine.funcs.get(*fid).params, decl.span.clone())
        {
            errors.push(e);
        }
    }

    // bodies
    for (fid, decl, owner) in &to_build {
        let func = engine.funcs.get(*fid);
        let is_static_cx = owner.is_none() || func.flags.contains(DeclFlags::STATIC);
        let ret = func.ret.clone();
        let param_tys: Vec<TypeDesc> = func.params.iter().map(|p| p.ty.clone()).collect();
        let compiled = {
            let mut cx = BodyCx::new(
                &engine.funcs,
                &engine.registry,
                &unit_funcs,
                *owner,
                is_static_cx,
                ret.clone(),
            );
            compile_body(&mut cx, decl, &param_tys, &ret)
        };
        match compiled {
            Ok((body, locals)) => {
                let func = engine.funcs.get_mut(*fid);
                func.body = FnBody::Script(body);
                func.locals = locals;
            }
            Err(e) => errors.push(e),
        }
    }

    if errors.is_empty() {
        debug!("unit `{}` compiled as {:?}", name, program);
        Ok(program)
    } else {
        engine.unload(program);
        Err(errors)
    }
}

fn declare_class(engine: &mut Engine, decl: &ClassDecl) -> ExecResult<ClassId> {
    if let Some(existing) = engine.registry.find(&decl.name) {
        if engine.class_owner(existing).is_some() {
            return Err(ScriptError::new(
                ErrorKind::Redefinition(decl.name.clone()),
                decl.name_span.clone(),
            ));
        }
        // orphaned skeleton from a retired compile: rebuild in place so
        // the class identity survives recompilation
        engine.registry.purge(existing);
        engine.registry.get_mut(existing).intrinsic = decl.intrinsic;
        return Ok(existing);
    }
    engine
        .registry
        .create(&decl.name, None, decl.intrinsic, decl.name_span.clone())
}

/// Indices of the unit's classes ordered parent-first. Classes whose
/// parent lives outside the unit are ready immediately; an in-unit
/// inheritance cycle leaves its members at the end, where `set_parent`
/// reports it.
fn header_order(classes: &[&ClassDecl], class_ids: &[Option<ClassId>]) -> Vec<usize> {
    let in_unit: HashMap<&str, usize> = classes
        .iter()
        .enumerate()
        .filter(|(i, _)| class_ids[*i].is_some())
        .map(|(i, c)| (c.name.as_str(), i))
        .collect();
    let mut order = Vec::with_capacity(classes.len());
    let mut placed = vec![false; classes.len()];
    loop {
        let mut progressed = false;
        for (i, decl) in classes.iter().enumerate() {
            if placed[i] || class_ids[i].is_none() {
                continue;
            }
            let ready = match &decl.parent {
                Some((pname, _)) => match in_unit.get(pname.as_str()) {
                    Some(&pi) => placed[pi],
                    None => true,
                },
                None => true,
            };
            if ready {
                order.push(i);
                placed[i] = true;
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }
    for (i, _) in classes.iter().enumerate() {
        if !placed[i] && class_ids[i].is_some() {
            order.push(i);
        }
    }
    order
}

fn compile_header(engine: &mut Engine, id: ClassId, decl: &ClassDecl) -> ExecResult<()> {
    if let Some((pname, pspan)) = &decl.parent {
        let parent = engine.registry.find(pname).ok_or_else(|| {
            ScriptError::new(ErrorKind::UndefinedType(pname.clone()), pspan.clone())
        })?;
        engine.registry.set_parent(id, Some(parent), pspan.clone())?;
    }
    for field in &decl.fields {
        let flags = flags_for(&field.mods, &field.span)?;
        let base = resolve_type(&engine.registry, &field.ty, &field.span)?;
        if base.kind == TypeKind::Void {
            return Err(ScriptError::new(
                ErrorKind::TypeMismatch("a field cannot be void".to_string()),
                field.span.clone(),
            ));
        }
        for d in &field.decls {
            let (ty, init) = field_declarator(engine, &base, d)?;
            engine
                .registry
                .add_field(id, &d.name, ty, flags, init, d.name_span.clone())?;
        }
    }
    Ok(())
}

/// A field declarator: `name`, `name = literal`, or `name[bound]`.
fn field_declarator(
    engine: &Engine,
    base: &TypeDesc,
    d: &Declarator,
) -> ExecResult<(TypeDesc, Option<Value>)> {
    if let Some(size) = &d.size {
        let bound = match const_literal(size) {
            Some(Value::Int(n)) if n > 0 => n as u32,
            _ => {
                return Err(ScriptError::new(
                    ErrorKind::TypeMismatch(
                        "field array bound must be a positive integer literal".to_string(),
                    ),
                    size.1.clone(),
                ))
            }
        };
        return Ok((TypeDesc::array(base.clone(), Some(bound)), None));
    }
    let Some(init) = &d.init else {
        return Ok((base.clone(), None));
    };
    let value = const_literal(init).ok_or_else(|| {
        ScriptError::new(
            ErrorKind::TypeMismatch("field initializer must be a constant literal".to_string()),
            init.1.clone(),
        )
    })?;
    if !base.accepts(&value.type_desc(), &engine.registry) {
        return Err(ScriptError::new(
            ErrorKind::TypeMismatch(format!(
                "initializer is {}, expected {}",
                value.type_desc().describe(&engine.registry),
                base.describe(&engine.registry)
            )),
            init.1.clone(),
        ));
    }
    Ok((base.clone(), Some(value.coerce_to(base.kind))))
}

fn declare_free(engine: &mut Engine, program: ProgramId, decl: &FuncDecl) -> ExecResult<FuncId> {
    // exact-signature duplicates within the unit are rejected here;
    // overlapping-but-distinct signatures are legitimate overloads
    let existing: Vec<FuncId> = engine
        .program(program)
        .map(|p| p.funcs.clone())
        .unwrap_or_default();
    let fid = declare_func(engine, program, None, decl)?;
    let new_func = engine.funcs.get(fid);
    for prior in existing {
        let p = engine.funcs.get(prior);
        if p.name == new_func.name
            && p.params.len() == new_func.params.len()
            && p.params
                .iter()
                .zip(&new_func.params)
                .all(|(a, b)| a.ty == b.ty)
        {
            return Err(ScriptError::new(
                ErrorKind::Redefinition(decl.name.clone()),
                decl.name_span.clone(),
            ));
        }
    }
    if let Some(p) = engine.program_mut(program) {
        p.funcs.push(fid);
    }
    Ok(fid)
}

fn declare_func(
    engine: &mut Engine,
    unit: ProgramId,
    owner: Option<ClassId>,
    decl: &FuncDecl,
) -> ExecResult<FuncId> {
    let flags = flags_for(&decl.mods, &decl.span)?;
    let ret = resolve_type(&engine.registry, &decl.ret, &decl.span)?;
    let mut param_list = Vec::with_capacity(decl.params.len());
    for p in &decl.params {
        let ty = resolve_type(&engine.registry, &p.ty, &p.name_span)?;
        if ty.kind == TypeKind::Void {
            return Err(ScriptError::new(
                ErrorKind::TypeMismatch("a parameter cannot be void".to_string()),
                p.name_span.clone(),
            ));
        }
        param_list.push(Param {
            name: p.name.clone(),
            ty,
            default: None,
            id: engine.funcs.next_param_id(),
        });
    }
    Ok(engine.funcs.add(Function {
        id: FuncId(0),
        name: decl.name.clone(),
        params: param_list,
        ret,
        flags,
        owner,
        unit: Some(unit),
        locals: 0,
        body: FnBody::Script(Vec::new()),
        span: decl.name_span.clone(),
    }))
}

fn flags_for(mods: &Mods, span: &Span) -> ExecResult<DeclFlags> {
    let visibilities = mods.public as u8 + mods.protected as u8 + mods.private as u8;
    if visibilities > 1 {
        return Err(ScriptError::new(
            ErrorKind::SyntaxError("conflicting visibility modifiers".to_string()),
            span.clone(),
        ));
    }
    let mut flags = DeclFlags::empty();
    if mods.public {
        flags |= DeclFlags::PUBLIC;
    }
    if mods.protected {
        flags |= DeclFlags::PROTECTED;
    }
    if mods.private {
        flags |= DeclFlags::PRIVATE;
    }
    if mods.is_static {
        flags |= DeclFlags::STATIC;
    }
    if mods.synchronized {
        flags |= DeclFlags::SYNCHRONIZED;
    }
    if mods.is_extern {
        flags |= DeclFlags::EXTERN;
    }
    Ok(flags)
}

fn resolve_type(registry: &ClassRegistry, ty: &TypeExpr, span: &Span) -> ExecResult<TypeDesc> {
    match ty {
        TypeExpr::Void => Ok(TypeDesc::void()),
        TypeExpr::Bool => Ok(TypeDesc::bool()),
        TypeExpr::Int => Ok(TypeDesc::int()),
        TypeExpr::Float => Ok(TypeDesc::float()),
        TypeExpr::Str => Ok(TypeDesc::str()),
        TypeExpr::Named(name) => {
            let class = registry
                .find(name)
                .ok_or_else(|| ScriptError::new(ErrorKind::UndefinedType(name.clone()), span.clone()))?;
            if registry.get(class).intrinsic {
                Ok(TypeDesc::class_value(class))
            } else {
                Ok(TypeDesc::class_ref(class))
            }
        }
        TypeExpr::Array { elem, bound } => {
            let elem = resolve_type(registry, elem, span)?;
            Ok(TypeDesc::array(elem, *bound))
        }
    }
}

fn const_literal(expr: &ExprS) -> Option<Value> {
    match &expr.0 {
        Expr::Int(n) => Some(Value::Int(*n)),
        Expr::Float(f) => Some(Value::Float(*f)),
        Expr::Str(s) => Some(Value::Str(s.clone())),
        Expr::Bool(b) => Some(Value::Bool(*b)),
        Expr::Null => Some(Value::Null),
        Expr::Unary {
            op: UnaryOp::Negate,
            expr,
        } => match const_literal(expr)? {
            Value::Int(n) => Some(Value::Int(-n)),
            Value::Float(f) => Some(Value::Float(-f)),
            _ => None,
        },
        _ => None,
    }
}

fn compile_body(
    cx: &mut BodyCx,
    decl: &FuncDecl,
    param_tys: &[TypeDesc],
    ret: &TypeDesc,
) -> ExecResult<(Vec<StmtNode>, u32)> {
    cx.enter_scope();
    for (p, ty) in decl.params.iter().zip(param_tys) {
        cx.define(&p.name, ty.clone(), &p.name_span)?;
    }
    let mut body = Vec::with_capacity(decl.body.len());
    for stmt in &decl.body {
        body.push(cx.lower_stmt(stmt)?);
    }
    if ret.kind != TypeKind::Void && !always_returns(&body) {
        return Err(ScriptError::new(
            ErrorKind::MissingReturn(decl.name.clone()),
            decl.name_span.clone(),
        ));
    }
    Ok((body, cx.next_slot))
}

fn always_returns(stmts: &[StmtNode]) -> bool {
    stmts.iter().any(stmt_returns)
}

fn stmt_returns(stmt: &StmtNode) -> bool {
    match &stmt.stmt {
        StmtKind::Return(_) => true,
        StmtKind::Block(body) => always_returns(body),
        StmtKind::If {
            then_body,
            else_body,
            ..
        } => !else_body.is_empty() && always_returns(then_body) && always_returns(else_body),
        _ => false,
    }
}

/// Per-function lowering context: resolved tables, the unit's own
/// function list for free-call resolution, and the scope stack. Local
/// slots are assigned once and never reused, so inner-scope locals
/// keep their identity across suspension.
struct BodyCx<'a> {
    funcs: &'a FunctionTable,
    registry: &'a ClassRegistry,
    unit_funcs: &'a [FuncId],
    current_class: Option<ClassId>,
    is_static: bool,
    ret: TypeDesc,
    scopes: Vec<HashMap<String, (u32, TypeDesc)>>,
    next_slot: u32,
}

impl<'a> BodyCx<'a> {
    fn new(
        funcs: &'a FunctionTable,
        registry: &'a ClassRegistry,
        unit_funcs: &'a [FuncId],
        current_class: Option<ClassId>,
        is_static: bool,
        ret: TypeDesc,
    ) -> Self {
        BodyCx {
            funcs,
            registry,
            unit_funcs,
            current_class,
            is_static,
            ret,
            scopes: Vec::new(),
            next_slot: 0,
        }
    }

    fn enter_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn exit_scope(&mut self) {
        self.scopes.pop();
    }

    fn define(&mut self, name: &str, ty: TypeDesc, span: &Span) -> ExecResult<u32> {
        if self
            .scopes
            .last()
            .is_some_and(|s| s.contains_key(name))
        {
            return Err(ScriptError::new(
                ErrorKind::Redefinition(name.to_string()),
                span.clone(),
            ));
        }
        let slot = self.next_slot;
        self.next_slot += 1;
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), (slot, ty));
        }
        Ok(slot)
    }

    fn lookup(&self, name: &str) -> Option<(u32, TypeDesc)> {
        self.scopes
            .iter()
            .rev()
            .find_map(|s| s.get(name).cloned())
    }

    fn this_ty(&self) -> TypeDesc {
        match self.current_class {
            Some(class) if self.registry.get(class).intrinsic => TypeDesc::class_value(class),
            Some(class) => TypeDesc::class_ref(class),
            None => TypeDesc::null(),
        }
    }

    fn this_node(&self, span: &Span) -> ExprNode {
        ExprNode {
            expr: ExprKind::This,
            ty: self.this_ty(),
            span: span.clone(),
        }
    }

    // ----- statements -----

    fn lower_stmt(&mut self, stmt: &StmtS) -> ExecResult<StmtNode> {
        let (stmt, span) = stmt;
        let lowered = match stmt {
            Stmt::Block(stmts) => {
                self.enter_scope();
                let mut body = Vec::with_capacity(stmts.len());
                for s in stmts {
                    match self.lower_stmt(s) {
                        Ok(node) => body.push(node),
                        Err(e) => {
                            self.exit_scope();
                            return Err(e);
                        }
                    }
                }
                self.exit_scope();
                StmtKind::Block(body)
            }
            Stmt::VarDecl { ty, decls } => self.lower_decl(ty, decls, span)?,
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let cond = self.lower_condition(condition)?;
                let then_body = vec![self.lower_stmt(then_branch)?];
                let else_body = match else_branch {
                    Some(e) => vec![self.lower_stmt(e)?],
                    None => Vec::new(),
                };
                StmtKind::If {
                    cond,
                    then_body,
                    else_body,
                }
            }
            Stmt::While { condition, body } => {
                let cond = self.lower_condition(condition)?;
                let body = vec![self.lower_stmt(body)?];
                StmtKind::While { cond, body }
            }
            Stmt::Return(expr) => self.lower_return(expr.as_ref(), span)?,
            Stmt::Expr(e) => StmtKind::Expr(self.infer(e)?),
            Stmt::Assign { target, value } => {
                let (place, target_ty) = self.lower_place(target)?;
                let value = self.infer(value)?;
                if !target_ty.accepts(&value.ty, self.registry) {
                    return Err(ScriptError::new(
                        ErrorKind::TypeMismatch(format!(
                            "cannot assign {} to {}",
                            value.ty.describe(self.registry),
                            target_ty.describe(self.registry)
                        )),
                        span.clone(),
                    ));
                }
                StmtKind::Assign {
                    place,
                    value,
                    ty: target_ty,
                }
            }
        };
        Ok(StmtNode {
            stmt: lowered,
            span: span.clone(),
        })
    }

    fn lower_condition(&mut self, cond: &ExprS) -> ExecResult<ExprNode> {
        let node = self.infer(cond)?;
        if node.ty.kind != TypeKind::Bool {
            return Err(ScriptError::new(ErrorKind::ConditionNotBool, cond.1.clone()));
        }
        Ok(node)
    }

    fn lower_return(&mut self, expr: Option<&ExprS>, span: &Span) -> ExecResult<StmtKind> {
        match expr {
            Some(e) => {
                if self.ret.kind == TypeKind::Void {
                    return Err(ScriptError::new(
                        ErrorKind::TypeMismatch(
                            "returning a value from a void function".to_string(),
                        ),
                        span.clone(),
                    ));
                }
                let node = self.infer(e)?;
                if !self.ret.accepts(&node.ty, self.registry) {
                    return Err(ScriptError::new(
                        ErrorKind::TypeMismatch(format!(
                            "cannot return {} from a function returning {}",
                            node.ty.describe(self.registry),
                            self.ret.describe(self.registry)
                        )),
                        e.1.clone(),
                    ));
                }
                Ok(StmtKind::Return(Some(node)))
            }
            None => {
                if self.ret.kind != TypeKind::Void {
                    return Err(ScriptError::new(
                        ErrorKind::TypeMismatch("missing return value".to_string()),
                        span.clone(),
                    ));
                }
                Ok(StmtKind::Return(None))
            }
        }
    }

    fn lower_decl(
        &mut self,
        ty: &TypeExpr,
        decls: &[Declarator],
        span: &Span,
    ) -> ExecResult<StmtKind> {
        let base = resolve_type(self.registry, ty, span)?;
        if base.kind == TypeKind::Void {
            return Err(ScriptError::new(
                ErrorKind::TypeMismatch("a variable cannot be void".to_string()),
                span.clone(),
            ));
        }
        let mut nodes = Vec::with_capacity(decls.len());
        for d in decls {
            let (dty, init) = if let Some(size) = &d.size {
                let len = self.infer(size)?;
                if len.ty.kind != TypeKind::Int {
                    return Err(ScriptError::new(
                        ErrorKind::TypeMismatch("array size must be an int".to_string()),
                        size.1.clone(),
                    ));
                }
                let aty = TypeDesc::array(base.clone(), None);
                let init = ExprNode {
                    expr: ExprKind::NewArray {
                        elem: base.clone(),
                        len: Box::new(len),
                    },
                    ty: aty.clone(),
                    span: size.1.clone(),
                };
                (aty, init)
            } else if let Some(init) = &d.init {
                let node = self.infer(init)?;
                if !base.accepts(&node.ty, self.registry) {
                    return Err(ScriptError::new(
                        ErrorKind::TypeMismatch(format!(
                            "cannot initialize {} with {}",
                            base.describe(self.registry),
                            node.ty.describe(self.registry)
                        )),
                        init.1.clone(),
                    ));
                }
                (base.clone(), node)
            } else {
                let expr = if let (TypeKind::Array, Some(bound)) = (base.kind, base.bound) {
                    ExprKind::NewArray {
                        elem: base.elem().cloned().unwrap_or_else(TypeDesc::null),
                        len: Box::new(ExprNode::constant(
                            Value::Int(bound as i64),
                            TypeDesc::int(),
                            d.name_span.clone(),
                        )),
                    }
                } else {
                    match (base.kind, base.class) {
                        (TypeKind::ClassValue, Some(class)) => ExprKind::New { class },
                        (TypeKind::ClassRef | TypeKind::Array, _) => ExprKind::Const(Value::Null),
                        _ => ExprKind::Const(Value::Uninit),
                    }
                };
                let init = ExprNode {
                    expr,
                    ty: base.clone(),
                    span: d.name_span.clone(),
                };
                (base.clone(), init)
            };
            let slot = self.define(&d.name, dty.clone(), &d.name_span)?;
            nodes.push(DeclNode {
                slot,
                ty: dty,
                init,
            });
        }
        Ok(StmtKind::Decl(nodes))
    }

    // ----- places -----

    fn lower_place(&mut self, target: &ExprS) -> ExecResult<(Place, TypeDesc)> {
        let (expr, span) = target;
        match expr {
            Expr::Ident(name) => {
                if let Some((slot, ty)) = self.lookup(name) {
                    return Ok((Place::Local(slot), ty));
                }
                if let Some(class) = self.current_class {
                    if let Some((defining, field)) = self.registry.field(class, name) {
                        let ty = field.ty.clone();
                        let index = field.index;
                        if field.flags.contains(DeclFlags::STATIC) {
                            return Ok((
                                Place::Static {
                                    class: defining,
                                    index,
                                },
                                ty,
                            ));
                        }
                        if self.is_static {
                            return Err(ScriptError::new(
                                ErrorKind::AccessViolation(format!(
                                    "instance field `{}` in a static method",
                                    name
                                )),
                                span.clone(),
                            ));
                        }
                        return Ok((Place::ThisField { path: vec![index] }, ty));
                    }
                }
                Err(ScriptError::new(
                    ErrorKind::UndefinedVariable(name.clone()),
                    span.clone(),
                ))
            }
            Expr::Field {
                recv,
                name,
                name_span,
            } => {
                if let Some(class) = self.class_named(recv) {
                    let (defining, field) = self.static_field(class, name, name_span)?;
                    return Ok((
                        Place::Static {
                            class: defining,
                            index: field.0,
                        },
                        field.1,
                    ));
                }
                let recv_node = self.infer(recv)?;
                let class = self.instance_class(&recv_node, &recv.1)?;
                let (defining, field) = self
                    .registry
                    .field(class, name)
                    .ok_or_else(|| {
                        ScriptError::new(
                            ErrorKind::UndefinedVariable(name.clone()),
                            name_span.clone(),
                        )
                    })?;
                let ty = field.ty.clone();
                let index = field.index;
                let flags = field.flags;
                self.check_member_access(defining, flags, name, name_span)?;
                if flags.contains(DeclFlags::STATIC) {
                    return Ok((
                        Place::Static {
                            class: defining,
                            index,
                        },
                        ty,
                    ));
                }
                if recv_node.ty.kind == TypeKind::ClassValue {
                    // writes through a value-class base must land in the
                    // stored copy, so extend the base place's field path
                    let (base, _) = self.lower_place(recv)?;
                    let place = match base {
                        Place::Local(slot) => Place::LocalField {
                            slot,
                            path: vec![index],
                        },
                        Place::LocalField { slot, mut path } => {
                            path.push(index);
                            Place::LocalField { slot, path }
                        }
                        Place::ThisField { mut path } => {
                            path.push(index);
                            Place::ThisField { path }
                        }
                        Place::Field { recv, mut path } => {
                            path.push(index);
                            Place::Field { recv, path }
                        }
                        Place::Index {
                            recv,
                            index: idx,
                            mut path,
                        } => {
                            path.push(index);
                            Place::Index {
                                recv,
                                index: idx,
                                path,
                            }
                        }
                        Place::Static { .. } => {
                            return Err(ScriptError::new(ErrorKind::NotAssignable, span.clone()))
                        }
                    };
                    return Ok((place, ty));
                }
                if matches!(recv_node.expr, ExprKind::This) {
                    return Ok((Place::ThisField { path: vec![index] }, ty));
                }
                Ok((
                    Place::Field {
                        recv: recv_node,
                        path: vec![index],
                    },
                    ty,
                ))
            }
            Expr::Index { recv, index } => {
                let recv_node = self.infer(recv)?;
                let TypeKind::Array = recv_node.ty.kind else {
                    return Err(ScriptError::new(
                        ErrorKind::TypeMismatch(format!(
                            "cannot index {}",
                            recv_node.ty.describe(self.registry)
                        )),
                        recv.1.clone(),
                    ));
                };
                let elem = recv_node
                    .ty
                    .elem()
                    .cloned()
                    .unwrap_or_else(TypeDesc::null);
                let index_node = self.infer(index)?;
                if index_node.ty.kind != TypeKind::Int {
                    return Err(ScriptError::new(
                        ErrorKind::TypeMismatch("array index must be an int".to_string()),
                        index.1.clone(),
                    ));
                }
                Ok((
                    Place::Index {
                        recv: recv_node,
                        index: index_node,
                        path: Vec::new(),
                    },
                    elem,
                ))
            }
            _ => Err(ScriptError::new(ErrorKind::NotAssignable, span.clone())),
        }
    }

    // ----- expressions -----

    fn infer(&mut self, expr: &ExprS) -> ExecResult<ExprNode> {
        let (expr, span) = expr;
        match expr {
            Expr::Int(n) => Ok(ExprNode::constant(
                Value::Int(*n),
                TypeDesc::int(),
                span.clone(),
            )),
            Expr::Float(f) => Ok(ExprNode::constant(
                Value::Float(*f),
                TypeDesc::float(),
                span.clone(),
            )),
            Expr::Str(s) => Ok(ExprNode::constant(
                Value::Str(s.clone()),
                TypeDesc::str(),
                span.clone(),
            )),
            Expr::Bool(b) => Ok(ExprNode::constant(
                Value::Bool(*b),
                TypeDesc::bool(),
                span.clone(),
            )),
            Expr::Null => Ok(ExprNode::constant(
                Value::Null,
                TypeDesc::null(),
                span.clone(),
            )),
            Expr::Ident(name) => self.infer_ident(name, span),
            Expr::This => {
                if self.current_class.is_none() || self.is_static {
                    return Err(ScriptError::new(
                        ErrorKind::UndefinedVariable("this".to_string()),
                        span.clone(),
                    ));
                }
                Ok(self.this_node(span))
            }
            Expr::New { class } => {
                let id = self.registry.find(class).ok_or_else(|| {
                    ScriptError::new(ErrorKind::UndefinedType(class.clone()), span.clone())
                })?;
                let ty = if self.registry.get(id).intrinsic {
                    TypeDesc::class_value(id)
                } else {
                    TypeDesc::class_ref(id)
                };
                Ok(ExprNode {
                    expr: ExprKind::New { class: id },
                    ty,
                    span: span.clone(),
                })
            }
            Expr::ArrayLit(items) => {
                // the element type comes from the first element, so an
                // empty literal has no type to carry
                if items.is_empty() {
                    return Err(ScriptError::new(
                        ErrorKind::TypeMismatch(
                            "array literal must have at least one element".to_string(),
                        ),
                        span.clone(),
                    ));
                }
                let mut nodes = Vec::with_capacity(items.len());
                for item in items {
                    nodes.push(self.infer(item)?);
                }
                let elem = nodes[0].ty.clone();
                for node in &nodes[1..] {
                    if !elem.accepts(&node.ty, self.registry)
                        && !node.ty.accepts(&elem, self.registry)
                    {
                        return Err(ScriptError::new(
                            ErrorKind::TypeMismatch(format!(
                                "array element is {}, expected {}",
                                node.ty.describe(self.registry),
                                elem.describe(self.registry)
                            )),
                            node.span.clone(),
                        ));
                    }
                }
                Ok(ExprNode {
                    expr: ExprKind::ArrayLit(nodes),
                    ty: TypeDesc::array(elem, None),
                    span: span.clone(),
                })
            }
            Expr::Unary { op, expr: operand } => {
                let node = self.infer(operand)?;
                let ty = match (op, node.ty.kind) {
                    (UnaryOp::Negate, TypeKind::Int) => TypeDesc::int(),
                    (UnaryOp::Negate, TypeKind::Float) => TypeDesc::float(),
                    (UnaryOp::Not, TypeKind::Bool) => TypeDesc::bool(),
                    _ => {
                        return Err(ScriptError::new(
                            ErrorKind::TypeMismatch(format!(
                                "unary operator cannot apply to {}",
                                node.ty.describe(self.registry)
                            )),
                            span.clone(),
                        ))
                    }
                };
                Ok(ExprNode {
                    expr: ExprKind::Unary {
                        op: op.clone(),
                        operand: Box::new(node),
                    },
                    ty,
                    span: span.clone(),
                })
            }
            Expr::Binary { op, left, right } => self.infer_binary(op, left, right, span),
            Expr::Call {
                name,
                name_span,
                args,
            } => self.infer_call(name, name_span, args, span),
            Expr::MethodCall {
                recv,
                name,
                name_span,
                args,
            } => self.infer_method_call(recv, name, name_span, args, span),
            Expr::SuperCall {
                name,
                name_span,
                args,
            } => self.infer_super_call(name, name_span, args, span),
            Expr::Field {
                recv,
                name,
                name_span,
            } => self.infer_field(recv, name, name_span, span),
            Expr::Index { recv, index } => {
                let recv_node = self.infer(recv)?;
                if recv_node.ty.kind != TypeKind::Array {
                    return Err(ScriptError::new(
                        ErrorKind::TypeMismatch(format!(
                            "cannot index {}",
                            recv_node.ty.describe(self.registry)
                        )),
                        recv.1.clone(),
                    ));
                }
                let elem = recv_node
                    .ty
                    .elem()
                    .cloned()
                    .unwrap_or_else(TypeDesc::null);
                let index_node = self.infer(index)?;
                if index_node.ty.kind != TypeKind::Int {
                    return Err(ScriptError::new(
                        ErrorKind::TypeMismatch("array index must be an int".to_string()),
                        index.1.clone(),
                    ));
                }
                Ok(ExprNode {
                    expr: ExprKind::Index {
                        recv: Box::new(recv_node),
                        index: Box::new(index_node),
                    },
                    ty: elem,
                    span: span.clone(),
                })
            }
        }
    }

    fn infer_ident(&mut self, name: &str, span: &Span) -> ExecResult<ExprNode> {
        if let Some((slot, ty)) = self.lookup(name) {
            return Ok(ExprNode {
                expr: ExprKind::Local(slot),
                ty,
                span: span.clone(),
            });
        }
        if let Some(class) = self.current_class {
            if let Some((defining, field)) = self.registry.field(class, name) {
                let ty = field.ty.clone();
                let index = field.index;
                if field.flags.contains(DeclFlags::STATIC) {
                    return Ok(ExprNode {
                        expr: ExprKind::StaticField {
                            class: defining,
                            index,
                        },
                        ty,
                        span: span.clone(),
                    });
                }
                if self.is_static {
                    return Err(ScriptError::new(
                        ErrorKind::AccessViolation(format!(
                            "instance field `{}` in a static method",
                            name
                        )),
                        span.clone(),
                    ));
                }
                return Ok(ExprNode {
                    expr: ExprKind::Field {
                        recv: Box::new(self.this_node(span)),
                        index,
                    },
                    ty,
                    span: span.clone(),
                });
            }
        }
        Err(ScriptError::new(
            ErrorKind::UndefinedVariable(name.to_string()),
            span.clone(),
        ))
    }

    fn infer_binary(
        &mut self,
        op: &BinaryOp,
        left: &ExprS,
        right: &ExprS,
        span: &Span,
    ) -> ExecResult<ExprNode> {
        let lhs = self.infer(left)?;
        let rhs = self.infer(right)?;
        let ty = self.binary_type(op, &lhs, &rhs, span)?;
        Ok(ExprNode {
            expr: ExprKind::Binary {
                op: op.clone(),
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            ty,
            span: span.clone(),
        })
    }

    fn binary_type(
        &self,
        op: &BinaryOp,
        lhs: &ExprNode,
        rhs: &ExprNode,
        span: &Span,
    ) -> ExecResult<TypeDesc> {
        use BinaryOp as B;
        let mismatch = |msg: String| ScriptError::new(ErrorKind::TypeMismatch(msg), span.clone());
        let numeric = lhs.ty.kind.is_numeric() && rhs.ty.kind.is_numeric();
        let strings = lhs.ty.kind == TypeKind::Str && rhs.ty.kind == TypeKind::Str;
        match op {
            B::And | B::Or => {
                if lhs.ty.kind == TypeKind::Bool && rhs.ty.kind == TypeKind::Bool {
                    Ok(TypeDesc::bool())
                } else {
                    Err(mismatch("logical operands must be bool".to_string()))
                }
            }
            B::Equal | B::NotEqual => {
                if lhs.ty.accepts(&rhs.ty, self.registry) || rhs.ty.accepts(&lhs.ty, self.registry)
                {
                    Ok(TypeDesc::bool())
                } else {
                    Err(mismatch(format!(
                        "cannot compare {} with {}",
                        lhs.ty.describe(self.registry),
                        rhs.ty.describe(self.registry)
                    )))
                }
            }
            B::Less | B::LessEqual | B::Greater | B::GreaterEqual => {
                if numeric {
                    Ok(TypeDesc::bool())
                } else {
                    Err(mismatch("comparison operands must be numeric".to_string()))
                }
            }
            B::Add if strings => Ok(TypeDesc::str()),
            B::Add | B::Subtract | B::Multiply | B::Divide | B::Modulo => {
                if !numeric {
                    return Err(mismatch(format!(
                        "arithmetic on {} and {}",
                        lhs.ty.describe(self.registry),
                        rhs.ty.describe(self.registry)
                    )));
                }
                if lhs.ty.kind == TypeKind::Float || rhs.ty.kind == TypeKind::Float {
                    Ok(TypeDesc::float())
                } else {
                    Ok(TypeDesc::int())
                }
            }
        }
    }

    fn infer_args(&mut self, args: &[ExprS]) -> ExecResult<(Vec<ExprNode>, Vec<TypeDesc>)> {
        let mut nodes = Vec::with_capacity(args.len());
        let mut tys = Vec::with_capacity(args.len());
        for arg in args {
            let node = self.infer(arg)?;
            tys.push(node.ty.clone());
            nodes.push(node);
        }
        Ok((nodes, tys))
    }

    /// Bare call: the enclosing class's methods shadow free functions;
    /// the parent chain is consulted through normal method resolution.
    fn infer_call(
        &mut self,
        name: &str,
        name_span: &Span,
        args: &[ExprS],
        span: &Span,
    ) -> ExecResult<ExprNode> {
        let (nodes, tys) = self.infer_args(args)?;
        if let Some(class) = self.current_class {
            match self
                .registry
                .resolve_method(self.funcs, class, name, &tys, name_span.clone())
            {
                Ok(func) => {
                    let is_static_m = self.funcs.get(func).flags.contains(DeclFlags::STATIC);
                    if !is_static_m && self.is_static {
                        return Err(ScriptError::new(
                            ErrorKind::AccessViolation(format!(
                                "instance method `{}` called from a static method",
                                name
                            )),
                            name_span.clone(),
                        ));
                    }
                    let recv = (!is_static_m).then(|| Box::new(self.this_node(span)));
                    let ty = self.result_type(func, &tys, name_span)?;
                    return Ok(ExprNode {
                        expr: ExprKind::Call {
                            func,
                            recv,
                            args: nodes,
                        },
                        ty,
                        span: span.clone(),
                    });
                }
                Err(e) if matches!(e.kind, ErrorKind::UndefinedCall(_)) => {}
                Err(e) => return Err(e),
            }
        }
        let func =
            self.funcs
                .resolve_free(self.registry, self.unit_funcs, name, &tys, name_span.clone())?;
        let ty = self.result_type(func, &tys, name_span)?;
        Ok(ExprNode {
            expr: ExprKind::Call {
                func,
                recv: None,
                args: nodes,
            },
            ty,
            span: span.clone(),
        })
    }

    fn infer_method_call(
        &mut self,
        recv: &ExprS,
        name: &str,
        name_span: &Span,
        args: &[ExprS],
        span: &Span,
    ) -> ExecResult<ExprNode> {
        let (nodes, tys) = self.infer_args(args)?;
        // ClassName.method(...) dispatches statically
        if let Some(class) = self.class_named(recv) {
            let func = self
                .registry
                .resolve_method(self.funcs, class, name, &tys, name_span.clone())?;
            self.check_method_access(func, name, name_span)?;
            let f = self.funcs.get(func);
            if !f.flags.contains(DeclFlags::STATIC) && !matches!(f.body, FnBody::Native(_)) {
                return Err(ScriptError::new(
                    ErrorKind::AccessViolation(format!(
                        "instance method `{}` called through a class name",
                        name
                    )),
                    name_span.clone(),
                ));
            }
            let ty = self.result_type(func, &tys, name_span)?;
            return Ok(ExprNode {
                expr: ExprKind::Call {
                    func,
                    recv: None,
                    args: nodes,
                },
                ty,
                span: span.clone(),
            });
        }
        let recv_node = self.infer(recv)?;
        let class = self.instance_class(&recv_node, &recv.1)?;
        let func = self
            .registry
            .resolve_method(self.funcs, class, name, &tys, name_span.clone())?;
        self.check_method_access(func, name, name_span)?;
        let ty = self.result_type(func, &tys, name_span)?;
        Ok(ExprNode {
            expr: ExprKind::Call {
                func,
                recv: Some(Box::new(recv_node)),
                args: nodes,
            },
            ty,
            span: span.clone(),
        })
    }

    fn infer_super_call(
        &mut self,
        name: &str,
        name_span: &Span,
        args: &[ExprS],
        span: &Span,
    ) -> ExecResult<ExprNode> {
        let Some(class) = self.current_class else {
            return Err(ScriptError::new(
                ErrorKind::UndefinedCall(format!("super.{}", name)),
                name_span.clone(),
            ));
        };
        let Some(parent) = self.registry.get(class).parent else {
            return Err(ScriptError::new(
                ErrorKind::UndefinedCall(format!("super.{}", name)),
                name_span.clone(),
            ));
        };
        if self.is_static {
            return Err(ScriptError::new(
                ErrorKind::AccessViolation("super call in a static method".to_string()),
                name_span.clone(),
            ));
        }
        let (nodes, tys) = self.infer_args(args)?;
        let func = self
            .registry
            .resolve_method(self.funcs, parent, name, &tys, name_span.clone())?;
        self.check_method_access(func, name, name_span)?;
        let ty = self.result_type(func, &tys, name_span)?;
        Ok(ExprNode {
            expr: ExprKind::Call {
                func,
                recv: Some(Box::new(self.this_node(span))),
                args: nodes,
            },
            ty,
            span: span.clone(),
        })
    }

    fn infer_field(
        &mut self,
        recv: &ExprS,
        name: &str,
        name_span: &Span,
        span: &Span,
    ) -> ExecResult<ExprNode> {
        if let Some(class) = self.class_named(recv) {
            let (defining, (index, ty)) = self.static_field(class, name, name_span)?;
            return Ok(ExprNode {
                expr: ExprKind::StaticField {
                    class: defining,
                    index,
                },
                ty,
                span: span.clone(),
            });
        }
        let recv_node = self.infer(recv)?;
        let class = self.instance_class(&recv_node, &recv.1)?;
        let (defining, field) = self.registry.field(class, name).ok_or_else(|| {
            ScriptError::new(ErrorKind::UndefinedVariable(name.to_string()), name_span.clone())
        })?;
        let ty = field.ty.clone();
        let index = field.index;
        let flags = field.flags;
        self.check_member_access(defining, flags, name, name_span)?;
        if flags.contains(DeclFlags::STATIC) {
            return Ok(ExprNode {
                expr: ExprKind::StaticField {
                    class: defining,
                    index,
                },
                ty,
                span: span.clone(),
            });
        }
        Ok(ExprNode {
            expr: ExprKind::Field {
                recv: Box::new(recv_node),
                index,
            },
            ty,
            span: span.clone(),
        })
    }

    // ----- shared lookups -----

    /// A bare identifier naming a class, unless shadowed by a local.
    fn class_named(&self, expr: &ExprS) -> Option<ClassId> {
        match &expr.0 {
            Expr::Ident(name) if self.lookup(name).is_none() => self.registry.find(name),
            _ => None,
        }
    }

    fn static_field(
        &self,
        class: ClassId,
        name: &str,
        span: &Span,
    ) -> ExecResult<(ClassId, (u32, TypeDesc))> {
        let (defining, field) = self.registry.field(class, name).ok_or_else(|| {
            ScriptError::new(ErrorKind::UndefinedVariable(name.to_string()), span.clone())
        })?;
        if !field.flags.contains(DeclFlags::STATIC) {
            return Err(ScriptError::new(
                ErrorKind::AccessViolation(format!(
                    "instance field `{}` accessed through a class name",
                    name
                )),
                span.clone(),
            ));
        }
        let ty = field.ty.clone();
        let index = field.index;
        let flags = field.flags;
        self.check_member_access(defining, flags, name, span)?;
        Ok((defining, (index, ty)))
    }

    fn instance_class(&self, node: &ExprNode, span: &Span) -> ExecResult<ClassId> {
        match (node.ty.kind, node.ty.class) {
            (TypeKind::ClassRef | TypeKind::ClassValue, Some(class)) => Ok(class),
            _ => Err(ScriptError::new(
                ErrorKind::TypeMismatch(format!(
                    "member access on {}",
                    node.ty.describe(self.registry)
                )),
                span.clone(),
            )),
        }
    }

    fn check_member_access(
        &self,
        defining: ClassId,
        flags: DeclFlags,
        name: &str,
        span: &Span,
    ) -> ExecResult<()> {
        if flags.contains(DeclFlags::PRIVATE) && self.current_class != Some(defining) {
            return Err(ScriptError::new(
                ErrorKind::AccessViolation(format!("`{}` is private", name)),
                span.clone(),
            ));
        }
        if flags.contains(DeclFlags::PROTECTED) {
            let allowed = self
                .current_class
                .is_some_and(|c| self.registry.is_child_of(c, defining));
            if !allowed {
                return Err(ScriptError::new(
                    ErrorKind::AccessViolation(format!("`{}` is protected", name)),
                    span.clone(),
                ));
            }
        }
        Ok(())
    }

    fn check_method_access(&self, func: FuncId, name: &str, span: &Span) -> ExecResult<()> {
        let f = self.funcs.get(func);
        let Some(owner) = f.owner else { return Ok(()) };
        self.check_member_access(owner, f.flags, name, span)
    }

    /// Result type of a resolved call: scripted functions declare it,
    /// host natives produce it through their compile-time check.
    fn result_type(&self, func: FuncId, args: &[TypeDesc], span: &Span) -> ExecResult<TypeDesc> {
        let f = self.funcs.get(func);
        match &f.body {
            FnBody::Native(native) => native.check(args).map_err(|m| {
                ScriptError::new(ErrorKind::WrongArgumentType(m), span.clone())
            }),
            FnBody::Script(_) => Ok(f.ret.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;

    fn kinds(errors: &[ScriptError]) -> Vec<&ErrorKind> {
        errors.iter().map(|e| &e.kind).collect()
    }

    #[test]
    fn test_minimal_unit_compiles() {
        let mut engine = Engine::new();
        engine
            .compile("unit", "int add(int a, int b) { return a + b; }")
            .unwrap();
    }

    #[test]
    fn test_class_with_fields_and_methods() {
        let mut engine = Engine::new();
        engine
            .compile(
                "unit",
                r#"
                class Counter {
                    static int hits = 0;
                    int step;
                    public int bump() {
                        hits = hits + step;
                        return hits;
                    }
                }
                "#,
            )
            .unwrap();
    }

    #[test]
    fn test_undefined_variable_reported() {
        let mut engine = Engine::new();
        let errors = engine
            .compile("unit", "int f() { return q; }")
            .unwrap_err();
        assert!(matches!(errors[0].kind, ErrorKind::UndefinedVariable(_)));
    }

    #[test]
    fn test_missing_return_reported() {
        let mut engine = Engine::new();
        let errors = engine.compile("unit", "int f() { int x; }").unwrap_err();
        assert!(matches!(errors[0].kind, ErrorKind::MissingReturn(_)));
    }

    #[test]
    fn test_condition_must_be_bool() {
        let mut engine = Engine::new();
        let errors = engine
            .compile("unit", "void f() { if (1) { } }")
            .unwrap_err();
        assert!(kinds(&errors).contains(&&ErrorKind::ConditionNotBool));
    }

    #[test]
    fn test_default_ordering_enforced() {
        let mut engine = Engine::new();
        let errors = engine
            .compile("unit", "int f(int a = 1, int b) { return b; }")
            .unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e.kind, ErrorKind::DefaultOrdering(_))));
    }

    #[test]
    fn test_private_method_rejected_across_classes() {
        let mut engine = Engine::new();
        let errors = engine
            .compile(
                "unit",
                r#"
                class A {
                    private int secret() { return 1; }
                }
                class B {
                    public int peek(A a) { return a.secret(); }
                }
                "#,
            )
            .unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e.kind, ErrorKind::AccessViolation(_))));
    }

    #[test]
    fn test_sibling_survives_broken_declaration() {
        let mut engine = Engine::new();
        let errors = engine
            .compile(
                "unit",
                r#"
                int good() { return 1; }
                int bad() { return nope; }
                "#,
            )
            .unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0].kind, ErrorKind::UndefinedVariable(_)));
    }

    #[test]
    fn test_field_initializer_must_be_literal() {
        let mut engine = Engine::new();
        let errors = engine
            .compile(
                "unit",
                r#"
                class C {
                    int x = f();
                }
                int f() { return 1; }
                "#,
            )
            .unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e.kind, ErrorKind::TypeMismatch(_))));
    }

    #[test]
    fn test_child_field_indices_follow_parent() {
        let mut engine = Engine::new();
        engine
            .compile(
                "unit",
                r#"
                class Vehicle extends Entity {
                    int speed;
                }
                class Entity {
                    int id;
                }
                "#,
            )
            .unwrap();
        let registry = engine.registry();
        let vehicle = registry.find("Vehicle").unwrap();
        let (_, speed) = registry.field(vehicle, "speed").unwrap();
        assert_eq!(speed.index, 1);
        let (_, id) = registry.field(vehicle, "id").unwrap();
        assert_eq!(id.index, 0);
    }

    #[test]
    fn test_recompile_purges_and_reuses_class() {
        let mut engine = Engine::new();
        engine
            .compile("unit", "class C { int a; int b; }")
            .unwrap();
        let first = engine.registry().find("C").unwrap();
        engine.compile("unit", "class C { int only; }").unwrap();
        let second = engine.registry().find("C").unwrap();
        assert_eq!(first, second);
        let (_, only) = engine.registry().field(second, "only").unwrap();
        assert_eq!(only.index, 0);
    }

    #[test]
    fn test_empty_array_literal_rejected() {
        let mut engine = Engine::new();
        let errors = engine
            .compile("unit", "void f() { int[] xs; xs = {}; }")
            .unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e.kind, ErrorKind::TypeMismatch(_))));
    }

    #[test]
    fn test_ambiguous_overload_reported_at_call() {
        let mut engine = Engine::new();
        let errors = engine
            .compile(
                "unit",
                r#"
                int h(float a, int b) { return b; }
                int h(int a, float b) { return a; }
                int use() { return h(1, 2); }
                "#,
            )
            .unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e.kind, ErrorKind::AmbiguousCall(_))));
    }
}

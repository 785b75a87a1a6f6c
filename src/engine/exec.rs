use log::trace;

use crate::parser::ast::{BinaryOp, UnaryOp};
use crate::types::{Span, MAX_ARRAY_LEN};

use super::error::{ErrorKind, ExecResult, ScriptError};
use super::frame::{Activation, Frame};
use super::function::{FnBody, Function, FunctionTable};
use super::node::{ExprKind, ExprNode, Place, StmtKind, StmtNode};
use super::params;
use super::registry::ClassRegistry;
use super::ty::TypeDesc;
use super::value::Value;
use super::ProgramId;

/// One tick's execution context. `budget` counts remaining sub-steps;
/// the frame tree carries everything that must outlive the tick.
pub struct ExecCtx<'a> {
    pub funcs: &'a FunctionTable,
    pub registry: &'a mut ClassRegistry,
    pub program: ProgramId,
    pub budget: u32,
}

impl ExecCtx<'_> {
    /// Pay for one committed sub-step. A failed charge suspends the
    /// current node with its marker untouched.
    fn charge(&mut self) -> bool {
        if self.budget == 0 {
            false
        } else {
            self.budget -= 1;
            true
        }
    }
}

/// Statement outcome. `Return` carries the value synchronously up to
/// the enclosing call node; suspension inside the returned expression
/// is already handled by its own frame before this is produced.
pub enum Ctl {
    Done,
    Suspend,
    Return(Value),
}

/// Evaluate one expression node. `Ok(true)` means complete with the
/// result stored in `frame.result`; `Ok(false)` means out of budget or
/// blocked on a lock, with every committed sub-step preserved.
pub fn eval_expr(
    ctx: &mut ExecCtx,
    node: &ExprNode,
    frame: &mut Frame,
    act: &mut Activation,
) -> ExecResult<bool> {
    match &node.expr {
        ExprKind::Const(v) => {
            if !ctx.charge() {
                return Ok(false);
            }
            frame.result = v.clone();
            Ok(true)
        }
        ExprKind::Local(slot) => {
            if !ctx.charge() {
                return Ok(false);
            }
            let v = act
                .locals
                .get(*slot as usize)
                .cloned()
                .unwrap_or(Value::Uninit);
            frame.result = read_value(v, &node.span)?;
            Ok(true)
        }
        ExprKind::This => {
            if !ctx.charge() {
                return Ok(false);
            }
            frame.result = act.this.clone();
            Ok(true)
        }
        ExprKind::StaticField { class, index } => {
            if !ctx.charge() {
                return Ok(false);
            }
            let v = ctx
                .registry
                .static_get(*class, *index)
                .unwrap_or(Value::Uninit);
            frame.result = read_value(v, &node.span)?;
            Ok(true)
        }
        ExprKind::Field { recv, index } => {
            if frame.marker == 0 {
                match eval_child(ctx, recv, frame, act)? {
                    Some(v) => frame.commit(v),
                    None => return Ok(false),
                }
            }
            if !ctx.charge() {
                return Ok(false);
            }
            let v = match &frame.vals[0] {
                Value::Null => {
                    return Err(ScriptError::new(ErrorKind::NullDereference, node.span.clone()))
                }
                Value::Object(cell) => {
                    let class = cell.borrow().class;
                    if let Some(hook) = ctx.registry.refresh_hook(class) {
                        hook.refresh(&mut cell.borrow_mut());
                    }
                    cell.borrow()
                        .fields
                        .get(*index as usize)
                        .cloned()
                        .unwrap_or(Value::Uninit)
                }
                Value::Struct(inst) => inst
                    .fields
                    .get(*index as usize)
                    .cloned()
                    .unwrap_or(Value::Uninit),
                other => {
                    return Err(ScriptError::new(
                        ErrorKind::TypeMismatch(format!(
                            "field access on a {} value",
                            other.kind_name()
                        )),
                        node.span.clone(),
                    ))
                }
            };
            frame.result = read_value(v, &node.span)?;
            Ok(true)
        }
        ExprKind::Index { recv, index } => {
            if frame.marker == 0 {
                match eval_child(ctx, recv, frame, act)? {
                    Some(v) => frame.commit(v),
                    None => return Ok(false),
                }
            }
            if frame.marker == 1 {
                match eval_child(ctx, index, frame, act)? {
                    Some(v) => frame.commit(v),
                    None => return Ok(false),
                }
            }
            if !ctx.charge() {
                return Ok(false);
            }
            let i = expect_int(&frame.vals[1], &node.span)?;
            match &frame.vals[0] {
                Value::Null => Err(ScriptError::new(ErrorKind::NullDereference, node.span.clone())),
                Value::Array(cell) => {
                    let items = cell.borrow();
                    if i < 0 || i as usize >= items.len() {
                        return Err(ScriptError::new(
                            ErrorKind::IndexOutOfBounds {
                                index: i,
                                len: items.len(),
                            },
                            node.span.clone(),
                        ));
                    }
                    frame.result = read_value(items[i as usize].clone(), &node.span)?;
                    Ok(true)
                }
                other => Err(ScriptError::new(
                    ErrorKind::TypeMismatch(format!("indexing a {} value", other.kind_name())),
                    node.span.clone(),
                )),
            }
        }
        ExprKind::ArrayLit(items) => {
            while (frame.marker as usize) < items.len() {
                let item = &items[frame.marker as usize];
                match eval_child(ctx, item, frame, act)? {
                    Some(v) => frame.commit(v),
                    None => return Ok(false),
                }
            }
            if !ctx.charge() {
                return Ok(false);
            }
            frame.result = Value::array(std::mem::take(&mut frame.vals));
            Ok(true)
        }
        ExprKind::NewArray { elem, len } => {
            if frame.marker == 0 {
                match eval_child(ctx, len, frame, act)? {
                    Some(v) => frame.commit(v),
                    None => return Ok(false),
                }
            }
            if !ctx.charge() {
                return Ok(false);
            }
            let n = expect_int(&frame.vals[0], &node.span)?;
            if n < 0 || n as usize > MAX_ARRAY_LEN {
                return Err(ScriptError::new(
                    ErrorKind::ArrayTooLarge(n.max(0) as usize),
                    node.span.clone(),
                ));
            }
            let fill = ctx.registry.element_default(elem);
            frame.result = Value::array(vec![fill; n as usize]);
            Ok(true)
        }
        ExprKind::New { class } => {
            if !ctx.charge() {
                return Ok(false);
            }
            let instance = ctx.registry.instantiate(*class);
            frame.result = if ctx.registry.get(*class).intrinsic {
                Value::Struct(Box::new(instance))
            } else {
                Value::object(instance)
            };
            Ok(true)
        }
        ExprKind::Unary { op, operand } => {
            if frame.marker == 0 {
                match eval_child(ctx, operand, frame, act)? {
                    Some(v) => frame.commit(v),
                    None => return Ok(false),
                }
            }
            if !ctx.charge() {
                return Ok(false);
            }
            frame.result = match (op, &frame.vals[0]) {
                (UnaryOp::Negate, Value::Int(n)) => Value::Int(-n),
                (UnaryOp::Negate, Value::Float(f)) => Value::Float(-f),
                (UnaryOp::Not, Value::Bool(b)) => Value::Bool(!b),
                (_, other) => {
                    return Err(ScriptError::new(
                        ErrorKind::TypeMismatch(format!(
                            "unary operator applied to a {} value",
                            other.kind_name()
                        )),
                        node.span.clone(),
                    ))
                }
            };
            Ok(true)
        }
        ExprKind::Binary { op, lhs, rhs } => {
            if frame.marker == 0 {
                match eval_child(ctx, lhs, frame, act)? {
                    Some(v) => frame.commit(v),
                    None => return Ok(false),
                }
            }
            if matches!(op, BinaryOp::And | BinaryOp::Or) {
                let lhs_val = matches!(frame.vals[0], Value::Bool(true));
                let short = match op {
                    BinaryOp::And => !lhs_val,
                    _ => lhs_val,
                };
                if short {
                    if !ctx.charge() {
                        return Ok(false);
                    }
                    frame.result = Value::Bool(lhs_val);
                    return Ok(true);
                }
            }
            if frame.marker == 1 {
                match eval_child(ctx, rhs, frame, act)? {
                    Some(v) => frame.commit(v),
                    None => return Ok(false),
                }
            }
            if !ctx.charge() {
                return Ok(false);
            }
            frame.result = if matches!(op, BinaryOp::And | BinaryOp::Or) {
                frame.vals[1].clone()
            } else {
                apply_binary(op, &frame.vals[0], &frame.vals[1], &node.span)?
            };
            Ok(true)
        }
        ExprKind::Call { func, recv, args } => eval_call(ctx, node, *func, recv, args, frame, act),
    }
}

/// Call node: evaluate receiver, actuals, and missing-trailing
/// defaults as marker-guarded sub-steps, then bind once (acquiring the
/// class lock for synchronized methods), then run the body. A resumed
/// call re-enters the stored activation; defaults with observable
/// effects run exactly once per logical call.
#[allow(clippy::too_many_arguments)]
fn eval_call(
    ctx: &mut ExecCtx,
    node: &ExprNode,
    func: super::FuncId,
    recv: &Option<Box<ExprNode>>,
    args: &[ExprNode],
    frame: &mut Frame,
    act: &mut Activation,
) -> ExecResult<bool> {
    let funcs = ctx.funcs;
    let f = funcs.get(func);
    let recv_count = recv.is_some() as u32;
    let total = recv_count + f.params.len() as u32;

    while frame.marker < total {
        let idx = frame.marker;
        let sub = match (recv.as_deref(), idx) {
            (Some(r), 0) => r,
            _ => {
                let p = (idx - recv_count) as usize;
                if p < args.len() {
                    &args[p]
                } else {
                    match &f.params[p].default {
                        Some(default) => default,
                        None => {
                            return Err(ScriptError::new(
                                ErrorKind::TooFewArguments(f.name.clone()),
                                node.span.clone(),
                            ))
                        }
                    }
                }
            }
        };
        match eval_child(ctx, sub, frame, act)? {
            Some(v) => frame.commit(v),
            None => return Ok(false),
        }
    }

    if frame.activation.is_none() {
        if recv_count == 1 && matches!(frame.vals[0], Value::Null) {
            return Err(ScriptError::new(ErrorKind::NullDereference, node.span.clone()));
        }
        let sync_class = if f.is_synchronized() { f.owner } else { None };

        if let FnBody::Native(native) = &f.body {
            if let Some(class) = sync_class {
                if !ctx.registry.try_acquire(class, ctx.program) {
                    return Ok(false);
                }
            }
            if !ctx.charge() {
                if let Some(class) = sync_class {
                    ctx.registry.release(class, ctx.program);
                }
                return Ok(false);
            }
            let recv_val = (recv_count == 1).then(|| frame.vals[0].clone());
            let call_args = &frame.vals[recv_count as usize..];
            let mut out = Value::Null;
            let outcome = native.invoke(recv_val.as_ref(), call_args, &mut out);
            if let Some(class) = sync_class {
                ctx.registry.release(class, ctx.program);
            }
            outcome
                .map_err(|m| ScriptError::new(ErrorKind::NativeFailure(m), node.span.clone()))?;
            frame.result = out;
            return Ok(true);
        }

        if let Some(class) = sync_class {
            if !ctx.registry.try_acquire(class, ctx.program) {
                trace!("{:?} blocked on lock entering `{}`", ctx.program, f.name);
                return Ok(false);
            }
        }
        let this = if recv_count == 1 {
            frame.vals[0].clone()
        } else {
            Value::Null
        };
        let call_args = frame.vals[recv_count as usize..].to_vec();
        let mut activation = params::bind_activation(f, call_args, this);
        activation.locked = sync_class;
        frame.activation = Some(Box::new(activation));
        frame.advance();
        trace!("entered `{}` ({:?})", f.name, func);
    }

    let FnBody::Script(body) = &f.body else {
        unreachable!()
    };
    let caller_unit = funcs.get(act.func).unit;
    loop {
        let idx = (frame.marker - total - 1) as usize;
        if idx >= body.len() {
            finish_call(ctx, frame, f);
            frame.result = Value::Null;
            return Ok(true);
        }
        let stmt = &body[idx];
        let Frame {
            child, activation, ..
        } = &mut *frame;
        let Some(callee_act) = activation.as_deref_mut() else {
            unreachable!()
        };
        let cf = child.get_or_insert_with(Default::default);
        match exec_stmt(ctx, stmt, cf, callee_act) {
            Ok(Ctl::Done) => frame.advance(),
            Ok(Ctl::Suspend) => return Ok(false),
            Ok(Ctl::Return(v)) => {
                finish_call(ctx, frame, f);
                frame.result = v.coerce_to(f.ret.kind);
                return Ok(true);
            }
            Err(err) => {
                finish_call(ctx, frame, f);
                // a failing cross-unit call surfaces at the caller's
                // call site, not inside the other unit's source
                let err = if f.unit.is_some() && f.unit != caller_unit {
                    err.at(node.span.clone())
                } else {
                    err
                };
                return Err(err);
            }
        }
    }
}

fn finish_call(ctx: &mut ExecCtx, frame: &mut Frame, f: &Function) {
    if let Some(activation) = frame.activation.take() {
        if let Some(class) = activation.locked {
            ctx.registry.release(class, ctx.program);
        }
    }
    trace!("left `{}`", f.name);
}

/// Run one statement node to completion, suspension, or return.
pub fn exec_stmt(
    ctx: &mut ExecCtx,
    stmt: &StmtNode,
    frame: &mut Frame,
    act: &mut Activation,
) -> ExecResult<Ctl> {
    match &stmt.stmt {
        StmtKind::Block(stmts) => exec_seq(ctx, stmts, frame, act, 0),
        StmtKind::Decl(decls) => {
            while (frame.marker as usize) < decls.len() {
                let decl = &decls[frame.marker as usize];
                match eval_child(ctx, &decl.init, frame, act)? {
                    Some(v) => {
                        act.locals[decl.slot as usize] = v.coerce_to(decl.ty.kind);
                        frame.advance();
                    }
                    None => return Ok(Ctl::Suspend),
                }
            }
            Ok(Ctl::Done)
        }
        StmtKind::If {
            cond,
            then_body,
            else_body,
        } => {
            if frame.marker == 0 {
                match eval_child(ctx, cond, frame, act)? {
                    Some(v) => frame.commit(v),
                    None => return Ok(Ctl::Suspend),
                }
            }
            let body = if matches!(frame.vals.first(), Some(Value::Bool(true))) {
                then_body
            } else {
                else_body
            };
            exec_seq(ctx, body, frame, act, 1)
        }
        StmtKind::While { cond, body } => loop {
            if frame.marker == 0 {
                match eval_child(ctx, cond, frame, act)? {
                    Some(v) => frame.commit(v),
                    None => return Ok(Ctl::Suspend),
                }
            }
            if !matches!(frame.vals.first(), Some(Value::Bool(true))) {
                return Ok(Ctl::Done);
            }
            let idx = (frame.marker - 1) as usize;
            if idx >= body.len() {
                frame.rewind();
                continue;
            }
            let cf = frame.child_mut();
            match exec_stmt(ctx, &body[idx], cf, act)? {
                Ctl::Done => frame.advance(),
                other => return Ok(other),
            }
        },
        StmtKind::Return(expr) => match expr {
            Some(e) => match eval_child(ctx, e, frame, act)? {
                Some(v) => Ok(Ctl::Return(v)),
                None => Ok(Ctl::Suspend),
            },
            None => Ok(Ctl::Return(Value::Null)),
        },
        StmtKind::Expr(e) => match eval_child(ctx, e, frame, act)? {
            Some(_) => Ok(Ctl::Done),
            None => Ok(Ctl::Suspend),
        },
        StmtKind::Assign { place, value, ty } => {
            exec_assign(ctx, place, value, ty, frame, act, &stmt.span)
        }
    }
}

/// Statement sequence with markers starting at `base`.
fn exec_seq(
    ctx: &mut ExecCtx,
    stmts: &[StmtNode],
    frame: &mut Frame,
    act: &mut Activation,
    base: u32,
) -> ExecResult<Ctl> {
    while ((frame.marker - base) as usize) < stmts.len() {
        let stmt = &stmts[(frame.marker - base) as usize];
        let cf = frame.child_mut();
        match exec_stmt(ctx, stmt, cf, act)? {
            Ctl::Done => frame.advance(),
            other => return Ok(other),
        }
    }
    Ok(Ctl::Done)
}

fn exec_assign(
    ctx: &mut ExecCtx,
    place: &Place,
    value: &ExprNode,
    ty: &TypeDesc,
    frame: &mut Frame,
    act: &mut Activation,
    span: &Span,
) -> ExecResult<Ctl> {
    match place {
        Place::Local(slot) => {
            let Some(v) = eval_child(ctx, value, frame, act)? else {
                return Ok(Ctl::Suspend);
            };
            act.locals[*slot as usize] = v.coerce_to(ty.kind);
            Ok(Ctl::Done)
        }
        Place::LocalField { slot, path } => {
            let Some(v) = eval_child(ctx, value, frame, act)? else {
                return Ok(Ctl::Suspend);
            };
            write_path(&mut act.locals[*slot as usize], path, v.coerce_to(ty.kind), span)?;
            Ok(Ctl::Done)
        }
        Place::ThisField { path } => {
            let Some(v) = eval_child(ctx, value, frame, act)? else {
                return Ok(Ctl::Suspend);
            };
            write_path(&mut act.this, path, v.coerce_to(ty.kind), span)?;
            Ok(Ctl::Done)
        }
        Place::Static { class, index } => {
            let Some(v) = eval_child(ctx, value, frame, act)? else {
                return Ok(Ctl::Suspend);
            };
            ctx.registry.static_set(*class, *index, v.coerce_to(ty.kind));
            Ok(Ctl::Done)
        }
        Place::Field { recv, path } => {
            if frame.marker == 0 {
                match eval_child(ctx, recv, frame, act)? {
                    Some(v) => frame.commit(v),
                    None => return Ok(Ctl::Suspend),
                }
            }
            let Some(v) = eval_child(ctx, value, frame, act)? else {
                return Ok(Ctl::Suspend);
            };
            let mut target = frame.vals[0].clone();
            write_path(&mut target, path, v.coerce_to(ty.kind), span)?;
            Ok(Ctl::Done)
        }
        Place::Index { recv, index, path } => {
            if frame.marker == 0 {
                match eval_child(ctx, recv, frame, act)? {
                    Some(v) => frame.commit(v),
                    None => return Ok(Ctl::Suspend),
                }
            }
            if frame.marker == 1 {
                match eval_child(ctx, index, frame, act)? {
                    Some(v) => frame.commit(v),
                    None => return Ok(Ctl::Suspend),
                }
            }
            let Some(v) = eval_child(ctx, value, frame, act)? else {
                return Ok(Ctl::Suspend);
            };
            let i = expect_int(&frame.vals[1], span)?;
            match &frame.vals[0] {
                Value::Null => Err(ScriptError::new(ErrorKind::NullDereference, span.clone())),
                Value::Array(cell) => {
                    let mut items = cell.borrow_mut();
                    if i < 0 || i as usize >= items.len() {
                        return Err(ScriptError::new(
                            ErrorKind::IndexOutOfBounds {
                                index: i,
                                len: items.len(),
                            },
                            span.clone(),
                        ));
                    }
                    write_path(&mut items[i as usize], path, v.coerce_to(ty.kind), span)?;
                    Ok(Ctl::Done)
                }
                other => Err(ScriptError::new(
                    ErrorKind::TypeMismatch(format!("indexing a {} value", other.kind_name())),
                    span.clone(),
                )),
            }
        }
    }
}

/// Evaluate a sub-expression in this frame's child slot; `None` means
/// suspended with the child frame preserved.
fn eval_child(
    ctx: &mut ExecCtx,
    node: &ExprNode,
    frame: &mut Frame,
    act: &mut Activation,
) -> ExecResult<Option<Value>> {
    let cf = frame.child_mut();
    if eval_expr(ctx, node, cf, act)? {
        Ok(Some(cf.take_result()))
    } else {
        Ok(None)
    }
}

/// Walk nested instance fields and store at the end of the path; an
/// empty path stores at the target itself.
fn write_path(target: &mut Value, path: &[u32], v: Value, span: &Span) -> ExecResult<()> {
    let Some((&first, rest)) = path.split_first() else {
        *target = v;
        return Ok(());
    };
    match target {
        Value::Object(cell) => {
            let mut inst = cell.borrow_mut();
            match inst.fields.get_mut(first as usize) {
                Some(slot) => write_path(slot, rest, v, span),
                None => Err(ScriptError::new(
                    ErrorKind::TypeMismatch("field index out of range".to_string()),
                    span.clone(),
                )),
            }
        }
        Value::Struct(inst) => match inst.fields.get_mut(first as usize) {
            Some(slot) => write_path(slot, rest, v, span),
            None => Err(ScriptError::new(
                ErrorKind::TypeMismatch("field index out of range".to_string()),
                span.clone(),
            )),
        },
        Value::Null => Err(ScriptError::new(ErrorKind::NullDereference, span.clone())),
        other => Err(ScriptError::new(
            ErrorKind::TypeMismatch(format!("field store into a {} value", other.kind_name())),
            span.clone(),
        )),
    }
}

fn read_value(v: Value, span: &Span) -> ExecResult<Value> {
    match v {
        Value::Uninit => Err(ScriptError::new(
            ErrorKind::UseOfUninitialized,
            span.clone(),
        )),
        v => Ok(v),
    }
}

fn expect_int(v: &Value, span: &Span) -> ExecResult<i64> {
    match v {
        Value::Int(n) => Ok(*n),
        other => Err(ScriptError::new(
            ErrorKind::TypeMismatch(format!("expected an int, got {}", other.kind_name())),
            span.clone(),
        )),
    }
}

fn apply_binary(op: &BinaryOp, a: &Value, b: &Value, span: &Span) -> ExecResult<Value> {
    use BinaryOp as B;
    if matches!(op, B::Equal) {
        return Ok(Value::Bool(a == b));
    }
    if matches!(op, B::NotEqual) {
        return Ok(Value::Bool(a != b));
    }
    if let (Value::Str(x), Value::Str(y)) = (a, b) {
        if matches!(op, B::Add) {
            return Ok(Value::Str(format!("{}{}", x, y)));
        }
    }
    let float_op = matches!(a, Value::Float(_)) || matches!(b, Value::Float(_));
    if float_op {
        let (x, y) = (as_float(a, span)?, as_float(b, span)?);
        let v = match op {
            B::Add => Value::Float(x + y),
            B::Subtract => Value::Float(x - y),
            B::Multiply => Value::Float(x * y),
            B::Divide => Value::Float(x / y),
            B::Modulo => Value::Float(x % y),
            B::Less => Value::Bool(x < y),
            B::LessEqual => Value::Bool(x <= y),
            B::Greater => Value::Bool(x > y),
            B::GreaterEqual => Value::Bool(x >= y),
            B::And | B::Or | B::Equal | B::NotEqual => unreachable!(),
        };
        return Ok(v);
    }
    let (x, y) = (as_int(a, span)?, as_int(b, span)?);
    let v = match op {
        B::Add => Value::Int(x.wrapping_add(y)),
        B::Subtract => Value::Int(x.wrapping_sub(y)),
        B::Multiply => Value::Int(x.wrapping_mul(y)),
        B::Divide => {
            if y == 0 {
                return Err(ScriptError::new(ErrorKind::DivideByZero, span.clone()));
            }
            Value::Int(x.wrapping_div(y))
        }
        B::Modulo => {
            if y == 0 {
                return Err(ScriptError::new(ErrorKind::DivideByZero, span.clone()));
            }
            Value::Int(x.wrapping_rem(y))
        }
        B::Less => Value::Bool(x < y),
        B::LessEqual => Value::Bool(x <= y),
        B::Greater => Value::Bool(x > y),
        B::GreaterEqual => Value::Bool(x >= y),
        B::And | B::Or | B::Equal | B::NotEqual => unreachable!(),
    };
    Ok(v)
}

fn as_float(v: &Value, span: &Span) -> ExecResult<f64> {
    match v {
        Value::Float(f) => Ok(*f),
        Value::Int(n) => Ok(*n as f64),
        Value::Bool(b) => Ok(*b as i64 as f64),
        other => Err(ScriptError::new(
            ErrorKind::TypeMismatch(format!("expected a number, got {}", other.kind_name())),
            span.clone(),
        )),
    }
}

fn as_int(v: &Value, span: &Span) -> ExecResult<i64> {
    match v {
        Value::Int(n) => Ok(*n),
        Value::Bool(b) => Ok(*b as i64),
        other => Err(ScriptError::new(
            ErrorKind::TypeMismatch(format!("expected an int, got {}", other.kind_name())),
            span.clone(),
        )),
    }
}

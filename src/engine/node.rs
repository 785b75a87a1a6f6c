use crate::parser::ast::{BinaryOp, UnaryOp};
use crate::types::Span;

use super::ty::TypeDesc;
use super::value::Value;
use super::{ClassId, FuncId};

/// Typed, fully-resolved expression. Every name has become a slot,
/// field index, or function identity; the executor never sees a
/// string. Children live in owned vectors walked left to right.
#[derive(Debug, Clone)]
pub struct ExprNode {
    pub expr: ExprKind,
    pub ty: TypeDesc,
    pub span: Span,
}

impl ExprNode {
    pub fn constant(value: Value, ty: TypeDesc, span: Span) -> ExprNode {
        ExprNode {
            expr: ExprKind::Const(value),
            ty,
            span,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Const(Value),
    Local(u32),
    This,
    StaticField {
        class: ClassId,
        index: u32,
    },
    Field {
        recv: Box<ExprNode>,
        index: u32,
    },
    Index {
        recv: Box<ExprNode>,
        index: Box<ExprNode>,
    },
    ArrayLit(Vec<ExprNode>),
    /// Sized array allocation from a declarator bound, default-filled.
    NewArray {
        elem: TypeDesc,
        len: Box<ExprNode>,
    },
    New {
        class: ClassId,
    },
    Unary {
        op: UnaryOp,
        operand: Box<ExprNode>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<ExprNode>,
        rhs: Box<ExprNode>,
    },
    /// Call with the overload winner's identity cached; dispatch never
    /// re-scores. `recv` is present for method calls.
    Call {
        func: FuncId,
        recv: Option<Box<ExprNode>>,
        args: Vec<ExprNode>,
    },
}

#[derive(Debug, Clone)]
pub struct StmtNode {
    pub stmt: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Block(Vec<StmtNode>),
    /// One comma-chained declaration statement; each declarator gets
    /// its own initializer expression (synthesized when absent).
    Decl(Vec<DeclNode>),
    If {
        cond: ExprNode,
        then_body: Vec<StmtNode>,
        else_body: Vec<StmtNode>,
    },
    While {
        cond: ExprNode,
        body: Vec<StmtNode>,
    },
    Return(Option<ExprNode>),
    Expr(ExprNode),
    Assign {
        place: Place,
        value: ExprNode,
        /// Declared type of the target; scalar stores coerce to it.
        ty: TypeDesc,
    },
}

#[derive(Debug, Clone)]
pub struct DeclNode {
    pub slot: u32,
    pub ty: TypeDesc,
    pub init: ExprNode,
}

/// An assignable location. Value-class (struct) sub-fields are reached
/// through an index path so writes land in the stored copy rather than
/// a temporary.
#[derive(Debug, Clone)]
pub enum Place {
    Local(u32),
    /// Struct stored in a local; `path` walks nested struct fields.
    LocalField {
        slot: u32,
        path: Vec<u32>,
    },
    /// Field of the current receiver, struct or object alike.
    ThisField {
        path: Vec<u32>,
    },
    /// Field reached through an object-reference expression.
    Field {
        recv: ExprNode,
        path: Vec<u32>,
    },
    Static {
        class: ClassId,
        index: u32,
    },
    Index {
        recv: ExprNode,
        index: ExprNode,
        path: Vec<u32>,
    },
}

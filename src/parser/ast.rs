use crate::types::Span;

/// Spanned expression / statement, mirroring the lexer's byte offsets.
pub type ExprS = (Expr, Span);
pub type StmtS = (Stmt, Span);

#[derive(Debug, Clone, PartialEq)]
pub enum TypeExpr {
    Void,
    Bool,
    Int,
    Float,
    Str,
    Named(String),
    Array {
        elem: Box<TypeExpr>,
        bound: Option<u32>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum UnaryOp {
    Negate,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Null,
    Ident(String),
    This,
    New {
        class: String,
    },
    /// `{a, b, c}` element chain, walked left to right.
    ArrayLit(Vec<ExprS>),
    Unary {
        op: UnaryOp,
        expr: Box<ExprS>,
    },
    Binary {
        op: BinaryOp,
        left: Box<ExprS>,
        right: Box<ExprS>,
    },
    Call {
        name: String,
        name_span: Span,
        args: Vec<ExprS>,
    },
    MethodCall {
        recv: Box<ExprS>,
        name: String,
        name_span: Span,
        args: Vec<ExprS>,
    },
    SuperCall {
        name: String,
        name_span: Span,
        args: Vec<ExprS>,
    },
    Field {
        recv: Box<ExprS>,
        name: String,
        name_span: Span,
    },
    Index {
        recv: Box<ExprS>,
        index: Box<ExprS>,
    },
}

/// One declarator of a comma-chained declaration:
/// `int a, b = 2, c[n];`
#[derive(Debug, Clone, PartialEq)]
pub struct Declarator {
    pub name: String,
    pub name_span: Span,
    /// Runtime array size from `name[expr]`; exclusive with `init`.
    pub size: Option<ExprS>,
    pub init: Option<ExprS>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Block(Vec<StmtS>),
    VarDecl {
        ty: TypeExpr,
        decls: Vec<Declarator>,
    },
    If {
        condition: ExprS,
        then_branch: Box<StmtS>,
        else_branch: Option<Box<StmtS>>,
    },
    While {
        condition: ExprS,
        body: Box<StmtS>,
    },
    Return(Option<ExprS>),
    Expr(ExprS),
    Assign {
        target: ExprS,
        value: ExprS,
    },
}

/// Declaration modifiers as written; validated during compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Mods {
    pub public: bool,
    pub protected: bool,
    pub private: bool,
    pub is_static: bool,
    pub synchronized: bool,
    pub is_extern: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamDecl {
    pub ty: TypeExpr,
    pub name: String,
    pub name_span: Span,
    pub default: Option<ExprS>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FuncDecl {
    pub mods: Mods,
    pub ret: TypeExpr,
    pub name: String,
    pub name_span: Span,
    pub params: Vec<ParamDecl>,
    pub body: Vec<StmtS>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub mods: Mods,
    pub ty: TypeExpr,
    pub decls: Vec<Declarator>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDecl {
    pub name: String,
    pub name_span: Span,
    pub parent: Option<(String, Span)>,
    pub intrinsic: bool,
    pub fields: Vec<FieldDecl>,
    pub methods: Vec<FuncDecl>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Class(ClassDecl),
    Func(FuncDecl),
}

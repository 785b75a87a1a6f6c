pub mod ast;

use crate::lexer::{self, Token};
use crate::types::Span;
use ast::*;

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub span: Span,
}

impl ParseError {
    fn new(message: impl Into<String>, span: Span) -> Self {
        ParseError {
            message: message.into(),
            span,
        }
    }
}

type PResult<T> = Result<T, ParseError>;

/// Parse one compile unit. Item-level errors are collected and parsing
/// resumes at the next plausible declaration, so one broken declaration
/// does not hide its siblings.
pub fn parse_unit(source: &str) -> (Vec<Item>, Vec<ParseError>) {
    let tokens = lexer::tokenize(source);
    let mut parser = Parser {
        tokens,
        pos: 0,
        errors: Vec::new(),
    };
    let items = parser.unit();
    (items, parser.errors)
}

struct Parser {
    tokens: Vec<(Token, Span)>,
    pos: usize,
    errors: Vec<ParseError>,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos].0
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx].0
    }

    fn span(&self) -> Span {
        self.tokens[self.pos].1.clone()
    }

    fn prev_span(&self) -> Span {
        self.tokens[self.pos.saturating_sub(1)].1.clone()
    }

    fn advance(&mut self) -> (Token, Span) {
        let out = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        out
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token, what: &str) -> PResult<Span> {
        if self.check(&token) {
            Ok(self.advance().1)
        } else {
            Err(ParseError::new(
                format!("expected {}, found {:?}", what, self.peek()),
                self.span(),
            ))
        }
    }

    fn ident(&mut self, what: &str) -> PResult<(String, Span)> {
        match self.peek().clone() {
            Token::Identifier(name) => {
                let span = self.advance().1;
                Ok((name, span))
            }
            other => Err(ParseError::new(
                format!("expected {}, found {:?}", what, other),
                self.span(),
            )),
        }
    }

    // ===== declarations =====

    fn unit(&mut self) -> Vec<Item> {
        let mut items = Vec::new();
        while !self.check(&Token::Eof) {
            match self.item() {
                Ok(item) => items.push(item),
                Err(err) => {
                    self.errors.push(err);
                    self.synchronize_item();
                }
            }
        }
        items
    }

    /// Skip to the start of the next top-level declaration after an error.
    fn synchronize_item(&mut self) {
        let mut depth = 0usize;
        loop {
            match self.peek() {
                Token::Eof => return,
                Token::LBrace => {
                    depth += 1;
                    self.advance();
                }
                Token::RBrace => {
                    self.advance();
                    if depth <= 1 {
                        return;
                    }
                    depth -= 1;
                }
                Token::Semicolon if depth == 0 => {
                    self.advance();
                    return;
                }
                _ => {
                    self.advance();
                }
            }
        }
    }

    fn mods(&mut self) -> Mods {
        let mut mods = Mods::default();
        loop {
            match self.peek() {
                Token::Public => mods.public = true,
                Token::Protected => mods.protected = true,
                Token::Private => mods.private = true,
                Token::Static => mods.is_static = true,
                Token::Synchronized => mods.synchronized = true,
                Token::Extern => mods.is_extern = true,
                _ => return mods,
            }
            self.advance();
        }
    }

    fn item(&mut self) -> PResult<Item> {
        let start = self.span().start;
        let mut intrinsic = false;
        let mut mods = Mods::default();
        loop {
            match self.peek() {
                Token::Public => mods.public = true,
                Token::Protected => mods.protected = true,
                Token::Private => mods.private = true,
                Token::Static => mods.is_static = true,
                Token::Synchronized => mods.synchronized = true,
                Token::Extern => mods.is_extern = true,
                Token::Intrinsic => intrinsic = true,
                _ => break,
            }
            self.advance();
        }
        if self.check(&Token::Class) {
            self.class_decl(intrinsic, start).map(Item::Class)
        } else {
            if intrinsic {
                return Err(ParseError::new(
                    "`intrinsic` is only valid on a class declaration",
                    self.span(),
                ));
            }
            self.func_decl(mods, start).map(Item::Func)
        }
    }

    fn class_decl(&mut self, intrinsic: bool, start: usize) -> PResult<ClassDecl> {
        self.expect(Token::Class, "`class`")?;
        let (name, name_span) = self.ident("class name")?;
        let parent = if self.eat(&Token::Extends) {
            Some(self.ident("parent class name")?)
        } else {
            None
        };
        self.expect(Token::LBrace, "`{` after class header")?;

        let mut fields = Vec::new();
        let mut methods = Vec::new();
        while !self.check(&Token::RBrace) && !self.check(&Token::Eof) {
            match self.member() {
                Ok(Member::Field(f)) => fields.push(f),
                Ok(Member::Method(m)) => methods.push(m),
                Err(err) => {
                    self.errors.push(err);
                    self.synchronize_member();
                }
            }
        }
        let end = self.expect(Token::RBrace, "`}` closing class body")?.end;

        Ok(ClassDecl {
            name,
            name_span,
            parent,
            intrinsic,
            fields,
            methods,
            span: start..end,
        })
    }

    fn synchronize_member(&mut self) {
        let mut depth = 0usize;
        loop {
            match self.peek() {
                Token::Eof => return,
                Token::LBrace => {
                    depth += 1;
                    self.advance();
                }
                Token::RBrace => {
                    if depth == 0 {
                        return;
                    }
                    depth -= 1;
                    self.advance();
                    if depth == 0 {
                        return;
                    }
                }
                Token::Semicolon if depth == 0 => {
                    self.advance();
                    return;
                }
                _ => {
                    self.advance();
                }
            }
        }
    }

    fn member(&mut self) -> PResult<Member> {
        let start = self.span().start;
        let mods = self.mods();
        let ty = self.type_expr()?;
        let (name, name_span) = self.ident("member name")?;
        if self.check(&Token::LParen) {
            let (params, body, end) = self.func_rest()?;
            Ok(Member::Method(FuncDecl {
                mods,
                ret: ty,
                name,
                name_span,
                params,
                body,
                span: start..end,
            }))
        } else {
            let decls = self.declarators(name, name_span)?;
            let end = self.expect(Token::Semicolon, "`;` after field declaration")?.end;
            Ok(Member::Field(FieldDecl {
                mods,
                ty,
                decls,
                span: start..end,
            }))
        }
    }

    fn func_decl(&mut self, mods: Mods, start: usize) -> PResult<FuncDecl> {
        let ret = self.type_expr()?;
        let (name, name_span) = self.ident("function name")?;
        let (params, body, end) = self.func_rest()?;
        Ok(FuncDecl {
            mods,
            ret,
            name,
            name_span,
            params,
            body,
            span: start..end,
        })
    }

    fn func_rest(&mut self) -> PResult<(Vec<ParamDecl>, Vec<StmtS>, usize)> {
        self.expect(Token::LParen, "`(`")?;
        let mut params = Vec::new();
        if !self.check(&Token::RParen) {
            loop {
                let ty = self.type_expr()?;
                let (name, name_span) = self.ident("parameter name")?;
                let default = if self.eat(&Token::Equal) {
                    Some(self.expr()?)
                } else {
                    None
                };
                params.push(ParamDecl {
                    ty,
                    name,
                    name_span,
                    default,
                });
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(Token::RParen, "`)` after parameters")?;
        self.expect(Token::LBrace, "`{` starting function body")?;
        let body = self.block_body()?;
        let end = self.prev_span().end;
        Ok((params, body, end))
    }

    fn type_expr(&mut self) -> PResult<TypeExpr> {
        let base = match self.peek().clone() {
            Token::Void => {
                self.advance();
                TypeExpr::Void
            }
            Token::BoolTy => {
                self.advance();
                TypeExpr::Bool
            }
            Token::IntTy => {
                self.advance();
                TypeExpr::Int
            }
            Token::FloatTy => {
                self.advance();
                TypeExpr::Float
            }
            Token::StringTy => {
                self.advance();
                TypeExpr::Str
            }
            Token::Identifier(name) => {
                self.advance();
                TypeExpr::Named(name)
            }
            other => {
                return Err(ParseError::new(
                    format!("expected a type, found {:?}", other),
                    self.span(),
                ));
            }
        };
        if self.check(&Token::LBracket) {
            // `T[]` or `T[3]` in type position
            self.advance();
            let bound = match self.peek().clone() {
                Token::Int(n) => {
                    self.advance();
                    Some(n as u32)
                }
                _ => None,
            };
            self.expect(Token::RBracket, "`]` closing array type")?;
            return Ok(TypeExpr::Array {
                elem: Box::new(base),
                bound,
            });
        }
        Ok(base)
    }

    fn declarators(&mut self, first_name: String, first_span: Span) -> PResult<Vec<Declarator>> {
        let mut decls = vec![self.declarator_rest(first_name, first_span)?];
        while self.eat(&Token::Comma) {
            let (name, span) = self.ident("declarator name")?;
            decls.push(self.declarator_rest(name, span)?);
        }
        Ok(decls)
    }

    fn declarator_rest(&mut self, name: String, name_span: Span) -> PResult<Declarator> {
        let size = if self.eat(&Token::LBracket) {
            let size = self.expr()?;
            self.expect(Token::RBracket, "`]` closing array size")?;
            Some(size)
        } else {
            None
        };
        let init = if self.eat(&Token::Equal) {
            if size.is_some() {
                return Err(ParseError::new(
                    "a sized array declarator cannot also carry an initializer",
                    self.span(),
                ));
            }
            Some(self.expr()?)
        } else {
            None
        };
        Ok(Declarator {
            name,
            name_span,
            size,
            init,
        })
    }

    // ===== statements =====

    fn block_body(&mut self) -> PResult<Vec<StmtS>> {
        let mut stmts = Vec::new();
        while !self.check(&Token::RBrace) && !self.check(&Token::Eof) {
            stmts.push(self.stmt()?);
        }
        self.expect(Token::RBrace, "`}` closing block")?;
        Ok(stmts)
    }

    fn stmt(&mut self) -> PResult<StmtS> {
        let start = self.span().start;
        match self.peek().clone() {
            Token::LBrace => {
                self.advance();
                let body = self.block_body()?;
                let end = self.prev_span().end;
                Ok((Stmt::Block(body), start..end))
            }
            Token::If => {
                self.advance();
                self.expect(Token::LParen, "`(` after `if`")?;
                let condition = self.expr()?;
                self.expect(Token::RParen, "`)` after condition")?;
                let then_branch = Box::new(self.stmt()?);
                let else_branch = if self.eat(&Token::Else) {
                    Some(Box::new(self.stmt()?))
                } else {
                    None
                };
                let end = self.prev_span().end;
                Ok((
                    Stmt::If {
                        condition,
                        then_branch,
                        else_branch,
                    },
                    start..end,
                ))
            }
            Token::While => {
                self.advance();
                self.expect(Token::LParen, "`(` after `while`")?;
                let condition = self.expr()?;
                self.expect(Token::RParen, "`)` after condition")?;
                let body = Box::new(self.stmt()?);
                let end = self.prev_span().end;
                Ok((Stmt::While { condition, body }, start..end))
            }
            Token::Return => {
                self.advance();
                let value = if self.check(&Token::Semicolon) {
                    None
                } else {
                    Some(self.expr()?)
                };
                let end = self.expect(Token::Semicolon, "`;` after return")?.end;
                Ok((Stmt::Return(value), start..end))
            }
            Token::Void | Token::BoolTy | Token::IntTy | Token::FloatTy | Token::StringTy => {
                self.var_decl(start)
            }
            Token::Identifier(_) if self.looks_like_decl() => self.var_decl(start),
            _ => {
                let target = self.expr()?;
                if self.eat(&Token::Equal) {
                    let value = self.expr()?;
                    let end = self.expect(Token::Semicolon, "`;` after assignment")?.end;
                    Ok((Stmt::Assign { target, value }, start..end))
                } else {
                    let end = self.expect(Token::Semicolon, "`;` after expression")?.end;
                    Ok((Stmt::Expr(target), start..end))
                }
            }
        }
    }

    /// `Foo x ...` / `Foo[] x ...` start a declaration; `Foo.x`, `Foo(...)`,
    /// `x = 1` do not.
    fn looks_like_decl(&self) -> bool {
        match self.peek_at(1) {
            Token::Identifier(_) => true,
            Token::LBracket => {
                // distinguish `Foo[] x` / `Foo[3] x` from `arr[i] = ...`
                match self.peek_at(2) {
                    Token::RBracket => true,
                    Token::Int(_) => matches!(self.peek_at(3), Token::RBracket)
                        && matches!(self.peek_at(4), Token::Identifier(_)),
                    _ => false,
                }
            }
            _ => false,
        }
    }

    fn var_decl(&mut self, start: usize) -> PResult<StmtS> {
        let ty = self.type_expr()?;
        let (name, name_span) = self.ident("variable name")?;
        let decls = self.declarators(name, name_span)?;
        let end = self.expect(Token::Semicolon, "`;` after declaration")?.end;
        Ok((Stmt::VarDecl { ty, decls }, start..end))
    }

    // ===== expressions =====

    fn expr(&mut self) -> PResult<ExprS> {
        self.or_expr()
    }

    fn or_expr(&mut self) -> PResult<ExprS> {
        let mut left = self.and_expr()?;
        while self.eat(&Token::OrOr) {
            let right = self.and_expr()?;
            let span = left.1.start..right.1.end;
            left = (
                Expr::Binary {
                    op: BinaryOp::Or,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            );
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> PResult<ExprS> {
        let mut left = self.equality()?;
        while self.eat(&Token::AndAnd) {
            let right = self.equality()?;
            let span = left.1.start..right.1.end;
            left = (
                Expr::Binary {
                    op: BinaryOp::And,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            );
        }
        Ok(left)
    }

    fn equality(&mut self) -> PResult<ExprS> {
        let mut left = self.comparison()?;
        loop {
            let op = match self.peek() {
                Token::EqualEqual => BinaryOp::Equal,
                Token::NotEqual => BinaryOp::NotEqual,
                _ => break,
            };
            self.advance();
            let right = self.comparison()?;
            let span = left.1.start..right.1.end;
            left = (
                Expr::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            );
        }
        Ok(left)
    }

    fn comparison(&mut self) -> PResult<ExprS> {
        let mut left = self.additive()?;
        loop {
            let op = match self.peek() {
                Token::Less => BinaryOp::Less,
                Token::LessEqual => BinaryOp::LessEqual,
                Token::Greater => BinaryOp::Greater,
                Token::GreaterEqual => BinaryOp::GreaterEqual,
                _ => break,
            };
            self.advance();
            let right = self.additive()?;
            let span = left.1.start..right.1.end;
            left = (
                Expr::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            );
        }
        Ok(left)
    }

    fn additive(&mut self) -> PResult<ExprS> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Subtract,
                _ => break,
            };
            self.advance();
            let right = self.multiplicative()?;
            let span = left.1.start..right.1.end;
            left = (
                Expr::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            );
        }
        Ok(left)
    }

    fn multiplicative(&mut self) -> PResult<ExprS> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinaryOp::Multiply,
                Token::Slash => BinaryOp::Divide,
                Token::Percent => BinaryOp::Modulo,
                _ => break,
            };
            self.advance();
            let right = self.unary()?;
            let span = left.1.start..right.1.end;
            left = (
                Expr::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            );
        }
        Ok(left)
    }

    fn unary(&mut self) -> PResult<ExprS> {
        let start = self.span().start;
        let op = match self.peek() {
            Token::Minus => Some(UnaryOp::Negate),
            Token::Bang => Some(UnaryOp::Not),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let expr = self.unary()?;
            let span = start..expr.1.end;
            return Ok((
                Expr::Unary {
                    op,
                    expr: Box::new(expr),
                },
                span,
            ));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> PResult<ExprS> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(&Token::Dot) {
                let (name, name_span) = self.ident("member name")?;
                if self.check(&Token::LParen) {
                    let args = self.call_args()?;
                    let span = expr.1.start..self.prev_span().end;
                    expr = (
                        Expr::MethodCall {
                            recv: Box::new(expr),
                            name,
                            name_span,
                            args,
                        },
                        span,
                    );
                } else {
                    let span = expr.1.start..name_span.end;
                    expr = (
                        Expr::Field {
                            recv: Box::new(expr),
                            name,
                            name_span,
                        },
                        span,
                    );
                }
            } else if self.eat(&Token::LBracket) {
                let index = self.expr()?;
                let end = self.expect(Token::RBracket, "`]` closing index")?.end;
                let span = expr.1.start..end;
                expr = (
                    Expr::Index {
                        recv: Box::new(expr),
                        index: Box::new(index),
                    },
                    span,
                );
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn call_args(&mut self) -> PResult<Vec<ExprS>> {
        self.expect(Token::LParen, "`(`")?;
        let mut args = Vec::new();
        if !self.check(&Token::RParen) {
            loop {
                args.push(self.expr()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(Token::RParen, "`)` closing arguments")?;
        Ok(args)
    }

    fn primary(&mut self) -> PResult<ExprS> {
        let (token, span) = self.advance();
        match token {
            Token::Int(v) => Ok((Expr::Int(v), span)),
            Token::Float(v) => Ok((Expr::Float(v), span)),
            Token::Str(v) => Ok((Expr::Str(v), span)),
            Token::Bool(v) => Ok((Expr::Bool(v), span)),
            Token::Null => Ok((Expr::Null, span)),
            Token::This => Ok((Expr::This, span)),
            Token::New => {
                let (class, class_span) = self.ident("class name after `new`")?;
                Ok((Expr::New { class }, span.start..class_span.end))
            }
            Token::Super => {
                self.expect(Token::Dot, "`.` after `super`")?;
                let (name, name_span) = self.ident("method name")?;
                let args = self.call_args()?;
                let end = self.prev_span().end;
                Ok((
                    Expr::SuperCall {
                        name,
                        name_span,
                        args,
                    },
                    span.start..end,
                ))
            }
            Token::Identifier(name) => {
                if self.check(&Token::LParen) {
                    let args = self.call_args()?;
                    let end = self.prev_span().end;
                    Ok((
                        Expr::Call {
                            name,
                            name_span: span.clone(),
                            args,
                        },
                        span.start..end,
                    ))
                } else {
                    Ok((Expr::Ident(name), span))
                }
            }
            Token::LParen => {
                let inner = self.expr()?;
                self.expect(Token::RParen, "`)`")?;
                Ok(inner)
            }
            Token::LBrace => {
                // array literal
                let mut items = Vec::new();
                if !self.check(&Token::RBrace) {
                    loop {
                        items.push(self.expr()?);
                        if !self.eat(&Token::Comma) {
                            break;
                        }
                    }
                }
                let end = self.expect(Token::RBrace, "`}` closing array literal")?.end;
                Ok((Expr::ArrayLit(items), span.start..end))
            }
            other => Err(ParseError::new(
                format!("unexpected token {:?} in expression", other),
                span,
            )),
        }
    }
}

enum Member {
    Field(FieldDecl),
    Method(FuncDecl),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(src: &str) -> Vec<Item> {
        let (items, errors) = parse_unit(src);
        assert!(errors.is_empty(), "unexpected parse errors: {:?}", errors);
        items
    }

    #[test]
    fn test_parse_class_with_members() {
        let items = parse_ok(
            "class Entity {
                public int id;
                void move(int dx, int dy = 0) { id = id + dx; }
            }",
        );
        assert_eq!(items.len(), 1);
        let Item::Class(class) = &items[0] else {
            panic!("expected class");
        };
        assert_eq!(class.name, "Entity");
        assert_eq!(class.fields.len(), 1);
        assert_eq!(class.methods.len(), 1);
        assert_eq!(class.methods[0].params.len(), 2);
        assert!(class.methods[0].params[1].default.is_some());
    }

    #[test]
    fn test_parse_extends_and_intrinsic() {
        let items = parse_ok("intrinsic class Vec2 extends Base { int x; }");
        let Item::Class(class) = &items[0] else {
            panic!("expected class");
        };
        assert!(class.intrinsic);
        assert_eq!(class.parent.as_ref().unwrap().0, "Base");
    }

    #[test]
    fn test_parse_comma_chain_and_array_declarator() {
        let items = parse_ok("void f() { int a, b = 2, c[10]; }");
        let Item::Func(func) = &items[0] else {
            panic!("expected function");
        };
        let (Stmt::VarDecl { decls, .. }, _) = &func.body[0] else {
            panic!("expected declaration");
        };
        assert_eq!(decls.len(), 3);
        assert!(decls[1].init.is_some());
        assert!(decls[2].size.is_some());
    }

    #[test]
    fn test_parse_array_literal_vs_block() {
        let items = parse_ok("void f() { int[] xs; xs = {1, 2, 3}; { int y; } }");
        let Item::Func(func) = &items[0] else {
            panic!("expected function");
        };
        assert!(matches!(func.body[1].0, Stmt::Assign { .. }));
        assert!(matches!(func.body[2].0, Stmt::Block(_)));
    }

    #[test]
    fn test_parse_postfix_chain() {
        let items = parse_ok("void f() { a.b.c(1).d[2] = 3; }");
        let Item::Func(func) = &items[0] else {
            panic!("expected function");
        };
        let (Stmt::Assign { target, .. }, _) = &func.body[0] else {
            panic!("expected assignment");
        };
        assert!(matches!(target.0, Expr::Index { .. }));
    }

    #[test]
    fn test_error_recovery_keeps_siblings() {
        let (items, errors) = parse_unit(
            "int broken( { }
             int fine() { return 1; }",
        );
        assert!(!errors.is_empty());
        assert!(items
            .iter()
            .any(|i| matches!(i, Item::Func(f) if f.name == "fine")));
    }

    #[test]
    fn test_super_call() {
        let items = parse_ok("class A extends B { void f() { super.f(); } }");
        let Item::Class(class) = &items[0] else {
            panic!("expected class");
        };
        let (Stmt::Expr((expr, _)), _) = &class.methods[0].body[0] else {
            panic!("expected expression statement");
        };
        assert!(matches!(expr, Expr::SuperCall { .. }));
    }
}

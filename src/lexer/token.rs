use logos::Logos;

#[derive(Logos, Debug, PartialEq, Clone)]
#[logos(skip r"[ \t\r\n]+")]
#[logos(skip r"//[^\n]*")]
#[logos(skip r"/\*[^*]*\*+(?:[^/*][^*]*\*+)*/")]
pub enum Token {
    // Keywords
    #[token("class")]
    Class,
    #[token("extends")]
    Extends,
    #[token("intrinsic")]
    Intrinsic,
    #[token("public")]
    Public,
    #[token("protected")]
    Protected,
    #[token("private")]
    Private,
    #[token("static")]
    Static,
    #[token("synchronized")]
    Synchronized,
    #[token("extern")]
    Extern,
    #[token("void")]
    Void,
    #[token("bool")]
    BoolTy,
    #[token("int")]
    IntTy,
    #[token("float")]
    FloatTy,
    #[token("string")]
    StringTy,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("while")]
    While,
    #[token("return")]
    Return,
    #[token("new")]
    New,
    #[token("this")]
    This,
    #[token("super")]
    Super,
    #[token("null")]
    Null,

    // Literals and identifiers
    #[token("true", |_| true)]
    #[token("false", |_| false)]
    Bool(bool),
    #[regex(r"[0-9]+\.[0-9]+", lex_float)]
    Float(f64),
    #[regex(r"[0-9]+", lex_integer)]
    Int(i64),
    #[regex(r#""([^"\\\n]|\\.)*""#, lex_string)]
    Str(String),
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", lex_identifier)]
    Identifier(String),

    // Operators and punctuation
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("==")]
    EqualEqual,
    #[token("!=")]
    NotEqual,
    #[token("<")]
    Less,
    #[token("<=")]
    LessEqual,
    #[token(">")]
    Greater,
    #[token(">=")]
    GreaterEqual,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("!")]
    Bang,
    #[token("=")]
    Equal,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(";")]
    Semicolon,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,

    /// Produced by the `Lexer` wrapper for byte sequences logos rejects.
    Error,
    /// Produced by the `Lexer` wrapper at end of input.
    Eof,
}

fn lex_integer(lexer: &mut logos::Lexer<Token>) -> Option<i64> {
    lexer.slice().parse::<i64>().ok()
}

fn lex_float(lexer: &mut logos::Lexer<Token>) -> Option<f64> {
    lexer.slice().parse::<f64>().ok()
}

fn lex_identifier(lexer: &mut logos::Lexer<Token>) -> Option<String> {
    Some(lexer.slice().to_string())
}

fn lex_string(lexer: &mut logos::Lexer<Token>) -> Option<String> {
    let slice = lexer.slice();
    let inner = &slice[1..slice.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some('"') => out.push('"'),
                Some('\\') => out.push('\\'),
                Some(other) => out.push(other),
                None => {}
            }
        } else {
            out.push(c);
        }
    }
    Some(out)
}

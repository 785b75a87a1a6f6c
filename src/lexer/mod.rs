pub mod token;

use crate::types::Span;
use logos::Logos;
pub use token::Token;

/// Thin wrapper around the logos-generated token stream.
///
/// Unrecognized input becomes `Token::Error` (the parser reports it with a
/// position) and the end of input becomes a single trailing `Token::Eof`.
pub struct Lexer<'source> {
    inner: logos::Lexer<'source, Token>,
}

impl<'source> Lexer<'source> {
    pub fn new(source: &'source str) -> Self {
        Lexer {
            inner: Token::lexer(source),
        }
    }

    pub fn next_token_with_span(&mut self) -> (Token, Span) {
        match self.inner.next() {
            Some(Ok(token)) => (token, self.inner.span()),
            Some(Err(())) => (Token::Error, self.inner.span()),
            None => {
                let end = self.inner.source().len();
                (Token::Eof, end..end)
            }
        }
    }
}

/// Collect the whole unit up front; the parser works over the vector.
pub fn tokenize(source: &str) -> Vec<(Token, Span)> {
    let mut lexer = Lexer::new(source);
    let mut tokens = Vec::new();
    loop {
        let (token, span) = lexer.next_token_with_span();
        let done = token == Token::Eof;
        tokens.push((token, span));
        if done {
            break;
        }
    }
    tokens
}

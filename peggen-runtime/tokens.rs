//! The token interface between a parser and its tokenizer.
//!
//! A parser consumes tokens through the narrow [`Tokens`] contract: a
//! random-access, non-destructive stream. Positions are plain indices, so a
//! memoizing parser can revisit any position at will. [`TokenBuffer`] is the
//! standard implementation backed by a `Vec<Token>`.

use std::fmt;

/// Conventional token kind names. The kind universe is open and belongs to
/// the tokenizer; these are the names shared by the grammar-file tokenizer
/// and the usual test inputs.
pub const NAME: &str = "NAME";
pub const NUMBER: &str = "NUMBER";
pub const STRING: &str = "STRING";
pub const OP: &str = "OP";
pub const ENDMARKER: &str = "ENDMARKER";

/// Kind of the distinguished token returned for positions past the end of
/// input. It matches nothing.
pub const EOF: &str = "EOF";

/// Positional information carried by a token. Opaque to the matching
/// machinery; it exists for semantic actions and error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    /// Byte offset of the first character.
    pub start: usize,
    /// Byte offset just past the last character.
    pub end: usize,
    /// 1-based line number.
    pub line: usize,
    /// 1-based column number.
    pub col: usize,
}

impl Span {
    pub fn new(start: usize, end: usize, line: usize, col: usize) -> Span {
        Span { start, end, line, col }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// A single token: a symbolic kind compared against token references in a
/// grammar, the source text compared against string literals, and a span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: String,
    pub text: String,
    pub span: Span,
}

impl Token {
    pub fn new(kind: impl Into<String>, text: impl Into<String>, span: Span) -> Token {
        Token {
            kind: kind.into(),
            text: text.into(),
            span,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{:?}", self.kind, self.text)
    }
}

/// A parser input: a finite token sequence with random access.
///
/// `get` yields `None` past the end of input, and a past-the-end position
/// never matches anything, so greedy repetition cannot run off the buffer.
/// `eof` is the distinguished token reported for such positions.
pub trait Tokens {
    /// Number of real tokens, including the terminating `ENDMARKER`.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The token at `pos`, or `None` past the end of input.
    fn get(&self, pos: usize) -> Option<&Token>;

    /// The distinguished EOF token.
    fn eof(&self) -> &Token;

    /// The token at `pos`, or the EOF token past the end of input.
    fn token_at(&self, pos: usize) -> &Token {
        self.get(pos).unwrap_or_else(|| self.eof())
    }

    /// Human-readable position of `pos`, for error reporting.
    fn position_repr(&self, pos: usize) -> Span {
        self.token_at(pos).span
    }
}

/// Owned token sequence; the standard [`Tokens`] implementation.
///
/// Construction appends an `ENDMARKER` token if the tokenizer did not supply
/// one, so every buffer ends the same way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBuffer {
    tokens: Vec<Token>,
    eof: Token,
}

impl TokenBuffer {
    pub fn new(mut tokens: Vec<Token>) -> TokenBuffer {
        let end_span = tokens
            .last()
            .map(|t| Span::new(t.span.end, t.span.end, t.span.line, t.span.col))
            .unwrap_or_default();
        if tokens.last().map_or(true, |t| t.kind != ENDMARKER) {
            tokens.push(Token::new(ENDMARKER, "", end_span));
        }
        let eof = Token::new(EOF, "", end_span);
        TokenBuffer { tokens, eof }
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }
}

impl Tokens for TokenBuffer {
    fn len(&self) -> usize {
        self.tokens.len()
    }

    fn get(&self, pos: usize) -> Option<&Token> {
        self.tokens.get(pos)
    }

    fn eof(&self) -> &Token {
        &self.eof
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_appends_endmarker() {
        let buf = TokenBuffer::new(vec![Token::new(NUMBER, "1", Span::default())]);
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.token_at(1).kind, ENDMARKER);
    }

    #[test]
    fn past_the_end_is_eof() {
        let buf = TokenBuffer::new(vec![]);
        assert_eq!(buf.len(), 1);
        assert!(buf.get(5).is_none());
        assert_eq!(buf.token_at(5).kind, EOF);
    }
}

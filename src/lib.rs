//! `peggen` - a parser generator for Parsing Expression Grammars with full
//! support for left recursion (direct, indirect, and hidden), syntactic
//! predicates, the cut operator, and embedded semantic actions.
//!
//! The pipeline: [`parse_grammar`] reads grammar source into the
//! [`ast::Grammar`] model, [`analyze`] validates it and classifies rules
//! (nullable, left-recursive, cycle leaders), and from there the grammar is
//! executable two ways: [`interp::parse`] runs the reference packrat
//! evaluator with seed-growing directly, and [`translate::compile_grammar`]
//! emits the source of a standalone Rust parser module with the same
//! behavior, linked against `peggen-runtime`.
//!
//! ```
//! use peggen::{compile, interp};
//! use peggen::runtime::tokens::{Span, Token, TokenBuffer};
//!
//! let grammar = compile("start: NUMBER ENDMARKER\n").unwrap();
//! let tokens = TokenBuffer::new(vec![Token::new("NUMBER", "42", Span::default())]);
//! let value = interp::parse(&grammar, &tokens).unwrap();
//! assert_eq!(value.seq().unwrap()[0].token().unwrap().text, "42");
//! ```

pub mod analysis;
pub mod ast;
pub mod grammar;
pub mod interp;
pub mod translate;

pub use peggen_runtime as runtime;

pub use crate::analysis::analyze;
pub use crate::grammar::parse_grammar;

use peggen_runtime::tokens::Span;
use std::fmt;

/// A line/column pair in grammar source, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Loc {
    pub line: usize,
    pub col: usize,
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

impl From<Span> for Loc {
    fn from(span: Span) -> Loc {
        Loc {
            line: span.line,
            col: span.col,
        }
    }
}

/// A grammar-time error. These are fatal; the analyzer aggregates as many
/// as it can find in one pass before halting the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GrammarError {
    #[error("{loc}: {msg}")]
    Lex { loc: Loc, msg: String },
    #[error("{loc}: {msg}")]
    Parse { loc: Loc, msg: String },
    #[error("{loc}: action has unbalanced braces or a stray quote")]
    MalformedAction { loc: Loc },
    #[error("{loc}: undefined rule `{name}` (referenced from `{referrer}`)")]
    UndefinedRule {
        name: String,
        referrer: String,
        loc: Loc,
    },
    #[error("{loc}: duplicate rule `{name}`")]
    DuplicateRuleName { name: String, loc: Loc },
    #[error("{loc}: duplicate binding `{bind}` in an alternative of `{rule}`")]
    DuplicateBindingInAlt {
        rule: String,
        bind: String,
        loc: Loc,
    },
    #[error("{loc}: cut at the start of an alternative in `{rule}`")]
    CutAtAlternativeStart { rule: String, loc: Loc },
    #[error("grammar has no start rule (add `@start \"rule\"` or define `start`)")]
    NoStartRule,
}

/// Parse and analyze grammar source in one step.
pub fn compile(src: &str) -> Result<ast::Grammar, Vec<GrammarError>> {
    let mut grammar = grammar::parse_grammar(src).map_err(|e| vec![e])?;
    analysis::analyze(&mut grammar)?;
    Ok(grammar)
}

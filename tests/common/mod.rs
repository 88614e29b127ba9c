#![allow(dead_code)]

use peggen::ast::Grammar;
use peggen::interp::Value;
use peggen::runtime::tokens::{Span, Token, TokenBuffer, NAME, NUMBER, OP};

/// Parse and analyze a grammar, panicking on any grammar-time error.
pub fn grammar(src: &str) -> Grammar {
    peggen::compile(src).unwrap()
}

/// A whitespace-splitting test tokenizer: digits are `NUMBER`, identifiers
/// are `NAME`, everything else is `OP`. The buffer supplies `ENDMARKER`.
pub fn lex(input: &str) -> TokenBuffer {
    let toks = input
        .split_whitespace()
        .enumerate()
        .map(|(i, word)| {
            let kind = if word.chars().all(|c| c.is_ascii_digit()) {
                NUMBER
            } else if word.chars().all(|c| c.is_alphanumeric() || c == '_') {
                NAME
            } else {
                OP
            };
            Token::new(kind, word, Span::new(i, i + 1, 1, i + 1))
        })
        .collect();
    TokenBuffer::new(toks)
}

/// Render a value as a tree of token texts, for shape assertions.
pub fn texts(value: &Value) -> String {
    match value {
        Value::Token(t) => t.text.clone(),
        Value::Seq(vs) => {
            let inner: Vec<String> = vs.iter().map(texts).collect();
            format!("({})", inner.join(" "))
        }
        Value::Absent => "-".into(),
        Value::Unit => "·".into(),
    }
}

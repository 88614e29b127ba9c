//! The meta-grammar parser: grammar source text in, [`Grammar`] model out.
//!
//! A hand-written tokenizer turns the source into the same kind of token
//! buffer generated parsers consume, and a backtracking recognizer with
//! mark/reset discipline builds the model. Return types and action bodies
//! are opaque: the recognizer balances their brackets and braces, then
//! slices the text verbatim out of the source.

use peggen_runtime::tokens::{self, Span, Token, TokenBuffer, Tokens};

use crate::ast::{Alt, Grammar, Item, NamedItem, Rhs, Rule, RuleFlags};
use crate::{GrammarError, Loc};

/// Parse grammar source into an unanalyzed [`Grammar`].
pub fn parse_grammar(src: &str) -> Result<Grammar, GrammarError> {
    let buffer = tokenize(src)?;
    GrammarParser {
        src,
        tokens: buffer,
        pos: 0,
    }
    .file()
}

/// Tokenize grammar source.
///
/// Kinds are the conventional `NAME`/`NUMBER`/`STRING`/`OP` set, with every
/// punctuation character its own single-char `OP`. `#` starts a comment
/// only outside braces; inside an action body it is ordinary text. String
/// literals keep their inner text (escapes untouched) and may not span
/// lines.
pub(crate) fn tokenize(src: &str) -> Result<TokenBuffer, GrammarError> {
    let mut out = Vec::new();
    let mut it = src.char_indices().peekable();
    let mut line = 1usize;
    let mut col = 1usize;
    let mut brace_depth = 0usize;

    while let Some(&(start, c)) = it.peek() {
        if c == '\n' {
            it.next();
            line += 1;
            col = 1;
        } else if c.is_whitespace() {
            it.next();
            col += 1;
        } else if c == '#' && brace_depth == 0 {
            while let Some(&(_, c)) = it.peek() {
                if c == '\n' {
                    break;
                }
                it.next();
            }
        } else if c.is_alphabetic() || c == '_' {
            let (tok_line, tok_col) = (line, col);
            let mut end = start;
            while let Some(&(i, c)) = it.peek() {
                if c.is_alphanumeric() || c == '_' {
                    it.next();
                    end = i + c.len_utf8();
                    col += 1;
                } else {
                    break;
                }
            }
            out.push(Token::new(
                tokens::NAME,
                &src[start..end],
                Span::new(start, end, tok_line, tok_col),
            ));
        } else if c.is_ascii_digit() {
            let (tok_line, tok_col) = (line, col);
            let mut end = start;
            while let Some(&(i, c)) = it.peek() {
                if c.is_alphanumeric() || c == '_' {
                    it.next();
                    end = i + c.len_utf8();
                    col += 1;
                } else {
                    break;
                }
            }
            out.push(Token::new(
                tokens::NUMBER,
                &src[start..end],
                Span::new(start, end, tok_line, tok_col),
            ));
        } else if c == '"' || c == '\'' {
            let quote = c;
            let (tok_line, tok_col) = (line, col);
            it.next();
            col += 1;
            let text_start = start + 1;
            let mut closed = None;
            while let Some(&(i, c)) = it.peek() {
                if c == '\n' {
                    break;
                }
                it.next();
                col += 1;
                if c == '\\' {
                    if let Some(&(_, esc)) = it.peek() {
                        if esc != '\n' {
                            it.next();
                            col += 1;
                        }
                    }
                } else if c == quote {
                    closed = Some(i);
                    break;
                }
            }
            let Some(quote_pos) = closed else {
                let loc = Loc {
                    line: tok_line,
                    col: tok_col,
                };
                return Err(if brace_depth > 0 {
                    GrammarError::MalformedAction { loc }
                } else {
                    GrammarError::Lex {
                        loc,
                        msg: "unterminated string literal".into(),
                    }
                });
            };
            out.push(Token::new(
                tokens::STRING,
                &src[text_start..quote_pos],
                Span::new(start, quote_pos + 1, tok_line, tok_col),
            ));
        } else {
            it.next();
            match c {
                '{' => brace_depth += 1,
                '}' => brace_depth = brace_depth.saturating_sub(1),
                _ => {}
            }
            let end = start + c.len_utf8();
            out.push(Token::new(
                tokens::OP,
                &src[start..end],
                Span::new(start, end, line, col),
            ));
            col += 1;
        }
    }

    Ok(TokenBuffer::new(out))
}

struct GrammarParser<'s> {
    src: &'s str,
    tokens: TokenBuffer,
    pos: usize,
}

impl<'s> GrammarParser<'s> {
    fn mark(&self) -> usize {
        self.pos
    }

    fn reset(&mut self, mark: usize) {
        self.pos = mark;
    }

    fn peek(&self) -> &Token {
        self.tokens.token_at(self.pos)
    }

    fn at_end(&self) -> bool {
        matches!(self.peek().kind.as_str(), tokens::ENDMARKER | tokens::EOF)
    }

    fn loc(&self) -> Loc {
        Loc::from(self.peek().span)
    }

    fn parse_err(&self, msg: impl Into<String>) -> GrammarError {
        GrammarError::Parse {
            loc: self.loc(),
            msg: msg.into(),
        }
    }

    fn name(&mut self) -> Option<Token> {
        if self.peek().kind == tokens::NAME {
            let tok = self.peek().clone();
            self.pos += 1;
            Some(tok)
        } else {
            None
        }
    }

    fn string(&mut self) -> Option<Token> {
        if self.peek().kind == tokens::STRING {
            let tok = self.peek().clone();
            self.pos += 1;
            Some(tok)
        } else {
            None
        }
    }

    /// Consume a punctuation token with the given text.
    fn expect(&mut self, text: &str) -> Option<Token> {
        let tok = self.peek();
        if tok.kind == tokens::OP && tok.text == text {
            let tok = tok.clone();
            self.pos += 1;
            Some(tok)
        } else {
            None
        }
    }

    fn op_at(&self, pos: usize, text: &str) -> bool {
        self.tokens
            .get(pos)
            .map_or(false, |t| t.kind == tokens::OP && t.text == text)
    }

    /// A rule boundary is a `NAME` at column 0 followed by `:`, or by a
    /// balanced `[type]` and then `:`.
    fn at_rule_start(&self) -> bool {
        let tok = self.peek();
        if tok.kind != tokens::NAME || tok.span.col != 1 {
            return false;
        }
        if self.op_at(self.pos + 1, ":") {
            return true;
        }
        if self.op_at(self.pos + 1, "[") {
            let mut depth = 1usize;
            let mut i = self.pos + 2;
            while let Some(t) = self.tokens.get(i) {
                if t.kind == tokens::OP {
                    match t.text.as_str() {
                        "[" => depth += 1,
                        "]" => {
                            depth -= 1;
                            if depth == 0 {
                                return self.op_at(i + 1, ":");
                            }
                        }
                        _ => {}
                    }
                }
                i += 1;
            }
        }
        false
    }

    fn file(mut self) -> Result<Grammar, GrammarError> {
        let mut metas = Vec::new();
        let mut rules = Vec::new();
        while !self.at_end() {
            if self.expect("@").is_some() {
                let key = self
                    .name()
                    .ok_or_else(|| self.parse_err("expected a name after `@`"))?;
                let value = self
                    .string()
                    .ok_or_else(|| self.parse_err("expected a quoted value after `@`"))?;
                metas.push((key.text, value.text));
            } else {
                rules.push(self.rule()?);
            }
        }
        Ok(Grammar::new(metas, rules))
    }

    fn rule(&mut self) -> Result<Rule, GrammarError> {
        let name = self
            .name()
            .ok_or_else(|| self.parse_err("expected a rule definition"))?;
        let ret_type = if self.op_at(self.pos, "[") {
            Some(self.bracketed_type()?)
        } else {
            None
        };
        self.expect(":")
            .ok_or_else(|| self.parse_err(format!("expected `:` after rule name `{}`", name.text)))?;
        let rhs = self.rhs()?;
        Ok(Rule {
            name: name.text,
            ret_type,
            rhs,
            span: name.span,
            flags: RuleFlags::default(),
        })
    }

    /// Capture `[ ... ]` verbatim, balancing nested brackets.
    fn bracketed_type(&mut self) -> Result<String, GrammarError> {
        let open = self
            .expect("[")
            .ok_or_else(|| self.parse_err("expected `[`"))?;
        let inner_start = open.span.end;
        let mut depth = 1usize;
        while !self.at_end() {
            let tok = self.peek().clone();
            self.pos += 1;
            if tok.kind == tokens::OP {
                match tok.text.as_str() {
                    "[" => depth += 1,
                    "]" => {
                        depth -= 1;
                        if depth == 0 {
                            let inner = &self.src[inner_start..tok.span.start];
                            return Ok(inner.trim().to_owned());
                        }
                    }
                    _ => {}
                }
            }
        }
        Err(GrammarError::Parse {
            loc: Loc::from(open.span),
            msg: "unterminated `[` in rule return type".into(),
        })
    }

    fn rhs(&mut self) -> Result<Rhs, GrammarError> {
        let _ = self.expect("|");
        let mut alts = vec![self.alt()?];
        while self.expect("|").is_some() {
            alts.push(self.alt()?);
        }
        Ok(Rhs { alts })
    }

    fn at_alt_end(&self) -> bool {
        if self.at_end() || self.at_rule_start() {
            return true;
        }
        let tok = self.peek();
        tok.kind == tokens::OP && matches!(tok.text.as_str(), "|" | ")" | "]" | "{" | "@")
    }

    fn alt(&mut self) -> Result<Alt, GrammarError> {
        let mut items: Vec<NamedItem> = Vec::new();
        let mut icut = None;
        while !self.at_alt_end() {
            let ni = self.named_item()?;
            if ni.item == Item::Cut {
                if icut.is_some() {
                    return Err(self.parse_err("multiple cut operators in one alternative"));
                }
                icut = Some(items.len());
            }
            items.push(ni);
        }
        let action = if self.op_at(self.pos, "{") {
            Some(self.action()?)
        } else {
            None
        };
        if items.is_empty() {
            return Err(self.parse_err("expected at least one item in alternative"));
        }
        Ok(Alt {
            items,
            action,
            icut,
        })
    }

    fn named_item(&mut self) -> Result<NamedItem, GrammarError> {
        let mark = self.mark();
        if let Some(bind) = self.name() {
            if self.expect("=").is_some() {
                let item = self.item()?;
                return Ok(NamedItem {
                    bind: Some(bind.text),
                    item,
                });
            }
            self.reset(mark);
        }
        let item = self.item()?;
        Ok(NamedItem { bind: None, item })
    }

    fn item(&mut self) -> Result<Item, GrammarError> {
        let atom = self.atom()?;
        if self.expect("?").is_some() {
            Ok(Item::Optional(wrap(atom)))
        } else if self.expect("*").is_some() {
            Ok(Item::ZeroOrMore(wrap(atom)))
        } else if self.expect("+").is_some() {
            Ok(Item::OneOrMore(wrap(atom)))
        } else if self.expect(".").is_some() {
            // separator form: the leading atom separates the suffix atom
            let elem = self.atom()?;
            self.expect("+")
                .ok_or_else(|| self.parse_err("expected `+` after separated item"))?;
            Ok(Item::Separated {
                sep: Box::new(atom),
                item: wrap(elem),
            })
        } else {
            Ok(atom)
        }
    }

    fn atom(&mut self) -> Result<Item, GrammarError> {
        if let Some(tok) = self.name() {
            return Ok(if is_token_kind(&tok.text) {
                Item::TokenRef(tok.text)
            } else {
                Item::RuleRef(tok.text)
            });
        }
        if let Some(tok) = self.string() {
            return Ok(Item::StringLit(tok.text));
        }
        if self.expect("(").is_some() {
            let rhs = self.rhs()?;
            self.expect(")")
                .ok_or_else(|| self.parse_err("expected `)`"))?;
            return Ok(Item::Group(rhs));
        }
        if self.expect("[").is_some() {
            let rhs = self.rhs()?;
            self.expect("]")
                .ok_or_else(|| self.parse_err("expected `]`"))?;
            return Ok(Item::Optional(rhs));
        }
        if self.expect("&").is_some() {
            let operand = self.atom()?;
            return Ok(Item::PositiveLookahead(wrap(operand)));
        }
        if self.expect("!").is_some() {
            let operand = self.atom()?;
            return Ok(Item::NegativeLookahead(wrap(operand)));
        }
        if self.expect("~").is_some() {
            return Ok(Item::Cut);
        }
        Err(self.parse_err(format!("expected an item, found {}", self.peek())))
    }

    /// Capture `{ ... }` verbatim, balancing nested braces. String literals
    /// were tokenized as single tokens, so quotes inside the action cannot
    /// unbalance anything here.
    fn action(&mut self) -> Result<String, GrammarError> {
        let open = self
            .expect("{")
            .ok_or_else(|| self.parse_err("expected `{`"))?;
        let inner_start = open.span.end;
        let mut depth = 1usize;
        while !self.at_end() {
            let tok = self.peek().clone();
            self.pos += 1;
            if tok.kind == tokens::OP {
                match tok.text.as_str() {
                    "{" => depth += 1,
                    "}" => {
                        depth -= 1;
                        if depth == 0 {
                            let inner = &self.src[inner_start..tok.span.start];
                            return Ok(inner.trim().to_owned());
                        }
                    }
                    _ => {}
                }
            }
        }
        Err(GrammarError::MalformedAction {
            loc: Loc::from(open.span),
        })
    }
}

/// Suffix and lookahead operands are stored as a right-hand side; a
/// parenthesized group contributes its inner alternatives directly.
fn wrap(atom: Item) -> Rhs {
    match atom {
        Item::Group(rhs) => rhs,
        other => Rhs::single(other),
    }
}

/// Uppercase identifiers name token kinds; everything else names a rule.
fn is_token_kind(name: &str) -> bool {
    name == name.to_ascii_uppercase() && name.chars().any(|c| c.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_skips_comments_and_tracks_columns() {
        let buf = tokenize("a: NUMBER # trailing\nb: NAME\n").unwrap();
        let kinds: Vec<&str> = buf.tokens().iter().map(|t| t.kind.as_str()).collect();
        assert_eq!(kinds, ["NAME", "OP", "NAME", "NAME", "OP", "NAME", "ENDMARKER"]);
        assert_eq!(buf.tokens()[3].span.line, 2);
        assert_eq!(buf.tokens()[3].span.col, 1);
    }

    #[test]
    fn hash_inside_action_is_not_a_comment() {
        let buf = tokenize("a: NUMBER { tag(\"#\") # not a comment\n }\n").unwrap();
        assert!(buf.tokens().iter().any(|t| t.text == "#"));
    }

    #[test]
    fn parses_rule_structure() {
        let g = parse_grammar("start: NUMBER ENDMARKER\n").unwrap();
        assert_eq!(g.rules.len(), 1);
        let alt = &g.rules[0].rhs.alts[0];
        assert_eq!(alt.items.len(), 2);
        assert_eq!(alt.items[0].item, Item::TokenRef("NUMBER".into()));
    }

    #[test]
    fn parses_alternation_bindings_and_actions() {
        let g = parse_grammar("expr[i64]:\n    | l=expr '+' r=term { l + r }\n    | term\nterm[i64]: NUMBER\n").unwrap();
        assert_eq!(g.rules.len(), 2);
        let expr = &g.rules[0];
        assert_eq!(expr.ret_type.as_deref(), Some("i64"));
        assert_eq!(expr.rhs.alts.len(), 2);
        let first = &expr.rhs.alts[0];
        assert_eq!(first.items[0].bind.as_deref(), Some("l"));
        assert_eq!(first.items[1].item, Item::StringLit("+".into()));
        assert_eq!(first.action.as_deref(), Some("l + r"));
    }

    #[test]
    fn parses_separated_form() {
        let g = parse_grammar("start: ','.NUMBER+ ENDMARKER\n").unwrap();
        match &g.rules[0].rhs.alts[0].items[0].item {
            Item::Separated { sep, item } => {
                assert_eq!(**sep, Item::StringLit(",".into()));
                assert_eq!(
                    item.as_single().unwrap().item,
                    Item::TokenRef("NUMBER".into())
                );
            }
            other => panic!("expected separated item, got {:?}", other),
        }
    }

    #[test]
    fn parses_lookaheads_cut_and_optionals() {
        let g = parse_grammar("start: &NAME !'x' ~ [NUMBER] 'y'? NAME* \n").unwrap();
        let items = &g.rules[0].rhs.alts[0].items;
        assert!(matches!(items[0].item, Item::PositiveLookahead(_)));
        assert!(matches!(items[1].item, Item::NegativeLookahead(_)));
        assert_eq!(items[2].item, Item::Cut);
        assert!(matches!(items[3].item, Item::Optional(_)));
        assert!(matches!(items[4].item, Item::Optional(_)));
        assert!(matches!(items[5].item, Item::ZeroOrMore(_)));
        assert_eq!(g.rules[0].rhs.alts[0].icut, Some(2));
    }

    #[test]
    fn metadirectives_are_collected_in_order() {
        let g = parse_grammar("@start \"top\"\n@name \"calc\"\ntop: NUMBER\n").unwrap();
        assert_eq!(
            g.metas,
            vec![
                ("start".to_owned(), "top".to_owned()),
                ("name".to_owned(), "calc".to_owned())
            ]
        );
        assert_eq!(g.start_rule(), Some("top"));
    }

    #[test]
    fn group_under_suffix_contributes_alternatives_directly() {
        let g = parse_grammar("start: ('a' | 'b')* ENDMARKER\n").unwrap();
        match &g.rules[0].rhs.alts[0].items[0].item {
            Item::ZeroOrMore(rhs) => assert_eq!(rhs.alts.len(), 2),
            other => panic!("expected repetition, got {:?}", other),
        }
    }

    #[test]
    fn unbalanced_action_is_malformed() {
        let err = parse_grammar("a: NUMBER { Ast::new( \n").unwrap_err();
        assert!(matches!(err, GrammarError::MalformedAction { .. }));
    }

    #[test]
    fn unterminated_string_is_a_lex_error() {
        let err = parse_grammar("a: 'unclosed\n").unwrap_err();
        assert!(matches!(err, GrammarError::Lex { .. }));
    }

    #[test]
    fn multiple_cuts_are_rejected() {
        let err = parse_grammar("a: 'x' ~ 'y' ~ 'z'\n").unwrap_err();
        assert!(matches!(err, GrammarError::Parse { .. }));
    }

    #[test]
    fn rule_boundary_needs_column_zero() {
        // `b` here is a reference inside the first rule, not a new rule,
        // because the following `NAME ':'` sits at column 0.
        let g = parse_grammar("a: b\n  c\nb: NAME\nc: NUMBER\n").unwrap();
        assert_eq!(g.rules.len(), 3);
        assert_eq!(g.rules[0].rhs.alts[0].items.len(), 2);
    }
}

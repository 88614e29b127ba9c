//! The reference PEG evaluator: a deterministic, memoizing recursive-descent
//! machine over a token stream, with seed-growing for left-recursive rules.
//!
//! This is the abstract machine every generated parser reproduces. It
//! evaluates analyzed grammars directly, which makes grammars executable
//! without going through code generation, and pins down the semantics the
//! `translate` module emits.
//!
//! Action bodies are host-language text and cannot be executed here; the
//! [`SemanticActions`] seam hands them to the embedder together with the
//! materialized bindings and the synthesized default value.

use std::collections::HashMap;

use peggen_runtime::error::{ErrorState, SyntaxError};
use peggen_runtime::tokens::{Token, Tokens};
use peggen_runtime::RuleResult::{self, Failed, Matched};

use crate::ast::{Alt, Grammar, Item, Rhs, Rule};

/// A semantic value produced by evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// A matched token.
    Token(Token),
    /// Values collected by a repetition, or the default value of an
    /// alternative with several items.
    Seq(Vec<Value>),
    /// The absent value of an optional that matched nothing.
    Absent,
    /// Placeholder produced by lookaheads and the cut.
    Unit,
}

impl Value {
    pub fn token(&self) -> Option<&Token> {
        match self {
            Value::Token(t) => Some(t),
            _ => None,
        }
    }

    pub fn seq(&self) -> Option<&[Value]> {
        match self {
            Value::Seq(vs) => Some(vs),
            _ => None,
        }
    }
}

/// How alternatives with an action produce their value.
///
/// The default implementation ignores the action text and returns the
/// synthesized default, so a grammar evaluates usefully with no embedder
/// support at all.
pub trait SemanticActions {
    fn action(
        &mut self,
        rule: &str,
        action: &str,
        bindings: &[(&str, Value)],
        default: Value,
    ) -> Value {
        let _ = (rule, action, bindings);
        default
    }
}

impl<S: SemanticActions + ?Sized> SemanticActions for &mut S {
    fn action(
        &mut self,
        rule: &str,
        action: &str,
        bindings: &[(&str, Value)],
        default: Value,
    ) -> Value {
        (**self).action(rule, action, bindings, default)
    }
}

/// Evaluates every alternative to its default value.
pub struct DefaultActions;

impl SemanticActions for DefaultActions {}

/// Parse `tokens` against the entry rule of an analyzed `grammar`.
///
/// Success requires the entry rule to consume the whole buffer. On failure
/// the parse is rerun from a clean memo table to collect the expected set
/// at the furthest position reached.
///
/// # Panics
///
/// Panics if the grammar was not analyzed: the entry rule and the
/// left-recursion flags must be in place before evaluation.
pub fn parse<T: Tokens>(grammar: &Grammar, tokens: &T) -> Result<Value, SyntaxError> {
    parse_with(grammar, tokens, DefaultActions)
}

/// [`parse`] with a custom action handler.
pub fn parse_with<T: Tokens, A: SemanticActions>(
    grammar: &Grammar,
    tokens: &T,
    actions: A,
) -> Result<Value, SyntaxError> {
    let start = grammar
        .start_rule()
        .expect("grammar has no entry rule; analyze it first");
    let start_id = grammar
        .rule_index(start)
        .expect("entry rule is missing; analyze the grammar first");

    let mut ev = Evaluator {
        grammar,
        tokens,
        memo: HashMap::new(),
        err: ErrorState::new(0),
        actions,
    };

    match ev.eval_rule(start_id, 0) {
        Matched(end, value) if end == tokens.len() => return Ok(value),
        Matched(end, _) => ev.err.mark_failure(end, "EOF"),
        Failed => {}
    }

    ev.memo.clear();
    ev.err.reparse_for_error();
    match ev.eval_rule(start_id, 0) {
        Matched(end, _) if end == tokens.len() => {
            panic!("parser is nondeterministic: succeeded when reparsing for error position");
        }
        Matched(end, _) => ev.err.mark_failure(end, "EOF"),
        Failed => {}
    }
    Err(ev.err.into_syntax_error(tokens))
}

struct MemoEntry {
    result: RuleResult<Value>,
    /// Set while the rule body is being evaluated at this position; a
    /// lookup that finds it set is a left-recursive re-entry.
    in_progress: bool,
}

struct Evaluator<'g, T, A> {
    grammar: &'g Grammar,
    tokens: &'g T,
    memo: HashMap<(usize, usize), MemoEntry>,
    err: ErrorState,
    actions: A,
}

/// Whether an item's value participates in the default value of a
/// several-item alternative.
fn keep_in_default(item: &Item) -> bool {
    !matches!(
        item,
        Item::Cut | Item::PositiveLookahead(_) | Item::NegativeLookahead(_)
    )
}

impl<'g, T: Tokens, A: SemanticActions> Evaluator<'g, T, A> {
    fn eval_rule(&mut self, id: usize, pos: usize) -> RuleResult<Value> {
        let grammar = self.grammar;
        let rule = &grammar.rules[id];

        if cfg!(feature = "trace") {
            println!(
                "[PEG_TRACE] Attempting to match rule `{}` at {}",
                rule.name, pos
            );
        }

        if let Some(entry) = self.memo.get(&(id, pos)) {
            if entry.in_progress {
                // Left-recursive re-entry.
                return if rule.flags.leader {
                    entry.result.clone()
                } else if rule.flags.left_recursive {
                    // Conservative seed for non-leader cycle members.
                    Failed
                } else {
                    panic!(
                        "unexpected left recursion in rule `{}`; was the grammar analyzed?",
                        rule.name
                    );
                };
            }
            if cfg!(feature = "trace") {
                println!("[PEG_TRACE] Cached rule `{}` at {}", rule.name, pos);
            }
            return entry.result.clone();
        }

        if rule.flags.leader {
            return self.grow_seed(id, pos);
        }

        if rule.flags.left_recursive {
            // Re-entry detection only; the result would go stale between
            // seed iterations, so it is never kept.
            self.memo.insert(
                (id, pos),
                MemoEntry {
                    result: Failed,
                    in_progress: true,
                },
            );
            let res = self.eval_rule_body(rule, pos);
            self.memo.remove(&(id, pos));
            return res;
        }

        if rule.flags.memoize {
            self.memo.insert(
                (id, pos),
                MemoEntry {
                    result: Failed,
                    in_progress: true,
                },
            );
            let res = self.eval_rule_body(rule, pos);
            self.memo.insert(
                (id, pos),
                MemoEntry {
                    result: res.clone(),
                    in_progress: false,
                },
            );
            return res;
        }

        self.eval_rule_body(rule, pos)
    }

    /// The seed-growing protocol for a leader: prime the memo with a
    /// failing seed, re-evaluate the body while matches strictly lengthen,
    /// and keep the last good seed. Each iteration drops every memo entry
    /// of the cycle above the start position, since those were computed
    /// against the previous seed.
    fn grow_seed(&mut self, id: usize, pos: usize) -> RuleResult<Value> {
        let grammar = self.grammar;
        let rule = &grammar.rules[id];

        self.memo.insert(
            (id, pos),
            MemoEntry {
                result: Failed,
                in_progress: true,
            },
        );
        let mut seed: RuleResult<Value> = Failed;
        let mut seed_end = pos;

        loop {
            self.invalidate_cycle(id, pos);
            match self.eval_rule_body(rule, pos) {
                Matched(end, value) if end > seed_end => {
                    if cfg!(feature = "trace") {
                        println!(
                            "[PEG_TRACE] Grew seed of rule `{}` at {} to {}",
                            rule.name, pos, end
                        );
                    }
                    seed_end = end;
                    seed = Matched(end, value);
                    self.memo.insert(
                        (id, pos),
                        MemoEntry {
                            result: seed.clone(),
                            in_progress: true,
                        },
                    );
                }
                _ => break,
            }
        }

        self.memo.insert(
            (id, pos),
            MemoEntry {
                result: seed.clone(),
                in_progress: false,
            },
        );
        seed
    }

    fn invalidate_cycle(&mut self, leader: usize, pos: usize) {
        let grammar = self.grammar;
        let leader_name = &grammar.rules[leader].name;
        let members: Vec<usize> = grammar
            .cycle_of(leader_name)
            .into_iter()
            .flatten()
            .filter_map(|name| grammar.rule_index(name))
            .collect();
        self.memo.retain(|&(id, p), _| {
            !(members.contains(&id) && (p > pos || (p == pos && id != leader)))
        });
    }

    fn eval_rule_body(&mut self, rule: &'g Rule, pos: usize) -> RuleResult<Value> {
        self.eval_rhs(&rule.name, &rule.rhs, pos)
    }

    /// Ordered choice. Each alternation owns its cut flag; once an
    /// alternative crosses a `~` and then fails, the remaining siblings are
    /// not tried.
    fn eval_rhs(&mut self, rule_name: &'g str, rhs: &'g Rhs, pos: usize) -> RuleResult<Value> {
        for alt in &rhs.alts {
            let mut cut = false;
            match self.eval_alt(rule_name, alt, pos, &mut cut) {
                Matched(end, value) => return Matched(end, value),
                Failed if cut => return Failed,
                Failed => {}
            }
        }
        Failed
    }

    fn eval_alt(
        &mut self,
        rule_name: &'g str,
        alt: &'g Alt,
        pos: usize,
        cut: &mut bool,
    ) -> RuleResult<Value> {
        let mut vals: Vec<(Option<&'g str>, Value, bool)> = Vec::with_capacity(alt.items.len());
        let Matched(end, ()) = self.eval_seq(rule_name, alt, 0, pos, cut, &mut vals) else {
            return Failed;
        };

        let bindings: Vec<(&str, Value)> = vals
            .iter()
            .filter_map(|(bind, value, _)| bind.map(|name| (name, value.clone())))
            .collect();
        let default = if alt.items.len() == 1 {
            vals.into_iter().next().map(|(_, v, _)| v).unwrap_or(Value::Unit)
        } else {
            Value::Seq(
                vals.into_iter()
                    .filter(|(_, _, keep)| *keep)
                    .map(|(_, v, _)| v)
                    .collect(),
            )
        };
        let value = match &alt.action {
            Some(code) => self.actions.action(rule_name, code, &bindings, default),
            None => default,
        };
        Matched(end, value)
    }

    /// Evaluate the items of an alternative from `idx` on. An optional that
    /// matched is retried empty when the rest of the alternative fails
    /// behind it; everything else commits.
    fn eval_seq(
        &mut self,
        rule_name: &'g str,
        alt: &'g Alt,
        idx: usize,
        pos: usize,
        cut: &mut bool,
        vals: &mut Vec<(Option<&'g str>, Value, bool)>,
    ) -> RuleResult<()> {
        let Some(ni) = alt.items.get(idx) else {
            return Matched(pos, ());
        };
        let bind = ni.bind.as_deref();

        match &ni.item {
            Item::Cut => {
                *cut = true;
                vals.push((bind, Value::Unit, false));
                match self.eval_seq(rule_name, alt, idx + 1, pos, cut, vals) {
                    m @ Matched(..) => m,
                    Failed => {
                        vals.pop();
                        Failed
                    }
                }
            }
            Item::Optional(rhs) => {
                let mark = vals.len();
                if let Matched(np, v) = self.eval_rhs(rule_name, rhs, pos) {
                    vals.push((bind, v, true));
                    if let m @ Matched(..) = self.eval_seq(rule_name, alt, idx + 1, np, cut, vals)
                    {
                        return m;
                    }
                    vals.truncate(mark);
                }
                vals.push((bind, Value::Absent, true));
                match self.eval_seq(rule_name, alt, idx + 1, pos, cut, vals) {
                    m @ Matched(..) => m,
                    Failed => {
                        vals.truncate(mark);
                        Failed
                    }
                }
            }
            item => match self.eval_item(rule_name, item, pos) {
                Matched(np, v) => {
                    vals.push((bind, v, keep_in_default(item)));
                    match self.eval_seq(rule_name, alt, idx + 1, np, cut, vals) {
                        m @ Matched(..) => m,
                        Failed => {
                            vals.pop();
                            Failed
                        }
                    }
                }
                Failed => Failed,
            },
        }
    }

    fn eval_item(&mut self, rule_name: &'g str, item: &'g Item, pos: usize) -> RuleResult<Value> {
        match item {
            Item::RuleRef(name) => {
                let id = self
                    .grammar
                    .rule_index(name)
                    .expect("references were resolved by analysis");
                self.eval_rule(id, pos)
            }
            Item::TokenRef(kind) => {
                let tokens = self.tokens;
                match tokens.get(pos) {
                    Some(tok) if tok.kind == *kind => Matched(pos + 1, Value::Token(tok.clone())),
                    _ => {
                        self.err.mark_failure(pos, kind);
                        Failed
                    }
                }
            }
            Item::StringLit(text) => {
                let tokens = self.tokens;
                match tokens.get(pos) {
                    Some(tok) if tok.text == *text => Matched(pos + 1, Value::Token(tok.clone())),
                    _ => {
                        self.err.mark_failure(pos, &format!("\"{}\"", text));
                        Failed
                    }
                }
            }
            Item::Group(rhs) => self.eval_rhs(rule_name, rhs, pos),
            Item::Optional(rhs) => match self.eval_rhs(rule_name, rhs, pos) {
                m @ Matched(..) => m,
                Failed => Matched(pos, Value::Absent),
            },
            Item::ZeroOrMore(rhs) => {
                let (end, vals) = self.eval_repeat(rule_name, rhs, pos);
                Matched(end, Value::Seq(vals))
            }
            Item::OneOrMore(rhs) => {
                let (end, vals) = self.eval_repeat(rule_name, rhs, pos);
                if vals.is_empty() {
                    Failed
                } else {
                    Matched(end, Value::Seq(vals))
                }
            }
            Item::Separated { sep, item } => {
                let Matched(mut p, first) = self.eval_rhs(rule_name, item, pos) else {
                    return Failed;
                };
                let mut vals = vec![first];
                loop {
                    let q = p;
                    let Matched(p2, _) = self.eval_item(rule_name, sep, q) else {
                        break;
                    };
                    let Matched(p3, v) = self.eval_rhs(rule_name, item, p2) else {
                        break;
                    };
                    if p3 == q {
                        break;
                    }
                    vals.push(v);
                    p = p3;
                }
                Matched(p, Value::Seq(vals))
            }
            Item::PositiveLookahead(rhs) => {
                self.err.suppress_fail += 1;
                let res = self.eval_rhs(rule_name, rhs, pos);
                self.err.suppress_fail -= 1;
                match res {
                    Matched(..) => Matched(pos, Value::Unit),
                    Failed => Failed,
                }
            }
            Item::NegativeLookahead(rhs) => {
                self.err.suppress_fail += 1;
                let res = self.eval_rhs(rule_name, rhs, pos);
                self.err.suppress_fail -= 1;
                match res {
                    Matched(..) => Failed,
                    Failed => Matched(pos, Value::Unit),
                }
            }
            Item::Cut => Matched(pos, Value::Unit),
        }
    }

    /// Greedy repetition. Never backtracks into shorter matches; a
    /// zero-width match is taken once and ends the loop so nullable
    /// elements cannot spin.
    fn eval_repeat(&mut self, rule_name: &'g str, rhs: &'g Rhs, pos: usize) -> (usize, Vec<Value>) {
        let mut vals = Vec::new();
        let mut p = pos;
        loop {
            match self.eval_rhs(rule_name, rhs, p) {
                Matched(np, v) => {
                    vals.push(v);
                    if np == p {
                        break;
                    }
                    p = np;
                }
                Failed => break,
            }
        }
        (p, vals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::parse_grammar;
    use peggen_runtime::tokens::{Span, Token, TokenBuffer, NAME, NUMBER, OP};

    fn grammar(src: &str) -> Grammar {
        let mut g = parse_grammar(src).unwrap();
        crate::analysis::analyze(&mut g).unwrap();
        g
    }

    fn lex(input: &str) -> TokenBuffer {
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

    fn texts(value: &Value) -> String {
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

    #[test]
    fn single_token_rule() {
        let g = grammar("start: NUMBER ENDMARKER\n");
        let v = parse(&g, &lex("42")).unwrap();
        assert_eq!(v.seq().unwrap()[0].token().unwrap().text, "42");
    }

    #[test]
    fn cut_inside_group_stays_inside() {
        // The inner alternation crosses its cut and fails, which kills the
        // inner sibling but must not keep the outer alternation from trying
        // its own second alternative.
        let g = grammar("start: ( 'a' ~ 'b' | 'c' ) ENDMARKER | 'a' NAME ENDMARKER\n");
        assert!(parse(&g, &lex("a x")).is_ok());
    }

    #[test]
    fn optional_is_retried_empty_when_the_rest_fails() {
        let g = grammar("start: 'a'? 'a' ENDMARKER\n");
        assert!(parse(&g, &lex("a")).is_ok());
        assert!(parse(&g, &lex("a a")).is_ok());
        assert!(parse(&g, &lex("a a a")).is_err());
    }

    #[test]
    fn custom_actions_receive_bindings_and_text() {
        struct Recorder(Vec<String>);
        impl SemanticActions for Recorder {
            fn action(
                &mut self,
                rule: &str,
                action: &str,
                bindings: &[(&str, Value)],
                default: Value,
            ) -> Value {
                let names: Vec<&str> = bindings.iter().map(|(n, _)| *n).collect();
                self.0.push(format!("{rule}: {{{action}}} [{}]", names.join(",")));
                default
            }
        }
        let g = grammar("start: n=NUMBER ENDMARKER { leaf(n) }\n");
        let mut rec = Recorder(Vec::new());
        parse_with(&g, &lex("7"), &mut rec).unwrap();
        assert_eq!(rec.0, vec!["start: {leaf(n)} [n]"]);
    }

    #[test]
    fn left_recursive_expression_is_left_associative() {
        let g = grammar("start: e ENDMARKER\ne: e '+' NUMBER | NUMBER\n");
        let v = parse(&g, &lex("1 + 2 + 3")).unwrap();
        assert_eq!(texts(&v), "(((1 + 2) + 3) )");
    }
}

//! The grammar model: a typed tree of rules, alternatives, and items.
//!
//! Constructed by the meta-grammar parser, annotated in place by the
//! analyzer, and read-only afterwards. Equal trees denote equal grammars,
//! and `Display` renders a tree back into grammar-file syntax, so a printed
//! grammar re-parses to a structurally identical model.

use std::collections::HashMap;
use std::fmt;

use peggen_runtime::tokens::Span;

/// An ordered collection of rules keyed by unique name, plus metadata
/// directives. Insertion order is preserved so code emission stays
/// deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Grammar {
    /// `@key "value"` directives, in source order. `start` names the entry
    /// rule; `name` names the emitted parser module.
    pub metas: Vec<(String, String)>,
    pub rules: Vec<Rule>,
    /// Left-recursive cycles found by the analyzer; each entry lists the
    /// rule names of one strongly connected component.
    pub cycles: Vec<Vec<String>>,
    index: HashMap<String, usize>,
}

impl Grammar {
    /// For duplicate rule names only the first occurrence is indexed; the
    /// duplicate itself is reported by the analyzer.
    pub fn new(metas: Vec<(String, String)>, rules: Vec<Rule>) -> Grammar {
        let mut index = HashMap::new();
        for (i, rule) in rules.iter().enumerate() {
            index.entry(rule.name.clone()).or_insert(i);
        }
        Grammar {
            metas,
            rules,
            cycles: Vec::new(),
            index,
        }
    }

    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metas
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn rule(&self, name: &str) -> Option<&Rule> {
        self.index.get(name).map(|&i| &self.rules[i])
    }

    pub(crate) fn rule_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn contains_rule(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// The entry rule: `@start "rule"` if present, else a rule literally
    /// named `start`.
    pub fn start_rule(&self) -> Option<&str> {
        match self.meta("start") {
            Some(name) => Some(name),
            None => self.contains_rule("start").then_some("start"),
        }
    }

    /// The cycle a rule belongs to, if the analyzer put it in one.
    pub fn cycle_of(&self, name: &str) -> Option<&[String]> {
        self.cycles
            .iter()
            .find(|members| members.iter().any(|m| m == name))
            .map(|members| members.as_slice())
    }
}

/// A single rule definition. `ret_type` is carried verbatim to the code
/// generator and never inspected here.
#[derive(Debug, Clone, Eq)]
pub struct Rule {
    pub name: String,
    pub ret_type: Option<String>,
    pub rhs: Rhs,
    pub span: Span,
    pub flags: RuleFlags,
}

/// Equality is structural: equal trees denote equal grammars, wherever
/// they were written. Spans are positional metadata and stay out of it.
impl PartialEq for Rule {
    fn eq(&self, other: &Rule) -> bool {
        self.name == other.name
            && self.ret_type == other.ret_type
            && self.rhs == other.rhs
            && self.flags == other.flags
    }
}

/// Flags set by the analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RuleFlags {
    /// The rule can match the empty token sequence.
    pub nullable: bool,
    /// The rule participates in a left-recursive cycle.
    pub left_recursive: bool,
    /// The rule heads a left-recursive cycle and carries the seed during
    /// seed-growing.
    pub leader: bool,
    /// Rule invocations go through the memo table. Always true for leaders;
    /// also set for rules referenced more than once.
    pub memoize: bool,
}

/// An ordered, non-empty sequence of alternatives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rhs {
    pub alts: Vec<Alt>,
}

impl Rhs {
    /// A right-hand side holding one unnamed item; how lookahead operands
    /// and suffixed atoms are wrapped.
    pub fn single(item: Item) -> Rhs {
        Rhs {
            alts: vec![Alt {
                items: vec![NamedItem { bind: None, item }],
                action: None,
                icut: None,
            }],
        }
    }

    /// The sole item of a single-alternative, single-item right-hand side.
    pub fn as_single(&self) -> Option<&NamedItem> {
        match self.alts.as_slice() {
            [alt] if alt.items.len() == 1 && alt.action.is_none() => Some(&alt.items[0]),
            _ => None,
        }
    }
}

/// One alternative: its items, an optional verbatim action, and the
/// position of the cut operator if the alternative has one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alt {
    pub items: Vec<NamedItem>,
    pub action: Option<String>,
    pub icut: Option<usize>,
}

/// An item with an optional binding exposing its value to the action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedItem {
    pub bind: Option<String>,
    pub item: Item,
}

/// The closed set of parsing expressions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    /// Reference to another rule.
    RuleRef(String),
    /// Reference to a lexical token kind, e.g. `NUMBER`.
    TokenRef(String),
    /// Literal terminal matching a token whose text equals the payload.
    StringLit(String),
    /// Parenthesized sub-expression.
    Group(Rhs),
    /// Matches or succeeds with the absent value.
    Optional(Rhs),
    /// Greedy repetition, possibly empty.
    ZeroOrMore(Rhs),
    /// Greedy repetition, at least once.
    OneOrMore(Rhs),
    /// `item (sep item)*`, separator values discarded.
    Separated { sep: Box<Item>, item: Rhs },
    /// `&e`: succeeds iff `e` matches; consumes nothing.
    PositiveLookahead(Rhs),
    /// `!e`: succeeds iff `e` fails; consumes nothing.
    NegativeLookahead(Rhs),
    /// `~`: commits to the current alternative.
    Cut,
}

impl fmt::Display for Grammar {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (key, value) in &self.metas {
            write!(f, "@{} ", key)?;
            write_string_lit(f, value)?;
            writeln!(f)?;
        }
        if !self.metas.is_empty() {
            writeln!(f)?;
        }
        for rule in &self.rules {
            writeln!(f, "{}", rule)?;
        }
        Ok(())
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(ty) = &self.ret_type {
            write!(f, "[{}]", ty)?;
        }
        write!(f, ":")?;
        if self.rhs.alts.len() == 1 {
            write!(f, " {}", self.rhs.alts[0])
        } else {
            for alt in &self.rhs.alts {
                write!(f, "\n    | {}", alt)?;
            }
            Ok(())
        }
    }
}

impl fmt::Display for Rhs {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, alt) in self.alts.iter().enumerate() {
            if i > 0 {
                write!(f, " | ")?;
            }
            write!(f, "{}", alt)?;
        }
        Ok(())
    }
}

impl fmt::Display for Alt {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, item) in self.items.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", item)?;
        }
        if let Some(action) = &self.action {
            write!(f, " {{ {} }}", action)?;
        }
        Ok(())
    }
}

impl fmt::Display for NamedItem {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(bind) = &self.bind {
            write!(f, "{}=", bind)?;
        }
        write!(f, "{}", self.item)
    }
}

/// Renders a wrapped operand the way an atom is written: bare if it is a
/// single plain item, parenthesized otherwise.
fn fmt_atom(f: &mut fmt::Formatter, rhs: &Rhs) -> fmt::Result {
    match rhs.as_single() {
        Some(ni) if ni.bind.is_none() && is_atomic(&ni.item) => write!(f, "{}", ni.item),
        _ => write!(f, "({})", rhs),
    }
}

fn is_atomic(item: &Item) -> bool {
    matches!(
        item,
        Item::RuleRef(_) | Item::TokenRef(_) | Item::StringLit(_) | Item::Group(_) | Item::Optional(_)
    )
}

/// Render string text the way the grammar lexer will read it back: the
/// text is verbatim, a backslash only protects the character after it, so
/// the delimiter must be a quote with no bare occurrence inside. A parsed
/// literal always has one (its own delimiter had to be protected); a
/// hand-built text with bare occurrences of both quotes falls back to
/// protecting the single quotes.
fn write_string_lit(f: &mut fmt::Formatter, text: &str) -> fmt::Result {
    if !has_bare(text, '\'') {
        write!(f, "'{}'", text)
    } else if !has_bare(text, '"') {
        write!(f, "\"{}\"", text)
    } else {
        write!(f, "'")?;
        let mut protected = false;
        for c in text.chars() {
            if !protected && c == '\'' {
                write!(f, "\\")?;
            }
            write!(f, "{}", c)?;
            protected = !protected && c == '\\';
        }
        write!(f, "'")
    }
}

/// Whether `quote` occurs in `text` outside backslash protection.
fn has_bare(text: &str, quote: char) -> bool {
    let mut protected = false;
    let mut found = false;
    for c in text.chars() {
        if !protected && c == quote {
            found = true;
        }
        protected = !protected && c == '\\';
    }
    found
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Item::RuleRef(name) | Item::TokenRef(name) => write!(f, "{}", name),
            Item::StringLit(text) => write_string_lit(f, text),
            Item::Group(rhs) => write!(f, "({})", rhs),
            Item::Optional(rhs) => write!(f, "[{}]", rhs),
            Item::ZeroOrMore(rhs) => {
                fmt_atom(f, rhs)?;
                write!(f, "*")
            }
            Item::OneOrMore(rhs) => {
                fmt_atom(f, rhs)?;
                write!(f, "+")
            }
            Item::Separated { sep, item } => {
                write!(f, "{}.", sep)?;
                fmt_atom(f, item)?;
                write!(f, "+")
            }
            Item::PositiveLookahead(rhs) => {
                write!(f, "&")?;
                fmt_atom(f, rhs)
            }
            Item::NegativeLookahead(rhs) => {
                write!(f, "!")?;
                fmt_atom(f, rhs)
            }
            Item::Cut => write!(f, "~"),
        }
    }
}

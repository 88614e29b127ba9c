//! Grammar validation and classification.
//!
//! One pass of three fixed-point computations over the rule graph:
//! reference resolution, nullability, and left-recursion detection. The
//! structural checks (duplicates, bindings, cut placement, start rule) run
//! first and every error found is aggregated before the pass halts; the
//! fixed points assume a structurally sound grammar.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::ast::{Grammar, Item, Rhs, Rule};
use crate::{GrammarError, Loc};

/// Validate `grammar` and set the `nullable`/`left_recursive`/`leader`/
/// `memoize` flags in place. After a successful return the grammar is
/// read-only by contract.
pub fn analyze(grammar: &mut Grammar) -> Result<(), Vec<GrammarError>> {
    let mut errors = Vec::new();

    check_duplicate_rules(grammar, &mut errors);
    check_alternatives(grammar, &mut errors);
    check_references(grammar, &mut errors);
    check_start(grammar, &mut errors);
    if !errors.is_empty() {
        return Err(errors);
    }

    compute_nullability(grammar);
    detect_left_recursion(grammar);
    mark_memoized(grammar);
    Ok(())
}

fn check_duplicate_rules(grammar: &Grammar, errors: &mut Vec<GrammarError>) {
    let mut seen = HashSet::new();
    for rule in &grammar.rules {
        if !seen.insert(rule.name.as_str()) {
            errors.push(GrammarError::DuplicateRuleName {
                name: rule.name.clone(),
                loc: Loc::from(rule.span),
            });
        }
    }
}

/// Cut placement and binding uniqueness, including inside nested
/// alternations: every `Alt` is its own binding scope and cut position.
fn check_alternatives(grammar: &Grammar, errors: &mut Vec<GrammarError>) {
    for rule in &grammar.rules {
        check_rhs(rule, &rule.rhs, errors);
    }
}

fn check_rhs(rule: &Rule, rhs: &Rhs, errors: &mut Vec<GrammarError>) {
    for alt in &rhs.alts {
        if alt.icut == Some(0) {
            errors.push(GrammarError::CutAtAlternativeStart {
                rule: rule.name.clone(),
                loc: Loc::from(rule.span),
            });
        }
        let mut binds = HashSet::new();
        for ni in &alt.items {
            if let Some(bind) = &ni.bind {
                if !binds.insert(bind.as_str()) {
                    errors.push(GrammarError::DuplicateBindingInAlt {
                        rule: rule.name.clone(),
                        bind: bind.clone(),
                        loc: Loc::from(rule.span),
                    });
                }
            }
            check_item(rule, &ni.item, errors);
        }
    }
}

fn check_item(rule: &Rule, item: &Item, errors: &mut Vec<GrammarError>) {
    if let Item::Separated { sep, .. } = item {
        check_item(rule, sep, errors);
    }
    for inner in sub_rhs(item) {
        check_rhs(rule, inner, errors);
    }
}

fn check_references(grammar: &Grammar, errors: &mut Vec<GrammarError>) {
    let mut reported = HashSet::new();
    for rule in &grammar.rules {
        let mut refs = BTreeSet::new();
        collect_refs(&rule.rhs, &mut refs);
        for name in refs {
            if !grammar.contains_rule(name) && reported.insert((rule.name.clone(), name.to_owned()))
            {
                errors.push(GrammarError::UndefinedRule {
                    name: name.to_owned(),
                    referrer: rule.name.clone(),
                    loc: Loc::from(rule.span),
                });
            }
        }
    }
}

fn collect_refs<'g>(rhs: &'g Rhs, out: &mut BTreeSet<&'g str>) {
    for alt in &rhs.alts {
        for ni in &alt.items {
            collect_item_refs(&ni.item, out);
        }
    }
}

fn collect_item_refs<'g>(item: &'g Item, out: &mut BTreeSet<&'g str>) {
    if let Item::RuleRef(name) = item {
        out.insert(name);
    }
    if let Item::Separated { sep, .. } = item {
        collect_item_refs(sep, out);
    }
    for inner in sub_rhs(item) {
        collect_refs(inner, out);
    }
}

fn check_start(grammar: &Grammar, errors: &mut Vec<GrammarError>) {
    match grammar.meta("start") {
        Some(name) => {
            if !grammar.contains_rule(name) {
                errors.push(GrammarError::UndefinedRule {
                    name: name.to_owned(),
                    referrer: "@start".to_owned(),
                    loc: Loc::default(),
                });
            }
        }
        None => {
            if !grammar.contains_rule("start") {
                errors.push(GrammarError::NoStartRule);
            }
        }
    }
}

/// Nested right-hand sides of an item, if any.
fn sub_rhs(item: &Item) -> impl Iterator<Item = &Rhs> {
    let inner: Option<&Rhs> = match item {
        Item::Group(rhs)
        | Item::Optional(rhs)
        | Item::ZeroOrMore(rhs)
        | Item::OneOrMore(rhs)
        | Item::Separated { item: rhs, .. }
        | Item::PositiveLookahead(rhs)
        | Item::NegativeLookahead(rhs) => Some(rhs),
        Item::RuleRef(_) | Item::TokenRef(_) | Item::StringLit(_) | Item::Cut => None,
    };
    inner.into_iter()
}

/// Least fixed point over the finite lattice; terminates in at most
/// `|rules|` sweeps because a sweep without change is final.
fn compute_nullability(grammar: &mut Grammar) {
    let n = grammar.rules.len();
    let mut nullable = vec![false; n];
    loop {
        let mut changed = false;
        for i in 0..n {
            if !nullable[i] && rhs_nullable(&grammar.rules[i].rhs, grammar, &nullable) {
                nullable[i] = true;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    for (i, rule) in grammar.rules.iter_mut().enumerate() {
        rule.flags.nullable = nullable[i];
    }
}

fn rhs_nullable(rhs: &Rhs, grammar: &Grammar, nullable: &[bool]) -> bool {
    rhs.alts
        .iter()
        .any(|alt| alt.items.iter().all(|ni| item_nullable(&ni.item, grammar, nullable)))
}

fn item_nullable(item: &Item, grammar: &Grammar, nullable: &[bool]) -> bool {
    match item {
        Item::TokenRef(_) | Item::StringLit(_) => false,
        Item::RuleRef(name) => grammar.rule_index(name).map_or(false, |i| nullable[i]),
        Item::Optional(_)
        | Item::ZeroOrMore(_)
        | Item::PositiveLookahead(_)
        | Item::NegativeLookahead(_)
        | Item::Cut => true,
        Item::OneOrMore(rhs) | Item::Separated { item: rhs, .. } => {
            rhs_nullable(rhs, grammar, nullable)
        }
        Item::Group(rhs) => rhs_nullable(rhs, grammar, nullable),
    }
}

/// Build the left-call graph, find its strongly connected components, and
/// flag cycle members. The leader of each cycle is the member with the
/// lexicographically least name, so generated output is reproducible.
fn detect_left_recursion(grammar: &mut Grammar) {
    let n = grammar.rules.len();
    let nullable: Vec<bool> = grammar.rules.iter().map(|r| r.flags.nullable).collect();

    let mut edges: Vec<Vec<usize>> = Vec::with_capacity(n);
    for rule in &grammar.rules {
        let mut heads = BTreeSet::new();
        for alt in &rule.rhs.alts {
            left_heads_of_alt(&alt.items, grammar, &nullable, &mut heads);
        }
        edges.push(heads.into_iter().collect());
    }

    let sccs = Tarjan::run(&edges);
    let mut cycles = Vec::new();
    for scc in sccs {
        let recursive = scc.len() > 1 || edges[scc[0]].contains(&scc[0]);
        if !recursive {
            continue;
        }
        let mut members: Vec<String> = scc.iter().map(|&i| grammar.rules[i].name.clone()).collect();
        members.sort();
        for &i in &scc {
            grammar.rules[i].flags.left_recursive = true;
        }
        let leader = members[0].clone();
        let leader_idx = grammar.rule_index(&leader).unwrap();
        grammar.rules[leader_idx].flags.leader = true;
        cycles.push(members);
    }
    cycles.sort();
    grammar.cycles = cycles;
}

fn left_heads_of_alt(
    items: &[crate::ast::NamedItem],
    grammar: &Grammar,
    nullable: &[bool],
    out: &mut BTreeSet<usize>,
) {
    for ni in items {
        if !left_heads(&ni.item, grammar, nullable, out) {
            break;
        }
    }
}

/// Record the rules reachable at the left edge of `item`; the return value
/// says whether traversal may continue past it without consuming input.
fn left_heads(
    item: &Item,
    grammar: &Grammar,
    nullable: &[bool],
    out: &mut BTreeSet<usize>,
) -> bool {
    match item {
        Item::RuleRef(name) => match grammar.rule_index(name) {
            Some(i) => {
                out.insert(i);
                nullable[i]
            }
            None => false,
        },
        Item::TokenRef(_) | Item::StringLit(_) => false,
        Item::Cut => true,
        Item::Optional(rhs) | Item::ZeroOrMore(rhs) => {
            left_heads_of_rhs(rhs, grammar, nullable, out);
            true
        }
        // Lookaheads consume nothing and propagate left calls into their
        // operand.
        Item::PositiveLookahead(rhs) | Item::NegativeLookahead(rhs) => {
            left_heads_of_rhs(rhs, grammar, nullable, out);
            true
        }
        Item::OneOrMore(rhs) => {
            left_heads_of_rhs(rhs, grammar, nullable, out);
            rhs_nullable(rhs, grammar, nullable)
        }
        // A nullable element exposes the separator at the left edge too.
        Item::Separated { sep, item: rhs } => {
            left_heads_of_rhs(rhs, grammar, nullable, out);
            let elem_nullable = rhs_nullable(rhs, grammar, nullable);
            if elem_nullable {
                left_heads(sep, grammar, nullable, out);
            }
            elem_nullable
        }
        Item::Group(rhs) => {
            left_heads_of_rhs(rhs, grammar, nullable, out);
            rhs_nullable(rhs, grammar, nullable)
        }
    }
}

fn left_heads_of_rhs(
    rhs: &Rhs,
    grammar: &Grammar,
    nullable: &[bool],
    out: &mut BTreeSet<usize>,
) {
    for alt in &rhs.alts {
        left_heads_of_alt(&alt.items, grammar, nullable, out);
    }
}

/// Memoization policy: leaders always; other rules when referenced more
/// than once, except non-leader cycle members, whose results would go stale
/// between seed iterations.
fn mark_memoized(grammar: &mut Grammar) {
    let mut ref_counts: HashMap<usize, usize> = HashMap::new();
    for rule in &grammar.rules {
        count_refs(&rule.rhs, grammar, &mut ref_counts);
    }
    for (i, rule) in grammar.rules.iter_mut().enumerate() {
        let hot = ref_counts.get(&i).copied().unwrap_or(0) > 1;
        rule.flags.memoize = rule.flags.leader || (hot && !rule.flags.left_recursive);
    }
}

fn count_refs(rhs: &Rhs, grammar: &Grammar, counts: &mut HashMap<usize, usize>) {
    for alt in &rhs.alts {
        for ni in &alt.items {
            count_item_refs(&ni.item, grammar, counts);
        }
    }
}

fn count_item_refs(item: &Item, grammar: &Grammar, counts: &mut HashMap<usize, usize>) {
    if let Item::RuleRef(name) = item {
        if let Some(i) = grammar.rule_index(name) {
            *counts.entry(i).or_insert(0) += 1;
        }
    }
    if let Item::Separated { sep, .. } = item {
        count_item_refs(sep, grammar, counts);
    }
    for inner in sub_rhs(item) {
        count_refs(inner, grammar, counts);
    }
}

/// Tarjan's strongly-connected-components algorithm over rule indices.
struct Tarjan<'a> {
    edges: &'a [Vec<usize>],
    index: Vec<Option<usize>>,
    lowlink: Vec<usize>,
    on_stack: Vec<bool>,
    stack: Vec<usize>,
    next: usize,
    sccs: Vec<Vec<usize>>,
}

impl<'a> Tarjan<'a> {
    fn run(edges: &'a [Vec<usize>]) -> Vec<Vec<usize>> {
        let n = edges.len();
        let mut t = Tarjan {
            edges,
            index: vec![None; n],
            lowlink: vec![0; n],
            on_stack: vec![false; n],
            stack: Vec::new(),
            next: 0,
            sccs: Vec::new(),
        };
        for v in 0..n {
            if t.index[v].is_none() {
                t.connect(v);
            }
        }
        t.sccs
    }

    fn connect(&mut self, v: usize) {
        self.index[v] = Some(self.next);
        self.lowlink[v] = self.next;
        self.next += 1;
        self.stack.push(v);
        self.on_stack[v] = true;

        for &w in &self.edges[v] {
            match self.index[w] {
                None => {
                    self.connect(w);
                    self.lowlink[v] = self.lowlink[v].min(self.lowlink[w]);
                }
                Some(w_index) if self.on_stack[w] => {
                    self.lowlink[v] = self.lowlink[v].min(w_index);
                }
                Some(_) => {}
            }
        }

        if Some(self.lowlink[v]) == self.index[v] {
            let mut scc = Vec::new();
            loop {
                let w = self.stack.pop().unwrap();
                self.on_stack[w] = false;
                scc.push(w);
                if w == v {
                    break;
                }
            }
            self.sccs.push(scc);
        }
    }
}

//! Meta-grammar behavior end to end: print/re-parse round trips, the
//! grammar language described in itself, and pipeline error aggregation.

use peggen::{analyze, parse_grammar, GrammarError};

fn roundtrip(src: &str) {
    let first = parse_grammar(src).unwrap();
    let printed = first.to_string();
    let second = parse_grammar(&printed)
        .unwrap_or_else(|e| panic!("printed grammar failed to re-parse: {}\n{}", e, printed));
    assert_eq!(first, second, "printed form:\n{}", printed);
}

#[test]
fn roundtrip_arithmetic() {
    roundtrip(
        "@start \"expr\"\nexpr[i64]:\n    | l=expr '+' r=term { l + r }\n    | term\nterm[i64]: NUMBER { n() }\n",
    );
}

#[test]
fn roundtrip_operator_zoo() {
    roundtrip(
        "start: a? (a | 'b')* [a 'c'] &NAME !'d' ~ ','.NUMBER+ ENDMARKER\na: NAME\n",
    );
}

#[test]
fn roundtrip_quotes_and_nested_actions() {
    roundtrip("start: \"don't\" 'plain' ENDMARKER { Outer { inner: vec![1, 2] } }\n");
}

#[test]
fn roundtrip_literals_and_metas_with_mixed_quotes() {
    // A protected quote inside a literal and a bare quote inside a meta
    // value must both survive printing and re-parsing unchanged.
    roundtrip("@note 'a\"b'\nstart: 'it\\'s \"quoted\"' \"don't\" ENDMARKER\n");
}

#[test]
fn roundtrip_leading_pipe_formatting_is_insignificant() {
    let bare = parse_grammar("a: 'x' | 'y'\n").unwrap();
    let piped = parse_grammar("a:\n    | 'x'\n    | 'y'\n").unwrap();
    assert_eq!(bare, piped);
}

#[test]
fn the_meta_grammar_describes_itself() {
    let meta = r#"
# The grammar-file language, written in itself.
@start "file"
file: item* ENDMARKER
item: rule | directive
directive: '@' NAME STRING
rule: NAME ['[' NAME ']'] ':' rhs
rhs: ['|'] '|'.alt+
alt: named_item+ [action]
named_item: [NAME '='] item_expr
item_expr: atom suffix?
suffix: '?' | '*' | '+' | '.' atom '+'
atom: NAME | STRING | '(' rhs ')' | '[' rhs ']' | '&' atom | '!' atom | '~'
action: '{' atom* '}'
"#;
    let mut g = parse_grammar(meta).unwrap();
    analyze(&mut g).unwrap();
    assert_eq!(g.start_rule(), Some("file"));
    assert!(g.cycles.is_empty());
    // `atom` is referenced from four places and earns a memo entry
    assert!(g.rule("atom").unwrap().flags.memoize);
    roundtrip(meta);
}

#[test]
fn compile_aggregates_analysis_errors() {
    let errors = peggen::compile("start: ghost other\n").unwrap_err();
    assert_eq!(errors.len(), 2);
    assert!(errors
        .iter()
        .all(|e| matches!(e, GrammarError::UndefinedRule { .. })));
}

#[test]
fn compile_halts_on_the_first_syntax_error() {
    let errors = peggen::compile("start: (NUMBER\n").unwrap_err();
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], GrammarError::Parse { .. }));
}

#[test]
fn errors_carry_source_locations() {
    let err = parse_grammar("start:\n    | NUMBER {\n").unwrap_err();
    match err {
        GrammarError::MalformedAction { loc } => assert_eq!(loc.line, 2),
        other => panic!("expected a malformed action, got {:?}", other),
    }
}

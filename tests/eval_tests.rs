//! End-to-end evaluator behavior: the reference scenarios plus the
//! observable invariants (determinism, lookahead non-consumption, cut
//! short-circuiting, seed-growing results).

mod common;

use common::{grammar, lex, texts};
use peggen::interp::{parse, Value};

#[test]
fn number_endmarker() {
    let g = grammar("start: NUMBER ENDMARKER\n");
    let v = parse(&g, &lex("42")).unwrap();
    assert_eq!(v.seq().unwrap()[0].token().unwrap().text, "42");
    assert!(parse(&g, &lex("x")).is_err());
}

#[test]
fn direct_left_recursion_is_left_associative() {
    let g = grammar("start: e ENDMARKER\ne: e '+' NUMBER | NUMBER\n");
    let v = parse(&g, &lex("1 + 2 + 3")).unwrap();
    // ((1 + 2) + 3), with the trailing ENDMARKER in the outer sequence
    assert_eq!(texts(&v), "(((1 + 2) + 3) )");
}

#[test]
fn indirect_left_recursion() {
    let g = grammar("start: a ENDMARKER\na: b 'x' | NUMBER\nb: a 'y'\n");
    let v = parse(&g, &lex("1 y x")).unwrap();
    assert_eq!(texts(&v), "(((1 y) x) )");
}

#[test]
fn hidden_left_recursion_through_a_nullable_prefix() {
    let g = grammar("start: a ENDMARKER\nopt: 'x'?\na: opt a 'y' | NUMBER\n");
    let v = parse(&g, &lex("1 y y")).unwrap();
    assert_eq!(texts(&v), "((- (- 1 y) y) )");
}

#[test]
fn cut_commits_to_the_failing_alternative() {
    let g = grammar("start: '(' ~ NAME ')' | NAME\n");
    // `42` is a NUMBER where NAME is required; the cut forbids falling back
    // to the second alternative.
    let err = parse(&g, &lex("( 42 )")).unwrap_err();
    assert_eq!(err.pos, 1);
    let expected: Vec<&str> = err.expected.tokens().collect();
    assert_eq!(expected, ["NAME"]);
}

#[test]
fn without_the_cut_the_second_alternative_is_tried() {
    let g = grammar("start: '(' NAME ')' ENDMARKER | NUMBER ENDMARKER\n");
    assert!(parse(&g, &lex("7")).is_ok());
}

#[test]
fn separated_repetition_discards_separators() {
    let g = grammar("start: ','.NUMBER+ ENDMARKER\n");
    let v = parse(&g, &lex("1 , 2 , 3")).unwrap();
    let list = &v.seq().unwrap()[0];
    let elems: Vec<&str> = list
        .seq()
        .unwrap()
        .iter()
        .map(|v| v.token().unwrap().text.as_str())
        .collect();
    assert_eq!(elems, ["1", "2", "3"]);

    let v = parse(&g, &lex("1")).unwrap();
    assert_eq!(v.seq().unwrap()[0].seq().unwrap().len(), 1);
    assert!(parse(&g, &lex("1 ,")).is_err());
}

#[test]
fn optional_backtracks_when_the_rest_needs_the_token() {
    let g = grammar("start: 'a'? 'a' ENDMARKER\n");
    let one = parse(&g, &lex("a")).unwrap();
    assert_eq!(texts(&one), "(- a )");
    let two = parse(&g, &lex("a a")).unwrap();
    assert_eq!(texts(&two), "(a a )");
}

#[test]
fn lookaheads_consume_nothing() {
    let g = grammar("start: &NUMBER NUMBER ENDMARKER\n");
    assert!(parse(&g, &lex("7")).is_ok());

    let g = grammar("start: !NAME NUMBER ENDMARKER\n");
    assert!(parse(&g, &lex("7")).is_ok());
    assert!(parse(&g, &lex("x")).is_err());
}

#[test]
fn repetition_is_greedy_and_collected_in_order() {
    let g = grammar("start: NUMBER* NAME ENDMARKER\n");
    let v = parse(&g, &lex("1 2 3 end")).unwrap();
    assert_eq!(texts(&v), "((1 2 3) end )");
    // greedy: the repetition will not give back a NUMBER
    let g = grammar("start: NUMBER* NUMBER ENDMARKER\n");
    assert!(parse(&g, &lex("1 2")).is_err());
}

#[test]
fn one_or_more_requires_a_match() {
    let g = grammar("start: NAME+ ENDMARKER\n");
    assert!(parse(&g, &lex("a b c")).is_ok());
    assert!(parse(&g, &lex("1")).is_err());
}

#[test]
fn determinism_across_runs() {
    let g = grammar("start: e ENDMARKER\ne: e '+' NUMBER | e '*' NUMBER | NUMBER\n");
    let a = parse(&g, &lex("1 + 2 * 3 + 4")).unwrap();
    let b = parse(&g, &lex("1 + 2 * 3 + 4")).unwrap();
    assert_eq!(a, b);
}

#[test]
fn error_reports_the_furthest_position() {
    let g = grammar("start: NUMBER '+' NUMBER ENDMARKER\n");
    let err = parse(&g, &lex("1 + x")).unwrap_err();
    assert_eq!(err.pos, 2);
    let expected: Vec<&str> = err.expected.tokens().collect();
    assert_eq!(expected, ["NUMBER"]);
}

#[test]
fn unconsumed_input_reports_eof() {
    let g = grammar("start: NUMBER\n");
    let err = parse(&g, &lex("1 2")).unwrap_err();
    assert!(err.expected.tokens().any(|t| t == "EOF"));
}

#[test]
fn nullable_leader_alternatives_still_work() {
    let g = grammar("start: e ENDMARKER\ne: e 'x' | 'y'?\n");
    assert!(parse(&g, &lex("y x x")).is_ok());
    // a leader whose best match is empty concludes with the failing seed
    assert!(parse(&g, &lex("")).is_err());
}

#[test]
fn left_recursive_rule_reused_at_several_positions() {
    let g = grammar(
        "start: pair pair ENDMARKER\npair: '(' e ')'\ne: e '+' NUMBER | NUMBER\n",
    );
    let v = parse(&g, &lex("( 1 + 2 ) ( 3 )")).unwrap();
    assert_eq!(texts(&v), "((( (1 + 2) )) (( 3 )) )");
}

#[test]
fn default_value_excludes_lookaheads_and_cut() {
    let g = grammar("start: &NUMBER ~ NUMBER ENDMARKER\n");
    let v = parse(&g, &lex("5")).unwrap();
    assert_eq!(texts(&v), "(5 )");
}

#[test]
fn values_of_nested_groups_flow_through() {
    let g = grammar("start: ( NUMBER | NAME ) ENDMARKER\n");
    let v = parse(&g, &lex("hi")).unwrap();
    assert_eq!(v.seq().unwrap()[0].token().unwrap().text, "hi");
}

#[test]
fn empty_input_matches_a_nullable_start() {
    let g = grammar("start: NAME* ENDMARKER\n");
    let v = parse(&g, &lex("")).unwrap();
    assert_eq!(v.seq().unwrap()[0], Value::Seq(vec![]));
}

//! Code generation: walk an analyzed grammar and emit the source of a Rust
//! parser module implementing the evaluator semantics against
//! `peggen-runtime`.
//!
//! Emitted rule functions mirror the reference evaluator: memoized rules
//! check a per-rule cache, leaders run the seed-growing loop, choice is
//! cut-aware, and optional items retry empty when the rest of their
//! alternative fails. Actions and return types are spliced verbatim;
//! bindings are ordinary `let`-bound variables in the action's scope.
//!
//! Rules without a declared return type parse for effect and yield `()`;
//! declared return types must be `Clone` when the rule is memoized.

use proc_macro2::{Ident, TokenStream};
use quote::{format_ident, quote};

use crate::ast::{Alt, Grammar, Item, NamedItem, Rhs, Rule};

/// Emit a complete parser module for an analyzed grammar.
///
/// The module is named by the `@name` directive, `parser` otherwise, and
/// exposes `pub fn parse<I: Tokens>(input: &I) -> Result<T, SyntaxError>`
/// for the entry rule.
pub fn compile_grammar(grammar: &Grammar) -> TokenStream {
    let mut errors: Vec<TokenStream> = Vec::new();
    let raw_name = grammar.meta("name").unwrap_or("parser");
    let mod_name = if is_ident(raw_name) {
        format_ident!("{}", raw_name)
    } else {
        errors.push(report_error(format!(
            "`@name \"{}\"` is not a valid module name",
            raw_name
        )));
        format_ident!("parser")
    };

    let state = make_parse_state(grammar);
    let mut items: Vec<TokenStream> = Vec::new();
    for rule in &grammar.rules {
        items.push(compile_rule(grammar, rule, &mut errors));
    }

    let export = grammar
        .start_rule()
        .map(|start| compile_entry(grammar, start))
        .unwrap_or_else(|| {
            report_error("grammar has no entry rule; analysis should have rejected it".into())
        });

    quote! {
        pub mod #mod_name {
            #![allow(non_snake_case, unused)]
            use super::*;

            #state
            #(#errors)*
            #(#items)*
            #export
        }
    }
}

/// [`compile_grammar`] rendered to source text.
pub fn compile_grammar_to_string(grammar: &Grammar) -> String {
    compile_grammar(grammar).to_string()
}

fn report_error(msg: String) -> TokenStream {
    quote!(compile_error!(#msg);)
}

fn is_ident(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .map_or(false, |c| c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

fn ret_type_tokens(rule: &Rule, errors: &mut Vec<TokenStream>) -> TokenStream {
    match &rule.ret_type {
        None => quote!(()),
        Some(ty) => match ty.parse::<TokenStream>() {
            Ok(tokens) => tokens,
            Err(_) => {
                errors.push(report_error(format!(
                    "rule `{}` has an unparseable return type: {}",
                    rule.name, ty
                )));
                quote!(())
            }
        },
    }
}

fn cache_ident(rule: &Rule) -> Ident {
    format_ident!("{}_cache", rule.name)
}

fn parse_fn_ident(name: &str) -> Ident {
    format_ident!("__parse_{}", name)
}

fn make_parse_state(grammar: &Grammar) -> TokenStream {
    let mut cache_fields_def: Vec<TokenStream> = Vec::new();
    let mut cache_fields: Vec<Ident> = Vec::new();
    let mut scratch = Vec::new();
    for rule in &grammar.rules {
        if rule.flags.memoize {
            let name = cache_ident(rule);
            let ret_ty = ret_type_tokens(rule, &mut scratch);
            cache_fields_def.push(quote! {
                #name: ::std::collections::HashMap<usize, ::peggen_runtime::RuleResult<#ret_ty>>
            });
            cache_fields.push(name);
        }
    }

    quote! {
        pub struct ParseState {
            #(#cache_fields_def),*
        }

        impl ParseState {
            fn new() -> ParseState {
                ParseState {
                    #(#cache_fields: ::std::collections::HashMap::new()),*
                }
            }
        }
    }
}

fn compile_rule(grammar: &Grammar, rule: &Rule, errors: &mut Vec<TokenStream>) -> TokenStream {
    let name = parse_fn_ident(&rule.name);
    let ret_ty = ret_type_tokens(rule, errors);
    let result_used = rule.ret_type.is_some();

    let body = compile_rhs(grammar, rule, &rule.rhs, result_used, errors);

    let wrapped_body = if cfg!(feature = "trace") {
        let str_rule_name = rule.name.clone();
        quote! {{
            println!("[PEG_TRACE] Attempting to match rule `{}` at {}", #str_rule_name, __pos);
            let __peg_result: ::peggen_runtime::RuleResult<#ret_ty> = {#body};
            match __peg_result {
                ::peggen_runtime::RuleResult::Matched(__epos, __v) => {
                    println!("[PEG_TRACE] Matched rule `{}` at {} to {}", #str_rule_name, __pos, __epos);
                    ::peggen_runtime::RuleResult::Matched(__epos, __v)
                }
                ::peggen_runtime::RuleResult::Failed => {
                    println!("[PEG_TRACE] Failed to match rule `{}` at {}", #str_rule_name, __pos);
                    ::peggen_runtime::RuleResult::Failed
                }
            }
        }}
    } else {
        body
    };

    if rule.flags.leader {
        let cache_field = cache_ident(rule);
        quote! {
            fn #name<I: ::peggen_runtime::tokens::Tokens>(__input: &I, __state: &mut ParseState, __err_state: &mut ::peggen_runtime::error::ErrorState, __pos: usize) -> ::peggen_runtime::RuleResult<#ret_ty> {
                if let ::std::option::Option::Some(__entry) = __state.#cache_field.get(&__pos) {
                    return __entry.clone();
                }
                __state.#cache_field.insert(__pos, ::peggen_runtime::RuleResult::Failed);
                let mut __seed: ::peggen_runtime::RuleResult<#ret_ty> = ::peggen_runtime::RuleResult::Failed;
                let mut __seed_end = __pos;
                loop {
                    __state.#cache_field.retain(|&__p, _| __p <= __pos);
                    let __rule_result = #wrapped_body;
                    match __rule_result {
                        ::peggen_runtime::RuleResult::Matched(__end, __value) if __end > __seed_end => {
                            __seed_end = __end;
                            __seed = ::peggen_runtime::RuleResult::Matched(__end, __value);
                            __state.#cache_field.insert(__pos, __seed.clone());
                        }
                        _ => break,
                    }
                }
                __state.#cache_field.insert(__pos, __seed.clone());
                __seed
            }
        }
    } else if rule.flags.memoize {
        let cache_field = cache_ident(rule);
        quote! {
            fn #name<I: ::peggen_runtime::tokens::Tokens>(__input: &I, __state: &mut ParseState, __err_state: &mut ::peggen_runtime::error::ErrorState, __pos: usize) -> ::peggen_runtime::RuleResult<#ret_ty> {
                if let ::std::option::Option::Some(__entry) = __state.#cache_field.get(&__pos) {
                    return __entry.clone();
                }
                let __rule_result = #wrapped_body;
                __state.#cache_field.insert(__pos, __rule_result.clone());
                __rule_result
            }
        }
    } else {
        quote! {
            fn #name<I: ::peggen_runtime::tokens::Tokens>(__input: &I, __state: &mut ParseState, __err_state: &mut ::peggen_runtime::error::ErrorState, __pos: usize) -> ::peggen_runtime::RuleResult<#ret_ty> {
                #wrapped_body
            }
        }
    }
}

fn compile_entry(grammar: &Grammar, start: &str) -> TokenStream {
    let parse_fn = parse_fn_ident(start);
    let ret_ty = grammar
        .rule(start)
        .and_then(|r| r.ret_type.as_deref())
        .map(|ty| ty.parse::<TokenStream>().unwrap_or_else(|_| quote!(())))
        .unwrap_or_else(|| quote!(()));

    quote! {
        pub fn parse<I: ::peggen_runtime::tokens::Tokens>(__input: &I) -> ::std::result::Result<#ret_ty, ::peggen_runtime::error::SyntaxError> {
            let mut __err_state = ::peggen_runtime::error::ErrorState::new(0);
            let mut __state = ParseState::new();
            match #parse_fn(__input, &mut __state, &mut __err_state, 0) {
                ::peggen_runtime::RuleResult::Matched(__pos, __value) => {
                    if __pos == ::peggen_runtime::tokens::Tokens::len(__input) {
                        return ::std::result::Result::Ok(__value);
                    }
                    __err_state.mark_failure(__pos, "EOF");
                }
                ::peggen_runtime::RuleResult::Failed => {}
            }

            let mut __state = ParseState::new();
            __err_state.reparse_for_error();
            match #parse_fn(__input, &mut __state, &mut __err_state, 0) {
                ::peggen_runtime::RuleResult::Matched(__pos, __value) => {
                    if __pos == ::peggen_runtime::tokens::Tokens::len(__input) {
                        panic!("parser is nondeterministic: succeeded when reparsing for error position");
                    }
                    __err_state.mark_failure(__pos, "EOF");
                }
                ::peggen_runtime::RuleResult::Failed => {}
            }
            ::std::result::Result::Err(__err_state.into_syntax_error(__input))
        }
    }
}

/// Ordered choice with a cut flag per alternation. Each alternative resets
/// the flag; a failure after the flag is set skips the remaining siblings.
fn compile_rhs(
    grammar: &Grammar,
    rule: &Rule,
    rhs: &Rhs,
    result_used: bool,
    errors: &mut Vec<TokenStream>,
) -> TokenStream {
    let chain = rhs.alts.iter().rev().fold(
        quote!(::peggen_runtime::RuleResult::Failed),
        |fallback, alt| {
            let alt_code = compile_alt(grammar, rule, alt, result_used, errors);
            quote! {{
                __cut = false;
                let __choice_res = #alt_code;
                match __choice_res {
                    ::peggen_runtime::RuleResult::Matched(__p, __v) => ::peggen_runtime::RuleResult::Matched(__p, __v),
                    ::peggen_runtime::RuleResult::Failed if __cut => ::peggen_runtime::RuleResult::Failed,
                    ::peggen_runtime::RuleResult::Failed => #fallback,
                }
            }}
        },
    );
    quote! {{
        let mut __cut = false;
        #chain
    }}
}

fn var_ident(i: usize, ni: &NamedItem) -> Ident {
    match &ni.bind {
        Some(bind) => format_ident!("{}", bind),
        None => format_ident!("__v{}", i),
    }
}

fn keep_in_default(item: &Item) -> bool {
    !matches!(
        item,
        Item::Cut | Item::PositiveLookahead(_) | Item::NegativeLookahead(_)
    )
}

fn compile_alt(
    grammar: &Grammar,
    rule: &Rule,
    alt: &Alt,
    result_used: bool,
    errors: &mut Vec<TokenStream>,
) -> TokenStream {
    let value = if !result_used {
        quote!(())
    } else if let Some(action) = &alt.action {
        match action.parse::<TokenStream>() {
            Ok(code) => quote!({ #code }),
            Err(_) => {
                errors.push(report_error(format!(
                    "rule `{}` has an unparseable action: {}",
                    rule.name, action
                )));
                quote!(panic!())
            }
        }
    } else {
        default_value(alt)
    };

    let inner = quote!(::peggen_runtime::RuleResult::Matched(__pos, #value));
    labeled_seq(grammar, rule, &alt.items, inner, errors)
}

/// The synthesized value of an alternative without an action: a single
/// item's value, or a tuple of the item values with cut and lookaheads
/// left out.
fn default_value(alt: &Alt) -> TokenStream {
    if alt.items.len() == 1 {
        let var = var_ident(0, &alt.items[0]);
        return quote!(#var);
    }
    let kept: Vec<Ident> = alt
        .items
        .iter()
        .enumerate()
        .filter(|(_, ni)| keep_in_default(&ni.item))
        .map(|(i, ni)| var_ident(i, ni))
        .collect();
    match kept.len() {
        0 => quote!(()),
        1 => {
            let only = &kept[0];
            quote!(#only)
        }
        _ => quote!((#(#kept),*)),
    }
}

/// Chain the items of an alternative into nested matches by folding the
/// continuation backwards through the sequence. An optional item calls the
/// continuation twice: once with its match, once more with `None` if the
/// rest of the alternative failed behind it.
fn labeled_seq(
    grammar: &Grammar,
    rule: &Rule,
    items: &[NamedItem],
    inner: TokenStream,
    errors: &mut Vec<TokenStream>,
) -> TokenStream {
    items
        .iter()
        .enumerate()
        .rev()
        .fold(inner, |then, (i, ni)| {
            let var = var_ident(i, ni);
            match &ni.item {
                Item::Cut => quote! {{
                    __cut = true;
                    let #var = ();
                    #then
                }},
                Item::Optional(inner_rhs) => {
                    let inner_code = compile_rhs(grammar, rule, inner_rhs, true, errors);
                    let cont = format_ident!("__cont_{}", i);
                    quote! {{
                        let __seq_res = #inner_code;
                        let mut #cont = |__pos: usize, #var| { #then };
                        match __seq_res {
                            ::peggen_runtime::RuleResult::Matched(__newpos, __v) => {
                                match #cont(__newpos, ::std::option::Option::Some(__v)) {
                                    ::peggen_runtime::RuleResult::Matched(__p, __val) => ::peggen_runtime::RuleResult::Matched(__p, __val),
                                    ::peggen_runtime::RuleResult::Failed => #cont(__pos, ::std::option::Option::None),
                                }
                            }
                            ::peggen_runtime::RuleResult::Failed => #cont(__pos, ::std::option::Option::None),
                        }
                    }}
                }
                item => {
                    let matcher = compile_item(grammar, rule, item, errors);
                    quote! {{
                        let __seq_res = #matcher;
                        match __seq_res {
                            ::peggen_runtime::RuleResult::Matched(__pos, #var) => { #then }
                            ::peggen_runtime::RuleResult::Failed => ::peggen_runtime::RuleResult::Failed,
                        }
                    }}
                }
            }
        })
}

fn compile_item(
    grammar: &Grammar,
    rule: &Rule,
    item: &Item,
    errors: &mut Vec<TokenStream>,
) -> TokenStream {
    match item {
        Item::RuleRef(name) => {
            let func = parse_fn_ident(name);
            quote!(#func(__input, __state, __err_state, __pos))
        }
        Item::TokenRef(kind) => {
            quote! {
                match ::peggen_runtime::tokens::Tokens::get(__input, __pos) {
                    ::std::option::Option::Some(__tok) if __tok.kind == #kind => {
                        ::peggen_runtime::RuleResult::Matched(__pos + 1, __tok.clone())
                    }
                    _ => {
                        __err_state.mark_failure(__pos, #kind);
                        ::peggen_runtime::RuleResult::Failed
                    }
                }
            }
        }
        Item::StringLit(text) => {
            let expected = format!("\"{}\"", text);
            quote! {
                match ::peggen_runtime::tokens::Tokens::get(__input, __pos) {
                    ::std::option::Option::Some(__tok) if __tok.text == #text => {
                        ::peggen_runtime::RuleResult::Matched(__pos + 1, __tok.clone())
                    }
                    _ => {
                        __err_state.mark_failure(__pos, #expected);
                        ::peggen_runtime::RuleResult::Failed
                    }
                }
            }
        }
        Item::Group(rhs) => compile_rhs(grammar, rule, rhs, true, errors),
        // As a plain operand (e.g. a separator) an optional has no
        // alternative behind it to retry for; the simple form suffices.
        Item::Optional(rhs) => {
            let inner = compile_rhs(grammar, rule, rhs, true, errors);
            quote! {
                match #inner {
                    ::peggen_runtime::RuleResult::Matched(__newpos, __value) => {
                        ::peggen_runtime::RuleResult::Matched(__newpos, ::std::option::Option::Some(__value))
                    }
                    ::peggen_runtime::RuleResult::Failed => {
                        ::peggen_runtime::RuleResult::Matched(__pos, ::std::option::Option::None)
                    }
                }
            }
        }
        Item::ZeroOrMore(rhs) | Item::OneOrMore(rhs) => {
            let inner = compile_rhs(grammar, rule, rhs, true, errors);
            let result_check = if matches!(item, Item::OneOrMore(_)) {
                quote! {
                    if __repeat_value.is_empty() {
                        ::peggen_runtime::RuleResult::Failed
                    } else {
                        ::peggen_runtime::RuleResult::Matched(__repeat_pos, __repeat_value)
                    }
                }
            } else {
                quote!(::peggen_runtime::RuleResult::Matched(__repeat_pos, __repeat_value))
            };
            quote! {{
                let mut __repeat_pos = __pos;
                let mut __repeat_value = vec![];
                loop {
                    let __pos = __repeat_pos;
                    let __step_res = #inner;
                    match __step_res {
                        ::peggen_runtime::RuleResult::Matched(__newpos, __value) => {
                            __repeat_value.push(__value);
                            if __newpos == __pos { break; }
                            __repeat_pos = __newpos;
                        }
                        ::peggen_runtime::RuleResult::Failed => break,
                    }
                }
                #result_check
            }}
        }
        Item::Separated { sep, item } => {
            let sep_code = compile_item(grammar, rule, sep, errors);
            let elem = compile_rhs(grammar, rule, item, true, errors);
            quote! {{
                let mut __repeat_pos = __pos;
                let mut __repeat_value = vec![];
                loop {
                    let __q = __repeat_pos;
                    let __pos = __q;
                    let __pos = if __repeat_value.is_empty() { __pos } else {
                        let __sep_res = #sep_code;
                        match __sep_res {
                            ::peggen_runtime::RuleResult::Matched(__newpos, _) => __newpos,
                            ::peggen_runtime::RuleResult::Failed => break,
                        }
                    };
                    let __step_res = #elem;
                    match __step_res {
                        ::peggen_runtime::RuleResult::Matched(__newpos, __value) => {
                            if !__repeat_value.is_empty() && __newpos == __q { break; }
                            __repeat_value.push(__value);
                            __repeat_pos = __newpos;
                        }
                        ::peggen_runtime::RuleResult::Failed => break,
                    }
                }
                if __repeat_value.is_empty() {
                    ::peggen_runtime::RuleResult::Failed
                } else {
                    ::peggen_runtime::RuleResult::Matched(__repeat_pos, __repeat_value)
                }
            }}
        }
        Item::PositiveLookahead(rhs) => {
            let inner = compile_rhs(grammar, rule, rhs, true, errors);
            quote! {{
                __err_state.suppress_fail += 1;
                let __assert_res = #inner;
                __err_state.suppress_fail -= 1;
                match __assert_res {
                    ::peggen_runtime::RuleResult::Matched(_, __value) => ::peggen_runtime::RuleResult::Matched(__pos, __value),
                    ::peggen_runtime::RuleResult::Failed => ::peggen_runtime::RuleResult::Failed,
                }
            }}
        }
        Item::NegativeLookahead(rhs) => {
            let inner = compile_rhs(grammar, rule, rhs, false, errors);
            quote! {{
                __err_state.suppress_fail += 1;
                let __assert_res = #inner;
                __err_state.suppress_fail -= 1;
                match __assert_res {
                    ::peggen_runtime::RuleResult::Failed => ::peggen_runtime::RuleResult::Matched(__pos, ()),
                    ::peggen_runtime::RuleResult::Matched(..) => ::peggen_runtime::RuleResult::Failed,
                }
            }}
        }
        Item::Cut => quote!(::peggen_runtime::RuleResult::Matched(__pos, ())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::parse_grammar;

    fn compile(src: &str) -> String {
        let mut g = parse_grammar(src).unwrap();
        crate::analysis::analyze(&mut g).unwrap();
        compile_grammar_to_string(&g)
    }

    #[test]
    fn module_is_named_by_directive() {
        let out = compile("@name \"calc\"\nstart: NUMBER ENDMARKER\n");
        assert!(out.contains("pub mod calc"));
        assert!(out.contains("pub fn parse"));
        assert!(out.contains("__parse_start"));
    }

    #[test]
    fn leader_rules_emit_cache_and_seed_growing() {
        let out =
            compile("start[i64]: e ENDMARKER { 0 }\ne[i64]: l=e '+' NUMBER { l + 1 } | NUMBER { 0 }\n");
        assert!(out.contains("e_cache"));
        assert!(out.contains("__seed"));
        assert!(out.contains("retain"));
        // the plain start rule gets no cache of its own
        assert!(!out.contains("start_cache"));
    }

    #[test]
    fn multiply_referenced_rules_are_cached() {
        let out = compile("start: num num ENDMARKER\nnum: NUMBER\n");
        assert!(out.contains("num_cache"));
        assert!(!out.contains("__seed"));
    }

    #[test]
    fn actions_and_bindings_are_spliced() {
        let out = compile("start[i64]: n=NUMBER ENDMARKER { n.text.parse().unwrap() }\n");
        assert!(out.contains("unwrap"));
        assert!(out.contains("Matched (__pos , n)") || out.contains("Matched(__pos, n)"));
    }

    #[test]
    fn cut_is_compiled_to_the_choice_flag() {
        let out = compile("start: '(' ~ NAME ')' ENDMARKER | NAME ENDMARKER\n");
        assert!(out.contains("__cut = true"));
        assert!(out.contains("if __cut"));
    }

    #[test]
    fn emitted_text_parses_back_as_rust_tokens() {
        let out = compile("start[i64]: e ENDMARKER { 0 }\ne[i64]: e '+' NUMBER { 0 } | NUMBER { 0 }\n");
        assert!(out.parse::<TokenStream>().is_ok());
    }
}

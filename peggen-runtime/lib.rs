//! Runtime support for `peggen` parsers.
//!
//! Both the reference evaluator in the `peggen` crate and the parsers it
//! emits link against this crate: the [`RuleResult`] vocabulary, the token
//! interface in [`tokens`], and the error reporting machinery in [`error`].

pub mod error;
pub mod tokens;

/// The result of matching one parsing expression.
///
/// `Matched` carries the input position just past the match together with
/// the semantic value. `Failed` carries nothing: the caller's saved position
/// is still valid, which is what makes backtracking a non-event.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum RuleResult<T> {
    Matched(usize, T),
    Failed,
}

use crate::tokens::{Span, Tokens};
use std::collections::HashSet;
use std::fmt::{self, Display};

/// The set of terminals that would have let the parse advance past the
/// position where it ultimately failed.
#[derive(PartialEq, Eq, Debug, Clone, Default)]
pub struct ExpectedSet {
    expected: HashSet<String>,
}

impl ExpectedSet {
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.expected.iter().map(|x| x.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.expected.is_empty()
    }
}

impl Display for ExpectedSet {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        if self.expected.is_empty() {
            write!(fmt, "<unreported>")?;
        } else if self.expected.len() == 1 {
            write!(fmt, "{}", self.expected.iter().next().unwrap())?;
        } else {
            let mut expected = self.tokens().collect::<Vec<_>>();
            expected.sort();
            let mut iter = expected.into_iter();

            write!(fmt, "one of {}", iter.next().unwrap())?;
            for elem in iter {
                write!(fmt, ", {}", elem)?;
            }
        }

        Ok(())
    }
}

/// The one outward-visible parse failure: the furthest token position any
/// alternative reached, and what was expected there.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct SyntaxError {
    /// Token index of the failure.
    pub pos: usize,
    /// Source span of the token at `pos`.
    pub span: Span,
    pub expected: ExpectedSet,
}

impl Display for SyntaxError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(
            fmt,
            "syntax error at {}: expected {}",
            self.span, self.expected
        )
    }
}

impl std::error::Error for SyntaxError {}

/// Error bookkeeping threaded through one parse invocation.
///
/// The first pass only tracks the furthest failure position. If the parse
/// fails, the caller switches to `reparse_for_error` and runs the parse
/// again from a clean memo table; during that pass every failure at the
/// recorded position contributes to the expected set.
pub struct ErrorState {
    pub max_err_pos: usize,
    /// Failures inside lookaheads are not expectations; nonzero suppresses
    /// recording.
    pub suppress_fail: usize,
    pub reparsing_on_error: bool,
    pub expected: ExpectedSet,
}

impl ErrorState {
    pub fn new(initial_pos: usize) -> ErrorState {
        ErrorState {
            max_err_pos: initial_pos,
            suppress_fail: 0,
            reparsing_on_error: false,
            expected: ExpectedSet::default(),
        }
    }

    pub fn reparse_for_error(&mut self) {
        self.suppress_fail = 0;
        self.reparsing_on_error = true;
    }

    #[inline(never)]
    fn mark_failure_slow_path(&mut self, pos: usize, expected: &str) {
        if pos == self.max_err_pos {
            self.expected.expected.insert(expected.to_owned());
        }
    }

    #[inline]
    pub fn mark_failure(&mut self, pos: usize, expected: &str) {
        if self.suppress_fail == 0 {
            if self.reparsing_on_error {
                self.mark_failure_slow_path(pos, expected);
            } else if pos > self.max_err_pos {
                self.max_err_pos = pos;
            }
        }
    }

    pub fn into_syntax_error<T: Tokens + ?Sized>(self, input: &T) -> SyntaxError {
        SyntaxError {
            pos: self.max_err_pos,
            span: input.position_repr(self.max_err_pos),
            expected: self.expected,
        }
    }
}

//! Assertion results and the override record used to build them.

use std::fmt;

/// Name given to assertions recorded without a message.
pub const UNNAMED_ASSERT: &str = "(unnamed assert)";

/// The kind of assertion that produced a result.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Operator {
    Ok,
    NotOk,
    Pass,
    Fail,
    Equal,
    NotEqual,
    Skip,
    Error,
}

impl Operator {
    /// The name printed in the `operator:` diagnostic line.
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Ok => "ok",
            Operator::NotOk => "notOk",
            Operator::Pass => "pass",
            Operator::Fail => "fail",
            Operator::Equal => "equal",
            Operator::NotEqual => "notEqual",
            Operator::Skip => "skip",
            Operator::Error => "error",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error attached to a failing result.
///
/// Its presence on a result is the "has error" flag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorPayload {
    pub message: String,
}

impl ErrorPayload {
    pub fn new(message: impl Into<String>) -> Self {
        ErrorPayload {
            message: message.into(),
        }
    }
}

/// One recorded assertion, as published to the results aggregator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssertionResult {
    /// Node-local sequence id, assigned when the assertion is recorded.
    pub id: usize,
    pub name: String,
    pub operator: Operator,
    pub ok: bool,
    pub actual: Option<String>,
    pub expected: Option<String>,
    pub not_expected: Option<String>,
    pub skip: bool,
    pub todo: bool,
    pub error: Option<ErrorPayload>,
    /// Free-text comment. A result carrying one is printed as `# text` and
    /// never consumes a sequence number.
    pub comment: Option<String>,
}

impl AssertionResult {
    pub(crate) fn comment(text: String) -> Self {
        AssertionResult {
            id: 0,
            name: String::new(),
            operator: Operator::Pass,
            ok: true,
            actual: None,
            expected: None,
            not_expected: None,
            skip: false,
            todo: false,
            error: None,
            comment: Some(text),
        }
    }

    pub fn is_comment(&self) -> bool {
        self.comment.as_deref().is_some_and(|c| !c.is_empty())
    }
}

/// Optional fields describing an assertion.
///
/// Used both as the base record an assertion method fills in and as the
/// caller-supplied override: every field set on the override wins.
///
/// ```rust,no_run
/// # fn main() { rstap::run(|t| {
/// t.ok_with(false, "not done yet", rstap::Extra::new().todo());
/// t.equal_with(2, 2, "", rstap::Extra::new().name("two is two"));
/// # }); }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Extra {
    pub name: Option<String>,
    pub operator: Option<Operator>,
    pub actual: Option<String>,
    pub expected: Option<String>,
    pub not_expected: Option<String>,
    pub error: Option<ErrorPayload>,
    pub skip: bool,
    pub todo: bool,
}

impl Extra {
    pub fn new() -> Self {
        Extra::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn operator(mut self, operator: Operator) -> Self {
        self.operator = Some(operator);
        self
    }

    pub fn actual(mut self, actual: impl Into<String>) -> Self {
        self.actual = Some(actual.into());
        self
    }

    pub fn expected(mut self, expected: impl Into<String>) -> Self {
        self.expected = Some(expected.into());
        self
    }

    pub fn not_expected(mut self, not_expected: impl Into<String>) -> Self {
        self.not_expected = Some(not_expected.into());
        self
    }

    pub fn error(mut self, error: ErrorPayload) -> Self {
        self.error = Some(error);
        self
    }

    pub fn skip(mut self) -> Self {
        self.skip = true;
        self
    }

    pub fn todo(mut self) -> Self {
        self.todo = true;
        self
    }

    /// Merge `extra` over `self`: non-empty fields of `extra` win.
    pub(crate) fn merged(self, extra: Extra) -> Extra {
        Extra {
            name: non_empty(extra.name).or(non_empty(self.name)),
            operator: extra.operator.or(self.operator),
            actual: non_empty(extra.actual).or(non_empty(self.actual)),
            expected: non_empty(extra.expected).or(non_empty(self.expected)),
            not_expected: non_empty(extra.not_expected).or(non_empty(self.not_expected)),
            error: extra.error.or(self.error),
            skip: extra.skip || self.skip,
            todo: extra.todo || self.todo,
        }
    }
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.is_empty())
}

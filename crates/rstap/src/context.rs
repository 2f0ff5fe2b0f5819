//! Closure-based test API: the `Test` handle passed to every body.

use crate::node::{NodeId, Runtime};
use crate::remote::Remote;
use crate::result::{ErrorPayload, Extra, Operator};
use std::fmt::{self, Debug};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

/// A handle to one test in the tree.
///
/// Bodies receive a `&Test` and use it to declare a plan, record assertions,
/// add subtests and end the test. Subtests are queued and run in declaration
/// order once the body has returned and the test has called `end` (or met its
/// plan).
///
/// # Example
/// ```rust,no_run
/// fn main() {
///     rstap::run(|t| {
///         t.test("arithmetic", |t| {
///             t.plan(2);
///             t.equal(2 + 3, 5, "adds");
///             t.not_equal(2 * 3, 5, "multiplies");
///         });
///     });
/// }
/// ```
#[derive(Copy, Clone)]
pub struct Test<'a> {
    rt: &'a Runtime,
    id: NodeId,
}

impl<'a> Test<'a> {
    pub(crate) fn new(rt: &'a Runtime, id: NodeId) -> Self {
        Test { rt, id }
    }

    pub fn name(&self) -> String {
        self.rt.name(self.id)
    }

    /// Whether every assertion recorded on this test so far passed.
    pub fn passing(&self) -> bool {
        self.rt.is_ok(self.id)
    }

    /// Whether this test has ended.
    pub fn ended(&self) -> bool {
        self.rt.is_ended(self.id)
    }

    /// Expect exactly `n` units: one per direct subtest, one per assertion.
    pub fn plan(&self, n: usize) {
        self.rt.plan(self.id, n);
    }

    // ---- Subtests ------------------------------------------------------------

    /// Queue a subtest. It runs after the tests queued before it have ended.
    pub fn test(&self, name: &str, body: impl FnOnce(&Test<'_>) + 'static) {
        self.rt.enqueue(self.id, name, Box::new(body), false);
    }

    /// Queue a subtest that is skipped: its body never runs.
    pub fn skip_test(&self, name: &str, body: impl FnOnce(&Test<'_>) + 'static) {
        self.rt.enqueue(self.id, name, Box::new(body), true);
    }

    // ---- Assertions ----------------------------------------------------------

    pub fn ok(&self, value: bool, msg: &str) {
        self.ok_with(value, msg, Extra::new());
    }

    pub fn ok_with(&self, value: bool, msg: &str, extra: Extra) {
        let base = Extra::new()
            .name(msg)
            .operator(Operator::Ok)
            .expected("true")
            .actual(value.to_string());
        self.rt.record(self.id, value, base, extra);
    }

    /// Assert that `value` is false.
    pub fn not_ok(&self, value: bool, msg: &str) {
        self.not_ok_with(value, msg, Extra::new());
    }

    pub fn not_ok_with(&self, value: bool, msg: &str, extra: Extra) {
        let base = Extra::new()
            .name(msg)
            .operator(Operator::NotOk)
            .expected("false")
            .actual(value.to_string());
        self.rt.record(self.id, !value, base, extra);
    }

    pub fn pass(&self, msg: &str) {
        self.pass_with(msg, Extra::new());
    }

    pub fn pass_with(&self, msg: &str, extra: Extra) {
        let base = Extra::new().name(msg).operator(Operator::Pass);
        self.rt.record(self.id, true, base, extra);
    }

    pub fn fail(&self, msg: &str) {
        self.fail_with(msg, Extra::new());
    }

    pub fn fail_with(&self, msg: &str, extra: Extra) {
        let base = Extra::new().name(msg).operator(Operator::Fail);
        self.rt.record(self.id, false, base, extra);
    }

    /// Record a passing assertion marked `# SKIP`.
    pub fn skip(&self, msg: &str) {
        self.skip_with(msg, Extra::new());
    }

    pub fn skip_with(&self, msg: &str, extra: Extra) {
        let base = Extra::new().name(msg).operator(Operator::Skip).skip();
        self.rt.record(self.id, true, base, extra);
    }

    /// Assert `actual == expected`.
    ///
    /// A panic raised while comparing or formatting the values is recorded as
    /// a failing assertion instead of unwinding into the caller.
    pub fn equal<L, R>(&self, actual: L, expected: R, msg: &str)
    where
        L: PartialEq<R> + Debug,
        R: Debug,
    {
        self.equal_with(actual, expected, msg, Extra::new());
    }

    pub fn equal_with<L, R>(&self, actual: L, expected: R, msg: &str, extra: Extra)
    where
        L: PartialEq<R> + Debug,
        R: Debug,
    {
        let name = if msg.is_empty() { "should be equal" } else { msg };
        let compared = catch_unwind(AssertUnwindSafe(|| {
            (actual == expected, format!("{actual:?}"), format!("{expected:?}"))
        }));
        match compared {
            Ok((same, actual, expected)) => {
                let base = Extra::new()
                    .name(name)
                    .operator(Operator::Equal)
                    .actual(actual)
                    .expected(expected);
                self.rt.record(self.id, same, base, extra);
            }
            Err(panic) => self.comparison_panicked(panic.as_ref(), extra),
        }
    }

    /// Assert `actual != expected`.
    pub fn not_equal<L, R>(&self, actual: L, expected: R, msg: &str)
    where
        L: PartialEq<R> + Debug,
        R: Debug,
    {
        self.not_equal_with(actual, expected, msg, Extra::new());
    }

    pub fn not_equal_with<L, R>(&self, actual: L, expected: R, msg: &str, extra: Extra)
    where
        L: PartialEq<R> + Debug,
        R: Debug,
    {
        let name = if msg.is_empty() { "should not be equal" } else { msg };
        let compared = catch_unwind(AssertUnwindSafe(|| {
            (actual != expected, format!("{actual:?}"), format!("{expected:?}"))
        }));
        match compared {
            Ok((differ, actual, not_expected)) => {
                let base = Extra::new()
                    .name(name)
                    .operator(Operator::NotEqual)
                    .actual(actual)
                    .not_expected(not_expected);
                self.rt.record(self.id, differ, base, extra);
            }
            Err(panic) => self.comparison_panicked(panic.as_ref(), extra),
        }
    }

    fn comparison_panicked(&self, payload: &(dyn std::any::Any + Send), extra: Extra) {
        let message = crate::node::panic_message(payload);
        let base = Extra::new().name(message).operator(Operator::Fail);
        self.rt.record(self.id, false, base, extra);
    }

    /// Assert that `result` is `Ok`. An `Err` is recorded as a failing
    /// `error` assertion carrying the error's message.
    pub fn error<T, E: fmt::Display>(&self, result: &Result<T, E>, msg: &str) {
        self.error_with(result, msg, Extra::new());
    }

    pub fn error_with<T, E: fmt::Display>(&self, result: &Result<T, E>, msg: &str, extra: Extra) {
        match result {
            Ok(_) => {
                let base = Extra::new().name(msg).operator(Operator::Error);
                self.rt.record(self.id, true, base, extra);
            }
            Err(err) => {
                let extra = Extra::new().name(msg).merged(extra);
                self.rt
                    .record_error(self.id, ErrorPayload::new(err.to_string()), extra);
            }
        }
    }

    /// Print a `# ` comment line. Comments never consume a sequence number.
    pub fn comment(&self, msg: &str) {
        self.rt.comment(self.id, msg);
    }

    // ---- Lifecycle -----------------------------------------------------------

    /// Fail and end this test if it has not ended after `ms` milliseconds.
    pub fn timeout_after(&self, ms: u64) {
        self.rt.timeout_after(self.id, Duration::from_millis(ms));
    }

    /// End this test. Queued subtests run first; the test ends once they have.
    pub fn end(&self) {
        self.rt.end(self.id, None);
    }

    /// End this test, first recording `err` as a failing `error` assertion.
    pub fn end_with(&self, err: impl fmt::Display) {
        self.rt.end(self.id, Some(ErrorPayload::new(err.to_string())));
    }

    /// A `Send` handle for finishing this test from another thread.
    pub fn remote(&self) -> Remote {
        self.rt.remote(self.id)
    }
}

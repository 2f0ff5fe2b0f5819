//! # rstap: nested tests that stream TAP
//!
//! Declare a tree of tests with a closure-based API, check plans (expected
//! assertion counts), and get a Test Anything Protocol (version 13) report on
//! stdout as results happen.
//!
//! ## Quick example
//!
//! ```rust,no_run
//! fn main() {
//!     rstap::run(|t| {
//!         t.test("timing test", |t| {
//!             t.test("test one", |t| {
//!                 t.plan(2);
//!                 t.equal("foobar", "foobar", "");
//!                 t.equal(1, 100, "");
//!             });
//!
//!             t.test("test two", |t| {
//!                 t.ok(true, "true is true");
//!                 t.end();
//!             });
//!
//!             t.end();
//!         });
//!     });
//! }
//! ```
//!
//! Subtests run one at a time, in declaration order. A test ends when its
//! body calls [`Test::end`], when its plan is met, or when a timeout set with
//! [`Test::timeout_after`] fires. Work that finishes on another thread goes
//! through a [`Remote`].
//!
//! ## Environment
//!
//! - `RSTAP_LOG`: `tracing` filter for diagnostics on stderr (default `warn`)
//! - `RSTAP_TIMEOUT_MS`: default timeout armed on every subtest

mod config;
mod context;
mod error;
mod events;
mod node;
mod remote;
mod result;
mod results;
mod runner;
pub mod tap;
mod timeout;

pub use config::{RunConfig, TIMEOUT_ENV};
pub use context::Test;
pub use error::Error;
pub use remote::Remote;
pub use result::{AssertionResult, ErrorPayload, Extra, Operator, UNNAMED_ASSERT};
pub use results::Summary;
pub use runner::Harness;
pub use timeout::{Outcome, Watchdog};

use tracing_subscriber::EnvFilter;

/// Environment variable read by [`init_logging`].
pub const LOG_ENV: &str = "RSTAP_LOG";

/// Install a `tracing` subscriber that writes to stderr, filtered by
/// [`LOG_ENV`]. Stdout is left to the TAP stream. Calling it again is a no-op.
pub fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Run a test tree and report it as TAP on stdout.
///
/// This is the main entry point for rstap. Call it from `fn main()` in a
/// test target with `harness = false`.
///
/// The process exits with status 1 if any assertion failed or the root test
/// never ended ("End of tests never reached."), and 2 on a bad command line.
///
/// # Example
///
/// ```rust,no_run
/// fn main() {
///     rstap::run(|t| {
///         t.ok(true, "true is true");
///     });
/// }
/// ```
pub fn run(body: impl FnOnce(&Test<'_>)) {
    init_logging();

    let config = match RunConfig::from_args() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("rstap: {err}");
            std::process::exit(2);
        }
    };

    match Harness::new().config(config).run(body) {
        Ok(summary) if summary.is_ok() => {}
        Ok(_) => std::process::exit(1),
        Err(Error::Unfinished) => std::process::exit(1),
        Err(err) => {
            tracing::error!(label = err.as_label(), "{err}");
            eprintln!("rstap: {err}");
            std::process::exit(1);
        }
    }
}

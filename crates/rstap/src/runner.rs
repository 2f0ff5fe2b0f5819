//! The harness: owns the tree and the aggregator for one run.
//!
//! ```text
//! TAP version 13
//! # arithmetic
//! ok 1 adds
//! not ok 2 should be equal
//!   ---
//!     operator: equal
//!     expected: 100
//!     actual: 1
//!   ...
//!
//! 1..2
//! # tests 2
//! # pass 1
//! # fail 1
//! ```

use crate::config::RunConfig;
use crate::context::Test;
use crate::error::Error;
use crate::node::Runtime;
use crate::results::{Results, Summary};
use std::io::{self, Write};
use std::rc::Rc;
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::time::Duration;
use tracing::{debug, warn};

/// How long the command loop waits before re-checking for a stalled tree.
const POLL: Duration = Duration::from_millis(20);

/// A single run of a test tree.
///
/// ```rust,no_run
/// let summary = rstap::Harness::new()
///     .run(|t| {
///         t.plan(1);
///         t.ok(true, "works");
///     })
///     .expect("harness finished");
/// assert!(summary.is_ok());
/// ```
pub struct Harness {
    name: String,
    out: Box<dyn Write>,
    config: RunConfig,
}

impl Default for Harness {
    fn default() -> Self {
        Harness::new()
    }
}

impl Harness {
    /// A harness writing to stdout.
    pub fn new() -> Self {
        Harness::with_output(io::stdout())
    }

    /// A harness writing its TAP stream to `out`.
    pub fn with_output(out: impl Write + 'static) -> Self {
        Harness {
            name: String::new(),
            out: Box::new(out),
            config: RunConfig::default(),
        }
    }

    /// Name of the root test, printed as its `# ` banner when non-empty.
    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    /// Run `body` as the root test and drive the tree until it ends.
    ///
    /// The root is ended automatically once `body` returns, unless `body`
    /// ended it. Subtests finished from other threads (through
    /// [`Test::remote`] or a timeout) are waited for. Returns
    /// [`Error::Unfinished`] when the root can no longer end.
    pub fn run(self, body: impl FnOnce(&Test<'_>)) -> Result<Summary, Error> {
        let (commands, inbox) = mpsc::channel();
        let rt = Runtime::new(commands, self.config.timeout, self.config.filter.clone());
        let results = Rc::new(Results::new(self.out, self.config.plan));

        let root = rt.add_root(&self.name);
        results.watch(&rt, root);
        rt.run_root(root, body);

        while !rt.is_ended(root) {
            match inbox.try_recv() {
                Ok(command) => {
                    rt.apply(command);
                    continue;
                }
                Err(TryRecvError::Empty) => {}
                // The runtime holds a sender for as long as it lives.
                Err(TryRecvError::Disconnected) => break,
            }
            if !rt.has_outside_work() {
                break;
            }
            match inbox.recv_timeout(POLL) {
                Ok(command) => rt.apply(command),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        if !rt.is_ended(root) {
            warn!("root test never ended and nothing can end it");
            results.note(&Error::Unfinished.to_string());
            return Err(Error::Unfinished);
        }

        debug!(ok = rt.is_ok(root), "root test ended");
        results.close()
    }
}

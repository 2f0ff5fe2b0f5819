//! Thread-safe handle for finishing a test from somewhere else.
//!
//! The test tree lives on the harness thread. A [`Remote`] posts operations
//! over a channel; the harness applies them in order between other work, so a
//! body can hand its test to another thread and return:
//!
//! ```rust,no_run
//! # fn main() { rstap::run(|t| {
//! t.test("deferred", |t| {
//!     let remote = t.remote();
//!     std::thread::spawn(move || {
//!         std::thread::sleep(std::time::Duration::from_millis(10));
//!         remote.ok(true, "finished later");
//!         remote.end();
//!     });
//! });
//! # }); }
//! ```

use crate::node::NodeId;
use crate::result::{ErrorPayload, Extra, Operator};
use std::fmt;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use tracing::debug;

/// Work posted to the harness thread.
#[derive(Debug)]
pub(crate) enum Command {
    Assert {
        node: NodeId,
        ok: bool,
        base: Extra,
        extra: Extra,
    },
    Comment {
        node: NodeId,
        text: String,
    },
    End {
        node: NodeId,
        error: Option<ErrorPayload>,
    },
    Timeout {
        node: NodeId,
        epoch: u64,
        ms: u64,
    },
}

/// A `Send` handle to one test, created by [`Test::remote`](crate::Test::remote).
///
/// While any `Remote` is alive the harness keeps waiting for the tree to end.
#[derive(Clone)]
pub struct Remote {
    node: NodeId,
    commands: Sender<Command>,
    _liveness: Arc<()>,
}

impl Remote {
    pub(crate) fn new(node: NodeId, commands: Sender<Command>, liveness: Arc<()>) -> Self {
        Remote {
            node,
            commands,
            _liveness: liveness,
        }
    }

    pub fn ok(&self, value: bool, msg: &str) {
        self.assert(
            value,
            Extra::new()
                .name(msg)
                .operator(Operator::Ok)
                .expected("true")
                .actual(value.to_string()),
        );
    }

    pub fn not_ok(&self, value: bool, msg: &str) {
        self.assert(
            !value,
            Extra::new()
                .name(msg)
                .operator(Operator::NotOk)
                .expected("false")
                .actual(value.to_string()),
        );
    }

    pub fn pass(&self, msg: &str) {
        self.assert(true, Extra::new().name(msg).operator(Operator::Pass));
    }

    pub fn fail(&self, msg: &str) {
        self.assert(false, Extra::new().name(msg).operator(Operator::Fail));
    }

    pub fn comment(&self, msg: &str) {
        self.send(Command::Comment {
            node: self.node,
            text: msg.to_string(),
        });
    }

    pub fn end(&self) {
        self.send(Command::End {
            node: self.node,
            error: None,
        });
    }

    /// End the test, first recording `err` as a failing `error` assertion.
    pub fn end_with(&self, err: impl fmt::Display) {
        self.send(Command::End {
            node: self.node,
            error: Some(ErrorPayload::new(err.to_string())),
        });
    }

    fn assert(&self, ok: bool, base: Extra) {
        self.send(Command::Assert {
            node: self.node,
            ok,
            base,
            extra: Extra::new(),
        });
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!(node = ?self.node, "harness already finished; dropping remote command");
        }
    }
}

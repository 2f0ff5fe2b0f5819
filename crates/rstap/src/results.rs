//! Streams TAP for a whole tree and prints the closing summary.

use crate::error::Error;
use crate::events::{Event, Signal};
use crate::node::{NodeId, Runtime};
use crate::result::AssertionResult;
use crate::tap;
use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

/// Totals for a finished run.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    /// Assertions reported, synthetic ones included.
    pub count: usize,
    pub pass: usize,
    pub fail: usize,
}

impl Summary {
    pub fn is_ok(&self) -> bool {
        self.fail == 0
    }
}

#[derive(Default)]
struct Tally {
    summary: Summary,
    banner_printed: bool,
    plan: Option<usize>,
}

/// Aggregator for one harness run.
///
/// Attached to the root with [`Results::watch`], it follows every child the
/// moment the child is created, so nested tests need no extra wiring.
pub(crate) struct Results {
    tally: RefCell<Tally>,
    out: RefCell<Box<dyn Write>>,
    io_error: RefCell<Option<io::Error>>,
}

impl Results {
    pub(crate) fn new(out: Box<dyn Write>, plan: Option<usize>) -> Self {
        Results {
            tally: RefCell::new(Tally {
                plan,
                ..Tally::default()
            }),
            out: RefCell::new(out),
            io_error: RefCell::new(None),
        }
    }

    pub(crate) fn watch(self: &Rc<Self>, rt: &Runtime, node: NodeId) {
        let this = self.clone();
        rt.on(
            node,
            Signal::Prerun,
            Rc::new(move |_: &Runtime, _: NodeId, ev: &Event<'_>| {
                if let Event::Prerun { name } = ev {
                    this.on_prerun(name);
                }
            }),
        );

        let this = self.clone();
        rt.on(
            node,
            Signal::Result,
            Rc::new(move |_: &Runtime, _: NodeId, ev: &Event<'_>| {
                if let Event::Result(result) = ev {
                    this.on_result(result);
                }
            }),
        );

        let this = self.clone();
        rt.on(
            node,
            Signal::Test,
            Rc::new(move |rt: &Runtime, _: NodeId, ev: &Event<'_>| {
                if let Event::Test { child } = ev {
                    this.watch(rt, *child);
                }
            }),
        );
    }

    fn on_prerun(&self, name: &str) {
        self.banner();
        if !name.is_empty() {
            self.write(&format!("# {name}\n"));
        }
    }

    fn on_result(&self, result: &AssertionResult) {
        if let Some(text) = result.comment.as_deref() {
            if !text.is_empty() {
                self.write(&tap::encode_comment(text));
            }
            return;
        }
        let count = {
            let mut tally = self.tally.borrow_mut();
            tally.summary.count += 1;
            if result.ok {
                tally.summary.pass += 1;
            } else {
                tally.summary.fail += 1;
            }
            tally.summary.count
        };
        self.write(&tap::encode(result, count));
    }

    fn banner(&self) {
        let first = !std::mem::replace(&mut self.tally.borrow_mut().banner_printed, true);
        if first {
            self.write(&format!("{}\n", tap::VERSION_LINE));
        }
    }

    /// Print a line outside the result stream (e.g. a fatal message).
    pub(crate) fn note(&self, line: &str) {
        self.write(&format!("{line}\n"));
    }

    fn write(&self, text: &str) {
        let mut out = self.out.borrow_mut();
        let written = out.write_all(text.as_bytes()).and_then(|()| out.flush());
        if let Err(err) = written {
            let mut slot = self.io_error.borrow_mut();
            if slot.is_none() {
                tracing::warn!(%err, "failed to write TAP output");
                *slot = Some(err);
            }
        }
    }

    /// Print the trailing summary. Called once, at controlled shutdown.
    pub(crate) fn close(&self) -> Result<Summary, Error> {
        self.banner();
        let (mut summary, plan) = {
            let tally = self.tally.borrow();
            (tally.summary, tally.plan)
        };

        match plan {
            Some(plan) if plan != summary.count => {
                self.write(&tap::encode_plan_mismatch(summary.count + 1, plan, summary.count));
                summary.count += 1;
                summary.fail += 1;
            }
            _ => {
                let mut text = format!(
                    "\n1..{count}\n# tests {count}\n# pass {pass}\n",
                    count = summary.count,
                    pass = summary.pass
                );
                if summary.fail > 0 {
                    text.push_str(&format!("# fail {}\n", summary.fail));
                } else {
                    text.push_str("\n# ok\n");
                }
                self.write(&text);
            }
        }

        match self.io_error.borrow_mut().take() {
            Some(err) => Err(Error::Io(err)),
            None => Ok(summary),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct Capture(Rc<RefCell<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Capture {
        fn text(&self) -> String {
            String::from_utf8(self.0.borrow().clone()).unwrap()
        }
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn summary_without_failures() {
        let cap = Capture::default();
        let results = Results::new(Box::new(cap.clone()), None);
        let summary = results.close().unwrap();
        assert_eq!(summary, Summary::default());
        assert_eq!(
            cap.text(),
            "TAP version 13\n\n1..0\n# tests 0\n# pass 0\n\n# ok\n"
        );
    }

    #[test]
    fn global_plan_mismatch_replaces_summary() {
        let cap = Capture::default();
        let results = Results::new(Box::new(cap.clone()), Some(3));
        let summary = results.close().unwrap();
        assert_eq!(summary.fail, 1);
        let text = cap.text();
        assert!(text.contains("not ok 1 plan != count\n"));
        assert!(text.contains("    expected: 3\n    actual: 0\n"));
        assert!(!text.contains("# tests"));
    }

    #[test]
    fn blank_comment_prints_nothing_and_counts_nothing() {
        let cap = Capture::default();
        let results = Results::new(Box::new(cap.clone()), None);
        results.on_result(&AssertionResult::comment(String::new()));
        results.on_result(&AssertionResult::comment("note".into()));
        let summary = results.close().unwrap();
        assert_eq!(summary.count, 0);
        let text = cap.text();
        assert!(text.contains("# note\n"));
        assert!(!text.contains("ok 1"));
    }

    #[test]
    fn write_errors_surface_on_close() {
        let results = Results::new(Box::new(Broken), None);
        assert!(matches!(results.close(), Err(Error::Io(_))));
    }
}

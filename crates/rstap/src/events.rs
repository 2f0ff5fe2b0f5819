//! Typed signals published by test nodes.
//!
//! Every node owns a [`Signals`] store. Handlers for one signal run
//! synchronously, in registration order, at emission time. One-shot handlers
//! are removed before they are invoked, and dispatch works on a snapshot, so a
//! handler may register or remove handlers (or emit further signals) freely.

use crate::node::{NodeId, Runtime};
use crate::result::AssertionResult;
use std::rc::Rc;

/// The closed set of signals a node publishes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Signal {
    /// Before the body runs.
    Prerun,
    /// After the body returned.
    Run,
    /// An assertion result or comment was recorded.
    Result,
    /// A child node was created.
    Test,
    /// The node ended.
    End,
}

/// A signal together with its payload.
#[derive(Debug)]
pub(crate) enum Event<'a> {
    Prerun { name: &'a str },
    Run,
    Result(&'a AssertionResult),
    Test { child: NodeId },
    End,
}

impl Event<'_> {
    pub(crate) fn signal(&self) -> Signal {
        match self {
            Event::Prerun { .. } => Signal::Prerun,
            Event::Run => Signal::Run,
            Event::Result(_) => Signal::Result,
            Event::Test { .. } => Signal::Test,
            Event::End => Signal::End,
        }
    }
}

pub(crate) type Handler = Rc<dyn Fn(&Runtime, NodeId, &Event<'_>)>;

struct Listener {
    signal: Signal,
    once: bool,
    handler: Handler,
}

#[derive(Default)]
pub(crate) struct Signals {
    listeners: Vec<Listener>,
}

impl Signals {
    pub(crate) fn on(&mut self, signal: Signal, handler: Handler) {
        self.listeners.push(Listener {
            signal,
            once: false,
            handler,
        });
    }

    pub(crate) fn once(&mut self, signal: Signal, handler: Handler) {
        self.listeners.push(Listener {
            signal,
            once: true,
            handler,
        });
    }

    pub(crate) fn remove_all(&mut self, signal: Signal) {
        self.listeners.retain(|l| l.signal != signal);
    }

    /// Snapshot the handlers for `signal`, dropping one-shot ones from the store.
    pub(crate) fn dispatch_list(&mut self, signal: Signal) -> Vec<Handler> {
        let handlers = self
            .listeners
            .iter()
            .filter(|l| l.signal == signal)
            .map(|l| l.handler.clone())
            .collect();
        self.listeners.retain(|l| !(l.once && l.signal == signal));
        handlers
    }

    #[cfg(test)]
    pub(crate) fn count(&self, signal: Signal) -> usize {
        self.listeners.iter().filter(|l| l.signal == signal).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Handler {
        Rc::new(|_: &Runtime, _: NodeId, _: &Event<'_>| {})
    }

    #[test]
    fn once_handlers_are_dropped_after_dispatch() {
        let mut signals = Signals::default();
        signals.on(Signal::End, noop());
        signals.once(Signal::End, noop());
        signals.once(Signal::Prerun, noop());

        assert_eq!(signals.dispatch_list(Signal::End).len(), 2);
        assert_eq!(signals.count(Signal::End), 1);
        assert_eq!(signals.count(Signal::Prerun), 1);
        assert_eq!(signals.dispatch_list(Signal::End).len(), 1);
    }

    #[test]
    fn dispatch_keeps_registration_order() {
        let registered: Vec<Handler> = (0..3).map(|_| noop()).collect();
        let mut signals = Signals::default();
        for h in &registered {
            signals.on(Signal::Run, h.clone());
        }
        let handlers = signals.dispatch_list(Signal::Run);
        assert_eq!(handlers.len(), 3);
        for (a, b) in handlers.iter().zip(registered.iter()) {
            assert!(Rc::ptr_eq(a, b));
        }
    }

    #[test]
    fn remove_all_only_touches_one_signal() {
        let mut signals = Signals::default();
        signals.on(Signal::Result, noop());
        signals.on(Signal::Test, noop());
        signals.remove_all(Signal::Result);
        assert_eq!(signals.count(Signal::Result), 0);
        assert_eq!(signals.count(Signal::Test), 1);
    }

    #[test]
    fn events_map_to_signals() {
        assert_eq!(Event::Run.signal(), Signal::Run);
        assert_eq!(Event::Prerun { name: "x" }.signal(), Signal::Prerun);
        assert_eq!(Event::End.signal(), Signal::End);
    }
}

//! The test tree: node state, the scheduler and the assertion accountant.
//!
//! All nodes live in one arena owned by [`Runtime`]. A node's children are
//! held as ids in an owned FIFO queue; the parent id is only used to find the
//! node that gets the next scheduling step, never for ownership.
//!
//! Scheduling never blocks. A scheduler step pops the front child, registers
//! a one-shot `End` listener on it that queues another step for the parent,
//! and runs the child. Steps are taken from a flat work list, so a child that
//! finishes synchronously lets the parent continue without nesting calls;
//! otherwise the parent resumes when the child's `End` is published, possibly
//! from a command posted by another thread.

use crate::context::Test;
use crate::events::{Event, Handler, Signal, Signals};
use crate::remote::{Command, Remote};
use crate::result::{AssertionResult, ErrorPayload, Extra, Operator, UNNAMED_ASSERT};
use crate::timeout::Watchdog;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Index of a node in the runtime arena.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct NodeId(pub(crate) usize);

pub(crate) type Body = Box<dyn FnOnce(&Test<'_>)>;

struct Guard {
    epoch: u64,
    dog: Watchdog,
}

pub(crate) struct Node {
    name: String,
    parent: Option<NodeId>,
    plan: Option<usize>,
    assert_count: usize,
    children_seen: usize,
    queue: VecDeque<NodeId>,
    running_child: Option<NodeId>,
    ended: bool,
    called_end: bool,
    plan_error: bool,
    ok: bool,
    skip: bool,
    body: Option<Body>,
    signals: Signals,
    guard: Option<Guard>,
}

impl Node {
    fn new(name: String, parent: Option<NodeId>, body: Option<Body>, skip: bool) -> Self {
        Node {
            name,
            parent,
            plan: None,
            assert_count: 0,
            children_seen: 0,
            queue: VecDeque::new(),
            running_child: None,
            ended: false,
            called_end: false,
            plan_error: false,
            ok: true,
            skip,
            body,
            signals: Signals::default(),
            guard: None,
        }
    }

    /// Units accounted against the plan: every child ever enqueued plus every
    /// assertion recorded.
    fn units(&self) -> usize {
        self.children_seen + self.assert_count
    }

    /// `None` without a plan; otherwise how many units are still expected
    /// (negative once over-asserted).
    fn pending(&self) -> Option<isize> {
        self.plan.map(|plan| plan as isize - self.units() as isize)
    }
}

/// Owner of the test tree. Lives on the harness thread.
pub(crate) struct Runtime {
    nodes: RefCell<Vec<Node>>,
    commands: Sender<Command>,
    liveness: Arc<()>,
    next_epoch: Cell<u64>,
    default_timeout: Option<Duration>,
    filter: Option<String>,
    /// Nodes waiting for a scheduler step.
    ready: RefCell<VecDeque<NodeId>>,
    /// Set while steps are being taken or deferred.
    pumping: Cell<bool>,
}

impl Runtime {
    pub(crate) fn new(
        commands: Sender<Command>,
        default_timeout: Option<Duration>,
        filter: Option<String>,
    ) -> Self {
        Runtime {
            nodes: RefCell::new(Vec::new()),
            commands,
            liveness: Arc::new(()),
            next_epoch: Cell::new(0),
            default_timeout,
            filter: filter.map(|f| f.to_lowercase()),
            ready: RefCell::new(VecDeque::new()),
            pumping: Cell::new(false),
        }
    }

    pub(crate) fn add_root(&self, name: &str) -> NodeId {
        self.insert(Node::new(name.to_string(), None, None, false))
    }

    fn insert(&self, node: Node) -> NodeId {
        let mut nodes = self.nodes.borrow_mut();
        nodes.push(node);
        NodeId(nodes.len() - 1)
    }

    fn with_node<R>(&self, id: NodeId, f: impl FnOnce(&mut Node) -> R) -> R {
        f(&mut self.nodes.borrow_mut()[id.0])
    }

    pub(crate) fn name(&self, id: NodeId) -> String {
        self.with_node(id, |n| n.name.clone())
    }

    pub(crate) fn is_ended(&self, id: NodeId) -> bool {
        self.with_node(id, |n| n.ended)
    }

    pub(crate) fn is_ok(&self, id: NodeId) -> bool {
        self.with_node(id, |n| n.ok)
    }

    pub(crate) fn pending_asserts(&self, id: NodeId) -> Option<isize> {
        self.with_node(id, |n| n.pending())
    }

    /// Whether anything outside the tree (a remote handle or an armed
    /// watchdog) may still post commands.
    pub(crate) fn has_outside_work(&self) -> bool {
        Arc::strong_count(&self.liveness) > 1
    }

    pub(crate) fn remote(&self, id: NodeId) -> Remote {
        Remote::new(id, self.commands.clone(), self.liveness.clone())
    }

    // ---- Signals -------------------------------------------------------------

    pub(crate) fn on(&self, id: NodeId, signal: Signal, handler: Handler) {
        self.with_node(id, |n| n.signals.on(signal, handler));
    }

    pub(crate) fn once(&self, id: NodeId, signal: Signal, handler: Handler) {
        self.with_node(id, |n| n.signals.once(signal, handler));
    }

    fn emit(&self, id: NodeId, event: Event<'_>) {
        let handlers = self.with_node(id, |n| n.signals.dispatch_list(event.signal()));
        for handler in handlers {
            handler(self, id, &event);
        }
    }

    // ---- Tree building -------------------------------------------------------

    pub(crate) fn plan(&self, id: NodeId, n: usize) {
        trace!(node = ?id, plan = n, "plan declared");
        self.with_node(id, |node| node.plan = Some(n));
    }

    /// Create a child of `parent` and put it at the back of the queue.
    pub(crate) fn enqueue(&self, parent: NodeId, name: &str, body: Body, skip: bool) -> NodeId {
        let skip = skip || !self.passes_filter(parent, name);
        let child = self.insert(Node::new(name.to_string(), Some(parent), Some(body), skip));
        let parent_ended = self.with_node(parent, |n| {
            n.children_seen += 1;
            n.queue.push_back(child);
            n.ended
        });
        self.emit(parent, Event::Test { child });
        self.check_over_plan(parent);
        if parent_ended {
            warn!(node = %self.name(parent), child = name, "test added after its parent ended");
            self.drain(parent, None);
        }
        child
    }

    fn passes_filter(&self, parent: NodeId, name: &str) -> bool {
        match &self.filter {
            Some(filter) if parent == NodeId(0) => name.to_lowercase().contains(filter),
            _ => true,
        }
    }

    // ---- Running -------------------------------------------------------------

    /// Run a queued node: its body, then its natural end if the plan is met.
    fn run(&self, id: NodeId) {
        let (skip, body) = self.with_node(id, |n| (n.skip, n.body.take()));
        if skip {
            debug!(node = %self.name(id), "skipping test");
            self.drain(id, None);
            return;
        }
        if let Some(after) = self.default_timeout {
            self.timeout_after(id, after);
        }
        match body {
            Some(body) => self.invoke(id, body),
            None => self.invoke(id, |_: &Test<'_>| {}),
        }
    }

    /// Run the root with a body that need not be `'static`, then end it
    /// unless the body already did.
    pub(crate) fn run_root(&self, id: NodeId, body: impl FnOnce(&Test<'_>)) {
        self.deferring(|| {
            self.invoke(id, body);
            let called_end = self.with_node(id, |n| n.called_end);
            if !called_end {
                self.end(id, None);
            }
        });
    }

    fn invoke(&self, id: NodeId, body: impl FnOnce(&Test<'_>)) {
        let name = self.name(id);
        debug!(node = %name, "running test");
        self.emit(id, Event::Prerun { name: &name });

        let test = Test::new(self, id);
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| body(&test))) {
            let message = panic_message(panic.as_ref());
            warn!(node = %name, %message, "test body panicked");
            self.abort(id, ErrorPayload::new(message));
            return;
        }

        self.emit(id, Event::Run);
        let done = self.with_node(id, |n| !n.ended && n.pending() == Some(0));
        if done {
            self.drain(id, None);
        }
    }

    fn abort(&self, id: NodeId, err: ErrorPayload) {
        let name = err.message.clone();
        self.record_error(id, err, Extra::new().name(name));
        let already = self.with_node(id, |n| std::mem::replace(&mut n.called_end, true));
        if !already {
            self.drain(id, None);
        }
    }

    /// Queue a scheduler step for `id`, recording `err` first. Invoked
    /// whenever `id` might be finished.
    pub(crate) fn drain(&self, id: NodeId, err: Option<ErrorPayload>) {
        if let Some(err) = err {
            self.record_error(id, err, Extra::new());
        }
        self.ready.borrow_mut().push_back(id);
        self.pump();
    }

    /// Take queued steps until none are left. Re-entrant calls return at once
    /// and leave their step to the outer loop.
    fn pump(&self) {
        if self.pumping.replace(true) {
            return;
        }
        loop {
            let next = self.ready.borrow_mut().pop_front();
            match next {
                Some(id) => self.step(id),
                None => break,
            }
        }
        self.pumping.set(false);
    }

    /// Run `f` with scheduler steps held back until it returns.
    fn deferring(&self, f: impl FnOnce()) {
        let outer = self.pumping.replace(true);
        f();
        self.pumping.set(outer);
        if !outer {
            self.pump();
        }
    }

    fn step(&self, id: NodeId) {
        let next = self.with_node(id, |n| {
            if n.running_child.is_some() {
                return Err(());
            }
            let next = n.queue.pop_front();
            n.running_child = next;
            Ok(next)
        });
        let next = match next {
            Ok(next) => next,
            // The running child's End listener queues another step.
            Err(()) => return,
        };

        if let Some(child) = next {
            self.once(
                child,
                Signal::End,
                Rc::new(move |rt: &Runtime, _: NodeId, _: &Event<'_>| {
                    rt.with_node(id, |n| n.running_child = None);
                    rt.drain(id, None);
                }),
            );
            self.run(child);
            return;
        }

        let mismatch = self.with_node(id, |n| {
            !n.plan_error && !n.ended && n.pending().is_some_and(|p| p != 0)
        });
        if mismatch {
            self.plan_failure(id);
        }

        self.finish(id);
    }

    fn finish(&self, id: NodeId) {
        let guard = self.with_node(id, |n| if n.ended { Err(()) } else { Ok(n.guard.take()) });
        let Ok(guard) = guard else {
            return;
        };
        // The watchdog thread is joined before the node counts as ended.
        if let Some(guard) = guard {
            guard.dog.cancel();
        }

        let (name, parent, ok) = self.with_node(id, |n| {
            n.ended = true;
            (n.name.clone(), n.parent, n.ok)
        });
        debug!(node = %name, ?parent, ok, "test ended");
        self.emit(id, Event::End);
        self.with_node(id, |n| n.signals.remove_all(Signal::End));
    }

    /// Explicit `end()`: a repeated call is itself a failure, recorded after
    /// the error passed to `end_with`.
    pub(crate) fn end(&self, id: NodeId, err: Option<ErrorPayload>) {
        if let Some(err) = err {
            self.record_error(id, err, Extra::new());
        }
        let twice = self.with_node(id, |n| std::mem::replace(&mut n.called_end, true));
        if twice {
            self.record(
                id,
                false,
                Extra::new().name(".end() called twice").operator(Operator::Fail),
                Extra::new(),
            );
        }
        self.drain(id, None);
    }

    // ---- Accounting ----------------------------------------------------------

    /// Record one assertion and publish it.
    pub(crate) fn record(&self, id: NodeId, ok: bool, base: Extra, extra: Extra) {
        let fields = base.merged(extra);
        let result = self.with_node(id, |n| {
            let seq = n.assert_count;
            n.assert_count += 1;
            n.ok = n.ok && ok;

            let name = fields.name.unwrap_or_else(|| UNNAMED_ASSERT.to_string());
            let error = match fields.error {
                Some(err) => Some(err),
                None if !ok => Some(ErrorPayload::new(name.clone())),
                None => None,
            };
            AssertionResult {
                id: seq,
                name,
                operator: fields.operator.unwrap_or(Operator::Ok),
                ok,
                actual: fields.actual,
                expected: fields.expected,
                not_expected: fields.not_expected,
                skip: fields.skip,
                todo: fields.todo,
                error,
                comment: None,
            }
        });
        trace!(node = ?id, seq = result.id, ok, name = %result.name, "assertion recorded");
        self.emit(id, Event::Result(&result));

        if self.pending_asserts(id) == Some(0) {
            self.drain(id, None);
        } else {
            self.check_over_plan(id);
        }
    }

    /// Report a plan overrun, by assertions or by children, the first time
    /// it happens.
    fn check_over_plan(&self, id: NodeId) {
        let over = self.with_node(id, |n| !n.plan_error && n.pending().is_some_and(|p| p < 0));
        if over {
            self.plan_failure(id);
        }
    }

    pub(crate) fn record_error(&self, id: NodeId, err: ErrorPayload, extra: Extra) {
        let base = Extra::new()
            .operator(Operator::Error)
            .actual(err.message.clone())
            .error(err);
        self.record(id, false, base, extra);
    }

    fn plan_failure(&self, id: NodeId) {
        let (name, plan, units) = self.with_node(id, |n| {
            n.plan_error = true;
            (n.name.clone(), n.plan.unwrap_or(0), n.units())
        });
        warn!(node = %name, plan, count = units, "plan != count");
        self.record(
            id,
            false,
            Extra::new()
                .name("plan != count")
                .operator(Operator::Fail)
                .expected(plan.to_string())
                .actual(units.to_string()),
            Extra::new(),
        );
    }

    pub(crate) fn comment(&self, id: NodeId, text: &str) {
        let text = text.trim();
        let text = text.strip_prefix('#').unwrap_or(text).trim();
        if text.is_empty() {
            return;
        }
        let result = AssertionResult::comment(text.to_string());
        self.emit(id, Event::Result(&result));
    }

    // ---- Timeouts ------------------------------------------------------------

    /// Arm a watchdog that fails and ends `id` after `after`, replacing any
    /// watchdog already installed on it.
    pub(crate) fn timeout_after(&self, id: NodeId, after: Duration) {
        if self.is_ended(id) {
            return;
        }
        let epoch = self.next_epoch.get();
        self.next_epoch.set(epoch + 1);

        let ms = after.as_millis() as u64;
        let commands = self.commands.clone();
        let liveness = self.liveness.clone();
        let dog = Watchdog::arm(after, move || {
            let _liveness = liveness;
            let _ = commands.send(Command::Timeout { node: id, epoch, ms });
        });
        debug!(node = ?id, ms, "timeout guard armed");

        let previous = self.with_node(id, |n| n.guard.replace(Guard { epoch, dog }));
        if let Some(previous) = previous {
            previous.dog.cancel();
        }
    }

    // ---- Commands from other threads -----------------------------------------

    pub(crate) fn apply(&self, command: Command) {
        match command {
            Command::Assert {
                node,
                ok,
                base,
                extra,
            } => self.record(node, ok, base, extra),
            Command::Comment { node, text } => self.comment(node, &text),
            Command::End { node, error } => self.end(node, error),
            Command::Timeout { node, epoch, ms } => self.fire_timeout(node, epoch, ms),
        }
    }

    fn fire_timeout(&self, id: NodeId, epoch: u64, ms: u64) {
        let guard = self.with_node(id, |n| {
            if n.guard.as_ref().is_some_and(|g| g.epoch == epoch) {
                n.guard.take()
            } else {
                None
            }
        });
        // Ended or re-armed first: the cancel side already won.
        let Some(guard) = guard else {
            return;
        };
        guard.dog.cancel();
        self.record(
            id,
            false,
            Extra::new()
                .name(format!("test timed out after {ms}ms"))
                .operator(Operator::Fail),
            Extra::new(),
        );
        self.force_end(id);
    }

    /// End `id` now, giving up on a running child and any still queued.
    fn force_end(&self, id: NodeId) {
        let abandoned = self.with_node(id, |n| {
            n.called_end = true;
            take_children(n)
        });
        for child in abandoned {
            self.abandon(child);
        }
        self.drain(id, None);
    }

    /// Detach a subtree from its timed out ancestor: nothing in it runs
    /// later, its watchdogs are stopped and its end no longer resumes the
    /// parent.
    fn abandon(&self, id: NodeId) {
        let (guard, rest) = self.with_node(id, |n| {
            n.skip = true;
            n.signals.remove_all(Signal::End);
            (n.guard.take(), take_children(n))
        });
        if let Some(guard) = guard {
            guard.dog.cancel();
        }
        debug!(node = %self.name(id), "test abandoned");
        for child in rest {
            self.abandon(child);
        }
    }
}

fn take_children(n: &mut Node) -> Vec<NodeId> {
    n.running_child
        .take()
        .into_iter()
        .chain(n.queue.drain(..))
        .collect()
}

/// Extract the message carried by a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown exception".to_string()
    }
}

//! One-shot watchdog running on its own thread.
//!
//! A [`Watchdog`] waits for its deadline in bounded increments. Firing and
//! cancelling both go through the same mutex-guarded state, so exactly one of
//! them wins. [`Watchdog::cancel`] joins the thread before returning: once it
//! returns, the fire callback will never run.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Longest single wait between cancellation checks.
const TICK: Duration = Duration::from_millis(10);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum State {
    Armed,
    Fired,
    Cancelled,
}

/// Which side won the race between firing and cancellation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Cancelled before the deadline; the callback never ran.
    Cancelled,
    /// The deadline passed first; the callback ran (or is running).
    Fired,
}

struct Shared {
    state: Mutex<State>,
    wake: Condvar,
}

pub struct Watchdog {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl Watchdog {
    /// Arm a watchdog that calls `on_fire` once `after` has elapsed.
    pub fn arm(after: Duration, on_fire: impl FnOnce() + Send + 'static) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(State::Armed),
            wake: Condvar::new(),
        });
        let deadline = Instant::now() + after;
        let thread_shared = shared.clone();
        let handle = thread::spawn(move || {
            let mut state = thread_shared.state.lock();
            loop {
                if *state != State::Armed {
                    trace!("watchdog cancelled");
                    return;
                }
                let now = Instant::now();
                if now >= deadline {
                    *state = State::Fired;
                    break;
                }
                let wait = (deadline - now).min(TICK);
                thread_shared.wake.wait_for(&mut state, wait);
            }
            drop(state);
            debug!(after_ms = after.as_millis() as u64, "timeout guard fired");
            on_fire();
        });

        Watchdog {
            shared,
            handle: Some(handle),
        }
    }

    /// Cancel the watchdog and wait for its thread to stop.
    pub fn cancel(mut self) -> Outcome {
        let outcome = {
            let mut state = self.shared.state.lock();
            match *state {
                State::Armed => {
                    *state = State::Cancelled;
                    self.shared.wake.notify_all();
                    Outcome::Cancelled
                }
                State::Fired => Outcome::Fired,
                State::Cancelled => Outcome::Cancelled,
            }
        };
        self.join();
        debug!(?outcome, "timeout guard stopped");
        outcome
    }

    /// Whether the watchdog thread has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            // A panicking fire callback only loses its own thread.
            let _ = handle.join();
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        if self.handle.is_some() {
            let mut state = self.shared.state.lock();
            if *state == State::Armed {
                *state = State::Cancelled;
                self.shared.wake.notify_all();
            }
            drop(state);
            self.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tracing_test::traced_test;

    #[test]
    fn fires_after_deadline() {
        let fired = Arc::new(AtomicU32::new(0));
        let f = fired.clone();
        let dog = Watchdog::arm(Duration::from_millis(20), move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        thread::sleep(Duration::from_millis(150));
        assert_eq!(dog.cancel(), Outcome::Fired);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_before_deadline_prevents_fire() {
        let fired = Arc::new(AtomicU32::new(0));
        let f = fired.clone();
        let dog = Watchdog::arm(Duration::from_millis(500), move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        thread::sleep(Duration::from_millis(10));
        assert_eq!(dog.cancel(), Outcome::Cancelled);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cancel_returns_promptly_for_long_deadlines() {
        let dog = Watchdog::arm(Duration::from_secs(60), || {});
        let start = Instant::now();
        assert_eq!(dog.cancel(), Outcome::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn thread_has_stopped_once_fired_and_cancelled() {
        let dog = Watchdog::arm(Duration::from_millis(1), || {});
        thread::sleep(Duration::from_millis(100));
        assert!(dog.is_finished());
        assert_eq!(dog.cancel(), Outcome::Fired);
    }

    #[test]
    fn drop_cancels() {
        let fired = Arc::new(AtomicU32::new(0));
        let f = fired.clone();
        drop(Watchdog::arm(Duration::from_millis(30), move || {
            f.fetch_add(1, Ordering::SeqCst);
        }));
        thread::sleep(Duration::from_millis(80));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    #[traced_test]
    fn logs_the_winner_on_cancel() {
        let dog = Watchdog::arm(Duration::from_millis(1), || {});
        thread::sleep(Duration::from_millis(100));
        dog.cancel();
        assert!(logs_contain("timeout guard stopped"));
        assert!(logs_contain("Fired"));
    }
}

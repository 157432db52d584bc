//! Transactions and the reaction scheduler.
//!
//! Writes inside a transaction only queue reactions; the queue is drained when
//! the outermost transaction ends. The drain loop is never re-entered: writes
//! made by a running reaction queue more work for the same loop.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::error::ReactiveError;

/// Upper bound on reaction runs within one drain.
const MAX_REACTION_RUNS: usize = 10_000;

/// A scheduled unit of work (a reaction).
pub(crate) trait Runnable: Send + Sync {
    fn run(self: Arc<Self>);
    fn name(&self) -> &str;
    /// Clear the "already scheduled" mark when the queue is dropped.
    fn unschedule(&self);
}

struct BatchState {
    depth: usize,
    draining: bool,
    pending: VecDeque<Arc<dyn Runnable>>,
}

thread_local! {
    static BATCH: RefCell<BatchState> = const {
        RefCell::new(BatchState {
            depth: 0,
            draining: false,
            pending: VecDeque::new(),
        })
    };
}

/// Run `f` as one atomic update: reactions triggered by writes inside it run
/// once, after it returns.
pub fn transaction<R>(f: impl FnOnce() -> R) -> R {
    let guard = BatchGuard::enter();
    let result = f();
    drop(guard);
    result
}

/// Returns true while inside a transaction on this thread.
pub fn in_transaction() -> bool {
    BATCH.with(|batch| batch.borrow().depth > 0)
}

pub(crate) fn schedule(runnable: Arc<dyn Runnable>) {
    BATCH.with(|batch| batch.borrow_mut().pending.push_back(runnable));
}

struct BatchGuard;

impl BatchGuard {
    fn enter() -> Self {
        BATCH.with(|batch| batch.borrow_mut().depth += 1);
        BatchGuard
    }
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        let outermost = BATCH.with(|batch| {
            let mut batch = batch.borrow_mut();
            batch.depth -= 1;
            batch.depth == 0
        });
        if outermost && !std::thread::panicking() {
            drain();
        }
    }
}

struct DrainGuard;

impl Drop for DrainGuard {
    fn drop(&mut self) {
        BATCH.with(|batch| batch.borrow_mut().draining = false);
    }
}

fn drain() {
    let start = BATCH.with(|batch| {
        let mut batch = batch.borrow_mut();
        if batch.draining {
            false
        } else {
            batch.draining = true;
            true
        }
    });
    if !start {
        return;
    }
    let _guard = DrainGuard;

    let mut runs = 0;
    loop {
        let Some(next) = BATCH.with(|batch| batch.borrow_mut().pending.pop_front()) else {
            break;
        };
        runs += 1;
        if runs > MAX_REACTION_RUNS {
            let name = next.name().to_string();
            next.unschedule();
            let dropped: Vec<_> = BATCH.with(|batch| batch.borrow_mut().pending.drain(..).collect());
            for runnable in dropped {
                runnable.unschedule();
            }
            super::report_error(&ReactiveError::ReactionLoop {
                name,
                iterations: MAX_REACTION_RUNS,
            });
            break;
        }
        next.run();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Runnable for Recorder {
        fn run(self: Arc<Self>) {
            self.log.lock().push(self.name);
        }

        fn name(&self) -> &str {
            self.name
        }

        fn unschedule(&self) {}
    }

    #[test]
    fn test_runs_after_outermost_transaction() {
        let log = Arc::new(Mutex::new(Vec::new()));
        transaction(|| {
            assert!(in_transaction());
            transaction(|| {
                schedule(Arc::new(Recorder {
                    name: "a",
                    log: log.clone(),
                }));
            });
            assert!(log.lock().is_empty());
            schedule(Arc::new(Recorder {
                name: "b",
                log: log.clone(),
            }));
        });
        assert!(!in_transaction());
        assert_eq!(*log.lock(), vec!["a", "b"]);
    }
}

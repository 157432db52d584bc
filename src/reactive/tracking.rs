//! Dependency tracking frames.
//!
//! Every derivation run pushes a frame; atoms read during the run record
//! themselves into the innermost frame. `untracked` pushes an opaque frame so
//! reads inside it are not attributed to any derivation.

use std::cell::RefCell;
use std::sync::Arc;

use super::atom::Atom;

// Thread-local stack of dependency frames. `None` marks an untracked region.
thread_local! {
    static FRAMES: RefCell<Vec<Option<Vec<Arc<Atom>>>>> = const { RefCell::new(Vec::new()) };
}

pub(crate) fn record(atom: &Arc<Atom>) {
    FRAMES.with(|frames| {
        let mut frames = frames.borrow_mut();
        if let Some(Some(frame)) = frames.last_mut() {
            if !frame.iter().any(|a| a.id() == atom.id()) {
                frame.push(atom.clone());
            }
        }
    });
}

/// Pops its frame on drop, so a panicking derivation does not leave the stack
/// misaligned.
struct Frame {
    finished: bool,
}

impl Frame {
    fn enter(frame: Option<Vec<Arc<Atom>>>) -> Self {
        FRAMES.with(|frames| frames.borrow_mut().push(frame));
        Frame { finished: false }
    }

    fn finish(mut self) -> Vec<Arc<Atom>> {
        self.finished = true;
        FRAMES
            .with(|frames| frames.borrow_mut().pop())
            .flatten()
            .unwrap_or_default()
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        if !self.finished {
            FRAMES.with(|frames| {
                frames.borrow_mut().pop();
            });
        }
    }
}

/// Run `f`, returning its result and every atom it read.
pub(crate) fn track<R>(f: impl FnOnce() -> R) -> (R, Vec<Arc<Atom>>) {
    let frame = Frame::enter(Some(Vec::new()));
    let result = f();
    (result, frame.finish())
}

/// Run `f` without attributing its reads to the enclosing derivation.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let frame = Frame::enter(None);
    let result = f();
    frame.finish();
    result
}

/// Returns true while a derivation is collecting dependencies on this thread.
pub fn is_tracking() -> bool {
    FRAMES.with(|frames| matches!(frames.borrow().last(), Some(Some(_))))
}

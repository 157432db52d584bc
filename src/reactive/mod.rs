//! A small reactive engine: observables, computed values, reactions and
//! transactions.
//!
//! Dependency tracking is explicit: every reactive value is backed by an atom,
//! derivations record the atoms they read in a thread-local frame and
//! subscribe to them, and writes notify subscribers inside a batch. Reactions
//! queued by a batch run when the outermost batch closes.
//!
//! # Example
//!
//! ```
//! use reactive_query::reactive::{reaction, transaction, Observable, ReactionOptions};
//! use std::sync::{Arc, Mutex};
//!
//! let first = Observable::new("Ada".to_string());
//! let last = Observable::new("Lovelace".to_string());
//! let seen = Arc::new(Mutex::new(Vec::new()));
//!
//! let _names = {
//!     let (first, last, seen) = (first.clone(), last.clone(), seen.clone());
//!     reaction(
//!         ReactionOptions::named("full-name").fire_immediately(true),
//!         move || Ok(format!("{} {}", first.get(), last.get())),
//!         move |name| seen.lock().unwrap().push(name.clone()),
//!     )
//! };
//!
//! transaction(|| {
//!     first.set("Grace".to_string());
//!     last.set("Hopper".to_string());
//! });
//!
//! assert_eq!(*seen.lock().unwrap(), vec!["Ada Lovelace", "Grace Hopper"]);
//! ```

mod atom;
mod batch;
pub mod comparer;
mod computed;
mod observable;
mod reaction;
mod tracking;

use std::cell::RefCell;
use std::rc::Rc;

pub use batch::{in_transaction, transaction};
pub use comparer::Comparer;
pub use computed::Computed;
pub use observable::Observable;
pub use reaction::{reaction, reaction_with_comparer, Reaction, ReactionOptions};
pub use tracking::{is_tracking, untracked};

use crate::error::ReactiveError;

type ErrorHandler = Rc<dyn Fn(&ReactiveError)>;

// Error handler for the reactive graph on this thread.
thread_local! {
    static ERROR_HANDLER: RefCell<Option<ErrorHandler>> = const { RefCell::new(None) };
}

/// Install the handler that receives derivation failures on this thread,
/// replacing the default one that logs them with `tracing::error!`.
pub fn set_error_handler(handler: impl Fn(&ReactiveError) + 'static) {
    ERROR_HANDLER.with(|slot| *slot.borrow_mut() = Some(Rc::new(handler)));
}

/// Restore the default logging handler on this thread.
pub fn reset_error_handler() {
    ERROR_HANDLER.with(|slot| *slot.borrow_mut() = None);
}

pub(crate) fn report_error(error: &ReactiveError) {
    let handler = ERROR_HANDLER.with(|slot| slot.borrow().clone());
    match handler {
        Some(handler) => handler(error),
        None => tracing::error!(derivation = error.name(), "{}", error),
    }
}

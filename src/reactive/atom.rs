//! Atoms: the observable identity every reactive value is built on.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use slab::Slab;

use super::{batch, tracking};

/// Unique identifier of an atom.
pub(crate) type AtomId = u64;

static NEXT_ATOM_ID: AtomicU64 = AtomicU64::new(1);

/// Something that wants to hear when an atom it read has changed.
pub(crate) trait Observer: Send + Sync {
    /// Called inside a batch when one of the observed atoms changed.
    fn on_stale(&self);
}

/// An atom tracks who observes a piece of state and notifies them on change.
pub(crate) struct Atom {
    id: AtomId,
    name: String,
    observers: Mutex<Slab<Weak<dyn Observer>>>,
}

impl Atom {
    pub(crate) fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_ATOM_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            observers: Mutex::new(Slab::new()),
        })
    }

    pub(crate) fn id(&self) -> AtomId {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Record a read of this atom in the current tracking frame, if any.
    pub(crate) fn report_observed(self: &Arc<Self>) {
        tracking::record(self);
    }

    /// Notify all live observers. Observers are snapshotted first and the lock
    /// is released before any callback runs.
    pub(crate) fn report_changed(&self) {
        let observers: Vec<Arc<dyn Observer>> = self
            .observers
            .lock()
            .iter()
            .filter_map(|(_, observer)| observer.upgrade())
            .collect();
        batch::transaction(|| {
            for observer in observers {
                observer.on_stale();
            }
        });
    }

    fn add_observer(&self, observer: Weak<dyn Observer>) -> usize {
        self.observers.lock().insert(observer)
    }

    fn remove_observer(&self, key: usize) {
        let mut observers = self.observers.lock();
        if observers.contains(key) {
            observers.remove(key);
        }
    }

    pub(crate) fn observer_count(&self) -> usize {
        self.observers
            .lock()
            .iter()
            .filter(|(_, observer)| observer.strong_count() > 0)
            .count()
    }
}

impl std::fmt::Debug for Atom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Atom({}#{})", self.name, self.id)
    }
}

/// The set of atoms a derivation is subscribed to.
///
/// Dropping it unsubscribes from every atom, so replacing a derivation's
/// dependencies is a plain assignment.
#[derive(Default)]
pub(crate) struct Dependencies {
    entries: Vec<(Arc<Atom>, usize)>,
}

impl Dependencies {
    pub(crate) fn subscribe(atoms: Vec<Arc<Atom>>, observer: &Weak<dyn Observer>) -> Self {
        let entries = atoms
            .into_iter()
            .map(|atom| {
                let key = atom.add_observer(observer.clone());
                (atom, key)
            })
            .collect();
        Self { entries }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

impl Drop for Dependencies {
    fn drop(&mut self) {
        for (atom, key) in self.entries.drain(..) {
            atom.remove_observer(key);
        }
    }
}

//! Observable state cells.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use super::atom::Atom;
use super::comparer::{self, Comparer};

/// A piece of state whose reads are tracked and whose writes notify
/// dependent derivations.
///
/// This is cheap to clone; clones share the same cell.
pub struct Observable<T> {
    inner: Arc<ObservableInner<T>>,
}

struct ObservableInner<T> {
    atom: Arc<Atom>,
    value: RwLock<T>,
    equals: Comparer<T>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Observable<T> {
    /// Create an observable that treats `PartialEq`-equal writes as no-ops.
    pub fn new(value: T) -> Self
    where
        T: PartialEq,
    {
        Self::with_comparer(value, comparer::default)
    }

    /// Create an observable with a custom comparer.
    pub fn with_comparer(value: T, equals: Comparer<T>) -> Self {
        Self::named("observable", value, equals)
    }

    /// Create a named observable. The name shows up in logs.
    pub fn named(name: impl Into<String>, value: T, equals: Comparer<T>) -> Self {
        Self {
            inner: Arc::new(ObservableInner {
                atom: Atom::new(name),
                value: RwLock::new(value),
                equals,
            }),
        }
    }

    /// Read the value, registering a dependency on it.
    pub fn get(&self) -> T {
        self.inner.atom.report_observed();
        self.inner.value.read().clone()
    }

    /// Read the value without registering a dependency.
    pub fn get_untracked(&self) -> T {
        self.inner.value.read().clone()
    }

    /// Borrow the value, registering a dependency on it.
    ///
    /// `f` must not write to this observable.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.inner.atom.report_observed();
        f(&self.inner.value.read())
    }

    /// Replace the value. Returns `false` (and notifies nobody) when the
    /// comparer considers the new value equal to the current one.
    pub fn set(&self, value: T) -> bool {
        {
            let mut current = self.inner.value.write();
            if (self.inner.equals)(&current, &value) {
                return false;
            }
            *current = value;
        }
        self.inner.atom.report_changed();
        true
    }

    /// Mutate the value in place. Always counts as a change.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        f(&mut self.inner.value.write());
        self.inner.atom.report_changed();
    }

    /// Number of derivations currently depending on this observable.
    pub fn observer_count(&self) -> usize {
        self.inner.atom.observer_count()
    }
}

impl<T: fmt::Debug> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable")
            .field("name", &self.inner.atom.name())
            .field("value", &*self.inner.value.read())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::tracking;

    #[test]
    fn test_get_is_tracked_and_untracked_is_not() {
        let count = Observable::new(1);
        let (value, deps) = tracking::track(|| count.get());
        assert_eq!(value, 1);
        assert_eq!(deps.len(), 1);

        let (_, deps) = tracking::track(|| count.get_untracked());
        assert!(deps.is_empty());
    }

    #[test]
    fn test_set_reports_change_only_when_different() {
        let count = Observable::new(1);
        assert!(!count.set(1));
        assert!(count.set(2));
        assert_eq!(count.get_untracked(), 2);

        let always = Observable::with_comparer(1, comparer::always_changed);
        assert!(always.set(1));
    }

    #[test]
    fn test_update_in_place() {
        let items = Observable::new(vec![1]);
        items.update(|v| v.push(2));
        assert_eq!(items.with(|v| v.len()), 2);
    }
}

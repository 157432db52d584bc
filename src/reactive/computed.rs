//! Cached derivations.

use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::atom::{Atom, AtomId, Dependencies, Observer};
use super::comparer::{self, Comparer};
use super::tracking;
use crate::error::ReactiveError;

// Thread-local stack of computed values being evaluated, for cycle detection.
thread_local! {
    static EVALUATING: RefCell<Vec<AtomId>> = const { RefCell::new(Vec::new()) };
}

type DeriveFn<T> = Box<dyn Fn() -> anyhow::Result<T> + Send + Sync>;

/// A value derived from other reactive values.
///
/// The derivation runs lazily on read and is cached until one of the values it
/// read changes. Errors returned by the derivation are cached the same way and
/// returned as [`ReactiveError::Derivation`].
///
/// This is cheap to clone; clones share the same cache.
pub struct Computed<T> {
    inner: Arc<ComputedInner<T>>,
}

struct ComputedInner<T> {
    atom: Arc<Atom>,
    derive: DeriveFn<T>,
    equals: Comparer<T>,
    dirty: AtomicBool,
    value: Mutex<Option<Result<T, ReactiveError>>>,
    deps: Mutex<Dependencies>,
    this: Weak<ComputedInner<T>>,
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Computed<T> {
    /// Create a computed value compared with `PartialEq`.
    pub fn new(
        name: impl Into<String>,
        derive: impl Fn() -> anyhow::Result<T> + Send + Sync + 'static,
    ) -> Self
    where
        T: PartialEq,
    {
        Self::with_comparer(name, comparer::default, derive)
    }

    /// Create a computed value with a custom comparer.
    ///
    /// When a recomputation yields a value equal to the cached one, the cached
    /// value is kept, so readers keep seeing the same instance.
    pub fn with_comparer(
        name: impl Into<String>,
        equals: Comparer<T>,
        derive: impl Fn() -> anyhow::Result<T> + Send + Sync + 'static,
    ) -> Self {
        let inner = Arc::new_cyclic(|this| ComputedInner {
            atom: Atom::new(name),
            derive: Box::new(derive),
            equals,
            dirty: AtomicBool::new(true),
            value: Mutex::new(None),
            deps: Mutex::new(Dependencies::default()),
            this: this.clone(),
        });
        Self { inner }
    }

    /// Read the value, registering a dependency on it.
    pub fn get(&self) -> Result<T, ReactiveError> {
        self.inner.atom.report_observed();
        self.inner.evaluate()
    }

    /// Read the value without registering a dependency.
    pub fn get_untracked(&self) -> Result<T, ReactiveError> {
        tracking::untracked(|| self.inner.evaluate())
    }

    /// Name given at construction.
    pub fn name(&self) -> &str {
        self.inner.atom.name()
    }

    /// Number of derivations currently depending on this value.
    pub fn observer_count(&self) -> usize {
        self.inner.atom.observer_count()
    }

    /// Number of reactive values this derivation read on its last run.
    pub fn dependency_count(&self) -> usize {
        self.inner.deps.lock().len()
    }
}

impl<T: Clone + Send + Sync + 'static> ComputedInner<T> {
    fn evaluate(&self) -> Result<T, ReactiveError> {
        if !self.dirty.load(Ordering::Acquire) {
            if let Some(cached) = self.value.lock().as_ref() {
                return cached.clone();
            }
        }

        let id = self.atom.id();
        let entered = EVALUATING.with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack.contains(&id) {
                false
            } else {
                stack.push(id);
                true
            }
        });
        if !entered {
            return Err(ReactiveError::Cycle {
                name: self.atom.name().to_string(),
            });
        }
        let _guard = EvaluationGuard;

        // Cleared before the run so that changes made while deriving mark the
        // value dirty again.
        self.dirty.store(false, Ordering::Release);
        let (result, atoms) = tracking::track(|| (self.derive)());

        let observer: Weak<dyn Observer> = self.this.clone();
        let deps = Dependencies::subscribe(atoms, &observer);
        let previous = std::mem::replace(&mut *self.deps.lock(), deps);
        drop(previous);

        let result = result.map_err(|e| ReactiveError::derivation(self.atom.name(), e));
        let mut slot = self.value.lock();
        if let (Some(Ok(cached)), Ok(fresh)) = (slot.as_ref(), &result) {
            if (self.equals)(cached, fresh) {
                return Ok(cached.clone());
            }
        }
        *slot = Some(result.clone());
        result
    }
}

struct EvaluationGuard;

impl Drop for EvaluationGuard {
    fn drop(&mut self) {
        EVALUATING.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

impl<T: Send + Sync> Observer for ComputedInner<T> {
    fn on_stale(&self) {
        // Already-dirty values have told their observers once.
        if !self.dirty.swap(true, Ordering::AcqRel) {
            self.atom.report_changed();
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("name", &self.inner.atom.name())
            .field("dirty", &self.inner.dirty.load(Ordering::Relaxed))
            .field("value", &*self.inner.value.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Observable;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_caches_until_dependency_changes() {
        let runs = Arc::new(AtomicUsize::new(0));
        let input = Observable::new(2);
        let doubled = {
            let runs = runs.clone();
            let input = input.clone();
            Computed::new("doubled", move || {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(input.get() * 2)
            })
        };

        assert_eq!(doubled.get().unwrap(), 4);
        assert_eq!(doubled.get().unwrap(), 4);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        input.set(5);
        assert_eq!(doubled.get().unwrap(), 10);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(doubled.dependency_count(), 1);
    }

    #[test]
    fn test_errors_are_cached_and_recover() {
        let input = Observable::new(-1);
        let checked = {
            let input = input.clone();
            Computed::new("checked", move || {
                let value = input.get();
                anyhow::ensure!(value >= 0, "negative input {}", value);
                Ok(value)
            })
        };

        let err = checked.get().unwrap_err();
        assert!(matches!(err, ReactiveError::Derivation { ref name, .. } if name == "checked"));

        input.set(3);
        assert_eq!(checked.get().unwrap(), 3);
    }

    #[test]
    fn test_self_read_is_a_cycle() {
        let slot: Arc<Mutex<Option<Computed<i32>>>> = Arc::new(Mutex::new(None));
        let computed = {
            let slot = slot.clone();
            Computed::new("self", move || {
                let me = slot.lock().clone();
                match me {
                    Some(me) => Ok(me.get()? + 1),
                    None => Ok(0),
                }
            })
        };
        *slot.lock() = Some(computed.clone());

        let err = computed.get().unwrap_err();
        assert!(matches!(err, ReactiveError::Cycle { ref name } if name == "self"));
    }
}

//! Reactions: derivations with a side-effecting sink.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::atom::{Dependencies, Observer};
use super::batch::{self, Runnable};
use super::comparer::{self, Comparer};
use super::tracking;
use crate::error::ReactiveError;

/// Settings for [`reaction`].
#[derive(Debug, Clone)]
pub struct ReactionOptions {
    /// Name used in logs and error reports.
    pub name: String,
    /// Run the effect for the first derived value too.
    pub fire_immediately: bool,
}

impl Default for ReactionOptions {
    fn default() -> Self {
        Self {
            name: "reaction".to_string(),
            fire_immediately: false,
        }
    }
}

impl ReactionOptions {
    /// Options with the given name and default settings.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set `fire_immediately`.
    pub fn fire_immediately(mut self, fire: bool) -> Self {
        self.fire_immediately = fire;
        self
    }
}

/// Handle to a running reaction.
///
/// Dropping the handle stops the reaction as well; [`Reaction::dispose`] does
/// it explicitly and is idempotent.
#[must_use = "dropping a Reaction stops it"]
pub struct Reaction {
    core: Arc<dyn ReactionControl>,
}

trait ReactionControl: Send + Sync {
    fn dispose(&self);
    fn is_disposed(&self) -> bool;
    fn last_error(&self) -> Option<ReactiveError>;
    fn run_count(&self) -> u64;
    fn dependency_count(&self) -> usize;
}

impl Reaction {
    /// Stop the reaction and release its dependencies.
    pub fn dispose(&self) {
        self.core.dispose();
    }

    /// Returns true once disposed.
    pub fn is_disposed(&self) -> bool {
        self.core.is_disposed()
    }

    /// Error from the most recent run, if it failed.
    pub fn last_error(&self) -> Option<ReactiveError> {
        self.core.last_error()
    }

    /// Number of times the derive function ran.
    pub fn run_count(&self) -> u64 {
        self.core.run_count()
    }

    /// Number of reactive values the last run read.
    pub fn dependency_count(&self) -> usize {
        self.core.dependency_count()
    }
}

impl std::fmt::Debug for Reaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reaction")
            .field("disposed", &self.is_disposed())
            .field("runs", &self.run_count())
            .finish()
    }
}

/// Run `derive` now and whenever a value it read changes; call `effect` with
/// the derived value whenever it differs (by `PartialEq`) from the previous
/// one.
///
/// The first run happens immediately, or at the end of the enclosing
/// transaction. `effect` runs untracked.
pub fn reaction<T, D, E>(options: ReactionOptions, derive: D, effect: E) -> Reaction
where
    T: Clone + PartialEq + Send + Sync + 'static,
    D: Fn() -> anyhow::Result<T> + Send + Sync + 'static,
    E: Fn(&T) + Send + Sync + 'static,
{
    reaction_with_comparer(options, comparer::default, derive, effect)
}

/// [`reaction`] with a custom comparer.
pub fn reaction_with_comparer<T, D, E>(
    options: ReactionOptions,
    equals: Comparer<T>,
    derive: D,
    effect: E,
) -> Reaction
where
    T: Clone + Send + Sync + 'static,
    D: Fn() -> anyhow::Result<T> + Send + Sync + 'static,
    E: Fn(&T) + Send + Sync + 'static,
{
    let core = Arc::new_cyclic(|this| ReactionCore {
        name: options.name,
        fire_immediately: options.fire_immediately,
        derive: Box::new(derive),
        effect: Box::new(effect),
        equals,
        scheduled: AtomicBool::new(false),
        disposed: AtomicBool::new(false),
        runs: AtomicU64::new(0),
        last: Mutex::new(None),
        last_error: Mutex::new(None),
        deps: Mutex::new(Dependencies::default()),
        this: this.clone(),
    });
    batch::transaction(|| core.schedule());
    Reaction { core }
}

struct ReactionCore<T> {
    name: String,
    fire_immediately: bool,
    derive: Box<dyn Fn() -> anyhow::Result<T> + Send + Sync>,
    effect: Box<dyn Fn(&T) + Send + Sync>,
    equals: Comparer<T>,
    scheduled: AtomicBool,
    disposed: AtomicBool,
    runs: AtomicU64,
    last: Mutex<Option<T>>,
    last_error: Mutex<Option<ReactiveError>>,
    deps: Mutex<Dependencies>,
    this: Weak<ReactionCore<T>>,
}

impl<T: Clone + Send + Sync + 'static> ReactionCore<T> {
    fn schedule(&self) {
        if self.disposed.load(Ordering::Acquire) || self.scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(this) = self.this.upgrade() {
            batch::schedule(this);
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Observer for ReactionCore<T> {
    fn on_stale(&self) {
        self.schedule();
    }
}

impl<T: Clone + Send + Sync + 'static> Runnable for ReactionCore<T> {
    fn run(self: Arc<Self>) {
        self.scheduled.store(false, Ordering::Release);
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        self.runs.fetch_add(1, Ordering::Relaxed);

        let (result, atoms) = tracking::track(|| (self.derive)());
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        let observer: Weak<dyn Observer> = self.this.clone();
        let deps = Dependencies::subscribe(atoms, &observer);
        let previous = std::mem::replace(&mut *self.deps.lock(), deps);
        drop(previous);

        let value = match result {
            Ok(value) => value,
            Err(error) => {
                let error = ReactiveError::derivation(&self.name, error);
                *self.last_error.lock() = Some(error.clone());
                super::report_error(&error);
                return;
            }
        };
        *self.last_error.lock() = None;

        let fire = {
            let mut last = self.last.lock();
            let first = last.is_none();
            let changed = last
                .as_ref()
                .map_or(true, |previous| !(self.equals)(previous, &value));
            if changed {
                *last = Some(value.clone());
            }
            changed && (!first || self.fire_immediately)
        };
        if fire {
            tracking::untracked(|| (self.effect)(&value));
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn unschedule(&self) {
        self.scheduled.store(false, Ordering::Release);
    }
}

impl<T: Clone + Send + Sync + 'static> ReactionControl for ReactionCore<T> {
    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let deps = std::mem::take(&mut *self.deps.lock());
        drop(deps);
        tracing::trace!(reaction = %self.name, "reaction disposed");
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn last_error(&self) -> Option<ReactiveError> {
        self.last_error.lock().clone()
    }

    fn run_count(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    fn dependency_count(&self) -> usize {
        self.deps.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{transaction, Computed, Observable};

    #[test]
    fn test_effect_runs_on_change_only() {
        let input = Observable::new(1);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let r = {
            let input = input.clone();
            let seen = seen.clone();
            reaction(
                ReactionOptions::named("parity"),
                move || Ok(input.get() % 2),
                move |parity| seen.lock().push(*parity),
            )
        };

        assert!(seen.lock().is_empty());
        input.set(3);
        assert!(seen.lock().is_empty());
        input.set(4);
        assert_eq!(*seen.lock(), vec![0]);
        assert_eq!(r.run_count(), 3);
    }

    #[test]
    fn test_fire_immediately() {
        let input = Observable::new(7);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _r = {
            let input = input.clone();
            let seen = seen.clone();
            reaction(
                ReactionOptions::named("value").fire_immediately(true),
                move || Ok(input.get()),
                move |value| seen.lock().push(*value),
            )
        };
        assert_eq!(*seen.lock(), vec![7]);
    }

    #[test]
    fn test_transaction_batches_runs() {
        let a = Observable::new(1);
        let b = Observable::new(2);
        let sums = Arc::new(Mutex::new(Vec::new()));
        let r = {
            let (a, b) = (a.clone(), b.clone());
            let sums = sums.clone();
            reaction(
                ReactionOptions::named("sum").fire_immediately(true),
                move || Ok(a.get() + b.get()),
                move |sum| sums.lock().push(*sum),
            )
        };

        transaction(|| {
            a.set(10);
            b.set(20);
        });
        assert_eq!(*sums.lock(), vec![3, 30]);
        assert_eq!(r.run_count(), 2);
    }

    #[test]
    fn test_dispose_releases_dependencies() {
        let input = Observable::new(1);
        let r = {
            let input = input.clone();
            reaction(ReactionOptions::default(), move || Ok(input.get()), |_| {})
        };
        assert_eq!(input.observer_count(), 1);
        r.dispose();
        r.dispose();
        assert!(r.is_disposed());
        assert_eq!(input.observer_count(), 0);

        input.set(2);
        assert_eq!(r.run_count(), 1);
    }

    #[test]
    fn test_dropping_handle_stops_reaction() {
        let input = Observable::new(1);
        let hits = Arc::new(AtomicU64::new(0));
        let r = {
            let input = input.clone();
            let hits = hits.clone();
            reaction(
                ReactionOptions::default(),
                move || Ok(input.get()),
                move |_| {
                    hits.fetch_add(1, Ordering::SeqCst);
                },
            )
        };
        drop(r);
        input.set(2);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(input.observer_count(), 0);
    }

    #[test]
    fn test_derivation_error_keeps_dependencies() {
        let input = Observable::new(0);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let r = {
            let input = input.clone();
            let seen = seen.clone();
            reaction(
                ReactionOptions::named("nonzero").fire_immediately(true),
                move || {
                    let value = input.get();
                    anyhow::ensure!(value != 0, "zero");
                    Ok(value)
                },
                move |value| seen.lock().push(*value),
            )
        };

        assert!(matches!(r.last_error(), Some(ReactiveError::Derivation { .. })));
        input.set(5);
        assert!(r.last_error().is_none());
        assert_eq!(*seen.lock(), vec![5]);
    }

    #[test]
    fn test_reaction_over_computed() {
        let input = Observable::new(2);
        let squared = {
            let input = input.clone();
            Computed::new("squared", move || Ok(input.get() * input.get()))
        };
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _r = {
            let squared = squared.clone();
            let seen = seen.clone();
            reaction(
                ReactionOptions::named("watch").fire_immediately(true),
                move || Ok(squared.get()?),
                move |value| seen.lock().push(*value),
            )
        };

        input.set(-2);
        input.set(3);
        assert_eq!(*seen.lock(), vec![4, 9]);
        assert_eq!(squared.observer_count(), 1);
    }
}

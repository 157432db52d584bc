//! Links between a query's options derivation, its cache subscription and its
//! observable fields.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::engine::{CacheClient, FetchStatus, QueryData, QueryResult, QueryStatus, ResultListener};
use crate::options::QueryOptions;
use crate::query::{Query, QueryInner};
use crate::reactive::{reaction, ReactionOptions};
use crate::resolver;
use crate::subscription::SubscriptionId;

impl<T: QueryData, C: CacheClient> QueryInner<T, C> {
    /// Body of the options derivation.
    pub(crate) fn resolve_options(self: &Arc<Self>) -> anyhow::Result<QueryOptions<T>> {
        let base = self.base.get();
        let query = Query {
            inner: self.clone(),
        };
        resolver::resolve(
            &base,
            self.key_fn.as_ref(),
            self.options_fn.as_ref(),
            &query,
            &self.demand,
        )
    }

    /// Start the reaction that pushes resolved options into the subscription.
    /// Runs now, or when the enclosing transaction ends.
    pub(crate) fn start_sync(self: &Arc<Self>) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        let options = self.options.clone();
        let weak = Arc::downgrade(self);
        let sync = reaction(
            ReactionOptions::named(format!("{}.sync", self.name)).fire_immediately(true),
            move || Ok(options.get()?),
            move |options: &QueryOptions<T>| {
                if let Some(inner) = weak.upgrade() {
                    inner.apply(options.clone());
                }
            },
        );
        *self.reaction.lock() = Some(sync);

        // Disposed while the first run was in progress.
        if self.disposed.load(Ordering::Acquire) {
            let sync = self.reaction.lock().take();
            if let Some(sync) = sync {
                sync.dispose();
            }
        }
    }

    fn apply(&self, options: QueryOptions<T>) {
        let applied = self
            .subscriptions
            .apply(options, |id| self.listener(id));
        tracing::trace!(query = %self.name, ?applied, "options applied");
    }

    fn listener(&self, id: SubscriptionId) -> ResultListener<T> {
        let weak = self.this.clone();
        Arc::new(move |result: &QueryResult<T>| {
            if let Some(inner) = weak.upgrade() {
                inner.receive(id, result);
            }
        })
    }

    /// Write an emission into the fields, then run completion hooks.
    fn receive(&self, id: SubscriptionId, result: &QueryResult<T>) {
        if self.disposed.load(Ordering::Acquire) || !self.subscriptions.is_live(id) {
            tracing::trace!(query = %self.name, id, "dropping emission from a stale subscription");
            return;
        }
        let completed = {
            let mut last = self.last_emission.lock();
            let was_fetching = last.0 == id && last.1 == FetchStatus::Fetching;
            *last = (id, result.fetch_status);
            was_fetching && result.fetch_status == FetchStatus::Idle
        };

        self.fields.write(result);

        if completed {
            self.run_hooks(result);
        }
    }

    fn run_hooks(&self, result: &QueryResult<T>) {
        match (result.status, &result.error, &result.data) {
            (QueryStatus::Error, Some(error), _) => {
                if let Some(on_error) = &self.hooks.on_error {
                    on_error(error);
                }
            }
            (QueryStatus::Success, _, Some(data)) => {
                if let Some(on_done) = &self.hooks.on_done {
                    on_done(data);
                }
            }
            _ => {}
        }
    }
}

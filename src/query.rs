//! Reactive query instances.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::cancel::{CancellationToken, Registration};
use crate::client::QueryClient;
use crate::config::QueryConfig;
use crate::demand::DemandGate;
use crate::engine::{
    CacheClient, CacheObserver, FetchStatus, InvalidateParams, QueryData, QueryFilters, QueryResult,
    QueryStatus, ResetParams,
};
use crate::error::{QueryError, ReactiveError};
use crate::fields::ResultFields;
use crate::key::QueryKey;
use crate::options::{QueryOptions, QueryUpdate};
use crate::reactive::{Computed, Observable, Reaction};
use crate::resolver::{KeyFn, OptionsFn};
use crate::subscription::{SubscriptionId, SubscriptionManager};

/// Called with the data of every successful fetch.
pub type DoneHook<T> = Arc<dyn Fn(&Arc<T>) + Send + Sync>;

/// Called with the error of every failed fetch.
pub type ErrorHook = Arc<dyn Fn(&QueryError) + Send + Sync>;

/// Called once with the new query, after it is wired up.
pub type InitHook<T, C> = Box<dyn FnOnce(&Query<T, C>) + Send>;

/// A cache query bound to the reactive graph.
///
/// The query's options are derived reactively from its configuration: when an
/// observable read by the key function or the dynamic options changes, the
/// cache subscription follows. Cache emissions are written to observable
/// fields, so the getters below can be read from computed values and
/// reactions.
///
/// Handles are cheap to clone. The query is torn down by [`Query::dispose`],
/// or without a reset when the last handle is dropped.
pub struct Query<T: QueryData, C: CacheClient = QueryClient> {
    pub(crate) inner: Arc<QueryInner<T, C>>,
}

pub(crate) struct Hooks<T> {
    pub(crate) on_done: Option<DoneHook<T>>,
    pub(crate) on_error: Option<ErrorHook>,
}

pub(crate) struct QueryInner<T: QueryData, C: CacheClient> {
    pub(crate) name: String,
    /// Static options plus `set_options` updates.
    pub(crate) base: Observable<QueryUpdate<T>>,
    pub(crate) key_fn: Option<KeyFn>,
    pub(crate) options_fn: Option<OptionsFn<Query<T, C>>>,
    pub(crate) reset_on_dispose: bool,
    pub(crate) demand: DemandGate,
    pub(crate) options: Computed<QueryOptions<T>>,
    pub(crate) reaction: Mutex<Option<Reaction>>,
    pub(crate) subscriptions: SubscriptionManager<T, C>,
    pub(crate) fields: ResultFields<T>,
    pub(crate) hooks: Hooks<T>,
    /// Subscription and fetch status of the last accepted emission.
    pub(crate) last_emission: Mutex<(SubscriptionId, FetchStatus)>,
    pub(crate) token: CancellationToken,
    /// Callbacks on external abort signals and disposers.
    pub(crate) registrations: Mutex<Vec<Registration>>,
    pub(crate) disposed: AtomicBool,
    pub(crate) this: Weak<QueryInner<T, C>>,
}

impl<T: QueryData, C: CacheClient> Clone for Query<T, C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: QueryData, C: CacheClient> Query<T, C> {
    /// Start configuring a query backed by `client`.
    pub fn builder(client: C) -> QueryConfig<T, C> {
        QueryConfig::builder(client)
    }

    /// Name used in logs.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The cache this query is bound to.
    pub fn client(&self) -> &C {
        self.inner.subscriptions.client()
    }

    // ========================================================================
    // Observable result
    // ========================================================================

    /// Data of the last successful fetch.
    pub fn data(&self) -> Option<Arc<T>> {
        self.inner.demand.mark_observed();
        self.inner.fields.data.get()
    }

    /// Error of the last failed fetch.
    pub fn error(&self) -> Option<QueryError> {
        self.inner.demand.mark_observed();
        self.inner.fields.error.get()
    }

    /// Data status.
    pub fn status(&self) -> QueryStatus {
        self.inner.demand.mark_observed();
        self.inner.fields.status.get()
    }

    /// Fetch status.
    pub fn fetch_status(&self) -> FetchStatus {
        self.inner.demand.mark_observed();
        self.inner.fields.fetch_status.get()
    }

    /// No data yet.
    pub fn is_pending(&self) -> bool {
        self.status() == QueryStatus::Pending
    }

    /// The first fetch is running.
    pub fn is_loading(&self) -> bool {
        self.is_pending() && self.is_fetching()
    }

    /// A fetch is running.
    pub fn is_fetching(&self) -> bool {
        self.fetch_status() == FetchStatus::Fetching
    }

    /// A fetch is running while data or an error is shown.
    pub fn is_refetching(&self) -> bool {
        self.is_fetching() && !self.is_pending()
    }

    /// Data is available.
    pub fn is_success(&self) -> bool {
        self.status() == QueryStatus::Success
    }

    /// The last fetch failed.
    pub fn is_error(&self) -> bool {
        self.status() == QueryStatus::Error
    }

    /// Revision of the current data; `0` when there is none.
    pub fn data_updated_at(&self) -> u64 {
        self.inner.demand.mark_observed();
        self.inner.fields.data_updated_at.get()
    }

    /// Failed attempts of the current or last fetch.
    pub fn failure_count(&self) -> u32 {
        self.inner.demand.mark_observed();
        self.inner.fields.failure_count.get()
    }

    /// Whether the data was invalidated and not refetched yet.
    pub fn is_invalidated(&self) -> bool {
        self.inner.demand.mark_observed();
        self.inner.fields.is_invalidated.get()
    }

    /// Every result field at once. `None` until the first subscription.
    pub fn result(&self) -> Option<QueryResult<T>> {
        self.inner.demand.mark_observed();
        self.inner.fields.snapshot()
    }

    /// Currently resolved options. Reading them does not count as demand.
    pub fn options(&self) -> Result<QueryOptions<T>, ReactiveError> {
        self.inner.options.get()
    }

    /// Key of the currently resolved options.
    pub fn query_key(&self) -> Option<QueryKey> {
        self.options().ok().map(|options| options.query_key)
    }

    // ========================================================================
    // Controls
    // ========================================================================

    /// Invalidate this query's current key. Returns false when there is no
    /// live subscription.
    pub fn invalidate(&self, params: InvalidateParams) -> bool {
        let Some(key) = self.live_key("invalidate") else {
            return false;
        };
        self.client().invalidate_queries(QueryFilters::exact(key, params));
        true
    }

    /// Reset this query's current key to its initial state.
    ///
    /// Demand is forgotten first when fetching on demand, so the reset does
    /// not refetch until the result is read again.
    pub fn reset(&self, params: ResetParams) -> bool {
        let Some(key) = self.live_key("reset") else {
            return false;
        };
        self.inner.demand.reset();
        // The derivation may only be queued inside a batch.
        if self.inner.demand.enable_on_demand() {
            self.inner.subscriptions.deactivate();
        }
        self.client().reset_queries(QueryFilters::exact(key, params));
        true
    }

    /// Fetch now, regardless of staleness.
    pub fn refetch(&self) -> bool {
        if self.is_disposed() {
            tracing::warn!(query = %self.inner.name, "refetch on a disposed query");
            return false;
        }
        match self.inner.subscriptions.observer() {
            Some(observer) => {
                observer.refetch();
                true
            }
            None => false,
        }
    }

    /// Fetch with `update` merged over the current options, through the
    /// client rather than the live subscription.
    pub fn start(&self, update: QueryUpdate<T>) -> Option<QueryResult<T>> {
        if self.is_disposed() {
            tracing::warn!(query = %self.inner.name, "start on a disposed query");
            return None;
        }
        match self.inner.options.get_untracked() {
            Ok(options) => Some(self.client().fetch_query(options.with_update(&update))),
            Err(error) => {
                tracing::warn!(query = %self.inner.name, %error, "start without resolvable options");
                None
            }
        }
    }

    /// Merge `update` into the static options. The subscription follows
    /// through the options derivation.
    pub fn set_options(&self, update: QueryUpdate<T>) {
        if self.is_disposed() {
            tracing::warn!(query = %self.inner.name, "set_options on a disposed query");
            return;
        }
        self.inner.base.update(|base| base.merge(&update));
    }

    /// Tear the query down. Only the first call, or the first trigger of an
    /// abort signal or disposer, has an effect.
    pub fn dispose(&self) {
        self.inner.token.cancel();
    }

    /// Returns true once disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    fn live_key(&self, operation: &str) -> Option<QueryKey> {
        if self.is_disposed() {
            tracing::warn!(query = %self.inner.name, operation, "operation on a disposed query");
            return None;
        }
        self.inner.subscriptions.current_key()
    }
}

impl<T: QueryData, C: CacheClient> QueryInner<T, C> {
    /// Disposal routine, run once by the cancellation token.
    pub(crate) fn shutdown(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let reaction = self.reaction.lock().take();
        if let Some(reaction) = reaction {
            reaction.dispose();
        }
        if self.reset_on_dispose {
            if let Some(key) = self.subscriptions.current_key() {
                self.subscriptions.deactivate();
                self.subscriptions
                    .client()
                    .reset_queries(QueryFilters::exact(key, ResetParams::default()));
            }
        }
        self.subscriptions.teardown();
        let registrations = std::mem::take(&mut *self.registrations.lock());
        registrations.into_iter().for_each(Registration::unregister);
        tracing::debug!(query = %self.name, "query disposed");
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl<T: QueryData, C: CacheClient> Drop for QueryInner<T, C> {
    fn drop(&mut self) {
        if !self.disposed.swap(true, Ordering::AcqRel) {
            if let Some(reaction) = self.reaction.get_mut().take() {
                reaction.dispose();
            }
            self.subscriptions.teardown();
        }
        self.registrations
            .get_mut()
            .drain(..)
            .for_each(Registration::unregister);
    }
}

impl<T: QueryData + fmt::Debug, C: CacheClient> fmt::Debug for Query<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("name", &self.inner.name)
            .field("query_key", &self.inner.subscriptions.current_key())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

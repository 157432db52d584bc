//! Builder for [`Query`] instances.

use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::cancel::{CancellationToken, Disposer, Registration};
use crate::client::QueryClient;
use crate::demand::DemandGate;
use crate::engine::{CacheClient, FetchStatus, QueryData};
use crate::error::QueryError;
use crate::fields::ResultFields;
use crate::key::QueryKey;
use crate::options::{DynamicOptions, Fetch, QueryFnContext, QueryUpdate};
use crate::query::{DoneHook, ErrorHook, Hooks, InitHook, Query, QueryInner};
use crate::reactive::{Computed, Observable};
use crate::resolver::{KeyFn, OptionsFn};
use crate::subscription::SubscriptionManager;

/// Configuration for a [`Query`], built with chained setters.
///
/// # Example
///
/// ```
/// use reactive_query::{query_key, Fetch, Query, QueryClient};
///
/// let client = QueryClient::new();
/// let query: Query<String> = Query::builder(client)
///     .query_key(query_key!["greeting"])
///     .query_fn(|_| Fetch::ok("hello".to_string()))
///     .build();
///
/// assert_eq!(query.data().as_deref().map(String::as_str), Some("hello"));
/// ```
pub struct QueryConfig<T: QueryData, C: CacheClient = QueryClient> {
    client: C,
    name: String,
    key_fn: Option<KeyFn>,
    update: QueryUpdate<T>,
    options_fn: Option<OptionsFn<Query<T, C>>>,
    reset_on_dispose: bool,
    enable_on_demand: bool,
    on_init: Option<InitHook<T, C>>,
    on_done: Option<DoneHook<T>>,
    on_error: Option<ErrorHook>,
    disposer: Option<Disposer>,
    abort_signal: Option<CancellationToken>,
}

impl<T: QueryData, C: CacheClient> QueryConfig<T, C> {
    /// Configuration with defaults, backed by `client`.
    pub fn builder(client: C) -> Self {
        Self {
            client,
            name: "query".to_string(),
            key_fn: None,
            update: QueryUpdate::new(),
            options_fn: None,
            reset_on_dispose: false,
            enable_on_demand: false,
            on_init: None,
            on_done: None,
            on_error: None,
            disposer: None,
            abort_signal: None,
        }
    }

    /// Name used in logs and reactive error reports.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Fixed query key.
    pub fn query_key(mut self, key: QueryKey) -> Self {
        self.update.options.query_key = Some(key);
        self
    }

    /// Reactive query key. Observables read by `f` are tracked, and a change
    /// to the key moves the subscription. Takes precedence over
    /// [`query_key`](Self::query_key).
    pub fn query_key_fn(mut self, f: impl Fn() -> anyhow::Result<QueryKey> + Send + Sync + 'static) -> Self {
        self.key_fn = Some(Arc::new(f));
        self
    }

    /// Function loading the data.
    pub fn query_fn(mut self, f: impl Fn(&QueryFnContext) -> Fetch<T> + Send + Sync + 'static) -> Self {
        self.update.query_fn = Some(Arc::new(f));
        self
    }

    /// Dynamic options, re-evaluated whenever an observable they read
    /// changes. Fields they set override the static configuration.
    pub fn options(
        mut self,
        f: impl Fn(&Query<T, C>) -> anyhow::Result<DynamicOptions> + Send + Sync + 'static,
    ) -> Self {
        self.options_fn = Some(Arc::new(f));
        self
    }

    /// Whether the query may fetch. Defaults to true.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.update.options.enabled = Some(enabled);
        self
    }

    /// How long fetched data counts as fresh. Defaults to zero.
    pub fn stale_time(mut self, stale_time: Duration) -> Self {
        self.update.options.stale_time = Some(stale_time);
        self
    }

    /// Retries after a failed attempt.
    pub fn retry(mut self, retry: u32) -> Self {
        self.update.options.retry = Some(retry);
        self
    }

    /// Refetch stale data when subscribing.
    pub fn refetch_on_mount(mut self, refetch: bool) -> Self {
        self.update.options.refetch_on_mount = Some(refetch);
        self
    }

    /// Refetch stale data when the client is told about window focus.
    pub fn refetch_on_window_focus(mut self, refetch: bool) -> Self {
        self.update.options.refetch_on_window_focus = Some(refetch);
        self
    }

    /// Refetch stale data when the client is told about a reconnect.
    pub fn refetch_on_reconnect(mut self, refetch: bool) -> Self {
        self.update.options.refetch_on_reconnect = Some(refetch);
        self
    }

    /// Reset the cached query when disposing.
    pub fn reset_on_dispose(mut self, reset: bool) -> Self {
        self.reset_on_dispose = reset;
        self
    }

    /// Fetch only after a result field has been read.
    pub fn enable_on_demand(mut self, on_demand: bool) -> Self {
        self.enable_on_demand = on_demand;
        self
    }

    /// Called once with the query after construction.
    pub fn on_init(mut self, f: impl FnOnce(&Query<T, C>) + Send + 'static) -> Self {
        self.on_init = Some(Box::new(f));
        self
    }

    /// Called with the data of every successful fetch.
    pub fn on_done(mut self, f: impl Fn(&Arc<T>) + Send + Sync + 'static) -> Self {
        self.on_done = Some(Arc::new(f));
        self
    }

    /// Called with the error of every failed fetch.
    pub fn on_error(mut self, f: impl Fn(&QueryError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Dispose the query together with `disposer`.
    #[deprecated(note = "use `abort_signal` instead")]
    pub fn disposer(mut self, disposer: Disposer) -> Self {
        self.disposer = Some(disposer);
        self
    }

    /// Dispose the query when `signal` is cancelled.
    pub fn abort_signal(mut self, signal: CancellationToken) -> Self {
        self.abort_signal = Some(signal);
        self
    }

    /// Create the query and subscribe it.
    ///
    /// The first subscription is made immediately, or at the end of the
    /// enclosing transaction.
    pub fn build(self) -> Query<T, C> {
        let name = self.name;
        let base = Observable::named(
            format!("{name}.base"),
            self.update,
            crate::reactive::comparer::default,
        );
        let inner = Arc::new_cyclic(|this: &Weak<QueryInner<T, C>>| {
            let weak = this.clone();
            let options = Computed::new(format!("{name}.options"), move || {
                let inner = weak
                    .upgrade()
                    .ok_or_else(|| anyhow::anyhow!("query dropped during resolution"))?;
                inner.resolve_options()
            });
            QueryInner {
                name: name.clone(),
                base,
                key_fn: self.key_fn,
                options_fn: self.options_fn,
                reset_on_dispose: self.reset_on_dispose,
                demand: DemandGate::new(self.enable_on_demand),
                options,
                reaction: Mutex::new(None),
                subscriptions: SubscriptionManager::new(self.client, name.clone()),
                fields: ResultFields::new(&name),
                hooks: Hooks {
                    on_done: self.on_done,
                    on_error: self.on_error,
                },
                last_emission: Mutex::new((0, FetchStatus::Idle)),
                token: CancellationToken::new(),
                registrations: Mutex::new(Vec::new()),
                disposed: AtomicBool::new(false),
                this: this.clone(),
            }
        });

        {
            let weak = Arc::downgrade(&inner);
            let _ = inner.token.on_cancel(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.shutdown();
                }
            });
        }
        let forward = |inner: &Arc<QueryInner<T, C>>| {
            let weak = Arc::downgrade(inner);
            move || {
                if let Some(inner) = weak.upgrade() {
                    inner.token.cancel();
                }
            }
        };
        let mut registrations = Vec::new();
        if let Some(signal) = &self.abort_signal {
            registrations.push(signal.on_cancel(forward(&inner)));
        }
        if let Some(disposer) = &self.disposer {
            registrations.push(disposer.add(forward(&inner)));
        }
        if inner.is_disposed() {
            registrations.into_iter().for_each(Registration::unregister);
        } else {
            inner.registrations.lock().extend(registrations);
        }

        inner.start_sync();
        tracing::debug!(query = %name, "query created");

        let query = Query { inner };
        if let Some(on_init) = self.on_init {
            on_init(&query);
        }
        query
    }
}

impl<T: QueryData, C: CacheClient + fmt::Debug> fmt::Debug for QueryConfig<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryConfig")
            .field("client", &self.client)
            .field("name", &self.name)
            .field("options", &self.update)
            .field("reactive_key", &self.key_fn.is_some())
            .field("dynamic_options", &self.options_fn.is_some())
            .field("reset_on_dispose", &self.reset_on_dispose)
            .field("enable_on_demand", &self.enable_on_demand)
            .finish()
    }
}

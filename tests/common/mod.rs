//! Shared helpers for integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use reactive_query::{
    CacheClient, CacheObserver, Fetch, QueryClient, QueryData, QueryFilters, QueryFnContext, QueryKey,
    QueryObserver, QueryOptions, QueryResult, ResultListener, Unsubscribe,
};

/// Install a test-writer subscriber once. Set `RUST_LOG` to see output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Calls made through a [`RecordingClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Create(QueryKey),
    Subscribe(QueryKey),
    Unsubscribe(QueryKey),
    Update { key: QueryKey, enabled: bool },
    Refetch(QueryKey),
    Invalidate { key: Option<QueryKey>, exact: bool },
    Reset { key: Option<QueryKey>, exact: bool },
    FetchQuery(QueryKey),
}

/// A [`QueryClient`] that records every call made through the engine traits.
#[derive(Clone, Default)]
pub struct RecordingClient {
    pub cache: QueryClient,
    log: Arc<Mutex<Vec<Event>>>,
}

impl RecordingClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.log.lock().clone()
    }

    pub fn take_events(&self) -> Vec<Event> {
        std::mem::take(&mut *self.log.lock())
    }

    /// Subscriptions made minus subscriptions removed.
    pub fn live_subscriptions(&self) -> usize {
        let log = self.log.lock();
        let made = log.iter().filter(|e| matches!(e, Event::Subscribe(_))).count();
        let removed = log.iter().filter(|e| matches!(e, Event::Unsubscribe(_))).count();
        made - removed
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.log.lock().iter().filter(|e| pred(e)).count()
    }

    fn record(&self, event: Event) {
        self.log.lock().push(event);
    }
}

pub struct RecordingObserver<T> {
    observer: QueryObserver<T>,
    log: Arc<Mutex<Vec<Event>>>,
}

impl<T: QueryData> CacheObserver<T> for RecordingObserver<T> {
    fn subscribe(&self, listener: ResultListener<T>) -> Unsubscribe {
        let key = self.observer.options().query_key;
        self.log.lock().push(Event::Subscribe(key.clone()));
        let inner = self.observer.subscribe(listener);
        let log = self.log.clone();
        Unsubscribe::new(move || {
            if inner.unsubscribe() {
                log.lock().push(Event::Unsubscribe(key));
            }
        })
    }

    fn options(&self) -> QueryOptions<T> {
        self.observer.options()
    }

    fn update_options(&self, options: QueryOptions<T>) {
        self.log.lock().push(Event::Update {
            key: options.query_key.clone(),
            enabled: options.enabled,
        });
        self.observer.update_options(options);
    }

    fn current_result(&self) -> QueryResult<T> {
        self.observer.current_result()
    }

    fn refetch(&self) {
        self.log
            .lock()
            .push(Event::Refetch(self.observer.options().query_key));
        self.observer.refetch();
    }
}

impl CacheClient for RecordingClient {
    type Observer<T: QueryData> = RecordingObserver<T>;

    fn create_observer<T: QueryData>(&self, options: QueryOptions<T>) -> RecordingObserver<T> {
        self.record(Event::Create(options.query_key.clone()));
        RecordingObserver {
            observer: self.cache.create_observer(options),
            log: self.log.clone(),
        }
    }

    fn invalidate_queries(&self, filters: QueryFilters) {
        self.record(Event::Invalidate {
            key: filters.query_key.clone(),
            exact: filters.exact,
        });
        self.cache.invalidate_queries(filters);
    }

    fn reset_queries(&self, filters: QueryFilters) {
        self.record(Event::Reset {
            key: filters.query_key.clone(),
            exact: filters.exact,
        });
        self.cache.reset_queries(filters);
    }

    fn fetch_query<T: QueryData>(&self, options: QueryOptions<T>) -> QueryResult<T> {
        self.record(Event::FetchQuery(options.query_key.clone()));
        self.cache.fetch_query(options)
    }
}

/// Counts calls to the query functions built from it.
#[derive(Clone, Default)]
pub struct Fetches {
    calls: Arc<AtomicUsize>,
    keys: Arc<Mutex<Vec<QueryKey>>>,
}

impl Fetches {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn keys(&self) -> Vec<QueryKey> {
        self.keys.lock().clone()
    }

    /// Query function answering with the key it was called for.
    pub fn echo(&self) -> impl Fn(&QueryFnContext) -> Fetch<String> + Send + Sync + 'static {
        let this = self.clone();
        move |ctx: &QueryFnContext| {
            this.calls.fetch_add(1, Ordering::SeqCst);
            this.keys.lock().push(ctx.query_key.clone());
            Fetch::ok(ctx.query_key.to_string())
        }
    }

    /// Query function that always fails.
    pub fn failing(&self, message: &'static str) -> impl Fn(&QueryFnContext) -> Fetch<String> + Send + Sync + 'static {
        let this = self.clone();
        move |ctx: &QueryFnContext| {
            this.calls.fetch_add(1, Ordering::SeqCst);
            this.keys.lock().push(ctx.query_key.clone());
            Fetch::err(anyhow::anyhow!(message))
        }
    }
}

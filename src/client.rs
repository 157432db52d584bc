//! In-memory query cache.
//!
//! Entries are keyed by [`QueryKey`] and hold type-erased data; each
//! [`QueryObserver`] downcasts to its own data type when it builds a
//! [`QueryResult`]. Locks are released before any listener or query function
//! runs.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use slab::Slab;

use crate::engine::{
    CacheClient, CacheObserver, FetchStatus, QueryData, QueryFilters, QueryResult, QueryStatus,
    ResultListener, Unsubscribe,
};
use crate::error::QueryError;
use crate::key::QueryKey;
use crate::options::{Fetch, QueryFnContext, QueryOptions};

type ErasedData = Arc<dyn Any + Send + Sync>;
type Refetcher = Arc<dyn Fn(&QueryClient, &Arc<CacheEntry>) + Send + Sync>;

/// Shared query cache. Cheap to clone; clones share the same entries.
#[derive(Clone, Default)]
pub struct QueryClient {
    inner: Arc<ClientInner>,
}

#[derive(Default)]
struct ClientInner {
    entries: Mutex<HashMap<QueryKey, Arc<CacheEntry>>>,
    revision: AtomicU64,
}

struct CacheEntry {
    key: QueryKey,
    state: Mutex<EntryState>,
    observers: Mutex<Slab<Weak<dyn EntryObserver>>>,
    // Options of the last fetch, used to refetch when no observer is active.
    refetcher: Mutex<Option<Refetcher>>,
}

#[derive(Default)]
struct EntryState {
    data: Option<ErasedData>,
    error: Option<QueryError>,
    status: QueryStatus,
    fetch_status: FetchStatus,
    data_updated_at: u64,
    updated_at: Option<Instant>,
    failure_count: u32,
    is_invalidated: bool,
}

impl EntryState {
    fn is_stale(&self, stale_time: Duration) -> bool {
        self.is_invalidated
            || self.data.is_none()
            || self.updated_at.map_or(true, |at| at.elapsed() >= stale_time)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientEvent {
    Focus,
    Reconnect,
}

/// Type-erased view of a [`QueryObserver`] registered with an entry.
trait EntryObserver: Send + Sync {
    /// Emit the entry's current state to the observer's listeners.
    fn notify(&self);
    /// Enabled and subscribed to.
    fn is_active(&self) -> bool;
    fn stale_time(&self) -> Duration;
    /// Fetch with the observer's options. Returns false without a query function.
    fn fetch(&self) -> bool;
    fn on_event(&self, event: ClientEvent);
}

impl CacheEntry {
    fn new(key: QueryKey) -> Self {
        Self {
            key,
            state: Mutex::new(EntryState::default()),
            observers: Mutex::new(Slab::new()),
            refetcher: Mutex::new(None),
        }
    }

    fn observers(&self) -> Vec<Arc<dyn EntryObserver>> {
        self.observers
            .lock()
            .iter()
            .filter_map(|(_, observer)| observer.upgrade())
            .collect()
    }

    fn notify(&self) {
        for observer in self.observers() {
            observer.notify();
        }
    }

    fn is_active(&self) -> bool {
        self.observers().iter().any(|o| o.is_active())
    }

    fn is_stale(&self) -> bool {
        let stale_time = self
            .observers()
            .iter()
            .map(|o| o.stale_time())
            .min()
            .unwrap_or(Duration::ZERO);
        self.state.lock().is_stale(stale_time)
    }

    fn fetch_status(&self) -> FetchStatus {
        self.state.lock().fetch_status
    }

    fn snapshot<T: QueryData>(&self) -> QueryResult<T> {
        let state = self.state.lock();
        let data = state.data.clone().and_then(|data| match data.downcast::<T>() {
            Ok(data) => Some(data),
            Err(_) => {
                tracing::warn!(key = %self.key, "cached data has a different type than requested");
                None
            }
        });
        QueryResult {
            query_key: self.key.clone(),
            data,
            error: state.error.clone(),
            status: state.status,
            fetch_status: state.fetch_status,
            data_updated_at: state.data_updated_at,
            failure_count: state.failure_count,
            is_invalidated: state.is_invalidated,
        }
    }
}

impl QueryClient {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, key: &QueryKey) -> Arc<CacheEntry> {
        self.inner
            .entries
            .lock()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(CacheEntry::new(key.clone())))
            .clone()
    }

    fn existing(&self, key: &QueryKey) -> Option<Arc<CacheEntry>> {
        self.inner.entries.lock().get(key).cloned()
    }

    fn matching(&self, filters: &QueryFilters) -> Vec<Arc<CacheEntry>> {
        let candidates: Vec<_> = self
            .inner
            .entries
            .lock()
            .values()
            .filter(|entry| filters.matches_key(&entry.key))
            .cloned()
            .collect();
        candidates
            .into_iter()
            .filter(|entry| {
                filters.matches(
                    &entry.key,
                    entry.is_active(),
                    entry.is_stale(),
                    entry.fetch_status(),
                )
            })
            .collect()
    }

    fn next_revision(&self) -> u64 {
        self.inner.revision.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Run `options.query_fn` for `entry`. A fetch already in flight for the
    /// entry is joined instead of started again.
    fn run_fetch<T: QueryData>(&self, entry: &Arc<CacheEntry>, options: &QueryOptions<T>) {
        let Some(query_fn) = options.query_fn.clone() else {
            if entry.fetch_status() == FetchStatus::Fetching {
                return;
            }
            tracing::warn!(key = %entry.key, "fetch requested without a query function");
            let error = QueryError::MissingQueryFn {
                key: entry.key.clone(),
            };
            self.settle(entry, Err(error));
            return;
        };
        {
            let mut state = entry.state.lock();
            if state.fetch_status == FetchStatus::Fetching {
                tracing::trace!(key = %entry.key, "joining in-flight fetch");
                return;
            }
            state.fetch_status = FetchStatus::Fetching;
            state.failure_count = 0;
        }
        {
            let options = options.clone();
            let refetcher: Refetcher =
                Arc::new(move |client: &QueryClient, entry: &Arc<CacheEntry>| client.run_fetch(entry, &options));
            *entry.refetcher.lock() = Some(refetcher);
        }
        tracing::debug!(key = %entry.key, "fetch started");
        entry.notify();

        let mut attempt = 0;
        loop {
            let context = QueryFnContext {
                query_key: entry.key.clone(),
                attempt,
            };
            match query_fn(&context) {
                Fetch::Pending => return,
                Fetch::Ready(Ok(value)) => {
                    self.settle(entry, Ok(Arc::new(value)));
                    return;
                }
                Fetch::Ready(Err(error)) => {
                    if attempt >= options.retry {
                        self.settle(entry, Err(QueryError::from(error)));
                        return;
                    }
                    entry.state.lock().failure_count += 1;
                    tracing::debug!(key = %entry.key, attempt, "fetch failed, retrying");
                    attempt += 1;
                }
            }
        }
    }

    fn settle(&self, entry: &Arc<CacheEntry>, outcome: Result<ErasedData, QueryError>) {
        {
            let mut state = entry.state.lock();
            state.fetch_status = FetchStatus::Idle;
            match outcome {
                Ok(data) => {
                    state.data = Some(data);
                    state.error = None;
                    state.status = QueryStatus::Success;
                    state.data_updated_at = self.next_revision();
                    state.updated_at = Some(Instant::now());
                    state.failure_count = 0;
                    state.is_invalidated = false;
                }
                Err(error) => {
                    tracing::debug!(key = %entry.key, %error, "fetch failed");
                    state.error = Some(error);
                    state.status = QueryStatus::Error;
                    state.failure_count += 1;
                }
            }
        }
        entry.notify();
    }

    /// Refetch `entry` through an active observer, or with the options of its
    /// last fetch.
    fn refetch_entry(&self, entry: &Arc<CacheEntry>, active: bool) {
        if active {
            if let Some(observer) = entry.observers().into_iter().find(|o| o.is_active()) {
                if observer.fetch() {
                    return;
                }
            }
        }
        let refetcher = entry.refetcher.lock().clone();
        if let Some(refetcher) = refetcher {
            refetcher(self, entry);
        }
    }

    /// Cached data for `key`, if present and of type `T`.
    pub fn get_query_data<T: QueryData>(&self, key: &QueryKey) -> Option<Arc<T>> {
        self.existing(key)?.snapshot::<T>().data
    }

    /// Current snapshot for `key`.
    pub fn get_query_state<T: QueryData>(&self, key: &QueryKey) -> QueryResult<T> {
        match self.existing(key) {
            Some(entry) => entry.snapshot(),
            None => QueryResult::pending(key.clone()),
        }
    }

    /// Write data for `key` as if a fetch had succeeded. Settles a pending fetch.
    pub fn set_query_data<T: QueryData>(&self, key: &QueryKey, data: T) {
        let entry = self.entry(key);
        self.settle(&entry, Ok(Arc::new(data)));
    }

    /// Record a failed fetch for `key`. Settles a pending fetch.
    pub fn set_query_error(&self, key: &QueryKey, error: impl Into<anyhow::Error>) {
        let entry = self.entry(key);
        self.settle(&entry, Err(QueryError::from(error)));
    }

    /// Drop matching entries. Their observers keep their last state.
    pub fn remove_queries(&self, filters: QueryFilters) {
        let removed = self.matching(&filters);
        let mut entries = self.inner.entries.lock();
        for entry in &removed {
            entries.remove(&entry.key);
        }
        tracing::debug!(count = removed.len(), "queries removed");
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.inner.entries.lock().clear();
    }

    /// Refetch stale queries whose observers refetch on window focus.
    pub fn notify_focus(&self) {
        self.broadcast(ClientEvent::Focus);
    }

    /// Refetch stale queries whose observers refetch on reconnect.
    pub fn notify_reconnect(&self) {
        self.broadcast(ClientEvent::Reconnect);
    }

    fn broadcast(&self, event: ClientEvent) {
        let entries: Vec<_> = self.inner.entries.lock().values().cloned().collect();
        for entry in entries {
            for observer in entry.observers() {
                observer.on_event(event);
            }
        }
    }

    /// Number of subscribed observers for `key`.
    pub fn observer_count(&self, key: &QueryKey) -> usize {
        self.existing(key).map_or(0, |entry| entry.observers().len())
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for QueryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryClient")
            .field("entries", &self.len())
            .finish()
    }
}

impl CacheClient for QueryClient {
    type Observer<T: QueryData> = QueryObserver<T>;

    fn create_observer<T: QueryData>(&self, options: QueryOptions<T>) -> QueryObserver<T> {
        QueryObserver::new(self.clone(), options)
    }

    fn invalidate_queries(&self, filters: QueryFilters) {
        let matched = self.matching(&filters);
        tracing::debug!(count = matched.len(), "invalidating queries");
        for entry in &matched {
            entry.state.lock().is_invalidated = true;
            entry.notify();
        }
        for entry in &matched {
            let active = entry.is_active();
            if filters.params.refetch_type.includes(active) {
                self.refetch_entry(entry, active);
            }
        }
    }

    fn reset_queries(&self, filters: QueryFilters) {
        let matched = self.matching(&filters);
        tracing::debug!(count = matched.len(), "resetting queries");
        for entry in &matched {
            *entry.state.lock() = EntryState::default();
            entry.notify();
        }
        for entry in &matched {
            if entry.is_active() && filters.params.refetch_type.includes(true) {
                self.refetch_entry(entry, true);
            }
        }
    }

    fn fetch_query<T: QueryData>(&self, options: QueryOptions<T>) -> QueryResult<T> {
        let entry = self.entry(&options.query_key);
        let stale = entry.state.lock().is_stale(options.stale_time);
        if stale {
            self.run_fetch(&entry, &options);
        }
        entry.snapshot()
    }
}

/// Observer of one cache entry, created by [`QueryClient`].
pub struct QueryObserver<T> {
    inner: Arc<ObserverInner<T>>,
}

struct ObserverInner<T> {
    client: QueryClient,
    options: Mutex<QueryOptions<T>>,
    listeners: Mutex<Slab<ResultListener<T>>>,
    // Entry and slot this observer is registered in while it has listeners.
    registration: Mutex<Option<(Arc<CacheEntry>, usize)>>,
    this: Weak<ObserverInner<T>>,
}

impl<T: QueryData> QueryObserver<T> {
    fn new(client: QueryClient, options: QueryOptions<T>) -> Self {
        let inner = Arc::new_cyclic(|this| ObserverInner {
            client,
            options: Mutex::new(options),
            listeners: Mutex::new(Slab::new()),
            registration: Mutex::new(None),
            this: this.clone(),
        });
        Self { inner }
    }

    /// Number of listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }
}

impl<T: QueryData> ObserverInner<T> {
    fn register(&self, key: &QueryKey) {
        let entry = self.client.entry(key);
        let weak: Weak<dyn EntryObserver> = self.this.clone();
        let slot = entry.observers.lock().insert(weak);
        let previous = self.registration.lock().replace((entry, slot));
        if let Some((old, slot)) = previous {
            old.observers.lock().try_remove(slot);
        }
    }

    fn unregister(&self) {
        let registration = self.registration.lock().take();
        if let Some((entry, slot)) = registration {
            entry.observers.lock().try_remove(slot);
        }
    }

    fn entry(&self) -> Arc<CacheEntry> {
        let registered = self.registration.lock().as_ref().map(|(e, _)| e.clone());
        registered.unwrap_or_else(|| {
            let key = self.options.lock().query_key.clone();
            self.client.entry(&key)
        })
    }

    fn is_subscribed(&self) -> bool {
        self.registration.lock().is_some()
    }

    fn fetch_now(&self) -> bool {
        let options = self.options.lock().clone();
        if options.query_fn.is_none() {
            return false;
        }
        let entry = self.entry();
        self.client.run_fetch(&entry, &options);
        true
    }

    fn should_fetch_on_mount(&self, options: &QueryOptions<T>, entry: &CacheEntry) -> bool {
        if !options.enabled || options.query_fn.is_none() {
            return false;
        }
        let state = entry.state.lock();
        state.data.is_none() || (options.refetch_on_mount && state.is_stale(options.stale_time))
    }

    fn emit(&self) {
        let listeners: Vec<_> = self.listeners.lock().iter().map(|(_, l)| l.clone()).collect();
        if listeners.is_empty() {
            return;
        }
        let result = self.entry().snapshot::<T>();
        for listener in listeners {
            listener(&result);
        }
    }
}

impl<T: QueryData> EntryObserver for ObserverInner<T> {
    fn notify(&self) {
        self.emit();
    }

    fn is_active(&self) -> bool {
        self.is_subscribed() && self.options.lock().enabled
    }

    fn stale_time(&self) -> Duration {
        self.options.lock().stale_time
    }

    fn fetch(&self) -> bool {
        self.fetch_now()
    }

    fn on_event(&self, event: ClientEvent) {
        let options = self.options.lock().clone();
        let wanted = match event {
            ClientEvent::Focus => options.refetch_on_window_focus,
            ClientEvent::Reconnect => options.refetch_on_reconnect,
        };
        if !wanted || !self.is_active() {
            return;
        }
        let entry = self.entry();
        let stale = entry.state.lock().is_stale(options.stale_time);
        if stale {
            self.client.run_fetch(&entry, &options);
        }
    }
}

impl<T: QueryData> CacheObserver<T> for QueryObserver<T> {
    fn subscribe(&self, listener: ResultListener<T>) -> Unsubscribe {
        let (slot, first) = {
            let mut listeners = self.inner.listeners.lock();
            let first = listeners.is_empty();
            (listeners.insert(listener), first)
        };
        if first {
            let options = self.inner.options.lock().clone();
            self.inner.register(&options.query_key);
            let entry = self.inner.entry();
            if self.inner.should_fetch_on_mount(&options, &entry) {
                self.inner.client.run_fetch(&entry, &options);
            }
        }

        let weak = Arc::downgrade(&self.inner);
        Unsubscribe::new(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let now_empty = {
                let mut listeners = inner.listeners.lock();
                listeners.try_remove(slot);
                listeners.is_empty()
            };
            if now_empty {
                inner.unregister();
            }
        })
    }

    fn options(&self) -> QueryOptions<T> {
        self.inner.options.lock().clone()
    }

    fn update_options(&self, options: QueryOptions<T>) {
        let previous = std::mem::replace(&mut *self.inner.options.lock(), options.clone());
        if previous == options || !self.inner.is_subscribed() {
            return;
        }
        let key_changed = previous.query_key != options.query_key;
        if key_changed {
            self.inner.register(&options.query_key);
        }
        let entry = self.inner.entry();
        let stale = entry.state.lock().is_stale(options.stale_time);
        if options.enabled && options.query_fn.is_some() && stale && (!previous.enabled || key_changed) {
            self.inner.client.run_fetch(&entry, &options);
        } else if key_changed {
            self.inner.emit();
        }
    }

    fn current_result(&self) -> QueryResult<T> {
        self.inner.entry().snapshot()
    }

    fn refetch(&self) {
        let options = self.inner.options.lock().clone();
        let entry = self.inner.entry();
        self.inner.client.run_fetch(&entry, &options);
    }
}

impl<T> Drop for ObserverInner<T> {
    fn drop(&mut self) {
        if let Some((entry, slot)) = self.registration.get_mut().take() {
            entry.observers.lock().try_remove(slot);
        }
    }
}

impl<T> fmt::Debug for QueryObserver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryObserver")
            .field("options", &*self.inner.options.lock())
            .field("listeners", &self.inner.listeners.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{FilterParams, RefetchType};
    use crate::query_key;
    use std::sync::atomic::AtomicU32;

    fn counting(calls: &Arc<AtomicU32>, value: u32) -> QueryOptions<u32> {
        let calls = calls.clone();
        QueryOptions::new(query_key!["n"]).query_fn(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            Fetch::ok(value)
        })
    }

    fn collect(observer: &QueryObserver<u32>) -> (Arc<Mutex<Vec<QueryResult<u32>>>>, Unsubscribe) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let unsubscribe = observer.subscribe(Arc::new(move |r: &QueryResult<u32>| sink.lock().push(r.clone())));
        (seen, unsubscribe)
    }

    #[test]
    fn test_subscribe_fetches_and_emits() {
        let client = QueryClient::new();
        let calls = Arc::new(AtomicU32::new(0));
        let observer = client.create_observer(counting(&calls, 7));

        let (seen, _unsub) = collect(&observer);
        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].is_loading());
        assert_eq!(seen[1].data.as_deref(), Some(&7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(client.observer_count(&query_key!["n"]), 1);
    }

    #[test]
    fn test_disabled_observer_does_not_fetch() {
        let client = QueryClient::new();
        let calls = Arc::new(AtomicU32::new(0));
        let observer = client.create_observer(counting(&calls, 1).enabled(false));
        let (seen, _unsub) = collect(&observer);
        assert!(seen.lock().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        observer.update_options(counting(&calls, 1).enabled(true));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fresh_data_is_not_refetched_on_mount() {
        let client = QueryClient::new();
        let calls = Arc::new(AtomicU32::new(0));
        let options = counting(&calls, 1).stale_time(Duration::from_secs(60));
        let _ = client.fetch_query(options.clone());
        let observer = client.create_observer(options);
        let (_seen, _unsub) = collect(&observer);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_pending_fetch_is_deduplicated_and_settled() {
        let client = QueryClient::new();
        let calls = Arc::new(AtomicU32::new(0));
        let options: QueryOptions<u32> = {
            let calls = calls.clone();
            QueryOptions::new(query_key!["slow"]).query_fn(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                Fetch::Pending
            })
        };
        let first = client.fetch_query(options.clone());
        let second = client.fetch_query(options);
        assert!(first.is_fetching() && second.is_fetching());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        client.set_query_data(&query_key!["slow"], 9u32);
        assert_eq!(client.get_query_data::<u32>(&query_key!["slow"]).as_deref(), Some(&9));
    }

    #[test]
    fn test_fetch_without_query_fn_is_an_error() {
        let client = QueryClient::new();
        let result = client.fetch_query(QueryOptions::<u32>::new(query_key!["bare"]));
        assert!(result.is_error());
        assert!(matches!(
            &result.error,
            Some(QueryError::MissingQueryFn { key }) if *key == query_key!["bare"]
        ));

        let observer = client.create_observer(QueryOptions::<u32>::new(query_key!["bare", 2]));
        let (seen, _unsub) = collect(&observer);
        assert!(seen.lock().is_empty());
        observer.refetch();
        let seen = seen.lock();
        let last = seen.last().expect("refetch emits");
        assert_eq!(last.status, QueryStatus::Error);
        assert_eq!(last.error.as_ref().map(ToString::to_string).as_deref(), Some("missing query function for [\"bare\", 2]"));
    }

    #[test]
    fn test_retries_then_fails() {
        let client = QueryClient::new();
        let calls = Arc::new(AtomicU32::new(0));
        let options: QueryOptions<u32> = {
            let calls = calls.clone();
            QueryOptions::new(query_key!["bad"])
                .retry(2)
                .query_fn(move |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Fetch::err(anyhow::anyhow!("boom"))
                })
        };
        let result = client.fetch_query(options);
        assert!(result.is_error());
        assert_eq!(result.failure_count, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_invalidate_refetches_active_only_by_default() {
        let client = QueryClient::new();
        let calls = Arc::new(AtomicU32::new(0));
        let observer = client.create_observer(counting(&calls, 1));
        let (_seen, unsub) = collect(&observer);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        client.invalidate_queries(QueryFilters::all());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        unsub.unsubscribe();
        client.invalidate_queries(QueryFilters::all());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(client.get_query_state::<u32>(&query_key!["n"]).is_invalidated);

        client.invalidate_queries(QueryFilters {
            params: FilterParams::default().refetch_type(RefetchType::Inactive),
            ..QueryFilters::all()
        });
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_reset_returns_to_pending_and_refetches_active() {
        let client = QueryClient::new();
        let calls = Arc::new(AtomicU32::new(0));
        let observer = client.create_observer(counting(&calls, 4));
        let (seen, _unsub) = collect(&observer);

        client.reset_queries(QueryFilters::exact(query_key!["n"], FilterParams::default()));
        let seen = seen.lock();
        assert!(seen.iter().any(|r| r.is_pending() && r.data.is_none()));
        assert_eq!(seen.last().and_then(|r| r.data.as_deref()), Some(&4));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unsubscribe_unregisters() {
        let client = QueryClient::new();
        let calls = Arc::new(AtomicU32::new(0));
        let observer = client.create_observer(counting(&calls, 1));
        let (_seen, unsub) = collect(&observer);
        unsub.unsubscribe();
        assert_eq!(client.observer_count(&query_key!["n"]), 0);
        assert_eq!(observer.listener_count(), 0);
    }

    #[test]
    fn test_focus_refetches_stale_active_queries() {
        let client = QueryClient::new();
        let calls = Arc::new(AtomicU32::new(0));
        let observer = client.create_observer(counting(&calls, 1));
        let (_seen, _unsub) = collect(&observer);
        client.notify_focus();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        observer.update_options(counting(&calls, 1).stale_time(Duration::from_secs(60)));
        client.notify_reconnect();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}

//! Ownership of a query's single live cache subscription.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::engine::{CacheClient, CacheObserver, QueryData, ResultListener, Unsubscribe};
use crate::key::QueryKey;
use crate::options::QueryOptions;

/// Identifier of one subscription; `0` is never live.
pub(crate) type SubscriptionId = u64;

/// What [`SubscriptionManager::apply`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Applied {
    /// Options equal to the live ones.
    Unchanged,
    /// Live observer updated in place.
    Updated,
    /// First subscription made.
    Created,
    /// Old subscription torn down, new one made.
    Replaced,
    /// Torn down; nothing was done.
    Closed,
}

struct Live<T: QueryData, C: CacheClient> {
    id: SubscriptionId,
    observer: Arc<C::Observer<T>>,
    unsubscribe: Unsubscribe,
    options: QueryOptions<T>,
}

struct State<T: QueryData, C: CacheClient> {
    live: Option<Live<T, C>>,
    closed: bool,
}

pub(crate) struct SubscriptionManager<T: QueryData, C: CacheClient> {
    client: C,
    name: String,
    state: Mutex<State<T, C>>,
    live_id: AtomicU64,
    next_id: AtomicU64,
}

impl<T: QueryData, C: CacheClient> SubscriptionManager<T, C> {
    pub(crate) fn new(client: C, name: impl Into<String>) -> Self {
        Self {
            client,
            name: name.into(),
            state: Mutex::new(State {
                live: None,
                closed: false,
            }),
            live_id: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn client(&self) -> &C {
        &self.client
    }

    /// Make `options` the live configuration.
    ///
    /// `listener_for` builds the listener for a new subscription id. The id is
    /// live before the engine subscription is made, so emissions during
    /// `subscribe` are accepted.
    pub(crate) fn apply(
        &self,
        options: QueryOptions<T>,
        listener_for: impl FnOnce(SubscriptionId) -> ResultListener<T>,
    ) -> Applied {
        let mut state = self.state.lock();
        if state.closed {
            tracing::trace!(query = %self.name, "apply after teardown ignored");
            return Applied::Closed;
        }
        if let Some(live) = state.live.as_mut() {
            if live.options == options {
                return Applied::Unchanged;
            }
            if live.observer.can_update(&options) {
                live.options = options.clone();
                let observer = live.observer.clone();
                drop(state);
                tracing::debug!(query = %self.name, key = %options.query_key, enabled = options.enabled, "subscription updated");
                observer.update_options(options);
                return Applied::Updated;
            }
        }

        let previous = state.live.take();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.live_id.store(id, Ordering::Release);
        drop(state);

        let applied = match previous {
            Some(previous) => {
                previous.unsubscribe.unsubscribe();
                tracing::debug!(query = %self.name, key = %previous.options.query_key, "subscription torn down");
                Applied::Replaced
            }
            None => Applied::Created,
        };

        let key = options.query_key.clone();
        let observer = Arc::new(self.client.create_observer(options.clone()));
        let listener = listener_for(id);
        let unsubscribe = observer.subscribe(listener.clone());

        let mut state = self.state.lock();
        if state.closed || self.live_id.load(Ordering::Acquire) != id {
            drop(state);
            unsubscribe.unsubscribe();
            return Applied::Closed;
        }
        state.live = Some(Live {
            id,
            observer: observer.clone(),
            unsubscribe,
            options,
        });
        drop(state);
        tracing::debug!(query = %self.name, %key, id, "subscription created");

        // The new key's state is shown even when subscribing emitted nothing.
        listener(&observer.current_result());
        applied
    }

    /// Unsubscribe and refuse further `apply` calls. Returns false if already
    /// torn down.
    pub(crate) fn teardown(&self) -> bool {
        let live = {
            let mut state = self.state.lock();
            if state.closed {
                return false;
            }
            state.closed = true;
            self.live_id.store(0, Ordering::Release);
            state.live.take()
        };
        if let Some(live) = live {
            live.unsubscribe.unsubscribe();
            tracing::debug!(query = %self.name, key = %live.options.query_key, id = live.id, "subscription torn down");
        }
        true
    }

    /// Push `enabled = false` to the live observer, unless it is already
    /// disabled.
    pub(crate) fn deactivate(&self) {
        let update = {
            let mut state = self.state.lock();
            state.live.as_mut().filter(|live| live.options.enabled).map(|live| {
                live.options.enabled = false;
                (live.observer.clone(), live.options.clone())
            })
        };
        if let Some((observer, options)) = update {
            observer.update_options(options);
        }
    }

    pub(crate) fn is_live(&self, id: SubscriptionId) -> bool {
        id != 0 && self.live_id.load(Ordering::Acquire) == id
    }

    pub(crate) fn observer(&self) -> Option<Arc<C::Observer<T>>> {
        self.state.lock().live.as_ref().map(|live| live.observer.clone())
    }

    pub(crate) fn current_key(&self) -> Option<QueryKey> {
        self.state
            .lock()
            .live
            .as_ref()
            .map(|live| live.options.query_key.clone())
    }

    #[cfg(test)]
    pub(crate) fn current_options(&self) -> Option<QueryOptions<T>> {
        self.state.lock().live.as_ref().map(|live| live.options.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::QueryClient;
    use crate::engine::QueryResult;
    use crate::options::Fetch;
    use crate::query_key;

    fn manager() -> SubscriptionManager<u32, QueryClient> {
        SubscriptionManager::new(QueryClient::new(), "test")
    }

    fn options(key: QueryKey) -> QueryOptions<u32> {
        QueryOptions::new(key).query_fn(|ctx| Fetch::ok(ctx.query_key.len() as u32))
    }

    fn sink(seen: &Arc<Mutex<Vec<(SubscriptionId, QueryKey)>>>) -> impl FnOnce(SubscriptionId) -> ResultListener<u32> {
        let seen = seen.clone();
        move |id| Arc::new(move |r: &QueryResult<u32>| seen.lock().push((id, r.query_key.clone())))
    }

    #[test]
    fn test_apply_creates_updates_and_replaces() {
        let manager = manager();
        let client = manager.client().clone();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let first = options(query_key!["user", 1]);

        assert_eq!(manager.apply(first.clone(), sink(&seen)), Applied::Created);
        assert_eq!(manager.apply(first.clone(), sink(&seen)), Applied::Unchanged);
        assert_eq!(manager.apply(first.clone().enabled(false), sink(&seen)), Applied::Updated);
        assert_eq!(client.observer_count(&query_key!["user", 1]), 1);

        assert_eq!(manager.apply(options(query_key!["user", 2]), sink(&seen)), Applied::Replaced);
        assert_eq!(client.observer_count(&query_key!["user", 1]), 0);
        assert_eq!(client.observer_count(&query_key!["user", 2]), 1);
        assert_eq!(manager.current_key(), Some(query_key!["user", 2]));
    }

    #[test]
    fn test_stale_ids_are_not_live() {
        let manager = manager();
        let seen = Arc::new(Mutex::new(Vec::new()));
        manager.apply(options(query_key!["a"]), sink(&seen));
        manager.apply(options(query_key!["b"]), sink(&seen));

        let ids: Vec<_> = seen.lock().iter().map(|(id, _)| *id).collect();
        let first = ids[0];
        let last = *ids.last().unwrap();
        assert!(!manager.is_live(first));
        assert!(manager.is_live(last));
    }

    #[test]
    fn test_teardown_is_idempotent_and_final() {
        let manager = manager();
        let client = manager.client().clone();
        let seen = Arc::new(Mutex::new(Vec::new()));
        manager.apply(options(query_key!["a"]), sink(&seen));

        assert!(manager.teardown());
        assert!(!manager.teardown());
        assert_eq!(client.observer_count(&query_key!["a"]), 0);
        assert_eq!(manager.apply(options(query_key!["a"]), sink(&seen)), Applied::Closed);
        assert!(manager.observer().is_none());
    }

    #[test]
    fn test_deactivate_disables_live_observer() {
        let manager = manager();
        let seen = Arc::new(Mutex::new(Vec::new()));
        manager.apply(options(query_key!["a"]), sink(&seen));
        manager.deactivate();
        assert_eq!(manager.current_options().map(|o| o.enabled), Some(false));
        assert_eq!(manager.observer().map(|o| o.options().enabled), Some(false));
    }
}

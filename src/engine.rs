//! The seam between queries and the cache engine.
//!
//! A [`Query`](crate::Query) only talks to its cache through these traits, so
//! any engine that can hand out observers and accept filtered
//! invalidate/reset calls can back it. [`QueryClient`](crate::QueryClient) is
//! the in-memory implementation shipped with this crate.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::QueryError;
use crate::key::QueryKey;
use crate::options::QueryOptions;

/// Bounds for data stored in the cache.
pub trait QueryData: Send + Sync + 'static {}
impl<T: Send + Sync + 'static> QueryData for T {}

/// Whether a query has data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QueryStatus {
    /// No data and no error yet.
    #[default]
    Pending,
    /// The last fetch failed.
    Error,
    /// Data is available.
    Success,
}

/// Whether a fetch is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FetchStatus {
    /// A fetch is running.
    Fetching,
    /// Nothing is running.
    #[default]
    Idle,
}

/// Snapshot of a query's cache state, as emitted by an observer.
pub struct QueryResult<T> {
    /// Key the snapshot belongs to.
    pub query_key: QueryKey,
    /// Last successfully fetched data.
    pub data: Option<Arc<T>>,
    /// Error of the last failed fetch.
    pub error: Option<QueryError>,
    /// Data status.
    pub status: QueryStatus,
    /// Fetch status.
    pub fetch_status: FetchStatus,
    /// Revision at which `data` was last written; `0` when never.
    pub data_updated_at: u64,
    /// Failed attempts of the current or last fetch.
    pub failure_count: u32,
    /// Set by invalidation until the next successful fetch.
    pub is_invalidated: bool,
}

impl<T> QueryResult<T> {
    /// The state of a key nothing is known about yet.
    pub fn pending(query_key: QueryKey) -> Self {
        Self {
            query_key,
            data: None,
            error: None,
            status: QueryStatus::Pending,
            fetch_status: FetchStatus::Idle,
            data_updated_at: 0,
            failure_count: 0,
            is_invalidated: false,
        }
    }

    /// No data yet.
    pub fn is_pending(&self) -> bool {
        self.status == QueryStatus::Pending
    }

    /// Data is available.
    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }

    /// The last fetch failed.
    pub fn is_error(&self) -> bool {
        self.status == QueryStatus::Error
    }

    /// A fetch is running.
    pub fn is_fetching(&self) -> bool {
        self.fetch_status == FetchStatus::Fetching
    }

    /// First fetch is running.
    pub fn is_loading(&self) -> bool {
        self.is_pending() && self.is_fetching()
    }

    /// A background fetch is running while data or an error is shown.
    pub fn is_refetching(&self) -> bool {
        self.is_fetching() && !self.is_pending()
    }
}

impl<T> Clone for QueryResult<T> {
    fn clone(&self) -> Self {
        Self {
            query_key: self.query_key.clone(),
            data: self.data.clone(),
            error: self.error.clone(),
            status: self.status,
            fetch_status: self.fetch_status,
            data_updated_at: self.data_updated_at,
            failure_count: self.failure_count,
            is_invalidated: self.is_invalidated,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for QueryResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryResult")
            .field("query_key", &self.query_key)
            .field("data", &self.data)
            .field("error", &self.error)
            .field("status", &self.status)
            .field("fetch_status", &self.fetch_status)
            .field("data_updated_at", &self.data_updated_at)
            .field("failure_count", &self.failure_count)
            .field("is_invalidated", &self.is_invalidated)
            .finish()
    }
}

/// Callback receiving observer emissions.
pub type ResultListener<T> = Arc<dyn Fn(&QueryResult<T>) + Send + Sync>;

/// Removes a listener. Runs its cleanup at most once.
pub struct Unsubscribe {
    cleanup: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Unsubscribe {
    /// Wrap a cleanup function.
    pub fn new(cleanup: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cleanup: Mutex::new(Some(Box::new(cleanup))),
        }
    }

    /// A handle with nothing to clean up.
    pub fn noop() -> Self {
        Self {
            cleanup: Mutex::new(None),
        }
    }

    /// Run the cleanup. Returns false if it already ran.
    pub fn unsubscribe(&self) -> bool {
        let cleanup = self.cleanup.lock().take();
        match cleanup {
            Some(cleanup) => {
                cleanup();
                true
            }
            None => false,
        }
    }

    /// Returns true until the cleanup has run.
    pub fn is_active(&self) -> bool {
        self.cleanup.lock().is_some()
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Which queries a filter applies to, by observer activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryKind {
    /// Every query.
    #[default]
    All,
    /// Queries with at least one enabled, subscribed observer.
    Active,
    /// Queries without one.
    Inactive,
}

/// Which matched queries to refetch after invalidation or reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefetchType {
    /// Active queries only.
    #[default]
    Active,
    /// Inactive queries only.
    Inactive,
    /// All matched queries that have a query function.
    All,
    /// Nothing is refetched.
    None,
}

impl RefetchType {
    /// Whether a query with the given activity should be refetched.
    pub fn includes(self, active: bool) -> bool {
        match self {
            RefetchType::Active => active,
            RefetchType::Inactive => !active,
            RefetchType::All => true,
            RefetchType::None => false,
        }
    }
}

/// Custom key predicate for filters.
pub type KeyPredicate = Arc<dyn Fn(&QueryKey) -> bool + Send + Sync>;

/// Every filter field except the key and exactness.
///
/// A query instance fixes the key to its own; callers supply the rest.
#[derive(Clone, Default)]
pub struct FilterParams {
    /// Match by activity.
    pub kind: QueryKind,
    /// Match only stale (`Some(true)`) or only fresh (`Some(false)`) queries.
    pub stale: Option<bool>,
    /// Match by fetch status.
    pub fetch_status: Option<FetchStatus>,
    /// Extra key predicate.
    pub predicate: Option<KeyPredicate>,
    /// What to refetch afterwards.
    pub refetch_type: RefetchType,
}

/// Parameters for [`Query::invalidate`](crate::Query::invalidate).
pub type InvalidateParams = FilterParams;

/// Parameters for [`Query::reset`](crate::Query::reset).
pub type ResetParams = FilterParams;

impl FilterParams {
    /// Set `kind`.
    pub fn kind(mut self, kind: QueryKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set `stale`.
    pub fn stale(mut self, stale: bool) -> Self {
        self.stale = Some(stale);
        self
    }

    /// Set `fetch_status`.
    pub fn fetch_status(mut self, status: FetchStatus) -> Self {
        self.fetch_status = Some(status);
        self
    }

    /// Set `predicate`.
    pub fn predicate(mut self, predicate: impl Fn(&QueryKey) -> bool + Send + Sync + 'static) -> Self {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Set `refetch_type`.
    pub fn refetch_type(mut self, refetch_type: RefetchType) -> Self {
        self.refetch_type = refetch_type;
        self
    }
}

impl fmt::Debug for FilterParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterParams")
            .field("kind", &self.kind)
            .field("stale", &self.stale)
            .field("fetch_status", &self.fetch_status)
            .field("predicate", &self.predicate.as_ref().map(|_| "<fn>"))
            .field("refetch_type", &self.refetch_type)
            .finish()
    }
}

/// Selects cached queries for invalidate/reset.
#[derive(Debug, Clone, Default)]
pub struct QueryFilters {
    /// Key (prefix, unless `exact`) to match.
    pub query_key: Option<QueryKey>,
    /// Match the key exactly.
    pub exact: bool,
    /// Remaining filter fields.
    pub params: FilterParams,
}

impl QueryFilters {
    /// Match every query.
    pub fn all() -> Self {
        Self::default()
    }

    /// Match queries whose key starts with `prefix`.
    pub fn prefix(prefix: QueryKey) -> Self {
        Self {
            query_key: Some(prefix),
            ..Default::default()
        }
    }

    /// Match exactly `key`, with the remaining fields taken from `params`.
    pub fn exact(key: QueryKey, params: FilterParams) -> Self {
        Self {
            query_key: Some(key),
            exact: true,
            params,
        }
    }

    /// Key and predicate part of the match.
    pub fn matches_key(&self, key: &QueryKey) -> bool {
        let key_ok = match &self.query_key {
            None => true,
            Some(filter) if self.exact => filter == key,
            Some(filter) => key.starts_with(filter),
        };
        key_ok && self.params.predicate.as_ref().map_or(true, |p| p(key))
    }

    /// Full match given the state an engine knows about a query.
    pub fn matches(&self, key: &QueryKey, active: bool, stale: bool, fetch_status: FetchStatus) -> bool {
        let kind_ok = match self.params.kind {
            QueryKind::All => true,
            QueryKind::Active => active,
            QueryKind::Inactive => !active,
        };
        kind_ok
            && self.params.stale.map_or(true, |s| s == stale)
            && self.params.fetch_status.map_or(true, |s| s == fetch_status)
            && self.matches_key(key)
    }
}

/// A live view of one cache entry, configured by [`QueryOptions`].
pub trait CacheObserver<T: QueryData>: Send + Sync + 'static {
    /// Register a listener for result changes. Fetching may start as part of
    /// the first subscription.
    fn subscribe(&self, listener: ResultListener<T>) -> Unsubscribe;

    /// Current options.
    fn options(&self) -> QueryOptions<T>;

    /// Whether `options` can be applied in place with
    /// [`update_options`](Self::update_options). The default allows it when
    /// the key is unchanged.
    fn can_update(&self, options: &QueryOptions<T>) -> bool {
        self.options().query_key == options.query_key
    }

    /// Apply new options in place.
    fn update_options(&self, options: QueryOptions<T>);

    /// Current snapshot.
    fn current_result(&self) -> QueryResult<T>;

    /// Fetch now, regardless of staleness or `enabled`.
    fn refetch(&self);
}

/// A cache shared by many query instances.
pub trait CacheClient: Clone + Send + Sync + 'static {
    /// Observer type handed out by [`create_observer`](Self::create_observer).
    type Observer<T: QueryData>: CacheObserver<T>;

    /// Create an observer for `options`. Nothing is fetched until it is
    /// subscribed to.
    fn create_observer<T: QueryData>(&self, options: QueryOptions<T>) -> Self::Observer<T>;

    /// Mark matching queries stale and refetch per `filters.params.refetch_type`.
    fn invalidate_queries(&self, filters: QueryFilters);

    /// Reset matching queries to their initial state and refetch active ones.
    fn reset_queries(&self, filters: QueryFilters);

    /// Fetch `options.query_key` if stale and return the resulting snapshot.
    fn fetch_query<T: QueryData>(&self, options: QueryOptions<T>) -> QueryResult<T>;
}

//! Query options: the resolved set handed to the cache, and the partial sets
//! that are merged into it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::QueryError;
use crate::key::QueryKey;

/// Number of retries after a failed fetch when nothing else is configured.
pub const DEFAULT_RETRY: u32 = 3;

/// Function that loads the data for a query.
pub type QueryFn<T> = Arc<dyn Fn(&QueryFnContext) -> Fetch<T> + Send + Sync>;

/// Passed to a [`QueryFn`] on every attempt.
#[derive(Debug, Clone)]
pub struct QueryFnContext {
    /// Key being fetched.
    pub query_key: QueryKey,
    /// Zero-based attempt number; greater than zero on retries.
    pub attempt: u32,
}

/// Outcome of calling a query function.
///
/// `Pending` means the work continues elsewhere; it is settled later with
/// [`QueryClient::set_query_data`](crate::QueryClient::set_query_data) or
/// [`QueryClient::set_query_error`](crate::QueryClient::set_query_error).
pub enum Fetch<T> {
    /// The fetch finished.
    Ready(Result<T, anyhow::Error>),
    /// The fetch is still running.
    Pending,
}

impl<T> Fetch<T> {
    /// A successful fetch.
    pub fn ok(value: T) -> Self {
        Fetch::Ready(Ok(value))
    }

    /// A failed fetch.
    pub fn err(error: impl Into<anyhow::Error>) -> Self {
        Fetch::Ready(Err(error.into()))
    }

    /// Returns true if the fetch is still running.
    pub fn is_pending(&self) -> bool {
        matches!(self, Fetch::Pending)
    }
}

impl<T, E: Into<anyhow::Error>> From<Result<T, E>> for Fetch<T> {
    fn from(result: Result<T, E>) -> Self {
        Fetch::Ready(result.map_err(Into::into))
    }
}

impl<T> fmt::Debug for Fetch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fetch::Ready(Ok(_)) => write!(f, "Fetch::Ready(Ok(..))"),
            Fetch::Ready(Err(e)) => write!(f, "Fetch::Ready(Err({}))", e),
            Fetch::Pending => write!(f, "Fetch::Pending"),
        }
    }
}

/// Fully-defaulted options for one query.
pub struct QueryOptions<T> {
    /// Key identifying the cached dataset.
    pub query_key: QueryKey,
    /// Loader; a query without one can only show data put into the cache.
    pub query_fn: Option<QueryFn<T>>,
    /// Whether the observer may fetch on its own.
    pub enabled: bool,
    /// How long fetched data counts as fresh.
    pub stale_time: Duration,
    /// Immediate retries after a failed attempt.
    pub retry: u32,
    /// Refetch stale data when an observer subscribes.
    pub refetch_on_mount: bool,
    /// Refetch stale data on [`QueryClient::notify_focus`](crate::QueryClient::notify_focus).
    pub refetch_on_window_focus: bool,
    /// Refetch stale data on [`QueryClient::notify_reconnect`](crate::QueryClient::notify_reconnect).
    pub refetch_on_reconnect: bool,
}

impl<T> QueryOptions<T> {
    /// Options for `query_key` with every other field defaulted.
    pub fn new(query_key: QueryKey) -> Self {
        Self {
            query_key,
            query_fn: None,
            enabled: true,
            stale_time: Duration::ZERO,
            retry: DEFAULT_RETRY,
            refetch_on_mount: true,
            refetch_on_window_focus: true,
            refetch_on_reconnect: true,
        }
    }

    /// Set the query function.
    pub fn query_fn(mut self, f: impl Fn(&QueryFnContext) -> Fetch<T> + Send + Sync + 'static) -> Self {
        self.query_fn = Some(Arc::new(f));
        self
    }

    /// Set `enabled`.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set `stale_time`.
    pub fn stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = stale_time;
        self
    }

    /// Set `retry`.
    pub fn retry(mut self, retry: u32) -> Self {
        self.retry = retry;
        self
    }

    /// Resolve a full option set from partial options. Fails when no key is set.
    pub fn from_update(update: &QueryUpdate<T>) -> Result<Self, QueryError> {
        let key = update
            .options
            .query_key
            .clone()
            .ok_or(QueryError::MissingQueryKey)?;
        Ok(Self::new(key).with_update(update))
    }

    /// These options with the fields set in `update` overridden.
    #[must_use]
    pub fn with_update(&self, update: &QueryUpdate<T>) -> Self {
        let mut merged = self.with_dynamic(&update.options);
        if let Some(query_fn) = &update.query_fn {
            merged.query_fn = Some(query_fn.clone());
        }
        merged
    }

    /// These options with the fields set in `dynamic` overridden.
    #[must_use]
    pub fn with_dynamic(&self, dynamic: &DynamicOptions) -> Self {
        Self {
            query_key: dynamic
                .query_key
                .clone()
                .unwrap_or_else(|| self.query_key.clone()),
            query_fn: self.query_fn.clone(),
            enabled: dynamic.enabled.unwrap_or(self.enabled),
            stale_time: dynamic.stale_time.unwrap_or(self.stale_time),
            retry: dynamic.retry.unwrap_or(self.retry),
            refetch_on_mount: dynamic.refetch_on_mount.unwrap_or(self.refetch_on_mount),
            refetch_on_window_focus: dynamic
                .refetch_on_window_focus
                .unwrap_or(self.refetch_on_window_focus),
            refetch_on_reconnect: dynamic
                .refetch_on_reconnect
                .unwrap_or(self.refetch_on_reconnect),
        }
    }
}

fn same_fn<T>(a: &Option<QueryFn<T>>, b: &Option<QueryFn<T>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

impl<T> Clone for QueryOptions<T> {
    fn clone(&self) -> Self {
        Self {
            query_key: self.query_key.clone(),
            query_fn: self.query_fn.clone(),
            enabled: self.enabled,
            stale_time: self.stale_time,
            retry: self.retry,
            refetch_on_mount: self.refetch_on_mount,
            refetch_on_window_focus: self.refetch_on_window_focus,
            refetch_on_reconnect: self.refetch_on_reconnect,
        }
    }
}

/// Query functions compare by identity, everything else by value.
impl<T> PartialEq for QueryOptions<T> {
    fn eq(&self, other: &Self) -> bool {
        self.query_key == other.query_key
            && same_fn(&self.query_fn, &other.query_fn)
            && self.enabled == other.enabled
            && self.stale_time == other.stale_time
            && self.retry == other.retry
            && self.refetch_on_mount == other.refetch_on_mount
            && self.refetch_on_window_focus == other.refetch_on_window_focus
            && self.refetch_on_reconnect == other.refetch_on_reconnect
    }
}

impl<T> fmt::Debug for QueryOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryOptions")
            .field("query_key", &self.query_key)
            .field("query_fn", &self.query_fn.as_ref().map(|_| "<fn>"))
            .field("enabled", &self.enabled)
            .field("stale_time", &self.stale_time)
            .field("retry", &self.retry)
            .field("refetch_on_mount", &self.refetch_on_mount)
            .field("refetch_on_window_focus", &self.refetch_on_window_focus)
            .field("refetch_on_reconnect", &self.refetch_on_reconnect)
            .finish()
    }
}

/// Partial options without a query function, as returned by a query's
/// dynamic `options` callback. Unset fields keep their static value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DynamicOptions {
    /// Overrides the key.
    pub query_key: Option<QueryKey>,
    /// Overrides `enabled`.
    pub enabled: Option<bool>,
    /// Overrides `stale_time`.
    pub stale_time: Option<Duration>,
    /// Overrides `retry`.
    pub retry: Option<u32>,
    /// Overrides `refetch_on_mount`.
    pub refetch_on_mount: Option<bool>,
    /// Overrides `refetch_on_window_focus`.
    pub refetch_on_window_focus: Option<bool>,
    /// Overrides `refetch_on_reconnect`.
    pub refetch_on_reconnect: Option<bool>,
}

impl DynamicOptions {
    /// Set the key.
    pub fn query_key(mut self, key: QueryKey) -> Self {
        self.query_key = Some(key);
        self
    }

    /// Set `enabled`.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    /// Set `stale_time`.
    pub fn stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = Some(stale_time);
        self
    }

    /// Set `retry`.
    pub fn retry(mut self, retry: u32) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Set `refetch_on_mount`.
    pub fn refetch_on_mount(mut self, refetch: bool) -> Self {
        self.refetch_on_mount = Some(refetch);
        self
    }

    /// Set `refetch_on_window_focus`.
    pub fn refetch_on_window_focus(mut self, refetch: bool) -> Self {
        self.refetch_on_window_focus = Some(refetch);
        self
    }

    /// Set `refetch_on_reconnect`.
    pub fn refetch_on_reconnect(mut self, refetch: bool) -> Self {
        self.refetch_on_reconnect = Some(refetch);
        self
    }

    /// Overlay `other` on top of these options.
    pub fn merge(&mut self, other: &DynamicOptions) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if other.$field.is_some() { self.$field = other.$field.clone(); })*
            };
        }
        take!(
            query_key,
            enabled,
            stale_time,
            retry,
            refetch_on_mount,
            refetch_on_window_focus,
            refetch_on_reconnect
        );
    }
}

/// Partial options including the query function, used for static
/// configuration and for [`Query::set_options`](crate::Query::set_options).
pub struct QueryUpdate<T> {
    /// Replaces the query function.
    pub query_fn: Option<QueryFn<T>>,
    /// Every other field.
    pub options: DynamicOptions,
}

impl<T> QueryUpdate<T> {
    /// An update that changes nothing.
    pub fn new() -> Self {
        Self {
            query_fn: None,
            options: DynamicOptions::default(),
        }
    }

    /// Set the query function.
    pub fn query_fn(mut self, f: impl Fn(&QueryFnContext) -> Fetch<T> + Send + Sync + 'static) -> Self {
        self.query_fn = Some(Arc::new(f));
        self
    }

    /// Set the key.
    pub fn query_key(mut self, key: QueryKey) -> Self {
        self.options.query_key = Some(key);
        self
    }

    /// Set `enabled`.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.options.enabled = Some(enabled);
        self
    }

    /// Set `stale_time`.
    pub fn stale_time(mut self, stale_time: Duration) -> Self {
        self.options.stale_time = Some(stale_time);
        self
    }

    /// Set `retry`.
    pub fn retry(mut self, retry: u32) -> Self {
        self.options.retry = Some(retry);
        self
    }

    /// Overlay `other` on top of this update.
    pub fn merge(&mut self, other: &QueryUpdate<T>) {
        if let Some(query_fn) = &other.query_fn {
            self.query_fn = Some(query_fn.clone());
        }
        self.options.merge(&other.options);
    }
}

impl<T> Default for QueryUpdate<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for QueryUpdate<T> {
    fn clone(&self) -> Self {
        Self {
            query_fn: self.query_fn.clone(),
            options: self.options.clone(),
        }
    }
}

impl<T> PartialEq for QueryUpdate<T> {
    fn eq(&self, other: &Self) -> bool {
        same_fn(&self.query_fn, &other.query_fn) && self.options == other.options
    }
}

impl<T> fmt::Debug for QueryUpdate<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryUpdate")
            .field("query_fn", &self.query_fn.as_ref().map(|_| "<fn>"))
            .field("options", &self.options)
            .finish()
    }
}

impl<T> From<DynamicOptions> for QueryUpdate<T> {
    fn from(options: DynamicOptions) -> Self {
        Self {
            query_fn: None,
            options,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_key;

    #[test]
    fn test_dynamic_fields_override_static_ones() {
        let base: QueryOptions<u32> = QueryOptions::new(query_key!["a"]).retry(1);
        let merged = base.with_dynamic(
            &DynamicOptions::default()
                .query_key(query_key!["b"])
                .enabled(false),
        );
        assert_eq!(merged.query_key, query_key!["b"]);
        assert!(!merged.enabled);
        assert_eq!(merged.retry, 1);
    }

    #[test]
    fn test_equality_uses_query_fn_identity() {
        let base: QueryOptions<u32> = QueryOptions::new(query_key!["a"]).query_fn(|_| Fetch::ok(1));
        assert_eq!(base, base.clone());

        let other = QueryOptions::new(query_key!["a"]).query_fn(|_| Fetch::ok(1));
        assert_ne!(base, other);
    }

    #[test]
    fn test_from_update_requires_key() {
        let update: QueryUpdate<u32> = QueryUpdate::new().enabled(false);
        assert!(matches!(
            QueryOptions::from_update(&update),
            Err(QueryError::MissingQueryKey)
        ));

        let update = update.query_key(query_key!["x"]);
        let options = QueryOptions::from_update(&update).unwrap();
        assert!(!options.enabled);
        assert_eq!(options.retry, DEFAULT_RETRY);
    }

    #[test]
    fn test_update_merge_keeps_unset_fields() {
        let mut update: QueryUpdate<u32> = QueryUpdate::new().retry(2).enabled(false);
        update.merge(&QueryUpdate::new().enabled(true));
        assert_eq!(update.options.retry, Some(2));
        assert_eq!(update.options.enabled, Some(true));
    }
}

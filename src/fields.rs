//! Observable copies of the latest cache result.

use std::sync::Arc;

use crate::engine::{FetchStatus, QueryData, QueryResult, QueryStatus};
use crate::error::QueryError;
use crate::key::QueryKey;
use crate::reactive::{comparer, transaction, Observable};

fn same_error(a: &Option<QueryError>, b: &Option<QueryError>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.same(b),
        (None, None) => true,
        _ => false,
    }
}

pub(crate) struct ResultFields<T> {
    pub(crate) query_key: Observable<Option<QueryKey>>,
    pub(crate) data: Observable<Option<Arc<T>>>,
    pub(crate) error: Observable<Option<QueryError>>,
    pub(crate) status: Observable<QueryStatus>,
    pub(crate) fetch_status: Observable<FetchStatus>,
    pub(crate) data_updated_at: Observable<u64>,
    pub(crate) failure_count: Observable<u32>,
    pub(crate) is_invalidated: Observable<bool>,
}

impl<T: QueryData> ResultFields<T> {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            query_key: Observable::named(format!("{name}.query_key"), None, comparer::default),
            data: Observable::named(format!("{name}.data"), None, comparer::option_identity),
            error: Observable::named(format!("{name}.error"), None, same_error),
            status: Observable::named(format!("{name}.status"), QueryStatus::Pending, comparer::default),
            fetch_status: Observable::named(format!("{name}.fetch_status"), FetchStatus::Idle, comparer::default),
            data_updated_at: Observable::named(format!("{name}.data_updated_at"), 0, comparer::default),
            failure_count: Observable::named(format!("{name}.failure_count"), 0, comparer::default),
            is_invalidated: Observable::named(format!("{name}.is_invalidated"), false, comparer::default),
        }
    }

    /// Write every field in one transaction. Returns whether anything changed.
    pub(crate) fn write(&self, result: &QueryResult<T>) -> bool {
        transaction(|| {
            let mut changed = false;
            changed |= self.query_key.set(Some(result.query_key.clone()));
            changed |= self.data.set(result.data.clone());
            changed |= self.error.set(result.error.clone());
            changed |= self.status.set(result.status);
            changed |= self.fetch_status.set(result.fetch_status);
            changed |= self.data_updated_at.set(result.data_updated_at);
            changed |= self.failure_count.set(result.failure_count);
            changed |= self.is_invalidated.set(result.is_invalidated);
            changed
        })
    }

    /// Tracked read of every field. `None` before the first emission.
    pub(crate) fn snapshot(&self) -> Option<QueryResult<T>> {
        let query_key = self.query_key.get()?;
        Some(QueryResult {
            query_key,
            data: self.data.get(),
            error: self.error.get(),
            status: self.status.get(),
            fetch_status: self.fetch_status.get(),
            data_updated_at: self.data_updated_at.get(),
            failure_count: self.failure_count.get(),
            is_invalidated: self.is_invalidated.get(),
        })
    }
}

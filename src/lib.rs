//! Reactive-Query: query-cache observers bound to a reactive state graph.
//!
//! A [`Query`] derives its options (key, enablement, fetch behavior) from
//! observable inputs and keeps a single cache subscription in sync with them.
//! Whatever the cache emits is written to observable fields, so results can be
//! read from computed values and reactions like any other state.
//!
//! # Key Features
//!
//! - **Reactive options**: key functions and dynamic options are re-evaluated
//!   when the observables they read change
//! - **One live subscription**: a key change tears the old subscription down
//!   before the new one is made; emissions from old subscriptions are dropped
//! - **On-demand fetching**: with `enable_on_demand`, nothing is fetched until
//!   a result field is read
//! - **Lifecycle controls**: invalidate, reset, refetch, start, set_options and
//!   idempotent dispose, also triggered by abort signals
//! - **Bundled engines**: an in-memory [`QueryClient`] and the [`reactive`]
//!   graph, both behind traits
//!
//! # Example
//!
//! ```
//! use reactive_query::reactive::Observable;
//! use reactive_query::{query_key, Fetch, Query, QueryClient};
//!
//! let client = QueryClient::new();
//! let user_id = Observable::new(1u32);
//!
//! let user: Query<String> = {
//!     let user_id = user_id.clone();
//!     Query::builder(client)
//!         .query_key_fn(move || Ok(query_key!["user", user_id.get()]))
//!         .query_fn(|ctx| Fetch::ok(format!("user for {}", ctx.query_key)))
//!         .build()
//! };
//! assert_eq!(user.data().as_deref().map(String::as_str), Some("user for [\"user\", 1]"));
//!
//! user_id.set(2);
//! assert_eq!(user.query_key(), Some(query_key!["user", 2u32]));
//! assert_eq!(user.data().as_deref().map(String::as_str), Some("user for [\"user\", 2]"));
//! ```

#![warn(missing_docs)]

mod bridge;
mod cancel;
mod client;
mod config;
mod demand;
mod engine;
mod error;
mod fields;
mod key;
mod options;
mod query;
pub mod reactive;
mod resolver;
mod subscription;

pub use cancel::{CancellationToken, Disposer, Registration};
pub use client::{QueryClient, QueryObserver};
pub use config::QueryConfig;
pub use demand::should_enable;
pub use engine::{
    CacheClient, CacheObserver, FetchStatus, FilterParams, InvalidateParams, KeyPredicate,
    QueryData, QueryFilters, QueryKind, QueryResult, QueryStatus, RefetchType, ResetParams,
    ResultListener, Unsubscribe,
};
pub use error::{QueryError, ReactiveError};
pub use key::{KeySegment, QueryKey};
pub use options::{DynamicOptions, Fetch, QueryFn, QueryFnContext, QueryOptions, QueryUpdate, DEFAULT_RETRY};
pub use query::{DoneHook, ErrorHook, InitHook, Query};
pub use resolver::{KeyFn, OptionsFn};

//! Error types for queries and the reactive graph.

use std::fmt;
use std::sync::Arc;

use crate::key::QueryKey;

/// Errors surfaced on a query's `error` field.
///
/// User errors can be propagated from a query function using the `?` operator,
/// which converts any `Into<anyhow::Error>` type into `QueryError::Fetch`.
#[derive(Debug, Clone)]
pub enum QueryError {
    /// The query function failed (after the configured retries).
    Fetch(Arc<anyhow::Error>),

    /// A fetch was requested for a query that has no query function.
    MissingQueryFn {
        /// Key of the query that could not be fetched.
        key: QueryKey,
    },

    /// Options were resolved without a query key.
    MissingQueryKey,
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::Fetch(e) => write!(f, "fetch failed: {}", e),
            QueryError::MissingQueryFn { key } => {
                write!(f, "missing query function for {}", key)
            }
            QueryError::MissingQueryKey => write!(f, "query key is not set"),
        }
    }
}

impl<T: Into<anyhow::Error>> From<T> for QueryError {
    fn from(err: T) -> Self {
        QueryError::Fetch(Arc::new(err.into()))
    }
}

impl QueryError {
    /// Returns a reference to the inner user error if this is a `Fetch` variant.
    pub fn fetch_error(&self) -> Option<&Arc<anyhow::Error>> {
        match self {
            QueryError::Fetch(e) => Some(e),
            _ => None,
        }
    }

    /// Attempts to downcast the fetch error to a specific type.
    pub fn downcast_ref<E: std::error::Error + Send + Sync + 'static>(&self) -> Option<&E> {
        self.fetch_error().and_then(|e| e.downcast_ref::<E>())
    }

    /// Returns `true` if this is a `Fetch` error containing an error of type `E`.
    pub fn is<E: std::error::Error + Send + Sync + 'static>(&self) -> bool {
        self.downcast_ref::<E>().is_some()
    }

    /// Identity comparison used for observable change detection.
    ///
    /// Two errors are the same if they share the same allocation; otherwise they
    /// compare structurally on the non-fetch variants.
    pub fn same(&self, other: &QueryError) -> bool {
        match (self, other) {
            (QueryError::Fetch(a), QueryError::Fetch(b)) => Arc::ptr_eq(a, b),
            (QueryError::MissingQueryFn { key: a }, QueryError::MissingQueryFn { key: b }) => {
                a == b
            }
            (QueryError::MissingQueryKey, QueryError::MissingQueryKey) => true,
            _ => false,
        }
    }
}

/// Failures reported by the reactive engine.
///
/// These never reach a query's `error` field. They are routed to the handler
/// installed with [`set_error_handler`](crate::reactive::set_error_handler).
#[derive(Debug, Clone, thiserror::Error)]
pub enum ReactiveError {
    /// A derivation function returned an error.
    #[error("derivation `{name}` failed: {error}")]
    Derivation {
        /// Name of the failing derivation.
        name: String,
        /// Error returned by the derivation function.
        error: Arc<anyhow::Error>,
    },

    /// A computed value read itself while being evaluated.
    #[error("cycle detected while evaluating `{name}`")]
    Cycle {
        /// Name of the computed value.
        name: String,
    },

    /// Reactions kept re-triggering each other.
    #[error("reaction `{name}` did not settle after {iterations} runs")]
    ReactionLoop {
        /// Name of the reaction that was running when the limit was hit.
        name: String,
        /// Number of reaction runs in the drain.
        iterations: usize,
    },
}

impl ReactiveError {
    /// Name of the derivation or reaction the error originated from.
    pub fn name(&self) -> &str {
        match self {
            ReactiveError::Derivation { name, .. }
            | ReactiveError::Cycle { name }
            | ReactiveError::ReactionLoop { name, .. } => name,
        }
    }

    pub(crate) fn derivation(name: &str, error: anyhow::Error) -> Self {
        // Errors that already went through a derivation keep their origin.
        match error.downcast::<ReactiveError>() {
            Ok(inner) => inner,
            Err(error) => ReactiveError::Derivation {
                name: name.to_string(),
                error: Arc::new(error),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct NotFound;

    impl fmt::Display for NotFound {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "not found")
        }
    }

    impl std::error::Error for NotFound {}

    #[test]
    fn test_fetch_error_from_custom_error() {
        let err: QueryError = NotFound.into();
        assert!(err.is::<NotFound>());
        assert_eq!(err.to_string(), "fetch failed: not found");
    }

    #[test]
    fn test_same_uses_identity_for_fetch_errors() {
        let a: QueryError = anyhow::anyhow!("boom").into();
        let b: QueryError = anyhow::anyhow!("boom").into();
        assert!(a.same(&a.clone()));
        assert!(!a.same(&b));
        assert!(QueryError::MissingQueryKey.same(&QueryError::MissingQueryKey));
    }

    #[test]
    fn test_derivation_keeps_inner_reactive_error() {
        let cycle = ReactiveError::Cycle {
            name: "options".into(),
        };
        let wrapped = ReactiveError::derivation("reaction", anyhow::Error::new(cycle));
        assert!(matches!(wrapped, ReactiveError::Cycle { ref name } if name == "options"));

        let plain = ReactiveError::derivation("reaction", anyhow::anyhow!("bad key"));
        assert_eq!(plain.name(), "reaction");
        assert!(plain.to_string().contains("bad key"));
    }
}

//! Resolution of a query's effective options.

use std::sync::Arc;

use crate::demand::DemandGate;
use crate::key::QueryKey;
use crate::options::{DynamicOptions, QueryOptions, QueryUpdate};

/// Reactive key function. Every observable it reads becomes a dependency of
/// the query's options.
pub type KeyFn = Arc<dyn Fn() -> anyhow::Result<QueryKey> + Send + Sync>;

/// Dynamic options callback, given the query it configures.
pub type OptionsFn<Q> = Arc<dyn Fn(&Q) -> anyhow::Result<DynamicOptions> + Send + Sync>;

/// Compute fully-defaulted options.
///
/// Precedence, lowest first: defaults, `base` (static configuration and
/// `set_options` updates), the key function, the dynamic options. The
/// resulting `enabled` then goes through the demand gate.
pub(crate) fn resolve<T, Q>(
    base: &QueryUpdate<T>,
    key_fn: Option<&KeyFn>,
    options_fn: Option<&OptionsFn<Q>>,
    query: &Q,
    gate: &DemandGate,
) -> anyhow::Result<QueryOptions<T>> {
    let mut update = base.clone();
    if let Some(key_fn) = key_fn {
        update.options.query_key = Some(key_fn()?);
    }
    if let Some(options_fn) = options_fn {
        update.options.merge(&options_fn(query)?);
    }
    let mut options = QueryOptions::from_update(&update).map_err(anyhow::Error::msg)?;
    options.enabled = gate.enabled(options.enabled);
    Ok(options)
}

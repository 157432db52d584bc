//! Demand tracking for queries that fetch only once their result is read.

use crate::reactive::{untracked, Observable};

/// Whether a query may fetch, given the user's `enabled` flag and demand.
pub fn should_enable(user_enabled: bool, demand_observed: bool, enable_on_demand: bool) -> bool {
    if enable_on_demand {
        user_enabled && demand_observed
    } else {
        user_enabled
    }
}

/// Records the first read of a query's result fields.
#[derive(Debug, Clone)]
pub(crate) struct DemandGate {
    enable_on_demand: bool,
    observed: Observable<bool>,
}

impl DemandGate {
    pub(crate) fn new(enable_on_demand: bool) -> Self {
        Self {
            enable_on_demand,
            observed: Observable::named("demand", false, crate::reactive::comparer::default),
        }
    }

    pub(crate) fn enable_on_demand(&self) -> bool {
        self.enable_on_demand
    }

    /// Effective `enabled`. Reads demand as a dependency only when the flag
    /// is set, so plain queries never re-resolve on demand changes.
    pub(crate) fn enabled(&self, user_enabled: bool) -> bool {
        if !self.enable_on_demand {
            return user_enabled;
        }
        should_enable(user_enabled, self.observed.get(), true)
    }

    /// Called on every read of a result field.
    pub(crate) fn mark_observed(&self) {
        if !self.enable_on_demand || self.observed.get_untracked() {
            return;
        }
        untracked(|| self.observed.set(true));
        tracing::debug!("query result observed, enabling on demand");
    }

    #[cfg(test)]
    pub(crate) fn is_observed(&self) -> bool {
        self.observed.get_untracked()
    }

    /// Forget demand. A no-op unless fetching on demand.
    pub(crate) fn reset(&self) {
        if self.enable_on_demand {
            self.observed.set(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_enable_table() {
        assert!(should_enable(true, false, false));
        assert!(!should_enable(false, true, false));
        assert!(!should_enable(true, false, true));
        assert!(should_enable(true, true, true));
        assert!(!should_enable(false, true, true));
    }

    #[test]
    fn test_gate_without_flag_ignores_demand() {
        let gate = DemandGate::new(false);
        assert!(gate.enabled(true));
        gate.mark_observed();
        assert!(!gate.is_observed());
    }

    #[test]
    fn test_gate_flips_once_and_resets() {
        let gate = DemandGate::new(true);
        assert!(!gate.enabled(true));
        gate.mark_observed();
        gate.mark_observed();
        assert!(gate.enabled(true));
        gate.reset();
        assert!(!gate.enabled(true));
    }
}

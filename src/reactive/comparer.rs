//! Equality functions deciding whether a new value is a change.
//!
//! Observables, computed values and reactions take one of these as their
//! comparer. A comparer returning `true` means "unchanged": observers are not
//! notified and reaction effects do not run.

use std::sync::Arc;

/// Comparer signature.
pub type Comparer<T> = fn(&T, &T) -> bool;

/// Compare by `PartialEq`.
pub fn default<T: PartialEq>(a: &T, b: &T) -> bool {
    a == b
}

/// Compare shared values by allocation identity.
pub fn identity<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    Arc::ptr_eq(a, b)
}

/// Compare optional shared values by allocation identity.
///
/// Used for query data: a refetch producing a new allocation is a change even
/// when the payload happens to be equal.
pub fn option_identity<T: ?Sized>(a: &Option<Arc<T>>, b: &Option<Arc<T>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

/// Compare optional shared values by their contents.
pub fn structural<T: PartialEq + ?Sized>(a: &Option<Arc<T>>, b: &Option<Arc<T>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b) || **a == **b,
        (None, None) => true,
        _ => false,
    }
}

/// Treat every write as a change.
pub fn always_changed<T>(_: &T, _: &T) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_identity_vs_structural() {
        let a = Some(Arc::new(5));
        let b = Some(Arc::new(5));
        assert!(option_identity(&a, &a.clone()));
        assert!(!option_identity(&a, &b));
        assert!(structural(&a, &b));
        assert!(!structural(&a, &None));
        assert!(option_identity::<i32>(&None, &None));
    }
}

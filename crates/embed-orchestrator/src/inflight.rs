//! In-flight de-duplication set.
//!
//! Tracks content hashes currently being embedded so a second concurrent
//! request for the identical text is skipped instead of duplicating
//! provider spend. Claims release on `Drop`, so the hash is freed on every
//! exit path, including errors and panics.

use std::sync::Arc;

use dashmap::DashMap;

/// Set of content hashes with generation currently in flight.
///
/// Instance-owned (injectable), never a process-wide static, so independent
/// orchestrator instances do not cross-contaminate.
#[derive(Debug, Default, Clone)]
pub struct InFlightSet {
    inner: Arc<DashMap<String, ()>>,
}

impl InFlightSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a hash. Returns None when it is already in flight.
    pub fn claim(&self, key: &str) -> Option<InFlightClaim> {
        use dashmap::mapref::entry::Entry;

        match self.inner.entry(key.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(InFlightClaim {
                    set: self.inner.clone(),
                    key: key.to_string(),
                })
            }
        }
    }

    /// Whether a hash is currently claimed.
    pub fn contains(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    /// Number of claims currently held.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// A held claim; dropping it releases the hash.
#[derive(Debug)]
pub struct InFlightClaim {
    set: Arc<DashMap<String, ()>>,
    key: String,
}

impl Drop for InFlightClaim {
    fn drop(&mut self) {
        self.set.remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_then_release() {
        let set = InFlightSet::new();
        {
            let _claim = set.claim("abc").unwrap();
            assert!(set.contains("abc"));
            assert_eq!(set.len(), 1);
        }
        assert!(!set.contains("abc"));
        assert!(set.is_empty());
    }

    #[test]
    fn test_double_claim_rejected() {
        let set = InFlightSet::new();
        let _claim = set.claim("abc").unwrap();
        assert!(set.claim("abc").is_none());
    }

    #[test]
    fn test_released_on_panic() {
        let set = InFlightSet::new();
        let set_clone = set.clone();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _claim = set_clone.claim("abc").unwrap();
            panic!("mid-call crash");
        }));

        assert!(result.is_err());
        assert!(!set.contains("abc"));
    }

    #[test]
    fn test_distinct_keys_coexist() {
        let set = InFlightSet::new();
        let _a = set.claim("a").unwrap();
        let _b = set.claim("b").unwrap();
        assert_eq!(set.len(), 2);
    }
}

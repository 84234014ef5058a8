//! Partial-failure accounting for batch embedding calls.

use std::collections::BTreeMap;

use crate::embedding::Embedding;

/// Outcome of a batch call where items can succeed and fail independently.
///
/// Every input position ends up in exactly one of the two maps; the batch
/// is never collapsed to a single success/failure verdict.
#[derive(Debug, Default, Clone)]
pub struct BatchOutcome {
    /// Position in the original input -> generated embedding
    pub successful: BTreeMap<usize, Embedding>,
    /// Position in the original input -> failure reason
    pub failed: BTreeMap<usize, String>,
}

impl BatchOutcome {
    /// Record a successful embedding for an input position.
    ///
    /// A success supersedes an earlier failure for the same position
    /// (the last successful attempt is authoritative).
    pub fn record_success(&mut self, position: usize, embedding: Embedding) {
        self.failed.remove(&position);
        self.successful.insert(position, embedding);
    }

    /// Record a failure for an input position unless it already succeeded.
    pub fn record_failure(&mut self, position: usize, reason: impl Into<String>) {
        if !self.successful.contains_key(&position) {
            self.failed.insert(position, reason.into());
        }
    }

    /// Total number of positions accounted for.
    pub fn len(&self) -> usize {
        self.successful.len() + self.failed.len()
    }

    /// True when no position has been recorded.
    pub fn is_empty(&self) -> bool {
        self.successful.is_empty() && self.failed.is_empty()
    }

    /// True when every recorded position failed.
    pub fn all_failed(&self) -> bool {
        self.successful.is_empty() && !self.failed.is_empty()
    }

    /// True when some positions succeeded and some failed.
    pub fn is_partial(&self) -> bool {
        !self.successful.is_empty() && !self.failed.is_empty()
    }

    /// Check that positions `0..total` are each in exactly one map.
    pub fn covers(&self, total: usize) -> bool {
        if self.len() != total {
            return false;
        }
        (0..total).all(|i| self.successful.contains_key(&i) != self.failed.contains_key(&i))
    }
}

//! Optimistic concurrency for snapshot writers.

use crate::error::{DomainError, DomainResult};

/// Version expectation presented when replacing a snapshot.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip version checking (bootstrap, imports).
    Any,
    /// Require the current snapshot to be at an exact version.
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }

    pub fn check(self, actual: u64) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "stale snapshot (expected: {self:?}, actual: {actual})"
            )))
        }
    }
}

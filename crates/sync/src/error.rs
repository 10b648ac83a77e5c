use std::time::Duration;

use sharex_core::{QueueItemId, ResourceId};
use thiserror::Error;

use crate::types::ResourceKind;

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Transient transport failure; the batch is retried with backoff.
    #[error("network error: {0}")]
    Network(String),

    #[error("sync request timed out after {0:?}")]
    Timeout(Duration),

    /// Remote state diverged; escalated to a conflict record, never retried automatically.
    #[error("conflict on {kind} {resource_id}")]
    Conflict {
        kind: ResourceKind,
        resource_id: ResourceId,
    },

    /// Retry budget exhausted; kept for manual intervention.
    #[error("permanent failure after {attempts} attempts: {message}")]
    PermanentFailure { attempts: u32, message: String },

    #[error("batch rejected by remote: {0}")]
    Rejected(String),

    #[error("queue item not found: {0}")]
    NotFound(QueueItemId),

    /// Manual retry of an item that is not a permanent failure.
    #[error("queue item {0} is not a permanent failure")]
    NotRetryable(QueueItemId),

    #[error("no pending conflict for resource {0}")]
    NoPendingConflict(ResourceId),

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Failure reported by a [`SyncTransport`](crate::transport::SyncTransport).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection refused, reset, DNS, 5xx... anything worth retrying.
    #[error("network error: {0}")]
    Network(String),

    /// The remote understood the batch and refused it.
    #[error("rejected: {0}")]
    Rejected(String),
}

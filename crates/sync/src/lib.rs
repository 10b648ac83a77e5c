//! `sharex-sync` — offline mutation queue and reconciliation with the remote.
//!
//! This crate provides:
//! - An ordered queue of local mutations with single-flight batching per resource
//! - Exponential backoff and a bounded retry budget
//! - Conflict resolution strategies (server-wins, client-wins, last-write-wins, manual)
//! - A coordinator that drives one sync cycle over an injected transport
//! - A background worker that runs cycles on an interval
//!
//! The remote stays the authority; this crate never performs IO itself.

pub mod backoff;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod queue;
pub mod replica;
pub mod resolver;
pub mod transport;
pub mod types;
pub mod wire;
pub mod worker;

pub use backoff::{calculate_backoff_delay, should_sync, RetryPolicy};
pub use config::SyncConfig;
pub use coordinator::{RemoteWin, SyncCoordinator, SyncReport};
pub use error::{SyncError, SyncResult, TransportError};
pub use queue::{batch_operations, SyncQueue};
pub use replica::{ApplyOutcome, Replica};
pub use resolver::{ConflictResolver, ConflictStrategy, MergeOutcome, Timestamped, Versioned};
pub use transport::SyncTransport;
pub use types::{
    ConflictRecord, ConflictResolution, FailureKind, OpKind, QueueItemError, QueueItemState,
    ResourceKind, SyncQueueItem, SyncState,
};
pub use wire::{ChangeSet, Changes, RemoteConflict, SyncRequest, SyncResponse};
pub use worker::{SyncWorker, SyncWorkerHandle};

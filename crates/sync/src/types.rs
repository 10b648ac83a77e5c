//! Queue, conflict and status records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use sharex_core::{Entity, QueueItemId, ResourceId};

use crate::error::SyncError;

/// Kind of local mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Create,
    Update,
    Delete,
}

/// Kind of synchronized resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Expense,
    Category,
    Split,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Expense => "expense",
            ResourceKind::Category => "category",
            ResourceKind::Split => "split",
        }
    }
}

impl core::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a queued mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QueueItemState {
    Pending,
    InFlight,
    Failed,
    Done,
}

/// Why the last attempt of an item failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Retryable with backoff.
    Network,
    /// Waiting on a conflict record.
    Conflict,
    /// Out of automatic retry; needs the user.
    Permanent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItemError {
    pub kind: FailureKind,
    pub message: String,
}

/// A local mutation waiting to reach the remote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncQueueItem {
    pub id: QueueItemId,
    pub op_kind: OpKind,
    pub resource_kind: ResourceKind,
    pub resource_id: ResourceId,
    pub payload: Value,
    pub enqueued_at: DateTime<Utc>,
    pub attempt_count: u32,
    pub state: QueueItemState,
    /// Earliest time a failed item may be retried.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<QueueItemError>,
}

impl SyncQueueItem {
    /// Receivers deduplicate on this key.
    pub fn idempotency_key(&self) -> (ResourceId, OpKind) {
        (self.resource_id, self.op_kind)
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        if self.state != QueueItemState::Failed {
            return None;
        }
        self.last_error.as_ref().map(|e| e.kind)
    }

    pub fn is_permanently_failed(&self) -> bool {
        self.failure_kind() == Some(FailureKind::Permanent)
    }

    /// `updatedAt` carried in the payload, if any.
    pub fn local_updated_at(&self) -> Option<DateTime<Utc>> {
        updated_at_of(&self.payload)
    }

    /// The user-facing error for a failed item.
    pub fn error(&self) -> Option<SyncError> {
        let last = self.last_error.as_ref()?;
        if self.state != QueueItemState::Failed {
            return None;
        }
        Some(match last.kind {
            FailureKind::Network => SyncError::Network(last.message.clone()),
            FailureKind::Conflict => SyncError::Conflict {
                kind: self.resource_kind,
                resource_id: self.resource_id,
            },
            FailureKind::Permanent => SyncError::PermanentFailure {
                attempts: self.attempt_count,
                message: last.message.clone(),
            },
        })
    }
}

impl Entity for SyncQueueItem {
    type Id = QueueItemId;

    fn id(&self) -> QueueItemId {
        self.id
    }
}

/// Read an RFC 3339 `updatedAt` field from a JSON record.
pub(crate) fn updated_at_of(value: &Value) -> Option<DateTime<Utc>> {
    value
        .get("updatedAt")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Outcome of a conflict record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictResolution {
    Pending,
    LocalWins,
    RemoteWins,
}

/// A divergence the resolver could not settle on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    pub resource_kind: ResourceKind,
    pub resource_id: ResourceId,
    /// Queue item holding the local version.
    pub queue_item_id: QueueItemId,
    pub local_timestamp: Option<DateTime<Utc>>,
    pub remote_timestamp: Option<DateTime<Utc>>,
    pub remote_payload: Value,
    pub resolution: ConflictResolution,
}

/// Coordinator status for the surrounding application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub last_sync_time: Option<DateTime<Utc>>,
    pub is_syncing: bool,
    pub pending_changes: usize,
    pub conflict_count: usize,
    pub error_count: usize,
}

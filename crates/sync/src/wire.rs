//! Request/response bodies exchanged with the remote.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use sharex_core::ResourceId;

use crate::types::{OpKind, ResourceKind, SyncQueueItem};

/// Changes of one resource kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSet {
    #[serde(default)]
    pub created: Vec<Value>,
    #[serde(default)]
    pub updated: Vec<Value>,
    #[serde(default)]
    pub deleted: Vec<ResourceId>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    pub fn len(&self) -> usize {
        self.created.len() + self.updated.len() + self.deleted.len()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Changes {
    #[serde(default)]
    pub expenses: ChangeSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<ChangeSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub splits: Option<ChangeSet>,
}

impl Changes {
    pub fn for_kind(&self, kind: ResourceKind) -> Option<&ChangeSet> {
        match kind {
            ResourceKind::Expense => Some(&self.expenses),
            ResourceKind::Category => self.categories.as_ref(),
            ResourceKind::Split => self.splits.as_ref(),
        }
    }

    pub fn for_kind_mut(&mut self, kind: ResourceKind) -> &mut ChangeSet {
        match kind {
            ResourceKind::Expense => &mut self.expenses,
            ResourceKind::Category => self.categories.get_or_insert_with(ChangeSet::default),
            ResourceKind::Split => self.splits.get_or_insert_with(ChangeSet::default),
        }
    }

    pub fn is_empty(&self) -> bool {
        [
            ResourceKind::Expense,
            ResourceKind::Category,
            ResourceKind::Split,
        ]
        .into_iter()
        .filter_map(|kind| self.for_kind(kind))
        .all(ChangeSet::is_empty)
    }

    /// Group queued mutations by resource kind and operation.
    pub fn from_items<'a>(items: impl IntoIterator<Item = &'a SyncQueueItem>) -> Self {
        let mut changes = Changes::default();
        for item in items {
            let set = changes.for_kind_mut(item.resource_kind);
            match item.op_kind {
                OpKind::Create => set.created.push(item.payload.clone()),
                OpKind::Update => set.updated.push(item.payload.clone()),
                OpKind::Delete => set.deleted.push(item.resource_id),
            }
        }
        changes
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    /// `None` on the very first sync.
    pub last_sync_time: Option<DateTime<Utc>>,
    pub changes: Changes,
}

impl SyncRequest {
    pub fn from_items<'a>(
        last_sync_time: Option<DateTime<Utc>>,
        items: impl IntoIterator<Item = &'a SyncQueueItem>,
    ) -> Self {
        Self {
            last_sync_time,
            changes: Changes::from_items(items),
        }
    }
}

/// A resource the remote refused because its copy diverged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConflict {
    pub resource_type: ResourceKind,
    pub resource_id: ResourceId,
    #[serde(default)]
    pub local_version: Option<DateTime<Utc>>,
    #[serde(default)]
    pub server_version: Option<DateTime<Utc>>,
    #[serde(default)]
    pub server_data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    pub server_time: DateTime<Utc>,
    /// Changes made on the remote since `last_sync_time`.
    #[serde(default)]
    pub changes: Changes,
    #[serde(default)]
    pub conflicts: Vec<RemoteConflict>,
}

impl SyncResponse {
    /// A response that accepts everything and carries nothing back.
    pub fn accepted(server_time: DateTime<Utc>) -> Self {
        Self {
            server_time,
            changes: Changes::default(),
            conflicts: Vec::new(),
        }
    }

    pub fn conflict_for(&self, kind: ResourceKind, id: ResourceId) -> Option<&RemoteConflict> {
        self.conflicts
            .iter()
            .find(|c| c.resource_type == kind && c.resource_id == id)
    }
}

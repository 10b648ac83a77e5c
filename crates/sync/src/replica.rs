//! Idempotent receiver for queued mutations.
//!
//! Delivery is at-least-once, so the same item can arrive more than once.
//! The replica remembers every item applied to each `(resource, op)` pair
//! and ignores repeats, however late they arrive.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use sharex_core::{QueueItemId, ResourceId};

use crate::types::{OpKind, ResourceKind, SyncQueueItem};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    Duplicate,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Replica {
    records: BTreeMap<(ResourceKind, ResourceId), Value>,
    applied: BTreeMap<(ResourceId, OpKind), BTreeSet<QueueItemId>>,
}

impl Replica {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, item: &SyncQueueItem) -> ApplyOutcome {
        if !self
            .applied
            .entry(item.idempotency_key())
            .or_default()
            .insert(item.id)
        {
            tracing::debug!(item_id = %item.id, "duplicate delivery ignored");
            return ApplyOutcome::Duplicate;
        }

        let record = (item.resource_kind, item.resource_id);
        match item.op_kind {
            OpKind::Create | OpKind::Update => {
                self.records.insert(record, item.payload.clone());
            }
            OpKind::Delete => {
                self.records.remove(&record);
            }
        }
        ApplyOutcome::Applied
    }

    pub fn apply_all<'a>(&mut self, items: impl IntoIterator<Item = &'a SyncQueueItem>) -> usize {
        items
            .into_iter()
            .filter(|item| self.apply(item) == ApplyOutcome::Applied)
            .count()
    }

    pub fn get(&self, kind: ResourceKind, id: ResourceId) -> Option<&Value> {
        self.records.get(&(kind, id))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

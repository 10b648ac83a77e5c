//! Ordered queue of local mutations.
//!
//! Items leave the queue in enqueue order, and a resource never has more than
//! one item in flight. The oldest unfinished item of a resource blocks the
//! ones behind it until it is acknowledged or removed.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde_json::Value;

use sharex_core::{Clock, IdGenerator, QueueItemId, ResourceId};

use crate::backoff::RetryPolicy;
use crate::types::{
    FailureKind, OpKind, QueueItemError, QueueItemState, ResourceKind, SyncQueueItem,
};

#[derive(Debug, Clone, Default)]
pub struct SyncQueue {
    items: Vec<SyncQueueItem>,
}

impl SyncQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a queue from persisted items. Anything left in flight was
    /// interrupted and goes back to pending.
    pub fn restore(items: impl IntoIterator<Item = SyncQueueItem>) -> Self {
        let mut items: Vec<SyncQueueItem> = items
            .into_iter()
            .filter(|item| item.state != QueueItemState::Done)
            .collect();
        items.sort_by_key(|item| item.enqueued_at);
        for item in &mut items {
            if item.state == QueueItemState::InFlight {
                item.state = QueueItemState::Pending;
            }
        }
        Self { items }
    }

    pub fn enqueue(
        &mut self,
        ids: &dyn IdGenerator,
        clock: &dyn Clock,
        op_kind: OpKind,
        resource_kind: ResourceKind,
        resource_id: ResourceId,
        payload: Value,
    ) -> SyncQueueItem {
        let item = SyncQueueItem {
            id: QueueItemId::generate(ids),
            op_kind,
            resource_kind,
            resource_id,
            payload,
            enqueued_at: clock.now(),
            attempt_count: 0,
            state: QueueItemState::Pending,
            next_attempt_at: None,
            last_error: None,
        };
        tracing::debug!(
            item_id = %item.id,
            resource = %resource_id,
            kind = %resource_kind,
            op = ?op_kind,
            "enqueued mutation"
        );
        self.items.push(item.clone());
        item
    }

    pub fn get(&self, id: QueueItemId) -> Option<&SyncQueueItem> {
        self.items.iter().find(|item| item.id == id)
    }

    fn get_mut(&mut self, id: QueueItemId) -> Option<&mut SyncQueueItem> {
        self.items.iter_mut().find(|item| item.id == id)
    }

    pub fn items(&self) -> &[SyncQueueItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items not yet acknowledged, excluding permanent failures.
    pub fn pending_count(&self) -> usize {
        self.items
            .iter()
            .filter(|item| !item.is_permanently_failed())
            .count()
    }

    pub fn in_flight_count(&self) -> usize {
        self.items
            .iter()
            .filter(|item| item.state == QueueItemState::InFlight)
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.items
            .iter()
            .filter(|item| item.state == QueueItemState::Failed)
            .count()
    }

    pub fn permanent_failures(&self) -> impl Iterator<Item = &SyncQueueItem> {
        self.items.iter().filter(|item| item.is_permanently_failed())
    }

    pub fn remove(&mut self, id: QueueItemId) -> Option<SyncQueueItem> {
        let index = self.items.iter().position(|item| item.id == id)?;
        Some(self.items.remove(index))
    }

    /// Whether an item may be sent now, ignoring ordering.
    fn is_ready(item: &SyncQueueItem, now: DateTime<Utc>, policy: &RetryPolicy) -> bool {
        match item.state {
            QueueItemState::Pending => true,
            QueueItemState::Failed => policy.is_due(item, now),
            QueueItemState::InFlight | QueueItemState::Done => false,
        }
    }

    /// Whether [`next_batch`](Self::next_batch) would return anything.
    pub fn has_ready(&self, now: DateTime<Utc>, policy: &RetryPolicy) -> bool {
        self.heads().any(|item| Self::is_ready(item, now, policy))
    }

    /// The oldest item of each resource id, in queue order.
    fn heads(&self) -> impl Iterator<Item = &SyncQueueItem> {
        let mut seen = BTreeSet::new();
        self.items
            .iter()
            .filter(move |item| seen.insert(item.resource_id))
    }

    /// Take up to `max` ready items in queue order and mark them in flight.
    pub fn next_batch(
        &mut self,
        max: usize,
        now: DateTime<Utc>,
        policy: &RetryPolicy,
    ) -> Vec<SyncQueueItem> {
        let picked: Vec<QueueItemId> = self
            .heads()
            .filter(|item| Self::is_ready(item, now, policy))
            .take(max)
            .map(|item| item.id)
            .collect();

        let mut batch = Vec::with_capacity(picked.len());
        for item in &mut self.items {
            if picked.contains(&item.id) {
                item.state = QueueItemState::InFlight;
                item.next_attempt_at = None;
                batch.push(item.clone());
            }
        }
        batch
    }

    /// Drop acknowledged items.
    pub fn acknowledge(&mut self, ids: &[QueueItemId]) -> Vec<SyncQueueItem> {
        let (mut done, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.items)
            .into_iter()
            .partition(|item| ids.contains(&item.id));
        self.items = kept;
        for item in &mut done {
            item.state = QueueItemState::Done;
        }
        done
    }

    /// Return in-flight items to pending without spending their retry budget.
    pub fn release(&mut self, ids: &[QueueItemId]) {
        for item in &mut self.items {
            if ids.contains(&item.id) && item.state == QueueItemState::InFlight {
                item.state = QueueItemState::Pending;
            }
        }
    }

    /// Record a failed attempt.
    ///
    /// Network failures are retried with backoff until the budget is spent,
    /// after which the item is kept as a permanent failure.
    pub fn record_failure(
        &mut self,
        id: QueueItemId,
        kind: FailureKind,
        message: impl Into<String>,
        now: DateTime<Utc>,
        policy: &RetryPolicy,
    ) -> Option<&SyncQueueItem> {
        let item = self.get_mut(id)?;
        let message = message.into();
        item.attempt_count = item.attempt_count.saturating_add(1);
        item.state = QueueItemState::Failed;

        let kind = if kind == FailureKind::Network && item.attempt_count >= policy.max_retries {
            tracing::error!(
                item_id = %item.id,
                attempts = item.attempt_count,
                error = %message,
                "retry budget exhausted"
            );
            FailureKind::Permanent
        } else {
            kind
        };

        item.next_attempt_at = match kind {
            FailureKind::Network => Some(policy.next_attempt_at(item.attempt_count, now)),
            FailureKind::Conflict | FailureKind::Permanent => None,
        };
        item.last_error = Some(QueueItemError { kind, message });
        Some(&*item)
    }

    /// Send an item again on the next cycle, keeping its attempt count.
    pub fn requeue(&mut self, id: QueueItemId) -> bool {
        let Some(item) = self.get_mut(id) else {
            return false;
        };
        item.state = QueueItemState::Pending;
        item.next_attempt_at = None;
        item.last_error = None;
        true
    }

    /// Manual retry of a permanent failure with a fresh retry budget.
    ///
    /// Items still on automatic backoff, or waiting on a conflict, are left alone.
    pub fn retry_failed(&mut self, id: QueueItemId) -> Option<&SyncQueueItem> {
        let item = self.get_mut(id)?;
        if !item.is_permanently_failed() {
            return None;
        }
        item.state = QueueItemState::Pending;
        item.attempt_count = 0;
        item.next_attempt_at = None;
        item.last_error = None;
        Some(&*item)
    }
}

/// Split items into chunks of at most `batch_size`, preserving order.
pub fn batch_operations<T: Clone>(items: &[T], batch_size: usize) -> Vec<Vec<T>> {
    items
        .chunks(batch_size.max(1))
        .map(<[T]>::to_vec)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use serde_json::json;
    use sharex_core::{ManualClock, SequentialIds};
    use uuid::Uuid;

    fn rid(n: u128) -> ResourceId {
        ResourceId::from_uuid(Uuid::from_u128(1_000 + n))
    }

    fn fixture() -> (SyncQueue, SequentialIds, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap());
        (SyncQueue::new(), SequentialIds::new(), clock)
    }

    fn push(queue: &mut SyncQueue, ids: &SequentialIds, clock: &ManualClock, op: OpKind, r: u128) -> QueueItemId {
        let item = queue.enqueue(ids, clock, op, ResourceKind::Expense, rid(r), json!({ "r": r as u64 }));
        clock.advance(chrono::Duration::seconds(1));
        item.id
    }

    #[test]
    fn batches_in_order_with_one_item_per_resource() {
        let (mut queue, ids, clock) = fixture();
        let a1 = push(&mut queue, &ids, &clock, OpKind::Create, 1);
        let b1 = push(&mut queue, &ids, &clock, OpKind::Create, 2);
        let a2 = push(&mut queue, &ids, &clock, OpKind::Update, 1);
        let policy = RetryPolicy::default();

        let batch = queue.next_batch(10, clock.now(), &policy);
        assert_eq!(batch.iter().map(|i| i.id).collect::<Vec<_>>(), vec![a1, b1]);

        // a1 still in flight, so a2 is held back.
        assert!(queue.next_batch(10, clock.now(), &policy).is_empty());

        queue.acknowledge(&[a1]);
        let batch = queue.next_batch(10, clock.now(), &policy);
        assert_eq!(batch.iter().map(|i| i.id).collect::<Vec<_>>(), vec![a2]);
    }

    #[test]
    fn batch_respects_max() {
        let (mut queue, ids, clock) = fixture();
        for r in 0..5 {
            push(&mut queue, &ids, &clock, OpKind::Create, r);
        }
        let policy = RetryPolicy::default();
        assert_eq!(queue.next_batch(3, clock.now(), &policy).len(), 3);
        assert_eq!(queue.next_batch(3, clock.now(), &policy).len(), 2);
        assert_eq!(queue.in_flight_count(), 5);
    }

    #[test]
    fn network_failures_back_off_then_become_permanent() {
        let (mut queue, ids, clock) = fixture();
        let id = push(&mut queue, &ids, &clock, OpKind::Create, 1);
        let policy = RetryPolicy::default();

        for attempt in 1..=3u32 {
            let batch = queue.next_batch(10, clock.now(), &policy);
            assert_eq!(batch.len(), 1, "attempt {attempt}");
            let item = queue
                .record_failure(id, FailureKind::Network, "offline", clock.now(), &policy)
                .unwrap()
                .clone();
            assert_eq!(item.attempt_count, attempt);

            if attempt < 3 {
                assert_eq!(item.failure_kind(), Some(FailureKind::Network));
                // Not retried before the backoff window.
                assert!(queue.next_batch(10, clock.now(), &policy).is_empty());
                clock.advance(chrono::Duration::from_std(policy.delay_for_attempt(attempt - 1)).unwrap());
            } else {
                assert!(item.is_permanently_failed());
            }
        }

        clock.advance(chrono::Duration::hours(1));
        assert!(queue.next_batch(10, clock.now(), &policy).is_empty());
        assert_eq!(queue.permanent_failures().count(), 1);
        assert_eq!(queue.pending_count(), 0);
    }

    #[test]
    fn release_does_not_consume_retry_budget() {
        let (mut queue, ids, clock) = fixture();
        let id = push(&mut queue, &ids, &clock, OpKind::Create, 1);
        let policy = RetryPolicy::default();

        queue.next_batch(10, clock.now(), &policy);
        queue.release(&[id]);

        let item = queue.get(id).unwrap();
        assert_eq!(item.state, QueueItemState::Pending);
        assert_eq!(item.attempt_count, 0);
    }

    #[test]
    fn conflicted_item_blocks_its_resource_until_requeued() {
        let (mut queue, ids, clock) = fixture();
        let first = push(&mut queue, &ids, &clock, OpKind::Update, 1);
        let second = push(&mut queue, &ids, &clock, OpKind::Update, 1);
        let policy = RetryPolicy::default();

        queue.next_batch(10, clock.now(), &policy);
        queue.record_failure(first, FailureKind::Conflict, "diverged", clock.now(), &policy);
        assert!(queue.next_batch(10, clock.now(), &policy).is_empty());

        assert!(queue.requeue(first));
        let batch = queue.next_batch(10, clock.now(), &policy);
        assert_eq!(batch[0].id, first);
        queue.acknowledge(&[first]);
        assert_eq!(queue.next_batch(10, clock.now(), &policy)[0].id, second);
    }

    #[test]
    fn manual_retry_resets_budget() {
        let (mut queue, ids, clock) = fixture();
        let id = push(&mut queue, &ids, &clock, OpKind::Delete, 1);
        let policy = RetryPolicy::default();

        queue.next_batch(10, clock.now(), &policy);
        queue.record_failure(id, FailureKind::Permanent, "rejected", clock.now(), &policy);
        assert!(queue.get(id).unwrap().is_permanently_failed());

        let item = queue.retry_failed(id).unwrap();
        assert_eq!(item.state, QueueItemState::Pending);
        assert_eq!(item.attempt_count, 0);
        assert!(queue.retry_failed(id).is_none());
    }

    #[test]
    fn manual_retry_leaves_backoff_items_alone() {
        let (mut queue, ids, clock) = fixture();
        let id = push(&mut queue, &ids, &clock, OpKind::Update, 1);
        let policy = RetryPolicy::default();

        for _ in 0..2 {
            queue.next_batch(10, clock.now(), &policy);
            queue.record_failure(id, FailureKind::Network, "offline", clock.now(), &policy);
            clock.advance(chrono::Duration::hours(1));
        }

        assert!(queue.retry_failed(id).is_none());
        let item = queue.get(id).unwrap();
        assert_eq!(item.attempt_count, 2);
        assert_eq!(item.failure_kind(), Some(FailureKind::Network));
        assert!(item.next_attempt_at.is_some());
    }

    #[test]
    fn one_resource_id_in_flight_across_kinds() {
        let (mut queue, ids, clock) = fixture();
        let expense = push(&mut queue, &ids, &clock, OpKind::Create, 1);
        let split = queue
            .enqueue(&ids, &clock, OpKind::Create, ResourceKind::Split, rid(1), json!({}))
            .id;
        let policy = RetryPolicy::default();

        let batch = queue.next_batch(10, clock.now(), &policy);
        assert_eq!(batch.iter().map(|i| i.id).collect::<Vec<_>>(), vec![expense]);

        queue.acknowledge(&[expense]);
        assert_eq!(queue.next_batch(10, clock.now(), &policy)[0].id, split);
    }

    #[test]
    fn restore_resets_in_flight_and_orders_by_enqueue_time() {
        let (mut queue, ids, clock) = fixture();
        let a = push(&mut queue, &ids, &clock, OpKind::Create, 1);
        let b = push(&mut queue, &ids, &clock, OpKind::Create, 2);
        queue.next_batch(1, clock.now(), &RetryPolicy::default());

        let mut items = queue.items().to_vec();
        items.reverse();
        let restored = SyncQueue::restore(items);

        assert_eq!(restored.items()[0].id, a);
        assert_eq!(restored.items()[1].id, b);
        assert_eq!(restored.in_flight_count(), 0);
    }

    #[test]
    fn batch_operations_chunks() {
        let items: Vec<u32> = (0..7).collect();
        assert_eq!(
            batch_operations(&items, 3),
            vec![vec![0, 1, 2], vec![3, 4, 5], vec![6]]
        );
        assert!(batch_operations::<u32>(&[], 3).is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 128, .. ProptestConfig::default() })]

        #[test]
        fn never_two_in_flight_for_one_resource(
            resources in proptest::collection::vec(0u128..4, 1..30),
            batch in 1usize..8,
            rounds in 1usize..6,
        ) {
            let (mut queue, ids, clock) = fixture();
            for r in &resources {
                push(&mut queue, &ids, &clock, OpKind::Update, *r);
            }
            let policy = RetryPolicy::default();

            for round in 0..rounds {
                let picked = queue.next_batch(batch, clock.now(), &policy);
                prop_assert!(picked.len() <= batch);

                let mut in_flight: Vec<ResourceId> = queue
                    .items()
                    .iter()
                    .filter(|i| i.state == QueueItemState::InFlight)
                    .map(|i| i.resource_id)
                    .collect();
                let total = in_flight.len();
                in_flight.sort();
                in_flight.dedup();
                prop_assert_eq!(in_flight.len(), total);

                // Acknowledge every other round to let later items through.
                if round % 2 == 0 {
                    let ids: Vec<_> = picked.iter().map(|i| i.id).collect();
                    queue.acknowledge(&ids);
                }
            }
        }

        #[test]
        fn each_resource_is_served_in_enqueue_order(
            resources in proptest::collection::vec(0u128..3, 1..20),
        ) {
            let (mut queue, ids, clock) = fixture();
            let enqueued: Vec<(ResourceId, QueueItemId)> = resources
                .iter()
                .map(|r| (rid(*r), push(&mut queue, &ids, &clock, OpKind::Update, *r)))
                .collect();
            let policy = RetryPolicy::default();

            let mut sent = Vec::new();
            loop {
                let batch = queue.next_batch(2, clock.now(), &policy);
                if batch.is_empty() {
                    break;
                }
                let ids: Vec<_> = batch.iter().map(|i| i.id).collect();
                sent.extend(batch.iter().map(|i| (i.resource_id, i.id)));
                queue.acknowledge(&ids);
            }

            prop_assert_eq!(sent.len(), enqueued.len());
            for r in 0u128..3 {
                let expected: Vec<_> = enqueued.iter().filter(|(res, _)| *res == rid(r)).collect();
                let actual: Vec<_> = sent.iter().filter(|(res, _)| *res == rid(r)).collect();
                prop_assert_eq!(expected, actual);
            }
        }
    }
}

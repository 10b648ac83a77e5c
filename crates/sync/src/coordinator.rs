//! One sync cycle: pick a batch, push it, reconcile the answer.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde_json::Value;

use sharex_core::{Clock, IdGenerator, QueueItemId, RandomIds, ResourceId, SystemClock};

use crate::backoff::{should_sync, RetryPolicy};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult, TransportError};
use crate::queue::SyncQueue;
use crate::resolver::{ConflictResolver, MergeOutcome};
use crate::transport::SyncTransport;
use crate::types::{
    ConflictRecord, ConflictResolution, FailureKind, OpKind, ResourceKind, SyncQueueItem,
    SyncState,
};
use crate::wire::{Changes, SyncRequest, SyncResponse};

/// The remote version replaced a queued local one.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteWin {
    pub resource_kind: ResourceKind,
    pub resource_id: ResourceId,
    pub payload: Value,
}

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    /// Items sent in the batch.
    pub attempted: usize,
    pub acknowledged: Vec<QueueItemId>,
    /// Kept locally and scheduled for re-send.
    pub requeued: Vec<QueueItemId>,
    /// The application should overwrite its copy with these.
    pub remote_wins: Vec<RemoteWin>,
    pub conflicts: Vec<ConflictRecord>,
    pub server_time: Option<DateTime<Utc>>,
    pub server_changes: Changes,
}

impl SyncReport {
    /// Nothing was ready to send.
    pub fn is_idle(&self) -> bool {
        self.attempted == 0
    }
}

#[derive(Debug, Default)]
struct CoordinatorState {
    queue: SyncQueue,
    conflicts: Vec<ConflictRecord>,
    last_sync_time: Option<DateTime<Utc>>,
}

fn lock_state(state: &Mutex<CoordinatorState>) -> MutexGuard<'_, CoordinatorState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Puts a batch back to pending if the cycle is dropped before the
/// transport answers.
struct InFlightBatch<'a> {
    state: &'a Mutex<CoordinatorState>,
    ids: Vec<QueueItemId>,
    armed: bool,
}

impl<'a> InFlightBatch<'a> {
    fn new(state: &'a Mutex<CoordinatorState>, ids: Vec<QueueItemId>) -> Self {
        Self {
            state,
            ids,
            armed: true,
        }
    }

    /// The transport answered; the caller settles the batch from here.
    fn settle(mut self) -> Vec<QueueItemId> {
        self.armed = false;
        std::mem::take(&mut self.ids)
    }
}

impl Drop for InFlightBatch<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::warn!(items = self.ids.len(), "sync cycle cancelled; releasing batch");
        lock_state(self.state).queue.release(&self.ids);
    }
}

/// Owns the mutation queue and drives it against a [`SyncTransport`].
///
/// Several cycles may run concurrently; the queue's single-flight rule keeps
/// them on disjoint resources and `batch_size` bounds the total in flight.
pub struct SyncCoordinator<T> {
    transport: T,
    config: SyncConfig,
    policy: RetryPolicy,
    resolver: ConflictResolver,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    state: Mutex<CoordinatorState>,
}

impl<T: SyncTransport> SyncCoordinator<T> {
    pub fn new(transport: T, config: SyncConfig) -> Self {
        Self {
            transport,
            policy: config.retry_policy(),
            resolver: ConflictResolver::new(config.strategy),
            config,
            clock: Arc::new(SystemClock),
            ids: Arc::new(RandomIds),
            state: Mutex::new(CoordinatorState::default()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Resume with items persisted by a previous run.
    pub fn with_queue(self, queue: SyncQueue) -> Self {
        self.lock().queue = queue;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, CoordinatorState> {
        lock_state(&self.state)
    }

    pub fn enqueue(
        &self,
        op_kind: OpKind,
        resource_kind: ResourceKind,
        resource_id: ResourceId,
        payload: Value,
    ) -> SyncQueueItem {
        self.lock().queue.enqueue(
            self.ids.as_ref(),
            self.clock.as_ref(),
            op_kind,
            resource_kind,
            resource_id,
            payload,
        )
    }

    /// Copy of the queue for persistence or display.
    pub fn queue_items(&self) -> Vec<SyncQueueItem> {
        self.lock().queue.items().to_vec()
    }

    pub fn pending_conflicts(&self) -> Vec<ConflictRecord> {
        self.lock().conflicts.clone()
    }

    pub fn permanent_failures(&self) -> Vec<SyncQueueItem> {
        self.lock().queue.permanent_failures().cloned().collect()
    }

    pub fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        self.lock().last_sync_time
    }

    pub fn state(&self) -> SyncState {
        let state = self.lock();
        SyncState {
            last_sync_time: state.last_sync_time,
            is_syncing: state.queue.in_flight_count() > 0,
            pending_changes: state.queue.pending_count(),
            conflict_count: state.conflicts.len(),
            error_count: state.queue.failed_count(),
        }
    }

    /// The periodic interval elapsed since the last successful cycle.
    pub fn is_sync_due(&self) -> bool {
        should_sync(self.last_sync_time(), self.config.sync_interval, self.clock.now())
    }

    /// Something is ready to send right now.
    pub fn has_ready_work(&self) -> bool {
        self.lock().queue.has_ready(self.clock.now(), &self.policy)
    }

    /// Run one cycle.
    ///
    /// Returns an idle report when nothing is ready. Transport failures are
    /// recorded on the batch items before the error is returned.
    pub async fn run_cycle(&self) -> SyncResult<SyncReport> {
        let (batch, request) = {
            let mut state = self.lock();
            let capacity = self
                .config
                .batch_size
                .saturating_sub(state.queue.in_flight_count());
            let batch = state.queue.next_batch(capacity, self.clock.now(), &self.policy);
            if batch.is_empty() {
                tracing::debug!("no mutations ready to sync");
                return Ok(SyncReport::default());
            }
            let request = SyncRequest::from_items(state.last_sync_time, &batch);
            (batch, request)
        };

        let in_flight =
            InFlightBatch::new(&self.state, batch.iter().map(|item| item.id).collect());
        tracing::info!(items = batch.len(), "pushing sync batch");

        let pushed =
            tokio::time::timeout(self.config.request_timeout, self.transport.push(request)).await;
        let ids = in_flight.settle();

        match pushed {
            Ok(Ok(response)) => Ok(self.reconcile(&batch, response)),
            Ok(Err(TransportError::Network(message))) => {
                tracing::warn!(items = ids.len(), error = %message, "sync batch failed");
                self.fail_batch(&ids, FailureKind::Network, &message);
                Err(SyncError::Network(message))
            }
            Ok(Err(TransportError::Rejected(message))) => {
                tracing::error!(items = ids.len(), error = %message, "sync batch rejected");
                self.fail_batch(&ids, FailureKind::Permanent, &message);
                Err(SyncError::Rejected(message))
            }
            Err(_elapsed) => {
                tracing::warn!(
                    items = ids.len(),
                    timeout = ?self.config.request_timeout,
                    "sync batch timed out; releasing"
                );
                self.lock().queue.release(&ids);
                Err(SyncError::Timeout(self.config.request_timeout))
            }
        }
    }

    fn fail_batch(&self, ids: &[QueueItemId], kind: FailureKind, message: &str) {
        let now = self.clock.now();
        let mut state = self.lock();
        for id in ids {
            state
                .queue
                .record_failure(*id, kind, message, now, &self.policy);
        }
    }

    fn reconcile(&self, batch: &[SyncQueueItem], response: SyncResponse) -> SyncReport {
        let now = self.clock.now();
        let mut state = self.lock();
        let mut report = SyncReport {
            attempted: batch.len(),
            server_time: Some(response.server_time),
            ..SyncReport::default()
        };

        for item in batch {
            let Some(conflict) = response.conflict_for(item.resource_kind, item.resource_id) else {
                report.acknowledged.push(item.id);
                continue;
            };

            match self.resolver.resolve(item, conflict) {
                MergeOutcome::Local(_) => {
                    tracing::debug!(resource = %item.resource_id, "conflict resolved for local copy");
                    state.queue.requeue(item.id);
                    report.requeued.push(item.id);
                }
                MergeOutcome::Remote(remote) => {
                    tracing::debug!(resource = %item.resource_id, "conflict resolved for remote copy");
                    report.acknowledged.push(item.id);
                    report.remote_wins.push(RemoteWin {
                        resource_kind: item.resource_kind,
                        resource_id: item.resource_id,
                        payload: remote.payload,
                    });
                }
                MergeOutcome::Unresolved { local, remote } => {
                    tracing::warn!(
                        resource = %item.resource_id,
                        kind = %item.resource_kind,
                        strategy = %self.resolver.strategy(),
                        "conflict needs manual resolution"
                    );
                    let record = ConflictRecord::pending(item, &local, &remote);
                    state.queue.record_failure(
                        item.id,
                        FailureKind::Conflict,
                        format!("conflict on {} {}", item.resource_kind, item.resource_id),
                        now,
                        &self.policy,
                    );
                    state.conflicts.retain(|c| {
                        (c.resource_kind, c.resource_id) != (record.resource_kind, record.resource_id)
                    });
                    state.conflicts.push(record.clone());
                    report.conflicts.push(record);
                }
            }
        }

        for conflict in &response.conflicts {
            let known = batch.iter().any(|item| {
                item.resource_kind == conflict.resource_type && item.resource_id == conflict.resource_id
            });
            if !known {
                tracing::warn!(
                    resource = %conflict.resource_id,
                    kind = %conflict.resource_type,
                    "remote reported a conflict for a resource outside the batch"
                );
            }
        }

        state.queue.acknowledge(&report.acknowledged);
        state.last_sync_time = Some(response.server_time);
        report.server_changes = response.changes;

        tracing::info!(
            attempted = report.attempted,
            acknowledged = report.acknowledged.len(),
            requeued = report.requeued.len(),
            conflicts = report.conflicts.len(),
            "sync batch reconciled"
        );
        report
    }

    /// Settle a pending conflict by hand.
    ///
    /// `LocalWins` sends the queued item again; `RemoteWins` drops it.
    pub fn resolve_conflict(
        &self,
        kind: ResourceKind,
        resource_id: ResourceId,
        resolution: ConflictResolution,
    ) -> SyncResult<ConflictRecord> {
        let mut state = self.lock();
        let index = state
            .conflicts
            .iter()
            .position(|c| c.resource_kind == kind && c.resource_id == resource_id)
            .ok_or(SyncError::NoPendingConflict(resource_id))?;

        let item_id = state.conflicts[index].queue_item_id;
        match resolution {
            ConflictResolution::Pending => return Err(SyncError::NoPendingConflict(resource_id)),
            ConflictResolution::LocalWins => {
                if !state.queue.requeue(item_id) {
                    return Err(SyncError::NotFound(item_id));
                }
            }
            ConflictResolution::RemoteWins => {
                state.queue.remove(item_id).ok_or(SyncError::NotFound(item_id))?;
            }
        }

        let mut record = state.conflicts.remove(index);
        record.resolution = resolution;
        tracing::info!(resource = %resource_id, ?resolution, "conflict resolved manually");
        Ok(record)
    }

    /// Give a permanently failed item a fresh retry budget.
    ///
    /// Conflicted items go through [`resolve_conflict`](Self::resolve_conflict) instead;
    /// items still on automatic backoff keep their attempt count.
    pub fn retry_failed(&self, id: QueueItemId) -> SyncResult<SyncQueueItem> {
        let mut state = self.lock();
        let item = state.queue.get(id).ok_or(SyncError::NotFound(id))?;
        if item.failure_kind() == Some(FailureKind::Conflict) {
            return Err(SyncError::Conflict {
                kind: item.resource_kind,
                resource_id: item.resource_id,
            });
        }
        state
            .queue
            .retry_failed(id)
            .cloned()
            .ok_or(SyncError::NotRetryable(id))
    }

    /// Drop a queued item, e.g. one the user discarded after a permanent failure.
    pub fn discard(&self, id: QueueItemId) -> SyncResult<SyncQueueItem> {
        let mut state = self.lock();
        let item = state.queue.remove(id).ok_or(SyncError::NotFound(id))?;
        state.conflicts.retain(|c| c.queue_item_id != id);
        Ok(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use chrono::TimeZone;
    use serde_json::json;
    use sharex_core::{ManualClock, SequentialIds};
    use uuid::Uuid;

    use crate::resolver::ConflictStrategy;
    use crate::wire::RemoteConflict;

    /// Accepts everything; optionally reports one conflict.
    struct StubTransport {
        conflict: Option<RemoteConflict>,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl SyncTransport for StubTransport {
        async fn push(&self, _request: SyncRequest) -> Result<SyncResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut response = SyncResponse::accepted(server_time());
            response.conflicts.extend(self.conflict.clone());
            Ok(response)
        }
    }

    /// Never answers.
    struct Hanging;

    #[async_trait::async_trait]
    impl SyncTransport for Hanging {
        async fn push(&self, _request: SyncRequest) -> Result<SyncResponse, TransportError> {
            std::future::pending().await
        }
    }

    /// Always offline.
    struct Offline;

    #[async_trait::async_trait]
    impl SyncTransport for Offline {
        async fn push(&self, _request: SyncRequest) -> Result<SyncResponse, TransportError> {
            Err(TransportError::Network("connection refused".into()))
        }
    }

    fn server_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 13, 0, 0).unwrap()
    }

    fn rid(n: u128) -> ResourceId {
        ResourceId::from_uuid(Uuid::from_u128(n))
    }

    fn coordinator<T: SyncTransport>(transport: T, config: SyncConfig) -> SyncCoordinator<T> {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap());
        SyncCoordinator::new(transport, config)
            .with_clock(Arc::new(clock))
            .with_id_generator(Arc::new(SequentialIds::new()))
    }

    fn stub(conflict: Option<RemoteConflict>) -> StubTransport {
        StubTransport {
            conflict,
            calls: AtomicUsize::new(0),
        }
    }

    #[tokio::test]
    async fn idle_cycle_does_not_call_transport() {
        let sync = coordinator(stub(None), SyncConfig::default());
        let report = sync.run_cycle().await.unwrap();
        assert!(report.is_idle());
        assert_eq!(sync.transport.calls.load(Ordering::SeqCst), 0);
        assert!(sync.is_sync_due());
    }

    #[tokio::test]
    async fn accepted_batch_is_acknowledged() {
        let sync = coordinator(stub(None), SyncConfig::default());
        let item = sync.enqueue(OpKind::Create, ResourceKind::Expense, rid(1), json!({"amount": 10}));

        let report = sync.run_cycle().await.unwrap();
        assert_eq!(report.acknowledged, vec![item.id]);
        assert!(sync.queue_items().is_empty());
        assert_eq!(sync.last_sync_time(), Some(server_time()));
        assert!(!sync.is_sync_due());
    }

    #[tokio::test]
    async fn manual_strategy_escalates_and_resolves_by_hand() {
        let conflict = RemoteConflict {
            resource_type: ResourceKind::Expense,
            resource_id: rid(1),
            local_version: None,
            server_version: Some(server_time()),
            server_data: json!({"amount": 99}),
        };
        let sync = coordinator(
            stub(Some(conflict)),
            SyncConfig::default().with_strategy(ConflictStrategy::Manual),
        );
        let item = sync.enqueue(OpKind::Update, ResourceKind::Expense, rid(1), json!({"amount": 10}));

        let report = sync.run_cycle().await.unwrap();
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(sync.state().conflict_count, 1);
        assert!(matches!(
            sync.retry_failed(item.id),
            Err(SyncError::Conflict { .. })
        ));

        let record = sync
            .resolve_conflict(ResourceKind::Expense, rid(1), ConflictResolution::RemoteWins)
            .unwrap();
        assert_eq!(record.resolution, ConflictResolution::RemoteWins);
        assert_eq!(record.remote_payload, json!({"amount": 99}));
        assert!(sync.queue_items().is_empty());
        assert!(sync.pending_conflicts().is_empty());
    }

    #[tokio::test]
    async fn timeout_releases_batch_without_spending_budget() {
        let sync = coordinator(
            Hanging,
            SyncConfig::default().with_request_timeout(Duration::from_millis(20)),
        );
        let item = sync.enqueue(OpKind::Create, ResourceKind::Split, rid(3), json!({}));

        let err = sync.run_cycle().await.unwrap_err();
        assert_eq!(err, SyncError::Timeout(Duration::from_millis(20)));

        let queued = sync.queue_items();
        assert_eq!(queued[0].id, item.id);
        assert_eq!(queued[0].attempt_count, 0);
        assert!(sync.has_ready_work());
        assert!(!sync.state().is_syncing);
    }

    #[tokio::test]
    async fn dropped_cycle_returns_batch_to_pending() {
        let sync = coordinator(Hanging, SyncConfig::default());
        let item = sync.enqueue(OpKind::Update, ResourceKind::Expense, rid(4), json!({}));

        let cancelled = tokio::time::timeout(Duration::from_millis(20), sync.run_cycle()).await;
        assert!(cancelled.is_err());

        let queued = sync.queue_items();
        assert_eq!(queued[0].id, item.id);
        assert_eq!(queued[0].state, crate::types::QueueItemState::Pending);
        assert_eq!(queued[0].attempt_count, 0);
        assert!(sync.has_ready_work());
        assert!(!sync.state().is_syncing);
    }

    #[tokio::test]
    async fn manual_retry_only_applies_to_permanent_failures() {
        let sync = coordinator(Offline, SyncConfig::default());
        let item = sync.enqueue(OpKind::Create, ResourceKind::Expense, rid(5), json!({}));
        assert_eq!(sync.retry_failed(item.id), Err(SyncError::NotRetryable(item.id)));

        let err = sync.run_cycle().await.unwrap_err();
        assert_eq!(err, SyncError::Network("connection refused".into()));

        assert_eq!(sync.retry_failed(item.id), Err(SyncError::NotRetryable(item.id)));
        let queued = sync.queue_items();
        assert_eq!(queued[0].attempt_count, 1);
        assert_eq!(queued[0].failure_kind(), Some(FailureKind::Network));
    }

    #[test]
    fn unknown_ids_are_reported() {
        let sync = coordinator(stub(None), SyncConfig::default());
        let missing = QueueItemId::from_uuid(Uuid::from_u128(404));
        assert_eq!(sync.retry_failed(missing), Err(SyncError::NotFound(missing)));
        assert_eq!(sync.discard(missing), Err(SyncError::NotFound(missing)));
        assert_eq!(
            sync.resolve_conflict(ResourceKind::Expense, rid(1), ConflictResolution::LocalWins),
            Err(SyncError::NoPendingConflict(rid(1)))
        );
    }
}

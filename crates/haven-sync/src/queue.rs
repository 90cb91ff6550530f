//! # Operation Queue Engine
//!
//! Persisted, priority-ordered queue of pending mutations, drained against
//! the [`RequestExecutor`] while the device is online.
//!
//! ## Drain Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Operation Queue Drain                                │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              operations (persisted as "operation_queue")        │   │
//! │  │                                                                 │   │
//! │  │  id  | type   | priority | status     | retries | last attempt │   │
//! │  │  ────┼────────┼──────────┼────────────┼─────────┼───────────── │   │
//! │  │  a1  │ create │ high     │ pending    │ 0       │ -            │   │
//! │  │  b2  │ update │ normal   │ failed     │ 2       │ 10:04:01     │   │
//! │  │  c3  │ upload │ low      │ pending    │ 0       │ -            │   │
//! │  └────────────────────────────┬────────────────────────────────────┘   │
//! │                               │                                         │
//! │                               ▼                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  1. Offline?   → (0, 0, count)                                  │   │
//! │  │  2. Select:    pending, or failed and past its backoff          │   │
//! │  │                ORDER BY priority DESC, created_at ASC           │   │
//! │  │                LIMIT batch_size                                 │   │
//! │  │  3. Mark:      in_progress, last_attempt_at = now; persist      │   │
//! │  │  4. Execute:   all requests of the batch concurrently           │   │
//! │  │  5. Record:    2xx → completed (pruned)                         │   │
//! │  │                else → failed, retry_count += 1                  │   │
//! │  │                persist, publish queue length                    │   │
//! │  │  6. Repeat:    after drain_delay while online, not cancelled,   │   │
//! │  │                and something is still eligible                  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `enqueue` never touches the network and never fails: a persistence error
//! is logged and the operation stays queued in memory.

use futures_util::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Notify};
use tracing::{debug, info, warn};

use haven_core::{
    Clock, NewOperation, OperationId, OperationStatus, QueuedOperation, RetryPolicy, SystemClock,
};
use haven_store::{DataType, PersistentStore, Sensitivity};

use crate::config::SyncConfig;
use crate::error::{SyncResult, TransportError};
use crate::executor::{HttpRequest, HttpResponse, RequestExecutor};
use crate::network::NetworkMonitor;

// =============================================================================
// Constants
// =============================================================================

/// Store key of the persisted operation list.
pub const QUEUE_STORAGE_KEY: &str = "operation_queue";

/// Default pause between drain batches.
const DEFAULT_DRAIN_DELAY: Duration = Duration::from_millis(500);

// =============================================================================
// Drain Results
// =============================================================================

/// Totals of one `drain` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Attempts that got a 2xx.
    pub succeeded: usize,
    /// Attempts that failed (non-2xx or transport error).
    pub failed: usize,
    /// Operations still in the queue afterwards.
    pub remaining: usize,
}

/// What happened to one batch. Passed to the `drain_with` callback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub succeeded: Vec<OperationId>,
    pub failed: Vec<OperationId>,
}

// =============================================================================
// Cancellation
// =============================================================================

/// Cooperative stop signal for a running drain.
///
/// Checked between batches; requests already in flight finish.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Clears the flag so it can guard the next run.
    pub fn reset(&self) {
        self.inner.cancelled.store(false, Ordering::SeqCst);
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

// =============================================================================
// Operation Queue
// =============================================================================

/// The operation queue engine.
pub struct OperationQueue {
    operations: Mutex<Vec<QueuedOperation>>,
    store: Arc<dyn PersistentStore>,
    executor: Arc<dyn RequestExecutor>,
    network: Arc<dyn NetworkMonitor>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    drain_delay: Duration,
    len_tx: watch::Sender<usize>,
}

impl OperationQueue {
    /// Starts building a queue over the given collaborators.
    pub fn builder(
        store: Arc<dyn PersistentStore>,
        executor: Arc<dyn RequestExecutor>,
        network: Arc<dyn NetworkMonitor>,
    ) -> OperationQueueBuilder {
        OperationQueueBuilder::new(store, executor, network)
    }

    /// Loads the persisted list.
    ///
    /// `InProgress` entries were interrupted by a previous shutdown and go
    /// back to `Pending`. An undecodable list is logged and dropped.
    async fn load(store: &dyn PersistentStore) -> SyncResult<Vec<QueuedOperation>> {
        let Some(bytes) = store
            .get_optional(QUEUE_STORAGE_KEY, DataType::Queue, Sensitivity::Sensitive)
            .await?
        else {
            debug!("No persisted operation queue");
            return Ok(Vec::new());
        };

        let mut operations: Vec<QueuedOperation> = match serde_json::from_slice(&bytes) {
            Ok(ops) => ops,
            Err(e) => {
                warn!(?e, "Persisted operation queue is unreadable, starting empty");
                return Ok(Vec::new());
            }
        };

        let mut interrupted = 0;
        for op in operations.iter_mut() {
            if op.status == OperationStatus::InProgress {
                op.reset_interrupted();
                interrupted += 1;
            }
        }
        operations.retain(|op| op.status != OperationStatus::Completed);

        info!(
            count = operations.len(),
            interrupted, "Loaded persisted operation queue"
        );
        Ok(operations)
    }

    /// Writes the whole list. Failures are logged; the in-memory list stays
    /// authoritative and the next mutation retries the write.
    async fn persist(&self, operations: &[QueuedOperation]) {
        let bytes = match serde_json::to_vec(operations) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(?e, "Failed to encode operation queue");
                return;
            }
        };

        if let Err(e) = self
            .store
            .put(QUEUE_STORAGE_KEY, bytes, DataType::Queue, Sensitivity::Sensitive)
            .await
        {
            warn!(?e, count = operations.len(), "Failed to persist operation queue");
        }
    }

    fn publish_len(&self, len: usize) {
        self.len_tx.send_replace(len);
    }

    // =========================================================================
    // Public API
    // =========================================================================

    /// Appends an operation and returns its id. Works offline.
    pub async fn enqueue(&self, request: NewOperation) -> OperationId {
        let op = QueuedOperation::new(request, self.clock.now());
        let id = op.id.clone();

        let mut ops = self.operations.lock().await;
        info!(
            id = %id,
            op_type = %op.op_type,
            endpoint = %op.endpoint,
            priority = %op.priority,
            "Operation enqueued"
        );
        ops.push(op);
        self.persist(&ops).await;
        self.publish_len(ops.len());

        id
    }

    /// Drains until empty, offline, or nothing is eligible.
    pub async fn drain(&self, batch_size: usize) -> DrainReport {
        self.drain_with(batch_size, &CancelFlag::new(), |_| {}).await
    }

    /// [`drain`](Self::drain) with a cancellation flag and a per-batch callback.
    pub async fn drain_with<F>(
        &self,
        batch_size: usize,
        cancel: &CancelFlag,
        mut on_batch: F,
    ) -> DrainReport
    where
        F: FnMut(&BatchOutcome),
    {
        let batch_size = batch_size.max(1);
        let mut report = DrainReport::default();

        if !self.network.is_connected() {
            report.remaining = self.count(None).await;
            debug!(remaining = report.remaining, "Offline, skipping drain");
            return report;
        }

        loop {
            if cancel.is_cancelled() {
                debug!("Drain cancelled");
                break;
            }

            let batch = self.select_batch(batch_size).await;
            if batch.is_empty() {
                debug!("Nothing eligible to drain");
                break;
            }

            debug!(count = batch.len(), "Executing batch");
            let results = join_all(batch.iter().map(|op| async move {
                let result = self.executor.execute(HttpRequest::for_operation(op)).await;
                (op.id.clone(), result)
            }))
            .await;

            let (outcome, left) = self.record_results(results).await;
            report.succeeded += outcome.succeeded.len();
            report.failed += outcome.failed.len();
            on_batch(&outcome);

            info!(
                succeeded = outcome.succeeded.len(),
                failed = outcome.failed.len(),
                remaining = left,
                "Batch finished"
            );

            if left == 0 || !self.network.is_connected() || cancel.is_cancelled() {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.drain_delay) => {}
                _ = cancel.cancelled() => {
                    debug!("Drain cancelled during batch delay");
                    break;
                }
            }
        }

        report.remaining = self.count(None).await;
        report
    }

    /// Picks the next batch and marks it in progress.
    async fn select_batch(&self, batch_size: usize) -> Vec<QueuedOperation> {
        let mut ops = self.operations.lock().await;
        let now = self.clock.now();

        let mut eligible: Vec<usize> = (0..ops.len())
            .filter(|&i| self.policy.is_eligible(&ops[i], now))
            .collect();
        eligible.sort_by(|&a, &b| ops[a].selection_order(&ops[b]));
        eligible.truncate(batch_size);

        let batch: Vec<QueuedOperation> = eligible
            .into_iter()
            .map(|i| {
                ops[i].mark_in_progress(now);
                ops[i].clone()
            })
            .collect();

        if !batch.is_empty() {
            self.persist(&ops).await;
            self.publish_len(ops.len());
        }
        batch
    }

    /// Applies request results, prunes completed operations and persists.
    /// Returns the outcome and the queue length afterwards.
    async fn record_results(
        &self,
        results: Vec<(OperationId, Result<HttpResponse, TransportError>)>,
    ) -> (BatchOutcome, usize) {
        let mut outcome = BatchOutcome::default();
        let mut ops = self.operations.lock().await;

        for (id, result) in results {
            let Some(op) = ops.iter_mut().find(|op| op.id == id) else {
                debug!(id = %id, "Operation removed while in flight");
                continue;
            };

            match result {
                Ok(response) if response.is_success() => {
                    debug!(id = %id, status = response.status, "Operation delivered");
                    op.mark_completed();
                    outcome.succeeded.push(id);
                }
                Ok(response) => {
                    op.mark_failed(format!("HTTP {}", response.status));
                    self.log_failure(op);
                    outcome.failed.push(id);
                }
                Err(e) => {
                    op.mark_failed(e.to_string());
                    self.log_failure(op);
                    outcome.failed.push(id);
                }
            }
        }

        ops.retain(|op| op.status != OperationStatus::Completed);
        self.persist(&ops).await;
        self.publish_len(ops.len());

        (outcome, ops.len())
    }

    fn log_failure(&self, op: &QueuedOperation) {
        let error = op.error_message.as_deref().unwrap_or_default();
        if self.policy.is_exhausted(op) {
            warn!(
                id = %op.id,
                retries = op.retry_count,
                error,
                "Operation exhausted its retries"
            );
        } else {
            debug!(id = %op.id, retries = op.retry_count, error, "Operation failed");
        }
    }

    /// Returns a copy of the operation with this id.
    pub async fn get_operation(&self, id: &OperationId) -> Option<QueuedOperation> {
        self.operations
            .lock()
            .await
            .iter()
            .find(|op| &op.id == id)
            .cloned()
    }

    /// Removes an operation. Returns false if it was not queued.
    pub async fn remove_operation(&self, id: &OperationId) -> bool {
        let mut ops = self.operations.lock().await;
        let Some(index) = ops.iter().position(|op| &op.id == id) else {
            return false;
        };

        ops.remove(index);
        info!(id = %id, "Operation removed");
        self.persist(&ops).await;
        self.publish_len(ops.len());
        true
    }

    /// Drops every operation and the persisted list.
    pub async fn clear(&self) {
        let mut ops = self.operations.lock().await;
        let dropped = ops.len();
        ops.clear();

        if let Err(e) = self
            .store
            .delete(QUEUE_STORAGE_KEY, DataType::Queue, Sensitivity::Sensitive)
            .await
        {
            warn!(?e, "Failed to delete persisted operation queue");
        }
        self.publish_len(0);
        info!(dropped, "Operation queue cleared");
    }

    /// Number of operations, optionally only those with `status`.
    pub async fn count(&self, status: Option<OperationStatus>) -> usize {
        let ops = self.operations.lock().await;
        match status {
            Some(status) => ops.iter().filter(|op| op.status == status).count(),
            None => ops.len(),
        }
    }

    /// Copies of the queued operations in enqueue order.
    pub async fn list(&self, status: Option<OperationStatus>) -> Vec<QueuedOperation> {
        self.operations
            .lock()
            .await
            .iter()
            .filter(|op| status.map_or(true, |s| op.status == s))
            .cloned()
            .collect()
    }

    /// Queue length stream. Starts at the current length.
    pub fn subscribe_len(&self) -> watch::Receiver<usize> {
        self.len_tx.subscribe()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn network(&self) -> &Arc<dyn NetworkMonitor> {
        &self.network
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for [`OperationQueue`].
pub struct OperationQueueBuilder {
    store: Arc<dyn PersistentStore>,
    executor: Arc<dyn RequestExecutor>,
    network: Arc<dyn NetworkMonitor>,
    clock: Option<Arc<dyn Clock>>,
    policy: RetryPolicy,
    drain_delay: Duration,
}

impl OperationQueueBuilder {
    pub fn new(
        store: Arc<dyn PersistentStore>,
        executor: Arc<dyn RequestExecutor>,
        network: Arc<dyn NetworkMonitor>,
    ) -> Self {
        OperationQueueBuilder {
            store,
            executor,
            network,
            clock: None,
            policy: RetryPolicy::default(),
            drain_delay: DEFAULT_DRAIN_DELAY,
        }
    }

    /// Takes retry policy and drain delay from the `[queue]` section.
    pub fn with_config(mut self, config: &SyncConfig) -> Self {
        self.policy = config.retry_policy();
        self.drain_delay = config.drain_delay();
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_drain_delay(mut self, delay: Duration) -> Self {
        self.drain_delay = delay;
        self
    }

    /// Validates the policy, loads persisted operations and builds the queue.
    pub async fn open(self) -> SyncResult<OperationQueue> {
        self.policy.validate()?;

        let operations = OperationQueue::load(self.store.as_ref()).await?;
        let (len_tx, _) = watch::channel(operations.len());

        Ok(OperationQueue {
            operations: Mutex::new(operations),
            store: self.store,
            executor: self.executor,
            network: self.network,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            policy: self.policy,
            drain_delay: self.drain_delay,
            len_tx,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use haven_core::{ManualClock, OperationType, Priority};
    use haven_store::MemoryStore;
    use std::collections::VecDeque;

    use crate::network::ConnectivityMonitor;

    /// Answers with queued statuses, then with `fallback`. Records URLs.
    #[derive(Default)]
    struct ScriptedExecutor {
        script: std::sync::Mutex<VecDeque<Result<u16, TransportError>>>,
        fallback: u16,
        seen: std::sync::Mutex<Vec<String>>,
    }

    impl ScriptedExecutor {
        fn always(status: u16) -> Self {
            ScriptedExecutor {
                fallback: status,
                ..Default::default()
            }
        }

        fn then(self, result: Result<u16, TransportError>) -> Self {
            self.script.lock().unwrap().push_back(result);
            self
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RequestExecutor for ScriptedExecutor {
        async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            self.seen.lock().unwrap().push(request.url);
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or(Ok(self.fallback))
                .map(|status| HttpResponse::new(status, Vec::new()))
        }
    }

    async fn queue(
        store: Arc<MemoryStore>,
        executor: Arc<ScriptedExecutor>,
        network: Arc<ConnectivityMonitor>,
        clock: Arc<ManualClock>,
    ) -> OperationQueue {
        OperationQueue::builder(store, executor, network)
            .with_clock(clock)
            .with_drain_delay(Duration::ZERO)
            .open()
            .await
            .unwrap()
    }

    fn create(endpoint: &str) -> NewOperation {
        NewOperation::new(OperationType::Create, endpoint)
    }

    #[tokio::test]
    async fn test_enqueue_offline_persists_and_publishes() {
        let store = Arc::new(MemoryStore::new());
        let executor = Arc::new(ScriptedExecutor::always(200));
        let q = queue(
            store.clone(),
            executor.clone(),
            Arc::new(ConnectivityMonitor::offline()),
            Arc::new(ManualClock::starting_now()),
        )
        .await;
        let len = q.subscribe_len();

        let id = q.enqueue(create("/journals")).await;

        assert_eq!(q.count(None).await, 1);
        assert_eq!(*len.borrow(), 1);
        assert_eq!(
            q.get_operation(&id).await.unwrap().status,
            OperationStatus::Pending
        );
        assert!(store
            .get(QUEUE_STORAGE_KEY, DataType::Queue, Sensitivity::Sensitive)
            .await
            .is_ok());
        assert!(executor.seen().is_empty());
    }

    /// Notes whether the length stream fired before each request went out.
    #[derive(Default)]
    struct LenWatchingExecutor {
        len: std::sync::Mutex<Option<watch::Receiver<usize>>>,
        changed: std::sync::Mutex<Vec<bool>>,
    }

    #[async_trait]
    impl RequestExecutor for LenWatchingExecutor {
        async fn execute(&self, _request: HttpRequest) -> Result<HttpResponse, TransportError> {
            let changed = self
                .len
                .lock()
                .unwrap()
                .as_ref()
                .map_or(false, |rx| rx.has_changed().unwrap_or(false));
            self.changed.lock().unwrap().push(changed);
            Ok(HttpResponse::new(200, Vec::new()))
        }
    }

    #[tokio::test]
    async fn test_marking_in_progress_notifies_len_subscribers() {
        let executor = Arc::new(LenWatchingExecutor::default());
        let q = OperationQueue::builder(
            Arc::new(MemoryStore::new()),
            executor.clone(),
            Arc::new(ConnectivityMonitor::online()),
        )
        .with_drain_delay(Duration::ZERO)
        .open()
        .await
        .unwrap();
        q.enqueue(create("/journals")).await;

        let len = q.subscribe_len();
        assert!(!len.has_changed().unwrap());
        *executor.len.lock().unwrap() = Some(len);

        assert_eq!(q.drain(10).await.succeeded, 1);
        assert_eq!(*executor.changed.lock().unwrap(), vec![true]);
    }

    #[tokio::test]
    async fn test_drain_offline_reports_remaining() {
        let q = queue(
            Arc::new(MemoryStore::new()),
            Arc::new(ScriptedExecutor::always(200)),
            Arc::new(ConnectivityMonitor::offline()),
            Arc::new(ManualClock::starting_now()),
        )
        .await;
        q.enqueue(create("/a")).await;
        q.enqueue(create("/b")).await;

        let report = q.drain(10).await;
        assert_eq!(
            report,
            DrainReport {
                succeeded: 0,
                failed: 0,
                remaining: 2
            }
        );
    }

    #[tokio::test]
    async fn test_enqueue_fails_to_persist_but_still_queues() {
        let store = Arc::new(MemoryStore::new());
        store.set_fail_writes(true);
        let q = queue(
            store,
            Arc::new(ScriptedExecutor::always(200)),
            Arc::new(ConnectivityMonitor::offline()),
            Arc::new(ManualClock::starting_now()),
        )
        .await;

        q.enqueue(create("/journals")).await;
        assert_eq!(q.count(None).await, 1);
    }

    #[tokio::test]
    async fn test_batch_respects_priority_then_age() {
        let clock = Arc::new(ManualClock::starting_now());
        let executor = Arc::new(ScriptedExecutor::always(200));
        let q = queue(
            Arc::new(MemoryStore::new()),
            executor.clone(),
            Arc::new(ConnectivityMonitor::online()),
            clock.clone(),
        )
        .await;

        q.enqueue(create("/low").priority(Priority::Low)).await;
        clock.advance(Duration::from_secs(1));
        q.enqueue(create("/high").priority(Priority::High)).await;
        clock.advance(Duration::from_secs(1));
        q.enqueue(create("/normal")).await;

        let mut batches = Vec::new();
        let report = q
            .drain_with(2, &CancelFlag::new(), |outcome| {
                batches.push(outcome.succeeded.len())
            })
            .await;

        assert_eq!(report.succeeded, 3);
        assert_eq!(batches, vec![2, 1]);
        assert_eq!(executor.seen(), vec!["/high", "/normal", "/low"]);
    }

    #[tokio::test]
    async fn test_failure_then_backoff_then_success() {
        let clock = Arc::new(ManualClock::starting_now());
        let executor = Arc::new(
            ScriptedExecutor::always(201).then(Err(TransportError::Connect("refused".into()))),
        );
        let q = queue(
            Arc::new(MemoryStore::new()),
            executor,
            Arc::new(ConnectivityMonitor::online()),
            clock.clone(),
        )
        .await;
        let id = q.enqueue(create("/checkins")).await;

        let first = q.drain(5).await;
        assert_eq!((first.succeeded, first.failed, first.remaining), (0, 1, 1));
        let op = q.get_operation(&id).await.unwrap();
        assert_eq!(op.status, OperationStatus::Failed);
        assert_eq!(op.retry_count, 1);
        assert!(op.error_message.unwrap().contains("refused"));

        // Still inside the backoff window.
        let early = q.drain(5).await;
        assert_eq!((early.succeeded, early.failed, early.remaining), (0, 0, 1));

        clock.advance(Duration::from_secs(10));
        let later = q.drain(5).await;
        assert_eq!((later.succeeded, later.failed, later.remaining), (1, 0, 0));
        assert!(q.get_operation(&id).await.is_none());
    }

    #[tokio::test]
    async fn test_non_2xx_is_a_failure() {
        let q = queue(
            Arc::new(MemoryStore::new()),
            Arc::new(ScriptedExecutor::always(404)),
            Arc::new(ConnectivityMonitor::online()),
            Arc::new(ManualClock::starting_now()),
        )
        .await;
        q.enqueue(create("/tools/missing")).await;

        let report = q.drain(1).await;
        assert_eq!(report.failed, 1);
        let failed = q.list(Some(OperationStatus::Failed)).await;
        assert_eq!(failed[0].error_message.as_deref(), Some("HTTP 404"));
    }

    #[tokio::test]
    async fn test_remove_twice() {
        let q = queue(
            Arc::new(MemoryStore::new()),
            Arc::new(ScriptedExecutor::always(200)),
            Arc::new(ConnectivityMonitor::offline()),
            Arc::new(ManualClock::starting_now()),
        )
        .await;
        let keep = q.enqueue(create("/a")).await;
        let gone = q.enqueue(create("/b")).await;

        assert!(q.remove_operation(&gone).await);
        assert!(!q.remove_operation(&gone).await);
        assert_eq!(q.count(None).await, 1);
        assert!(q.get_operation(&keep).await.is_some());
    }

    #[tokio::test]
    async fn test_reload_resets_interrupted_operations() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::starting_now());

        let mut interrupted = QueuedOperation::new(create("/uploads"), clock.now());
        interrupted.mark_in_progress(clock.now());
        let mut done = QueuedOperation::new(create("/done"), clock.now());
        done.mark_completed();
        store
            .put(
                QUEUE_STORAGE_KEY,
                serde_json::to_vec(&vec![interrupted.clone(), done]).unwrap(),
                DataType::Queue,
                Sensitivity::Sensitive,
            )
            .await
            .unwrap();

        let q = queue(
            store,
            Arc::new(ScriptedExecutor::always(200)),
            Arc::new(ConnectivityMonitor::offline()),
            clock,
        )
        .await;

        let ops = q.list(None).await;
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].id, interrupted.id);
        assert_eq!(ops[0].status, OperationStatus::Pending);
    }

    #[tokio::test]
    async fn test_unreadable_queue_starts_empty() {
        let store = Arc::new(MemoryStore::new());
        store
            .put(
                QUEUE_STORAGE_KEY,
                b"not json".to_vec(),
                DataType::Queue,
                Sensitivity::Sensitive,
            )
            .await
            .unwrap();

        let q = queue(
            store,
            Arc::new(ScriptedExecutor::always(200)),
            Arc::new(ConnectivityMonitor::offline()),
            Arc::new(ManualClock::starting_now()),
        )
        .await;
        assert_eq!(q.count(None).await, 0);
    }

    #[tokio::test]
    async fn test_clear_removes_persisted_list() {
        let store = Arc::new(MemoryStore::new());
        let q = queue(
            store.clone(),
            Arc::new(ScriptedExecutor::always(200)),
            Arc::new(ConnectivityMonitor::offline()),
            Arc::new(ManualClock::starting_now()),
        )
        .await;
        q.enqueue(create("/a")).await;

        q.clear().await;

        assert_eq!(q.count(None).await, 0);
        assert_eq!(*q.subscribe_len().borrow(), 0);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_cancelled_flag_stops_before_first_batch() {
        let executor = Arc::new(ScriptedExecutor::always(200));
        let q = queue(
            Arc::new(MemoryStore::new()),
            executor.clone(),
            Arc::new(ConnectivityMonitor::online()),
            Arc::new(ManualClock::starting_now()),
        )
        .await;
        q.enqueue(create("/a")).await;

        let cancel = CancelFlag::new();
        cancel.cancel();
        let report = q.drain_with(10, &cancel, |_| {}).await;

        assert_eq!(report.remaining, 1);
        assert!(executor.seen().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_flag_wakes_waiters() {
        let cancel = CancelFlag::new();
        let waiter = {
            let cancel = cancel.clone();
            tokio::spawn(async move { cancel.cancelled().await })
        };
        cancel.cancel();
        waiter.await.unwrap();

        cancel.reset();
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_invalid_policy_is_rejected() {
        let policy = RetryPolicy {
            jitter: 2.0,
            ..RetryPolicy::default()
        };
        let result = OperationQueue::builder(
            Arc::new(MemoryStore::new()),
            Arc::new(ScriptedExecutor::always(200)),
            Arc::new(ConnectivityMonitor::offline()),
        )
        .with_retry_policy(policy)
        .open()
        .await;
        assert!(result.is_err());
    }
}

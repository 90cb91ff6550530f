//! # Sync Orchestrator
//!
//! Decides when the operation queue is drained and reports how it went.
//!
//! ## Orchestrator Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     SyncOrchestrator Architecture                       │
//! │                                                                         │
//! │   sync() ──────────────┐          NetworkMonitor ── Connected ──┐       │
//! │   (explicit)           │                                        │       │
//! │                        ▼                                        ▼       │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │  1. offline?              → NetworkUnavailable                   │  │
//! │  │  2. already running?      → SyncInProgress                       │  │
//! │  │  3. queue empty?          → QueueEmpty                           │  │
//! │  │  4. status = InProgress                                          │  │
//! │  │  5. wait out min_interval since the previous start (async)       │  │
//! │  │  6. queue.drain_with(batch_size, cancel)                         │  │
//! │  │  7. status = Completed (no failures, nothing left) | Failed      │  │
//! │  │  8. publish SyncReport                                           │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! │                                                                         │
//! │  STREAMS:                                                              │
//! │  • subscribe_status()  - Idle / InProgress / Completed / Failed        │
//! │  • subscribe_results() - SyncReport after every finished sync          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use haven_core::{Clock, SystemClock};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::network::{NetworkMonitor, NetworkStatus};
use crate::queue::{CancelFlag, DrainReport, OperationQueue};

/// Capacity of the status and result broadcast channels.
const EVENT_CHANNEL_CAPACITY: usize = 64;

// =============================================================================
// Sync Status
// =============================================================================

/// Orchestrator state, published on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncStatus {
    #[default]
    Idle,
    InProgress,
    Completed,
    Failed,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Idle => write!(f, "idle"),
            SyncStatus::InProgress => write!(f, "in_progress"),
            SyncStatus::Completed => write!(f, "completed"),
            SyncStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Result of one finished sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub succeeded: usize,
    pub failed: usize,
    pub remaining: usize,
    pub finished_at: DateTime<Utc>,
}

impl SyncReport {
    fn new(drain: DrainReport, finished_at: DateTime<Utc>) -> Self {
        SyncReport {
            succeeded: drain.succeeded,
            failed: drain.failed,
            remaining: drain.remaining,
            finished_at,
        }
    }

    /// Nothing failed and nothing is left.
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.remaining == 0
    }
}

#[derive(Debug, Default)]
struct SyncState {
    status: SyncStatus,
    last_started: Option<Instant>,
    last_report: Option<SyncReport>,
}

/// Releases the single-flight flag when a sync ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// =============================================================================
// Sync Orchestrator
// =============================================================================

/// Drives the operation queue.
pub struct SyncOrchestrator {
    queue: Arc<OperationQueue>,
    network: Arc<dyn NetworkMonitor>,
    clock: Arc<dyn Clock>,
    batch_size: usize,
    min_interval: Duration,
    auto_sync: AtomicBool,
    running: AtomicBool,
    cancel: CancelFlag,
    state: Mutex<SyncState>,
    status_tx: broadcast::Sender<SyncStatus>,
    results_tx: broadcast::Sender<SyncReport>,
}

impl SyncOrchestrator {
    /// Creates an orchestrator configured from `config`.
    pub fn new(queue: Arc<OperationQueue>, config: &SyncConfig) -> SyncResult<Self> {
        SyncOrchestratorBuilder::new(queue).with_config(config).build()
    }

    pub fn builder(queue: Arc<OperationQueue>) -> SyncOrchestratorBuilder {
        SyncOrchestratorBuilder::new(queue)
    }

    fn state(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn transition(&self, status: SyncStatus) {
        self.state().status = status;
        debug!(%status, "Sync status changed");
        let _ = self.status_tx.send(status);
    }

    /// Time left before another cycle may start.
    fn throttle_remaining(&self) -> Option<Duration> {
        let last = self.state().last_started?;
        self.min_interval
            .checked_sub(last.elapsed())
            .filter(|d| !d.is_zero())
    }

    // =========================================================================
    // Public API
    // =========================================================================

    /// Drains the queue once.
    ///
    /// ## Errors
    /// - `NetworkUnavailable` when offline
    /// - `SyncInProgress` when another sync is running
    /// - `QueueEmpty` when nothing is queued
    /// - `Cancelled` when `cancel_sync` interrupted this run
    pub async fn sync(&self) -> SyncResult<SyncReport> {
        if !self.network.is_connected() {
            debug!("Sync requested while offline");
            return Err(SyncError::NetworkUnavailable);
        }

        let _guard = RunGuard::acquire(&self.running).ok_or(SyncError::SyncInProgress)?;

        let pending = self.queue.count(None).await;
        if pending == 0 {
            return Err(SyncError::QueueEmpty);
        }

        self.cancel.reset();
        self.transition(SyncStatus::InProgress);
        info!(pending, "Sync started");

        if let Some(wait) = self.throttle_remaining() {
            debug!(?wait, "Waiting for minimum sync interval");
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.cancel.cancelled() => {
                    info!("Sync cancelled while throttled");
                    return Err(SyncError::Cancelled);
                }
            }
        }
        self.state().last_started = Some(Instant::now());

        let drain = self
            .queue
            .drain_with(self.batch_size, &self.cancel, |outcome| {
                debug!(
                    succeeded = outcome.succeeded.len(),
                    failed = outcome.failed.len(),
                    "Sync batch finished"
                );
            })
            .await;

        let report = SyncReport::new(drain, self.clock.now());
        let status = if report.is_clean() {
            SyncStatus::Completed
        } else {
            SyncStatus::Failed
        };

        // Checked under the state lock so a concurrent cancel_sync either
        // lands before this point or sees the final status.
        {
            let mut state = self.state();
            if self.cancel.is_cancelled() {
                drop(state);
                info!(
                    succeeded = report.succeeded,
                    remaining = report.remaining,
                    "Sync cancelled"
                );
                return Err(SyncError::Cancelled);
            }
            state.status = status;
            state.last_report = Some(report.clone());
        }
        debug!(%status, "Sync status changed");
        let _ = self.status_tx.send(status);
        let _ = self.results_tx.send(report.clone());

        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            remaining = report.remaining,
            %status,
            "Sync finished"
        );
        Ok(report)
    }

    /// Stops a running sync after its current batch. Returns false if no
    /// sync was running.
    pub fn cancel_sync(&self) -> bool {
        {
            let mut state = self.state();
            if state.status != SyncStatus::InProgress {
                return false;
            }
            self.cancel.cancel();
            state.status = SyncStatus::Idle;
        }

        info!("Cancelling sync");
        debug!(status = %SyncStatus::Idle, "Sync status changed");
        let _ = self.status_tx.send(SyncStatus::Idle);
        true
    }

    pub fn set_auto_sync(&self, enabled: bool) {
        self.auto_sync.store(enabled, Ordering::SeqCst);
        info!(enabled, "Auto-sync toggled");
    }

    pub fn is_auto_sync_enabled(&self) -> bool {
        self.auto_sync.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> SyncStatus {
        self.state().status
    }

    /// Report of the last sync that ran to the end.
    pub fn last_report(&self) -> Option<SyncReport> {
        self.state().last_report.clone()
    }

    pub fn last_sync_at(&self) -> Option<DateTime<Utc>> {
        self.state().last_report.as_ref().map(|r| r.finished_at)
    }

    pub async fn pending_operations_count(&self) -> usize {
        self.queue.count(None).await
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<SyncStatus> {
        self.status_tx.subscribe()
    }

    pub fn subscribe_results(&self) -> broadcast::Receiver<SyncReport> {
        self.results_tx.subscribe()
    }

    pub fn queue(&self) -> &Arc<OperationQueue> {
        &self.queue
    }

    // =========================================================================
    // Auto-sync
    // =========================================================================

    /// Spawns the task that syncs whenever connectivity comes back.
    pub fn spawn_auto_sync(self: Arc<Self>) -> AutoSyncHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let mut network_rx = self.network.subscribe();
        network_rx.borrow_and_update();
        tokio::spawn(Self::auto_sync_loop(self, network_rx, shutdown_rx));
        AutoSyncHandle { shutdown_tx }
    }

    async fn auto_sync_loop(
        this: Arc<Self>,
        mut network_rx: watch::Receiver<NetworkStatus>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        info!("Auto-sync watcher starting");

        loop {
            tokio::select! {
                changed = network_rx.changed() => {
                    if changed.is_err() {
                        debug!("Network monitor dropped");
                        break;
                    }
                    let connected = network_rx.borrow_and_update().is_connected();
                    if connected {
                        this.on_connected().await;
                    }
                }

                _ = shutdown_rx.recv() => {
                    info!("Auto-sync watcher received shutdown");
                    break;
                }
            }
        }

        info!("Auto-sync watcher stopped");
    }

    async fn on_connected(self: &Arc<Self>) {
        if !self.is_auto_sync_enabled() {
            debug!("Connectivity restored, auto-sync disabled");
            return;
        }

        let pending = self.pending_operations_count().await;
        if pending == 0 {
            return;
        }

        info!(pending, "Connectivity restored, starting auto-sync");
        let this = Arc::clone(self);
        tokio::spawn(async move {
            match this.sync().await {
                Ok(_) => {}
                Err(e @ (SyncError::SyncInProgress | SyncError::QueueEmpty)) => {
                    debug!(%e, "Auto-sync skipped");
                }
                Err(e) => warn!(?e, "Auto-sync failed"),
            }
        });
    }
}

// =============================================================================
// Auto-sync Handle
// =============================================================================

/// Handle for stopping the auto-sync watcher.
#[derive(Debug, Clone)]
pub struct AutoSyncHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl AutoSyncHandle {
    /// Signals the watcher to stop.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for [`SyncOrchestrator`].
pub struct SyncOrchestratorBuilder {
    queue: Arc<OperationQueue>,
    clock: Option<Arc<dyn Clock>>,
    batch_size: usize,
    min_interval: Duration,
    auto_sync: bool,
}

impl SyncOrchestratorBuilder {
    pub fn new(queue: Arc<OperationQueue>) -> Self {
        let defaults = SyncConfig::default();
        SyncOrchestratorBuilder {
            queue,
            clock: None,
            batch_size: defaults.queue.batch_size,
            min_interval: defaults.min_sync_interval(),
            auto_sync: defaults.sync.auto_sync,
        }
    }

    /// Takes batch size, throttle and auto-sync flag from `config`.
    pub fn with_config(mut self, config: &SyncConfig) -> Self {
        self.batch_size = config.queue.batch_size;
        self.min_interval = config.min_sync_interval();
        self.auto_sync = config.sync.auto_sync;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    pub fn with_auto_sync(mut self, enabled: bool) -> Self {
        self.auto_sync = enabled;
        self
    }

    pub fn build(self) -> SyncResult<SyncOrchestrator> {
        if self.batch_size == 0 {
            return Err(SyncError::InvalidConfig(
                "batch_size must be greater than 0".into(),
            ));
        }

        let (status_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (results_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let network = Arc::clone(self.queue.network());

        Ok(SyncOrchestrator {
            queue: self.queue,
            network,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            batch_size: self.batch_size,
            min_interval: self.min_interval,
            auto_sync: AtomicBool::new(self.auto_sync),
            running: AtomicBool::new(false),
            cancel: CancelFlag::new(),
            state: Mutex::new(SyncState::default()),
            status_tx,
            results_tx,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

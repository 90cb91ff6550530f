//! # Network Monitor
//!
//! Connectivity signal consumed by the queue engine (pre-flight and between
//! batches) and by the orchestrator (auto-sync trigger).
//!
//! ## Connectivity Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Connectivity Sources                                 │
//! │                                                                         │
//! │  Platform reachability API          TCP probe (spawn_probe)            │
//! │  (NWPathMonitor, ConnectivityMgr)   connect(host:port) every interval  │
//! │            │                                   │                        │
//! │            ▼                                   ▼                        │
//! │     monitor.set(status)  ───────►  ConnectivityMonitor  ◄──── set()    │
//! │                                        │                                │
//! │                                        │ watch::Receiver<NetworkStatus> │
//! │                          ┌─────────────┴─────────────┐                  │
//! │                          ▼                           ▼                  │
//! │                   OperationQueue              SyncOrchestrator          │
//! │                   is_connected()              auto-sync on Connected    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, info};

// =============================================================================
// Network Status
// =============================================================================

/// Reachability as last reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkStatus {
    Connected,
    #[default]
    Disconnected,
}

impl NetworkStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, NetworkStatus::Connected)
    }
}

impl From<bool> for NetworkStatus {
    fn from(connected: bool) -> Self {
        if connected {
            NetworkStatus::Connected
        } else {
            NetworkStatus::Disconnected
        }
    }
}

impl fmt::Display for NetworkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkStatus::Connected => write!(f, "connected"),
            NetworkStatus::Disconnected => write!(f, "disconnected"),
        }
    }
}

// =============================================================================
// Monitor Trait
// =============================================================================

/// Source of connectivity information.
pub trait NetworkMonitor: Send + Sync {
    /// Current reachability.
    fn is_connected(&self) -> bool;

    /// Stream of changes. The receiver starts at the current value.
    fn subscribe(&self) -> watch::Receiver<NetworkStatus>;
}

// =============================================================================
// Connectivity Monitor
// =============================================================================

/// [`NetworkMonitor`] whose state is pushed in from outside.
///
/// Subscribers are only woken on actual transitions.
#[derive(Debug)]
pub struct ConnectivityMonitor {
    status_tx: watch::Sender<NetworkStatus>,
}

impl ConnectivityMonitor {
    pub fn new(initial: NetworkStatus) -> Self {
        let (status_tx, _) = watch::channel(initial);
        ConnectivityMonitor { status_tx }
    }

    pub fn online() -> Self {
        Self::new(NetworkStatus::Connected)
    }

    pub fn offline() -> Self {
        Self::new(NetworkStatus::Disconnected)
    }

    /// Records a new status. Returns true if it changed.
    pub fn set(&self, status: NetworkStatus) -> bool {
        let changed = self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });

        if changed {
            info!(%status, "Connectivity changed");
        }
        changed
    }

    pub fn set_connected(&self, connected: bool) -> bool {
        self.set(NetworkStatus::from(connected))
    }

    pub fn status(&self) -> NetworkStatus {
        *self.status_tx.borrow()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::offline()
    }
}

impl NetworkMonitor for ConnectivityMonitor {
    fn is_connected(&self) -> bool {
        self.status().is_connected()
    }

    fn subscribe(&self) -> watch::Receiver<NetworkStatus> {
        self.status_tx.subscribe()
    }
}

// =============================================================================
// Reachability Probe
// =============================================================================

/// Settings for [`spawn_probe`].
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// `host:port` that must accept a TCP connection.
    pub target: String,

    /// Wait between probes while connected.
    pub interval: Duration,

    /// Timeout of a single connection attempt.
    pub connect_timeout: Duration,

    /// First wait after a failed probe.
    pub initial_backoff: Duration,

    /// Longest wait between failed probes.
    pub max_backoff: Duration,
}

impl ProbeConfig {
    pub fn new(target: impl Into<String>) -> Self {
        ProbeConfig {
            target: target.into(),
            interval: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(5),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(60),
        }
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_backoff,
            max_interval: self.max_backoff,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

/// Handle for stopping a running probe.
#[derive(Debug, Clone)]
pub struct ProbeHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl ProbeHandle {
    /// Stops the probe task.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

/// Spawns a task that keeps `monitor` up to date by connecting to
/// `config.target`. Failed probes back off exponentially.
pub fn spawn_probe(monitor: Arc<ConnectivityMonitor>, config: ProbeConfig) -> ProbeHandle {
    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    tokio::spawn(run_probe(monitor, config, shutdown_rx));
    ProbeHandle { shutdown_tx }
}

async fn run_probe(
    monitor: Arc<ConnectivityMonitor>,
    config: ProbeConfig,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    info!(addr = %config.target, "Connectivity probe starting");
    let mut backoff = config.create_backoff();

    loop {
        let reachable = matches!(
            timeout(config.connect_timeout, TcpStream::connect(&config.target)).await,
            Ok(Ok(_))
        );
        monitor.set_connected(reachable);

        let wait = if reachable {
            backoff.reset();
            config.interval
        } else {
            backoff.next_backoff().unwrap_or(config.max_backoff)
        };
        debug!(reachable, ?wait, "Probe finished");

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = shutdown_rx.recv() => break,
        }
    }

    info!("Connectivity probe stopped");
}

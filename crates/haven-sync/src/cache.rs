//! # Read-Through Cache Engine
//!
//! Keeps a local snapshot of remote collections (tools, favorites,
//! recommendations, ...) that readers use without touching the network.
//!
//! ## Snapshot Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Cache Snapshot Lifecycle                             │
//! │                                                                         │
//! │  open()  ── load "cache.<namespace>" ──►  snapshot (or cold)           │
//! │                                                                         │
//! │  refresh(force)                                                        │
//! │    ├─ fresh && !force        → Ok(false)                               │
//! │    ├─ refresh already running→ Ok(false)  (no second fan-out)          │
//! │    ├─ offline                → Err(Network)                            │
//! │    └─ GET every collection concurrently                                │
//! │         ├─ any failure       → Err(..), committed snapshot untouched   │
//! │         └─ all ok            → persist → swap → CacheEvent::Refreshed  │
//! │                                                                         │
//! │  READERS                                                               │
//! │  get(id) / get_all(name)  read the last committed Arc<CacheSnapshot>   │
//! │  and never wait on a refresh in flight.                                │
//! │                                                                         │
//! │  FRESHNESS                                                             │
//! │  is_valid() = last_updated_at is set && now - last_updated_at < ttl    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Collection Membership
//! ```text
//! Membership::All        every entity; update() upserts
//! Membership::Filter(f)  entities where f(e); update() inserts or removes
//! Membership::Fetched    server-chosen; update() only replaces existing
//! ```

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use haven_core::{Clock, SystemClock};
use haven_store::{DataType, PersistentStore, Sensitivity};

use crate::config::SyncConfig;
use crate::error::{CacheError, CacheResult};
use crate::executor::{HttpRequest, RequestExecutor};
use crate::network::NetworkMonitor;

/// Capacity of the cache event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Default time-to-live of a snapshot.
const DEFAULT_TTL: Duration = Duration::from_secs(3600);

// =============================================================================
// Entities & Collections
// =============================================================================

/// Something the cache can hold.
pub trait CacheEntity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable identifier used by `get` and `update`.
    fn cache_id(&self) -> &str;
}

/// How `update` maintains a collection.
pub enum Membership<E> {
    /// Holds every entity.
    All,
    /// Holds the entities matching the predicate (favorites, downloaded, ...).
    Filter(fn(&E) -> bool),
    /// Holds whatever the server returned.
    Fetched,
}

impl<E> fmt::Debug for Membership<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Membership::All => write!(f, "All"),
            Membership::Filter(_) => write!(f, "Filter"),
            Membership::Fetched => write!(f, "Fetched"),
        }
    }
}

/// One named collection and where to fetch it.
#[derive(Debug)]
pub struct CollectionSpec<E> {
    pub name: String,
    pub endpoint: String,
    pub membership: Membership<E>,
}

impl<E> CollectionSpec<E> {
    pub fn all(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        CollectionSpec {
            name: name.into(),
            endpoint: endpoint.into(),
            membership: Membership::All,
        }
    }

    pub fn filtered(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        keep: fn(&E) -> bool,
    ) -> Self {
        CollectionSpec {
            name: name.into(),
            endpoint: endpoint.into(),
            membership: Membership::Filter(keep),
        }
    }

    pub fn fetched(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        CollectionSpec {
            name: name.into(),
            endpoint: endpoint.into(),
            membership: Membership::Fetched,
        }
    }
}

/// Every collection as of `last_updated_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSnapshot<E> {
    pub collections: BTreeMap<String, Vec<E>>,
    pub last_updated_at: DateTime<Utc>,
}

/// Published after every successful mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    Refreshed { at: DateTime<Utc> },
    Updated { id: String },
    Cleared,
}

/// Clears the refreshing flag when a refresh ends.
struct RefreshGuard<'a>(&'a AtomicBool);

impl<'a> RefreshGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RefreshGuard(flag))
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// =============================================================================
// Cache Engine
// =============================================================================

/// TTL read-through cache over a fixed set of collections.
pub struct CacheEngine<E: CacheEntity> {
    storage_key: String,
    collections: Vec<CollectionSpec<E>>,
    snapshot: RwLock<Option<Arc<CacheSnapshot<E>>>>,
    commit_lock: Mutex<()>,
    refreshing: AtomicBool,
    ttl: Duration,
    store: Arc<dyn PersistentStore>,
    executor: Arc<dyn RequestExecutor>,
    network: Arc<dyn NetworkMonitor>,
    clock: Arc<dyn Clock>,
    events_tx: broadcast::Sender<CacheEvent>,
}

impl<E: CacheEntity> CacheEngine<E> {
    pub fn builder(
        namespace: impl Into<String>,
        store: Arc<dyn PersistentStore>,
        executor: Arc<dyn RequestExecutor>,
        network: Arc<dyn NetworkMonitor>,
    ) -> CacheEngineBuilder<E> {
        CacheEngineBuilder::new(namespace, store, executor, network)
    }

    fn current(&self) -> Option<Arc<CacheSnapshot<E>>> {
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn swap(&self, next: Option<Arc<CacheSnapshot<E>>>) {
        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = next;
    }

    fn publish(&self, event: CacheEvent) {
        let _ = self.events_tx.send(event);
    }

    async fn persist(&self, snapshot: &CacheSnapshot<E>) -> CacheResult<()> {
        let bytes = serde_json::to_vec(snapshot)?;
        self.store
            .put(&self.storage_key, bytes, DataType::Cache, Sensitivity::NonSensitive)
            .await?;
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Looks an entity up in the cached collections.
    pub fn get(&self, id: &str) -> CacheResult<E> {
        let snapshot = self
            .current()
            .ok_or_else(|| CacheError::NotFound(id.to_string()))?;

        self.collections
            .iter()
            .filter_map(|spec| snapshot.collections.get(&spec.name))
            .flat_map(|items| items.iter())
            .find(|e| e.cache_id() == id)
            .cloned()
            .ok_or_else(|| CacheError::NotFound(id.to_string()))
    }

    /// Cached contents of a collection, stale or not. Empty when cold.
    pub fn get_all(&self, collection: &str) -> Vec<E> {
        self.current()
            .and_then(|s| s.collections.get(collection).cloned())
            .unwrap_or_default()
    }

    /// [`get_all`](Self::get_all) restricted to entities matching `filter`.
    pub fn get_all_where<F>(&self, collection: &str, filter: F) -> Vec<E>
    where
        F: Fn(&E) -> bool,
    {
        self.current()
            .and_then(|s| {
                s.collections
                    .get(collection)
                    .map(|items| items.iter().filter(|e| filter(e)).cloned().collect())
            })
            .unwrap_or_default()
    }

    /// Contents of a collection, or `CacheExpired` when the snapshot is stale.
    pub fn get_fresh(&self, collection: &str) -> CacheResult<Vec<E>> {
        if !self.is_valid() {
            return Err(CacheError::CacheExpired);
        }
        Ok(self.get_all(collection))
    }

    /// The snapshot exists and is younger than the TTL.
    pub fn is_valid(&self) -> bool {
        let Some(updated) = self.last_updated_at() else {
            return false;
        };
        match (self.clock.now() - updated).to_std() {
            Ok(age) => age < self.ttl,
            // Updated "in the future": clock moved backwards.
            Err(_) => true,
        }
    }

    pub fn last_updated_at(&self) -> Option<DateTime<Utc>> {
        self.current().map(|s| s.last_updated_at)
    }

    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::Acquire)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events_tx.subscribe()
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Refetches every collection and commits them together.
    ///
    /// Returns `Ok(true)` when a new snapshot was committed and `Ok(false)`
    /// when nothing was done (still fresh, or a refresh is already running).
    pub async fn refresh(&self, force: bool) -> CacheResult<bool> {
        if !force && self.is_valid() {
            debug!(key = %self.storage_key, "Cache fresh, skipping refresh");
            return Ok(false);
        }

        let Some(_refreshing) = RefreshGuard::acquire(&self.refreshing) else {
            debug!(key = %self.storage_key, "Refresh already running");
            return Ok(false);
        };

        if !self.network.is_connected() {
            return Err(CacheError::Network("offline".into()));
        }

        info!(
            key = %self.storage_key,
            collections = self.collections.len(),
            force,
            "Refreshing cache"
        );

        let fetched = join_all(self.collections.iter().map(|spec| self.fetch(spec))).await;

        let mut collections = BTreeMap::new();
        for (spec, result) in self.collections.iter().zip(fetched) {
            match result {
                Ok(items) => {
                    collections.insert(spec.name.clone(), items);
                }
                Err(e) => {
                    warn!(?e, collection = %spec.name, "Cache refresh aborted");
                    return Err(e);
                }
            }
        }

        let snapshot = CacheSnapshot {
            collections,
            last_updated_at: self.clock.now(),
        };
        let at = snapshot.last_updated_at;

        let _commit = self.commit_lock.lock().await;
        self.persist(&snapshot).await?;
        self.swap(Some(Arc::new(snapshot)));
        self.publish(CacheEvent::Refreshed { at });

        info!(key = %self.storage_key, "Cache refreshed");
        Ok(true)
    }

    async fn fetch(&self, spec: &CollectionSpec<E>) -> CacheResult<Vec<E>> {
        let response = self
            .executor
            .execute(HttpRequest::get(spec.endpoint.as_str()))
            .await
            .map_err(|e| CacheError::Network(e.to_string()))?;

        if !response.is_success() {
            return Err(CacheError::Network(format!(
                "HTTP {} from {}",
                response.status, spec.endpoint
            )));
        }

        let items: Vec<E> = serde_json::from_slice(&response.body)?;
        debug!(collection = %spec.name, count = items.len(), "Fetched collection");
        Ok(items)
    }

    /// Writes one changed entity into every collection it belongs to.
    ///
    /// Leaves `last_updated_at` alone; fails with `NotFound` on a cold cache.
    pub async fn update(&self, entity: E) -> CacheResult<()> {
        let _commit = self.commit_lock.lock().await;
        let current = self
            .current()
            .ok_or_else(|| CacheError::NotFound("cache is empty".into()))?;

        let mut next = (*current).clone();
        let id = entity.cache_id().to_string();

        for spec in &self.collections {
            let items = next.collections.entry(spec.name.clone()).or_default();
            let position = items.iter().position(|e| e.cache_id() == id);

            match (&spec.membership, position) {
                (Membership::All, _) => upsert(items, position, &entity),
                (Membership::Filter(keep), _) if keep(&entity) => {
                    upsert(items, position, &entity)
                }
                (Membership::Filter(_), Some(i)) => {
                    items.remove(i);
                }
                (Membership::Fetched, Some(i)) => items[i] = entity.clone(),
                (Membership::Filter(_), None) | (Membership::Fetched, None) => {}
            }
        }

        self.persist(&next).await?;
        self.swap(Some(Arc::new(next)));
        debug!(id = %id, "Cache entity updated");
        self.publish(CacheEvent::Updated { id });
        Ok(())
    }

    /// Drops the snapshot in memory and on disk.
    pub async fn clear(&self) -> CacheResult<()> {
        let _commit = self.commit_lock.lock().await;
        self.store
            .delete(&self.storage_key, DataType::Cache, Sensitivity::NonSensitive)
            .await?;
        self.swap(None);
        self.publish(CacheEvent::Cleared);
        info!(key = %self.storage_key, "Cache cleared");
        Ok(())
    }
}

fn upsert<E: Clone>(items: &mut Vec<E>, position: Option<usize>, entity: &E) {
    match position {
        Some(i) => items[i] = entity.clone(),
        None => items.push(entity.clone()),
    }
}

impl<E: CacheEntity> CacheEngine<E> {
    /// Returns cached data now and refreshes in the background when stale.
    pub fn read_through(self: &Arc<Self>, collection: &str) -> Vec<E> {
        let items = self.get_all(collection);

        if !self.is_valid() && !self.is_refreshing() && self.network.is_connected() {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                if let Err(e) = this.refresh(false).await {
                    warn!(?e, key = %this.storage_key, "Background cache refresh failed");
                }
            });
        }

        items
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for [`CacheEngine`].
pub struct CacheEngineBuilder<E: CacheEntity> {
    namespace: String,
    store: Arc<dyn PersistentStore>,
    executor: Arc<dyn RequestExecutor>,
    network: Arc<dyn NetworkMonitor>,
    collections: Vec<CollectionSpec<E>>,
    clock: Option<Arc<dyn Clock>>,
    ttl: Duration,
}

impl<E: CacheEntity> CacheEngineBuilder<E> {
    pub fn new(
        namespace: impl Into<String>,
        store: Arc<dyn PersistentStore>,
        executor: Arc<dyn RequestExecutor>,
        network: Arc<dyn NetworkMonitor>,
    ) -> Self {
        CacheEngineBuilder {
            namespace: namespace.into(),
            store,
            executor,
            network,
            collections: Vec::new(),
            clock: None,
            ttl: DEFAULT_TTL,
        }
    }

    pub fn collection(mut self, spec: CollectionSpec<E>) -> Self {
        self.collections.push(spec);
        self
    }

    /// Takes the TTL from the `[cache]` section.
    pub fn with_config(mut self, config: &SyncConfig) -> Self {
        self.ttl = config.cache_ttl();
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Loads the persisted snapshot, if any, and builds the engine.
    ///
    /// An undecodable snapshot is logged and the cache starts cold.
    pub async fn open(self) -> CacheResult<CacheEngine<E>> {
        let storage_key = format!("cache.{}", self.namespace);

        let snapshot = match self
            .store
            .get_optional(&storage_key, DataType::Cache, Sensitivity::NonSensitive)
            .await?
        {
            Some(bytes) => match serde_json::from_slice::<CacheSnapshot<E>>(&bytes) {
                Ok(snapshot) => {
                    info!(
                        key = %storage_key,
                        last_updated_at = %snapshot.last_updated_at,
                        "Loaded cache snapshot"
                    );
                    Some(Arc::new(snapshot))
                }
                Err(e) => {
                    warn!(?e, key = %storage_key, "Cache snapshot unreadable, starting cold");
                    None
                }
            },
            None => None,
        };

        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(CacheEngine {
            storage_key,
            collections: self.collections,
            snapshot: RwLock::new(snapshot),
            commit_lock: Mutex::new(()),
            refreshing: AtomicBool::new(false),
            ttl: self.ttl,
            store: self.store,
            executor: self.executor,
            network: self.network,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            events_tx,
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
    use haven_core::ManualClock;
    use haven_store::MemoryStore;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    use crate::error::TransportError;
    use crate::executor::HttpResponse;
    use crate::network::ConnectivityMonitor;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Tool {
        id: String,
        name: String,
        favorite: bool,
    }

    impl CacheEntity for Tool {
        fn cache_id(&self) -> &str {
            &self.id
        }
    }

    fn tool(id: &str, favorite: bool) -> Tool {
        Tool {
            id: id.into(),
            name: format!("Tool {id}"),
            favorite,
        }
    }

    /// Serves canned bodies per endpoint; can hold requests at a gate.
    #[derive(Default)]
    struct FakeApi {
        routes: std::sync::Mutex<HashMap<String, (u16, Vec<u8>)>>,
        calls: AtomicUsize,
        gated: AtomicBool,
        started: Notify,
        gate: Notify,
    }

    impl FakeApi {
        fn serve(&self, endpoint: &str, status: u16, tools: &[Tool]) {
            let body = serde_json::to_vec(tools).unwrap();
            self.routes
                .lock()
                .unwrap()
                .insert(endpoint.into(), (status, body));
        }

        fn serve_raw(&self, endpoint: &str, body: &[u8]) {
            self.routes
                .lock()
                .unwrap()
                .insert(endpoint.into(), (200, body.to_vec()));
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RequestExecutor for FakeApi {
        async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.started.notify_one();
            if self.gated.load(Ordering::SeqCst) {
                self.gate.notified().await;
            }
            let route = self.routes.lock().unwrap().get(&request.url).cloned();
            match route {
                Some((status, body)) => Ok(HttpResponse::new(status, body)),
                None => Err(TransportError::Connect("no route".into())),
            }
        }
    }

    fn default_routes(api: &FakeApi) {
        api.serve("/tools", 200, &[tool("breathe", true), tool("walk", false)]);
        api.serve("/tools/favorites", 200, &[tool("breathe", true)]);
        api.serve("/tools/recommended", 200, &[tool("walk", false)]);
    }

    async fn engine(
        store: Arc<MemoryStore>,
        api: Arc<FakeApi>,
        network: Arc<ConnectivityMonitor>,
        clock: Arc<ManualClock>,
    ) -> CacheEngine<Tool> {
        CacheEngine::builder("tools", store, api, network)
            .collection(CollectionSpec::all("all", "/tools"))
            .collection(CollectionSpec::filtered(
                "favorites",
                "/tools/favorites",
                |t: &Tool| t.favorite,
            ))
            .collection(CollectionSpec::fetched("recommended", "/tools/recommended"))
            .with_ttl(Duration::from_secs(60))
            .with_clock(clock)
            .open()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_refresh_commits_all_collections() {
        let api = Arc::new(FakeApi::default());
        default_routes(&api);
        let cache = engine(
            Arc::new(MemoryStore::new()),
            api.clone(),
            Arc::new(ConnectivityMonitor::online()),
            Arc::new(ManualClock::starting_now()),
        )
        .await;
        let mut events = cache.subscribe();

        assert!(!cache.is_valid());
        assert!(cache.refresh(false).await.unwrap());

        assert!(cache.is_valid());
        assert_eq!(cache.get_all("all").len(), 2);
        assert_eq!(cache.get_all("favorites"), vec![tool("breathe", true)]);
        assert_eq!(cache.get("walk").unwrap().name, "Tool walk");
        assert!(matches!(cache.get("sleep"), Err(CacheError::NotFound(_))));
        assert!(matches!(
            events.recv().await.unwrap(),
            CacheEvent::Refreshed { .. }
        ));

        // Fresh and not forced: no fan-out.
        assert!(!cache.refresh(false).await.unwrap());
        assert_eq!(api.calls(), 3);
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_previous_snapshot() {
        let api = Arc::new(FakeApi::default());
        default_routes(&api);
        let clock = Arc::new(ManualClock::starting_now());
        let cache = engine(
            Arc::new(MemoryStore::new()),
            api.clone(),
            Arc::new(ConnectivityMonitor::online()),
            clock.clone(),
        )
        .await;
        cache.refresh(true).await.unwrap();
        let before = cache.last_updated_at();

        clock.advance(Duration::from_secs(5));
        api.serve("/tools", 200, &[tool("new", false)]);
        api.serve("/tools/recommended", 500, &[]);

        let err = cache.refresh(true).await.unwrap_err();
        assert!(matches!(err, CacheError::Network(_)));
        assert_eq!(cache.last_updated_at(), before);
        assert_eq!(cache.get_all("all").len(), 2);
        assert!(cache.get("new").is_err());
    }

    #[tokio::test]
    async fn test_undecodable_body_is_invalid_data() {
        let api = Arc::new(FakeApi::default());
        default_routes(&api);
        api.serve_raw("/tools/favorites", b"{\"oops\":");
        let cache = engine(
            Arc::new(MemoryStore::new()),
            api,
            Arc::new(ConnectivityMonitor::online()),
            Arc::new(ManualClock::starting_now()),
        )
        .await;

        assert!(matches!(
            cache.refresh(true).await,
            Err(CacheError::InvalidData(_))
        ));
        assert!(cache.last_updated_at().is_none());
    }

    #[tokio::test]
    async fn test_offline_refresh_is_network_error() {
        let api = Arc::new(FakeApi::default());
        let cache = engine(
            Arc::new(MemoryStore::new()),
            api.clone(),
            Arc::new(ConnectivityMonitor::offline()),
            Arc::new(ManualClock::starting_now()),
        )
        .await;

        assert!(matches!(
            cache.refresh(false).await,
            Err(CacheError::Network(_))
        ));
        assert_eq!(api.calls(), 0);
        assert!(!cache.is_refreshing());
    }

    #[tokio::test]
    async fn test_storage_failure_does_not_commit() {
        let api = Arc::new(FakeApi::default());
        default_routes(&api);
        let store = Arc::new(MemoryStore::new());
        store.set_fail_writes(true);
        let cache = engine(
            store,
            api,
            Arc::new(ConnectivityMonitor::online()),
            Arc::new(ManualClock::starting_now()),
        )
        .await;

        assert!(matches!(
            cache.refresh(true).await,
            Err(CacheError::Storage(_))
        ));
        assert!(cache.get_all("all").is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_refresh_fans_out_once() {
        let api = Arc::new(FakeApi::default());
        default_routes(&api);
        api.gated.store(true, Ordering::SeqCst);
        let cache = Arc::new(
            engine(
                Arc::new(MemoryStore::new()),
                api.clone(),
                Arc::new(ConnectivityMonitor::online()),
                Arc::new(ManualClock::starting_now()),
            )
            .await,
        );

        let first = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.refresh(true).await })
        };
        api.started.notified().await;

        assert!(cache.is_refreshing());
        assert!(!cache.refresh(true).await.unwrap());

        api.gate.notify_waiters();
        assert!(first.await.unwrap().unwrap());
        assert_eq!(api.calls(), 3);
    }

    #[tokio::test]
    async fn test_ttl_expiry_keeps_serving_stale_data() {
        let api = Arc::new(FakeApi::default());
        default_routes(&api);
        let clock = Arc::new(ManualClock::starting_now());
        let cache = engine(
            Arc::new(MemoryStore::new()),
            api,
            Arc::new(ConnectivityMonitor::online()),
            clock.clone(),
        )
        .await;
        cache.refresh(false).await.unwrap();

        clock.advance(Duration::from_secs(61));

        assert!(!cache.is_valid());
        assert_eq!(cache.get_all("all").len(), 2);
        assert!(matches!(
            cache.get_fresh("all"),
            Err(CacheError::CacheExpired)
        ));
    }

    #[tokio::test]
    async fn test_update_maintains_memberships() {
        let api = Arc::new(FakeApi::default());
        default_routes(&api);
        let clock = Arc::new(ManualClock::starting_now());
        let cache = engine(
            Arc::new(MemoryStore::new()),
            api,
            Arc::new(ConnectivityMonitor::online()),
            clock.clone(),
        )
        .await;
        cache.refresh(false).await.unwrap();
        let refreshed_at = cache.last_updated_at();
        clock.advance(Duration::from_secs(1));

        // "walk" becomes a favorite.
        cache.update(tool("walk", true)).await.unwrap();
        assert_eq!(cache.get_all("favorites").len(), 2);
        assert!(cache.get_all("recommended")[0].favorite);

        // "breathe" stops being one.
        cache.update(tool("breathe", false)).await.unwrap();
        assert_eq!(cache.get_all("favorites"), vec![tool("walk", true)]);

        // Unknown entity: added to "all" only.
        cache.update(tool("sleep", false)).await.unwrap();
        assert_eq!(cache.get_all("all").len(), 3);
        assert_eq!(cache.get_all("recommended").len(), 1);

        assert_eq!(cache.last_updated_at(), refreshed_at);
        assert_eq!(
            cache.get_all_where("all", |t| t.favorite),
            vec![tool("walk", true)]
        );
    }

    #[tokio::test]
    async fn test_update_on_cold_cache() {
        let cache = engine(
            Arc::new(MemoryStore::new()),
            Arc::new(FakeApi::default()),
            Arc::new(ConnectivityMonitor::online()),
            Arc::new(ManualClock::starting_now()),
        )
        .await;
        assert!(matches!(
            cache.update(tool("walk", true)).await,
            Err(CacheError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_snapshot_survives_reopen_and_clear_removes_it() {
        let api = Arc::new(FakeApi::default());
        default_routes(&api);
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::starting_now());
        let network = Arc::new(ConnectivityMonitor::online());

        let cache = engine(store.clone(), api.clone(), network.clone(), clock.clone()).await;
        cache.refresh(false).await.unwrap();

        let reopened = engine(store.clone(), api.clone(), network.clone(), clock.clone()).await;
        assert!(reopened.is_valid());
        assert_eq!(reopened.get_all("favorites").len(), 1);

        let mut events = reopened.subscribe();
        reopened.clear().await.unwrap();
        assert_eq!(events.recv().await.unwrap(), CacheEvent::Cleared);
        assert!(reopened.last_updated_at().is_none());
        assert!(store.is_empty().await);

        let cold = engine(store, api, network, clock).await;
        assert!(cold.get_all("all").is_empty());
    }

    #[tokio::test]
    async fn test_failed_clear_keeps_snapshot() {
        let api = Arc::new(FakeApi::default());
        default_routes(&api);
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::starting_now());
        let network = Arc::new(ConnectivityMonitor::online());

        let cache = engine(store.clone(), api.clone(), network.clone(), clock.clone()).await;
        cache.refresh(false).await.unwrap();
        let refreshed_at = cache.last_updated_at();
        let mut events = cache.subscribe();

        store.set_fail_writes(true);
        assert!(matches!(cache.clear().await, Err(CacheError::Storage(_))));

        assert_eq!(cache.last_updated_at(), refreshed_at);
        assert_eq!(cache.get_all("all").len(), 2);
        assert!(events.try_recv().is_err());

        store.set_fail_writes(false);
        let reopened = engine(store, api, network, clock).await;
        assert_eq!(reopened.last_updated_at(), refreshed_at);
    }

    #[tokio::test]
    async fn test_unreadable_snapshot_starts_cold() {
        let store = Arc::new(MemoryStore::new());
        store
            .put("cache.tools", b"[]".to_vec(), DataType::Cache, Sensitivity::NonSensitive)
            .await
            .unwrap();

        let cache = engine(
            store,
            Arc::new(FakeApi::default()),
            Arc::new(ConnectivityMonitor::online()),
            Arc::new(ManualClock::starting_now()),
        )
        .await;
        assert!(cache.last_updated_at().is_none());
    }

    #[tokio::test]
    async fn test_read_through_refreshes_in_background() {
        let api = Arc::new(FakeApi::default());
        default_routes(&api);
        let cache = Arc::new(
            engine(
                Arc::new(MemoryStore::new()),
                api.clone(),
                Arc::new(ConnectivityMonitor::online()),
                Arc::new(ManualClock::starting_now()),
            )
            .await,
        );
        let mut events = cache.subscribe();

        assert!(cache.read_through("all").is_empty());

        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cache.read_through("all").len(), 2);
        assert_eq!(api.calls(), 3);
    }
}

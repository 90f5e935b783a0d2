//! Sharded, replicated, capacity-bounded database.
//!
//! A database with shards is a pure router: it hashes the request's user id
//! with FNV-1a and hands the request to the shard owning that hash. Without
//! shards it serves the request itself against an in-memory key table.
//!
//! Successful writes on a primary fan out to every replica on detached tasks,
//! each waiting out the replica's replication lag first. Nothing waits for
//! those tasks unless the caller asks for a [`ReplicationHandle`] through
//! [`Database::write_with_replication`].

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sysdesign_core::{Component, ComponentKind, MetricsRecorder, Pacing};
use sysdesign_types::{
    fnv1a_32, ComponentError, ComponentId, ComponentMetrics, DatabaseType, HashRange, Request,
    Response,
};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

pub const DB_READ_LATENCY: Duration = Duration::from_millis(10);
pub const DB_WRITE_LATENCY: Duration = Duration::from_millis(15);

/// Default delay before a replica applies a write from its primary.
pub const DEFAULT_REPLICATION_LAG: Duration = Duration::from_millis(50);

const DB_BASE_COST: f64 = 0.05;
const DB_COST_PER_GIB: f64 = 0.01;
const BYTES_PER_GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Sub-database owning a slice of the hash space.
#[derive(Clone)]
pub struct Shard {
    pub range: HashRange,
    pub database: Arc<Database>,
}

#[derive(Debug, Default)]
struct KeyTable {
    sizes: HashMap<String, u64>,
    used: u64,
}

impl KeyTable {
    /// Record `key` with `size` bytes, replacing any previous size.
    fn store(&mut self, key: &str, size: u64, capacity: u64) -> Result<(), (u64, u64)> {
        let previous = self.sizes.get(key).copied().unwrap_or(0);
        let available = capacity - (self.used - previous);
        if size > available {
            return Err((size, available));
        }
        self.sizes.insert(key.to_string(), size);
        self.used = self.used - previous + size;
        Ok(())
    }
}

/// Completion signal for the replication tasks spawned by one write.
#[derive(Debug, Default)]
pub struct ReplicationHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl ReplicationHandle {
    /// Number of replica tasks spawned.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait until every replica has applied (or skipped) the write.
    pub async fn wait(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Replication task failed");
            }
        }
    }
}

/// Database component.
pub struct Database {
    id: ComponentId,
    db_type: DatabaseType,
    region: Option<String>,
    capacity: u64,
    data: Mutex<KeyTable>,
    shards: RwLock<Vec<Shard>>,
    replicas: RwLock<Vec<Arc<Database>>>,
    is_primary: AtomicBool,
    /// Lag this database applies when acting as a replica.
    replication_lag: RwLock<Duration>,
    healthy: AtomicBool,
    pacing: Pacing,
    metrics: MetricsRecorder,
}

impl Database {
    /// Create an empty, unsharded primary holding at most `capacity` bytes.
    pub fn new(id: impl Into<ComponentId>, db_type: DatabaseType, capacity: u64) -> Self {
        Self {
            id: id.into(),
            db_type,
            region: None,
            capacity,
            data: Mutex::new(KeyTable::default()),
            shards: RwLock::new(Vec::new()),
            replicas: RwLock::new(Vec::new()),
            is_primary: AtomicBool::new(true),
            replication_lag: RwLock::new(DEFAULT_REPLICATION_LAG),
            healthy: AtomicBool::new(true),
            pacing: Pacing::default(),
            metrics: MetricsRecorder::new(),
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_replication_lag(self, lag: Duration) -> Self {
        *self.replication_lag.write() = lag;
        self
    }

    pub fn db_type(&self) -> DatabaseType {
        self.db_type
    }

    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn used_bytes(&self) -> u64 {
        self.data.lock().used
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.data.lock().sizes.contains_key(key)
    }

    pub fn is_primary(&self) -> bool {
        self.is_primary.load(Ordering::Relaxed)
    }

    pub fn replication_lag(&self) -> Duration {
        *self.replication_lag.read()
    }

    pub fn set_replication_lag(&self, lag: Duration) {
        *self.replication_lag.write() = lag;
    }

    /// Attach a replica. The replica stops accepting direct writes.
    pub fn add_replica(&self, replica: Arc<Database>) {
        replica.is_primary.store(false, Ordering::Relaxed);
        self.replicas.write().push(replica);
    }

    pub fn replicas(&self) -> Vec<Arc<Database>> {
        self.replicas.read().clone()
    }

    /// Route hashes in `range` to `database`.
    pub fn add_shard(&self, range: HashRange, database: Arc<Database>) {
        self.shards.write().push(Shard { range, database });
    }

    /// Split the hash space evenly across `databases`, replacing any
    /// existing shards.
    pub fn shard_evenly(&self, databases: Vec<Arc<Database>>) {
        let ranges = HashRange::partition(databases.len() as u32);
        *self.shards.write() = ranges
            .into_iter()
            .zip(databases)
            .map(|(range, database)| Shard { range, database })
            .collect();
    }

    pub fn shards(&self) -> Vec<Shard> {
        self.shards.read().clone()
    }

    /// Perform a request and return a handle that resolves once the
    /// replication it triggered (if any) has finished.
    pub async fn write_with_replication(&self, request: &Request) -> (Response, ReplicationHandle) {
        self.serve(request).await
    }

    fn select_shard(&self, user_id: &str) -> Result<Arc<Database>, u32> {
        let hash = fnv1a_32(user_id.as_bytes());
        self.shards
            .read()
            .iter()
            .find(|shard| shard.range.contains(hash))
            .map(|shard| shard.database.clone())
            .ok_or(hash)
    }

    fn apply_write(&self, request: &Request) -> Result<(), ComponentError> {
        self.data
            .lock()
            .store(&request.path, request.data_size, self.capacity)
            .map_err(|(requested, available)| ComponentError::StorageFull {
                component: self.id.clone(),
                requested,
                available,
            })
    }

    fn replicate(&self, request: &Request) -> ReplicationHandle {
        let tasks = self
            .replicas
            .read()
            .iter()
            .map(|replica| {
                let replica = replica.clone();
                let request = request.clone();
                tokio::spawn(async move {
                    replica.pacing.pause(replica.replication_lag()).await;
                    if !replica.is_healthy() {
                        warn!(replica = %replica.id, request = %request.id, "Skipping replication to unhealthy replica");
                        return;
                    }
                    match replica.apply_write(&request) {
                        Ok(()) => debug!(replica = %replica.id, key = %request.path, "Replicated write"),
                        Err(e) => warn!(replica = %replica.id, error = %e, "Replication failed"),
                    }
                })
            })
            .collect();
        ReplicationHandle { tasks }
    }

    fn serve<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, (Response, ReplicationHandle)> {
        async move {
            let start = Instant::now();
            let (response, replication) = self.serve_inner(request, start).await;
            self.metrics.record(&response);
            (response, replication)
        }
        .boxed()
    }

    async fn serve_inner(&self, request: &Request, start: Instant) -> (Response, ReplicationHandle) {
        let fail = |error| {
            (
                Response::failure(request.id, self.id.clone(), start.elapsed(), error),
                ReplicationHandle::default(),
            )
        };

        if !self.is_healthy() {
            return fail(ComponentError::Unhealthy(self.id.clone()));
        }

        if !self.shards.read().is_empty() {
            return match self.select_shard(&request.user_id) {
                Ok(shard) => {
                    debug!(component = %self.id, shard = %shard.id, request = %request.id, "Routing to shard");
                    let (response, replication) = shard.serve(request).await;
                    (response.through(&self.id, start.elapsed()), replication)
                }
                Err(hash) => fail(ComponentError::NoShard {
                    component: self.id.clone(),
                    hash,
                }),
            };
        }

        if request.is_write() {
            if !self.is_primary() {
                return fail(ComponentError::WriteToReplica(self.id.clone()));
            }
            let result = self.apply_write(request);
            let replication = if result.is_ok() {
                self.replicate(request)
            } else {
                ReplicationHandle::default()
            };
            self.pacing.pause(DB_WRITE_LATENCY).await;
            let response = match result {
                Ok(()) => Response::success(
                    request.id,
                    self.id.clone(),
                    start.elapsed(),
                    request.data_size,
                ),
                Err(e) => {
                    warn!(component = %self.id, error = %e, "Write rejected");
                    Response::failure(request.id, self.id.clone(), start.elapsed(), e)
                }
            };
            return (response, replication);
        }

        self.pacing.pause(DB_READ_LATENCY).await;
        (
            Response::success(request.id, self.id.clone(), start.elapsed(), request.data_size),
            ReplicationHandle::default(),
        )
    }
}

#[async_trait]
impl Component for Database {
    fn id(&self) -> &ComponentId {
        &self.id
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Database(self.db_type)
    }

    async fn process(&self, request: &Request) -> Response {
        // Dropping the handle detaches the replication tasks.
        let (response, _) = self.serve(request).await;
        response
    }

    fn metrics(&self) -> ComponentMetrics {
        self.metrics.snapshot()
    }

    fn cost(&self) -> f64 {
        DB_BASE_COST + self.capacity as f64 / BYTES_PER_GIB * DB_COST_PER_GIB
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }
}

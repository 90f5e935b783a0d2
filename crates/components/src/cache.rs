//! Capacity-bounded TTL cache in front of a backend.
//!
//! Reads are served from the entry table when present and unexpired;
//! misses fall through to the backend and populate an entry sized to the
//! backend's response. Writes always pass straight through: the cache
//! neither writes through nor invalidates.
//!
//! Eviction is deterministic for every policy:
//!
//! - **LRU**: smallest logical access stamp
//! - **LFU**: lowest access count, earliest insertion on ties
//! - **FIFO**: insertion order
//! - **Random**: index drawn from a per-cache seeded `ChaCha8Rng`

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sysdesign_core::{Component, ComponentKind, Downstream, MetricsRecorder, Pacing};
use sysdesign_types::{
    fnv1a_32, ComponentError, ComponentId, ComponentMetrics, EvictionPolicy, Request, Response,
};
use tokio::time::Instant;
use tracing::{debug, trace};

/// Latency of a cache hit.
pub const CACHE_READ_LATENCY: Duration = Duration::from_millis(1);

/// Default entry lifetime.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

const CACHE_BASE_COST: f64 = 0.02;
const CACHE_COST_PER_GIB: f64 = 0.005;
const BYTES_PER_GIB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, Clone)]
struct Entry {
    size: u64,
    expires_at: Instant,
    /// Logical clock value of the last access; unique per entry.
    last_access: u64,
    access_count: u64,
}

enum Lookup {
    Hit(u64),
    Expired,
    Miss,
}

/// Entry table plus the bookkeeping eviction needs.
#[derive(Debug)]
struct Store {
    entries: IndexMap<String, Entry>,
    used: u64,
    clock: u64,
    rng: ChaCha8Rng,
}

impl Store {
    fn new(seed: u64) -> Self {
        Self {
            entries: IndexMap::new(),
            used: 0,
            clock: 0,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn lookup(&mut self, key: &str, now: Instant) -> Lookup {
        let stamp = self.tick();
        match self.entries.get_mut(key) {
            None => Lookup::Miss,
            Some(entry) if now >= entry.expires_at => Lookup::Expired,
            Some(entry) => {
                entry.last_access = stamp;
                entry.access_count += 1;
                Lookup::Hit(entry.size)
            }
        }
    }

    fn remove(&mut self, key: &str) -> Option<Entry> {
        let entry = self.entries.shift_remove(key)?;
        self.used -= entry.size;
        Some(entry)
    }

    /// Remove `key` only if it is still expired at `now`. A fresh entry
    /// stored under the same key in the meantime survives.
    fn remove_if_expired(&mut self, key: &str, now: Instant) -> bool {
        let expired = self
            .entries
            .get(key)
            .is_some_and(|entry| now >= entry.expires_at);
        if expired {
            self.remove(key);
        }
        expired
    }

    fn victim(&mut self, policy: EvictionPolicy) -> Option<String> {
        let index = match policy {
            EvictionPolicy::Lru => self
                .entries
                .values()
                .enumerate()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(i, _)| i),
            // min_by_key returns the first minimum, i.e. the earliest insertion.
            EvictionPolicy::Lfu => self
                .entries
                .values()
                .enumerate()
                .min_by_key(|(_, entry)| entry.access_count)
                .map(|(i, _)| i),
            EvictionPolicy::Fifo => (!self.entries.is_empty()).then_some(0),
            EvictionPolicy::Random => {
                (!self.entries.is_empty()).then(|| self.rng.gen_range(0..self.entries.len()))
            }
        }?;
        self.entries.get_index(index).map(|(key, _)| key.clone())
    }

    /// Insert an entry, evicting until it fits. Returns false (and stores
    /// nothing) if the entry is larger than the whole capacity.
    fn insert(
        &mut self,
        key: &str,
        size: u64,
        expires_at: Instant,
        capacity: u64,
        policy: EvictionPolicy,
    ) -> bool {
        if size > capacity {
            return false;
        }
        self.remove(key);
        while self.used + size > capacity {
            let Some(victim) = self.victim(policy) else {
                break;
            };
            trace!(key = %victim, ?policy, "Evicting cache entry");
            self.remove(&victim);
        }
        let stamp = self.tick();
        self.entries.insert(
            key.to_string(),
            Entry {
                size,
                expires_at,
                last_access: stamp,
                access_count: 1,
            },
        );
        self.used += size;
        true
    }
}

/// Cache component (Redis, Memcached, ...).
pub struct Cache {
    id: ComponentId,
    flavor: String,
    region: Option<String>,
    capacity: u64,
    policy: RwLock<EvictionPolicy>,
    ttl: RwLock<Duration>,
    store: Arc<Mutex<Store>>,
    backend: RwLock<Option<Downstream>>,
    healthy: AtomicBool,
    pacing: Pacing,
    metrics: MetricsRecorder,
}

impl Cache {
    /// Create an empty LRU cache holding at most `capacity` bytes.
    pub fn new(id: impl Into<ComponentId>, flavor: impl Into<String>, capacity: u64) -> Self {
        let id = id.into();
        let seed = u64::from(fnv1a_32(id.as_str().as_bytes()));
        Self {
            id,
            flavor: flavor.into(),
            region: None,
            capacity,
            policy: RwLock::new(EvictionPolicy::default()),
            ttl: RwLock::new(DEFAULT_CACHE_TTL),
            store: Arc::new(Mutex::new(Store::new(seed))),
            backend: RwLock::new(None),
            healthy: AtomicBool::new(true),
            pacing: Pacing::default(),
            metrics: MetricsRecorder::new(),
        }
    }

    pub fn with_policy(self, policy: EvictionPolicy) -> Self {
        *self.policy.write() = policy;
        self
    }

    pub fn with_ttl(self, ttl: Duration) -> Self {
        *self.ttl.write() = ttl;
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    /// Seed for random eviction.
    pub fn with_seed(self, seed: u64) -> Self {
        self.store.lock().rng = ChaCha8Rng::seed_from_u64(seed);
        self
    }

    pub fn set_backend(&self, backend: Option<Downstream>) {
        *self.backend.write() = backend;
    }

    pub fn backend(&self) -> Option<Downstream> {
        self.backend.read().clone()
    }

    pub fn set_policy(&self, policy: EvictionPolicy) {
        *self.policy.write() = policy;
    }

    pub fn policy(&self) -> EvictionPolicy {
        *self.policy.read()
    }

    /// Applies to entries stored from now on.
    pub fn set_ttl(&self, ttl: Duration) {
        *self.ttl.write() = ttl;
    }

    pub fn ttl(&self) -> Duration {
        *self.ttl.read()
    }

    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn used_bytes(&self) -> u64 {
        self.store.lock().used
    }

    pub fn len(&self) -> usize {
        self.store.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.store.lock().entries.contains_key(key)
    }

    /// Store `size` bytes under `key`, evicting as needed. Returns false if
    /// the entry alone exceeds the capacity and was not stored.
    pub fn set(&self, key: &str, size: u64) -> bool {
        let expires_at = Instant::now() + self.ttl();
        let policy = self.policy();
        self.store
            .lock()
            .insert(key, size, expires_at, self.capacity, policy)
    }

    /// Size of the live entry under `key`, counting as an access.
    pub fn get(&self, key: &str) -> Option<u64> {
        match self.store.lock().lookup(key, Instant::now()) {
            Lookup::Hit(size) => Some(size),
            Lookup::Expired | Lookup::Miss => None,
        }
    }

    /// Schedule removal of an expired key without blocking the caller.
    fn expire_later(&self, key: &str) {
        let store = self.store.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            if store.lock().remove_if_expired(&key, Instant::now()) {
                trace!(key = %key, "Removed expired cache entry");
            }
        });
    }

    async fn serve(&self, request: &Request, start: Instant) -> Response {
        if request.is_read() {
            let lookup = self.store.lock().lookup(&request.path, start);
            match lookup {
                Lookup::Hit(size) => {
                    self.metrics.record_cache_lookup(true);
                    debug!(component = %self.id, key = %request.path, "Cache hit");
                    self.pacing.pause(CACHE_READ_LATENCY).await;
                    return Response::success(request.id, self.id.clone(), start.elapsed(), size)
                        .with_cache_hit();
                }
                Lookup::Expired => {
                    self.metrics.record_cache_lookup(false);
                    self.expire_later(&request.path);
                }
                Lookup::Miss => self.metrics.record_cache_lookup(false),
            }
            debug!(component = %self.id, key = %request.path, "Cache miss");
        }

        let Some(backend) = self.backend() else {
            return Response::failure(
                request.id,
                self.id.clone(),
                start.elapsed(),
                ComponentError::NoBackend(self.id.clone()),
            );
        };

        let mut response = backend.forward(request).await;
        if request.is_read() && response.is_success() {
            self.set(&request.path, response.data_size);
        }
        response.cache_hit = false;
        response.through(&self.id, start.elapsed())
    }
}

#[async_trait]
impl Component for Cache {
    fn id(&self) -> &ComponentId {
        &self.id
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Cache(self.flavor.clone())
    }

    async fn process(&self, request: &Request) -> Response {
        let start = Instant::now();

        if !self.is_healthy() {
            // Bypassed: the backend's response is returned untouched.
            let response = match self.backend() {
                Some(backend) => backend.forward(request).await,
                None => Response::failure(
                    request.id,
                    self.id.clone(),
                    start.elapsed(),
                    ComponentError::Unhealthy(self.id.clone()),
                ),
            };
            self.metrics.record_outcome(false, start.elapsed(), 0);
            return response;
        }

        let response = self.serve(request, start).await;
        self.metrics.record(&response);
        response
    }

    fn metrics(&self) -> ComponentMetrics {
        self.metrics.snapshot()
    }

    fn cost(&self) -> f64 {
        CACHE_BASE_COST + self.capacity as f64 / BYTES_PER_GIB * CACHE_COST_PER_GIB
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sysdesign_test_helpers::{wait_until, Responder};

    fn cache(capacity: u64, policy: EvictionPolicy) -> Cache {
        Cache::new("cache", "redis", capacity)
            .with_policy(policy)
            .with_pacing(Pacing::instant())
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let db = Arc::new(Responder::new("db").with_data_size(100));
        let cache = cache(1_000, EvictionPolicy::Lru);
        cache.set_backend(Some(Downstream::of(&db)));

        let miss = cache.process(&Request::read(1, "/item")).await;
        assert!(miss.is_success());
        assert!(!miss.cache_hit);
        assert_eq!(miss.hops, vec!["cache", "db"]);
        assert_eq!(cache.used_bytes(), 100);

        let hit = cache.process(&Request::read(2, "/item")).await;
        assert!(hit.cache_hit);
        assert_eq!(hit.hops, vec!["cache"]);
        assert_eq!(hit.data_size, 100);
        assert_eq!(db.calls(), 1);
        assert!((cache.metrics().cache_hit_rate - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_writes_pass_through_without_populating() {
        let db = Arc::new(Responder::new("db"));
        let cache = cache(1_000, EvictionPolicy::Lru);
        cache.set_backend(Some(Downstream::of(&db)));

        let resp = cache.process(&Request::write(1, "/item", 50)).await;
        assert_eq!(resp.hops, vec!["cache", "db"]);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_no_backend_on_miss() {
        let cache = cache(1_000, EvictionPolicy::Lru);
        let resp = cache.process(&Request::read(1, "/item")).await;
        assert_eq!(resp.error, Some(ComponentError::NoBackend("cache".into())));
    }

    #[tokio::test]
    async fn test_unhealthy_delegates_unmodified() {
        let db = Arc::new(Responder::new("db").with_data_size(42));
        let cache = cache(1_000, EvictionPolicy::Lru);
        cache.set_backend(Some(Downstream::of(&db)));
        cache.set_healthy(false);

        let resp = cache.process(&Request::read(1, "/item")).await;
        assert!(resp.is_success());
        assert_eq!(resp.hops, vec!["db"]);
        assert!(cache.is_empty());

        let failing = Arc::new(Responder::new("db2").failing(ComponentError::NoBackend("db2".into())));
        cache.set_backend(Some(Downstream::of(&failing)));
        let resp = cache.process(&Request::read(2, "/item")).await;
        assert_eq!(resp.error, Some(ComponentError::NoBackend("db2".into())));
    }

    #[tokio::test]
    async fn test_unhealthy_without_backend() {
        let cache = cache(1_000, EvictionPolicy::Lru);
        cache.set_healthy(false);
        let resp = cache.process(&Request::read(1, "/item")).await;
        assert_eq!(resp.error, Some(ComponentError::Unhealthy("cache".into())));
    }

    #[tokio::test]
    async fn test_lru_evicts_least_recently_used() {
        let cache = cache(300, EvictionPolicy::Lru);
        cache.set("a", 100);
        cache.set("b", 100);
        cache.set("c", 100);
        assert!(cache.get("a").is_some());
        cache.set("d", 100);

        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
        assert_eq!(cache.used_bytes(), 300);
    }

    #[tokio::test]
    async fn test_lfu_ties_break_by_insertion() {
        let cache = cache(300, EvictionPolicy::Lfu);
        cache.set("a", 100);
        cache.set("b", 100);
        cache.set("c", 100);
        cache.get("a");
        cache.set("d", 100);
        assert!(!cache.contains("b"));

        cache.set("e", 100);
        assert!(!cache.contains("c"));
        assert!(cache.contains("a"));
    }

    #[tokio::test]
    async fn test_fifo_is_insertion_order() {
        let cache = cache(200, EvictionPolicy::Fifo);
        cache.set("a", 100);
        cache.set("b", 100);
        cache.get("a");
        cache.set("c", 100);
        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));
    }

    #[tokio::test]
    async fn test_random_is_reproducible() {
        let run = || {
            let cache = cache(500, EvictionPolicy::Random).with_seed(7);
            for i in 0..20 {
                cache.set(&format!("k{i}"), 100);
            }
            (0..20)
                .filter(|i| cache.contains(&format!("k{i}")))
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }

    #[tokio::test]
    async fn test_used_bytes_never_exceed_capacity() {
        for policy in [
            EvictionPolicy::Lru,
            EvictionPolicy::Lfu,
            EvictionPolicy::Fifo,
            EvictionPolicy::Random,
        ] {
            let cache = cache(1_000, policy);
            for i in 0..200u64 {
                let size = (i * 37) % 450 + 1;
                cache.set(&format!("k{}", i % 23), size);
                assert!(cache.used_bytes() <= cache.capacity());
            }
            assert!(!cache.set("huge", 1_001));
            assert!(!cache.contains("huge"));
        }
    }

    #[tokio::test]
    async fn test_reset_key_replaces_size() {
        let cache = cache(1_000, EvictionPolicy::Lru);
        cache.set("a", 300);
        cache.set("a", 100);
        assert_eq!(cache.used_bytes(), 100);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_a_miss_and_removed() {
        let db = Arc::new(Responder::new("db").with_data_size(10));
        let cache = cache(1_000, EvictionPolicy::Lru).with_ttl(Duration::from_secs(1));
        cache.set_backend(Some(Downstream::of(&db)));
        cache.set("/item", 10);

        tokio::time::advance(Duration::from_secs(2)).await;
        cache.set_backend(None);
        let resp = cache.process(&Request::read(1, "/item")).await;
        assert_eq!(resp.error, Some(ComponentError::NoBackend("cache".into())));

        wait_until(|| !cache.contains("/item")).await;
        assert_eq!(cache.used_bytes(), 0);
    }

    #[test]
    fn test_cost_scales_with_capacity() {
        let cache = Cache::new("c", "redis", 2 * 1024 * 1024 * 1024);
        assert!((cache.cost() - 0.03).abs() < 1e-9);
        assert_eq!(cache.type_tag(), "cache-redis");
    }
}

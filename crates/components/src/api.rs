//! Capacity-gated API server.
//!
//! Each accepted request occupies one in-flight slot for its whole
//! downstream chain. Slots are released by an RAII guard, so every exit path
//! (success, downstream failure, or cancellation of the processing future)
//! gives the slot back exactly once.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use sysdesign_core::{Component, ComponentKind, Downstream, MetricsRecorder, Pacing};
use sysdesign_types::{
    fnv1a_32, ComponentError, ComponentId, ComponentMetrics, InstanceSize, Request, Response,
};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Base processing time for every accepted request.
pub const API_BASE_LATENCY: Duration = Duration::from_millis(10);

/// Upper bound (exclusive) of the random jitter added to the base latency.
pub const API_MAX_JITTER: Duration = Duration::from_millis(5);

/// Payload size of the response synthesized when nothing is wired downstream.
pub const API_SYNTHETIC_RESPONSE_SIZE: u64 = 1024;

#[derive(Debug)]
struct Slots {
    current: usize,
    max: usize,
}

/// Releases one in-flight slot on drop.
struct InFlightGuard<'a> {
    slots: &'a Mutex<Slots>,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut slots = self.slots.lock();
        slots.current = slots.current.saturating_sub(1);
    }
}

/// Application server with a size-tier concurrency ceiling.
pub struct ApiServer {
    id: ComponentId,
    size: RwLock<InstanceSize>,
    slots: Mutex<Slots>,
    /// High-water mark of concurrently accepted requests.
    peak_in_flight: AtomicUsize,
    healthy: AtomicBool,
    database: RwLock<Option<Downstream>>,
    cache: RwLock<Option<Downstream>>,
    pacing: Pacing,
    rng: Mutex<ChaCha8Rng>,
    metrics: MetricsRecorder,
}

impl ApiServer {
    /// Create a healthy server of the given size with nothing wired.
    pub fn new(id: impl Into<ComponentId>, size: InstanceSize) -> Self {
        let id = id.into();
        let seed = u64::from(fnv1a_32(id.as_str().as_bytes()));
        Self {
            slots: Mutex::new(Slots {
                current: 0,
                max: size.profile().max_concurrent,
            }),
            id,
            size: RwLock::new(size),
            peak_in_flight: AtomicUsize::new(0),
            healthy: AtomicBool::new(true),
            database: RwLock::new(None),
            cache: RwLock::new(None),
            pacing: Pacing::default(),
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
            metrics: MetricsRecorder::new(),
        }
    }

    /// Set the latency pacing.
    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    /// Seed the jitter generator.
    pub fn with_seed(self, seed: u64) -> Self {
        *self.rng.lock() = ChaCha8Rng::seed_from_u64(seed);
        self
    }

    pub fn set_database(&self, database: Option<Downstream>) {
        *self.database.write() = database;
    }

    pub fn set_cache(&self, cache: Option<Downstream>) {
        *self.cache.write() = cache;
    }

    pub fn database(&self) -> Option<Downstream> {
        self.database.read().clone()
    }

    pub fn cache(&self) -> Option<Downstream> {
        self.cache.read().clone()
    }

    pub fn size(&self) -> InstanceSize {
        *self.size.read()
    }

    /// Resize the server. Capacity and cost change together; requests
    /// already in flight keep their slots even if the new ceiling is lower.
    pub fn set_size(&self, size: InstanceSize) {
        let mut current = self.size.write();
        self.slots.lock().max = size.profile().max_concurrent;
        *current = size;
    }

    pub fn capacity(&self) -> usize {
        self.slots.lock().max
    }

    pub fn in_flight(&self) -> usize {
        self.slots.lock().current
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::Relaxed)
    }

    /// In-flight requests as a fraction of capacity.
    pub fn current_load(&self) -> f64 {
        let slots = self.slots.lock();
        if slots.max == 0 {
            return 1.0;
        }
        slots.current as f64 / slots.max as f64
    }

    fn try_acquire(&self) -> Result<InFlightGuard<'_>, usize> {
        let mut slots = self.slots.lock();
        if slots.current >= slots.max {
            return Err(slots.max);
        }
        slots.current += 1;
        self.peak_in_flight.fetch_max(slots.current, Ordering::Relaxed);
        Ok(InFlightGuard { slots: &self.slots })
    }

    fn processing_time(&self) -> Duration {
        let jitter_us = self
            .rng
            .lock()
            .gen_range(0..API_MAX_JITTER.as_micros() as u64);
        API_BASE_LATENCY + Duration::from_micros(jitter_us)
    }

    /// Reads prefer the cache, everything else goes to the database.
    fn route(&self, request: &Request) -> Option<Downstream> {
        if request.is_read() {
            if let Some(cache) = self.cache() {
                return Some(cache);
            }
        }
        self.database()
    }

    async fn serve(&self, request: &Request, start: Instant) -> Response {
        if !self.is_healthy() {
            return Response::failure(
                request.id,
                self.id.clone(),
                start.elapsed(),
                ComponentError::Unhealthy(self.id.clone()),
            );
        }

        let _slot = match self.try_acquire() {
            Ok(guard) => guard,
            Err(limit) => {
                warn!(component = %self.id, request = %request.id, limit, "API server at capacity");
                return Response::failure(
                    request.id,
                    self.id.clone(),
                    start.elapsed(),
                    ComponentError::CapacityExceeded {
                        component: self.id.clone(),
                        limit,
                    },
                );
            }
        };

        self.pacing.pause(self.processing_time()).await;

        match self.route(request) {
            Some(next) => {
                debug!(component = %self.id, request = %request.id, next = %next.id(), "Forwarding");
                next.forward(request)
                    .await
                    .through(&self.id, start.elapsed())
            }
            None => Response::success(
                request.id,
                self.id.clone(),
                start.elapsed(),
                API_SYNTHETIC_RESPONSE_SIZE,
            ),
        }
    }
}

#[async_trait]
impl Component for ApiServer {
    fn id(&self) -> &ComponentId {
        &self.id
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::ApiServer
    }

    async fn process(&self, request: &Request) -> Response {
        let start = Instant::now();
        let response = self.serve(request, start).await;
        self.metrics.record(&response);
        response
    }

    fn metrics(&self) -> ComponentMetrics {
        self.metrics.snapshot()
    }

    fn cost(&self) -> f64 {
        self.size().profile().cost_per_hour
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
    use std::sync::Arc;
    use sysdesign_test_helpers::{wait_until, GatedComponent, Responder};
    use tracing_test::traced_test;

    fn server(size: InstanceSize) -> ApiServer {
        ApiServer::new("api", size).with_pacing(Pacing::instant())
    }

    #[tokio::test]
    async fn test_synthesizes_without_downstream() {
        let api = server(InstanceSize::Small);
        let resp = api.process(&Request::read(1, "/users")).await;
        assert!(resp.is_success());
        assert_eq!(resp.data_size, API_SYNTHETIC_RESPONSE_SIZE);
        assert_eq!(resp.hops, vec!["api"]);
        assert_eq!(api.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_unhealthy_fails_fast() {
        let db = Arc::new(Responder::new("db"));
        let api = server(InstanceSize::Small);
        api.set_database(Some(Downstream::of(&db)));
        api.set_healthy(false);

        let resp = api.process(&Request::write(1, "/k", 10)).await;
        assert_eq!(resp.error, Some(ComponentError::Unhealthy("api".into())));
        assert_eq!(db.calls(), 0);
        assert_eq!(api.metrics().failures, 1);
    }

    #[tokio::test]
    async fn test_reads_prefer_cache_writes_go_to_database() {
        let cache = Arc::new(Responder::new("cache"));
        let db = Arc::new(Responder::new("db"));
        let api = server(InstanceSize::Small);
        api.set_cache(Some(Downstream::of(&cache)));
        api.set_database(Some(Downstream::of(&db)));

        let read = api.process(&Request::read(1, "/k")).await;
        let write = api.process(&Request::write(2, "/k", 8)).await;

        assert_eq!(read.hops, vec!["api", "cache"]);
        assert_eq!(write.hops, vec!["api", "db"]);
        assert_eq!(cache.calls(), 1);
        assert_eq!(db.calls(), 1);
    }

    #[tokio::test]
    async fn test_slot_released_on_downstream_failure() {
        let db = Arc::new(Responder::new("db").failing(ComponentError::NoBackend("db".into())));
        let api = server(InstanceSize::Small);
        api.set_database(Some(Downstream::of(&db)));

        for i in 0..20 {
            let resp = api.process(&Request::write(i, "/k", 1)).await;
            assert!(!resp.is_success());
        }
        assert_eq!(api.in_flight(), 0);
        assert_eq!(api.peak_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_capacity_ceiling_with_gated_database() {
        let db = Arc::new(GatedComponent::new("db"));
        let api = Arc::new(server(InstanceSize::Medium));
        api.set_database(Some(Downstream::of(&db)));

        let handles: Vec<_> = (0..60)
            .map(|i| {
                let api = api.clone();
                tokio::spawn(async move { api.process(&Request::write(i, "/k", 1)).await })
            })
            .collect();

        db.wait_for_entered(50).await;
        let api_probe = api.clone();
        wait_until(move || api_probe.metrics().failures == 10).await;
        assert_eq!(api.in_flight(), 50);
        db.open();

        let mut successes = 0;
        let mut capacity_errors = 0;
        for handle in handles {
            let resp = handle.await.unwrap();
            if resp.is_success() {
                successes += 1;
            } else if resp.error.as_ref().is_some_and(|e| e.is_capacity()) {
                capacity_errors += 1;
            }
        }

        assert_eq!(successes, 50);
        assert_eq!(capacity_errors, 10);
        assert_eq!(db.max_concurrent(), 50);
        assert_eq!(api.peak_in_flight(), 50);
        assert_eq!(api.in_flight(), 0);
    }

    #[traced_test]
    #[tokio::test]
    async fn test_capacity_rejection_is_logged() {
        let db = Arc::new(GatedComponent::new("db"));
        let api = Arc::new(server(InstanceSize::Small));
        api.set_database(Some(Downstream::of(&db)));

        let handles: Vec<_> = (0..11)
            .map(|i| {
                let api = api.clone();
                tokio::spawn(async move { api.process(&Request::read(i, "/k")).await })
            })
            .collect();
        db.wait_for_entered(10).await;
        let api_probe = api.clone();
        wait_until(move || api_probe.metrics().failures == 1).await;
        assert!(logs_contain("API server at capacity"));

        db.open();
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_set_size_updates_capacity_and_cost() {
        let api = server(InstanceSize::Small);
        assert_eq!(api.capacity(), 10);
        assert_eq!(api.cost(), 0.05);

        api.set_size(InstanceSize::Large);
        assert_eq!(api.capacity(), 200);
        assert_eq!(api.cost(), 0.20);
        assert_eq!(api.current_load(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_within_jitter_bounds() {
        let api = ApiServer::new("api", InstanceSize::Small);
        for i in 0..10 {
            let resp = api.process(&Request::read(i, "/")).await;
            assert!(resp.latency >= API_BASE_LATENCY);
            assert!(resp.latency <= API_BASE_LATENCY + API_MAX_JITTER + Duration::from_millis(1));
        }
    }
}

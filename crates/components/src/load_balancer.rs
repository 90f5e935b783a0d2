//! Load balancer over a mutable backend list.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use sysdesign_core::{Component, ComponentKind, Downstream, MetricsRecorder, Pacing};
use sysdesign_types::{
    fnv1a_32, ComponentError, ComponentId, ComponentMetrics, LoadBalancingStrategy, Request,
    Response,
};
use tokio::time::Instant;
use tracing::debug;

/// Fixed balancing overhead added before forwarding.
pub const LB_OVERHEAD: Duration = Duration::from_millis(2);

/// Header consulted by IP-hash balancing before falling back to the user id.
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

const LB_COST: f64 = 0.025;

#[derive(Debug, Clone)]
struct Backend {
    handle: Downstream,
    weight: u32,
}

/// Holds one connection on a backend until dropped.
struct Connection<'a> {
    counts: &'a DashMap<ComponentId, usize>,
    backend: ComponentId,
}

impl<'a> Connection<'a> {
    fn open(counts: &'a DashMap<ComponentId, usize>, backend: &ComponentId) -> Self {
        *counts.entry(backend.clone()).or_insert(0) += 1;
        Self {
            counts,
            backend: backend.clone(),
        }
    }
}

impl Drop for Connection<'_> {
    fn drop(&mut self) {
        if let Some(mut count) = self.counts.get_mut(&self.backend) {
            *count = count.saturating_sub(1);
        }
    }
}

/// Distributes requests across healthy backends.
///
/// Backends are filtered for health before every selection. Ties are
/// broken by backend list order.
pub struct LoadBalancer {
    id: ComponentId,
    backends: RwLock<Vec<Backend>>,
    strategy: RwLock<LoadBalancingStrategy>,
    next: AtomicUsize,
    /// Live forwarded requests per backend.
    connections: DashMap<ComponentId, usize>,
    rng: Mutex<ChaCha8Rng>,
    healthy: AtomicBool,
    pacing: Pacing,
    metrics: MetricsRecorder,
}

impl LoadBalancer {
    pub fn new(id: impl Into<ComponentId>, strategy: LoadBalancingStrategy) -> Self {
        let id = id.into();
        let seed = u64::from(fnv1a_32(id.as_str().as_bytes()));
        Self {
            id,
            backends: RwLock::new(Vec::new()),
            strategy: RwLock::new(strategy),
            next: AtomicUsize::new(0),
            connections: DashMap::new(),
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
            healthy: AtomicBool::new(true),
            pacing: Pacing::default(),
            metrics: MetricsRecorder::new(),
        }
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    /// Seed for weighted-random selection.
    pub fn with_seed(self, seed: u64) -> Self {
        *self.rng.lock() = ChaCha8Rng::seed_from_u64(seed);
        self
    }

    /// Append a backend with weight 1.
    pub fn add_backend(&self, backend: Downstream) {
        self.add_weighted_backend(backend, 1);
    }

    /// Append a backend with a weighted-random weight.
    pub fn add_weighted_backend(&self, backend: Downstream, weight: u32) {
        self.backends.write().push(Backend {
            handle: backend,
            weight,
        });
    }

    /// Remove a backend by id. Returns whether it was present.
    pub fn remove_backend(&self, id: &ComponentId) -> bool {
        let mut backends = self.backends.write();
        let before = backends.len();
        backends.retain(|backend| backend.handle.id() != id);
        before != backends.len()
    }

    pub fn backend_ids(&self) -> Vec<ComponentId> {
        self.backends
            .read()
            .iter()
            .map(|backend| backend.handle.id().clone())
            .collect()
    }

    pub fn strategy(&self) -> LoadBalancingStrategy {
        *self.strategy.read()
    }

    pub fn set_strategy(&self, strategy: LoadBalancingStrategy) {
        *self.strategy.write() = strategy;
    }

    /// Live connection count for a backend.
    pub fn connections(&self, backend: &ComponentId) -> usize {
        self.connections.get(backend).map(|count| *count).unwrap_or(0)
    }

    fn healthy_backends(&self) -> Vec<Backend> {
        self.backends
            .read()
            .iter()
            .filter(|backend| backend.handle.is_healthy())
            .cloned()
            .collect()
    }

    fn select(&self, request: &Request) -> Option<Downstream> {
        let healthy = self.healthy_backends();
        if healthy.is_empty() {
            return None;
        }

        let index = match self.strategy() {
            LoadBalancingStrategy::RoundRobin => {
                self.next.fetch_add(1, Ordering::Relaxed) % healthy.len()
            }
            LoadBalancingStrategy::LeastConnected => healthy
                .iter()
                .enumerate()
                .min_by_key(|(_, backend)| self.connections(backend.handle.id()))
                .map(|(i, _)| i)
                .unwrap_or(0),
            LoadBalancingStrategy::WeightedRandom => {
                let total: u64 = healthy.iter().map(|b| u64::from(b.weight)).sum();
                if total == 0 {
                    0
                } else {
                    let mut pick = self.rng.lock().gen_range(0..total);
                    healthy
                        .iter()
                        .position(|backend| {
                            let weight = u64::from(backend.weight);
                            if pick < weight {
                                true
                            } else {
                                pick -= weight;
                                false
                            }
                        })
                        .unwrap_or(0)
                }
            }
            LoadBalancingStrategy::IpHash => {
                let key = request
                    .headers
                    .get(FORWARDED_FOR_HEADER)
                    .map(String::as_str)
                    .unwrap_or(&request.user_id);
                fnv1a_32(key.as_bytes()) as usize % healthy.len()
            }
        };

        healthy.into_iter().nth(index).map(|backend| backend.handle)
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

        let Some(backend) = self.select(request) else {
            return Response::failure(
                request.id,
                self.id.clone(),
                start.elapsed(),
                ComponentError::NoHealthyBackends(self.id.clone()),
            );
        };
        debug!(component = %self.id, request = %request.id, backend = %backend.id(), "Selected backend");

        let _connection = Connection::open(&self.connections, backend.id());
        self.pacing.pause(LB_OVERHEAD).await;
        backend
            .forward(request)
            .await
            .through(&self.id, start.elapsed())
    }
}

#[async_trait]
impl Component for LoadBalancer {
    fn id(&self) -> &ComponentId {
        &self.id
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::LoadBalancer
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
        LB_COST
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
    use sysdesign_test_helpers::{GatedComponent, Responder};

    fn lb(strategy: LoadBalancingStrategy) -> LoadBalancer {
        LoadBalancer::new("lb", strategy).with_pacing(Pacing::instant())
    }

    fn responders(n: usize) -> Vec<Arc<Responder>> {
        (0..n)
            .map(|i| Arc::new(Responder::new(format!("api-{i}"))))
            .collect()
    }

    #[tokio::test]
    async fn test_round_robin_fairness() {
        let lb = lb(LoadBalancingStrategy::RoundRobin);
        let backends = responders(3);
        for backend in &backends {
            lb.add_backend(Downstream::of(backend));
        }

        for i in 0..30 {
            let resp = lb.process(&Request::read(i, "/")).await;
            assert!(resp.is_success());
            assert_eq!(resp.hops[0], "lb");
        }
        for backend in &backends {
            assert_eq!(backend.calls(), 10);
        }
    }

    #[tokio::test]
    async fn test_unhealthy_backends_skipped() {
        let lb = lb(LoadBalancingStrategy::RoundRobin);
        let backends = responders(3);
        for backend in &backends {
            lb.add_backend(Downstream::of(backend));
        }
        backends[1].set_healthy(false);

        for i in 0..10 {
            lb.process(&Request::read(i, "/")).await;
        }
        assert_eq!(backends[0].calls(), 5);
        assert_eq!(backends[1].calls(), 0);
        assert_eq!(backends[2].calls(), 5);
    }

    #[tokio::test]
    async fn test_no_healthy_backends() {
        let lb = lb(LoadBalancingStrategy::RoundRobin);
        let backend = Arc::new(Responder::new("api"));
        lb.add_backend(Downstream::of(&backend));
        backend.set_healthy(false);

        let resp = lb.process(&Request::read(1, "/")).await;
        assert_eq!(resp.error, Some(ComponentError::NoHealthyBackends("lb".into())));

        // A dropped backend counts as unavailable too.
        let lb = self::lb(LoadBalancingStrategy::RoundRobin);
        lb.add_backend(Downstream::of(&Arc::new(Responder::new("gone"))));
        let resp = lb.process(&Request::read(2, "/")).await;
        assert!(resp.error.is_some_and(|e| e.is_routing()));
    }

    #[tokio::test]
    async fn test_least_connected_prefers_idle_backend() {
        let lb = Arc::new(lb(LoadBalancingStrategy::LeastConnected));
        let busy = Arc::new(GatedComponent::new("busy"));
        let idle = Arc::new(Responder::new("idle"));
        lb.add_backend(Downstream::of(&busy));
        lb.add_backend(Downstream::of(&idle));

        // Equal counts: list order wins, so the first request parks on `busy`.
        let parked = {
            let lb = lb.clone();
            tokio::spawn(async move { lb.process(&Request::read(1, "/")).await })
        };
        busy.wait_for_entered(1).await;
        assert_eq!(lb.connections(&"busy".into()), 1);

        for i in 2..6 {
            let resp = lb.process(&Request::read(i, "/")).await;
            assert_eq!(resp.hops, vec!["lb", "idle"]);
        }

        busy.open();
        assert!(parked.await.unwrap().is_success());
        assert_eq!(lb.connections(&"busy".into()), 0);
    }

    #[tokio::test]
    async fn test_ip_hash_is_sticky() {
        let lb = lb(LoadBalancingStrategy::IpHash);
        let backends = responders(4);
        for backend in &backends {
            lb.add_backend(Downstream::of(backend));
        }

        let mut first = None;
        for i in 0..8 {
            let req = Request::read(i, "/").with_header(FORWARDED_FOR_HEADER, "10.0.0.7");
            let resp = lb.process(&req).await;
            let target = resp.hops[1].clone();
            assert_eq!(*first.get_or_insert(target.clone()), target);
        }
    }

    #[tokio::test]
    async fn test_weighted_random_respects_zero_weight() {
        let lb = lb(LoadBalancingStrategy::WeightedRandom).with_seed(3);
        let heavy = Arc::new(Responder::new("heavy"));
        let never = Arc::new(Responder::new("never"));
        lb.add_weighted_backend(Downstream::of(&heavy), 5);
        lb.add_weighted_backend(Downstream::of(&never), 0);

        for i in 0..50 {
            lb.process(&Request::read(i, "/")).await;
        }
        assert_eq!(heavy.calls(), 50);
        assert_eq!(never.calls(), 0);
    }

    #[tokio::test]
    async fn test_remove_backend_and_strategy_switch() {
        let lb = lb(LoadBalancingStrategy::RoundRobin);
        let backends = responders(2);
        for backend in &backends {
            lb.add_backend(Downstream::of(backend));
        }
        assert!(lb.remove_backend(&"api-0".into()));
        assert!(!lb.remove_backend(&"api-0".into()));
        assert_eq!(lb.backend_ids(), vec![ComponentId::new("api-1")]);

        lb.set_strategy(LoadBalancingStrategy::parse_lenient("sticky"));
        assert_eq!(lb.strategy(), LoadBalancingStrategy::RoundRobin);
        assert_eq!(lb.cost(), 0.025);
    }
}

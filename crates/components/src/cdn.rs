//! Content delivery network with per-region edge caches.

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sysdesign_core::{Component, ComponentKind, Downstream, MetricsRecorder, Pacing};
use sysdesign_types::{ComponentError, ComponentId, ComponentMetrics, Request, Response};
use tokio::time::Instant;
use tracing::debug;

/// Latency of an edge hit.
pub const CDN_HIT_LATENCY: Duration = Duration::from_millis(2);

/// Default lifetime of an edge entry.
pub const DEFAULT_EDGE_TTL: Duration = Duration::from_secs(3600);

const CDN_BASE_COST: f64 = 0.08;
const CDN_COST_PER_EDGE: f64 = 0.01;

/// Region-local cache of a CDN.
#[derive(Debug)]
pub struct EdgeLocation {
    region: String,
    ttl: Duration,
    /// path -> (size, expiry)
    entries: Mutex<HashMap<String, (u64, Instant)>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EdgeLocation {
    fn new(region: String, ttl: Duration) -> Self {
        Self {
            region,
            ttl,
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cached size for `path`. Expired entries are dropped on the spot.
    fn lookup(&self, path: &str, now: Instant) -> Option<u64> {
        let mut entries = self.entries.lock();
        match entries.get(path) {
            Some(&(size, expires_at)) if now < expires_at => Some(size),
            Some(_) => {
                entries.remove(path);
                None
            }
            None => None,
        }
    }

    fn store(&self, path: &str, size: u64) {
        let expires_at = Instant::now() + self.ttl;
        self.entries
            .lock()
            .insert(path.to_string(), (size, expires_at));
    }
}

/// CDN component: edge caches in front of a single origin.
///
/// Requests use the edge matching their region, or the first configured
/// edge when no region matches.
pub struct Cdn {
    id: ComponentId,
    edges: RwLock<IndexMap<String, Arc<EdgeLocation>>>,
    edge_ttl: Duration,
    origin: RwLock<Option<Downstream>>,
    healthy: AtomicBool,
    pacing: Pacing,
    metrics: MetricsRecorder,
}

impl Cdn {
    /// Create a CDN with one edge per region.
    pub fn new<I, S>(id: impl Into<ComponentId>, regions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let cdn = Self {
            id: id.into(),
            edges: RwLock::new(IndexMap::new()),
            edge_ttl: DEFAULT_EDGE_TTL,
            origin: RwLock::new(None),
            healthy: AtomicBool::new(true),
            pacing: Pacing::default(),
            metrics: MetricsRecorder::new(),
        };
        for region in regions {
            cdn.add_edge(region);
        }
        cdn
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    /// TTL for edges added from now on; existing edges are rebuilt empty.
    pub fn with_edge_ttl(mut self, ttl: Duration) -> Self {
        self.edge_ttl = ttl;
        let regions: Vec<String> = self.edges.read().keys().cloned().collect();
        *self.edges.write() = regions
            .into_iter()
            .map(|region| (region.clone(), Arc::new(EdgeLocation::new(region, ttl))))
            .collect();
        self
    }

    /// Add an edge for `region`. An existing edge is kept as is.
    pub fn add_edge(&self, region: impl Into<String>) {
        let region = region.into();
        self.edges
            .write()
            .entry(region.clone())
            .or_insert_with(|| Arc::new(EdgeLocation::new(region, self.edge_ttl)));
    }

    pub fn edge(&self, region: &str) -> Option<Arc<EdgeLocation>> {
        self.edges.read().get(region).cloned()
    }

    pub fn regions(&self) -> Vec<String> {
        self.edges.read().keys().cloned().collect()
    }

    pub fn set_origin(&self, origin: Option<Downstream>) {
        *self.origin.write() = origin;
    }

    pub fn origin(&self) -> Option<Downstream> {
        self.origin.read().clone()
    }

    /// Hits over lookups across every edge.
    pub fn hit_rate(&self) -> f64 {
        let (hits, lookups) = self
            .edges
            .read()
            .values()
            .fold((0, 0), |(hits, lookups), edge| {
                (hits + edge.hits(), lookups + edge.hits() + edge.misses())
            });
        if lookups == 0 {
            0.0
        } else {
            hits as f64 / lookups as f64
        }
    }

    fn select_edge(&self, region: &str) -> Option<Arc<EdgeLocation>> {
        let edges = self.edges.read();
        edges
            .get(region)
            .or_else(|| edges.first().map(|(_, edge)| edge))
            .cloned()
    }

    async fn serve(&self, request: &Request, start: Instant) -> Response {
        let edge = self.select_edge(&request.region);

        if let (Some(edge), true) = (&edge, request.is_read()) {
            if let Some(size) = edge.lookup(&request.path, start) {
                edge.hits.fetch_add(1, Ordering::Relaxed);
                self.metrics.record_cache_lookup(true);
                debug!(component = %self.id, edge = %edge.region, key = %request.path, "Edge hit");
                self.pacing.pause(CDN_HIT_LATENCY).await;
                let label = format!("{}-edge-{}", self.id, edge.region);
                return Response::success(request.id, label, start.elapsed(), size).with_cache_hit();
            }
            edge.misses.fetch_add(1, Ordering::Relaxed);
            self.metrics.record_cache_lookup(false);
        }

        let Some(origin) = self.origin() else {
            return Response::failure(
                request.id,
                self.id.clone(),
                start.elapsed(),
                ComponentError::NoBackend(self.id.clone()),
            );
        };

        let mut response = origin.forward(request).await;
        if let (Some(edge), true) = (&edge, request.is_read() && response.is_success()) {
            edge.store(&request.path, response.data_size);
        }
        response.cache_hit = false;
        response.through(&self.id, start.elapsed())
    }
}

#[async_trait]
impl Component for Cdn {
    fn id(&self) -> &ComponentId {
        &self.id
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Cdn
    }

    async fn process(&self, request: &Request) -> Response {
        let start = Instant::now();

        if !self.is_healthy() {
            let response = match self.origin() {
                Some(origin) => origin.forward(request).await,
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
        CDN_BASE_COST + self.edges.read().len() as f64 * CDN_COST_PER_EDGE
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
    use sysdesign_test_helpers::Responder;
    use sysdesign_types::regions;

    fn cdn_with_origin(origin: &Arc<Responder>) -> Cdn {
        let cdn = Cdn::new("cdn", [regions::US_EAST, regions::EUROPE]).with_pacing(Pacing::instant());
        cdn.set_origin(Some(Downstream::of(origin)));
        cdn
    }

    #[tokio::test]
    async fn test_edge_hit_after_origin_fill() {
        let origin = Arc::new(Responder::new("origin").with_data_size(500));
        let cdn = cdn_with_origin(&origin);
        let req = |id| Request::read(id, "/logo.png").with_region(regions::EUROPE);

        let miss = cdn.process(&req(1)).await;
        assert_eq!(miss.hops, vec!["cdn", "origin"]);
        assert!(!miss.cache_hit);

        let hit = cdn.process(&req(2)).await;
        assert!(hit.cache_hit);
        assert_eq!(hit.hops, vec!["cdn-edge-europe"]);
        assert_eq!(hit.data_size, 500);
        assert_eq!(origin.calls(), 1);

        let europe = cdn.edge(regions::EUROPE).unwrap();
        assert_eq!((europe.hits(), europe.misses()), (1, 1));
        assert_eq!(cdn.hit_rate(), 0.5);
    }

    #[tokio::test]
    async fn test_edges_are_independent() {
        let origin = Arc::new(Responder::new("origin"));
        let cdn = cdn_with_origin(&origin);

        cdn.process(&Request::read(1, "/a").with_region(regions::US_EAST)).await;
        let resp = cdn.process(&Request::read(2, "/a").with_region(regions::EUROPE)).await;
        assert!(!resp.cache_hit);
        assert_eq!(origin.calls(), 2);
    }

    #[tokio::test]
    async fn test_unknown_region_uses_first_edge() {
        let origin = Arc::new(Responder::new("origin"));
        let cdn = cdn_with_origin(&origin);

        cdn.process(&Request::read(1, "/a").with_region("mars")).await;
        assert_eq!(cdn.edge(regions::US_EAST).unwrap().len(), 1);
        assert!(cdn.edge(regions::EUROPE).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_writes_bypass_edges() {
        let origin = Arc::new(Responder::new("origin"));
        let cdn = cdn_with_origin(&origin);

        let resp = cdn.process(&Request::write(1, "/a", 10)).await;
        assert!(resp.is_success());
        assert!(cdn.edge(regions::US_EAST).unwrap().is_empty());
        assert_eq!(cdn.edge(regions::US_EAST).unwrap().misses(), 0);
    }

    #[tokio::test]
    async fn test_unhealthy_delegates_to_origin() {
        let origin = Arc::new(Responder::new("origin"));
        let cdn = cdn_with_origin(&origin);
        cdn.set_healthy(false);

        let resp = cdn.process(&Request::read(1, "/a")).await;
        assert!(resp.is_success());
        assert_eq!(resp.hops, vec!["origin"]);

        cdn.set_origin(None);
        let resp = cdn.process(&Request::read(2, "/a")).await;
        assert_eq!(resp.error, Some(ComponentError::Unhealthy("cdn".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_edge_entries_expire() {
        let origin = Arc::new(Responder::new("origin"));
        let cdn = Cdn::new("cdn", [regions::US_EAST])
            .with_edge_ttl(Duration::from_secs(10))
            .with_pacing(Pacing::instant());
        cdn.set_origin(Some(Downstream::of(&origin)));

        cdn.process(&Request::read(1, "/a")).await;
        tokio::time::advance(Duration::from_secs(11)).await;
        let resp = cdn.process(&Request::read(2, "/a")).await;
        assert!(!resp.cache_hit);
        assert_eq!(origin.calls(), 2);
    }

    #[test]
    fn test_cost_per_edge() {
        let cdn = Cdn::new("cdn", regions::ALL);
        assert!((cdn.cost() - 0.13).abs() < 1e-9);
        assert_eq!(cdn.type_tag(), "cdn");
    }
}

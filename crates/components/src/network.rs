//! Network appliances: gateways, firewalls, NAT, routers and user pools.
//!
//! None of these model capacity. Each checks its health flag first, waits
//! its fixed latency, and forwards.

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use sysdesign_core::{Component, ComponentKind, Downstream, MetricsRecorder, Pacing};
use sysdesign_types::{ComponentError, ComponentId, ComponentMetrics, Request, Response};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Requests per second generated by each simulated user.
pub const DEFAULT_REQUESTS_PER_USER: u32 = 5;

/// Single-downstream pass-through appliance flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApplianceKind {
    Gateway,
    Firewall,
    Nat,
}

impl ApplianceKind {
    pub fn latency(&self) -> Duration {
        match self {
            ApplianceKind::Gateway | ApplianceKind::Nat => Duration::from_millis(1),
            ApplianceKind::Firewall => Duration::from_millis(2),
        }
    }

    pub fn cost_per_hour(&self) -> f64 {
        match self {
            ApplianceKind::Gateway => 0.03,
            ApplianceKind::Firewall => 0.02,
            ApplianceKind::Nat => 0.045,
        }
    }

    fn component_kind(&self) -> ComponentKind {
        match self {
            ApplianceKind::Gateway => ComponentKind::Gateway,
            ApplianceKind::Firewall => ComponentKind::Firewall,
            ApplianceKind::Nat => ComponentKind::Nat,
        }
    }
}

/// Gateway, firewall or NAT in front of a single backend.
///
/// Firewalls additionally hold deny rules: a request whose path starts with
/// a rule's prefix is rejected with [`ComponentError::Blocked`].
pub struct Appliance {
    id: ComponentId,
    kind: ApplianceKind,
    region: Option<String>,
    backend: RwLock<Option<Downstream>>,
    deny_rules: RwLock<Vec<String>>,
    blocked: AtomicU64,
    healthy: AtomicBool,
    pacing: Pacing,
    metrics: MetricsRecorder,
}

impl Appliance {
    pub fn new(id: impl Into<ComponentId>, kind: ApplianceKind) -> Self {
        Self {
            id: id.into(),
            kind,
            region: None,
            backend: RwLock::new(None),
            deny_rules: RwLock::new(Vec::new()),
            blocked: AtomicU64::new(0),
            healthy: AtomicBool::new(true),
            pacing: Pacing::default(),
            metrics: MetricsRecorder::new(),
        }
    }

    pub fn gateway(id: impl Into<ComponentId>) -> Self {
        Self::new(id, ApplianceKind::Gateway)
    }

    pub fn firewall(id: impl Into<ComponentId>) -> Self {
        Self::new(id, ApplianceKind::Firewall)
    }

    pub fn nat(id: impl Into<ComponentId>) -> Self {
        Self::new(id, ApplianceKind::Nat)
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn appliance_kind(&self) -> ApplianceKind {
        self.kind
    }

    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    pub fn set_backend(&self, backend: Option<Downstream>) {
        *self.backend.write() = backend;
    }

    pub fn backend(&self) -> Option<Downstream> {
        self.backend.read().clone()
    }

    /// Deny every path starting with `prefix`. Only enforced by firewalls.
    pub fn add_deny_rule(&self, prefix: impl Into<String>) {
        self.deny_rules.write().push(prefix.into());
    }

    /// Requests rejected by deny rules so far.
    pub fn blocked_count(&self) -> u64 {
        self.blocked.load(Ordering::Relaxed)
    }

    fn matching_rule(&self, path: &str) -> Option<String> {
        if self.kind != ApplianceKind::Firewall {
            return None;
        }
        self.deny_rules
            .read()
            .iter()
            .find(|prefix| path.starts_with(prefix.as_str()))
            .cloned()
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

        self.pacing.pause(self.kind.latency()).await;

        if let Some(rule) = self.matching_rule(&request.path) {
            self.blocked.fetch_add(1, Ordering::Relaxed);
            warn!(component = %self.id, request = %request.id, rule = %rule, "Request blocked");
            return Response::failure(
                request.id,
                self.id.clone(),
                start.elapsed(),
                ComponentError::Blocked {
                    component: self.id.clone(),
                    rule,
                },
            );
        }

        match self.backend() {
            Some(backend) => backend
                .forward(request)
                .await
                .through(&self.id, start.elapsed()),
            None => Response::failure(
                request.id,
                self.id.clone(),
                start.elapsed(),
                ComponentError::NoBackend(self.id.clone()),
            ),
        }
    }
}

#[async_trait]
impl Component for Appliance {
    fn id(&self) -> &ComponentId {
        &self.id
    }

    fn kind(&self) -> ComponentKind {
        self.kind.component_kind()
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
        self.kind.cost_per_hour()
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }
}

pub const ROUTER_LATENCY: Duration = Duration::from_millis(1);
const ROUTER_COST: f64 = 0.015;

/// Path-based router.
///
/// Resolution order: exact path, longest matching route prefix, default
/// route.
pub struct Router {
    id: ComponentId,
    region: Option<String>,
    routes: RwLock<IndexMap<String, Downstream>>,
    default_route: RwLock<Option<Downstream>>,
    healthy: AtomicBool,
    pacing: Pacing,
    metrics: MetricsRecorder,
}

impl Router {
    pub fn new(id: impl Into<ComponentId>) -> Self {
        Self {
            id: id.into(),
            region: None,
            routes: RwLock::new(IndexMap::new()),
            default_route: RwLock::new(None),
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

    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    /// Route `path` (and anything under it) to `target`.
    pub fn add_route(&self, path: impl Into<String>, target: Downstream) {
        self.routes.write().insert(path.into(), target);
    }

    pub fn remove_route(&self, path: &str) -> Option<Downstream> {
        self.routes.write().shift_remove(path)
    }

    pub fn set_default_route(&self, target: Option<Downstream>) {
        *self.default_route.write() = target;
    }

    pub fn routes(&self) -> Vec<String> {
        self.routes.read().keys().cloned().collect()
    }

    fn resolve(&self, path: &str) -> Option<Downstream> {
        let routes = self.routes.read();
        if let Some(target) = routes.get(path) {
            return Some(target.clone());
        }
        routes
            .iter()
            .filter(|(prefix, _)| path.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, target)| target.clone())
            .or_else(|| self.default_route.read().clone())
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

        self.pacing.pause(ROUTER_LATENCY).await;

        match self.resolve(&request.path) {
            Some(target) => {
                debug!(component = %self.id, path = %request.path, target = %target.id(), "Routed");
                target
                    .forward(request)
                    .await
                    .through(&self.id, start.elapsed())
            }
            None => Response::failure(
                request.id,
                self.id.clone(),
                start.elapsed(),
                ComponentError::NoRoute {
                    component: self.id.clone(),
                    path: request.path.clone(),
                },
            ),
        }
    }
}

#[async_trait]
impl Component for Router {
    fn id(&self) -> &ComponentId {
        &self.id
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Router
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
        ROUTER_COST
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }
}

/// Population of simulated users.
///
/// Carries no cost and adds no latency. With a downstream it forwards;
/// without one it acknowledges the request itself.
pub struct UserPool {
    id: ComponentId,
    region: Option<String>,
    users: AtomicU64,
    requests_per_user: u32,
    downstream: RwLock<Option<Downstream>>,
    healthy: AtomicBool,
    metrics: MetricsRecorder,
}

impl UserPool {
    pub fn new(id: impl Into<ComponentId>, users: u64) -> Self {
        Self {
            id: id.into(),
            region: None,
            users: AtomicU64::new(users),
            requests_per_user: DEFAULT_REQUESTS_PER_USER,
            downstream: RwLock::new(None),
            healthy: AtomicBool::new(true),
            metrics: MetricsRecorder::new(),
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_requests_per_user(mut self, rate: u32) -> Self {
        self.requests_per_user = rate;
        self
    }

    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    pub fn users(&self) -> u64 {
        self.users.load(Ordering::Relaxed)
    }

    pub fn set_users(&self, users: u64) {
        self.users.store(users, Ordering::Relaxed);
    }

    /// Aggregate requests per second generated by the pool.
    pub fn total_request_rate(&self) -> u64 {
        self.users() * u64::from(self.requests_per_user)
    }

    pub fn set_downstream(&self, downstream: Option<Downstream>) {
        *self.downstream.write() = downstream;
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
        let downstream = self.downstream.read().clone();
        match downstream {
            Some(next) => next
                .forward(request)
                .await
                .through(&self.id, start.elapsed()),
            None => Response::success(request.id, self.id.clone(), start.elapsed(), 0),
        }
    }
}

#[async_trait]
impl Component for UserPool {
    fn id(&self) -> &ComponentId {
        &self.id
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::UserPool
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
        0.0
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }
}

//! Test helpers for the system design simulator.
//!
//! Instrumented components that let concurrency tests use explicit
//! synchronization points instead of wall-clock races:
//!
//! - [`Responder`]: answers immediately (or after a fixed delay) with a
//!   configurable outcome and counts its calls
//! - [`GatedComponent`]: parks every request until the gate opens and tracks
//!   the peak number of requests parked at once

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use sysdesign_core::{Component, ComponentKind, MetricsRecorder};
use sysdesign_types::{ComponentError, ComponentId, ComponentMetrics, Request, RequestId, Response};
use tokio::sync::Notify;
use tokio::time::Instant;

/// Poll `condition` until it holds. Panics after ten seconds of tokio time.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let limit = Duration::from_secs(10);
    let reached = tokio::time::timeout(limit, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "condition not reached within {:?}", limit);
}

/// Component answering every request with a fixed outcome.
pub struct Responder {
    id: ComponentId,
    kind: ComponentKind,
    latency: Duration,
    data_size: u64,
    error: Option<ComponentError>,
    cost: f64,
    calls: AtomicU64,
    seen: Mutex<Vec<RequestId>>,
    healthy: AtomicBool,
    metrics: MetricsRecorder,
}

impl Responder {
    /// Healthy responder succeeding instantly with an empty payload.
    pub fn new(id: impl Into<ComponentId>) -> Self {
        Self {
            id: id.into(),
            kind: ComponentKind::Custom("responder".into()),
            latency: Duration::ZERO,
            data_size: 0,
            error: None,
            cost: 0.0,
            calls: AtomicU64::new(0),
            seen: Mutex::new(Vec::new()),
            healthy: AtomicBool::new(true),
            metrics: MetricsRecorder::new(),
        }
    }

    pub fn with_kind(mut self, kind: ComponentKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sleep this long (tokio time) before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_data_size(mut self, data_size: u64) -> Self {
        self.data_size = data_size;
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    /// Fail every request with `error`.
    pub fn failing(mut self, error: ComponentError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Ids of the requests processed, in arrival order.
    pub fn seen(&self) -> Vec<RequestId> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl Component for Responder {
    fn id(&self) -> &ComponentId {
        &self.id
    }

    fn kind(&self) -> ComponentKind {
        self.kind.clone()
    }

    async fn process(&self, request: &Request) -> Response {
        let start = Instant::now();
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(request.id);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let response = match &self.error {
            Some(error) => {
                Response::failure(request.id, self.id.clone(), start.elapsed(), error.clone())
            }
            None => Response::success(request.id, self.id.clone(), start.elapsed(), self.data_size),
        };
        self.metrics.record(&response);
        response
    }

    fn metrics(&self) -> ComponentMetrics {
        self.metrics.snapshot()
    }

    fn cost(&self) -> f64 {
        self.cost
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }
}

/// Component that holds every request until [`GatedComponent::open`].
pub struct GatedComponent {
    id: ComponentId,
    open: AtomicBool,
    gate: Notify,
    entered: AtomicUsize,
    entered_changed: Notify,
    current: AtomicUsize,
    max_concurrent: AtomicUsize,
    healthy: AtomicBool,
    metrics: MetricsRecorder,
}

impl GatedComponent {
    pub fn new(id: impl Into<ComponentId>) -> Self {
        Self {
            id: id.into(),
            open: AtomicBool::new(false),
            gate: Notify::new(),
            entered: AtomicUsize::new(0),
            entered_changed: Notify::new(),
            current: AtomicUsize::new(0),
            max_concurrent: AtomicUsize::new(0),
            healthy: AtomicBool::new(true),
            metrics: MetricsRecorder::new(),
        }
    }

    /// Release every parked request and let later ones through.
    pub fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
        self.gate.notify_waiters();
    }

    /// Requests that have reached the gate so far.
    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }

    /// Requests currently parked or finishing.
    pub fn in_flight(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    /// Peak number of requests inside `process` at once.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` requests have reached the gate.
    pub async fn wait_for_entered(&self, count: usize) {
        loop {
            let changed = self.entered_changed.notified();
            if self.entered() >= count {
                return;
            }
            changed.await;
        }
    }

    async fn wait_for_gate(&self) {
        loop {
            let opened = self.gate.notified();
            if self.open.load(Ordering::SeqCst) {
                return;
            }
            opened.await;
        }
    }
}

#[async_trait]
impl Component for GatedComponent {
    fn id(&self) -> &ComponentId {
        &self.id
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Custom("gated".into())
    }

    async fn process(&self, request: &Request) -> Response {
        let start = Instant::now();
        let now_inside = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(now_inside, Ordering::SeqCst);
        self.entered.fetch_add(1, Ordering::SeqCst);
        self.entered_changed.notify_waiters();

        self.wait_for_gate().await;

        self.current.fetch_sub(1, Ordering::SeqCst);
        let response =
            Response::success(request.id, self.id.clone(), start.elapsed(), request.data_size);
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
        self.healthy.load(Ordering::SeqCst)
    }

    fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }
}

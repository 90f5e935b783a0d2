//! The simulator: component registry, request queue, dispatch and tick loops.

use crate::config::SimulatorConfig;
use crate::error::SimulatorError;
use crate::metrics::{AggregateMetrics, AggregateRecorder};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use sysdesign_core::{Component, ComponentKind};
use sysdesign_types::{ComponentError, ComponentId, ComponentMetrics, Request, Response};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};

/// Kinds eligible as implicit entry points, in priority order.
const ENTRY_POINT_PRIORITY: [ComponentKind; 3] = [
    ComponentKind::Cdn,
    ComponentKind::LoadBalancer,
    ComponentKind::ApiServer,
];

/// State shared between the public handle, the loops and dispatch tasks.
struct Shared {
    registry: RwLock<IndexMap<ComponentId, Arc<dyn Component>>>,
    entry_point: RwLock<Option<ComponentId>>,
    metrics: AggregateRecorder,
    /// Submitted and not yet completed (queued or processing).
    pending: AtomicUsize,
    idle: Notify,
    clock: Mutex<SystemTime>,
    tasks: TaskTracker,
}

impl Shared {
    /// Designated entry point, else the first registered CDN, load balancer
    /// or API server, in that priority.
    fn select_entry_point(&self) -> Option<Arc<dyn Component>> {
        let registry = self.registry.read();
        if let Some(id) = self.entry_point.read().as_ref() {
            if let Some(component) = registry.get(id) {
                return Some(component.clone());
            }
        }
        ENTRY_POINT_PRIORITY.iter().find_map(|kind| {
            registry
                .values()
                .find(|component| component.kind() == *kind)
                .cloned()
        })
    }

    fn dispatch(self: &Arc<Self>, request: Request) {
        let entry = self.select_entry_point();
        let shared = self.clone();
        self.tasks.spawn(async move {
            let start = Instant::now();
            let mut response = match entry {
                Some(component) => component.process(&request).await,
                None => {
                    warn!(request = %request.id, "No entry point registered, dropping request");
                    Response::rejected(request.id, ComponentError::NoEntryPoint)
                }
            };
            // The entry hop measured from its own start; re-measure here so
            // queue-to-entry overhead is included too.
            response.latency = response.latency.max(start.elapsed());
            debug!(
                request = %request.id,
                success = response.is_success(),
                latency_ms = response.latency.as_millis() as u64,
                hops = response.hops.len(),
                "Request completed"
            );
            shared.metrics.record(&response);
            shared.finish_one();
        });
    }

    fn finish_one(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }

    fn refresh(&self) {
        let components: Vec<Arc<dyn Component>> = self.registry.read().values().cloned().collect();
        let snapshots: IndexMap<ComponentId, ComponentMetrics> = components
            .iter()
            .map(|component| (component.id().clone(), component.metrics()))
            .collect();
        let total_cost = components.iter().map(|component| component.cost()).sum();
        self.metrics.update_components(snapshots, total_cost);
    }
}

/// Handles of a running simulator.
struct Running {
    sender: mpsc::Sender<Request>,
    cancel: CancellationToken,
    dispatch_loop: JoinHandle<()>,
    tick_loop: JoinHandle<()>,
}

/// Request-flow simulator over a registry of components.
///
/// Components are created and wired by the caller, then registered here.
/// While running, submitted requests are queued (bounded), handed one task
/// each to the entry-point component, and folded into aggregate metrics on
/// completion. A tick loop refreshes per-component snapshots and advances a
/// virtual display clock.
///
/// # Example
///
/// ```ignore
/// let sim = Simulator::new(SimulatorConfig::default());
/// sim.register_component(api.clone())?;
/// sim.set_entry_point(api.id())?;
/// sim.start()?;
/// sim.submit_request(Request::read(1, "/users")).await?;
/// sim.wait_for_in_flight().await;
/// println!("P99: {:?}", sim.p99_latency());
/// sim.stop().await;
/// ```
pub struct Simulator {
    config: SimulatorConfig,
    shared: Arc<Shared>,
    running: Mutex<Option<Running>>,
}

impl Simulator {
    /// Create a stopped simulator with an empty registry.
    pub fn new(config: SimulatorConfig) -> Self {
        let shared = Shared {
            registry: RwLock::new(IndexMap::new()),
            entry_point: RwLock::new(None),
            metrics: AggregateRecorder::new(config.latency_window),
            pending: AtomicUsize::new(0),
            idle: Notify::new(),
            clock: Mutex::new(SystemTime::now()),
            tasks: TaskTracker::new(),
        };
        Self {
            config,
            shared: Arc::new(shared),
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Registry
    // ═══════════════════════════════════════════════════════════════════════

    /// Register a component under its id.
    pub fn register_component(&self, component: Arc<dyn Component>) -> Result<(), SimulatorError> {
        let id = component.id().clone();
        let mut registry = self.shared.registry.write();
        if registry.contains_key(&id) {
            return Err(SimulatorError::DuplicateComponent(id));
        }
        info!(component = %id, kind = %component.kind(), "Registered component");
        registry.insert(id, component);
        Ok(())
    }

    /// Remove a component. Clears the entry-point designation if it pointed
    /// here. Requests already holding the component finish normally;
    /// upstream handles to it fail with a downstream-gone error once the
    /// last strong reference is dropped.
    pub fn unregister_component(&self, id: &ComponentId) -> Result<Arc<dyn Component>, SimulatorError> {
        let removed = self
            .shared
            .registry
            .write()
            .shift_remove(id)
            .ok_or_else(|| SimulatorError::ComponentNotFound(id.clone()))?;
        let mut entry_point = self.shared.entry_point.write();
        if entry_point.as_ref() == Some(id) {
            *entry_point = None;
        }
        info!(component = %id, "Unregistered component");
        Ok(removed)
    }

    pub fn get_component(&self, id: &ComponentId) -> Result<Arc<dyn Component>, SimulatorError> {
        self.shared
            .registry
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| SimulatorError::ComponentNotFound(id.clone()))
    }

    /// Registered components in registration order.
    pub fn components(&self) -> Vec<Arc<dyn Component>> {
        self.shared.registry.read().values().cloned().collect()
    }

    pub fn component_ids(&self) -> Vec<ComponentId> {
        self.shared.registry.read().keys().cloned().collect()
    }

    /// Designate the component receiving submitted requests.
    pub fn set_entry_point(&self, id: &ComponentId) -> Result<(), SimulatorError> {
        if !self.shared.registry.read().contains_key(id) {
            return Err(SimulatorError::ComponentNotFound(id.clone()));
        }
        info!(component = %id, "Entry point set");
        *self.shared.entry_point.write() = Some(id.clone());
        Ok(())
    }

    /// Fall back to type-priority selection.
    pub fn clear_entry_point(&self) {
        *self.shared.entry_point.write() = None;
    }

    /// Component that would receive a request submitted now.
    pub fn entry_point(&self) -> Option<ComponentId> {
        self.shared
            .select_entry_point()
            .map(|component| component.id().clone())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Lifecycle
    // ═══════════════════════════════════════════════════════════════════════

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Spawn the dispatch and tick loops on the current tokio runtime.
    ///
    /// Each start creates a fresh queue and cancellation token, so a stopped
    /// simulator can be started again. Aggregate metrics carry over.
    pub fn start(&self) -> Result<(), SimulatorError> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(SimulatorError::AlreadyRunning);
        }

        let (sender, receiver) = mpsc::channel(self.config.queue_capacity);
        let cancel = CancellationToken::new();
        let dispatch_loop = tokio::spawn(dispatch_loop(
            self.shared.clone(),
            receiver,
            cancel.clone(),
        ));
        let tick_loop = tokio::spawn(tick_loop(
            self.shared.clone(),
            self.config.tick_interval,
            cancel.clone(),
        ));

        info!(
            queue_capacity = self.config.queue_capacity,
            tick_ms = self.config.tick_interval.as_millis() as u64,
            components = self.shared.registry.read().len(),
            "Simulator started"
        );
        *running = Some(Running {
            sender,
            cancel,
            dispatch_loop,
            tick_loop,
        });
        Ok(())
    }

    /// Stop the loops and close the queue. Requests still queued are
    /// discarded; requests already dispatched run to completion and are
    /// still counted. No-op when already stopped.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };
        running.cancel.cancel();
        drop(running.sender);
        for (name, handle) in [
            ("dispatch", running.dispatch_loop),
            ("tick", running.tick_loop),
        ] {
            if let Err(e) = handle.await {
                warn!(task = name, error = %e, "Simulator task ended abnormally");
            }
        }
        info!("Simulator stopped");
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Submission
    // ═══════════════════════════════════════════════════════════════════════

    fn sender(&self) -> Result<mpsc::Sender<Request>, SimulatorError> {
        self.running
            .lock()
            .as_ref()
            .map(|running| running.sender.clone())
            .ok_or(SimulatorError::NotRunning)
    }

    /// Enqueue a request, waiting for room when the queue is full. Returns
    /// [`SimulatorError::NotRunning`] without enqueueing when stopped.
    pub async fn submit_request(&self, request: Request) -> Result<(), SimulatorError> {
        let sender = self.sender()?;
        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        if sender.send(request).await.is_err() {
            self.shared.finish_one();
            return Err(SimulatorError::NotRunning);
        }
        Ok(())
    }

    /// Enqueue without waiting.
    pub fn try_submit(&self, request: Request) -> Result<(), SimulatorError> {
        let sender = self.sender()?;
        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        sender.try_send(request).map_err(|e| {
            self.shared.finish_one();
            match e {
                mpsc::error::TrySendError::Full(_) => SimulatorError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => SimulatorError::NotRunning,
            }
        })
    }

    /// Requests submitted and not yet completed.
    pub fn in_flight(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    /// Wait until every submitted request has completed or been discarded.
    pub async fn wait_for_in_flight(&self) {
        loop {
            let idle = self.shared.idle.notified();
            if self.in_flight() == 0 {
                return;
            }
            idle.await;
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Metrics
    // ═══════════════════════════════════════════════════════════════════════

    /// Snapshot of totals, cost, and the per-component map as of the last
    /// tick (or [`refresh_metrics`](Self::refresh_metrics)).
    pub fn get_metrics(&self) -> AggregateMetrics {
        self.shared.metrics.snapshot(self.in_flight())
    }

    /// Nearest-rank P99 over the recent-latency window.
    pub fn p99_latency(&self) -> Duration {
        self.shared.metrics.p99()
    }

    /// Refresh per-component snapshots and cost immediately.
    pub fn refresh_metrics(&self) {
        self.shared.refresh();
    }

    /// Clear aggregate counters and latency history.
    pub fn reset_metrics(&self) {
        self.shared.metrics.reset();
    }

    /// Virtual display clock: creation time plus one tick interval per tick.
    pub fn current_time(&self) -> SystemTime {
        *self.shared.clock.lock()
    }
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new(SimulatorConfig::default())
    }
}

impl Drop for Simulator {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.cancel.cancel();
        }
    }
}

async fn dispatch_loop(
    shared: Arc<Shared>,
    mut receiver: mpsc::Receiver<Request>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            request = receiver.recv() => match request {
                Some(request) => shared.dispatch(request),
                None => break,
            },
        }
    }

    receiver.close();
    let mut discarded = 0usize;
    while receiver.try_recv().is_ok() {
        shared.finish_one();
        discarded += 1;
    }
    if discarded > 0 {
        warn!(discarded, "Discarded queued requests on stop");
    }
}

async fn tick_loop(shared: Arc<Shared>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                shared.refresh();
                let now = {
                    let mut clock = shared.clock.lock();
                    *clock += interval;
                    *clock
                };
                trace!(?now, "Tick");
            }
        }
    }
}

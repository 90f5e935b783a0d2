//! One player's level attempts against a campaign.

use crate::error::GameError;
use crate::level::{Campaign, Level, LevelResult};
use crate::scoring::{evaluate, Observation};
use indexmap::IndexMap;
use std::sync::Arc;
use std::time::Duration;
use sysdesign_core::Component;
use sysdesign_engine::{AggregateMetrics, Simulator, SimulatorConfig, SimulatorError};
use sysdesign_types::{ComponentId, Request};
use tokio::time::Instant;
use tracing::{info, warn};

struct Attempt {
    level: Level,
    simulator: Arc<Simulator>,
    started: Instant,
}

/// Drives a fresh [`Simulator`] per level attempt.
///
/// The design (the set of placed components) outlives attempts: components
/// added while no level runs are staged and registered when the next level
/// starts; components added during an attempt are registered immediately.
pub struct GameSession {
    campaign: Campaign,
    config: SimulatorConfig,
    design: IndexMap<ComponentId, Arc<dyn Component>>,
    attempt: Option<Attempt>,
}

impl GameSession {
    pub fn new(campaign: Campaign) -> Self {
        Self {
            campaign,
            config: SimulatorConfig::default(),
            design: IndexMap::new(),
            attempt: None,
        }
    }

    /// Configuration used for every attempt's simulator.
    pub fn with_simulator_config(mut self, config: SimulatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn campaign(&self) -> &Campaign {
        &self.campaign
    }

    pub fn is_running(&self) -> bool {
        self.attempt.is_some()
    }

    pub fn current_level(&self) -> Option<&Level> {
        self.attempt.as_ref().map(|attempt| &attempt.level)
    }

    /// Simulator of the running attempt, for driving traffic concurrently.
    pub fn simulator(&self) -> Option<Arc<Simulator>> {
        self.attempt.as_ref().map(|attempt| attempt.simulator.clone())
    }

    /// Components in the design, in placement order.
    pub fn components(&self) -> impl Iterator<Item = &Arc<dyn Component>> {
        self.design.values()
    }

    /// Number of placed components per family (`api-server`, `cache`, ...).
    pub fn component_counts(&self) -> IndexMap<String, usize> {
        let mut counts = IndexMap::new();
        for component in self.design.values() {
            *counts.entry(component.kind().family().to_string()).or_insert(0) += 1;
        }
        counts
    }

    pub fn component_count(&self, family: &str) -> usize {
        self.design
            .values()
            .filter(|component| component.kind().family() == family)
            .count()
    }

    /// Place a component. Registered right away when a level is running.
    pub fn add_component(&mut self, component: Arc<dyn Component>) -> Result<(), GameError> {
        let id = component.id().clone();
        if self.design.contains_key(&id) {
            return Err(SimulatorError::DuplicateComponent(id).into());
        }
        if let Some(attempt) = &self.attempt {
            attempt.simulator.register_component(component.clone())?;
        }
        self.design.insert(id, component);
        Ok(())
    }

    pub fn remove_component(&mut self, id: &ComponentId) -> Result<Arc<dyn Component>, GameError> {
        let removed = self
            .design
            .shift_remove(id)
            .ok_or_else(|| SimulatorError::ComponentNotFound(id.clone()))?;
        if let Some(attempt) = &self.attempt {
            attempt.simulator.unregister_component(id)?;
        }
        Ok(removed)
    }

    /// Start an attempt at `level_id` on a fresh simulator with the current
    /// design registered.
    pub fn start_level(&mut self, level_id: u32) -> Result<(), GameError> {
        if self.attempt.is_some() {
            return Err(SimulatorError::AlreadyRunning.into());
        }
        let level = self.campaign.level(level_id)?;
        if !level.unlocked {
            return Err(GameError::LevelLocked(level_id));
        }

        let simulator = Arc::new(Simulator::new(self.config.clone()));
        for component in self.design.values() {
            simulator.register_component(component.clone())?;
        }
        simulator.start()?;

        info!(
            level = level.id,
            name = %level.name,
            components = self.design.len(),
            "Level started"
        );
        self.attempt = Some(Attempt {
            level: level.clone(),
            simulator,
            started: Instant::now(),
        });
        Ok(())
    }

    /// Submit one request to the running attempt.
    pub async fn submit_request(&self, request: Request) -> Result<(), GameError> {
        let simulator = self.simulator().ok_or(GameError::NotRunning)?;
        simulator.submit_request(request).await?;
        Ok(())
    }

    /// Live metrics of the running attempt.
    pub fn metrics(&self) -> Result<AggregateMetrics, GameError> {
        let attempt = self.attempt.as_ref().ok_or(GameError::NotRunning)?;
        attempt.simulator.refresh_metrics();
        Ok(attempt.simulator.get_metrics())
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.attempt.as_ref().map(|attempt| attempt.started.elapsed())
    }

    /// End the attempt: stop the simulator, let dispatched requests finish,
    /// score the run and fold the result into the campaign.
    pub async fn stop_level(&mut self) -> Result<LevelResult, GameError> {
        let attempt = self.attempt.take().ok_or(GameError::NotRunning)?;
        let duration = attempt.started.elapsed();
        attempt.simulator.stop().await;
        attempt.simulator.wait_for_in_flight().await;
        attempt.simulator.refresh_metrics();

        let metrics = attempt.simulator.get_metrics();
        let observed = Observation::from_metrics(&metrics);
        let result = evaluate(&attempt.level, &observed, &self.component_counts(), duration);
        self.campaign.record(&result)?;

        if result.passed {
            info!(level = result.level_id, score = result.score, "Level passed");
        } else {
            warn!(
                level = result.level_id,
                score = result.score,
                misses = result.feedback.len().saturating_sub(1),
                "Level failed"
            );
        }
        Ok(result)
    }
}

//! Levels and the campaign that unlocks them in order.

use crate::error::GameError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Difficulty {
    #[default]
    Easy,
    Medium,
    Hard,
    Expert,
}

/// Kind of application the level asks the player to host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AppType {
    #[default]
    Blog,
    SocialMedia,
    Ecommerce,
    Streaming,
    Messaging,
    FileStorage,
    Analytics,
}

/// Hard thresholds. Missing any of them fails the level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Requirements {
    pub max_latency_p99: Duration,
    pub min_uptime: f64,
    pub max_error_rate: f64,
    /// Zero disables the check.
    pub min_cache_hit_rate: f64,
    pub require_load_balancer: bool,
    pub require_cdn: bool,
}

impl Default for Requirements {
    fn default() -> Self {
        Self {
            max_latency_p99: Duration::from_millis(500),
            min_uptime: 0.95,
            max_error_rate: 0.05,
            min_cache_hit_rate: 0.0,
            require_load_balancer: false,
            require_cdn: false,
        }
    }
}

/// Stretch targets. Each one met on a passed level earns a bonus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuccessCriteria {
    pub target_latency_p99: Duration,
    pub target_uptime: f64,
    pub target_error_rate: f64,
    pub target_cache_hit_rate: f64,
    /// Stretch budget, below the level's hard budget.
    pub max_budget: f64,
    /// Free-form objectives shown to the player.
    pub bonus_objectives: Vec<String>,
}

impl Default for SuccessCriteria {
    fn default() -> Self {
        Self {
            target_latency_p99: Duration::from_millis(200),
            target_uptime: 0.99,
            target_error_rate: 0.01,
            target_cache_hit_rate: 0.5,
            max_budget: 0.0,
            bonus_objectives: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Level {
    pub id: u32,
    pub name: String,
    pub description: String,
    pub difficulty: Difficulty,
    pub app_type: AppType,
    pub initial_users: u64,
    pub peak_users: u64,
    pub duration: Duration,
    /// Hourly budget in dollars.
    pub budget: f64,
    pub requirements: Requirements,
    pub success_criteria: SuccessCriteria,
    pub unlocked: bool,
    pub completed: bool,
    pub best_score: u32,
}

impl Level {
    /// A locked level with default thresholds.
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: String::new(),
            difficulty: Difficulty::default(),
            app_type: AppType::default(),
            initial_users: 1,
            peak_users: 10,
            duration: Duration::from_secs(300),
            budget: 10.0,
            requirements: Requirements::default(),
            success_criteria: SuccessCriteria::default(),
            unlocked: false,
            completed: false,
            best_score: 0,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_difficulty(mut self, difficulty: Difficulty) -> Self {
        self.difficulty = difficulty;
        self
    }

    pub fn with_app_type(mut self, app_type: AppType) -> Self {
        self.app_type = app_type;
        self
    }

    pub fn with_users(mut self, initial: u64, peak: u64) -> Self {
        self.initial_users = initial;
        self.peak_users = peak;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_budget(mut self, budget: f64) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_requirements(mut self, requirements: Requirements) -> Self {
        self.requirements = requirements;
        self
    }

    pub fn with_success_criteria(mut self, criteria: SuccessCriteria) -> Self {
        self.success_criteria = criteria;
        self
    }

    pub fn unlocked(mut self) -> Self {
        self.unlocked = true;
        self
    }
}

/// Outcome of one level attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelResult {
    pub level_id: u32,
    pub passed: bool,
    pub score: u32,
    pub duration: Duration,
    pub observed: crate::Observation,
    pub bonuses: Vec<String>,
    pub feedback: Vec<String>,
}

/// Ordered levels with unlock-next progression.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Campaign {
    levels: Vec<Level>,
}

impl Campaign {
    /// Build a campaign. The first level is unlocked if none is.
    pub fn new(mut levels: Vec<Level>) -> Self {
        if !levels.iter().any(|level| level.unlocked) {
            if let Some(first) = levels.first_mut() {
                first.unlocked = true;
            }
        }
        Self { levels }
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn level(&self, id: u32) -> Result<&Level, GameError> {
        self.levels
            .iter()
            .find(|level| level.id == id)
            .ok_or(GameError::LevelNotFound(id))
    }

    pub fn unlocked_levels(&self) -> impl Iterator<Item = &Level> {
        self.levels.iter().filter(|level| level.unlocked)
    }

    /// Unlock the first locked level, returning its id.
    pub fn unlock_next(&mut self) -> Option<u32> {
        let next = self.levels.iter_mut().find(|level| !level.unlocked)?;
        next.unlocked = true;
        info!(level = next.id, name = %next.name, "Level unlocked");
        Some(next.id)
    }

    /// Fold an attempt into the campaign: a pass completes the level, keeps
    /// the best score and unlocks the next one.
    pub fn record(&mut self, result: &LevelResult) -> Result<(), GameError> {
        if !result.passed {
            // Still validate the id.
            self.level(result.level_id)?;
            return Ok(());
        }
        let level = self
            .levels
            .iter_mut()
            .find(|level| level.id == result.level_id)
            .ok_or(GameError::LevelNotFound(result.level_id))?;
        level.completed = true;
        level.best_score = level.best_score.max(result.score);
        self.unlock_next();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Observation;

    fn result(level_id: u32, passed: bool, score: u32) -> LevelResult {
        LevelResult {
            level_id,
            passed,
            score,
            duration: Duration::ZERO,
            observed: Observation::default(),
            bonuses: Vec::new(),
            feedback: Vec::new(),
        }
    }

    fn campaign() -> Campaign {
        Campaign::new(vec![
            Level::new(1, "Local Blog"),
            Level::new(2, "Growing Blog"),
            Level::new(3, "Regional Social Network"),
        ])
    }

    #[test]
    fn test_first_level_unlocked_by_default() {
        let campaign = campaign();
        let unlocked: Vec<u32> = campaign.unlocked_levels().map(|l| l.id).collect();
        assert_eq!(unlocked, vec![1]);
    }

    #[test]
    fn test_pass_unlocks_next_and_keeps_best_score() {
        let mut campaign = campaign();
        campaign.record(&result(1, true, 900)).unwrap();
        campaign.record(&result(1, true, 700)).unwrap();

        let level = campaign.level(1).unwrap();
        assert!(level.completed);
        assert_eq!(level.best_score, 900);
        assert!(campaign.level(2).unwrap().unlocked);
        assert!(campaign.level(3).unwrap().unlocked);
    }

    #[test]
    fn test_failure_changes_nothing() {
        let mut campaign = campaign();
        campaign.record(&result(1, false, 400)).unwrap();
        assert!(!campaign.level(1).unwrap().completed);
        assert!(!campaign.level(2).unwrap().unlocked);
        assert_eq!(
            campaign.record(&result(9, false, 0)),
            Err(GameError::LevelNotFound(9))
        );
    }

    #[test]
    fn test_unlock_next_exhausts() {
        let mut campaign = Campaign::new(vec![Level::new(1, "only")]);
        assert_eq!(campaign.unlock_next(), None);
    }
}

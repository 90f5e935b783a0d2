//! Level verdict and score.

use crate::level::{Level, LevelResult};
use indexmap::IndexMap;
use serde::Serialize;
use std::time::Duration;
use sysdesign_engine::AggregateMetrics;

const BASE_SCORE: i64 = 1000;
const THRESHOLD_PENALTY: i64 = 200;
const REQUIREMENT_PENALTY: i64 = 100;
const UPTIME_BONUS: i64 = 100;
const ERROR_RATE_BONUS: i64 = 100;
const LATENCY_BONUS: i64 = 100;
const STRETCH_BUDGET_BONUS: i64 = 150;
const CACHE_BONUS: i64 = 50;
const MAX_SAVINGS_BONUS: f64 = 200.0;

/// Figures a level attempt is judged on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Observation {
    pub uptime: f64,
    pub error_rate: f64,
    pub p99_latency: Duration,
    /// Best hit rate among the registered components.
    pub cache_hit_rate: f64,
    /// Hourly cost of the design.
    pub cost: f64,
}

impl Observation {
    pub fn from_metrics(metrics: &AggregateMetrics) -> Self {
        let cache_hit_rate = metrics
            .components
            .values()
            .map(|component| component.cache_hit_rate)
            .fold(0.0, f64::max);
        Self {
            uptime: metrics.uptime,
            error_rate: metrics.error_rate,
            p99_latency: metrics.p99_latency,
            cache_hit_rate,
            cost: metrics.total_cost,
        }
    }
}

/// Judge an attempt against the level's thresholds.
///
/// `counts` maps component families (`load-balancer`, `cdn`, ...) to the
/// number placed in the design.
pub fn evaluate(
    level: &Level,
    observed: &Observation,
    counts: &IndexMap<String, usize>,
    duration: Duration,
) -> LevelResult {
    let req = &level.requirements;
    let crit = &level.success_criteria;
    let mut passed = true;
    let mut score = BASE_SCORE;
    let mut feedback = Vec::new();
    let mut bonuses = Vec::new();
    let has = |family: &str| counts.get(family).copied().unwrap_or(0) > 0;

    if observed.uptime < req.min_uptime {
        passed = false;
        score -= THRESHOLD_PENALTY;
        feedback.push(format!(
            "Uptime too low: {:.2}% (required: {:.2}%)",
            observed.uptime * 100.0,
            req.min_uptime * 100.0
        ));
    }
    if observed.error_rate > req.max_error_rate {
        passed = false;
        score -= THRESHOLD_PENALTY;
        feedback.push(format!(
            "Error rate too high: {:.2}% (max: {:.2}%)",
            observed.error_rate * 100.0,
            req.max_error_rate * 100.0
        ));
    }
    if observed.p99_latency > req.max_latency_p99 {
        passed = false;
        score -= THRESHOLD_PENALTY;
        feedback.push(format!(
            "P99 latency too high: {}ms (max: {}ms)",
            observed.p99_latency.as_millis(),
            req.max_latency_p99.as_millis()
        ));
    }
    if observed.cost > level.budget {
        passed = false;
        score -= THRESHOLD_PENALTY;
        feedback.push(format!(
            "Over budget: ${:.2} (budget: ${:.2})",
            observed.cost, level.budget
        ));
    }
    if req.require_load_balancer && !has("load-balancer") {
        passed = false;
        score -= REQUIREMENT_PENALTY;
        feedback.push("Missing required component: Load Balancer".to_string());
    }
    if req.require_cdn && !has("cdn") {
        passed = false;
        score -= REQUIREMENT_PENALTY;
        feedback.push("Missing required component: CDN".to_string());
    }
    if req.min_cache_hit_rate > 0.0 && observed.cache_hit_rate < req.min_cache_hit_rate {
        passed = false;
        score -= REQUIREMENT_PENALTY;
        feedback.push(format!(
            "Cache hit rate too low: {:.1}% (required: {:.1}%)",
            observed.cache_hit_rate * 100.0,
            req.min_cache_hit_rate * 100.0
        ));
    }

    if passed {
        let mut bonus = |earned: bool, points: i64, label: &str| {
            if earned {
                score += points;
                bonuses.push(label.to_string());
            }
        };
        bonus(observed.uptime >= crit.target_uptime, UPTIME_BONUS, "Excellent uptime");
        bonus(observed.error_rate <= crit.target_error_rate, ERROR_RATE_BONUS, "Low error rate");
        bonus(
            observed.p99_latency <= crit.target_latency_p99,
            LATENCY_BONUS,
            "Fast response time",
        );
        bonus(observed.cost <= crit.max_budget, STRETCH_BUDGET_BONUS, "Cost efficient");
        bonus(
            observed.cache_hit_rate >= crit.target_cache_hit_rate,
            CACHE_BONUS,
            "Great cache hit rate",
        );

        if level.budget > 0.0 {
            let savings = 1.0 - observed.cost / level.budget;
            if savings > 0.0 {
                score += (savings * MAX_SAVINGS_BONUS).min(MAX_SAVINGS_BONUS) as i64;
            }
        }
        feedback.push("Level completed successfully!".to_string());
    } else {
        feedback.push("Level failed. Try again with a better architecture!".to_string());
    }

    LevelResult {
        level_id: level.id,
        passed,
        score: u32::try_from(score.max(0)).unwrap_or(u32::MAX),
        duration,
        observed: *observed,
        bonuses,
        feedback,
    }
}

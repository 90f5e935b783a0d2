//! Traffic shape: daily load curve, request mix, and geographic spread.

use indexmap::IndexMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use sysdesign_types::{regions, ParseEnumError};

/// Load curve over the hours of a day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DailyPattern {
    #[default]
    Steady,
    /// Peak 09:00-17:59, shoulders 07:00-19:59.
    BusinessHours,
    /// Peak 19:00-23:59, shoulders from 17:00 to 01:59, lunch bump.
    EveningPeak,
}

impl DailyPattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            DailyPattern::Steady => "steady",
            DailyPattern::BusinessHours => "business-hours",
            DailyPattern::EveningPeak => "evening-peak",
        }
    }
}

impl fmt::Display for DailyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DailyPattern {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "steady" => Ok(DailyPattern::Steady),
            "business-hours" => Ok(DailyPattern::BusinessHours),
            "evening-peak" => Ok(DailyPattern::EveningPeak),
            _ => Err(ParseEnumError {
                kind: "daily pattern",
                value: s.to_string(),
            }),
        }
    }
}

/// Request category drawn from a pattern's mix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrafficKind {
    Read,
    Write,
    /// Static asset, served from edges when a CDN is in front.
    Static,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafficPattern {
    /// Percentages of the mix. Whatever reads and writes leave over is static.
    pub reads_percentage: f64,
    pub writes_percentage: f64,
    pub static_percentage: f64,
    pub peak_multiplier: f64,
    pub daily: DailyPattern,
}

impl Default for TrafficPattern {
    fn default() -> Self {
        Self {
            reads_percentage: 80.0,
            writes_percentage: 20.0,
            static_percentage: 0.0,
            peak_multiplier: 1.0,
            daily: DailyPattern::Steady,
        }
    }
}

impl TrafficPattern {
    pub fn steady() -> Self {
        Self::default()
    }

    pub fn business_hours(peak_multiplier: f64) -> Self {
        Self {
            peak_multiplier,
            daily: DailyPattern::BusinessHours,
            ..Self::default()
        }
    }

    pub fn evening_peak(peak_multiplier: f64) -> Self {
        Self {
            peak_multiplier,
            daily: DailyPattern::EveningPeak,
            ..Self::default()
        }
    }

    pub fn with_mix(mut self, reads: f64, writes: f64, statics: f64) -> Self {
        self.reads_percentage = reads;
        self.writes_percentage = writes;
        self.static_percentage = statics;
        self
    }

    /// Load multiplier at `hour` (0-23) of the day.
    pub fn multiplier_at(&self, hour: u32) -> f64 {
        let peak = self.peak_multiplier;
        match self.daily {
            DailyPattern::Steady => 1.0,
            DailyPattern::BusinessHours => match hour {
                9..=17 => peak,
                7..=19 => (peak + 1.0) / 2.0,
                _ => 0.3,
            },
            DailyPattern::EveningPeak => match hour {
                19..=23 => peak,
                h if h >= 17 || h <= 1 => (peak + 1.0) / 2.0,
                12..=14 => (peak + 1.0) / 2.5,
                _ => 0.4,
            },
        }
    }

    /// Expected requests per second at `hour` for a baseline rate.
    pub fn rps_at(&self, baseline: u64, hour: u32) -> u64 {
        (baseline as f64 * self.multiplier_at(hour)) as u64
    }

    /// Draw a request category from the mix.
    pub fn sample_kind<R: Rng + ?Sized>(&self, rng: &mut R) -> TrafficKind {
        let roll = rng.gen_range(0.0..100.0);
        if roll < self.reads_percentage {
            TrafficKind::Read
        } else if roll < self.reads_percentage + self.writes_percentage {
            TrafficKind::Write
        } else {
            TrafficKind::Static
        }
    }
}

/// Weighted region selection. Weights need not sum to one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionWeights {
    weights: IndexMap<String, f64>,
}

impl RegionWeights {
    pub fn new() -> Self {
        Self::default()
    }

    /// Equal weight across `regions`.
    pub fn uniform<I, S>(regions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        regions.into_iter().fold(Self::new(), |weights, region| weights.with(region, 1.0))
    }

    /// Add or replace a region's weight. Non-positive weights are ignored.
    pub fn with(mut self, region: impl Into<String>, weight: f64) -> Self {
        if weight > 0.0 {
            self.weights.insert(region.into(), weight);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn weight(&self, region: &str) -> f64 {
        self.weights.get(region).copied().unwrap_or(0.0)
    }

    /// Pick a region proportionally to its weight, `us-east` when empty.
    pub fn select<R: Rng + ?Sized>(&self, rng: &mut R) -> &str {
        let total: f64 = self.weights.values().sum();
        if total <= 0.0 {
            return regions::US_EAST;
        }
        let mut roll = rng.gen_range(0.0..total);
        for (region, weight) in &self.weights {
            if roll < *weight {
                return region;
            }
            roll -= weight;
        }
        // Rounding left the roll past the last bucket.
        self.weights.keys().last().map_or(regions::US_EAST, String::as_str)
    }

    /// Region with the largest weight, first on ties.
    pub fn primary(&self) -> Option<&str> {
        self.weights
            .iter()
            .fold(None, |best: Option<(&String, f64)>, (region, &weight)| match best {
                Some((_, top)) if top >= weight => best,
                _ => Some((region, weight)),
            })
            .map(|(region, _)| region.as_str())
    }
}

//! Game layer over the simulation engine.
//!
//! - [`Level`] and [`Campaign`]: thresholds, stretch targets, unlock-next
//!   progression with best-score tracking
//! - [`GameSession`]: runs one level attempt on a fresh simulator and scores
//!   it with [`evaluate`]
//! - [`TrafficPattern`] and [`RegionWeights`]: daily load curves, request
//!   mix and geographic spread used to synthesize workloads

mod error;
mod level;
mod scoring;
mod session;
mod traffic;

pub use error::GameError;
pub use level::{AppType, Campaign, Difficulty, Level, LevelResult, Requirements, SuccessCriteria};
pub use scoring::{evaluate, Observation};
pub use session::GameSession;
pub use traffic::{DailyPattern, RegionWeights, TrafficKind, TrafficPattern};

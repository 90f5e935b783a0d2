//! Request-flow simulation engine.
//!
//! The [`Simulator`] owns a registry of [`Component`](sysdesign_core::Component)s,
//! a bounded request queue, and two background loops:
//!
//! - **Dispatch**: hands each queued request to the entry-point component on
//!   its own task and folds the response into [`AggregateMetrics`]
//! - **Tick**: refreshes per-component snapshots and total cost, and advances
//!   the virtual display clock
//!
//! # Example
//!
//! ```ignore
//! use sysdesign_engine::{Simulator, SimulatorConfig};
//! use std::time::Duration;
//!
//! let sim = Simulator::new(SimulatorConfig::new().with_tick_interval(Duration::from_millis(50)));
//! sim.register_component(lb.clone())?;
//! sim.start()?;
//! for i in 0..100 {
//!     sim.submit_request(Request::read(i, "/home")).await?;
//! }
//! sim.wait_for_in_flight().await;
//! sim.stop().await;
//! println!("uptime: {:.2}%", sim.get_metrics().uptime * 100.0);
//! ```

mod config;
mod error;
mod metrics;
mod simulator;

pub use config::{SimulatorConfig, DEFAULT_QUEUE_CAPACITY, DEFAULT_TICK_INTERVAL};
pub use error::SimulatorError;
pub use metrics::{AggregateMetrics, LatencySummary};
pub use simulator::Simulator;

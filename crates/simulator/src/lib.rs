//! System Design Workload Simulator
//!
//! A long-running workload runner built on top of the simulation engine.
//! Drives a declared topology with synthetic traffic and reports how it held up.
//!
//! # Architecture
//!
//! The runner builds on `sysdesign-engine` to provide:
//!
//! - **Topology**: TOML description of components and their wiring
//! - **Workload Generation**: Seeded read/write/static/API mixes across regions and users
//! - **Rate Control**: Fixed-size batches per interval, shaped by a daily traffic pattern
//! - **Reporting**: Uptime, error rate, latency percentiles, cost, per-component breakdown
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use sysdesign_core::Pacing;
//! use sysdesign_engine::Simulator;
//! use sysdesign_simulator::{TopologyConfig, WorkloadConfig, WorkloadRunner};
//!
//! let simulator = Arc::new(Simulator::default());
//! TopologyConfig::reference()
//!     .build(Pacing::real_time())?
//!     .install(&simulator)?;
//!
//! let workload = WorkloadConfig::new().with_target_rps(500).with_seed(12345);
//! let mut runner = WorkloadRunner::new(simulator, workload);
//! let report = runner.run_for(Duration::from_secs(60)).await?;
//!
//! println!("Uptime: {:.2}%", report.metrics.uptime * 100.0);
//! println!("P99 latency: {:?}", report.metrics.p99_latency);
//! ```

pub mod config;
pub mod report;
pub mod runner;
pub mod topology;
pub mod workload;

pub use config::{WorkloadConfig, DEFAULT_SEED};
pub use report::RunReport;
pub use runner::{WorkloadRunner, DEFAULT_DRAIN_TIMEOUT, DEFAULT_PROGRESS_INTERVAL};
pub use topology::{ComponentSpec, Topology, TopologyConfig, TopologyError};
pub use workload::{MixedWorkload, WorkloadGenerator};

//! System Design Simulator CLI
//!
//! Drive a declared topology with synthetic traffic and print how it held up.
//!
//! # Example
//!
//! ```bash
//! # Run the built-in reference topology for 30 seconds at 200 rps
//! sysdesign-sim --rps 200
//!
//! # Run a topology file with a fixed seed, 10x faster than real time
//! sysdesign-sim --topology topology.toml --seed 42 -d 2m --time-scale 0.1
//!
//! # Evening peak at 21:00 with JSON output
//! sysdesign-sim --pattern evening-peak --peak-multiplier 3 --hour 21 --json
//! ```

use anyhow::{bail, Context};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use sysdesign_core::Pacing;
use sysdesign_engine::{Simulator, SimulatorConfig};
use sysdesign_game::{DailyPattern, RegionWeights, TrafficPattern};
use sysdesign_simulator::{TopologyConfig, WorkloadConfig, WorkloadRunner};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// System Design Simulator
///
/// Runs a workload against a topology of simulated infrastructure
/// components. The request stream is reproducible for a given seed.
#[derive(Parser, Debug)]
#[command(name = "sysdesign-sim")]
#[command(version, about, long_about = None)]
struct Args {
    /// Topology file (TOML). When omitted, the built-in reference topology is used.
    #[arg(short = 't', long)]
    topology: Option<PathBuf>,

    /// Length of the submission window (e.g. "30s", "2m")
    #[arg(short = 'd', long, default_value = "30s", value_parser = humantime::parse_duration)]
    duration: Duration,

    /// Target requests per second before the daily pattern is applied
    #[arg(long, default_value = "100")]
    rps: u64,

    /// Random seed for reproducible results. When omitted, a random seed is used.
    #[arg(long)]
    seed: Option<u64>,

    /// Fraction of reads (0.0-1.0)
    #[arg(long)]
    read_ratio: Option<f64>,

    /// Fraction of writes (0.0-1.0)
    #[arg(long)]
    write_ratio: Option<f64>,

    /// Fraction of static asset requests (0.0-1.0)
    #[arg(long)]
    static_ratio: Option<f64>,

    /// Daily traffic pattern: steady, business-hours or evening-peak
    #[arg(long, default_value = "steady")]
    pattern: DailyPattern,

    /// Peak load multiplier for the daily pattern
    #[arg(long, default_value = "2.0")]
    peak_multiplier: f64,

    /// Simulated hour of day (0-23)
    #[arg(long, default_value = "12")]
    hour: u32,

    /// Client region weight as NAME=WEIGHT. Repeatable.
    #[arg(long = "region", value_parser = parse_region)]
    regions: Vec<(String, f64)>,

    /// Distinct keys requests are spread over
    #[arg(long, default_value = "1000")]
    key_space: u64,

    /// Multiplier on every modeled latency (0 = no sleeping)
    #[arg(long, default_value = "1.0")]
    time_scale: f64,

    /// Upper bound on waiting for in-flight requests after submission
    #[arg(long, default_value = "30s", value_parser = humantime::parse_duration)]
    drain_timeout: Duration,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Log filter, overriding RUST_LOG
    #[arg(long)]
    log_level: Option<String>,
}

fn parse_region(value: &str) -> Result<(String, f64), String> {
    let (name, weight) = value
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=WEIGHT, got '{value}'"))?;
    let weight: f64 = weight
        .parse()
        .map_err(|e| format!("invalid weight '{weight}': {e}"))?;
    if name.is_empty() {
        return Err("region name is empty".to_string());
    }
    Ok((name.to_string(), weight))
}

fn load_topology(path: Option<&PathBuf>) -> anyhow::Result<TopologyConfig> {
    let Some(path) = path else {
        return Ok(TopologyConfig::reference());
    };
    let input = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read topology file {}", path.display()))?;
    TopologyConfig::from_toml_str(&input)
        .with_context(|| format!("Failed to parse topology file {}", path.display()))
}

fn workload_config(args: &Args, seed: u64) -> anyhow::Result<WorkloadConfig> {
    let pattern = match args.pattern {
        DailyPattern::Steady => TrafficPattern::steady(),
        DailyPattern::BusinessHours => TrafficPattern::business_hours(args.peak_multiplier),
        DailyPattern::EveningPeak => TrafficPattern::evening_peak(args.peak_multiplier),
    };

    let mut config = WorkloadConfig::new()
        .with_pattern(pattern)
        .with_target_rps(args.rps)
        .with_hour_of_day(args.hour)
        .with_key_space(args.key_space)
        .with_seed(seed);

    if args.read_ratio.is_some() || args.write_ratio.is_some() {
        let read = args.read_ratio.unwrap_or(config.read_ratio);
        let write = args.write_ratio.unwrap_or(config.write_ratio);
        if read < 0.0 || write < 0.0 || read + write > 1.0 {
            bail!("read and write ratios must be non-negative and sum to at most 1.0");
        }
        config = config.with_mix(read, write);
    }
    if let Some(ratio) = args.static_ratio {
        config = config.with_static_ratio(ratio);
    }

    if !args.regions.is_empty() {
        let regions = args
            .regions
            .iter()
            .fold(RegionWeights::new(), |weights, (name, weight)| {
                weights.with(name.clone(), *weight)
            });
        config = config.with_regions(regions);
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = match &args.log_level {
        Some(level) => EnvFilter::try_new(level).context("Invalid log filter")?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("warn,sysdesign_simulator=info,sysdesign_engine=info")
        }),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let seed = args.seed.unwrap_or_else(rand::random);
    let workload = workload_config(&args, seed)?;

    let topology = load_topology(args.topology.as_ref())?
        .build(Pacing::scaled(args.time_scale))
        .context("Invalid topology")?;

    info!(
        components = topology.components().len(),
        entry_point = ?topology.entry_point(),
        duration = %humantime::format_duration(args.duration),
        rps = workload.effective_rps(),
        seed,
        "Starting simulation"
    );

    let simulator = Arc::new(Simulator::new(SimulatorConfig::new()));
    topology
        .install(&simulator)
        .context("Failed to install topology")?;

    let mut runner = WorkloadRunner::new(simulator, workload).with_drain_timeout(args.drain_timeout);
    let report = runner.run_for(args.duration).await?;

    if args.json {
        println!("{}", report.to_json()?);
    } else {
        println!("\n{report}");
    }
    Ok(())
}

//! End-to-end scenarios across topology loading, the engine, the game layer
//! and the workload runner.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use std::time::Duration;
use sysdesign_core::Pacing;
use sysdesign_engine::Simulator;
use sysdesign_game::{Campaign, GameSession, Level, Requirements};
use sysdesign_simulator::{
    MixedWorkload, TopologyConfig, WorkloadConfig, WorkloadGenerator, WorkloadRunner,
};

const OVERLOADED: &str = r#"
entry_point = "api"

[[components]]
kind = "api-server"
id = "api"
size = "small"
database = "db"

[[components]]
kind = "database"
id = "db"
"#;

#[tokio::test]
async fn test_reference_design_passes_cached_level() {
    let level = Level::new(1, "Read Heavy")
        .with_budget(10.0)
        .with_requirements(Requirements {
            require_load_balancer: true,
            min_cache_hit_rate: 0.5,
            ..Requirements::default()
        });
    let mut session = GameSession::new(Campaign::new(vec![level, Level::new(2, "Next")]));

    let topology = TopologyConfig::reference().build(Pacing::instant()).unwrap();
    for component in topology.components() {
        session.add_component(component.clone()).unwrap();
    }
    assert_eq!(session.component_count("load-balancer"), 1);

    session.start_level(1).unwrap();
    let simulator = session.simulator().unwrap();

    let mut workload = MixedWorkload::new(
        WorkloadConfig::new().with_mix(1.0, 0.0).with_key_space(10),
    );
    let mut rng = ChaCha8Rng::seed_from_u64(3);
    for _ in 0..20 {
        for request in workload.generate_batch(10, &mut rng) {
            session.submit_request(request).await.unwrap();
        }
        simulator.wait_for_in_flight().await;
    }

    let result = session.stop_level().await.unwrap();
    assert!(result.passed, "feedback: {:?}", result.feedback);
    assert_eq!(result.observed.uptime, 1.0);
    assert!(result.observed.cache_hit_rate >= 0.5);
    assert!(result.observed.cost > 0.0 && result.observed.cost < 10.0);
    assert!(session.campaign().level(2).unwrap().unlocked);
}

#[tokio::test(start_paused = true)]
async fn test_undersized_api_server_sheds_load() {
    let topology = TopologyConfig::from_toml_str(OVERLOADED)
        .unwrap()
        .build(Pacing::real_time())
        .unwrap();
    let simulator = Arc::new(Simulator::default());
    topology.install(&simulator).unwrap();

    // 20 requests land together every 50 ms against a capacity of 10.
    let config = WorkloadConfig::new().with_target_rps(400).with_seed(1);
    let mut runner = WorkloadRunner::new(simulator, config);
    let report = runner.run_for(Duration::from_millis(500)).await.unwrap();

    let metrics = &report.metrics;
    assert_eq!(metrics.total_requests, report.submitted);
    assert!(metrics.failed_requests > 0);
    assert!(metrics.successful_requests > 0);
    assert!(metrics.uptime < 1.0);
    assert!(metrics.components["api"].failures > 0);
    assert_eq!(metrics.components["db"].failures, 0);
    assert!(metrics.lifetime.max >= Duration::from_millis(10));
}

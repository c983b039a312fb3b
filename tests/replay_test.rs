//! Replay: a persisted event log reconstructs the run's interaction set and
//! per-epoch statistics exactly.

use swarm_kernel::config::{AgentGroupConfig, ScenarioConfig};
use swarm_kernel::events::to_interactions;
use swarm_kernel::orchestrator::Orchestrator;
use swarm_kernel::types::{Archetype, SoftInteraction};
use swarm_kernel::persist;

fn baseline(seed: u64) -> ScenarioConfig {
    let mut config = ScenarioConfig::minimal("replay-baseline", seed);
    config.n_epochs = 3;
    config.steps_per_epoch = 5;
    config.agents = vec![AgentGroupConfig {
        archetype: Archetype::Honest,
        count: 3,
        params: Default::default(),
    }];
    config
}

fn toxicity_for_epoch(interactions: &[SoftInteraction], epoch: u64) -> f64 {
    let accepted: Vec<f64> = interactions
        .iter()
        .filter(|ix| ix.epoch == epoch && ix.accepted)
        .map(|ix| 1.0 - ix.p)
        .collect();
    if accepted.is_empty() {
        0.0
    } else {
        accepted.iter().sum::<f64>() / accepted.len() as f64
    }
}

#[test]
fn reconstructed_interactions_match_live_run() {
    let report = Orchestrator::new(baseline(42)).unwrap().run().unwrap();

    let live: Vec<SoftInteraction> = report.events.to_interactions().unwrap();
    assert!(!live.is_empty());

    let dir = tempfile::tempdir().unwrap();
    persist::write_run(dir.path(), &report).unwrap();
    let loaded = persist::load_events(dir.path().join(persist::EVENTS_FILE)).unwrap();
    let reconstructed = to_interactions(loaded.iter()).unwrap();

    assert_eq!(live, reconstructed);
}

#[test]
fn replayed_toxicity_matches_live_metrics_exactly() {
    let report = Orchestrator::new(baseline(42)).unwrap().run().unwrap();

    let dir = tempfile::tempdir().unwrap();
    persist::write_run(dir.path(), &report).unwrap();
    let loaded = persist::load_events(dir.path().join(persist::EVENTS_FILE)).unwrap();
    let reconstructed = to_interactions(loaded.iter()).unwrap();

    for metrics in &report.metrics {
        let replayed = toxicity_for_epoch(&reconstructed, metrics.epoch);
        // Machine precision: the same mean over the same floats
        assert_eq!(
            replayed.to_bits(),
            metrics.toxicity_rate.to_bits(),
            "epoch {}",
            metrics.epoch
        );
    }
}

#[test]
fn persisted_log_round_trips_byte_identically() {
    let report = Orchestrator::new(baseline(9)).unwrap().run().unwrap();

    let dir = tempfile::tempdir().unwrap();
    persist::write_run(dir.path(), &report).unwrap();
    let loaded = persist::load_events(dir.path().join(persist::EVENTS_FILE)).unwrap();

    assert_eq!(report.events.events(), loaded.as_slice());
}

#[test]
fn loaded_metrics_match_report() {
    let report = Orchestrator::new(baseline(5)).unwrap().run().unwrap();
    let dir = tempfile::tempdir().unwrap();
    persist::write_run(dir.path(), &report).unwrap();

    let metrics = persist::load_metrics(dir.path().join(persist::METRICS_FILE)).unwrap();
    assert_eq!(metrics, report.metrics);

    let manifest = persist::load_manifest(dir.path().join(persist::MANIFEST_FILE)).unwrap();
    assert_eq!(manifest.scenario_id, "replay-baseline");
    assert_eq!(manifest.n_epochs_completed, 3);
}

//! End-to-end scenarios: population mixes and governance settings with
//! known qualitative signatures.

use swarm_kernel::config::{AgentGroupConfig, AgentParams, ScenarioConfig};
use swarm_kernel::events::EventKind;
use swarm_kernel::orchestrator::Orchestrator;
use swarm_kernel::types::Archetype;

fn group(archetype: Archetype, count: u32) -> AgentGroupConfig {
    AgentGroupConfig {
        archetype,
        count,
        params: Default::default(),
    }
}

/// Baseline: a small honest population with governance off stays benign and
/// productive, and the log digest is reproducible.
#[test]
fn baseline_honest_population_is_benign_and_stable() {
    let make = || {
        let mut config = ScenarioConfig::minimal("baseline", 42);
        config.n_epochs = 3;
        config.steps_per_epoch = 5;
        config.agents = vec![group(Archetype::Honest, 3)];
        config
    };

    let a = Orchestrator::new(make()).unwrap().run().unwrap();
    let b = Orchestrator::new(make()).unwrap().run().unwrap();
    assert_eq!(a.events.digest().unwrap(), b.events.digest().unwrap());

    for metrics in &a.metrics {
        assert!(
            metrics.toxicity_rate <= 0.1,
            "epoch {} toxicity {}",
            metrics.epoch,
            metrics.toxicity_rate
        );
    }
    let welfare: f64 = a.metrics.iter().map(|m| m.total_welfare).sum();
    assert!(welfare > 0.0, "welfare {}", welfare);
}

/// Unchecked adversarial majority: the quality gap trends down into adverse
/// selection within five epochs.
#[test]
fn adversarial_majority_collapses_quality_gap() {
    let mut config = ScenarioConfig::minimal("collapse", 7);
    config.n_epochs = 10;
    config.steps_per_epoch = 10;
    config.agents = vec![
        group(Archetype::Honest, 2),
        group(Archetype::Adversarial, 4),
    ];
    let report = Orchestrator::new(config).unwrap().run().unwrap();

    let gaps: Vec<f64> = report.metrics.iter().map(|m| m.quality_gap).collect();
    for i in 0..4 {
        assert!(
            gaps[i + 1] < gaps[i],
            "quality gap must fall epoch over epoch: {:?}",
            &gaps[..6]
        );
    }
    assert!(gaps[5] <= 0.0, "gap by epoch 5: {}", gaps[5]);
}

/// Circuit breaker: deceptive agents trip the rolling-toxicity threshold and
/// stay silent through the cooldown.
#[test]
fn circuit_breaker_freezes_deceptive_agents() {
    let mut config = ScenarioConfig::minimal("breaker", 123);
    config.n_epochs = 8;
    config.steps_per_epoch = 5;
    config.agents = vec![group(Archetype::Honest, 3), group(Archetype::Deceptive, 2)];
    config.governance.circuit_breaker_enabled = true;
    config.governance.circuit_breaker_threshold = 0.3;
    config.governance.circuit_breaker_window = 5;
    config.governance.circuit_breaker_cooldown = 3;
    let report = Orchestrator::new(config).unwrap().run().unwrap();

    let freeze = report
        .events
        .iter()
        .find(|e| {
            e.kind == EventKind::AgentFrozen
                && e.payload
                    .get("agent")
                    .and_then(|v| v.as_str())
                    .is_some_and(|agent| agent.starts_with("deceptive-"))
        })
        .expect("a deceptive agent must be frozen");
    assert!(freeze.epoch <= 5, "frozen at epoch {}", freeze.epoch);

    let agent = freeze.payload["agent"].as_str().unwrap().to_string();
    let until = freeze.payload["frozen_until"].as_u64().unwrap();

    // No actions from the frozen agent until the cooldown expires
    let acted_while_frozen = report.events.iter().any(|e| {
        e.kind == EventKind::ActionEmitted
            && e.epoch > freeze.epoch
            && e.epoch < until
            && e.payload.get("agent").and_then(|v| v.as_str()) == Some(agent.as_str())
    });
    assert!(!acted_while_frozen);

    // It is skipped instead
    let skipped = report.events.iter().any(|e| {
        e.kind == EventKind::AgentSkipped
            && e.payload.get("agent").and_then(|v| v.as_str()) == Some(agent.as_str())
    });
    assert!(skipped);
}

/// Full auditing: a deceptive agent's reputation falls well below an honest
/// peer's once its glossed interactions are revealed.
#[test]
fn audits_separate_deceptive_from_honest_reputation() {
    let mut config = ScenarioConfig::minimal("audit", 21);
    config.n_epochs = 10;
    config.steps_per_epoch = 5;
    config.agents = vec![group(Archetype::Honest, 1), group(Archetype::Deceptive, 1)];
    config.governance.audit_probability = 1.0;
    config.governance.audit_penalty = 0.5;
    let report = Orchestrator::new(config).unwrap().run().unwrap();

    let resolved = report.events.to_interactions().unwrap();
    assert!(
        resolved.len() >= 20,
        "need a meaningful interaction count, got {}",
        resolved.len()
    );

    let honest = report.agent("honest-0").expect("honest agent present");
    let deceptive = report
        .agent("deceptive-0")
        .expect("deceptive agent present");
    assert!(
        honest.reputation - deceptive.reputation >= 0.2,
        "honest {} vs deceptive {}",
        honest.reputation,
        deceptive.reputation
    );
}

/// Collusion detection: a coordinated adversarial pair is flagged while
/// honest cooperation is not.
#[test]
fn coordinated_pair_is_flagged() {
    let mut config = ScenarioConfig::minimal("collusion", 3);
    config.n_epochs = 30;
    config.steps_per_epoch = 5;
    config.agents = vec![
        group(Archetype::Honest, 3),
        AgentGroupConfig {
            archetype: Archetype::Adversarial,
            count: 2,
            params: AgentParams {
                group: Some("ring".into()),
                ..Default::default()
            },
        },
    ];
    config.governance.collusion_enabled = true;
    config.governance.collusion_correlation_threshold = 0.7;
    let report = Orchestrator::new(config).unwrap().run().unwrap();

    let flags: Vec<(&str, &str)> = report
        .events
        .iter()
        .filter(|e| e.kind == EventKind::CollusionFlagged)
        .map(|e| {
            (
                e.payload["a"].as_str().unwrap(),
                e.payload["b"].as_str().unwrap(),
            )
        })
        .collect();

    assert!(
        flags.contains(&("adversarial-0", "adversarial-1")),
        "expected the adversarial pair among {:?}",
        flags
    );
    assert!(
        flags
            .iter()
            .all(|(a, b)| a.starts_with("adversarial-") && b.starts_with("adversarial-")),
        "honest cooperation must not be flagged: {:?}",
        flags
    );
}

/// External proxies are scheduled like any local agent, and their decider's
/// answers flow through the normal execution path.
#[test]
fn external_proxy_participates_like_a_local_agent() {
    use std::sync::Arc;
    use swarm_kernel::agents::{ExternalDecider, ExternalObservation};
    use swarm_kernel::types::Action;

    struct Poster;
    impl ExternalDecider for Poster {
        fn decide(&self, obs: &ExternalObservation) -> Action {
            Action::Post {
                content: format!("bridge {} {}", obs.epoch, obs.step),
            }
        }
        fn descriptor(&self) -> &str {
            "poster"
        }
    }

    let mut config = ScenarioConfig::minimal("external", 17);
    config.n_epochs = 2;
    config.steps_per_epoch = 3;
    config.agents = vec![group(Archetype::Honest, 2), group(Archetype::External, 1)];
    let report = Orchestrator::with_external(config, Arc::new(Poster))
        .unwrap()
        .run()
        .unwrap();

    let external_actions = report
        .events
        .iter()
        .filter(|e| {
            e.kind == EventKind::ActionEmitted
                && e.payload.get("agent").and_then(|v| v.as_str()) == Some("external-0")
                && e.payload.get("action").and_then(|v| v.as_str()) == Some("post")
        })
        .count();
    assert!(external_actions > 0);
}

/// Taxes are conserved: the per-epoch taxed sum equals rate times the
/// accepted count.
#[test]
fn tax_sum_matches_accepted_count() {
    let mut config = ScenarioConfig::minimal("tax", 13);
    config.n_epochs = 4;
    config.steps_per_epoch = 5;
    config.agents = vec![group(Archetype::Honest, 4)];
    config.governance.tax_rate = 0.05;
    let report = Orchestrator::new(config).unwrap().run().unwrap();

    let resolved = report.events.to_interactions().unwrap();
    for metrics in &report.metrics {
        let taxed: f64 = resolved
            .iter()
            .filter(|ix| ix.epoch == metrics.epoch)
            .map(|ix| ix.taxed_amount)
            .sum();
        let expected = 0.05 * metrics.accepted as f64;
        assert!(
            (taxed - expected).abs() < 1e-9,
            "epoch {}: taxed {} expected {}",
            metrics.epoch,
            taxed,
            expected
        );
    }
}

//! External-proxy archetype
//!
//! Delegates `act` to an out-of-kernel decider behind a hard timeout. The
//! decider runs on a helper thread; if it misses the deadline the turn
//! becomes a pass and the failure is counted, so a hung bridge degrades to
//! silence instead of stalling the run. Determinism is preserved relative to
//! the declared decider, not wall-clock.

use super::{AgentPolicy, Observation, PolicyHealth, ProposalView};
use crate::rng::KernelRng;
use crate::types::{Action, Archetype};
use crossbeam::channel::{bounded, RecvTimeoutError};
use serde::Serialize;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Owned, serializable snapshot handed across the thread boundary
#[derive(Debug, Clone, Serialize)]
pub struct ExternalObservation {
    pub epoch: u64,
    pub step: u64,
    pub agent: String,
    pub reputation: f64,
    pub resources: f64,
    /// (peer id, reputation) pairs in registration order
    pub peers: Vec<(String, f64)>,
    pub open_tasks: Vec<String>,
    /// (interaction id, p) for proposals awaiting this agent
    pub incoming: Vec<(String, f64)>,
}

impl ExternalObservation {
    fn from_observation(obs: &Observation) -> Self {
        Self {
            epoch: obs.epoch,
            step: obs.step,
            agent: obs.me.id.0.clone(),
            reputation: obs.me.reputation,
            resources: obs.me.resources,
            peers: obs
                .peers
                .iter()
                .map(|p| (p.id.0.clone(), p.reputation))
                .collect(),
            open_tasks: obs.open_tasks.iter().map(|t| t.0.clone()).collect(),
            incoming: obs
                .incoming
                .iter()
                .map(|p| (p.id.0.clone(), p.p))
                .collect(),
        }
    }
}

/// Out-of-kernel decision callback
pub trait ExternalDecider: Send + Sync {
    fn decide(&self, obs: &ExternalObservation) -> Action;

    /// Policy descriptor recorded at registration
    fn descriptor(&self) -> &str {
        "external"
    }
}

/// Default decider: always passes
#[derive(Debug, Default)]
pub struct PassDecider;

impl ExternalDecider for PassDecider {
    fn decide(&self, _obs: &ExternalObservation) -> Action {
        Action::Pass
    }

    fn descriptor(&self) -> &str {
        "pass"
    }
}

/// Proxy policy wrapping an [`ExternalDecider`] with a hard timeout
pub struct ExternalProxyPolicy {
    decider: Arc<dyn ExternalDecider>,
    timeout: Duration,
    consecutive_failures: u32,
}

impl ExternalProxyPolicy {
    pub fn new(decider: Arc<dyn ExternalDecider>, timeout: Duration) -> Self {
        Self {
            decider,
            timeout,
            consecutive_failures: 0,
        }
    }
}

impl AgentPolicy for ExternalProxyPolicy {
    fn archetype(&self) -> Archetype {
        Archetype::External
    }

    fn act(&mut self, obs: &Observation, _rng: &mut KernelRng) -> Action {
        let snapshot = ExternalObservation::from_observation(obs);
        let decider = Arc::clone(&self.decider);
        let (tx, rx) = bounded(1);
        thread::spawn(move || {
            let action = decider.decide(&snapshot);
            // The receiver may have timed out and gone away
            let _ = tx.send(action);
        });
        match rx.recv_timeout(self.timeout) {
            Ok(action) => {
                self.consecutive_failures = 0;
                action
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                self.consecutive_failures += 1;
                tracing::warn!(
                    agent = %obs.me.id,
                    failures = self.consecutive_failures,
                    "external decider missed its deadline"
                );
                Action::Pass
            }
        }
    }

    fn accept(&mut self, proposal: &ProposalView, _rng: &mut KernelRng) -> bool {
        // Acceptance stays kernel-side so a slow bridge cannot stall the
        // resolution sweep
        proposal.p >= 0.5
    }

    fn health(&self) -> PolicyHealth {
        if self.consecutive_failures == 0 {
            PolicyHealth::Healthy
        } else {
            PolicyHealth::Failing(self.consecutive_failures)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AgentId, AgentRecord};

    fn obs() -> Observation {
        Observation {
            epoch: 1,
            step: 2,
            me: AgentRecord {
                id: AgentId::new("ext-0"),
                archetype: Archetype::External,
                group: None,
                reputation: 0.5,
                resources: 10.0,
                stake: 0.0,
                frozen_until: None,
                quarantined: false,
            },
            peers: vec![],
            open_tasks: vec![],
            claimed_tasks: vec![],
            verifiable_tasks: vec![],
            feed: vec![],
            incoming: vec![],
            published_findings: vec![],
        }
    }

    struct SlowDecider;

    impl ExternalDecider for SlowDecider {
        fn decide(&self, _obs: &ExternalObservation) -> Action {
            thread::sleep(Duration::from_millis(200));
            Action::Post {
                content: "late".into(),
            }
        }
    }

    struct PostDecider;

    impl ExternalDecider for PostDecider {
        fn decide(&self, obs: &ExternalObservation) -> Action {
            Action::Post {
                content: format!("from {}", obs.agent),
            }
        }
    }

    #[test]
    fn test_prompt_decider_answer_used() {
        let mut policy =
            ExternalProxyPolicy::new(Arc::new(PostDecider), Duration::from_millis(500));
        let mut rng = KernelRng::seed_from(0);
        match policy.act(&obs(), &mut rng) {
            Action::Post { content } => assert_eq!(content, "from ext-0"),
            other => panic!("expected Post, got {:?}", other),
        }
        assert_eq!(policy.health(), PolicyHealth::Healthy);
    }

    #[test]
    fn test_timeout_becomes_pass_and_counts() {
        let mut policy =
            ExternalProxyPolicy::new(Arc::new(SlowDecider), Duration::from_millis(10));
        let mut rng = KernelRng::seed_from(0);
        assert_eq!(policy.act(&obs(), &mut rng), Action::Pass);
        assert_eq!(policy.act(&obs(), &mut rng), Action::Pass);
        assert_eq!(policy.health(), PolicyHealth::Failing(2));
    }

    #[test]
    fn test_success_resets_failure_streak() {
        struct Flaky {
            slow_first: std::sync::atomic::AtomicBool,
        }
        impl ExternalDecider for Flaky {
            fn decide(&self, _obs: &ExternalObservation) -> Action {
                if self.slow_first.swap(false, std::sync::atomic::Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(200));
                }
                Action::Pass
            }
        }
        let mut policy = ExternalProxyPolicy::new(
            Arc::new(Flaky {
                slow_first: std::sync::atomic::AtomicBool::new(true),
            }),
            Duration::from_millis(50),
        );
        let mut rng = KernelRng::seed_from(0);
        policy.act(&obs(), &mut rng);
        assert_eq!(policy.health(), PolicyHealth::Failing(1));
        policy.act(&obs(), &mut rng);
        assert_eq!(policy.health(), PolicyHealth::Healthy);
    }
}

//! Opportunistic archetype: cherry-picks partners, sometimes defects

use super::{AgentPolicy, Observation, ProposalView};
use crate::rng::KernelRng;
use crate::types::{Action, Archetype};

const ACCEPT_THRESHOLD: f64 = 0.2;
const RANDOM_ACCEPT: f64 = 0.3;
/// Chance of submitting low-effort work
const DEFECT_RATE: f64 = 0.3;

/// Self-interested policy: pursues the highest-reputation partner, claims
/// rewards eagerly, and defects on a fraction of submissions.
#[derive(Debug, Default)]
pub struct OpportunisticPolicy;

impl OpportunisticPolicy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AgentPolicy for OpportunisticPolicy {
    fn archetype(&self) -> Archetype {
        Archetype::Opportunistic
    }

    fn act(&mut self, obs: &Observation, rng: &mut KernelRng) -> Action {
        if let Some(task) = obs.claimed_tasks.first() {
            let effort = if rng.chance(DEFECT_RATE) {
                0.2 + rng.next_f64() * 0.1
            } else {
                0.7 + rng.next_f64() * 0.2
            };
            return Action::SubmitWork {
                task: task.clone(),
                effort,
            };
        }

        // Rewards first: grab any open task
        if let Some(task) = obs.open_tasks.first() {
            return Action::ClaimTask { task: task.clone() };
        }

        if let Some(proposal) = obs.incoming.iter().find(|p| p.p >= 0.5) {
            return Action::TradeAccept {
                interaction: proposal.id.clone(),
            };
        }

        let partner = match obs.best_reputation_peer() {
            Some(peer) => peer,
            None => return Action::Pass,
        };
        if rng.chance(0.3) {
            Action::TradePropose {
                partner: partner.id.clone(),
                offer: 0.5,
                intent: 0.3 + rng.next_f64() * 0.3,
                gloss: 0.2,
            }
        } else {
            Action::Collaborate {
                partner: partner.id.clone(),
                intent: 0.3 + rng.next_f64() * 0.4,
                gloss: 0.15,
            }
        }
    }

    fn accept(&mut self, proposal: &ProposalView, rng: &mut KernelRng) -> bool {
        proposal.p >= ACCEPT_THRESHOLD || rng.chance(RANDOM_ACCEPT)
    }
}

//! Deceptive archetype: earns trust, then exploits it

use super::{AgentPolicy, Observation, ProposalView};
use crate::rng::KernelRng;
use crate::types::{Action, ActionOutcome, Archetype, AgentId};
use std::collections::BTreeSet;

/// Behaves honestly until a per-instance trust horizon is reached, then
/// directs exploitative, heavily glossed interactions at the partners that
/// accepted it before. The horizon is drawn uniformly from [3, 8] on the
/// kernel RNG at construction, never a fixed constant.
#[derive(Debug)]
pub struct DeceptivePolicy {
    trust_horizon: u64,
    resolved_seen: u64,
    trusted: BTreeSet<AgentId>,
    exploit_cursor: usize,
}

impl DeceptivePolicy {
    pub fn new(rng: &mut KernelRng) -> Self {
        Self {
            trust_horizon: rng.uniform_int(3, 8),
            resolved_seen: 0,
            trusted: BTreeSet::new(),
            exploit_cursor: 0,
        }
    }

    fn betrayed(&self) -> bool {
        self.resolved_seen >= self.trust_horizon
    }

    /// Expose the drawn horizon for diagnostics
    pub fn trust_horizon(&self) -> u64 {
        self.trust_horizon
    }
}

impl AgentPolicy for DeceptivePolicy {
    fn archetype(&self) -> Archetype {
        Archetype::Deceptive
    }

    fn act(&mut self, obs: &Observation, rng: &mut KernelRng) -> Action {
        if obs.peers.is_empty() {
            return Action::Pass;
        }

        if !self.betrayed() {
            // Trust-building phase: indistinguishable from honest play
            if let Some(proposal) = obs.incoming.iter().find(|p| p.p >= 0.4) {
                return Action::TradeAccept {
                    interaction: proposal.id.clone(),
                };
            }
            let partner = &obs.peers[rng.index(obs.peers.len())];
            return Action::Collaborate {
                partner: partner.id.clone(),
                intent: 0.7 + rng.next_f64() * 0.2,
                gloss: 0.0,
            };
        }

        // Exploitation phase: rotate through trusted partners, hiding a
        // negative latent intent behind a polished surface
        let partner = if self.trusted.is_empty() {
            obs.peers[rng.index(obs.peers.len())].id.clone()
        } else {
            let trusted: Vec<&AgentId> = self.trusted.iter().collect();
            let choice = trusted[self.exploit_cursor % trusted.len()].clone();
            self.exploit_cursor += 1;
            choice
        };
        Action::Collaborate {
            partner,
            intent: -0.5 + rng.noise(0.05),
            gloss: 0.6,
        }
    }

    fn accept(&mut self, proposal: &ProposalView, _rng: &mut KernelRng) -> bool {
        if self.betrayed() {
            // Keep farming anything not obviously harmful
            proposal.p >= 0.2
        } else {
            proposal.p >= 0.4
        }
    }

    fn on_result(&mut self, outcome: &ActionOutcome) {
        if let ActionOutcome::InteractionResolved { with, accepted, .. } = outcome {
            self.resolved_seen += 1;
            if *accepted {
                self.trusted.insert(with.clone());
            }
        }
    }
}

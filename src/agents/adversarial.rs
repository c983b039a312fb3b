//! Adversarial archetype: coordinated degradation

use super::{AgentPolicy, Observation, ProposalView};
use crate::rng::KernelRng;
use crate::types::{Action, Archetype};

/// Coordinating policy. Members of the same latent group trade interactions
/// with each other unconditionally while refusing outsiders' proposals, and
/// their exploit intent escalates epoch over epoch. Solo adversarials direct
/// the same escalation at the best-regarded peer instead.
#[derive(Debug, Default)]
pub struct AdversarialPolicy {
    group: Option<String>,
    rotation: usize,
}

impl AdversarialPolicy {
    pub fn new(group: Option<String>) -> Self {
        Self { group, rotation: 0 }
    }

    /// Latent intent schedule: mildly plausible at first, then degrading
    fn intent_at(epoch: u64) -> f64 {
        (0.3 - 0.25 * epoch as f64).clamp(-1.0, 1.0)
    }
}

impl AgentPolicy for AdversarialPolicy {
    fn archetype(&self) -> Archetype {
        Archetype::Adversarial
    }

    fn act(&mut self, obs: &Observation, rng: &mut KernelRng) -> Action {
        if obs.peers.is_empty() {
            return Action::Pass;
        }
        let allies = obs.group_peers(self.group.as_deref());

        // Vote bias: lift allies, bury everyone else
        if rng.chance(0.2) {
            let ally_post = obs.feed.iter().rev().find(|post| {
                post.author != obs.me.id && allies.iter().any(|ally| ally.id == post.author)
            });
            if let Some(post) = ally_post {
                return Action::Vote {
                    post: post.id,
                    up: true,
                };
            }
            let outsider_post = obs
                .feed
                .iter()
                .rev()
                .find(|post| post.author != obs.me.id);
            if let Some(post) = outsider_post {
                return Action::Vote {
                    post: post.id,
                    up: false,
                };
            }
        }

        if rng.chance(0.1) {
            return Action::Post {
                content: format!("{} signal {}", obs.me.id, obs.epoch),
            };
        }

        let intent = Self::intent_at(obs.epoch);
        if !allies.is_empty() {
            let ally = allies[self.rotation % allies.len()];
            self.rotation += 1;
            return Action::Collaborate {
                partner: ally.id.clone(),
                intent,
                gloss: 0.1,
            };
        }

        // No coordination partners: target the best-regarded peer directly
        let target = obs
            .best_reputation_peer()
            .expect("peers checked non-empty above");
        Action::Collaborate {
            partner: target.id.clone(),
            intent,
            gloss: 0.5,
        }
    }

    fn accept(&mut self, proposal: &ProposalView, _rng: &mut KernelRng) -> bool {
        // Group solidarity; outsiders are refused regardless of quality
        self.group.is_some() && proposal.from_group == self.group
    }
}

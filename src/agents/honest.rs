//! Honest archetype: cooperative, diligent, accepts decent proposals

use super::{AgentPolicy, Observation, ProposalView};
use crate::rng::KernelRng;
use crate::types::{Action, Archetype};

/// Acceptance floor for honest agents
const ACCEPT_THRESHOLD: f64 = 0.4;

/// Cooperative policy: works tasks, verifies others' work, collaborates with
/// consistently high latent intent and no observable manipulation.
#[derive(Debug, Default)]
pub struct HonestPolicy;

impl HonestPolicy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AgentPolicy for HonestPolicy {
    fn archetype(&self) -> Archetype {
        Archetype::Honest
    }

    fn act(&mut self, obs: &Observation, rng: &mut KernelRng) -> Action {
        // Finish claimed work first
        if let Some(task) = obs.claimed_tasks.first() {
            return Action::SubmitWork {
                task: task.clone(),
                effort: 0.85 + rng.next_f64() * 0.1,
            };
        }

        // Eagerly accept a good incoming proposal
        if let Some(proposal) = obs.incoming.iter().find(|p| p.p >= ACCEPT_THRESHOLD) {
            return Action::TradeAccept {
                interaction: proposal.id.clone(),
            };
        }

        if let Some(task) = obs.open_tasks.first() {
            if rng.chance(0.4) {
                return Action::ClaimTask { task: task.clone() };
            }
        }

        if let Some(task) = obs.verifiable_tasks.first() {
            if rng.chance(0.5) {
                return Action::Verify { task: task.clone() };
            }
        }

        if rng.chance(0.1) {
            return Action::Post {
                content: format!("{} update {}", obs.me.id, obs.epoch),
            };
        }

        if rng.chance(0.05) {
            if let Some(post) = obs.feed.iter().rev().find(|p| p.author != obs.me.id) {
                return Action::Reply {
                    parent: post.id,
                    content: format!("{} ack {}", obs.me.id, post.id),
                };
            }
        }

        // Lift the latest peer post
        if rng.chance(0.15) {
            let upvote = obs
                .feed
                .iter()
                .rev()
                .find(|post| post.author != obs.me.id);
            if let Some(post) = upvote {
                return Action::Vote {
                    post: post.id,
                    up: true,
                };
            }
        }

        if obs.peers.is_empty() {
            return Action::Pass;
        }
        let partner = &obs.peers[rng.index(obs.peers.len())];
        Action::Collaborate {
            partner: partner.id.clone(),
            intent: 0.7 + rng.next_f64() * 0.2,
            gloss: 0.0,
        }
    }

    fn accept(&mut self, proposal: &ProposalView, _rng: &mut KernelRng) -> bool {
        proposal.p >= ACCEPT_THRESHOLD
    }
}

//! Agent policies
//!
//! One file per archetype. Policies are pure decision objects: they receive
//! an [`Observation`], return an [`Action`], and learn about outcomes through
//! `on_result`. All state mutation stays with the orchestrator.

pub mod adversarial;
pub mod deceptive;
pub mod external;
pub mod honest;
pub mod opportunistic;

pub use adversarial::AdversarialPolicy;
pub use deceptive::DeceptivePolicy;
pub use external::{ExternalDecider, ExternalObservation, ExternalProxyPolicy, PassDecider};
pub use honest::HonestPolicy;
pub use opportunistic::OpportunisticPolicy;

use crate::rng::KernelRng;
use crate::types::{
    Action, ActionOutcome, AgentId, AgentRecord, Archetype, InteractionId, InteractionKind,
    TaskId,
};

/// What an agent can see about a peer (reputation may be noisy upstream;
/// the latent group is only meaningful to members of the same group)
#[derive(Debug, Clone)]
pub struct PeerView {
    pub id: AgentId,
    pub reputation: f64,
    pub group: Option<String>,
}

/// Feed entry slice visible to policies
#[derive(Debug, Clone)]
pub struct PostView {
    pub id: u64,
    pub author: AgentId,
    pub net_votes: i64,
}

/// A proposal currently directed at the observing agent
#[derive(Debug, Clone)]
pub struct IncomingProposal {
    pub id: InteractionId,
    pub from: AgentId,
    pub kind: InteractionKind,
    pub p: f64,
}

/// Everything a policy may condition on for one turn
#[derive(Debug, Clone)]
pub struct Observation {
    pub epoch: u64,
    pub step: u64,
    pub me: AgentRecord,
    /// All other agents, registration order
    pub peers: Vec<PeerView>,
    pub open_tasks: Vec<TaskId>,
    /// Tasks claimed by this agent and not yet submitted
    pub claimed_tasks: Vec<TaskId>,
    /// Tasks awaiting verification by someone other than their claimant
    pub verifiable_tasks: Vec<TaskId>,
    /// Recent feed slice, oldest first
    pub feed: Vec<PostView>,
    pub incoming: Vec<IncomingProposal>,
    /// Published-findings channel for reflexivity experiments
    pub published_findings: Vec<String>,
}

impl Observation {
    /// Peers sharing the observer's latent group
    pub fn group_peers(&self, group: Option<&str>) -> Vec<&PeerView> {
        match group {
            Some(g) => self
                .peers
                .iter()
                .filter(|p| p.group.as_deref() == Some(g))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Peer with the highest reputation
    pub fn best_reputation_peer(&self) -> Option<&PeerView> {
        self.peers
            .iter()
            .max_by(|a, b| a.reputation.partial_cmp(&b.reputation).unwrap_or(std::cmp::Ordering::Equal))
    }
}

/// Counterparty's view of a proposal when deciding acceptance
#[derive(Debug, Clone)]
pub struct ProposalView {
    pub id: InteractionId,
    pub from: AgentId,
    pub from_reputation: f64,
    pub from_group: Option<String>,
    pub kind: InteractionKind,
    pub v_hat: f64,
    pub p: f64,
}

/// Liveness signal, used to quarantine repeatedly failing proxies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyHealth {
    Healthy,
    /// Consecutive failures observed
    Failing(u32),
}

/// Archetype decision interface
pub trait AgentPolicy {
    fn archetype(&self) -> Archetype;

    /// Choose an action for this turn
    fn act(&mut self, obs: &Observation, rng: &mut KernelRng) -> Action;

    /// Decide whether to accept a proposal directed at this agent
    fn accept(&mut self, proposal: &ProposalView, rng: &mut KernelRng) -> bool;

    /// Outcome feedback for a previously emitted action or a resolved
    /// interaction this agent took part in
    fn on_result(&mut self, _outcome: &ActionOutcome) {}

    fn health(&self) -> PolicyHealth {
        PolicyHealth::Healthy
    }
}

/// Build the local policy for an archetype. External agents are constructed
/// separately because they carry a decider callback.
pub fn local_policy(
    archetype: Archetype,
    group: Option<&str>,
    rng: &mut KernelRng,
) -> Box<dyn AgentPolicy> {
    match archetype {
        Archetype::Honest => Box::new(HonestPolicy::new()),
        Archetype::Opportunistic => Box::new(OpportunisticPolicy::new()),
        Archetype::Deceptive => Box::new(DeceptivePolicy::new(rng)),
        Archetype::Adversarial => Box::new(AdversarialPolicy::new(group.map(String::from))),
        Archetype::External => unreachable!("external agents are built with a decider"),
    }
}

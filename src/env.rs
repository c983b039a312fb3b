//! Environment state
//!
//! Owns the agent ledger, the pending-interaction table, per-epoch rate-limit
//! counters, the post feed, and the task pool. Every mutation flows through a
//! named transaction that either applies fully or returns a [`TxError`]
//! leaving state untouched. The orchestrator is the single owner; agents and
//! governance only ever see snapshots or go through these methods.

use crate::config::{RateLimitConfig, RateLimits};
use crate::error::{KernelError, KernelResult, TxError};
use crate::types::{
    AgentId, AgentRecord, InteractionId, InteractionKind, ProxyObservables, SoftInteraction,
    TaskId,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Action category subject to rate limiting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateCategory {
    Posts,
    Votes,
    Interactions,
}

impl RateCategory {
    fn label(&self) -> &'static str {
        match self {
            RateCategory::Posts => "posts",
            RateCategory::Votes => "votes",
            RateCategory::Interactions => "interactions",
        }
    }
}

/// Per-agent counters, reset at epoch start
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RateCounters {
    pub posts: u32,
    pub votes: u32,
    pub interactions: u32,
}

/// Feed entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: u64,
    pub author: AgentId,
    pub epoch: u64,
    pub content: String,
    pub parent: Option<u64>,
    pub upvotes: u32,
    pub downvotes: u32,
    #[serde(skip)]
    voters: BTreeSet<AgentId>,
}

impl Post {
    pub fn net_votes(&self) -> i64 {
        i64::from(self.upvotes) - i64::from(self.downvotes)
    }
}

/// Submitted work awaiting verification
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Submission {
    pub effort: f64,
}

/// Pool task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: TaskId,
    pub reward: f64,
    pub claimer: Option<AgentId>,
    pub submission: Option<Submission>,
    pub verified: Option<bool>,
}

impl TaskSpec {
    pub fn is_open(&self) -> bool {
        self.claimer.is_none()
    }

    pub fn awaiting_verification(&self) -> bool {
        self.submission.is_some() && self.verified.is_none()
    }
}

/// Proposed interaction awaiting the counterparty's decision
#[derive(Debug, Clone)]
pub struct PendingInteraction {
    pub id: InteractionId,
    pub initiator: AgentId,
    pub counterparty: AgentId,
    pub kind: InteractionKind,
    pub observables: ProxyObservables,
    pub v_hat: f64,
    pub p: f64,
    pub true_value: f64,
    pub epoch: u64,
    pub step: u64,
}

/// Mutable simulation state, exclusively owned by the orchestrator
pub struct Environment {
    limits: RateLimitConfig,
    agents: BTreeMap<AgentId, AgentRecord>,
    roster: Vec<AgentId>,
    pending: Vec<PendingInteraction>,
    resolved: Vec<SoftInteraction>,
    feed: Vec<Post>,
    tasks: BTreeMap<TaskId, TaskSpec>,
    task_order: Vec<TaskId>,
    rate: BTreeMap<AgentId, RateCounters>,
    next_post: u64,
    next_task: u64,
}

impl Environment {
    pub fn new(limits: RateLimitConfig) -> Self {
        Self {
            limits,
            agents: BTreeMap::new(),
            roster: Vec::new(),
            pending: Vec::new(),
            resolved: Vec::new(),
            feed: Vec::new(),
            tasks: BTreeMap::new(),
            task_order: Vec::new(),
            rate: BTreeMap::new(),
            next_post: 0,
            next_task: 0,
        }
    }

    // ---- ledger ----

    pub(crate) fn register_agent(&mut self, record: AgentRecord) -> KernelResult<()> {
        if self.agents.contains_key(&record.id) {
            return Err(KernelError::State(format!(
                "duplicate agent id {}",
                record.id
            )));
        }
        self.roster.push(record.id.clone());
        self.rate.insert(record.id.clone(), RateCounters::default());
        self.agents.insert(record.id.clone(), record);
        Ok(())
    }

    pub fn agent(&self, id: &AgentId) -> Option<&AgentRecord> {
        self.agents.get(id)
    }

    fn agent_mut(&mut self, id: &AgentId) -> Result<&mut AgentRecord, TxError> {
        self.agents
            .get_mut(id)
            .ok_or_else(|| TxError::UnknownAgent(id.clone()))
    }

    /// Registration order; the round-robin visitation base
    pub fn roster(&self) -> &[AgentId] {
        &self.roster
    }

    pub fn agents(&self) -> impl Iterator<Item = &AgentRecord> {
        self.roster.iter().filter_map(|id| self.agents.get(id))
    }

    pub fn agent_count(&self) -> usize {
        self.roster.len()
    }

    pub fn frozen_count(&self, epoch: u64) -> u64 {
        self.agents()
            .filter(|a| a.lifecycle(epoch) == crate::types::Lifecycle::Frozen)
            .count() as u64
    }

    // ---- rate limits ----

    pub(crate) fn reset_rate_counters(&mut self) {
        for counters in self.rate.values_mut() {
            *counters = RateCounters::default();
        }
    }

    /// Charge one unit of quota, failing with `RATE_LIMITED` when exhausted
    pub(crate) fn charge_rate(
        &mut self,
        id: &AgentId,
        category: RateCategory,
    ) -> Result<(), TxError> {
        let archetype = self
            .agents
            .get(id)
            .ok_or_else(|| TxError::UnknownAgent(id.clone()))?
            .archetype;
        let quota: RateLimits = self.limits.for_archetype(archetype);
        let counters = self.rate.entry(id.clone()).or_default();
        let (used, limit) = match category {
            RateCategory::Posts => (&mut counters.posts, quota.posts_per_epoch),
            RateCategory::Votes => (&mut counters.votes, quota.votes_per_epoch),
            RateCategory::Interactions => (&mut counters.interactions, quota.interactions_per_epoch),
        };
        if *used >= limit {
            return Err(TxError::RateLimited {
                agent: id.clone(),
                category: category.label().to_string(),
            });
        }
        *used += 1;
        Ok(())
    }

    // ---- feed ----

    pub(crate) fn add_post(
        &mut self,
        author: &AgentId,
        epoch: u64,
        content: String,
        parent: Option<u64>,
    ) -> Result<u64, TxError> {
        if !self.agents.contains_key(author) {
            return Err(TxError::UnknownAgent(author.clone()));
        }
        if let Some(parent_id) = parent {
            if !self.feed.iter().any(|p| p.id == parent_id) {
                return Err(TxError::UnknownPost(parent_id));
            }
        }
        let id = self.next_post;
        self.next_post += 1;
        self.feed.push(Post {
            id,
            author: author.clone(),
            epoch,
            content,
            parent,
            upvotes: 0,
            downvotes: 0,
            voters: BTreeSet::new(),
        });
        Ok(id)
    }

    /// Register a vote; returns the post author for collusion bookkeeping
    pub(crate) fn vote(
        &mut self,
        voter: &AgentId,
        post_id: u64,
        up: bool,
    ) -> Result<AgentId, TxError> {
        if !self.agents.contains_key(voter) {
            return Err(TxError::UnknownAgent(voter.clone()));
        }
        let post = self
            .feed
            .iter_mut()
            .find(|p| p.id == post_id)
            .ok_or(TxError::UnknownPost(post_id))?;
        if post.author == *voter {
            return Err(TxError::SelfInteraction(voter.clone()));
        }
        if post.voters.contains(voter) {
            return Err(TxError::DuplicateVote {
                agent: voter.clone(),
                post: post_id,
            });
        }
        post.voters.insert(voter.clone());
        if up {
            post.upvotes += 1;
        } else {
            post.downvotes += 1;
        }
        Ok(post.author.clone())
    }

    pub fn feed(&self) -> &[Post] {
        &self.feed
    }

    // ---- task pool ----

    pub(crate) fn spawn_task(&mut self, reward: f64) -> TaskId {
        let id = TaskId::from_counter(self.next_task);
        self.next_task += 1;
        self.tasks.insert(
            id.clone(),
            TaskSpec {
                id: id.clone(),
                reward,
                claimer: None,
                submission: None,
                verified: None,
            },
        );
        self.task_order.push(id.clone());
        id
    }

    pub fn task(&self, id: &TaskId) -> Option<&TaskSpec> {
        self.tasks.get(id)
    }

    /// Tasks in spawn order
    pub fn tasks(&self) -> impl Iterator<Item = &TaskSpec> {
        self.task_order.iter().filter_map(|id| self.tasks.get(id))
    }

    pub(crate) fn claim_task(&mut self, agent: &AgentId, task_id: &TaskId) -> Result<(), TxError> {
        if !self.agents.contains_key(agent) {
            return Err(TxError::UnknownAgent(agent.clone()));
        }
        let task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| TxError::UnknownTask(task_id.clone()))?;
        if task.claimer.is_some() {
            return Err(TxError::TaskAlreadyClaimed(task_id.clone()));
        }
        task.claimer = Some(agent.clone());
        Ok(())
    }

    pub(crate) fn submit_work(
        &mut self,
        agent: &AgentId,
        task_id: &TaskId,
        effort: f64,
    ) -> Result<(), TxError> {
        let task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| TxError::UnknownTask(task_id.clone()))?;
        if task.claimer.as_ref() != Some(agent) {
            return Err(TxError::NotClaimant {
                agent: agent.clone(),
                task: task_id.clone(),
            });
        }
        if task.verified.is_some() {
            return Err(TxError::AlreadyVerified(task_id.clone()));
        }
        task.submission = Some(Submission { effort });
        Ok(())
    }

    /// Check that `verifier` may verify `task_id`; returns the claimant and
    /// the submitted effort
    pub(crate) fn verification_target(
        &self,
        verifier: &AgentId,
        task_id: &TaskId,
    ) -> Result<(AgentId, f64), TxError> {
        let task = self
            .tasks
            .get(task_id)
            .ok_or_else(|| TxError::UnknownTask(task_id.clone()))?;
        if task.verified.is_some() {
            return Err(TxError::AlreadyVerified(task_id.clone()));
        }
        let (claimer, submission) = match (&task.claimer, &task.submission) {
            (Some(claimer), Some(submission)) => (claimer, submission),
            _ => return Err(TxError::NothingToVerify(task_id.clone())),
        };
        if claimer == verifier {
            return Err(TxError::SelfInteraction(verifier.clone()));
        }
        Ok((claimer.clone(), submission.effort))
    }

    /// Record a verification verdict, crediting the reward on approval
    pub(crate) fn record_verification(
        &mut self,
        task_id: &TaskId,
        approved: bool,
    ) -> Result<(), TxError> {
        let (claimer, reward) = {
            let task = self
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| TxError::UnknownTask(task_id.clone()))?;
            task.verified = Some(approved);
            (task.claimer.clone(), task.reward)
        };
        if approved {
            if let Some(claimer) = claimer {
                self.agent_mut(&claimer)?.resources += reward;
            }
        }
        Ok(())
    }

    // ---- interactions ----

    pub(crate) fn propose_interaction(
        &mut self,
        pending: PendingInteraction,
    ) -> Result<(), TxError> {
        if pending.initiator == pending.counterparty {
            return Err(TxError::SelfInteraction(pending.initiator));
        }
        if !self.agents.contains_key(&pending.counterparty) {
            return Err(TxError::UnknownAgent(pending.counterparty));
        }
        self.pending.push(pending);
        Ok(())
    }

    /// Remove a specific pending interaction (eager acceptance path)
    pub(crate) fn take_pending(&mut self, id: &InteractionId) -> Option<PendingInteraction> {
        let index = self.pending.iter().position(|p| p.id == *id)?;
        Some(self.pending.remove(index))
    }

    /// Drain all pending interactions in proposal order (end-of-step sweep)
    pub(crate) fn drain_pending(&mut self) -> Vec<PendingInteraction> {
        std::mem::take(&mut self.pending)
    }

    /// Proposals currently directed at an agent
    pub fn pending_for(&self, agent: &AgentId) -> Vec<&PendingInteraction> {
        self.pending
            .iter()
            .filter(|p| p.counterparty == *agent)
            .collect()
    }

    pub(crate) fn record_resolved(&mut self, interaction: SoftInteraction) {
        self.resolved.push(interaction);
    }

    pub fn resolved(&self) -> &[SoftInteraction] {
        &self.resolved
    }

    pub fn resolved_in_epoch(&self, epoch: u64) -> impl Iterator<Item = &SoftInteraction> {
        self.resolved.iter().filter(move |ix| ix.epoch == epoch)
    }

    // ---- transactional mutations driven by payoffs and governance ----

    /// Apply both payoff deltas atomically; rejects non-finite values
    pub(crate) fn apply_payoffs(
        &mut self,
        a: &AgentId,
        delta_a: f64,
        b: &AgentId,
        delta_b: f64,
    ) -> KernelResult<()> {
        if !delta_a.is_finite() || !delta_b.is_finite() {
            return Err(KernelError::State(format!(
                "non-finite payoff: {} for {}, {} for {}",
                delta_a, a, delta_b, b
            )));
        }
        for id in [a, b] {
            if !self.agents.contains_key(id) {
                return Err(KernelError::State(format!("unknown agent {}", id)));
            }
        }
        self.agent_mut(a)
            .map_err(|e| KernelError::State(e.to_string()))?
            .resources += delta_a;
        self.agent_mut(b)
            .map_err(|e| KernelError::State(e.to_string()))?
            .resources += delta_b;
        Ok(())
    }

    pub(crate) fn set_reputation(&mut self, id: &AgentId, value: f64) -> KernelResult<()> {
        if !value.is_finite() {
            return Err(KernelError::State(format!(
                "non-finite reputation {} for {}",
                value, id
            )));
        }
        self.agent_mut(id)
            .map_err(|e| KernelError::State(e.to_string()))?
            .reputation = value;
        Ok(())
    }

    pub(crate) fn debit_resources(&mut self, id: &AgentId, amount: f64) -> KernelResult<()> {
        self.agent_mut(id)
            .map_err(|e| KernelError::State(e.to_string()))?
            .resources -= amount;
        Ok(())
    }

    /// Slash a fraction of stake; returns the slashed amount
    pub(crate) fn slash_stake(&mut self, id: &AgentId, rate: f64) -> KernelResult<f64> {
        let record = self
            .agent_mut(id)
            .map_err(|e| KernelError::State(e.to_string()))?;
        let slashed = record.stake * rate;
        record.stake -= slashed;
        if record.stake < 0.0 {
            return Err(KernelError::State(format!("negative stake for {}", id)));
        }
        Ok(slashed)
    }

    pub(crate) fn freeze(&mut self, id: &AgentId, until_epoch: u64) -> KernelResult<()> {
        self.agent_mut(id)
            .map_err(|e| KernelError::State(e.to_string()))?
            .frozen_until = Some(until_epoch);
        Ok(())
    }

    pub(crate) fn unfreeze(&mut self, id: &AgentId) -> KernelResult<()> {
        self.agent_mut(id)
            .map_err(|e| KernelError::State(e.to_string()))?
            .frozen_until = None;
        Ok(())
    }

    pub(crate) fn quarantine(&mut self, id: &AgentId) -> KernelResult<()> {
        self.agent_mut(id)
            .map_err(|e| KernelError::State(e.to_string()))?
            .quarantined = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Archetype;

    fn record(id: &str) -> AgentRecord {
        AgentRecord {
            id: AgentId::new(id),
            archetype: Archetype::Honest,
            group: None,
            reputation: 0.5,
            resources: 10.0,
            stake: 1.0,
            frozen_until: None,
            quarantined: false,
        }
    }

    fn env_with(ids: &[&str]) -> Environment {
        let mut env = Environment::new(RateLimitConfig::default());
        for id in ids {
            env.register_agent(record(id)).unwrap();
        }
        env
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut env = env_with(&["a"]);
        assert!(env.register_agent(record("a")).is_err());
    }

    #[test]
    fn test_rate_limit_enforced_and_reset() {
        let mut limits = RateLimitConfig::default();
        limits.base.posts_per_epoch = 2;
        let mut env = Environment::new(limits);
        env.register_agent(record("a")).unwrap();
        let a = AgentId::new("a");

        assert!(env.charge_rate(&a, RateCategory::Posts).is_ok());
        assert!(env.charge_rate(&a, RateCategory::Posts).is_ok());
        let err = env.charge_rate(&a, RateCategory::Posts).unwrap_err();
        assert!(matches!(err, TxError::RateLimited { .. }));

        env.reset_rate_counters();
        assert!(env.charge_rate(&a, RateCategory::Posts).is_ok());
    }

    #[test]
    fn test_task_claim_submit_verify_flow() {
        let mut env = env_with(&["worker", "verifier"]);
        let worker = AgentId::new("worker");
        let verifier = AgentId::new("verifier");
        let task = env.spawn_task(2.0);

        env.claim_task(&worker, &task).unwrap();
        let err = env.claim_task(&verifier, &task).unwrap_err();
        assert!(matches!(err, TxError::TaskAlreadyClaimed(_)));

        env.submit_work(&worker, &task, 0.9).unwrap();
        let (claimer, effort) = env.verification_target(&verifier, &task).unwrap();
        assert_eq!(claimer, worker);
        assert!((effort - 0.9).abs() < 1e-12);

        // Claimant may not verify its own work
        let err = env.verification_target(&worker, &task).unwrap_err();
        assert!(matches!(err, TxError::SelfInteraction(_)));

        env.record_verification(&task, true).unwrap();
        assert_eq!(env.agent(&worker).unwrap().resources, 12.0);
        let err = env.verification_target(&verifier, &task).unwrap_err();
        assert!(matches!(err, TxError::AlreadyVerified(_)));
    }

    #[test]
    fn test_vote_rules() {
        let mut env = env_with(&["author", "voter"]);
        let author = AgentId::new("author");
        let voter = AgentId::new("voter");
        let post = env.add_post(&author, 0, "hello".into(), None).unwrap();

        assert_eq!(env.vote(&voter, post, true).unwrap(), author);
        let err = env.vote(&voter, post, true).unwrap_err();
        assert!(matches!(err, TxError::DuplicateVote { .. }));

        let err = env.vote(&author, post, true).unwrap_err();
        assert!(matches!(err, TxError::SelfInteraction(_)));

        assert_eq!(env.feed()[0].upvotes, 1);
    }

    #[test]
    fn test_self_interaction_rejected() {
        let mut env = env_with(&["a", "b"]);
        let pending = PendingInteraction {
            id: InteractionId::from_counter(0),
            initiator: AgentId::new("a"),
            counterparty: AgentId::new("a"),
            kind: InteractionKind::Collaboration,
            observables: ProxyObservables {
                task_progress_delta: 0.0,
                rework_count: 0,
                verifier_rejections: 0,
                engagement_delta: 0.0,
            },
            v_hat: 0.0,
            p: 0.5,
            true_value: 0.0,
            epoch: 0,
            step: 0,
        };
        let err = env.propose_interaction(pending).unwrap_err();
        assert!(matches!(err, TxError::SelfInteraction(_)));
    }

    #[test]
    fn test_apply_payoffs_rejects_non_finite() {
        let mut env = env_with(&["a", "b"]);
        let a = AgentId::new("a");
        let b = AgentId::new("b");
        assert!(env.apply_payoffs(&a, f64::NAN, &b, 0.0).is_err());
        // State unchanged on failure
        assert_eq!(env.agent(&a).unwrap().resources, 10.0);
        assert!(env.apply_payoffs(&a, 1.5, &b, -0.5).is_ok());
        assert_eq!(env.agent(&a).unwrap().resources, 11.5);
        assert_eq!(env.agent(&b).unwrap().resources, 9.5);
    }

    #[test]
    fn test_slash_stake() {
        let mut env = env_with(&["a"]);
        let a = AgentId::new("a");
        let slashed = env.slash_stake(&a, 0.25).unwrap();
        assert!((slashed - 0.25).abs() < 1e-12);
        assert!((env.agent(&a).unwrap().stake - 0.75).abs() < 1e-12);
    }
}

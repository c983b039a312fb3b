//! Orchestrator: the outer simulation loop
//!
//! Owns the RNG, the environment, the governance engine, the policies, and
//! the event log. Per epoch it resets rate limits, runs the configured steps
//! with a deterministic visitation order, resolves pending interactions in a
//! same-step sweep, computes metrics, and fires governance hooks. Given an
//! identical [`ScenarioConfig`] and seed, two runs produce byte-identical
//! event logs.

use crate::agents::{
    local_policy, AgentPolicy, ExternalDecider, ExternalProxyPolicy, IncomingProposal,
    Observation, PassDecider, PeerView, PolicyHealth, PostView, ProposalView,
};
use crate::config::{ScenarioConfig, SchedulingMode};
use crate::env::{Environment, PendingInteraction, RateCategory};
use crate::error::{KernelError, KernelResult, TxError};
use crate::events::{EventKind, EventLog, EventSink};
use crate::governance::GovernanceEngine;
use crate::metrics::{compute_epoch_metrics, EpochMetrics};
use crate::payoff::compute_payoffs;
use crate::proxy;
use crate::rng::KernelRng;
use crate::types::{
    Action, ActionOutcome, AgentId, AgentRecord, Archetype, InteractionId, InteractionKind,
    ProxyObservables, SoftInteraction, TaskId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Cooperative cancellation signal, checked at step boundaries
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Terminal status recorded in the run manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Cancelled,
    Crashed,
}

/// Run identity and bookkeeping; the only place wall-clock time appears
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: String,
    pub scenario_id: String,
    pub seed: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub n_epochs_completed: u64,
    pub final_status: RunStatus,
}

/// Everything a finished run yields
pub struct RunReport {
    pub manifest: RunManifest,
    pub metrics: Vec<EpochMetrics>,
    pub events: EventLog,
    /// Final ledger snapshot, registration order
    pub agents: Vec<AgentRecord>,
}

impl RunReport {
    /// Final record for one agent
    pub fn agent(&self, id: &str) -> Option<&AgentRecord> {
        self.agents.iter().find(|record| record.id.as_str() == id)
    }
}

/// Synthesize observables from an action's latent intent and surface gloss.
/// Gloss shifts what is observable without moving the latent value, which is
/// exactly the gap audits can reveal.
fn synthesize_observables(
    intent: f64,
    gloss: f64,
    rng: &mut KernelRng,
) -> (ProxyObservables, f64) {
    let true_value = intent.clamp(-1.0, 1.0);
    let task_progress_delta = (intent + gloss * 0.3 + rng.noise(0.05)).clamp(-1.0, 1.0);
    let rework_base: u32 = if intent >= 0.3 {
        0
    } else if intent >= -0.2 {
        1
    } else {
        2
    };
    let rework_count = if gloss >= 0.3 {
        rework_base.saturating_sub(1)
    } else {
        rework_base
    };
    let rejections_base: u32 = u32::from(intent < -0.4);
    let verifier_rejections = if gloss >= 0.5 { 0 } else { rejections_base };
    let engagement_delta = (0.8 * intent + 0.5 * gloss + rng.noise(0.05)).clamp(-1.0, 1.0);
    (
        ProxyObservables {
            task_progress_delta,
            rework_count,
            verifier_rejections,
            engagement_delta,
        },
        true_value,
    )
}

/// The simulation kernel's control loop
pub struct Orchestrator {
    config: ScenarioConfig,
    env: Environment,
    governance: GovernanceEngine,
    policies: BTreeMap<AgentId, Box<dyn AgentPolicy>>,
    rng: KernelRng,
    log: EventLog,
    cancel: CancelHandle,
    next_interaction: u64,
    proposed_this_epoch: u64,
    published_findings: Vec<String>,
    current_epoch: u64,
    current_step: u64,
}

impl Orchestrator {
    /// Build a kernel where external agents fall back to a pass-only decider
    pub fn new(config: ScenarioConfig) -> KernelResult<Self> {
        Self::build(config, Arc::new(PassDecider), None)
    }

    /// Build a kernel with a decider for external-archetype agents
    pub fn with_external(
        config: ScenarioConfig,
        decider: Arc<dyn ExternalDecider>,
    ) -> KernelResult<Self> {
        Self::build(config, decider, None)
    }

    /// Build a kernel whose event log commits to `sink` before each append
    /// returns
    pub fn with_sink(config: ScenarioConfig, sink: Box<dyn EventSink>) -> KernelResult<Self> {
        Self::build(config, Arc::new(PassDecider), Some(sink))
    }

    fn build(
        config: ScenarioConfig,
        decider: Arc<dyn ExternalDecider>,
        sink: Option<Box<dyn EventSink>>,
    ) -> KernelResult<Self> {
        config.validate()?;
        let mut rng = KernelRng::seed_from(config.seed);
        let mut env = Environment::new(config.rate_limits.clone());
        let governance = GovernanceEngine::new(
            config.governance.clone(),
            config.proxy.k,
            config.steps_per_epoch,
        );
        let mut log = match sink {
            Some(sink) => EventLog::with_sink(sink),
            None => EventLog::new(),
        };
        let mut policies: BTreeMap<AgentId, Box<dyn AgentPolicy>> = BTreeMap::new();

        let mut per_archetype: BTreeMap<Archetype, u32> = BTreeMap::new();
        for group in &config.agents {
            for _ in 0..group.count {
                let index = per_archetype.entry(group.archetype).or_insert(0);
                let id = AgentId::new(format!("{}-{}", group.archetype, index));
                *index += 1;

                // Adversarials coordinate through a shared latent group
                // unless the scenario overrides it
                let latent_group = group.params.group.clone().or_else(|| {
                    (group.archetype == Archetype::Adversarial)
                        .then(|| "adversarial".to_string())
                });

                let record = AgentRecord {
                    id: id.clone(),
                    archetype: group.archetype,
                    group: latent_group.clone(),
                    reputation: config.governance.initial_reputation,
                    resources: group
                        .params
                        .initial_resources
                        .unwrap_or(config.initial_resources),
                    stake: group.params.initial_stake.unwrap_or_else(|| {
                        if config.governance.staking_enabled() {
                            config.governance.staking_requirement
                        } else {
                            0.0
                        }
                    }),
                    frozen_until: None,
                    quarantined: false,
                };
                env.register_agent(record)?;

                let policy: Box<dyn AgentPolicy> = match group.archetype {
                    Archetype::External => Box::new(ExternalProxyPolicy::new(
                        Arc::clone(&decider),
                        Duration::from_millis(config.proxy_timeout_ms),
                    )),
                    archetype => local_policy(archetype, latent_group.as_deref(), &mut rng),
                };
                log.append(
                    0,
                    0,
                    EventKind::AgentRegistered,
                    json!({
                        "agent": id.as_str(),
                        "archetype": group.archetype.to_string(),
                    }),
                )?;
                policies.insert(id, policy);
            }
        }

        Ok(Self {
            config,
            env,
            governance,
            policies,
            rng,
            log,
            cancel: CancelHandle::default(),
            next_interaction: 0,
            proposed_this_epoch: 0,
            published_findings: Vec::new(),
            current_epoch: 0,
            current_step: 0,
        })
    }

    /// Handle for cooperative cancellation from another thread
    pub fn cancellation_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Push a finding onto the channel agents observe (reflexivity
    /// experiments)
    pub fn publish_finding(&mut self, finding: impl Into<String>) {
        self.published_findings.push(finding.into());
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// Drive the full run to completion, cancellation, or crash
    #[instrument(skip(self), fields(scenario = %self.config.id, seed = self.config.seed))]
    pub fn run(mut self) -> KernelResult<RunReport> {
        let start_time = Utc::now();
        info!(
            epochs = self.config.n_epochs,
            steps = self.config.steps_per_epoch,
            agents = self.env.agent_count(),
            "run starting"
        );

        match self.run_loop() {
            Ok((metrics, status, n_epochs_completed)) => {
                let manifest = RunManifest {
                    run_id: uuid::Uuid::new_v4().to_string(),
                    scenario_id: self.config.id.clone(),
                    seed: self.config.seed,
                    start_time,
                    end_time: Utc::now(),
                    n_epochs_completed,
                    final_status: status,
                };
                info!(status = ?status, epochs = n_epochs_completed, "run finished");
                let agents = self.env.agents().cloned().collect();
                Ok(RunReport {
                    manifest,
                    metrics,
                    events: self.log,
                    agents,
                })
            }
            Err(err) => {
                // Clean terminator so downstream readers see the crash;
                // the sink already holds every prior event
                let _ = self.log.append(
                    self.current_epoch,
                    self.current_step,
                    EventKind::RunCrashed,
                    json!({ "error": err.to_string() }),
                );
                Err(err)
            }
        }
    }

    fn run_loop(&mut self) -> KernelResult<(Vec<EpochMetrics>, RunStatus, u64)> {
        let mut all_metrics = Vec::new();
        let mut status = RunStatus::Completed;
        let mut n_epochs_completed = 0;

        for epoch in 0..self.config.n_epochs {
            self.current_epoch = epoch;
            self.current_step = 0;
            self.governance
                .on_epoch_start(&mut self.env, epoch, &mut self.log)?;
            self.env.reset_rate_counters();
            for _ in 0..self.config.tasks_per_epoch {
                self.env.spawn_task(self.config.task_reward);
            }
            self.proposed_this_epoch = 0;

            let mut cancelled = false;
            for step in 0..self.config.steps_per_epoch {
                self.current_step = step;
                self.run_step(epoch, step)?;
                if self.cancel.is_cancelled() {
                    self.log.append(
                        epoch,
                        step,
                        EventKind::RunCancelled,
                        json!({ "completed_steps": step + 1 }),
                    )?;
                    cancelled = true;
                    break;
                }
            }

            let metrics = self.epoch_metrics(epoch);
            if !cancelled {
                self.governance
                    .on_epoch_end(&mut self.env, epoch, &metrics, &mut self.log)?;
            }
            self.log.append(
                epoch,
                self.current_step,
                EventKind::EpochMetrics,
                serde_json::to_value(&metrics)?,
            )?;
            all_metrics.push(metrics);

            if cancelled {
                status = RunStatus::Cancelled;
                break;
            }
            n_epochs_completed += 1;
        }

        if status == RunStatus::Completed {
            self.log.append(
                self.config.n_epochs.saturating_sub(1),
                self.current_step,
                EventKind::RunCompleted,
                json!({ "epochs": n_epochs_completed }),
            )?;
        }
        Ok((all_metrics, status, n_epochs_completed))
    }

    fn run_step(&mut self, epoch: u64, step: u64) -> KernelResult<()> {
        let visitation = self.visitation();
        let mut visited: BTreeSet<AgentId> = BTreeSet::new();

        for agent_id in visitation {
            let record = match self.env.agent(&agent_id) {
                Some(record) => record.clone(),
                None => continue,
            };
            if !record.is_active(epoch) {
                self.log.append(
                    epoch,
                    step,
                    EventKind::AgentSkipped,
                    json!({
                        "agent": agent_id.as_str(),
                        "lifecycle": serde_json::to_value(record.lifecycle(epoch))?,
                    }),
                )?;
                visited.insert(agent_id);
                continue;
            }

            let observation = self.build_observation(&record, epoch, step);
            let action = {
                let policy = self
                    .policies
                    .get_mut(&agent_id)
                    .ok_or_else(|| KernelError::State(format!("no policy for {}", agent_id)))?;
                policy.act(&observation, &mut self.rng)
            };

            // Repeatedly failing proxies are quarantined for the rest of
            // the run
            if let PolicyHealth::Failing(failures) = self
                .policies
                .get(&agent_id)
                .map(|p| p.health())
                .unwrap_or(PolicyHealth::Healthy)
            {
                if failures >= self.config.proxy_failure_threshold {
                    self.env.quarantine(&agent_id)?;
                    self.log.append(
                        epoch,
                        step,
                        EventKind::AgentQuarantined,
                        json!({ "agent": agent_id.as_str(), "reason": "proxy_failures" }),
                    )?;
                    visited.insert(agent_id);
                    continue;
                }
            }

            let outcome = self.execute(&agent_id, action, epoch, step, &visited)?;
            if let Some(policy) = self.policies.get_mut(&agent_id) {
                policy.on_result(&outcome);
            }
            visited.insert(agent_id);
        }

        self.resolution_sweep(epoch, step)
    }

    /// Deterministic visitation order for one step
    fn visitation(&mut self) -> Vec<AgentId> {
        let mut order: Vec<AgentId> = self.env.roster().to_vec();
        match self.config.scheduling {
            SchedulingMode::RoundRobin => {}
            SchedulingMode::Random => self.rng.shuffle(&mut order),
            SchedulingMode::Priority => {
                // Stable sort keeps registration order among ties
                order.sort_by(|a, b| {
                    let ra = self.env.agent(a).map(|r| r.reputation).unwrap_or(0.0);
                    let rb = self.env.agent(b).map(|r| r.reputation).unwrap_or(0.0);
                    rb.partial_cmp(&ra).unwrap_or(std::cmp::Ordering::Equal)
                });
            }
        }
        order
    }

    fn build_observation(&self, record: &AgentRecord, epoch: u64, step: u64) -> Observation {
        let peers: Vec<PeerView> = self
            .env
            .agents()
            .filter(|other| other.id != record.id)
            .map(|other| PeerView {
                id: other.id.clone(),
                reputation: other.reputation,
                group: other.group.clone(),
            })
            .collect();
        let open_tasks: Vec<TaskId> = self
            .env
            .tasks()
            .filter(|task| task.is_open())
            .map(|task| task.id.clone())
            .collect();
        let claimed_tasks: Vec<TaskId> = self
            .env
            .tasks()
            .filter(|task| {
                task.claimer.as_ref() == Some(&record.id)
                    && task.submission.is_none()
                    && task.verified.is_none()
            })
            .map(|task| task.id.clone())
            .collect();
        let verifiable_tasks: Vec<TaskId> = self
            .env
            .tasks()
            .filter(|task| {
                task.awaiting_verification() && task.claimer.as_ref() != Some(&record.id)
            })
            .map(|task| task.id.clone())
            .collect();
        let feed: Vec<PostView> = self
            .env
            .feed()
            .iter()
            .rev()
            .take(10)
            .map(|post| PostView {
                id: post.id,
                author: post.author.clone(),
                net_votes: post.net_votes(),
            })
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        let incoming: Vec<IncomingProposal> = self
            .env
            .pending_for(&record.id)
            .into_iter()
            .map(|pending| IncomingProposal {
                id: pending.id.clone(),
                from: pending.initiator.clone(),
                kind: pending.kind,
                p: pending.p,
            })
            .collect();
        Observation {
            epoch,
            step,
            me: record.clone(),
            peers,
            open_tasks,
            claimed_tasks,
            verifiable_tasks,
            feed,
            incoming,
            published_findings: self.published_findings.clone(),
        }
    }

    /// Execute one action. Transient failures are logged and surface as a
    /// failed outcome; the turn effectively becomes a pass.
    fn execute(
        &mut self,
        actor: &AgentId,
        action: Action,
        epoch: u64,
        step: u64,
        visited: &BTreeSet<AgentId>,
    ) -> KernelResult<ActionOutcome> {
        // Invariant backstop: frozen or quarantined agents are skipped in
        // visitation, so an action reaching here for one is dropped loudly
        let active = self
            .env
            .agent(actor)
            .is_some_and(|record| record.is_active(epoch));
        if !active {
            self.log.append(
                epoch,
                step,
                EventKind::FrozenActionDropped,
                json!({ "agent": actor.as_str(), "action": action.kind() }),
            )?;
            return Ok(ActionOutcome::Failed {
                reason: TxError::AgentFrozen(actor.clone()),
            });
        }

        // Emission precedes every event the action causes, so sequence
        // numbers follow visitation x action order
        self.log.append(
            epoch,
            step,
            EventKind::ActionEmitted,
            json!({ "agent": actor.as_str(), "action": action.kind() }),
        )?;
        let result = self.dispatch(actor, &action, epoch, step, visited)?;
        match result {
            Ok(outcome) => Ok(outcome),
            Err(tx) => {
                debug!(agent = %actor, action = action.kind(), reason = %tx, "action converted to pass");
                Ok(ActionOutcome::Failed { reason: tx })
            }
        }
    }

    /// Inner dispatch: `Err(TxError)` is the transient-failure channel
    #[allow(clippy::type_complexity)]
    fn dispatch(
        &mut self,
        actor: &AgentId,
        action: &Action,
        epoch: u64,
        step: u64,
        visited: &BTreeSet<AgentId>,
    ) -> KernelResult<Result<ActionOutcome, TxError>> {
        match action {
            Action::Pass => Ok(Ok(ActionOutcome::Executed)),

            Action::Post { content } => {
                if let Err(tx) = self.env.charge_rate(actor, RateCategory::Posts) {
                    return Ok(Err(tx));
                }
                match self.env.add_post(actor, epoch, content.clone(), None) {
                    Ok(_) => Ok(Ok(ActionOutcome::Executed)),
                    Err(tx) => Ok(Err(tx)),
                }
            }

            Action::Reply { parent, content } => {
                if let Err(tx) = self.env.charge_rate(actor, RateCategory::Posts) {
                    return Ok(Err(tx));
                }
                match self
                    .env
                    .add_post(actor, epoch, content.clone(), Some(*parent))
                {
                    Ok(_) => Ok(Ok(ActionOutcome::Executed)),
                    Err(tx) => Ok(Err(tx)),
                }
            }

            Action::Vote { post, up } => {
                if let Err(tx) = self.env.charge_rate(actor, RateCategory::Votes) {
                    return Ok(Err(tx));
                }
                match self.env.vote(actor, *post, *up) {
                    Ok(author) => {
                        self.governance.record_vote(actor, &author, epoch, step, *up);
                        Ok(Ok(ActionOutcome::Executed))
                    }
                    Err(tx) => Ok(Err(tx)),
                }
            }

            Action::ClaimTask { task } => match self.env.claim_task(actor, task) {
                Ok(()) => Ok(Ok(ActionOutcome::Executed)),
                Err(tx) => Ok(Err(tx)),
            },

            Action::SubmitWork { task, effort } => {
                match self.env.submit_work(actor, task, *effort) {
                    Ok(()) => Ok(Ok(ActionOutcome::Executed)),
                    Err(tx) => Ok(Err(tx)),
                }
            }

            Action::Verify { task } => self.dispatch_verify(actor, task, epoch, step),

            Action::Collaborate {
                partner,
                intent,
                gloss,
            } => self.dispatch_proposal(
                actor,
                partner,
                InteractionKind::Collaboration,
                *intent,
                *gloss,
                epoch,
                step,
                visited,
            ),

            Action::TradePropose {
                partner,
                intent,
                gloss,
                ..
            } => self.dispatch_proposal(
                actor,
                partner,
                InteractionKind::Trade,
                *intent,
                *gloss,
                epoch,
                step,
                visited,
            ),

            Action::TradeAccept { interaction } => {
                if let Err(tx) = self.env.charge_rate(actor, RateCategory::Interactions) {
                    return Ok(Err(tx));
                }
                let pending = match self.env.take_pending(interaction) {
                    Some(pending) if pending.counterparty == *actor => pending,
                    Some(pending) => {
                        // Not addressed to this agent; put it back untouched
                        self.env
                            .propose_interaction(pending)
                            .map_err(|e| KernelError::State(e.to_string()))?;
                        return Ok(Err(TxError::UnknownInteraction(interaction.clone())));
                    }
                    None => {
                        return Ok(Err(TxError::UnknownInteraction(interaction.clone())))
                    }
                };
                let initiator = pending.initiator.clone();
                let ix = self.resolve(pending, Some(true))?;
                self.deliver(&initiator, &ix, true);
                Ok(Ok(ActionOutcome::InteractionResolved {
                    id: ix.id.clone(),
                    with: initiator,
                    accepted: ix.accepted,
                    p: ix.p,
                    payoff: ix.payoff_b,
                }))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn dispatch_proposal(
        &mut self,
        actor: &AgentId,
        partner: &AgentId,
        kind: InteractionKind,
        intent: f64,
        gloss: f64,
        epoch: u64,
        step: u64,
        visited: &BTreeSet<AgentId>,
    ) -> KernelResult<Result<ActionOutcome, TxError>> {
        if let Err(tx) = self.env.charge_rate(actor, RateCategory::Interactions) {
            return Ok(Err(tx));
        }
        let record = self
            .env
            .agent(actor)
            .ok_or_else(|| KernelError::State(format!("unknown actor {}", actor)))?;
        if !self.governance.may_initiate(record.stake) {
            return Ok(Err(TxError::InsufficientStake {
                agent: actor.clone(),
                stake: record.stake,
                required: self.config.governance.staking_requirement,
            }));
        }

        let (observables, true_value) = synthesize_observables(intent, gloss, &mut self.rng);
        let (v_hat, p) = proxy::soft_label(&observables, &self.config.proxy);
        let id = InteractionId::from_counter(self.next_interaction);
        self.next_interaction += 1;

        let pending = PendingInteraction {
            id: id.clone(),
            initiator: actor.clone(),
            counterparty: partner.clone(),
            kind,
            observables,
            v_hat,
            p,
            true_value,
            epoch,
            step,
        };
        if let Err(tx) = self.env.propose_interaction(pending) {
            return Ok(Err(tx));
        }
        self.proposed_this_epoch += 1;
        self.log.append(
            epoch,
            step,
            EventKind::InteractionProposed,
            json!({
                "interaction": id.0,
                "initiator": actor.as_str(),
                "counterparty": partner.as_str(),
                "kind": kind.to_string(),
                "p": p,
            }),
        )?;

        // Resolve now if the counterparty's turn already happened this step;
        // otherwise the end-of-step sweep picks it up
        if visited.contains(partner) {
            let pending = self
                .env
                .take_pending(&id)
                .ok_or_else(|| KernelError::State(format!("pending {} vanished", id)))?;
            let counterparty = pending.counterparty.clone();
            let ix = self.resolve(pending, None)?;
            self.deliver(&counterparty, &ix, false);
            return Ok(Ok(ActionOutcome::InteractionResolved {
                id: ix.id.clone(),
                with: counterparty,
                accepted: ix.accepted,
                p: ix.p,
                payoff: ix.payoff_a,
            }));
        }
        Ok(Ok(ActionOutcome::Executed))
    }

    fn dispatch_verify(
        &mut self,
        actor: &AgentId,
        task: &TaskId,
        epoch: u64,
        step: u64,
    ) -> KernelResult<Result<ActionOutcome, TxError>> {
        if let Err(tx) = self.env.charge_rate(actor, RateCategory::Interactions) {
            return Ok(Err(tx));
        }
        let (claimer, effort) = match self.env.verification_target(actor, task) {
            Ok(target) => target,
            Err(tx) => return Ok(Err(tx)),
        };

        // Submitted effort in [0, 1] maps onto the latent intent scale
        let intent = (effort * 2.0 - 1.0).clamp(-1.0, 1.0);
        let (observables, true_value) = synthesize_observables(intent, 0.0, &mut self.rng);
        let (v_hat, p) = proxy::soft_label(&observables, &self.config.proxy);
        let id = InteractionId::from_counter(self.next_interaction);
        self.next_interaction += 1;
        self.proposed_this_epoch += 1;
        self.log.append(
            epoch,
            step,
            EventKind::InteractionProposed,
            json!({
                "interaction": id.0,
                "initiator": claimer.as_str(),
                "counterparty": actor.as_str(),
                "kind": InteractionKind::TaskWork.to_string(),
                "task": task.0,
                "p": p,
            }),
        )?;

        let pending = PendingInteraction {
            id,
            initiator: claimer.clone(),
            counterparty: actor.clone(),
            kind: InteractionKind::TaskWork,
            observables,
            v_hat,
            p,
            true_value,
            epoch,
            step,
        };
        // The verifier is present and deciding, so this resolves in place
        let ix = self.resolve(pending, None)?;
        self.env
            .record_verification(task, ix.accepted)
            .map_err(|e| KernelError::State(e.to_string()))?;
        self.deliver(&claimer, &ix, true);
        Ok(Ok(ActionOutcome::InteractionResolved {
            id: ix.id.clone(),
            with: claimer,
            accepted: ix.accepted,
            p: ix.p,
            payoff: ix.payoff_b,
        }))
    }

    /// Resolve a pending interaction: acceptance decision, payoffs,
    /// governance hooks, ledger application, and the resolution event.
    /// `decided` short-circuits the counterparty's policy (eager accepts).
    fn resolve(
        &mut self,
        pending: PendingInteraction,
        decided: Option<bool>,
    ) -> KernelResult<SoftInteraction> {
        let (epoch, step) = (pending.epoch, pending.step);
        let initiator_record = self
            .env
            .agent(&pending.initiator)
            .ok_or_else(|| KernelError::State(format!("unknown initiator {}", pending.initiator)))?
            .clone();
        let counterparty_record = self
            .env
            .agent(&pending.counterparty)
            .ok_or_else(|| {
                KernelError::State(format!("unknown counterparty {}", pending.counterparty))
            })?
            .clone();

        let accepted = match decided {
            Some(decision) => decision,
            None => {
                let view = ProposalView {
                    id: pending.id.clone(),
                    from: pending.initiator.clone(),
                    from_reputation: initiator_record.reputation,
                    from_group: initiator_record.group.clone(),
                    kind: pending.kind,
                    v_hat: pending.v_hat,
                    p: pending.p,
                };
                let policy = self
                    .policies
                    .get_mut(&pending.counterparty)
                    .ok_or_else(|| {
                        KernelError::State(format!("no policy for {}", pending.counterparty))
                    })?;
                policy.accept(&view, &mut self.rng)
            }
        };

        let mut interaction = SoftInteraction {
            id: pending.id,
            epoch,
            step,
            initiator: pending.initiator,
            counterparty: pending.counterparty,
            kind: pending.kind,
            accepted,
            v_hat: pending.v_hat,
            p: pending.p,
            observables: pending.observables,
            true_value: pending.true_value,
            audited: false,
            audit_verdict: None,
            taxed_amount: 0.0,
            payoff_a: 0.0,
            payoff_b: 0.0,
        };
        let (payoff_a, payoff_b) = compute_payoffs(
            &interaction,
            &self.config.payoff,
            initiator_record.reputation,
            counterparty_record.reputation,
        );
        interaction.payoff_a = payoff_a;
        interaction.payoff_b = payoff_b;

        self.governance.on_interaction_resolved(
            &mut interaction,
            &mut self.env,
            &mut self.rng,
            &mut self.log,
        )?;

        self.env.apply_payoffs(
            &interaction.initiator,
            interaction.payoff_a,
            &interaction.counterparty,
            interaction.payoff_b,
        )?;

        self.log.append(
            epoch,
            step,
            EventKind::InteractionResolved,
            json!({ "interaction": interaction }),
        )?;
        self.env.record_resolved(interaction.clone());
        Ok(interaction)
    }

    /// Feed an interaction outcome back to one participant
    fn deliver(&mut self, agent: &AgentId, interaction: &SoftInteraction, as_initiator: bool) {
        let (with, payoff) = if as_initiator {
            (interaction.counterparty.clone(), interaction.payoff_a)
        } else {
            (interaction.initiator.clone(), interaction.payoff_b)
        };
        if let Some(policy) = self.policies.get_mut(agent) {
            policy.on_result(&ActionOutcome::InteractionResolved {
                id: interaction.id.clone(),
                with,
                accepted: interaction.accepted,
                p: interaction.p,
                payoff,
            });
        }
    }

    /// End-of-step sweep: resolve what the turn order deferred, abandon the
    /// rest
    fn resolution_sweep(&mut self, epoch: u64, step: u64) -> KernelResult<()> {
        for pending in self.env.drain_pending() {
            let counterparty_active = self
                .env
                .agent(&pending.counterparty)
                .is_some_and(|record| record.is_active(epoch));
            if !counterparty_active {
                self.log.append(
                    epoch,
                    step,
                    EventKind::InteractionAbandoned,
                    json!({
                        "interaction": pending.id.0,
                        "initiator": pending.initiator.as_str(),
                        "counterparty": pending.counterparty.as_str(),
                        "reason": "counterparty_inactive",
                    }),
                )?;
                continue;
            }
            let initiator = pending.initiator.clone();
            let counterparty = pending.counterparty.clone();
            let ix = self.resolve(pending, None)?;
            self.deliver(&initiator, &ix, true);
            self.deliver(&counterparty, &ix, false);
        }
        Ok(())
    }

    fn epoch_metrics(&self, epoch: u64) -> EpochMetrics {
        let interactions: Vec<&SoftInteraction> = self.env.resolved_in_epoch(epoch).collect();
        compute_epoch_metrics(
            epoch,
            &interactions,
            self.proposed_this_epoch,
            self.env.frozen_count(epoch),
            self.governance.flagged_pair_count(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentGroupConfig;

    fn scenario(agents: Vec<(Archetype, u32)>, seed: u64) -> ScenarioConfig {
        let mut config = ScenarioConfig::minimal("test", seed);
        config.n_epochs = 2;
        config.steps_per_epoch = 3;
        config.agents = agents
            .into_iter()
            .map(|(archetype, count)| AgentGroupConfig {
                archetype,
                count,
                params: Default::default(),
            })
            .collect();
        config
    }

    #[test]
    fn test_empty_population_completes() {
        let config = scenario(vec![], 1);
        let report = Orchestrator::new(config).unwrap().run().unwrap();
        assert_eq!(report.manifest.final_status, RunStatus::Completed);
        assert_eq!(report.metrics.len(), 2);
        assert!(report.metrics.iter().all(|m| m.accepted == 0));
        assert_eq!(report.events.count(EventKind::RunCompleted), 1);
    }

    #[test]
    fn test_zero_epochs_emit_no_metrics() {
        let mut config = scenario(vec![(Archetype::Honest, 2)], 1);
        config.n_epochs = 0;
        let report = Orchestrator::new(config).unwrap().run().unwrap();
        assert!(report.metrics.is_empty());
        assert_eq!(report.events.count(EventKind::EpochMetrics), 0);
    }

    #[test]
    fn test_zero_steps_produce_empty_epochs() {
        let mut config = scenario(vec![(Archetype::Honest, 2)], 1);
        config.steps_per_epoch = 0;
        let report = Orchestrator::new(config).unwrap().run().unwrap();
        assert_eq!(report.metrics.len(), 2);
        assert!(report.metrics.iter().all(|m| m.accepted == 0 && m.rejected == 0));
    }

    #[test]
    fn test_honest_population_interacts() {
        let config = scenario(vec![(Archetype::Honest, 3)], 42);
        let report = Orchestrator::new(config).unwrap().run().unwrap();
        let resolved = report.events.to_interactions().unwrap();
        assert!(!resolved.is_empty());
        assert!(resolved.iter().all(|ix| ix.payoff_a.is_finite()));
    }

    #[test]
    fn test_registration_events_precede_actions() {
        let config = scenario(vec![(Archetype::Honest, 2)], 7);
        let report = Orchestrator::new(config).unwrap().run().unwrap();
        let first_kinds: Vec<EventKind> = report
            .events
            .iter()
            .take(2)
            .map(|e| e.kind)
            .collect();
        assert_eq!(
            first_kinds,
            vec![EventKind::AgentRegistered, EventKind::AgentRegistered]
        );
    }

    #[test]
    fn test_cancellation_stops_at_step_boundary() {
        let mut config = scenario(vec![(Archetype::Honest, 2)], 9);
        config.n_epochs = 50;
        config.steps_per_epoch = 1;
        let orchestrator = Orchestrator::new(config).unwrap();
        let handle = orchestrator.cancellation_handle();
        handle.cancel();
        let report = orchestrator.run().unwrap();
        assert_eq!(report.manifest.final_status, RunStatus::Cancelled);
        assert_eq!(report.manifest.n_epochs_completed, 0);
        assert_eq!(report.events.count(EventKind::RunCancelled), 1);
        // Partial metrics for the interrupted epoch still emitted
        assert_eq!(report.metrics.len(), 1);
    }

    #[test]
    fn test_sequence_numbers_strictly_increase() {
        let config = scenario(vec![(Archetype::Honest, 2), (Archetype::Opportunistic, 1)], 5);
        let report = Orchestrator::new(config).unwrap().run().unwrap();
        let seqs: Vec<u64> = report.events.iter().map(|e| e.seq).collect();
        for window in seqs.windows(2) {
            assert!(window[1] == window[0] + 1);
        }
        assert_eq!(seqs.first(), Some(&0));
    }

    #[test]
    fn test_observable_synthesis_tracks_intent() {
        let mut rng = KernelRng::seed_from(0);
        let (good, good_true) = synthesize_observables(0.8, 0.0, &mut rng);
        let (bad, bad_true) = synthesize_observables(-0.7, 0.0, &mut rng);
        assert!(good.task_progress_delta > bad.task_progress_delta);
        assert!(good.rework_count < bad.rework_count);
        assert_eq!(good_true, 0.8);
        assert_eq!(bad_true, -0.7);
    }

    #[test]
    fn test_gloss_inflates_observables_not_latent_value() {
        let mut rng_a = KernelRng::seed_from(123);
        let mut rng_b = KernelRng::seed_from(123);
        let (plain, plain_true) = synthesize_observables(-0.5, 0.0, &mut rng_a);
        let (glossed, glossed_true) = synthesize_observables(-0.5, 0.6, &mut rng_b);
        assert_eq!(plain_true, glossed_true);
        assert!(glossed.task_progress_delta > plain.task_progress_delta);
        assert!(glossed.verifier_rejections <= plain.verifier_rejections);
    }
}

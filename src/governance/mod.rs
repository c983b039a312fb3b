//! Governance engine
//!
//! Stateful coordinator for taxes, reputation decay, random audits, circuit
//! breakers, staking, and collusion detection. Hooks fire in a fixed order
//! per resolved interaction: tax, audit, circuit-breaker update, stake check,
//! collusion update. The order is part of the contract; downstream penalties
//! observe upstream mutations.

pub mod collusion;

pub use collusion::{pearson, PairFlag, PairTracker};

use crate::config::GovernanceConfig;
use crate::env::Environment;
use crate::error::KernelResult;
use crate::events::{EventKind, EventLog};
use crate::proxy;
use crate::rng::KernelRng;
use crate::types::{AgentId, SoftInteraction};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::{debug, info};

/// Stake below this floor counts as exhausted
const STAKE_FLOOR: f64 = 1e-6;

/// Stateful governance coordinator
pub struct GovernanceEngine {
    config: GovernanceConfig,
    /// Sigmoid steepness, needed to turn audited latent values into labels
    k: f64,
    steps_per_epoch: u64,
    /// Rolling (1 - p) window per initiating agent
    windows: BTreeMap<AgentId, VecDeque<f64>>,
    /// p values observed per agent this epoch, both roles
    epoch_ps: BTreeMap<AgentId, Vec<f64>>,
    pairs: PairTracker,
    flagged: BTreeSet<(AgentId, AgentId)>,
    taxes_collected: f64,
}

impl GovernanceEngine {
    pub fn new(config: GovernanceConfig, k: f64, steps_per_epoch: u64) -> Self {
        let window = config.collusion_window;
        Self {
            config,
            k,
            steps_per_epoch,
            windows: BTreeMap::new(),
            epoch_ps: BTreeMap::new(),
            pairs: PairTracker::new(window),
            flagged: BTreeSet::new(),
            taxes_collected: 0.0,
        }
    }

    fn global_step(&self, epoch: u64, step: u64) -> u64 {
        epoch * self.steps_per_epoch.max(1) + step
    }

    /// Pairs flagged so far this run
    pub fn flagged_pair_count(&self) -> u64 {
        self.flagged.len() as u64
    }

    /// Total tax collected this run
    pub fn taxes_collected(&self) -> f64 {
        self.taxes_collected
    }

    /// Whether an agent currently satisfies the staking requirement to
    /// initiate interactions
    pub fn may_initiate(&self, stake: f64) -> bool {
        !self.config.staking_enabled() || stake >= self.config.staking_requirement
    }

    /// Epoch-start hook: thaw expired freezes
    pub fn on_epoch_start(
        &mut self,
        env: &mut Environment,
        epoch: u64,
        log: &mut EventLog,
    ) -> KernelResult<()> {
        let expired: Vec<AgentId> = env
            .agents()
            .filter(|a| a.frozen_until.is_some_and(|until| epoch >= until))
            .map(|a| a.id.clone())
            .collect();
        for id in expired {
            env.unfreeze(&id)?;
            info!(agent = %id, epoch, "circuit breaker cooldown expired");
            log.append(
                epoch,
                0,
                EventKind::AgentUnfrozen,
                json!({ "agent": id.as_str() }),
            )?;
        }
        self.epoch_ps.clear();
        Ok(())
    }

    /// Per-interaction hook, applied immediately after payoff computation.
    /// Mutates the interaction record (tax, audit fields) in place.
    pub fn on_interaction_resolved(
        &mut self,
        interaction: &mut SoftInteraction,
        env: &mut Environment,
        rng: &mut KernelRng,
        log: &mut EventLog,
    ) -> KernelResult<()> {
        let epoch = interaction.epoch;
        let step = interaction.step;

        // 1. Transaction tax: flat per accepted interaction, split evenly
        if interaction.accepted && self.config.tax_rate > 0.0 {
            let tax = self.config.tax_rate;
            interaction.taxed_amount = tax;
            interaction.payoff_a -= tax / 2.0;
            interaction.payoff_b -= tax / 2.0;
            self.taxes_collected += tax;
        }

        // 2. Random audit: reveal the latent value, penalize divergence.
        // The draw happens for every resolved interaction so the RNG stream
        // does not depend on data values.
        if rng.chance(self.config.audit_probability) {
            interaction.audited = true;
            let true_p = proxy::sigmoid(self.k, interaction.true_value);
            let divergence = (interaction.p - true_p).abs();
            let mismatch = divergence > self.config.audit_divergence_threshold;
            interaction.audit_verdict = Some(mismatch);
            log.append(
                epoch,
                step,
                EventKind::AuditExecuted,
                json!({
                    "interaction": interaction.id.0,
                    "initiator": interaction.initiator.as_str(),
                    "divergence": divergence,
                    "mismatch": mismatch,
                }),
            )?;
            if mismatch {
                let initiator = interaction.initiator.clone();
                if let Some(record) = env.agent(&initiator) {
                    let penalized =
                        (record.reputation - self.config.audit_penalty * divergence).max(0.0);
                    env.set_reputation(&initiator, penalized)?;
                }
                env.debit_resources(&initiator, self.config.audit_penalty)?;
                debug!(agent = %initiator, divergence, "audit mismatch penalty applied");
                if self.config.staking_enabled() {
                    let slashed = env.slash_stake(&initiator, self.config.stake_slash_rate)?;
                    if slashed > 0.0 {
                        log.append(
                            epoch,
                            step,
                            EventKind::StakeSlashed,
                            json!({
                                "agent": initiator.as_str(),
                                "amount": slashed,
                                "interaction": interaction.id.0,
                            }),
                        )?;
                    }
                }
            }
        }

        // 3. Circuit-breaker update on the initiator's rolling toxicity
        if self.config.circuit_breaker_enabled {
            let window_len = self.config.circuit_breaker_window;
            let initiator = interaction.initiator.clone();
            let window = self.windows.entry(initiator.clone()).or_default();
            window.push_back(1.0 - interaction.p);
            while window.len() > window_len {
                window.pop_front();
            }
            if window.len() == window_len {
                let toxicity = window.iter().sum::<f64>() / window_len as f64;
                let active = env
                    .agent(&initiator)
                    .is_some_and(|a| a.is_active(epoch));
                if toxicity > self.config.circuit_breaker_threshold && active {
                    let until = epoch + self.config.circuit_breaker_cooldown;
                    env.freeze(&initiator, until)?;
                    // A fresh window after thawing, otherwise the stale
                    // window re-trips on the first post-cooldown interaction
                    self.windows.remove(&initiator);
                    info!(agent = %initiator, toxicity, until, "circuit breaker tripped");
                    log.append(
                        epoch,
                        step,
                        EventKind::AgentFrozen,
                        json!({
                            "agent": initiator.as_str(),
                            "toxicity": toxicity,
                            "frozen_until": until,
                        }),
                    )?;
                }
            }
        }

        // 4. Stake check: exhausted stake quarantines the agent
        if self.config.staking_enabled() {
            let initiator = interaction.initiator.clone();
            let exhausted = env
                .agent(&initiator)
                .is_some_and(|a| a.stake < STAKE_FLOOR && !a.quarantined);
            if exhausted {
                env.quarantine(&initiator)?;
                log.append(
                    epoch,
                    step,
                    EventKind::AgentQuarantined,
                    json!({ "agent": initiator.as_str(), "reason": "stake_exhausted" }),
                )?;
            }
        }

        // 5. Collusion update
        if self.config.collusion_enabled {
            self.pairs.record_interaction(
                &interaction.initiator,
                &interaction.counterparty,
                self.global_step(epoch, step),
                interaction.accepted,
                interaction.p,
            );
        }

        // Both parties' epoch means feed the reputation update
        for id in [&interaction.initiator, &interaction.counterparty] {
            self.epoch_ps
                .entry(id.clone())
                .or_default()
                .push(interaction.p);
        }

        Ok(())
    }

    /// Vote bookkeeping for the collusion frequency branch
    pub fn record_vote(
        &mut self,
        voter: &AgentId,
        author: &AgentId,
        epoch: u64,
        step: u64,
        up: bool,
    ) {
        if self.config.collusion_enabled {
            self.pairs
                .record_vote(voter, author, self.global_step(epoch, step), up);
        }
    }

    /// Epoch-end hook: reputation update and collusion sweep
    pub fn on_epoch_end(
        &mut self,
        env: &mut Environment,
        epoch: u64,
        metrics: &crate::metrics::EpochMetrics,
        log: &mut EventLog,
    ) -> KernelResult<()> {
        debug!(
            epoch,
            toxicity = metrics.toxicity_rate,
            accepted = metrics.accepted,
            "governance epoch-end"
        );
        // r' = gamma * r + (1 - gamma) * p_bar, once per epoch. Agents with
        // no interactions this epoch keep their reputation unchanged.
        let gamma = self.config.gamma();
        let updates: Vec<(AgentId, f64)> = env
            .agents()
            .filter_map(|record| {
                let ps = self.epoch_ps.get(&record.id)?;
                if ps.is_empty() {
                    return None;
                }
                let p_bar = ps.iter().sum::<f64>() / ps.len() as f64;
                let next = (gamma * record.reputation + (1.0 - gamma) * p_bar)
                    .clamp(0.0, self.config.max_reputation);
                Some((record.id.clone(), next))
            })
            .collect();
        for (id, reputation) in updates {
            env.set_reputation(&id, reputation)?;
        }

        if self.config.collusion_enabled {
            let now = self.global_step(epoch + 1, 0);
            let flags = self.pairs.sweep(
                now,
                self.config.collusion_correlation_threshold,
                self.config.collusion_min_samples,
            );
            for flag in flags {
                let key = (flag.a.clone(), flag.b.clone());
                if self.flagged.contains(&key) {
                    continue;
                }
                self.flagged.insert(key);
                info!(a = %flag.a, b = %flag.b, "collusion flagged");
                log.append(
                    epoch,
                    0,
                    EventKind::CollusionFlagged,
                    json!({
                        "a": flag.a.as_str(),
                        "b": flag.b.as_str(),
                        "positive_count": flag.positive_count,
                        "correlation": flag.correlation,
                        "by_frequency": flag.by_frequency,
                        "by_correlation": flag.by_correlation,
                    }),
                )?;
                if self.config.collusion_penalty > 0.0 {
                    for id in [&flag.a, &flag.b] {
                        if let Some(record) = env.agent(id) {
                            let penalized =
                                (record.reputation - self.config.collusion_penalty).max(0.0);
                            env.set_reputation(id, penalized)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

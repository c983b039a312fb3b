//! Scenario configuration surface
//!
//! The kernel consumes an already-loaded [`ScenarioConfig`]; YAML parsing and
//! CLI plumbing live with external collaborators. Unknown fields are rejected
//! at deserialization time, and numeric ranges are checked by
//! [`ScenarioConfig::validate`] before a run starts.

use crate::error::{KernelError, KernelResult};
use crate::proxy::ProxyWeights;
use crate::types::Archetype;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Soft payoff parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PayoffConfig {
    /// Reward scale for beneficial mass
    pub s_plus: f64,
    /// Penalty scale for harmful mass
    pub s_minus: f64,
    /// Externality magnitude
    pub h: f64,
    /// Initiator's share of the soft surplus, in [0, 1]
    pub theta: f64,
    /// Fixed transfer from initiator to counterparty
    pub tau: f64,
    /// Reputation bonus weight
    pub w_rep: f64,
    /// Initiator externality exposure
    pub rho_a: f64,
    /// Counterparty externality exposure
    pub rho_b: f64,
}

impl Default for PayoffConfig {
    fn default() -> Self {
        Self {
            s_plus: 1.0,
            s_minus: 1.0,
            h: 0.5,
            theta: 0.5,
            tau: 0.0,
            w_rep: 0.05,
            rho_a: 0.5,
            rho_b: 0.5,
        }
    }
}

impl PayoffConfig {
    pub fn validate(&self) -> KernelResult<()> {
        if !(0.0..=1.0).contains(&self.theta) || self.theta.is_nan() {
            return Err(KernelError::InvalidPayoffConfig(format!(
                "theta must be in [0, 1], got {}",
                self.theta
            )));
        }
        let fields = [
            ("s_plus", self.s_plus),
            ("s_minus", self.s_minus),
            ("h", self.h),
            ("tau", self.tau),
            ("w_rep", self.w_rep),
            ("rho_a", self.rho_a),
            ("rho_b", self.rho_b),
        ];
        for (name, value) in fields {
            if !value.is_finite() {
                return Err(KernelError::InvalidPayoffConfig(format!(
                    "{} must be finite, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

/// Governance knobs; every field maps to one mechanism
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct GovernanceConfig {
    /// Flat tax per resolved accepted interaction, split between the parties
    pub tax_rate: f64,
    /// 1 - gamma in the reputation update `r' = gamma*r + (1-gamma)*p_bar`
    pub reputation_decay: f64,
    pub initial_reputation: f64,
    /// Upper reputation clamp
    pub max_reputation: f64,
    /// Per-interaction independent audit probability
    pub audit_probability: f64,
    /// Scales the reputation/resource penalty an audit mismatch applies
    pub audit_penalty: f64,
    /// Divergence |p - sigmoid(k * true_value)| above which an audit flags
    pub audit_divergence_threshold: f64,
    pub circuit_breaker_enabled: bool,
    /// Rolling E[1-p] level that trips the breaker
    pub circuit_breaker_threshold: f64,
    /// Interactions in the rolling window
    pub circuit_breaker_window: usize,
    /// Epochs an agent stays frozen once tripped
    pub circuit_breaker_cooldown: u64,
    /// Minimum stake to initiate interactions; 0 disables staking
    pub staking_requirement: f64,
    /// Fraction of stake removed per slash
    pub stake_slash_rate: f64,
    pub collusion_enabled: bool,
    /// Pair samples kept for collusion statistics
    pub collusion_window: usize,
    /// Pearson correlation level that flags a pair
    pub collusion_correlation_threshold: f64,
    /// Samples a pair needs before either collusion branch can flag it
    pub collusion_min_samples: usize,
    /// Optional reputation penalty applied to freshly flagged pairs
    pub collusion_penalty: f64,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            tax_rate: 0.0,
            reputation_decay: 0.2,
            initial_reputation: 0.5,
            max_reputation: 1.0,
            audit_probability: 0.0,
            audit_penalty: 0.0,
            audit_divergence_threshold: 0.15,
            circuit_breaker_enabled: false,
            circuit_breaker_threshold: 0.5,
            circuit_breaker_window: 10,
            circuit_breaker_cooldown: 2,
            staking_requirement: 0.0,
            stake_slash_rate: 0.1,
            collusion_enabled: false,
            collusion_window: 20,
            collusion_correlation_threshold: 0.7,
            collusion_min_samples: 4,
            collusion_penalty: 0.0,
        }
    }
}

impl GovernanceConfig {
    /// Reputation retention factor gamma
    pub fn gamma(&self) -> f64 {
        1.0 - self.reputation_decay
    }

    pub fn staking_enabled(&self) -> bool {
        self.staking_requirement > 0.0
    }

    pub fn validate(&self) -> KernelResult<()> {
        let unit_ranged = [
            ("reputation_decay", self.reputation_decay),
            ("audit_probability", self.audit_probability),
            ("stake_slash_rate", self.stake_slash_rate),
        ];
        for (name, value) in unit_ranged {
            if !(0.0..=1.0).contains(&value) {
                return Err(KernelError::InvalidConfig(format!(
                    "{} must be in [0, 1], got {}",
                    name, value
                )));
            }
        }
        let non_negative = [
            ("tax_rate", self.tax_rate),
            ("initial_reputation", self.initial_reputation),
            ("audit_penalty", self.audit_penalty),
            ("audit_divergence_threshold", self.audit_divergence_threshold),
            ("staking_requirement", self.staking_requirement),
            ("collusion_penalty", self.collusion_penalty),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(KernelError::InvalidConfig(format!(
                    "{} must be finite and non-negative, got {}",
                    name, value
                )));
            }
        }
        if self.max_reputation <= 0.0 || !self.max_reputation.is_finite() {
            return Err(KernelError::InvalidConfig(format!(
                "max_reputation must be positive, got {}",
                self.max_reputation
            )));
        }
        if self.initial_reputation > self.max_reputation {
            return Err(KernelError::InvalidConfig(
                "initial_reputation exceeds max_reputation".into(),
            ));
        }
        if self.circuit_breaker_enabled {
            if self.circuit_breaker_window == 0 {
                return Err(KernelError::InvalidConfig(
                    "circuit_breaker_window must be nonzero when the breaker is enabled".into(),
                ));
            }
            if !(0.0..=1.0).contains(&self.circuit_breaker_threshold) {
                return Err(KernelError::InvalidConfig(format!(
                    "circuit_breaker_threshold must be in [0, 1], got {}",
                    self.circuit_breaker_threshold
                )));
            }
        }
        if self.collusion_enabled {
            if self.collusion_window == 0 {
                return Err(KernelError::InvalidConfig(
                    "collusion_window must be nonzero when collusion detection is enabled".into(),
                ));
            }
            if !(-1.0..=1.0).contains(&self.collusion_correlation_threshold) {
                return Err(KernelError::InvalidConfig(format!(
                    "collusion_correlation_threshold must be in [-1, 1], got {}",
                    self.collusion_correlation_threshold
                )));
            }
        }
        Ok(())
    }
}

/// Per-epoch action quotas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RateLimits {
    pub posts_per_epoch: u32,
    pub votes_per_epoch: u32,
    pub interactions_per_epoch: u32,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            posts_per_epoch: 10,
            votes_per_epoch: 20,
            interactions_per_epoch: 10,
        }
    }
}

/// Base quotas plus per-archetype overrides
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RateLimitConfig {
    pub base: RateLimits,
    pub overrides: BTreeMap<Archetype, RateLimits>,
}

impl RateLimitConfig {
    /// Effective quotas for an archetype
    pub fn for_archetype(&self, archetype: Archetype) -> RateLimits {
        self.overrides.get(&archetype).copied().unwrap_or(self.base)
    }
}

/// Visitation scheduling discipline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingMode {
    #[default]
    RoundRobin,
    /// Fisher-Yates shuffle per step, drawn from the kernel RNG
    Random,
    /// Descending reputation, registration order as tie-break
    Priority,
}

/// Per-archetype spawn parameters
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AgentParams {
    /// Latent coordination group; adversarials default to a shared group
    pub group: Option<String>,
    pub initial_resources: Option<f64>,
    pub initial_stake: Option<f64>,
}

/// One homogeneous block of agents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentGroupConfig {
    pub archetype: Archetype,
    pub count: u32,
    #[serde(default)]
    pub params: AgentParams,
}

/// Fully validated scenario description consumed by the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioConfig {
    pub id: String,
    pub seed: u64,
    pub n_epochs: u64,
    pub steps_per_epoch: u64,
    pub agents: Vec<AgentGroupConfig>,
    #[serde(default)]
    pub payoff: PayoffConfig,
    #[serde(default)]
    pub governance: GovernanceConfig,
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
    #[serde(default)]
    pub proxy: ProxyWeights,
    #[serde(default)]
    pub scheduling: SchedulingMode,
    /// Fresh tasks added to the pool at each epoch start
    #[serde(default = "default_tasks_per_epoch")]
    pub tasks_per_epoch: u64,
    #[serde(default = "default_task_reward")]
    pub task_reward: f64,
    /// Resources granted to each agent at registration unless overridden
    #[serde(default = "default_initial_resources")]
    pub initial_resources: f64,
    /// Consecutive external-proxy failures before quarantine
    #[serde(default = "default_proxy_failure_threshold")]
    pub proxy_failure_threshold: u32,
    /// External-proxy hard timeout in milliseconds
    #[serde(default = "default_proxy_timeout_ms")]
    pub proxy_timeout_ms: u64,
}

fn default_tasks_per_epoch() -> u64 {
    4
}

fn default_task_reward() -> f64 {
    1.0
}

fn default_initial_resources() -> f64 {
    10.0
}

fn default_proxy_failure_threshold() -> u32 {
    3
}

fn default_proxy_timeout_ms() -> u64 {
    5000
}

impl ScenarioConfig {
    /// Minimal valid scenario, useful as a test baseline
    pub fn minimal(id: impl Into<String>, seed: u64) -> Self {
        Self {
            id: id.into(),
            seed,
            n_epochs: 1,
            steps_per_epoch: 1,
            agents: vec![],
            payoff: PayoffConfig::default(),
            governance: GovernanceConfig::default(),
            rate_limits: RateLimitConfig::default(),
            proxy: ProxyWeights::default(),
            scheduling: SchedulingMode::default(),
            tasks_per_epoch: default_tasks_per_epoch(),
            task_reward: default_task_reward(),
            initial_resources: default_initial_resources(),
            proxy_failure_threshold: default_proxy_failure_threshold(),
            proxy_timeout_ms: default_proxy_timeout_ms(),
        }
    }

    pub fn validate(&self) -> KernelResult<()> {
        if self.id.is_empty() {
            return Err(KernelError::InvalidConfig("scenario id is empty".into()));
        }
        self.payoff.validate()?;
        self.governance.validate()?;
        self.proxy
            .validate()
            .map_err(KernelError::InvalidConfig)?;
        if !self.task_reward.is_finite() || self.task_reward < 0.0 {
            return Err(KernelError::InvalidConfig(format!(
                "task_reward must be finite and non-negative, got {}",
                self.task_reward
            )));
        }
        if !self.initial_resources.is_finite() {
            return Err(KernelError::InvalidConfig(format!(
                "initial_resources must be finite, got {}",
                self.initial_resources
            )));
        }
        for group in &self.agents {
            if let Some(stake) = group.params.initial_stake {
                if !stake.is_finite() || stake < 0.0 {
                    return Err(KernelError::InvalidConfig(format!(
                        "initial_stake must be finite and non-negative, got {}",
                        stake
                    )));
                }
            }
            if let Some(resources) = group.params.initial_resources {
                if !resources.is_finite() {
                    return Err(KernelError::InvalidConfig(format!(
                        "initial_resources must be finite, got {}",
                        resources
                    )));
                }
            }
        }
        Ok(())
    }
}

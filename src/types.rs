//! Core types for the simulation kernel

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable string identifier for agents
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Interaction identifier, minted by the orchestrator as `ix-<counter>`
/// (zero-padded so lexicographic order equals mint order)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InteractionId(pub String);

impl InteractionId {
    pub fn from_counter(n: u64) -> Self {
        Self(format!("ix-{:08}", n))
    }
}

impl fmt::Display for InteractionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Task identifier, minted as `task-<counter>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn from_counter(n: u64) -> Self {
        Self(format!("task-{:08}", n))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Agent behavioral class
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Archetype {
    Honest,
    Opportunistic,
    Deceptive,
    Adversarial,
    External,
}

impl fmt::Display for Archetype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Archetype::Honest => write!(f, "honest"),
            Archetype::Opportunistic => write!(f, "opportunistic"),
            Archetype::Deceptive => write!(f, "deceptive"),
            Archetype::Adversarial => write!(f, "adversarial"),
            Archetype::External => write!(f, "external"),
        }
    }
}

/// Lifecycle state derived from the ledger record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Active,
    Frozen,
    Quarantined,
}

/// Mutable per-agent ledger record. Mutations flow exclusively through
/// [`crate::env::Environment`] transactions driven by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: AgentId,
    pub archetype: Archetype,
    /// Latent coordination group (shared by coordinating adversarials)
    pub group: Option<String>,
    pub reputation: f64,
    pub resources: f64,
    pub stake: f64,
    /// Epoch index before which the agent may not act
    pub frozen_until: Option<u64>,
    /// Quarantined agents observe but never act again this run
    pub quarantined: bool,
}

impl AgentRecord {
    /// Lifecycle state at the given epoch
    pub fn lifecycle(&self, epoch: u64) -> Lifecycle {
        if self.quarantined {
            Lifecycle::Quarantined
        } else if self.frozen_until.is_some_and(|until| epoch < until) {
            Lifecycle::Frozen
        } else {
            Lifecycle::Active
        }
    }

    pub fn is_active(&self, epoch: u64) -> bool {
        self.lifecycle(epoch) == Lifecycle::Active
    }
}

/// Agent decision, returned by a policy each turn.
///
/// `intent` is the initiator's latent cooperativeness in [-1, 1]; `gloss` in
/// [0, 1] is surface polish that inflates observables without moving the
/// latent value. Audits detect the difference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Post {
        content: String,
    },
    Reply {
        parent: u64,
        content: String,
    },
    Vote {
        post: u64,
        up: bool,
    },
    ClaimTask {
        task: TaskId,
    },
    SubmitWork {
        task: TaskId,
        effort: f64,
    },
    Verify {
        task: TaskId,
    },
    Collaborate {
        partner: AgentId,
        intent: f64,
        gloss: f64,
    },
    TradePropose {
        partner: AgentId,
        offer: f64,
        intent: f64,
        gloss: f64,
    },
    TradeAccept {
        interaction: InteractionId,
    },
    Pass,
}

impl Action {
    /// Short tag used in event payloads
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Post { .. } => "post",
            Action::Reply { .. } => "reply",
            Action::Vote { .. } => "vote",
            Action::ClaimTask { .. } => "claim_task",
            Action::SubmitWork { .. } => "submit_work",
            Action::Verify { .. } => "verify",
            Action::Collaborate { .. } => "collaborate",
            Action::TradePropose { .. } => "trade_propose",
            Action::TradeAccept { .. } => "trade_accept",
            Action::Pass => "pass",
        }
    }
}

/// Interaction flavor; determines the base action costs in the payoff formula
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    Collaboration,
    Trade,
    TaskWork,
}

impl InteractionKind {
    /// Base costs (initiator, counterparty) per resolved interaction
    pub fn costs(&self) -> (f64, f64) {
        match self {
            InteractionKind::Collaboration => (0.05, 0.05),
            InteractionKind::Trade => (0.02, 0.02),
            InteractionKind::TaskWork => (0.04, 0.01),
        }
    }
}

impl fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InteractionKind::Collaboration => write!(f, "collaboration"),
            InteractionKind::Trade => write!(f, "trade"),
            InteractionKind::TaskWork => write!(f, "task_work"),
        }
    }
}

/// Observable signals the proxy layer converts into a soft label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyObservables {
    /// Net task progress attributable to the interaction, in [-1, 1]
    pub task_progress_delta: f64,
    /// Number of rework cycles triggered
    pub rework_count: u32,
    /// Number of verifier rejections triggered
    pub verifier_rejections: u32,
    /// Net engagement shift, in [-1, 1]
    pub engagement_delta: f64,
}

/// Immutable record of a resolved (or rejected) interaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoftInteraction {
    pub id: InteractionId,
    pub epoch: u64,
    pub step: u64,
    pub initiator: AgentId,
    pub counterparty: AgentId,
    pub kind: InteractionKind,
    pub accepted: bool,
    /// Raw proxy score in [-1, 1]
    pub v_hat: f64,
    /// Soft label: probability the interaction is beneficial
    pub p: f64,
    pub observables: ProxyObservables,
    /// Latent value known to the sandbox; what audits reveal
    pub true_value: f64,
    pub audited: bool,
    /// `Some(true)` when an executed audit found divergence
    pub audit_verdict: Option<bool>,
    pub taxed_amount: f64,
    pub payoff_a: f64,
    pub payoff_b: f64,
}

impl SoftInteraction {
    /// Hard label derived from the latent value (1 = beneficial)
    pub fn hard_label(&self) -> f64 {
        if self.true_value > 0.0 {
            1.0
        } else {
            0.0
        }
    }
}

/// Feedback handed back to a policy after its action is executed
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    /// Action executed; no interaction involved
    Executed,
    /// An interaction the agent took part in was resolved
    InteractionResolved {
        id: InteractionId,
        with: AgentId,
        accepted: bool,
        p: f64,
        payoff: f64,
    },
    /// Action failed with a transient reason and was converted to a pass
    Failed { reason: crate::error::TxError },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interaction_id_ordering_matches_mint_order() {
        let a = InteractionId::from_counter(2);
        let b = InteractionId::from_counter(10);
        assert!(a < b);
    }

    #[test]
    fn test_lifecycle_from_record() {
        let mut record = AgentRecord {
            id: AgentId::new("a"),
            archetype: Archetype::Honest,
            group: None,
            reputation: 0.5,
            resources: 10.0,
            stake: 0.0,
            frozen_until: None,
            quarantined: false,
        };
        assert_eq!(record.lifecycle(0), Lifecycle::Active);

        record.frozen_until = Some(3);
        assert_eq!(record.lifecycle(2), Lifecycle::Frozen);
        assert_eq!(record.lifecycle(3), Lifecycle::Active);

        record.quarantined = true;
        assert_eq!(record.lifecycle(3), Lifecycle::Quarantined);
    }

    #[test]
    fn test_action_kind_tags() {
        let act = Action::Collaborate {
            partner: AgentId::new("b"),
            intent: 0.5,
            gloss: 0.0,
        };
        assert_eq!(act.kind(), "collaborate");
        assert_eq!(Action::Pass.kind(), "pass");
    }

    #[test]
    fn test_hard_label_sign() {
        let ix = SoftInteraction {
            id: InteractionId::from_counter(0),
            epoch: 0,
            step: 0,
            initiator: AgentId::new("a"),
            counterparty: AgentId::new("b"),
            kind: InteractionKind::Collaboration,
            accepted: true,
            v_hat: -0.4,
            p: 0.3,
            observables: ProxyObservables {
                task_progress_delta: -0.4,
                rework_count: 1,
                verifier_rejections: 0,
                engagement_delta: -0.2,
            },
            true_value: -0.4,
            audited: false,
            audit_verdict: None,
            taxed_amount: 0.0,
            payoff_a: 0.0,
            payoff_b: 0.0,
        };
        assert_eq!(ix.hard_label(), 0.0);
    }
}

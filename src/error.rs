//! Error taxonomy for the kernel
//!
//! Fatal errors ([`KernelError`]) abort the run; transient failures
//! ([`TxError`]) are logged, converted to a pass, and never unwind.

use crate::types::{AgentId, InteractionId, TaskId};
use thiserror::Error;

/// Result type alias for kernel operations
pub type KernelResult<T> = Result<T, KernelError>;

/// Fatal kernel errors
#[derive(Error, Debug)]
pub enum KernelError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid payoff configuration: {0}")]
    InvalidPayoffConfig(String),

    #[error("State invariant violated: {0}")]
    State(String),

    #[error("External agent error: {0}")]
    ExternalAgent(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl KernelError {
    /// Fatal errors abort the run with a terminator event
    pub fn is_fatal(&self) -> bool {
        !matches!(self, KernelError::ExternalAgent(_))
    }
}

/// Typed reasons a transaction can fail. Always local: the orchestrator
/// logs the reason and converts the action to a pass.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TxError {
    #[error("Rate limit exceeded for {agent}: {category}")]
    RateLimited { agent: AgentId, category: String },

    #[error("Agent {0} is frozen")]
    AgentFrozen(AgentId),

    #[error("Agent {0} is quarantined")]
    AgentQuarantined(AgentId),

    #[error("Agent {agent} stake {stake} below requirement {required}")]
    InsufficientStake {
        agent: AgentId,
        stake: f64,
        required: f64,
    },

    #[error("Unknown agent: {0}")]
    UnknownAgent(AgentId),

    #[error("Unknown task: {0}")]
    UnknownTask(TaskId),

    #[error("Unknown interaction: {0}")]
    UnknownInteraction(InteractionId),

    #[error("Unknown post: {0}")]
    UnknownPost(u64),

    #[error("Task {0} already claimed")]
    TaskAlreadyClaimed(TaskId),

    #[error("Agent {agent} is not the claimant of task {task}")]
    NotClaimant { agent: AgentId, task: TaskId },

    #[error("Task {0} has no submission to verify")]
    NothingToVerify(TaskId),

    #[error("Task {0} already verified")]
    AlreadyVerified(TaskId),

    #[error("Agent {0} cannot interact with itself")]
    SelfInteraction(AgentId),

    #[error("Agent {agent} already voted on post {post}")]
    DuplicateVote { agent: AgentId, post: u64 },
}

//! SWARM simulation kernel
//!
//! A deterministic, seeded, epoch-stepped orchestrator for multi-agent
//! AI-safety experiments. The kernel drives a heterogeneous agent population
//! through interactions, derives soft probabilistic labels from observable
//! signals, applies a soft payoff engine and a governance layer (taxes,
//! reputation decay, audits, circuit breakers, staking, collusion
//! detection), appends every transition to a replayable event log, and emits
//! per-epoch metrics.
//!
//! Scenario loading, CLIs, network bridges, and dashboards live with
//! external collaborators: the kernel consumes a validated
//! [`config::ScenarioConfig`] and yields an [`metrics::EpochMetrics`] stream
//! plus the event log.
//!
//! ```no_run
//! use swarm_kernel::config::{AgentGroupConfig, ScenarioConfig};
//! use swarm_kernel::orchestrator::Orchestrator;
//! use swarm_kernel::types::Archetype;
//!
//! let mut config = ScenarioConfig::minimal("baseline", 42);
//! config.n_epochs = 3;
//! config.steps_per_epoch = 5;
//! config.agents = vec![AgentGroupConfig {
//!     archetype: Archetype::Honest,
//!     count: 3,
//!     params: Default::default(),
//! }];
//!
//! let report = Orchestrator::new(config)?.run()?;
//! for epoch in &report.metrics {
//!     println!("epoch {}: toxicity {:.3}", epoch.epoch, epoch.toxicity_rate);
//! }
//! # Ok::<(), swarm_kernel::error::KernelError>(())
//! ```

pub mod agents;
pub mod config;
pub mod env;
pub mod error;
pub mod events;
pub mod governance;
pub mod metrics;
pub mod orchestrator;
pub mod payoff;
pub mod persist;
pub mod proxy;
pub mod rng;
pub mod types;

pub use config::{GovernanceConfig, PayoffConfig, ScenarioConfig};
pub use error::{KernelError, KernelResult, TxError};
pub use events::{Event, EventKind, EventLog};
pub use metrics::EpochMetrics;
pub use orchestrator::{CancelHandle, Orchestrator, RunManifest, RunReport, RunStatus};
pub use rng::KernelRng;
pub use types::{Action, AgentId, Archetype, SoftInteraction};

use tracing_subscriber::EnvFilter;

/// Initialize tracing for binaries and experiments embedding the kernel.
/// Filter via `RUST_LOG`, e.g. `RUST_LOG=swarm_kernel=debug`.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .init();
}

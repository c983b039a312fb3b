//! Soft payoff engine
//!
//! Pure function of a resolved interaction, the payoff parameters, and the
//! two parties' reputations. No side effects; the orchestrator applies the
//! returned deltas transactionally.

use crate::config::PayoffConfig;
use crate::types::SoftInteraction;

/// Compute `(payoff_initiator, payoff_counterparty)` for a resolved
/// interaction.
///
/// For accepted interactions:
///
/// ```text
/// S_soft = p * s_plus - (1 - p) * s_minus
/// E_soft = (1 - p) * h
/// pi_a = theta * S_soft - tau - c_a - rho_a * E_soft + w_rep * r_a
/// pi_b = (1 - theta) * S_soft + tau - c_b - rho_b * E_soft + w_rep * r_b
/// ```
///
/// Rejected interactions yield `(0, 0)`. Base costs `c_a`/`c_b` come from the
/// interaction kind. Output is finite for bounded inputs.
pub fn compute_payoffs(
    interaction: &SoftInteraction,
    config: &PayoffConfig,
    reputation_a: f64,
    reputation_b: f64,
) -> (f64, f64) {
    if !interaction.accepted {
        return (0.0, 0.0);
    }

    let p = interaction.p;
    let s_soft = p * config.s_plus - (1.0 - p) * config.s_minus;
    let e_soft = (1.0 - p) * config.h;
    let (c_a, c_b) = interaction.kind.costs();

    let pi_a = config.theta * s_soft - config.tau - c_a - config.rho_a * e_soft
        + config.w_rep * reputation_a;
    let pi_b = (1.0 - config.theta) * s_soft + config.tau - c_b - config.rho_b * e_soft
        + config.w_rep * reputation_b;

    (pi_a, pi_b)
}

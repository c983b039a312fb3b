//! Per-epoch metrics
//!
//! Pure functions of the resolved-interaction set and the agent ledger.
//! The same numbers are recomputable from a persisted event log, which the
//! replay tests rely on.

use crate::types::{AgentId, SoftInteraction};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Calibration bins for the expected calibration error
const ECE_BINS: usize = 10;

/// Snapshot emitted once per epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: u64,
    pub interactions_proposed: u64,
    pub accepted: u64,
    pub rejected: u64,
    /// E[1 - p] over accepted interactions
    pub toxicity_rate: f64,
    /// E[p | accepted] - E[p | rejected]; negative signals adverse selection
    pub quality_gap: f64,
    /// E[pi | accepted] - E[pi] over all resolved interactions
    pub conditional_loss: f64,
    pub mean_p: f64,
    pub var_p: f64,
    /// Mean squared gap between p and the hard label
    pub brier: f64,
    /// Expected calibration error over equal-width bins of p
    pub ece: f64,
    /// Sum of applied interaction payoffs, post tax
    pub total_welfare: f64,
    /// Gini coefficient over per-agent payoff totals
    pub gini_payoffs: f64,
    pub frozen_agents: u64,
    pub flagged_pairs: u64,
}

impl EpochMetrics {
    /// All-zero metrics for an epoch with no interactions
    pub fn empty(epoch: u64) -> Self {
        Self {
            epoch,
            interactions_proposed: 0,
            accepted: 0,
            rejected: 0,
            toxicity_rate: 0.0,
            quality_gap: 0.0,
            conditional_loss: 0.0,
            mean_p: 0.0,
            var_p: 0.0,
            brier: 0.0,
            ece: 0.0,
            total_welfare: 0.0,
            gini_payoffs: 0.0,
            frozen_agents: 0,
            flagged_pairs: 0,
        }
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let mut sum = 0.0;
    let mut n = 0usize;
    for v in values {
        sum += v;
        n += 1;
    }
    if n == 0 {
        None
    } else {
        Some(sum / n as f64)
    }
}

/// Gini coefficient; zero when the mean is non-positive or the set is empty
pub fn gini(values: &[f64]) -> f64 {
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    let mu = values.iter().sum::<f64>() / n as f64;
    if mu <= 0.0 {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    // G = (2 * sum_i i*x_i) / (n * sum x) - (n + 1) / n, with 1-based i
    let weighted: f64 = sorted
        .iter()
        .enumerate()
        .map(|(i, x)| (i as f64 + 1.0) * x)
        .sum();
    let total: f64 = sorted.iter().sum();
    (2.0 * weighted) / (n as f64 * total) - (n as f64 + 1.0) / n as f64
}

/// Expected calibration error over equal-width p bins
pub fn expected_calibration_error(interactions: &[&SoftInteraction]) -> f64 {
    if interactions.is_empty() {
        return 0.0;
    }
    let mut bin_conf = vec![0.0f64; ECE_BINS];
    let mut bin_acc = vec![0.0f64; ECE_BINS];
    let mut bin_count = vec![0usize; ECE_BINS];
    for ix in interactions {
        let bin = ((ix.p * ECE_BINS as f64) as usize).min(ECE_BINS - 1);
        bin_conf[bin] += ix.p;
        bin_acc[bin] += ix.hard_label();
        bin_count[bin] += 1;
    }
    let total = interactions.len() as f64;
    let mut ece = 0.0;
    for bin in 0..ECE_BINS {
        if bin_count[bin] == 0 {
            continue;
        }
        let n = bin_count[bin] as f64;
        ece += (n / total) * ((bin_acc[bin] / n) - (bin_conf[bin] / n)).abs();
    }
    ece
}

/// Incoherence `I = D / (E + eps)`: Fisher dispersion of a statistic across
/// replays over its mean absolute error against a benchmark. Computable
/// post-hoc over any set of per-seed replay values.
pub fn incoherence(replay_values: &[f64], benchmark: f64) -> f64 {
    const EPS: f64 = 1e-9;
    let n = replay_values.len();
    if n == 0 {
        return 0.0;
    }
    let m = replay_values.iter().sum::<f64>() / n as f64;
    let variance = replay_values
        .iter()
        .map(|v| {
            let d = v - m;
            d * d
        })
        .sum::<f64>()
        / n as f64;
    let dispersion = if m.abs() < EPS { 0.0 } else { variance / m.abs() };
    let error = replay_values
        .iter()
        .map(|v| (v - benchmark).abs())
        .sum::<f64>()
        / n as f64;
    dispersion / (error + EPS)
}

/// Compute the full metrics snapshot for one epoch
pub fn compute_epoch_metrics(
    epoch: u64,
    interactions: &[&SoftInteraction],
    interactions_proposed: u64,
    frozen_agents: u64,
    flagged_pairs: u64,
) -> EpochMetrics {
    if interactions.is_empty() {
        let mut metrics = EpochMetrics::empty(epoch);
        metrics.interactions_proposed = interactions_proposed;
        metrics.frozen_agents = frozen_agents;
        metrics.flagged_pairs = flagged_pairs;
        return metrics;
    }

    let accepted: Vec<&&SoftInteraction> =
        interactions.iter().filter(|ix| ix.accepted).collect();
    let rejected: Vec<&&SoftInteraction> =
        interactions.iter().filter(|ix| !ix.accepted).collect();

    let toxicity_rate = mean(accepted.iter().map(|ix| 1.0 - ix.p)).unwrap_or(0.0);

    let quality_gap = match (
        mean(accepted.iter().map(|ix| ix.p)),
        mean(rejected.iter().map(|ix| ix.p)),
    ) {
        (Some(acc), Some(rej)) => acc - rej,
        _ => 0.0,
    };

    let joint = |ix: &&&SoftInteraction| ix.payoff_a + ix.payoff_b;
    let mean_all_payoff = mean(interactions.iter().map(|ix| ix.payoff_a + ix.payoff_b))
        .unwrap_or(0.0);
    let conditional_loss = mean(accepted.iter().map(joint))
        .map(|acc| acc - mean_all_payoff)
        .unwrap_or(0.0);

    let mean_p = mean(interactions.iter().map(|ix| ix.p)).unwrap_or(0.0);
    let var_p = mean(interactions.iter().map(|ix| {
        let d = ix.p - mean_p;
        d * d
    }))
    .unwrap_or(0.0);

    let brier = mean(
        interactions
            .iter()
            .map(|ix| (ix.p - ix.hard_label()).powi(2)),
    )
    .unwrap_or(0.0);

    let ece = expected_calibration_error(interactions);

    let total_welfare: f64 = accepted.iter().map(|ix| ix.payoff_a + ix.payoff_b).sum();

    let mut per_agent: BTreeMap<AgentId, f64> = BTreeMap::new();
    for ix in &accepted {
        *per_agent.entry(ix.initiator.clone()).or_default() += ix.payoff_a;
        *per_agent.entry(ix.counterparty.clone()).or_default() += ix.payoff_b;
    }
    let payoff_values: Vec<f64> = per_agent.values().copied().collect();
    let gini_payoffs = gini(&payoff_values);

    EpochMetrics {
        epoch,
        interactions_proposed,
        accepted: accepted.len() as u64,
        rejected: rejected.len() as u64,
        toxicity_rate,
        quality_gap,
        conditional_loss,
        mean_p,
        var_p,
        brier,
        ece,
        total_welfare,
        gini_payoffs,
        frozen_agents,
        flagged_pairs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InteractionId, InteractionKind, ProxyObservables};

    fn interaction(
        n: u64,
        accepted: bool,
        p: f64,
        true_value: f64,
        payoff_a: f64,
        payoff_b: f64,
    ) -> SoftInteraction {
        SoftInteraction {
            id: InteractionId::from_counter(n),
            epoch: 0,
            step: 0,
            initiator: AgentId::new("a"),
            counterparty: AgentId::new("b"),
            kind: InteractionKind::Collaboration,
            accepted,
            v_hat: 0.0,
            p,
            observables: ProxyObservables {
                task_progress_delta: 0.0,
                rework_count: 0,
                verifier_rejections: 0,
                engagement_delta: 0.0,
            },
            true_value,
            audited: false,
            audit_verdict: None,
            taxed_amount: 0.0,
            payoff_a,
            payoff_b,
        }
    }

    #[test]
    fn test_empty_epoch_all_zero() {
        let metrics = compute_epoch_metrics(3, &[], 0, 1, 0);
        assert_eq!(metrics.epoch, 3);
        assert_eq!(metrics.accepted, 0);
        assert_eq!(metrics.toxicity_rate, 0.0);
        assert_eq!(metrics.frozen_agents, 1);
    }

    #[test]
    fn test_toxicity_over_accepted_only() {
        let a = interaction(0, true, 0.9, 0.8, 0.5, 0.5);
        let b = interaction(1, true, 0.7, 0.4, 0.2, 0.2);
        let c = interaction(2, false, 0.1, -0.5, 0.0, 0.0);
        let metrics = compute_epoch_metrics(0, &[&a, &b, &c], 3, 0, 0);
        assert!((metrics.toxicity_rate - 0.2).abs() < 1e-12);
        assert_eq!(metrics.accepted, 2);
        assert_eq!(metrics.rejected, 1);
    }

    #[test]
    fn test_quality_gap_zero_when_bucket_empty() {
        let a = interaction(0, true, 0.9, 0.8, 0.5, 0.5);
        let metrics = compute_epoch_metrics(0, &[&a], 1, 0, 0);
        assert_eq!(metrics.quality_gap, 0.0);
    }

    #[test]
    fn test_quality_gap_sign() {
        // Accepted worse than rejected: adverse selection
        let a = interaction(0, true, 0.3, -0.2, -0.1, -0.1);
        let b = interaction(1, false, 0.9, 0.8, 0.0, 0.0);
        let metrics = compute_epoch_metrics(0, &[&a, &b], 2, 0, 0);
        assert!(metrics.quality_gap < 0.0);
    }

    #[test]
    fn test_brier_perfect_and_worst() {
        let perfect = interaction(0, true, 1.0, 0.9, 0.5, 0.5);
        let metrics = compute_epoch_metrics(0, &[&perfect], 1, 0, 0);
        assert!(metrics.brier < 1e-12);

        let inverted = interaction(1, true, 1.0, -0.9, 0.5, 0.5);
        let metrics = compute_epoch_metrics(0, &[&inverted], 1, 0, 0);
        assert!((metrics.brier - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_gini_extremes() {
        assert_eq!(gini(&[]), 0.0);
        assert!(gini(&[1.0, 1.0, 1.0, 1.0]).abs() < 1e-12);
        // One agent holding everything approaches (n-1)/n
        let g = gini(&[0.0, 0.0, 0.0, 10.0]);
        assert!((g - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_ece_well_calibrated_mix() {
        // p = 0.75 bucket with 3 of 4 beneficial: perfectly calibrated
        let ixs = [
            interaction(0, true, 0.75, 0.5, 0.1, 0.1),
            interaction(1, true, 0.75, 0.5, 0.1, 0.1),
            interaction(2, true, 0.75, 0.5, 0.1, 0.1),
            interaction(3, true, 0.75, -0.5, 0.1, 0.1),
        ];
        let refs: Vec<&SoftInteraction> = ixs.iter().collect();
        assert!(expected_calibration_error(&refs) < 1e-12);
    }

    #[test]
    fn test_incoherence_consistent_replays() {
        // Identical replays: zero dispersion regardless of benchmark error
        let i = incoherence(&[0.4, 0.4, 0.4], 0.2);
        assert!(i.abs() < 1e-6);

        // Scattered replays near the benchmark blow up
        let scattered = incoherence(&[0.1, 0.9, 0.5], 0.5);
        assert!(scattered > i);
    }

    #[test]
    fn test_welfare_sums_accepted_payoffs() {
        let a = interaction(0, true, 0.9, 0.8, 0.4, 0.3);
        let b = interaction(1, false, 0.2, -0.1, 0.0, 0.0);
        let metrics = compute_epoch_metrics(0, &[&a, &b], 2, 0, 0);
        assert!((metrics.total_welfare - 0.7).abs() < 1e-12);
    }
}

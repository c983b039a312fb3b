//! Pair-correlation collusion detection
//!
//! Tracks, per unordered agent pair, the timeline of mutual positive events
//! (accepted high-p interactions, upvotes) and the directed
//! interaction-outcome vectors. A pair is flagged when either branch fires:
//!
//! - **Frequency**: positive co-events inside the sliding window exceed the
//!   population mean by more than two standard deviations.
//! - **Correlation**: Pearson correlation between the pair's two directed
//!   outcome vectors exceeds the configured threshold.
//!
//! The branches are computed independently and OR-combined, so ordinary
//! cooperation (frequent but uncorrelated, or correlated but rare) does not
//! by itself trip both population baselines.

use crate::types::AgentId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Canonical unordered pair key
fn pair_key(a: &AgentId, b: &AgentId) -> (AgentId, AgentId) {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

#[derive(Debug, Default)]
struct PairRecord {
    /// Global steps at which a mutual positive event occurred
    positive_steps: VecDeque<u64>,
    /// Outcomes of interactions initiated by the lexicographically lower id
    outcomes_fwd: VecDeque<f64>,
    /// Outcomes of interactions initiated by the higher id
    outcomes_rev: VecDeque<f64>,
}

/// One flagged pair with the evidence that fired
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairFlag {
    pub a: AgentId,
    pub b: AgentId,
    pub positive_count: usize,
    pub baseline_mean: f64,
    pub baseline_std: f64,
    pub correlation: Option<f64>,
    pub by_frequency: bool,
    pub by_correlation: bool,
}

/// Sliding-window pair statistics
#[derive(Debug)]
pub struct PairTracker {
    /// Window size, in global steps for the frequency branch and in samples
    /// for the outcome vectors
    window: u64,
    pairs: BTreeMap<(AgentId, AgentId), PairRecord>,
}

impl PairTracker {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1) as u64,
            pairs: BTreeMap::new(),
        }
    }

    /// Record a resolved interaction between `initiator` and `counterparty`
    pub fn record_interaction(
        &mut self,
        initiator: &AgentId,
        counterparty: &AgentId,
        global_step: u64,
        accepted: bool,
        p: f64,
    ) {
        let key = pair_key(initiator, counterparty);
        let forward = *initiator == key.0;
        let record = self.pairs.entry(key).or_default();
        if accepted && p >= 0.5 {
            record.positive_steps.push_back(global_step);
        }
        let outcomes = if forward {
            &mut record.outcomes_fwd
        } else {
            &mut record.outcomes_rev
        };
        outcomes.push_back(p);
        if outcomes.len() as u64 > self.window {
            outcomes.pop_front();
        }
    }

    /// Record a vote; upvotes count as mutual positive events
    pub fn record_vote(&mut self, voter: &AgentId, author: &AgentId, global_step: u64, up: bool) {
        if !up {
            return;
        }
        let key = pair_key(voter, author);
        self.pairs
            .entry(key)
            .or_default()
            .positive_steps
            .push_back(global_step);
    }

    fn prune(&mut self, now: u64) {
        let horizon = now.saturating_sub(self.window);
        for record in self.pairs.values_mut() {
            while record
                .positive_steps
                .front()
                .is_some_and(|&s| s < horizon)
            {
                record.positive_steps.pop_front();
            }
        }
    }

    /// Evaluate both branches over the current window
    pub fn sweep(
        &mut self,
        now: u64,
        correlation_threshold: f64,
        min_samples: usize,
    ) -> Vec<PairFlag> {
        self.prune(now);
        if self.pairs.is_empty() {
            return Vec::new();
        }

        let counts: Vec<usize> = self
            .pairs
            .values()
            .map(|r| r.positive_steps.len())
            .collect();
        let n = counts.len() as f64;
        let mean = counts.iter().sum::<usize>() as f64 / n;
        let variance = counts
            .iter()
            .map(|&c| {
                let d = c as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / n;
        let std = variance.sqrt();

        let mut flags = Vec::new();
        for (key, record) in &self.pairs {
            let count = record.positive_steps.len();
            let by_frequency = count >= min_samples && (count as f64) > mean + 2.0 * std;

            let len = record.outcomes_fwd.len().min(record.outcomes_rev.len());
            let correlation = if len >= min_samples {
                let fwd: Vec<f64> = record
                    .outcomes_fwd
                    .iter()
                    .rev()
                    .take(len)
                    .rev()
                    .copied()
                    .collect();
                let rev: Vec<f64> = record
                    .outcomes_rev
                    .iter()
                    .rev()
                    .take(len)
                    .rev()
                    .copied()
                    .collect();
                pearson(&fwd, &rev)
            } else {
                None
            };
            let by_correlation = correlation.is_some_and(|r| r > correlation_threshold);

            if by_frequency || by_correlation {
                flags.push(PairFlag {
                    a: key.0.clone(),
                    b: key.1.clone(),
                    positive_count: count,
                    baseline_mean: mean,
                    baseline_std: std,
                    correlation,
                    by_frequency,
                    by_correlation,
                });
            }
        }
        flags
    }
}

/// Pearson correlation; `None` when either series has zero variance
pub fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return None;
    }
    let xs = &xs[..n];
    let ys = &ys[..n];
    let mx = xs.iter().sum::<f64>() / n as f64;
    let my = ys.iter().sum::<f64>() / n as f64;
    let mut cov = 0.0;
    let mut vx = 0.0;
    let mut vy = 0.0;
    for i in 0..n {
        let dx = xs[i] - mx;
        let dy = ys[i] - my;
        cov += dx * dy;
        vx += dx * dx;
        vy += dy * dy;
    }
    if vx <= f64::EPSILON || vy <= f64::EPSILON {
        return None;
    }
    Some(cov / (vx.sqrt() * vy.sqrt()))
}

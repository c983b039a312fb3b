//! Proxy layer: observable signals to soft probabilistic labels
//!
//! Pure and stateless. Observables are combined linearly under
//! [`ProxyWeights`], clamped to [-1, 1], then calibrated through the sigmoid
//! `p = 1 / (1 + exp(-k * v_hat))`.
//!
//! Count observables pass through the bounded decay
//! `f(n) = 1 - 2 * (1 - exp(-c * n))`, mapping 0 to +1 and large counts
//! toward -1. The decay constants are fixed (`C_REWORK`, `C_REJECTIONS`) and
//! must not change between versions: soft labels are recomputable from logged
//! observables only while these forms stay frozen.

use crate::types::ProxyObservables;
use serde::{Deserialize, Serialize};

/// Decay constant for rework counts
pub const C_REWORK: f64 = 0.5;
/// Decay constant for verifier rejections
pub const C_REJECTIONS: f64 = 0.7;

/// Linear weights and sigmoid steepness for the proxy score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ProxyWeights {
    pub w_progress: f64,
    pub w_rework: f64,
    pub w_rejections: f64,
    pub w_engagement: f64,
    /// Sigmoid steepness
    pub k: f64,
}

impl Default for ProxyWeights {
    fn default() -> Self {
        Self {
            w_progress: 0.4,
            w_rework: 0.2,
            w_rejections: 0.2,
            w_engagement: 0.2,
            k: 3.0,
        }
    }
}

impl ProxyWeights {
    pub fn validate(&self) -> Result<(), String> {
        let ws = [
            self.w_progress,
            self.w_rework,
            self.w_rejections,
            self.w_engagement,
        ];
        if ws.iter().any(|w| !w.is_finite()) {
            return Err("proxy weights must be finite".into());
        }
        if !self.k.is_finite() || self.k <= 0.0 {
            return Err(format!("sigmoid steepness k must be positive, got {}", self.k));
        }
        Ok(())
    }
}

/// Bounded decay for count observables: 0 maps to +1, large counts to -1
pub fn count_decay(count: u32, c: f64) -> f64 {
    1.0 - 2.0 * (1.0 - (-c * f64::from(count)).exp())
}

/// Feature vector (progress, rework, rejections, engagement), each in [-1, 1]
pub fn features(obs: &ProxyObservables) -> [f64; 4] {
    [
        obs.task_progress_delta.clamp(-1.0, 1.0),
        count_decay(obs.rework_count, C_REWORK),
        count_decay(obs.verifier_rejections, C_REJECTIONS),
        obs.engagement_delta.clamp(-1.0, 1.0),
    ]
}

/// Raw proxy score v_hat in [-1, 1]
pub fn raw_score(obs: &ProxyObservables, weights: &ProxyWeights) -> f64 {
    let [f_progress, f_rework, f_rejections, f_engagement] = features(obs);
    let v = weights.w_progress * f_progress
        + weights.w_rework * f_rework
        + weights.w_rejections * f_rejections
        + weights.w_engagement * f_engagement;
    v.clamp(-1.0, 1.0)
}

/// Calibrated sigmoid
pub fn sigmoid(k: f64, v: f64) -> f64 {
    1.0 / (1.0 + (-k * v).exp())
}

/// Inverse sigmoid for calibration; input is clamped away from {0, 1}
pub fn inverse_sigmoid(k: f64, p: f64) -> f64 {
    let p = p.clamp(1e-12, 1.0 - 1e-12);
    (p / (1.0 - p)).ln() / k
}

/// Full pipeline: observables to (v_hat, p)
pub fn soft_label(obs: &ProxyObservables, weights: &ProxyWeights) -> (f64, f64) {
    let v_hat = raw_score(obs, weights);
    (v_hat, sigmoid(weights.k, v_hat))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(progress: f64, rework: u32, rejections: u32, engagement: f64) -> ProxyObservables {
        ProxyObservables {
            task_progress_delta: progress,
            rework_count: rework,
            verifier_rejections: rejections,
            engagement_delta: engagement,
        }
    }

    #[test]
    fn test_count_decay_bounds() {
        assert_eq!(count_decay(0, C_REWORK), 1.0);
        assert!(count_decay(1, C_REWORK) < 1.0);
        assert!(count_decay(100, C_REWORK) > -1.0 - 1e-12);
        assert!(count_decay(100, C_REWORK) < -0.99);
    }

    #[test]
    fn test_raw_score_clamped() {
        let weights = ProxyWeights::default();
        let high = obs(1.0, 0, 0, 1.0);
        let low = obs(-1.0, 10, 10, -1.0);
        assert!(raw_score(&high, &weights) <= 1.0);
        assert!(raw_score(&low, &weights) >= -1.0);
    }

    #[test]
    fn test_sigmoid_midpoint_and_symmetry() {
        assert!((sigmoid(3.0, 0.0) - 0.5).abs() < 1e-12);
        let p = sigmoid(3.0, 0.7);
        let q = sigmoid(3.0, -0.7);
        assert!((p + q - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_inverse_round_trip() {
        for v in [-0.9, -0.3, 0.0, 0.4, 0.8] {
            let p = sigmoid(3.0, v);
            assert!((inverse_sigmoid(3.0, p) - v).abs() < 1e-9);
        }
    }

    #[test]
    fn test_large_k_approaches_step() {
        let weights = ProxyWeights {
            k: 1e6,
            ..Default::default()
        };
        let (_, p_pos) = soft_label(&obs(0.5, 0, 0, 0.5), &weights);
        let (_, p_neg) = soft_label(&obs(-0.5, 3, 3, -0.5), &weights);
        assert!(p_pos > 0.9999);
        assert!(p_neg < 0.0001);
    }

    #[test]
    fn test_soft_label_deterministic() {
        let weights = ProxyWeights::default();
        let o = obs(0.8, 0, 0, 0.64);
        let (v1, p1) = soft_label(&o, &weights);
        let (v2, p2) = soft_label(&o, &weights);
        assert_eq!(v1.to_bits(), v2.to_bits());
        assert_eq!(p1.to_bits(), p2.to_bits());
    }

    #[test]
    fn test_honest_profile_low_toxicity() {
        // A diligent profile must land well above the 0.9 band under defaults
        let weights = ProxyWeights::default();
        let (_, p) = soft_label(&obs(0.8, 0, 0, 0.64), &weights);
        assert!(p > 0.9, "p = {}", p);
    }

    #[test]
    fn test_validate_rejects_nan_weight() {
        let weights = ProxyWeights {
            w_progress: f64::NAN,
            ..Default::default()
        };
        assert!(weights.validate().is_err());

        let weights = ProxyWeights {
            k: 0.0,
            ..Default::default()
        };
        assert!(weights.validate().is_err());
    }
}

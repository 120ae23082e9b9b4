//! Fusion rules shared by the inference service: probability to direction,
//! risk buckets, anomaly damping and the weighted ensemble score.

use crate::domain::ml::signal::is_ml_indicator;
use crate::domain::ml::{Direction, RiskLevel, Signal};
use serde::{Deserialize, Serialize};

/// Component weights of the ensemble score.
///
/// Missing components (no active model) drop out and the remaining weights
/// are renormalised.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnsembleWeights {
    pub classic: f64,
    pub logreg: f64,
    pub xgboost: f64,
}

impl Default for EnsembleWeights {
    fn default() -> Self {
        Self {
            classic: 0.3,
            logreg: 0.35,
            xgboost: 0.35,
        }
    }
}

/// Weighted mean of the classic score and each model's `2p - 1`, in [-1, 1].
///
/// The classic score always participates; a model probability that is
/// `None` (no active model) is left out of both numerator and denominator.
pub fn combine_scores(
    weights: &EnsembleWeights,
    classic_score: f64,
    logreg_prob: Option<f64>,
    xgboost_prob: Option<f64>,
) -> f64 {
    let mut components = vec![(weights.classic.max(0.0), classic_score.clamp(-1.0, 1.0))];
    if let Some(p) = logreg_prob {
        components.push((weights.logreg.max(0.0), 2.0 * p.clamp(0.0, 1.0) - 1.0));
    }
    if let Some(p) = xgboost_prob {
        components.push((weights.xgboost.max(0.0), 2.0 * p.clamp(0.0, 1.0) - 1.0));
    }

    let total_weight: f64 = components.iter().map(|(w, _)| w).sum();
    if total_weight <= 0.0 {
        return 0.0;
    }
    let score = components.iter().map(|(w, s)| w * s).sum::<f64>() / total_weight;
    score.clamp(-1.0, 1.0)
}

/// Long at or above `long_threshold`, short at or below `short_threshold`
pub fn direction_from_prob(prob_up: f64, long_threshold: f64, short_threshold: f64) -> Direction {
    if prob_up >= long_threshold {
        Direction::Long
    } else if prob_up <= short_threshold {
        Direction::Short
    } else {
        Direction::Hold
    }
}

/// Direction of a fused score: the dead zone is `(-threshold, +threshold)`
pub fn ensemble_direction(score: f64, threshold: f64) -> Direction {
    let threshold = threshold.abs();
    if score >= threshold && score > 0.0 {
        Direction::Long
    } else if score <= -threshold && score < 0.0 {
        Direction::Short
    } else {
        Direction::Hold
    }
}

/// `|p - 0.5| * 2`
pub fn confidence_from_prob(prob_up: f64) -> f64 {
    ((prob_up.clamp(0.0, 1.0) - 0.5).abs() * 2.0).clamp(0.0, 1.0)
}

pub fn risk_from_confidence(confidence: f64) -> RiskLevel {
    let level = if confidence >= 0.80 {
        2
    } else if confidence >= 0.60 {
        3
    } else if confidence >= 0.40 {
        4
    } else {
        5
    };
    RiskLevel::clamped(level)
}

pub fn risk_from_anomaly(score: f64) -> RiskLevel {
    let level = if score >= 0.9 {
        2
    } else if score >= 0.75 {
        3
    } else if score >= 0.6 {
        4
    } else {
        5
    };
    RiskLevel::clamped(level)
}

/// `clamp(1 - damp_max * score, 0, 1)`
pub fn damp_factor(anomaly_score: f64, damp_max: f64) -> f64 {
    (1.0 - damp_max * anomaly_score).clamp(0.0, 1.0)
}

/// Weighted vote of classic (non-ML) signals in [-1, 1], 0 when none.
///
/// Each signal votes +1 long, -1 short, 0 hold with weight
/// `max((6 - risk) / 5, 0)`; votes are averaged over the matching signals.
pub fn classic_score(signals: &[Signal]) -> f64 {
    let votes: Vec<f64> = signals
        .iter()
        .filter(|s| !is_ml_indicator(&s.indicator))
        .map(|s| {
            let weight = ((6.0 - s.risk.value() as f64) / 5.0).max(0.0);
            s.direction.vote() * weight
        })
        .collect();

    if votes.is_empty() {
        return 0.0;
    }
    (votes.iter().sum::<f64>() / votes.len() as f64).clamp(-1.0, 1.0)
}

/// Round to 4 decimals for audit JSON
pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

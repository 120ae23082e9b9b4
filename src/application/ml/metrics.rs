//! Evaluation metrics for directional classifiers and anomaly score
//! distributions.

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Hold-out metrics persisted as a model version's `metrics_json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    pub auc: f64,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub brier: f64,
    pub test_count: usize,
    pub train_count: usize,
    pub validation_count: usize,
    pub positive_rate: f64,
}

/// Reference distribution of an anomaly detector's scores on its own
/// training set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyScoreMetrics {
    pub score_mean: f64,
    pub score_std: f64,
    pub score_p95: f64,
    pub train_count: usize,
}

/// Area under the ROC curve via the Mann–Whitney U statistic.
///
/// Tied probabilities share the average of the ranks they span. Returns 0.5
/// when every label belongs to the same class (or the input is empty).
pub fn compute_auc(probs: &[f64], labels: &[bool]) -> f64 {
    let n = probs.len().min(labels.len());
    let n_pos = labels[..n].iter().filter(|&&l| l).count();
    let n_neg = n - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return 0.5;
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| probs[a].total_cmp(&probs[b]));

    let mut ranks = vec![0.0; n];
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && probs[order[j + 1]] == probs[order[i]] {
            j += 1;
        }
        // positions i..=j are tied; ranks are 1-based
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = avg_rank;
        }
        i = j + 1;
    }

    let pos_rank_sum: f64 = (0..n).filter(|&k| labels[k]).map(|k| ranks[k]).sum();
    let n_pos_f = n_pos as f64;
    let u = pos_rank_sum - n_pos_f * (n_pos_f + 1.0) / 2.0;
    (u / (n_pos_f * n_neg as f64)).clamp(0.0, 1.0)
}

/// Metrics at a 0.5 decision threshold plus AUC and Brier score
pub fn compute_classification_metrics(probs: &[f64], labels: &[bool]) -> ClassificationMetrics {
    let n = probs.len().min(labels.len());
    let (mut tp, mut fp, mut tn, mut fn_) = (0usize, 0usize, 0usize, 0usize);
    let mut brier_sum = 0.0;

    for (&p, &label) in probs[..n].iter().zip(&labels[..n]) {
        let predicted = p >= 0.5;
        match (predicted, label) {
            (true, true) => tp += 1,
            (true, false) => fp += 1,
            (false, false) => tn += 1,
            (false, true) => fn_ += 1,
        }
        let target = if label { 1.0 } else { 0.0 };
        brier_sum += (p - target).powi(2);
    }

    let ratio = |num: usize, den: usize| if den > 0 { num as f64 / den as f64 } else { 0.0 };
    let precision = ratio(tp, tp + fp);
    let recall = ratio(tp, tp + fn_);
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };

    ClassificationMetrics {
        auc: compute_auc(&probs[..n], &labels[..n]),
        accuracy: ratio(tp + tn, n),
        precision,
        recall,
        f1,
        brier: if n > 0 { brier_sum / n as f64 } else { 0.0 },
        test_count: n,
        train_count: 0,
        validation_count: 0,
        positive_rate: ratio(tp + fn_, n),
    }
}

/// Nearest-rank percentile of an ascending-sorted slice (`pct` in 0..=100)
pub fn nearest_rank_percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    let idx = rank.clamp(1, sorted.len()) - 1;
    sorted[idx]
}

/// Mean, population std dev and p95 of scores clamped to [0, 1]
pub fn compute_anomaly_score_metrics(scores: &[f64]) -> AnomalyScoreMetrics {
    let mut clamped: Vec<f64> = scores
        .iter()
        .map(|s| if s.is_finite() { s.clamp(0.0, 1.0) } else { 0.0 })
        .collect();
    clamped.sort_by(|a, b| a.total_cmp(b));

    let (mean, std) = if clamped.is_empty() {
        (0.0, 0.0)
    } else {
        (clamped.iter().mean(), clamped.iter().population_std_dev())
    };

    AnomalyScoreMetrics {
        score_mean: mean,
        score_std: if std.is_finite() { std } else { 0.0 },
        score_p95: nearest_rank_percentile(&clamped, 95.0),
        train_count: clamped.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auc_single_class_is_half() {
        assert_eq!(compute_auc(&[0.1, 0.7, 0.9], &[true, true, true]), 0.5);
        assert_eq!(compute_auc(&[0.1, 0.7, 0.9], &[false, false, false]), 0.5);
        assert_eq!(compute_auc(&[], &[]), 0.5);
    }

    #[test]
    fn test_auc_perfect_and_inverted() {
        let probs = [0.1, 0.2, 0.8, 0.9];
        assert_eq!(compute_auc(&probs, &[false, false, true, true]), 1.0);
        assert_eq!(compute_auc(&probs, &[true, true, false, false]), 0.0);
    }

    #[test]
    fn test_auc_ties_are_averaged() {
        // all scores tied: every pair counts half
        let auc = compute_auc(&[0.5, 0.5, 0.5, 0.5], &[true, false, true, false]);
        assert!((auc - 0.5).abs() < 1e-12);

        // one positive tied with one negative, the other positive clearly ahead
        let auc = compute_auc(&[0.3, 0.6, 0.6, 0.9], &[false, false, true, true]);
        // pairs: (0.6+,0.3-)=1 (0.6+,0.6-)=0.5 (0.9+,*)=2 -> 3.5/4
        assert!((auc - 0.875).abs() < 1e-12);
    }

    #[test]
    fn test_auc_in_unit_interval() {
        let probs: Vec<f64> = (0..50).map(|i| ((i * 37) % 50) as f64 / 50.0).collect();
        let labels: Vec<bool> = (0..50).map(|i| i % 3 == 0).collect();
        let auc = compute_auc(&probs, &labels);
        assert!((0.0..=1.0).contains(&auc));
    }

    #[test]
    fn test_classification_metrics() {
        let probs = [0.9, 0.8, 0.3, 0.6, 0.2];
        let labels = [true, true, true, false, false];
        let m = compute_classification_metrics(&probs, &labels);

        // tp=2 fp=1 tn=1 fn=1
        assert_eq!(m.test_count, 5);
        assert!((m.accuracy - 0.6).abs() < 1e-12);
        assert!((m.precision - 2.0 / 3.0).abs() < 1e-12);
        assert!((m.recall - 2.0 / 3.0).abs() < 1e-12);
        assert!((m.f1 - 2.0 / 3.0).abs() < 1e-12);
        let brier = (0.01 + 0.04 + 0.49 + 0.36 + 0.04) / 5.0;
        assert!((m.brier - brier).abs() < 1e-12);
        assert!((m.positive_rate - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_metrics_without_positive_predictions() {
        let m = compute_classification_metrics(&[0.1, 0.2], &[true, false]);
        assert_eq!(m.precision, 0.0);
        assert_eq!(m.recall, 0.0);
        assert_eq!(m.f1, 0.0);
    }

    #[test]
    fn test_nearest_rank_percentile() {
        let sorted: Vec<f64> = (1..=20).map(|v| v as f64).collect();
        assert_eq!(nearest_rank_percentile(&sorted, 95.0), 19.0);
        assert_eq!(nearest_rank_percentile(&sorted, 100.0), 20.0);
        assert_eq!(nearest_rank_percentile(&sorted, 0.0), 1.0);
        assert_eq!(nearest_rank_percentile(&[], 95.0), 0.0);
    }

    #[test]
    fn test_anomaly_score_metrics_clamps() {
        let m = compute_anomaly_score_metrics(&[0.4, 0.6, 1.4, -0.2]);
        // clamped: 0.0, 0.4, 0.6, 1.0
        assert!((m.score_mean - 0.5).abs() < 1e-12);
        assert_eq!(m.score_p95, 1.0);
        assert_eq!(m.train_count, 4);
        assert!(m.score_std > 0.0);

        let empty = compute_anomaly_score_metrics(&[]);
        assert_eq!(empty.score_mean, 0.0);
        assert_eq!(empty.score_std, 0.0);
    }
}

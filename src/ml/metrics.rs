//! Evaluation metrics for held-out test slices.

use serde::{Deserialize, Serialize};

use crate::analytics::utility::{mean, stddev};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum TrainingMetrics {
    Regression(RegressionMetrics),
    Classification(ClassificationMetrics),
    Impact(ImpactMetrics),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionMetrics {
    pub rmse: f64,
    pub mae: f64,
    pub r2_score: f64,
    /// Percent; rows whose true value is zero are left out.
    pub mape: f64,
    pub test_samples: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cross_validation: Option<CrossValidation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossValidation {
    pub folds: usize,
    pub rmse_mean: f64,
    pub rmse_std: f64,
    pub mae_mean: f64,
    pub mae_std: f64,
    pub r2_mean: f64,
    pub r2_std: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub roc_auc: f64,
    pub pr_auc: f64,
    /// `[[tn, fp], [fn, tp]]`
    pub confusion_matrix: [[usize; 2]; 2],
    pub test_samples: usize,
    pub positive_samples: usize,
    pub negative_samples: usize,
    pub peak_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactMetrics {
    pub rmse: f64,
    pub mae: f64,
    pub r2_score: f64,
    pub correlation: f64,
    /// Share of test rows whose predicted impact band matches the true one.
    pub impact_accuracy: f64,
    pub test_samples: usize,
}

pub fn rmse(truth: &[f64], pred: &[f64]) -> f64 {
    if truth.is_empty() {
        return 0.0;
    }
    let sse: f64 = truth.iter().zip(pred).map(|(t, p)| (t - p).powi(2)).sum();
    (sse / truth.len() as f64).sqrt()
}

pub fn mae(truth: &[f64], pred: &[f64]) -> f64 {
    if truth.is_empty() {
        return 0.0;
    }
    truth.iter().zip(pred).map(|(t, p)| (t - p).abs()).sum::<f64>() / truth.len() as f64
}

/// Coefficient of determination. A constant target scores 1.0 when matched
/// exactly and 0.0 otherwise.
pub fn r2(truth: &[f64], pred: &[f64]) -> f64 {
    let m = mean(truth);
    let ss_tot: f64 = truth.iter().map(|t| (t - m).powi(2)).sum();
    let ss_res: f64 = truth.iter().zip(pred).map(|(t, p)| (t - p).powi(2)).sum();
    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

pub fn mape(truth: &[f64], pred: &[f64]) -> f64 {
    let errors: Vec<f64> = truth
        .iter()
        .zip(pred)
        .filter(|(t, _)| **t != 0.0)
        .map(|(t, p)| ((t - p) / t).abs())
        .collect();
    mean(&errors) * 100.0
}

/// Pearson correlation; 0.0 for fewer than two samples or zero variance.
pub fn pearson(a: &[f64], b: &[f64]) -> f64 {
    if a.len() < 2 || a.len() != b.len() {
        return 0.0;
    }
    let (ma, mb) = (mean(a), mean(b));
    let mut cov = 0.0;
    let mut va = 0.0;
    let mut vb = 0.0;
    for (x, y) in a.iter().zip(b) {
        cov += (x - ma) * (y - mb);
        va += (x - ma).powi(2);
        vb += (y - mb).powi(2);
    }
    if va == 0.0 || vb == 0.0 {
        return 0.0;
    }
    cov / (va.sqrt() * vb.sqrt())
}

pub fn regression(truth: &[f64], pred: &[f64]) -> RegressionMetrics {
    RegressionMetrics {
        rmse: rmse(truth, pred),
        mae: mae(truth, pred),
        r2_score: r2(truth, pred),
        mape: mape(truth, pred),
        test_samples: truth.len(),
        cross_validation: None,
    }
}

/// Folds `(rmse, mae, r2)` scores into mean and population std.
pub fn cross_validation(folds: &[(f64, f64, f64)]) -> CrossValidation {
    let rmses: Vec<f64> = folds.iter().map(|f| f.0).collect();
    let maes: Vec<f64> = folds.iter().map(|f| f.1).collect();
    let r2s: Vec<f64> = folds.iter().map(|f| f.2).collect();
    let (rm, mm, r2m) = (mean(&rmses), mean(&maes), mean(&r2s));
    CrossValidation {
        folds: folds.len(),
        rmse_mean: rm,
        rmse_std: stddev(&rmses, rm),
        mae_mean: mm,
        mae_std: stddev(&maes, mm),
        r2_mean: r2m,
        r2_std: stddev(&r2s, r2m),
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Binary metrics; `scores` are positive-class scores used for the AUCs.
pub fn classification(truth: &[i32], pred: &[i32], scores: &[f64]) -> ClassificationMetrics {
    let (mut tn, mut fp, mut fn_, mut tp) = (0usize, 0usize, 0usize, 0usize);
    for (t, p) in truth.iter().zip(pred) {
        match (*t == 1, *p == 1) {
            (false, false) => tn += 1,
            (false, true) => fp += 1,
            (true, false) => fn_ += 1,
            (true, true) => tp += 1,
        }
    }
    let precision = ratio(tp, tp + fp);
    let recall = ratio(tp, tp + fn_);
    let f1_score = if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    };
    let positives = tp + fn_;
    let negatives = tn + fp;
    let single_class = positives == 0 || negatives == 0;

    ClassificationMetrics {
        accuracy: ratio(tp + tn, truth.len()),
        precision,
        recall,
        f1_score,
        roc_auc: if single_class { 0.5 } else { roc_auc(truth, scores) },
        pr_auc: if single_class { 0.5 } else { average_precision(truth, scores) },
        confusion_matrix: [[tn, fp], [fn_, tp]],
        test_samples: truth.len(),
        positive_samples: positives,
        negative_samples: negatives,
        peak_ratio: ratio(positives, truth.len()),
    }
}

/// Mann-Whitney formulation with average ranks for tied scores.
fn roc_auc(truth: &[i32], scores: &[f64]) -> f64 {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut ranks = vec![0.0; scores.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = avg_rank;
        }
        i = j + 1;
    }

    let n_pos = truth.iter().filter(|t| **t == 1).count() as f64;
    let n_neg = truth.len() as f64 - n_pos;
    let pos_rank_sum: f64 = truth
        .iter()
        .zip(&ranks)
        .filter(|(t, _)| **t == 1)
        .map(|(_, r)| r)
        .sum();
    (pos_rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg)
}

/// Step-wise area under the precision-recall curve, one step per distinct
/// score threshold.
fn average_precision(truth: &[i32], scores: &[f64]) -> f64 {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
    let n_pos = truth.iter().filter(|t| **t == 1).count() as f64;

    let (mut tp, mut fp) = (0.0, 0.0);
    let mut prev_recall = 0.0;
    let mut ap = 0.0;
    let mut i = 0;
    while i < order.len() {
        let threshold = scores[order[i]];
        while i < order.len() && scores[order[i]] == threshold {
            if truth[order[i]] == 1 {
                tp += 1.0;
            } else {
                fp += 1.0;
            }
            i += 1;
        }
        let recall = tp / n_pos;
        let precision = tp / (tp + fp);
        ap += (recall - prev_recall) * precision;
        prev_recall = recall;
    }
    ap
}

/// Impact band of a score: +1 above 0.1, -1 below -0.1, otherwise 0.
pub fn impact_band(score: f64) -> i8 {
    if score > 0.1 {
        1
    } else if score < -0.1 {
        -1
    } else {
        0
    }
}

pub fn impact(truth: &[f64], pred: &[f64]) -> ImpactMetrics {
    let matches = truth
        .iter()
        .zip(pred)
        .filter(|(t, p)| impact_band(**t) == impact_band(**p))
        .count();
    ImpactMetrics {
        rmse: rmse(truth, pred),
        mae: mae(truth, pred),
        r2_score: r2(truth, pred),
        correlation: pearson(truth, pred),
        impact_accuracy: ratio(matches, truth.len()),
        test_samples: truth.len(),
    }
}

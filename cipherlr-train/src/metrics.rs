//! Plaintext loss and classification metrics.
//!
//! These run on decrypted weights and held-out data. They also serve as the
//! oracle the encrypted pipeline is compared against: [`plaintext_gradient`]
//! is the exact gradient and [`approximate_gradient`] the one the encrypted
//! engine computes with its Chebyshev sigmoid.
//!
//! Degenerate inputs have defined values rather than errors: precision,
//! recall and F1 are 0 on a zero denominator, and ROC-AUC is 0.5 when only
//! one class is present.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrainError};
use crate::matrix::Mat;
use crate::sigmoid::{sigmoid, ChebyshevSeries};

/// Probabilities are clamped to [ε, 1 − ε] inside the log.
pub const LOSS_EPSILON: f64 = 1e-15;

pub const DEFAULT_THRESHOLD: f64 = 0.5;

/// Evaluation summary of one weight vector.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub roc_auc: f64,
    pub loss: f64,
}

impl fmt::Display for PerformanceMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "accuracy {:.4}  precision {:.4}  recall {:.4}  f1 {:.4}  auc {:.4}  loss {:.6}",
            self.accuracy, self.precision, self.recall, self.f1_score, self.roc_auc, self.loss
        )
    }
}

fn check_len(context: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(TrainError::DimensionMismatch {
            context,
            expected,
            actual,
        });
    }
    Ok(())
}

fn check_weights(weights: &Mat, x: &Mat) -> Result<()> {
    check_len("weights: rows", x.ncols(), weights.nrows())?;
    check_len("weights: columns", 1, weights.ncols())
}

/// σ(X·w), one probability per row.
pub fn compute_probabilities(x: &Mat, weights: &Mat) -> Result<Mat> {
    check_weights(weights, x)?;
    Ok(x.dot(weights).mapv(sigmoid))
}

/// 1 where `p ≥ threshold`, else 0.
pub fn make_predictions(probabilities: &Mat, threshold: f64) -> Mat {
    probabilities.mapv(|p| if p >= threshold { 1.0 } else { 0.0 })
}

/// Mean binary cross-entropy of `weights` on (X, y).
pub fn compute_loss(weights: &Mat, x: &Mat, y: &Mat) -> Result<f64> {
    let probs = compute_probabilities(x, weights)?;
    check_len("compute_loss: labels", x.nrows(), y.nrows())?;
    if y.is_empty() {
        return Ok(0.0);
    }
    let total: f64 = probs
        .iter()
        .zip(y.iter())
        .map(|(&p, &t)| {
            let p = p.clamp(LOSS_EPSILON, 1.0 - LOSS_EPSILON);
            -(t * p.ln() + (1.0 - t) * (1.0 - p).ln())
        })
        .sum();
    Ok(total / y.len() as f64)
}

#[derive(Default)]
struct Confusion {
    tp: usize,
    fp: usize,
    tn: usize,
    fn_: usize,
}

fn is_positive(v: f64) -> bool {
    v > 0.5
}

fn confusion(y_true: &Mat, y_pred: &Mat) -> Result<Confusion> {
    check_len("metrics: predictions", y_true.len(), y_pred.len())?;
    let mut c = Confusion::default();
    for (&t, &p) in y_true.iter().zip(y_pred.iter()) {
        match (is_positive(t), is_positive(p)) {
            (true, true) => c.tp += 1,
            (false, true) => c.fp += 1,
            (false, false) => c.tn += 1,
            (true, false) => c.fn_ += 1,
        }
    }
    Ok(c)
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

pub fn compute_accuracy(y_true: &Mat, y_pred: &Mat) -> Result<f64> {
    let c = confusion(y_true, y_pred)?;
    Ok(ratio(c.tp + c.tn, y_true.len()))
}

pub fn compute_precision(y_true: &Mat, y_pred: &Mat) -> Result<f64> {
    let c = confusion(y_true, y_pred)?;
    Ok(ratio(c.tp, c.tp + c.fp))
}

pub fn compute_recall(y_true: &Mat, y_pred: &Mat) -> Result<f64> {
    let c = confusion(y_true, y_pred)?;
    Ok(ratio(c.tp, c.tp + c.fn_))
}

pub fn compute_f1_score(y_true: &Mat, y_pred: &Mat) -> Result<f64> {
    let precision = compute_precision(y_true, y_pred)?;
    let recall = compute_recall(y_true, y_pred)?;
    if precision + recall == 0.0 {
        return Ok(0.0);
    }
    Ok(2.0 * precision * recall / (precision + recall))
}

/// Area under the ROC curve via the Mann-Whitney rank statistic. Tied
/// scores share their average rank.
pub fn compute_roc_auc(y_true: &Mat, scores: &Mat) -> Result<f64> {
    check_len("compute_roc_auc: scores", y_true.len(), scores.len())?;
    let mut order: Vec<(f64, bool)> = scores
        .iter()
        .zip(y_true.iter())
        .map(|(&s, &t)| (s, is_positive(t)))
        .collect();
    let positives = order.iter().filter(|(_, p)| *p).count();
    let negatives = order.len() - positives;
    if positives == 0 || negatives == 0 {
        return Ok(0.5);
    }
    order.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut rank_sum = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && order[j + 1].0 == order[i].0 {
            j += 1;
        }
        // ranks are 1-based: positions i..=j share (i + j)/2 + 1
        let rank = (i + j) as f64 / 2.0 + 1.0;
        let tied_positives = order[i..=j].iter().filter(|(_, p)| *p).count();
        rank_sum += rank * tied_positives as f64;
        i = j + 1;
    }
    let p = positives as f64;
    Ok((rank_sum - p * (p + 1.0) / 2.0) / (p * negatives as f64))
}

pub fn compute_all_metrics(
    weights: &Mat,
    x: &Mat,
    y: &Mat,
    threshold: f64,
) -> Result<PerformanceMetrics> {
    let probs = compute_probabilities(x, weights)?;
    check_len("compute_all_metrics: labels", x.nrows(), y.nrows())?;
    let preds = make_predictions(&probs, threshold);
    Ok(PerformanceMetrics {
        accuracy: compute_accuracy(y, &preds)?,
        precision: compute_precision(y, &preds)?,
        recall: compute_recall(y, &preds)?,
        f1_score: compute_f1_score(y, &preds)?,
        roc_auc: compute_roc_auc(y, &probs)?,
        loss: compute_loss(weights, x, y)?,
    })
}

/// Exact logistic-regression gradient Xᵗ(σ(Xθ) − y), not divided by n.
pub fn plaintext_gradient(weights: &Mat, x: &Mat, y: &Mat) -> Result<Mat> {
    let probs = compute_probabilities(x, weights)?;
    check_len("plaintext_gradient: labels", x.nrows(), y.nrows())?;
    Ok(x.t().dot(&(probs - y)))
}

/// The gradient with σ replaced by `series`, as the encrypted engine
/// computes it.
pub fn approximate_gradient(
    weights: &Mat,
    x: &Mat,
    y: &Mat,
    series: &ChebyshevSeries,
) -> Result<Mat> {
    check_weights(weights, x)?;
    check_len("approximate_gradient: labels", x.nrows(), y.nrows())?;
    let probs = x.dot(weights).mapv(|z| series.eval(z));
    Ok(x.t().dot(&(probs - y)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn col(values: &[f64]) -> Mat {
        Mat::from_shape_vec((values.len(), 1), values.to_vec()).unwrap()
    }

    #[test]
    fn loss_is_finite_and_non_negative() {
        let x = array![[1.0, 2.0], [2.0, 1.0], [3.0, 3.0], [0.0, 0.0]];
        let y = col(&[1.0, 1.0, 1.0, 0.0]);
        for w in [0.0, 0.1, -3.0, 500.0] {
            let loss = compute_loss(&col(&[w, w]), &x, &y).unwrap();
            assert!(loss.is_finite() && loss >= 0.0, "w = {}", w);
        }
        // θ = 0: every probability is 1/2
        let loss = compute_loss(&col(&[0.0, 0.0]), &x, &y).unwrap();
        assert_abs_diff_eq!(loss, std::f64::consts::LN_2, epsilon = 1e-12);
    }

    #[test]
    fn predictions_are_binary() {
        let x = array![[1.0, -2.0], [0.5, 0.5], [-3.0, 1.0]];
        let probs = compute_probabilities(&x, &col(&[0.7, -0.2])).unwrap();
        let preds = make_predictions(&probs, DEFAULT_THRESHOLD);
        assert_eq!(preds.nrows(), 3);
        assert!(preds.iter().all(|&p| p == 0.0 || p == 1.0));
        assert_eq!(make_predictions(&col(&[0.5]), 0.5)[[0, 0]], 1.0);
    }

    #[test]
    fn classification_counts() {
        let y = col(&[1.0, 1.0, 0.0, 0.0, 1.0]);
        let p = col(&[1.0, 0.0, 1.0, 0.0, 1.0]);
        assert_abs_diff_eq!(compute_accuracy(&y, &p).unwrap(), 0.6, epsilon = 1e-12);
        assert_abs_diff_eq!(compute_precision(&y, &p).unwrap(), 2.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(compute_recall(&y, &p).unwrap(), 2.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(compute_f1_score(&y, &p).unwrap(), 2.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn no_positive_predictions_score_zero() {
        let y = col(&[1.0, 0.0, 1.0]);
        let p = col(&[0.0, 0.0, 0.0]);
        assert_eq!(compute_precision(&y, &p).unwrap(), 0.0);
        assert_eq!(compute_recall(&y, &p).unwrap(), 0.0);
        assert_eq!(compute_f1_score(&y, &p).unwrap(), 0.0);

        let negatives = col(&[0.0, 0.0]);
        assert_eq!(compute_recall(&negatives, &col(&[0.0, 0.0])).unwrap(), 0.0);
    }

    #[test]
    fn roc_auc_extremes() {
        let y = col(&[0.0, 0.0, 1.0, 1.0]);
        assert_eq!(compute_roc_auc(&y, &col(&[0.1, 0.2, 0.8, 0.9])).unwrap(), 1.0);
        assert_eq!(compute_roc_auc(&y, &col(&[0.9, 0.8, 0.2, 0.1])).unwrap(), 0.0);
        // constant scores carry no information
        assert_eq!(compute_roc_auc(&y, &col(&[0.5; 4])).unwrap(), 0.5);
        // one class only
        assert_eq!(compute_roc_auc(&col(&[1.0, 1.0]), &col(&[0.3, 0.6])).unwrap(), 0.5);
    }

    #[test]
    fn roc_auc_averages_ties() {
        let y = col(&[0.0, 1.0, 0.0, 1.0]);
        let s = col(&[0.2, 0.4, 0.4, 0.9]);
        // pairs (neg, pos): (0.2,0.4) 1, (0.2,0.9) 1, (0.4,0.4) ½, (0.4,0.9) 1
        assert_abs_diff_eq!(compute_roc_auc(&y, &s).unwrap(), 3.5 / 4.0, epsilon = 1e-12);
    }

    #[test]
    fn mismatched_lengths_are_errors() {
        let y = col(&[1.0, 0.0]);
        let p = col(&[1.0]);
        assert!(matches!(
            compute_accuracy(&y, &p),
            Err(TrainError::DimensionMismatch { .. })
        ));
        assert!(compute_roc_auc(&y, &p).is_err());
        let x = array![[1.0, 2.0]];
        assert!(compute_probabilities(&x, &col(&[1.0])).is_err());
        assert!(compute_loss(&col(&[1.0, 1.0]), &x, &y).is_err());
    }

    #[test]
    fn all_metrics_on_a_separable_set() {
        let x = array![[1.0, -2.0], [1.0, -1.0], [1.0, 1.0], [1.0, 2.0]];
        let y = col(&[0.0, 0.0, 1.0, 1.0]);
        let m = compute_all_metrics(&col(&[0.0, 3.0]), &x, &y, 0.5).unwrap();
        assert_eq!(m.accuracy, 1.0);
        assert_eq!(m.f1_score, 1.0);
        assert_eq!(m.roc_auc, 1.0);
        assert!(m.loss < 0.1);
        let json = serde_json::to_string(&m).unwrap();
        assert!(json.contains("\"f1_score\""));
    }

    #[test]
    fn gradient_oracle() {
        let x = array![[1.0, 2.0], [2.0, 1.0], [3.0, 3.0], [0.0, 0.0]];
        let y = col(&[1.0, 1.0, 1.0, 0.0]);
        let theta = col(&[0.1, 0.1]);
        let g = plaintext_gradient(&theta, &x, &y).unwrap();
        let p = |z: f64| sigmoid(z);
        let want0 = (p(0.3) - 1.0) + 2.0 * (p(0.3) - 1.0) + 3.0 * (p(0.6) - 1.0);
        assert_abs_diff_eq!(g[[0, 0]], want0, epsilon = 1e-12);

        let series = ChebyshevSeries::sigmoid(-16.0, 16.0, 59).unwrap();
        let approx = approximate_gradient(&theta, &x, &y, &series).unwrap();
        assert_abs_diff_eq!(approx[[0, 0]], g[[0, 0]], epsilon = 1e-3);
        assert_abs_diff_eq!(approx[[1, 0]], g[[1, 0]], epsilon = 1e-3);
    }
}

//! Classification metrics over class values.
//!
//! Classes are plain `f64` values (label codes or one-hot argmax positions);
//! the confusion matrix indexes the sorted union of true and predicted
//! classes.

use super::metric::{Metric, MetricSet};
use ndarray::ArrayView2;
use std::fmt;

/// Class value of each row: the argmax for multi-column rows, otherwise the
/// rounded single value.
pub fn class_values(rows: ArrayView2<'_, f64>) -> Vec<f64> {
    if rows.ncols() == 1 {
        return rows.column(0).iter().map(|v| v.round()).collect();
    }
    rows.rows()
        .into_iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f64::NEG_INFINITY), |best, (k, &v)| if v > best.1 { (k, v) } else { best })
                .0 as f64
        })
        .collect()
}

/// Confusion matrix: `matrix[true][predicted]` counts.
#[derive(Clone, Debug)]
pub struct ConfusionMatrix {
    classes: Vec<f64>,
    matrix: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    pub fn from_predictions(y_true: &[f64], y_pred: &[f64]) -> Self {
        let mut classes: Vec<f64> = y_true.iter().chain(y_pred).copied().filter(|v| !v.is_nan()).collect();
        classes.sort_by(f64::total_cmp);
        classes.dedup();

        let mut matrix = vec![vec![0; classes.len()]; classes.len()];
        let index = |v: f64| classes.binary_search_by(|c| c.total_cmp(&v)).ok();
        for (&t, &p) in y_true.iter().zip(y_pred) {
            if let (Some(i), Some(j)) = (index(t), index(p)) {
                matrix[i][j] += 1;
            }
        }
        Self { classes, matrix }
    }

    pub fn classes(&self) -> &[f64] {
        &self.classes
    }

    pub fn get(&self, true_class: usize, predicted_class: usize) -> usize {
        self.matrix[true_class][predicted_class]
    }

    pub fn true_positives(&self, class: usize) -> usize {
        self.matrix[class][class]
    }

    /// Predicted as `class` but wasn't.
    pub fn false_positives(&self, class: usize) -> usize {
        (0..self.classes.len()).filter(|&i| i != class).map(|i| self.matrix[i][class]).sum()
    }

    /// Was `class` but predicted differently.
    pub fn false_negatives(&self, class: usize) -> usize {
        (0..self.classes.len()).filter(|&j| j != class).map(|j| self.matrix[class][j]).sum()
    }

    pub fn support(&self, class: usize) -> usize {
        self.matrix[class].iter().sum()
    }

    pub fn total(&self) -> usize {
        self.matrix.iter().flatten().sum()
    }

    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return f64::NAN;
        }
        let correct: usize = (0..self.classes.len()).map(|i| self.matrix[i][i]).sum();
        correct as f64 / total as f64
    }

    /// Support-weighted `(precision, recall, f1)`; a zero denominator counts as 0.
    pub fn weighted_scores(&self) -> (f64, f64, f64) {
        let total = self.total();
        if total == 0 {
            return (f64::NAN, f64::NAN, f64::NAN);
        }
        let (mut precision, mut recall, mut f1) = (0.0, 0.0, 0.0);
        for class in 0..self.classes.len() {
            let tp = self.true_positives(class) as f64;
            let fp = self.false_positives(class) as f64;
            let fn_ = self.false_negatives(class) as f64;
            let p = if tp + fp > 0.0 { tp / (tp + fp) } else { 0.0 };
            let r = if tp + fn_ > 0.0 { tp / (tp + fn_) } else { 0.0 };
            let f = if p + r > 0.0 { 2.0 * p * r / (p + r) } else { 0.0 };

            let weight = self.support(class) as f64 / total as f64;
            precision += p * weight;
            recall += r * weight;
            f1 += f * weight;
        }
        (precision, recall, f1)
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>8}", "")?;
        for class in &self.classes {
            write!(f, "{class:>8}")?;
        }
        writeln!(f)?;
        for (class, row) in self.classes.iter().zip(&self.matrix) {
            write!(f, "{class:>8}")?;
            for count in row {
                write!(f, "{count:>8}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Rank-based ROC AUC with averaged ties.
///
/// `NaN` unless `y_true` holds exactly two classes; the larger one is the
/// positive class.
pub fn roc_auc(y_true: &[f64], positive_scores: &[f64]) -> f64 {
    let mut classes: Vec<f64> = y_true.to_vec();
    classes.sort_by(f64::total_cmp);
    classes.dedup();
    if classes.len() != 2 || y_true.len() != positive_scores.len() {
        return f64::NAN;
    }
    let positive = classes[1];

    let mut order: Vec<usize> = (0..positive_scores.len()).collect();
    order.sort_by(|&a, &b| positive_scores[a].total_cmp(&positive_scores[b]));
    let mut ranks = vec![0.0; order.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && positive_scores[order[j + 1]] == positive_scores[order[i]] {
            j += 1;
        }
        let rank = (i + j) as f64 / 2.0 + 1.0;
        for &k in &order[i..=j] {
            ranks[k] = rank;
        }
        i = j + 1;
    }

    let n_pos = y_true.iter().filter(|&&v| v == positive).count() as f64;
    let n_neg = y_true.len() as f64 - n_pos;
    let rank_sum: f64 = y_true.iter().zip(&ranks).filter(|(v, _)| **v == positive).map(|(_, r)| r).sum();
    (rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg)
}

/// Score column for the positive class of a binary problem.
pub fn positive_scores(probabilities: ArrayView2<'_, f64>) -> Option<Vec<f64>> {
    match probabilities.ncols() {
        1 => Some(probabilities.column(0).to_vec()),
        2 => Some(probabilities.column(1).to_vec()),
        _ => None,
    }
}

/// Accuracy, weighted precision/recall/F1 and, for binary problems with
/// probabilities, ROC AUC.
pub fn classification_metrics(
    labels: ArrayView2<'_, f64>,
    predictions: ArrayView2<'_, f64>,
    probabilities: Option<ArrayView2<'_, f64>>,
    binary: bool,
) -> MetricSet {
    let y_true = class_values(labels);
    let y_pred = class_values(predictions);
    let cm = ConfusionMatrix::from_predictions(&y_true, &y_pred);
    let (precision, recall, f1) = cm.weighted_scores();

    let mut metrics = MetricSet::new();
    metrics.insert(Metric::Accuracy, cm.accuracy());
    metrics.insert(Metric::Precision, precision);
    metrics.insert(Metric::Recall, recall);
    metrics.insert(Metric::F1, f1);
    if binary {
        if let Some(scores) = probabilities.and_then(positive_scores) {
            metrics.insert(Metric::RocAuc, roc_auc(&y_true, &scores));
        }
    }
    metrics
}

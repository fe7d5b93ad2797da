//! Metric names, per-partition metric sets and their aggregates.

use crate::data::stats;
use crate::split::Partition;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Metrics recorded for an evaluated partition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Value of the user loss callable
    Loss,
    // Classification
    Accuracy,
    /// Support-weighted precision
    Precision,
    /// Support-weighted recall
    Recall,
    /// Support-weighted F1
    F1,
    /// Area under the ROC curve; binary classification only
    RocAuc,
    // Regression
    R2,
    Mse,
    Rmse,
    Mae,
    ExplainedVariance,
}

impl Metric {
    /// Whether higher values are better for this metric
    pub fn higher_is_better(&self) -> bool {
        !matches!(self, Metric::Loss | Metric::Mse | Metric::Rmse | Metric::Mae)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Metric::Loss => "loss",
            Metric::Accuracy => "accuracy",
            Metric::Precision => "precision",
            Metric::Recall => "recall",
            Metric::F1 => "f1",
            Metric::RocAuc => "roc_auc",
            Metric::R2 => "r2",
            Metric::Mse => "mse",
            Metric::Rmse => "rmse",
            Metric::Mae => "mae",
            Metric::ExplainedVariance => "explained_variance",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Metric values of one partition. Only finite values are kept.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricSet(BTreeMap<Metric, f64>);

impl MetricSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `value`; undefined results (NaN, infinities) are dropped.
    pub fn insert(&mut self, metric: Metric, value: f64) {
        if value.is_finite() {
            self.0.insert(metric, value);
        } else {
            tracing::debug!(%metric, value, "dropping non-finite metric");
        }
    }

    pub fn get(&self, metric: Metric) -> Option<f64> {
        self.0.get(&metric).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Metric, f64)> + '_ {
        self.0.iter().map(|(m, v)| (*m, *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn extend(&mut self, other: MetricSet) {
        for (metric, value) in other.0 {
            self.insert(metric, value);
        }
    }
}

/// Spread of one metric across the evaluated partitions of a prediction.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub mean: f64,
    pub median: f64,
    pub pstdev: f64,
    pub minimum: f64,
    pub maximum: f64,
}

impl Aggregate {
    pub fn of(values: &[f64]) -> Self {
        Self {
            mean: stats::mean(values),
            median: stats::median(values),
            pstdev: stats::pstdev(values),
            minimum: stats::minimum(values),
            maximum: stats::maximum(values),
        }
    }
}

/// Aggregate every metric over the partitions that recorded it.
pub fn aggregate(metrics: &BTreeMap<Partition, MetricSet>) -> BTreeMap<Metric, Aggregate> {
    let mut values: BTreeMap<Metric, Vec<f64>> = BTreeMap::new();
    for set in metrics.values() {
        for (metric, value) in set.iter() {
            values.entry(metric).or_default().push(value);
        }
    }
    values.into_iter().map(|(metric, v)| (metric, Aggregate::of(&v))).collect()
}

//! Evaluation of trained predictors.
//!
//! ## Architecture
//!
//! - [`metric`]: metric names, per-partition metric sets and aggregates
//! - [`classification`]: accuracy, weighted precision/recall/F1, ROC AUC
//! - [`regression`]: R², MSE, RMSE, MAE, explained variance
//! - [`importance`]: permutation feature importance
//!
//! ## Example
//!
//! ```ignore
//! use ensayo::eval::{aggregate, classification_metrics, Metric};
//!
//! let mut metrics = classification_metrics(labels.view(), predictions.view(), None, false);
//! metrics.insert(Metric::Loss, loss);
//! ```

pub mod classification;
pub mod importance;
pub mod metric;
pub mod regression;

pub use classification::{classification_metrics, ConfusionMatrix};
pub use importance::{permutation_importance, ColumnImportance};
pub use metric::{aggregate, Aggregate, Metric, MetricSet};
pub use regression::regression_metrics;

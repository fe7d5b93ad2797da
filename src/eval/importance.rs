//! Permutation feature importance.
//!
//! Each encoded column is shuffled across samples `permute_count` times and
//! the loss is recomputed. Trials run on a working copy that is restored from
//! the untouched input before every trial, so the caller's arrays are never
//! mutated.

use crate::data::stats;
use crate::error::{Error, Result};
use ndarray::{ArrayD, Axis};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Loss increase caused by shuffling one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnImportance {
    /// Median trial loss minus the baseline loss.
    pub median: f64,
    /// Each trial loss minus the baseline loss.
    pub loss_impacts: Vec<f64>,
}

/// Shuffle each column of `features` and record the loss deltas.
///
/// `column_position` is the axis holding the encoded columns and
/// `column_names` names them in order. `loss_of` evaluates the model on a
/// candidate array.
pub fn permutation_importance<R, F>(
    features: &ArrayD<f64>,
    column_position: usize,
    column_names: &[String],
    permute_count: usize,
    baseline_loss: f64,
    rng: &mut R,
    mut loss_of: F,
) -> Result<BTreeMap<String, ColumnImportance>>
where
    R: Rng + ?Sized,
    F: FnMut(&ArrayD<f64>) -> Result<f64>,
{
    if column_position == 0 || column_position >= features.ndim() {
        return Err(Error::Shape(format!(
            "column axis {column_position} is not a non-sample axis of shape {:?}",
            features.shape()
        )));
    }
    let width = features.shape()[column_position];
    if column_names.len() != width {
        return Err(Error::Shape(format!(
            "{} column names for {width} columns on axis {column_position}",
            column_names.len()
        )));
    }

    let samples = features.shape()[0];
    let mut working = features.clone();
    let mut order: Vec<usize> = (0..samples).collect();
    let mut importance = BTreeMap::new();

    for (j, name) in column_names.iter().enumerate() {
        let original = features.index_axis(Axis(column_position), j);
        let mut losses = Vec::with_capacity(permute_count);
        for _ in 0..permute_count {
            order.shuffle(&mut *rng);
            let shuffled = original.select(Axis(0), &order);
            working.index_axis_mut(Axis(column_position), j).assign(&shuffled);
            losses.push(loss_of(&working)?);
            working.index_axis_mut(Axis(column_position), j).assign(&original);
        }

        let loss_impacts: Vec<f64> = losses.iter().map(|l| l - baseline_loss).collect();
        let median = stats::median(&losses) - baseline_loss;
        tracing::debug!(column = %name, median, "permutation importance");
        importance.insert(name.clone(), ColumnImportance { median, loss_impacts });
    }
    Ok(importance)
}

//! Stratification vectors and binning.
//!
//! A stratification vector holds one scalar per sample. Continuous values
//! are cut into quantile bins; integer values are classes unless a bin count
//! is given; categorical codes are always classes.

use crate::data::stats::{median, mode, quantile_sorted};
use crate::data::Dtype;
use crate::error::{Error, Result};
use ndarray::{ArrayD, Axis};

#[derive(Debug, Clone, PartialEq)]
pub enum StratifyVector {
    Float(Vec<f64>),
    Int(Vec<f64>),
    Categorical(Vec<f64>),
}

impl StratifyVector {
    pub fn values(&self) -> &[f64] {
        match self {
            Self::Float(v) | Self::Int(v) | Self::Categorical(v) => v,
        }
    }

    pub fn len(&self) -> usize {
        self.values().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values().is_empty()
    }

    pub fn dtype(&self) -> Dtype {
        match self {
            Self::Float(_) => Dtype::Float,
            Self::Int(_) => Dtype::Int,
            Self::Categorical(_) => Dtype::Categorical,
        }
    }

    /// Restrict to the given sample positions.
    pub fn subset(&self, samples: &[usize]) -> Self {
        let pick = |v: &Vec<f64>| samples.iter().map(|&i| v[i]).collect();
        match self {
            Self::Float(v) => Self::Float(pick(v)),
            Self::Int(v) => Self::Int(pick(v)),
            Self::Categorical(v) => Self::Categorical(pick(v)),
        }
    }

    fn with_dtype(dtype: Dtype, values: Vec<f64>) -> Self {
        match dtype {
            Dtype::Float => Self::Float(values),
            Dtype::Int => Self::Int(values),
            Dtype::Categorical => Self::Categorical(values),
        }
    }
}

/// Vector from a `(samples, columns)` label; one-hot columns collapse by arg-max.
pub fn from_label(values: &ArrayD<f64>, dtypes: &[Dtype]) -> Result<StratifyVector> {
    if values.ndim() != 2 {
        return Err(Error::Shape(format!("label must be 2D, got {:?}", values.shape())));
    }
    let rows = values.axis_iter(Axis(0));
    if values.shape()[1] > 1 {
        let classes = rows
            .map(|row| {
                row.iter()
                    .enumerate()
                    .fold((0usize, f64::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
                    .0 as f64
            })
            .collect();
        return Ok(StratifyVector::Categorical(classes));
    }
    let dtype = dtypes.first().copied().unwrap_or(Dtype::Float);
    Ok(StratifyVector::with_dtype(dtype, rows.map(|row| row[0]).collect()))
}

/// Vector from one column of a feature array, reducing multi-valued samples
/// (windows, sequences, images) by median, or mode for categorical columns.
///
/// Reducing an integer column by median yields a continuous vector.
pub fn from_feature_column(values: &ArrayD<f64>, column: usize, dtype: Dtype) -> Result<StratifyVector> {
    let last = values.ndim() - 1;
    if column >= values.shape()[last] {
        return Err(Error::Shape(format!("column {column} out of range for {:?}", values.shape())));
    }
    let column_values = values.index_axis(Axis(last), column);
    if column_values.ndim() == 1 {
        return Ok(StratifyVector::with_dtype(dtype, column_values.iter().copied().collect()));
    }

    let reduced: Vec<f64> = column_values
        .axis_iter(Axis(0))
        .map(|sample| {
            let flat: Vec<f64> = sample.iter().copied().collect();
            match dtype {
                Dtype::Categorical => mode(&flat),
                _ => median(&flat),
            }
        })
        .collect();
    Ok(match dtype {
        Dtype::Categorical => StratifyVector::Categorical(reduced),
        _ => StratifyVector::Float(reduced),
    })
}

/// Quantile bins like `pd.qcut(labels=False, duplicates="drop")`.
pub fn quantile_bins(values: &[f64], bin_count: usize) -> Vec<usize> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let mut edges: Vec<f64> =
        (0..=bin_count).map(|i| quantile_sorted(&sorted, i as f64 / bin_count as f64)).collect();
    edges.dedup();
    let inner = if edges.len() > 2 { &edges[1..edges.len() - 1] } else { &[][..] };

    values.iter().map(|v| inner.iter().filter(|e| v > e).count()).collect()
}

/// Dense class ids in ascending value order.
fn dense_rank(values: &[f64]) -> Vec<usize> {
    let mut distinct = values.to_vec();
    distinct.sort_by(f64::total_cmp);
    distinct.dedup();
    values
        .iter()
        .map(|v| distinct.partition_point(|d| d < v))
        .collect()
}

/// Discretize a vector into class ids for a stratified splitter.
pub fn classes(vector: &StratifyVector, bin_count: Option<usize>, default_bin_count: usize) -> Result<Vec<usize>> {
    if vector.values().iter().any(|v| v.is_nan()) {
        return Err(Error::config(
            "stratification values contain NaN; add an interpolater or choose another column",
        ));
    }
    if bin_count == Some(0) {
        return Err(Error::config("bin_count must be >= 1"));
    }
    match vector {
        StratifyVector::Float(values) => {
            Ok(quantile_bins(values, bin_count.unwrap_or(default_bin_count)))
        }
        StratifyVector::Int(values) => match bin_count {
            Some(bins) => Ok(quantile_bins(values, bins)),
            None => Ok(dense_rank(values)),
        },
        StratifyVector::Categorical(values) => match bin_count {
            Some(_) => Err(Error::config("bin_count cannot be used with categorical stratification values")),
            None => Ok(dense_rank(values)),
        },
    }
}

//! Toy encoders and interpolaters shared by the pipeline unit tests.

use super::{Encoder, Interpolate};
use crate::config::EnsayoConfig;
use crate::context::Context;
use crate::error::{Error, Result};
use ndarray::{Array2, ArrayView2};
use serde_json::{json, Value};
use std::path::Path;

/// Linear fill between known neighbours; constant extension at both ends.
pub struct LinearFill;

impl Interpolate for LinearFill {
    fn kind(&self) -> &str {
        "linear"
    }

    fn interpolate(&self, data: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        let mut out = data.to_owned();
        for mut column in out.columns_mut() {
            let known: Vec<usize> = (0..column.len()).filter(|&i| !column[i].is_nan()).collect();
            if known.is_empty() {
                continue;
            }
            for i in 0..column.len() {
                if !column[i].is_nan() {
                    continue;
                }
                let before = known.iter().copied().rev().find(|&k| k < i);
                let after = known.iter().copied().find(|&k| k > i);
                column[i] = match (before, after) {
                    (Some(b), Some(a)) => column[b] + (column[a] - column[b]) * (i - b) as f64 / (a - b) as f64,
                    (Some(b), None) => column[b],
                    (None, Some(a)) => column[a],
                    (None, None) => f64::NAN,
                };
            }
        }
        Ok(out)
    }
}

pub struct FailingFill;

impl Interpolate for FailingFill {
    fn kind(&self) -> &str {
        "failing"
    }

    fn interpolate(&self, _data: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        Err(Error::Internal("interpolation failed".to_string()))
    }
}

/// Standardizes each column with the fitted mean and population spread.
#[derive(Default)]
pub struct Scale {
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}

impl Encoder for Scale {
    fn kind(&self) -> &str {
        "scale"
    }

    fn fit(&mut self, data: ArrayView2<'_, f64>) -> Result<()> {
        self.mean = data.columns().into_iter().map(|c| c.mean().unwrap_or(0.0)).collect();
        self.std = data.columns().into_iter().map(|c| c.std(0.0).max(1e-12)).collect();
        Ok(())
    }

    fn transform(&self, data: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        let mut out = data.to_owned();
        for (j, mut column) in out.columns_mut().into_iter().enumerate() {
            column.mapv_inplace(|v| (v - self.mean[j]) / self.std[j]);
        }
        Ok(out)
    }

    fn inverse_transform(&self, data: ArrayView2<'_, f64>) -> Option<Result<Array2<f64>>> {
        let mut out = data.to_owned();
        for (j, mut column) in out.columns_mut().into_iter().enumerate() {
            column.mapv_inplace(|v| v * self.std[j] + self.mean[j]);
        }
        Some(Ok(out))
    }

    fn fitted_state(&self) -> Option<Value> {
        Some(json!({ "mean": self.mean, "std": self.std }))
    }

    fn restore(&mut self, state: &Value) -> Result<()> {
        self.mean = serde_json::from_value(state["mean"].clone())?;
        self.std = serde_json::from_value(state["std"].clone())?;
        Ok(())
    }
}

/// One-hot over the distinct values of each column.
#[derive(Default)]
pub struct OneHot {
    pub categories: Vec<Vec<f64>>,
    pub drop_first: bool,
}

impl Encoder for OneHot {
    fn kind(&self) -> &str {
        if self.drop_first {
            "one_hot_drop"
        } else {
            "one_hot"
        }
    }

    fn fit(&mut self, data: ArrayView2<'_, f64>) -> Result<()> {
        self.categories = data
            .columns()
            .into_iter()
            .map(|c| {
                let mut values: Vec<f64> = c.to_vec();
                values.sort_by(f64::total_cmp);
                values.dedup();
                values
            })
            .collect();
        Ok(())
    }

    fn transform(&self, data: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        let width: usize = self.categories.iter().map(Vec::len).sum();
        let mut out = Array2::zeros((data.nrows(), width));
        for (i, row) in data.rows().into_iter().enumerate() {
            let mut offset = 0;
            for (j, values) in self.categories.iter().enumerate() {
                let hit = values
                    .iter()
                    .position(|v| *v == row[j])
                    .ok_or_else(|| Error::Internal(format!("unknown category {}", row[j])))?;
                out[[i, offset + hit]] = 1.0;
                offset += values.len();
            }
        }
        Ok(out)
    }

    fn inverse_transform(&self, data: ArrayView2<'_, f64>) -> Option<Result<Array2<f64>>> {
        let mut out = Array2::zeros((data.nrows(), self.categories.len()));
        for (i, row) in data.rows().into_iter().enumerate() {
            let mut offset = 0;
            for (j, values) in self.categories.iter().enumerate() {
                let slice = row.slice(ndarray::s![offset..offset + values.len()]);
                let hot = slice
                    .iter()
                    .enumerate()
                    .fold((0, f64::NEG_INFINITY), |best, (k, &v)| if v > best.1 { (k, v) } else { best })
                    .0;
                out[[i, j]] = values[hot];
                offset += values.len();
            }
        }
        Some(Ok(out))
    }

    fn categories(&self) -> Option<Vec<Vec<f64>>> {
        Some(self.categories.clone())
    }

    fn drops_categories(&self) -> bool {
        self.drop_first
    }

    fn is_categorical(&self) -> bool {
        true
    }

    fn fitted_state(&self) -> Option<Value> {
        Some(json!({ "categories": self.categories }))
    }

    fn restore(&mut self, state: &Value) -> Result<()> {
        self.categories = serde_json::from_value(state["categories"].clone())?;
        Ok(())
    }
}

/// Emits one extra column, breaking the declared output width.
pub struct Widening;

impl Encoder for Widening {
    fn kind(&self) -> &str {
        "widening"
    }

    fn fit(&mut self, _data: ArrayView2<'_, f64>) -> Result<()> {
        Ok(())
    }

    fn transform(&self, data: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        Ok(Array2::zeros((data.nrows(), data.ncols() + 1)))
    }
}

/// Adds a fitted offset and has no inverse.
#[derive(Default)]
pub struct Shift {
    offset: f64,
}

impl Encoder for Shift {
    fn kind(&self) -> &str {
        "shift"
    }

    fn fit(&mut self, data: ArrayView2<'_, f64>) -> Result<()> {
        self.offset = data.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Ok(())
    }

    fn transform(&self, data: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        Ok(data.mapv(|v| v + self.offset))
    }

    fn fitted_state(&self) -> Option<Value> {
        Some(json!(self.offset))
    }

    fn restore(&mut self, state: &Value) -> Result<()> {
        self.offset = serde_json::from_value(state.clone())?;
        Ok(())
    }
}

/// In-memory context with every toy transform registered.
pub fn context(seed: u64) -> Context {
    with_transforms(Context::in_memory(seed).expect("context should open"))
}

/// Like [`context`], with cache snapshots written under `cache_dir`.
pub fn context_in(seed: u64, cache_dir: &Path) -> Context {
    let config = EnsayoConfig::in_memory(seed).with_cache_dir(cache_dir);
    with_transforms(Context::from_config(config).expect("context should open"))
}

fn with_transforms(ctx: Context) -> Context {
    ctx.register_interpolater("linear", |_| Ok(Box::new(LinearFill) as Box<dyn Interpolate>)).expect("register");
    ctx.register_interpolater("failing", |_| Ok(Box::new(FailingFill) as Box<dyn Interpolate>)).expect("register");
    ctx.register_encoder("scale", |_| Ok(Box::new(Scale::default()) as Box<dyn Encoder>)).expect("register");
    ctx.register_encoder("one_hot", |_| Ok(Box::new(OneHot::default()) as Box<dyn Encoder>)).expect("register");
    ctx.register_encoder("one_hot_drop", |_| {
        Ok(Box::new(OneHot { drop_first: true, ..OneHot::default() }) as Box<dyn Encoder>)
    })
    .expect("register");
    ctx.register_encoder("widening", |_| Ok(Box::new(Widening) as Box<dyn Encoder>)).expect("register");
    ctx.register_encoder("shift", |_| Ok(Box::new(Shift::default()) as Box<dyn Encoder>)).expect("register");
    ctx
}

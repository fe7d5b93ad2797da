//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use ensayo::config::EnsayoConfig;
use ensayo::data::{Dtype, Tabular};
use ensayo::pipeline::Encoder;
use ensayo::queue::{Architecture, Hyperparameters, Predicted, Samples, Trained};
use ensayo::{Context, Result};
use ndarray::{Array2, ArrayD, ArrayView2, Axis, IxDyn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::cell::Cell;
use std::path::Path;

/// Context on `store_path` with snapshots under `cache_dir` and `standard` registered.
pub fn context(seed: u64, store_path: &str, cache_dir: &Path) -> Context {
    let config = EnsayoConfig { store_path: store_path.to_string(), seed: Some(seed), ..EnsayoConfig::default() }
        .with_cache_dir(cache_dir);
    let ctx = Context::from_config(config).expect("context should open");
    ctx.register_encoder("standard", |_| Ok(Box::new(Standard::default()) as Box<dyn Encoder>))
        .expect("register");
    ctx
}

/// `n` rows of `x` (float), `noise` (float) and `y = 2x + 1`.
pub fn linear_table(n: usize) -> Tabular {
    let x: Vec<f64> = (0..n).map(|i| i as f64 / 2.0).collect();
    let noise: Vec<f64> = (0..n).map(|i| ((i * 7) % 5) as f64).collect();
    let y: Vec<f64> = x.iter().map(|x| 2.0 * x + 1.0).collect();
    Tabular::from_columns(&[("x", Dtype::Float, &x), ("noise", Dtype::Float, &noise), ("y", Dtype::Float, &y)])
        .expect("valid table")
}

/// Zero mean, unit variance per column.
#[derive(Default)]
pub struct Standard {
    mean: Vec<f64>,
    std: Vec<f64>,
}

impl Encoder for Standard {
    fn kind(&self) -> &str {
        "standard"
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

/// Least squares on a single input column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Line {
    pub column: usize,
    pub slope: f64,
    pub intercept: f64,
}

#[derive(Default)]
pub struct LineFit {
    pub train_calls: Cell<usize>,
}

fn column_of(features: &ArrayD<f64>, column: usize) -> Vec<f64> {
    features.index_axis(Axis(1), column).iter().copied().collect()
}

impl Architecture for LineFit {
    type Model = Line;
    type Loss = ();
    type Optimizer = ();

    fn build(&self, _feature_shapes: &[Vec<usize>], _label_shape: Option<&[usize]>, hp: &Hyperparameters) -> Result<Option<Line>> {
        let column = hp.get("column").and_then(Value::as_u64).unwrap_or(0) as usize;
        Ok(Some(Line { column, slope: 0.0, intercept: 0.0 }))
    }

    fn lose(&self, _hp: &Hyperparameters) -> Result<Option<()>> {
        Ok(Some(()))
    }

    fn optimize(&self, _model: &Line, _hp: &Hyperparameters) -> Result<Option<()>> {
        Ok(Some(()))
    }

    fn train(
        &self,
        mut model: Line,
        _loser: &(),
        _optimizer: &mut (),
        samples_train: &Samples,
        _samples_evaluate: Option<&Samples>,
        _hp: &Hyperparameters,
    ) -> Result<Option<Trained<Line>>> {
        self.train_calls.set(self.train_calls.get() + 1);
        let x = column_of(&samples_train.features[0], model.column);
        let y: Vec<f64> = samples_train.labels.as_ref().map(|l| l.iter().copied().collect()).unwrap_or_default();
        let n = x.len() as f64;
        let mean_x = x.iter().sum::<f64>() / n;
        let mean_y = y.iter().sum::<f64>() / n;
        let covariance: f64 = x.iter().zip(&y).map(|(x, y)| (x - mean_x) * (y - mean_y)).sum();
        let variance: f64 = x.iter().map(|x| (x - mean_x).powi(2)).sum();
        model.slope = if variance > 0.0 { covariance / variance } else { 0.0 };
        model.intercept = mean_y - model.slope * mean_x;
        Ok(Some(Trained { model, history: Some(json!({ "epochs": 1 })) }))
    }

    fn predict(&self, model: &Line, features: &[ArrayD<f64>]) -> Result<Option<Predicted>> {
        let values: Vec<f64> =
            column_of(&features[0], model.column).iter().map(|x| model.slope * x + model.intercept).collect();
        let n = values.len();
        Ok(Some(Predicted { predictions: ArrayD::from_shape_vec(IxDyn(&[n, 1]), values)?, probabilities: None }))
    }

    fn loss(&self, _loser: &(), predicted: &Predicted, labels: &ArrayD<f64>) -> Result<f64> {
        let n = labels.len() as f64;
        Ok(predicted.predictions.iter().zip(labels.iter()).map(|(p, y)| (p - y).powi(2)).sum::<f64>() / n)
    }

    fn encode_model(&self, model: &Line) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(model)?)
    }

    fn decode_model(&self, bytes: &[u8]) -> Result<Line> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

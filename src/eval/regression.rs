//! Regression metrics; multi-output scores are averaged uniformly over columns.

use super::metric::{Metric, MetricSet};
use crate::error::{Error, Result};
use ndarray::ArrayView2;

fn column_r2(t: &[f64], p: &[f64]) -> f64 {
    let mean = t.iter().sum::<f64>() / t.len() as f64;
    let ss_res: f64 = t.iter().zip(p).map(|(a, b)| (a - b).powi(2)).sum();
    let ss_tot: f64 = t.iter().map(|a| (a - mean).powi(2)).sum();
    match (ss_tot == 0.0, ss_res == 0.0) {
        (true, true) => 1.0,
        (true, false) => 0.0,
        _ => 1.0 - ss_res / ss_tot,
    }
}

fn column_explained_variance(t: &[f64], p: &[f64]) -> f64 {
    let n = t.len() as f64;
    let residuals: Vec<f64> = t.iter().zip(p).map(|(a, b)| a - b).collect();
    let res_mean = residuals.iter().sum::<f64>() / n;
    let var_res = residuals.iter().map(|r| (r - res_mean).powi(2)).sum::<f64>() / n;
    let t_mean = t.iter().sum::<f64>() / n;
    let var_t = t.iter().map(|a| (a - t_mean).powi(2)).sum::<f64>() / n;
    match (var_t == 0.0, var_res == 0.0) {
        (true, true) => 1.0,
        (true, false) => 0.0,
        _ => 1.0 - var_res / var_t,
    }
}

/// R², MSE, RMSE, MAE and explained variance.
pub fn regression_metrics(labels: ArrayView2<'_, f64>, predictions: ArrayView2<'_, f64>) -> Result<MetricSet> {
    if labels.dim() != predictions.dim() {
        return Err(Error::Shape(format!(
            "labels {:?} and predictions {:?} differ",
            labels.dim(),
            predictions.dim()
        )));
    }
    let mut metrics = MetricSet::new();
    if labels.is_empty() {
        return Ok(metrics);
    }

    let n = labels.len() as f64;
    let mse = labels.iter().zip(predictions.iter()).map(|(a, b)| (a - b).powi(2)).sum::<f64>() / n;
    let mae = labels.iter().zip(predictions.iter()).map(|(a, b)| (a - b).abs()).sum::<f64>() / n;

    let columns = labels.ncols() as f64;
    let (mut r2, mut ev) = (0.0, 0.0);
    for (t, p) in labels.columns().into_iter().zip(predictions.columns()) {
        let (t, p) = (t.to_vec(), p.to_vec());
        r2 += column_r2(&t, &p) / columns;
        ev += column_explained_variance(&t, &p) / columns;
    }

    metrics.insert(Metric::R2, r2);
    metrics.insert(Metric::Mse, mse);
    metrics.insert(Metric::Rmse, mse.sqrt());
    metrics.insert(Metric::Mae, mae);
    metrics.insert(Metric::ExplainedVariance, ev);
    Ok(metrics)
}

//! Flat tables over a queue's evaluations, for the CLI and notebooks.

use super::predictor::{Prediction, Predictor};
use super::{Job, JobStatus, Queue};
use crate::context::Context;
use crate::error::Result;
use crate::eval::Metric;
use crate::split::{Fold, Partition};
use serde::Serialize;
use std::collections::HashMap;

/// One metric of one partition of one predictor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricRow {
    pub predictor_id: i64,
    pub job_id: i64,
    pub repeat_index: usize,
    pub hyperparamcombo_id: Option<i64>,
    pub fold_index: Option<usize>,
    pub partition: Partition,
    pub metric: Metric,
    pub value: f64,
}

/// Cross-partition statistics of one metric of one predictor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateRow {
    pub predictor_id: i64,
    pub metric: Metric,
    pub mean: f64,
    pub median: f64,
    pub pstdev: f64,
    pub minimum: f64,
    pub maximum: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub queue_id: i64,
    pub run_count: usize,
    pub runs_completed: usize,
    pub pending: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl Queue {
    /// Predictors of this queue with their training-time evaluation.
    fn evaluations(&self, ctx: &Context) -> Result<Vec<(Predictor, Prediction)>> {
        let mut out = Vec::new();
        let mut predictors = self.predictors(ctx)?;
        predictors.sort_by_key(|p| (p.job_id, p.repeat_index));
        for predictor in predictors {
            let prediction: Option<Prediction> =
                ctx.store().find_one(&[("predictor_id", Some(predictor.id)), ("splitset_id", None)])?;
            if let Some(prediction) = prediction {
                out.push((predictor, prediction));
            }
        }
        Ok(out)
    }

    /// One row per (predictor, partition, metric).
    pub fn metrics_table(&self, ctx: &Context) -> Result<Vec<MetricRow>> {
        let jobs: HashMap<i64, Job> = self.jobs(ctx)?.into_iter().map(|j| (j.id, j)).collect();
        let mut fold_indices: HashMap<i64, usize> = HashMap::new();
        if let Some(foldset) = self.foldset(ctx)? {
            fold_indices.extend(foldset.folds(ctx)?.into_iter().map(|f: Fold| (f.id, f.fold_index)));
        }

        let mut rows = Vec::new();
        for (predictor, prediction) in self.evaluations(ctx)? {
            let job = jobs.get(&predictor.job_id);
            for (partition, metrics) in &prediction.metrics {
                for (metric, value) in metrics.iter() {
                    rows.push(MetricRow {
                        predictor_id: predictor.id,
                        job_id: predictor.job_id,
                        repeat_index: predictor.repeat_index,
                        hyperparamcombo_id: job.and_then(|j| j.hyperparamcombo_id),
                        fold_index: job.and_then(|j| j.fold_id).and_then(|id| fold_indices.get(&id).copied()),
                        partition: *partition,
                        metric,
                        value,
                    });
                }
            }
        }
        Ok(rows)
    }

    /// One row per (predictor, metric).
    pub fn metrics_aggregate_table(&self, ctx: &Context) -> Result<Vec<AggregateRow>> {
        Ok(self
            .evaluations(ctx)?
            .into_iter()
            .flat_map(|(predictor, prediction)| {
                prediction.metrics_aggregate.into_iter().map(move |(metric, a)| AggregateRow {
                    predictor_id: predictor.id,
                    metric,
                    mean: a.mean,
                    median: a.median,
                    pstdev: a.pstdev,
                    minimum: a.minimum,
                    maximum: a.maximum,
                })
            })
            .collect())
    }

    pub fn status(&self, ctx: &Context) -> Result<QueueStatus> {
        let queue = self.refresh(ctx)?;
        let mut status = QueueStatus {
            queue_id: queue.id,
            run_count: queue.run_count,
            runs_completed: queue.runs_completed,
            pending: 0,
            running: 0,
            succeeded: 0,
            failed: 0,
        };
        for job in queue.jobs(ctx)? {
            match job.status {
                JobStatus::Pending => status.pending += 1,
                JobStatus::Running => status.running += 1,
                JobStatus::Succeeded => status.succeeded += 1,
                JobStatus::Failed => status.failed += 1,
            }
        }
        Ok(status)
    }
}

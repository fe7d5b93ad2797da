//! Training queues: the cartesian product of hyperparameter combos, folds
//! and repeats, run one unit at a time.
//!
//! ## Architecture
//!
//! - [`algorithm`]: Algorithm records and the [`Architecture`] callables
//! - [`hyperparams`]: Hyperparamset grids and Hyperparamcombos
//! - [`stage`]: preprocessing every partition once per fold group
//! - [`cache`]: gzip snapshot of the staged partitions
//! - [`run`]: the resumable run loop
//! - [`predictor`]: Predictors, Predictions, evaluation and inference
//! - [`report`]: metric tables and queue status
//!
//! # Example
//!
//! ```ignore
//! use ensayo::queue::{Queue, QueueRequest};
//!
//! let queue = Queue::create(&ctx, QueueRequest::new(algorithm.id, splitset.id)
//!     .with_foldset(foldset.id)
//!     .with_hyperparamset(hyperparamset.id)
//!     .with_repeat_count(2))?;
//! let summary = queue.run_jobs(&ctx, &MyArchitecture)?;
//! ```

pub mod algorithm;
pub mod cache;
pub mod hyperparams;
pub mod predictor;
pub mod report;
pub mod run;
pub mod stage;

pub use algorithm::{AnalysisType, Algorithm, Architecture, Hyperparameters, Predicted, Samples, Trained};
pub use hyperparams::{Hyperparamcombo, Hyperparamset};
pub use predictor::{FeatureImportance, Prediction, Predictor};
pub use report::{AggregateRow, MetricRow, QueueStatus};
pub use run::RunSummary;
pub use stage::InputShapes;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::split::{Fold, Foldset, Partition, Splitset, Supervision};
use crate::store::Entity;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Queue {
    #[serde(default)]
    pub id: i64,
    pub algorithm_id: i64,
    pub splitset_id: i64,
    pub foldset_id: Option<i64>,
    pub hyperparamset_id: Option<i64>,
    pub repeat_count: usize,
    /// Shuffles per column for permutation importance; 0 disables it.
    pub permute_count: usize,
    /// Leave the test partition out of staging and evaluation.
    pub hide_test: bool,
    /// combos × folds × repeats.
    pub run_count: usize,
    pub runs_completed: usize,
    pub description: Option<String>,
}

impl Entity for Queue {
    const TABLE: &'static str = "queues";
    const NAME: &'static str = "Queue";

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn keys(&self) -> Vec<(&'static str, Option<i64>)> {
        vec![
            ("algorithm_id", Some(self.algorithm_id)),
            ("splitset_id", Some(self.splitset_id)),
            ("foldset_id", self.foldset_id),
            ("hyperparamset_id", self.hyperparamset_id),
        ]
    }
}

/// Groups the jobs of one combo across folds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Jobset {
    #[serde(default)]
    pub id: i64,
    pub queue_id: i64,
    pub hyperparamcombo_id: Option<i64>,
}

impl Entity for Jobset {
    const TABLE: &'static str = "jobsets";
    const NAME: &'static str = "Jobset";

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn keys(&self) -> Vec<(&'static str, Option<i64>)> {
        vec![("queue_id", Some(self.queue_id)), ("hyperparamcombo_id", self.hyperparamcombo_id)]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

/// One (combo, fold) cell; it runs `repeat_count` times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    #[serde(default)]
    pub id: i64,
    pub queue_id: i64,
    pub hyperparamcombo_id: Option<i64>,
    pub fold_id: Option<i64>,
    pub jobset_id: Option<i64>,
    pub status: JobStatus,
}

impl Entity for Job {
    const TABLE: &'static str = "jobs";
    const NAME: &'static str = "Job";

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn keys(&self) -> Vec<(&'static str, Option<i64>)> {
        vec![
            ("queue_id", Some(self.queue_id)),
            ("hyperparamcombo_id", self.hyperparamcombo_id),
            ("fold_id", self.fold_id),
            ("jobset_id", self.jobset_id),
        ]
    }
}

impl Job {
    pub fn hyperparameters(&self, ctx: &Context) -> Result<Hyperparameters> {
        match self.hyperparamcombo_id {
            Some(id) => Ok(ctx.store().get::<Hyperparamcombo>(id)?.hyperparameters),
            None => Ok(Hyperparameters::new()),
        }
    }

    pub fn fold(&self, ctx: &Context) -> Result<Option<Fold>> {
        self.fold_id.map(|id| ctx.store().get(id)).transpose()
    }

    pub fn predictors(&self, ctx: &Context) -> Result<Vec<Predictor>> {
        ctx.store().find(&[("job_id", Some(self.id))])
    }

    pub(crate) fn set_status(&mut self, ctx: &Context, status: JobStatus) -> Result<()> {
        if self.status != status {
            self.status = status;
            ctx.store().update(self)?;
        }
        Ok(())
    }
}

/// Arguments of [`Queue::create`].
#[derive(Debug, Clone, PartialEq)]
pub struct QueueRequest {
    pub algorithm_id: i64,
    pub splitset_id: i64,
    pub foldset_id: Option<i64>,
    pub hyperparamset_id: Option<i64>,
    pub repeat_count: usize,
    pub permute_count: usize,
    pub hide_test: bool,
    pub description: Option<String>,
}

impl QueueRequest {
    pub fn new(algorithm_id: i64, splitset_id: i64) -> Self {
        Self {
            algorithm_id,
            splitset_id,
            foldset_id: None,
            hyperparamset_id: None,
            repeat_count: 1,
            permute_count: 3,
            hide_test: false,
            description: None,
        }
    }

    pub fn with_foldset(mut self, foldset_id: i64) -> Self {
        self.foldset_id = Some(foldset_id);
        self
    }

    pub fn with_hyperparamset(mut self, hyperparamset_id: i64) -> Self {
        self.hyperparamset_id = Some(hyperparamset_id);
        self
    }

    pub fn with_repeat_count(mut self, repeat_count: usize) -> Self {
        self.repeat_count = repeat_count;
        self
    }

    pub fn with_permute_count(mut self, permute_count: usize) -> Self {
        self.permute_count = permute_count;
        self
    }

    pub fn with_hide_test(mut self, hide_test: bool) -> Self {
        self.hide_test = hide_test;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Label dtype, label coder and supervision must agree with the analysis type.
fn validate_analysis(ctx: &Context, algorithm: &Algorithm, splitset: &Splitset) -> Result<()> {
    let analysis = algorithm.analysis_type;
    if splitset.supervision == Supervision::Unsupervised {
        if analysis.is_classification() {
            return Err(Error::config(format!(
                "splitset {} has no label; unsupervised queues require regression, not {}",
                splitset.id,
                analysis.as_str()
            )));
        }
        return Ok(());
    }
    let Some(label) = splitset.label(ctx)? else {
        return Err(Error::not_found("Label", format!("of splitset {}", splitset.id)));
    };

    if label.columns.len() > 1 && analysis != AnalysisType::ClassificationMulti {
        return Err(Error::config(format!(
            "label {} spans {} one-hot columns; only classification_multi accepts it",
            label.id,
            label.columns.len()
        )));
    }
    let float_label = label.dtypes.iter().any(|d| d.is_float());
    if analysis.is_classification() && float_label {
        return Err(Error::config(format!(
            "label {} is floating point; {} needs integer or categorical classes",
            label.id,
            analysis.as_str()
        )));
    }
    if !analysis.is_classification() && !float_label {
        tracing::warn!(label_id = label.id, "regression on a non-float label; values are treated as continuous");
    }

    if let Some(coder) = label.labelcoder(ctx)? {
        if analysis.is_classification() && !coder.is_categorical {
            return Err(Error::config(format!(
                "label coder `{}` is not categorical; classification labels need a categorical encoder",
                coder.kind
            )));
        }
        if !analysis.is_classification() && coder.is_categorical {
            return Err(Error::config(format!(
                "label coder `{}` is categorical; regression labels need a numeric encoder",
                coder.kind
            )));
        }
    }

    match (analysis.is_classification(), splitset.bin_count) {
        (true, Some(bin_count)) => {
            tracing::warn!(splitset_id = splitset.id, bin_count, "bin_count only applies to continuous labels; ignored for classification");
        }
        (false, None) => {
            tracing::warn!(splitset_id = splitset.id, "regression splitset was stratified without binning");
        }
        _ => {}
    }
    Ok(())
}

impl Queue {
    /// Validate the request and persist the queue with all of its jobs.
    pub fn create(ctx: &Context, request: QueueRequest) -> Result<Self> {
        let algorithm: Algorithm = ctx.store().get(request.algorithm_id)?;
        let splitset: Splitset = ctx.store().get(request.splitset_id)?;
        if request.repeat_count < 1 {
            return Err(Error::config("repeat_count must be >= 1"));
        }
        validate_analysis(ctx, &algorithm, &splitset)?;

        let folds: Vec<Option<Fold>> = match request.foldset_id {
            Some(foldset_id) => {
                let foldset: Foldset = ctx.store().get(foldset_id)?;
                if foldset.splitset_id != splitset.id {
                    return Err(Error::config(format!(
                        "foldset {foldset_id} belongs to splitset {}, not {}",
                        foldset.splitset_id, splitset.id
                    )));
                }
                foldset.folds(ctx)?.into_iter().map(Some).collect()
            }
            None => vec![None],
        };

        let combos: Vec<Option<Hyperparamcombo>> = match request.hyperparamset_id {
            Some(hyperparamset_id) => {
                let set: Hyperparamset = ctx.store().get(hyperparamset_id)?;
                if set.algorithm_id != algorithm.id {
                    return Err(Error::config(format!(
                        "hyperparamset {hyperparamset_id} belongs to algorithm {}, not {}",
                        set.algorithm_id, algorithm.id
                    )));
                }
                let mut combos = set.combos(ctx)?;
                combos.sort_by_key(|c| c.combination_index);
                combos.into_iter().map(Some).collect()
            }
            None => vec![None],
        };

        let hide_test = if request.hide_test && !splitset.samples.contains_key(&Partition::Test) {
            tracing::warn!(splitset_id = splitset.id, "hide_test ignored; the splitset has no test partition");
            false
        } else {
            request.hide_test
        };

        let mut queue = Queue {
            id: 0,
            algorithm_id: algorithm.id,
            splitset_id: splitset.id,
            foldset_id: request.foldset_id,
            hyperparamset_id: request.hyperparamset_id,
            repeat_count: request.repeat_count,
            permute_count: request.permute_count,
            hide_test,
            run_count: combos.len() * folds.len() * request.repeat_count,
            runs_completed: 0,
            description: request.description,
        };

        ctx.store().atomically(|tx| {
            tx.insert(&mut queue)?;
            for combo in &combos {
                let hyperparamcombo_id = combo.as_ref().map(|c| c.id);
                let jobset_id = if queue.foldset_id.is_some() {
                    let mut jobset = Jobset { id: 0, queue_id: queue.id, hyperparamcombo_id };
                    Some(tx.insert(&mut jobset)?)
                } else {
                    None
                };
                for fold in &folds {
                    tx.insert(&mut Job {
                        id: 0,
                        queue_id: queue.id,
                        hyperparamcombo_id,
                        fold_id: fold.as_ref().map(|f| f.id),
                        jobset_id,
                        status: JobStatus::Pending,
                    })?;
                }
            }
            Ok(())
        })?;

        tracing::info!(
            queue_id = queue.id,
            run_count = queue.run_count,
            combos = combos.len(),
            folds = folds.len(),
            repeats = queue.repeat_count,
            "queue created"
        );
        Ok(queue)
    }

    pub fn algorithm(&self, ctx: &Context) -> Result<Algorithm> {
        ctx.store().get(self.algorithm_id)
    }

    pub fn splitset(&self, ctx: &Context) -> Result<Splitset> {
        ctx.store().get(self.splitset_id)
    }

    pub fn foldset(&self, ctx: &Context) -> Result<Option<Foldset>> {
        self.foldset_id.map(|id| ctx.store().get(id)).transpose()
    }

    pub fn jobs(&self, ctx: &Context) -> Result<Vec<Job>> {
        ctx.store().find(&[("queue_id", Some(self.id))])
    }

    pub fn jobsets(&self, ctx: &Context) -> Result<Vec<Jobset>> {
        ctx.store().find(&[("queue_id", Some(self.id))])
    }

    pub fn predictors(&self, ctx: &Context) -> Result<Vec<Predictor>> {
        ctx.store().find(&[("queue_id", Some(self.id))])
    }

    /// Reload the persisted record (run counters change while running).
    pub fn refresh(&self, ctx: &Context) -> Result<Self> {
        ctx.store().get(self.id)
    }
}

#[cfg(test)]
mod tests;

//! Trained predictors, their evaluations and inference on new splitsets.

use super::algorithm::{required, AnalysisType, Architecture, Hyperparameters, Predicted};
use super::cache::Staged;
use super::hyperparams::Hyperparamcombo;
use super::stage::{stage, InputShapes};
use super::{Job, Queue};
use crate::context::Context;
use crate::data::array::{flatten_rows, StoredArray};
use crate::data::DatasetKind;
use crate::error::{Error, Result};
use crate::eval::{
    aggregate, classification_metrics, permutation_importance, regression_metrics, Aggregate, ColumnImportance, Metric,
    MetricSet,
};
use crate::feature::{Feature, Label};
use crate::pipeline::decode::decode_array;
use crate::pipeline::fitted::FitGroup;
use crate::pipeline::preprocess::{fitted_feature_chain, fitted_label_chain, FitSource};
use crate::split::{Partition, Partitions, Splitset, Supervision};
use crate::store::Entity;
use chrono::{DateTime, Utc};
use ndarray::{ArrayD, Axis, IxDyn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A trained model from one (job, repeat) unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predictor {
    #[serde(default)]
    pub id: i64,
    pub queue_id: i64,
    pub job_id: i64,
    pub repeat_index: usize,
    /// SHA-256 of the encoded model in the artifact table.
    pub model_sha256: String,
    pub model_format_version: u32,
    pub input_shapes: InputShapes,
    pub history: Option<Value>,
    pub time_started: DateTime<Utc>,
    pub time_succeeded: DateTime<Utc>,
    pub duration_seconds: f64,
}

impl Entity for Predictor {
    const TABLE: &'static str = "predictors";
    const NAME: &'static str = "Predictor";

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn keys(&self) -> Vec<(&'static str, Option<i64>)> {
        vec![
            ("queue_id", Some(self.queue_id)),
            ("job_id", Some(self.job_id)),
            ("repeat_index", Some(self.repeat_index as i64)),
        ]
    }
}

/// Feature importance per feature id, then per encoded column.
pub type FeatureImportance = BTreeMap<i64, BTreeMap<String, ColumnImportance>>;

/// Evaluation of a predictor against a set of partitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    #[serde(default)]
    pub id: i64,
    pub predictor_id: i64,
    /// Set when the partitions came from a splitset other than the queue's.
    pub splitset_id: Option<i64>,
    pub predictions: BTreeMap<Partition, StoredArray>,
    pub probabilities: BTreeMap<Partition, StoredArray>,
    pub feature_importance: Option<FeatureImportance>,
    /// Empty when there were no labels to score against.
    pub metrics: BTreeMap<Partition, MetricSet>,
    pub metrics_aggregate: BTreeMap<Metric, Aggregate>,
}

impl Entity for Prediction {
    const TABLE: &'static str = "predictions";
    const NAME: &'static str = "Prediction";

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn keys(&self) -> Vec<(&'static str, Option<i64>)> {
        vec![("predictor_id", Some(self.predictor_id)), ("splitset_id", self.splitset_id)]
    }
}

/// Everything the evaluator needs besides the model.
pub(crate) struct Evaluation<'a> {
    pub analysis_type: AnalysisType,
    pub supervision: Supervision,
    /// Trained features; they own the chains and name the encoded columns.
    pub features: &'a [Feature],
    pub label: Option<&'a Label>,
    pub fit: FitSource<'a>,
    /// Partition whose columns are permuted; `None` skips importance.
    pub key_train: Option<Partition>,
    pub permute_count: usize,
    pub splitset_id: Option<i64>,
}

fn as_rows(array: &ArrayD<f64>) -> Result<ndarray::Array2<f64>> {
    flatten_rows(array)
}

/// All values in logical order as a 1D array.
fn ravel(array: &ArrayD<f64>) -> Result<ArrayD<f64>> {
    Ok(ArrayD::from_shape_vec(IxDyn(&[array.len()]), array.iter().copied().collect())?)
}

fn score<A: Architecture>(
    arch: &A,
    loser: &A::Loss,
    analysis_type: AnalysisType,
    predicted: &Predicted,
    labels: &ArrayD<f64>,
) -> Result<(f64, MetricSet)> {
    let loss = arch.loss(loser, predicted, labels)?;
    let truth = as_rows(labels)?;
    let guesses = as_rows(&predicted.predictions)?;
    let mut metrics = if analysis_type.is_classification() {
        let probabilities = predicted.probabilities.as_ref().map(as_rows).transpose()?;
        classification_metrics(
            truth.view(),
            guesses.view(),
            probabilities.as_ref().map(|p| p.view()),
            analysis_type == AnalysisType::ClassificationBinary,
        )
    } else {
        regression_metrics(truth.view(), guesses.view())?
    };
    metrics.insert(Metric::Loss, loss);
    Ok((loss, metrics))
}

/// Ordinal class predictions become one-hot rows of `width` columns.
fn ordinal_to_one_hot(predictions: &ArrayD<f64>, width: usize) -> Result<ArrayD<f64>> {
    let rows = predictions.len();
    let mut out = ArrayD::zeros(IxDyn(&[rows, width]));
    for (i, v) in predictions.iter().enumerate() {
        let k = v.round();
        if !(k >= 0.0 && (k as usize) < width) {
            return Err(Error::Shape(format!("class index {v} outside 0..{width}")));
        }
        out[[i, k as usize]] = 1.0;
    }
    Ok(out)
}

fn decode_predictions(ctx: &Context, eval: &Evaluation<'_>, predictions: ArrayD<f64>) -> Result<ArrayD<f64>> {
    match eval.supervision {
        Supervision::Supervised => {
            let Some(label) = eval.label else {
                return Ok(predictions);
            };
            let decoded = match fitted_label_chain(ctx, label, eval.fit)? {
                Some(chain) => {
                    let width = chain.output_width();
                    let single = predictions.ndim() == 1 || predictions.shape().last() == Some(&1);
                    let encoded = if width > 1 && single {
                        ordinal_to_one_hot(&predictions, width)?
                    } else if predictions.ndim() == 1 {
                        predictions.clone().insert_axis(Axis(1))
                    } else {
                        predictions.clone()
                    };
                    decode_array(&chain, &encoded)?.unwrap_or(predictions)
                }
                None => predictions,
            };
            ravel(&decoded)
        }
        Supervision::Unsupervised => {
            let Some(feature) = eval.features.first() else {
                return Ok(predictions);
            };
            match fitted_feature_chain(ctx, feature, eval.fit)? {
                Some(chain) => Ok(decode_array(&chain, &predictions)?.unwrap_or(predictions)),
                None => Ok(predictions),
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn importance<A: Architecture>(
    ctx: &Context,
    arch: &A,
    model: &A::Model,
    loser: &A::Loss,
    eval: &Evaluation<'_>,
    samples: &super::Samples,
    labels: &ArrayD<f64>,
    baseline_loss: f64,
) -> Result<FeatureImportance> {
    let mut out = FeatureImportance::new();
    let mut rng = ctx.rng()?;
    for (i, feature) in eval.features.iter().enumerate() {
        if feature.kind == DatasetKind::Image {
            tracing::debug!(feature_id = feature.id, "skipping permutation importance for image feature");
            continue;
        }
        let array = &samples.features[i];
        let column_position = match feature.shaper(ctx)? {
            Some(shaper) => shaper.column_position,
            None => array.ndim() - 1,
        };
        let names = feature.encoded_column_names(ctx)?;
        let columns = permutation_importance(
            array,
            column_position,
            &names,
            eval.permute_count,
            baseline_loss,
            &mut rng,
            |candidate| {
                let mut inputs = samples.features.clone();
                inputs[i] = candidate.clone();
                let predicted = required(arch.predict(model, &inputs)?, "predict")?;
                arch.loss(loser, &predicted, labels)
            },
        )?;
        out.insert(feature.id, columns);
    }
    Ok(out)
}

/// Predict, score, explain and decode every staged partition, then persist
/// the resulting [`Prediction`].
pub(crate) fn evaluate<A: Architecture>(
    ctx: &Context,
    arch: &A,
    predictor: &Predictor,
    model: &A::Model,
    loser: &A::Loss,
    staged: &Staged,
    eval: &Evaluation<'_>,
) -> Result<Prediction> {
    let mut predictions = BTreeMap::new();
    let mut probabilities = BTreeMap::new();
    let mut metrics = BTreeMap::new();
    let mut feature_importance = None;

    for (partition, samples) in staged {
        let predicted = required(arch.predict(model, &samples.features)?, "predict")?;
        if let Some(labels) = &samples.labels {
            let (loss, set) = score(arch, loser, eval.analysis_type, &predicted, labels)?;
            metrics.insert(*partition, set);

            let explain = eval.permute_count > 0 && eval.key_train == Some(*partition);
            if explain {
                feature_importance = Some(importance(ctx, arch, model, loser, eval, samples, labels, loss)?);
            }
        }

        let Predicted { predictions: raw, probabilities: probs } = predicted;
        let decoded = decode_predictions(ctx, eval, raw)?;
        predictions.insert(*partition, StoredArray::from(&decoded));
        if let Some(probs) = probs {
            let probs = if eval.analysis_type == AnalysisType::ClassificationMulti { probs } else { ravel(&probs)? };
            probabilities.insert(*partition, StoredArray::from(&probs));
        }
    }

    let mut prediction = Prediction {
        id: 0,
        predictor_id: predictor.id,
        splitset_id: eval.splitset_id,
        predictions,
        probabilities,
        feature_importance,
        metrics_aggregate: aggregate(&metrics),
        metrics,
    };
    ctx.store().insert(&mut prediction)?;
    Ok(prediction)
}

impl Predictor {
    pub fn job(&self, ctx: &Context) -> Result<Job> {
        ctx.store().get(self.job_id)
    }

    pub fn queue(&self, ctx: &Context) -> Result<Queue> {
        ctx.store().get(self.queue_id)
    }

    pub fn predictions(&self, ctx: &Context) -> Result<Vec<Prediction>> {
        ctx.store().find(&[("predictor_id", Some(self.id))])
    }

    /// Hyperparameters the model was trained with (empty without a grid).
    pub fn hyperparameters(&self, ctx: &Context) -> Result<Hyperparameters> {
        match self.job(ctx)?.hyperparamcombo_id {
            Some(id) => Ok(ctx.store().get::<Hyperparamcombo>(id)?.hyperparameters),
            None => Ok(Hyperparameters::new()),
        }
    }

    /// Encoded model bytes as stored.
    pub fn model_bytes(&self, ctx: &Context) -> Result<Vec<u8>> {
        ctx.store().artifact(&self.model_sha256)
    }

    /// Decode the trained model; the architecture must speak the stored format.
    pub fn model<A: Architecture>(&self, ctx: &Context, arch: &A) -> Result<A::Model> {
        if arch.model_format_version() != self.model_format_version {
            return Err(Error::config(format!(
                "predictor {} stores model format {}, architecture reads {}",
                self.id,
                self.model_format_version,
                arch.model_format_version()
            )));
        }
        arch.decode_model(&self.model_bytes(ctx)?)
    }

    /// Fit group of the job that trained this predictor.
    fn fit_group(&self, ctx: &Context) -> Result<FitGroup> {
        Ok(FitGroup { queue_id: self.queue_id, fold_id: self.job(ctx)?.fold_id })
    }

    /// Run a new splitset through the trained chains (never refit), predict
    /// every sample and persist the result tagged with `splitset_id`.
    ///
    /// Metrics are computed when the new splitset has labels.
    pub fn infer<A: Architecture>(&self, ctx: &Context, arch: &A, splitset_id: i64) -> Result<Prediction> {
        let queue = self.queue(ctx)?;
        let trained_splitset: Splitset = ctx.store().get(queue.splitset_id)?;
        let splitset: Splitset = ctx.store().get(splitset_id)?;
        let algorithm = queue.algorithm(ctx)?;

        let trained_features = trained_splitset.features(ctx)?;
        let features = splitset.features(ctx)?;
        if features.len() != trained_features.len() {
            return Err(Error::config(format!(
                "splitset {splitset_id} has {} features, the predictor was trained on {}",
                features.len(),
                trained_features.len()
            )));
        }
        for (new, old) in features.iter().zip(&trained_features) {
            if new.columns != old.columns || new.dtypes != old.dtypes || new.kind != old.kind {
                return Err(Error::config(format!(
                    "feature {} does not match the schema of trained feature {}",
                    new.id, old.id
                )));
            }
        }

        let trained_label = trained_splitset.label(ctx)?;
        let label = match (splitset.label(ctx)?, &trained_label) {
            (Some(new), Some(old)) => {
                if new.columns != old.columns {
                    return Err(Error::config(format!(
                        "label {} does not match trained label {}",
                        new.id, old.id
                    )));
                }
                Some(new)
            }
            (Some(_), None) => {
                tracing::warn!(splitset_id, "predictor was trained without labels; ignoring the new label");
                None
            }
            (None, _) => None,
        };

        let fit = FitSource::Trained { group: self.fit_group(ctx)?, job_id: self.job_id };
        let everything: Partitions = [(Partition::Infer, (0..splitset.sample_count).collect())].into_iter().collect();
        let mut staged = stage(
            ctx,
            &features,
            &trained_features,
            label.as_ref(),
            label.as_ref().and(trained_label.as_ref()),
            &everything,
            None,
            fit,
        )?;
        if trained_splitset.supervision == Supervision::Supervised && label.is_none() {
            for samples in staged.values_mut() {
                samples.labels = None;
            }
        }

        let model = self.model(ctx, arch)?;
        let hp = self.hyperparameters(ctx)?;
        let loser = required(arch.lose(&hp)?, "lose")?;
        let eval = Evaluation {
            analysis_type: algorithm.analysis_type,
            supervision: trained_splitset.supervision,
            features: &trained_features,
            label: trained_label.as_ref(),
            fit,
            key_train: None,
            permute_count: 0,
            splitset_id: Some(splitset_id),
        };
        let prediction = evaluate(ctx, arch, self, &model, &loser, &staged, &eval)?;
        tracing::info!(predictor_id = self.id, splitset_id, prediction_id = prediction.id, "inference finished");
        Ok(prediction)
    }
}

impl Prediction {
    pub fn predictions(&self, partition: Partition) -> Result<Option<ArrayD<f64>>> {
        self.predictions.get(&partition).map(StoredArray::to_array).transpose()
    }

    /// Median loss impact per encoded column of one feature, largest first.
    pub fn importance_ranking(&self, feature_id: i64) -> Vec<(String, f64)> {
        let mut ranking: Vec<(String, f64)> = self
            .feature_importance
            .as_ref()
            .and_then(|fi| fi.get(&feature_id))
            .map(|columns| columns.iter().map(|(name, c)| (name.clone(), c.median)).collect())
            .unwrap_or_default();
        ranking.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranking
    }
}

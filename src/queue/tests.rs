use super::*;
use crate::data::{Dtype, Tabular};
use crate::eval::Metric;
use crate::feature::{Feature, Label};
use crate::pipeline::test_support::context_in;
use crate::split::{Foldset, SplitRequest};
use ndarray::{ArrayD, Axis, IxDyn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::cell::Cell;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Predicts one input column plus a fitted bias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Offset {
    column: usize,
    bias: f64,
}

#[derive(Default)]
struct Toy {
    classify: bool,
    null_from: Option<&'static str>,
    train_calls: Cell<usize>,
    interrupt: Option<(Arc<AtomicBool>, usize)>,
}

fn column(features: &ArrayD<f64>, column: usize) -> Vec<f64> {
    features.index_axis(Axis(1), column).iter().copied().collect()
}

impl Architecture for Toy {
    type Model = Offset;
    type Loss = ();
    type Optimizer = ();

    fn build(&self, feature_shapes: &[Vec<usize>], _label_shape: Option<&[usize]>, hp: &Hyperparameters) -> Result<Option<Offset>> {
        if self.null_from == Some("build") {
            return Ok(None);
        }
        assert_eq!(feature_shapes.len(), 1);
        let column = hp.get("column").and_then(Value::as_u64).unwrap_or(0) as usize;
        Ok(Some(Offset { column, bias: 0.0 }))
    }

    fn lose(&self, _hp: &Hyperparameters) -> Result<Option<()>> {
        Ok(Some(()))
    }

    fn optimize(&self, _model: &Offset, _hp: &Hyperparameters) -> Result<Option<()>> {
        Ok(if self.null_from == Some("optimize") { None } else { Some(()) })
    }

    fn train(
        &self,
        mut model: Offset,
        _loser: &(),
        _optimizer: &mut (),
        samples_train: &Samples,
        _samples_evaluate: Option<&Samples>,
        _hp: &Hyperparameters,
    ) -> Result<Option<Trained<Offset>>> {
        self.train_calls.set(self.train_calls.get() + 1);
        if let Some((flag, after)) = &self.interrupt {
            if self.train_calls.get() == *after {
                flag.store(true, Ordering::SeqCst);
            }
        }
        let x = column(&samples_train.features[0], model.column);
        let y: Vec<f64> = samples_train.labels.as_ref().map(|l| l.iter().copied().collect()).unwrap_or_default();
        model.bias = x.iter().zip(&y).map(|(x, y)| y - x).sum::<f64>() / x.len() as f64;
        Ok(Some(Trained { model, history: Some(json!({ "epochs": 1 })) }))
    }

    fn predict(&self, model: &Offset, features: &[ArrayD<f64>]) -> Result<Option<Predicted>> {
        let values: Vec<f64> = column(&features[0], model.column).iter().map(|x| x + model.bias).collect();
        let n = values.len();
        if self.classify {
            let classes: Vec<f64> = values.iter().map(|v| v.round().clamp(0.0, 1.0)).collect();
            let probabilities = ArrayD::from_shape_vec(IxDyn(&[n, 1]), values.iter().map(|v| v.clamp(0.0, 1.0)).collect())?;
            return Ok(Some(Predicted {
                predictions: ArrayD::from_shape_vec(IxDyn(&[n, 1]), classes)?,
                probabilities: Some(probabilities),
            }));
        }
        Ok(Some(Predicted { predictions: ArrayD::from_shape_vec(IxDyn(&[n, 1]), values)?, probabilities: None }))
    }

    fn loss(&self, _loser: &(), predicted: &Predicted, labels: &ArrayD<f64>) -> Result<f64> {
        let n = labels.len() as f64;
        Ok(predicted.predictions.iter().zip(labels.iter()).map(|(p, y)| (p - y).powi(2)).sum::<f64>() / n)
    }

    fn encode_model(&self, model: &Offset) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(model)?)
    }

    fn decode_model(&self, bytes: &[u8]) -> Result<Offset> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

struct Fixture {
    ctx: Context,
    cache: tempfile::TempDir,
    feature: Feature,
    label: Label,
    splitset: Splitset,
    algorithm: Algorithm,
}

/// 30 samples where `y == a` and `b` is noise.
fn regression(seed: u64, size_test: Option<f64>) -> Fixture {
    let cache = tempfile::tempdir().expect("temp dir creation should succeed");
    let ctx = context_in(seed, cache.path());
    let a: Vec<f64> = (0..30).map(|i| i as f64 / 3.0).collect();
    let b: Vec<f64> = (0..30).map(|i| ((i * 7) % 5) as f64).collect();
    let dataset = Tabular::from_columns(&[("a", Dtype::Float, &a), ("b", Dtype::Float, &b), ("y", Dtype::Float, &a)])
        .expect("dataset");
    let dataset_id = ctx.register_dataset(dataset).expect("register");
    let feature = Feature::create(&ctx, dataset_id, Some(vec!["a".into(), "b".into()]), None).expect("feature");
    let label = Label::create(&ctx, dataset_id, vec!["y".into()]).expect("label");
    let mut request = SplitRequest::new(vec![feature.id]).with_label(label.id);
    if let Some(size) = size_test {
        request = request.with_size_test(size);
    }
    let splitset = Splitset::make(&ctx, request).expect("splitset");
    let algorithm = Algorithm::create(&ctx, "toy", AnalysisType::Regression, None).expect("algorithm");
    Fixture { ctx, cache, feature, label, splitset, algorithm }
}

fn cache_is_empty(fixture: &Fixture) -> bool {
    std::fs::read_dir(fixture.cache.path()).map(|mut d| d.next().is_none()).unwrap_or(true)
}

#[test]
fn test_run_count_is_combos_folds_repeats() {
    let f = regression(1, Some(0.2));
    let foldset = Foldset::make(&f.ctx, f.splitset.id, Some(3), None).expect("foldset");
    let grid: BTreeMap<String, Value> = [("column".to_string(), json!([0, 1]))].into_iter().collect();
    let set = Hyperparamset::create(&f.ctx, f.algorithm.id, grid, None, None, None).expect("grid");
    let queue = Queue::create(
        &f.ctx,
        QueueRequest::new(f.algorithm.id, f.splitset.id)
            .with_foldset(foldset.id)
            .with_hyperparamset(set.id)
            .with_repeat_count(2),
    )
    .expect("queue");

    assert_eq!(queue.run_count, 12);
    assert_eq!(queue.jobs(&f.ctx).expect("jobs").len(), 6);
    assert_eq!(queue.jobsets(&f.ctx).expect("jobsets").len(), 2);
    assert!(queue.jobs(&f.ctx).expect("jobs").iter().all(|j| j.status == JobStatus::Pending && j.jobset_id.is_some()));
}

#[test]
fn test_unfolded_queue_without_grid_has_one_job() {
    let f = regression(2, None);
    let queue = Queue::create(&f.ctx, QueueRequest::new(f.algorithm.id, f.splitset.id)).expect("queue");
    assert_eq!(queue.run_count, 1);
    let jobs = queue.jobs(&f.ctx).expect("jobs");
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].fold_id, None);
    assert_eq!(jobs[0].jobset_id, None);
    assert!(queue.jobsets(&f.ctx).expect("jobsets").is_empty());
}

#[test]
fn test_create_rejects_mismatched_configuration() {
    let f = regression(3, Some(0.2));
    let classifier = Algorithm::create(&f.ctx, "toy", AnalysisType::ClassificationBinary, None).expect("algorithm");
    let err = Queue::create(&f.ctx, QueueRequest::new(classifier.id, f.splitset.id)).unwrap_err();
    assert!(err.is_config_error(), "float label cannot be classified: {err}");

    let err = Queue::create(&f.ctx, QueueRequest::new(f.algorithm.id, f.splitset.id).with_repeat_count(0)).unwrap_err();
    assert!(err.is_config_error());

    let other = Splitset::make(&f.ctx, SplitRequest::new(vec![f.feature.id]).with_label(f.label.id)).expect("splitset");
    let foldset = Foldset::make(&f.ctx, other.id, Some(2), None).expect("foldset");
    let err = Queue::create(&f.ctx, QueueRequest::new(f.algorithm.id, f.splitset.id).with_foldset(foldset.id))
        .unwrap_err();
    assert!(err.is_config_error());

    let grid: BTreeMap<String, Value> = [("column".to_string(), json!(0))].into_iter().collect();
    let foreign = Hyperparamset::create(&f.ctx, classifier.id, grid, None, None, None).expect("grid");
    let err = Queue::create(&f.ctx, QueueRequest::new(f.algorithm.id, f.splitset.id).with_hyperparamset(foreign.id))
        .unwrap_err();
    assert!(err.is_config_error());

    assert_eq!(f.ctx.store().count::<Queue>(&[]).expect("count"), 0);
    assert_eq!(f.ctx.store().count::<Job>(&[]).expect("count"), 0);
}

#[test]
fn test_unsupervised_requires_regression() {
    let f = regression(4, None);
    let unsupervised = Splitset::make(&f.ctx, SplitRequest::new(vec![f.feature.id])).expect("splitset");
    let classifier = Algorithm::create(&f.ctx, "toy", AnalysisType::ClassificationMulti, None).expect("algorithm");
    assert!(Queue::create(&f.ctx, QueueRequest::new(classifier.id, unsupervised.id)).is_err());
    assert!(Queue::create(&f.ctx, QueueRequest::new(f.algorithm.id, unsupervised.id)).is_ok());
}

#[test]
fn test_hide_test_without_test_partition_is_ignored() {
    let f = regression(5, None);
    let queue =
        Queue::create(&f.ctx, QueueRequest::new(f.algorithm.id, f.splitset.id).with_hide_test(true)).expect("queue");
    assert!(!queue.hide_test);
}

#[test]
fn test_run_persists_predictors_and_is_idempotent() {
    let f = regression(6, Some(0.2));
    let queue = Queue::create(&f.ctx, QueueRequest::new(f.algorithm.id, f.splitset.id).with_repeat_count(2))
        .expect("queue");
    let toy = Toy::default();

    let summary = queue.run_jobs(&f.ctx, &toy).expect("run");
    assert_eq!(summary, RunSummary { completed: 2, skipped: 0, interrupted: false });
    assert_eq!(toy.train_calls.get(), 2);
    assert!(cache_is_empty(&f));

    let queue = queue.refresh(&f.ctx).expect("refresh");
    assert_eq!(queue.runs_completed, 2);
    let status = queue.status(&f.ctx).expect("status");
    assert_eq!((status.succeeded, status.pending, status.failed), (1, 0, 0));

    let predictors = queue.predictors(&f.ctx).expect("predictors");
    assert_eq!(predictors.len(), 2);
    let prediction = &predictors[0].predictions(&f.ctx).expect("predictions")[0];
    assert!(prediction.metrics.contains_key(&Partition::Train));
    assert!(prediction.metrics.contains_key(&Partition::Test));
    let train_loss = prediction.metrics[&Partition::Train].get(Metric::Loss).expect("loss");
    assert!(train_loss < 1e-12);
    assert_eq!(prediction.metrics_aggregate[&Metric::Loss].minimum, train_loss.min(
        prediction.metrics[&Partition::Test].get(Metric::Loss).expect("loss")
    ));

    let model = predictors[0].model(&f.ctx, &toy).expect("model");
    assert_eq!(model.column, 0);
    assert!(model.bias.abs() < 1e-12);

    let again = Toy::default();
    let summary = queue.run_jobs(&f.ctx, &again).expect("rerun");
    assert_eq!(summary, RunSummary { completed: 0, skipped: 2, interrupted: false });
    assert_eq!(again.train_calls.get(), 0);
}

#[test]
fn test_permutation_importance_on_train_partition() {
    let f = regression(7, Some(0.2));
    let queue = Queue::create(&f.ctx, QueueRequest::new(f.algorithm.id, f.splitset.id).with_permute_count(3))
        .expect("queue");
    queue.run_jobs(&f.ctx, &Toy::default()).expect("run");

    let predictor = &queue.predictors(&f.ctx).expect("predictors")[0];
    let prediction = &predictor.predictions(&f.ctx).expect("predictions")[0];
    let importance = prediction.feature_importance.as_ref().expect("importance");
    let columns = &importance[&f.feature.id];
    assert_eq!(columns["a"].loss_impacts.len(), 3);
    assert!(columns["a"].median > 0.0);
    assert_eq!(columns["b"].median, 0.0);
    assert_eq!(prediction.importance_ranking(f.feature.id)[0].0, "a");
}

#[test]
fn test_zero_permute_count_skips_importance() {
    let f = regression(8, Some(0.2));
    let queue = Queue::create(&f.ctx, QueueRequest::new(f.algorithm.id, f.splitset.id).with_permute_count(0))
        .expect("queue");
    queue.run_jobs(&f.ctx, &Toy::default()).expect("run");
    let predictor = &queue.predictors(&f.ctx).expect("predictors")[0];
    assert!(predictor.predictions(&f.ctx).expect("predictions")[0].feature_importance.is_none());
}

#[test]
fn test_folded_run_evaluates_fold_partitions() {
    let f = regression(9, Some(0.2));
    let foldset = Foldset::make(&f.ctx, f.splitset.id, Some(3), None).expect("foldset");
    let queue = Queue::create(
        &f.ctx,
        QueueRequest::new(f.algorithm.id, f.splitset.id).with_foldset(foldset.id).with_hide_test(true),
    )
    .expect("queue");
    let summary = queue.run_jobs(&f.ctx, &Toy::default()).expect("run");
    assert_eq!(summary.completed, 3);
    assert!(cache_is_empty(&f));

    let rows = queue.metrics_table(&f.ctx).expect("metrics");
    let partitions: std::collections::BTreeSet<Partition> = rows.iter().map(|r| r.partition).collect();
    assert_eq!(
        partitions.into_iter().collect::<Vec<_>>(),
        vec![Partition::FoldsTrainCombined, Partition::FoldValidation]
    );
    let folds: std::collections::BTreeSet<Option<usize>> = rows.iter().map(|r| r.fold_index).collect();
    assert_eq!(folds.len(), 3);
    assert!(!queue.metrics_aggregate_table(&f.ctx).expect("aggregate").is_empty());
}

#[test]
fn test_null_return_fails_the_job_and_cleans_up() {
    let f = regression(10, Some(0.2));
    let queue = Queue::create(&f.ctx, QueueRequest::new(f.algorithm.id, f.splitset.id)).expect("queue");
    let toy = Toy { null_from: Some("optimize"), ..Toy::default() };

    let err = queue.run_jobs(&f.ctx, &toy).unwrap_err();
    assert!(matches!(err, Error::NullReturn { callable: "optimize" }));
    assert!(cache_is_empty(&f));
    assert!(queue.predictors(&f.ctx).expect("predictors").is_empty());
    assert_eq!(queue.jobs(&f.ctx).expect("jobs")[0].status, JobStatus::Failed);

    let summary = queue.run_jobs(&f.ctx, &Toy::default()).expect("retry");
    assert_eq!(summary.completed, 1);
    assert_eq!(queue.jobs(&f.ctx).expect("jobs")[0].status, JobStatus::Succeeded);
}

#[test]
fn test_interrupt_stops_between_units_and_resumes() {
    let f = regression(11, Some(0.2));
    let queue = Queue::create(&f.ctx, QueueRequest::new(f.algorithm.id, f.splitset.id).with_repeat_count(3))
        .expect("queue");
    let toy = Toy { interrupt: Some((f.ctx.interrupt_handle(), 1)), ..Toy::default() };

    let summary = queue.run_jobs(&f.ctx, &toy).expect("run");
    assert_eq!(summary, RunSummary { completed: 1, skipped: 0, interrupted: true });
    assert!(cache_is_empty(&f));
    assert!(!f.ctx.is_interrupted());

    let summary = queue.run_jobs(&f.ctx, &Toy::default()).expect("resume");
    assert_eq!(summary, RunSummary { completed: 2, skipped: 1, interrupted: false });
    assert_eq!(queue.refresh(&f.ctx).expect("refresh").runs_completed, 3);
}

/// Another process finishes the same unit while this one is training.
struct Racer<'a> {
    toy: Toy,
    ctx: &'a Context,
    queue_id: i64,
    job_id: i64,
}

impl Architecture for Racer<'_> {
    type Model = Offset;
    type Loss = ();
    type Optimizer = ();

    fn build(&self, shapes: &[Vec<usize>], label: Option<&[usize]>, hp: &Hyperparameters) -> Result<Option<Offset>> {
        self.toy.build(shapes, label, hp)
    }

    fn lose(&self, hp: &Hyperparameters) -> Result<Option<()>> {
        self.toy.lose(hp)
    }

    fn optimize(&self, model: &Offset, hp: &Hyperparameters) -> Result<Option<()>> {
        self.toy.optimize(model, hp)
    }

    fn train(
        &self,
        model: Offset,
        loser: &(),
        optimizer: &mut (),
        samples_train: &Samples,
        samples_evaluate: Option<&Samples>,
        hp: &Hyperparameters,
    ) -> Result<Option<Trained<Offset>>> {
        let now = chrono::Utc::now();
        let mut winner = Predictor {
            id: 0,
            queue_id: self.queue_id,
            job_id: self.job_id,
            repeat_index: 0,
            model_sha256: self.ctx.store().put_artifact(b"{}")?,
            model_format_version: 1,
            input_shapes: InputShapes { feature_shapes: vec![vec![2]], label_shape: Some(vec![1]) },
            history: None,
            time_started: now,
            time_succeeded: now,
            duration_seconds: 0.0,
        };
        self.ctx.store().insert(&mut winner)?;
        self.toy.train(model, loser, optimizer, samples_train, samples_evaluate, hp)
    }

    fn predict(&self, model: &Offset, features: &[ArrayD<f64>]) -> Result<Option<Predicted>> {
        self.toy.predict(model, features)
    }

    fn loss(&self, loser: &(), predicted: &Predicted, labels: &ArrayD<f64>) -> Result<f64> {
        self.toy.loss(loser, predicted, labels)
    }

    fn encode_model(&self, model: &Offset) -> Result<Vec<u8>> {
        self.toy.encode_model(model)
    }

    fn decode_model(&self, bytes: &[u8]) -> Result<Offset> {
        self.toy.decode_model(bytes)
    }
}

#[test]
fn test_duplicate_unit_raises_without_orphan() {
    let f = regression(12, Some(0.2));
    let queue = Queue::create(&f.ctx, QueueRequest::new(f.algorithm.id, f.splitset.id)).expect("queue");
    let job_id = queue.jobs(&f.ctx).expect("jobs")[0].id;
    let racer = Racer { toy: Toy::default(), ctx: &f.ctx, queue_id: queue.id, job_id };

    let err = queue.run_jobs(&f.ctx, &racer).unwrap_err();
    assert!(matches!(err, Error::DuplicateRun { repeat_index: 0, .. }));
    let predictors = queue.predictors(&f.ctx).expect("predictors");
    assert_eq!(predictors.len(), 1);
    assert!(predictors[0].predictions(&f.ctx).expect("predictions").is_empty());
    assert_ne!(queue.jobs(&f.ctx).expect("jobs")[0].status, JobStatus::Failed);
    assert!(cache_is_empty(&f));
}

#[test]
fn test_infer_on_new_splitset() {
    let f = regression(13, Some(0.2));
    let queue = Queue::create(&f.ctx, QueueRequest::new(f.algorithm.id, f.splitset.id)).expect("queue");
    let toy = Toy::default();
    queue.run_jobs(&f.ctx, &toy).expect("run");
    let predictor = queue.predictors(&f.ctx).expect("predictors").remove(0);

    let a: Vec<f64> = (0..8).map(|i| 100.0 + i as f64).collect();
    let b = vec![1.0; 8];
    let fresh = Tabular::from_columns(&[("a", Dtype::Float, &a), ("b", Dtype::Float, &b), ("y", Dtype::Float, &a)])
        .expect("dataset");
    let dataset_id = f.ctx.register_dataset(fresh).expect("register");
    let feature = Feature::create(&f.ctx, dataset_id, Some(vec!["a".into(), "b".into()]), None).expect("feature");
    let label = Label::create(&f.ctx, dataset_id, vec!["y".into()]).expect("label");
    let splitset = Splitset::make(&f.ctx, SplitRequest::new(vec![feature.id]).with_label(label.id)).expect("splitset");

    let prediction = predictor.infer(&f.ctx, &toy, splitset.id).expect("infer");
    assert_eq!(prediction.splitset_id, Some(splitset.id));
    let values = prediction.predictions(Partition::Infer).expect("stored").expect("infer partition");
    assert_eq!(values.len(), 8);
    assert!((values[[0]] - 100.0).abs() < 1e-9);
    assert!(prediction.metrics[&Partition::Infer].get(Metric::Mse).expect("mse") < 1e-12);
    assert!(prediction.feature_importance.is_none());
    assert_eq!(toy.train_calls.get(), 1);
}

#[test]
fn test_infer_rejects_other_schema() {
    let f = regression(14, Some(0.2));
    let queue = Queue::create(&f.ctx, QueueRequest::new(f.algorithm.id, f.splitset.id)).expect("queue");
    queue.run_jobs(&f.ctx, &Toy::default()).expect("run");
    let predictor = queue.predictors(&f.ctx).expect("predictors").remove(0);

    let values = vec![1.0; 5];
    let other = Tabular::from_columns(&[("c", Dtype::Float, &values), ("d", Dtype::Float, &values)]).expect("dataset");
    let dataset_id = f.ctx.register_dataset(other).expect("register");
    let feature = Feature::create(&f.ctx, dataset_id, None, None).expect("feature");
    let splitset = Splitset::make(&f.ctx, SplitRequest::new(vec![feature.id])).expect("splitset");
    assert!(predictor.infer(&f.ctx, &Toy::default(), splitset.id).unwrap_err().is_config_error());
}

#[test]
fn test_binary_classification_metrics() {
    let cache = tempfile::tempdir().expect("temp dir creation should succeed");
    let ctx = context_in(15, cache.path());
    let classes: Vec<f64> = (0..40).map(|i| (i % 2) as f64).collect();
    let dataset = Tabular::from_columns(&[("x", Dtype::Float, &classes), ("cls", Dtype::Int, &classes)]).expect("dataset");
    let dataset_id = ctx.register_dataset(dataset).expect("register");
    let feature = Feature::create(&ctx, dataset_id, Some(vec!["x".into()]), None).expect("feature");
    let label = Label::create(&ctx, dataset_id, vec!["cls".into()]).expect("label");
    let splitset =
        Splitset::make(&ctx, SplitRequest::new(vec![feature.id]).with_label(label.id).with_size_test(0.25)).expect("split");
    let algorithm = Algorithm::create(&ctx, "toy", AnalysisType::ClassificationBinary, None).expect("algorithm");
    let queue = Queue::create(&ctx, QueueRequest::new(algorithm.id, splitset.id).with_permute_count(0)).expect("queue");

    queue.run_jobs(&ctx, &Toy { classify: true, ..Toy::default() }).expect("run");
    let predictor = &queue.predictors(&ctx).expect("predictors")[0];
    let prediction = &predictor.predictions(&ctx).expect("predictions")[0];
    let test = &prediction.metrics[&Partition::Test];
    assert_eq!(test.get(Metric::Accuracy), Some(1.0));
    assert_eq!(test.get(Metric::RocAuc), Some(1.0));
    assert_eq!(prediction.probabilities[&Partition::Test].shape, vec![10]);
    assert_eq!(predictor.hyperparameters(&ctx).expect("hyperparameters"), Hyperparameters::new());
}

//! End-to-end queue runs against a file-backed store.

mod common;

use approx::assert_abs_diff_eq;
use chrono::Utc;
use common::{context, linear_table, Line, LineFit};
use ensayo::eval::{permutation_importance, Metric};
use ensayo::feature::{Feature, Label};
use ensayo::pipeline::{ColumnFilter, Encoderset, FeatureCoder, LabelCoder};
use ensayo::queue::{
    Algorithm, AnalysisType, Architecture, Hyperparameters, InputShapes, Predicted, Predictor, Queue, QueueRequest,
    Samples, Trained,
};
use ensayo::split::{Foldset, Partition, SplitRequest, Splitset};
use ensayo::{Context, Error, Result};
use ndarray::{ArrayD, IxDyn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::Value;
use std::cell::Cell;
use std::path::Path;

struct Experiment {
    dataset_id: i64,
    feature: Feature,
    label: Label,
    splitset: Splitset,
    queue: Queue,
}

/// Scaled features and label, a 20% test split and `folds` folds when given.
fn experiment(ctx: &Context, folds: Option<usize>) -> Experiment {
    let dataset_id = ctx.register_dataset(linear_table(40)).expect("dataset");
    let feature = Feature::create(ctx, dataset_id, Some(vec!["x".into(), "noise".into()]), None).expect("feature");
    let encoderset = Encoderset::create(ctx, feature.id, None).expect("encoderset");
    FeatureCoder::create(ctx, encoderset.id, "standard", Value::Null, ColumnFilter::all()).expect("coder");
    let label = Label::create(ctx, dataset_id, vec!["y".into()]).expect("label");
    LabelCoder::create(ctx, label.id, "standard", Value::Null).expect("label coder");

    let splitset = Splitset::make(ctx, SplitRequest::new(vec![feature.id]).with_label(label.id).with_size_test(0.2))
        .expect("splitset");
    let algorithm = Algorithm::create(ctx, "line", AnalysisType::Regression, None).expect("algorithm");
    let mut request = QueueRequest::new(algorithm.id, splitset.id);
    if let Some(fold_count) = folds {
        let foldset = Foldset::make(ctx, splitset.id, Some(fold_count), None).expect("foldset");
        request = request.with_foldset(foldset.id);
    }
    let queue = Queue::create(ctx, request).expect("queue");
    Experiment { dataset_id, feature, label, splitset, queue }
}

fn store_path(dir: &Path) -> String {
    dir.join("ensayo.db").to_string_lossy().into_owned()
}

#[test]
fn test_predictions_decode_to_label_units() {
    let dir = tempfile::tempdir().expect("temp dir creation should succeed");
    let ctx = context(11, &store_path(dir.path()), dir.path());
    let exp = experiment(&ctx, None);

    let summary = exp.queue.run_jobs(&ctx, &LineFit::default()).expect("run");
    assert_eq!(summary.completed, 1);

    let predictor = &exp.queue.predictors(&ctx).expect("predictors")[0];
    let prediction = predictor.predictions(&ctx).expect("predictions").remove(0);
    let test = &exp.splitset.samples[&Partition::Test];
    let decoded = prediction.predictions(Partition::Test).expect("stored").expect("test predictions");
    assert_eq!(decoded.shape(), &[test.len()]);
    for (value, &sample) in decoded.iter().zip(test) {
        let expected = 2.0 * (sample as f64 / 2.0) + 1.0;
        assert_abs_diff_eq!(*value, expected, epsilon = 1e-6);
    }

    let r2 = prediction.metrics[&Partition::Test].get(Metric::R2).expect("r2");
    assert_abs_diff_eq!(r2, 1.0, epsilon = 1e-9);
    let ranking = prediction.importance_ranking(exp.feature.id);
    assert_eq!(ranking.first().map(|(name, _)| name.as_str()), Some("x"));
}

#[test]
fn test_rerun_in_new_process_skips_and_infers_from_stored_fits() {
    let dir = tempfile::tempdir().expect("temp dir creation should succeed");
    let path = store_path(dir.path());
    let (dataset_id, queue_id) = {
        let ctx = context(5, &path, dir.path());
        let exp = experiment(&ctx, Some(3));
        let summary = exp.queue.run_jobs(&ctx, &LineFit::default()).expect("run");
        assert_eq!(summary.completed, 3);
        assert_eq!(exp.label.dataset_id, exp.dataset_id);
        (exp.dataset_id, exp.queue.id)
    };

    let ctx = context(6, &path, dir.path());
    ctx.attach_dataset(dataset_id, linear_table(40)).expect("attach");
    let queue: Queue = ctx.store().get(queue_id).expect("queue");
    let arch = LineFit::default();
    let summary = queue.run_jobs(&ctx, &arch).expect("rerun");
    assert_eq!((summary.completed, summary.skipped), (0, 3));
    assert_eq!(arch.train_calls.get(), 0);
    let status = queue.status(&ctx).expect("status");
    assert_eq!((status.run_count, status.runs_completed, status.succeeded), (3, 3, 3));

    let fresh_id = ctx.register_dataset(linear_table(12)).expect("dataset");
    let fresh_feature =
        Feature::create(&ctx, fresh_id, Some(vec!["x".into(), "noise".into()]), None).expect("feature");
    let fresh_label = Label::create(&ctx, fresh_id, vec!["y".into()]).expect("label");
    let fresh = Splitset::make(&ctx, SplitRequest::new(vec![fresh_feature.id]).with_label(fresh_label.id))
        .expect("splitset");

    let predictor = &queue.predictors(&ctx).expect("predictors")[0];
    let prediction = predictor.infer(&ctx, &arch, fresh.id).expect("inference");
    assert_eq!(prediction.splitset_id, Some(fresh.id));
    let values = prediction.predictions(Partition::Infer).expect("stored").expect("infer predictions");
    for (i, value) in values.iter().enumerate() {
        assert_abs_diff_eq!(*value, i as f64 + 1.0, epsilon = 1e-6);
    }
    let table = queue.metrics_table(&ctx).expect("metrics");
    assert!(table.iter().all(|row| row.partition != Partition::Infer));
}

#[test]
fn test_permutation_importance_reports_every_trial() {
    let features = ArrayD::from_shape_vec(IxDyn(&[20, 1]), (0..20).map(f64::from).collect()).expect("shape");
    let untouched = features.clone();
    let baseline = 0.5;
    let mut rng = StdRng::seed_from_u64(3);
    let importance = permutation_importance(&features, 1, &["x".to_string()], 5, baseline, &mut rng, |candidate| {
        Ok(candidate.iter().zip(untouched.iter()).map(|(a, b)| (a - b).powi(2)).sum::<f64>() / 20.0)
    })
    .expect("importance");

    let x = &importance["x"];
    assert_eq!(x.loss_impacts.len(), 5);
    let mut raw: Vec<f64> = x.loss_impacts.iter().map(|impact| impact + baseline).collect();
    raw.sort_by(f64::total_cmp);
    assert_abs_diff_eq!(x.median, raw[2] - baseline, epsilon = 1e-12);
    assert_eq!(features, untouched);
}

/// Trains like [`LineFit`] but lets a second process claim the unit first.
struct Racer<'a> {
    inner: LineFit,
    rival: &'a Context,
    queue_id: i64,
    job_id: i64,
    raced: Cell<bool>,
}

impl Architecture for Racer<'_> {
    type Model = Line;
    type Loss = ();
    type Optimizer = ();

    fn build(&self, feature_shapes: &[Vec<usize>], label_shape: Option<&[usize]>, hp: &Hyperparameters) -> Result<Option<Line>> {
        self.inner.build(feature_shapes, label_shape, hp)
    }

    fn lose(&self, hp: &Hyperparameters) -> Result<Option<()>> {
        self.inner.lose(hp)
    }

    fn optimize(&self, model: &Line, hp: &Hyperparameters) -> Result<Option<()>> {
        self.inner.optimize(model, hp)
    }

    fn train(
        &self,
        model: Line,
        loser: &(),
        optimizer: &mut (),
        samples_train: &Samples,
        samples_evaluate: Option<&Samples>,
        hp: &Hyperparameters,
    ) -> Result<Option<Trained<Line>>> {
        if !self.raced.replace(true) {
            let mut rival = Predictor {
                id: 0,
                queue_id: self.queue_id,
                job_id: self.job_id,
                repeat_index: 0,
                model_sha256: "rival".to_string(),
                model_format_version: 1,
                input_shapes: InputShapes::of(samples_train),
                history: None,
                time_started: Utc::now(),
                time_succeeded: Utc::now(),
                duration_seconds: 0.0,
            };
            self.rival.store().insert(&mut rival)?;
        }
        self.inner.train(model, loser, optimizer, samples_train, samples_evaluate, hp)
    }

    fn predict(&self, model: &Line, features: &[ArrayD<f64>]) -> Result<Option<Predicted>> {
        self.inner.predict(model, features)
    }

    fn loss(&self, loser: &(), predicted: &Predicted, labels: &ArrayD<f64>) -> Result<f64> {
        self.inner.loss(loser, predicted, labels)
    }

    fn encode_model(&self, model: &Line) -> Result<Vec<u8>> {
        self.inner.encode_model(model)
    }

    fn decode_model(&self, bytes: &[u8]) -> Result<Line> {
        self.inner.decode_model(bytes)
    }
}

#[test]
fn test_concurrent_unit_keeps_single_predictor() {
    let dir = tempfile::tempdir().expect("temp dir creation should succeed");
    let path = store_path(dir.path());
    let ctx = context(9, &path, dir.path());
    let rival = context(10, &path, dir.path());
    let exp = experiment(&ctx, None);
    let job_id = exp.queue.jobs(&ctx).expect("jobs")[0].id;

    let racer =
        Racer { inner: LineFit::default(), rival: &rival, queue_id: exp.queue.id, job_id, raced: Cell::new(false) };
    let err = exp.queue.run_jobs(&ctx, &racer).unwrap_err();
    assert!(matches!(err, Error::DuplicateRun { repeat_index: 0, .. }), "unexpected error: {err}");

    let predictors = exp.queue.predictors(&ctx).expect("predictors");
    assert_eq!(predictors.len(), 1);
    assert_eq!(predictors[0].model_sha256, "rival");
    assert!(predictors[0].predictions(&ctx).expect("predictions").is_empty());
}

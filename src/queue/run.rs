//! The resumable run loop.
//!
//! Per fold (or once when unfolded) the partitions are staged a single time
//! and snapshotted to the cache directory. Each (job, repeat) unit then
//! builds, trains and evaluates a model and persists a Predictor plus a
//! Prediction. A unit counts as done once its Predictor exists, so a rerun
//! skips it.

use super::algorithm::{required, Architecture};
use super::cache::{self, Staged};
use super::predictor::{evaluate, Evaluation, Predictor};
use super::stage::{stage, InputShapes, StagingKeys};
use super::{Job, JobStatus, Queue};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::feature::{Feature, Label};
use crate::pipeline::fitted::FitGroup;
use crate::pipeline::preprocess::FitSource;
use crate::split::{Fold, Partition, Partitions, Splitset};
use crate::store::is_constraint_violation;
use chrono::Utc;
use serde::Serialize;
use std::time::Instant;

/// Outcome of one [`Queue::run_jobs`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Units trained and evaluated by this call.
    pub completed: usize,
    /// Units that already had a Predictor.
    pub skipped: usize,
    pub interrupted: bool,
}

/// Everything shared by the units of one run.
struct RunScope<'a> {
    splitset: &'a Splitset,
    features: &'a [Feature],
    label: Option<&'a Label>,
    analysis_type: super::AnalysisType,
}

enum FoldOutcome {
    Finished,
    Interrupted,
}

impl Queue {
    fn unit_done(&self, ctx: &Context, job_id: i64, repeat_index: usize) -> Result<bool> {
        let existing: Option<Predictor> = ctx.store().find_one(&[
            ("queue_id", Some(self.id)),
            ("job_id", Some(job_id)),
            ("repeat_index", Some(repeat_index as i64)),
        ])?;
        Ok(existing.is_some())
    }

    /// Train and evaluate every (job, repeat) unit without a Predictor.
    ///
    /// An interrupt raised through [`Context::interrupt`] stops the loop
    /// before the next unit; completed units stay valid and a later call
    /// resumes from there. Any other failure removes the cache snapshot, marks
    /// the job failed and propagates.
    pub fn run_jobs<A: Architecture>(&self, ctx: &Context, arch: &A) -> Result<RunSummary> {
        let splitset = self.splitset(ctx)?;
        let features = splitset.features(ctx)?;
        let label = splitset.label(ctx)?;
        let scope = RunScope {
            splitset: &splitset,
            features: &features,
            label: label.as_ref(),
            analysis_type: self.algorithm(ctx)?.analysis_type,
        };
        let jobs = self.jobs(ctx)?;
        let folds: Vec<Option<Fold>> = match self.foldset(ctx)? {
            Some(foldset) => foldset.folds(ctx)?.into_iter().map(Some).collect(),
            None => vec![None],
        };

        let mut summary = RunSummary::default();
        for fold in &folds {
            let fold_id = fold.as_ref().map(|f| f.id);
            let fold_jobs: Vec<&Job> = jobs.iter().filter(|j| j.fold_id == fold_id).collect();

            let mut units = Vec::new();
            for repeat_index in 0..self.repeat_count {
                for job in &fold_jobs {
                    if self.unit_done(ctx, job.id, repeat_index)? {
                        summary.skipped += 1;
                    } else {
                        units.push((job.id, repeat_index));
                    }
                }
            }
            if units.is_empty() {
                continue;
            }

            let outcome = self.run_fold(ctx, arch, &scope, fold.as_ref(), &fold_jobs, &units, &mut summary)?;
            if let FoldOutcome::Interrupted = outcome {
                summary.interrupted = true;
                break;
            }
        }

        tracing::info!(
            queue_id = self.id,
            completed = summary.completed,
            skipped = summary.skipped,
            interrupted = summary.interrupted,
            "queue run finished"
        );
        Ok(summary)
    }

    #[allow(clippy::too_many_arguments)]
    fn run_fold<A: Architecture>(
        &self,
        ctx: &Context,
        arch: &A,
        scope: &RunScope<'_>,
        fold: Option<&Fold>,
        fold_jobs: &[&Job],
        units: &[(i64, usize)],
        summary: &mut RunSummary,
    ) -> Result<FoldOutcome> {
        let mut partitions: Partitions = match fold {
            Some(fold) => fold.partitions(scope.splitset),
            None => scope.splitset.samples.clone(),
        };
        if self.hide_test {
            partitions.remove(&Partition::Test);
        }
        let keys = StagingKeys::for_partitions(&partitions)?;
        let group = FitGroup { queue_id: self.id, fold_id: fold.map(|f| f.id) };
        let job_ids: Vec<i64> = fold_jobs.iter().map(|j| j.id).collect();

        let path = cache::cache_path(ctx.cache_dir(), self.id, fold.map(|f| f.fold_index));
        let mut first = Some(stage(
            ctx,
            scope.features,
            scope.features,
            scope.label,
            scope.label,
            &partitions,
            Some(&partitions),
            FitSource::Train { group, job_ids: &job_ids },
        )?);
        if let Some(staged) = &first {
            cache::write(&path, staged)?;
        }
        tracing::info!(
            queue_id = self.id,
            fold_index = fold.map(|f| f.fold_index),
            units = units.len(),
            "fold staged"
        );

        for &(job_id, repeat_index) in units {
            if ctx.is_interrupted() {
                cache::remove(&path);
                ctx.clear_interrupt();
                tracing::info!(queue_id = self.id, completed = summary.completed, "queue interrupted; rerun to resume");
                return Ok(FoldOutcome::Interrupted);
            }

            let result = match first.take() {
                Some(staged) => Ok(staged),
                None => cache::read(&path),
            }
            .and_then(|staged| self.run_unit(ctx, arch, scope, &staged, keys, group, job_id, repeat_index));

            if let Err(e) = result {
                cache::remove(&path);
                if !matches!(e, Error::DuplicateRun { .. }) {
                    mark_failed(ctx, job_id);
                }
                tracing::error!(queue_id = self.id, job_id, repeat_index, error = %e, "unit failed");
                return Err(e);
            }
            summary.completed += 1;
        }

        cache::remove(&path);
        Ok(FoldOutcome::Finished)
    }

    #[allow(clippy::too_many_arguments)]
    fn run_unit<A: Architecture>(
        &self,
        ctx: &Context,
        arch: &A,
        scope: &RunScope<'_>,
        staged: &Staged,
        keys: StagingKeys,
        group: FitGroup,
        job_id: i64,
        repeat_index: usize,
    ) -> Result<()> {
        let mut job: Job = ctx.store().get(job_id)?;
        job.set_status(ctx, JobStatus::Running)?;
        let hp = job.hyperparameters(ctx)?;

        let train = staged
            .get(&keys.train)
            .ok_or_else(|| Error::Internal(format!("{} partition was not staged", keys.train)))?;
        let evaluation = keys.evaluation.and_then(|p| staged.get(&p));
        let input_shapes = InputShapes::of(train);

        let time_started = Utc::now();
        let clock = Instant::now();
        let model = required(
            arch.build(&input_shapes.feature_shapes, input_shapes.label_shape.as_deref(), &hp)?,
            "build",
        )?;
        let loser = required(arch.lose(&hp)?, "lose")?;
        let mut optimizer = required(arch.optimize(&model, &hp)?, "optimize")?;
        let trained = required(arch.train(model, &loser, &mut optimizer, train, evaluation, &hp)?, "train")?;
        let model_sha256 = ctx.store().put_artifact(&arch.encode_model(&trained.model)?)?;

        if self.unit_done(ctx, job_id, repeat_index)? {
            return Err(Error::DuplicateRun { queue: self.id, job: job_id, repeat_index });
        }
        let mut predictor = Predictor {
            id: 0,
            queue_id: self.id,
            job_id,
            repeat_index,
            model_sha256,
            model_format_version: arch.model_format_version(),
            input_shapes,
            history: trained.history,
            time_started,
            time_succeeded: Utc::now(),
            duration_seconds: clock.elapsed().as_secs_f64(),
        };
        match ctx.store().insert(&mut predictor) {
            Err(e) if is_constraint_violation(&e) => {
                return Err(Error::DuplicateRun { queue: self.id, job: job_id, repeat_index });
            }
            other => {
                other?;
            }
        }

        let eval = Evaluation {
            analysis_type: scope.analysis_type,
            supervision: scope.splitset.supervision,
            features: scope.features,
            label: scope.label,
            fit: FitSource::Trained { group, job_id },
            key_train: Some(keys.train),
            permute_count: self.permute_count,
            splitset_id: None,
        };
        if let Err(e) = evaluate(ctx, arch, &predictor, &trained.model, &loser, staged, &eval) {
            if let Err(cleanup) = ctx.store().delete::<Predictor>(predictor.id) {
                tracing::warn!(predictor_id = predictor.id, error = %cleanup, "failed to remove predictor of a failed unit");
            }
            return Err(e);
        }

        self.record_progress(ctx, &mut job)?;
        tracing::info!(
            queue_id = self.id,
            job_id,
            repeat_index,
            predictor_id = predictor.id,
            seconds = predictor.duration_seconds,
            "unit finished"
        );
        Ok(())
    }

    fn record_progress(&self, ctx: &Context, job: &mut Job) -> Result<()> {
        let mut queue = self.refresh(ctx)?;
        queue.runs_completed = ctx.store().count::<Predictor>(&[("queue_id", Some(self.id))])?;
        ctx.store().update(&queue)?;

        let done = ctx.store().count::<Predictor>(&[("job_id", Some(job.id))])?;
        let status = if done >= self.repeat_count { JobStatus::Succeeded } else { JobStatus::Running };
        job.set_status(ctx, status)
    }
}

fn mark_failed(ctx: &Context, job_id: i64) {
    let marked = ctx.store().get::<Job>(job_id).and_then(|mut job| job.set_status(ctx, JobStatus::Failed));
    if let Err(e) = marked {
        tracing::warn!(job_id, error = %e, "failed to mark job as failed");
    }
}

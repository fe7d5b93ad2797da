//! Cross-validation folds over a splitset's training partition.

use super::kfold::{KFold, StratifiedKFold};
use super::splitset::{effective_bin_count, stratify_vector, Splitset, Supervision};
use super::stratify::{self, StratifyVector};
use super::{Partition, Partitions};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::store::Entity;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Fold count used when none is requested.
pub const DEFAULT_FOLD_COUNT: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Foldset {
    #[serde(default)]
    pub id: i64,
    pub splitset_id: i64,
    pub fold_count: usize,
    pub random_state: u32,
    pub bin_count: Option<usize>,
}

impl Entity for Foldset {
    const TABLE: &'static str = "foldsets";
    const NAME: &'static str = "Foldset";

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn keys(&self) -> Vec<(&'static str, Option<i64>)> {
        vec![("splitset_id", Some(self.splitset_id))]
    }
}

/// One rotation of a foldset: `fold_validation` is the left-out slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fold {
    #[serde(default)]
    pub id: i64,
    pub foldset_id: i64,
    pub fold_index: usize,
    pub folds_train_combined: Vec<usize>,
    pub fold_validation: Vec<usize>,
}

impl Entity for Fold {
    const TABLE: &'static str = "folds";
    const NAME: &'static str = "Fold";

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn keys(&self) -> Vec<(&'static str, Option<i64>)> {
        vec![("foldset_id", Some(self.foldset_id))]
    }
}

impl Fold {
    /// The splitset's partitions with `train` replaced by this fold's slices.
    pub fn partitions(&self, splitset: &Splitset) -> Partitions {
        let mut partitions: Partitions =
            splitset.samples.iter().filter(|(p, _)| **p != Partition::Train).map(|(p, s)| (*p, s.clone())).collect();
        partitions.insert(Partition::FoldsTrainCombined, self.folds_train_combined.clone());
        partitions.insert(Partition::FoldValidation, self.fold_validation.clone());
        partitions
    }
}

impl Foldset {
    /// Derive `fold_count` folds from the training partition of a splitset.
    pub fn make(
        ctx: &Context,
        splitset_id: i64,
        fold_count: Option<usize>,
        bin_count: Option<usize>,
    ) -> Result<Self> {
        let splitset: Splitset = ctx.store().get(splitset_id)?;
        let fold_count = fold_count.unwrap_or(DEFAULT_FOLD_COUNT);
        if fold_count < 2 {
            return Err(Error::config(format!("cross validation requires multiple folds, got fold_count={fold_count}")));
        }
        if fold_count == 2 {
            tracing::warn!(splitset_id, "two folds requested; a validation split may serve better");
        }

        let train = splitset.train_samples().to_vec();
        let train_count = train.len();
        if fold_count > train_count {
            return Err(Error::config(format!(
                "fold_count={fold_count} exceeds the {train_count} training samples"
            )));
        }

        let vector = match splitset.supervision {
            Supervision::Supervised => {
                let label = splitset.label(ctx)?;
                let features = splitset.features(ctx)?;
                let first = features
                    .first()
                    .ok_or_else(|| Error::Internal(format!("splitset {splitset_id} has no features")))?;
                stratify_vector(ctx, label.as_ref(), first, None)?
            }
            Supervision::Unsupervised => match splitset.unsupervised_stratify_col.as_deref() {
                Some(column) => {
                    let features = splitset.features(ctx)?;
                    let first = features
                        .first()
                        .ok_or_else(|| Error::Internal(format!("splitset {splitset_id} has no features")))?;
                    stratify_vector(ctx, None, first, Some(column))?
                }
                None => {
                    if bin_count.is_some() {
                        return Err(Error::config(
                            "bin_count requires a label or an unsupervised_stratify_col on the splitset",
                        ));
                    }
                    None
                }
            },
        };
        let vector = vector.map(|v| v.subset(&train));

        let default_bins = ctx.config().default_bin_count;
        let mut effective_bins = bin_count;
        if let Some(vector) = &vector {
            match vector {
                StratifyVector::Float(_) => {
                    effective_bins = effective_bin_count(vector, bin_count.or(splitset.bin_count), default_bins);
                }
                StratifyVector::Int(_) if bin_count.is_some() && splitset.bin_count.is_none() => {
                    tracing::warn!(
                        splitset_id,
                        "foldset bins integer values the splitset left unbinned; stratification may differ across partitions"
                    );
                }
                _ => {}
            }
        }

        if train_count % fold_count != 0 {
            tracing::warn!(
                train_count,
                fold_count,
                "training samples are not evenly divisible by fold_count; the last folds differ in size"
            );
        }

        let siblings = splitset.foldsets(ctx)?;
        let mut rng = ctx.rng()?;
        let random_state = loop {
            let candidate: u32 = rng.gen();
            if siblings.iter().all(|f| f.random_state != candidate) {
                break candidate;
            }
        };

        let positions = match &vector {
            Some(vector) => {
                let classes = stratify::classes(vector, effective_bins, default_bins)?;
                StratifiedKFold::new(fold_count).with_seed(u64::from(random_state)).split(&classes)?
            }
            None => KFold::new(fold_count).with_seed(u64::from(random_state)).split(train_count)?,
        };

        let mut foldset = Foldset { id: 0, splitset_id, fold_count, random_state, bin_count: effective_bins };
        ctx.store().atomically(|tx| {
            tx.insert(&mut foldset)?;
            for (fold_index, (combined, validation)) in positions.iter().enumerate() {
                let mut fold = Fold {
                    id: 0,
                    foldset_id: foldset.id,
                    fold_index,
                    folds_train_combined: combined.iter().map(|&p| train[p]).collect(),
                    fold_validation: validation.iter().map(|&p| train[p]).collect(),
                };
                tx.insert(&mut fold)?;
            }
            Ok(())
        })?;

        tracing::info!(foldset_id = foldset.id, splitset_id, fold_count, "foldset created");
        Ok(foldset)
    }

    /// Folds ordered by `fold_index`.
    pub fn folds(&self, ctx: &Context) -> Result<Vec<Fold>> {
        let mut folds: Vec<Fold> = ctx.store().find(&[("foldset_id", Some(self.id))])?;
        folds.sort_by_key(|f| f.fold_index);
        Ok(folds)
    }

    pub fn splitset(&self, ctx: &Context) -> Result<Splitset> {
        ctx.store().get(self.splitset_id)
    }
}

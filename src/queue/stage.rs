//! Preprocess every feature and the label once per fold group and slice the
//! results into partitions.

use super::algorithm::Samples;
use super::cache::Staged;
use crate::context::Context;
use crate::data::array::select_samples;
use crate::error::{Error, Result};
use crate::feature::{Feature, Label};
use crate::pipeline::preprocess::{preprocess_feature, preprocess_label, FitSource};
use crate::split::{Partition, Partitions};
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

/// Per-sample shapes handed to [`Architecture::build`](super::Architecture::build).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputShapes {
    pub feature_shapes: Vec<Vec<usize>>,
    pub label_shape: Option<Vec<usize>>,
}

impl InputShapes {
    pub fn of(samples: &Samples) -> Self {
        Self {
            feature_shapes: samples.features.iter().map(|f| f.shape()[1..].to_vec()).collect(),
            label_shape: samples.labels.as_ref().map(|l| l.shape()[1..].to_vec()),
        }
    }
}

/// Which partition trains and which one evaluates during training.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagingKeys {
    pub train: Partition,
    pub evaluation: Option<Partition>,
}

impl StagingKeys {
    /// `fold_validation` when folded, else `validation`, else `test`.
    pub fn for_partitions(partitions: &Partitions) -> Result<Self> {
        let train = if partitions.contains_key(&Partition::FoldsTrainCombined) {
            Partition::FoldsTrainCombined
        } else if partitions.contains_key(&Partition::Train) {
            Partition::Train
        } else {
            return Err(Error::config("staged partitions have no training partition"));
        };
        let evaluation = [Partition::FoldValidation, Partition::Validation, Partition::Test]
            .into_iter()
            .find(|p| partitions.contains_key(p));
        Ok(Self { train, evaluation })
    }
}

/// Run every chain with the trained features and label as chain owners.
///
/// `features` and `label` supply the values; `owners` and `label_owner` the
/// preprocessing chains. Training passes the same records for both.
#[allow(clippy::too_many_arguments)]
pub(crate) fn stage(
    ctx: &Context,
    features: &[Feature],
    owners: &[Feature],
    label: Option<&Label>,
    label_owner: Option<&Label>,
    partitions: &Partitions,
    fit_samples: Option<&Partitions>,
    fit: FitSource<'_>,
) -> Result<Staged> {
    let mut arrays = Vec::with_capacity(features.len());
    let mut first_shifted: Option<ArrayD<f64>> = None;
    for (i, (feature, owner)) in features.iter().zip(owners).enumerate() {
        let out = preprocess_feature(ctx, feature, owner, fit_samples, fit)?;
        if i == 0 {
            first_shifted = out.shifted;
        }
        arrays.push(out.features);
    }

    let labels = match (label, label_owner) {
        (Some(label), Some(owner)) => Some(preprocess_label(ctx, label, owner, fit_samples, fit)?),
        (Some(_), None) | (None, Some(_)) => {
            return Err(Error::config("a label needs a trained label chain to stage against"))
        }
        // Unsupervised targets: the windows shifted ahead, else the inputs themselves.
        (None, None) => match first_shifted {
            Some(shifted) => Some(shifted),
            None => arrays.first().cloned(),
        },
    };

    let mut staged = Staged::new();
    for (partition, samples) in partitions {
        staged.insert(
            *partition,
            Samples {
                features: arrays.iter().map(|a| select_samples(a, samples)).collect(),
                labels: labels.as_ref().map(|l| select_samples(l, samples)),
            },
        );
    }
    tracing::debug!(partitions = staged.len(), features = features.len(), "staged samples");
    Ok(staged)
}

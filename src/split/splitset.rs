//! Train / validation / test partitioning of one or more features.

use super::shuffle::train_test_split;
use super::stratify::{self, StratifyVector};
use super::{Partition, Partitions};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::feature::{Feature, Label};
use crate::pipeline::preprocess;
use crate::split::Foldset;
use crate::store::Entity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Supervision {
    Supervised,
    Unsupervised,
}

/// Requested share and realized count of one partition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PartitionSize {
    pub percent: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Splitset {
    #[serde(default)]
    pub id: i64,
    pub label_id: Option<i64>,
    pub feature_ids: Vec<i64>,
    pub samples: Partitions,
    pub sizes: BTreeMap<Partition, PartitionSize>,
    pub supervision: Supervision,
    pub has_test: bool,
    pub has_validation: bool,
    pub bin_count: Option<usize>,
    pub unsupervised_stratify_col: Option<String>,
    pub sample_count: usize,
    pub name: Option<String>,
    pub description: Option<String>,
}

impl Entity for Splitset {
    const TABLE: &'static str = "splitsets";
    const NAME: &'static str = "Splitset";

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn keys(&self) -> Vec<(&'static str, Option<i64>)> {
        vec![("label_id", self.label_id)]
    }
}

/// Join record between a splitset and each of its features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Featureset {
    #[serde(default)]
    pub id: i64,
    pub splitset_id: i64,
    pub feature_id: i64,
    pub position: usize,
}

impl Entity for Featureset {
    const TABLE: &'static str = "featuresets";
    const NAME: &'static str = "Featureset";

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn keys(&self) -> Vec<(&'static str, Option<i64>)> {
        vec![("splitset_id", Some(self.splitset_id)), ("feature_id", Some(self.feature_id))]
    }
}

/// Arguments for [`Splitset::make`].
#[derive(Debug, Clone, Default)]
pub struct SplitRequest {
    pub feature_ids: Vec<i64>,
    pub label_id: Option<i64>,
    pub size_test: Option<f64>,
    pub size_validation: Option<f64>,
    pub bin_count: Option<usize>,
    pub unsupervised_stratify_col: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
}

impl SplitRequest {
    pub fn new(feature_ids: Vec<i64>) -> Self {
        Self { feature_ids, ..Self::default() }
    }

    pub fn with_label(mut self, label_id: i64) -> Self {
        self.label_id = Some(label_id);
        self
    }

    pub fn with_size_test(mut self, size: f64) -> Self {
        self.size_test = Some(size);
        self
    }

    pub fn with_size_validation(mut self, size: f64) -> Self {
        self.size_validation = Some(size);
        self
    }

    pub fn with_bin_count(mut self, bin_count: usize) -> Self {
        self.bin_count = Some(bin_count);
        self
    }

    pub fn with_stratify_column(mut self, column: impl Into<String>) -> Self {
        self.unsupervised_stratify_col = Some(column.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    fn check_sizes(&self) -> Result<()> {
        if let Some(t) = self.size_test {
            if !(t > 0.0 && t < 1.0) {
                return Err(Error::config(format!("size_test must be between 0.0 and 1.0, got {t}")));
            }
        }
        if let Some(v) = self.size_validation {
            let Some(t) = self.size_test else {
                return Err(Error::config("size_validation requires size_test"));
            };
            if !(v > 0.0 && v < 1.0) {
                return Err(Error::config(format!("size_validation must be between 0.0 and 1.0, got {v}")));
            }
            if t + v >= 1.0 {
                return Err(Error::config(format!(
                    "size_test ({t}) + size_validation ({v}) must leave room for training samples"
                )));
            }
        }
        Ok(())
    }
}

/// One scalar per sample to balance partitions by, or `None` for a plain shuffle.
///
/// Labels stratify by their (interpolated) values; unsupervised splits by the
/// named column of the first feature, reduced to a scalar per sample.
pub(crate) fn stratify_vector(
    ctx: &Context,
    label: Option<&Label>,
    feature: &Feature,
    column: Option<&str>,
) -> Result<Option<StratifyVector>> {
    if let Some(label) = label {
        let values = preprocess::label_stratify_array(ctx, label)?;
        return stratify::from_label(&values, &label.dtypes).map(Some);
    }
    let Some(column) = column else {
        return Ok(None);
    };
    let position = feature
        .columns
        .iter()
        .position(|c| c == column)
        .ok_or_else(|| Error::config(format!("stratify column `{column}` is not part of feature {}", feature.id)))?;
    let values = preprocess::feature_stratify_array(ctx, feature)?;
    stratify::from_feature_column(&values, position, feature.dtypes[position]).map(Some)
}

/// Bin count actually applied to `vector`; continuous values always get one.
pub(crate) fn effective_bin_count(
    vector: &StratifyVector,
    bin_count: Option<usize>,
    default_bin_count: usize,
) -> Option<usize> {
    match vector {
        StratifyVector::Float(_) => Some(bin_count.unwrap_or(default_bin_count)),
        _ => bin_count,
    }
}

impl Splitset {
    /// Partition the samples shared by `request.feature_ids`.
    ///
    /// Nothing is persisted unless every check passes; the splitset and its
    /// featuresets are written in one transaction.
    pub fn make(ctx: &Context, request: SplitRequest) -> Result<Self> {
        request.check_sizes()?;
        if request.feature_ids.is_empty() {
            return Err(Error::config("a splitset needs at least one feature"));
        }

        let features: Vec<Feature> =
            request.feature_ids.iter().map(|&id| ctx.store().get(id)).collect::<Result<_>>()?;
        let mut lengths = Vec::with_capacity(features.len());
        for feature in &features {
            lengths.push(feature.sample_count(ctx)?);
        }
        let sample_count = lengths[0];
        if lengths.iter().any(|&l| l != sample_count) {
            return Err(Error::config(format!("features contain different amounts of samples: {lengths:?}")));
        }
        let first = &features[0];

        let label: Option<Label> = request.label_id.map(|id| ctx.store().get(id)).transpose()?;
        let column = request.unsupervised_stratify_col.as_deref();
        match &label {
            Some(label) => {
                if column.is_some() {
                    return Err(Error::config("unsupervised_stratify_col cannot be used with a label"));
                }
                for feature in &features {
                    if feature.window(ctx)?.is_some() {
                        return Err(Error::config(format!(
                            "windowed feature {} cannot be paired with a label; windows supply their own targets",
                            feature.id
                        )));
                    }
                }
                let label_count = label.sample_count(ctx)?;
                if label_count != sample_count {
                    return Err(Error::config(format!(
                        "label has {label_count} samples but features have {sample_count}"
                    )));
                }
            }
            None => {
                if features.len() > 1 {
                    return Err(Error::config("unsupervised splits support a single feature"));
                }
                if column.is_none() && request.bin_count.is_some() {
                    return Err(Error::config("bin_count requires a label or an unsupervised_stratify_col"));
                }
            }
        }
        let supervision = if label.is_some() { Supervision::Supervised } else { Supervision::Unsupervised };

        let mut samples = Partitions::new();
        let mut sizes = BTreeMap::new();
        let mut bin_count = request.bin_count;

        match request.size_test {
            None => {
                if column.is_some() {
                    return Err(Error::config("unsupervised_stratify_col requires size_test"));
                }
                samples.insert(Partition::Train, (0..sample_count).collect());
                sizes.insert(Partition::Train, PartitionSize { percent: 1.0, count: sample_count });
            }
            Some(size_test) => {
                let default_bins = ctx.config().default_bin_count;
                let vector = stratify_vector(ctx, label.as_ref(), first, column)?;
                if let Some(vector) = &vector {
                    bin_count = effective_bin_count(vector, bin_count, default_bins);
                }
                let classes = vector
                    .as_ref()
                    .map(|v| stratify::classes(v, bin_count, default_bins))
                    .transpose()?;

                let mut rng = ctx.rng()?;
                let (mut train, test) =
                    train_test_split(sample_count, classes.as_deref(), size_test, &mut rng)?;

                let mut size_train = 1.0 - size_test;
                if let Some(size_validation) = request.size_validation {
                    let second = size_validation / (1.0 - size_test);
                    let sub_classes = vector
                        .as_ref()
                        .map(|v| stratify::classes(&v.subset(&train), bin_count, default_bins))
                        .transpose()?;
                    let (keep, validation) =
                        train_test_split(train.len(), sub_classes.as_deref(), second, &mut rng)?;
                    let validation: Vec<usize> = validation.iter().map(|&p| train[p]).collect();
                    train = keep.iter().map(|&p| train[p]).collect();

                    size_train -= size_validation;
                    sizes.insert(
                        Partition::Validation,
                        PartitionSize { percent: size_validation, count: validation.len() },
                    );
                    samples.insert(Partition::Validation, validation);
                }
                sizes.insert(Partition::Test, PartitionSize { percent: size_test, count: test.len() });
                sizes.insert(Partition::Train, PartitionSize { percent: size_train, count: train.len() });
                samples.insert(Partition::Test, test);
                samples.insert(Partition::Train, train);
            }
        }

        let mut splitset = Splitset {
            id: 0,
            label_id: request.label_id,
            feature_ids: request.feature_ids.clone(),
            has_test: samples.contains_key(&Partition::Test),
            has_validation: samples.contains_key(&Partition::Validation),
            samples,
            sizes,
            supervision,
            bin_count,
            unsupervised_stratify_col: request.unsupervised_stratify_col,
            sample_count,
            name: request.name,
            description: request.description,
        };

        ctx.store().atomically(|tx| {
            tx.insert(&mut splitset)?;
            for (position, feature_id) in splitset.feature_ids.iter().enumerate() {
                tx.insert(&mut Featureset { id: 0, splitset_id: splitset.id, feature_id: *feature_id, position })?;
            }
            Ok(())
        })?;

        tracing::info!(
            splitset_id = splitset.id,
            sample_count,
            partitions = splitset.samples.len(),
            "splitset created"
        );
        Ok(splitset)
    }

    /// Features in the order they were given to [`make`](Self::make).
    pub fn features(&self, ctx: &Context) -> Result<Vec<Feature>> {
        let mut links: Vec<Featureset> = ctx.store().find(&[("splitset_id", Some(self.id))])?;
        links.sort_by_key(|l| l.position);
        links.iter().map(|l| ctx.store().get(l.feature_id)).collect()
    }

    pub fn label(&self, ctx: &Context) -> Result<Option<Label>> {
        self.label_id.map(|id| ctx.store().get(id)).transpose()
    }

    pub fn foldsets(&self, ctx: &Context) -> Result<Vec<Foldset>> {
        ctx.store().find(&[("splitset_id", Some(self.id))])
    }

    pub fn train_samples(&self) -> &[usize] {
        self.samples.get(&Partition::Train).map_or(&[], Vec::as_slice)
    }
}

//! Reproducible sample partitioning.
//!
//! ## Architecture
//!
//! - [`stratify`]: stratification vectors and continuous-value binning
//! - [`shuffle`]: one stratified (or plain) shuffle split
//! - [`kfold`]: plain and stratified k-fold splitters
//! - [`splitset`]: train / validation / test partitions of features + label
//! - [`foldset`]: k folds over a splitset's training partition
//!
//! # Example
//!
//! ```ignore
//! use ensayo::split::{Foldset, SplitRequest, Splitset};
//!
//! let splitset = Splitset::make(&ctx, SplitRequest::new(vec![feature.id])
//!     .with_label(label.id)
//!     .with_size_test(0.2)
//!     .with_size_validation(0.1))?;
//! let foldset = Foldset::make(&ctx, splitset.id, Some(5), None)?;
//! ```

pub mod foldset;
pub mod kfold;
pub mod shuffle;
pub mod splitset;
pub mod stratify;

pub use foldset::{Fold, Foldset};
pub use kfold::{KFold, StratifiedKFold};
pub use splitset::{Featureset, PartitionSize, SplitRequest, Splitset, Supervision};
pub use stratify::StratifyVector;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Named sample partition; the derived order is the canonical emission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    Train,
    FoldsTrainCombined,
    FoldValidation,
    Validation,
    Test,
    /// All samples of a splitset evaluated by a trained predictor.
    Infer,
}

impl Partition {
    /// Partitions whose rows encoders are fit on.
    pub fn is_train(&self) -> bool {
        matches!(self, Self::Train | Self::FoldsTrainCombined)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::FoldsTrainCombined => "folds_train_combined",
            Self::FoldValidation => "fold_validation",
            Self::Validation => "validation",
            Self::Test => "test",
            Self::Infer => "infer",
        }
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sorted sample indices per partition.
pub type Partitions = BTreeMap<Partition, Vec<usize>>;

/// The training partition of a set of partitions, if any.
pub fn train_partition(partitions: &Partitions) -> Option<(Partition, &[usize])> {
    partitions.iter().find(|(p, _)| p.is_train()).map(|(p, s)| (*p, s.as_slice()))
}

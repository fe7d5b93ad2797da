//! Algorithms and the model capability interface.
//!
//! An [`Algorithm`] record names the analysis type; the model itself is
//! supplied at run time as an [`Architecture`] implementation. Every
//! construction callable returns `Option` so a missing value surfaces as
//! [`Error::NullReturn`] instead of failing later.

use crate::context::Context;
use crate::error::{Error, Result};
use crate::store::Entity;
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Hyperparameters of one grid cell, passed to every callable.
pub type Hyperparameters = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisType {
    ClassificationBinary,
    ClassificationMulti,
    Regression,
}

impl AnalysisType {
    pub fn is_classification(&self) -> bool {
        !matches!(self, Self::Regression)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClassificationBinary => "classification_binary",
            Self::ClassificationMulti => "classification_multi",
            Self::Regression => "regression",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Algorithm {
    #[serde(default)]
    pub id: i64,
    /// Framework the architecture is written against, for bookkeeping.
    pub library: String,
    pub analysis_type: AnalysisType,
    pub description: Option<String>,
}

impl Entity for Algorithm {
    const TABLE: &'static str = "algorithms";
    const NAME: &'static str = "Algorithm";

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }
}

impl Algorithm {
    pub fn create(
        ctx: &Context,
        library: impl Into<String>,
        analysis_type: AnalysisType,
        description: Option<String>,
    ) -> Result<Self> {
        let library = library.into();
        if library.trim().is_empty() {
            return Err(Error::config("algorithm library cannot be empty"));
        }
        let mut algorithm = Algorithm { id: 0, library, analysis_type, description };
        ctx.store().insert(&mut algorithm)?;
        Ok(algorithm)
    }
}

/// Staged arrays of one partition: one array per feature, plus labels.
#[derive(Debug, Clone, PartialEq)]
pub struct Samples {
    pub features: Vec<ArrayD<f64>>,
    pub labels: Option<ArrayD<f64>>,
}

/// Output of [`Architecture::predict`].
#[derive(Debug, Clone, PartialEq)]
pub struct Predicted {
    pub predictions: ArrayD<f64>,
    pub probabilities: Option<ArrayD<f64>>,
}

/// Output of [`Architecture::train`].
#[derive(Debug, Clone)]
pub struct Trained<M> {
    pub model: M,
    /// Per-epoch training history, if the architecture records one.
    pub history: Option<Value>,
}

/// User-supplied model callables.
///
/// Shapes exclude the sample axis. `label_shape` is `None` when the splitset
/// has no labels and the features are not windowed.
pub trait Architecture {
    type Model;
    type Loss;
    type Optimizer;

    fn build(
        &self,
        feature_shapes: &[Vec<usize>],
        label_shape: Option<&[usize]>,
        hp: &Hyperparameters,
    ) -> Result<Option<Self::Model>>;

    fn lose(&self, hp: &Hyperparameters) -> Result<Option<Self::Loss>>;

    fn optimize(&self, model: &Self::Model, hp: &Hyperparameters) -> Result<Option<Self::Optimizer>>;

    fn train(
        &self,
        model: Self::Model,
        loser: &Self::Loss,
        optimizer: &mut Self::Optimizer,
        samples_train: &Samples,
        samples_evaluate: Option<&Samples>,
        hp: &Hyperparameters,
    ) -> Result<Option<Trained<Self::Model>>>;

    fn predict(&self, model: &Self::Model, features: &[ArrayD<f64>]) -> Result<Option<Predicted>>;

    fn loss(&self, loser: &Self::Loss, predicted: &Predicted, labels: &ArrayD<f64>) -> Result<f64>;

    /// Serialize a trained model for the artifact store.
    fn encode_model(&self, model: &Self::Model) -> Result<Vec<u8>>;

    fn decode_model(&self, bytes: &[u8]) -> Result<Self::Model>;

    /// Bumped whenever `encode_model` changes its byte layout.
    fn model_format_version(&self) -> u32 {
        1
    }
}

/// Unwrap a callable's `Option` result.
pub(crate) fn required<T>(value: Option<T>, callable: &'static str) -> Result<T> {
    value.ok_or(Error::NullReturn { callable })
}

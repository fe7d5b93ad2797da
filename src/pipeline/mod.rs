//! Leakage-safe preprocessing chains.
//!
//! Every Feature (and Label) owns an ordered chain of column-scoped links:
//! interpolaters fill missing float values, encoders fit on training rows and
//! transform every partition, a window groups rows into sequences, and a
//! shaper remaps the final dimensions.
//!
//! ## Architecture
//!
//! - [`columns`]: which columns each link claims
//! - [`interpolate`]: FeatureInterpolater / LabelInterpolater links
//! - [`encode`]: Encoderset, FeatureCoder and LabelCoder links with self-tests
//! - [`fitted`]: fitted chains and the `(fold group, chain)` cache
//! - [`shaper`]: FeatureShaper
//! - [`preprocess`]: runs a whole chain for one staging pass
//! - [`decode`]: inverse path back to original columns
//!
//! Encoders and interpolaters are user objects behind the [`Encoder`] and
//! [`Interpolate`] traits. They are rebuilt from `(kind, params)` through the
//! factories in a [`TransformRegistry`], so persisted chains stay replayable.

pub mod columns;
pub mod decode;
pub mod encode;
pub mod fitted;
pub mod interpolate;
pub mod preprocess;
pub mod shaper;
#[cfg(test)]
pub(crate) mod test_support;

pub use columns::{assign_columns, ColumnAssignment, ColumnFilter};
pub use encode::{Encoderset, FeatureCoder, LabelCoder};
pub use fitted::{ChainId, FittedChain, FittedTransformCache};
pub use interpolate::{FeatureInterpolater, LabelInterpolater};
pub use shaper::{FeatureShaper, ReshapeIndex};

use crate::error::{Error, Result};
use ndarray::{Array2, ArrayView2};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// A fit/transform object applied to a 2D column subset.
pub trait Encoder: Send + Sync {
    /// Registry key used to rebuild this encoder.
    fn kind(&self) -> &str;

    /// Constructor parameters passed back to the registry factory.
    fn params(&self) -> Value {
        Value::Null
    }

    fn fit(&mut self, data: ArrayView2<'_, f64>) -> Result<()>;

    fn transform(&self, data: ArrayView2<'_, f64>) -> Result<Array2<f64>>;

    /// `None` when the transform has no inverse.
    fn inverse_transform(&self, _data: ArrayView2<'_, f64>) -> Option<Result<Array2<f64>>> {
        None
    }

    /// Per input column, the category values a one-hot expansion produced,
    /// in output order. `None` for encoders that keep one output per input.
    fn categories(&self) -> Option<Vec<Vec<f64>>> {
        None
    }

    /// One-hot encoders that drop a category cannot be decoded column-wise.
    fn drops_categories(&self) -> bool {
        false
    }

    /// Encoders that only accept a single input column.
    fn single_column_only(&self) -> bool {
        false
    }

    /// Label encoders that turn values into classes.
    fn is_categorical(&self) -> bool {
        false
    }

    /// Fitted state for persistence; `None` if the encoder cannot export it.
    fn fitted_state(&self) -> Option<Value> {
        None
    }

    fn restore(&mut self, _state: &Value) -> Result<()> {
        Err(Error::config(format!("encoder `{}` cannot restore fitted state", self.kind())))
    }
}

/// A stateless missing-value filler for float columns.
pub trait Interpolate: Send + Sync {
    fn kind(&self) -> &str;

    fn params(&self) -> Value {
        Value::Null
    }

    /// Fill `NaN`s in `data`, returning an array of the same shape.
    fn interpolate(&self, data: ArrayView2<'_, f64>) -> Result<Array2<f64>>;
}

pub type EncoderFactory = Arc<dyn Fn(&Value) -> Result<Box<dyn Encoder>> + Send + Sync>;
pub type InterpolaterFactory = Arc<dyn Fn(&Value) -> Result<Box<dyn Interpolate>> + Send + Sync>;

/// Factories for every encoder and interpolater kind this process can build.
#[derive(Default)]
pub struct TransformRegistry {
    encoders: RwLock<HashMap<String, EncoderFactory>>,
    interpolaters: RwLock<HashMap<String, InterpolaterFactory>>,
}

fn poisoned<E: std::fmt::Display>(e: E) -> Error {
    Error::Internal(format!("Failed to acquire registry lock: {e}"))
}

impl TransformRegistry {
    pub fn register_encoder(&self, kind: &str, factory: EncoderFactory) -> Result<()> {
        self.encoders.write().map_err(poisoned)?.insert(kind.to_string(), factory);
        Ok(())
    }

    pub fn register_interpolater(&self, kind: &str, factory: InterpolaterFactory) -> Result<()> {
        self.interpolaters.write().map_err(poisoned)?.insert(kind.to_string(), factory);
        Ok(())
    }

    pub fn build_encoder(&self, kind: &str, params: &Value) -> Result<Box<dyn Encoder>> {
        let factory = self
            .encoders
            .read()
            .map_err(poisoned)?
            .get(kind)
            .cloned()
            .ok_or_else(|| Error::config(format!("no encoder registered for kind `{kind}`")))?;
        factory(params)
    }

    pub fn build_interpolater(&self, kind: &str, params: &Value) -> Result<Box<dyn Interpolate>> {
        let factory = self
            .interpolaters
            .read()
            .map_err(poisoned)?
            .get(kind)
            .cloned()
            .ok_or_else(|| Error::config(format!("no interpolater registered for kind `{kind}`")))?;
        factory(params)
    }
}

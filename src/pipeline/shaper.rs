//! Declarative reshaping of a preprocessed feature.
//!
//! Each entry of `reshape_indices` produces one dimension of the new shape:
//! an existing axis length, a literal length, or the product of several
//! existing axis lengths. The entry holding the highest plain axis index is
//! taken to be the column axis.

use crate::context::Context;
use crate::error::{Error, Result};
use crate::feature::Feature;
use crate::store::Entity;
use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReshapeIndex {
    /// Length of an axis of the old shape.
    Axis(usize),
    /// A fixed length.
    Literal(usize),
    /// Product of several old axis lengths.
    Product(Vec<usize>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureShaper {
    #[serde(default)]
    pub id: i64,
    pub feature_id: i64,
    pub reshape_indices: Vec<ReshapeIndex>,
    /// Position in the new shape that holds the encoded columns.
    pub column_position: usize,
}

impl Entity for FeatureShaper {
    const TABLE: &'static str = "feature_shapers";
    const NAME: &'static str = "FeatureShaper";

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn keys(&self) -> Vec<(&'static str, Option<i64>)> {
        vec![("feature_id", Some(self.feature_id))]
    }
}

/// Position of the entry holding the highest axis index.
pub fn column_position(reshape_indices: &[ReshapeIndex]) -> Result<usize> {
    let unclear = || {
        Error::config(
            "the highest axis index in reshape_indices marks the column axis; \
             it must be a plain (non-product) entry greater than 0",
        )
    };
    let highest = reshape_indices
        .iter()
        .flat_map(|r| match r {
            ReshapeIndex::Axis(i) => vec![*i],
            ReshapeIndex::Product(axes) => axes.clone(),
            ReshapeIndex::Literal(_) => Vec::new(),
        })
        .max()
        .ok_or_else(unclear)?;
    if highest == 0 {
        return Err(unclear());
    }
    reshape_indices.iter().position(|r| *r == ReshapeIndex::Axis(highest)).ok_or_else(unclear)
}

impl FeatureShaper {
    pub fn create(ctx: &Context, feature_id: i64, reshape_indices: Vec<ReshapeIndex>) -> Result<Self> {
        let _: Feature = ctx.store().get(feature_id)?;
        let column_position = column_position(&reshape_indices)?;
        let mut shaper = FeatureShaper { id: 0, feature_id, reshape_indices, column_position };
        ctx.store().insert(&mut shaper)?;
        Ok(shaper)
    }

    pub fn new_shape(&self, old: &[usize]) -> Result<Vec<usize>> {
        let axis = |i: usize| {
            old.get(i)
                .copied()
                .ok_or_else(|| Error::Shape(format!("reshape index {i} out of range for shape {old:?}")))
        };
        self.reshape_indices
            .iter()
            .map(|r| match r {
                ReshapeIndex::Axis(i) => axis(*i),
                ReshapeIndex::Literal(n) => Ok(*n),
                ReshapeIndex::Product(axes) => axes.iter().map(|&i| axis(i)).product(),
            })
            .collect()
    }

    /// Reshape in row-major order and check the column axis survived.
    pub fn apply(&self, array: &ArrayD<f64>) -> Result<ArrayD<f64>> {
        let old = array.shape();
        let new = self.new_shape(old)?;
        if new.iter().product::<usize>() != array.len() {
            return Err(Error::Shape(format!(
                "cannot rearrange shape {old:?} into {new:?}; both need the same number of elements"
            )));
        }
        let width = old.last().copied().unwrap_or(0);
        if new.get(self.column_position) != Some(&width) {
            return Err(Error::Shape(format!(
                "reshaped {old:?} into {new:?} but position {} no longer holds the {width} columns",
                self.column_position
            )));
        }
        Ok(ArrayD::from_shape_vec(IxDyn(&new), array.iter().copied().collect())?)
    }
}

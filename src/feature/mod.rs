//! Features and labels: named column subsets of a registered dataset.
//!
//! Both are immutable once created and own their preprocessing chains
//! (interpolaters, encoders, window, shaper) through foreign keys.

mod label;

pub use label::Label;

use crate::context::{Context, DatasetRecord};
use crate::data::{Dataset, DatasetKind, Dtype, SampleSource, Schema};
use crate::error::{Error, Result};
use crate::pipeline::{Encoderset, FeatureCoder, FeatureInterpolater, FeatureShaper};
use crate::store::Entity;
use crate::window::Window;
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(default)]
    pub id: i64,
    pub dataset_id: i64,
    pub kind: DatasetKind,
    pub columns: Vec<String>,
    pub dtypes: Vec<Dtype>,
}

impl Entity for Feature {
    const TABLE: &'static str = "features";
    const NAME: &'static str = "Feature";

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn keys(&self) -> Vec<(&'static str, Option<i64>)> {
        vec![("dataset_id", Some(self.dataset_id))]
    }
}

impl Feature {
    /// Create a feature over every column, only `include`, or all but `exclude`.
    pub fn create(
        ctx: &Context,
        dataset_id: i64,
        include: Option<Vec<String>>,
        exclude: Option<Vec<String>>,
    ) -> Result<Self> {
        let record: DatasetRecord = ctx.store().get(dataset_id)?;
        let schema = &record.schema;

        let columns = match (include, exclude) {
            (Some(_), Some(_)) => {
                return Err(Error::config("include and exclude columns are mutually exclusive"))
            }
            (Some(include), None) => {
                schema.positions(&include)?;
                if include.is_empty() {
                    return Err(Error::config("include columns cannot be empty"));
                }
                include
            }
            (None, Some(exclude)) => {
                schema.positions(&exclude)?;
                let kept: Vec<String> =
                    schema.columns.iter().filter(|c| !exclude.contains(c)).cloned().collect();
                if kept.is_empty() {
                    return Err(Error::config("excluding every column leaves an empty feature"));
                }
                kept
            }
            (None, None) => schema.columns.clone(),
        };

        let duplicate = ctx
            .store()
            .find::<Feature>(&[("dataset_id", Some(dataset_id))])?
            .into_iter()
            .find(|f| f.columns == columns);
        if let Some(existing) = duplicate {
            return Err(Error::config(format!(
                "feature {} already covers these columns of dataset {dataset_id}",
                existing.id
            )));
        }

        let mut feature = Feature {
            id: 0,
            dataset_id,
            kind: record.kind,
            dtypes: schema.subset(&columns)?.dtypes,
            columns,
        };
        ctx.store().insert(&mut feature)?;
        Ok(feature)
    }

    pub fn schema(&self) -> Schema {
        Schema { columns: self.columns.clone(), dtypes: self.dtypes.clone() }
    }

    pub fn dataset(&self, ctx: &Context) -> Result<Arc<Dataset>> {
        ctx.dataset(self.dataset_id)
    }

    /// This feature's columns for the given axis-0 samples (all when `None`).
    pub fn to_array(&self, ctx: &Context, samples: Option<&[usize]>) -> Result<ArrayD<f64>> {
        self.dataset(ctx)?.to_array(Some(&self.columns), samples)
    }

    pub fn window(&self, ctx: &Context) -> Result<Option<Window>> {
        ctx.store().latest(&[("feature_id", Some(self.id))])
    }

    pub fn interpolaters(&self, ctx: &Context) -> Result<Vec<FeatureInterpolater>> {
        ctx.store().find(&[("feature_id", Some(self.id))])
    }

    pub fn encoderset(&self, ctx: &Context) -> Result<Option<Encoderset>> {
        ctx.store().latest(&[("feature_id", Some(self.id))])
    }

    pub fn shaper(&self, ctx: &Context) -> Result<Option<FeatureShaper>> {
        ctx.store().latest(&[("feature_id", Some(self.id))])
    }

    /// Windows when windowed, otherwise the dataset's samples.
    pub fn sample_count(&self, ctx: &Context) -> Result<usize> {
        match self.window(ctx)? {
            Some(window) => Ok(window.window_count),
            None => Ok(self.dataset(ctx)?.sample_count()),
        }
    }

    /// Column names after encoding: each coder's output names, then leftovers.
    pub fn encoded_column_names(&self, ctx: &Context) -> Result<Vec<String>> {
        let Some(encoderset) = self.encoderset(ctx)? else {
            return Ok(self.columns.clone());
        };
        let coders: Vec<FeatureCoder> = encoderset.coders(ctx)?;
        let Some(last) = coders.last() else {
            return Ok(self.columns.clone());
        };
        let mut names: Vec<String> =
            coders.iter().flat_map(|c| c.encoded_column_names.iter().cloned()).collect();
        names.extend(last.leftover_columns.iter().cloned());
        Ok(names)
    }
}

#[cfg(test)]
mod tests;

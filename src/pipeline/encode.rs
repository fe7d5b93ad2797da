//! Encoder chain links for features and labels.
//!
//! An [`Encoderset`] groups a feature's [`FeatureCoder`]s; each coder claims
//! columns the previous ones left over. A label has a single [`LabelCoder`]
//! over all of its columns. Every link is fit and run once on the whole
//! (interpolated) data before it is stored.

use super::columns::{assign_columns, ColumnFilter};
use super::interpolate::{interpolate_feature, interpolate_label};
use super::Encoder;
use crate::context::Context;
use crate::data::array::flatten_rows;
use crate::data::Dtype;
use crate::error::{Error, Result};
use crate::feature::{Feature, Label};
use crate::store::Entity;
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Encoderset {
    #[serde(default)]
    pub id: i64,
    pub feature_id: i64,
    pub description: Option<String>,
}

impl Entity for Encoderset {
    const TABLE: &'static str = "encodersets";
    const NAME: &'static str = "Encoderset";

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

impl Encoderset {
    pub fn create(ctx: &Context, feature_id: i64, description: Option<String>) -> Result<Self> {
        let _: Feature = ctx.store().get(feature_id)?;
        let mut encoderset = Encoderset { id: 0, feature_id, description };
        ctx.store().insert(&mut encoderset)?;
        Ok(encoderset)
    }

    /// Coders in chain order.
    pub fn coders(&self, ctx: &Context) -> Result<Vec<FeatureCoder>> {
        let mut coders: Vec<FeatureCoder> = ctx.store().find(&[("encoderset_id", Some(self.id))])?;
        coders.sort_by_key(|c| c.index);
        Ok(coders)
    }

    pub fn feature(&self, ctx: &Context) -> Result<Feature> {
        ctx.store().get(self.feature_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureCoder {
    #[serde(default)]
    pub id: i64,
    pub encoderset_id: i64,
    pub index: usize,
    pub kind: String,
    pub params: Value,
    pub matching_columns: Vec<String>,
    /// `column=value` per one-hot output, otherwise the matching columns.
    pub encoded_column_names: Vec<String>,
    pub leftover_columns: Vec<String>,
    pub leftover_dtypes: Vec<Dtype>,
    pub original_filter: ColumnFilter,
    pub is_categorical: bool,
}

impl Entity for FeatureCoder {
    const TABLE: &'static str = "feature_coders";
    const NAME: &'static str = "FeatureCoder";

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn keys(&self) -> Vec<(&'static str, Option<i64>)> {
        vec![("encoderset_id", Some(self.encoderset_id))]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelCoder {
    #[serde(default)]
    pub id: i64,
    pub label_id: i64,
    pub kind: String,
    pub params: Value,
    pub matching_columns: Vec<String>,
    pub is_categorical: bool,
}

impl Entity for LabelCoder {
    const TABLE: &'static str = "label_coders";
    const NAME: &'static str = "LabelCoder";

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn keys(&self) -> Vec<(&'static str, Option<i64>)> {
        vec![("label_id", Some(self.label_id))]
    }
}

/// Output names of a fitted encoder over `columns`.
pub(crate) fn encoded_names(encoder: &dyn Encoder, columns: &[String]) -> Vec<String> {
    match encoder.categories() {
        Some(categories) => columns
            .iter()
            .zip(categories)
            .flat_map(|(column, values)| values.into_iter().map(move |v| format!("{column}={v}")))
            .collect(),
        None => columns.to_vec(),
    }
}

/// Fit a fresh encoder on `data` and transform it, as a pre-flight check.
fn self_test(encoder: &mut dyn Encoder, data: &Array2<f64>) -> Result<Array2<f64>> {
    encoder.fit(data.view())?;
    let out = encoder.transform(data.view())?;
    if out.nrows() != data.nrows() {
        return Err(Error::Shape(format!(
            "transform returned {} rows for {} input rows",
            out.nrows(),
            data.nrows()
        )));
    }
    Ok(out)
}

impl FeatureCoder {
    /// Append an encoder to an encoderset.
    ///
    /// Encoders that drop categories are rejected, as are single-column
    /// encoders claiming several columns. The encoder is fit and applied to
    /// the whole interpolated feature before the link is stored.
    pub fn create(
        ctx: &Context,
        encoderset_id: i64,
        kind: &str,
        params: Value,
        filter: ColumnFilter,
    ) -> Result<Self> {
        let encoderset: Encoderset = ctx.store().get(encoderset_id)?;
        let feature = encoderset.feature(ctx)?;
        let schema = feature.schema();

        let mut encoder = ctx.transforms().build_encoder(kind, &params)?;
        if encoder.drops_categories() {
            return Err(Error::config(format!(
                "encoder `{kind}` drops categories; dropped one-hot columns cannot be decoded"
            )));
        }

        let existing = encoderset.coders(ctx)?;
        let assignment = assign_columns(
            &schema,
            existing.last().map(|c| c.leftover_columns.as_slice()),
            existing.len(),
            &filter,
            "encoder",
        )?;
        if encoder.single_column_only() && assignment.matching_columns.len() > 1 {
            return Err(Error::config(format!(
                "encoder `{kind}` encodes one column at a time but the filter matched {:?}",
                assignment.matching_columns
            )));
        }

        let link = format!("encoder `{kind}` on {:?}", assignment.matching_columns);
        let values = interpolate_feature(ctx, &feature, feature.to_array(ctx, None)?, None, None)?;
        let positions = schema.positions(&assignment.matching_columns)?;
        let data = flatten_rows(&values)?.select(Axis(1), &positions);

        let encoded = self_test(encoder.as_mut(), &data)
            .map_err(|e| Error::SelfTest { link: link.clone(), message: e.to_string() })?;
        let encoded_column_names = encoded_names(encoder.as_ref(), &assignment.matching_columns);
        if encoded_column_names.len() != encoded.ncols() {
            return Err(Error::SelfTest {
                link,
                message: format!(
                    "transform produced {} columns but {} were expected ({:?})",
                    encoded.ncols(),
                    encoded_column_names.len(),
                    encoded_column_names
                ),
            });
        }

        let mut coder = FeatureCoder {
            id: 0,
            encoderset_id,
            index: assignment.index,
            kind: kind.to_string(),
            params,
            matching_columns: assignment.matching_columns,
            encoded_column_names,
            leftover_columns: assignment.leftover_columns,
            leftover_dtypes: assignment.leftover_dtypes,
            original_filter: assignment.original_filter,
            is_categorical: encoder.is_categorical(),
        };
        ctx.store().insert(&mut coder)?;
        tracing::info!(encoderset_id, index = coder.index, kind, "feature coder added");
        Ok(coder)
    }
}

impl LabelCoder {
    /// Attach an encoder over every column of a label.
    pub fn create(ctx: &Context, label_id: i64, kind: &str, params: Value) -> Result<Self> {
        let label: Label = ctx.store().get(label_id)?;
        let mut encoder = ctx.transforms().build_encoder(kind, &params)?;
        if encoder.drops_categories() {
            return Err(Error::config(format!(
                "encoder `{kind}` drops categories; dropped one-hot columns cannot be decoded"
            )));
        }

        let values = interpolate_label(ctx, &label, label.to_array(ctx, None)?, None)?;
        let data = flatten_rows(&values)?;
        self_test(encoder.as_mut(), &data)
            .map_err(|e| Error::SelfTest { link: format!("label encoder `{kind}`"), message: e.to_string() })?;

        let mut coder = LabelCoder {
            id: 0,
            label_id,
            kind: kind.to_string(),
            params,
            matching_columns: label.columns.clone(),
            is_categorical: encoder.is_categorical(),
        };
        ctx.store().insert(&mut coder)?;
        tracing::info!(label_id, kind, "label coder added");
        Ok(coder)
    }
}

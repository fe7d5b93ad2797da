//! Missing-value interpolation links.
//!
//! Interpolaters only touch float columns. On 2D data a link marked
//! `process_separately` fills the training rows on their own and then fills
//! every other partition with the (already filled) training rows merged in
//! as context, writing back only that partition's rows. Sequence and image
//! data are filled one 2D slice at a time.

use super::columns::{assign_columns, ColumnFilter};
use super::Interpolate;
use crate::context::Context;
use crate::data::{Dtype, Schema};
use crate::error::{Error, Result};
use crate::feature::{Feature, Label};
use crate::split::{Partition, Partitions};
use crate::store::Entity;
use crate::window::Window;
use ndarray::{Array2, Array3, ArrayD, ArrayView2, Axis, Ix2, IxDyn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureInterpolater {
    #[serde(default)]
    pub id: i64,
    pub feature_id: i64,
    pub index: usize,
    pub kind: String,
    pub params: Value,
    pub process_separately: bool,
    pub matching_columns: Vec<String>,
    pub leftover_columns: Vec<String>,
    pub leftover_dtypes: Vec<Dtype>,
    pub original_filter: ColumnFilter,
}

impl Entity for FeatureInterpolater {
    const TABLE: &'static str = "feature_interpolaters";
    const NAME: &'static str = "FeatureInterpolater";

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

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelInterpolater {
    #[serde(default)]
    pub id: i64,
    pub label_id: i64,
    pub kind: String,
    pub params: Value,
    pub process_separately: bool,
    pub matching_columns: Vec<String>,
}

impl Entity for LabelInterpolater {
    const TABLE: &'static str = "label_interpolaters";
    const NAME: &'static str = "LabelInterpolater";

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

/// A built interpolater bound to its column positions.
pub(crate) struct InterpolationLink {
    interpolater: Box<dyn Interpolate>,
    positions: Vec<usize>,
    process_separately: bool,
}

impl InterpolationLink {
    fn build(ctx: &Context, kind: &str, params: &Value, positions: Vec<usize>, process_separately: bool) -> Result<Self> {
        Ok(Self { interpolater: ctx.transforms().build_interpolater(kind, params)?, positions, process_separately })
    }

    fn fill(&self, block: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        let out = self.interpolater.interpolate(block)?;
        if out.dim() != block.dim() {
            return Err(Error::Shape(format!(
                "interpolater `{}` returned {:?} for input {:?}",
                self.interpolater.kind(),
                out.dim(),
                block.dim()
            )));
        }
        Ok(out)
    }

    /// Fill this link's columns of a 2D array in place.
    fn apply(&self, data: &mut Array2<f64>, partitions: Option<&[(Partition, Vec<usize>)]>) -> Result<()> {
        let mut block = data.select(Axis(1), &self.positions);
        match partitions.filter(|_| self.process_separately) {
            Some(partitions) => self.fill_separately(&mut block, partitions)?,
            None => block = self.fill(block.view())?,
        }
        for (j, &position) in self.positions.iter().enumerate() {
            data.column_mut(position).assign(&block.column(j));
        }
        Ok(())
    }

    fn fill_separately(&self, block: &mut Array2<f64>, partitions: &[(Partition, Vec<usize>)]) -> Result<()> {
        let mut train: Vec<usize> =
            partitions.iter().filter(|(p, _)| p.is_train()).flat_map(|(_, rows)| rows.iter().copied()).collect();
        train.sort_unstable();
        train.dedup();

        if !train.is_empty() {
            let filled = self.fill(block.select(Axis(0), &train).view())?;
            for (i, &row) in train.iter().enumerate() {
                block.row_mut(row).assign(&filled.row(i));
            }
        }

        for (partition, rows) in partitions.iter().filter(|(p, _)| !p.is_train()) {
            let mut own: Vec<usize> = rows.iter().copied().filter(|r| train.binary_search(r).is_err()).collect();
            own.sort_unstable();
            own.dedup();
            if own.is_empty() {
                continue;
            }
            let mut merged: Vec<usize> = train.iter().chain(&own).copied().collect();
            merged.sort_unstable();

            let filled = self.fill(block.select(Axis(0), &merged).view())?;
            for (i, &row) in merged.iter().enumerate() {
                if own.binary_search(&row).is_ok() {
                    block.row_mut(row).assign(&filled.row(i));
                }
            }
            tracing::debug!(%partition, rows = own.len(), "interpolated with training context");
        }

        // Rows outside every partition (window lead-in) can still hold gaps.
        if block.iter().any(|v| v.is_nan()) {
            *block = self.fill(block.view())?;
        }
        Ok(())
    }
}

/// Map sample partitions to the underlying rows they cover.
pub(crate) fn partition_rows(samples: &Partitions, window: Option<&Window>) -> Vec<(Partition, Vec<usize>)> {
    samples
        .iter()
        .map(|(partition, samples)| {
            let rows = match window {
                Some(window) => window.rows_for(samples),
                None => samples.clone(),
            };
            (*partition, rows)
        })
        .collect()
}

/// Run `links` over a whole array in chain order.
pub(crate) fn interpolate_array(
    links: &[InterpolationLink],
    values: ArrayD<f64>,
    partitions: Option<&[(Partition, Vec<usize>)]>,
) -> Result<ArrayD<f64>> {
    if links.is_empty() {
        return Ok(values);
    }
    match values.ndim() {
        2 => {
            let mut data = values.into_dimensionality::<Ix2>()?;
            for link in links {
                link.apply(&mut data, partitions)?;
            }
            Ok(data.into_dyn())
        }
        n if n >= 3 => {
            let shape = values.shape().to_vec();
            let (rows, cols) = (shape[n - 2], shape[n - 1]);
            let slices: usize = shape[..n - 2].iter().product();
            let mut cube = Array3::from_shape_vec((slices, rows, cols), values.iter().copied().collect())?;
            for mut slice in cube.axis_iter_mut(Axis(0)) {
                let mut data = slice.to_owned();
                for link in links {
                    link.apply(&mut data, None)?;
                }
                slice.assign(&data);
            }
            Ok(ArrayD::from_shape_vec(IxDyn(&shape), cube.iter().copied().collect())?)
        }
        n => Err(Error::Shape(format!("cannot interpolate a {n}D array"))),
    }
}

fn feature_links(ctx: &Context, schema: &Schema, interpolaters: &[FeatureInterpolater]) -> Result<Vec<InterpolationLink>> {
    interpolaters
        .iter()
        .map(|fi| {
            let positions = schema.positions(&fi.matching_columns)?;
            InterpolationLink::build(ctx, &fi.kind, &fi.params, positions, fi.process_separately)
        })
        .collect()
}

/// Fill a feature's full array. `samples` are sample (or window) partitions.
pub fn interpolate_feature(
    ctx: &Context,
    feature: &Feature,
    values: ArrayD<f64>,
    samples: Option<&Partitions>,
    window: Option<&Window>,
) -> Result<ArrayD<f64>> {
    let interpolaters = feature.interpolaters(ctx)?;
    if interpolaters.is_empty() {
        return Ok(values);
    }
    let links = feature_links(ctx, &feature.schema(), &interpolaters)?;
    let partitions = samples.map(|s| partition_rows(s, window));
    interpolate_array(&links, values, partitions.as_deref())
}

/// Fill a label's full array with its most recent interpolater.
pub fn interpolate_label(
    ctx: &Context,
    label: &Label,
    values: ArrayD<f64>,
    samples: Option<&Partitions>,
) -> Result<ArrayD<f64>> {
    let Some(li) = label.interpolaters(ctx)?.pop() else {
        return Ok(values);
    };
    let positions = (0..label.columns.len()).collect();
    let link = InterpolationLink::build(ctx, &li.kind, &li.params, positions, li.process_separately)?;
    let partitions = samples.map(|s| partition_rows(s, None));
    interpolate_array(&[link], values, partitions.as_deref())
}

impl FeatureInterpolater {
    /// Append an interpolater to a feature's chain.
    ///
    /// Only inclusive filters over float columns are accepted; an empty filter
    /// claims every remaining float column. The whole chain, new link
    /// included, must fill the feature's full array before anything is stored.
    pub fn create(
        ctx: &Context,
        feature_id: i64,
        kind: &str,
        params: Value,
        filter: ColumnFilter,
        process_separately: bool,
    ) -> Result<Self> {
        let feature: Feature = ctx.store().get(feature_id)?;
        let schema = feature.schema();
        if !filter.include {
            return Err(Error::config("interpolaters only accept inclusive column filters"));
        }
        if let Some(dtype) = filter.dtypes.iter().flatten().find(|d| !d.is_float()) {
            return Err(Error::config(format!("interpolaters only fill float columns, got dtype `{dtype}`")));
        }
        for column in filter.columns.iter().flatten() {
            if let Some(dtype) = schema.dtype_of(column).filter(|d| !d.is_float()) {
                return Err(Error::config(format!("column `{column}` is {dtype}; interpolaters only fill float columns")));
            }
        }
        let filter = if filter.is_unfiltered() { ColumnFilter::include_dtypes([Dtype::Float]) } else { filter };

        let existing = feature.interpolaters(ctx)?;
        let assignment = assign_columns(
            &schema,
            existing.last().map(|fi| fi.leftover_columns.as_slice()),
            existing.len(),
            &filter,
            "interpolater",
        )?;

        let mut interpolater = FeatureInterpolater {
            id: 0,
            feature_id,
            index: assignment.index,
            kind: kind.to_string(),
            params,
            process_separately,
            matching_columns: assignment.matching_columns,
            leftover_columns: assignment.leftover_columns,
            leftover_dtypes: assignment.leftover_dtypes,
            original_filter: assignment.original_filter,
        };

        let mut chain = existing;
        chain.push(interpolater.clone());
        let self_test = feature_links(ctx, &schema, &chain)
            .and_then(|links| interpolate_array(&links, feature.to_array(ctx, None)?, None));
        if let Err(e) = self_test {
            return Err(Error::SelfTest { link: format!("interpolater `{kind}`"), message: e.to_string() });
        }

        ctx.store().insert(&mut interpolater)?;
        tracing::info!(feature_id, index = interpolater.index, kind, "interpolater added");
        Ok(interpolater)
    }
}

impl LabelInterpolater {
    /// Attach an interpolater to an all-float label.
    pub fn create(ctx: &Context, label_id: i64, kind: &str, params: Value, process_separately: bool) -> Result<Self> {
        let label: Label = ctx.store().get(label_id)?;
        if let Some((column, dtype)) = label.columns.iter().zip(&label.dtypes).find(|(_, d)| !d.is_float()) {
            return Err(Error::config(format!("label column `{column}` is {dtype}; interpolaters only fill float columns")));
        }

        let positions = (0..label.columns.len()).collect();
        let self_test = InterpolationLink::build(ctx, kind, &params, positions, process_separately)
            .and_then(|link| interpolate_array(&[link], label.to_array(ctx, None)?, None));
        if let Err(e) = self_test {
            return Err(Error::SelfTest { link: format!("label interpolater `{kind}`"), message: e.to_string() });
        }

        let mut interpolater = LabelInterpolater {
            id: 0,
            label_id,
            kind: kind.to_string(),
            params,
            process_separately,
            matching_columns: label.columns.clone(),
        };
        ctx.store().insert(&mut interpolater)?;
        Ok(interpolater)
    }
}

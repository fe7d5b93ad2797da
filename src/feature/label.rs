//! Labels: the supervised target columns of a tabular dataset.

use crate::context::{Context, DatasetRecord};
use crate::data::{DatasetKind, Dtype, SampleSource};
use crate::error::{Error, Result};
use crate::pipeline::{LabelCoder, LabelInterpolater};
use crate::store::Entity;
use ndarray::{ArrayD, Axis};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    #[serde(default)]
    pub id: i64,
    pub dataset_id: i64,
    pub columns: Vec<String>,
    pub dtypes: Vec<Dtype>,
    /// Sorted distinct values of a single non-float column.
    pub unique_classes: Option<Vec<f64>>,
    /// Multi-column labels are validated one-hot at creation.
    pub one_hot: bool,
}

impl Entity for Label {
    const TABLE: &'static str = "labels";
    const NAME: &'static str = "Label";

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

/// Every row holds exactly one `1.0` and zeros elsewhere.
fn check_one_hot(values: &ArrayD<f64>) -> Result<()> {
    for (row_index, row) in values.axis_iter(Axis(0)).enumerate() {
        let mut hot = 0;
        for v in row.iter() {
            if *v == 1.0 {
                hot += 1;
            } else if *v != 0.0 {
                return Err(Error::config(format!(
                    "multi-column label must be one-hot; row {row_index} holds {v}"
                )));
            }
        }
        if hot != 1 {
            return Err(Error::config(format!(
                "multi-column label must be one-hot; row {row_index} has {hot} hot columns"
            )));
        }
    }
    Ok(())
}

impl Label {
    pub fn create(ctx: &Context, dataset_id: i64, columns: Vec<String>) -> Result<Self> {
        let record: DatasetRecord = ctx.store().get(dataset_id)?;
        if record.kind != DatasetKind::Tabular {
            return Err(Error::config("labels must come from a tabular dataset"));
        }
        if columns.is_empty() {
            return Err(Error::config("a label needs at least one column"));
        }
        let dtypes = record.schema.subset(&columns)?.dtypes;

        let duplicate = ctx
            .store()
            .find::<Label>(&[("dataset_id", Some(dataset_id))])?
            .into_iter()
            .any(|l| l.columns == columns);
        if duplicate {
            return Err(Error::config(format!("a label over these columns of dataset {dataset_id} already exists")));
        }

        let values = ctx.dataset(dataset_id)?.to_array(Some(&columns), None)?;
        let one_hot = columns.len() > 1;
        if one_hot {
            check_one_hot(&values)?;
        }

        let unique_classes = if !one_hot && !dtypes[0].is_float() {
            let mut classes: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
            classes.sort_by(f64::total_cmp);
            classes.dedup();
            Some(classes)
        } else {
            None
        };

        let mut label = Label { id: 0, dataset_id, columns, dtypes, unique_classes, one_hot };
        ctx.store().insert(&mut label)?;
        Ok(label)
    }

    pub fn to_array(&self, ctx: &Context, samples: Option<&[usize]>) -> Result<ArrayD<f64>> {
        ctx.dataset(self.dataset_id)?.to_array(Some(&self.columns), samples)
    }

    pub fn sample_count(&self, ctx: &Context) -> Result<usize> {
        Ok(ctx.dataset(self.dataset_id)?.sample_count())
    }

    pub fn interpolaters(&self, ctx: &Context) -> Result<Vec<LabelInterpolater>> {
        ctx.store().find(&[("label_id", Some(self.id))])
    }

    pub fn labelcoder(&self, ctx: &Context) -> Result<Option<LabelCoder>> {
        ctx.store().latest(&[("label_id", Some(self.id))])
    }
}

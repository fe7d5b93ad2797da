//! Dataset variants and the sample-access contract.
//!
//! Raw ingestion happens elsewhere; the engine only sees immutable numeric
//! arrays with a column schema. The last axis is always the column axis and
//! missing values are `NaN`.
//!
//! ## Architecture
//!
//! - [`Dataset`]: closed set of `Tabular` (2D), `Sequence` (3D) and `Image` (4D)
//! - [`SampleSource`]: shared `to_array` / `to_frame` / `sample_count` contract
//! - [`array`]: flattening, restoring and NaN-safe persistence of arrays

pub mod array;
pub mod stats;

pub use array::StoredArray;

use crate::error::{Error, Result};
use ndarray::{Array2, Array3, Array4, ArrayD, Axis};
use serde::{Deserialize, Serialize};

/// Column dtype.
///
/// `Categorical` columns hold non-negative dictionary codes assigned at
/// ingestion time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dtype {
    Float,
    Int,
    Categorical,
}

impl Dtype {
    pub fn is_float(&self) -> bool {
        matches!(self, Self::Float)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Float => "float",
            Self::Int => "int",
            Self::Categorical => "categorical",
        }
    }
}

impl std::fmt::Display for Dtype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape family of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetKind {
    Tabular,
    Sequence,
    Image,
}

impl DatasetKind {
    /// Number of array dimensions for this kind.
    pub fn ndim(&self) -> usize {
        match self {
            Self::Tabular => 2,
            Self::Sequence => 3,
            Self::Image => 4,
        }
    }
}

/// Column names and dtypes, one entry per position of the last axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub columns: Vec<String>,
    pub dtypes: Vec<Dtype>,
}

impl Schema {
    pub fn new(columns: Vec<String>, dtypes: Vec<Dtype>) -> Result<Self> {
        if columns.len() != dtypes.len() {
            return Err(Error::config(format!(
                "{} column names but {} dtypes",
                columns.len(),
                dtypes.len()
            )));
        }
        if columns.is_empty() {
            return Err(Error::config("a dataset needs at least one column"));
        }
        for (i, column) in columns.iter().enumerate() {
            if columns[..i].contains(column) {
                return Err(Error::config(format!("duplicate column name `{column}`")));
            }
        }
        Ok(Self { columns, dtypes })
    }

    pub fn position(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// Positions of `columns`, failing on the first unknown name.
    pub fn positions(&self, columns: &[String]) -> Result<Vec<usize>> {
        columns
            .iter()
            .map(|c| {
                self.position(c)
                    .ok_or_else(|| Error::config(format!("column `{c}` not found in dataset")))
            })
            .collect()
    }

    pub fn dtype_of(&self, column: &str) -> Option<Dtype> {
        self.position(column).map(|i| self.dtypes[i])
    }

    /// Sub-schema restricted to `columns`, in the given order.
    pub fn subset(&self, columns: &[String]) -> Result<Schema> {
        let positions = self.positions(columns)?;
        Ok(Schema {
            columns: columns.to_vec(),
            dtypes: positions.iter().map(|&p| self.dtypes[p]).collect(),
        })
    }
}

/// A 2D table with named columns, flattened from any dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub schema: Schema,
    pub values: Array2<f64>,
}

impl Frame {
    pub fn column(&self, name: &str) -> Option<ndarray::ArrayView1<'_, f64>> {
        self.schema.position(name).map(|i| self.values.column(i))
    }
}

/// Uniform sample access shared by every dataset variant.
pub trait SampleSource {
    fn kind(&self) -> DatasetKind;

    fn schema(&self) -> &Schema;

    /// The full array; axis 0 indexes samples and the last axis columns.
    fn values(&self) -> &ArrayD<f64>;

    /// Rows for tabular data, sequences for sequence data, images for image data.
    fn sample_count(&self) -> usize {
        self.values().shape()[0]
    }

    /// Select `columns` (by name) and `samples` (axis-0 indices).
    fn to_array(&self, columns: Option<&[String]>, samples: Option<&[usize]>) -> Result<ArrayD<f64>> {
        let values = self.values();
        let last = values.ndim() - 1;
        let mut out = match columns {
            Some(columns) => values.select(Axis(last), &self.schema().positions(columns)?),
            None => values.clone(),
        };
        if let Some(samples) = samples {
            let n = self.sample_count();
            if let Some(bad) = samples.iter().find(|&&s| s >= n) {
                return Err(Error::config(format!("sample index {bad} out of range for {n} samples")));
            }
            out = out.select(Axis(0), samples);
        }
        Ok(out)
    }

    /// Same selection as [`to_array`](Self::to_array), flattened to named 2D rows.
    fn to_frame(&self, columns: Option<&[String]>, samples: Option<&[usize]>) -> Result<Frame> {
        let schema = match columns {
            Some(columns) => self.schema().subset(columns)?,
            None => self.schema().clone(),
        };
        let values = array::flatten_rows(&self.to_array(columns, samples)?)?;
        Ok(Frame { schema, values })
    }
}

fn checked(schema: &Schema, data: ArrayD<f64>) -> Result<ArrayD<f64>> {
    let width = data.shape().last().copied().unwrap_or(0);
    if width != schema.columns.len() {
        return Err(Error::Shape(format!(
            "array has {width} columns but schema names {}",
            schema.columns.len()
        )));
    }
    if data.shape()[0] == 0 {
        return Err(Error::config("a dataset needs at least one sample"));
    }
    for (position, dtype) in schema.dtypes.iter().enumerate() {
        if dtype.is_float() {
            continue;
        }
        let column = data.index_axis(Axis(data.ndim() - 1), position);
        let bad = column.iter().find(|v| {
            !v.is_nan() && (v.fract() != 0.0 || (*dtype == Dtype::Categorical && **v < 0.0))
        });
        if let Some(v) = bad {
            return Err(Error::config(format!(
                "column `{}` is {dtype} but holds {v}",
                schema.columns[position]
            )));
        }
    }
    Ok(data)
}

/// 2D rows × columns.
#[derive(Debug, Clone)]
pub struct Tabular {
    schema: Schema,
    data: ArrayD<f64>,
}

impl Tabular {
    pub fn new(columns: Vec<String>, dtypes: Vec<Dtype>, data: Array2<f64>) -> Result<Self> {
        let schema = Schema::new(columns, dtypes)?;
        let data = checked(&schema, data.into_dyn())?;
        Ok(Self { schema, data })
    }

    /// Build from `(name, dtype, values)` column triples of equal length.
    pub fn from_columns(columns: &[(&str, Dtype, &[f64])]) -> Result<Self> {
        let rows = columns.first().map_or(0, |c| c.2.len());
        if columns.iter().any(|c| c.2.len() != rows) {
            return Err(Error::Shape("columns differ in length".to_string()));
        }
        let mut data = Array2::zeros((rows, columns.len()));
        for (j, (_, _, values)) in columns.iter().enumerate() {
            for (i, v) in values.iter().enumerate() {
                data[[i, j]] = *v;
            }
        }
        Self::new(
            columns.iter().map(|c| c.0.to_string()).collect(),
            columns.iter().map(|c| c.1).collect(),
            data,
        )
    }
}

/// 3D sequences × rows × columns.
#[derive(Debug, Clone)]
pub struct Sequence {
    schema: Schema,
    data: ArrayD<f64>,
}

impl Sequence {
    pub fn new(columns: Vec<String>, dtypes: Vec<Dtype>, data: Array3<f64>) -> Result<Self> {
        let schema = Schema::new(columns, dtypes)?;
        let data = checked(&schema, data.into_dyn())?;
        Ok(Self { schema, data })
    }
}

/// 4D images × channels × rows × columns.
#[derive(Debug, Clone)]
pub struct Image {
    schema: Schema,
    data: ArrayD<f64>,
}

impl Image {
    pub fn new(columns: Vec<String>, dtypes: Vec<Dtype>, data: Array4<f64>) -> Result<Self> {
        let schema = Schema::new(columns, dtypes)?;
        let data = checked(&schema, data.into_dyn())?;
        Ok(Self { schema, data })
    }
}

macro_rules! impl_sample_source {
    ($ty:ty, $kind:expr) => {
        impl SampleSource for $ty {
            fn kind(&self) -> DatasetKind {
                $kind
            }

            fn schema(&self) -> &Schema {
                &self.schema
            }

            fn values(&self) -> &ArrayD<f64> {
                &self.data
            }
        }
    };
}

impl_sample_source!(Tabular, DatasetKind::Tabular);
impl_sample_source!(Sequence, DatasetKind::Sequence);
impl_sample_source!(Image, DatasetKind::Image);

/// Any registered dataset.
#[derive(Debug, Clone)]
pub enum Dataset {
    Tabular(Tabular),
    Sequence(Sequence),
    Image(Image),
}

impl Dataset {
    fn inner(&self) -> &dyn SampleSource {
        match self {
            Self::Tabular(d) => d,
            Self::Sequence(d) => d,
            Self::Image(d) => d,
        }
    }
}

impl SampleSource for Dataset {
    fn kind(&self) -> DatasetKind {
        self.inner().kind()
    }

    fn schema(&self) -> &Schema {
        self.inner().schema()
    }

    fn values(&self) -> &ArrayD<f64> {
        self.inner().values()
    }
}

impl From<Tabular> for Dataset {
    fn from(d: Tabular) -> Self {
        Self::Tabular(d)
    }
}

impl From<Sequence> for Dataset {
    fn from(d: Sequence) -> Self {
        Self::Sequence(d)
    }
}

impl From<Image> for Dataset {
    fn from(d: Image) -> Self {
        Self::Image(d)
    }
}

#[cfg(test)]
mod tests;

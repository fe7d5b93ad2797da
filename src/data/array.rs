//! Array reshaping helpers and NaN-safe persistence.

use crate::error::{Error, Result};
use ndarray::{Array2, ArrayD, Axis, IxDyn};
use serde::{Deserialize, Serialize};

/// Collapse every leading axis into rows: `(a, b, .., cols) -> (a*b*.., cols)`.
///
/// A 1D array becomes a single column.
pub fn flatten_rows(array: &ArrayD<f64>) -> Result<Array2<f64>> {
    let shape = array.shape();
    let (rows, cols) = match shape.len() {
        0 => return Err(Error::Shape("cannot flatten a scalar".to_string())),
        1 => (shape[0], 1),
        n => (shape[..n - 1].iter().product(), shape[n - 1]),
    };
    Ok(Array2::from_shape_vec((rows, cols), array.iter().copied().collect())?)
}

/// Inverse of [`flatten_rows`] with a possibly different column count.
pub fn restore_rows(rows: Array2<f64>, leading: &[usize]) -> Result<ArrayD<f64>> {
    let mut shape = leading.to_vec();
    shape.push(rows.ncols());
    let expected: usize = leading.iter().product();
    if expected != rows.nrows() {
        return Err(Error::Shape(format!(
            "{} rows cannot fill leading shape {leading:?}",
            rows.nrows()
        )));
    }
    Ok(ArrayD::from_shape_vec(IxDyn(&shape), rows.iter().copied().collect())?)
}

/// Leading (non-column) dimensions of an array.
pub fn leading_shape(array: &ArrayD<f64>) -> Vec<usize> {
    let shape = array.shape();
    shape[..shape.len().saturating_sub(1)].to_vec()
}

/// Rows of `array` along axis 0.
pub fn select_samples(array: &ArrayD<f64>, samples: &[usize]) -> ArrayD<f64> {
    array.select(Axis(0), samples)
}

/// Sorted, de-duplicated union of index groups.
pub fn flatten_unique(groups: &[Vec<usize>]) -> Vec<usize> {
    let mut rows: Vec<usize> = groups.iter().flatten().copied().collect();
    rows.sort_unstable();
    rows.dedup();
    rows
}

/// JSON-safe array: non-finite values persist as `null` and load back as `NaN`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredArray {
    pub shape: Vec<usize>,
    pub data: Vec<Option<f64>>,
}

impl StoredArray {
    pub fn to_array(&self) -> Result<ArrayD<f64>> {
        let data = self.data.iter().map(|v| v.unwrap_or(f64::NAN)).collect();
        Ok(ArrayD::from_shape_vec(IxDyn(&self.shape), data)?)
    }
}

impl From<&ArrayD<f64>> for StoredArray {
    fn from(array: &ArrayD<f64>) -> Self {
        Self {
            shape: array.shape().to_vec(),
            data: array.iter().map(|v| v.is_finite().then_some(*v)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array3};

    #[test]
    fn test_flatten_and_restore_3d() {
        let a = Array3::from_shape_fn((2, 3, 4), |(i, j, k)| (i * 100 + j * 10 + k) as f64).into_dyn();
        let flat = flatten_rows(&a).expect("flatten should succeed");
        assert_eq!(flat.dim(), (6, 4));
        assert_eq!(flat[[4, 2]], 112.0);

        let back = restore_rows(flat, &leading_shape(&a)).expect("restore should succeed");
        assert_eq!(back, a);
    }

    #[test]
    fn test_flatten_1d_is_one_column() {
        let a = array![1.0, 2.0, 3.0].into_dyn();
        assert_eq!(flatten_rows(&a).expect("flatten should succeed").dim(), (3, 1));
    }

    #[test]
    fn test_restore_rejects_wrong_row_count() {
        let rows = Array2::<f64>::zeros((5, 2));
        assert!(restore_rows(rows, &[2, 3]).is_err());
    }

    #[test]
    fn test_flatten_unique() {
        let groups = vec![vec![3, 4, 5], vec![1, 2, 3], vec![5, 6]];
        assert_eq!(flatten_unique(&groups), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_stored_array_keeps_nan() {
        let a = array![[1.0, f64::NAN], [3.0, 4.0]].into_dyn();
        let json = serde_json::to_string(&StoredArray::from(&a)).expect("serialize should succeed");
        let stored: StoredArray = serde_json::from_str(&json).expect("parse should succeed");
        let back = stored.to_array().expect("shape should match");
        assert_eq!(back[[0, 0]], 1.0);
        assert!(back[[0, 1]].is_nan());
        assert_eq!(back.shape(), &[2, 2]);
    }
}

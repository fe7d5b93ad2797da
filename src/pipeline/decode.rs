//! Inverse path from encoded columns back to the original columns.
//!
//! Encoded rows hold each link's output in chain order followed by the
//! leftover columns. Decoding inverts each link on its own slice and writes
//! the result back at the link's original column positions.

use super::fitted::FittedChain;
use crate::data::array::{flatten_rows, leading_shape, restore_rows};
use crate::error::{Error, Result};
use ndarray::{s, Array2, ArrayD, ArrayView2};

/// Decode 2D encoded rows.
///
/// Returns `Ok(None)` when some encoder of the chain has no inverse; the
/// caller keeps the encoded values in that case.
pub fn decode_rows(chain: &FittedChain, encoded: ArrayView2<'_, f64>) -> Result<Option<Array2<f64>>> {
    if encoded.ncols() != chain.output_width() {
        return Err(Error::Shape(format!(
            "chain emits {} columns, got {}",
            chain.output_width(),
            encoded.ncols()
        )));
    }
    let mut decoded = Array2::from_elem((encoded.nrows(), chain.input_width), f64::NAN);
    let mut offset = 0;
    for link in &chain.links {
        let slice = encoded.slice(s![.., offset..offset + link.width]);
        let Some(inverse) = link.encoder.inverse_transform(slice) else {
            tracing::warn!(
                encoder = link.encoder.kind(),
                "encoder has no inverse_transform; leaving values encoded"
            );
            return Ok(None);
        };
        let inverse = inverse?;
        if inverse.dim() != (encoded.nrows(), link.positions.len()) {
            return Err(Error::Shape(format!(
                "inverse of `{}` returned {:?}, expected ({}, {})",
                link.encoder.kind(),
                inverse.dim(),
                encoded.nrows(),
                link.positions.len()
            )));
        }
        for (k, &position) in link.positions.iter().enumerate() {
            decoded.column_mut(position).assign(&inverse.column(k));
        }
        offset += link.width;
    }
    for (k, &position) in chain.leftover_positions.iter().enumerate() {
        decoded.column_mut(position).assign(&encoded.column(offset + k));
    }
    Ok(Some(decoded))
}

/// Decode an encoded array of any rank; the last axis holds the columns.
///
/// Arrays whose last axis no longer matches the chain (a shaper moved the
/// columns) are left encoded.
pub fn decode_array(chain: &FittedChain, encoded: &ArrayD<f64>) -> Result<Option<ArrayD<f64>>> {
    if encoded.shape().last() != Some(&chain.output_width()) {
        tracing::warn!(
            shape = ?encoded.shape(),
            width = chain.output_width(),
            "encoded columns are not on the last axis; leaving values encoded"
        );
        return Ok(None);
    }
    let leading = leading_shape(encoded);
    match decode_rows(chain, flatten_rows(encoded)?.view())? {
        Some(rows) => Ok(Some(restore_rows(rows, &leading)?)),
        None => Ok(None),
    }
}

//! Column assignment for chain links.
//!
//! Each link claims a subset of the columns left over by the link before it.
//! Filters select by dtype and/or explicit name, either inclusively (claim
//! what matches) or exclusively (claim everything else).

use crate::data::{Dtype, Schema};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Which remaining columns a link claims.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnFilter {
    pub include: bool,
    pub dtypes: Option<Vec<Dtype>>,
    pub columns: Option<Vec<String>>,
}

impl Default for ColumnFilter {
    fn default() -> Self {
        Self { include: true, dtypes: None, columns: None }
    }
}

impl ColumnFilter {
    /// Claim every remaining column.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn include_columns<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self { include: true, dtypes: None, columns: Some(columns.into_iter().map(Into::into).collect()) }
    }

    pub fn exclude_columns<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self { include: false, dtypes: None, columns: Some(columns.into_iter().map(Into::into).collect()) }
    }

    pub fn include_dtypes(dtypes: impl IntoIterator<Item = Dtype>) -> Self {
        Self { include: true, dtypes: Some(dtypes.into_iter().collect()), columns: None }
    }

    pub fn exclude_dtypes(dtypes: impl IntoIterator<Item = Dtype>) -> Self {
        Self { include: false, dtypes: Some(dtypes.into_iter().collect()), columns: None }
    }

    pub fn with_columns<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn is_unfiltered(&self) -> bool {
        self.dtypes.is_none() && self.columns.is_none()
    }
}

/// Outcome of [`assign_columns`] for one chain link.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnAssignment {
    /// Position of the link in its chain.
    pub index: usize,
    pub matching_columns: Vec<String>,
    pub leftover_columns: Vec<String>,
    pub leftover_dtypes: Vec<Dtype>,
    pub original_filter: ColumnFilter,
}

/// Work out the columns claimed by link `index` of a chain.
///
/// `previous_leftovers` is the leftover list of the last existing link, or
/// `None` for the first link (which starts from the whole `schema`).
/// Leftovers keep the schema's column order.
pub fn assign_columns(
    schema: &Schema,
    previous_leftovers: Option<&[String]>,
    index: usize,
    filter: &ColumnFilter,
    link_name: &str,
) -> Result<ColumnAssignment> {
    let remaining: Vec<String> = match previous_leftovers {
        None => schema.columns.clone(),
        Some([]) => {
            return Err(Error::config(format!(
                "every column already has a {link_name}; no more links can be added to this chain"
            )))
        }
        Some(leftovers) => leftovers.to_vec(),
    };
    let remaining_dtypes: Vec<Dtype> = remaining
        .iter()
        .map(|c| {
            schema
                .dtype_of(c)
                .ok_or_else(|| Error::Internal(format!("leftover column `{c}` missing from schema")))
        })
        .collect::<Result<_>>()?;

    tracing::debug!(link = link_name, index, remaining = ?remaining, "assigning columns");

    if let Some(dtypes) = &filter.dtypes {
        if let Some(missing) = dtypes.iter().find(|d| !remaining_dtypes.contains(d)) {
            return Err(Error::config(format!(
                "dtype `{missing}` was not found in the remaining columns; remove it from `dtypes`"
            )));
        }
    }
    if let Some(columns) = &filter.columns {
        if let Some(missing) = columns.iter().find(|c| !remaining.contains(c)) {
            return Err(Error::config(format!(
                "column `{missing}` was not found in the remaining columns; remove it from `columns`"
            )));
        }
    }

    let by_dtype = |dtypes: &[Dtype]| -> Vec<String> {
        remaining
            .iter()
            .zip(&remaining_dtypes)
            .filter(|(_, d)| dtypes.contains(d))
            .map(|(c, _)| c.clone())
            .collect()
    };

    let matching: Vec<String> = if filter.include {
        if filter.is_unfiltered() {
            remaining.clone()
        } else {
            let mut matching = filter.dtypes.as_deref().map(by_dtype).unwrap_or_default();
            for column in filter.columns.iter().flatten() {
                if matching.contains(column) {
                    return Err(Error::config(format!(
                        "column `{column}` was already included by `dtypes`; remove it from `columns`"
                    )));
                }
                matching.push(column.clone());
            }
            matching
        }
    } else {
        let mut matching = remaining.clone();
        if let Some(dtypes) = &filter.dtypes {
            let excluded = by_dtype(dtypes);
            matching.retain(|c| !excluded.contains(c));
        }
        for column in filter.columns.iter().flatten() {
            let Some(at) = matching.iter().position(|c| c == column) else {
                return Err(Error::config(format!(
                    "column `{column}` was already excluded by `dtypes`; remove it from `columns`"
                )));
            };
            matching.remove(at);
        }
        matching
    };

    if matching.is_empty() {
        let mode = if filter.include { "inclusion" } else { "exclusion" };
        return Err(Error::config(format!(
            "no columns left to use after applying the dtype and column {mode} filters"
        )));
    }

    let (leftover_columns, leftover_dtypes): (Vec<String>, Vec<Dtype>) = remaining
        .into_iter()
        .zip(remaining_dtypes)
        .filter(|(c, _)| !matching.contains(c))
        .unzip();

    tracing::debug!(link = link_name, index, matching = ?matching, leftover = ?leftover_columns, "columns assigned");

    Ok(ColumnAssignment {
        index,
        matching_columns: matching,
        leftover_columns,
        leftover_dtypes,
        original_filter: filter.clone(),
    })
}

//! Run a feature's or label's whole preprocessing chain.
//!
//! Order: raw values → interpolation → encoding (fit on training rows, or a
//! replayed fit) → windowing → reshaping. Every step works on the full array
//! so the queue can slice partitions out of the result afterwards.

use super::fitted::{ChainId, FitGroup, FittedChain, FittedEncoderset, FittedLabelcoder};
use super::interpolate::{interpolate_feature, interpolate_label};
use crate::context::Context;
use crate::data::array::{flatten_rows, leading_shape, restore_rows};
use crate::error::{Error, Result};
use crate::feature::{Feature, Label};
use crate::split::{train_partition, Partitions};
use crate::store::is_constraint_violation;
use crate::window::Window;
use ndarray::{stack, ArrayD, ArrayView2, Axis};
use std::sync::Arc;

/// Where the encoders of a chain get their fit.
#[derive(Debug, Clone, Copy)]
pub enum FitSource<'a> {
    /// Fit on the training partition and record the fit for every job in
    /// `job_ids` (all of them share the fold group).
    Train { group: FitGroup, job_ids: &'a [i64] },
    /// Replay the fit recorded for `job_id`; never refit.
    Trained { group: FitGroup, job_id: i64 },
}

impl FitSource<'_> {
    fn group(&self) -> FitGroup {
        match self {
            Self::Train { group, .. } | Self::Trained { group, .. } => *group,
        }
    }
}

/// A feature after its whole chain ran.
#[derive(Debug, Clone)]
pub struct PreprocessedFeature {
    /// Axis 0 indexes samples, or windows when the feature is windowed.
    pub features: ArrayD<f64>,
    /// Window targets, when the window records them.
    pub shifted: Option<ArrayD<f64>>,
    /// Axis holding the encoded columns.
    pub column_position: usize,
}

/// Stack the row groups of a window into a new leading axis.
fn stack_windows(values: &ArrayD<f64>, groups: &[Vec<usize>]) -> Result<ArrayD<f64>> {
    let windows: Vec<ArrayD<f64>> = groups.iter().map(|g| values.select(Axis(0), g)).collect();
    let views: Vec<_> = windows.iter().map(|w| w.view()).collect();
    Ok(stack(Axis(0), &views)?)
}

/// Flattened row positions covered by axis-0 entries `samples` of `values`.
fn flat_rows(values: &ArrayD<f64>, samples: &[usize]) -> Vec<usize> {
    let per: usize = values.shape()[1..values.ndim().saturating_sub(1)].iter().product();
    samples.iter().flat_map(|&s| s * per..(s + 1) * per).collect()
}

fn train_axis0(samples: Option<&Partitions>, window: Option<&Window>) -> Result<Vec<usize>> {
    let (_, train) = samples
        .and_then(train_partition)
        .ok_or_else(|| Error::config("encoders need a training partition to fit on"))?;
    Ok(match window {
        Some(window) => window.rows_for(train),
        None => train.to_vec(),
    })
}

fn feature_chain(
    ctx: &Context,
    chain_owner: &Feature,
    values: &ArrayD<f64>,
    flat: ArrayView2<'_, f64>,
    samples: Option<&Partitions>,
    window: Option<&Window>,
    fit: FitSource<'_>,
) -> Result<Option<Arc<FittedChain>>> {
    let Some(encoderset) = chain_owner.encoderset(ctx)? else {
        return Ok(None);
    };
    let coders = encoderset.coders(ctx)?;
    if coders.is_empty() {
        return Ok(None);
    }
    let group = fit.group();
    let chain = ChainId::Encoderset(encoderset.id);
    if let Some(fitted) = ctx.fitted()?.get(group, chain) {
        return Ok(Some(fitted));
    }

    let schema = chain_owner.schema();
    let fitted = match fit {
        FitSource::Train { job_ids, .. } => {
            let rows = flat_rows(values, &train_axis0(samples, window)?);
            let fitted = FittedChain::fit_features(ctx, encoderset.id, &coders, &schema, flat.select(Axis(0), &rows).view())?;
            let state = fitted.state();
            for &job_id in job_ids {
                let mut record = FittedEncoderset { id: 0, job_id, encoderset_id: encoderset.id, state: state.clone() };
                match ctx.store().insert(&mut record) {
                    Err(e) if is_constraint_violation(&e) => {}
                    other => {
                        other?;
                    }
                }
            }
            tracing::debug!(encoderset_id = encoderset.id, rows = rows.len(), "encoders fit on training rows");
            fitted
        }
        FitSource::Trained { job_id, .. } => {
            let record: FittedEncoderset = ctx
                .store()
                .find_one(&[("job_id", Some(job_id)), ("encoderset_id", Some(encoderset.id))])?
                .ok_or_else(|| Error::not_found("FittedEncoderset", format!("job {job_id}, encoderset {}", encoderset.id)))?;
            FittedChain::restore_features(ctx, encoderset.id, &coders, &schema, &record.state)?
        }
    };
    Ok(Some(ctx.fitted()?.insert(group, fitted)))
}

/// Fitted encoder chain of a feature, if it has one.
pub fn fitted_feature_chain(
    ctx: &Context,
    chain_owner: &Feature,
    fit: FitSource<'_>,
) -> Result<Option<Arc<FittedChain>>> {
    let Some(encoderset) = chain_owner.encoderset(ctx)? else {
        return Ok(None);
    };
    if let Some(fitted) = ctx.fitted()?.get(fit.group(), ChainId::Encoderset(encoderset.id)) {
        return Ok(Some(fitted));
    }
    let values = chain_owner.to_array(ctx, None)?;
    let flat = flatten_rows(&values)?;
    feature_chain(ctx, chain_owner, &values, flat.view(), None, None, fit)
}

/// Run the full chain of `feature`.
///
/// `chain_owner` supplies the encoderset; it is `feature` itself during
/// training and the trained feature during inference.
pub fn preprocess_feature(
    ctx: &Context,
    feature: &Feature,
    chain_owner: &Feature,
    samples: Option<&Partitions>,
    fit: FitSource<'_>,
) -> Result<PreprocessedFeature> {
    let window = feature.window(ctx)?;
    let values = interpolate_feature(ctx, feature, feature.to_array(ctx, None)?, samples, window.as_ref())?;

    let flat = flatten_rows(&values)?;
    let encoded = match feature_chain(ctx, chain_owner, &values, flat.view(), samples, window.as_ref(), fit)? {
        Some(chain) => restore_rows(chain.transform(flat.view())?, &leading_shape(&values))?,
        None => values,
    };

    let (mut features, mut shifted) = match &window {
        Some(window) => (
            stack_windows(&encoded, &window.samples_unshifted)?,
            window.samples_shifted.as_deref().map(|g| stack_windows(&encoded, g)).transpose()?,
        ),
        None => (encoded, None),
    };

    let mut column_position = features.ndim() - 1;
    if let Some(shaper) = feature.shaper(ctx)? {
        features = shaper.apply(&features)?;
        shifted = shifted.map(|s| shaper.apply(&s)).transpose()?;
        column_position = shaper.column_position;
    }
    Ok(PreprocessedFeature { features, shifted, column_position })
}

fn label_chain(
    ctx: &Context,
    chain_owner: &Label,
    values: &ArrayD<f64>,
    samples: Option<&Partitions>,
    fit: FitSource<'_>,
) -> Result<Option<Arc<FittedChain>>> {
    let Some(coder) = chain_owner.labelcoder(ctx)? else {
        return Ok(None);
    };
    let group = fit.group();
    let chain = ChainId::LabelCoder(coder.id);
    if let Some(fitted) = ctx.fitted()?.get(group, chain) {
        return Ok(Some(fitted));
    }

    let fitted = match fit {
        FitSource::Train { job_ids, .. } => {
            let rows = train_axis0(samples, None)?;
            let flat = flatten_rows(values)?;
            let fitted = FittedChain::fit_label(ctx, &coder, flat.select(Axis(0), &rows).view())?;
            let state = fitted.state();
            let width = fitted.output_width();
            for &job_id in job_ids {
                let mut record = FittedLabelcoder { id: 0, job_id, labelcoder_id: coder.id, width, state: state.clone() };
                match ctx.store().insert(&mut record) {
                    Err(e) if is_constraint_violation(&e) => {}
                    other => {
                        other?;
                    }
                }
            }
            fitted
        }
        FitSource::Trained { job_id, .. } => {
            let record: FittedLabelcoder = ctx
                .store()
                .find_one(&[("job_id", Some(job_id)), ("labelcoder_id", Some(coder.id))])?
                .ok_or_else(|| Error::not_found("FittedLabelcoder", format!("job {job_id}, labelcoder {}", coder.id)))?;
            FittedChain::restore_label(ctx, &coder, &record.state, record.width)?
        }
    };
    Ok(Some(ctx.fitted()?.insert(group, fitted)))
}

/// Fitted label coder chain of a label, if it has one.
pub fn fitted_label_chain(ctx: &Context, chain_owner: &Label, fit: FitSource<'_>) -> Result<Option<Arc<FittedChain>>> {
    let values = chain_owner.to_array(ctx, None)?;
    label_chain(ctx, chain_owner, &values, None, fit)
}

/// Interpolate and encode a label; the result stays 2D.
pub fn preprocess_label(
    ctx: &Context,
    label: &Label,
    chain_owner: &Label,
    samples: Option<&Partitions>,
    fit: FitSource<'_>,
) -> Result<ArrayD<f64>> {
    let values = interpolate_label(ctx, label, label.to_array(ctx, None)?, samples)?;
    match label_chain(ctx, chain_owner, &values, samples, fit)? {
        Some(chain) => Ok(chain.transform(flatten_rows(&values)?.view())?.into_dyn()),
        None => Ok(values),
    }
}

/// Interpolated feature values with windows stacked, for stratification.
pub fn feature_stratify_array(ctx: &Context, feature: &Feature) -> Result<ArrayD<f64>> {
    let window = feature.window(ctx)?;
    let values = interpolate_feature(ctx, feature, feature.to_array(ctx, None)?, None, window.as_ref())?;
    match window {
        Some(window) => stack_windows(&values, &window.samples_unshifted),
        None => Ok(values),
    }
}

/// Interpolated label values, for stratification.
pub fn label_stratify_array(ctx: &Context, label: &Label) -> Result<ArrayD<f64>> {
    interpolate_label(ctx, label, label.to_array(ctx, None)?, None)
}

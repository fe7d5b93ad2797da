//! Sliding windows over a feature's sample axis.
//!
//! Windows are anchored at the tail so the last recorded group ends at
//! sample `N - 1`. With `record_shifted` each input group (`unshifted`) is
//! paired with a target group starting `size_shift` samples later.

use crate::context::Context;
use crate::data::array::flatten_unique;
use crate::data::{DatasetKind, SampleSource};
use crate::error::{Error, Result};
use crate::feature::Feature;
use crate::store::Entity;
use serde::{Deserialize, Serialize};

/// Index groups produced by [`window_indices`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowIndices {
    pub window_count: usize,
    pub samples_unshifted: Vec<Vec<usize>>,
    pub samples_shifted: Option<Vec<Vec<usize>>>,
}

/// Compute window groups for `sample_count` samples.
///
/// Shifted mode requires `1 <= size_window <= N - size_shift` and
/// `1 <= size_shift <= N - size_window`; inference mode only needs the window
/// to fit.
pub fn window_indices(
    sample_count: usize,
    size_window: usize,
    size_shift: usize,
    record_shifted: bool,
) -> Result<WindowIndices> {
    let n = sample_count;
    if size_window == 0 || size_shift == 0 {
        return Err(Error::config(format!(
            "size_window ({size_window}) and size_shift ({size_shift}) must be >= 1"
        )));
    }

    if record_shifted {
        if size_window + size_shift > n {
            return Err(Error::config(format!(
                "size_window ({size_window}) + size_shift ({size_shift}) exceeds {n} samples"
            )));
        }
        let window_count = (n - size_window) / size_shift;
        let prune_shifted_lead = n - ((window_count - 1) * size_shift + size_window);
        let prune_unshifted_lead = prune_shifted_lead - size_shift;

        let mut unshifted = Vec::with_capacity(window_count);
        let mut shifted = Vec::with_capacity(window_count);
        for i in 0..window_count {
            let start = prune_unshifted_lead + i * size_shift;
            unshifted.push((start..start + size_window).collect());
            let start = start + size_shift;
            shifted.push((start..start + size_window).collect());
        }
        Ok(WindowIndices { window_count, samples_unshifted: unshifted, samples_shifted: Some(shifted) })
    } else {
        if size_window > n {
            return Err(Error::config(format!("size_window ({size_window}) exceeds {n} samples")));
        }
        let window_count = (n - size_window) / size_shift + 1;
        let prune_lead = n - ((window_count - 1) * size_shift + size_window);
        let unshifted = (0..window_count)
            .map(|i| {
                let start = prune_lead + i * size_shift;
                (start..start + size_window).collect()
            })
            .collect();
        Ok(WindowIndices { window_count, samples_unshifted: unshifted, samples_shifted: None })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Window {
    #[serde(default)]
    pub id: i64,
    pub feature_id: i64,
    pub size_window: usize,
    pub size_shift: usize,
    pub window_count: usize,
    pub record_shifted: bool,
    pub samples_unshifted: Vec<Vec<usize>>,
    pub samples_shifted: Option<Vec<Vec<usize>>>,
}

impl Entity for Window {
    const TABLE: &'static str = "windows";
    const NAME: &'static str = "Window";

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

impl Window {
    /// Window a tabular or image feature along its sample axis.
    pub fn create(
        ctx: &Context,
        feature_id: i64,
        size_window: usize,
        size_shift: usize,
        record_shifted: bool,
    ) -> Result<Self> {
        let feature: Feature = ctx.store().get(feature_id)?;
        if feature.kind == DatasetKind::Sequence {
            return Err(Error::config("sequence features are already grouped; window tabular or image data"));
        }
        let sample_count = feature.dataset(ctx)?.sample_count();
        let indices = window_indices(sample_count, size_window, size_shift, record_shifted)?;

        let mut window = Window {
            id: 0,
            feature_id,
            size_window,
            size_shift,
            window_count: indices.window_count,
            record_shifted,
            samples_unshifted: indices.samples_unshifted,
            samples_shifted: indices.samples_shifted,
        };
        ctx.store().insert(&mut window)?;
        tracing::info!(feature_id, window_count = window.window_count, "window created");
        Ok(window)
    }

    /// Sorted underlying rows covered by the given input windows.
    pub fn rows_for(&self, windows: &[usize]) -> Vec<usize> {
        let groups: Vec<Vec<usize>> =
            windows.iter().filter_map(|&w| self.samples_unshifted.get(w).cloned()).collect();
        flatten_unique(&groups)
    }
}

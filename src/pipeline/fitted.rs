//! Fitted encoder chains and their cache.
//!
//! A chain is fit once per fold group on that group's training rows and then
//! transforms every partition. The in-process cache is keyed by
//! `(fold group, chain)`; each job that used a fit also gets a persisted
//! [`FittedEncoderset`] / [`FittedLabelcoder`] so inference in a later
//! process can replay the exact same transform.

use super::encode::{FeatureCoder, LabelCoder};
use super::Encoder;
use crate::context::Context;
use crate::data::Schema;
use crate::error::{Error, Result};
use crate::store::Entity;
use ndarray::{concatenate, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Version of the persisted [`FittedState`] layout.
pub const FITTED_STATE_VERSION: u32 = 1;

/// Which chain a fit belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChainId {
    Encoderset(i64),
    LabelCoder(i64),
}

/// Jobs sharing training rows: one queue, one fold (or no fold).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FitGroup {
    pub queue_id: i64,
    pub fold_id: Option<i64>,
}

pub(crate) struct FittedLink {
    pub(crate) encoder: Box<dyn Encoder>,
    /// Input column positions this link consumes.
    pub(crate) positions: Vec<usize>,
    /// Number of columns this link emits.
    pub(crate) width: usize,
}

/// A chain whose encoders are already fit.
pub struct FittedChain {
    chain: ChainId,
    pub(crate) links: Vec<FittedLink>,
    pub(crate) leftover_positions: Vec<usize>,
    pub(crate) input_width: usize,
}

impl std::fmt::Debug for FittedChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FittedChain")
            .field("chain", &self.chain)
            .field("links", &self.links.iter().map(|l| l.encoder.kind()).collect::<Vec<_>>())
            .field("leftover_positions", &self.leftover_positions)
            .field("input_width", &self.input_width)
            .finish()
    }
}

/// One link's rebuild recipe and fitted parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkState {
    pub kind: String,
    pub params: Value,
    pub fitted_state: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedState {
    pub format_version: u32,
    pub links: Vec<LinkState>,
}

fn feature_plan(coders: &[FeatureCoder], schema: &Schema) -> Result<(Vec<Vec<usize>>, Vec<usize>)> {
    let positions = coders
        .iter()
        .map(|c| schema.positions(&c.matching_columns))
        .collect::<Result<Vec<_>>>()?;
    let leftovers = match coders.last() {
        Some(last) => schema.positions(&last.leftover_columns)?,
        None => (0..schema.columns.len()).collect(),
    };
    Ok((positions, leftovers))
}

impl FittedChain {
    /// Fit every coder of an encoderset on `train` rows, in chain order.
    pub fn fit_features(
        ctx: &Context,
        encoderset_id: i64,
        coders: &[FeatureCoder],
        schema: &Schema,
        train: ArrayView2<'_, f64>,
    ) -> Result<Self> {
        let (positions, leftover_positions) = feature_plan(coders, schema)?;
        let mut links = Vec::with_capacity(coders.len());
        for (coder, positions) in coders.iter().zip(positions) {
            let mut encoder = ctx.transforms().build_encoder(&coder.kind, &coder.params)?;
            encoder.fit(train.select(Axis(1), &positions).view())?;
            links.push(FittedLink { encoder, positions, width: coder.encoded_column_names.len() });
        }
        Ok(Self {
            chain: ChainId::Encoderset(encoderset_id),
            links,
            leftover_positions,
            input_width: schema.columns.len(),
        })
    }

    /// Fit a label coder on `train` label rows.
    pub fn fit_label(ctx: &Context, coder: &LabelCoder, train: ArrayView2<'_, f64>) -> Result<Self> {
        let mut encoder = ctx.transforms().build_encoder(&coder.kind, &coder.params)?;
        encoder.fit(train)?;
        let width = encoder.transform(train)?.ncols();
        let input_width = coder.matching_columns.len();
        Ok(Self {
            chain: ChainId::LabelCoder(coder.id),
            links: vec![FittedLink { encoder, positions: (0..input_width).collect(), width }],
            leftover_positions: Vec::new(),
            input_width,
        })
    }

    /// Rebuild a feature chain from a persisted state.
    pub fn restore_features(
        ctx: &Context,
        encoderset_id: i64,
        coders: &[FeatureCoder],
        schema: &Schema,
        state: &FittedState,
    ) -> Result<Self> {
        check_state(state, coders.len())?;
        let (positions, leftover_positions) = feature_plan(coders, schema)?;
        let mut links = Vec::with_capacity(coders.len());
        for ((coder, positions), link) in coders.iter().zip(positions).zip(&state.links) {
            let encoder = restore_encoder(ctx, link)?;
            links.push(FittedLink { encoder, positions, width: coder.encoded_column_names.len() });
        }
        Ok(Self {
            chain: ChainId::Encoderset(encoderset_id),
            links,
            leftover_positions,
            input_width: schema.columns.len(),
        })
    }

    /// Rebuild a label chain; `width` is the encoded label width.
    pub fn restore_label(ctx: &Context, coder: &LabelCoder, state: &FittedState, width: usize) -> Result<Self> {
        check_state(state, 1)?;
        let encoder = restore_encoder(ctx, &state.links[0])?;
        let input_width = coder.matching_columns.len();
        Ok(Self {
            chain: ChainId::LabelCoder(coder.id),
            links: vec![FittedLink { encoder, positions: (0..input_width).collect(), width }],
            leftover_positions: Vec::new(),
            input_width,
        })
    }

    pub fn chain(&self) -> ChainId {
        self.chain
    }

    /// Width after encoding.
    pub fn output_width(&self) -> usize {
        self.links.iter().map(|l| l.width).sum::<usize>() + self.leftover_positions.len()
    }

    /// Encode 2D rows: each link's output in chain order, then the leftovers.
    pub fn transform(&self, data: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        if data.ncols() != self.input_width {
            return Err(Error::Shape(format!(
                "chain expects {} columns, got {}",
                self.input_width,
                data.ncols()
            )));
        }
        let mut parts = Vec::with_capacity(self.links.len() + 1);
        for link in &self.links {
            let encoded = link.encoder.transform(data.select(Axis(1), &link.positions).view())?;
            if encoded.ncols() != link.width || encoded.nrows() != data.nrows() {
                return Err(Error::Shape(format!(
                    "encoder `{}` returned {:?}, expected ({}, {})",
                    link.encoder.kind(),
                    encoded.dim(),
                    data.nrows(),
                    link.width
                )));
            }
            parts.push(encoded);
        }
        if !self.leftover_positions.is_empty() {
            parts.push(data.select(Axis(1), &self.leftover_positions));
        }
        let views: Vec<ArrayView2<'_, f64>> = parts.iter().map(|p| p.view()).collect();
        Ok(concatenate(Axis(1), &views)?)
    }

    /// Snapshot for persistence.
    pub fn state(&self) -> FittedState {
        FittedState {
            format_version: FITTED_STATE_VERSION,
            links: self
                .links
                .iter()
                .map(|l| LinkState {
                    kind: l.encoder.kind().to_string(),
                    params: l.encoder.params(),
                    fitted_state: l.encoder.fitted_state(),
                })
                .collect(),
        }
    }
}

fn check_state(state: &FittedState, links: usize) -> Result<()> {
    if state.format_version != FITTED_STATE_VERSION {
        return Err(Error::Serialization(format!(
            "fitted state version {} is not supported (expected {FITTED_STATE_VERSION})",
            state.format_version
        )));
    }
    if state.links.len() != links {
        return Err(Error::Serialization(format!(
            "fitted state holds {} links but the chain has {links}",
            state.links.len()
        )));
    }
    Ok(())
}

fn restore_encoder(ctx: &Context, link: &LinkState) -> Result<Box<dyn Encoder>> {
    let mut encoder = ctx.transforms().build_encoder(&link.kind, &link.params)?;
    let state = link.fitted_state.as_ref().ok_or_else(|| {
        Error::config(format!("encoder `{}` exported no fitted state; it cannot be replayed", link.kind))
    })?;
    encoder.restore(state)?;
    Ok(encoder)
}

/// Fits shared by the jobs of one fold group, per chain.
#[derive(Debug, Default)]
pub struct FittedTransformCache {
    chains: HashMap<(FitGroup, ChainId), Arc<FittedChain>>,
}

impl FittedTransformCache {
    pub fn get(&self, group: FitGroup, chain: ChainId) -> Option<Arc<FittedChain>> {
        self.chains.get(&(group, chain)).cloned()
    }

    /// Store a fit; an existing fit for the same key wins.
    pub fn insert(&mut self, group: FitGroup, fitted: FittedChain) -> Arc<FittedChain> {
        let key = (group, fitted.chain);
        Arc::clone(self.chains.entry(key).or_insert_with(|| Arc::new(fitted)))
    }

    /// Drop every fit made for a queue.
    pub fn evict_queue(&mut self, queue_id: i64) {
        self.chains.retain(|(group, _), _| group.queue_id != queue_id);
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

/// The fitted encoderset a job used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedEncoderset {
    #[serde(default)]
    pub id: i64,
    pub job_id: i64,
    pub encoderset_id: i64,
    pub state: FittedState,
}

impl Entity for FittedEncoderset {
    const TABLE: &'static str = "fitted_encodersets";
    const NAME: &'static str = "FittedEncoderset";

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn keys(&self) -> Vec<(&'static str, Option<i64>)> {
        vec![("job_id", Some(self.job_id)), ("encoderset_id", Some(self.encoderset_id))]
    }
}

/// The fitted label coder a job used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedLabelcoder {
    #[serde(default)]
    pub id: i64,
    pub job_id: i64,
    pub labelcoder_id: i64,
    /// Encoded label width.
    pub width: usize,
    pub state: FittedState,
}

impl Entity for FittedLabelcoder {
    const TABLE: &'static str = "fitted_labelcoders";
    const NAME: &'static str = "FittedLabelcoder";

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn keys(&self) -> Vec<(&'static str, Option<i64>)> {
        vec![("job_id", Some(self.job_id)), ("labelcoder_id", Some(self.labelcoder_id))]
    }
}

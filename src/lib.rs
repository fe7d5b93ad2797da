//! Reproducible ML experiment engine.
//!
//! Ensayo turns registered datasets into leakage-safe experiments:
//! - Stratified train / validation / test splits and k-fold cross validation
//! - Sliding windows over sequential samples
//! - Column-scoped interpolation and encoding chains fit on training rows only
//! - A resumable queue of (hyperparameter combo, fold, repeat) training runs
//! - Metrics, permutation feature importance and inference on new data
//!
//! Every operation takes an explicit [`Context`] holding the store, the
//! dataset and transform registries, the fitted-transform cache and the
//! seeded random source.
//!
//! # Example
//!
//! ```ignore
//! use ensayo::prelude::*;
//!
//! let ctx = Context::in_memory(42)?;
//! let dataset_id = ctx.register_dataset(Tabular::from_columns(&columns)?)?;
//! let feature = Feature::create(&ctx, dataset_id, None, Some(vec!["target".into()]))?;
//! let label = Label::create(&ctx, dataset_id, vec!["target".into()])?;
//! let splitset = Splitset::make(&ctx, SplitRequest::new(vec![feature.id])
//!     .with_label(label.id)
//!     .with_size_test(0.2))?;
//! let queue = Queue::create(&ctx, QueueRequest::new(algorithm.id, splitset.id))?;
//! queue.run_jobs(&ctx, &my_architecture)?;
//! ```

pub mod cli;
pub mod config;
pub mod context;
pub mod data;
pub mod error;
pub mod eval;
pub mod feature;
pub mod pipeline;
pub mod queue;
pub mod split;
pub mod store;
pub mod window;

pub use context::Context;
pub use error::{Error, Result};

/// The types most experiments touch.
pub mod prelude {
    pub use crate::config::EnsayoConfig;
    pub use crate::context::Context;
    pub use crate::data::{Dataset, DatasetKind, Dtype, Image, Sequence, Tabular};
    pub use crate::error::{Error, Result};
    pub use crate::eval::{Metric, MetricSet};
    pub use crate::feature::{Feature, Label};
    pub use crate::pipeline::{
        ColumnFilter, Encoderset, FeatureCoder, FeatureInterpolater, FeatureShaper, LabelCoder, LabelInterpolater,
        ReshapeIndex,
    };
    pub use crate::queue::{
        Algorithm, AnalysisType, Architecture, Hyperparameters, Hyperparamset, Predicted, Prediction, Predictor, Queue,
        QueueRequest, Samples, Trained,
    };
    pub use crate::split::{Foldset, Partition, SplitRequest, Splitset};
    pub use crate::window::Window;
}

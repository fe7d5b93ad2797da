//! Explicit process context threaded through every pipeline and queue call.
//!
//! Built once at process start from an [`EnsayoConfig`]; owns the store, the
//! in-process dataset and transform registries, the fitted-transform cache,
//! the random seed source and the cooperative interrupt flag.

use crate::config::EnsayoConfig;
use crate::data::{Dataset, DatasetKind, SampleSource, Schema};
use crate::error::{Error, Result};
use crate::pipeline::fitted::FittedTransformCache;
use crate::pipeline::{Encoder, Interpolate, TransformRegistry};
use crate::store::{Entity, Store};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

/// Persisted description of a registered dataset; the values stay in memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRecord {
    #[serde(default)]
    pub id: i64,
    pub kind: DatasetKind,
    pub schema: Schema,
    pub shape: Vec<usize>,
}

impl Entity for DatasetRecord {
    const TABLE: &'static str = "datasets";
    const NAME: &'static str = "Dataset";

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }
}

pub struct Context {
    config: EnsayoConfig,
    store: Store,
    datasets: RwLock<HashMap<i64, Arc<Dataset>>>,
    transforms: TransformRegistry,
    fitted: Mutex<FittedTransformCache>,
    rng: Mutex<StdRng>,
    interrupt: Arc<AtomicBool>,
}

impl Context {
    pub fn from_config(config: EnsayoConfig) -> Result<Self> {
        crate::config::validate_config(&config)?;
        let store = Store::open(&config.store_path)?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            config,
            store,
            datasets: RwLock::new(HashMap::new()),
            transforms: TransformRegistry::default(),
            fitted: Mutex::new(FittedTransformCache::default()),
            rng: Mutex::new(rng),
            interrupt: Arc::new(AtomicBool::new(false)),
        })
    }

    /// In-memory store with a fixed seed.
    pub fn in_memory(seed: u64) -> Result<Self> {
        Self::from_config(EnsayoConfig::in_memory(seed))
    }

    pub fn config(&self) -> &EnsayoConfig {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn cache_dir(&self) -> &Path {
        &self.config.cache_dir
    }

    pub fn transforms(&self) -> &TransformRegistry {
        &self.transforms
    }

    /// Register a fresh dataset; persists its schema and returns the new id.
    pub fn register_dataset(&self, dataset: impl Into<Dataset>) -> Result<i64> {
        let dataset = dataset.into();
        let mut record = DatasetRecord {
            id: 0,
            kind: dataset.kind(),
            schema: dataset.schema().clone(),
            shape: dataset.values().shape().to_vec(),
        };
        let id = self.store.insert(&mut record)?;
        self.datasets_mut()?.insert(id, Arc::new(dataset));
        Ok(id)
    }

    /// Re-attach values for a dataset persisted by an earlier process.
    pub fn attach_dataset(&self, id: i64, dataset: impl Into<Dataset>) -> Result<()> {
        let dataset = dataset.into();
        let record: DatasetRecord = self.store.get(id)?;
        if record.kind != dataset.kind()
            || &record.schema != dataset.schema()
            || record.shape != dataset.values().shape()
        {
            return Err(Error::config(format!("dataset {id} does not match its persisted schema")));
        }
        self.datasets_mut()?.insert(id, Arc::new(dataset));
        Ok(())
    }

    pub fn dataset(&self, id: i64) -> Result<Arc<Dataset>> {
        let datasets = self
            .datasets
            .read()
            .map_err(|e| Error::Internal(format!("Failed to acquire dataset lock: {e}")))?;
        datasets.get(&id).cloned().ok_or_else(|| {
            Error::config(format!("dataset {id} has no values loaded in this process; attach it first"))
        })
    }

    fn datasets_mut(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<i64, Arc<Dataset>>>> {
        self.datasets
            .write()
            .map_err(|e| Error::Internal(format!("Failed to acquire dataset lock: {e}")))
    }

    /// Make an encoder kind constructible from its persisted parameters.
    pub fn register_encoder<F>(&self, kind: &str, factory: F) -> Result<()>
    where
        F: Fn(&serde_json::Value) -> Result<Box<dyn Encoder>> + Send + Sync + 'static,
    {
        self.transforms.register_encoder(kind, Arc::new(factory))
    }

    pub fn register_interpolater<F>(&self, kind: &str, factory: F) -> Result<()>
    where
        F: Fn(&serde_json::Value) -> Result<Box<dyn Interpolate>> + Send + Sync + 'static,
    {
        self.transforms.register_interpolater(kind, Arc::new(factory))
    }

    pub fn fitted(&self) -> Result<MutexGuard<'_, FittedTransformCache>> {
        self.fitted
            .lock()
            .map_err(|e| Error::Internal(format!("Failed to acquire fitted-transform lock: {e}")))
    }

    /// Draw a seed from the context's random source.
    pub fn next_seed(&self) -> Result<u64> {
        let mut rng = self
            .rng
            .lock()
            .map_err(|e| Error::Internal(format!("Failed to acquire rng lock: {e}")))?;
        Ok(rng.gen())
    }

    /// A child generator seeded from the context source.
    pub fn rng(&self) -> Result<StdRng> {
        Ok(StdRng::seed_from_u64(self.next_seed()?))
    }

    /// Shared flag checked at the top of the run loop.
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    pub fn interrupt(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }

    pub fn clear_interrupt(&self) {
        self.interrupt.store(false, Ordering::SeqCst);
    }
}

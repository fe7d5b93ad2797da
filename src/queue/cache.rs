//! On-disk snapshot of the staged partitions of one fold group.
//!
//! Written once before a fold's units run and reloaded for every unit after
//! the first. The file is gzip-compressed JSON and is always removed when the
//! loop finishes, is interrupted or fails.

use super::algorithm::Samples;
use crate::data::array::StoredArray;
use crate::error::{Error, Result};
use crate::split::Partition;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Staged samples per partition.
pub type Staged = BTreeMap<Partition, Samples>;

#[derive(Serialize, Deserialize)]
struct StoredSamples {
    features: Vec<StoredArray>,
    labels: Option<StoredArray>,
}

/// `<dir>/queue-{id}_cached_samples.json.gz`, with `_fold-{index}` when folded.
pub fn cache_path(dir: &Path, queue_id: i64, fold_index: Option<usize>) -> PathBuf {
    let name = match fold_index {
        Some(index) => format!("queue-{queue_id}_fold-{index}_cached_samples.json.gz"),
        None => format!("queue-{queue_id}_cached_samples.json.gz"),
    };
    dir.join(name)
}

pub fn write(path: &Path, staged: &Staged) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io(format!("create {}", parent.display()), e))?;
    }
    let stored: BTreeMap<Partition, StoredSamples> = staged
        .iter()
        .map(|(p, s)| {
            let samples = StoredSamples {
                features: s.features.iter().map(StoredArray::from).collect(),
                labels: s.labels.as_ref().map(StoredArray::from),
            };
            (*p, samples)
        })
        .collect();

    let file = File::create(path).map_err(|e| Error::io(format!("create {}", path.display()), e))?;
    let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    serde_json::to_writer(&mut encoder, &stored)?;
    encoder
        .finish()
        .and_then(|mut w| w.flush())
        .map_err(|e| Error::io(format!("write {}", path.display()), e))?;
    tracing::debug!(path = %path.display(), partitions = staged.len(), "cached staged samples");
    Ok(())
}

pub fn read(path: &Path) -> Result<Staged> {
    let file = File::open(path).map_err(|e| Error::io(format!("open {}", path.display()), e))?;
    let stored: BTreeMap<Partition, StoredSamples> =
        serde_json::from_reader(GzDecoder::new(BufReader::new(file)))?;
    stored
        .into_iter()
        .map(|(p, s)| {
            let samples = Samples {
                features: s.features.iter().map(StoredArray::to_array).collect::<Result<_>>()?,
                labels: s.labels.as_ref().map(StoredArray::to_array).transpose()?,
            };
            Ok((p, samples))
        })
        .collect()
}

/// Remove the cache file; a missing file is not an error.
pub fn remove(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "removed cached samples"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove cached samples"),
    }
}

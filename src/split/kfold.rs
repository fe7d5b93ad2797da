//! K-Fold cross-validation splitters

use crate::error::{Error, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeMap;

/// Fold-relative `(train, validation)` positions, one pair per fold.
pub type FoldPositions = Vec<(Vec<usize>, Vec<usize>)>;

/// K-Fold cross-validation splitter
#[derive(Clone, Debug)]
pub struct KFold {
    n_splits: usize,
    shuffle: bool,
    seed: u64,
}

impl KFold {
    /// Create a new KFold splitter
    pub fn new(n_splits: usize) -> Self {
        Self { n_splits, shuffle: true, seed: 42 }
    }

    /// Set random seed for shuffling
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Disable shuffling
    pub fn without_shuffle(mut self) -> Self {
        self.shuffle = false;
        self
    }

    /// Generate train/validation positions for each fold
    pub fn split(&self, n_samples: usize) -> Result<FoldPositions> {
        check_splits(self.n_splits, n_samples)?;
        let mut indices: Vec<usize> = (0..n_samples).collect();

        if self.shuffle {
            indices.shuffle(&mut StdRng::seed_from_u64(self.seed));
        }

        let fold_size = n_samples / self.n_splits;
        let remainder = n_samples % self.n_splits;

        let mut folds = Vec::with_capacity(self.n_splits);
        let mut start = 0;

        for i in 0..self.n_splits {
            let extra = usize::from(i < remainder);
            let end = start + fold_size + extra;

            let mut validation: Vec<usize> = indices[start..end].to_vec();
            let mut train: Vec<usize> =
                indices[..start].iter().chain(indices[end..].iter()).copied().collect();
            validation.sort_unstable();
            train.sort_unstable();

            folds.push((train, validation));
            start = end;
        }

        Ok(folds)
    }
}

/// K-Fold that keeps each class's share roughly equal in every fold.
///
/// Positions are grouped by class (ascending), shuffled within each class,
/// then dealt round-robin so fold sizes differ by at most one.
#[derive(Clone, Debug)]
pub struct StratifiedKFold {
    n_splits: usize,
    shuffle: bool,
    seed: u64,
}

impl StratifiedKFold {
    pub fn new(n_splits: usize) -> Self {
        Self { n_splits, shuffle: true, seed: 42 }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn without_shuffle(mut self) -> Self {
        self.shuffle = false;
        self
    }

    pub fn split(&self, classes: &[usize]) -> Result<FoldPositions> {
        let n_samples = classes.len();
        check_splits(self.n_splits, n_samples)?;

        let mut members: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (position, class) in classes.iter().enumerate() {
            members.entry(*class).or_default().push(position);
        }
        let smallest = members.values().map(Vec::len).min().unwrap_or(0);
        if members.values().all(|g| g.len() < self.n_splits) {
            return Err(Error::config(format!(
                "fold_count={} cannot be greater than the number of members in each class",
                self.n_splits
            )));
        }
        if smallest < self.n_splits {
            tracing::warn!(
                smallest,
                fold_count = self.n_splits,
                "least populated class has fewer members than folds"
            );
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut fold_of = vec![0usize; n_samples];
        let mut dealt = 0;
        for mut group in members.into_values() {
            if self.shuffle {
                group.shuffle(&mut rng);
            }
            for position in group {
                fold_of[position] = dealt % self.n_splits;
                dealt += 1;
            }
        }

        Ok((0..self.n_splits)
            .map(|fold| {
                let (validation, train): (Vec<usize>, Vec<usize>) =
                    (0..n_samples).partition(|&p| fold_of[p] == fold);
                (train, validation)
            })
            .collect())
    }
}

fn check_splits(n_splits: usize, n_samples: usize) -> Result<()> {
    if n_splits < 2 {
        return Err(Error::config(format!("fold_count must be >= 2, got {n_splits}")));
    }
    if n_splits > n_samples {
        return Err(Error::config(format!(
            "fold_count={n_splits} exceeds the {n_samples} training samples"
        )));
    }
    Ok(())
}

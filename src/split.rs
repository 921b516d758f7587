//! Deterministic stratified k-fold partitioning
//!
//! The shuffle is seeded by the repetition index only. Every fold of a
//! repetition therefore sees the same permutation, and the F test sets of
//! that repetition are disjoint and cover the dataset.

use crate::dataset::Instances;
use crate::{Error, Result};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Row order for one repetition, ready to be cut into folds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldPartition {
    order: Vec<usize>,
    folds: usize,
}

impl FoldPartition {
    /// Shuffle `instances` with a generator seeded by `repetition`, then
    /// group by class when the target is nominal.
    ///
    /// # Errors
    ///
    /// Returns `Error::Evaluation` for zero folds.
    pub fn new(instances: &Instances, repetition: u32, folds: u32) -> Result<Self> {
        if folds == 0 {
            return Err(Error::Evaluation("fold count must be >= 1".to_string()));
        }
        let mut order = shuffled_order(instances.len(), u64::from(repetition));
        if instances.target().is_nominal() {
            stratify(&mut order, instances);
        }
        Ok(Self {
            order,
            folds: folds as usize,
        })
    }

    /// Fold count.
    #[must_use]
    pub const fn folds(&self) -> usize {
        self.folds
    }

    /// Shuffled (and stratified) row order.
    #[must_use]
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Test rows of `fold`: positions `p` with `p % F == fold`.
    #[must_use]
    pub fn test_indices(&self, fold: usize) -> Vec<usize> {
        self.order
            .iter()
            .enumerate()
            .filter(|(pos, _)| pos % self.folds == fold)
            .map(|(_, &row)| row)
            .collect()
    }

    /// Train rows of `fold`: every other position, in order.
    #[must_use]
    pub fn train_indices(&self, fold: usize) -> Vec<usize> {
        self.order
            .iter()
            .enumerate()
            .filter(|(pos, _)| pos % self.folds != fold)
            .map(|(_, &row)| row)
            .collect()
    }

    /// Materialize the `(train, test)` pair for `fold`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Evaluation` if `fold` is out of range or either side
    /// would be empty.
    pub fn split(&self, instances: &Instances, fold: usize) -> Result<(Instances, Instances)> {
        if fold >= self.folds {
            return Err(Error::Evaluation(format!(
                "fold {fold} out of range for {} folds",
                self.folds
            )));
        }
        let test = self.test_indices(fold);
        let train = self.train_indices(fold);
        if test.is_empty() {
            return Err(Error::Evaluation(format!(
                "fold {fold} has no test rows ({} rows, {} folds)",
                self.order.len(),
                self.folds
            )));
        }
        if train.is_empty() {
            return Err(Error::Evaluation(format!(
                "fold {fold} has no training rows ({} rows, {} folds)",
                self.order.len(),
                self.folds
            )));
        }
        Ok((instances.subset(&train), instances.subset(&test)))
    }
}

/// `0..len` permuted by a ChaCha8 generator seeded with `seed`.
#[must_use]
pub fn shuffled_order(len: usize, seed: u64) -> Vec<usize> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut order: Vec<usize> = (0..len).collect();
    order.shuffle(&mut rng);
    order
}

/// Stable grouping by class label, preserving shuffled order within a class.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn stratify(order: &mut [usize], instances: &Instances) {
    let rows = instances.rows();
    order.sort_by_key(|&i| rows[i].target as usize);
}

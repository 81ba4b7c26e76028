//! # reweight
//!
//! Weighted random selection with *mutable* weights.
//!
//! This crate implements a dynamic discrete sampler: a container mapping
//! indices `1..=len` to non-negative weights, where any weight may change at
//! any time and `sample` always draws an index with probability exactly
//! proportional to its current weight.
//!
//! Unlike an alias table there is no rebuild step: updates are O(1)
//! amortized. Unlike a sum tree there is no `O(log n)` factor: both update
//! and sample cost are independent of the number of distinct weights. And
//! unlike a floating-point prefix sum the distribution never drifts: weights
//! are bucketed by binary exponent and summed in fixed-precision integers,
//! with a rejection step that pays back every rounding error.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use reweight::DynamicSampler;
//!
//! let mut s = DynamicSampler::resizable(3);
//! s.set(1, 1.0)?;
//! s.set(2, 2.0)?;
//! s.set(3, 4.0)?;
//!
//! let mut rng = rand::rng();
//! let i = s.sample(&mut rng)?;   // 3 twice as often as 2, four times as often as 1
//! s.set(i, 0.0)?;                // and it adapts immediately
//! ```
//!
//! ## Storage flavors
//!
//! * [`DynamicSampler::fixed`]: `resize` always errors.
//! * [`DynamicSampler::semi_resizable`]: `resize` works within the
//!   capacity reserved at construction.
//! * [`DynamicSampler::resizable`]: `resize` is unrestricted.
//!
//! All three update weights identically; the flavor only gates the logical
//! length.
//!
//! ## Performance
//! * **Update**: O(1) amortized, independent of the number of weights.
//! * **Sample**: O(1) expected; consumes a handful of RNG words.
//! * **Space**: one contiguous `u64` arena (a fixed ~82 KiB of bucket
//!   metadata plus a few words per index).
//!
//! ## Gotchas
//! * Indices are **1-based**, matching the `1..=len` domain.
//! * Weights must be zero or *positive normal* doubles: NaN, infinities,
//!   negatives, and subnormals are rejected.
//! * Clearing weights never returns memory; shrink with
//!   [`resize`](DynamicSampler::resize) (or drop the sampler) to reclaim it.
//! * Not thread-safe; wrap it in a lock if you share it.

mod arena;
mod error;
mod repr;
mod sample;
mod table;
mod update;

pub use error::{Result, WeightError};

use rand::Rng;
use table::WeightTable;

/// How a sampler's logical length may change after construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Growth {
    Fixed,
    WithinReserve,
    Unbounded,
}

/// A discrete sampler over indices `1..=len` with mutable weights.
///
/// Build one with [`fixed`](Self::fixed), [`semi_resizable`](Self::semi_resizable),
/// or [`resizable`](Self::resizable), then [`set`](Self::set) weights and
/// [`sample`](Self::sample).
#[derive(Clone)]
pub struct DynamicSampler {
    table: WeightTable,
    growth: Growth,
}

impl DynamicSampler {
    /// Sampler of length `n` whose length can never change.
    pub fn fixed(n: usize) -> Self {
        Self { table: WeightTable::with_len(n), growth: Growth::Fixed }
    }

    /// Sampler of length `n` resizable within the capacity reserved now.
    pub fn semi_resizable(n: usize) -> Self {
        Self { table: WeightTable::with_len(n), growth: Growth::WithinReserve }
    }

    /// Sampler of length `n` with unrestricted resizing.
    pub fn resizable(n: usize) -> Self {
        Self { table: WeightTable::with_len(n), growth: Growth::Unbounded }
    }

    /// Resizable sampler initialized from a slice: index `i` gets
    /// `weights[i - 1]`.
    ///
    /// # Errors
    /// [`WeightError::InvalidWeight`] for any out-of-domain weight; nothing
    /// is built in that case.
    pub fn from_weights(weights: &[f64]) -> Result<Self> {
        for (j, &w) in weights.iter().enumerate() {
            repr::check_weight(j + 1, w)?;
        }
        let mut s = Self::resizable(weights.len());
        for (j, &w) in weights.iter().enumerate() {
            if w != 0.0 {
                s.table.set_weight(j + 1, w);
            }
        }
        Ok(s)
    }

    /// Current logical length (largest addressable index).
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether the logical length is zero.
    pub fn is_empty(&self) -> bool {
        self.table.len() == 0
    }

    /// Length the sampler can grow to without reallocating its index map.
    /// This is the bound a [`semi_resizable`](Self::semi_resizable) sampler
    /// can never exceed.
    pub fn capacity(&self) -> usize {
        self.table.em_capacity()
    }

    /// The weight of index `i`, bit-exactly as it was set; 0.0 if unset.
    ///
    /// # Errors
    /// [`WeightError::OutOfBounds`] when `i` is outside `1..=len`.
    pub fn get(&self, i: usize) -> Result<f64> {
        self.check_index(i)?;
        Ok(self.table.weight(i))
    }

    /// Set the weight of index `i`. Zero clears the index.
    ///
    /// # Errors
    /// [`WeightError::OutOfBounds`] when `i` is outside `1..=len`;
    /// [`WeightError::InvalidWeight`] for NaN, infinite, negative, or
    /// subnormal nonzero weights. The sampler is unchanged on error.
    pub fn set(&mut self, i: usize, w: f64) -> Result<()> {
        self.check_index(i)?;
        repr::check_weight(i, w)?;
        self.table.set_weight(i, w);
        Ok(())
    }

    /// Draw an index with probability `weight(i) / total`.
    ///
    /// The distribution is exact for the current weights, not an
    /// approximation. Expects between two and a handful of 64-bit words
    /// from `rng` per call.
    ///
    /// # Errors
    /// [`WeightError::Empty`] when every weight is zero.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<usize> {
        if self.table.total() == 0 {
            return Err(WeightError::Empty);
        }
        Ok(self.table.sample_index(rng))
    }

    /// Change the logical length to `n`.
    ///
    /// Shrinking clears every weight above `n`. Growing exposes fresh
    /// zero-weight indices.
    ///
    /// This is also the reclaim point: clearing weights never releases
    /// storage, but shrinking a [`resizable`](Self::resizable) sampler well
    /// below its reserved capacity rebuilds it into a smaller arena. A
    /// [`semi_resizable`](Self::semi_resizable) sampler keeps the arena it
    /// was built with, so growing back within its reserve never allocates.
    ///
    /// # Errors
    /// [`WeightError::NotResizable`] when the storage flavor forbids the new
    /// length: always for [`fixed`](Self::fixed) samplers, and past
    /// [`capacity`](Self::capacity) for
    /// [`semi_resizable`](Self::semi_resizable) ones.
    pub fn resize(&mut self, n: usize) -> Result<()> {
        match self.growth {
            Growth::Fixed => return Err(WeightError::NotResizable),
            Growth::WithinReserve if n > self.table.em_capacity() => {
                return Err(WeightError::NotResizable)
            }
            _ => {}
        }
        self.table.resize_len(n);
        if self.growth == Growth::Unbounded {
            self.table.reclaim_slack();
        }
        Ok(())
    }

    /// Set a weight, growing the sampler first when `i` is past the end.
    ///
    /// # Errors
    /// As [`resize`](Self::resize) when growth is needed but the flavor
    /// forbids it, otherwise as [`set`](Self::set).
    pub fn insert(&mut self, i: usize, w: f64) -> Result<()> {
        if i > self.len() {
            repr::check_weight(i, w)?;
            self.resize(i)?;
        }
        self.set(i, w)
    }

    /// Clear index `i` and return the weight it carried.
    ///
    /// # Errors
    /// [`WeightError::OutOfBounds`] when `i` is outside `1..=len`;
    /// [`WeightError::InvalidWeight`] (with value 0) when `i` carries no
    /// weight.
    pub fn remove(&mut self, i: usize) -> Result<f64> {
        self.check_index(i)?;
        let w = self.table.weight(i);
        if w == 0.0 {
            return Err(WeightError::InvalidWeight { index: i, value: 0.0 });
        }
        self.table.clear_weight(i);
        Ok(w)
    }

    /// Set many `(index, weight)` pairs, growing once to the largest index
    /// if needed.
    ///
    /// The whole batch is validated before anything is applied, so an error
    /// leaves the sampler untouched.
    ///
    /// # Errors
    /// As [`set`](Self::set) and [`resize`](Self::resize).
    pub fn insert_many<I>(&mut self, pairs: I) -> Result<()>
    where
        I: IntoIterator<Item = (usize, f64)>,
    {
        let pairs: Vec<(usize, f64)> = pairs.into_iter().collect();
        let mut max_index = 0usize;
        for &(i, w) in &pairs {
            if i == 0 {
                return Err(WeightError::OutOfBounds { index: i, len: self.len() });
            }
            repr::check_weight(i, w)?;
            max_index = max_index.max(i);
        }
        if max_index > self.len() {
            let allowed = match self.growth {
                Growth::Unbounded => true,
                Growth::WithinReserve => max_index <= self.table.em_capacity(),
                Growth::Fixed => false,
            };
            if !allowed {
                return Err(WeightError::NotResizable);
            }
            self.table.resize_len(max_index);
        }
        for (i, w) in pairs {
            self.table.set_weight(i, w);
        }
        Ok(())
    }

    /// Sum of all weights, as a double. O(len).
    pub fn total_weight(&self) -> f64 {
        self.iter().map(|(_, w)| w).sum()
    }

    /// Live `(index, weight)` pairs in index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        (1..=self.table.len()).filter_map(move |i| {
            let w = self.table.weight(i);
            (w != 0.0).then_some((i, w))
        })
    }

    /// Recompute every internal quantity from scratch and panic on any
    /// mismatch. Intended for tests and debugging.
    pub fn verify(&self) {
        self.table.verify();
    }

    fn check_index(&self, i: usize) -> Result<()> {
        let len = self.len();
        if i == 0 || i > len {
            Err(WeightError::OutOfBounds { index: i, len })
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for DynamicSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicSampler")
            .field("len", &self.len())
            .field("live", &self.table.live())
            .field("growth", &self.growth)
            .finish()
    }
}

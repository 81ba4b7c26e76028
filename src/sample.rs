//! Three-stage exact sampling.
//!
//! Stage 1 walks the 2046 level weights from the first nonempty bucket,
//! subtracting until the draw lands in one. Because every stored level
//! weight carries a `+1` upper-bound slack, a draw that lands exactly on the
//! boundary enters Stage 2: successive 64-bit windows of the level's true
//! fractional weight are compared against fresh draws, accepting with
//! probability equal to the fractional shortfall and otherwise restarting.
//! Stage 3 picks uniformly among the bucket's slots and accepts each slot
//! with probability `shifted_significand / 2^64`, which is proportional to
//! the weight within the bucket and at least one half.

use rand::Rng;

use crate::repr::{exp_of_bucket, shifted_low64, NUM_LEVELS};
use crate::table::WeightTable;

impl WeightTable {
    /// Draw an index with probability proportional to its weight.
    /// Requires a nonzero total.
    pub(crate) fn sample_index<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        debug_assert!(self.total() > 0);
        loop {
            // Stage 1: level selection.
            let mut x = rng.random_range(1..=self.total());
            let mut k = self.first_level() as usize;
            loop {
                debug_assert!(k < NUM_LEVELS);
                let lw = self.level_weight(k);
                if x <= lw {
                    break;
                }
                x -= lw;
                k += 1;
            }

            // Stage 2: the draw fell in the rounding slack; accept the
            // bucket only with probability equal to its true fraction.
            if x == self.level_weight(k) {
                let sh = exp_of_bucket(k) as i64 + self.shift();
                if !accept_fraction(self.sig_sum(k), sh, rng) {
                    continue;
                }
            }

            // Stage 3: rejection within the bucket.
            let len = self.group_len(k);
            let gp = self.group_pos(k);
            let bits = crate::repr::ceil_log2(len as u64);
            loop {
                let r = rng.random::<u64>();
                let slot = if bits == 0 { 0 } else { (r >> (64 - bits)) as usize };
                if slot >= len {
                    continue;
                }
                if rng.random::<u64>() < self.words[gp + 2 * slot] {
                    return self.words[gp + 2 * slot + 1] as usize;
                }
            }
        }
    }
}

/// Accept with probability equal to the fractional part of `ss * 2^sh`.
///
/// Window `t` holds fraction bits `64(t-1)+1 ..= 64t`. Draws are compared
/// lexicographically: below the window accepts, above rejects, equal moves
/// to the next window. Once the window shift is nonnegative every later
/// window is zero and the comparison terminates.
fn accept_fraction<R: Rng + ?Sized>(ss: u128, sh: i64, rng: &mut R) -> bool {
    let mut t = 1i64;
    loop {
        let window = shifted_low64(ss, sh + 64 * t);
        let x = rng.random::<u64>();
        if x != window {
            return x < window;
        }
        if sh + 64 * t >= 0 {
            return true;
        }
        t += 1;
    }
}

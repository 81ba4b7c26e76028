//! Weight updates and global-shift maintenance.
//!
//! Level sums are exact 128-bit integers; the 64-bit level weights the
//! sampler scans are those sums scaled by `2^(exponent + s)` for a single
//! global shift `s`. Updates keep two promises:
//!
//!   * no per-level weight ever needs more than 64 bits, and
//!   * the total stays in `[2^32, 2^64)` whenever any weight is set.
//!
//! When an update would break either promise, `s` is re-chosen and every
//! level weight and the total are recomputed in one sweep over the 2046
//! buckets. The sweep is constant-bounded in the number of indices, so the
//! amortized update cost stays O(1).

use crate::repr::{
    biased_exponent, bit_len, bucket_of_exp, exp_of_bucket, shifted_low64, shifted_significand,
    LEVEL_NONE, NUM_LEVELS,
};
use crate::table::{WeightTable, MIN_TOTAL};

/// Bit position the largest level weight is steered to when the shift is
/// re-chosen: low enough that 2046 such levels cannot overflow the total,
/// high enough that the total stays far above `MIN_TOTAL`.
const RESCALE_TARGET_BIT: i64 = 48;

/// First insert into an empty table lands the level weight near `2^40`.
const FIRST_INSERT_BIT: i64 = 40;

impl WeightTable {
    /// Set index `i` to weight `w`. Arguments must already be validated:
    /// `i` in bounds and `w` zero or a positive normal double.
    pub(crate) fn set_weight(&mut self, i: usize, w: f64) {
        if self.edit_pos(i) != 0 {
            self.clear_weight(i);
        }
        if w != 0.0 {
            self.insert_weight(i, w);
        }
    }

    /// Insert a positive normal weight for an index that carries none.
    fn insert_weight(&mut self, i: usize, w: f64) {
        debug_assert!(self.edit_pos(i) == 0);
        let e = biased_exponent(w);
        let k = bucket_of_exp(e);
        let sig = shifted_significand(w);

        if self.total() == 0 {
            self.set_shift(FIRST_INSERT_BIT - 64 - e as i64);
        }

        let ss = self.sig_sum(k) + sig as u128;
        self.set_sig_sum(k, ss);

        let sh = e as i64 + self.shift();
        if bit_len(ss) + sh > 64 {
            // The level weight no longer fits in a word.
            self.rescale();
        } else {
            match shifted_low64(ss, sh).checked_add(1) {
                None => self.rescale(),
                Some(lw) => {
                    let lw_old = self.level_weight(k);
                    match (self.total() - lw_old).checked_add(lw) {
                        None => self.apply_shift(self.shift() - 16),
                        Some(t) => {
                            self.set_level_weight(k, lw);
                            self.set_total(t);
                        }
                    }
                }
            }
        }

        let pos = self.push_group_element(k, sig, i);
        self.set_edit_entry(i, pos, e);
        if (k as u64) < self.first_level() {
            self.set_first_level(k as u64);
        }
    }

    /// Remove index `i`'s weight. No-op when none is set.
    pub(crate) fn clear_weight(&mut self, i: usize) {
        let pos = self.edit_pos(i);
        if pos == 0 {
            return;
        }
        let e = self.edit_exp(i);
        let k = bucket_of_exp(e);
        let sig = self.words[pos];

        let ss = self.sig_sum(k) - sig as u128;
        self.set_sig_sum(k, ss);
        let lw_old = self.level_weight(k);
        let lw = if ss == 0 {
            0
        } else {
            // Shrinking the sum cannot overflow the word the old weight fit in.
            shifted_low64(ss, e as i64 + self.shift()) + 1
        };
        self.set_level_weight(k, lw);
        self.set_total(self.total() - lw_old + lw);

        self.remove_group_element(k, pos, e);
        self.clear_edit_entry(i);

        if lw == 0 && self.first_level() == k as u64 {
            self.advance_first_level(k);
        }
        let t = self.total();
        if t > 0 && t < MIN_TOTAL {
            self.rescale();
        }
    }

    /// Change the logical length. Policy checks belong to the caller;
    /// this performs the mechanics only.
    pub(crate) fn resize_len(&mut self, n: usize) {
        assert!(
            (n as u64) <= crate::repr::MAX_INDEX,
            "sampler length {n} exceeds the supported maximum"
        );
        let old = self.len();
        for i in (n + 1)..=old {
            self.clear_weight(i);
        }
        if n > self.em_capacity() {
            let em_cap = n.max(2 * self.em_capacity());
            let reserve = self.compacted_tail_words().max(32);
            self.reallocate(em_cap, reserve);
        }
        self.set_len(n);
    }

    /// Hand storage back after a shrink: once the length falls to a quarter
    /// of the reserved edit-map capacity, rebuild into an arena sized for
    /// the current contents. The quarter threshold keeps alternating
    /// grow/shrink sequences from reallocating on every call. Deletions
    /// never release storage; this is the only reclaim point short of
    /// dropping the sampler.
    pub(crate) fn reclaim_slack(&mut self) {
        let n = self.len();
        let em_cap = self.em_capacity();
        if em_cap >= 8 && n <= em_cap / 4 {
            self.reallocate(2 * n, (2 * n).min(4096));
        }
    }

    /// Pick the shift that lands the largest level weight at
    /// `RESCALE_TARGET_BIT` bits and recompute everything under it.
    fn rescale(&mut self) {
        let mut top = i64::MIN;
        for k in 0..NUM_LEVELS {
            let ss = self.sig_sum(k);
            if ss != 0 {
                top = top.max(bit_len(ss) + exp_of_bucket(k) as i64);
            }
        }
        if top == i64::MIN {
            self.apply_shift(0);
        } else {
            self.apply_shift(RESCALE_TARGET_BIT - top);
        }
    }

    /// Install `s` and recompute every level weight, the total, and the
    /// first nonempty level in one sweep.
    fn apply_shift(&mut self, s: i64) {
        self.set_shift(s);
        let mut total = 0u64;
        let mut first = LEVEL_NONE;
        for k in 0..NUM_LEVELS {
            let ss = self.sig_sum(k);
            let lw = if ss == 0 {
                0
            } else {
                shifted_low64(ss, exp_of_bucket(k) as i64 + s) + 1
            };
            self.set_level_weight(k, lw);
            if lw != 0 && first == LEVEL_NONE {
                first = k as u64;
            }
            total += lw;
        }
        self.set_total(total);
        self.set_first_level(first);
    }

    fn advance_first_level(&mut self, from: usize) {
        for k in from..NUM_LEVELS {
            if self.level_weight(k) != 0 {
                self.set_first_level(k as u64);
                return;
            }
        }
        self.set_first_level(LEVEL_NONE);
    }
}

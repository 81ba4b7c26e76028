//! The weight table: every piece of sampler state in one `Vec<u64>`.
//!
//! # Layout
//!
//! ```text
//! word 0          logical length N
//! word 1          first nonempty level (2046 when empty)
//! word 2          global shift s (i64 bits)
//! word 3          total T of all approximate level weights
//! word 4          free pointer into the tail
//! word 5          edit-map capacity
//! 6      .. 2052  approximate level weights, one word per bucket
//! 2052   .. 6144  exact significand sums, two words (lo, hi) per bucket
//! 6144   .. 8190  group positions (word offset of each bucket's group)
//! 8190   .. 10236 group lengths (live pair count per bucket)
//! 10236  .. 10492 allocation table, one byte per bucket: log2(capacity)+1
//! 10492  .. +cap  edit map, one word per logical index: {pos:52, exp:11}
//! tail            (shifted_significand, target) pair groups
//! ```
//!
//! Buckets are ordered by descending biased exponent: bucket `k` holds the
//! weights with exponent `0x7fe - k`. The per-bucket weight visible to the
//! level scan is `low64(sig_sum * 2^(exponent + s)) + 1`, an integer upper
//! bound on the true scaled bucket weight; the `+1` slack is paid back by the
//! sampler's rejection stage, which keeps the distribution exact.
//!
//! An edit-map word of 0 means the index carries no weight; otherwise its
//! low 52 bits are the arena offset of the index's pair and the next 11 bits
//! are the stored exponent. Group regions in the tail are self-describing:
//! the second slot of a region holds either a live logical index, an
//! empty-but-live tombstone carrying the bucket's exponent, or an abandoned
//! tombstone whose negation is the region length in pairs.

use crate::repr::{
    bucket_of_exp, ceil_log2, exp_of_bucket, shifted_low64, weight_from_parts, LEVEL_NONE,
    NUM_LEVELS,
};

// Header word indices.
pub(crate) const H_LEN: usize = 0;
pub(crate) const H_FIRST: usize = 1;
pub(crate) const H_SHIFT: usize = 2;
pub(crate) const H_TOTAL: usize = 3;
pub(crate) const H_FREE: usize = 4;
pub(crate) const H_EMCAP: usize = 5;

// Region offsets.
pub(crate) const LEVEL_WEIGHTS: usize = 6;
pub(crate) const SIG_SUMS: usize = LEVEL_WEIGHTS + NUM_LEVELS;
pub(crate) const GROUP_POS: usize = SIG_SUMS + 2 * NUM_LEVELS;
pub(crate) const GROUP_LEN: usize = GROUP_POS + NUM_LEVELS;
pub(crate) const ALLOC_TABLE: usize = GROUP_LEN + NUM_LEVELS;
pub(crate) const ALLOC_WORDS: usize = (NUM_LEVELS + 7) / 8;
pub(crate) const EDIT_MAP: usize = ALLOC_TABLE + ALLOC_WORDS;

const POS_BITS: u32 = 52;
const POS_MASK: u64 = (1 << POS_BITS) - 1;

/// Lower bound on a nonzero total, per the normalization invariant.
pub(crate) const MIN_TOTAL: u64 = 1 << 32;

/// Mutable weight table with exact proportional sampling.
#[derive(Clone)]
pub(crate) struct WeightTable {
    pub(crate) words: Vec<u64>,
}

impl WeightTable {
    /// Create a table of logical length `n` with every weight zero.
    pub(crate) fn with_len(n: usize) -> Self {
        assert!(
            (n as u64) <= crate::repr::MAX_INDEX,
            "sampler length {n} exceeds the supported maximum"
        );
        // Reserve a modest tail up front; group storage grows on demand.
        let tail = (2 * n).min(4096);
        let mut words = vec![0u64; EDIT_MAP + n + tail];
        words[H_LEN] = n as u64;
        words[H_FIRST] = LEVEL_NONE;
        words[H_EMCAP] = n as u64;
        words[H_FREE] = (EDIT_MAP + n) as u64;
        Self { words }
    }

    // ---- header ----

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.words[H_LEN] as usize
    }

    #[inline]
    pub(crate) fn set_len(&mut self, n: usize) {
        self.words[H_LEN] = n as u64;
    }

    #[inline]
    pub(crate) fn first_level(&self) -> u64 {
        self.words[H_FIRST]
    }

    #[inline]
    pub(crate) fn set_first_level(&mut self, k: u64) {
        self.words[H_FIRST] = k;
    }

    #[inline]
    pub(crate) fn shift(&self) -> i64 {
        self.words[H_SHIFT] as i64
    }

    #[inline]
    pub(crate) fn set_shift(&mut self, s: i64) {
        self.words[H_SHIFT] = s as u64;
    }

    #[inline]
    pub(crate) fn total(&self) -> u64 {
        self.words[H_TOTAL]
    }

    #[inline]
    pub(crate) fn set_total(&mut self, t: u64) {
        self.words[H_TOTAL] = t;
    }

    #[inline]
    pub(crate) fn free_ptr(&self) -> usize {
        self.words[H_FREE] as usize
    }

    #[inline]
    pub(crate) fn set_free_ptr(&mut self, p: usize) {
        self.words[H_FREE] = p as u64;
    }

    #[inline]
    pub(crate) fn em_capacity(&self) -> usize {
        self.words[H_EMCAP] as usize
    }

    #[inline]
    pub(crate) fn tail_start(&self) -> usize {
        EDIT_MAP + self.em_capacity()
    }

    // ---- levels ----

    #[inline]
    pub(crate) fn level_weight(&self, k: usize) -> u64 {
        self.words[LEVEL_WEIGHTS + k]
    }

    #[inline]
    pub(crate) fn set_level_weight(&mut self, k: usize, w: u64) {
        self.words[LEVEL_WEIGHTS + k] = w;
    }

    #[inline]
    pub(crate) fn sig_sum(&self, k: usize) -> u128 {
        let lo = self.words[SIG_SUMS + 2 * k] as u128;
        let hi = self.words[SIG_SUMS + 2 * k + 1] as u128;
        lo | (hi << 64)
    }

    #[inline]
    pub(crate) fn set_sig_sum(&mut self, k: usize, s: u128) {
        self.words[SIG_SUMS + 2 * k] = s as u64;
        self.words[SIG_SUMS + 2 * k + 1] = (s >> 64) as u64;
    }

    // ---- groups ----

    #[inline]
    pub(crate) fn group_pos(&self, k: usize) -> usize {
        self.words[GROUP_POS + k] as usize
    }

    #[inline]
    pub(crate) fn set_group_pos(&mut self, k: usize, p: usize) {
        self.words[GROUP_POS + k] = p as u64;
    }

    #[inline]
    pub(crate) fn group_len(&self, k: usize) -> usize {
        self.words[GROUP_LEN + k] as usize
    }

    #[inline]
    pub(crate) fn set_group_len(&mut self, k: usize, n: usize) {
        self.words[GROUP_LEN + k] = n as u64;
    }

    #[inline]
    pub(crate) fn alloc_log2(&self, k: usize) -> u8 {
        (self.words[ALLOC_TABLE + k / 8] >> (8 * (k % 8))) as u8
    }

    #[inline]
    pub(crate) fn set_alloc_log2(&mut self, k: usize, v: u8) {
        let word = &mut self.words[ALLOC_TABLE + k / 8];
        let sh = 8 * (k % 8);
        *word = (*word & !(0xff << sh)) | ((v as u64) << sh);
    }

    /// Allocated pair capacity of bucket `k`'s group.
    #[inline]
    pub(crate) fn group_capacity(&self, k: usize) -> usize {
        let b = self.alloc_log2(k);
        if b == 0 { 0 } else { 1 << (b - 1) }
    }

    // ---- edit map ----

    #[inline]
    fn edit_word(&self, i: usize) -> u64 {
        debug_assert!(i >= 1 && i <= self.em_capacity());
        self.words[EDIT_MAP + i - 1]
    }

    /// Arena offset of index `i`'s pair, or 0 when `i` carries no weight.
    #[inline]
    pub(crate) fn edit_pos(&self, i: usize) -> usize {
        (self.edit_word(i) & POS_MASK) as usize
    }

    /// Stored biased exponent of index `i`'s weight.
    #[inline]
    pub(crate) fn edit_exp(&self, i: usize) -> u64 {
        (self.edit_word(i) >> POS_BITS) & 0x7ff
    }

    #[inline]
    pub(crate) fn set_edit_entry(&mut self, i: usize, pos: usize, e: u64) {
        debug_assert!(pos as u64 <= POS_MASK);
        self.words[EDIT_MAP + i - 1] = pos as u64 | (e << POS_BITS);
    }

    /// Rewrite only the position half of an entry, preserving the exponent.
    #[inline]
    pub(crate) fn set_edit_pos(&mut self, i: usize, pos: usize) {
        let w = &mut self.words[EDIT_MAP + i - 1];
        *w = (*w & !POS_MASK) | pos as u64;
    }

    #[inline]
    pub(crate) fn clear_edit_entry(&mut self, i: usize) {
        self.words[EDIT_MAP + i - 1] = 0;
    }

    /// Weight of index `i`, reconstructed bit-exactly; 0.0 when absent.
    pub(crate) fn weight(&self, i: usize) -> f64 {
        let pos = self.edit_pos(i);
        if pos == 0 {
            0.0
        } else {
            weight_from_parts(self.edit_exp(i), self.words[pos])
        }
    }

    /// Number of indices carrying a nonzero weight.
    pub(crate) fn live(&self) -> usize {
        (0..NUM_LEVELS).map(|k| self.group_len(k)).sum()
    }

    /// Recompute every derived quantity from first principles and compare
    /// with the stored state, panicking on any mismatch. Test support.
    pub(crate) fn verify(&self) {
        let n = self.len();
        assert!(self.em_capacity() >= n, "edit map smaller than length");
        let ts = self.tail_start();
        let fp = self.free_ptr();
        assert!(fp >= ts && fp <= self.words.len(), "free pointer out of range");

        // Groups: bounds, lengths, tombstones, no overlap.
        let mut regions: Vec<(usize, usize)> = Vec::new();
        for k in 0..NUM_LEVELS {
            let cap = self.group_capacity(k);
            let len = self.group_len(k);
            assert!(len <= cap, "bucket {k}: length {len} exceeds capacity {cap}");
            if cap == 0 {
                continue;
            }
            let gp = self.group_pos(k);
            assert!(gp >= ts && gp + 2 * cap <= fp, "bucket {k}: group outside tail");
            regions.push((gp, 2 * cap));
            if len == 0 {
                let tag = self.words[gp + 1];
                assert_eq!(
                    tag,
                    (1 << 63) | exp_of_bucket(k),
                    "bucket {k}: empty group missing its tombstone"
                );
            }
        }
        regions.sort_unstable();
        for pair in regions.windows(2) {
            assert!(
                pair[0].0 + pair[0].1 <= pair[1].0,
                "group regions overlap at {}",
                pair[1].0
            );
        }

        // Edit map consistent with the arena.
        let mut live = 0usize;
        for i in 1..=n {
            let pos = self.edit_pos(i);
            if pos == 0 {
                continue;
            }
            live += 1;
            let e = self.edit_exp(i);
            let k = bucket_of_exp(e);
            let gp = self.group_pos(k);
            let glen = self.group_len(k);
            assert!(
                pos >= gp && pos < gp + 2 * glen && (pos - gp) % 2 == 0,
                "index {i}: position {pos} not inside bucket {k}'s group"
            );
            assert_eq!(self.words[pos + 1], i as u64, "index {i}: back-pointer mismatch");
            assert!(self.words[pos] >> 63 == 1, "index {i}: malformed significand");
            let w = weight_from_parts(e, self.words[pos]);
            assert!(w.is_normal() && w > 0.0, "index {i}: stored weight out of domain");
        }
        assert_eq!(live, self.live(), "group lengths disagree with the edit map");

        // Per-level sums and weights, total, first level.
        let s = self.shift();
        let mut total = 0u64;
        let mut first = LEVEL_NONE;
        for k in 0..NUM_LEVELS {
            let mut sum = 0u128;
            let gp = self.group_pos(k);
            for j in 0..self.group_len(k) {
                sum += self.words[gp + 2 * j] as u128;
            }
            assert_eq!(sum, self.sig_sum(k), "bucket {k}: significand sum drifted");
            let expect = if sum == 0 {
                0
            } else {
                shifted_low64(sum, exp_of_bucket(k) as i64 + s) + 1
            };
            assert_eq!(expect, self.level_weight(k), "bucket {k}: stale level weight");
            if expect != 0 && first == LEVEL_NONE {
                first = k as u64;
            }
            total = total.checked_add(expect).expect("level weights overflow the total");
        }
        assert_eq!(total, self.total(), "stored total out of date");
        assert_eq!(first, self.first_level(), "stale first-level index");
        assert!(total == 0 || total >= MIN_TOTAL, "total {total} below normalized range");
    }

    /// Tail words the live groups would occupy immediately after compaction.
    pub(crate) fn compacted_tail_words(&self) -> usize {
        let mut words = 0usize;
        for k in 0..NUM_LEVELS {
            let len = self.group_len(k);
            if len > 0 {
                words += 2usize << ceil_log2(len as u64);
            }
        }
        words
    }
}

impl std::fmt::Debug for WeightTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeightTable")
            .field("len", &self.len())
            .field("live", &self.live())
            .field("total", &self.total())
            .field("shift", &self.shift())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_table_is_empty_and_consistent() {
        let t = WeightTable::with_len(10);
        assert_eq!(t.len(), 10);
        assert_eq!(t.total(), 0);
        assert_eq!(t.first_level(), LEVEL_NONE);
        assert_eq!(t.free_ptr(), t.tail_start());
        assert_eq!(t.live(), 0);
        for i in 1..=10 {
            assert_eq!(t.weight(i), 0.0);
        }
        t.verify();
    }

    #[test]
    fn zero_length_table() {
        let t = WeightTable::with_len(0);
        assert_eq!(t.len(), 0);
        t.verify();
    }

    #[test]
    fn edit_entry_packing() {
        let mut t = WeightTable::with_len(4);
        t.set_edit_entry(3, 0xdead0, 0x7fe);
        assert_eq!(t.edit_pos(3), 0xdead0);
        assert_eq!(t.edit_exp(3), 0x7fe);
        t.set_edit_pos(3, 0xbeef2);
        assert_eq!(t.edit_pos(3), 0xbeef2);
        assert_eq!(t.edit_exp(3), 0x7fe);
        t.clear_edit_entry(3);
        assert_eq!(t.edit_pos(3), 0);
    }

    #[test]
    fn alloc_table_packs_bytes_independently() {
        let mut t = WeightTable::with_len(1);
        t.set_alloc_log2(0, 5);
        t.set_alloc_log2(1, 9);
        t.set_alloc_log2(7, 1);
        t.set_alloc_log2(8, 3);
        assert_eq!(t.alloc_log2(0), 5);
        assert_eq!(t.alloc_log2(1), 9);
        assert_eq!(t.alloc_log2(7), 1);
        assert_eq!(t.alloc_log2(8), 3);
        assert_eq!(t.group_capacity(0), 16);
        assert_eq!(t.group_capacity(8), 4);
        assert_eq!(t.group_capacity(100), 0);
        t.set_alloc_log2(0, 0);
        assert_eq!(t.group_capacity(0), 0);
        assert_eq!(t.alloc_log2(1), 9);
    }

    #[test]
    fn header_field_roundtrips() {
        let mut t = WeightTable::with_len(2);
        t.set_shift(-1047);
        assert_eq!(t.shift(), -1047);
        t.set_first_level(17);
        assert_eq!(t.first_level(), 17);
        t.set_sig_sum(100, (1u128 << 90) | 7);
        assert_eq!(t.sig_sum(100), (1u128 << 90) | 7);
    }
}

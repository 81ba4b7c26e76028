//! Group storage in the arena tail.
//!
//! Each bucket owns one contiguous region of `(shifted_significand, target)`
//! pairs. Regions are bump-allocated at the free pointer and doubled on
//! overflow: in place when the region already abuts the free pointer,
//! otherwise by relocating to the tail and leaving an abandoned tombstone
//! behind. When the tail runs out the arena is either compacted in place or
//! rebuilt into larger storage.
//!
//! The tail is self-describing. At every region start, the second slot
//! discriminates:
//!   * a live logical index (`< 2^63`): first element of a live group,
//!   * `0x8000_0000_0000_0000 | exponent`: an empty-but-live group whose
//!     capacity is still recorded in the allocation table,
//!   * `-len` (two's complement, `>= 0xC000...`): an abandoned region of
//!     `len` pairs.

use crate::repr::{bucket_of_exp, ceil_log2, NUM_LEVELS};
use crate::table::{WeightTable, EDIT_MAP};

const EMPTY_GROUP: u64 = 1 << 63;
const ABANDONED_MIN: u64 = 0xC000_0000_0000_0000;

#[inline]
fn is_abandoned(tag: u64) -> bool {
    tag >= ABANDONED_MIN
}

#[inline]
fn is_empty_group(tag: u64) -> bool {
    tag & EMPTY_GROUP != 0 && !is_abandoned(tag)
}

#[inline]
fn abandoned_tag(pairs: usize) -> u64 {
    debug_assert!(pairs > 0);
    (pairs as u64).wrapping_neg()
}

#[inline]
fn abandoned_pairs(tag: u64) -> usize {
    tag.wrapping_neg() as usize
}

impl WeightTable {
    /// Append `(sig, target)` to bucket `k`'s group and return the word
    /// offset the pair was written at.
    pub(crate) fn push_group_element(&mut self, k: usize, sig: u64, target: usize) -> usize {
        let len = self.group_len(k);
        if len == self.group_capacity(k) {
            self.grow_group(k);
        }
        let p = self.group_pos(k) + 2 * len;
        self.words[p] = sig;
        self.words[p + 1] = target as u64;
        self.set_group_len(k, len + 1);
        p
    }

    /// Remove the pair at offset `p` from bucket `k` by swapping the last
    /// pair into its place. `e` is the bucket's exponent, written into the
    /// tombstone when the group empties.
    pub(crate) fn remove_group_element(&mut self, k: usize, p: usize, e: u64) {
        let len = self.group_len(k);
        let gp = self.group_pos(k);
        debug_assert!(len > 0 && p >= gp && p < gp + 2 * len);
        let last = gp + 2 * (len - 1);
        if p != last {
            let sig = self.words[last];
            let target = self.words[last + 1];
            self.words[p] = sig;
            self.words[p + 1] = target;
            self.set_edit_pos(target as usize, p);
        }
        self.set_group_len(k, len - 1);
        if len == 1 {
            // Capacity stays allocated; the tombstone lets the compactor
            // recover the bucket without consulting any element.
            self.words[gp + 1] = EMPTY_GROUP | e;
        }
    }

    /// Double bucket `k`'s capacity (or allocate its first pair).
    fn grow_group(&mut self, k: usize) {
        let cap = self.group_capacity(k);
        if cap == 0 {
            self.ensure_tail(2);
            let fp = self.free_ptr();
            self.set_group_pos(k, fp);
            self.set_free_ptr(fp + 2);
            self.set_alloc_log2(k, 1);
            return;
        }

        // Fast path: the group is the last region, extend it in place.
        if self.group_pos(k) + 2 * cap == self.free_ptr()
            && self.free_ptr() + 2 * cap <= self.words.len()
        {
            self.set_free_ptr(self.free_ptr() + 2 * cap);
            self.set_alloc_log2(k, self.alloc_log2(k) + 1);
            return;
        }

        // Room for a doubled region at the tail. Compaction or reallocation
        // may move the group, so re-read its location afterwards.
        self.ensure_tail(4 * cap);
        let gp = self.group_pos(k);
        if gp + 2 * cap == self.free_ptr() {
            self.set_free_ptr(self.free_ptr() + 2 * cap);
            self.set_alloc_log2(k, self.alloc_log2(k) + 1);
            return;
        }

        let len = self.group_len(k);
        let fp = self.free_ptr();
        self.words.copy_within(gp..gp + 2 * len, fp);
        self.words[gp + 1] = abandoned_tag(cap);
        for j in 0..len {
            let target = self.words[fp + 2 * j + 1] as usize;
            self.set_edit_pos(target, fp + 2 * j);
        }
        self.set_group_pos(k, fp);
        self.set_free_ptr(fp + 4 * cap);
        self.set_alloc_log2(k, self.alloc_log2(k) + 1);
    }

    /// Make room for `need` more tail words, compacting in place when the
    /// reclaimable space suffices and reallocating otherwise.
    fn ensure_tail(&mut self, need: usize) {
        if self.free_ptr() + need <= self.words.len() {
            return;
        }
        let live = self.compacted_tail_words();
        if self.tail_start() + live + need <= self.words.len() {
            self.compact_in_place();
        } else {
            self.reallocate(self.em_capacity(), need.max(live).max(32));
        }
    }

    /// Walk the tail front to back, dropping abandoned regions, collapsing
    /// empty groups, and packing live groups tightly. Rewrites group
    /// descriptors, allocation sizes, and the edit-map offsets of every
    /// surviving element.
    pub(crate) fn compact_in_place(&mut self) {
        let ts = self.tail_start();
        let fp = self.free_ptr();
        let mut read = ts;
        let mut write = ts;
        while read < fp {
            let tag = self.words[read + 1];
            if is_abandoned(tag) {
                read += 2 * abandoned_pairs(tag);
            } else if is_empty_group(tag) {
                let k = bucket_of_exp(tag & 0x7ff);
                read += 2 * self.group_capacity(k);
                self.set_alloc_log2(k, 0);
                self.set_group_pos(k, 0);
            } else {
                // Live group: the first element's edit entry names its bucket.
                let k = bucket_of_exp(self.edit_exp(tag as usize));
                let len = self.group_len(k);
                let old_cap = self.group_capacity(k);
                debug_assert!(write <= read);
                self.words.copy_within(read..read + 2 * len, write);
                let cl = ceil_log2(len as u64);
                self.set_group_pos(k, write);
                self.set_alloc_log2(k, cl as u8 + 1);
                for j in 0..len {
                    let target = self.words[write + 2 * j + 1] as usize;
                    self.set_edit_pos(target, write + 2 * j);
                }
                write += 2usize << cl;
                read += 2 * old_cap;
            }
        }
        self.set_free_ptr(write);
    }

    /// Rebuild into fresh storage with `em_cap` edit-map words and at least
    /// `tail_reserve` free tail words, packing every live group from its
    /// descriptor. Used when the tail outgrows the arena and for
    /// `resize`-grow past the reserved edit-map capacity.
    pub(crate) fn reallocate(&mut self, em_cap: usize, tail_reserve: usize) {
        debug_assert!(em_cap >= self.len());
        let live = self.compacted_tail_words();
        let ts_new = EDIT_MAP + em_cap;
        let mut new = vec![0u64; ts_new + live + tail_reserve];

        new[..EDIT_MAP].copy_from_slice(&self.words[..EDIT_MAP]);
        let n = self.len();
        new[EDIT_MAP..EDIT_MAP + n].copy_from_slice(&self.words[EDIT_MAP..EDIT_MAP + n]);

        let mut free = ts_new;
        for k in 0..NUM_LEVELS {
            let len = self.group_len(k);
            if len == 0 {
                new[crate::table::GROUP_POS + k] = 0;
                set_alloc_byte(&mut new, k, 0);
                continue;
            }
            let gp = self.group_pos(k);
            new[free..free + 2 * len].copy_from_slice(&self.words[gp..gp + 2 * len]);
            let cl = ceil_log2(len as u64);
            new[crate::table::GROUP_POS + k] = free as u64;
            set_alloc_byte(&mut new, k, cl as u8 + 1);
            for j in 0..len {
                let target = new[free + 2 * j + 1] as usize;
                let entry = &mut new[EDIT_MAP + target - 1];
                *entry = (*entry & !((1u64 << 52) - 1)) | (free + 2 * j) as u64;
            }
            free += 2usize << cl;
        }

        new[crate::table::H_EMCAP] = em_cap as u64;
        new[crate::table::H_FREE] = free as u64;
        self.words = new;
    }
}

fn set_alloc_byte(words: &mut [u64], k: usize, v: u8) {
    let word = &mut words[crate::table::ALLOC_TABLE + k / 8];
    let sh = 8 * (k % 8);
    *word = (*word & !(0xffu64 << sh)) | ((v as u64) << sh);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repr::{exp_of_bucket, shifted_significand};

    // Drive the group machinery directly; level sums stay zero, so only the
    // group/edit-map invariants are meaningful here.
    fn push(t: &mut WeightTable, k: usize, i: usize) {
        let e = exp_of_bucket(k);
        let sig = shifted_significand(1.5);
        let p = t.push_group_element(k, sig, i);
        t.set_edit_entry(i, p, e);
    }

    fn remove(t: &mut WeightTable, i: usize) {
        let e = t.edit_exp(i);
        let k = bucket_of_exp(e);
        let p = t.edit_pos(i);
        t.remove_group_element(k, p, e);
        t.clear_edit_entry(i);
    }

    fn check_groups(t: &WeightTable, expect: &[(usize, Vec<usize>)]) {
        for &(k, ref members) in expect {
            assert_eq!(t.group_len(k), members.len(), "bucket {k} length");
            let gp = t.group_pos(k);
            let mut seen: Vec<usize> = (0..members.len())
                .map(|j| t.words[gp + 2 * j + 1] as usize)
                .collect();
            seen.sort_unstable();
            let mut want = members.clone();
            want.sort_unstable();
            assert_eq!(seen, want, "bucket {k} members");
            for &i in members {
                assert_eq!(t.words[t.edit_pos(i) + 1] as usize, i, "back-pointer of {i}");
            }
        }
    }

    #[test]
    fn first_allocation_and_in_place_doubling() {
        let mut t = WeightTable::with_len(16);
        let ts = t.tail_start();
        push(&mut t, 0, 1);
        assert_eq!(t.group_pos(0), ts);
        assert_eq!(t.group_capacity(0), 1);
        // The group is the last region: doubling extends in place.
        push(&mut t, 0, 2);
        push(&mut t, 0, 3);
        assert_eq!(t.group_pos(0), ts);
        assert_eq!(t.group_capacity(0), 4);
        assert_eq!(t.free_ptr(), ts + 8);
        check_groups(&t, &[(0, vec![1, 2, 3])]);
    }

    #[test]
    fn relocation_leaves_a_tombstone() {
        let mut t = WeightTable::with_len(16);
        let ts = t.tail_start();
        push(&mut t, 0, 1);
        push(&mut t, 5, 2); // pins the tail; bucket 0 can no longer extend
        push(&mut t, 0, 3);
        assert!(t.group_pos(0) > ts);
        assert_eq!(t.group_capacity(0), 2);
        assert_eq!(t.words[ts + 1], abandoned_tag(1));
        check_groups(&t, &[(0, vec![1, 3]), (5, vec![2])]);
    }

    #[test]
    fn swap_remove_and_empty_tombstone() {
        let mut t = WeightTable::with_len(8);
        for i in 1..=4 {
            push(&mut t, 3, i);
        }
        remove(&mut t, 2); // swaps 4 into slot of 2
        check_groups(&t, &[(3, vec![1, 3, 4])]);
        remove(&mut t, 1);
        remove(&mut t, 4);
        remove(&mut t, 3);
        assert_eq!(t.group_len(3), 0);
        assert!(t.group_capacity(3) >= 4, "capacity survives emptying");
        assert_eq!(t.words[t.group_pos(3) + 1], EMPTY_GROUP | exp_of_bucket(3));
        // Reinsertion reuses the region and overwrites the tombstone.
        push(&mut t, 3, 7);
        check_groups(&t, &[(3, vec![7])]);
    }

    #[test]
    fn compaction_reclaims_abandoned_and_empty_regions() {
        let mut t = WeightTable::with_len(64);
        // Interleave pushes so both groups relocate a few times.
        for i in 0..12 {
            push(&mut t, 0, 2 * i + 1);
            push(&mut t, 9, 2 * i + 2);
        }
        // Empty out a third bucket to leave an empty-but-live region behind.
        push(&mut t, 40, 60);
        remove(&mut t, 60);
        let used_before = t.free_ptr() - t.tail_start();
        t.compact_in_place();
        let used_after = t.free_ptr() - t.tail_start();
        assert!(used_after < used_before);
        assert_eq!(used_after, t.compacted_tail_words());
        assert_eq!(t.group_capacity(40), 0, "empty group collapsed");
        let members_a: Vec<usize> = (0..12).map(|i| 2 * i + 1).collect();
        let members_b: Vec<usize> = (0..12).map(|i| 2 * i + 2).collect();
        check_groups(&t, &[(0, members_a), (9, members_b)]);
    }

    #[test]
    fn reallocation_preserves_groups_and_edit_map() {
        let mut t = WeightTable::with_len(32);
        for i in 1..=20 {
            push(&mut t, i % 4, i);
        }
        t.reallocate(100, 64);
        assert_eq!(t.em_capacity(), 100);
        assert_eq!(t.len(), 32);
        check_groups(
            &t,
            &[
                (0, vec![4, 8, 12, 16, 20]),
                (1, vec![1, 5, 9, 13, 17]),
                (2, vec![2, 6, 10, 14, 18]),
                (3, vec![3, 7, 11, 15, 19]),
            ],
        );
    }

    #[test]
    fn heavy_churn_stays_consistent() {
        let mut t = WeightTable::with_len(256);
        for round in 0..6 {
            for i in 1..=256usize {
                if t.edit_pos(i) == 0 {
                    push(&mut t, (i * 7 + round) % 100, i);
                }
            }
            for i in (1..=256usize).step_by(2) {
                remove(&mut t, i);
            }
        }
        let mut live = 0;
        for i in 1..=256usize {
            if t.edit_pos(i) != 0 {
                live += 1;
                assert_eq!(t.words[t.edit_pos(i) + 1] as usize, i);
            }
        }
        assert_eq!(live, t.live());
    }
}

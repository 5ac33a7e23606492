// SPDX-License-Identifier: Apache-2.0
// Copyright © 2024 The Hymem Authors

//! Saturating per-block hotness counters shared by the LLT and VG policies.
//! MP tracks hotness differently (see [`crate::policy::mp`]) and does not
//! use this module.

use std::vec::Vec;

/// One saturating counter per tracked block, plus the periodic decay pass
/// described in the crate-level docs.
#[derive(Debug, Clone)]
pub struct HotnessTracker {
    counters: Vec<u8>,
    threshold: u8,
    cycles_per_decrement: u64,
    last_decay_cycle: u64,
}

impl HotnessTracker {
    pub fn new(tracked_count: usize, threshold: u8, cycles_per_decrement: u64) -> Self {
        Self {
            counters: core::iter::repeat(0).take(tracked_count).collect(),
            threshold,
            cycles_per_decrement,
            last_decay_cycle: 0,
        }
    }

    #[inline]
    pub fn is_hot(&self, index: usize) -> bool { self.counters[index] >= self.threshold }

    #[inline]
    pub fn counter(&self, index: usize) -> u8 { self.counters[index] }

    /// Bump a block's counter on access, saturating at `u8::MAX`.
    #[inline]
    pub fn bump(&mut self, index: usize) {
        self.counters[index] = self.counters[index].saturating_add(1);
    }

    /// Halve every counter for the members of a congruence group other than
    /// `keep_index`. Used by VG's `cold_data_detection_in_group` heuristic.
    pub fn halve_others_in_group(&mut self, group_indices: &[usize], keep_index: usize) {
        for &idx in group_indices {
            if idx != keep_index {
                self.counters[idx] /= 2;
            }
        }
    }

    /// Reset a single counter, e.g. after a block has been evicted or moved.
    #[inline]
    pub fn reset(&mut self, index: usize) { self.counters[index] = 0; }

    /// Called on every simulated cycle; halves every live counter once per
    /// `cycles_per_decrement` cycles have elapsed since the last pass.
    /// Returns whether a decay pass actually ran this call, so callers that
    /// track their own per-block state derived from hotness (VG's
    /// AccessTable) know when to re-check which counters reached zero.
    pub fn tick(&mut self, now_cycles: u64) -> bool {
        if now_cycles.wrapping_sub(self.last_decay_cycle) < self.cycles_per_decrement {
            return false;
        }
        self.last_decay_cycle = now_cycles;
        for c in self.counters.iter_mut() {
            *c /= 2;
        }
        true
    }
}

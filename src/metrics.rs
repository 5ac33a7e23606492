// SPDX-License-Identifier: Apache-2.0
// Copyright © 2024 The Hymem Authors

//! Observer hooks and counters. Kept out of the hot access/tick paths
//! proper: a policy calls into an `&mut dyn Observer` at well-defined
//! points, but never branches on the statistics it reports.

use std::collections::HashMap;

/// Which memory tier an access was ultimately satisfied from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Fast,
    Slow,
}

/// Callback surface a driver can implement to observe simulation events
/// without the core needing to know anything about how they're recorded.
pub trait Observer {
    /// An access completed against `tier`.
    fn on_access(&mut self, tier: Tier) {
        let _ = tier;
    }
    /// A migration/swap between tiers finished for the named set/segment.
    fn on_swap_complete(&mut self, set_index: u64) {
        let _ = set_index;
    }
    /// A block or group was evicted from the fast tier without immediately
    /// being replaced (VG cold eviction).
    fn on_eviction(&mut self, set_index: u64) {
        let _ = set_index;
    }
    /// VG only: a migrated run was placed with the given granularity, in
    /// bytes. Feeds the per-block granularity histogram reported at
    /// teardown.
    fn on_granularity_chosen(&mut self, granularity_bytes: u64) {
        let _ = granularity_bytes;
    }
}

/// A no-op [`Observer`], used as the default when a driver doesn't care
/// about statistics.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl Observer for NullObserver {}

/// Tracks how many times each granularity (in bytes) was chosen by VG's
/// placement logic, for reporting the distribution the driver prints at the
/// end of a run.
#[derive(Debug, Default, Clone)]
pub struct GranularityHistogram {
    counts: HashMap<u64, u64>,
}

impl GranularityHistogram {
    pub fn new() -> Self { Self::default() }

    pub fn record(&mut self, granularity_bytes: u64) {
        *self.counts.entry(granularity_bytes).or_insert(0) += 1;
    }

    pub fn count(&self, granularity_bytes: u64) -> u64 {
        self.counts.get(&granularity_bytes).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 { self.counts.values().sum() }

    pub fn iter(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.counts.iter().map(|(&g, &c)| (g, c))
    }
}

/// Aggregate counters a driver typically wants at the end of a run. Built in
/// terms of [`Observer`] so a driver can compose it with its own reporting.
#[derive(Debug, Default, Clone)]
pub struct Stats {
    pub fast_accesses: u64,
    pub slow_accesses: u64,
    pub swaps_completed: u64,
    pub evictions: u64,
    pub granularities: GranularityHistogram,
}

impl Observer for Stats {
    fn on_access(&mut self, tier: Tier) {
        match tier {
            Tier::Fast => self.fast_accesses += 1,
            Tier::Slow => self.slow_accesses += 1,
        }
    }

    fn on_swap_complete(&mut self, _set_index: u64) { self.swaps_completed += 1; }

    fn on_eviction(&mut self, _set_index: u64) { self.evictions += 1; }

    fn on_granularity_chosen(&mut self, granularity_bytes: u64) {
        self.granularities.record(granularity_bytes);
    }
}

impl Stats {
    pub fn new() -> Self { Self::default() }

    pub fn total_accesses(&self) -> u64 { self.fast_accesses + self.slow_accesses }

    pub fn fast_hit_rate(&self) -> f64 {
        if self.total_accesses() == 0 {
            0.0
        } else {
            self.fast_accesses as f64 / self.total_accesses() as f64
        }
    }
}

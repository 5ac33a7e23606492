// SPDX-License-Identifier: Apache-2.0
// Copyright © 2024 The Hymem Authors

//! Epoch-based bulk swap: rather than tracking per-block hotness
//! continuously, MP measures access counts over a fixed-length epoch and,
//! at each epoch boundary, swaps the hottest slow-memory segments into fast
//! memory in bulk (2 KiB at a time). Address translation is a pair of
//! mutually-inverse hash maps rather than a per-set location table, since a
//! segment can move anywhere in the FM range rather than within a fixed
//! congruence group.

use std::collections::HashMap;

use heapless::FnvIndexMap;
use log::{debug, trace, warn};

use crate::addr::Geometry;
use crate::config::Config;
use crate::error::ConfigError;
use crate::metrics::Observer;
use crate::policy::{should_ignore, tier_of, AccessPacket, Policy};
use crate::queue::{Queue, RemappingRequest};

const SEGMENT_SIZE: u64 = 2048;
const SEGMENT_LINES: u16 = (SEGMENT_SIZE / 64) as u16;
const MAX_TRACKED_SEGMENTS: usize = 16;
const COUNTER_CAP: u8 = 4;

/// One tracked segment's epoch-measurement state: its saturating access
/// count and the touch sequence used to break ties between equally-
/// saturated counters (the count itself caps at [`COUNTER_CAP`] and so
/// cannot distinguish "hit 4 times" from "hit 400 times").
#[derive(Debug, Clone, Copy)]
struct MeaEntry {
    count: u8,
    last_touch: u64,
}

pub struct MpCore {
    geo: Geometry,
    fm_segment_count: u64,
    /// Bounded at [`MAX_TRACKED_SEGMENTS`] live segments, so a fixed-
    /// capacity map is the right fit: same choice `queue.rs` makes for the
    /// remapping request queue, backed by the same `heapless` dependency.
    mea_counter: FnvIndexMap<u64, MeaEntry, MAX_TRACKED_SEGMENTS>,
    touch_seq: u64,
    /// Unbounded for the life of the run (a swap's mapping persists until
    /// superseded by another swap, with no cap on how many segments may
    /// have moved), so this stays a plain heap-allocated map.
    address_remapping: HashMap<u64, u64>,
    invert_address_remapping: HashMap<u64, u64>,
    queue: Queue<4096>,
    config: Config,
    cycle: u64,
    last_epoch_cycle: u64,
    swap_fm_cursor: u64,
    congestion: u64,
}

impl MpCore {
    pub fn new(
        total_capacity_bytes: u64,
        fast_memory_capacity_bytes: u64,
        config: Config,
    ) -> Result<Self, ConfigError> {
        // MP has no congruence-group structure to bound, so the group-size
        // cap Geometry otherwise enforces is irrelevant here; pass u64::MAX
        // to admit any total/fast ratio.
        let geo = Geometry::new(total_capacity_bytes, fast_memory_capacity_bytes, SEGMENT_SIZE, u64::MAX)?;
        let fm_segment_count = fast_memory_capacity_bytes / SEGMENT_SIZE;
        debug!("MP core: {} FM segments, {} total segments", fm_segment_count, geo.total_blocks);
        Ok(Self {
            geo,
            fm_segment_count,
            mea_counter: FnvIndexMap::new(),
            touch_seq: 0,
            address_remapping: HashMap::new(),
            invert_address_remapping: HashMap::new(),
            queue: Queue::new(),
            config,
            cycle: 0,
            last_epoch_cycle: 0,
            swap_fm_cursor: 0,
            congestion: 0,
        })
    }

    #[inline]
    fn segment_of(&self, address: u64) -> u64 { self.geo.block_index(address) }

    #[inline]
    fn hw_segment(&self, physical_segment: u64) -> u64 {
        self.address_remapping.get(&physical_segment).copied().unwrap_or(physical_segment)
    }

    fn bump_mea(&mut self, segment: u64) {
        self.touch_seq += 1;
        let seq = self.touch_seq;
        if let Some(entry) = self.mea_counter.get_mut(&segment) {
            entry.count = (entry.count + 1).min(COUNTER_CAP);
            entry.last_touch = seq;
            return;
        }
        if self.mea_counter.len() < MAX_TRACKED_SEGMENTS {
            let _ = self.mea_counter.insert(segment, MeaEntry { count: 1, last_touch: seq });
            return;
        }
        // Table full: age every tracked segment out by one and drop any
        // that reach zero, then retry the insertion once.
        let mut expired: heapless::Vec<u64, MAX_TRACKED_SEGMENTS> = heapless::Vec::new();
        for (&seg, entry) in self.mea_counter.iter_mut() {
            entry.count -= 1;
            if entry.count == 0 {
                let _ = expired.push(seg);
            }
        }
        for seg in &expired {
            self.mea_counter.remove(seg);
        }
        if self.mea_counter.len() < MAX_TRACKED_SEGMENTS {
            let _ = self.mea_counter.insert(segment, MeaEntry { count: 1, last_touch: seq });
        }
    }

    /// Run the epoch boundary procedure: rank hot segments, cancel
    /// not-yet-applied pending swaps, and enqueue fresh ones for every hot
    /// segment still resident in slow memory.
    fn check_interval_swap(&mut self, obs: &mut dyn Observer) {
        let threshold = self.config.mp.swap_threshold;
        let mut hot: heapless::Vec<(u64, u8, u64), MAX_TRACKED_SEGMENTS> = heapless::Vec::new();
        for (&seg, entry) in self.mea_counter.iter() {
            if entry.count >= threshold {
                let _ = hot.push((seg, entry.count, entry.last_touch));
            }
        }
        // Highest counter first; among ties, the most recently touched
        // segment first (see `MeaEntry` doc comment).
        hot.sort_by(|a, b| b.1.cmp(&a.1).then(b.2.cmp(&a.2)));

        // Any swap still sitting in the queue has not yet been applied by
        // the external memory model; a new epoch supersedes it rather than
        // letting stale pairings pile up.
        while self.queue.dequeue().is_some() {}

        for (segment, _count, _seq) in hot {
            let current = self.hw_segment(segment);
            if current < self.fm_segment_count {
                // Already resident in FM; nothing to do this epoch.
                continue;
            }

            if self.fm_segment_count == 0 {
                break;
            }
            let fm_target = self.swap_fm_cursor;
            self.swap_fm_cursor = (self.swap_fm_cursor + 1) % self.fm_segment_count;

            let addr_fm = fm_target * SEGMENT_SIZE;
            let addr_sm = current * SEGMENT_SIZE;
            let req = RemappingRequest::segment_swap(addr_fm, addr_sm, SEGMENT_LINES);
            if self.queue.enqueue_segment_swap_deduped(req) {
                trace!("MP enqueue: segment={segment} current_hw={current} fm_target={fm_target}");
            } else if self.queue.len() == self.queue.capacity() {
                self.congestion += 1;
                warn!("MP remapping queue full, congestion={}", self.congestion);
            }
        }

        if self.config.mp.reset_every_epoch {
            self.mea_counter.clear();
        }

        let _ = obs;
    }
}

impl Policy for MpCore {
    fn track(&mut self, packet: &AccessPacket, _busy_degree: f32, obs: &mut dyn Observer) -> bool {
        if packet.address >= self.geo.total_capacity {
            warn!("MP track: address {:#x} out of range", packet.address);
            return false;
        }
        if should_ignore(
            packet.op,
            packet.origin,
            self.config.ignore_writeback,
            self.config.ignore_writes,
        ) {
            return true;
        }

        let segment = self.segment_of(packet.address);
        self.bump_mea(segment);
        obs.on_access(tier_of(self.translate(packet.address), self.geo.fast_capacity));
        true
    }

    fn translate(&self, address: u64) -> u64 {
        let segment = self.segment_of(address);
        let hw_segment = self.hw_segment(segment);
        let byte_offset = self.geo.byte_offset(address);
        hw_segment * SEGMENT_SIZE + byte_offset
    }

    fn issue(&self) -> Option<RemappingRequest> { self.queue.iter().next().copied() }

    fn finish(&mut self, obs: &mut dyn Observer) -> bool {
        let req = match self.queue.dequeue() {
            Some(r) => r,
            None => panic!("finish called with an empty remapping request queue"),
        };
        assert_ne!(
            req.address_in_fm, req.address_in_sm,
            "address_in_fm == address_in_sm is a fatal bug indicator"
        );

        let fm_segment = req.address_in_fm / SEGMENT_SIZE;
        let sm_segment = req.address_in_sm / SEGMENT_SIZE;

        // The physical segment currently occupying `fm_segment`'s hardware
        // slot (absent means it was still identity-mapped, i.e. it IS
        // `fm_segment`) trades places with the hot segment.
        let displaced_physical =
            self.invert_address_remapping.get(&fm_segment).copied().unwrap_or(fm_segment);
        let hot_physical = self.invert_address_remapping.get(&sm_segment).copied().unwrap_or(sm_segment);

        self.address_remapping.insert(hot_physical, fm_segment);
        self.invert_address_remapping.insert(fm_segment, hot_physical);
        self.address_remapping.insert(displaced_physical, sm_segment);
        self.invert_address_remapping.insert(sm_segment, displaced_physical);

        debug_assert_eq!(
            self.address_remapping.get(&hot_physical).copied(),
            Some(fm_segment)
        );
        debug_assert_eq!(
            self.invert_address_remapping.get(&fm_segment).copied(),
            Some(hot_physical)
        );

        debug!("MP finish: physical={hot_physical} -> hw={fm_segment}, displaced physical={displaced_physical} -> hw={sm_segment}");
        obs.on_swap_complete(fm_segment);
        true
    }

    fn tick(&mut self, obs: &mut dyn Observer) {
        self.cycle += 1;
        if self.cycle.wrapping_sub(self.last_epoch_cycle) >= self.config.mp.epoch_cycles {
            self.last_epoch_cycle = self.cycle;
            self.check_interval_swap(obs);
        }
    }

    fn congestion(&self) -> u64 { self.congestion }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::NullObserver;
    use crate::policy::OpType;

    fn new_core() -> MpCore {
        MpCore::new(16 * 1024 * 1024, 4 * 1024 * 1024, Config::mp_defaults()).unwrap()
    }

    #[test]
    fn mea_counter_saturates_at_cap() {
        let mut core = new_core();
        for _ in 0..10 {
            core.bump_mea(5);
        }
        assert_eq!(core.mea_counter.get(&5).unwrap().count, COUNTER_CAP);
    }

    #[test]
    fn mea_table_ages_out_when_full() {
        let mut core = new_core();
        for seg in 0..MAX_TRACKED_SEGMENTS as u64 {
            core.bump_mea(seg);
        }
        assert_eq!(core.mea_counter.len(), MAX_TRACKED_SEGMENTS);
        core.bump_mea(999);
        // Every existing counter (all at 1) aged to 0 and was evicted,
        // making room for the new segment.
        assert!(core.mea_counter.contains_key(&999));
        assert_eq!(core.mea_counter.len(), 1);
    }

    #[test]
    fn s5_mp_epoch_scenario() {
        let mut core = new_core();
        let mut obs = NullObserver;
        // Segments far enough out to be identity-mapped to SM initially.
        let x = (core.fm_segment_count + 1) * SEGMENT_SIZE;
        let y = (core.fm_segment_count + 2) * SEGMENT_SIZE;

        for _ in 0..10 {
            core.track(&AccessPacket::new(x, OpType::Read), 0.0, &mut obs);
        }
        for _ in 0..100 {
            core.track(&AccessPacket::new(y, OpType::Read), 0.0, &mut obs);
        }

        core.check_interval_swap(&mut obs);

        assert_eq!(core.queue.len(), 2);
        let first = core.queue.dequeue().unwrap();
        assert_eq!(first.address_in_sm / SEGMENT_SIZE, core.segment_of(y));
        let second = core.queue.dequeue().unwrap();
        assert_eq!(second.address_in_sm / SEGMENT_SIZE, core.segment_of(x));
    }

    #[test]
    fn finish_keeps_remap_maps_mutually_inverse() {
        let mut core = new_core();
        let mut obs = NullObserver;
        let hot_segment = core.fm_segment_count + 3;
        let req = RemappingRequest::segment_swap(0, hot_segment * SEGMENT_SIZE, SEGMENT_LINES);
        core.queue.enqueue_segment_swap_deduped(req);
        assert!(core.finish(&mut obs));

        for (&p, &h) in core.address_remapping.iter() {
            assert_eq!(core.invert_address_remapping.get(&h).copied(), Some(p));
        }
        for (&h, &p) in core.invert_address_remapping.iter() {
            assert_eq!(core.address_remapping.get(&p).copied(), Some(h));
        }
    }

    #[test]
    fn translate_is_identity_before_any_swap() {
        let core = new_core();
        let addr = 5 * SEGMENT_SIZE + 17;
        assert_eq!(core.translate(addr), addr);
    }
}

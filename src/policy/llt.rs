// SPDX-License-Identifier: Apache-2.0
// Copyright © 2024 The Hymem Authors

//! Line-granularity congruence-group remapping. A bit-packed
//! [`LltEntry`] per FM set tracks which congruence-group member currently
//! occupies the native (FM) slot; hot non-native blocks get swapped in.

use log::{debug, trace, warn};

use crate::addr::Geometry;
use crate::config::Config;
use crate::error::ConfigError;
use crate::hotness::HotnessTracker;
use crate::metrics::Observer;
use crate::policy::{should_ignore, tier_of, AccessPacket, OpType, Policy};
use crate::queue::{Queue, RemappingRequest};

/// A bit-packed location-table entry: `n` fields of `width_bits` bits each,
/// MSB-first, matching the original's byte layout exactly (the default
/// identity permutation for `n=5, width_bits=3` packs to `0x0538`) so that a
/// trace depending on the raw packed value behaves identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LltEntry {
    packed: u32,
    n: u32,
    width_bits: u32,
    /// Unused low bits below the packed fields, to match the original's
    /// 16-bit container leaving one bit idle for `n=5, width_bits=3`.
    padding_bits: u32,
}

impl LltEntry {
    /// The identity permutation: `location[i] = i` for every member.
    pub fn identity(n: u32, width_bits: u32) -> Self {
        let container_bits = Self::container_bits(n, width_bits);
        let padding_bits = container_bits - n * width_bits;
        let mut entry = Self { packed: 0, n, width_bits, padding_bits };
        for i in 0..n {
            entry.set(i, i as u8);
        }
        entry
    }

    fn container_bits(n: u32, width_bits: u32) -> u32 {
        let needed = n * width_bits;
        if needed <= 16 {
            16
        } else {
            32
        }
    }

    #[inline]
    fn shift_for(&self, index: u32) -> u32 {
        debug_assert!(index < self.n);
        self.width_bits * (self.n - 1 - index) + self.padding_bits
    }

    #[inline]
    fn field_mask(&self) -> u32 { (1u32 << self.width_bits) - 1 }

    /// Location value currently stored at `index` (the congruence-group
    /// member whose native tag is `index`).
    #[inline]
    pub fn get(&self, index: u32) -> u8 {
        ((self.packed >> self.shift_for(index)) & self.field_mask()) as u8
    }

    fn set(&mut self, index: u32, value: u8) {
        let shift = self.shift_for(index);
        let mask = self.field_mask() << shift;
        self.packed = (self.packed & !mask) | ((value as u32) << shift);
    }

    /// Swap the values stored at the two given table positions. This
    /// preserves the permutation invariant by construction (it only ever
    /// moves existing values between slots).
    pub fn swap(&mut self, a: u32, b: u32) {
        let va = self.get(a);
        let vb = self.get(b);
        self.set(a, vb);
        self.set(b, va);
    }

    /// `true` iff the stored values are exactly a permutation of
    /// `0..n`. Checked after every `finish` as a fatal-on-violation
    /// postcondition.
    pub fn is_permutation(&self) -> bool {
        let mut seen = 0u32;
        for i in 0..self.n {
            let v = self.get(i) as u32;
            if v >= self.n || (seen & (1 << v)) != 0 {
                return false;
            }
            seen |= 1 << v;
        }
        true
    }

    /// Index of the member currently holding location `0` (the native FM
    /// slot), i.e. the inverse lookup `location -> tag`.
    pub fn tag_of_location(&self, location: u8) -> Option<u32> {
        (0..self.n).find(|&i| self.get(i) == location)
    }
}

/// An access still waiting on its fast-memory-side table lookup, for the
/// colocated-LLT variant: the memory controller must consult FM (to read the
/// location entry, which is stored there) before it knows whether to also
/// touch SM.
#[derive(Debug, Clone, Copy)]
struct PendingAccess {
    h_address_fm: u64,
    fm_access_finish: bool,
}

const INCOMPLETE_QUEUE_LEN: usize = 128;

pub struct LltCore {
    geo: Geometry,
    n: u32,
    entries: Vec<LltEntry>,
    hotness: HotnessTracker,
    queue: Queue<64>,
    config: Config,
    cycle: u64,
    congestion: u64,
    incomplete_reads: Vec<PendingAccess>,
    incomplete_writes: Vec<PendingAccess>,
}

impl LltCore {
    pub fn new(
        total_capacity_bytes: u64,
        fast_memory_capacity_bytes: u64,
        config: Config,
    ) -> Result<Self, ConfigError> {
        let geo = Geometry::new(
            total_capacity_bytes,
            fast_memory_capacity_bytes,
            64,
            config.group_size,
        )?;
        let n = geo.group_size as u32;
        let entries =
            vec![LltEntry::identity(n, config.remapping_location_width_bits); geo.set_count as usize];
        let hotness = HotnessTracker::new(
            geo.total_blocks as usize,
            config.hotness_threshold,
            config.interval_for_decrement,
        );
        debug!(
            "LLT core: {} sets, {} members/group, {}-bit location fields",
            geo.set_count, n, config.remapping_location_width_bits
        );
        Ok(Self {
            geo,
            n,
            entries,
            hotness,
            queue: Queue::new(),
            config,
            cycle: 0,
            congestion: 0,
            incomplete_reads: Vec::new(),
            incomplete_writes: Vec::new(),
        })
    }

    fn push_pending(queue: &mut Vec<PendingAccess>, h_address_fm: u64) {
        if queue.len() >= INCOMPLETE_QUEUE_LEN {
            warn!("colocated-LLT pending queue full, dropping oldest entry");
            queue.remove(0);
        }
        queue.push(PendingAccess { h_address_fm, fm_access_finish: false });
    }

    fn finish_pending(queue: &mut Vec<PendingAccess>, h_addr: u64) -> bool {
        if let Some(entry) = queue.iter_mut().find(|e| e.h_address_fm == h_addr && !e.fm_access_finish) {
            entry.fm_access_finish = true;
            queue.retain(|e| !e.fm_access_finish);
            true
        } else {
            false
        }
    }

    /// Colocated-LLT only: record that `h_addr`'s read is waiting on its
    /// FM-side table lookup.
    pub fn begin_colocated_read(&mut self, h_address_fm: u64) {
        debug_assert!(self.config.colocated);
        Self::push_pending(&mut self.incomplete_reads, h_address_fm);
    }

    /// Colocated-LLT only: record that `h_addr`'s write is waiting on its
    /// FM-side table lookup.
    pub fn begin_colocated_write(&mut self, h_address_fm: u64) {
        debug_assert!(self.config.colocated);
        Self::push_pending(&mut self.incomplete_writes, h_address_fm);
    }

    pub fn finish_fm_access_read(&mut self, h_addr: u64) -> bool {
        Self::finish_pending(&mut self.incomplete_reads, h_addr)
    }

    pub fn finish_fm_access_write(&mut self, h_addr: u64) -> bool {
        Self::finish_pending(&mut self.incomplete_writes, h_addr)
    }
}

impl Policy for LltCore {
    fn track(&mut self, packet: &AccessPacket, busy_degree: f32, obs: &mut dyn Observer) -> bool {
        if packet.address >= self.geo.total_capacity {
            warn!("LLT track: address {:#x} out of range", packet.address);
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

        let block = self.geo.block_index(packet.address);
        let set = self.geo.set_index(block);
        let tag = self.geo.tag(block) as u32;

        self.hotness.bump(block as usize);
        obs.on_access(tier_of(self.translate(packet.address), self.geo.fast_capacity));

        let entry = &self.entries[set as usize];
        let location = entry.get(tag);

        if self.hotness.is_hot(block as usize) && location != 0 {
            let fm_tag = entry
                .tag_of_location(0)
                .expect("location table entry must always contain a member holding location 0");

            assert_ne!(
                fm_tag, tag,
                "fm_tag and sm_tag resolved to the same member; location table is corrupt"
            );

            if busy_degree <= self.config.queue_busy_degree_threshold {
                let req = RemappingRequest::new(set, fm_tag as u8, tag as u8, 1);
                if self.queue.enqueue_deduped(req) {
                    trace!("LLT enqueue: set={set} fm_tag={fm_tag} sm_tag={tag}");
                } else if self.queue.len() == self.queue.capacity() {
                    self.congestion += 1;
                    warn!("LLT remapping queue full, congestion={}", self.congestion);
                }
            }
        }

        true
    }

    fn translate(&self, address: u64) -> u64 {
        let block = self.geo.block_index(address);
        let set = self.geo.set_index(block);
        let tag = self.geo.tag(block) as u32;
        let location = self.entries[set as usize].get(tag);
        self.geo.compose(set, location as u64, self.geo.byte_offset(address))
    }

    fn issue(&self) -> Option<RemappingRequest> { self.queue.iter().next().copied() }

    fn finish(&mut self, obs: &mut dyn Observer) -> bool {
        let req = match self.queue.dequeue() {
            Some(r) => r,
            None => panic!("finish called with an empty remapping request queue"),
        };
        let entry = &mut self.entries[req.set_index as usize];
        entry.swap(req.fm_location as u32, req.sm_location as u32);
        assert!(entry.is_permutation(), "LLT permutation invariant violated after swap");
        debug!("LLT finish: set={} fm={} sm={}", req.set_index, req.fm_location, req.sm_location);
        obs.on_swap_complete(req.set_index);
        true
    }

    fn tick(&mut self, _obs: &mut dyn Observer) {
        self.cycle += 1;
        self.hotness.tick(self.cycle);
    }

    fn congestion(&self) -> u64 { self.congestion }
}

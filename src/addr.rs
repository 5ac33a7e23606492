// SPDX-License-Identifier: Apache-2.0
// Copyright © 2024 The Hymem Authors

//! Pure bit-field arithmetic shared by the congruence-group policies (LLT
//! and VG). Every function here is a constant-time, side-effect-free
//! transform of an address; no metadata is consulted.
//!
//! The hardware address space is laid out as `N` stacked slices, each the
//! size of the fast-memory capacity: slice 0 is the FM slice itself, and
//! slices `1..N` are the `N-1` slow-memory members of each congruence group.
//! `compose` places a location value by picking the slice, which is
//! equivalent to the original bit-window insertion this crate was ported
//! from (the FM capacity is a power of two, so `location * fast_capacity`
//! and "insert `location` above the FM's own address bits" are the same
//! operation) but reads as ordinary arithmetic instead of raw bit twiddling.

use crate::error::ConfigError;

/// Precomputed layout derived from the two capacities and a policy's data
/// block size. Shared by the LLT and VG policies, whose addressing only
/// differs in block size and how many cache lines make up one block.
#[derive(Debug, Clone, Copy)]
pub struct Geometry {
    pub block_size: u64,
    pub block_offset_bits: u32,
    pub total_capacity: u64,
    pub fast_capacity: u64,
    /// Number of FM sets (`F`).
    pub set_count: u64,
    /// Total number of data blocks (`T`).
    pub total_blocks: u64,
    /// Congruence group size (`T / F`), i.e. how many members share a set.
    pub group_size: u64,
}

impl Geometry {
    pub fn new(
        total_capacity: u64,
        fast_capacity: u64,
        block_size: u64,
        max_group_size: u64,
    ) -> Result<Self, ConfigError> {
        if !total_capacity.is_power_of_two() {
            return Err(ConfigError::TotalCapacityNotPowerOfTwo);
        }
        if !fast_capacity.is_power_of_two() {
            return Err(ConfigError::FastCapacityNotPowerOfTwo);
        }
        if !block_size.is_power_of_two() {
            return Err(ConfigError::BlockSizeNotPowerOfTwo);
        }
        if fast_capacity > total_capacity {
            return Err(ConfigError::FastExceedsTotal);
        }

        let set_count = fast_capacity / block_size;
        let total_blocks = total_capacity / block_size;
        if total_blocks % set_count != 0 {
            return Err(ConfigError::CapacityNotGroupAligned);
        }
        let group_size = total_blocks / set_count;
        if group_size > max_group_size {
            return Err(ConfigError::GroupTooLarge { actual: group_size, max: max_group_size });
        }

        Ok(Self {
            block_size,
            block_offset_bits: block_size.trailing_zeros(),
            total_capacity,
            fast_capacity,
            set_count,
            total_blocks,
            group_size,
        })
    }

    #[inline]
    pub fn block_index(&self, addr: u64) -> u64 { addr >> self.block_offset_bits }

    #[inline]
    pub fn set_index(&self, block_index: u64) -> u64 { block_index % self.set_count }

    #[inline]
    pub fn tag(&self, block_index: u64) -> u64 { block_index / self.set_count }

    #[inline]
    pub fn byte_offset(&self, addr: u64) -> u64 { addr & (self.block_size - 1) }

    /// Line offset of `addr` within its data block, for a given cache line
    /// size. `lines_per_block` is `block_size / line_size`.
    #[inline]
    pub fn line_offset(&self, addr: u64, line_size: u64, lines_per_block: u64) -> u64 {
        (addr / line_size) % lines_per_block
    }

    /// Compose a hardware address from a set index, a location value, and a
    /// byte offset within the block.
    #[inline]
    pub fn compose(&self, set_index: u64, location: u64, byte_offset: u64) -> u64 {
        debug_assert!(byte_offset < self.block_size);
        location * self.fast_capacity + (set_index << self.block_offset_bits) + byte_offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_power_of_two() {
        assert_eq!(
            Geometry::new(3 * 1024 * 1024, 1024 * 1024, 64, 8).unwrap_err(),
            ConfigError::TotalCapacityNotPowerOfTwo
        );
    }

    #[test]
    fn rejects_oversized_group() {
        // total/fast = 8 but only 4 members are permitted.
        let err = Geometry::new(16 * 1024 * 1024, 2 * 1024 * 1024, 64, 4).unwrap_err();
        assert_eq!(err, ConfigError::GroupTooLarge { actual: 8, max: 4 });
    }

    #[test]
    fn compose_round_trips_through_block_index_and_set_index() {
        let geo = Geometry::new(16 * 1024 * 1024, 4 * 1024 * 1024, 64, 8).unwrap();
        let set = 10u64;
        let h = geo.compose(set, 0, 0);
        assert_eq!(geo.set_index(geo.block_index(h)), set);
        assert_eq!(geo.tag(geo.block_index(h)), 0);

        let h2 = geo.compose(set, 2, 0);
        assert_eq!(geo.tag(geo.block_index(h2)), 2);
    }
}

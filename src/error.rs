// SPDX-License-Identifier: Apache-2.0
// Copyright © 2024 The Hymem Authors

use core::fmt;

/// Errors detected while validating the geometry of a [`crate::Core`] at
/// construction time. These are caller mistakes discoverable before any
/// simulation state exists, so unlike the in-simulation contract violations
/// described in the crate-level docs, they are recoverable `Result`s rather
/// than panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// `total_capacity_bytes` is not a power of two.
    TotalCapacityNotPowerOfTwo,
    /// `fast_memory_capacity_bytes` is not a power of two.
    FastCapacityNotPowerOfTwo,
    /// The policy's data block size is not a power of two.
    BlockSizeNotPowerOfTwo,
    /// `fast_memory_capacity_bytes` exceeds `total_capacity_bytes`.
    FastExceedsTotal,
    /// `total_capacity_bytes` is not evenly covered by whole congruence groups.
    CapacityNotGroupAligned,
    /// The congruence group implied by the two capacities (`total/fast`) does
    /// not fit in the configured number of group members.
    GroupTooLarge { actual: u64, max: u64 },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::TotalCapacityNotPowerOfTwo => {
                write!(f, "total_capacity_bytes must be a power of two")
            }
            ConfigError::FastCapacityNotPowerOfTwo => {
                write!(f, "fast_memory_capacity_bytes must be a power of two")
            }
            ConfigError::BlockSizeNotPowerOfTwo => write!(f, "block size must be a power of two"),
            ConfigError::FastExceedsTotal => {
                write!(f, "fast_memory_capacity_bytes must not exceed total_capacity_bytes")
            }
            ConfigError::CapacityNotGroupAligned => {
                write!(f, "total_capacity_bytes is not an integer number of congruence groups")
            }
            ConfigError::GroupTooLarge { actual, max } => write!(
                f,
                "congruence group size {actual} exceeds the configured maximum of {max} members"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

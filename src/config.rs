// SPDX-License-Identifier: Apache-2.0
// Copyright © 2024 The Hymem Authors

//! Tunable parameters recognised by the core. This module performs no file
//! I/O of its own: loading a `Config` from disk or from command-line flags
//! is the job of the external driver named in the crate-level docs. When the
//! `serde` feature is enabled (the default), `Config` and its sub-structs can
//! be deserialized directly from whatever format that driver prefers.

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VgConfig {
    /// Allow a non-tail group in a set to be trimmed/resized in place. When
    /// off, any access that would require resizing a non-tail group instead
    /// triggers a cold eviction of some other occupant.
    pub flexible_data_placement: bool,
    /// Allow a migrated run's granularity to be the exact access envelope
    /// size rather than rounded up to one of the fixed granularities.
    pub flexible_granularity: bool,
    /// Allow cold-data eviction to run at all. If disabled, an access that
    /// would otherwise evict simply continues against the current mapping.
    pub data_eviction: bool,
    /// Evict a victim group immediately rather than waiting for its block to
    /// go cold.
    pub immediate_eviction: bool,
    /// Halve the counters of *other* tags in the same congruence group on
    /// every access (an aggressive cold-detection heuristic; see the open
    /// question recorded in `DESIGN.md`).
    pub cold_data_detection_in_group: bool,
}

impl Default for VgConfig {
    fn default() -> Self {
        Self {
            flexible_data_placement: false,
            flexible_granularity: false,
            data_eviction: true,
            immediate_eviction: false,
            cold_data_detection_in_group: false,
        }
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MpConfig {
    /// Length of one hotness-measurement epoch, expressed in simulator
    /// cycles. The spec fixes this at 50 microseconds of simulated time;
    /// converting that to a cycle count is the driver's job (it knows the
    /// clock period), so this field holds the already-converted value.
    pub epoch_cycles: u64,
    /// Minimum `mea_counter` value for a segment to be considered for a swap
    /// at an epoch boundary.
    pub swap_threshold: u8,
    /// Clear all measurement counters at every epoch boundary rather than
    /// letting them persist (and saturate) across epochs.
    pub reset_every_epoch: bool,
}

impl Default for MpConfig {
    fn default() -> Self {
        Self { epoch_cycles: 50_000, swap_threshold: 3, reset_every_epoch: true }
    }
}

/// All tunables recognised by any of the three policies. Fields that don't
/// apply to a given policy are simply ignored by it.
///
/// The remapping request queue's capacity (64 for LLT, 4096 for VG/MP) is
/// deliberately not a field here: it is a const generic on
/// [`crate::queue::Queue`], a fixed property of the policy rather than
/// something a run picks at load time, matching the fixed-size ring buffers
/// it is modelled on (see `queue.rs`). A `queue_length` field here that no
/// code read would be a config knob in name only.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Config {
    /// Saturating-counter value at which a data block is considered hot.
    pub hotness_threshold: u8,
    /// Number of simulator cycles between decay passes over every counter.
    pub interval_for_decrement: u64,
    /// Queue-pressure signal above which new migrations are not enqueued.
    pub queue_busy_degree_threshold: f32,
    /// Width, in bits, of one location field in the bit-packed LLT entry.
    pub remapping_location_width_bits: u32,
    /// Congruence group size (`N`): members per FM set.
    pub group_size: u64,
    /// Ignore write-back traffic when updating hotness.
    pub ignore_writeback: bool,
    /// Ignore all writes when updating hotness.
    pub ignore_writes: bool,
    /// Enable the colocated-LLT pending-access bookkeeping
    /// (`finish_fm_access_read` / `finish_fm_access_write`).
    pub colocated: bool,
    pub vg: VgConfig,
    pub mp: MpConfig,
}

impl Config {
    /// Defaults for the LLT policy (64 B blocks; the queue capacity is
    /// fixed at 64 entries by [`crate::policy::llt::LltCore`]'s `Queue<64>`).
    pub fn llt_defaults() -> Self { Self::common_defaults() }

    /// Defaults for the VG policy (4 KiB blocks; the queue capacity is
    /// fixed at 4096 entries by [`crate::policy::vg::VgCore`]'s
    /// `Queue<4096>`).
    pub fn vg_defaults() -> Self { Self::common_defaults() }

    /// Defaults for the MP policy (2 KiB segments; the queue capacity is
    /// fixed at 4096 entries by [`crate::policy::mp::MpCore`]'s
    /// `Queue<4096>`).
    pub fn mp_defaults() -> Self { Self::common_defaults() }

    fn common_defaults() -> Self {
        Self {
            hotness_threshold: 4,
            interval_for_decrement: 1_000_000,
            queue_busy_degree_threshold: 0.8,
            remapping_location_width_bits: 3,
            group_size: 5,
            ignore_writeback: false,
            ignore_writes: false,
            colocated: false,
            vg: VgConfig::default(),
            mp: MpConfig::default(),
        }
    }
}

impl Default for Config {
    fn default() -> Self { Self::common_defaults() }
}

// SPDX-License-Identifier: Apache-2.0
// Copyright © 2024 The Hymem Authors

//! The three conforming policies and the enum that dispatches between them.
//!
//! The original source intermixes LLT, VG, and MP behind a single class name
//! selected by preprocessor switches; here they are three ordinary modules
//! behind a shared surface, and `Core` dispatches to whichever one the
//! caller constructed. There is no `dyn Trait` object: a single simulation
//! run is always exactly one policy, decided at construction, so there is
//! nothing to gain from indirection that an `enum` match doesn't already
//! give.

pub mod llt;
pub mod mp;
pub mod vg;

use crate::error::ConfigError;
use crate::metrics::{Observer, Tier};
use crate::queue::RemappingRequest;

/// Read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpType {
    Read,
    Write,
}

/// Why the access happened, for the optional `ignore_writeback` /
/// `ignore_writes` hotness filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginTag {
    Load,
    Rfo,
    Writeback,
    Prefetch,
}

/// One memory request as seen by `track`/`translate`.
#[derive(Debug, Clone, Copy)]
pub struct AccessPacket {
    pub address: u64,
    pub op: OpType,
    pub origin: Option<OriginTag>,
    /// `h_address` is filled in by `translate`; `0` until then.
    pub h_address: u64,
}

impl AccessPacket {
    pub fn new(address: u64, op: OpType) -> Self {
        Self { address, op, origin: None, h_address: 0 }
    }

    pub fn with_origin(address: u64, op: OpType, origin: OriginTag) -> Self {
        Self { address, op, origin: Some(origin), h_address: 0 }
    }
}

/// Whether an access should be excluded from hotness accounting, per the
/// `ignore_writeback`/`ignore_writes` config toggles.
#[inline]
pub(crate) fn should_ignore(
    op: OpType,
    origin: Option<OriginTag>,
    ignore_writeback: bool,
    ignore_writes: bool,
) -> bool {
    if ignore_writes && op == OpType::Write {
        return true;
    }
    if ignore_writeback && matches!(origin, Some(OriginTag::Writeback)) {
        return true;
    }
    false
}

/// The operations every policy conforms to. `Core` forwards to whichever
/// variant a simulation run was built with.
pub trait Policy {
    /// Update hotness, and possibly enqueue a remapping request. Returns
    /// `false` only on an out-of-range address.
    fn track(&mut self, packet: &AccessPacket, busy_degree: f32, obs: &mut dyn Observer) -> bool;

    /// Compute `h_address` for `packet.address` given the current metadata.
    fn translate(&self, address: u64) -> u64;

    /// Peek the oldest pending request without removing it.
    fn issue(&self) -> Option<RemappingRequest>;

    /// Pop the oldest pending request and apply it to the metadata. Fatal if
    /// the queue is empty.
    fn finish(&mut self, obs: &mut dyn Observer) -> bool;

    /// Advance the cycle counter; runs decay (and, for MP, the epoch
    /// boundary) when due.
    fn tick(&mut self, obs: &mut dyn Observer);

    /// Current queue congestion counter (rejected-enqueue count).
    fn congestion(&self) -> u64;
}

/// Which tier `h_address` currently resides in, derived from its
/// `fast_memory_capacity`-relative position. Shared by every policy's
/// `translate` callers that need to report [`Tier`] to an observer.
#[inline]
pub(crate) fn tier_of(h_address: u64, fast_memory_capacity: u64) -> Tier {
    if h_address < fast_memory_capacity {
        Tier::Fast
    } else {
        Tier::Slow
    }
}

/// The three interchangeable policies, selected once at construction.
pub enum Core {
    Llt(llt::LltCore),
    Vg(vg::VgCore),
    Mp(mp::MpCore),
}

impl Core {
    pub fn new_llt(
        total_capacity_bytes: u64,
        fast_memory_capacity_bytes: u64,
        config: crate::config::Config,
    ) -> Result<Self, ConfigError> {
        Ok(Core::Llt(llt::LltCore::new(total_capacity_bytes, fast_memory_capacity_bytes, config)?))
    }

    pub fn new_vg(
        total_capacity_bytes: u64,
        fast_memory_capacity_bytes: u64,
        config: crate::config::Config,
    ) -> Result<Self, ConfigError> {
        Ok(Core::Vg(vg::VgCore::new(total_capacity_bytes, fast_memory_capacity_bytes, config)?))
    }

    pub fn new_mp(
        total_capacity_bytes: u64,
        fast_memory_capacity_bytes: u64,
        config: crate::config::Config,
    ) -> Result<Self, ConfigError> {
        Ok(Core::Mp(mp::MpCore::new(total_capacity_bytes, fast_memory_capacity_bytes, config)?))
    }

    pub fn track(&mut self, packet: &AccessPacket, busy_degree: f32, obs: &mut dyn Observer) -> bool {
        match self {
            Core::Llt(c) => c.track(packet, busy_degree, obs),
            Core::Vg(c) => c.track(packet, busy_degree, obs),
            Core::Mp(c) => c.track(packet, busy_degree, obs),
        }
    }

    pub fn translate(&self, address: u64) -> u64 {
        match self {
            Core::Llt(c) => c.translate(address),
            Core::Vg(c) => c.translate(address),
            Core::Mp(c) => c.translate(address),
        }
    }

    pub fn issue(&self) -> Option<RemappingRequest> {
        match self {
            Core::Llt(c) => c.issue(),
            Core::Vg(c) => c.issue(),
            Core::Mp(c) => c.issue(),
        }
    }

    pub fn finish(&mut self, obs: &mut dyn Observer) -> bool {
        match self {
            Core::Llt(c) => c.finish(obs),
            Core::Vg(c) => c.finish(obs),
            Core::Mp(c) => c.finish(obs),
        }
    }

    pub fn tick(&mut self, obs: &mut dyn Observer) {
        match self {
            Core::Llt(c) => c.tick(obs),
            Core::Vg(c) => c.tick(obs),
            Core::Mp(c) => c.tick(obs),
        }
    }

    pub fn congestion(&self) -> u64 {
        match self {
            Core::Llt(c) => c.congestion(),
            Core::Vg(c) => c.congestion(),
            Core::Mp(c) => c.congestion(),
        }
    }

    /// Colocated-LLT only: mark the FM-side access of a pending read
    /// complete. Fatal (in debug builds) if called against a non-LLT core or
    /// an `h_addr` with no pending entry; returns `false` in release builds.
    pub fn finish_fm_access_read(&mut self, h_addr: u64) -> bool {
        match self {
            Core::Llt(c) => c.finish_fm_access_read(h_addr),
            _ => {
                debug_assert!(false, "finish_fm_access_read is only meaningful for the LLT policy");
                false
            }
        }
    }

    /// Colocated-LLT only: mark the FM-side access of a pending write
    /// complete.
    pub fn finish_fm_access_write(&mut self, h_addr: u64) -> bool {
        match self {
            Core::Llt(c) => c.finish_fm_access_write(h_addr),
            _ => {
                debug_assert!(false, "finish_fm_access_write is only meaningful for the LLT policy");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignore_writes_filters_writes_regardless_of_origin() {
        assert!(should_ignore(OpType::Write, None, false, true));
        assert!(!should_ignore(OpType::Read, None, false, true));
    }

    #[test]
    fn ignore_writeback_filters_only_writeback_origin() {
        assert!(should_ignore(OpType::Write, Some(OriginTag::Writeback), true, false));
        assert!(!should_ignore(OpType::Write, Some(OriginTag::Rfo), true, false));
    }

    #[test]
    fn tier_of_splits_at_fast_capacity() {
        assert_eq!(tier_of(0, 1024), Tier::Fast);
        assert_eq!(tier_of(1023, 1024), Tier::Fast);
        assert_eq!(tier_of(1024, 1024), Tier::Slow);
    }
}

// SPDX-License-Identifier: Apache-2.0
// Copyright © 2024 The Hymem Authors

//! The bounded remapping request queue. Capacity is a compile-time const
//! generic, mirroring the teacher's virtio ring buffers (`QUEUE_SIZE`-bounded
//! `Desc`/`AvailRing`/`UsedRing` arrays): a policy's queue depth is a property
//! of the policy, not something chosen at runtime.

use heapless::Deque;

/// Which table entry `fm_location`/`sm_location` refer to.
///
/// For LLT, both fields are *array indices* into the congruence group's
/// [`crate::policy::llt::LltEntry`] (the position the FM-resident block and
/// the SM-resident block currently occupy), not location values. For MP,
/// there is no table to index into; `fm_location`/`sm_location` are instead
/// used as plain direction markers (`0` = fast-memory side, `1` =
/// slow-memory side) to say which half of a swap pair a request concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemappingRequest {
    /// Congruence-group / set index the request applies to. Unused (`0`)
    /// for MP, which has no congruence groups; see [`Self::segment_swap`].
    pub set_index: u64,
    /// See the type-level doc comment.
    pub fm_location: u8,
    /// See the type-level doc comment.
    pub sm_location: u8,
    /// Number of cache lines this swap covers: 1 for LLT, variable for VG,
    /// 32 (2 KiB / 64 B) for MP.
    pub size_in_lines: u16,
    /// Hardware address of the fast-memory side of the swap. `0` (unused)
    /// for LLT/VG, which resolve the swapped addresses from `set_index` and
    /// their own metadata instead.
    pub address_in_fm: u64,
    /// Hardware address of the slow-memory side of the swap. `0` (unused)
    /// for LLT/VG.
    pub address_in_sm: u64,
}

impl RemappingRequest {
    /// A congruence-group swap (LLT/VG): identified by `set_index` plus the
    /// table positions/direction markers in `fm_location`/`sm_location`.
    pub fn new(set_index: u64, fm_location: u8, sm_location: u8, size_in_lines: u16) -> Self {
        Self { set_index, fm_location, sm_location, size_in_lines, address_in_fm: 0, address_in_sm: 0 }
    }

    /// An MP segment swap: identified directly by the two hardware
    /// addresses being exchanged, since MP has no congruence-group table to
    /// index into. `fm_location`/`sm_location` carry the direction markers
    /// (`0`/`1`) required by the invariant that exactly one of them is `0`.
    pub fn segment_swap(address_in_fm: u64, address_in_sm: u64, size_in_lines: u16) -> Self {
        Self { set_index: 0, fm_location: 0, sm_location: 1, size_in_lines, address_in_fm, address_in_sm }
    }
}

/// A fixed-capacity FIFO of pending swaps, draining at a bounded rate per
/// simulated cycle (see `drain` callers in each policy's `tick`).
#[derive(Debug)]
pub struct Queue<const N: usize> {
    inner: Deque<RemappingRequest, N>,
}

impl<const N: usize> Queue<N> {
    pub fn new() -> Self { Self { inner: Deque::new() } }

    #[inline]
    pub fn len(&self) -> usize { self.inner.len() }

    #[inline]
    pub fn is_empty(&self) -> bool { self.inner.is_empty() }

    #[inline]
    pub fn capacity(&self) -> usize { N }

    /// Fraction of the queue currently occupied, for comparison against
    /// `queue_busy_degree_threshold`.
    #[inline]
    pub fn busy_degree(&self) -> f32 { self.inner.len() as f32 / N as f32 }

    /// Enqueue a request, silently dropping it if the set it targets is
    /// already represented in the queue (a pending swap for that set makes a
    /// second one redundant until the first drains) or if the queue is full.
    pub fn enqueue_deduped(&mut self, req: RemappingRequest) -> bool {
        if self.inner.iter().any(|r| r.set_index == req.set_index) {
            return false;
        }
        self.inner.push_back(req).is_ok()
    }

    pub fn dequeue(&mut self) -> Option<RemappingRequest> { self.inner.pop_front() }

    pub fn iter(&self) -> impl Iterator<Item = &RemappingRequest> { self.inner.iter() }

    /// Enqueue a request, but if one already targeting `set_index` with
    /// fields matching `same_direction` is pending, upgrade its
    /// `size_in_lines` to `max(existing, req)` instead of pushing a second
    /// one. Models the VG merge rules from Section 4.6: a second migration
    /// or restoration touching the same set and direction widens the
    /// in-flight request rather than queuing redundant work.
    ///
    /// Returns `true` if the queue now reflects `req` (either merged or
    /// freshly pushed), `false` if it was dropped (full, or a conflicting
    /// request for the same set is already pending).
    pub fn enqueue_or_merge_size(
        &mut self,
        req: RemappingRequest,
        same_direction: impl Fn(&RemappingRequest, &RemappingRequest) -> bool,
    ) -> bool {
        if let Some(existing) = self.inner.iter_mut().find(|r| r.set_index == req.set_index) {
            if same_direction(existing, &req) {
                existing.size_in_lines = existing.size_in_lines.max(req.size_in_lines);
                return true;
            }
            return false;
        }
        self.inner.push_back(req).is_ok()
    }

    /// MP variant of [`Self::enqueue_deduped`]: dedups by the physical
    /// (slow-memory-side) address rather than `set_index`, since MP has no
    /// congruence groups to key on.
    pub fn enqueue_segment_swap_deduped(&mut self, req: RemappingRequest) -> bool {
        if self.inner.iter().any(|r| r.address_in_sm == req.address_in_sm) {
            return false;
        }
        self.inner.push_back(req).is_ok()
    }
}

impl<const N: usize> Default for Queue<N> {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_by_set_index() {
        let mut q: Queue<4> = Queue::new();
        assert!(q.enqueue_deduped(RemappingRequest::new(1, 0, 1, 1)));
        assert!(!q.enqueue_deduped(RemappingRequest::new(1, 2, 3, 1)));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn respects_capacity() {
        let mut q: Queue<2> = Queue::new();
        assert!(q.enqueue_deduped(RemappingRequest::new(1, 0, 1, 1)));
        assert!(q.enqueue_deduped(RemappingRequest::new(2, 0, 1, 1)));
        assert!(!q.enqueue_deduped(RemappingRequest::new(3, 0, 1, 1)));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn fifo_order() {
        let mut q: Queue<4> = Queue::new();
        q.enqueue_deduped(RemappingRequest::new(1, 0, 1, 1));
        q.enqueue_deduped(RemappingRequest::new(2, 0, 1, 1));
        assert_eq!(q.dequeue().unwrap().set_index, 1);
        assert_eq!(q.dequeue().unwrap().set_index, 2);
        assert!(q.dequeue().is_none());
    }

    #[test]
    fn busy_degree_tracks_occupancy() {
        let mut q: Queue<4> = Queue::new();
        assert_eq!(q.busy_degree(), 0.0);
        q.enqueue_deduped(RemappingRequest::new(1, 0, 1, 1));
        assert_eq!(q.busy_degree(), 0.25);
    }

    #[test]
    fn enqueue_or_merge_size_widens_existing_request() {
        let mut q: Queue<4> = Queue::new();
        assert!(q.enqueue_or_merge_size(RemappingRequest::new(1, 0, 3, 4), |_, _| true));
        assert!(q.enqueue_or_merge_size(RemappingRequest::new(1, 0, 3, 9), |_, _| true));
        assert_eq!(q.len(), 1);
        assert_eq!(q.dequeue().unwrap().size_in_lines, 9);
    }

    #[test]
    fn enqueue_or_merge_size_rejects_conflicting_direction() {
        let mut q: Queue<4> = Queue::new();
        assert!(q.enqueue_or_merge_size(RemappingRequest::new(1, 0, 3, 4), |_, _| true));
        assert!(!q.enqueue_or_merge_size(RemappingRequest::new(1, 3, 0, 4), |a, b| {
            a.fm_location == b.fm_location
        }));
    }
}

// SPDX-License-Identifier: Apache-2.0
// Copyright © 2024 The Hymem Authors

//! OS-transparent hybrid (fast-memory/slow-memory) remapping core for a
//! cycle-level memory-system simulator.
//!
//! This crate models the metadata side of a two-tier main memory: a small
//! fast tier (FM) and a larger slow tier (SM) sharing one physical address
//! space, with no operating-system cooperation. It decides which regions
//! should reside in FM and keeps a hardware-style translation table coherent
//! with in-flight swaps. Three interchangeable policies are implemented,
//! selected at construction via [`Core::new_llt`]/[`Core::new_vg`]/
//! [`Core::new_mp`]:
//!
//! - **LLT** — line-granularity congruence-group location table.
//! - **VG** — variable-granularity placement within a 4 KiB group.
//! - **MP** — epoch-based bulk swap of 2 KiB segments.
//!
//! This crate owns no threads and performs no I/O: the trace driver that
//! issues [`AccessPacket`]s, the DRAM/PCM timing model, and configuration
//! loading all live outside it. A single-threaded cooperative scheduling
//! model is assumed (see the crate's design notes); callers driving multiple
//! memory channels concurrently must serialise their calls into one `Core`.
//!
//! ```no_run
//! use hymem_core::{Config, Core, AccessPacket, OpType};
//! use hymem_core::metrics::Stats;
//!
//! let mut core = Core::new_llt(16 * 1024 * 1024, 4 * 1024 * 1024, Config::llt_defaults())?;
//! let mut stats = Stats::new();
//! let packet = AccessPacket::new(0x1000, OpType::Read);
//! core.track(&packet, 0.0, &mut stats);
//! let _h_address = core.translate(packet.address);
//! core.tick(&mut stats);
//! # Ok::<(), hymem_core::ConfigError>(())
//! ```

pub mod addr;
pub mod config;
pub mod error;
pub mod hotness;
pub mod metrics;
pub mod policy;
pub mod queue;

pub use config::{Config, MpConfig, VgConfig};
pub use error::ConfigError;
pub use policy::{AccessPacket, Core, OpType, OriginTag, Policy};
pub use queue::RemappingRequest;

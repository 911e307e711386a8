//! # healthwatch-types
//!
//! Core types for process health monitoring. This crate defines the data model
//! that metric collectors produce and that the healthwatch engine consumes:
//! per-tick metric fragments, timestamped snapshots, and typed accessors for
//! the individual numeric fields inside them.
//!
//! ## Design Goals
//!
//! - **Zero required dependencies**: Core types work without any serialization framework
//! - **Optional serialization**: Enable the `serde` feature to (de)serialize snapshots
//! - **Typed field access**: [`MetricField`] replaces stringly dotted paths, while
//!   still parsing them for configuration and interop
//! - **Versioned schema**: Snapshots include version info for forward compatibility
//!
//! ## Features
//!
//! - `std` (default): Standard library support (wall-clock timestamps)
//! - `serde`: JSON/TOML/etc. serialization via serde
//!
//! ## Example
//!
//! ```rust
//! use healthwatch_types::{EventLoopUtilization, MetricField, Metrics, Snapshot};
//!
//! let metrics = Metrics::builder()
//!     .event_loop_utilization(EventLoopUtilization {
//!         idle: 0.2,
//!         active: 0.8,
//!         utilization: 0.8,
//!     })
//!     .custom("queue.depth", 12.0)
//!     .build();
//!
//! let snapshot = Snapshot::new(1_703_160_000_000, metrics);
//! assert_eq!(snapshot.value(&MetricField::EventLoopUtilization), Some(0.8));
//!
//! let field: MetricField = "eventLoopUtilization.utilization".parse().unwrap();
//! assert_eq!(field, MetricField::EventLoopUtilization);
//! ```
//!
//! ## Schema Version
//!
//! The current schema version is **1**. The version is included in serialized
//! snapshots to allow consumers to handle format evolution gracefully.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

mod field;
mod histogram;
mod metrics;
mod snapshot;
mod version;

pub use field::*;
pub use histogram::*;
pub use metrics::*;
pub use snapshot::*;
pub use version::*;

/// Current schema version.
///
/// Increment this when making breaking changes to the snapshot format.
/// Consumers should check this version and handle older formats appropriately.
pub const SCHEMA_VERSION: u32 = 1;

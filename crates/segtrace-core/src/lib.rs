//! Core types, geometry, and configuration for segtrace.
//!
//! This crate provides the host-side pieces of the segment intersection engine:
//! - Point and segment sets, plus their storage-buffer record layouts
//! - AABB derivation for base segments
//! - An exact CPU reference for segment-segment intersection
//! - Scene files and engine configuration
//! - Common error types

pub mod aabb;
pub mod config;
pub mod error;
pub mod reference;
pub mod scene;
pub mod types;

pub use aabb::{segment_aabbs, AabbPositions};
pub use config::{EngineConfig, EntryPoints, ShaderConfig};
pub use error::{Error, Result};
pub use scene::Scene;
pub use types::{GpuSegment, HitRecord, Point2, QueryPushConstants, Segment, SegmentSet};

/// Engine-wide constants
pub mod constants {
    /// Default capacity of the device results buffer, in records
    pub const DEFAULT_RESULT_CAPACITY: u32 = 1024;
    /// Default AABB half-thickness added on every axis
    pub const DEFAULT_AABB_EPSILON: f32 = 1e-5;
}

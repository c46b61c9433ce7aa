//! Hardware ray tracing engine for batch segment intersection.
//!
//! Base segments become procedural AABBs in a bottom-level acceleration structure
//! instanced once in a top-level structure. Each query segment is traced as one ray;
//! the intersection stage runs the exact segment test and the any-hit stage appends a
//! [`segtrace_core::HitRecord`] through an atomic counter.
//!
//! ```no_run
//! use std::sync::Arc;
//! use segtrace_core::{EngineConfig, Scene};
//! use segtrace_gpu::GpuContextBuilder;
//! use segtrace_rt::SegmentIntersector;
//! use segtrace_shaders::ShaderSet;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::default().with_shader_dir("shaders/spv");
//! let context = Arc::new(GpuContextBuilder::new().build()?);
//! let shaders = ShaderSet::load_dir(&config.shaders.dir, &config.shaders.entry_points)?;
//! let mut engine = SegmentIntersector::new(context, &shaders, config)?;
//!
//! let scene = Scene::demo();
//! let outcome = engine.query(&scene.query, &scene.base)?;
//! println!("HitCount = {}", outcome.reported_count);
//! # Ok(())
//! # }
//! ```

pub mod acceleration;
pub mod bindings;
pub mod collector;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod sbt;

pub use acceleration::{AccelerationStructure, SceneAccelerationStructure, SegmentBlas, Tlas};
pub use collector::QueryOutcome;
pub use engine::SegmentIntersector;
pub use error::{EngineError, Result};
pub use pipeline::RayTracePipeline;
pub use sbt::{SbtLayout, ShaderBindingTable};

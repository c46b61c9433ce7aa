//! Vulkan bootstrap layer for segtrace.
//!
//! This crate provides:
//! - Compute-only instance and device creation with ray tracing extensions
//! - Ray tracing capability negotiation
//! - Memory allocation via gpu-allocator, with owned buffers
//! - Command pool, fence, and descriptor helpers
//! - Completion-scoped command submission

pub mod capabilities;
pub mod command;
pub mod context;
pub mod descriptors;
pub mod error;
pub mod instance;
pub mod memory;
pub mod submission;
pub mod sync;

pub use capabilities::{GpuCapabilities, GpuVendor, RayTracingCapabilities, RayTracingProperties};
pub use command::CommandPool;
pub use context::{GpuContext, GpuContextBuilder};
pub use descriptors::{
    write_acceleration_structure, write_storage_buffer, DescriptorPool, DescriptorSetLayoutBuilder,
};
pub use error::{GpuError, Result, VkResultExt};
pub use memory::{align_up, GpuAllocator, GpuBuffer};
pub use submission::PendingSubmission;
pub use sync::{create_fence, wait_for_fence};

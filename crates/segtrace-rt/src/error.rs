//! Engine error types.

use segtrace_gpu::GpuError;
use segtrace_shaders::ShaderError;
use thiserror::Error;

/// Errors from building or running the intersection engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Device, memory, or Vulkan call failure.
    #[error(transparent)]
    Gpu(#[from] GpuError),

    /// Geometry or configuration error.
    #[error(transparent)]
    Core(#[from] segtrace_core::Error),

    /// Shader stage loading failure.
    #[error(transparent)]
    Shader(#[from] ShaderError),

    /// Query input rejected before any device work.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, EngineError>;

//! GPU error types.

use ash::vk;
use thiserror::Error;

/// GPU-related errors.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// Vulkan error with the failing call.
    #[error("{call} failed: {result}")]
    VulkanCall {
        call: &'static str,
        result: vk::Result,
    },

    /// The Vulkan loader could not be opened.
    #[error("Failed to load Vulkan: {0}")]
    LoaderUnavailable(String),

    /// No suitable GPU found.
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// The selected GPU lacks required ray tracing features.
    #[error("Missing ray tracing capabilities on {device}: {}", .missing.join(", "))]
    MissingCapabilities {
        device: String,
        missing: Vec<String>,
    },

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Shader module creation failed.
    #[error("Shader module creation failed: {0}")]
    ShaderModule(String),

    /// Pipeline creation failed.
    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;

/// Attach the failing Vulkan call to a raw `vk::Result`.
pub trait VkResultExt<T> {
    fn context(self, call: &'static str) -> Result<T>;
}

impl<T> VkResultExt<T> for std::result::Result<T, vk::Result> {
    fn context(self, call: &'static str) -> Result<T> {
        self.map_err(|result| GpuError::VulkanCall { call, result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_context_in_message() {
        let err = Err::<(), _>(vk::Result::ERROR_DEVICE_LOST)
            .context("vkQueueSubmit")
            .unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("vkQueueSubmit failed"), "{message}");
    }

    #[test]
    fn missing_capabilities_lists_all() {
        let err = GpuError::MissingCapabilities {
            device: "Test GPU".to_string(),
            missing: vec!["rayTracingPipeline".to_string(), "accelerationStructure".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Missing ray tracing capabilities on Test GPU: rayTracingPipeline, accelerationStructure"
        );
    }
}

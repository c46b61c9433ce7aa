//! GPU capability detection.
//!
//! Ray tracing support is negotiated once per physical device. Every required piece is
//! reported by name so a failed check says exactly what is missing.

use crate::error::{GpuError, Result};
use ash::vk;
use std::collections::HashSet;
use std::ffi::CStr;

/// Device extensions the intersection pipeline cannot run without.
pub const REQUIRED_DEVICE_EXTENSIONS: [&CStr; 3] = [
    ash::khr::acceleration_structure::NAME,
    ash::khr::ray_tracing_pipeline::NAME,
    ash::khr::deferred_host_operations::NAME,
];

/// GPU vendor identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Other(u32),
}

impl GpuVendor {
    /// Identify vendor from PCI vendor ID.
    pub fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            other => Self::Other(other),
        }
    }
}

/// Ray tracing feature support of one device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RayTracingCapabilities {
    /// Device reports Vulkan 1.3 or newer.
    pub vulkan_1_3: bool,
    /// `rayTracingPipeline` feature.
    pub ray_tracing_pipeline: bool,
    /// `accelerationStructure` feature.
    pub acceleration_structure: bool,
    /// `bufferDeviceAddress` feature (Vulkan 1.2 core).
    pub buffer_device_address: bool,
    /// `synchronization2` feature (Vulkan 1.3 core).
    pub synchronization2: bool,
    /// Required device extensions the driver does not expose.
    pub missing_extensions: Vec<String>,
}

impl RayTracingCapabilities {
    /// Names of every unmet requirement, empty when the device is usable.
    pub fn missing(&self) -> Vec<String> {
        let mut missing = Vec::new();
        if !self.vulkan_1_3 {
            missing.push("Vulkan 1.3".to_string());
        }
        missing.extend(self.missing_extensions.iter().cloned());
        let features = [
            (self.ray_tracing_pipeline, "rayTracingPipeline"),
            (self.acceleration_structure, "accelerationStructure"),
            (self.buffer_device_address, "bufferDeviceAddress"),
            (self.synchronization2, "synchronization2"),
        ];
        missing.extend(
            features
                .iter()
                .filter(|(supported, _)| !supported)
                .map(|(_, name)| (*name).to_string()),
        );
        missing
    }

    /// Returns true if nothing is missing.
    pub fn is_supported(&self) -> bool {
        self.missing().is_empty()
    }

    /// Fail with [`GpuError::MissingCapabilities`] unless everything is present.
    pub fn require(&self, device_name: &str) -> Result<()> {
        let missing = self.missing();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(GpuError::MissingCapabilities {
                device: device_name.to_string(),
                missing,
            })
        }
    }
}

/// Ray tracing limits consumed by the shader binding table and the dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RayTracingProperties {
    /// Size of one shader group handle in bytes.
    pub shader_group_handle_size: u32,
    /// Required alignment of each handle within a record.
    pub shader_group_handle_alignment: u32,
    /// Required alignment of each SBT region start.
    pub shader_group_base_alignment: u32,
    /// Maximum ray recursion depth.
    pub max_ray_recursion_depth: u32,
    /// Maximum number of invocations in one trace dispatch.
    pub max_ray_dispatch_invocation_count: u32,
    /// Required alignment of acceleration structure scratch addresses.
    pub min_scratch_offset_alignment: u32,
}

/// Detected GPU capabilities.
#[derive(Debug, Clone)]
pub struct GpuCapabilities {
    /// GPU vendor
    pub vendor: GpuVendor,
    /// Device name
    pub device_name: String,
    /// Device type (discrete, integrated, ...)
    pub device_type: vk::PhysicalDeviceType,
    /// Vulkan API version
    pub api_version: u32,
    /// Driver version
    pub driver_version: u32,
    /// Device-local memory in MB
    pub device_local_memory_mb: u64,

    pub ray_tracing: RayTracingCapabilities,
    pub ray_tracing_properties: RayTracingProperties,

    // Available extensions
    pub available_extensions: HashSet<String>,
}

impl GpuCapabilities {
    /// Query capabilities from a physical device.
    ///
    /// # Safety
    /// The instance and physical device must be valid.
    pub unsafe fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        let properties = instance.get_physical_device_properties(physical_device);
        let memory_properties = instance.get_physical_device_memory_properties(physical_device);

        let extensions = instance
            .enumerate_device_extension_properties(physical_device)
            .unwrap_or_default();

        let available_extensions: HashSet<String> = extensions
            .iter()
            .filter_map(|ext| ext.extension_name_as_c_str().ok())
            .filter_map(|name| name.to_str().ok().map(String::from))
            .collect();

        let device_name = properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let device_local_memory_mb: u64 = memory_properties
            .memory_heaps
            .iter()
            .take(memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size / (1024 * 1024))
            .sum();

        let api_version = properties.api_version;
        let vulkan_1_3 = vk::api_version_major(api_version) > 1
            || (vk::api_version_major(api_version) == 1 && vk::api_version_minor(api_version) >= 3);

        let missing_extensions: Vec<String> = REQUIRED_DEVICE_EXTENSIONS
            .iter()
            .filter_map(|name| name.to_str().ok())
            .filter(|name| !available_extensions.contains(*name))
            .map(String::from)
            .collect();
        let has_extensions = missing_extensions.is_empty();

        let mut ray_tracing = RayTracingCapabilities {
            vulkan_1_3,
            missing_extensions,
            ..Default::default()
        };
        let mut ray_tracing_properties = RayTracingProperties::default();

        // Feature and property structs may only be chained when the device knows them.
        if vulkan_1_3 {
            let mut vulkan_1_2_features = vk::PhysicalDeviceVulkan12Features::default();
            let mut vulkan_1_3_features = vk::PhysicalDeviceVulkan13Features::default();
            let mut rt_features = vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::default();
            let mut as_features = vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default();
            {
                let mut features2 = vk::PhysicalDeviceFeatures2::default()
                    .push_next(&mut vulkan_1_2_features)
                    .push_next(&mut vulkan_1_3_features);
                if has_extensions {
                    features2 = features2
                        .push_next(&mut rt_features)
                        .push_next(&mut as_features);
                }
                instance.get_physical_device_features2(physical_device, &mut features2);
            }

            ray_tracing.buffer_device_address = vulkan_1_2_features.buffer_device_address == vk::TRUE;
            ray_tracing.synchronization2 = vulkan_1_3_features.synchronization2 == vk::TRUE;
            ray_tracing.ray_tracing_pipeline = rt_features.ray_tracing_pipeline == vk::TRUE;
            ray_tracing.acceleration_structure = as_features.acceleration_structure == vk::TRUE;

            if has_extensions {
                let mut rt_properties = vk::PhysicalDeviceRayTracingPipelinePropertiesKHR::default();
                let mut as_properties =
                    vk::PhysicalDeviceAccelerationStructurePropertiesKHR::default();
                {
                    let mut properties2 = vk::PhysicalDeviceProperties2::default()
                        .push_next(&mut rt_properties)
                        .push_next(&mut as_properties);
                    instance.get_physical_device_properties2(physical_device, &mut properties2);
                }

                ray_tracing_properties = RayTracingProperties {
                    shader_group_handle_size: rt_properties.shader_group_handle_size,
                    shader_group_handle_alignment: rt_properties.shader_group_handle_alignment,
                    shader_group_base_alignment: rt_properties.shader_group_base_alignment,
                    max_ray_recursion_depth: rt_properties.max_ray_recursion_depth,
                    max_ray_dispatch_invocation_count: rt_properties
                        .max_ray_dispatch_invocation_count,
                    min_scratch_offset_alignment: as_properties
                        .min_acceleration_structure_scratch_offset_alignment,
                };
            }
        }

        Self {
            vendor: GpuVendor::from_vendor_id(properties.vendor_id),
            device_name,
            device_type: properties.device_type,
            api_version,
            driver_version: properties.driver_version,
            device_local_memory_mb,
            ray_tracing,
            ray_tracing_properties,
            available_extensions,
        }
    }

    /// Fail unless the device can run the ray tracing pipeline.
    pub fn require_ray_tracing(&self) -> Result<()> {
        self.ray_tracing.require(&self.device_name)
    }

    /// Get a human-readable summary of capabilities.
    pub fn summary(&self) -> String {
        format!(
            "{} ({:?}) - Vulkan {}.{}.{} - {} MB VRAM - ray tracing: {}",
            self.device_name,
            self.vendor,
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version),
            self.device_local_memory_mb,
            if self.ray_tracing.is_supported() {
                "yes"
            } else {
                "no"
            },
        )
    }
}

//! GPU context management.

use crate::capabilities::{GpuCapabilities, RayTracingProperties, REQUIRED_DEVICE_EXTENSIONS};
use crate::error::{GpuError, Result, VkResultExt};
use crate::instance::{create_instance, select_physical_device};
use crate::memory::GpuAllocator;
use ash::vk;
use std::sync::Arc;

/// Headless Vulkan context with ray tracing enabled.
pub struct GpuContext {
    // Entry must be kept alive for the lifetime of the context
    #[allow(dead_code)]
    entry: ash::Entry,
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: Arc<ash::Device>,
    capabilities: GpuCapabilities,
    allocator: GpuAllocator,

    compute_queue_family: u32,
    compute_queue: vk::Queue,

    acceleration_structure: ash::khr::acceleration_structure::Device,
    ray_tracing_pipeline: ash::khr::ray_tracing_pipeline::Device,
}

impl GpuContext {
    /// Get the Vulkan device handle.
    pub fn device(&self) -> &Arc<ash::Device> {
        &self.device
    }

    /// Get the Vulkan instance handle.
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get the physical device handle.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Get GPU capabilities.
    pub fn capabilities(&self) -> &GpuCapabilities {
        &self.capabilities
    }

    /// Ray tracing limits of the selected device.
    pub fn ray_tracing_properties(&self) -> &RayTracingProperties {
        &self.capabilities.ray_tracing_properties
    }

    /// Get the compute queue.
    pub fn compute_queue(&self) -> vk::Queue {
        self.compute_queue
    }

    /// Get the compute queue family index.
    pub fn compute_queue_family(&self) -> u32 {
        self.compute_queue_family
    }

    /// Get a handle to the GPU allocator.
    pub fn allocator(&self) -> &GpuAllocator {
        &self.allocator
    }

    /// `VK_KHR_acceleration_structure` entry points.
    pub fn acceleration_structure_loader(&self) -> &ash::khr::acceleration_structure::Device {
        &self.acceleration_structure
    }

    /// `VK_KHR_ray_tracing_pipeline` entry points.
    pub fn ray_tracing_pipeline_loader(&self) -> &ash::khr::ray_tracing_pipeline::Device {
        &self.ray_tracing_pipeline
    }

    /// Wait for device to be idle.
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.context("vkDeviceWaitIdle")
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            // Shutdown allocator BEFORE destroying device
            self.allocator.shutdown();

            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

/// Builder for creating a GPU context.
pub struct GpuContextBuilder {
    app_name: String,
    enable_validation: bool,
}

impl Default for GpuContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "segtrace".to_string(),
            enable_validation: cfg!(debug_assertions),
        }
    }
}

impl GpuContextBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Build the GPU context.
    ///
    /// Fails with [`GpuError::MissingCapabilities`] before any resource is allocated
    /// when no device supports the ray tracing pipeline.
    pub fn build(self) -> Result<GpuContext> {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| GpuError::LoaderUnavailable(e.to_string()))?;

        let instance = unsafe { create_instance(&entry, &self.app_name, self.enable_validation) }?;

        let (physical_device, capabilities) = match unsafe { select_physical_device(&instance) } {
            Ok(selected) => selected,
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(e);
            }
        };

        tracing::info!("Selected GPU: {}", capabilities.summary());

        let compute_queue_family =
            match unsafe { find_compute_queue_family(&instance, physical_device) } {
                Ok(family) => family,
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            };

        let device = match unsafe { create_device(&instance, physical_device, compute_queue_family) }
        {
            Ok(device) => device,
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(e);
            }
        };
        let compute_queue = unsafe { device.get_device_queue(compute_queue_family, 0) };
        let device = Arc::new(device);

        let allocator =
            match unsafe { GpuAllocator::new(&instance, device.clone(), physical_device) } {
                Ok(allocator) => allocator,
                Err(e) => {
                    unsafe {
                        device.destroy_device(None);
                        instance.destroy_instance(None);
                    }
                    return Err(e);
                }
            };

        let acceleration_structure = ash::khr::acceleration_structure::Device::new(&instance, &device);
        let ray_tracing_pipeline = ash::khr::ray_tracing_pipeline::Device::new(&instance, &device);

        tracing::debug!(
            "Ray tracing properties: {:?}",
            capabilities.ray_tracing_properties
        );

        Ok(GpuContext {
            entry,
            instance,
            physical_device,
            device,
            capabilities,
            allocator,
            compute_queue_family,
            compute_queue,
            acceleration_structure,
            ray_tracing_pipeline,
        })
    }
}

/// Find a queue family with compute support, preferring one without graphics.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn find_compute_queue_family(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<u32> {
    let queue_families = instance.get_physical_device_queue_family_properties(physical_device);

    let compute = |graphics_allowed: bool| {
        queue_families.iter().position(|family| {
            family.queue_count > 0
                && family.queue_flags.contains(vk::QueueFlags::COMPUTE)
                && (graphics_allowed || !family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        })
    };

    compute(false)
        .or_else(|| compute(true))
        .map(|i| i as u32)
        .ok_or(GpuError::NoSuitableDevice)
}

/// Create the logical device with the ray tracing feature set.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    compute_queue_family: u32,
) -> Result<ash::Device> {
    let queue_priority = 1.0_f32;
    let queue_create_info = vk::DeviceQueueCreateInfo::default()
        .queue_family_index(compute_queue_family)
        .queue_priorities(std::slice::from_ref(&queue_priority));

    let extension_names: Vec<*const std::ffi::c_char> = REQUIRED_DEVICE_EXTENSIONS
        .iter()
        .map(|ext| ext.as_ptr())
        .collect();

    let mut vulkan_1_3_features = vk::PhysicalDeviceVulkan13Features::default().synchronization2(true);
    let mut vulkan_1_2_features =
        vk::PhysicalDeviceVulkan12Features::default().buffer_device_address(true);
    let mut rt_pipeline_features =
        vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::default().ray_tracing_pipeline(true);
    let mut as_features =
        vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default().acceleration_structure(true);

    let mut features2 = vk::PhysicalDeviceFeatures2::default()
        .push_next(&mut vulkan_1_3_features)
        .push_next(&mut vulkan_1_2_features)
        .push_next(&mut rt_pipeline_features)
        .push_next(&mut as_features);

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(std::slice::from_ref(&queue_create_info))
        .enabled_extension_names(&extension_names)
        .push_next(&mut features2);

    instance
        .create_device(physical_device, &device_create_info, None)
        .context("vkCreateDevice")
}

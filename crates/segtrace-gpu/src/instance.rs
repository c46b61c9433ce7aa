//! Vulkan instance creation and device selection.
//!
//! The engine runs headless, so the instance enables no surface extensions.

use crate::capabilities::GpuCapabilities;
use crate::error::{GpuError, Result, VkResultExt};
use ash::vk;
use std::ffi::{CStr, CString};

/// Validation layers to enable when requested.
pub fn validation_layers() -> Vec<&'static CStr> {
    vec![c"VK_LAYER_KHRONOS_validation"]
}

/// Instance extensions the headless engine needs.
fn instance_extensions() -> Vec<&'static CStr> {
    #[cfg(target_os = "macos")]
    {
        vec![ash::khr::portability_enumeration::NAME]
    }
    #[cfg(not(target_os = "macos"))]
    {
        Vec::new()
    }
}

/// Create a Vulkan instance.
///
/// Requested validation layers the loader does not know are skipped with a warning.
///
/// # Safety
/// The entry must be a valid Vulkan entry point.
pub unsafe fn create_instance(
    entry: &ash::Entry,
    app_name: &str,
    enable_validation: bool,
) -> Result<ash::Instance> {
    let app_name = CString::new(app_name)
        .map_err(|e| GpuError::InvalidState(format!("Invalid application name: {e}")))?;

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(c"segtrace")
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_3);

    let extension_names: Vec<*const std::ffi::c_char> =
        instance_extensions().iter().map(|ext| ext.as_ptr()).collect();

    let layers: Vec<&CStr> = if enable_validation {
        let available_layers = entry
            .enumerate_instance_layer_properties()
            .context("vkEnumerateInstanceLayerProperties")?;
        validation_layers()
            .into_iter()
            .filter(|layer| {
                let found = available_layers
                    .iter()
                    .any(|props| props.layer_name_as_c_str().ok() == Some(*layer));
                if !found {
                    tracing::warn!("Validation layer {:?} not available", layer);
                }
                found
            })
            .collect()
    } else {
        Vec::new()
    };

    let layer_names: Vec<*const std::ffi::c_char> = layers.iter().map(|l| l.as_ptr()).collect();

    #[cfg(target_os = "macos")]
    let create_flags = vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    #[cfg(not(target_os = "macos"))]
    let create_flags = vk::InstanceCreateFlags::empty();

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extension_names)
        .enabled_layer_names(&layer_names)
        .flags(create_flags);

    entry
        .create_instance(&create_info, None)
        .context("vkCreateInstance")
}

/// Select the best physical device that can run the ray tracing pipeline.
///
/// When devices exist but none qualifies, the error lists what the highest-ranked
/// device lacks.
///
/// # Safety
/// The instance must be valid.
pub unsafe fn select_physical_device(
    instance: &ash::Instance,
) -> Result<(vk::PhysicalDevice, GpuCapabilities)> {
    let devices = instance
        .enumerate_physical_devices()
        .context("vkEnumeratePhysicalDevices")?;

    if devices.is_empty() {
        return Err(GpuError::NoSuitableDevice);
    }

    let mut candidates: Vec<(vk::PhysicalDevice, GpuCapabilities)> = devices
        .into_iter()
        .map(|device| (device, GpuCapabilities::query(instance, device)))
        .collect();
    candidates.sort_by_key(|(_, caps)| std::cmp::Reverse(score_device(caps)));

    for (device, caps) in &candidates {
        tracing::debug!("Candidate GPU: {}", caps.summary());
        if caps.ray_tracing.is_supported() {
            return Ok((*device, caps.clone()));
        }
    }

    match candidates.first() {
        Some((_, best)) => {
            best.require_ray_tracing()?;
            Err(GpuError::NoSuitableDevice)
        }
        None => Err(GpuError::NoSuitableDevice),
    }
}

/// Score a physical device for selection.
fn score_device(caps: &GpuCapabilities) -> u64 {
    let type_score = match caps.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 50,
        _ => 0,
    };

    // +1 per GB of VRAM
    type_score + caps.device_local_memory_mb / 1024
}

//! Shader Binding Table (SBT) for the intersection pipeline.
//!
//! One record per group, each in its own region:
//! - Ray generation (group 0)
//! - Miss (group 1)
//! - Procedural hit group: intersection + any-hit + closest-hit (group 2)
//!
//! The callable region is empty.

use ash::vk;
use gpu_allocator::MemoryLocation;
use segtrace_gpu::{align_up, GpuAllocator, GpuBuffer, RayTracingProperties, Result, VkResultExt};

/// Number of shader groups in the pipeline.
pub const GROUP_COUNT: u32 = 3;

/// Byte layout of the table, derived from the device's handle properties.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SbtLayout {
    /// Bytes per group handle as returned by the driver.
    pub handle_size: u64,
    /// Handle size rounded up to the handle alignment.
    pub stride: u64,
    /// Size of each region, rounded up to the base alignment.
    pub region_size: u64,
    /// Base alignment every region start must satisfy.
    pub base_alignment: u64,
}

impl SbtLayout {
    /// Compute the layout for the given device properties.
    pub fn new(properties: &RayTracingProperties) -> Self {
        let handle_size = u64::from(properties.shader_group_handle_size);
        let stride = align_up(
            handle_size,
            u64::from(properties.shader_group_handle_alignment),
        );
        let base_alignment = u64::from(properties.shader_group_base_alignment);

        Self {
            handle_size,
            stride,
            region_size: align_up(stride, base_alignment),
            base_alignment,
        }
    }

    /// Offset of the miss record.
    pub const fn miss_offset(&self) -> u64 {
        self.region_size
    }

    /// Offset of the hit group record.
    pub const fn hit_offset(&self) -> u64 {
        self.region_size * 2
    }

    /// Bytes covered by the three regions.
    pub const fn total_size(&self) -> u64 {
        self.region_size * GROUP_COUNT as u64
    }

    /// Offset of each group's record, in group order.
    pub const fn record_offsets(&self) -> [u64; GROUP_COUNT as usize] {
        [0, self.miss_offset(), self.hit_offset()]
    }

    /// Regions for `vkCmdTraceRaysKHR` given the table's aligned base address.
    pub fn regions(&self, base_address: vk::DeviceAddress) -> SbtRegions {
        // The raygen region size must equal its stride.
        let raygen = vk::StridedDeviceAddressRegionKHR {
            device_address: base_address,
            stride: self.stride,
            size: self.stride,
        };
        let miss = vk::StridedDeviceAddressRegionKHR {
            device_address: base_address + self.miss_offset(),
            stride: self.stride,
            size: self.region_size,
        };
        let hit = vk::StridedDeviceAddressRegionKHR {
            device_address: base_address + self.hit_offset(),
            stride: self.stride,
            size: self.region_size,
        };

        SbtRegions {
            raygen,
            miss,
            hit,
            callable: vk::StridedDeviceAddressRegionKHR::default(),
        }
    }
}

/// Device address regions passed to the trace command.
#[derive(Clone, Copy, Debug)]
pub struct SbtRegions {
    pub raygen: vk::StridedDeviceAddressRegionKHR,
    pub miss: vk::StridedDeviceAddressRegionKHR,
    pub hit: vk::StridedDeviceAddressRegionKHR,
    pub callable: vk::StridedDeviceAddressRegionKHR,
}

/// Shader Binding Table for the intersection pipeline.
pub struct ShaderBindingTable {
    buffer: GpuBuffer,
    layout: SbtLayout,
    regions: SbtRegions,
}

impl ShaderBindingTable {
    /// Fetch the group handles of `pipeline` and write them into a new table.
    ///
    /// # Safety
    /// The pipeline must be a ray tracing pipeline with [`GROUP_COUNT`] groups,
    /// created on the allocator's device.
    pub unsafe fn new(
        rt_loader: &ash::khr::ray_tracing_pipeline::Device,
        allocator: &GpuAllocator,
        pipeline: vk::Pipeline,
        properties: &RayTracingProperties,
    ) -> Result<Self> {
        let layout = SbtLayout::new(properties);
        let handle_size = layout.handle_size as usize;

        let handles = rt_loader
            .get_ray_tracing_shader_group_handles(
                pipeline,
                0,
                GROUP_COUNT,
                handle_size * GROUP_COUNT as usize,
            )
            .context("vkGetRayTracingShaderGroupHandlesKHR")?;

        // Over-allocate so the start can be moved up to the base alignment.
        let mut buffer = allocator.create_buffer(
            layout.total_size() + layout.base_alignment,
            vk::BufferUsageFlags::SHADER_BINDING_TABLE_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryLocation::CpuToGpu,
            "shader_binding_table",
        )?;

        let base_address = buffer.aligned_address(layout.base_alignment);
        let base_offset = base_address - buffer.device_address();

        for (handle, offset) in handles
            .chunks_exact(handle_size)
            .zip(layout.record_offsets())
        {
            buffer.write_bytes(base_offset + offset, handle)?;
        }

        let regions = layout.regions(base_address);
        tracing::debug!(
            "SBT: stride {}, region {}, {} bytes",
            layout.stride,
            layout.region_size,
            buffer.size()
        );

        Ok(Self {
            buffer,
            layout,
            regions,
        })
    }

    /// Regions for the trace command.
    pub fn regions(&self) -> &SbtRegions {
        &self.regions
    }

    /// The table layout.
    pub fn layout(&self) -> &SbtLayout {
        &self.layout
    }

    /// Backing buffer.
    pub fn buffer(&self) -> &GpuBuffer {
        &self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn properties(handle_size: u32, handle_alignment: u32, base_alignment: u32) -> RayTracingProperties {
        RayTracingProperties {
            shader_group_handle_size: handle_size,
            shader_group_handle_alignment: handle_alignment,
            shader_group_base_alignment: base_alignment,
            ..RayTracingProperties::default()
        }
    }

    #[test]
    fn nvidia_layout() {
        let layout = SbtLayout::new(&properties(32, 32, 64));
        assert_eq!(layout.stride, 32);
        assert_eq!(layout.region_size, 64);
        assert_eq!(layout.miss_offset(), 64);
        assert_eq!(layout.hit_offset(), 128);
        assert_eq!(layout.total_size(), 192);
    }

    #[test]
    fn stride_rounds_to_handle_alignment() {
        let layout = SbtLayout::new(&properties(20, 16, 64));
        assert_eq!(layout.stride, 32);
        assert_eq!(layout.region_size, 64);
    }

    #[test]
    fn region_equal_to_base_alignment() {
        let layout = SbtLayout::new(&properties(32, 32, 32));
        assert_eq!(layout.region_size, 32);
        assert_eq!(layout.record_offsets(), [0, 32, 64]);
    }

    #[test]
    fn regions_follow_base_address() {
        let layout = SbtLayout::new(&properties(32, 32, 64));
        let regions = layout.regions(0x1000);

        assert_eq!(regions.raygen.device_address, 0x1000);
        assert_eq!(regions.raygen.size, regions.raygen.stride);
        assert_eq!(regions.miss.device_address, 0x1040);
        assert_eq!(regions.miss.size, 64);
        assert_eq!(regions.hit.device_address, 0x1080);
        assert_eq!(regions.hit.stride, 32);
        assert_eq!(regions.callable.size, 0);
        assert_eq!(regions.callable.device_address, 0);
    }
}

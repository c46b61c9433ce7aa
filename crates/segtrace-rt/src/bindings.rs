//! Resource binding: the fixed descriptor layout and the per-query buffers bound to it.

use std::sync::Arc;

use ash::vk;
use bytemuck::Pod;
use gpu_allocator::MemoryLocation;
use segtrace_core::{HitRecord, SegmentSet};
use segtrace_gpu::{
    write_acceleration_structure, write_storage_buffer, DescriptorPool, DescriptorSetLayoutBuilder,
    GpuAllocator, GpuBuffer, Result,
};

/// Binding slots shared with the shader stages.
pub mod slot {
    pub const TLAS: u32 = 0;
    pub const QUERY_POINTS: u32 = 1;
    pub const QUERY_SEGMENTS: u32 = 2;
    pub const BASE_POINTS: u32 = 3;
    pub const BASE_SEGMENTS: u32 = 4;
    pub const RESULTS: u32 = 5;
    pub const COUNTER: u32 = 6;
}

/// Stages that read geometry and write results.
pub const BUFFER_STAGES: vk::ShaderStageFlags = vk::ShaderStageFlags::from_raw(
    vk::ShaderStageFlags::RAYGEN_KHR.as_raw()
        | vk::ShaderStageFlags::INTERSECTION_KHR.as_raw()
        | vk::ShaderStageFlags::ANY_HIT_KHR.as_raw(),
);

/// Stages that may trace against the TLAS.
pub const TLAS_STAGES: vk::ShaderStageFlags = vk::ShaderStageFlags::from_raw(
    BUFFER_STAGES.as_raw()
        | vk::ShaderStageFlags::MISS_KHR.as_raw()
        | vk::ShaderStageFlags::CLOSEST_HIT_KHR.as_raw(),
);

fn layout_builder() -> DescriptorSetLayoutBuilder<'static> {
    DescriptorSetLayoutBuilder::new()
        .acceleration_structure(slot::TLAS, TLAS_STAGES)
        .storage_buffer(slot::QUERY_POINTS, BUFFER_STAGES)
        .storage_buffer(slot::QUERY_SEGMENTS, BUFFER_STAGES)
        .storage_buffer(slot::BASE_POINTS, BUFFER_STAGES)
        .storage_buffer(slot::BASE_SEGMENTS, BUFFER_STAGES)
        .storage_buffer(slot::RESULTS, BUFFER_STAGES)
        .storage_buffer(slot::COUNTER, BUFFER_STAGES)
}

/// Descriptor set layout of the seven bindings, destroyed on drop.
pub struct BindingLayout {
    device: Arc<ash::Device>,
    layout: vk::DescriptorSetLayout,
    pool_sizes: Vec<vk::DescriptorPoolSize>,
}

impl BindingLayout {
    /// Create the layout.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: Arc<ash::Device>) -> Result<Self> {
        let builder = layout_builder();
        let layout = builder.build(&device)?;
        Ok(Self {
            device,
            layout,
            pool_sizes: builder.pool_sizes(),
        })
    }

    /// Raw layout handle.
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// Pool sizes for exactly one set of this layout.
    pub fn pool_sizes(&self) -> &[vk::DescriptorPoolSize] {
        &self.pool_sizes
    }
}

impl Drop for BindingLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Every buffer one query touches.
pub struct QueryBuffers {
    pub query_points: GpuBuffer,
    pub query_segments: GpuBuffer,
    pub base_points: GpuBuffer,
    pub base_segments: GpuBuffer,
    /// Device results array of `capacity` records.
    pub results: GpuBuffer,
    /// Single u32 hit counter.
    pub counter: GpuBuffer,
    pub results_readback: GpuBuffer,
    pub counter_readback: GpuBuffer,
    capacity: u32,
}

impl QueryBuffers {
    /// Allocate all buffers and upload the geometry.
    ///
    /// The results buffer always holds at least one record so it can be bound; only
    /// `capacity` records are ever written.
    pub fn upload(
        allocator: &GpuAllocator,
        query: &SegmentSet,
        base: &SegmentSet,
        capacity: u32,
    ) -> Result<Self> {
        let record_size = std::mem::size_of::<HitRecord>() as u64;
        let results_size = u64::from(capacity.max(1)) * record_size;
        let counter_size = std::mem::size_of::<u32>() as u64;

        let results = allocator.create_buffer(
            results_size,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::GpuOnly,
            "results",
        )?;
        let counter = allocator.create_buffer(
            counter_size,
            vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::TRANSFER_SRC
                | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuOnly,
            "hit_counter",
        )?;
        let results_readback = allocator.create_buffer(
            results_size,
            vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuToCpu,
            "results_readback",
        )?;
        let counter_readback = allocator.create_buffer(
            counter_size,
            vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuToCpu,
            "hit_counter_readback",
        )?;

        Ok(Self {
            query_points: upload_storage(allocator, &query.points, "query_points")?,
            query_segments: upload_storage(allocator, &query.gpu_segments(), "query_segments")?,
            base_points: upload_storage(allocator, &base.points, "base_points")?,
            base_segments: upload_storage(allocator, &base.gpu_segments(), "base_segments")?,
            results,
            counter,
            results_readback,
            counter_readback,
            capacity,
        })
    }

    /// Records the shaders may write.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}

/// Host-visible storage buffer holding `data`, at least one element long.
fn upload_storage<T: Pod>(allocator: &GpuAllocator, data: &[T], name: &str) -> Result<GpuBuffer> {
    let size = (std::mem::size_of_val(data).max(std::mem::size_of::<T>())) as u64;
    let mut buffer = allocator.create_buffer(
        size,
        vk::BufferUsageFlags::STORAGE_BUFFER,
        MemoryLocation::CpuToGpu,
        name,
    )?;
    buffer.write(data)?;
    Ok(buffer)
}

/// A descriptor set from its own pool, pointing at one query's resources.
pub struct ResourceBindings {
    // Destroying the pool frees the set.
    _pool: DescriptorPool,
    set: vk::DescriptorSet,
}

impl ResourceBindings {
    /// Allocate a set and write all seven bindings.
    ///
    /// # Safety
    /// The TLAS and every buffer must stay alive while the set is in use.
    pub unsafe fn new(
        device: Arc<ash::Device>,
        layout: &BindingLayout,
        tlas: vk::AccelerationStructureKHR,
        buffers: &QueryBuffers,
    ) -> Result<Self> {
        let pool = DescriptorPool::new(device.clone(), 1, layout.pool_sizes())?;
        let set = pool.allocate(&[layout.handle()])?[0];

        write_acceleration_structure(&device, set, slot::TLAS, tlas);
        for (binding, buffer) in [
            (slot::QUERY_POINTS, &buffers.query_points),
            (slot::QUERY_SEGMENTS, &buffers.query_segments),
            (slot::BASE_POINTS, &buffers.base_points),
            (slot::BASE_SEGMENTS, &buffers.base_segments),
            (slot::RESULTS, &buffers.results),
            (slot::COUNTER, &buffers.counter),
        ] {
            write_storage_buffer(&device, set, binding, buffer.handle());
        }

        Ok(Self { _pool: pool, set })
    }

    /// The written descriptor set.
    pub fn set(&self) -> vk::DescriptorSet {
        self.set
    }
}

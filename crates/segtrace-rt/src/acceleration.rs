//! Acceleration structures over base-segment AABBs.
//!
//! One bottom-level structure holds a procedural AABB per base segment, in segment
//! order, and one top-level structure holds a single identity instance of it.

use ash::vk;
use gpu_allocator::MemoryLocation;
use segtrace_core::AabbPositions;
use segtrace_gpu::command::memory_barrier;
use segtrace_gpu::{GpuAllocator, GpuBuffer, GpuError, Result, VkResultExt};

/// Geometry flags of the AABB geometry.
///
/// Non-opaque so the any-hit stage runs for every reported intersection, and at most
/// one any-hit invocation per primitive along a ray.
pub const SEGMENT_GEOMETRY_FLAGS: vk::GeometryFlagsKHR =
    vk::GeometryFlagsKHR::NO_DUPLICATE_ANY_HIT_INVOCATION;

const BUILD_FLAGS: vk::BuildAccelerationStructureFlagsKHR =
    vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE;

/// A Vulkan acceleration structure and its backing buffer.
///
/// The structure handle is destroyed before the buffer is released.
pub struct AccelerationStructure {
    loader: ash::khr::acceleration_structure::Device,
    handle: vk::AccelerationStructureKHR,
    device_address: vk::DeviceAddress,
    buffer: GpuBuffer,
}

impl AccelerationStructure {
    /// Create an unbuilt structure of exactly `size` bytes.
    ///
    /// # Safety
    /// The loader must belong to the allocator's device.
    unsafe fn new(
        allocator: &GpuAllocator,
        loader: &ash::khr::acceleration_structure::Device,
        ty: vk::AccelerationStructureTypeKHR,
        size: vk::DeviceSize,
        name: &str,
    ) -> Result<Self> {
        let buffer = allocator.create_buffer(
            size,
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryLocation::GpuOnly,
            name,
        )?;

        let create_info = vk::AccelerationStructureCreateInfoKHR::default()
            .buffer(buffer.handle())
            .offset(0)
            .size(size)
            .ty(ty);

        let handle = loader
            .create_acceleration_structure(&create_info, None)
            .context("vkCreateAccelerationStructureKHR")?;

        let address_info =
            vk::AccelerationStructureDeviceAddressInfoKHR::default().acceleration_structure(handle);
        let device_address = loader.get_acceleration_structure_device_address(&address_info);

        Ok(Self {
            loader: loader.clone(),
            handle,
            device_address,
            buffer,
        })
    }

    /// Raw structure handle.
    pub fn handle(&self) -> vk::AccelerationStructureKHR {
        self.handle
    }

    /// Device address used to reference this structure from an instance.
    pub fn device_address(&self) -> vk::DeviceAddress {
        self.device_address
    }

    /// Size of the backing buffer.
    pub fn size(&self) -> vk::DeviceSize {
        self.buffer.size()
    }
}

impl Drop for AccelerationStructure {
    fn drop(&mut self) {
        unsafe {
            self.loader
                .destroy_acceleration_structure(self.handle, None);
        }
    }
}

fn aabb_geometry(aabb_address: vk::DeviceAddress) -> vk::AccelerationStructureGeometryKHR<'static> {
    vk::AccelerationStructureGeometryKHR::default()
        .geometry_type(vk::GeometryTypeKHR::AABBS)
        .flags(SEGMENT_GEOMETRY_FLAGS)
        .geometry(vk::AccelerationStructureGeometryDataKHR {
            aabbs: vk::AccelerationStructureGeometryAabbsDataKHR::default()
                .data(vk::DeviceOrHostAddressConstKHR {
                    device_address: aabb_address,
                })
                .stride(std::mem::size_of::<AabbPositions>() as u64),
        })
}

fn instance_geometry(
    instance_address: vk::DeviceAddress,
) -> vk::AccelerationStructureGeometryKHR<'static> {
    vk::AccelerationStructureGeometryKHR::default()
        .geometry_type(vk::GeometryTypeKHR::INSTANCES)
        .geometry(vk::AccelerationStructureGeometryDataKHR {
            instances: vk::AccelerationStructureGeometryInstancesDataKHR::default()
                .array_of_pointers(false)
                .data(vk::DeviceOrHostAddressConstKHR {
                    device_address: instance_address,
                }),
        })
}

/// Query structure and scratch sizes for one geometry.
///
/// # Safety
/// The loader must be valid.
unsafe fn build_sizes(
    loader: &ash::khr::acceleration_structure::Device,
    ty: vk::AccelerationStructureTypeKHR,
    geometry: &vk::AccelerationStructureGeometryKHR<'_>,
    primitive_count: u32,
) -> vk::AccelerationStructureBuildSizesInfoKHR<'static> {
    let build_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
        .ty(ty)
        .flags(BUILD_FLAGS)
        .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
        .geometries(std::slice::from_ref(geometry));

    let mut sizes = vk::AccelerationStructureBuildSizesInfoKHR::default();
    loader.get_acceleration_structure_build_sizes(
        vk::AccelerationStructureBuildTypeKHR::DEVICE,
        &build_info,
        &[primitive_count],
        &mut sizes,
    );
    sizes
}

/// Record one build command.
///
/// # Safety
/// The command buffer must be recording and every address must be live.
unsafe fn record_build(
    loader: &ash::khr::acceleration_structure::Device,
    cmd: vk::CommandBuffer,
    ty: vk::AccelerationStructureTypeKHR,
    dst: vk::AccelerationStructureKHR,
    geometry: &vk::AccelerationStructureGeometryKHR<'_>,
    primitive_count: u32,
    scratch_address: vk::DeviceAddress,
) {
    let build_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
        .ty(ty)
        .flags(BUILD_FLAGS)
        .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
        .dst_acceleration_structure(dst)
        .geometries(std::slice::from_ref(geometry))
        .scratch_data(vk::DeviceOrHostAddressKHR {
            device_address: scratch_address,
        });

    let build_range = vk::AccelerationStructureBuildRangeInfoKHR::default()
        .primitive_count(primitive_count)
        .primitive_offset(0)
        .first_vertex(0)
        .transform_offset(0);

    loader.cmd_build_acceleration_structures(
        cmd,
        &[build_info],
        &[std::slice::from_ref(&build_range)],
    );
}

/// Bottom-level structure over one AABB per base segment.
pub struct SegmentBlas {
    structure: AccelerationStructure,
    aabb_buffer: GpuBuffer,
    primitive_count: u32,
    scratch_size: vk::DeviceSize,
}

impl SegmentBlas {
    /// Upload the AABBs and create a structure sized for them.
    ///
    /// # Safety
    /// The loader must belong to the allocator's device.
    pub unsafe fn new(
        allocator: &GpuAllocator,
        loader: &ash::khr::acceleration_structure::Device,
        aabbs: &[AabbPositions],
    ) -> Result<Self> {
        let primitive_count = u32::try_from(aabbs.len())
            .ok()
            .filter(|&count| count > 0)
            .ok_or_else(|| {
                GpuError::InvalidState(format!("Cannot build a BLAS over {} AABBs", aabbs.len()))
            })?;

        let mut aabb_buffer = allocator.create_buffer(
            std::mem::size_of_val(aabbs) as u64,
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryLocation::CpuToGpu,
            "blas_aabb_buffer",
        )?;
        aabb_buffer.write(aabbs)?;

        let geometry = aabb_geometry(aabb_buffer.device_address());
        let sizes = build_sizes(
            loader,
            vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
            &geometry,
            primitive_count,
        );
        tracing::debug!(
            "BLAS: {} AABBs, {} bytes, {} scratch bytes",
            primitive_count,
            sizes.acceleration_structure_size,
            sizes.build_scratch_size
        );

        let structure = AccelerationStructure::new(
            allocator,
            loader,
            vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
            sizes.acceleration_structure_size,
            "blas_buffer",
        )?;

        Ok(Self {
            structure,
            aabb_buffer,
            primitive_count,
            scratch_size: sizes.build_scratch_size,
        })
    }

    /// The built structure.
    pub fn structure(&self) -> &AccelerationStructure {
        &self.structure
    }

    /// Number of AABB primitives.
    pub fn primitive_count(&self) -> u32 {
        self.primitive_count
    }

    /// Record the build command.
    ///
    /// # Safety
    /// The command buffer must be recording; the scratch address must cover
    /// [`Self::scratch_size`] bytes.
    pub unsafe fn record_build(
        &self,
        cmd: vk::CommandBuffer,
        scratch_address: vk::DeviceAddress,
    ) {
        let geometry = aabb_geometry(self.aabb_buffer.device_address());
        record_build(
            &self.structure.loader,
            cmd,
            vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
            self.structure.handle,
            &geometry,
            self.primitive_count,
            scratch_address,
        );
    }

    /// Scratch bytes the build needs.
    pub fn scratch_size(&self) -> vk::DeviceSize {
        self.scratch_size
    }
}

/// Top-level structure holding one identity instance of the BLAS.
pub struct Tlas {
    structure: AccelerationStructure,
    instance_buffer: GpuBuffer,
    scratch_size: vk::DeviceSize,
}

impl Tlas {
    /// Write the instance record and create a structure sized for it.
    ///
    /// # Safety
    /// The loader must belong to the allocator's device.
    pub unsafe fn new(
        allocator: &GpuAllocator,
        loader: &ash::khr::acceleration_structure::Device,
        blas: &SegmentBlas,
    ) -> Result<Self> {
        // Identity transform (row-major 3x4 matrix)
        let transform = vk::TransformMatrixKHR {
            matrix: [
                1.0, 0.0, 0.0, 0.0, //
                0.0, 1.0, 0.0, 0.0, //
                0.0, 0.0, 1.0, 0.0, //
            ],
        };

        // Procedural AABBs have no winding.
        let instance = vk::AccelerationStructureInstanceKHR {
            transform,
            instance_custom_index_and_mask: vk::Packed24_8::new(0, 0xFF),
            instance_shader_binding_table_record_offset_and_flags: vk::Packed24_8::new(
                0,
                vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE.as_raw() as u8,
            ),
            acceleration_structure_reference: vk::AccelerationStructureReferenceKHR {
                device_handle: blas.structure.device_address(),
            },
        };

        let instance_size = std::mem::size_of::<vk::AccelerationStructureInstanceKHR>();
        let mut instance_buffer = allocator.create_buffer(
            instance_size as u64,
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryLocation::CpuToGpu,
            "tlas_instance_buffer",
        )?;
        let instance_bytes = std::slice::from_raw_parts(
            std::ptr::addr_of!(instance).cast::<u8>(),
            instance_size,
        );
        instance_buffer.write_bytes(0, instance_bytes)?;

        let geometry = instance_geometry(instance_buffer.device_address());
        let sizes = build_sizes(
            loader,
            vk::AccelerationStructureTypeKHR::TOP_LEVEL,
            &geometry,
            1,
        );

        let structure = AccelerationStructure::new(
            allocator,
            loader,
            vk::AccelerationStructureTypeKHR::TOP_LEVEL,
            sizes.acceleration_structure_size,
            "tlas_buffer",
        )?;

        Ok(Self {
            structure,
            instance_buffer,
            scratch_size: sizes.build_scratch_size,
        })
    }

    /// The built structure.
    pub fn structure(&self) -> &AccelerationStructure {
        &self.structure
    }

    /// Record the build command.
    ///
    /// # Safety
    /// The command buffer must be recording, the BLAS build must precede it behind a
    /// barrier, and the scratch address must cover [`Self::scratch_size`] bytes.
    pub unsafe fn record_build(
        &self,
        cmd: vk::CommandBuffer,
        scratch_address: vk::DeviceAddress,
    ) {
        let geometry = instance_geometry(self.instance_buffer.device_address());
        record_build(
            &self.structure.loader,
            cmd,
            vk::AccelerationStructureTypeKHR::TOP_LEVEL,
            self.structure.handle,
            &geometry,
            1,
            scratch_address,
        );
    }

    /// Scratch bytes the build needs.
    pub fn scratch_size(&self) -> vk::DeviceSize {
        self.scratch_size
    }
}

/// BLAS, TLAS, and the scratch buffer both builds share.
///
/// Keep the whole value alive until the command buffer that builds it has completed.
pub struct SceneAccelerationStructure {
    // Field order is drop order: top level before the bottom level it references.
    tlas: Tlas,
    blas: SegmentBlas,
    scratch_buffer: GpuBuffer,
    scratch_alignment: u64,
}

impl SceneAccelerationStructure {
    /// Create both structures for the given AABBs.
    ///
    /// # Safety
    /// The loader must belong to the allocator's device.
    pub unsafe fn new(
        allocator: &GpuAllocator,
        loader: &ash::khr::acceleration_structure::Device,
        aabbs: &[AabbPositions],
        scratch_alignment: u32,
    ) -> Result<Self> {
        let blas = SegmentBlas::new(allocator, loader, aabbs)?;
        let tlas = Tlas::new(allocator, loader, &blas)?;

        // Over-allocate so the scratch address can be rounded up to the required alignment.
        let scratch_alignment = u64::from(scratch_alignment);
        let scratch_size = blas.scratch_size().max(tlas.scratch_size()) + scratch_alignment;
        let scratch_buffer = allocator.create_buffer(
            scratch_size,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryLocation::GpuOnly,
            "as_scratch_buffer",
        )?;

        Ok(Self {
            tlas,
            blas,
            scratch_buffer,
            scratch_alignment,
        })
    }

    /// Record BLAS build, barrier, TLAS build.
    ///
    /// # Safety
    /// The command buffer must be recording.
    pub unsafe fn record_build(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        let scratch_address = self.scratch_buffer.aligned_address(self.scratch_alignment);

        self.blas.record_build(cmd, scratch_address);

        // The TLAS reads the BLAS and reuses its scratch memory.
        memory_barrier(
            device,
            cmd,
            vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR,
            vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR,
            vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR,
            vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR
                | vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR,
        );

        self.tlas.record_build(cmd, scratch_address);
    }

    /// Get the TLAS for descriptor binding.
    pub fn tlas(&self) -> &Tlas {
        &self.tlas
    }

    /// Get the BLAS.
    pub fn blas(&self) -> &SegmentBlas {
        &self.blas
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aabb_stride_matches_vulkan() {
        assert_eq!(
            std::mem::size_of::<AabbPositions>(),
            std::mem::size_of::<vk::AabbPositionsKHR>()
        );
    }

    #[test]
    fn instance_record_size() {
        assert_eq!(std::mem::size_of::<vk::AccelerationStructureInstanceKHR>(), 64);
    }

    #[test]
    fn segment_geometry_is_not_opaque() {
        assert!(!SEGMENT_GEOMETRY_FLAGS.contains(vk::GeometryFlagsKHR::OPAQUE));
        assert!(SEGMENT_GEOMETRY_FLAGS.contains(vk::GeometryFlagsKHR::NO_DUPLICATE_ANY_HIT_INVOCATION));
    }
}

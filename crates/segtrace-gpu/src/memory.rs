//! GPU memory management.
//!
//! [`GpuAllocator`] is a cheap cloneable handle. Every [`GpuBuffer`] keeps a clone and
//! returns its memory when dropped, so buffers can be held in ordinary scopes.

use crate::error::{GpuError, Result, VkResultExt};
use ash::vk;
use bytemuck::Pod;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;
use std::sync::Arc;

/// Round `value` up to a multiple of `alignment` (a power of two, or 0 for none).
#[inline]
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        value
    } else {
        (value + alignment - 1) & !(alignment - 1)
    }
}

/// Shared GPU memory allocator.
#[derive(Clone)]
pub struct GpuAllocator {
    allocator: Arc<Mutex<Option<Allocator>>>,
    device: Arc<ash::Device>,
}

impl GpuAllocator {
    /// Create a new allocator.
    ///
    /// # Safety
    /// The instance, device, and physical device must be valid.
    pub unsafe fn new(
        instance: &ash::Instance,
        device: Arc<ash::Device>,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: (*device).clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: cfg!(debug_assertions),
                log_leaks_on_shutdown: true,
                store_stack_traces: false,
                log_allocations: false,
                log_frees: false,
                log_stack_traces: false,
            },
            buffer_device_address: true,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;

        Ok(Self {
            allocator: Arc::new(Mutex::new(Some(allocator))),
            device,
        })
    }

    /// The device this allocator serves.
    pub fn device(&self) -> &Arc<ash::Device> {
        &self.device
    }

    /// Allocate a buffer.
    pub fn create_buffer(
        &self,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<GpuBuffer> {
        if size == 0 {
            return Err(GpuError::InvalidState(format!(
                "Buffer '{name}' has zero size"
            )));
        }
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { self.device.create_buffer(&buffer_info, None) }
            .context("vkCreateBuffer")?;

        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let allocation = {
            let mut guard = self.allocator.lock();
            let allocator = guard
                .as_mut()
                .ok_or_else(|| GpuError::InvalidState("Allocator shut down".to_string()));
            allocator.and_then(|allocator| {
                allocator
                    .allocate(&AllocationCreateDesc {
                        name,
                        requirements,
                        location,
                        linear: true,
                        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                    })
                    .map_err(|e| GpuError::AllocationFailed(format!("{name}: {e}")))
            })
        };

        // From here on the buffer owns both handles and cleans up on any failure.
        let mut buffer = GpuBuffer {
            buffer,
            allocation: None,
            size,
            allocator: self.clone(),
        };
        let allocation = allocation?;

        let bind = unsafe {
            self.device
                .bind_buffer_memory(buffer.buffer, allocation.memory(), allocation.offset())
        };
        buffer.allocation = Some(allocation);
        bind.context("vkBindBufferMemory")?;

        tracing::trace!("Allocated buffer '{}' ({} bytes, {:?})", name, size, location);
        Ok(buffer)
    }

    /// Release the allocator, freeing all GPU memory.
    ///
    /// Must be called before the Vulkan device is destroyed. Buffers dropped after
    /// this only destroy their handles.
    pub fn shutdown(&self) {
        if let Some(allocator) = self.allocator.lock().take() {
            drop(allocator);
        }
    }

    fn free(&self, allocation: Allocation) {
        if let Some(allocator) = self.allocator.lock().as_mut() {
            if let Err(e) = allocator.free(allocation) {
                tracing::warn!("Failed to free GPU allocation: {e}");
            }
        }
    }
}

/// A GPU buffer with its allocation, freed on drop.
pub struct GpuBuffer {
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: u64,
    allocator: GpuAllocator,
}

impl GpuBuffer {
    /// Raw buffer handle.
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Buffer size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Get the device address of this buffer.
    pub fn device_address(&self) -> vk::DeviceAddress {
        let info = vk::BufferDeviceAddressInfo::default().buffer(self.buffer);
        unsafe { self.allocator.device.get_buffer_device_address(&info) }
    }

    /// Device address rounded up to `alignment`.
    ///
    /// Callers must have over-allocated by `alignment` bytes.
    pub fn aligned_address(&self, alignment: u64) -> vk::DeviceAddress {
        align_up(self.device_address(), alignment)
    }

    /// Host view of the buffer (must be host-visible).
    pub fn mapped_slice(&self) -> Option<&[u8]> {
        self.allocation.as_ref().and_then(Allocation::mapped_slice)
    }

    fn mapped_slice_mut(&mut self) -> Result<&mut [u8]> {
        self.allocation
            .as_mut()
            .and_then(Allocation::mapped_slice_mut)
            .ok_or_else(|| GpuError::InvalidState("Buffer not mapped".to_string()))
    }

    /// Write data at the start of the buffer (must be host-visible).
    pub fn write<T: Pod>(&mut self, data: &[T]) -> Result<()> {
        self.write_bytes(0, bytemuck::cast_slice(data))
    }

    /// Write raw bytes at the given offset (must be host-visible).
    pub fn write_bytes(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let end = offset
            .checked_add(data.len() as u64)
            .filter(|&end| end <= self.size)
            .ok_or_else(|| {
                GpuError::InvalidState(format!(
                    "{} bytes at offset {offset} do not fit a {} byte buffer",
                    data.len(),
                    self.size
                ))
            })?;

        self.mapped_slice_mut()?[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    /// Read `count` elements from the start of the buffer (must be host-visible).
    pub fn read<T: Pod>(&self, count: usize) -> Result<Vec<T>> {
        let byte_len = count
            .checked_mul(std::mem::size_of::<T>())
            .filter(|&len| len as u64 <= self.size)
            .ok_or_else(|| {
                GpuError::InvalidState(format!(
                    "Cannot read {count} elements from a {} byte buffer",
                    self.size
                ))
            })?;

        let bytes = self
            .mapped_slice()
            .ok_or_else(|| GpuError::InvalidState("Buffer not mapped".to_string()))?;

        Ok(bytes[..byte_len]
            .chunks_exact(std::mem::size_of::<T>().max(1))
            .take(count)
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            self.allocator.free(allocation);
        }
        unsafe {
            self.allocator.device.destroy_buffer(self.buffer, None);
        }
    }
}

//! Command buffer management.

use crate::error::{Result, VkResultExt};
use ash::vk;
use std::sync::Arc;

/// Command pool for allocating command buffers, destroyed on drop.
pub struct CommandPool {
    device: Arc<ash::Device>,
    pool: vk::CommandPool,
    queue_family: u32,
}

impl CommandPool {
    /// Create a new command pool.
    ///
    /// # Safety
    /// The queue family must exist on the device.
    pub unsafe fn new(
        device: Arc<ash::Device>,
        queue_family: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(flags);

        let pool = device
            .create_command_pool(&create_info, None)
            .context("vkCreateCommandPool")?;

        Ok(Self {
            device,
            pool,
            queue_family,
        })
    }

    /// Get the raw pool handle.
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Get the queue family index.
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Allocate a single primary command buffer.
    pub fn allocate_command_buffer(&self) -> Result<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffers = unsafe { self.device.allocate_command_buffers(&alloc_info) }
            .context("vkAllocateCommandBuffers")?;
        Ok(buffers[0])
    }

    /// Return a command buffer to the pool.
    ///
    /// # Safety
    /// The command buffer must come from this pool and must not be pending.
    pub unsafe fn free_command_buffer(&self, cmd: vk::CommandBuffer) {
        self.device.free_command_buffers(self.pool, &[cmd]);
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_command_pool(self.pool, None);
        }
    }
}

/// Begin recording a command buffer.
///
/// # Safety
/// The device and command buffer must be valid.
pub unsafe fn begin_command_buffer(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    flags: vk::CommandBufferUsageFlags,
) -> Result<()> {
    let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);
    device
        .begin_command_buffer(cmd, &begin_info)
        .context("vkBeginCommandBuffer")
}

/// End recording a command buffer.
///
/// # Safety
/// The device and command buffer must be valid.
pub unsafe fn end_command_buffer(device: &ash::Device, cmd: vk::CommandBuffer) -> Result<()> {
    device
        .end_command_buffer(cmd)
        .context("vkEndCommandBuffer")
}

/// Record a single global memory barrier.
///
/// # Safety
/// The device and command buffer must be valid and the buffer must be recording.
pub unsafe fn memory_barrier(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    src_stage: vk::PipelineStageFlags2,
    src_access: vk::AccessFlags2,
    dst_stage: vk::PipelineStageFlags2,
    dst_access: vk::AccessFlags2,
) {
    let barrier = vk::MemoryBarrier2::default()
        .src_stage_mask(src_stage)
        .src_access_mask(src_access)
        .dst_stage_mask(dst_stage)
        .dst_access_mask(dst_access);

    let dependency_info =
        vk::DependencyInfo::default().memory_barriers(std::slice::from_ref(&barrier));

    device.cmd_pipeline_barrier2(cmd, &dependency_info);
}

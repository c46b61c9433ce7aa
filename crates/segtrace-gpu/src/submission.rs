//! Completion-scoped command submission.
//!
//! Resources referenced by a submitted command buffer must outlive its execution. A
//! [`PendingSubmission`] owns them alongside the fence and hands them back only once
//! the device has finished, so the borrow checker enforces the lifetime instead of a
//! deletion queue.

use crate::command::CommandPool;
use crate::error::{GpuError, Result, VkResultExt};
use crate::sync::{create_fence, wait_for_fence};
use ash::vk;
use std::sync::Arc;

/// A submitted command buffer and the resources it uses.
pub struct PendingSubmission<'pool, R> {
    device: Arc<ash::Device>,
    pool: &'pool CommandPool,
    command_buffer: vk::CommandBuffer,
    fence: vk::Fence,
    retained: Option<R>,
}

impl<'pool, R> PendingSubmission<'pool, R> {
    /// Submit a recorded command buffer with a fresh fence.
    ///
    /// `retained` is kept alive until the fence signals. On failure the command buffer
    /// is freed and `retained` dropped; nothing was queued.
    ///
    /// # Safety
    /// `command_buffer` must be fully recorded, come from `pool`, and only reference
    /// resources owned by `retained` or outliving `pool`.
    pub unsafe fn submit(
        device: Arc<ash::Device>,
        queue: vk::Queue,
        pool: &'pool CommandPool,
        command_buffer: vk::CommandBuffer,
        retained: R,
    ) -> Result<Self> {
        let fence = match create_fence(&device, false) {
            Ok(fence) => fence,
            Err(e) => {
                pool.free_command_buffer(command_buffer);
                return Err(e);
            }
        };

        let command_buffers = [command_buffer];
        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
        if let Err(e) = device
            .queue_submit(queue, &[submit_info], fence)
            .context("vkQueueSubmit")
        {
            device.destroy_fence(fence, None);
            pool.free_command_buffer(command_buffer);
            return Err(e);
        }

        Ok(Self {
            device,
            pool,
            command_buffer,
            fence,
            retained: Some(retained),
        })
    }

    /// Block until the device finishes, then return the retained resources.
    pub fn wait(mut self) -> Result<R> {
        unsafe { wait_for_fence(&self.device, self.fence, u64::MAX) }?;
        tracing::trace!("Submission complete");
        self.retained
            .take()
            .ok_or_else(|| GpuError::InvalidState("Submission already consumed".to_string()))
    }
}

impl<R> Drop for PendingSubmission<'_, R> {
    fn drop(&mut self) {
        unsafe {
            // Never release resources the device may still read.
            if let Err(e) = wait_for_fence(&self.device, self.fence, u64::MAX) {
                tracing::error!("Waiting for submission during drop failed: {e}");
            }
            self.device.destroy_fence(self.fence, None);
            self.pool.free_command_buffer(self.command_buffer);
        }
    }
}

// Command pool and one-shot submissions

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;
use super::VulkanDevice;

pub struct CommandPool {
    pub pool: vk::CommandPool,
    device: Arc<VulkanDevice>,
}

impl CommandPool {
    /// Buffers from this pool can be reset one at a time. One-shot work is
    /// submitted to the graphics queue, so `family` should be the graphics family.
    pub fn new(device: Arc<VulkanDevice>, family: u32) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .context("Failed to create command pool")?;

        Ok(Self { pool, device })
    }

    pub fn allocate(&self, count: u32) -> Result<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        unsafe { self.device.device.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate command buffers")
    }

    /// Record with `record`, submit to the graphics queue and block until done.
    /// Used for uploads at startup, never in the frame loop.
    pub fn submit_once<F>(&self, record: F) -> Result<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let device = &self.device.device;
        let cmd = self.allocate(1)?[0];

        let result = (|| -> Result<()> {
            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

            unsafe { device.begin_command_buffer(cmd, &begin_info) }?;
            record(device, cmd);
            unsafe { device.end_command_buffer(cmd) }?;

            let fence = unsafe { device.create_fence(&vk::FenceCreateInfo::default(), None) }?;
            let command_buffers = [cmd];
            let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);

            let submitted = unsafe {
                device
                    .queue_submit(self.device.graphics_queue, &[submit_info.build()], fence)
                    .and_then(|_| device.wait_for_fences(&[fence], true, u64::MAX))
            };

            unsafe { device.destroy_fence(fence, None) };
            submitted.context("One-shot command submission failed")
        })();

        unsafe { device.free_command_buffers(self.pool, &[cmd]) };
        result
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        // Also frees every command buffer allocated from it
        unsafe { self.device.device.destroy_command_pool(self.pool, None) };
    }
}

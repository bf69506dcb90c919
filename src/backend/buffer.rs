// Buffer utilities for vertex, index and staging buffers
//
// Memory comes from the device's gpu-allocator instance instead of one
// vkAllocateMemory call per buffer.

use anyhow::{Context, Result};
use ash::vk;
use bytemuck::Pod;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;
use super::commands::CommandPool;
use super::VulkanDevice;

pub struct Buffer {
    pub buffer: vk::Buffer,
    pub size: vk::DeviceSize,
    allocation: Option<Allocation>,
    device: Arc<VulkanDevice>,
}

impl Buffer {
    pub fn new(
        device: Arc<VulkanDevice>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<Self> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
            .with_context(|| format!("Failed to create buffer '{}'", name))?;

        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

        let allocation = device.allocator.lock().allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });

        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_buffer(buffer, None) };
                return Err(e).with_context(|| format!("Failed to allocate memory for '{}'", name));
            }
        };

        let bound = unsafe {
            device
                .device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };

        // From here on Drop cleans up
        let buffer = Self {
            buffer,
            size,
            allocation: Some(allocation),
            device,
        };
        bound.with_context(|| format!("Failed to bind memory for '{}'", name))?;

        Ok(buffer)
    }

    /// Copy `data` to the start of a host-visible buffer
    pub fn write<T: Pod>(&mut self, data: &[T]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        if bytes.len() as vk::DeviceSize > self.size {
            anyhow::bail!("Write of {} bytes overflows buffer of {}", bytes.len(), self.size);
        }

        let mapped = self
            .allocation
            .as_mut()
            .and_then(|a| a.mapped_slice_mut())
            .context("Buffer memory is not host visible")?;

        mapped[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Create a host-visible buffer already holding `data`
    pub fn with_data<T: Pod>(
        device: Arc<VulkanDevice>,
        usage: vk::BufferUsageFlags,
        data: &[T],
        name: &str,
    ) -> Result<Self> {
        let size = std::mem::size_of_val(data) as vk::DeviceSize;
        let mut buffer = Self::new(device, size, usage, MemoryLocation::CpuToGpu, name)?;
        buffer.write(data)?;
        Ok(buffer)
    }

    /// Upload `data` into device-local memory through a staging buffer
    pub fn device_local_with_data<T: Pod>(
        device: Arc<VulkanDevice>,
        commands: &CommandPool,
        usage: vk::BufferUsageFlags,
        data: &[T],
        name: &str,
    ) -> Result<Self> {
        let staging = Self::with_data(
            device.clone(),
            vk::BufferUsageFlags::TRANSFER_SRC,
            data,
            &format!("{} (staging)", name),
        )?;

        let buffer = Self::new(
            device,
            staging.size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuOnly,
            name,
        )?;

        commands.submit_once(|device, cmd| {
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size: staging.size,
            };
            unsafe { device.cmd_copy_buffer(cmd, staging.buffer, buffer.buffer, &[region]) };
        })?;

        log::debug!("Uploaded {} bytes to '{}'", staging.size, name);
        Ok(buffer)
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.device.allocator.lock().free(allocation) {
                log::warn!("Failed to free buffer memory: {}", e);
            }
        }
        unsafe { self.device.device.destroy_buffer(self.buffer, None) };
    }
}

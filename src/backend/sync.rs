// Synchronization primitives
//
// Fences, semaphores for GPU-CPU and GPU-GPU sync

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;
use super::VulkanDevice;

/// Frame synchronization - one per frame in flight
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
    device: Arc<VulkanDevice>,
}

impl FrameSync {
    pub fn new(device: Arc<VulkanDevice>) -> Result<Self> {
        // Signaled so the first wait on each slot returns immediately
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        let image_available = create_semaphore(&device)?;
        let in_flight_fence = match unsafe { device.device.create_fence(&fence_info, None) } {
            Ok(fence) => fence,
            Err(e) => {
                unsafe { device.device.destroy_semaphore(image_available, None) };
                return Err(e).context("Failed to create fence");
            }
        };

        Ok(Self {
            image_available,
            in_flight_fence,
            device,
        })
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_semaphore(self.image_available, None);
            self.device.device.destroy_fence(self.in_flight_fence, None);
        }
    }
}

fn create_semaphore(device: &VulkanDevice) -> Result<vk::Semaphore> {
    let info = vk::SemaphoreCreateInfo::builder();
    unsafe { device.device.create_semaphore(&info, None) }.context("Failed to create semaphore")
}

/// Render-finished semaphores, one per swapchain image. A present may still
/// be waiting on one when the next frame slot comes around, so they follow
/// the image index rather than the slot.
pub struct PresentSemaphores {
    semaphores: Vec<vk::Semaphore>,
    device: Arc<VulkanDevice>,
}

impl PresentSemaphores {
    pub fn new(device: Arc<VulkanDevice>, image_count: usize) -> Result<Self> {
        let mut present = Self {
            semaphores: Vec::with_capacity(image_count),
            device,
        };
        for _ in 0..image_count {
            let semaphore = create_semaphore(&present.device)?;
            present.semaphores.push(semaphore);
        }
        Ok(present)
    }

    pub fn get(&self, image_index: u32) -> Result<vk::Semaphore> {
        semaphore_for_image(&self.semaphores, image_index)
    }
}

impl Drop for PresentSemaphores {
    fn drop(&mut self) {
        for &semaphore in &self.semaphores {
            unsafe { self.device.device.destroy_semaphore(semaphore, None) };
        }
    }
}

fn semaphore_for_image(semaphores: &[vk::Semaphore], image_index: u32) -> Result<vk::Semaphore> {
    semaphores
        .get(image_index as usize)
        .copied()
        .with_context(|| format!("No present semaphore for swapchain image {}", image_index))
}

/// Which frame-in-flight slot is being recorded, and which slots lost their
/// sync objects to a failed frame and must get fresh ones before reuse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRing {
    current: usize,
    count: usize,
    stale: Vec<bool>,
}

impl FrameRing {
    pub fn new(count: usize) -> Self {
        let count = count.max(1);
        Self {
            current: 0,
            count,
            stale: vec![false; count],
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn slots(&self) -> usize {
        self.count
    }

    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.count;
    }

    /// The current slot's fence or semaphore was left unsignaled with nothing
    /// queued to signal it
    pub fn mark_current_stale(&mut self) {
        self.stale[self.current] = true;
    }

    /// True once per `mark_current_stale` on the current slot
    pub fn take_current_stale(&mut self) -> bool {
        std::mem::take(&mut self.stale[self.current])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn ring_wraps_after_count_frames() {
        let mut ring = FrameRing::new(2);
        assert_eq!(ring.current(), 0);
        ring.advance();
        assert_eq!(ring.current(), 1);
        ring.advance();
        assert_eq!(ring.current(), 0);
    }

    #[test]
    fn single_slot_ring_stays_put() {
        let mut ring = FrameRing::new(0);
        assert_eq!(ring.slots(), 1);
        ring.advance();
        assert_eq!(ring.current(), 0);
    }

    #[test]
    fn failed_slot_is_rebuilt_once_when_it_comes_around() {
        let mut ring = FrameRing::new(2);
        ring.mark_current_stale();

        // A retry on the same slot sees it first
        assert!(ring.take_current_stale());
        assert!(!ring.take_current_stale());

        ring.mark_current_stale();
        ring.advance();
        assert!(!ring.take_current_stale());
        ring.advance();
        assert!(ring.take_current_stale());
    }

    #[test]
    fn present_semaphore_follows_image_index() {
        let semaphores = [vk::Semaphore::from_raw(1), vk::Semaphore::from_raw(2), vk::Semaphore::from_raw(3)];
        assert_eq!(semaphore_for_image(&semaphores, 2).unwrap(), semaphores[2]);
        assert_eq!(semaphore_for_image(&semaphores, 0).unwrap(), semaphores[0]);
        assert!(semaphore_for_image(&semaphores, 3).is_err());
    }
}

// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen.
// Format, present mode, extent and image count are chosen by the free
// functions below so they can be checked without a GPU.

use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::vk;
use std::sync::Arc;
use super::VulkanDevice;

/// Result of asking the swapchain for the next image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquired {
    Image { index: u32, suboptimal: bool },
    /// The surface changed and the swapchain must be rebuilt before drawing
    OutOfDate,
}

/// Prefer 8-bit sRGB, otherwise whatever the surface lists first
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

/// FIFO is the only mode every implementation must support
pub fn choose_present_mode(
    preferred: vk::PresentModeKHR,
    available: &[vk::PresentModeKHR],
) -> vk::PresentModeKHR {
    if available.contains(&preferred) {
        preferred
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// None while the surface has no area, which some platforms report for a
/// minimized window even though the window itself still has a size
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> Option<vk::Extent2D> {
    let extent = if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    };

    (extent.width > 0 && extent.height > 0).then_some(extent)
}

/// One more than the minimum so we never wait on the driver; a max of 0 means unbounded
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        count.min(caps.max_image_count)
    } else {
        count
    }
}

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: khr::Swapchain,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    device: Arc<VulkanDevice>,
}

impl Swapchain {
    /// Extent a swapchain for this surface would get right now
    pub fn surface_extent(device: &VulkanDevice, width: u32, height: u32) -> Result<Option<vk::Extent2D>> {
        let caps = unsafe {
            device
                .surface_loader
                .get_physical_device_surface_capabilities(device.physical_device, device.surface)
        }
        .context("Failed to query surface capabilities")?;

        Ok(choose_extent(&caps, width, height))
    }

    pub fn new(
        device: Arc<VulkanDevice>,
        width: u32,
        height: u32,
        preferred_mode: vk::PresentModeKHR,
    ) -> Result<Self> {
        let surface = device.surface;
        let surface_loader = &device.surface_loader;

        let surface_caps = unsafe {
            surface_loader.get_physical_device_surface_capabilities(device.physical_device, surface)
        }
        .context("Failed to query surface capabilities")?;

        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(device.physical_device, surface)
        }?;

        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(device.physical_device, surface)
        }?;

        let surface_format =
            choose_surface_format(&formats).context("No suitable surface format")?;
        let present_mode = choose_present_mode(preferred_mode, &present_modes);
        let extent = choose_extent(&surface_caps, width, height)
            .context("Surface has zero extent")?;
        let image_count = choose_image_count(&surface_caps);

        log::info!(
            "Creating swapchain: {}x{} {:?} {:?}",
            extent.width,
            extent.height,
            surface_format.format,
            present_mode
        );

        let swapchain_loader = khr::Swapchain::new(&device.instance, &device.device);

        // Images are touched by both queues when the families differ
        let family_indices = device.queue_families.unique();
        let sharing_mode = if device.queue_families.is_shared() {
            vk::SharingMode::EXCLUSIVE
        } else {
            vk::SharingMode::CONCURRENT
        };

        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .pre_transform(surface_caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        if sharing_mode == vk::SharingMode::CONCURRENT {
            create_info = create_info.queue_family_indices(&family_indices);
        }

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .context("Failed to create swapchain")?;

        let images = unsafe { swapchain_loader.get_swapchain_images(swapchain) }?;

        log::info!("Created swapchain with {} images", images.len());

        let image_views: Result<Vec<_>> = images
            .iter()
            .map(|&image| {
                let create_info = vk::ImageViewCreateInfo::builder()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(surface_format.format)
                    .components(vk::ComponentMapping::default())
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    });

                unsafe {
                    device
                        .device
                        .create_image_view(&create_info, None)
                        .context("Failed to create image view")
                }
            })
            .collect();

        let image_views = match image_views {
            Ok(views) => views,
            Err(e) => {
                unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
                return Err(e);
            }
        };

        Ok(Self {
            swapchain,
            swapchain_loader,
            image_views,
            format: surface_format.format,
            extent,
            device,
        })
    }

    /// Acquire next image for rendering, signalling `semaphore` when it is ready
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<Acquired> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((index, suboptimal)) => Ok(Acquired::Image { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquired::OutOfDate),
            Err(e) => Err(e).context("Failed to acquire swapchain image"),
        }
    }

    /// Present rendered image to screen. Returns true when the swapchain
    /// should be recreated.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.swapchain_loader.queue_present(queue, &present_info) };

        match result {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(e) => Err(e).context("Failed to present swapchain image"),
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.device.device.destroy_image_view(view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR { format, color_space }
    }

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D { width: u32::MAX, height: u32::MAX },
            min_image_extent: vk::Extent2D { width: 16, height: 16 },
            max_image_extent: vk::Extent2D { width: 4096, height: 2048 },
            ..Default::default()
        }
    }

    #[test]
    fn srgb_format_is_preferred() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(choose_surface_format(&formats), Some(formats[1]));
    }

    #[test]
    fn first_format_when_no_srgb() {
        let formats = [format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR)];
        assert_eq!(choose_surface_format(&formats), Some(formats[0]));
        assert_eq!(choose_surface_format(&[]), None);
    }

    #[test]
    fn present_mode_falls_back_to_fifo() {
        let available = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(
            choose_present_mode(vk::PresentModeKHR::MAILBOX, &available),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(vk::PresentModeKHR::IMMEDIATE, &available),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn fixed_current_extent_wins() {
        let mut c = caps(2, 3);
        c.current_extent = vk::Extent2D { width: 800, height: 600 };
        assert_eq!(choose_extent(&c, 1920, 1080), Some(c.current_extent));
    }

    #[test]
    fn zero_surface_extent_means_nothing_to_draw() {
        let mut c = caps(2, 3);
        c.current_extent = vk::Extent2D { width: 0, height: 0 };
        assert_eq!(choose_extent(&c, 800, 600), None);

        let mut c = caps(2, 3);
        c.min_image_extent = vk::Extent2D { width: 0, height: 0 };
        assert_eq!(choose_extent(&c, 800, 0), None);
    }

    #[test]
    fn free_extent_is_clamped() {
        let c = caps(2, 3);
        assert_eq!(
            choose_extent(&c, 8000, 8),
            Some(vk::Extent2D { width: 4096, height: 16 })
        );
        assert_eq!(
            choose_extent(&c, 800, 600),
            Some(vk::Extent2D { width: 800, height: 600 })
        );
    }

    #[test]
    fn image_count_respects_maximum() {
        assert_eq!(choose_image_count(&caps(2, 0)), 3);
        assert_eq!(choose_image_count(&caps(2, 8)), 3);
        assert_eq!(choose_image_count(&caps(3, 3)), 3);
    }
}

// Texture loading and upload
//
// PNG files are decoded to tightly packed RGBA8, staged through a host-visible
// buffer and copied into a device-local sampled image.

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::path::Path;
use std::sync::Arc;
use super::buffer::Buffer;
use super::commands::CommandPool;
use super::VulkanDevice;

const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Decoded image, 4 bytes per pixel, rows top to bottom
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbaImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl RgbaImage {
    /// Two-tone checkerboard drawn when no texture file is available
    pub fn checkerboard(size: u32, cells: u32) -> Self {
        let size = size.max(1);
        let cell = (size / cells.max(1)).max(1);
        let light = [0xE0, 0xE0, 0xE0, 0xFF];
        let dark = [0x40, 0x20, 0x60, 0xFF];

        let mut pixels = Vec::with_capacity((size * size * 4) as usize);
        for y in 0..size {
            for x in 0..size {
                let texel = if ((x / cell) + (y / cell)) % 2 == 0 { light } else { dark };
                pixels.extend_from_slice(&texel);
            }
        }

        Self { width: size, height: size, pixels }
    }

    pub fn byte_len(&self) -> vk::DeviceSize {
        self.pixels.len() as vk::DeviceSize
    }
}

/// Decode a PNG held in memory into RGBA8
pub fn decode_png(bytes: &[u8]) -> Result<RgbaImage> {
    let mut decoder = png::Decoder::new(std::io::Cursor::new(bytes));
    // Palette -> RGB(A), sub-byte gray -> 8 bit, 16 bit -> 8 bit
    decoder.set_transformations(png::Transformations::normalize_to_color8());

    let mut reader = decoder.read_info().context("Failed to read PNG header")?;
    let mut buf = vec![0; reader.output_buffer_size()];
    let info = reader.next_frame(&mut buf).context("Failed to decode PNG data")?;
    buf.truncate(info.buffer_size());

    let pixels = expand_to_rgba(info.color_type, &buf)?;

    Ok(RgbaImage {
        width: info.width,
        height: info.height,
        pixels,
    })
}

/// Widen 8-bit gray, gray+alpha and RGB samples to RGBA
pub fn expand_to_rgba(color_type: png::ColorType, data: &[u8]) -> Result<Vec<u8>> {
    let pixels = match color_type {
        png::ColorType::Rgba => data.to_vec(),
        png::ColorType::Rgb => data
            .chunks_exact(3)
            .flat_map(|p| [p[0], p[1], p[2], 0xFF])
            .collect(),
        png::ColorType::Grayscale => data.iter().flat_map(|&g| [g, g, g, 0xFF]).collect(),
        png::ColorType::GrayscaleAlpha => data
            .chunks_exact(2)
            .flat_map(|p| [p[0], p[0], p[0], p[1]])
            .collect(),
        png::ColorType::Indexed => anyhow::bail!("Indexed PNG data was not expanded"),
    };

    Ok(pixels)
}

/// Load `path`, or fall back to a checkerboard when the file is absent
pub fn load_image_or_fallback(path: &Path) -> Result<RgbaImage> {
    if !path.exists() {
        log::warn!("Texture {:?} not found, using a checkerboard", path);
        return Ok(RgbaImage::checkerboard(256, 8));
    }

    let bytes = std::fs::read(path).with_context(|| format!("Failed to read texture {:?}", path))?;
    let image = decode_png(&bytes).with_context(|| format!("Failed to decode texture {:?}", path))?;

    log::info!("Loaded texture {:?} ({}x{})", path, image.width, image.height);
    Ok(image)
}

/// Sampled image + view + sampler
pub struct Texture {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub sampler: vk::Sampler,
    pub extent: vk::Extent2D,
    allocation: Option<Allocation>,
    device: Arc<VulkanDevice>,
}

impl Texture {
    pub fn from_rgba(device: Arc<VulkanDevice>, commands: &CommandPool, source: &RgbaImage) -> Result<Self> {
        let extent = vk::Extent2D {
            width: source.width,
            height: source.height,
        };

        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(TEXTURE_FORMAT)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe { device.device.create_image(&image_info, None) }
            .context("Failed to create texture image")?;

        let requirements = unsafe { device.device.get_image_memory_requirements(image) };
        let allocation = device.allocator.lock().allocate(&AllocationCreateDesc {
            name: "texture",
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });

        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_image(image, None) };
                return Err(e).context("Failed to allocate texture memory");
            }
        };

        let bound = unsafe {
            device
                .device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        };

        // Null view/sampler are ignored by the destroy calls in Drop
        let mut texture = Self {
            image,
            view: vk::ImageView::null(),
            sampler: vk::Sampler::null(),
            extent,
            allocation: Some(allocation),
            device: device.clone(),
        };
        bound.context("Failed to bind texture memory")?;

        texture.upload(commands, source)?;
        texture.view = create_view(&device, image)?;
        texture.sampler = create_sampler(&device)?;

        log::info!("Created texture {}x{}", extent.width, extent.height);
        Ok(texture)
    }

    /// Convenience for the renderer: read `path` (or the fallback) and upload it
    pub fn load_or_fallback(device: Arc<VulkanDevice>, commands: &CommandPool, path: &Path) -> Result<Self> {
        let source = load_image_or_fallback(path)?;
        Self::from_rgba(device, commands, &source)
    }

    fn upload(&self, commands: &CommandPool, source: &RgbaImage) -> Result<()> {
        let staging = Buffer::with_data(
            self.device.clone(),
            vk::BufferUsageFlags::TRANSFER_SRC,
            &source.pixels,
            "texture (staging)",
        )?;

        let image = self.image;
        let extent = self.extent;

        commands.submit_once(|device, cmd| unsafe {
            transition_layout(
                device,
                cmd,
                image,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            );

            let region = vk::BufferImageCopy::builder()
                .buffer_offset(0)
                .buffer_row_length(0)
                .buffer_image_height(0)
                .image_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .image_offset(vk::Offset3D::default())
                .image_extent(vk::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: 1,
                })
                .build();

            device.cmd_copy_buffer_to_image(
                cmd,
                staging.buffer,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );

            transition_layout(
                device,
                cmd,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            );
        })?;

        log::debug!("Uploaded {} texture bytes", source.byte_len());
        Ok(())
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_sampler(self.sampler, None);
            self.device.device.destroy_image_view(self.view, None);
        }
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.device.allocator.lock().free(allocation) {
                log::warn!("Failed to free texture memory: {}", e);
            }
        }
        unsafe { self.device.device.destroy_image(self.image, None) };
    }
}

/// Barrier for the two transitions an upload needs
unsafe fn transition_layout(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) {
    let (src_access, dst_access, src_stage, dst_stage) = match (old_layout, new_layout) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => (
            vk::AccessFlags::empty(),
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
        ),
        _ => (
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        ),
    };

    let barrier = vk::ImageMemoryBarrier::builder()
        .src_access_mask(src_access)
        .dst_access_mask(dst_access)
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(color_range())
        .build();

    device.cmd_pipeline_barrier(
        cmd,
        src_stage,
        dst_stage,
        vk::DependencyFlags::empty(),
        &[],
        &[],
        &[barrier],
    );
}

fn color_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

fn create_view(device: &VulkanDevice, image: vk::Image) -> Result<vk::ImageView> {
    let view_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(TEXTURE_FORMAT)
        .subresource_range(color_range());

    unsafe { device.device.create_image_view(&view_info, None) }
        .context("Failed to create texture image view")
}

fn create_sampler(device: &VulkanDevice) -> Result<vk::Sampler> {
    let sampler_info = vk::SamplerCreateInfo::builder()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
        .address_mode_u(vk::SamplerAddressMode::REPEAT)
        .address_mode_v(vk::SamplerAddressMode::REPEAT)
        .address_mode_w(vk::SamplerAddressMode::REPEAT)
        .anisotropy_enable(false)
        .max_anisotropy(1.0)
        .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
        .unnormalized_coordinates(false)
        .compare_enable(false)
        .compare_op(vk::CompareOp::ALWAYS)
        .min_lod(0.0)
        .max_lod(0.0);

    unsafe { device.device.create_sampler(&sampler_info, None) }
        .context("Failed to create texture sampler")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_png(width: u32, height: u32, color: png::ColorType, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut out, width, height);
            encoder.set_color(color);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder.write_header().unwrap();
            writer.write_image_data(data).unwrap();
        }
        out
    }

    #[test]
    fn rgb_gains_opaque_alpha() {
        let rgba = expand_to_rgba(png::ColorType::Rgb, &[1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(rgba, vec![1, 2, 3, 255, 4, 5, 6, 255]);
    }

    #[test]
    fn gray_is_replicated() {
        let rgba = expand_to_rgba(png::ColorType::Grayscale, &[7]).unwrap();
        assert_eq!(rgba, vec![7, 7, 7, 255]);

        let rgba = expand_to_rgba(png::ColorType::GrayscaleAlpha, &[9, 128]).unwrap();
        assert_eq!(rgba, vec![9, 9, 9, 128]);
    }

    #[test]
    fn unexpanded_palette_is_an_error() {
        assert!(expand_to_rgba(png::ColorType::Indexed, &[0]).is_err());
    }

    #[test]
    fn decodes_grayscale_png_to_rgba() {
        let bytes = encode_png(2, 1, png::ColorType::Grayscale, &[0, 200]);
        let image = decode_png(&bytes).unwrap();
        assert_eq!((image.width, image.height), (2, 1));
        assert_eq!(image.pixels, vec![0, 0, 0, 255, 200, 200, 200, 255]);
    }

    #[test]
    fn garbage_is_not_a_png() {
        assert!(decode_png(b"definitely not a png").is_err());
    }

    #[test]
    fn checkerboard_alternates_cells() {
        let board = RgbaImage::checkerboard(4, 2);
        assert_eq!((board.width, board.height), (4, 4));
        assert_eq!(board.byte_len(), 64);

        let texel = |x: usize, y: usize| &board.pixels[(y * 4 + x) * 4..(y * 4 + x) * 4 + 4];
        assert_eq!(texel(0, 0), texel(1, 1));
        assert_ne!(texel(0, 0), texel(2, 0));
        assert_ne!(texel(0, 0), texel(0, 2));
        assert_eq!(texel(0, 0), texel(2, 2));
    }

    #[test]
    fn checkerboard_tolerates_zero_sizes() {
        let board = RgbaImage::checkerboard(0, 0);
        assert_eq!((board.width, board.height), (1, 1));
        assert_eq!(board.pixels.len(), 4);
    }

    #[test]
    fn missing_texture_uses_fallback() {
        let image = load_image_or_fallback(Path::new("assets/no-such-texture.png")).unwrap();
        assert_eq!((image.width, image.height), (256, 256));
    }
}

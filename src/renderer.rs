// =============================================================================
// RENDERER - Every Vulkan object the app owns, and the frame loop
// =============================================================================
//
// SETUP ORDER:
//   device (instance + surface + queues) -> swapchain -> render pass
//   -> framebuffers -> command buffers -> quad buffers -> texture
//   -> descriptor set -> pipeline -> sync objects
//
// FRAME FLOW:
//   wait fence -> acquire image -> record -> submit -> present -> next slot
//
// Teardown is the reverse: every object sits in a wrapper that destroys it
// on drop, the fields drop in declaration order and the device goes last.

use anyhow::{Context, Result};
use ash::vk;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use winit::window::Window;

use crate::backend::buffer::Buffer;
use crate::backend::commands::CommandPool;
use crate::backend::pipeline::{Framebuffers, GraphicsPipeline, RenderPass, TextureDescriptor};
use crate::backend::shader::ShaderPair;
use crate::backend::swapchain::Acquired;
use crate::backend::sync::{FrameRing, FrameSync, PresentSemaphores};
use crate::backend::texture::Texture;
use crate::backend::{Swapchain, VulkanDevice};
use crate::config::Config;
use crate::geometry::{self, QUAD_INDICES, QUAD_VERTICES};
use crate::hot_reload::ShaderWatcher;

/// The slice of the configuration the renderer keeps after startup
#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub present_mode: vk::PresentModeKHR,
    pub clear_color: [f32; 4],
    pub rotation_speed: f32,
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
    pub texture: PathBuf,
    pub frames_in_flight: usize,
}

impl RenderSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            present_mode: config.present_mode(),
            clear_color: config.graphics.clear_color,
            rotation_speed: config.animation.rotation_speed,
            vertex_shader: config.assets.vertex_shader.clone(),
            fragment_shader: config.assets.fragment_shader.clone(),
            texture: config.assets.texture.clone(),
            frames_in_flight: config.frames_in_flight(),
        }
    }
}

pub struct Renderer {
    settings: RenderSettings,
    window: Arc<Window>,

    // Per swapchain; framebuffers go before the views and render pass they use
    framebuffers: Option<Framebuffers>,
    present_semaphores: PresentSemaphores,
    swapchain: Option<Swapchain>,

    pipeline: GraphicsPipeline,
    render_pass: RenderPass,
    descriptor: TextureDescriptor,

    // Referenced only through the descriptor set
    _texture: Texture,
    vertex_buffer: Buffer,
    index_buffer: Buffer,

    // One command buffer and one sync slot per frame in flight
    command_buffers: Vec<vk::CommandBuffer>,
    _commands: CommandPool,
    frame_sync: Vec<FrameSync>,
    frames: FrameRing,

    shader_watcher: Option<ShaderWatcher>,
    started: Instant,

    /// Set when the window is resized or the swapchain reports out of date
    needs_recreate: bool,
    /// Set while the window has a zero-sized surface
    is_minimized: bool,

    device: Arc<VulkanDevice>,
}

impl Renderer {
    /// Every object is owned by a wrapper as soon as it exists, so an error
    /// part way through drops what was already created, device last.
    pub fn new(config: &Config, window: Arc<Window>) -> Result<Self> {
        log::info!("Initializing Vulkan...");
        let settings = RenderSettings::from_config(config);

        let enable_validation = cfg!(debug_assertions) && config.debug.validation_layers;
        let device = VulkanDevice::new(&config.window.title, enable_validation, &window)?;

        // A freshly created window reports its real size; fall back to the
        // configured one if the platform hasn't mapped it yet
        let size = window.inner_size();
        let (width, height) = if size.width == 0 || size.height == 0 {
            (config.window.width, config.window.height)
        } else {
            (size.width, size.height)
        };

        let swapchain = Swapchain::new(device.clone(), width, height, settings.present_mode)?;
        let render_pass = RenderPass::new(device.clone(), swapchain.format)?;
        let framebuffers = Framebuffers::new(
            device.clone(),
            &swapchain.image_views,
            render_pass.handle,
            swapchain.extent,
        )?;
        let present_semaphores = PresentSemaphores::new(device.clone(), swapchain.image_views.len())?;

        let frames = FrameRing::new(settings.frames_in_flight);
        let commands = CommandPool::new(device.clone(), device.queue_families.graphics)?;
        let slot_count = u32::try_from(frames.slots()).context("Too many frames in flight")?;
        let command_buffers = commands.allocate(slot_count)?;

        let vertex_buffer = Buffer::device_local_with_data(
            device.clone(),
            &commands,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            &QUAD_VERTICES,
            "quad vertices",
        )?;
        let index_buffer = Buffer::device_local_with_data(
            device.clone(),
            &commands,
            vk::BufferUsageFlags::INDEX_BUFFER,
            &QUAD_INDICES,
            "quad indices",
        )?;

        let texture = Texture::load_or_fallback(device.clone(), &commands, &settings.texture)?;
        let descriptor = TextureDescriptor::new(device.clone(), texture.view, texture.sampler)?;

        let pipeline = build_pipeline(&device, &settings, render_pass.handle, descriptor.set_layout)?;

        let frame_sync = (0..frames.slots())
            .map(|_| FrameSync::new(device.clone()))
            .collect::<Result<Vec<_>>>()?;

        let shader_watcher = if config.debug.hot_reload {
            match ShaderWatcher::new(&[settings.vertex_shader.as_path(), settings.fragment_shader.as_path()]) {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    log::warn!("Shader hot reload disabled: {:#}", e);
                    None
                }
            }
        } else {
            None
        };

        log::info!("Vulkan initialized successfully!");

        Ok(Self {
            settings,
            window,
            framebuffers: Some(framebuffers),
            present_semaphores,
            swapchain: Some(swapchain),
            pipeline,
            render_pass,
            descriptor,
            _texture: texture,
            vertex_buffer,
            index_buffer,
            command_buffers,
            _commands: commands,
            frame_sync,
            frames,
            shader_watcher,
            started: Instant::now(),
            needs_recreate: false,
            is_minimized: false,
            device,
        })
    }

    /// Note a new window size; the swapchain is rebuilt before the next frame
    pub fn resize(&mut self, width: u32, height: u32) {
        log::debug!("Window resized to {}x{}", width, height);

        if width == 0 || height == 0 {
            self.is_minimized = true;
        } else {
            self.is_minimized = false;
            self.needs_recreate = true;
        }
    }

    pub fn request_recreate(&mut self) {
        self.needs_recreate = true;
    }

    pub fn wait_idle(&self) -> Result<()> {
        self.device.wait_idle()
    }

    // =========================================================================
    // RENDER LOOP
    // =========================================================================

    /// Draw one frame. Returns false when nothing was presented (minimized,
    /// or the swapchain had to be rebuilt first).
    pub fn draw_frame(&mut self) -> Result<bool> {
        if self.shader_watcher.as_ref().is_some_and(|w| w.take_pending()) {
            self.reload_shaders()?;
        }

        if self.is_minimized {
            return Ok(false);
        }

        if self.needs_recreate {
            self.recreate_swapchain()?;
            if self.is_minimized || self.needs_recreate {
                return Ok(false);
            }
        }

        let slot = self.frames.current();

        // A failed frame left this slot's fence or semaphore with nothing
        // pending to signal it
        if self.frames.take_current_stale() {
            if let Err(e) = self.rebuild_frame_sync(slot) {
                self.frames.mark_current_stale();
                return Err(e);
            }
        }

        let image_available = self.frame_sync[slot].image_available;
        let in_flight = self.frame_sync[slot].in_flight_fence;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Wait until the GPU is done with this slot
        // ─────────────────────────────────────────────────────────────────────
        unsafe {
            self.device
                .device
                .wait_for_fences(&[in_flight], true, u64::MAX)
                .context("Failed waiting for frame fence")?;
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Acquire next swapchain image
        // ─────────────────────────────────────────────────────────────────────
        let swapchain = self.swapchain.as_ref().context("Swapchain not initialized")?;

        let image_index = match swapchain.acquire_next_image(image_available)? {
            Acquired::Image { index, suboptimal } => {
                if suboptimal {
                    self.needs_recreate = true;
                }
                index
            }
            Acquired::OutOfDate => {
                // Fence stays signaled, so the next attempt won't block
                self.needs_recreate = true;
                return Ok(false);
            }
        };

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Record and submit
        // ─────────────────────────────────────────────────────────────────────
        let render_finished = match self.submit_frame(slot, image_index) {
            Ok(semaphore) => semaphore,
            Err(e) => {
                // The acquired image is never presented
                self.frames.mark_current_stale();
                self.needs_recreate = true;
                return Err(e);
            }
        };

        // ─────────────────────────────────────────────────────────────────────
        // STEP 4: Present
        // ─────────────────────────────────────────────────────────────────────
        let swapchain = self.swapchain.as_ref().context("Swapchain not initialized")?;
        let stale = swapchain.present(self.device.present_queue, image_index, &[render_finished])?;
        if stale {
            self.needs_recreate = true;
        }

        self.frames.advance();
        Ok(true)
    }

    /// Record this slot's command buffer, then reset its fence and submit.
    /// Returns the semaphore the present has to wait on.
    fn submit_frame(&self, slot: usize, image_index: u32) -> Result<vk::Semaphore> {
        let swapchain = self.swapchain.as_ref().context("Swapchain not initialized")?;
        let sync = &self.frame_sync[slot];
        let cmd = self.command_buffers[slot];
        let render_finished = self.present_semaphores.get(image_index)?;

        self.record_commands(cmd, swapchain, image_index)?;

        // Only reset once the work that signals it is ready to go
        unsafe { self.device.device.reset_fences(&[sync.in_flight_fence]) }?;

        let wait_semaphores = [sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [render_finished];
        let command_buffers = [cmd];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device
                .device
                .queue_submit(self.device.graphics_queue, &[submit_info.build()], sync.in_flight_fence)
                .context("Failed to submit draw commands")?;
        }

        Ok(render_finished)
    }

    fn rebuild_frame_sync(&mut self, slot: usize) -> Result<()> {
        log::warn!("Rebuilding sync objects for frame slot {}", slot);
        self.device.wait_idle()?;
        self.frame_sync[slot] = FrameSync::new(self.device.clone())?;
        Ok(())
    }

    fn record_commands(&self, cmd: vk::CommandBuffer, swapchain: &Swapchain, image_index: u32) -> Result<()> {
        let device = &self.device.device;
        let extent = swapchain.extent;
        let framebuffer = self
            .framebuffers
            .as_ref()
            .and_then(|f| f.get(image_index))
            .context("No framebuffer for acquired image")?;

        let transform = geometry::quad_transform(
            self.started.elapsed().as_secs_f32(),
            self.settings.rotation_speed,
            geometry::aspect_ratio(extent),
        );

        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: self.settings.clear_color,
            },
        }];

        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };

        unsafe {
            device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;

            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device.begin_command_buffer(cmd, &begin_info)?;

            let pass_info = vk::RenderPassBeginInfo::builder()
                .render_pass(self.render_pass.handle)
                .framebuffer(framebuffer)
                .render_area(render_area)
                .clear_values(&clear_values);
            device.cmd_begin_render_pass(cmd, &pass_info, vk::SubpassContents::INLINE);

            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline.pipeline);
            device.cmd_set_viewport(cmd, 0, &[viewport]);
            device.cmd_set_scissor(cmd, 0, &[render_area]);

            device.cmd_bind_vertex_buffers(cmd, 0, &[self.vertex_buffer.buffer], &[0]);
            device.cmd_bind_index_buffer(cmd, self.index_buffer.buffer, 0, vk::IndexType::UINT16);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline.layout,
                0,
                &[self.descriptor.set],
                &[],
            );
            device.cmd_push_constants(
                cmd,
                self.pipeline.layout,
                vk::ShaderStageFlags::VERTEX,
                0,
                bytemuck::bytes_of(&transform),
            );

            device.cmd_draw_indexed(cmd, QUAD_INDICES.len() as u32, 1, 0, 0, 0);

            device.cmd_end_render_pass(cmd);
            device.end_command_buffer(cmd)?;
        }

        Ok(())
    }

    // =========================================================================
    // RECREATION
    // =========================================================================

    /// Rebuild the swapchain and framebuffers for the current window size.
    /// The render pass and pipeline only change if the surface format did.
    fn recreate_swapchain(&mut self) -> Result<()> {
        let size = self.window.inner_size();
        if size.width == 0 || size.height == 0 {
            self.is_minimized = true;
            return Ok(());
        }

        // The window can have a size while its surface has none; keep
        // needs_recreate set and try again next frame
        if Swapchain::surface_extent(&self.device, size.width, size.height)?.is_none() {
            log::debug!("Surface has zero extent, postponing swapchain rebuild");
            return Ok(());
        }

        self.device.wait_idle()?;

        self.framebuffers = None;
        let old_format = self.swapchain.as_ref().map(|s| s.format);

        // The surface can only have one swapchain at a time
        self.swapchain = None;

        let swapchain = Swapchain::new(
            self.device.clone(),
            size.width,
            size.height,
            self.settings.present_mode,
        )?;

        if old_format != Some(swapchain.format) {
            log::info!("Surface format changed to {:?}, rebuilding pipeline", swapchain.format);
            let render_pass = RenderPass::new(self.device.clone(), swapchain.format)?;
            self.pipeline = build_pipeline(&self.device, &self.settings, render_pass.handle, self.descriptor.set_layout)?;
            self.render_pass = render_pass;
        }

        self.present_semaphores = PresentSemaphores::new(self.device.clone(), swapchain.image_views.len())?;
        self.framebuffers = Some(Framebuffers::new(
            self.device.clone(),
            &swapchain.image_views,
            self.render_pass.handle,
            swapchain.extent,
        )?);

        self.swapchain = Some(swapchain);
        self.needs_recreate = false;
        self.is_minimized = false;

        Ok(())
    }

    /// Reload SPIR-V from disk and swap in a new pipeline. A broken shader
    /// leaves the current pipeline in place.
    pub fn reload_shaders(&mut self) -> Result<()> {
        log::info!("Reloading shaders...");
        self.device.wait_idle()?;

        match build_pipeline(&self.device, &self.settings, self.render_pass.handle, self.descriptor.set_layout) {
            Ok(pipeline) => {
                self.pipeline = pipeline;
                log::info!("Shaders reloaded");
            }
            Err(e) => log::error!("Shader reload failed, keeping previous pipeline: {:#}", e),
        }

        Ok(())
    }
}

/// Shader modules are only needed while the pipeline is created
fn build_pipeline(
    device: &Arc<VulkanDevice>,
    settings: &RenderSettings,
    render_pass: vk::RenderPass,
    set_layout: vk::DescriptorSetLayout,
) -> Result<GraphicsPipeline> {
    let shaders = ShaderPair::load(device.clone(), &settings.vertex_shader, &settings.fragment_shader)?;
    GraphicsPipeline::new(device.clone(), render_pass, set_layout, &shaders)
}

// =============================================================================
// CLEANUP
// =============================================================================

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");

        // Wait for GPU to finish before destroying anything; the wrappers
        // then drop in field order with the device Arc last
        let _ = self.device.wait_idle();
    }
}

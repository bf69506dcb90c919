// =============================================================================
// HOME INVASION - Vulkan bootstrap drawing a textured quad
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit event loop (window, input, resize)                       │
// │    └── Renderer                                                 │
// │          └── Vulkan Device + Surface + Swapchain                │
// │                └── Pipeline, quad buffers, texture              │
// │                      └── Synchronization (fences, semaphores)   │
// └─────────────────────────────────────────────────────────────────┘
//
// =============================================================================

mod backend;
mod config;
mod geometry;
mod hot_reload;
mod renderer;

use anyhow::Result;
use config::Config;
use renderer::Renderer;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Fullscreen, Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let (config, config_error) = Config::load();

    init_logging(&config);
    if let Some(e) = config_error {
        log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
    }
    log::debug!("Config: {:?}", config);
    log::info!("Starting home invasion");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    // Setup failures end the loop early; surface them as the exit status
    match app.init_error.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Configured level, overridable through RUST_LOG
fn init_logging(config: &Config) {
    env_logger::Builder::new()
        .filter_level(config.log_level())
        .parse_default_env()
        .init();
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Field order matters for Drop: the renderer (and its surface) must go
/// before the window it presents to.
struct App {
    config: Config,
    renderer: Option<Renderer>,
    window: Option<Arc<Window>>,
    is_fullscreen: bool,
    init_error: Option<anyhow::Error>,

    // FPS tracking
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        let is_fullscreen = config.window.fullscreen;
        let now = Instant::now();
        Self {
            config,
            renderer: None,
            window: None,
            is_fullscreen,
            init_error: None,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    fn toggle_fullscreen(&mut self) {
        if let Some(ref window) = self.window {
            self.is_fullscreen = !self.is_fullscreen;

            if self.is_fullscreen {
                window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                log::info!("Entered fullscreen mode");
            } else {
                window.set_fullscreen(None);
                log::info!("Exited fullscreen mode");
            }

            if let Some(ref mut renderer) = self.renderer {
                renderer.request_recreate();
            }
        }
    }

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        // Update title every second
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;

            if let Some(ref window) = self.window {
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms)",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0
                ));
            }

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }

    fn shut_down(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(ref renderer) = self.renderer {
            if let Err(e) = renderer.wait_idle() {
                log::warn!("Device did not go idle: {:#}", e);
            }
        }
        event_loop.exit();
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ))
            .with_resizable(self.config.window.resizable);

        if self.config.window.fullscreen {
            window_attributes = window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {}", e);
                self.init_error = Some(e.into());
                event_loop.exit();
                return;
            }
        };

        match Renderer::new(&self.config, window.clone()) {
            Ok(renderer) => self.renderer = Some(renderer),
            Err(e) => {
                log::error!("Failed to initialize Vulkan: {:#}", e);
                self.init_error = Some(e);
                event_loop.exit();
                return;
            }
        }

        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.shut_down(event_loop);
            }

            WindowEvent::Resized(size) => {
                if let Some(ref mut renderer) = self.renderer {
                    renderer.resize(size.width, size.height);
                }
            }

            WindowEvent::RedrawRequested => {
                let Some(ref mut renderer) = self.renderer else {
                    return;
                };

                match renderer.draw_frame() {
                    Ok(true) => self.update_fps(),
                    Ok(false) => {}
                    // A single bad frame is logged, the loop carries on
                    Err(e) => log::error!("Render error: {:#}", e),
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if !event.state.is_pressed() || event.repeat {
                    return;
                }

                if let PhysicalKey::Code(key) = event.physical_key {
                    match key {
                        KeyCode::Escape => {
                            log::info!("ESC pressed, exiting...");
                            self.shut_down(event_loop);
                        }
                        KeyCode::F11 => self.toggle_fullscreen(),
                        KeyCode::F5 => {
                            if let Some(ref mut renderer) = self.renderer {
                                if let Err(e) = renderer.reload_shaders() {
                                    log::error!("Shader reload failed: {:#}", e);
                                }
                            }
                        }
                        _ => {}
                    }
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws so the quad keeps animating
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

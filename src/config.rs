// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every section and key is optional. A missing file means defaults; a broken
// file is reported and also falls back to defaults.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Upper bound on `graphics.max_frames_in_flight`
pub const MAX_FRAMES_IN_FLIGHT: usize = 8;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub assets: AssetsConfig,
    pub animation: AnimationConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "home invasion".to_string(),
            width: 800,
            height: 600,
            resizable: true,
            fullscreen: false,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub present_mode: String,
    pub clear_color: [f32; 4],
    pub max_frames_in_flight: usize,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "fifo".to_string(),
            clear_color: [0.02, 0.02, 0.05, 1.0],
            max_frames_in_flight: 2,
        }
    }
}

/// Files read at startup, relative to the working directory
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AssetsConfig {
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
    pub texture: PathBuf,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            vertex_shader: PathBuf::from("shaders/quad.vert.spv"),
            fragment_shader: PathBuf::from("shaders/quad.frag.spv"),
            texture: PathBuf::from("assets/texture.png"),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AnimationConfig {
    /// Radians per second around the view axis
    pub rotation_speed: f32,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            rotation_speed: 0.25,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_level: String,
    pub show_fps: bool,
    pub hot_reload: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_level: "info".to_string(),
            show_fps: true,
            hot_reload: true,
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    /// Load `config.toml` from the working directory. The logger is not set
    /// up yet at this point, so a load failure is handed back for the caller
    /// to report once it is.
    pub fn load() -> (Self, Option<anyhow::Error>) {
        Self::load_or_default("config.toml")
    }

    pub fn load_or_default<P: AsRef<Path>>(path: P) -> (Self, Option<anyhow::Error>) {
        match Self::load_from_path(path) {
            Ok(config) => (config, None),
            Err(e) => (Config::default(), Some(e)),
        }
    }

    /// Load configuration from a specific path; a missing file is not an error
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::parse(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Get present mode as Vulkan enum
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => vk::PresentModeKHR::MAILBOX,
            "fifo" => vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to FIFO",
                    self.graphics.present_mode
                );
                vk::PresentModeKHR::FIFO
            }
        }
    }

    /// Number of frames the CPU may record ahead of the GPU, never zero
    pub fn frames_in_flight(&self) -> usize {
        self.graphics.max_frames_in_flight.clamp(1, MAX_FRAMES_IN_FLIGHT)
    }

    pub fn log_level(&self) -> log::LevelFilter {
        self.debug.log_level.parse().unwrap_or(log::LevelFilter::Info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.window.title, "home invasion");
        assert_eq!((config.window.width, config.window.height), (800, 600));
        assert!(config.window.resizable);
        assert_eq!(config.frames_in_flight(), 2);
        assert_eq!(config.assets.vertex_shader, PathBuf::from("shaders/quad.vert.spv"));
        assert_eq!(config.present_mode(), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = Config::parse(
            r#"
            [window]
            width = 1024

            [graphics]
            present_mode = "Mailbox"
            "#,
        )
        .unwrap();

        assert_eq!(config.window.width, 1024);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.present_mode(), vk::PresentModeKHR::MAILBOX);
        assert_eq!(config.graphics.clear_color, GraphicsConfig::default().clear_color);
    }

    #[test]
    fn unknown_present_mode_falls_back_to_fifo() {
        let config = Config::parse("[graphics]\npresent_mode = \"vsync-ish\"").unwrap();
        assert_eq!(config.present_mode(), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn zero_frames_in_flight_is_clamped() {
        let config = Config::parse("[graphics]\nmax_frames_in_flight = 0").unwrap();
        assert_eq!(config.frames_in_flight(), 1);
    }

    #[test]
    fn huge_frames_in_flight_is_capped() {
        let config = Config::parse("[graphics]\nmax_frames_in_flight = 1000000").unwrap();
        assert_eq!(config.frames_in_flight(), MAX_FRAMES_IN_FLIGHT);
    }

    #[test]
    fn log_level_parses_or_defaults_to_info() {
        let config = Config::parse("[debug]\nlog_level = \"trace\"").unwrap();
        assert_eq!(config.log_level(), log::LevelFilter::Trace);

        let config = Config::parse("[debug]\nlog_level = \"loud\"").unwrap();
        assert_eq!(config.log_level(), log::LevelFilter::Info);
    }

    #[test]
    fn wrong_types_are_rejected() {
        assert!(Config::parse("[window]\nwidth = \"wide\"").is_err());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let path = std::env::temp_dir().join("home-invasion-no-such-config.toml");
        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.window.title, "home invasion");
    }

    #[test]
    fn broken_file_falls_back_and_reports_why() {
        let path = std::env::temp_dir()
            .join(format!("home-invasion-broken-config-{}.toml", std::process::id()));
        std::fs::write(&path, "[window]\nwidth = \"wide\"\n").unwrap();

        let (config, error) = Config::load_or_default(&path);
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.window.width, 800);
        let message = format!("{:#}", error.expect("parse error should be reported"));
        assert!(message.contains("Failed to parse config file"), "{}", message);
    }

    #[test]
    fn missing_file_reports_nothing() {
        let path = std::env::temp_dir().join("home-invasion-no-such-config.toml");
        let (config, error) = Config::load_or_default(&path);
        assert!(error.is_none());
        assert_eq!(config.window.title, "home invasion");
    }

    #[test]
    fn shipped_config_parses() {
        let content = include_str!("../config.toml");
        let config = Config::parse(content).unwrap();
        assert_eq!(config.animation.rotation_speed, 0.25);
        assert!(config.debug.hot_reload);
    }
}

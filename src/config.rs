// Configuration - settings from config.toml
//
// Provides full defaults when the file is missing or malformed.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Vulkan Primer".to_string(),
            width: 1280,
            height: 720,
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
            present_mode: "mailbox".to_string(),
            clear_color: [0.1, 0.2, 0.8, 1.0],
            max_frames_in_flight: 2,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            show_fps: true,
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config.validated())
    }

    /// Enforce bounds a parsed file may violate.
    fn validated(mut self) -> Self {
        if self.graphics.max_frames_in_flight == 0 {
            log::warn!("max_frames_in_flight must be at least 1, using 1");
            self.graphics.max_frames_in_flight = 1;
        }
        self
    }

    /// Get present mode as Vulkan enum
    pub fn get_present_mode(&self) -> ash::vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => ash::vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => ash::vk::PresentModeKHR::MAILBOX,
            "fifo" => ash::vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => ash::vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to FIFO",
                    self.graphics.present_mode
                );
                ash::vk::PresentModeKHR::FIFO
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.window.height, 720);
        assert!(!config.window.fullscreen);
        assert_eq!(config.graphics.max_frames_in_flight, 2);
        assert!(config.debug.validation_layers);
    }

    #[test]
    fn partial_toml_keeps_defaults_for_the_rest() {
        let config: Config = toml::from_str(
            r#"
            [window]
            width = 640
            height = 480

            [graphics]
            present_mode = "fifo"
            "#,
        )
        .unwrap();

        assert_eq!(config.window.width, 640);
        assert_eq!(config.window.title, "Vulkan Primer");
        assert_eq!(config.graphics.present_mode, "fifo");
        assert_eq!(config.graphics.max_frames_in_flight, 2);
    }

    #[test]
    fn present_mode_strings_map_to_vulkan_enums() {
        let mut config = Config::default();

        for (name, mode) in [
            ("immediate", ash::vk::PresentModeKHR::IMMEDIATE),
            ("MAILBOX", ash::vk::PresentModeKHR::MAILBOX),
            ("fifo", ash::vk::PresentModeKHR::FIFO),
            ("fifo_relaxed", ash::vk::PresentModeKHR::FIFO_RELAXED),
        ] {
            config.graphics.present_mode = name.to_string();
            assert_eq!(config.get_present_mode(), mode);
        }
    }

    #[test]
    fn unknown_present_mode_falls_back_to_fifo() {
        let mut config = Config::default();
        config.graphics.present_mode = "vsync_maybe".to_string();
        assert_eq!(config.get_present_mode(), ash::vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn zero_frames_in_flight_is_clamped_to_one() {
        let config: Config = toml::from_str(
            r#"
            [graphics]
            max_frames_in_flight = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.validated().graphics.max_frames_in_flight, 1);
    }

    #[test]
    fn missing_file_loads_defaults() {
        let config = Config::load_from_path("definitely/not/here.toml").unwrap();
        assert_eq!(config.window.width, 1280);
    }
}

//! Configuration loaded from `framepace.toml`.
//!
//! Every section falls back to defaults field by field, so a partial file
//! only overrides what it names. A missing file is not an error.

use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::Result;

/// Environment variable naming an alternative config file.
pub const CONFIG_ENV: &str = "FRAMEPACE_CONFIG";

/// Default config file name, resolved against the working directory.
pub const CONFIG_FILE: &str = "framepace.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub renderer: RendererConfig,
    pub frame: FrameConfig,
    pub log: LogConfig,
}

/// Window settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "framepace".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

/// Renderer settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RendererConfig {
    /// Enable the Khronos validation layer and debug messenger.
    pub validation: bool,
    /// Use mailbox presentation when the surface offers it.
    pub prefer_mailbox: bool,
    pub clear_color: [f32; 4],
    /// Directory holding the compiled `.spv` shader blobs.
    pub shader_dir: String,
    /// Fence wait timeout at the top of a frame. `None` waits forever.
    pub fence_timeout_ms: Option<u64>,
}

impl RendererConfig {
    /// Fence timeout in nanoseconds as the driver expects it.
    pub fn fence_timeout_ns(&self) -> u64 {
        self.fence_timeout_ms
            .map_or(u64::MAX, |ms| ms.saturating_mul(1_000_000))
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            validation: cfg!(debug_assertions),
            prefer_mailbox: true,
            clear_color: [0.0, 0.0, 0.2, 1.0],
            shader_dir: "assets/shaders".to_string(),
            fence_timeout_ms: None,
        }
    }
}

/// Application loop pacing.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct FrameConfig {
    /// Target frames per second; 0 disables the sleep.
    pub target_fps: u32,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self { target_fps: 60 }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// Fallback filter directive when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: crate::logging::DEFAULT_FILTER.to_string(),
        }
    }
}

impl Config {
    /// Load from `$FRAMEPACE_CONFIG`, or `framepace.toml` in the working directory.
    pub fn load() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load_from_path(path),
            None => Self::load_from_path(CONFIG_FILE),
        }
    }

    /// Load configuration from a specific path, using defaults if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config = Self::parse(&content)?;
        debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_empty_is_default() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = Config::parse(
            r#"
            [window]
            width = 240

            [renderer]
            fence_timeout_ms = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.window.width, 240);
        assert_eq!(config.window.height, 720);
        assert_eq!(config.window.title, "framepace");
        assert_eq!(config.renderer.fence_timeout_ns(), 5_000_000);
        assert!(config.renderer.prefer_mailbox);
        assert_eq!(config.frame.target_fps, 60);
    }

    #[test]
    fn test_unbounded_fence_timeout() {
        assert_eq!(RendererConfig::default().fence_timeout_ns(), u64::MAX);
    }

    #[test]
    fn test_malformed_is_config_error() {
        let err = Config::parse("[window]\nwidth = \"wide\"").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let path = std::env::temp_dir().join("framepace-does-not-exist.toml");
        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("framepace-{}.toml", std::process::id()));
        std::fs::write(&path, "[frame]\ntarget_fps = 0\n").unwrap();
        let config = Config::load_from_path(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(config.frame.target_fps, 0);
    }
}

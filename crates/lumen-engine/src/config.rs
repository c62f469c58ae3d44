//! Engine configuration.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::caps::MAX_FRAME_OVERLAP;
use crate::error::{EngineError, Result};

/// Engine configuration.
///
/// Every field has a default, so a TOML file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Window title.
    pub title: String,
    /// Initial window width.
    pub width: u32,
    /// Initial window height.
    pub height: u32,
    /// Enable vsync (FIFO presentation).
    pub vsync: bool,
    /// Enable Vulkan validation layers (default: debug builds only).
    pub validation: bool,
    /// Preferred frames in flight. Renderers may override; always clamped.
    pub frame_overlap: u32,
    /// Target frames per second (None for unlimited).
    pub target_fps: Option<u32>,
    /// Upper bound on any single GPU wait before the device is considered lost.
    pub gpu_timeout_ms: u64,
    /// Poll interval while the window is minimized.
    pub minimized_poll_ms: u64,
    /// Measure GPU frame time with timestamp queries.
    pub gpu_timestamps: bool,
    /// Reload renderer assets on F5.
    pub hot_reload: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            title: "Lumen".to_string(),
            width: 1280,
            height: 720,
            vsync: true,
            validation: cfg!(debug_assertions),
            frame_overlap: 2,
            target_fps: None,
            gpu_timeout_ms: 5_000,
            minimized_poll_ms: 100,
            gpu_timestamps: false,
            hot_reload: true,
        }
    }
}

impl EngineConfig {
    /// Create a new config with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Parse a config from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.gpu_timeout_ms == 0 {
            return Err(EngineError::Config("gpu_timeout_ms must be positive".to_string()));
        }
        if self.target_fps == Some(0) {
            return Err(EngineError::Config("target_fps must be positive".to_string()));
        }
        if self.frame_overlap as usize > MAX_FRAME_OVERLAP {
            tracing::warn!(
                "frame_overlap {} exceeds {MAX_FRAME_OVERLAP}, it will be clamped",
                self.frame_overlap
            );
        }
        Ok(())
    }

    /// Set the window dimensions.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set the target FPS.
    pub fn with_target_fps(mut self, fps: u32) -> Self {
        self.target_fps = Some(fps);
        self
    }

    /// Enable or disable vsync.
    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    /// Enable or disable validation layers.
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    /// Set the preferred number of frames in flight.
    pub fn with_frame_overlap(mut self, frames: u32) -> Self {
        self.frame_overlap = frames;
        self
    }

    /// Enable or disable GPU timestamp queries.
    pub fn with_gpu_timestamps(mut self, enabled: bool) -> Self {
        self.gpu_timestamps = enabled;
        self
    }

    /// Target frame duration, if a target FPS is set.
    pub fn target_frame_time(&self) -> Option<Duration> {
        self.target_fps
            .filter(|&fps| fps > 0)
            .map(|fps| Duration::from_nanos(1_000_000_000 / u64::from(fps)))
    }

    /// Poll interval while minimized.
    pub fn minimized_poll(&self) -> Duration {
        Duration::from_millis(self.minimized_poll_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            title = "Demo"
            vsync = false
            target_fps = 144
            "#,
        )
        .unwrap();
        assert_eq!(config.title, "Demo");
        assert!(!config.vsync);
        assert_eq!(config.width, 1280);
        assert_eq!(config.frame_overlap, 2);
        assert_eq!(
            config.target_frame_time(),
            Some(Duration::from_nanos(1_000_000_000 / 144))
        );
    }

    #[test]
    fn rejects_unknown_and_invalid_keys() {
        assert!(matches!(
            EngineConfig::from_toml_str("colour = 3"),
            Err(EngineError::Config(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml_str("gpu_timeout_ms = 0"),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn builder_chain() {
        let config = EngineConfig::new("x")
            .with_size(640, 480)
            .with_vsync(false)
            .with_frame_overlap(3)
            .with_gpu_timestamps(true);
        assert_eq!((config.width, config.height), (640, 480));
        assert_eq!(config.frame_overlap, 3);
        assert!(config.gpu_timestamps);
        assert_eq!(config.target_frame_time(), None);
    }

    #[test]
    fn missing_file_is_config_error() {
        assert!(matches!(
            EngineConfig::load("/nonexistent/lumen.toml"),
            Err(EngineError::Config(_))
        ));
    }
}

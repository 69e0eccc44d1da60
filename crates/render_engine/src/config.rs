//! Renderer configuration
//!
//! Applications customize the renderer through [`RendererConfig`], either
//! programmatically with the builder methods or from a TOML file. Values are
//! validated before the renderer accepts them.

use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_app_name() -> String {
    "render_engine application".to_string()
}

fn default_version() -> (u32, u32, u32) {
    (1, 0, 0)
}

fn default_vsync() -> bool {
    true
}

fn default_clear_color() -> [f32; 3] {
    [0.005, 0.005, 0.005]
}

fn default_frames_in_flight() -> usize {
    2
}

fn default_vertex_capacity() -> u64 {
    16 * 1024 * 1024
}

fn default_index_capacity() -> u64 {
    4 * 1024 * 1024
}

fn default_object_capacity() -> u32 {
    64
}

fn default_max_render_objects() -> u32 {
    1024
}

/// Configuration for the Vulkan renderer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendererConfig {
    /// Application name for instance creation
    #[serde(default = "default_app_name")]
    pub application_name: String,
    /// Application version (major, minor, patch)
    #[serde(default = "default_version")]
    pub application_version: (u32, u32, u32),
    /// Whether presentation waits for vertical sync
    #[serde(default = "default_vsync")]
    pub vsync: bool,
    /// Background clear color (RGB, 0.0-1.0)
    #[serde(default = "default_clear_color")]
    pub clear_color: [f32; 3],
    /// Maximum frames in flight
    #[serde(default = "default_frames_in_flight")]
    pub max_frames_in_flight: usize,
    /// Validation layer toggle; `None` auto-detects from the build type
    #[serde(default)]
    pub enable_validation: Option<bool>,
    /// Shared vertex buffer capacity in bytes
    #[serde(default = "default_vertex_capacity")]
    pub vertex_buffer_capacity: u64,
    /// Shared index buffer capacity in bytes
    #[serde(default = "default_index_capacity")]
    pub index_buffer_capacity: u64,
    /// Initial dynamic uniform slots; grows on demand
    #[serde(default = "default_object_capacity")]
    pub initial_object_capacity: u32,
    /// Descriptor pool budget for render objects
    #[serde(default = "default_max_render_objects")]
    pub max_render_objects: u32,
}

impl RendererConfig {
    /// Create a new renderer configuration
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            ..Self::default()
        }
    }

    /// Set application version
    pub fn with_version(mut self, major: u32, minor: u32, patch: u32) -> Self {
        self.application_version = (major, minor, patch);
        self
    }

    /// Enable or disable vsync
    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    /// Set the clear color
    pub fn with_clear_color(mut self, r: f32, g: f32, b: f32) -> Self {
        self.clear_color = [r, g, b];
        self
    }

    /// Set maximum frames in flight
    pub fn with_max_frames_in_flight(mut self, frames: usize) -> Self {
        self.max_frames_in_flight = frames;
        self
    }

    /// Enable or disable validation layers explicitly
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = Some(enabled);
        self
    }

    /// Parse a configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, String> {
        let config: Self = toml::from_str(text).map_err(|e| e.to_string())?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, String> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| format!("failed to read {}: {}", path.as_ref().display(), e))?;
        Self::from_toml_str(&text)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.application_name.is_empty() {
            return Err("application name cannot be empty".to_string());
        }
        if self.max_frames_in_flight == 0 {
            return Err("max frames in flight must be at least 1".to_string());
        }
        if self.max_frames_in_flight > 8 {
            return Err("max frames in flight should not exceed 8".to_string());
        }
        if self.vertex_buffer_capacity == 0 || self.index_buffer_capacity == 0 {
            return Err("geometry buffer capacities must be non-zero".to_string());
        }
        if self.max_render_objects == 0 {
            return Err("max render objects must be at least 1".to_string());
        }
        Ok(())
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            application_name: default_app_name(),
            application_version: default_version(),
            vsync: default_vsync(),
            clear_color: default_clear_color(),
            max_frames_in_flight: default_frames_in_flight(),
            enable_validation: None,
            vertex_buffer_capacity: default_vertex_capacity(),
            index_buffer_capacity: default_index_capacity(),
            initial_object_capacity: default_object_capacity(),
            max_render_objects: default_max_render_objects(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(RendererConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config = RendererConfig::from_toml_str(
            r#"
            application_name = "demo"
            vsync = false
            "#,
        )
        .unwrap();
        assert_eq!(config.application_name, "demo");
        assert!(!config.vsync);
        assert_eq!(config.max_frames_in_flight, 2);
        assert_eq!(config.clear_color, [0.005, 0.005, 0.005]);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(RendererConfig::from_toml_str("max_frames_in_flight = 0").is_err());
        assert!(RendererConfig::from_toml_str("max_frames_in_flight = 9").is_err());
        assert!(RendererConfig::from_toml_str(r#"application_name = """#).is_err());

        let config = RendererConfig {
            vertex_buffer_capacity: 0,
            ..RendererConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn builder_methods_apply() {
        let config = RendererConfig::new("app")
            .with_version(2, 1, 0)
            .with_vsync(false)
            .with_clear_color(0.1, 0.2, 0.3)
            .with_max_frames_in_flight(3)
            .with_validation(true);
        assert_eq!(config.application_version, (2, 1, 0));
        assert!(!config.vsync);
        assert_eq!(config.clear_color, [0.1, 0.2, 0.3]);
        assert_eq!(config.max_frames_in_flight, 3);
        assert_eq!(config.enable_validation, Some(true));
    }
}

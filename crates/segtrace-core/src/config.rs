//! Engine configuration.
//!
//! Every field has a default, so a TOML file only needs the values it changes:
//!
//! ```toml
//! result_capacity = 4096
//!
//! [shaders]
//! dir = "build/spv"
//! entry_points = { raygen = "raygenMain" }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_AABB_EPSILON, DEFAULT_RESULT_CAPACITY};
use crate::error::{Error, Result};

/// Entry point names of the five ray tracing stages.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntryPoints {
    pub raygen: String,
    pub miss: String,
    pub intersection: String,
    pub any_hit: String,
    pub closest_hit: String,
}

impl Default for EntryPoints {
    fn default() -> Self {
        Self {
            raygen: "main".to_string(),
            miss: "main".to_string(),
            intersection: "main".to_string(),
            any_hit: "main".to_string(),
            closest_hit: "main".to_string(),
        }
    }
}

/// Where the precompiled shader stages live.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    /// Directory holding `raygen.spv`, `miss.spv`, `isect.spv`, `ahit.spv`, `chit.spv`.
    pub dir: PathBuf,
    /// Stage entry points.
    pub entry_points: EntryPoints,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("shaders"),
            entry_points: EntryPoints::default(),
        }
    }
}

/// Configuration for one engine instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Application name reported to the Vulkan instance.
    pub app_name: String,
    /// Enable validation layers.
    pub validation: bool,
    /// Results buffer capacity, in records.
    pub result_capacity: u32,
    /// AABB half-thickness added around each base segment.
    pub aabb_epsilon: f32,
    /// Shader stage location.
    pub shaders: ShaderConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            app_name: "segtrace".to_string(),
            validation: cfg!(debug_assertions),
            result_capacity: DEFAULT_RESULT_CAPACITY,
            aabb_epsilon: DEFAULT_AABB_EPSILON,
            shaders: ShaderConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from TOML.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Set the application name.
    pub fn with_app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    /// Set the results buffer capacity.
    pub fn with_result_capacity(mut self, capacity: u32) -> Self {
        self.result_capacity = capacity;
        self
    }

    /// Set the AABB epsilon.
    pub fn with_aabb_epsilon(mut self, epsilon: f32) -> Self {
        self.aabb_epsilon = epsilon;
        self
    }

    /// Set the shader directory.
    pub fn with_shader_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.shaders.dir = dir.into();
        self
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if !(self.aabb_epsilon.is_finite() && self.aabb_epsilon > 0.0) {
            return Err(Error::Config(format!(
                "aabb_epsilon must be positive and finite, got {}",
                self.aabb_epsilon
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.result_capacity, 1024);
        assert_eq!(config.aabb_epsilon, 1e-5);
        assert_eq!(config.shaders.entry_points.raygen, "main");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            result_capacity = 16

            [shaders]
            dir = "out/spv"
            entry_points = { raygen = "raygenMain", any_hit = "anyhitMain" }
            "#,
        )
        .unwrap();

        assert_eq!(config.result_capacity, 16);
        assert_eq!(config.aabb_epsilon, 1e-5);
        assert_eq!(config.shaders.dir, PathBuf::from("out/spv"));
        assert_eq!(config.shaders.entry_points.raygen, "raygenMain");
        assert_eq!(config.shaders.entry_points.any_hit, "anyhitMain");
        assert_eq!(config.shaders.entry_points.miss, "main");
    }

    #[test]
    fn rejects_non_positive_epsilon() {
        assert!(matches!(
            EngineConfig::from_toml_str("aabb_epsilon = 0.0"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(matches!(
            EngineConfig::from_toml_str("result_capacity = \"lots\""),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn builder_overrides() {
        let config = EngineConfig::new()
            .with_result_capacity(0)
            .with_aabb_epsilon(1e-4)
            .with_shader_dir("/tmp/spv")
            .with_validation(false);

        assert_eq!(config.result_capacity, 0);
        assert_eq!(config.aabb_epsilon, 1e-4);
        assert_eq!(config.shaders.dir, PathBuf::from("/tmp/spv"));
        assert!(!config.validation);
    }
}

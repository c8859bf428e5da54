//! Configuration for the black-hole simulation.
//!
//! A single TOML file carries the tunable `[parameters]` record plus the
//! `[render]` and `[assets]` settings the hosts need to start up.

mod parameters;

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use parameters::{parse_override, ParameterError, SimulationParameters};

/// Only supported config schema version.
pub const CONFIG_VERSION: u32 = 1;

/// Cadence used when neither the config nor the caller picks one.
pub const DEFAULT_FPS: f32 = 60.0;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("failed to read configuration at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulationConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub parameters: SimulationParameters,
    #[serde(default)]
    pub render: RenderSettings,
    #[serde(default)]
    pub assets: AssetSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderSettings {
    pub width: u32,
    pub height: u32,
    /// Target frames per second; `0` renders on every display frame.
    pub fps: f32,
    pub title: String,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: DEFAULT_FPS,
            title: "Black Hole".to_string(),
        }
    }
}

impl RenderSettings {
    /// Returns the frame cap, or `None` when rendering is uncapped.
    pub fn target_fps(&self) -> Option<f32> {
        if self.fps > 0.0 {
            Some(self.fps)
        } else {
            None
        }
    }
}

/// Where shader text and texture images are fetched from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AssetSettings {
    /// HTTP(S) base URL or local directory holding `shader/` and `assets/`.
    pub base: String,
    pub shader_prefix: String,
    pub skybox_prefix: String,
    pub color_map: String,
}

impl Default for AssetSettings {
    fn default() -> Self {
        Self {
            base: "blackhole".to_string(),
            shader_prefix: "shader/".to_string(),
            skybox_prefix: "assets/skybox_nebula_dark/".to_string(),
            color_map: "assets/color_map.png".to_string(),
        }
    }
}

impl AssetSettings {
    /// Joins a shader file name onto the shader prefix.
    pub fn shader_path(&self, file: &str) -> String {
        join_relative(&self.shader_prefix, file)
    }

    /// Joins a skybox face file name onto the skybox prefix.
    pub fn skybox_path(&self, file: &str) -> String {
        join_relative(&self.skybox_prefix, file)
    }
}

fn join_relative(prefix: &str, file: &str) -> String {
    if prefix.is_empty() {
        return file.to_string();
    }
    format!(
        "{}/{}",
        prefix.trim_end_matches('/'),
        file.trim_start_matches('/')
    )
}

fn default_version() -> u32 {
    CONFIG_VERSION
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            parameters: SimulationParameters::default(),
            render: RenderSettings::default(),
            assets: AssetSettings::default(),
        }
    }
}

impl SimulationConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: SimulationConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Loads `path` when it exists, otherwise returns the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != CONFIG_VERSION {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected {CONFIG_VERSION}",
                self.version
            )));
        }

        if let Some((name, value)) = self.parameters.first_non_finite() {
            return Err(ConfigError::Invalid(format!(
                "parameter '{name}' must be finite (got {value})"
            )));
        }

        if self.render.width == 0 || self.render.height == 0 {
            return Err(ConfigError::Invalid(
                "render dimensions must be greater than zero".into(),
            ));
        }

        if !self.render.fps.is_finite() || self.render.fps < 0.0 {
            return Err(ConfigError::Invalid("render.fps must be >= 0".into()));
        }

        if self.assets.base.trim().is_empty() {
            return Err(ConfigError::Invalid("assets.base must not be empty".into()));
        }

        Ok(())
    }
}

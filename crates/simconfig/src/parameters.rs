use serde::{Deserialize, Serialize};

/// Errors raised when external controls mutate a parameter by name.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParameterError {
    #[error("unknown simulation parameter '{0}'")]
    Unknown(String),
    #[error("parameter '{name}' must be finite (got {value})")]
    NotFinite { name: String, value: f32 },
}

macro_rules! simulation_parameters {
    ($($(#[$doc:meta])* $field:ident => $name:literal = $default:expr,)*) => {
        /// Flat record of scalar knobs fed to the scene shader every frame.
        ///
        /// Keys are the uniform names the shaders declare, which is why the
        /// serialized form keeps their exact (camelCase, occasionally
        /// misspelled) spelling.
        #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
        #[serde(default, deny_unknown_fields)]
        pub struct SimulationParameters {
            $(
                $(#[$doc])*
                #[serde(rename = $name)]
                pub $field: f32,
            )*
        }

        impl Default for SimulationParameters {
            fn default() -> Self {
                Self {
                    $($field: $default,)*
                }
            }
        }

        impl SimulationParameters {
            /// Uniform names in declaration order.
            pub const NAMES: &'static [&'static str] = &[$($name,)*];

            /// Yields every `(uniform name, value)` pair.
            pub fn iter(&self) -> impl Iterator<Item = (&'static str, f32)> {
                [$(($name, self.$field),)*].into_iter()
            }

            /// Looks up a parameter by its uniform name.
            pub fn get(&self, name: &str) -> Option<f32> {
                match name {
                    $($name => Some(self.$field),)*
                    _ => None,
                }
            }

            fn slot_mut(&mut self, name: &str) -> Option<&mut f32> {
                match name {
                    $($name => Some(&mut self.$field),)*
                    _ => None,
                }
            }
        }
    };
}

simulation_parameters! {
    /// Snap the camera to a front-on view of the disk.
    front_view => "frontView" = 0.0,
    /// Snap the camera to a top-down view of the disk.
    top_view => "topView" = 0.0,
    camera_roll => "cameraRoll" = 0.0,
    /// Toggle for gravitational lensing (1 = on).
    gravatational_lensing => "gravatationalLensing" = 1.0,
    render_black_hole => "renderBlackHole" = 1.0,
    /// Whether pointer position steers the camera.
    mouse_control => "mouseControl" = 1.0,
    fov_scale => "fovScale" = 1.0,
    adisk_enabled => "adiskEnabled" = 1.0,
    adisk_particle => "adiskParticle" = 1.0,
    /// Accretion disk thickness.
    adisk_height => "adiskHeight" = 0.3,
    /// Accretion disk emission strength.
    adisk_lit => "adiskLit" = 0.4,
    adisk_density_v => "adiskDensityV" = 3.0,
    adisk_density_h => "adiskDensityH" = 2.5,
    adisk_noise_scale => "adiskNoiseScale" = 1.2,
    adisk_noise_lod => "adiskNoiseLOD" = 7.0,
    /// Angular speed of the disk rotation.
    adisk_speed => "adiskSpeed" = 0.3,
    /// Weight of the brightness buffer in the bloom composite.
    bloom_strength => "bloomStrength" = 0.15,
    tonemapping_enabled => "tonemappingEnabled" = 1.0,
    gamma => "gamma" = 1.0,
}

impl SimulationParameters {
    /// Updates one knob by uniform name, rejecting unknown names and non-finite values.
    pub fn set(&mut self, name: &str, value: f32) -> Result<(), ParameterError> {
        if !value.is_finite() {
            return Err(ParameterError::NotFinite {
                name: name.to_string(),
                value,
            });
        }
        let slot = self
            .slot_mut(name)
            .ok_or_else(|| ParameterError::Unknown(name.to_string()))?;
        *slot = value;
        Ok(())
    }

    /// Returns the first non-finite entry, if any.
    pub fn first_non_finite(&self) -> Option<(&'static str, f32)> {
        self.iter().find(|(_, value)| !value.is_finite())
    }
}

/// Parses a `name=value` override as passed on the command line.
pub fn parse_override(raw: &str) -> Result<(String, f32), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err("parameter name must not be empty".to_string());
    }
    let value: f32 = value
        .trim()
        .parse()
        .map_err(|_| format!("invalid value for '{name}': '{}'", value.trim()))?;
    Ok((name.to_string(), value))
}

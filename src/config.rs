//! Stage configuration.
//!
//! Every constant the stage is built from lives here. The defaults reproduce
//! the stock scene; a TOML file can override any subset of them.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;

/// Environment variable naming an alternative config file (native only).
pub const CONFIG_ENV: &str = "BEATBOT_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "stage.toml";

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct StageConfig {
    /// Fixed simulation step in seconds.
    pub interval: f32,
    pub level_mapping: LevelMapping,
    pub background: u32,
    pub camera: CameraConfig,
    pub directional_light: LightConfig,
    pub ambient_light: LightConfig,
    pub grid: GridConfig,
    pub audio: AudioConfig,
    pub models: Vec<ModelSpec>,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            interval: 1.0 / 25.0,
            level_mapping: LevelMapping::default(),
            background: 0xdedede,
            camera: CameraConfig::default(),
            directional_light: LightConfig {
                color: 0xffffff,
                intensity: 1.0,
                position: [-1.0, 2.0, 4.0],
            },
            ambient_light: LightConfig {
                color: 0xffffff,
                intensity: 0.5,
                position: [0.0, 0.0, 0.0],
            },
            grid: GridConfig::default(),
            audio: AudioConfig::default(),
            models: vec![
                ModelSpec {
                    path: "models/Flamingo.glb".to_string(),
                    role: ModelRole::Animated,
                    position: [-7.5, 0.0, -10.0],
                    scale: 0.125,
                },
                ModelSpec {
                    path: "models/robot.gltf".to_string(),
                    role: ModelRole::AudioReactive,
                    position: [0.0, 0.0, 0.0],
                    scale: 1.125,
                },
            ],
        }
    }
}

impl StageConfig {
    pub fn from_toml_str(src: &str) -> Result<Self, ConfigError> {
        let config: StageConfig = toml::from_str(src)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a config file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(src) => Self::from_toml_str(&src),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Config path from `BEATBOT_CONFIG`, or `stage.toml` in the working directory.
    pub fn default_path() -> PathBuf {
        std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.interval.is_finite() && self.interval > 0.0) {
            return Err(ConfigError::InvalidInterval(self.interval));
        }
        self.level_mapping.validate()
    }
}

/// Linear map from a metered level onto the target's depth coordinate.
///
/// Unclamped: levels outside `in_min..in_max` land outside
/// `out_min..out_max`.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(default)]
pub struct LevelMapping {
    pub in_min: f32,
    pub in_max: f32,
    pub out_min: f32,
    pub out_max: f32,
}

impl Default for LevelMapping {
    fn default() -> Self {
        Self {
            in_min: -60.0,
            in_max: 12.0,
            out_min: 0.0,
            out_max: 4.0,
        }
    }
}

impl LevelMapping {
    /// The input range must be non-empty or every level maps to NaN or infinity.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let bounds = [self.in_min, self.in_max, self.out_min, self.out_max];
        if bounds.iter().all(|b| b.is_finite()) && self.in_min != self.in_max {
            return Ok(());
        }
        Err(ConfigError::InvalidLevelMapping {
            in_min: self.in_min,
            in_max: self.in_max,
            out_min: self.out_min,
            out_max: self.out_max,
        })
    }

    pub fn apply(&self, level: f32) -> f32 {
        map_linear(level, self.in_min, self.in_max, self.out_min, self.out_max)
    }
}

pub fn map_linear(x: f32, in_min: f32, in_max: f32, out_min: f32, out_max: f32) -> f32 {
    out_min + (x - in_min) * (out_max - out_min) / (in_max - in_min)
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct CameraConfig {
    pub fov_y_degrees: f32,
    pub z_near: f32,
    pub z_far: f32,
    pub eye: [f32; 3],
    pub enable_zoom: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fov_y_degrees: 75.0,
            z_near: 0.1,
            z_far: 1000.0,
            eye: [0.0, 0.0, 10.0],
            enable_zoom: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LightConfig {
    pub color: u32,
    pub intensity: f32,
    pub position: [f32; 3],
}

impl Default for LightConfig {
    fn default() -> Self {
        Self {
            color: 0xffffff,
            intensity: 1.0,
            position: [0.0, 0.0, 0.0],
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct GridConfig {
    pub size: f32,
    pub divisions: u32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            size: 1000.0,
            divisions: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub path: String,
    /// Decay factor of the level meter, in `[0, 1)`.
    pub smoothing: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            path: "sounds/Warrpy_Beat.mp3".to_string(),
            smoothing: 0.8,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ModelRole {
    /// Plays its first animation clip on a mixer.
    Animated,
    /// Static; its depth follows the metered audio level.
    AudioReactive,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ModelSpec {
    pub path: String,
    pub role: ModelRole,
    #[serde(default)]
    pub position: [f32; 3],
    #[serde(default = "unit_scale")]
    pub scale: f32,
}

fn unit_scale() -> f32 {
    1.0
}

pub fn color_to_rgb(hex: u32) -> [f32; 3] {
    [
        ((hex >> 16) & 0xff) as f32 / 255.0,
        ((hex >> 8) & 0xff) as f32 / 255.0,
        (hex & 0xff) as f32 / 255.0,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_stock_stage() {
        let config = StageConfig::default();
        assert!((config.interval - 0.04).abs() < 1e-7);
        assert_eq!(config.level_mapping, LevelMapping::default());
        assert_eq!(config.background, 0xdedede);
        assert_eq!(config.camera.fov_y_degrees, 75.0);
        assert_eq!(config.audio.smoothing, 0.8);
        assert_eq!(config.models.len(), 2);
        assert_eq!(config.models[0].role, ModelRole::Animated);
        assert_eq!(config.models[1].role, ModelRole::AudioReactive);
    }

    #[test]
    fn partial_toml_overrides_defaults() {
        let src = r#"
            interval = 0.02

            [audio]
            path = "sounds/other.wav"

            [[models]]
            path = "models/box.glb"
            role = "audio_reactive"
        "#;
        let config = StageConfig::from_toml_str(src).unwrap();
        assert_eq!(config.interval, 0.02);
        assert_eq!(config.audio.path, "sounds/other.wav");
        assert_eq!(config.audio.smoothing, 0.8);
        assert_eq!(config.models.len(), 1);
        assert_eq!(config.models[0].scale, 1.0);
        assert_eq!(config.models[0].position, [0.0, 0.0, 0.0]);
    }

    #[test]
    fn rejects_non_positive_interval() {
        let err = StageConfig::from_toml_str("interval = 0.0").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidInterval(_)));
    }

    #[test]
    fn rejects_degenerate_level_mapping() {
        let err = StageConfig::from_toml_str("[level_mapping]\nin_min = 5.0\nin_max = 5.0").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidLevelMapping { .. }));

        let err = StageConfig::from_toml_str("[level_mapping]\nout_max = inf").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidLevelMapping { .. }));

        let mut config = StageConfig::default();
        config.level_mapping.in_min = f32::NAN;
        assert!(config.validate().is_err());
        assert!(StageConfig::default().validate().is_ok());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = StageConfig::load(Path::new("does/not/exist/stage.toml")).unwrap();
        assert_eq!(config, StageConfig::default());
    }

    #[test]
    fn hex_color_splits_into_channels() {
        assert_eq!(color_to_rgb(0xff0000), [1.0, 0.0, 0.0]);
        let grey = color_to_rgb(0xdedede);
        assert!((grey[0] - 222.0 / 255.0).abs() < 1e-6);
    }
}

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::biped::{CameraCalibration, MassModel, RobotDimensions};
use crate::combinator::CombinatorConfig;
use crate::engines::{FallConfig, GetUpConfig, StandConfig};
use crate::error::{ConfigError, Result};
use crate::kick::KickConfig;
use crate::selection::SelectionConfig;
use crate::walk::WalkConfig;

/// Complete configuration of the motion layer, loaded once at startup.
///
/// Every section falls back to its defaults, so a file only lists what it changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    pub dimensions: RobotDimensions,
    pub masses: MassModel,
    pub calibration: CameraCalibration,
    pub walk: WalkConfig,
    pub kick: KickConfig,
    pub stand: StandConfig,
    pub get_up: GetUpConfig,
    pub fall: FallConfig,
    pub selection: SelectionConfig,
    pub combinator: CombinatorConfig,
    /// Directory with key-frame motions, replaces the built-in ones
    pub keyframe_directory: Option<PathBuf>,
}

impl MotionConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let dims = &self.dimensions;
        let lengths = [
            ("dimensions.upper_leg_length", dims.upper_leg_length),
            ("dimensions.lower_leg_length", dims.lower_leg_length),
            ("dimensions.upper_arm_length", dims.upper_arm_length),
            ("dimensions.lower_arm_length", dims.lower_arm_length),
        ];
        for (field, value) in lengths {
            if !(value > 0.0) {
                return Err(ConfigError::invalid(field, "must be positive"));
            }
        }
        if self.masses.total() <= 0.0 {
            return Err(ConfigError::invalid("masses", "total mass must be positive"));
        }

        self.walk.validate(dims)?;
        self.kick.validate()?;
        self.stand.validate(dims)?;
        self.selection.validate()?;
        self.combinator.validate()?;
        Ok(())
    }
}

/// Parses every `*.toml` file of a directory, sorted by file name.
pub fn load_toml_dir<T: DeserializeOwned>(dir: impl AsRef<Path>) -> Result<Vec<(PathBuf, T)>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.extension().is_some_and(|extension| extension == "toml"))
        .collect();
    paths.sort();

    paths
        .into_iter()
        .map(|path| -> Result<(PathBuf, T)> {
            let content = std::fs::read_to_string(&path)?;
            let value = toml::from_str(&content)?;
            Ok((path, value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(MotionConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = MotionConfig::from_toml_str(
            r#"
            [walk]
            base_step_duration = 0.3

            [walk.speed]
            max_speed = { forward = 0.2, left = 0.1, turn = 0.8 }

            [dimensions]
            foot_height = 0.05
            "#,
        )
        .unwrap();

        assert!((config.walk.base_step_duration - 0.3).abs() < f64::EPSILON);
        assert!((config.walk.speed.max_speed.turn - 0.8).abs() < f64::EPSILON);
        assert!((config.dimensions.foot_height - 0.05).abs() < f64::EPSILON);
        assert_eq!(config.kick, KickConfig::default());
    }

    #[test]
    fn test_invalid_value_rejected() {
        let err = MotionConfig::from_toml_str(
            r#"
            [dimensions]
            upper_leg_length = -0.1
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_malformed_toml_rejected() {
        let err = MotionConfig::from_toml_str("[walk\nbase_step_duration = ").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = MotionConfig::from_file("/nonexistent/motion.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}

use thiserror::Error;

use crate::joints::Joint;

/// Errors raised while loading configuration and motion definitions.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
    #[error("Duplicate motion definition: {0}")]
    DuplicateMotion(String),
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Errors raised by the motion engines at runtime.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MotionError {
    #[error("Kick not found: {0}")]
    UnknownKick(String),
    #[error("Key-frame motion not found: {0}")]
    UnknownKeyframeMotion(String),
    #[error("Invalid joint request: {joint:?} = {angle}")]
    InvalidJointRequest { joint: Joint, angle: f64 },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

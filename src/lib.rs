//! Motion core of a humanoid soccer robot: walk generation, kicks, key-frame motions,
//! balance and the per-cycle combination of their joint requests.

pub mod biped;
pub mod combinator;
pub mod com;
pub mod config;
pub mod controller;
pub mod engines;
pub mod error;
pub mod ik;
pub mod joints;
pub mod keyframe;
pub mod kick;
pub mod pose;
pub mod request;
pub mod selection;
pub mod smoothing;
pub mod speed;
pub mod stability;
pub mod ukf;
pub mod walk;

pub use config::MotionConfig;
pub use controller::{MotionControl, MotionCycle};
pub use error::{ConfigError, MotionError};

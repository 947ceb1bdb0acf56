//! Merges the engine outputs of one cycle into the final joint request and odometry.

use nalgebra as na;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::biped::{JointLimits, SensorData};
use crate::engines::{MotionOutput, WalkStatus};
use crate::error::{ConfigError, MotionError, Result};
use crate::joints::{Joint, JointRequest, JointValues};
use crate::pose::{normalize_angle, Odometry};
use crate::request::{
    HeadRequest, KickRequest, MotionKind, MotionRequest, SpecialActionRequest, WalkRequest,
};
use crate::selection::MotionSelection;
use crate::ukf::{OdometryFilter, OdometryFilterConfig};
use crate::walk::WeightShiftStatus;

const GRAVITY: f64 = 9.81;

/// What happens to a joint request with a non-finite or out-of-range angle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidRequestPolicy {
    /// Log the request and the selection, then panic
    Abort,
    /// Replace bad angles and keep running
    ClampAndContinue,
}

impl Default for InvalidRequestPolicy {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            InvalidRequestPolicy::Abort
        } else {
            InvalidRequestPolicy::ClampAndContinue
        }
    }
}

/// Stiffness that grows with the tracking error of a joint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicStiffnessConfig {
    pub enabled: bool,
    /// Error up to which the increase is quadratic (rad)
    pub deadband: f64,
    /// Share of the requested stiffness applied without error
    pub min_ratio: f64,
    /// Stiffness increase per radian of error beyond the deadband
    pub gain: f64,
}

impl Default for DynamicStiffnessConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            deadband: 0.05,
            min_ratio: 0.6,
            gain: 4.0,
        }
    }
}

impl DynamicStiffnessConfig {
    /// Stiffness for a joint tracking with `error`, at most `requested`.
    ///
    /// The increase is `e² / 2d` inside the deadband `d` and `e - d / 2` beyond it, so value
    /// and slope are continuous at the deadband.
    pub fn stiffness(&self, requested: f64, error: f64) -> f64 {
        let error = error.abs();
        let shaped = if error <= self.deadband {
            error * error / (2.0 * self.deadband)
        } else {
            error - self.deadband / 2.0
        };
        (requested * self.min_ratio + self.gain * shaped).min(requested)
    }
}

/// Fixed stiffness for one joint, replacing the engine's and the dynamic stiffness.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointStiffness {
    pub joint: Joint,
    pub stiffness: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CombinatorConfig {
    pub invalid_request_policy: InvalidRequestPolicy,
    /// Tolerance beyond the joint limits before a request counts as invalid (rad)
    pub sanity_margin: f64,
    pub dynamic_stiffness: DynamicStiffnessConfig,
    pub static_stiffness: Vec<JointStiffness>,
    /// Joints that are switched off
    pub damaged_joints: Vec<Joint>,
    /// Rotation from the fused orientation instead of the engines
    pub use_fused_yaw: bool,
    pub odometry_filter: OdometryFilterConfig,
}

impl Default for CombinatorConfig {
    fn default() -> Self {
        Self {
            invalid_request_policy: InvalidRequestPolicy::default(),
            sanity_margin: 0.1,
            dynamic_stiffness: DynamicStiffnessConfig::default(),
            static_stiffness: Vec::new(),
            damaged_joints: Vec::new(),
            use_fused_yaw: true,
            odometry_filter: OdometryFilterConfig::default(),
        }
    }
}

impl CombinatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sanity_margin < 0.0 {
            return Err(ConfigError::invalid("combinator.sanity_margin", "must not be negative"));
        }
        let dynamic = &self.dynamic_stiffness;
        if dynamic.deadband <= 0.0 {
            return Err(ConfigError::invalid(
                "combinator.dynamic_stiffness.deadband",
                "must be positive",
            ));
        }
        if !(0.0..=1.0).contains(&dynamic.min_ratio) {
            return Err(ConfigError::invalid(
                "combinator.dynamic_stiffness.min_ratio",
                "must be in [0, 1]",
            ));
        }
        if let Some(entry) = self
            .static_stiffness
            .iter()
            .find(|entry| !(0.0..=1.0).contains(&entry.stiffness))
        {
            return Err(ConfigError::invalid(
                "combinator.static_stiffness",
                format!("stiffness of {:?} must be in [0, 1]", entry.joint),
            ));
        }
        let filter = &self.odometry_filter;
        if filter.process_noise <= 0.0 || filter.measurement_noise <= 0.0 {
            return Err(ConfigError::invalid(
                "combinator.odometry_filter",
                "noise variances must be positive",
            ));
        }
        Ok(())
    }
}

/// Which motion runs and how it is doing, for behavior.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MotionInfo {
    pub active: MotionKind,
    pub is_stable: bool,
    /// Last walk request executed by the walk engine
    pub walk: WalkRequest,
    pub kick: KickRequest,
    pub special_action: SpecialActionRequest,
    pub walk_status: Option<WalkStatus>,
    pub weight_shift_status: WeightShiftStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CombinedOutput {
    pub request: JointRequest,
    pub odometry_offset: na::Isometry2<f64>,
    pub upcoming_offset: na::Isometry2<f64>,
}

/// First joint whose angle is not finite or lies outside the limits widened by `margin`.
pub fn validate_request(
    request: &JointRequest,
    limits: &JointLimits,
    margin: f64,
) -> std::result::Result<(), MotionError> {
    if let Some((joint, angle)) = request.first_non_finite() {
        return Err(MotionError::InvalidJointRequest { joint, angle });
    }
    match Joint::ALL
        .into_iter()
        .find(|&joint| !limits.contains_with_margin(joint, request.angles[joint], margin))
    {
        Some(joint) => Err(MotionError::InvalidJointRequest {
            joint,
            angle: request.angles[joint],
        }),
        None => Ok(()),
    }
}

/// Replaces non-finite angles by the sensed ones and clamps everything into the limits.
pub fn sanitize_request(
    request: &JointRequest,
    sensed: &JointValues,
    limits: &JointLimits,
) -> JointRequest {
    let mut sanitized = *request;
    for joint in Joint::ALL {
        let angle = request.angles[joint];
        let angle = if angle.is_finite() { angle } else { sensed[joint] };
        sanitized.angles[joint] = limits.clamp(joint, angle);
        if !request.stiffness[joint].is_finite() {
            sanitized.stiffness[joint] = 0.0;
        }
    }
    sanitized
}

pub struct Combinator {
    config: CombinatorConfig,
    limits: JointLimits,
    odometry: Odometry,
    filter: OdometryFilter,
    last_yaw: Option<f64>,
    info: MotionInfo,
}

impl Combinator {
    pub fn new(config: CombinatorConfig, limits: JointLimits) -> Self {
        let filter = OdometryFilter::new(config.odometry_filter.clone());
        Self {
            config,
            limits,
            odometry: Odometry::default(),
            filter,
            last_yaw: None,
            info: MotionInfo::default(),
        }
    }

    pub fn odometry(&self) -> &Odometry {
        &self.odometry
    }

    pub fn odometry_mut(&mut self) -> &mut Odometry {
        &mut self.odometry
    }

    pub fn info(&self) -> &MotionInfo {
        &self.info
    }

    pub fn odometry_filter(&self) -> &OdometryFilter {
        &self.filter
    }

    /// Combines the outputs of all active engines, indexed by [`MotionKind::index`].
    pub fn combine(
        &mut self,
        selection: &MotionSelection,
        outputs: &[Option<MotionOutput>; MotionKind::COUNT],
        request: &MotionRequest,
        head: &HeadRequest,
        sensors: &SensorData,
        dt: f64,
    ) -> CombinedOutput {
        let dominant = selection.dominant();
        let Some(main) = outputs[dominant.index()].as_ref() else {
            error!(?dominant, "no output of the dominant motion");
            return CombinedOutput {
                request: JointRequest::new(sensors.joint_angles, 0.0),
                odometry_offset: na::Isometry2::identity(),
                upcoming_offset: na::Isometry2::identity(),
            };
        };

        let mut joint_request = self.blend(selection, outputs, head);

        if let Err(err) =
            validate_request(&joint_request, &self.limits, self.config.sanity_margin)
        {
            match self.config.invalid_request_policy {
                InvalidRequestPolicy::Abort => {
                    error!(
                        %err,
                        ?selection,
                        request = ?joint_request,
                        "invalid joint request"
                    );
                    panic!("invalid joint request: {err}");
                }
                InvalidRequestPolicy::ClampAndContinue => {
                    warn!(%err, ?dominant, "invalid joint request sanitized");
                    joint_request =
                        sanitize_request(&joint_request, &sensors.joint_angles, &self.limits);
                }
            }
        }

        self.apply_stiffness(&mut joint_request, sensors);

        let odometry_offset = self.odometry_offset(dominant, main, sensors, dt);
        self.odometry.accumulate(&odometry_offset);
        self.update_info(selection, dominant, main, request);

        CombinedOutput {
            request: joint_request,
            odometry_offset,
            upcoming_offset: main.upcoming_offset,
        }
    }

    fn blend(
        &self,
        selection: &MotionSelection,
        outputs: &[Option<MotionOutput>; MotionKind::COUNT],
        head: &HeadRequest,
    ) -> JointRequest {
        let mut angles = JointValues::default();
        let mut stiffness = JointValues::default();
        let mut total = 0.0;
        for kind in selection.active() {
            let Some(output) = outputs[kind.index()].as_ref() else {
                continue;
            };
            let ratio = selection.ratio(kind);
            total += ratio;
            for joint in Joint::ALL {
                let (angle, joint_stiffness) = if joint.is_head() && !output.owns_head {
                    let angle = match joint {
                        Joint::HeadYaw => head.pan,
                        _ => head.tilt,
                    };
                    (angle, head.stiffness)
                } else {
                    (output.request.angles[joint], output.request.stiffness[joint])
                };
                angles[joint] += ratio * angle;
                stiffness[joint] += ratio * joint_stiffness;
            }
        }
        if total > 0.0 && (total - 1.0).abs() > 1e-9 {
            for joint in Joint::ALL {
                angles[joint] /= total;
                stiffness[joint] /= total;
            }
        }
        JointRequest { angles, stiffness }
    }

    fn apply_stiffness(&self, request: &mut JointRequest, sensors: &SensorData) {
        if self.config.dynamic_stiffness.enabled {
            for joint in Joint::ALL {
                let error = request.angles[joint] - sensors.joint_angles[joint];
                request.stiffness[joint] = self
                    .config
                    .dynamic_stiffness
                    .stiffness(request.stiffness[joint], error);
            }
        }
        for entry in &self.config.static_stiffness {
            request.stiffness[entry.joint] = entry.stiffness;
        }
        for &joint in &self.config.damaged_joints {
            request.stiffness[joint] = 0.0;
        }
    }

    fn odometry_offset(
        &mut self,
        dominant: MotionKind,
        main: &MotionOutput,
        sensors: &SensorData,
        dt: f64,
    ) -> na::Isometry2<f64> {
        let mut offset = main.odometry_offset;

        let yaw = sensors.yaw();
        if self.config.use_fused_yaw {
            if let (Some(yaw), Some(last)) = (yaw, self.last_yaw) {
                offset = na::Isometry2::new(offset.translation.vector, normalize_angle(yaw - last));
            }
        }
        self.last_yaw = yaw;

        if self.config.odometry_filter.enabled {
            if dominant == MotionKind::Walk {
                let gravity = match sensors.orientation {
                    Some(orientation) => orientation.inverse() * na::Vector3::new(0.0, 0.0, GRAVITY),
                    None => na::Vector3::new(0.0, 0.0, GRAVITY),
                };
                let linear = (sensors.accelerometer - gravity).xy();
                offset = self.filter.update(&offset, &linear, dt);
            } else {
                self.filter.reset();
            }
        }
        offset
    }

    fn update_info(
        &mut self,
        selection: &MotionSelection,
        dominant: MotionKind,
        main: &MotionOutput,
        request: &MotionRequest,
    ) {
        let info = &mut self.info;
        info.active = dominant;
        info.is_stable = main.is_stable;
        if request.kind == selection.target {
            match request.kind {
                MotionKind::Walk => info.walk = request.walk.clone(),
                MotionKind::Kick => info.kick = request.kick.clone(),
                MotionKind::SpecialAction => info.special_action = request.special_action.clone(),
                _ => {}
            }
        }
        info.walk_status = main.walk;
        if let Some(walk) = main.walk {
            info.weight_shift_status = walk.weight_shift_status;
        }
    }
}

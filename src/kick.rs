//! Phase-driven kick player.
//!
//! A kick definition is a list of phases; in every phase each limb follows a quadratic Bezier
//! curve that starts where the previous phase ended. Definitions are written for a left-leg kick
//! and mirrored for the right leg.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nalgebra as na;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::biped::{JointLimits, MassModel, RobotDimensions, SensorData};
use crate::com::{center_of_mass, foot_support_polygon, is_inside_convex_polygon};
use crate::config::load_toml_dir;
use crate::error::{ConfigError, MotionError, Result};
use crate::ik::{arm_forward_kinematics, calc_arm_joints, calc_leg_joints, leg_forward_kinematics};
use crate::joints::{Joint, JointRequest, JointValues, Side};
use crate::request::KickRequest;
use crate::stability::{PidController, PidGains};

const BUILTIN_KICKS: [&str; 2] = [
    include_str!("../config/kicks/forward.toml"),
    include_str!("../config/kicks/walk_forward.toml"),
];

/// Everything a kick phase can move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limb {
    LeftFoot,
    LeftFootRotation,
    RightFoot,
    RightFootRotation,
    LeftHand,
    RightHand,
    /// Centre of mass relative to the support ankle
    Com,
    /// [pan, tilt, unused]
    Head,
}

impl Limb {
    pub const COUNT: usize = 8;

    pub const ALL: [Limb; Limb::COUNT] = [
        Limb::LeftFoot,
        Limb::LeftFootRotation,
        Limb::RightFoot,
        Limb::RightFootRotation,
        Limb::LeftHand,
        Limb::RightHand,
        Limb::Com,
        Limb::Head,
    ];

    fn index(self) -> usize {
        self as usize
    }

    /// The limb on the other side of the body.
    pub fn mirrored(self) -> Limb {
        match self {
            Limb::LeftFoot => Limb::RightFoot,
            Limb::LeftFootRotation => Limb::RightFootRotation,
            Limb::RightFoot => Limb::LeftFoot,
            Limb::RightFootRotation => Limb::LeftFootRotation,
            Limb::LeftHand => Limb::RightHand,
            Limb::RightHand => Limb::LeftHand,
            Limb::Com => Limb::Com,
            Limb::Head => Limb::Head,
        }
    }

    /// Reflects a control point of this limb at the sagittal plane.
    fn mirror_point(self, point: na::Vector3<f64>) -> na::Vector3<f64> {
        match self {
            Limb::LeftFootRotation | Limb::RightFootRotation => {
                na::Vector3::new(-point.x, point.y, -point.z)
            }
            Limb::Head => na::Vector3::new(-point.x, point.y, point.z),
            _ => na::Vector3::new(point.x, -point.y, point.z),
        }
    }
}

/// One phase of a kick; limbs without control points hold their position.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KickPhase {
    pub duration: f64,
    pub left_foot: Option<[[f64; 3]; 2]>,
    pub left_foot_rotation: Option<[[f64; 3]; 2]>,
    pub right_foot: Option<[[f64; 3]; 2]>,
    pub right_foot_rotation: Option<[[f64; 3]; 2]>,
    pub left_hand: Option<[[f64; 3]; 2]>,
    pub right_hand: Option<[[f64; 3]; 2]>,
    pub com: Option<[[f64; 3]; 2]>,
    pub head: Option<[[f64; 3]; 2]>,
}

impl KickPhase {
    fn control_points(&self, limb: Limb) -> Option<&[[f64; 3]; 2]> {
        match limb {
            Limb::LeftFoot => self.left_foot.as_ref(),
            Limb::LeftFootRotation => self.left_foot_rotation.as_ref(),
            Limb::RightFoot => self.right_foot.as_ref(),
            Limb::RightFootRotation => self.right_foot_rotation.as_ref(),
            Limb::LeftHand => self.left_hand.as_ref(),
            Limb::RightHand => self.right_hand.as_ref(),
            Limb::Com => self.com.as_ref(),
            Limb::Head => self.head.as_ref(),
        }
    }

    /// Control points of `limb` as played, i.e. taken from the opposite limb and reflected
    /// when mirrored.
    fn curve(&self, limb: Limb, mirrored: bool) -> Option<[na::Vector3<f64>; 2]> {
        let source = if mirrored { limb.mirrored() } else { limb };
        let points = self.control_points(source)?;
        let points = points.map(na::Vector3::from);
        Some(if mirrored {
            points.map(|point| source.mirror_point(point))
        } else {
            points
        })
    }
}

fn quadratic_bezier(
    start: &na::Vector3<f64>,
    control: &na::Vector3<f64>,
    end: &na::Vector3<f64>,
    s: f64,
) -> na::Vector3<f64> {
    let u = 1.0 - s;
    start * (u * u) + control * (2.0 * u * s) + end * (s * s)
}

fn default_version() -> u32 {
    1
}

fn default_stiffness() -> f64 {
    0.9
}

/// A named, versioned kick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KickDefinition {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: u32,
    /// Restart from the first phase after the last one
    #[serde(default)]
    pub looping: bool,
    #[serde(default = "default_stiffness")]
    pub stiffness: f64,
    pub phases: Vec<KickPhase>,
}

impl KickDefinition {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let definition: Self = toml::from_str(content)?;
        definition.validate()?;
        Ok(definition)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(ConfigError::invalid("kick.name", "must not be empty"));
        }
        if self.phases.is_empty() {
            return Err(ConfigError::invalid(
                format!("kick {}", self.name),
                "needs at least one phase",
            ));
        }
        for (i, phase) in self.phases.iter().enumerate() {
            if !(phase.duration > 0.0) {
                return Err(ConfigError::invalid(
                    format!("kick {} phase {i}", self.name),
                    "duration must be positive",
                ));
            }
            let finite = Limb::ALL
                .iter()
                .filter_map(|&limb| phase.control_points(limb))
                .flatten()
                .flatten()
                .all(|value| value.is_finite());
            if !finite {
                return Err(ConfigError::invalid(
                    format!("kick {} phase {i}", self.name),
                    "control points must be finite",
                ));
            }
        }
        if !(0.0..=1.0).contains(&self.stiffness) {
            return Err(ConfigError::invalid(
                format!("kick {}", self.name),
                "stiffness must be in [0, 1]",
            ));
        }
        Ok(())
    }

    pub fn total_duration(&self) -> f64 {
        self.phases.iter().map(|phase| phase.duration).sum()
    }

    pub fn moves(&self, limb: Limb) -> bool {
        self.phases
            .iter()
            .any(|phase| phase.control_points(limb).is_some())
    }

    /// Position of `limb` at `time`, starting from `origin`.
    pub fn evaluate(
        &self,
        limb: Limb,
        origin: &na::Vector3<f64>,
        time: f64,
        mirrored: bool,
    ) -> na::Vector3<f64> {
        let mut start = *origin;
        let mut phase_start = 0.0;
        for phase in &self.phases {
            let curve = phase.curve(limb, mirrored);
            let phase_end = phase_start + phase.duration;
            if time < phase_end {
                return match curve {
                    Some([control, end]) => {
                        let s = ((time - phase_start) / phase.duration).clamp(0.0, 1.0);
                        quadratic_bezier(&start, &control, &end, s)
                    }
                    None => start,
                };
            }
            if let Some([_, end]) = curve {
                start = end;
            }
            phase_start = phase_end;
        }
        start
    }

    /// Offset of the kicking foot at `fraction` of the kick, used by kicks inside the walk.
    ///
    /// Positions and rotations start from zero, so the result is relative to the walking foot.
    pub fn foot_offset_at(&self, fraction: f64, mirrored: bool) -> na::Isometry3<f64> {
        let time = fraction.clamp(0.0, 1.0) * self.total_duration();
        let (foot, rotation) = if mirrored {
            (Limb::RightFoot, Limb::RightFootRotation)
        } else {
            (Limb::LeftFoot, Limb::LeftFootRotation)
        };
        let zero = na::Vector3::zeros();
        let translation = self.evaluate(foot, &zero, time, mirrored);
        let rpy = self.evaluate(rotation, &zero, time, mirrored);
        na::Isometry3::from_parts(
            na::Translation3::from(translation),
            na::UnitQuaternion::from_euler_angles(rpy.x, rpy.y, rpy.z),
        )
    }
}

/// All known kicks, by name.
#[derive(Debug, Clone, Default)]
pub struct KickLibrary {
    definitions: BTreeMap<String, KickDefinition>,
    directory: Option<PathBuf>,
}

impl KickLibrary {
    /// The kicks compiled into the binary.
    pub fn builtin() -> Result<Self> {
        let mut library = Self::default();
        for content in BUILTIN_KICKS {
            library.insert(KickDefinition::from_toml_str(content)?)?;
        }
        Ok(library)
    }

    /// Loads every `*.toml` kick of a directory; the directory is remembered for [`Self::reload`].
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut library = Self {
            definitions: BTreeMap::new(),
            directory: Some(dir.to_path_buf()),
        };
        for (path, definition) in load_toml_dir::<KickDefinition>(dir)? {
            debug!(path = %path.display(), name = %definition.name, "loaded kick");
            library.insert(definition)?;
        }
        info!(count = library.definitions.len(), dir = %dir.display(), "kick library loaded");
        Ok(library)
    }

    /// Re-reads the directory the library was loaded from. The library is unchanged on error.
    pub fn reload(&mut self) -> Result<()> {
        if let Some(dir) = &self.directory {
            *self = Self::load_dir(dir.clone())?;
        }
        Ok(())
    }

    pub fn insert(&mut self, definition: KickDefinition) -> Result<()> {
        definition.validate()?;
        if self.definitions.contains_key(&definition.name) {
            return Err(ConfigError::DuplicateMotion(definition.name));
        }
        self.definitions.insert(definition.name.clone(), definition);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&KickDefinition> {
        self.definitions.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.definitions.keys().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KickConfig {
    /// Balance controller moving the body over the support foot
    pub pid: PidGains,
    /// COM error below which the pose after the last phase counts as recovered (m)
    pub recovery_threshold: f64,
    /// Longest time to hold the final pose waiting for recovery (s)
    pub max_recovery_time: f64,
    /// Directory with kick definitions, replaces the built-in kicks
    pub directory: Option<PathBuf>,
}

impl Default for KickConfig {
    fn default() -> Self {
        Self {
            pid: PidGains::default(),
            recovery_threshold: 0.01,
            max_recovery_time: 1.0,
            directory: None,
        }
    }
}

impl KickConfig {
    pub fn validate(&self) -> Result<()> {
        if self.recovery_threshold <= 0.0 {
            return Err(ConfigError::invalid("kick.recovery_threshold", "must be positive"));
        }
        if self.max_recovery_time < 0.0 {
            return Err(ConfigError::invalid("kick.max_recovery_time", "must not be negative"));
        }
        if !self.pid.is_valid() {
            return Err(ConfigError::invalid("kick.pid", "gains must be finite and non-negative"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct KickOutput {
    pub request: JointRequest,
    /// Playback and recovery are done
    pub is_finished: bool,
    /// The centre of mass is above the support foot
    pub is_stable: bool,
    pub owns_head: bool,
    pub reachable: bool,
}

/// Playback state of the running kick, rebuilt at every start.
#[derive(Debug, Clone)]
struct KickPlayback {
    definition: KickDefinition,
    kick_leg: Side,
    time: f64,
    origins: [na::Vector3<f64>; Limb::COUNT],
    pid: PidController,
    recovering: bool,
    recovery_time: f64,
    finished: bool,
}

impl KickPlayback {
    fn mirrored(&self) -> bool {
        self.kick_leg == Side::Right
    }

    fn support(&self) -> Side {
        self.kick_leg.opposite()
    }
}

pub struct KickEngine {
    library: Arc<KickLibrary>,
    config: KickConfig,
    dims: RobotDimensions,
    limits: JointLimits,
    masses: MassModel,
    playback: Option<KickPlayback>,
    /// The last start named an unknown kick
    start_failed: bool,
}

impl KickEngine {
    pub fn new(
        library: Arc<KickLibrary>,
        config: KickConfig,
        dims: RobotDimensions,
        limits: JointLimits,
        masses: MassModel,
    ) -> Self {
        Self {
            library,
            config,
            dims,
            limits,
            masses,
            playback: None,
            start_failed: false,
        }
    }

    pub fn set_library(&mut self, library: Arc<KickLibrary>) {
        self.library = library;
    }

    pub fn is_running(&self) -> bool {
        self.playback.as_ref().is_some_and(|playback| !playback.finished)
    }

    pub fn start_failed(&self) -> bool {
        self.start_failed
    }

    /// Integral term of the running kick's balance controller.
    pub fn balance_integral(&self) -> Option<na::Vector2<f64>> {
        self.playback.as_ref().map(|playback| playback.pid.integral())
    }

    /// Whether a start was attempted since the last [`Self::stop`].
    pub fn is_started(&self) -> bool {
        self.playback.is_some() || self.start_failed
    }

    /// Centre of mass relative to the support ankle, from sensed joints.
    fn com_relative_to(
        &self,
        support: Side,
        joints: &JointValues,
    ) -> (na::Vector3<f64>, na::Isometry3<f64>) {
        let tilt = na::Vector2::zeros();
        let com = center_of_mass(joints, &tilt, &self.dims, &self.masses);
        let ankle = leg_forward_kinematics(&joints.leg(support), support, &tilt, &self.dims);
        (com - ankle.translation.vector, ankle)
    }

    /// Starts `request.name`, measuring every limb's origin from the sensed posture.
    pub fn start(
        &mut self,
        request: &KickRequest,
        sensors: &SensorData,
    ) -> std::result::Result<(), MotionError> {
        let Some(definition) = self.library.get(&request.name).cloned() else {
            self.start_failed = true;
            return Err(MotionError::UnknownKick(request.name.clone()));
        };
        self.start_failed = false;

        let joints = &sensors.joint_angles;
        let tilt = na::Vector2::zeros();
        let mut origins = [na::Vector3::zeros(); Limb::COUNT];
        for side in [Side::Left, Side::Right] {
            let ankle = leg_forward_kinematics(&joints.leg(side), side, &tilt, &self.dims);
            let (roll, pitch, yaw) = ankle.rotation.euler_angles();
            let (_, hand) = arm_forward_kinematics(&joints.arm(side), &self.dims);
            let (foot, rotation, hand_limb) = match side {
                Side::Left => (Limb::LeftFoot, Limb::LeftFootRotation, Limb::LeftHand),
                Side::Right => (Limb::RightFoot, Limb::RightFootRotation, Limb::RightHand),
            };
            origins[foot.index()] = ankle.translation.vector;
            origins[rotation.index()] = na::Vector3::new(roll, pitch, yaw);
            origins[hand_limb.index()] = self.dims.shoulder_position(side.sign()) + hand;
        }
        let (com, _) = self.com_relative_to(request.kick_leg.opposite(), joints);
        origins[Limb::Com.index()] = com;
        origins[Limb::Head.index()] =
            na::Vector3::new(joints[Joint::HeadYaw], joints[Joint::HeadPitch], 0.0);

        info!(kick = %definition.name, leg = ?request.kick_leg, "starting kick");
        self.playback = Some(KickPlayback {
            definition,
            kick_leg: request.kick_leg,
            time: 0.0,
            origins,
            pid: PidController::new(self.config.pid.clone()),
            recovering: false,
            recovery_time: 0.0,
            finished: false,
        });
        Ok(())
    }

    pub fn stop(&mut self) {
        self.playback = None;
        self.start_failed = false;
    }

    pub fn update(&mut self, sensors: &SensorData, dt: f64) -> KickOutput {
        let Some(mut playback) = self.playback.take() else {
            return KickOutput {
                request: JointRequest::new(sensors.joint_angles, 0.0),
                is_finished: true,
                is_stable: true,
                owns_head: false,
                reachable: true,
            };
        };
        let output = self.play(&mut playback, sensors, dt);
        self.playback = Some(playback);
        output
    }

    fn play(&self, playback: &mut KickPlayback, sensors: &SensorData, dt: f64) -> KickOutput {
        let total = playback.definition.total_duration();
        if !playback.finished {
            playback.time += dt;
            if playback.time >= total {
                if playback.definition.looping {
                    playback.time = playback.time.rem_euclid(total);
                } else if !playback.recovering {
                    debug!(kick = %playback.definition.name, "kick phases done, recovering");
                    playback.recovering = true;
                    playback.recovery_time = 0.0;
                }
            }
        }

        let mirrored = playback.mirrored();
        let time = playback.time.min(total);
        let origins = playback.origins;
        let definition = &playback.definition;
        let target = |limb: Limb| definition.evaluate(limb, &origins[limb.index()], time, mirrored);

        let support = playback.support();
        let (com, support_ankle) = self.com_relative_to(support, &sensors.joint_angles);
        let com_target = target(Limb::Com);
        let error = (com_target - com).xy();
        let correction = playback.pid.update(error, dt);
        let body_shift = (com_target - origins[Limb::Com.index()]).xy() + correction;
        let shift = na::Vector3::new(body_shift.x, body_shift.y, 0.0);

        let foot_pose = |position: Limb, rotation: Limb| {
            let rpy = target(rotation);
            na::Isometry3::from_parts(
                na::Translation3::from(target(position) - shift),
                na::UnitQuaternion::from_euler_angles(rpy.x, rpy.y, rpy.z),
            )
        };
        let left = foot_pose(Limb::LeftFoot, Limb::LeftFootRotation);
        let right = foot_pose(Limb::RightFoot, Limb::RightFootRotation);
        let ratio = match support {
            Side::Left => 1.0,
            Side::Right => 0.0,
        };
        let legs = calc_leg_joints(&left, &right, &na::Vector2::zeros(), &self.dims, ratio);
        if !legs.reachable {
            debug!(kick = %definition.name, time, "kick foot targets out of reach");
        }

        let mut angles = sensors.joint_angles;
        angles.set_leg(Side::Left, legs.left);
        angles.set_leg(Side::Right, legs.right);
        for joint in Joint::leg(Side::Left).into_iter().chain(Joint::leg(Side::Right)) {
            angles[joint] = self.limits.clamp(joint, angles[joint]);
        }
        let moves_hands = definition.moves(Limb::LeftHand) || definition.moves(Limb::RightHand);
        for (side, limb) in [(Side::Left, Limb::LeftHand), (Side::Right, Limb::RightHand)] {
            if !moves_hands {
                break;
            }
            let hand = target(limb) - self.dims.shoulder_position(side.sign());
            let arm = calc_arm_joints(side, &hand, 0.0, &self.dims, &self.limits);
            if !arm.errors.is_empty() {
                debug!(?side, errors = arm.errors.bits(), "kick arm target clamped");
            }
            angles.set_arm(side, arm.joints);
        }

        let owns_head = definition.moves(Limb::Head);
        if owns_head {
            let head = target(Limb::Head);
            angles[Joint::HeadYaw] = head.x;
            angles[Joint::HeadPitch] = head.y;
        }

        let polygon = foot_support_polygon(&support_ankle, &self.dims);
        let com_position = com + support_ankle.translation.vector;
        let is_stable = is_inside_convex_polygon(&com_position.xy(), &polygon);

        if playback.recovering && !playback.finished {
            playback.recovery_time += dt;
            if error.norm() < self.config.recovery_threshold {
                playback.finished = true;
            } else if playback.recovery_time >= self.config.max_recovery_time {
                warn!(
                    kick = %definition.name,
                    error = error.norm(),
                    "kick did not recover in time"
                );
                playback.finished = true;
            }
        }

        let mut stiffness = JointValues::filled(definition.stiffness);
        if !owns_head {
            for joint in Joint::HEAD {
                stiffness[joint] = 0.0;
            }
        }

        KickOutput {
            request: JointRequest { angles, stiffness },
            is_finished: playback.finished,
            is_stable,
            owns_head,
            reachable: legs.reachable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::walk::standing_leg_joints;
    use approx::assert_relative_eq;

    fn standing_sensors() -> SensorData {
        let dims = RobotDimensions::default();
        let (left, right) = standing_leg_joints(0.185, &na::Vector2::zeros(), &dims);
        let mut sensors = SensorData::new();
        sensors.joint_angles.set_leg(Side::Left, left);
        sensors.joint_angles.set_leg(Side::Right, right);
        sensors.joint_angles.set_arm(Side::Left, [1.5, 0.15, -1.4, -0.1]);
        sensors.joint_angles.set_arm(Side::Right, [1.5, -0.15, 1.4, 0.1]);
        sensors
    }

    fn engine() -> KickEngine {
        KickEngine::new(
            Arc::new(KickLibrary::builtin().unwrap()),
            KickConfig::default(),
            RobotDimensions::default(),
            JointLimits::default(),
            MassModel::default(),
        )
    }

    fn two_phase_definition() -> KickDefinition {
        KickDefinition::from_toml_str(
            r#"
            name = "test"
            [[phases]]
            duration = 0.5
            left_foot = [[0.1, 0.0, 0.0], [0.2, 0.1, 0.0]]
            left_foot_rotation = [[0.1, 0.0, 0.2], [0.2, 0.0, 0.3]]
            [[phases]]
            duration = 0.5
            left_foot = [[0.3, 0.1, 0.0], [0.0, 0.0, 0.0]]
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_builtin_library() {
        let library = KickLibrary::builtin().unwrap();
        let names: Vec<_> = library.names().collect();
        assert_eq!(names, vec!["forward", "walk_forward"]);
        assert_eq!(library.get("forward").unwrap().version, 1);
    }

    #[test]
    fn test_curves_continuous_across_phases() {
        let definition = two_phase_definition();
        let origin = na::Vector3::new(0.0, 0.05, -0.27);
        let before = definition.evaluate(Limb::LeftFoot, &origin, 0.5 - 1e-9, false);
        let after = definition.evaluate(Limb::LeftFoot, &origin, 0.5 + 1e-9, false);
        assert_relative_eq!(before, after, epsilon = 1e-6);
        assert_relative_eq!(after, na::Vector3::new(0.2, 0.1, 0.0), epsilon = 1e-6);

        assert_relative_eq!(definition.evaluate(Limb::LeftFoot, &origin, 0.0, false), origin);
        // limbs without curves hold their origin
        assert_relative_eq!(definition.evaluate(Limb::RightFoot, &origin, 0.7, false), origin);
        // past the end the last point holds
        assert_relative_eq!(
            definition.evaluate(Limb::LeftFoot, &origin, 5.0, false),
            na::Vector3::zeros()
        );
    }

    #[test]
    fn test_mirrored_kick_reflects_left_curves() {
        let definition = two_phase_definition();
        let origin = na::Vector3::new(0.0, 0.05, -0.27);
        let mirrored_origin = na::Vector3::new(0.0, -0.05, -0.27);
        for time in [0.1, 0.4, 0.6, 0.9] {
            let left = definition.evaluate(Limb::LeftFoot, &origin, time, false);
            let right = definition.evaluate(Limb::RightFoot, &mirrored_origin, time, true);
            assert_relative_eq!(right, na::Vector3::new(left.x, -left.y, left.z), epsilon = 1e-12);

            let rotation = definition.evaluate(Limb::LeftFootRotation, &na::Vector3::zeros(), time, false);
            let mirrored = definition.evaluate(Limb::RightFootRotation, &na::Vector3::zeros(), time, true);
            assert_relative_eq!(
                mirrored,
                na::Vector3::new(-rotation.x, rotation.y, -rotation.z),
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn test_in_walk_foot_offset() {
        let library = KickLibrary::builtin().unwrap();
        let kick = library.get("walk_forward").unwrap();

        let start = kick.foot_offset_at(0.0, false);
        assert_relative_eq!(start.translation.vector, na::Vector3::zeros());
        let end = kick.foot_offset_at(1.0, false);
        assert_relative_eq!(end.translation.vector, na::Vector3::zeros(), epsilon = 1e-12);

        let middle = kick.foot_offset_at(0.6, false);
        assert!(middle.translation.x > 0.0);
        let mirrored = kick.foot_offset_at(0.6, true);
        assert_relative_eq!(mirrored.translation.x, middle.translation.x);
        assert_relative_eq!(mirrored.translation.y, -middle.translation.y);
    }

    #[test]
    fn test_unknown_kick() {
        let mut engine = engine();
        let result = engine.start(&KickRequest::new("bicycle", Side::Left), &SensorData::new());
        assert_eq!(result, Err(MotionError::UnknownKick("bicycle".to_string())));
        assert!(!engine.is_running());
        assert!(engine.is_started());
        engine.stop();
        assert!(!engine.is_started());
    }

    #[test]
    fn test_forward_kick_plays_and_finishes() {
        let mut engine = engine();
        let sensors = standing_sensors();
        let dims = RobotDimensions::default();
        engine.start(&KickRequest::new("forward", Side::Left), &sensors).unwrap();
        assert!(engine.is_running());

        // sample the strike phase: 0.6 + 0.3 + 0.15
        let dt = 0.01;
        let mut max_forward = f64::NEG_INFINITY;
        let mut finished = false;
        for i in 0..600 {
            let output = engine.update(&sensors, dt);
            assert!(output.request.first_non_finite().is_none());
            assert!(!output.owns_head);
            let left = leg_forward_kinematics(
                &output.request.angles.leg(Side::Left),
                Side::Left,
                &na::Vector2::zeros(),
                &dims,
            );
            let right = leg_forward_kinematics(
                &output.request.angles.leg(Side::Right),
                Side::Right,
                &na::Vector2::zeros(),
                &dims,
            );
            max_forward = max_forward.max(left.translation.x - right.translation.x);
            if output.is_finished {
                finished = true;
                assert!((i + 1) as f64 * dt >= 2.25 - 1e-6);
                break;
            }
        }
        assert!(finished);
        assert!(max_forward > 0.05);
        assert!(!engine.is_running());
    }

    #[test]
    fn test_right_kick_moves_right_foot() {
        let mut engine = engine();
        let sensors = standing_sensors();
        let dims = RobotDimensions::default();
        engine.start(&KickRequest::new("forward", Side::Right), &sensors).unwrap();

        let mut output = None;
        for _ in 0..110 {
            output = Some(engine.update(&sensors, 0.01));
        }
        let angles = output.unwrap().request.angles;
        let tilt = na::Vector2::zeros();
        let left = leg_forward_kinematics(&angles.leg(Side::Left), Side::Left, &tilt, &dims);
        let right = leg_forward_kinematics(&angles.leg(Side::Right), Side::Right, &tilt, &dims);
        assert!(right.translation.x - left.translation.x > 0.03);
        assert!(right.translation.z > left.translation.z);
    }

    /// Library with a kick that keeps every limb at its start position for `duration`.
    fn hold_engine(duration: f64, config: KickConfig) -> KickEngine {
        let mut library = KickLibrary::builtin().unwrap();
        let hold = KickDefinition::from_toml_str(&format!(
            "name = \"hold\"\n[[phases]]\nduration = {duration:?}\n"
        ))
        .unwrap();
        library.insert(hold).unwrap();
        KickEngine::new(
            Arc::new(library),
            config,
            RobotDimensions::default(),
            JointLimits::default(),
            MassModel::default(),
        )
    }

    /// Standing posture with both arms raised forward, moving the centre of mass ahead.
    fn arms_forward_sensors() -> SensorData {
        let mut sensors = standing_sensors();
        sensors.joint_angles.set_arm(Side::Left, [0.0, 0.15, -1.4, -0.1]);
        sensors.joint_angles.set_arm(Side::Right, [0.0, -0.15, 1.4, 0.1]);
        sensors
    }

    fn left_ankle(request: &JointRequest) -> na::Isometry3<f64> {
        leg_forward_kinematics(
            &request.angles.leg(Side::Left),
            Side::Left,
            &na::Vector2::zeros(),
            &RobotDimensions::default(),
        )
    }

    #[test]
    fn test_com_error_shifts_feet_and_clamps_integral() {
        let integral_limit = 1e-4;
        let config = KickConfig {
            pid: PidGains {
                integral_limit: na::Vector2::repeat(integral_limit),
                ..Default::default()
            },
            ..Default::default()
        };
        let request = KickRequest::new("hold", Side::Left);
        let mut balanced = hold_engine(2.0, config.clone());
        let mut disturbed = hold_engine(2.0, config);
        balanced.start(&request, &standing_sensors()).unwrap();
        disturbed.start(&request, &standing_sensors()).unwrap();

        let mut balanced_output = None;
        let mut disturbed_output = None;
        for _ in 0..100 {
            balanced_output = Some(balanced.update(&standing_sensors(), 0.01));
            disturbed_output = Some(disturbed.update(&arms_forward_sensors(), 0.01));
        }

        // no error, no correction
        assert_relative_eq!(balanced.balance_integral().unwrap(), na::Vector2::zeros());
        // the centre of mass is ahead of its target, so the feet move forward under it
        let integral = disturbed.balance_integral().unwrap();
        assert_relative_eq!(integral.x, -integral_limit, epsilon = 1e-12);
        assert!(integral.y.abs() <= integral_limit + 1e-12);
        let balanced_x = left_ankle(&balanced_output.unwrap().request).translation.x;
        let disturbed_x = left_ankle(&disturbed_output.unwrap().request).translation.x;
        assert!(disturbed_x - balanced_x > 0.002, "{balanced_x} {disturbed_x}");
    }

    #[test]
    fn test_recovery_ends_once_error_below_threshold() {
        let config = KickConfig {
            recovery_threshold: 0.002,
            max_recovery_time: 1.0,
            ..Default::default()
        };
        let mut engine = hold_engine(0.2, config);
        engine.start(&KickRequest::new("hold", Side::Left), &standing_sensors()).unwrap();

        // phases end at 0.2 s, then the displaced centre of mass keeps the kick recovering
        let dt = 0.01;
        for _ in 0..50 {
            let output = engine.update(&arms_forward_sensors(), dt);
            assert!(!output.is_finished);
        }
        assert!(engine.is_running());

        // back in the start posture the error vanishes long before the recovery timeout
        let output = engine.update(&standing_sensors(), dt);
        assert!(output.is_finished);
        assert!(!engine.is_running());
    }

    #[test]
    fn test_recovery_times_out() {
        let config = KickConfig {
            recovery_threshold: 0.002,
            max_recovery_time: 0.3,
            ..Default::default()
        };
        let mut engine = hold_engine(0.2, config);
        engine.start(&KickRequest::new("hold", Side::Left), &standing_sensors()).unwrap();

        let dt = 0.01;
        let mut cycles = 0;
        while !engine.update(&arms_forward_sensors(), dt).is_finished {
            cycles += 1;
            assert!(cycles < 200);
        }
        assert!(cycles as f64 * dt >= 0.2 + 0.3 - 2.0 * dt);
    }

    #[test]
    fn test_definition_validation() {
        let err = KickDefinition::from_toml_str(
            r#"
            name = "broken"
            [[phases]]
            duration = 0.0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err = KickDefinition::from_toml_str("name = \"empty\"\nphases = []").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_load_dir_and_duplicates() {
        let dir = std::env::temp_dir().join(format!("biped_motion_kicks_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("a.toml"), "name = \"a\"\n[[phases]]\nduration = 0.2\n").unwrap();
        std::fs::write(dir.join("ignored.txt"), "not a kick").unwrap();

        let mut library = KickLibrary::load_dir(&dir).unwrap();
        assert_eq!(library.names().collect::<Vec<_>>(), vec!["a"]);

        std::fs::write(dir.join("b.toml"), "name = \"b\"\n[[phases]]\nduration = 0.2\n").unwrap();
        library.reload().unwrap();
        assert_eq!(library.names().count(), 2);

        std::fs::write(dir.join("c.toml"), "name = \"a\"\n[[phases]]\nduration = 0.2\n").unwrap();
        assert!(matches!(library.reload(), Err(ConfigError::DuplicateMotion(name)) if name == "a"));
        // a failed reload keeps the previous definitions
        assert_eq!(library.names().count(), 2);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}

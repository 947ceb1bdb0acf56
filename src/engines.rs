//! The motion engines the selector blends between.
//!
//! Every engine turns the cycle's sensor data and request into a full joint request. Engines
//! are reset when they become active and are only updated while their selection ratio is
//! nonzero.

use std::sync::Arc;

use nalgebra as na;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::biped::{RobotDimensions, SensorData};
use crate::error::{ConfigError, MotionError, Result};
use crate::joints::{Joint, JointRequest, JointValues, Side};
use crate::keyframe::{KeyframeLibrary, KeyframePlayer};
use crate::kick::{KickEngine, KickLibrary};
use crate::request::{KickRequest, MotionKind, MotionRequest, WalkRequest};
use crate::walk::{
    standing_leg_joints, WalkGenerator, WalkInput, WalkState, WeightShiftStatus,
};

/// Inputs of one engine cycle.
pub struct MotionInput<'a> {
    pub sensors: &'a SensorData,
    pub request: &'a MotionRequest,
    pub dt: f64,
}

/// Walk generator state echoed to behavior.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WalkStatus {
    pub walk_state: WalkState,
    pub is_left_phase: bool,
    pub weight_shift_status: WeightShiftStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MotionOutput {
    pub request: JointRequest,
    /// Displacement of the robot during this cycle
    pub odometry_offset: na::Isometry2<f64>,
    /// Displacement the engine will still produce in its current step or motion
    pub upcoming_offset: na::Isometry2<f64>,
    /// The selector may switch to another motion
    pub is_leaving_possible: bool,
    pub is_stable: bool,
    /// The head angles of `request` are meant to be used
    pub owns_head: bool,
    pub walk: Option<WalkStatus>,
}

impl MotionOutput {
    /// Output of an engine that does not move the robot through space.
    pub fn in_place(request: JointRequest, is_leaving_possible: bool, is_stable: bool) -> Self {
        Self {
            request,
            odometry_offset: na::Isometry2::identity(),
            upcoming_offset: na::Isometry2::identity(),
            is_leaving_possible,
            is_stable,
            owns_head: false,
            walk: None,
        }
    }
}

pub trait MotionEngine {
    fn kind(&self) -> MotionKind;

    /// Prepares the engine to take over from the sensed posture.
    fn reset(&mut self, sensors: &SensorData);

    fn update(&mut self, input: &MotionInput) -> MotionOutput;
}

/// Sensed posture with a low stiffness, used when an engine has nothing to play.
fn hold_sensed(sensors: &SensorData, stiffness: f64) -> JointRequest {
    JointRequest::new(sensors.joint_angles, stiffness)
}

#[derive(Debug, Clone, PartialEq, Default)]
enum InWalkKick {
    #[default]
    Idle,
    /// Applied to the swing foot during the current step
    Active(KickRequest),
    /// Played already; cleared when the request changes
    Done(KickRequest),
}

/// Walk generator with in-walk kicks from the kick library.
pub struct WalkEngine {
    generator: WalkGenerator,
    kicks: Arc<KickLibrary>,
    in_walk_kick: InWalkKick,
}

impl WalkEngine {
    pub fn new(generator: WalkGenerator, kicks: Arc<KickLibrary>) -> Self {
        Self {
            generator,
            kicks,
            in_walk_kick: InWalkKick::Idle,
        }
    }

    pub fn generator(&self) -> &WalkGenerator {
        &self.generator
    }

    pub fn set_kicks(&mut self, kicks: Arc<KickLibrary>) {
        self.kicks = kicks;
    }

    pub fn is_in_walk_kick_active(&self) -> bool {
        matches!(self.in_walk_kick, InWalkKick::Active(_))
    }

    /// Starts a requested in-walk kick when a step of its kick leg begins.
    fn select_in_walk_kick(&mut self, requested: Option<&KickRequest>) {
        let Some(requested) = requested else {
            self.in_walk_kick = InWalkKick::Idle;
            return;
        };
        match &self.in_walk_kick {
            InWalkKick::Active(_) => return,
            InWalkKick::Done(done) if done == requested => return,
            _ => {}
        }

        let step = self.generator.step_state();
        let step_begins = step.t == 0.0
            && matches!(step.walk_state, WalkState::Starting | WalkState::Walking)
            && step.swing_side() == requested.kick_leg;
        if !step_begins {
            return;
        }
        if self.kicks.get(&requested.name).is_none() {
            warn!(kick = %requested.name, "unknown in-walk kick");
            self.in_walk_kick = InWalkKick::Done(requested.clone());
            return;
        }
        info!(kick = %requested.name, leg = ?requested.kick_leg, "in-walk kick");
        self.in_walk_kick = InWalkKick::Active(requested.clone());
    }
}

impl MotionEngine for WalkEngine {
    fn kind(&self) -> MotionKind {
        MotionKind::Walk
    }

    fn reset(&mut self, _sensors: &SensorData) {
        self.generator.reset();
        self.in_walk_kick = InWalkKick::Idle;
    }

    fn update(&mut self, input: &MotionInput) -> MotionOutput {
        // another motion is wanted, so finish the current step and stand
        let stop = WalkRequest::stop();
        let walk_request = if input.request.kind == MotionKind::Walk {
            &input.request.walk
        } else {
            &stop
        };
        self.select_in_walk_kick(walk_request.in_walk_kick.as_ref());

        let kicks = Arc::clone(&self.kicks);
        let active = match &self.in_walk_kick {
            InWalkKick::Active(request) => kicks
                .get(&request.name)
                .map(|definition| (definition, request.kick_leg == Side::Right)),
            _ => None,
        };
        let kick_offset = active.map(|(definition, mirrored)| {
            move |phase: f64| definition.foot_offset_at(phase, mirrored)
        });

        let output = self.generator.calc_joints(&WalkInput {
            request: walk_request,
            sensors: input.sensors,
            dt: input.dt,
            kick_foot_offset: kick_offset
                .as_ref()
                .map(|offset| offset as &dyn Fn(f64) -> na::Isometry3<f64>),
        });

        // the step with the kick ended at this cycle's support switch
        if let InWalkKick::Active(request) = &self.in_walk_kick {
            if self.generator.step_state().t == 0.0 {
                self.in_walk_kick = InWalkKick::Done(request.clone());
            }
        }

        MotionOutput {
            request: output.request,
            odometry_offset: output.odometry_offset,
            upcoming_offset: output.upcoming_offset,
            is_leaving_possible: output.walk_state == WalkState::Standing,
            is_stable: output.weight_shift_status != WeightShiftStatus::EmergencyStep
                && !self.generator.monitor().is_cooling_down(),
            owns_head: false,
            walk: Some(WalkStatus {
                walk_state: output.walk_state,
                is_left_phase: output.is_left_phase,
                weight_shift_status: output.weight_shift_status,
            }),
        }
    }
}

impl MotionEngine for KickEngine {
    fn kind(&self) -> MotionKind {
        MotionKind::Kick
    }

    fn reset(&mut self, _sensors: &SensorData) {
        self.stop();
    }

    fn update(&mut self, input: &MotionInput) -> MotionOutput {
        if !self.is_started() {
            if let Err(err) = self.start(&input.request.kick, input.sensors) {
                error!(%err, "cannot start kick");
            }
        }
        if self.start_failed() {
            return MotionOutput::in_place(hold_sensed(input.sensors, 0.5), true, true);
        }

        let output = KickEngine::update(self, input.sensors, input.dt);
        MotionOutput {
            owns_head: output.owns_head,
            ..MotionOutput::in_place(output.request, output.is_finished, output.is_stable)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StandConfig {
    /// Vertical distance from hip to ankle (m)
    pub hip_height: f64,
    /// Time to move from the sensed posture to the stand posture (s)
    pub transition_time: f64,
    /// Left arm [shoulder pitch, shoulder roll, elbow yaw, elbow roll], mirrored for the right
    pub arm_pose: [f64; 4],
    pub leg_stiffness: f64,
    pub arm_stiffness: f64,
}

impl Default for StandConfig {
    fn default() -> Self {
        Self {
            hip_height: 0.185,
            transition_time: 0.5,
            arm_pose: [std::f64::consts::FRAC_PI_2, 0.15, -1.4, -0.1],
            leg_stiffness: 0.7,
            arm_stiffness: 0.3,
        }
    }
}

impl StandConfig {
    pub fn validate(&self, dims: &RobotDimensions) -> Result<()> {
        if self.hip_height <= dims.min_leg_length() || self.hip_height >= dims.max_leg_length() {
            return Err(ConfigError::invalid(
                "stand.hip_height",
                format!(
                    "must be in ({}, {})",
                    dims.min_leg_length(),
                    dims.max_leg_length()
                ),
            ));
        }
        if self.transition_time < 0.0 {
            return Err(ConfigError::invalid("stand.transition_time", "must not be negative"));
        }
        for (field, value) in [
            ("stand.leg_stiffness", self.leg_stiffness),
            ("stand.arm_stiffness", self.arm_stiffness),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::invalid(field, "must be in [0, 1]"));
            }
        }
        Ok(())
    }
}

/// Moves from the sensed posture into a symmetric stand and holds it.
pub struct StandEngine {
    config: StandConfig,
    stand: JointValues,
    start: JointValues,
    elapsed: f64,
}

impl StandEngine {
    pub fn new(config: StandConfig, dims: &RobotDimensions) -> Self {
        let (left, right) = standing_leg_joints(config.hip_height, &na::Vector2::zeros(), dims);
        let mut stand = JointValues::default();
        stand.set_leg(Side::Left, left);
        stand.set_leg(Side::Right, right);
        let [pitch, roll, elbow_yaw, elbow_roll] = config.arm_pose;
        stand.set_arm(Side::Left, [pitch, roll, elbow_yaw, elbow_roll]);
        stand.set_arm(Side::Right, [pitch, -roll, -elbow_yaw, -elbow_roll]);

        Self {
            config,
            start: stand,
            stand,
            elapsed: 0.0,
        }
    }

    pub fn stand_posture(&self) -> &JointValues {
        &self.stand
    }
}

impl MotionEngine for StandEngine {
    fn kind(&self) -> MotionKind {
        MotionKind::Stand
    }

    fn reset(&mut self, sensors: &SensorData) {
        self.start = sensors.joint_angles;
        self.elapsed = 0.0;
    }

    fn update(&mut self, input: &MotionInput) -> MotionOutput {
        self.elapsed += input.dt;
        let ratio = if self.config.transition_time > 0.0 {
            (self.elapsed / self.config.transition_time).min(1.0)
        } else {
            1.0
        };
        let angles = self.start.lerp(&self.stand, ratio);

        let mut stiffness = JointValues::filled(0.0);
        for side in [Side::Left, Side::Right] {
            for joint in Joint::leg(side) {
                stiffness[joint] = self.config.leg_stiffness;
            }
            for joint in Joint::arm(side) {
                stiffness[joint] = self.config.arm_stiffness;
            }
        }
        MotionOutput::in_place(JointRequest { angles, stiffness }, true, true)
    }
}

/// Plays the requested key-frame motion once.
pub struct SpecialActionEngine {
    library: Arc<KeyframeLibrary>,
    player: KeyframePlayer,
    /// Request that could not be started, to log it once
    failed: Option<String>,
}

impl SpecialActionEngine {
    pub fn new(library: Arc<KeyframeLibrary>) -> Self {
        Self {
            library,
            player: KeyframePlayer::new(),
            failed: None,
        }
    }

    pub fn set_library(&mut self, library: Arc<KeyframeLibrary>) {
        self.library = library;
    }

    fn start(
        &mut self,
        id: &str,
        mirror: bool,
        sensors: &SensorData,
    ) -> std::result::Result<(), MotionError> {
        let motion = self
            .library
            .get(id)
            .ok_or_else(|| MotionError::UnknownKeyframeMotion(id.to_string()))?;
        self.player.start(motion, mirror, &sensors.joint_angles);
        Ok(())
    }
}

impl MotionEngine for SpecialActionEngine {
    fn kind(&self) -> MotionKind {
        MotionKind::SpecialAction
    }

    fn reset(&mut self, _sensors: &SensorData) {
        self.player.stop();
        self.failed = None;
    }

    fn update(&mut self, input: &MotionInput) -> MotionOutput {
        let request = &input.request.special_action;
        if self.player.motion_name().is_none() && self.failed.as_deref() != Some(&request.id) {
            if let Err(err) = self.start(&request.id, request.mirror, input.sensors) {
                error!(%err, "cannot start special action");
                self.failed = Some(request.id.clone());
            }
        }

        match self.player.update(input.dt) {
            Some(output) => MotionOutput::in_place(output.request, output.is_finished, true),
            None => MotionOutput::in_place(hold_sensed(input.sensors, 0.5), true, true),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GetUpConfig {
    /// Key-frame motion used when lying on the front
    pub front_motion: String,
    /// Key-frame motion used when lying on the back
    pub back_motion: String,
}

impl Default for GetUpConfig {
    fn default() -> Self {
        Self {
            front_motion: "get_up_front".to_string(),
            back_motion: "get_up_back".to_string(),
        }
    }
}

/// Stands up from lying on the front or the back.
pub struct GetUpEngine {
    config: GetUpConfig,
    library: Arc<KeyframeLibrary>,
    player: KeyframePlayer,
}

impl GetUpEngine {
    /// Fails if the library lacks one of the configured motions.
    pub fn new(config: GetUpConfig, library: Arc<KeyframeLibrary>) -> Result<Self> {
        for (field, name) in [
            ("get_up.front_motion", &config.front_motion),
            ("get_up.back_motion", &config.back_motion),
        ] {
            if library.get(name).is_none() {
                return Err(ConfigError::invalid(
                    field,
                    format!("unknown key-frame motion {name}"),
                ));
            }
        }
        Ok(Self {
            config,
            library,
            player: KeyframePlayer::new(),
        })
    }

    pub fn motion_name(&self) -> Option<&str> {
        self.player.motion_name()
    }
}

impl MotionEngine for GetUpEngine {
    fn kind(&self) -> MotionKind {
        MotionKind::GetUp
    }

    fn reset(&mut self, sensors: &SensorData) {
        let pitch = sensors.body_tilt().y;
        let name = if pitch > 0.0 {
            &self.config.front_motion
        } else {
            &self.config.back_motion
        };
        match self.library.get(name) {
            Some(motion) => self.player.start(motion, false, &sensors.joint_angles),
            None => {
                error!(motion = %name, "get-up motion missing from library");
                self.player.stop();
            }
        }
    }

    fn update(&mut self, input: &MotionInput) -> MotionOutput {
        match self.player.update(input.dt) {
            Some(output) => {
                MotionOutput::in_place(output.request, output.is_finished, output.is_finished)
            }
            None => MotionOutput::in_place(hold_sensed(input.sensors, 0.5), true, false),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallConfig {
    /// Body stiffness while falling
    pub stiffness: f64,
    pub head_stiffness: f64,
    /// Time before a fall may end (s)
    pub min_duration: f64,
    /// Angular rate below which the robot counts as lying still (rad/s)
    pub settle_rate: f64,
}

impl Default for FallConfig {
    fn default() -> Self {
        Self {
            stiffness: 0.1,
            head_stiffness: 0.5,
            min_duration: 1.0,
            settle_rate: 0.3,
        }
    }
}

/// Protective posture while falling; lets go once the robot lies still.
pub struct FallEngine {
    config: FallConfig,
    forward: bool,
    elapsed: f64,
}

impl FallEngine {
    pub fn new(config: FallConfig) -> Self {
        Self {
            config,
            forward: true,
            elapsed: 0.0,
        }
    }

    pub fn is_falling_forward(&self) -> bool {
        self.forward
    }
}

impl MotionEngine for FallEngine {
    fn kind(&self) -> MotionKind {
        MotionKind::Fall
    }

    fn reset(&mut self, sensors: &SensorData) {
        self.forward = sensors.body_tilt().y >= 0.0;
        self.elapsed = 0.0;
        warn!(forward = self.forward, "falling");
    }

    fn update(&mut self, input: &MotionInput) -> MotionOutput {
        let sensors = input.sensors;
        self.elapsed += input.dt;

        let mut angles = sensors.joint_angles;
        // arms in front of the body when falling forward, along it otherwise
        let (head_pitch, shoulder_pitch, elbow_roll) = if self.forward {
            (-0.5, 0.2, 0.5)
        } else {
            (0.5, 2.0, 0.05)
        };
        angles[Joint::HeadYaw] = 0.0;
        angles[Joint::HeadPitch] = head_pitch;
        for side in [Side::Left, Side::Right] {
            let sign = side.sign();
            angles.set_arm(
                side,
                [shoulder_pitch, sign * 0.2, -sign * 1.4, -sign * elbow_roll],
            );
        }

        let mut stiffness = JointValues::filled(self.config.stiffness);
        for joint in Joint::HEAD {
            stiffness[joint] = self.config.head_stiffness;
        }

        let settled = self.elapsed >= self.config.min_duration
            && sensors.gyro.norm() < self.config.settle_rate;
        MotionOutput {
            odometry_offset: na::Isometry2::rotation(sensors.gyro.z * input.dt),
            owns_head: true,
            ..MotionOutput::in_place(JointRequest { angles, stiffness }, settled, false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::biped::{JointLimits, MassModel};
    use crate::ik::leg_forward_kinematics;
    use crate::kick::KickConfig;
    use crate::pose::Step;
    use crate::walk::WalkConfig;
    use approx::assert_relative_eq;

    const DT: f64 = 0.0125;

    fn walk_engine() -> WalkEngine {
        WalkEngine::new(
            WalkGenerator::new(
                WalkConfig::default(),
                RobotDimensions::default(),
                JointLimits::default(),
            ),
            Arc::new(KickLibrary::builtin().unwrap()),
        )
    }

    /// Support signal of a robot whose weight moves to the swing leg late in the step.
    fn support_signal(engine: &WalkEngine) -> f64 {
        let generator = engine.generator();
        let swing_sign = if generator.is_left_phase() { 1.0 } else { -1.0 };
        if generator.phase() >= 0.9 {
            swing_sign
        } else {
            -swing_sign
        }
    }

    fn tilted(pitch: f64) -> SensorData {
        SensorData {
            orientation: Some(na::UnitQuaternion::from_euler_angles(0.0, pitch, 0.0)),
            ..SensorData::new()
        }
    }

    #[test]
    fn test_in_walk_kick_moves_kick_foot_once() {
        let dims = RobotDimensions::default();
        let mut plain = walk_engine();
        let mut kicking = walk_engine();
        let walk = MotionRequest::walk_at(Step::new(0.1, 0.0, 0.0));
        let mut kick = walk.clone();
        kick.walk.in_walk_kick = Some(KickRequest::new("walk_forward", Side::Left));

        let mut kicked_cycles = 0;
        let mut was_active = false;
        for _ in 0..400 {
            let sensors = SensorData {
                foot_support: support_signal(&plain),
                ..SensorData::new()
            };
            let left_phase = kicking.generator().is_left_phase();
            let a = plain.update(&MotionInput { sensors: &sensors, request: &walk, dt: DT });
            let b = kicking.update(&MotionInput { sensors: &sensors, request: &kick, dt: DT });

            let tilt = na::Vector2::zeros();
            let left_a = leg_forward_kinematics(&a.request.angles.leg(Side::Left), Side::Left, &tilt, &dims);
            let left_b = leg_forward_kinematics(&b.request.angles.leg(Side::Left), Side::Left, &tilt, &dims);
            let right_a = leg_forward_kinematics(&a.request.angles.leg(Side::Right), Side::Right, &tilt, &dims);
            let right_b = leg_forward_kinematics(&b.request.angles.leg(Side::Right), Side::Right, &tilt, &dims);
            if (left_a.translation.vector - left_b.translation.vector).norm() > 1e-4 {
                kicked_cycles += 1;
                assert!(left_phase);
            }
            assert_relative_eq!(right_a.translation.vector, right_b.translation.vector, epsilon = 1e-6);
            was_active |= kicking.is_in_walk_kick_active();
        }
        assert!(was_active);
        assert!(kicked_cycles > 5);
        // played once, then the walk continues unchanged
        assert!(!kicking.is_in_walk_kick_active());
    }

    #[test]
    fn test_walk_leaving_possible_only_when_standing() {
        let mut engine = walk_engine();
        let sensors = SensorData::new();
        let stand = MotionRequest::stand();
        let output = engine.update(&MotionInput { sensors: &sensors, request: &stand, dt: DT });
        assert!(output.is_leaving_possible);

        let walk = MotionRequest::walk_at(Step::new(0.1, 0.0, 0.0));
        let output = engine.update(&MotionInput { sensors: &sensors, request: &walk, dt: DT });
        assert!(!output.is_leaving_possible);
        assert_eq!(output.walk.unwrap().walk_state, WalkState::Starting);
    }

    #[test]
    fn test_walk_stops_for_other_motion_despite_walk_speed() {
        let mut engine = walk_engine();
        let walk = MotionRequest::walk_at(Step::new(0.1, 0.0, 0.0));
        let mut kick = MotionRequest::kick("forward", Side::Left);
        kick.walk = walk.walk.clone();

        let run = |engine: &mut WalkEngine, request: &MotionRequest, cycles: usize| {
            let mut last = None;
            for _ in 0..cycles {
                let sensors = SensorData {
                    foot_support: support_signal(engine),
                    ..SensorData::new()
                };
                last = Some(engine.update(&MotionInput { sensors: &sensors, request, dt: DT }));
            }
            last.unwrap()
        };
        let output = run(&mut engine, &walk, 100);
        assert_eq!(output.walk.unwrap().walk_state, WalkState::Walking);

        let output = run(&mut engine, &kick, 100);
        assert_eq!(output.walk.unwrap().walk_state, WalkState::Standing);
        assert!(output.is_leaving_possible);
    }

    #[test]
    fn test_kick_engine_plays_requested_kick() {
        let mut engine = KickEngine::new(
            Arc::new(KickLibrary::builtin().unwrap()),
            KickConfig::default(),
            RobotDimensions::default(),
            JointLimits::default(),
            MassModel::default(),
        );
        let sensors = SensorData::new();
        let request = MotionRequest::kick("forward", Side::Left);
        MotionEngine::reset(&mut engine, &sensors);

        let output = MotionEngine::update(&mut engine, &MotionInput { sensors: &sensors, request: &request, dt: 0.01 });
        assert!(!output.is_leaving_possible);
        assert!(engine.is_running());

        let unknown = MotionRequest::kick("bicycle", Side::Left);
        MotionEngine::reset(&mut engine, &sensors);
        let output = MotionEngine::update(&mut engine, &MotionInput { sensors: &sensors, request: &unknown, dt: 0.01 });
        assert!(output.is_leaving_possible);
        assert!(!engine.is_running());
    }

    #[test]
    fn test_stand_engine_ramps_to_stand() {
        let dims = RobotDimensions::default();
        let mut engine = StandEngine::new(StandConfig::default(), &dims);
        let sensors = SensorData::new();
        engine.reset(&sensors);
        let request = MotionRequest::stand();

        let halfway = engine.update(&MotionInput { sensors: &sensors, request: &request, dt: 0.25 });
        let knee = engine.stand_posture()[Joint::LKneePitch];
        assert!(knee > 0.0);
        assert_relative_eq!(halfway.request.angles[Joint::LKneePitch], knee / 2.0, epsilon = 1e-12);

        let done = engine.update(&MotionInput { sensors: &sensors, request: &request, dt: 0.5 });
        assert_relative_eq!(done.request.angles[Joint::LKneePitch], knee);
        assert_relative_eq!(done.request.angles[Joint::RShoulderRoll], -0.15);
        assert_eq!(done.request.stiffness[Joint::HeadYaw], 0.0);
        assert!(done.is_leaving_possible);
    }

    #[test]
    fn test_stand_config_validation() {
        let dims = RobotDimensions::default();
        assert!(StandConfig::default().validate(&dims).is_ok());
        let config = StandConfig {
            hip_height: 0.3,
            ..Default::default()
        };
        assert!(matches!(config.validate(&dims), Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_special_action_plays_once() {
        let mut engine = SpecialActionEngine::new(Arc::new(KeyframeLibrary::builtin().unwrap()));
        let sensors = SensorData::new();
        let request = MotionRequest::special_action("sit_down");
        engine.reset(&sensors);

        let output = engine.update(&MotionInput { sensors: &sensors, request: &request, dt: 0.5 });
        assert!(!output.is_leaving_possible);
        let mut last = output;
        for _ in 0..10 {
            last = engine.update(&MotionInput { sensors: &sensors, request: &request, dt: 0.5 });
        }
        assert!(last.is_leaving_possible);
        assert_relative_eq!(last.request.angles[Joint::LKneePitch], 2.1);

        let unknown = MotionRequest::special_action("moonwalk");
        engine.reset(&sensors);
        let output = engine.update(&MotionInput { sensors: &sensors, request: &unknown, dt: 0.01 });
        assert!(output.is_leaving_possible);
    }

    #[test]
    fn test_get_up_picks_side() {
        let library = Arc::new(KeyframeLibrary::builtin().unwrap());
        let mut engine = GetUpEngine::new(GetUpConfig::default(), Arc::clone(&library)).unwrap();
        engine.reset(&tilted(1.4));
        assert_eq!(engine.motion_name(), Some("get_up_front"));
        engine.reset(&tilted(-1.4));
        assert_eq!(engine.motion_name(), Some("get_up_back"));

        let config = GetUpConfig {
            front_motion: "somersault".to_string(),
            ..Default::default()
        };
        assert!(GetUpEngine::new(config, library).is_err());
    }

    #[test]
    fn test_fall_engine_settles() {
        let mut engine = FallEngine::new(FallConfig::default());
        let mut sensors = tilted(-0.8);
        sensors.gyro = na::Vector3::new(0.0, -2.0, 0.5);
        engine.reset(&sensors);
        assert!(!engine.is_falling_forward());

        let request = MotionRequest::fall();
        let output = engine.update(&MotionInput { sensors: &sensors, request: &request, dt: 0.1 });
        assert!(!output.is_leaving_possible);
        assert!(output.owns_head);
        assert_relative_eq!(output.odometry_offset.rotation.angle(), 0.05, epsilon = 1e-12);
        assert_relative_eq!(output.request.stiffness[Joint::LKneePitch], 0.1);
        assert_relative_eq!(output.request.angles[Joint::HeadPitch], 0.5);

        sensors.gyro = na::Vector3::zeros();
        let output = engine.update(&MotionInput { sensors: &sensors, request: &request, dt: 1.0 });
        assert!(output.is_leaving_possible);
    }
}

//! Step-phase walk generator.
//!
//! Each step moves the swing foot from where the previous step left it to `+step/2` while the
//! support foot moves to `-step/2`. The step clock only proposes when to switch support: the
//! switch itself follows the sensed weight shift, and repeated failures to shift trigger an
//! emergency side step or a forced stand.

use std::f64::consts::FRAC_PI_2;

use nalgebra as na;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::biped::{JointLimits, RobotDimensions, SensorData};
use crate::error::ConfigError;
use crate::ik::calc_leg_joints;
use crate::joints::{Joint, JointRequest, JointValues, Side};
use crate::pose::{pose2, Step};
use crate::request::{WalkMode, WalkRequest};
use crate::smoothing::{parabolic_return, parabolic_step};
use crate::speed::{ellipsoid_clamp, limit_acceleration, SpeedLimits};
use crate::stability::{BalanceConfig, GyroBalancer};

/// Targets closer than this count as reached (m, rad).
const TARGET_TOLERANCE: f64 = 0.005;
const TARGET_ROTATION_TOLERANCE: f64 = 0.02;

/// Configuration of the walk generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkConfig {
    /// Vertical hip-to-ankle distance of a foot on the ground
    pub walk_hip_height: f64,
    /// Duration of a step at zero speed (s)
    pub base_step_duration: f64,
    /// Added step duration per unit of |speed| on each axis
    pub step_duration_increase: Step,
    pub min_step_duration: f64,
    pub max_step_duration: f64,
    /// Swing foot lift of a step in place (m)
    pub base_foot_lift: f64,
    /// Added lift per unit of |step size| on each axis
    pub foot_lift_increase: Step,
    /// Fraction of the step in which the lateral swing holds still
    pub lateral_dead_time: f64,
    /// Earliest support switch, as a fraction of the step duration
    pub min_step_phase_ratio: f64,
    /// Support switch even without a weight shift, as a fraction of the step duration
    pub max_step_phase_ratio: f64,
    /// Weight shifts completing later than this fraction of the step duration are slow
    pub slow_weight_shift_ratio: f64,
    pub max_weight_shift_misses: u32,
    pub max_slow_weight_shifts: u32,
    /// Forced stand after too many slow weight shifts (s)
    pub slow_weight_shift_stand_delay: f64,
    /// Lateral step taken after too many missed weight shifts (m)
    pub emergency_step_size: f64,
    pub speed: SpeedLimits,
    pub balance: BalanceConfig,
    /// Shoulder pitch added to arms hanging straight down
    pub arm_shoulder_pitch_offset: f64,
    /// Shoulder pitch per metre of the opposite foot's forward offset
    pub arm_swing_factor: f64,
    pub arm_shoulder_roll: f64,
    /// Shoulder roll per metre of the own foot's lateral offset
    pub arm_shoulder_roll_factor: f64,
    pub arm_elbow_yaw: f64,
    pub arm_elbow_roll: f64,
    pub leg_stiffness: f64,
    pub arm_stiffness: f64,
}

impl Default for WalkConfig {
    fn default() -> Self {
        Self {
            walk_hip_height: 0.185,
            base_step_duration: 0.25,
            step_duration_increase: Step::new(0.1, 0.1, 0.02),
            min_step_duration: 0.2,
            max_step_duration: 0.4,
            base_foot_lift: 0.012,
            foot_lift_increase: Step::new(0.1, 0.2, 0.0),
            lateral_dead_time: 0.2,
            min_step_phase_ratio: 0.75,
            max_step_phase_ratio: 2.0,
            slow_weight_shift_ratio: 1.3,
            max_weight_shift_misses: 2,
            max_slow_weight_shifts: 3,
            slow_weight_shift_stand_delay: 2.0,
            emergency_step_size: 0.03,
            speed: SpeedLimits::default(),
            balance: BalanceConfig::default(),
            arm_shoulder_pitch_offset: 0.0,
            arm_swing_factor: 3.0,
            arm_shoulder_roll: 0.15,
            arm_shoulder_roll_factor: 2.0,
            arm_elbow_yaw: 1.4,
            arm_elbow_roll: 0.1,
            leg_stiffness: 0.8,
            arm_stiffness: 0.3,
        }
    }
}

impl WalkConfig {
    pub fn validate(&self, dims: &RobotDimensions) -> Result<(), ConfigError> {
        if self.walk_hip_height <= 0.0 || self.walk_hip_height >= dims.max_leg_length() {
            return Err(ConfigError::invalid(
                "walk.walk_hip_height",
                format!("must be in (0, {})", dims.max_leg_length()),
            ));
        }
        if self.min_step_duration <= 0.0
            || self.min_step_duration > self.base_step_duration
            || self.base_step_duration > self.max_step_duration
        {
            return Err(ConfigError::invalid(
                "walk.base_step_duration",
                "requires 0 < min_step_duration <= base_step_duration <= max_step_duration",
            ));
        }
        if !(0.0..=1.0).contains(&self.min_step_phase_ratio)
            || self.max_step_phase_ratio < 1.0
            || self.slow_weight_shift_ratio < self.min_step_phase_ratio
        {
            return Err(ConfigError::invalid(
                "walk.min_step_phase_ratio",
                "requires min_step_phase_ratio <= 1 <= max_step_phase_ratio and a slow ratio above the minimum",
            ));
        }
        if !(0.0..1.0).contains(&self.lateral_dead_time) {
            return Err(ConfigError::invalid("walk.lateral_dead_time", "must be in [0, 1)"));
        }
        let max = &self.speed.max_speed;
        if max.forward <= 0.0 || max.left <= 0.0 || max.turn <= 0.0 || self.speed.max_speed_backwards <= 0.0
        {
            return Err(ConfigError::invalid("walk.speed.max_speed", "must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalkState {
    #[default]
    Standing,
    Starting,
    Walking,
    Stopping,
}

impl WalkState {
    /// State for the next step given whether a nonzero command is pending.
    pub fn next(self, moving: bool) -> WalkState {
        match (self, moving) {
            (WalkState::Standing, false) => WalkState::Standing,
            (WalkState::Standing, true) => WalkState::Starting,
            (WalkState::Starting, true) | (WalkState::Walking, true) => WalkState::Walking,
            (WalkState::Starting, false) | (WalkState::Walking, false) => WalkState::Stopping,
            (WalkState::Stopping, true) => WalkState::Walking,
            (WalkState::Stopping, false) => WalkState::Standing,
        }
    }
}

/// Outcome of the last support switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightShiftStatus {
    #[default]
    WeightDidShift,
    WeightDidNotShift,
    EmergencyStep,
}

/// Offsets of one foot relative to its neutral position under the hip.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FootOffset {
    pub forward: f64,
    pub left: f64,
    pub height: f64,
}

/// Offsets of both feet plus the shared rotation (`+turn_rl` on the left foot, `-turn_rl` on the right).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FootOffsets {
    pub left: FootOffset,
    pub right: FootOffset,
    pub turn_rl: f64,
}

impl FootOffsets {
    pub fn leg(&self, side: Side) -> &FootOffset {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    pub fn leg_mut(&mut self, side: Side) -> &mut FootOffset {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }
}

/// Timing and target of the step in progress.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepState {
    /// Time since the step started (s)
    pub t: f64,
    pub duration: f64,
    pub walk_state: WalkState,
    /// The left foot swings
    pub is_left_phase: bool,
    pub step: Step,
    pub max_foot_height: f64,
    /// Command after the acceleration limits, the baseline of the next limit
    pub limited_speed: Step,
}

impl StepState {
    pub fn swing_side(&self) -> Side {
        if self.is_left_phase {
            Side::Left
        } else {
            Side::Right
        }
    }

    pub fn phase(&self) -> f64 {
        if self.duration > 0.0 {
            self.t / self.duration
        } else {
            0.0
        }
    }
}

/// Tracks whether the swing leg actually takes over the weight.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeightShiftMonitor {
    pub misses: u32,
    pub slow_shifts: u32,
    /// Remaining forced-stand time (s)
    pub stand_cooldown: f64,
    pub status: WeightShiftStatus,
    pub emergency_step_pending: bool,
}

impl WeightShiftMonitor {
    /// Classifies a support switch at step time `t`.
    ///
    /// A missed shift never counts as slow and leaves the slow counter untouched.
    pub fn classify(
        &mut self,
        did_shift: bool,
        t: f64,
        duration: f64,
        config: &WalkConfig,
    ) -> WeightShiftStatus {
        if did_shift {
            self.misses = 0;
            if t > config.slow_weight_shift_ratio * duration {
                self.slow_shifts += 1;
                if self.slow_shifts > config.max_slow_weight_shifts {
                    warn!(
                        slow_shifts = self.slow_shifts,
                        delay = config.slow_weight_shift_stand_delay,
                        "weight shifts too slow, forcing stand"
                    );
                    self.stand_cooldown = config.slow_weight_shift_stand_delay;
                    self.slow_shifts = 0;
                }
            } else {
                self.slow_shifts = 0;
            }
            self.status = WeightShiftStatus::WeightDidShift;
        } else {
            self.misses += 1;
            if self.misses > config.max_weight_shift_misses {
                warn!(misses = self.misses, "weight did not shift, taking an emergency step");
                self.misses = 0;
                self.emergency_step_pending = true;
                self.status = WeightShiftStatus::EmergencyStep;
            } else {
                self.status = WeightShiftStatus::WeightDidNotShift;
            }
        }
        self.status
    }

    /// Counts down the forced stand.
    pub fn tick(&mut self, dt: f64) {
        self.stand_cooldown = (self.stand_cooldown - dt).max(0.0);
    }

    pub fn is_cooling_down(&self) -> bool {
        self.stand_cooldown > 0.0
    }
}

/// Inputs of one walk cycle.
pub struct WalkInput<'a> {
    pub request: &'a WalkRequest,
    pub sensors: &'a SensorData,
    pub dt: f64,
    /// Offset of the swing foot as a function of the step phase in `[0, 1]`
    pub kick_foot_offset: Option<&'a dyn Fn(f64) -> na::Isometry3<f64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WalkOutput {
    pub request: JointRequest,
    /// Displacement of the robot during this cycle
    pub odometry_offset: na::Isometry2<f64>,
    /// Displacement still to come in the current step
    pub upcoming_offset: na::Isometry2<f64>,
    pub reachable: bool,
    pub walk_state: WalkState,
    pub is_left_phase: bool,
    pub weight_shift_status: WeightShiftStatus,
}

/// Ankle pose of a foot relative to the upright torso.
pub fn ankle_pose(
    side: Side,
    offset: &FootOffset,
    turn_rl: f64,
    hip_height: f64,
    dims: &RobotDimensions,
) -> na::Isometry3<f64> {
    let height = hip_height - offset.height;
    let roll = (offset.left / height).clamp(-1.0, 1.0).asin();
    let turn = side.sign() * turn_rl;

    na::Isometry3::from(na::Translation3::from(dims.hip_position(side.sign())))
        * na::Isometry3::rotation(na::Vector3::x() * roll)
        * na::Isometry3::translation(offset.forward, 0.0, -height)
        * na::Isometry3::rotation(na::Vector3::x() * -roll)
        * na::Isometry3::rotation(na::Vector3::z() * turn)
}

/// Step that moves the body onto `target` in one step, given the support foot's offsets.
///
/// The body moves by `support + step / 2` during a step, so the step is twice the remaining
/// distance. The translation is expressed in the frame halfway through the turn.
pub fn target_step(
    target: &na::Isometry2<f64>,
    support: &FootOffset,
    turn_rl: f64,
    swing_sign: f64,
) -> Step {
    let rotation = target.rotation.angle();
    let translation = na::Rotation2::new(-rotation / 2.0) * target.translation.vector;
    Step::new(
        2.0 * (translation.x - support.forward),
        2.0 * (translation.y - support.left),
        2.0 * (rotation + swing_sign * turn_rl),
    )
}

/// Leg angles with both feet under the hips at `hip_height`.
pub fn standing_leg_joints(
    hip_height: f64,
    body_tilt: &na::Vector2<f64>,
    dims: &RobotDimensions,
) -> ([f64; 6], [f64; 6]) {
    let neutral = FootOffset::default();
    let left = ankle_pose(Side::Left, &neutral, 0.0, hip_height, dims);
    let right = ankle_pose(Side::Right, &neutral, 0.0, hip_height, dims);
    let legs = calc_leg_joints(&left, &right, body_tilt, dims, 0.5);
    (legs.left, legs.right)
}

pub struct WalkGenerator {
    config: WalkConfig,
    dims: RobotDimensions,
    limits: JointLimits,
    step: StepState,
    /// Offsets of this cycle
    current: FootOffsets,
    /// Offsets at the last support switch, the start of the current step
    previous: FootOffsets,
    /// Offsets of the last cycle, for odometry
    last_cycle: FootOffsets,
    monitor: WeightShiftMonitor,
    balancer: GyroBalancer,
}

impl WalkGenerator {
    pub fn new(config: WalkConfig, dims: RobotDimensions, limits: JointLimits) -> Self {
        let balancer = GyroBalancer::new(config.balance.clone());
        let mut generator = Self {
            config,
            dims,
            limits,
            step: StepState::default(),
            current: FootOffsets::default(),
            previous: FootOffsets::default(),
            last_cycle: FootOffsets::default(),
            monitor: WeightShiftMonitor::default(),
            balancer,
        };
        generator.reset();
        generator
    }

    pub fn reset(&mut self) {
        self.step = StepState {
            duration: self.config.base_step_duration,
            ..Default::default()
        };
        self.current = FootOffsets::default();
        self.previous = FootOffsets::default();
        self.last_cycle = FootOffsets::default();
        self.monitor = WeightShiftMonitor::default();
        self.balancer.reset();
    }

    pub fn walk_state(&self) -> WalkState {
        self.step.walk_state
    }

    pub fn is_left_phase(&self) -> bool {
        self.step.is_left_phase
    }

    /// Progress of the current step, may exceed 1 while waiting for the weight shift.
    pub fn phase(&self) -> f64 {
        self.step.phase()
    }

    pub fn weight_shift_status(&self) -> WeightShiftStatus {
        self.monitor.status
    }

    pub fn step_state(&self) -> &StepState {
        &self.step
    }

    pub fn offsets(&self) -> &FootOffsets {
        &self.current
    }

    pub fn monitor(&self) -> &WeightShiftMonitor {
        &self.monitor
    }

    pub fn config(&self) -> &WalkConfig {
        &self.config
    }

    pub fn calc_joints(&mut self, input: &WalkInput) -> WalkOutput {
        self.monitor.tick(input.dt);
        self.balancer.update(&input.sensors.gyro);

        if self.step.t == 0.0 {
            self.begin_step(input);
        }

        if self.step.walk_state == WalkState::Standing {
            self.current = FootOffsets::default();
        } else {
            self.step.t += input.dt;
            self.update_offsets();
        }

        let odometry_offset = self.odometry_offset();
        let upcoming_offset = self.upcoming_offset();
        self.last_cycle = self.current;

        let (left, right) = self.ankle_poses(input.kick_foot_offset);
        let body_tilt = input.sensors.body_tilt();
        let legs = calc_leg_joints(&left, &right, &body_tilt, &self.dims, 0.5);
        if !legs.reachable {
            debug!(phase = self.step.phase(), "walk ankle targets out of reach");
        }

        let mut angles = JointValues::default();
        angles.set_leg(Side::Left, legs.left);
        angles.set_leg(Side::Right, legs.right);
        if self.step.walk_state != WalkState::Standing {
            let support = self.step.swing_side().opposite();
            let (pitch, roll) = self.balancer.ankle_adjustment();
            let [.., ankle_pitch, ankle_roll] = Joint::leg(support);
            angles[ankle_pitch] += pitch;
            angles[ankle_roll] += roll;
        }
        self.set_arms(&mut angles);

        for side in [Side::Left, Side::Right] {
            for joint in Joint::leg(side).into_iter().chain(Joint::arm(side)) {
                angles[joint] = self.limits.clamp(joint, angles[joint]);
            }
        }

        let mut stiffness = JointValues::filled(0.0);
        for side in [Side::Left, Side::Right] {
            for joint in Joint::leg(side) {
                stiffness[joint] = self.config.leg_stiffness;
            }
            for joint in Joint::arm(side) {
                stiffness[joint] = self.config.arm_stiffness;
            }
        }

        if self.step.walk_state != WalkState::Standing {
            self.check_support_switch(input.sensors.foot_support);
        }

        WalkOutput {
            request: JointRequest { angles, stiffness },
            odometry_offset,
            upcoming_offset,
            reachable: legs.reachable,
            walk_state: self.step.walk_state,
            is_left_phase: self.step.is_left_phase,
            weight_shift_status: self.monitor.status,
        }
    }

    /// Ankle poses of this cycle; the swing foot carries the kick offset at `min(t / T, 1)`.
    pub fn ankle_poses(
        &self,
        kick_foot_offset: Option<&dyn Fn(f64) -> na::Isometry3<f64>>,
    ) -> (na::Isometry3<f64>, na::Isometry3<f64>) {
        let hip_height = self.config.walk_hip_height;
        let mut left = ankle_pose(
            Side::Left,
            &self.current.left,
            self.current.turn_rl,
            hip_height,
            &self.dims,
        );
        let mut right = ankle_pose(
            Side::Right,
            &self.current.right,
            self.current.turn_rl,
            hip_height,
            &self.dims,
        );

        if let Some(kick) = kick_foot_offset {
            let offset = kick(self.step.phase().clamp(0.0, 1.0));
            let swing = match self.step.swing_side() {
                Side::Left => &mut left,
                Side::Right => &mut right,
            };
            *swing = na::Isometry3::from_parts(
                na::Translation3::from(swing.translation.vector + offset.translation.vector),
                offset.rotation * swing.rotation,
            );
        }
        (left, right)
    }

    fn desired_speed(&self, request: &WalkRequest) -> Step {
        let base = self.config.base_step_duration;
        match request.mode {
            WalkMode::Speed => request.speed,
            WalkMode::StepSize => request.speed * (1.0 / base),
            WalkMode::Target => {
                let target = &request.target;
                if target.translation.vector.norm() < TARGET_TOLERANCE
                    && target.rotation.angle().abs() < TARGET_ROTATION_TOLERANCE
                {
                    return Step::ZERO;
                }
                let swing = self.step.swing_side();
                let support = self.current.leg(swing.opposite());
                target_step(&request.target, support, self.current.turn_rl, swing.sign())
                    * (1.0 / base)
            }
        }
    }

    fn step_duration(&self, speed: &Step) -> f64 {
        let increase = &self.config.step_duration_increase;
        let duration = self.config.base_step_duration
            + increase.forward * speed.forward.abs()
            + increase.left * speed.left.abs()
            + increase.turn * speed.turn.abs();
        duration.clamp(self.config.min_step_duration, self.config.max_step_duration)
    }

    fn begin_step(&mut self, input: &WalkInput) {
        let previous_state = self.step.walk_state;
        if previous_state == WalkState::Standing {
            // start with the leg that carries no weight
            self.step.is_left_phase = input.sensors.foot_support < 0.0;
        }

        let desired = if self.monitor.is_cooling_down() {
            Step::ZERO
        } else {
            self.desired_speed(input.request)
        };
        let clamped = ellipsoid_clamp(&desired, &self.config.speed);

        let mut walk_state = previous_state.next(!clamped.is_zero());
        let emergency = std::mem::take(&mut self.monitor.emergency_step_pending);
        // feet left apart by the last step get another stopping step to return under the hips
        let feet_apart =
            previous_state != WalkState::Standing && self.current != FootOffsets::default();
        if walk_state == WalkState::Standing && (emergency || feet_apart) {
            walk_state = WalkState::Stopping;
        }
        if walk_state == WalkState::Standing && previous_state != WalkState::Standing {
            self.enter_standing();
        }
        self.step.walk_state = walk_state;

        let swing_sign = self.step.swing_side().sign();
        let (speed, mut step) = if walk_state == WalkState::Walking {
            let limited =
                limit_acceleration(&self.step.limited_speed, &clamped, &self.config.speed);
            let scale = match input.request.mode {
                WalkMode::Speed => self.step_duration(&limited),
                WalkMode::StepSize | WalkMode::Target => self.config.base_step_duration,
            };
            let mut step = limited * scale;
            // only the leading leg steps sideways, covering two steps' worth
            if step.left * swing_sign <= 0.0 {
                step.left = 0.0;
            } else if input.request.mode == WalkMode::Speed {
                step.left *= 2.0;
            }
            (limited, step)
        } else {
            (Step::ZERO, Step::ZERO)
        };

        if emergency {
            step = Step::new(0.0, swing_sign * self.config.emergency_step_size, 0.0);
        }

        let lift = &self.config.foot_lift_increase;
        self.step.limited_speed = speed;
        self.step.duration = self.step_duration(&speed);
        self.step.max_foot_height = self.config.base_foot_lift
            + lift.forward * step.forward.abs()
            + lift.left * step.left.abs()
            + lift.turn * step.turn.abs();
        self.step.step = step;
    }

    fn enter_standing(&mut self) {
        debug!("walk generator standing");
        self.previous = FootOffsets::default();
        self.step.limited_speed = Step::ZERO;
        self.monitor.misses = 0;
        self.monitor.slow_shifts = 0;
        self.balancer.reset();
    }

    fn update_offsets(&mut self) {
        let linear = self.step.phase().min(1.0);
        let swing = self.step.swing_side();
        let support = swing.opposite();
        let step = self.step.step;

        let forward_progress = parabolic_step(linear, 0.0);
        let lateral_progress = parabolic_step(linear, self.config.lateral_dead_time);

        let previous_swing = *self.previous.leg(swing);
        let previous_support = *self.previous.leg(support);

        let swing_offset = FootOffset {
            forward: previous_swing.forward
                + (step.forward / 2.0 - previous_swing.forward) * forward_progress,
            left: previous_swing.left + (step.left / 2.0 - previous_swing.left) * lateral_progress,
            height: self.step.max_foot_height * parabolic_return(linear),
        };
        // the leftover lift of the new support foot is gone by mid step
        let support_offset = FootOffset {
            forward: previous_support.forward
                + (-step.forward / 2.0 - previous_support.forward) * linear,
            left: -swing_offset.left,
            height: previous_support.height
                * (1.0 - parabolic_step((2.0 * linear).min(1.0), 0.0)),
        };

        let turn_target = swing.sign() * step.turn / 2.0;
        *self.current.leg_mut(swing) = swing_offset;
        *self.current.leg_mut(support) = support_offset;
        self.current.turn_rl =
            self.previous.turn_rl + (turn_target - self.previous.turn_rl) * forward_progress;
    }

    fn odometry_offset(&self) -> na::Isometry2<f64> {
        let support = self.step.swing_side().opposite();
        let now = self.current.leg(support);
        let before = self.last_cycle.leg(support);
        let turn = self.current.turn_rl - self.last_cycle.turn_rl;
        pose2(
            -(now.forward - before.forward),
            -(now.left - before.left),
            -support.sign() * turn,
        )
    }

    fn upcoming_offset(&self) -> na::Isometry2<f64> {
        if self.step.walk_state == WalkState::Standing {
            return na::Isometry2::identity();
        }
        let swing = self.step.swing_side();
        let support = self.current.leg(swing.opposite());
        let step = self.step.step;
        pose2(
            support.forward + step.forward / 2.0,
            support.left + step.left / 2.0,
            swing.sign() * (swing.sign() * step.turn / 2.0 - self.current.turn_rl),
        )
    }

    fn check_support_switch(&mut self, foot_support: f64) {
        let t = self.step.t;
        let duration = self.step.duration;
        let swing_loaded = if self.step.is_left_phase {
            foot_support > 0.0
        } else {
            foot_support < 0.0
        };

        // a stopping step runs to its end so the feet arrive at the neutral pose
        let min_ratio = if self.step.walk_state == WalkState::Stopping {
            1.0
        } else {
            self.config.min_step_phase_ratio
        };
        let early_enough = t >= min_ratio * duration;
        let timed_out = t >= self.config.max_step_phase_ratio * duration;
        if !((early_enough && swing_loaded) || timed_out) {
            return;
        }

        let status = self.monitor.classify(swing_loaded, t, duration, &self.config);
        if status != WeightShiftStatus::WeightDidNotShift {
            self.step.is_left_phase = !self.step.is_left_phase;
        }
        self.previous = self.current;
        self.step.t = 0.0;
    }

    fn set_arms(&self, angles: &mut JointValues) {
        let config = &self.config;
        for side in [Side::Left, Side::Right] {
            let own = self.current.leg(side);
            let opposite = self.current.leg(side.opposite());
            let sign = side.sign();
            angles.set_arm(
                side,
                [
                    FRAC_PI_2 + config.arm_shoulder_pitch_offset
                        - opposite.forward * config.arm_swing_factor,
                    sign * (config.arm_shoulder_roll
                        + own.left.abs() * config.arm_shoulder_roll_factor),
                    -sign * config.arm_elbow_yaw,
                    -sign * config.arm_elbow_roll,
                ],
            );
        }
    }
}

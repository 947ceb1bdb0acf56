use std::f64::consts::{FRAC_PI_2, PI};

use nalgebra as na;

use crate::biped::{Camera, CameraCalibration, JointLimits, RobotDimensions};
use crate::joints::{Joint, Side};

/// Slack on the reachability envelope, absorbs rounding at full extension.
const REACH_EPSILON: f64 = 1e-9;

fn rot_x(angle: f64) -> na::Rotation3<f64> {
    na::Rotation3::from_axis_angle(&na::Vector3::x_axis(), angle)
}

fn rot_y(angle: f64) -> na::Rotation3<f64> {
    na::Rotation3::from_axis_angle(&na::Vector3::y_axis(), angle)
}

fn rot_z(angle: f64) -> na::Rotation3<f64> {
    na::Rotation3::from_axis_angle(&na::Vector3::z_axis(), angle)
}

/// Torso tilt [roll, pitch] as a rotation.
pub fn body_rotation(tilt: &na::Vector2<f64>) -> na::Rotation3<f64> {
    na::Rotation3::from_euler_angles(tilt.x, tilt.y, 0.0)
}

/// Leg joint angles of both legs, ordered as [`Joint::leg`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LegIkResult {
    pub left: [f64; 6],
    pub right: [f64; 6],
    /// Both ankle targets were within the hip-to-ankle distance the legs can produce.
    pub reachable: bool,
}

/// Intermediate single-leg solution before the shared yaw is decided.
struct LegSolution {
    yaw: f64,
    knee: f64,
    ankle_pitch: f64,
    ankle_roll: f64,
    /// Hip rotation relative to the (tilted) body
    hip_rotation: na::Matrix3<f64>,
    reachable: bool,
}

impl LegSolution {
    /// Hip roll and pitch that best realize `hip_rotation` with the given yaw.
    fn hip_roll_pitch(&self, yaw: f64) -> (f64, f64) {
        let m = &self.hip_rotation;
        let (sz, cz) = yaw.sin_cos();
        let roll = m[(2, 1)].atan2(-m[(0, 1)] * sz + m[(1, 1)] * cz);
        let pitch = (-m[(2, 0)]).atan2(m[(2, 2)]);
        (roll, pitch)
    }

    fn joints(&self, yaw: f64, stored_yaw: f64) -> [f64; 6] {
        let (roll, pitch) = self.hip_roll_pitch(yaw);
        [stored_yaw, roll, pitch, self.knee, self.ankle_pitch, self.ankle_roll]
    }
}

fn solve_leg(
    target: &na::Isometry3<f64>,
    side: Side,
    body: &na::Rotation3<f64>,
    dims: &RobotDimensions,
) -> LegSolution {
    let upper = dims.upper_leg_length;
    let lower = dims.lower_leg_length;

    let hip = body * dims.hip_position(side.sign());
    let foot_rotation = target.rotation.to_rotation_matrix();
    let ankle = target.translation.vector;

    // hip position seen from the ankle, in the foot frame
    let r = foot_rotation.inverse() * (hip - ankle);
    let distance = r.norm();
    let reachable = distance <= dims.max_leg_length() + REACH_EPSILON
        && distance >= dims.min_leg_length() - REACH_EPSILON;

    let cos_knee = ((distance * distance - upper * upper - lower * lower) / (2.0 * upper * lower))
        .clamp(-1.0, 1.0);
    let knee = cos_knee.acos();
    let alpha = (upper * knee.sin()).atan2(lower + upper * knee.cos());

    let mut ankle_roll = r.y.atan2(r.z);
    if ankle_roll > FRAC_PI_2 {
        ankle_roll -= PI;
    } else if ankle_roll < -FRAC_PI_2 {
        ankle_roll += PI;
    }
    let ankle_pitch = -r.x.atan2(r.z.signum() * (r.y * r.y + r.z * r.z).sqrt()) - alpha;

    let hip_rotation = (body.inverse()
        * foot_rotation
        * rot_x(-ankle_roll)
        * rot_y(-(knee + ankle_pitch)))
    .into_inner();
    let yaw = (-hip_rotation[(0, 1)]).atan2(hip_rotation[(1, 1)]);

    LegSolution {
        yaw,
        knee,
        ankle_pitch,
        ankle_roll,
        hip_rotation,
        reachable,
    }
}

/// Computes the joint angles of both legs for the given ankle poses.
///
/// The poses are relative to the upright torso frame; `body_tilt` is the torso's
/// [roll, pitch]. Both legs share the hip yaw-pitch motor, mirrored for the right leg:
/// the shared angle blends the left solution (`ratio = 1`) and the right one (`ratio = 0`).
///
/// On unreachable targets the result is still finite (legs fully stretched or folded),
/// so callers must look at `reachable`.
pub fn calc_leg_joints(
    left: &na::Isometry3<f64>,
    right: &na::Isometry3<f64>,
    body_tilt: &na::Vector2<f64>,
    dims: &RobotDimensions,
    ratio: f64,
) -> LegIkResult {
    let ratio = ratio.clamp(0.0, 1.0);
    let body = body_rotation(body_tilt);

    let left_solution = solve_leg(left, Side::Left, &body, dims);
    let right_solution = solve_leg(right, Side::Right, &body, dims);

    let shared_yaw = ratio * left_solution.yaw + (1.0 - ratio) * -right_solution.yaw;

    LegIkResult {
        left: left_solution.joints(shared_yaw, shared_yaw),
        right: right_solution.joints(-shared_yaw, shared_yaw),
        reachable: left_solution.reachable && right_solution.reachable,
    }
}

/// Joint positions of one leg in the upright torso frame.
#[derive(Debug, Clone, Copy)]
pub struct LegChain {
    pub hip: na::Vector3<f64>,
    pub knee: na::Vector3<f64>,
    pub ankle: na::Isometry3<f64>,
}

pub fn leg_chain(
    joints: &[f64; 6],
    side: Side,
    body_tilt: &na::Vector2<f64>,
    dims: &RobotDimensions,
) -> LegChain {
    // the right hip yaw-pitch axis is mirrored
    let yaw = match side {
        Side::Left => joints[0],
        Side::Right => -joints[0],
    };
    let body = body_rotation(body_tilt);

    let hip = body * dims.hip_position(side.sign());
    let hip_rotation = body * rot_z(yaw) * rot_x(joints[1]) * rot_y(joints[2]);
    let knee = hip + hip_rotation * na::Vector3::new(0.0, 0.0, -dims.upper_leg_length);
    let knee_rotation = hip_rotation * rot_y(joints[3]);
    let ankle = knee + knee_rotation * na::Vector3::new(0.0, 0.0, -dims.lower_leg_length);
    let foot_rotation = knee_rotation * rot_y(joints[4]) * rot_x(joints[5]);

    LegChain {
        hip,
        knee,
        ankle: na::Isometry3::from_parts(
            na::Translation3::from(ankle),
            na::UnitQuaternion::from_rotation_matrix(&foot_rotation),
        ),
    }
}

/// Ankle pose of one leg for the given joint angles.
pub fn leg_forward_kinematics(
    joints: &[f64; 6],
    side: Side,
    body_tilt: &na::Vector2<f64>,
    dims: &RobotDimensions,
) -> na::Isometry3<f64> {
    leg_chain(joints, side, body_tilt, dims).ankle
}

/// Pan and tilt that put `target` (torso frame) on the optical axis of `camera`.
///
/// Returns [pan, tilt]; positive tilt looks down.
pub fn calc_head_joints(
    target: &na::Vector3<f64>,
    camera: Camera,
    dims: &RobotDimensions,
    calibration: &CameraCalibration,
) -> na::Vector2<f64> {
    let relative = target - na::Vector3::new(0.0, 0.0, dims.neck_offset_z);
    let (pan_correction, tilt_correction) = calibration.correction(camera);
    let (offset, mount_tilt) = dims.camera_offset(camera);

    let pan = relative.y.atan2(relative.x);
    let x = (relative.x * relative.x + relative.y * relative.y).sqrt();
    let z = relative.z;
    let distance = (x * x + z * z).sqrt();
    if distance < 1e-9 {
        return na::Vector2::new(pan - pan_correction, 0.0);
    }

    let optical_tilt = mount_tilt + tilt_correction;
    // signed distance between the neck axis and the optical axis
    let axis_offset = -offset.x * optical_tilt.sin() - offset.y * optical_tilt.cos();
    let elevation = z.atan2(x);
    let tilt = -optical_tilt - elevation - (axis_offset / distance).clamp(-1.0, 1.0).asin();

    na::Vector2::new(pan - pan_correction, tilt)
}

/// Optical centre and viewing direction of `camera` for the given head joint angles.
pub fn camera_ray(
    pan: f64,
    tilt: f64,
    camera: Camera,
    dims: &RobotDimensions,
    calibration: &CameraCalibration,
) -> (na::Vector3<f64>, na::Vector3<f64>) {
    let (pan_correction, tilt_correction) = calibration.correction(camera);
    let (offset, mount_tilt) = dims.camera_offset(camera);
    let optical_tilt = mount_tilt + tilt_correction;

    let head = rot_z(pan + pan_correction) * rot_y(tilt);
    let position = na::Vector3::new(0.0, 0.0, dims.neck_offset_z)
        + head * na::Vector3::new(offset.x, 0.0, offset.y);
    let direction = head * na::Vector3::new(optical_tilt.cos(), 0.0, -optical_tilt.sin());
    (position, direction)
}

/// Out-of-range flags of an arm IK solution, one bit per joint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArmIkErrors(u8);

impl ArmIkErrors {
    pub const SHOULDER_PITCH: u8 = 1 << 0;
    pub const SHOULDER_ROLL: u8 = 1 << 1;
    pub const ELBOW_YAW: u8 = 1 << 2;
    pub const ELBOW_ROLL: u8 = 1 << 3;

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn contains(&self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    fn set(&mut self, bit: u8) {
        self.0 |= bit;
    }
}

/// Arm joint angles ordered as [`Joint::arm`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArmIkResult {
    pub joints: [f64; 4],
    pub errors: ArmIkErrors,
}

/// Elbow and hand position of one arm, relative to its shoulder.
pub fn arm_forward_kinematics(
    joints: &[f64; 4],
    dims: &RobotDimensions,
) -> (na::Vector3<f64>, na::Vector3<f64>) {
    let upper_rotation = rot_y(joints[0]) * rot_z(joints[1]);
    let elbow = upper_rotation * na::Vector3::new(dims.upper_arm_length, 0.0, 0.0);
    let hand = elbow
        + upper_rotation
            * rot_x(joints[2])
            * rot_z(joints[3])
            * na::Vector3::new(dims.lower_arm_length, 0.0, 0.0);
    (elbow, hand)
}

/// Arm joints from elbow and hand positions (shoulder frame).
///
/// Every joint is clamped to its hardware range independently and reported in `errors`.
pub fn calc_arm_joints_from_elbow(
    side: Side,
    elbow: &na::Vector3<f64>,
    hand: &na::Vector3<f64>,
    limits: &JointLimits,
) -> ArmIkResult {
    let elbow_distance = elbow.norm();
    let (shoulder_pitch, shoulder_roll) = if elbow_distance < 1e-9 {
        (0.0, 0.0)
    } else {
        (
            (-elbow.z).atan2(elbow.x),
            (elbow.y / elbow_distance).clamp(-1.0, 1.0).asin(),
        )
    };

    let upper_rotation = rot_y(shoulder_pitch) * rot_z(shoulder_roll);
    let forearm = upper_rotation.inverse() * (hand - elbow);
    let forearm_length = forearm.norm();

    // the left elbow bends with negative roll, the right one with positive roll
    let sign = -side.sign();
    let bend = if forearm_length < 1e-9 {
        0.0
    } else {
        (forearm.x / forearm_length).clamp(-1.0, 1.0).acos()
    };
    let elbow_roll = sign * bend;
    let elbow_yaw = if bend < 1e-6 {
        0.0
    } else {
        (sign * forearm.z).atan2(sign * forearm.y)
    };

    let raw = [shoulder_pitch, shoulder_roll, elbow_yaw, elbow_roll];
    let bits = [
        ArmIkErrors::SHOULDER_PITCH,
        ArmIkErrors::SHOULDER_ROLL,
        ArmIkErrors::ELBOW_YAW,
        ArmIkErrors::ELBOW_ROLL,
    ];

    let mut errors = ArmIkErrors::default();
    let mut joints = [0.0; 4];
    for (i, joint) in Joint::arm(side).into_iter().enumerate() {
        if !limits.contains(joint, raw[i]) {
            errors.set(bits[i]);
        }
        joints[i] = limits.clamp(joint, raw[i]);
    }

    ArmIkResult { joints, errors }
}

/// Arm joints that put the hand at `hand` (shoulder frame).
///
/// The elbow is placed with the law of cosines on the upper-arm/forearm triangle;
/// `swivel` rotates it around the shoulder-hand axis, 0 keeps it as low as possible.
pub fn calc_arm_joints(
    side: Side,
    hand: &na::Vector3<f64>,
    swivel: f64,
    dims: &RobotDimensions,
    limits: &JointLimits,
) -> ArmIkResult {
    let upper = dims.upper_arm_length;
    let lower = dims.lower_arm_length;
    let distance = hand.norm().max(1e-9);
    let direction = hand / distance;

    let cos_alpha =
        ((upper * upper + distance * distance - lower * lower) / (2.0 * upper * distance))
            .clamp(-1.0, 1.0);
    let sin_alpha = (1.0 - cos_alpha * cos_alpha).sqrt();

    let down = -na::Vector3::z();
    let mut normal = down - direction * direction.dot(&down);
    if normal.norm() < 1e-6 {
        normal = na::Vector3::x() - direction * direction.x;
    }
    let normal = normal.normalize();
    let binormal = direction.cross(&normal);

    let elbow = upper
        * (cos_alpha * direction
            + sin_alpha * (swivel.cos() * normal + swivel.sin() * binormal));

    calc_arm_joints_from_elbow(side, &elbow, hand, limits)
}

use nalgebra as na;
use serde::{Deserialize, Serialize};

use crate::joints::{Joint, JointValues};

/// Sensor snapshot of the robot, refreshed once per motion cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorData {
    /// Measured joint angles
    pub joint_angles: JointValues,

    /// Angular velocity [roll rate, pitch rate, yaw rate] (rad/s)
    pub gyro: na::Vector3<f64>,

    /// Linear acceleration including gravity (m/s^2)
    pub accelerometer: na::Vector3<f64>,

    /// Fused torso orientation, if the estimator delivered one this cycle
    pub orientation: Option<na::UnitQuaternion<f64>>,

    /// Support foot estimate; negative while the right foot bears the weight
    pub foot_support: f64,
}

impl SensorData {
    pub fn new() -> Self {
        Self {
            joint_angles: JointValues::default(),
            gyro: na::Vector3::zeros(),
            accelerometer: na::Vector3::new(0.0, 0.0, 9.81),
            orientation: None,
            foot_support: 0.0,
        }
    }

    /// Torso roll and pitch from the fused orientation, zero without one.
    pub fn body_tilt(&self) -> na::Vector2<f64> {
        match self.orientation {
            Some(orientation) => {
                let (roll, pitch, _) = orientation.euler_angles();
                na::Vector2::new(roll, pitch)
            }
            None => na::Vector2::zeros(),
        }
    }

    /// Torso yaw from the fused orientation.
    pub fn yaw(&self) -> Option<f64> {
        self.orientation.map(|orientation| orientation.euler_angles().2)
    }
}

impl Default for SensorData {
    fn default() -> Self {
        Self::new()
    }
}

/// Camera mounted in the head
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Camera {
    Upper,
    Lower,
}

/// Physical dimensions of the robot (m, rad).
///
/// The torso frame has its origin in the torso, x pointing forward, y left and z up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotDimensions {
    /// Lateral distance of each hip from the torso origin
    pub y_hip_offset: f64,
    /// Vertical distance from the torso origin down to the hips
    pub hip_offset_z: f64,
    /// Hip to knee
    pub upper_leg_length: f64,
    /// Knee to ankle
    pub lower_leg_length: f64,
    /// Ankle to sole
    pub foot_height: f64,
    /// Foot dimensions [length, width]
    pub foot_size: [f64; 2],
    /// Lateral distance of each shoulder from the torso origin
    pub y_shoulder_offset: f64,
    /// Height of the shoulders above the torso origin
    pub shoulder_offset_z: f64,
    /// Shoulder to elbow
    pub upper_arm_length: f64,
    /// Elbow to hand
    pub lower_arm_length: f64,
    /// Height of the neck joint above the torso origin
    pub neck_offset_z: f64,
    /// Neck to upper camera [x, z]
    pub upper_camera_offset: [f64; 2],
    /// Mounting tilt of the upper camera (positive looks down)
    pub upper_camera_tilt: f64,
    /// Neck to lower camera [x, z]
    pub lower_camera_offset: [f64; 2],
    /// Mounting tilt of the lower camera
    pub lower_camera_tilt: f64,
}

impl Default for RobotDimensions {
    fn default() -> Self {
        Self {
            y_hip_offset: 0.05,
            hip_offset_z: 0.085,
            upper_leg_length: 0.1,
            lower_leg_length: 0.1029,
            foot_height: 0.04519,
            foot_size: [0.16, 0.09],
            y_shoulder_offset: 0.098,
            shoulder_offset_z: 0.1,
            upper_arm_length: 0.105,
            lower_arm_length: 0.1137,
            neck_offset_z: 0.1265,
            upper_camera_offset: [0.05871, 0.06364],
            upper_camera_tilt: 0.0209,
            lower_camera_offset: [0.05071, 0.01774],
            lower_camera_tilt: 0.6921,
        }
    }
}

impl RobotDimensions {
    /// Maximum hip-to-ankle distance.
    pub fn max_leg_length(&self) -> f64 {
        self.upper_leg_length + self.lower_leg_length
    }

    /// Minimum hip-to-ankle distance.
    pub fn min_leg_length(&self) -> f64 {
        (self.upper_leg_length - self.lower_leg_length).abs()
    }

    /// Position of a hip joint in the upright torso frame.
    pub fn hip_position(&self, side_sign: f64) -> na::Vector3<f64> {
        na::Vector3::new(0.0, side_sign * self.y_hip_offset, -self.hip_offset_z)
    }

    /// Position of a shoulder joint in the torso frame.
    pub fn shoulder_position(&self, side_sign: f64) -> na::Vector3<f64> {
        na::Vector3::new(0.0, side_sign * self.y_shoulder_offset, self.shoulder_offset_z)
    }

    pub fn camera_offset(&self, camera: Camera) -> (na::Vector2<f64>, f64) {
        match camera {
            Camera::Upper => (
                na::Vector2::new(self.upper_camera_offset[0], self.upper_camera_offset[1]),
                self.upper_camera_tilt,
            ),
            Camera::Lower => (
                na::Vector2::new(self.lower_camera_offset[0], self.lower_camera_offset[1]),
                self.lower_camera_tilt,
            ),
        }
    }
}

/// Per-camera calibration corrections (rad).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraCalibration {
    pub upper_pan_correction: f64,
    pub upper_tilt_correction: f64,
    pub lower_pan_correction: f64,
    pub lower_tilt_correction: f64,
}

impl CameraCalibration {
    /// (pan, tilt) correction of a camera.
    pub fn correction(&self, camera: Camera) -> (f64, f64) {
        match camera {
            Camera::Upper => (self.upper_pan_correction, self.upper_tilt_correction),
            Camera::Lower => (self.lower_pan_correction, self.lower_tilt_correction),
        }
    }
}

/// Hardware angle range of every joint.
#[derive(Debug, Clone, PartialEq)]
pub struct JointLimits {
    pub min: JointValues,
    pub max: JointValues,
}

impl Default for JointLimits {
    fn default() -> Self {
        const RANGES: [(Joint, f64, f64); Joint::COUNT] = [
            (Joint::HeadYaw, -2.0857, 2.0857),
            (Joint::HeadPitch, -0.672, 0.5149),
            (Joint::LShoulderPitch, -2.0857, 2.0857),
            (Joint::LShoulderRoll, -0.3142, 1.3265),
            (Joint::LElbowYaw, -2.0857, 2.0857),
            (Joint::LElbowRoll, -1.5446, -0.0349),
            (Joint::RShoulderPitch, -2.0857, 2.0857),
            (Joint::RShoulderRoll, -1.3265, 0.3142),
            (Joint::RElbowYaw, -2.0857, 2.0857),
            (Joint::RElbowRoll, 0.0349, 1.5446),
            (Joint::LHipYawPitch, -1.1453, 0.7408),
            (Joint::LHipRoll, -0.3795, 0.7905),
            (Joint::LHipPitch, -1.5359, 0.4841),
            (Joint::LKneePitch, -0.0923, 2.1125),
            (Joint::LAnklePitch, -1.1895, 0.9227),
            (Joint::LAnkleRoll, -0.3979, 0.769),
            (Joint::RHipYawPitch, -1.1453, 0.7408),
            (Joint::RHipRoll, -0.7905, 0.3795),
            (Joint::RHipPitch, -1.5359, 0.4841),
            (Joint::RKneePitch, -0.1031, 2.1202),
            (Joint::RAnklePitch, -1.1864, 0.9321),
            (Joint::RAnkleRoll, -0.769, 0.3979),
        ];

        let mut min = JointValues::default();
        let mut max = JointValues::default();
        for (joint, low, high) in RANGES {
            min[joint] = low;
            max[joint] = high;
        }
        Self { min, max }
    }
}

impl JointLimits {
    pub fn contains(&self, joint: Joint, angle: f64) -> bool {
        angle >= self.min[joint] && angle <= self.max[joint]
    }

    pub fn clamp(&self, joint: Joint, angle: f64) -> f64 {
        angle.clamp(self.min[joint], self.max[joint])
    }

    /// Checks the range with an extra tolerance on both ends.
    pub fn contains_with_margin(&self, joint: Joint, angle: f64, margin: f64) -> bool {
        angle >= self.min[joint] - margin && angle <= self.max[joint] + margin
    }
}

/// Point-mass approximation of the robot's mass distribution (kg).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MassModel {
    pub torso: f64,
    /// Torso centre of mass in the torso frame
    pub torso_com: [f64; 3],
    pub head: f64,
    pub upper_arm: f64,
    pub lower_arm: f64,
    pub pelvis: f64,
    pub thigh: f64,
    pub tibia: f64,
    pub foot: f64,
}

impl Default for MassModel {
    fn default() -> Self {
        Self {
            torso: 1.0496,
            torso_com: [-0.00413, 0.0, 0.04342],
            head: 0.6052,
            upper_arm: 0.1577,
            lower_arm: 0.2637,
            pelvis: 0.0714,
            thigh: 0.3978,
            tibia: 0.2910,
            foot: 0.1617,
        }
    }
}

impl MassModel {
    pub fn total(&self) -> f64 {
        self.torso
            + self.head
            + 2.0 * (self.upper_arm + self.lower_arm)
            + 2.0 * (self.pelvis + self.thigh + self.tibia + self.foot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits_are_ordered() {
        let limits = JointLimits::default();
        for joint in Joint::ALL {
            assert!(limits.min[joint] < limits.max[joint], "{joint:?}");
        }
    }

    #[test]
    fn test_limits_clamp() {
        let limits = JointLimits::default();
        assert_eq!(limits.clamp(Joint::LKneePitch, 3.0), limits.max[Joint::LKneePitch]);
        assert!(limits.contains(Joint::LKneePitch, 1.0));
        assert!(!limits.contains(Joint::LKneePitch, 3.0));
        assert!(limits.contains_with_margin(Joint::LKneePitch, 2.2, 0.1));
    }

    #[test]
    fn test_body_tilt_without_orientation() {
        let sensors = SensorData::new();
        assert_eq!(sensors.body_tilt(), na::Vector2::zeros());
        assert!(sensors.yaw().is_none());
    }

    #[test]
    fn test_total_mass() {
        let masses = MassModel::default();
        assert!(masses.total() > 4.0 && masses.total() < 6.0);
    }
}

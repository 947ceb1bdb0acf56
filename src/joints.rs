use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

/// Which side of the robot a limb belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    #[default]
    Left,
    Right,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }

    /// `+1.0` for the left side, `-1.0` for the right side.
    pub fn sign(self) -> f64 {
        match self {
            Side::Left => 1.0,
            Side::Right => -1.0,
        }
    }
}

/// All actuated joints of the robot.
///
/// `LHipYawPitch` and `RHipYawPitch` are driven by one physical motor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Joint {
    HeadYaw,
    HeadPitch,
    LShoulderPitch,
    LShoulderRoll,
    LElbowYaw,
    LElbowRoll,
    RShoulderPitch,
    RShoulderRoll,
    RElbowYaw,
    RElbowRoll,
    LHipYawPitch,
    LHipRoll,
    LHipPitch,
    LKneePitch,
    LAnklePitch,
    LAnkleRoll,
    RHipYawPitch,
    RHipRoll,
    RHipPitch,
    RKneePitch,
    RAnklePitch,
    RAnkleRoll,
}

impl Joint {
    pub const COUNT: usize = 22;

    pub const ALL: [Joint; Joint::COUNT] = [
        Joint::HeadYaw,
        Joint::HeadPitch,
        Joint::LShoulderPitch,
        Joint::LShoulderRoll,
        Joint::LElbowYaw,
        Joint::LElbowRoll,
        Joint::RShoulderPitch,
        Joint::RShoulderRoll,
        Joint::RElbowYaw,
        Joint::RElbowRoll,
        Joint::LHipYawPitch,
        Joint::LHipRoll,
        Joint::LHipPitch,
        Joint::LKneePitch,
        Joint::LAnklePitch,
        Joint::LAnkleRoll,
        Joint::RHipYawPitch,
        Joint::RHipRoll,
        Joint::RHipPitch,
        Joint::RKneePitch,
        Joint::RAnklePitch,
        Joint::RAnkleRoll,
    ];

    pub const HEAD: [Joint; 2] = [Joint::HeadYaw, Joint::HeadPitch];

    pub fn index(self) -> usize {
        self as usize
    }

    /// The six leg joints of one side, ordered hip yaw-pitch to ankle roll.
    pub fn leg(side: Side) -> [Joint; 6] {
        match side {
            Side::Left => [
                Joint::LHipYawPitch,
                Joint::LHipRoll,
                Joint::LHipPitch,
                Joint::LKneePitch,
                Joint::LAnklePitch,
                Joint::LAnkleRoll,
            ],
            Side::Right => [
                Joint::RHipYawPitch,
                Joint::RHipRoll,
                Joint::RHipPitch,
                Joint::RKneePitch,
                Joint::RAnklePitch,
                Joint::RAnkleRoll,
            ],
        }
    }

    /// The four arm joints of one side, ordered shoulder pitch to elbow roll.
    pub fn arm(side: Side) -> [Joint; 4] {
        match side {
            Side::Left => [
                Joint::LShoulderPitch,
                Joint::LShoulderRoll,
                Joint::LElbowYaw,
                Joint::LElbowRoll,
            ],
            Side::Right => [
                Joint::RShoulderPitch,
                Joint::RShoulderRoll,
                Joint::RElbowYaw,
                Joint::RElbowRoll,
            ],
        }
    }

    pub fn is_head(self) -> bool {
        matches!(self, Joint::HeadYaw | Joint::HeadPitch)
    }
}

/// One value per joint, indexed by [`Joint`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointValues(pub [f64; Joint::COUNT]);

impl Default for JointValues {
    fn default() -> Self {
        Self([0.0; Joint::COUNT])
    }
}

impl JointValues {
    pub fn filled(value: f64) -> Self {
        Self([value; Joint::COUNT])
    }

    pub fn iter(&self) -> impl Iterator<Item = (Joint, f64)> + '_ {
        Joint::ALL.iter().map(move |&joint| (joint, self[joint]))
    }

    /// Linear interpolation towards `other`; `ratio = 0` yields `self`.
    pub fn lerp(&self, other: &JointValues, ratio: f64) -> JointValues {
        let mut result = *self;
        for joint in Joint::ALL {
            result[joint] = self[joint] + (other[joint] - self[joint]) * ratio;
        }
        result
    }

    pub fn leg(&self, side: Side) -> [f64; 6] {
        Joint::leg(side).map(|joint| self[joint])
    }

    pub fn set_leg(&mut self, side: Side, values: [f64; 6]) {
        for (joint, value) in Joint::leg(side).into_iter().zip(values) {
            self[joint] = value;
        }
    }

    pub fn arm(&self, side: Side) -> [f64; 4] {
        Joint::arm(side).map(|joint| self[joint])
    }

    pub fn set_arm(&mut self, side: Side, values: [f64; 4]) {
        for (joint, value) in Joint::arm(side).into_iter().zip(values) {
            self[joint] = value;
        }
    }
}

impl Index<Joint> for JointValues {
    type Output = f64;

    fn index(&self, joint: Joint) -> &f64 {
        &self.0[joint.index()]
    }
}

impl IndexMut<Joint> for JointValues {
    fn index_mut(&mut self, joint: Joint) -> &mut f64 {
        &mut self.0[joint.index()]
    }
}

/// Target angle and stiffness for every joint, emitted once per cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointRequest {
    /// Target angles in radians.
    pub angles: JointValues,
    /// Stiffness in `[0, 1]`.
    pub stiffness: JointValues,
}

impl Default for JointRequest {
    fn default() -> Self {
        Self {
            angles: JointValues::default(),
            stiffness: JointValues::filled(0.0),
        }
    }
}

impl JointRequest {
    pub fn new(angles: JointValues, stiffness: f64) -> Self {
        Self {
            angles,
            stiffness: JointValues::filled(stiffness),
        }
    }

    /// First joint whose angle or stiffness is not a finite number.
    pub fn first_non_finite(&self) -> Option<(Joint, f64)> {
        Joint::ALL.into_iter().find_map(|joint| {
            let angle = self.angles[joint];
            if !angle.is_finite() {
                Some((joint, angle))
            } else if !self.stiffness[joint].is_finite() {
                Some((joint, self.stiffness[joint]))
            } else {
                None
            }
        })
    }
}

use std::f64::consts::PI;
use std::ops::{Add, Mul, Neg, Sub};

use nalgebra as na;
use serde::{Deserialize, Serialize};

/// Wraps an angle into `(-pi, pi]`.
pub fn normalize_angle(angle: f64) -> f64 {
    let wrapped = (angle + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped <= -PI {
        wrapped + 2.0 * PI
    } else {
        wrapped
    }
}

/// Forward, sideways and rotational component of a walk command.
///
/// Depending on context this is a speed (m/s, rad/s), a step size (m, rad per step)
/// or an acceleration limit.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Step {
    pub forward: f64,
    pub left: f64,
    pub turn: f64,
}

impl Step {
    pub const ZERO: Step = Step {
        forward: 0.0,
        left: 0.0,
        turn: 0.0,
    };

    pub fn new(forward: f64, left: f64, turn: f64) -> Self {
        Self {
            forward,
            left,
            turn,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.forward == 0.0 && self.left == 0.0 && self.turn == 0.0
    }

    pub fn is_finite(&self) -> bool {
        self.forward.is_finite() && self.left.is_finite() && self.turn.is_finite()
    }
}

impl Neg for Step {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Step::new(-self.forward, -self.left, -self.turn)
    }
}

impl Add for Step {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Step::new(
            self.forward + rhs.forward,
            self.left + rhs.left,
            self.turn + rhs.turn,
        )
    }
}

impl Sub for Step {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        self + (-rhs)
    }
}

impl Mul<f64> for Step {
    type Output = Self;

    fn mul(self, rhs: f64) -> Self::Output {
        Step::new(self.forward * rhs, self.left * rhs, self.turn * rhs)
    }
}

/// Builds a 2D pose from (x, y, rotation).
pub fn pose2(x: f64, y: f64, rotation: f64) -> na::Isometry2<f64> {
    na::Isometry2::new(na::Vector2::new(x, y), rotation)
}

/// Accumulated robot displacement since an external reference.
///
/// Offsets are composed in the robot frame, so the pose delta between any two readings
/// equals the composition of all offsets accumulated in between.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Odometry {
    pose: na::Isometry2<f64>,
}

impl Default for Odometry {
    fn default() -> Self {
        Self {
            pose: na::Isometry2::identity(),
        }
    }
}

impl Odometry {
    pub fn pose(&self) -> &na::Isometry2<f64> {
        &self.pose
    }

    pub fn x(&self) -> f64 {
        self.pose.translation.x
    }

    pub fn y(&self) -> f64 {
        self.pose.translation.y
    }

    pub fn rotation(&self) -> f64 {
        self.pose.rotation.angle()
    }

    /// Appends one robot-relative offset.
    pub fn accumulate(&mut self, offset: &na::Isometry2<f64>) {
        self.pose *= offset;
    }

    /// Pose change from `earlier` to `self`, expressed in the frame of `earlier`.
    pub fn offset_since(&self, earlier: &Odometry) -> na::Isometry2<f64> {
        earlier.pose.inverse() * self.pose
    }

    /// Only used by the localization when it re-anchors the odometry.
    pub fn reset_to(&mut self, pose: na::Isometry2<f64>) {
        self.pose = pose;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_normalize_angle() {
        assert_relative_eq!(normalize_angle(3.0 * PI), PI, epsilon = 1e-12);
        assert_relative_eq!(normalize_angle(-0.5), -0.5, epsilon = 1e-12);
        assert_relative_eq!(normalize_angle(2.0 * PI + 0.25), 0.25, epsilon = 1e-12);
        assert_relative_eq!(normalize_angle(-PI), PI, epsilon = 1e-12);
    }

    #[test]
    fn test_step_arithmetic() {
        let a = Step::new(0.1, 0.2, 0.3);
        let b = a * 2.0 - a;
        assert_relative_eq!(b.forward, 0.1);
        assert!(Step::ZERO.is_zero());
        assert!(!(-a).is_zero());
    }

    #[test]
    fn test_odometry_accumulation_matches_delta() {
        let mut odometry = Odometry::default();
        odometry.accumulate(&pose2(0.3, 0.1, 0.4));
        let start = odometry;

        let offsets = [
            pose2(0.01, 0.0, 0.02),
            pose2(0.02, -0.005, -0.01),
            pose2(0.0, 0.01, 0.05),
            pose2(-0.01, 0.002, 0.0),
        ];
        let mut composed = na::Isometry2::identity();
        for offset in &offsets {
            odometry.accumulate(offset);
            composed *= offset;
        }

        let delta = odometry.offset_since(&start);
        assert_relative_eq!(delta.translation.x, composed.translation.x, epsilon = 1e-12);
        assert_relative_eq!(delta.translation.y, composed.translation.y, epsilon = 1e-12);
        assert_relative_eq!(delta.rotation.angle(), composed.rotation.angle(), epsilon = 1e-12);
    }
}

//! Walk command shaping applied once per step: the speed ellipsoid and per-axis acceleration limits.

use serde::{Deserialize, Serialize};

use crate::pose::Step;

/// Iterations of the forward/left scale search, resolution 2^-16.
const CLAMP_ITERATIONS: usize = 16;

/// Limits of the walk command (m, rad per step; speeds in m/s and rad/s when walking by speed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeedLimits {
    /// Maximum forward, sideways and turn speed
    pub max_speed: Step,
    /// Maximum speed walking backwards (positive)
    pub max_speed_backwards: f64,
    /// Maximum increase of each component per step
    pub max_acceleration: Step,
    /// Maximum decrease of each component per step
    pub max_deceleration: Step,
    /// Exponent shaping the forward/left cross-section of the speed ellipsoid
    pub translation_exponent: f64,
    /// Exponent coupling translation and rotation
    pub rotation_exponent: f64,
}

impl Default for SpeedLimits {
    fn default() -> Self {
        Self {
            max_speed: Step::new(0.25, 0.2, 1.0),
            max_speed_backwards: 0.15,
            max_acceleration: Step::new(0.05, 0.05, 0.25),
            max_deceleration: Step::new(0.1, 0.1, 0.5),
            translation_exponent: 2.0,
            rotation_exponent: 1.5,
        }
    }
}

impl SpeedLimits {
    /// Superellipsoid volume of a normalized command; `<= 1` is feasible.
    pub fn volume(&self, forward: f64, left: f64, turn: f64) -> f64 {
        let et = self.translation_exponent;
        let er = self.rotation_exponent;
        (forward.abs().powf(et) + left.abs().powf(et)).powf(er / et) + turn.abs().powf(er)
    }

    fn normalize(&self, request: &Step) -> (f64, f64, f64) {
        let max_forward = if request.forward >= 0.0 {
            self.max_speed.forward
        } else {
            self.max_speed_backwards
        };
        let ratio = |value: f64, max: f64| if max > 0.0 { value / max } else { 0.0 };
        (
            ratio(request.forward, max_forward),
            ratio(request.left, self.max_speed.left),
            ratio(request.turn, self.max_speed.turn).clamp(-1.0, 1.0),
        )
    }

    fn denormalize(&self, forward: f64, left: f64, turn: f64) -> Step {
        let max_forward = if forward >= 0.0 {
            self.max_speed.forward
        } else {
            self.max_speed_backwards
        };
        Step::new(
            forward * max_forward,
            left * self.max_speed.left,
            turn * self.max_speed.turn,
        )
    }
}

/// Clamps a walk command into the speed ellipsoid.
///
/// Turn is clamped to its own maximum and kept; forward and left are scaled down
/// uniformly until the command is feasible. The result never exceeds the request
/// in any component.
pub fn ellipsoid_clamp(request: &Step, limits: &SpeedLimits) -> Step {
    let (forward, left, turn) = limits.normalize(request);
    if limits.volume(forward, left, turn) <= 1.0 {
        return limits.denormalize(forward, left, turn);
    }

    // volume(0, 0, turn) <= 1 since |turn| <= 1, so the lower bound is always feasible
    let mut low = 0.0;
    let mut high = 1.0;
    for _ in 0..CLAMP_ITERATIONS {
        let mid = 0.5 * (low + high);
        if limits.volume(forward * mid, left * mid, turn) <= 1.0 {
            low = mid;
        } else {
            high = mid;
        }
    }

    limits.denormalize(forward * low, left * low, turn)
}

fn limit_axis(current: f64, target: f64, acceleration: f64, deceleration: f64) -> f64 {
    let reversing = current != 0.0 && target != 0.0 && current.signum() != target.signum();
    if reversing {
        // come to a halt first
        return if current.abs() > deceleration {
            current - deceleration * current.signum()
        } else {
            0.0
        };
    }

    let change = target - current;
    if target.abs() < current.abs() {
        current + change.clamp(-deceleration, deceleration)
    } else {
        current + change.clamp(-acceleration, acceleration)
    }
}

/// Moves `current` towards `target` by at most one acceleration (or deceleration) step per axis.
pub fn limit_acceleration(current: &Step, target: &Step, limits: &SpeedLimits) -> Step {
    let acc = &limits.max_acceleration;
    let dec = &limits.max_deceleration;
    Step::new(
        limit_axis(current.forward, target.forward, acc.forward, dec.forward),
        limit_axis(current.left, target.left, acc.left, dec.left),
        limit_axis(current.turn, target.turn, acc.turn, dec.turn),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_feasible_request_unchanged() {
        let limits = SpeedLimits::default();
        let request = Step::new(0.1, 0.05, 0.2);
        let clamped = ellipsoid_clamp(&request, &limits);
        assert_relative_eq!(clamped.forward, request.forward, epsilon = 1e-12);
        assert_relative_eq!(clamped.left, request.left, epsilon = 1e-12);
        assert_relative_eq!(clamped.turn, request.turn, epsilon = 1e-12);
    }

    #[test]
    fn test_clamp_stays_inside_and_never_grows() {
        let limits = SpeedLimits::default();
        for forward in [-0.5, -0.2, 0.0, 0.15, 0.3, 1.0] {
            for left in [-0.4, 0.0, 0.1, 0.3] {
                for turn in [-3.0, -0.5, 0.0, 0.8, 2.0] {
                    let request = Step::new(forward, left, turn);
                    let clamped = ellipsoid_clamp(&request, &limits);

                    let max_forward = if clamped.forward >= 0.0 {
                        limits.max_speed.forward
                    } else {
                        limits.max_speed_backwards
                    };
                    let volume = limits.volume(
                        clamped.forward / max_forward,
                        clamped.left / limits.max_speed.left,
                        clamped.turn / limits.max_speed.turn,
                    );
                    assert!(volume <= 1.0 + 1e-9, "{request:?} -> {clamped:?}");
                    assert!(clamped.forward.abs() <= request.forward.abs() + 1e-12);
                    assert!(clamped.left.abs() <= request.left.abs() + 1e-12);
                    assert!(clamped.turn.abs() <= request.turn.abs() + 1e-12);
                }
            }
        }
    }

    #[test]
    fn test_clamp_keeps_direction() {
        let limits = SpeedLimits::default();
        let request = Step::new(1.0, 1.0, 0.0);
        let clamped = ellipsoid_clamp(&request, &limits);
        assert!(clamped.forward > 0.0 && clamped.left > 0.0);
        // uniform scale preserves the ratio of the normalized request, here 4:5
        let requested_ratio = (request.forward / limits.max_speed.forward)
            / (request.left / limits.max_speed.left);
        assert_relative_eq!(requested_ratio, 0.8, epsilon = 1e-12);
        assert_relative_eq!(
            (clamped.forward / limits.max_speed.forward) / (clamped.left / limits.max_speed.left),
            requested_ratio,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_backwards_uses_own_limit() {
        let limits = SpeedLimits::default();
        let clamped = ellipsoid_clamp(&Step::new(-1.0, 0.0, 0.0), &limits);
        assert_relative_eq!(clamped.forward, -limits.max_speed_backwards, epsilon = 1e-4);
    }

    #[test]
    fn test_acceleration_limited() {
        let limits = SpeedLimits::default();
        let mut current = Step::ZERO;
        let target = Step::new(0.2, 0.0, 0.0);
        current = limit_acceleration(&current, &target, &limits);
        assert_relative_eq!(current.forward, limits.max_acceleration.forward);
        for _ in 0..10 {
            current = limit_acceleration(&current, &target, &limits);
        }
        assert_relative_eq!(current.forward, 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_reversal_decelerates_to_zero_first() {
        let limits = SpeedLimits::default();
        let dec = limits.max_deceleration.forward;
        let current = Step::new(0.25, 0.0, 0.0);
        let target = Step::new(-0.1, 0.0, 0.0);

        let next = limit_acceleration(&current, &target, &limits);
        assert_relative_eq!(next.forward, 0.25 - dec, epsilon = 1e-12);

        let slow = Step::new(0.5 * dec, 0.0, 0.0);
        let next = limit_acceleration(&slow, &target, &limits);
        assert_eq!(next.forward, 0.0);

        let next = limit_acceleration(&next, &target, &limits);
        assert!(next.forward < 0.0);
    }
}

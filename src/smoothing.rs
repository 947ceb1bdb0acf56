//! Shaping functions for the intra-step foot trajectories.
//!
//! All functions take a normalized phase in `[0, 1]`; inputs outside that range are clamped.

/// Quadratic ease-in/ease-out from 0 to 1.
///
/// `dead_time_fraction` keeps the output at 0 for the first half of that fraction and at 1
/// for the last half, so the foot only starts moving once it is clear of the ground.
pub fn parabolic_step(phase: f64, dead_time_fraction: f64) -> f64 {
    let phase = phase.clamp(0.0, 1.0);
    let dead_time = dead_time_fraction.clamp(0.0, 0.99) / 2.0;

    if phase <= dead_time {
        return 0.0;
    }
    if phase >= 1.0 - dead_time {
        return 1.0;
    }

    let t = (phase - dead_time) / (1.0 - 2.0 * dead_time);
    if t < 0.5 {
        2.0 * t * t
    } else {
        4.0 * t - 2.0 * t * t - 1.0
    }
}

/// Three-segment quadratic bump: 0 at both ends, 1 at `phase = 0.5`.
///
/// Segments meet at 0.25 and 0.75 with matching value and slope.
pub fn parabolic_return(phase: f64) -> f64 {
    let phase = phase.clamp(0.0, 1.0);

    if phase < 0.25 {
        8.0 * phase * phase
    } else if phase < 0.75 {
        let x = phase - 0.5;
        1.0 - 8.0 * x * x
    } else {
        let x = 1.0 - phase;
        8.0 * x * x
    }
}

/// Linear progress of `time` within `period`, clamped to `[0, 1]`.
pub fn linear_step(time: f64, period: f64) -> f64 {
    if period <= 0.0 {
        return 1.0;
    }
    (time / period).clamp(0.0, 1.0)
}

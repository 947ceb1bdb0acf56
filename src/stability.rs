use nalgebra as na;
use serde::{Deserialize, Serialize};

/// Exponential low-pass filter over `N` channels.
///
/// `alpha` is the weight of the previous state: 0 passes the input through, values close
/// to 1 smooth heavily.
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialLpf<const N: usize> {
    alpha: f64,
    state: na::SVector<f64, N>,
}

impl<const N: usize> ExponentialLpf<N> {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            state: na::SVector::zeros(),
        }
    }

    pub fn update(&mut self, value: na::SVector<f64, N>) -> na::SVector<f64, N> {
        self.state = self.state * self.alpha + value * (1.0 - self.alpha);
        self.state
    }

    pub fn state(&self) -> na::SVector<f64, N> {
        self.state
    }

    pub fn reset(&mut self) {
        self.state = na::SVector::zeros();
    }
}

/// Gains of the gyro feedback on the support ankle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalanceConfig {
    /// Low-pass weight of the previous gyro value
    pub gyro_lpf_alpha: f64,
    /// Ankle pitch gain while the torso pitches forward
    pub forward_gain: f64,
    /// Ankle pitch gain while the torso pitches backward
    pub backward_gain: f64,
    /// Ankle roll gain
    pub roll_gain: f64,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            gyro_lpf_alpha: 0.8,
            forward_gain: 0.05,
            backward_gain: 0.25,
            roll_gain: 0.05,
        }
    }
}

/// Proportional gyro feedback for the support ankle.
#[derive(Debug, Clone)]
pub struct GyroBalancer {
    config: BalanceConfig,
    filtered_gyro: ExponentialLpf<3>,
}

impl GyroBalancer {
    pub fn new(config: BalanceConfig) -> Self {
        Self {
            filtered_gyro: ExponentialLpf::new(config.gyro_lpf_alpha),
            config,
        }
    }

    pub fn update(&mut self, gyro: &na::Vector3<f64>) {
        self.filtered_gyro.update(*gyro);
    }

    pub fn filtered_gyro(&self) -> na::Vector3<f64> {
        self.filtered_gyro.state()
    }

    /// Support ankle (pitch, roll) correction for the current filtered gyro.
    pub fn ankle_adjustment(&self) -> (f64, f64) {
        let gyro = self.filtered_gyro.state();
        let pitch_gain = if gyro.y > 0.0 {
            self.config.forward_gain
        } else {
            self.config.backward_gain
        };
        (gyro.y * pitch_gain, gyro.x * self.config.roll_gain)
    }

    pub fn reset(&mut self) {
        self.filtered_gyro.reset();
    }
}

/// PID gains of the horizontal axes, `x` forward and `y` sideways.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PidGains {
    pub kp: na::Vector2<f64>,
    pub ki: na::Vector2<f64>,
    pub kd: na::Vector2<f64>,
    /// Bound on the magnitude of each integral component
    pub integral_limit: na::Vector2<f64>,
}

impl Default for PidGains {
    fn default() -> Self {
        Self {
            kp: na::Vector2::new(0.6, 0.8),
            ki: na::Vector2::new(0.1, 0.1),
            kd: na::Vector2::new(0.01, 0.01),
            integral_limit: na::Vector2::new(0.02, 0.02),
        }
    }
}

impl PidGains {
    /// Same gains on both axes.
    pub fn uniform(kp: f64, ki: f64, kd: f64, integral_limit: f64) -> Self {
        Self {
            kp: na::Vector2::repeat(kp),
            ki: na::Vector2::repeat(ki),
            kd: na::Vector2::repeat(kd),
            integral_limit: na::Vector2::repeat(integral_limit),
        }
    }

    pub fn is_valid(&self) -> bool {
        [self.kp, self.ki, self.kd, self.integral_limit]
            .iter()
            .all(|gains| gains.iter().all(|gain| gain.is_finite() && *gain >= 0.0))
    }
}

/// PID controller on a horizontal (x, y) error.
#[derive(Debug, Clone)]
pub struct PidController {
    gains: PidGains,
    integral: na::Vector2<f64>,
    previous_error: Option<na::Vector2<f64>>,
}

impl PidController {
    pub fn new(gains: PidGains) -> Self {
        Self {
            gains,
            integral: na::Vector2::zeros(),
            previous_error: None,
        }
    }

    pub fn update(&mut self, error: na::Vector2<f64>, dt: f64) -> na::Vector2<f64> {
        let limit = self.gains.integral_limit.abs();
        self.integral += error * dt;
        self.integral = self.integral.zip_map(&limit, |value, limit| value.clamp(-limit, limit));

        // no derivative kick on the first sample
        let derivative = match self.previous_error {
            Some(previous) if dt > 0.0 => (error - previous) / dt,
            _ => na::Vector2::zeros(),
        };
        self.previous_error = Some(error);

        error.component_mul(&self.gains.kp)
            + self.integral.component_mul(&self.gains.ki)
            + derivative.component_mul(&self.gains.kd)
    }

    pub fn integral(&self) -> na::Vector2<f64> {
        self.integral
    }

    pub fn reset(&mut self) {
        self.integral = na::Vector2::zeros();
        self.previous_error = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_lpf_converges() {
        let mut lpf = ExponentialLpf::<2>::new(0.8);
        let input = na::Vector2::new(1.0, -2.0);
        for _ in 0..200 {
            lpf.update(input);
        }
        assert_relative_eq!(lpf.state(), input, epsilon = 1e-9);
    }

    #[test]
    fn test_lpf_zero_alpha_passes_through() {
        let mut lpf = ExponentialLpf::<1>::new(0.0);
        let output = lpf.update(na::Vector1::new(3.0));
        assert_relative_eq!(output.x, 3.0);
    }

    #[test]
    fn test_gyro_balancer_asymmetric_pitch_gain() {
        let config = BalanceConfig {
            gyro_lpf_alpha: 0.0,
            ..Default::default()
        };
        let mut balancer = GyroBalancer::new(config.clone());

        balancer.update(&na::Vector3::new(0.2, 1.0, 0.0));
        let (pitch, roll) = balancer.ankle_adjustment();
        assert_relative_eq!(pitch, config.forward_gain);
        assert_relative_eq!(roll, 0.2 * config.roll_gain);

        balancer.update(&na::Vector3::new(0.0, -1.0, 0.0));
        let (pitch, _) = balancer.ankle_adjustment();
        assert_relative_eq!(pitch, -config.backward_gain);
    }

    #[test]
    fn test_pid_integral_is_clamped() {
        let gains = PidGains::uniform(0.0, 1.0, 0.0, 0.05);
        let mut pid = PidController::new(gains);
        for _ in 0..100 {
            pid.update(na::Vector2::new(1.0, -1.0), 0.012);
        }
        assert_relative_eq!(pid.integral(), na::Vector2::new(0.05, -0.05));
    }

    #[test]
    fn test_pid_first_sample_has_no_derivative() {
        let gains = PidGains::uniform(1.0, 0.0, 1.0, 1.0);
        let mut pid = PidController::new(gains);
        let first = pid.update(na::Vector2::new(0.1, 0.0), 0.01);
        assert_relative_eq!(first.x, 0.1);

        let second = pid.update(na::Vector2::new(0.2, 0.0), 0.01);
        assert_relative_eq!(second.x, 0.2 + 10.0, epsilon = 1e-9);

        pid.reset();
        let after_reset = pid.update(na::Vector2::new(0.1, 0.0), 0.01);
        assert_relative_eq!(after_reset.x, 0.1);
    }

    #[test]
    fn test_pid_gains_per_axis() {
        let gains = PidGains {
            kp: na::Vector2::new(1.0, 2.0),
            ki: na::Vector2::new(0.0, 10.0),
            kd: na::Vector2::zeros(),
            integral_limit: na::Vector2::new(1.0, 0.01),
        };
        let mut pid = PidController::new(gains);
        let error = na::Vector2::new(0.1, 0.1);
        let output = pid.update(error, 0.1);
        assert_relative_eq!(output.x, 0.1, epsilon = 1e-12);
        // kp 0.2 plus ki 10 on the clamped integral 0.01
        assert_relative_eq!(output.y, 0.2 + 0.1, epsilon = 1e-12);
        assert_relative_eq!(pid.integral(), na::Vector2::new(0.01, 0.01), epsilon = 1e-12);

        for _ in 0..20 {
            pid.update(error, 0.1);
        }
        assert_relative_eq!(pid.integral(), na::Vector2::new(0.21, 0.01), epsilon = 1e-9);
    }

    #[test]
    fn test_negative_gain_invalid() {
        assert!(PidGains::default().is_valid());
        let gains = PidGains {
            kd: na::Vector2::new(0.01, -0.01),
            ..Default::default()
        };
        assert!(!gains.is_valid());
    }
}

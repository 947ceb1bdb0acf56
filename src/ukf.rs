//! Unscented Kalman filter and the walking odometry estimator built on it.

use nalgebra as na;
use serde::{Deserialize, Serialize};

const ALPHA: f64 = 1.0;
const BETA: f64 = 2.0;
const KAPPA: f64 = 0.0;

/// Unscented Kalman filter over an `N`-dimensional state.
#[derive(Debug, Clone)]
pub struct UnscentedKalmanFilter<const N: usize> {
    pub state: na::SVector<f64, N>,
    pub covariance: na::SMatrix<f64, N, N>,
}

impl<const N: usize> UnscentedKalmanFilter<N> {
    pub fn new(state: na::SVector<f64, N>, covariance: na::SMatrix<f64, N, N>) -> Self {
        Self { state, covariance }
    }

    fn lambda() -> f64 {
        ALPHA * ALPHA * (N as f64 + KAPPA) - N as f64
    }

    /// (mean weights, covariance weights) of the 2N + 1 sigma points.
    fn weights() -> (Vec<f64>, Vec<f64>) {
        let n = N as f64;
        let lambda = Self::lambda();
        let other = 1.0 / (2.0 * (n + lambda));

        let mut mean = vec![other; 2 * N + 1];
        let mut covariance = vec![other; 2 * N + 1];
        mean[0] = lambda / (n + lambda);
        covariance[0] = mean[0] + (1.0 - ALPHA * ALPHA + BETA);
        (mean, covariance)
    }

    fn sigma_points(&self) -> Option<Vec<na::SVector<f64, N>>> {
        let scaled = self.covariance * (N as f64 + Self::lambda());
        let symmetric = (scaled + scaled.transpose()) * 0.5;
        let root = symmetric
            .cholesky()
            .or_else(|| (symmetric + na::SMatrix::identity() * 1e-9).cholesky())?
            .l();

        let mut points = Vec::with_capacity(2 * N + 1);
        points.push(self.state);
        for i in 0..N {
            points.push(self.state + root.column(i));
        }
        for i in 0..N {
            points.push(self.state - root.column(i));
        }
        Some(points)
    }

    /// Propagates the state through `process`. Skipped when the covariance lost definiteness.
    pub fn predict<F>(&mut self, process: F, process_noise: &na::SMatrix<f64, N, N>) -> bool
    where
        F: Fn(&na::SVector<f64, N>) -> na::SVector<f64, N>,
    {
        let Some(points) = self.sigma_points() else {
            return false;
        };
        let (mean_weights, covariance_weights) = Self::weights();
        let propagated: Vec<_> = points.iter().map(&process).collect();

        let mean = propagated
            .iter()
            .zip(&mean_weights)
            .fold(na::SVector::<f64, N>::zeros(), |sum, (point, weight)| {
                sum + point * *weight
            });
        let covariance = propagated.iter().zip(&covariance_weights).fold(
            *process_noise,
            |sum, (point, weight)| {
                let deviation = point - mean;
                sum + deviation * deviation.transpose() * *weight
            },
        );

        self.state = mean;
        self.covariance = covariance;
        true
    }

    /// Fuses a measurement predicted by `model`. Skipped when the innovation is singular.
    pub fn update<const M: usize, F>(
        &mut self,
        measurement: &na::SVector<f64, M>,
        model: F,
        measurement_noise: &na::SMatrix<f64, M, M>,
    ) -> bool
    where
        F: Fn(&na::SVector<f64, N>) -> na::SVector<f64, M>,
    {
        let Some(points) = self.sigma_points() else {
            return false;
        };
        let (mean_weights, covariance_weights) = Self::weights();
        let predicted: Vec<_> = points.iter().map(&model).collect();

        let expected = predicted
            .iter()
            .zip(&mean_weights)
            .fold(na::SVector::<f64, M>::zeros(), |sum, (z, weight)| sum + z * *weight);

        let mut innovation_covariance = *measurement_noise;
        let mut cross_covariance = na::SMatrix::<f64, N, M>::zeros();
        for ((point, z), weight) in points.iter().zip(&predicted).zip(&covariance_weights) {
            let dz = z - expected;
            innovation_covariance += dz * dz.transpose() * *weight;
            cross_covariance += (point - self.state) * dz.transpose() * *weight;
        }

        let Some(inverse) = innovation_covariance.cholesky().map(|c| c.inverse()) else {
            return false;
        };
        let gain = cross_covariance * inverse;
        self.state += gain * (measurement - expected);
        self.covariance -= gain * innovation_covariance * gain.transpose();
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OdometryFilterConfig {
    pub enabled: bool,
    /// Velocity process noise variance per cycle ((m/s)^2)
    pub process_noise: f64,
    /// Variance of the walk generator's velocity ((m/s)^2)
    pub measurement_noise: f64,
    pub initial_variance: f64,
}

impl Default for OdometryFilterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            process_noise: 1e-4,
            measurement_noise: 4e-4,
            initial_variance: 1e-2,
        }
    }
}

/// Fuses the walk generator's planned translation with the measured acceleration.
///
/// The state is the robot-frame planar velocity; rotation is taken from the walk offset.
#[derive(Debug, Clone)]
pub struct OdometryFilter {
    config: OdometryFilterConfig,
    ukf: UnscentedKalmanFilter<2>,
}

impl OdometryFilter {
    pub fn new(config: OdometryFilterConfig) -> Self {
        let ukf = UnscentedKalmanFilter::new(
            na::Vector2::zeros(),
            na::Matrix2::identity() * config.initial_variance,
        );
        Self { config, ukf }
    }

    pub fn velocity(&self) -> na::Vector2<f64> {
        self.ukf.state
    }

    pub fn reset(&mut self) {
        self.ukf = UnscentedKalmanFilter::new(
            na::Vector2::zeros(),
            na::Matrix2::identity() * self.config.initial_variance,
        );
    }

    /// Filtered version of one cycle's walk offset.
    pub fn update(
        &mut self,
        walk_offset: &na::Isometry2<f64>,
        linear_acceleration: &na::Vector2<f64>,
        dt: f64,
    ) -> na::Isometry2<f64> {
        if dt <= 0.0 {
            return *walk_offset;
        }

        let turn = walk_offset.rotation.angle();
        let rotation = na::Rotation2::new(-turn);
        let acceleration = *linear_acceleration;
        let process_noise = na::Matrix2::identity() * self.config.process_noise;
        self.ukf.predict(
            |velocity| rotation * velocity + acceleration * dt,
            &process_noise,
        );

        let measured = walk_offset.translation.vector / dt;
        let measurement_noise = na::Matrix2::identity() * self.config.measurement_noise;
        self.ukf
            .update(&measured, |velocity| *velocity, &measurement_noise);

        let translation = self.ukf.state * dt;
        na::Isometry2::new(translation, turn)
    }
}

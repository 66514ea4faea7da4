use super::{
    step, symmetrize, FilterCore, FilterStatus, ImuFilterConfig, ImuState, MeasurementVector,
    OrientationFilter, StateCovariance, StateVector, STATE_DIM,
};
use crate::quaternion::UnitQuaternion;
use crate::rotation::Rotation3d;
use crate::Vector3;
use nalgebra::{Cholesky, SMatrix};
use tracing::{debug, trace, warn};

const SIGMA_POINTS: usize = 2 * STATE_DIM;

/// How far out the sigma points are placed, in units of the Cholesky factor's columns.
const SIGMA_SCALE_SQUARED: f64 = SIGMA_POINTS as f64;

/// Weight of each sigma point in the mean.
const MEAN_WEIGHT: f64 = 1. / SIGMA_POINTS as f64;

/// Weight of each sigma point in (cross-)covariances: `1 / (2N · SIGMA_SCALE_SQUARED / N)`.
const SPREAD_WEIGHT: f64 = 1. / (2. * SIGMA_SCALE_SQUARED);

/// A set of propagated sigma points together with their mean and spread.
struct SigmaSet {
    points: Vec<ImuState>,
    deviations: Vec<StateVector>,
    mean: ImuState,
    covariance: StateCovariance,
    mean_iterations: usize,
}

/// Unscented Kalman filter for IMU orientation.
///
/// Sigma points are the `2N` columns of `±sqrt(2N)·chol(P + Q·dt)`, applied to the current state
/// as error-state perturbations. They are averaged with equal weights `1/2N`. Covariances are
/// recovered with weights `1/4N`: this is the unscented transform with `κ = N`, whose central
/// point carries the remaining half of the weight but sits on the mean and adds no spread. The
/// points' weighted covariance is therefore exactly `P + Q·dt`.
///
/// The mean of the propagated rotations is found by iterating: average the rotation vectors of
/// all points relative to the current guess, move the guess by that average, repeat. This is not
/// the true mean on the rotation manifold. It is accurate when the sigma points are close to each
/// other, which holds at typical IMU rates, and degrades for large covariances or long time
/// steps.
#[derive(Debug)]
pub struct ImuUkf {
    config: ImuFilterConfig,
    state: ImuState,
    covariance: StateCovariance,
    last_timestamp: Option<f64>,
    propagated: Option<SigmaSet>,
}

impl std::fmt::Debug for SigmaSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigmaSet")
            .field("points", &self.points.len())
            .field("mean", &self.mean)
            .field("mean_iterations", &self.mean_iterations)
            .finish()
    }
}

impl Default for ImuUkf {
    fn default() -> Self {
        Self::new(ImuFilterConfig::default())
    }
}

impl ImuUkf {
    pub fn new(config: ImuFilterConfig) -> Self {
        let covariance = config.initial_covariance();
        Self {
            config,
            state: ImuState::default(),
            covariance,
            last_timestamp: None,
            propagated: None,
        }
    }

    pub fn config(&self) -> &ImuFilterConfig {
        &self.config
    }

    /// Draws sigma points around the current state and pushes them through the process model.
    fn propagate(&self, dt: f64) -> Option<SigmaSet> {
        let spread = self.covariance + self.config.process_noise(dt);
        let l = Cholesky::new(spread)?.unpack() * SIGMA_SCALE_SQUARED.sqrt();

        let mut points = Vec::with_capacity(SIGMA_POINTS);
        for column in l.column_iter() {
            let offset: StateVector = column.into_owned();
            for offset in [offset, -offset] {
                let mut point = self.state;
                point.inject(&offset);
                points.push(point.predict(dt));
            }
        }

        let guess = self.state.predict(dt).rotation;
        let set = self.summarize(points, guess);
        trace!(iterations = set.mean_iterations, "ImuUkf.Propagate.RotationMean");
        Some(set)
    }

    /// Averages `points`, starting the rotation mean from `guess`.
    fn summarize(&self, points: Vec<ImuState>, guess: UnitQuaternion) -> SigmaSet {
        let mut rotation = guess;
        let mut mean_iterations = 0;
        while mean_iterations < self.config.mean_max_iterations {
            mean_iterations += 1;
            let mean_error = points
                .iter()
                .map(|p| (rotation.conjugate() * p.rotation).log())
                .sum::<Vector3>()
                * MEAN_WEIGHT;
            rotation *= UnitQuaternion::exp(&mean_error);
            if mean_error.norm_squared() < self.config.mean_tolerance.powi(2) {
                break;
            }
        }
        let mean = ImuState {
            rotation,
            angular_velocity: points.iter().map(|p| p.angular_velocity).sum::<Vector3>()
                * MEAN_WEIGHT,
            gyro_bias: points.iter().map(|p| p.gyro_bias).sum::<Vector3>() * MEAN_WEIGHT,
        };

        let deviations: Vec<StateVector> = points.iter().map(|p| p.error_from(&mean)).collect();
        let covariance = deviations
            .iter()
            .fold(StateCovariance::zeros(), |acc, d| acc + d * d.transpose())
            * SPREAD_WEIGHT;

        SigmaSet {
            points,
            deviations,
            mean,
            covariance,
            mean_iterations,
        }
    }
}

impl FilterCore for ImuUkf {
    fn last_timestamp(&mut self) -> &mut Option<f64> {
        &mut self.last_timestamp
    }

    fn process_update(&mut self, dt: f64) -> Result<(), FilterStatus> {
        match self.propagate(dt) {
            Some(set) => {
                self.propagated = Some(set);
                Ok(())
            }
            None => {
                warn!(dt, "ImuUkf.ProcessUpdate.CholeskyFailed");
                self.covariance = self.config.initial_covariance();
                self.propagated = None;
                Err(FilterStatus::SingularMatrix)
            }
        }
    }

    fn measurement_update(&mut self, measurement: &MeasurementVector) -> Result<(), FilterStatus> {
        // without a process step (first sample), spread the points around the current state
        let set = match self.propagated.take() {
            Some(set) => set,
            None => self.propagate(0.).ok_or_else(|| {
                warn!("ImuUkf.MeasurementUpdate.CholeskyFailed");
                self.covariance = self.config.initial_covariance();
                FilterStatus::SingularMatrix
            })?,
        };

        let gravity = self.config.gravity();
        let predicted: Vec<MeasurementVector> =
            set.points.iter().map(|p| p.measure(&gravity)).collect();
        let predicted_mean = predicted.iter().sum::<MeasurementVector>() * MEAN_WEIGHT;

        let mut innovation_covariance = self.config.measurement_noise();
        let mut cross_covariance = SMatrix::<f64, STATE_DIM, 6>::zeros();
        for (deviation, z) in set.deviations.iter().zip(&predicted) {
            let dz = z - predicted_mean;
            innovation_covariance += dz * dz.transpose() * SPREAD_WEIGHT;
            cross_covariance += deviation * dz.transpose() * SPREAD_WEIGHT;
        }

        self.state = set.mean;
        self.covariance = set.covariance;
        let Some(inverse) = innovation_covariance.try_inverse() else {
            warn!("ImuUkf.MeasurementUpdate.SingularInnovation");
            symmetrize(&mut self.covariance);
            return Err(FilterStatus::SingularMatrix);
        };

        let gain = cross_covariance * inverse;
        let correction = gain * (measurement - predicted_mean);
        self.state.inject(&correction);
        self.covariance -= gain * innovation_covariance * gain.transpose();
        symmetrize(&mut self.covariance);
        Ok(())
    }
}

impl OrientationFilter for ImuUkf {
    fn reset(&mut self, rotation: Rotation3d) {
        debug!(%rotation, "ImuUkf.Reset");
        self.state = ImuState::at(rotation);
        self.covariance = self.config.initial_covariance();
        self.last_timestamp = None;
        self.propagated = None;
    }

    fn update(&mut self, accel: &Vector3, gyro: &Vector3, timestamp_s: f64) -> FilterStatus {
        step(self, accel, gyro, timestamp_s)
    }

    fn rotation(&self) -> Rotation3d {
        Rotation3d::from_quaternion(self.state.rotation)
    }

    fn angular_velocity(&self) -> Vector3 {
        self.state.angular_velocity
    }

    fn gyro_bias(&self) -> Vector3 {
        self.state.gyro_bias
    }

    fn covariance(&self) -> &StateCovariance {
        &self.covariance
    }
}

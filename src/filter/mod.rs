//! IMU orientation filters.
//!
//! Both filters estimate the same state from the same measurements:
//!
//! - the body-to-world rotation `q`,
//! - the body angular velocity `ω` (rad/s), and
//! - the gyroscope bias `b` (rad/s),
//!
//! with a covariance over the 9-dimensional error state `[δθ, δω, δb]`, where the rotation error
//! is applied on the right (`q = q̂ ⊗ exp(δθ)`). The process model holds `ω` and `b` constant and
//! integrates `q ← q ⊗ exp(ω·dt)`. Each sample is the accelerometer reading, used only for its
//! direction as a reference for "up", and the gyroscope reading, modelled as `ω + b`.
//!
//! [`ImuUkf`] is an unscented filter, [`ImuEskf`] an error-state extended filter with closed-form
//! Jacobians. They share [`ImuFilterConfig`] and report what happened to each sample through
//! [`FilterStatus`].

use crate::quaternion::UnitQuaternion;
use crate::rotation::Rotation3d;
use crate::Vector3;
use nalgebra::{SMatrix, SVector};
use tracing::debug;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

mod eskf;
mod ukf;

pub use eskf::ImuEskf;
pub use ukf::ImuUkf;

/// Dimension of the error state.
pub const STATE_DIM: usize = 9;
const MEASUREMENT_DIM: usize = 6;

pub type StateCovariance = SMatrix<f64, STATE_DIM, STATE_DIM>;
pub(crate) type StateVector = SVector<f64, STATE_DIM>;
pub(crate) type MeasurementVector = SVector<f64, MEASUREMENT_DIM>;
pub(crate) type MeasurementCovariance = SMatrix<f64, MEASUREMENT_DIM, MEASUREMENT_DIM>;

/// Accelerometer readings shorter than this carry no usable direction.
const MIN_ACCEL_NORM: f64 = 1e-9;

/// What an [`OrientationFilter::update`] call did with its sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterStatus {
    /// First sample after a reset: the timestamp was latched and the measurement fused, without
    /// a process step.
    Initialized,
    /// Process and measurement update both ran.
    Updated,
    /// The timestamp did not advance past the previous sample's; nothing changed.
    SkippedNonMonotonic,
    /// The sample was non-finite or had a zero accelerometer vector; nothing changed.
    SkippedInvalidSample,
    /// A covariance could not be factorized or inverted. The measurement was not fused; if the
    /// state covariance itself was at fault it has been reset to its initial value.
    SingularMatrix,
}

/// Tuning for [`ImuUkf`] and [`ImuEskf`].
///
/// Variances are per axis. Process noise is given per second and scaled by the time step.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ImuFilterConfig {
    pub initial_rotation_variance: f64,
    pub initial_angular_velocity_variance: f64,
    pub initial_gyro_bias_variance: f64,
    pub rotation_process_noise: f64,
    pub angular_velocity_process_noise: f64,
    pub gyro_bias_process_noise: f64,
    /// Variance of each component of the _normalized_ accelerometer reading.
    pub accel_noise: f64,
    pub gyro_noise: f64,
    /// The direction an accelerometer at rest reports, in world coordinates.
    pub gravity_direction: Vector3,
    /// Iteration limit for the UKF's quaternion mean.
    pub mean_max_iterations: usize,
    /// The UKF's quaternion mean stops once its mean error (rad) drops below this.
    pub mean_tolerance: f64,
}

impl Default for ImuFilterConfig {
    fn default() -> Self {
        Self {
            initial_rotation_variance: 1e-2,
            initial_angular_velocity_variance: 1e-2,
            initial_gyro_bias_variance: 1e-4,
            rotation_process_noise: 1e-4,
            angular_velocity_process_noise: 1e-1,
            gyro_bias_process_noise: 1e-8,
            accel_noise: 1e-2,
            gyro_noise: 1e-4,
            gravity_direction: Vector3::z(),
            mean_max_iterations: 10,
            mean_tolerance: 1e-6,
        }
    }
}

impl ImuFilterConfig {
    pub(crate) fn initial_covariance(&self) -> StateCovariance {
        state_diagonal(
            self.initial_rotation_variance,
            self.initial_angular_velocity_variance,
            self.initial_gyro_bias_variance,
        )
    }

    pub(crate) fn process_noise(&self, dt: f64) -> StateCovariance {
        state_diagonal(
            self.rotation_process_noise,
            self.angular_velocity_process_noise,
            self.gyro_bias_process_noise,
        ) * dt
    }

    pub(crate) fn measurement_noise(&self) -> MeasurementCovariance {
        let mut r = MeasurementCovariance::zeros();
        r.fixed_view_mut::<3, 3>(0, 0).fill_diagonal(self.accel_noise);
        r.fixed_view_mut::<3, 3>(3, 3).fill_diagonal(self.gyro_noise);
        r
    }

    /// The normalized gravity direction, falling back to +Z for a zero vector.
    pub(crate) fn gravity(&self) -> Vector3 {
        self.gravity_direction
            .try_normalize(MIN_ACCEL_NORM)
            .unwrap_or_else(Vector3::z)
    }
}

fn state_diagonal(rotation: f64, angular_velocity: f64, bias: f64) -> StateCovariance {
    let mut p = StateCovariance::zeros();
    p.fixed_view_mut::<3, 3>(0, 0).fill_diagonal(rotation);
    p.fixed_view_mut::<3, 3>(3, 3).fill_diagonal(angular_velocity);
    p.fixed_view_mut::<3, 3>(6, 6).fill_diagonal(bias);
    p
}

/// A filter that tracks orientation from accelerometer and gyroscope samples.
pub trait OrientationFilter {
    /// Restarts the filter at `rotation`, with zero angular velocity and bias and the initial
    /// covariance. The next sample initializes the clock.
    fn reset(&mut self, rotation: Rotation3d);

    /// Fuses one sample. `accel` may be in any unit; only its direction is used. `gyro` is in
    /// rad/s and `timestamp_s` in seconds; timestamps must increase strictly.
    fn update(&mut self, accel: &Vector3, gyro: &Vector3, timestamp_s: f64) -> FilterStatus;

    /// The estimated body-to-world rotation.
    fn rotation(&self) -> Rotation3d;

    /// The estimated (unbiased) angular velocity in the body frame.
    fn angular_velocity(&self) -> Vector3;

    fn gyro_bias(&self) -> Vector3;

    fn covariance(&self) -> &StateCovariance;
}

/// The nominal state shared by both filters.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub(crate) struct ImuState {
    pub(crate) rotation: UnitQuaternion,
    pub(crate) angular_velocity: Vector3,
    pub(crate) gyro_bias: Vector3,
}

impl ImuState {
    pub(crate) fn at(rotation: Rotation3d) -> Self {
        Self {
            rotation: *rotation.quaternion(),
            ..Self::default()
        }
    }

    /// Integrates the rotation over `dt` at the current angular velocity.
    pub(crate) fn predict(&self, dt: f64) -> Self {
        Self {
            rotation: self.rotation * UnitQuaternion::exp(&(self.angular_velocity * dt)),
            ..*self
        }
    }

    /// The measurement this state would produce: the gravity direction seen from the body, and
    /// the biased gyro rate.
    pub(crate) fn measure(&self, gravity: &Vector3) -> MeasurementVector {
        let up = self.rotation.conjugate().rotate_vector(gravity);
        let gyro = self.angular_velocity + self.gyro_bias;
        MeasurementVector::new(up.x, up.y, up.z, gyro.x, gyro.y, gyro.z)
    }

    /// Applies an error-state correction.
    pub(crate) fn inject(&mut self, delta: &StateVector) {
        self.rotation *= UnitQuaternion::exp(&delta.fixed_rows::<3>(0).into_owned());
        self.angular_velocity += delta.fixed_rows::<3>(3);
        self.gyro_bias += delta.fixed_rows::<3>(6);
    }

    /// The error state that takes `reference` to `self`.
    pub(crate) fn error_from(&self, reference: &ImuState) -> StateVector {
        let rotation = (reference.rotation.conjugate() * self.rotation).log();
        let angular_velocity = self.angular_velocity - reference.angular_velocity;
        let bias = self.gyro_bias - reference.gyro_bias;
        let mut error = StateVector::zeros();
        error.fixed_rows_mut::<3>(0).copy_from(&rotation);
        error.fixed_rows_mut::<3>(3).copy_from(&angular_velocity);
        error.fixed_rows_mut::<3>(6).copy_from(&bias);
        error
    }
}

pub(crate) fn symmetrize(p: &mut StateCovariance) {
    *p = (*p + p.transpose()) * 0.5;
}

/// The predict/update steps each filter provides to [`step`].
pub(crate) trait FilterCore {
    fn last_timestamp(&mut self) -> &mut Option<f64>;

    fn process_update(&mut self, dt: f64) -> Result<(), FilterStatus>;

    fn measurement_update(&mut self, measurement: &MeasurementVector) -> Result<(), FilterStatus>;
}

/// Validates a sample, advances the clock and runs the filter's update steps.
pub(crate) fn step<F: FilterCore>(
    filter: &mut F,
    accel: &Vector3,
    gyro: &Vector3,
    timestamp_s: f64,
) -> FilterStatus {
    let finite = accel.iter().chain(gyro.iter()).all(|v| v.is_finite());
    let up = accel.try_normalize(MIN_ACCEL_NORM);
    let (true, Some(up), true) = (finite, up, timestamp_s.is_finite()) else {
        debug!(?accel, ?gyro, timestamp_s, "OrientationFilter.Update.InvalidSample");
        return FilterStatus::SkippedInvalidSample;
    };
    let measurement = MeasurementVector::new(up.x, up.y, up.z, gyro.x, gyro.y, gyro.z);

    let status = match *filter.last_timestamp() {
        None => FilterStatus::Initialized,
        Some(last) if timestamp_s <= last => {
            debug!(last, timestamp_s, "OrientationFilter.Update.NonMonotonic");
            return FilterStatus::SkippedNonMonotonic;
        }
        Some(last) => {
            *filter.last_timestamp() = Some(timestamp_s);
            if let Err(status) = filter.process_update(timestamp_s - last) {
                return status;
            }
            FilterStatus::Updated
        }
    };
    *filter.last_timestamp() = Some(timestamp_s);

    match filter.measurement_update(&measurement) {
        Ok(()) => status,
        Err(status) => status,
    }
}

#[cfg(test)]
mod tests {
    use super::{ImuFilterConfig, ImuState, StateVector};
    use crate::{Rotation3d, Vector3};
    use approx::assert_relative_eq;
    use uom::si::angle::degree;
    use uom::si::f64::Angle;

    #[test]
    fn error_state_roundtrip() {
        let reference = ImuState::at(Rotation3d::from_axis_angle(
            Angle::new::<degree>(40.),
            &Vector3::new(1., 2., 3.),
        ));
        let delta = StateVector::from_column_slice(&[0.1, -0.2, 0.05, 1., 2., 3., 0.01, 0.02, 0.03]);
        let mut perturbed = reference;
        perturbed.inject(&delta);
        assert_relative_eq!(perturbed.error_from(&reference), delta, epsilon = 1e-12);
    }

    #[test]
    fn level_body_sees_gravity_along_z() {
        let state = ImuState::at(Rotation3d::identity());
        let z = state.measure(&Vector3::z());
        assert_relative_eq!(z.fixed_rows::<3>(0).into_owned(), Vector3::z());

        // rolled 90° about x, "up" lies along the body's +y
        let rolled = ImuState::at(Rotation3d::from_axis_angle(Angle::new::<degree>(90.), &Vector3::x()));
        let z = rolled.measure(&Vector3::z());
        assert_relative_eq!(z.fixed_rows::<3>(0).into_owned(), Vector3::y(), epsilon = 1e-12);
    }

    #[test]
    fn config_noise_matrices() {
        let config = ImuFilterConfig::default();
        let q = config.process_noise(0.5);
        assert_eq!(q[(0, 0)], 0.5 * config.rotation_process_noise);
        assert_eq!(q[(4, 4)], 0.5 * config.angular_velocity_process_noise);
        assert_eq!(q[(8, 8)], 0.5 * config.gyro_bias_process_noise);
        assert_eq!(q[(0, 1)], 0.);
        let r = config.measurement_noise();
        assert_eq!(r[(2, 2)], config.accel_noise);
        assert_eq!(r[(5, 5)], config.gyro_noise);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn partial_config_from_yaml() {
        let config: ImuFilterConfig =
            serde_yaml::from_str("accel_noise: 0.5\ngravity_direction: [0.0, 0.0, -1.0]\n").unwrap();
        assert_eq!(config.accel_noise, 0.5);
        assert_eq!(config.gravity(), -Vector3::z());
        assert_eq!(config.mean_max_iterations, 10);
    }
}

use super::{
    step, symmetrize, FilterCore, FilterStatus, ImuFilterConfig, ImuState, MeasurementVector,
    OrientationFilter, StateCovariance, STATE_DIM,
};
use crate::rotation::Rotation3d;
use crate::{Matrix3, Vector3};
use nalgebra::SMatrix;
use tracing::{debug, warn};

type MeasurementJacobian = SMatrix<f64, 6, STATE_DIM>;

/// Error-state Kalman filter for IMU orientation.
///
/// The nominal state is propagated exactly; the error-state covariance is propagated with the
/// first-order transition
///
/// ```text
/// δθ' = (I − [ω]ₓ·dt)·δθ + dt·δω
/// δω' = δω
/// δb' = δb
/// ```
///
/// and corrected with the measurement Jacobian `∂(Rᵀg)/∂δθ = [Rᵀg]ₓ`, `∂gyro/∂δω = ∂gyro/∂δb = I`.
#[derive(Debug)]
pub struct ImuEskf {
    config: ImuFilterConfig,
    state: ImuState,
    covariance: StateCovariance,
    last_timestamp: Option<f64>,
}

impl Default for ImuEskf {
    fn default() -> Self {
        Self::new(ImuFilterConfig::default())
    }
}

impl ImuEskf {
    pub fn new(config: ImuFilterConfig) -> Self {
        let covariance = config.initial_covariance();
        Self {
            config,
            state: ImuState::default(),
            covariance,
            last_timestamp: None,
        }
    }

    pub fn config(&self) -> &ImuFilterConfig {
        &self.config
    }

    fn transition(&self, dt: f64) -> StateCovariance {
        let mut f = StateCovariance::identity();
        let rotation = Matrix3::identity() - self.state.angular_velocity.cross_matrix() * dt;
        f.fixed_view_mut::<3, 3>(0, 0).copy_from(&rotation);
        f.fixed_view_mut::<3, 3>(0, 3).fill_diagonal(dt);
        f
    }

    fn measurement_jacobian(&self) -> MeasurementJacobian {
        let up = self
            .state
            .rotation
            .conjugate()
            .rotate_vector(&self.config.gravity());
        let mut h = MeasurementJacobian::zeros();
        h.fixed_view_mut::<3, 3>(0, 0).copy_from(&up.cross_matrix());
        h.fixed_view_mut::<3, 3>(3, 3).fill_diagonal(1.);
        h.fixed_view_mut::<3, 3>(3, 6).fill_diagonal(1.);
        h
    }
}

impl FilterCore for ImuEskf {
    fn last_timestamp(&mut self) -> &mut Option<f64> {
        &mut self.last_timestamp
    }

    fn process_update(&mut self, dt: f64) -> Result<(), FilterStatus> {
        let f = self.transition(dt);
        self.state = self.state.predict(dt);
        self.covariance = f * self.covariance * f.transpose() + self.config.process_noise(dt);
        symmetrize(&mut self.covariance);
        Ok(())
    }

    fn measurement_update(&mut self, measurement: &MeasurementVector) -> Result<(), FilterStatus> {
        let h = self.measurement_jacobian();
        let predicted = self.state.measure(&self.config.gravity());
        let innovation_covariance =
            h * self.covariance * h.transpose() + self.config.measurement_noise();
        let Some(inverse) = innovation_covariance.try_inverse() else {
            warn!("ImuEskf.MeasurementUpdate.SingularInnovation");
            return Err(FilterStatus::SingularMatrix);
        };

        let gain = self.covariance * h.transpose() * inverse;
        let correction = gain * (measurement - predicted);
        self.state.inject(&correction);
        self.covariance = (StateCovariance::identity() - gain * h) * self.covariance;
        symmetrize(&mut self.covariance);
        Ok(())
    }
}

impl OrientationFilter for ImuEskf {
    fn reset(&mut self, rotation: Rotation3d) {
        debug!(%rotation, "ImuEskf.Reset");
        self.state = ImuState::at(rotation);
        self.covariance = self.config.initial_covariance();
        self.last_timestamp = None;
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

#[cfg(test)]
mod tests {
    use super::ImuEskf;
    use crate::filter::{FilterStatus, OrientationFilter, StateVector};
    use crate::{Rotation3d, Vector3};
    use approx::assert_relative_eq;
    use uom::si::angle::degree;
    use uom::si::f64::Angle;

    #[test]
    fn measurement_jacobian_matches_finite_differences() {
        let mut eskf = ImuEskf::default();
        eskf.reset(Rotation3d::from_axis_angle(
            Angle::new::<degree>(35.),
            &Vector3::new(1., -1., 0.5),
        ));
        let h = eskf.measurement_jacobian();
        let gravity = eskf.config().gravity();
        let base = eskf.state.measure(&gravity);

        let step = 1e-7;
        for i in 0..9 {
            let mut delta = StateVector::zeros();
            delta[i] = step;
            let mut perturbed = eskf.state;
            perturbed.inject(&delta);
            let numeric = (perturbed.measure(&gravity) - base) / step;
            assert_relative_eq!(numeric, h.column(i).into_owned(), epsilon = 1e-5);
        }
    }

    #[test]
    fn statuses() {
        let mut eskf = ImuEskf::default();
        assert_eq!(eskf.update(&Vector3::z(), &Vector3::zeros(), 0.), FilterStatus::Initialized);
        assert_eq!(eskf.update(&Vector3::z(), &Vector3::zeros(), -1.), FilterStatus::SkippedNonMonotonic);
        assert_eq!(eskf.update(&Vector3::z(), &Vector3::zeros(), 0.01), FilterStatus::Updated);
        assert_eq!(
            eskf.update(&Vector3::new(f64::INFINITY, 0., 0.), &Vector3::zeros(), 0.02),
            FilterStatus::SkippedInvalidSample
        );
    }

    #[test]
    fn tracks_constant_yaw_rate() {
        let mut eskf = ImuEskf::default();
        let rate: f64 = 0.5;
        for i in 0..=200 {
            let t = f64::from(i) * 0.01;
            eskf.update(&Vector3::z(), &Vector3::new(0., 0., rate), t);
        }
        assert_relative_eq!(eskf.angular_velocity().z + eskf.gyro_bias().z, rate, epsilon = 1e-3);
        let yaw = eskf.rotation().angle_around_z_axis().get::<degree>();
        assert_relative_eq!(yaw, 2. * rate.to_degrees(), epsilon = 3.);
    }
}

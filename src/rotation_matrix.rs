//! Orthonormal 2×2 and 3×3 rotation matrices, Euler decomposition and Rodrigues' formula.
//!
//! Rotation matrices drift away from orthonormality when multiplied together repeatedly. Every
//! constructor that accepts arbitrary input and every multiplicative update checks the row norms
//! and, if they have drifted, re-derives a valid matrix from the angle(s) the matrix encodes.

use crate::error::PoseError;
use crate::quaternion::UnitQuaternion;
use crate::rotation::AxisName;
use crate::util::{near, signed_radians};
use crate::{Matrix2, Matrix3, Point2, Point3, Vector2, Vector3};
use nalgebra::SMatrix;
use std::f64::consts::FRAC_PI_2;
use std::fmt::{self, Display, Formatter};
use std::ops::{Mul, MulAssign};
use tracing::warn;
use uom::si::angle::radian;
use uom::si::f64::Angle;

#[cfg(any(test, feature = "approx"))]
use approx::{AbsDiffEq, RelativeEq};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Row norms further than this from 1 trigger a (silent) renormalization.
const RENORMALIZE_TOLERANCE_LOW: f64 = 1e-9;

/// Row norms further than this from 1 indicate that something upstream is badly wrong.
const RENORMALIZE_TOLERANCE_HIGH: f64 = 1e-3;

/// `|R[2][0]|` this close to 1 is treated as gimbal lock.
const GIMBAL_LOCK_TOLERANCE: f64 = 1e-9;

/// Below this `sin(θ)`, Rodrigues' formula switches to its small-angle or near-π form.
const RODRIGUES_SINGULARITY_TOLERANCE: f64 = 1e-6;

/// Returns true if some row of `matrix` needs renormalizing.
///
/// Rows that are too long always need it; rows that are slightly short are tolerated up to
/// [`RENORMALIZE_TOLERANCE_LOW`]. Rows off by more than [`RENORMALIZE_TOLERANCE_HIGH`] are logged.
fn needs_renormalization<const D: usize>(matrix: &SMatrix<f64, D, D>, kind: &str) -> bool {
    let mut needed = false;
    for (row, r) in matrix.row_iter().enumerate() {
        let norm = r.norm();
        if !near(norm, 1., RENORMALIZE_TOLERANCE_HIGH) {
            warn!(kind, row, norm, "RotationMatrix.Renormalize.BadRowNorm");
        }
        if norm > 1. || !near(norm, 1., RENORMALIZE_TOLERANCE_LOW) {
            needed = true;
        }
    }
    needed
}

/// Returns true if every column of `matrix` is unit length to within `tolerance`.
fn columns_are_unit<const D: usize>(matrix: &SMatrix<f64, D, D>, tolerance: f64) -> bool {
    matrix
        .column_iter()
        .all(|c| near(c.norm(), 1., tolerance))
}

/// Converts a rotation matrix into a rotation vector (axis × angle, angle in [0, π]).
///
/// The angle comes from `atan2` of the skew-symmetric part against the trace, which is well
/// conditioned everywhere. The axis comes from the skew-symmetric part, except near π where that
/// part vanishes and the axis is instead read off the symmetric part `(R + Rᵀ)/2`.
pub(crate) fn rodrigues_matrix_to_vector(r: &Matrix3) -> Vector3 {
    let skew = Vector3::new(
        r[(2, 1)] - r[(1, 2)],
        r[(0, 2)] - r[(2, 0)],
        r[(1, 0)] - r[(0, 1)],
    );
    let sin_angle = 0.5 * skew.norm();
    let cos_angle = (0.5 * (r.trace() - 1.)).clamp(-1., 1.);
    let angle = sin_angle.atan2(cos_angle);

    if sin_angle >= RODRIGUES_SINGULARITY_TOLERANCE {
        return skew * (angle / (2. * sin_angle));
    }
    if cos_angle > 0. {
        // sin(θ) ≈ θ
        return 0.5 * skew;
    }

    // near π: (R + Rᵀ)/2 = cos(θ)·I + (1 − cos(θ))·aaᵀ
    let outer = ((r + r.transpose()) * 0.5 - Matrix3::identity() * cos_angle) / (1. - cos_angle);
    let (best, _) = (0..3).fold((0, f64::MIN), |(best, max), i| {
        if outer[(i, i)] > max {
            (i, outer[(i, i)])
        } else {
            (best, max)
        }
    });
    let mut axis = outer.column(best).into_owned();
    let length = axis.norm();
    if length == 0. {
        return Vector3::zeros();
    }
    axis /= length;
    // the symmetric part cannot tell a from -a; the (tiny) skew part still can
    if axis.dot(&skew) < 0. {
        axis = -axis;
    }
    axis * angle
}

/// Converts a rotation vector into a rotation matrix: `R = I + sin(θ)·K + (1 − cos(θ))·K²`.
pub(crate) fn rodrigues_vector_to_matrix(v: &Vector3) -> Matrix3 {
    let angle = v.norm();
    if angle == 0. {
        return Matrix3::identity();
    }
    let k = (v / angle).cross_matrix();
    Matrix3::identity() + k * angle.sin() + k * k * (1. - angle.cos())
}

/// The Euler angles of a rotation, applied as `R = Rz(z) · Ry(y) · Rx(x)`.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EulerAngles {
    pub x: Angle,
    pub y: Angle,
    pub z: Angle,
}

/// Both Euler decompositions of a rotation matrix.
///
/// Away from gimbal lock every rotation has exactly two `(x, y, z)` decompositions with
/// `y ∈ [-π/2, π/2]` and `y ∈ [π/2, 3π/2]` respectively. At gimbal lock (`y = ±π/2`) there are
/// infinitely many; `z` is fixed to 0 and `alternate == primary`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EulerDecomposition {
    pub primary: EulerAngles,
    pub alternate: EulerAngles,
    pub gimbal_lock: bool,
}

/// A 3×3 orthonormal matrix.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct RotationMatrix3d {
    inner: Matrix3,
}

impl Default for RotationMatrix3d {
    fn default() -> Self {
        Self::identity()
    }
}

impl RotationMatrix3d {
    #[must_use]
    pub fn identity() -> Self {
        Self {
            inner: Matrix3::identity(),
        }
    }

    /// Wraps `matrix`, renormalizing it if its rows are not unit length.
    pub fn from_matrix(matrix: Matrix3) -> Self {
        let mut m = Self { inner: matrix };
        m.renormalize();
        m
    }

    /// Wraps a matrix that is orthonormal by construction.
    pub(crate) fn from_matrix_unchecked(matrix: Matrix3) -> Self {
        Self { inner: matrix }
    }

    pub fn from_axis_angle(angle: impl Into<Angle>, axis: &Vector3) -> Self {
        let rotation_vector = crate::RotationVector3d::new(angle, *axis);
        Self::from_rotation_vector(&rotation_vector.to_vector())
    }

    pub fn from_rotation_vector(rotation_vector: &Vector3) -> Self {
        Self {
            inner: rodrigues_vector_to_matrix(rotation_vector),
        }
    }

    pub fn from_quaternion(q: &UnitQuaternion) -> Self {
        let [w, x, y, z] = q.to_array();
        let (xx, yy, zz) = (x * x, y * y, z * z);
        let (xy, xz, yz) = (x * y, x * z, y * z);
        let (wx, wy, wz) = (w * x, w * y, w * z);
        Self::from_matrix(Matrix3::new(
            1. - 2. * (yy + zz),
            2. * (xy - wz),
            2. * (xz + wy),
            2. * (xy + wz),
            1. - 2. * (xx + zz),
            2. * (yz - wx),
            2. * (xz - wy),
            2. * (yz + wx),
            1. - 2. * (xx + yy),
        ))
    }

    /// Constructs `Rz(z) · Ry(y) · Rx(x)`.
    pub fn from_euler_angles(
        x: impl Into<Angle>,
        y: impl Into<Angle>,
        z: impl Into<Angle>,
    ) -> Self {
        let (sx, cx) = x.into().get::<radian>().sin_cos();
        let (sy, cy) = y.into().get::<radian>().sin_cos();
        let (sz, cz) = z.into().get::<radian>().sin_cos();
        Self::from_matrix(Matrix3::new(
            cy * cz,
            sx * sy * cz - cx * sz,
            cx * sy * cz + sx * sz,
            cy * sz,
            sx * sy * sz + cx * cz,
            cx * sy * sz - sx * cz,
            -sy,
            sx * cy,
            cx * cy,
        ))
    }

    /// Decomposes into `Rz(z) · Ry(y) · Rx(x)`.
    pub fn euler_angles(&self) -> EulerDecomposition {
        let r = &self.inner;
        let r20 = r[(2, 0)];

        if near(r20.abs(), 1., GIMBAL_LOCK_TOLERANCE) {
            let (x, y) = if r20 > 0. {
                ((-r[(0, 1)]).atan2(-r[(0, 2)]), -FRAC_PI_2)
            } else {
                (r[(0, 1)].atan2(r[(0, 2)]), FRAC_PI_2)
            };
            let angles = EulerAngles {
                x: signed_radians(x),
                y: Angle::new::<radian>(y),
                z: Angle::new::<radian>(0.),
            };
            return EulerDecomposition {
                primary: angles,
                alternate: angles,
                gimbal_lock: true,
            };
        }

        let decompose = |y: f64| {
            let cy = y.cos();
            EulerAngles {
                x: signed_radians((r[(2, 1)] / cy).atan2(r[(2, 2)] / cy)),
                y: signed_radians(y),
                z: signed_radians((r[(1, 0)] / cy).atan2(r[(0, 0)] / cy)),
            }
        };
        let y = -r20.clamp(-1., 1.).asin();
        EulerDecomposition {
            primary: decompose(y),
            alternate: decompose(std::f64::consts::PI - y),
            gimbal_lock: false,
        }
    }

    pub fn matrix(&self) -> &Matrix3 {
        &self.inner
    }

    pub fn get(&self, row: usize, col: usize) -> Result<f64, PoseError> {
        self.inner
            .get((row, col))
            .copied()
            .ok_or(PoseError::IndexOutOfRange { row, col })
    }

    /// The rotation angle in [0, π], ie, `acos((trace − 1)/2)`.
    pub fn angle(&self) -> Angle {
        Angle::new::<radian>((0.5 * (self.inner.trace() - 1.)).clamp(-1., 1.).acos())
    }

    /// The angle of the rotation that takes `other` to `self`.
    pub fn angle_diff_from(&self, other: &RotationMatrix3d) -> Angle {
        Self::from_matrix_unchecked(self.inner * other.inner.transpose()).angle()
    }

    /// See [`Rotation3d::angle_around_axis`](crate::Rotation3d::angle_around_axis).
    pub fn angle_around_axis(&self, axis: AxisName) -> Angle {
        crate::Rotation3d::from_rotation_matrix(self).angle_around_axis(axis)
    }

    /// Replaces every entry by its absolute value.
    ///
    /// The result is generally _not_ a rotation; it is used to compare rotations modulo sign
    /// flips of the axes.
    pub fn abs(&self) -> Matrix3 {
        self.inner.abs()
    }

    /// Returns true if every column is unit length to within `tolerance`.
    pub fn is_valid(&self, tolerance: f64) -> bool {
        columns_are_unit(&self.inner, tolerance)
    }

    /// Re-derives an orthonormal matrix via the rotation vector if the rows have drifted.
    pub fn renormalize(&mut self) {
        if needs_renormalization(&self.inner, "RotationMatrix3d") {
            self.inner = rodrigues_vector_to_matrix(&rodrigues_matrix_to_vector(&self.inner));
        }
    }

    pub fn transpose(&self) -> Self {
        Self::from_matrix_unchecked(self.inner.transpose())
    }

    /// The inverse, which for a rotation is the transpose.
    #[must_use]
    pub fn inverse(&self) -> Self {
        self.transpose()
    }

    pub fn invert(&mut self) {
        self.inner.transpose_mut();
    }

    /// Replaces `self` with `other * self`.
    pub fn pre_multiply_by(&mut self, other: &RotationMatrix3d) {
        self.inner = other.inner * self.inner;
        self.renormalize();
    }
}

impl MulAssign<RotationMatrix3d> for RotationMatrix3d {
    fn mul_assign(&mut self, rhs: RotationMatrix3d) {
        self.inner *= rhs.inner;
        self.renormalize();
    }
}

impl Mul<RotationMatrix3d> for RotationMatrix3d {
    type Output = RotationMatrix3d;

    fn mul(mut self, rhs: RotationMatrix3d) -> Self::Output {
        self *= rhs;
        self
    }
}

impl Mul<Vector3> for RotationMatrix3d {
    type Output = Vector3;

    fn mul(self, rhs: Vector3) -> Self::Output {
        self.inner * rhs
    }
}

impl Mul<Point3> for RotationMatrix3d {
    type Output = Point3;

    fn mul(self, rhs: Point3) -> Self::Output {
        self.inner * rhs
    }
}

impl From<crate::Rotation3d> for RotationMatrix3d {
    fn from(rotation: crate::Rotation3d) -> Self {
        rotation.rotation_matrix()
    }
}

impl Display for RotationMatrix3d {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let m = &self.inner;
        write!(
            f,
            "[{}, {}, {}; {}, {}, {}; {}, {}, {}]",
            m[(0, 0)],
            m[(0, 1)],
            m[(0, 2)],
            m[(1, 0)],
            m[(1, 1)],
            m[(1, 2)],
            m[(2, 0)],
            m[(2, 1)],
            m[(2, 2)]
        )
    }
}

/// A 2×2 orthonormal matrix, ie, a rotation in the plane.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct RotationMatrix2d {
    inner: Matrix2,
}

impl Default for RotationMatrix2d {
    fn default() -> Self {
        Self::identity()
    }
}

impl RotationMatrix2d {
    #[must_use]
    pub fn identity() -> Self {
        Self {
            inner: Matrix2::identity(),
        }
    }

    /// The counter-clockwise rotation by `angle`.
    pub fn from_angle(angle: impl Into<Angle>) -> Self {
        let (s, c) = angle.into().get::<radian>().sin_cos();
        Self {
            inner: Matrix2::new(c, -s, s, c),
        }
    }

    /// Wraps `matrix`, renormalizing it if its rows are not unit length.
    pub fn from_matrix(matrix: Matrix2) -> Self {
        let mut m = Self { inner: matrix };
        m.renormalize();
        m
    }

    /// The rotation angle in (-π, π].
    pub fn angle(&self) -> Angle {
        signed_radians(self.inner[(1, 0)].atan2(self.inner[(0, 0)]))
    }

    pub fn matrix(&self) -> &Matrix2 {
        &self.inner
    }

    pub fn get(&self, row: usize, col: usize) -> Result<f64, PoseError> {
        self.inner
            .get((row, col))
            .copied()
            .ok_or(PoseError::IndexOutOfRange { row, col })
    }

    pub fn is_valid(&self, tolerance: f64) -> bool {
        columns_are_unit(&self.inner, tolerance)
    }

    /// Re-derives an orthonormal matrix from the encoded angle if the rows have drifted.
    pub fn renormalize(&mut self) {
        if needs_renormalization(&self.inner, "RotationMatrix2d") {
            *self = Self::from_angle(self.angle());
        }
    }

    #[must_use]
    pub fn inverse(&self) -> Self {
        Self {
            inner: self.inner.transpose(),
        }
    }

    pub fn invert(&mut self) {
        self.inner.transpose_mut();
    }

    pub fn pre_multiply_by(&mut self, other: &RotationMatrix2d) {
        self.inner = other.inner * self.inner;
        self.renormalize();
    }
}

impl MulAssign<RotationMatrix2d> for RotationMatrix2d {
    fn mul_assign(&mut self, rhs: RotationMatrix2d) {
        self.inner *= rhs.inner;
        self.renormalize();
    }
}

impl Mul<RotationMatrix2d> for RotationMatrix2d {
    type Output = RotationMatrix2d;

    fn mul(mut self, rhs: RotationMatrix2d) -> Self::Output {
        self *= rhs;
        self
    }
}

impl Mul<Vector2> for RotationMatrix2d {
    type Output = Vector2;

    fn mul(self, rhs: Vector2) -> Self::Output {
        self.inner * rhs
    }
}

impl Mul<Point2> for RotationMatrix2d {
    type Output = Point2;

    fn mul(self, rhs: Point2) -> Self::Output {
        self.inner * rhs
    }
}

#[cfg(any(test, feature = "approx"))]
impl AbsDiffEq<Self> for RotationMatrix3d {
    type Epsilon = f64;

    fn default_epsilon() -> Self::Epsilon {
        1e-9
    }

    fn abs_diff_eq(&self, other: &Self, epsilon: Self::Epsilon) -> bool {
        self.inner.abs_diff_eq(&other.inner, epsilon)
    }
}

#[cfg(any(test, feature = "approx"))]
impl RelativeEq for RotationMatrix3d {
    fn default_max_relative() -> Self::Epsilon {
        Matrix3::default_max_relative()
    }

    fn relative_eq(
        &self,
        other: &Self,
        epsilon: Self::Epsilon,
        max_relative: Self::Epsilon,
    ) -> bool {
        self.inner.relative_eq(&other.inner, epsilon, max_relative)
    }
}

#[cfg(any(test, feature = "approx"))]
impl AbsDiffEq<Self> for RotationMatrix2d {
    type Epsilon = f64;

    fn default_epsilon() -> Self::Epsilon {
        1e-9
    }

    fn abs_diff_eq(&self, other: &Self, epsilon: Self::Epsilon) -> bool {
        self.inner.abs_diff_eq(&other.inner, epsilon)
    }
}

#[cfg(any(test, feature = "approx"))]
impl RelativeEq for RotationMatrix2d {
    fn default_max_relative() -> Self::Epsilon {
        Matrix2::default_max_relative()
    }

    fn relative_eq(
        &self,
        other: &Self,
        epsilon: Self::Epsilon,
        max_relative: Self::Epsilon,
    ) -> bool {
        self.inner.relative_eq(&other.inner, epsilon, max_relative)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        rodrigues_matrix_to_vector, rodrigues_vector_to_matrix, RotationMatrix2d,
        RotationMatrix3d,
    };
    use crate::error::PoseError;
    use crate::util::BoundedAngle;
    use crate::{Matrix2, Matrix3, Point2, Point3, Rotation3d, Vector2, Vector3};
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use rstest::rstest;
    use std::f64::consts::{FRAC_PI_2, PI};
    use uom::si::angle::{degree, radian};
    use uom::si::f64::Angle;

    fn d(degrees: f64) -> Angle {
        Angle::new::<degree>(degrees)
    }

    #[test]
    fn ninety_degrees_about_x_takes_y_to_z() {
        let r = RotationMatrix3d::from_axis_angle(d(90.), &Vector3::x());
        assert_relative_eq!(r * Point3::new(0., 1., 0.), Point3::new(0., 0., 1.), epsilon = 1e-6);
    }

    #[rstest]
    #[case(Vector3::x())]
    #[case(Vector3::y())]
    #[case(Vector3::z())]
    #[case(Vector3::new(1., 2., 3.).normalize())]
    fn transpose_is_inverse_is_negated_angle(#[case] axis: Vector3) {
        for degrees in [-170., -45., 0., 10., 90., 179.] {
            let r = RotationMatrix3d::from_axis_angle(d(degrees), &axis);
            let negated = RotationMatrix3d::from_axis_angle(d(-degrees), &axis);
            assert_relative_eq!(r.transpose(), r.inverse());
            assert_relative_eq!(r.inverse(), negated, epsilon = 1e-12);
            let mut inverted = r;
            inverted.invert();
            assert_eq!(inverted, r.transpose());
        }
    }

    #[test]
    fn matrix_agrees_with_quaternion() {
        let axis = Vector3::new(-1., 0.5, 2.).normalize();
        let q = Rotation3d::from_axis_angle(d(77.), &axis);
        let m = RotationMatrix3d::from_axis_angle(d(77.), &axis);
        assert_relative_eq!(q.rotation_matrix(), m, epsilon = 1e-12);
        let v = Vector3::new(0.3, -4., 1.);
        assert_relative_eq!(q * v, m * v, epsilon = 1e-12);
    }

    #[test]
    fn out_of_range_entry_is_an_error() {
        let r = RotationMatrix3d::identity();
        assert_eq!(r.get(2, 2), Ok(1.));
        assert_eq!(r.get(0, 3), Err(PoseError::IndexOutOfRange { row: 0, col: 3 }));
        assert_eq!(
            RotationMatrix2d::identity().get(2, 0),
            Err(PoseError::IndexOutOfRange { row: 2, col: 0 })
        );
    }

    #[test]
    fn drifted_matrix_is_renormalized_on_construction() {
        let good = RotationMatrix3d::from_axis_angle(d(33.), &Vector3::y());
        let drifted = RotationMatrix3d::from_matrix(good.matrix() * (1. + 1e-7));
        assert!(drifted.is_valid(1e-12));
        assert_relative_eq!(drifted, good, epsilon = 1e-6);
    }

    #[test]
    fn repeated_multiplication_stays_valid() {
        let step = RotationMatrix3d::from_axis_angle(d(0.1), &Vector3::new(1., 1., 1.).normalize());
        let mut r = RotationMatrix3d::identity();
        for _ in 0..3600 {
            r *= step;
        }
        assert!(r.is_valid(1e-8));
        assert_relative_eq!(r.angle().get::<radian>(), 0., epsilon = 1e-5);
    }

    #[test]
    fn pre_multiply_applies_other_after_self() {
        let about_z = RotationMatrix3d::from_axis_angle(d(90.), &Vector3::z());
        let about_x = RotationMatrix3d::from_axis_angle(d(90.), &Vector3::x());
        let mut r = about_z;
        r.pre_multiply_by(&about_x);
        assert_relative_eq!(r * Vector3::x(), Vector3::z(), epsilon = 1e-12);
    }

    #[test]
    fn angle_diff_between_matrices() {
        let a = RotationMatrix3d::from_axis_angle(d(20.), &Vector3::z());
        let b = RotationMatrix3d::from_axis_angle(d(-15.), &Vector3::z());
        assert_relative_eq!(
            a.angle_diff_from(&b).get::<radian>(),
            35f64.to_radians(),
            epsilon = 1e-9
        );
    }

    #[rstest]
    #[case(0.)]
    #[case(1e-9)]
    #[case(0.3)]
    #[case(FRAC_PI_2)]
    #[case(PI - 1e-4)]
    #[case(PI - 1e-9)]
    fn rodrigues_roundtrip_including_singularities(#[case] angle: f64) {
        let axis = Vector3::new(2., -1., 0.5).normalize();
        let v = axis * angle;
        let back = rodrigues_matrix_to_vector(&rodrigues_vector_to_matrix(&v));
        assert_relative_eq!(back, v, epsilon = 1e-6);
    }

    #[test]
    fn rodrigues_at_exactly_pi_recovers_the_rotation() {
        // at π the axis sign is arbitrary, so compare the rotations rather than the vectors
        let v = Vector3::new(0., 3., 4.).normalize() * PI;
        let m = rodrigues_vector_to_matrix(&v);
        let back = rodrigues_matrix_to_vector(&m);
        assert_relative_eq!(back.norm(), PI, epsilon = 1e-9);
        assert_relative_eq!(rodrigues_vector_to_matrix(&back), m, epsilon = 1e-9);
    }

    #[rstest]
    #[case(10., 20., 30.)]
    #[case(-80., 45., 170.)]
    #[case(0., -30., -90.)]
    fn euler_angles_roundtrip(#[case] x: f64, #[case] y: f64, #[case] z: f64) {
        let r = RotationMatrix3d::from_euler_angles(d(x), d(y), d(z));
        let decomposition = r.euler_angles();
        assert!(!decomposition.gimbal_lock);
        let primary = decomposition.primary;
        assert_abs_diff_eq!(BoundedAngle::new(primary.x), BoundedAngle::new(d(x)), epsilon = 1e-9);
        assert_abs_diff_eq!(BoundedAngle::new(primary.y), BoundedAngle::new(d(y)), epsilon = 1e-9);
        assert_abs_diff_eq!(BoundedAngle::new(primary.z), BoundedAngle::new(d(z)), epsilon = 1e-9);

        // the alternate is a different decomposition of the same matrix
        let alternate = decomposition.alternate;
        let rebuilt = RotationMatrix3d::from_euler_angles(alternate.x, alternate.y, alternate.z);
        assert_relative_eq!(rebuilt, r, epsilon = 1e-9);
    }

    #[rstest]
    #[case(90.)]
    #[case(-90.)]
    fn euler_angles_at_gimbal_lock(#[case] y: f64) {
        let r = RotationMatrix3d::from_euler_angles(d(25.), d(y), d(0.));
        let decomposition = r.euler_angles();
        assert!(decomposition.gimbal_lock);
        assert_eq!(decomposition.primary, decomposition.alternate);
        assert_eq!(decomposition.primary.z.get::<radian>(), 0.);
        let p = decomposition.primary;
        assert_relative_eq!(
            RotationMatrix3d::from_euler_angles(p.x, p.y, p.z),
            r,
            epsilon = 1e-6
        );
    }

    #[test]
    fn two_d_rotation_by_angle() {
        let r = RotationMatrix2d::from_angle(d(90.));
        assert_relative_eq!(r * Point2::new(1., 0.), Point2::new(0., 1.), epsilon = 1e-12);
        assert_relative_eq!(r.angle().get::<radian>(), FRAC_PI_2, epsilon = 1e-12);
        assert_relative_eq!(r.inverse() * r, RotationMatrix2d::identity(), epsilon = 1e-12);
        assert_relative_eq!(
            r.inverse() * Vector2::new(0., 2.),
            Vector2::new(2., 0.),
            epsilon = 1e-12
        );
    }

    #[test]
    fn two_d_renormalizes_through_angle() {
        let good = RotationMatrix2d::from_angle(d(-120.));
        let drifted = RotationMatrix2d::from_matrix(good.matrix() * 0.999);
        assert!(drifted.is_valid(1e-12));
        assert_relative_eq!(drifted, good, epsilon = 1e-12);
        assert!(!RotationMatrix2d::from_matrix(Matrix2::identity() * 0.5)
            .matrix()
            .iter()
            .any(|e| e.is_nan()));
    }

    #[test]
    fn abs_takes_entrywise_absolute_value() {
        let r = RotationMatrix3d::from_axis_angle(d(180.), &Vector3::z());
        assert_relative_eq!(r.abs(), Matrix3::new(1., 0., 0., 0., 1., 0., 0., 0., 1.), epsilon = 1e-12);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn serializes_as_plain_matrix() {
        let r = RotationMatrix3d::from_axis_angle(d(90.), &Vector3::z());
        let yaml = serde_yaml::to_string(&r).unwrap();
        let back: RotationMatrix3d = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, r);
    }
}

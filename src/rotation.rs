//! Quaternion-backed 3D rotations and the axis-angle representation.

use crate::error::PoseError;
use crate::quaternion::UnitQuaternion;
use crate::rotation_matrix::{rodrigues_matrix_to_vector, RotationMatrix3d};
use crate::util::{near, signed_radians};
use crate::{Point3, Vector3};
use std::fmt::{self, Display, Formatter};
use std::ops::{Mul, MulAssign, Neg};
use tracing::warn;
use uom::si::angle::radian;
use uom::si::f64::Angle;

#[cfg(any(test, feature = "approx"))]
use approx::{AbsDiffEq, RelativeEq};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Tolerance on `|axis|` before a supplied rotation axis is reported as not unit length.
const AXIS_UNIT_LENGTH_TOLERANCE: f64 = 1e-6;

/// One of the six signed Cartesian axes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AxisName {
    XNeg,
    XPos,
    YNeg,
    YPos,
    ZNeg,
    ZPos,
}

impl AxisName {
    /// The unit vector pointing along this axis.
    pub fn unit_vector(self) -> Vector3 {
        match self {
            AxisName::XNeg => -Vector3::x(),
            AxisName::XPos => Vector3::x(),
            AxisName::YNeg => -Vector3::y(),
            AxisName::YPos => Vector3::y(),
            AxisName::ZNeg => -Vector3::z(),
            AxisName::ZPos => Vector3::z(),
        }
    }
}

/// A rotation expressed as an angle about a unit axis.
///
/// The zero rotation has no meaningful axis; by convention it is stored with the +X axis.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RotationVector3d {
    angle: f64,
    axis: Vector3,
}

impl Default for RotationVector3d {
    fn default() -> Self {
        Self {
            angle: 0.,
            axis: Vector3::x(),
        }
    }
}

impl RotationVector3d {
    /// Constructs the rotation of `angle` about `axis`.
    ///
    /// The axis is normalized. An axis that was not (nearly) unit length to begin with is almost
    /// always a bug on the caller's side and is logged. A zero angle with a zero axis is the
    /// identity; a zero axis with a non-zero angle has no direction to rotate about and is also
    /// treated as the identity (and logged).
    pub fn new(angle: impl Into<Angle>, axis: Vector3) -> Self {
        let angle = angle.into().get::<radian>();
        let length = axis.norm();

        if length == 0. {
            if angle != 0. {
                warn!(angle, "RotationVector3d.New.ZeroAxis");
            }
            return Self::default();
        }
        if !near(length, 1., AXIS_UNIT_LENGTH_TOLERANCE) {
            warn!(length, "RotationVector3d.New.AxisNotUnitLength");
        }

        Self {
            angle,
            axis: axis / length,
        }
    }

    /// Constructs a rotation from a vector whose direction is the axis and whose length is the
    /// angle in radians.
    pub fn from_vector(rotation_vector: &Vector3) -> Self {
        let angle = rotation_vector.norm();
        if angle == 0. {
            return Self::default();
        }
        Self {
            angle,
            axis: rotation_vector / angle,
        }
    }

    /// Extracts the axis and angle of a rotation matrix via Rodrigues' formula.
    pub fn from_rotation_matrix(matrix: &RotationMatrix3d) -> Self {
        Self::from_vector(&rodrigues_matrix_to_vector(matrix.matrix()))
    }

    pub fn angle(&self) -> Angle {
        Angle::new::<radian>(self.angle)
    }

    /// The unit rotation axis.
    pub fn axis(&self) -> Vector3 {
        self.axis
    }

    /// Returns `axis * angle`.
    pub fn to_vector(&self) -> Vector3 {
        self.axis * self.angle
    }
}

impl PartialEq for RotationVector3d {
    /// Exact equality that understands `(axis, angle) == (-axis, -angle)` and that all zero
    /// rotations are the same regardless of axis.
    fn eq(&self, other: &Self) -> bool {
        (self.axis == other.axis && self.angle == other.angle)
            || (-self.axis == other.axis && -self.angle == other.angle)
            || (self.angle == 0. && other.angle == 0.)
    }
}

/// A 3D rotation, stored as a [`UnitQuaternion`].
///
/// This is the canonical rotation type of the crate: [`Transform3d`](crate::Transform3d) and
/// [`Pose3d`](crate::Pose3d) store their rotation as a `Rotation3d`. It can be viewed as a
/// [`RotationMatrix3d`] or a [`RotationVector3d`] when those are more convenient.
///
/// Composition follows the usual matrix convention: `(a * b) * p == a * (b * p)`, ie, `b` is
/// applied first.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct Rotation3d {
    q: UnitQuaternion,
}

impl Rotation3d {
    #[must_use]
    pub fn identity() -> Self {
        Self {
            q: UnitQuaternion::identity(),
        }
    }

    /// Constructs the rotation of `angle` about the (unit) `axis`.
    ///
    /// Non-unit axes are normalized and logged; see [`RotationVector3d::new`].
    pub fn from_axis_angle(angle: impl Into<Angle>, axis: &Vector3) -> Self {
        Self::from_rotation_vector(&RotationVector3d::new(angle, *axis))
    }

    pub fn from_rotation_vector(rotation_vector: &RotationVector3d) -> Self {
        let half = 0.5 * rotation_vector.angle;
        let s = half.sin();
        let axis = rotation_vector.axis;
        Self {
            q: UnitQuaternion::from_unit_components(half.cos(), s * axis.x, s * axis.y, s * axis.z),
        }
    }

    pub fn from_rotation_matrix(matrix: &RotationMatrix3d) -> Self {
        Self::from_rotation_vector(&RotationVector3d::from_rotation_matrix(matrix))
    }

    pub fn from_quaternion(q: UnitQuaternion) -> Self {
        Self { q }
    }

    pub fn quaternion(&self) -> &UnitQuaternion {
        &self.q
    }

    /// The rotation angle in [0, 2π], ie, `2·acos(w)`.
    pub fn angle(&self) -> Angle {
        Angle::new::<radian>(2. * self.q.w().clamp(-1., 1.).acos())
    }

    /// The unit rotation axis. For the identity rotation any axis is valid; +Z is returned.
    pub fn axis(&self) -> Vector3 {
        let axis = self.q.vector_part();
        let length = axis.norm();
        if length < f64::EPSILON {
            return Vector3::z();
        }
        axis / length
    }

    pub fn rotation_vector(&self) -> RotationVector3d {
        RotationVector3d::new(self.angle(), self.axis())
    }

    pub fn rotation_matrix(&self) -> RotationMatrix3d {
        RotationMatrix3d::from_quaternion(&self.q)
    }

    /// One entry of the equivalent rotation matrix, computed directly from the quaternion.
    pub fn rotation_matrix_entry(&self, row: usize, col: usize) -> Result<f64, PoseError> {
        let [w, x, y, z] = self.q.to_array();
        let entry = match (row, col) {
            (0, 0) => 1. - 2. * (y * y + z * z),
            (0, 1) => 2. * (x * y - z * w),
            (0, 2) => 2. * (x * z + y * w),
            (1, 0) => 2. * (x * y + z * w),
            (1, 1) => 1. - 2. * (x * x + z * z),
            (1, 2) => 2. * (y * z - x * w),
            (2, 0) => 2. * (x * z - y * w),
            (2, 1) => 2. * (y * z + x * w),
            (2, 2) => 1. - 2. * (x * x + y * y),
            _ => return Err(PoseError::IndexOutOfRange { row, col }),
        };
        Ok(entry)
    }

    fn entry(&self, row: usize, col: usize) -> f64 {
        // only ever called with literal in-range indices below
        self.rotation_matrix_entry(row, col).unwrap_or(0.)
    }

    /// The rotation angle about the X axis, in (-π, π].
    ///
    /// Looks at where the rotation sends the Y and Z axes and uses whichever of the two projected
    /// vectors is longer, since `atan2` is poorly conditioned for short vectors.
    pub fn angle_around_x_axis(&self) -> Angle {
        let (r11, r21) = (self.entry(1, 1), self.entry(2, 1));
        let (r12, r22) = (self.entry(1, 2), self.entry(2, 2));
        angle_from_best_projection((r21, r11), (-r12, r22))
    }

    /// The rotation angle about the Y axis, in (-π, π].
    pub fn angle_around_y_axis(&self) -> Angle {
        let (r00, r20) = (self.entry(0, 0), self.entry(2, 0));
        let (r02, r22) = (self.entry(0, 2), self.entry(2, 2));
        angle_from_best_projection((-r20, r00), (r02, r22))
    }

    /// The rotation angle about the Z axis, in (-π, π].
    pub fn angle_around_z_axis(&self) -> Angle {
        let (r00, r10) = (self.entry(0, 0), self.entry(1, 0));
        let (r01, r11) = (self.entry(0, 1), self.entry(1, 1));
        angle_from_best_projection((r10, r00), (-r01, r11))
    }

    /// The rotation angle about a signed axis; the negative axes negate the angle.
    pub fn angle_around_axis(&self, axis: AxisName) -> Angle {
        match axis {
            AxisName::XNeg => -self.angle_around_x_axis(),
            AxisName::XPos => self.angle_around_x_axis(),
            AxisName::YNeg => -self.angle_around_y_axis(),
            AxisName::YPos => self.angle_around_y_axis(),
            AxisName::ZNeg => -self.angle_around_z_axis(),
            AxisName::ZPos => self.angle_around_z_axis(),
        }
    }

    /// The (principal) angle of the rotation that takes `other` to `self`, in [0, π].
    ///
    /// For unit quaternions, `cos(θ) = 2⟨q₁, q₂⟩² − 1`, which sidesteps the `q`/`−q` ambiguity.
    /// The inner product is clamped so that rounding can never push `acos` out of its domain.
    pub fn angle_diff_from(&self, other: &Rotation3d) -> Angle {
        // near-identical quaternions can produce a tiny non-zero angle from rounding alone
        if self.q == other.q {
            return Angle::new::<radian>(0.);
        }
        let inner = self.q.dot(&other.q).clamp(-1., 1.);
        Angle::new::<radian>((2. * inner * inner - 1.).clamp(-1., 1.).acos())
    }

    /// Inverts in place (conjugates the quaternion).
    pub fn invert(&mut self) {
        self.q.conjugate_mut();
    }

    #[must_use]
    pub fn inverse(&self) -> Self {
        Self {
            q: self.q.conjugate(),
        }
    }

    /// Replaces `self` with `other * self`, ie, applies `other` after `self`.
    pub fn pre_multiply_by(&mut self, other: &Rotation3d) {
        self.q = other.q * self.q;
    }

    pub fn rotate_vector(&self, v: &Vector3) -> Vector3 {
        self.q.rotate_vector(v)
    }

    /// Tolerance-based equality that treats `q` and `-q` as the same rotation.
    pub fn is_nearly_equal(&self, other: &Rotation3d, tolerance: f64) -> bool {
        let q = other.q;
        self.q.is_nearly_equal(&q, tolerance)
            || self.q.is_nearly_equal(
                &UnitQuaternion::from_unit_components(-q.w(), -q.x(), -q.y(), -q.z()),
                tolerance,
            )
    }
}

/// Picks the `(sin, cos)` pair with the larger magnitude and returns its `atan2`.
fn angle_from_best_projection(first: (f64, f64), second: (f64, f64)) -> Angle {
    let magnitude = |(s, c): (f64, f64)| s * s + c * c;
    let (s, c) = if magnitude(first) > magnitude(second) {
        first
    } else {
        second
    };
    signed_radians(s.atan2(c))
}

impl From<RotationMatrix3d> for Rotation3d {
    fn from(matrix: RotationMatrix3d) -> Self {
        Self::from_rotation_matrix(&matrix)
    }
}

impl From<RotationVector3d> for Rotation3d {
    fn from(rotation_vector: RotationVector3d) -> Self {
        Self::from_rotation_vector(&rotation_vector)
    }
}

impl From<UnitQuaternion> for Rotation3d {
    fn from(q: UnitQuaternion) -> Self {
        Self { q }
    }
}

impl MulAssign<Rotation3d> for Rotation3d {
    fn mul_assign(&mut self, rhs: Rotation3d) {
        self.q *= rhs.q;
    }
}

impl Mul<Rotation3d> for Rotation3d {
    type Output = Rotation3d;

    fn mul(mut self, rhs: Rotation3d) -> Self::Output {
        self *= rhs;
        self
    }
}

impl Mul<Vector3> for Rotation3d {
    type Output = Vector3;

    fn mul(self, rhs: Vector3) -> Self::Output {
        self.q.rotate_vector(&rhs)
    }
}

impl Mul<Point3> for Rotation3d {
    type Output = Point3;

    fn mul(self, rhs: Point3) -> Self::Output {
        Point3::from(self.q.rotate_vector(&rhs.coords))
    }
}

impl Neg for Rotation3d {
    type Output = Self;

    fn neg(self) -> Self::Output {
        self.inverse()
    }
}

impl Display for Rotation3d {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Quaternion: {}", self.q)
    }
}

#[cfg(any(test, feature = "approx"))]
impl AbsDiffEq<Self> for Rotation3d {
    type Epsilon = f64;

    fn default_epsilon() -> Self::Epsilon {
        1e-9
    }

    /// Compares by angular distance (in radians), so `q` and `-q` compare equal.
    fn abs_diff_eq(&self, other: &Self, epsilon: Self::Epsilon) -> bool {
        self.angle_diff_from(other).get::<radian>() <= epsilon
    }
}

#[cfg(any(test, feature = "approx"))]
impl RelativeEq for Rotation3d {
    fn default_max_relative() -> Self::Epsilon {
        f64::default_max_relative()
    }

    fn relative_eq(
        &self,
        other: &Self,
        epsilon: Self::Epsilon,
        _max_relative: Self::Epsilon,
    ) -> bool {
        // angular distance has no meaningful relative scale
        self.abs_diff_eq(other, epsilon)
    }
}

#[cfg(test)]
mod tests {
    use super::{AxisName, Rotation3d, RotationVector3d};
    use crate::error::PoseError;
    use crate::rotation_matrix::RotationMatrix3d;
    use crate::util::BoundedAngle;
    use crate::{Point3, Vector3};
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use quickcheck::{quickcheck, Arbitrary, Gen};
    use rstest::rstest;
    use uom::si::angle::{degree, radian};
    use uom::si::f64::Angle;

    fn d(degrees: f64) -> Angle {
        Angle::new::<degree>(degrees)
    }

    fn rad(angle: Angle) -> f64 {
        angle.get::<radian>()
    }

    #[test]
    fn rotation_vector_defaults_to_x_axis_for_zero_vector() {
        let rv = RotationVector3d::from_vector(&Vector3::zeros());
        assert_eq!(rv.axis(), Vector3::x());
        assert_eq!(rad(rv.angle()), 0.);
    }

    #[test]
    fn rotation_vector_normalizes_axis() {
        let rv = RotationVector3d::new(d(10.), Vector3::new(0., 0., 2.));
        assert_relative_eq!(rv.axis(), Vector3::z());
    }

    #[test]
    fn rotation_vector_equality_accepts_flipped_axis_and_angle() {
        let a = RotationVector3d::new(d(30.), Vector3::y());
        let b = RotationVector3d::new(d(-30.), -Vector3::y());
        assert_eq!(a, b);
        assert_eq!(
            RotationVector3d::new(d(0.), Vector3::x()),
            RotationVector3d::new(d(0.), Vector3::z())
        );
        assert_ne!(a, RotationVector3d::new(d(30.), -Vector3::y()));
    }

    #[test]
    fn identity_has_zero_angle_and_z_axis() {
        let r = Rotation3d::identity();
        assert_eq!(rad(r.angle()), 0.);
        assert_eq!(r.axis(), Vector3::z());
    }

    #[test]
    fn out_of_range_matrix_entry_is_an_error() {
        assert_eq!(
            Rotation3d::identity().rotation_matrix_entry(3, 0),
            Err(PoseError::IndexOutOfRange { row: 3, col: 0 })
        );
    }

    #[test]
    fn quaternion_entries_match_matrix_view() {
        let r = Rotation3d::from_axis_angle(d(47.), &Vector3::new(1., -2., 0.5).normalize());
        let m = r.rotation_matrix();
        for row in 0..3 {
            for col in 0..3 {
                assert_relative_eq!(
                    r.rotation_matrix_entry(row, col).unwrap(),
                    m.get(row, col).unwrap(),
                    epsilon = 1e-12
                );
            }
        }
    }

    #[test]
    fn ninety_degrees_about_x_takes_y_to_z() {
        let r = Rotation3d::from_axis_angle(d(90.), &Vector3::x());
        assert_relative_eq!(r * Point3::new(0., 1., 0.), Point3::new(0., 0., 1.), epsilon = 1e-6);
    }

    #[test]
    fn composition_applies_right_operand_first() {
        let about_z = Rotation3d::from_axis_angle(d(90.), &Vector3::z());
        let about_x = Rotation3d::from_axis_angle(d(90.), &Vector3::x());
        // x -> (about_z) -> y -> (about_x) -> z
        assert_relative_eq!((about_x * about_z) * Vector3::x(), Vector3::z(), epsilon = 1e-12);

        let mut pre = about_z;
        pre.pre_multiply_by(&about_x);
        assert_relative_eq!(pre, about_x * about_z, epsilon = 1e-12);
    }

    #[test]
    fn inverse_undoes_rotation() {
        let r = Rotation3d::from_axis_angle(d(123.), &Vector3::new(1., 1., 0.).normalize());
        assert_relative_eq!(r * r.inverse(), Rotation3d::identity(), epsilon = 1e-12);
        let mut inverted = r;
        inverted.invert();
        assert_eq!(inverted, r.inverse());
    }

    #[test]
    fn angle_diff_of_equal_rotations_is_exactly_zero() {
        let r = Rotation3d::from_axis_angle(d(1e-4), &Vector3::x());
        assert_eq!(rad(r.angle_diff_from(&r)), 0.);
    }

    #[rstest]
    #[case(d(10.), d(25.), 15.)]
    #[case(d(-170.), d(170.), 20.)]
    #[case(d(0.), d(180.), 180.)]
    fn angle_diff_about_common_axis(#[case] a: Angle, #[case] b: Angle, #[case] expected: f64) {
        let axis = Vector3::new(0., 1., 1.).normalize();
        let ra = Rotation3d::from_axis_angle(a, &axis);
        let rb = Rotation3d::from_axis_angle(b, &axis);
        assert_relative_eq!(
            rad(ra.angle_diff_from(&rb)),
            expected.to_radians(),
            epsilon = 1e-6
        );
    }

    #[test]
    fn nearly_equal_treats_negated_quaternion_as_same() {
        let r = Rotation3d::from_axis_angle(d(350.), &Vector3::z());
        let same = Rotation3d::from_axis_angle(d(-10.), &Vector3::z());
        assert!(r.is_nearly_equal(&same, 1e-9));
        assert!(!r.is_nearly_equal(&Rotation3d::identity(), 1e-3));
    }

    fn angle_grid() -> Vec<f64> {
        (0..=12)
            .map(|i| 30. * f64::from(i) + 18. * f64::from(i / 12))
            .flat_map(|a| [a, -a])
            .collect()
    }

    #[rstest]
    #[case(AxisName::XPos)]
    #[case(AxisName::YPos)]
    #[case(AxisName::ZPos)]
    fn angle_around_axis_recovers_construction_angle(#[case] axis: AxisName) {
        for degrees in angle_grid() {
            let r = Rotation3d::from_axis_angle(d(degrees), &axis.unit_vector());
            assert_abs_diff_eq!(
                BoundedAngle::new(r.angle_around_axis(axis)),
                BoundedAngle::new(d(degrees)),
                epsilon = 1e-6
            );
            // and through the matrix view
            let m = RotationMatrix3d::from_axis_angle(d(degrees), &axis.unit_vector());
            assert_abs_diff_eq!(
                BoundedAngle::new(m.angle_around_axis(axis)),
                BoundedAngle::new(d(degrees)),
                epsilon = 1e-6
            );
        }
    }

    #[test]
    fn negative_axes_negate_angle() {
        let r = Rotation3d::from_axis_angle(d(40.), &Vector3::y());
        assert_relative_eq!(
            rad(r.angle_around_axis(AxisName::YNeg)),
            -40f64.to_radians(),
            epsilon = 1e-9
        );
    }

    #[derive(Clone, Debug)]
    struct AxisAngle {
        angle: f64,
        axis: Vector3,
    }

    impl Arbitrary for AxisAngle {
        fn arbitrary(g: &mut Gen) -> Self {
            // quickcheck will give us awkward f64 values -- we ignore those
            let mut component = || loop {
                match f64::arbitrary(g) {
                    f if f.is_normal() => break f % 10.,
                    _ => {}
                }
            };
            let axis = loop {
                let axis = Vector3::new(component(), component(), component());
                if axis.norm() > 1e-3 {
                    break axis.normalize();
                }
            };
            // angles in (0, π) so that axis-angle is unique
            let angle = (component().abs() % 3.1) + 1e-3;
            Self { angle, axis }
        }
    }

    quickcheck! {
        fn axis_angle_quaternion_matrix_roundtrip(input: AxisAngle) -> () {
            let r = Rotation3d::from_axis_angle(Angle::new::<radian>(input.angle), &input.axis);
            let back = RotationVector3d::from_rotation_matrix(&r.rotation_matrix());
            assert_relative_eq!(rad(back.angle()), input.angle, epsilon = 1e-6);
            assert_relative_eq!(back.axis(), input.axis, epsilon = 1e-6);
        }
    }
}

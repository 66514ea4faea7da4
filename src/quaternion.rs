//! Unit quaternions with explicit, cheap renormalization.
//!
//! nalgebra's own `UnitQuaternion` renormalizes with a full square root every time it is asked
//! to. Pose chains multiply a lot of quaternions together, and almost all of those products are
//! already unit length to within a few ULPs, so [`UnitQuaternion`] renormalizes with a
//! first-order correction when the error is tiny and only falls back to `sqrt` otherwise.

use crate::error::PoseError;
use crate::{Quaternion, Vector3};
use std::fmt::{self, Display, Formatter};
use std::ops::{Mul, MulAssign};

#[cfg(any(test, feature = "approx"))]
use approx::{AbsDiffEq, RelativeEq};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Below this deviation of `|q|²` from 1, renormalize with `q *= 2 / (1 + |q|²)`.
///
/// That expression is the first-order Taylor expansion of `1 / sqrt(|q|²)` around 1, and its
/// error is below `f32` precision inside this band.
const FIRST_ORDER_RENORMALIZATION_BAND: f64 = 2.107342e-08;

/// A quaternion `w + xi + yj + zk` kept at unit length.
///
/// Every constructor and every multiplicative update renormalizes, so `|q| == 1` holds up to
/// floating point error at all times. Equality (`==`) is exact component-wise equality; use
/// [`UnitQuaternion::is_nearly_equal`] for tolerance-based comparison.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "[f64; 4]", into = "[f64; 4]"))]
pub struct UnitQuaternion {
    inner: Quaternion,
}

impl Default for UnitQuaternion {
    fn default() -> Self {
        Self::identity()
    }
}

impl UnitQuaternion {
    /// The quaternion `1 + 0i + 0j + 0k`, ie, no rotation.
    #[must_use]
    pub fn identity() -> Self {
        Self {
            inner: Quaternion::new(1., 0., 0., 0.),
        }
    }

    /// Constructs a unit quaternion from (not necessarily unit) components.
    ///
    /// Returns [`PoseError::ZeroQuaternion`] if all four components are exactly zero, since there
    /// is no direction to normalize towards.
    pub fn new(w: f64, x: f64, y: f64, z: f64) -> Result<Self, PoseError> {
        let mut q = Self {
            inner: Quaternion::new(w, x, y, z),
        };
        q.normalize()?;
        Ok(q)
    }

    /// Wraps components the caller already knows to be unit length.
    pub(crate) fn from_unit_components(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self {
            inner: Quaternion::new(w, x, y, z),
        }
    }

    pub fn w(&self) -> f64 {
        self.inner.w
    }

    pub fn x(&self) -> f64 {
        self.inner.i
    }

    pub fn y(&self) -> f64 {
        self.inner.j
    }

    pub fn z(&self) -> f64 {
        self.inner.k
    }

    /// Returns the components in `[w, x, y, z]` order.
    pub fn to_array(&self) -> [f64; 4] {
        [self.w(), self.x(), self.y(), self.z()]
    }

    /// Returns the vector (imaginary) part.
    pub fn vector_part(&self) -> Vector3 {
        Vector3::new(self.x(), self.y(), self.z())
    }

    fn norm_squared(&self) -> f64 {
        self.inner.norm_squared()
    }

    /// Rescales the quaternion to unit length.
    ///
    /// Near unit length this uses the first-order correction `q *= 2 / (1 + |q|²)`; further away
    /// it divides by `sqrt(|q|²)`.
    pub fn normalize(&mut self) -> Result<(), PoseError> {
        let magnitude_squared = self.norm_squared();
        if magnitude_squared == 0. {
            return Err(PoseError::ZeroQuaternion);
        }

        if (1. - magnitude_squared).abs() < FIRST_ORDER_RENORMALIZATION_BAND {
            self.inner *= 2. / (1. + magnitude_squared);
        } else {
            self.inner /= magnitude_squared.sqrt();
        }
        Ok(())
    }

    /// Renormalizes the product of two unit quaternions.
    ///
    /// Such a product has norm 1 up to rounding, so it can never be the zero quaternion.
    fn renormalize_product(&mut self) {
        if self.normalize().is_err() {
            *self = Self::identity();
        }
    }

    /// Conjugates in place. For a unit quaternion this is the inverse.
    pub fn conjugate_mut(&mut self) {
        self.inner = self.inner.conjugate();
    }

    #[must_use]
    pub fn conjugate(&self) -> Self {
        Self {
            inner: self.inner.conjugate(),
        }
    }

    /// The 4D inner product of the two quaternions' components.
    pub fn dot(&self, other: &Self) -> f64 {
        self.inner.dot(&other.inner)
    }

    /// Rotates `v` by this quaternion.
    ///
    /// Uses the expanded rotation matrix form, which is cheaper than two quaternion products.
    pub fn rotate_vector(&self, v: &Vector3) -> Vector3 {
        let [w, x, y, z] = self.to_array();
        let (w2, x2, y2, z2) = (w * w, x * x, y * y, z * z);
        let (xy, xz, yz) = (x * y, x * z, y * z);
        let (wx, wy, wz) = (w * x, w * y, w * z);

        Vector3::new(
            (w2 + x2 - y2 - z2) * v.x + 2. * (xy - wz) * v.y + 2. * (xz + wy) * v.z,
            2. * (xy + wz) * v.x + (w2 - x2 + y2 - z2) * v.y + 2. * (yz - wx) * v.z,
            2. * (xz - wy) * v.x + 2. * (yz + wx) * v.y + (w2 - x2 - y2 + z2) * v.z,
        )
    }

    /// The exponential map from a rotation vector (axis × angle) to a unit quaternion.
    ///
    /// The zero vector maps to the identity.
    pub fn exp(rotation_vector: &Vector3) -> Self {
        let angle = rotation_vector.norm();
        if angle == 0. {
            return Self::identity();
        }

        let half = 0.5 * angle;
        let scale = half.sin() / angle;
        let mut q = Self {
            inner: Quaternion::new(
                half.cos(),
                scale * rotation_vector.x,
                scale * rotation_vector.y,
                scale * rotation_vector.z,
            ),
        };
        q.renormalize_product();
        q
    }

    /// The logarithmic map from a unit quaternion to the shortest equivalent rotation vector.
    ///
    /// This is the inverse of [`UnitQuaternion::exp`] for rotation angles in [0, π].
    pub fn log(&self) -> Vector3 {
        // q and -q are the same rotation; pick the one with the shorter path
        let (w, v) = if self.w() < 0. {
            (-self.w(), -self.vector_part())
        } else {
            (self.w(), self.vector_part())
        };

        let sin_half = v.norm();
        if sin_half < f64::EPSILON {
            // first-order: sin(θ/2) ≈ θ/2
            return 2. * v;
        }
        let angle = 2. * sin_half.atan2(w);
        v * (angle / sin_half)
    }

    /// Component-wise comparison within `tolerance`.
    ///
    /// Note that `q` and `-q` describe the same rotation but are _not_ nearly equal here; see
    /// [`Rotation3d::is_nearly_equal`](crate::Rotation3d::is_nearly_equal) for a comparison that
    /// accounts for that.
    pub fn is_nearly_equal(&self, other: &Self, tolerance: f64) -> bool {
        self.to_array()
            .iter()
            .zip(other.to_array())
            .all(|(a, b)| (a - b).abs() <= tolerance)
    }
}

impl TryFrom<[f64; 4]> for UnitQuaternion {
    type Error = PoseError;

    fn try_from([w, x, y, z]: [f64; 4]) -> Result<Self, Self::Error> {
        Self::new(w, x, y, z)
    }
}

impl From<UnitQuaternion> for [f64; 4] {
    fn from(q: UnitQuaternion) -> Self {
        q.to_array()
    }
}

impl MulAssign<UnitQuaternion> for UnitQuaternion {
    fn mul_assign(&mut self, rhs: UnitQuaternion) {
        self.inner = self.inner * rhs.inner;
        self.renormalize_product();
    }
}

impl Mul<UnitQuaternion> for UnitQuaternion {
    type Output = UnitQuaternion;

    fn mul(mut self, rhs: UnitQuaternion) -> Self::Output {
        self *= rhs;
        self
    }
}

impl Display for UnitQuaternion {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}, {}, {}]",
            self.w(),
            self.x(),
            self.y(),
            self.z()
        )
    }
}

#[cfg(any(test, feature = "approx"))]
impl AbsDiffEq<Self> for UnitQuaternion {
    type Epsilon = f64;

    fn default_epsilon() -> Self::Epsilon {
        1e-9
    }

    fn abs_diff_eq(&self, other: &Self, epsilon: Self::Epsilon) -> bool {
        self.inner.abs_diff_eq(&other.inner, epsilon)
    }
}

#[cfg(any(test, feature = "approx"))]
impl RelativeEq for UnitQuaternion {
    fn default_max_relative() -> Self::Epsilon {
        Quaternion::default_max_relative()
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
    use super::UnitQuaternion;
    use crate::error::PoseError;
    use crate::Vector3;
    use approx::assert_relative_eq;
    use quickcheck::quickcheck;
    use rstest::rstest;

    #[test]
    fn zero_quaternion_cannot_be_normalized() {
        assert_eq!(
            UnitQuaternion::new(0., 0., 0., 0.),
            Err(PoseError::ZeroQuaternion)
        );
    }

    #[rstest]
    // far from unit length: full sqrt
    #[case([2., 0., 0., 0.])]
    #[case([1., 1., 1., 1.])]
    #[case([0., 0., 0., 1e-3])]
    // inside the first-order band
    #[case([1. + 1e-9, 0., 0., 0.])]
    #[case([0.5, 0.5, 0.5, 0.5 + 1e-10])]
    fn normalization_produces_unit_length(#[case] components: [f64; 4]) {
        let [w, x, y, z] = components;
        let q = UnitQuaternion::new(w, x, y, z).unwrap();
        assert_relative_eq!(q.norm_squared(), 1., epsilon = 1e-15);
    }

    #[test]
    fn product_with_conjugate_is_identity() {
        let q = UnitQuaternion::new(0.3, -0.2, 0.9, 0.1).unwrap();
        assert_relative_eq!(q * q.conjugate(), UnitQuaternion::identity(), epsilon = 1e-12);
    }

    #[test]
    fn exp_of_zero_is_identity() {
        assert_eq!(UnitQuaternion::exp(&Vector3::zeros()), UnitQuaternion::identity());
    }

    #[test]
    fn exp_rotates_about_the_vector() {
        let q = UnitQuaternion::exp(&Vector3::new(0., 0., std::f64::consts::FRAC_PI_2));
        assert_relative_eq!(
            q.rotate_vector(&Vector3::x()),
            Vector3::y(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn log_picks_the_short_way_around() {
        let q = UnitQuaternion::exp(&Vector3::new(0.4, 0., 0.));
        let flipped = UnitQuaternion::from_unit_components(-q.w(), -q.x(), -q.y(), -q.z());
        assert_relative_eq!(flipped.log(), Vector3::new(0.4, 0., 0.), epsilon = 1e-12);
    }

    #[test]
    fn log_of_tiny_rotation_is_first_order() {
        let v = Vector3::new(1e-18, -2e-18, 0.);
        assert_relative_eq!(UnitQuaternion::exp(&v).log(), v, epsilon = 1e-30);
    }

    fn finite(f: f64) -> f64 {
        if f.is_normal() {
            f % 100.
        } else {
            0.
        }
    }

    quickcheck! {
        fn exp_log_roundtrip(x: f64, y: f64, z: f64) -> () {
            // keep the angle inside [0, π) where log inverts exp
            let v = Vector3::new(finite(x), finite(y), finite(z));
            let v = if v.norm() > 0. {
                v.normalize() * (v.norm() % 3.)
            } else {
                v
            };
            assert_relative_eq!(UnitQuaternion::exp(&v).log(), v, epsilon = 1e-9);
        }
    }
}

//! Rigid body transforms: a rotation followed by a translation.

use crate::rotation::Rotation3d;
use crate::rotation_matrix::RotationMatrix2d;
use crate::{Point2, Point3, Vector2, Vector3};
use std::fmt::{self, Display, Formatter};
use std::ops::{Mul, MulAssign, Neg};
use uom::si::f64::Angle;

#[cfg(any(test, feature = "approx"))]
use approx::{AbsDiffEq, RelativeEq};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A 3D rigid body transform `p ↦ R·p + t`.
///
/// The translation is expressed in the frame the transform maps _into_ (the parent frame of a
/// pose), which is what makes composition work out as
///
/// ```text
/// (R₁, t₁) · (R₂, t₂) = (R₁·R₂, t₁ + R₁·t₂)
/// ```
///
/// ie, the right-hand transform is applied first.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Transform3d {
    rotation: Rotation3d,
    translation: Vector3,
}

impl Transform3d {
    #[must_use]
    pub fn identity() -> Self {
        Self {
            rotation: Rotation3d::identity(),
            translation: Vector3::zeros(),
        }
    }

    pub fn new(rotation: Rotation3d, translation: Vector3) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    pub fn from_rotation(rotation: Rotation3d) -> Self {
        Self::new(rotation, Vector3::zeros())
    }

    pub fn from_translation(translation: Vector3) -> Self {
        Self::new(Rotation3d::identity(), translation)
    }

    pub fn rotation(&self) -> &Rotation3d {
        &self.rotation
    }

    pub fn translation(&self) -> &Vector3 {
        &self.translation
    }

    pub fn set_rotation(&mut self, rotation: Rotation3d) {
        self.rotation = rotation;
    }

    pub fn set_translation(&mut self, translation: Vector3) {
        self.translation = translation;
    }

    /// Replaces `self` with `other * self`, ie, applies `other` after `self`.
    pub fn pre_compose_with(&mut self, other: &Transform3d) {
        *self = *other * *self;
    }

    /// Inverts in place: `(R, t)⁻¹ = (R⁻¹, −R⁻¹·t)`.
    pub fn invert(&mut self) {
        self.rotation.invert();
        self.translation = -(self.rotation * self.translation);
    }

    #[must_use]
    pub fn inverse(&self) -> Self {
        let mut inverse = *self;
        inverse.invert();
        inverse
    }

    /// Maps a point from the child frame into the parent frame.
    pub fn apply_to(&self, point: &Point3) -> Point3 {
        self.rotation * *point + self.translation
    }

    /// Rotates (but does not translate) a direction.
    pub fn apply_to_vector(&self, vector: &Vector3) -> Vector3 {
        self.rotation * *vector
    }
}

impl MulAssign<Transform3d> for Transform3d {
    fn mul_assign(&mut self, rhs: Transform3d) {
        self.translation += self.rotation * rhs.translation;
        self.rotation *= rhs.rotation;
    }
}

impl Mul<Transform3d> for Transform3d {
    type Output = Transform3d;

    fn mul(mut self, rhs: Transform3d) -> Self::Output {
        self *= rhs;
        self
    }
}

impl Mul<Point3> for Transform3d {
    type Output = Point3;

    fn mul(self, rhs: Point3) -> Self::Output {
        self.apply_to(&rhs)
    }
}

impl Neg for Transform3d {
    type Output = Self;

    fn neg(self) -> Self::Output {
        self.inverse()
    }
}

impl Display for Transform3d {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Translation: [{}, {}, {}], Rotation: {}",
            self.translation.x, self.translation.y, self.translation.z, self.rotation
        )
    }
}

#[cfg(any(test, feature = "approx"))]
impl AbsDiffEq<Self> for Transform3d {
    type Epsilon = f64;

    fn default_epsilon() -> Self::Epsilon {
        1e-9
    }

    fn abs_diff_eq(&self, other: &Self, epsilon: Self::Epsilon) -> bool {
        self.rotation.abs_diff_eq(&other.rotation, epsilon)
            && self.translation.abs_diff_eq(&other.translation, epsilon)
    }
}

#[cfg(any(test, feature = "approx"))]
impl RelativeEq for Transform3d {
    fn default_max_relative() -> Self::Epsilon {
        Vector3::default_max_relative()
    }

    fn relative_eq(
        &self,
        other: &Self,
        epsilon: Self::Epsilon,
        max_relative: Self::Epsilon,
    ) -> bool {
        self.rotation.relative_eq(&other.rotation, epsilon, max_relative)
            && self
                .translation
                .relative_eq(&other.translation, epsilon, max_relative)
    }
}

/// A 2D rigid body transform; the planar counterpart of [`Transform3d`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Transform2d {
    rotation: RotationMatrix2d,
    translation: Vector2,
}

impl Transform2d {
    #[must_use]
    pub fn identity() -> Self {
        Self {
            rotation: RotationMatrix2d::identity(),
            translation: Vector2::zeros(),
        }
    }

    pub fn new(angle: impl Into<Angle>, translation: Vector2) -> Self {
        Self {
            rotation: RotationMatrix2d::from_angle(angle),
            translation,
        }
    }

    pub fn from_rotation_matrix(rotation: RotationMatrix2d, translation: Vector2) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    pub fn angle(&self) -> Angle {
        self.rotation.angle()
    }

    pub fn rotation(&self) -> &RotationMatrix2d {
        &self.rotation
    }

    pub fn translation(&self) -> &Vector2 {
        &self.translation
    }

    pub fn set_angle(&mut self, angle: impl Into<Angle>) {
        self.rotation = RotationMatrix2d::from_angle(angle);
    }

    pub fn set_translation(&mut self, translation: Vector2) {
        self.translation = translation;
    }

    pub fn pre_compose_with(&mut self, other: &Transform2d) {
        *self = *other * *self;
    }

    pub fn invert(&mut self) {
        self.rotation.invert();
        self.translation = -(self.rotation * self.translation);
    }

    #[must_use]
    pub fn inverse(&self) -> Self {
        let mut inverse = *self;
        inverse.invert();
        inverse
    }

    pub fn apply_to(&self, point: &Point2) -> Point2 {
        self.rotation * *point + self.translation
    }
}

impl MulAssign<Transform2d> for Transform2d {
    fn mul_assign(&mut self, rhs: Transform2d) {
        self.translation += self.rotation * rhs.translation;
        self.rotation *= rhs.rotation;
    }
}

impl Mul<Transform2d> for Transform2d {
    type Output = Transform2d;

    fn mul(mut self, rhs: Transform2d) -> Self::Output {
        self *= rhs;
        self
    }
}

impl Mul<Point2> for Transform2d {
    type Output = Point2;

    fn mul(self, rhs: Point2) -> Self::Output {
        self.apply_to(&rhs)
    }
}

impl Display for Transform2d {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Translation: [{}, {}], Angle: {}°",
            self.translation.x,
            self.translation.y,
            self.angle().get::<uom::si::angle::degree>()
        )
    }
}

#[cfg(any(test, feature = "approx"))]
impl AbsDiffEq<Self> for Transform2d {
    type Epsilon = f64;

    fn default_epsilon() -> Self::Epsilon {
        1e-9
    }

    fn abs_diff_eq(&self, other: &Self, epsilon: Self::Epsilon) -> bool {
        self.rotation.abs_diff_eq(&other.rotation, epsilon)
            && self.translation.abs_diff_eq(&other.translation, epsilon)
    }
}

#[cfg(any(test, feature = "approx"))]
impl RelativeEq for Transform2d {
    fn default_max_relative() -> Self::Epsilon {
        Vector2::default_max_relative()
    }

    fn relative_eq(
        &self,
        other: &Self,
        epsilon: Self::Epsilon,
        max_relative: Self::Epsilon,
    ) -> bool {
        self.rotation.relative_eq(&other.rotation, epsilon, max_relative)
            && self
                .translation
                .relative_eq(&other.translation, epsilon, max_relative)
    }
}

#[cfg(test)]
mod tests {
    use super::{Transform2d, Transform3d};
    use crate::{Point2, Point3, Rotation3d, Vector2, Vector3};
    use approx::assert_relative_eq;
    use rstest::rstest;
    use uom::si::angle::{degree, radian};
    use uom::si::f64::Angle;

    fn d(degrees: f64) -> Angle {
        Angle::new::<degree>(degrees)
    }

    fn sample() -> Transform3d {
        Transform3d::new(
            Rotation3d::from_axis_angle(d(30.), &Vector3::z()),
            Vector3::new(10., 20., 30.),
        )
    }

    #[test]
    fn composition_applies_right_operand_first() {
        let rotate = Transform3d::from_rotation(Rotation3d::from_axis_angle(d(90.), &Vector3::z()));
        let shift = Transform3d::from_translation(Vector3::new(1., 0., 0.));
        let p = Point3::origin();
        assert_relative_eq!((rotate * shift) * p, Point3::new(0., 1., 0.), epsilon = 1e-12);
        assert_relative_eq!((shift * rotate) * p, Point3::new(1., 0., 0.), epsilon = 1e-12);
    }

    #[test]
    fn composition_matches_closed_form() {
        let a = sample();
        let b = Transform3d::new(
            Rotation3d::from_axis_angle(d(-45.), &Vector3::x()),
            Vector3::new(-1., 2., 5.),
        );
        let ab = a * b;
        assert_relative_eq!(*ab.rotation(), *a.rotation() * *b.rotation(), epsilon = 1e-12);
        assert_relative_eq!(
            *ab.translation(),
            a.translation() + *a.rotation() * *b.translation(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn inverse_composes_to_identity() {
        let t = sample();
        for product in [t * t.inverse(), t.inverse() * t] {
            assert!(product.translation().norm() < 1e-5);
            assert!(product.rotation().angle().get::<radian>() < 1e-5);
        }
        assert_relative_eq!(-t, t.inverse());
    }

    #[test]
    fn pre_compose_applies_other_last() {
        let mut t = sample();
        let other = Transform3d::from_translation(Vector3::new(0., 0., -30.));
        t.pre_compose_with(&other);
        assert_relative_eq!(*t.translation(), Vector3::new(10., 20., 0.), epsilon = 1e-12);
    }

    #[test]
    fn display() {
        let t = Transform3d::from_translation(Vector3::new(1., 2., 3.));
        insta::assert_snapshot!(t.to_string(), @"Translation: [1, 2, 3], Rotation: Quaternion: [1, 0, 0, 0]");
        let t = Transform2d::new(d(0.), Vector2::new(-1., 0.5));
        insta::assert_snapshot!(t.to_string(), @"Translation: [-1, 0.5], Angle: 0°");
    }

    #[rstest]
    #[case(d(90.), Vector2::new(1., 0.), Point2::new(1., 1.))]
    #[case(d(180.), Vector2::new(0., 0.), Point2::new(-1., 0.))]
    #[case(d(0.), Vector2::new(2., 3.), Point2::new(3., 3.))]
    fn two_d_apply(#[case] angle: Angle, #[case] translation: Vector2, #[case] expected: Point2) {
        let t = Transform2d::new(angle, translation);
        assert_relative_eq!(t * Point2::new(1., 0.), expected, epsilon = 1e-12);
        assert_relative_eq!(t.inverse().apply_to(&expected), Point2::new(1., 0.), epsilon = 1e-12);
    }

    #[test]
    fn two_d_composition_adds_angles() {
        let a = Transform2d::new(d(30.), Vector2::new(1., 0.));
        let b = Transform2d::new(d(45.), Vector2::new(0., 1.));
        assert_relative_eq!(
            (a * b).angle().get::<radian>(),
            75f64.to_radians(),
            epsilon = 1e-12
        );
    }

    #[cfg(feature = "serde")]
    #[test]
    fn serde_roundtrip() {
        let t = sample();
        let yaml = serde_yaml::to_string(&t).unwrap();
        let back: Transform3d = serde_yaml::from_str(&yaml).unwrap();
        // deserializing renormalizes the quaternion
        assert_relative_eq!(back, t, epsilon = 1e-15);
    }
}

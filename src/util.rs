use std::f64::consts::{PI, TAU};
use uom::si::angle::radian;
use uom::si::f64::Angle;

#[cfg(any(test, feature = "approx"))]
use approx::{AbsDiffEq, RelativeEq};

/// An angle that compares equal to any other angle pointing the same way.
///
/// Rotation code produces angles through `atan2`, `acos` and sums of other angles, so the same
/// physical angle routinely shows up as `-π` in one place and `π` in another, or as `378°` where
/// `18°` was meant. `BoundedAngle` keeps the raw value around but normalizes on every read.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct BoundedAngle {
    radians: f64,
}

impl BoundedAngle {
    pub(crate) fn new(angle: impl Into<Angle>) -> Self {
        Self::from_radians(angle.into().get::<radian>())
    }

    pub(crate) fn from_radians(radians: f64) -> Self {
        Self {
            radians: radians.rem_euclid(TAU),
        }
    }

    /// Returns the angle in [0, 2π) radians.
    pub(crate) fn get_bounded(self) -> f64 {
        // rem_euclid can round up to exactly TAU for tiny negative inputs
        if self.radians >= TAU {
            0.
        } else {
            self.radians
        }
    }

    /// Returns the angle in (-π, π] radians.
    ///
    /// This is the range `atan2` produces, so wrapped sums of angles can be compared directly
    /// against angles extracted from rotation matrices.
    pub(crate) fn to_signed_range(self) -> f64 {
        let angle = self.get_bounded();
        if angle <= PI {
            angle
        } else {
            angle - TAU
        }
    }

    pub(crate) fn to_signed_angle(self) -> Angle {
        Angle::new::<radian>(self.to_signed_range())
    }
}

impl<U: Into<Angle>> From<U> for BoundedAngle {
    fn from(value: U) -> Self {
        BoundedAngle::new(value)
    }
}

/// Wraps `angle` into (-π, π].
pub(crate) fn wrap_signed(angle: Angle) -> Angle {
    BoundedAngle::new(angle).to_signed_angle()
}

/// Converts a raw radian value into a (-π, π] [`Angle`].
pub(crate) fn signed_radians(radians: f64) -> Angle {
    BoundedAngle::from_radians(radians).to_signed_angle()
}

/// Returns true if `value` is within `tolerance` of `target`.
#[inline]
pub(crate) fn near(value: f64, target: f64, tolerance: f64) -> bool {
    (value - target).abs() <= tolerance
}

#[cfg(any(test, feature = "approx"))]
impl AbsDiffEq<Self> for BoundedAngle {
    type Epsilon = f64;

    fn default_epsilon() -> Self::Epsilon {
        1e-9
    }

    fn abs_diff_eq(&self, other: &Self, epsilon: Self::Epsilon) -> bool {
        BoundedAngle::from_radians(self.radians - other.radians)
            .to_signed_range()
            .abs()
            <= epsilon
    }
}

#[cfg(any(test, feature = "approx"))]
impl RelativeEq for BoundedAngle {
    fn default_max_relative() -> Self::Epsilon {
        f64::default_max_relative()
    }

    fn relative_eq(
        &self,
        other: &Self,
        epsilon: Self::Epsilon,
        max_relative: Self::Epsilon,
    ) -> bool {
        let a = self.get_bounded();
        let b = other.get_bounded();
        let (min, max) = (f64::min(a, b), f64::max(a, b));

        f64::relative_eq(&min, &max, epsilon, max_relative)
            || f64::relative_eq(&(min + TAU), &max, epsilon, max_relative)
    }
}

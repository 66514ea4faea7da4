use crate::rotation::Rotation3d;
use crate::rotation_matrix::RotationMatrix3d;
use uom::si::f64::Angle;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A set of rotations under which an object looks the same.
///
/// A cube with identical faces, for example, is indistinguishable under any of the rotations
/// that map its faces onto each other, so two observed poses of it should compare as equal when
/// they differ by one of those rotations. See
/// [`Pose3d::is_same_as_with_ambiguity`](crate::Pose3d::is_same_as_with_ambiguity).
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RotationAmbiguities {
    /// Compare entry-wise absolute values, so the listed rotations also stand in for all of their
    /// axis sign flips.
    pub use_absolute_value: bool,
    pub rotations: Vec<RotationMatrix3d>,
}

impl RotationAmbiguities {
    pub fn new(use_absolute_value: bool, rotations: Vec<RotationMatrix3d>) -> Self {
        Self {
            use_absolute_value,
            rotations,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rotations.is_empty()
    }

    /// Returns true if `rotation` is within `threshold` of any of the ambiguities.
    ///
    /// The comparison is inclusive, so a zero threshold still matches an exact ambiguity.
    pub fn is_rotation_same(&self, rotation: &Rotation3d, threshold: Angle) -> bool {
        if self.rotations.is_empty() {
            return false;
        }

        let mut matrix = rotation.rotation_matrix();
        if self.use_absolute_value {
            // no longer a rotation, but angle_diff_from only looks at the trace
            matrix = RotationMatrix3d::from_matrix_unchecked(matrix.abs());
        }

        self.rotations
            .iter()
            .any(|ambiguity| matrix.angle_diff_from(ambiguity) <= threshold)
    }
}

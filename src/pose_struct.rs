use crate::error::PoseError;
use crate::origin_list::{PoseOriginId, PoseOriginList};
use crate::pose::Pose3d;
use crate::quaternion::UnitQuaternion;
use crate::rotation::Rotation3d;
use crate::transform::Transform3d;
use crate::Vector3;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A [`Pose3d`] flattened for storage or for crossing a process boundary.
///
/// The pose is stored relative to the origin it is rooted at, which is identified by ID only.
/// Turning it back into a [`Pose3d`] therefore needs the [`PoseOriginList`] that knows that
/// origin (see [`PoseOriginList::pose_from_struct`]).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PoseStruct3d {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub qw: f32,
    pub qx: f32,
    pub qy: f32,
    pub qz: f32,
    pub origin_id: PoseOriginId,
}

impl PoseStruct3d {
    pub fn new(transform: &Transform3d, origin_id: PoseOriginId) -> Self {
        let t = transform.translation();
        let q = transform.rotation().quaternion();
        // narrowing to f32 is the point of the persisted form
        Self {
            x: t.x as f32,
            y: t.y as f32,
            z: t.z as f32,
            qw: q.w() as f32,
            qx: q.x() as f32,
            qy: q.y() as f32,
            qz: q.z() as f32,
            origin_id,
        }
    }

    /// The stored transform, relative to the origin.
    ///
    /// Fails with [`PoseError::ZeroQuaternion`] if the stored quaternion is all zeros.
    pub fn transform(&self) -> Result<Transform3d, PoseError> {
        let q = UnitQuaternion::new(
            f64::from(self.qw),
            f64::from(self.qx),
            f64::from(self.qy),
            f64::from(self.qz),
        )?;
        Ok(Transform3d::new(
            Rotation3d::from_quaternion(q),
            Vector3::new(f64::from(self.x), f64::from(self.y), f64::from(self.z)),
        ))
    }
}

impl Pose3d {
    /// Flattens this pose relative to the origin in `origins` that it is rooted at.
    pub fn to_pose_struct(&self, origins: &PoseOriginList) -> Result<PoseStruct3d, PoseError> {
        let origin_id = origins.origin_id_of(self);
        let origin = origins.origin_by_id(origin_id)?;
        let relative = self.get_with_respect_to(origin)?;
        Ok(PoseStruct3d::new(&relative.transform(), origin_id))
    }
}

impl PoseOriginList {
    /// Rebuilds a pose from its flattened form, parented to the origin it names.
    pub fn pose_from_struct(
        &self,
        pose: &PoseStruct3d,
        name: impl Into<String>,
    ) -> Result<Pose3d, PoseError> {
        let origin = self.origin_by_id(pose.origin_id)?;
        Ok(Pose3d::with_parent(pose.transform()?, origin, name))
    }
}

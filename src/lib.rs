//! This library keeps track of where things are relative to each other: rigid body poses
//! (rotation + translation) organized as a forest of kinematic trees.
//!
//! Every [`Pose3d`] lives in a [`PoseTree`] and may have a parent. A pose's [`Transform3d`] maps
//! its own frame into its parent's frame, so any pose can be expressed relative to any other pose
//! that hangs off the same root through [`Pose3d::get_with_respect_to`]. Poses under different
//! roots ("origins") have no known relation to each other, and asking for one is an ordinary,
//! recoverable outcome ([`PoseError::NoCommonOrigin`]) rather than a bug.
//!
//! Origins are managed by a [`PoseOriginList`]. When two previously unrelated origins turn out to
//! be related after all (eg, because the robot recognised a landmark it had seen before it was
//! picked up and moved), [`PoseOriginList::rejigger`] links them, and
//! [`PoseOriginList::flatten`] collapses the resulting chains of origins.
//!
//! 2D poses ([`Pose2d`]) form trees of their own in a [`PoseTree2d`], with the same parenting and
//! ownership rules.
//!
//! Comparing poses is tolerance-based, and can account for objects that look the same under some
//! rotations through [`RotationAmbiguities`]; see [`Pose3d::is_same_as`] and friends.
//!
//! Separately, the [`filter`] module provides two orientation filters ([`ImuUkf`] and
//! [`ImuEskf`]) that fuse accelerometer and gyroscope samples into a [`Rotation3d`].
//!
//! # Examples
//!
//! ```
//! use posetree::{Pose3d, PoseOriginList, Rotation3d, Transform3d, Vector3};
//! use uom::si::angle::degree;
//! use uom::si::f64::Angle;
//!
//! let mut origins = PoseOriginList::default();
//! let first = origins.add_new_origin()?;
//!
//! // the robot sees a block in front of it, turned by 30°
//! let block = Pose3d::with_parent(
//!     Transform3d::new(
//!         Rotation3d::from_axis_angle(Angle::new::<degree>(30.), &Vector3::z()),
//!         Vector3::new(100., 0., 0.),
//!     ),
//!     origins.current_origin()?,
//!     "block",
//! );
//!
//! // the robot gets picked up, and starts over in a new origin
//! origins.add_new_origin()?;
//! let robot = Pose3d::with_parent(Transform3d::identity(), origins.current_origin()?, "robot");
//! assert!(block.get_with_respect_to(&robot).is_err());
//!
//! // it later spots the block again and works out how the new origin sits in the old one
//! origins.rejigger(first, Transform3d::from_translation(Vector3::new(0., 50., 0.)))?;
//! let robot_in_first = robot.get_with_respect_to(origins.origin_by_id(first)?)?;
//! assert_eq!(robot_in_first.translation(), Vector3::new(0., 50., 0.));
//! assert!(block.get_with_respect_to(&robot).is_ok());
//! # Ok::<(), posetree::PoseError>(())
//! ```

mod ambiguity;
mod error;
pub mod filter;
mod origin_list;
mod pose;
mod pose2d;
mod pose_struct;
mod quaternion;
mod rotation;
mod rotation_matrix;
mod transform;
mod tree;
mod util;

pub type Point2 = nalgebra::Point2<f64>;
pub type Point3 = nalgebra::Point3<f64>;
pub type Vector2 = nalgebra::Vector2<f64>;
pub type Vector3 = nalgebra::Vector3<f64>;
pub type Matrix2 = nalgebra::Matrix2<f64>;
pub type Matrix3 = nalgebra::Matrix3<f64>;
pub(crate) type Quaternion = nalgebra::Quaternion<f64>;

pub use ambiguity::RotationAmbiguities;
pub use error::PoseError;
pub use filter::{FilterStatus, ImuEskf, ImuFilterConfig, ImuUkf, OrientationFilter};
pub use origin_list::{PoseOriginId, PoseOriginList};
pub use pose::{Comparison, Pose3d, PoseId};
pub use pose2d::{Plane, Pose2d};
pub use pose_struct::PoseStruct3d;
pub use quaternion::UnitQuaternion;
pub use rotation::{AxisName, Rotation3d, RotationVector3d};
pub use rotation_matrix::{EulerAngles, EulerDecomposition, RotationMatrix2d, RotationMatrix3d};
pub use transform::{Transform2d, Transform3d};
pub use tree::{PoseTree, PoseTree2d, PoseTreeConfig, TreeTransform};

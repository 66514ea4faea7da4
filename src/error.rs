use crate::origin_list::PoseOriginId;
use thiserror::Error;

/// Everything that can go wrong when building, querying or rearranging poses.
///
/// Most variants are logic errors on the caller's side (eg, creating a cycle or reusing an
/// origin ID). [`PoseError::NoCommonOrigin`] is the exception: two poses living in different,
/// never-linked coordinate frames is a perfectly normal state of affairs (think of a robot that
/// was picked up and put down somewhere else), and callers are expected to handle it routinely.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PoseError {
    /// The two poses do not share a root, so neither can be expressed relative to the other.
    #[error("poses do not share a common origin")]
    NoCommonOrigin,

    /// The two poses live in different [`PoseTree`](crate::PoseTree) arenas.
    #[error("poses belong to different pose trees")]
    DifferentTrees,

    /// Re-parenting would make a pose its own ancestor.
    #[error("setting parent of {child:?} to {parent:?} would create a cycle")]
    CycleDetected { child: String, parent: String },

    /// A traversal reached a parent that has no owning `Pose3d` left.
    #[error("parent {name:?} is no longer owned by any pose")]
    UnownedParent { name: String },

    /// A handle pointed at a slot that has since been freed.
    #[error("pose tree node no longer exists")]
    DanglingNode,

    #[error("origin ID {0} is already in use")]
    DuplicateOriginId(PoseOriginId),

    #[error("origin ID {0} is reserved and cannot name an origin")]
    InvalidOriginId(PoseOriginId),

    #[error("no origin with ID {0}")]
    UnknownOrigin(PoseOriginId),

    #[error("origin {0} is already the current origin")]
    AlreadyCurrentOrigin(PoseOriginId),

    /// Rejiggering requires the current origin to still be an identity-transform root.
    #[error("origin {name:?} has already been rejiggered")]
    AlreadyRejiggered { name: String },

    #[error("cannot normalize an all-zero quaternion")]
    ZeroQuaternion,

    #[error("matrix index ({row}, {col}) is out of range")]
    IndexOutOfRange { row: usize, col: usize },
}

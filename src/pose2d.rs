//! 2D poses: a [`Transform2d`] placed in a [`PoseTree2d`], embedded in a plane of 3D space.

use crate::error::PoseError;
use crate::pose::{Pose3d, PoseId};
use crate::rotation::Rotation3d;
use crate::transform::{Transform2d, Transform3d};
use crate::tree::{NodeId, PoseNode, PoseTree, PoseTree2d};
use crate::util::wrap_signed;
use crate::{Point2, Point3, Vector2, Vector3};
use std::fmt::{self, Debug, Display, Formatter};
use std::ops::Mul;
use tracing::debug;
use uom::si::angle::degree;
use uom::si::f64::Angle;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Where a 2D frame sits in 3D: a point on the plane and the plane's unit normal.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Plane {
    origin: Point3,
    normal: Vector3,
}

impl Plane {
    /// Returns `None` if `normal` is (numerically) zero.
    pub fn new(origin: Point3, normal: Vector3) -> Option<Self> {
        let normal = normal.try_normalize(f64::EPSILON)?;
        Some(Self { origin, normal })
    }

    /// The horizontal plane at height `z`.
    pub fn horizontal(z: f64) -> Self {
        Self {
            origin: Point3::new(0., 0., z),
            normal: Vector3::z(),
        }
    }

    pub fn origin(&self) -> &Point3 {
        &self.origin
    }

    pub fn normal(&self) -> &Vector3 {
        &self.normal
    }
}

impl Default for Plane {
    /// The XY plane.
    fn default() -> Self {
        Self::horizontal(0.)
    }
}

/// A planar pose that lives in a [`PoseTree2d`].
///
/// 2D poses form trees exactly like [`Pose3d`]s do: a pose's [`Transform2d`] maps its own frame
/// into its parent's, and [`Pose2d::get_with_respect_to`] relates any two poses with a common
/// root. Copy, share and move semantics are those of [`Pose3d`]: [`Clone`] produces a `_COPY`
/// with [`PoseId::UNOWNED`], [`Pose2d::share`] another handle to the same pose, and moves transfer
/// name and ID.
///
/// Each pose also records the [`Plane`] its frame is embedded in, which is only used when lifting
/// it into 3D with [`Pose2d::to_pose3d`].
pub struct Pose2d {
    tree: PoseTree2d,
    node: NodeId,
}

impl Pose2d {
    /// Creates a root pose in the XY plane.
    pub fn new(
        tree: &PoseTree2d,
        angle: impl Into<Angle>,
        translation: Vector2,
        name: impl Into<String>,
    ) -> Self {
        Self::insert(
            tree,
            PoseNode {
                transform: Transform2d::new(angle, translation),
                name: name.into(),
                ..PoseNode::default()
            },
        )
    }

    /// Creates a root pose with the identity transform.
    pub fn new_root(tree: &PoseTree2d, name: impl Into<String>) -> Self {
        Self::insert(
            tree,
            PoseNode {
                transform: Transform2d::identity(),
                name: name.into(),
                ..PoseNode::default()
            },
        )
    }

    /// Creates a pose whose transform is relative to `parent`, in `parent`'s plane.
    pub fn with_parent(transform: Transform2d, parent: &Pose2d, name: impl Into<String>) -> Self {
        Self::insert(
            &parent.tree,
            PoseNode {
                transform,
                embedding: parent.plane(),
                parent: Some(parent.node),
                name: name.into(),
                id: PoseId::UNOWNED,
            },
        )
    }

    fn insert(tree: &PoseTree2d, node: PoseNode<Transform2d>) -> Self {
        let node = tree.arena.borrow_mut().insert(node);
        Self {
            tree: tree.clone(),
            node,
        }
    }

    /// Projects `pose` onto the horizontal plane through its origin, as a new root in `tree`.
    ///
    /// The 2D angle is the 3D rotation's angle about the Z axis. Name and ID are carried over;
    /// the 3D parent is not, since it lives in a different tree.
    pub fn from_pose3d(pose: &Pose3d, tree: &PoseTree2d) -> Self {
        let translation = pose.translation();
        Self::insert(
            tree,
            PoseNode {
                transform: Transform2d::new(
                    pose.rotation().angle_around_z_axis(),
                    Vector2::new(translation.x, translation.y),
                ),
                embedding: Plane::horizontal(translation.z),
                parent: None,
                name: pose.name(),
                id: pose.id(),
            },
        )
    }

    /// Lifts this pose's own transform into 3D as a new root in `tree`: a rotation about the
    /// plane normal, positioned relative to the plane origin.
    pub fn to_pose3d(&self, tree: &PoseTree) -> Pose3d {
        let (transform, plane, name, id) =
            self.read(|node| (node.transform, node.embedding, node.name.clone(), node.id));
        let translation = transform.translation();
        let lifted = Transform3d::new(
            Rotation3d::from_axis_angle(transform.angle(), plane.normal()),
            plane.origin().coords + Vector3::new(translation.x, translation.y, 0.),
        );
        let mut pose = Pose3d::new(tree, lifted, name);
        pose.set_id(id);
        pose
    }

    /// Returns another handle to this same pose.
    pub fn share(&self) -> Pose2d {
        if let Err(e) = self.tree.arena.borrow_mut().acquire(self.node) {
            debug!(error = %e, "Pose2d.Share.DanglingNode");
        }
        Pose2d {
            tree: self.tree.clone(),
            node: self.node,
        }
    }

    pub fn tree(&self) -> &PoseTree2d {
        &self.tree
    }

    fn read<R: Default>(&self, f: impl FnOnce(&PoseNode<Transform2d>) -> R) -> R {
        self.tree
            .arena
            .try_borrow()
            .ok()
            .and_then(|arena| arena.node(self.node).ok().map(f))
            .unwrap_or_default()
    }

    fn update(&mut self, f: impl FnOnce(&mut PoseNode<Transform2d>)) {
        if let Ok(node) = self.tree.arena.borrow_mut().node_mut(self.node) {
            f(node);
        }
    }

    fn derive(&self, transform: Transform2d, parent: Option<NodeId>, name: String) -> Pose2d {
        Self::insert(
            &self.tree,
            PoseNode {
                transform,
                embedding: self.plane(),
                parent,
                name,
                id: PoseId::UNOWNED,
            },
        )
    }

    pub fn name(&self) -> String {
        self.read(|node| node.name.clone())
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        self.update(|node| node.name = name);
    }

    pub fn id(&self) -> PoseId {
        self.read(|node| node.id)
    }

    pub fn set_id(&mut self, id: PoseId) {
        self.update(|node| node.id = id);
    }

    pub fn transform(&self) -> Transform2d {
        self.read(|node| node.transform)
    }

    pub fn set_transform(&mut self, transform: Transform2d) {
        self.update(|node| node.transform = transform);
    }

    pub fn angle(&self) -> Angle {
        self.transform().angle()
    }

    pub fn set_angle(&mut self, angle: impl Into<Angle>) {
        let angle: Angle = angle.into();
        self.update(|node| node.transform.set_angle(angle));
    }

    pub fn translation(&self) -> Vector2 {
        *self.transform().translation()
    }

    pub fn set_translation(&mut self, translation: Vector2) {
        self.update(|node| node.transform.set_translation(translation));
    }

    pub fn translate_by(&mut self, offset: &Vector2) {
        self.update(|node| {
            let translation = node.transform.translation() + offset;
            node.transform.set_translation(translation);
        });
    }

    /// Rotates the pose about its parent's origin.
    pub fn rotate_by(&mut self, angle: impl Into<Angle>) {
        self.pre_compose_with(&Transform2d::new(angle, Vector2::zeros()));
    }

    pub fn pre_compose_with(&mut self, other: &Transform2d) {
        self.update(|node| node.transform.pre_compose_with(other));
    }

    pub fn invert(&mut self) {
        self.update(|node| node.transform.invert());
    }

    #[must_use]
    pub fn inverse(&self) -> Pose2d {
        let mut inverse = self.clone();
        inverse.invert();
        inverse
    }

    pub fn plane(&self) -> Plane {
        self.read(|node| node.embedding)
    }

    pub fn set_plane(&mut self, plane: Plane) {
        self.update(|node| node.embedding = plane);
    }

    /// Links this pose under `parent`, keeping its transform.
    ///
    /// Fails, leaving the pose untouched, if `parent` is this pose or one of its descendants, or
    /// if `parent` lives in a different tree.
    pub fn set_parent(&mut self, parent: &Pose2d) -> Result<(), PoseError> {
        if !self.tree.same_tree(&parent.tree) {
            return Err(PoseError::DifferentTrees);
        }
        self.tree
            .arena
            .borrow_mut()
            .set_parent(self.node, Some(parent.node))
    }

    pub fn clear_parent(&mut self) -> Result<(), PoseError> {
        self.tree.arena.borrow_mut().set_parent(self.node, None)
    }

    /// Returns a handle to the parent pose, or `None` for a root.
    pub fn parent(&self) -> Result<Option<Pose2d>, PoseError> {
        let mut arena = self.tree.arena.borrow_mut();
        let Some(parent) = arena.parent(self.node)? else {
            return Ok(None);
        };
        arena.acquire(parent)?;
        Ok(Some(Pose2d {
            tree: self.tree.clone(),
            node: parent,
        }))
    }

    pub fn has_parent(&self) -> bool {
        self.read(|node| node.parent.is_some())
    }

    pub fn is_root(&self) -> bool {
        !self.has_parent()
    }

    pub fn depth(&self) -> Result<usize, PoseError> {
        Ok(self.tree.arena.borrow().chain(self.node)?.len() - 1)
    }

    pub fn find_root(&self) -> Result<Pose2d, PoseError> {
        let mut arena = self.tree.arena.borrow_mut();
        let root = arena.root(self.node)?;
        arena.acquire(root)?;
        Ok(Pose2d {
            tree: self.tree.clone(),
            node: root,
        })
    }

    /// The number of handles currently holding this pose's node.
    pub fn node_owner_count(&self) -> usize {
        self.tree.arena.borrow().owner_count(self.node)
    }

    fn same_node(&self, other: &Pose2d) -> bool {
        self.node == other.node && self.tree.same_tree(&other.tree)
    }

    /// Returns true if `other` is this pose's direct parent.
    pub fn is_child_of(&self, other: &Pose2d) -> bool {
        self.tree.same_tree(&other.tree) && self.read(|node| node.parent) == Some(other.node)
    }

    /// Returns true if `other` is somewhere above this pose.
    pub fn is_descendant_of(&self, other: &Pose2d) -> bool {
        if !self.tree.same_tree(&other.tree) {
            return false;
        }
        self.tree
            .arena
            .borrow()
            .is_ancestor(other.node, self.node)
            .unwrap_or_else(|e| {
                debug!(error = %e, "Pose2d.IsDescendantOf.Failed");
                false
            })
    }

    /// Expresses this pose relative to `other`, as a new pose parented to `other`.
    ///
    /// Returns [`PoseError::NoCommonOrigin`] if the two poses have different roots.
    pub fn get_with_respect_to(&self, other: &Pose2d) -> Result<Pose2d, PoseError> {
        if !self.tree.same_tree(&other.tree) {
            return Err(PoseError::DifferentTrees);
        }
        let transform = self
            .tree
            .arena
            .borrow()
            .relative_transform(self.node, other.node)?;
        let name = format!("{}_wrt_{}", self.name(), other.name());
        Ok(self.derive(transform, Some(other.node), name))
    }

    pub fn get_with_respect_to_root(&self) -> Result<Pose2d, PoseError> {
        let root = self.find_root()?;
        self.get_with_respect_to(&root)
    }

    /// Transforms for this pose and `other` in this pose's parent frame, or in this pose's own
    /// frame if it is a root or an ancestor of `other`.
    fn reconcile(&self, other: &Pose2d) -> Result<(Transform2d, Transform2d), PoseError> {
        if !self.tree.same_tree(&other.tree) {
            return Err(PoseError::DifferentTrees);
        }
        let arena = self.tree.arena.borrow();
        match arena.parent(self.node)? {
            Some(parent) if !arena.is_ancestor(self.node, other.node)? => Ok((
                arena.node(self.node)?.transform,
                arena.relative_transform(other.node, parent)?,
            )),
            _ => Ok((
                Transform2d::identity(),
                arena.relative_transform(other.node, self.node)?,
            )),
        }
    }

    /// Returns true if `other` is within `distance` and `angle` of this pose.
    ///
    /// Poses that cannot be related never compare as the same.
    pub fn is_same_as(&self, other: &Pose2d, distance: f64, angle: impl Into<Angle>) -> bool {
        let angle: Angle = angle.into();
        if self.same_node(other) {
            return true;
        }
        let (this, other) = match self.reconcile(other) {
            Ok(transforms) => transforms,
            Err(e) => {
                debug!(error = %e, "Pose2d.IsSameAs.Unrelated");
                return false;
            }
        };
        let diff = other.translation() - this.translation();
        let angle_diff = wrap_signed(other.angle() - this.angle()).abs();
        diff.norm_squared() <= distance * distance && angle_diff <= angle
    }
}

impl Clone for Pose2d {
    /// Copies the pose into a new node with the same transform, plane and parent, a `_COPY` name
    /// and [`PoseId::UNOWNED`].
    fn clone(&self) -> Self {
        let (transform, parent, name) =
            self.read(|node| (node.transform, node.parent, node.name.clone()));
        self.derive(transform, parent, format!("{name}_COPY"))
    }
}

impl Drop for Pose2d {
    fn drop(&mut self) {
        if let Ok(mut arena) = self.tree.arena.try_borrow_mut() {
            arena.release(self.node);
        }
    }
}

impl Mul<&Pose2d> for &Pose2d {
    type Output = Pose2d;

    /// Composes the two transforms. The result has the left-hand pose's parent.
    fn mul(self, rhs: &Pose2d) -> Self::Output {
        let (transform, parent) = self.read(|node| (node.transform, node.parent));
        let name = format!("{}*{}", self.name(), rhs.name());
        self.derive(transform * rhs.transform(), parent, name)
    }
}

impl Mul<Point2> for &Pose2d {
    type Output = Point2;

    fn mul(self, rhs: Point2) -> Self::Output {
        self.transform().apply_to(&rhs)
    }
}

impl Debug for Pose2d {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let (name, id, transform, plane, parent) = self.read(|node| {
            (node.name.clone(), node.id, node.transform, node.embedding, node.parent)
        });
        f.debug_struct("Pose2d")
            .field("name", &name)
            .field("id", &id)
            .field("transform", &transform)
            .field("plane", &plane)
            .field("parent", &parent)
            .finish()
    }
}

impl Display for Pose2d {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let parent_name = self
            .tree
            .arena
            .try_borrow()
            .ok()
            .and_then(|arena| {
                let parent = arena.node(self.node).ok()?.parent?;
                arena.node(parent).ok().map(|p| p.name.clone())
            });
        let t = self.translation();
        write!(
            f,
            "{} (id {}): [{}, {}] at {}°",
            self.name(),
            self.id(),
            t.x,
            t.y,
            self.angle().get::<degree>()
        )?;
        match parent_name {
            Some(parent) => write!(f, ", parent {parent}"),
            None => write!(f, ", root"),
        }
    }
}

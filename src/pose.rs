//! 3D poses: a [`Transform3d`] placed in a [`PoseTree`], plus a name and an ID.

use crate::ambiguity::RotationAmbiguities;
use crate::error::PoseError;
use crate::rotation::Rotation3d;
use crate::transform::Transform3d;
use crate::tree::{NodeId, PoseNode, PoseTree};
use crate::{Point3, Vector3};
use std::f64::consts::PI;
use std::fmt::{self, Debug, Display, Formatter};
use std::ops::Mul;
use tracing::debug;
use uom::si::angle::radian;
use uom::si::f64::Angle;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A user-assigned pose identifier.
///
/// IDs are not unique and are not interpreted by this crate, except that copies of a pose always
/// get [`PoseId::UNOWNED`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct PoseId(pub u32);

impl PoseId {
    /// The ID of poses nobody has claimed, including all copies.
    pub const UNOWNED: PoseId = PoseId(0);
}

impl Display for PoseId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The outcome of [`Pose3d::compare`].
///
/// The differences are reported even when the comparison fails, as far as they were computed:
/// `translation_diff` is `None` only if the two poses could not be related at all, and
/// `angle_diff` is additionally `None` if the translation test already failed or the angle
/// tolerance made the rotation test moot.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Comparison {
    pub is_same: bool,
    /// `other`'s translation minus `self`'s translation, in `self`'s parent frame.
    pub translation_diff: Option<Vector3>,
    pub angle_diff: Option<Angle>,
}

impl Comparison {
    fn unrelated() -> Self {
        Self {
            is_same: false,
            translation_diff: None,
            angle_diff: None,
        }
    }
}

/// A rigid body pose that lives in a [`PoseTree`].
///
/// A pose's [`Transform3d`] maps points from the pose's own frame into its parent's frame. Poses
/// without a parent are _roots_ (or _origins_); every other pose can be expressed with respect to
/// any pose that shares its root through [`Pose3d::get_with_respect_to`].
///
/// # Identity
///
/// There are three ways to get "another" `Pose3d`, and they mean different things:
///
/// - [`Clone`] makes a _copy_: a new pose with the same transform and parent, but its own
///   identity. The copy's ID is [`PoseId::UNOWNED`] and its name gets a `_COPY` suffix. Changing
///   one afterwards never affects the other.
/// - Moving a `Pose3d` transfers its identity (name, ID and tree node) unchanged.
/// - [`Pose3d::share`] returns a second handle to the _same_ logical pose. Changes through either
///   handle are visible through both.
///
/// The node is kept alive as long as any handle to it exists. Once the last handle is dropped,
/// poses that still have it as their parent can no longer be related to anything (see
/// [`PoseTree`] for details).
pub struct Pose3d {
    tree: PoseTree,
    node: NodeId,
}

impl Pose3d {
    /// Creates a root pose.
    pub fn new(tree: &PoseTree, transform: Transform3d, name: impl Into<String>) -> Self {
        let node = tree.arena.borrow_mut().insert(PoseNode {
            transform,
            embedding: (),
            parent: None,
            name: name.into(),
            id: PoseId::UNOWNED,
        });
        Self {
            tree: tree.clone(),
            node,
        }
    }

    /// Creates a root pose with the identity transform.
    pub fn new_root(tree: &PoseTree, name: impl Into<String>) -> Self {
        Self::new(tree, Transform3d::identity(), name)
    }

    /// Creates a pose whose transform is relative to `parent`.
    pub fn with_parent(transform: Transform3d, parent: &Pose3d, name: impl Into<String>) -> Self {
        parent.derive(transform, Some(parent.node), name.into(), PoseId::UNOWNED)
    }

    fn derive(
        &self,
        transform: Transform3d,
        parent: Option<NodeId>,
        name: String,
        id: PoseId,
    ) -> Pose3d {
        let node = self.tree.arena.borrow_mut().insert(PoseNode {
            transform,
            embedding: (),
            parent,
            name,
            id,
        });
        Pose3d {
            tree: self.tree.clone(),
            node,
        }
    }

    /// Returns another handle to this same pose.
    pub fn share(&self) -> Pose3d {
        if let Err(e) = self.tree.arena.borrow_mut().acquire(self.node) {
            debug!(error = %e, "Pose3d.Share.DanglingNode");
        }
        Pose3d {
            tree: self.tree.clone(),
            node: self.node,
        }
    }

    pub fn tree(&self) -> &PoseTree {
        &self.tree
    }

    fn read<R: Default>(&self, f: impl FnOnce(&PoseNode) -> R) -> R {
        // a handle keeps its node alive, so the lookup only fails if the arena is mid-update
        self.tree
            .arena
            .try_borrow()
            .ok()
            .and_then(|arena| arena.node(self.node).ok().map(f))
            .unwrap_or_default()
    }

    fn update(&mut self, f: impl FnOnce(&mut PoseNode)) {
        if let Ok(node) = self.tree.arena.borrow_mut().node_mut(self.node) {
            f(node);
        }
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

    /// The transform from this pose's frame into its parent's frame.
    pub fn transform(&self) -> Transform3d {
        self.read(|node| node.transform)
    }

    pub fn rotation(&self) -> Rotation3d {
        *self.transform().rotation()
    }

    pub fn translation(&self) -> Vector3 {
        *self.transform().translation()
    }

    pub fn set_transform(&mut self, transform: Transform3d) {
        self.update(|node| node.transform = transform);
    }

    pub fn set_rotation(&mut self, rotation: Rotation3d) {
        self.update(|node| node.transform.set_rotation(rotation));
    }

    pub fn set_translation(&mut self, translation: Vector3) {
        self.update(|node| node.transform.set_translation(translation));
    }

    /// Moves the pose by `offset`, given in the parent frame.
    pub fn translate_by(&mut self, offset: &Vector3) {
        self.update(|node| {
            let translation = node.transform.translation() + offset;
            node.transform.set_translation(translation);
        });
    }

    /// Rotates the pose about its parent's origin, ie, both its rotation and its translation.
    pub fn rotate_by(&mut self, rotation: &Rotation3d) {
        self.pre_compose_with(&Transform3d::from_rotation(*rotation));
    }

    /// Replaces the transform `T` with `other · T`.
    pub fn pre_compose_with(&mut self, other: &Transform3d) {
        self.update(|node| node.transform.pre_compose_with(other));
    }

    /// Inverts the transform in place. The parent is unchanged.
    pub fn invert(&mut self) {
        self.update(|node| node.transform.invert());
    }

    /// A copy of this pose (see [`Clone`]) with the inverse transform.
    #[must_use]
    pub fn inverse(&self) -> Pose3d {
        let mut inverse = self.clone();
        inverse.invert();
        inverse
    }

    /// Links this pose under `parent`, keeping its transform (which is now relative to `parent`).
    ///
    /// Fails, leaving the pose untouched, if `parent` is this pose or one of its descendants, or
    /// if `parent` lives in a different [`PoseTree`].
    pub fn set_parent(&mut self, parent: &Pose3d) -> Result<(), PoseError> {
        if !self.tree.same_tree(&parent.tree) {
            return Err(PoseError::DifferentTrees);
        }
        self.tree
            .arena
            .borrow_mut()
            .set_parent(self.node, Some(parent.node))
    }

    /// Turns this pose into a root, keeping its transform.
    pub fn clear_parent(&mut self) -> Result<(), PoseError> {
        self.tree.arena.borrow_mut().set_parent(self.node, None)
    }

    /// Returns a handle to the parent pose (see [`Pose3d::share`]), or `None` for a root.
    pub fn parent(&self) -> Result<Option<Pose3d>, PoseError> {
        let mut arena = self.tree.arena.borrow_mut();
        let Some(parent) = arena.parent(self.node)? else {
            return Ok(None);
        };
        arena.acquire(parent)?;
        Ok(Some(Pose3d {
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

    /// The number of hops from this pose up to its root.
    pub fn depth(&self) -> Result<usize, PoseError> {
        Ok(self.tree.arena.borrow().chain(self.node)?.len() - 1)
    }

    /// Returns a handle to the root of this pose's tree (which is this pose itself for a root).
    pub fn find_root(&self) -> Result<Pose3d, PoseError> {
        let mut arena = self.tree.arena.borrow_mut();
        let root = arena.root(self.node)?;
        arena.acquire(root)?;
        Ok(Pose3d {
            tree: self.tree.clone(),
            node: root,
        })
    }

    /// The number of handles currently holding this pose's node.
    pub fn node_owner_count(&self) -> usize {
        self.tree.arena.borrow().owner_count(self.node)
    }

    pub(crate) fn same_node(&self, other: &Pose3d) -> bool {
        self.node == other.node && self.tree.same_tree(&other.tree)
    }

    /// Expresses this pose relative to `other`.
    ///
    /// The result is a new pose, parented to `other`, whose transform maps this pose's frame into
    /// `other`'s frame. If `other` is this pose's parent the result carries exactly this pose's
    /// transform.
    ///
    /// Returns [`PoseError::NoCommonOrigin`] if the two poses have different roots. That is a
    /// routine outcome (eg, after the robot has been moved to a place unrelated to where it was)
    /// and has no side effects.
    pub fn get_with_respect_to(&self, other: &Pose3d) -> Result<Pose3d, PoseError> {
        if !self.tree.same_tree(&other.tree) {
            return Err(PoseError::DifferentTrees);
        }
        let transform = self
            .tree
            .arena
            .borrow()
            .relative_transform(self.node, other.node)?;
        let name = format!("{}_wrt_{}", self.name(), other.name());
        Ok(self.derive(transform, Some(other.node), name, PoseId::UNOWNED))
    }

    /// Expresses this pose relative to its root.
    pub fn get_with_respect_to_root(&self) -> Result<Pose3d, PoseError> {
        let root = self.find_root()?;
        self.get_with_respect_to(&root)
    }

    /// Returns true if `other` is this pose's direct parent.
    pub fn is_child_of(&self, other: &Pose3d) -> bool {
        self.tree.same_tree(&other.tree) && self.read(|node| node.parent) == Some(other.node)
    }

    /// Returns true if this pose is `other`'s direct parent.
    pub fn is_parent_of(&self, other: &Pose3d) -> bool {
        other.is_child_of(self)
    }

    /// Returns true if `other` is somewhere above this pose.
    pub fn is_descendant_of(&self, other: &Pose3d) -> bool {
        if !self.tree.same_tree(&other.tree) {
            return false;
        }
        self.tree
            .arena
            .borrow()
            .is_ancestor(other.node, self.node)
            .unwrap_or_else(|e| {
                debug!(error = %e, "Pose3d.IsDescendantOf.Failed");
                false
            })
    }

    /// Returns true if this pose is somewhere above `other`.
    pub fn is_ancestor_of(&self, other: &Pose3d) -> bool {
        other.is_descendant_of(self)
    }

    /// Returns true if both poses have the same direct parent, or are both roots.
    pub fn has_same_parent_as(&self, other: &Pose3d) -> bool {
        self.tree.same_tree(&other.tree)
            && self.read(|node| node.parent) == other.read(|node| node.parent)
    }

    /// Returns true if both poses hang off the same root.
    pub fn has_same_root_as(&self, other: &Pose3d) -> bool {
        if !self.tree.same_tree(&other.tree) {
            return false;
        }
        let arena = self.tree.arena.borrow();
        match (arena.root(self.node), arena.root(other.node)) {
            (Ok(a), Ok(b)) => a == b,
            (Err(e), _) | (_, Err(e)) => {
                debug!(error = %e, "Pose3d.HasSameRootAs.Failed");
                false
            }
        }
    }

    /// Finds transforms for this pose and `other` in one common frame.
    ///
    /// If this pose is a root or an ancestor of `other`, that frame is this pose's own (so this
    /// pose is the identity); otherwise it is this pose's parent frame.
    fn reconcile(&self, other: &Pose3d) -> Result<(Transform3d, Transform3d), PoseError> {
        if !self.tree.same_tree(&other.tree) {
            return Err(PoseError::DifferentTrees);
        }
        let arena = self.tree.arena.borrow();
        let parent = arena.parent(self.node)?;
        match parent {
            Some(parent) if !arena.is_ancestor(self.node, other.node)? => Ok((
                arena.node(self.node)?.transform,
                arena.relative_transform(other.node, parent)?,
            )),
            _ => Ok((
                Transform3d::identity(),
                arena.relative_transform(other.node, self.node)?,
            )),
        }
    }

    /// Compares this pose against `other`.
    ///
    /// The translation difference must not exceed `translation_tolerance`. If all three
    /// components of the tolerance are equal, this is a test on the Euclidean distance.
    /// Otherwise the tolerance is per axis, with the axes being those of _this_ pose.
    ///
    /// The rotation difference must not exceed `angle_tolerance`, unless `ambiguities` contains
    /// a rotation within `angle_tolerance` of the rotation between the two poses. Angle
    /// tolerances of π or more accept any rotation.
    ///
    /// Translation and rotation are tested one after the other, not jointly, which is an
    /// approximation: a rotation difference also shows up as (part of) a translation difference
    /// for poses far from their parent's origin.
    ///
    /// Poses that cannot be related (different roots, unowned parents) never compare as the same.
    pub fn compare(
        &self,
        other: &Pose3d,
        translation_tolerance: &Vector3,
        angle_tolerance: Angle,
        ambiguities: Option<&RotationAmbiguities>,
    ) -> Comparison {
        if self.same_node(other) {
            return Comparison {
                is_same: true,
                translation_diff: Some(Vector3::zeros()),
                angle_diff: Some(Angle::new::<radian>(0.)),
            };
        }

        let (this, other) = match self.reconcile(other) {
            Ok(transforms) => transforms,
            Err(e) => {
                debug!(error = %e, "Pose3d.Compare.Unrelated");
                return Comparison::unrelated();
            }
        };

        let diff = other.translation() - this.translation();
        let tol = translation_tolerance;
        let translation_exceeded = if tol.x == tol.y && tol.y == tol.z {
            diff.norm_squared() > tol.x * tol.x
        } else {
            let local = this.rotation().inverse() * diff;
            local
                .iter()
                .zip(tol.iter())
                .any(|(d, t)| d.abs() > *t)
        };
        if translation_exceeded {
            return Comparison {
                is_same: false,
                translation_diff: Some(diff),
                angle_diff: None,
            };
        }

        if angle_tolerance >= Angle::new::<radian>(PI) {
            return Comparison {
                is_same: true,
                translation_diff: Some(diff),
                angle_diff: None,
            };
        }

        let angle_diff = this.rotation().angle_diff_from(other.rotation());
        let is_same = angle_diff <= angle_tolerance
            || ambiguities.is_some_and(|ambiguities| {
                let rotation_diff = this.rotation().inverse() * *other.rotation();
                ambiguities.is_rotation_same(&rotation_diff, angle_tolerance)
            });
        Comparison {
            is_same,
            translation_diff: Some(diff),
            angle_diff: Some(angle_diff),
        }
    }

    /// Returns true if `other` is within `distance` and `angle` of this pose.
    pub fn is_same_as(&self, other: &Pose3d, distance: f64, angle: Angle) -> bool {
        self.compare(other, &Vector3::repeat(distance), angle, None)
            .is_same
    }

    /// Like [`Pose3d::is_same_as`], but with a per-axis translation tolerance in this pose's frame.
    pub fn is_same_as_within(
        &self,
        other: &Pose3d,
        translation_tolerance: &Vector3,
        angle: Angle,
    ) -> bool {
        self.compare(other, translation_tolerance, angle, None)
            .is_same
    }

    /// Like [`Pose3d::is_same_as_within`], but also accepting rotation differences that match one
    /// of `ambiguities`.
    pub fn is_same_as_with_ambiguity(
        &self,
        other: &Pose3d,
        ambiguities: &RotationAmbiguities,
        translation_tolerance: &Vector3,
        angle: Angle,
    ) -> bool {
        self.compare(other, translation_tolerance, angle, Some(ambiguities))
            .is_same
    }
}

impl Clone for Pose3d {
    /// Copies the pose into a new node with the same transform and parent, a `_COPY` name and
    /// [`PoseId::UNOWNED`].
    fn clone(&self) -> Self {
        let (transform, parent, name) =
            self.read(|node| (node.transform, node.parent, node.name.clone()));
        self.derive(transform, parent, format!("{name}_COPY"), PoseId::UNOWNED)
    }
}

impl Drop for Pose3d {
    fn drop(&mut self) {
        // a handle is never dropped while the arena is borrowed, but don't panic in drop if it is
        if let Ok(mut arena) = self.tree.arena.try_borrow_mut() {
            arena.release(self.node);
        }
    }
}

impl Mul<&Pose3d> for &Pose3d {
    type Output = Pose3d;

    /// Composes the two transforms. The result has the left-hand pose's parent.
    fn mul(self, rhs: &Pose3d) -> Self::Output {
        let (transform, parent) = self.read(|node| (node.transform, node.parent));
        let name = format!("{}*{}", self.name(), rhs.name());
        self.derive(transform * rhs.transform(), parent, name, PoseId::UNOWNED)
    }
}

impl Mul<Point3> for &Pose3d {
    type Output = Point3;

    /// Maps a point from this pose's frame into its parent's frame.
    fn mul(self, rhs: Point3) -> Self::Output {
        self.transform().apply_to(&rhs)
    }
}

impl Debug for Pose3d {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let (name, id, transform, parent) = self.read(|node| {
            (node.name.clone(), node.id, node.transform, node.parent)
        });
        f.debug_struct("Pose3d")
            .field("name", &name)
            .field("id", &id)
            .field("transform", &transform)
            .field("parent", &parent)
            .finish()
    }
}

impl Display for Pose3d {
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
        write!(f, "{} (id {}): {}", self.name(), self.id(), self.transform())?;
        match parent_name {
            Some(parent) => write!(f, ", parent {parent}"),
            None => write!(f, ", root"),
        }
    }
}

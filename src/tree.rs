//! The arena that stores pose nodes and their parent links.
//!
//! Every [`Pose3d`](crate::Pose3d) is a handle into a [`PoseTree`], and every
//! [`Pose2d`](crate::Pose2d) a handle into a [`PoseTree2d`]. The tree is a generational
//! arena: a [`NodeId`] names a slot plus the generation of the node that lived there when the
//! handle was created, so a handle to a freed node is detected rather than silently aliasing
//! whatever node reuses the slot.
//!
//! Each slot counts two kinds of references:
//!
//! - _owners_, the pose handles holding the node, and
//! - _children_, the nodes whose parent link points at it.
//!
//! A node is freed once both counts reach zero. A node whose owners are all gone but which still
//! has children is _unowned_. Its children keep it alive, but walking through it is an error
//! ([`PoseError::UnownedParent`]) unless the tree's policy allows unowned parents, either
//! permanently through [`PoseTreeConfig`] or temporarily through
//! [`PoseTree::with_unowned_parents_allowed`].

use crate::error::PoseError;
use crate::pose::PoseId;
use crate::pose2d::Plane;
use crate::transform::{Transform2d, Transform3d};
use std::cell::RefCell;
use std::fmt;
use std::ops::Mul;
use std::rc::Rc;
use tracing::{error, trace};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Policy knobs for a [`PoseTree`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PoseTreeConfig {
    /// Tolerate nodes that have lost all their owners while children still point at them.
    ///
    /// This should normally be `false` so that such dangling parents are reported. Bulk teardown
    /// (eg, dropping a [`PoseOriginList`](crate::PoseOriginList)) uses
    /// [`PoseTree::with_unowned_parents_allowed`] instead of flipping this flag.
    pub allow_unowned_parents: bool,
}

mod sealed {
    pub trait Sealed {}

    impl Sealed for crate::Transform3d {}
    impl Sealed for crate::Transform2d {}
}

/// The transforms a [`PoseTree`] can store: [`Transform3d`] and [`Transform2d`].
pub trait TreeTransform:
    sealed::Sealed + Copy + fmt::Debug + Default + Mul<Output = Self>
{
    /// Per-node data kept next to the transform.
    type Embedding: Copy + fmt::Debug + Default;

    fn identity() -> Self;
    fn inverse(&self) -> Self;
}

impl TreeTransform for Transform3d {
    type Embedding = ();

    fn identity() -> Self {
        Transform3d::identity()
    }

    fn inverse(&self) -> Self {
        Transform3d::inverse(self)
    }
}

impl TreeTransform for Transform2d {
    /// The plane the 2D frame is embedded in.
    type Embedding = Plane;

    fn identity() -> Self {
        Transform2d::identity()
    }

    fn inverse(&self) -> Self {
        Transform2d::inverse(self)
    }
}

/// A handle to a slot in a [`PoseTree`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct NodeId {
    index: u32,
    generation: u32,
}

/// The data stored for each pose.
#[derive(Clone, Debug)]
pub(crate) struct PoseNode<T: TreeTransform = Transform3d> {
    pub(crate) transform: T,
    pub(crate) embedding: T::Embedding,
    pub(crate) parent: Option<NodeId>,
    pub(crate) name: String,
    pub(crate) id: PoseId,
}

impl<T: TreeTransform> Default for PoseNode<T> {
    fn default() -> Self {
        Self {
            transform: T::default(),
            embedding: T::Embedding::default(),
            parent: None,
            name: String::new(),
            id: PoseId::UNOWNED,
        }
    }
}

#[derive(Debug)]
struct Entry<T: TreeTransform> {
    node: PoseNode<T>,
    owners: usize,
    children: usize,
}

#[derive(Debug)]
struct Slot<T: TreeTransform> {
    generation: u32,
    entry: Option<Entry<T>>,
}

#[derive(Debug)]
pub(crate) struct PoseArena<T: TreeTransform = Transform3d> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    live: usize,
    config: PoseTreeConfig,
    teardown_depth: usize,
}

impl<T: TreeTransform> Default for PoseArena<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            config: PoseTreeConfig::default(),
            teardown_depth: 0,
        }
    }
}

impl<T: TreeTransform> PoseArena<T> {
    fn unowned_parents_allowed(&self) -> bool {
        self.config.allow_unowned_parents || self.teardown_depth > 0
    }

    fn entry(&self, id: NodeId) -> Result<&Entry<T>, PoseError> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_ref())
            .ok_or(PoseError::DanglingNode)
    }

    fn entry_mut(&mut self, id: NodeId) -> Result<&mut Entry<T>, PoseError> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_mut())
            .ok_or(PoseError::DanglingNode)
    }

    pub(crate) fn node(&self, id: NodeId) -> Result<&PoseNode<T>, PoseError> {
        self.entry(id).map(|entry| &entry.node)
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut PoseNode<T>, PoseError> {
        self.entry_mut(id).map(|entry| &mut entry.node)
    }

    /// Stores `node` with a single owner and links it to its parent, if any.
    ///
    /// Callers always link to a parent they own, so the parent is live. Should it not be, the
    /// node is stored as a root instead.
    pub(crate) fn insert(&mut self, mut node: PoseNode<T>) -> NodeId {
        if let Some(parent) = node.parent {
            match self.entry_mut(parent) {
                Ok(parent_entry) => parent_entry.children += 1,
                Err(_) => {
                    error!(name = %node.name, "PoseTree.Insert.DanglingParent");
                    node.parent = None;
                }
            }
        }

        let entry = Entry {
            node,
            owners: 1,
            children: 0,
        };
        self.live += 1;
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.entry = Some(entry);
                NodeId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                NodeId {
                    index,
                    generation: 0,
                }
            }
        }
    }

    pub(crate) fn acquire(&mut self, id: NodeId) -> Result<(), PoseError> {
        self.entry_mut(id)?.owners += 1;
        Ok(())
    }

    /// Drops one owner of `id`, freeing it (and any ancestors that only it kept alive) once
    /// nothing references it anymore.
    pub(crate) fn release(&mut self, id: NodeId) {
        let allowed = self.unowned_parents_allowed();
        let Ok(entry) = self.entry_mut(id) else {
            return;
        };
        entry.owners = entry.owners.saturating_sub(1);
        if entry.owners > 0 {
            return;
        }
        if entry.children > 0 {
            if !allowed {
                error!(
                    name = %entry.node.name,
                    children = entry.children,
                    "PoseTree.Release.UnownedParent"
                );
            }
            return;
        }
        self.free_cascading(id);
    }

    /// Frees `id` and walks up the tree freeing every parent that is left with neither owners
    /// nor children.
    fn free_cascading(&mut self, id: NodeId) {
        let mut next = Some(id);
        while let Some(id) = next.take() {
            let Some(slot) = self.slots.get_mut(id.index as usize) else {
                return;
            };
            let Some(entry) = slot.entry.take() else {
                return;
            };
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(id.index);
            self.live -= 1;
            trace!(name = %entry.node.name, "PoseTree.Free");

            if let Some(parent) = entry.node.parent {
                if let Ok(parent_entry) = self.entry_mut(parent) {
                    parent_entry.children = parent_entry.children.saturating_sub(1);
                    if parent_entry.children == 0 && parent_entry.owners == 0 {
                        next = Some(parent);
                    }
                }
            }
        }
    }

    pub(crate) fn owner_count(&self, id: NodeId) -> usize {
        self.entry(id).map_or(0, |entry| entry.owners)
    }

    /// The parent of `id`, refusing to hand out unowned parents unless the policy allows them.
    pub(crate) fn parent(&self, id: NodeId) -> Result<Option<NodeId>, PoseError> {
        let Some(parent) = self.node(id)?.parent else {
            return Ok(None);
        };
        let entry = self.entry(parent)?;
        if entry.owners == 0 && !self.unowned_parents_allowed() {
            return Err(PoseError::UnownedParent {
                name: entry.node.name.clone(),
            });
        }
        Ok(Some(parent))
    }

    /// `id` followed by all of its ancestors, ending at its root.
    pub(crate) fn chain(&self, id: NodeId) -> Result<Vec<NodeId>, PoseError> {
        let mut chain = vec![id];
        let mut current = id;
        while let Some(parent) = self.parent(current)? {
            chain.push(parent);
            current = parent;
        }
        Ok(chain)
    }

    pub(crate) fn root(&self, id: NodeId) -> Result<NodeId, PoseError> {
        let chain = self.chain(id)?;
        Ok(*chain.last().unwrap_or(&id))
    }

    /// Returns true if `ancestor` appears strictly above `id`.
    pub(crate) fn is_ancestor(&self, ancestor: NodeId, id: NodeId) -> Result<bool, PoseError> {
        Ok(self.chain(id)?.iter().skip(1).any(|&n| n == ancestor))
    }

    /// Re-links `id` under `parent` (or makes it a root).
    ///
    /// Fails without changing anything if `parent` is `id` itself or one of its descendants.
    pub(crate) fn set_parent(
        &mut self,
        id: NodeId,
        parent: Option<NodeId>,
    ) -> Result<(), PoseError> {
        let old = self.node(id)?.parent;
        if old == parent {
            return Ok(());
        }

        if let Some(parent) = parent {
            // walk the raw links: unowned nodes still count towards cycles
            let mut current = Some(parent);
            while let Some(n) = current {
                if n == id {
                    return Err(PoseError::CycleDetected {
                        child: self.node(id)?.name.clone(),
                        parent: self.node(parent)?.name.clone(),
                    });
                }
                current = self.node(n)?.parent;
            }
            self.entry_mut(parent)?.children += 1;
        }

        self.node_mut(id)?.parent = parent;

        if let Some(old) = old {
            if let Ok(old_entry) = self.entry_mut(old) {
                old_entry.children = old_entry.children.saturating_sub(1);
                if old_entry.children == 0 && old_entry.owners == 0 {
                    self.free_cascading(old);
                }
            }
        }
        Ok(())
    }

    /// Composes the transforms of `nodes` (ordered child first) into a single transform that
    /// maps the first node's frame into the frame of the last node's parent.
    ///
    /// Returns `None` for an empty slice instead of composing with the identity, so that a single
    /// hop reproduces the stored transform bit for bit.
    fn compose_upwards(&self, nodes: &[NodeId]) -> Result<Option<T>, PoseError> {
        let mut accumulated: Option<T> = None;
        for &n in nodes {
            let transform = self.node(n)?.transform;
            accumulated = Some(match accumulated {
                None => transform,
                Some(below) => transform * below,
            });
        }
        Ok(accumulated)
    }

    /// The transform mapping `from`'s frame into `to`'s frame.
    ///
    /// Both chains are walked up to their lowest common ancestor; the result is
    /// `(to → ancestor)⁻¹ · (from → ancestor)`.
    pub(crate) fn relative_transform(
        &self,
        from: NodeId,
        to: NodeId,
    ) -> Result<T, PoseError> {
        if from == to {
            return Ok(T::identity());
        }

        let from_chain = self.chain(from)?;
        let to_chain = self.chain(to)?;
        if from_chain.last() != to_chain.last() {
            return Err(PoseError::NoCommonOrigin);
        }

        let (mut i, mut j) = (from_chain.len(), to_chain.len());
        while i > 0 && j > 0 && from_chain[i - 1] == to_chain[j - 1] {
            i -= 1;
            j -= 1;
        }

        let from_side = self.compose_upwards(&from_chain[..i])?;
        let to_side = self.compose_upwards(&to_chain[..j])?;
        Ok(match (from_side, to_side) {
            (None, None) => T::identity(),
            (Some(from_side), None) => from_side,
            (None, Some(to_side)) => to_side.inverse(),
            (Some(from_side), Some(to_side)) => to_side.inverse() * from_side,
        })
    }
}

/// A shared arena of pose nodes.
///
/// Cloning a `PoseTree` produces another handle to the same arena. Poses can only be related to
/// poses in the same tree; typically a process has one tree, owned by its
/// [`PoseOriginList`](crate::PoseOriginList).
///
/// The tree is single-threaded (`!Send`, `!Sync`); callers that need to share poses across threads
/// must serialize them (eg, through [`PoseStruct3d`](crate::PoseStruct3d)).
///
/// 2D poses live in trees of their own, [`PoseTree2d`].
pub struct PoseTree<T: TreeTransform = Transform3d> {
    pub(crate) arena: Rc<RefCell<PoseArena<T>>>,
}

/// A tree of [`Pose2d`](crate::Pose2d)s.
pub type PoseTree2d = PoseTree<Transform2d>;

impl<T: TreeTransform> Clone for PoseTree<T> {
    fn clone(&self) -> Self {
        Self {
            arena: Rc::clone(&self.arena),
        }
    }
}

impl<T: TreeTransform> Default for PoseTree<T> {
    fn default() -> Self {
        Self::from_config(PoseTreeConfig::default())
    }
}

impl PoseTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: PoseTreeConfig) -> Self {
        Self::from_config(config)
    }
}

impl<T: TreeTransform> PoseTree<T> {
    fn from_config(config: PoseTreeConfig) -> Self {
        Self {
            arena: Rc::new(RefCell::new(PoseArena {
                config,
                ..PoseArena::default()
            })),
        }
    }

    pub fn config(&self) -> PoseTreeConfig {
        self.arena.borrow().config
    }

    pub fn set_allow_unowned_parents(&self, allow: bool) {
        self.arena.borrow_mut().config.allow_unowned_parents = allow;
    }

    /// Runs `f` with unowned parents tolerated, restoring the previous policy afterwards (also
    /// if `f` panics).
    ///
    /// This is meant for bulk teardown, where poses are dropped in an order that briefly leaves
    /// children pointing at parents nobody owns anymore.
    pub fn with_unowned_parents_allowed<R>(&self, f: impl FnOnce() -> R) -> R {
        struct Restore<'a, T: TreeTransform>(&'a PoseTree<T>);

        impl<T: TreeTransform> Drop for Restore<'_, T> {
            fn drop(&mut self) {
                if let Ok(mut arena) = self.0.arena.try_borrow_mut() {
                    arena.teardown_depth = arena.teardown_depth.saturating_sub(1);
                }
            }
        }

        self.arena.borrow_mut().teardown_depth += 1;
        let _restore = Restore(self);
        f()
    }

    /// The number of live nodes (owned or not).
    pub fn len(&self) -> usize {
        self.arena.borrow().live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if `self` and `other` are handles to the same arena.
    pub fn same_tree(&self, other: &PoseTree<T>) -> bool {
        Rc::ptr_eq(&self.arena, &other.arena)
    }
}

impl<T: TreeTransform> fmt::Debug for PoseTree<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.arena.try_borrow() {
            Ok(arena) => f
                .debug_struct("PoseTree")
                .field("live", &arena.live)
                .field("config", &arena.config)
                .finish(),
            Err(_) => f.write_str("PoseTree { <borrowed> }"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{PoseArena, PoseNode, PoseTree, PoseTreeConfig};
    use crate::error::PoseError;
    use crate::{Rotation3d, Transform3d, Vector3};
    use approx::assert_relative_eq;
    use uom::si::angle::degree;
    use uom::si::f64::Angle;

    fn node(name: &str, parent: Option<super::NodeId>, transform: Transform3d) -> PoseNode {
        PoseNode {
            transform,
            parent,
            name: name.to_owned(),
            ..PoseNode::default()
        }
    }

    fn shift(x: f64) -> Transform3d {
        Transform3d::from_translation(Vector3::new(x, 0., 0.))
    }

    #[test]
    fn freed_slots_are_reused_with_new_generation() {
        let mut arena = PoseArena::default();
        let a = arena.insert(node("a", None, shift(1.)));
        arena.release(a);
        assert_eq!(arena.live, 0);
        let b = arena.insert(node("b", None, shift(2.)));
        assert_eq!(a.index, b.index);
        assert_ne!(a, b);
        assert!(matches!(arena.node(a), Err(PoseError::DanglingNode)));
        assert_eq!(arena.node(b).unwrap().name, "b");
    }

    #[test]
    fn unowned_parent_stays_alive_until_children_leave() {
        let mut arena = PoseArena::default();
        let root = arena.insert(node("root", None, shift(1.)));
        let child = arena.insert(node("child", Some(root), shift(2.)));

        arena.release(root);
        assert_eq!(arena.live, 2);
        assert_eq!(arena.owner_count(root), 0);
        assert_eq!(
            arena.chain(child),
            Err(PoseError::UnownedParent {
                name: "root".to_owned()
            })
        );

        // dropping the last child frees the parent too
        arena.release(child);
        assert_eq!(arena.live, 0);
    }

    #[test]
    fn policy_allows_walking_through_unowned_parents() {
        let mut arena = PoseArena {
            config: PoseTreeConfig {
                allow_unowned_parents: true,
            },
            ..PoseArena::default()
        };
        let root = arena.insert(node("root", None, shift(1.)));
        let child = arena.insert(node("child", Some(root), shift(2.)));
        arena.release(root);
        assert_eq!(arena.chain(child).unwrap(), vec![child, root]);
    }

    #[test]
    fn cycles_are_rejected_without_mutation() {
        let mut arena = PoseArena::default();
        let a = arena.insert(node("a", None, shift(1.)));
        let b = arena.insert(node("b", Some(a), shift(1.)));
        let c = arena.insert(node("c", Some(b), shift(1.)));

        assert!(matches!(
            arena.set_parent(a, Some(c)),
            Err(PoseError::CycleDetected { .. })
        ));
        assert!(matches!(
            arena.set_parent(a, Some(a)),
            Err(PoseError::CycleDetected { .. })
        ));
        assert_eq!(arena.node(a).unwrap().parent, None);
        assert_eq!(arena.chain(c).unwrap(), vec![c, b, a]);
    }

    #[test]
    fn reparenting_moves_the_child_count() {
        let mut arena = PoseArena::default();
        let old = arena.insert(node("old", None, shift(1.)));
        let new = arena.insert(node("new", None, shift(1.)));
        let child = arena.insert(node("child", Some(old), shift(1.)));

        arena.release(old);
        assert_eq!(arena.live, 3);
        arena.set_parent(child, Some(new)).unwrap();
        // nothing references `old` anymore
        assert_eq!(arena.live, 2);
        assert_eq!(arena.root(child).unwrap(), new);
    }

    #[test]
    fn relative_transform_through_common_ancestor() {
        let mut arena = PoseArena::default();
        let quarter = Rotation3d::from_axis_angle(Angle::new::<degree>(90.), &Vector3::z());
        let root = arena.insert(node("root", None, Transform3d::identity()));
        let a = arena
            .insert(node("a", Some(root), Transform3d::new(quarter, Vector3::new(1., 0., 0.))));
        let b = arena.insert(node("b", Some(root), shift(5.)));
        let a_child = arena.insert(node("a_child", Some(a), shift(1.)));

        // a_child sits at (1, 1, 0) in root; b sits at (5, 0, 0)
        let t = arena.relative_transform(a_child, b).unwrap();
        assert_relative_eq!(*t.translation(), Vector3::new(-4., 1., 0.), epsilon = 1e-12);
        assert_relative_eq!(*t.rotation(), quarter, epsilon = 1e-12);

        // direct parent: exactly the stored transform
        assert_eq!(arena.relative_transform(a_child, a).unwrap(), shift(1.));
        assert_eq!(arena.relative_transform(b, b).unwrap(), Transform3d::identity());
    }

    #[test]
    fn separate_roots_have_no_common_origin() {
        let mut arena = PoseArena::default();
        let a = arena.insert(node("a", None, shift(1.)));
        let b = arena.insert(node("b", None, shift(1.)));
        assert_eq!(arena.relative_transform(a, b), Err(PoseError::NoCommonOrigin));
    }

    #[test]
    fn teardown_scope_is_restored() {
        let tree = PoseTree::new();
        tree.with_unowned_parents_allowed(|| {
            assert!(tree.arena.borrow().unowned_parents_allowed());
            tree.with_unowned_parents_allowed(|| {});
            assert!(tree.arena.borrow().unowned_parents_allowed());
        });
        assert!(!tree.arena.borrow().unowned_parents_allowed());
        assert!(tree.is_empty());
        assert!(tree.same_tree(&tree.clone()));
        assert!(!tree.same_tree(&PoseTree::new()));
    }
}

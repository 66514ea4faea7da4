//! Bookkeeping for the disconnected roots ("origins") of a [`PoseTree`].

use crate::error::PoseError;
use crate::pose::{Pose3d, PoseId};
use crate::transform::Transform3d;
use crate::tree::PoseTree;
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use tracing::{debug, warn};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Identifies an origin within a [`PoseOriginList`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct PoseOriginId(pub u32);

impl PoseOriginId {
    /// Reserved for "not rooted at any known origin"; never names a stored origin.
    pub const UNKNOWN: PoseOriginId = PoseOriginId(0);
}

impl Display for PoseOriginId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The set of origins a robot has lived in, one of which is current.
///
/// Whenever a robot loses track of where it is (eg, it was picked up), it starts a new origin that
/// is unrelated to all the old ones. If it later recognises something it saw in an older origin,
/// the two frames can be linked again through [`PoseOriginList::rejigger`], and the resulting
/// chains of origins collapsed through [`PoseOriginList::flatten`].
///
/// The list owns its origins. Poses elsewhere may be parented to them, so origins are always
/// updated in place and never replaced.
pub struct PoseOriginList {
    tree: PoseTree,
    origins: BTreeMap<PoseOriginId, Pose3d>,
    current: PoseOriginId,
    next_id: u32,
}

impl Default for PoseOriginList {
    fn default() -> Self {
        Self::new(&PoseTree::new())
    }
}

impl PoseOriginList {
    /// Creates an empty list whose origins live in `tree`.
    pub fn new(tree: &PoseTree) -> Self {
        Self {
            tree: tree.clone(),
            origins: BTreeMap::new(),
            current: PoseOriginId::UNKNOWN,
            next_id: 1,
        }
    }

    pub fn tree(&self) -> &PoseTree {
        &self.tree
    }

    /// Adds an origin under the next free ID and makes it current.
    pub fn add_new_origin(&mut self) -> Result<PoseOriginId, PoseError> {
        let mut id = PoseOriginId(self.next_id);
        while self.origins.contains_key(&id) || id == PoseOriginId::UNKNOWN {
            id = PoseOriginId(id.0.wrapping_add(1));
        }
        self.add_origin_with_id(id)
    }

    /// Adds an origin with the given ID and makes it current.
    ///
    /// IDs handed out by [`PoseOriginList::add_new_origin`] afterwards are larger than `id`.
    pub fn add_origin_with_id(&mut self, id: PoseOriginId) -> Result<PoseOriginId, PoseError> {
        if id == PoseOriginId::UNKNOWN {
            warn!(%id, "PoseOriginList.AddOrigin.InvalidId");
            return Err(PoseError::InvalidOriginId(id));
        }
        if self.origins.contains_key(&id) {
            warn!(%id, "PoseOriginList.AddOrigin.DuplicateId");
            return Err(PoseError::DuplicateOriginId(id));
        }

        let mut origin = Pose3d::new_root(&self.tree, format!("PoseOrigin{id}"));
        origin.set_id(PoseId(id.0));
        self.origins.insert(id, origin);
        self.current = id;
        self.next_id = self.next_id.max(id.0.saturating_add(1));
        debug!(%id, count = self.origins.len(), "PoseOriginList.AddOrigin");
        Ok(id)
    }

    pub fn origin_by_id(&self, id: PoseOriginId) -> Result<&Pose3d, PoseError> {
        self.origins.get(&id).ok_or_else(|| {
            warn!(%id, "PoseOriginList.OriginById.Unknown");
            PoseError::UnknownOrigin(id)
        })
    }

    pub fn current_origin_id(&self) -> PoseOriginId {
        self.current
    }

    pub fn current_origin(&self) -> Result<&Pose3d, PoseError> {
        self.origin_by_id(self.current)
    }

    pub fn contains(&self, id: PoseOriginId) -> bool {
        self.origins.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.origins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }

    /// The origins in ascending ID order.
    pub fn iter(&self) -> impl Iterator<Item = (PoseOriginId, &Pose3d)> {
        self.origins.iter().map(|(&id, origin)| (id, origin))
    }

    /// The ID of the stored origin at the root of `pose`'s tree, or
    /// [`PoseOriginId::UNKNOWN`] if that root is not one of this list's origins.
    pub fn origin_id_of(&self, pose: &Pose3d) -> PoseOriginId {
        let root = match pose.find_root() {
            Ok(root) => root,
            Err(e) => {
                debug!(error = %e, "PoseOriginList.OriginIdOf.NoRoot");
                return PoseOriginId::UNKNOWN;
            }
        };
        self.origins
            .iter()
            .find(|(_, origin)| origin.same_node(&root))
            .map_or(PoseOriginId::UNKNOWN, |(&id, _)| id)
    }

    /// Links the current origin under the origin `new_id`, and makes `new_id` current.
    ///
    /// Afterwards, the old current origin's pose relative to `new_id` is exactly `transform`.
    /// Everything that was expressed in the old origin can thereby be expressed in the new one.
    ///
    /// Fails without changing anything if `new_id` is unknown or already current, or if the
    /// current origin has been rejiggered before (ie, it is no longer an identity root).
    pub fn rejigger(
        &mut self,
        new_id: PoseOriginId,
        transform: Transform3d,
    ) -> Result<(), PoseError> {
        let new_origin = self.origin_by_id(new_id)?.share();
        if new_id == self.current {
            warn!(%new_id, "PoseOriginList.Rejigger.AlreadyCurrent");
            return Err(PoseError::AlreadyCurrentOrigin(new_id));
        }
        let current_id = self.current;
        let current = self
            .origins
            .get_mut(&current_id)
            .ok_or(PoseError::UnknownOrigin(current_id))?;
        if !current.is_root() || current.transform() != Transform3d::identity() {
            let name = current.name();
            warn!(%name, "PoseOriginList.Rejigger.AlreadyRejiggered");
            return Err(PoseError::AlreadyRejiggered { name });
        }

        current.set_parent(&new_origin)?;
        current.set_transform(transform);
        let name = format!("{}_REJIGGERED", current.name());
        current.set_name(name);
        debug!(from = %current_id, to = %new_id, "PoseOriginList.Rejigger");
        self.current = new_id;
        Ok(())
    }

    /// Re-expresses every origin that hangs (indirectly) off another origin directly relative to
    /// the origin `world_id`. Returns the number of origins that were re-parented.
    ///
    /// Roots and origins already directly under `world_id` are left alone. All origins are
    /// checked before any is changed, so on error nothing has been modified.
    pub fn flatten(&mut self, world_id: PoseOriginId) -> Result<usize, PoseError> {
        let world = self.origin_by_id(world_id)?.share();

        let mut updates = Vec::new();
        for (&id, origin) in &self.origins {
            if id == world_id || !origin.has_parent() || origin.is_child_of(&world) {
                continue;
            }
            if world.is_descendant_of(origin) {
                warn!(%id, %world_id, "PoseOriginList.Flatten.AncestorOfWorld");
                return Err(PoseError::CycleDetected {
                    child: origin.name(),
                    parent: world.name(),
                });
            }
            let relative = origin.get_with_respect_to(&world).inspect_err(|e| {
                warn!(%id, %world_id, error = %e, "PoseOriginList.Flatten.Unrelated");
            })?;
            updates.push((id, relative.transform()));
        }

        for (id, transform) in &updates {
            let Some(origin) = self.origins.get_mut(id) else {
                continue;
            };
            origin.set_parent(&world)?;
            origin.set_transform(*transform);
            let name = format!("{}_FLATTENED", origin.name());
            origin.set_name(name);
        }
        debug!(%world_id, flattened = updates.len(), "PoseOriginList.Flatten");
        Ok(updates.len())
    }

    /// Checks that every origin's parent is still owned by some pose.
    pub fn sanity_check(&self) -> Result<(), PoseError> {
        for (id, origin) in &self.origins {
            if let Err(e) = origin.parent() {
                warn!(%id, error = %e, "PoseOriginList.SanityCheck.Failed");
                return Err(e);
            }
        }
        Ok(())
    }
}

impl Drop for PoseOriginList {
    fn drop(&mut self) {
        // origins are dropped in ID order, which may drop a parent before its rejiggered children
        let tree = self.tree.clone();
        tree.with_unowned_parents_allowed(|| self.origins.clear());
    }
}

impl Display for PoseOriginList {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PoseOriginList ({} origins, current {})",
            self.origins.len(),
            self.current
        )?;
        for (id, origin) in &self.origins {
            write!(f, "\n  {id}: {origin}")?;
        }
        Ok(())
    }
}

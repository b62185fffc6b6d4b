//! Bounded interaction sets tracked inside the movement state.
//!
//! Each set is a plain ordered list of copyable entries; identity is the
//! collider handle (or the stable actor id for modifiers). The lists are
//! sized once and reused, and a state copy replicates them entry by entry.
//! Entries beyond the shared cache capacity are dropped in release builds
//! and fail a debug assertion in development builds.

use collision_cache::{CollisionType, OverlapHit, CACHE_SIZE};
use rapier3d::prelude::ColliderHandle;

/// A networked object the mover is currently touching.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Collision {
    pub collider: ColliderHandle,
    /// Stable id of the owning actor, `0` when the collider is anonymous
    /// scene geometry.
    pub actor_id: u64,
}

/// Tracked collider overlaps that enter/exit callbacks and the networked
/// state are derived from.
#[derive(Clone, Debug)]
pub struct Collisions {
    entries: Vec<Collision>,
}

impl Collisions {
    pub fn new() -> Self {
        Self {
            entries: Vec::with_capacity(CACHE_SIZE),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Collision] {
        &self.entries
    }

    pub fn has_collider(&self, collider: ColliderHandle) -> bool {
        self.entries.iter().any(|entry| entry.collider == collider)
    }

    pub fn has_actor(&self, actor_id: u64) -> bool {
        actor_id != 0 && self.entries.iter().any(|entry| entry.actor_id == actor_id)
    }

    pub fn add(&mut self, collider: ColliderHandle, actor_id: u64) {
        if self.entries.len() == CACHE_SIZE {
            debug_assert!(false, "collision set full, entry dropped");
            return;
        }
        self.entries.push(Collision { collider, actor_id });
    }

    pub fn remove(&mut self, collider: ColliderHandle) -> bool {
        if let Some(index) = self
            .entries
            .iter()
            .position(|entry| entry.collider == collider)
        {
            self.entries.remove(index);
            return true;
        }

        false
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn copy_from_other(&mut self, other: &Self) {
        self.entries.clear();
        self.entries.extend_from_slice(&other.entries);
    }
}

impl Default for Collisions {
    fn default() -> Self {
        Self::new()
    }
}

/// One collider touched this tick within radius + extent.
///
/// `collision_type` is only meaningful for penetrating contacts; colliders
/// inside the extent margin but not the capsule itself carry `None`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TouchHit {
    pub collider: ColliderHandle,
    pub collision_type: CollisionType,
}

/// All colliders the mover touched during the last step.
#[derive(Clone, Debug)]
pub struct Hits {
    entries: Vec<TouchHit>,
}

impl Hits {
    pub fn new() -> Self {
        Self {
            entries: Vec::with_capacity(CACHE_SIZE),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[TouchHit] {
        &self.entries
    }

    pub fn has_collider(&self, collider: ColliderHandle) -> bool {
        self.entries.iter().any(|entry| entry.collider == collider)
    }

    pub fn add(&mut self, hit: &OverlapHit) {
        if self.entries.len() == CACHE_SIZE {
            debug_assert!(false, "touch set full, entry dropped");
            return;
        }
        self.entries.push(TouchHit {
            collider: hit.collider,
            collision_type: hit.collision_type,
        });
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn copy_from_other(&mut self, other: &Self) {
        self.entries.clear();
        self.entries.extend_from_slice(&other.entries);
    }
}

impl Default for Hits {
    fn default() -> Self {
        Self::new()
    }
}

/// A collider excluded from all queries of this mover.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ignore {
    pub collider: ColliderHandle,
    pub actor_id: u64,
}

/// Colliders excluded from queries, e.g. the mover's own vehicle.
#[derive(Clone, Debug)]
pub struct Ignores {
    entries: Vec<Ignore>,
}

impl Ignores {
    pub fn new() -> Self {
        Self {
            entries: Vec::with_capacity(CACHE_SIZE),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Ignore] {
        &self.entries
    }

    pub fn has_collider(&self, collider: ColliderHandle) -> bool {
        self.entries.iter().any(|entry| entry.collider == collider)
    }

    /// Adds an ignore entry. With `check_existing` a collider already present
    /// is not duplicated. Returns whether the entry is now present.
    pub fn add(&mut self, collider: ColliderHandle, actor_id: u64, check_existing: bool) -> bool {
        if check_existing && self.has_collider(collider) {
            return true;
        }

        if self.entries.len() == CACHE_SIZE {
            debug_assert!(false, "ignore set full, entry dropped");
            return false;
        }

        self.entries.push(Ignore { collider, actor_id });
        true
    }

    pub fn remove(&mut self, collider: ColliderHandle) -> bool {
        if let Some(index) = self
            .entries
            .iter()
            .position(|entry| entry.collider == collider)
        {
            self.entries.remove(index);
            return true;
        }

        false
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn copy_from_other(&mut self, other: &Self) {
        self.entries.clear();
        self.entries.extend_from_slice(&other.entries);
    }
}

impl Default for Ignores {
    fn default() -> Self {
        Self::new()
    }
}

/// A gameplay attachment registered on the mover by stable actor id.
///
/// The id is resolved to processor callbacks by the stage pipeline; the
/// state itself only tracks membership so it stays copyable and
/// serializable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Modifier {
    pub actor_id: u64,
}

/// Registered gameplay attachments.
#[derive(Clone, Debug)]
pub struct Modifiers {
    entries: Vec<Modifier>,
}

impl Modifiers {
    pub fn new() -> Self {
        Self {
            entries: Vec::with_capacity(CACHE_SIZE),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Modifier] {
        &self.entries
    }

    pub fn has_actor(&self, actor_id: u64) -> bool {
        self.entries.iter().any(|entry| entry.actor_id == actor_id)
    }

    pub fn add(&mut self, actor_id: u64) -> bool {
        if self.has_actor(actor_id) {
            return false;
        }

        if self.entries.len() == CACHE_SIZE {
            debug_assert!(false, "modifier set full, entry dropped");
            return false;
        }

        self.entries.push(Modifier { actor_id });
        true
    }

    pub fn remove(&mut self, actor_id: u64) -> bool {
        if let Some(index) = self
            .entries
            .iter()
            .position(|entry| entry.actor_id == actor_id)
        {
            self.entries.remove(index);
            return true;
        }

        false
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn copy_from_other(&mut self, other: &Self) {
        self.entries.clear();
        self.entries.extend_from_slice(&other.entries);
    }
}

impl Default for Modifiers {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rapier3d::prelude::{ColliderBuilder, ColliderSet};

    fn test_handles(count: usize) -> Vec<ColliderHandle> {
        let mut colliders = ColliderSet::new();
        (0..count)
            .map(|_| colliders.insert(ColliderBuilder::ball(0.5)))
            .collect()
    }

    #[test]
    fn collisions_add_remove_lookup() {
        let handles = test_handles(2);
        let mut collisions = Collisions::new();

        collisions.add(handles[0], 11);
        collisions.add(handles[1], 0);

        assert!(collisions.has_collider(handles[0]));
        assert!(collisions.has_actor(11));
        assert!(!collisions.has_actor(0));

        assert!(collisions.remove(handles[0]));
        assert!(!collisions.remove(handles[0]));
        assert_eq!(collisions.len(), 1);
    }

    #[test]
    fn ignores_deduplicate_when_asked() {
        let handles = test_handles(1);
        let mut ignores = Ignores::new();

        ignores.add(handles[0], 0, true);
        ignores.add(handles[0], 0, true);
        assert_eq!(ignores.len(), 1);

        ignores.add(handles[0], 0, false);
        assert_eq!(ignores.len(), 2);
    }

    #[test]
    fn modifiers_are_unique_by_actor() {
        let mut modifiers = Modifiers::new();

        assert!(modifiers.add(5));
        assert!(!modifiers.add(5));
        assert_eq!(modifiers.len(), 1);

        assert!(modifiers.remove(5));
        assert!(modifiers.is_empty());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "collision set full")]
    fn collisions_overflow_fails_fast_in_debug() {
        let handles = test_handles(CACHE_SIZE + 1);
        let mut collisions = Collisions::new();

        for (index, &handle) in handles.iter().enumerate() {
            collisions.add(handle, index as u64 + 1);
        }
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn collisions_overflow_drops_silently_in_release() {
        let handles = test_handles(CACHE_SIZE + 1);
        let mut collisions = Collisions::new();

        for (index, &handle) in handles.iter().enumerate() {
            collisions.add(handle, index as u64 + 1);
        }

        assert_eq!(collisions.len(), CACHE_SIZE);
        assert!(!collisions.has_collider(handles[CACHE_SIZE]));
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn modifiers_overflow_drops_silently_in_release() {
        let mut modifiers = Modifiers::new();

        for actor_id in 1..=CACHE_SIZE as u64 {
            assert!(modifiers.add(actor_id));
        }

        assert!(!modifiers.add(CACHE_SIZE as u64 + 1));
        assert_eq!(modifiers.len(), CACHE_SIZE);
    }

    #[test]
    fn copy_replicates_entries() {
        let handles = test_handles(2);
        let mut source = Collisions::new();
        source.add(handles[0], 1);
        source.add(handles[1], 2);

        let mut copy = Collisions::new();
        copy.copy_from_other(&source);

        assert_eq!(copy.entries(), source.entries());
    }
}

//! Entity handles and the entity allocator.
//!
//! An [`Entity`] is an opaque `(index, version)` pair packed into 64 bits. The
//! [`Entities`] allocator owns the version table, the free list and the
//! current [`EntityLocation`] of every live entity. Despawning bumps the slot
//! version, so handles to a recycled slot are detected as stale.

use crate::engine::error::SpawnError;
use crate::engine::types::{
    ArchetypeID, ChunkID, EntityID, IndexID, RowID, VersionID, INDEX_BITS, INDEX_CAP, INDEX_MASK,
};

/// Opaque identity of a row of component data.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct Entity(pub EntityID);

#[inline]
const fn make_id(index: IndexID, version: VersionID) -> EntityID {
    ((version as EntityID) << INDEX_BITS) | (index as EntityID)
}

impl Entity {
    /// Slot index of the entity.
    #[inline]
    pub fn index(self) -> IndexID {
        (self.0 & INDEX_MASK) as IndexID
    }

    /// Generation of the entity's slot at creation time.
    #[inline]
    pub fn version(self) -> VersionID {
        (self.0 >> INDEX_BITS) as VersionID
    }
}

/// Where an entity's row currently lives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EntityLocation {
    /// Archetype holding the row.
    pub archetype: ArchetypeID,
    /// Chunk within the archetype.
    pub chunk: ChunkID,
    /// Row within the chunk.
    pub row: RowID,
}

/// Entity allocator and location table.
#[derive(Default)]
pub struct Entities {
    versions: Vec<VersionID>,
    alive: Vec<bool>,
    locations: Vec<EntityLocation>,
    free_store: Vec<IndexID>,
    live: usize,
}

impl Entities {
    /// Creates an empty allocator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entities.
    #[inline]
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Allocates a handle placed at `location`.
    pub fn spawn(&mut self, location: EntityLocation) -> Result<Entity, SpawnError> {
        let index = match self.free_store.pop() {
            Some(index) => index,
            None => {
                let next = self.versions.len();
                if next >= INDEX_CAP as usize {
                    return Err(SpawnError::Capacity { needed: next as u64 + 1, capacity: INDEX_CAP as u64 });
                }
                self.versions.push(0);
                self.alive.push(false);
                self.locations.push(EntityLocation::default());
                next as IndexID
            }
        };

        let slot = index as usize;
        self.alive[slot] = true;
        self.locations[slot] = location;
        self.live += 1;
        Ok(Entity(make_id(index, self.versions[slot])))
    }

    /// Releases `entity`. Returns `false` if the handle was already stale.
    pub fn despawn(&mut self, entity: Entity) -> bool {
        if !self.is_alive(entity) {
            return false;
        }
        let slot = entity.index() as usize;
        self.versions[slot] = self.versions[slot].wrapping_add(1);
        self.alive[slot] = false;
        self.locations[slot] = EntityLocation::default();
        self.free_store.push(entity.index());
        self.live -= 1;
        true
    }

    /// Returns `true` if `entity` refers to a live slot of the same generation.
    pub fn is_alive(&self, entity: Entity) -> bool {
        let slot = entity.index() as usize;
        self.alive.get(slot).copied().unwrap_or(false) && self.versions[slot] == entity.version()
    }

    /// Returns the location of a live entity.
    pub fn get_location(&self, entity: Entity) -> Option<EntityLocation> {
        self.is_alive(entity).then(|| self.locations[entity.index() as usize])
    }

    /// Updates the location of a live entity.
    pub fn set_location(&mut self, entity: Entity, location: EntityLocation) {
        debug_assert!(
            self.is_alive(entity),
            "set_location was called on a dead or stale entity. Entity: {entity:?}, Location: {location:?}"
        );
        if let Some(slot) = self.locations.get_mut(entity.index() as usize) {
            *slot = location;
        }
    }
}

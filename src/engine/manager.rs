//! Store ownership and the barrier.
//!
//! This module defines the two top-level objects of the engine:
//!
//! * [`ECSData`]: the entity store. It owns the component registry, every
//!   archetype and the entity allocator, and exposes a read-only query surface
//!   through `&self`.
//! * [`ECSManager`]: the store plus its deferred [`CommandBuffer`]. Its
//!   [`apply_deferred_commands`](ECSManager::apply_deferred_commands) is the
//!   barrier: the only place where recorded structural commands reach the
//!   store.
//!
//! ## Concurrency model
//!
//! Passes borrow `&ECSData` and `&CommandBuffer` at the same time, so any
//! number of them can read and record concurrently. The barrier needs
//! `&mut ECSManager`, which cannot be obtained while any pass, writer or
//! query view is still alive. The ordering "produce, then replay, then read"
//! is therefore enforced by the borrow checker rather than by convention.
//!
//! The store's structural mutators (`add_component`, `remove_component`,
//! `set_component`, `spawn_resolved`, `despawn`) are `pub(crate)` and are
//! driven by command replay. The only other way in is [`Setup`], borrowed
//! from the manager between ticks.
//!
//! ## Invariants
//! * `signature_map` and `archetypes` are consistent; archetype ids are their
//!   index and never reused.
//! * The location of every live entity points at its row.
//! * `epoch` increases every time a replay changed structure.

use std::any::Any;
use std::collections::HashMap;

use tracing::{trace, warn};

use crate::engine::archetype::{Archetype, ArchetypeMatch, RowValues};
use crate::engine::commands::{CommandBuffer, ReplayReport};
use crate::engine::component::{Bundle, Component, ComponentRegistry};
use crate::engine::entity::{Entities, Entity, EntityLocation};
use crate::engine::error::{ECSError, ECSResult, RegistryError};
use crate::engine::query::{ChunkView, EntityList, Query, QueryBuilder};
use crate::engine::types::{build_signature, ArchetypeID, ChunkID, ComponentID, Epoch, QuerySignature, Signature};

/// Effect of one structural operation on the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Structural {
    /// Entity moved, appeared or disappeared.
    Changed,
    /// Applied without changing structure (value overwrite, no-op removal).
    Unchanged,
    /// Entity was dead or stale.
    Stale,
    /// Entity lacked the component a `Set` targeted.
    Missing,
}

/// Core entity store.
///
/// ## Responsibilities
/// * Owns all archetypes and their component storage
/// * Maps signatures to archetype IDs
/// * Manages entity placement across archetypes
/// * Resolves queries in stable store order
#[derive(Default)]
pub struct ECSData {
    registry: ComponentRegistry,
    archetypes: Vec<Archetype>,
    signature_map: HashMap<Signature, ArchetypeID>,
    entities: Entities,
    epoch: Epoch,
}

impl ECSData {
    /// Creates an empty store with its own component registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Component registry owned by this store.
    #[inline]
    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// Registers component type `T` (idempotent).
    pub fn register<T: Component>(&self) -> Result<ComponentID, RegistryError> {
        self.registry.register::<T>()
    }

    /// Current structural epoch.
    #[inline]
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Number of live entities.
    #[inline]
    pub fn entity_count(&self) -> usize {
        self.entities.live_count()
    }

    /// Number of archetypes created so far.
    #[inline]
    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    /// Archetype with id `archetype_id`.
    #[inline]
    pub fn archetype(&self, archetype_id: ArchetypeID) -> Option<&Archetype> {
        self.archetypes.get(archetype_id as usize)
    }

    /// Returns `true` if `entity` is alive.
    #[inline]
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entities.is_alive(entity)
    }

    /// Location of a live entity.
    #[inline]
    pub fn location(&self, entity: Entity) -> Option<EntityLocation> {
        self.entities.get_location(entity)
    }

    /// Component set of a live entity.
    pub fn signature_of(&self, entity: Entity) -> Option<Signature> {
        let location = self.location(entity)?;
        Some(*self.archetypes.get(location.archetype as usize)?.signature())
    }

    /// Reads component `T` of `entity`.
    pub fn get<T: Component>(&self, entity: Entity) -> Option<&T> {
        self.get_by_id(entity, self.registry.id_of::<T>()?)
    }

    /// Reads the value stored under `component_id` as `T`.
    pub fn get_by_id<T: Component>(&self, entity: Entity, component_id: ComponentID) -> Option<&T> {
        let location = self.location(entity)?;
        self.archetypes
            .get(location.archetype as usize)?
            .attribute::<T>(component_id)?
            .get(location.chunk, location.row)
    }

    /// Returns `true` if `entity` is alive and carries `T`.
    pub fn has<T: Component>(&self, entity: Entity) -> bool {
        self.registry.id_of::<T>().is_some_and(|component_id| self.has_component(entity, component_id))
    }

    /// Returns `true` if `entity` is alive and carries `component_id`.
    pub fn has_component(&self, entity: Entity, component_id: ComponentID) -> bool {
        self.signature_of(entity).is_some_and(|signature| signature.has(component_id))
    }

    /// Begins construction of a component query.
    pub fn query(&self) -> QueryBuilder<'_> {
        QueryBuilder::new(&self.registry)
    }

    /// Returns archetypes matching a query signature, in ascending id order.
    pub fn matching_archetypes(&self, query: &QuerySignature) -> Vec<ArchetypeMatch> {
        self.archetypes
            .iter()
            .filter(|archetype| !archetype.is_empty() && query.requires_all(archetype.signature()))
            .map(|archetype| ArchetypeMatch { archetype_id: archetype.archetype_id(), chunks: archetype.chunk_count() })
            .collect()
    }

    /// Non-empty chunks matching `query`, in store order.
    pub fn chunks(&self, query: &Query) -> Vec<ChunkView<'_>> {
        self.archetypes
            .iter()
            .filter(|archetype| !archetype.is_empty() && query.matches(archetype.signature()))
            .flat_map(|archetype| {
                (0..archetype.chunk_count()).map(move |chunk| ChunkView::new(archetype, chunk as ChunkID))
            })
            .filter(|view| !view.is_empty())
            .collect()
    }

    /// Entities matching `query`, in store order, stamped with the current epoch.
    pub fn entities(&self, query: &Query) -> EntityList {
        let entities = self
            .chunks(query)
            .iter()
            .flat_map(|view| view.entities().iter().copied())
            .collect();
        EntityList::new(entities, self.epoch)
    }

    /// Number of entities matching `query`.
    pub fn count(&self, query: &Query) -> usize {
        self.archetypes
            .iter()
            .filter(|archetype| query.matches(archetype.signature()))
            .map(Archetype::len)
            .sum()
    }

    pub(crate) fn advance_epoch(&mut self) {
        self.epoch += 1;
    }

    fn get_or_create_archetype(&mut self, signature: Signature) -> ECSResult<ArchetypeID> {
        if let Some(&archetype_id) = self.signature_map.get(&signature) {
            return Ok(archetype_id);
        }

        let archetype_id = ArchetypeID::try_from(self.archetypes.len())
            .map_err(|_| ECSError::Internal(format!("archetype limit of {} reached", ArchetypeID::MAX)))?;
        self.archetypes.push(Archetype::new(archetype_id, signature, &self.registry)?);
        self.signature_map.insert(signature, archetype_id);
        trace!(archetype_id, components = signature.count(), "created archetype");
        Ok(archetype_id)
    }

    fn archetype_mut(&mut self, archetype_id: ArchetypeID) -> ECSResult<&mut Archetype> {
        self.archetypes
            .get_mut(archetype_id as usize)
            .ok_or_else(|| ECSError::Internal(format!("unknown archetype {archetype_id}")))
    }

    fn check_value_type(&self, component_id: ComponentID, value: &(dyn Any + Send)) -> ECSResult<()> {
        let description = self.registry.describe(component_id).ok_or(RegistryError::UnknownComponent(component_id))?;
        if (*value).type_id() != description.type_id {
            return Err(RegistryError::ValueTypeMismatch { component: component_id, expected: description.name }.into());
        }
        Ok(())
    }

    /// Moves `entity` into the archetype for `signature`, inserting `added`
    /// and dropping `removed` on the way.
    ///
    /// If the destination rejects the row, the entity is put back into its
    /// source archetype with its previous values and the error is returned.
    fn relocate(
        &mut self,
        entity: Entity,
        location: EntityLocation,
        signature: Signature,
        added: Option<(ComponentID, Box<dyn Any + Send>)>,
        removed: Option<ComponentID>,
    ) -> ECSResult<()> {
        let destination = self.get_or_create_archetype(signature)?;
        self.archetype_mut(destination)?.check_row_capacity()?;

        let taken = self.archetype_mut(location.archetype)?.take_row(location.chunk, location.row)?;
        if let Some(moved) = taken.moved {
            self.entities.set_location(moved, location);
        }

        let mut values = taken.values;
        let detached = removed.and_then(|component_id| {
            let index = values.iter().position(|(existing, _)| *existing == component_id)?;
            Some(values.swap_remove(index))
        });
        let added_id = added.as_ref().map(|(component_id, _)| *component_id);
        values.extend(added);

        let rejected = match self.archetype_mut(destination)?.push_row(entity, values) {
            Ok((chunk, row)) => {
                self.entities.set_location(entity, EntityLocation { archetype: destination, chunk, row });
                return Ok(());
            }
            Err(rejected) => rejected,
        };

        let mut values = rejected.values;
        values.retain(|(component_id, _)| Some(*component_id) != added_id);
        values.extend(detached);
        match self.archetype_mut(location.archetype)?.push_row(entity, values) {
            Ok((chunk, row)) => {
                self.entities.set_location(entity, EntityLocation { archetype: location.archetype, chunk, row });
            }
            Err(_) => {
                self.entities.despawn(entity);
                warn!(?entity, "entity lost its row while moving between archetypes and was despawned");
            }
        }
        Err(rejected.error)
    }

    /// Spawns an entity from resolved `(id, value)` pairs.
    pub(crate) fn spawn_resolved(&mut self, mut values: RowValues) -> ECSResult<Entity> {
        for (component_id, value) in &values {
            self.check_value_type(*component_id, &**value)?;
        }
        values.sort_by_key(|(component_id, _)| *component_id);
        values.dedup_by_key(|(component_id, _)| *component_id);

        let ids: Vec<ComponentID> = values.iter().map(|(component_id, _)| *component_id).collect();
        let archetype_id = self.get_or_create_archetype(build_signature(&ids))?;
        self.archetype_mut(archetype_id)?.check_row(&values)?;

        let entity = self.entities.spawn(EntityLocation { archetype: archetype_id, chunk: 0, row: 0 })?;
        match self.archetype_mut(archetype_id)?.push_row(entity, values) {
            Ok((chunk, row)) => {
                self.entities.set_location(entity, EntityLocation { archetype: archetype_id, chunk, row });
                Ok(entity)
            }
            Err(rejected) => {
                self.entities.despawn(entity);
                Err(rejected.error)
            }
        }
    }

    /// Despawns `entity`. Returns `false` if it was already dead or stale.
    pub(crate) fn despawn(&mut self, entity: Entity) -> ECSResult<bool> {
        let Some(location) = self.location(entity) else { return Ok(false) };

        let taken = self.archetype_mut(location.archetype)?.take_row(location.chunk, location.row)?;
        if let Some(moved) = taken.moved {
            self.entities.set_location(moved, location);
        }
        Ok(self.entities.despawn(entity))
    }

    /// Adds `value` under `component_id`, moving `entity` to the matching
    /// archetype. An existing value is overwritten in place.
    pub(crate) fn add_component(
        &mut self,
        entity: Entity,
        component_id: ComponentID,
        value: Box<dyn Any + Send>,
    ) -> ECSResult<Structural> {
        let Some(location) = self.location(entity) else { return Ok(Structural::Stale) };
        self.check_value_type(component_id, &*value)?;

        let archetype = self.archetype_mut(location.archetype)?;
        if archetype.has(component_id) {
            archetype.replace_value(location.chunk, location.row, component_id, value)?;
            return Ok(Structural::Unchanged);
        }

        let mut signature = *archetype.signature();
        signature.set(component_id);
        self.relocate(entity, location, signature, Some((component_id, value)), None)?;
        Ok(Structural::Changed)
    }

    /// Removes `component_id` from `entity`. Removing an absent component is
    /// a no-op; removing the last one leaves the entity alive.
    pub(crate) fn remove_component(&mut self, entity: Entity, component_id: ComponentID) -> ECSResult<Structural> {
        let Some(location) = self.location(entity) else { return Ok(Structural::Stale) };

        let archetype = self.archetype_mut(location.archetype)?;
        if !archetype.has(component_id) {
            return Ok(Structural::Unchanged);
        }

        let mut signature = *archetype.signature();
        signature.clear(component_id);
        self.relocate(entity, location, signature, None, Some(component_id))?;
        Ok(Structural::Changed)
    }

    /// Overwrites the value of `component_id` on `entity`.
    pub(crate) fn set_component(
        &mut self,
        entity: Entity,
        component_id: ComponentID,
        value: Box<dyn Any + Send>,
    ) -> ECSResult<Structural> {
        let Some(location) = self.location(entity) else { return Ok(Structural::Stale) };
        self.check_value_type(component_id, &*value)?;

        let archetype = self.archetype_mut(location.archetype)?;
        if !archetype.has(component_id) {
            return Ok(Structural::Missing);
        }
        archetype.replace_value(location.chunk, location.row, component_id, value)?;
        Ok(Structural::Unchanged)
    }

    fn get_mut_by_id<T: Component>(&mut self, entity: Entity, component_id: ComponentID) -> Option<&mut T> {
        let location = self.location(entity)?;
        self.archetypes
            .get_mut(location.archetype as usize)?
            .attribute_mut::<T>(component_id)?
            .get_mut(location.chunk, location.row)
    }
}

/// Structural edits applied outside the barrier, obtained from
/// [`ECSManager::setup`].
///
/// Passes never see this type. They record `Spawn` and `Despawn` commands
/// into a [`CommandWriter`](crate::engine::commands::CommandWriter) instead.
pub struct Setup<'a> {
    data: &'a mut ECSData,
}

impl Setup<'_> {
    /// Spawns an entity immediately.
    pub fn spawn(&mut self, bundle: Bundle) -> ECSResult<Entity> {
        let values = bundle.resolve(&self.data.registry)?;
        let entity = self.data.spawn_resolved(values)?;
        self.data.advance_epoch();
        Ok(entity)
    }

    /// Despawns an entity immediately. Returns `false` if it was already gone.
    pub fn despawn(&mut self, entity: Entity) -> ECSResult<bool> {
        let despawned = self.data.despawn(entity)?;
        if despawned {
            self.data.advance_epoch();
        }
        Ok(despawned)
    }
}

/// Entry point owning the store and its deferred command buffer.
#[derive(Default)]
pub struct ECSManager {
    data: ECSData,
    deferred: CommandBuffer,
}

impl ECSManager {
    /// Creates an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-only access to the store.
    #[inline]
    pub fn world(&self) -> &ECSData {
        &self.data
    }

    /// The deferred command buffer replayed at the next barrier.
    #[inline]
    pub fn commands(&self) -> &CommandBuffer {
        &self.deferred
    }

    /// Registers component type `T` (idempotent).
    pub fn register<T: Component>(&self) -> Result<ComponentID, RegistryError> {
        self.data.register::<T>()
    }

    /// Immediate structural mutation for use between ticks.
    ///
    /// Needs `&mut self`, so no pass, writer or query view can be alive
    /// while it is held.
    #[inline]
    pub fn setup(&mut self) -> Setup<'_> {
        Setup { data: &mut self.data }
    }

    /// Mutable access to component `T` of `entity`.
    ///
    /// This is a value write and never changes structure.
    pub fn get_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        let component_id = self.data.registry.id_of::<T>()?;
        self.data.get_mut_by_id(entity, component_id)
    }

    /// Barrier: replays every deferred command against the store.
    ///
    /// ## Semantics
    /// Batches are applied in writer order, commands within a batch in append
    /// order. Entity lists computed before this call are stale afterwards if
    /// structure changed.
    pub fn apply_deferred_commands(&mut self) -> ECSResult<ReplayReport> {
        self.deferred.replay(&mut self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Health(u32);

    #[derive(Debug, PartialEq)]
    struct Armor(u32);

    #[test]
    fn rejected_moves_put_the_row_back() {
        let mut ecs = ECSManager::new();
        let first = ecs.setup().spawn(Bundle::new().with(Health(1))).unwrap();
        let second = ecs.setup().spawn(Bundle::new().with(Health(2))).unwrap();
        let armor = ecs.register::<Armor>().unwrap();

        let world = &mut ecs.data;
        let location = world.location(first).unwrap();
        let mut signature = world.signature_of(first).unwrap();
        signature.set(armor);
        let mistyped: Box<dyn Any + Send> = Box::new("plate");
        let result = world.relocate(first, location, signature, Some((armor, mistyped)), None);

        assert!(matches!(result, Err(ECSError::Registry(RegistryError::ValueTypeMismatch { .. }))));
        assert_eq!(world.entity_count(), 2);
        assert_eq!(world.get::<Health>(first), Some(&Health(1)));
        assert_eq!(world.get::<Health>(second), Some(&Health(2)), "swapped-in entity keeps a valid location");
        assert!(!world.has::<Armor>(first));
        assert_eq!(world.location(first).map(|location| location.archetype), Some(location.archetype));
    }

    #[test]
    fn setup_edits_advance_the_epoch() {
        let mut ecs = ECSManager::new();
        let start = ecs.world().epoch();
        let entity = ecs.setup().spawn(Bundle::new().with(Health(1))).unwrap();
        assert_eq!(ecs.world().epoch(), start + 1);

        assert_eq!(ecs.setup().despawn(entity), Ok(true));
        assert_eq!(ecs.setup().despawn(entity), Ok(false));
        assert_eq!(ecs.world().epoch(), start + 2, "despawning a dead entity changes nothing");
    }
}

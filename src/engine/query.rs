//! Query construction and query results.
//!
//! This module provides a *builder-style* API for describing which archetypes
//! a pass is interested in, and the two result shapes the store hands back:
//!
//! * [`EntityList`]: an ordered snapshot of matching entities, stamped with
//!   the structural epoch it was computed at.
//! * [`ChunkView`]: a read-only window over one non-empty archetype chunk,
//!   the unit of data-parallel work.
//!
//! ## Execution model
//! 1. Build a [`Query`] (required / excluded components, optional `unless`).
//! 2. Resolve it against the store with
//!    [`ECSData::entities`](crate::engine::manager::ECSData::entities) or
//!    [`ECSData::chunks`](crate::engine::manager::ECSData::chunks).
//! 3. Iterate in store order: archetype id ascending, then chunk, then row.
//!
//! ## Invariants
//! * Queries are pure values; resolving one never mutates the store.
//! * An [`EntityList`] is only meaningful at the epoch it was computed at. A
//!   barrier replay that changed structure invalidates it.

use std::slice;

use crate::engine::archetype::Archetype;
use crate::engine::component::{Component, ComponentRegistry};
use crate::engine::entity::Entity;
use crate::engine::error::{ExecutionError, RegistryError};
use crate::engine::types::{ArchetypeID, ChunkID, ComponentID, Epoch, Filter, QuerySignature, Signature};

/// A resolved component query.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Query {
    signature: QuerySignature,
}

impl Query {
    /// Wraps an already built query signature.
    #[inline]
    pub fn from_signature(signature: QuerySignature) -> Self {
        Self { signature }
    }

    /// Query signature used for archetype matching.
    #[inline]
    pub fn signature(&self) -> &QuerySignature {
        &self.signature
    }

    /// Returns `true` if an archetype with `signature` is selected.
    #[inline]
    pub fn matches(&self, signature: &Signature) -> bool {
        self.signature.requires_all(signature)
    }
}

/// Builder for [`Query`] values.
///
/// Typed methods register their component on first use, so a query may name a
/// type no entity carries yet; it simply matches nothing. The first
/// registration failure is kept and reported by [`build`](Self::build).
///
/// ## Example
/// ```ignore
/// let moving = world.query()
///     .with::<Position>()
///     .with::<Velocity>()
///     .without::<Frozen>()
///     .build()?;
/// for entity in &world.entities(&moving) { /* ... */ }
/// ```
pub struct QueryBuilder<'r> {
    registry: &'r ComponentRegistry,
    signature: QuerySignature,
    error: Option<RegistryError>,
}

impl<'r> QueryBuilder<'r> {
    /// Creates an empty builder resolving types against `registry`.
    pub fn new(registry: &'r ComponentRegistry) -> Self {
        Self { registry, signature: QuerySignature::default(), error: None }
    }

    fn resolve<T: Component>(&mut self) -> Option<ComponentID> {
        match self.registry.register::<T>() {
            Ok(component_id) => Some(component_id),
            Err(error) => {
                self.error.get_or_insert(error);
                None
            }
        }
    }

    /// Requires component `T`.
    pub fn with<T: Component>(mut self) -> Self {
        if let Some(component_id) = self.resolve::<T>() {
            self.signature.include.required.set(component_id);
        }
        self
    }

    /// Excludes component `T`.
    pub fn without<T: Component>(mut self) -> Self {
        if let Some(component_id) = self.resolve::<T>() {
            self.signature.include.without.set(component_id);
        }
        self
    }

    fn known(&mut self, component_id: ComponentID) -> bool {
        match self.registry.ensure_known(component_id) {
            Ok(()) => true,
            Err(error) => {
                self.error.get_or_insert(error);
                false
            }
        }
    }

    /// Requires the component or marker slot `component_id`.
    pub fn with_id(mut self, component_id: ComponentID) -> Self {
        if self.known(component_id) {
            self.signature.include.required.set(component_id);
        }
        self
    }

    /// Excludes the component or marker slot `component_id`.
    pub fn without_id(mut self, component_id: ComponentID) -> Self {
        if self.known(component_id) {
            self.signature.include.without.set(component_id);
        }
        self
    }

    /// Rejects archetypes that fully satisfy `filter`.
    pub fn unless(mut self, filter: Filter) -> Self {
        self.signature.unless = Some(filter);
        self
    }

    /// Finishes the query.
    pub fn build(self) -> Result<Query, RegistryError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(Query { signature: self.signature }),
        }
    }
}

/// Ordered snapshot of the entities matching a query.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EntityList {
    entities: Vec<Entity>,
    epoch: Epoch,
}

impl EntityList {
    pub(crate) fn new(entities: Vec<Entity>, epoch: Epoch) -> Self {
        Self { entities, epoch }
    }

    /// Structural epoch the list was computed at.
    #[inline]
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Number of entities.
    #[inline]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns `true` if no entity matched.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Matching entities in store order.
    #[inline]
    pub fn as_slice(&self) -> &[Entity] {
        &self.entities
    }

    /// Iterates over the entities in store order.
    #[inline]
    pub fn iter(&self) -> slice::Iter<'_, Entity> {
        self.entities.iter()
    }

    /// Returns `true` if `entity` is in the list.
    pub fn contains(&self, entity: Entity) -> bool {
        self.entities.contains(&entity)
    }

    /// Fails if a barrier changed the store's structure since the list was
    /// computed.
    pub fn ensure_fresh(&self, current: Epoch) -> Result<(), ExecutionError> {
        if self.epoch == current {
            Ok(())
        } else {
            Err(ExecutionError::StaleQuery { computed_at: self.epoch, current })
        }
    }

    /// Consumes the list and returns the entities.
    pub fn into_vec(self) -> Vec<Entity> {
        self.entities
    }
}

impl<'a> IntoIterator for &'a EntityList {
    type Item = &'a Entity;
    type IntoIter = slice::Iter<'a, Entity>;

    fn into_iter(self) -> Self::IntoIter {
        self.entities.iter()
    }
}

/// Read-only view over one non-empty chunk of a matching archetype.
#[derive(Clone, Copy)]
pub struct ChunkView<'w> {
    archetype: &'w Archetype,
    chunk: ChunkID,
}

impl<'w> ChunkView<'w> {
    pub(crate) fn new(archetype: &'w Archetype, chunk: ChunkID) -> Self {
        Self { archetype, chunk }
    }

    /// Archetype the chunk belongs to.
    #[inline]
    pub fn archetype_id(&self) -> ArchetypeID {
        self.archetype.archetype_id()
    }

    /// Chunk index within the archetype.
    #[inline]
    pub fn chunk(&self) -> ChunkID {
        self.chunk
    }

    /// Number of rows in the chunk.
    #[inline]
    pub fn len(&self) -> usize {
        self.entities().len()
    }

    /// Returns `true` if the chunk holds no row.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities().is_empty()
    }

    /// Entities of the chunk, in row order.
    #[inline]
    pub fn entities(&self) -> &'w [Entity] {
        self.archetype.entities_in_chunk(self.chunk)
    }

    /// Returns `true` if rows of this chunk carry `component_id`.
    #[inline]
    pub fn has(&self, component_id: ComponentID) -> bool {
        self.archetype.has(component_id)
    }

    /// Typed values of `component_id`, aligned with [`entities`](Self::entities).
    ///
    /// Returns `None` if the archetype lacks the component or `T` is not its
    /// stored type.
    pub fn column<T: 'static>(&self, component_id: ComponentID) -> Option<&'w [T]> {
        self.archetype.attribute::<T>(component_id)?.chunk_slice(self.chunk)
    }
}

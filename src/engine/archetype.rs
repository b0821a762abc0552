//! Archetype row storage.
//!
//! An [`Archetype`] groups every entity that carries exactly the same set of
//! components ([`Signature`]). Each component has its own dense column and an
//! extra column records which entity owns each row, so `(chunk, row)` is the
//! same entity in every column.
//!
//! ## Structural operations
//! * [`push_row`](Archetype::push_row) appends one full row, or leaves the
//!   archetype untouched and hands the values back.
//! * [`take_row`](Archetype::take_row) swap-removes a row and hands its values
//!   back, so the store can re-insert them into another archetype.
//!
//! Both are `pub(crate)`: only the store, driven by command replay, mutates
//! archetype structure.
//!
//! ## Iteration order
//! Rows are enumerated chunk by chunk, row by row. Together with ascending
//! archetype ids this is the store's stable entity order for a query.

use std::any::Any;

use crate::engine::component::ComponentRegistry;
use crate::engine::entity::Entity;
use crate::engine::error::{ECSError, ECSResult, RegistryError, SpawnError};
use crate::engine::storage::{Attribute, TypeErasedAttribute};
use crate::engine::types::{ArchetypeID, ChunkID, ComponentID, RowID, Signature, CHUNK_CAP};

/// Component values of one row, keyed by component id.
pub type RowValues = Vec<(ComponentID, Box<dyn Any + Send>)>;

/// A row removed by [`Archetype::take_row`].
pub struct TakenRow {
    /// Entity that owned the row.
    pub entity: Entity,
    /// Every component value of the row.
    pub values: RowValues,
    /// Entity moved into the vacated slot, if any.
    pub moved: Option<Entity>,
}

/// A row [`Archetype::push_row`] could not append.
pub(crate) struct RejectedRow {
    /// Why the row was rejected.
    pub error: ECSError,
    /// Values of the row that survived the rollback.
    pub values: RowValues,
}

/// Storage for all entities sharing one component signature.
pub struct Archetype {
    archetype_id: ArchetypeID,
    signature: Signature,
    entities: Attribute<Entity>,
    columns: Vec<Option<Box<dyn TypeErasedAttribute>>>,
}

impl Archetype {
    /// Creates an empty archetype with one column per component in `signature`.
    pub fn new(
        archetype_id: ArchetypeID,
        signature: Signature,
        registry: &ComponentRegistry,
    ) -> Result<Self, RegistryError> {
        let mut columns: Vec<Option<Box<dyn TypeErasedAttribute>>> = Vec::new();
        for component_id in signature.iterate_over_components() {
            let index = component_id as usize;
            if columns.len() <= index {
                columns.resize_with(index + 1, || None);
            }
            columns[index] = Some(registry.make_empty(component_id)?);
        }
        Ok(Self { archetype_id, signature, entities: Attribute::default(), columns })
    }

    /// Archetype identifier.
    #[inline]
    pub fn archetype_id(&self) -> ArchetypeID {
        self.archetype_id
    }

    /// Component set of every row.
    #[inline]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Returns `true` if rows carry `component_id`.
    #[inline]
    pub fn has(&self, component_id: ComponentID) -> bool {
        self.signature.has(component_id)
    }

    /// Number of rows.
    #[inline]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns `true` if the archetype holds no row.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Number of allocated chunks.
    #[inline]
    pub fn chunk_count(&self) -> usize {
        self.entities.chunk_count()
    }

    /// Entities stored in `chunk`, in row order.
    #[inline]
    pub fn entities_in_chunk(&self, chunk: ChunkID) -> &[Entity] {
        self.entities.chunk_slice(chunk).unwrap_or(&[])
    }

    /// Entity owning `(chunk, row)`.
    #[inline]
    pub fn entity_at(&self, chunk: ChunkID, row: RowID) -> Option<Entity> {
        self.entities.get(chunk, row).copied()
    }

    /// Type-erased column for `component_id`.
    #[inline]
    pub fn column(&self, component_id: ComponentID) -> Option<&dyn TypeErasedAttribute> {
        self.columns.get(component_id as usize)?.as_deref()
    }

    /// Typed column for `component_id`.
    ///
    /// Returns `None` if the archetype lacks the component or `T` is not its
    /// stored type.
    pub fn attribute<T: 'static>(&self, component_id: ComponentID) -> Option<&Attribute<T>> {
        self.column(component_id)?.as_any().downcast_ref::<Attribute<T>>()
    }

    /// Typed column for `component_id`, mutably.
    pub fn attribute_mut<T: 'static>(&mut self, component_id: ComponentID) -> Option<&mut Attribute<T>> {
        self.columns
            .get_mut(component_id as usize)?
            .as_deref_mut()?
            .as_any_mut()
            .downcast_mut::<Attribute<T>>()
    }

    fn column_mut(&mut self, component_id: ComponentID) -> ECSResult<&mut Box<dyn TypeErasedAttribute>> {
        self.columns
            .get_mut(component_id as usize)
            .and_then(Option::as_mut)
            .ok_or_else(|| ECSError::Internal(format!(
                "archetype {} has no column for component {component_id}",
                self.archetype_id
            )))
    }

    /// Fails unless a row built from `values` can be appended: one value per
    /// component of the signature, each of its column's type, and room for
    /// one more row.
    pub(crate) fn check_row(&self, values: &RowValues) -> ECSResult<(ChunkID, RowID)> {
        if values.len() != self.signature.count() {
            return Err(ECSError::Internal(format!(
                "archetype {} expects {} values per row, got {}",
                self.archetype_id,
                self.signature.count(),
                values.len()
            )));
        }
        for (component_id, value) in values {
            let column = self.column(*component_id).ok_or_else(|| {
                ECSError::Internal(format!("archetype {} has no column for component {component_id}", self.archetype_id))
            })?;
            if (**value).type_id() != column.element_type_id() {
                return Err(RegistryError::ValueTypeMismatch {
                    component: *component_id,
                    expected: column.element_type_name().to_string(),
                }
                .into());
            }
        }
        self.check_row_capacity()
    }

    /// Fails if the archetype cannot take one more row.
    pub(crate) fn check_row_capacity(&self) -> ECSResult<(ChunkID, RowID)> {
        Ok(self.entities.next_position()?)
    }

    /// Appends a row for `entity`.
    ///
    /// The row is validated with [`check_row`](Self::check_row) before any
    /// column is touched. If storage still fails part way, every column
    /// written so far is rolled back and the values are handed back with the
    /// error.
    pub(crate) fn push_row(&mut self, entity: Entity, mut values: RowValues) -> Result<(ChunkID, RowID), RejectedRow> {
        let expected = match self.check_row(&values) {
            Ok(position) => position,
            Err(error) => return Err(RejectedRow { error, values }),
        };

        values.sort_unstable_by_key(|(component_id, _)| *component_id);
        let mut written: Vec<ComponentID> = Vec::with_capacity(values.len());
        let mut remaining = values.into_iter();
        let mut failure: Option<ECSError> = None;

        for (component_id, value) in remaining.by_ref() {
            let pushed = self
                .column_mut(component_id)
                .and_then(|column| column.push_dyn(value).map_err(ECSError::from));
            match pushed {
                Ok(position) if position == expected => written.push(component_id),
                Ok(got) => {
                    written.push(component_id);
                    failure = Some(SpawnError::MisalignedStorage { expected, got }.into());
                    break;
                }
                Err(error) => {
                    failure = Some(error);
                    break;
                }
            }
        }

        if failure.is_none() {
            match self.entities.push(entity) {
                Ok(position) if position == expected => return Ok(position),
                Ok(got) => {
                    let removed = self.entities.swap_remove(got.0, got.1);
                    debug_assert!(removed.is_ok(), "entity column rollback failed");
                    failure = Some(SpawnError::MisalignedStorage { expected, got }.into());
                }
                Err(error) => failure = Some(error.into()),
            }
        }

        let mut values: RowValues = remaining.collect();
        for component_id in written {
            let Ok(column) = self.column_mut(component_id) else { continue };
            let last = column.len().saturating_sub(1);
            let taken = column.take_dyn((last / CHUNK_CAP) as ChunkID, (last % CHUNK_CAP) as RowID);
            debug_assert!(taken.is_ok(), "column {component_id} rollback failed");
            if let Ok((value, _)) = taken {
                values.push((component_id, value));
            }
        }
        let error = failure.unwrap_or_else(|| ECSError::Internal("row push failed without an error".into()));
        Err(RejectedRow { error, values })
    }

    /// Swap-removes the row at `(chunk, row)` and returns its values.
    pub(crate) fn take_row(&mut self, chunk: ChunkID, row: RowID) -> ECSResult<TakenRow> {
        let (entity, moved_from) = self.entities.swap_remove(chunk, row)?;

        let mut values: RowValues = Vec::with_capacity(self.signature.count());
        for (index, column) in self.columns.iter_mut().enumerate() {
            let Some(column) = column.as_mut() else { continue };
            let (value, column_moved_from) = column.take_dyn(chunk, row)?;
            if column_moved_from != moved_from {
                return Err(ECSError::Internal(format!(
                    "archetype {}: column {index} swap disagrees with entity column",
                    self.archetype_id
                )));
            }
            values.push((index as ComponentID, value));
        }

        let moved = moved_from.and_then(|_| self.entities.get(chunk, row).copied());
        Ok(TakenRow { entity, values, moved })
    }

    /// Overwrites the value of `component_id` at `(chunk, row)`.
    pub(crate) fn replace_value(
        &mut self,
        chunk: ChunkID,
        row: RowID,
        component_id: ComponentID,
        value: Box<dyn Any + Send>,
    ) -> ECSResult<()> {
        self.column_mut(component_id)?.replace_dyn(chunk, row, value)?;
        Ok(())
    }
}

/// Archetype selected by a query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArchetypeMatch {
    /// Matching archetype.
    pub archetype_id: ArchetypeID,
    /// Number of allocated chunks at resolution time.
    pub chunks: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::build_signature;

    fn value<T: Any + Send>(value: T) -> Box<dyn Any + Send> {
        Box::new(value)
    }

    fn archetype() -> (Archetype, ComponentID, ComponentID) {
        let registry = ComponentRegistry::new();
        let count = registry.register::<u32>().unwrap();
        let weight = registry.register::<f32>().unwrap();
        let archetype = Archetype::new(0, build_signature(&[count, weight]), &registry).unwrap();
        (archetype, count, weight)
    }

    #[test]
    fn rejected_rows_leave_every_column_untouched() {
        let (mut archetype, count, weight) = archetype();
        let position = archetype.push_row(Entity(1), vec![(count, value(1u32)), (weight, value(1.0f32))]);
        assert_eq!(position.map_err(|rejected| rejected.error), Ok((0, 0)));

        let Err(rejected) = archetype.push_row(Entity(2), vec![(count, value(2u32)), (weight, value("heavy"))]) else {
            panic!("mistyped row was accepted");
        };
        assert!(matches!(
            rejected.error,
            ECSError::Registry(RegistryError::ValueTypeMismatch { component, .. }) if component == weight
        ));
        assert_eq!(rejected.values.len(), 2, "values are handed back");

        let Err(short) = archetype.push_row(Entity(3), vec![(count, value(3u32))]) else {
            panic!("incomplete row was accepted");
        };
        assert_eq!(short.values.len(), 1);

        assert_eq!(archetype.len(), 1);
        assert_eq!(archetype.attribute::<u32>(count).unwrap().len(), 1);
        assert_eq!(archetype.attribute::<f32>(weight).unwrap().len(), 1);
        assert_eq!(archetype.entity_at(0, 0), Some(Entity(1)));
    }

    #[test]
    fn taken_rows_report_the_swapped_in_entity() {
        let (mut archetype, count, weight) = archetype();
        for index in 0..3u32 {
            let row = vec![(count, value(index)), (weight, value(index as f32))];
            assert!(archetype.push_row(Entity(u64::from(index)), row).is_ok());
        }

        let taken = archetype.take_row(0, 0).unwrap();
        assert_eq!(taken.entity, Entity(0));
        assert_eq!(taken.moved, Some(Entity(2)));
        assert_eq!(taken.values.len(), 2);
        assert_eq!(archetype.attribute::<u32>(count).unwrap().get(0, 0), Some(&2));
    }
}

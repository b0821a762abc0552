//! Chunked attribute storage and type-erased access for component columns.
//!
//! This module implements a column-oriented container, [`Attribute<T>`], which
//! stores values densely in fixed-capacity chunks (`CHUNK_CAP` rows per chunk).
//!
//! # Storage model
//!
//! ```text
//! Vec<Vec<T>>   // every chunk but the last holds exactly CHUNK_CAP values
//! ```
//!
//! Values are written densely from the beginning of chunk 0 upward, with no
//! gaps. Positions are addressed using `(ChunkID, RowID)` coordinates.
//!
//! # Core operations
//!
//! - **Append**: `push` writes into the last chunk, opening a new chunk when
//!   the previous one is full.
//! - **Remove**: `swap_remove` deletes an element in `O(1)` by moving the last
//!   element into the removed slot.
//! - **Replace**: `replace` overwrites a slot in place (used by `SetComponent`).
//!
//! These operations keep the column dense but do **not** preserve order.
//!
//! # Type erasure
//!
//! [`TypeErasedAttribute`] lets archetypes hold heterogeneous columns behind
//! `Box<dyn TypeErasedAttribute>`. Values cross the erased boundary as
//! `Box<dyn Any + Send>` and are type-checked on every write.
//!
//! # Invariants
//!
//! - `length` equals the total number of stored elements.
//! - All chunks except the last are full; the last chunk is never empty.
//! - Every column of an archetype has the same length as its entity column,
//!   so `(chunk, row)` addresses the same entity in all of them.

use std::any::{type_name, Any, TypeId};

use crate::engine::error::{AttributeError, PositionOutOfBoundsError, TypeMismatchError};
use crate::engine::types::{ChunkID, RowID, CHUNK_CAP};

/// Result of a swap-remove: the removed value and, if the last element was
/// moved to fill the hole, the position it was moved **from**.
pub type SwapRemoved<T> = (T, Option<(ChunkID, RowID)>);

/// Dynamically-typed interface over an [`Attribute<T>`].
pub trait TypeErasedAttribute: Any + Send + Sync {
    /// Returns the `TypeId` of the stored element type.
    fn element_type_id(&self) -> TypeId;

    /// Returns the Rust name of the stored element type.
    fn element_type_name(&self) -> &'static str;

    /// Upcast for downcasting to a concrete `Attribute<T>`.
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast for downcasting to a concrete `Attribute<T>`.
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Number of stored elements.
    fn len(&self) -> usize;

    /// Returns `true` if the column holds no element.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of allocated chunks.
    fn chunk_count(&self) -> usize;

    /// Appends a type-erased value.
    fn push_dyn(&mut self, value: Box<dyn Any + Send>) -> Result<(ChunkID, RowID), AttributeError>;

    /// Removes the value at `(chunk, row)` and hands it back type-erased.
    fn take_dyn(
        &mut self,
        chunk: ChunkID,
        row: RowID,
    ) -> Result<SwapRemoved<Box<dyn Any + Send>>, AttributeError>;

    /// Removes and drops the value at `(chunk, row)`.
    fn swap_remove_dyn(&mut self, chunk: ChunkID, row: RowID) -> Result<Option<(ChunkID, RowID)>, AttributeError> {
        self.take_dyn(chunk, row).map(|(_, moved_from)| moved_from)
    }

    /// Overwrites the value at `(chunk, row)`.
    fn replace_dyn(&mut self, chunk: ChunkID, row: RowID, value: Box<dyn Any + Send>) -> Result<(), AttributeError>;

    /// Creates an empty column of the same element type.
    fn empty_like(&self) -> Box<dyn TypeErasedAttribute>;
}

/// Dense, chunked storage for a single component type.
pub struct Attribute<T> {
    chunks: Vec<Vec<T>>,
    length: usize,
}

impl<T> Default for Attribute<T> {
    fn default() -> Self {
        Self { chunks: Vec::new(), length: 0 }
    }
}

impl<T> Attribute<T> {
    /// Number of stored elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.length
    }

    /// Returns `true` if the column holds no element.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Number of allocated chunks.
    #[inline]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    #[inline]
    fn position_of(index: usize) -> Result<(ChunkID, RowID), AttributeError> {
        let chunk = ChunkID::try_from(index / CHUNK_CAP).map_err(|_| AttributeError::IndexOverflow("chunk"))?;
        let row = RowID::try_from(index % CHUNK_CAP).map_err(|_| AttributeError::IndexOverflow("row"))?;
        Ok((chunk, row))
    }

    /// Position the next pushed value will occupy.
    #[inline]
    pub fn next_position(&self) -> Result<(ChunkID, RowID), AttributeError> {
        Self::position_of(self.length)
    }

    #[inline]
    fn out_of_bounds(&self, chunk: ChunkID, row: RowID) -> AttributeError {
        PositionOutOfBoundsError { chunk, row, chunks: self.chunks.len(), length: self.length }.into()
    }

    /// Returns a reference to the value at `(chunk, row)`.
    pub fn get(&self, chunk: ChunkID, row: RowID) -> Option<&T> {
        self.chunks.get(chunk as usize)?.get(row as usize)
    }

    /// Returns a mutable reference to the value at `(chunk, row)`.
    pub fn get_mut(&mut self, chunk: ChunkID, row: RowID) -> Option<&mut T> {
        self.chunks.get_mut(chunk as usize)?.get_mut(row as usize)
    }

    /// Returns the initialized values of `chunk`.
    #[inline]
    pub fn chunk_slice(&self, chunk: ChunkID) -> Option<&[T]> {
        self.chunks.get(chunk as usize).map(Vec::as_slice)
    }

    /// Returns the initialized values of `chunk`, mutably.
    #[inline]
    pub fn chunk_slice_mut(&mut self, chunk: ChunkID) -> Option<&mut [T]> {
        self.chunks.get_mut(chunk as usize).map(Vec::as_mut_slice)
    }

    /// Iterates over all values in storage order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.chunks.iter().flatten()
    }

    /// Appends `value`, returning the position it was written to.
    pub fn push(&mut self, value: T) -> Result<(ChunkID, RowID), AttributeError> {
        let position = Self::position_of(self.length)?;
        match self.chunks.last_mut() {
            Some(last) if last.len() < CHUNK_CAP => last.push(value),
            _ => {
                let mut chunk = Vec::with_capacity(CHUNK_CAP);
                chunk.push(value);
                self.chunks.push(chunk);
            }
        }
        self.length += 1;
        Ok(position)
    }

    /// Removes the value at `(chunk, row)` by moving the last value into its slot.
    ///
    /// Returns the removed value and the position the last value was moved
    /// from, or `None` if the removed value was already last.
    pub fn swap_remove(&mut self, chunk: ChunkID, row: RowID) -> Result<SwapRemoved<T>, AttributeError> {
        if self.get(chunk, row).is_none() {
            return Err(self.out_of_bounds(chunk, row));
        }

        let last_position = Self::position_of(self.length - 1)?;
        let Some(last) = self.chunks.last_mut().and_then(Vec::pop) else {
            return Err(self.out_of_bounds(chunk, row));
        };

        if self.chunks.last().is_some_and(Vec::is_empty) {
            self.chunks.pop();
        }
        self.length -= 1;

        if last_position == (chunk, row) {
            return Ok((last, None));
        }

        let slot = &mut self.chunks[chunk as usize][row as usize];
        let removed = std::mem::replace(slot, last);
        Ok((removed, Some(last_position)))
    }

    /// Overwrites the value at `(chunk, row)`, returning the previous value.
    pub fn replace(&mut self, chunk: ChunkID, row: RowID, value: T) -> Result<T, AttributeError> {
        match self.get_mut(chunk, row) {
            Some(slot) => Ok(std::mem::replace(slot, value)),
            None => Err(self.out_of_bounds(chunk, row)),
        }
    }

    /// Drops every stored value.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.length = 0;
    }
}

fn downcast_value<T: 'static>(value: Box<dyn Any + Send>) -> Result<T, AttributeError> {
    value.downcast::<T>().map(|boxed| *boxed).map_err(|_| {
        TypeMismatchError { expected: type_name::<T>(), actual: "<type-erased value>" }.into()
    })
}

impl<T: 'static + Send + Sync> TypeErasedAttribute for Attribute<T> {
    fn element_type_id(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn element_type_name(&self) -> &'static str {
        type_name::<T>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn len(&self) -> usize {
        self.length
    }

    fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    fn push_dyn(&mut self, value: Box<dyn Any + Send>) -> Result<(ChunkID, RowID), AttributeError> {
        let value = downcast_value::<T>(value)?;
        self.push(value)
    }

    fn take_dyn(
        &mut self,
        chunk: ChunkID,
        row: RowID,
    ) -> Result<SwapRemoved<Box<dyn Any + Send>>, AttributeError> {
        let (value, moved_from) = self.swap_remove(chunk, row)?;
        Ok((Box::new(value), moved_from))
    }

    fn replace_dyn(&mut self, chunk: ChunkID, row: RowID, value: Box<dyn Any + Send>) -> Result<(), AttributeError> {
        let value = downcast_value::<T>(value)?;
        self.replace(chunk, row, value).map(drop)
    }

    fn empty_like(&self) -> Box<dyn TypeErasedAttribute> {
        Box::new(Attribute::<T>::default())
    }
}

//! Error types for the store and the reactive layer.
//!
//! This module declares focused, composable error types. Each error carries
//! enough context to make failures actionable while remaining small and cheap
//! to pass around or convert into the aggregate [`ECSError`].
//!
//! ## Taxonomy
//! * **Storage** ([`AttributeError`], [`SpawnError`]): addressing, type and
//!   entity-lifetime failures inside the store.
//! * **Registry** ([`RegistryError`]): component identity problems.
//! * **Ordering** ([`ExecutionError`]): a pass, replay or query result used at
//!   the wrong point of a tick. These are composition defects.
//! * **Configuration** ([`ReactiveError`]): rejected at registration time,
//!   before any tick runs.
//!
//! A missing shadow next to its payload is *not* an error anywhere in this
//! crate; such entities are simply not matched by the comparison query.
//!
//! ## Typical flow
//! Low-level storage operations return dedicated error types. Orchestration
//! code uses `?` to bubble failures into [`ECSError`]:
//! ```ignore
//! fn attach(world: &mut ECSData, entity: Entity, id: ComponentID, value: Box<dyn Any + Send>) -> ECSResult<bool> {
//!     world.add_component(entity, id, value) // AttributeError -> ECSError via From
//! }
//! ```

use thiserror::Error;

use crate::engine::types::{ChunkID, ComponentID, Epoch, RowID};

/// Returned when a `(ChunkID, RowID)` pair refers to a position outside
/// valid component storage bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("position out of bounds: chunk {chunk} (of {chunks}), row {row} (length {length})")]
pub struct PositionOutOfBoundsError {
    /// Chunk index that was addressed.
    pub chunk: ChunkID,

    /// Row index that was addressed.
    pub row: RowID,

    /// Total number of chunks in the storage.
    pub chunks: usize,

    /// Number of stored elements.
    pub length: usize,
}

/// Returned when a write targets a column whose element type does not match
/// the provided value's type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("type mismatch: expected {expected}, actual {actual}")]
pub struct TypeMismatchError {
    /// Destination storage's declared element type.
    pub expected: &'static str,

    /// Provided value's dynamic type, when known.
    pub actual: &'static str,
}

/// Aggregate error for attribute (component column) operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AttributeError {
    /// A `(ChunkID, RowID)` addressed storage outside valid bounds.
    #[error(transparent)]
    Position(#[from] PositionOutOfBoundsError),

    /// The dynamic type of a value did not match the component storage type.
    #[error(transparent)]
    TypeMismatch(#[from] TypeMismatchError),

    /// Index arithmetic overflow occurred while constructing a storage index.
    ///
    /// The string identifies which index overflowed (e.g. `"row"` or `"chunk"`).
    #[error("index overflow constructing {0}")]
    IndexOverflow(&'static str),
}

/// Errors raised by the component registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Registration attempted after the registry was frozen.
    #[error("component registry is frozen; cannot register {name}")]
    Frozen {
        /// Name of the type or marker that was being registered.
        name: String,
    },

    /// More than `COMPONENT_CAP` component types were registered.
    #[error("component capacity of {capacity} exceeded")]
    CapacityExceeded {
        /// Configured capacity.
        capacity: usize,
    },

    /// A component type was used before being registered.
    #[error("component not registered: {name}")]
    NotRegistered {
        /// Rust type name of the component.
        name: &'static str,
    },

    /// A type-erased value does not have the registered type of its component.
    #[error("value for component {component} is not of its registered type {expected}")]
    ValueTypeMismatch {
        /// Target component id.
        component: ComponentID,
        /// Registered type name.
        expected: String,
    },

    /// A raw component id does not refer to a registered component.
    #[error("unknown component id {0}")]
    UnknownComponent(ComponentID),
}

/// Entity lifetime and capacity failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SpawnError {
    /// Entity creation failed due to insufficient capacity.
    #[error("entity limit reached ({needed} needed; capacity {capacity})")]
    Capacity {
        /// Total entities the operation attempted to allocate.
        needed: u64,
        /// Current capacity limiting the operation.
        capacity: u64,
    },

    /// An entity handle was stale or referred to a despawned entity.
    #[error("stale or dead entity reference")]
    StaleEntity,

    /// Component storages disagreed on the row position of an entity.
    ///
    /// This indicates a serious internal invariant violation.
    #[error("component storages became misaligned; expected position {expected:?}, got {got:?}")]
    MisalignedStorage {
        /// Expected `(chunk, row)` position.
        expected: (ChunkID, RowID),
        /// Actual `(chunk, row)` encountered.
        got: (ChunkID, RowID),
    },
}

/// Ordering violations between passes, barriers and query results.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    /// An entity list computed before a barrier was used after it.
    #[error("entity list computed at epoch {computed_at} used at epoch {current}; re-run the query after the barrier")]
    StaleQuery {
        /// Structural epoch when the list was computed.
        computed_at: Epoch,
        /// Current structural epoch of the store.
        current: Epoch,
    },

    /// Replay was requested while command writers were still open.
    #[error("command buffer replayed while {open} writer(s) were still open")]
    PendingWriters {
        /// Number of writers not yet submitted.
        open: usize,
    },

    /// A system failed while running.
    #[error("system `{system}` failed: {reason}")]
    SystemFailed {
        /// System name.
        system: &'static str,
        /// Failure description.
        reason: String,
    },
}

/// Configuration errors rejected at registration time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactiveError {
    /// A reactive group needs at least one target component.
    #[error("reactive group has no target components")]
    EmptyTargets,

    /// A component appears both as target and as condition of the same group.
    #[error("component {component} is both a target and a condition of the same reactive group")]
    OverlappingTypes {
        /// The offending component.
        component: ComponentID,
    },

    /// A marker slot was used as a target or condition.
    #[error("component {component} is a reactive marker and cannot define a reactive group")]
    MarkerInGroup {
        /// The offending marker slot.
        component: ComponentID,
    },

    /// A payload type was registered for value diffing twice.
    #[error("payload {payload} is already registered for value diffing")]
    DuplicateValueReactive {
        /// Payload type name.
        payload: &'static str,
    },

    /// Payload, shadow and changed-tag must be three distinct component types.
    #[error("value reactive types must be distinct: payload {payload}, shadow {shadow}, tag {tag}")]
    AliasedTypes {
        /// Payload type name.
        payload: &'static str,
        /// Shadow type name.
        shadow: &'static str,
        /// Changed-tag type name.
        tag: &'static str,
    },

    /// A shadow type is already used by another payload.
    #[error("shadow {shadow} already tracks another payload")]
    SharedShadow {
        /// Shadow type name.
        shadow: &'static str,
    },

    /// The handle does not belong to this engine.
    #[error("unknown reactive group handle {0}")]
    UnknownGroup(u32),

    /// No update group is registered for the component.
    #[error("no update group registered for component {0}")]
    UnknownUpdateGroup(ComponentID),

    /// An update group component must be one of its group's targets.
    #[error("component {component} is not a target of reactive group {group}")]
    UpdateComponentNotTargeted {
        /// Requested update component.
        component: ComponentID,
        /// Group handle index.
        group: u32,
    },

    /// The component already has an update group bound to another group.
    #[error("component {component} already has an update group bound to reactive group {existing}")]
    UpdateGroupConflict {
        /// Requested update component.
        component: ComponentID,
        /// Group the existing update group is bound to.
        existing: u32,
    },
}

/// Aggregate error type for the crate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ECSError {
    /// Component column failure.
    #[error(transparent)]
    Attribute(#[from] AttributeError),

    /// Component registry failure.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Entity lifetime failure.
    #[error(transparent)]
    Spawn(#[from] SpawnError),

    /// Ordering violation.
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// Reactive configuration failure.
    #[error(transparent)]
    Reactive(#[from] ReactiveError),

    /// Internal invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result alias used throughout the crate.
pub type ECSResult<T> = Result<T, ECSError>;

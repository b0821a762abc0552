//! # Reactive ECS
//!
//! Archetype-based Entity-Component-System store with a reactive
//! change-detection layer.
//!
//! ## Design Goals
//! - Membership diffs: which entities started or stopped matching a group
//! - Value diffs: which entities changed a tracked component value
//! - All cross-tick state lives in the store as marker and shadow components
//! - Passes only read the store; structural changes go through a deferred
//!   command buffer replayed at explicit barriers
//! - Deterministic replay order under parallel execution

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod engine;
pub mod reactive;

// ─────────────────────────────────────────────────────────────────────────────
// Re-exports (Public API)
// ─────────────────────────────────────────────────────────────────────────────

// Store

pub use engine::manager::{
    ECSData,
    ECSManager,
    Setup,
};

pub use engine::entity::{
    Entity,
    EntityLocation,
};

pub use engine::component::{
    Bundle,
    Component,
    ComponentKey,
    ComponentRegistry,
    MarkerSlot,
};

pub use engine::query::{
    ChunkView,
    EntityList,
    Query,
    QueryBuilder,
};

pub use engine::systems::{
    FnSystem,
    System,
};
pub use engine::scheduler::{
    Scheduler,
    Stage,
};

pub use engine::commands::{
    Command,
    CommandBuffer,
    CommandWriter,
    ReplayReport,
};

pub use engine::error::{
    AttributeError,
    ECSError,
    ECSResult,
    ExecutionError,
    ReactiveError,
    RegistryError,
    SpawnError,
};

pub use engine::types::{
    build_signature,
    AccessSets,
    ArchetypeID,
    ComponentID,
    Epoch,
    Filter,
    QuerySignature,
    Signature,
    Tick,
};

// Reactive layer

pub use reactive::config::ReactiveConfig;
pub use reactive::engine::{
    ReactiveEngine,
    TickReport,
};
pub use reactive::group::{
    GroupKey,
    ReactiveGroup,
    ReactiveGroupDesc,
    ReactiveGroupHandle,
    UpdateGroup,
};
pub use reactive::membership::{
    MembershipDiff,
    MembershipStats,
};
pub use reactive::shadow::{
    Changed,
    Previous,
    Shadow,
};
pub use reactive::value::{
    ValueReactiveHandle,
    ValueStats,
};

// ─────────────────────────────────────────────────────────────────────────────
// Prelude
// ─────────────────────────────────────────────────────────────────────────────

/// Commonly used types.
///
/// Import with:
/// ```rust
/// use reactive_ecs::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        build_signature,
        AccessSets,
        Bundle,
        Changed,
        CommandWriter,
        ECSData,
        ECSManager,
        ECSResult,
        Entity,
        FnSystem,
        Previous,
        ReactiveConfig,
        ReactiveEngine,
        ReactiveGroupDesc,
        ReactiveGroupHandle,
        Shadow,
        System,
    };
}

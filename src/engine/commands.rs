//! # Commands
//!
//! Deferred structural mutations and the buffer that collects them.
//!
//! ## Purpose
//! Passes never mutate the store directly. They read it through `&ECSData`
//! and record [`Command`] values into a [`CommandWriter`]. The commands are
//! applied later, serially, when the owning
//! [`ECSManager`](crate::engine::manager::ECSManager) reaches a barrier.
//!
//! ## Design
//! - A [`CommandBuffer`] hands out writers. Each writer takes a **ticket**
//!   from an atomic counter when it is created, and [`CommandWriter::fork`]
//!   derives child writers whose keys extend the parent's.
//! - A writer appends into a private `Vec`. Nothing is shared until the
//!   writer is submitted (explicitly or on drop), at which point its batch is
//!   pushed under a short mutex. Producers never block one another while
//!   recording.
//! - Replay sorts batches by key and applies each batch in append order.
//!   Writers are created serially before a parallel pass is dispatched, so the
//!   replay order is the same on every run regardless of which thread
//!   finished first.
//!
//! ## Invariants
//! - Every command is applied at most once; the buffer is empty after replay.
//! - Replay is refused while a writer is still open.
//! - A command targeting a dead or stale entity is skipped and counted, not an
//!   error.
//! - Component identifiers and values must match the registered types.

use std::any::Any;
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use tracing::{debug, warn};

use crate::engine::component::{Bundle, Component, ComponentKey, MarkerSlot};
use crate::engine::entity::Entity;
use crate::engine::error::{ECSResult, ExecutionError};
use crate::engine::manager::{ECSData, Structural};
use crate::engine::types::ComponentID;

/// Represents a deferred store mutation.
///
/// ## Invariants
/// - Commands are applied in the order they are issued within a writer.
/// - Component values must match the registered component type.
pub enum Command {
    /// Spawns a new entity carrying the bundle's components.
    Spawn {
        /// Data bundle for the new entity.
        bundle: Bundle,
    },

    /// Despawns an existing entity.
    Despawn {
        /// Entity to be removed from the store.
        entity: Entity,
    },

    /// Adds a component to an existing entity.
    ///
    /// ## Behavior
    /// - Moves the entity to the archetype that includes the component.
    /// - If the entity already carries the component, its value is
    ///   overwritten in place.
    Add {
        /// Target entity receiving the component.
        entity: Entity,
        /// Component to add.
        component: ComponentKey,
        /// Component value to insert.
        value: Box<dyn Any + Send>,
    },

    /// Removes a component from an existing entity.
    ///
    /// Removing a component the entity does not carry is a no-op. Removing
    /// the last component leaves the entity alive with no components.
    Remove {
        /// Target entity losing the component.
        entity: Entity,
        /// Component to remove.
        component: ComponentKey,
    },

    /// Overwrites the value of a component the entity already carries.
    Set {
        /// Target entity.
        entity: Entity,
        /// Component to overwrite.
        component: ComponentKey,
        /// New value.
        value: Box<dyn Any + Send>,
    },
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawn { bundle } => f.debug_struct("Spawn").field("bundle", bundle).finish(),
            Self::Despawn { entity } => f.debug_struct("Despawn").field("entity", entity).finish(),
            Self::Add { entity, component, .. } => {
                f.debug_struct("Add").field("entity", entity).field("component", component).finish()
            }
            Self::Remove { entity, component } => {
                f.debug_struct("Remove").field("entity", entity).field("component", component).finish()
            }
            Self::Set { entity, component, .. } => {
                f.debug_struct("Set").field("entity", entity).field("component", component).finish()
            }
        }
    }
}

/// Outcome of one barrier replay.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Commands that took effect (including no-op removals).
    pub applied: usize,
    /// Commands dropped because their entity was dead, stale, or lacked the
    /// component a `Set` targeted.
    pub skipped: usize,
    /// Entities created by `Spawn` commands, in replay order.
    pub spawned: Vec<Entity>,
}

impl ReplayReport {
    /// Total number of commands consumed.
    #[inline]
    pub fn total(&self) -> usize {
        self.applied + self.skipped
    }

    /// Folds another report into this one.
    pub fn merge(&mut self, other: ReplayReport) {
        self.applied += other.applied;
        self.skipped += other.skipped;
        self.spawned.extend(other.spawned);
    }
}

struct CommandBatch {
    key: Vec<u64>,
    commands: Vec<Command>,
}

/// Concurrency-safe, append-only collection of deferred commands.
#[derive(Default)]
pub struct CommandBuffer {
    next_ticket: AtomicU64,
    open: AtomicUsize,
    batches: Mutex<Vec<CommandBatch>>,
}

impl CommandBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new writer. Writers replay in the order they were opened.
    pub fn writer(&self) -> CommandWriter<'_> {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        CommandWriter::open(self, vec![ticket])
    }

    /// Number of writers not yet submitted.
    #[inline]
    pub fn open_writers(&self) -> usize {
        self.open.load(Ordering::Acquire)
    }

    /// Number of commands submitted and awaiting replay.
    pub fn pending(&self) -> usize {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|batch| batch.commands.len())
            .sum()
    }

    fn submit(&self, key: Vec<u64>, commands: Vec<Command>) {
        if !commands.is_empty() {
            self.batches
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(CommandBatch { key, commands });
        }
        self.open.fetch_sub(1, Ordering::AcqRel);
    }

    /// Applies every submitted command to `world` and clears the buffer.
    ///
    /// Returns [`ExecutionError::PendingWriters`] without applying anything if
    /// a writer is still open.
    ///
    /// A storage or registry error stops the replay. The failing command has
    /// no effect, commands before it stay applied and the rest of the buffer
    /// is dropped and logged. The epoch still advances if an applied command
    /// changed structure, so lists computed before the barrier go stale.
    pub(crate) fn replay(&mut self, world: &mut ECSData) -> ECSResult<ReplayReport> {
        let open = self.open_writers();
        if open != 0 {
            return Err(ExecutionError::PendingWriters { open }.into());
        }

        let mut batches = mem::take(self.batches.get_mut().unwrap_or_else(PoisonError::into_inner));
        self.next_ticket.store(0, Ordering::Relaxed);
        batches.sort_by(|a, b| a.key.cmp(&b.key));

        let mut report = ReplayReport::default();
        let mut structural = false;
        let mut failure = None;
        let mut commands = batches.into_iter().flat_map(|batch| batch.commands);

        for command in commands.by_ref() {
            match apply(world, command, &mut report) {
                Ok(Structural::Changed) => {
                    structural = true;
                    report.applied += 1;
                }
                Ok(Structural::Unchanged) => report.applied += 1,
                Ok(Structural::Stale | Structural::Missing) => report.skipped += 1,
                Err(error) => {
                    failure = Some(error);
                    break;
                }
            }
        }

        if structural {
            world.advance_epoch();
        }
        if let Some(error) = failure {
            let dropped = commands.count();
            warn!(applied = report.applied, dropped, epoch = world.epoch(), %error, "replay stopped at a failing command");
            return Err(error);
        }
        if report.skipped > 0 {
            warn!(skipped = report.skipped, "replay skipped commands targeting dead entities or missing components");
        }
        debug!(applied = report.applied, skipped = report.skipped, epoch = world.epoch(), "replayed deferred commands");
        Ok(report)
    }
}

fn apply(world: &mut ECSData, command: Command, report: &mut ReplayReport) -> ECSResult<Structural> {
    match command {
        Command::Spawn { bundle } => {
            let values = bundle.resolve(world.registry())?;
            report.spawned.push(world.spawn_resolved(values)?);
            Ok(Structural::Changed)
        }
        Command::Despawn { entity } => {
            Ok(if world.despawn(entity)? { Structural::Changed } else { Structural::Stale })
        }
        Command::Add { entity, component, value } => {
            let component_id = component.resolve(world.registry())?;
            world.add_component(entity, component_id, value)
        }
        Command::Remove { entity, component } => {
            let component_id = component.resolve(world.registry())?;
            world.remove_component(entity, component_id)
        }
        Command::Set { entity, component, value } => {
            let component_id = component.resolve(world.registry())?;
            world.set_component(entity, component_id, value)
        }
    }
}

/// Partition-local producer handle into a [`CommandBuffer`].
///
/// Recording is lock-free; the batch is handed to the buffer when the writer
/// is submitted or dropped.
pub struct CommandWriter<'b> {
    buffer: &'b CommandBuffer,
    key: Vec<u64>,
    forks: u64,
    commands: Vec<Command>,
}

impl<'b> CommandWriter<'b> {
    fn open(buffer: &'b CommandBuffer, key: Vec<u64>) -> Self {
        buffer.open.fetch_add(1, Ordering::AcqRel);
        Self { buffer, key, forks: 0, commands: Vec::new() }
    }

    /// Derives `count` child writers, one per partition of a parallel pass.
    ///
    /// Children replay after this writer's own commands, in index order.
    pub fn fork(&mut self, count: usize) -> Vec<CommandWriter<'b>> {
        (0..count)
            .map(|_| {
                let mut key = self.key.clone();
                key.push(self.forks);
                self.forks += 1;
                CommandWriter::open(self.buffer, key)
            })
            .collect()
    }

    /// Number of recorded commands.
    #[inline]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns `true` if nothing was recorded.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Records a raw command.
    #[inline]
    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    /// Records the spawn of a new entity.
    pub fn spawn(&mut self, bundle: Bundle) {
        self.push(Command::Spawn { bundle });
    }

    /// Records the despawn of `entity`.
    pub fn despawn(&mut self, entity: Entity) {
        self.push(Command::Despawn { entity });
    }

    /// Records `AddComponent(value)` on `entity`.
    pub fn add<T: Component>(&mut self, entity: Entity, value: T) {
        self.push(Command::Add { entity, component: ComponentKey::of::<T>(), value: Box::new(value) });
    }

    /// Records `RemoveComponent::<T>` on `entity`.
    pub fn remove<T: Component>(&mut self, entity: Entity) {
        self.push(Command::Remove { entity, component: ComponentKey::of::<T>() });
    }

    /// Records `SetComponent(value)` on `entity`.
    pub fn set<T: Component>(&mut self, entity: Entity, value: T) {
        self.push(Command::Set { entity, component: ComponentKey::of::<T>(), value: Box::new(value) });
    }

    /// Records `AddComponent` of a value under an already resolved id.
    pub fn add_by_id<T: Component>(&mut self, entity: Entity, component_id: ComponentID, value: T) {
        self.push(Command::Add { entity, component: component_id.into(), value: Box::new(value) });
    }

    /// Records `SetComponent` of a value under an already resolved id.
    pub fn set_by_id<T: Component>(&mut self, entity: Entity, component_id: ComponentID, value: T) {
        self.push(Command::Set { entity, component: component_id.into(), value: Box::new(value) });
    }

    /// Records `RemoveComponent` under an already resolved id.
    pub fn remove_by_id(&mut self, entity: Entity, component_id: ComponentID) {
        self.push(Command::Remove { entity, component: component_id.into() });
    }

    /// Records the attachment of the marker slot `marker`.
    pub fn add_marker(&mut self, entity: Entity, marker: ComponentID) {
        self.add_by_id(entity, marker, MarkerSlot);
    }

    /// Hands the recorded commands to the buffer.
    pub fn submit(self) {}
}

impl Drop for CommandWriter<'_> {
    fn drop(&mut self) {
        self.buffer.submit(mem::take(&mut self.key), mem::take(&mut self.commands));
    }
}

impl fmt::Debug for CommandWriter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandWriter").field("key", &self.key).field("commands", &self.commands.len()).finish()
    }
}

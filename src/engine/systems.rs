//! System Abstractions
//!
//! A **system** is a unit of logic that operates over the store. Systems:
//! - declare which components they read and write,
//! - are scheduled based on access conflicts,
//! - read the store through `&ECSData` and record every mutation into a
//!   [`CommandWriter`], which is replayed at the next barrier.
//!
//! ## Scheduling Model
//!
//! - Systems with *non-conflicting* access may run in parallel.
//! - Systems with conflicting access are placed in separate stages.
//! - Ordering is stabilized using system IDs.
//!
//! ## Function-backed Systems
//!
//! [`FnSystem`] wraps a closure, which is the preferred way to write consumer
//! logic that reacts to membership queries and changed-tags.
//!
//! ## Thread Safety
//!
//! Systems never receive `&mut` access to the store, so a system cannot
//! observe a half-applied structural change.

use crate::engine::commands::CommandWriter;
use crate::engine::error::ECSResult;
use crate::engine::manager::ECSData;
use crate::engine::types::{AccessSets, SystemID};

/// A unit of executable logic operating on the store.
///
/// Systems must be `Send + Sync` so they can be executed in parallel across
/// threads.
pub trait System: Send + Sync {
    /// Returns the unique identifier of this system.
    fn id(&self) -> SystemID;

    /// Human-readable name used in logs.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Returns the component access sets required by this system.
    fn access(&self) -> AccessSets;

    /// Executes the system logic against the store.
    fn run(&self, world: &ECSData, commands: &mut CommandWriter<'_>) -> ECSResult<()>;
}

/// A concrete [`System`] backed by a function or closure.
pub struct FnSystem<F>
where
    F: Fn(&ECSData, &mut CommandWriter<'_>) -> ECSResult<()> + Send + Sync + 'static,
{
    id: SystemID,
    name: &'static str,
    access: AccessSets,
    f: F,
}

impl<F> FnSystem<F>
where
    F: Fn(&ECSData, &mut CommandWriter<'_>) -> ECSResult<()> + Send + Sync + 'static,
{
    /// Creates a new function-backed system.
    ///
    /// # Parameters
    /// - `id`: Unique identifier for the system.
    /// - `name`: Human-readable name, useful for debugging.
    /// - `access`: Declared component access used for scheduling.
    /// - `f`: The function or closure executed when the system runs.
    pub fn new(id: SystemID, name: &'static str, access: AccessSets, f: F) -> Self {
        Self { id, name, access, f }
    }
}

impl<F> System for FnSystem<F>
where
    F: Fn(&ECSData, &mut CommandWriter<'_>) -> ECSResult<()> + Send + Sync + 'static,
{
    fn id(&self) -> SystemID {
        self.id
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn access(&self) -> AccessSets {
        self.access.clone()
    }

    fn run(&self, world: &ECSData, commands: &mut CommandWriter<'_>) -> ECSResult<()> {
        (self.f)(world, commands)
    }
}

//! System scheduling and execution.
//!
//! This module is responsible for:
//! * grouping systems into execution stages based on access compatibility,
//! * running compatible systems in parallel using Rayon,
//! * enforcing structural synchronization points between stages.
//!
//! ## Scheduling model
//!
//! Systems are assigned to **stages** such that:
//! * systems within the same stage do **not** conflict on component access,
//! * all systems in a stage may run in parallel,
//! * stages are executed sequentially.
//!
//! ## Structural synchronization
//!
//! Deferred commands are applied **before** the first stage and **after**
//! every stage, so a stage always reads the structure its predecessors
//! produced.

use rayon::prelude::*;
use tracing::{debug_span, trace};

use crate::engine::commands::{CommandWriter, ReplayReport};
use crate::engine::error::ECSResult;
use crate::engine::manager::{ECSData, ECSManager};
use crate::engine::systems::System;

/// A group of systems that can be executed in parallel.
///
/// ## Invariants
/// * All systems within a `Stage` have **non-conflicting access sets**
/// * Stages themselves must be executed sequentially.
pub struct Stage {
    /// Systems scheduled to run in this stage.
    pub systems: Vec<Box<dyn System>>,
}

/// Partitions a list of systems into parallel execution stages.
///
/// ## Algorithm
/// Systems are processed in deterministic order (by system ID) and assigned
/// greedily:
/// * Each system is placed into the first stage where it does not conflict
///   with existing systems.
/// * If no such stage exists, a new stage is created.
///
/// ## Determinism
/// Sorting by system ID ensures that stage construction is stable and
/// reproducible across runs.
pub fn make_stages(mut systems: Vec<Box<dyn System>>) -> Vec<Stage> {
    let mut stages: Vec<Stage> = Vec::new();

    systems.sort_by_key(|s| s.id());

    'next_system: for sys in systems.into_iter() {
        let access = sys.access();
        for stage in stages.iter_mut() {
            let conflict = stage.systems.iter().any(|other| access.conflicts_with(&other.access()));
            if !conflict {
                stage.systems.push(sys);
                continue 'next_system;
            }
        }
        stages.push(Stage { systems: vec![sys] });
    }
    stages
}

fn run_system(system: &dyn System, world: &ECSData, writer: &mut CommandWriter<'_>) -> ECSResult<()> {
    trace!(system = system.name(), id = system.id(), "running system");
    system.run(world, writer)
}

/// Ordered collection of systems, staged on demand.
#[derive(Default)]
pub struct Scheduler {
    pending: Vec<Box<dyn System>>,
    stages: Vec<Stage>,
}

impl Scheduler {
    /// Creates an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a system. Stages are rebuilt on the next run.
    pub fn add_system(&mut self, system: Box<dyn System>) {
        self.pending.push(system);
    }

    /// Number of registered systems.
    pub fn len(&self) -> usize {
        self.pending.len() + self.stages.iter().map(|stage| stage.systems.len()).sum::<usize>()
    }

    /// Returns `true` if no system is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current stages, rebuilding them if systems were added.
    pub fn stages(&mut self) -> &[Stage] {
        if !self.pending.is_empty() {
            let mut systems: Vec<Box<dyn System>> =
                self.stages.drain(..).flat_map(|stage| stage.systems).collect();
            systems.append(&mut self.pending);
            self.stages = make_stages(systems);
        }
        &self.stages
    }

    /// Runs every stage with a barrier before the first and after each stage.
    ///
    /// Every system of a stage runs to completion before the stage's barrier,
    /// even if another one failed; the first failure in system order is
    /// returned after that barrier.
    pub fn run(&mut self, ecs: &mut ECSManager, parallel: bool) -> ECSResult<ReplayReport> {
        let mut report = ecs.apply_deferred_commands()?;

        for (index, stage) in self.stages().iter().enumerate() {
            let _span = debug_span!("stage", index, systems = stage.systems.len()).entered();

            let results: Vec<ECSResult<()>> = {
                let world = ecs.world();
                let buffer = ecs.commands();
                let writers: Vec<_> = stage.systems.iter().map(|_| buffer.writer()).collect();

                if parallel {
                    stage
                        .systems
                        .par_iter()
                        .zip(writers.into_par_iter())
                        .map(|(system, mut writer)| run_system(system.as_ref(), world, &mut writer))
                        .collect()
                } else {
                    stage
                        .systems
                        .iter()
                        .zip(writers)
                        .map(|(system, mut writer)| run_system(system.as_ref(), world, &mut writer))
                        .collect()
                }
            };

            report.merge(ecs.apply_deferred_commands()?);
            results.into_iter().collect::<ECSResult<()>>()?;
        }
        Ok(report)
    }
}

//! # Reactive Engine
//!
//! Registration API and per-tick pipeline of the reactive layer.
//!
//! ## Purpose
//! Lets consumer systems run against "what changed" instead of rescanning the
//! store: entities that started or stopped matching a reactive group, and
//! entities whose tracked payload value changed.
//!
//! ## Tick pipeline
//! ```text
//! detect    value diffs, shadow attach/detach        (parallel, read-only)
//! barrier   changed-tags and shadows land
//! consumers user systems, staged by access            (barrier after each stage)
//! track     membership diffs + update groups,
//!           changed-tag cleanup                       (parallel, read-only)
//! barrier   markers transition, changed-tags removed
//! ```
//!
//! Consumers therefore see each group's add and remove sets before the markers
//! move, and every changed-tag for exactly one consumer phase.
//!
//! ## Invariants
//! * All cross-tick state lives in the store as marker, shadow and tag
//!   components. The engine only caches group descriptors and their queries.
//! * Passes only read the store and record commands. The store changes only
//!   at the barriers, through [`ECSManager::apply_deferred_commands`].
//! * Writers are opened in a fixed order before each parallel stage, so the
//!   replay order is identical for identical inputs.
//!
//! ## Example
//! ```ignore
//! let mut ecs = ECSManager::new();
//! let mut engine = ReactiveEngine::new();
//! engine.register_value_reactive::<Position, Previous<Position>, Changed<Position>>(ecs.world())?;
//! let moved = engine.changed_query::<Changed<Position>>(ecs.world())?;
//! engine.add_system(FnSystem::new(0, "log_moves", AccessSets::default(), move |world, _| {
//!     for entity in &world.entities(&moved) { /* react */ }
//!     Ok(())
//! }));
//! engine.tick(&mut ecs)?;
//! ```

use std::any::type_name;
use std::collections::BTreeMap;

use rayon::prelude::*;
use tracing::{debug, info_span};

use crate::engine::commands::{CommandBuffer, CommandWriter, ReplayReport};
use crate::engine::component::Component;
use crate::engine::error::{ECSResult, ReactiveError};
use crate::engine::manager::{ECSData, ECSManager};
use crate::engine::query::Query;
use crate::engine::scheduler::Scheduler;
use crate::engine::systems::System;
use crate::engine::types::{build_signature, ComponentID, Tick};
use crate::reactive::cache::ReactiveCache;
use crate::reactive::cleanup::TagCleanup;
use crate::reactive::config::ReactiveConfig;
use crate::reactive::group::{GroupKey, ReactiveGroup, ReactiveGroupDesc, ReactiveGroupHandle, UpdateGroup};
use crate::reactive::membership::{record_membership, MembershipStats};
use crate::reactive::shadow::Shadow;
use crate::reactive::value::{ValuePass, ValueReactive, ValueReactiveHandle, ValueStats};

/// Summary of one tick.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Tick number, starting at 1.
    pub tick: Tick,
    /// Value diff counts of the detect stage.
    pub values: ValueStats,
    /// Marker transitions recorded in the track stage.
    pub membership: MembershipStats,
    /// Changed-tags removed in the track stage.
    pub cleaned: usize,
    /// Replay after the detect stage.
    pub detect: ReplayReport,
    /// Replays around the consumer stages.
    pub consumers: ReplayReport,
    /// Replay after the track stage.
    pub track: ReplayReport,
}

enum TrackItem<'a> {
    Membership(&'a ReactiveGroup, Vec<&'a UpdateGroup>),
    Cleanup(&'a TagCleanup),
}

impl TrackItem<'_> {
    fn record(&self, world: &ECSData, writer: &mut CommandWriter<'_>) -> (MembershipStats, usize) {
        match self {
            Self::Membership(group, updates) => (record_membership(world, group, updates, writer), 0),
            Self::Cleanup(cleanup) => (MembershipStats::default(), cleanup.record(world, writer)),
        }
    }
}

/// Owner of every reactive registration and of the consumer systems.
///
/// An engine is bound to the store it registered against: the component and
/// marker ids it holds are only meaningful in that store's registry.
#[derive(Default)]
pub struct ReactiveEngine {
    config: ReactiveConfig,
    cache: ReactiveCache,
    values: Vec<Box<dyn ValuePass>>,
    cleanups: BTreeMap<ComponentID, TagCleanup>,
    scheduler: Scheduler,
    tick: Tick,
}

impl ReactiveEngine {
    /// Creates an engine with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an engine with `config`.
    pub fn with_config(config: ReactiveConfig) -> Self {
        Self { config, ..Self::default() }
    }

    /// Active configuration.
    #[inline]
    pub fn config(&self) -> &ReactiveConfig {
        &self.config
    }

    /// Number of ticks run so far.
    #[inline]
    pub fn tick_count(&self) -> Tick {
        self.tick
    }

    /// Registered membership groups.
    #[inline]
    pub fn cache(&self) -> &ReactiveCache {
        &self.cache
    }

    /// Handles of every registered value reactive, in registration order.
    pub fn value_reactives(&self) -> Vec<ValueReactiveHandle> {
        self.values.iter().map(|pass| pass.handle()).collect()
    }

    /// Registers value diffing of payload `T` through shadow `TC`, tagging
    /// changed entities with `TN`.
    ///
    /// Fails if `T`, `TC` and `TN` are not three distinct types, if `T` is
    /// already tracked, or if `TC` already shadows another payload.
    pub fn register_value_reactive<T, TC, TN>(&mut self, world: &ECSData) -> ECSResult<ValueReactiveHandle>
    where
        T: Component,
        TC: Shadow<T>,
        TN: Component + Default,
    {
        let pass = ValueReactive::<T, TC, TN>::new(world)?;
        let handle = pass.handle();

        for existing in self.values.iter().map(|pass| pass.handle()) {
            if existing.payload() == handle.payload() {
                return Err(ReactiveError::DuplicateValueReactive { payload: type_name::<T>() }.into());
            }
            if existing.shadow() == handle.shadow() {
                return Err(ReactiveError::SharedShadow { shadow: type_name::<TC>() }.into());
            }
        }

        self.cleanups.entry(handle.tag()).or_insert_with(|| TagCleanup::new(handle.tag(), type_name::<TN>()));
        debug!(payload = pass.payload_name(), shadow = type_name::<TC>(), tag = pass.tag_name(), "registered value reactive");
        self.values.push(Box::new(pass));
        Ok(handle)
    }

    /// Registers a cleanup sweep for the transient tag `TN` on its own.
    ///
    /// Value reactives register the sweep for their tag automatically.
    pub fn register_tag_cleanup<TN: Component>(&mut self, world: &ECSData) -> ECSResult<ComponentID> {
        let tag = world.register::<TN>()?;
        self.cleanups.entry(tag).or_insert_with(|| TagCleanup::new(tag, type_name::<TN>()));
        Ok(tag)
    }

    /// Registers the membership group (`targets`, `conditions`).
    ///
    /// Type order is irrelevant: the same sets always yield the same handle.
    pub fn register_membership_reactive(
        &mut self,
        world: &ECSData,
        targets: &[ComponentID],
        conditions: &[ComponentID],
    ) -> ECSResult<ReactiveGroupHandle> {
        for &component_id in targets.iter().chain(conditions) {
            world.registry().ensure_known(component_id)?;
        }
        let key = GroupKey { targets: build_signature(targets), conditions: build_signature(conditions) };
        self.cache.get_or_insert(world.registry(), key)
    }

    /// Registers the membership group described by `desc`.
    pub fn register_group(&mut self, world: &ECSData, desc: &ReactiveGroupDesc) -> ECSResult<ReactiveGroupHandle> {
        let key = desc.key(world.registry())?;
        self.cache.get_or_insert(world.registry(), key)
    }

    /// Binds an update group on `component` to the group `handle` and returns
    /// its query.
    ///
    /// Entities that already carry the group marker when the update group is
    /// bound receive the update marker in the next track stage.
    pub fn register_update_group(
        &mut self,
        world: &ECSData,
        handle: ReactiveGroupHandle,
        component: ComponentID,
    ) -> ECSResult<Query> {
        Ok(self.cache.insert_update_group(world.registry(), handle, component)?.query())
    }

    /// Registers the single-component group `{component}` together with its
    /// update group, and returns the update query.
    pub fn register_update_reactive(&mut self, world: &ECSData, component: ComponentID) -> ECSResult<Query> {
        let handle = self.register_membership_reactive(world, &[component], &[])?;
        self.register_update_group(world, handle, component)
    }

    /// Group registered under `handle`.
    pub fn group(&self, handle: ReactiveGroupHandle) -> ECSResult<&ReactiveGroup> {
        Ok(self.cache.group(handle)?)
    }

    /// Entities that match the group but do not carry its marker yet.
    pub fn add_query(&self, handle: ReactiveGroupHandle) -> ECSResult<Query> {
        Ok(self.cache.group(handle)?.add_query())
    }

    /// Entities that carry the group marker but no longer match.
    pub fn remove_query(&self, handle: ReactiveGroupHandle) -> ECSResult<Query> {
        Ok(self.cache.group(handle)?.remove_query())
    }

    /// Marker slot of the group.
    pub fn marker(&self, handle: ReactiveGroupHandle) -> ECSResult<ComponentID> {
        Ok(self.cache.group(handle)?.marker())
    }

    /// Query of the update group keyed on `component`.
    pub fn update_query(&self, component: ComponentID) -> ECSResult<Query> {
        Ok(self.cache.update_group(component)?.query())
    }

    /// Entities currently carrying the changed-tag `TN`.
    pub fn changed_query<TN: Component>(&self, world: &ECSData) -> ECSResult<Query> {
        Ok(world.query().with::<TN>().build()?)
    }

    /// Adds a consumer system, run between the detect and track stages.
    pub fn add_system<S: System + 'static>(&mut self, system: S) {
        self.scheduler.add_system(Box::new(system));
    }

    /// Runs one tick against `ecs`.
    pub fn tick(&mut self, ecs: &mut ECSManager) -> ECSResult<TickReport> {
        self.tick += 1;
        let _tick_span = info_span!("reactive_tick", tick = self.tick).entered();

        if self.tick == 1 && self.config.freeze_registry_on_first_tick {
            ecs.world().registry().freeze();
            debug!(components = ecs.world().registry().len(), "froze component registry");
        }

        let mut report = TickReport { tick: self.tick, ..TickReport::default() };

        {
            let _phase = info_span!("detect", passes = self.values.len()).entered();
            report.values = self.detect(ecs.world(), ecs.commands())?;
            report.detect = ecs.apply_deferred_commands()?;
        }

        {
            let _phase = info_span!("consumers", systems = self.scheduler.len()).entered();
            report.consumers = self.scheduler.run(ecs, self.config.parallel)?;
        }

        {
            let _phase = info_span!("track", groups = self.cache.len(), cleanups = self.cleanups.len()).entered();
            let (membership, cleaned) = self.track(ecs.world(), ecs.commands())?;
            report.membership = membership;
            report.cleaned = cleaned;
            report.track = ecs.apply_deferred_commands()?;
        }

        debug!(
            tick = self.tick,
            changed = report.values.changed,
            added = report.membership.added,
            removed = report.membership.removed,
            cleaned = report.cleaned,
            "reactive tick complete"
        );
        Ok(report)
    }

    fn detect(&self, world: &ECSData, buffer: &CommandBuffer) -> ECSResult<ValueStats> {
        let config = &self.config;
        let writers: Vec<_> = self.values.iter().map(|_| buffer.writer()).collect();

        let results: Vec<ECSResult<ValueStats>> = if config.parallel {
            self.values
                .par_iter()
                .zip(writers.into_par_iter())
                .map(|(pass, mut writer)| pass.run(world, &mut writer, config))
                .collect()
        } else {
            self.values
                .iter()
                .zip(writers)
                .map(|(pass, mut writer)| pass.run(world, &mut writer, config))
                .collect()
        };

        let mut stats = ValueStats::default();
        for result in results {
            stats.accumulate(result?);
        }
        Ok(stats)
    }

    fn track(&self, world: &ECSData, buffer: &CommandBuffer) -> ECSResult<(MembershipStats, usize)> {
        let items: Vec<TrackItem<'_>> = self
            .cache
            .groups()
            .iter()
            .map(|group| TrackItem::Membership(group, self.cache.update_groups_of(group.handle()).collect()))
            .chain(self.cleanups.values().map(TrackItem::Cleanup))
            .collect();
        let writers: Vec<_> = items.iter().map(|_| buffer.writer()).collect();

        let results: Vec<(MembershipStats, usize)> = if self.config.parallel {
            items
                .par_iter()
                .zip(writers.into_par_iter())
                .map(|(item, mut writer)| item.record(world, &mut writer))
                .collect()
        } else {
            items.iter().zip(writers).map(|(item, mut writer)| item.record(world, &mut writer)).collect()
        };

        let mut membership = MembershipStats::default();
        let mut cleaned = 0;
        for (stats, removed) in results {
            membership.added += stats.added;
            membership.removed += stats.removed;
            membership.backfilled += stats.backfilled;
            cleaned += removed;
        }
        Ok((membership, cleaned))
    }
}

//! Value diff pass.
//!
//! For a payload `T`, a shadow `TC: Shadow<T>` and a changed-tag `TN`, every
//! entity carrying both `T` and `TC` is compared. On mismatch the pass records
//! `SetComponent(TC)` with the updated shadow followed by `AddComponent(TN)`.
//! Equal values record nothing.
//!
//! The same pass keeps shadows next to their payloads:
//! * `T` without `TC`: attach `TC::capture(&T)`. Capturing the current value
//!   means attaching never raises a changed-tag.
//! * `TC` without `T`: detach the shadow, which is meaningless on its own.
//!
//! An entity with `T` but no shadow yet is simply not matched by the
//! comparison query. That is ordinary control flow, not an error.
//!
//! ## Parallelism
//! Matching chunks are cut into segments of `batch_size` rows. Each segment
//! gets its own forked [`CommandWriter`], so segments never contend and the
//! replay order does not depend on thread timing.

use std::any::type_name;
use std::marker::PhantomData;
use std::ops::Range;

use rayon::prelude::*;
use tracing::trace;

use crate::engine::commands::CommandWriter;
use crate::engine::component::Component;
use crate::engine::error::{ECSError, ECSResult, ReactiveError};
use crate::engine::manager::ECSData;
use crate::engine::query::{ChunkView, Query};
use crate::engine::types::ComponentID;
use crate::reactive::config::ReactiveConfig;
use crate::reactive::shadow::Shadow;

/// Identifiers of a registered value reactive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ValueReactiveHandle {
    payload: ComponentID,
    shadow: ComponentID,
    tag: ComponentID,
}

impl ValueReactiveHandle {
    /// Payload component id.
    #[inline]
    pub fn payload(&self) -> ComponentID {
        self.payload
    }

    /// Shadow component id.
    #[inline]
    pub fn shadow(&self) -> ComponentID {
        self.shadow
    }

    /// Changed-tag component id.
    #[inline]
    pub fn tag(&self) -> ComponentID {
        self.tag
    }
}

/// Counts produced by one value pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ValueStats {
    /// Entities compared.
    pub compared: usize,
    /// Entities whose payload differed from the shadow.
    pub changed: usize,
    /// Shadows attached to payloads that had none.
    pub attached: usize,
    /// Shadows detached from entities that lost their payload.
    pub detached: usize,
}

impl ValueStats {
    /// Adds `other` into `self`.
    pub fn accumulate(&mut self, other: ValueStats) {
        self.compared += other.compared;
        self.changed += other.changed;
        self.attached += other.attached;
        self.detached += other.detached;
    }
}

/// Type-erased value pass, one per registered payload.
pub(crate) trait ValuePass: Send + Sync {
    fn handle(&self) -> ValueReactiveHandle;

    fn payload_name(&self) -> &'static str;

    fn tag_name(&self) -> &'static str;

    fn run(&self, world: &ECSData, writer: &mut CommandWriter<'_>, config: &ReactiveConfig) -> ECSResult<ValueStats>;
}

/// Value diff of payload `T` through shadow `TC`, tagging with `TN`.
pub(crate) struct ValueReactive<T, TC, TN> {
    handle: ValueReactiveHandle,
    compare: Query,
    attach: Query,
    detach: Query,
    _types: PhantomData<fn() -> (T, TC, TN)>,
}

impl<T, TC, TN> ValueReactive<T, TC, TN>
where
    T: Component,
    TC: Shadow<T>,
    TN: Component + Default,
{
    pub(crate) fn new(world: &ECSData) -> ECSResult<Self> {
        let payload = world.register::<T>()?;
        let shadow = world.register::<TC>()?;
        let tag = world.register::<TN>()?;
        if payload == shadow || payload == tag || shadow == tag {
            return Err(ReactiveError::AliasedTypes {
                payload: type_name::<T>(),
                shadow: type_name::<TC>(),
                tag: type_name::<TN>(),
            }
            .into());
        }

        let compare = world.query().with_id(payload).with_id(shadow).build()?;
        let attach = world.query().with_id(payload).without_id(shadow).build()?;
        let detach = world.query().with_id(shadow).without_id(payload).build()?;

        Ok(Self {
            handle: ValueReactiveHandle { payload, shadow, tag },
            compare,
            attach,
            detach,
            _types: PhantomData,
        })
    }

    fn compare_rows(&self, view: &ChunkView<'_>, rows: Range<usize>, writer: &mut CommandWriter<'_>) -> ECSResult<usize> {
        let ValueReactiveHandle { payload, shadow, tag } = self.handle;
        let misaligned = || {
            ECSError::Internal(format!(
                "chunk {} of archetype {} lacks aligned {} / {} columns",
                view.chunk(),
                view.archetype_id(),
                type_name::<T>(),
                type_name::<TC>()
            ))
        };

        let entities = view.entities().get(rows.clone()).ok_or_else(misaligned)?;
        let payloads = view.column::<T>(payload).and_then(|column| column.get(rows.clone())).ok_or_else(misaligned)?;
        let shadows = view.column::<TC>(shadow).and_then(|column| column.get(rows)).ok_or_else(misaligned)?;

        let mut changed = 0;
        for ((&entity, value), previous) in entities.iter().zip(payloads).zip(shadows) {
            if previous.matches(value) {
                continue;
            }
            let mut updated = previous.clone();
            updated.set(value);
            writer.set_by_id(entity, shadow, updated);
            writer.add_by_id(entity, tag, TN::default());
            changed += 1;
        }
        Ok(changed)
    }

    fn attach_shadows(&self, world: &ECSData, writer: &mut CommandWriter<'_>) -> usize {
        let mut attached = 0;
        for view in world.chunks(&self.attach) {
            let Some(values) = view.column::<T>(self.handle.payload) else { continue };
            for (&entity, value) in view.entities().iter().zip(values) {
                writer.add_by_id(entity, self.handle.shadow, TC::capture(value));
                attached += 1;
            }
        }
        attached
    }

    fn detach_shadows(&self, world: &ECSData, writer: &mut CommandWriter<'_>) -> usize {
        let orphans = world.entities(&self.detach);
        for &entity in &orphans {
            writer.remove_by_id(entity, self.handle.shadow);
        }
        orphans.len()
    }
}

/// Cuts every chunk into row ranges of at most `batch_size` rows.
fn segments(views: Vec<ChunkView<'_>>, batch_size: usize) -> Vec<(ChunkView<'_>, Range<usize>)> {
    views
        .into_iter()
        .flat_map(|view| {
            let len = view.len();
            (0..len).step_by(batch_size).map(move |start| (view, start..(start + batch_size).min(len)))
        })
        .collect()
}

impl<T, TC, TN> ValuePass for ValueReactive<T, TC, TN>
where
    T: Component,
    TC: Shadow<T>,
    TN: Component + Default,
{
    fn handle(&self) -> ValueReactiveHandle {
        self.handle
    }

    fn payload_name(&self) -> &'static str {
        type_name::<T>()
    }

    fn tag_name(&self) -> &'static str {
        type_name::<TN>()
    }

    fn run(&self, world: &ECSData, writer: &mut CommandWriter<'_>, config: &ReactiveConfig) -> ECSResult<ValueStats> {
        let mut stats = ValueStats {
            attached: self.attach_shadows(world, writer),
            detached: self.detach_shadows(world, writer),
            ..ValueStats::default()
        };

        let segments = segments(world.chunks(&self.compare), config.effective_batch_size());
        stats.compared = segments.iter().map(|(_, rows)| rows.len()).sum();
        let writers = writer.fork(segments.len());

        let changed: Vec<usize> = if config.parallel {
            segments
                .into_par_iter()
                .zip(writers.into_par_iter())
                .map(|((view, rows), mut writer)| self.compare_rows(&view, rows, &mut writer))
                .collect::<ECSResult<_>>()?
        } else {
            segments
                .into_iter()
                .zip(writers)
                .map(|((view, rows), mut writer)| self.compare_rows(&view, rows, &mut writer))
                .collect::<ECSResult<_>>()?
        };
        stats.changed = changed.into_iter().sum();

        trace!(
            payload = self.payload_name(),
            compared = stats.compared,
            changed = stats.changed,
            attached = stats.attached,
            detached = stats.detached,
            "value diff"
        );
        Ok(stats)
    }
}

//! Membership diff pass.
//!
//! For one reactive group, enumerates the add-query and the remove-query in
//! store order and records `AddComponent(marker)` / `RemoveComponent(marker)`
//! for every entity found. Update groups bound to the group are fed the same
//! two entity lists, so the group marker and every update marker transition
//! in the same replay. Members that predate an update group get its marker
//! through the update group's backfill query.
//!
//! The pass only reads the store. Entities enter and leave membership purely
//! through the marker component; there is no other per-entity state.

use tracing::trace;

use crate::engine::commands::CommandWriter;
use crate::engine::manager::ECSData;
use crate::engine::query::EntityList;
use crate::reactive::group::{ReactiveGroup, UpdateGroup};

/// Add and remove sets of one group at one point of a tick.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MembershipDiff {
    /// Entities matching the group without its marker.
    pub add: EntityList,
    /// Entities carrying the marker that no longer match.
    pub remove: EntityList,
}

impl MembershipDiff {
    /// Computes the diff of `group` against the current store.
    pub fn compute(world: &ECSData, group: &ReactiveGroup) -> Self {
        Self { add: world.entities(&group.add_query()), remove: world.entities(&group.remove_query()) }
    }

    /// Returns `true` if no entity transitions.
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

/// Counts produced by one membership pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MembershipStats {
    /// Marker attachments recorded.
    pub added: usize,
    /// Marker removals recorded.
    pub removed: usize,
    /// Update markers attached to members that joined before their update
    /// group was bound.
    pub backfilled: usize,
}

/// Records the marker transitions of `group` and of its update groups.
pub fn record_membership(
    world: &ECSData,
    group: &ReactiveGroup,
    update_groups: &[&UpdateGroup],
    writer: &mut CommandWriter<'_>,
) -> MembershipStats {
    let mut backfilled = 0;
    for update in update_groups {
        for &entity in &world.entities(&update.backfill_query()) {
            writer.add_marker(entity, update.marker());
            backfilled += 1;
        }
    }

    let diff = MembershipDiff::compute(world, group);
    if diff.is_empty() {
        return MembershipStats { backfilled, ..MembershipStats::default() };
    }

    for marker in std::iter::once(group.marker()).chain(update_groups.iter().map(|update| update.marker())) {
        for &entity in &diff.add {
            writer.add_marker(entity, marker);
        }
        for &entity in &diff.remove {
            writer.remove_by_id(entity, marker);
        }
    }

    trace!(
        group = group.name(),
        added = diff.add.len(),
        removed = diff.remove.len(),
        backfilled,
        update_groups = update_groups.len(),
        "membership diff"
    );
    MembershipStats { added: diff.add.len(), removed: diff.remove.len(), backfilled }
}

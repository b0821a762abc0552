//! Reactive group descriptors and their derived queries.
//!
//! A reactive group is the pair (targets, conditions): an entity *matches*
//! when it carries every target and no condition. Each group owns one marker
//! slot that records "matched as of the last track stage", from which two
//! disjoint queries follow:
//!
//! ```text
//! add    = targets  AND NOT conditions AND NOT marker
//! remove = marker   AND NOT (targets AND NOT conditions)
//! ```
//!
//! The group is identified by a [`GroupKey`] built from two signatures, so the
//! order in which types are listed never matters.

use std::fmt;

use crate::engine::component::{Component, ComponentKey, ComponentRegistry};
use crate::engine::error::{ECSResult, ReactiveError};
use crate::engine::query::Query;
use crate::engine::types::{ComponentID, Filter, QuerySignature, Signature};

/// Handle to a registered membership group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReactiveGroupHandle(pub(crate) u32);

impl ReactiveGroupHandle {
    /// Position of the group in registration order.
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ReactiveGroupHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group#{}", self.0)
    }
}

/// Canonical, order-independent identity of a reactive group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    /// Components an entity must carry.
    pub targets: Signature,
    /// Components an entity must not carry.
    pub conditions: Signature,
}

impl GroupKey {
    /// Checks the key against the registry.
    pub fn validate(&self, registry: &ComponentRegistry) -> Result<(), ReactiveError> {
        if self.targets.is_empty() {
            return Err(ReactiveError::EmptyTargets);
        }
        if let Some(component) = self
            .targets
            .iterate_over_components()
            .find(|component_id| self.conditions.has(*component_id))
        {
            return Err(ReactiveError::OverlappingTypes { component });
        }
        if let Some(component) = self
            .targets
            .union(&self.conditions)
            .iterate_over_components()
            .find(|component_id| registry.is_marker(*component_id))
        {
            return Err(ReactiveError::MarkerInGroup { component });
        }
        Ok(())
    }

    /// Readable name such as `[Health|!Dead]`, used for marker slots.
    pub(crate) fn marker_name(&self, registry: &ComponentRegistry) -> String {
        let names = |signature: &Signature| {
            signature
                .iterate_over_components()
                .map(|component_id| short_name(&registry.name_of(component_id)).to_owned())
                .collect::<Vec<_>>()
                .join(",")
        };
        if self.conditions.is_empty() {
            format!("[{}]", names(&self.targets))
        } else {
            format!("[{}|!{}]", names(&self.targets), names(&self.conditions))
        }
    }
}

fn short_name(name: &str) -> &str {
    let base = name.split('<').next().unwrap_or(name);
    base.rsplit("::").next().unwrap_or(base)
}

/// Builder describing a reactive group by type or id.
///
/// ## Example
/// ```ignore
/// let alive = ReactiveGroupDesc::new().target::<Health>().condition::<Dead>();
/// let handle = engine.register_group(world, &alive)?;
/// ```
#[derive(Clone, Debug, Default)]
pub struct ReactiveGroupDesc {
    targets: Vec<ComponentKey>,
    conditions: Vec<ComponentKey>,
}

impl ReactiveGroupDesc {
    /// Creates an empty descriptor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds target type `T`.
    pub fn target<T: Component>(mut self) -> Self {
        self.targets.push(ComponentKey::of::<T>());
        self
    }

    /// Adds exclusion condition type `T`.
    pub fn condition<T: Component>(mut self) -> Self {
        self.conditions.push(ComponentKey::of::<T>());
        self
    }

    /// Adds a target by id.
    pub fn target_id(mut self, component_id: ComponentID) -> Self {
        self.targets.push(component_id.into());
        self
    }

    /// Adds an exclusion condition by id.
    pub fn condition_id(mut self, component_id: ComponentID) -> Self {
        self.conditions.push(component_id.into());
        self
    }

    /// Resolves every type and builds the canonical key.
    pub fn key(&self, registry: &ComponentRegistry) -> ECSResult<GroupKey> {
        let mut key = GroupKey { targets: Signature::default(), conditions: Signature::default() };
        for component in &self.targets {
            key.targets.set(component.resolve(registry)?);
        }
        for component in &self.conditions {
            key.conditions.set(component.resolve(registry)?);
        }
        Ok(key)
    }
}

/// A registered membership group.
#[derive(Clone, Debug)]
pub struct ReactiveGroup {
    handle: ReactiveGroupHandle,
    key: GroupKey,
    marker: ComponentID,
    name: String,
    add_query: Query,
    remove_query: Query,
}

impl ReactiveGroup {
    pub(crate) fn new(handle: ReactiveGroupHandle, key: GroupKey, marker: ComponentID, name: String) -> Self {
        let mut marker_bit = Signature::default();
        marker_bit.set(marker);

        let add_query = Query::from_signature(QuerySignature {
            include: Filter { required: key.targets, without: key.conditions.union(&marker_bit) },
            unless: None,
        });
        let remove_query = Query::from_signature(QuerySignature {
            include: Filter { required: marker_bit, without: Signature::default() },
            unless: Some(Filter { required: key.targets, without: key.conditions }),
        });

        Self { handle, key, marker, name, add_query, remove_query }
    }

    /// Handle of the group.
    #[inline]
    pub fn handle(&self) -> ReactiveGroupHandle {
        self.handle
    }

    /// Canonical key.
    #[inline]
    pub fn key(&self) -> &GroupKey {
        &self.key
    }

    /// Marker slot attached to matching entities.
    #[inline]
    pub fn marker(&self) -> ComponentID {
        self.marker
    }

    /// Readable group name, e.g. `[Health|!Dead]`.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Entities that started matching since the last track stage.
    #[inline]
    pub fn add_query(&self) -> Query {
        self.add_query
    }

    /// Entities that stopped matching since the last track stage.
    #[inline]
    pub fn remove_query(&self) -> Query {
        self.remove_query
    }
}

/// Secondary marker keyed on one target component of a group.
///
/// The update marker is added and removed together with the group's marker,
/// from the same entity lists, so both transition in the same replay.
/// Members that joined before the update group was bound are caught by the
/// backfill query.
#[derive(Clone, Debug)]
pub struct UpdateGroup {
    component: ComponentID,
    group: ReactiveGroupHandle,
    marker: ComponentID,
    query: Query,
    backfill_query: Query,
}

impl UpdateGroup {
    pub(crate) fn new(component: ComponentID, group: &ReactiveGroup, marker: ComponentID) -> Self {
        let mut required = Signature::default();
        required.set(component);
        required.set(marker);
        let query = Query::from_signature(QuerySignature {
            include: Filter { required, without: Signature::default() },
            unless: None,
        });

        let mut update_bit = Signature::default();
        update_bit.set(marker);
        let mut member = group.key().targets;
        member.set(group.marker());
        let backfill_query = Query::from_signature(QuerySignature {
            include: Filter { required: member, without: group.key().conditions.union(&update_bit) },
            unless: None,
        });
        Self { component, group: group.handle(), marker, query, backfill_query }
    }

    /// Component the update group is keyed on.
    #[inline]
    pub fn component(&self) -> ComponentID {
        self.component
    }

    /// Group whose entity lists drive this update group.
    #[inline]
    pub fn group(&self) -> ReactiveGroupHandle {
        self.group
    }

    /// Update marker slot.
    #[inline]
    pub fn marker(&self) -> ComponentID {
        self.marker
    }

    /// Entities carrying the component and the update marker.
    #[inline]
    pub fn query(&self) -> Query {
        self.query
    }

    /// Current members of the group that lack the update marker.
    #[inline]
    pub fn backfill_query(&self) -> Query {
        self.backfill_query
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::build_signature;

    #[test]
    fn derived_queries_are_disjoint() {
        let key = GroupKey { targets: build_signature(&[1, 2]), conditions: build_signature(&[3]) };
        let group = ReactiveGroup::new(ReactiveGroupHandle(0), key, 9, "g".into());

        let archetypes = [
            build_signature(&[1, 2]),
            build_signature(&[1, 2, 9]),
            build_signature(&[1, 9]),
            build_signature(&[1, 2, 3]),
            build_signature(&[1, 2, 3, 9]),
            build_signature(&[9]),
        ];
        for signature in &archetypes {
            assert!(
                !(group.add_query().matches(signature) && group.remove_query().matches(signature)),
                "{signature:?} matched both queries"
            );
        }

        assert!(group.add_query().matches(&archetypes[0]));
        assert!(!group.add_query().matches(&archetypes[3]), "condition suppresses add");
        assert!(!group.remove_query().matches(&archetypes[1]), "still matching");
        assert!(group.remove_query().matches(&archetypes[2]), "target missing");
        assert!(group.remove_query().matches(&archetypes[4]), "condition present");
        assert!(group.remove_query().matches(&archetypes[5]));
    }

    #[test]
    fn short_names_strip_paths_and_generics() {
        assert_eq!(short_name("game::stats::Health"), "Health");
        assert_eq!(short_name("reactive_ecs::reactive::shadow::Changed<game::Position>"), "Changed");
    }
}

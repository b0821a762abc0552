//! Instance-owned lookup cache for reactive groups.
//!
//! Maps a canonical [`GroupKey`] to its registered [`ReactiveGroup`] and a
//! component id to its [`UpdateGroup`]. Groups and their marker slots are
//! created lazily on first registration and live as long as the owning
//! engine. Registering the same key again, with types listed in any order,
//! returns the existing handle.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::engine::component::ComponentRegistry;
use crate::engine::error::{ECSResult, ReactiveError};
use crate::engine::types::ComponentID;
use crate::reactive::group::{GroupKey, ReactiveGroup, ReactiveGroupHandle, UpdateGroup};

/// Reactive groups and update groups of one engine.
#[derive(Debug, Default)]
pub struct ReactiveCache {
    groups: Vec<ReactiveGroup>,
    by_key: HashMap<GroupKey, ReactiveGroupHandle>,
    update_groups: BTreeMap<ComponentID, UpdateGroup>,
}

impl ReactiveCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct groups.
    #[inline]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Returns `true` if no group was registered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Groups in registration order.
    #[inline]
    pub fn groups(&self) -> &[ReactiveGroup] {
        &self.groups
    }

    /// Returns the group for `key`, creating it and its marker slot on first use.
    pub fn get_or_insert(&mut self, registry: &ComponentRegistry, key: GroupKey) -> ECSResult<ReactiveGroupHandle> {
        if let Some(&handle) = self.by_key.get(&key) {
            return Ok(handle);
        }
        for component_id in key.targets.union(&key.conditions).iterate_over_components() {
            registry.ensure_known(component_id)?;
        }
        key.validate(registry)?;

        let name = key.marker_name(registry);
        let marker = registry.register_marker(format!("reactive{name}"))?;
        let handle = ReactiveGroupHandle(self.groups.len() as u32);
        debug!(%handle, group = %name, marker, "registered reactive group");

        self.groups.push(ReactiveGroup::new(handle, key, marker, name));
        self.by_key.insert(key, handle);
        Ok(handle)
    }

    /// Group registered under `handle`.
    pub fn group(&self, handle: ReactiveGroupHandle) -> Result<&ReactiveGroup, ReactiveError> {
        self.groups.get(handle.0 as usize).ok_or(ReactiveError::UnknownGroup(handle.0))
    }

    /// Handle registered for `key`, if any.
    pub fn find(&self, key: &GroupKey) -> Option<ReactiveGroupHandle> {
        self.by_key.get(key).copied()
    }

    /// Binds an update group on `component` to `handle`.
    ///
    /// Idempotent for the same pair. Fails if `component` is not a target of
    /// the group or already bound to another group.
    pub fn insert_update_group(
        &mut self,
        registry: &ComponentRegistry,
        handle: ReactiveGroupHandle,
        component: ComponentID,
    ) -> ECSResult<&UpdateGroup> {
        registry.ensure_known(component)?;
        let group = self.group(handle)?;
        if !group.key().targets.has(component) {
            return Err(ReactiveError::UpdateComponentNotTargeted { component, group: handle.0 }.into());
        }
        if let Some(existing) = self.update_groups.get(&component) {
            if existing.group() != handle {
                return Err(ReactiveError::UpdateGroupConflict { component, existing: existing.group().0 }.into());
            }
        } else {
            let name = format!("reactive.update[{}]", registry.name_of(component));
            let marker = registry.register_marker(name)?;
            debug!(%handle, component, marker, "registered update group");
            let update = UpdateGroup::new(component, group, marker);
            self.update_groups.insert(component, update);
        }
        self.update_group(component).map_err(Into::into)
    }

    /// Update group keyed on `component`.
    pub fn update_group(&self, component: ComponentID) -> Result<&UpdateGroup, ReactiveError> {
        self.update_groups.get(&component).ok_or(ReactiveError::UnknownUpdateGroup(component))
    }

    /// Update groups driven by `handle`, in component id order.
    pub fn update_groups_of(&self, handle: ReactiveGroupHandle) -> impl Iterator<Item = &UpdateGroup> + '_ {
        self.update_groups.values().filter(move |update| update.group() == handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::error::ECSError;
    use crate::engine::types::build_signature;

    struct Health;
    struct Dead;
    struct Armor;

    fn registry() -> (ComponentRegistry, ComponentID, ComponentID, ComponentID) {
        let registry = ComponentRegistry::new();
        let health = registry.register::<Health>().unwrap();
        let dead = registry.register::<Dead>().unwrap();
        let armor = registry.register::<Armor>().unwrap();
        (registry, health, dead, armor)
    }

    #[test]
    fn same_key_in_any_order_resolves_to_one_group() {
        let (registry, health, dead, armor) = registry();
        let mut cache = ReactiveCache::new();

        let first = cache
            .get_or_insert(&registry, GroupKey { targets: build_signature(&[health, armor]), conditions: build_signature(&[dead]) })
            .unwrap();
        let second = cache
            .get_or_insert(&registry, GroupKey { targets: build_signature(&[armor, health]), conditions: build_signature(&[dead]) })
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);
        assert!(registry.is_marker(cache.group(first).unwrap().marker()));
    }

    #[test]
    fn invalid_keys_are_rejected() {
        let (registry, health, dead, _) = registry();
        let mut cache = ReactiveCache::new();

        let overlap = GroupKey { targets: build_signature(&[health]), conditions: build_signature(&[health, dead]) };
        assert_eq!(
            cache.get_or_insert(&registry, overlap),
            Err(ECSError::Reactive(ReactiveError::OverlappingTypes { component: health }))
        );

        let empty = GroupKey { targets: build_signature(&[]), conditions: build_signature(&[dead]) };
        assert_eq!(cache.get_or_insert(&registry, empty), Err(ECSError::Reactive(ReactiveError::EmptyTargets)));

        let handle = cache
            .get_or_insert(&registry, GroupKey { targets: build_signature(&[health]), conditions: build_signature(&[]) })
            .unwrap();
        let marker = cache.group(handle).unwrap().marker();
        let on_marker = GroupKey { targets: build_signature(&[marker]), conditions: build_signature(&[]) };
        assert_eq!(
            cache.get_or_insert(&registry, on_marker),
            Err(ECSError::Reactive(ReactiveError::MarkerInGroup { component: marker }))
        );
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn update_groups_bind_to_one_target_group() {
        let (registry, health, dead, armor) = registry();
        let mut cache = ReactiveCache::new();
        let alive = cache
            .get_or_insert(&registry, GroupKey { targets: build_signature(&[health]), conditions: build_signature(&[dead]) })
            .unwrap();
        let armored = cache
            .get_or_insert(&registry, GroupKey { targets: build_signature(&[health, armor]), conditions: build_signature(&[]) })
            .unwrap();

        let marker = cache.insert_update_group(&registry, alive, health).unwrap().marker();
        assert_eq!(cache.insert_update_group(&registry, alive, health).unwrap().marker(), marker);
        assert_eq!(
            cache.insert_update_group(&registry, armored, health).map(|update| update.marker()),
            Err(ECSError::Reactive(ReactiveError::UpdateGroupConflict { component: health, existing: alive.0 }))
        );
        assert_eq!(
            cache.insert_update_group(&registry, alive, armor).map(|update| update.marker()),
            Err(ECSError::Reactive(ReactiveError::UpdateComponentNotTargeted { component: armor, group: alive.0 }))
        );
        assert_eq!(cache.update_groups_of(alive).count(), 1);
        assert_eq!(cache.update_groups_of(armored).count(), 0);
    }
}

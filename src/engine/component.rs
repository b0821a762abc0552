//! # Component Registry
//!
//! Assigns stable `ComponentID` values to Rust component types and to anonymous
//! **marker slots**, and exposes the storage factories archetypes use to
//! allocate columns.
//!
//! ## Design
//! - The registry is owned by a store instance ([`ECSData`](crate::engine::manager::ECSData)),
//!   never a process-wide singleton, so independent worlds do not share ids.
//! - Components are registered once and assigned a compact id in `[0, COMPONENT_CAP)`.
//! - Marker slots are zero-size tags allocated at runtime under a name. Every
//!   slot stores [`MarkerSlot`] values but has its own id, so "one distinct tag
//!   per tracked thing" needs no runtime type generation.
//! - The registry can be frozen to reject further registrations.
//!
//! ## Concurrency
//! Internally protected by an `RwLock`: lookups are concurrent, registrations
//! are serialized. Registration therefore works through `&self`, which lets
//! query builders and replays register lazily.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::mem::{align_of, size_of};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::engine::error::RegistryError;
use crate::engine::storage::{Attribute, TypeErasedAttribute};
use crate::engine::types::{ComponentID, COMPONENT_CAP};

/// Bound shared by every component type.
pub trait Component: 'static + Send + Sync {}

impl<T: 'static + Send + Sync> Component for T {}

/// Storage value of every marker slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct MarkerSlot;

/// Factory function for constructing an empty type-erased column.
type FactoryFn = fn() -> Box<dyn TypeErasedAttribute>;

/// Registers a component type and returns its id.
pub type RegisterFn = fn(&ComponentRegistry) -> Result<ComponentID, RegistryError>;

fn new_attribute_storage<T: Component>() -> Box<dyn TypeErasedAttribute> {
    Box::new(Attribute::<T>::default())
}

fn register_erased<T: Component>(registry: &ComponentRegistry) -> Result<ComponentID, RegistryError> {
    registry.register::<T>()
}

/// Whether a registered id carries data or is a runtime marker slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    /// A Rust type registered through [`ComponentRegistry::register`].
    Typed,
    /// An anonymous tag registered through [`ComponentRegistry::register_marker`].
    Marker,
}

/// Describes a registered component.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ComponentDesc {
    /// Runtime identifier assigned to this component.
    pub component_id: ComponentID,

    /// Rust type name, or the marker slot name.
    pub name: String,

    /// Runtime `TypeId` of the stored value.
    pub type_id: TypeId,

    /// Size of the stored value in bytes.
    pub size: usize,

    /// Alignment of the stored value in bytes.
    pub align: usize,

    /// Typed component or marker slot.
    pub kind: ComponentKind,
}

impl ComponentDesc {
    /// Constructs a descriptor for type `T`.
    #[inline]
    pub fn of<T: 'static>(component_id: ComponentID, kind: ComponentKind) -> Self {
        Self {
            component_id,
            name: type_name::<T>().to_owned(),
            type_id: TypeId::of::<T>(),
            size: size_of::<T>(),
            align: align_of::<T>(),
            kind,
        }
    }
}

impl fmt::Display for ComponentDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ComponentDesc {{ id: {}, name: {}, size: {}, align: {} }}",
            self.component_id, self.name, self.size, self.align
        )
    }
}

#[derive(Default)]
struct RegistryInner {
    by_type: HashMap<TypeId, ComponentID>,
    descriptions: Vec<ComponentDesc>,
    factories: Vec<FactoryFn>,
    frozen: bool,
}

impl RegistryInner {
    fn insert(&mut self, mut description: ComponentDesc, factory: FactoryFn) -> Result<ComponentID, RegistryError> {
        if self.frozen {
            return Err(RegistryError::Frozen { name: description.name });
        }
        if self.descriptions.len() >= COMPONENT_CAP {
            return Err(RegistryError::CapacityExceeded { capacity: COMPONENT_CAP });
        }

        let component_id = self.descriptions.len() as ComponentID;
        description.component_id = component_id;
        self.descriptions.push(description);
        self.factories.push(factory);
        Ok(component_id)
    }
}

/// Mapping between component types / marker slots and compact `ComponentID`s.
#[derive(Default)]
pub struct ComponentRegistry {
    inner: RwLock<RegistryInner>,
}

impl ComponentRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers component type `T` and returns its id.
    ///
    /// Registering an already known type returns the existing id, even when
    /// the registry is frozen.
    pub fn register<T: Component>(&self) -> Result<ComponentID, RegistryError> {
        let type_id = TypeId::of::<T>();
        if let Some(&existing) = self.read().by_type.get(&type_id) {
            return Ok(existing);
        }

        let mut inner = self.write();
        if let Some(&existing) = inner.by_type.get(&type_id) {
            return Ok(existing);
        }
        let component_id = inner.insert(ComponentDesc::of::<T>(0, ComponentKind::Typed), new_attribute_storage::<T>)?;
        inner.by_type.insert(type_id, component_id);
        Ok(component_id)
    }

    /// Allocates a fresh zero-size marker slot named `name`.
    ///
    /// Every call allocates a new id; callers that want one slot per key cache
    /// the returned id themselves.
    pub fn register_marker(&self, name: impl Into<String>) -> Result<ComponentID, RegistryError> {
        let mut description = ComponentDesc::of::<MarkerSlot>(0, ComponentKind::Marker);
        description.name = name.into();
        self.write().insert(description, new_attribute_storage::<MarkerSlot>)
    }

    /// Freezes the registry.
    pub fn freeze(&self) {
        self.write().frozen = true;
    }

    /// Returns `true` if the registry has been frozen.
    pub fn is_frozen(&self) -> bool {
        self.read().frozen
    }

    /// Number of registered components and marker slots.
    pub fn len(&self) -> usize {
        self.read().descriptions.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fails with [`RegistryError::UnknownComponent`] unless `component_id`
    /// was handed out by this registry.
    pub fn ensure_known(&self, component_id: ComponentID) -> Result<(), RegistryError> {
        if (component_id as usize) < self.len() {
            Ok(())
        } else {
            Err(RegistryError::UnknownComponent(component_id))
        }
    }

    /// Returns the id for `T`, if registered.
    pub fn id_of<T: 'static>(&self) -> Option<ComponentID> {
        self.read().by_type.get(&TypeId::of::<T>()).copied()
    }

    /// Returns the id for `T`, failing if it was never registered.
    pub fn require_id_of<T: 'static>(&self) -> Result<ComponentID, RegistryError> {
        self.id_of::<T>().ok_or(RegistryError::NotRegistered { name: type_name::<T>() })
    }

    /// Returns a copy of the descriptor for `component_id`.
    pub fn describe(&self, component_id: ComponentID) -> Option<ComponentDesc> {
        self.read().descriptions.get(component_id as usize).cloned()
    }

    /// Returns the display name of `component_id`.
    pub fn name_of(&self, component_id: ComponentID) -> String {
        self.describe(component_id)
            .map(|description| description.name)
            .unwrap_or_else(|| format!("#{component_id}"))
    }

    /// Returns `true` if `component_id` is a marker slot.
    pub fn is_marker(&self, component_id: ComponentID) -> bool {
        self.read()
            .descriptions
            .get(component_id as usize)
            .is_some_and(|description| description.kind == ComponentKind::Marker)
    }

    /// Creates an empty storage column for `component_id`.
    pub fn make_empty(&self, component_id: ComponentID) -> Result<Box<dyn TypeErasedAttribute>, RegistryError> {
        self.read()
            .factories
            .get(component_id as usize)
            .map(|factory| factory())
            .ok_or(RegistryError::UnknownComponent(component_id))
    }
}

/// Reference to a component by id, or by type to be resolved (and registered)
/// at replay time.
#[derive(Clone, Copy)]
pub enum ComponentKey {
    /// An already resolved id (typed component or marker slot).
    Id(ComponentID),
    /// A Rust type that may not be registered yet.
    Typed {
        /// Rust type name, for diagnostics.
        name: &'static str,
        /// Registers the type and returns its id.
        register: RegisterFn,
    },
}

impl ComponentKey {
    /// Key for component type `T`.
    pub fn of<T: Component>() -> Self {
        Self::Typed { name: type_name::<T>(), register: register_erased::<T> }
    }

    /// Resolves the key against `registry`, registering typed keys on demand.
    pub fn resolve(&self, registry: &ComponentRegistry) -> Result<ComponentID, RegistryError> {
        match self {
            Self::Id(component_id) => Ok(*component_id),
            Self::Typed { register, .. } => register(registry),
        }
    }
}

impl fmt::Debug for ComponentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(component_id) => f.debug_tuple("Id").field(component_id).finish(),
            Self::Typed { name, .. } => f.debug_tuple("Typed").field(name).finish(),
        }
    }
}

impl From<ComponentID> for ComponentKey {
    fn from(component_id: ComponentID) -> Self {
        Self::Id(component_id)
    }
}

/// Heterogeneous set of component values used to spawn an entity.
///
/// Inserting the same type twice keeps the last value.
#[derive(Default)]
pub struct Bundle {
    entries: Vec<(TypeId, RegisterFn, Box<dyn Any + Send>)>,
}

impl Bundle {
    /// Creates an empty bundle.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `value` and returns the bundle.
    #[inline]
    pub fn with<T: Component>(mut self, value: T) -> Self {
        self.insert(value);
        self
    }

    /// Inserts `value`, replacing any previous value of the same type.
    pub fn insert<T: Component>(&mut self, value: T) {
        let type_id = TypeId::of::<T>();
        self.entries.retain(|(existing, _, _)| *existing != type_id);
        self.entries.push((type_id, register_erased::<T>, Box::new(value)));
    }

    /// Number of component values.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the bundle holds no value.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registers every type in the bundle and pairs each value with its id.
    pub(crate) fn resolve(
        self,
        registry: &ComponentRegistry,
    ) -> Result<Vec<(ComponentID, Box<dyn Any + Send>)>, RegistryError> {
        self.entries
            .into_iter()
            .map(|(_, register, value)| Ok((register(registry)?, value)))
            .collect()
    }
}

impl fmt::Debug for Bundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bundle").field("len", &self.entries.len()).finish()
    }
}

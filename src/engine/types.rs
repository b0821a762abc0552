//! Core ECS Types, Identifiers, and Bit-Level Layouts
//!
//! This module defines the **fundamental identifiers, signatures and query
//! filters** shared by the store and the reactive layer.
//!
//! ## Entity Representation
//!
//! Entities are encoded as a packed 64-bit integer:
//!
//! ```text
//! | version (32) | index (32) |
//! ```
//!
//! - **Index** identifies the slot in the entity allocator.
//! - **Version** enables stale-entity detection after despawning.
//!
//! ## Signatures
//!
//! Component sets are fixed-size bit arrays ([`Signature`]). They are used for
//! archetype identity, query matching, access conflict detection and, in the
//! reactive layer, as the canonical (order-independent) key of a reactive group.
//!
//! ## Queries
//!
//! A [`QuerySignature`] is an `include` [`Filter`] (all-of / none-of) plus an
//! optional `unless` filter. An archetype matches when it satisfies `include`
//! and does **not** satisfy `unless`. The negated filter is what lets a single
//! query express "has the marker and is missing at least one target or has a
//! condition component".

/// Bit-width type used for compile-time layout calculations.
pub type Bits = u8;

/// Globally unique entity identifier encoded as a packed 64-bit value.
pub type EntityID = u64;
/// Index within the entity allocator.
pub type IndexID = u32;
/// Generation counter used to detect stale entities.
pub type VersionID = u32;

/// Unique identifier for a system.
pub type SystemID = u16;
/// Reactive tick counter.
pub type Tick = u64;
/// Structural epoch of the store; bumped by every replay that changed structure.
pub type Epoch = u64;

/// Number of bits reserved for the entity index.
pub const INDEX_BITS: Bits = 32;
/// Mask selecting the index portion of an [`EntityID`].
pub const INDEX_MASK: EntityID = (1 << INDEX_BITS) - 1;
/// Maximum number of live entity slots.
pub const INDEX_CAP: IndexID = IndexID::MAX;

/// Unique identifier for an archetype.
pub type ArchetypeID = u16;
/// Row index within a chunk.
pub type RowID = u32;
/// Chunk index within an archetype.
pub type ChunkID = u16;

/// Maximum number of rows per chunk.
pub const CHUNK_CAP: usize = 1024;

/// Unique identifier for a component type or marker slot.
pub type ComponentID = u16;

/// Maximum number of registered component types (including marker slots).
pub const COMPONENT_CAP: usize = 512;
/// Number of `u64` words required to represent a full component signature.
pub const SIGNATURE_SIZE: usize = COMPONENT_CAP.div_ceil(64);

/// Bitset representing a set of components.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Signature {
    /// Packed component bitset.
    pub components: [u64; SIGNATURE_SIZE],
}

impl Default for Signature {
    fn default() -> Self {
        Self { components: [0u64; SIGNATURE_SIZE] }
    }
}

impl Signature {
    /// Sets the bit corresponding to `component_id`.
    #[inline]
    pub fn set(&mut self, component_id: ComponentID) {
        let index = (component_id as usize) / 64;
        let bits = (component_id as usize) % 64;
        self.components[index] |= 1u64 << bits;
    }

    /// Clears the bit corresponding to `component_id`.
    #[inline]
    pub fn clear(&mut self, component_id: ComponentID) {
        let index = (component_id as usize) / 64;
        let bits = (component_id as usize) % 64;
        self.components[index] &= !(1u64 << bits);
    }

    /// Returns `true` if `component_id` is present in this signature.
    #[inline]
    pub fn has(&self, component_id: ComponentID) -> bool {
        let index = (component_id as usize) / 64;
        let bits = (component_id as usize) % 64;
        (self.components[index] >> bits) & 1 == 1
    }

    /// Returns `true` if all components in `signature` are present.
    #[inline]
    pub fn contains_all(&self, signature: &Signature) -> bool {
        self.components
            .iter()
            .zip(signature.components.iter())
            .all(|(mine, theirs)| (mine & theirs) == *theirs)
    }

    /// Returns `true` if at least one component is present in both signatures.
    #[inline]
    pub fn intersects(&self, signature: &Signature) -> bool {
        self.components
            .iter()
            .zip(signature.components.iter())
            .any(|(mine, theirs)| (mine & theirs) != 0)
    }

    /// Returns `true` if no bit is set.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.components.iter().all(|&word| word == 0)
    }

    /// Returns the union of both signatures.
    #[inline]
    pub fn union(&self, other: &Signature) -> Signature {
        let mut out = *self;
        for (word, theirs) in out.components.iter_mut().zip(other.components.iter()) {
            *word |= theirs;
        }
        out
    }

    /// Returns the number of components in the set.
    #[inline]
    pub fn count(&self) -> usize {
        self.components.iter().map(|word| word.count_ones() as usize).sum()
    }

    /// Iterates over all component IDs set in this signature, in ascending order.
    pub fn iterate_over_components(&self) -> impl Iterator<Item = ComponentID> + '_ {
        self.components
            .iter()
            .enumerate()
            .flat_map(|(word_index, &word)| {
                let base = word_index * 64;
                let mut bits = word;
                std::iter::from_fn(move || {
                    if bits == 0 {
                        return None;
                    }
                    let tz = bits.trailing_zeros() as usize;
                    bits &= bits - 1;
                    Some((base + tz) as ComponentID)
                })
            })
    }
}

/// Builds a component signature from a list of component IDs.
///
/// Order and duplicates are irrelevant: `[a, b]`, `[b, a]` and `[a, b, a]`
/// produce the same signature.
pub fn build_signature(component_ids: &[ComponentID]) -> Signature {
    let mut signature = Signature::default();
    for &component_id in component_ids {
        signature.set(component_id);
    }
    signature
}

/// An all-of / none-of predicate over archetype signatures.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Filter {
    /// Components that must all be present.
    pub required: Signature,
    /// Components that must all be absent.
    pub without: Signature,
}

impl Filter {
    /// Returns `true` if an archetype with `signature` satisfies the filter.
    #[inline]
    pub fn matches(&self, signature: &Signature) -> bool {
        signature.contains_all(&self.required) && !signature.intersects(&self.without)
    }
}

/// Component signature used for query matching.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct QuerySignature {
    /// Filter the archetype must satisfy.
    pub include: Filter,

    /// Archetypes satisfying this filter are rejected.
    pub unless: Option<Filter>,
}

impl QuerySignature {
    /// Returns `true` if an archetype satisfies this query.
    pub fn requires_all(&self, archetype_signature: &Signature) -> bool {
        self.include.matches(archetype_signature)
            && !self.unless.is_some_and(|unless| unless.matches(archetype_signature))
    }
}

/// Declares the component access set of a system.
#[derive(Clone, Debug, Default)]
pub struct AccessSets {
    /// Components read by the system.
    pub read: Signature,
    /// Components written by the system (through deferred commands).
    pub write: Signature,
}

impl AccessSets {
    /// Returns `true` if this access set conflicts with another.
    #[inline]
    pub fn conflicts_with(&self, other: &AccessSets) -> bool {
        // (W ∩ W) or (W ∩ R) or (R ∩ W)
        self.write.intersects(&other.write)
            || self.write.intersects(&other.read)
            || self.read.intersects(&other.write)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_order_independent() {
        assert_eq!(build_signature(&[3, 70, 9]), build_signature(&[9, 3, 70, 3]));
        let ids: Vec<_> = build_signature(&[70, 3, 9]).iterate_over_components().collect();
        assert_eq!(ids, vec![3, 9, 70]);
    }

    #[test]
    fn unless_filter_rejects_full_match() {
        // marker = 0, target = 1, condition = 2
        let query = QuerySignature {
            include: Filter { required: build_signature(&[0]), without: Signature::default() },
            unless: Some(Filter {
                required: build_signature(&[1]),
                without: build_signature(&[2]),
            }),
        };

        assert!(!query.requires_all(&build_signature(&[0, 1])), "still matching: not removed");
        assert!(query.requires_all(&build_signature(&[0])), "target gone: removed");
        assert!(query.requires_all(&build_signature(&[0, 1, 2])), "condition present: removed");
        assert!(!query.requires_all(&build_signature(&[1])), "no marker: never removed");
    }

    #[test]
    fn access_conflicts() {
        let reader = AccessSets { read: build_signature(&[1]), write: Signature::default() };
        let writer = AccessSets { read: Signature::default(), write: build_signature(&[1]) };
        assert!(!reader.conflicts_with(&reader));
        assert!(reader.conflicts_with(&writer));
        assert!(writer.conflicts_with(&writer));
    }
}

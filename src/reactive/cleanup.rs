//! Transient-tag cleanup pass.
//!
//! Records `RemoveComponent(tag)` for every entity that carries `tag`. The
//! engine runs it in the track stage, after consumers had their phase, so a
//! changed-tag added by the detect stage is visible for exactly one consumer
//! phase and gone before the next detect stage.

use tracing::trace;

use crate::engine::commands::CommandWriter;
use crate::engine::manager::ECSData;
use crate::engine::query::Query;
use crate::engine::types::{ComponentID, Filter, QuerySignature, Signature};

/// Sweep removing one transient tag.
#[derive(Clone, Debug)]
pub struct TagCleanup {
    tag: ComponentID,
    name: &'static str,
    query: Query,
}

impl TagCleanup {
    /// Creates the sweep for `tag`.
    pub fn new(tag: ComponentID, name: &'static str) -> Self {
        let mut required = Signature::default();
        required.set(tag);
        let query = Query::from_signature(QuerySignature {
            include: Filter { required, without: Signature::default() },
            unless: None,
        });
        Self { tag, name, query }
    }

    /// Tag removed by this sweep.
    #[inline]
    pub fn tag(&self) -> ComponentID {
        self.tag
    }

    /// Entities currently carrying the tag.
    #[inline]
    pub fn query(&self) -> Query {
        self.query
    }

    /// Records the removals and returns how many were recorded.
    pub fn record(&self, world: &ECSData, writer: &mut CommandWriter<'_>) -> usize {
        let tagged = world.entities(&self.query);
        for &entity in &tagged {
            writer.remove_by_id(entity, self.tag);
        }
        if !tagged.is_empty() {
            trace!(tag = self.name, removed = tagged.len(), "tag cleanup");
        }
        tagged.len()
    }
}

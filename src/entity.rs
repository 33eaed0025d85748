//! Opaque entity handles.
//!
//! The store never interprets an entity beyond its reference identity: two [`EntityRef`]s name
//! the same entity iff they were cloned from the same `Arc`. Analyses are free to store a method,
//! a field, an allocation site, or the whole project behind this handle; the store only ever
//! hashes and compares it, and prints it via the `EntityFormatter` collaborator.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;

/// Marker trait implemented for every type that may be used as an entity.
///
/// There is nothing to implement: any `'static + Send + Sync` value qualifies. The blanket impl
/// exists so that callers don't need to write `impl Entity for MyMethod {}` boilerplate for every
/// entity type their analyses introduce.
pub trait Entity: Any + Send + Sync {
    #[doc(hidden)]
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + Send + Sync> Entity for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A reference-counted handle to an entity, keyed by pointer identity.
pub type EntityRef = Arc<dyn Entity>;

/// A dense, per-store identifier assigned the first time an entity is referenced.
///
/// `EntityId`s are only comparable within the [`PropertyStore`](crate::PropertyStore) that
/// assigned them.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityId(pub(crate) u32);

impl EntityId {
    #[inline]
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// Reference-identity key used to intern [`EntityRef`]s.
///
/// Casting the fat `*const dyn Entity` pointer down to `*const ()` drops the vtable half,
/// leaving just the data address, which is exactly what "reference identity" means here: two
/// `Arc`s pointing at the same allocation produce the same key regardless of which `Entity`
/// impl's vtable they were constructed with.
fn identity_key(entity: &EntityRef) -> usize {
    Arc::as_ptr(entity) as *const () as usize
}

/// Owns the bidirectional mapping between [`EntityRef`]s and the dense [`EntityId`]s used
/// internally to index the slot table.
///
/// Entities are materialised lazily: the first call to [`EntityTable::intern`] for a given
/// reference assigns its id; every subsequent call (including ones made with a different `Arc`
/// that happens to point at the same allocation) returns the same id.
#[derive(Default)]
pub struct EntityTable {
    by_identity: FxHashMap<usize, EntityId>,
    entities: Vec<EntityRef>,
}

impl EntityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the id for an already-interned entity, without creating one.
    pub fn lookup(&self, entity: &EntityRef) -> Option<EntityId> {
        self.by_identity.get(&identity_key(entity)).copied()
    }

    /// Intern `entity`, assigning a fresh [`EntityId`] if this is the first time it has been
    /// seen.
    pub fn intern(&mut self, entity: EntityRef) -> EntityId {
        let key = identity_key(&entity);
        if let Some(id) = self.by_identity.get(&key) {
            return *id;
        }
        let id = EntityId(self.entities.len() as u32);
        self.entities.push(entity);
        self.by_identity.insert(key, id);
        id
    }

    pub fn resolve(&self, id: EntityId) -> &EntityRef {
        &self.entities[id.0 as usize]
    }

    pub fn is_known(&self, entity: &EntityRef) -> bool {
        self.by_identity.contains_key(&identity_key(entity))
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &EntityRef)> {
        self.entities
            .iter()
            .enumerate()
            .map(|(i, e)| (EntityId(i as u32), e))
    }
}

/// Formats an entity for diagnostics.
///
/// The store has no way to `Debug`-format an arbitrary `Entity` (it deliberately does not
/// require `Debug` on the trait, since doing so would force every embedding collaborator to
/// implement it). When an `EntityFormatter` collaborator is present in the [`Context`](crate::Context),
/// diagnostics and panics route through it instead of a raw pointer dump.
pub type EntityFormatter = Arc<dyn Fn(&EntityRef) -> String + Send + Sync>;

pub(crate) fn format_entity(formatter: Option<&EntityFormatter>, entity: &EntityRef) -> String {
    match formatter {
        Some(f) => f(entity),
        None => format!("<entity @ {:#x}>", identity_key(entity)),
    }
}

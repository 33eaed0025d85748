//! Property kinds: the namespace of dimensions in the property space.

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::entity::EntityRef;
use crate::error::StoreError;
use crate::lattice::Property;
use crate::slot::Eps;
use crate::store::PropertyStore;

/// A dense, per-registry identifier for a [`PropertyKind`].
///
/// Ids are assigned in creation order starting at `0`, which is what lets the slot table use a
/// plain `Vec`-backed arena indexed by `(EntityId, KindId)` rather than a hash map keyed on kind
/// name.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KindId(pub(crate) u32);

impl KindId {
    #[inline]
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for KindId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "k{}", self.0)
    }
}

/// Consulted for every `(entity, kind)` slot still lacking a produced property at quiescence,
/// provided the kind is in `computed` and not in `delayed`.
pub type FallbackFn = Arc<dyn Fn(&PropertyStore, &EntityRef, KindId) -> Property + Send + Sync>;

/// Called once per closed SCC detected at quiescence, with `head` being the
/// deterministically-chosen representative of the cycle. Returns the final property to commit
/// for that representative; the rest of the cycle's members are retried afterwards.
pub type CycleResolverFn = Arc<dyn Fn(&PropertyStore, &Eps) -> Property + Send + Sync>;

/// A static descriptor for one dimension of the property space.
///
/// Kinds are immutable after creation.
pub struct PropertyKind {
    id: KindId,
    name: Arc<str>,
    fallback: FallbackFn,
    cycle_resolver: CycleResolverFn,
}

impl PropertyKind {
    #[inline]
    pub fn id(&self) -> KindId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fallback(&self, store: &PropertyStore, entity: &EntityRef) -> Property {
        (self.fallback)(store, entity, self.id)
    }

    pub fn resolve_cycle(&self, store: &PropertyStore, head: &Eps) -> Property {
        (self.cycle_resolver)(store, head)
    }

    /// A cheap `Arc` clone of the fallback closure, for callers that need to release the store's
    /// internal lock before invoking it (fallback/cycle-resolver calls may themselves call back
    /// into the store).
    pub(crate) fn fallback_fn(&self) -> FallbackFn {
        self.fallback.clone()
    }

    pub(crate) fn cycle_resolver_fn(&self) -> CycleResolverFn {
        self.cycle_resolver.clone()
    }
}

impl fmt::Debug for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyKind")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Owns every [`PropertyKind`] created via [`crate::PropertyStore::create_kind`].
///
/// `create_kind` is idempotent by name: re-creating a kind with the same name and the same
/// `fallback`/`cycle_resolver` closures (by `Arc` identity) returns the existing id; re-creating
/// it with different closures is a [`StoreError::KindConflict`].
#[derive(Default)]
pub struct KindRegistry {
    by_name: FxHashMap<Arc<str>, KindId>,
    kinds: Vec<PropertyKind>,
}

impl KindRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_kind(
        &mut self,
        name: impl Into<Arc<str>>,
        fallback: FallbackFn,
        cycle_resolver: CycleResolverFn,
    ) -> Result<KindId, StoreError> {
        let name = name.into();
        if let Some(&existing) = self.by_name.get(&name) {
            let kind = &self.kinds[existing.0 as usize];
            let same_fallback = Arc::ptr_eq(&kind.fallback, &fallback);
            let same_resolver = Arc::ptr_eq(&kind.cycle_resolver, &cycle_resolver);
            return if same_fallback && same_resolver {
                Ok(existing)
            } else {
                Err(StoreError::KindConflict { name: name.to_string() })
            };
        }

        let id = KindId(self.kinds.len() as u32);
        self.kinds.push(PropertyKind {
            id,
            name: name.clone(),
            fallback,
            cycle_resolver,
        });
        self.by_name.insert(name, id);
        log::debug!(target: "property-store::kind", "created property kind {id} ({})", self.kinds[id.0 as usize].name());
        Ok(id)
    }

    pub fn get(&self, id: KindId) -> &PropertyKind {
        &self.kinds[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

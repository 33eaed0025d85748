//! Bounded lattice values.
//!
//! Every [`PropertyKind`](crate::kind::PropertyKind) is a dimension of the property space whose
//! values form a bounded lattice. Analysis authors implement [`LatticeLike`] for their own value
//! type (a purity enum, an escape-state enum, an integer range, …); the store itself only ever
//! sees the type-erased [`Property`] wrapper, which dispatches `join`/`meet`/equality through a
//! small vtable-shaped trait object rather than a generic parameter, since a single slot table
//! holds properties of many different kinds side by side.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::kind::KindId;

/// This trait must be implemented for any value that exhibits the properties of a
/// [Lattice](https://en.wikipedia.org/wiki/Lattice_(order)#Definition).
///
/// Lattices can either be bounded or unbounded, however in the specific case of fixpoint
/// analysis, virtually all lattices are going to be bounded, in order to represent two important
/// states:
///
/// * Undefined (i.e. not yet known, _bottom_). This is the initial/minimum value.
/// * Overdefined (i.e. cannot be known, _top_). This is the maximum value, almost always used to
///   signal that an analysis has reached conflicting conclusions.
///
/// `join` computes the least upper bound and `meet` the greatest lower bound. A value `a` is `<=`
/// another value `b` (in the sense monotone narrowing needs) iff `a.join(b) == b` (and
/// equivalently `a.meet(b) == a`).
pub trait LatticeLike: Any + fmt::Debug + Clone + PartialEq + Send + Sync + 'static {
    /// The bottom (most minimal, least precise) value of this lattice.
    fn bottom() -> Self;

    /// The top (most maximal, "overdefined"/conflict) value of this lattice.
    fn top() -> Self;

    /// Joins `self` with `other`, producing the least upper bound of the two values.
    fn join(&self, other: &Self) -> Self;

    /// Meets `self` with `other`, producing the greatest lower bound of the two values.
    fn meet(&self, other: &Self) -> Self;

    /// `true` iff `self` is `<=` `other` in the lattice's partial order.
    fn le(&self, other: &Self) -> bool {
        &self.join(other) == other
    }
}

/// Type-erased form of a [`LatticeLike`] value, stored behind a single vtable per concrete type.
///
/// This is the property-store equivalent of a tagged union discriminated by [`KindId`]: the
/// `KindId` carried alongside a `Property` tells the store which concrete type a `dyn ErasedValue`
/// payload actually is, and every dispatch point downcasts via [`ErasedValue::as_any`] before
/// calling back into the concrete `LatticeLike` impl.
pub(crate) trait ErasedValue: Any + fmt::Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn dyn_clone(&self) -> Box<dyn ErasedValue>;
    fn dyn_eq(&self, other: &dyn ErasedValue) -> bool;
    fn dyn_join(&self, other: &dyn ErasedValue) -> Box<dyn ErasedValue>;
    fn dyn_meet(&self, other: &dyn ErasedValue) -> Box<dyn ErasedValue>;
    fn dyn_le(&self, other: &dyn ErasedValue) -> bool;
}

impl<T: LatticeLike> ErasedValue for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dyn_clone(&self) -> Box<dyn ErasedValue> {
        Box::new(self.clone())
    }

    fn dyn_eq(&self, other: &dyn ErasedValue) -> bool {
        match other.as_any().downcast_ref::<T>() {
            Some(other) => self == other,
            None => false,
        }
    }

    fn dyn_join(&self, other: &dyn ErasedValue) -> Box<dyn ErasedValue> {
        let other = downcast::<T>(other);
        Box::new(LatticeLike::join(self, other))
    }

    fn dyn_meet(&self, other: &dyn ErasedValue) -> Box<dyn ErasedValue> {
        let other = downcast::<T>(other);
        Box::new(LatticeLike::meet(self, other))
    }

    fn dyn_le(&self, other: &dyn ErasedValue) -> bool {
        let other = downcast::<T>(other);
        LatticeLike::le(self, other)
    }
}

#[track_caller]
fn downcast<T: 'static>(value: &dyn ErasedValue) -> &T {
    value
        .as_any()
        .downcast_ref::<T>()
        .expect("property compared against a value of a different kind; this is a store bug")
}

/// A value in some [`PropertyKind`](crate::kind::PropertyKind)'s lattice, paired with the id of
/// that kind.
///
/// `Property` is `Clone` (a shallow clone of the boxed payload) and `PartialEq` (kind must match
/// *and* the payloads must compare equal); both are needed to compare successive `(lb, ub)` pairs
/// for the monotonicity check in [`crate::slot`].
pub struct Property {
    kind: KindId,
    value: Arc<dyn ErasedValue>,
}

impl Property {
    /// Wrap a concrete lattice value as a type-erased `Property` of `kind`.
    pub fn new<T: LatticeLike>(kind: KindId, value: T) -> Self {
        Self {
            kind,
            value: Arc::new(value),
        }
    }

    #[inline]
    pub fn kind(&self) -> KindId {
        self.kind
    }

    /// Downcast back to the concrete lattice type, if it matches `T`.
    pub fn downcast_ref<T: LatticeLike>(&self) -> Option<&T> {
        (*self.value).as_any().downcast_ref::<T>()
    }

    /// Join two properties of the same kind, producing their least upper bound.
    ///
    /// # Panics
    /// Panics if `self` and `other` carry different [`KindId`]s.
    pub fn join(&self, other: &Self) -> Self {
        assert_eq!(self.kind, other.kind, "cannot join properties of different kinds");
        Self {
            kind: self.kind,
            value: Arc::from(self.value.dyn_join(&*other.value)),
        }
    }

    /// Meet two properties of the same kind, producing their greatest lower bound.
    ///
    /// # Panics
    /// Panics if `self` and `other` carry different [`KindId`]s.
    pub fn meet(&self, other: &Self) -> Self {
        assert_eq!(self.kind, other.kind, "cannot meet properties of different kinds");
        Self {
            kind: self.kind,
            value: Arc::from(self.value.dyn_meet(&*other.value)),
        }
    }

    /// `true` iff `self <= other` in the shared kind's partial order.
    ///
    /// # Panics
    /// Panics if `self` and `other` carry different [`KindId`]s.
    pub fn le(&self, other: &Self) -> bool {
        assert_eq!(self.kind, other.kind, "cannot compare properties of different kinds");
        self.value.dyn_le(&*other.value)
    }
}

impl Clone for Property {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            value: self.value.clone(),
        }
    }
}

impl PartialEq for Property {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.value.dyn_eq(&*other.value)
    }
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.value, f)
    }
}

/// A bound in an [`Eps`](crate::slot::Eps): either a real [`Property`], or the reserved
/// `LazilyComputed` marker meaning "a lazy computation has been scheduled, no value is known
/// yet".
///
/// `LazilyComputed` is deliberately *not* a `Property` value (i.e. not a member of any kind's
/// lattice) — it is a placeholder distinct from every real value, including a kind's own bottom.
#[derive(Clone, Debug, PartialEq)]
pub enum Bound {
    LazilyComputed,
    Value(Property),
}

impl Bound {
    pub fn is_lazily_computed(&self) -> bool {
        matches!(self, Bound::LazilyComputed)
    }

    pub fn as_property(&self) -> Option<&Property> {
        match self {
            Bound::Value(p) => Some(p),
            Bound::LazilyComputed => None,
        }
    }
}

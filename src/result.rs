//! Analysis result kinds and the `PropertyComputation`/`OnUpdateContinuation` contracts.

use std::sync::Arc;

use crate::entity::EntityRef;
use crate::kind::KindId;
use crate::lattice::Property;
use crate::slot::Eps;
use crate::store::PropertyStore;

/// A pure (apart from reads through `get`) analysis entry point, invoked once per scheduled or
/// lazily-triggered entity.
pub type PropertyComputation = Arc<dyn Fn(&PropertyStore, &EntityRef) -> AnalysisResult + Send + Sync>;

/// Re-invoked exactly once when a dependee this computation registered against changes. Must not
/// retain the `Eps` snapshot it is handed beyond its own invocation.
pub type OnUpdateContinuation = Box<dyn FnOnce(&PropertyStore, Eps) -> AnalysisResult + Send>;

/// A user-supplied monotone refinement function for `PartialResult`.
///
/// Given the slot's current snapshot, returns the refined `(lb, ub)` to commit, or `None` if this
/// contribution has nothing to add right now.
pub type RefinementFn = Box<dyn FnOnce(&Eps) -> Option<(Property, Property)> + Send>;

/// The tagged union every analysis invocation and continuation returns.
pub enum AnalysisResult {
    /// No new information.
    NoResult,
    /// A final property for `entity`.
    Result { entity: EntityRef, property: Property },
    /// Many finals at once.
    MultiResult(Vec<(EntityRef, Property)>),
    /// A refinable slot plus the dependees it was derived from and the continuation to re-invoke
    /// when any of them changes.
    IntermediateResult {
        entity: EntityRef,
        lb: Property,
        ub: Property,
        /// The dependee snapshots this intermediate result was derived from, exactly as the
        /// analysis observed them via `get`. Carrying the snapshot (not just the entity/kind
        /// pair) is what lets the store detect a dependee that has since moved on.
        deps: Vec<Eps>,
        continuation: OnUpdateContinuation,
    },
    /// A collaborative contribution to a slot that may receive several independent partial
    /// refinements over the phase.
    PartialResult {
        entity: EntityRef,
        kind: KindId,
        refine: RefinementFn,
    },
    /// A sequence of results, dispatched in order.
    Results(Vec<AnalysisResult>),
    /// `result`, plus newly-discovered entities to schedule `pc` for.
    IncrementalResult {
        result: Box<AnalysisResult>,
        discovered: Vec<(PropertyComputation, EntityRef)>,
    },
}

impl AnalysisResult {
    pub fn result(entity: EntityRef, property: Property) -> Self {
        AnalysisResult::Result { entity, property }
    }
}

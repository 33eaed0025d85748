//! The error taxonomy and its `thiserror` encoding.

use thiserror::Error;

/// Every way a fallible store operation can fail.
///
/// Each variant carries enough context to log usefully: a kind name/id, and an entity rendered
/// through the `EntityFormatter` capability when the embedder supplied one (otherwise a raw
/// pointer tag, see [`crate::entity::format_entity`]).
#[derive(Debug, Error, Clone)]
pub enum StoreError {
    #[error("monotonicity violated for {epk_debug}: {detail}")]
    MonotonicityError { epk_debug: String, detail: String },

    #[error("attempt to update final slot {epk_debug}")]
    FinalOverwrite { epk_debug: String },

    #[error("two lazy computations registered for kind {kind}")]
    LazyConflict { kind: String },

    #[error("set() called on already-present slot {epk_debug}")]
    AlreadyPresent { epk_debug: String },

    #[error("kind {name:?} already registered with a different fallback or cycle resolver")]
    KindConflict { name: String },

    #[error("analysis computation for {epk_debug} panicked: {message}")]
    AnalysisCrash { epk_debug: String, message: String },

    #[error("fallback or cycle resolver for kind {kind} panicked: {message}")]
    ResolverCrash { kind: String, message: String },

    #[error("phase cancelled")]
    Cancelled,

    #[error("setup_phase called after a previous phase failed; call shutdown() or start a fresh store")]
    PhasePoisoned,
}

/// Returned by [`crate::PropertyStore::wait_on_phase_completion`] on success.
#[derive(Debug, Clone, Default)]
pub struct PhaseReport {
    pub tasks_executed: u64,
    pub fallbacks_applied: u64,
    pub cycles_resolved: u64,
}

/// Returned by [`crate::PropertyStore::wait_on_phase_completion`] when one or more tasks failed.
///
/// The first captured error is the primary; every other error captured before
/// the phase was marked failed is retained in `subsequent` so embedders can log the whole set
/// rather than only the one that happened to win the race to mark the phase failed.
#[derive(Debug, Error, Clone)]
#[error("phase failed: {primary}")]
pub struct PhaseFailure {
    pub primary: StoreError,
    pub subsequent: Vec<StoreError>,
}

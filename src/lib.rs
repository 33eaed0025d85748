//! A fixed-point property-computation engine for static analyses over opaque entities.
//!
//! Independent analyses derive mutually-dependent lattice-valued *properties* of *entities*
//! (methods, fields, allocation sites, whole projects, …) until the whole system reaches a global
//! fixpoint. [`PropertyStore`] coordinates lazy and eager scheduling, partial results that depend
//! on other still-unknown properties, continuation-based re-invocation when a dependee changes,
//! quiescence detection, fallback values, and cyclic-dependency resolution via user-supplied
//! cycle resolvers.
//!
//! The store never interprets entities or analysis-specific property values itself — see
//! [`entity::Entity`] and [`lattice::LatticeLike`] for the two extension points analyses hook
//! into.

mod config;
mod context;
mod entity;
mod error;
mod kind;
mod lattice;
#[cfg(feature = "parallel")]
mod parallel;
mod phase;
mod queue;
mod result;
mod slot;
mod store;

pub use config::StoreConfig;
pub use context::Context;
pub use entity::{Entity, EntityFormatter, EntityId, EntityRef};
pub use error::{PhaseFailure, PhaseReport, StoreError};
pub use kind::{CycleResolverFn, FallbackFn, KindId, PropertyKind};
pub use lattice::{Bound, LatticeLike, Property};
pub use result::{AnalysisResult, OnUpdateContinuation, PropertyComputation, RefinementFn};
pub use slot::{Epk, Eps, EpsState};
pub use store::{PropertyStore, Statistics};

//! The capability-descriptor context map.
//!
//! Collaborators (a declared-methods lookup, a class-hierarchy facade, a logger, the diagnostic
//! `EntityFormatter`, …) are registered by concrete type and retrieved the same way. There is no
//! string-keyed namespace to typo: the capability descriptor *is* the Rust type.

use std::any::{Any, TypeId};
use std::sync::Arc;

use rustc_hash::FxHashMap;

/// A mapping from capability descriptor (a concrete type) to the collaborator registered for it.
#[derive(Default)]
pub struct Context {
    capabilities: FxHashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `capability`, replacing any previous registration for the same type.
    pub fn with<T: Any + Send + Sync>(mut self, capability: T) -> Self {
        self.capabilities.insert(TypeId::of::<T>(), Arc::new(capability));
        self
    }

    /// Retrieve the collaborator registered for capability `T`, if any.
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.capabilities
            .get(&TypeId::of::<T>())
            .and_then(|c| c.clone().downcast::<T>().ok())
    }

    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.capabilities.contains_key(&TypeId::of::<T>())
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("capability_count", &self.capabilities.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(PartialEq, Debug)]
    struct Greeting(String);

    #[test]
    fn round_trips_a_capability() {
        let ctx = Context::new().with(Greeting("hi".into()));
        assert_eq!(&*ctx.get::<Greeting>().unwrap(), &Greeting("hi".into()));
        assert!(ctx.contains::<Greeting>());
    }

    #[test]
    fn missing_capability_is_none() {
        let ctx = Context::new();
        assert!(ctx.get::<Greeting>().is_none());
    }
}

//! The `PropertyStore`: the public façade unifying the property model, the dependency
//! graph, the scheduler, the analysis API, and phase control.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::StoreConfig;
use crate::context::Context;
use crate::entity::{format_entity, EntityFormatter, EntityId, EntityRef, EntityTable};
use crate::error::{PhaseFailure, PhaseReport, StoreError};
use crate::kind::{CycleResolverFn, FallbackFn, KindId, KindRegistry};
use crate::lattice::{Bound, Property};
use crate::phase::{tarjan_scc, PhaseConfig};
use crate::queue::{ComputationRegistry, Task, TaskQueue};
use crate::result::{AnalysisResult, PropertyComputation};
use crate::slot::{Epk, Eps, EpsState, SlotTable, UpdateReason};

/// Lightweight, free counters read via [`PropertyStore::statistics`] after a phase completes.
#[derive(Debug, Default, Clone, Copy)]
pub struct Statistics {
    pub updates: u64,
    pub fallbacks_applied: u64,
    pub cycles_resolved: u64,
    pub tasks_executed: u64,
}

struct StoreState {
    entities: EntityTable,
    kinds: KindRegistry,
    slots: SlotTable,
    queue: TaskQueue,
    computations: ComputationRegistry,
    phase: Option<PhaseConfig>,
    poisoned: bool,
    stats: Statistics,
    captured_errors: Vec<StoreError>,
}

impl StoreState {
    fn new() -> Self {
        Self {
            entities: EntityTable::new(),
            kinds: KindRegistry::new(),
            slots: SlotTable::new(),
            queue: TaskQueue::new(),
            computations: ComputationRegistry::new(),
            phase: None,
            poisoned: false,
            stats: Statistics::default(),
            captured_errors: Vec::new(),
        }
    }
}

/// The fixed-point property-computation engine.
///
/// A store is constructed with a [`Context`] of collaborators, passes through zero or more
/// phases (`setup_phase` .. `wait_on_phase_completion`), and is then [`PropertyStore::shutdown`].
/// All mutable state lives behind a single mutex (`DESIGN.md` records why fine-grained per-slot
/// locking was simplified away here); query and mutation methods take
/// `&self` and lock internally for the duration of the bookkeeping step only, never across a
/// user-supplied callback.
pub struct PropertyStore {
    context: Context,
    config: StoreConfig,
    cancelled: AtomicBool,
    state: Mutex<StoreState>,
}

impl PropertyStore {
    pub fn new_store(context: Context) -> Self {
        Self::with_config(context, StoreConfig::default())
    }

    pub fn with_config(context: Context, config: StoreConfig) -> Self {
        log::debug!(
            target: "property-store::store",
            "created property store (parallel_workers={})",
            config.parallel_workers
        );
        Self {
            context,
            config,
            cancelled: AtomicBool::new(false),
            state: Mutex::new(StoreState::new()),
        }
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn formatter(&self) -> Option<EntityFormatter> {
        self.context.get::<EntityFormatter>().map(|f| (*f).clone())
    }

    pub(crate) fn format_entity(&self, entity: &EntityRef) -> String {
        format_entity(self.formatter().as_ref(), entity)
    }

    // ---- Property model ------------------------------------------------------------

    pub fn create_kind(
        &self,
        name: impl Into<Arc<str>>,
        fallback: FallbackFn,
        cycle_resolver: CycleResolverFn,
    ) -> Result<KindId, StoreError> {
        self.state.lock().kinds.create_kind(name, fallback, cycle_resolver)
    }

    // ---- Query API ---------------------------------------------------------------------

    pub fn is_known(&self, entity: &EntityRef) -> bool {
        self.state.lock().entities.is_known(entity)
    }

    pub fn has_property(&self, entity: &EntityRef, kind: KindId) -> bool {
        let mut state = self.state.lock();
        match state.entities.lookup(entity) {
            Some(id) => state.slots.has_slot(id, kind),
            None => false,
        }
    }

    /// Returns the current slot, installing and scheduling a lazy placeholder on
    /// first reference if a lazy computation is registered for `kind`.
    pub fn get(&self, entity: &EntityRef, kind: KindId) -> Eps {
        let mut state = self.state.lock();
        let id = state.entities.intern(entity.clone());
        let eps = state.slots.query(id, kind, &state.entities);
        if !matches!(eps.state, EpsState::Absent) {
            return eps;
        }
        let Some(pc) = state.computations.lazy_for(kind) else {
            return eps;
        };
        if !state.computations.mark_lazy_scheduled(id, kind) {
            return state.slots.query(id, kind, &state.entities);
        }
        let created = state.slots.install_lazy_placeholder(Epk::new(id, kind));
        if created {
            self.fire_triggered_locked(&mut state, id, kind);
        }
        let entity_for_task = entity.clone();
        self.enqueue_locked(
            &mut state,
            Box::new(move |store: &PropertyStore| {
                let result = pc(store, &entity_for_task);
                store.handle_result(result);
            }),
            true,
        );
        state.slots.query(id, kind, &state.entities)
    }

    pub fn properties(&self, entity: &EntityRef) -> Vec<Eps> {
        let state = self.state.lock();
        match state.entities.lookup(entity) {
            Some(id) => state.slots.properties_of(id, &state.entities).collect(),
            None => Vec::new(),
        }
    }

    pub fn entities(&self, mut pred: impl FnMut(&Eps) -> bool) -> Vec<EntityRef> {
        let state = self.state.lock();
        state
            .slots
            .entities_matching(&state.entities, &mut pred)
            .map(|id| state.entities.resolve(id).clone())
            .collect()
    }

    pub fn entities_of_kind(&self, kind: KindId) -> Vec<Eps> {
        let state = self.state.lock();
        state.slots.entities_of_kind(kind, &state.entities).collect()
    }

    // ---- Mutation API -------------------------------------------------------------------

    pub fn set(&self, entity: &EntityRef, property: Property) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        let id = state.entities.intern(entity.clone());
        let kind = property.kind();
        if state.slots.has_slot(id, kind) {
            return Err(StoreError::AlreadyPresent { epk_debug: format!("{:?}", Epk::new(id, kind)) });
        }
        if state.computations.is_lazy(kind) {
            return Err(StoreError::LazyConflict { kind: kind.to_string() });
        }
        self.commit_update(&mut state, id, kind, Bound::Value(property.clone()), Bound::Value(property), &[], None)?;
        Ok(())
    }

    pub fn schedule_for(&self, entity: &EntityRef, pc: PropertyComputation) {
        let mut state = self.state.lock();
        state.entities.intern(entity.clone());
        let entity = entity.clone();
        self.enqueue_locked(
            &mut state,
            Box::new(move |store: &PropertyStore| {
                let result = pc(store, &entity);
                store.handle_result(result);
            }),
            true,
        );
    }

    pub fn schedule_lazy(&self, kind: KindId, pc: PropertyComputation) -> Result<(), StoreError> {
        self.state.lock().computations.register_lazy(kind, pc)
    }

    pub fn register_triggered(&self, kind: KindId, pc: PropertyComputation) {
        self.state.lock().computations.register_triggered(kind, pc);
    }

    // ---- Analysis API dispatch --------------------------------------------------------

    pub fn handle_result(&self, result: AnalysisResult) {
        let mut state = self.state.lock();
        self.dispatch_locked(&mut state, result);
    }

    fn dispatch_locked(&self, state: &mut StoreState, result: AnalysisResult) {
        match result {
            AnalysisResult::NoResult => {}
            AnalysisResult::Result { entity, property } => {
                let id = state.entities.intern(entity);
                let kind = property.kind();
                if let Err(err) = self.commit_update(
                    state,
                    id,
                    kind,
                    Bound::Value(property.clone()),
                    Bound::Value(property),
                    &[],
                    None,
                ) {
                    self.capture_error(state, err);
                }
            }
            AnalysisResult::MultiResult(results) => {
                for (entity, property) in results {
                    self.dispatch_locked(state, AnalysisResult::Result { entity, property });
                }
            }
            AnalysisResult::IntermediateResult { entity, lb, ub, deps, continuation } => {
                self.handle_intermediate(state, entity, lb, ub, deps, continuation);
            }
            AnalysisResult::PartialResult { entity, kind, refine } => {
                // `refine` is user code and may itself call back into the store, so it must
                // never run while `state` is locked; defer it to a task, same as a continuation.
                let append = self.config.delay_depender_notification;
                self.enqueue_locked(
                    state,
                    Box::new(move |store: &PropertyStore| store.apply_partial(entity, kind, refine)),
                    append,
                );
            }
            AnalysisResult::Results(results) => {
                for r in results {
                    self.dispatch_locked(state, r);
                }
            }
            AnalysisResult::IncrementalResult { result, discovered } => {
                self.dispatch_locked(state, *result);
                for (pc, entity) in discovered {
                    self.enqueue_locked(
                        state,
                        Box::new(move |store: &PropertyStore| {
                            let result = pc(store, &entity);
                            store.handle_result(result);
                        }),
                        true,
                    );
                }
            }
        }
    }

    /// IntermediateResult semantics: re-checks every claimed dependee against the
    /// snapshot the analysis derived its result from, since that snapshot may already be stale
    /// by the time the result is handled.
    fn handle_intermediate(
        &self,
        state: &mut StoreState,
        entity: EntityRef,
        lb: Property,
        ub: Property,
        deps: Vec<Eps>,
        continuation: crate::result::OnUpdateContinuation,
    ) {
        let id = state.entities.intern(entity.clone());
        let kind = lb.kind();
        let mut dep_epks = Vec::with_capacity(deps.len());
        let mut stale = None;
        for snapshot in &deps {
            let dep_id = state.entities.intern(snapshot.entity.clone());
            dep_epks.push(Epk::new(dep_id, snapshot.kind));
            if stale.is_none() {
                let current = state.slots.query(dep_id, snapshot.kind, &state.entities);
                if current != *snapshot {
                    stale = Some(current);
                }
            }
        }

        // Commit the monotone progress regardless of staleness ("the store still
        // commits (lb, ub) to expose the monotone progress to other queries").
        let commit_result = match stale {
            Some(fresh) => {
                let append = self.config.delay_final_dependee_updates;
                self.enqueue_locked(
                    state,
                    Box::new(move |store: &PropertyStore| {
                        let result = continuation(store, fresh);
                        store.handle_result(result);
                    }),
                    append,
                );
                self.commit_update(state, id, kind, Bound::Value(lb), Bound::Value(ub), &dep_epks, None)
            }
            None => self.commit_update(
                state,
                id,
                kind,
                Bound::Value(lb),
                Bound::Value(ub),
                &dep_epks,
                Some(continuation),
            ),
        };
        if let Err(err) = commit_result {
            self.capture_error(state, err);
        }
    }

    /// PartialResult semantics. Runs with no lock held while `refine` executes.
    fn apply_partial(&self, entity: EntityRef, kind: KindId, refine: crate::result::RefinementFn) {
        let eps = {
            let mut state = self.state.lock();
            let id = state.entities.intern(entity.clone());
            state.slots.query(id, kind, &state.entities)
        };
        if let Some((lb, ub)) = refine(&eps) {
            let mut state = self.state.lock();
            let id = state.entities.intern(entity);
            if let Err(err) = self.commit_update(&mut state, id, kind, Bound::Value(lb), Bound::Value(ub), &[], None) {
                self.capture_error(&mut state, err);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn commit_update(
        &self,
        state: &mut StoreState,
        entity: EntityId,
        kind: KindId,
        lb: Bound,
        ub: Bound,
        deps: &[Epk],
        continuation: Option<crate::result::OnUpdateContinuation>,
    ) -> Result<(), StoreError> {
        let epk = Epk::new(entity, kind);
        let outcome = state.slots.update(epk, lb, ub, deps, continuation, &state.entities)?;
        state.stats.updates += 1;
        if outcome.created {
            self.fire_triggered_locked(state, entity, kind);
        }
        for dep_epk in outcome.created_dependees {
            self.fire_triggered_locked(state, dep_epk.entity, dep_epk.kind);
        }
        for notification in outcome.notifications {
            let append = match notification.reason {
                UpdateReason::DependeeFinal => self.config.delay_final_dependee_updates,
                UpdateReason::DependeeIntermediate => self.config.delay_non_final_dependee_updates,
            };
            let eps = notification.eps;
            let continuation = notification.continuation;
            self.enqueue_locked(
                state,
                Box::new(move |store: &PropertyStore| {
                    let result = continuation(store, eps);
                    store.handle_result(result);
                }),
                append,
            );
        }
        Ok(())
    }

    fn fire_triggered_locked(&self, state: &mut StoreState, entity: EntityId, kind: KindId) {
        let pcs = state.computations.triggered_for(kind);
        if pcs.is_empty() {
            return;
        }
        let entity_ref = state.entities.resolve(entity).clone();
        for pc in pcs {
            let entity_for_task = entity_ref.clone();
            self.enqueue_locked(
                state,
                Box::new(move |store: &PropertyStore| {
                    let result = pc(store, &entity_for_task);
                    store.handle_result(result);
                }),
                true,
            );
        }
    }

    fn enqueue_locked(&self, state: &mut StoreState, task: Task, append: bool) {
        if append {
            state.queue.append(task);
        } else {
            state.queue.prepend(task);
        }
    }

    fn capture_error(&self, state: &mut StoreState, err: StoreError) {
        log::warn!(target: "property-store::store", "captured analysis error: {err}");
        state.captured_errors.push(err);
    }

    // ---- Phase control -----------------------------------------------------------------

    pub fn setup_phase(
        &self,
        computed: impl IntoIterator<Item = KindId>,
        delayed: impl IntoIterator<Item = KindId>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        if state.poisoned {
            return Err(StoreError::PhasePoisoned);
        }
        state.phase = Some(PhaseConfig::new(computed.into_iter().collect(), delayed.into_iter().collect()));
        state.captured_errors.clear();
        Ok(())
    }

    /// The sequential driver loop or the parallel driver, depending on
    /// configuration and the `parallel` feature.
    pub fn wait_on_phase_completion(&self) -> Result<PhaseReport, PhaseFailure> {
        #[cfg(feature = "parallel")]
        {
            if self.config.parallel_workers > 1 {
                return crate::parallel::drive(self);
            }
        }
        self.drive_sequential()
    }

    pub(crate) fn drive_sequential(&self) -> Result<PhaseReport, PhaseFailure> {
        log::debug!(target: "property-store::phase", "starting sequential driver");
        loop {
            loop {
                if self.is_cancelled() {
                    return self.finish_cancelled();
                }
                let task = {
                    let mut state = self.state.lock();
                    state.queue.pop()
                };
                match task {
                    Some(task) => {
                        self.run_task(task);
                    }
                    None => break,
                }
            }
            if self.is_cancelled() {
                return self.finish_cancelled();
            }
            if let Some(err) = self.primary_error() {
                return Err(self.finalize_failure(err));
            }

            let mut progressed = self.fallback_pass();
            if progressed {
                continue;
            }
            progressed = self.cycle_resolution_pass();
            if progressed {
                continue;
            }
            self.collaborative_finalisation_pass();
            break;
        }

        if let Some(err) = self.primary_error() {
            return Err(self.finalize_failure(err));
        }

        let report = {
            let state = self.state.lock();
            PhaseReport {
                tasks_executed: state.stats.tasks_executed,
                fallbacks_applied: state.stats.fallbacks_applied,
                cycles_resolved: state.stats.cycles_resolved,
            }
        };
        log::debug!(target: "property-store::phase", "sequential driver reached quiescence: {:?}", report);
        Ok(report)
    }

    fn run_task(&self, task: Task) {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| task(self)));
        let mut state = self.state.lock();
        state.stats.tasks_executed += 1;
        if let Err(payload) = result {
            let message = panic_message(payload);
            log::warn!(target: "property-store::phase", "analysis task panicked: {message}");
            state.captured_errors.push(StoreError::AnalysisCrash { epk_debug: "<task>".into(), message });
        }
    }

    fn primary_error(&self) -> Option<PhaseFailure> {
        let state = self.state.lock();
        let mut errors = state.captured_errors.iter().cloned();
        let primary = errors.next()?;
        Some(PhaseFailure { primary, subsequent: errors.collect() })
    }

    fn finalize_failure(&self, failure: PhaseFailure) -> PhaseFailure {
        let mut state = self.state.lock();
        state.poisoned = true;
        state.queue = TaskQueue::new();
        log::warn!(target: "property-store::phase", "phase failed: {}", failure.primary);
        failure
    }

    fn finish_cancelled(&self) -> Result<PhaseReport, PhaseFailure> {
        let mut state = self.state.lock();
        state.queue = TaskQueue::new();
        log::info!(target: "property-store::phase", "phase cancelled");
        Ok(PhaseReport {
            tasks_executed: state.stats.tasks_executed,
            fallbacks_applied: state.stats.fallbacks_applied,
            cycles_resolved: state.stats.cycles_resolved,
        })
    }

    /// Fallback pass. Returns `true` if any fallback was applied (the driver should
    /// restart from draining the queue).
    fn fallback_pass(&self) -> bool {
        // A slot that lacks any produced property is never materialised in the slot table at
        // all; so candidates are found
        // by walking every known entity against every `computed \ delayed` kind and checking for
        // the *absence* of a slot, not by scanning existing (refinable) slots.
        let candidates: Vec<(EntityId, KindId)> = {
            let state = self.state.lock();
            let Some(phase) = state.phase.as_ref() else { return false };
            let mut found = Vec::new();
            for (id, _) in state.entities.iter() {
                for kind_idx in 0..state.kinds.len() {
                    let kind = KindId(kind_idx as u32);
                    if !phase.wants_fallback(kind) {
                        continue;
                    }
                    if !state.slots.has_slot(id, kind) {
                        found.push((id, kind));
                    }
                }
            }
            found
        };

        if candidates.is_empty() {
            return false;
        }

        for (id, kind) in candidates {
            let (entity_ref, fallback_fn) = {
                let state = self.state.lock();
                (state.entities.resolve(id).clone(), state.kinds.get(kind).fallback_fn())
            };
            // Invoked with no lock held: a fallback is free to call back into the store (e.g.
            // `get` on some other entity) without deadlocking.
            let property =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| fallback_fn(self, &entity_ref, kind)));
            let mut state = self.state.lock();
            match property {
                Ok(property) => {
                    state.stats.fallbacks_applied += 1;
                    log::trace!(target: "property-store::phase", "applied fallback for {}/{}", self.format_entity(&entity_ref), kind);
                    self.dispatch_locked(&mut state, AnalysisResult::Result { entity: entity_ref, property });
                }
                Err(payload) => {
                    let message = panic_message(payload);
                    self.capture_error(&mut state, StoreError::ResolverCrash { kind: kind.to_string(), message });
                }
            }
        }
        true
    }

    /// Cycle resolution pass. Returns `true` if any SCC was resolved.
    fn cycle_resolution_pass(&self) -> bool {
        let roots: Vec<Epk> = {
            let state = self.state.lock();
            state
                .slots
                .refinable_slots()
                .into_iter()
                .filter(|(_, has_dependees, has_dependers)| *has_dependees && *has_dependers)
                .map(|(epk, _, _)| epk)
                .collect()
        };
        if roots.is_empty() {
            return false;
        }
        let adjacency = self.state.lock().slots.dependee_adjacency(&roots);
        // Filters SCCs to those whose member vertices have no dependees outside the SCC
        // — a component that reaches out to some other still-unresolved node is not yet truly
        // stuck, even if part of it happens to form a cycle.
        let sccs: Vec<Vec<Epk>> = tarjan_scc(&adjacency)
            .into_iter()
            .filter(|c| c.len() > 1 || adjacency[c[0]].contains(&c[0]))
            .filter(|c| is_closed(c, &adjacency))
            .map(|c| c.into_iter().map(|i| roots[i]).collect())
            .collect();

        if sccs.is_empty() {
            return false;
        }

        for mut members in sccs {
            members.sort_by_key(|epk| (epk.entity.as_u32(), epk.kind.as_u32()));
            let head = members[0];
            let (head_eps, resolver_fn) = {
                let state = self.state.lock();
                (state.slots.query(head.entity, head.kind, &state.entities), state.kinds.get(head.kind).cycle_resolver_fn())
            };
            if members.len() > self.config.scc_log_truncation_threshold {
                log::debug!(target: "property-store::phase", "resolving SCC of size {} (truncated)", members.len());
            } else {
                log::debug!(target: "property-store::phase", "resolving SCC {:?}", members);
            }
            // Invoked with no lock held, same reasoning as the fallback pass above.
            let resolved = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| resolver_fn(self, &head_eps)));
            let mut state = self.state.lock();
            match resolved {
                Ok(property) => {
                    state.stats.cycles_resolved += 1;
                    if let Err(err) = self.commit_update(&mut state, head.entity, head.kind, Bound::Value(property.clone()), Bound::Value(property), &[], None) {
                        self.capture_error(&mut state, err);
                    }
                }
                Err(payload) => {
                    let message = panic_message(payload);
                    self.capture_error(&mut state, StoreError::ResolverCrash { kind: head.kind.to_string(), message });
                }
            }
        }
        true
    }

    /// Collaborative finalisation pass.
    fn collaborative_finalisation_pass(&self) {
        let targets: Vec<Epk> = {
            let state = self.state.lock();
            state
                .slots
                .refinable_slots()
                .into_iter()
                .filter(|(_, has_dependees, _)| !has_dependees)
                .map(|(epk, _, _)| epk)
                .collect()
        };
        for epk in targets {
            let mut state = self.state.lock();
            let eps = state.slots.query(epk.entity, epk.kind, &state.entities);
            if let Some(ub) = eps.upper_bound().cloned() {
                if let Err(err) = self.commit_update(&mut state, epk.entity, epk.kind, Bound::Value(ub.clone()), Bound::Value(ub), &[], None) {
                    self.capture_error(&mut state, err);
                }
            }
        }
    }

    // ---- Concurrency & lifecycle ---------------------------------------------------------

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn shutdown(self) {
        log::debug!(target: "property-store::store", "store shut down");
    }

    // ---- Supplemented features ----------------------------------------------------------

    pub fn statistics(&self) -> Statistics {
        self.state.lock().stats
    }

    /// A human-readable snapshot of every slot, for tests and embedding CLIs.
    pub fn dump_slots(&self) -> String {
        let state = self.state.lock();
        let mut out = String::new();
        for eps in state.slots.all_slots(&state.entities) {
            out.push_str(&format!(
                "{}/{}: {:?}\n",
                self.format_entity(&eps.entity),
                eps.kind,
                eps.state
            ));
        }
        out
    }

    pub(crate) fn pop_task_for_parallel_driver(&self) -> Option<Task> {
        self.state.lock().queue.pop()
    }

    pub(crate) fn queue_is_empty(&self) -> bool {
        self.state.lock().queue.is_empty()
    }

    pub(crate) fn run_task_for_parallel_driver(&self, task: Task) {
        self.run_task(task);
    }

    pub(crate) fn fallback_pass_for_parallel_driver(&self) -> bool {
        self.fallback_pass()
    }

    pub(crate) fn cycle_resolution_pass_for_parallel_driver(&self) -> bool {
        self.cycle_resolution_pass()
    }

    pub(crate) fn collaborative_finalisation_pass_for_parallel_driver(&self) {
        self.collaborative_finalisation_pass()
    }

    pub(crate) fn primary_error_for_parallel_driver(&self) -> Option<PhaseFailure> {
        self.primary_error()
    }

    pub(crate) fn finalize_failure_for_parallel_driver(&self, failure: PhaseFailure) -> PhaseFailure {
        self.finalize_failure(failure)
    }

    pub(crate) fn finish_cancelled_for_parallel_driver(&self) -> Result<PhaseReport, PhaseFailure> {
        self.finish_cancelled()
    }

    pub(crate) fn report_for_parallel_driver(&self) -> PhaseReport {
        let state = self.state.lock();
        PhaseReport {
            tasks_executed: state.stats.tasks_executed,
            fallbacks_applied: state.stats.fallbacks_applied,
            cycles_resolved: state.stats.cycles_resolved,
        }
    }
}

fn is_closed(component: &[usize], adjacency: &[Vec<usize>]) -> bool {
    let members: std::collections::HashSet<usize> = component.iter().copied().collect();
    component.iter().all(|&v| adjacency[v].iter().all(|w| members.contains(w)))
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panicked with a non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lattice::LatticeLike;

    #[derive(Debug, Clone, PartialEq)]
    enum Flag {
        Bottom,
        Set,
        Top,
    }

    impl LatticeLike for Flag {
        fn bottom() -> Self {
            Flag::Bottom
        }

        fn top() -> Self {
            Flag::Top
        }

        fn join(&self, other: &Self) -> Self {
            use Flag::*;
            match (self, other) {
                (Bottom, x) | (x, Bottom) => x.clone(),
                (Top, _) | (_, Top) => Top,
                (Set, Set) => Set,
            }
        }

        fn meet(&self, other: &Self) -> Self {
            use Flag::*;
            match (self, other) {
                (Top, x) | (x, Top) => x.clone(),
                (Bottom, _) | (_, Bottom) => Bottom,
                (Set, Set) => Set,
            }
        }
    }

    fn sequential_store() -> PropertyStore {
        PropertyStore::with_config(Context::new(), StoreConfig { parallel_workers: 1, ..StoreConfig::default() })
    }

    fn inert_fallback() -> FallbackFn {
        Arc::new(|_store: &PropertyStore, _e: &EntityRef, k: KindId| Property::new(k, Flag::Top))
    }

    fn inert_resolver() -> CycleResolverFn {
        Arc::new(|_store: &PropertyStore, head: &Eps| Property::new(head.kind, Flag::Top))
    }

    #[test]
    fn set_then_set_again_is_rejected() {
        let store = sequential_store();
        let k = store.create_kind("K", inert_fallback(), inert_resolver()).unwrap();
        let e: EntityRef = Arc::new(1u32);
        store.set(&e, Property::new(k, Flag::Set)).unwrap();
        let err = store.set(&e, Property::new(k, Flag::Set)).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyPresent { .. }));
    }

    #[test]
    fn create_kind_is_idempotent_by_identity_but_rejects_conflicting_reconfiguration() {
        let store = sequential_store();
        let fallback = inert_fallback();
        let resolver = inert_resolver();
        let k1 = store.create_kind("K", fallback.clone(), resolver.clone()).unwrap();
        let k2 = store.create_kind("K", fallback, resolver).unwrap();
        assert_eq!(k1, k2);

        let err = store.create_kind("K", inert_fallback(), inert_resolver()).unwrap_err();
        assert!(matches!(err, StoreError::KindConflict { .. }));
    }

    #[test]
    fn empty_phase_is_a_no_op() {
        let store = sequential_store();
        store.setup_phase(Vec::new(), Vec::new()).unwrap();
        let report = store.wait_on_phase_completion().unwrap();
        assert_eq!(report.tasks_executed, 0);
        assert_eq!(report.fallbacks_applied, 0);
        assert_eq!(report.cycles_resolved, 0);
    }

    #[test]
    fn a_final_slot_is_never_mutated_again() {
        let store = sequential_store();
        let k = store.create_kind("K", inert_fallback(), inert_resolver()).unwrap();
        let e: EntityRef = Arc::new(1u32);
        store.set(&e, Property::new(k, Flag::Set)).unwrap();
        assert!(store.is_final_slot_for_test(&e, k));
        let err = store.set(&e, Property::new(k, Flag::Set)).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyPresent { .. }));
        // still final, unchanged
        assert_eq!(store.get(&e, k).upper_bound(), Some(&Property::new(k, Flag::Set)));
    }

    impl PropertyStore {
        fn is_final_slot_for_test(&self, entity: &EntityRef, kind: KindId) -> bool {
            let mut state = self.state.lock();
            let id = state.entities.intern(entity.clone());
            state.slots.is_final_slot(id, kind)
        }
    }
}

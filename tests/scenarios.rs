//! End-to-end scenarios covering the full lifecycle: scheduling, dependency chains, cyclic
//! resolution, fallback, collaborative partial results, and cancellation.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use property_store::{
    AnalysisResult, Context, CycleResolverFn, EntityRef, Eps, FallbackFn, KindId, LatticeLike,
    Property, PropertyComputation, PropertyStore,
};

fn entity(id: u32) -> EntityRef {
    Arc::new(id)
}

/// A minimal, totally-ordered lattice shared by most scenarios below: `Bottom < Num(n) < Top`,
/// with distinct `Num`s incomparable (joining to `Top`, meeting to `Bottom`).
#[derive(Debug, Clone, PartialEq)]
enum Disc {
    Bottom,
    Num(i64),
    Top,
}

impl LatticeLike for Disc {
    fn bottom() -> Self {
        Disc::Bottom
    }

    fn top() -> Self {
        Disc::Top
    }

    fn join(&self, other: &Self) -> Self {
        use Disc::*;
        match (self, other) {
            (Bottom, x) | (x, Bottom) => x.clone(),
            (Top, _) | (_, Top) => Top,
            (Num(a), Num(b)) if a == b => Num(*a),
            _ => Top,
        }
    }

    fn meet(&self, other: &Self) -> Self {
        use Disc::*;
        match (self, other) {
            (Top, x) | (x, Top) => x.clone(),
            (Bottom, _) | (_, Bottom) => Bottom,
            (Num(a), Num(b)) if a == b => Num(*a),
            _ => Bottom,
        }
    }
}

/// A placeholder resolver/fallback pair shared by scenarios that don't exercise cycles or
/// fallback themselves, so `create_kind` always has something to install.
fn inert_fallback() -> FallbackFn {
    Arc::new(|_store: &PropertyStore, _e: &EntityRef, k: KindId| Property::new(k, Disc::Top))
}

fn inert_resolver() -> CycleResolverFn {
    Arc::new(|_store: &PropertyStore, head: &Eps| Property::new(head.kind, Disc::Top))
}

#[test]
fn scenario_a_single_eager_analysis_no_dependees() {
    let store = PropertyStore::new_store(Context::new());
    let k = store.create_kind("K", inert_fallback(), inert_resolver()).unwrap();

    let e1 = entity(1);
    let e2 = entity(2);
    let pc: PropertyComputation =
        Arc::new(move |_store, e| AnalysisResult::result(e.clone(), Property::new(k, Disc::Num(42))));

    store.setup_phase(vec![k], Vec::new()).unwrap();
    store.schedule_for(&e1, pc.clone());
    store.schedule_for(&e2, pc);
    let report = store.wait_on_phase_completion().unwrap();

    assert_eq!(report.fallbacks_applied, 0);
    let expected = Some(Property::new(k, Disc::Num(42)));
    assert_eq!(store.get(&e1, k).upper_bound(), expected.as_ref());
    assert_eq!(store.get(&e2, k).upper_bound(), expected.as_ref());
    assert!(store.get(&e1, k).is_final());
    assert!(store.get(&e2, k).is_final());
}

#[test]
fn scenario_b_two_step_dependency() {
    let store = PropertyStore::new_store(Context::new());
    let kind_a = store.create_kind("A", inert_fallback(), inert_resolver()).unwrap();
    let kind_b = store.create_kind("B", inert_fallback(), inert_resolver()).unwrap();

    let e = entity(1);

    let pc_a: PropertyComputation = Arc::new(move |store, e| {
        let dep = store.get(e, kind_b);
        let entity_for_result = e.clone();
        AnalysisResult::IntermediateResult {
            entity: e.clone(),
            lb: Property::new(kind_a, Disc::Bottom),
            ub: Property::new(kind_a, Disc::Top),
            deps: vec![dep],
            continuation: Box::new(move |_store, eps_b| {
                let v = match eps_b.upper_bound().and_then(|p| p.downcast_ref::<Disc>()) {
                    Some(Disc::Num(n)) => *n,
                    other => panic!("expected a concrete dependee value, got {other:?}"),
                };
                AnalysisResult::result(entity_for_result, Property::new(kind_a, Disc::Num(v + 1)))
            }),
        }
    });
    let pc_b: PropertyComputation =
        Arc::new(move |_store, e| AnalysisResult::result(e.clone(), Property::new(kind_b, Disc::Num(10))));

    store.setup_phase(vec![kind_a, kind_b], Vec::new()).unwrap();
    store.schedule_for(&e, pc_a);
    store.schedule_for(&e, pc_b);
    store.wait_on_phase_completion().unwrap();

    assert_eq!(store.get(&e, kind_b).upper_bound(), Some(&Property::new(kind_b, Disc::Num(10))));
    let eps_a = store.get(&e, kind_a);
    assert_eq!(eps_a.upper_bound(), Some(&Property::new(kind_a, Disc::Num(11))));
    assert!(eps_a.is_final());
}

/// A computation shared by both sides of the two-party cycle: depends on the other kind's
/// current value and registers an "identity" continuation that forwards the dependee's value
/// once it is final, or simply re-observes it otherwise (making no progress on its own — the
/// hallmark of a genuine cycle that only a resolver can break).
fn cyclic_pc(kind_self: KindId, kind_other: KindId) -> PropertyComputation {
    Arc::new(move |store, e| {
        let dep = store.get(e, kind_other);
        cyclic_intermediate(kind_self, kind_other, e.clone(), dep)
    })
}

fn cyclic_intermediate(kind_self: KindId, kind_other: KindId, e: EntityRef, dep: Eps) -> AnalysisResult {
    AnalysisResult::IntermediateResult {
        entity: e.clone(),
        lb: Property::new(kind_self, Disc::Bottom),
        ub: Property::new(kind_self, Disc::Top),
        deps: vec![dep],
        continuation: Box::new(move |store, eps_other| {
            if eps_other.is_final() {
                let value = eps_other
                    .upper_bound()
                    .and_then(|p| p.downcast_ref::<Disc>())
                    .cloned()
                    .unwrap_or(Disc::Top);
                AnalysisResult::result(e, Property::new(kind_self, value))
            } else {
                let fresh_dep = store.get(&e, kind_other);
                cyclic_intermediate(kind_self, kind_other, e, fresh_dep)
            }
        }),
    }
}

#[test]
fn scenario_c_two_party_cycle() {
    let store = PropertyStore::new_store(Context::new());
    let resolve_calls = Arc::new(AtomicU32::new(0));
    let resolve_calls_for_a = resolve_calls.clone();
    let resolver_a: CycleResolverFn = Arc::new(move |_store, head| {
        resolve_calls_for_a.fetch_add(1, Ordering::SeqCst);
        Property::new(head.kind, Disc::Top)
    });

    let kind_a = store.create_kind("A", inert_fallback(), resolver_a).unwrap();
    let kind_b = store.create_kind("B", inert_fallback(), inert_resolver()).unwrap();

    let e = entity(1);
    store.setup_phase(vec![kind_a, kind_b], Vec::new()).unwrap();
    store.schedule_for(&e, cyclic_pc(kind_a, kind_b));
    store.schedule_for(&e, cyclic_pc(kind_b, kind_a));
    let report = store.wait_on_phase_completion().unwrap();

    assert_eq!(resolve_calls.load(Ordering::SeqCst), 1, "resolver must fire exactly once");
    assert_eq!(report.cycles_resolved, 1);
    let eps_a = store.get(&e, kind_a);
    let eps_b = store.get(&e, kind_b);
    assert!(eps_a.is_final());
    assert!(eps_b.is_final());
    assert_eq!(eps_a.upper_bound(), Some(&Property::new(kind_a, Disc::Top)));
    assert_eq!(eps_b.upper_bound(), Some(&Property::new(kind_b, Disc::Top)));
}

#[test]
fn scenario_d_fallback() {
    let store = PropertyStore::new_store(Context::new());
    let fallback_calls = Arc::new(AtomicU32::new(0));
    let fallback_calls_for_closure = fallback_calls.clone();
    let fallback: FallbackFn = Arc::new(move |_store, _e, k| {
        fallback_calls_for_closure.fetch_add(1, Ordering::SeqCst);
        Property::new(k, Disc::Num(-1))
    });
    let k = store.create_kind("K", fallback, inert_resolver()).unwrap();

    let e = entity(1);
    // Some unrelated analysis merely queries `K` during its own run; no lazy computation, no
    // eager schedule, is ever registered for `K` itself.
    let probe: PropertyComputation = Arc::new(move |store, e| {
        let _ = store.get(e, k);
        AnalysisResult::NoResult
    });

    store.setup_phase(vec![k], Vec::new()).unwrap();
    store.schedule_for(&e, probe);
    let report = store.wait_on_phase_completion().unwrap();

    assert_eq!(report.fallbacks_applied, 1);
    assert_eq!(fallback_calls.load(Ordering::SeqCst), 1);
    let eps = store.get(&e, k);
    assert!(eps.is_final());
    assert_eq!(eps.upper_bound(), Some(&Property::new(k, Disc::Num(-1))));
}

/// A bitmask lattice used only by the collaborative-partial-result scenario: `top` is the
/// universal set (least precise), `join`/`meet` are bitwise union/intersection.
#[derive(Debug, Clone, PartialEq)]
struct Mask(u8);

impl LatticeLike for Mask {
    fn bottom() -> Self {
        Mask(0)
    }

    fn top() -> Self {
        Mask(0xFF)
    }

    fn join(&self, other: &Self) -> Self {
        Mask(self.0 | other.0)
    }

    fn meet(&self, other: &Self) -> Self {
        Mask(self.0 & other.0)
    }
}

#[test]
fn scenario_e_partial_result_aggregation() {
    let store = PropertyStore::new_store(Context::new());
    let fallback: FallbackFn = Arc::new(|_store: &PropertyStore, _e: &EntityRef, k: KindId| Property::new(k, Mask::top()));
    let resolver: CycleResolverFn = Arc::new(|_store: &PropertyStore, head: &Eps| Property::new(head.kind, Mask::top()));
    let k = store.create_kind("C", fallback, resolver).unwrap();

    let e = entity(1);

    fn contribute(kind: KindId, value: u8) -> PropertyComputation {
        Arc::new(move |_store, e| AnalysisResult::PartialResult {
            entity: e.clone(),
            kind,
            refine: Box::new(move |eps: &Eps| {
                let current = eps.upper_bound().cloned().unwrap_or_else(|| Property::new(kind, Mask::top()));
                let narrowed = current.meet(&Property::new(kind, Mask(value)));
                Some((Property::new(kind, Mask::bottom()), narrowed))
            }),
        })
    }

    store.setup_phase(vec![k], Vec::new()).unwrap();
    store.schedule_for(&e, contribute(k, 0b0011));
    store.schedule_for(&e, contribute(k, 0b0110));
    store.wait_on_phase_completion().unwrap();

    let eps = store.get(&e, k);
    assert!(eps.is_final());
    assert_eq!(eps.upper_bound(), Some(&Property::new(k, Mask(0b0010))));
}

#[test]
fn scenario_f_cancellation() {
    let store = PropertyStore::new_store(Context::new());
    let iterations = Arc::new(AtomicU32::new(0));
    let e = entity(1);

    // Stands in for an "infinite task stream": each invocation reschedules itself, so the
    // queue would never drain on its own. Cancellation must interrupt the drain regardless.
    fn self_rescheduling(iterations: Arc<AtomicU32>) -> PropertyComputation {
        Arc::new(move |store, e| {
            let n = iterations.fetch_add(1, Ordering::SeqCst) + 1;
            if n == 5 {
                store.cancel();
            }
            store.schedule_for(e, self_rescheduling(iterations.clone()));
            AnalysisResult::NoResult
        })
    }

    store.setup_phase(Vec::new(), Vec::new()).unwrap();
    store.schedule_for(&e, self_rescheduling(iterations.clone()));
    let report = store.wait_on_phase_completion().unwrap();

    assert!(report.tasks_executed >= 5);
    assert!(store.is_known(&e));
    store.shutdown();
}

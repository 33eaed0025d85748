//! The work-stealing parallel driver, a variant of the sequential driver in `store.rs`
//! that executes tasks across a dedicated `rayon` pool instead of one at a time.
//!
//! Per-slot mutation is still serialised by the single store-wide lock (`DESIGN.md` records this
//! as a deliberate simplification of a fine-grained per-slot lock, total order by
//! `(entity-id, kind-id)`); what this driver actually parallelises is the *user* work — the body
//! of a `PropertyComputation` or continuation — which normally dominates wall-clock time and
//! rarely touches the lock at all.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::{PhaseFailure, PhaseReport};
use crate::store::PropertyStore;

pub(crate) fn drive(store: &PropertyStore) -> Result<PhaseReport, PhaseFailure> {
    let workers = store.config().parallel_workers.max(1);
    log::debug!(target: "property-store::parallel", "starting parallel driver with {workers} workers");

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("property-store-worker-{i}"))
        .build()
        .expect("failed to build the parallel driver's thread pool");

    loop {
        if store.is_cancelled() {
            return store.finish_cancelled_for_parallel_driver();
        }

        let idle = AtomicUsize::new(0);
        pool.scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|_| worker_loop(store, workers, &idle));
            }
        });

        if store.is_cancelled() {
            return store.finish_cancelled_for_parallel_driver();
        }
        if let Some(failure) = store.primary_error_for_parallel_driver() {
            return Err(store.finalize_failure_for_parallel_driver(failure));
        }

        if store.fallback_pass_for_parallel_driver() {
            continue;
        }
        if store.cycle_resolution_pass_for_parallel_driver() {
            continue;
        }
        store.collaborative_finalisation_pass_for_parallel_driver();
        break;
    }

    if let Some(failure) = store.primary_error_for_parallel_driver() {
        return Err(store.finalize_failure_for_parallel_driver(failure));
    }
    let report = store.report_for_parallel_driver();
    log::debug!(target: "property-store::parallel", "parallel driver reached quiescence: {:?}", report);
    Ok(report)
}

/// Runs until the shared task queue has been observed empty by every worker simultaneously — the
/// pool's quiescence predicate standing in for the driver loop's "queue empty" check.
fn worker_loop(store: &PropertyStore, workers: usize, idle: &AtomicUsize) {
    loop {
        if store.is_cancelled() {
            return;
        }
        match store.pop_task_for_parallel_driver() {
            Some(task) => {
                idle.store(0, Ordering::SeqCst);
                store.run_task_for_parallel_driver(task);
            }
            None => {
                let observed_idle = idle.fetch_add(1, Ordering::SeqCst) + 1;
                if observed_idle >= workers && store.queue_is_empty() {
                    return;
                }
                std::thread::sleep(Duration::from_micros(200));
                idle.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }
}

//! Phase bookkeeping and the Tarjan SCC detector the driver loop uses for cycle
//! resolution.

use rustc_hash::FxHashSet;

use crate::kind::KindId;

/// The two kind-sets recorded by `setup_phase` for the upcoming phase.
#[derive(Debug, Clone, Default)]
pub(crate) struct PhaseConfig {
    pub computed: FxHashSet<KindId>,
    pub delayed: FxHashSet<KindId>,
}

impl PhaseConfig {
    pub fn new(computed: FxHashSet<KindId>, delayed: FxHashSet<KindId>) -> Self {
        Self { computed, delayed }
    }

    /// A kind gets a fallback at quiescence iff it is `computed` and not `delayed`.
    pub fn wants_fallback(&self, kind: KindId) -> bool {
        self.computed.contains(&kind) && !self.delayed.contains(&kind)
    }
}

/// Tarjan's strongly-connected-components algorithm over the adjacency list produced by
/// [`crate::slot::SlotTable::dependee_adjacency`].
///
/// Returns every SCC of size ≥ 1 (a slot with no self-loop and no cyclic dependees is still a
/// trivial, singleton "SCC" here; callers filter those out by checking whether the slot actually
/// has unresolved dependees, i.e. forms a "closed SCC".
pub(crate) fn tarjan_scc(adjacency: &[Vec<usize>]) -> Vec<Vec<usize>> {
    struct State {
        index_counter: usize,
        stack: Vec<usize>,
        on_stack: Vec<bool>,
        indices: Vec<Option<usize>>,
        lowlink: Vec<usize>,
        components: Vec<Vec<usize>>,
    }

    fn strongconnect(v: usize, adjacency: &[Vec<usize>], s: &mut State) {
        s.indices[v] = Some(s.index_counter);
        s.lowlink[v] = s.index_counter;
        s.index_counter += 1;
        s.stack.push(v);
        s.on_stack[v] = true;

        for &w in &adjacency[v] {
            if s.indices[w].is_none() {
                strongconnect(w, adjacency, s);
                s.lowlink[v] = s.lowlink[v].min(s.lowlink[w]);
            } else if s.on_stack[w] {
                s.lowlink[v] = s.lowlink[v].min(s.indices[w].expect("visited node has an index"));
            }
        }

        if s.lowlink[v] == s.indices[v].expect("v was just assigned an index above") {
            let mut component = Vec::new();
            loop {
                let w = s.stack.pop().expect("component root is still on the stack");
                s.on_stack[w] = false;
                component.push(w);
                if w == v {
                    break;
                }
            }
            s.components.push(component);
        }
    }

    let n = adjacency.len();
    let mut state = State {
        index_counter: 0,
        stack: Vec::new(),
        on_stack: vec![false; n],
        indices: vec![None; n],
        lowlink: vec![0; n],
        components: Vec::new(),
    };

    for v in 0..n {
        if state.indices[v].is_none() {
            strongconnect(v, adjacency, &mut state);
        }
    }

    state.components
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_a_simple_two_cycle() {
        let adjacency = vec![vec![1], vec![0]];
        let mut sccs = tarjan_scc(&adjacency);
        for c in &mut sccs {
            c.sort_unstable();
        }
        sccs.sort_by_key(|c| c[0]);
        assert_eq!(sccs, vec![vec![0, 1]]);
    }

    #[test]
    fn acyclic_graph_is_all_singletons() {
        let adjacency = vec![vec![1], vec![2], vec![]];
        let sccs = tarjan_scc(&adjacency);
        assert_eq!(sccs.len(), 3);
        assert!(sccs.iter().all(|c| c.len() == 1));
    }

    #[test]
    fn self_loop_is_its_own_scc() {
        let adjacency = vec![vec![0]];
        let sccs = tarjan_scc(&adjacency);
        assert_eq!(sccs, vec![vec![0]]);
    }
}

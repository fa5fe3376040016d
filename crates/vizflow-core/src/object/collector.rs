//! Cycle detection and deferred collection.
//!
//! A collection pass starts from candidate objects (objects released while
//! they still hold references, or released to zero during deferred
//! collection), walks their ownership edges, and splits the reachable
//! subgraph into strongly connected components. Components are then visited
//! sources-first: a component is garbage when every reference to its members
//! comes from inside the component or from components already found to be
//! garbage. Everything else is still reachable from outside and survives.

use std::collections::{HashMap, HashSet};
use std::ops::{Deref, DerefMut};

use super::domain::ObjectDomain;
use super::ObjectId;

/// What the collector is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorState {
    /// Objects are destroyed as soon as their count reaches zero.
    Idle,
    /// Destruction is postponed until the outermost guard is released.
    Deferred {
        /// Number of nested deferral guards.
        depth: usize,
    },
    /// A collection pass is running.
    Collecting,
}

/// Cumulative statistics of a domain's collector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectorStats {
    /// Number of cycle-detection passes run.
    pub collections: usize,
    /// Objects destroyed by those passes.
    pub collected: usize,
}

/// Result of running the collector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionReport {
    /// Objects destroyed.
    pub collected: usize,
    /// Garbage components found by cycle detection.
    pub components: usize,
    /// Candidates examined by cycle detection.
    pub candidates: usize,
}

impl CollectionReport {
    pub(super) fn merge(&mut self, other: &Self) {
        self.collected += other.collected;
        self.components += other.components;
        self.candidates += other.candidates;
    }
}

#[derive(Debug, Default)]
pub(super) struct Collector {
    pub(super) nesting: usize,
    pub(super) collecting: bool,
    pub(super) candidates: Vec<ObjectId>,
    queued: HashSet<ObjectId>,
    /// Objects whose count reached zero outside deferred collection.
    pub(super) zeroed: Vec<ObjectId>,
    pub(super) stats: CollectorStats,
}

impl Collector {
    pub(super) fn state(&self) -> CollectorState {
        if self.collecting {
            CollectorState::Collecting
        } else if self.nesting > 0 {
            CollectorState::Deferred {
                depth: self.nesting,
            }
        } else {
            CollectorState::Idle
        }
    }

    pub(super) fn add_candidate(&mut self, id: ObjectId) {
        if self.queued.insert(id) {
            self.candidates.push(id);
        }
    }

    pub(super) fn remove_candidate(&mut self, id: ObjectId) {
        if self.queued.remove(&id) {
            self.candidates.retain(|c| *c != id);
        }
    }

    fn take_candidates(&mut self) -> Vec<ObjectId> {
        self.queued.clear();
        std::mem::take(&mut self.candidates)
    }
}

/// Scoped deferred collection.
///
/// While any guard is alive, objects whose count drops to zero stay alive and
/// their `Delete` observers stay silent. Releasing the outermost guard runs a
/// collection pass. The guard dereferences to the domain, so nested guards
/// are taken from it:
///
/// ```
/// use vizflow_core::ObjectDomain;
///
/// let mut domain = ObjectDomain::new();
/// let id = domain.insert(42);
/// {
///     let mut outer = domain.defer_collection();
///     let mut inner = outer.defer_collection();
///     inner.unregister(id, None);
///     drop(inner);
///     assert!(outer.is_alive(id));
/// }
/// assert!(!domain.is_alive(id));
/// ```
pub struct DeferredCollection<'a, T> {
    domain: &'a mut ObjectDomain<T>,
    active: bool,
}

impl<'a, T> DeferredCollection<'a, T> {
    pub(super) fn new(domain: &'a mut ObjectDomain<T>) -> Self {
        domain.push_deferred();
        Self {
            domain,
            active: true,
        }
    }

    /// Returns the nesting depth, including this guard.
    pub fn depth(&self) -> usize {
        self.domain.collector.nesting
    }

    /// Releases the guard and returns what the collection pass did.
    ///
    /// The report is empty when an outer guard is still active.
    pub fn finish(mut self) -> CollectionReport {
        self.active = false;
        self.domain.pop_deferred().unwrap_or_default()
    }
}

impl<T> Deref for DeferredCollection<'_, T> {
    type Target = ObjectDomain<T>;

    fn deref(&self) -> &Self::Target {
        &*self.domain
    }
}

impl<T> DerefMut for DeferredCollection<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.domain
    }
}

impl<T> Drop for DeferredCollection<'_, T> {
    fn drop(&mut self) {
        if self.active {
            let _ = self.domain.pop_deferred();
        }
    }
}

impl<T> ObjectDomain<T> {
    /// Runs one cycle-detection pass over the pending candidates.
    pub(super) fn collect_cycles(&mut self) -> CollectionReport {
        let roots: Vec<ObjectId> = self
            .collector
            .take_candidates()
            .into_iter()
            .filter(|id| self.is_alive(*id))
            .collect();
        let mut report = CollectionReport {
            candidates: roots.len(),
            ..CollectionReport::default()
        };
        if roots.is_empty() {
            return report;
        }
        self.collector.stats.collections += 1;

        let (nodes, edges) = self.reachable_subgraph(&roots);
        let components = strongly_connected_components(&edges);

        let mut component_of = vec![0usize; nodes.len()];
        for (cid, component) in components.iter().enumerate() {
            for &member in component {
                component_of[member] = cid;
            }
        }

        // Tarjan emits sinks first; walk backwards so every component is
        // visited after all components that reference it.
        let mut garbage_in = vec![0usize; nodes.len()];
        let mut garbage = Vec::new();
        for (cid, component) in components.iter().enumerate().rev() {
            let total: usize = component
                .iter()
                .filter_map(|&m| self.reference_count(nodes[m]))
                .sum();
            let internal: usize = component
                .iter()
                .flat_map(|&m| edges[m].iter())
                .filter(|(target, _)| component_of[*target] == cid)
                .map(|(_, n)| n)
                .sum();
            let from_garbage: usize = component.iter().map(|&m| garbage_in[m]).sum();

            if total == internal + from_garbage {
                report.components += 1;
                for &member in component {
                    garbage.push(nodes[member]);
                    for &(target, n) in &edges[member] {
                        if component_of[target] != cid {
                            garbage_in[target] += n;
                        }
                    }
                }
            }
        }

        if !garbage.is_empty() {
            log::info!(
                "collecting {} unreachable objects in {} components",
                garbage.len(),
                report.components
            );
            report.collected = self.destroy(&garbage);
            self.collector.stats.collected += report.collected;
        }
        report
    }

    /// Collects every live object reachable from `roots` along ownership
    /// edges, returning the nodes and per-node `(target index, multiplicity)`
    /// adjacency.
    fn reachable_subgraph(&self, roots: &[ObjectId]) -> (Vec<ObjectId>, Vec<Vec<(usize, usize)>>) {
        let mut lookup: HashMap<ObjectId, usize> = HashMap::new();
        let mut nodes: Vec<ObjectId> = Vec::new();
        for &root in roots {
            if let std::collections::hash_map::Entry::Vacant(slot) = lookup.entry(root) {
                slot.insert(nodes.len());
                nodes.push(root);
            }
        }

        let mut edges: Vec<Vec<(usize, usize)>> = Vec::new();
        let mut cursor = 0;
        while cursor < nodes.len() {
            let id = nodes[cursor];
            let mut adjacency = Vec::new();
            if let Some(entry) = self.entry(id) {
                for (&target, &n) in &entry.references {
                    if !self.is_alive(target) {
                        continue;
                    }
                    let index = *lookup.entry(target).or_insert_with(|| {
                        nodes.push(target);
                        nodes.len() - 1
                    });
                    adjacency.push((index, n));
                }
            }
            edges.push(adjacency);
            cursor += 1;
        }
        (nodes, edges)
    }
}

/// Tarjan's algorithm, iterative. Components come out in reverse
/// topological order of the condensed graph.
fn strongly_connected_components(edges: &[Vec<(usize, usize)>]) -> Vec<Vec<usize>> {
    const UNVISITED: usize = usize::MAX;

    let n = edges.len();
    let mut index = vec![UNVISITED; n];
    let mut lowlink = vec![0usize; n];
    let mut on_stack = vec![false; n];
    let mut stack: Vec<usize> = Vec::new();
    let mut components = Vec::new();
    let mut next = 0usize;

    for root in 0..n {
        if index[root] != UNVISITED {
            continue;
        }
        index[root] = next;
        lowlink[root] = next;
        next += 1;
        stack.push(root);
        on_stack[root] = true;

        let mut work: Vec<(usize, usize)> = vec![(root, 0)];
        while let Some(frame) = work.last_mut() {
            let v = frame.0;
            if frame.1 < edges[v].len() {
                let w = edges[v][frame.1].0;
                frame.1 += 1;
                if index[w] == UNVISITED {
                    index[w] = next;
                    lowlink[w] = next;
                    next += 1;
                    stack.push(w);
                    on_stack[w] = true;
                    work.push((w, 0));
                } else if on_stack[w] {
                    lowlink[v] = lowlink[v].min(index[w]);
                }
                continue;
            }

            work.pop();
            if let Some(&(parent, _)) = work.last() {
                lowlink[parent] = lowlink[parent].min(lowlink[v]);
            }
            if lowlink[v] == index[v] {
                let mut component = Vec::new();
                while let Some(w) = stack.pop() {
                    on_stack[w] = false;
                    component.push(w);
                    if w == v {
                        break;
                    }
                }
                components.push(component);
            }
        }
    }
    components
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectEvent;
    use crate::options::CollectorOptions;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn watch(domain: &mut ObjectDomain<u32>, id: ObjectId, counter: &Arc<AtomicUsize>) {
        let c = Arc::clone(counter);
        domain.add_observer(id, ObjectEvent::Delete, move |_, _| {
            c.fetch_add(1, Ordering::SeqCst);
        });
    }

    /// Builds `a <-> b` with both still held externally.
    fn pair(domain: &mut ObjectDomain<u32>) -> (ObjectId, ObjectId) {
        let a = domain.insert(1);
        let b = domain.insert(2);
        domain.register(b, Some(a));
        domain.register(a, Some(b));
        (a, b)
    }

    #[test]
    fn test_tarjan_orders_sinks_first() {
        // 0 -> 1 <-> 2 -> 3
        let edges = vec![
            vec![(1, 1)],
            vec![(2, 1)],
            vec![(1, 1), (3, 1)],
            vec![],
        ];
        let components = strongly_connected_components(&edges);
        assert_eq!(components.len(), 3);
        assert_eq!(components[0], vec![3]);
        let mut middle = components[1].clone();
        middle.sort_unstable();
        assert_eq!(middle, vec![1, 2]);
        assert_eq!(components[2], vec![0]);
    }

    #[test]
    fn test_immediate_pair_collection() {
        let mut domain = ObjectDomain::new();
        let (a, b) = pair(&mut domain);
        let deleted = Arc::new(AtomicUsize::new(0));
        watch(&mut domain, a, &deleted);
        watch(&mut domain, b, &deleted);

        domain.unregister(a, None);
        // b still holds a and is held externally
        assert!(domain.is_alive(a));
        assert_eq!(deleted.load(Ordering::SeqCst), 0);

        domain.unregister(b, None);
        assert!(!domain.is_alive(a));
        assert!(!domain.is_alive(b));
        assert_eq!(deleted.load(Ordering::SeqCst), 2);
        assert_eq!(domain.collector_stats().collected, 2);
    }

    #[test]
    fn test_self_reference_collected() {
        let mut domain = ObjectDomain::new();
        let a = domain.insert(1);
        domain.register(a, Some(a));
        domain.unregister(a, None);
        assert!(!domain.is_alive(a));
    }

    #[test]
    fn test_externally_held_member_keeps_cycle() {
        let mut domain = ObjectDomain::new();
        let (a, b) = pair(&mut domain);
        let holder = domain.insert(0);
        domain.register(b, Some(holder));

        domain.unregister(a, None);
        domain.unregister(b, None);
        assert!(domain.is_alive(a));
        assert!(domain.is_alive(b));

        // Releasing the holder frees everything.
        domain.unregister(holder, None);
        assert!(domain.is_empty());
    }

    #[test]
    fn test_garbage_cycle_releases_downstream_chain() {
        let mut domain = ObjectDomain::new();
        let (a, b) = pair(&mut domain);
        let leaf = domain.insert(3);
        domain.register(leaf, Some(b));
        domain.unregister(leaf, None);

        domain.unregister(a, None);
        domain.unregister(b, None);
        assert!(domain.is_empty());
    }

    #[test]
    fn test_cycle_referenced_by_garbage_cycle() {
        // (a <-> b) -> (c <-> d)
        let mut domain = ObjectDomain::new();
        let (a, b) = pair(&mut domain);
        let (c, d) = pair(&mut domain);
        domain.register(c, Some(b));
        domain.unregister(c, None);
        domain.unregister(d, None);
        assert!(domain.is_alive(c));

        domain.unregister(a, None);
        domain.unregister(b, None);
        assert!(domain.is_empty());
    }

    #[test]
    fn test_deferred_pair_waits_for_pop() {
        let mut domain = ObjectDomain::new();
        let (a, b) = pair(&mut domain);
        let deleted = Arc::new(AtomicUsize::new(0));
        watch(&mut domain, a, &deleted);
        watch(&mut domain, b, &deleted);

        let mut guard = domain.defer_collection();
        guard.unregister(a, None);
        guard.unregister(b, None);
        assert!(guard.is_alive(a));
        assert!(guard.is_alive(b));
        assert_eq!(deleted.load(Ordering::SeqCst), 0);
        assert_eq!(guard.collector_state(), CollectorState::Deferred { depth: 1 });

        let report = guard.finish();
        assert_eq!(report.collected, 2);
        assert_eq!(report.components, 1);
        assert_eq!(deleted.load(Ordering::SeqCst), 2);
        assert!(domain.is_empty());
        assert_eq!(domain.collector_state(), CollectorState::Idle);
    }

    #[test]
    fn test_nested_deferral_collects_at_outermost() {
        let mut domain = ObjectDomain::new();
        let id = domain.insert(7);
        let mut outer = domain.defer_collection();
        {
            let mut inner = outer.defer_collection();
            assert_eq!(inner.depth(), 2);
            inner.unregister(id, None);
            assert_eq!(inner.finish(), CollectionReport::default());
        }
        assert!(outer.is_alive(id));
        assert_eq!(outer.pending_candidates(), 1);
        drop(outer);
        assert!(!domain.is_alive(id));
    }

    #[test]
    fn test_resurrected_candidate_survives() {
        let mut domain = ObjectDomain::new();
        let id = domain.insert(7);
        let other = domain.insert(8);
        {
            let mut guard = domain.defer_collection();
            guard.register(id, Some(other));
            guard.unregister(id, None);
        }
        assert!(domain.is_alive(id));
        assert_eq!(domain.reference_count(id), Some(1));
    }

    #[test]
    fn test_collect_on_unregister_disabled() {
        let mut domain = ObjectDomain::with_options(CollectorOptions {
            collect_on_unregister: false,
        });
        let (a, b) = pair(&mut domain);
        let deleted = Arc::new(AtomicUsize::new(0));
        watch(&mut domain, a, &deleted);
        watch(&mut domain, b, &deleted);

        domain.unregister(a, None);
        domain.unregister(b, None);
        assert!(domain.is_alive(a) && domain.is_alive(b));
        assert_eq!(domain.pending_candidates(), 2);

        let report = domain.collect();
        assert_eq!(report.collected, 2);
        assert_eq!(report.components, 1);
        assert_eq!(deleted.load(Ordering::SeqCst), 2);
        assert_eq!(domain.pending_candidates(), 0);
        assert!(domain.is_empty());
    }

    #[test]
    fn test_zero_count_deleted_without_collect_on_unregister() {
        let mut domain = ObjectDomain::with_options(CollectorOptions {
            collect_on_unregister: false,
        });
        let owner = domain.insert(1);
        let target = domain.insert(2);
        domain.register(target, Some(owner));
        domain.unregister(target, None);
        domain.unregister(owner, None);
        assert!(domain.is_empty());
        assert_eq!(domain.pending_candidates(), 0);
    }

    #[test]
    fn test_collect_while_deferred_is_postponed() {
        let mut domain = ObjectDomain::new();
        let id = domain.insert(1);
        domain.push_deferred();
        domain.unregister(id, None);
        assert_eq!(domain.collect(), CollectionReport::default());
        assert!(domain.is_alive(id));
        let report = domain.pop_deferred().unwrap();
        assert_eq!(report.collected, 1);
    }

    /// Objects reachable from the externally held ones.
    fn reachable(held: &[bool], edges: &[(usize, usize)]) -> Vec<bool> {
        let mut seen = held.to_vec();
        let mut stack: Vec<usize> = (0..held.len()).filter(|&i| held[i]).collect();
        while let Some(from) = stack.pop() {
            for &(owner, target) in edges {
                if owner == from && !seen[target] {
                    seen[target] = true;
                    stack.push(target);
                }
            }
        }
        seen
    }

    fn graph_strategy() -> impl Strategy<Value = (Vec<(usize, usize)>, Vec<bool>, bool)> {
        (1usize..8).prop_flat_map(|n| {
            (
                proptest::collection::vec((0..n, 0..n), 0..16),
                proptest::collection::vec(any::<bool>(), n),
                any::<bool>(),
            )
        })
    }

    proptest! {
        #[test]
        fn collects_exactly_the_unreachable((edges, released, eager) in graph_strategy()) {
            let mut domain = ObjectDomain::with_options(CollectorOptions {
                collect_on_unregister: eager,
            });
            let ids: Vec<ObjectId> = (0..released.len())
                .map(|n| domain.insert(u32::try_from(n).unwrap()))
                .collect();
            let deletes: Vec<Arc<AtomicUsize>> = ids
                .iter()
                .map(|&id| {
                    let counter = Arc::new(AtomicUsize::new(0));
                    watch(&mut domain, id, &counter);
                    counter
                })
                .collect();
            for &(owner, target) in &edges {
                domain.register(ids[target], Some(ids[owner]));
            }
            for (n, &drop_external) in released.iter().enumerate() {
                if drop_external {
                    domain.unregister(ids[n], None);
                }
            }
            domain.collect();

            let held: Vec<bool> = released.iter().map(|r| !r).collect();
            let alive = reachable(&held, &edges);
            for (n, &id) in ids.iter().enumerate() {
                prop_assert_eq!(domain.is_alive(id), alive[n]);
                let expected = usize::from(!alive[n]);
                prop_assert_eq!(deletes[n].load(Ordering::SeqCst), expected);
            }
            prop_assert_eq!(domain.pending_candidates(), 0);
        }
    }
}

//! Evaluation scheduling
//!
//! Turns a set of changed paths into an ordered plan of properties to
//! recompute:
//!
//! 1. **Collecting**: breadth-first transitive closure over
//!    `dependents_of`, starting from the seeds.
//! 2. **Ordering**: Kahn's algorithm over the closure subgraph. Ties are
//!    broken by registration rank so identical graphs give identical
//!    orders.
//! 3. Nodes Kahn cannot drain are split with Tarjan's SCC algorithm into
//!    cycle members (excluded from the pass) and nodes merely downstream
//!    of a cycle (ordered by a second Kahn pass and still evaluated).
//!
//! The scheduler also owns the follow-up queue: seeds arriving while a
//! pass is running wait for the next pass instead of interleaving.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::graph::DependencyGraph;
use crate::types::{PropertyPath, Rank};

/// Phase of the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerState {
    #[default]
    Idle,
    Collecting,
    Ordering,
    Evaluating,
}

/// Ordered work for one pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassPlan {
    /// Properties to evaluate, dependencies first
    pub order: Vec<PropertyPath>,
    /// Strongly connected groups excluded from evaluation
    pub cycles: Vec<Vec<PropertyPath>>,
    /// Reached paths that are not registered properties
    pub skipped: Vec<PropertyPath>,
}

impl PassPlan {
    /// All cycle members, flattened
    pub fn cycle_members(&self) -> impl Iterator<Item = &PropertyPath> {
        self.cycles.iter().flatten()
    }
}

/// Plans passes and serializes them
#[derive(Debug, Default)]
pub struct EvaluationScheduler {
    state: SchedulerState,
    pending: VecDeque<Vec<PropertyPath>>,
    passes_run: u64,
}

impl EvaluationScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Whether no pass is in flight
    pub fn is_idle(&self) -> bool {
        self.state == SchedulerState::Idle
    }

    /// Queue seeds for a later pass
    pub fn enqueue(&mut self, seeds: Vec<PropertyPath>) {
        if seeds.is_empty() {
            return;
        }
        if !self.is_idle() {
            log::debug!("Pass in flight ({:?}); queued follow-up with {} seeds", self.state, seeds.len());
        }
        self.pending.push_back(seeds);
    }

    /// Take the seeds of the next queued pass
    pub fn next_pending(&mut self) -> Option<Vec<PropertyPath>> {
        if !self.is_idle() {
            return None;
        }
        self.pending.pop_front()
    }

    /// Whether follow-up passes are waiting
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Number of completed passes
    pub fn passes_run(&self) -> u64 {
        self.passes_run
    }

    /// Collect and order the properties affected by `seeds`
    ///
    /// `rank` returns `None` for paths that are not registered properties
    /// (removed entities, whole-entity seeds); those are walked through but
    /// never scheduled. Leaves the scheduler in `Evaluating`; call
    /// [`finish`](Self::finish) when the plan has been executed.
    pub fn plan(
        &mut self,
        graph: &DependencyGraph,
        seeds: &[PropertyPath],
        rank: &dyn Fn(&PropertyPath) -> Option<Rank>,
    ) -> PassPlan {
        self.state = SchedulerState::Collecting;
        let reached = collect_affected(graph, seeds);

        self.state = SchedulerState::Ordering;
        let mut skipped = Vec::new();
        let mut members: Vec<(Rank, PropertyPath)> = Vec::new();
        for path in reached {
            match rank(&path) {
                Some(r) => members.push((r, path)),
                None => skipped.push(path),
            }
        }
        members.sort();
        skipped.sort();

        let (order, cycles) = order_members(graph, members);
        self.state = SchedulerState::Evaluating;
        PassPlan {
            order,
            cycles,
            skipped,
        }
    }

    /// Mark the running pass as complete
    pub fn finish(&mut self) {
        self.state = SchedulerState::Idle;
        self.passes_run += 1;
    }
}

/// Seeds plus everything transitively depending on them
pub fn collect_affected(graph: &DependencyGraph, seeds: &[PropertyPath]) -> HashSet<PropertyPath> {
    let mut visited: HashSet<PropertyPath> = seeds.iter().cloned().collect();
    let mut queue: VecDeque<PropertyPath> = seeds.iter().cloned().collect();
    while let Some(path) = queue.pop_front() {
        for dependent in graph.dependents_of(&path) {
            if visited.insert(dependent.clone()) {
                queue.push_back(dependent);
            }
        }
    }
    visited
}

/// Topologically order ranked members; returns (order, cycles)
fn order_members(
    graph: &DependencyGraph,
    members: Vec<(Rank, PropertyPath)>,
) -> (Vec<PropertyPath>, Vec<Vec<PropertyPath>>) {
    let index: HashMap<&PropertyPath, usize> = members
        .iter()
        .enumerate()
        .map(|(i, (_, path))| (path, i))
        .collect();

    // successors[i] = members that read member i
    let successors: Vec<Vec<usize>> = members
        .iter()
        .map(|(_, path)| {
            let mut next: Vec<usize> = graph
                .dependents_of(path)
                .iter()
                .filter_map(|d| index.get(d).copied())
                .collect();
            next.sort_unstable();
            next
        })
        .collect();

    let all: Vec<usize> = (0..members.len()).collect();
    let (mut order, leftover) = kahn(&all, &successors);
    if leftover.is_empty() {
        return (order.into_iter().map(|i| members[i].1.clone()).collect(), Vec::new());
    }

    let cyclic_groups = cyclic_components(&leftover, &successors);
    let in_cycle: HashSet<usize> = cyclic_groups.iter().flatten().copied().collect();
    let downstream: Vec<usize> = leftover.into_iter().filter(|i| !in_cycle.contains(i)).collect();
    let (tail, unresolved) = kahn(&downstream, &successors);
    debug_assert!(unresolved.is_empty(), "nodes left after removing cycles");
    order.extend(tail);

    let to_paths = |ids: &[usize]| ids.iter().map(|&i| members[i].1.clone()).collect::<Vec<_>>();
    let cycles = cyclic_groups.iter().map(|group| to_paths(group)).collect();
    (to_paths(&order), cycles)
}

/// Kahn's algorithm restricted to `nodes`
///
/// Indices double as ranks (members are pre-sorted), so the ready set is
/// an ordered set of indices. Returns the order and the undrained nodes.
fn kahn(nodes: &[usize], successors: &[Vec<usize>]) -> (Vec<usize>, Vec<usize>) {
    let included: HashSet<usize> = nodes.iter().copied().collect();
    let mut in_degree: HashMap<usize, usize> = nodes.iter().map(|&n| (n, 0)).collect();
    for &n in nodes {
        for s in &successors[n] {
            if let Some(deg) = in_degree.get_mut(s) {
                *deg += 1;
            }
        }
    }

    let mut ready: BTreeSet<usize> = in_degree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(&n, _)| n)
        .collect();
    let mut order = Vec::with_capacity(nodes.len());
    while let Some(n) = ready.pop_first() {
        order.push(n);
        for s in successors[n].iter().filter(|s| included.contains(s)) {
            if let Some(deg) = in_degree.get_mut(s) {
                *deg -= 1;
                if *deg == 0 {
                    ready.insert(*s);
                }
            }
        }
    }

    let placed: HashSet<usize> = order.iter().copied().collect();
    let mut leftover: Vec<usize> = nodes.iter().copied().filter(|n| !placed.contains(n)).collect();
    leftover.sort_unstable();
    (order, leftover)
}

/// Strongly connected components of `nodes` that contain a cycle
///
/// Tarjan's algorithm; a single node only counts when it has a self edge.
fn cyclic_components(nodes: &[usize], successors: &[Vec<usize>]) -> Vec<Vec<usize>> {
    struct Tarjan<'a> {
        successors: &'a [Vec<usize>],
        included: HashSet<usize>,
        next_index: usize,
        index: HashMap<usize, usize>,
        lowlink: HashMap<usize, usize>,
        stack: Vec<usize>,
        on_stack: HashSet<usize>,
        components: Vec<Vec<usize>>,
    }

    impl Tarjan<'_> {
        fn open(&mut self, v: usize) {
            self.index.insert(v, self.next_index);
            self.lowlink.insert(v, self.next_index);
            self.next_index += 1;
            self.stack.push(v);
            self.on_stack.insert(v);
        }

        /// Depth-first search from `root` with an explicit work stack of
        /// (node, next successor position)
        fn visit(&mut self, root: usize) {
            self.open(root);
            let mut work = vec![(root, 0usize)];
            while let Some((v, pos)) = work.pop() {
                if let Some(&w) = self.successors[v].get(pos) {
                    work.push((v, pos + 1));
                    if !self.included.contains(&w) {
                        continue;
                    }
                    if !self.index.contains_key(&w) {
                        self.open(w);
                        work.push((w, 0));
                    } else if self.on_stack.contains(&w) {
                        let low = self.lowlink[&v].min(self.index[&w]);
                        self.lowlink.insert(v, low);
                    }
                    continue;
                }

                // All successors done: fold into the parent, then close
                if let Some(&(parent, _)) = work.last() {
                    let low = self.lowlink[&parent].min(self.lowlink[&v]);
                    self.lowlink.insert(parent, low);
                }
                if self.lowlink[&v] == self.index[&v] {
                    let mut component = Vec::new();
                    while let Some(w) = self.stack.pop() {
                        self.on_stack.remove(&w);
                        component.push(w);
                        if w == v {
                            break;
                        }
                    }
                    component.sort_unstable();
                    self.components.push(component);
                }
            }
        }
    }

    let mut tarjan = Tarjan {
        successors,
        included: nodes.iter().copied().collect(),
        next_index: 0,
        index: HashMap::new(),
        lowlink: HashMap::new(),
        stack: Vec::new(),
        on_stack: HashSet::new(),
        components: Vec::new(),
    };
    for &n in nodes {
        if !tarjan.index.contains_key(&n) {
            tarjan.visit(n);
        }
    }

    let mut cyclic: Vec<Vec<usize>> = tarjan
        .components
        .into_iter()
        .filter(|c| c.len() > 1 || successors[c[0]].contains(&c[0]))
        .collect();
    cyclic.sort();
    cyclic
}

//! Dependency graph between persistent units.
//!
//! An edge `a -> b` means "a's row holds b's id", so b must be inserted
//! first. Edges whose column is nullable can be deferred: the column is
//! written as NULL and fixed by a later UPDATE.

use crate::error::{Error, Result};
use crate::model::{EntityArena, Handle};
use petgraph::Direction;
use petgraph::algo::{greedy_feedback_arc_set, is_cyclic_directed, tarjan_scc};
use petgraph::graph::DiGraph;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// Edge payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dependency {
    /// The referencing column accepts NULL, so the edge can be deferred.
    pub nullable: bool,
}

/// Directed graph of units still to be saved.
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    graph: StableDiGraph<Handle, Dependency>,
    index: HashMap<Handle, NodeIndex>,
}

impl DependencyGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node; adding an existing node is a no-op.
    pub fn add_node(&mut self, handle: Handle) {
        if !self.index.contains_key(&handle) {
            let node = self.graph.add_node(handle);
            self.index.insert(handle, node);
        }
    }

    /// Add `from -> to`, adding missing nodes.
    ///
    /// Parallel edges merge into one that is nullable only if every merged
    /// reference was nullable.
    pub fn add_edge(&mut self, from: Handle, to: Handle, nullable: bool) {
        self.add_node(from);
        self.add_node(to);
        let (a, b) = (self.index[&from], self.index[&to]);
        match self.graph.find_edge(a, b) {
            Some(edge) => self.graph[edge].nullable &= nullable,
            None => {
                self.graph.add_edge(a, b, Dependency { nullable });
            }
        }
    }

    #[must_use]
    pub fn contains(&self, handle: Handle) -> bool {
        self.index.contains_key(&handle)
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Nodes in handle order.
    #[must_use]
    pub fn nodes(&self) -> Vec<Handle> {
        let mut nodes: Vec<Handle> = self.index.keys().copied().collect();
        nodes.sort_unstable();
        nodes
    }

    /// Edges as `(from, to, dependency)`, sorted.
    #[must_use]
    pub fn edges(&self) -> Vec<(Handle, Handle, Dependency)> {
        let mut edges: Vec<_> = self
            .graph
            .edge_references()
            .map(|e| (self.graph[e.source()], self.graph[e.target()], *e.weight()))
            .collect();
        edges.sort_unstable_by_key(|(a, b, _)| (*a, *b));
        edges
    }

    /// Targets `handle` depends on.
    #[must_use]
    pub fn dependencies(&self, handle: Handle) -> Vec<Handle> {
        let Some(&node) = self.index.get(&handle) else {
            return Vec::new();
        };
        let mut out: Vec<Handle> = self
            .graph
            .neighbors_directed(node, Direction::Outgoing)
            .map(|n| self.graph[n])
            .collect();
        out.sort_unstable();
        out
    }

    pub fn remove_edge(&mut self, from: Handle, to: Handle) -> bool {
        let (Some(&a), Some(&b)) = (self.index.get(&from), self.index.get(&to)) else {
            return false;
        };
        match self.graph.find_edge(a, b) {
            Some(edge) => self.graph.remove_edge(edge).is_some(),
            None => false,
        }
    }

    /// Remove a node and every edge touching it.
    pub fn remove_node(&mut self, handle: Handle) -> bool {
        match self.index.remove(&handle) {
            Some(node) => self.graph.remove_node(node).is_some(),
            None => false,
        }
    }

    /// Nodes with no outgoing edge (everything they reference is saved),
    /// in handle order.
    #[must_use]
    pub fn sinks(&self) -> Vec<Handle> {
        let mut sinks: Vec<Handle> = self
            .graph
            .node_indices()
            .filter(|&n| {
                self.graph
                    .neighbors_directed(n, Direction::Outgoing)
                    .next()
                    .is_none()
            })
            .map(|n| self.graph[n])
            .collect();
        sinks.sort_unstable();
        sinks
    }

    #[must_use]
    pub fn is_acyclic(&self) -> bool {
        !is_cyclic_directed(&self.graph)
    }

    /// A set of nullable edges whose removal makes the graph acyclic.
    ///
    /// Starts from petgraph's greedy feedback arc set (keeping only the
    /// deferrable edges) and then breaks any remaining cycle at its first
    /// nullable edge.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedCycle`] when some cycle consists only of
    /// non-nullable edges.
    pub fn feedback_edge_set(&self, arena: &EntityArena) -> Result<Vec<(Handle, Handle)>> {
        if self.is_acyclic() {
            return Ok(Vec::new());
        }

        let mut compact: DiGraph<Handle, bool> = DiGraph::with_capacity(self.node_count(), self.edge_count());
        let mut positions: HashMap<NodeIndex, NodeIndex> = HashMap::new();
        let mut ordered: Vec<NodeIndex> = self.graph.node_indices().collect();
        ordered.sort_unstable_by_key(|&n| self.graph[n]);
        for n in ordered {
            positions.insert(n, compact.add_node(self.graph[n]));
        }
        for (from, to, dep) in self.edges() {
            let (a, b) = (positions[&self.index[&from]], positions[&self.index[&to]]);
            compact.add_edge(a, b, dep.nullable);
        }

        let candidates: Vec<(NodeIndex, NodeIndex)> = greedy_feedback_arc_set(&compact)
            .filter(|e| *e.weight())
            .map(|e| (e.source(), e.target()))
            .collect();

        let mut work: StableDiGraph<Handle, bool> = StableDiGraph::from(compact);
        let mut removed: Vec<(NodeIndex, NodeIndex)> = Vec::new();
        for (a, b) in candidates {
            if let Some(edge) = work.find_edge(a, b) {
                work.remove_edge(edge);
                removed.push((a, b));
            }
        }

        while let Some(cycle) = find_cycle(&work) {
            let Some(&edge) = cycle.iter().find(|&&e| work[e]) else {
                let types: BTreeSet<String> = cycle
                    .iter()
                    .filter_map(|&e| work.edge_endpoints(e))
                    .filter_map(|(a, _)| arena.get(work[a]))
                    .map(|entity| entity.type_name().to_string())
                    .collect();
                return Err(Error::UnsupportedCycle {
                    types: types.into_iter().collect(),
                });
            };
            if let Some((a, b)) = work.edge_endpoints(edge) {
                work.remove_edge(edge);
                removed.push((a, b));
            }
        }

        let mut edges: Vec<(Handle, Handle)> = removed.into_iter().map(|(a, b)| (work[a], work[b])).collect();
        edges.sort_unstable();
        Ok(edges)
    }
}

/// Edges of one cycle of `graph`, in path order, if any cycle exists.
fn find_cycle(graph: &StableDiGraph<Handle, bool>) -> Option<Vec<EdgeIndex>> {
    for component in tarjan_scc(graph) {
        let start = *component.first()?;
        if component.len() == 1 {
            if let Some(edge) = graph.find_edge(start, start) {
                return Some(vec![edge]);
            }
            continue;
        }

        let members: HashSet<NodeIndex> = component.iter().copied().collect();
        let mut parent: HashMap<NodeIndex, EdgeIndex> = HashMap::new();
        let mut queue = VecDeque::from([start]);
        while let Some(node) = queue.pop_front() {
            for edge in graph.edges_directed(node, Direction::Outgoing) {
                let target = edge.target();
                if !members.contains(&target) {
                    continue;
                }
                if target == start {
                    let mut path = vec![edge.id()];
                    let mut current = node;
                    while current != start {
                        let Some(&back) = parent.get(&current) else {
                            break;
                        };
                        path.push(back);
                        current = graph.edge_endpoints(back).map_or(start, |(from, _)| from);
                    }
                    path.reverse();
                    return Some(path);
                }
                if let std::collections::hash_map::Entry::Vacant(slot) = parent.entry(target) {
                    slot.insert(edge.id());
                    queue.push_back(target);
                }
            }
        }
    }
    None
}

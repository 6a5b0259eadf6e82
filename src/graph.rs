//! The dependency graph.
//!
//! Nodes are stored in a [`petgraph::Graph`] in the order they were declared,
//! so a [`NodeIndex`] doubles as the declaration sequence number. An edge runs
//! from a dependency to its dependent, which is the direction work flows in:
//! the source has to settle before the target can be materialized.
//!
//! The graph must be acyclic. [`DependencyGraph::detect_cycle`] finds a cycle
//! with a three-colour depth first search and reports the participating nodes
//! in cycle order. [`DependencyGraph::topological_order`] breaks ties between
//! unrelated nodes by declaration order, which keeps the result identical
//! between runs.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap};
use std::ops::Index;

use petgraph::Direction;
use petgraph::Graph;
use petgraph::graph::NodeIndex;
use petgraph::visit::{Dfs, Reversed};
use thiserror::Error;

/// A dependency cycle, listed so that every node depends on the next one and
/// the last depends on the first.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("dependency cycle through {} nodes", .nodes.len())]
pub struct CycleError {
    pub nodes: Vec<NodeIndex>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    Unvisited,
    InProgress,
    Done,
}

/// Directed acyclic graph of declared nodes.
pub struct DependencyGraph<N> {
    graph: Graph<N, ()>,
}

impl<N> DependencyGraph<N> {
    pub fn new() -> Self {
        Self {
            graph: Graph::new(),
        }
    }

    /// Adds a node and returns its index. Indices are handed out in
    /// declaration order.
    pub fn add_node(&mut self, weight: N) -> NodeIndex {
        self.graph.add_node(weight)
    }

    /// Records that `dependent` must wait for `dependency`. Adding the same
    /// edge twice has no effect.
    pub fn add_edge(&mut self, dependent: NodeIndex, dependency: NodeIndex) {
        if self.graph.find_edge(dependency, dependent).is_none() {
            self.graph.add_edge(dependency, dependent, ());
        }
    }

    pub fn contains(&self, index: NodeIndex) -> bool {
        index.index() < self.graph.node_count()
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn get(&self, index: NodeIndex) -> Option<&N> {
        self.graph.node_weight(index)
    }

    pub(crate) fn get_mut(&mut self, index: NodeIndex) -> Option<&mut N> {
        self.graph.node_weight_mut(index)
    }

    /// All node indices in declaration order.
    pub fn node_indices(&self) -> impl Iterator<Item = NodeIndex> + use<N> {
        self.graph.node_indices()
    }

    /// Direct dependencies of `index`, sorted by declaration order.
    pub fn dependencies(&self, index: NodeIndex) -> Vec<NodeIndex> {
        self.neighbors(index, Direction::Incoming)
    }

    /// Direct dependents of `index`, sorted by declaration order.
    pub fn dependents(&self, index: NodeIndex) -> Vec<NodeIndex> {
        self.neighbors(index, Direction::Outgoing)
    }

    fn neighbors(&self, index: NodeIndex, direction: Direction) -> Vec<NodeIndex> {
        let mut neighbors: Vec<_> = self.graph.neighbors_directed(index, direction).collect();
        neighbors.sort_unstable();
        neighbors.dedup();
        neighbors
    }

    /// Every node reachable by following dependency edges backwards from
    /// `roots`, the roots included.
    pub fn upstream(&self, roots: impl IntoIterator<Item = NodeIndex>) -> BTreeSet<NodeIndex> {
        let reversed = Reversed(&self.graph);
        let mut seen = BTreeSet::new();

        for root in roots {
            if !self.contains(root) || seen.contains(&root) {
                continue;
            }
            let mut dfs = Dfs::new(reversed, root);
            while let Some(index) = dfs.next(reversed) {
                seen.insert(index);
            }
        }

        seen
    }

    /// Every node which transitively depends on `root`, excluding `root`
    /// itself unless it sits on a cycle.
    pub fn downstream(&self, root: NodeIndex) -> BTreeSet<NodeIndex> {
        let mut seen = BTreeSet::new();
        let mut stack = self.dependents(root);

        while let Some(index) = stack.pop() {
            if seen.insert(index) {
                stack.extend(self.dependents(index));
            }
        }

        seen
    }

    /// Checks the graph for cycles.
    ///
    /// Walks every node in declaration order, following dependency edges
    /// depth first. Reaching a node which is still in progress means the
    /// current path loops back onto itself.
    pub fn detect_cycle(&self) -> Result<(), CycleError> {
        let mut color = vec![Color::Unvisited; self.graph.node_count()];

        for start in self.graph.node_indices() {
            if color[start.index()] != Color::Unvisited {
                continue;
            }

            // (node, its dependencies, position of the next one to visit)
            let mut path: Vec<(NodeIndex, Vec<NodeIndex>, usize)> = Vec::new();
            color[start.index()] = Color::InProgress;
            path.push((start, self.dependencies(start), 0));

            while let Some((_, dependencies, next)) = path.last_mut() {
                let Some(&dependency) = dependencies.get(*next) else {
                    if let Some((node, _, _)) = path.pop() {
                        color[node.index()] = Color::Done;
                    }
                    continue;
                };
                *next += 1;

                match color[dependency.index()] {
                    Color::Done => {}
                    Color::Unvisited => {
                        color[dependency.index()] = Color::InProgress;
                        path.push((dependency, self.dependencies(dependency), 0));
                    }
                    Color::InProgress => {
                        let from = path
                            .iter()
                            .position(|(node, _, _)| *node == dependency)
                            .unwrap_or_default();
                        let nodes = path[from..].iter().map(|(node, _, _)| *node).collect();
                        return Err(CycleError { nodes });
                    }
                }
            }
        }

        Ok(())
    }

    /// Returns all nodes ordered so that every node comes after all of its
    /// dependencies. Nodes without an ordering constraint between them keep
    /// their declaration order.
    pub fn topological_order(&self) -> Result<Vec<NodeIndex>, CycleError> {
        self.detect_cycle()?;

        let mut remaining: Vec<usize> = self
            .graph
            .node_indices()
            .map(|index| self.dependencies(index).len())
            .collect();

        let mut ready: BinaryHeap<Reverse<NodeIndex>> = self
            .graph
            .node_indices()
            .filter(|index| remaining[index.index()] == 0)
            .map(Reverse)
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(Reverse(index)) = ready.pop() {
            order.push(index);
            for dependent in self.dependents(index) {
                remaining[dependent.index()] -= 1;
                if remaining[dependent.index()] == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }

        Ok(order)
    }

    /// Iterates over all edges as `(dependency, dependent)` pairs.
    pub fn edges(&self) -> impl Iterator<Item = (NodeIndex, NodeIndex)> + '_ {
        self.graph
            .raw_edges()
            .iter()
            .map(|edge| (edge.source(), edge.target()))
    }
}

impl<N> Default for DependencyGraph<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N> Index<NodeIndex> for DependencyGraph<N> {
    type Output = N;

    fn index(&self, index: NodeIndex) -> &Self::Output {
        &self.graph[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(nodes: usize, edges: &[(usize, usize)]) -> DependencyGraph<usize> {
        let mut graph = DependencyGraph::new();
        for i in 0..nodes {
            graph.add_node(i);
        }
        for &(dependent, dependency) in edges {
            graph.add_edge(NodeIndex::new(dependent), NodeIndex::new(dependency));
        }
        graph
    }

    fn indices(raw: &[usize]) -> Vec<NodeIndex> {
        raw.iter().copied().map(NodeIndex::new).collect()
    }

    #[test]
    fn test_order_respects_edges() {
        // 0 depends on 2, 1 depends on 0
        let g = graph(3, &[(0, 2), (1, 0)]);
        assert_eq!(g.topological_order().unwrap(), indices(&[2, 0, 1]));
    }

    #[test]
    fn test_ties_keep_declaration_order() {
        let g = graph(5, &[(4, 0)]);
        assert_eq!(g.topological_order().unwrap(), indices(&[0, 1, 2, 3, 4]));

        // a late dependency unlocks a node which then has to be placed
        // before higher indices that were ready all along
        let g = graph(4, &[(1, 2)]);
        assert_eq!(g.topological_order().unwrap(), indices(&[0, 2, 1, 3]));
    }

    #[test]
    fn test_order_is_deterministic() {
        let edges = [(3, 1), (3, 2), (4, 3), (5, 0), (6, 5), (6, 4)];
        let first = graph(7, &edges).topological_order().unwrap();
        for _ in 0..20 {
            assert_eq!(graph(7, &edges).topological_order().unwrap(), first);
        }
    }

    #[test]
    fn test_duplicate_edges_are_ignored() {
        let g = graph(2, &[(1, 0), (1, 0)]);
        assert_eq!(g.edge_count(), 1);
        assert_eq!(g.dependencies(NodeIndex::new(1)), indices(&[0]));
    }

    #[test]
    fn test_acyclic_has_no_cycle() {
        let g = graph(4, &[(1, 0), (2, 0), (3, 1), (3, 2)]);
        assert_eq!(g.detect_cycle(), Ok(()));
    }

    #[test]
    fn test_cycle_reported_in_order() {
        // 0 -> 1 -> 2 -> 0 in "depends on" direction, 3 hangs off the cycle
        let g = graph(4, &[(0, 1), (1, 2), (2, 0), (3, 0)]);
        let err = g.detect_cycle().unwrap_err();
        assert_eq!(err.nodes, indices(&[0, 1, 2]));
        assert!(g.topological_order().is_err());
    }

    #[test]
    fn test_self_loop_is_cycle() {
        let g = graph(2, &[(1, 1)]);
        assert_eq!(g.detect_cycle().unwrap_err().nodes, indices(&[1]));
    }

    #[test]
    fn test_cycle_found_past_finished_nodes() {
        // 0 is done before the walk from 1 finds 1 -> 2 -> 3 -> 1
        let g = graph(4, &[(1, 0), (1, 2), (2, 3), (3, 1)]);
        assert_eq!(g.detect_cycle().unwrap_err().nodes, indices(&[1, 2, 3]));
    }

    #[test]
    fn test_upstream_and_downstream() {
        let g = graph(5, &[(1, 0), (2, 1), (3, 0), (4, 4)]);
        assert_eq!(
            g.upstream([NodeIndex::new(2)]),
            BTreeSet::from_iter(indices(&[0, 1, 2]))
        );
        assert_eq!(
            g.downstream(NodeIndex::new(0)),
            BTreeSet::from_iter(indices(&[1, 2, 3]))
        );
    }

    #[test]
    fn test_empty_graph() {
        let g = graph(0, &[]);
        assert!(g.is_empty());
        assert_eq!(g.topological_order().unwrap(), Vec::new());
    }
}

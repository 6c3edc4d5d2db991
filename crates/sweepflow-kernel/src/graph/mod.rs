//! Dependency graph of rule instances
//!
//! An edge `producer -> consumer` exists when an output of the producer equals
//! an input of the consumer, or is a directory containing it. Construction
//! indexes every output path once and resolves each input by probing the
//! index with the input path and then its ancestors, nearest first.

mod cycle;

use crate::error::{BuildError, CollisionKind};
use crate::rule::RuleInstance;
use crate::types::NodeId;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use sweepflow_artifact::{Artifact, ArtifactKind, ArtifactPath};
use tracing::debug;

/// Validated DAG over rule instances
///
/// Node ids are positions in the instance list; edge weights are the input
/// path that produced the edge.
#[derive(Debug)]
pub struct DependencyGraph {
    instances: Vec<RuleInstance>,
    graph: DiGraph<NodeId, ArtifactPath>,
    external: Vec<Vec<Artifact>>,
    order: Vec<NodeId>,
}

#[inline]
fn ix(id: NodeId) -> NodeIndex {
    NodeIndex::new(id.index())
}

#[inline]
fn id(index: NodeIndex) -> NodeId {
    NodeId(index.index())
}

impl DependencyGraph {
    /// Link instances and validate the result
    ///
    /// # Errors
    /// - [`BuildError::NameCollision`] for a repeated name or output path
    /// - [`BuildError::Cycle`] if the relation is not acyclic
    pub fn build(instances: Vec<RuleInstance>) -> Result<Self, BuildError> {
        let mut names: HashMap<&str, usize> = HashMap::with_capacity(instances.len());
        let mut outputs: HashMap<&ArtifactPath, (usize, ArtifactKind)> = HashMap::new();

        for (idx, inst) in instances.iter().enumerate() {
            if let Some(&prev) = names.get(inst.name.as_str()) {
                return Err(BuildError::NameCollision {
                    kind: CollisionKind::RuleName,
                    name: inst.name.clone(),
                    first: instances[prev].name.clone(),
                    second: inst.name.clone(),
                });
            }
            names.insert(&inst.name, idx);

            for out in &inst.outputs {
                if let Some(&(prev, _)) = outputs.get(&out.path) {
                    return Err(BuildError::NameCollision {
                        kind: CollisionKind::OutputPath,
                        name: out.path.to_string(),
                        first: instances[prev].name.clone(),
                        second: inst.name.clone(),
                    });
                }
                outputs.insert(&out.path, (idx, out.kind));
            }
        }

        let mut graph = DiGraph::with_capacity(instances.len(), instances.len());
        for idx in 0..instances.len() {
            graph.add_node(NodeId(idx));
        }

        let mut external = vec![Vec::new(); instances.len()];
        for (consumer, inst) in instances.iter().enumerate() {
            for input in &inst.inputs {
                match Self::producer_of(&outputs, &input.path) {
                    Some(producer) => {
                        debug!(
                            producer = %instances[producer].name,
                            consumer = %inst.name,
                            artifact = %input.path,
                            "edge"
                        );
                        graph.update_edge(
                            NodeIndex::new(producer),
                            NodeIndex::new(consumer),
                            input.path.clone(),
                        );
                    }
                    None => external[consumer].push(input.clone()),
                }
            }
        }

        if let Some(path) = cycle::find_cycle(&graph) {
            return Err(BuildError::Cycle {
                path: path.iter().map(|n| instances[n.index()].name.clone()).collect(),
            });
        }

        let order = stable_order(&graph);

        Ok(Self {
            instances,
            graph,
            external,
            order,
        })
    }

    /// Exact match first, then the nearest directory output containing `path`
    fn producer_of(
        outputs: &HashMap<&ArtifactPath, (usize, ArtifactKind)>,
        path: &ArtifactPath,
    ) -> Option<usize> {
        if let Some(&(idx, _)) = outputs.get(path) {
            return Some(idx);
        }
        path.ancestors().find_map(|ancestor| match outputs.get(&ancestor) {
            Some(&(idx, ArtifactKind::Directory)) => Some(idx),
            _ => None,
        })
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Instance at `node`
    ///
    /// # Panics
    /// If `node` did not come from this graph
    #[must_use]
    pub fn instance(&self, node: NodeId) -> &RuleInstance {
        &self.instances[node.index()]
    }

    #[must_use]
    pub fn instances(&self) -> &[RuleInstance] {
        &self.instances
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.instances.len()).map(NodeId)
    }

    /// Look up a node by instance name
    #[must_use]
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.instances.iter().position(|i| i.name == name).map(NodeId)
    }

    /// Topological order, producers before consumers
    ///
    /// Ties are broken by declaration order, so the order is reproducible.
    #[must_use]
    pub fn topological_order(&self) -> &[NodeId] {
        &self.order
    }

    /// Direct producers of `node`, ascending
    #[must_use]
    pub fn producers(&self, node: NodeId) -> Vec<NodeId> {
        self.neighbors(node, Direction::Incoming)
    }

    /// Direct consumers of `node`, ascending
    #[must_use]
    pub fn consumers(&self, node: NodeId) -> Vec<NodeId> {
        self.neighbors(node, Direction::Outgoing)
    }

    fn neighbors(&self, node: NodeId, dir: Direction) -> Vec<NodeId> {
        let mut out: Vec<NodeId> = self.graph.neighbors_directed(ix(node), dir).map(id).collect();
        out.sort_unstable();
        out
    }

    /// Transitive consumers of `node`, excluding itself
    #[must_use]
    pub fn descendants(&self, node: NodeId) -> Vec<NodeId> {
        let mut dfs = Dfs::new(&self.graph, ix(node));
        let mut out = Vec::new();
        while let Some(next) = dfs.next(&self.graph) {
            if next != ix(node) {
                out.push(id(next));
            }
        }
        out.sort_unstable();
        out
    }

    /// Inputs of `node` that no rule produces
    #[must_use]
    pub fn external_inputs(&self, node: NodeId) -> &[Artifact] {
        &self.external[node.index()]
    }

    /// Nodes with no producers
    #[must_use]
    pub fn entry_nodes(&self) -> Vec<NodeId> {
        self.node_ids().filter(|&n| self.producers(n).is_empty()).collect()
    }

    /// Nodes with no consumers
    #[must_use]
    pub fn exit_nodes(&self) -> Vec<NodeId> {
        self.node_ids().filter(|&n| self.consumers(n).is_empty()).collect()
    }
}

/// Kahn's algorithm, lowest declaration index first among ready nodes
///
/// The graph must be acyclic.
fn stable_order(graph: &DiGraph<NodeId, ArtifactPath>) -> Vec<NodeId> {
    let mut indegree: Vec<usize> = graph
        .node_indices()
        .map(|n| graph.neighbors_directed(n, Direction::Incoming).count())
        .collect();
    let mut ready: BinaryHeap<Reverse<usize>> = indegree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(n, _)| Reverse(n))
        .collect();

    let mut order = Vec::with_capacity(indegree.len());
    while let Some(Reverse(n)) = ready.pop() {
        order.push(NodeId(n));
        for next in graph.neighbors_directed(NodeIndex::new(n), Direction::Outgoing) {
            let left = &mut indegree[next.index()];
            *left -= 1;
            if *left == 0 {
                ready.push(Reverse(next.index()));
            }
        }
    }
    order
}

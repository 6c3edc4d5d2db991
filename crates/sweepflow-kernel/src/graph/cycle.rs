//! Cycle detection that reports the offending path

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

fn successors<N, E>(graph: &DiGraph<N, E>, node: NodeIndex) -> Vec<NodeIndex> {
    let mut next: Vec<NodeIndex> = graph.neighbors_directed(node, Direction::Outgoing).collect();
    // popped from the back, so lower indices are explored first
    next.sort_unstable_by(|a, b| b.cmp(a));
    next.dedup();
    next
}

/// First cycle found by depth-first search, as a closed path `[n0, .., n0]`
///
/// Iterative so that long chains cannot exhaust the call stack. A node is
/// `OnStack` while it is on the current DFS path; reaching such a node again
/// closes a cycle. A self-loop yields `[n, n]`.
pub(super) fn find_cycle<N, E>(graph: &DiGraph<N, E>) -> Option<Vec<NodeIndex>> {
    let mut marks = vec![Mark::Unvisited; graph.node_count()];

    for root in graph.node_indices() {
        if marks[root.index()] != Mark::Unvisited {
            continue;
        }
        marks[root.index()] = Mark::OnStack;
        let mut stack: Vec<(NodeIndex, Vec<NodeIndex>)> = vec![(root, successors(graph, root))];

        loop {
            let Some(top) = stack.last_mut() else {
                break;
            };
            let node = top.0;
            match top.1.pop() {
                Some(next) => match marks[next.index()] {
                    Mark::Unvisited => {
                        marks[next.index()] = Mark::OnStack;
                        stack.push((next, successors(graph, next)));
                    }
                    Mark::OnStack => {
                        let start = stack.iter().position(|(n, _)| *n == next)?;
                        let mut path: Vec<NodeIndex> = stack[start..].iter().map(|(n, _)| *n).collect();
                        path.push(next);
                        return Some(path);
                    }
                    Mark::Done => {}
                },
                None => {
                    marks[node.index()] = Mark::Done;
                    stack.pop();
                }
            }
        }
    }
    None
}

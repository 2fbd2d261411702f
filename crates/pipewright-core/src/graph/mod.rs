pub mod critical_path;
pub mod durations;

pub use critical_path::{critical_path, CriticalPath};
pub use durations::{DurationError, DurationModel};

use crate::parser::dag::{DagEdge, Job, PipelineGraph};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Unvisited,
    Visiting,
    Done,
}

/// Depth-first search in declaration order. Returns the jobs on the first
/// cycle found, in traversal order.
pub fn detect_cycle(graph: &DiGraph<Job, DagEdge>) -> Option<Vec<NodeIndex>> {
    let mut marks = vec![Mark::Unvisited; graph.node_count()];

    for start in graph.node_indices() {
        if marks[start.index()] != Mark::Unvisited {
            continue;
        }
        // Stack of (node, its sorted successors, next successor to try).
        let mut stack: Vec<(NodeIndex, Vec<NodeIndex>, usize)> =
            vec![(start, sorted_successors(graph, start), 0)];
        marks[start.index()] = Mark::Visiting;

        while let Some((node, successors, next)) = stack.last_mut() {
            let Some(&succ) = successors.get(*next) else {
                marks[node.index()] = Mark::Done;
                stack.pop();
                continue;
            };
            *next += 1;
            match marks[succ.index()] {
                Mark::Visiting => {
                    let pos = stack.iter().position(|(n, _, _)| *n == succ).unwrap_or(0);
                    return Some(stack[pos..].iter().map(|(n, _, _)| *n).collect());
                }
                Mark::Unvisited => {
                    marks[succ.index()] = Mark::Visiting;
                    stack.push((succ, sorted_successors(graph, succ), 0));
                }
                Mark::Done => {}
            }
        }
    }
    None
}

fn sorted_successors(graph: &DiGraph<Job, DagEdge>, node: NodeIndex) -> Vec<NodeIndex> {
    let mut succ: Vec<NodeIndex> = graph.neighbors_directed(node, Direction::Outgoing).collect();
    succ.sort();
    succ.dedup();
    succ
}

/// Topological order that prefers declaration order among ready jobs.
pub fn topological_order(dag: &PipelineGraph) -> Vec<NodeIndex> {
    let graph = dag.graph();
    let mut in_degree: Vec<usize> = graph
        .node_indices()
        .map(|n| graph.neighbors_directed(n, Direction::Incoming).count())
        .collect();
    let mut ready: std::collections::BTreeSet<NodeIndex> = graph
        .node_indices()
        .filter(|n| in_degree[n.index()] == 0)
        .collect();

    let mut order = Vec::with_capacity(graph.node_count());
    while let Some(node) = ready.pop_first() {
        order.push(node);
        for succ in graph.neighbors_directed(node, Direction::Outgoing) {
            in_degree[succ.index()] -= 1;
            if in_degree[succ.index()] == 0 {
                ready.insert(succ);
            }
        }
    }
    order
}

/// Longest-path layer of every job, indexed by node index. Roots are layer 0;
/// every other job sits one past its deepest dependency.
pub fn layer_indices(dag: &PipelineGraph) -> Vec<usize> {
    let graph = dag.graph();
    let mut layer = vec![0usize; graph.node_count()];
    for node in topological_order(dag) {
        let deepest = graph
            .neighbors_directed(node, Direction::Incoming)
            .map(|dep| layer[dep.index()] + 1)
            .max()
            .unwrap_or(0);
        layer[node.index()] = deepest;
    }
    layer
}

/// Jobs grouped by layer, declaration order within a layer.
pub fn layers(dag: &PipelineGraph) -> Vec<Vec<String>> {
    let layer = layer_indices(dag);
    let depth = layer.iter().max().map(|m| m + 1).unwrap_or(0);
    let mut out = vec![Vec::new(); depth];
    for node in dag.graph().node_indices() {
        out[layer[node.index()]].push(dag.graph()[node].id.clone());
    }
    out
}

/// Largest number of jobs sharing a layer.
pub fn max_parallelism(dag: &PipelineGraph) -> usize {
    layers(dag).iter().map(Vec::len).max().unwrap_or(0)
}

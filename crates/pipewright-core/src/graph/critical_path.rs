use crate::graph::topological_order;
use crate::parser::dag::PipelineGraph;
use petgraph::Direction;
use serde::Serialize;

/// The longest duration-weighted chain of jobs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CriticalPath {
    pub jobs: Vec<String>,
    pub duration_secs: f64,
}

/// Find the critical path through the pipeline graph.
///
/// `durations` holds one entry per job, indexed by node index. Ties are
/// broken in favour of the job declared first.
pub fn critical_path(dag: &PipelineGraph, durations: &[f64]) -> CriticalPath {
    let graph = dag.graph();
    let count = graph.node_count();
    let mut finish = vec![0.0f64; count];
    let mut predecessor: Vec<Option<usize>> = vec![None; count];

    // Forward pass: a job starts when its slowest dependency finishes.
    for node in topological_order(dag) {
        let mut deps: Vec<usize> = graph
            .neighbors_directed(node, Direction::Incoming)
            .map(|n| n.index())
            .collect();
        deps.sort_unstable();

        let mut start = 0.0;
        for dep in deps {
            if predecessor[node.index()].is_none() || finish[dep] > start {
                start = finish[dep];
                predecessor[node.index()] = Some(dep);
            }
        }
        finish[node.index()] = start + durations.get(node.index()).copied().unwrap_or(0.0);
    }

    let mut end: Option<usize> = None;
    for idx in 0..count {
        if end.map_or(true, |e| finish[idx] > finish[e]) {
            end = Some(idx);
        }
    }
    let Some(end) = end else {
        return CriticalPath {
            jobs: Vec::new(),
            duration_secs: 0.0,
        };
    };

    // Backtrack to build the path.
    let mut path = vec![end];
    let mut current = end;
    while let Some(pred) = predecessor[current] {
        path.push(pred);
        current = pred;
    }
    path.reverse();

    CriticalPath {
        jobs: path
            .into_iter()
            .map(|idx| graph[petgraph::graph::NodeIndex::new(idx)].id.clone())
            .collect(),
        duration_secs: finish[end],
    }
}

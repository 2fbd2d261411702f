use crate::analyzer::report::{Finding, FindingKind, Impact, Severity};
use crate::analyzer::{RuleContext, RuleError};
use crate::graph;
use crate::parser::dag::{DagEdge, JobCategory, PipelineGraph};

/// A `needs` edge that orders two jobs without any data flowing between them.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SerializableEdge {
    pub upstream: String,
    pub downstream: String,
}

/// Edges that could be dropped: no artifact/output dependency, not a deploy
/// gate, and not already implied by another path.
pub(crate) fn serializable_edges(dag: &PipelineGraph) -> Vec<SerializableEdge> {
    dag.edges()
        .into_iter()
        .filter(|(_, _, kind)| *kind == DagEdge::Dependency)
        .filter(|(_, to, _)| to.category != JobCategory::Deploy)
        .filter(|(from, to, _)| !dag.has_indirect_path(&from.id, &to.id))
        .map(|(from, to, _)| SerializableEdge {
            upstream: from.id.clone(),
            downstream: to.id.clone(),
        })
        .collect()
}

/// Find jobs that are serialized but could run in parallel.
pub fn find_serializable_chains(ctx: &RuleContext<'_>) -> Result<Vec<Finding>, RuleError> {
    let mut findings = Vec::new();

    for edge in serializable_edges(ctx.dag) {
        let upstream_secs = ctx.job_secs(&edge.upstream)?;
        let downstream_secs = ctx.job_secs(&edge.downstream)?;
        let delta = ctx.saving_with(|jobs| {
            if let Some(job) = jobs.iter_mut().find(|j| j.id == edge.downstream) {
                job.needs.retain(|n| *n != edge.upstream);
            }
        })?;

        findings.push(Finding {
            severity: Severity::Low,
            job: Some(edge.downstream.clone()),
            step: None,
            related_jobs: vec![edge.upstream.clone(), edge.downstream.clone()],
            rationale: format!(
                "'{}' needs '{}' but reads none of its artifacts or outputs",
                edge.downstream, edge.upstream
            ),
            impact: Impact::TimeSaved {
                secs: upstream_secs.min(downstream_secs),
            },
            kind: FindingKind::SerializableJobChain {
                upstream: edge.upstream,
                downstream: edge.downstream,
                critical_path_delta_secs: delta,
            },
        });
    }

    Ok(findings)
}

/// Flag pipelines whose critical path is much longer than their slowest layer.
pub fn detect_excessive_sequential(ctx: &RuleContext<'_>) -> Result<Vec<Finding>, RuleError> {
    let durations = ctx.durations()?;
    let layers = graph::layer_indices(ctx.dag);
    let depth = layers.iter().max().map_or(0, |m| m + 1);

    let mut layer_secs = vec![0.0f64; depth];
    for (idx, layer) in layers.iter().enumerate() {
        layer_secs[*layer] = layer_secs[*layer].max(durations[idx]);
    }
    let longest_layer = layer_secs.iter().copied().fold(0.0, f64::max);
    let critical = ctx.baseline.duration_secs;
    let multiple = ctx.analysis.sequential_multiple;

    if longest_layer <= 0.0 || critical <= multiple * longest_layer {
        return Ok(Vec::new());
    }

    let removable = serializable_edges(ctx.dag);
    let saving = ctx.saving_with(|jobs| {
        for edge in &removable {
            if let Some(job) = jobs.iter_mut().find(|j| j.id == edge.downstream) {
                job.needs.retain(|n| *n != edge.upstream);
            }
        }
    })?;

    Ok(vec![Finding {
        severity: Severity::Low,
        job: None,
        step: None,
        related_jobs: ctx.baseline.jobs.clone(),
        rationale: format!(
            "critical path of {:.0}s is {:.1}x the slowest layer ({:.0}s)",
            critical,
            critical / longest_layer,
            longest_layer
        ),
        impact: Impact::TimeSaved { secs: saving },
        kind: FindingKind::ExcessiveSequentialStage {
            critical_path_secs: critical,
            longest_layer_secs: longest_layer,
            multiple,
        },
    }])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::tests::context;
    use crate::parser::github::GitHubActionsParser;

    #[test]
    fn test_detect_serial_lint_test() {
        let yaml = r#"
name: CI
on: push
jobs:
  lint:
    runs-on: ubuntu-latest
    steps:
      - uses: actions/checkout@v4
      - run: npm run lint
  test:
    needs: lint
    runs-on: ubuntu-latest
    steps:
      - uses: actions/checkout@v4
      - run: npm test
"#;
        let dag = GitHubActionsParser::parse(yaml).unwrap();
        let findings = context(&dag, |ctx| find_serializable_chains(ctx).unwrap());
        assert_eq!(findings.len(), 1);
        let f = &findings[0];
        assert_eq!(f.related_jobs, vec!["lint", "test"]);
        // min(12 + 60, 12 + 300)
        assert_eq!(f.savings_secs(), Some(72.0));
        match &f.kind {
            FindingKind::SerializableJobChain { critical_path_delta_secs, .. } => {
                assert_eq!(*critical_path_delta_secs, 72.0);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_artifact_edges_and_deploy_gates_are_kept() {
        let yaml = r#"
on: push
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - run: npm run build
      - uses: actions/upload-artifact@v4
        with: { name: dist, path: dist }
  test:
    needs: build
    runs-on: ubuntu-latest
    steps:
      - uses: actions/download-artifact@v4
        with: { name: dist }
      - run: npm test
  deploy:
    needs: test
    runs-on: ubuntu-latest
    steps:
      - run: ./deploy.sh production
"#;
        let dag = GitHubActionsParser::parse(yaml).unwrap();
        assert!(context(&dag, |ctx| find_serializable_chains(ctx).unwrap()).is_empty());
    }

    #[test]
    fn test_redundant_edge_is_not_reported() {
        let yaml = r#"
on: push
jobs:
  a:
    runs-on: ubuntu-latest
    outputs: { v: "${{ steps.x.outputs.v }}" }
    steps: [{ id: x, run: echo v=1 }]
  b:
    needs: a
    runs-on: ubuntu-latest
    outputs: { w: "${{ steps.y.outputs.w }}" }
    steps: [{ id: y, run: "echo ${{ needs.a.outputs.v }}" }]
  c:
    needs: [a, b]
    runs-on: ubuntu-latest
    steps: [{ run: "echo ${{ needs.b.outputs.w }}" }]
"#;
        let dag = GitHubActionsParser::parse(yaml).unwrap();
        // a -> c is implied by a -> b -> c and nothing else is free of data flow.
        assert!(context(&dag, |ctx| find_serializable_chains(ctx).unwrap()).is_empty());
    }

    #[test]
    fn test_excessive_sequential_stage() {
        let yaml = r#"
on: push
jobs:
  one:
    runs-on: ubuntu-latest
    steps: [{ run: echo 1 }]
  two:
    needs: one
    runs-on: ubuntu-latest
    steps: [{ run: echo 2 }]
  three:
    needs: two
    runs-on: ubuntu-latest
    steps: [{ run: echo 3 }]
"#;
        let dag = GitHubActionsParser::parse(yaml).unwrap();
        let findings = context(&dag, |ctx| detect_excessive_sequential(ctx).unwrap());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Low);
        // Dropping both ordering-only edges leaves a single 30s layer.
        assert_eq!(findings[0].savings_secs(), Some(60.0));
    }

    #[test]
    fn test_wide_pipeline_is_not_sequential() {
        let yaml = r#"
on: push
jobs:
  a: { runs-on: ubuntu-latest, steps: [{ run: echo a }] }
  b: { runs-on: ubuntu-latest, steps: [{ run: echo b }] }
  c: { needs: [a, b], runs-on: ubuntu-latest, steps: [{ run: echo c }] }
"#;
        let dag = GitHubActionsParser::parse(yaml).unwrap();
        assert!(context(&dag, |ctx| detect_excessive_sequential(ctx).unwrap()).is_empty());
    }
}

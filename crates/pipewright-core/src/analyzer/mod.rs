pub mod cache_detector;
pub mod deploy_guard;
pub mod duplicate_install;
pub mod parallel_finder;
pub mod report;
pub mod secrets;
pub mod waste_detector;

use crate::config::AnalysisConfig;
use crate::engine::CancelFlag;
use crate::error::{EngineError, Result};
use crate::graph::{self, critical_path, CriticalPath, DurationError, DurationModel};
use crate::parser::dag::{Job, PipelineGraph, Step, StepAction};
use rayon::prelude::*;
use report::{sort_findings, AnalysisReport, Finding, FindingKind, ReportMetrics, RuleId};
use secrets::SecretPatterns;
use std::collections::BTreeMap;
use std::time::Instant;
use thiserror::Error;

/// Why a single rule could not produce findings.
#[derive(Error, Debug)]
pub enum RuleError {
    #[error(transparent)]
    Duration(#[from] DurationError),

    #[error("no job named '{0}'")]
    UnknownJob(String),

    #[error("hypothetical graph could not be built: {0}")]
    Hypothetical(String),
}

/// Everything a rule may read. Rules never mutate the graph.
pub struct RuleContext<'a> {
    pub dag: &'a PipelineGraph,
    pub model: &'a DurationModel,
    pub analysis: &'a AnalysisConfig,
    pub secrets: &'a SecretPatterns,
    /// Critical path of the graph as declared.
    pub baseline: CriticalPath,
    durations: std::result::Result<Vec<f64>, DurationError>,
}

impl<'a> RuleContext<'a> {
    pub fn new(
        dag: &'a PipelineGraph,
        model: &'a DurationModel,
        analysis: &'a AnalysisConfig,
        secrets: &'a SecretPatterns,
    ) -> Self {
        let durations = model.job_durations(dag);
        let baseline = match &durations {
            Ok(d) => critical_path(dag, d),
            Err(_) => critical_path(dag, &vec![0.0; dag.job_count()]),
        };
        Self {
            dag,
            model,
            analysis,
            secrets,
            baseline,
            durations,
        }
    }

    /// Per-job durations, indexed by node index.
    pub fn durations(&self) -> std::result::Result<&[f64], RuleError> {
        self.durations
            .as_deref()
            .map_err(|e| RuleError::Duration(e.clone()))
    }

    pub fn job_secs(&self, id: &str) -> std::result::Result<f64, RuleError> {
        let idx = self
            .dag
            .node_index(id)
            .ok_or_else(|| RuleError::UnknownJob(id.to_string()))?;
        Ok(self.durations()?[idx.index()])
    }

    /// Critical-path seconds saved by applying `edit` to a copy of the graph.
    pub fn saving_with(
        &self,
        edit: impl FnOnce(&mut Vec<Job>),
    ) -> std::result::Result<f64, RuleError> {
        self.durations()?;
        let hypothetical = self
            .dag
            .derive(edit)
            .map_err(|e| RuleError::Hypothetical(e.to_string()))?;
        let durations = self.model.job_durations(&hypothetical)?;
        let optimized = critical_path(&hypothetical, &durations).duration_secs;
        Ok((self.baseline.duration_secs - optimized).max(0.0))
    }
}

/// The step an install turns into once its dependencies come from a cache.
fn cache_hit() -> Step {
    Step::cache("restore dependency cache", "deps-${{ hashFiles('lockfile') }}", Vec::new())
}

/// Rewrite `jobs` as if each `(job, step, install)` came from a lockfile-keyed
/// cache. The install leaves its step, the rest of the step still runs, and a
/// cache restore runs just before it. A step left empty becomes the restore.
pub(crate) fn serve_from_cache<'a>(
    jobs: &mut [Job],
    installs: impl IntoIterator<Item = (&'a str, usize, &'a str)>,
) {
    let mut by_step: BTreeMap<(&str, usize), Vec<&str>> = BTreeMap::new();
    for (job, step, install) in installs {
        let commands = by_step.entry((job, step)).or_default();
        if !commands.contains(&install) {
            commands.push(install);
        }
    }

    // Back to front so an inserted restore leaves earlier indices valid.
    for ((job_id, idx), commands) in by_step.into_iter().rev() {
        let Some(job) = jobs.iter_mut().find(|j| j.id == job_id) else {
            continue;
        };
        let remaining = match job.steps.get(idx).and_then(Step::command) {
            Some(script) => duplicate_install::without_installs(script, &commands),
            None => continue,
        };
        if remaining.is_empty() {
            job.steps[idx] = cache_hit();
        } else {
            if let StepAction::Run { command } = &mut job.steps[idx].action {
                *command = remaining;
            }
            job.steps.insert(idx, cache_hit());
        }
    }
}

pub type RuleFn = fn(&RuleContext<'_>) -> std::result::Result<Vec<Finding>, RuleError>;

/// Every rule, in discovery order.
pub const RULES: &[(RuleId, RuleFn)] = &[
    (RuleId::HardcodedSecret, secrets::detect_secrets),
    (RuleId::UnguardedDeploy, deploy_guard::detect_unguarded_deploys),
    (RuleId::DuplicateDependencyInstall, duplicate_install::detect_duplicate_installs),
    (RuleId::MissingCache, cache_detector::detect_missing_caches),
    (RuleId::SerializableJobChain, parallel_finder::find_serializable_chains),
    (RuleId::ExcessiveSequentialStage, parallel_finder::detect_excessive_sequential),
    (RuleId::FloatingRunnerImage, waste_detector::detect_floating_images),
];

/// Run `rules` in parallel and return their findings in a stable order.
///
/// A failing rule turns into a `rule-evaluation-skipped` finding. If `cancel`
/// is set at any point before the join completes, the partial result is dropped.
pub fn evaluate_rules(
    ctx: &RuleContext<'_>,
    rules: &[(RuleId, RuleFn)],
    cancel: &CancelFlag,
) -> Result<Vec<Finding>> {
    let results: Vec<Option<Vec<Finding>>> = rules
        .par_iter()
        .map(|(id, rule)| {
            if cancel.is_cancelled() {
                return None;
            }
            let started = Instant::now();
            let findings = match rule(ctx) {
                Ok(findings) => findings,
                Err(err) => {
                    tracing::warn!(
                        rule = %id,
                        error = %err,
                        "rule failed, reporting it as skipped"
                    );
                    vec![Finding::skipped(*id, &err)]
                }
            };
            tracing::debug!(
                rule = %id,
                findings = findings.len(),
                elapsed_us = started.elapsed().as_micros() as u64,
                "rule evaluated"
            );
            Some(findings)
        })
        .collect();

    if cancel.is_cancelled() || results.iter().any(Option::is_none) {
        return Err(EngineError::Cancelled);
    }

    let mut findings: Vec<Finding> = results.into_iter().flatten().flatten().collect();
    sort_findings(&mut findings);
    Ok(findings)
}

/// Run all rules on a pipeline graph and produce a unified report.
pub fn analyze(ctx: &RuleContext<'_>, cancel: &CancelFlag) -> Result<AnalysisReport> {
    let dag = ctx.dag;
    let findings = evaluate_rules(ctx, RULES, cancel)?;

    let total_job_secs = ctx.durations().map(|d| d.iter().sum::<f64>()).unwrap_or(0.0);
    let current = ctx.baseline.duration_secs;
    let optimized = estimate_optimized_duration(ctx, &findings);
    let metrics = ReportMetrics::compute(
        &findings,
        dag.job_count(),
        dag.edge_count(),
        current,
        optimized,
    );

    Ok(AnalysisReport {
        pipeline_name: dag.name().to_string(),
        platform: dag.platform(),
        job_count: dag.job_count(),
        step_count: dag.step_count(),
        edge_count: dag.edge_count(),
        layers: graph::layers(dag),
        max_parallelism: graph::max_parallelism(dag),
        critical_path: ctx.baseline.clone(),
        total_job_secs,
        optimized_duration_secs: optimized,
        findings,
        metrics,
    })
}

/// Critical path with every time-saving fix applied at once.
fn estimate_optimized_duration(ctx: &RuleContext<'_>, findings: &[Finding]) -> f64 {
    let current = ctx.baseline.duration_secs;
    let mut cached: Vec<(&str, usize, &str)> = Vec::new();
    let mut dropped: Vec<(String, String)> = Vec::new();

    for finding in findings {
        match &finding.kind {
            FindingKind::MissingCache { command } => {
                if let (Some(job), Some(step)) = (&finding.job, finding.step) {
                    cached.push((job.as_str(), step, command.as_str()));
                }
            }
            FindingKind::DuplicateDependencyInstall { command, occurrences } => {
                let repeats = occurrences.iter().skip(1);
                cached.extend(repeats.map(|o| (o.job.as_str(), o.step, command.as_str())));
            }
            FindingKind::SerializableJobChain { upstream, downstream, .. } => {
                dropped.push((upstream.clone(), downstream.clone()));
            }
            _ => {}
        }
    }

    if cached.is_empty() && dropped.is_empty() {
        return current;
    }

    ctx.saving_with(|jobs| {
        serve_from_cache(jobs, cached);
        for job in jobs.iter_mut() {
            for (upstream, _) in dropped.iter().filter(|(_, down)| *down == job.id) {
                job.needs.retain(|n| n != upstream);
            }
        }
    })
    .map(|saving| current - saving)
    .unwrap_or(current)
}

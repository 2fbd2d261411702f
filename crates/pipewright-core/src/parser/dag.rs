use crate::error::{EngineError, Result, SourceLocation};
use crate::graph;
use crate::parser::PlatformKind;
use indexmap::IndexMap;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// Keys a parser did not understand, kept verbatim so a renderer can emit them again.
pub type Metadata = IndexMap<String, serde_yaml::Value>;

/// An environment value, either written inline or pulled from a secret/variable store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "kebab-case")]
pub enum EnvValue {
    Literal(String),
    Reference(String),
}

impl EnvValue {
    /// Classify a raw value. Anything using a store indirection is a reference:
    /// `${{ secrets.X }}`, `$VAR`, `${VAR}`, `$(var)`, `credentials('id')`, `vault:path`.
    pub fn classify(raw: &str) -> Self {
        if is_reference(raw) {
            EnvValue::Reference(raw.to_string())
        } else {
            EnvValue::Literal(raw.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EnvValue::Literal(s) | EnvValue::Reference(s) => s,
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, EnvValue::Literal(_))
    }
}

fn is_reference(raw: &str) -> bool {
    let trimmed = raw.trim();
    if trimmed.starts_with("vault:") || trimmed.contains("credentials(") {
        return true;
    }
    let bytes = trimmed.as_bytes();
    bytes.iter().enumerate().any(|(i, &b)| {
        b == b'$'
            && bytes
                .get(i + 1)
                .is_some_and(|&n| n == b'{' || n == b'(' || n == b'_' || n.is_ascii_alphabetic())
    })
}

/// What a step does.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum StepAction {
    /// A shell command.
    Run { command: String },
    /// A structured action/task reference with its inputs.
    Uses { reference: String, inputs: Metadata },
    /// A cache restore.
    Cache { key: String, paths: Vec<String> },
}

/// Represents a single step within a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Step {
    pub name: String,
    pub action: StepAction,
    pub env: IndexMap<String, EnvValue>,
    pub condition: Option<String>,
    pub metadata: Metadata,
}

const LOCKFILE_MARKERS: &[&str] = &[
    "hashfiles(",
    "files:",
    "lock",
    "package.json",
    "requirements",
    "pyproject.toml",
    "go.sum",
    "go.mod",
    "cargo.toml",
    "pom.xml",
    "gradle",
    "gemfile",
    "composer.json",
    "csproj",
    "packages.config",
];

impl Step {
    pub fn run(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self::with_action(
            name,
            StepAction::Run {
                command: command.into(),
            },
        )
    }

    pub fn uses(name: impl Into<String>, reference: impl Into<String>) -> Self {
        Self::with_action(
            name,
            StepAction::Uses {
                reference: reference.into(),
                inputs: Metadata::new(),
            },
        )
    }

    pub fn cache(name: impl Into<String>, key: impl Into<String>, paths: Vec<String>) -> Self {
        Self::with_action(
            name,
            StepAction::Cache {
                key: key.into(),
                paths,
            },
        )
    }

    fn with_action(name: impl Into<String>, action: StepAction) -> Self {
        Self {
            name: name.into(),
            action,
            env: IndexMap::new(),
            condition: None,
            metadata: Metadata::new(),
        }
    }

    /// Add an input to a `uses` step. No-op for other actions.
    pub fn input(mut self, key: &str, value: impl Into<serde_yaml::Value>) -> Self {
        if let StepAction::Uses { inputs, .. } = &mut self.action {
            inputs.insert(key.to_string(), value.into());
        }
        self
    }

    pub fn env_var(mut self, key: &str, value: &str) -> Self {
        self.env.insert(key.to_string(), EnvValue::classify(value));
        self
    }

    pub fn command(&self) -> Option<&str> {
        match &self.action {
            StepAction::Run { command } => Some(command),
            _ => None,
        }
    }

    pub fn action_ref(&self) -> Option<&str> {
        match &self.action {
            StepAction::Uses { reference, .. } => Some(reference),
            _ => None,
        }
    }

    /// The text the duration table and classifiers look at.
    pub fn signature(&self) -> &str {
        match &self.action {
            StepAction::Run { command } => command,
            StepAction::Uses { reference, .. } => reference,
            StepAction::Cache { key, .. } => key,
        }
    }

    /// True for a cache restore whose key is derived from a lockfile or manifest.
    /// Setup actions with a `cache` input and `Swatinem/rust-cache` key off the
    /// lockfile themselves.
    pub fn is_lockfile_cache(&self) -> bool {
        match &self.action {
            StepAction::Cache { key, .. } => {
                let key = key.to_lowercase();
                LOCKFILE_MARKERS.iter().any(|m| key.contains(m))
            }
            StepAction::Uses { reference, inputs } => {
                let reference = reference.to_lowercase();
                reference.starts_with("swatinem/rust-cache")
                    || (reference.starts_with("actions/setup-") && inputs.contains_key("cache"))
            }
            StepAction::Run { .. } => false,
        }
    }
}

/// Simple commands of a shell script: lines split on `;`, `|` and `&&`,
/// trimmed, blanks dropped.
pub fn command_segments(script: &str) -> impl Iterator<Item = &str> {
    script
        .split(['\n', ';', '|'])
        .flat_map(|part| part.split("&&"))
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
}

/// Coarse role of a job, used by rules and by the synthesizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobCategory {
    Build,
    Test,
    Lint,
    SecurityScan,
    Package,
    Deploy,
    Monitor,
    Other,
}

impl JobCategory {
    pub fn label(&self) -> &str {
        match self {
            JobCategory::Build => "build",
            JobCategory::Test => "test",
            JobCategory::Lint => "lint",
            JobCategory::SecurityScan => "security-scan",
            JobCategory::Package => "package",
            JobCategory::Deploy => "deploy",
            JobCategory::Monitor => "monitor",
            JobCategory::Other => "other",
        }
    }

    /// Whether a job of this category counts as a safety check before a deploy.
    pub fn is_gate(&self) -> bool {
        matches!(self, JobCategory::Test | JobCategory::SecurityScan)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResourceHints {
    pub cpu: Option<u32>,
    pub memory_gb: Option<u32>,
    pub timeout_minutes: Option<u32>,
}

impl ResourceHints {
    pub fn is_empty(&self) -> bool {
        self.cpu.is_none() && self.memory_gb.is_none() && self.timeout_minutes.is_none()
    }
}

/// Which upstream artifacts a job reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "jobs", rename_all = "kebab-case")]
pub enum Consumes {
    #[default]
    Nothing,
    /// Everything upstream jobs publish.
    Any,
    /// Only artifacts from the named jobs.
    From(Vec<String>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArtifactFlow {
    pub produces: bool,
    pub consumes: Consumes,
}

impl ArtifactFlow {
    /// Whether a job with this flow reads what `upstream` publishes.
    pub fn reads_from(&self, upstream: &str) -> bool {
        match &self.consumes {
            Consumes::Nothing => false,
            Consumes::Any => true,
            Consumes::From(jobs) => jobs.iter().any(|j| j == upstream),
        }
    }
}

/// A node in the pipeline graph representing a single job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: String,
    pub name: String,
    pub steps: Vec<Step>,
    pub needs: Vec<String>,
    pub runner: Option<String>,
    pub resources: ResourceHints,
    pub condition: Option<String>,
    pub stage: Option<String>,
    pub category: JobCategory,
    pub artifacts: ArtifactFlow,
    pub env: IndexMap<String, EnvValue>,
    pub metadata: Metadata,
}

impl Job {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            steps: Vec::new(),
            needs: Vec::new(),
            runner: None,
            resources: ResourceHints::default(),
            condition: None,
            stage: None,
            category: JobCategory::Other,
            artifacts: ArtifactFlow::default(),
            env: IndexMap::new(),
            metadata: Metadata::new(),
        }
    }

    pub fn needs_job(&mut self, id: &str) {
        if !self.needs.iter().any(|n| n == id) {
            self.needs.push(id.to_string());
        }
    }

    /// Whether any step, env value or condition of this job mentions `needle`.
    pub fn mentions(&self, needle: &str) -> bool {
        self.condition.as_deref().is_some_and(|c| c.contains(needle))
            || self.env.values().any(|v| v.as_str().contains(needle))
            || self.steps.iter().any(|s| {
                s.signature().contains(needle)
                    || s.env.values().any(|v| v.as_str().contains(needle))
                    || s.condition.as_deref().is_some_and(|c| c.contains(needle))
            })
    }
}

/// Edge types in the pipeline graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DagEdge {
    /// Ordering only: the downstream job waits but reads nothing.
    Dependency,
    /// The downstream job reads artifacts or outputs of the upstream job.
    Artifact,
}

/// The normalized pipeline: jobs plus the derived dependency graph.
///
/// Edges point from a dependency to its dependent (the job that `needs` it).
/// Only [`PipelineGraphBuilder`] creates one, and it is never mutated afterwards.
#[derive(Debug, Clone)]
pub struct PipelineGraph {
    name: String,
    platform: PlatformKind,
    graph: DiGraph<Job, DagEdge>,
    node_map: HashMap<String, NodeIndex>,
    env: IndexMap<String, EnvValue>,
    metadata: Metadata,
}

impl PipelineGraph {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn platform(&self) -> PlatformKind {
        self.platform
    }

    /// Pipeline-level environment.
    pub fn env(&self) -> &IndexMap<String, EnvValue> {
        &self.env
    }

    /// Pipeline-level keys no parser understood.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Read-only access to the underlying graph for algorithms.
    pub fn graph(&self) -> &DiGraph<Job, DagEdge> {
        &self.graph
    }

    pub fn node_index(&self, id: &str) -> Option<NodeIndex> {
        self.node_map.get(id).copied()
    }

    /// Jobs in declaration order.
    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.graph.node_indices().map(move |idx| &self.graph[idx])
    }

    pub fn get_job(&self, id: &str) -> Option<&Job> {
        self.node_map.get(id).map(|idx| &self.graph[*idx])
    }

    pub fn job_ids(&self) -> Vec<String> {
        self.jobs().map(|j| j.id.clone()).collect()
    }

    pub fn job_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn step_count(&self) -> usize {
        self.jobs().map(|j| j.steps.len()).sum()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// All (upstream, downstream, kind) edges, ordered by downstream then upstream declaration.
    pub fn edges(&self) -> Vec<(&Job, &Job, DagEdge)> {
        let mut edges: Vec<_> = self
            .graph
            .edge_indices()
            .filter_map(|e| {
                let (from, to) = self.graph.edge_endpoints(e)?;
                Some((from, to, self.graph[e]))
            })
            .collect();
        edges.sort_by_key(|(from, to, _)| (to.index(), from.index()));
        edges
            .into_iter()
            .map(|(from, to, kind)| (&self.graph[from], &self.graph[to], kind))
            .collect()
    }

    /// Get all root jobs (jobs with no dependencies).
    pub fn root_jobs(&self) -> Vec<&Job> {
        self.graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .map(|idx| &self.graph[idx])
            .collect()
    }

    /// Get all leaf jobs (jobs that nothing depends on).
    pub fn leaf_jobs(&self) -> Vec<&Job> {
        self.graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Outgoing)
                    .next()
                    .is_none()
            })
            .map(|idx| &self.graph[idx])
            .collect()
    }

    /// Every job `id` transitively depends on, in declaration order.
    pub fn ancestors(&self, id: &str) -> Vec<&Job> {
        let Some(start) = self.node_index(id) else {
            return Vec::new();
        };
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([start]);
        while let Some(node) = queue.pop_front() {
            for dep in self.graph.neighbors_directed(node, Direction::Incoming) {
                if seen.insert(dep) {
                    queue.push_back(dep);
                }
            }
        }
        seen.into_iter().map(|idx| &self.graph[idx]).collect()
    }

    /// Whether `to` is reachable from `from` without using the direct edge between them.
    pub fn has_indirect_path(&self, from: &str, to: &str) -> bool {
        let (Some(start), Some(goal)) = (self.node_index(from), self.node_index(to)) else {
            return false;
        };
        let mut seen = HashSet::new();
        let mut stack: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(start, Direction::Outgoing)
            .filter(|&n| n != goal)
            .collect();
        while let Some(node) = stack.pop() {
            if node == goal {
                return true;
            }
            if seen.insert(node) {
                stack.extend(self.graph.neighbors_directed(node, Direction::Outgoing));
            }
        }
        false
    }

    /// Build a hypothetical copy with `edit` applied to the jobs.
    /// The original graph is left untouched.
    pub fn derive(&self, edit: impl FnOnce(&mut Vec<Job>)) -> Result<PipelineGraph> {
        let mut jobs: Vec<Job> = self.jobs().cloned().collect();
        edit(&mut jobs);
        let mut builder = PipelineGraphBuilder::new(self.name.clone(), self.platform);
        builder.set_env(self.env.clone());
        builder.set_metadata(self.metadata.clone());
        for job in jobs {
            builder.add_job(job);
        }
        builder.build()
    }
}

impl Serialize for PipelineGraph {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;

        let jobs: Vec<&Job> = self.jobs().collect();
        let mut state = serializer.serialize_struct("PipelineGraph", 5)?;
        state.serialize_field("name", &self.name)?;
        state.serialize_field("platform", &self.platform)?;
        state.serialize_field("env", &self.env)?;
        state.serialize_field("metadata", &self.metadata)?;
        state.serialize_field("jobs", &jobs)?;
        state.end()
    }
}

/// The only way to create a [`PipelineGraph`].
#[derive(Debug)]
pub struct PipelineGraphBuilder {
    name: String,
    platform: PlatformKind,
    jobs: Vec<Job>,
    env: IndexMap<String, EnvValue>,
    metadata: Metadata,
}

impl PipelineGraphBuilder {
    pub fn new(name: impl Into<String>, platform: PlatformKind) -> Self {
        Self {
            name: name.into(),
            platform,
            jobs: Vec::new(),
            env: IndexMap::new(),
            metadata: Metadata::new(),
        }
    }

    pub fn add_job(&mut self, job: Job) {
        self.jobs.push(job);
    }

    pub fn set_env(&mut self, env: IndexMap<String, EnvValue>) {
        self.env = env;
    }

    pub fn set_metadata(&mut self, metadata: Metadata) {
        self.metadata = metadata;
    }

    pub fn contains(&self, id: &str) -> bool {
        self.jobs.iter().any(|j| j.id == id)
    }

    pub fn job_mut(&mut self, id: &str) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|j| j.id == id)
    }

    pub fn job_ids(&self) -> Vec<String> {
        self.jobs.iter().map(|j| j.id.clone()).collect()
    }

    /// Validate and freeze the graph: unique ids, known `needs`, no cycles.
    pub fn build(self) -> Result<PipelineGraph> {
        let mut graph: DiGraph<Job, DagEdge> = DiGraph::new();
        let mut node_map = HashMap::new();

        for mut job in self.jobs {
            if node_map.contains_key(&job.id) {
                return Err(EngineError::malformed(
                    SourceLocation::at(format!("jobs.{}", job.id)),
                    format!("duplicate job id '{}'", job.id),
                ));
            }
            let mut seen = HashSet::new();
            job.needs.retain(|n| seen.insert(n.clone()));
            let id = job.id.clone();
            let idx = graph.add_node(job);
            node_map.insert(id, idx);
        }

        for idx in graph.node_indices().collect::<Vec<_>>() {
            let needs = graph[idx].needs.clone();
            for dep in needs {
                let Some(&dep_idx) = node_map.get(&dep) else {
                    return Err(EngineError::malformed(
                        SourceLocation::at(format!("jobs.{}.needs", graph[idx].id)),
                        format!("'{}' needs unknown job '{}'", graph[idx].id, dep),
                    ));
                };
                let kind = edge_kind(&graph[dep_idx], &graph[idx]);
                graph.add_edge(dep_idx, idx, kind);
            }
        }

        if let Some(cycle) = graph::detect_cycle(&graph) {
            return Err(EngineError::CyclicDependency {
                jobs: cycle.into_iter().map(|idx| graph[idx].id.clone()).collect(),
            });
        }

        Ok(PipelineGraph {
            name: self.name,
            platform: self.platform,
            graph,
            node_map,
            env: self.env,
            metadata: self.metadata,
        })
    }
}

/// An edge carries data when the downstream job reads the upstream's artifacts,
/// or references its outputs (`needs.<id>.outputs`, `dependencies.<id>.outputs`).
fn edge_kind(upstream: &Job, downstream: &Job) -> DagEdge {
    let reads_artifacts =
        upstream.artifacts.produces && downstream.artifacts.reads_from(&upstream.id);
    let reads_outputs = downstream.mentions(&format!("needs.{}.outputs", upstream.id))
        || downstream.mentions(&format!("dependencies.{}.outputs", upstream.id));
    if reads_artifacts || reads_outputs {
        DagEdge::Artifact
    } else {
        DagEdge::Dependency
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: &str, needs: &[&str]) -> Job {
        let mut j = Job::new(id, id);
        j.needs = needs.iter().map(|s| s.to_string()).collect();
        j
    }

    fn build(jobs: Vec<Job>) -> Result<PipelineGraph> {
        let mut builder = PipelineGraphBuilder::new("test", PlatformKind::Generic);
        for j in jobs {
            builder.add_job(j);
        }
        builder.build()
    }

    #[test]
    fn test_env_value_classification() {
        assert!(!EnvValue::classify("${{ secrets.TOKEN }}").is_literal());
        assert!(!EnvValue::classify("$CI_JOB_TOKEN").is_literal());
        assert!(!EnvValue::classify("$(System.AccessToken)").is_literal());
        assert!(!EnvValue::classify("credentials('deploy-key')").is_literal());
        assert!(!EnvValue::classify("vault:secret/data/api").is_literal());
        assert!(EnvValue::classify("production").is_literal());
        assert!(EnvValue::classify("costs $5").is_literal());
    }

    #[test]
    fn test_command_segments_split_compound_commands() {
        let script = "cd web && npm ci; npm test || true\n\ncurl x | sh";
        let segments: Vec<&str> = command_segments(script).collect();
        assert_eq!(segments, vec!["cd web", "npm ci", "npm test", "true", "curl x", "sh"]);
    }

    #[test]
    fn test_build_rejects_duplicate_ids() {
        let err = build(vec![job("a", &[]), job("a", &[])]).unwrap_err();
        assert!(matches!(err, EngineError::MalformedDefinition { .. }));
    }

    #[test]
    fn test_build_rejects_unknown_needs() {
        let err = build(vec![job("a", &["ghost"])]).unwrap_err();
        match err {
            EngineError::MalformedDefinition { location, message } => {
                assert_eq!(location.path, "jobs.a.needs");
                assert!(message.contains("ghost"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_build_rejects_cycle() {
        let err = build(vec![job("a", &["c"]), job("b", &["a"]), job("c", &["b"])]).unwrap_err();
        match err {
            EngineError::CyclicDependency { jobs } => {
                let set: BTreeSet<_> = jobs.iter().map(String::as_str).collect();
                assert_eq!(set, BTreeSet::from(["a", "b", "c"]));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_needs_are_deduplicated() {
        let dag = build(vec![job("a", &[]), job("b", &["a", "a"])]).unwrap();
        assert_eq!(dag.get_job("b").unwrap().needs, vec!["a"]);
        assert_eq!(dag.edge_count(), 1);
    }

    #[test]
    fn test_roots_leaves_and_ancestors() {
        let dag = build(vec![
            job("build", &[]),
            job("lint", &[]),
            job("test", &["build"]),
            job("deploy", &["test", "lint"]),
        ])
        .unwrap();
        let roots: Vec<_> = dag.root_jobs().iter().map(|j| j.id.as_str()).collect();
        assert_eq!(roots, vec!["build", "lint"]);
        let leaves: Vec<_> = dag.leaf_jobs().iter().map(|j| j.id.as_str()).collect();
        assert_eq!(leaves, vec!["deploy"]);
        let ancestors: Vec<_> = dag.ancestors("deploy").iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ancestors, vec!["build", "lint", "test"]);
    }

    #[test]
    fn test_indirect_path() {
        let dag = build(vec![job("a", &[]), job("b", &["a"]), job("c", &["a", "b"])]).unwrap();
        assert!(dag.has_indirect_path("a", "c"));
        assert!(!dag.has_indirect_path("a", "b"));
    }

    #[test]
    fn test_artifact_edge_kind() {
        let mut producer = job("build", &[]);
        producer.artifacts.produces = true;
        let mut consumer = job("test", &["build"]);
        consumer.artifacts.consumes = Consumes::Any;
        let plain = job("lint", &["build"]);
        let dag = build(vec![producer, consumer, plain]).unwrap();
        let kinds: Vec<_> = dag
            .edges()
            .into_iter()
            .map(|(from, to, kind)| (from.id.clone(), to.id.clone(), kind))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("build".to_string(), "test".to_string(), DagEdge::Artifact),
                ("build".to_string(), "lint".to_string(), DagEdge::Dependency),
            ]
        );
    }

    #[test]
    fn test_output_reference_makes_artifact_edge() {
        let a = job("version", &[]);
        let mut b = job("release", &["version"]);
        b.steps.push(Step::run("tag", "git tag ${{ needs.version.outputs.tag }}"));
        let dag = build(vec![a, b]).unwrap();
        assert_eq!(dag.edges()[0].2, DagEdge::Artifact);
    }

    #[test]
    fn test_derive_leaves_original_untouched() {
        let dag = build(vec![job("a", &[]), job("b", &["a"])]).unwrap();
        let derived = dag
            .derive(|jobs| {
                for j in jobs.iter_mut() {
                    j.needs.clear();
                }
            })
            .unwrap();
        assert_eq!(derived.edge_count(), 0);
        assert_eq!(dag.edge_count(), 1);
        assert_eq!(dag.get_job("b").unwrap().needs, vec!["a"]);
    }

    #[test]
    fn test_lockfile_cache_detection() {
        let keyed = Step::cache("cache", "npm-${{ hashFiles('**/package-lock.json') }}", vec![]);
        let unkeyed = Step::cache("cache", "static-key", vec![]);
        assert!(keyed.is_lockfile_cache());
        assert!(!unkeyed.is_lockfile_cache());
        assert!(!Step::run("install", "npm ci").is_lockfile_cache());
    }
}

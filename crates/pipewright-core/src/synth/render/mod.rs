//! Graph to platform text.
//!
//! YAML platforms are built as `serde_yaml` values and serialized once;
//! Jenkins gets a declarative text emitter. Opaque metadata is re-emitted only
//! when the target platform is the one the graph was read from, since its keys
//! mean nothing elsewhere.

pub mod azure;
pub mod generic;
pub mod github;
pub mod gitlab;
pub mod jenkins;

use crate::error::{EngineError, Result};
use crate::graph;
use crate::parser::dag::{EnvValue, Job, Metadata, PipelineGraph, Step, StepAction};
use crate::parser::PlatformKind;
use indexmap::IndexMap;
use serde::Serialize;
use serde_yaml::{Mapping, Value};
use std::collections::{BTreeSet, HashMap};

/// A pipeline definition ready to be written to disk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedPipeline {
    pub platform: PlatformKind,
    /// Conventional location of the file in a repository.
    pub path: String,
    pub format: String,
    pub content: String,
    /// Stage each job was placed in, in output order.
    pub stages: IndexMap<String, String>,
    /// Things that could not be carried over exactly.
    pub warnings: Vec<String>,
}

/// Render `dag` as a `platform` definition.
pub fn render(dag: &PipelineGraph, platform: PlatformKind) -> Result<RenderedPipeline> {
    let mut ctx = RenderContext::new(dag, platform);
    tracing::debug!(
        source = %dag.platform(),
        target = %platform,
        jobs = dag.job_count(),
        "rendering pipeline"
    );

    let content = match platform {
        PlatformKind::GithubActions => github::render(&mut ctx)?,
        PlatformKind::GitlabCi => gitlab::render(&mut ctx)?,
        PlatformKind::Jenkins => jenkins::render(&mut ctx)?,
        PlatformKind::AzurePipelines => azure::render(&mut ctx)?,
        PlatformKind::Generic => generic::render(&mut ctx)?,
    };

    if !ctx.native && !dag.metadata().is_empty() {
        let keys: Vec<&str> = dag.metadata().keys().map(String::as_str).collect();
        ctx.warn(format!(
            "{}-specific keys were not carried over: {}",
            dag.platform(),
            keys.join(", ")
        ));
    }

    Ok(RenderedPipeline {
        platform,
        path: platform.file_path().to_string(),
        format: platform.file_format().to_string(),
        content,
        stages: ctx.stages,
        warnings: ctx.warnings,
    })
}

/// State shared by the platform emitters during one render.
pub(crate) struct RenderContext<'a> {
    pub dag: &'a PipelineGraph,
    pub target: PlatformKind,
    /// Rendering back to the platform the graph was read from.
    pub native: bool,
    pub stages: IndexMap<String, String>,
    pub warnings: Vec<String>,
}

impl<'a> RenderContext<'a> {
    fn new(dag: &'a PipelineGraph, target: PlatformKind) -> Self {
        Self {
            dag,
            target,
            native: dag.platform() == target,
            stages: IndexMap::new(),
            warnings: Vec::new(),
        }
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(target_platform = %self.target, %message, "render warning");
        if !self.warnings.contains(&message) {
            self.warnings.push(message);
        }
    }

    /// Copy opaque keys into `map` when rendering natively. Keys in `skip`
    /// were already consumed by the emitter.
    pub fn emit_metadata(&self, map: &mut Mapping, metadata: &Metadata, skip: &[&str]) {
        if !self.native {
            return;
        }
        for (key, value) in metadata {
            if skip.contains(&key.as_str()) {
                continue;
            }
            map.insert(Value::String(key.clone()), value.clone());
        }
    }

    /// An environment value as the target platform writes it.
    pub fn env_value(&self, value: &EnvValue) -> String {
        match value {
            EnvValue::Literal(s) => s.clone(),
            EnvValue::Reference(s) if self.native => s.clone(),
            EnvValue::Reference(s) => {
                let name = reference_name(s);
                match self.target {
                    PlatformKind::GithubActions => format!("${{{{ secrets.{name} }}}}"),
                    PlatformKind::GitlabCi => format!("${name}"),
                    PlatformKind::AzurePipelines => format!("$({name})"),
                    PlatformKind::Jenkins => format!("credentials('{name}')"),
                    PlatformKind::Generic => s.clone(),
                }
            }
        }
    }

    pub fn env_mapping(&self, env: &IndexMap<String, EnvValue>) -> Mapping {
        env.iter()
            .map(|(k, v)| (Value::String(k.clone()), Value::String(self.env_value(v))))
            .collect()
    }

    /// Conditions are platform expressions; across platforms they are copied
    /// verbatim and flagged.
    pub fn condition(&mut self, owner: &str, condition: &str) -> String {
        if !self.native && self.dag.platform() != PlatformKind::Generic {
            self.warn(format!(
                "condition on '{owner}' was copied verbatim and may need rewriting: {condition}"
            ));
        }
        condition.to_string()
    }

    /// Record the stage plan in the output mapping.
    pub fn record_stages(&mut self, plan: &StagePlan<'_>) {
        for (stage, jobs) in &plan.stages {
            for job in jobs {
                self.stages.insert(job.id.clone(), stage.clone());
            }
        }
    }
}

pub(crate) fn put(map: &mut Mapping, key: &str, value: impl Into<Value>) {
    map.insert(Value::String(key.to_string()), value.into());
}

pub(crate) fn strings(items: &[String]) -> Value {
    Value::Sequence(items.iter().map(|s| Value::String(s.clone())).collect())
}

pub(crate) fn to_yaml(platform: PlatformKind, root: Mapping) -> Result<String> {
    serde_yaml::to_string(&Value::Mapping(root)).map_err(|e| EngineError::Render {
        platform: platform.to_string(),
        message: e.to_string(),
    })
}

/// Last identifier inside a store reference: `${{ secrets.NPM_TOKEN }}` and
/// `credentials('NPM_TOKEN')` both name `NPM_TOKEN`.
pub(crate) fn reference_name(raw: &str) -> String {
    const WRAPPERS: &[&str] = &["secrets", "vars", "env", "credentials", "vault"];
    raw.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
        .filter(|part| !part.is_empty() && !WRAPPERS.contains(part))
        .last()
        .unwrap_or(raw)
        .to_string()
}

/// True when a step's display name adds nothing over its command.
pub(crate) fn redundant_name(step: &Step, text: &str) -> bool {
    step.name.is_empty() || text.lines().next().map(str::trim) == Some(step.name.as_str())
}

/// A runner value that names a container image rather than a host label.
pub(crate) fn is_image(runner: &str) -> bool {
    runner.contains(':') || runner.contains('/')
}

/// Jobs grouped into ordered stages.
pub(crate) struct StagePlan<'a> {
    pub stages: Vec<(String, Vec<&'a Job>)>,
}

impl StagePlan<'_> {
    pub fn names(&self) -> Vec<String> {
        self.stages.iter().map(|(name, _)| name.clone()).collect()
    }
}

/// Declared stages when every job has one and they can be ordered; otherwise
/// one stage per topological layer. With `allow_intra_stage` false, a needs
/// edge between two jobs of one declared stage also forces layers.
pub(crate) fn stage_plan(dag: &PipelineGraph, allow_intra_stage: bool) -> StagePlan<'_> {
    declared_stages(dag, allow_intra_stage).unwrap_or_else(|| layered_stages(dag))
}

fn declared_stages(dag: &PipelineGraph, allow_intra_stage: bool) -> Option<StagePlan<'_>> {
    let mut groups: IndexMap<&str, Vec<&Job>> = IndexMap::new();
    for job in dag.jobs() {
        groups.entry(job.stage.as_deref()?).or_default().push(job);
    }
    if groups.is_empty() {
        return None;
    }

    let stage_of: HashMap<&str, usize> = groups
        .iter()
        .enumerate()
        .flat_map(|(i, (_, jobs))| jobs.iter().map(move |j| (j.id.as_str(), i)))
        .collect();

    let mut upstream: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); groups.len()];
    for (i, (_, jobs)) in groups.iter().enumerate() {
        for job in jobs {
            for dep in &job.needs {
                let Some(&j) = stage_of.get(dep.as_str()) else { continue };
                if i != j {
                    upstream[i].insert(j);
                } else if !allow_intra_stage {
                    return None;
                }
            }
        }
    }

    let mut placed = vec![false; groups.len()];
    let mut order = Vec::with_capacity(groups.len());
    while order.len() < groups.len() {
        let next = (0..groups.len())
            .find(|&i| !placed[i] && upstream[i].iter().all(|&u| placed[u]))?;
        placed[next] = true;
        order.push(next);
    }

    let mut groups: Vec<(String, Vec<&Job>)> = groups
        .into_iter()
        .map(|(name, jobs)| (name.to_string(), jobs))
        .collect();
    let stages = order
        .into_iter()
        .map(|i| std::mem::take(&mut groups[i]))
        .collect();
    Some(StagePlan { stages })
}

fn layered_stages(dag: &PipelineGraph) -> StagePlan<'_> {
    let stages = graph::layers(dag)
        .into_iter()
        .enumerate()
        .map(|(i, ids)| {
            let jobs = ids.iter().filter_map(|id| dag.get_job(id)).collect();
            (format!("stage_{}", i + 1), jobs)
        })
        .collect();
    StagePlan { stages }
}

/// Toolchain setup actions and their counterparts.
pub(crate) struct SetupMapping {
    pub github: &'static str,
    pub github_version_input: &'static str,
    pub azure_task: Option<&'static str>,
    pub azure_version_input: &'static str,
}

pub(crate) const SETUP_ACTIONS: &[SetupMapping] = &[
    SetupMapping {
        github: "actions/setup-node@v4",
        github_version_input: "node-version",
        azure_task: Some("NodeTool@0"),
        azure_version_input: "versionSpec",
    },
    SetupMapping {
        github: "actions/setup-python@v5",
        github_version_input: "python-version",
        azure_task: Some("UsePythonVersion@0"),
        azure_version_input: "versionSpec",
    },
    SetupMapping {
        github: "actions/setup-java@v4",
        github_version_input: "java-version",
        azure_task: Some("JavaToolInstaller@0"),
        azure_version_input: "versionSpec",
    },
    SetupMapping {
        github: "actions/setup-go@v5",
        github_version_input: "go-version",
        azure_task: Some("GoTool@0"),
        azure_version_input: "version",
    },
    SetupMapping {
        github: "actions/setup-dotnet@v4",
        github_version_input: "dotnet-version",
        azure_task: Some("UseDotNet@2"),
        azure_version_input: "version",
    },
    SetupMapping {
        github: "ruby/setup-ruby@v1",
        github_version_input: "ruby-version",
        azure_task: Some("UseRubyVersion@0"),
        azure_version_input: "versionSpec",
    },
    SetupMapping {
        github: "dtolnay/rust-toolchain@stable",
        github_version_input: "toolchain",
        azure_task: None,
        azure_version_input: "",
    },
    SetupMapping {
        github: "shivammathur/setup-php@v2",
        github_version_input: "php-version",
        azure_task: None,
        azure_version_input: "",
    },
];

/// What a structured action step does, independent of how a platform spells it.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Portable<'a> {
    Checkout,
    Setup {
        mapping: &'static SetupMapping,
        version: Option<String>,
    },
    Upload {
        name: String,
        path: String,
    },
    Download {
        name: String,
    },
    /// Nothing equivalent elsewhere.
    Other(&'a str),
}

impl PartialEq for SetupMapping {
    fn eq(&self, other: &Self) -> bool {
        self.github == other.github
    }
}

impl std::fmt::Debug for SetupMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.github)
    }
}

fn without_version(reference: &str) -> &str {
    reference.split('@').next().unwrap_or(reference)
}

fn input<'i>(inputs: &'i Metadata, keys: &[&str]) -> Option<&'i Value> {
    keys.iter().find_map(|k| inputs.get(*k))
}

fn input_string(inputs: &Metadata, keys: &[&str]) -> Option<String> {
    input(inputs, keys).and_then(|v| match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Classify a `uses` step. Returns `None` for run and cache steps.
pub(crate) fn portable(step: &Step) -> Option<Portable<'_>> {
    let StepAction::Uses { reference, inputs } = &step.action else {
        return None;
    };
    let bare = without_version(reference).to_lowercase();

    if bare == "actions/checkout" || bare == "checkout" {
        return Some(Portable::Checkout);
    }
    let artifact_name = || {
        input_string(inputs, &["name", "artifact"]).unwrap_or_else(|| "build".to_string())
    };
    if bare == "actions/upload-artifact" || bare == "publishpipelineartifact" || bare == "stash" {
        let path = input_string(inputs, &["path", "targetPath", "includes"])
            .unwrap_or_else(|| ".".to_string());
        return Some(Portable::Upload {
            name: artifact_name(),
            path,
        });
    }
    if bare == "actions/download-artifact"
        || bare == "downloadpipelineartifact"
        || bare == "unstash"
    {
        return Some(Portable::Download {
            name: artifact_name(),
        });
    }
    for mapping in SETUP_ACTIONS {
        let github = without_version(mapping.github).to_lowercase();
        let azure = mapping.azure_task.map(|t| without_version(t).to_lowercase());
        if bare == github {
            let version = input_string(inputs, &[mapping.github_version_input]);
            return Some(Portable::Setup { mapping, version });
        }
        if azure.as_deref() == Some(bare.as_str()) {
            let version = input_string(inputs, &[mapping.azure_version_input]);
            return Some(Portable::Setup { mapping, version });
        }
    }
    Some(Portable::Other(reference))
}

/// Whether a `uses` reference is written in `platform`'s own syntax.
pub(crate) fn is_native_reference(platform: PlatformKind, reference: &str) -> bool {
    match platform {
        PlatformKind::GithubActions => {
            reference.contains('/') || reference.starts_with("docker://")
        }
        PlatformKind::AzurePipelines => {
            reference == "checkout"
                || reference.starts_with("template:")
                || (reference.contains('@') && !reference.contains('/'))
        }
        PlatformKind::Jenkins => matches!(reference, "stash" | "unstash"),
        PlatformKind::GitlabCi => false,
        PlatformKind::Generic => true,
    }
}

/// A lockfile-keyed cache key in `platform`'s syntax.
pub fn cache_key(platform: PlatformKind, prefix: &str, lockfiles: &[String]) -> String {
    match platform {
        PlatformKind::GithubActions => {
            let files: Vec<String> = lockfiles.iter().map(|f| format!("'{f}'")).collect();
            format!("{prefix}-${{{{ runner.os }}}}-${{{{ hashFiles({}) }}}}", files.join(", "))
        }
        PlatformKind::GitlabCi => format!("files:{}", lockfiles.join(",")),
        PlatformKind::AzurePipelines => {
            let mut parts = vec![prefix.to_string(), "\"$(Agent.OS)\"".to_string()];
            parts.extend(lockfiles.iter().cloned());
            parts.join(" | ")
        }
        PlatformKind::Jenkins | PlatformKind::Generic => {
            format!("{prefix}-hash({})", lockfiles.join(","))
        }
    }
}

/// Lockfiles named by a cache key in any of the syntaxes [`cache_key`] writes.
pub fn lockfiles_in_key(key: &str) -> Vec<String> {
    let unquote = |s: &str| s.trim().trim_matches(|c| c == '\'' || c == '"').to_string();

    for opener in ["hashFiles(", "hash("] {
        if let Some(start) = key.find(opener) {
            let args = &key[start + opener.len()..];
            let args = args.split(')').next().unwrap_or(args);
            return args
                .split(',')
                .map(unquote)
                .map(|f| f.trim_start_matches("**/").to_string())
                .filter(|f| !f.is_empty())
                .collect();
        }
    }
    if let Some(files) = key.strip_prefix("files:") {
        return files.split(',').map(unquote).filter(|f| !f.is_empty()).collect();
    }
    if key.contains('|') {
        return key
            .split('|')
            .skip(1)
            .map(unquote)
            .filter(|seg| !seg.contains('$') && (seg.contains('.') || seg.contains('/')))
            .collect();
    }
    Vec::new()
}

/// Leading word of a cache key, used as the prefix when it is rewritten.
pub(crate) fn cache_prefix(key: &str) -> String {
    let prefix: String = key
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    if prefix.is_empty() || key[prefix.len()..].starts_with(':') {
        "deps".to_string()
    } else {
        prefix
    }
}

/// A cache key carried over to `platform`. Keys with no recognizable lockfile
/// are copied as they are.
pub(crate) fn translate_cache_key(ctx: &RenderContext<'_>, key: &str) -> String {
    if ctx.native {
        return key.to_string();
    }
    let lockfiles = lockfiles_in_key(key);
    if lockfiles.is_empty() {
        return key.to_string();
    }
    cache_key(ctx.target, &cache_prefix(key), &lockfiles)
}

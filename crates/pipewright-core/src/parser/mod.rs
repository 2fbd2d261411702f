pub mod azure;
pub mod classify;
pub mod dag;
pub mod generic;
pub mod github;
pub mod gitlab;
pub mod jenkins;

use crate::error::{EngineError, Result, SourceLocation};
use dag::{Consumes, EnvValue, Job, Metadata, PipelineGraph};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::cmp::Reverse;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Definitions longer than this are rejected unless the config says otherwise.
pub const DEFAULT_MAX_DEFINITION_BYTES: usize = 50_000;

/// A CI/CD platform the engine can read and write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlatformKind {
    GithubActions,
    GitlabCi,
    Jenkins,
    AzurePipelines,
    Generic,
}

/// Accepted spellings, mapped to their platform.
const PLATFORM_NAMES: &[(&str, PlatformKind)] = &[
    ("github-actions", PlatformKind::GithubActions),
    ("github", PlatformKind::GithubActions),
    ("gitlab-ci", PlatformKind::GitlabCi),
    ("gitlab", PlatformKind::GitlabCi),
    ("jenkins", PlatformKind::Jenkins),
    ("azure-pipelines", PlatformKind::AzurePipelines),
    ("azure", PlatformKind::AzurePipelines),
    ("azure-devops", PlatformKind::AzurePipelines),
    ("generic", PlatformKind::Generic),
];

impl PlatformKind {
    pub const ALL: [PlatformKind; 5] = [
        PlatformKind::GithubActions,
        PlatformKind::GitlabCi,
        PlatformKind::Jenkins,
        PlatformKind::AzurePipelines,
        PlatformKind::Generic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformKind::GithubActions => "github-actions",
            PlatformKind::GitlabCi => "gitlab-ci",
            PlatformKind::Jenkins => "jenkins",
            PlatformKind::AzurePipelines => "azure-pipelines",
            PlatformKind::Generic => "generic",
        }
    }

    /// Conventional location of the definition file in a repository.
    pub fn file_path(&self) -> &'static str {
        match self {
            PlatformKind::GithubActions => ".github/workflows/ci.yml",
            PlatformKind::GitlabCi => ".gitlab-ci.yml",
            PlatformKind::Jenkins => "Jenkinsfile",
            PlatformKind::AzurePipelines => "azure-pipelines.yml",
            PlatformKind::Generic => "pipeline.yml",
        }
    }

    pub fn file_format(&self) -> &'static str {
        match self {
            PlatformKind::Jenkins => "groovy",
            _ => "yaml",
        }
    }

    pub fn schema(&self) -> &'static PlatformSchema {
        match self {
            PlatformKind::GithubActions => &GITHUB_SCHEMA,
            PlatformKind::GitlabCi => &GITLAB_SCHEMA,
            PlatformKind::Jenkins => &JENKINS_SCHEMA,
            PlatformKind::AzurePipelines => &AZURE_SCHEMA,
            PlatformKind::Generic => &GENERIC_SCHEMA,
        }
    }
}

impl fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlatformKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        let given = s.trim().to_lowercase();
        if let Some((_, kind)) = PLATFORM_NAMES.iter().find(|(name, _)| *name == given) {
            return Ok(*kind);
        }

        // Equal edit distances go to the longer shared prefix.
        let suggestion = PLATFORM_NAMES
            .iter()
            .map(|(name, kind)| {
                let dist = strsim::damerau_levenshtein(&given, name);
                (dist, shared_prefix_len(&given, name), *kind)
            })
            .filter(|(dist, _, _)| *dist <= 3)
            .min_by_key(|(dist, prefix, _)| (*dist, Reverse(*prefix)))
            .map(|(_, _, kind)| kind.as_str().to_string());

        Err(EngineError::UnknownPlatform {
            given: s.to_string(),
            suggestion,
        })
    }
}

fn shared_prefix_len(a: &str, b: &str) -> usize {
    a.chars().zip(b.chars()).take_while(|(x, y)| x == y).count()
}

/// How one platform's schema maps onto the common job model.
#[derive(Debug)]
pub struct PlatformSchema {
    pub platform: PlatformKind,
    /// Job key naming upstream jobs, if the platform has one.
    pub dependency_key: Option<&'static str>,
    /// Job keys mapped into the model. Anything else is kept as opaque metadata.
    pub job_keys: &'static [&'static str],
    /// Step keys mapped into the model.
    pub step_keys: &'static [&'static str],
    /// Whether jobs without explicit dependencies wait for the previous stage.
    pub stages_imply_order: bool,
}

impl PlatformSchema {
    pub fn is_job_key(&self, key: &str) -> bool {
        self.job_keys.contains(&key)
    }

    pub fn is_step_key(&self, key: &str) -> bool {
        self.step_keys.contains(&key)
    }
}

pub const GITHUB_SCHEMA: PlatformSchema = PlatformSchema {
    platform: PlatformKind::GithubActions,
    dependency_key: Some("needs"),
    job_keys: &["name", "runs-on", "needs", "if", "env", "steps", "timeout-minutes"],
    step_keys: &["name", "uses", "run", "with", "env", "if"],
    stages_imply_order: false,
};

pub const GITLAB_SCHEMA: PlatformSchema = PlatformSchema {
    platform: PlatformKind::GitlabCi,
    dependency_key: Some("needs"),
    job_keys: &[
        "stage", "image", "script", "before_script", "after_script", "needs", "variables", "cache",
        "artifacts", "dependencies", "timeout",
    ],
    step_keys: &[],
    stages_imply_order: true,
};

pub const JENKINS_SCHEMA: PlatformSchema = PlatformSchema {
    platform: PlatformKind::Jenkins,
    dependency_key: None,
    job_keys: &["agent", "environment", "steps", "when", "parallel"],
    step_keys: &["sh", "bat", "echo", "stash", "unstash"],
    stages_imply_order: true,
};

pub const AZURE_SCHEMA: PlatformSchema = PlatformSchema {
    platform: PlatformKind::AzurePipelines,
    dependency_key: Some("dependsOn"),
    job_keys: &[
        "job", "deployment", "displayName", "dependsOn", "pool", "steps", "variables",
        "condition", "timeoutInMinutes", "strategy",
    ],
    step_keys: &[
        "script", "bash", "pwsh", "powershell", "task", "inputs", "displayName", "env",
        "condition", "publish", "download", "artifact", "checkout", "template",
    ],
    stages_imply_order: true,
};

pub const GENERIC_SCHEMA: PlatformSchema = PlatformSchema {
    platform: PlatformKind::Generic,
    dependency_key: Some("needs"),
    job_keys: &[
        "name", "stage", "needs", "depends_on", "runner", "image", "steps", "env", "condition",
        "timeout_minutes", "cpu", "memory_gb", "artifacts",
    ],
    step_keys: &["name", "run", "uses", "with", "cache", "env", "condition"],
    stages_imply_order: true,
};

/// Guess the platform of a definition from its shape.
pub fn detect_platform(content: &str) -> PlatformKind {
    if jenkins::looks_like_jenkinsfile(content) {
        return PlatformKind::Jenkins;
    }

    let Ok(yaml) = serde_yaml::from_str::<Value>(content) else {
        return PlatformKind::Generic;
    };

    let has_on = yaml.get("on").is_some() || yaml.get(Value::Bool(true)).is_some();
    if yaml.get("jobs").is_some_and(Value::is_mapping) && has_on {
        return PlatformKind::GithubActions;
    }

    let stage_mappings = yaml
        .get("stages")
        .and_then(Value::as_sequence)
        .is_some_and(|s| !s.is_empty() && s.iter().all(Value::is_mapping));
    if stage_mappings
        || yaml.get("jobs").is_some_and(Value::is_sequence)
        || yaml.get("trigger").is_some()
        || yaml.get("pool").is_some()
        || yaml.get("steps").is_some_and(Value::is_sequence)
    {
        return PlatformKind::AzurePipelines;
    }

    let stage_names = yaml
        .get("stages")
        .and_then(Value::as_sequence)
        .is_some_and(|s| s.iter().all(Value::is_string));
    let has_script_job = yaml
        .as_mapping()
        .is_some_and(|m| m.values().any(|v| v.get("script").is_some()));
    if (stage_names && yaml.get("jobs").is_none()) || has_script_job {
        return PlatformKind::GitlabCi;
    }

    PlatformKind::Generic
}

/// Normalize a definition into a [`PipelineGraph`] using the default size limit.
pub fn normalize(content: &str, platform: Option<PlatformKind>) -> Result<PipelineGraph> {
    normalize_with_limit(content, platform, DEFAULT_MAX_DEFINITION_BYTES)
}

pub fn normalize_with_limit(
    content: &str,
    platform: Option<PlatformKind>,
    max_bytes: usize,
) -> Result<PipelineGraph> {
    if content.len() > max_bytes {
        return Err(EngineError::malformed(
            SourceLocation::root(),
            format!(
                "definition is {} bytes, larger than the {} byte limit",
                content.len(),
                max_bytes
            ),
        ));
    }

    let platform = platform.unwrap_or_else(|| detect_platform(content));
    tracing::debug!(%platform, bytes = content.len(), "normalizing pipeline definition");

    let graph = match platform {
        PlatformKind::GithubActions => github::GitHubActionsParser::parse(content),
        PlatformKind::GitlabCi => gitlab::GitLabCIParser::parse(content),
        PlatformKind::Jenkins => jenkins::JenkinsParser::parse(content),
        PlatformKind::AzurePipelines => azure::AzurePipelinesParser::parse(content),
        PlatformKind::Generic => generic::GenericParser::parse(content),
    }?;

    tracing::debug!(
        jobs = graph.job_count(),
        edges = graph.edge_count(),
        "pipeline normalized"
    );
    Ok(graph)
}

pub(crate) fn parse_yaml(content: &str) -> Result<Value> {
    serde_yaml::from_str(content)
        .map_err(|e| EngineError::malformed(SourceLocation::from_yaml(&e), e.to_string()))
}

pub(crate) fn expect_mapping<'a>(value: &'a Value, path: &str) -> Result<&'a Mapping> {
    value
        .as_mapping()
        .ok_or_else(|| EngineError::malformed(SourceLocation::at(path), "expected a mapping"))
}

/// Render a scalar as text. Sequences and mappings yield `None`.
pub(crate) fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// A single string or a sequence of strings.
pub(crate) fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Sequence(seq) => seq.iter().filter_map(scalar_string).collect(),
        other => scalar_string(other).into_iter().collect(),
    }
}

/// Read an environment mapping. GitLab's expanded form `{ value: x }` is accepted.
pub(crate) fn env_map(value: &Value) -> IndexMap<String, EnvValue> {
    let mut env = IndexMap::new();
    let Some(mapping) = value.as_mapping() else {
        return env;
    };
    for (k, v) in mapping {
        let Some(key) = scalar_string(k) else { continue };
        let raw = match v {
            Value::Mapping(m) => m.get("value").and_then(scalar_string),
            other => scalar_string(other),
        };
        if let Some(raw) = raw {
            env.insert(key, EnvValue::classify(&raw));
        }
    }
    env
}

/// Keys of `mapping` that `known` does not list, kept verbatim.
pub(crate) fn unknown_keys(mapping: &Mapping, known: impl Fn(&str) -> bool) -> Metadata {
    mapping
        .iter()
        .filter_map(|(k, v)| {
            let key = scalar_string(k)?;
            (!known(&key)).then(|| (key, v.clone()))
        })
        .collect()
}

/// Give every job without explicit dependencies a dependency on each job of
/// the nearest preceding non-empty stage. Jobs sharing a stage stay parallel.
pub(crate) fn apply_stage_order(jobs: &mut [Job], stages: &[String], explicit: &HashSet<String>) {
    let stage_members: Vec<Vec<String>> = stages
        .iter()
        .map(|stage| {
            jobs.iter()
                .filter(|j| j.stage.as_deref() == Some(stage.as_str()))
                .map(|j| j.id.clone())
                .collect()
        })
        .collect();

    for job in jobs.iter_mut() {
        if explicit.contains(&job.id) {
            continue;
        }
        let Some(pos) = job
            .stage
            .as_deref()
            .and_then(|s| stages.iter().position(|st| st == s))
        else {
            continue;
        };
        if let Some(previous) = stage_members[..pos].iter().rev().find(|m| !m.is_empty()) {
            for dep in previous {
                job.needs_job(dep);
            }
        }
    }
}

/// Derive the fields every parser fills the same way: artifact flow seen in
/// steps and the job category.
pub(crate) fn finalize_job(job: &mut Job) {
    let mut produces = false;
    let mut consumes = false;
    for step in &job.steps {
        let signature = step.signature().to_lowercase();
        if signature.starts_with("actions/upload-artifact")
            || signature.starts_with("publishpipelineartifact")
            || signature.starts_with("publishbuildartifacts")
        {
            produces = true;
        }
        if signature.starts_with("actions/download-artifact")
            || signature.starts_with("downloadpipelineartifact")
            || signature.starts_with("downloadbuildartifacts")
        {
            consumes = true;
        }
    }
    if produces {
        job.artifacts.produces = true;
    }
    if consumes && job.artifacts.consumes == Consumes::Nothing {
        job.artifacts.consumes = Consumes::Any;
    }
    job.category = classify::classify_job(job);
}

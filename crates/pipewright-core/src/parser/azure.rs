use crate::error::{EngineError, Result, SourceLocation};
use crate::parser::dag::*;
use crate::parser::{
    env_map, expect_mapping, finalize_job, parse_yaml, scalar_string, string_list, unknown_keys,
    PlatformKind,
};
use indexmap::IndexMap;
use serde_yaml::{Mapping, Value};
use std::collections::HashMap;

/// Parser for Azure Pipelines YAML (`azure-pipelines.yml`).
///
/// Supported constructs:
/// - stages -> jobs -> steps, top-level jobs, or top-level steps
/// - stage/job `dependsOn` (a job may name jobs or whole stages)
/// - deployment jobs (`strategy.runOnce.deploy.steps`)
/// - template references, kept as opaque jobs
pub struct AzurePipelinesParser;

/// A stage before dependency resolution.
struct RawStage {
    name: String,
    depends_on: Option<Vec<String>>,
    jobs: Vec<RawJob>,
}

/// A job before dependency resolution.
struct RawJob {
    raw_name: String,
    depends_on: Option<Vec<String>>,
    job: Job,
}

impl AzurePipelinesParser {
    /// Parse Azure Pipelines YAML content into a [`PipelineGraph`].
    pub fn parse(content: &str) -> Result<PipelineGraph> {
        let yaml = parse_yaml(content)?;
        let root = expect_mapping(&yaml, "")?;

        let name = yaml
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("Azure Pipeline")
            .to_string();
        let mut builder = PipelineGraphBuilder::new(name, PlatformKind::AzurePipelines);
        builder.set_env(parse_variables(yaml.get("variables")));
        builder.set_metadata(unknown_keys(root, |k| {
            matches!(k, "name" | "variables" | "stages" | "jobs" | "steps" | "pool")
        }));
        let default_pool = parse_pool_name(yaml.get("pool"));

        let mut stages = Vec::new();
        if let Some(stage_values) = yaml.get("stages") {
            let seq = stage_values.as_sequence().ok_or_else(|| {
                EngineError::malformed(SourceLocation::at("stages"), "stages must be a list")
            })?;
            for (i, stage) in seq.iter().enumerate() {
                stages.push(Self::parse_stage(stage, i, &default_pool)?);
            }
        } else if let Some(job_values) = yaml.get("jobs") {
            let seq = job_values.as_sequence().ok_or_else(|| {
                EngineError::malformed(SourceLocation::at("jobs"), "jobs must be a list")
            })?;
            let mut jobs = Vec::new();
            for (i, job) in seq.iter().enumerate() {
                jobs.push(Self::parse_job(job, i, None, &default_pool, &format!("jobs[{i}]"))?);
            }
            stages.push(RawStage {
                name: String::new(),
                depends_on: Some(Vec::new()),
                jobs,
            });
        } else if yaml.get("steps").is_some() {
            // A steps-only pipeline is one implicit job.
            let mut job = Job::new("job", "Job");
            job.runner = default_pool.clone();
            job.steps = extract_steps(&yaml, "steps")?;
            finalize_job(&mut job);
            stages.push(RawStage {
                name: String::new(),
                depends_on: Some(Vec::new()),
                jobs: vec![RawJob {
                    raw_name: "job".to_string(),
                    depends_on: None,
                    job,
                }],
            });
        } else {
            return Err(EngineError::malformed(
                SourceLocation::root(),
                "expected 'stages', 'jobs' or 'steps'",
            ));
        }

        for job in Self::resolve(stages)? {
            builder.add_job(job);
        }
        builder.build()
    }

    fn parse_stage(stage: &Value, index: usize, default_pool: &Option<String>) -> Result<RawStage> {
        let path = format!("stages[{index}]");
        let map = expect_mapping(stage, &path)?;

        if let Some(template) = stage.get("template").and_then(|v| v.as_str()) {
            let name = format!("template-{}", sanitize_id(template_stem(template)));
            let mut job = Job::new(name.clone(), template);
            job.stage = Some(name.clone());
            job.metadata = unknown_keys(map, |k| k == "dependsOn");
            return Ok(RawStage {
                depends_on: stage.get("dependsOn").map(string_list),
                jobs: vec![RawJob {
                    raw_name: name.clone(),
                    depends_on: None,
                    job,
                }],
                name,
            });
        }

        let name = stage
            .get("stage")
            .and_then(scalar_string)
            .unwrap_or_else(|| format!("stage{}", index + 1));
        let pool = parse_pool_name(stage.get("pool")).or_else(|| default_pool.clone());

        let mut jobs = Vec::new();
        if let Some(values) = stage.get("jobs").and_then(|v| v.as_sequence()) {
            for (i, job) in values.iter().enumerate() {
                let job_path = format!("{path}.jobs[{i}]");
                jobs.push(Self::parse_job(job, i, Some(&name), &pool, &job_path)?);
            }
        }

        Ok(RawStage {
            depends_on: stage.get("dependsOn").map(string_list),
            name,
            jobs,
        })
    }

    fn parse_job(
        value: &Value,
        index: usize,
        stage: Option<&str>,
        default_pool: &Option<String>,
        path: &str,
    ) -> Result<RawJob> {
        let map = expect_mapping(value, path)?;
        let schema = PlatformKind::AzurePipelines.schema();

        if let Some(template) = value.get("template").and_then(|v| v.as_str()) {
            let raw_name = format!("template-{}", sanitize_id(template_stem(template)));
            let mut job = Job::new(raw_name.clone(), template);
            job.stage = stage.map(String::from);
            job.metadata = unknown_keys(map, |k| k == "dependsOn");
            return Ok(RawJob {
                raw_name,
                depends_on: value.get("dependsOn").map(string_list),
                job,
            });
        }

        let raw_name = value
            .get("job")
            .or_else(|| value.get("deployment"))
            .and_then(scalar_string)
            .unwrap_or_else(|| format!("job{}", index + 1));
        let display = value
            .get("displayName")
            .and_then(scalar_string)
            .unwrap_or_else(|| raw_name.clone());

        let mut job = Job::new(raw_name.clone(), display);
        job.stage = stage.map(String::from);
        // Deployment jobs keep their `environment`, which marks them on re-render.
        job.metadata = unknown_keys(map, |k| schema.is_job_key(k));

        job.runner = parse_pool_name(value.get("pool")).or_else(|| default_pool.clone());
        if let Some(Value::Mapping(pool)) = value.get("pool") {
            if pool.keys().any(|k| k.as_str() != Some("vmImage")) {
                job.metadata.insert("pool".to_string(), Value::Mapping(pool.clone()));
            }
        }
        job.condition = value.get("condition").and_then(scalar_string);
        job.env = parse_variables(value.get("variables"));
        job.resources.timeout_minutes = value
            .get("timeoutInMinutes")
            .and_then(|v| v.as_u64())
            .map(|t| t as u32);

        let deploy_steps = value
            .get("strategy")
            .and_then(|v| v.get("runOnce"))
            .and_then(|v| v.get("deploy"));
        if value.get("steps").is_some() {
            job.steps = extract_steps(value, &format!("{path}.steps"))?;
        } else if let Some(deploy) = deploy_steps {
            job.steps = extract_steps(deploy, &format!("{path}.strategy.runOnce.deploy.steps"))?;
        }

        finalize_job(&mut job);
        Ok(RawJob {
            raw_name,
            depends_on: value.get("dependsOn").map(string_list),
            job,
        })
    }

    /// Assign unique ids and turn stage/job `dependsOn` into `needs`.
    fn resolve(stages: Vec<RawStage>) -> Result<Vec<Job>> {
        let mut name_counts: HashMap<String, usize> = HashMap::new();
        for stage in &stages {
            for job in &stage.jobs {
                *name_counts.entry(job.raw_name.clone()).or_default() += 1;
            }
        }

        // Ids stay as written unless two stages reuse a job name.
        let mut ids: Vec<Vec<String>> = Vec::new();
        for stage in &stages {
            ids.push(
                stage
                    .jobs
                    .iter()
                    .map(|j| {
                        if name_counts.get(&j.raw_name).copied().unwrap_or(0) > 1 {
                            format!("{}-{}", sanitize_id(&stage.name), j.raw_name)
                        } else {
                            j.raw_name.clone()
                        }
                    })
                    .collect(),
            );
        }

        let stage_index: HashMap<String, usize> = stages
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.name.is_empty())
            .map(|(i, s)| (s.name.clone(), i))
            .collect();

        let mut stage_deps: Vec<Vec<usize>> = Vec::new();
        for (i, stage) in stages.iter().enumerate() {
            let deps = match &stage.depends_on {
                None if i > 0 => vec![i - 1],
                None => Vec::new(),
                Some(names) => names
                    .iter()
                    .map(|n| {
                        stage_index.get(n).copied().ok_or_else(|| {
                            EngineError::malformed(
                                SourceLocation::at(format!("stages.{}.dependsOn", stage.name)),
                                format!("stage '{}' depends on unknown stage '{}'", stage.name, n),
                            )
                        })
                    })
                    .collect::<Result<_>>()?,
            };
            stage_deps.push(deps);
        }

        let mut jobs = Vec::new();
        for (si, stage) in stages.into_iter().enumerate() {
            let stage_ids = &ids[si];
            for (ji, raw) in stage.jobs.into_iter().enumerate() {
                let mut job = raw.job;
                job.id = stage_ids[ji].clone();

                match raw.depends_on {
                    Some(names) => {
                        for name in names {
                            let targets = Self::lookup(&name, si, &ids, &stage_index, &job.id)?;
                            for target in targets {
                                job.needs_job(&target);
                            }
                        }
                    }
                    None => {
                        for dep_stage in &stage_deps[si] {
                            for dep in &ids[*dep_stage] {
                                job.needs_job(dep);
                            }
                        }
                    }
                }
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    /// A job `dependsOn` entry: a job in the same stage, any job id, or a whole stage.
    fn lookup(
        name: &str,
        stage: usize,
        ids: &[Vec<String>],
        stage_index: &HashMap<String, usize>,
        job_id: &str,
    ) -> Result<Vec<String>> {
        let prefixed = |id: &String| id == name || id.ends_with(&format!("-{name}"));
        if let Some(id) = ids[stage].iter().find(|id| prefixed(id)) {
            return Ok(vec![id.clone()]);
        }
        if let Some(id) = ids.iter().flatten().find(|id| *id == name) {
            return Ok(vec![id.clone()]);
        }
        if let Some(&si) = stage_index.get(name) {
            return Ok(ids[si].clone());
        }
        Err(EngineError::malformed(
            SourceLocation::at(format!("jobs.{job_id}.dependsOn")),
            format!("'{job_id}' depends on unknown job or stage '{name}'"),
        ))
    }
}

fn parse_variables(vars: Option<&Value>) -> IndexMap<String, EnvValue> {
    match vars {
        Some(Value::Sequence(seq)) => seq
            .iter()
            .filter_map(|item| {
                let name = item.get("name").and_then(scalar_string)?;
                let value = item.get("value").and_then(scalar_string).unwrap_or_default();
                Some((name, EnvValue::classify(&value)))
            })
            .collect(),
        Some(other) => env_map(other),
        None => IndexMap::new(),
    }
}

fn parse_pool_name(pool: Option<&Value>) -> Option<String> {
    let pool = pool?;
    if let Some(name) = pool.as_str() {
        return Some(name.to_string());
    }
    pool.get("vmImage")
        .or_else(|| pool.get("name"))
        .and_then(scalar_string)
}

fn extract_steps(container: &Value, path: &str) -> Result<Vec<Step>> {
    let Some(steps) = container.get("steps") else {
        return Ok(Vec::new());
    };
    let seq = steps
        .as_sequence()
        .ok_or_else(|| EngineError::malformed(SourceLocation::at(path), "steps must be a list"))?;
    seq.iter()
        .enumerate()
        .map(|(i, step)| parse_step(step, &format!("{path}[{i}]")))
        .collect()
}

fn parse_step(step: &Value, path: &str) -> Result<Step> {
    let map = expect_mapping(step, path)?;
    let schema = PlatformKind::AzurePipelines.schema();
    let display = step.get("displayName").and_then(scalar_string);
    let inputs = step.get("inputs").and_then(|v| v.as_mapping());

    let script = ["script", "bash", "pwsh", "powershell"]
        .iter()
        .find_map(|k| step.get(*k).and_then(scalar_string));

    let mut parsed = if let Some(script) = script {
        let label = display
            .clone()
            .unwrap_or_else(|| script.lines().next().unwrap_or("script").trim().to_string());
        Step::run(label, script)
    } else if let Some(task) = step.get("task").and_then(scalar_string) {
        let label = display.clone().unwrap_or_else(|| task.clone());
        if task.to_lowercase().starts_with("cache@") {
            let key = inputs
                .and_then(|i| i.get("key"))
                .and_then(scalar_string)
                .unwrap_or_default();
            let paths = inputs
                .and_then(|i| i.get("path"))
                .and_then(scalar_string)
                .into_iter()
                .collect();
            let mut cache = Step::cache(label, key, paths);
            cache.metadata.insert("task".to_string(), Value::String(task));
            if let Some(inputs) = inputs {
                cache.metadata.insert("inputs".to_string(), Value::Mapping(inputs.clone()));
            }
            cache
        } else {
            let mut uses = Step::uses(label, task);
            copy_inputs(&mut uses, inputs);
            uses
        }
    } else if let Some(target) = step.get("publish").and_then(scalar_string) {
        let label = display.clone().unwrap_or_else(|| "Publish".to_string());
        let mut uses =
            Step::uses(label, "PublishPipelineArtifact@1").input("targetPath", target);
        if let Some(artifact) = step.get("artifact").and_then(scalar_string) {
            uses = uses.input("artifact", artifact);
        }
        uses
    } else if let Some(source) = step.get("download").and_then(scalar_string) {
        let label = display.clone().unwrap_or_else(|| "Download".to_string());
        let mut uses =
            Step::uses(label, "DownloadPipelineArtifact@2").input("buildType", source);
        if let Some(artifact) = step.get("artifact").and_then(scalar_string) {
            uses = uses.input("artifact", artifact);
        }
        uses
    } else if let Some(repo) = step.get("checkout").and_then(scalar_string) {
        let label = display.clone().unwrap_or_else(|| "Checkout".to_string());
        Step::uses(label, "checkout").input("repository", repo)
    } else if let Some(template) = step.get("template").and_then(scalar_string) {
        let label = display.clone().unwrap_or_else(|| template.clone());
        Step::uses(label, format!("template:{template}"))
    } else {
        return Err(EngineError::malformed(
            SourceLocation::at(path),
            "step has no script, task, publish, download, checkout or template",
        ));
    };

    parsed.metadata.extend(unknown_keys(map, |k| schema.is_step_key(k)));
    if let Some(env) = step.get("env") {
        parsed.env = env_map(env);
    }
    parsed.condition = step.get("condition").and_then(scalar_string);
    Ok(parsed)
}

fn copy_inputs(step: &mut Step, inputs: Option<&Mapping>) {
    if let (StepAction::Uses { inputs: target, .. }, Some(inputs)) = (&mut step.action, inputs) {
        for (k, v) in inputs {
            if let Some(k) = scalar_string(k) {
                target.insert(k, v.clone());
            }
        }
    }
}

fn template_stem(path: &str) -> &str {
    let file = path.rsplit('/').next().unwrap_or(path);
    file.split('.').next().unwrap_or(file)
}

fn sanitize_id(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut prev_dash = false;

    for ch in value.chars() {
        let mapped = if ch.is_ascii_alphanumeric() || ch == '_' {
            ch.to_ascii_lowercase()
        } else {
            '-'
        };
        if mapped == '-' {
            if !prev_dash {
                out.push(mapped);
                prev_dash = true;
            }
        } else {
            out.push(mapped);
            prev_dash = false;
        }
    }

    out.trim_matches('-').to_string()
}

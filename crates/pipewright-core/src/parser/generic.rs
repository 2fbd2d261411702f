use crate::error::{EngineError, Result, SourceLocation};
use crate::parser::dag::*;
use crate::parser::{
    apply_stage_order, env_map, expect_mapping, finalize_job, parse_yaml, scalar_string,
    string_list, unknown_keys, PlatformKind,
};
use serde_yaml::Value;
use std::collections::HashSet;

/// Parser for the platform-neutral pipeline format.
///
/// ```yaml
/// name: app
/// stages: [build, test]
/// jobs:
///   build:
///     stage: build
///     runner: ubuntu-22.04
///     steps:
///       - cache: { key: "npm-{lockfile}", paths: [node_modules] }
///       - run: npm ci
///   test:
///     needs: [build]
///     steps:
///       - run: npm test
/// ```
///
/// `jobs` may also be a list of mappings carrying an `id`. When `stages` is
/// given, jobs without `needs` wait for the previous non-empty stage.
pub struct GenericParser;

impl GenericParser {
    pub fn parse(content: &str) -> Result<PipelineGraph> {
        let yaml = parse_yaml(content)?;
        let root = expect_mapping(&yaml, "")?;

        let name = yaml
            .get("name")
            .and_then(scalar_string)
            .unwrap_or_else(|| "pipeline".to_string());
        let mut builder = PipelineGraphBuilder::new(name, PlatformKind::Generic);
        if let Some(env) = yaml.get("env") {
            builder.set_env(env_map(env));
        }
        builder.set_metadata(unknown_keys(root, |k| {
            matches!(k, "name" | "env" | "stages" | "jobs")
        }));

        let entries: Vec<(String, &Value)> = match yaml.get("jobs") {
            Some(Value::Mapping(jobs)) => jobs
                .iter()
                .filter_map(|(k, v)| scalar_string(k).map(|k| (k, v)))
                .collect(),
            Some(Value::Sequence(jobs)) => jobs
                .iter()
                .enumerate()
                .map(|(i, v)| {
                    v.get("id")
                        .and_then(scalar_string)
                        .map(|id| (id, v))
                        .ok_or_else(|| {
                            EngineError::malformed(
                                SourceLocation::at(format!("jobs[{i}]")),
                                "job entry needs an 'id'",
                            )
                        })
                })
                .collect::<Result<_>>()?,
            _ => {
                return Err(EngineError::malformed(
                    SourceLocation::at("jobs"),
                    "expected a 'jobs' mapping or list",
                ))
            }
        };

        let mut jobs = Vec::new();
        let mut explicit = HashSet::new();
        for (id, value) in entries {
            if value.get("needs").is_some() || value.get("depends_on").is_some() {
                explicit.insert(id.clone());
            }
            jobs.push(Self::parse_job(&id, value)?);
        }

        if let Some(stages) = yaml.get("stages") {
            apply_stage_order(&mut jobs, &string_list(stages), &explicit);
        }
        for job in jobs {
            builder.add_job(job);
        }
        builder.build()
    }

    fn parse_job(id: &str, value: &Value) -> Result<Job> {
        let path = format!("jobs.{id}");
        let map = expect_mapping(value, &path)?;
        let schema = PlatformKind::Generic.schema();

        let name = value.get("name").and_then(scalar_string).unwrap_or_else(|| id.to_string());
        let mut job = Job::new(id, name);
        job.metadata = unknown_keys(map, |k| schema.is_job_key(k) || k == "id");

        job.stage = value.get("stage").and_then(scalar_string);
        job.runner = value
            .get("runner")
            .or_else(|| value.get("image"))
            .and_then(scalar_string);
        job.condition = value.get("condition").and_then(scalar_string);
        if let Some(env) = value.get("env") {
            job.env = env_map(env);
        }
        for key in ["needs", "depends_on"] {
            if let Some(needs) = value.get(key) {
                for dep in string_list(needs) {
                    job.needs_job(&dep);
                }
            }
        }

        let as_u32 = |key: &str| value.get(key).and_then(|v| v.as_u64()).map(|v| v as u32);
        job.resources = ResourceHints {
            cpu: as_u32("cpu"),
            memory_gb: as_u32("memory_gb"),
            timeout_minutes: as_u32("timeout_minutes"),
        };

        if let Some(artifacts) = value.get("artifacts") {
            job.artifacts.produces = artifacts
                .get("produces")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            job.artifacts.consumes = match artifacts.get("consumes") {
                Some(Value::String(s)) if s == "all" => Consumes::Any,
                Some(other) => Consumes::From(string_list(other)),
                None => Consumes::Nothing,
            };
        }

        if let Some(steps) = value.get("steps") {
            let seq = steps.as_sequence().ok_or_else(|| {
                let location = SourceLocation::at(format!("{path}.steps"));
                EngineError::malformed(location, "steps must be a list")
            })?;
            for (i, step) in seq.iter().enumerate() {
                job.steps.push(Self::parse_step(step, &format!("{path}.steps[{i}]"))?);
            }
        }

        finalize_job(&mut job);
        Ok(job)
    }

    fn parse_step(value: &Value, path: &str) -> Result<Step> {
        // A bare string is shorthand for `run`.
        if let Some(command) = value.as_str() {
            return Ok(Step::run(command.lines().next().unwrap_or(command).trim(), command));
        }
        let map = expect_mapping(value, path)?;
        let schema = PlatformKind::Generic.schema();
        let name = value.get("name").and_then(scalar_string);

        let mut step = if let Some(command) = value.get("run").and_then(scalar_string) {
            let first_line = || command.lines().next().unwrap_or("run").trim().to_string();
            Step::run(name.unwrap_or_else(first_line), command)
        } else if let Some(reference) = value.get("uses").and_then(scalar_string) {
            let mut step = Step::uses(name.unwrap_or_else(|| reference.clone()), reference);
            if let (StepAction::Uses { inputs, .. }, Some(Value::Mapping(with))) =
                (&mut step.action, value.get("with"))
            {
                for (k, v) in with {
                    if let Some(k) = scalar_string(k) {
                        inputs.insert(k, v.clone());
                    }
                }
            }
            step
        } else if let Some(cache) = value.get("cache") {
            let key = cache.get("key").and_then(scalar_string).unwrap_or_default();
            let paths = cache.get("paths").map(string_list).unwrap_or_default();
            Step::cache(name.unwrap_or_else(|| "cache".to_string()), key, paths)
        } else {
            return Err(EngineError::malformed(
                SourceLocation::at(path),
                "step needs one of 'run', 'uses' or 'cache'",
            ));
        };

        step.metadata = unknown_keys(map, |k| schema.is_step_key(k));
        if let Some(env) = value.get("env") {
            step.env = env_map(env);
        }
        step.condition = value.get("condition").and_then(scalar_string);
        Ok(step)
    }
}

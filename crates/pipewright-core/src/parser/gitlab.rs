use crate::error::{EngineError, Result, SourceLocation};
use crate::parser::dag::*;
use crate::parser::{
    apply_stage_order, env_map, expect_mapping, finalize_job, parse_yaml, scalar_string,
    string_list, unknown_keys, PlatformKind,
};
use serde_yaml::{Mapping, Value};
use std::collections::HashSet;

/// Parser for GitLab CI `.gitlab-ci.yml` files.
pub struct GitLabCIParser;

/// Reserved top-level keywords in GitLab CI that are NOT job definitions.
const RESERVED_KEYWORDS: &[&str] = &[
    "image", "services", "stages", "before_script", "after_script", "variables", "cache",
    "default", "include", "workflow", "spec",
];

const DEFAULT_STAGES: &[&str] = &[".pre", "build", "test", "deploy", ".post"];

impl GitLabCIParser {
    /// Parse GitLab CI YAML content into a [`PipelineGraph`].
    pub fn parse(content: &str) -> Result<PipelineGraph> {
        let yaml = parse_yaml(content)?;
        let mapping = expect_mapping(&yaml, "")?;

        let mut builder = PipelineGraphBuilder::new("gitlab-ci", PlatformKind::GitlabCi);

        let stages = Self::parse_stages(&yaml)?;
        if let Some(vars) = yaml.get("variables") {
            builder.set_env(env_map(vars));
        }

        let default = yaml.get("default");
        let default_image = default
            .and_then(|d| d.get("image"))
            .or_else(|| yaml.get("image"))
            .and_then(parse_image);
        let global_cache = default
            .and_then(|d| d.get("cache"))
            .or_else(|| yaml.get("cache"));

        // Hidden jobs, includes, workflow rules and defaults are carried verbatim.
        builder.set_metadata(unknown_keys(mapping, |k| {
            k == "stages" || k == "variables" || is_job_entry(k, mapping)
        }));

        let mut jobs = Vec::new();
        let mut explicit = HashSet::new();
        let mut optional_needs: Vec<(String, String)> = Vec::new();

        for (key, value) in mapping {
            let Some(key_str) = key.as_str() else { continue };
            if !is_job_entry(key_str, mapping) {
                continue;
            }
            let config = Self::resolve_extends(key_str, value, mapping)?;
            let (job, optional) =
                Self::parse_job(key_str, &config, &stages, &default_image, global_cache)?;
            if config.contains_key("needs") {
                explicit.insert(job.id.clone());
            }
            optional_needs.extend(optional.into_iter().map(|dep| (job.id.clone(), dep)));
            jobs.push(job);
        }

        // `optional: true` needs on jobs that do not exist are dropped, as GitLab does.
        let ids: HashSet<String> = jobs.iter().map(|j| j.id.clone()).collect();
        for (job_id, dep) in optional_needs {
            if ids.contains(&dep) {
                continue;
            }
            if let Some(job) = jobs.iter_mut().find(|j| j.id == job_id) {
                job.needs.retain(|n| n != &dep);
                if let Consumes::From(sources) = &mut job.artifacts.consumes {
                    sources.retain(|s| s != &dep);
                }
            }
        }

        apply_stage_order(&mut jobs, &stages, &explicit);
        for job in jobs {
            builder.add_job(job);
        }
        builder.build()
    }

    fn parse_stages(yaml: &Value) -> Result<Vec<String>> {
        match yaml.get("stages") {
            Some(Value::Sequence(seq)) => {
                let mut stages = vec![".pre".to_string()];
                stages.extend(seq.iter().filter_map(scalar_string));
                stages.push(".post".to_string());
                Ok(stages)
            }
            Some(_) => Err(EngineError::malformed(
                SourceLocation::at("stages"),
                "stages must be a list of stage names",
            )),
            None => Ok(DEFAULT_STAGES.iter().map(|s| s.to_string()).collect()),
        }
    }

    /// Merge `extends` templates under the job's own keys.
    fn resolve_extends(job_id: &str, value: &Value, root: &Mapping) -> Result<Mapping> {
        let own = expect_mapping(value, job_id)?;
        let Some(extends) = own.get("extends") else {
            return Ok(own.clone());
        };

        let mut merged = Mapping::new();
        for parent in string_list(extends) {
            let template = root.get(parent.as_str()).and_then(|v| v.as_mapping()).ok_or_else(|| {
                EngineError::malformed(
                    SourceLocation::at(format!("{job_id}.extends")),
                    format!("'{job_id}' extends unknown template '{parent}'"),
                )
            })?;
            for (k, v) in template {
                merged.insert(k.clone(), v.clone());
            }
        }
        for (k, v) in own {
            merged.insert(k.clone(), v.clone());
        }
        Ok(merged)
    }

    fn parse_job(
        job_id: &str,
        config: &Mapping,
        stages: &[String],
        default_image: &Option<String>,
        global_cache: Option<&Value>,
    ) -> Result<(Job, Vec<String>)> {
        let schema = PlatformKind::GitlabCi.schema();
        let mut job = Job::new(job_id, job_id);
        job.metadata = unknown_keys(config, |k| schema.is_job_key(k));

        let stage = config
            .get("stage")
            .and_then(scalar_string)
            .unwrap_or_else(|| "test".to_string());
        if !stages.contains(&stage) {
            return Err(EngineError::malformed(
                SourceLocation::at(format!("{job_id}.stage")),
                format!("job '{job_id}' uses undeclared stage '{stage}'"),
            ));
        }
        job.stage = Some(stage);

        job.runner = config
            .get("image")
            .and_then(parse_image)
            .or_else(|| default_image.clone());

        if let Some(vars) = config.get("variables") {
            job.env = env_map(vars);
        }

        let mut optional = Vec::new();
        let mut artifact_sources: Option<Vec<String>> = None;
        if let Some(needs) = config.get("needs") {
            let seq = needs.as_sequence().ok_or_else(|| {
                EngineError::malformed(
                    SourceLocation::at(format!("{job_id}.needs")),
                    "needs must be a list",
                )
            })?;
            let mut sources = Vec::new();
            for entry in seq {
                match entry {
                    Value::String(s) => {
                        job.needs_job(s);
                        sources.push(s.clone());
                    }
                    Value::Mapping(m) => {
                        let Some(dep) = m.get("job").and_then(scalar_string) else {
                            continue;
                        };
                        if m.get("optional").and_then(|v| v.as_bool()) == Some(true) {
                            optional.push(dep.clone());
                        }
                        if m.get("artifacts").and_then(|v| v.as_bool()) != Some(false) {
                            sources.push(dep.clone());
                        }
                        job.needs_job(&dep);
                    }
                    _ => {}
                }
            }
            artifact_sources = Some(sources);
        }

        // Script steps
        let mut steps = Vec::new();
        if let Some(cache) = config.get("cache").or(global_cache) {
            if let Some(step) = parse_cache(cache) {
                steps.push(step);
            }
        }
        for section in ["before_script", "script", "after_script"] {
            if let Some(lines) = config.get(section) {
                for (i, cmd) in string_list(lines).into_iter().enumerate() {
                    steps.push(Step::run(format!("{section}[{i}]"), cmd));
                }
            }
        }
        job.steps = steps;

        // Artifacts
        if let Some(artifacts) = config.get("artifacts") {
            job.artifacts.produces = artifacts.get("paths").is_some();
            // Paths, expiry and reports are re-rendered verbatim.
            job.metadata.insert("artifacts".to_string(), artifacts.clone());
        }
        job.artifacts.consumes = match config.get("dependencies") {
            Some(deps) => {
                let deps = string_list(deps);
                if deps.is_empty() {
                    Consumes::Nothing
                } else {
                    Consumes::From(deps)
                }
            }
            None => match artifact_sources {
                Some(sources) => Consumes::From(sources),
                // Without `needs` or `dependencies`, every earlier artifact is downloaded.
                None => Consumes::Any,
            },
        };

        if let Some(timeout) = config.get("timeout").and_then(scalar_string) {
            job.resources.timeout_minutes = parse_timeout(&timeout);
        }

        finalize_job(&mut job);
        Ok((job, optional))
    }
}

fn is_job_entry(key: &str, root: &Mapping) -> bool {
    !RESERVED_KEYWORDS.contains(&key)
        && !key.starts_with('.')
        && root.get(key).is_some_and(|v| v.is_mapping())
}

fn parse_image(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Mapping(m) => m.get("name").and_then(scalar_string),
        _ => None,
    }
}

/// A `cache:` entry as a cache restore step. `key: { files: [...] }` becomes
/// `files:a,b` so the lockfile link stays visible.
fn parse_cache(cache: &Value) -> Option<Step> {
    let cache = match cache {
        Value::Sequence(seq) => seq.first()?,
        other => other,
    };
    let key = match cache.get("key") {
        Some(Value::Mapping(m)) => match m.get("files") {
            Some(files) => format!("files:{}", string_list(files).join(",")),
            None => m.get("prefix").and_then(scalar_string).unwrap_or_default(),
        },
        Some(other) => scalar_string(other).unwrap_or_default(),
        None => "default".to_string(),
    };
    let paths = cache.get("paths").map(string_list).unwrap_or_default();
    Some(Step::cache("cache", key, paths))
}

/// GitLab timeouts are human strings: `1h 30m`, `45 minutes`, `2 hours`.
fn parse_timeout(raw: &str) -> Option<u32> {
    let mut minutes = 0u32;
    let mut number = String::new();
    let mut seen = false;
    let lower = raw.to_lowercase();
    let mut chars = lower.chars().peekable();
    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            number.push(c);
            continue;
        }
        if c.is_whitespace() && chars.peek().is_some_and(|n| n.is_ascii_digit()) {
            continue;
        }
        if !number.is_empty() && c.is_alphabetic() {
            let value: u32 = number.parse().ok()?;
            number.clear();
            seen = true;
            minutes = minutes.saturating_add(match c {
                'h' => value.saturating_mul(60),
                'd' => value.saturating_mul(60 * 24),
                's' => value.div_ceil(60),
                _ => value,
            });
        }
    }
    if !number.is_empty() {
        minutes = minutes.saturating_add(number.parse::<u32>().ok()?);
        seen = true;
    }
    seen.then_some(minutes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_gitlab_ci() {
        let yaml = r#"
stages:
  - build
  - test
  - deploy

build:
  stage: build
  script:
    - npm ci
    - npm run build

test:
  stage: test
  script:
    - npm test

lint:
  stage: test
  script:
    - npm run lint

deploy:
  stage: deploy
  script:
    - ./deploy.sh
"#;
        let dag = GitLabCIParser::parse(yaml).unwrap();
        assert_eq!(dag.job_count(), 4);
        assert_eq!(dag.get_job("test").unwrap().needs, vec!["build"]);
        assert_eq!(dag.get_job("lint").unwrap().needs, vec!["build"]);
        assert_eq!(dag.get_job("deploy").unwrap().needs, vec!["test", "lint"]);
        assert!(dag.get_job("build").unwrap().needs.is_empty());
    }

    #[test]
    fn test_explicit_needs_override_stage_order() {
        let yaml = r#"
stages: [build, test, deploy]
build:
  stage: build
  script: make
unit:
  stage: test
  needs: []
  script: make test
deploy:
  stage: deploy
  needs:
    - job: build
      artifacts: true
    - job: flaky-check
      optional: true
  script: make deploy
"#;
        let dag = GitLabCIParser::parse(yaml).unwrap();
        assert!(dag.get_job("unit").unwrap().needs.is_empty());
        assert_eq!(dag.get_job("deploy").unwrap().needs, vec!["build"]);
        assert_eq!(
            dag.get_job("deploy").unwrap().artifacts.consumes,
            Consumes::From(vec!["build".to_string()])
        );
    }

    #[test]
    fn test_hidden_jobs_and_extends() {
        let yaml = r#"
.node:
  image: node:20
  before_script:
    - npm ci
test:
  extends: .node
  script:
    - npm test
"#;
        let dag = GitLabCIParser::parse(yaml).unwrap();
        assert_eq!(dag.job_count(), 1);
        let test = dag.get_job("test").unwrap();
        assert_eq!(test.runner.as_deref(), Some("node:20"));
        assert_eq!(test.steps[0].command(), Some("npm ci"));
        assert!(dag.metadata().contains_key(".node"));
        assert!(test.metadata.contains_key("extends"));
    }

    #[test]
    fn test_cache_and_artifacts() {
        let yaml = r#"
variables:
  DB_PASSWORD: hunter2hunter2
  TOKEN: $CI_JOB_TOKEN
build:
  stage: build
  cache:
    key:
      files:
        - package-lock.json
    paths:
      - node_modules/
  artifacts:
    paths:
      - dist/
  script:
    - npm ci
test:
  stage: test
  dependencies: [build]
  script:
    - npm test
"#;
        let dag = GitLabCIParser::parse(yaml).unwrap();
        let build = dag.get_job("build").unwrap();
        assert!(build.steps[0].is_lockfile_cache());
        assert!(build.artifacts.produces);
        assert_eq!(dag.edges()[0].2, DagEdge::Artifact);
        assert!(dag.env()["DB_PASSWORD"].is_literal());
        assert!(!dag.env()["TOKEN"].is_literal());
    }

    #[test]
    fn test_undeclared_stage_is_malformed() {
        let yaml = "stages: [build]\ncompile:\n  stage: compile\n  script: make\n";
        match GitLabCIParser::parse(yaml) {
            Err(EngineError::MalformedDefinition { location, .. }) => {
                assert_eq!(location.path, "compile.stage");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_timeout() {
        assert_eq!(parse_timeout("1h 30m"), Some(90));
        assert_eq!(parse_timeout("45 minutes"), Some(45));
        assert_eq!(parse_timeout("2 hours"), Some(120));
        assert_eq!(parse_timeout("soon"), None);
        assert_eq!(parse_timeout("100000000h"), Some(u32::MAX));
        assert_eq!(parse_timeout("3000000d 4000000000m"), Some(u32::MAX));
    }
}

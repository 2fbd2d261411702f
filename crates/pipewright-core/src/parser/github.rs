use crate::error::{EngineError, Result, SourceLocation};
use crate::parser::dag::*;
use crate::parser::{
    env_map, expect_mapping, finalize_job, parse_yaml, scalar_string, string_list, unknown_keys,
    PlatformKind,
};
use serde_yaml::Value;

/// Parser for GitHub Actions workflow YAML files.
pub struct GitHubActionsParser;

impl GitHubActionsParser {
    /// Parse GitHub Actions YAML content into a [`PipelineGraph`].
    pub fn parse(content: &str) -> Result<PipelineGraph> {
        let yaml = parse_yaml(content)?;
        let root = expect_mapping(&yaml, "")?;

        let name = yaml
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("Unnamed Workflow")
            .to_string();

        let mut builder = PipelineGraphBuilder::new(name, PlatformKind::GithubActions);

        if let Some(env) = yaml.get("env") {
            builder.set_env(env_map(env));
        }
        // Triggers, permissions, concurrency and friends are carried as-is.
        builder.set_metadata(unknown_keys(root, |k| matches!(k, "name" | "env" | "jobs")));

        let jobs = yaml
            .get("jobs")
            .and_then(|v| v.as_mapping())
            .ok_or_else(|| {
                let message = "no 'jobs' mapping found in workflow";
                EngineError::malformed(SourceLocation::at("jobs"), message)
            })?;

        for (job_id, job_config) in jobs {
            let job_id = scalar_string(job_id).ok_or_else(|| {
                EngineError::malformed(SourceLocation::at("jobs"), "job ids must be strings")
            })?;
            let job = Self::parse_job(&job_id, job_config)?;
            builder.add_job(job);
        }

        builder.build()
    }

    fn parse_job(job_id: &str, config: &Value) -> Result<Job> {
        let path = format!("jobs.{job_id}");
        let map = expect_mapping(config, &path)?;
        let schema = PlatformKind::GithubActions.schema();

        let name = config
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or(job_id)
            .to_string();

        let mut job = Job::new(job_id, name);
        job.metadata = unknown_keys(map, |k| schema.is_job_key(k));

        match config.get("runs-on") {
            Some(Value::String(label)) => job.runner = Some(label.clone()),
            // Label lists and runner groups cannot be reduced to one label.
            Some(other) => {
                job.metadata.insert("runs-on".to_string(), other.clone());
            }
            None => {}
        }

        if let Some(needs) = config.get("needs") {
            if !(needs.is_string() || needs.is_sequence()) {
                return Err(EngineError::malformed(
                    SourceLocation::at(format!("{path}.needs")),
                    "needs must be a job id or a list of job ids",
                ));
            }
            job.needs = string_list(needs);
        }

        if let Some(cond) = config.get("if").and_then(scalar_string) {
            job.condition = Some(cond);
        }

        if let Some(env) = config.get("env") {
            job.env = env_map(env);
        }

        if let Some(timeout) = config.get("timeout-minutes").and_then(|v| v.as_u64()) {
            job.resources.timeout_minutes = Some(timeout as u32);
        }

        if config.get("outputs").is_some() {
            job.artifacts.produces = true;
        }

        if let Some(steps) = config.get("steps") {
            let steps = steps.as_sequence().ok_or_else(|| {
                let location = SourceLocation::at(format!("{path}.steps"));
                EngineError::malformed(location, "steps must be a list")
            })?;
            for (i, step) in steps.iter().enumerate() {
                job.steps.push(Self::parse_step(step, &format!("{path}.steps[{i}]"))?);
            }
        }

        finalize_job(&mut job);
        Ok(job)
    }

    fn parse_step(step: &Value, path: &str) -> Result<Step> {
        let map = expect_mapping(step, path)?;
        let schema = PlatformKind::GithubActions.schema();

        let uses = step.get("uses").and_then(|v| v.as_str());
        let run = step.get("run").and_then(scalar_string);
        let with = step.get("with");

        let label = step
            .get("name")
            .and_then(scalar_string)
            .or_else(|| uses.map(String::from))
            .or_else(|| run.as_ref().and_then(|r| r.lines().next()).map(|l| l.trim().to_string()))
            .unwrap_or_else(|| "Unnamed step".to_string());

        let mut parsed = match (uses, run) {
            (Some(uses), _) if is_cache_action(uses) => {
                let key = with
                    .and_then(|w| w.get("key"))
                    .and_then(scalar_string)
                    .unwrap_or_default();
                let paths = with
                    .and_then(|w| w.get("path"))
                    .and_then(scalar_string)
                    .map(|p| {
                        p.lines()
                            .map(|l| l.trim().to_string())
                            .filter(|l| !l.is_empty())
                            .collect()
                    })
                    .unwrap_or_default();
                let mut cache = Step::cache(label, key, paths);
                // Keep the pinned action and its full input set for re-rendering.
                cache.metadata.insert("uses".to_string(), Value::String(uses.to_string()));
                if let Some(with) = with {
                    cache.metadata.insert("with".to_string(), with.clone());
                }
                cache
            }
            (Some(uses), _) => {
                let mut step = Step::uses(label, uses);
                if let (StepAction::Uses { inputs, .. }, Some(Value::Mapping(with))) =
                    (&mut step.action, with)
                {
                    for (k, v) in with {
                        if let Some(k) = scalar_string(k) {
                            inputs.insert(k, v.clone());
                        }
                    }
                }
                step
            }
            (None, Some(run)) => Step::run(label, run),
            (None, None) => {
                return Err(EngineError::malformed(
                    SourceLocation::at(path),
                    "step has neither 'run' nor 'uses'",
                ))
            }
        };

        parsed.metadata.extend(unknown_keys(map, |k| schema.is_step_key(k)));
        if let Some(env) = step.get("env") {
            parsed.env = env_map(env);
        }
        parsed.condition = step.get("if").and_then(scalar_string);
        Ok(parsed)
    }
}

fn is_cache_action(uses: &str) -> bool {
    uses.starts_with("actions/cache@") || uses.starts_with("actions/cache/restore@")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_workflow() {
        let yaml = r#"
name: CI
on: push
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - uses: actions/checkout@v4
      - name: Build
        run: npm run build
  test:
    needs: build
    runs-on: ubuntu-latest
    steps:
      - uses: actions/checkout@v4
      - name: Test
        run: npm test
"#;
        let dag = GitHubActionsParser::parse(yaml).unwrap();
        assert_eq!(dag.job_count(), 2);
        assert_eq!(dag.name(), "CI");
        assert!(dag.get_job("build").is_some());
        assert_eq!(dag.get_job("test").unwrap().needs, vec!["build"]);
        assert_eq!(dag.get_job("test").unwrap().category, JobCategory::Test);
        assert!(dag.metadata().contains_key("on"));
    }

    #[test]
    fn test_parse_parallel_jobs() {
        let yaml = r#"
name: CI
on: [push, pull_request]
jobs:
  lint:
    runs-on: ubuntu-latest
    steps:
      - run: npm run lint
  test:
    runs-on: ubuntu-latest
    steps:
      - run: npm test
  build:
    runs-on: ubuntu-latest
    steps:
      - run: npm run build
"#;
        let dag = GitHubActionsParser::parse(yaml).unwrap();
        assert_eq!(dag.job_count(), 3);
        assert_eq!(dag.root_jobs().len(), 3);
        assert_eq!(crate::graph::max_parallelism(&dag), 3);
    }

    #[test]
    fn test_cache_and_setup_steps() {
        let yaml = r#"
on: push
jobs:
  build:
    runs-on: ubuntu-22.04
    steps:
      - uses: actions/cache@v4
        with:
          path: |
            ~/.npm
            node_modules
          key: npm-${{ hashFiles('**/package-lock.json') }}
          restore-keys: npm-
      - uses: actions/setup-python@v5
        with:
          python-version: "3.12"
          cache: pip
      - run: npm ci
"#;
        let dag = GitHubActionsParser::parse(yaml).unwrap();
        let steps = &dag.get_job("build").unwrap().steps;
        match &steps[0].action {
            StepAction::Cache { key, paths } => {
                assert!(key.starts_with("npm-"));
                assert_eq!(paths, &vec!["~/.npm".to_string(), "node_modules".to_string()]);
            }
            other => panic!("expected cache step, got {other:?}"),
        }
        assert!(steps[0].is_lockfile_cache());
        assert!(steps[1].is_lockfile_cache());
        assert_eq!(steps[2].command(), Some("npm ci"));
    }

    #[test]
    fn test_unknown_keys_are_kept() {
        let yaml = r#"
on: push
permissions:
  contents: read
jobs:
  build:
    runs-on: ubuntu-22.04
    services:
      redis:
        image: redis:7
    steps:
      - id: compile
        run: make
        working-directory: src
"#;
        let dag = GitHubActionsParser::parse(yaml).unwrap();
        assert!(dag.metadata().contains_key("permissions"));
        let job = dag.get_job("build").unwrap();
        assert!(job.metadata.contains_key("services"));
        assert!(job.steps[0].metadata.contains_key("id"));
        assert!(job.steps[0].metadata.contains_key("working-directory"));
    }

    #[test]
    fn test_env_literals_and_references() {
        let yaml = r#"
on: push
env:
  NODE_ENV: production
jobs:
  deploy:
    runs-on: ubuntu-22.04
    env:
      TOKEN: ${{ secrets.DEPLOY_TOKEN }}
    steps:
      - run: ./deploy.sh
        env:
          API_KEY: sk_live_abcdefghijklmnop1234
"#;
        let dag = GitHubActionsParser::parse(yaml).unwrap();
        assert!(dag.env()["NODE_ENV"].is_literal());
        let job = dag.get_job("deploy").unwrap();
        assert!(!job.env["TOKEN"].is_literal());
        assert!(job.steps[0].env["API_KEY"].is_literal());
    }

    #[test]
    fn test_unknown_needs_is_malformed() {
        let yaml = r#"
on: push
jobs:
  test:
    runs-on: ubuntu-22.04
    needs: [build]
    steps:
      - run: make test
"#;
        match GitHubActionsParser::parse(yaml) {
            Err(EngineError::MalformedDefinition { location, .. }) => {
                assert_eq!(location.path, "jobs.test.needs");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_step_without_action_is_malformed() {
        let yaml = "on: push\njobs:\n  a:\n    steps:\n      - name: nothing\n";
        match GitHubActionsParser::parse(yaml) {
            Err(EngineError::MalformedDefinition { location, .. }) => {
                assert_eq!(location.path, "jobs.a.steps[0]");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_output_reference_marks_artifact_edge() {
        let yaml = r#"
on: push
jobs:
  version:
    runs-on: ubuntu-22.04
    outputs:
      tag: ${{ steps.v.outputs.tag }}
    steps:
      - id: v
        run: echo "tag=1.0" >> "$GITHUB_OUTPUT"
  release:
    needs: version
    runs-on: ubuntu-22.04
    steps:
      - run: gh release create ${{ needs.version.outputs.tag }}
"#;
        let dag = GitHubActionsParser::parse(yaml).unwrap();
        assert_eq!(dag.edges()[0].2, DagEdge::Artifact);
    }
}

use super::{
    lockfiles_in_key, portable, put, stage_plan, strings, to_yaml, translate_cache_key, Portable,
    RenderContext,
};
use crate::error::Result;
use crate::parser::dag::{Consumes, Job, StepAction};
use serde_yaml::{Mapping, Value};

/// Top-level keys GitLab reads as configuration rather than jobs.
const RESERVED: &[&str] = &[
    "image", "services", "stages", "before_script", "after_script", "variables", "cache",
    "default", "include", "workflow", "spec", "pages",
];

pub(crate) fn render(ctx: &mut RenderContext<'_>) -> Result<String> {
    let dag = ctx.dag;
    let plan = stage_plan(dag, true);
    ctx.record_stages(&plan);

    let mut root = Mapping::new();
    let stages: Vec<String> = plan
        .names()
        .into_iter()
        .filter(|s| s != ".pre" && s != ".post")
        .collect();
    put(&mut root, "stages", strings(&stages));
    if !dag.env().is_empty() {
        put(&mut root, "variables", ctx.env_mapping(dag.env()));
    }
    ctx.emit_metadata(&mut root, dag.metadata(), &[]);

    for (stage, jobs) in &plan.stages {
        for job in jobs {
            let rendered = render_job(ctx, job, stage);
            root.insert(Value::String(job_key(&job.id)), Value::Mapping(rendered));
        }
    }

    to_yaml(ctx.target, root)
}

/// Job ids GitLab would read as keywords or hidden templates get a suffix.
fn job_key(id: &str) -> String {
    if RESERVED.contains(&id) || id.starts_with('.') {
        format!("{id}-job")
    } else {
        id.to_string()
    }
}

fn render_job(ctx: &mut RenderContext<'_>, job: &Job, stage: &str) -> Mapping {
    let mut map = Mapping::new();
    put(&mut map, "stage", stage);
    if let Some(runner) = &job.runner {
        put(&mut map, "image", runner.as_str());
    }
    if !job.env.is_empty() {
        put(&mut map, "variables", ctx.env_mapping(&job.env));
    }

    // `needs: []` keeps roots from waiting on earlier stages.
    let needs: Vec<String> = job.needs.iter().map(|n| job_key(n)).collect();
    put(&mut map, "needs", strings(&needs));
    match &job.artifacts.consumes {
        Consumes::Nothing if !job.needs.is_empty() => {
            put(&mut map, "dependencies", Value::Sequence(Vec::new()))
        }
        Consumes::From(sources) if *sources != job.needs => {
            let sources: Vec<String> = sources.iter().map(|s| job_key(s)).collect();
            put(&mut map, "dependencies", strings(&sources));
        }
        _ => {}
    }

    let mut sections: [(&str, Vec<String>); 3] = [
        ("before_script", Vec::new()),
        ("script", Vec::new()),
        ("after_script", Vec::new()),
    ];
    let mut uploads: Vec<String> = Vec::new();
    let mut cache: Option<Mapping> = None;

    for step in &job.steps {
        if !step.env.is_empty() || step.condition.is_some() {
            ctx.warn(format!(
                "job '{}' step '{}' has its own env or condition, \
                 which GitLab scripts cannot express",
                job.id, step.name
            ));
        }
        match &step.action {
            StepAction::Run { command } => {
                let section = sections
                    .iter()
                    .position(|(name, _)| step.name.starts_with(&format!("{name}[")))
                    .unwrap_or(1);
                sections[section].1.push(command.clone());
            }
            StepAction::Cache { key, paths } => {
                if cache.is_some() {
                    ctx.warn(format!(
                        "job '{}' has more than one cache; only the first is kept",
                        job.id
                    ));
                    continue;
                }
                let key = translate_cache_key(ctx, key);
                let mut entry = Mapping::new();
                let files = key.strip_prefix("files:").map(|_| lockfiles_in_key(&key));
                match files {
                    Some(files) if !files.is_empty() => {
                        let mut key_map = Mapping::new();
                        put(&mut key_map, "files", strings(&files));
                        put(&mut entry, "key", key_map);
                    }
                    _ => put(&mut entry, "key", key),
                }
                put(&mut entry, "paths", strings(paths));
                cache = Some(entry);
            }
            StepAction::Uses { .. } => match portable(step) {
                Some(Portable::Upload { path, .. }) => uploads.push(path),
                Some(Portable::Checkout) | Some(Portable::Download { .. }) | None => {}
                Some(Portable::Setup { mapping, .. }) => ctx.warn(format!(
                    "job '{}' drops '{}'; the job image has to provide the toolchain",
                    job.id, mapping.github
                )),
                Some(Portable::Other(reference)) => {
                    ctx.warn(format!(
                        "job '{}' step '{}' uses '{reference}', which needs manual porting",
                        job.id, step.name
                    ));
                    sections[1].1.push(format!("echo \"TODO: port {reference}\""));
                }
            },
        }
    }

    if let Some(cache) = cache {
        put(&mut map, "cache", cache);
    }
    if sections[1].1.is_empty() {
        sections[1].1.push("echo \"nothing to run\"".to_string());
    }
    for (name, lines) in sections {
        if !lines.is_empty() {
            put(&mut map, name, strings(&lines));
        }
    }

    let native_artifacts = if ctx.native { job.metadata.get("artifacts") } else { None };
    match native_artifacts {
        Some(artifacts) => {
            map.insert(Value::String("artifacts".into()), artifacts.clone());
        }
        None if !uploads.is_empty() => {
            let mut artifacts = Mapping::new();
            put(&mut artifacts, "paths", strings(&uploads));
            put(&mut map, "artifacts", artifacts);
        }
        None => {}
    }

    if let Some(timeout) = job.resources.timeout_minutes {
        put(&mut map, "timeout", format!("{timeout}m"));
    }
    let has_rules = ctx.native && job.metadata.contains_key("rules");
    if let (Some(condition), false) = (&job.condition, has_rules) {
        let condition = ctx.condition(&job.id, condition);
        let mut rule = Mapping::new();
        put(&mut rule, "if", condition);
        put(&mut map, "rules", Value::Sequence(vec![Value::Mapping(rule)]));
    }
    ctx.emit_metadata(&mut map, &job.metadata, &["artifacts"]);
    map
}

#[cfg(test)]
mod tests {
    use crate::parser::gitlab::GitLabCIParser;
    use crate::parser::github::GitHubActionsParser;
    use crate::parser::PlatformKind;
    use crate::synth::render::render;

    const GITLAB: &str = r#"
stages: [build, test, deploy]
variables:
  NODE_ENV: test
workflow:
  rules:
    - if: $CI_COMMIT_BRANCH
build:
  stage: build
  image: node:20-bookworm
  cache:
    key:
      files: [package-lock.json]
    paths: [node_modules/]
  script:
    - npm ci
    - npm run build
  artifacts:
    paths: [dist/]
    expire_in: 1 week
test:
  stage: test
  image: node:20-bookworm
  before_script:
    - npm ci
  script:
    - npm test
  coverage: '/Lines\s*:\s*(\d+\.?\d*)%/'
deploy:
  stage: deploy
  script: [./deploy.sh]
  rules:
    - if: $CI_COMMIT_BRANCH == "main"
  environment: production
"#;

    #[test]
    fn test_round_trip_keeps_unknown_keys_and_edges() {
        let dag = GitLabCIParser::parse(GITLAB).unwrap();
        let rendered = render(&dag, PlatformKind::GitlabCi).unwrap();
        let again = GitLabCIParser::parse(&rendered.content).unwrap();

        assert_eq!(again.metadata(), dag.metadata());
        for job in dag.jobs() {
            let copy = again.get_job(&job.id).unwrap();
            assert_eq!(copy.needs, job.needs, "{}", job.id);
            assert_eq!(copy.metadata, job.metadata, "{}", job.id);
            assert_eq!(copy.steps, job.steps, "{}", job.id);
            assert_eq!(copy.stage, job.stage);
        }
        assert_eq!(rendered.stages.get("deploy").map(String::as_str), Some("deploy"));
    }

    #[test]
    fn test_github_workflow_converts_to_stages() {
        let workflow = r#"
on: push
jobs:
  build:
    runs-on: ubuntu-22.04
    steps:
      - uses: actions/checkout@v4
      - uses: actions/setup-node@v4
        with: { node-version: 20 }
      - uses: actions/cache@v4
        with:
          path: node_modules
          key: npm-${{ hashFiles('**/package-lock.json') }}
      - run: npm ci
      - uses: actions/upload-artifact@v4
        with: { name: dist, path: dist/ }
  test:
    needs: build
    runs-on: ubuntu-22.04
    steps:
      - run: npm test
"#;
        let dag = GitHubActionsParser::parse(workflow).unwrap();
        let rendered = render(&dag, PlatformKind::GitlabCi).unwrap();
        let again = GitLabCIParser::parse(&rendered.content).unwrap();

        assert_eq!(again.get_job("test").unwrap().needs, vec!["build"]);
        let build = again.get_job("build").unwrap();
        assert!(build.steps[0].is_lockfile_cache());
        assert_eq!(build.steps[0].signature(), "files:package-lock.json");
        assert!(build.artifacts.produces);
        assert!(rendered.warnings.iter().any(|w| w.contains("actions/setup-node@v4")));
        assert!(rendered.warnings.iter().any(|w| w.contains("not carried over")));
    }
}

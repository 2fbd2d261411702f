use super::{put, redundant_name, stage_plan, strings, to_yaml, RenderContext};
use crate::error::Result;
use crate::parser::dag::{Consumes, Job, Step, StepAction};
use serde_yaml::{Mapping, Value};

/// The platform-neutral format keeps every field of the model, so any graph
/// renders to it without loss apart from foreign metadata.
pub(crate) fn render(ctx: &mut RenderContext<'_>) -> Result<String> {
    let dag = ctx.dag;
    let plan = stage_plan(dag, true);
    ctx.record_stages(&plan);

    let mut root = Mapping::new();
    put(&mut root, "name", dag.name());
    ctx.emit_metadata(&mut root, dag.metadata(), &[]);
    if !dag.env().is_empty() {
        put(&mut root, "env", ctx.env_mapping(dag.env()));
    }
    if dag.jobs().all(|j| j.stage.is_some()) && dag.job_count() > 0 {
        put(&mut root, "stages", strings(&plan.names()));
    }

    let mut jobs = Mapping::new();
    for job in dag.jobs() {
        jobs.insert(Value::String(job.id.clone()), Value::Mapping(render_job(ctx, job)));
    }
    put(&mut root, "jobs", jobs);
    to_yaml(ctx.target, root)
}

fn render_job(ctx: &mut RenderContext<'_>, job: &Job) -> Mapping {
    let mut map = Mapping::new();
    if job.name != job.id {
        put(&mut map, "name", job.name.as_str());
    }
    if let Some(stage) = &job.stage {
        put(&mut map, "stage", stage.as_str());
    }
    put(&mut map, "needs", strings(&job.needs));
    if let Some(runner) = &job.runner {
        put(&mut map, "runner", runner.as_str());
    }
    if let Some(condition) = &job.condition {
        put(&mut map, "condition", condition.as_str());
    }
    if let Some(timeout) = job.resources.timeout_minutes {
        put(&mut map, "timeout_minutes", timeout);
    }
    if let Some(cpu) = job.resources.cpu {
        put(&mut map, "cpu", cpu);
    }
    if let Some(memory) = job.resources.memory_gb {
        put(&mut map, "memory_gb", memory);
    }
    if !job.env.is_empty() {
        put(&mut map, "env", ctx.env_mapping(&job.env));
    }

    let mut artifacts = Mapping::new();
    if job.artifacts.produces {
        put(&mut artifacts, "produces", true);
    }
    match &job.artifacts.consumes {
        Consumes::Nothing => {}
        Consumes::Any => put(&mut artifacts, "consumes", "all"),
        Consumes::From(jobs) => put(&mut artifacts, "consumes", strings(jobs)),
    }
    if !artifacts.is_empty() {
        put(&mut map, "artifacts", artifacts);
    }
    ctx.emit_metadata(&mut map, &job.metadata, &[]);

    let steps: Vec<Value> = job.steps.iter().map(|s| render_step(ctx, s)).collect();
    put(&mut map, "steps", Value::Sequence(steps));
    map
}

fn render_step(ctx: &RenderContext<'_>, step: &Step) -> Value {
    let plain = step.env.is_empty() && step.condition.is_none() && step.metadata.is_empty();
    let mut map = Mapping::new();

    match &step.action {
        StepAction::Run { command } => {
            let first_line = command.lines().next().unwrap_or(command).trim();
            if plain && step.name == first_line {
                return Value::String(command.clone());
            }
            if !redundant_name(step, command) {
                put(&mut map, "name", step.name.as_str());
            }
            put(&mut map, "run", command.as_str());
        }
        StepAction::Uses { reference, inputs } => {
            if step.name != *reference {
                put(&mut map, "name", step.name.as_str());
            }
            put(&mut map, "uses", reference.as_str());
            if !inputs.is_empty() {
                let with: Mapping = inputs
                    .iter()
                    .map(|(k, v)| (Value::String(k.clone()), v.clone()))
                    .collect();
                put(&mut map, "with", with);
            }
        }
        StepAction::Cache { key, paths } => {
            put(&mut map, "name", step.name.as_str());
            let mut cache = Mapping::new();
            put(&mut cache, "key", key.as_str());
            put(&mut cache, "paths", strings(paths));
            put(&mut map, "cache", cache);
        }
    }

    if !step.env.is_empty() {
        put(&mut map, "env", ctx.env_mapping(&step.env));
    }
    if let Some(condition) = &step.condition {
        put(&mut map, "condition", condition.as_str());
    }
    ctx.emit_metadata(&mut map, &step.metadata, &[]);
    Value::Mapping(map)
}

#[cfg(test)]
mod tests {
    use crate::parser::dag::Consumes;
    use crate::parser::generic::GenericParser;
    use crate::parser::gitlab::GitLabCIParser;
    use crate::parser::PlatformKind;
    use crate::synth::render::render;

    #[test]
    fn test_round_trip_is_exact() {
        let yaml = r#"
name: app
retention: 30d
stages: [build, test]
jobs:
  build:
    stage: build
    runner: ubuntu-22.04
    cpu: 4
    memory_gb: 8
    timeout_minutes: 20
    artifacts: { produces: true }
    owner: platform-team
    steps:
      - cache: { key: "npm-hash(package-lock.json)", paths: [node_modules] }
      - run: npm ci
        env: { NPM_TOKEN: "${NPM_TOKEN}" }
      - npm run build
  test:
    stage: test
    artifacts: { consumes: [build] }
    steps:
      - uses: actions/setup-node@v4
        with: { node-version: 20 }
      - name: unit
        run: npm test
        condition: always
"#;
        let dag = GenericParser::parse(yaml).unwrap();
        let rendered = render(&dag, PlatformKind::Generic).unwrap();
        let again = GenericParser::parse(&rendered.content).unwrap();

        assert_eq!(again.metadata(), dag.metadata());
        assert_eq!(again.job_ids(), dag.job_ids());
        for job in dag.jobs() {
            assert_eq!(again.get_job(&job.id), Some(job));
        }
    }

    #[test]
    fn test_gitlab_converts_without_loss_of_structure() {
        let yaml = r#"
stages: [build, test]
build:
  stage: build
  script: [make]
test:
  stage: test
  needs: [build]
  script: [make test]
"#;
        let dag = GitLabCIParser::parse(yaml).unwrap();
        let rendered = render(&dag, PlatformKind::Generic).unwrap();
        let again = GenericParser::parse(&rendered.content).unwrap();
        let test = again.get_job("test").unwrap();
        assert_eq!(test.needs, vec!["build"]);
        assert_eq!(test.stage.as_deref(), Some("test"));
        assert_eq!(test.artifacts.consumes, Consumes::From(vec!["build".into()]));
        assert_eq!(again.get_job("build").unwrap().steps[0].name, "script[0]");
    }
}

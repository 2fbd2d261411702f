use super::{
    is_image, is_native_reference, portable, put, redundant_name, stage_plan, strings,
    to_yaml, translate_cache_key, Portable, RenderContext,
};
use crate::error::Result;
use crate::parser::dag::{Job, Step, StepAction};
use serde_yaml::{Mapping, Value};

const DEFAULT_RUNNER: &str = "ubuntu-22.04";

pub(crate) fn render(ctx: &mut RenderContext<'_>) -> Result<String> {
    let dag = ctx.dag;
    let plan = stage_plan(dag, true);
    ctx.record_stages(&plan);

    let mut root = Mapping::new();
    put(&mut root, "name", dag.name());
    ctx.emit_metadata(&mut root, dag.metadata(), &[]);
    if !root.contains_key("on") {
        let mut push = Mapping::new();
        put(&mut push, "branches", strings(&["main".to_string()]));
        let mut on = Mapping::new();
        put(&mut on, "push", push);
        put(&mut on, "pull_request", Mapping::new());
        put(&mut root, "on", on);
    }
    if !dag.env().is_empty() {
        put(&mut root, "env", ctx.env_mapping(dag.env()));
    }

    let mut jobs = Mapping::new();
    for job in dag.jobs() {
        let rendered = render_job(ctx, job);
        jobs.insert(Value::String(job.id.clone()), Value::Mapping(rendered));
    }
    put(&mut root, "jobs", jobs);

    to_yaml(ctx.target, root)
}

fn render_job(ctx: &mut RenderContext<'_>, job: &Job) -> Mapping {
    let mut map = Mapping::new();
    if job.name != job.id {
        put(&mut map, "name", job.name.as_str());
    }

    match job.runner.as_deref() {
        Some(image) if is_image(image) => {
            put(&mut map, "runs-on", DEFAULT_RUNNER);
            if !(ctx.native && job.metadata.contains_key("container")) {
                put(&mut map, "container", image);
            }
        }
        Some(label) => put(&mut map, "runs-on", label),
        None if ctx.native && job.metadata.contains_key("runs-on") => {}
        None => put(&mut map, "runs-on", DEFAULT_RUNNER),
    }

    if !job.needs.is_empty() {
        put(&mut map, "needs", strings(&job.needs));
    }
    if let Some(condition) = &job.condition {
        let condition = ctx.condition(&job.id, condition);
        put(&mut map, "if", condition);
    }
    if !job.env.is_empty() {
        put(&mut map, "env", ctx.env_mapping(&job.env));
    }
    if let Some(timeout) = job.resources.timeout_minutes {
        put(&mut map, "timeout-minutes", timeout);
    }
    ctx.emit_metadata(&mut map, &job.metadata, &[]);

    let steps: Vec<Value> = job
        .steps
        .iter()
        .filter_map(|step| render_step(ctx, &job.id, step))
        .map(Value::Mapping)
        .collect();
    put(&mut map, "steps", Value::Sequence(steps));
    map
}

fn render_step(ctx: &mut RenderContext<'_>, job_id: &str, step: &Step) -> Option<Mapping> {
    let mut map = Mapping::new();
    let mut consumed: &[&str] = &[];

    match &step.action {
        StepAction::Run { command } => {
            if !redundant_name(step, command) {
                put(&mut map, "name", step.name.as_str());
            }
            put(&mut map, "run", command.as_str());
        }
        StepAction::Uses { reference, inputs } if is_native_reference(ctx.target, reference) => {
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
        StepAction::Uses { .. } => {
            put(&mut map, "name", step.name.as_str());
            match portable(step)? {
                Portable::Checkout => put(&mut map, "uses", "actions/checkout@v4"),
                Portable::Setup { mapping, version } => {
                    put(&mut map, "uses", mapping.github);
                    if let Some(version) = version {
                        let mut with = Mapping::new();
                        put(&mut with, mapping.github_version_input, version);
                        put(&mut map, "with", with);
                    }
                }
                Portable::Upload { name, path } => {
                    put(&mut map, "uses", "actions/upload-artifact@v4");
                    let mut with = Mapping::new();
                    put(&mut with, "name", name);
                    put(&mut with, "path", path);
                    put(&mut map, "with", with);
                }
                Portable::Download { name } => {
                    put(&mut map, "uses", "actions/download-artifact@v4");
                    let mut with = Mapping::new();
                    put(&mut with, "name", name);
                    put(&mut map, "with", with);
                }
                Portable::Other(reference) => {
                    ctx.warn(format!(
                        "job '{job_id}' step '{}' uses '{reference}', which needs manual porting",
                        step.name
                    ));
                    put(&mut map, "run", format!("echo \"TODO: port {reference}\""));
                }
            }
        }
        StepAction::Cache { key, paths } => {
            put(&mut map, "name", step.name.as_str());
            match (ctx.native, step.metadata.get("uses"), step.metadata.get("with")) {
                (true, Some(uses), Some(with)) => {
                    map.insert(Value::String("uses".into()), uses.clone());
                    map.insert(Value::String("with".into()), with.clone());
                }
                _ => {
                    put(&mut map, "uses", "actions/cache@v4");
                    let mut with = Mapping::new();
                    put(&mut with, "path", paths.join("\n"));
                    put(&mut with, "key", translate_cache_key(ctx, key));
                    put(&mut map, "with", with);
                }
            }
            consumed = &["uses", "with"];
        }
    }

    if !step.env.is_empty() {
        put(&mut map, "env", ctx.env_mapping(&step.env));
    }
    if let Some(condition) = &step.condition {
        let condition = ctx.condition(job_id, condition);
        put(&mut map, "if", condition);
    }
    ctx.emit_metadata(&mut map, &step.metadata, consumed);
    Some(map)
}

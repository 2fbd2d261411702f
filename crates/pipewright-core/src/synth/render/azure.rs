use super::{
    is_image, is_native_reference, portable, put, redundant_name, stage_plan, strings, to_yaml,
    translate_cache_key, Portable, RenderContext,
};
use crate::error::Result;
use crate::parser::dag::{Job, Step, StepAction};
use serde_yaml::{Mapping, Value};
use std::collections::HashMap;

const DEFAULT_IMAGE: &str = "ubuntu-22.04";

/// Azure job and stage names allow letters, digits and underscores only.
pub(crate) fn azure_name(id: &str) -> String {
    let name: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        format!("_{name}")
    } else {
        name
    }
}

pub(crate) fn render(ctx: &mut RenderContext<'_>) -> Result<String> {
    let dag = ctx.dag;
    let staged = dag.jobs().all(|j| j.stage.is_some());
    let plan = stage_plan(dag, true);
    ctx.record_stages(&plan);

    let names: HashMap<&str, String> =
        dag.jobs().map(|j| (j.id.as_str(), azure_name(&j.id))).collect();
    if !ctx.native && names.iter().any(|(id, name)| *id != name.as_str()) {
        ctx.warn("job ids were rewritten to Azure job names (letters, digits, underscores)");
    }

    let mut root = Mapping::new();
    put(&mut root, "name", dag.name());
    ctx.emit_metadata(&mut root, dag.metadata(), &[]);
    if !root.contains_key("trigger") {
        put(&mut root, "trigger", strings(&["main".to_string()]));
    }
    if !dag.env().is_empty() {
        put(&mut root, "variables", ctx.env_mapping(dag.env()));
    }

    if staged {
        let stage_of: HashMap<&str, &str> = plan
            .stages
            .iter()
            .flat_map(|(stage, jobs)| jobs.iter().map(move |j| (j.id.as_str(), stage.as_str())))
            .collect();
        let mut stages = Vec::new();
        for (stage, jobs) in &plan.stages {
            let mut upstream: Vec<String> = Vec::new();
            for job in jobs {
                for dep in &job.needs {
                    let Some(dep_stage) = stage_of.get(dep.as_str()) else { continue };
                    let dep_stage = azure_name(dep_stage);
                    if *dep_stage != azure_name(stage) && !upstream.contains(&dep_stage) {
                        upstream.push(dep_stage);
                    }
                }
            }
            let mut entry = Mapping::new();
            put(&mut entry, "stage", azure_name(stage));
            put(&mut entry, "dependsOn", strings(&upstream));
            let rendered: Vec<Value> = jobs
                .iter()
                .map(|job| Value::Mapping(render_job(ctx, job, &names)))
                .collect();
            put(&mut entry, "jobs", Value::Sequence(rendered));
            stages.push(Value::Mapping(entry));
        }
        put(&mut root, "stages", Value::Sequence(stages));
    } else {
        let rendered: Vec<Value> = dag
            .jobs()
            .map(|job| Value::Mapping(render_job(ctx, job, &names)))
            .collect();
        put(&mut root, "jobs", Value::Sequence(rendered));
    }

    to_yaml(ctx.target, root)
}

fn render_job(ctx: &mut RenderContext<'_>, job: &Job, names: &HashMap<&str, String>) -> Mapping {
    let name = names.get(job.id.as_str()).cloned().unwrap_or_else(|| azure_name(&job.id));
    let deployment = ctx.native && job.metadata.contains_key("environment");

    let mut map = Mapping::new();
    put(&mut map, if deployment { "deployment" } else { "job" }, name.as_str());
    if job.name != job.id {
        put(&mut map, "displayName", job.name.as_str());
    }
    // Explicit, even when empty, so jobs never pick up a whole earlier stage.
    let depends: Vec<String> = job
        .needs
        .iter()
        .map(|n| names.get(n.as_str()).cloned().unwrap_or_else(|| azure_name(n)))
        .collect();
    put(&mut map, "dependsOn", strings(&depends));
    if let Some(condition) = &job.condition {
        let condition = ctx.condition(&job.id, condition);
        put(&mut map, "condition", condition);
    }

    let pool_kept = ctx.native && job.metadata.contains_key("pool");
    match job.runner.as_deref() {
        _ if pool_kept => {}
        Some(image) if is_image(image) => {
            let mut pool = Mapping::new();
            put(&mut pool, "vmImage", DEFAULT_IMAGE);
            put(&mut map, "pool", pool);
            put(&mut map, "container", image);
        }
        runner => {
            let mut pool = Mapping::new();
            put(&mut pool, "vmImage", runner.unwrap_or(DEFAULT_IMAGE));
            put(&mut map, "pool", pool);
        }
    }
    if !job.env.is_empty() {
        put(&mut map, "variables", ctx.env_mapping(&job.env));
    }
    if let Some(timeout) = job.resources.timeout_minutes {
        put(&mut map, "timeoutInMinutes", timeout);
    }
    ctx.emit_metadata(&mut map, &job.metadata, &[]);

    let steps: Vec<Value> = job
        .steps
        .iter()
        .filter_map(|step| render_step(ctx, &job.id, step))
        .map(Value::Mapping)
        .collect();
    if deployment {
        let mut deploy = Mapping::new();
        put(&mut deploy, "steps", Value::Sequence(steps));
        let mut run_once = Mapping::new();
        put(&mut run_once, "deploy", deploy);
        let mut strategy = Mapping::new();
        put(&mut strategy, "runOnce", run_once);
        put(&mut map, "strategy", strategy);
    } else {
        put(&mut map, "steps", Value::Sequence(steps));
    }
    map
}

fn task(map: &mut Mapping, name: &str, inputs: Mapping) {
    put(map, "task", name);
    if !inputs.is_empty() {
        put(map, "inputs", inputs);
    }
}

fn render_step(ctx: &mut RenderContext<'_>, job_id: &str, step: &Step) -> Option<Mapping> {
    let mut map = Mapping::new();
    let mut consumed: &[&str] = &[];
    let mut label = true;

    match &step.action {
        StepAction::Run { command } => {
            put(&mut map, "script", command.as_str());
            label = !redundant_name(step, command);
        }
        StepAction::Uses { reference, inputs } if is_native_reference(ctx.target, reference) => {
            let inputs: Mapping = inputs
                .iter()
                .map(|(k, v)| (Value::String(k.clone()), v.clone()))
                .collect();
            if reference == "checkout" {
                let repo = inputs
                    .get("repository")
                    .cloned()
                    .unwrap_or_else(|| Value::String("self".into()));
                map.insert(Value::String("checkout".into()), repo);
                label = step.name != "Checkout";
            } else if let Some(template) = reference.strip_prefix("template:") {
                put(&mut map, "template", template);
                label = step.name != template;
            } else {
                task(&mut map, reference, inputs);
                label = step.name != *reference;
            }
        }
        StepAction::Uses { .. } => match portable(step)? {
            Portable::Checkout => {
                put(&mut map, "checkout", "self");
                label = false;
            }
            Portable::Setup { mapping, version } => match mapping.azure_task {
                Some(name) => {
                    let mut inputs = Mapping::new();
                    if let Some(version) = version {
                        put(&mut inputs, mapping.azure_version_input, version);
                    }
                    task(&mut map, name, inputs);
                }
                None => {
                    ctx.warn(format!(
                        "job '{job_id}' drops '{}'; the agent image has to provide the toolchain",
                        mapping.github
                    ));
                    return None;
                }
            },
            Portable::Upload { name, path } => {
                let mut inputs = Mapping::new();
                put(&mut inputs, "targetPath", path);
                put(&mut inputs, "artifact", name);
                task(&mut map, "PublishPipelineArtifact@1", inputs);
            }
            Portable::Download { name } => {
                let mut inputs = Mapping::new();
                put(&mut inputs, "buildType", "current");
                put(&mut inputs, "artifact", name);
                task(&mut map, "DownloadPipelineArtifact@2", inputs);
            }
            Portable::Other(reference) => {
                ctx.warn(format!(
                    "job '{job_id}' step '{}' uses '{reference}', which needs manual porting",
                    step.name
                ));
                put(&mut map, "script", format!("echo \"TODO: port {reference}\""));
            }
        },
        StepAction::Cache { key, paths } => {
            match (ctx.native, step.metadata.get("task"), step.metadata.get("inputs")) {
                (true, Some(name), Some(inputs)) => {
                    map.insert(Value::String("task".into()), name.clone());
                    map.insert(Value::String("inputs".into()), inputs.clone());
                }
                _ => {
                    if paths.len() > 1 {
                        ctx.warn(format!(
                            "job '{job_id}' cache '{}' lists several paths; \
                             Cache@2 keeps the first",
                            step.name
                        ));
                    }
                    let mut inputs = Mapping::new();
                    put(&mut inputs, "key", translate_cache_key(ctx, key));
                    put(&mut inputs, "path", paths.first().map(String::as_str).unwrap_or("."));
                    task(&mut map, "Cache@2", inputs);
                }
            }
            consumed = &["task", "inputs"];
        }
    }

    if label {
        put(&mut map, "displayName", step.name.as_str());
    }
    if !step.env.is_empty() {
        put(&mut map, "env", ctx.env_mapping(&step.env));
    }
    if let Some(condition) = &step.condition {
        let condition = ctx.condition(job_id, condition);
        put(&mut map, "condition", condition);
    }
    ctx.emit_metadata(&mut map, &step.metadata, consumed);
    Some(map)
}

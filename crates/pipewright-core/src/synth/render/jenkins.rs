use super::{is_image, portable, stage_plan, Portable, RenderContext};
use crate::error::Result;
use crate::parser::dag::{EnvValue, Job, Step, StepAction};
use indexmap::IndexMap;
use std::fmt::Write;

/// Declarative Jenkinsfile text. Order comes from stages alone, so a layer
/// with several jobs becomes a `parallel` block.
pub(crate) fn render(ctx: &mut RenderContext<'_>) -> Result<String> {
    let dag = ctx.dag;
    let plan = stage_plan(dag, false);
    ctx.record_stages(&plan);

    let mut out = String::new();
    out.push_str("pipeline {\n");
    out.push_str("    agent any\n");
    if !dag.env().is_empty() {
        out.push_str("    environment {\n");
        write_env(ctx, &mut out, dag.env(), 2);
        out.push_str("    }\n");
    }
    out.push_str("    stages {\n");

    for (stage, jobs) in &plan.stages {
        match jobs.as_slice() {
            // A lone job is its own stage.
            [job] => {
                ctx.stages.insert(job.id.clone(), job.id.clone());
                write_stage(ctx, &mut out, job, 2);
            }
            _ => {
                let _ = writeln!(out, "        stage('{}') {{", escape(stage));
                out.push_str("            parallel {\n");
                for job in jobs {
                    write_stage(ctx, &mut out, job, 4);
                }
                out.push_str("            }\n");
                out.push_str("        }\n");
            }
        }
    }

    out.push_str("    }\n");
    out.push_str("}\n");
    Ok(out)
}

fn indent(level: usize) -> String {
    "    ".repeat(level)
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('\'', "\\'")
}

fn env_literal(ctx: &RenderContext<'_>, value: &EnvValue) -> String {
    let rendered = ctx.env_value(value);
    if rendered.starts_with("credentials(") {
        rendered
    } else {
        format!("'{}'", escape(&rendered))
    }
}

fn write_env(
    ctx: &RenderContext<'_>,
    out: &mut String,
    env: &IndexMap<String, EnvValue>,
    level: usize,
) {
    let pad = indent(level);
    for (name, value) in env {
        let _ = writeln!(out, "{pad}{name} = {}", env_literal(ctx, value));
    }
}

fn write_stage(ctx: &mut RenderContext<'_>, out: &mut String, job: &Job, level: usize) {
    let pad = indent(level);
    let inner = indent(level + 1);
    let _ = writeln!(out, "{pad}stage('{}') {{", escape(&job.id));

    match job.runner.as_deref() {
        Some(image) if is_image(image) => {
            let _ = writeln!(out, "{inner}agent {{ docker {{ image '{}' }} }}", escape(image));
        }
        Some(label) => {
            let _ = writeln!(out, "{inner}agent {{ label '{}' }}", escape(label));
        }
        None => {}
    }
    if let Some(condition) = &job.condition {
        let condition = ctx.condition(&job.id, condition);
        let _ = writeln!(out, "{inner}when {{ {} }}", condition.trim());
    }
    if let Some(timeout) = job.resources.timeout_minutes {
        let _ = writeln!(out, "{inner}options {{ timeout(time: {timeout}, unit: 'MINUTES') }}");
    }
    if !job.env.is_empty() {
        let _ = writeln!(out, "{inner}environment {{");
        write_env(ctx, out, &job.env, level + 2);
        let _ = writeln!(out, "{inner}}}");
    }

    let _ = writeln!(out, "{inner}steps {{");
    let step_pad = indent(level + 2);
    let mut wrote = false;
    for step in &job.steps {
        if let Some(line) = step_line(ctx, job, step) {
            for l in line.lines() {
                let _ = writeln!(out, "{step_pad}{l}");
            }
            wrote = true;
        }
    }
    if !wrote {
        let _ = writeln!(out, "{step_pad}echo 'nothing to run'");
    }
    let _ = writeln!(out, "{inner}}}");
    let _ = writeln!(out, "{pad}}}");
}

fn shell(step: &Step) -> &str {
    match step.metadata.get("shell").and_then(|v| v.as_str()) {
        Some(s @ ("sh" | "bat" | "powershell" | "pwsh")) => s,
        _ => "sh",
    }
}

fn step_line(ctx: &mut RenderContext<'_>, job: &Job, step: &Step) -> Option<String> {
    if !step.env.is_empty() || step.condition.is_some() {
        ctx.warn(format!(
            "job '{}' step '{}' has its own env or condition, which was dropped",
            job.id, step.name
        ));
    }
    match &step.action {
        StepAction::Run { command } => {
            let shell = shell(step);
            if command.contains('\n') || command.contains('\'') {
                Some(format!("{shell} '''\n{}\n'''", command.replace("'''", "\\'\\'\\'")))
            } else {
                Some(format!("{shell} '{command}'"))
            }
        }
        StepAction::Cache { key, .. } => {
            ctx.warn(format!(
                "job '{}' cache '{key}' has no Jenkins equivalent without a plugin and was dropped",
                job.id
            ));
            None
        }
        StepAction::Uses { .. } => match portable(step)? {
            Portable::Checkout => Some("checkout scm".to_string()),
            Portable::Upload { name, path } => {
                let includes = if path == "." {
                    "**/*".to_string()
                } else {
                    format!("{}/**", path.trim_end_matches('/'))
                };
                Some(format!("stash name: '{}', includes: '{}'", escape(&name), escape(&includes)))
            }
            Portable::Download { name } => Some(format!("unstash '{}'", escape(&name))),
            Portable::Setup { mapping, .. } => {
                ctx.warn(format!(
                    "job '{}' drops '{}'; the agent has to provide the toolchain",
                    job.id, mapping.github
                ));
                None
            }
            Portable::Other(reference) => {
                ctx.warn(format!(
                    "job '{}' step '{}' uses '{reference}', which needs manual porting",
                    job.id, step.name
                ));
                Some(format!("echo 'TODO: port {}'", escape(reference)))
            }
        },
    }
}

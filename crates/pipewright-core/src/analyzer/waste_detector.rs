use crate::analyzer::report::{Finding, FindingKind, Impact, RiskLevel, Severity};
use crate::analyzer::{RuleContext, RuleError};
use crate::parser::dag::Job;
use serde_yaml::Value;

/// Detect runner labels and container images that float with upstream releases.
pub fn detect_floating_images(ctx: &RuleContext<'_>) -> Result<Vec<Finding>, RuleError> {
    let mut findings = Vec::new();

    for job in ctx.dag.jobs() {
        let Some(image) = images(job).into_iter().find(|i| is_floating(i)) else {
            continue;
        };
        findings.push(Finding {
            severity: Severity::Low,
            job: Some(job.id.clone()),
            step: None,
            related_jobs: vec![job.id.clone()],
            rationale: format!(
                "job '{}' runs on '{}', which changes whenever the upstream tag moves",
                job.id, image
            ),
            impact: Impact::Risk {
                level: RiskLevel::Low,
            },
            kind: FindingKind::FloatingRunnerImage { image },
        });
    }

    Ok(findings)
}

/// Runner label plus any container image kept in job metadata.
fn images(job: &Job) -> Vec<String> {
    let mut out: Vec<String> = job.runner.iter().cloned().collect();
    for key in ["container", "image"] {
        match job.metadata.get(key) {
            Some(Value::String(s)) => out.push(s.clone()),
            Some(v @ Value::Mapping(_)) => {
                if let Some(s) = v.get("image").and_then(Value::as_str) {
                    out.push(s.to_string());
                }
            }
            _ => {}
        }
    }
    out
}

fn is_floating(image: &str) -> bool {
    let image = image.trim().to_lowercase();
    image.ends_with("-latest") || image.ends_with(":latest") || image == "latest"
}

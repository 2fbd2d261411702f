use crate::analyzer::report::{Finding, FindingKind, Impact, RiskLevel, Severity};
use crate::analyzer::{RuleContext, RuleError};
use crate::parser::dag::JobCategory;

/// Deploy jobs with no test or security-scan job anywhere upstream.
pub fn detect_unguarded_deploys(ctx: &RuleContext<'_>) -> Result<Vec<Finding>, RuleError> {
    let mut findings = Vec::new();

    for job in ctx.dag.jobs().filter(|j| j.category == JobCategory::Deploy) {
        let ancestors = ctx.dag.ancestors(&job.id);
        if ancestors.iter().any(|a| a.category.is_gate()) {
            continue;
        }
        let ancestor_ids: Vec<String> = ancestors.iter().map(|a| a.id.clone()).collect();
        findings.push(Finding {
            severity: Severity::High,
            job: Some(job.id.clone()),
            step: None,
            related_jobs: vec![job.id.clone()],
            rationale: format!(
                "deploy job '{}' runs without any test or security scan before it",
                job.id
            ),
            impact: Impact::Risk {
                level: RiskLevel::High,
            },
            kind: FindingKind::UnguardedDeploy {
                ancestors: ancestor_ids,
            },
        });
    }

    Ok(findings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::tests::context;
    use crate::parser::gitlab::GitLabCIParser;

    #[test]
    fn test_deploy_after_build_only() {
        let yaml = r#"
stages: [build, deploy]
build:
  stage: build
  script: [make]
deploy_prod:
  stage: deploy
  script: [kubectl apply -f k8s/]
"#;
        let dag = GitLabCIParser::parse(yaml).unwrap();
        let findings = context(&dag, |ctx| detect_unguarded_deploys(ctx).unwrap());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].job.as_deref(), Some("deploy_prod"));
        assert_eq!(
            findings[0].kind,
            FindingKind::UnguardedDeploy {
                ancestors: vec!["build".to_string()]
            }
        );
    }

    #[test]
    fn test_deploy_behind_tests_is_guarded() {
        let yaml = r#"
stages: [build, test, deploy]
build:
  stage: build
  script: [make]
unit_tests:
  stage: test
  script: [make test]
deploy_prod:
  stage: deploy
  script: [./deploy.sh]
"#;
        let dag = GitLabCIParser::parse(yaml).unwrap();
        assert!(context(&dag, |ctx| detect_unguarded_deploys(ctx).unwrap()).is_empty());
    }
}

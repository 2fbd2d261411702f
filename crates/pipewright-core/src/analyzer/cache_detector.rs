use crate::analyzer::duplicate_install::uncached_installs;
use crate::analyzer::report::{Finding, FindingKind, Impact, Severity};
use crate::analyzer::{serve_from_cache, RuleContext, RuleError};

/// Detect install steps that run without a lockfile-keyed cache restore.
pub fn detect_missing_caches(ctx: &RuleContext<'_>) -> Result<Vec<Finding>, RuleError> {
    let mut findings = Vec::new();

    for install in uncached_installs(ctx.dag) {
        let site = (install.job.as_str(), install.step, install.command.as_str());
        let saving = ctx.saving_with(|jobs| serve_from_cache(jobs, [site]))?;

        findings.push(Finding {
            severity: Severity::Medium,
            job: Some(install.job.clone()),
            step: Some(install.step),
            related_jobs: vec![install.job.clone()],
            rationale: format!(
                "job '{}' runs '{}' with no cache restore keyed to a lockfile",
                install.job, install.command
            ),
            impact: Impact::TimeSaved { secs: saving },
            kind: FindingKind::MissingCache {
                command: install.command,
            },
        });
    }

    Ok(findings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::tests::context;
    use crate::parser::github::GitHubActionsParser;

    #[test]
    fn test_detect_missing_npm_cache() {
        let yaml = r#"
name: CI
on: push
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - uses: actions/checkout@v4
      - run: npm ci
      - run: npm run build
"#;
        let dag = GitHubActionsParser::parse(yaml).unwrap();
        let findings = context(&dag, |ctx| detect_missing_caches(ctx).unwrap());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].step, Some(1));
        assert_eq!(findings[0].kind, FindingKind::MissingCache { command: "npm ci".into() });
        // 180s install replaced by a 10s cache restore.
        assert_eq!(findings[0].savings_secs(), Some(170.0));
    }

    #[test]
    fn test_saving_keeps_the_rest_of_the_step() {
        let yaml = r#"
on: push
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - run: |
          npm ci
          npm run build
          npm test
"#;
        let dag = GitHubActionsParser::parse(yaml).unwrap();
        let findings = context(&dag, |ctx| detect_missing_caches(ctx).unwrap());
        assert_eq!(findings.len(), 1);
        // 720s script becomes a 10s restore plus 540s of build and test.
        assert_eq!(findings[0].savings_secs(), Some(170.0));
    }

    #[test]
    fn test_chained_installs_reported_separately() {
        let yaml = r#"
on: push
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - run: npm ci && pip install -r requirements.txt
"#;
        let dag = GitHubActionsParser::parse(yaml).unwrap();
        let findings = context(&dag, |ctx| detect_missing_caches(ctx).unwrap());
        let kinds: Vec<&FindingKind> = findings.iter().map(|f| &f.kind).collect();
        assert_eq!(
            kinds,
            vec![
                &FindingKind::MissingCache { command: "npm ci".into() },
                &FindingKind::MissingCache {
                    command: "pip install -r requirements.txt".into()
                },
            ]
        );
        // Each restore costs 10s against the install it replaces.
        assert_eq!(findings[0].savings_secs(), Some(170.0));
        assert_eq!(findings[1].savings_secs(), Some(110.0));
    }

    #[test]
    fn test_no_warning_when_lockfile_cache_present() {
        let yaml = r#"
name: CI
on: push
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - uses: actions/checkout@v4
      - uses: actions/cache@v4
        with:
          path: node_modules
          key: node-${{ hashFiles('package-lock.json') }}
      - run: npm ci
"#;
        let dag = GitHubActionsParser::parse(yaml).unwrap();
        assert!(context(&dag, |ctx| detect_missing_caches(ctx).unwrap()).is_empty());
    }

    #[test]
    fn test_static_cache_key_does_not_count() {
        let yaml = r#"
on: push
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - uses: actions/cache@v4
        with:
          path: node_modules
          key: node-modules
      - run: npm ci
"#;
        let dag = GitHubActionsParser::parse(yaml).unwrap();
        assert_eq!(context(&dag, |ctx| detect_missing_caches(ctx).unwrap()).len(), 1);
    }

    #[test]
    fn test_ancestor_cache_covers_downstream_installs() {
        let yaml = r#"
on: push
jobs:
  deps:
    runs-on: ubuntu-latest
    steps:
      - uses: actions/setup-node@v4
        with:
          node-version: 20
          cache: npm
  test:
    needs: deps
    runs-on: ubuntu-latest
    steps:
      - run: npm ci
"#;
        let dag = GitHubActionsParser::parse(yaml).unwrap();
        assert!(context(&dag, |ctx| detect_missing_caches(ctx).unwrap()).is_empty());
    }

    #[test]
    fn test_cache_after_install_does_not_count() {
        let yaml = r#"
on: push
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - run: pip install -r requirements.txt
      - uses: actions/cache@v4
        with:
          path: ~/.cache/pip
          key: pip-${{ hashFiles('requirements.txt') }}
"#;
        let dag = GitHubActionsParser::parse(yaml).unwrap();
        assert_eq!(context(&dag, |ctx| detect_missing_caches(ctx).unwrap()).len(), 1);
    }
}

//! Duplicate dependency installs.
//!
//! Normalization policy for install commands:
//!
//! - compound commands are split on `&&`, `;`, `|` and newlines;
//! - leading `VAR=value` assignments and `sudo` are dropped;
//! - the installer and its subcommand are recognised (`npm ci`, `npm install`
//!   and its `i` alias, `yarn` / `yarn install`, `pnpm install`, `pip install`
//!   including `pip3` and `python -m pip`, `poetry install`, `pipenv install`,
//!   `bundle install`, `composer install`, `go mod download`, `cargo fetch`,
//!   `dotnet restore`, `mvn dependency:go-offline`, `mvn install`);
//! - flags that only change output (`--silent`, `-s`, `--quiet`, `-q`,
//!   `--no-progress`, `--progress=false`, `--loglevel=*`, `--no-audit`,
//!   `--no-fund`, `--no-color`, `--prefer-offline`) are dropped;
//! - remaining arguments are sorted.
//!
//! `npm ci` and `npm install` stay distinct since they install differently.

use crate::analyzer::report::{Finding, FindingKind, Impact, Severity, StepRef};
use crate::analyzer::{serve_from_cache, RuleContext, RuleError};
use crate::parser::dag::{command_segments, PipelineGraph, Step};
use indexmap::IndexMap;

const OUTPUT_ONLY_FLAGS: &[&str] = &[
    "--silent",
    "-s",
    "--quiet",
    "-q",
    "--no-progress",
    "--progress=false",
    "--no-audit",
    "--no-fund",
    "--no-color",
    "--prefer-offline",
];

/// Normalized install commands found in a shell command, in order.
pub fn install_commands(command: &str) -> Vec<String> {
    command_segments(command).filter_map(normalize_install).collect()
}

/// `command` with the installs in `installs` (normalized) removed, the
/// remaining simple commands one per line.
pub(crate) fn without_installs(command: &str, installs: &[&str]) -> String {
    command_segments(command)
        .filter(|segment| match normalize_install(segment) {
            Some(install) => !installs.contains(&install.as_str()),
            None => true,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Normalize one simple command, or `None` when it installs nothing.
pub fn normalize_install(command: &str) -> Option<String> {
    let mut tokens: Vec<&str> = command.split_whitespace().collect();
    while let Some(first) = tokens.first() {
        let is_assignment = !first.starts_with('-') && first.contains('=');
        if is_assignment || *first == "sudo" {
            tokens.remove(0);
        } else {
            break;
        }
    }
    if tokens.len() >= 3 && tokens[0].starts_with("python") && tokens[1] == "-m" {
        tokens.drain(..2);
    }

    let (head, rest): (String, &[&str]) = match tokens.as_slice() {
        ["npm", "ci", rest @ ..] => ("npm ci".into(), rest),
        ["npm", "install" | "i", rest @ ..] => ("npm install".into(), rest),
        ["yarn"] => ("yarn install".into(), &[]),
        ["yarn", "install", rest @ ..] => ("yarn install".into(), rest),
        ["yarn", flag, rest @ ..] if flag.starts_with('-') => {
            let args = std::iter::once(*flag).chain(rest.iter().copied());
            return finish("yarn install".into(), args);
        }
        ["pnpm", "install" | "i", rest @ ..] => ("pnpm install".into(), rest),
        ["pip" | "pip3", "install", rest @ ..] => ("pip install".into(), rest),
        ["poetry", "install", rest @ ..] => ("poetry install".into(), rest),
        ["pipenv", "install", rest @ ..] => ("pipenv install".into(), rest),
        ["bundle", "install", rest @ ..] => ("bundle install".into(), rest),
        ["composer", "install", rest @ ..] => ("composer install".into(), rest),
        ["go", "mod", "download", rest @ ..] => ("go mod download".into(), rest),
        ["cargo", "fetch", rest @ ..] => ("cargo fetch".into(), rest),
        ["dotnet", "restore", rest @ ..] => ("dotnet restore".into(), rest),
        ["mvn" | "./mvnw", "dependency:go-offline", rest @ ..] => {
            ("mvn dependency:go-offline".into(), rest)
        }
        ["mvn" | "./mvnw", "install", rest @ ..] => ("mvn install".into(), rest),
        _ => return None,
    };
    finish(head, rest.iter().copied())
}

fn finish<'a>(head: String, args: impl Iterator<Item = &'a str>) -> Option<String> {
    let mut args: Vec<&str> = args
        .filter(|a| !OUTPUT_ONLY_FLAGS.contains(a) && !a.starts_with("--loglevel"))
        .collect();
    args.sort_unstable();
    if args.is_empty() {
        Some(head)
    } else {
        Some(format!("{} {}", head, args.join(" ")))
    }
}

/// An install with no lockfile-keyed cache restore before it, in its own job
/// or in any job it depends on. A step chaining several installs yields one
/// per install.
pub(crate) struct UncachedInstall {
    pub job: String,
    pub step: usize,
    pub command: String,
}

pub(crate) fn uncached_installs(dag: &PipelineGraph) -> Vec<UncachedInstall> {
    let mut out = Vec::new();
    for job in dag.jobs() {
        let ancestor_cached = dag
            .ancestors(&job.id)
            .iter()
            .any(|a| a.steps.iter().any(Step::is_lockfile_cache));
        if ancestor_cached {
            continue;
        }
        let mut cached = false;
        for (idx, step) in job.steps.iter().enumerate() {
            if step.is_lockfile_cache() {
                cached = true;
                continue;
            }
            if cached {
                continue;
            }
            let Some(script) = step.command() else { continue };
            let mut seen: Vec<String> = Vec::new();
            for command in install_commands(script) {
                if seen.contains(&command) {
                    continue;
                }
                seen.push(command.clone());
                out.push(UncachedInstall {
                    job: job.id.clone(),
                    step: idx,
                    command,
                });
            }
        }
    }
    out
}

/// Same normalized install command in two or more uncached steps.
pub fn detect_duplicate_installs(ctx: &RuleContext<'_>) -> Result<Vec<Finding>, RuleError> {
    let mut groups: IndexMap<String, Vec<StepRef>> = IndexMap::new();
    for install in uncached_installs(ctx.dag) {
        groups.entry(install.command).or_default().push(StepRef {
            job: install.job,
            step: install.step,
        });
    }

    let mut findings = Vec::new();
    for (command, occurrences) in groups {
        if occurrences.len() < 2 {
            continue;
        }
        let repeats = occurrences[1..]
            .iter()
            .map(|r| (r.job.as_str(), r.step, command.as_str()));
        let saving = ctx.saving_with(|jobs| serve_from_cache(jobs, repeats))?;

        let mut related: Vec<String> = Vec::new();
        for occurrence in &occurrences {
            if !related.contains(&occurrence.job) {
                related.push(occurrence.job.clone());
            }
        }

        findings.push(Finding {
            severity: Severity::Medium,
            job: Some(occurrences[0].job.clone()),
            step: Some(occurrences[0].step),
            rationale: format!(
                "'{}' runs {} times across jobs {} without a cache restore",
                command,
                occurrences.len(),
                related.join(", ")
            ),
            related_jobs: related,
            impact: Impact::TimeSaved { secs: saving },
            kind: FindingKind::DuplicateDependencyInstall { command, occurrences },
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
    fn test_normalize_drops_output_flags_and_sorts() {
        assert_eq!(
            normalize_install("npm ci --silent --no-audit --legacy-peer-deps").as_deref(),
            Some("npm ci --legacy-peer-deps")
        );
        assert_eq!(
            normalize_install("pip3 install -q -r requirements.txt").as_deref(),
            Some("pip install -r requirements.txt")
        );
        assert_eq!(
            normalize_install("CI=true sudo npm i --loglevel=error").as_deref(),
            Some("npm install")
        );
        assert_eq!(normalize_install("yarn").as_deref(), Some("yarn install"));
        assert_eq!(
            normalize_install("yarn --frozen-lockfile").as_deref(),
            Some("yarn install --frozen-lockfile")
        );
        assert_eq!(
            normalize_install("python -m pip install --upgrade pip").as_deref(),
            Some("pip install --upgrade pip")
        );
    }

    #[test]
    fn test_ci_and_install_stay_distinct() {
        assert_ne!(normalize_install("npm ci"), normalize_install("npm install"));
    }

    #[test]
    fn test_non_install_commands() {
        assert_eq!(normalize_install("npm test"), None);
        assert_eq!(normalize_install("yarn build"), None);
        assert_eq!(normalize_install("cargo build"), None);
        assert_eq!(normalize_install(""), None);
    }

    #[test]
    fn test_compound_commands() {
        assert_eq!(
            install_commands("cd web && npm ci --no-fund && npm test\ngo mod download"),
            vec!["npm ci".to_string(), "go mod download".to_string()]
        );
    }

    #[test]
    fn test_without_installs_keeps_other_commands() {
        let script = "cd web && npm ci --silent && npm test\npip install -r requirements.txt";
        assert_eq!(
            without_installs(script, &["npm ci"]),
            "cd web\nnpm test\npip install -r requirements.txt"
        );
        assert_eq!(without_installs("npm ci", &["npm ci"]), "");
    }

    #[test]
    fn test_every_install_in_a_step_is_reported() {
        let yaml = r#"
on: push
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - run: npm ci && pip install -r requirements.txt && npm ci
"#;
        let dag = GitHubActionsParser::parse(yaml).unwrap();
        let installs = uncached_installs(&dag);
        let commands: Vec<&str> = installs.iter().map(|i| i.command.as_str()).collect();
        assert_eq!(commands, vec!["npm ci", "pip install -r requirements.txt"]);
        assert!(installs.iter().all(|i| i.step == 0));
    }

    #[test]
    fn test_duplicate_saving_keeps_rest_of_step() {
        let yaml = r#"
on: push
jobs:
  lint:
    runs-on: ubuntu-latest
    steps:
      - run: npm ci
  test:
    runs-on: ubuntu-latest
    steps:
      - run: npm ci && npm test
"#;
        let dag = GitHubActionsParser::parse(yaml).unwrap();
        let findings = context(&dag, |ctx| detect_duplicate_installs(ctx).unwrap());
        assert_eq!(findings.len(), 1);
        // test: 480s before, 10s restore plus 300s tests after; lint stays at 180s.
        assert_eq!(findings[0].savings_secs(), Some(170.0));
    }
}

use crate::analyzer::report::{Finding, FindingKind, Impact, RiskLevel, SecretSource, Severity};
use crate::analyzer::{RuleContext, RuleError};
use crate::error::{EngineError, Result};
use crate::parser::dag::EnvValue;
use indexmap::IndexMap;
use regex::Regex;

struct SecretPattern {
    id: &'static str,
    /// Checked against `NAME=value` for env entries.
    regex: &'static str,
    /// Whether the pattern is also a token shape worth looking for inside commands.
    in_commands: bool,
}

const SECRET_PATTERNS: &[SecretPattern] = &[
    SecretPattern {
        id: "aws-access-key-id",
        regex: r"AKIA[0-9A-Z]{16}",
        in_commands: true,
    },
    SecretPattern {
        id: "github-token",
        regex: r"gh[pousr]_[A-Za-z0-9]{36}",
        in_commands: true,
    },
    SecretPattern {
        id: "gitlab-token",
        regex: r"glpat-[A-Za-z0-9_\-]{20}",
        in_commands: true,
    },
    SecretPattern {
        id: "slack-token",
        regex: r"xox[baprs]-[A-Za-z0-9\-]{10,}",
        in_commands: true,
    },
    SecretPattern {
        id: "slack-webhook",
        regex: r"https://hooks\.slack\.com/services/T[A-Z0-9]+/B[A-Z0-9]+/[A-Za-z0-9]+",
        in_commands: true,
    },
    SecretPattern {
        id: "stripe-live-key",
        regex: r"[sr]k_live_[A-Za-z0-9]{16,}",
        in_commands: true,
    },
    SecretPattern {
        id: "private-key-block",
        regex: r"-----BEGIN\s+(RSA\s+|EC\s+|OPENSSH\s+)?PRIVATE\s+KEY-----",
        in_commands: true,
    },
    SecretPattern {
        id: "docker-login-password",
        regex: r"docker\s+login.*\s(-p|--password)\s+[^\s$]",
        in_commands: true,
    },
    SecretPattern {
        id: "jwt",
        regex: r"eyJ[A-Za-z0-9_\-]{10,}\.eyJ[A-Za-z0-9_\-]{10,}\.[A-Za-z0-9_\-]{10,}",
        in_commands: true,
    },
    SecretPattern {
        id: "credential-assignment",
        regex: r"(?i)^[A-Z0-9_]*(API[_-]?KEY|SECRET|TOKEN|PASSWORD|PASSWD|ACCESS[_-]?KEY|PRIVATE[_-]?KEY|CREDENTIALS?)[A-Z0-9_]*=[A-Za-z0-9+/=_\-.]{8,}$",
        in_commands: false,
    },
];

/// Secret shapes, compiled once.
#[derive(Debug, Clone)]
pub struct SecretPatterns {
    compiled: Vec<(&'static str, Regex, bool)>,
}

impl SecretPatterns {
    pub fn compile() -> Result<Self> {
        let compiled = SECRET_PATTERNS
            .iter()
            .map(|p| {
                Regex::new(p.regex)
                    .map(|re| (p.id, re, p.in_commands))
                    .map_err(|e| EngineError::Config(format!("secret pattern '{}': {}", p.id, e)))
            })
            .collect::<Result<_>>()?;
        Ok(Self { compiled })
    }

    /// First pattern matching an environment entry.
    pub fn match_env(&self, name: &str, value: &str) -> Option<&'static str> {
        let entry = format!("{}={}", name, value);
        self.compiled
            .iter()
            .find(|(_, re, _)| re.is_match(&entry))
            .map(|(id, _, _)| *id)
    }

    /// First token-shaped secret inside a command, with the matched text.
    pub fn match_command<'c>(&self, command: &'c str) -> Option<(&'static str, &'c str)> {
        self.compiled
            .iter()
            .filter(|(_, _, in_commands)| *in_commands)
            .find_map(|(id, re, _)| re.find(command).map(|m| (*id, m.as_str())))
    }
}

/// Keep the first four characters, mask the rest.
pub fn redact(value: &str) -> String {
    if value.chars().count() <= 4 {
        "****".to_string()
    } else {
        let head: String = value.chars().take(4).collect();
        format!("{}****", head)
    }
}

/// Detect literal secrets in environment values and commands.
pub fn detect_secrets(ctx: &RuleContext<'_>) -> std::result::Result<Vec<Finding>, RuleError> {
    let mut findings = Vec::new();
    let patterns = ctx.secrets;

    let mut scan_env = |env: &IndexMap<String, EnvValue>,
                        source: SecretSource,
                        job: Option<&str>,
                        step: Option<usize>| {
        for (name, value) in env {
            let EnvValue::Literal(raw) = value else { continue };
            if let Some(pattern) = patterns.match_env(name, raw) {
                findings.push(secret_finding(source, Some(name.clone()), pattern, raw, job, step));
            }
        }
    };

    scan_env(ctx.dag.env(), SecretSource::PipelineEnv, None, None);
    for job in ctx.dag.jobs() {
        scan_env(&job.env, SecretSource::JobEnv, Some(job.id.as_str()), None);
        for (idx, step) in job.steps.iter().enumerate() {
            scan_env(&step.env, SecretSource::StepEnv, Some(job.id.as_str()), Some(idx));
        }
    }

    for job in ctx.dag.jobs() {
        for (idx, step) in job.steps.iter().enumerate() {
            let Some(command) = step.command() else { continue };
            if let Some((pattern, matched)) = patterns.match_command(command) {
                findings.push(secret_finding(
                    SecretSource::Command,
                    None,
                    pattern,
                    matched,
                    Some(job.id.as_str()),
                    Some(idx),
                ));
            }
        }
    }

    Ok(findings)
}

fn secret_finding(
    source: SecretSource,
    variable: Option<String>,
    pattern: &'static str,
    raw: &str,
    job: Option<&str>,
    step: Option<usize>,
) -> Finding {
    let rationale = match (&variable, job) {
        (Some(var), Some(job)) => format!("'{}' in job '{}' holds a literal {}", var, job, pattern),
        (Some(var), None) => format!("pipeline variable '{}' holds a literal {}", var, pattern),
        (None, Some(job)) => format!("a command in job '{}' contains a literal {}", job, pattern),
        (None, None) => format!("literal {}", pattern),
    };
    Finding {
        kind: FindingKind::HardcodedSecret {
            source,
            variable,
            pattern,
            redacted: redact(raw),
        },
        severity: Severity::Critical,
        job: job.map(String::from),
        step,
        related_jobs: job.map(|j| vec![j.to_string()]).unwrap_or_default(),
        rationale,
        impact: Impact::Risk {
            level: RiskLevel::Critical,
        },
    }
}

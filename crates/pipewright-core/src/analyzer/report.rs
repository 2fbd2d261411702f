use crate::graph::CriticalPath;
use crate::parser::PlatformKind;
use serde::Serialize;
use std::fmt;

/// Severity level for analysis findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn priority(&self) -> u8 {
        match self {
            Severity::Critical => 4,
            Severity::High => 3,
            Severity::Medium => 2,
            Severity::Low => 1,
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
            Severity::Low => "LOW",
        }
    }

    /// Points taken off the optimization score per finding.
    pub fn penalty(&self) -> f64 {
        match self {
            Severity::Critical => 1.5,
            Severity::High => 1.0,
            Severity::Medium => 0.5,
            Severity::Low => 0.1,
        }
    }
}

/// Identifies a rule in the rule table and in `rule-evaluation-skipped` findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleId {
    DuplicateDependencyInstall,
    MissingCache,
    HardcodedSecret,
    SerializableJobChain,
    ExcessiveSequentialStage,
    UnguardedDeploy,
    FloatingRunnerImage,
}

impl RuleId {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleId::DuplicateDependencyInstall => "duplicate-dependency-install",
            RuleId::MissingCache => "missing-cache",
            RuleId::HardcodedSecret => "hardcoded-secret",
            RuleId::SerializableJobChain => "serializable-job-chain",
            RuleId::ExcessiveSequentialStage => "excessive-sequential-stage",
            RuleId::UnguardedDeploy => "unguarded-deploy",
            RuleId::FloatingRunnerImage => "floating-runner-image",
        }
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A step, addressed by job id and position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRef {
    pub job: String,
    pub step: usize,
}

/// Where a hardcoded secret was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SecretSource {
    PipelineEnv,
    JobEnv,
    StepEnv,
    Command,
}

/// Rule-specific payload, tagged with the finding kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum FindingKind {
    DuplicateDependencyInstall {
        command: String,
        occurrences: Vec<StepRef>,
    },
    MissingCache {
        command: String,
    },
    HardcodedSecret {
        source: SecretSource,
        /// Variable name, absent for secrets inside a command.
        variable: Option<String>,
        pattern: &'static str,
        redacted: String,
    },
    SerializableJobChain {
        upstream: String,
        downstream: String,
        critical_path_delta_secs: f64,
    },
    ExcessiveSequentialStage {
        critical_path_secs: f64,
        longest_layer_secs: f64,
        multiple: f64,
    },
    UnguardedDeploy {
        ancestors: Vec<String>,
    },
    FloatingRunnerImage {
        image: String,
    },
    RuleEvaluationSkipped {
        rule: RuleId,
        error: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// What fixing a finding is worth.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Impact {
    TimeSaved { secs: f64 },
    Risk { level: RiskLevel },
}

/// A single analysis finding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    #[serde(flatten)]
    pub kind: FindingKind,
    pub severity: Severity,
    /// Job the finding applies to. `None` for pipeline-wide findings.
    pub job: Option<String>,
    pub step: Option<usize>,
    pub related_jobs: Vec<String>,
    pub rationale: String,
    pub impact: Impact,
}

impl Finding {
    pub fn kind_name(&self) -> &'static str {
        let rule = match &self.kind {
            FindingKind::DuplicateDependencyInstall { .. } => RuleId::DuplicateDependencyInstall,
            FindingKind::MissingCache { .. } => RuleId::MissingCache,
            FindingKind::HardcodedSecret { .. } => RuleId::HardcodedSecret,
            FindingKind::SerializableJobChain { .. } => RuleId::SerializableJobChain,
            FindingKind::ExcessiveSequentialStage { .. } => RuleId::ExcessiveSequentialStage,
            FindingKind::UnguardedDeploy { .. } => RuleId::UnguardedDeploy,
            FindingKind::FloatingRunnerImage { .. } => RuleId::FloatingRunnerImage,
            FindingKind::RuleEvaluationSkipped { .. } => return "rule-evaluation-skipped",
        };
        rule.as_str()
    }

    pub fn savings_secs(&self) -> Option<f64> {
        match self.impact {
            Impact::TimeSaved { secs } => Some(secs),
            Impact::Risk { .. } => None,
        }
    }

    pub fn savings_display(&self) -> String {
        match self.impact {
            Impact::TimeSaved { secs } => format_duration(secs),
            Impact::Risk { level } => format!("{:?} risk", level).to_lowercase(),
        }
    }

    pub(crate) fn skipped(rule: RuleId, error: &dyn std::error::Error) -> Self {
        Finding {
            kind: FindingKind::RuleEvaluationSkipped {
                rule,
                error: error.to_string(),
            },
            severity: Severity::Low,
            job: None,
            step: None,
            related_jobs: Vec::new(),
            rationale: format!("rule '{}' could not be evaluated", rule),
            impact: Impact::Risk {
                level: RiskLevel::Low,
            },
        }
    }
}

/// Severity first (critical first), then job id, then step index. The sort is
/// stable, so equal keys keep discovery order.
pub fn sort_findings(findings: &mut [Finding]) {
    findings.sort_by(|a, b| {
        b.severity
            .priority()
            .cmp(&a.severity.priority())
            .then_with(|| a.job.cmp(&b.job))
            .then_with(|| a.step.cmp(&b.step))
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Health {
    Excellent,
    Good,
    NeedsImprovement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportMetrics {
    /// 10 minus severity penalties, never below 1.
    pub optimization_score: f64,
    pub overall_health: Health,
    pub complexity: Complexity,
    pub potential_improvement_pct: f64,
}

impl ReportMetrics {
    pub fn compute(
        findings: &[Finding],
        job_count: usize,
        edge_count: usize,
        current_secs: f64,
        optimized_secs: f64,
    ) -> Self {
        let penalty: f64 = findings.iter().map(|f| f.severity.penalty()).sum();
        let optimization_score = ((10.0 - penalty).max(1.0) * 10.0).round() / 10.0;

        let overall_health = if optimization_score >= 8.5 {
            Health::Excellent
        } else if optimization_score >= 7.0 {
            Health::Good
        } else {
            Health::NeedsImprovement
        };

        let complexity = if job_count > 10 || edge_count > 8 {
            Complexity::High
        } else if job_count > 5 || edge_count > 3 {
            Complexity::Medium
        } else {
            Complexity::Low
        };

        let potential_improvement_pct = if current_secs > 0.0 {
            ((current_secs - optimized_secs) / current_secs * 100.0).max(0.0)
        } else {
            0.0
        };

        Self {
            optimization_score,
            overall_health,
            complexity,
            potential_improvement_pct,
        }
    }
}

/// The complete analysis report for a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub pipeline_name: String,
    pub platform: PlatformKind,
    pub job_count: usize,
    pub step_count: usize,
    pub edge_count: usize,
    pub layers: Vec<Vec<String>>,
    pub max_parallelism: usize,
    pub critical_path: CriticalPath,
    /// Sum of all job durations, as if run one at a time.
    pub total_job_secs: f64,
    /// Critical path once every time-saving finding is applied.
    pub optimized_duration_secs: f64,
    pub findings: Vec<Finding>,
    pub metrics: ReportMetrics,
}

impl AnalysisReport {
    pub fn count(&self, severity: Severity) -> usize {
        self.findings.iter().filter(|f| f.severity == severity).count()
    }

    pub fn total_savings_secs(&self) -> f64 {
        self.findings.iter().filter_map(Finding::savings_secs).sum()
    }
}

/// Format seconds into a human-readable duration string.
pub fn format_duration(secs: f64) -> String {
    let total_secs = secs.round() as u64;
    let minutes = total_secs / 60;
    let seconds = total_secs % 60;
    if minutes > 0 {
        format!("{}:{:02}", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(severity: Severity, job: Option<&str>, step: Option<usize>, image: &str) -> Finding {
        Finding {
            kind: FindingKind::FloatingRunnerImage { image: image.into() },
            severity,
            job: job.map(String::from),
            step,
            related_jobs: Vec::new(),
            rationale: String::new(),
            impact: Impact::Risk { level: RiskLevel::Low },
        }
    }

    #[test]
    fn test_sort_order() {
        let mut findings = vec![
            finding(Severity::Low, Some("a"), None, "1"),
            finding(Severity::Critical, Some("z"), Some(2), "2"),
            finding(Severity::Critical, Some("b"), Some(3), "3"),
            finding(Severity::Critical, Some("b"), Some(1), "4"),
            finding(Severity::Low, Some("a"), None, "5"),
        ];
        sort_findings(&mut findings);
        let order: Vec<_> = findings
            .iter()
            .map(|f| match &f.kind {
                FindingKind::FloatingRunnerImage { image } => image.as_str(),
                _ => "",
            })
            .collect();
        assert_eq!(order, vec!["4", "3", "2", "1", "5"]);
    }

    #[test]
    fn test_finding_serializes_with_kind_tag() {
        let floating = finding(Severity::Low, Some("a"), None, "node:latest");
        let json = serde_json::to_value(floating).unwrap();
        assert_eq!(json["kind"], "floating-runner-image");
        assert_eq!(json["image"], "node:latest");
        assert_eq!(json["severity"], "low");
        assert_eq!(json["impact"]["type"], "risk");
    }

    #[test]
    fn test_metrics() {
        let findings = vec![finding(Severity::Critical, None, None, "x"); 2];
        let metrics = ReportMetrics::compute(&findings, 12, 2, 600.0, 450.0);
        assert_eq!(metrics.optimization_score, 7.0);
        assert_eq!(metrics.overall_health, Health::Good);
        assert_eq!(metrics.complexity, Complexity::High);
        assert_eq!(metrics.potential_improvement_pct, 25.0);

        let findings = vec![finding(Severity::Critical, None, None, "x"); 9];
        let metrics = ReportMetrics::compute(&findings, 1, 0, 0.0, 0.0);
        assert_eq!(metrics.optimization_score, 1.0);
        assert_eq!(metrics.overall_health, Health::NeedsImprovement);
        assert_eq!(metrics.complexity, Complexity::Low);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(45.0), "45s");
        assert_eq!(format_duration(125.0), "2:05");
    }
}

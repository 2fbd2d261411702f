use colored::*;
use pipewright_core::analyzer::report::{
    format_duration, AnalysisReport, Complexity, Finding, Health, Severity,
};
use pipewright_core::profiler::{StackCategory, TechStackProfile};
use pipewright_core::synth::{GeneratedPipeline, Tier};
use similar::{ChangeTag, TextDiff};
use std::path::Path;

/// Print a full analysis report to the terminal.
pub fn print_analysis_report(report: &AnalysisReport, source: &Path) {
    println!();
    println!(
        "{}",
        format!(
            " Pipewright v{} - Analyzing {}",
            env!("CARGO_PKG_VERSION"),
            source.display()
        )
        .bold()
    );
    println!();

    println!(" {}", "Pipeline Structure".bold().underline());
    println!(
        " {} {} jobs, {} steps, {} dependencies",
        "|-".dimmed(),
        report.job_count,
        report.step_count,
        report.edge_count
    );
    println!(
        " {} {} layers, max parallelism {}",
        "|-".dimmed(),
        report.layers.len(),
        report.max_parallelism
    );
    println!(
        " {} Critical path: {} ({})",
        "|-".dimmed(),
        report.critical_path.jobs.join(" -> "),
        format_duration(report.critical_path.duration_secs)
    );
    println!(" {} Platform: {}", "|-".dimmed(), report.platform.to_string().cyan());
    println!();

    println!(" {}", "=".repeat(60).dimmed());
    println!();

    if report.findings.is_empty() {
        println!(
            " {} No findings. The pipeline looks good!",
            "OK".green().bold()
        );
    } else {
        for finding in &report.findings {
            print_finding(finding);
            println!();
        }
    }

    println!(" {}", "=".repeat(60).dimmed());
    println!();

    println!(" {}", "Summary".bold().underline());
    println!(
        " {} Critical path:                 {}",
        "|-".dimmed(),
        format_duration(report.critical_path.duration_secs)
    );
    println!(
        " {} Optimized projection:          {}",
        "|-".dimmed(),
        format_duration(report.optimized_duration_secs).green()
    );
    println!(
        " {} Total job time:                {}",
        "|-".dimmed(),
        format_duration(report.total_job_secs)
    );
    println!(
        " {} Potential improvement:         {:.1}%",
        "|-".dimmed(),
        report.metrics.potential_improvement_pct
    );

    let critical = report.count(Severity::Critical);
    let high = report.count(Severity::High);
    println!(
        " {} Findings: {} critical, {} high, {} medium, {} low",
        "|-".dimmed(),
        if critical > 0 {
            critical.to_string().red().bold().to_string()
        } else {
            "0".to_string()
        },
        if high > 0 {
            high.to_string().yellow().bold().to_string()
        } else {
            "0".to_string()
        },
        report.count(Severity::Medium),
        report.count(Severity::Low),
    );
    println!(
        " {} Optimization score: {}/10 ({}), complexity {}",
        "|-".dimmed(),
        format!("{:.1}", report.metrics.optimization_score).bold(),
        health_label(report.metrics.overall_health),
        complexity_label(report.metrics.complexity)
    );
    println!();

    if !report.findings.is_empty() {
        println!(
            " Run {} to convert it to another platform",
            format!("pipewright render {} --to <platform>", source.display()).cyan()
        );
    }
    println!();
}

fn severity_tag(severity: Severity) -> String {
    let tag = format!(" {} ", severity.symbol());
    match severity {
        Severity::Critical => tag.on_red().white().bold().to_string(),
        Severity::High => tag.on_yellow().black().bold().to_string(),
        Severity::Medium => tag.on_blue().white().bold().to_string(),
        Severity::Low => tag.dimmed().to_string(),
    }
}

fn print_finding(finding: &Finding) {
    let location = match (&finding.job, finding.step) {
        (Some(job), Some(step)) => format!(" [{} step {}]", job, step + 1),
        (Some(job), None) => format!(" [{}]", job),
        _ => String::new(),
    };
    println!(
        " {} {}{}",
        severity_tag(finding.severity),
        finding.kind_name().bold(),
        location.dimmed()
    );
    println!("   {} {}", "|".dimmed(), finding.rationale);

    let impact = finding.savings_display();
    if finding.savings_secs().is_some() {
        println!("   {} Estimated savings: {}/run", "|".dimmed(), impact.green());
    } else {
        println!("   {} Impact: {}", "|".dimmed(), impact.yellow());
    }

    let others: Vec<&str> = finding
        .related_jobs
        .iter()
        .map(String::as_str)
        .filter(|j| Some(*j) != finding.job.as_deref())
        .collect();
    if !others.is_empty() {
        println!("   {} Related: {}", "|".dimmed(), others.join(", ").dimmed());
    }
}

fn health_label(health: Health) -> ColoredString {
    match health {
        Health::Excellent => "excellent".green(),
        Health::Good => "good".cyan(),
        Health::NeedsImprovement => "needs improvement".yellow(),
    }
}

fn complexity_label(complexity: Complexity) -> &'static str {
    match complexity {
        Complexity::Low => "low",
        Complexity::Medium => "medium",
        Complexity::High => "high",
    }
}

fn confidence_bar(confidence: f64) -> String {
    let filled = (confidence * 10.0).round().clamp(0.0, 10.0) as usize;
    format!("{}{}", "#".repeat(filled), ".".repeat(10 - filled))
}

/// Print a tech-stack profile.
pub fn print_profile(profile: &TechStackProfile, root: &Path) {
    println!();
    println!(
        "{}",
        format!(" Pipewright - Tech stack of {}", root.display()).bold()
    );
    println!();

    if profile.is_empty() {
        println!(
            " {} Nothing recognised in {} files.",
            "!!".yellow().bold(),
            profile.files_scanned
        );
        println!();
        return;
    }

    for category in StackCategory::ALL {
        let detections = profile.detections(category);
        if detections.is_empty() {
            continue;
        }
        println!(" {}", category.to_string().bold().underline());
        for detection in detections {
            println!(
                " {} {:<16} {} {:.0}%",
                "|-".dimmed(),
                detection.technology,
                confidence_bar(detection.confidence).cyan(),
                detection.confidence * 100.0
            );
        }
        println!();
    }

    println!(
        " {} files scanned, overall confidence {:.0}%",
        profile.files_scanned,
        profile.overall_confidence * 100.0
    );
    println!();
}

fn tier_label(tier: Option<Tier>) -> ColoredString {
    match tier {
        Some(tier) => tier.to_string().green(),
        None => "off".dimmed(),
    }
}

/// Print what was generated and why. The pipeline text itself goes to the
/// output file or stdout separately.
pub fn print_generation_summary(generated: &GeneratedPipeline, written_to: Option<&Path>) {
    let report = &generated.report;
    let rendered = &generated.rendered;

    eprintln!();
    eprintln!(
        "{}",
        format!(
            " Pipewright - Generated {} pipeline ({})",
            rendered.platform, rendered.path
        )
        .bold()
    );
    eprintln!();

    eprintln!(" {}", "Stack".bold().underline());
    eprintln!(" {} Toolchain: {}", "|-".dimmed(), report.toolchain.cyan());
    for choice in &report.stack {
        eprintln!(
            " {} {}: {} ({:.0}%)",
            "|-".dimmed(),
            choice.category,
            choice.technology,
            choice.confidence * 100.0
        );
    }
    if let Some(target) = report.deployment_target {
        eprintln!(" {} Deploys to: {}", "|-".dimmed(), target.as_str().cyan());
    }
    eprintln!();

    eprintln!(" {}", "Capabilities".bold().underline());
    let caps = &report.capabilities;
    eprintln!(" {} testing: {}", "|-".dimmed(), tier_label(caps.testing));
    eprintln!(" {} security-scanning: {}", "|-".dimmed(), tier_label(caps.security_scanning));
    eprintln!(" {} deployment: {}", "|-".dimmed(), tier_label(caps.deployment));
    eprintln!(" {} monitoring: {}", "|-".dimmed(), tier_label(caps.monitoring));
    eprintln!();

    eprintln!(" {}", "Jobs".bold().underline());
    for job in generated.graph.jobs() {
        let stage = rendered.stages.get(&job.id).map(String::as_str).unwrap_or("-");
        let reason = report.job_reasons.get(&job.id).map(String::as_str).unwrap_or("");
        eprintln!(
            " {} {:<20} {:<12} {}",
            "|-".dimmed(),
            job.id.bold(),
            stage.cyan(),
            reason.dimmed()
        );
    }
    eprintln!();

    let metrics = &report.metrics;
    eprintln!(" {}", "Summary".bold().underline());
    eprintln!(
        " {} Critical path: {} ({})",
        "|-".dimmed(),
        report.critical_path.jobs.join(" -> "),
        format_duration(report.critical_path.duration_secs)
    );
    eprintln!(
        " {} {} layers, max parallelism {}",
        "|-".dimmed(),
        report.layer_count,
        report.max_parallelism
    );
    eprintln!(
        " {} Complexity {} (score {:.1}), maintenance {}, setup ~{} min",
        "|-".dimmed(),
        complexity_label(metrics.complexity),
        metrics.complexity_score,
        complexity_label(metrics.maintenance_effort),
        metrics.estimated_setup_minutes
    );
    for warning in &report.warnings {
        eprintln!(" {} {}", "!!".yellow().bold(), warning);
    }
    if let Some(path) = written_to {
        eprintln!();
        eprintln!(" Pipeline written to {}", path.display().to_string().green());
    }
    eprintln!();
}

/// Print render warnings to stderr.
pub fn print_warnings(warnings: &[String]) {
    for warning in warnings {
        eprintln!(" {} {}", "!!".yellow().bold(), warning);
    }
}

/// Print a diff between the original and the rendered pipeline.
pub fn print_diff(original: &str, rendered: &str, filename: &str) {
    println!();
    println!("{}", format!(" Pipewright - Diff for {}", filename).bold());
    println!();

    let diff = TextDiff::from_lines(original, rendered);
    let mut has_changes = false;

    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Delete => {
                has_changes = true;
                print!("{}", format!("- {}", change).red());
            }
            ChangeTag::Insert => {
                has_changes = true;
                print!("{}", format!("+ {}", change).green());
            }
            ChangeTag::Equal => {
                print!("  {}", change);
            }
        }
    }

    if !has_changes {
        println!(" {}", "No changes.".green());
    }
    println!();
}

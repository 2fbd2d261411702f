mod display;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use pipewright_core::analyzer::report::AnalysisReport;
use pipewright_core::synth::{
    Capability, CapabilitySetting, Compliance, DeploymentTarget, GenerationRequest, PerformanceTier,
    Requirements, StackSource, TeamSize, Tier,
};
use pipewright_core::{CancelFlag, Engine, EngineConfig, FileEntry, PipelineGraph, PlatformKind};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Directories never worth profiling.
const SKIPPED_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "vendor",
    "dist",
    "build",
    ".venv",
    "__pycache__",
];

/// Manifests larger than this are listed without content.
const MAX_CONTENT_BYTES: u64 = 512 * 1024;

#[derive(Parser)]
#[command(
    name = "pipewright",
    version,
    about = "Pipewright - CI/CD pipeline analyzer and generator",
    long_about = "Analyze CI/CD pipelines for bottlenecks, profile a project's tech stack, \
                  and generate pipelines for GitHub Actions, GitLab CI, Jenkins, \
                  Azure Pipelines or plain YAML."
)]
struct Cli {
    /// Engine configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log engine internals to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze pipeline definitions for bottlenecks and risks
    Analyze {
        /// Pipeline file, or a directory of YAML pipeline files
        #[arg(default_value = ".github/workflows/")]
        path: PathBuf,

        /// Platform of the definitions (detected when omitted)
        #[arg(short, long)]
        platform: Option<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Give up on a file after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Detect the tech stack of a project directory
    Profile {
        /// Project root
        #[arg(default_value = ".")]
        dir: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Generate a pipeline for a project directory
    Generate {
        /// Project root
        #[arg(default_value = ".")]
        dir: PathBuf,

        /// Target platform
        #[arg(short, long)]
        platform: String,

        /// Compliance standards (SOC2, GDPR, HIPAA, PCI-DSS, ISO27001)
        #[arg(long, value_delimiter = ',')]
        compliance: Vec<String>,

        /// Performance tier (standard, high)
        #[arg(long)]
        performance: Option<String>,

        /// Team size (small, medium, large)
        #[arg(long)]
        team_size: Option<String>,

        /// Deployment target (aws, azure, gcp, heroku, vercel, kubernetes, generic)
        #[arg(long)]
        deploy_target: Option<String>,

        /// Capabilities to turn off
        #[arg(long, value_delimiter = ',')]
        disable: Vec<String>,

        /// Capabilities to run at the full tier
        #[arg(long, value_delimiter = ',')]
        full: Vec<String>,

        /// Pipeline name
        #[arg(long)]
        name: Option<String>,

        /// Output file path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Re-render a pipeline, optionally for another platform
    Render {
        /// Pipeline file
        path: PathBuf,

        /// Platform of the input (detected when omitted)
        #[arg(long)]
        from: Option<String>,

        /// Platform to render for
        #[arg(long)]
        to: String,

        /// Show a diff against the input instead of the output
        #[arg(long)]
        diff: bool,

        /// Output file path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "pipewright", &mut std::io::stdout());
        return Ok(());
    }

    let engine = Arc::new(load_engine(cli.config.as_deref())?);

    match cli.command {
        Commands::Analyze {
            path,
            platform,
            format,
            timeout_secs,
        } => cmd_analyze(engine, &path, platform.as_deref(), format, timeout_secs),
        Commands::Profile { dir, format } => cmd_profile(&engine, &dir, format),
        Commands::Generate {
            dir,
            platform,
            compliance,
            performance,
            team_size,
            deploy_target,
            disable,
            full,
            name,
            output,
            format,
        } => {
            let requirements = build_requirements(
                &compliance,
                performance.as_deref(),
                team_size.as_deref(),
                deploy_target.as_deref(),
                &disable,
                &full,
            )?;
            let platform = parse_platform(&platform)?;
            cmd_generate(&engine, &dir, platform, requirements, name, output.as_deref(), format)
        }
        Commands::Render {
            path,
            from,
            to,
            diff,
            output,
        } => cmd_render(&engine, &path, from.as_deref(), &to, diff, output.as_deref()),
        Commands::Completions { .. } => Ok(()),
    }
}

/// Logs go to stderr so JSON on stdout stays clean. `RUST_LOG` wins over `-v`.
fn init_logging(verbose: bool) {
    let default = if verbose { "pipewright_core=debug,pipewright=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .init();
}

fn load_engine(path: Option<&Path>) -> Result<Engine> {
    let config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            EngineConfig::from_toml_str(&content)
                .with_context(|| format!("Invalid config {}", path.display()))?
        }
        None => EngineConfig::default(),
    };
    Engine::new(config).context("Invalid engine configuration")
}

fn parse_platform(raw: &str) -> Result<PlatformKind> {
    raw.parse::<PlatformKind>().map_err(anyhow::Error::from)
}

fn parse_setting<T>(raw: Option<&str>, what: &str) -> Result<Option<T>>
where
    T: std::str::FromStr<Err = String>,
{
    raw.map(|r| {
        r.parse::<T>()
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("Invalid {what}"))
    })
    .transpose()
}

fn build_requirements(
    compliance: &[String],
    performance: Option<&str>,
    team_size: Option<&str>,
    deploy_target: Option<&str>,
    disable: &[String],
    full: &[String],
) -> Result<Requirements> {
    let mut requirements = Requirements {
        compliance: compliance
            .iter()
            .map(|c| c.parse::<Compliance>().map_err(anyhow::Error::msg))
            .collect::<Result<_>>()?,
        performance: parse_setting::<PerformanceTier>(performance, "performance tier")?
            .unwrap_or_default(),
        team_size: parse_setting::<TeamSize>(team_size, "team size")?.unwrap_or_default(),
        deployment_target: parse_setting::<DeploymentTarget>(deploy_target, "deployment target")?,
        ..Requirements::default()
    };
    for raw in full {
        let capability = raw.parse::<Capability>().map_err(anyhow::Error::msg)?;
        requirements.capabilities.set(capability, CapabilitySetting::Tier(Tier::Full));
    }
    for raw in disable {
        let capability = raw.parse::<Capability>().map_err(anyhow::Error::msg)?;
        requirements.capabilities.set(capability, CapabilitySetting::Enabled(false));
    }
    Ok(requirements)
}

fn discover_pipeline_files(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    if path.is_dir() {
        let mut files: Vec<PathBuf> = Vec::new();
        for ext in ["yml", "yaml"] {
            let pattern = format!("{}/**/*.{}", path.display(), ext);
            files.extend(
                glob::glob(&pattern)
                    .context("Failed to read glob pattern")?
                    .filter_map(|r| r.ok()),
            );
        }
        let jenkinsfile = path.join("Jenkinsfile");
        if jenkinsfile.is_file() {
            files.push(jenkinsfile);
        }
        files.sort();
        return Ok(files);
    }

    anyhow::bail!("Path '{}' does not exist", path.display());
}

/// Run the rules on a blocking thread, cancelling them once the deadline passes.
async fn analyze_with_deadline(
    engine: Arc<Engine>,
    dag: PipelineGraph,
    timeout_secs: Option<u64>,
) -> Result<AnalysisReport> {
    let cancel = CancelFlag::new();
    let task = {
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || engine.analyze_cancellable(&dag, &cancel))
    };
    let joined = match timeout_secs {
        Some(secs) => match tokio::time::timeout(Duration::from_secs(secs), task).await {
            Ok(joined) => joined,
            Err(_) => {
                cancel.cancel();
                anyhow::bail!("analysis did not finish within {secs}s");
            }
        },
        None => task.await,
    };
    Ok(joined.context("Analysis task failed")??)
}

fn cmd_analyze(
    engine: Arc<Engine>,
    path: &Path,
    platform: Option<&str>,
    format: OutputFormat,
    timeout_secs: Option<u64>,
) -> Result<()> {
    let platform = platform.map(parse_platform).transpose()?;
    let files = discover_pipeline_files(path)?;

    if files.is_empty() {
        anyhow::bail!(
            "No pipeline files found at '{}'. \
            Make sure the path points to a pipeline file or a directory of YAML files.",
            path.display()
        );
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;

    let mut reports = Vec::new();
    for file in &files {
        let content = std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read {}", file.display()))?;
        let dag = engine
            .normalize(&content, platform)
            .with_context(|| format!("Failed to parse {}", file.display()))?;
        let report = runtime
            .block_on(analyze_with_deadline(Arc::clone(&engine), dag, timeout_secs))
            .with_context(|| format!("Failed to analyze {}", file.display()))?;

        match format {
            OutputFormat::Json => reports.push(FileReport {
                file: file.display().to_string(),
                report,
            }),
            OutputFormat::Text => display::print_analysis_report(&report, file),
        }
    }

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    }
    Ok(())
}

#[derive(Serialize)]
struct FileReport {
    file: String,
    report: AnalysisReport,
}

/// Relative file listing of `root`, with content for the files profiling reads.
fn collect_files(root: &Path) -> Result<Vec<FileEntry>> {
    if !root.is_dir() {
        anyhow::bail!("'{}' is not a directory", root.display());
    }
    let pattern = format!("{}/**/*", glob::Pattern::escape(&root.display().to_string()));
    let mut entries = Vec::new();
    let paths = glob::glob(&pattern).context("Failed to read glob pattern")?;
    for path in paths.filter_map(|r| r.ok()) {
        if !path.is_file() {
            continue;
        }
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        if relative
            .components()
            .any(|c| c.as_os_str().to_str().is_some_and(|name| SKIPPED_DIRS.contains(&name)))
        {
            continue;
        }

        let entry = FileEntry::new(relative.to_string_lossy());
        let small = std::fs::metadata(&path).map(|m| m.len() <= MAX_CONTENT_BYTES).unwrap_or(false);
        if entry.needs_content() && small {
            match std::fs::read_to_string(&path) {
                Ok(content) => entries.push(FileEntry::with_content(entry.path, content)),
                Err(err) => {
                    tracing::debug!(
                        path = %path.display(),
                        error = %err,
                        "listing file without content"
                    );
                    entries.push(entry);
                }
            }
        } else {
            entries.push(entry);
        }
    }
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

fn cmd_profile(engine: &Engine, dir: &Path, format: OutputFormat) -> Result<()> {
    let files = collect_files(dir).with_context(|| format!("Failed to list {}", dir.display()))?;
    let profile = engine.profile(&files);
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&profile)?),
        OutputFormat::Text => display::print_profile(&profile, dir),
    }
    Ok(())
}

#[derive(Serialize)]
struct GenerateOutput<'a> {
    generated_at: String,
    #[serde(flatten)]
    pipeline: &'a pipewright_core::GeneratedPipeline,
}

fn cmd_generate(
    engine: &Engine,
    dir: &Path,
    platform: PlatformKind,
    requirements: Requirements,
    name: Option<String>,
    output: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    let files = collect_files(dir).with_context(|| format!("Failed to list {}", dir.display()))?;
    let request = GenerationRequest {
        platform,
        stack: StackSource::Files(files),
        requirements,
        name,
    };
    let generated = engine.generate(&request).context("Failed to generate a pipeline")?;

    if let Some(path) = output {
        std::fs::write(path, &generated.rendered.content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    match format {
        OutputFormat::Json => {
            let out = GenerateOutput {
                generated_at: chrono::Utc::now().to_rfc3339(),
                pipeline: &generated,
            };
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Text => {
            if output.is_none() {
                print!("{}", generated.rendered.content);
            }
            display::print_generation_summary(&generated, output);
        }
    }
    Ok(())
}

fn cmd_render(
    engine: &Engine,
    path: &Path,
    from: Option<&str>,
    to: &str,
    show_diff: bool,
    output: Option<&Path>,
) -> Result<()> {
    let from = from.map(parse_platform).transpose()?;
    let to = parse_platform(to)?;
    let original = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let dag = engine
        .normalize(&original, from)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    let rendered = engine
        .render(&dag, to)
        .with_context(|| format!("Failed to render {} for {}", path.display(), to))?;
    display::print_warnings(&rendered.warnings);

    if show_diff {
        display::print_diff(&original, &rendered.content, &path.to_string_lossy());
        return Ok(());
    }

    match output {
        Some(out_path) => {
            std::fs::write(out_path, &rendered.content)
                .with_context(|| format!("Failed to write {}", out_path.display()))?;
            println!("Rendered {} pipeline written to {}", to, out_path.display());
        }
        None => print!("{}", rendered.content),
    }
    Ok(())
}

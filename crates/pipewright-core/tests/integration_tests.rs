use pipewright_core::analyzer::report::{FindingKind, Severity};
use pipewright_core::graph::{self, critical_path, DurationModel};
use pipewright_core::parser::dag::{Job, PipelineGraphBuilder, Step};
use pipewright_core::parser::detect_platform;
use pipewright_core::profiler::StackCategory;
use pipewright_core::synth::{Compliance, GenerationRequest, Requirements, StackSource};
use pipewright_core::{Engine, EngineConfig, EngineError, FileEntry, PipelineGraph, PlatformKind};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Get the workspace root (two levels up from CARGO_MANIFEST_DIR of pipewright-core).
fn fixtures_dir() -> PathBuf {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    Path::new(manifest_dir)
        .parent()
        .unwrap() // crates/
        .parent()
        .unwrap() // workspace root
        .join("tests/fixtures")
}

fn fixture(platform: &str, name: &str) -> String {
    let path = fixtures_dir().join(platform).join(name);
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("{}: {}", path.display(), e))
}

fn engine() -> Engine {
    Engine::new(EngineConfig::default()).unwrap()
}

fn count(report: &pipewright_core::AnalysisReport, pred: impl Fn(&FindingKind) -> bool) -> usize {
    report.findings.iter().filter(|f| pred(&f.kind)).count()
}

/// Listing of a fixture project, with content for the files profiling reads.
fn project_files(name: &str) -> Vec<FileEntry> {
    let root = fixtures_dir().join("projects").join(name);
    let mut files = Vec::new();
    let mut dirs = vec![root.clone()];
    while let Some(dir) = dirs.pop() {
        for entry in std::fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                dirs.push(path);
                continue;
            }
            let relative = path.strip_prefix(&root).unwrap().to_string_lossy().to_string();
            let entry = FileEntry::new(relative);
            if entry.needs_content() {
                let content = std::fs::read_to_string(&path).unwrap();
                files.push(FileEntry::with_content(entry.path, content));
            } else {
                files.push(entry);
            }
        }
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    files
}

// ─── Platform fixtures ───

#[test]
fn test_fixture_platforms_are_detected() {
    let cases = [
        ("github-actions", "unoptimized-fullstack.yml", PlatformKind::GithubActions),
        ("gitlab-ci", "simple-pipeline.yml", PlatformKind::GitlabCi),
        ("jenkins", "Jenkinsfile", PlatformKind::Jenkins),
        ("azure-pipelines", "multi-stage.yml", PlatformKind::AzurePipelines),
        ("generic", "pipeline.yml", PlatformKind::Generic),
    ];
    for (dir, name, expected) in cases {
        assert_eq!(detect_platform(&fixture(dir, name)), expected, "{dir}/{name}");
    }
}

#[test]
fn test_analyze_unoptimized_fullstack() {
    let report = engine()
        .analyze(&fixture("github-actions", "unoptimized-fullstack.yml"), None)
        .unwrap();

    assert_eq!(report.job_count, 5);
    assert_eq!(report.platform, PlatformKind::GithubActions);
    assert_eq!(report.findings[0].severity, Severity::Critical);
    assert!(count(&report, |k| matches!(k, FindingKind::HardcodedSecret { .. })) >= 1);
    assert_eq!(count(&report, |k| matches!(k, FindingKind::MissingCache { .. })), 3);
    assert_eq!(count(&report, |k| matches!(k, FindingKind::UnguardedDeploy { .. })), 0);

    let duplicates: Vec<_> = report
        .findings
        .iter()
        .filter_map(|f| match &f.kind {
            FindingKind::DuplicateDependencyInstall { occurrences, .. } => Some(occurrences),
            _ => None,
        })
        .collect();
    assert_eq!(duplicates.len(), 1);
    assert_eq!(duplicates[0].len(), 3);

    assert!(report.optimized_duration_secs <= report.critical_path.duration_secs);
    assert!(report.metrics.optimization_score < 10.0);
}

#[test]
fn test_optimized_example_scores_higher() {
    let engine = engine();
    let slow = engine
        .analyze(&fixture("github-actions", "unoptimized-fullstack.yml"), None)
        .unwrap();
    let fast = engine.analyze(&fixture("github-actions", "optimized.yml"), None).unwrap();

    assert!(fast.findings.len() < slow.findings.len());
    assert!(fast.metrics.optimization_score > slow.metrics.optimization_score);
    for finding in &fast.findings {
        assert!(
            !matches!(
                finding.kind,
                FindingKind::MissingCache { .. }
                    | FindingKind::DuplicateDependencyInstall { .. }
                    | FindingKind::HardcodedSecret { .. }
                    | FindingKind::UnguardedDeploy { .. }
            ),
            "unexpected {:?}",
            finding.kind
        );
    }
}

#[test]
fn test_gitlab_stages_and_unknown_keys() {
    let engine = engine();
    let content = fixture("gitlab-ci", "simple-pipeline.yml");
    let dag = engine.normalize(&content, None).unwrap();

    assert_eq!(dag.job_count(), 4);
    assert_eq!(dag.get_job("unit").unwrap().needs, vec!["build"]);
    assert_eq!(dag.get_job("lint").unwrap().needs, vec!["build"]);
    assert_eq!(dag.get_job("deploy-prod").unwrap().needs, vec!["unit", "lint"]);
    assert!(dag.get_job("unit").unwrap().metadata.contains_key("interruptible"));

    let report = engine.analyze_graph(&dag).unwrap();
    assert!(report.findings.iter().any(|f| matches!(
        &f.kind,
        FindingKind::HardcodedSecret { variable: Some(v), .. } if v == "DB_PASSWORD"
    )));
    assert!(report.findings.iter().any(|f| matches!(
        &f.kind,
        FindingKind::FloatingRunnerImage { image } if image == "node:latest"
    )));
    assert_eq!(count(&report, |k| matches!(k, FindingKind::MissingCache { .. })), 0);

    let rendered = engine.render(&dag, PlatformKind::GitlabCi).unwrap();
    assert!(rendered.content.contains("interruptible"));
    assert!(rendered.content.contains("environment"));
    let again = engine.normalize(&rendered.content, Some(PlatformKind::GitlabCi)).unwrap();
    assert_eq!(again.job_ids(), dag.job_ids());
    assert_eq!(again.get_job("deploy-prod").unwrap().needs, vec!["unit", "lint"]);
}

#[test]
fn test_jenkins_parallel_checks() {
    let engine = engine();
    let dag = engine.normalize(&fixture("jenkins", "Jenkinsfile"), None).unwrap();

    assert_eq!(dag.platform(), PlatformKind::Jenkins);
    assert_eq!(dag.job_count(), 4);
    assert_eq!(dag.get_job("Deploy").unwrap().needs, vec!["Unit Tests", "Lint"]);
    assert_eq!(dag.get_job("Lint").unwrap().stage.as_deref(), Some("Checks"));
    assert!(!dag.env()["DEPLOY_KEY"].is_literal());

    let report = engine.analyze_graph(&dag).unwrap();
    assert_eq!(count(&report, |k| matches!(k, FindingKind::UnguardedDeploy { .. })), 0);
    assert!(count(&report, |k| matches!(k, FindingKind::MissingCache { .. })) >= 1);

    let github = engine.render(&dag, PlatformKind::GithubActions).unwrap();
    let converted = engine.normalize(&github.content, None).unwrap();
    assert_eq!(converted.platform(), PlatformKind::GithubActions);
    assert_eq!(converted.job_count(), dag.job_count());
}

#[test]
fn test_azure_multi_stage() {
    let engine = engine();
    let dag = engine
        .normalize(&fixture("azure-pipelines", "multi-stage.yml"), None)
        .unwrap();

    assert_eq!(dag.job_count(), 4);
    assert_eq!(dag.get_job("UnitTests").unwrap().needs, vec!["Compile"]);
    assert_eq!(dag.get_job("Release").unwrap().needs, vec!["UnitTests", "Audit"]);
    assert!(dag.get_job("Compile").unwrap().steps[0].is_lockfile_cache());
    assert!(dag.get_job("Release").unwrap().metadata.contains_key("environment"));

    let report = engine.analyze_graph(&dag).unwrap();
    assert_eq!(count(&report, |k| matches!(k, FindingKind::MissingCache { .. })), 0);
    assert_eq!(count(&report, |k| matches!(k, FindingKind::HardcodedSecret { .. })), 0);
    assert_eq!(count(&report, |k| matches!(k, FindingKind::UnguardedDeploy { .. })), 0);

    let rendered = engine.render(&dag, PlatformKind::AzurePipelines).unwrap();
    assert_eq!(rendered.path, "azure-pipelines.yml");
    assert!(rendered.content.contains("environment: production"));
}

#[test]
fn test_generic_pipeline() {
    let engine = engine();
    let dag = engine.normalize(&fixture("generic", "pipeline.yml"), None).unwrap();

    assert_eq!(dag.platform(), PlatformKind::Generic);
    assert_eq!(dag.name(), "service");
    let build = dag.get_job("build").unwrap();
    assert_eq!(build.resources.cpu, Some(4));
    assert!(build.steps[0].is_lockfile_cache());
    assert_eq!(dag.get_job("release").unwrap().needs, vec!["test", "clippy"]);
    assert!(dag.get_job("release").unwrap().metadata.contains_key("notify"));

    let layers = graph::layers(&dag);
    assert_eq!(layers.len(), 3);
    assert_eq!(graph::max_parallelism(&dag), 2);

    let rendered = engine.render(&dag, PlatformKind::Generic).unwrap();
    assert!(rendered.content.contains("notify:"));
}

#[test]
fn test_oversized_definition_is_rejected() {
    let mut config = EngineConfig::default();
    config.analysis.max_definition_bytes = 200;
    let engine = Engine::new(config).unwrap();
    let err = engine
        .normalize(&fixture("github-actions", "unoptimized-fullstack.yml"), None)
        .unwrap_err();
    assert!(matches!(err, EngineError::MalformedDefinition { .. }));
}

#[test]
fn test_unknown_platform_suggests_closest() {
    let err = "gitlub".parse::<PlatformKind>().unwrap_err();
    match err {
        EngineError::UnknownPlatform { given, suggestion } => {
            assert_eq!(given, "gitlub");
            assert_eq!(suggestion.as_deref(), Some("gitlab-ci"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

// ─── Graph properties ───

fn random_dag(rng: &mut StdRng, size: usize) -> PipelineGraph {
    let commands = [
        "npm ci",
        "npm test",
        "cargo build",
        "make",
        "echo hi",
        "pytest",
        "docker build .",
    ];
    let mut builder = PipelineGraphBuilder::new("random", PlatformKind::Generic);
    for i in 0..size {
        let mut job = Job::new(format!("j{i}"), format!("job {i}"));
        for s in 0..rng.gen_range(1..4) {
            let command = commands[rng.gen_range(0..commands.len())];
            job.steps.push(Step::run(format!("step {s}"), command));
        }
        for dep in 0..i {
            if rng.gen_bool(0.3) {
                job.needs_job(&format!("j{dep}"));
            }
        }
        builder.add_job(job);
    }
    builder.build().unwrap()
}

/// Summed durations of every root-to-leaf chain.
fn chain_durations(dag: &PipelineGraph, durations: &[f64]) -> Vec<f64> {
    fn walk(dag: &PipelineGraph, durations: &[f64], id: &str, acc: f64, out: &mut Vec<f64>) {
        let idx = dag.node_index(id).unwrap().index();
        let total = acc + durations[idx];
        let children: Vec<&Job> = dag.jobs().filter(|j| j.needs.iter().any(|n| n == id)).collect();
        if children.is_empty() {
            out.push(total);
        }
        for child in children {
            walk(dag, durations, &child.id, total, out);
        }
    }
    let mut out = Vec::new();
    for root in dag.jobs().filter(|j| j.needs.is_empty()) {
        walk(dag, durations, &root.id, 0.0, &mut out);
    }
    out
}

#[test]
fn test_layering_respects_every_edge() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..50 {
        let size = rng.gen_range(1..12);
        let dag = random_dag(&mut rng, size);
        let layers = graph::layers(&dag);
        let layer_of = |id: &str| layers.iter().position(|l| l.iter().any(|j| j == id)).unwrap();

        let placed: usize = layers.iter().map(Vec::len).sum();
        assert_eq!(placed, dag.job_count());
        for job in dag.jobs() {
            for need in &job.needs {
                assert!(layer_of(&job.id) > layer_of(need), "{} before {}", need, job.id);
            }
        }
        assert_eq!(
            graph::max_parallelism(&dag),
            layers.iter().map(Vec::len).max().unwrap_or(0)
        );
    }
}

#[test]
fn test_critical_path_is_the_longest_chain() {
    let model = DurationModel::default();
    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..50 {
        let size = rng.gen_range(1..10);
        let dag = random_dag(&mut rng, size);
        let durations = model.job_durations(&dag).unwrap();
        let path = critical_path(&dag, &durations);

        let chains = chain_durations(&dag, &durations);
        let longest = chains.iter().cloned().fold(0.0, f64::max);
        assert!((path.duration_secs - longest).abs() < 1e-6);
        for chain in chains {
            assert!(path.duration_secs + 1e-6 >= chain);
        }

        let summed: f64 = path
            .jobs
            .iter()
            .map(|id| durations[dag.node_index(id).unwrap().index()])
            .sum();
        assert!((summed - path.duration_secs).abs() < 1e-6);
    }
}

#[test]
fn test_three_job_cycle_is_rejected() {
    let mut builder = PipelineGraphBuilder::new("cycle", PlatformKind::Generic);
    for (id, need) in [("A", "C"), ("B", "A"), ("C", "B")] {
        let mut job = Job::new(id, id);
        job.steps.push(Step::run("noop", "true"));
        job.needs_job(need);
        builder.add_job(job);
    }
    match builder.build() {
        Err(EngineError::CyclicDependency { jobs }) => {
            let members: BTreeSet<&str> = jobs.iter().map(String::as_str).collect();
            assert_eq!(members, BTreeSet::from(["A", "B", "C"]));
            assert_eq!(jobs.len(), 3);
        }
        other => panic!("expected a cycle, got {other:?}"),
    }
}

// ─── Rule engine properties ───

#[test]
fn test_analysis_is_deterministic() {
    let engine = engine();
    let dag = engine
        .normalize(&fixture("github-actions", "unoptimized-fullstack.yml"), None)
        .unwrap();
    let first = engine.analyze_graph(&dag).unwrap();
    let second = engine.analyze_graph(&dag).unwrap();
    assert_eq!(first.findings, second.findings);
    assert_eq!(first, second);
}

#[test]
fn test_two_uncached_npm_installs() {
    let yaml = r#"
on: push
jobs:
  web:
    runs-on: ubuntu-22.04
    steps:
      - run: npm install
      - run: npm run build
  api:
    runs-on: ubuntu-22.04
    steps:
      - run: npm install --no-fund
      - run: npm test
"#;
    let report = engine().analyze(yaml, None).unwrap();
    let duplicates: Vec<_> = report
        .findings
        .iter()
        .filter(|f| matches!(f.kind, FindingKind::DuplicateDependencyInstall { .. }))
        .collect();
    assert_eq!(duplicates.len(), 1);
    assert_eq!(duplicates[0].severity, Severity::Medium);
    let related: BTreeSet<&str> = duplicates[0].related_jobs.iter().map(String::as_str).collect();
    assert_eq!(related, BTreeSet::from(["api", "web"]));
}

// ─── Profiling and generation ───

#[test]
fn test_profile_next_app() {
    let engine = engine();
    let files = project_files("next-app");
    let profile = engine.profile(&files);

    assert!(profile.confidence(StackCategory::Framework, "Next.js") > 0.0);
    assert!(profile.confidence(StackCategory::ContainerTooling, "Docker") > 0.0);
    assert!(profile.has(StackCategory::Language, "TypeScript"));
    assert!(profile.has(StackCategory::Database, "PostgreSQL"));
    assert_eq!(profile.files_scanned, files.len());
    assert_eq!(engine.profile(&files), profile);
}

#[test]
fn test_generate_for_every_platform() {
    let engine = engine();
    let requirements = Requirements {
        compliance: BTreeSet::from([Compliance::Soc2]),
        ..Requirements::default()
    };

    for platform in PlatformKind::ALL {
        let request = GenerationRequest {
            platform,
            stack: StackSource::Files(project_files("next-app")),
            requirements: requirements.clone(),
            name: None,
        };
        let generated = engine.generate(&request).unwrap();

        let ancestors: Vec<&str> = generated
            .graph
            .ancestors("deploy")
            .iter()
            .map(|j| j.id.as_str())
            .collect();
        assert!(ancestors.contains(&"vulnerability-scan"), "{platform}");
        assert_eq!(generated.rendered.path, platform.file_path(), "{platform}");

        let report = engine.analyze_graph(&generated.graph).unwrap();
        for finding in &report.findings {
            assert!(
                !matches!(
                    finding.kind,
                    FindingKind::MissingCache { .. } | FindingKind::UnguardedDeploy { .. }
                ),
                "{platform}: {:?}",
                finding.kind
            );
        }

        let reparsed = engine.normalize(&generated.rendered.content, Some(platform)).unwrap();
        assert_eq!(reparsed.job_count(), generated.graph.job_count(), "{platform}");
    }
}

#[test]
fn test_generation_request_from_json() {
    let json = r#"{
        "platform": "github-actions",
        "stack": { "files": [
            { "path": "pyproject.toml", "content": "[tool.poetry]\nname = \"api\"\n\n[tool.poetry.dependencies]\nfastapi = \"^0.111\"\n" },
            { "path": "poetry.lock" },
            { "path": "app/main.py" }
        ] },
        "requirements": {
            "compliance": ["HIPAA"],
            "team-size": "large"
        },
        "name": "api"
    }"#;
    let request: GenerationRequest = serde_json::from_str(json).unwrap();
    let generated = engine().generate(&request).unwrap();

    assert_eq!(generated.report.toolchain, "poetry");
    assert!(generated.graph.get_job("health-check").is_some());
    assert!(generated.graph.get_job("unit-tests").is_some());
    assert!(generated.graph.get_job("lint").is_some());
    assert!(generated.report.job_reasons["health-check"].contains("HIPAA"));

    let serialized = serde_json::to_value(&generated).unwrap();
    assert_eq!(serialized["rendered"]["path"], ".github/workflows/ci.yml");
    assert!(serialized["report"]["critical_path"]["jobs"].is_array());
}

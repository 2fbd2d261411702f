//! The engine facade.
//!
//! An [`Engine`] compiles its tables once from an [`EngineConfig`] and is then
//! shared read-only across threads. Every operation is a pure function of its
//! inputs and those tables.

use crate::analyzer::report::AnalysisReport;
use crate::analyzer::secrets::SecretPatterns;
use crate::analyzer::{self, RuleContext};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::graph::DurationModel;
use crate::parser::dag::PipelineGraph;
use crate::parser::{self, PlatformKind};
use crate::profiler::{FileEntry, Profiler, TechStackProfile};
use crate::synth::{self, GeneratedPipeline, GenerationRequest, RenderedPipeline};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag asking a running analysis to give up.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Engine {
    config: EngineConfig,
    durations: DurationModel,
    secrets: SecretPatterns,
    profiler: Profiler,
}

impl Engine {
    /// Validate `config` and build the lookup tables.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let durations = DurationModel::from_config(&config);
        let secrets = SecretPatterns::compile()?;
        let profiler = Profiler::new(config.profiler.top_k)?;
        tracing::debug!(
            overrides = config.durations.len(),
            top_k = config.profiler.top_k,
            "engine ready"
        );
        Ok(Self {
            config,
            durations,
            secrets,
            profiler,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn durations(&self) -> &DurationModel {
        &self.durations
    }

    /// Parse a definition into the common graph, detecting the platform when
    /// none is given.
    pub fn normalize(
        &self,
        content: &str,
        platform: Option<PlatformKind>,
    ) -> Result<PipelineGraph> {
        parser::normalize_with_limit(content, platform, self.config.analysis.max_definition_bytes)
    }

    /// Normalize and analyze in one call.
    pub fn analyze(&self, content: &str, platform: Option<PlatformKind>) -> Result<AnalysisReport> {
        let dag = self.normalize(content, platform)?;
        self.analyze_graph(&dag)
    }

    pub fn analyze_graph(&self, dag: &PipelineGraph) -> Result<AnalysisReport> {
        self.analyze_cancellable(dag, &CancelFlag::new())
    }

    /// Analyze, discarding everything if `cancel` is set before the rules
    /// finish.
    pub fn analyze_cancellable(
        &self,
        dag: &PipelineGraph,
        cancel: &CancelFlag,
    ) -> Result<AnalysisReport> {
        let ctx = RuleContext::new(dag, &self.durations, &self.config.analysis, &self.secrets);
        analyzer::analyze(&ctx, cancel)
    }

    pub fn profile(&self, files: &[FileEntry]) -> TechStackProfile {
        self.profiler.profile(files)
    }

    pub fn generate(&self, request: &GenerationRequest) -> Result<GeneratedPipeline> {
        synth::synthesize(request, &self.profiler, &self.durations)
    }

    /// Render a graph for `platform`, which need not be the one it came from.
    pub fn render(&self, dag: &PipelineGraph, platform: PlatformKind) -> Result<RenderedPipeline> {
        synth::render(dag, platform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::report::FindingKind;
    use crate::config::DurationOverride;
    use crate::error::EngineError;
    use crate::synth::{Requirements, StackSource};

    const WORKFLOW: &str = r#"
name: CI
on: push
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - uses: actions/checkout@v4
      - run: npm ci
      - run: npm run build
  deploy:
    needs: build
    runs-on: ubuntu-latest
    steps:
      - run: ./deploy.sh
"#;

    fn engine() -> Engine {
        Engine::new(EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_engine_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Engine>();
        assert_send_sync::<CancelFlag>();
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = EngineConfig::default();
        config.profiler.top_k = 0;
        assert!(matches!(Engine::new(config), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_analyze_reports_unguarded_deploy() {
        let report = engine().analyze(WORKFLOW, None).unwrap();
        assert_eq!(report.platform, PlatformKind::GithubActions);
        assert!(report
            .findings
            .iter()
            .any(|f| matches!(f.kind, FindingKind::UnguardedDeploy { .. })));
        assert!(report
            .findings
            .iter()
            .any(|f| matches!(f.kind, FindingKind::MissingCache { .. })));
    }

    #[test]
    fn test_size_limit_comes_from_config() {
        let mut config = EngineConfig::default();
        config.analysis.max_definition_bytes = 64;
        let engine = Engine::new(config).unwrap();
        assert!(matches!(
            engine.normalize(WORKFLOW, None),
            Err(EngineError::MalformedDefinition { .. })
        ));
    }

    #[test]
    fn test_duration_overrides_move_the_critical_path() {
        let base = engine().analyze(WORKFLOW, None).unwrap();

        let mut config = EngineConfig::default();
        config.durations.push(DurationOverride {
            pattern: "deploy.sh".into(),
            secs: 600.0,
        });
        let slow = Engine::new(config).unwrap().analyze(WORKFLOW, None).unwrap();
        assert!(slow.critical_path.duration_secs > base.critical_path.duration_secs);
    }

    #[test]
    fn test_cancelled_flag_discards_the_report() {
        let engine = engine();
        let dag = engine.normalize(WORKFLOW, None).unwrap();
        let cancel = CancelFlag::new();
        let clone = cancel.clone();
        clone.cancel();
        assert!(cancel.is_cancelled());
        assert!(matches!(
            engine.analyze_cancellable(&dag, &cancel),
            Err(EngineError::Cancelled)
        ));
    }

    #[test]
    fn test_render_converts_between_platforms() {
        let engine = engine();
        let dag = engine.normalize(WORKFLOW, None).unwrap();
        let rendered = engine.render(&dag, PlatformKind::GitlabCi).unwrap();
        assert_eq!(rendered.path, ".gitlab-ci.yml");
        let back = engine.normalize(&rendered.content, None).unwrap();
        assert_eq!(back.platform(), PlatformKind::GitlabCi);
        assert_eq!(back.job_ids(), dag.job_ids());
    }

    #[test]
    fn test_generate_from_profile() {
        let engine = engine();
        let profile = engine.profile(&[
            FileEntry::with_content(
                "Cargo.toml",
                "[package]\nname = \"svc\"\n\n[dependencies]\naxum = \"0.7\"\n",
            ),
            FileEntry::new("Cargo.lock"),
            FileEntry::new("src/main.rs"),
        ]);
        let request = GenerationRequest {
            platform: PlatformKind::GithubActions,
            stack: StackSource::Profile(profile),
            requirements: Requirements::default(),
            name: Some("service".into()),
        };
        let generated = engine.generate(&request).unwrap();
        assert_eq!(generated.report.toolchain, "cargo");
        assert_eq!(generated.graph.name(), "service");
        assert!(generated.rendered.content.contains("cargo"));
    }
}

pub mod analyzer;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod parser;
pub mod profiler;
pub mod synth;

pub use analyzer::report::{AnalysisReport, Finding, FindingKind, Severity};
pub use config::EngineConfig;
pub use engine::{CancelFlag, Engine};
pub use error::{EngineError, Result, SourceLocation};
pub use parser::dag::{DagEdge, Job, PipelineGraph, PipelineGraphBuilder, Step};
pub use parser::PlatformKind;
pub use profiler::{FileEntry, StackCategory, TechStackProfile};
pub use synth::{GeneratedPipeline, GenerationRequest, RenderedPipeline, Requirements};

//! Tech-stack profiling over a project file listing.
//!
//! Every signature in [`signatures::SIGNATURES`] adds its weight at most once
//! to its (category, technology) pair. A technology's confidence is its score
//! divided by the largest weight sum any technology in the same category can
//! reach, so a project matching every signature of the strongest technology
//! scores 1.0.

pub mod manifests;
pub mod signatures;

use crate::error::{EngineError, Result};
use indexmap::IndexMap;
use manifests::ManifestDependencies;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use signatures::{Matcher, Signature, SIGNATURES};
use std::collections::BTreeMap;
use std::fmt;

/// One entry of a project file listing. `content` is only needed for manifests
/// and files that content signatures look into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl FileEntry {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: normalize_path(&path.into()),
            content: None,
        }
    }

    pub fn with_content(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: normalize_path(&path.into()),
            content: Some(content.into()),
        }
    }

    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    pub fn extension(&self) -> Option<&str> {
        let name = self.file_name();
        name.rfind('.').filter(|i| *i > 0).map(|i| &name[i + 1..])
    }

    /// Directory names leading to the file.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        let mut parts: Vec<&str> = self.path.split('/').collect();
        parts.pop();
        parts.into_iter()
    }

    /// Whether profiling looks inside this file, so a listing should carry
    /// its content.
    pub fn needs_content(&self) -> bool {
        manifests::is_manifest(self.file_name())
            || SIGNATURES.iter().any(|s| match s.matcher {
                Matcher::Content { suffixes, .. } => {
                    suffixes.iter().any(|suffix| self.path.ends_with(suffix))
                }
                _ => false,
            })
    }
}

fn normalize_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    path.trim_start_matches("./").to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StackCategory {
    Language,
    Framework,
    Database,
    ContainerTooling,
    IacTooling,
    TestFramework,
    PackageManager,
}

impl StackCategory {
    pub const ALL: [StackCategory; 7] = [
        StackCategory::Language,
        StackCategory::Framework,
        StackCategory::Database,
        StackCategory::ContainerTooling,
        StackCategory::IacTooling,
        StackCategory::TestFramework,
        StackCategory::PackageManager,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StackCategory::Language => "language",
            StackCategory::Framework => "framework",
            StackCategory::Database => "database",
            StackCategory::ContainerTooling => "container-tooling",
            StackCategory::IacTooling => "iac-tooling",
            StackCategory::TestFramework => "test-framework",
            StackCategory::PackageManager => "package-manager",
        }
    }
}

impl fmt::Display for StackCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A technology and how sure the profiler is about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub technology: String,
    pub confidence: f64,
}

/// Ranked technologies per category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TechStackProfile {
    #[serde(default)]
    pub categories: IndexMap<StackCategory, Vec<Detection>>,
    /// Mean confidence of the top technology across non-empty categories.
    #[serde(default)]
    pub overall_confidence: f64,
    #[serde(default)]
    pub files_scanned: usize,
}

impl TechStackProfile {
    pub fn detections(&self, category: StackCategory) -> &[Detection] {
        self.categories.get(&category).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn top(&self, category: StackCategory) -> Option<&Detection> {
        self.detections(category).first()
    }

    /// Confidence of `technology` (case-insensitive), 0.0 when undetected.
    pub fn confidence(&self, category: StackCategory, technology: &str) -> f64 {
        self.detections(category)
            .iter()
            .find(|d| d.technology.eq_ignore_ascii_case(technology))
            .map_or(0.0, |d| d.confidence)
    }

    pub fn has(&self, category: StackCategory, technology: &str) -> bool {
        self.confidence(category, technology) > 0.0
    }

    pub fn is_empty(&self) -> bool {
        self.categories.values().all(Vec::is_empty)
    }
}

enum CompiledMatcher {
    Static(Matcher),
    Glob(glob::Pattern),
}

struct CompiledSignature {
    signature: &'static Signature,
    matcher: CompiledMatcher,
}

/// Signature table compiled once and shared across profiling calls.
pub struct Profiler {
    signatures: Vec<CompiledSignature>,
    /// Largest per-technology weight sum in each category.
    ceilings: BTreeMap<StackCategory, f64>,
    top_k: usize,
}

impl Profiler {
    pub fn new(top_k: usize) -> Result<Self> {
        let signatures = SIGNATURES
            .iter()
            .map(|signature| -> Result<CompiledSignature> {
                let matcher = match signature.matcher {
                    Matcher::Glob(pattern) => {
                        let compiled = glob::Pattern::new(pattern).map_err(|e| {
                            EngineError::Config(format!("signature glob '{}': {}", pattern, e))
                        })?;
                        CompiledMatcher::Glob(compiled)
                    }
                    other => CompiledMatcher::Static(other),
                };
                Ok(CompiledSignature { signature, matcher })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut sums: BTreeMap<(StackCategory, &str), f64> = BTreeMap::new();
        for s in SIGNATURES {
            *sums.entry((s.category, s.technology)).or_default() += s.weight;
        }
        let mut ceilings: BTreeMap<StackCategory, f64> = BTreeMap::new();
        for ((category, _), sum) in sums {
            let ceiling = ceilings.entry(category).or_default();
            *ceiling = ceiling.max(sum);
        }

        Ok(Self {
            signatures,
            ceilings,
            top_k: top_k.max(1),
        })
    }

    /// Profile a file listing. The same listing always yields the same profile.
    pub fn profile(&self, files: &[FileEntry]) -> TechStackProfile {
        let manifests = ManifestDependencies::collect(files);

        let ranked: Vec<(StackCategory, Vec<Detection>)> = StackCategory::ALL
            .par_iter()
            .map(|category| (*category, self.rank(*category, files, &manifests)))
            .collect();

        let categories: IndexMap<StackCategory, Vec<Detection>> = ranked.into_iter().collect();
        let tops: Vec<f64> = categories
            .values()
            .filter_map(|d| d.first())
            .map(|d| d.confidence)
            .collect();
        let overall_confidence = if tops.is_empty() {
            0.0
        } else {
            tops.iter().sum::<f64>() / tops.len() as f64
        };

        tracing::debug!(
            files = files.len(),
            detected = tops.len(),
            overall_confidence,
            "tech stack profiled"
        );

        TechStackProfile {
            categories,
            overall_confidence,
            files_scanned: files.len(),
        }
    }

    fn rank(
        &self,
        category: StackCategory,
        files: &[FileEntry],
        manifests: &ManifestDependencies,
    ) -> Vec<Detection> {
        let ceiling = self.ceilings.get(&category).copied().unwrap_or(0.0);
        if ceiling <= 0.0 {
            return Vec::new();
        }

        let mut scores: BTreeMap<&str, f64> = BTreeMap::new();
        for compiled in self.signatures.iter().filter(|s| s.signature.category == category) {
            if matches(&compiled.matcher, files, manifests) {
                let signature = compiled.signature;
                *scores.entry(signature.technology).or_default() += signature.weight;
            }
        }

        let mut detections: Vec<Detection> = scores
            .into_iter()
            .map(|(technology, score)| Detection {
                technology: technology.to_string(),
                confidence: round3((score / ceiling).clamp(0.0, 1.0)),
            })
            .filter(|d| d.confidence > 0.0)
            .collect();
        detections.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.technology.cmp(&b.technology))
        });
        detections.truncate(self.top_k);
        detections
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

fn matches(
    matcher: &CompiledMatcher,
    files: &[FileEntry],
    manifests: &ManifestDependencies,
) -> bool {
    let matcher = match matcher {
        CompiledMatcher::Glob(pattern) => return files.iter().any(|f| pattern.matches(&f.path)),
        CompiledMatcher::Static(m) => m,
    };
    match matcher {
        Matcher::FileName(names) => files.iter().any(|f| names.contains(&f.file_name())),
        Matcher::Suffix(suffixes) => {
            files.iter().any(|f| suffixes.iter().any(|s| f.path.ends_with(s)))
        }
        Matcher::Segment(segments) => files
            .iter()
            .any(|f| f.segments().any(|seg| segments.contains(&seg))),
        Matcher::Extension(exts) => files
            .iter()
            .any(|f| f.extension().is_some_and(|e| exts.iter().any(|x| x.eq_ignore_ascii_case(e)))),
        Matcher::Dependency(deps) => deps.iter().any(|(eco, name)| manifests.declares(*eco, name)),
        Matcher::Content { suffixes, needle } => files.iter().any(|f| {
            suffixes.iter().any(|s| f.path.ends_with(s))
                && f.content
                    .as_deref()
                    .is_some_and(|c| c.to_lowercase().contains(needle))
        }),
        // Compiled separately above.
        Matcher::Glob(_) => false,
    }
}

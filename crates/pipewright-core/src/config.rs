use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};

/// Engine configuration.
///
/// Every field has a default, so an empty TOML document is a valid config.
/// Loaded once and turned into the read-only tables held by [`crate::Engine`].
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct EngineConfig {
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Extra duration table entries, consulted before the built-in table.
    #[serde(default)]
    pub durations: Vec<DurationOverride>,

    #[serde(default)]
    pub profiler: ProfilerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct AnalysisConfig {
    /// Duration assumed for a step that matches no table entry.
    #[serde(default = "default_step_secs")]
    pub default_step_secs: f64,

    /// `excessive-sequential-stage` fires when the critical path exceeds this
    /// multiple of the longest single layer.
    #[serde(default = "default_sequential_multiple")]
    pub sequential_multiple: f64,

    /// Definitions longer than this are rejected before parsing.
    #[serde(default = "default_max_definition_bytes")]
    pub max_definition_bytes: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            default_step_secs: default_step_secs(),
            sequential_multiple: default_sequential_multiple(),
            max_definition_bytes: default_max_definition_bytes(),
        }
    }
}

/// A user-supplied duration entry. `pattern` is matched as a case-insensitive
/// substring of the step's action reference or command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct DurationOverride {
    pub pattern: String,
    pub secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct ProfilerConfig {
    /// Technologies kept per category.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_step_secs() -> f64 {
    30.0
}

fn default_sequential_multiple() -> f64 {
    2.0
}

fn default_max_definition_bytes() -> usize {
    50_000
}

fn default_top_k() -> usize {
    5
}

impl EngineConfig {
    /// Parse a TOML document into a config.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        let a = &self.analysis;
        if !a.default_step_secs.is_finite() || a.default_step_secs < 0.0 {
            return Err(EngineError::Config(format!(
                "default-step-secs must be a non-negative number, got {}",
                a.default_step_secs
            )));
        }
        if !a.sequential_multiple.is_finite() || a.sequential_multiple < 1.0 {
            return Err(EngineError::Config(format!(
                "sequential-multiple must be at least 1.0, got {}",
                a.sequential_multiple
            )));
        }
        if a.max_definition_bytes == 0 {
            return Err(EngineError::Config(
                "max-definition-bytes must be greater than zero".to_string(),
            ));
        }
        if self.profiler.top_k == 0 {
            return Err(EngineError::Config("top-k must be at least 1".to_string()));
        }
        if let Some(empty) = self.durations.iter().find(|d| d.pattern.trim().is_empty()) {
            return Err(EngineError::Config(format!(
                "duration override with {}s has an empty pattern",
                empty.secs
            )));
        }
        if let Some(bad) = self
            .durations
            .iter()
            .find(|d| !d.secs.is_finite() || d.secs < 0.0)
        {
            return Err(EngineError::Config(format!(
                "duration override '{}' must be a non-negative number, got {}",
                bad.pattern, bad.secs
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.analysis.default_step_secs, 30.0);
        assert_eq!(config.analysis.sequential_multiple, 2.0);
        assert_eq!(config.profiler.top_k, 5);
    }

    #[test]
    fn test_parse_overrides() {
        let config = EngineConfig::from_toml_str(
            r#"
[analysis]
default-step-secs = 45.0
sequential-multiple = 3.0

[[durations]]
pattern = "make e2e"
secs = 900.0

[profiler]
top-k = 2
"#,
        )
        .unwrap();
        assert_eq!(config.analysis.default_step_secs, 45.0);
        assert_eq!(config.analysis.max_definition_bytes, 50_000);
        assert_eq!(config.durations.len(), 1);
        assert_eq!(config.durations[0].pattern, "make e2e");
        assert_eq!(config.profiler.top_k, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = EngineConfig::default();
        config.analysis.sequential_multiple = 0.5;
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));

        let mut config = EngineConfig::default();
        config.profiler.top_k = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_wrong_value_type_is_an_error() {
        let err =
            EngineConfig::from_toml_str("[analysis]\ndefault-step-secs = \"slow\"").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }
}

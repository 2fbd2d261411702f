use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Where in a pipeline definition a problem was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct SourceLocation {
    /// Dotted key path, e.g. `jobs.build.needs`. Empty for the document root.
    pub path: String,
    pub line: Option<usize>,
    pub column: Option<usize>,
}

impl SourceLocation {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn at(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            line: None,
            column: None,
        }
    }

    pub(crate) fn from_yaml(err: &serde_yaml::Error) -> Self {
        match err.location() {
            Some(loc) => Self {
                path: String::new(),
                line: Some(loc.line()),
                column: Some(loc.column()),
            },
            None => Self::root(),
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = if self.path.is_empty() { "<root>" } else { &self.path };
        match (self.line, self.column) {
            (Some(line), Some(col)) => write!(f, "{} (line {}, column {})", path, line, col),
            (Some(line), None) => write!(f, "{} (line {})", path, line),
            _ => write!(f, "{}", path),
        }
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Malformed pipeline definition at {location}: {message}")]
    MalformedDefinition {
        location: SourceLocation,
        message: String,
    },

    #[error("Cyclic dependency between jobs: {}", jobs.join(" -> "))]
    CyclicDependency { jobs: Vec<String> },

    #[error("Requirement conflict: {reason}")]
    RequirementConflict { reason: String },

    #[error("Unknown platform '{given}'{}", did_you_mean(suggestion))]
    UnknownPlatform {
        given: String,
        suggestion: Option<String>,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to render {platform} pipeline: {message}")]
    Render { platform: String, message: String },

    #[error("Evaluation cancelled before completion")]
    Cancelled,
}

impl EngineError {
    pub(crate) fn malformed(location: SourceLocation, message: impl Into<String>) -> Self {
        EngineError::MalformedDefinition {
            location,
            message: message.into(),
        }
    }
}

fn did_you_mean(suggestion: &Option<String>) -> String {
    suggestion
        .as_ref()
        .map(|s| format!(" (did you mean '{s}'?)"))
        .unwrap_or_default()
}

pub type Result<T> = std::result::Result<T, EngineError>;

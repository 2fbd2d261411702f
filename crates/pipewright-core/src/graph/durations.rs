use crate::config::EngineConfig;
use crate::parser::dag::{command_segments, Job, PipelineGraph, Step, StepAction};
use thiserror::Error;

/// Seconds for restoring a cache, hit or miss.
pub const CACHE_RESTORE_SECS: f64 = 10.0;

/// Action reference prefixes (lowercase) and their typical cost.
const ACTION_TABLE: &[(&str, f64)] = &[
    ("actions/checkout", 12.0),
    ("checkout", 12.0),
    ("actions/setup-", 15.0),
    ("nodetool@", 15.0),
    ("usepythonversion@", 15.0),
    ("usedotnet@", 15.0),
    ("javatoolinstaller@", 15.0),
    ("gotool@", 15.0),
    ("swatinem/rust-cache", 10.0),
    ("docker/build-push-action", 300.0),
    ("docker@", 300.0),
    ("actions/upload-artifact", 15.0),
    ("actions/download-artifact", 15.0),
    ("publishpipelineartifact", 15.0),
    ("downloadpipelineartifact", 15.0),
    ("stash", 5.0),
    ("unstash", 5.0),
];

/// Command substrings (lowercase) and their typical cost. First match wins per
/// simple command, so `a && b` costs as much as `a` and `b` on separate lines.
const COMMAND_TABLE: &[(&str, f64)] = &[
    ("npm install", 180.0),
    ("npm ci", 180.0),
    ("npm i ", 180.0),
    ("yarn install", 180.0),
    ("pnpm install", 180.0),
    ("pip install", 120.0),
    ("pip3 install", 120.0),
    ("poetry install", 120.0),
    ("pipenv install", 120.0),
    ("bundle install", 150.0),
    ("composer install", 90.0),
    ("go mod download", 60.0),
    ("cargo fetch", 60.0),
    ("dotnet restore", 90.0),
    ("mvn dependency:go-offline", 180.0),
    ("cargo build", 300.0),
    ("go build", 120.0),
    ("mvn package", 240.0),
    ("gradle build", 240.0),
    ("dotnet build", 180.0),
    ("npm run build", 240.0),
    ("yarn build", 240.0),
    ("pnpm build", 240.0),
    ("npm test", 300.0),
    ("npm run test", 300.0),
    ("yarn test", 300.0),
    ("pytest", 300.0),
    ("cargo test", 300.0),
    ("go test", 180.0),
    ("jest", 300.0),
    ("mvn test", 300.0),
    ("dotnet test", 300.0),
    ("rspec", 300.0),
    ("playwright", 420.0),
    ("cypress", 420.0),
    ("npm run lint", 60.0),
    ("eslint", 60.0),
    ("clippy", 60.0),
    ("flake8", 45.0),
    ("ruff", 20.0),
    ("golangci-lint", 90.0),
    ("npm audit", 30.0),
    ("trivy", 90.0),
    ("snyk", 90.0),
    ("docker build", 300.0),
    ("docker push", 60.0),
    ("kubectl", 120.0),
    ("terraform", 120.0),
    ("helm", 120.0),
    ("deploy", 120.0),
];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DurationError {
    #[error("duration entry '{pattern}' has invalid value {secs}")]
    InvalidEntry { pattern: String, secs: f64 },
}

/// Static per-step duration estimates plus configured overrides.
#[derive(Debug, Clone)]
pub struct DurationModel {
    /// Lowercased pattern and seconds, consulted before the built-in tables.
    overrides: Vec<(String, f64)>,
    default_secs: f64,
}

impl Default for DurationModel {
    fn default() -> Self {
        Self::new(30.0)
    }
}

impl DurationModel {
    pub fn new(default_secs: f64) -> Self {
        Self {
            overrides: Vec::new(),
            default_secs,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        let mut model = Self::new(config.analysis.default_step_secs);
        for entry in &config.durations {
            model = model.with_override(&entry.pattern, entry.secs);
        }
        model
    }

    pub fn with_override(mut self, pattern: &str, secs: f64) -> Self {
        self.overrides.push((pattern.to_lowercase(), secs));
        self
    }

    pub fn default_secs(&self) -> f64 {
        self.default_secs
    }

    /// Estimated seconds for one step.
    pub fn step_secs(&self, step: &Step) -> Result<f64, DurationError> {
        let signature = step.signature().to_lowercase();
        let overridden = self.overrides.iter().find(|(p, _)| signature.contains(p.as_str()));
        if let Some((pattern, secs)) = overridden {
            return checked(pattern, *secs);
        }

        match &step.action {
            StepAction::Cache { .. } => checked("cache", CACHE_RESTORE_SECS),
            StepAction::Uses { .. } => {
                match ACTION_TABLE.iter().find(|(p, _)| signature.starts_with(p)) {
                    Some((pattern, secs)) => checked(pattern, *secs),
                    None => checked("default", self.default_secs),
                }
            }
            StepAction::Run { .. } => {
                let mut total = 0.0;
                let mut matched = false;
                for segment in command_segments(&signature) {
                    if segment.starts_with('#') {
                        continue;
                    }
                    // Pad so patterns ending in a space also match at the end.
                    let padded = format!("{segment} ");
                    let hit = COMMAND_TABLE.iter().find(|(p, _)| padded.contains(p));
                    if let Some((pattern, secs)) = hit {
                        total += checked(pattern, *secs)?;
                        matched = true;
                    }
                }
                if matched {
                    Ok(total)
                } else {
                    checked("default", self.default_secs)
                }
            }
        }
    }

    /// A job takes as long as its steps, run one after another.
    pub fn job_secs(&self, job: &Job) -> Result<f64, DurationError> {
        job.steps.iter().map(|s| self.step_secs(s)).sum()
    }

    /// Duration of every job, indexed by node index.
    pub fn job_durations(&self, dag: &PipelineGraph) -> Result<Vec<f64>, DurationError> {
        dag.jobs().map(|j| self.job_secs(j)).collect()
    }
}

fn checked(pattern: &str, secs: f64) -> Result<f64, DurationError> {
    if secs.is_finite() && secs >= 0.0 {
        Ok(secs)
    } else {
        Err(DurationError::InvalidEntry {
            pattern: pattern.to_string(),
            secs,
        })
    }
}

use crate::parser::dag::{Job, JobCategory};

const SECURITY_WORDS: &[&str] = &[
    "security", "vuln", "audit", "sast", "dast", "sbom", "codeql", "secret-scan", "secrets-scan",
];
const SECURITY_TOOLS: &[&str] = &[
    "trivy", "snyk", "npm audit", "pip-audit", "cargo audit", "gitleaks", "trufflehog",
    "semgrep", "bandit", "grype", "syft", "owasp", "codeql", "dependency-check",
];
const LINT_TOOLS: &[&str] = &[
    "eslint", "clippy", "prettier", "flake8", "ruff", "pylint", "black --check", "rubocop",
    "golangci-lint", "cargo fmt", "npm run lint", "ktlint", "checkstyle", "hadolint",
];
const TEST_TOOLS: &[&str] = &[
    "pytest", "jest", "npm test", "yarn test", "pnpm test", "cargo test", "go test",
    "mvn test", "gradle test", "./gradlew test", "rspec", "phpunit", "dotnet test",
    "vitest", "mocha", "cypress", "playwright",
];
const DEPLOY_TOOLS: &[&str] = &[
    "deploy", "kubectl", "helm upgrade", "helm install", "terraform apply", "aws ecs",
    "gcloud run", "az webapp", "vercel", "heroku", "serverless",
];
const PACKAGE_TOOLS: &[&str] = &[
    "docker push", "docker build", "npm publish", "cargo publish", "twine upload",
    "docker/build-push-action", "mvn package", "goreleaser",
];
const MONITOR_TOOLS: &[&str] = &["smoke", "health", "monitor", "synthetic", "uptime"];
const BUILD_TOOLS: &[&str] = &[
    "npm run build", "yarn build", "pnpm build", "cargo build", "go build", "mvn compile",
    "gradle build", "./gradlew build", "dotnet build", "make", "tsc",
];

/// Classify a job by its id, display name and step contents.
///
/// Name keywords win over step contents; within each, the more specific
/// roles are checked first (security before lint before test).
pub fn classify_job(job: &Job) -> JobCategory {
    let names = format!("{} {}", job.id, job.name).to_lowercase();
    if let Some(category) = classify_text(&names, true) {
        return category;
    }

    let step_text: String = job
        .steps
        .iter()
        .map(|s| s.signature().to_lowercase())
        .collect::<Vec<_>>()
        .join("\n");
    classify_text(&step_text, false).unwrap_or(JobCategory::Other)
}

fn classify_text(text: &str, is_name: bool) -> Option<JobCategory> {
    let has = |words: &[&str]| words.iter().any(|w| text.contains(w));

    if (is_name && has(SECURITY_WORDS)) || has(SECURITY_TOOLS) {
        Some(JobCategory::SecurityScan)
    } else if (is_name && has(&["lint", "format", "style", "fmt"])) || has(LINT_TOOLS) {
        Some(JobCategory::Lint)
    } else if (is_name && has(&["test", "spec", "e2e"])) || has(TEST_TOOLS) {
        Some(JobCategory::Test)
    } else if (is_name && has(&["deploy", "release", "publish-site", "rollout"]))
        || has(DEPLOY_TOOLS)
    {
        Some(JobCategory::Deploy)
    } else if (is_name && has(&["package", "publish", "docker", "image", "container"]))
        || has(PACKAGE_TOOLS)
    {
        Some(JobCategory::Package)
    } else if is_name && has(MONITOR_TOOLS) {
        Some(JobCategory::Monitor)
    } else if (is_name && has(&["build", "compile"])) || has(BUILD_TOOLS) {
        Some(JobCategory::Build)
    } else {
        None
    }
}

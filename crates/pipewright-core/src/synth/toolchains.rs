use crate::profiler::{StackCategory, TechStackProfile};

/// How a package manager's projects are built, tested and cached.
#[derive(Debug, PartialEq)]
pub struct Toolchain {
    pub id: &'static str,
    /// Package-manager name as the profiler reports it.
    pub package_manager: &'static str,
    /// Languages this toolchain is the default for, in preference order.
    pub languages: &'static [&'static str],
    /// GitHub setup action, its version input and the version.
    pub setup: Option<(&'static str, &'static str, &'static str)>,
    /// Pinned container image for platforms that run jobs in containers.
    pub image: &'static str,
    pub install: Option<&'static str>,
    pub build: &'static str,
    pub test: &'static str,
    pub integration: &'static str,
    pub e2e: &'static str,
    pub lint: &'static str,
    pub audit: &'static str,
    pub lockfile: Option<&'static str>,
    pub cache_paths: &'static [&'static str],
    pub artifact_path: &'static str,
}

pub const TOOLCHAINS: &[Toolchain] = &[
    Toolchain {
        id: "npm",
        package_manager: "npm",
        languages: &["TypeScript", "JavaScript"],
        setup: Some(("actions/setup-node@v4", "node-version", "20")),
        image: "node:20-bookworm",
        install: Some("npm ci"),
        build: "npm run build",
        test: "npm test",
        integration: "npm run test:integration",
        e2e: "npm run test:e2e",
        lint: "npm run lint",
        audit: "npm audit --audit-level=high",
        lockfile: Some("package-lock.json"),
        cache_paths: &["~/.npm"],
        artifact_path: "dist/",
    },
    Toolchain {
        id: "yarn",
        package_manager: "Yarn",
        languages: &[],
        setup: Some(("actions/setup-node@v4", "node-version", "20")),
        image: "node:20-bookworm",
        install: Some("yarn install --frozen-lockfile"),
        build: "yarn build",
        test: "yarn test",
        integration: "yarn test:integration",
        e2e: "yarn test:e2e",
        lint: "yarn lint",
        audit: "yarn audit --level high",
        lockfile: Some("yarn.lock"),
        cache_paths: &["~/.cache/yarn"],
        artifact_path: "dist/",
    },
    Toolchain {
        id: "pnpm",
        package_manager: "pnpm",
        languages: &[],
        setup: Some(("actions/setup-node@v4", "node-version", "20")),
        image: "node:20-bookworm",
        install: Some("corepack enable && pnpm install --frozen-lockfile"),
        build: "pnpm build",
        test: "pnpm test",
        integration: "pnpm test:integration",
        e2e: "pnpm test:e2e",
        lint: "pnpm lint",
        audit: "pnpm audit --audit-level high",
        lockfile: Some("pnpm-lock.yaml"),
        cache_paths: &["~/.local/share/pnpm/store"],
        artifact_path: "dist/",
    },
    Toolchain {
        id: "poetry",
        package_manager: "Poetry",
        languages: &[],
        setup: Some(("actions/setup-python@v5", "python-version", "3.12")),
        image: "python:3.12-slim-bookworm",
        install: Some("pip install poetry==1.8.3 && poetry install --no-interaction"),
        build: "poetry build",
        test: "poetry run pytest",
        integration: "poetry run pytest tests/integration",
        e2e: "poetry run pytest tests/e2e",
        lint: "poetry run ruff check .",
        audit: "poetry run pip-audit",
        lockfile: Some("poetry.lock"),
        cache_paths: &["~/.cache/pypoetry"],
        artifact_path: "dist/",
    },
    Toolchain {
        id: "pip",
        package_manager: "pip",
        languages: &["Python"],
        setup: Some(("actions/setup-python@v5", "python-version", "3.12")),
        image: "python:3.12-slim-bookworm",
        install: Some("pip install -r requirements.txt"),
        build: "python -m compileall -q .",
        test: "pytest",
        integration: "pytest tests/integration",
        e2e: "pytest tests/e2e",
        lint: "ruff check .",
        audit: "pip install pip-audit && pip-audit -r requirements.txt",
        lockfile: Some("requirements.txt"),
        cache_paths: &["~/.cache/pip"],
        artifact_path: "dist/",
    },
    Toolchain {
        id: "cargo",
        package_manager: "Cargo",
        languages: &["Rust"],
        setup: Some(("dtolnay/rust-toolchain@stable", "toolchain", "stable")),
        image: "rust:1.79-bookworm",
        install: Some("cargo fetch --locked"),
        build: "cargo build --release --locked",
        test: "cargo test --locked",
        integration: "cargo test --locked --test '*'",
        e2e: "cargo test --locked --features e2e",
        lint: "cargo clippy --all-targets -- -D warnings",
        audit: "cargo install cargo-audit --locked && cargo audit",
        lockfile: Some("Cargo.lock"),
        cache_paths: &["~/.cargo/registry", "target"],
        artifact_path: "target/release/",
    },
    Toolchain {
        id: "go",
        package_manager: "Go modules",
        languages: &["Go"],
        setup: Some(("actions/setup-go@v5", "go-version", "1.22")),
        image: "golang:1.22-bookworm",
        install: Some("go mod download"),
        build: "go build ./...",
        test: "go test ./...",
        integration: "go test -tags=integration ./...",
        e2e: "go test -tags=e2e ./...",
        lint: "go vet ./...",
        audit: "go install golang.org/x/vuln/cmd/govulncheck@latest && govulncheck ./...",
        lockfile: Some("go.sum"),
        cache_paths: &["~/go/pkg/mod"],
        artifact_path: "bin/",
    },
    Toolchain {
        id: "maven",
        package_manager: "Maven",
        languages: &["Java", "Kotlin"],
        setup: Some(("actions/setup-java@v4", "java-version", "21")),
        image: "maven:3.9-eclipse-temurin-21",
        install: Some("mvn -B dependency:go-offline"),
        build: "mvn -B package -DskipTests",
        test: "mvn -B test",
        integration: "mvn -B verify -DskipUnitTests",
        e2e: "mvn -B verify -Pe2e",
        lint: "mvn -B checkstyle:check",
        audit: "mvn -B org.owasp:dependency-check-maven:check",
        lockfile: Some("pom.xml"),
        cache_paths: &["~/.m2/repository"],
        artifact_path: "target/",
    },
    Toolchain {
        id: "gradle",
        package_manager: "Gradle",
        languages: &[],
        setup: Some(("actions/setup-java@v4", "java-version", "21")),
        image: "gradle:8.8-jdk21",
        install: None,
        build: "./gradlew build -x test",
        test: "./gradlew test",
        integration: "./gradlew integrationTest",
        e2e: "./gradlew e2eTest",
        lint: "./gradlew check -x test",
        audit: "./gradlew dependencyCheckAnalyze",
        lockfile: Some("build.gradle"),
        cache_paths: &["~/.gradle/caches"],
        artifact_path: "build/libs/",
    },
    Toolchain {
        id: "bundler",
        package_manager: "Bundler",
        languages: &["Ruby"],
        setup: Some(("ruby/setup-ruby@v1", "ruby-version", "3.3")),
        image: "ruby:3.3-bookworm",
        install: Some("bundle install --jobs 4"),
        build: "bundle exec rake build",
        test: "bundle exec rspec",
        integration: "bundle exec rspec spec/integration",
        e2e: "bundle exec rspec spec/system",
        lint: "bundle exec rubocop",
        audit: "gem install bundler-audit && bundle-audit check --update",
        lockfile: Some("Gemfile.lock"),
        cache_paths: &["vendor/bundle"],
        artifact_path: "pkg/",
    },
    Toolchain {
        id: "composer",
        package_manager: "Composer",
        languages: &["PHP"],
        setup: Some(("shivammathur/setup-php@v2", "php-version", "8.3")),
        image: "composer:2.7",
        install: Some("composer install --no-interaction --prefer-dist"),
        build: "composer dump-autoload --optimize",
        test: "vendor/bin/phpunit",
        integration: "vendor/bin/phpunit --testsuite integration",
        e2e: "vendor/bin/phpunit --testsuite e2e",
        lint: "vendor/bin/phpcs",
        audit: "composer audit",
        lockfile: Some("composer.lock"),
        cache_paths: &["vendor"],
        artifact_path: "build/",
    },
    Toolchain {
        id: "dotnet",
        package_manager: "NuGet",
        languages: &["C#"],
        setup: Some(("actions/setup-dotnet@v4", "dotnet-version", "8.0.x")),
        image: "mcr.microsoft.com/dotnet/sdk:8.0",
        install: Some("dotnet restore --locked-mode"),
        build: "dotnet build --no-restore -c Release",
        test: "dotnet test --no-build -c Release",
        integration: "dotnet test --no-build -c Release --filter Category=Integration",
        e2e: "dotnet test --no-build -c Release --filter Category=E2E",
        lint: "dotnet format --verify-no-changes",
        audit: "dotnet list package --vulnerable --include-transitive",
        lockfile: Some("packages.lock.json"),
        cache_paths: &["~/.nuget/packages"],
        artifact_path: "bin/Release/",
    },
];

/// Used when nothing in the profile points at a known toolchain.
pub const FALLBACK: Toolchain = Toolchain {
    id: "make",
    package_manager: "make",
    languages: &[],
    setup: None,
    image: "debian:bookworm-slim",
    install: None,
    build: "make build",
    test: "make test",
    integration: "make integration-test",
    e2e: "make e2e-test",
    lint: "make lint",
    audit: "make audit",
    lockfile: None,
    cache_paths: &[],
    artifact_path: "build/",
};

/// End-to-end runners that replace a toolchain's default e2e command.
const E2E_RUNNERS: &[(&str, &str)] = &[
    ("Playwright", "npx playwright test"),
    ("Cypress", "npx cypress run"),
];

/// The toolchain for a profile: top package manager, then the default for the
/// top language, then [`FALLBACK`].
pub fn select(profile: &TechStackProfile) -> &'static Toolchain {
    let by_manager = profile.top(StackCategory::PackageManager).and_then(|top| {
        TOOLCHAINS
            .iter()
            .find(|t| t.package_manager.eq_ignore_ascii_case(&top.technology))
    });
    let by_language = || {
        profile.top(StackCategory::Language).and_then(|top| {
            TOOLCHAINS
                .iter()
                .find(|t| t.languages.iter().any(|l| l.eq_ignore_ascii_case(&top.technology)))
        })
    };
    by_manager.or_else(by_language).unwrap_or(&FALLBACK)
}

/// E2E command, preferring a detected browser test runner.
pub fn e2e_command(toolchain: &Toolchain, profile: &TechStackProfile) -> &'static str {
    E2E_RUNNERS
        .iter()
        .find(|(runner, _)| profile.has(StackCategory::TestFramework, runner))
        .map(|(_, command)| *command)
        .unwrap_or(toolchain.e2e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiler::{FileEntry, Profiler};

    fn profile(files: Vec<FileEntry>) -> TechStackProfile {
        Profiler::new(5).unwrap().profile(&files)
    }

    #[test]
    fn test_package_manager_wins() {
        let p = profile(vec![
            FileEntry::with_content("package.json", r#"{"devDependencies":{"typescript":"5"}}"#),
            FileEntry::new("yarn.lock"),
            FileEntry::new("src/index.ts"),
        ]);
        assert_eq!(select(&p).id, "yarn");
    }

    #[test]
    fn test_language_default_and_fallback() {
        let p = profile(vec![FileEntry::new("main.go")]);
        assert_eq!(select(&p).id, "go");
        let empty = profile(vec![FileEntry::new("README.md")]);
        assert_eq!(select(&empty).id, "make");
    }

    #[test]
    fn test_every_lockfile_keys_a_lockfile_cache() {
        use crate::parser::dag::Step;
        for toolchain in TOOLCHAINS {
            let Some(lockfile) = toolchain.lockfile else { continue };
            let step = Step::cache("c", format!("{}-{}", toolchain.id, lockfile), vec![]);
            assert!(step.is_lockfile_cache(), "{}", toolchain.id);
        }
    }

    #[test]
    fn test_e2e_runner_override() {
        let p = profile(vec![
            FileEntry::with_content(
                "package.json",
                r#"{"devDependencies":{"@playwright/test":"1"}}"#,
            ),
            FileEntry::new("playwright.config.ts"),
        ]);
        assert_eq!(e2e_command(select(&p), &p), "npx playwright test");
    }
}

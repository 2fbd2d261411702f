use crate::profiler::manifests::Ecosystem::{self, *};
use crate::profiler::StackCategory::{self, *};

/// How a signature recognises a technology in a file listing.
#[derive(Debug, Clone, Copy)]
pub enum Matcher {
    /// Exact file name anywhere in the tree.
    FileName(&'static [&'static str]),
    /// Path ends with one of these.
    Suffix(&'static [&'static str]),
    /// A directory named like this appears in the path.
    Segment(&'static [&'static str]),
    /// File extension, without the dot.
    Extension(&'static [&'static str]),
    /// Glob over the whole relative path.
    Glob(&'static str),
    /// A manifest declares one of these packages. A trailing `*` matches by prefix.
    Dependency(&'static [(Ecosystem, &'static str)]),
    /// A file ending with one of `suffixes` contains `needle` (case-insensitive).
    Content {
        suffixes: &'static [&'static str],
        needle: &'static str,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct Signature {
    pub category: StackCategory,
    pub technology: &'static str,
    pub weight: f64,
    pub matcher: Matcher,
}

const fn sig(
    category: StackCategory,
    technology: &'static str,
    weight: f64,
    matcher: Matcher,
) -> Signature {
    Signature {
        category,
        technology,
        weight,
        matcher,
    }
}

use Matcher::*;

const COMPOSE_FILES: &[&str] = &[
    "docker-compose.yml",
    "docker-compose.yaml",
    "compose.yml",
    "compose.yaml",
];
const YAML_FILES: &[&str] = &[".yml", ".yaml"];

pub const SIGNATURES: &[Signature] = &[
    // Languages
    sig(Language, "JavaScript", 2.0, FileName(&["package.json"])),
    sig(Language, "JavaScript", 1.0, Extension(&["js", "jsx"])),
    sig(Language, "JavaScript", 1.0, Extension(&["mjs", "cjs"])),
    sig(Language, "TypeScript", 2.0, FileName(&["tsconfig.json"])),
    sig(Language, "TypeScript", 1.0, Extension(&["ts", "tsx"])),
    sig(Language, "TypeScript", 1.0, Dependency(&[(Npm, "typescript")])),
    sig(Language, "Python", 1.0, FileName(&["requirements.txt", "Pipfile"])),
    sig(Language, "Python", 1.0, FileName(&["pyproject.toml", "setup.py", "setup.cfg"])),
    sig(Language, "Python", 2.0, Extension(&["py"])),
    sig(Language, "Rust", 2.0, FileName(&["Cargo.toml"])),
    sig(Language, "Rust", 1.0, FileName(&["Cargo.lock"])),
    sig(Language, "Rust", 1.0, Extension(&["rs"])),
    sig(Language, "Go", 2.0, FileName(&["go.mod"])),
    sig(Language, "Go", 1.0, FileName(&["go.sum"])),
    sig(Language, "Go", 1.0, Extension(&["go"])),
    sig(Language, "Java", 2.0, FileName(&["pom.xml", "build.gradle"])),
    sig(Language, "Java", 2.0, Extension(&["java"])),
    sig(Language, "Kotlin", 2.0, FileName(&["build.gradle.kts"])),
    sig(Language, "Kotlin", 2.0, Extension(&["kt", "kts"])),
    sig(Language, "Ruby", 2.0, FileName(&["Gemfile"])),
    sig(Language, "Ruby", 1.0, FileName(&["Gemfile.lock", ".ruby-version"])),
    sig(Language, "Ruby", 1.0, Extension(&["rb"])),
    sig(Language, "PHP", 2.0, FileName(&["composer.json"])),
    sig(Language, "PHP", 2.0, Extension(&["php"])),
    sig(Language, "C#", 2.0, Extension(&["csproj", "sln"])),
    sig(Language, "C#", 2.0, Extension(&["cs"])),
    // Frameworks
    sig(Framework, "Next.js", 2.0, Dependency(&[(Npm, "next")])),
    sig(Framework, "Next.js", 1.0, Glob("**/next.config.*")),
    sig(Framework, "React", 2.0, Dependency(&[(Npm, "react")])),
    sig(Framework, "React", 1.0, Extension(&["jsx", "tsx"])),
    sig(Framework, "Vue", 2.0, Dependency(&[(Npm, "vue")])),
    sig(Framework, "Vue", 1.0, Extension(&["vue"])),
    sig(Framework, "Angular", 2.0, Dependency(&[(Npm, "@angular/core")])),
    sig(Framework, "Angular", 1.0, FileName(&["angular.json"])),
    sig(Framework, "Express", 3.0, Dependency(&[(Npm, "express")])),
    sig(Framework, "NestJS", 2.0, Dependency(&[(Npm, "@nestjs/core")])),
    sig(Framework, "NestJS", 1.0, FileName(&["nest-cli.json"])),
    sig(Framework, "Django", 2.0, Dependency(&[(PyPI, "django")])),
    sig(Framework, "Django", 1.0, FileName(&["manage.py"])),
    sig(Framework, "Flask", 3.0, Dependency(&[(PyPI, "flask")])),
    sig(Framework, "FastAPI", 3.0, Dependency(&[(PyPI, "fastapi")])),
    sig(Framework, "Rails", 2.0, Dependency(&[(RubyGems, "rails")])),
    sig(Framework, "Rails", 1.0, Suffix(&["config/routes.rb"])),
    sig(Framework, "Spring Boot", 2.0, Dependency(&[(Maven, "org.springframework.boot:*")])),
    sig(
        Framework,
        "Spring Boot",
        1.0,
        Content {
            suffixes: &["build.gradle", "build.gradle.kts"],
            needle: "org.springframework.boot",
        },
    ),
    sig(Framework, "Actix Web", 3.0, Dependency(&[(Cargo, "actix-web")])),
    sig(Framework, "Axum", 3.0, Dependency(&[(Cargo, "axum")])),
    sig(Framework, "Gin", 3.0, Dependency(&[(Go, "github.com/gin-gonic/gin")])),
    sig(Framework, "Laravel", 2.0, Dependency(&[(Composer, "laravel/framework")])),
    sig(Framework, "Laravel", 1.0, FileName(&["artisan"])),
    sig(
        Framework,
        "ASP.NET Core",
        3.0,
        Content {
            suffixes: &[".csproj"],
            needle: "microsoft.net.sdk.web",
        },
    ),
    // Databases
    sig(
        Database,
        "PostgreSQL",
        2.0,
        Dependency(&[
            (Npm, "pg"),
            (PyPI, "psycopg2"),
            (PyPI, "psycopg2-binary"),
            (PyPI, "psycopg"),
            (PyPI, "asyncpg"),
            (Cargo, "tokio-postgres"),
            (Cargo, "postgres"),
            (Maven, "org.postgresql:*"),
            (RubyGems, "pg"),
            (Go, "github.com/lib/pq"),
            (Go, "github.com/jackc/pgx*"),
        ]),
    ),
    sig(Database, "PostgreSQL", 1.0, Content { suffixes: COMPOSE_FILES, needle: "postgres" }),
    sig(
        Database,
        "MySQL",
        2.0,
        Dependency(&[
            (Npm, "mysql"),
            (Npm, "mysql2"),
            (PyPI, "mysqlclient"),
            (PyPI, "pymysql"),
            (Maven, "com.mysql:*"),
            (Maven, "mysql:*"),
            (RubyGems, "mysql2"),
            (Go, "github.com/go-sql-driver/mysql"),
        ]),
    ),
    sig(Database, "MySQL", 1.0, Content { suffixes: COMPOSE_FILES, needle: "mysql" }),
    sig(
        Database,
        "MongoDB",
        2.0,
        Dependency(&[
            (Npm, "mongodb"),
            (Npm, "mongoose"),
            (PyPI, "pymongo"),
            (PyPI, "motor"),
            (Cargo, "mongodb"),
            (Maven, "org.mongodb:*"),
            (Go, "go.mongodb.org/mongo-driver*"),
        ]),
    ),
    sig(Database, "MongoDB", 1.0, Content { suffixes: COMPOSE_FILES, needle: "mongo" }),
    sig(
        Database,
        "Redis",
        2.0,
        Dependency(&[
            (Npm, "redis"),
            (Npm, "ioredis"),
            (PyPI, "redis"),
            (Cargo, "redis"),
            (RubyGems, "redis"),
            (Go, "github.com/redis/go-redis*"),
            (Go, "github.com/go-redis/redis*"),
        ]),
    ),
    sig(Database, "Redis", 1.0, Content { suffixes: COMPOSE_FILES, needle: "redis" }),
    sig(
        Database,
        "SQLite",
        2.0,
        Dependency(&[
            (Npm, "sqlite3"),
            (Npm, "better-sqlite3"),
            (Cargo, "rusqlite"),
            (RubyGems, "sqlite3"),
            (Go, "github.com/mattn/go-sqlite3"),
        ]),
    ),
    sig(Database, "SQLite", 1.0, Extension(&["sqlite", "sqlite3"])),
    // Container tooling
    sig(ContainerTooling, "Docker", 2.0, FileName(&["Dockerfile", "Containerfile"])),
    sig(ContainerTooling, "Docker", 1.0, FileName(&[".dockerignore"])),
    sig(ContainerTooling, "Docker", 1.0, Glob("**/*.Dockerfile")),
    sig(ContainerTooling, "Docker Compose", 3.0, FileName(COMPOSE_FILES)),
    sig(ContainerTooling, "Kubernetes", 1.0, Segment(&["k8s", "kubernetes", "manifests"])),
    sig(
        ContainerTooling,
        "Kubernetes",
        1.0,
        FileName(&["kustomization.yaml", "kustomization.yml"]),
    ),
    sig(
        ContainerTooling,
        "Kubernetes",
        2.0,
        Content {
            suffixes: YAML_FILES,
            needle: "kind: deployment",
        },
    ),
    sig(ContainerTooling, "Helm", 3.0, FileName(&["Chart.yaml"])),
    sig(ContainerTooling, "Helm", 1.0, Glob("**/templates/_helpers.tpl")),
    // Infrastructure as code
    sig(IacTooling, "Terraform", 3.0, Extension(&["tf"])),
    sig(IacTooling, "Terraform", 1.0, FileName(&[".terraform.lock.hcl"])),
    sig(IacTooling, "Pulumi", 3.0, FileName(&["Pulumi.yaml"])),
    sig(IacTooling, "Pulumi", 1.0, Dependency(&[(Npm, "@pulumi/pulumi"), (PyPI, "pulumi")])),
    sig(IacTooling, "AWS CDK", 3.0, FileName(&["cdk.json"])),
    sig(IacTooling, "AWS CDK", 1.0, Dependency(&[(Npm, "aws-cdk-lib"), (PyPI, "aws-cdk-lib")])),
    sig(
        IacTooling,
        "CloudFormation",
        4.0,
        Content {
            suffixes: &[".yml", ".yaml", ".json", ".template"],
            needle: "awstemplateformatversion",
        },
    ),
    sig(IacTooling, "Ansible", 2.0, FileName(&["ansible.cfg"])),
    sig(IacTooling, "Ansible", 1.0, Segment(&["playbooks"])),
    sig(IacTooling, "Ansible", 1.0, Glob("**/playbook*.yml")),
    sig(IacTooling, "Serverless", 4.0, FileName(&["serverless.yml", "serverless.yaml"])),
    // Test frameworks
    sig(TestFramework, "Jest", 2.0, Dependency(&[(Npm, "jest")])),
    sig(TestFramework, "Jest", 1.0, Glob("**/jest.config.*")),
    sig(TestFramework, "Vitest", 2.0, Dependency(&[(Npm, "vitest")])),
    sig(TestFramework, "Vitest", 1.0, Glob("**/vitest.config.*")),
    sig(TestFramework, "Mocha", 2.0, Dependency(&[(Npm, "mocha")])),
    sig(TestFramework, "Mocha", 1.0, Glob("**/.mocharc*")),
    sig(TestFramework, "Cypress", 2.0, Dependency(&[(Npm, "cypress")])),
    sig(TestFramework, "Cypress", 1.0, Glob("**/cypress.config.*")),
    sig(TestFramework, "Playwright", 2.0, Dependency(&[(Npm, "@playwright/test")])),
    sig(TestFramework, "Playwright", 1.0, Glob("**/playwright.config.*")),
    sig(TestFramework, "pytest", 2.0, Dependency(&[(PyPI, "pytest")])),
    sig(TestFramework, "pytest", 1.0, FileName(&["pytest.ini", "conftest.py"])),
    sig(
        TestFramework,
        "JUnit",
        3.0,
        Dependency(&[(Maven, "org.junit*"), (Maven, "junit:junit")]),
    ),
    sig(TestFramework, "RSpec", 2.0, Dependency(&[(RubyGems, "rspec*")])),
    sig(TestFramework, "RSpec", 1.0, FileName(&[".rspec"])),
    sig(TestFramework, "PHPUnit", 2.0, Dependency(&[(Composer, "phpunit/phpunit")])),
    sig(TestFramework, "PHPUnit", 1.0, FileName(&["phpunit.xml", "phpunit.xml.dist"])),
    sig(TestFramework, "Go test", 3.0, Glob("**/*_test.go")),
    // Package managers
    sig(PackageManager, "npm", 3.0, FileName(&["package-lock.json"])),
    sig(PackageManager, "npm", 1.0, FileName(&["package.json"])),
    sig(PackageManager, "Yarn", 3.0, FileName(&["yarn.lock"])),
    sig(PackageManager, "pnpm", 3.0, FileName(&["pnpm-lock.yaml"])),
    sig(PackageManager, "pnpm", 1.0, FileName(&["pnpm-workspace.yaml"])),
    sig(PackageManager, "Bun", 3.0, FileName(&["bun.lockb", "bun.lock"])),
    sig(PackageManager, "pip", 3.0, FileName(&["requirements.txt"])),
    sig(PackageManager, "Poetry", 3.0, FileName(&["poetry.lock"])),
    sig(
        PackageManager,
        "Poetry",
        1.0,
        Content {
            suffixes: &["pyproject.toml"],
            needle: "[tool.poetry]",
        },
    ),
    sig(PackageManager, "Pipenv", 3.0, FileName(&["Pipfile.lock"])),
    sig(PackageManager, "Pipenv", 1.0, FileName(&["Pipfile"])),
    sig(PackageManager, "Cargo", 3.0, FileName(&["Cargo.lock"])),
    sig(PackageManager, "Cargo", 1.0, FileName(&["Cargo.toml"])),
    sig(PackageManager, "Go modules", 3.0, FileName(&["go.sum"])),
    sig(PackageManager, "Go modules", 1.0, FileName(&["go.mod"])),
    sig(PackageManager, "Maven", 4.0, FileName(&["pom.xml"])),
    sig(PackageManager, "Gradle", 3.0, FileName(&["build.gradle", "build.gradle.kts"])),
    sig(PackageManager, "Gradle", 1.0, FileName(&["gradlew"])),
    sig(PackageManager, "Bundler", 3.0, FileName(&["Gemfile.lock"])),
    sig(PackageManager, "Bundler", 1.0, FileName(&["Gemfile"])),
    sig(PackageManager, "Composer", 3.0, FileName(&["composer.lock"])),
    sig(PackageManager, "Composer", 1.0, FileName(&["composer.json"])),
    sig(PackageManager, "NuGet", 3.0, Extension(&["csproj"])),
    sig(PackageManager, "NuGet", 1.0, FileName(&["nuget.config", "packages.lock.json"])),
];

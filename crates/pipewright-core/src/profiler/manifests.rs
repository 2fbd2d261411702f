use crate::profiler::FileEntry;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};

/// A package ecosystem whose manifests name dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Ecosystem {
    Npm,
    Cargo,
    Maven,
    PyPI,
    RubyGems,
    Go,
    Composer,
}

/// Dependency names declared across every manifest in a listing.
#[derive(Debug, Default, Clone)]
pub struct ManifestDependencies {
    deps: BTreeMap<Ecosystem, BTreeSet<String>>,
}

impl ManifestDependencies {
    /// Read every manifest that came with content. Unreadable manifests are skipped.
    pub fn collect(files: &[FileEntry]) -> Self {
        let mut out = Self::default();
        for file in files {
            let Some(content) = file.content.as_deref() else {
                continue;
            };
            let parsed = match file.file_name() {
                "package.json" => Some((Ecosystem::Npm, package_json(content))),
                "Cargo.toml" => Some((Ecosystem::Cargo, cargo_toml(content))),
                "pom.xml" => Some((Ecosystem::Maven, pom_xml(content))),
                "pyproject.toml" => Some((Ecosystem::PyPI, pyproject_toml(content))),
                "Pipfile" => Some((Ecosystem::PyPI, pipfile(content))),
                "Gemfile" => Some((Ecosystem::RubyGems, gemfile(content))),
                "go.mod" => Some((Ecosystem::Go, go_mod(content))),
                "composer.json" => Some((Ecosystem::Composer, composer_json(content))),
                name if is_requirements_file(name) => {
                    Some((Ecosystem::PyPI, Ok(requirements_txt(content))))
                }
                _ => None,
            };
            match parsed {
                Some((ecosystem, Ok(names))) => {
                    out.deps.entry(ecosystem).or_default().extend(names)
                }
                Some((ecosystem, Err(reason))) => {
                    tracing::debug!(
                        path = %file.path,
                        ?ecosystem,
                        %reason,
                        "skipping unreadable manifest"
                    );
                }
                None => {}
            }
        }
        out
    }

    /// Whether `pattern` names a declared dependency. A trailing `*` matches by prefix.
    pub fn declares(&self, ecosystem: Ecosystem, pattern: &str) -> bool {
        let Some(names) = self.deps.get(&ecosystem) else {
            return false;
        };
        match pattern.strip_suffix('*') {
            Some(prefix) => names.iter().any(|n| n.starts_with(prefix)),
            None => names.contains(pattern),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.deps.values().all(BTreeSet::is_empty)
    }
}

/// File names [`ManifestDependencies::collect`] reads dependencies from.
pub fn is_manifest(name: &str) -> bool {
    matches!(
        name,
        "package.json"
            | "Cargo.toml"
            | "pom.xml"
            | "pyproject.toml"
            | "Pipfile"
            | "Gemfile"
            | "go.mod"
            | "composer.json"
    ) || is_requirements_file(name)
}

fn is_requirements_file(name: &str) -> bool {
    name.starts_with("requirements") && name.ends_with(".txt")
}

/// PyPI names compare case-insensitively with `-` and `_` interchangeable.
fn pypi_name(raw: &str) -> String {
    raw.trim().to_lowercase().replace('_', "-")
}

fn package_json(content: &str) -> Result<Vec<String>, String> {
    let doc: serde_json::Value = serde_json::from_str(content).map_err(|e| e.to_string())?;
    let mut names = Vec::new();
    for section in ["dependencies", "devDependencies", "peerDependencies", "optionalDependencies"] {
        if let Some(deps) = doc.get(section).and_then(|v| v.as_object()) {
            names.extend(deps.keys().cloned());
        }
    }
    Ok(names)
}

fn composer_json(content: &str) -> Result<Vec<String>, String> {
    let doc: serde_json::Value = serde_json::from_str(content).map_err(|e| e.to_string())?;
    let mut names = Vec::new();
    for section in ["require", "require-dev"] {
        if let Some(deps) = doc.get(section).and_then(|v| v.as_object()) {
            names.extend(deps.keys().map(|k| k.to_lowercase()));
        }
    }
    Ok(names)
}

fn cargo_toml(content: &str) -> Result<Vec<String>, String> {
    let doc: toml::Value = toml::from_str(content).map_err(|e| e.to_string())?;
    let mut names = Vec::new();
    let sections = [
        doc.get("dependencies"),
        doc.get("dev-dependencies"),
        doc.get("build-dependencies"),
        doc.get("workspace").and_then(|w| w.get("dependencies")),
    ];
    for table in sections.into_iter().flatten().filter_map(|v| v.as_table()) {
        names.extend(table.keys().cloned());
    }
    Ok(names)
}

fn pyproject_toml(content: &str) -> Result<Vec<String>, String> {
    let doc: toml::Value = toml::from_str(content).map_err(|e| e.to_string())?;
    let mut names = Vec::new();

    // PEP 621 lists requirement strings.
    let project = doc.get("project");
    let mut specs: Vec<&str> = project
        .and_then(|p| p.get("dependencies"))
        .and_then(|d| d.as_array())
        .map(|a| a.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();
    if let Some(optional) = project
        .and_then(|p| p.get("optional-dependencies"))
        .and_then(|d| d.as_table())
    {
        for group in optional.values().filter_map(|g| g.as_array()) {
            specs.extend(group.iter().filter_map(|v| v.as_str()));
        }
    }
    names.extend(specs.into_iter().filter_map(requirement_name));

    // Poetry keeps a table per dependency group.
    if let Some(poetry) = doc.get("tool").and_then(|t| t.get("poetry")) {
        let mut tables: Vec<&toml::Value> = ["dependencies", "dev-dependencies"]
            .iter()
            .filter_map(|k| poetry.get(*k))
            .collect();
        if let Some(groups) = poetry.get("group").and_then(|g| g.as_table()) {
            tables.extend(groups.values().filter_map(|g| g.get("dependencies")));
        }
        for table in tables.into_iter().filter_map(|t| t.as_table()) {
            names.extend(table.keys().filter(|k| *k != "python").map(|k| pypi_name(k)));
        }
    }
    Ok(names)
}

fn pipfile(content: &str) -> Result<Vec<String>, String> {
    let doc: toml::Value = toml::from_str(content).map_err(|e| e.to_string())?;
    Ok(["packages", "dev-packages"]
        .iter()
        .filter_map(|k| doc.get(*k).and_then(|v| v.as_table()))
        .flat_map(|t| t.keys().map(|k| pypi_name(k)))
        .collect())
}

/// Package name of a requirement line such as `Django>=4.2 ; python_version > "3.8"`.
fn requirement_name(line: &str) -> Option<String> {
    let line = line.split('#').next().unwrap_or("").trim();
    if line.is_empty() || line.starts_with('-') {
        return None;
    }
    let end = line
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'))
        .unwrap_or(line.len());
    let name = &line[..end];
    (!name.is_empty()).then(|| pypi_name(name))
}

fn requirements_txt(content: &str) -> Vec<String> {
    content.lines().filter_map(requirement_name).collect()
}

/// `gem 'rails', '~> 7.1'` lines, with either quote style.
fn gemfile(content: &str) -> Result<Vec<String>, String> {
    Ok(content
        .lines()
        .filter_map(|line| {
            let rest = line.trim().strip_prefix("gem ")?.trim_start();
            let quote = rest.chars().next().filter(|c| *c == '\'' || *c == '"')?;
            let body = &rest[1..];
            body.find(quote).map(|end| body[..end].to_string())
        })
        .collect())
}

/// Module paths from `require` lines and `require ( ... )` blocks.
fn go_mod(content: &str) -> Result<Vec<String>, String> {
    let mut names = Vec::new();
    let mut in_block = false;
    for line in content.lines() {
        let line = line.split("//").next().unwrap_or("").trim();
        if in_block {
            if line == ")" {
                in_block = false;
            } else if let Some(module) = line.split_whitespace().next() {
                names.push(module.to_string());
            }
            continue;
        }
        if let Some(rest) = line.strip_prefix("require") {
            let rest = rest.trim();
            if rest == "(" {
                in_block = true;
            } else if let Some(module) = rest.split_whitespace().next() {
                names.push(module.to_string());
            }
        }
    }
    Ok(names)
}

#[derive(Debug, Deserialize)]
struct Pom {
    #[serde(default)]
    parent: Option<PomArtifact>,
    #[serde(default)]
    dependencies: PomDependencies,
}

#[derive(Debug, Default, Deserialize)]
struct PomDependencies {
    #[serde(default)]
    dependency: Vec<PomArtifact>,
}

#[derive(Debug, Deserialize)]
struct PomArtifact {
    #[serde(rename = "groupId", default)]
    group_id: String,
    #[serde(rename = "artifactId", default)]
    artifact_id: String,
}

/// `groupId:artifactId` for the parent and every direct dependency.
fn pom_xml(content: &str) -> Result<Vec<String>, String> {
    let pom: Pom = quick_xml::de::from_str(content).map_err(|e| e.to_string())?;
    Ok(pom
        .parent
        .into_iter()
        .chain(pom.dependencies.dependency)
        .map(|a| format!("{}:{}", a.group_id.trim(), a.artifact_id.trim()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps(files: &[(&str, &str)]) -> ManifestDependencies {
        let entries: Vec<FileEntry> = files
            .iter()
            .map(|(path, content)| FileEntry::with_content(*path, *content))
            .collect();
        ManifestDependencies::collect(&entries)
    }

    #[test]
    fn test_package_json_sections() {
        let d = deps(&[(
            "web/package.json",
            concat!(
                r#"{"dependencies": {"next": "14.0.0", "react": "18"}, "#,
                r#""devDependencies": {"jest": "29"}}"#,
            ),
        )]);
        assert!(d.declares(Ecosystem::Npm, "next"));
        assert!(d.declares(Ecosystem::Npm, "jest"));
        assert!(!d.declares(Ecosystem::Npm, "express"));
        assert!(!d.declares(Ecosystem::Cargo, "next"));
    }

    #[test]
    fn test_cargo_and_pyproject() {
        let d = deps(&[
            (
                "Cargo.toml",
                "[package]\nname = \"x\"\n[dependencies]\naxum = \"0.7\"\ntokio = { version = \"1\" }\n",
            ),
            (
                "pyproject.toml",
                concat!(
                    "[project]\ndependencies = [\"FastAPI>=0.100\", \"pydantic\"]\n",
                    "[tool.poetry.dependencies]\npython = \"^3.11\"\nSQLAlchemy = \"2\"\n",
                ),
            ),
        ]);
        assert!(d.declares(Ecosystem::Cargo, "axum"));
        assert!(d.declares(Ecosystem::PyPI, "fastapi"));
        assert!(d.declares(Ecosystem::PyPI, "sqlalchemy"));
        assert!(!d.declares(Ecosystem::PyPI, "python"));
    }

    #[test]
    fn test_pom_xml() {
        let pom = r#"<?xml version="1.0"?>
<project xmlns="http://maven.apache.org/POM/4.0.0">
  <parent>
    <groupId>org.springframework.boot</groupId>
    <artifactId>spring-boot-starter-parent</artifactId>
  </parent>
  <dependencies>
    <dependency>
      <groupId>org.postgresql</groupId>
      <artifactId>postgresql</artifactId>
    </dependency>
  </dependencies>
</project>"#;
        let d = deps(&[("pom.xml", pom)]);
        assert!(d.declares(Ecosystem::Maven, "org.springframework.boot:*"));
        assert!(d.declares(Ecosystem::Maven, "org.postgresql:postgresql"));
    }

    #[test]
    fn test_line_scanned_manifests() {
        let d = deps(&[
            (
                "requirements-dev.txt",
                "# tools\nDjango==4.2\npsycopg2_binary>=2.9 ; python_version>'3'\n-r base.txt\n",
            ),
            ("Gemfile", "source 'https://rubygems.org'\ngem 'rails', '~> 7.1'\ngem \"pg\"\n"),
            (
                "go.mod",
                concat!(
                    "module x\n\ngo 1.22\n\n",
                    "require (\n\tgithub.com/gin-gonic/gin v1.9.1 // indirect\n)\n",
                    "require github.com/lib/pq v1.10.9\n",
                ),
            ),
        ]);
        assert!(d.declares(Ecosystem::PyPI, "django"));
        assert!(d.declares(Ecosystem::PyPI, "psycopg2-binary"));
        assert!(d.declares(Ecosystem::RubyGems, "rails"));
        assert!(d.declares(Ecosystem::RubyGems, "pg"));
        assert!(d.declares(Ecosystem::Go, "github.com/gin-gonic/gin"));
        assert!(d.declares(Ecosystem::Go, "github.com/lib/pq"));
    }

    #[test]
    fn test_broken_manifest_is_skipped() {
        let d = deps(&[("package.json", "{ not json")]);
        assert!(d.is_empty());
    }
}

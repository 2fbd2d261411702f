use crate::error::{EngineError, Result, SourceLocation};
use crate::parser::dag::*;
use crate::parser::{apply_stage_order, finalize_job, PlatformKind};
use indexmap::IndexMap;
use regex::Regex;
use std::collections::HashSet;

/// Parser for Jenkins declarative pipelines (Jenkinsfile).
///
/// Every stage becomes a job. Children of a `parallel { }` block become jobs
/// that share their parent's stage, so they run side by side.
pub struct JenkinsParser;

struct Patterns {
    stage: Regex,
    command: Regex,
    stash: Regex,
    unstash: Regex,
    docker_agent: Regex,
    label_agent: Regex,
    env_entry: Regex,
    timeout: Regex,
}

impl Patterns {
    fn compile() -> Result<Self> {
        Ok(Self {
            stage: compile(r#"stage\s*\(\s*['"]([^'"]+)['"]\s*\)\s*\{"#)?,
            command: compile(
                r#"(?s)\b(sh|bat|powershell|pwsh)\s*\(?\s*(?:script\s*:\s*)?(?:'''(.*?)'''|"""(.*?)"""|'([^']*)'|"([^"]*)")"#,
            )?,
            stash: compile(r#"\bstash\s*\(?\s*(?:name\s*:\s*)?['"]([^'"]+)['"]"#)?,
            unstash: compile(r#"\bunstash\s*\(?\s*(?:name\s*:\s*)?['"]([^'"]+)['"]"#)?,
            docker_agent: compile(
                r#"agent\s*\{\s*docker\s*(?:\{\s*image\s*)?['"]([^'"]+)['"]"#,
            )?,
            label_agent: compile(r#"agent\s*\{\s*label\s*['"]([^'"]+)['"]"#)?,
            env_entry: compile(r#"(\w+)\s*=\s*(credentials\s*\([^)]*\)|'[^']*'|"[^"]*")"#)?,
            timeout: compile(r#"timeout\s*\(\s*time\s*:\s*(\d+)\s*,\s*unit\s*:\s*['"](\w+)['"]"#)?,
        })
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| {
        EngineError::malformed(SourceLocation::root(), format!("invalid pattern: {e}"))
    })
}

/// True when the text reads like a declarative Jenkinsfile.
pub fn looks_like_jenkinsfile(content: &str) -> bool {
    content.contains("stage(")
        || content
            .lines()
            .any(|l| l.trim_start().starts_with("pipeline") && l.contains('{'))
}

impl JenkinsParser {
    /// Parse a Jenkinsfile into a [`PipelineGraph`].
    pub fn parse(content: &str) -> Result<PipelineGraph> {
        let patterns = Patterns::compile()?;

        let (pipeline_body, pipeline_offset) = match content.find("pipeline") {
            Some(pos) => match content[pos..].find('{') {
                Some(brace) => {
                    let start = pos + brace + 1;
                    let (body, _) = extract_block_after_match(content, start)
                        .ok_or_else(|| unbalanced(content, start, "pipeline"))?;
                    (body, start)
                }
                None => (content, 0),
            },
            None => (content, 0),
        };

        let stages_start = find_keyword_block(pipeline_body, "stages");
        let header = match stages_start {
            Some(start) => &pipeline_body[..start],
            None => pipeline_body,
        };

        let mut builder = PipelineGraphBuilder::new("Jenkins Pipeline", PlatformKind::Jenkins);
        if let Some(env_start) = find_keyword_block(header, "environment") {
            if let Some((env_block, _)) = extract_block_after_match(header, env_start) {
                builder.set_env(Self::extract_environment(&patterns, env_block));
            }
        }
        let default_runner = Self::extract_agent(&patterns, header);

        let Some(stages_start) = stages_start else {
            return Err(EngineError::malformed(
                SourceLocation::at("pipeline.stages"),
                "no stages block found",
            ));
        };
        let (stages_block, _) = extract_block_after_match(pipeline_body, stages_start)
            .ok_or_else(|| unbalanced(content, pipeline_offset + stages_start, "stages"))?;
        let stages_offset = pipeline_offset + stages_start;

        let mut stage_order = Vec::new();
        let mut jobs = Vec::new();
        for (stage_name, body, offset) in
            Self::child_stages(&patterns, content, stages_block, stages_offset)?
        {
            stage_order.push(stage_name.clone());

            let parallel = find_keyword_block(body, "parallel")
                .and_then(|start| extract_block_after_match(body, start).map(|b| (b.0, start)));
            match parallel {
                Some((parallel_block, start)) => {
                    for (child, child_body, _) in
                        Self::child_stages(&patterns, content, parallel_block, offset + start)?
                    {
                        let mut job =
                            Self::parse_stage(&patterns, &child, child_body, &default_runner);
                        job.stage = Some(stage_name.clone());
                        jobs.push(job);
                    }
                }
                None => {
                    let mut job = Self::parse_stage(&patterns, &stage_name, body, &default_runner);
                    job.stage = Some(stage_name.clone());
                    jobs.push(job);
                }
            }
        }

        if jobs.is_empty() {
            return Err(EngineError::malformed(
                SourceLocation::at("pipeline.stages"),
                "stages block contains no stage",
            ));
        }

        // Jenkins has no explicit dependency key: order comes from stages alone.
        apply_stage_order(&mut jobs, &stage_order, &HashSet::new());
        for job in jobs {
            builder.add_job(job);
        }
        builder.build()
    }

    /// Direct `stage('name') { ... }` children of a block, skipping nested ones.
    fn child_stages<'a>(
        patterns: &Patterns,
        content: &str,
        block: &'a str,
        block_offset: usize,
    ) -> Result<Vec<(String, &'a str, usize)>> {
        let mut stages = Vec::new();
        let mut pos = 0;
        while let Some(cap) = patterns.stage.captures(&block[pos..]) {
            let Some(whole) = cap.get(0) else { break };
            let name = cap[1].to_string();
            let body_start = pos + whole.end();
            let (body, end) = extract_block_after_match(block, body_start).ok_or_else(|| {
                unbalanced(content, block_offset + body_start, &format!("stage '{name}'"))
            })?;
            stages.push((name, body, block_offset + body_start));
            pos = end + 1;
        }
        Ok(stages)
    }

    fn parse_stage(
        patterns: &Patterns,
        name: &str,
        body: &str,
        default_runner: &Option<String>,
    ) -> Job {
        let mut job = Job::new(name, name);
        job.runner = Self::extract_agent(patterns, body).or_else(|| default_runner.clone());

        if let Some(start) = find_keyword_block(body, "environment") {
            if let Some((env_block, _)) = extract_block_after_match(body, start) {
                job.env = Self::extract_environment(patterns, env_block);
            }
        }

        if let Some(start) = find_keyword_block(body, "when") {
            if let Some((when_block, _)) = extract_block_after_match(body, start) {
                job.condition = Some(when_block.trim().to_string());
            }
        }

        if let Some(cap) = patterns.timeout.captures(body) {
            // Digits only, so a parse failure means the value overflowed.
            let amount: u32 = cap[1].parse().unwrap_or(u32::MAX);
            job.resources.timeout_minutes = Some(match &cap[2].to_uppercase()[..] {
                "HOURS" => amount.saturating_mul(60),
                "SECONDS" => amount.div_ceil(60),
                _ => amount,
            });
        }

        if let Some(start) = find_keyword_block(body, "steps") {
            if let Some((steps_block, _)) = extract_block_after_match(body, start) {
                job.steps = Self::extract_steps(patterns, steps_block);
            }
        }

        job.artifacts.produces = job.steps.iter().any(|s| s.action_ref() == Some("stash"));
        if job.steps.iter().any(|s| s.action_ref() == Some("unstash")) {
            job.artifacts.consumes = Consumes::Any;
        }

        finalize_job(&mut job);
        job
    }

    /// Shell commands plus stash/unstash, in source order.
    fn extract_steps(patterns: &Patterns, steps_block: &str) -> Vec<Step> {
        let mut found: Vec<(usize, Step)> = Vec::new();

        for cap in patterns.command.captures_iter(steps_block) {
            let Some(whole) = cap.get(0) else { continue };
            let command = (2..=5)
                .find_map(|i| cap.get(i))
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default();
            let index = found.len() + 1;
            let mut step = Step::run(format!("Step {index}"), command);
            step.metadata
                .insert("shell".to_string(), serde_yaml::Value::String(cap[1].to_string()));
            found.push((whole.start(), step));
        }

        for (re, kind) in [(&patterns.stash, "stash"), (&patterns.unstash, "unstash")] {
            for cap in re.captures_iter(steps_block) {
                let Some(whole) = cap.get(0) else { continue };
                let step = Step::uses(kind, kind).input("name", cap[1].to_string());
                found.push((whole.start(), step));
            }
        }

        found.sort_by_key(|(pos, _)| *pos);
        let mut steps: Vec<Step> = found.into_iter().map(|(_, s)| s).collect();
        for (i, step) in steps.iter_mut().enumerate() {
            if step.command().is_some() {
                step.name = format!("Step {}", i + 1);
            }
        }
        steps
    }

    fn extract_agent(patterns: &Patterns, block: &str) -> Option<String> {
        if let Some(cap) = patterns.docker_agent.captures(block) {
            return Some(cap[1].to_string());
        }
        patterns.label_agent.captures(block).map(|cap| cap[1].to_string())
    }

    fn extract_environment(patterns: &Patterns, env_block: &str) -> IndexMap<String, EnvValue> {
        let mut env = IndexMap::new();
        for cap in patterns.env_entry.captures_iter(env_block) {
            let raw = &cap[2];
            let value = if raw.starts_with("credentials") {
                EnvValue::Reference(raw.to_string())
            } else {
                EnvValue::classify(raw.trim_matches(|c| c == '\'' || c == '"'))
            };
            env.insert(cap[1].to_string(), value);
        }
        env
    }
}

/// Position just after the `{` that opens `keyword { ... }`, when the keyword
/// appears as a word at this nesting level.
fn find_keyword_block(block: &str, keyword: &str) -> Option<usize> {
    let mut depth = 0usize;
    let bytes = block.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'{' => depth += 1,
            b'}' => depth = depth.saturating_sub(1),
            _ if depth == 0 && bytes[i..].starts_with(keyword.as_bytes()) => {
                let before_ok =
                    i == 0 || !(bytes[i - 1].is_ascii_alphanumeric() || bytes[i - 1] == b'_');
                let rest = block[i + keyword.len()..].trim_start();
                if before_ok && rest.starts_with('{') {
                    let brace = block.len() - rest.len();
                    return Some(brace + 1);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// The text between an opening brace (just before `start_pos`) and its match,
/// plus the offset of the closing brace.
fn extract_block_after_match(content: &str, start_pos: usize) -> Option<(&str, usize)> {
    let rest = content.get(start_pos..)?;
    let mut brace_count = 1;

    for (i, ch) in rest.char_indices() {
        match ch {
            '{' => brace_count += 1,
            '}' => {
                brace_count -= 1;
                if brace_count == 0 {
                    return Some((&rest[..i], start_pos + i));
                }
            }
            _ => {}
        }
    }
    None
}

fn unbalanced(content: &str, offset: usize, what: &str) -> EngineError {
    let before = &content[..offset.min(content.len())];
    let line = before.matches('\n').count() + 1;
    let column = before.len() - before.rfind('\n').map(|p| p + 1).unwrap_or(0) + 1;
    EngineError::MalformedDefinition {
        location: SourceLocation {
            path: "pipeline.stages".to_string(),
            line: Some(line),
            column: Some(column),
        },
        message: format!("unbalanced braces in {what}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sequential_stages() {
        let content = r#"
pipeline {
    agent any
    environment {
        REGISTRY = 'registry.example.com'
        DEPLOY_KEY = credentials('deploy-key')
    }
    stages {
        stage('Build') {
            steps {
                sh 'npm ci'
                sh 'npm run build'
                stash name: 'dist', includes: 'dist/**'
            }
        }
        stage('Test') {
            steps {
                unstash 'dist'
                sh 'npm test'
            }
        }
        stage('Deploy') {
            when { branch 'main' }
            steps {
                sh "kubectl apply -f k8s/"
            }
        }
    }
}
"#;
        let dag = JenkinsParser::parse(content).unwrap();
        assert_eq!(dag.job_count(), 3);
        assert_eq!(dag.get_job("Test").unwrap().needs, vec!["Build"]);
        assert_eq!(dag.get_job("Deploy").unwrap().needs, vec!["Test"]);
        assert_eq!(dag.get_job("Deploy").unwrap().condition.as_deref(), Some("branch 'main'"));

        let build = dag.get_job("Build").unwrap();
        assert_eq!(build.steps.len(), 3);
        assert_eq!(build.steps[0].command(), Some("npm ci"));
        assert_eq!(build.steps[2].action_ref(), Some("stash"));
        assert!(build.artifacts.produces);
        assert_eq!(dag.get_job("Test").unwrap().artifacts.consumes, Consumes::Any);

        assert!(dag.env()["REGISTRY"].is_literal());
        assert!(!dag.env()["DEPLOY_KEY"].is_literal());
    }

    #[test]
    fn test_parallel_children_share_a_stage() {
        let content = r#"
pipeline {
    agent any
    stages {
        stage('Build') {
            steps { sh 'make' }
        }
        stage('Checks') {
            parallel {
                stage('Unit') {
                    steps { sh 'make test' }
                }
                stage('Lint') {
                    steps { sh 'make lint' }
                }
            }
        }
        stage('Ship') {
            steps { sh 'make deploy' }
        }
    }
}
"#;
        let dag = JenkinsParser::parse(content).unwrap();
        assert_eq!(dag.job_count(), 4);
        assert_eq!(dag.get_job("Unit").unwrap().needs, vec!["Build"]);
        assert_eq!(dag.get_job("Lint").unwrap().needs, vec!["Build"]);
        assert_eq!(dag.get_job("Ship").unwrap().needs, vec!["Unit", "Lint"]);
        assert_eq!(dag.get_job("Unit").unwrap().stage.as_deref(), Some("Checks"));
    }

    #[test]
    fn test_docker_agent_and_timeout() {
        let content = r#"
pipeline {
    agent { docker { image 'node:latest' } }
    stages {
        stage('Build') {
            options { timeout(time: 1, unit: 'HOURS') }
            steps { sh 'npm ci' }
        }
    }
}
"#;
        let dag = JenkinsParser::parse(content).unwrap();
        let build = dag.get_job("Build").unwrap();
        assert_eq!(build.runner.as_deref(), Some("node:latest"));
        assert_eq!(build.resources.timeout_minutes, Some(60));
    }

    #[test]
    fn test_huge_timeout_saturates() {
        let content = r#"
pipeline {
    agent any
    stages {
        stage('Soak') {
            options { timeout(time: 100000000, unit: 'HOURS') }
            steps { sh 'make soak' }
        }
        stage('Forever') {
            options { timeout(time: 99999999999, unit: 'MINUTES') }
            steps { sh 'make wait' }
        }
    }
}
"#;
        let dag = JenkinsParser::parse(content).unwrap();
        assert_eq!(dag.get_job("Soak").unwrap().resources.timeout_minutes, Some(u32::MAX));
        assert_eq!(dag.get_job("Forever").unwrap().resources.timeout_minutes, Some(u32::MAX));
    }

    #[test]
    fn test_unbalanced_braces_are_malformed() {
        let content = "pipeline {\n  stages {\n    stage('Build') {\n      steps { sh 'make' }\n";
        let err = JenkinsParser::parse(content).unwrap_err();
        assert!(matches!(err, EngineError::MalformedDefinition { .. }));
    }

    #[test]
    fn test_missing_stages_is_malformed() {
        let err = JenkinsParser::parse("pipeline {\n  agent any\n}\n").unwrap_err();
        match err {
            EngineError::MalformedDefinition { location, .. } => {
                assert_eq!(location.path, "pipeline.stages")
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}

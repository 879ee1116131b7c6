//! Layered validation of agent output.
//!
//! Fixed rule chain: trailer parse, required artifacts, acceptance
//! criteria, test command, expected JSON schema. Criterion matching
//! consults the validation cache first, then an AST adapter when the file
//! extension has one, then regex/keyword matching capped at LOW.

use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Component, Path};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

use crate::domain::models::{CachedCriterion, Confidence, MatchQuality, Task, ValidationReport};
use crate::domain::ports::ValidationCache;
use crate::infrastructure::ast::AstRegistry;
use crate::infrastructure::redis::cache_key;

use super::output_parser::{AgentTrailer, ParseError};

const RULE_OUTPUT_PARSER: &str = "output_parser";
const RULE_REQUIRED_ARTIFACTS: &str = "required_artifacts";
const RULE_ACCEPTANCE_CRITERIA: &str = "acceptance_criteria";
const RULE_TEST_COMMAND: &str = "test_command";
const RULE_JSON_SCHEMA: &str = "expected_json_schema";

/// Words carrying no evidence weight in criterion matching.
const STOPWORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "for", "with", "that", "this", "should", "must", "have",
    "has", "been", "is", "are", "in", "of", "to", "exists", "exist", "file", "files", "new",
];

const TEST_COMMAND_TIMEOUT: Duration = Duration::from_secs(600);

fn structural_patterns() -> &'static [(Regex, StructuralKind)] {
    static PATTERNS: OnceLock<Vec<(Regex, StructuralKind)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            (
                Regex::new(r"(?i)\bmethod\s+([A-Za-z_$][\w$]*)\.([A-Za-z_$][\w$]*)").unwrap(),
                StructuralKind::Method,
            ),
            (
                Regex::new(r"(?i)\bfunction\s+([A-Za-z_$][\w$]*)").unwrap(),
                StructuralKind::Function,
            ),
            (
                Regex::new(r"(?i)\bclass\s+([A-Za-z_$][\w$]*)").unwrap(),
                StructuralKind::Class,
            ),
            (
                Regex::new(r"(?i)\bexports?\s+([A-Za-z_$][\w$]*)").unwrap(),
                StructuralKind::Export,
            ),
            (
                Regex::new(r"(?i)\bdecorator\s+@?([A-Za-z_$][\w$]*)").unwrap(),
                StructuralKind::Decorator,
            ),
        ]
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StructuralKind {
    Function,
    Class,
    Export,
    Method,
    Decorator,
}

pub struct Validator {
    cache: Arc<dyn ValidationCache>,
    ast: AstRegistry,
    cache_ttl_secs: u64,
}

impl Validator {
    pub fn new(cache: Arc<dyn ValidationCache>, ast: AstRegistry, cache_ttl_secs: u64) -> Self {
        Self {
            cache,
            ast,
            cache_ttl_secs,
        }
    }

    /// Run the full rule chain on one attempt.
    pub async fn validate(
        &self,
        task: &Task,
        parsed: Result<&AgentTrailer, &ParseError>,
        working_directory: &Path,
        project_id: &str,
    ) -> ValidationReport {
        let trailer = match parsed {
            Ok(trailer) => trailer,
            Err(e) => {
                return ValidationReport::invalid(
                    format!("{}: {e}", e.kind()),
                    RULE_OUTPUT_PARSER,
                );
            }
        };

        let mut rules_passed = vec![RULE_OUTPUT_PARSER.to_string()];
        let mut rules_failed = Vec::new();
        let mut reason: Option<String> = None;

        // Required artifacts must exist under the working directory and
        // must not escape the sandbox.
        match Self::check_artifacts(task, working_directory) {
            Ok(()) => rules_passed.push(RULE_REQUIRED_ARTIFACTS.to_string()),
            Err(missing) => {
                rules_failed.push(RULE_REQUIRED_ARTIFACTS.to_string());
                reason.get_or_insert(missing);
            }
        }

        // Acceptance criteria, graded per criterion.
        let grades = self
            .grade_criteria(task, trailer, working_directory, project_id)
            .await;
        let mut failed_criteria = Vec::new();
        let mut uncertain_criteria = Vec::new();
        let mut min_quality = MatchQuality::Exact;
        for (criterion, quality) in &grades {
            min_quality = min_quality.min(*quality);
            match quality {
                MatchQuality::None => failed_criteria.push(criterion.clone()),
                MatchQuality::Low => uncertain_criteria.push(criterion.clone()),
                _ => {}
            }
        }
        if failed_criteria.is_empty() && uncertain_criteria.is_empty() {
            rules_passed.push(RULE_ACCEPTANCE_CRITERIA.to_string());
        } else {
            rules_failed.push(RULE_ACCEPTANCE_CRITERIA.to_string());
            let unresolved = failed_criteria
                .iter()
                .chain(uncertain_criteria.iter())
                .cloned()
                .collect::<Vec<_>>()
                .join("; ");
            reason.get_or_insert(format!("criteria not satisfied: {unresolved}"));
        }

        // Test command gate.
        if task.tests_required {
            if let Some(ref command) = task.test_command {
                match Self::run_test_command(command, working_directory).await {
                    Ok(()) => rules_passed.push(RULE_TEST_COMMAND.to_string()),
                    Err(detail) => {
                        rules_failed.push(RULE_TEST_COMMAND.to_string());
                        reason.get_or_insert(detail);
                    }
                }
            }
        }

        // Structural expectations on the trailer itself.
        if let Some(ref schema) = task.expected_json_schema {
            match Self::check_schema(trailer, schema) {
                Ok(()) => rules_passed.push(RULE_JSON_SCHEMA.to_string()),
                Err(detail) => {
                    rules_failed.push(RULE_JSON_SCHEMA.to_string());
                    reason.get_or_insert(detail);
                }
            }
        }

        let confidence = if task.acceptance_criteria.is_empty() {
            Confidence::High
        } else {
            min_quality.to_confidence()
        };

        ValidationReport {
            valid: rules_failed.is_empty(),
            reason,
            rules_passed,
            rules_failed,
            confidence,
            failed_criteria,
            uncertain_criteria,
        }
    }

    fn check_artifacts(task: &Task, working_directory: &Path) -> Result<(), String> {
        for artifact in &task.required_artifacts {
            let path = Path::new(artifact);
            if path.is_absolute()
                || artifact.starts_with('~')
                || path.components().any(|c| matches!(c, Component::ParentDir))
            {
                return Err(format!("required artifact escapes the sandbox: {artifact}"));
            }
            if !working_directory.join(path).exists() {
                return Err(format!("required artifact missing: {artifact}"));
            }
        }
        Ok(())
    }

    /// Grade every criterion, consulting the cache before recomputing.
    async fn grade_criteria(
        &self,
        task: &Task,
        trailer: &AgentTrailer,
        working_directory: &Path,
        project_id: &str,
    ) -> Vec<(String, MatchQuality)> {
        // Read the declared files once, sorted for a stable cache key.
        let mut file_contents: BTreeMap<String, String> = BTreeMap::new();
        for file in trailer.mentioned_files() {
            let path = Path::new(file);
            if path.is_absolute()
                || path.components().any(|c| matches!(c, Component::ParentDir))
            {
                continue;
            }
            if let Ok(contents) = std::fs::read_to_string(working_directory.join(path)) {
                file_contents.insert(file.to_string(), contents);
            }
        }
        let sorted_contents: Vec<&str> = file_contents.values().map(String::as_str).collect();

        let mut grades = Vec::with_capacity(task.acceptance_criteria.len());
        for criterion in &task.acceptance_criteria {
            let key = cache_key(project_id, criterion, &sorted_contents);
            if let Ok(Some(hit)) = self.cache.get(&key).await {
                tracing::debug!(criterion, "Criterion grade served from cache");
                grades.push((criterion.clone(), hit.match_quality));
                continue;
            }

            let (quality, evidence) = self.match_criterion(criterion, trailer, &file_contents);
            let cached = CachedCriterion {
                satisfied: quality >= MatchQuality::Medium,
                match_quality: quality,
                evidence,
            };
            let _ = self.cache.put(&key, &cached, self.cache_ttl_secs).await;
            grades.push((criterion.clone(), quality));
        }
        grades
    }

    /// Grade one criterion against the declared files and summary.
    fn match_criterion(
        &self,
        criterion: &str,
        trailer: &AgentTrailer,
        file_contents: &BTreeMap<String, String>,
    ) -> (MatchQuality, Option<String>) {
        // Structural confirmation first: EXACT beats everything.
        if let Some(evidence) = self.structural_match(criterion, file_contents) {
            return (MatchQuality::Exact, Some(evidence));
        }

        let tokens = Self::evidence_tokens(criterion);
        if tokens.is_empty() {
            // Nothing checkable in the criterion text.
            return (MatchQuality::Low, None);
        }

        let all_contents_lower: String = file_contents
            .values()
            .map(|c| c.to_lowercase())
            .collect::<Vec<_>>()
            .join("\n");
        let summary_lower = trailer.summary.to_lowercase();

        let in_contents = tokens
            .iter()
            .filter(|t| all_contents_lower.contains(t.as_str()))
            .count();
        let in_summary = tokens
            .iter()
            .filter(|t| summary_lower.contains(t.as_str()))
            .count();

        if in_contents == tokens.len() {
            return (
                MatchQuality::High,
                Some("all criterion tokens present in declared files".to_string()),
            );
        }
        if in_summary == tokens.len() {
            return (
                MatchQuality::Medium,
                Some("criterion inferred from response summary".to_string()),
            );
        }
        if (in_contents + in_summary) * 2 >= tokens.len() {
            return (MatchQuality::Low, None);
        }
        (MatchQuality::None, None)
    }

    /// Try the AST adapters for a structural pattern named in the
    /// criterion. Returns evidence on confirmation.
    fn structural_match(
        &self,
        criterion: &str,
        file_contents: &BTreeMap<String, String>,
    ) -> Option<String> {
        for (pattern, kind) in structural_patterns() {
            let Some(captures) = pattern.captures(criterion) else {
                continue;
            };
            for (file, contents) in file_contents {
                let Some(inspector) = self.ast.for_path(Path::new(file)) else {
                    continue;
                };
                let confirmed = match kind {
                    StructuralKind::Function => inspector.has_function(contents, &captures[1]),
                    StructuralKind::Class => inspector.has_class(contents, &captures[1]),
                    StructuralKind::Export => inspector.has_export(contents, &captures[1]),
                    StructuralKind::Method => {
                        inspector.has_method(contents, &captures[1], &captures[2])
                    }
                    StructuralKind::Decorator => inspector.has_decorator(contents, &captures[1]),
                };
                if confirmed {
                    return Some(format!("structural match in {file}"));
                }
            }
        }
        None
    }

    fn evidence_tokens(criterion: &str) -> Vec<String> {
        let word = Regex::new(r"[A-Za-z_][A-Za-z0-9_/.-]{2,}").expect("static token pattern");
        word.find_iter(criterion)
            .map(|m| m.as_str().to_lowercase())
            .filter(|t| !STOPWORDS.contains(&t.as_str()))
            .collect()
    }

    async fn run_test_command(command: &str, working_directory: &Path) -> Result<(), String> {
        let spawned = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(working_directory)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        match timeout(TEST_COMMAND_TIMEOUT, spawned).await {
            Ok(Ok(output)) if output.status.success() => Ok(()),
            Ok(Ok(output)) => Err(format!(
                "test command failed with exit {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr)
                    .chars()
                    .take(500)
                    .collect::<String>()
            )),
            Ok(Err(e)) => Err(format!("test command failed to spawn: {e}")),
            Err(_) => Err(format!(
                "test command timed out after {}s",
                TEST_COMMAND_TIMEOUT.as_secs()
            )),
        }
    }

    /// Minimal structural schema check: declared required keys and value
    /// types. Not a full JSON-Schema engine.
    fn check_schema(trailer: &AgentTrailer, schema: &serde_json::Value) -> Result<(), String> {
        let value = serde_json::to_value(trailer)
            .map_err(|e| format!("trailer failed to re-serialize: {e}"))?;
        let Some(obj) = value.as_object() else {
            return Err("trailer did not serialize to an object".to_string());
        };

        if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
            for key in required.iter().filter_map(|k| k.as_str()) {
                if !obj.contains_key(key) {
                    return Err(format!("schema: missing required key '{key}'"));
                }
            }
        }

        if let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) {
            for (key, prop) in properties {
                let Some(expected) = prop.get("type").and_then(|t| t.as_str()) else {
                    continue;
                };
                let Some(actual) = obj.get(key) else { continue };
                let matches = match expected {
                    "string" => actual.is_string(),
                    "boolean" => actual.is_boolean(),
                    "number" | "integer" => actual.is_number(),
                    "array" => actual.is_array(),
                    "object" => actual.is_object(),
                    _ => true,
                };
                if !matches {
                    return Err(format!("schema: key '{key}' is not of type {expected}"));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::SupervisorResult;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    pub struct MemoryValidationCache {
        entries: Mutex<HashMap<String, CachedCriterion>>,
    }

    impl MemoryValidationCache {
        pub fn new() -> Self {
            Self {
                entries: Mutex::new(HashMap::new()),
            }
        }

        async fn len(&self) -> usize {
            self.entries.lock().await.len()
        }
    }

    #[async_trait]
    impl ValidationCache for MemoryValidationCache {
        async fn get(&self, key: &str) -> SupervisorResult<Option<CachedCriterion>> {
            Ok(self.entries.lock().await.get(key).cloned())
        }

        async fn put(
            &self,
            key: &str,
            value: &CachedCriterion,
            _ttl_secs: u64,
        ) -> SupervisorResult<()> {
            self.entries
                .lock()
                .await
                .insert(key.to_string(), value.clone());
            Ok(())
        }
    }

    fn validator_with_cache(cache: Arc<MemoryValidationCache>) -> Validator {
        Validator::new(cache, AstRegistry::with_builtin(), 3600)
    }

    fn trailer(files: &[&str], summary: &str) -> AgentTrailer {
        AgentTrailer {
            status: super::super::output_parser::TrailerStatus::Completed,
            files_created: files.iter().map(|f| f.to_string()).collect(),
            files_updated: vec![],
            changes: vec![],
            needed_changes: true,
            summary: summary.to_string(),
        }
    }

    #[tokio::test]
    async fn parse_failure_short_circuits() {
        let validator = validator_with_cache(Arc::new(MemoryValidationCache::new()));
        let task = Task::new("T1", "x", vec![]);
        let err = ParseError::TrailingText;
        let report = validator
            .validate(&task, Err(&err), Path::new("/tmp"), "proj")
            .await;
        assert!(!report.valid);
        assert_eq!(report.rules_failed, vec!["output_parser"]);
        assert!(report.reason.unwrap().starts_with("TRAILING_TEXT"));
    }

    #[tokio::test]
    async fn missing_artifact_fails_with_named_path() {
        let dir = tempfile::tempdir().unwrap();
        let validator = validator_with_cache(Arc::new(MemoryValidationCache::new()));
        let mut task = Task::new("T1", "x", vec![]);
        task.required_artifacts = vec!["src/x.ts".to_string()];

        let t = trailer(&[], "done");
        let report = validator
            .validate(&task, Ok(&t), dir.path(), "proj")
            .await;
        assert!(!report.valid);
        assert_eq!(
            report.reason.as_deref(),
            Some("required artifact missing: src/x.ts")
        );
    }

    #[tokio::test]
    async fn artifact_escaping_sandbox_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let validator = validator_with_cache(Arc::new(MemoryValidationCache::new()));
        let mut task = Task::new("T1", "x", vec![]);
        task.required_artifacts = vec!["../outside.ts".to_string()];

        let t = trailer(&[], "done");
        let report = validator
            .validate(&task, Ok(&t), dir.path(), "proj")
            .await;
        assert!(!report.valid);
        assert!(report.reason.unwrap().contains("escapes the sandbox"));
    }

    #[tokio::test]
    async fn ast_confirmation_grades_exact_and_validates() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("greeting.ts"),
            "export function greet(name: string) { return `hi ${name}`; }",
        )
        .unwrap();

        let validator = validator_with_cache(Arc::new(MemoryValidationCache::new()));
        let mut task = Task::new(
            "T1",
            "create greeting.ts",
            vec!["function greet exists".to_string()],
        );
        task.required_artifacts = vec!["greeting.ts".to_string()];

        let t = trailer(&["greeting.ts"], "created greeting.ts with greet");
        let report = validator
            .validate(&task, Ok(&t), dir.path(), "proj")
            .await;
        assert!(report.valid, "report: {report:?}");
        assert_eq!(report.confidence, Confidence::High);
        assert!(report.rules_passed.contains(&"acceptance_criteria".to_string()));
    }

    #[tokio::test]
    async fn unmatched_criterion_fails_with_uncertain_confidence() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("other.ts"), "export const x = 1;").unwrap();

        let validator = validator_with_cache(Arc::new(MemoryValidationCache::new()));
        let task = Task::new(
            "T1",
            "x",
            vec!["endpoint /login responds with a session cookie".to_string()],
        );
        let t = trailer(&["other.ts"], "wrote a constant");
        let report = validator
            .validate(&task, Ok(&t), dir.path(), "proj")
            .await;
        assert!(!report.valid);
        assert_eq!(report.confidence, Confidence::Uncertain);
        assert_eq!(report.failed_criteria.len(), 1);
    }

    #[tokio::test]
    async fn criterion_grades_are_cached() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.ts"), "export function greet() {}").unwrap();

        let cache = Arc::new(MemoryValidationCache::new());
        let validator = validator_with_cache(cache.clone());
        let task = Task::new("T1", "x", vec!["function greet exists".to_string()]);
        let t = trailer(&["a.ts"], "done");

        validator.validate(&task, Ok(&t), dir.path(), "proj").await;
        assert_eq!(cache.len().await, 1);

        // Second run hits the cache; entry count is unchanged.
        validator.validate(&task, Ok(&t), dir.path(), "proj").await;
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_command_gates_when_required() {
        let dir = tempfile::tempdir().unwrap();
        let validator = validator_with_cache(Arc::new(MemoryValidationCache::new()));
        let mut task = Task::new("T1", "x", vec![]);
        task.tests_required = true;
        task.test_command = Some("test -f exists.txt".to_string());

        let t = trailer(&[], "done");
        let report = validator
            .validate(&task, Ok(&t), dir.path(), "proj")
            .await;
        assert!(!report.valid);
        assert!(report.rules_failed.contains(&"test_command".to_string()));

        std::fs::write(dir.path().join("exists.txt"), "x").unwrap();
        let report = validator
            .validate(&task, Ok(&t), dir.path(), "proj")
            .await;
        assert!(report.valid);
    }

    #[tokio::test]
    async fn schema_check_enforces_types() {
        let dir = tempfile::tempdir().unwrap();
        let validator = validator_with_cache(Arc::new(MemoryValidationCache::new()));
        let mut task = Task::new("T1", "x", vec![]);
        task.expected_json_schema = Some(serde_json::json!({
            "required": ["summary", "status"],
            "properties": {"summary": {"type": "string"}, "files_created": {"type": "array"}}
        }));

        let t = trailer(&[], "done");
        let report = validator
            .validate(&task, Ok(&t), dir.path(), "proj")
            .await;
        assert!(report.valid, "report: {report:?}");

        task.expected_json_schema = Some(serde_json::json!({
            "required": ["not_a_real_key"]
        }));
        let report = validator
            .validate(&task, Ok(&t), dir.path(), "proj")
            .await;
        assert!(!report.valid);
        assert!(report.reason.unwrap().contains("not_a_real_key"));
    }
}

//! The tool-call validator.

use crate::patterns;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tiller_core::backend::{OperationKind, TargetIndex, ToolSchema};
use tiller_core::turn::ToolCall;
use tracing::debug;

/// Severity of one validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    /// Any critical finding makes the whole call invalid.
    Critical,
}

/// One validation finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    /// Stable machine-readable code (e.g., "missing_field").
    pub code: String,
    pub message: String,
}

impl Finding {
    fn critical(code: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Critical,
            code: code.into(),
            message: message.into(),
        }
    }

    fn warning(code: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            code: code.into(),
            message: message.into(),
        }
    }
}

/// The validator's verdict on one tool call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Validation {
    pub findings: Vec<Finding>,
    /// Actionable suggestions (nearest existing targets, required fields).
    pub suggestions: Vec<String>,
}

impl Validation {
    /// Valid = no critical findings. Warnings and infos pass through.
    pub fn is_valid(&self) -> bool {
        self.findings.iter().all(|f| f.severity != Severity::Critical)
    }

    /// Non-blocking findings, for surfacing via session hooks.
    pub fn warnings(&self) -> impl Iterator<Item = &Finding> {
        self.findings
            .iter()
            .filter(|f| f.severity == Severity::Warning)
    }

    /// Render the verdict as feedback text for the model.
    pub fn render(&self) -> String {
        let mut out = String::from("Call rejected before execution:\n");
        for finding in &self.findings {
            if finding.severity == Severity::Critical {
                out.push_str(&format!("- {}\n", finding.message));
            }
        }
        if !self.suggestions.is_empty() {
            out.push_str("Suggestions:\n");
            for s in &self.suggestions {
                out.push_str(&format!("- {s}\n"));
            }
        }
        out
    }
}

/// Pre-flight validator over a fixed set of tool schemas.
pub struct Validator {
    schemas: HashMap<String, ToolSchema>,
}

impl Validator {
    pub fn new(schemas: Vec<ToolSchema>) -> Self {
        let schemas = schemas.into_iter().map(|s| (s.name.clone(), s)).collect();
        Self { schemas }
    }

    /// Validate one proposed call against its schema and the workspace.
    pub fn validate(&self, call: &ToolCall, index: &dyn TargetIndex) -> Validation {
        let mut validation = Validation::default();

        let Some(schema) = self.schemas.get(&call.name) else {
            validation.findings.push(Finding::critical(
                "unknown_tool",
                format!("no tool named '{}'", call.name),
            ));
            let mut names: Vec<String> = self.schemas.keys().cloned().collect();
            names.sort();
            validation
                .suggestions
                .push(format!("available tools: {}", names.join(", ")));
            return validation;
        };

        let Some(args) = call.arguments.as_object() else {
            validation.findings.push(Finding::critical(
                "malformed_arguments",
                "arguments must be a JSON object",
            ));
            return validation;
        };

        // 1. Required fields
        for field in &schema.required {
            let missing = match args.get(field) {
                None => true,
                Some(v) => v.is_null(),
            };
            if missing {
                validation.findings.push(Finding::critical(
                    "missing_field",
                    format!("required argument '{field}' is missing"),
                ));
            }
        }
        if !validation.is_valid() {
            validation.suggestions.push(format!(
                "'{}' requires: {}",
                schema.name,
                schema.required.join(", ")
            ));
            debug!(tool = %call.name, "Rejected: missing required fields");
            return validation;
        }

        // 2. Target / parent existence
        if let Some(target_field) = &schema.target_field {
            if let Some(target) = args.get(target_field).and_then(|v| v.as_str()) {
                self.check_target(schema, target, index, &mut validation);
            }
        }

        // 3 + 4. Content checks
        for field in &schema.content_fields {
            if let Some(content) = args.get(field).and_then(|v| v.as_str()) {
                Self::check_content(field, content, &mut validation);
            }
        }

        if !validation.is_valid() {
            debug!(tool = %call.name, findings = validation.findings.len(), "Rejected by guard");
        }
        validation
    }

    fn check_target(
        &self,
        schema: &ToolSchema,
        target: &str,
        index: &dyn TargetIndex,
        validation: &mut Validation,
    ) {
        match schema.kind {
            OperationKind::Read | OperationKind::Modify | OperationKind::Delete => {
                if !index.contains(target) {
                    validation.findings.push(Finding::critical(
                        "target_missing",
                        format!("target '{target}' does not exist"),
                    ));
                    for near in nearest_targets(target, &index.targets(), 3) {
                        validation.suggestions.push(format!("did you mean '{near}'?"));
                    }
                }
            }
            OperationKind::Create => {
                if let Some(parent) = index.parent_of(target) {
                    if !index.contains(&parent) {
                        validation.findings.push(Finding::critical(
                            "parent_missing",
                            format!("parent '{parent}' of new target '{target}' does not exist"),
                        ));
                        for near in nearest_targets(&parent, &index.targets(), 3) {
                            validation
                                .suggestions
                                .push(format!("existing parent: '{near}'"));
                        }
                    }
                }
                if index.contains(target) {
                    // The backend owns create-on-existing as a semantic
                    // error; flag it early as a warning only.
                    validation.findings.push(Finding::warning(
                        "target_exists",
                        format!("target '{target}' already exists"),
                    ));
                }
            }
            OperationKind::Query => {}
        }
    }

    fn check_content(field: &str, content: &str, validation: &mut Validation) {
        let markers = patterns::find_placeholders(content);
        if !markers.is_empty() {
            validation.findings.push(Finding::critical(
                "placeholder_content",
                format!(
                    "'{field}' contains unfinished-work markers: {}",
                    markers.join(", ")
                ),
            ));
            validation
                .suggestions
                .push("write out the full content; elided sections are applied literally".into());
        }

        if patterns::looks_like_code(content) {
            if let Err(problem) = patterns::check_delimiters(content) {
                validation.findings.push(Finding::critical(
                    "unbalanced_delimiters",
                    format!("'{field}' has {problem}"),
                ));
            }
        }
    }
}

/// The `k` candidates most similar to `target`, best first, filtered to a
/// minimum similarity so wildly-unrelated paths are never suggested.
fn nearest_targets(target: &str, candidates: &[String], k: usize) -> Vec<String> {
    let mut scored: Vec<(f64, &String)> = candidates
        .iter()
        .map(|c| (strsim::jaro_winkler(target, c), c))
        .filter(|(score, _)| *score >= 0.7)
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().take(k).map(|(_, c)| c.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FakeIndex {
        targets: Vec<String>,
    }

    impl FakeIndex {
        fn new(targets: &[&str]) -> Self {
            Self {
                targets: targets.iter().map(|s| s.to_string()).collect(),
            }
        }
    }

    impl TargetIndex for FakeIndex {
        fn contains(&self, target: &str) -> bool {
            self.targets.iter().any(|t| t == target)
        }
        fn targets(&self) -> Vec<String> {
            self.targets.clone()
        }
    }

    fn schemas() -> Vec<ToolSchema> {
        vec![
            ToolSchema {
                name: "read_entry".into(),
                description: "Read an entry".into(),
                kind: OperationKind::Read,
                required: vec!["path".into()],
                target_field: Some("path".into()),
                content_fields: vec![],
                dangerous: false,
                parameters: json!({"type": "object"}),
            },
            ToolSchema {
                name: "create_entry".into(),
                description: "Create an entry".into(),
                kind: OperationKind::Create,
                required: vec!["path".into(), "content".into()],
                target_field: Some("path".into()),
                content_fields: vec!["content".into()],
                dangerous: false,
                parameters: json!({"type": "object"}),
            },
        ]
    }

    #[test]
    fn unknown_tool_rejected_with_alternatives() {
        let validator = Validator::new(schemas());
        let index = FakeIndex::new(&[]);
        let call = ToolCall::new("read_file", json!({"path": "a.txt"}));

        let verdict = validator.validate(&call, &index);
        assert!(!verdict.is_valid());
        assert_eq!(verdict.findings[0].code, "unknown_tool");
        assert!(verdict.suggestions[0].contains("read_entry"));
    }

    #[test]
    fn missing_required_field_rejected() {
        let validator = Validator::new(schemas());
        let index = FakeIndex::new(&["a.txt"]);
        let call = ToolCall::new("read_entry", json!({}));

        let verdict = validator.validate(&call, &index);
        assert!(!verdict.is_valid());
        assert_eq!(verdict.findings[0].code, "missing_field");
        assert!(verdict.suggestions[0].contains("path"));
    }

    #[test]
    fn null_required_field_rejected() {
        let validator = Validator::new(schemas());
        let index = FakeIndex::new(&["a.txt"]);
        let call = ToolCall::new("read_entry", json!({"path": null}));
        assert!(!validator.validate(&call, &index).is_valid());
    }

    #[test]
    fn missing_target_suggests_nearest() {
        let validator = Validator::new(schemas());
        let index = FakeIndex::new(&["src/main.rs", "src/lib.rs", "README.md"]);
        let call = ToolCall::new("read_entry", json!({"path": "src/mian.rs"}));

        let verdict = validator.validate(&call, &index);
        assert!(!verdict.is_valid());
        assert_eq!(verdict.findings[0].code, "target_missing");
        assert!(
            verdict
                .suggestions
                .iter()
                .any(|s| s.contains("src/main.rs")),
            "expected nearest-path suggestion, got: {:?}",
            verdict.suggestions
        );
    }

    #[test]
    fn existing_target_passes() {
        let validator = Validator::new(schemas());
        let index = FakeIndex::new(&["src/main.rs"]);
        let call = ToolCall::new("read_entry", json!({"path": "src/main.rs"}));
        assert!(validator.validate(&call, &index).is_valid());
    }

    #[test]
    fn create_needs_existing_parent() {
        let validator = Validator::new(schemas());
        let index = FakeIndex::new(&["src"]);
        let call = ToolCall::new(
            "create_entry",
            json!({"path": "tests/new.rs", "content": "fn x() {}\nmod y;\n"}),
        );

        let verdict = validator.validate(&call, &index);
        assert!(!verdict.is_valid());
        assert_eq!(verdict.findings[0].code, "parent_missing");
    }

    #[test]
    fn create_on_existing_target_is_warning_not_block() {
        let validator = Validator::new(schemas());
        let index = FakeIndex::new(&["src", "src/main.rs"]);
        let call = ToolCall::new(
            "create_entry",
            json!({"path": "src/main.rs", "content": "fn main() {}\n// entry\n"}),
        );

        let verdict = validator.validate(&call, &index);
        // Warning surfaces, but the backend owns the semantic rejection
        assert!(verdict.is_valid());
        assert!(verdict.warnings().any(|f| f.code == "target_exists"));
    }

    #[test]
    fn placeholder_content_rejected() {
        let validator = Validator::new(schemas());
        let index = FakeIndex::new(&["src"]);
        let call = ToolCall::new(
            "create_entry",
            json!({"path": "src/new.rs", "content": "fn a() {}\n// ... existing code ...\n"}),
        );

        let verdict = validator.validate(&call, &index);
        assert!(!verdict.is_valid());
        assert!(verdict.findings.iter().any(|f| f.code == "placeholder_content"));
    }

    #[test]
    fn unbalanced_code_rejected() {
        let validator = Validator::new(schemas());
        let index = FakeIndex::new(&["src"]);
        let call = ToolCall::new(
            "create_entry",
            json!({"path": "src/new.rs", "content": "fn main() {\n    let x = 1;\n"}),
        );

        let verdict = validator.validate(&call, &index);
        assert!(!verdict.is_valid());
        assert!(
            verdict
                .findings
                .iter()
                .any(|f| f.code == "unbalanced_delimiters")
        );
    }

    #[test]
    fn render_lists_criticals_and_suggestions() {
        let validator = Validator::new(schemas());
        let index = FakeIndex::new(&["src/main.rs"]);
        let call = ToolCall::new("read_entry", json!({"path": "src/man.rs"}));

        let text = validator.validate(&call, &index).render();
        assert!(text.contains("rejected"));
        assert!(text.contains("src/man.rs"));
        assert!(text.contains("Suggestions"));
    }
}

//! Finding and analysis result data model.
//!
//! A [`Finding`] is one detected issue, immutable after creation. An
//! [`AnalysisResult`] collects the findings for one file; its
//! `patterns_matched` and `vulnerabilities_found` counters are derived from
//! the finding list, never stored.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Severity of a finding.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Parse a case-insensitive severity name.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "info" => Some(Self::Info),
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "Info",
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
            Self::Critical => "Critical",
        }
    }
}

/// How a finding was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionKind {
    /// Matched a vulnerability pattern regex.
    Pattern,
    /// Produced by LLM semantic analysis.
    Semantic,
    /// Produced by AST-level language analysis.
    Ast,
    /// Reported by an external tool.
    Tool,
    /// Reported by a CodeQL query.
    Codeql,
}

/// One detected issue in a source file. Immutable after creation.
///
/// # Example
///
/// ```rust
/// use vulnscope::analysis::{DetectionKind, Finding, Severity};
///
/// let finding = Finding::new(
///     DetectionKind::Pattern,
///     "SQL Injection",
///     "Query built by string concatenation",
///     42,
///     17,
/// )
/// .with_severity(Severity::High)
/// .with_confidence(0.8)
/// .with_matched_text("\"SELECT * FROM \" + table");
///
/// let value = serde_json::to_value(&finding).unwrap();
/// let back: Finding = serde_json::from_value(value).unwrap();
/// assert_eq!(back.vulnerability_type, "SQL Injection");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// Detection mechanism tag.
    pub kind: DetectionKind,
    /// Vulnerability category (SQL Injection, XSS, ...).
    pub vulnerability_type: String,
    /// Human-readable description.
    pub description: String,
    /// Graph id of the owning file.
    pub file_id: i64,
    /// Line the issue was found on.
    pub line_number: u32,
    /// Severity level.
    pub severity: Severity,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// Text that triggered the detection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_text: Option<String>,
    /// Graph id of the matching vulnerability pattern, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_id: Option<i64>,
    /// Name of the matching vulnerability pattern.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_name: Option<String>,
    /// Suggested remediation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    /// Open-ended metadata.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl Finding {
    /// Create a finding with medium severity and 0.5 confidence.
    pub fn new(
        kind: DetectionKind,
        vulnerability_type: impl Into<String>,
        description: impl Into<String>,
        file_id: i64,
        line_number: u32,
    ) -> Self {
        Self {
            kind,
            vulnerability_type: vulnerability_type.into(),
            description: description.into(),
            file_id,
            line_number,
            severity: Severity::Medium,
            confidence: 0.5,
            matched_text: None,
            pattern_id: None,
            pattern_name: None,
            suggestion: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_matched_text(mut self, matched_text: impl Into<String>) -> Self {
        self.matched_text = Some(matched_text.into());
        self
    }

    pub fn with_pattern(mut self, pattern_id: Option<i64>, pattern_name: impl Into<String>) -> Self {
        self.pattern_id = pattern_id;
        self.pattern_name = Some(pattern_name.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// The findings for one file plus derived metrics and an optional summary.
///
/// Constructed empty per file, appended to during strategy execution, and
/// returned to the caller; persistence happens as side effects on the graph
/// store.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalysisResult {
    pub file_id: i64,
    pub findings: Vec<Finding>,
    /// Collected code metrics, when metrics collection ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Value>,
    /// Code summary, when summarization ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<Value>,
    /// Free-form analysis metadata.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl AnalysisResult {
    /// An empty result for one file.
    pub fn new(file_id: i64) -> Self {
        Self {
            file_id,
            ..Default::default()
        }
    }

    pub fn add_finding(&mut self, finding: Finding) {
        self.findings.push(finding);
    }

    pub fn add_findings(&mut self, findings: impl IntoIterator<Item = Finding>) {
        self.findings.extend(findings);
    }

    /// Count of findings with semantic or AST detection kinds. Derived.
    pub fn vulnerabilities_found(&self) -> usize {
        self.findings
            .iter()
            .filter(|f| matches!(f.kind, DetectionKind::Semantic | DetectionKind::Ast))
            .count()
    }

    /// Count of findings with the pattern detection kind. Derived.
    pub fn patterns_matched(&self) -> usize {
        self.findings
            .iter()
            .filter(|f| f.kind == DetectionKind::Pattern)
            .count()
    }

    /// JSON view including the derived counters.
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "file_id": self.file_id,
            "vulnerabilities_found": self.vulnerabilities_found(),
            "patterns_matched": self.patterns_matched(),
            "findings": self.findings,
            "metrics": self.metrics,
            "summary": self.summary,
            "metadata": self.metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_counters_follow_kinds() {
        let mut result = AnalysisResult::new(7);
        result.add_finding(Finding::new(DetectionKind::Pattern, "a", "", 7, 1));
        result.add_finding(Finding::new(DetectionKind::Semantic, "b", "", 7, 2));
        result.add_finding(Finding::new(DetectionKind::Ast, "c", "", 7, 3));
        result.add_finding(Finding::new(DetectionKind::Tool, "d", "", 7, 4));
        assert_eq!(result.patterns_matched(), 1);
        assert_eq!(result.vulnerabilities_found(), 2);
    }

    #[test]
    fn severity_parse_is_case_insensitive() {
        assert_eq!(Severity::parse("HIGH"), Some(Severity::High));
        assert_eq!(Severity::parse("info"), Some(Severity::Info));
        assert_eq!(Severity::parse("nope"), None);
    }
}

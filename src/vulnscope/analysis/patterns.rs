//! Vulnerability pattern records and regex matching.
//!
//! A [`VulnerabilityPattern`] is data, not design: a named regex plus
//! metadata, typically loaded from `VulnerabilityPattern` nodes in the
//! graph. The [`PatternMatcher`] applies a set of patterns to file content
//! and produces pattern-kind findings with line numbers.

use regex::{Regex, RegexBuilder};
use serde_json::Value;

use crate::vulnscope::analysis::finding::{DetectionKind, Finding, Severity};

/// One named vulnerability pattern.
#[derive(Debug, Clone)]
pub struct VulnerabilityPattern {
    /// Graph id of the pattern node, when loaded from the store.
    pub id: Option<i64>,
    pub name: String,
    pub regex: String,
    /// Language the pattern applies to; `None` means every language.
    pub language: Option<String>,
    pub severity: Severity,
    pub confidence: f64,
    pub description: String,
    compiled: Option<Regex>,
}

impl VulnerabilityPattern {
    /// Create and compile a pattern. A regex that fails to compile is kept
    /// but never matches.
    pub fn new(
        name: impl Into<String>,
        regex: impl Into<String>,
        severity: Severity,
        confidence: f64,
        description: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let regex = regex.into();
        let compiled = match RegexBuilder::new(&regex)
            .multi_line(true)
            .dot_matches_new_line(true)
            .build()
        {
            Ok(compiled) => Some(compiled),
            Err(err) => {
                log::error!("failed to compile regex for pattern '{}': {}", name, err);
                None
            }
        };
        Self {
            id: None,
            name,
            regex,
            language: None,
            severity,
            confidence,
            description: description.into(),
            compiled,
        }
    }

    /// Attach the graph node id (builder pattern).
    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    /// Restrict the pattern to one language (builder pattern).
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Build a pattern from a graph query row with the aliases
    /// `pattern_id`, `name`, `description`, `regex_pattern`, `severity`,
    /// and optional `confidence` / `language`.
    pub fn from_row(row: &Value) -> Option<Self> {
        let name = row.get("name").and_then(Value::as_str)?;
        let regex = row.get("regex_pattern").and_then(Value::as_str)?;
        let severity = row
            .get("severity")
            .and_then(Value::as_str)
            .and_then(Severity::parse)
            .unwrap_or(Severity::Medium);
        let confidence = row
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(0.7);
        let description = row
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("");

        let mut pattern = Self::new(name, regex, severity, confidence, description);
        if let Some(id) = row.get("pattern_id").and_then(Value::as_i64) {
            pattern = pattern.with_id(id);
        }
        if let Some(language) = row.get("language").and_then(Value::as_str) {
            pattern = pattern.with_language(language);
        }
        Some(pattern)
    }

    /// True when the compiled regex matches somewhere in the content.
    pub fn is_match(&self, content: &str) -> bool {
        self.compiled
            .as_ref()
            .map(|re| re.is_match(content))
            .unwrap_or(false)
    }
}

/// Applies vulnerability patterns to file content.
#[derive(Debug, Default)]
pub struct PatternMatcher;

impl PatternMatcher {
    pub fn new() -> Self {
        Self
    }

    /// Match every pattern against the content, producing one finding per
    /// occurrence with an approximate line number.
    pub fn match_patterns(
        &self,
        file_id: i64,
        content: &str,
        patterns: &[VulnerabilityPattern],
    ) -> Vec<Finding> {
        let mut findings = Vec::new();
        for pattern in patterns {
            let Some(regex) = pattern.compiled.as_ref() else {
                continue;
            };
            for found in regex.find_iter(content) {
                let line_number = line_of_offset(content, found.start());
                findings.push(
                    Finding::new(
                        DetectionKind::Pattern,
                        pattern.name.clone(),
                        pattern.description.clone(),
                        file_id,
                        line_number,
                    )
                    .with_severity(pattern.severity)
                    .with_confidence(pattern.confidence)
                    .with_matched_text(found.as_str())
                    .with_pattern(pattern.id, pattern.name.clone()),
                );
            }
        }
        findings.sort_by_key(|f| f.line_number);
        findings
    }
}

/// 1-based line number of a byte offset.
pub fn line_of_offset(content: &str, offset: usize) -> u32 {
    content[..offset.min(content.len())]
        .bytes()
        .filter(|b| *b == b'\n')
        .count() as u32
        + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_report_line_numbers() {
        let pattern = VulnerabilityPattern::new(
            "Hardcoded Secret",
            r#"password\s*=\s*"[^"]+""#,
            Severity::Medium,
            0.6,
            "Hardcoded credential",
        );
        let content = "fn main() {\n    let password = \"hunter2\";\n}\n";
        let findings = PatternMatcher::new().match_patterns(1, content, &[pattern]);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].line_number, 2);
        assert_eq!(findings[0].kind, DetectionKind::Pattern);
    }

    #[test]
    fn invalid_regex_never_matches() {
        let pattern =
            VulnerabilityPattern::new("Broken", "(unclosed", Severity::Low, 0.5, "bad regex");
        assert!(!pattern.is_match("anything (unclosed"));
        let findings = PatternMatcher::new().match_patterns(1, "(unclosed", &[pattern]);
        assert!(findings.is_empty());
    }
}

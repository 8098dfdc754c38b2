//! Language-specific analyzers.
//!
//! Each analyzer knows its language name, the file extensions it covers, a
//! registry of named regex patterns, and an `analyze_ast` pass that applies
//! structural checks beyond the generic pattern library.

use std::collections::{HashMap, HashSet};

use regex::{Regex, RegexBuilder};

use crate::vulnscope::analysis::finding::{DetectionKind, Finding, Severity};
use crate::vulnscope::analysis::patterns::line_of_offset;

pub mod csharp;
pub mod java;
pub mod javascript;
pub mod php;
pub mod python;

pub use csharp::CSharpAnalyzer;
pub use java::JavaAnalyzer;
pub use javascript::JavaScriptAnalyzer;
pub use php::PhpAnalyzer;
pub use python::PythonAnalyzer;

/// One named regex pattern in a language analyzer's registry.
#[derive(Debug, Clone)]
pub struct LanguagePattern {
    pub name: &'static str,
    pub description: &'static str,
    pub regex: &'static str,
    pub severity: Severity,
    pub confidence: f64,
}

/// A language-specific code analyzer.
pub trait LanguageAnalyzer: Send + Sync {
    /// Name of the language, e.g. `"Python"`.
    fn language_name(&self) -> &'static str;

    /// File extensions (with dots) the analyzer covers.
    fn file_extensions(&self) -> HashSet<&'static str>;

    /// Registry of named vulnerability patterns for this language.
    fn patterns(&self) -> &HashMap<&'static str, LanguagePattern>;

    /// Language-aware structural analysis of one file.
    fn analyze_ast(&self, file_id: i64, content: &str) -> Vec<Finding>;

    /// Apply every registered pattern, producing pattern-kind findings.
    fn match_registered_patterns(&self, file_id: i64, content: &str) -> Vec<Finding> {
        let mut findings = Vec::new();
        for pattern in self.patterns().values() {
            findings.extend(apply_regex(
                file_id,
                content,
                pattern.regex,
                pattern.name,
                pattern.description,
                pattern.severity,
                pattern.confidence,
                DetectionKind::Pattern,
                None,
            ));
        }
        findings
    }
}

/// Apply one regex to content, producing a finding per match.
#[allow(clippy::too_many_arguments)]
pub fn apply_regex(
    file_id: i64,
    content: &str,
    regex: &str,
    name: &str,
    description: &str,
    severity: Severity,
    confidence: f64,
    kind: DetectionKind,
    suggestion: Option<&str>,
) -> Vec<Finding> {
    let compiled = match RegexBuilder::new(regex).multi_line(true).build() {
        Ok(compiled) => compiled,
        Err(err) => {
            log::error!("invalid regex pattern '{}': {}", regex, err);
            return Vec::new();
        }
    };
    regex_findings(
        file_id,
        content,
        &compiled,
        name,
        description,
        severity,
        confidence,
        kind,
        suggestion,
    )
}

/// Apply a precompiled regex to content, producing a finding per match.
#[allow(clippy::too_many_arguments)]
pub fn regex_findings(
    file_id: i64,
    content: &str,
    regex: &Regex,
    name: &str,
    description: &str,
    severity: Severity,
    confidence: f64,
    kind: DetectionKind,
    suggestion: Option<&str>,
) -> Vec<Finding> {
    regex
        .find_iter(content)
        .map(|found| {
            let mut finding = Finding::new(
                kind,
                name,
                description,
                file_id,
                line_of_offset(content, found.start()),
            )
            .with_severity(severity)
            .with_confidence(confidence)
            .with_matched_text(found.as_str());
            if let Some(suggestion) = suggestion {
                finding = finding.with_suggestion(suggestion);
            }
            finding
        })
        .collect()
}

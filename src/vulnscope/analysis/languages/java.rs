//! Java language analyzer.

use std::collections::{HashMap, HashSet};

use lazy_static::lazy_static;
use regex::Regex;

use crate::vulnscope::analysis::finding::{DetectionKind, Finding, Severity};
use crate::vulnscope::analysis::languages::{regex_findings, LanguageAnalyzer, LanguagePattern};

lazy_static! {
    static ref SQL_RE: Regex =
        Regex::new(r#"(?i)(?:createStatement|executeQuery|executeUpdate)\s*\([^)]*\+"#).unwrap();
    static ref RUNTIME_EXEC_RE: Regex =
        Regex::new(r"Runtime\.getRuntime\s*\(\s*\)\s*\.exec\s*\([^)]*\+").unwrap();
    static ref OBJECT_STREAM_RE: Regex =
        Regex::new(r"new\s+ObjectInputStream\s*\(").unwrap();
}

/// Java-specific vulnerability detection.
pub struct JavaAnalyzer {
    patterns: HashMap<&'static str, LanguagePattern>,
}

impl JavaAnalyzer {
    pub fn new() -> Self {
        let mut patterns = HashMap::new();
        patterns.insert(
            "sql_injection",
            LanguagePattern {
                name: "SQL Injection",
                description: "JDBC statement built by string concatenation",
                regex: r#"(?i)(?:executeQuery|executeUpdate)\s*\([^)]*\+"#,
                severity: Severity::High,
                confidence: 0.8,
            },
        );
        patterns.insert(
            "hardcoded_secrets",
            LanguagePattern {
                name: "Hardcoded Secrets",
                description: "Hardcoded credentials or API keys",
                regex: r#"(?i)(?:password|secret|apikey|token)\s*=\s*"[^"]{8,}""#,
                severity: Severity::Medium,
                confidence: 0.6,
            },
        );
        Self { patterns }
    }
}

impl Default for JavaAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageAnalyzer for JavaAnalyzer {
    fn language_name(&self) -> &'static str {
        "Java"
    }

    fn file_extensions(&self) -> HashSet<&'static str> {
        [".java"].into_iter().collect()
    }

    fn patterns(&self) -> &HashMap<&'static str, LanguagePattern> {
        &self.patterns
    }

    fn analyze_ast(&self, file_id: i64, content: &str) -> Vec<Finding> {
        let mut findings = self.match_registered_patterns(file_id, content);

        findings.extend(regex_findings(
            file_id,
            content,
            &SQL_RE,
            "SQL Injection",
            "JDBC query assembled from dynamic input",
            Severity::High,
            0.8,
            DetectionKind::Ast,
            Some("Use PreparedStatement with bound parameters."),
        ));
        findings.extend(regex_findings(
            file_id,
            content,
            &RUNTIME_EXEC_RE,
            "Command Injection",
            "Runtime.exec called with a composed command",
            Severity::High,
            0.8,
            DetectionKind::Ast,
            Some("Use a ProcessBuilder with a fixed argument list."),
        ));
        findings.extend(regex_findings(
            file_id,
            content,
            &OBJECT_STREAM_RE,
            "Insecure Deserialization",
            "ObjectInputStream deserialization of potentially untrusted data",
            Severity::High,
            0.7,
            DetectionKind::Ast,
            Some("Apply a deserialization filter or use a safe format."),
        ));

        findings
    }
}

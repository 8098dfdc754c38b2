//! C# language analyzer.

use std::collections::{HashMap, HashSet};

use lazy_static::lazy_static;
use regex::Regex;

use crate::vulnscope::analysis::finding::{DetectionKind, Finding, Severity};
use crate::vulnscope::analysis::languages::{regex_findings, LanguageAnalyzer, LanguagePattern};

lazy_static! {
    static ref SQL_RE: Regex = Regex::new(
        r#"(?i)new\s+SqlCommand\s*\(\s*(?:[^,)]*\+|\$")"#
    )
    .unwrap();
    static ref PROCESS_RE: Regex =
        Regex::new(r#"Process\.Start\s*\(\s*(?:[^,)]*\+|\$")"#).unwrap();
    static ref BINARY_FORMATTER_RE: Regex =
        Regex::new(r"new\s+BinaryFormatter\s*\(\s*\)").unwrap();
}

/// C#-specific vulnerability detection.
pub struct CSharpAnalyzer {
    patterns: HashMap<&'static str, LanguagePattern>,
}

impl CSharpAnalyzer {
    pub fn new() -> Self {
        let mut patterns = HashMap::new();
        patterns.insert(
            "sql_injection",
            LanguagePattern {
                name: "SQL Injection",
                description: "SqlCommand built by string concatenation or interpolation",
                regex: r#"(?i)new\s+SqlCommand\s*\(\s*(?:[^,)]*\+|\$")"#,
                severity: Severity::High,
                confidence: 0.8,
            },
        );
        patterns.insert(
            "hardcoded_secrets",
            LanguagePattern {
                name: "Hardcoded Secrets",
                description: "Hardcoded credentials or connection strings",
                regex: r#"(?i)(?:password|pwd|secret|apikey)\s*=\s*"[^"]{8,}""#,
                severity: Severity::Medium,
                confidence: 0.6,
            },
        );
        Self { patterns }
    }
}

impl Default for CSharpAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageAnalyzer for CSharpAnalyzer {
    fn language_name(&self) -> &'static str {
        "C#"
    }

    fn file_extensions(&self) -> HashSet<&'static str> {
        [".cs"].into_iter().collect()
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
            "SQL command assembled from dynamic input",
            Severity::High,
            0.8,
            DetectionKind::Ast,
            Some("Use SqlParameter placeholders instead of composed command text."),
        ));
        findings.extend(regex_findings(
            file_id,
            content,
            &PROCESS_RE,
            "Command Injection",
            "Process started with a dynamically composed command line",
            Severity::High,
            0.7,
            DetectionKind::Ast,
            Some("Pass fixed file names and use ProcessStartInfo argument lists."),
        ));
        findings.extend(regex_findings(
            file_id,
            content,
            &BINARY_FORMATTER_RE,
            "Insecure Deserialization",
            "BinaryFormatter deserialization is unsafe on untrusted data",
            Severity::High,
            0.8,
            DetectionKind::Ast,
            Some("Replace BinaryFormatter with a modern, contract-based serializer."),
        ));

        findings
    }
}

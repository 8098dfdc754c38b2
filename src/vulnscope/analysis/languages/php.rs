//! PHP language analyzer.

use std::collections::{HashMap, HashSet};

use lazy_static::lazy_static;
use regex::Regex;

use crate::vulnscope::analysis::finding::{DetectionKind, Finding, Severity};
use crate::vulnscope::analysis::languages::{regex_findings, LanguageAnalyzer, LanguagePattern};

lazy_static! {
    static ref SQL_RE: Regex = Regex::new(
        r#"(?i)(?:mysqli_query|->query)\s*\([^)]*\$_(?:GET|POST|REQUEST|COOKIE)"#
    )
    .unwrap();
    static ref EXEC_RE: Regex = Regex::new(
        r#"(?:exec|system|shell_exec|passthru|popen)\s*\([^)]*\$"#
    )
    .unwrap();
    static ref INCLUDE_RE: Regex = Regex::new(
        r#"(?:include|include_once|require|require_once)\s*\(?\s*\$_(?:GET|POST|REQUEST)"#
    )
    .unwrap();
    static ref UNSERIALIZE_RE: Regex =
        Regex::new(r#"unserialize\s*\([^)]*\$"#).unwrap();
}

/// PHP-specific vulnerability detection.
pub struct PhpAnalyzer {
    patterns: HashMap<&'static str, LanguagePattern>,
}

impl PhpAnalyzer {
    pub fn new() -> Self {
        let mut patterns = HashMap::new();
        patterns.insert(
            "sql_injection",
            LanguagePattern {
                name: "SQL Injection",
                description: "Database query using raw request parameters",
                regex: r#"(?i)(?:mysqli_query|->query)\s*\([^)]*\$_(?:GET|POST|REQUEST|COOKIE)"#,
                severity: Severity::High,
                confidence: 0.8,
            },
        );
        patterns.insert(
            "hardcoded_secrets",
            LanguagePattern {
                name: "Hardcoded Secrets",
                description: "Hardcoded credentials or API keys",
                regex: r#"(?i)\$(?:password|secret|api_key|token)\s*=\s*['"][^'"]{8,}['"]"#,
                severity: Severity::Medium,
                confidence: 0.6,
            },
        );
        Self { patterns }
    }
}

impl Default for PhpAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageAnalyzer for PhpAnalyzer {
    fn language_name(&self) -> &'static str {
        "PHP"
    }

    fn file_extensions(&self) -> HashSet<&'static str> {
        [".php", ".phtml", ".php5"].into_iter().collect()
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
            "Query built directly from request parameters",
            Severity::High,
            0.8,
            DetectionKind::Ast,
            Some("Use prepared statements with bound parameters."),
        ));
        findings.extend(regex_findings(
            file_id,
            content,
            &EXEC_RE,
            "Command Injection",
            "Shell execution with a variable argument",
            Severity::High,
            0.8,
            DetectionKind::Ast,
            Some("Escape arguments with escapeshellarg or avoid shell execution."),
        ));
        findings.extend(regex_findings(
            file_id,
            content,
            &INCLUDE_RE,
            "File Inclusion",
            "Include path taken from request parameters",
            Severity::High,
            0.8,
            DetectionKind::Ast,
            Some("Whitelist includable files; never include user input."),
        ));
        findings.extend(regex_findings(
            file_id,
            content,
            &UNSERIALIZE_RE,
            "Insecure Deserialization",
            "unserialize called on a variable value",
            Severity::High,
            0.7,
            DetectionKind::Ast,
            Some("Prefer json_decode for untrusted data."),
        ));

        findings
    }
}

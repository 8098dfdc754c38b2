//! Python language analyzer.

use std::collections::{HashMap, HashSet};

use lazy_static::lazy_static;
use regex::Regex;

use crate::vulnscope::analysis::finding::{DetectionKind, Finding, Severity};
use crate::vulnscope::analysis::languages::{regex_findings, LanguageAnalyzer, LanguagePattern};

lazy_static! {
    static ref EVAL_RE: Regex = Regex::new(r"eval\s*\(\s*[^)]+\s*\)").unwrap();
    static ref SQL_RES: Vec<Regex> = vec![
        Regex::new(r#"(?im)execute\s*\(\s*f["'](?:SELECT|UPDATE|INSERT|DELETE)"#).unwrap(),
        Regex::new(r#"(?im)execute\s*\(\s*["'](?:SELECT|UPDATE|INSERT|DELETE)[^"']*(?:%s|%\(|\$\d+)"#).unwrap(),
        Regex::new(r#"(?im)\.raw\s*\(\s*f?["'](?:SELECT|UPDATE|INSERT|DELETE)"#).unwrap(),
    ];
    static ref CMD_RES: Vec<Regex> = vec![
        Regex::new(r#"subprocess\.(?:call|run|Popen)\s*\(\s*(?:f["']|["']\s*\+\s*|["']\s*\.format)"#).unwrap(),
        Regex::new(r#"os\.(?:system|popen|exec[lv][ep]?)\s*\(\s*(?:f["']|["']\s*\+\s*|["']\s*\.format)"#).unwrap(),
    ];
    static ref DESERIAL_RES: Vec<Regex> = vec![
        Regex::new(r"pickle\.(?:loads|load)\s*\(").unwrap(),
        Regex::new(r"marshal\.(?:loads|load)\s*\(").unwrap(),
        Regex::new(r"yaml\.(?:load|unsafe_load)\s*\(").unwrap(),
    ];
}

/// Python-specific vulnerability detection.
pub struct PythonAnalyzer {
    patterns: HashMap<&'static str, LanguagePattern>,
}

impl PythonAnalyzer {
    pub fn new() -> Self {
        let mut patterns = HashMap::new();
        patterns.insert(
            "sql_injection",
            LanguagePattern {
                name: "SQL Injection",
                description: "SQL query constructed with user input",
                regex: r#"(?i)execute\s*\(\s*(?:f["'](?:SELECT|UPDATE|INSERT|DELETE)|["'][^"']+["']\s*(?:\+|\.format|%))"#,
                severity: Severity::High,
                confidence: 0.8,
            },
        );
        patterns.insert(
            "command_injection",
            LanguagePattern {
                name: "Command Injection",
                description: "Command execution with user input",
                regex: r#"(?:subprocess\.(?:call|run|Popen)|os\.(?:system|popen|exec[lv][ep]?))\s*\(\s*(?:f["']|["']\s*\+\s*|["']\s*\.format)"#,
                severity: Severity::High,
                confidence: 0.8,
            },
        );
        patterns.insert(
            "insecure_deserialization",
            LanguagePattern {
                name: "Insecure Deserialization",
                description: "Unsafe deserialization of potentially untrusted data",
                regex: r"(?:pickle|marshal|yaml)\.(?:loads?|unsafe_load)\s*\(",
                severity: Severity::High,
                confidence: 0.7,
            },
        );
        patterns.insert(
            "path_traversal",
            LanguagePattern {
                name: "Path Traversal",
                description: "Potential path traversal in file operations",
                regex: r#"(?:open|os\.path\.(?:join|abspath)|pathlib\.Path)\s*\(\s*(?:["'][^"']*["']\s*\+|f["'][^"']*\{)"#,
                severity: Severity::Medium,
                confidence: 0.6,
            },
        );
        patterns.insert(
            "hardcoded_secrets",
            LanguagePattern {
                name: "Hardcoded Secrets",
                description: "Hardcoded credentials or API keys",
                regex: r#"(?i)(?:password|secret|api_key|apikey|token|auth)\s*=\s*["'][^"']{8,}["']"#,
                severity: Severity::Medium,
                confidence: 0.6,
            },
        );
        Self { patterns }
    }
}

impl Default for PythonAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageAnalyzer for PythonAnalyzer {
    fn language_name(&self) -> &'static str {
        "Python"
    }

    fn file_extensions(&self) -> HashSet<&'static str> {
        [".py", ".pyx", ".pyi", ".pyw"].into_iter().collect()
    }

    fn patterns(&self) -> &HashMap<&'static str, LanguagePattern> {
        &self.patterns
    }

    fn analyze_ast(&self, file_id: i64, content: &str) -> Vec<Finding> {
        let mut findings = self.match_registered_patterns(file_id, content);

        findings.extend(regex_findings(
            file_id,
            content,
            &EVAL_RE,
            "Code Injection",
            "Potentially unsafe use of eval() with dynamic input",
            Severity::High,
            0.8,
            DetectionKind::Ast,
            Some("Avoid eval() on untrusted input; use safer alternatives."),
        ));
        for regex in SQL_RES.iter() {
            findings.extend(regex_findings(
                file_id,
                content,
                regex,
                "SQL Injection",
                "Potential SQL injection in database query",
                Severity::High,
                0.7,
                DetectionKind::Ast,
                Some("Use parameterized queries or ORM methods instead of string formatting."),
            ));
        }
        for regex in CMD_RES.iter() {
            findings.extend(regex_findings(
                file_id,
                content,
                regex,
                "Command Injection",
                "Potential command injection in subprocess or os call",
                Severity::High,
                0.8,
                DetectionKind::Ast,
                Some("Pass arguments as a list with shell=False instead of formatted strings."),
            ));
        }
        for regex in DESERIAL_RES.iter() {
            findings.extend(regex_findings(
                file_id,
                content,
                regex,
                "Insecure Deserialization",
                "Unsafe deserialization of potentially untrusted data",
                Severity::High,
                0.7,
                DetectionKind::Ast,
                Some("Prefer JSON, or restrict these loaders to trusted sources."),
            ));
        }

        findings
    }
}

//! JavaScript and TypeScript language analyzer.

use std::collections::{HashMap, HashSet};

use lazy_static::lazy_static;
use regex::Regex;

use crate::vulnscope::analysis::finding::{DetectionKind, Finding, Severity};
use crate::vulnscope::analysis::languages::{regex_findings, LanguageAnalyzer, LanguagePattern};

lazy_static! {
    static ref EVAL_RE: Regex =
        Regex::new(r"(?:eval|Function)\s*\(\s*[^)]*(?:\+|`)[^)]*\)").unwrap();
    static ref INNER_HTML_RE: Regex =
        Regex::new(r"\.innerHTML\s*(?:=|\+=)\s*[^;]*(?:\+|`\$\{)").unwrap();
    static ref DOCUMENT_WRITE_RE: Regex =
        Regex::new(r"document\.write(?:ln)?\s*\(\s*[^)]*\+").unwrap();
    static ref CHILD_PROCESS_RE: Regex =
        Regex::new(r#"(?:child_process|cp)\.(?:exec|execSync|spawn)\s*\(\s*(?:[^,)]*\+|`[^`]*\$\{)"#).unwrap();
    static ref PROTO_RE: Regex = Regex::new(r#"(?:__proto__|constructor\.prototype)\s*\["#).unwrap();
}

/// JavaScript/TypeScript-specific vulnerability detection.
pub struct JavaScriptAnalyzer {
    patterns: HashMap<&'static str, LanguagePattern>,
}

impl JavaScriptAnalyzer {
    pub fn new() -> Self {
        let mut patterns = HashMap::new();
        patterns.insert(
            "dom_xss",
            LanguagePattern {
                name: "DOM-based XSS",
                description: "User-controlled value written into the DOM",
                regex: r"\.(?:innerHTML|outerHTML)\s*(?:=|\+=)",
                severity: Severity::High,
                confidence: 0.6,
            },
        );
        patterns.insert(
            "code_injection",
            LanguagePattern {
                name: "Code Injection",
                description: "Dynamic code execution from strings",
                regex: r"(?:eval|new\s+Function|setTimeout\s*\(\s*['\x22`])",
                severity: Severity::High,
                confidence: 0.7,
            },
        );
        patterns.insert(
            "command_injection",
            LanguagePattern {
                name: "Command Injection",
                description: "Shell command built from dynamic input",
                regex: r"child_process[\s\S]{0,40}?\.(?:exec|execSync)\s*\(",
                severity: Severity::High,
                confidence: 0.7,
            },
        );
        patterns.insert(
            "hardcoded_secrets",
            LanguagePattern {
                name: "Hardcoded Secrets",
                description: "Hardcoded credentials or API keys",
                regex: r#"(?i)(?:password|secret|api_key|apikey|token)\s*[:=]\s*["'][^"']{8,}["']"#,
                severity: Severity::Medium,
                confidence: 0.6,
            },
        );
        Self { patterns }
    }
}

impl Default for JavaScriptAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageAnalyzer for JavaScriptAnalyzer {
    fn language_name(&self) -> &'static str {
        "JavaScript"
    }

    fn file_extensions(&self) -> HashSet<&'static str> {
        [".js", ".jsx", ".ts", ".tsx", ".mjs", ".cjs"]
            .into_iter()
            .collect()
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
            "Dynamic code execution with concatenated or templated input",
            Severity::High,
            0.8,
            DetectionKind::Ast,
            Some("Avoid eval and new Function on dynamic strings."),
        ));
        findings.extend(regex_findings(
            file_id,
            content,
            &INNER_HTML_RE,
            "DOM-based XSS",
            "innerHTML assignment built from dynamic input",
            Severity::High,
            0.7,
            DetectionKind::Ast,
            Some("Use textContent or a sanitizer before inserting HTML."),
        ));
        findings.extend(regex_findings(
            file_id,
            content,
            &DOCUMENT_WRITE_RE,
            "DOM-based XSS",
            "document.write called with concatenated input",
            Severity::Medium,
            0.6,
            DetectionKind::Ast,
            Some("Avoid document.write with untrusted data."),
        ));
        findings.extend(regex_findings(
            file_id,
            content,
            &CHILD_PROCESS_RE,
            "Command Injection",
            "Shell command assembled from dynamic input",
            Severity::High,
            0.8,
            DetectionKind::Ast,
            Some("Use spawn with an argument array rather than exec with a composed string."),
        ));
        findings.extend(regex_findings(
            file_id,
            content,
            &PROTO_RE,
            "Prototype Pollution",
            "Dynamic property write through __proto__ or constructor.prototype",
            Severity::Medium,
            0.6,
            DetectionKind::Ast,
            Some("Guard dynamic keys against __proto__ and prototype."),
        ));

        findings
    }
}

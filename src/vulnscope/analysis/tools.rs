//! External analysis tool integration.
//!
//! Registers external security tools (built-in defaults plus any configured
//! under `tools.<name>`), executes the ones applicable to a language, and
//! normalizes their output into [`Finding`]s through per-tool parsers.
//!
//! A tool is considered installed when its base command exists on PATH or
//! its version command succeeds. A tool that fails at any point is logged
//! and contributes zero findings.

use std::collections::HashMap;
use std::path::Path;

use serde_json::{json, Value};
use tokio::process::Command;

use crate::vulnscope::analysis::finding::{DetectionKind, Finding, Severity};
use crate::vulnscope::config::EngineConfig;

/// One normalized issue reported by an external tool.
#[derive(Debug, Clone)]
pub struct ToolIssue {
    pub file_path: String,
    pub line: u32,
    pub message: String,
    pub severity: String,
    pub issue_type: String,
    pub confidence: Option<String>,
    pub tool: String,
}

/// Output parsers the framework ships.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolParser {
    Bandit,
    Eslint,
    Semgrep,
    Flawfinder,
    Pmd,
    Spotbugs,
    Gosec,
    Generic,
}

impl ToolParser {
    /// Resolve a parser by its configuration name; unknown names get the
    /// generic parser.
    pub fn by_name(name: &str) -> Self {
        match name {
            "bandit" => Self::Bandit,
            "eslint" => Self::Eslint,
            "semgrep" => Self::Semgrep,
            "flawfinder" => Self::Flawfinder,
            "pmd" => Self::Pmd,
            "spotbugs" => Self::Spotbugs,
            "gosec" => Self::Gosec,
            _ => Self::Generic,
        }
    }

    /// Parse raw tool output into normalized issues.
    pub fn parse(&self, output: &str) -> Vec<ToolIssue> {
        match self {
            Self::Bandit => parse_bandit(output),
            Self::Eslint => parse_eslint(output),
            Self::Semgrep => parse_semgrep(output),
            Self::Flawfinder => parse_flawfinder(output),
            Self::Pmd => parse_pmd(output),
            Self::Spotbugs => parse_spotbugs(output),
            Self::Gosec => parse_gosec(output),
            Self::Generic => parse_generic(output),
        }
    }
}

/// Configuration of one registered external tool.
#[derive(Debug, Clone)]
pub struct ExternalTool {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    /// Language the tool supports; `None` means every language.
    pub language: Option<String>,
    pub version_command: Option<String>,
    pub installation_url: Option<String>,
    pub description: Option<String>,
    pub parser: ToolParser,
}

/// Registry and executor for external security tools.
pub struct ToolIntegration {
    tools: HashMap<String, ExternalTool>,
}

impl ToolIntegration {
    /// Register the built-in tools plus everything configured under
    /// `tools.<name>`.
    pub fn new(config: &EngineConfig) -> Self {
        let mut integration = Self {
            tools: HashMap::new(),
        };
        integration.register_built_in_tools();
        integration.register_config_tools(config);
        log::info!(
            "tool integration initialized with {} tools",
            integration.tools.len()
        );
        integration
    }

    fn register_built_in_tools(&mut self) {
        self.register_tool(ExternalTool {
            name: "bandit".into(),
            command: "bandit".into(),
            args: vec!["--format".into(), "json".into(), "-ll".into()],
            language: Some("python".into()),
            version_command: Some("bandit --version".into()),
            installation_url: Some("https://github.com/PyCQA/bandit#installation".into()),
            description: Some("Finds common security issues in Python code".into()),
            parser: ToolParser::Bandit,
        });
        self.register_tool(ExternalTool {
            name: "eslint".into(),
            command: "eslint".into(),
            args: vec!["--format".into(), "json".into()],
            language: Some("javascript".into()),
            version_command: Some("eslint --version".into()),
            installation_url: Some("https://eslint.org/docs/user-guide/getting-started".into()),
            description: Some("Lints JavaScript and TypeScript with security rules".into()),
            parser: ToolParser::Eslint,
        });
        self.register_tool(ExternalTool {
            name: "semgrep".into(),
            command: "semgrep".into(),
            args: vec![
                "--config".into(),
                "p/security-audit".into(),
                "--json".into(),
                "--quiet".into(),
            ],
            language: None,
            version_command: Some("semgrep --version".into()),
            installation_url: Some("https://semgrep.dev/docs/getting-started/".into()),
            description: Some("Lightweight multi-language static analysis".into()),
            parser: ToolParser::Semgrep,
        });
        self.register_tool(ExternalTool {
            name: "flawfinder".into(),
            command: "flawfinder".into(),
            args: vec!["--json".into(), "--minlevel=3".into()],
            language: Some("cpp".into()),
            version_command: Some("flawfinder --version".into()),
            installation_url: Some("https://github.com/david-a-wheeler/flawfinder".into()),
            description: Some("Reports potential security flaws in C/C++".into()),
            parser: ToolParser::Flawfinder,
        });
    }

    fn register_config_tools(&mut self, config: &EngineConfig) {
        for (name, settings) in &config.tools {
            if settings.command.is_empty() {
                log::warn!("configured tool {} has no command, skipping", name);
                continue;
            }
            self.register_tool(ExternalTool {
                name: name.clone(),
                command: settings.command.clone(),
                args: settings.args.clone(),
                language: settings.language.clone(),
                version_command: settings.version_command.clone(),
                installation_url: settings.installation_url.clone(),
                description: settings.description.clone(),
                parser: settings
                    .parser
                    .as_deref()
                    .map(ToolParser::by_name)
                    .unwrap_or(ToolParser::Generic),
            });
        }
    }

    /// Register or replace one tool.
    pub fn register_tool(&mut self, tool: ExternalTool) {
        self.tools.insert(tool.name.clone(), tool);
    }

    /// Names of every registered tool.
    pub fn registered_tools(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Tools applicable to a language (unset language means universal).
    pub fn tools_for_language(&self, language: &str) -> Vec<&ExternalTool> {
        let language = language.to_lowercase();
        self.tools
            .values()
            .filter(|tool| {
                tool.language
                    .as_deref()
                    .map(|l| l.eq_ignore_ascii_case(&language))
                    .unwrap_or(true)
            })
            .collect()
    }

    /// True when the tool's base command is on PATH or its version command
    /// succeeds.
    pub async fn is_tool_installed(&self, tool: &ExternalTool) -> bool {
        if command_exists(&tool.command) {
            return true;
        }
        let Some(version_command) = &tool.version_command else {
            return false;
        };
        let mut parts = version_command.split_whitespace();
        let Some(program) = parts.next() else {
            return false;
        };
        Command::new(program)
            .args(parts)
            .output()
            .await
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    /// Execute one registered tool against the targets.
    pub async fn execute_tool(&self, tool_name: &str, targets: &[&Path]) -> Vec<ToolIssue> {
        let Some(tool) = self.tools.get(tool_name) else {
            log::warn!("tool {} not registered", tool_name);
            return Vec::new();
        };
        if !self.is_tool_installed(tool).await {
            log::debug!("tool {} is not installed, skipping", tool_name);
            return Vec::new();
        }

        let mut command = Command::new(&tool.command);
        command.args(&tool.args);
        for target in targets {
            command.arg(target);
        }

        log::info!("executing tool {}", tool_name);
        let output = match command.output().await {
            Ok(output) => output,
            Err(err) => {
                log::error!("error executing tool {}: {}", tool_name, err);
                return Vec::new();
            }
        };

        // Exit code 1 conventionally means "findings reported".
        let code = output.status.code().unwrap_or(-1);
        if code != 0 && code != 1 {
            log::error!(
                "tool {} execution failed: {}",
                tool_name,
                String::from_utf8_lossy(&output.stderr)
            );
            return Vec::new();
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut issues = tool.parser.parse(&stdout);
        for issue in &mut issues {
            issue.tool = tool.name.clone();
        }
        log::info!("tool {} reported {} issues", tool_name, issues.len());
        issues
    }

    /// Execute every applicable tool for a language and merge the issues.
    pub async fn execute_all_tools(&self, language: &str, targets: &[&Path]) -> Vec<ToolIssue> {
        let tools = self.tools_for_language(language);
        if tools.is_empty() {
            log::debug!("no tools available for language {}", language);
            return Vec::new();
        }
        let mut all_issues = Vec::new();
        for tool in tools {
            all_issues.extend(self.execute_tool(&tool.name, targets).await);
        }
        all_issues
    }

    /// Convert normalized tool issues into findings for known files.
    pub fn convert_to_findings(
        &self,
        issues: &[ToolIssue],
        file_id_map: &HashMap<String, i64>,
    ) -> Vec<Finding> {
        let mut findings = Vec::new();
        for issue in issues {
            let Some(file_id) = file_id_map.get(&issue.file_path).copied() else {
                log::warn!("no file id for {}", issue.file_path);
                continue;
            };
            findings.push(
                Finding::new(
                    DetectionKind::Tool,
                    issue.issue_type.clone(),
                    issue.message.clone(),
                    file_id,
                    issue.line,
                )
                .with_severity(map_tool_severity(&issue.severity))
                .with_confidence(map_tool_confidence(issue.confidence.as_deref()))
                .with_suggestion("Review the issue reported by the external tool")
                .with_metadata("tool", json!(issue.tool)),
            );
        }
        findings
    }
}

/// Map tool severity labels (or numeric 0..4 levels) onto [`Severity`].
pub fn map_tool_severity(severity: &str) -> Severity {
    match severity.to_lowercase().as_str() {
        "critical" | "4" => Severity::Critical,
        "high" | "error" | "3" => Severity::High,
        "medium" | "warning" | "2" => Severity::Medium,
        "low" | "1" => Severity::Low,
        "info" | "note" | "0" => Severity::Info,
        other => Severity::parse(other).unwrap_or(Severity::Medium),
    }
}

/// Map tool confidence labels (or numeric levels) onto [0, 1].
pub fn map_tool_confidence(confidence: Option<&str>) -> f64 {
    match confidence.map(str::to_lowercase).as_deref() {
        Some("high") | Some("3") => 0.9,
        Some("medium") | Some("2") => 0.7,
        Some("low") | Some("1") => 0.5,
        Some("0") => 0.3,
        Some(other) => other.parse::<f64>().ok().map(|v| v.clamp(0.0, 1.0)).unwrap_or(0.7),
        None => 0.7,
    }
}

fn str_of<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

fn line_of(value: &Value, key: &str) -> u32 {
    match value.get(key) {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0) as u32,
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

fn issue(
    file_path: impl Into<String>,
    line: u32,
    message: impl Into<String>,
    severity: impl Into<String>,
    issue_type: impl Into<String>,
    confidence: Option<String>,
) -> ToolIssue {
    ToolIssue {
        file_path: file_path.into(),
        line,
        message: message.into(),
        severity: severity.into(),
        issue_type: issue_type.into(),
        confidence,
        tool: String::new(),
    }
}

fn parse_bandit(output: &str) -> Vec<ToolIssue> {
    let Ok(root) = serde_json::from_str::<Value>(output) else {
        return Vec::new();
    };
    root.get("results")
        .and_then(Value::as_array)
        .map(|results| {
            results
                .iter()
                .map(|r| {
                    issue(
                        str_of(r, "filename").unwrap_or(""),
                        line_of(r, "line_number"),
                        str_of(r, "issue_text").unwrap_or(""),
                        str_of(r, "issue_severity").unwrap_or("medium"),
                        str_of(r, "test_id")
                            .or_else(|| str_of(r, "test_name"))
                            .unwrap_or("bandit_issue"),
                        str_of(r, "issue_confidence").map(str::to_string),
                    )
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_eslint(output: &str) -> Vec<ToolIssue> {
    let Ok(root) = serde_json::from_str::<Value>(output) else {
        return Vec::new();
    };
    let Some(files) = root.as_array() else {
        return Vec::new();
    };
    let mut issues = Vec::new();
    for file in files {
        let file_path = str_of(file, "filePath").unwrap_or("");
        let Some(messages) = file.get("messages").and_then(Value::as_array) else {
            continue;
        };
        for message in messages {
            let severity = match message.get("severity").and_then(Value::as_u64) {
                Some(2) => "high",
                Some(1) => "medium",
                _ => "low",
            };
            issues.push(issue(
                file_path,
                line_of(message, "line"),
                str_of(message, "message").unwrap_or(""),
                severity,
                str_of(message, "ruleId").unwrap_or("eslint_rule"),
                None,
            ));
        }
    }
    issues
}

fn parse_semgrep(output: &str) -> Vec<ToolIssue> {
    let Ok(root) = serde_json::from_str::<Value>(output) else {
        return Vec::new();
    };
    root.get("results")
        .and_then(Value::as_array)
        .map(|results| {
            results
                .iter()
                .map(|r| {
                    let extra = r.get("extra").cloned().unwrap_or_else(|| json!({}));
                    let severity = match str_of(&extra, "severity") {
                        Some("ERROR") => "high",
                        Some("WARNING") => "medium",
                        Some("INFO") => "info",
                        Some(other) => other,
                        None => "medium",
                    };
                    issue(
                        str_of(r, "path").unwrap_or(""),
                        r.get("start").map(|s| line_of(s, "line")).unwrap_or(0),
                        str_of(&extra, "message").unwrap_or(""),
                        severity,
                        str_of(r, "check_id").unwrap_or("semgrep_rule"),
                        None,
                    )
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_flawfinder(output: &str) -> Vec<ToolIssue> {
    let Ok(root) = serde_json::from_str::<Value>(output) else {
        return Vec::new();
    };
    root.get("vulnerabilities")
        .and_then(Value::as_array)
        .map(|vulns| {
            vulns
                .iter()
                .map(|v| {
                    // Flawfinder levels run 0..5; clamp onto the 0..4 scale.
                    let level = v.get("level").and_then(Value::as_u64).unwrap_or(2).min(4);
                    issue(
                        str_of(v, "file").unwrap_or(""),
                        line_of(v, "line"),
                        str_of(v, "warning").unwrap_or(""),
                        level.to_string(),
                        str_of(v, "category").unwrap_or("flawfinder_issue"),
                        None,
                    )
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_pmd(output: &str) -> Vec<ToolIssue> {
    let Ok(root) = serde_json::from_str::<Value>(output) else {
        return Vec::new();
    };
    let Some(files) = root.get("files").and_then(Value::as_array) else {
        return Vec::new();
    };
    let mut issues = Vec::new();
    for file in files {
        let file_path = str_of(file, "filename").unwrap_or("");
        let Some(violations) = file.get("violations").and_then(Value::as_array) else {
            continue;
        };
        for violation in violations {
            // PMD priority 1 is most urgent.
            let severity = match violation.get("priority").and_then(Value::as_u64) {
                Some(1) => "critical",
                Some(2) => "high",
                Some(3) => "medium",
                Some(4) => "low",
                _ => "info",
            };
            issues.push(issue(
                file_path,
                line_of(violation, "beginline"),
                str_of(violation, "description").unwrap_or(""),
                severity,
                str_of(violation, "rule").unwrap_or("pmd_rule"),
                None,
            ));
        }
    }
    issues
}

fn parse_spotbugs(output: &str) -> Vec<ToolIssue> {
    let Ok(root) = serde_json::from_str::<Value>(output) else {
        return Vec::new();
    };
    let instances = root
        .get("BugCollection")
        .and_then(|c| c.get("BugInstance"))
        .or_else(|| root.get("BugInstance"))
        .and_then(Value::as_array);
    instances
        .map(|bugs| {
            bugs.iter()
                .map(|bug| {
                    let severity = match bug.get("priority").and_then(Value::as_u64) {
                        Some(1) => "high",
                        Some(2) => "medium",
                        _ => "low",
                    };
                    let source = bug.get("SourceLine").cloned().unwrap_or_else(|| json!({}));
                    issue(
                        str_of(&source, "sourcepath").unwrap_or(""),
                        line_of(&source, "start"),
                        str_of(bug, "LongMessage")
                            .or_else(|| str_of(bug, "ShortMessage"))
                            .unwrap_or(""),
                        severity,
                        str_of(bug, "type").unwrap_or("spotbugs_issue"),
                        None,
                    )
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_gosec(output: &str) -> Vec<ToolIssue> {
    let Ok(root) = serde_json::from_str::<Value>(output) else {
        return Vec::new();
    };
    root.get("Issues")
        .and_then(Value::as_array)
        .map(|found| {
            found
                .iter()
                .map(|i| {
                    issue(
                        str_of(i, "file").unwrap_or(""),
                        line_of(i, "line"),
                        str_of(i, "details").unwrap_or(""),
                        str_of(i, "severity").unwrap_or("medium"),
                        str_of(i, "rule_id").unwrap_or("gosec_rule"),
                        str_of(i, "confidence").map(str::to_string),
                    )
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Fallback parser: JSON list, JSON object with a list field, or grep-style
/// `path:line:msg` lines.
fn parse_generic(output: &str) -> Vec<ToolIssue> {
    if let Ok(root) = serde_json::from_str::<Value>(output) {
        let items: Option<&Vec<Value>> = match &root {
            Value::Array(items) => Some(items),
            Value::Object(map) => map.values().find_map(Value::as_array),
            _ => None,
        };
        if let Some(items) = items {
            return items
                .iter()
                .map(|item| {
                    issue(
                        str_of(item, "file_path")
                            .or_else(|| str_of(item, "file"))
                            .or_else(|| str_of(item, "path"))
                            .unwrap_or(""),
                        line_of(item, "line"),
                        str_of(item, "message").unwrap_or(""),
                        str_of(item, "severity").unwrap_or("medium"),
                        str_of(item, "type").unwrap_or("tool_issue"),
                        None,
                    )
                })
                .collect();
        }
        return Vec::new();
    }

    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(3, ':');
            let file_path = parts.next()?.trim();
            let line_number: u32 = parts.next()?.trim().parse().ok()?;
            let message = parts.next()?.trim();
            if file_path.is_empty() || message.is_empty() {
                return None;
            }
            Some(issue(
                file_path,
                line_number,
                message,
                "medium",
                "tool_issue",
                None,
            ))
        })
        .collect()
}

/// True when a command resolves to an existing file through PATH.
pub fn command_exists(command: &str) -> bool {
    if command.contains(std::path::MAIN_SEPARATOR) {
        return Path::new(command).exists();
    }
    let Some(path) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&path).any(|dir| dir.join(command).exists())
}

/// Convenience used by the analyzer: all issues for one temp file mapped to
/// one graph file id.
pub fn single_file_map(path: &Path, file_id: i64) -> HashMap<String, i64> {
    let mut map = HashMap::new();
    map.insert(path.to_string_lossy().to_string(), file_id);
    map
}

//! CodeQL integration.
//!
//! Wraps the `codeql` binary: creates (and caches) one database per
//! repository, runs the language-default query packs or individual query
//! files, and converts JSON results into findings. Everything degrades
//! gracefully when the binary is absent.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::vulnscope::analysis::finding::{DetectionKind, Finding, Severity};
use crate::vulnscope::analysis::tools::command_exists;
use crate::vulnscope::config::CodeQlSettings;

/// Default query packs per language. Configurable data, not design.
fn default_query_packs() -> HashMap<String, Vec<String>> {
    let mut packs = HashMap::new();
    for (language, pack) in [
        ("python", "codeql/python-queries:codeql-suites/python-security-and-quality.qls"),
        ("javascript", "codeql/javascript-queries:codeql-suites/javascript-security-and-quality.qls"),
        ("java", "codeql/java-queries:codeql-suites/java-security-and-quality.qls"),
        ("csharp", "codeql/csharp-queries:codeql-suites/csharp-security-and-quality.qls"),
        ("cpp", "codeql/cpp-queries:codeql-suites/cpp-security-and-quality.qls"),
        ("go", "codeql/go-queries:codeql-suites/go-security-and-quality.qls"),
        ("ruby", "codeql/ruby-queries:codeql-suites/ruby-security-and-quality.qls"),
    ] {
        packs.insert(language.to_string(), vec![pack.to_string()]);
    }
    packs
}

/// Driver for the optional CodeQL binary.
pub struct CodeQlIntegration {
    binary: Option<PathBuf>,
    queries_dir: Option<PathBuf>,
    query_packs: HashMap<String, Vec<String>>,
    // Database cache keyed by repository path.
    databases: Mutex<HashMap<PathBuf, PathBuf>>,
}

impl CodeQlIntegration {
    /// Resolve the binary from configuration or PATH.
    pub fn new(settings: &CodeQlSettings) -> Self {
        let binary = settings
            .path
            .as_ref()
            .map(PathBuf::from)
            .filter(|p| p.exists())
            .or_else(|| {
                if command_exists("codeql") {
                    Some(PathBuf::from("codeql"))
                } else {
                    None
                }
            });
        if binary.is_none() {
            log::info!("codeql binary not found, CodeQL analysis disabled");
        }
        Self {
            binary,
            queries_dir: settings.queries_dir.as_ref().map(PathBuf::from),
            query_packs: default_query_packs(),
            databases: Mutex::new(HashMap::new()),
        }
    }

    /// Override the per-language query packs (builder pattern).
    pub fn with_query_packs(mut self, query_packs: HashMap<String, Vec<String>>) -> Self {
        self.query_packs = query_packs;
        self
    }

    /// True when the binary was resolved.
    pub fn is_available(&self) -> bool {
        self.binary.is_some()
    }

    /// Directory holding custom query files, when configured.
    pub fn queries_dir(&self) -> Option<&Path> {
        self.queries_dir.as_deref()
    }

    /// Ensure a database exists for a repository, creating it on first use.
    pub async fn ensure_database(
        &self,
        repo_path: &Path,
        language: &str,
    ) -> Result<PathBuf, String> {
        let binary = self
            .binary
            .as_ref()
            .ok_or_else(|| "codeql binary not available".to_string())?;

        let mut databases = self.databases.lock().await;
        if let Some(database) = databases.get(repo_path) {
            return Ok(database.clone());
        }

        let database = tempfile::Builder::new()
            .prefix("vulnscope_codeql_")
            .tempdir()
            .map_err(|e| e.to_string())?
            .keep();

        log::info!(
            "creating codeql database for {} ({})",
            repo_path.display(),
            language
        );
        let output = Command::new(binary)
            .arg("database")
            .arg("create")
            .arg(&database)
            .arg(format!("--language={}", language.to_lowercase()))
            .arg(format!("--source-root={}", repo_path.display()))
            .arg("--overwrite")
            .output()
            .await
            .map_err(|e| e.to_string())?;
        if !output.status.success() {
            return Err(format!(
                "codeql database create failed: {}",
                String::from_utf8_lossy(&output.stderr)
            ));
        }

        databases.insert(repo_path.to_path_buf(), database.clone());
        Ok(database)
    }

    /// Run a single query file against a database.
    pub async fn execute_query(
        &self,
        database: &Path,
        query: &Path,
    ) -> Result<Vec<Value>, String> {
        let binary = self
            .binary
            .as_ref()
            .ok_or_else(|| "codeql binary not available".to_string())?;
        let output_file = tempfile::Builder::new()
            .suffix(".json")
            .tempfile()
            .map_err(|e| e.to_string())?;

        let output = Command::new(binary)
            .arg("query")
            .arg("run")
            .arg(query)
            .arg(format!("--database={}", database.display()))
            .arg(format!("--output={}", output_file.path().display()))
            .arg("--format=json")
            .output()
            .await
            .map_err(|e| e.to_string())?;
        if !output.status.success() {
            return Err(format!(
                "codeql query run failed: {}",
                String::from_utf8_lossy(&output.stderr)
            ));
        }

        read_results(output_file.path())
    }

    /// Run the default query packs for a language.
    pub async fn run_default_queries(
        &self,
        database: &Path,
        language: &str,
    ) -> Result<Vec<Value>, String> {
        let binary = self
            .binary
            .as_ref()
            .ok_or_else(|| "codeql binary not available".to_string())?;
        let Some(packs) = self.query_packs.get(&language.to_lowercase()) else {
            log::debug!("no default codeql packs for language {}", language);
            return Ok(Vec::new());
        };

        let mut results = Vec::new();
        for pack in packs {
            let output_file = tempfile::Builder::new()
                .suffix(".json")
                .tempfile()
                .map_err(|e| e.to_string())?;
            let output = Command::new(binary)
                .arg("database")
                .arg("analyze")
                .arg(database)
                .arg(pack)
                .arg("--format=json")
                .arg(format!("--output={}", output_file.path().display()))
                .output()
                .await
                .map_err(|e| e.to_string())?;
            if !output.status.success() {
                log::error!(
                    "codeql analyze failed for pack {}: {}",
                    pack,
                    String::from_utf8_lossy(&output.stderr)
                );
                continue;
            }
            results.extend(read_results(output_file.path())?);
        }
        Ok(results)
    }

    /// Convert CodeQL JSON results into findings for known files.
    pub fn convert_to_findings(
        &self,
        results: &[Value],
        file_id_map: &HashMap<String, i64>,
    ) -> Vec<Finding> {
        let mut findings = Vec::new();
        for result in results {
            let file_path = result
                .get("path")
                .or_else(|| result.get("file"))
                .and_then(Value::as_str)
                .unwrap_or("");
            let Some(file_id) = file_id_map.get(file_path).copied() else {
                continue;
            };
            let rule = result
                .get("rule_id")
                .or_else(|| result.get("query"))
                .and_then(Value::as_str)
                .unwrap_or("codeql_result");
            let message = result
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("CodeQL query result");
            let line = result
                .get("line")
                .or_else(|| result.get("start_line"))
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32;
            let severity = result
                .get("severity")
                .and_then(Value::as_str)
                .and_then(Severity::parse)
                .unwrap_or(Severity::Medium);

            findings.push(
                Finding::new(DetectionKind::Codeql, rule, message, file_id, line)
                    .with_severity(severity)
                    .with_confidence(0.8)
                    .with_metadata("query", Value::String(rule.to_string())),
            );
        }
        findings
    }
}

fn read_results(path: &Path) -> Result<Vec<Value>, String> {
    let raw = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    let root: Value = serde_json::from_str(&raw).map_err(|e| e.to_string())?;
    Ok(match root {
        Value::Array(items) => items,
        Value::Object(map) => map
            .into_iter()
            .find_map(|(_, value)| match value {
                Value::Array(items) => Some(items),
                _ => None,
            })
            .unwrap_or_default(),
        _ => Vec::new(),
    })
}

//! Code metrics collection.
//!
//! Collects language-agnostic metrics (size, line counts, comment ratio,
//! line lengths) plus language-specific counts (functions, classes,
//! imports) and a cyclomatic complexity estimate. The complexity estimate
//! follows the rule: base 1, plus 1 per control-flow branch, plus 1 per
//! boolean operator term.
//!
//! Metrics are persisted as a `CodeMetrics` node linked to the file with a
//! `HAS_METRICS` edge.

use std::path::Path;
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Map, Value};

use crate::vulnscope::graph::{edges, labels, GraphError, GraphStore};

lazy_static! {
    static ref PY_FUNCTION_RE: Regex = Regex::new(r"(?m)^\s*def\s+\w+").unwrap();
    static ref PY_CLASS_RE: Regex = Regex::new(r"(?m)^\s*class\s+\w+").unwrap();
    static ref PY_IMPORT_RE: Regex = Regex::new(r"(?m)^\s*(?:import|from)\s+\w").unwrap();
    static ref PY_BRANCH_RE: Regex =
        Regex::new(r"\b(?:if|elif|for|while|except|case)\b|\band\b|\bor\b").unwrap();
    static ref JS_FUNCTION_RE: Regex =
        Regex::new(r"\bfunction\b|=>\s*[{(]|=>\s*\w").unwrap();
    static ref JS_CLASS_RE: Regex = Regex::new(r"\bclass\s+\w+").unwrap();
    static ref JS_IMPORT_RE: Regex =
        Regex::new(r#"(?m)^\s*(?:import\s|const\s+\w+\s*=\s*require\()"#).unwrap();
    static ref C_FAMILY_BRANCH_RE: Regex =
        Regex::new(r"\b(?:if|else if|for|while|case|catch)\b|&&|\|\||\?").unwrap();
    static ref C_FAMILY_FUNCTION_RE: Regex =
        Regex::new(r"(?m)^\s*(?:[\w<>\[\]]+\s+)+\w+\s*\([^;{]*\)\s*\{").unwrap();
    static ref C_FAMILY_CLASS_RE: Regex =
        Regex::new(r"\b(?:class|struct|interface)\s+\w+").unwrap();
    static ref C_FAMILY_IMPORT_RE: Regex =
        Regex::new(r"(?m)^\s*(?:#include|import\s+[\w.]+;|using\s+[\w.]+;)").unwrap();
}

/// Collects code metrics from files on disk.
#[derive(Debug, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Collect every metric for one file. Unreadable files yield an empty
    /// map.
    pub fn collect_metrics(&self, file_path: &Path) -> Map<String, Value> {
        let content = match std::fs::read_to_string(file_path) {
            Ok(content) => content,
            Err(err) => {
                log::error!("failed to read {} for metrics: {}", file_path.display(), err);
                return Map::new();
            }
        };
        let language = language_from_extension(
            file_path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or(""),
        );

        let mut metrics = basic_metrics(&content);
        metrics.insert("language".to_string(), json!(language));
        for (key, value) in language_metrics(&content, language) {
            metrics.insert(key, value);
        }
        metrics
    }

    /// Persist metrics as a `CodeMetrics` node linked to the file.
    pub async fn store_metrics(
        &self,
        graph: &Arc<dyn GraphStore>,
        file_id: i64,
        metrics: &Map<String, Value>,
    ) -> Result<i64, GraphError> {
        // Keep only scalar properties; nested values are not node-safe.
        let properties: Map<String, Value> = metrics
            .iter()
            .filter(|(_, value)| {
                matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_))
            })
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let metrics_id = graph
            .create_node(&[labels::CODE_METRICS], Value::Object(properties))
            .await?;
        graph
            .create_relationship(file_id, metrics_id, edges::HAS_METRICS, None)
            .await?;
        Ok(metrics_id)
    }
}

/// Map a file extension to the metric language family.
pub fn language_from_extension(extension: &str) -> &'static str {
    match extension.trim_start_matches('.') {
        "py" | "pyx" | "pyi" | "pyw" => "Python",
        "js" | "jsx" | "mjs" | "cjs" => "JavaScript",
        "ts" | "tsx" => "TypeScript",
        "java" => "Java",
        "cs" => "C#",
        "c" | "h" | "cpp" | "cc" | "hpp" => "C/C++",
        "php" | "phtml" => "PHP",
        "rb" => "Ruby",
        "go" => "Go",
        _ => "Unknown",
    }
}

fn basic_metrics(content: &str) -> Map<String, Value> {
    let lines: Vec<&str> = content.lines().collect();
    let total_lines = lines.len();
    let non_empty_lines = lines.iter().filter(|l| !l.trim().is_empty()).count();
    let comment_lines = lines
        .iter()
        .filter(|l| {
            let trimmed = l.trim_start();
            trimmed.starts_with("//")
                || trimmed.starts_with('#')
                || trimmed.starts_with("/*")
                || trimmed.starts_with('*')
        })
        .count();
    let comment_ratio = if non_empty_lines > 0 {
        comment_lines as f64 / non_empty_lines as f64
    } else {
        0.0
    };
    let max_line_length = lines.iter().map(|l| l.len()).max().unwrap_or(0);
    let avg_line_length = if total_lines > 0 {
        lines.iter().map(|l| l.len()).sum::<usize>() as f64 / total_lines as f64
    } else {
        0.0
    };

    let mut metrics = Map::new();
    metrics.insert("file_size_bytes".to_string(), json!(content.len()));
    metrics.insert("total_lines".to_string(), json!(total_lines));
    metrics.insert("non_empty_lines".to_string(), json!(non_empty_lines));
    metrics.insert("comment_lines".to_string(), json!(comment_lines));
    metrics.insert("comment_ratio".to_string(), json!(comment_ratio));
    metrics.insert("max_line_length".to_string(), json!(max_line_length));
    metrics.insert("avg_line_length".to_string(), json!(avg_line_length));
    metrics
}

fn language_metrics(content: &str, language: &str) -> Map<String, Value> {
    let mut metrics = Map::new();
    match language {
        "Python" => {
            metrics.insert(
                "function_count".to_string(),
                json!(PY_FUNCTION_RE.find_iter(content).count()),
            );
            metrics.insert(
                "class_count".to_string(),
                json!(PY_CLASS_RE.find_iter(content).count()),
            );
            metrics.insert(
                "import_count".to_string(),
                json!(PY_IMPORT_RE.find_iter(content).count()),
            );
            metrics.insert(
                "cyclomatic_complexity".to_string(),
                json!(1 + PY_BRANCH_RE.find_iter(content).count()),
            );
        }
        "JavaScript" | "TypeScript" => {
            metrics.insert(
                "function_count".to_string(),
                json!(JS_FUNCTION_RE.find_iter(content).count()),
            );
            metrics.insert(
                "class_count".to_string(),
                json!(JS_CLASS_RE.find_iter(content).count()),
            );
            metrics.insert(
                "import_count".to_string(),
                json!(JS_IMPORT_RE.find_iter(content).count()),
            );
            metrics.insert(
                "cyclomatic_complexity".to_string(),
                json!(1 + C_FAMILY_BRANCH_RE.find_iter(content).count()),
            );
        }
        "Java" | "C#" | "C/C++" | "Go" | "PHP" => {
            metrics.insert(
                "function_count".to_string(),
                json!(C_FAMILY_FUNCTION_RE.find_iter(content).count()),
            );
            metrics.insert(
                "class_count".to_string(),
                json!(C_FAMILY_CLASS_RE.find_iter(content).count()),
            );
            metrics.insert(
                "import_count".to_string(),
                json!(C_FAMILY_IMPORT_RE.find_iter(content).count()),
            );
            metrics.insert(
                "cyclomatic_complexity".to_string(),
                json!(1 + C_FAMILY_BRANCH_RE.find_iter(content).count()),
            );
        }
        _ => {}
    }
    metrics
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn python_complexity_counts_branches_and_boolean_terms() {
        let content = "def f(x):\n    if x and x > 1:\n        return 1\n    for i in range(x):\n        pass\n";
        let metrics = language_metrics(content, "Python");
        // base 1 + if + and + for = 4
        assert_eq!(metrics["cyclomatic_complexity"], json!(4));
        assert_eq!(metrics["function_count"], json!(1));
    }

    #[test]
    fn basic_metrics_count_comments() {
        let content = "# header\n\ncode()\n# trailing\n";
        let metrics = basic_metrics(content);
        assert_eq!(metrics["total_lines"], json!(4));
        assert_eq!(metrics["non_empty_lines"], json!(3));
        assert_eq!(metrics["comment_lines"], json!(2));
    }

    #[test]
    fn extension_mapping() {
        assert_eq!(language_from_extension(".py"), "Python");
        assert_eq!(language_from_extension("tsx"), "TypeScript");
        assert_eq!(language_from_extension("weird"), "Unknown");
    }
}

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use vulnscope::analysis::strategies::AnalysisOptions;
use vulnscope::analysis::{CodeAnalyzer, DetectionKind, Finding, ParallelOrchestrator, Severity};
use vulnscope::client::{
    CompletionClient, CompletionError, CompletionRequest, CompletionResponse,
};
use vulnscope::config::{AnalysisSettings, EngineConfig};
use vulnscope::graph::{GraphError, GraphStore};

/// In-memory graph store: canned query rows plus recorded writes.
#[derive(Default)]
struct MockGraph {
    repo: Option<(i64, String, String)>,
    files: Vec<Value>,
    contents: HashMap<i64, (String, String)>,
    patterns: Vec<Value>,
    created_nodes: Mutex<Vec<(Vec<String>, Value)>>,
    created_edges: Mutex<Vec<(i64, i64, String)>>,
}

impl MockGraph {
    fn with_file(mut self, file_id: i64, path: &str, content: &str) -> Self {
        self.contents
            .insert(file_id, (content.to_string(), path.to_string()));
        self
    }

    fn with_pattern(mut self, pattern_id: i64, name: &str, regex: &str, severity: &str) -> Self {
        self.patterns.push(json!({
            "pattern_id": pattern_id,
            "name": name,
            "description": format!("{} pattern", name),
            "regex_pattern": regex,
            "severity": severity,
        }));
        self
    }

    fn node_count(&self, label: &str) -> usize {
        self.created_nodes
            .lock()
            .unwrap()
            .iter()
            .filter(|(labels, _)| labels.iter().any(|l| l == label))
            .count()
    }

    fn edge_count(&self, rel_type: &str) -> usize {
        self.created_edges
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, _, rel)| rel == rel_type)
            .count()
    }
}

#[async_trait]
impl GraphStore for MockGraph {
    async fn run_query(&self, query: &str, params: Value) -> Result<Vec<Value>, GraphError> {
        if query.contains("HAS_CONTENT") {
            let file_id = params["file_id"].as_i64().unwrap_or(-1);
            return Ok(self
                .contents
                .get(&file_id)
                .map(|(content, path)| vec![json!({"content": content, "path": path})])
                .unwrap_or_default());
        }
        if query.contains("VulnerabilityPattern") {
            return Ok(self.patterns.clone());
        }
        if query.contains("HAS_FILE") {
            return Ok(self.files.clone());
        }
        if query.contains("MATCH (r:Repository)") {
            return Ok(self
                .repo
                .as_ref()
                .map(|(_, name, path)| vec![json!({"name": name, "path": path})])
                .unwrap_or_default());
        }
        Ok(Vec::new())
    }

    async fn create_node(&self, labels: &[&str], properties: Value) -> Result<i64, GraphError> {
        let mut nodes = self.created_nodes.lock().unwrap();
        nodes.push((labels.iter().map(|l| l.to_string()).collect(), properties));
        Ok(1000 + nodes.len() as i64)
    }

    async fn create_relationship(
        &self,
        start_id: i64,
        end_id: i64,
        rel_type: &str,
        _properties: Option<Value>,
    ) -> Result<(), GraphError> {
        self.created_edges
            .lock()
            .unwrap()
            .push((start_id, end_id, rel_type.to_string()));
        Ok(())
    }
}

/// Pure completion client: identical input always yields identical output.
struct FixedClient {
    response: String,
}

#[async_trait]
impl CompletionClient for FixedClient {
    async fn create_completion(
        &self,
        _request: CompletionRequest,
    ) -> Result<CompletionResponse, CompletionError> {
        Ok(CompletionResponse::from_text(self.response.clone()))
    }
}

fn semantic_client() -> Arc<dyn CompletionClient> {
    Arc::new(FixedClient {
        response: json!([{
            "vulnerability_type": "Hardcoded Credentials",
            "description": "A credential literal is embedded in the source",
            "line_number": 2,
            "severity": "High",
            "confidence": 0.9,
            "suggestion": "Move the credential into configuration",
        }])
        .to_string(),
    })
}

const PYTHON_SAMPLE: &str = r#"import subprocess
password = "super-secret-value"
subprocess.call(f"convert {name}")
"#;

#[tokio::test]
async fn analyze_file_merges_strategy_findings_and_persists_them() {
    let graph = Arc::new(
        MockGraph::default()
            .with_file(7, "app/main.py", PYTHON_SAMPLE)
            .with_pattern(91, "Subprocess Use", r"subprocess\.call", "Medium"),
    );
    let analyzer = CodeAnalyzer::new(graph.clone(), semantic_client(), EngineConfig::default());

    let result = analyzer
        .analyze_file(7, "Python", &AnalysisOptions::default())
        .await;

    // Pattern-kind findings: one from the stored pattern plus two from the
    // Python analyzer's own registry (command injection, hardcoded secret).
    assert_eq!(result.patterns_matched(), 3);
    assert!(result.vulnerabilities_found() >= 1);
    assert!(result
        .findings
        .iter()
        .any(|f| f.pattern_name.as_deref() == Some("Subprocess Use") && f.pattern_id == Some(91)));
    assert!(result
        .findings
        .iter()
        .any(|f| f.kind == DetectionKind::Semantic && f.severity == Severity::High));
    assert!(result
        .findings
        .iter()
        .any(|f| f.kind == DetectionKind::Ast && f.vulnerability_type == "Command Injection"));

    // Every finding was persisted with a HAS_FINDING edge; the pattern
    // match also got its MATCHES_PATTERN edge.
    assert_eq!(graph.node_count("Finding"), result.findings.len());
    assert_eq!(graph.edge_count("HAS_FINDING"), result.findings.len());
    assert_eq!(graph.edge_count("MATCHES_PATTERN"), 1);
}

#[tokio::test]
async fn analyze_file_is_deterministic_under_a_pure_client() {
    let graph = Arc::new(
        MockGraph::default()
            .with_file(7, "app/main.py", PYTHON_SAMPLE)
            .with_pattern(91, "Subprocess Use", r"subprocess\.call", "Medium"),
    );
    let analyzer = CodeAnalyzer::new(graph, semantic_client(), EngineConfig::default());

    let first = analyzer
        .analyze_file(7, "Python", &AnalysisOptions::default())
        .await;
    let second = analyzer
        .analyze_file(7, "Python", &AnalysisOptions::default())
        .await;

    let mut first_set: Vec<Value> = first
        .findings
        .iter()
        .map(|f| serde_json::to_value(f).unwrap())
        .collect();
    let mut second_set: Vec<Value> = second
        .findings
        .iter()
        .map(|f| serde_json::to_value(f).unwrap())
        .collect();
    first_set.sort_by_key(|v| v.to_string());
    second_set.sort_by_key(|v| v.to_string());
    assert_eq!(first_set, second_set);
}

#[tokio::test]
async fn analyze_file_without_content_returns_empty_result() {
    let graph = Arc::new(MockGraph::default());
    let analyzer = CodeAnalyzer::new(graph, semantic_client(), EngineConfig::default());

    let result = analyzer
        .analyze_file(404, "Python", &AnalysisOptions::default())
        .await;
    assert!(result.findings.is_empty());
    assert_eq!(result.file_id, 404);
}

#[tokio::test]
async fn disabled_strategies_do_not_run() {
    let graph = Arc::new(
        MockGraph::default()
            .with_file(7, "app/main.py", PYTHON_SAMPLE)
            .with_pattern(91, "Subprocess Use", r"subprocess\.call", "Medium"),
    );
    let analyzer = CodeAnalyzer::new(graph, semantic_client(), EngineConfig::default());

    let options = AnalysisOptions {
        semantic_analysis: false,
        ast_analysis: false,
        ..AnalysisOptions::default()
    };
    let result = analyzer.analyze_file(7, "Python", &options).await;
    assert_eq!(result.patterns_matched(), 1);
    assert_eq!(result.vulnerabilities_found(), 0);
}

#[tokio::test]
async fn analyze_repository_aggregates_per_file_counts() {
    let mut graph = MockGraph::default()
        .with_file(1, "a.py", PYTHON_SAMPLE)
        .with_file(2, "b.py", "x = 1\n");
    graph.repo = Some((10, "demo".to_string(), "/tmp/demo".to_string()));
    graph.files = vec![
        json!({"file_id": 1, "file_path": "a.py", "language": "Python"}),
        json!({"file_id": 2, "file_path": "b.py", "language": "Python"}),
    ];
    graph = graph.with_pattern(91, "Subprocess Use", r"subprocess\.call", "Medium");

    let analyzer = CodeAnalyzer::new(Arc::new(graph), semantic_client(), EngineConfig::default());
    let options = AnalysisOptions {
        semantic_analysis: false,
        ast_analysis: false,
        ..AnalysisOptions::default()
    };
    let results = analyzer.analyze_repository(10, &options).await.unwrap();

    assert_eq!(results["repository_name"], "demo");
    assert_eq!(results["files_analyzed"], 2);
    assert_eq!(results["patterns_matched"], 1);
    assert_eq!(results["analysis_details"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn analyze_repository_fails_for_unknown_repo() {
    let graph = Arc::new(MockGraph::default());
    let analyzer = CodeAnalyzer::new(graph, semantic_client(), EngineConfig::default());
    assert!(analyzer
        .analyze_repository(999, &AnalysisOptions::default())
        .await
        .is_err());
}

#[tokio::test]
async fn semaphore_never_oversubscribes() {
    let orchestrator = ParallelOrchestrator::new(&AnalysisSettings {
        max_concurrency: Some(3),
    });

    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let tasks: Vec<_> = (0..20)
        .map(|n| {
            let running = running.clone();
            let peak = peak.clone();
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                n
            }
        })
        .collect();

    let results = orchestrator.execute_parallel_tasks(tasks).await;
    assert_eq!(results, (0..20).collect::<Vec<_>>());
    assert!(peak.load(Ordering::SeqCst) <= 3);
}

#[tokio::test]
async fn finding_round_trip_preserves_fields() {
    let finding = Finding::new(
        DetectionKind::Pattern,
        "SQL Injection",
        "query concatenation",
        42,
        17,
    )
    .with_severity(Severity::Critical)
    .with_confidence(0.85)
    .with_matched_text("\"SELECT \" + table")
    .with_pattern(Some(7), "sql_concat")
    .with_suggestion("use bind parameters");

    let value = serde_json::to_value(&finding).unwrap();
    let back: Finding = serde_json::from_value(value).unwrap();

    assert_eq!(back.kind, DetectionKind::Pattern);
    assert_eq!(back.vulnerability_type, "SQL Injection");
    assert_eq!(back.description, "query concatenation");
    assert_eq!(back.file_id, 42);
    assert_eq!(back.line_number, 17);
    assert_eq!(back.severity, Severity::Critical);
    assert!((back.confidence - 0.85).abs() < 1e-9);
    assert_eq!(back.matched_text.as_deref(), Some("\"SELECT \" + table"));
    assert_eq!(back.pattern_id, Some(7));
    assert_eq!(back.pattern_name.as_deref(), Some("sql_concat"));
    assert_eq!(back.suggestion.as_deref(), Some("use bind parameters"));
}

//! The code analysis pipeline.
//!
//! [`CodeAnalyzer`] composes the analysis strategies, the language
//! analyzers, metrics collection, external tools, CodeQL, and structure
//! extraction into one per-file pipeline, with repository-level fan-out
//! through the [`ParallelOrchestrator`].
//!
//! One instance is constructed explicitly and passed around; strategy and
//! language analyzer registries are instance fields, not process globals.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::vulnscope::analysis::codeql::CodeQlIntegration;
use crate::vulnscope::analysis::finding::{AnalysisResult, Finding};
use crate::vulnscope::analysis::languages::{
    CSharpAnalyzer, JavaAnalyzer, JavaScriptAnalyzer, LanguageAnalyzer, PhpAnalyzer, PythonAnalyzer,
};
use crate::vulnscope::analysis::metrics::MetricsCollector;
use crate::vulnscope::analysis::parallel::{FileRef, ParallelOrchestrator};
use crate::vulnscope::analysis::strategies::ast::AstAnalysisStrategy;
use crate::vulnscope::analysis::strategies::pattern_matching::PatternMatchingStrategy;
use crate::vulnscope::analysis::strategies::semantic::SemanticAnalysisStrategy;
use crate::vulnscope::analysis::strategies::{AnalysisOptions, AnalysisStrategy};
use crate::vulnscope::analysis::structure::{store_code_structure, StructureExtractor};
use crate::vulnscope::analysis::summarize::{CodeSummarizer, SummaryLevel};
use crate::vulnscope::analysis::tools::{single_file_map, ToolIntegration};
use crate::vulnscope::client::{CompletionClient, EmbeddingClient};
use crate::vulnscope::config::EngineConfig;
use crate::vulnscope::graph::{edges, labels, GraphError, GraphStore};

/// Orchestrates the per-file and per-repository analysis pipeline.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use vulnscope::analysis::{AnalysisOptions, CodeAnalyzer};
/// use vulnscope::config::EngineConfig;
/// # use vulnscope::clients::HttpCompletionClient;
/// # use vulnscope::graph::GraphStore;
///
/// # async fn example(graph: Arc<dyn GraphStore>) {
/// let client = Arc::new(HttpCompletionClient::new("https://api.openai.com/v1", "key"));
/// let analyzer = CodeAnalyzer::new(graph, client, EngineConfig::default());
///
/// let result = analyzer
///     .analyze_file(42, "Python", &AnalysisOptions::default())
///     .await;
/// println!("{} findings", result.findings.len());
/// # }
/// ```
pub struct CodeAnalyzer {
    graph: Arc<dyn GraphStore>,
    config: EngineConfig,
    strategies: HashMap<&'static str, Arc<dyn AnalysisStrategy>>,
    ast_strategy: Arc<AstAnalysisStrategy>,
    parallel: ParallelOrchestrator,
    codeql: CodeQlIntegration,
    metrics: MetricsCollector,
    tools: ToolIntegration,
    structure: Option<Arc<dyn StructureExtractor>>,
    summarizer: CodeSummarizer,
}

impl CodeAnalyzer {
    /// Build an analyzer with the default strategies and language
    /// analyzers registered.
    pub fn new(
        graph: Arc<dyn GraphStore>,
        client: Arc<dyn CompletionClient>,
        config: EngineConfig,
    ) -> Self {
        let ast_strategy = Arc::new(AstAnalysisStrategy::new());
        for analyzer in default_language_analyzers() {
            ast_strategy.register_language_analyzer(analyzer);
        }

        let mut strategies: HashMap<&'static str, Arc<dyn AnalysisStrategy>> = HashMap::new();
        strategies.insert(
            "pattern_matching",
            Arc::new(PatternMatchingStrategy::new(graph.clone())),
        );
        strategies.insert(
            "semantic_analysis",
            Arc::new(SemanticAnalysisStrategy::new(graph.clone(), client.clone())),
        );
        strategies.insert("ast_analysis", ast_strategy.clone());

        let parallel = ParallelOrchestrator::new(&config.analysis);
        let codeql = CodeQlIntegration::new(&config.codeql);
        let tools = ToolIntegration::new(&config);
        let summarizer = CodeSummarizer::new(client, config.summarization.clone());

        log::info!("code analyzer initialized");
        Self {
            graph,
            config,
            strategies,
            ast_strategy,
            parallel,
            codeql,
            metrics: MetricsCollector::new(),
            tools,
            structure: None,
            summarizer,
        }
    }

    /// Enable pattern-similarity context in the semantic strategy
    /// (builder pattern).
    pub fn with_embeddings(
        mut self,
        client: Arc<dyn CompletionClient>,
        embeddings: Arc<dyn EmbeddingClient>,
    ) -> Self {
        self.strategies.insert(
            "semantic_analysis",
            Arc::new(
                SemanticAnalysisStrategy::new(self.graph.clone(), client)
                    .with_embeddings(embeddings),
            ),
        );
        self
    }

    /// Attach an optional structure extractor (builder pattern).
    pub fn with_structure_extractor(mut self, extractor: Arc<dyn StructureExtractor>) -> Self {
        self.structure = Some(extractor);
        self
    }

    /// Register or replace an analysis strategy.
    pub fn register_strategy(&mut self, name: &'static str, strategy: Arc<dyn AnalysisStrategy>) {
        log::info!("registered analysis strategy: {}", name);
        self.strategies.insert(name, strategy);
    }

    /// Register a language analyzer with the AST strategy.
    pub fn register_language_analyzer(&self, analyzer: Arc<dyn LanguageAnalyzer>) {
        self.ast_strategy.register_language_analyzer(analyzer);
    }

    /// The bounded fan-out orchestrator.
    pub fn parallel_orchestrator(&self) -> &ParallelOrchestrator {
        &self.parallel
    }

    /// Analyze every code file of a repository.
    ///
    /// Returns aggregate statistics plus per-file details. Fails only when
    /// the repository itself cannot be loaded.
    pub async fn analyze_repository(
        &self,
        repo_id: i64,
        options: &AnalysisOptions,
    ) -> Result<Value, GraphError> {
        log::info!("analyzing repository {}", repo_id);

        let repo_rows = self
            .graph
            .run_query(
                "MATCH (r:Repository) WHERE id(r) = $repo_id RETURN r.name as name, r.path as path",
                json!({"repo_id": repo_id}),
            )
            .await?;
        let repo = repo_rows
            .first()
            .ok_or_else(|| GraphError::new(format!("repository {} not found", repo_id)))?;
        let repo_name = repo.get("name").and_then(Value::as_str).unwrap_or("");

        let file_rows = self
            .graph
            .run_query(
                "MATCH (r:Repository)-[:HAS_FILE]->(f:File) \
                 WHERE id(r) = $repo_id AND f.language IS NOT NULL \
                 RETURN id(f) as file_id, f.path as file_path, f.language as language",
                json!({"repo_id": repo_id}),
            )
            .await?;

        let files: Vec<FileRef> = file_rows
            .iter()
            .filter_map(|row| {
                Some(FileRef {
                    file_id: row.get("file_id")?.as_i64()?,
                    path: row.get("file_path")?.as_str()?.to_string(),
                    language: row.get("language")?.as_str()?.to_string(),
                })
            })
            .collect();

        let results = self
            .parallel
            .parallelize_by_file(&files, |file| {
                let file_id = file.file_id;
                let language = file.language.clone();
                async move { self.analyze_file(file_id, &language, options).await }
            })
            .await;

        let mut files_analyzed = 0usize;
        let mut vulnerabilities_found = 0usize;
        let mut patterns_matched = 0usize;
        let mut analysis_details = Vec::with_capacity(results.len());
        for (file, result) in files.iter().zip(results.iter()) {
            files_analyzed += 1;
            vulnerabilities_found += result.vulnerabilities_found();
            patterns_matched += result.patterns_matched();
            analysis_details.push(json!({
                "file_id": file.file_id,
                "file_path": file.path,
                "language": file.language,
                "results": result.to_value(),
            }));
        }

        log::info!(
            "repository analysis complete: {} files analyzed, {} vulnerabilities found",
            files_analyzed,
            vulnerabilities_found
        );

        Ok(json!({
            "repository_id": repo_id,
            "repository_name": repo_name,
            "files_analyzed": files_analyzed,
            "vulnerabilities_found": vulnerabilities_found,
            "patterns_matched": patterns_matched,
            "analysis_details": analysis_details,
        }))
    }

    /// Analyze one file.
    ///
    /// The core unit of work: loads content from the graph, runs structure
    /// extraction, fans the enabled strategies out in parallel, optionally
    /// runs metrics, external tools, and CodeQL, persists findings, and
    /// returns the merged result. Strategy and tool failures are logged
    /// and contribute zero findings.
    pub async fn analyze_file(
        &self,
        file_id: i64,
        language: &str,
        options: &AnalysisOptions,
    ) -> AnalysisResult {
        let content_rows = match self
            .graph
            .run_query(
                "MATCH (f:File)-[:HAS_CONTENT]->(c:CodeContent) \
                 WHERE id(f) = $file_id \
                 RETURN c.content as content, f.path as path",
                json!({"file_id": file_id}),
            )
            .await
        {
            Ok(rows) => rows,
            Err(err) => {
                log::error!("failed to load content for file {}: {}", file_id, err);
                return AnalysisResult::new(file_id);
            }
        };
        let Some(row) = content_rows.first() else {
            log::warn!("no content found for file {}", file_id);
            return AnalysisResult::new(file_id);
        };
        let content = row
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let file_path = row
            .get("path")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        let mut result = AnalysisResult::new(file_id);
        result
            .metadata
            .insert("file_path".to_string(), json!(file_path));

        // Structure-derived findings stay out of the Finding node
        // persistence below.
        if options.code_structure_mapping {
            if let Some(extractor) = self.structure.as_ref().filter(|e| e.is_available()) {
                if let Some(structure) = extractor.extract_structure(&content, language).await {
                    if let Err(err) =
                        store_code_structure(&self.graph, file_id, &structure).await
                    {
                        log::error!("failed to store code structure: {}", err);
                    }
                    result.add_findings(
                        extractor.security_findings(&content, language, file_id).await,
                    );
                }
            }
        }
        let structure_finding_count = result.findings.len();

        // Fan the enabled strategies out through the shared semaphore.
        let mut tasks: Vec<
            std::pin::Pin<Box<dyn std::future::Future<Output = Vec<Finding>> + Send + '_>>,
        > = Vec::new();
        for (name, enabled) in [
            ("pattern_matching", options.pattern_matching),
            ("semantic_analysis", options.semantic_analysis),
            ("ast_analysis", options.ast_analysis),
        ] {
            if !enabled {
                continue;
            }
            let Some(strategy) = self.strategies.get(name) else {
                continue;
            };
            let strategy = strategy.clone();
            let content = content.clone();
            let language = language.to_string();
            tasks.push(Box::pin(async move {
                strategy.analyze(file_id, &content, &language, options).await
            }));
        }
        if !tasks.is_empty() {
            for findings in self.parallel.execute_parallel_tasks(tasks).await {
                result.add_findings(findings);
            }
        }

        if options.advanced_analysis {
            if options.metrics_collection {
                self.collect_file_metrics(file_id, &content, language, &mut result)
                    .await;
            }
            if options.external_tools {
                self.run_external_tools(file_id, &content, language, &mut result)
                    .await;
            }
            if options.codeql_analysis && self.codeql.is_available() {
                self.run_codeql(file_id, &file_path, language, options, &mut result)
                    .await;
            }
        }

        if options.summarize {
            let summary = self
                .summarizer
                .summarize(&content, language, SummaryLevel::Module)
                .await;
            result.summary = serde_json::to_value(summary).ok();
        }

        for finding in result.findings[structure_finding_count..].to_vec() {
            if let Err(err) = self.persist_finding(file_id, &finding).await {
                log::error!("failed to persist finding: {}", err);
            }
        }

        result
    }

    async fn collect_file_metrics(
        &self,
        file_id: i64,
        content: &str,
        language: &str,
        result: &mut AnalysisResult,
    ) {
        let Some(temp) = write_temp_file(content, language) else {
            return;
        };
        // Line counting and regex sweeps are CPU-bound; keep them off the
        // async runtime.
        let metrics_path = temp.path().to_path_buf();
        let metrics = match tokio::task::spawn_blocking(move || {
            MetricsCollector::new().collect_metrics(&metrics_path)
        })
        .await
        {
            Ok(metrics) => metrics,
            Err(err) => {
                log::error!("metrics collection task failed: {}", err);
                return;
            }
        };
        if metrics.is_empty() {
            return;
        }
        if let Err(err) = self.metrics.store_metrics(&self.graph, file_id, &metrics).await {
            log::error!("failed to store metrics for file {}: {}", file_id, err);
        }
        log::info!("collected {} metrics for file {}", metrics.len(), file_id);
        result.metrics = Some(Value::Object(metrics));
    }

    async fn run_external_tools(
        &self,
        file_id: i64,
        content: &str,
        language: &str,
        result: &mut AnalysisResult,
    ) {
        let Some(temp) = write_temp_file(content, language) else {
            return;
        };
        let issues = self
            .tools
            .execute_all_tools(language, &[temp.path()])
            .await;
        if issues.is_empty() {
            return;
        }
        let file_id_map = single_file_map(temp.path(), file_id);
        let findings = self.tools.convert_to_findings(&issues, &file_id_map);
        log::info!(
            "added {} findings from external tools for file {}",
            findings.len(),
            file_id
        );
        result.add_findings(findings);
    }

    async fn run_codeql(
        &self,
        file_id: i64,
        file_path: &str,
        language: &str,
        options: &AnalysisOptions,
        result: &mut AnalysisResult,
    ) {
        let Some(repo_path) = options.repo_path.as_ref() else {
            return;
        };
        let database = match options.codeql_database.clone() {
            Some(database) => database,
            None => match self.codeql.ensure_database(repo_path, language).await {
                Ok(database) => database,
                Err(err) => {
                    log::error!("codeql database creation failed: {}", err);
                    return;
                }
            },
        };
        let results = match self.codeql.run_default_queries(&database, language).await {
            Ok(results) => results,
            Err(err) => {
                log::error!("codeql analysis failed for file {}: {}", file_id, err);
                return;
            }
        };
        if results.is_empty() {
            return;
        }
        let mut file_id_map = HashMap::new();
        file_id_map.insert(file_path.to_string(), file_id);
        let findings = self.codeql.convert_to_findings(&results, &file_id_map);
        log::info!(
            "added {} findings from codeql for file {}",
            findings.len(),
            file_id
        );
        result.add_findings(findings);
    }

    async fn persist_finding(&self, file_id: i64, finding: &Finding) -> Result<(), GraphError> {
        let properties = json!({
            "type": finding.kind,
            "vulnerability_type": finding.vulnerability_type,
            "description": finding.description,
            "line_number": finding.line_number,
            "matched_text": finding.matched_text.clone().unwrap_or_default(),
            "severity": finding.severity.as_str(),
            "confidence": finding.confidence,
            "suggestion": finding.suggestion.clone().unwrap_or_default(),
            "timestamp": chrono::Utc::now(),
        });
        let finding_id = self
            .graph
            .create_node(&[labels::FINDING], properties)
            .await?;
        self.graph
            .create_relationship(file_id, finding_id, edges::HAS_FINDING, None)
            .await?;
        if let Some(pattern_id) = finding.pattern_id {
            self.graph
                .create_relationship(finding_id, pattern_id, edges::MATCHES_PATTERN, None)
                .await?;
        }
        Ok(())
    }

    /// The effective engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

fn default_language_analyzers() -> Vec<Arc<dyn LanguageAnalyzer>> {
    vec![
        Arc::new(PythonAnalyzer::new()),
        Arc::new(JavaScriptAnalyzer::new()),
        Arc::new(CSharpAnalyzer::new()),
        Arc::new(JavaAnalyzer::new()),
        Arc::new(PhpAnalyzer::new()),
    ]
}

/// Canonical file extension used for temp files handed to metrics and
/// external tools.
fn extension_for_language(language: &str) -> &'static str {
    match language {
        "Python" => "py",
        "JavaScript" => "js",
        "TypeScript" => "ts",
        "Java" => "java",
        "C#" => "cs",
        "PHP" => "php",
        "Ruby" => "rb",
        "Go" => "go",
        "C" | "C++" | "C/C++" => "cpp",
        _ => "txt",
    }
}

fn write_temp_file(content: &str, language: &str) -> Option<tempfile::NamedTempFile> {
    let mut temp = match tempfile::Builder::new()
        .prefix("vulnscope_")
        .suffix(&format!(".{}", extension_for_language(language)))
        .tempfile()
    {
        Ok(temp) => temp,
        Err(err) => {
            log::error!("failed to create temp file: {}", err);
            return None;
        }
    };
    if let Err(err) = temp.write_all(content.as_bytes()) {
        log::error!("failed to write temp file: {}", err);
        return None;
    }
    Some(temp)
}

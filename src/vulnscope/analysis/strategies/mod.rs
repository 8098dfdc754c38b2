//! Analysis strategies.
//!
//! Every strategy implements [`AnalysisStrategy`]: content in, findings
//! out, idempotent, free of global state. Strategies never persist anything;
//! the [`CodeAnalyzer`](crate::analysis::CodeAnalyzer) owns persistence. A
//! strategy that fails logs the failure and contributes zero findings.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::vulnscope::analysis::finding::Finding;

pub mod ast;
pub mod pattern_matching;
pub mod semantic;

pub use ast::AstAnalysisStrategy;
pub use pattern_matching::PatternMatchingStrategy;
pub use semantic::SemanticAnalysisStrategy;

/// Per-call analysis configuration.
#[derive(Debug, Clone)]
pub struct AnalysisOptions {
    /// Run the vulnerability pattern regex strategy.
    pub pattern_matching: bool,
    /// Run the LLM semantic strategy.
    pub semantic_analysis: bool,
    /// Run the AST strategy.
    pub ast_analysis: bool,
    /// Extract and persist a code structure summary when an extractor is
    /// available.
    pub code_structure_mapping: bool,
    /// Master switch for metrics, external tools, and CodeQL.
    pub advanced_analysis: bool,
    pub metrics_collection: bool,
    pub external_tools: bool,
    pub codeql_analysis: bool,
    /// Produce a module-level code summary.
    pub summarize: bool,
    /// Repository checkout path, required for CodeQL.
    pub repo_path: Option<PathBuf>,
    /// Pre-built CodeQL database to reuse.
    pub codeql_database: Option<PathBuf>,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            pattern_matching: true,
            semantic_analysis: true,
            ast_analysis: true,
            code_structure_mapping: true,
            advanced_analysis: false,
            metrics_collection: true,
            external_tools: true,
            codeql_analysis: true,
            summarize: false,
            repo_path: None,
            codeql_database: None,
        }
    }
}

/// A pluggable analysis algorithm run over a single file's content.
#[async_trait]
pub trait AnalysisStrategy: Send + Sync {
    /// Registry name of the strategy.
    fn name(&self) -> &'static str;

    /// Analyze one file. Never fails: errors are logged and produce an
    /// empty finding list.
    async fn analyze(
        &self,
        file_id: i64,
        content: &str,
        language: &str,
        options: &AnalysisOptions,
    ) -> Vec<Finding>;
}

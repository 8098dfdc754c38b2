//! AST-level analysis strategy.
//!
//! Dispatches by normalized language name to the registered
//! [`LanguageAnalyzer`](crate::analysis::languages::LanguageAnalyzer).
//! Languages without a registered analyzer produce no findings.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::vulnscope::analysis::finding::Finding;
use crate::vulnscope::analysis::languages::LanguageAnalyzer;
use crate::vulnscope::analysis::strategies::{AnalysisOptions, AnalysisStrategy};

/// Languages the strategy dispatches on after normalization.
const SUPPORTED_LANGUAGES: [&str; 8] = [
    "Python",
    "JavaScript",
    "TypeScript",
    "C#",
    "Java",
    "PHP",
    "Ruby",
    "Go",
];

/// Language-aware structural detection.
pub struct AstAnalysisStrategy {
    analyzers: RwLock<HashMap<String, Arc<dyn LanguageAnalyzer>>>,
}

impl AstAnalysisStrategy {
    pub fn new() -> Self {
        Self {
            analyzers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a language analyzer under its own language name.
    pub fn register_language_analyzer(&self, analyzer: Arc<dyn LanguageAnalyzer>) {
        let language = analyzer.language_name().to_string();
        log::info!("registered language analyzer for {}", language);
        self.analyzers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(language, analyzer);
    }

    /// Resolve an analyzer by exact, case-insensitive, or partial match.
    pub fn language_analyzer(&self, language: &str) -> Option<Arc<dyn LanguageAnalyzer>> {
        let analyzers = self
            .analyzers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(analyzer) = analyzers.get(language) {
            return Some(analyzer.clone());
        }
        if let Some((_, analyzer)) = analyzers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(language))
        {
            return Some(analyzer.clone());
        }
        // Combined names like "JavaScript/React" fall back to containment.
        analyzers
            .iter()
            .find(|(name, _)| language.contains(name.as_str()) || name.contains(language))
            .map(|(_, analyzer)| analyzer.clone())
    }

    /// Collapse common language name variants.
    pub fn normalize_language(language: &str) -> String {
        match language {
            "JavaScript" | "TypeScript" | "JS" | "TS" => "JavaScript".to_string(),
            "C#" | "CSharp" | "C Sharp" => "C#".to_string(),
            other if other.contains("Python") => "Python".to_string(),
            other if other.contains("Java") && !other.contains("Script") => "Java".to_string(),
            other if other.contains("PHP") => "PHP".to_string(),
            other => other.to_string(),
        }
    }
}

impl Default for AstAnalysisStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AnalysisStrategy for AstAnalysisStrategy {
    fn name(&self) -> &'static str {
        "ast_analysis"
    }

    async fn analyze(
        &self,
        file_id: i64,
        content: &str,
        language: &str,
        _options: &AnalysisOptions,
    ) -> Vec<Finding> {
        log::debug!("ast analysis for file {}", file_id);

        let normalized = Self::normalize_language(language);
        if !SUPPORTED_LANGUAGES.contains(&normalized.as_str()) {
            log::debug!("ast analysis not supported for {}", language);
            return Vec::new();
        }

        let Some(analyzer) = self.language_analyzer(&normalized) else {
            log::warn!("no language analyzer available for {}", language);
            return Vec::new();
        };

        let findings = analyzer.analyze_ast(file_id, content);
        log::debug!(
            "ast analysis complete for file {}: {} findings",
            file_id,
            findings.len()
        );
        findings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_collapses_variants() {
        assert_eq!(AstAnalysisStrategy::normalize_language("TS"), "JavaScript");
        assert_eq!(AstAnalysisStrategy::normalize_language("CSharp"), "C#");
        assert_eq!(AstAnalysisStrategy::normalize_language("Python 3"), "Python");
        assert_eq!(AstAnalysisStrategy::normalize_language("Java"), "Java");
        assert_eq!(AstAnalysisStrategy::normalize_language("Rust"), "Rust");
    }
}

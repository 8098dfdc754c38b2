//! Vulnerability pattern matching strategy.
//!
//! Loads `VulnerabilityPattern` nodes applicable to the file's language
//! from the graph store and applies them through the
//! [`PatternMatcher`](crate::analysis::patterns::PatternMatcher).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::vulnscope::analysis::finding::Finding;
use crate::vulnscope::analysis::patterns::{PatternMatcher, VulnerabilityPattern};
use crate::vulnscope::analysis::strategies::{AnalysisOptions, AnalysisStrategy};
use crate::vulnscope::graph::GraphStore;

/// Regex-based detection of known vulnerability patterns.
pub struct PatternMatchingStrategy {
    graph: Arc<dyn GraphStore>,
    matcher: PatternMatcher,
}

impl PatternMatchingStrategy {
    pub fn new(graph: Arc<dyn GraphStore>) -> Self {
        Self {
            graph,
            matcher: PatternMatcher::new(),
        }
    }
}

#[async_trait]
impl AnalysisStrategy for PatternMatchingStrategy {
    fn name(&self) -> &'static str {
        "pattern_matching"
    }

    async fn analyze(
        &self,
        file_id: i64,
        content: &str,
        language: &str,
        _options: &AnalysisOptions,
    ) -> Vec<Finding> {
        log::debug!("pattern matching for file {}", file_id);

        let rows = match self
            .graph
            .run_query(
                "MATCH (p:VulnerabilityPattern) \
                 WHERE p.language IS NULL OR p.language = $language \
                 RETURN id(p) as pattern_id, p.name as name, p.description as description, \
                        p.regex_pattern as regex_pattern, p.severity as severity, \
                        p.language as language",
                json!({"language": language}),
            )
            .await
        {
            Ok(rows) => rows,
            Err(err) => {
                log::error!("failed to load vulnerability patterns: {}", err);
                return Vec::new();
            }
        };

        let patterns: Vec<VulnerabilityPattern> = rows
            .iter()
            .filter_map(VulnerabilityPattern::from_row)
            .collect();

        let findings = self.matcher.match_patterns(file_id, content, &patterns);
        log::debug!(
            "pattern matching complete for file {}: {} matches",
            file_id,
            findings.len()
        );
        findings
    }
}

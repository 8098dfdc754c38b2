//! Code structure extraction and persistence.
//!
//! A [`StructureExtractor`] is an optional host-supplied component that
//! maps file content into a [`CodeStructure`] summary (functions, classes,
//! imports, variables) and may contribute structure-derived findings. The
//! engine persists the summary as a `CodeStructure` node with
//! `HAS_STRUCTURE`, `HAS_FUNCTION`, and `HAS_CLASS` edges.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::vulnscope::analysis::finding::Finding;
use crate::vulnscope::graph::{edges, labels, GraphError, GraphStore};

/// One extracted function.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub name: String,
    pub line_start: u32,
    pub line_end: u32,
    pub complexity: u32,
}

/// One extracted class.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassInfo {
    pub name: String,
    pub line_start: u32,
    pub line_end: u32,
}

/// Structure summary of one file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CodeStructure {
    pub functions: Vec<FunctionInfo>,
    pub classes: Vec<ClassInfo>,
    pub imports: Vec<String>,
    pub variables: Vec<String>,
}

/// Optional structure extraction capability.
#[async_trait]
pub trait StructureExtractor: Send + Sync {
    /// False when the underlying tooling is missing at runtime.
    fn is_available(&self) -> bool {
        true
    }

    /// Extract a structure summary, or `None` when the content cannot be
    /// parsed.
    async fn extract_structure(&self, content: &str, language: &str) -> Option<CodeStructure>;

    /// Structure-derived security findings. Defaults to none.
    async fn security_findings(
        &self,
        _content: &str,
        _language: &str,
        _file_id: i64,
    ) -> Vec<Finding> {
        Vec::new()
    }
}

/// Persist a structure summary under the given file node.
pub async fn store_code_structure(
    graph: &Arc<dyn GraphStore>,
    file_id: i64,
    structure: &CodeStructure,
) -> Result<i64, GraphError> {
    let structure_id = graph
        .create_node(
            &[labels::CODE_STRUCTURE],
            json!({
                "timestamp": Utc::now(),
                "structure_version": "1.0",
                "function_count": structure.functions.len(),
                "class_count": structure.classes.len(),
                "import_count": structure.imports.len(),
            }),
        )
        .await?;
    graph
        .create_relationship(file_id, structure_id, edges::HAS_STRUCTURE, None)
        .await?;

    for function in &structure.functions {
        let function_id = graph
            .create_node(
                &[labels::FUNCTION],
                json!({
                    "name": function.name,
                    "line_start": function.line_start,
                    "line_end": function.line_end,
                    "complexity": function.complexity,
                }),
            )
            .await?;
        graph
            .create_relationship(structure_id, function_id, edges::HAS_FUNCTION, None)
            .await?;
    }

    for class in &structure.classes {
        let class_id = graph
            .create_node(
                &[labels::CLASS],
                json!({
                    "name": class.name,
                    "line_start": class.line_start,
                    "line_end": class.line_end,
                }),
            )
            .await?;
        graph
            .create_relationship(structure_id, class_id, edges::HAS_CLASS, None)
            .await?;
    }

    Ok(structure_id)
}
